use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use common::{
    error::AppError,
    storage::types::{
        checkout_session::CheckoutSession,
        subscription::{Subscription, SubscriptionStatus},
        user::User,
    },
};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::api_state::ApiState;

/// Payment provider webhook entry point. Events we cannot reconcile are
/// logged and dropped; the provider always gets a 2xx so it does not retry
/// events we will never be able to process differently.
pub async fn payments_webhook(
    State(state): State<ApiState>,
    Json(event): Json<Value>,
) -> impl IntoResponse {
    let event_type = event["type"].as_str().unwrap_or("").to_string();
    let object = &event["data"]["object"];

    let result = match event_type.as_str() {
        "checkout.session.completed" => handle_checkout_completed(&state, object).await,
        "customer.subscription.created" => handle_subscription_created(&state, object).await,
        "customer.subscription.updated" => handle_subscription_updated(&state, object).await,
        other => {
            info!(event_type = other, "ignoring unhandled webhook event");
            Ok(())
        }
    };

    if let Err(err) = result {
        error!(event_type, error = %err, "webhook handler failed");
    }

    (StatusCode::OK, Json(json!({ "received": true })))
}

async fn handle_checkout_completed(state: &ApiState, object: &Value) -> Result<(), AppError> {
    let Some(session_id) = object["id"].as_str() else {
        warn!("checkout.session.completed without a session id, dropping");
        return Ok(());
    };
    let subscription_id = object["subscription"].as_str().map(String::from);
    let payment_status = object["payment_status"].as_str().unwrap_or("unknown");

    let session = CheckoutSession::mark_completed(
        &state.db,
        session_id,
        subscription_id,
        payment_status,
    )
    .await?;
    let Some(session) = session else {
        warn!(session_id, "completed event for unknown checkout session, dropping");
        return Ok(());
    };

    if let Some(customer_id) = object["customer"].as_str() {
        User::set_customer_id(&state.db, &session.user_id, customer_id).await?;
    }

    info!(
        session_id,
        user_id = %session.user_id,
        payment_status,
        "checkout session completed"
    );
    Ok(())
}

async fn handle_subscription_created(state: &ApiState, object: &Value) -> Result<(), AppError> {
    let Some(subscription_id) = object["id"].as_str() else {
        warn!("subscription.created without an id, dropping");
        return Ok(());
    };

    let session = CheckoutSession::find_by_subscription(&state.db, subscription_id).await?;
    let Some(session) = session else {
        warn!(
            subscription_id,
            "subscription.created without a matching checkout session, dropping"
        );
        return Ok(());
    };

    // The provider echoes back the user we attached at checkout. Absence of
    // the reference is treated like a mismatch: the event cannot be tied to
    // the session, so it never activates anything.
    let Some(uid) = object["metadata"]["uid"].as_str() else {
        warn!(
            subscription_id,
            session_user = %session.user_id,
            "subscription.created without a user reference, dropping"
        );
        return Ok(());
    };
    if uid != session.user_id {
        warn!(
            subscription_id,
            session_user = %session.user_id,
            event_user = uid,
            "subscription.created user mismatch, dropping"
        );
        return Ok(());
    }

    Subscription::activate(
        &state.db,
        subscription_id,
        &session.user_id,
        session.plan_type,
        session.interval,
    )
    .await?;

    info!(
        subscription_id,
        user_id = %session.user_id,
        plan = ?session.plan_type,
        "subscription activated"
    );
    Ok(())
}

async fn handle_subscription_updated(state: &ApiState, object: &Value) -> Result<(), AppError> {
    let Some(subscription_id) = object["id"].as_str() else {
        warn!("subscription.updated without an id, dropping");
        return Ok(());
    };
    let status = SubscriptionStatus::from_provider(object["status"].as_str().unwrap_or(""));

    Subscription::handle_status_change(&state.db, subscription_id, status).await
}
