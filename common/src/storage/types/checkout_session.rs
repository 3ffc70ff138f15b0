use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::subscription::{PlanType, SubscriptionInterval};

// Write-once-then-updated: created when a checkout flow starts, later
// stamped with the provider's payment status and subscription id.
stored_object!(CheckoutSession, "checkout_session", {
    user_id: String,
    provider_session_id: String,
    plan_type: PlanType,
    interval: SubscriptionInterval,
    subscription_id: Option<String>,
    payment_status: Option<String>
});

impl CheckoutSession {
    pub fn new(
        user_id: &str,
        provider_session_id: &str,
        plan_type: PlanType,
        interval: SubscriptionInterval,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_string(),
            provider_session_id: provider_session_id.to_string(),
            plan_type,
            interval,
            subscription_id: None,
            payment_status: None,
        }
    }

    pub async fn find_by_provider_session(
        db: &SurrealDbClient,
        provider_session_id: &str,
    ) -> Result<Option<CheckoutSession>, AppError> {
        let session: Option<CheckoutSession> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE provider_session_id = $session_id
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("session_id", provider_session_id.to_string()))
            .await?
            .take(0)?;

        Ok(session)
    }

    pub async fn find_by_subscription(
        db: &SurrealDbClient,
        subscription_id: &str,
    ) -> Result<Option<CheckoutSession>, AppError> {
        let session: Option<CheckoutSession> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE subscription_id = $subscription_id
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("subscription_id", subscription_id.to_string()))
            .await?
            .take(0)?;

        Ok(session)
    }

    /// Stamp the session with the provider's confirmation. The update sets
    /// the same values on every delivery, so webhook redelivery is safe.
    pub async fn mark_completed(
        db: &SurrealDbClient,
        provider_session_id: &str,
        subscription_id: Option<String>,
        payment_status: &str,
    ) -> Result<Option<CheckoutSession>, AppError> {
        let mut result = db
            .client
            .query(
                "UPDATE type::table($table)
                 SET subscription_id = $subscription_id,
                     payment_status = $payment_status,
                     updated_at = $now
                 WHERE provider_session_id = $session_id
                 RETURN *",
            )
            .bind(("table", Self::table_name()))
            .bind(("session_id", provider_session_id.to_string()))
            .bind(("subscription_id", subscription_id))
            .bind(("payment_status", payment_status.to_string()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;

        Ok(result.take(0)?)
    }
}
