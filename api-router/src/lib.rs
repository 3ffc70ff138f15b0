use api_state::ApiState;
use axum::{
    extract::FromRef,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    collections::{
        create_collection, delete_collection, get_collection, get_collection_resources,
        list_collections, update_collection,
    },
    liveness::live,
    readiness::ready,
    resources::{
        create_resource, delete_resource, get_resource, list_resources, update_resource,
    },
    usage::{get_available_tiers, report_usage},
    webhooks::payments_webhook,
};

pub mod api_state;
pub mod error;
mod middleware_api_auth;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (probes and provider webhooks;
    // webhook signatures are verified upstream)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/webhooks/payments", post(payments_webhook));

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route("/resources", post(create_resource).get(list_resources))
        .route(
            "/resources/{id}",
            get(get_resource).patch(update_resource).delete(delete_resource),
        )
        .route("/collections", post(create_collection).get(list_collections))
        .route(
            "/collections/{id}",
            get(get_collection)
                .patch(update_collection)
                .delete(delete_collection),
        )
        .route("/collections/{id}/resources", get(get_collection_resources))
        .route("/usage/tiers", get(get_available_tiers))
        .route("/usage", post(report_usage))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}
