pub mod collections;
pub mod liveness;
pub mod readiness;
pub mod resources;
pub mod usage;
pub mod webhooks;
