use std::sync::Arc;

use api_router::api_state::ApiState;
use axum::Router;
use axum_test::TestServer;
use common::{
    storage::{
        db::SurrealDbClient,
        store::{testing::test_config_memory, StorageManager},
        types::user::User,
    },
    utils::indexing::IndexingClient,
};
use uuid::Uuid;

pub struct TestContext {
    pub db: Arc<SurrealDbClient>,
    pub storage: StorageManager,
}

/// Spin up the versioned API against an in-memory database and blob store.
pub async fn setup_server() -> (TestServer, TestContext) {
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb"),
    );
    db.ensure_initialized()
        .await
        .expect("Failed to build indexes");

    let config = test_config_memory();
    let storage = StorageManager::new(&config)
        .await
        .expect("Failed to create memory storage");

    let state = ApiState {
        db: Arc::clone(&db),
        config: config.clone(),
        storage: storage.clone(),
        indexing: IndexingClient::new(&config).expect("Failed to create indexing client"),
    };

    let app: Router = Router::new()
        .nest("/api/v1", api_router::api_routes_v1(&state))
        .with_state(state);

    let server = TestServer::new(app).expect("Failed to start test server");
    (server, TestContext { db, storage })
}

pub async fn create_test_user(db: &SurrealDbClient, email: &str) -> User {
    let user = User::new(email).expect("Failed to build user");
    db.store_item(user.clone())
        .await
        .expect("Failed to store user");
    user
}
