use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use common::storage::types::{
    collection::Collection,
    resource::DEFAULT_PAGE_SIZE,
    user::User,
};
use serde::Deserialize;
use serde_json::json;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateCollectionRequest {
    pub title: String,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListCollectionsQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCollectionRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

pub async fn create_collection(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(input): Json<CreateCollectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let collection = Collection::create_and_store(
        &input.title,
        input.description,
        input.is_public.unwrap_or(false),
        &user.id,
        &state.db,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(collection)))
}

pub async fn list_collections(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListCollectionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
    let collections = Collection::list_for_user(&state.db, &user.id, page, page_size).await?;
    Ok(Json(json!({
        "page": page,
        "page_size": page_size,
        "collections": collections,
    })))
}

pub async fn get_collection(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let collection = Collection::get_readable(&state.db, &id, &user.id).await?;
    Ok(Json(collection))
}

pub async fn get_collection_resources(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let resources = Collection::list_resources(&state.db, &id, &user.id).await?;
    Ok(Json(json!({ "resources": resources })))
}

pub async fn update_collection(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(input): Json<UpdateCollectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let collection = Collection::update_details(
        &state.db,
        &id,
        &user.id,
        input.title,
        input.description,
        input.is_public,
    )
    .await?;
    Ok(Json(collection))
}

/// Removing a collection never touches its resources.
pub async fn delete_collection(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Collection::soft_delete(&state.db, &id, &user.id).await?;
    Ok(StatusCode::NO_CONTENT)
}
