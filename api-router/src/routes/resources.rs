use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use common::storage::types::{
    collection::Collection,
    ingest_task::{IngestJob, IngestParams, IngestTask},
    resource::{
        CreateResourceParams, Resource, ResourcePatch, ResourceType, DEFAULT_PAGE_SIZE,
    },
    user::User,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct CreateResourceRequest {
    pub resource_type: ResourceType,
    pub title: Option<String>,
    pub url: Option<String>,
    pub link_id: Option<String>,
    pub content: Option<String>,
    pub collection_id: Option<String>,
    pub is_public: Option<bool>,
    pub read_only: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ListResourcesQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct GetResourceQuery {
    pub hydrate: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateResourceRequest {
    pub title: Option<String>,
    pub is_public: Option<bool>,
    pub read_only: Option<bool>,
    pub content: Option<String>,
}

fn default_title(input: &CreateResourceRequest) -> String {
    if let Some(title) = input.title.as_deref() {
        let title = title.trim();
        if !title.is_empty() {
            return title.to_string();
        }
    }
    input
        .url
        .as_deref()
        .and_then(|u| url::Url::parse(u).ok())
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Create the placeholder row and enqueue ingestion. The response returns
/// immediately with the resource in `processing`.
pub async fn create_resource(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Json(input): Json<CreateResourceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(collection_id) = input.collection_id.as_deref() {
        Collection::get_owned(&state.db, collection_id, &user.id).await?;
    }

    let params = CreateResourceParams {
        resource_type: input.resource_type,
        title: default_title(&input),
        url: input.url.clone(),
        link_id: input.link_id.clone(),
        content: input.content.clone(),
        collection_id: input.collection_id.clone(),
        is_public: input.is_public,
        read_only: input.read_only,
    };
    let resource = Resource::create_and_store(&params, &user.id, &state.db).await?;

    // Notes never trigger a crawl, whatever the caller sent along.
    let job_url = match input.resource_type {
        ResourceType::Weblink => input.url,
        ResourceType::Note => None,
    };
    let job = IngestJob {
        resource_id: resource.id.clone(),
        user_id: user.id.clone(),
        params: IngestParams {
            url: job_url,
            link_id: input.link_id,
            inline_content: input.content,
            title: input.title,
            collection_id: input.collection_id,
        },
    };
    let task = IngestTask::enqueue(job, &state.db).await?;

    info!(
        user_id = %user.id,
        resource_id = %resource.id,
        task_id = %task.id,
        resource_type = resource.resource_type.as_str(),
        "resource created and ingestion enqueued"
    );

    Ok((StatusCode::CREATED, Json(resource)))
}

pub async fn list_resources(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListResourcesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

    let resources = Resource::list_for_user(&state.db, &user.id, page, page_size).await?;
    Ok(Json(json!({
        "page": page,
        "page_size": page_size,
        "resources": resources,
    })))
}

/// Fetch one resource, optionally hydrated with its document body from the
/// blob store.
pub async fn get_resource(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Query(query): Query<GetResourceQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let resource = Resource::get_readable(&state.db, &id, &user.id).await?;

    let content = if query.hydrate.unwrap_or(false) {
        match resource.canonical_storage_key() {
            Some(key) => {
                let bytes = state.storage.get(key).await.map_err(|err| {
                    warn!(resource_id = %resource.id, key, error = %err, "failed to hydrate resource content");
                    ApiError::InternalError("Internal server error".to_string())
                })?;
                Some(String::from_utf8_lossy(&bytes).into_owned())
            }
            None => None,
        }
    } else {
        None
    };

    Ok(Json(json!({
        "resource": resource,
        "content": content,
    })))
}

/// Update mutable fields. Supplying `content` replaces the document body:
/// the row re-enters `processing` and a fresh ingest task carries the new
/// content through the pipeline.
pub async fn update_resource(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
    Json(input): Json<UpdateResourceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let existing = Resource::get_owned(&state.db, &id, &user.id).await?;

    if input.content.is_some() && existing.read_only && input.read_only != Some(false) {
        return Err(ApiError::ValidationError(
            "Resource content is read-only".to_string(),
        ));
    }

    let mut resource = Resource::update_details(
        &state.db,
        &id,
        &user.id,
        ResourcePatch {
            title: input.title,
            is_public: input.is_public,
            read_only: input.read_only,
        },
    )
    .await?;

    if let Some(content) = input.content {
        resource = Resource::reset_for_reingest(&state.db, &id).await?;
        let task = IngestTask::enqueue(
            IngestJob {
                resource_id: id.clone(),
                user_id: user.id.clone(),
                params: IngestParams {
                    inline_content: Some(content),
                    ..IngestParams::default()
                },
            },
            &state.db,
        )
        .await?;
        info!(
            user_id = %user.id,
            resource_id = %id,
            task_id = %task.id,
            "resource content replaced, re-ingestion enqueued"
        );
    }

    Ok(Json(resource))
}

/// Soft-delete the resource, cancel queued ingestion and clear its index
/// data. Index cleanup is best-effort; the delete itself never fails on it.
pub async fn delete_resource(
    State(state): State<ApiState>,
    Extension(user): Extension<User>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Resource::soft_delete(&state.db, &id, &user.id).await?;

    match IngestTask::get_active_for_resource(&state.db, &id).await {
        Ok(tasks) => {
            for task in tasks {
                if let Err(err) = task.mark_cancelled(&state.db).await {
                    warn!(task_id = %task.id, error = %err, "failed to cancel ingest task");
                }
            }
        }
        Err(err) => warn!(resource_id = %id, error = %err, "failed to list active ingest tasks"),
    }

    if let Err(err) = state.indexing.delete_resource_data(&user.id, &id).await {
        warn!(resource_id = %id, error = %err, "failed to remove resource index data");
    }

    Ok(StatusCode::NO_CONTENT)
}
