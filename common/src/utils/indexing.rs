use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{error::AppError, utils::config::AppConfig};

/// Metadata attached to every chunk submitted for indexing.
#[derive(Debug, Clone, Serialize)]
pub struct ChunkMetadata {
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct IndexChunksRequest<'a> {
    chunks: &'a [String],
    metadata: &'a ChunkMetadata,
}

#[derive(Debug, Deserialize)]
struct IndexChunksResponse {
    chunk_handles: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SaveChunksRequest<'a> {
    chunk_handles: &'a [String],
}

/// HTTP client for the external indexing service. Index writes happen from
/// the ingestion worker; deletes also happen from the API's resource-delete
/// path, which is why this lives in the shared crate.
#[derive(Clone)]
pub struct IndexingClient {
    http: reqwest::Client,
    base_url: String,
}

impl IndexingClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.index_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.index_service_url.trim_end_matches('/').to_string(),
        })
    }

    /// Submit cleaned chunks and bind the resulting handles to the owning
    /// user in one round trip each.
    pub async fn index_for_user(
        &self,
        user_id: &str,
        chunks: &[String],
        metadata: &ChunkMetadata,
    ) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }

        let response = self
            .http
            .post(format!("{}/v1/chunks", self.base_url))
            .json(&IndexChunksRequest { chunks, metadata })
            .send()
            .await?
            .error_for_status()?;

        let IndexChunksResponse { chunk_handles } = response.json().await?;

        self.http
            .post(format!("{}/v1/users/{user_id}/chunks", self.base_url))
            .json(&SaveChunksRequest {
                chunk_handles: &chunk_handles,
            })
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }

    pub async fn delete_resource_data(
        &self,
        user_id: &str,
        resource_id: &str,
    ) -> Result<(), AppError> {
        self.http
            .delete(format!(
                "{}/v1/users/{user_id}/resources/{resource_id}",
                self.base_url
            ))
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}
