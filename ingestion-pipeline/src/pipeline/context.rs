use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{ingest_task::IngestTask, resource::Resource},
    },
};
use tracing::error;

use super::{config::IngestionConfig, services::PipelineServices};

/// Content resolved for a resource, plus everything finalize needs to write
/// back.
#[derive(Debug, Clone)]
pub struct ResolvedContent {
    pub content: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub storage_key: String,
}

pub struct PipelineContext<'a> {
    pub task: &'a IngestTask,
    pub task_id: String,
    pub attempt: u32,
    pub db: &'a SurrealDbClient,
    pub storage: &'a StorageManager,
    pub pipeline_config: &'a IngestionConfig,
    pub services: &'a dyn PipelineServices,
    pub resource: Option<Resource>,
    pub resolved: Option<ResolvedContent>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        task: &'a IngestTask,
        db: &'a SurrealDbClient,
        storage: &'a StorageManager,
        pipeline_config: &'a IngestionConfig,
        services: &'a dyn PipelineServices,
    ) -> Self {
        let task_id = task.id.clone();
        let attempt = task.attempts;
        Self {
            task,
            task_id,
            attempt,
            db,
            storage,
            pipeline_config,
            services,
            resource: None,
            resolved: None,
        }
    }

    pub fn resource(&self) -> Result<&Resource, AppError> {
        self.resource
            .as_ref()
            .ok_or_else(|| AppError::InternalError("resource expected to be loaded".into()))
    }

    pub fn resolved(&self) -> Result<&ResolvedContent, AppError> {
        self.resolved
            .as_ref()
            .ok_or_else(|| AppError::InternalError("resolved content expected to be available".into()))
    }

    pub fn take_resolved(&mut self) -> Result<ResolvedContent, AppError> {
        self.resolved.take().ok_or_else(|| {
            AppError::InternalError("resolved content expected to be available for finalize".into())
        })
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            task_id = %self.task_id,
            attempt = self.attempt,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }
}
