mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{IngestionConfig, IngestionTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultPipelineServices, PipelineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            ingest_task::{IngestTask, TaskErrorInfo},
            resource::Resource,
        },
    },
    utils::config::AppConfig,
};
use tracing::{debug, error, info, warn};

use self::{context::PipelineContext, stages::{finalize, index, resolve}, state::ready};

#[allow(clippy::module_name_repetitions)]
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    pipeline_config: IngestionConfig,
    services: Arc<dyn PipelineServices>,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        config: &AppConfig,
    ) -> Result<Self, AppError> {
        Self::new_with_config(db, storage, config, IngestionConfig::default())
    }

    pub fn new_with_config(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        config: &AppConfig,
        pipeline_config: IngestionConfig,
    ) -> Result<Self, AppError> {
        let services = DefaultPipelineServices::new(config)?;
        Self::with_services(db, storage, pipeline_config, Arc::new(services))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        storage: StorageManager,
        pipeline_config: IngestionConfig,
        services: Arc<dyn PipelineServices>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            db,
            storage,
            pipeline_config,
            services,
        })
    }

    #[tracing::instrument(
        skip_all,
        fields(
            task_id = %task.id,
            resource_id = %task.job.resource_id,
            attempt = task.attempts,
            worker_id = task.worker_id.as_deref().unwrap_or("unknown-worker"),
            user_id = %task.user_id
        )
    )]
    pub async fn process_task(&self, task: IngestTask) -> Result<(), AppError> {
        let processing_task = task.mark_processing(&self.db).await?;

        match self.drive_pipeline(&processing_task).await.map_err(|err| {
            debug!(
                task_id = %processing_task.id,
                attempt = processing_task.attempts,
                error = %err,
                "ingestion pipeline failed"
            );
            err
        }) {
            Ok(()) => {
                processing_task.mark_succeeded(&self.db).await?;
                info!(
                    task_id = %processing_task.id,
                    attempt = processing_task.attempts,
                    "ingest task succeeded"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();

                // The resource records the failure before any queue
                // bookkeeping, so a crashed worker never leaves a finished
                // task with a resource stuck in processing.
                let resource_id = processing_task.job.resource_id.as_str();
                match Resource::mark_index_failed(&self.db, resource_id).await {
                    Ok(Some(_)) => {}
                    Ok(None) => warn!(
                        resource_id,
                        "resource was not in processing when recording failure"
                    ),
                    Err(mark_err) => error!(
                        resource_id,
                        error = %mark_err,
                        "failed to record ingestion failure on resource"
                    ),
                }

                let retryable = !matches!(err, AppError::Validation(_));
                let error_info = TaskErrorInfo {
                    code: None,
                    message: reason.clone(),
                };

                if retryable && processing_task.can_retry() {
                    let delay = self.retry_delay(processing_task.attempts);
                    processing_task
                        .mark_failed(error_info, delay, &self.db)
                        .await?;
                    warn!(
                        task_id = %processing_task.id,
                        attempt = processing_task.attempts,
                        retry_in_secs = delay.as_secs(),
                        "ingest task failed; scheduled retry"
                    );
                } else {
                    let failed_task = processing_task
                        .mark_failed(error_info.clone(), Duration::from_secs(0), &self.db)
                        .await?;
                    failed_task.mark_dead_letter(error_info, &self.db).await?;
                    warn!(
                        task_id = %failed_task.id,
                        attempt = failed_task.attempts,
                        "ingest task failed; moved to dead letter queue"
                    );
                }

                Err(AppError::Processing(reason))
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let tuning = &self.pipeline_config.tuning;
        let capped_attempt = attempt
            .saturating_sub(1)
            .min(tuning.retry_backoff_cap_exponent);
        let multiplier = 2_u64.pow(capped_attempt);
        let delay = tuning.retry_base_delay_secs.saturating_mul(multiplier);

        Duration::from_secs(delay.min(tuning.retry_max_delay_secs))
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    #[tracing::instrument(
        skip_all,
        fields(task_id = %task.id, attempt = task.attempts, user_id = %task.user_id)
    )]
    async fn drive_pipeline(&self, task: &IngestTask) -> Result<(), AppError> {
        let mut ctx = PipelineContext::new(
            task,
            self.db.as_ref(),
            &self.storage,
            &self.pipeline_config,
            self.services.as_ref(),
        );

        let machine = ready();

        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = resolve(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let resolve_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = index(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let index_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let _machine = finalize(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let finalize_duration = stage_start.elapsed();

        info!(
            task_id = %ctx.task_id,
            attempt = ctx.attempt,
            total_ms = Self::duration_millis(pipeline_started.elapsed()),
            resolve_ms = Self::duration_millis(resolve_duration),
            index_ms = Self::duration_millis(index_duration),
            finalize_ms = Self::duration_millis(finalize_duration),
            "ingestion pipeline finished"
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests;
