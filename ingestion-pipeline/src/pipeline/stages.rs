use bytes::Bytes;
use common::{
    error::AppError,
    storage::types::{
        link::Link,
        resource::{count_words, Resource, ResourceMeta, ResourceType},
    },
    utils::indexing::ChunkMetadata,
};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument, warn};

use super::{
    context::{PipelineContext, ResolvedContent},
    services::{clean_for_indexing, prepare_chunks},
    state::{Indexed, IngestMachine, Finalized, Ready, Resolved},
};

/// Resolve the resource's content, first match wins: a prior crawl's parsed
/// blob, inline content carried by the job, an already-uploaded blob, then a
/// fresh crawl (weblinks only). Inline content outranks the stored blob so a
/// content replacement never reads the old document back. The result is
/// persisted under `resource/<id>` before the stage completes.
#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, attempt = ctx.attempt, user_id = %ctx.task.user_id)
)]
pub async fn resolve(
    machine: IngestMachine<(), Ready>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestMachine<(), Resolved>, AppError> {
    let job = &ctx.task.job;
    let resource = Resource::get_active(ctx.db, &job.resource_id).await?;
    let params = &job.params;

    let mut resolved: Option<(String, Option<String>)> = None;

    if let Some(link_id) = params.link_id.as_deref() {
        match Link::get_for_user(ctx.db, link_id, &job.user_id).await {
            Ok(link) => match link.parsed_storage_key.as_deref() {
                Some(key) => match ctx.storage.get(key).await {
                    Ok(bytes) => {
                        debug!(link_id, key, "reusing parsed content from prior crawl");
                        resolved =
                            Some((String::from_utf8_lossy(&bytes).into_owned(), link.title));
                    }
                    Err(err) => {
                        warn!(link_id, key, error = %err, "link blob unavailable, falling through");
                    }
                },
                None => {
                    warn!(link_id, "link record has no parsed content, falling through");
                }
            },
            Err(err) => {
                warn!(link_id, error = %err, "link record not usable, falling through");
            }
        }
    }

    if resolved.is_none() {
        if let Some(content) = params.inline_content.clone() {
            debug!("using inline content carried by the job");
            resolved = Some((content, None));
        }
    }

    if resolved.is_none() {
        if let Some(key) = resource.canonical_storage_key() {
            let bytes = ctx.storage.get(key).await?;
            debug!(key, "loaded uploaded content from blob store");
            resolved = Some((String::from_utf8_lossy(&bytes).into_owned(), None));
        }
    }

    if resolved.is_none() && resource.resource_type == ResourceType::Weblink {
        if let Some(url) = params.url.as_deref() {
            let page = ctx.services.crawl(url).await?;
            resolved = Some((page.content, page.title));
        }
    }

    let (content, extracted_title) = resolved.unwrap_or_default();

    let storage_key = Resource::storage_location(&resource.id);
    ctx.storage
        .put(&storage_key, Bytes::from(content.clone().into_bytes()))
        .await?;

    let title = params
        .title
        .clone()
        .or(extracted_title)
        .or_else(|| Some(resource.title.clone()));
    let url = params
        .url
        .clone()
        .or_else(|| resource.meta.url().map(str::to_string));

    info!(
        task_id = %ctx.task_id,
        attempt = ctx.attempt,
        resource_id = %resource.id,
        chars = content.chars().count(),
        %storage_key,
        "resource content resolved"
    );

    ctx.resolved = Some(ResolvedContent {
        content,
        title,
        url,
        storage_key,
    });
    ctx.resource = Some(resource);

    machine
        .resolve()
        .map_err(|(_, guard)| map_guard_error("resolve", &guard))
}

/// Clean, chunk and submit the content for indexing. Empty content is valid
/// and skips this stage's work entirely.
#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, attempt = ctx.attempt, user_id = %ctx.task.user_id)
)]
pub async fn index(
    machine: IngestMachine<(), Resolved>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestMachine<(), Indexed>, AppError> {
    let resource = ctx.resource()?;
    let resolved = ctx.resolved()?;

    if resolved.content.trim().is_empty() {
        debug!(
            task_id = %ctx.task_id,
            resource_id = %resource.id,
            "empty content, skipping indexing"
        );
    } else {
        let cleaned = clean_for_indexing(&resolved.content);
        let tuning = &ctx.pipeline_config.tuning;
        let chunks = prepare_chunks(
            &cleaned,
            tuning.chunk_min_chars,
            tuning.chunk_max_chars,
            tuning.chunk_overlap_chars,
        )?;

        let metadata = ChunkMetadata {
            resource_id: resource.id.clone(),
            url: resolved.url.clone(),
            title: resolved.title.clone(),
            collection_id: ctx.task.job.params.collection_id.clone(),
        };

        ctx.services
            .index_chunks(&ctx.task.user_id, &chunks, &metadata)
            .await?;

        debug!(
            task_id = %ctx.task_id,
            attempt = ctx.attempt,
            resource_id = %resource.id,
            chunk_count = chunks.len(),
            "chunks submitted for indexing"
        );
    }

    machine
        .index()
        .map_err(|(_, guard)| map_guard_error("index", &guard))
}

/// One guarded update closes the run: storage key, word count, status
/// `finish` and the normalized meta land together.
#[instrument(
    level = "trace",
    skip_all,
    fields(task_id = %ctx.task_id, attempt = ctx.attempt, user_id = %ctx.task.user_id)
)]
pub async fn finalize(
    machine: IngestMachine<(), Indexed>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestMachine<(), Finalized>, AppError> {
    let resource = ctx.resource()?.clone();
    let resolved = ctx.take_resolved()?;
    let word_count = count_words(&resolved.content);

    let meta = match resource.resource_type {
        ResourceType::Weblink => ResourceMeta::Weblink {
            url: resolved.url.clone(),
            title: resolved.title.clone(),
            storage_key: Some(resolved.storage_key.clone()),
        },
        ResourceType::Note => ResourceMeta::Note {
            storage_key: Some(resolved.storage_key.clone()),
        },
    };

    Resource::finalize_ingestion(ctx.db, &resource.id, &resolved.storage_key, word_count, meta)
        .await?;

    debug!(
        task_id = %ctx.task_id,
        attempt = ctx.attempt,
        resource_id = %resource.id,
        word_count,
        "resource finalized"
    );

    machine
        .finalize()
        .map_err(|(_, guard)| map_guard_error("finalize", &guard))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
