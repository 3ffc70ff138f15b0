use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::testing::TestStorageManager,
        types::{
            ingest_task::{IngestJob, IngestParams, IngestTask, TaskState},
            link::Link,
            resource::{CreateResourceParams, IndexStatus, Resource, ResourceType},
        },
    },
    utils::indexing::ChunkMetadata,
};
use chrono::Utc;
use uuid::Uuid;

use super::{IngestionConfig, IngestionPipeline, PipelineServices};
use crate::utils::page_extraction::CrawledPage;

#[derive(Default)]
struct StubServices {
    crawl_result: Option<Result<CrawledPage, AppError>>,
    crawls: Mutex<Vec<String>>,
    indexed: Mutex<Vec<(String, Vec<String>, ChunkMetadata)>>,
}

impl StubServices {
    fn crawl_ok(content: &str, title: Option<&str>) -> Self {
        Self {
            crawl_result: Some(Ok(CrawledPage {
                content: content.to_string(),
                title: title.map(str::to_string),
            })),
            ..Self::default()
        }
    }

    fn crawl_err(err: AppError) -> Self {
        Self {
            crawl_result: Some(Err(err)),
            ..Self::default()
        }
    }

    fn crawl_count(&self) -> usize {
        self.crawls.lock().expect("crawls lock").len()
    }

    fn indexed_calls(&self) -> Vec<(String, Vec<String>, ChunkMetadata)> {
        self.indexed.lock().expect("indexed lock").clone()
    }
}

#[async_trait]
impl PipelineServices for StubServices {
    async fn crawl(&self, url: &str) -> Result<CrawledPage, AppError> {
        self.crawls.lock().expect("crawls lock").push(url.to_string());
        match &self.crawl_result {
            Some(Ok(page)) => Ok(page.clone()),
            Some(Err(AppError::Validation(msg))) => Err(AppError::Validation(msg.clone())),
            Some(Err(err)) => Err(AppError::Processing(err.to_string())),
            None => Err(AppError::Processing("unexpected crawl call".into())),
        }
    }

    async fn index_chunks(
        &self,
        user_id: &str,
        chunks: &[String],
        metadata: &ChunkMetadata,
    ) -> Result<(), AppError> {
        self.indexed.lock().expect("indexed lock").push((
            user_id.to_string(),
            chunks.to_vec(),
            metadata.clone(),
        ));
        Ok(())
    }
}

async fn setup() -> (Arc<SurrealDbClient>, TestStorageManager) {
    let db = SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
        .await
        .expect("in-memory surrealdb");
    let storage = TestStorageManager::new_memory()
        .await
        .expect("memory storage");
    (Arc::new(db), storage)
}

fn build_pipeline(
    db: Arc<SurrealDbClient>,
    storage: &TestStorageManager,
    services: Arc<StubServices>,
) -> IngestionPipeline {
    IngestionPipeline::with_services(
        db,
        storage.clone_storage(),
        IngestionConfig::default(),
        services,
    )
    .expect("pipeline")
}

async fn store_weblink(db: &SurrealDbClient, user_id: &str, url: &str) -> Resource {
    let params = CreateResourceParams {
        resource_type: ResourceType::Weblink,
        title: "Captured page".to_string(),
        url: Some(url.to_string()),
        link_id: None,
        content: None,
        collection_id: None,
        is_public: None,
        read_only: None,
    };
    Resource::create_and_store(&params, user_id, db)
        .await
        .expect("store resource")
}

async fn claim_task(db: &SurrealDbClient, job: IngestJob) -> IngestTask {
    IngestTask::enqueue(job, db).await.expect("enqueue");
    IngestTask::claim_next_ready(db, "test-worker", Utc::now(), std::time::Duration::from_secs(60))
        .await
        .expect("claim")
        .expect("task ready")
}

fn weblink_job(resource: &Resource, user_id: &str, url: &str) -> IngestJob {
    IngestJob {
        resource_id: resource.id.clone(),
        user_id: user_id.to_string(),
        params: IngestParams {
            url: Some(url.to_string()),
            ..IngestParams::default()
        },
    }
}

#[tokio::test]
async fn test_weblink_crawl_finishes_resource() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::crawl_ok(
        "A page body with several words of content.",
        Some("Extracted Title"),
    ));
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    let resource = store_weblink(&db, "user123", "https://example.com").await;
    let task = claim_task(&db, weblink_job(&resource, "user123", "https://example.com")).await;

    pipeline.process_task(task.clone()).await.expect("process");

    assert_eq!(services.crawl_count(), 1);

    let updated = Resource::get_active(&db, &resource.id).await.expect("get");
    assert_eq!(updated.index_status, IndexStatus::Finish);
    assert_eq!(updated.word_count, Some(8));
    let expected_key = format!("resource/{}", resource.id);
    assert_eq!(updated.canonical_storage_key(), Some(expected_key.as_str()));
    assert_eq!(updated.meta.storage_key(), Some(expected_key.as_str()));

    // No caller title on the job: the extracted title lands in meta.
    assert_eq!(updated.meta.url(), Some("https://example.com"));

    let blob = storage.get(&expected_key).await.expect("blob stored");
    assert_eq!(blob.as_ref(), b"A page body with several words of content.");

    let calls = services.indexed_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "user123");
    assert!(!calls[0].1.is_empty());
    assert_eq!(calls[0].2.resource_id, resource.id);

    let finished: IngestTask = db.get_item(&task.id).await.expect("get").expect("task");
    assert_eq!(finished.state, TaskState::Succeeded);
}

#[tokio::test]
async fn test_caller_title_wins_over_extracted() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::crawl_ok("body", Some("Extracted Title")));
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    let resource = store_weblink(&db, "user123", "https://example.com").await;
    let mut job = weblink_job(&resource, "user123", "https://example.com");
    job.params.title = Some("Caller Title".to_string());
    let task = claim_task(&db, job).await;

    pipeline.process_task(task).await.expect("process");

    let calls = services.indexed_calls();
    assert_eq!(calls[0].2.title.as_deref(), Some("Caller Title"));
}

#[tokio::test]
async fn test_extraction_failure_marks_resource_failed() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::crawl_err(AppError::Processing(
        "fetch timed out".into(),
    )));
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    let resource = store_weblink(&db, "user123", "https://example.com").await;
    let task = claim_task(&db, weblink_job(&resource, "user123", "https://example.com")).await;

    let result = pipeline.process_task(task.clone()).await;
    assert!(matches!(result, Err(AppError::Processing(_))));

    let updated = Resource::get_active(&db, &resource.id).await.expect("get");
    assert_eq!(updated.index_status, IndexStatus::Failed);

    // Nothing was submitted for indexing.
    assert!(services.indexed_calls().is_empty());

    // First attempt of three: the queue schedules a retry.
    let failed: IngestTask = db.get_item(&task.id).await.expect("get").expect("task");
    assert_eq!(failed.state, TaskState::Failed);
    assert!(failed.can_retry());
}

#[tokio::test]
async fn test_empty_note_finishes_without_indexing() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::default());
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    let params = CreateResourceParams {
        resource_type: ResourceType::Note,
        title: "Blank note".to_string(),
        url: None,
        link_id: None,
        content: Some(String::new()),
        collection_id: None,
        is_public: None,
        read_only: None,
    };
    let resource = Resource::create_and_store(&params, "user123", &db)
        .await
        .expect("store resource");

    let job = IngestJob {
        resource_id: resource.id.clone(),
        user_id: "user123".to_string(),
        params: IngestParams {
            inline_content: Some(String::new()),
            ..IngestParams::default()
        },
    };
    let task = claim_task(&db, job).await;

    pipeline.process_task(task).await.expect("process");

    let updated = Resource::get_active(&db, &resource.id).await.expect("get");
    assert_eq!(updated.index_status, IndexStatus::Finish);
    assert_eq!(updated.word_count, Some(0));
    assert_eq!(services.crawl_count(), 0);
    assert!(services.indexed_calls().is_empty());
}

#[tokio::test]
async fn test_content_replacement_reingests_new_inline_content() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::default());
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    let params = CreateResourceParams {
        resource_type: ResourceType::Note,
        title: "Living note".to_string(),
        url: None,
        link_id: None,
        content: Some("first draft".to_string()),
        collection_id: None,
        is_public: None,
        read_only: None,
    };
    let resource = Resource::create_and_store(&params, "user123", &db)
        .await
        .expect("store resource");

    let job = IngestJob {
        resource_id: resource.id.clone(),
        user_id: "user123".to_string(),
        params: IngestParams {
            inline_content: Some("first draft".to_string()),
            ..IngestParams::default()
        },
    };
    let task = claim_task(&db, job).await;
    pipeline.process_task(task).await.expect("first ingest");

    let key = format!("resource/{}", resource.id);
    let blob = storage.get(&key).await.expect("blob stored");
    assert_eq!(blob.as_ref(), b"first draft");

    // Replace the content: reset the row and carry the new body on the job.
    // The stored blob must not shadow it.
    Resource::reset_for_reingest(&db, &resource.id)
        .await
        .expect("reset");
    let job = IngestJob {
        resource_id: resource.id.clone(),
        user_id: "user123".to_string(),
        params: IngestParams {
            inline_content: Some("second draft entirely".to_string()),
            ..IngestParams::default()
        },
    };
    let task = claim_task(&db, job).await;
    pipeline.process_task(task).await.expect("re-ingest");

    let blob = storage.get(&key).await.expect("blob rewritten");
    assert_eq!(blob.as_ref(), b"second draft entirely");

    let updated = Resource::get_active(&db, &resource.id).await.expect("get");
    assert_eq!(updated.index_status, IndexStatus::Finish);
    assert_eq!(updated.word_count, Some(3));
}

#[tokio::test]
async fn test_note_with_url_never_crawls() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::default());
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    let params = CreateResourceParams {
        resource_type: ResourceType::Note,
        title: "Note with a stray url".to_string(),
        url: None,
        link_id: None,
        content: None,
        collection_id: None,
        is_public: None,
        read_only: None,
    };
    let resource = Resource::create_and_store(&params, "user123", &db)
        .await
        .expect("store resource");

    let job = IngestJob {
        resource_id: resource.id.clone(),
        user_id: "user123".to_string(),
        params: IngestParams {
            url: Some("https://example.com/ignored".to_string()),
            ..IngestParams::default()
        },
    };
    let task = claim_task(&db, job).await;

    pipeline.process_task(task).await.expect("process");

    assert_eq!(services.crawl_count(), 0);
    let updated = Resource::get_active(&db, &resource.id).await.expect("get");
    assert_eq!(updated.index_status, IndexStatus::Finish);
    assert_eq!(updated.word_count, Some(0));
}

#[tokio::test]
async fn test_link_reuse_skips_crawl() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::default());
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    storage
        .put("link/parsed-1", b"previously parsed page body")
        .await
        .expect("seed blob");
    let link = Link::new(
        "https://example.com/post",
        Some("Prior crawl".to_string()),
        Some("link/parsed-1".to_string()),
        "user123",
    );
    db.store_item(link.clone()).await.expect("store link");

    let resource = store_weblink(&db, "user123", "https://example.com/post").await;
    let job = IngestJob {
        resource_id: resource.id.clone(),
        user_id: "user123".to_string(),
        params: IngestParams {
            url: Some("https://example.com/post".to_string()),
            link_id: Some(link.id.clone()),
            ..IngestParams::default()
        },
    };
    let task = claim_task(&db, job).await;

    pipeline.process_task(task).await.expect("process");

    assert_eq!(services.crawl_count(), 0);
    let updated = Resource::get_active(&db, &resource.id).await.expect("get");
    assert_eq!(updated.index_status, IndexStatus::Finish);

    let blob = storage
        .get(&format!("resource/{}", resource.id))
        .await
        .expect("blob copied to resource key");
    assert_eq!(blob.as_ref(), b"previously parsed page body");
}

#[tokio::test]
async fn test_missing_link_falls_through_to_crawl() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::crawl_ok("crawled instead", None));
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    let resource = store_weblink(&db, "user123", "https://example.com").await;
    let mut job = weblink_job(&resource, "user123", "https://example.com");
    job.params.link_id = Some("link-that-does-not-exist".to_string());
    let task = claim_task(&db, job).await;

    pipeline.process_task(task).await.expect("process");

    assert_eq!(services.crawl_count(), 1);
    let updated = Resource::get_active(&db, &resource.id).await.expect("get");
    assert_eq!(updated.index_status, IndexStatus::Finish);
}

#[tokio::test]
async fn test_uploaded_content_resolved_from_blob_store() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::default());
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    let params = CreateResourceParams {
        resource_type: ResourceType::Note,
        title: "Uploaded document".to_string(),
        url: None,
        link_id: None,
        content: None,
        collection_id: None,
        is_public: None,
        read_only: None,
    };
    let mut resource = Resource::new(&params, "user123").expect("resource");
    resource.storage_key = Some("upload/doc-1".to_string());
    db.store_item(resource.clone()).await.expect("store resource");
    storage
        .put("upload/doc-1", b"uploaded document body here")
        .await
        .expect("seed blob");

    let job = IngestJob {
        resource_id: resource.id.clone(),
        user_id: "user123".to_string(),
        params: IngestParams::default(),
    };
    let task = claim_task(&db, job).await;

    pipeline.process_task(task).await.expect("process");

    assert_eq!(services.crawl_count(), 0);
    let updated = Resource::get_active(&db, &resource.id).await.expect("get");
    assert_eq!(updated.index_status, IndexStatus::Finish);
    assert_eq!(updated.word_count, Some(4));

    let calls = services.indexed_calls();
    assert_eq!(calls.len(), 1);
}

#[tokio::test]
async fn test_validation_error_dead_letters_without_retry() {
    let (db, storage) = setup().await;
    let services = Arc::new(StubServices::crawl_err(AppError::Validation(
        "Ingestion URL host is not allowed".into(),
    )));
    let pipeline = build_pipeline(Arc::clone(&db), &storage, Arc::clone(&services));

    let resource = store_weblink(&db, "user123", "https://example.com").await;
    let task = claim_task(&db, weblink_job(&resource, "user123", "https://example.com")).await;

    let result = pipeline.process_task(task.clone()).await;
    assert!(result.is_err());

    let updated = Resource::get_active(&db, &resource.id).await.expect("get");
    assert_eq!(updated.index_status, IndexStatus::Failed);

    let dead: IngestTask = db.get_item(&task.id).await.expect("get").expect("task");
    assert_eq!(dead.state, TaskState::DeadLetter);
}
