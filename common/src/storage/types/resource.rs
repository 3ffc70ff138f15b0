use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Weblink,
    Note,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Weblink => "weblink",
            ResourceType::Note => "note",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexStatus {
    #[default]
    Processing,
    Finish,
    Failed,
}

impl IndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexStatus::Processing => "processing",
            IndexStatus::Finish => "finish",
            IndexStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, IndexStatus::Finish | IndexStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
enum IndexTransition {
    Finish,
    Fail,
}

impl IndexTransition {
    fn as_str(&self) -> &'static str {
        match self {
            IndexTransition::Finish => "finish",
            IndexTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: IndexLifecycleMachine,
        initial: Processing,
        states: [Processing, Finish, Failed],
        events {
            finish {
                transition: { from: Processing, to: Finish }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn processing() -> IndexLifecycleMachine<(), Processing> {
        IndexLifecycleMachine::new(())
    }
}

fn invalid_transition(status: &IndexStatus, event: IndexTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid index status transition: {} -> {}",
        status.as_str(),
        event.as_str()
    ))
}

/// The only legal forward transitions are `processing -> finish` and
/// `processing -> failed`. Every other write is rejected.
fn compute_next_status(status: &IndexStatus, event: IndexTransition) -> Result<IndexStatus, AppError> {
    use lifecycle::processing;
    match (status, event) {
        (IndexStatus::Processing, IndexTransition::Finish) => processing()
            .finish()
            .map(|_| IndexStatus::Finish)
            .map_err(|_| invalid_transition(status, event)),
        (IndexStatus::Processing, IndexTransition::Fail) => processing()
            .fail()
            .map(|_| IndexStatus::Failed)
            .map_err(|_| invalid_transition(status, event)),
        _ => Err(invalid_transition(status, event)),
    }
}

/// Type-varying resource metadata, tagged by the resource type. Serialized
/// only at the storage boundary.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceMeta {
    Weblink {
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        title: Option<String>,
        #[serde(default)]
        storage_key: Option<String>,
    },
    Note {
        #[serde(default)]
        storage_key: Option<String>,
    },
}

impl ResourceMeta {
    pub fn storage_key(&self) -> Option<&str> {
        match self {
            ResourceMeta::Weblink { storage_key, .. } | ResourceMeta::Note { storage_key } => {
                storage_key.as_deref()
            }
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            ResourceMeta::Weblink { url, .. } => url.as_deref(),
            ResourceMeta::Note { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateResourceParams {
    pub resource_type: ResourceType,
    pub title: String,
    pub url: Option<String>,
    pub link_id: Option<String>,
    pub content: Option<String>,
    pub collection_id: Option<String>,
    pub is_public: Option<bool>,
    pub read_only: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ResourcePatch {
    pub title: Option<String>,
    pub is_public: Option<bool>,
    pub read_only: Option<bool>,
}

stored_object!(Resource, "resource", {
    user_id: String,
    resource_type: ResourceType,
    title: String,
    meta: ResourceMeta,
    storage_key: Option<String>,
    index_status: IndexStatus,
    is_public: bool,
    read_only: bool,
    word_count: Option<i64>,
    collection_ids: Vec<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<chrono::DateTime<chrono::Utc>>
});

impl Resource {
    /// Validate creation parameters and build the placeholder row. The row
    /// starts in `processing`; ingestion finalizes it out-of-band.
    pub fn new(params: &CreateResourceParams, user_id: &str) -> Result<Self, AppError> {
        if let Some(url) = params.url.as_deref() {
            url::Url::parse(url)
                .map_err(|_| AppError::Validation(format!("Invalid resource URL: {url}")))?;
        }

        let meta = match params.resource_type {
            ResourceType::Weblink => {
                if params.url.is_none() && params.link_id.is_none() {
                    return Err(AppError::Validation(
                        "A weblink resource requires either a url or a link_id".into(),
                    ));
                }
                ResourceMeta::Weblink {
                    url: params.url.clone(),
                    title: Some(params.title.clone()),
                    storage_key: None,
                }
            }
            ResourceType::Note => ResourceMeta::Note { storage_key: None },
        };

        // Weblink captures default to read-only, authored notes do not.
        let read_only = params.read_only.unwrap_or(matches!(
            params.resource_type,
            ResourceType::Weblink
        ));

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_string(),
            resource_type: params.resource_type,
            title: params.title.clone(),
            meta,
            storage_key: None,
            index_status: IndexStatus::Processing,
            is_public: params.is_public.unwrap_or(false),
            read_only,
            word_count: None,
            collection_ids: params.collection_id.iter().cloned().collect(),
            deleted_at: None,
        })
    }

    pub async fn create_and_store(
        params: &CreateResourceParams,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let resource = Self::new(params, user_id)?;
        db.store_item(resource.clone()).await?;
        Ok(resource)
    }

    /// The blob-store location for server-persisted content of a resource.
    pub fn storage_location(resource_id: &str) -> String {
        format!("resource/{resource_id}")
    }

    /// Canonical storage key: the dedicated column, falling back to the key
    /// embedded in `meta` for rows written before the column existed.
    pub fn canonical_storage_key(&self) -> Option<&str> {
        self.storage_key.as_deref().or_else(|| self.meta.storage_key())
    }

    pub async fn get_active(db: &SurrealDbClient, id: &str) -> Result<Resource, AppError> {
        let resource: Option<Resource> = db.get_item(id).await?;
        match resource {
            Some(resource) if resource.deleted_at.is_none() => Ok(resource),
            _ => Err(AppError::NotFound(format!("Resource {id} not found"))),
        }
    }

    /// Fetch for reading: the owner always may, anyone may when public.
    pub async fn get_readable(
        db: &SurrealDbClient,
        id: &str,
        user_id: &str,
    ) -> Result<Resource, AppError> {
        let resource = Self::get_active(db, id).await?;
        if resource.user_id != user_id && !resource.is_public {
            return Err(AppError::Auth(
                "You do not have access to this resource".into(),
            ));
        }
        Ok(resource)
    }

    /// Fetch for mutation: owner only.
    pub async fn get_owned(
        db: &SurrealDbClient,
        id: &str,
        user_id: &str,
    ) -> Result<Resource, AppError> {
        let resource = Self::get_active(db, id).await?;
        if resource.user_id != user_id {
            return Err(AppError::Auth("You do not own this resource".into()));
        }
        Ok(resource)
    }

    /// Paginated listing, newest updated first, soft-deleted rows excluded.
    pub async fn list_for_user(
        db: &SurrealDbClient,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Resource>, AppError> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let start = page.saturating_sub(1).saturating_mul(page_size);

        let resources: Vec<Resource> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id AND deleted_at = NONE
                 ORDER BY updated_at DESC
                 LIMIT $limit START $start",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .bind(("limit", page_size as i64))
            .bind(("start", start as i64))
            .await?
            .take(0)?;

        Ok(resources)
    }

    pub async fn update_details(
        db: &SurrealDbClient,
        id: &str,
        user_id: &str,
        patch: ResourcePatch,
    ) -> Result<Resource, AppError> {
        let mut resource = Self::get_owned(db, id, user_id).await?;

        if let Some(title) = patch.title {
            resource.title = title;
        }
        if let Some(is_public) = patch.is_public {
            resource.is_public = is_public;
        }
        if let Some(read_only) = patch.read_only {
            resource.read_only = read_only;
        }
        resource.updated_at = Utc::now();

        let updated: Option<Resource> = db
            .client
            .update((Self::table_name(), id))
            .content(resource)
            .await?;
        updated.ok_or_else(|| AppError::NotFound(format!("Resource {id} not found")))
    }

    pub async fn soft_delete(
        db: &SurrealDbClient,
        id: &str,
        user_id: &str,
    ) -> Result<(), AppError> {
        Self::get_owned(db, id, user_id).await?;

        let now = Utc::now();
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET deleted_at = $now, updated_at = $now
                 WHERE deleted_at = NONE",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        Ok(())
    }

    /// Terminal write of a successful ingestion run: storage key, word count,
    /// status and normalized meta land in one guarded update.
    pub async fn finalize_ingestion(
        db: &SurrealDbClient,
        id: &str,
        storage_key: &str,
        word_count: i64,
        meta: ResourceMeta,
    ) -> Result<Resource, AppError> {
        let next = compute_next_status(&IndexStatus::Processing, IndexTransition::Finish)?;
        debug_assert_eq!(next, IndexStatus::Finish);

        const FINALIZE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET index_status = $finish,
                storage_key = $storage_key,
                word_count = $word_count,
                meta = $meta,
                updated_at = $now
            WHERE index_status = $processing AND deleted_at = NONE
            RETURN *;
        "#;

        let now = Utc::now();
        let mut result = db
            .client
            .query(FINALIZE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("finish", IndexStatus::Finish.as_str()))
            .bind(("processing", IndexStatus::Processing.as_str()))
            .bind(("storage_key", storage_key.to_string()))
            .bind(("word_count", word_count))
            .bind(("meta", meta))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Resource> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&IndexStatus::Finish, IndexTransition::Finish))
    }

    /// Record an ingestion failure. Returns `None` when the row was not in
    /// `processing` (already terminal or deleted), which callers tolerate.
    pub async fn mark_index_failed(
        db: &SurrealDbClient,
        id: &str,
    ) -> Result<Option<Resource>, AppError> {
        let next = compute_next_status(&IndexStatus::Processing, IndexTransition::Fail)?;
        debug_assert_eq!(next, IndexStatus::Failed);

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET index_status = $failed,
                updated_at = $now
            WHERE index_status = $processing
            RETURN *;
        "#;

        let now = Utc::now();
        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("failed", IndexStatus::Failed.as_str()))
            .bind(("processing", IndexStatus::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        Ok(result.take(0)?)
    }

    /// Re-enter `processing` for a content replacement. Legal only because a
    /// fresh ingest task accompanies the reset.
    pub async fn reset_for_reingest(
        db: &SurrealDbClient,
        id: &str,
    ) -> Result<Resource, AppError> {
        const RESET_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET index_status = $processing,
                updated_at = $now
            WHERE deleted_at = NONE
            RETURN *;
        "#;

        let now = Utc::now();
        let mut result = db
            .client
            .query(RESET_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .bind(("processing", IndexStatus::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Resource> = result.take(0)?;
        updated.ok_or_else(|| AppError::NotFound(format!("Resource {id} not found")))
    }
}

/// Whitespace-delimited word count of the final document content.
pub fn count_words(content: &str) -> i64 {
    content.split_whitespace().count() as i64
}
