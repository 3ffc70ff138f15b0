use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Link, "link", {
    user_id: String,
    url: String,
    title: Option<String>,
    parsed_storage_key: Option<String>
});

impl Link {
    /// A record of a previously crawled page. When present,
    /// `parsed_storage_key` points at already-cleaned content in blob
    /// storage, letting ingestion skip the crawl entirely.
    pub fn new(
        url: &str,
        title: Option<String>,
        parsed_storage_key: Option<String>,
        user_id: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_string(),
            url: url.to_string(),
            title,
            parsed_storage_key,
        }
    }

    pub async fn get_for_user(
        db: &SurrealDbClient,
        id: &str,
        user_id: &str,
    ) -> Result<Link, AppError> {
        let link: Option<Link> = db.get_item(id).await?;
        match link {
            Some(link) if link.user_id == user_id => Ok(link),
            Some(_) => Err(AppError::Auth("You do not own this link".into())),
            None => Err(AppError::NotFound(format!("Link {id} not found"))),
        }
    }
}
