use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::resource::{Resource, MAX_PAGE_SIZE};

stored_object!(Collection, "collection", {
    user_id: String,
    title: String,
    description: Option<String>,
    is_public: bool,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<chrono::DateTime<chrono::Utc>>
});

impl Collection {
    pub fn new(
        title: &str,
        description: Option<String>,
        is_public: bool,
        user_id: &str,
    ) -> Result<Self, AppError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Collection title cannot be empty".into()));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_string(),
            title: title.to_string(),
            description,
            is_public,
            deleted_at: None,
        })
    }

    pub async fn create_and_store(
        title: &str,
        description: Option<String>,
        is_public: bool,
        user_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let collection = Self::new(title, description, is_public, user_id)?;
        db.store_item(collection.clone()).await?;
        Ok(collection)
    }

    pub async fn get_active(db: &SurrealDbClient, id: &str) -> Result<Collection, AppError> {
        let collection: Option<Collection> = db.get_item(id).await?;
        match collection {
            Some(collection) if collection.deleted_at.is_none() => Ok(collection),
            _ => Err(AppError::NotFound(format!("Collection {id} not found"))),
        }
    }

    /// Fetch for reading: the owner always may, anyone may when public.
    pub async fn get_readable(
        db: &SurrealDbClient,
        id: &str,
        user_id: &str,
    ) -> Result<Collection, AppError> {
        let collection = Self::get_active(db, id).await?;
        if collection.user_id != user_id && !collection.is_public {
            return Err(AppError::Auth("You do not have access to this collection".into()));
        }
        Ok(collection)
    }

    pub async fn get_owned(
        db: &SurrealDbClient,
        id: &str,
        user_id: &str,
    ) -> Result<Collection, AppError> {
        let collection = Self::get_active(db, id).await?;
        if collection.user_id != user_id {
            return Err(AppError::Auth("You do not own this collection".into()));
        }
        Ok(collection)
    }

    /// Paginated listing, newest updated first, soft-deleted rows excluded.
    pub async fn list_for_user(
        db: &SurrealDbClient,
        user_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Collection>, AppError> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let start = page.saturating_sub(1).saturating_mul(page_size);

        let collections: Vec<Collection> = db
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

        Ok(collections)
    }

    pub async fn update_details(
        db: &SurrealDbClient,
        id: &str,
        user_id: &str,
        title: Option<String>,
        description: Option<String>,
        is_public: Option<bool>,
    ) -> Result<Collection, AppError> {
        let mut collection = Self::get_owned(db, id, user_id).await?;

        if let Some(title) = title {
            let title = title.trim().to_string();
            if title.is_empty() {
                return Err(AppError::Validation("Collection title cannot be empty".into()));
            }
            collection.title = title;
        }
        if let Some(description) = description {
            collection.description = Some(description);
        }
        if let Some(is_public) = is_public {
            collection.is_public = is_public;
        }
        collection.updated_at = Utc::now();

        let updated: Option<Collection> = db
            .client
            .update((Self::table_name(), id))
            .content(collection)
            .await?;
        updated.ok_or_else(|| AppError::NotFound(format!("Collection {id} not found")))
    }

    /// Soft delete. Member resources are untouched; their lifecycle is
    /// independent of the grouping.
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

    pub async fn list_resources(
        db: &SurrealDbClient,
        id: &str,
        user_id: &str,
    ) -> Result<Vec<Resource>, AppError> {
        Self::get_readable(db, id, user_id).await?;

        let resources: Vec<Resource> = db
            .client
            .query(
                "SELECT * FROM type::table($resource_table)
                 WHERE $collection_id IN collection_ids AND deleted_at = NONE
                 ORDER BY updated_at DESC",
            )
            .bind(("resource_table", Resource::table_name()))
            .bind(("collection_id", id.to_string()))
            .await?
            .take(0)?;

        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::resource::{CreateResourceParams, ResourceType};

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb")
    }

    #[test]
    fn test_empty_title_rejected() {
        assert!(matches!(
            Collection::new("   ", None, false, "user123"),
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_crud_and_ownership() {
        let db = memory_db().await;
        let created = Collection::create_and_store("Research", None, false, "owner", &db)
            .await
            .expect("create");

        assert!(matches!(
            Collection::get_readable(&db, &created.id, "intruder").await,
            Err(AppError::Auth(_))
        ));

        let updated = Collection::update_details(
            &db,
            &created.id,
            "owner",
            Some("Research notes".to_string()),
            Some("Papers to read".to_string()),
            Some(true),
        )
        .await
        .expect("update");
        assert_eq!(updated.title, "Research notes");
        assert_eq!(updated.description.as_deref(), Some("Papers to read"));

        // Public collections are readable by anyone.
        let readable = Collection::get_readable(&db, &created.id, "intruder")
            .await
            .expect("public read");
        assert!(readable.is_public);

        let listed = Collection::list_for_user(&db, "owner", 1, 10)
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);

        Collection::soft_delete(&db, &created.id, "owner")
            .await
            .expect("delete");
        assert!(Collection::list_for_user(&db, "owner", 1, 10)
            .await
            .expect("list after delete")
            .is_empty());
        assert!(matches!(
            Collection::get_active(&db, &created.id).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_soft_delete_leaves_resources_alone() {
        let db = memory_db().await;
        let collection = Collection::create_and_store("Reading list", None, false, "owner", &db)
            .await
            .expect("create collection");

        let params = CreateResourceParams {
            resource_type: ResourceType::Note,
            title: "Member note".to_string(),
            url: None,
            link_id: None,
            content: Some("body".to_string()),
            collection_id: Some(collection.id.clone()),
            is_public: None,
            read_only: None,
        };
        let resource = Resource::create_and_store(&params, "owner", &db)
            .await
            .expect("create resource");
        assert_eq!(resource.collection_ids, vec![collection.id.clone()]);

        Collection::soft_delete(&db, &collection.id, "owner")
            .await
            .expect("delete collection");

        let survivor = Resource::get_active(&db, &resource.id)
            .await
            .expect("resource survives");
        assert_eq!(survivor.collection_ids, vec![collection.id.clone()]);
    }
}
