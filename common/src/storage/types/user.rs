use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(User, "user", {
    email: String,
    api_key: String,
    subscription_id: Option<String>,
    customer_id: Option<String>
});

impl User {
    pub fn new(email: &str) -> Result<Self, AppError> {
        let email = email.trim().to_lowercase();
        if !email.contains('@') {
            return Err(AppError::Validation(format!("Invalid email: {email}")));
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            email,
            api_key: Uuid::new_v4().to_string(),
            subscription_id: None,
            customer_id: None,
        })
    }

    pub async fn find_by_api_key(
        db: &SurrealDbClient,
        api_key: &str,
    ) -> Result<Option<User>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE api_key = $api_key LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("api_key", api_key.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    /// Look up the account a payment provider event belongs to by its
    /// customer id.
    pub async fn find_by_customer_id(
        db: &SurrealDbClient,
        customer_id: &str,
    ) -> Result<Option<User>, AppError> {
        let user: Option<User> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE customer_id = $customer_id LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("customer_id", customer_id.to_string()))
            .await?
            .take(0)?;

        Ok(user)
    }

    pub async fn set_customer_id(
        db: &SurrealDbClient,
        user_id: &str,
        customer_id: &str,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET customer_id = $customer_id, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", user_id.to_string()))
            .bind(("customer_id", customer_id.to_string()))
            .await?;
        Ok(())
    }

    pub async fn set_subscription(
        db: &SurrealDbClient,
        user_id: &str,
        subscription_id: Option<String>,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET subscription_id = $subscription_id, updated_at = time::now()",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", user_id.to_string()))
            .bind(("subscription_id", subscription_id))
            .await?;
        Ok(())
    }
}
