use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::{usage_meter::UsageMeter, user::User};

#[derive(Debug, Clone, Copy)]
pub struct PlanQuotas {
    pub t1: i64,
    pub t2: i64,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    #[default]
    Free,
    Pro,
    Max,
}

impl PlanType {
    /// Monthly token quotas per tier. Negative means unlimited.
    pub fn quotas(&self) -> PlanQuotas {
        match self {
            PlanType::Free => PlanQuotas {
                t1: 500_000,
                t2: 1_000_000,
            },
            PlanType::Pro => PlanQuotas {
                t1: 5_000_000,
                t2: 20_000_000,
            },
            PlanType::Max => PlanQuotas { t1: -1, t2: -1 },
        }
    }
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionInterval {
    #[default]
    Month,
    Year,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Incomplete,
    #[default]
    #[serde(other)]
    Unknown,
}

impl SubscriptionStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, SubscriptionStatus::Active)
    }

    pub fn from_provider(status: &str) -> Self {
        match status {
            "active" => SubscriptionStatus::Active,
            "past_due" => SubscriptionStatus::PastDue,
            "canceled" => SubscriptionStatus::Canceled,
            "incomplete" => SubscriptionStatus::Incomplete,
            _ => SubscriptionStatus::Unknown,
        }
    }
}

// The row id is the provider's subscription id, so webhook events address
// the record directly.
stored_object!(Subscription, "subscription", {
    user_id: String,
    plan_type: PlanType,
    interval: SubscriptionInterval,
    status: SubscriptionStatus
});

impl Subscription {
    /// Record a newly confirmed subscription: upsert the row, point the user
    /// at it, retire the user's free meter and open a paid one.
    pub async fn activate(
        db: &SurrealDbClient,
        subscription_id: &str,
        user_id: &str,
        plan_type: PlanType,
        interval: SubscriptionInterval,
    ) -> Result<Subscription, AppError> {
        let now = Utc::now();
        let subscription = Subscription {
            id: subscription_id.to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_string(),
            plan_type,
            interval,
            status: SubscriptionStatus::Active,
        };

        let _: Option<Subscription> = db
            .client
            .upsert((Self::table_name(), subscription_id))
            .content(subscription.clone())
            .await?;

        User::set_subscription(db, user_id, Some(subscription_id.to_string())).await?;

        UsageMeter::soft_delete_active_for_user(db, user_id).await?;
        UsageMeter::create_and_store(
            db,
            user_id,
            Some(subscription_id.to_string()),
            now,
            plan_type.quotas(),
        )
        .await?;

        Ok(subscription)
    }

    /// Apply a provider-reported status change. Leaving `active` clears the
    /// user's subscription pointer, retires the paid meter and opens a fresh
    /// free one; re-entering `active` only happens through a new checkout.
    pub async fn handle_status_change(
        db: &SurrealDbClient,
        subscription_id: &str,
        status: SubscriptionStatus,
    ) -> Result<(), AppError> {
        let existing: Option<Subscription> = db.get_item(subscription_id).await?;
        let Some(mut subscription) = existing else {
            tracing::warn!(subscription_id, "status change for unknown subscription, dropping");
            return Ok(());
        };

        if subscription.status == status {
            return Ok(());
        }

        subscription.status = status;
        subscription.updated_at = Utc::now();
        let _: Option<Subscription> = db
            .client
            .update((Self::table_name(), subscription_id))
            .content(subscription.clone())
            .await?;

        if !status.is_active() {
            tracing::info!(
                subscription_id,
                user_id = %subscription.user_id,
                status = ?status,
                "subscription left active state, reverting user to free plan"
            );
            User::set_subscription(db, &subscription.user_id, None).await?;
            UsageMeter::soft_delete_for_subscription(db, subscription_id).await?;
            UsageMeter::create_and_store(
                db,
                &subscription.user_id,
                None,
                Utc::now(),
                PlanType::Free.quotas(),
            )
            .await?;
        }

        Ok(())
    }
}
