use chrono::{Months, NaiveTime, TimeZone};
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::subscription::{PlanQuotas, PlanType};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq, Hash)]
pub enum UsageTier {
    #[serde(rename = "t1")]
    T1,
    #[serde(rename = "t2")]
    T2,
}

impl UsageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageTier::T1 => "t1",
            UsageTier::T2 => "t2",
        }
    }

    /// The meter column holding this tier's used-counter.
    pub fn used_column(&self) -> &'static str {
        match self {
            UsageTier::T1 => "t1_token_used",
            UsageTier::T2 => "t2_token_used",
        }
    }
}

stored_object!(UsageMeter, "usage_meter", {
    user_id: String,
    subscription_id: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    start_at: chrono::DateTime<chrono::Utc>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    end_at: chrono::DateTime<chrono::Utc>,
    t1_token_quota: i64,
    t1_token_used: i64,
    t2_token_quota: i64,
    t2_token_used: i64,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    deleted_at: Option<chrono::DateTime<chrono::Utc>>
});

impl UsageMeter {
    /// Build a one-month meter window starting at `start_at`.
    pub fn new(
        user_id: &str,
        subscription_id: Option<String>,
        start_at: DateTime<Utc>,
        quotas: PlanQuotas,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            user_id: user_id.to_string(),
            subscription_id,
            start_at,
            end_at: advance_one_month(start_at),
            t1_token_quota: quotas.t1,
            t1_token_used: 0,
            t2_token_quota: quotas.t2,
            t2_token_used: 0,
            deleted_at: None,
        }
    }

    pub async fn create_and_store(
        db: &SurrealDbClient,
        user_id: &str,
        subscription_id: Option<String>,
        start_at: DateTime<Utc>,
        quotas: PlanQuotas,
    ) -> Result<UsageMeter, AppError> {
        let meter = Self::new(user_id, subscription_id, start_at, quotas);
        db.store_item(meter.clone()).await?;
        Ok(meter)
    }

    /// Window membership is half-open: `start_at <= at < end_at`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start_at <= at && at < self.end_at
    }

    /// A negative quota means unlimited.
    pub fn tier_available(&self, tier: UsageTier) -> bool {
        let (quota, used) = match tier {
            UsageTier::T1 => (self.t1_token_quota, self.t1_token_used),
            UsageTier::T2 => (self.t2_token_quota, self.t2_token_used),
        };
        quota < 0 || used < quota
    }

    pub fn available_tiers(&self) -> Vec<UsageTier> {
        [UsageTier::T1, UsageTier::T2]
            .into_iter()
            .filter(|tier| self.tier_available(*tier))
            .collect()
    }

    pub async fn find_active(
        db: &SurrealDbClient,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<UsageMeter>, AppError> {
        let meter: Option<UsageMeter> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                   AND deleted_at = NONE
                   AND start_at <= $at
                   AND end_at > $at
                 ORDER BY start_at DESC
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .bind(("at", SurrealDatetime::from(at)))
            .await?
            .take(0)?;

        Ok(meter)
    }

    async fn find_latest(
        db: &SurrealDbClient,
        user_id: &str,
    ) -> Result<Option<UsageMeter>, AppError> {
        let meter: Option<UsageMeter> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                 ORDER BY end_at DESC
                 LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(meter)
    }

    /// Return the active meter, lazily creating a free-plan one when none
    /// covers `now`. The new window resumes from the most recent meter's
    /// end, or starts at the beginning of the current day for first-time
    /// users, and is advanced month by month until it covers `now`.
    pub async fn ensure_active(
        db: &SurrealDbClient,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UsageMeter, AppError> {
        if let Some(meter) = Self::find_active(db, user_id, now).await? {
            return Ok(meter);
        }

        let mut start_at = match Self::find_latest(db, user_id).await? {
            Some(latest) if latest.end_at <= now => latest.end_at,
            _ => start_of_day(now),
        };
        while advance_one_month(start_at) <= now {
            start_at = advance_one_month(start_at);
        }

        tracing::info!(user_id, %start_at, "no active usage meter, creating free-plan meter");
        Self::create_and_store(db, user_id, None, start_at, PlanType::Free.quotas()).await
    }

    /// Supersede every live meter tied to a subscription.
    pub async fn soft_delete_for_subscription(
        db: &SurrealDbClient,
        subscription_id: &str,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::table($table)
                 SET deleted_at = $now, updated_at = $now
                 WHERE subscription_id = $subscription_id AND deleted_at = NONE",
            )
            .bind(("table", Self::table_name()))
            .bind(("subscription_id", subscription_id.to_string()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    /// Supersede a user's live meters, used when a paid plan replaces the
    /// free one so at most one meter stays active.
    pub async fn soft_delete_active_for_user(
        db: &SurrealDbClient,
        user_id: &str,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::table($table)
                 SET deleted_at = $now, updated_at = $now
                 WHERE user_id = $user_id AND deleted_at = NONE",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;
        Ok(())
    }
}

fn advance_one_month(at: DateTime<Utc>) -> DateTime<Utc> {
    at.checked_add_months(Months::new(1))
        .unwrap_or(at + chrono::Duration::days(30))
}

fn start_of_day(at: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = at.date_naive().and_time(NaiveTime::MIN);
    Utc.from_utc_datetime(&midnight)
}
