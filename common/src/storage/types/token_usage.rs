use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::usage_meter::{UsageMeter, UsageTier};

/// A single unit of paid work to account for.
#[derive(Debug, Clone)]
pub struct UsageReport {
    pub user_id: String,
    pub tier: UsageTier,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub model: Option<String>,
    pub occurred_at: chrono::DateTime<chrono::Utc>,
}

impl UsageReport {
    pub fn total_tokens(&self) -> i64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

stored_object!(TokenUsage, "token_usage", {
    user_id: String,
    tier: UsageTier,
    input_tokens: i64,
    output_tokens: i64,
    model: Option<String>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    occurred_at: chrono::DateTime<chrono::Utc>
});

impl TokenUsage {
    /// Record a usage line item and bump the owning meter in one
    /// transaction. The meter increment is a server-side `+=` guarded by the
    /// window predicate, so concurrent reports never under-count. When no
    /// live meter window contains the timestamp the increment matches zero
    /// rows; the line item is still written and the gap is logged.
    pub async fn report(db: &SurrealDbClient, report: &UsageReport) -> Result<(), AppError> {
        let usage_id = Uuid::new_v4().to_string();
        let now = chrono::Utc::now();

        let query = format!(
            r#"
            BEGIN TRANSACTION;
            CREATE type::thing($usage_table, $usage_id) SET
                user_id = $user_id,
                tier = $tier,
                input_tokens = $input_tokens,
                output_tokens = $output_tokens,
                model = $model,
                occurred_at = $at,
                created_at = $now,
                updated_at = $now;
            UPDATE type::table($meter_table)
                SET {used_column} += $total,
                    updated_at = $now
                WHERE user_id = $user_id
                  AND deleted_at = NONE
                  AND start_at <= $at
                  AND end_at > $at
                RETURN *;
            COMMIT TRANSACTION;
            "#,
            used_column = report.tier.used_column()
        );

        let mut result = db
            .client
            .query(query)
            .bind(("usage_table", Self::table_name()))
            .bind(("meter_table", UsageMeter::table_name()))
            .bind(("usage_id", usage_id))
            .bind(("user_id", report.user_id.clone()))
            .bind(("tier", report.tier.as_str()))
            .bind(("input_tokens", report.input_tokens))
            .bind(("output_tokens", report.output_tokens))
            .bind(("model", report.model.clone()))
            .bind(("total", report.total_tokens()))
            .bind(("at", SurrealDatetime::from(report.occurred_at)))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let touched: Vec<UsageMeter> = result.take(1)?;
        if touched.is_empty() {
            tracing::warn!(
                user_id = %report.user_id,
                tier = report.tier.as_str(),
                occurred_at = %report.occurred_at,
                "usage report outside any active meter window, counters unchanged"
            );
        }

        Ok(())
    }

    pub async fn list_for_user(
        db: &SurrealDbClient,
        user_id: &str,
    ) -> Result<Vec<TokenUsage>, AppError> {
        let records: Vec<TokenUsage> = db
            .client
            .query(
                "SELECT * FROM type::table($table)
                 WHERE user_id = $user_id
                 ORDER BY occurred_at DESC",
            )
            .bind(("table", Self::table_name()))
            .bind(("user_id", user_id.to_string()))
            .await?
            .take(0)?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::subscription::PlanQuotas;

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb")
    }

    fn report_at(at: chrono::DateTime<chrono::Utc>) -> UsageReport {
        UsageReport {
            user_id: "user123".to_string(),
            tier: UsageTier::T2,
            input_tokens: 100,
            output_tokens: 50,
            model: Some("gpt-4o-mini".to_string()),
            occurred_at: at,
        }
    }

    #[tokio::test]
    async fn test_report_increments_meter_and_appends_record() {
        let db = memory_db().await;
        let now = chrono::Utc::now();
        let meter =
            UsageMeter::create_and_store(&db, "user123", None, now, PlanQuotas { t1: 10, t2: 1000 })
                .await
                .expect("meter");

        TokenUsage::report(&db, &report_at(now)).await.expect("report");

        let updated: UsageMeter = db.get_item(&meter.id).await.expect("get").expect("meter");
        assert_eq!(updated.t2_token_used, 150);
        assert_eq!(updated.t1_token_used, 0);

        let records = TokenUsage::list_for_user(&db, "user123").await.expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].input_tokens, 100);
        assert_eq!(records[0].output_tokens, 50);
        assert_eq!(records[0].tier, UsageTier::T2);
    }

    #[tokio::test]
    async fn test_quota_boundary() {
        let db = memory_db().await;
        let now = chrono::Utc::now();
        let meter =
            UsageMeter::create_and_store(&db, "user123", None, now, PlanQuotas { t1: 1, t2: 0 })
                .await
                .expect("meter");
        assert!(meter.tier_available(UsageTier::T1));

        let report = UsageReport {
            tier: UsageTier::T1,
            input_tokens: 1,
            output_tokens: 0,
            ..report_at(now)
        };
        TokenUsage::report(&db, &report).await.expect("report");

        let updated: UsageMeter = db.get_item(&meter.id).await.expect("get").expect("meter");
        assert!(!updated.tier_available(UsageTier::T1));
    }

    #[tokio::test]
    async fn test_report_outside_window_keeps_record_and_counters() {
        let db = memory_db().await;
        let now = chrono::Utc::now();
        let meter =
            UsageMeter::create_and_store(&db, "user123", None, now, PlanQuotas { t1: 10, t2: 10 })
                .await
                .expect("meter");

        let stale = report_at(now - chrono::Duration::days(90));
        TokenUsage::report(&db, &stale).await.expect("report");

        let updated: UsageMeter = db.get_item(&meter.id).await.expect("get").expect("meter");
        assert_eq!(updated.t2_token_used, 0);

        // The line item itself is still persisted.
        let records = TokenUsage::list_for_user(&db, "user123").await.expect("list");
        assert_eq!(records.len(), 1);
    }
}
