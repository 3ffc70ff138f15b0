use std::time::Duration;

use chrono::Duration as ChronoDuration;
use state_machines::state_machine;
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

pub const MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_LEASE_SECS: i64 = 300;

/// Per-job resolution parameters. At most one content source is set; the
/// worker resolves them in a fixed order.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct IngestParams {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub link_id: Option<String>,
    #[serde(default)]
    pub inline_content: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub collection_id: Option<String>,
}

/// The unit of work carried by an ingest task: which resource to process,
/// for whom, and where its content comes from.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct IngestJob {
    pub resource_id: String,
    pub user_id: String,
    pub params: IngestParams,
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub enum TaskState {
    #[serde(rename = "Pending")]
    #[default]
    Pending,
    #[serde(rename = "Reserved")]
    Reserved,
    #[serde(rename = "Processing")]
    Processing,
    #[serde(rename = "Succeeded")]
    Succeeded,
    #[serde(rename = "Failed")]
    Failed,
    #[serde(rename = "Cancelled")]
    Cancelled,
    #[serde(rename = "DeadLetter")]
    DeadLetter,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Reserved => "Reserved",
            TaskState::Processing => "Processing",
            TaskState::Succeeded => "Succeeded",
            TaskState::Failed => "Failed",
            TaskState::Cancelled => "Cancelled",
            TaskState::DeadLetter => "DeadLetter",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Cancelled | TaskState::DeadLetter
        )
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq, Default)]
pub struct TaskErrorInfo {
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
enum TaskTransition {
    Reserve,
    StartProcessing,
    Succeed,
    Fail,
    Cancel,
    DeadLetter,
    Release,
}

impl TaskTransition {
    fn as_str(&self) -> &'static str {
        match self {
            TaskTransition::Reserve => "reserve",
            TaskTransition::StartProcessing => "start_processing",
            TaskTransition::Succeed => "succeed",
            TaskTransition::Fail => "fail",
            TaskTransition::Cancel => "cancel",
            TaskTransition::DeadLetter => "deadletter",
            TaskTransition::Release => "release",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: TaskLifecycleMachine,
        initial: Pending,
        states: [Pending, Reserved, Processing, Succeeded, Failed, Cancelled, DeadLetter],
        events {
            reserve {
                transition: { from: Pending, to: Reserved }
                transition: { from: Failed, to: Reserved }
            }
            start_processing {
                transition: { from: Reserved, to: Processing }
            }
            succeed {
                transition: { from: Processing, to: Succeeded }
            }
            fail {
                transition: { from: Processing, to: Failed }
            }
            cancel {
                transition: { from: Pending, to: Cancelled }
                transition: { from: Reserved, to: Cancelled }
                transition: { from: Processing, to: Cancelled }
                transition: { from: Failed, to: Cancelled }
            }
            deadletter {
                transition: { from: Failed, to: DeadLetter }
            }
            release {
                transition: { from: Reserved, to: Pending }
            }
        }
    }

    pub(super) fn pending() -> TaskLifecycleMachine<(), Pending> {
        TaskLifecycleMachine::new(())
    }

    pub(super) fn reserved() -> TaskLifecycleMachine<(), Reserved> {
        pending()
            .reserve()
            .expect("reserve transition from Pending should exist")
    }

    pub(super) fn processing() -> TaskLifecycleMachine<(), Processing> {
        reserved()
            .start_processing()
            .expect("start_processing transition from Reserved should exist")
    }

    pub(super) fn failed() -> TaskLifecycleMachine<(), Failed> {
        processing()
            .fail()
            .expect("fail transition from Processing should exist")
    }
}

fn invalid_transition(state: &TaskState, event: TaskTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid task transition: {} -> {}",
        state.as_str(),
        event.as_str()
    ))
}

fn compute_next_state(state: &TaskState, event: TaskTransition) -> Result<TaskState, AppError> {
    use lifecycle::*;
    match (state, event) {
        (TaskState::Pending, TaskTransition::Reserve) => pending()
            .reserve()
            .map(|_| TaskState::Reserved)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Failed, TaskTransition::Reserve) => failed()
            .reserve()
            .map(|_| TaskState::Reserved)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Reserved, TaskTransition::StartProcessing) => reserved()
            .start_processing()
            .map(|_| TaskState::Processing)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Processing, TaskTransition::Succeed) => processing()
            .succeed()
            .map(|_| TaskState::Succeeded)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Processing, TaskTransition::Fail) => processing()
            .fail()
            .map(|_| TaskState::Failed)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Pending, TaskTransition::Cancel) => pending()
            .cancel()
            .map(|_| TaskState::Cancelled)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Reserved, TaskTransition::Cancel) => reserved()
            .cancel()
            .map(|_| TaskState::Cancelled)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Processing, TaskTransition::Cancel) => processing()
            .cancel()
            .map(|_| TaskState::Cancelled)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Failed, TaskTransition::Cancel) => failed()
            .cancel()
            .map(|_| TaskState::Cancelled)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Failed, TaskTransition::DeadLetter) => failed()
            .deadletter()
            .map(|_| TaskState::DeadLetter)
            .map_err(|_| invalid_transition(state, event)),
        (TaskState::Reserved, TaskTransition::Release) => reserved()
            .release()
            .map(|_| TaskState::Pending)
            .map_err(|_| invalid_transition(state, event)),
        _ => Err(invalid_transition(state, event)),
    }
}

stored_object!(IngestTask, "ingest_task", {
    job: IngestJob,
    state: TaskState,
    user_id: String,
    attempts: u32,
    max_attempts: u32,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    scheduled_at: chrono::DateTime<chrono::Utc>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    locked_at: Option<chrono::DateTime<chrono::Utc>>,
    lease_duration_secs: i64,
    worker_id: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    last_error_at: Option<chrono::DateTime<chrono::Utc>>
});

impl IngestTask {
    pub fn new(job: IngestJob) -> Self {
        let now = chrono::Utc::now();
        let user_id = job.user_id.clone();

        Self {
            id: Uuid::new_v4().to_string(),
            job,
            state: TaskState::Pending,
            user_id,
            attempts: 0,
            max_attempts: MAX_ATTEMPTS,
            scheduled_at: now,
            locked_at: None,
            lease_duration_secs: DEFAULT_LEASE_SECS,
            worker_id: None,
            error_code: None,
            error_message: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn lease_duration(&self) -> Duration {
        Duration::from_secs(self.lease_duration_secs.max(0) as u64)
    }

    pub async fn enqueue(job: IngestJob, db: &SurrealDbClient) -> Result<IngestTask, AppError> {
        let task = Self::new(job);
        db.store_item(task.clone()).await?;
        Ok(task)
    }

    /// Atomically reserve the next ready task for a worker. Candidates are
    /// fresh, retryable or lease-expired rows; rows whose lease expired while
    /// Reserved/Processing are re-claimed without burning another attempt.
    pub async fn claim_next_ready(
        db: &SurrealDbClient,
        worker_id: &str,
        now: chrono::DateTime<chrono::Utc>,
        lease_duration: Duration,
    ) -> Result<Option<IngestTask>, AppError> {
        debug_assert!(compute_next_state(&TaskState::Pending, TaskTransition::Reserve).is_ok());
        debug_assert!(compute_next_state(&TaskState::Failed, TaskTransition::Reserve).is_ok());

        // SET clauses apply in order; attempts must be computed while state
        // still holds the pre-claim value.
        const CLAIM_QUERY: &str = r#"
            UPDATE (
                SELECT * FROM type::table($table)
                WHERE state IN $candidate_states
                  AND scheduled_at <= $now
                  AND (
                        attempts < max_attempts
                        OR state IN $sticky_states
                  )
                  AND (
                        locked_at = NONE
                        OR time::unix($now) - time::unix(locked_at) >= lease_duration_secs
                  )
                ORDER BY scheduled_at ASC, created_at ASC
                LIMIT 1
            )
            SET attempts = if state IN $increment_states THEN
                    if attempts + 1 > max_attempts THEN max_attempts ELSE attempts + 1 END
                ELSE
                    attempts
                END,
                state = $reserved_state,
                locked_at = $now,
                worker_id = $worker_id,
                lease_duration_secs = $lease_secs,
                updated_at = $now
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(CLAIM_QUERY)
            .bind(("table", Self::table_name()))
            .bind((
                "candidate_states",
                vec![
                    TaskState::Pending.as_str(),
                    TaskState::Failed.as_str(),
                    TaskState::Reserved.as_str(),
                    TaskState::Processing.as_str(),
                ],
            ))
            .bind((
                "sticky_states",
                vec![TaskState::Reserved.as_str(), TaskState::Processing.as_str()],
            ))
            .bind((
                "increment_states",
                vec![TaskState::Pending.as_str(), TaskState::Failed.as_str()],
            ))
            .bind(("reserved_state", TaskState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_secs", lease_duration.as_secs() as i64))
            .await?;

        let task: Option<IngestTask> = result.take(0)?;
        Ok(task)
    }

    pub async fn mark_processing(&self, db: &SurrealDbClient) -> Result<IngestTask, AppError> {
        let next = compute_next_state(&self.state, TaskTransition::StartProcessing)?;
        debug_assert_eq!(next, TaskState::Processing);

        const START_PROCESSING_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $processing,
                updated_at = $now,
                locked_at = $now
            WHERE state = $reserved AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(START_PROCESSING_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("reserved", TaskState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::StartProcessing))
    }

    pub async fn mark_succeeded(&self, db: &SurrealDbClient) -> Result<IngestTask, AppError> {
        let next = compute_next_state(&self.state, TaskTransition::Succeed)?;
        debug_assert_eq!(next, TaskState::Succeeded);

        const COMPLETE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $succeeded,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $now,
                error_code = NONE,
                error_message = NONE,
                last_error_at = NONE
            WHERE state = $processing AND worker_id = $worker_id
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(COMPLETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("succeeded", TaskState::Succeeded.as_str()))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::Succeed))
    }

    pub async fn mark_failed(
        &self,
        error: TaskErrorInfo,
        retry_delay: Duration,
        db: &SurrealDbClient,
    ) -> Result<IngestTask, AppError> {
        let next = compute_next_state(&self.state, TaskTransition::Fail)?;
        debug_assert_eq!(next, TaskState::Failed);

        let now = chrono::Utc::now();
        let retry_at = now
            + ChronoDuration::from_std(retry_delay).unwrap_or_else(|_| ChronoDuration::seconds(30));

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $failed,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $retry_at,
                error_code = $error_code,
                error_message = $error_message,
                last_error_at = $now
            WHERE state = $processing AND worker_id = $worker_id
            RETURN *;
        "#;

        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", TaskState::Failed.as_str()))
            .bind(("processing", TaskState::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("retry_at", SurrealDatetime::from(retry_at)))
            .bind(("error_code", error.code.clone()))
            .bind(("error_message", error.message.clone()))
            .bind(("worker_id", self.worker_id.clone().unwrap_or_default()))
            .await?;

        let updated: Option<IngestTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::Fail))
    }

    pub async fn mark_dead_letter(
        &self,
        error: TaskErrorInfo,
        db: &SurrealDbClient,
    ) -> Result<IngestTask, AppError> {
        let next = compute_next_state(&self.state, TaskTransition::DeadLetter)?;
        debug_assert_eq!(next, TaskState::DeadLetter);

        const DEAD_LETTER_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $dead,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE,
                scheduled_at = $now,
                error_code = $error_code,
                error_message = $error_message,
                last_error_at = $now
            WHERE state = $failed
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(DEAD_LETTER_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("dead", TaskState::DeadLetter.as_str()))
            .bind(("failed", TaskState::Failed.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .bind(("error_code", error.code.clone()))
            .bind(("error_message", error.message.clone()))
            .await?;

        let updated: Option<IngestTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::DeadLetter))
    }

    pub async fn mark_cancelled(&self, db: &SurrealDbClient) -> Result<IngestTask, AppError> {
        compute_next_state(&self.state, TaskTransition::Cancel)?;

        const CANCEL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $cancelled,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE
            WHERE state IN $allow_states
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(CANCEL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("cancelled", TaskState::Cancelled.as_str()))
            .bind((
                "allow_states",
                vec![
                    TaskState::Pending.as_str(),
                    TaskState::Reserved.as_str(),
                    TaskState::Processing.as_str(),
                    TaskState::Failed.as_str(),
                ],
            ))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<IngestTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::Cancel))
    }

    /// Give a reserved task back to the queue without consuming its attempt
    /// budget beyond the claim that already happened.
    pub async fn release(&self, db: &SurrealDbClient) -> Result<IngestTask, AppError> {
        compute_next_state(&self.state, TaskTransition::Release)?;

        const RELEASE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET state = $pending,
                updated_at = $now,
                locked_at = NONE,
                worker_id = NONE
            WHERE state = $reserved
            RETURN *;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(RELEASE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("pending", TaskState::Pending.as_str()))
            .bind(("reserved", TaskState::Reserved.as_str()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<IngestTask> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(&self.state, TaskTransition::Release))
    }

    /// All non-terminal tasks for a resource, used when a resource is
    /// deleted while ingestion is still queued.
    pub async fn get_active_for_resource(
        db: &SurrealDbClient,
        resource_id: &str,
    ) -> Result<Vec<IngestTask>, AppError> {
        let tasks: Vec<IngestTask> = db
            .query(
                "SELECT * FROM type::table($table)
                 WHERE job.resource_id = $resource_id AND state IN $active_states
                 ORDER BY scheduled_at ASC, created_at ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("resource_id", resource_id.to_string()))
            .bind((
                "active_states",
                vec![
                    TaskState::Pending.as_str(),
                    TaskState::Reserved.as_str(),
                    TaskState::Processing.as_str(),
                    TaskState::Failed.as_str(),
                ],
            ))
            .await?
            .take(0)?;

        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_job(resource_id: &str, user_id: &str) -> IngestJob {
        IngestJob {
            resource_id: resource_id.to_string(),
            user_id: user_id.to_string(),
            params: IngestParams {
                inline_content: Some("Test content".to_string()),
                ..IngestParams::default()
            },
        }
    }

    async fn memory_db() -> SurrealDbClient {
        let namespace = "test_ns";
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory(namespace, &database)
            .await
            .expect("in-memory surrealdb")
    }

    #[test]
    fn test_new_task_defaults() {
        let job = create_job("res-1", "user123");
        let task = IngestTask::new(job.clone());

        assert_eq!(task.user_id, "user123");
        assert_eq!(task.job, job);
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.attempts, 0);
        assert_eq!(task.max_attempts, MAX_ATTEMPTS);
        assert!(task.locked_at.is_none());
        assert!(task.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_enqueue_and_fetch() {
        let db = memory_db().await;
        let created = IngestTask::enqueue(create_job("res-1", "user123"), &db)
            .await
            .expect("store");

        let stored: Option<IngestTask> =
            db.get_item::<IngestTask>(&created.id).await.expect("fetch");

        let stored = stored.expect("task exists");
        assert_eq!(stored.id, created.id);
        assert_eq!(stored.state, TaskState::Pending);
        assert_eq!(stored.attempts, 0);
        assert_eq!(stored.job.resource_id, "res-1");
    }

    #[tokio::test]
    async fn test_claim_and_transition() {
        let db = memory_db().await;
        IngestTask::enqueue(create_job("res-1", "user123"), &db)
            .await
            .expect("store");

        let worker_id = "worker-1";
        let now = chrono::Utc::now();
        let claimed = IngestTask::claim_next_ready(&db, worker_id, now, Duration::from_secs(60))
            .await
            .expect("claim");

        let claimed = claimed.expect("task claimed");
        assert_eq!(claimed.state, TaskState::Reserved);
        assert_eq!(claimed.worker_id.as_deref(), Some(worker_id));
        assert_eq!(claimed.attempts, 1);

        let processing = claimed.mark_processing(&db).await.expect("processing");
        assert_eq!(processing.state, TaskState::Processing);

        let succeeded = processing.mark_succeeded(&db).await.expect("succeeded");
        assert_eq!(succeeded.state, TaskState::Succeeded);
        assert!(succeeded.worker_id.is_none());
        assert!(succeeded.locked_at.is_none());

        // Queue is drained.
        let empty = IngestTask::claim_next_ready(&db, worker_id, now, Duration::from_secs(60))
            .await
            .expect("claim empty");
        assert!(empty.is_none());
    }

    #[tokio::test]
    async fn test_attempts_increment_only_on_fresh_claims() {
        let db = memory_db().await;
        IngestTask::enqueue(create_job("res-retry", "user123"), &db)
            .await
            .expect("store");

        // Zero-second lease: the reservation is immediately reclaimable.
        let now = chrono::Utc::now();
        let first = IngestTask::claim_next_ready(&db, "worker-1", now, Duration::from_secs(0))
            .await
            .expect("claim")
            .expect("claimed");
        assert_eq!(first.attempts, 1);

        // Reclaiming an expired Reserved task keeps the attempt budget intact.
        let reclaimed = IngestTask::claim_next_ready(
            &db,
            "worker-2",
            now + ChronoDuration::seconds(1),
            Duration::from_secs(60),
        )
        .await
        .expect("claim")
        .expect("reclaimed");
        assert_eq!(reclaimed.attempts, 1);
        assert_eq!(reclaimed.worker_id.as_deref(), Some("worker-2"));

        // A claim after a genuine failure consumes another attempt.
        let processing = reclaimed.mark_processing(&db).await.expect("processing");
        let failed = processing
            .mark_failed(
                TaskErrorInfo {
                    code: None,
                    message: "boom".into(),
                },
                Duration::from_secs(0),
                &db,
            )
            .await
            .expect("failed update");
        assert_eq!(failed.attempts, 1);

        let retried = IngestTask::claim_next_ready(
            &db,
            "worker-1",
            chrono::Utc::now() + ChronoDuration::seconds(1),
            Duration::from_secs(60),
        )
        .await
        .expect("claim")
        .expect("claimed after failure");
        assert_eq!(retried.attempts, 2);
    }

    #[tokio::test]
    async fn test_fail_and_dead_letter() {
        let db = memory_db().await;
        IngestTask::enqueue(create_job("res-dead", "user123"), &db)
            .await
            .expect("store");

        let worker_id = "worker-dead";
        let now = chrono::Utc::now();
        let claimed = IngestTask::claim_next_ready(&db, worker_id, now, Duration::from_secs(60))
            .await
            .expect("claim")
            .expect("claimed");

        let processing = claimed.mark_processing(&db).await.expect("processing");

        let error_info = TaskErrorInfo {
            code: Some("pipeline_error".into()),
            message: "failed".into(),
        };

        let failed = processing
            .mark_failed(error_info.clone(), Duration::from_secs(30), &db)
            .await
            .expect("failed update");
        assert_eq!(failed.state, TaskState::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("failed"));
        assert!(failed.worker_id.is_none());
        assert!(failed.locked_at.is_none());
        assert!(failed.scheduled_at > now);

        let dead = failed
            .mark_dead_letter(error_info.clone(), &db)
            .await
            .expect("dead letter");
        assert_eq!(dead.state, TaskState::DeadLetter);
        assert_eq!(dead.error_message.as_deref(), Some("failed"));
    }

    #[tokio::test]
    async fn test_cancel_pending_task() {
        let db = memory_db().await;
        let task = IngestTask::enqueue(create_job("res-cancel", "user123"), &db)
            .await
            .expect("store");

        let cancelled = task.mark_cancelled(&db).await.expect("cancel");
        assert_eq!(cancelled.state, TaskState::Cancelled);
        assert!(cancelled.state.is_terminal());

        let active = IngestTask::get_active_for_resource(&db, "res-cancel")
            .await
            .expect("query");
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_claim_ignores_future_scheduled_tasks() {
        let db = memory_db().await;
        let mut task = IngestTask::new(create_job("res-later", "user123"));
        task.scheduled_at = chrono::Utc::now() + ChronoDuration::minutes(10);
        db.store_item(task).await.expect("store");

        let claimed =
            IngestTask::claim_next_ready(&db, "worker-1", chrono::Utc::now(), Duration::from_secs(60))
                .await
                .expect("claim");
        assert!(claimed.is_none());
    }
}
