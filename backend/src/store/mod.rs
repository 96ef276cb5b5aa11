// Persistence seams for the automation engine
//
// The engine and the trigger listener never talk to Postgres directly;
// they go through these traits so runs are testable with in-memory fakes.
// Production implementations live in `pg` and `changefeed`.

pub mod changefeed;
pub mod pg;

pub use changefeed::{ChangeEvent, ChangeFeed, ChangeOp, PgChangeFeed, Subscription};
pub use pg::{PgNotificationSink, PgRunStore};

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::workflows::engine::{ExecutionRecord, RunStatus, StepLogEntry, WorkflowDefinition};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("malformed stored data: {0}")]
    Corrupt(String),
}

/// Workflow definitions plus the append-only run log.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError>;

    async fn active_workflows(&self, owner_id: Uuid) -> Result<Vec<WorkflowDefinition>, StoreError>;

    /// Persist a freshly started run record.
    async fn create_run(&self, record: &ExecutionRecord) -> Result<(), StoreError>;

    /// Append one per-step diagnostic entry to the run's log.
    async fn append_step_log(&self, run_id: Uuid, entry: &StepLogEntry) -> Result<(), StoreError>;

    /// Finalize a run exactly once.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Atomic post-run counter update on the workflow row.
    async fn bump_counters(&self, workflow_id: Uuid, succeeded: bool) -> Result<(), StoreError>;

    async fn recent_runs(
        &self,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>, StoreError>;
}

/// A notification row to insert, written by the `notify` step.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub owner_id: Uuid,
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn insert(&self, notification: NewNotification) -> Result<(), StoreError>;
}
