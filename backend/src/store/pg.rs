// Postgres implementations of the persistence seams.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use super::{NewNotification, NotificationSink, RunStore, StoreError};
use crate::workflows::engine::{ExecutionRecord, RunStatus, StepLogEntry, WorkflowDefinition, WorkflowStatus};
use crate::workflows::triggers::{TriggerConditions, TriggerKind};

type WorkflowRow = (
    Uuid,                      // id
    Uuid,                      // owner_id
    String,                    // name
    String,                    // status
    String,                    // trigger_kind
    serde_json::Value,         // trigger_conditions
    serde_json::Value,         // steps
    i64,                       // execution_count
    i64,                       // success_count
    Option<DateTime<Utc>>,     // last_executed_at
    DateTime<Utc>,             // created_at
    Option<DateTime<Utc>>,     // updated_at
);

const WORKFLOW_COLUMNS: &str = "id, owner_id, name, status, trigger_kind, trigger_conditions, \
     steps, execution_count, success_count, last_executed_at, created_at, updated_at";

pub struct PgRunStore {
    pool: PgPool,
}

impl PgRunStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn parse_row(row: WorkflowRow) -> Option<WorkflowDefinition> {
        let status = match WorkflowStatus::parse(&row.3) {
            Some(s) => s,
            None => {
                warn!("Workflow {} has unknown status '{}', skipping", row.0, row.3);
                return None;
            }
        };
        let trigger_kind = match TriggerKind::parse(&row.4) {
            Some(k) => k,
            None => {
                warn!("Workflow {} has unknown trigger kind '{}', skipping", row.0, row.4);
                return None;
            }
        };
        let trigger_conditions: TriggerConditions = match serde_json::from_value(row.5) {
            Ok(c) => c,
            Err(e) => {
                warn!("Workflow {} has malformed trigger conditions: {}", row.0, e);
                return None;
            }
        };
        let steps = match serde_json::from_value(row.6) {
            Ok(s) => s,
            Err(e) => {
                warn!("Workflow {} has malformed steps: {}", row.0, e);
                return None;
            }
        };

        Some(WorkflowDefinition {
            id: row.0,
            owner_id: row.1,
            name: row.2,
            status,
            trigger_kind,
            trigger_conditions,
            steps,
            execution_count: row.7,
            success_count: row.8,
            last_executed_at: row.9,
            created_at: row.10,
            updated_at: row.11,
        })
    }
}

#[async_trait]
impl RunStore for PgRunStore {
    async fn workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError> {
        let row = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE id = $1",
            WORKFLOW_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(Self::parse_row))
    }

    async fn active_workflows(&self, owner_id: Uuid) -> Result<Vec<WorkflowDefinition>, StoreError> {
        let rows = sqlx::query_as::<_, WorkflowRow>(&format!(
            "SELECT {} FROM workflows WHERE owner_id = $1 AND status = $2 ORDER BY created_at ASC",
            WORKFLOW_COLUMNS
        ))
        .bind(owner_id)
        .bind(WorkflowStatus::Active.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(Self::parse_row).collect())
    }

    async fn create_run(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs
            (id, workflow_id, status, trigger_kind, trigger_payload, step_log, started_at)
            VALUES ($1, $2, $3, $4, $5, '[]'::jsonb, $6)
            "#,
        )
        .bind(record.id)
        .bind(record.workflow_id)
        .bind(record.status.as_str())
        .bind(record.trigger_kind.as_str())
        .bind(&record.trigger_payload)
        .bind(record.started_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn append_step_log(&self, run_id: Uuid, entry: &StepLogEntry) -> Result<(), StoreError> {
        let entry = serde_json::to_value(entry)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        sqlx::query("UPDATE workflow_runs SET step_log = step_log || $2 WHERE id = $1")
            .bind(run_id)
            .bind(entry)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE workflow_runs SET status = $2, error_message = $3, completed_at = NOW() WHERE id = $1",
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn bump_counters(&self, workflow_id: Uuid, succeeded: bool) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE workflows
            SET execution_count = execution_count + 1,
                success_count = success_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                last_executed_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(workflow_id)
        .bind(succeeded)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent_runs(
        &self,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        type RunRow = (
            Uuid,
            Uuid,
            String,
            String,
            serde_json::Value,
            DateTime<Utc>,
            Option<DateTime<Utc>>,
            Option<String>,
        );

        let base = "SELECT id, workflow_id, status, trigger_kind, trigger_payload, \
             started_at, completed_at, error_message FROM workflow_runs";

        let rows: Vec<RunRow> = if let Some(wf_id) = workflow_id {
            sqlx::query_as(&format!(
                "{} WHERE workflow_id = $1 ORDER BY started_at DESC LIMIT $2",
                base
            ))
            .bind(wf_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?
        } else {
            sqlx::query_as(&format!("{} ORDER BY started_at DESC LIMIT $1", base))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
        };

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let status = RunStatus::parse(&row.2)?;
                let trigger_kind = TriggerKind::parse(&row.3)?;
                Some(ExecutionRecord {
                    id: row.0,
                    workflow_id: row.1,
                    status,
                    trigger_kind,
                    trigger_payload: row.4,
                    started_at: row.5,
                    completed_at: row.6,
                    error_message: row.7,
                })
            })
            .collect())
    }
}

pub struct PgNotificationSink {
    pool: PgPool,
}

impl PgNotificationSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationSink for PgNotificationSink {
    async fn insert(&self, notification: NewNotification) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications
            (id, owner_id, title, message, notification_type, entity_type, entity_id, read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, false, NOW())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(notification.owner_id)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.notification_type)
        .bind(&notification.entity_type)
        .bind(notification.entity_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
