// Execution Engine - runs a workflow's steps for one matched entity
//
// Each run is independent: it gets its own ExecutionContext and run record,
// and shares nothing mutable with concurrent runs except the named circuit
// breakers. A run always terminates in `completed` or `failed`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};
use uuid::Uuid;

use super::executor::{StepExecutor, StepOutcome};
use super::steps::Step;
use super::triggers::{EntityKind, TriggerConditions, TriggerKind};
use super::variables::VariableSource;
use crate::resilience::RetryPolicy;
use crate::store::{ChangeEvent, RunStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Active,
    Paused,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(WorkflowStatus::Active),
            "paused" => Some(WorkflowStatus::Paused),
            _ => None,
        }
    }
}

/// A stored automation definition. Read-only to the engine; only the
/// counters and `last_executed_at` change after a run, via the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub trigger_kind: TriggerKind,
    pub trigger_conditions: TriggerConditions,
    pub steps: Vec<Step>,
    pub execution_count: i64,
    pub success_count: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WorkflowDefinition {
    pub fn new(
        owner_id: Uuid,
        name: &str,
        trigger_kind: TriggerKind,
        trigger_conditions: TriggerConditions,
        steps: Vec<Step>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            status: WorkflowStatus::Active,
            trigger_kind,
            trigger_conditions,
            steps,
            execution_count: 0,
            success_count: 0,
            last_executed_at: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == WorkflowStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "started" => Some(RunStatus::Started),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Ephemeral per-run state, owned exclusively by the run that created it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub workflow_id: Uuid,
    pub workflow_name: String,
    pub trigger_kind: TriggerKind,
    pub entity_kind: Option<EntityKind>,
    pub entity_id: Option<Uuid>,
    pub owner_id: Uuid,
    pub variables: HashMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub test_mode: bool,
}

/// Append-only run log row: created at start, finalized exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub status: RunStatus,
    pub trigger_kind: TriggerKind,
    pub trigger_payload: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ExecutionRecord {
    pub fn new(workflow_id: Uuid, trigger_kind: TriggerKind, trigger_payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            status: RunStatus::Started,
            trigger_kind,
            trigger_payload,
            started_at: Utc::now(),
            completed_at: None,
            error_message: None,
        }
    }
}

/// One per-step diagnostic entry appended to the run record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepLogEntry {
    pub index: i32,
    pub kind: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error classification ("circuit_open", "send_failed", ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A failed step lets the remaining steps run when true. This mirrors
    /// the platform's historical best-effort delivery semantics; set false
    /// for stop-on-first-failure.
    pub continue_on_step_error: bool,
    /// Retry policy applied to message sends.
    pub message_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            continue_on_step_error: true,
            message_retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub steps_attempted: usize,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ExecutionEngine {
    store: Arc<dyn RunStore>,
    variables: Arc<dyn VariableSource>,
    executor: StepExecutor,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<dyn RunStore>,
        variables: Arc<dyn VariableSource>,
        executor: StepExecutor,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            variables,
            executor,
            config,
        }
    }

    /// Run a workflow for a matched change-feed event.
    pub async fn run_for_event(
        &self,
        workflow: &WorkflowDefinition,
        event: &ChangeEvent,
        entity_id: Uuid,
    ) -> Result<RunSummary, EngineError> {
        let payload = serde_json::json!({
            "table": event.table,
            "op": event.op,
            "old": event.old,
            "new": event.new,
        });
        self.run(workflow, Some(event.table), Some(entity_id), payload, None, false)
            .await
    }

    /// Manually trigger a single run, bypassing change-feed matching.
    pub async fn execute_workflow(
        &self,
        workflow_id: Uuid,
        entity_kind: EntityKind,
        entity_id: Uuid,
    ) -> Result<RunSummary, EngineError> {
        let workflow = self
            .store
            .workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        let payload = serde_json::json!({
            "manual": true,
            "entity_type": entity_kind,
            "entity_id": entity_id,
        });
        self.run(&workflow, Some(entity_kind), Some(entity_id), payload, None, false)
            .await
    }

    /// Run against caller-supplied sample variables instead of live entity
    /// data. Identical to a production run aside from the test flag.
    pub async fn test_workflow(
        &self,
        workflow_id: Uuid,
        sample_variables: HashMap<String, String>,
    ) -> Result<RunSummary, EngineError> {
        let workflow = self
            .store
            .workflow(workflow_id)
            .await?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))?;

        let payload = serde_json::json!({ "test": true });
        self.run(&workflow, None, None, payload, Some(sample_variables), true)
            .await
    }

    async fn run(
        &self,
        workflow: &WorkflowDefinition,
        entity_kind: Option<EntityKind>,
        entity_id: Option<Uuid>,
        trigger_payload: serde_json::Value,
        variables_override: Option<HashMap<String, String>>,
        test_mode: bool,
    ) -> Result<RunSummary, EngineError> {
        let record = ExecutionRecord::new(workflow.id, workflow.trigger_kind, trigger_payload);
        self.store.create_run(&record).await?;
        info!("Workflow '{}' run {} started", workflow.name, record.id);

        let variables = match variables_override {
            Some(variables) => variables,
            None => match (entity_kind, entity_id) {
                (Some(kind), Some(id)) => {
                    match self.variables.resolve(kind, id, workflow.owner_id).await {
                        Ok(variables) => variables,
                        Err(e) => {
                            let message = format!("variable resolution failed: {}", e);
                            error!("Workflow '{}' run {}: {}", workflow.name, record.id, message);
                            self.store.bump_counters(workflow.id, false).await?;
                            self.store
                                .finish_run(record.id, RunStatus::Failed, Some(&message))
                                .await?;
                            return Ok(RunSummary {
                                run_id: record.id,
                                status: RunStatus::Failed,
                                steps_attempted: 0,
                            });
                        }
                    }
                }
                _ => HashMap::new(),
            },
        };

        let ctx = ExecutionContext {
            workflow_id: workflow.id,
            workflow_name: workflow.name.clone(),
            trigger_kind: workflow.trigger_kind,
            entity_kind,
            entity_id,
            owner_id: workflow.owner_id,
            variables,
            started_at: record.started_at,
            test_mode,
        };
        if ctx.test_mode {
            info!("Workflow '{}' run {} is a test run", workflow.name, record.id);
        }

        let mut first_error: Option<(usize, String)> = None;
        let mut steps_attempted = 0;

        for (index, step) in workflow.steps.iter().enumerate() {
            if let Step::Message { delay_minutes, .. } = step {
                if *delay_minutes > 0 {
                    tokio::time::sleep(std::time::Duration::from_secs(*delay_minutes as u64 * 60))
                        .await;
                }
            }

            let step_started = tokio::time::Instant::now();
            let result = self.executor.execute(step, &ctx).await;
            let duration_ms = step_started.elapsed().as_millis() as i64;
            steps_attempted += 1;

            let entry = StepLogEntry {
                index: index as i32,
                kind: step.kind_name().to_string(),
                ok: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
                error_kind: result.as_ref().err().map(|e| e.kind().to_string()),
                duration_ms,
            };
            self.store.append_step_log(record.id, &entry).await?;

            match result {
                Ok(StepOutcome::Continue) => {}
                Ok(StepOutcome::Halt) => {
                    info!(
                        "Workflow '{}' run {}: condition at step {} halted the sequence",
                        workflow.name, record.id, index
                    );
                    break;
                }
                Err(e) => {
                    error!(
                        "Workflow '{}' run {}: step {} ({}) failed: {}",
                        workflow.name,
                        record.id,
                        index,
                        step.kind_name(),
                        e
                    );
                    if first_error.is_none() {
                        first_error = Some((index, e.to_string()));
                    }
                    if !self.config.continue_on_step_error {
                        break;
                    }
                }
            }
        }

        let succeeded = first_error.is_none();
        self.store.bump_counters(workflow.id, succeeded).await?;

        let (status, error_message) = match first_error {
            None => (RunStatus::Completed, None),
            Some((index, message)) => (RunStatus::Failed, Some(format!("step {}: {}", index, message))),
        };
        self.store
            .finish_run(record.id, status, error_message.as_deref())
            .await?;

        info!(
            "Workflow '{}' run {} finished: {} ({} steps, {}ms)",
            workflow.name,
            record.id,
            status.as_str(),
            steps_attempted,
            (Utc::now() - ctx.started_at).num_milliseconds()
        );

        Ok(RunSummary {
            run_id: record.id,
            status,
            steps_attempted,
        })
    }
}
