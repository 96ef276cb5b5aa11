// In-memory fakes for the engine's external seams, shared across tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::resilience::{ResilienceRegistry, RetryPolicy};
use crate::services::{EmailSender, SendError, SmsSender};
use crate::store::{
    ChangeEvent, ChangeFeed, NewNotification, NotificationSink, RunStore, StoreError, Subscription,
};
use crate::workflows::engine::{
    EngineConfig, ExecutionEngine, ExecutionRecord, RunStatus, StepLogEntry, WorkflowDefinition,
};
use crate::workflows::executor::StepExecutor;
use crate::workflows::triggers::EntityKind;
use crate::workflows::variables::VariableSource;

/// Sender fake that fails a configurable number of leading calls.
pub struct FakeSms {
    pub attempts: AtomicU32,
    pub sent: Mutex<Vec<(String, String)>>,
    failures_remaining: AtomicU32,
}

impl FakeSms {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(times: u32) -> Self {
        Self {
            attempts: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(times),
        }
    }

    pub fn fail_always() -> Self {
        Self::failing(u32::MAX)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn sent_messages(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SmsSender for FakeSms {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != u32::MAX {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            }
            return Err(SendError::Transport("sms gateway unavailable".to_string()));
        }
        self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(())
    }
}

pub struct FakeEmail {
    pub attempts: AtomicU32,
    pub sent: Mutex<Vec<(String, String, String)>>,
    failures_remaining: AtomicU32,
}

impl FakeEmail {
    pub fn new() -> Self {
        Self {
            attempts: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmailSender for FakeEmail {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(SendError::Transport("smtp unavailable".to_string()));
        }
        self.sent
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string(), body.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub notifications: Mutex<Vec<NewNotification>>,
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn insert(&self, notification: NewNotification) -> Result<(), StoreError> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Variable source returning a fixed map, or an error when `fail` is set.
pub struct StaticVariables {
    variables: HashMap<String, String>,
    fail: bool,
}

impl StaticVariables {
    pub fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            variables: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            variables: HashMap::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl VariableSource for StaticVariables {
    async fn resolve(
        &self,
        kind: EntityKind,
        entity_id: Uuid,
        _owner_id: Uuid,
    ) -> Result<HashMap<String, String>, StoreError> {
        if self.fail {
            return Err(StoreError::NotFound(format!("{} {}", kind, entity_id)));
        }
        Ok(self.variables.clone())
    }
}

#[derive(Default)]
pub struct MemoryRunStore {
    pub workflows: Mutex<HashMap<Uuid, WorkflowDefinition>>,
    pub runs: Mutex<Vec<ExecutionRecord>>,
    pub step_logs: Mutex<HashMap<Uuid, Vec<StepLogEntry>>>,
}

impl MemoryRunStore {
    pub fn with_workflow(workflow: WorkflowDefinition) -> Self {
        let store = Self::default();
        store.workflows.lock().unwrap().insert(workflow.id, workflow);
        store
    }

    pub fn runs_snapshot(&self) -> Vec<ExecutionRecord> {
        self.runs.lock().unwrap().clone()
    }

    pub fn finished_run_count(&self) -> usize {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.status != RunStatus::Started)
            .count()
    }

    pub fn workflow_snapshot(&self, id: Uuid) -> WorkflowDefinition {
        self.workflows.lock().unwrap().get(&id).unwrap().clone()
    }

    pub fn step_log(&self, run_id: Uuid) -> Vec<StepLogEntry> {
        self.step_logs
            .lock()
            .unwrap()
            .get(&run_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn workflow(&self, id: Uuid) -> Result<Option<WorkflowDefinition>, StoreError> {
        Ok(self.workflows.lock().unwrap().get(&id).cloned())
    }

    async fn active_workflows(&self, owner_id: Uuid) -> Result<Vec<WorkflowDefinition>, StoreError> {
        Ok(self
            .workflows
            .lock()
            .unwrap()
            .values()
            .filter(|w| w.owner_id == owner_id && w.is_active())
            .cloned()
            .collect())
    }

    async fn create_run(&self, record: &ExecutionRecord) -> Result<(), StoreError> {
        self.runs.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn append_step_log(&self, run_id: Uuid, entry: &StepLogEntry) -> Result<(), StoreError> {
        self.step_logs
            .lock()
            .unwrap()
            .entry(run_id)
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::NotFound(format!("run {}", run_id)))?;
        run.status = status;
        run.completed_at = Some(Utc::now());
        run.error_message = error_message.map(str::to_string);
        Ok(())
    }

    async fn bump_counters(&self, workflow_id: Uuid, succeeded: bool) -> Result<(), StoreError> {
        let mut workflows = self.workflows.lock().unwrap();
        let workflow = workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| StoreError::NotFound(format!("workflow {}", workflow_id)))?;
        workflow.execution_count += 1;
        if succeeded {
            workflow.success_count += 1;
        }
        workflow.last_executed_at = Some(Utc::now());
        Ok(())
    }

    async fn recent_runs(
        &self,
        workflow_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ExecutionRecord>, StoreError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| workflow_id.map(|id| r.workflow_id == id).unwrap_or(true))
            .rev()
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Broadcast-style change feed for tests; `emit` fans an event out to every
/// open subscription on the event's table.
#[derive(Default)]
pub struct MemoryChangeFeed {
    subscribers: Mutex<HashMap<EntityKind, Vec<mpsc::Sender<ChangeEvent>>>>,
}

impl MemoryChangeFeed {
    pub async fn emit(&self, event: ChangeEvent) {
        let senders: Vec<mpsc::Sender<ChangeEvent>> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers.get(&event.table).cloned().unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }
}

#[async_trait]
impl ChangeFeed for MemoryChangeFeed {
    async fn subscribe(&self, table: EntityKind) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(64);
        self.subscribers.lock().unwrap().entry(table).or_default().push(tx);
        Ok(Subscription::new(rx, None))
    }
}

/// Everything a scenario test needs, wired together with fakes.
pub struct TestHarness {
    pub sms: Arc<FakeSms>,
    pub email: Arc<FakeEmail>,
    pub sink: Arc<MemorySink>,
    pub store: Arc<MemoryRunStore>,
    pub engine: Arc<ExecutionEngine>,
}

pub fn harness(
    workflow: WorkflowDefinition,
    variables: &[(&str, &str)],
    config: EngineConfig,
) -> TestHarness {
    harness_inner(workflow, StaticVariables::new(variables), FakeSms::new(), config)
}

pub fn harness_with_sms(
    workflow: WorkflowDefinition,
    variables: &[(&str, &str)],
    sms: FakeSms,
    config: EngineConfig,
) -> TestHarness {
    harness_inner(workflow, StaticVariables::new(variables), sms, config)
}

fn harness_inner(
    workflow: WorkflowDefinition,
    variables: StaticVariables,
    sms: FakeSms,
    config: EngineConfig,
) -> TestHarness {
    let sms = Arc::new(sms);
    let email = Arc::new(FakeEmail::new());
    let sink = Arc::new(MemorySink::default());
    let store = Arc::new(MemoryRunStore::with_workflow(workflow));
    let resilience = Arc::new(ResilienceRegistry::new());

    let executor = StepExecutor::new(
        sms.clone(),
        email.clone(),
        sink.clone(),
        resilience,
        config.message_retry.clone(),
    );
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        Arc::new(variables),
        executor,
        config,
    ));

    TestHarness {
        sms,
        email,
        sink,
        store,
        engine,
    }
}

/// No-retry engine config so sender attempt counts stay deterministic.
pub fn no_retry_config() -> EngineConfig {
    EngineConfig {
        message_retry: RetryPolicy::constant(0, std::time::Duration::from_millis(1)),
        ..Default::default()
    }
}

/// Poll until `done` returns true; panics after ~2 seconds of virtual time.
pub async fn wait_until<F: Fn() -> bool>(done: F, what: &str) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
