// End-to-end dispatch: change feed -> trigger matching -> engine run.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::support::*;
use crate::resilience::ResilienceRegistry;
use crate::store::ChangeEvent;
use crate::workflows::engine::{ExecutionEngine, RunStatus, WorkflowDefinition};
use crate::workflows::executor::StepExecutor;
use crate::workflows::listener::TriggerRegistry;
use crate::workflows::steps::Step;
use crate::workflows::triggers::{TriggerConditions, TriggerKind};
use fieldwork_shared::Job;

struct Flow {
    feed: Arc<MemoryChangeFeed>,
    sms: Arc<FakeSms>,
    store: Arc<MemoryRunStore>,
    registry: TriggerRegistry,
}

fn flow_with(workflow: WorkflowDefinition, variables: &[(&str, &str)]) -> Flow {
    let sms = Arc::new(FakeSms::new());
    let email = Arc::new(FakeEmail::new());
    let sink = Arc::new(MemorySink::default());
    let store = Arc::new(MemoryRunStore::with_workflow(workflow));
    let feed = Arc::new(MemoryChangeFeed::default());

    let config = no_retry_config();
    let executor = StepExecutor::new(
        sms.clone(),
        email,
        sink,
        Arc::new(ResilienceRegistry::new()),
        config.message_retry.clone(),
    );
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        Arc::new(StaticVariables::new(variables)),
        executor,
        config,
    ));
    let registry = TriggerRegistry::new(feed.clone(), store.clone(), engine);

    Flow {
        feed,
        sms,
        store,
        registry,
    }
}

fn job(owner_id: Uuid, status: &str) -> Job {
    Job {
        id: Uuid::new_v4(),
        owner_id,
        client_id: Uuid::new_v4(),
        title: "Furnace tune-up".to_string(),
        details: None,
        status: status.to_string(),
        scheduled_at: None,
        created_at: Utc::now(),
        updated_at: None,
    }
}

#[tokio::test(start_paused = true)]
async fn job_completion_event_produces_one_run_and_one_sms() {
    let owner = Uuid::new_v4();
    let workflow = WorkflowDefinition::new(
        owner,
        "Job completed follow-up",
        TriggerKind::StatusChange,
        TriggerConditions::status_change(None, Some("completed")),
        vec![Step::sms("Thanks {{client_name}}!")],
    );
    let mut flow = flow_with(
        workflow,
        &[("client_name", "John"), ("client_phone", "+15557654321")],
    );
    flow.registry.initialize(owner).await.unwrap();

    let old = job(owner, "in_progress");
    let mut new = old.clone();
    new.status = "completed".to_string();
    flow.feed.emit(ChangeEvent::job_updated(&old, &new)).await;

    let store = flow.store.clone();
    wait_until(|| store.finished_run_count() == 1, "run to finish").await;

    let runs = flow.store.runs_snapshot();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(
        flow.sms.sent_messages(),
        vec![("+15557654321".to_string(), "Thanks John!".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn non_matching_updates_start_no_runs() {
    let owner = Uuid::new_v4();
    let workflow = WorkflowDefinition::new(
        owner,
        "Job completed follow-up",
        TriggerKind::StatusChange,
        TriggerConditions::status_change(None, Some("completed")),
        vec![Step::sms("Thanks {{client_name}}!")],
    );
    let mut flow = flow_with(workflow, &[("client_phone", "+15557654321")]);
    flow.registry.initialize(owner).await.unwrap();

    let old = job(owner, "scheduled");
    let mut new = old.clone();
    new.status = "in_progress".to_string();
    flow.feed.emit(ChangeEvent::job_updated(&old, &new)).await;

    // Let the dispatcher drain; nothing should have started.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(flow.store.runs_snapshot().is_empty());
    assert_eq!(flow.sms.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn one_event_can_start_runs_for_several_workflows() {
    let owner = Uuid::new_v4();
    let first = WorkflowDefinition::new(
        owner,
        "Completion SMS",
        TriggerKind::StatusChange,
        TriggerConditions::status_change(None, Some("completed")),
        vec![Step::sms("Thanks {{client_name}}!")],
    );
    let second = WorkflowDefinition::new(
        owner,
        "Completion audit note",
        TriggerKind::StatusChange,
        TriggerConditions::status_change(None, None),
        vec![Step::notify("{{job_title}} changed status")],
    );

    let mut flow = flow_with(
        first,
        &[
            ("client_name", "John"),
            ("client_phone", "+15557654321"),
            ("job_title", "Furnace tune-up"),
        ],
    );
    flow.store
        .workflows
        .lock()
        .unwrap()
        .insert(second.id, second);
    flow.registry.initialize(owner).await.unwrap();

    let old = job(owner, "in_progress");
    let mut new = old.clone();
    new.status = "completed".to_string();
    flow.feed.emit(ChangeEvent::job_updated(&old, &new)).await;

    let store = flow.store.clone();
    wait_until(|| store.finished_run_count() == 2, "both runs to finish").await;
    assert_eq!(flow.sms.sent_messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cleanup_stops_dispatch_and_is_idempotent() {
    let owner = Uuid::new_v4();
    let workflow = WorkflowDefinition::new(
        owner,
        "Job completed follow-up",
        TriggerKind::StatusChange,
        TriggerConditions::status_change(None, Some("completed")),
        vec![Step::sms("Thanks {{client_name}}!")],
    );
    let mut flow = flow_with(
        workflow,
        &[("client_name", "John"), ("client_phone", "+15557654321")],
    );
    flow.registry.initialize(owner).await.unwrap();

    flow.registry.cleanup();
    flow.registry.cleanup();

    let old = job(owner, "in_progress");
    let mut new = old.clone();
    new.status = "completed".to_string();
    flow.feed.emit(ChangeEvent::job_updated(&old, &new)).await;

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(flow.store.runs_snapshot().is_empty());

    // Re-initializing picks dispatch back up.
    flow.registry.initialize(owner).await.unwrap();
    flow.feed.emit(ChangeEvent::job_updated(&old, &new)).await;
    let store = flow.store.clone();
    wait_until(|| store.finished_run_count() == 1, "run after re-init").await;
}
