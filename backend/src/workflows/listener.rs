// Trigger Listener - subscribes to entity change feeds and fans matched
// events out to independent engine runs.
//
// All subscriptions forward into a single typed channel consumed by one
// dispatcher task per tenant; each match is fire-and-forget so a slow or
// suspended run never blocks dispatch of the next event.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::engine::{ExecutionEngine, WorkflowDefinition};
use super::triggers::{EntityKind, TriggerKind};
use crate::store::{ChangeEvent, ChangeFeed, ChangeOp, RunStore, StoreError};
use fieldwork_shared::invoice_status;

pub struct TriggerRegistry {
    feed: Arc<dyn ChangeFeed>,
    store: Arc<dyn RunStore>,
    engine: Arc<ExecutionEngine>,
    tasks: Vec<JoinHandle<()>>,
}

impl TriggerRegistry {
    pub fn new(
        feed: Arc<dyn ChangeFeed>,
        store: Arc<dyn RunStore>,
        engine: Arc<ExecutionEngine>,
    ) -> Self {
        Self {
            feed,
            store,
            engine,
            tasks: Vec::new(),
        }
    }

    /// Load the tenant's active workflows and open one subscription per
    /// distinct entity table they watch. Re-initializing cancels the
    /// previous subscriptions first.
    pub async fn initialize(&mut self, owner_id: Uuid) -> Result<(), StoreError> {
        self.cleanup();

        let workflows = self.store.active_workflows(owner_id).await?;
        info!("Loaded {} active workflows for tenant {}", workflows.len(), owner_id);
        let workflows = Arc::new(workflows);

        let tables: BTreeSet<EntityKind> = workflows
            .iter()
            .flat_map(|w| w.trigger_kind.subscribed_tables(&w.trigger_conditions))
            .collect();

        let (tx, mut rx) = mpsc::channel::<ChangeEvent>(256);

        for table in tables {
            let mut subscription = self.feed.subscribe(table).await?;
            let tx = tx.clone();
            self.tasks.push(tokio::spawn(async move {
                while let Some(event) = subscription.recv().await {
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let engine = self.engine.clone();
        self.tasks.push(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                dispatch(&engine, &workflows, event);
            }
        }));

        Ok(())
    }

    /// Tear down all subscriptions and the dispatcher. Idempotent.
    pub fn cleanup(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for TriggerRegistry {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn dispatch(engine: &Arc<ExecutionEngine>, workflows: &Arc<Vec<WorkflowDefinition>>, event: ChangeEvent) {
    for workflow in workflows.iter() {
        if !matches_event(workflow, &event) {
            continue;
        }

        let entity_id = match event.new.get("id").and_then(|v| v.as_str()).and_then(|s| s.parse().ok()) {
            Some(id) => id,
            None => {
                warn!(
                    "Change event on {} has no parsable row id, skipping match for workflow '{}'",
                    event.table, workflow.name
                );
                continue;
            }
        };

        let engine = engine.clone();
        let workflow = workflow.clone();
        let event = event.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_for_event(&workflow, &event, entity_id).await {
                error!("Workflow '{}' run could not be recorded: {}", workflow.name, e);
            }
        });
    }
}

/// Whether one change event satisfies a workflow's trigger.
pub(crate) fn matches_event(workflow: &WorkflowDefinition, event: &ChangeEvent) -> bool {
    if !workflow.is_active() {
        return false;
    }

    // Feed subscriptions cover every tenant's rows; filter to the owner.
    let row_owner = event
        .new
        .get("owner_id")
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Uuid>().ok());
    if row_owner != Some(workflow.owner_id) {
        return false;
    }

    let conditions = &workflow.trigger_conditions;
    match workflow.trigger_kind {
        TriggerKind::StatusChange => {
            if event.table != EntityKind::Job || event.op != ChangeOp::Update {
                return false;
            }
            let (Some(old_status), Some(new_status)) = (event.old_status(), event.new_status())
            else {
                return false;
            };
            if old_status == new_status {
                return false;
            }
            if let Some(from) = &conditions.from_status {
                if old_status != from {
                    return false;
                }
            }
            if let Some(to) = &conditions.to_status {
                if new_status != to {
                    return false;
                }
            }
            true
        }
        TriggerKind::EntityCreated => {
            if event.op != ChangeOp::Insert {
                return false;
            }
            match conditions.entity_type {
                Some(kind) => event.table == kind,
                None => matches!(event.table, EntityKind::Job | EntityKind::Client),
            }
        }
        TriggerKind::PaymentReceived => {
            // Only the specific flip to paid, not every invoice update.
            event.table == EntityKind::Invoice
                && event.op == ChangeOp::Update
                && event.old_status().is_some_and(|s| s != invoice_status::PAID)
                && event.new_status() == Some(invoice_status::PAID)
        }
    }
}
