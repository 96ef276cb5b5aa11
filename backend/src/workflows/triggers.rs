// Workflow Triggers - entity change kinds that can start a workflow run

use serde::{Deserialize, Serialize};

/// Business entities the automation layer watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Client,
    Invoice,
}

impl EntityKind {
    pub fn table_name(&self) -> &'static str {
        match self {
            EntityKind::Job => "jobs",
            EntityKind::Client => "clients",
            EntityKind::Invoice => "invoices",
        }
    }

    pub fn from_table_name(table: &str) -> Option<Self> {
        match table {
            "jobs" => Some(EntityKind::Job),
            "clients" => Some(EntityKind::Client),
            "invoices" => Some(EntityKind::Invoice),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Kinds of change events that can trigger workflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A job's status column changed.
    StatusChange,
    /// A new job or client row was inserted.
    EntityCreated,
    /// An invoice flipped to "paid".
    PaymentReceived,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::StatusChange => "status_change",
            TriggerKind::EntityCreated => "entity_created",
            TriggerKind::PaymentReceived => "payment_received",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "status_change" => Some(TriggerKind::StatusChange),
            "entity_created" => Some(TriggerKind::EntityCreated),
            "payment_received" => Some(TriggerKind::PaymentReceived),
            _ => None,
        }
    }

    /// Entity tables a workflow with this trigger kind must subscribe to.
    pub fn subscribed_tables(&self, conditions: &TriggerConditions) -> Vec<EntityKind> {
        match self {
            TriggerKind::StatusChange => vec![EntityKind::Job],
            TriggerKind::PaymentReceived => vec![EntityKind::Invoice],
            TriggerKind::EntityCreated => match conditions.entity_type {
                Some(kind) => vec![kind],
                None => vec![EntityKind::Job, EntityKind::Client],
            },
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured trigger predicate stored alongside the workflow.
/// Unset fields act as wildcards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<EntityKind>,
}

impl TriggerConditions {
    pub fn status_change(from: Option<&str>, to: Option<&str>) -> Self {
        Self {
            from_status: from.map(str::to_string),
            to_status: to.map(str::to_string),
            entity_type: None,
        }
    }

    pub fn entity_created(kind: EntityKind) -> Self {
        Self {
            from_status: None,
            to_status: None,
            entity_type: Some(kind),
        }
    }
}
