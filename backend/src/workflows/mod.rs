// Workflow Automation Engine
//
// Event-driven automation for the Fieldwork platform: change events on
// jobs, clients, and invoices are matched against stored workflow triggers,
// and each match runs an ordered sequence of steps (message, delay,
// condition, notify) with variable substitution against live entity data.

pub mod conditions;
pub mod engine;
pub mod executor;
pub mod listener;
pub mod steps;
pub mod triggers;
pub mod variables;

pub use conditions::ConditionOperator;
pub use engine::{
    EngineConfig, EngineError, ExecutionContext, ExecutionEngine, ExecutionRecord, RunStatus,
    RunSummary, StepLogEntry, WorkflowDefinition, WorkflowStatus,
};
pub use executor::{StepError, StepExecutor, StepOutcome};
pub use listener::TriggerRegistry;
pub use steps::{DelayUnit, MessageChannel, Step};
pub use triggers::{EntityKind, TriggerConditions, TriggerKind};
pub use variables::{PgVariableResolver, VariableSource};
