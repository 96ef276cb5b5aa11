// Workflow Steps - the closed set of step kinds a workflow can run
//
// Modeled as a tagged union so a new step kind is a compile-time concern
// in the executor's match, never a silently skipped string.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::conditions::ConditionOperator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageChannel {
    Sms,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl DelayUnit {
    pub fn duration(&self, amount: i64) -> Duration {
        let amount = amount.max(0) as u64;
        match self {
            DelayUnit::Seconds => Duration::from_secs(amount),
            DelayUnit::Minutes => Duration::from_secs(amount * 60),
            DelayUnit::Hours => Duration::from_secs(amount * 3600),
            DelayUnit::Days => Duration::from_secs(amount * 86_400),
        }
    }
}

/// One unit of work within a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Step {
    /// Send a templated message to the entity's contact channel.
    Message {
        channel: MessageChannel,
        template: String,
        #[serde(default)]
        delay_minutes: i64,
    },
    /// Suspend this run (and only this run) for a duration.
    Delay { amount: i64, unit: DelayUnit },
    /// Evaluate a predicate against the run's variables; false stops the
    /// remaining steps.
    Condition {
        field: String,
        operator: ConditionOperator,
        value: String,
    },
    /// Write an internal notification record.
    Notify { template: String },
}

impl Step {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Step::Message { .. } => "message",
            Step::Delay { .. } => "delay",
            Step::Condition { .. } => "condition",
            Step::Notify { .. } => "notify",
        }
    }

    // ===== Step Builders =====

    pub fn sms(template: &str) -> Self {
        Step::Message {
            channel: MessageChannel::Sms,
            template: template.to_string(),
            delay_minutes: 0,
        }
    }

    pub fn email(template: &str) -> Self {
        Step::Message {
            channel: MessageChannel::Email,
            template: template.to_string(),
            delay_minutes: 0,
        }
    }

    pub fn wait(amount: i64, unit: DelayUnit) -> Self {
        Step::Delay { amount, unit }
    }

    pub fn condition(field: &str, operator: ConditionOperator, value: &str) -> Self {
        Step::Condition {
            field: field.to_string(),
            operator,
            value: value.to_string(),
        }
    }

    pub fn notify(template: &str) -> Self {
        Step::Notify {
            template: template.to_string(),
        }
    }

    pub fn with_delay_minutes(mut self, minutes: i64) -> Self {
        if let Step::Message { delay_minutes, .. } = &mut self {
            *delay_minutes = minutes;
        }
        self
    }
}
