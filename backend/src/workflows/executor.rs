// Step Executors - one stateless executor per step kind
//
// Remote sends go through the resilience registry under a per-channel
// breaker name. Missing contact info is terminal for the step and is never
// retried; only transport-level send failures are.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tracing::info;

use super::conditions;
use super::engine::ExecutionContext;
use super::steps::{MessageChannel, Step};
use crate::resilience::{ResilienceError, ResilienceRegistry, RetryPolicy};
use crate::services::{EmailSender, SendError, SmsSender};
use crate::store::{NewNotification, NotificationSink, StoreError};

/// Breaker names, one per logical downstream resource.
pub const SMS_RESOURCE: &str = "sms-sender";
pub const EMAIL_RESOURCE: &str = "email-sender";

/// What the engine should do after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Continue,
    /// A condition step evaluated false: skip the remaining steps.
    Halt,
}

#[derive(Debug, Error)]
pub enum StepError {
    #[error("no {channel} contact on file for this entity")]
    MissingContact { channel: &'static str },
    #[error("circuit '{resource}' is open, send rejected")]
    CircuitOpen { resource: String },
    #[error("send failed after retries: {0}")]
    Send(SendError),
    #[error("notification insert failed: {0}")]
    Notification(StoreError),
}

impl StepError {
    /// Stable error kind for diagnostics and the step log.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::MissingContact { .. } => "missing_contact",
            StepError::CircuitOpen { .. } => "circuit_open",
            StepError::Send(_) => "send_failed",
            StepError::Notification(_) => "notification_failed",
        }
    }
}

pub struct StepExecutor {
    sms: Arc<dyn SmsSender>,
    email: Arc<dyn EmailSender>,
    notifications: Arc<dyn NotificationSink>,
    resilience: Arc<ResilienceRegistry>,
    retry: RetryPolicy,
}

impl StepExecutor {
    pub fn new(
        sms: Arc<dyn SmsSender>,
        email: Arc<dyn EmailSender>,
        notifications: Arc<dyn NotificationSink>,
        resilience: Arc<ResilienceRegistry>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            sms,
            email,
            notifications,
            resilience,
            retry,
        }
    }

    pub async fn execute(
        &self,
        step: &Step,
        ctx: &ExecutionContext,
    ) -> Result<StepOutcome, StepError> {
        match step {
            Step::Message { channel, template, .. } => {
                self.execute_message(*channel, template, ctx).await?;
                Ok(StepOutcome::Continue)
            }
            Step::Delay { amount, unit } => {
                // Suspends only this run; concurrent runs keep going.
                tokio::time::sleep(unit.duration(*amount)).await;
                Ok(StepOutcome::Continue)
            }
            Step::Condition { field, operator, value } => {
                let field_value = ctx.variables.get(field).map(String::as_str).unwrap_or("");
                if conditions::evaluate(field_value, *operator, value) {
                    Ok(StepOutcome::Continue)
                } else {
                    info!(
                        "Workflow {}: condition '{} {:?} {}' is false, halting remaining steps",
                        ctx.workflow_id, field, operator, value
                    );
                    Ok(StepOutcome::Halt)
                }
            }
            Step::Notify { template } => {
                let message = render_template(template, &ctx.variables);
                self.notifications
                    .insert(NewNotification {
                        owner_id: ctx.owner_id,
                        title: ctx.workflow_name.clone(),
                        message,
                        notification_type: "workflow".to_string(),
                        entity_type: ctx.entity_kind.map(|k| k.to_string()),
                        entity_id: ctx.entity_id,
                    })
                    .await
                    .map_err(StepError::Notification)?;
                Ok(StepOutcome::Continue)
            }
        }
    }

    async fn execute_message(
        &self,
        channel: MessageChannel,
        template: &str,
        ctx: &ExecutionContext,
    ) -> Result<(), StepError> {
        let body = render_template(template, &ctx.variables);

        match channel {
            MessageChannel::Sms => {
                let to = contact(ctx, "client_phone")
                    .ok_or(StepError::MissingContact { channel: "phone" })?;
                self.resilience
                    .call(SMS_RESOURCE, &self.retry, || self.sms.send_sms(to, &body))
                    .await
                    .map_err(map_send_error)
            }
            MessageChannel::Email => {
                let to = contact(ctx, "client_email")
                    .ok_or(StepError::MissingContact { channel: "email" })?;
                self.resilience
                    .call(EMAIL_RESOURCE, &self.retry, || {
                        self.email.send_email(to, &ctx.workflow_name, &body)
                    })
                    .await
                    .map_err(map_send_error)
            }
        }
    }
}

fn map_send_error(err: ResilienceError<SendError>) -> StepError {
    match err {
        ResilienceError::CircuitOpen { resource } => StepError::CircuitOpen { resource },
        ResilienceError::Exhausted(e) => StepError::Send(e),
    }
}

fn contact<'a>(ctx: &'a ExecutionContext, key: &str) -> Option<&'a str> {
    ctx.variables
        .get(key)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// Replace every `{{key}}` token with its variable value. Tokens without a
/// matching key are left verbatim; this is a substitution pass, not a
/// strict template engine.
pub fn render_template(template: &str, variables: &HashMap<String, String>) -> String {
    let re = Regex::new(r"\{\{([a-zA-Z0-9_]+)\}\}").unwrap();
    let mut result = template.to_string();

    for cap in re.captures_iter(template) {
        if let Some(value) = variables.get(&cap[1]) {
            result = result.replace(&cap[0], value);
        }
    }

    result
}
