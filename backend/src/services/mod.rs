// Outbound messaging services
//
// The engine talks to message channels through the `SmsSender` and
// `EmailSender` traits so tests can substitute in-memory fakes; the
// production implementations live in the submodules.

pub mod email;
pub mod sms;

pub use email::SmtpEmailSender;
pub use sms::HttpSmsSender;

use async_trait::async_trait;
use thiserror::Error;

/// Failure sending through an external channel. Everything here is
/// considered transient and eligible for retry by the resilience layer.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider rejected message: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), SendError>;
}

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, body: &str) -> Result<(), SendError>;
}
