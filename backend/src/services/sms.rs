use crate::config::SmsConfig;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use super::{SendError, SmsSender};

/// SMS delivery through an HTTP gateway with a JSON API.
#[derive(Debug, Clone)]
pub struct HttpSmsSender {
    client: reqwest::Client,
    gateway_url: String,
    api_token: String,
    from_number: String,
}

#[derive(Debug, Serialize)]
struct OutboundSms<'a> {
    to: &'a str,
    from: &'a str,
    body: &'a str,
}

impl HttpSmsSender {
    pub fn new(config: &SmsConfig) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SendError::Transport(e.to_string()))?;

        Ok(HttpSmsSender {
            client,
            gateway_url: config.gateway_url.clone(),
            api_token: config.api_token.clone(),
            from_number: config.from_number.clone(),
        })
    }
}

#[async_trait]
impl SmsSender for HttpSmsSender {
    async fn send_sms(&self, to: &str, body: &str) -> Result<(), SendError> {
        let payload = OutboundSms {
            to,
            from: &self.from_number,
            body,
        };

        let response = self
            .client
            .post(&self.gateway_url)
            .bearer_auth(&self.api_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        if response.status().is_success() {
            info!("SMS sent successfully to {}", to);
            Ok(())
        } else {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            error!("SMS gateway returned {} for {}: {}", status, to, detail);
            Err(SendError::Rejected(format!("{}: {}", status, detail)))
        }
    }
}
