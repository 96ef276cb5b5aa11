// Row-change feed consumed by the trigger listener.
//
// Postgres NOTIFY payloads (see migrations/0002_change_feed.sql) are parsed
// into typed `ChangeEvent`s and pushed through a bounded channel. Each
// subscription owns an explicit handle; closing it tears the pump task down
// deterministically.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgListener;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::StoreError;
use crate::workflows::triggers::EntityKind;
use fieldwork_shared::{Client, Invoice, Job};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
}

/// One row mutation on an entity table, with both row images for updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: EntityKind,
    pub op: ChangeOp,
    pub old: Option<serde_json::Value>,
    pub new: serde_json::Value,
}

impl ChangeEvent {
    pub fn job_created(job: &Job) -> Self {
        Self {
            table: EntityKind::Job,
            op: ChangeOp::Insert,
            old: None,
            new: serde_json::to_value(job).unwrap_or_default(),
        }
    }

    pub fn job_updated(old: &Job, new: &Job) -> Self {
        Self {
            table: EntityKind::Job,
            op: ChangeOp::Update,
            old: Some(serde_json::to_value(old).unwrap_or_default()),
            new: serde_json::to_value(new).unwrap_or_default(),
        }
    }

    pub fn client_created(client: &Client) -> Self {
        Self {
            table: EntityKind::Client,
            op: ChangeOp::Insert,
            old: None,
            new: serde_json::to_value(client).unwrap_or_default(),
        }
    }

    pub fn invoice_updated(old: &Invoice, new: &Invoice) -> Self {
        Self {
            table: EntityKind::Invoice,
            op: ChangeOp::Update,
            old: Some(serde_json::to_value(old).unwrap_or_default()),
            new: serde_json::to_value(new).unwrap_or_default(),
        }
    }

    /// Status column of the pre-update row image, when present.
    pub fn old_status(&self) -> Option<&str> {
        self.old.as_ref().and_then(|v| v.get("status")).and_then(|v| v.as_str())
    }

    pub fn new_status(&self) -> Option<&str> {
        self.new.get("status").and_then(|v| v.as_str())
    }
}

/// Handle for one open change-feed subscription.
pub struct Subscription {
    events: mpsc::Receiver<ChangeEvent>,
    pump: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(events: mpsc::Receiver<ChangeEvent>, pump: Option<JoinHandle<()>>) -> Self {
        Self { events, pump }
    }

    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Stop receiving and tear down the pump task. Safe to call twice.
    pub fn close(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.events.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, table: EntityKind) -> Result<Subscription, StoreError>;
}

/// Change feed backed by Postgres LISTEN/NOTIFY.
pub struct PgChangeFeed {
    database_url: String,
}

impl PgChangeFeed {
    pub fn new(database_url: String) -> Self {
        Self { database_url }
    }
}

#[async_trait]
impl ChangeFeed for PgChangeFeed {
    async fn subscribe(&self, table: EntityKind) -> Result<Subscription, StoreError> {
        let mut listener = PgListener::connect(&self.database_url).await?;
        let channel = format!("fieldwork_{}_changes", table.table_name());
        listener.listen(&channel).await?;

        let (tx, rx) = mpsc::channel(256);
        let pump = tokio::spawn(async move {
            loop {
                match listener.recv().await {
                    Ok(notification) => {
                        match parse_change_payload(notification.payload()) {
                            Some(event) => {
                                if tx.send(event).await.is_err() {
                                    break;
                                }
                            }
                            None => warn!(
                                "Ignoring malformed change payload on '{}'",
                                notification.channel()
                            ),
                        }
                    }
                    Err(e) => {
                        // PgListener reconnects internally; back off and retry.
                        error!("Change feed connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Ok(Subscription::new(rx, Some(pump)))
    }
}

fn parse_change_payload(payload: &str) -> Option<ChangeEvent> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let table = EntityKind::from_table_name(value.get("table")?.as_str()?)?;
    let op = match value.get("op")?.as_str()? {
        "insert" => ChangeOp::Insert,
        "update" => ChangeOp::Update,
        _ => return None,
    };
    let old = match value.get("old") {
        Some(serde_json::Value::Null) | None => None,
        Some(v) => Some(v.clone()),
    };
    let new = value.get("new")?.clone();
    Some(ChangeEvent { table, op, old, new })
}
