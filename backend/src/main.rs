use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod database;
mod resilience;
mod services;
mod store;
mod workflows;

#[cfg(test)]
mod tests;

use crate::resilience::ResilienceRegistry;
use crate::services::{HttpSmsSender, SmtpEmailSender};
use crate::store::{PgChangeFeed, PgNotificationSink, PgRunStore};
use crate::workflows::{
    EngineConfig, ExecutionEngine, PgVariableResolver, StepExecutor, TriggerRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    if !config.smtp.is_configured() {
        tracing::warn!("SMTP is not configured; email steps will fail until it is");
    }
    if !config.sms.is_configured() {
        tracing::warn!("SMS gateway is not configured; SMS steps will fail until it is");
    }

    let engine_config = EngineConfig {
        continue_on_step_error: config.engine.continue_on_step_error,
        ..Default::default()
    };

    let resilience = Arc::new(ResilienceRegistry::new());
    let sms = Arc::new(HttpSmsSender::new(&config.sms)?);
    let email = Arc::new(SmtpEmailSender::new(&config.smtp)?);
    let notifications = Arc::new(PgNotificationSink::new(db_pool.clone()));
    let executor = StepExecutor::new(
        sms,
        email,
        notifications,
        resilience,
        engine_config.message_retry.clone(),
    );

    let store = Arc::new(PgRunStore::new(db_pool.clone()));
    let variables = Arc::new(PgVariableResolver::new(db_pool.clone()));
    let engine = Arc::new(ExecutionEngine::new(
        store.clone(),
        variables,
        executor,
        engine_config,
    ));

    let feed = Arc::new(PgChangeFeed::new(config.database_url.clone()));
    let mut triggers = TriggerRegistry::new(feed, store, engine);
    triggers.initialize(config.tenant_id).await?;

    tracing::info!("Automation engine running for tenant {}", config.tenant_id);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    triggers.cleanup();

    Ok(())
}
