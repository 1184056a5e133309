use std::sync::Arc;

use dotenvy::dotenv;
use envconfig::Envconfig;
use firstaid_inventory::{
    config::Config,
    db::{init_db, repository::DrugRepository},
    services::{schedule_alerts, AlertNotifier, LogNotifier, TelegramNotifier},
};

type Error = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Initialize the logger with default settings or "info" level if not specified
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    log::info!("Starting the drug expiry alert service...");

    // Load environment variables from a .env file if present
    dotenv().ok();

    let config = Config::init_from_env()?;
    let lead = config.alert_lead()?;

    let pool = init_db(&config.database_url, config.pool_settings()).await?;
    let repo = DrugRepository::new(pool.clone());

    let notifier: Arc<dyn AlertNotifier> = match config.telegram() {
        Some((token, chat_id)) => {
            log::info!("Sending expiry alerts to Telegram chat {}", chat_id);
            Arc::new(TelegramNotifier::new(token, chat_id))
        }
        None => {
            log::info!("No Telegram bot configured, expiry alerts go to the log");
            Arc::new(LogNotifier)
        }
    };

    let mut sched = schedule_alerts(repo, notifier, &config.alert_cron, lead).await?;

    tokio::signal::ctrl_c().await?;

    log::info!("Shutting down gracefully");
    sched.shutdown().await?;
    pool.close().await;
    Ok(())
}
