use std::sync::Arc;
use std::time::Duration;

use courier_common::config::AppConfig;
use courier_common::db;
use courier_common::redis_pool;
use courier_common::store::{
    NotificationStore, PgNotificationStore, PgPreferenceStore, PgTaskSource, PgUserDirectory,
    PreferenceStore, TaskSource, UserDirectory,
};
use courier_engine::dispatch::DispatchEngine;
use courier_engine::retry::RetryPolicy;
use courier_notifier::email::{EmailSender, ResendMailTransport};
use courier_notifier::realtime::{RealtimeSender, SubscriberRegistry};
use courier_notifier::sender::ChannelSender;
use courier_trigger::ledger::RedisReminderLedger;
use courier_trigger::scanner::DeadlineScanner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "courier_trigger=info,courier_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("TaskCourier deadline trigger starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;

    // Run migrations
    sqlx::migrate!("../../migrations").run(&pool).await?;
    tracing::info!("Database migrations applied");

    // Connect to Redis (fired-offset ledger)
    let redis = redis_pool::create_redis_pool(&config.redis_url).await?;

    let store: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(pool.clone()));
    let preferences: Arc<dyn PreferenceStore> = Arc::new(PgPreferenceStore::new(pool.clone()));
    let directory: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool.clone()));
    let tasks: Arc<dyn TaskSource> = Arc::new(PgTaskSource::new(pool));

    // Channel senders. Reminders fired from this process reach realtime
    // subscribers of other processes only via their own registries, so the
    // registry here mainly exists to keep the channel set uniform.
    let registry = Arc::new(SubscriberRegistry::new());
    let mut senders: Vec<Arc<dyn ChannelSender>> =
        vec![Arc::new(RealtimeSender::new(registry))];

    match (&config.resend_api_key, &config.email_from) {
        (Some(api_key), Some(from)) => {
            let transport = Arc::new(ResendMailTransport::new(api_key, from));
            senders.push(Arc::new(EmailSender::new(directory, transport)));
        }
        _ => {
            tracing::warn!("RESEND_API_KEY / EMAIL_FROM not set, email channel disabled");
        }
    }

    let engine = Arc::new(DispatchEngine::new(
        store,
        preferences,
        senders,
        RetryPolicy::from_config(&config),
        Duration::from_secs(config.send_timeout_secs),
    ));

    let ledger = Arc::new(RedisReminderLedger::new(redis));
    let scanner = DeadlineScanner::new(
        tasks,
        ledger,
        engine,
        &config.reminder_offset_hours,
        Duration::from_secs(config.scan_interval_secs),
    );

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = scanner.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Deadline scanner exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("TaskCourier deadline trigger stopped.");
    Ok(())
}
