//! TaskCourier API server binary entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use courier_common::config::AppConfig;
use courier_common::db::create_pool;
use courier_common::store::{
    NotificationStore, PgNotificationStore, PgPreferenceStore, PgUserDirectory, PreferenceStore,
    UserDirectory,
};
use courier_engine::dispatch::DispatchEngine;
use courier_engine::retry::RetryPolicy;
use courier_notifier::email::{EmailSender, ResendMailTransport};
use courier_notifier::realtime::{RealtimeSender, SubscriberRegistry};
use courier_notifier::sender::ChannelSender;

use courier_api::routes::create_router;
use courier_api::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("courier_api=debug,courier_engine=debug,tower_http=debug")
        }))
        .init();

    tracing::info!("Starting TaskCourier API server...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create database connection pool
    let pool = create_pool(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database pool created");

    let store: Arc<dyn NotificationStore> = Arc::new(PgNotificationStore::new(pool.clone()));
    let preferences: Arc<dyn PreferenceStore> = Arc::new(PgPreferenceStore::new(pool.clone()));
    let directory: Arc<dyn UserDirectory> = Arc::new(PgUserDirectory::new(pool));

    // Realtime subscriber registry: populated when push consumers attach to
    // this process, pruned on disconnect.
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
        store.clone(),
        preferences.clone(),
        senders,
        RetryPolicy::from_config(&config),
        Duration::from_secs(config.send_timeout_secs),
    ));

    // Build application state
    let state = AppState::new(store, preferences, engine);

    // Build router
    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("API server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
