use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use slack_connect::api;
use slack_connect::config::Config;
use slack_connect::crypto::StateSigner;
use slack_connect::delivery::SlackDeliveryClient;
use slack_connect::providers::{OAuthProvider, SlackProvider};
use slack_connect::scheduler::{Clock, DeliveryRunner, Scheduler, SystemClock, TokenRefresher};
use slack_connect::store::{MemoryStore, MessageStore, PgStore};
use slack_connect::{AppState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "slack_connect=info,tower_http=info".into()),
        )
        .init();

    // Load config
    let config = Config::from_env()?;
    info!("slack-connect v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    // Storage
    let store: Arc<dyn MessageStore> = if config.uses_memory_store() {
        info!("Using in-memory store (DATABASE_URL=memory), nothing will persist");
        Arc::new(MemoryStore::new())
    } else {
        let pg = PgStore::new(&config.database_url).await?;
        pg.migrate().await?;
        info!("Database connected and migrated ✓");
        Arc::new(pg)
    };

    // Slack clients
    let http = config.http_client()?;
    let provider: Arc<dyn OAuthProvider> = Arc::new(SlackProvider::new(
        config.slack_client_id.clone(),
        config.slack_client_secret.clone(),
        &config.slack_api_base,
        http.clone(),
    ));
    let delivery = Arc::new(SlackDeliveryClient::new(&config.slack_api_base, http));

    // Delivery runner
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let refresher = TokenRefresher::new(store.clone(), provider.clone());
    let runner = Arc::new(DeliveryRunner::new(
        store.clone(),
        delivery,
        refresher,
        clock.clone(),
    ));

    let signer = StateSigner::new(&config.state_secret)?;

    // Build shared state
    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        store,
        provider,
        runner: runner.clone(),
        signer,
        clock: clock.clone(),
    });

    // Start scheduler
    let scheduler = Scheduler::new(runner, clock, config.scan_interval);
    tokio::spawn(scheduler.run());

    // Build router
    let app = api::router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
