use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_organizer_api::config::Config;
use rust_organizer_api::db_storage::PgStore;
use rust_organizer_api::handlers::{self, AppState};
use rust_organizer_api::memory_store::MemoryStore;
use rust_organizer_api::notifier::{self, NotificationSink};
use rust_organizer_api::repository::Repository;

/// Main entry point for the application.
///
/// Initializes tracing, configuration, the store (Postgres when `DB_URL` is
/// set, in-memory otherwise) and the optional notification relay, then
/// starts the Axum server.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_organizer_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    let store: Arc<dyn Repository> = match config.database_url {
        Some(ref url) => {
            let store = PgStore::connect(url, config.db_max_connections).await?;
            tracing::info!("Database connection pool established");
            Arc::new(store)
        }
        None => {
            tracing::warn!("Running on the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let notifier: Option<Arc<dyn NotificationSink>> = match config.notification_webhook_url {
        Some(ref url) => match notifier::webhook_sink(url.clone()) {
            Ok(sink) => {
                tracing::info!("✓ Notification relay initialized");
                Some(sink)
            }
            Err(e) => {
                tracing::error!("Failed to initialize notification relay: {}", e);
                None
            }
        },
        None => None,
    };

    let app_state = Arc::new(AppState::new(store, config.clone(), notifier));

    // Configure rate limiter per client IP
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(config.rate_limit_per_second)
            .burst_size(config.rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_router().layer(
        ServiceBuilder::new()
            // Request size limit: 1MB max payload
            .layer(RequestBodyLimitLayer::new(1024 * 1024))
            .layer(GovernorLayer {
                config: governor_conf,
            }),
    );

    // Health check bypasses rate limiting
    let app = axum::Router::new()
        .route("/health", axum::routing::get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
