use std::sync::Arc;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use workflow_core::adapters::Adapters;
use workflow_core::config::EngineConfig;
use workflow_core::events::store::EventStore;
use workflow_core::events::store_memory::MemoryEventStore;
use workflow_core::{Engine, MessageBus, ObserverHub};

use workflow_server::state::AppState;
use workflow_server::{http, webhooks, ws};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Arc::new(EngineConfig::from_env());
    let bind_addr = std::env::var("WORKFLOW_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

    let store: Arc<dyn EventStore> = match config.database_url.clone() {
        #[cfg(feature = "postgres")]
        Some(url) => {
            tracing::info!("Connecting to PostgreSQL...");
            let pool = sqlx::PgPool::connect(&url).await?;
            let pg = workflow_core::events::store_postgres::PostgresEventStore::new(pool);
            pg.migrate().await?;
            tracing::info!("Using PostgresEventStore (migrations applied)");
            Arc::new(pg)
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => {
            tracing::warn!("DATABASE_URL set but postgres feature not enabled, using MemoryEventStore");
            Arc::new(MemoryEventStore::new())
        }
        None => {
            tracing::info!("Using MemoryEventStore (no database URL configured)");
            Arc::new(MemoryEventStore::new())
        }
    };

    let hub = Arc::new(ObserverHub::new(store));
    let bus = Arc::new(MessageBus::new());
    let adapters = Arc::new(Adapters::mock());
    let engine = Engine::new(bus.clone(), hub.clone(), adapters, config.clone());

    let state = AppState {
        engine,
        bus,
        hub,
        config,
    };

    let app = Router::new()
        .merge(http::router())
        .merge(ws::router())
        .merge(webhooks::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    tracing::info!("workflow-server listening on {bind_addr}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
