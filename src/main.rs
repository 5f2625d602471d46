//! Proposal Governor - lifecycle governance for system improvement proposals
//!
//! Opportunities become proposals, proposals are vetted, built and validated,
//! and only then published into the living system document. The sync
//! guardrail refuses publication of anything whose implementation has not
//! been validated, and the audit endpoint reports records that slipped past it.
//!
//! STORE BACKENDS: `STORE_BACKEND=memory` (default) keeps everything in
//! process; `STORE_BACKEND=postgres` persists to `DATABASE_URL`.

mod config;
mod error;
mod lifecycle;
mod models;
mod routes;
mod state;
mod store;

use crate::config::{Settings, StoreBackend};
use crate::routes::create_router;
use crate::state::AppState;
use crate::store::{GraphStore, MemoryGraphStore, PgGraphStore};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Proposal Governor...");

    // Load configuration
    let settings = Settings::load()?;
    info!(
        backend = ?settings.backend,
        strict_sync_guardrail = settings.lifecycle.strict_sync_guardrail,
        "📋 Configuration loaded successfully"
    );

    let store = init_store(&settings).await?;
    let state = Arc::new(AppState::new(store, settings.lifecycle.clone()));

    // Build the router
    let app = create_router(state, &settings);

    // Create socket address
    let addr = SocketAddr::from((settings.server.host, settings.server.port));

    info!("🌐 Server listening on http://{}", addr);
    info!("");
    info!("📚 API Endpoints:");
    info!("   ─── Lifecycle ───");
    info!("   POST /api/opportunities                  - Record an opportunity");
    info!("   POST /api/proposals                      - Create a proposal");
    info!("   GET  /api/proposals?status=              - List proposals by status");
    info!("   POST /api/proposals/{{id}}/transition      - Move a proposal");
    info!("   POST /api/proposals/{{id}}/vettings        - Record a vetting");
    info!("   POST /api/proposals/{{id}}/implementation  - Start implementation");
    info!("   POST /api/implementations/{{id}}/validate  - Validate implementation");
    info!("");
    info!("   ─── Sync Guardrail ───");
    info!("   GET  /api/proposals/{{id}}/sync-check      - Can this proposal sync?");
    info!("   POST /api/proposals/{{id}}/sync            - Publish into the document");
    info!("   GET  /api/audit/guardrail-violations     - Audit published records");
    info!("");

    // Create TCP listener and serve
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,proposal_governor=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Build the configured store backend
async fn init_store(settings: &Settings) -> anyhow::Result<Arc<dyn GraphStore>> {
    match settings.backend {
        StoreBackend::Memory => {
            warn!("⚠️  Using the in-memory store; records are lost on shutdown");
            Ok(Arc::new(MemoryGraphStore::new()))
        }
        StoreBackend::Postgres => {
            let store = PgGraphStore::connect(&settings.database)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize database pool: {}", e))?;
            store
                .migrate()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to create lifecycle tables: {}", e))?;
            info!("✅ Lifecycle tables initialized");
            Ok(Arc::new(store))
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("📴 Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("📴 Received terminate signal, initiating graceful shutdown...");
        },
    }
}
