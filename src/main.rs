use std::sync::Arc;

use local_engine::config::Config;
use local_engine::engine::Deps;
use local_engine::jobs::JobRunner;
use local_engine::router::EventRouter;
use local_engine::services::{
    GitHubSitePublisher, HttpChatTransport, HttpListingClient, RigGenerator,
};
use local_engine::store::{Database, LibSqlBackend};
use local_engine::webhook::{AppState, build_router};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Arc::new(Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }));

    eprintln!("📍 LocalEngine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", config.model);
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook", config.port);
    eprintln!("   Health: http://0.0.0.0:{}/health", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db_path = std::path::Path::new(&config.db_path);
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(db_path).await.unwrap_or_else(|e| {
            eprintln!(
                "Error: Failed to open database at {}: {}",
                config.db_path, e
            );
            std::process::exit(1);
        }),
    );
    eprintln!("   Database: {}", config.db_path);

    // ── Collaborators ────────────────────────────────────────────────────
    let generator = RigGenerator::new(&config).unwrap_or_else(|e| {
        eprintln!("Error: Failed to create draft generator: {e}");
        std::process::exit(1);
    });

    let deps = Deps {
        db: Arc::clone(&db),
        chat: Arc::new(HttpChatTransport::new(&config)),
        listing: Arc::new(HttpListingClient::new(&config)),
        generator: Arc::new(generator),
        site: Arc::new(GitHubSitePublisher::new(&config)),
        config: Arc::clone(&config),
    };

    eprintln!(
        "   Site publishing: {}",
        if config.site_token.is_some() {
            "enabled"
        } else {
            "disabled (no SITE_API_TOKEN)"
        }
    );

    // ── Background jobs ──────────────────────────────────────────────────
    let _job_handles = JobRunner::new(deps.clone()).spawn_all();
    eprintln!("   Jobs: review poll, expiry sweep, weekly digest\n");

    // ── Webhook server ───────────────────────────────────────────────────
    let state = AppState {
        config: Arc::clone(&config),
        db,
        router: Arc::new(EventRouter::new(deps)),
    };
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    tracing::info!(port = config.port, "Webhook server started");
    axum::serve(listener, app).await?;

    Ok(())
}
