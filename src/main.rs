use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::governor::GovernorConfigBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};

use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use artbot::{config::Config, handlers, routes, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    tracing::info!("✅ Configuration loaded successfully");

    let state = AppState::new(&config).await?;
    tracing::info!("✅ AppState initialized");

    let webhook_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(50)
            .use_headers()
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid governor configuration"))?,
    );

    let app = Router::new()
        .route("/health", axum::routing::get(handlers::health::health))
        .merge(routes::chat_routes(state.clone()))
        .merge(
            routes::webhook_routes(state.clone())
                .layer(tower_governor::GovernorLayer::new(webhook_governor_conf)),
        )
        .merge(routes::admin_routes(state.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::default().include_headers(false))
                        .on_request(DefaultOnRequest::default().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::default().level(Level::DEBUG))
                        .on_failure(DefaultOnFailure::default().level(Level::ERROR)),
                )
                .layer(RequestBodyLimitLayer::new(256 * 1024)),
        );

    let maintenance_state = state.clone();
    let interval = config.maintenance_interval;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            tracing::info!("🧹 Running scheduled maintenance...");
            match maintenance_state.run_maintenance().await {
                Ok(report) => {
                    tracing::info!(
                        "✅ Maintenance completed: {} subscriptions expired, {} rate windows and {} sessions pruned",
                        report.expired_subscriptions,
                        report.idle_rate_windows,
                        report.idle_sessions
                    );
                }
                Err(e) => {
                    tracing::error!("❌ Maintenance failed: {}", e);
                }
            }
        }
    });

    let addr = config.bind_addr;
    tracing::info!("🚀 Server listening on http://{}", addr);
    tracing::info!("✅ Background maintenance started (every {:?})", interval);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
