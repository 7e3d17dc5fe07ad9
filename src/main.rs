use consent_engine::config::AppConfig;
use consent_engine::expiry::ExpiryMonitor;
use consent_engine::{app, state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "consent_engine=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env()?;
    let sweep_interval = config.expiry_sweep_interval;
    let port = config.port;

    let app_state = state::AppState::init(config).await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&app_state.db).await {
        tracing::warn!(error = %e, "migrations folder not found or migration failed; continuing");
    }

    let monitor = ExpiryMonitor::start(app_state.clone(), sweep_interval);

    let app = app::build_app(app_state);
    let result = app::serve(app, port).await;

    monitor.stop().await;
    result
}
