//! Qihang advisor gateway server
//!
//! Serves the streaming chat relay at `/api/chat` and forwards
//! `/api/proxy/*` to the platform backend.

use std::net::SocketAddr;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qihang_advisor::config::{AgentKind, Config, Directives};
use qihang_advisor::providers::Provider;
use qihang_advisor::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qihang_advisor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let directives = Directives::load(config.prompts_dir.as_deref()).await?;
    for agent in AgentKind::ALL {
        if !directives.is_builtin(agent) {
            tracing::info!("📝 Using custom directive for {}", agent);
        }
    }

    let gateway = Provider::from_config(&config)?;
    tracing::info!(
        "🤖 Model gateway: {} ({})",
        gateway.name(),
        config.llm_model
    );
    tracing::info!(
        "🔀 Proxying /api/proxy/* to {}{}",
        config.backend_url,
        config.backend_path_prefix
    );

    let state = AppState::new(config, gateway, directives)?;
    let app = qihang_advisor::app(state);

    tracing::info!("🔥 Qihang advisor running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
