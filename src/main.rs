use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use autoaccept::api;
use autoaccept::capture::{CommandCapture, FrameSource, ScreenCapture};
use autoaccept::click::{Clicker, SystemClicker};
use autoaccept::config::Config;
use autoaccept::events::EventHub;
use autoaccept::monitor::Monitor;
use autoaccept::templates::AssetTemplates;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!(
        "autoaccept starting, profile: {}, listen: {}, auto-watch: {}",
        config.profile.name,
        config.listen_addr,
        config.auto_watch,
    );

    let store = AssetTemplates::with_default_dirs(config.assets_dir.as_deref());
    tracing::info!("template search path: {:?}", store.dirs());

    let capture: Arc<dyn FrameSource> = match &config.capture_command {
        Some(cmd) => {
            tracing::info!("capture command: {cmd}");
            Arc::new(CommandCapture::new(cmd.as_str()))
        }
        None => {
            tracing::info!("capturing the primary monitor");
            Arc::new(ScreenCapture)
        }
    };

    let clicker = SystemClicker;
    if !clicker.is_available() {
        tracing::warn!("{} not found, clicks will fail", clicker.backend());
    }

    let monitor = Monitor::from_config(
        &config,
        Arc::new(store),
        capture,
        Arc::new(clicker),
        EventHub::new(),
    );

    if config.auto_watch
        && let Err(e) = monitor.start_auto_watch().await
    {
        tracing::warn!("auto-watch not started: {e}");
    }

    let app = api::router(monitor, config.auth_token.clone()).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.listen_addr)
        .await
        .context(format!("failed to bind to {}", config.listen_addr))?;

    tracing::info!("listening on {}", config.listen_addr);

    axum::serve(listener, app)
        .await
        .context("server error")?;

    Ok(())
}
