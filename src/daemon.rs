use log::{error, info};
use std::path::PathBuf;
use tokio::signal;
use webling_panel::{Config, PanelService, Result};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    info!("Starting webling-panel daemon");

    let config_path = std::env::var_os("WEBLING_PANEL_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_path);

    let config = Config::load(&config_path)?;
    let mut service = PanelService::new(config).await?;

    tokio::select! {
        result = service.run() => {
            if let Err(e) = result {
                error!("Panel error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }
    service.shutdown();

    Ok(())
}
