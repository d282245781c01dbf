use clap::{Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use webling_panel::ipc::IpcClient;
use webling_panel::{Config, PanelService, Result};

#[derive(Parser)]
#[command(name = "webling-panel")]
#[command(about = "Panel button that tracks and controls the Webling window")]
struct Cli {
    #[arg(short, long, help = "Configuration file path")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Run the panel daemon in the foreground")]
    Start,
    #[command(about = "Click the panel button")]
    Click {
        #[arg(value_parser = ["primary", "middle", "secondary"], default_value = "primary")]
        button: String,
    },
    #[command(about = "Set the always-on-top switch")]
    Pin {
        #[arg(value_parser = ["on", "off", "toggle"], default_value = "toggle")]
        action: String,
    },
    #[command(about = "Ask Webling to close")]
    Close,
    #[command(about = "Show the tracked window state")]
    Status,
    #[command(about = "Check that the daemon is running")]
    Ping,
    #[command(about = "Stop the panel daemon")]
    Quit,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::default_path);
    let config = Config::load(&config_path)?;
    let socket_path = config.ipc.socket_path.clone();

    let (command, args) = match cli.command {
        Some(Commands::Start) | None => {
            info!("Starting webling-panel");
            let mut service = PanelService::new(config).await?;
            tokio::select! {
                result = service.run() => {
                    if let Err(e) = result {
                        error!("Panel error: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down");
                }
            }
            service.shutdown();
            return Ok(());
        }
        Some(Commands::Click { button }) => ("click", vec![button]),
        Some(Commands::Pin { action }) => ("pin", vec![action]),
        Some(Commands::Close) => ("close", vec![]),
        Some(Commands::Status) => ("status", vec![]),
        Some(Commands::Ping) => ("ping", vec![]),
        Some(Commands::Quit) => ("quit", vec![]),
    };

    if !IpcClient::check_connection(&socket_path).await {
        error!("webling-panel daemon is not running on {}", socket_path);
        std::process::exit(1);
    }

    if !IpcClient::run_command(&socket_path, command, args).await? {
        std::process::exit(1);
    }
    Ok(())
}
