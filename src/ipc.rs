use crate::config::IpcConfig;
use crate::indicator::Button;
use crate::Result;
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};

#[derive(Debug, Serialize, Deserialize)]
pub struct IpcMessage {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub success: bool,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

impl IpcResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinAction {
    On,
    Off,
    Toggle,
}

impl PinAction {
    /// The pin state after applying this action to `current`.
    pub fn apply(self, current: bool) -> bool {
        match self {
            Self::On => true,
            Self::Off => false,
            Self::Toggle => !current,
        }
    }
}

impl FromStr for PinAction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "on" | "true" => Ok(Self::On),
            "off" | "false" => Ok(Self::Off),
            "toggle" => Ok(Self::Toggle),
            other => Err(format!("Unknown pin action: '{}'", other)),
        }
    }
}

/// Commands that need the event loop to answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelCommand {
    Click(Button),
    Pin(PinAction),
    Close,
    Status,
    Quit,
}

#[derive(Debug)]
pub struct PanelRequest {
    pub command: PanelCommand,
    pub reply: oneshot::Sender<IpcResponse>,
}

pub struct IpcServer {
    config: IpcConfig,
    request_sender: mpsc::Sender<PanelRequest>,
}

impl IpcServer {
    pub fn new(config: &IpcConfig, request_sender: mpsc::Sender<PanelRequest>) -> Self {
        Self {
            config: config.clone(),
            request_sender,
        }
    }

    pub async fn start(&self) -> Result<()> {
        let socket_path = &self.config.socket_path;

        if Path::new(socket_path).exists() {
            std::fs::remove_file(socket_path)?;
        }

        let listener = UnixListener::bind(socket_path)?;
        info!("IPC server listening on {}", socket_path);

        let request_sender = self.request_sender.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        debug!("IPC client connected");
                        let sender = request_sender.clone();
                        tokio::spawn(async move {
                            if let Err(e) = Self::handle_client(stream, sender).await {
                                error!("Error handling IPC client: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting IPC connection: {}", e);
                    }
                }
            }
        });

        Ok(())
    }

    async fn handle_client(
        stream: UnixStream,
        request_sender: mpsc::Sender<PanelRequest>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        let client_timeout = Duration::from_secs(30);

        while let Ok(Ok(bytes_read)) = timeout(client_timeout, reader.read_line(&mut line)).await {
            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                line.clear();
                continue;
            }

            debug!("Received IPC message: {}", trimmed);

            let response = match serde_json::from_str::<IpcMessage>(trimmed) {
                Ok(message) => Self::process_message(message, &request_sender).await,
                Err(e) => IpcResponse::error(format!("Invalid JSON: {}", e)),
            };

            let response_json = serde_json::to_string(&response)?;
            writer.write_all(response_json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;

            debug!("Sent response: {}", response_json);
            line.clear();
        }

        debug!("IPC client handler finished");
        Ok(())
    }

    pub(crate) async fn process_message(
        message: IpcMessage,
        request_sender: &mpsc::Sender<PanelRequest>,
    ) -> IpcResponse {
        let command = match Self::parse_command(&message) {
            Ok(Some(command)) => command,
            Ok(None) => return Self::local_response(&message.command),
            Err(response) => return response,
        };

        let (reply, receiver) = oneshot::channel();
        if let Err(e) = request_sender.send(PanelRequest { command, reply }).await {
            return IpcResponse::error(format!("Failed to send command: {}", e));
        }

        match receiver.await {
            Ok(response) => response,
            Err(_) => IpcResponse::error("Panel stopped before answering"),
        }
    }

    /// `Ok(None)` for commands answered without the event loop.
    fn parse_command(
        message: &IpcMessage,
    ) -> std::result::Result<Option<PanelCommand>, IpcResponse> {
        let first_arg = |usage: &str| {
            message
                .args
                .first()
                .map(String::as_str)
                .ok_or_else(|| IpcResponse::error(usage.to_string()))
        };

        let command = match message.command.as_str() {
            "click" => {
                let button = first_arg("click command requires a button argument")?
                    .parse::<Button>()
                    .map_err(IpcResponse::error)?;
                PanelCommand::Click(button)
            }
            "pin" => {
                let action = match message.args.first() {
                    Some(arg) => arg.parse::<PinAction>().map_err(IpcResponse::error)?,
                    None => PinAction::Toggle,
                };
                PanelCommand::Pin(action)
            }
            "close" => PanelCommand::Close,
            "status" => PanelCommand::Status,
            "quit" | "stop" => PanelCommand::Quit,
            "ping" | "help" => return Ok(None),
            other => {
                return Err(IpcResponse::error(format!(
                    "Unknown command: '{}'. Use 'help' to see available commands.",
                    other
                )))
            }
        };

        Ok(Some(command))
    }

    fn local_response(command: &str) -> IpcResponse {
        if command == "ping" {
            return IpcResponse::ok("pong").with_data(serde_json::json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "version": env!("CARGO_PKG_VERSION")
            }));
        }

        IpcResponse::ok("Available commands").with_data(serde_json::json!({
            "commands": [
                {"name": "click", "args": ["primary|middle|secondary"], "description": "Click the panel button"},
                {"name": "pin", "args": ["on|off|toggle"], "description": "Set the always-on-top switch"},
                {"name": "close", "args": [], "description": "Ask Webling to close"},
                {"name": "status", "args": [], "description": "Show the tracked window state"},
                {"name": "ping", "args": [], "description": "Test connection"},
                {"name": "quit", "args": [], "description": "Stop the panel daemon"},
                {"name": "help", "args": [], "description": "Show this help"}
            ]
        }))
    }
}

pub struct IpcClient {
    socket_path: String,
}

impl IpcClient {
    pub fn new(socket_path: String) -> Self {
        Self { socket_path }
    }

    pub async fn send_command(&self, command: &str, args: Vec<String>) -> Result<IpcResponse> {
        let stream = UnixStream::connect(&self.socket_path).await?;
        let (reader, mut writer) = stream.into_split();

        let message = IpcMessage {
            command: command.to_string(),
            args,
        };

        let message_json = serde_json::to_string(&message)?;
        writer.write_all(message_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut response_line = String::new();

        match timeout(Duration::from_secs(10), reader.read_line(&mut response_line)).await {
            Ok(Ok(_)) => Ok(serde_json::from_str(&response_line)?),
            Ok(Err(e)) => Err(anyhow::anyhow!("Failed to read response: {}", e)),
            Err(_) => Err(anyhow::anyhow!("Response timeout")),
        }
    }

    pub async fn ping(&self) -> Result<IpcResponse> {
        self.send_command("ping", vec![]).await
    }

    /// Send one command and print the answer. Returns whether the daemon
    /// reported success.
    pub async fn run_command(socket_path: &str, command: &str, args: Vec<String>) -> Result<bool> {
        let client = IpcClient::new(socket_path.to_string());
        let response = client.send_command(command, args).await?;

        if response.success {
            println!("✓ {}", response.message);
            if let Some(data) = response.data {
                println!("{}", serde_json::to_string_pretty(&data)?);
            }
        } else {
            eprintln!("✗ {}", response.message);
        }

        Ok(response.success)
    }

    pub async fn check_connection(socket_path: &str) -> bool {
        let client = IpcClient::new(socket_path.to_string());
        client.ping().await.is_ok()
    }
}
