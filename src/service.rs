use crate::dispatch::{CommandDispatcher, Dispatch};
use crate::indicator::{ClickOutcome, Indicator, Launcher};
use crate::ipc::{IpcResponse, IpcServer, PanelCommand, PanelRequest};
use crate::monitor::MonitorLayout;
use crate::store::{GeometryStore, SettingsFile};
use crate::tracker::{TimerEvent, TrackerContext, WindowTracker};
use crate::window_system::{WindowEvent, WindowSystem, WorkspaceQuery};
use crate::x11::X11WindowSystem;
use crate::{Config, Result};
use log::{debug, info, warn};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};

/// Everything the service needs besides its own channels.
pub struct ServiceParts<D: Dispatch> {
    pub config: Config,
    pub windows: Arc<dyn WindowSystem>,
    pub monitors: Arc<dyn MonitorLayout>,
    pub workspaces: Arc<dyn WorkspaceQuery>,
    pub store: Arc<SettingsFile>,
    pub dispatcher: D,
    pub events: mpsc::Receiver<WindowEvent>,
}

/// The daemon: owns the tracker and the indicator and feeds them window
/// events, timer events, IPC requests and store changes from one loop.
pub struct PanelService<D: Dispatch = CommandDispatcher> {
    config: Config,
    tracker: WindowTracker,
    indicator: Indicator<D>,
    store: Arc<SettingsFile>,
    ipc_server: Option<IpcServer>,

    event_rx: mpsc::Receiver<WindowEvent>,
    timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
    request_rx: mpsc::Receiver<PanelRequest>,
    request_tx: mpsc::Sender<PanelRequest>,
    settings_rx: broadcast::Receiver<String>,
}

impl PanelService<CommandDispatcher> {
    /// Connect to the X server and the session bus and open the store.
    pub async fn new(config: Config) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(256);

        let x11 = Arc::new(X11WindowSystem::open(event_tx)?);
        let store = Arc::new(SettingsFile::open(&config.store.path)?);
        let dispatcher = CommandDispatcher::connect(&config.dbus).await;

        let mut service = Self::with_parts(ServiceParts {
            config,
            windows: x11.clone(),
            monitors: x11.clone(),
            workspaces: x11,
            store,
            dispatcher,
            events: event_rx,
        });
        service.ipc_server = Some(IpcServer::new(
            &service.config.ipc,
            service.request_tx.clone(),
        ));

        Ok(service)
    }
}

impl<D: Dispatch> PanelService<D> {
    /// Assemble a service from existing collaborators. No IPC socket is
    /// opened; requests go through [`Self::request_sender`].
    pub fn with_parts(parts: ServiceParts<D>) -> Self {
        let (request_tx, request_rx) = mpsc::channel(32);
        let store = parts.store;
        let settings_rx = store.connect_changed();

        let ctx = TrackerContext {
            windows: parts.windows,
            monitors: parts.monitors,
            workspaces: parts.workspaces,
            store: store.clone(),
        };
        let (tracker, timer_rx) =
            WindowTracker::new(&parts.config.application.window_class, &parts.config.tracker, ctx);
        let indicator = Indicator::new(
            parts.dispatcher,
            store.clone(),
            Launcher::new(&parts.config.application),
        );

        Self {
            config: parts.config,
            tracker,
            indicator,
            store,
            ipc_server: None,
            event_rx: parts.events,
            timer_rx,
            request_rx,
            request_tx,
            settings_rx,
        }
    }

    pub fn request_sender(&self) -> mpsc::Sender<PanelRequest> {
        self.request_tx.clone()
    }

    pub fn tracker(&self) -> &WindowTracker {
        &self.tracker
    }

    pub fn indicator(&self) -> &Indicator<D> {
        &self.indicator
    }

    /// Run until a `quit` request arrives.
    pub async fn run(&mut self) -> Result<()> {
        info!("Starting panel event loop");

        if let Some(server) = &self.ipc_server {
            server.start().await?;
        }

        let mut reload_timer = interval(self.config.store.poll_interval());
        reload_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = self.event_rx.recv() => {
                    debug!("Window event: {:?}", event);
                    self.tracker.handle_window_event(event);
                }
                Some(timer) = self.timer_rx.recv() => {
                    self.tracker.handle_timer(timer);
                }
                Some(request) = self.request_rx.recv() => {
                    let quit = request.command == PanelCommand::Quit;
                    let response = self.handle_command(request.command).await;
                    if request.reply.send(response).is_err() {
                        debug!("IPC client went away before the reply");
                    }
                    if quit {
                        break;
                    }
                }
                changed = self.settings_rx.recv() => match changed {
                    Ok(key) => self.indicator.handle_setting_changed(&key),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Missed {} store notifications, resyncing", skipped);
                        self.indicator.sync_pinned();
                    }
                    Err(RecvError::Closed) => {
                        self.settings_rx = self.store.connect_changed();
                    }
                },
                _ = reload_timer.tick() => {
                    if let Err(e) = self.store.reload() {
                        warn!("Failed to reload store: {}", e);
                    }
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    async fn handle_command(&mut self, command: PanelCommand) -> IpcResponse {
        debug!("Handling command: {:?}", command);

        match command {
            PanelCommand::Click(button) => {
                let outcome = self.indicator.on_click(button, &self.tracker).await;
                Self::click_response(outcome)
            }
            PanelCommand::Pin(action) => {
                let pinned = action.apply(self.indicator.is_pinned());
                self.indicator.set_pinned(pinned, &self.tracker);
                let message = if pinned {
                    "Always on top enabled"
                } else {
                    "Always on top disabled"
                };
                IpcResponse::ok(message).with_data(serde_json::json!({ "pinned": pinned }))
            }
            PanelCommand::Close => {
                self.indicator.close();
                IpcResponse::ok("Close requested")
            }
            PanelCommand::Status => IpcResponse::ok("Panel status").with_data(serde_json::json!({
                "tracker": self.tracker.diagnostics(),
                "pinned": self.indicator.is_pinned(),
                "menu": self.indicator.menu_state(),
                "store": self.store.path().map(Path::display).map(|p| p.to_string()),
            })),
            PanelCommand::Quit => IpcResponse::ok("Shutting down"),
        }
    }

    fn click_response(outcome: ClickOutcome) -> IpcResponse {
        let response = if outcome.is_success() {
            IpcResponse::ok(outcome.describe())
        } else {
            IpcResponse::error(outcome.describe())
        };

        match outcome {
            ClickOutcome::MenuOpened(menu) => response.with_data(serde_json::json!({ "menu": menu })),
            ClickOutcome::Debugged(diagnostics) => {
                response.with_data(serde_json::json!({ "tracker": diagnostics }))
            }
            ClickOutcome::BinaryMissing { path, install_url } => {
                response.with_data(serde_json::json!({
                    "path": path.display().to_string(),
                    "install_url": install_url,
                }))
            }
            _ => response,
        }
    }

    /// Tear the tracker down and remove the socket. Safe to call again.
    pub fn shutdown(&mut self) {
        if self.tracker.is_torn_down() {
            return;
        }
        self.tracker.teardown();

        if self.ipc_server.is_some() {
            let socket_path = Path::new(&self.config.ipc.socket_path);
            if socket_path.exists() {
                if let Err(e) = std::fs::remove_file(socket_path) {
                    warn!("Failed to remove socket {:?}: {}", socket_path, e);
                }
            }
        }
        info!("Panel stopped");
    }
}
