use crate::config::ApplicationConfig;
use crate::dispatch::{Dispatch, Presence, RemoteCommand};
use crate::store::{GeometryStore, KEY_ALWAYS_ON_TOP};
use crate::tracker::{TrackerDiagnostics, WindowTracker};
use log::{debug, info, warn};
use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

const MENU_ITEMS: [&str; 3] = ["Always On Top", "Preferences", "Close"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Button {
    Primary,
    Middle,
    Secondary,
}

impl FromStr for Button {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" | "left" | "1" => Ok(Self::Primary),
            "middle" | "debug" | "2" => Ok(Self::Middle),
            "secondary" | "right" | "3" => Ok(Self::Secondary),
            other => Err(format!("Unknown button: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuState {
    pub open: bool,
    pub always_on_top: bool,
    pub items: Vec<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// The presence probe answered with something unusable.
    Aborted,
    Launched,
    BinaryMissing { path: PathBuf, install_url: String },
    LaunchFailed(String),
    Shown,
    Toggled,
    MenuOpened(MenuState),
    Debugged(TrackerDiagnostics),
}

impl ClickOutcome {
    pub fn describe(&self) -> String {
        match self {
            Self::Aborted => "Presence check failed, click ignored".to_string(),
            Self::Launched => "Webling launching".to_string(),
            Self::BinaryMissing { path, install_url } => format!(
                "The application {} is not found. Install it from {}",
                path.display(),
                install_url
            ),
            Self::LaunchFailed(reason) => format!("Failed to launch Webling: {}", reason),
            Self::Shown => "Moved to the current workspace and shown".to_string(),
            Self::Toggled => "Toggled".to_string(),
            Self::MenuOpened(_) => "Menu opened".to_string(),
            Self::Debugged(_) => "Debug requested".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            Self::Aborted | Self::BinaryMissing { .. } | Self::LaunchFailed(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Binary {path} not found")]
    Missing { path: PathBuf },

    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Starts the application binary when it is not running.
#[derive(Debug, Clone)]
pub struct Launcher {
    binary: PathBuf,
    install_url: String,
}

impl Launcher {
    pub fn new(config: &ApplicationConfig) -> Self {
        Self {
            binary: config.binary_path.clone(),
            install_url: config.install_url.clone(),
        }
    }

    pub fn binary(&self) -> &PathBuf {
        &self.binary
    }

    pub fn install_url(&self) -> &str {
        &self.install_url
    }

    /// Path of the binary if it exists and is executable.
    pub fn locate(&self) -> Option<PathBuf> {
        which::which(&self.binary).ok()
    }

    pub fn launch(&self) -> Result<(), LaunchError> {
        let path = self.locate().ok_or_else(|| LaunchError::Missing {
            path: self.binary.clone(),
        })?;

        tokio::process::Command::new(&path)
            .stdin(std::process::Stdio::null())
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: path.clone(),
                source,
            })?;

        info!("Webling launching from {:?}", path);
        Ok(())
    }
}

/// The panel button: turns clicks into tracker commands and remote calls,
/// and keeps the pin toggle in step with the store.
pub struct Indicator<D: Dispatch> {
    dispatcher: D,
    store: Arc<dyn GeometryStore>,
    launcher: Launcher,
    pinned: bool,
    menu_open: bool,
}

impl<D: Dispatch> Indicator<D> {
    pub fn new(dispatcher: D, store: Arc<dyn GeometryStore>, launcher: Launcher) -> Self {
        let pinned = store.get_bool(KEY_ALWAYS_ON_TOP);
        Self {
            dispatcher,
            store,
            launcher,
            pinned,
            menu_open: false,
        }
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn menu_state(&self) -> MenuState {
        MenuState {
            open: self.menu_open,
            always_on_top: self.pinned,
            items: MENU_ITEMS.to_vec(),
        }
    }

    pub async fn on_click(&mut self, button: Button, tracker: &WindowTracker) -> ClickOutcome {
        let presence = self.dispatcher.presence().await;
        if presence == Presence::Malformed {
            debug!("Ignoring {:?} click after malformed presence reply", button);
            return ClickOutcome::Aborted;
        }

        match button {
            Button::Primary => {
                self.menu_open = false;
                if presence != Presence::Running {
                    return self.launch();
                }
                self.activate(tracker).await
            }
            Button::Secondary => {
                self.menu_open = true;
                ClickOutcome::MenuOpened(self.menu_state())
            }
            Button::Middle => {
                self.menu_open = false;
                tokio::task::yield_now().await;
                self.dispatcher.send(RemoteCommand::Debug);

                let diagnostics = tracker.diagnostics();
                match diagnostics.window {
                    Some(window) => debug!("Tracker bound to {:#x}: {:?}", window, diagnostics),
                    None => debug!("Tracker has no window: {:?}", diagnostics),
                }
                ClickOutcome::Debugged(diagnostics)
            }
        }
    }

    async fn activate(&mut self, tracker: &WindowTracker) -> ClickOutcome {
        if !tracker.is_focused() {
            tracker.set_focus();
        }

        // Give the window manager a tick to apply local changes before the
        // application reacts.
        if !tracker.is_in_current_workspace() {
            tracker.move_to_current_workspace();
            tokio::task::yield_now().await;
            self.dispatcher.send(RemoteCommand::Show);
            ClickOutcome::Shown
        } else {
            tokio::task::yield_now().await;
            self.dispatcher.send(RemoteCommand::Toggle);
            ClickOutcome::Toggled
        }
    }

    fn launch(&self) -> ClickOutcome {
        match self.launcher.launch() {
            Ok(()) => ClickOutcome::Launched,
            Err(LaunchError::Missing { path }) => {
                warn!(
                    "Webling binary {:?} is missing, install it from {}",
                    path,
                    self.launcher.install_url()
                );
                ClickOutcome::BinaryMissing {
                    path,
                    install_url: self.launcher.install_url().to_string(),
                }
            }
            Err(e) => {
                warn!("{}", e);
                ClickOutcome::LaunchFailed(e.to_string())
            }
        }
    }

    /// Menu switch: persist the pin state and apply it to the window.
    pub fn set_pinned(&mut self, pinned: bool, tracker: &WindowTracker) {
        self.pinned = pinned;
        if let Err(e) = self.store.set_bool(KEY_ALWAYS_ON_TOP, pinned) {
            warn!("Failed to persist pin state: {}", e);
        }
        tracker.set_pinned(pinned);
    }

    pub fn close(&mut self) {
        self.menu_open = false;
        self.dispatcher.send(RemoteCommand::Close);
    }

    /// Re-read the pin state after a store change notification.
    pub fn handle_setting_changed(&mut self, key: &str) {
        if key == KEY_ALWAYS_ON_TOP {
            self.sync_pinned();
        }
    }

    pub fn sync_pinned(&mut self) {
        let pinned = self.store.get_bool(KEY_ALWAYS_ON_TOP);
        if pinned != self.pinned {
            debug!("Pin toggle now {}", pinned);
        }
        self.pinned = pinned;
    }
}
