use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub application: ApplicationConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub dbus: DbusConfig,
    #[serde(default)]
    pub ipc: IpcConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationConfig {
    /// WM class the tracked window must report, compared exactly.
    #[serde(default = "default_window_class")]
    pub window_class: String,
    #[serde(default = "default_binary_path")]
    pub binary_path: PathBuf,
    #[serde(default = "default_install_url")]
    pub install_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackerConfig {
    #[serde(default = "default_debounce_ms")]
    pub resize_debounce_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub position_debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DbusConfig {
    #[serde(default = "default_bus_name")]
    pub bus_name: String,
    #[serde(default = "default_object_path")]
    pub object_path: String,
    #[serde(default = "default_interface")]
    pub interface: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcConfig {
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// How often the daemon re-reads the store to pick up edits made by
    /// other processes.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".to_string()))
}

fn default_window_class() -> String {
    "com.github.noobaldrin.webling".to_string()
}
fn default_binary_path() -> PathBuf {
    home_dir().join(".local").join("bin").join("webling")
}
fn default_install_url() -> String {
    "https://github.com/noobaldrin/webling".to_string()
}
fn default_debounce_ms() -> u64 {
    350
}
fn default_bus_name() -> String {
    "com.github.noobaldrin.webling".to_string()
}
fn default_object_path() -> String {
    "/com/github/noobaldrin/webling".to_string()
}
fn default_interface() -> String {
    "com.github.noobaldrin.webling".to_string()
}
fn default_socket_path() -> String {
    "/tmp/webling-panel.sock".to_string()
}
fn default_store_path() -> PathBuf {
    home_dir()
        .join(".local")
        .join("state")
        .join("webling-panel")
        .join("geometry.toml")
}
fn default_poll_interval() -> u64 {
    1000
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            window_class: default_window_class(),
            binary_path: default_binary_path(),
            install_url: default_install_url(),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            resize_debounce_ms: default_debounce_ms(),
            position_debounce_ms: default_debounce_ms(),
        }
    }
}

impl TrackerConfig {
    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    pub fn position_debounce(&self) -> Duration {
        Duration::from_millis(self.position_debounce_ms)
    }
}

impl StoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for DbusConfig {
    fn default() -> Self {
        Self {
            bus_name: default_bus_name(),
            object_path: default_object_path(),
            interface: default_interface(),
        }
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            tracker: TrackerConfig::default(),
            dbus: DbusConfig::default(),
            ipc: IpcConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        home_dir()
            .join(".config")
            .join("webling-panel")
            .join("config.toml")
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            let config = Self::default();
            config.save(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}
