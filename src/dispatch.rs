use crate::config::DbusConfig;
use log::{debug, warn};
use zbus::{proxy, Connection};

#[proxy(
    interface = "org.freedesktop.DBus",
    default_service = "org.freedesktop.DBus",
    default_path = "/org/freedesktop/DBus"
)]
trait BusDaemon {
    fn name_has_owner(&self, name: &str) -> zbus::Result<bool>;
}

/// Zero-argument methods exported by the Webling application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    Show,
    Toggle,
    Close,
    Debug,
}

impl RemoteCommand {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Show => "Show",
            Self::Toggle => "Toggle",
            Self::Close => "Close",
            Self::Debug => "Debug",
        }
    }
}

/// Result of probing the application endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Running,
    NotRunning,
    /// The bus answered with something that is not a boolean.
    Malformed,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Not connected to the session bus")]
    NoSessionBus,

    #[error("D-Bus call failed: {0}")]
    Transport(#[from] zbus::Error),

    #[error("Unexpected NameHasOwner reply: {0}")]
    MalformedReply(String),
}

#[allow(async_fn_in_trait)]
pub trait Dispatch {
    /// Probe whether the application owns its bus name. Never fails: errors
    /// are logged and folded into the returned [`Presence`].
    async fn presence(&self) -> Presence;

    /// Fire-and-forget call of `command`. Delivery failures are logged.
    fn send(&self, command: RemoteCommand);

    async fn check_running(&self) -> bool {
        self.presence().await == Presence::Running
    }
}

/// Session bus client for the Webling application.
pub struct CommandDispatcher {
    connection: Option<Connection>,
    endpoint: DbusConfig,
}

impl CommandDispatcher {
    /// Connect to the session bus. A missing bus is not fatal: every probe
    /// then reports the application as not running.
    pub async fn connect(endpoint: &DbusConfig) -> Self {
        let connection = match Connection::session().await {
            Ok(connection) => Some(connection),
            Err(e) => {
                warn!("Cannot connect to the session bus: {}", e);
                None
            }
        };

        Self {
            connection,
            endpoint: endpoint.clone(),
        }
    }

    pub fn disconnected(endpoint: &DbusConfig) -> Self {
        Self {
            connection: None,
            endpoint: endpoint.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn name_has_owner(&self) -> Result<bool, DispatchError> {
        let connection = self
            .connection
            .as_ref()
            .ok_or(DispatchError::NoSessionBus)?;

        let bus = BusDaemonProxy::new(connection).await?;
        ownership_reply(bus.name_has_owner(&self.endpoint.bus_name).await)
    }
}

fn ownership_reply(reply: zbus::Result<bool>) -> Result<bool, DispatchError> {
    match reply {
        Ok(owned) => Ok(owned),
        // Reply body did not decode as a boolean.
        Err(zbus::Error::Variant(e)) => Err(DispatchError::MalformedReply(e.to_string())),
        Err(e) => Err(e.into()),
    }
}

impl Dispatch for CommandDispatcher {
    async fn presence(&self) -> Presence {
        match self.name_has_owner().await {
            Ok(true) => Presence::Running,
            Ok(false) => Presence::NotRunning,
            Err(DispatchError::MalformedReply(reply)) => {
                warn!("Webling presence check returned {}", reply);
                Presence::Malformed
            }
            Err(e) => {
                warn!("Webling presence check failed: {}", e);
                Presence::NotRunning
            }
        }
    }

    fn send(&self, command: RemoteCommand) {
        let Some(connection) = self.connection.clone() else {
            warn!("Not sending {}: no session bus", command.method_name());
            return;
        };
        let endpoint = self.endpoint.clone();

        tokio::spawn(async move {
            debug!("Calling {}.{}", endpoint.interface, command.method_name());
            let result = connection
                .call_method(
                    Some(endpoint.bus_name.as_str()),
                    endpoint.object_path.as_str(),
                    Some(endpoint.interface.as_str()),
                    command.method_name(),
                    &(),
                )
                .await;

            if let Err(e) = result {
                warn!("Webling {} call failed: {}", command.method_name(), e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_method_names() {
        assert_eq!(RemoteCommand::Show.method_name(), "Show");
        assert_eq!(RemoteCommand::Toggle.method_name(), "Toggle");
        assert_eq!(RemoteCommand::Close.method_name(), "Close");
        assert_eq!(RemoteCommand::Debug.method_name(), "Debug");
    }

    #[test]
    fn test_undecodable_ownership_reply_is_malformed() {
        let reply = Err(zbus::Error::Variant(zbus::zvariant::Error::IncorrectType));
        assert_matches!(ownership_reply(reply), Err(DispatchError::MalformedReply(_)));

        let reply = Err(zbus::Error::InterfaceNotFound);
        assert_matches!(ownership_reply(reply), Err(DispatchError::Transport(_)));
        assert_matches!(ownership_reply(Ok(true)), Ok(true));
    }

    #[tokio::test]
    async fn test_disconnected_dispatcher_reports_not_running() {
        let dispatcher = CommandDispatcher::disconnected(&DbusConfig::default());

        assert!(!dispatcher.is_connected());
        assert_eq!(dispatcher.presence().await, Presence::NotRunning);
        assert!(!dispatcher.check_running().await);
        dispatcher.send(RemoteCommand::Toggle);
    }
}
