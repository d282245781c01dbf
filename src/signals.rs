//! Scoped signal subscriptions.
//!
//! A backend owns a [`SignalRegistry`] and only forwards an event when some
//! subscriber holds a live [`SignalGuard`] for it. Dropping the guard (or
//! calling [`SignalGuard::disconnect`]) releases the subscription, so a
//! subscriber cannot leak one on any exit path.

use crate::WindowId;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalTarget {
    Display,
    Window(WindowId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowSignal {
    WindowCreated,
    SizeChanged,
    PositionChanged,
    Mapped,
    Above,
    Unmanaged,
}

impl WindowSignal {
    pub const PER_WINDOW: [WindowSignal; 5] = [
        WindowSignal::SizeChanged,
        WindowSignal::PositionChanged,
        WindowSignal::Mapped,
        WindowSignal::Unmanaged,
        WindowSignal::Above,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::WindowCreated => "window-created",
            Self::SizeChanged => "size-changed",
            Self::PositionChanged => "position-changed",
            Self::Mapped => "notify::mapped",
            Self::Above => "notify::above",
            Self::Unmanaged => "unmanaged",
        }
    }
}

type Connections = HashMap<(SignalTarget, WindowSignal), usize>;

#[derive(Debug, Clone, Default)]
pub struct SignalRegistry {
    connections: Arc<Mutex<Connections>>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, target: SignalTarget, signal: WindowSignal) -> SignalGuard {
        *lock(&self.connections).entry((target, signal)).or_insert(0) += 1;
        debug!("Connected {} on {:?}", signal.name(), target);

        SignalGuard {
            connections: Arc::downgrade(&self.connections),
            key: Some((target, signal)),
        }
    }

    pub fn is_connected(&self, target: SignalTarget, signal: WindowSignal) -> bool {
        lock(&self.connections).contains_key(&(target, signal))
    }

    /// Number of live subscriptions on a target, counting duplicates.
    pub fn connection_count(&self, target: SignalTarget) -> usize {
        lock(&self.connections)
            .iter()
            .filter(|((t, _), _)| *t == target)
            .map(|(_, count)| *count)
            .sum()
    }

    /// True when any signal is connected on the window.
    pub fn is_watched(&self, window: WindowId) -> bool {
        self.connection_count(SignalTarget::Window(window)) > 0
    }
}

fn lock(connections: &Mutex<Connections>) -> MutexGuard<'_, Connections> {
    connections.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live subscription. Disconnects on drop.
#[derive(Debug)]
#[must_use = "dropping a SignalGuard disconnects the signal immediately"]
pub struct SignalGuard {
    connections: Weak<Mutex<Connections>>,
    key: Option<(SignalTarget, WindowSignal)>,
}

impl SignalGuard {
    pub fn is_connected(&self) -> bool {
        self.key.is_some()
    }

    /// Release the subscription. Calling this again is a no-op.
    pub fn disconnect(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        // Registry already gone: nothing left to release.
        let Some(connections) = self.connections.upgrade() else {
            return;
        };

        let mut connections = lock(&connections);
        if let Some(count) = connections.get_mut(&key) {
            *count -= 1;
            if *count == 0 {
                connections.remove(&key);
            }
        }
        debug!("Disconnected {} on {:?}", key.1.name(), key.0);
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.disconnect();
    }
}
