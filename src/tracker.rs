use crate::config::TrackerConfig;
use crate::monitor::MonitorLayout;
use crate::signals::{SignalGuard, SignalTarget, WindowSignal};
use crate::store::{
    GeometryStore, PersistedGeometry, KEY_ALWAYS_ON_TOP, KEY_HEIGHT, KEY_POS_X, KEY_POS_Y, KEY_WIDTH,
};
use crate::timer::Timer;
use crate::window_system::{WindowError, WindowEvent, WindowSystem, WorkspaceQuery};
use crate::{Rect, WindowId};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;

/// Collaborators the tracker talks to. All of them are shared with the rest
/// of the service and replaced by doubles in tests.
#[derive(Clone)]
pub struct TrackerContext {
    pub windows: Arc<dyn WindowSystem>,
    pub monitors: Arc<dyn MonitorLayout>,
    pub workspaces: Arc<dyn WorkspaceQuery>,
    pub store: Arc<dyn GeometryStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Bind,
    Resize,
    Position,
}

/// Posted back into the event loop when a tracker timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub kind: TimerKind,
    pub window: WindowId,
    token: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Unbound,
    Bound(WindowId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackerDiagnostics {
    pub window: Option<u32>,
    pub frame: Option<Rect>,
    pub focused: bool,
    pub in_current_workspace: bool,
    pub on_primary_monitor: bool,
    pub pinned: bool,
    pub pending_timers: usize,
    pub torn_down: bool,
}

struct PendingTimer {
    token: u64,
    _timer: Timer,
}

struct BoundWindow {
    id: WindowId,
    // Released together when the window goes away.
    _subscriptions: Vec<SignalGuard>,
    resize: Option<PendingTimer>,
    position: Option<PendingTimer>,
}

/// Tracks the single application window: binds to it when it appears,
/// persists its geometry with debouncing, and restores it when it maps.
pub struct WindowTracker {
    window_class: String,
    ctx: TrackerContext,
    resize_delay: Duration,
    position_delay: Duration,
    timer_tx: mpsc::UnboundedSender<TimerEvent>,
    display_subscription: Option<SignalGuard>,
    pending_binds: HashMap<WindowId, PendingTimer>,
    bound: Option<BoundWindow>,
    next_token: u64,
}

impl WindowTracker {
    /// Returns the tracker and the receiver its timers post to. The event
    /// loop feeds every received [`TimerEvent`] to [`Self::handle_timer`].
    pub fn new(
        window_class: impl Into<String>,
        config: &TrackerConfig,
        ctx: TrackerContext,
    ) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let display_subscription = ctx
            .windows
            .connect(SignalTarget::Display, WindowSignal::WindowCreated);

        let tracker = Self {
            window_class: window_class.into(),
            ctx,
            resize_delay: config.resize_debounce(),
            position_delay: config.position_debounce(),
            timer_tx,
            display_subscription: Some(display_subscription),
            pending_binds: HashMap::new(),
            bound: None,
            next_token: 0,
        };

        (tracker, timer_rx)
    }

    pub fn state(&self) -> TrackerState {
        match &self.bound {
            Some(bound) => TrackerState::Bound(bound.id),
            None => TrackerState::Unbound,
        }
    }

    pub fn bound_window(&self) -> Option<WindowId> {
        self.bound.as_ref().map(|bound| bound.id)
    }

    pub fn is_torn_down(&self) -> bool {
        self.display_subscription.is_none()
    }

    pub fn pending_timers(&self) -> usize {
        let debounces = self.bound.as_ref().map_or(0, |bound| {
            usize::from(bound.resize.is_some()) + usize::from(bound.position.is_some())
        });
        self.pending_binds.len() + debounces
    }

    pub fn handle_window_event(&mut self, event: WindowEvent) {
        if let WindowEvent::Created(window) = event {
            self.on_window_created(window);
            return;
        }

        // Events queued before an unbind still arrive; drop them.
        if self.bound_window() != Some(event.window()) {
            debug!("Ignoring {:?} for untracked window", event);
            return;
        }

        match event {
            WindowEvent::SizeChanged(window) => self.on_size_changed(window),
            WindowEvent::PositionChanged(window) => self.on_position_changed(window),
            WindowEvent::Mapped(window) => self.on_mapped(window),
            WindowEvent::AboveChanged(window) => self.on_above(window),
            WindowEvent::Unmanaged(window) => self.on_unmanaged(window),
            WindowEvent::Created(_) => {}
        }
    }

    pub fn handle_timer(&mut self, event: TimerEvent) {
        match event.kind {
            TimerKind::Bind => {
                let armed = self.pending_binds.get(&event.window).map(|pending| pending.token);
                if armed != Some(event.token) {
                    debug!("Ignoring stale bind check for {:?}", event.window);
                    return;
                }
                self.pending_binds.remove(&event.window);
                self.try_bind(event.window);
            }
            TimerKind::Resize | TimerKind::Position => {
                let Some(bound) = self.bound.as_mut().filter(|bound| bound.id == event.window)
                else {
                    debug!("Ignoring {:?} timer for untracked window", event.kind);
                    return;
                };

                let slot = if event.kind == TimerKind::Resize {
                    &mut bound.resize
                } else {
                    &mut bound.position
                };
                if slot.as_ref().map(|pending| pending.token) != Some(event.token) {
                    debug!("Ignoring stale {:?} timer", event.kind);
                    return;
                }
                *slot = None;

                if event.kind == TimerKind::Resize {
                    self.commit_size(event.window);
                } else {
                    self.commit_position(event.window);
                }
            }
        }
    }

    fn arm(&mut self, kind: TimerKind, window: WindowId, delay: Option<Duration>) -> PendingTimer {
        self.next_token += 1;
        let event = TimerEvent {
            kind,
            window,
            token: self.next_token,
        };
        let sender = self.timer_tx.clone();
        let timer = match delay {
            Some(delay) => Timer::after(delay, sender, event),
            None => Timer::idle(sender, event),
        };

        PendingTimer {
            token: self.next_token,
            _timer: timer,
        }
    }

    fn on_window_created(&mut self, window: WindowId) {
        if self.is_torn_down() {
            return;
        }

        // The class is not reliable until the window finishes initializing,
        // so look at it on the next tick.
        let pending = self.arm(TimerKind::Bind, window, None);
        self.pending_binds.insert(window, pending);
    }

    fn try_bind(&mut self, window: WindowId) {
        match self.ctx.windows.wm_class(window) {
            Some(class) if class == self.window_class => {}
            class => {
                debug!("Window {:?} has class {:?}, not tracking", window, class);
                return;
            }
        }

        if let Some(bound) = &self.bound {
            warn!(
                "Window {:?} matches but {:?} is already tracked, ignoring",
                window, bound.id
            );
            return;
        }

        let target = SignalTarget::Window(window);
        let subscriptions = WindowSignal::PER_WINDOW
            .iter()
            .map(|signal| self.ctx.windows.connect(target, *signal))
            .collect();

        self.bound = Some(BoundWindow {
            id: window,
            _subscriptions: subscriptions,
            resize: None,
            position: None,
        });
        info!("Tracking window {:?} ({})", window, self.window_class);
    }

    fn on_size_changed(&mut self, window: WindowId) {
        if self.bound.as_ref().is_some_and(|bound| bound.resize.is_some()) {
            return;
        }
        let pending = self.arm(TimerKind::Resize, window, Some(self.resize_delay));
        if let Some(bound) = self.bound.as_mut() {
            bound.resize = Some(pending);
        }
    }

    fn on_position_changed(&mut self, window: WindowId) {
        if self.bound.as_ref().is_some_and(|bound| bound.position.is_some()) {
            return;
        }
        let pending = self.arm(TimerKind::Position, window, Some(self.position_delay));
        if let Some(bound) = self.bound.as_mut() {
            bound.position = Some(pending);
        }
    }

    fn commit_size(&self, window: WindowId) {
        let rect = match self.ctx.windows.frame_rect(window) {
            Ok(rect) => rect,
            Err(e) => {
                warn!("Cannot read size of {:?}: {}", window, e);
                return;
            }
        };

        debug!("Persisting size {}x{}", rect.width, rect.height);
        self.write_int(KEY_HEIGHT, rect.height);
        self.write_int(KEY_WIDTH, rect.width);
    }

    fn commit_position(&self, window: WindowId) {
        let rect = match self.ctx.windows.frame_rect(window) {
            Ok(rect) => rect,
            Err(e) => {
                warn!("Cannot read position of {:?}: {}", window, e);
                return;
            }
        };
        let Some(primary) = self.ctx.monitors.primary_rect() else {
            warn!("No primary monitor, not persisting position");
            return;
        };

        if !self.ctx.monitors.is_primary_at(rect.x, rect.y) {
            debug!(
                "Window at ({}, {}) is off the primary monitor, not persisting",
                rect.x, rect.y
            );
            return;
        }

        let (rel_x, rel_y) = relative_position(rect, primary);
        debug!("Persisting position ({}, {})", rel_x, rel_y);
        self.write_int(KEY_POS_X, rel_x);
        self.write_int(KEY_POS_Y, rel_y);
    }

    fn on_mapped(&mut self, window: WindowId) {
        if !self.is_on_primary_monitor() {
            self.move_to_primary_monitor();
        }

        let Some(primary) = self.ctx.monitors.primary_rect() else {
            warn!("No primary monitor, leaving {:?} where it is", window);
            return;
        };
        let geometry = PersistedGeometry::read(self.ctx.store.as_ref());

        report("apply pin state", self.ctx.windows.set_above(window, geometry.pinned));

        // Stored offsets are unvalidated.
        let target = Rect::new(
            primary.x.saturating_add(geometry.pos_x),
            primary.y.saturating_add(geometry.pos_y),
            geometry.width,
            geometry.height,
        );
        debug!("Restoring {:?} to {:?}", window, target);
        report(
            "restore geometry",
            self.ctx.windows.move_resize_frame(window, false, target),
        );
    }

    fn on_above(&self, window: WindowId) {
        match self.ctx.windows.is_above(window) {
            Ok(above) => {
                if let Err(e) = self.ctx.store.set_bool(KEY_ALWAYS_ON_TOP, above) {
                    warn!("Failed to persist pin state: {}", e);
                }
            }
            Err(e) => warn!("Cannot read pin state of {:?}: {}", window, e),
        }
    }

    fn on_unmanaged(&mut self, window: WindowId) {
        // Dropping the bound window releases its signals and debounce timers.
        self.bound = None;
        info!("Window {:?} unmanaged", window);
    }

    fn write_int(&self, key: &str, value: i32) {
        if let Err(e) = self.ctx.store.set_int(key, value) {
            warn!("Failed to persist {}: {}", key, e);
        }
    }

    fn frame_rect(&self) -> Option<Rect> {
        let window = self.bound_window()?;
        match self.ctx.windows.frame_rect(window) {
            Ok(rect) => Some(rect),
            Err(e) => {
                debug!("Cannot read frame of {:?}: {}", window, e);
                None
            }
        }
    }

    pub fn is_focused(&self) -> bool {
        let Some(window) = self.bound_window() else {
            return false;
        };
        self.ctx.windows.has_focus(window).unwrap_or_else(|e| {
            debug!("Cannot read focus of {:?}: {}", window, e);
            false
        })
    }

    pub fn is_in_current_workspace(&self) -> bool {
        let Some(window) = self.bound_window() else {
            return false;
        };
        let Some(active) = self.ctx.workspaces.active_workspace() else {
            return false;
        };

        match self.ctx.windows.workspace(window) {
            Ok(workspace) => workspace == Some(active),
            Err(e) => {
                debug!("Cannot read workspace of {:?}: {}", window, e);
                false
            }
        }
    }

    pub fn is_on_monitor(&self, index: usize) -> bool {
        self.frame_rect()
            .and_then(|rect| self.ctx.monitors.find_monitor_containing(rect.x, rect.y))
            == Some(index)
    }

    pub fn is_on_primary_monitor(&self) -> bool {
        self.is_on_monitor(self.ctx.monitors.primary_index())
    }

    pub fn set_focus(&self) {
        if let Some(window) = self.bound_window() {
            report("focus window", self.ctx.windows.raise_and_focus(window));
        }
    }

    pub fn move_to_current_workspace(&self) {
        let Some(window) = self.bound_window() else {
            return;
        };
        match self.ctx.workspaces.active_workspace() {
            Some(active) => report(
                "change workspace",
                self.ctx.windows.change_workspace(window, active),
            ),
            None => warn!("No active workspace to move {:?} to", window),
        }
    }

    pub fn move_to_primary_monitor(&self) {
        if let Some(window) = self.bound_window() {
            let primary = self.ctx.monitors.primary_index();
            report(
                "move to primary monitor",
                self.ctx.windows.move_to_monitor(window, primary),
            );
        }
    }

    pub fn set_pinned(&self, pinned: bool) {
        if let Some(window) = self.bound_window() {
            report("set pin state", self.ctx.windows.set_above(window, pinned));
        }
    }

    pub fn diagnostics(&self) -> TrackerDiagnostics {
        let pinned = self
            .bound_window()
            .and_then(|window| self.ctx.windows.is_above(window).ok())
            .unwrap_or(false);

        TrackerDiagnostics {
            window: self.bound_window().map(|window| window.0),
            frame: self.frame_rect(),
            focused: self.is_focused(),
            in_current_workspace: self.is_in_current_workspace(),
            on_primary_monitor: self.is_on_primary_monitor(),
            pinned,
            pending_timers: self.pending_timers(),
            torn_down: self.is_torn_down(),
        }
    }

    /// Cancel every timer and release every subscription. Safe to call more
    /// than once and when nothing was ever bound.
    pub fn teardown(&mut self) {
        if self.is_torn_down() && self.bound.is_none() {
            return;
        }

        self.display_subscription = None;
        self.pending_binds.clear();
        self.bound = None;
        info!("Window tracker torn down");
    }
}

/// Offset of `rect` from the monitor origin, clamped so the rectangle stays
/// inside the monitor. The lower bound wins for windows larger than the
/// monitor.
pub fn relative_position(rect: Rect, monitor: Rect) -> (i32, i32) {
    let rel_x = (rect.x - monitor.x).min(monitor.width - rect.width).max(0);
    let rel_y = (rect.y - monitor.y).min(monitor.height - rect.height).max(0);
    (rel_x, rel_y)
}

fn report(action: &str, result: Result<(), WindowError>) {
    if let Err(e) = result {
        warn!("Failed to {}: {}", action, e);
    }
}
