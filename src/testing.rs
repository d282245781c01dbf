//! Test doubles for the window system, workspace query, store and dispatcher.

use crate::config::TrackerConfig;
use crate::dispatch::{Dispatch, Presence, RemoteCommand};
use crate::monitor::{MonitorLayout, MonitorSnapshot};
use crate::signals::{SignalGuard, SignalRegistry, SignalTarget, WindowSignal};
use crate::store::{GeometryStore, PersistedGeometry, SettingsFile, StoreError};
use crate::tracker::{TimerEvent, TrackerContext, WindowTracker};
use crate::window_system::{WindowError, WindowSystem, WorkspaceQuery};
use crate::{Rect, WindowId, WorkspaceId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

pub const APP_CLASS: &str = "com.github.noobaldrin.webling";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    RaiseAndFocus(WindowId),
    MoveResize(WindowId, bool, Rect),
    MoveToMonitor(WindowId, usize),
    ChangeWorkspace(WindowId, WorkspaceId),
    SetAbove(WindowId, bool),
}

#[derive(Debug, Clone)]
struct FakeWindow {
    class: Option<String>,
    rect: Rect,
    focused: bool,
    workspace: Option<WorkspaceId>,
    above: bool,
}

#[derive(Default)]
struct FakeState {
    windows: HashMap<WindowId, FakeWindow>,
    calls: Vec<Call>,
}

pub struct FakeWindowSystem {
    registry: SignalRegistry,
    layout: MonitorSnapshot,
    state: Mutex<FakeState>,
}

impl FakeWindowSystem {
    pub fn new(layout: MonitorSnapshot) -> Self {
        Self {
            registry: SignalRegistry::new(),
            layout,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn registry(&self) -> &SignalRegistry {
        &self.registry
    }

    pub fn add_window(&self, id: WindowId, class: Option<&str>, rect: Rect) {
        self.state.lock().unwrap().windows.insert(
            id,
            FakeWindow {
                class: class.map(str::to_string),
                rect,
                focused: false,
                workspace: Some(WorkspaceId(0)),
                above: false,
            },
        );
    }

    pub fn remove_window(&self, id: WindowId) {
        self.state.lock().unwrap().windows.remove(&id);
    }

    fn with_window<T>(
        &self,
        id: WindowId,
        f: impl FnOnce(&mut FakeWindow) -> T,
    ) -> Result<T, WindowError> {
        let mut state = self.state.lock().unwrap();
        state.windows.get_mut(&id).map(f).ok_or(WindowError::Gone(id))
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    pub fn set_class(&self, id: WindowId, class: &str) {
        self.with_window(id, |w| w.class = Some(class.to_string())).unwrap();
    }

    pub fn set_rect(&self, id: WindowId, rect: Rect) {
        self.with_window(id, |w| w.rect = rect).unwrap();
    }

    pub fn set_focus_state(&self, id: WindowId, focused: bool) {
        self.with_window(id, |w| w.focused = focused).unwrap();
    }

    pub fn set_workspace(&self, id: WindowId, workspace: Option<WorkspaceId>) {
        self.with_window(id, |w| w.workspace = workspace).unwrap();
    }

    pub fn set_above_state(&self, id: WindowId, above: bool) {
        self.with_window(id, |w| w.above = above).unwrap();
    }

    pub fn rect(&self, id: WindowId) -> Rect {
        self.with_window(id, |w| w.rect).unwrap()
    }

    pub fn above(&self, id: WindowId) -> bool {
        self.with_window(id, |w| w.above).unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }
}

impl WindowSystem for FakeWindowSystem {
    fn connect(&self, target: SignalTarget, signal: WindowSignal) -> SignalGuard {
        self.registry.connect(target, signal)
    }

    fn wm_class(&self, window: WindowId) -> Option<String> {
        self.with_window(window, |w| w.class.clone()).ok().flatten()
    }

    fn frame_rect(&self, window: WindowId) -> Result<Rect, WindowError> {
        self.with_window(window, |w| w.rect)
    }

    fn has_focus(&self, window: WindowId) -> Result<bool, WindowError> {
        self.with_window(window, |w| w.focused)
    }

    fn workspace(&self, window: WindowId) -> Result<Option<WorkspaceId>, WindowError> {
        self.with_window(window, |w| w.workspace)
    }

    fn is_above(&self, window: WindowId) -> Result<bool, WindowError> {
        self.with_window(window, |w| w.above)
    }

    fn raise_and_focus(&self, window: WindowId) -> Result<(), WindowError> {
        self.with_window(window, |w| w.focused = true)?;
        self.record(Call::RaiseAndFocus(window));
        Ok(())
    }

    fn move_resize_frame(
        &self,
        window: WindowId,
        user_op: bool,
        rect: Rect,
    ) -> Result<(), WindowError> {
        self.with_window(window, |w| w.rect = rect)?;
        self.record(Call::MoveResize(window, user_op, rect));
        Ok(())
    }

    fn move_to_monitor(&self, window: WindowId, monitor: usize) -> Result<(), WindowError> {
        let target = self
            .layout
            .monitor_rect(monitor)
            .ok_or_else(|| WindowError::Backend(format!("no monitor {monitor}")))?;
        self.with_window(window, |w| {
            w.rect.x = target.x;
            w.rect.y = target.y;
        })?;
        self.record(Call::MoveToMonitor(window, monitor));
        Ok(())
    }

    fn change_workspace(
        &self,
        window: WindowId,
        workspace: WorkspaceId,
    ) -> Result<(), WindowError> {
        self.with_window(window, |w| w.workspace = Some(workspace))?;
        self.record(Call::ChangeWorkspace(window, workspace));
        Ok(())
    }

    fn set_above(&self, window: WindowId, above: bool) -> Result<(), WindowError> {
        self.with_window(window, |w| w.above = above)?;
        self.record(Call::SetAbove(window, above));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeWorkspaces {
    active: Mutex<Option<WorkspaceId>>,
}

impl FakeWorkspaces {
    pub fn set_active(&self, workspace: Option<WorkspaceId>) {
        *self.active.lock().unwrap() = workspace;
    }
}

impl WorkspaceQuery for FakeWorkspaces {
    fn active_workspace(&self) -> Option<WorkspaceId> {
        *self.active.lock().unwrap()
    }
}

/// In-memory store that remembers every integer write, including writes of
/// an unchanged value.
pub struct RecordingStore {
    inner: SettingsFile,
    int_writes: Mutex<Vec<(String, i32)>>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self {
            inner: SettingsFile::in_memory(),
            int_writes: Mutex::new(Vec::new()),
        }
    }

    pub fn seed(&self, pos_x: i32, pos_y: i32, width: i32, height: i32, pinned: bool) {
        PersistedGeometry {
            pos_x,
            pos_y,
            width,
            height,
            pinned,
        }
        .write(&self.inner)
        .unwrap();
    }

    pub fn writes_of(&self, key: &str) -> Vec<i32> {
        self.int_writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, value)| *value)
            .collect()
    }
}

impl GeometryStore for RecordingStore {
    fn get_int(&self, key: &str) -> i32 {
        self.inner.get_int(key)
    }

    fn set_int(&self, key: &str, value: i32) -> Result<(), StoreError> {
        self.int_writes.lock().unwrap().push((key.to_string(), value));
        self.inner.set_int(key, value)
    }

    fn get_bool(&self, key: &str) -> bool {
        self.inner.get_bool(key)
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.inner.set_bool(key, value)
    }

    fn connect_changed(&self) -> broadcast::Receiver<String> {
        self.inner.connect_changed()
    }
}

pub struct TrackerHarness {
    pub tracker: WindowTracker,
    pub timers: mpsc::UnboundedReceiver<TimerEvent>,
    pub windows: Arc<FakeWindowSystem>,
    pub workspaces: Arc<FakeWorkspaces>,
    pub store: Arc<RecordingStore>,
}

impl TrackerHarness {
    pub fn new(layout: MonitorSnapshot) -> Self {
        let windows = Arc::new(FakeWindowSystem::new(layout.clone()));
        let workspaces = Arc::new(FakeWorkspaces::default());
        workspaces.set_active(Some(WorkspaceId(0)));
        let store = Arc::new(RecordingStore::new());

        let ctx = TrackerContext {
            windows: windows.clone(),
            monitors: Arc::new(layout),
            workspaces: workspaces.clone(),
            store: store.clone(),
        };
        let (tracker, timers) = WindowTracker::new(APP_CLASS, &TrackerConfig::default(), ctx);

        Self {
            tracker,
            timers,
            windows,
            workspaces,
            store,
        }
    }

    /// Wait for the next tracker timer and hand it to the tracker.
    pub async fn run_next_timer(&mut self) -> TimerEvent {
        let event = self.timers.recv().await.unwrap();
        self.tracker.handle_timer(event);
        event
    }

    /// Create a window with the tracked class and let the tracker bind it.
    pub async fn bind(&mut self, id: WindowId, rect: Rect) -> WindowId {
        self.windows.add_window(id, Some(APP_CLASS), rect);
        self.tracker
            .handle_window_event(crate::window_system::WindowEvent::Created(id));
        self.run_next_timer().await;
        assert_eq!(self.tracker.bound_window(), Some(id));
        id
    }
}

#[derive(Default)]
pub struct FakeDispatcher {
    presence: Mutex<Option<Presence>>,
    sent: Mutex<Vec<RemoteCommand>>,
    probes: Mutex<usize>,
}

impl FakeDispatcher {
    pub fn with_presence(presence: Presence) -> Self {
        let dispatcher = Self::default();
        dispatcher.set_presence(presence);
        dispatcher
    }

    pub fn set_presence(&self, presence: Presence) {
        *self.presence.lock().unwrap() = Some(presence);
    }

    pub fn sent(&self) -> Vec<RemoteCommand> {
        self.sent.lock().unwrap().clone()
    }

    pub fn probes(&self) -> usize {
        *self.probes.lock().unwrap()
    }
}

impl Dispatch for FakeDispatcher {
    async fn presence(&self) -> Presence {
        *self.probes.lock().unwrap() += 1;
        self.presence.lock().unwrap().unwrap_or(Presence::NotRunning)
    }

    fn send(&self, command: RemoteCommand) {
        self.sent.lock().unwrap().push(command);
    }
}
