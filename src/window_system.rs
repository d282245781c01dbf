use crate::signals::{SignalGuard, SignalTarget, WindowSignal};
use crate::{Rect, WindowId, WorkspaceId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WindowError {
    #[error("Window {0:?} is no longer managed")]
    Gone(WindowId),

    #[error("Window system request failed: {0}")]
    Backend(String),
}

/// Lifecycle events emitted by the window system.
///
/// Per-window events are only delivered while a subscriber holds a guard
/// for that signal on that window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    Created(WindowId),
    SizeChanged(WindowId),
    PositionChanged(WindowId),
    Mapped(WindowId),
    AboveChanged(WindowId),
    Unmanaged(WindowId),
}

impl WindowEvent {
    pub fn window(&self) -> WindowId {
        match *self {
            Self::Created(id)
            | Self::SizeChanged(id)
            | Self::PositionChanged(id)
            | Self::Mapped(id)
            | Self::AboveChanged(id)
            | Self::Unmanaged(id) => id,
        }
    }

    pub fn signal(&self) -> WindowSignal {
        match self {
            Self::Created(_) => WindowSignal::WindowCreated,
            Self::SizeChanged(_) => WindowSignal::SizeChanged,
            Self::PositionChanged(_) => WindowSignal::PositionChanged,
            Self::Mapped(_) => WindowSignal::Mapped,
            Self::AboveChanged(_) => WindowSignal::Above,
            Self::Unmanaged(_) => WindowSignal::Unmanaged,
        }
    }

    pub fn target(&self) -> SignalTarget {
        match self {
            Self::Created(_) => SignalTarget::Display,
            other => SignalTarget::Window(other.window()),
        }
    }
}

/// Handle surface of the window system. Windows are addressed by id; the
/// system owns them and any id may go stale at any time.
pub trait WindowSystem: Send + Sync {
    fn connect(&self, target: SignalTarget, signal: WindowSignal) -> SignalGuard;

    /// Class half of the window's WM class, if it is readable yet.
    fn wm_class(&self, window: WindowId) -> Option<String>;

    /// Absolute frame rectangle, decorations included.
    fn frame_rect(&self, window: WindowId) -> Result<Rect, WindowError>;

    fn has_focus(&self, window: WindowId) -> Result<bool, WindowError>;

    fn workspace(&self, window: WindowId) -> Result<Option<WorkspaceId>, WindowError>;

    fn is_above(&self, window: WindowId) -> Result<bool, WindowError>;

    fn raise_and_focus(&self, window: WindowId) -> Result<(), WindowError>;

    /// Move and resize the frame. `user_op` false means a programmatic
    /// placement the window manager should not animate or constrain as a
    /// user drag.
    fn move_resize_frame(
        &self,
        window: WindowId,
        user_op: bool,
        rect: Rect,
    ) -> Result<(), WindowError>;

    fn move_to_monitor(&self, window: WindowId, monitor: usize) -> Result<(), WindowError>;

    fn change_workspace(&self, window: WindowId, workspace: WorkspaceId)
        -> Result<(), WindowError>;

    fn set_above(&self, window: WindowId, above: bool) -> Result<(), WindowError>;
}

pub trait WorkspaceQuery: Send + Sync {
    fn active_workspace(&self) -> Option<WorkspaceId>;
}
