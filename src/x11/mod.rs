pub mod events;

use crate::monitor::{MonitorLayout, MonitorSnapshot};
use crate::signals::{SignalGuard, SignalRegistry, SignalTarget, WindowSignal};
use crate::tracker::relative_position;
use crate::window_system::{WindowError, WindowEvent, WindowSystem, WorkspaceQuery};
use crate::{Rect, Result, WindowId, WorkspaceId};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;
use x11rb::connection::Connection;
use x11rb::errors::{ConnectionError, ReplyError};
use x11rb::protocol::randr::ConnectionExt as _;
use x11rb::protocol::xproto::{
    AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, ConnectionExt as _, EventMask,
    GetPropertyReply, Window,
};
use x11rb::protocol::ErrorKind;
use x11rb::rust_connection::RustConnection;

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        _NET_ACTIVE_WINDOW,
        _NET_CURRENT_DESKTOP,
        _NET_WM_DESKTOP,
        _NET_WM_STATE,
        _NET_WM_STATE_ABOVE,
        _NET_MOVERESIZE_WINDOW,
        _NET_FRAME_EXTENTS,
    }
}

/// `_NET_WM_DESKTOP` value of windows shown on every desktop.
const ALL_DESKTOPS: u32 = 0xFFFF_FFFF;

/// Source indication for EWMH requests.
const SOURCE_APPLICATION: u32 = 1;
const SOURCE_PAGER: u32 = 2;

const NET_WM_STATE_REMOVE: u32 = 0;
const NET_WM_STATE_ADD: u32 = 1;

const GRAVITY_NORTH_WEST: u32 = 1;
const MOVERESIZE_ALL_FIELDS: u32 = 0b1111 << 8;

/// Decoration sizes from `_NET_FRAME_EXTENTS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameExtents {
    pub left: i32,
    pub right: i32,
    pub top: i32,
    pub bottom: i32,
}

impl FrameExtents {
    fn from_values(values: &[u32]) -> Self {
        let value = |i: usize| values.get(i).map_or(0, |v| i32::try_from(*v).unwrap_or(0));
        Self {
            left: value(0),
            right: value(1),
            top: value(2),
            bottom: value(3),
        }
    }

    /// Outer frame of a client area at absolute `client`.
    pub fn frame_of(&self, client: Rect) -> Rect {
        Rect::new(
            client.x - self.left,
            client.y - self.top,
            client.width + self.left + self.right,
            client.height + self.top + self.bottom,
        )
    }
}

/// Payload of a `_NET_MOVERESIZE_WINDOW` request placing the frame at
/// `frame`. Position is the outer frame corner, size is the client size.
pub fn moveresize_data(frame: Rect, extents: FrameExtents, user_op: bool) -> [u32; 5] {
    let source = if user_op {
        SOURCE_PAGER
    } else {
        SOURCE_APPLICATION
    };
    let width = frame
        .width
        .saturating_sub(extents.left.saturating_add(extents.right))
        .max(1);
    let height = frame
        .height
        .saturating_sub(extents.top.saturating_add(extents.bottom))
        .max(1);

    [
        GRAVITY_NORTH_WEST | MOVERESIZE_ALL_FIELDS | (source << 12),
        frame.x as u32,
        frame.y as u32,
        width as u32,
        height as u32,
    ]
}

/// Class half of a `WM_CLASS` value (`instance\0class\0`).
pub fn parse_wm_class(value: &[u8]) -> Option<String> {
    let mut parts = value.split(|b| *b == 0);
    let _instance = parts.next()?;
    let class = parts.next().filter(|class| !class.is_empty())?;
    String::from_utf8(class.to_vec()).ok()
}

fn window_error(window: WindowId, error: ReplyError) -> WindowError {
    match error {
        ReplyError::X11Error(ref e) if e.error_kind == ErrorKind::Window => WindowError::Gone(window),
        other => WindowError::Backend(other.to_string()),
    }
}

fn connection_error(error: ConnectionError) -> WindowError {
    WindowError::Backend(error.to_string())
}

/// X11 window system over EWMH.
///
/// Requests go straight to the server; events are read on a dedicated
/// thread (see [`events`]) and forwarded to the channel given to
/// [`X11WindowSystem::open`].
pub struct X11WindowSystem {
    conn: Arc<RustConnection>,
    root: Window,
    screen_size: (i32, i32),
    atoms: Atoms,
    registry: SignalRegistry,
}

impl X11WindowSystem {
    pub fn open(events: mpsc::Sender<WindowEvent>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None)?;
        let conn = Arc::new(conn);

        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let screen_size = (
            i32::from(screen.width_in_pixels),
            i32::from(screen.height_in_pixels),
        );
        let atoms = Atoms::new(conn.as_ref())?.reply()?;

        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY),
        )?
        .check()?;
        conn.flush()?;

        let registry = SignalRegistry::new();
        events::spawn_reader(conn.clone(), root, atoms, registry.clone(), events)?;

        info!(
            "Connected to X11 screen {} ({}x{})",
            screen_num, screen_size.0, screen_size.1
        );

        Ok(Self {
            conn,
            root,
            screen_size,
            atoms,
            registry,
        })
    }

    fn property(
        &self,
        window: WindowId,
        property: impl Into<u32>,
        type_: impl Into<u32>,
        length: u32,
    ) -> std::result::Result<GetPropertyReply, WindowError> {
        self.conn
            .get_property(false, window.0, property, type_, 0, length)
            .map_err(connection_error)?
            .reply()
            .map_err(|e| window_error(window, e))
    }

    fn cardinal(&self, window: WindowId, property: u32) -> std::result::Result<Option<u32>, WindowError> {
        let reply = self.property(window, property, AtomEnum::CARDINAL, 1)?;
        Ok(reply.value32().and_then(|mut values| values.next()))
    }

    fn frame_extents(&self, window: WindowId) -> FrameExtents {
        match self.property(window, self.atoms._NET_FRAME_EXTENTS, AtomEnum::CARDINAL, 4) {
            Ok(reply) => reply
                .value32()
                .map(|values| FrameExtents::from_values(&values.collect::<Vec<_>>()))
                .unwrap_or_default(),
            Err(_) => FrameExtents::default(),
        }
    }

    fn client_rect(&self, window: WindowId) -> std::result::Result<Rect, WindowError> {
        let geometry = self
            .conn
            .get_geometry(window.0)
            .map_err(connection_error)?
            .reply()
            .map_err(|e| window_error(window, e))?;
        let origin = self
            .conn
            .translate_coordinates(window.0, self.root, 0, 0)
            .map_err(connection_error)?
            .reply()
            .map_err(|e| window_error(window, e))?;

        Ok(Rect::new(
            i32::from(origin.dst_x),
            i32::from(origin.dst_y),
            i32::from(geometry.width),
            i32::from(geometry.height),
        ))
    }

    fn send_root_message(
        &self,
        window: WindowId,
        type_: u32,
        data: [u32; 5],
    ) -> std::result::Result<(), WindowError> {
        let event = ClientMessageEvent::new(32, window.0, type_, data);
        self.conn
            .send_event(
                false,
                self.root,
                EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY,
                event,
            )
            .map_err(connection_error)?;
        self.conn.flush().map_err(connection_error)
    }

    fn watch(&self, window: WindowId) {
        let mask = EventMask::STRUCTURE_NOTIFY | EventMask::PROPERTY_CHANGE;
        let result = self
            .conn
            .change_window_attributes(window.0, &ChangeWindowAttributesAux::new().event_mask(mask))
            .map_err(connection_error)
            .and_then(|_| self.conn.flush().map_err(connection_error));

        match result {
            Ok(()) => debug!("Selected structure events on {:#x}", window.0),
            Err(e) => warn!("Cannot watch window {:#x}: {}", window.0, e),
        }
    }

    /// Current monitor arrangement from RandR, or the whole screen as one
    /// monitor when RandR has nothing to say.
    pub fn monitors(&self) -> MonitorSnapshot {
        let reply = self
            .conn
            .randr_get_monitors(self.root, true)
            .map_err(ReplyError::from)
            .and_then(|cookie| cookie.reply());

        match reply {
            Ok(reply) if !reply.monitors.is_empty() => {
                let primary = reply
                    .monitors
                    .iter()
                    .position(|monitor| monitor.primary)
                    .unwrap_or(0);
                let rects = reply
                    .monitors
                    .iter()
                    .map(|m| {
                        Rect::new(
                            i32::from(m.x),
                            i32::from(m.y),
                            i32::from(m.width),
                            i32::from(m.height),
                        )
                    })
                    .collect();
                MonitorSnapshot::new(rects, primary)
            }
            Ok(_) => self.screen_snapshot(),
            Err(e) => {
                debug!("RandR monitors unavailable: {}", e);
                self.screen_snapshot()
            }
        }
    }

    fn screen_snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot::single(Rect::new(0, 0, self.screen_size.0, self.screen_size.1))
    }
}

impl WindowSystem for X11WindowSystem {
    fn connect(&self, target: SignalTarget, signal: WindowSignal) -> SignalGuard {
        if let SignalTarget::Window(window) = target {
            if !self.registry.is_watched(window) {
                self.watch(window);
            }
        }
        self.registry.connect(target, signal)
    }

    fn wm_class(&self, window: WindowId) -> Option<String> {
        match self.property(window, AtomEnum::WM_CLASS, AtomEnum::STRING, 256) {
            Ok(reply) => parse_wm_class(&reply.value),
            Err(e) => {
                debug!("Cannot read WM_CLASS of {:#x}: {}", window.0, e);
                None
            }
        }
    }

    fn frame_rect(&self, window: WindowId) -> std::result::Result<Rect, WindowError> {
        let client = self.client_rect(window)?;
        Ok(self.frame_extents(window).frame_of(client))
    }

    fn has_focus(&self, window: WindowId) -> std::result::Result<bool, WindowError> {
        let root = WindowId(self.root);
        let reply = self.property(root, self.atoms._NET_ACTIVE_WINDOW, AtomEnum::WINDOW, 1)?;
        Ok(reply
            .value32()
            .and_then(|mut values| values.next())
            .is_some_and(|active| active == window.0))
    }

    fn workspace(&self, window: WindowId) -> std::result::Result<Option<WorkspaceId>, WindowError> {
        match self.cardinal(window, self.atoms._NET_WM_DESKTOP)? {
            Some(ALL_DESKTOPS) => Ok(self.active_workspace()),
            Some(desktop) => Ok(Some(WorkspaceId(desktop))),
            None => Ok(None),
        }
    }

    fn is_above(&self, window: WindowId) -> std::result::Result<bool, WindowError> {
        let reply = self.property(window, self.atoms._NET_WM_STATE, AtomEnum::ATOM, 64)?;
        Ok(events::has_atom(&reply, self.atoms._NET_WM_STATE_ABOVE))
    }

    fn raise_and_focus(&self, window: WindowId) -> std::result::Result<(), WindowError> {
        // Timestamp 0 is CurrentTime.
        self.send_root_message(
            window,
            self.atoms._NET_ACTIVE_WINDOW,
            [SOURCE_PAGER, 0, 0, 0, 0],
        )
    }

    fn move_resize_frame(
        &self,
        window: WindowId,
        user_op: bool,
        rect: Rect,
    ) -> std::result::Result<(), WindowError> {
        let data = moveresize_data(rect, self.frame_extents(window), user_op);
        self.send_root_message(window, self.atoms._NET_MOVERESIZE_WINDOW, data)
    }

    fn move_to_monitor(&self, window: WindowId, monitor: usize) -> std::result::Result<(), WindowError> {
        let layout = self.monitors();
        let target = layout
            .monitor_rect(monitor)
            .ok_or_else(|| WindowError::Backend(format!("No monitor {}", monitor)))?;
        let frame = self.frame_rect(window)?;

        // Keep the offset from the current monitor when there is one.
        let (rel_x, rel_y) = layout
            .find_monitor_containing(frame.x, frame.y)
            .and_then(|index| layout.monitor_rect(index))
            .map(|current| relative_position(frame, current))
            .unwrap_or((0, 0));
        let placed = Rect::new(
            target
                .x
                .saturating_add(rel_x.min(target.width.saturating_sub(frame.width).max(0))),
            target
                .y
                .saturating_add(rel_y.min(target.height.saturating_sub(frame.height).max(0))),
            frame.width,
            frame.height,
        );

        self.move_resize_frame(window, false, placed)
    }

    fn change_workspace(
        &self,
        window: WindowId,
        workspace: WorkspaceId,
    ) -> std::result::Result<(), WindowError> {
        self.send_root_message(
            window,
            self.atoms._NET_WM_DESKTOP,
            [workspace.0, SOURCE_PAGER, 0, 0, 0],
        )
    }

    fn set_above(&self, window: WindowId, above: bool) -> std::result::Result<(), WindowError> {
        let action = if above {
            NET_WM_STATE_ADD
        } else {
            NET_WM_STATE_REMOVE
        };
        self.send_root_message(
            window,
            self.atoms._NET_WM_STATE,
            [action, self.atoms._NET_WM_STATE_ABOVE, 0, SOURCE_PAGER, 0],
        )
    }
}

impl MonitorLayout for X11WindowSystem {
    fn primary_index(&self) -> usize {
        self.monitors().primary
    }

    fn monitor_count(&self) -> usize {
        self.monitors().monitors.len()
    }

    fn monitor_rect(&self, index: usize) -> Option<Rect> {
        self.monitors().monitor_rect(index)
    }

    fn primary_rect(&self) -> Option<Rect> {
        self.monitors().primary_rect()
    }

    fn find_monitor_containing(&self, x: i32, y: i32) -> Option<usize> {
        self.monitors().find_monitor_containing(x, y)
    }

    fn is_primary_at(&self, x: i32, y: i32) -> bool {
        self.monitors().is_primary_at(x, y)
    }
}

impl WorkspaceQuery for X11WindowSystem {
    fn active_workspace(&self) -> Option<WorkspaceId> {
        match self.cardinal(WindowId(self.root), self.atoms._NET_CURRENT_DESKTOP) {
            Ok(desktop) => desktop.map(WorkspaceId),
            Err(e) => {
                debug!("Cannot read current desktop: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wm_class_takes_class_half() {
        assert_eq!(
            parse_wm_class(b"webling\0com.github.noobaldrin.webling\0"),
            Some("com.github.noobaldrin.webling".to_string())
        );
        assert_eq!(parse_wm_class(b"webling\0"), None);
        assert_eq!(parse_wm_class(b""), None);
    }

    #[test]
    fn test_frame_extents_grow_client_rect() {
        let extents = FrameExtents::from_values(&[2, 2, 30, 2]);
        assert_eq!(
            extents.frame_of(Rect::new(102, 130, 800, 600)),
            Rect::new(100, 100, 804, 632)
        );
        assert_eq!(FrameExtents::from_values(&[]), FrameExtents::default());
    }

    #[test]
    fn test_moveresize_data_uses_client_size_and_source() {
        let extents = FrameExtents {
            left: 2,
            right: 2,
            top: 30,
            bottom: 2,
        };
        let data = moveresize_data(Rect::new(50, 60, 804, 632), extents, false);

        assert_eq!(data[0] & 0xff, GRAVITY_NORTH_WEST);
        assert_eq!(data[0] & MOVERESIZE_ALL_FIELDS, MOVERESIZE_ALL_FIELDS);
        assert_eq!(data[0] >> 12, SOURCE_APPLICATION);
        assert_eq!(&data[1..], &[50, 60, 800, 600]);

        let user = moveresize_data(Rect::new(0, 0, 10, 10), FrameExtents::default(), true);
        assert_eq!(user[0] >> 12, SOURCE_PAGER);
    }

    #[test]
    fn test_moveresize_data_with_extreme_size() {
        let extents = FrameExtents {
            left: 2,
            right: 2,
            top: 30,
            bottom: 2,
        };
        let data = moveresize_data(Rect::new(0, 0, i32::MIN, i32::MIN), extents, false);
        assert_eq!(&data[3..], &[1, 1]);
    }
}
