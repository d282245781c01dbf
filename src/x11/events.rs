//! X11 event reader.
//!
//! One blocking thread waits on the connection, turns structure and
//! property notifications into [`WindowEvent`]s and forwards those that
//! somebody subscribed to.

use super::Atoms;
use crate::signals::SignalRegistry;
use crate::window_system::WindowEvent;
use crate::{Result, WindowId};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _, GetPropertyReply, Window};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

pub(crate) fn has_atom(reply: &GetPropertyReply, atom: u32) -> bool {
    reply
        .value32()
        .is_some_and(|mut atoms| atoms.any(|a| a == atom))
}

/// Last seen geometry and pin state per window, used to split configure
/// notifications into size and position changes and to drop `_NET_WM_STATE`
/// updates that did not touch the above flag.
#[derive(Debug, Default)]
pub struct EventTranslator {
    geometry: HashMap<WindowId, (i32, i32, i32, i32)>,
    above: HashMap<WindowId, bool>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthetic configure notifications carry root coordinates from the
    /// window manager and always count as a move.
    pub fn configure(
        &mut self,
        window: WindowId,
        rect: (i32, i32, i32, i32),
        synthetic: bool,
    ) -> Vec<WindowEvent> {
        let previous = self.geometry.insert(window, rect);
        let mut events = Vec::new();

        let resized = previous.map_or(true, |(_, _, w, h)| (w, h) != (rect.2, rect.3));
        let moved = synthetic || previous.map_or(true, |(x, y, _, _)| (x, y) != (rect.0, rect.1));
        if resized {
            events.push(WindowEvent::SizeChanged(window));
        }
        if moved {
            events.push(WindowEvent::PositionChanged(window));
        }
        events
    }

    /// `None` unless the above flag differs from the last one seen.
    pub fn state_changed(&mut self, window: WindowId, above: bool) -> Option<WindowEvent> {
        let previous = self.above.insert(window, above);
        (previous != Some(above)).then_some(WindowEvent::AboveChanged(window))
    }

    pub fn forget(&mut self, window: WindowId) {
        self.geometry.remove(&window);
        self.above.remove(&window);
    }
}

pub(crate) fn spawn_reader(
    conn: Arc<RustConnection>,
    root: Window,
    atoms: Atoms,
    registry: SignalRegistry,
    events: mpsc::Sender<WindowEvent>,
) -> Result<()> {
    std::thread::Builder::new()
        .name("x11-events".to_string())
        .spawn(move || {
            let mut reader = Reader {
                conn,
                root,
                atoms,
                registry,
                translator: EventTranslator::new(),
            };
            reader.run(events);
        })?;
    Ok(())
}

struct Reader {
    conn: Arc<RustConnection>,
    root: Window,
    atoms: Atoms,
    registry: SignalRegistry,
    translator: EventTranslator,
}

impl Reader {
    fn run(&mut self, events: mpsc::Sender<WindowEvent>) {
        info!("X11 event reader started");

        loop {
            let event = match self.conn.wait_for_event() {
                Ok(event) => event,
                Err(e) => {
                    error!("Error receiving X11 event: {}", e);
                    break;
                }
            };

            for translated in self.translate(event) {
                if !self
                    .registry
                    .is_connected(translated.target(), translated.signal())
                {
                    continue;
                }
                if events.blocking_send(translated).is_err() {
                    debug!("Event loop gone, stopping X11 reader");
                    return;
                }
            }
        }
    }

    fn translate(&mut self, event: Event) -> Vec<WindowEvent> {
        match event {
            Event::CreateNotify(e) if e.parent == self.root => {
                vec![WindowEvent::Created(WindowId(e.window))]
            }
            // Per-window events also arrive through the root's substructure
            // mask for top-level windows; take only the window's own copy.
            Event::ConfigureNotify(e) if e.event == e.window => {
                let synthetic = e.response_type & 0x80 != 0;
                let rect = (
                    i32::from(e.x),
                    i32::from(e.y),
                    i32::from(e.width),
                    i32::from(e.height),
                );
                self.translator.configure(WindowId(e.window), rect, synthetic)
            }
            Event::MapNotify(e) if e.event == e.window => {
                vec![WindowEvent::Mapped(WindowId(e.window))]
            }
            Event::DestroyNotify(e) if e.event == e.window => {
                let window = WindowId(e.window);
                self.translator.forget(window);
                vec![WindowEvent::Unmanaged(window)]
            }
            Event::PropertyNotify(e) if e.atom == self.atoms._NET_WM_STATE => {
                let window = WindowId(e.window);
                let above = self
                    .conn
                    .get_property(false, e.window, self.atoms._NET_WM_STATE, AtomEnum::ATOM, 0, 64)
                    .ok()
                    .and_then(|cookie| cookie.reply().ok())
                    .is_some_and(|reply| has_atom(&reply, self.atoms._NET_WM_STATE_ABOVE));
                self.translator.state_changed(window, above).into_iter().collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_configure_reports_size_and_position() {
        let mut translator = EventTranslator::new();
        let window = WindowId(1);

        assert_eq!(
            translator.configure(window, (0, 0, 800, 600), false),
            vec![
                WindowEvent::SizeChanged(window),
                WindowEvent::PositionChanged(window)
            ]
        );
    }

    #[test]
    fn test_configure_splits_resize_and_move() {
        let mut translator = EventTranslator::new();
        let window = WindowId(1);
        translator.configure(window, (0, 0, 800, 600), false);

        assert_eq!(
            translator.configure(window, (0, 0, 900, 600), false),
            vec![WindowEvent::SizeChanged(window)]
        );
        assert_eq!(
            translator.configure(window, (10, 0, 900, 600), false),
            vec![WindowEvent::PositionChanged(window)]
        );
        assert!(translator.configure(window, (10, 0, 900, 600), false).is_empty());
        assert_eq!(
            translator.configure(window, (10, 0, 900, 600), true),
            vec![WindowEvent::PositionChanged(window)]
        );
    }

    #[test]
    fn test_state_change_reported_only_when_above_flips() {
        let mut translator = EventTranslator::new();
        let window = WindowId(4);

        assert_eq!(
            translator.state_changed(window, false),
            Some(WindowEvent::AboveChanged(window))
        );
        assert_eq!(translator.state_changed(window, false), None);
        assert_eq!(
            translator.state_changed(window, true),
            Some(WindowEvent::AboveChanged(window))
        );

        translator.forget(window);
        assert!(translator.state_changed(window, true).is_some());
    }
}
