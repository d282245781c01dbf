pub mod config;
pub mod dispatch;
pub mod indicator;
pub mod ipc;
pub mod monitor;
pub mod service;
pub mod signals;
pub mod store;
pub mod timer;
pub mod tracker;
pub mod window_system;
pub mod x11;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use service::PanelService;
pub use tracker::WindowTracker;

use serde::Serialize;

pub type Result<T> = anyhow::Result<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkspaceId(pub u32);

/// Rectangle in absolute screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Half-open containment: the right and bottom edges belong to the
    /// neighbouring monitor.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_half_open() {
        let rect = Rect::new(0, 0, 1920, 1080);
        assert!(rect.contains(0, 0));
        assert!(rect.contains(1919, 1079));
        assert!(!rect.contains(1920, 0));
        assert!(!rect.contains(0, 1080));
        assert!(!rect.contains(-1, 10));
    }
}
