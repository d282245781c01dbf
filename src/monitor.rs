use crate::Rect;

/// Read-only view of the current monitor arrangement.
///
/// Implementations answer from the live layout on every call; nothing here
/// is cached because monitors can be plugged or rearranged between calls.
pub trait MonitorLayout: Send + Sync {
    fn primary_index(&self) -> usize;

    fn monitor_count(&self) -> usize;

    fn monitor_rect(&self, index: usize) -> Option<Rect>;

    fn primary_rect(&self) -> Option<Rect> {
        self.monitor_rect(self.primary_index())
    }

    /// First monitor whose rectangle contains the point, or `None` when the
    /// point is off every screen.
    fn find_monitor_containing(&self, x: i32, y: i32) -> Option<usize> {
        (0..self.monitor_count()).find(|&index| {
            self.monitor_rect(index)
                .is_some_and(|rect| rect.contains(x, y))
        })
    }

    fn is_primary_at(&self, x: i32, y: i32) -> bool {
        self.find_monitor_containing(x, y) == Some(self.primary_index())
    }
}

/// A fixed monitor arrangement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSnapshot {
    pub monitors: Vec<Rect>,
    pub primary: usize,
}

impl MonitorSnapshot {
    pub fn new(monitors: Vec<Rect>, primary: usize) -> Self {
        let primary = if primary < monitors.len() { primary } else { 0 };
        Self { monitors, primary }
    }

    pub fn single(rect: Rect) -> Self {
        Self::new(vec![rect], 0)
    }
}

impl MonitorLayout for MonitorSnapshot {
    fn primary_index(&self) -> usize {
        self.primary
    }

    fn monitor_count(&self) -> usize {
        self.monitors.len()
    }

    fn monitor_rect(&self, index: usize) -> Option<Rect> {
        self.monitors.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dual_head() -> MonitorSnapshot {
        // Secondary on the left, primary on the right.
        MonitorSnapshot::new(
            vec![Rect::new(0, 0, 1280, 1024), Rect::new(1280, 0, 1920, 1080)],
            1,
        )
    }

    #[test]
    fn test_find_monitor_containing() {
        let layout = dual_head();
        assert_eq!(layout.find_monitor_containing(10, 10), Some(0));
        assert_eq!(layout.find_monitor_containing(1279, 1023), Some(0));
        assert_eq!(layout.find_monitor_containing(1280, 0), Some(1));
        assert_eq!(layout.find_monitor_containing(3199, 1079), Some(1));
    }

    #[test]
    fn test_point_off_all_screens_is_not_primary() {
        let layout = dual_head();
        assert_eq!(layout.find_monitor_containing(3200, 0), None);
        assert_eq!(layout.find_monitor_containing(100, 1050), None);
        assert_eq!(layout.find_monitor_containing(-5, -5), None);
        assert!(!layout.is_primary_at(3200, 0));
    }

    #[test]
    fn test_primary_rect() {
        let layout = dual_head();
        assert_eq!(layout.primary_rect(), Some(Rect::new(1280, 0, 1920, 1080)));
        assert!(layout.is_primary_at(1500, 500));
        assert!(!layout.is_primary_at(500, 500));
    }

    #[test]
    fn test_out_of_range_primary_falls_back_to_first() {
        let layout = MonitorSnapshot::new(vec![Rect::new(0, 0, 800, 600)], 4);
        assert_eq!(layout.primary_index(), 0);
        assert_eq!(layout.monitor_rect(1), None);
    }

    #[test]
    fn test_empty_layout_contains_nothing() {
        let layout = MonitorSnapshot::new(Vec::new(), 0);
        assert_eq!(layout.primary_rect(), None);
        assert_eq!(layout.find_monitor_containing(0, 0), None);
    }
}
