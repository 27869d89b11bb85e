use crate::coords::Aabb;

/// Pending invalidations for one layer, in world space.
///
/// Rectangles are appended as-is; merging happens once per frame in
/// [`consume_and_merge`](Self::consume_and_merge).
#[derive(Debug, Default, Clone)]
pub struct DirtyRegionTracker {
    areas: Vec<Aabb>,
    full_redraw: bool,
}

impl DirtyRegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an invalidated rectangle.
    ///
    /// Degenerate or non-finite rectangles are refused (returns `false`); they
    /// must never be mistaken for "everything changed".
    pub fn add_dirty_area(&mut self, area: Aabb) -> bool {
        if !area.is_valid() {
            log::trace!("ignoring degenerate dirty area {area:?}");
            return false;
        }
        self.areas.push(area);
        true
    }

    /// Forces the next processed frame to redraw the whole visible area.
    #[inline]
    pub fn request_full_redraw(&mut self) {
        self.full_redraw = true;
    }

    #[inline]
    pub fn is_full_redraw_pending(&self) -> bool {
        self.full_redraw
    }

    #[inline]
    pub fn pending(&self) -> &[Aabb] {
        &self.areas
    }

    /// `false` only when there is provably nothing to do this frame.
    ///
    /// Without the index every frame redraws everything; always-draw drawables
    /// may animate without ever reporting a dirty area.
    pub fn has_anything_changed(&self, uses_index: bool, always_draw_count: usize) -> bool {
        !(self.areas.is_empty() && !self.full_redraw && uses_index && always_draw_count == 0)
    }

    /// Union of every pending area that overlaps `screen`, clamped to `screen`.
    ///
    /// `None` means no visible change.
    pub fn consume_and_merge(&self, screen: Aabb) -> Option<Aabb> {
        self.areas
            .iter()
            .filter_map(|a| a.intersection(screen))
            .reduce(Aabb::union)
            .filter(|merged| merged.is_valid())
    }

    /// Drops pending areas and the full-redraw request.
    ///
    /// Called exactly once per processed frame, including frames that end up
    /// drawing nothing.
    pub fn clear(&mut self) {
        self.areas.clear();
        self.full_redraw = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCREEN: Aabb = Aabb::new(0.0, 0.0, 100.0, 100.0);

    #[test]
    fn degenerate_areas_are_rejected() {
        let mut t = DirtyRegionTracker::new();
        assert!(!t.add_dirty_area(Aabb::new(10.0, 10.0, 10.0, 20.0)));
        assert!(!t.add_dirty_area(Aabb::new(10.0, 10.0, 5.0, 20.0)));
        assert!(!t.add_dirty_area(Aabb::new(f32::NAN, 0.0, 1.0, 1.0)));
        assert!(t.pending().is_empty());
        assert!(!t.has_anything_changed(true, 0));
    }

    #[test]
    fn merge_unions_visible_parts_only() {
        let mut t = DirtyRegionTracker::new();
        t.add_dirty_area(Aabb::new(-50.0, 10.0, 20.0, 20.0));
        t.add_dirty_area(Aabb::new(60.0, 70.0, 80.0, 90.0));
        t.add_dirty_area(Aabb::new(500.0, 500.0, 510.0, 510.0));
        assert_eq!(t.consume_and_merge(SCREEN), Some(Aabb::new(0.0, 10.0, 80.0, 90.0)));
    }

    #[test]
    fn offscreen_changes_merge_to_nothing() {
        let mut t = DirtyRegionTracker::new();
        t.add_dirty_area(Aabb::new(200.0, 200.0, 210.0, 210.0));
        assert!(t.has_anything_changed(true, 0));
        assert_eq!(t.consume_and_merge(SCREEN), None);
    }

    #[test]
    fn change_detection_rules() {
        let mut t = DirtyRegionTracker::new();
        assert!(!t.has_anything_changed(true, 0));
        assert!(t.has_anything_changed(false, 0));
        assert!(t.has_anything_changed(true, 1));
        t.request_full_redraw();
        assert!(t.has_anything_changed(true, 0));
        t.clear();
        assert!(!t.is_full_redraw_pending());
        assert!(!t.has_anything_changed(true, 0));
    }
}
