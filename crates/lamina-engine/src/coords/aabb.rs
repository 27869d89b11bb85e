use super::Vec2;

/// Axis-aligned bounding box stored as min/max corners.
///
/// Boxes are half-open: `[min, max)`. A box with `max <= min` on either axis is
/// empty, and empty boxes never intersect anything.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Aabb {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Aabb {
    #[inline]
    pub const fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    #[inline]
    pub fn from_origin_size(origin: Vec2, size: Vec2) -> Self {
        Self::new(origin.x, origin.y, origin.x + size.x, origin.y + size.y)
    }

    /// Smallest box containing both points, regardless of their order.
    #[inline]
    pub fn from_corners(a: Vec2, b: Vec2) -> Self {
        Self::new(a.x.min(b.x), a.y.min(b.y), a.x.max(b.x), a.y.max(b.y))
    }

    #[inline]
    pub fn min(self) -> Vec2 {
        Vec2::new(self.min_x, self.min_y)
    }

    #[inline]
    pub fn max(self) -> Vec2 {
        Vec2::new(self.max_x, self.max_y)
    }

    #[inline]
    pub fn width(self) -> f32 {
        self.max_x - self.min_x
    }

    #[inline]
    pub fn height(self) -> f32 {
        self.max_y - self.min_y
    }

    #[inline]
    pub fn size(self) -> Vec2 {
        Vec2::new(self.width(), self.height())
    }

    #[inline]
    pub fn center(self) -> Vec2 {
        Vec2::new((self.min_x + self.max_x) * 0.5, (self.min_y + self.max_y) * 0.5)
    }

    /// `true` when the box covers no area. NaN coordinates also count as empty.
    #[inline]
    pub fn is_empty(self) -> bool {
        !(self.max_x > self.min_x && self.max_y > self.min_y)
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
    }

    /// Finite and non-empty.
    #[inline]
    pub fn is_valid(self) -> bool {
        self.is_finite() && !self.is_empty()
    }

    /// Name of the first non-finite field, for diagnostics.
    pub fn first_non_finite_field(self) -> Option<&'static str> {
        if !self.min_x.is_finite() {
            Some("min_x")
        } else if !self.min_y.is_finite() {
            Some("min_y")
        } else if !self.max_x.is_finite() {
            Some("max_x")
        } else if !self.max_y.is_finite() {
            Some("max_y")
        } else {
            None
        }
    }

    /// Overlap test with a non-zero shared area.
    #[inline]
    pub fn intersects(self, other: Aabb) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    /// `other` lies entirely within `self` (edges may touch).
    #[inline]
    pub fn contains_box(self, other: Aabb) -> bool {
        other.min_x >= self.min_x
            && other.min_y >= self.min_y
            && other.max_x <= self.max_x
            && other.max_y <= self.max_y
    }

    /// Half-open containment: [min, max).
    #[inline]
    pub fn contains_point(self, p: Vec2) -> bool {
        p.x >= self.min_x && p.y >= self.min_y && p.x < self.max_x && p.y < self.max_y
    }

    #[inline]
    pub fn union(self, other: Aabb) -> Aabb {
        Aabb::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    /// Overlapping region, or `None` when the boxes share no area.
    #[inline]
    pub fn intersection(self, other: Aabb) -> Option<Aabb> {
        let r = Aabb::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        if r.is_empty() { None } else { Some(r) }
    }

    #[inline]
    pub fn translated(self, d: Vec2) -> Aabb {
        Aabb::new(self.min_x + d.x, self.min_y + d.y, self.max_x + d.x, self.max_y + d.y)
    }

    /// Scales the box around its center.
    #[inline]
    pub fn scaled_about_center(self, factor: f32) -> Aabb {
        let c = self.center();
        let half = self.size() * (0.5 * factor);
        Aabb::new(c.x - half.x, c.y - half.y, c.x + half.x, c.y + half.y)
    }

    /// Rounds outward to whole units.
    #[inline]
    pub fn snapped_out(self) -> Aabb {
        Aabb::new(
            self.min_x.floor(),
            self.min_y.floor(),
            self.max_x.ceil(),
            self.max_y.ceil(),
        )
    }

    /// Rounds outward, treating values within `eps` of an integer as that integer.
    ///
    /// Makes snapping idempotent after a lossy round trip through another space.
    #[inline]
    pub fn snapped_out_tolerant(self, eps: f32) -> Aabb {
        Aabb::new(
            (self.min_x + eps).floor(),
            (self.min_y + eps).floor(),
            (self.max_x - eps).ceil(),
            (self.max_y - eps).ceil(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Aabb {
        Aabb::new(min_x, min_y, max_x, max_y)
    }

    #[test]
    fn degenerate_boxes_are_empty() {
        assert!(b(0.0, 0.0, 0.0, 5.0).is_empty());
        assert!(b(0.0, 0.0, 5.0, -1.0).is_empty());
        assert!(b(f32::NAN, 0.0, 5.0, 5.0).is_empty());
        assert!(!b(0.0, 0.0, 1.0, 1.0).is_empty());
    }

    #[test]
    fn touching_edges_do_not_intersect() {
        let a = b(0.0, 0.0, 10.0, 10.0);
        assert!(!a.intersects(b(10.0, 0.0, 20.0, 10.0)));
        assert!(a.intersects(b(9.5, 0.0, 20.0, 10.0)));
        assert!(a.intersection(b(10.0, 0.0, 20.0, 10.0)).is_none());
    }

    #[test]
    fn intersection_and_union() {
        let a = b(0.0, 0.0, 10.0, 10.0);
        let c = b(5.0, 5.0, 15.0, 15.0);
        assert_eq!(a.intersection(c), Some(b(5.0, 5.0, 10.0, 10.0)));
        assert_eq!(a.union(c), b(0.0, 0.0, 15.0, 15.0));
    }

    #[test]
    fn containment_allows_shared_edges() {
        let outer = b(0.0, 0.0, 100.0, 100.0);
        assert!(outer.contains_box(b(0.0, 10.0, 100.0, 20.0)));
        assert!(!outer.contains_box(b(-1.0, 10.0, 50.0, 20.0)));
        assert!(outer.contains_point(Vec2::new(0.0, 0.0)));
        assert!(!outer.contains_point(Vec2::new(100.0, 50.0)));
    }

    #[test]
    fn non_finite_field_is_reported() {
        assert_eq!(b(0.0, f32::NAN, 1.0, 1.0).first_non_finite_field(), Some("min_y"));
        assert_eq!(b(0.0, 0.0, f32::INFINITY, 1.0).first_non_finite_field(), Some("max_x"));
        assert_eq!(b(0.0, 0.0, 1.0, 1.0).first_non_finite_field(), None);
    }

    #[test]
    fn scaling_keeps_center() {
        let s = b(-10.0, -10.0, 10.0, 30.0).scaled_about_center(1.5);
        assert_eq!(s, b(-15.0, -20.0, 15.0, 40.0));
    }

    #[test]
    fn snapping_rounds_outward() {
        assert_eq!(b(0.2, -0.5, 3.1, 4.0).snapped_out(), b(0.0, -1.0, 4.0, 4.0));
        assert_eq!(
            b(9.9999, 0.0, 20.00001, 5.5).snapped_out_tolerant(1e-3),
            b(10.0, 0.0, 20.0, 6.0)
        );
    }
}
