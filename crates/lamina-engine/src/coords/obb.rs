use super::{Aabb, Vec2};

/// Oriented bounding box: a center and two half-axis vectors.
///
/// Drawables that rotate report one of these in addition to their AABB. The
/// index stays AABB-based; the oriented box refines hit-testing.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct OrientedBox {
    pub center: Vec2,
    pub half_x: Vec2,
    pub half_y: Vec2,
}

impl OrientedBox {
    #[inline]
    pub const fn new(center: Vec2, half_x: Vec2, half_y: Vec2) -> Self {
        Self { center, half_x, half_y }
    }

    /// Box of `size` centered at `center`, rotated by `radians`.
    pub fn from_rotation(center: Vec2, size: Vec2, radians: f32) -> Self {
        Self {
            center,
            half_x: Vec2::new(size.x * 0.5, 0.0).rotated(radians),
            half_y: Vec2::new(0.0, size.y * 0.5).rotated(radians),
        }
    }

    /// Tight axis-aligned bounds of the four corners.
    pub fn bounds(&self) -> Aabb {
        let ext = self.half_x.abs() + self.half_y.abs();
        Aabb::new(
            self.center.x - ext.x,
            self.center.y - ext.y,
            self.center.x + ext.x,
            self.center.y + ext.y,
        )
    }

    pub fn contains_point(&self, p: Vec2) -> bool {
        let d = p - self.center;
        let fits = |axis: Vec2| {
            let len_sq = axis.dot(axis);
            if len_sq <= 0.0 {
                return false;
            }
            // Projection onto the half axis, in units of that half axis.
            (d.dot(axis) / len_sq).abs() <= 1.0
        };
        fits(self.half_x) && fits(self.half_y)
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.center.is_finite() && self.half_x.is_finite() && self.half_y.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotated_square_bounds_grow() {
        let obb = OrientedBox::from_rotation(Vec2::zero(), Vec2::new(2.0, 2.0), core::f32::consts::FRAC_PI_4);
        let bounds = obb.bounds();
        let expected = 2.0f32.sqrt();
        assert!((bounds.max_x - expected).abs() < 1e-5);
        assert!((bounds.min_y + expected).abs() < 1e-5);
    }

    #[test]
    fn point_in_rotated_box() {
        let obb = OrientedBox::from_rotation(Vec2::zero(), Vec2::new(10.0, 2.0), core::f32::consts::FRAC_PI_2);
        // Rotated 90°, the long axis points along +Y.
        assert!(obb.contains_point(Vec2::new(0.0, 4.0)));
        assert!(!obb.contains_point(Vec2::new(4.0, 0.0)));
    }
}
