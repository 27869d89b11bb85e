use core::cmp::Ordering;

use crate::coords::Vec2;

/// Depth keys closer than this are treated as equal.
pub const SORT_EPSILON: f32 = 1e-3;

/// Stable sort key for the built-in sorters.
///
/// Ordering rules:
/// 1) `depth`: the world-space depth quantised to [`SORT_EPSILON`] steps
/// 2) `id`: ascending insertion id, so equal depths keep a deterministic order
///
/// Quantising keeps the comparison a total order; a plain `|a - b| < eps` test
/// would not be transitive.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SortKey {
    pub depth: i64,
    pub id: u64,
}

impl SortKey {
    pub fn new(depth: f32, id: u64) -> Self {
        let depth = if depth.is_finite() {
            (depth / SORT_EPSILON).round() as i64
        } else {
            // Corrupt positions sort last instead of scattering.
            i64::MAX
        };
        Self { depth, id }
    }

    /// Depth of a drawable: `position.y + sort_point.y * size.y`.
    pub fn from_anchor(position: Vec2, size: Vec2, sort_point: Vec2, id: u64) -> Self {
        Self::new(position.y + sort_point.y * size.y, id)
    }

    /// Ascending depth: things lower on screen paint later.
    #[inline]
    pub fn bottom_to_top(&self, other: &Self) -> Ordering {
        self.cmp(other)
    }

    /// Descending depth; equal depths still order by ascending id.
    #[inline]
    pub fn top_to_bottom(&self, other: &Self) -> Ordering {
        other.depth.cmp(&self.depth).then(self.id.cmp(&other.id))
    }
}

impl Ord for SortKey {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        match self.depth.cmp(&other.depth) {
            Ordering::Equal => self.id.cmp(&other.id),
            o => o,
        }
    }
}

impl PartialOrd for SortKey {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_equal_depths_tie_break_by_id() {
        let a = SortKey::new(10.0, 7);
        let b = SortKey::new(10.0001, 3);
        assert_eq!(b.bottom_to_top(&a), Ordering::Less);
        assert_eq!(b.top_to_bottom(&a), Ordering::Less);
    }

    #[test]
    fn anchor_uses_sort_point() {
        let k = SortKey::from_anchor(Vec2::new(0.0, 10.0), Vec2::new(4.0, 20.0), Vec2::new(0.5, 1.0), 0);
        assert_eq!(k, SortKey::new(30.0, 0));
    }

    #[test]
    fn non_finite_depth_sorts_last() {
        let bad = SortKey::new(f32::NAN, 0);
        let good = SortKey::new(1.0e9, 1);
        assert_eq!(good.cmp(&bad), Ordering::Less);
    }
}
