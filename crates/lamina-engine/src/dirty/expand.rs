use core::fmt::Debug;
use core::hash::Hash;

use crate::coords::Aabb;
use crate::error::{RenderError, RenderResult};
use crate::spatial::QuadTree;

/// Outcome of growing a redraw region to its fixed point.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Expansion {
    pub region: Aabb,
    pub iterations: u32,
    /// The iteration cap was reached and the region fell back to the screen.
    pub capped: bool,
}

/// Iteration budget for [`expand_to_fixed_point`].
#[inline]
pub fn iteration_cap(index_depth: u32) -> u32 {
    (4 * (index_depth + 1)).max(16)
}

/// Grows `initial` until every drawable touching it lies inside it.
///
/// Each round queries `index` with the current region, unions the boxes that
/// `contributes` returns (visible or always-draw drawables; `None` skips the
/// object), then applies `clamp`, which snaps to the pixel grid and clips to
/// the visible screen. The loop ends when the region stops changing.
///
/// `contributes` reports the drawable's live box, which can differ from the
/// indexed one when a drawable moved without notifying its layer; a
/// non-finite live box aborts with `InvalidGeometry` naming that drawable.
///
/// Returns `Ok(None)` when nothing of `initial` is on screen.
pub fn expand_to_fixed_point<K, C, F>(
    initial: Aabb,
    index: &QuadTree<K>,
    max_iterations: u32,
    mut clamp: C,
    mut contributes: F,
) -> RenderResult<Option<Expansion>>
where
    K: Copy + Eq + Hash + Debug,
    C: FnMut(Aabb) -> Option<Aabb>,
    F: FnMut(K, Aabb) -> Option<Aabb>,
{
    if let Some(field) = initial.first_non_finite_field() {
        return Err(RenderError::InvalidGeometry {
            what: "redraw region".to_owned(),
            detail: format!("field `{field}` is not finite: {initial:?}"),
        });
    }

    let Some(mut region) = clamp(initial) else {
        return Ok(None);
    };

    for iteration in 0..max_iterations {
        let mut grown = region;
        let mut culprit: Option<(K, Aabb)> = None;

        index.query(region, |key, indexed| {
            if culprit.is_some() {
                return;
            }
            if let Some(live) = contributes(key, indexed) {
                if live.is_finite() {
                    grown = grown.union(live);
                } else {
                    culprit = Some((key, live));
                }
            }
        });

        if let Some((key, live)) = culprit {
            let field = live.first_non_finite_field().unwrap_or("?");
            return Err(RenderError::InvalidGeometry {
                what: format!("drawable {key:?}"),
                detail: format!("bounding box field `{field}` is not finite: {live:?}"),
            });
        }

        let next = clamp(grown).unwrap_or(region);
        if !next.is_finite() {
            return Err(RenderError::InvalidGeometry {
                what: "redraw region".to_owned(),
                detail: format!("expansion produced {next:?}"),
            });
        }
        if next == region {
            return Ok(Some(Expansion { region, iterations: iteration + 1, capped: false }));
        }
        region = next;
    }

    log::warn!(
        "redraw region did not settle after {max_iterations} iterations; redrawing whole screen"
    );
    let screen = clamp(Aabb::new(f32::MIN, f32::MIN, f32::MAX, f32::MAX)).unwrap_or(region);
    Ok(Some(Expansion { region: screen, iterations: max_iterations, capped: true }))
}
