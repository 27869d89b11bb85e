//! Dirty-region accounting.
//!
//! Invalidations accumulate in a [`DirtyRegionTracker`] during the frame; at draw
//! time they are merged and grown with [`expand_to_fixed_point`] until no
//! drawable straddles the redraw boundary.

mod expand;
mod tracker;

pub use expand::{expand_to_fixed_point, iteration_cap, Expansion};
pub use tracker::DirtyRegionTracker;
