//! Paint-order maintenance: sort modes, keys and the incremental scheduler.

mod key;
mod scheduler;

pub use key::{SortKey, SORT_EPSILON};
pub use scheduler::{DrawScheduler, Resolution, SortComparator, SortMode};
