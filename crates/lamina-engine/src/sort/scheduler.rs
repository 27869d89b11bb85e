use core::cmp::Ordering;
use core::fmt;
use std::collections::HashSet;
use std::hash::Hash;
use std::rc::Rc;

use crate::drawable::Drawable;

/// User comparator for [`SortMode::Custom`].
pub type SortComparator = Rc<dyn Fn(&dyn Drawable, &dyn Drawable) -> Ordering>;

/// How a layer orders its drawables before painting.
#[derive(Clone, Default)]
pub enum SortMode {
    /// Insertion order.
    #[default]
    None,
    /// Ascending depth key (`position.y + sort_point.y * size.y`).
    BottomToTop,
    /// Descending depth key.
    TopToBottom,
    Custom(SortComparator),
}

impl SortMode {
    #[inline]
    pub fn is_sorting(&self) -> bool {
        !matches!(self, SortMode::None)
    }
}

impl fmt::Debug for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortMode::None => f.write_str("None"),
            SortMode::BottomToTop => f.write_str("BottomToTop"),
            SortMode::TopToBottom => f.write_str("TopToBottom"),
            SortMode::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// What [`DrawScheduler::resolve_order`] did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Resolution {
    Unchanged,
    FullSort { reordered: bool },
    LocalRepair { swaps: usize },
}

/// Paint order of one layer.
///
/// Moves are collected during the frame with [`notify_moved`](Self::notify_moved).
/// At draw time the order is repaired either by a full stable sort or, when few
/// things moved, by bubbling each moved key to its place. The cheaper of the
/// two is picked per frame: `moved² > total` means the local repair could cost
/// more than sorting.
#[derive(Debug, Default)]
pub struct DrawScheduler<K> {
    mode: SortMode,
    order: Vec<K>,
    moved: Vec<K>,
    moved_set: HashSet<K>,
    full_sort_pending: bool,
}

impl<K: Copy + Eq + Hash> DrawScheduler<K> {
    pub fn new(mode: SortMode) -> Self {
        Self {
            mode,
            order: Vec::new(),
            moved: Vec::new(),
            moved_set: HashSet::new(),
            full_sort_pending: true,
        }
    }

    #[inline]
    pub fn sort_mode(&self) -> &SortMode {
        &self.mode
    }

    /// Changes the sort mode; the next resolve does a full sort.
    pub fn set_sort_mode(&mut self, mode: SortMode) {
        self.mode = mode;
        self.full_sort_pending = true;
    }

    #[inline]
    pub fn request_full_sort(&mut self) {
        self.full_sort_pending = true;
    }

    #[inline]
    pub fn is_full_sort_pending(&self) -> bool {
        self.full_sort_pending
    }

    /// Current paint order, back to front.
    #[inline]
    pub fn order(&self) -> &[K] {
        &self.order
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Appends `key`; when sorting it is also queued to move to its place.
    pub fn push(&mut self, key: K) {
        self.order.push(key);
        if self.mode.is_sorting() {
            self.notify_moved(key);
        }
    }

    /// Removes `key`. Returns `false` if it was not scheduled.
    pub fn remove(&mut self, key: K) -> bool {
        if self.moved_set.remove(&key) {
            self.moved.retain(|k| *k != key);
        }
        match self.order.iter().position(|k| *k == key) {
            Some(pos) => {
                self.order.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Records that `key` changed something its sort key depends on.
    pub fn notify_moved(&mut self, key: K) {
        if self.moved_set.insert(key) {
            self.moved.push(key);
        }
    }

    #[inline]
    pub fn moved_count(&self) -> usize {
        self.moved.len()
    }

    /// Brings the order up to date.
    ///
    /// `cmp` is the active comparator (for [`SortMode::None`] the caller passes an
    /// insertion-order comparator, used only when a full sort is pending, e.g.
    /// right after switching back to `None`). `on_swapped` receives every key a
    /// moved key was bubbled past; their paint order changed, so they must be
    /// redrawn.
    pub fn resolve_order<C, S>(&mut self, mut cmp: C, mut on_swapped: S) -> Resolution
    where
        C: FnMut(K, K) -> Ordering,
        S: FnMut(K),
    {
        let moved = std::mem::take(&mut self.moved);
        self.moved_set.clear();

        let total = self.order.len();
        let needs_full = self.full_sort_pending
            || (self.mode.is_sorting() && moved.len().saturating_mul(moved.len()) > total);
        self.full_sort_pending = false;

        if needs_full {
            let before = self.order.clone();
            self.order.sort_by(|a, b| cmp(*a, *b));
            let reordered = before != self.order;
            self.moved = moved;
            self.moved.clear();
            return Resolution::FullSort { reordered };
        }

        if !self.mode.is_sorting() || moved.is_empty() {
            self.moved = moved;
            self.moved.clear();
            return Resolution::Unchanged;
        }

        let mut swaps = 0;
        for &key in &moved {
            let Some(mut i) = self.order.iter().position(|k| *k == key) else {
                continue;
            };

            while i > 0 && cmp(self.order[i - 1], self.order[i]) == Ordering::Greater {
                on_swapped(self.order[i - 1]);
                self.order.swap(i - 1, i);
                i -= 1;
                swaps += 1;
            }
            while i + 1 < self.order.len()
                && cmp(self.order[i], self.order[i + 1]) == Ordering::Greater
            {
                on_swapped(self.order[i + 1]);
                self.order.swap(i, i + 1);
                i += 1;
                swaps += 1;
            }
        }

        // Keep the allocation for next frame.
        self.moved = moved;
        self.moved.clear();
        Resolution::LocalRepair { swaps }
    }
}
