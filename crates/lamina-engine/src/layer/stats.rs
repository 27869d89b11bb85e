use crate::coords::Aabb;

/// What one [`Layer::draw`](super::Layer::draw) did.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct FrameStats {
    /// World-space region that was cleared and repainted.
    pub redrawn: Option<Aabb>,
    pub full_redraw: bool,
    /// Visible drawables painted.
    pub drawables_drawn: usize,
    pub draw_calls: usize,
    pub batches: usize,
    pub individual_draws: usize,
    pub invisible_touched: usize,
    /// Frames dropped because a drawable reported non-finite geometry.
    pub skipped_invalid: usize,
    pub expansion_iterations: u32,
}

impl FrameStats {
    /// Nothing was repainted.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.redrawn.is_none()
    }
}
