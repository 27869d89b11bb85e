use crate::drawable::{Canvas, Drawable};
use crate::sprite::{Sprite, SpriteInstance, TextureId};

/// Batch sizing.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BatchConfig {
    /// Quads per instanced draw call.
    pub max_batch_size: usize,
    /// Below this many pending quads a flush draws them one by one.
    pub min_batch_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_batch_size: 256, min_batch_size: 4 }
    }
}

/// Receiver of the draw calls a [`BatchBuilder`] decides on.
pub trait BatchSink {
    /// Drawable that cannot join a batch (custom shader, no batch quad).
    fn draw_drawable(&mut self, drawable: &dyn Drawable);

    /// One quad through the individual path.
    fn draw_sprite(&mut self, sprite: &Sprite);

    /// One draw call for every quad in `instances`, all sampling `texture`.
    fn draw_batch(&mut self, texture: TextureId, instances: &[SpriteInstance]);

    /// Makes sure `texture` is resident without drawing with it.
    fn touch_texture(&mut self, texture: TextureId);
}

/// Adapts any [`Canvas`] into a sink that expands batches into sprites.
pub struct CanvasSink<'a>(pub &'a mut dyn Canvas);

impl BatchSink for CanvasSink<'_> {
    fn draw_drawable(&mut self, drawable: &dyn Drawable) {
        drawable.draw(&mut *self.0);
    }

    fn draw_sprite(&mut self, sprite: &Sprite) {
        self.0.draw_sprite(sprite);
    }

    fn draw_batch(&mut self, texture: TextureId, instances: &[SpriteInstance]) {
        for instance in instances {
            self.0.draw_sprite(&Sprite::textured(texture, *instance));
        }
    }

    fn touch_texture(&mut self, _texture: TextureId) {}
}

/// Counters for one pass of a [`BatchBuilder`].
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct BatchStats {
    pub flushes: usize,
    pub batches: usize,
    pub individual_draws: usize,
    pub invisible_touched: usize,
}

impl BatchStats {
    #[inline]
    pub fn draw_calls(&self) -> usize {
        self.batches + self.individual_draws
    }
}

/// Groups consecutive same-texture, default-shader drawables into instanced
/// draw calls.
///
/// Drawables must be submitted in final paint order. A batch never spans a
/// texture change or a non-batchable drawable, so painting order is kept.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    config: BatchConfig,
    texture: Option<TextureId>,
    pending: Vec<SpriteInstance>,
    invisible: Vec<TextureId>,
    stats: BatchStats,
}

impl BatchBuilder {
    pub fn new(config: BatchConfig) -> Self {
        Self {
            config,
            texture: None,
            pending: Vec::with_capacity(config.max_batch_size.max(1)),
            invisible: Vec::new(),
            stats: BatchStats::default(),
        }
    }

    #[inline]
    pub fn config(&self) -> BatchConfig {
        self.config
    }

    pub fn set_config(&mut self, config: BatchConfig) {
        self.config = config;
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn submit<S: BatchSink + ?Sized>(&mut self, sink: &mut S, drawable: &dyn Drawable) {
        if !drawable.is_visible() {
            if let Some(texture) = drawable.image_used_in_draw() {
                self.invisible.push(texture);
            }
            return;
        }

        let quad = if drawable.uses_batchable_draw() {
            drawable.image_used_in_draw().zip(drawable.batch_instance())
        } else {
            None
        };
        let Some((texture, instance)) = quad else {
            self.flush(sink);
            sink.draw_drawable(drawable);
            self.stats.individual_draws += 1;
            return;
        };

        if self.texture != Some(texture) || self.pending.len() >= self.config.max_batch_size.max(1)
        {
            self.flush(sink);
        }
        self.texture = Some(texture);
        self.pending.push(instance);
    }

    /// Emits the pending quads.
    pub fn flush<S: BatchSink + ?Sized>(&mut self, sink: &mut S) {
        if let Some(texture) = self.texture.take() {
            if !self.pending.is_empty() {
                self.stats.flushes += 1;
                if self.pending.len() < self.config.min_batch_size {
                    for instance in &self.pending {
                        sink.draw_sprite(&Sprite::textured(texture, *instance));
                    }
                    self.stats.individual_draws += self.pending.len();
                } else {
                    sink.draw_batch(texture, &self.pending);
                    self.stats.batches += 1;
                }
            }
        }
        self.pending.clear();
    }

    /// Flushes, touches the textures of skipped invisible drawables and
    /// returns the counters of the pass.
    pub fn finish<S: BatchSink + ?Sized>(&mut self, sink: &mut S) -> BatchStats {
        self.flush(sink);

        self.invisible.sort_unstable();
        self.invisible.dedup();
        for texture in self.invisible.drain(..) {
            sink.touch_texture(texture);
            self.stats.invisible_touched += 1;
        }

        std::mem::take(&mut self.stats)
    }
}
