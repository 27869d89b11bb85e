use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};

use slotmap::{new_key_type, SecondaryMap, SlotMap};

use crate::batch::BatchBuilder;
use crate::coords::{Aabb, Camera, CameraTransform, Vec2};
use crate::dirty::{expand_to_fixed_point, iteration_cap, DirtyRegionTracker};
use crate::drawable::{Drawable, DrawableRef};
use crate::error::RenderResult;
use crate::paint::Color;
use crate::raster::{RasterCanvas, RasterImage, RasterSurface, TextureSet};
use crate::render::{CompositeProgram, CompositeSettings, GpuLayerBackend};
use crate::sort::{DrawScheduler, Resolution, SortKey, SortMode};
use crate::spatial::QuadTree;
use crate::sprite::{ShaderId, TextureId};

use super::{DrawStrategy, FrameStats, LayerConfig, RenderMode};

new_key_type! {
    /// Handle of a drawable within one [`Layer`].
    pub struct DrawableKey;
}

/// Canvas-space boxes that went through world space are snapped with this
/// tolerance so the round trip cannot grow them by a pixel.
const SNAP_EPSILON: f32 = 1e-3;

/// The layer's bookkeeping for one drawable it does not own.
struct Entry {
    drawable: Weak<RefCell<dyn Drawable>>,
    /// Insertion order; default paint order and sort tie-break.
    id: u64,
    /// Box as last reported (and indexed).
    bounds: Aabb,
    indexed: bool,
    always_draw: bool,
    needs_drawing: bool,
}

impl Entry {
    #[inline]
    fn upgrade(&self) -> Option<DrawableRef> {
        self.drawable.upgrade()
    }
}

fn canvas_size(screen: Vec2, resolution: f32) -> (u32, u32) {
    let w = (screen.x * resolution).round().max(1.0) as u32;
    let h = (screen.y * resolution).round().max(1.0) as u32;
    (w, h)
}

/// Snaps a world box to whole canvas pixels and clips it to the canvas.
fn clamp_to_canvas(transform: &CameraTransform, canvas: Aabb, world: Aabb) -> Option<Aabb> {
    let clip = canvas_clip(transform, canvas, world)?;
    Some(transform.canvas_to_world_box(clip))
}

fn canvas_clip(transform: &CameraTransform, canvas: Aabb, world: Aabb) -> Option<Aabb> {
    transform
        .world_to_canvas_box(world)
        .snapped_out_tolerant(SNAP_EPSILON)
        .intersection(canvas)
}

/// Incremental renderer for one layer of drawables.
///
/// Frame flow: resolve paint order, grow the dirty region to its fixed point,
/// flag the drawables intersecting it, clear the region and repaint them
/// (directly on the raster path, through the batcher on the GPU path). The
/// layer's surface or main target keeps its contents between frames;
/// [`composite_raster`](Self::composite_raster) and
/// [`composite_gpu`](Self::composite_gpu) put it onto a destination.
///
/// No method fails: invalid input is logged and ignored, and GPU problems
/// degrade to the raster path.
pub struct Layer {
    config: LayerConfig,

    entries: SlotMap<DrawableKey, Entry>,
    index: QuadTree<DrawableKey>,
    dirty: DirtyRegionTracker,
    scheduler: DrawScheduler<DrawableKey>,
    batcher: BatchBuilder,
    textures: TextureSet,
    strategy: DrawStrategy,

    screen_size: Vec2,
    camera: Option<Camera>,
    transform: CameraTransform,

    next_id: u64,
    always_draw: usize,
    sprite_shaders: HashMap<ShaderId, String>,
    post_process: Option<String>,
    composite_dirty: bool,
    last_stats: FrameStats,

    warned_downgrade: bool,
    warned_raster_effects: bool,
    warned_missing: bool,
}

impl Layer {
    /// Creates a layer for a screen of `width` x `height` logical pixels.
    pub fn new(config: LayerConfig, width: u32, height: u32) -> Self {
        let screen_size = Vec2::new(width.max(1) as f32, height.max(1) as f32);
        let resolution = if config.resolution_factor.is_finite() && config.resolution_factor > 0.0 {
            config.resolution_factor
        } else {
            log::warn!("invalid resolution factor {}; using 1", config.resolution_factor);
            1.0
        };
        let config = LayerConfig { resolution_factor: resolution, ..config };
        let (cw, ch) = canvas_size(screen_size, resolution);

        let mut warned_downgrade = false;
        let strategy = match DrawStrategy::new(&config.render_mode, cw, ch) {
            Ok(strategy) => strategy,
            Err(err) => {
                log::warn!("{err}; layer falls back to raster");
                warned_downgrade = true;
                DrawStrategy::Raster(RasterSurface::new(cw, ch))
            }
        };

        let mut dirty = DirtyRegionTracker::new();
        dirty.request_full_redraw();

        Self {
            entries: SlotMap::with_key(),
            index: QuadTree::new(config.index),
            dirty,
            scheduler: DrawScheduler::new(config.sort_mode.clone()),
            batcher: BatchBuilder::new(config.batch),
            textures: TextureSet::new(),
            strategy,
            screen_size,
            camera: None,
            transform: CameraTransform::new(Vec2::splat(1.0), Vec2::zero(), resolution),
            next_id: 0,
            always_draw: 0,
            sprite_shaders: HashMap::new(),
            post_process: None,
            composite_dirty: true,
            last_stats: FrameStats::default(),
            warned_downgrade,
            warned_raster_effects: false,
            warned_missing: false,
            config,
        }
    }

    // ── drawables ─────────────────────────────────────────────────────────

    /// Starts tracking `drawable`. The layer keeps only a weak reference.
    pub fn add_drawable(&mut self, drawable: DrawableRef) -> DrawableKey {
        let (bounds, always_draw) = {
            let d = drawable.borrow();
            (d.bounding_box(), d.is_always_drawing())
        };
        let id = self.next_id;
        self.next_id += 1;

        let key = self.entries.insert(Entry {
            drawable: Rc::downgrade(&drawable),
            id,
            bounds,
            indexed: false,
            always_draw,
            needs_drawing: false,
        });
        if always_draw {
            self.always_draw += 1;
        }
        self.scheduler.push(key);
        self.index_entry(key, bounds);
        self.dirty.add_dirty_area(bounds);
        key
    }

    /// Stops tracking `key`; `false` when it was not tracked.
    pub fn remove_drawable(&mut self, key: DrawableKey) -> bool {
        let Some(entry) = self.entries.remove(key) else {
            return false;
        };
        self.index.remove(key);
        self.scheduler.remove(key);
        if entry.always_draw {
            self.always_draw -= 1;
        }
        if entry.indexed {
            self.dirty.add_dirty_area(entry.bounds);
        }
        true
    }

    /// Re-reads the drawable after it moved or changed appearance.
    ///
    /// Both the old and the new box are invalidated.
    pub fn on_drawable_changed(&mut self, key: DrawableKey) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return false;
        };
        let (old, was_indexed, was_always) = (entry.bounds, entry.indexed, entry.always_draw);
        let Some(drawable) = entry.upgrade() else {
            self.remove_drawable(key);
            return false;
        };
        let (bounds, always_draw) = {
            let d = drawable.borrow();
            (d.bounding_box(), d.is_always_drawing())
        };

        if was_indexed {
            self.dirty.add_dirty_area(old);
        }
        self.dirty.add_dirty_area(bounds);
        self.index_entry(key, bounds);

        if always_draw != was_always {
            if always_draw {
                self.always_draw += 1;
            } else {
                self.always_draw -= 1;
            }
            if let Some(entry) = self.entries.get_mut(key) {
                entry.always_draw = always_draw;
            }
        }
        if self.scheduler.sort_mode().is_sorting() {
            self.scheduler.notify_moved(key);
        }
        true
    }

    #[inline]
    pub fn contains(&self, key: DrawableKey) -> bool {
        self.entries.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paint order, back to front.
    #[inline]
    pub fn draw_order(&self) -> &[DrawableKey] {
        self.scheduler.order()
    }

    /// (Re)indexes `key` at `bounds`, growing the index when needed.
    fn index_entry(&mut self, key: DrawableKey, bounds: Aabb) {
        self.index.remove(key);
        let indexed = match bounds.first_non_finite_field() {
            Some(field) => {
                log::warn!("drawable {key:?} has a non-finite `{field}` ({bounds:?}); not indexed");
                false
            }
            None => {
                if !self.index.contains_region(bounds) {
                    let region = self.index.region().union(bounds).scaled_about_center(1.5);
                    self.index.rebuild(region);
                }
                match self.index.insert(key, bounds) {
                    Ok(()) => true,
                    Err(err) => {
                        log::warn!("{err}");
                        false
                    }
                }
            }
        };
        if let Some(entry) = self.entries.get_mut(key) {
            entry.bounds = bounds;
            entry.indexed = indexed;
        }
    }

    fn purge_dropped(&mut self) {
        let dead: Vec<DrawableKey> = self
            .entries
            .iter()
            .filter(|(_, e)| e.drawable.strong_count() == 0)
            .map(|(k, _)| k)
            .collect();
        for key in dead {
            log::debug!("drawable {key:?} was dropped without being removed");
            self.remove_drawable(key);
        }
    }

    // ── invalidation ──────────────────────────────────────────────────────

    /// Marks a world rectangle for redraw; degenerate rectangles are refused.
    pub fn invalidate_area(&mut self, area: Aabb) -> bool {
        self.dirty.add_dirty_area(area)
    }

    /// Redraws the whole visible area on the next frame.
    pub fn request_full_redraw(&mut self) {
        self.dirty.request_full_redraw();
    }

    /// Invalidates everything and asks whoever composites this layer to do so again.
    fn full_redraw(&mut self) {
        self.dirty.request_full_redraw();
        self.composite_dirty = true;
    }

    // ── view ──────────────────────────────────────────────────────────────

    /// Sets the world → screen mapping directly; drops any camera.
    pub fn set_transform(&mut self, scale: Vec2, translate: Vec2) {
        let next = CameraTransform::new(scale, translate, self.config.resolution_factor);
        if !next.is_invertible() {
            log::warn!("ignoring non-invertible transform: scale {scale:?}, translate {translate:?}");
            return;
        }
        self.camera = None;
        self.apply_transform(next);
    }

    /// Centers `camera` on the screen; kept across resizes.
    pub fn set_camera(&mut self, camera: Camera) {
        if !camera.is_finite() || camera.zoom == 0.0 {
            log::warn!("ignoring invalid camera {camera:?}");
            return;
        }
        self.camera = Some(camera);
        self.apply_transform(camera.to_transform(self.screen_size, self.config.resolution_factor));
    }

    fn apply_transform(&mut self, next: CameraTransform) {
        if next != self.transform {
            self.transform = next;
            self.full_redraw();
        }
    }

    #[inline]
    pub fn camera(&self) -> Option<Camera> {
        self.camera
    }

    #[inline]
    pub fn transform(&self) -> &CameraTransform {
        &self.transform
    }

    /// Resizes the screen (logical pixels); the canvas follows the resolution factor.
    pub fn resize(&mut self, width: u32, height: u32) {
        let size = Vec2::new(width.max(1) as f32, height.max(1) as f32);
        if size == self.screen_size {
            return;
        }
        self.screen_size = size;
        self.resize_canvas();
    }

    pub fn set_resolution_factor(&mut self, factor: f32) {
        if !factor.is_finite() || factor <= 0.0 {
            log::warn!("ignoring invalid resolution factor {factor}");
            return;
        }
        if factor == self.config.resolution_factor {
            return;
        }
        self.config.resolution_factor = factor;
        self.transform.resolution = factor;
        self.resize_canvas();
    }

    fn resize_canvas(&mut self) {
        let (w, h) = self.canvas_size();
        if let Err(err) = self.strategy.resize(w, h) {
            self.fall_back_to_raster(err);
        }
        if let Some(camera) = self.camera {
            self.transform = camera.to_transform(self.screen_size, self.config.resolution_factor);
        }
        self.full_redraw();
    }

    #[inline]
    pub fn screen_size(&self) -> Vec2 {
        self.screen_size
    }

    /// Surface size in physical pixels.
    #[inline]
    pub fn canvas_size(&self) -> (u32, u32) {
        canvas_size(self.screen_size, self.config.resolution_factor)
    }

    fn canvas_box(&self) -> Aabb {
        let (w, h) = self.canvas_size();
        Aabb::new(0.0, 0.0, w as f32, h as f32)
    }

    /// World rectangle currently on screen.
    pub fn visible_world(&self) -> Aabb {
        self.transform.canvas_to_world_box(self.canvas_box())
    }

    // ── coordinate conversions ────────────────────────────────────────────

    #[inline]
    pub fn world_to_screen(&self, p: Vec2) -> Vec2 {
        self.transform.world_to_screen(p)
    }

    #[inline]
    pub fn screen_to_world(&self, p: Vec2) -> Vec2 {
        self.transform.screen_to_world(p)
    }

    #[inline]
    pub fn world_to_canvas(&self, p: Vec2) -> Vec2 {
        self.transform.world_to_canvas(p)
    }

    #[inline]
    pub fn canvas_to_world(&self, p: Vec2) -> Vec2 {
        self.transform.canvas_to_world(p)
    }

    #[inline]
    pub fn world_to_screen_dir(&self, d: Vec2) -> Vec2 {
        self.transform.world_to_screen_dir(d)
    }

    #[inline]
    pub fn screen_to_world_dir(&self, d: Vec2) -> Vec2 {
        self.transform.screen_to_world_dir(d)
    }

    #[inline]
    pub fn world_to_canvas_dir(&self, d: Vec2) -> Vec2 {
        self.transform.world_to_canvas_dir(d)
    }

    #[inline]
    pub fn canvas_to_world_dir(&self, d: Vec2) -> Vec2 {
        self.transform.canvas_to_world_dir(d)
    }

    #[inline]
    pub fn world_to_screen_box(&self, b: Aabb) -> Aabb {
        self.transform.world_to_screen_box(b)
    }

    #[inline]
    pub fn screen_to_world_box(&self, b: Aabb) -> Aabb {
        self.transform.screen_to_world_box(b)
    }

    #[inline]
    pub fn world_to_canvas_box(&self, b: Aabb) -> Aabb {
        self.transform.world_to_canvas_box(b)
    }

    #[inline]
    pub fn canvas_to_world_box(&self, b: Aabb) -> Aabb {
        self.transform.canvas_to_world_box(b)
    }

    // ── hit testing ───────────────────────────────────────────────────────

    /// Indexed drawables whose box intersects `area`, in no particular order.
    pub fn query_area(&self, area: Aabb) -> Vec<DrawableKey> {
        self.index.query_area(area)
    }

    /// Visible drawables under the world point `p`, topmost first.
    ///
    /// Rotated drawables are tested against their oriented box.
    pub fn hit_test(&self, p: Vec2) -> Vec<DrawableKey> {
        let area = Aabb::from_origin_size(p, Vec2::splat(SNAP_EPSILON));
        let candidates: HashSet<DrawableKey> = self.index.query_area(area).into_iter().collect();
        self.scheduler
            .order()
            .iter()
            .rev()
            .copied()
            .filter(|key| candidates.contains(key))
            .filter(|key| self.hits(*key, p))
            .collect()
    }

    fn hits(&self, key: DrawableKey, p: Vec2) -> bool {
        let Some(drawable) = self.entries.get(key).and_then(Entry::upgrade) else {
            return false;
        };
        let d = drawable.borrow();
        d.is_visible()
            && match d.oriented_box() {
                Some(obb) => obb.contains_point(p),
                None => d.bounding_box().contains_point(p),
            }
    }

    // ── appearance ────────────────────────────────────────────────────────

    pub fn set_sorting(&mut self, mode: SortMode) {
        log::debug!("sort mode set to {mode:?}");
        self.config.sort_mode = mode.clone();
        self.scheduler.set_sort_mode(mode);
    }

    #[inline]
    pub fn sort_mode(&self) -> &SortMode {
        self.scheduler.sort_mode()
    }

    pub fn set_smoothing(&mut self, smoothing: bool) {
        if smoothing != self.config.smoothing {
            self.config.smoothing = smoothing;
            self.full_redraw();
        }
    }

    pub fn set_clear_color(&mut self, color: Color) {
        if color != self.config.clear_color {
            self.config.clear_color = color;
            self.full_redraw();
        }
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        let opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { 1.0 };
        if opacity != self.config.opacity {
            self.config.opacity = opacity;
            self.composite_dirty = true;
        }
    }

    /// Blur amount in `0..=1`. Only the GPU path blurs.
    pub fn set_blur(&mut self, blur: f32) {
        let blur = if blur.is_finite() { blur.clamp(0.0, 1.0) } else { 0.0 };
        if blur != self.config.blur {
            self.config.blur = blur;
            self.composite_dirty = true;
        }
    }

    pub fn set_always_update_blur(&mut self, always: bool) {
        if always != self.config.always_update_blur {
            self.config.always_update_blur = always;
            self.composite_dirty = true;
        }
    }

    /// Installs a WGSL post-process fragment (`fs_main(in: LaminaPassOut)`),
    /// or removes it with `None`. Only the GPU path runs it.
    pub fn set_post_process_shader(&mut self, source: Option<String>) {
        self.post_process = source.clone();
        if let Some(backend) = self.strategy.gpu_mut() {
            backend.set_post_process(source);
        }
        self.composite_dirty = true;
    }

    /// Registers a custom sprite pixel shader for drawables that name `id`.
    pub fn register_sprite_shader(&mut self, id: ShaderId, source: String) {
        if let Some(backend) = self.strategy.gpu_mut() {
            backend.set_sprite_shader(id, Some(source.clone()));
        }
        self.sprite_shaders.insert(id, source);
        self.full_redraw();
    }

    pub fn unregister_sprite_shader(&mut self, id: ShaderId) -> bool {
        if let Some(backend) = self.strategy.gpu_mut() {
            backend.set_sprite_shader(id, None);
        }
        let removed = self.sprite_shaders.remove(&id).is_some();
        if removed {
            self.full_redraw();
        }
        removed
    }

    #[inline]
    pub fn config(&self) -> &LayerConfig {
        &self.config
    }

    // ── textures ──────────────────────────────────────────────────────────

    /// Makes `image` available to both backends under `id`.
    ///
    /// An image too large for the GPU device moves the layer to raster.
    /// Returns `true` when an earlier image was replaced.
    pub fn register_texture(&mut self, id: TextureId, image: RasterImage) -> bool {
        let fits = match self.strategy.gpu() {
            Some(backend) => backend.check_texture_size(image.width(), image.height()),
            None => Ok(()),
        };
        let replaced = self.textures.insert(id, image);
        if let Some(backend) = self.strategy.gpu_mut() {
            backend.forget_texture(id);
        }
        if let Err(err) = fits {
            self.fall_back_to_raster(err);
        }
        self.full_redraw();
        replaced
    }

    pub fn unregister_texture(&mut self, id: TextureId) -> bool {
        let removed = self.textures.remove(id);
        if let Some(backend) = self.strategy.gpu_mut() {
            backend.forget_texture(id);
        }
        if removed {
            self.full_redraw();
        }
        removed
    }

    #[inline]
    pub fn textures(&self) -> &TextureSet {
        &self.textures
    }

    // ── backend ───────────────────────────────────────────────────────────

    /// Switches backend; drawables stay tracked and the next frame is a full
    /// redraw. A GPU mode that cannot be set up falls back to raster.
    pub fn set_render_mode(&mut self, mode: RenderMode) {
        let (w, h) = self.canvas_size();
        let built = DrawStrategy::new(&mode, w, h).and_then(|strategy| {
            self.check_textures(&strategy)?;
            Ok(strategy)
        });
        let (strategy, mode) = match built {
            Ok(strategy) => (strategy, mode),
            Err(err) => {
                if !self.warned_downgrade {
                    log::warn!("{err}; layer falls back to raster");
                    self.warned_downgrade = true;
                }
                (DrawStrategy::Raster(RasterSurface::new(w, h)), RenderMode::Raster)
            }
        };
        log::debug!("layer render mode: {mode:?}");
        self.strategy = strategy;
        self.config.render_mode = mode;

        if let Some(backend) = self.strategy.gpu_mut() {
            for (id, source) in &self.sprite_shaders {
                backend.set_sprite_shader(*id, Some(source.clone()));
            }
            backend.set_post_process(self.post_process.clone());
        }
        self.full_redraw();
    }

    #[inline]
    pub fn is_gpu(&self) -> bool {
        self.strategy.is_gpu()
    }

    /// The raster surface, when drawing through the raster path.
    #[inline]
    pub fn surface(&self) -> Option<&RasterSurface> {
        self.strategy.surface()
    }

    #[inline]
    pub fn gpu(&self) -> Option<&GpuLayerBackend> {
        self.strategy.gpu()
    }

    /// Downgrades to raster once the GPU device is gone.
    fn check_backend(&mut self) {
        let Some(backend) = self.strategy.gpu_mut() else {
            return;
        };
        if !backend.is_lost() {
            return;
        }
        backend.evict_programs();
        self.fall_back_to_raster("GPU device lost");
    }

    /// Every registered texture must fit the GPU device.
    fn check_textures(&self, strategy: &DrawStrategy) -> RenderResult<()> {
        if let Some(backend) = strategy.gpu() {
            for (_, image) in self.textures.iter() {
                backend.check_texture_size(image.width(), image.height())?;
            }
        }
        Ok(())
    }

    /// Leaves the GPU path for good; the reason is logged once per layer.
    fn fall_back_to_raster(&mut self, reason: impl fmt::Display) {
        if !self.warned_downgrade {
            log::warn!("{reason}; layer continues in raster mode");
            self.warned_downgrade = true;
        }
        self.set_render_mode(RenderMode::Raster);
    }

    // ── frame ─────────────────────────────────────────────────────────────

    /// Stats of the most recent [`draw`](Self::draw).
    #[inline]
    pub fn last_stats(&self) -> FrameStats {
        self.last_stats
    }

    /// Repaints whatever changed since the last frame.
    ///
    /// Returns immediately (idle stats) when nothing did.
    pub fn draw(&mut self, force_redraw: bool) -> FrameStats {
        self.check_backend();
        if force_redraw {
            self.dirty.request_full_redraw();
        }
        self.purge_dropped();
        self.resolve_order();
        self.invalidate_always_drawing();

        let stats = if self.dirty.has_anything_changed(self.config.use_index, self.always_draw) {
            self.render_frame()
        } else {
            FrameStats::default()
        };
        self.dirty.clear();
        if !stats.is_idle() {
            log::debug!(
                "redrew {:?}{}: {} drawables, {} draw calls",
                stats.redrawn,
                if stats.full_redraw { " (full)" } else { "" },
                stats.drawables_drawn,
                stats.draw_calls
            );
            self.composite_dirty = true;
        }
        self.last_stats = stats;
        stats
    }

    fn resolve_order(&mut self) {
        if !self.scheduler.is_full_sort_pending() && self.scheduler.moved_count() == 0 {
            return;
        }

        let entries = &self.entries;
        let id_of = |key: DrawableKey| entries.get(key).map_or(u64::MAX, |e| e.id);
        let mut swapped = Vec::new();

        let resolution = match self.scheduler.sort_mode().clone() {
            SortMode::None => self
                .scheduler
                .resolve_order(|a, b| id_of(a).cmp(&id_of(b)), |k| swapped.push(k)),
            mode @ (SortMode::BottomToTop | SortMode::TopToBottom) => {
                let descending = matches!(mode, SortMode::TopToBottom);
                // Computed per comparison: a local repair only looks at neighbours.
                let key_of = |k: DrawableKey| {
                    let Some(entry) = entries.get(k) else {
                        return SortKey::new(f32::NAN, u64::MAX);
                    };
                    match entry.upgrade() {
                        Some(d) => {
                            let d = d.borrow();
                            SortKey::from_anchor(d.position(), d.size(), d.sort_point(), entry.id)
                        }
                        None => SortKey::new(f32::NAN, entry.id),
                    }
                };
                self.scheduler.resolve_order(
                    |a, b| {
                        let (ka, kb) = (key_of(a), key_of(b));
                        if descending { ka.top_to_bottom(&kb) } else { ka.bottom_to_top(&kb) }
                    },
                    |k| swapped.push(k),
                )
            }
            SortMode::Custom(cmp) => {
                let live: SecondaryMap<DrawableKey, DrawableRef> =
                    entries.iter().filter_map(|(k, e)| e.upgrade().map(|d| (k, d))).collect();
                self.scheduler.resolve_order(
                    |a, b| {
                        let by_user = match (live.get(a), live.get(b)) {
                            (Some(x), Some(y)) => cmp(&*x.borrow(), &*y.borrow()),
                            _ => std::cmp::Ordering::Equal,
                        };
                        by_user.then_with(|| id_of(a).cmp(&id_of(b)))
                    },
                    |k| swapped.push(k),
                )
            }
        };

        for key in swapped {
            if let Some(entry) = self.entries.get(key) {
                if entry.indexed {
                    self.dirty.add_dirty_area(entry.bounds);
                }
            }
        }
        if let Resolution::FullSort { reordered: true } = resolution {
            self.dirty.request_full_redraw();
        }
    }

    /// Always-drawing objects are redrawn every frame wherever they are; when
    /// one moved silently its previous box is repainted too.
    fn invalidate_always_drawing(&mut self) {
        if self.always_draw == 0 {
            return;
        }
        let live: Vec<(DrawableKey, Aabb)> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.always_draw)
            .filter_map(|(key, entry)| {
                let drawable = entry.upgrade()?;
                let bounds = drawable.borrow().bounding_box();
                Some((key, bounds))
            })
            .collect();

        for (key, bounds) in live {
            let Some(entry) = self.entries.get(key) else {
                continue;
            };
            if entry.bounds != bounds {
                if entry.indexed {
                    self.dirty.add_dirty_area(entry.bounds);
                }
                self.index_entry(key, bounds);
            }
            self.dirty.add_dirty_area(bounds);
        }
    }

    fn render_frame(&mut self) -> FrameStats {
        let mut stats = FrameStats::default();
        let canvas = self.canvas_box();
        let transform = self.transform;
        let screen_world = transform.canvas_to_world_box(canvas);

        let full = self.dirty.is_full_redraw_pending() || !self.config.use_index;
        let initial = if full { Some(screen_world) } else { self.dirty.consume_and_merge(screen_world) };
        let Some(initial) = initial else {
            return stats;
        };

        let region = if full {
            clamp_to_canvas(&transform, canvas, initial)
        } else {
            let entries = &self.entries;
            let expansion = expand_to_fixed_point(
                initial,
                &self.index,
                iteration_cap(self.index.depth()),
                |world| clamp_to_canvas(&transform, canvas, world),
                |key, _indexed| {
                    let entry = entries.get(key)?;
                    let drawable = entry.upgrade()?;
                    let d = drawable.borrow();
                    (d.is_visible() || entry.always_draw).then(|| d.bounding_box())
                },
            );
            match expansion {
                Ok(Some(expansion)) => {
                    log::trace!(
                        "dirty region {initial:?} settled at {:?} after {} iterations",
                        expansion.region,
                        expansion.iterations
                    );
                    stats.expansion_iterations = expansion.iterations;
                    stats.full_redraw = expansion.capped;
                    Some(expansion.region)
                }
                Ok(None) => None,
                Err(err) => {
                    log::error!("frame skipped: {err}");
                    stats.skipped_invalid = 1;
                    return stats;
                }
            }
        };
        let Some(region) = region else {
            return stats;
        };
        let Some(clip) = canvas_clip(&transform, canvas, region) else {
            return stats;
        };

        self.flag_drawables(region);
        let flagged: Vec<DrawableRef> = self
            .scheduler
            .order()
            .iter()
            .filter_map(|key| self.entries.get(*key))
            .filter(|entry| entry.needs_drawing)
            .filter_map(Entry::upgrade)
            .collect();

        match &mut self.strategy {
            DrawStrategy::Raster(surface) => {
                surface.set_clip(Some(clip));
                surface.clear_rect(clip, self.config.clear_color);
                let mut canvas =
                    RasterCanvas::new(surface, &self.textures, transform, self.config.smoothing);
                for drawable in &flagged {
                    let d = drawable.borrow();
                    if d.is_visible() {
                        d.draw(&mut canvas);
                        stats.drawables_drawn += 1;
                    }
                }
                stats.draw_calls = canvas.sprite_count();
                stats.individual_draws = stats.draw_calls;
                if !self.warned_missing && !canvas.missing_textures().is_empty() {
                    log::warn!(
                        "textures {:?} are not registered; drawing nothing for them",
                        canvas.missing_textures()
                    );
                    self.warned_missing = true;
                }
                drop(canvas);
                surface.set_clip(None);
            }
            DrawStrategy::Gpu(backend) => {
                let recorder = backend.begin_frame();
                for drawable in &flagged {
                    let d = drawable.borrow();
                    if d.is_visible() {
                        stats.drawables_drawn += 1;
                    }
                    self.batcher.submit(&mut *recorder, &*d);
                }
                let batch = self.batcher.finish(&mut *recorder);
                stats.batches = batch.batches;
                stats.individual_draws = batch.individual_draws;
                stats.invisible_touched = batch.invisible_touched;
                stats.draw_calls = backend.render(
                    &self.textures,
                    clip,
                    self.config.clear_color,
                    transform,
                    self.config.smoothing,
                );
            }
        }

        stats.full_redraw |= full;
        stats.redrawn = Some(region);
        stats
    }

    /// Sets `needs_drawing` on everything that must be repainted in `region`.
    fn flag_drawables(&mut self, region: Aabb) {
        for (_, entry) in self.entries.iter_mut() {
            entry.needs_drawing = false;
        }
        if self.config.use_index {
            let entries = &mut self.entries;
            self.index.query(region, |key, _| {
                if let Some(entry) = entries.get_mut(key) {
                    entry.needs_drawing = true;
                }
            });
            for (_, entry) in self.entries.iter_mut() {
                entry.needs_drawing |= entry.always_draw;
            }
        } else {
            for (_, entry) in self.entries.iter_mut() {
                entry.needs_drawing = entry.indexed || entry.always_draw;
            }
        }
    }

    // ── compositing ───────────────────────────────────────────────────────

    /// `true` once per change that requires compositing this layer again.
    pub fn take_composite_dirty(&mut self) -> bool {
        std::mem::take(&mut self.composite_dirty)
    }

    pub fn composite_settings(&self) -> CompositeSettings {
        CompositeSettings {
            opacity: self.config.opacity,
            blur: self.config.blur,
            always_update_blur: self.config.always_update_blur,
            smoothing: self.config.smoothing,
        }
    }

    /// Draws the raster surface over `dest` at the layer's opacity.
    ///
    /// Blur and post-process shaders need the GPU path and are ignored here.
    /// Returns `false` for a GPU layer, which cannot composite onto a CPU surface.
    pub fn composite_raster(&mut self, dest: &mut RasterSurface) -> bool {
        match &self.strategy {
            DrawStrategy::Raster(surface) => {
                let effects = self.config.blur > 0.0 || self.post_process.is_some();
                if effects && !self.warned_raster_effects {
                    log::info!("blur and post-process shaders need the GPU path; compositing with opacity only");
                    self.warned_raster_effects = true;
                }
                dest.composite_from(surface, self.config.opacity);
                true
            }
            DrawStrategy::Gpu(_) => {
                if !self.warned_raster_effects {
                    log::warn!("a GPU layer cannot composite onto a raster surface; skipped");
                    self.warned_raster_effects = true;
                }
                false
            }
        }
    }

    /// Records compositing the main target onto `dest`; `None` for a raster
    /// layer or when no composite program could be built.
    pub fn composite_gpu(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        dest: &wgpu::TextureView,
        dest_format: wgpu::TextureFormat,
    ) -> Option<CompositeProgram> {
        let settings = self.composite_settings();
        self.strategy.gpu_mut()?.composite_with(encoder, dest, dest_format, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drawable::RectDrawable;
    use crate::sprite::SpriteDrawable;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn layer(w: u32, h: u32) -> Layer {
        crate::logging::init_test_logging();
        Layer::new(LayerConfig::default(), w, h)
    }

    fn rect(x: f32, y: f32, w: f32, h: f32, color: Color) -> Rc<RefCell<RectDrawable>> {
        Rc::new(RefCell::new(RectDrawable::new(Aabb::new(x, y, x + w, y + h), color)))
    }

    fn pixels(layer: &Layer) -> Vec<Color> {
        layer.surface().unwrap().pixels().to_vec()
    }

    #[test]
    fn single_drawable_scenario() {
        let mut layer = layer(100, 100);
        let d = rect(10.0, 10.0, 20.0, 20.0, Color::white());
        let key = layer.add_drawable(d.clone());

        let first = layer.draw(false);
        assert!(first.full_redraw);
        assert_eq!(first.redrawn, Some(Aabb::new(0.0, 0.0, 100.0, 100.0)));
        assert_eq!(first.drawables_drawn, 1);

        let second = layer.draw(false);
        assert!(second.is_idle());

        d.borrow_mut().rect = Aabb::new(15.0, 10.0, 35.0, 30.0);
        assert!(layer.on_drawable_changed(key));
        let third = layer.draw(false);
        assert!(!third.full_redraw);
        assert_eq!(third.redrawn, Some(Aabb::new(10.0, 10.0, 35.0, 30.0)));
        assert_eq!(layer.surface().unwrap().pixel(12, 12), Color::transparent());
        assert_eq!(layer.surface().unwrap().pixel(33, 12), Color::white());
    }

    #[test]
    fn overlapping_neighbours_are_pulled_into_the_region() {
        let mut layer = layer(100, 100);
        let a = rect(10.0, 10.0, 10.0, 10.0, Color::white());
        let b = rect(18.0, 10.0, 12.0, 10.0, Color::black());
        let ka = layer.add_drawable(a.clone());
        layer.add_drawable(b.clone());
        layer.draw(false);

        a.borrow_mut().color = Color::from_straight(1.0, 0.0, 0.0, 1.0);
        layer.on_drawable_changed(ka);
        let stats = layer.draw(false);
        assert_eq!(stats.redrawn, Some(Aabb::new(10.0, 10.0, 30.0, 20.0)));
        assert_eq!(stats.drawables_drawn, 2);
    }

    #[test]
    fn degenerate_invalidation_is_not_a_full_redraw() {
        let mut layer = layer(50, 50);
        let d = rect(0.0, 0.0, 5.0, 5.0, Color::white());
        layer.add_drawable(d.clone());
        layer.draw(false);
        assert!(!layer.invalidate_area(Aabb::new(10.0, 10.0, 10.0, 20.0)));
        assert!(!layer.invalidate_area(Aabb::new(f32::NAN, 0.0, 1.0, 1.0)));
        assert!(layer.draw(false).is_idle());
    }

    #[test]
    fn dropped_drawables_are_purged_and_erased() {
        let mut layer = layer(40, 40);
        let d = rect(5.0, 5.0, 10.0, 10.0, Color::white());
        let key = layer.add_drawable(d.clone());
        layer.draw(false);
        assert_eq!(layer.surface().unwrap().pixel(6, 6), Color::white());

        drop(d);
        let stats = layer.draw(false);
        assert!(!layer.contains(key));
        assert_eq!(stats.redrawn, Some(Aabb::new(5.0, 5.0, 15.0, 15.0)));
        assert_eq!(layer.surface().unwrap().pixel(6, 6), Color::transparent());
    }

    #[test]
    fn removal_of_unknown_key_is_a_no_op() {
        let mut layer = layer(10, 10);
        let d = rect(0.0, 0.0, 1.0, 1.0, Color::white());
        let key = layer.add_drawable(d.clone());
        assert!(layer.remove_drawable(key));
        assert!(!layer.remove_drawable(key));
        assert!(!layer.on_drawable_changed(key));
    }

    #[test]
    fn non_finite_drawables_stay_out_of_the_index() {
        let mut layer = layer(20, 20);
        let bad = rect(f32::NAN, 0.0, 4.0, 4.0, Color::white());
        let key = layer.add_drawable(bad.clone());
        assert!(layer.query_area(Aabb::new(-100.0, -100.0, 100.0, 100.0)).is_empty());
        assert!(layer.contains(key));
        let stats = layer.draw(false);
        assert_eq!(stats.drawables_drawn, 0);
    }

    #[test]
    fn unreported_non_finite_move_skips_the_frame() {
        let mut layer = layer(50, 50);
        let d = rect(10.0, 10.0, 10.0, 10.0, Color::white());
        layer.add_drawable(d.clone());
        layer.draw(false);

        d.borrow_mut().rect = Aabb::new(f32::INFINITY, 10.0, 20.0, 20.0);
        layer.invalidate_area(Aabb::new(12.0, 12.0, 14.0, 14.0));
        let stats = layer.draw(false);
        assert_eq!(stats.skipped_invalid, 1);
        assert!(stats.is_idle());
        // The dirty list was still consumed.
        assert!(layer.draw(false).is_idle());
    }

    #[test]
    fn index_grows_for_far_away_drawables() {
        let mut layer = layer(10, 10);
        let far = rect(10_000.0, 10_000.0, 4.0, 4.0, Color::white());
        let key = layer.add_drawable(far.clone());
        layer.draw(false);
        assert!(layer.contains(key));
        assert_eq!(layer.query_area(Aabb::new(9_999.0, 9_999.0, 10_010.0, 10_010.0)), vec![key]);
    }

    #[test]
    fn hit_test_is_topmost_first() {
        let mut layer = layer(40, 40);
        let (lower, upper) = (
            rect(0.0, 0.0, 20.0, 20.0, Color::white()),
            rect(10.0, 10.0, 20.0, 20.0, Color::black()),
        );
        let below = layer.add_drawable(lower.clone());
        let above = layer.add_drawable(upper.clone());
        let hidden = rect(0.0, 0.0, 40.0, 40.0, Color::white());
        hidden.borrow_mut().visible = false;
        layer.add_drawable(hidden.clone());
        layer.draw(false);

        assert_eq!(layer.hit_test(Vec2::new(15.0, 15.0)), vec![above, below]);
        assert_eq!(layer.hit_test(Vec2::new(5.0, 5.0)), vec![below]);
        assert!(layer.hit_test(Vec2::new(35.0, 5.0)).is_empty());
    }

    #[test]
    fn hit_test_scans_a_crowded_point() {
        let mut layer = layer(200, 200);
        let mut stacked = Vec::new();
        let mut kept = Vec::new();
        for i in 0..300 {
            let d = if i % 3 == 0 {
                rect(0.0, 0.0, 10.0, 10.0, Color::white())
            } else {
                rect(20.0 + (i % 17) as f32 * 10.0, 20.0 + (i % 13) as f32 * 10.0, 8.0, 8.0, Color::black())
            };
            let key = layer.add_drawable(d.clone());
            if i % 3 == 0 {
                stacked.push(key);
            }
            kept.push(d);
        }
        layer.draw(false);

        stacked.reverse();
        assert_eq!(layer.hit_test(Vec2::new(5.0, 5.0)), stacked);
        assert!(layer.hit_test(Vec2::new(15.0, 15.0)).is_empty());
    }

    #[test]
    fn live_drawables_survive_repeated_frames() {
        let mut layer = layer(20, 20);
        let kept = rect(2.0, 2.0, 4.0, 4.0, Color::white());
        let key = layer.add_drawable(kept.clone());
        let gone = layer.add_drawable(rect(10.0, 10.0, 4.0, 4.0, Color::white()));
        for _ in 0..3 {
            layer.draw(true);
        }
        assert!(layer.contains(key));
        assert!(!layer.contains(gone));
        assert_eq!(layer.len(), 1);
        assert_eq!(layer.surface().unwrap().pixel(3, 3), Color::white());
        assert_eq!(layer.surface().unwrap().pixel(11, 11), Color::transparent());
    }

    #[test]
    fn always_update_blur_changes_need_a_composite() {
        let mut layer = layer(8, 8);
        layer.draw(false);
        layer.take_composite_dirty();

        layer.set_always_update_blur(true);
        assert!(layer.take_composite_dirty());
        assert!(layer.composite_settings().always_update_blur);

        layer.set_always_update_blur(true);
        assert!(!layer.take_composite_dirty());

        layer.set_always_update_blur(false);
        assert!(layer.take_composite_dirty());
    }

    #[test]
    fn camera_changes_force_a_full_redraw() {
        let mut layer = layer(100, 100);
        let d = rect(0.0, 0.0, 10.0, 10.0, Color::white());
        layer.add_drawable(d.clone());
        layer.draw(false);

        layer.set_camera(Camera::new(0.0, 0.0, 2.0));
        let stats = layer.draw(false);
        assert!(stats.full_redraw);
        assert_eq!(layer.world_to_screen(Vec2::zero()), Vec2::new(50.0, 50.0));
        assert_eq!(layer.visible_world(), Aabb::new(-25.0, -25.0, 25.0, 25.0));
        // The rect covers screen 50..70.
        assert_eq!(layer.surface().unwrap().pixel(60, 60), Color::white());
        assert_eq!(layer.surface().unwrap().pixel(45, 45), Color::transparent());

        layer.set_transform(Vec2::new(0.0, 1.0), Vec2::zero());
        assert_eq!(layer.camera(), Some(Camera::new(0.0, 0.0, 2.0)));
        assert!(layer.draw(false).is_idle());
    }

    #[test]
    fn resolution_factor_scales_the_canvas() {
        let mut layer = layer(20, 10);
        layer.set_resolution_factor(2.0);
        assert_eq!(layer.canvas_size(), (40, 20));
        let d = rect(1.0, 1.0, 2.0, 2.0, Color::white());
        layer.add_drawable(d.clone());
        layer.draw(false);
        let surface = layer.surface().unwrap();
        assert_eq!((surface.width(), surface.height()), (40, 20));
        assert_eq!(surface.pixel(2, 2), Color::white());
        assert_eq!(surface.pixel(5, 5), Color::white());
        assert_eq!(surface.pixel(6, 6), Color::transparent());
    }

    #[test]
    fn bottom_to_top_sort_paints_lower_objects_last() {
        let mut layer = layer(40, 40);
        layer.set_sorting(SortMode::BottomToTop);
        // Added lower-first; sorting must swap them.
        let (lower, upper) = (
            rect(0.0, 10.0, 20.0, 20.0, Color::white()),
            rect(5.0, 0.0, 20.0, 20.0, Color::black()),
        );
        let low = layer.add_drawable(lower.clone());
        let high = layer.add_drawable(upper.clone());
        layer.draw(false);
        assert_eq!(layer.draw_order(), &[high, low]);
        assert_eq!(layer.surface().unwrap().pixel(10, 15), Color::white());
    }

    #[test]
    fn local_repair_redraws_swapped_neighbours() {
        let mut layer = layer(100, 100);
        layer.set_sorting(SortMode::BottomToTop);
        let cells: Vec<_> = (0..10)
            .map(|i| rect(i as f32 * 9.0, i as f32 * 5.0, 10.0, 10.0, Color::white()))
            .collect();
        let keys: Vec<_> = cells.iter().map(|c| layer.add_drawable(c.clone())).collect();
        layer.draw(false);
        assert_eq!(layer.draw_order(), keys.as_slice());

        // Move #2 just below #3: one local swap.
        cells[2].borrow_mut().rect = Aabb::new(18.0, 16.0, 28.0, 26.0);
        layer.on_drawable_changed(keys[2]);
        let stats = layer.draw(false);
        assert!(!stats.full_redraw);
        assert_eq!(&layer.draw_order()[..5], &[keys[0], keys[1], keys[3], keys[2], keys[4]]);
        let redrawn = stats.redrawn.unwrap();
        assert!(redrawn.contains_box(Aabb::new(27.0, 15.0, 37.0, 25.0)));
    }

    #[test]
    fn always_drawing_objects_redraw_every_frame() {
        let mut layer = layer(30, 30);
        let mut sprite = SpriteDrawable::new(None, Vec2::new(2.0, 2.0), Vec2::splat(4.0));
        sprite.always_draw = true;
        let sprite = Rc::new(RefCell::new(sprite));
        layer.add_drawable(sprite.clone());
        layer.draw(false);

        for _ in 0..3 {
            sprite.borrow_mut().translate(Vec2::new(1.0, 0.0));
            let stats = layer.draw(false);
            assert!(!stats.is_idle());
            assert_eq!(stats.drawables_drawn, 1);
        }
    }

    #[test]
    fn registering_textures_forces_a_full_redraw() {
        let mut layer = layer(16, 16);
        let sprite = Rc::new(RefCell::new(SpriteDrawable::new(
            Some(TextureId(3)),
            Vec2::zero(),
            Vec2::splat(8.0),
        )));
        let key = layer.add_drawable(sprite.clone());
        layer.draw(false);
        assert!(layer.contains(key));
        assert_eq!(layer.surface().unwrap().pixel(1, 1), Color::transparent());

        let red = Color::from_straight(1.0, 0.0, 0.0, 1.0);
        assert!(!layer.register_texture(TextureId(3), RasterImage::solid(2, 2, red).unwrap()));
        let stats = layer.draw(false);
        assert!(stats.full_redraw);
        assert_eq!(layer.surface().unwrap().pixel(1, 1), red);

        assert!(layer.unregister_texture(TextureId(3)));
        layer.draw(false);
        assert_eq!(layer.surface().unwrap().pixel(1, 1), Color::transparent());
    }

    #[test]
    fn raster_composite_applies_opacity() {
        let mut layer = layer(4, 4);
        let d = rect(0.0, 0.0, 4.0, 4.0, Color::white());
        layer.add_drawable(d.clone());
        layer.set_opacity(0.5);
        layer.draw(false);
        let mut dest = RasterSurface::new(4, 4);
        assert!(layer.composite_raster(&mut dest));
        let px = dest.pixel(1, 1);
        assert!((px.a - 0.5).abs() < 1e-6);
    }

    /// Incremental frames must match a full repaint of the same scene.
    fn assert_incremental_matches_full(sort: SortMode, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut incremental = layer(96, 64);
        let mut reference = layer(96, 64);
        incremental.set_sorting(sort.clone());
        reference.set_sorting(sort);

        let mut items = Vec::new();
        for i in 0..40 {
            let color = Color::from_straight(
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.3..1.0),
            );
            let mut sprite = SpriteDrawable::new(
                None,
                Vec2::new(rng.gen_range(-10.0..90.0), rng.gen_range(-10.0..60.0)),
                Vec2::new(rng.gen_range(2.0..20.0), rng.gen_range(2.0..20.0)),
            );
            sprite.instance = sprite.instance.with_tint(color);
            if i % 7 == 0 {
                sprite.instance = sprite.instance.with_rotation(rng.gen_range(0.0..3.0));
            }
            let sprite = Rc::new(RefCell::new(sprite));
            let a = incremental.add_drawable(sprite.clone());
            let b = reference.add_drawable(sprite.clone());
            items.push((sprite, a, b));
        }

        for frame in 0..12 {
            let moves = if frame % 4 == 3 { 15 } else { 3 };
            for _ in 0..moves {
                let (sprite, a, b) = &items[rng.gen_range(0..items.len())];
                let d = Vec2::new(rng.gen_range(-6.0..6.0), rng.gen_range(-6.0..6.0));
                sprite.borrow_mut().translate(d);
                incremental.on_drawable_changed(*a);
                reference.on_drawable_changed(*b);
            }
            if frame == 5 {
                let (sprite, _, _) = &items[0];
                sprite.borrow_mut().visible = false;
                incremental.on_drawable_changed(items[0].1);
                reference.on_drawable_changed(items[0].2);
            }

            incremental.draw(false);
            reference.draw(true);
            assert_eq!(incremental.draw_order().len(), reference.draw_order().len());
            assert!(pixels(&incremental) == pixels(&reference), "frame {frame} differs");
        }
    }

    #[test]
    fn incremental_redraw_is_sound() {
        assert_incremental_matches_full(SortMode::None, 1);
    }

    #[test]
    fn incremental_redraw_is_sound_while_sorting() {
        assert_incremental_matches_full(SortMode::BottomToTop, 2);
        assert_incremental_matches_full(SortMode::TopToBottom, 3);
    }

    /// Run only where an adapter is available; otherwise they return early.
    mod gpu {
        use super::*;
        use crate::batch::BatchConfig;
        use crate::device::{GpuContext, GpuContextInit};

        const ATLAS: TextureId = TextureId(7);
        /// Largest per-channel difference between the two backends.
        const TOLERANCE: u8 = 2;

        fn context() -> Option<Rc<GpuContext>> {
            crate::logging::init_test_logging();
            for force_fallback_adapter in [false, true] {
                let init = GpuContextInit { force_fallback_adapter, ..GpuContextInit::default() };
                match GpuContext::new_blocking(init) {
                    Ok(ctx) => return Some(Rc::new(ctx)),
                    Err(err) => log::warn!("no GPU context (fallback {force_fallback_adapter}): {err:#}"),
                }
            }
            None
        }

        fn config(render_mode: RenderMode) -> LayerConfig {
            LayerConfig {
                render_mode,
                batch: BatchConfig { max_batch_size: 256, min_batch_size: 4 },
                clear_color: Color::from_straight(0.2, 0.2, 0.2, 1.0),
                ..LayerConfig::default()
            }
        }

        fn atlas() -> RasterImage {
            let texels = vec![
                Color::from_straight(1.0, 0.0, 0.0, 1.0),
                Color::from_straight(0.0, 1.0, 0.0, 1.0),
                Color::from_straight(0.0, 0.0, 1.0, 1.0),
                Color::white(),
            ];
            RasterImage::new(2, 2, texels).unwrap()
        }

        type Sprites = Vec<(DrawableKey, Rc<RefCell<SpriteDrawable>>)>;

        /// A backdrop rect, then `count` sprites sharing one texture; the
        /// first one is half transparent over the backdrop.
        fn scene(layer: &mut Layer, count: usize) -> (Sprites, Rc<RefCell<RectDrawable>>) {
            layer.register_texture(ATLAS, atlas());
            let backdrop = rect(0.0, 0.0, 64.0, 16.0, Color::from_straight(0.0, 0.4, 0.8, 1.0));
            layer.add_drawable(backdrop.clone());
            let sprites = (0..count)
                .map(|i| {
                    let mut sprite =
                        SpriteDrawable::new(Some(ATLAS), Vec2::new(4.0 + 10.0 * i as f32, 12.0), Vec2::splat(8.0));
                    if i == 0 {
                        sprite.instance = sprite.instance.with_alpha(0.5);
                    }
                    let sprite = Rc::new(RefCell::new(sprite));
                    (layer.add_drawable(sprite.clone()), sprite)
                })
                .collect();
            (sprites, backdrop)
        }

        fn nudge_last(layer: &mut Layer, sprites: &Sprites) {
            let (key, sprite) = sprites.last().unwrap();
            sprite.borrow_mut().translate(Vec2::new(-3.0, 5.0));
            assert!(layer.on_drawable_changed(*key));
        }

        fn assert_same_pixels(raster: &Layer, gpu: &Layer, what: &str) {
            let expected: Vec<u8> = raster
                .surface()
                .unwrap()
                .pixels()
                .iter()
                .flat_map(|c| c.to_array().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
                .collect();
            let actual = gpu.gpu().unwrap().read_main_rgba8().unwrap();
            assert_eq!(actual.len(), expected.len(), "{what}");
            let worst = expected.iter().zip(&actual).map(|(a, b)| a.abs_diff(*b)).max().unwrap_or(0);
            assert!(worst <= TOLERANCE, "{what}: channels differ by up to {worst}");
        }

        #[test]
        fn gpu_matches_raster_below_and_above_the_batch_threshold() {
            let Some(ctx) = context() else { return };
            for count in [2, 6] {
                let mut raster = Layer::new(config(RenderMode::Raster), 64, 32);
                let mut gpu = Layer::new(config(RenderMode::Gpu(ctx.clone())), 64, 32);
                assert!(gpu.is_gpu());
                let (raster_sprites, _raster_backdrop) = scene(&mut raster, count);
                let (gpu_sprites, _gpu_backdrop) = scene(&mut gpu, count);

                raster.draw(false);
                let stats = gpu.draw(false);
                assert_eq!(stats.batches, usize::from(count >= 4), "{count} sprites");
                assert_same_pixels(&raster, &gpu, &format!("{count} sprites, first frame"));

                nudge_last(&mut raster, &raster_sprites);
                nudge_last(&mut gpu, &gpu_sprites);
                raster.draw(false);
                let stats = gpu.draw(false);
                assert!(!stats.full_redraw);
                assert_same_pixels(&raster, &gpu, &format!("{count} sprites, after a move"));
            }
        }

        #[test]
        fn broken_post_process_composites_with_the_default_program() {
            let Some(ctx) = context() else { return };
            let mut layer = Layer::new(config(RenderMode::Gpu(ctx.clone())), 16, 16);
            let d = rect(0.0, 0.0, 8.0, 8.0, Color::white());
            layer.add_drawable(d.clone());
            layer.set_post_process_shader(Some("fn fs_main( {".to_owned()));
            layer.set_blur(0.5);
            layer.set_opacity(0.5);
            layer.draw(false);

            let output = ctx.create_output_texture(16, 16);
            let view = output.create_view(&wgpu::TextureViewDescriptor::default());
            let mut encoder = ctx
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("composite test") });
            let used = layer.composite_gpu(&mut encoder, &view, ctx.target_format());
            ctx.queue().submit(Some(encoder.finish()));
            assert_eq!(used, Some(CompositeProgram::Default));
        }

        #[test]
        fn oversized_canvas_falls_back_to_raster() {
            let Some(ctx) = context() else { return };
            let max = ctx.max_texture_dimension();

            let layer = Layer::new(config(RenderMode::Gpu(ctx.clone())), max + 1, 1);
            assert!(!layer.is_gpu());

            let mut layer = Layer::new(config(RenderMode::Gpu(ctx.clone())), 16, 16);
            let d = rect(0.0, 0.0, 4.0, 2.0, Color::white());
            layer.add_drawable(d.clone());
            layer.draw(false);
            assert!(layer.is_gpu());

            layer.resize(max + 1, 2);
            assert!(!layer.is_gpu());
            assert!(!layer.config().render_mode.is_gpu());
            assert_eq!(layer.surface().unwrap().width(), max + 1);
            let stats = layer.draw(false);
            assert!(stats.full_redraw);
            assert_eq!(layer.surface().unwrap().pixel(1, 1), Color::white());
        }

        #[test]
        fn oversized_texture_falls_back_to_raster() {
            let Some(ctx) = context() else { return };
            let max = ctx.max_texture_dimension();
            let mut layer = Layer::new(config(RenderMode::Gpu(ctx.clone())), 16, 16);
            assert!(layer.is_gpu());

            let wide = RasterImage::solid(max + 1, 1, Color::white()).unwrap();
            layer.register_texture(TextureId(9), wide);
            assert!(!layer.is_gpu());

            layer.set_render_mode(RenderMode::Gpu(ctx.clone()));
            assert!(!layer.is_gpu());

            layer.unregister_texture(TextureId(9));
            layer.set_render_mode(RenderMode::Gpu(ctx));
            assert!(layer.is_gpu());
        }
    }
}
