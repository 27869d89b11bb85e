use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use lamina_engine::device::{read_texture_rgba8, unpremultiply_rgba8, GpuContext, GpuContextInit};
use lamina_engine::drawable::RectDrawable;
use lamina_engine::logging::{init_logging, LoggingConfig};
use lamina_engine::raster::{RasterImage, RasterSurface};
use lamina_engine::{
    Aabb, Camera, Color, DrawableKey, Layer, LayerConfig, LayerStack, RenderMode, SortMode,
    SpriteDrawable, TextureId, Vec2,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 400;
const CRATE_TEXTURE: TextureId = TextureId(1);

struct Options {
    gpu: bool,
    frames: u32,
    out: PathBuf,
}

impl Options {
    fn from_args() -> Result<Self> {
        let mut options = Options { gpu: false, frames: 120, out: PathBuf::from("lamina.png") };
        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--gpu" => options.gpu = true,
                "--frames" => {
                    let value = args.next().context("--frames needs a value")?;
                    options.frames = value.parse().with_context(|| format!("bad frame count `{value}`"))?;
                }
                "--out" => options.out = args.next().context("--out needs a path")?.into(),
                other => anyhow::bail!("unknown argument `{other}` (expected --gpu, --frames N, --out PATH)"),
            }
        }
        Ok(options)
    }
}

/// A sprite bouncing inside the world rectangle.
struct Mover {
    sprite: Rc<RefCell<SpriteDrawable>>,
    key: DrawableKey,
    velocity: Vec2,
}

fn checker_texture() -> Result<RasterImage> {
    let mut bytes = Vec::with_capacity(16 * 16 * 4);
    for y in 0..16u32 {
        for x in 0..16u32 {
            let light = ((x / 4) + (y / 4)) % 2 == 0;
            let border = x == 0 || y == 0 || x == 15 || y == 15;
            let texel: [u8; 4] = match (border, light) {
                (true, _) => [70, 40, 20, 255],
                (false, true) => [210, 160, 90, 255],
                (false, false) => [170, 120, 60, 255],
            };
            bytes.extend_from_slice(&texel);
        }
    }
    Ok(RasterImage::from_rgba8(16, 16, &bytes)?)
}

fn render_mode(gpu: bool) -> RenderMode {
    if !gpu {
        return RenderMode::Raster;
    }
    match GpuContext::new_blocking(GpuContextInit::default()) {
        Ok(ctx) => {
            log::info!("GPU adapter: {}", ctx.adapter_info().name);
            RenderMode::Gpu(Rc::new(ctx))
        }
        Err(err) => {
            log::warn!("no GPU available ({err:#}); rendering on the CPU");
            RenderMode::Raster
        }
    }
}

fn build_background(mode: &RenderMode) -> (Layer, Vec<Rc<RefCell<RectDrawable>>>) {
    let config = LayerConfig {
        render_mode: mode.clone(),
        clear_color: Color::from_straight(0.08, 0.09, 0.12, 1.0),
        ..LayerConfig::default()
    };
    let mut layer = Layer::new(config, WIDTH, HEIGHT);
    let mut tiles = Vec::new();
    for row in 0..5 {
        for col in 0..8 {
            let x = col as f32 * 80.0 + 4.0;
            let y = row as f32 * 80.0 + 4.0;
            let shade = 0.14 + 0.04 * ((row + col) % 2) as f32;
            let tile = Rc::new(RefCell::new(RectDrawable::new(
                Aabb::new(x, y, x + 72.0, y + 72.0),
                Color::from_straight(shade, shade, shade + 0.03, 1.0),
            )));
            layer.add_drawable(tile.clone());
            tiles.push(tile);
        }
    }
    (layer, tiles)
}

fn build_sprites(mode: &RenderMode) -> Result<(Layer, Vec<Mover>)> {
    let config = LayerConfig {
        render_mode: mode.clone(),
        sort_mode: SortMode::BottomToTop,
        smoothing: true,
        ..LayerConfig::default()
    };
    let mut layer = Layer::new(config, WIDTH, HEIGHT);
    layer.register_texture(CRATE_TEXTURE, checker_texture()?);
    layer.set_camera(Camera::new(WIDTH as f32 * 0.5, HEIGHT as f32 * 0.5, 1.0));

    let mut movers = Vec::new();
    for i in 0..48u32 {
        let fi = i as f32;
        let position = Vec2::new((fi * 53.0) % 600.0, (fi * 31.0) % 360.0);
        let mut sprite = SpriteDrawable::new(Some(CRATE_TEXTURE), position, Vec2::splat(24.0 + (i % 3) as f32 * 8.0));
        if i % 5 == 0 {
            sprite.instance = sprite.instance.with_rotation(fi * 0.3);
        }
        if i % 7 == 0 {
            sprite.instance = sprite.instance.with_tint(Color::from_straight(0.6, 0.9, 1.0, 1.0));
        }
        let sprite = Rc::new(RefCell::new(sprite));
        let key = layer.add_drawable(sprite.clone());
        let velocity = Vec2::new(((i % 5) as f32 - 2.0) * 1.5, ((i % 3) as f32 - 1.0) * 1.25);
        movers.push(Mover { sprite, key, velocity });
    }
    Ok((layer, movers))
}

fn step(layer: &mut Layer, movers: &mut [Mover], frame: u32) {
    // Half of the sprites move on alternate frames so the dirty region varies.
    for (i, mover) in movers.iter_mut().enumerate() {
        if (i as u32 + frame) % 2 != 0 || mover.velocity == Vec2::zero() {
            continue;
        }
        let mut sprite = mover.sprite.borrow_mut();
        let [x, y] = sprite.instance.position;
        if !(0.0..=600.0).contains(&(x + mover.velocity.x)) {
            mover.velocity.x = -mover.velocity.x;
        }
        if !(0.0..=360.0).contains(&(y + mover.velocity.y)) {
            mover.velocity.y = -mover.velocity.y;
        }
        sprite.translate(mover.velocity);
        drop(sprite);
        layer.on_drawable_changed(mover.key);
    }
}

fn write_png(path: &Path, width: u32, height: u32, rgba: &[u8]) -> Result<()> {
    image::save_buffer(path, rgba, width, height, image::ExtendedColorType::Rgba8)
        .with_context(|| format!("writing {}", path.display()))?;
    log::info!("wrote {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());
    let options = Options::from_args()?;

    let mode = render_mode(options.gpu);
    let (background, _tiles) = build_background(&mode);
    let (sprites, mut movers) = build_sprites(&mode)?;

    let mut stack = LayerStack::new();
    stack.push(background);
    let sprite_layer = stack.push(sprites);

    let output = match &mode {
        RenderMode::Gpu(ctx) => Some(ctx.create_output_texture(WIDTH, HEIGHT)),
        RenderMode::Raster => None,
    };
    let output_view = output.as_ref().map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()));
    let mut dest = RasterSurface::new(WIDTH, HEIGHT);

    let mut repainted = 0usize;
    for frame in 0..options.frames {
        if let Some(layer) = stack.get_mut(sprite_layer) {
            step(layer, &mut movers, frame);
        }
        match (&mode, &output_view) {
            (RenderMode::Gpu(ctx), Some(view)) => {
                stack.render_gpu(view, ctx.target_format(), true);
            }
            _ => {
                stack.render_raster(&mut dest);
            }
        }

        if let Some(stats) = stack.get(sprite_layer).map(Layer::last_stats) {
            if !stats.is_idle() {
                repainted += 1;
            }
            log::debug!(
                "frame {frame}: drawn {} calls {} batches {} iterations {} full {}",
                stats.drawables_drawn,
                stats.draw_calls,
                stats.batches,
                stats.expansion_iterations,
                stats.full_redraw
            );
        }
    }
    log::info!("{} of {} frames repainted the sprite layer", repainted, options.frames);

    match (&mode, &output) {
        (RenderMode::Gpu(ctx), Some(texture)) => {
            let mut rgba = read_texture_rgba8(ctx.device(), ctx.queue(), texture)?;
            unpremultiply_rgba8(&mut rgba);
            write_png(&options.out, WIDTH, HEIGHT, &rgba)?;
        }
        _ => write_png(&options.out, WIDTH, HEIGHT, &dest.to_rgba8())?,
    }

    println!();
    println!("  lamina studio");
    println!("  backend  : {}", if mode.is_gpu() { "gpu" } else { "raster" });
    println!("  frames   : {}", options.frames);
    println!("  output   : {}", options.out.display());
    println!();
    Ok(())
}
