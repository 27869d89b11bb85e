use crate::paint::Color;
use crate::raster::RasterSurface;

use super::Layer;

/// Ordered layers sharing one destination, bottom first.
///
/// The bottom layer owns the destination: compositing starts by clearing it
/// to that layer's clear color. Removing the owner passes ownership to the
/// next layer, which is redrawn in full.
#[derive(Default)]
pub struct LayerStack {
    layers: Vec<Layer>,
    recomposite: bool,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `layer` on top; returns its index.
    pub fn push(&mut self, layer: Layer) -> usize {
        self.layers.push(layer);
        self.recomposite = true;
        self.layers.len() - 1
    }

    pub fn remove(&mut self, index: usize) -> Option<Layer> {
        if index >= self.layers.len() {
            return None;
        }
        let layer = self.layers.remove(index);
        if index == 0 {
            if let Some(owner) = self.layers.first_mut() {
                log::debug!("destination ownership passes to the next layer");
                owner.request_full_redraw();
            }
        }
        self.recomposite = true;
        Some(layer)
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Layer> {
        self.layers.get_mut(index)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The layer that clears the destination.
    #[inline]
    pub fn owner(&self) -> Option<&Layer> {
        self.layers.first()
    }

    fn clear_color(&self) -> Color {
        self.owner().map_or(Color::transparent(), |l| l.config().clear_color)
    }

    /// Draws every layer and, when anything changed, rebuilds `dest` from them.
    ///
    /// Returns `true` when `dest` was rewritten.
    pub fn render_raster(&mut self, dest: &mut RasterSurface) -> bool {
        let mut changed = std::mem::take(&mut self.recomposite);
        for layer in &mut self.layers {
            layer.draw(false);
            changed |= layer.take_composite_dirty();
        }
        if !changed {
            return false;
        }

        dest.clear(self.clear_color());
        for layer in &mut self.layers {
            layer.composite_raster(dest);
        }
        true
    }

    /// Draws every layer and composites the GPU ones onto `dest`.
    ///
    /// With `fresh_frame` (e.g. a new swapchain image) the destination is
    /// rebuilt even when nothing changed. Returns the number of layers
    /// composited; zero when the stack holds no GPU layer.
    pub fn render_gpu(
        &mut self,
        dest: &wgpu::TextureView,
        dest_format: wgpu::TextureFormat,
        fresh_frame: bool,
    ) -> usize {
        let mut changed = std::mem::take(&mut self.recomposite) | fresh_frame;
        for layer in &mut self.layers {
            layer.draw(false);
            changed |= layer.take_composite_dirty();
        }
        let Some(ctx) = self.layers.iter().find_map(|l| l.gpu()).map(|b| b.context().clone())
        else {
            return 0;
        };
        if !changed || ctx.is_lost() {
            return 0;
        }

        let clear = self.clear_color();
        let mut encoder = ctx.device().create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("lamina stack encoder"),
        });
        {
            let _clear = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("lamina stack clear"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: dest,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear.r as f64,
                            g: clear.g as f64,
                            b: clear.b as f64,
                            a: clear.a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
        }

        let mut composited = 0;
        for layer in &mut self.layers {
            if layer.composite_gpu(&mut encoder, dest, dest_format).is_some() {
                composited += 1;
            }
        }
        ctx.queue().submit(Some(encoder.finish()));
        composited
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::coords::Aabb;
    use crate::drawable::RectDrawable;
    use crate::layer::LayerConfig;

    fn layer_with(clear: Color, rect: Option<Aabb>) -> (Layer, Option<Rc<RefCell<RectDrawable>>>) {
        let config = LayerConfig { clear_color: clear, ..LayerConfig::default() };
        let mut layer = Layer::new(config, 8, 8);
        let drawable = rect.map(|r| Rc::new(RefCell::new(RectDrawable::new(r, Color::white()))));
        if let Some(d) = &drawable {
            layer.add_drawable(d.clone());
        }
        (layer, drawable)
    }

    #[test]
    fn owner_clears_and_layers_stack_in_order() {
        let blue = Color::from_straight(0.0, 0.0, 1.0, 1.0);
        let (bottom, _) = layer_with(blue, None);
        let (top, _keep) = layer_with(Color::transparent(), Some(Aabb::new(0.0, 0.0, 4.0, 4.0)));

        let mut stack = LayerStack::new();
        stack.push(bottom);
        stack.push(top);
        let mut dest = RasterSurface::new(8, 8);
        assert!(stack.render_raster(&mut dest));
        assert_eq!(dest.pixel(1, 1), Color::white());
        assert_eq!(dest.pixel(6, 6), blue);

        // Nothing changed: the destination is left alone.
        assert!(!stack.render_raster(&mut dest));
    }

    #[test]
    fn removing_the_owner_hands_over_the_destination() {
        let red = Color::from_straight(1.0, 0.0, 0.0, 1.0);
        let green = Color::from_straight(0.0, 1.0, 0.0, 1.0);
        let (first, _) = layer_with(red, None);
        let (second, _) = layer_with(green, None);

        let mut stack = LayerStack::new();
        stack.push(first);
        stack.push(second);
        let mut dest = RasterSurface::new(8, 8);
        stack.render_raster(&mut dest);
        // The second layer's opaque clear color covers the owner's.
        assert_eq!(dest.pixel(0, 0), green);

        assert!(stack.remove(0).is_some());
        assert!(stack.remove(5).is_none());
        assert_eq!(stack.len(), 1);
        assert!(stack.render_raster(&mut dest));
        assert_eq!(stack.owner().map(|l| l.config().clear_color), Some(green));
        assert!(stack.get(0).is_some_and(|l| l.last_stats().full_redraw));
    }
}
