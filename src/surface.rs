//! Host seams for per-page drawing layers.
//!
//! The registry and pen runtime never touch a real DOM or canvas; they talk to
//! a [`LayerHost`] that creates one layer element per page holding two
//! [`Surface`]s (committed strokes, in-progress stroke) and binds pointer
//! listeners to it.

use crate::annotations::StrokeStyle;
use crate::geometry::{PageBox, PathSegment, Point};

/// A 2D drawing surface, i.e. one canvas and its context.
pub trait Surface {
    /// Set the backing store size in device pixels. Clears the surface.
    fn resize(&mut self, width_px: u32, height_px: u32);

    /// Uniform scale from page-local units to device pixels.
    fn set_transform(&mut self, scale: f64);

    fn clear(&mut self);

    fn stroke_path(&mut self, path: &[PathSegment], style: &StrokeStyle);

    fn fill_dot(&mut self, center: Point, radius: f64, style: &StrokeStyle);
}

/// Creates, binds and removes page layers.
pub trait LayerHost {
    type Layer;
    type Surface: Surface;
    type Listener;

    /// Attach a layer over `page`. `None` means the page element is not
    /// attachable right now; the caller retries on its next sync.
    fn create_layer(&mut self, page: &PageBox) -> Option<(Self::Layer, Self::Surface, Self::Surface)>;

    /// Size and place the layer's CSS box over the page.
    fn position_layer(&mut self, layer: &Self::Layer, page: &PageBox);

    fn bind_pointer_handlers(&mut self, layer: &Self::Layer) -> Self::Listener;

    fn unbind_pointer_handlers(&mut self, listener: Self::Listener);

    fn remove_layer(&mut self, layer: Self::Layer);

    fn device_pixel_ratio(&self) -> f64;

    fn set_pointer_capture(&mut self, layer: &Self::Layer, pointer_id: i32);

    fn release_pointer_capture(&mut self, layer: &Self::Layer, pointer_id: i32);
}

/// Backing-store size and drawing transform for a page's canvases.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CanvasMetrics {
    pub width_px: u32,
    pub height_px: u32,
    /// page-local units to device pixels
    pub transform: f64,
}

impl CanvasMetrics {
    /// `None` for pages that are not measured yet.
    #[must_use]
    pub fn for_page(page: &PageBox, device_pixel_ratio: f64) -> Option<Self> {
        let scale = page.visual_scale()?;
        let dpr = if device_pixel_ratio.is_finite() && device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        let transform = scale * dpr;
        Some(Self {
            width_px: (page.base.width * transform).round().max(1.0) as u32,
            height_px: (page.base.height * transform).round().max(1.0) as u32,
            transform,
        })
    }

    pub fn apply<S: Surface>(&self, surface: &mut S) {
        surface.resize(self.width_px, self.height_px);
        surface.set_transform(self.transform);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Rect, Size};

    #[test]
    fn metrics_account_for_scale_and_dpr() {
        let page = PageBox::new(1, Rect::new(0.0, 0.0, 900.0, 1200.0), Size::new(600.0, 800.0));
        let m = CanvasMetrics::for_page(&page, 2.0).unwrap();
        assert_eq!(m.width_px, 1800);
        assert_eq!(m.height_px, 2400);
        assert!((m.transform - 3.0).abs() < 1e-9);
    }

    #[test]
    fn bogus_dpr_falls_back_to_one() {
        let page = PageBox::new(1, Rect::new(0.0, 0.0, 600.0, 800.0), Size::new(600.0, 800.0));
        let m = CanvasMetrics::for_page(&page, f64::NAN).unwrap();
        assert_eq!((m.width_px, m.height_px), (600, 800));
    }

    #[test]
    fn unmeasured_page_has_no_metrics() {
        let page = PageBox::new(1, Rect::new(0.0, 0.0, 600.0, 0.0), Size::new(600.0, 800.0));
        assert!(CanvasMetrics::for_page(&page, 1.0).is_none());
    }
}
