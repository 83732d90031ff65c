//! A host without a display, driven by a static page layout.
//!
//! Loads complete immediately: `begin_load` queues the ready and page-init
//! messages on the sink, so the first pump mounts overlays. Used by the
//! command-line replay.

use std::collections::BTreeMap;

use flume::Sender;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::annotations::StrokeStyle;
use crate::error::HostError;
use crate::geometry::{PageBox, PathSegment, Point, Rect};
use crate::host::{DocumentEngine, EngineMessage, Envelope, Generation, HostEvent, SpreadMode};
use crate::search::{SpanMarkup, TextLayerHost};
use crate::selection::{SelectionSnapshot, SelectionSource};
use crate::surface::{LayerHost, Surface};

fn page_count_of(len: usize) -> Result<u32, HostError> {
    u32::try_from(len)
        .map_err(|_| HostError::engine(format!("{len} pages exceed the page number range")))
}

fn default_dpr() -> f64 {
    1.0
}

/// Page boxes and viewport of a document, all in one coordinate space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub pages: Vec<PageBox>,
    pub viewport: Rect,
    #[serde(default = "default_dpr")]
    pub device_pixel_ratio: f64,
    /// Text-layer span texts per page
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub text: BTreeMap<u32, Vec<String>>,
}

/// Keeps the backing-store geometry and counts what was drawn since the
/// last clear.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HeadlessSurface {
    pub width_px: u32,
    pub height_px: u32,
    pub transform: f64,
    pub paths: usize,
    pub dots: usize,
}

impl Surface for HeadlessSurface {
    fn resize(&mut self, width_px: u32, height_px: u32) {
        self.width_px = width_px;
        self.height_px = height_px;
        self.clear();
    }

    fn set_transform(&mut self, scale: f64) {
        self.transform = scale;
    }

    fn clear(&mut self) {
        self.paths = 0;
        self.dots = 0;
    }

    fn stroke_path(&mut self, _path: &[PathSegment], _style: &StrokeStyle) {
        self.paths += 1;
    }

    fn fill_dot(&mut self, _center: Point, _radius: f64, _style: &StrokeStyle) {
        self.dots += 1;
    }
}

pub struct HeadlessHost {
    layout: Layout,
    scale: f64,
    spread_mode: SpreadMode,
    markup: BTreeMap<u32, Vec<SpanMarkup>>,
    sink: Option<(Generation, Sender<Envelope>)>,
}

impl HeadlessHost {
    #[must_use]
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            scale: 1.0,
            spread_mode: SpreadMode::None,
            markup: BTreeMap::new(),
            sink: None,
        }
    }

    #[must_use]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Span markup last committed to a page's text layer.
    #[must_use]
    pub fn markup(&self, page: u32) -> Option<&[SpanMarkup]> {
        self.markup.get(&page).map(Vec::as_slice)
    }

    #[must_use]
    pub fn spread_mode(&self) -> SpreadMode {
        self.spread_mode
    }

    fn send(&self, message: EngineMessage) {
        if let Some((generation, sink)) = &self.sink {
            if sink.send(Envelope::new(*generation, message)).is_err() {
                debug!("headless host: adapter is gone");
            }
        }
    }
}

impl LayerHost for HeadlessHost {
    type Layer = u32;
    type Surface = HeadlessSurface;
    type Listener = u32;

    fn create_layer(&mut self, page: &PageBox) -> Option<(u32, HeadlessSurface, HeadlessSurface)> {
        Some((page.number, HeadlessSurface::default(), HeadlessSurface::default()))
    }

    fn position_layer(&mut self, _layer: &u32, _page: &PageBox) {}

    fn bind_pointer_handlers(&mut self, layer: &u32) -> u32 {
        *layer
    }

    fn unbind_pointer_handlers(&mut self, _listener: u32) {}

    fn remove_layer(&mut self, _layer: u32) {}

    fn device_pixel_ratio(&self) -> f64 {
        self.layout.device_pixel_ratio
    }

    fn set_pointer_capture(&mut self, _layer: &u32, _pointer_id: i32) {}

    fn release_pointer_capture(&mut self, _layer: &u32, _pointer_id: i32) {}
}

impl DocumentEngine for HeadlessHost {
    fn begin_load(
        &mut self,
        source: &str,
        generation: Generation,
        sink: Sender<Envelope>,
    ) -> Result<(), HostError> {
        if self.layout.pages.is_empty() {
            return Err(HostError::engine(format!("{source}: layout has no pages")));
        }
        let page_count = page_count_of(self.layout.pages.len())?;
        self.sink = Some((generation, sink));
        self.send(EngineMessage::Ready { page_count });
        self.send(EngineMessage::Page(HostEvent::PagesInit));
        let ready: Vec<u32> = self.layout.text.keys().copied().collect();
        for page in ready {
            self.send(EngineMessage::Page(HostEvent::TextLayerReady(page)));
        }
        Ok(())
    }

    fn cancel_load(&mut self, generation: Generation) {
        debug!("headless host: cancel generation {}", generation.0);
    }

    fn destroy_document(&mut self) {
        self.sink = None;
        self.markup.clear();
    }

    fn page_elements(&self) -> Vec<PageBox> {
        self.layout.pages.clone()
    }

    fn viewport(&self) -> Rect {
        self.layout.viewport
    }

    fn set_current_scale(&mut self, scale: f64) {
        let ratio = scale / self.scale;
        self.scale = scale;
        for page in &mut self.layout.pages {
            page.rect = Rect::new(
                page.rect.left * ratio,
                page.rect.top * ratio,
                page.rect.width * ratio,
                page.rect.height * ratio,
            );
        }
    }

    fn set_spread_mode(&mut self, mode: SpreadMode) {
        self.spread_mode = mode;
    }

    fn scroll_to_page(&mut self, page: u32) {
        if let Some(target) = self.layout.pages.iter().find(|p| p.number == page) {
            self.layout.viewport.top = target.rect.top;
        }
    }

    fn request_page_text(&mut self, _generation: Generation, page: u32) {
        if let Some(spans) = self.layout.text.get(&page) {
            let text = spans.join(" ");
            self.send(EngineMessage::PageText { page, text });
        }
    }
}

impl TextLayerHost for HeadlessHost {
    fn text_spans(&self, page: u32) -> Option<Vec<String>> {
        self.layout.text.get(&page).cloned()
    }

    fn text_layer_ready(&self, page: u32) -> bool {
        self.layout.text.get(&page).is_some_and(|spans| !spans.is_empty())
    }

    fn commit_markup(&mut self, page: u32, markup: &[SpanMarkup]) {
        self.markup.insert(page, markup.to_vec());
    }

    fn scroll_page_into_view(&mut self, page: u32) {
        self.scroll_to_page(page);
    }
}

impl SelectionSource for HeadlessHost {
    fn current_selection(&self) -> Option<SelectionSnapshot> {
        None
    }

    fn clear_selection(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use crate::viewer::{Viewer, ViewerConfig};
    use std::time::Instant;

    fn layout() -> Layout {
        let pages = (1..=3)
            .map(|n| {
                PageBox::new(
                    n,
                    Rect::new(0.0, f64::from(n - 1) * 820.0, 600.0, 800.0),
                    Size::new(600.0, 800.0),
                )
            })
            .collect();
        Layout {
            pages,
            viewport: Rect::new(0.0, 0.0, 600.0, 900.0),
            device_pixel_ratio: 2.0,
            text: BTreeMap::from([(2, vec!["Lorem ipsum".to_string(), "dolor".to_string()])]),
        }
    }

    #[test]
    fn layout_parses_from_yaml() {
        let yaml = r#"
pages:
  - number: 1
    rect: { left: 0, top: 0, width: 300, height: 400 }
    base: { width: 600, height: 800 }
viewport: { left: 0, top: 0, width: 300, height: 500 }
"#;
        let layout: Layout = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(layout.device_pixel_ratio, 1.0);
        assert_eq!(layout.pages[0].visual_scale(), Some(0.5));
    }

    #[test]
    fn first_pump_mounts_pages_and_delivers_text() {
        let mut viewer = Viewer::new(HeadlessHost::new(layout()), ViewerConfig::default());
        let t0 = Instant::now();
        viewer.open("layout", t0);
        viewer.pump(t0);
        viewer.pump(t0);

        assert_eq!(viewer.adapter().page_count(), 3);
        assert_eq!(viewer.registry().pages(), vec![1, 2, 3]);
        assert_eq!(viewer.registry().get(1).unwrap().static_surface().width_px, 1200);
        assert_eq!(viewer.adapter().page_text(2), Some("Lorem ipsum dolor"));
    }

    #[test]
    fn page_count_must_fit_page_numbers() {
        assert_eq!(page_count_of(3).unwrap(), 3);
        #[cfg(target_pointer_width = "64")]
        assert!(matches!(
            page_count_of(usize::MAX),
            Err(HostError::Engine { .. })
        ));
    }

    #[test]
    fn empty_layout_fails_to_load() {
        let empty = Layout {
            pages: Vec::new(),
            ..layout()
        };
        let mut viewer = Viewer::new(HeadlessHost::new(empty), ViewerConfig::default());
        let t0 = Instant::now();
        viewer.open("empty", t0);
        let events = viewer.pump(t0);
        assert!(events.iter().any(|e| matches!(e, crate::host::AdapterEvent::LoadFailed(_))));
    }
}
