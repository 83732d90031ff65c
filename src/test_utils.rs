pub mod test_helpers {
    use std::collections::{BTreeMap, BTreeSet};

    use flume::Sender;

    use crate::annotations::StrokeStyle;
    use crate::error::HostError;
    use crate::event_source::{PointerEvent, PointerKind, PointerPhase, SimulatedPointerSource};
    use crate::geometry::{PageBox, PathSegment, Point, Rect, Size};
    use crate::host::{DocumentEngine, EngineMessage, Envelope, Generation, SpreadMode};
    use crate::search::{Segment, SpanMarkup, TextLayerHost};
    use crate::selection::{SelectionSnapshot, SelectionSource};
    use crate::surface::{LayerHost, Surface};

    /// Everything a [`RecordingSurface`] was asked to do.
    #[derive(Clone, Debug, PartialEq)]
    pub enum SurfaceOp {
        Resize(u32, u32),
        Transform(f64),
        Clear,
        Stroke {
            segments: Vec<PathSegment>,
            style: StrokeStyle,
        },
        Dot {
            center: Point,
            radius: f64,
        },
    }

    /// Canvas fake that keeps a log of draw calls.
    #[derive(Clone, Debug)]
    pub struct RecordingSurface {
        pub size: (u32, u32),
        pub transform: f64,
        pub ops: Vec<SurfaceOp>,
    }

    impl Default for RecordingSurface {
        fn default() -> Self {
            Self {
                size: (0, 0),
                transform: 1.0,
                ops: Vec::new(),
            }
        }
    }

    impl RecordingSurface {
        /// Number of explicit clears.
        pub fn clears(&self) -> usize {
            self.ops.iter().filter(|op| **op == SurfaceOp::Clear).count()
        }

        /// Paths and dots drawn since the surface was last cleared or resized.
        pub fn drawn_since_clear(&self) -> usize {
            self.ops
                .iter()
                .rev()
                .take_while(|op| !matches!(op, SurfaceOp::Clear | SurfaceOp::Resize(..)))
                .filter(|op| matches!(op, SurfaceOp::Stroke { .. } | SurfaceOp::Dot { .. }))
                .count()
        }

        pub fn is_blank(&self) -> bool {
            self.drawn_since_clear() == 0
        }

        /// Segments of the most recent path.
        pub fn last_path(&self) -> Option<&[PathSegment]> {
            self.ops.iter().rev().find_map(|op| match op {
                SurfaceOp::Stroke { segments, .. } => Some(segments.as_slice()),
                _ => None,
            })
        }

        /// Where a page-local point lands in device pixels.
        pub fn to_device(&self, local: Point) -> Point {
            local.scaled(self.transform)
        }
    }

    impl Surface for RecordingSurface {
        fn resize(&mut self, width_px: u32, height_px: u32) {
            self.size = (width_px, height_px);
            self.ops.push(SurfaceOp::Resize(width_px, height_px));
        }

        fn set_transform(&mut self, scale: f64) {
            self.transform = scale;
            self.ops.push(SurfaceOp::Transform(scale));
        }

        fn clear(&mut self) {
            self.ops.push(SurfaceOp::Clear);
        }

        fn stroke_path(&mut self, path: &[PathSegment], style: &StrokeStyle) {
            self.ops.push(SurfaceOp::Stroke {
                segments: path.to_vec(),
                style: style.clone(),
            });
        }

        fn fill_dot(&mut self, center: Point, radius: f64, _style: &StrokeStyle) {
            self.ops.push(SurfaceOp::Dot { center, radius });
        }
    }

    /// Host calls in the order they were made.
    #[derive(Clone, Debug, PartialEq)]
    pub enum HostOp {
        CreateLayer(u32),
        PositionLayer(u32),
        Bind(u32),
        Unbind(u32),
        RemoveLayer(u32),
        Capture(u32, i32),
        Release(u32, i32),
        BeginLoad(String),
        CancelLoad(u64),
        DestroyDocument,
        SetScale(f64),
        SetSpread(SpreadMode),
        ScrollTo(u32),
        RequestText(u32),
        Commit(u32),
        ScrollIntoView(u32),
    }

    #[derive(Clone, Debug, Default)]
    struct TextLayer {
        spans: Vec<SpanMarkup>,
        ready: bool,
    }

    /// In-memory stand-in for the browser side: page layers, the rendering
    /// engine, text layers and the selection API. Layers and listeners are
    /// identified by page number.
    #[derive(Default)]
    pub struct RecordingHost {
        pub ops: Vec<HostOp>,
        pub pages: Vec<PageBox>,
        pub viewport: Rect,
        pub dpr: f64,
        pub selection: Option<SelectionSnapshot>,
        /// Pages whose layer cannot be attached
        pub unattachable: BTreeSet<u32>,
        /// Makes the next `begin_load` fail with `NotFound`
        pub refuse_next_load: Option<String>,
        layers: BTreeSet<u32>,
        listeners: BTreeSet<u32>,
        text_layers: BTreeMap<u32, TextLayer>,
        sink: Option<(Generation, Sender<Envelope>)>,
    }

    impl RecordingHost {
        pub fn new() -> Self {
            Self {
                dpr: 1.0,
                ..Self::default()
            }
        }

        pub fn live_layers(&self) -> usize {
            self.layers.len()
        }

        pub fn bound_listeners(&self) -> usize {
            self.listeners.len()
        }

        /// Generation of the most recent `begin_load`.
        pub fn current_generation(&self) -> Option<Generation> {
            self.sink.as_ref().map(|(generation, _)| *generation)
        }

        /// Send a message as the most recent load.
        pub fn emit(&self, message: EngineMessage) {
            if let Some(generation) = self.current_generation() {
                self.emit_for(generation, message);
            }
        }

        /// Send a message tagged with any generation, e.g. a stale one.
        pub fn emit_for(&self, generation: Generation, message: EngineMessage) {
            if let Some((_, sink)) = &self.sink {
                sink.send(Envelope::new(generation, message)).unwrap();
            }
        }

        pub fn set_text_layer(&mut self, page: u32, spans: &[&str], ready: bool) {
            self.text_layers.insert(
                page,
                TextLayer {
                    spans: spans.iter().map(|s| SpanMarkup::plain(*s)).collect(),
                    ready,
                },
            );
        }

        /// Plain text of every span, markup ignored.
        pub fn layer_text(&self, page: u32) -> Vec<String> {
            self.text_layers
                .get(&page)
                .map(|layer| layer.spans.iter().map(SpanMarkup::plain_text).collect())
                .unwrap_or_default()
        }

        /// Text of every marker element, in order.
        pub fn marked_text(&self, page: u32) -> Vec<String> {
            self.text_layers
                .get(&page)
                .map(|layer| {
                    layer
                        .spans
                        .iter()
                        .flat_map(|span| span.segments.iter())
                        .filter_map(|segment| match segment {
                            Segment::Mark(text) => Some(text.clone()),
                            Segment::Text(_) => None,
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    impl LayerHost for RecordingHost {
        type Layer = u32;
        type Surface = RecordingSurface;
        type Listener = u32;

        fn create_layer(&mut self, page: &PageBox) -> Option<(u32, RecordingSurface, RecordingSurface)> {
            if self.unattachable.contains(&page.number) {
                return None;
            }
            self.ops.push(HostOp::CreateLayer(page.number));
            self.layers.insert(page.number);
            Some((page.number, RecordingSurface::default(), RecordingSurface::default()))
        }

        fn position_layer(&mut self, layer: &u32, _page: &PageBox) {
            self.ops.push(HostOp::PositionLayer(*layer));
        }

        fn bind_pointer_handlers(&mut self, layer: &u32) -> u32 {
            self.ops.push(HostOp::Bind(*layer));
            self.listeners.insert(*layer);
            *layer
        }

        fn unbind_pointer_handlers(&mut self, listener: u32) {
            self.ops.push(HostOp::Unbind(listener));
            self.listeners.remove(&listener);
        }

        fn remove_layer(&mut self, layer: u32) {
            self.ops.push(HostOp::RemoveLayer(layer));
            self.layers.remove(&layer);
        }

        fn device_pixel_ratio(&self) -> f64 {
            self.dpr
        }

        fn set_pointer_capture(&mut self, layer: &u32, pointer_id: i32) {
            self.ops.push(HostOp::Capture(*layer, pointer_id));
        }

        fn release_pointer_capture(&mut self, layer: &u32, pointer_id: i32) {
            self.ops.push(HostOp::Release(*layer, pointer_id));
        }
    }

    impl DocumentEngine for RecordingHost {
        fn begin_load(
            &mut self,
            source: &str,
            generation: Generation,
            sink: Sender<Envelope>,
        ) -> Result<(), HostError> {
            self.ops.push(HostOp::BeginLoad(source.to_string()));
            if let Some(missing) = self.refuse_next_load.take() {
                return Err(HostError::NotFound(missing));
            }
            self.sink = Some((generation, sink));
            Ok(())
        }

        fn cancel_load(&mut self, generation: Generation) {
            self.ops.push(HostOp::CancelLoad(generation.0));
        }

        fn destroy_document(&mut self) {
            self.ops.push(HostOp::DestroyDocument);
            self.text_layers.clear();
        }

        fn page_elements(&self) -> Vec<PageBox> {
            self.pages.clone()
        }

        fn viewport(&self) -> Rect {
            self.viewport
        }

        fn set_current_scale(&mut self, scale: f64) {
            self.ops.push(HostOp::SetScale(scale));
        }

        fn set_spread_mode(&mut self, mode: SpreadMode) {
            self.ops.push(HostOp::SetSpread(mode));
        }

        fn scroll_to_page(&mut self, page: u32) {
            self.ops.push(HostOp::ScrollTo(page));
        }

        fn request_page_text(&mut self, _generation: Generation, page: u32) {
            self.ops.push(HostOp::RequestText(page));
        }
    }

    impl TextLayerHost for RecordingHost {
        fn text_spans(&self, page: u32) -> Option<Vec<String>> {
            let layer = self.text_layers.get(&page)?;
            Some(layer.spans.iter().map(SpanMarkup::plain_text).collect())
        }

        fn text_layer_ready(&self, page: u32) -> bool {
            self.text_layers
                .get(&page)
                .is_some_and(|layer| layer.ready && !layer.spans.is_empty())
        }

        fn commit_markup(&mut self, page: u32, markup: &[SpanMarkup]) {
            self.ops.push(HostOp::Commit(page));
            if let Some(layer) = self.text_layers.get_mut(&page) {
                layer.spans = markup.to_vec();
            }
        }

        fn scroll_page_into_view(&mut self, page: u32) {
            self.ops.push(HostOp::ScrollIntoView(page));
        }
    }

    impl SelectionSource for RecordingHost {
        fn current_selection(&self) -> Option<SelectionSnapshot> {
            self.selection.clone()
        }

        fn clear_selection(&mut self) {
            self.selection = None;
        }
    }

    /// Pages laid out top to bottom at `scale`, separated by `gap` pixels.
    pub fn stacked_pages(count: u32, base: Size, scale: f64, gap: f64) -> Vec<PageBox> {
        let height = base.height * scale;
        (1..=count)
            .map(|n| {
                let top = f64::from(n - 1) * (height + gap);
                PageBox::new(n, Rect::new(0.0, top, base.width * scale, height), base)
            })
            .collect()
    }

    /// Builder for pointer-event sequences of a single pointer
    pub struct GestureBuilder {
        pointer_id: i32,
        kind: PointerKind,
        at: Point,
        events: Vec<PointerEvent>,
    }

    impl GestureBuilder {
        pub fn new(pointer_id: i32, kind: PointerKind) -> Self {
            Self {
                pointer_id,
                kind,
                at: Point::default(),
                events: Vec::new(),
            }
        }

        pub fn pen(pointer_id: i32) -> Self {
            Self::new(pointer_id, PointerKind::Pen)
        }

        pub fn mouse(pointer_id: i32) -> Self {
            Self::new(pointer_id, PointerKind::Mouse)
        }

        pub fn touch(pointer_id: i32) -> Self {
            Self::new(pointer_id, PointerKind::Touch)
        }

        fn push(mut self, phase: PointerPhase, at: Point) -> Self {
            self.at = at;
            self.events.push(PointerEvent {
                pointer_id: self.pointer_id,
                kind: self.kind,
                phase,
                client: at,
            });
            self
        }

        pub fn down(self, x: f64, y: f64) -> Self {
            self.push(PointerPhase::Down, Point::new(x, y))
        }

        pub fn move_to(self, x: f64, y: f64) -> Self {
            self.push(PointerPhase::Move, Point::new(x, y))
        }

        /// `steps` evenly spaced moves from the current position to `(x, y)`
        pub fn drag_to(mut self, x: f64, y: f64, steps: usize) -> Self {
            let from = self.at;
            for i in 1..=steps {
                let t = i as f64 / steps as f64;
                self = self.move_to(from.x + (x - from.x) * t, from.y + (y - from.y) * t);
            }
            self
        }

        pub fn up(self) -> Self {
            let at = self.at;
            self.push(PointerPhase::Up, at)
        }

        pub fn leave(self) -> Self {
            let at = self.at;
            self.push(PointerPhase::Leave, at)
        }

        pub fn cancel(self) -> Self {
            let at = self.at;
            self.push(PointerPhase::Cancel, at)
        }

        pub fn build(self) -> Vec<PointerEvent> {
            self.events
        }

        pub fn into_source(self) -> SimulatedPointerSource {
            SimulatedPointerSource::new(self.events)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use crate::event_source::PointerPhase;
    use crate::geometry::Size;

    #[test]
    fn gesture_builder_interpolates_drags() {
        let events = GestureBuilder::pen(1)
            .down(0.0, 0.0)
            .drag_to(30.0, 60.0, 3)
            .up()
            .build();

        assert_eq!(events.len(), 5);
        assert_eq!(events[2].client.x, 20.0);
        assert_eq!(events[2].client.y, 40.0);
        assert_eq!(events[4].phase, PointerPhase::Up);
        assert_eq!(events[4].client, events[3].client);
    }

    #[test]
    fn stacked_pages_are_evenly_spaced() {
        let pages = stacked_pages(3, Size::new(600.0, 800.0), 0.5, 10.0);
        assert_eq!(pages[2].rect.top, 820.0);
        assert_eq!(pages[2].rect.width, 300.0);
        assert_eq!(pages[2].visual_scale(), Some(0.5));
    }
}
