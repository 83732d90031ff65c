//! One open document with its annotation layers.
//!
//! [`Viewer`] owns the host, the adapter and the canvas registry and routes
//! adapter events to the pen, search and selection components. It is the
//! single writer of every piece of state it holds.

use std::time::{Duration, Instant};

use log::{debug, info};

use crate::annotations::{
    HighlightId, HighlightStore, Stroke, StrokeCollection, StrokeStore, StrokeStyle,
};
use crate::event_source::{PointerEvent, PointerEventSource, PointerPhase};
use crate::geometry::Rect;
use crate::host::{
    AdapterEvent, DocumentEngine, LoadConfig, PageNavigator, PdfHostAdapter, SpreadMode,
};
use crate::pen::{DrawingMode, PenConfig, PenRuntime, PenSettings, PenState, PointerOutcome, SharedPenSettings};
use crate::registry::{PageCanvasRegistry, RegistryConfig};
use crate::search::{SearchConfig, SearchHighlighter, SearchOutcome, TextLayerHost};
use crate::selection::{
    ActionMenu, CaptureConfig, HighlightFocus, ScrollTarget, SelectionCapture, SelectionSource,
};
use crate::settings::Settings;
use crate::surface::LayerHost;

/// Everything a host needs to provide for a full viewer.
pub trait ViewerHost: LayerHost + DocumentEngine + TextLayerHost + SelectionSource {}

impl<T> ViewerHost for T where T: LayerHost + DocumentEngine + TextLayerHost + SelectionSource {}

#[derive(Clone, Debug, PartialEq)]
pub struct ViewerConfig {
    pub registry: RegistryConfig,
    pub pen: PenConfig,
    pub load: LoadConfig,
    pub search: SearchConfig,
    pub capture: CaptureConfig,
    pub pulse: Duration,
    pub merge_tolerance: f64,
    pub pen_style: StrokeStyle,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ViewerConfig {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            registry: RegistryConfig::from_settings(settings),
            pen: PenConfig::from_settings(settings),
            load: LoadConfig::from_settings(settings),
            search: SearchConfig::from_settings(settings),
            capture: CaptureConfig::from_settings(settings),
            pulse: Duration::from_millis(settings.pulse_duration_ms),
            merge_tolerance: settings.merge_tolerance,
            pen_style: StrokeStyle {
                color: settings.pen_color.clone(),
                width: settings.pen_width,
                opacity: settings.pen_opacity,
            },
        }
    }
}

pub struct Viewer<H: ViewerHost> {
    host: H,
    adapter: PdfHostAdapter,
    registry: PageCanvasRegistry<H>,
    pen_settings: SharedPenSettings,
    pen: PenRuntime<SharedPenSettings>,
    strokes: StrokeStore,
    highlights: HighlightStore,
    search: SearchHighlighter,
    selection: SelectionCapture,
    focus: HighlightFocus,
    merge_tolerance: f64,
    target_id: String,
}

impl<H: ViewerHost> Viewer<H> {
    pub fn new(host: H, config: ViewerConfig) -> Self {
        let pen_settings = SharedPenSettings::new(PenState {
            style: config.pen_style.clone(),
            ..PenState::default()
        });
        Self {
            host,
            adapter: PdfHostAdapter::new(config.load),
            registry: PageCanvasRegistry::new(config.registry),
            pen: PenRuntime::new(pen_settings.clone(), config.pen, ""),
            pen_settings,
            strokes: StrokeStore::new(),
            highlights: HighlightStore::new(),
            search: SearchHighlighter::new(config.search),
            selection: SelectionCapture::new(config.capture),
            focus: HighlightFocus::new(config.pulse),
            merge_tolerance: config.merge_tolerance,
            target_id: String::new(),
        }
    }

    /// Open `source`. Whatever was open is torn down first and nothing it
    /// still had in flight will be reported.
    pub fn open(&mut self, source: &str, now: Instant) {
        self.reset_transient();
        self.adapter
            .open(&mut self.host, &mut self.registry, source, now);
        self.target_id = source.to_string();
        self.pen.set_owner(source);
    }

    pub fn close(&mut self) {
        self.reset_transient();
        self.adapter.close(&mut self.host, &mut self.registry);
    }

    fn reset_transient(&mut self) {
        self.pen.abort();
        self.search.cancel();
        self.selection.dismiss();
    }

    /// Drain the engine, then run timers.
    pub fn pump(&mut self, now: Instant) -> Vec<AdapterEvent> {
        let events = self.adapter.pump(&mut self.host, &mut self.registry, now);
        for event in &events {
            match event {
                AdapterEvent::Redraw(page) => {
                    self.pen.redraw_page(*page, &mut self.registry, &self.strokes);
                }
                AdapterEvent::PageDisposed(page) => {
                    if self.pen.active_page() == Some(*page) {
                        self.pen.abort();
                    }
                    self.search.on_page_destroyed(*page);
                }
                AdapterEvent::TextLayerReady(page) => {
                    self.search.on_text_layer_ready(&mut self.host, *page, now);
                }
                AdapterEvent::LoadFailed(err) => info!("load failed: {err}"),
                _ => {}
            }
        }
        self.search.tick(&mut self.host, now);
        self.focus.tick(now);
        events
    }

    /// The engine's viewport moved; remount overlays for the new window.
    pub fn scrolled(&mut self) {
        let report = self.adapter.sync_pages(&mut self.host, &mut self.registry);
        if self
            .pen
            .active_page()
            .is_some_and(|page| report.disposed.contains(&page))
        {
            self.pen.abort();
        }
        for page in report.needs_redraw() {
            self.pen.redraw_page(page, &mut self.registry, &self.strokes);
        }
    }

    /// Route a pointer event. A release that no drawing gesture claimed
    /// schedules a text-selection read.
    pub fn pointer(&mut self, event: &PointerEvent, now: Instant) -> PointerOutcome {
        let outcome = self
            .pen
            .handle(event, &mut self.registry, &mut self.host, &mut self.strokes);
        if outcome == PointerOutcome::Ignored
            && event.phase == PointerPhase::Up
            && self.pen_settings.drawing_mode() == DrawingMode::Idle
        {
            self.selection.pointer_up(now);
        }
        outcome
    }

    /// Feed every pending event of `source` through [`Self::pointer`].
    pub fn drain_pointer_source<S: PointerEventSource>(
        &mut self,
        source: &mut S,
        now: Instant,
    ) -> anyhow::Result<Vec<PointerOutcome>> {
        let mut outcomes = Vec::new();
        while source.poll(Duration::ZERO)? {
            let event = source.read()?;
            outcomes.push(self.pointer(&event, now));
        }
        Ok(outcomes)
    }

    /// Settled selection menu, if any.
    pub fn selection_menu(&mut self, now: Instant) -> Option<ActionMenu> {
        let viewport = self.host.viewport();
        self.selection.tick(&self.host, viewport, now).cloned()
    }

    pub fn dismiss_selection(&mut self) {
        self.selection.dismiss();
    }

    /// "Highlight" action of the selection menu.
    pub fn highlight_selection(&mut self, note: Option<String>) -> Option<HighlightId> {
        let pages = self.host.page_elements();
        let id = self.selection.capture_highlight(
            &mut self.host,
            &pages,
            &mut self.highlights,
            &self.target_id,
            note,
        )?;
        debug!("captured highlight {id}");
        Some(id)
    }

    /// Make `id` the active highlight: scroll to it and start its pulse.
    pub fn focus_highlight(&mut self, id: HighlightId, now: Instant) -> Option<ScrollTarget> {
        let target = self.focus.focus(&self.highlights, id, now)?;
        self.adapter.go_to_page(&mut self.host, target.page);
        Some(target)
    }

    #[must_use]
    pub fn pulsing_highlight(&self, now: Instant) -> Option<HighlightId> {
        self.focus.pulsing(now)
    }

    /// Viewport rects of every highlight on a mounted page.
    #[must_use]
    pub fn highlight_overlays(&self, page: u32) -> Vec<(HighlightId, Rect)> {
        self.registry
            .get(page)
            .map(|entry| self.highlights.page_overlays(entry.page(), self.merge_tolerance))
            .unwrap_or_default()
    }

    pub fn search(&mut self, term: &str, page: u32, now: Instant) -> SearchOutcome {
        self.search.set_term(&mut self.host, term, page, now)
    }

    pub fn clear_search(&mut self) {
        self.search.clear(&mut self.host);
    }

    pub fn set_drawing_mode(&mut self, mode: DrawingMode) {
        self.pen_settings.set_mode(mode);
        if mode != DrawingMode::Idle {
            self.selection.dismiss();
        }
    }

    pub fn set_show_annotations(&mut self, show: bool) {
        self.pen_settings.set_show_annotations(show);
        self.pen.redraw_all(&mut self.registry, &self.strokes);
    }

    /// Drop every stroke on one page of the open document.
    pub fn clear_page(&mut self, page: u32) -> usize {
        let removed = self.strokes.clear_page(self.pen.owner(), page);
        if removed > 0 {
            self.pen.redraw_page(page, &mut self.registry, &self.strokes);
        }
        removed
    }

    /// Load previously saved strokes of the open document.
    pub fn import_strokes(&mut self, strokes: Vec<Stroke>) {
        for stroke in strokes {
            self.strokes.add_stroke(self.pen.owner(), stroke);
        }
        self.pen.redraw_all(&mut self.registry, &self.strokes);
    }

    /// Strokes of the open document in page order.
    #[must_use]
    pub fn document_strokes(&self) -> Vec<&Stroke> {
        self.strokes.owner_strokes(self.pen.owner())
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.adapter
            .set_scale(&mut self.host, &mut self.registry, scale);
    }

    pub fn set_spread_mode(&mut self, mode: SpreadMode) {
        self.adapter
            .set_spread_mode(&mut self.host, &mut self.registry, mode);
    }

    pub fn go_to_page(&mut self, page: u32) -> Option<u32> {
        self.adapter.go_to_page(&mut self.host, page)
    }

    #[must_use]
    pub fn navigator(&self) -> PageNavigator {
        self.adapter.navigator()
    }

    #[must_use]
    pub fn pen_settings(&self) -> &SharedPenSettings {
        &self.pen_settings
    }

    #[must_use]
    pub fn adapter(&self) -> &PdfHostAdapter {
        &self.adapter
    }

    #[must_use]
    pub fn registry(&self) -> &PageCanvasRegistry<H> {
        &self.registry
    }

    #[must_use]
    pub fn strokes(&self) -> &StrokeStore {
        &self.strokes
    }

    #[must_use]
    pub fn highlights(&self) -> &HighlightStore {
        &self.highlights
    }

    #[must_use]
    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

impl<H: ViewerHost> Drop for Viewer<H> {
    fn drop(&mut self) {
        self.close();
    }
}
