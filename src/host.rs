//! Document host adapter.
//!
//! Wraps an external rendering engine behind [`DocumentEngine`]. The engine
//! reports asynchronously over a flume channel; every message is tagged with
//! the [`Generation`] of the load that produced it, so anything sent by a
//! superseded or cancelled load is dropped unseen when the adapter pumps.
//! Page lifecycle events are applied to the [`PageCanvasRegistry`] in the
//! order the engine sent them.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{HostError, LoadError};
use crate::geometry::{PageBox, Rect};
use crate::registry::{PageCanvasRegistry, SyncReport, pages_in_window};
use crate::settings::Settings;
use crate::surface::LayerHost;

/// Identifies one document load. Bumped on every open, close and timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u64);

impl Generation {
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpreadMode {
    #[default]
    None,
    Odd,
    Even,
}

/// Page lifecycle signals emitted by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    /// Page elements exist and have their initial size
    PagesInit,
    PagesLoaded { page_count: u32 },
    /// The page under the viewport changed
    PageChanging(u32),
    PageRendered(u32),
    /// The page element is about to be torn down
    PageDestroy(u32),
    /// The page's text layer has stopped changing
    TextLayerReady(u32),
}

/// Everything an engine can report.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineMessage {
    Progress { loaded: u64, total: Option<u64> },
    Ready { page_count: u32 },
    Failed(String),
    Page(HostEvent),
    PageText { page: u32, text: String },
}

#[derive(Clone, Debug)]
pub struct Envelope {
    pub generation: Generation,
    pub message: EngineMessage,
}

impl Envelope {
    #[must_use]
    pub fn new(generation: Generation, message: EngineMessage) -> Self {
        Self {
            generation,
            message,
        }
    }
}

/// The external page-rendering engine.
pub trait DocumentEngine {
    /// Start loading `source`. Progress and lifecycle messages for this load
    /// must be sent on `sink` tagged with `generation`.
    fn begin_load(
        &mut self,
        source: &str,
        generation: Generation,
        sink: Sender<Envelope>,
    ) -> Result<(), HostError>;

    /// Abort the load with this generation if it is still running.
    fn cancel_load(&mut self, generation: Generation);

    /// Drop the current document and all page elements.
    fn destroy_document(&mut self);

    /// Every page element with its current box, in page order.
    fn page_elements(&self) -> Vec<PageBox>;

    fn page_element(&self, page: u32) -> Option<PageBox> {
        self.page_elements().into_iter().find(|p| p.number == page)
    }

    /// Scroll container rect in the same space as the page boxes.
    fn viewport(&self) -> Rect;

    fn set_current_scale(&mut self, scale: f64);

    fn set_spread_mode(&mut self, mode: SpreadMode);

    fn scroll_to_page(&mut self, page: u32);

    /// Ask for the text of one page; answered with [`EngineMessage::PageText`].
    fn request_page_text(&mut self, generation: Generation, page: u32);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadConfig {
    pub timeout: Duration,
    /// Percent added per pump while no byte progress has been reported
    pub synthetic_progress_step: u8,
    /// Request the text of every page once the document is ready
    pub extract_text: bool,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(25),
            synthetic_progress_step: 5,
            extract_text: true,
        }
    }
}

impl LoadConfig {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: Duration::from_secs(settings.load_timeout_secs.max(1)),
            synthetic_progress_step: settings.synthetic_progress_step,
            ..Self::default()
        }
    }
}

/// What the caller needs to know after a pump.
#[derive(Clone, Debug, PartialEq)]
pub enum AdapterEvent {
    /// Load progress, 0..=100
    Progress(u8),
    PagesCount(u32),
    PageChange(u32),
    Loaded,
    /// Never carries [`LoadError::Cancelled`]
    LoadFailed(LoadError),
    /// The page's overlay was created or reset; its strokes need a redraw
    Redraw(u32),
    PageDisposed(u32),
    TextLayerReady(u32),
    PageText(u32),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum LoadState {
    Idle,
    Loading {
        started: Instant,
        progress: u8,
        byte_progress: bool,
    },
    Ready,
    Failed,
}

/// Cloneable `go_to_page` handle. Requests are clamped and applied on the
/// adapter's next pump.
#[derive(Clone, Debug)]
pub struct PageNavigator {
    tx: Sender<u32>,
}

impl PageNavigator {
    pub fn go_to_page(&self, page: u32) {
        // Receiver lives as long as the adapter; a send after that is moot.
        let _ = self.tx.send(page);
    }
}

pub struct PdfHostAdapter {
    config: LoadConfig,
    generation: Generation,
    source: Option<String>,
    state: LoadState,
    page_count: u32,
    current_page: u32,
    scale: f64,
    spread_mode: SpreadMode,
    page_text: BTreeMap<u32, String>,
    outbox: Vec<AdapterEvent>,
    engine_tx: Sender<Envelope>,
    engine_rx: Receiver<Envelope>,
    nav_tx: Sender<u32>,
    nav_rx: Receiver<u32>,
}

impl PdfHostAdapter {
    #[must_use]
    pub fn new(config: LoadConfig) -> Self {
        let (engine_tx, engine_rx) = flume::unbounded();
        let (nav_tx, nav_rx) = flume::unbounded();
        Self {
            config,
            generation: Generation(0),
            source: None,
            state: LoadState::Idle,
            page_count: 0,
            current_page: 0,
            scale: 1.0,
            spread_mode: SpreadMode::None,
            page_text: BTreeMap::new(),
            outbox: Vec::new(),
            engine_tx,
            engine_rx,
            nav_tx,
            nav_rx,
        }
    }

    /// Start loading `source`, tearing down whatever was open before.
    pub fn open<H>(
        &mut self,
        host: &mut H,
        registry: &mut PageCanvasRegistry<H>,
        source: &str,
        now: Instant,
    ) -> Generation
    where
        H: DocumentEngine + LayerHost,
    {
        if self.source.is_some() || self.state != LoadState::Idle {
            self.close(host, registry);
        }
        let generation = self.bump_generation();
        self.source = Some(source.to_string());
        self.state = LoadState::Loading {
            started: now,
            progress: 0,
            byte_progress: false,
        };
        self.outbox.push(AdapterEvent::Progress(0));

        match host.begin_load(source, generation, self.engine_tx.clone()) {
            Ok(()) => info!("loading {source} (generation {})", generation.0),
            Err(e) => {
                warn!("engine refused to load {source}: {e}");
                self.state = LoadState::Failed;
                self.outbox.push(AdapterEvent::LoadFailed(e.into()));
            }
        }
        generation
    }

    /// Cancel any in-flight load, destroy the engine document and dispose
    /// every page overlay. Nothing from the closed document is reported
    /// afterwards.
    pub fn close<H>(&mut self, host: &mut H, registry: &mut PageCanvasRegistry<H>)
    where
        H: DocumentEngine + LayerHost,
    {
        if matches!(self.state, LoadState::Loading { .. }) {
            debug!("cancelling load generation {}", self.generation.0);
            host.cancel_load(self.generation);
        }
        if self.source.take().is_some() {
            host.destroy_document();
        }
        registry.dispose_all(host);
        self.bump_generation();
        self.state = LoadState::Idle;
        self.page_count = 0;
        self.current_page = 0;
        self.page_text.clear();
        self.outbox.clear();
        while self.nav_rx.try_recv().is_ok() {}
    }

    /// Apply everything the engine sent since the last pump, in order, and
    /// run timers and queued navigation.
    pub fn pump<H>(
        &mut self,
        host: &mut H,
        registry: &mut PageCanvasRegistry<H>,
        now: Instant,
    ) -> Vec<AdapterEvent>
    where
        H: DocumentEngine + LayerHost,
    {
        let mut events = std::mem::take(&mut self.outbox);

        while let Ok(envelope) = self.engine_rx.try_recv() {
            if envelope.generation != self.generation {
                debug!(
                    "dropping {:?} from stale generation {}",
                    envelope.message, envelope.generation.0
                );
                continue;
            }
            self.handle_message(envelope.message, host, registry, &mut events);
        }

        self.check_timeout(host, now, &mut events);
        self.synthetic_progress(&mut events);

        while let Ok(page) = self.nav_rx.try_recv() {
            self.go_to_page(host, page);
        }

        let boxes: BTreeMap<u32, PageBox> = host
            .page_elements()
            .into_iter()
            .map(|p| (p.number, p))
            .collect();
        let reset = registry.flush_resizes(host, |n| boxes.get(&n).copied());
        events.extend(reset.into_iter().map(AdapterEvent::Redraw));

        events
    }

    fn handle_message<H>(
        &mut self,
        message: EngineMessage,
        host: &mut H,
        registry: &mut PageCanvasRegistry<H>,
        events: &mut Vec<AdapterEvent>,
    ) where
        H: DocumentEngine + LayerHost,
    {
        match message {
            EngineMessage::Progress { loaded, total } => {
                let LoadState::Loading {
                    progress,
                    byte_progress,
                    ..
                } = &mut self.state
                else {
                    return;
                };
                let Some(total) = total.filter(|t| *t > 0) else {
                    return;
                };
                *byte_progress = true;
                let pct = (loaded.saturating_mul(100) / total).min(99) as u8;
                if pct > *progress {
                    *progress = pct;
                    events.push(AdapterEvent::Progress(pct));
                }
            }
            EngineMessage::Ready { page_count } => {
                if !matches!(self.state, LoadState::Loading { .. }) {
                    return;
                }
                info!("document ready with {page_count} pages");
                self.state = LoadState::Ready;
                self.page_count = page_count;
                self.current_page = page_count.min(1);
                events.push(AdapterEvent::Progress(100));
                events.push(AdapterEvent::PagesCount(page_count));
                events.push(AdapterEvent::Loaded);
                if self.config.extract_text {
                    for page in 1..=page_count {
                        host.request_page_text(self.generation, page);
                    }
                }
            }
            EngineMessage::Failed(reason) => {
                if !matches!(self.state, LoadState::Loading { .. }) {
                    return;
                }
                warn!("document load failed: {reason}");
                self.state = LoadState::Failed;
                events.push(AdapterEvent::LoadFailed(LoadError::Failed(reason)));
            }
            EngineMessage::Page(event) => self.handle_host_event(event, host, registry, events),
            EngineMessage::PageText { page, text } => {
                self.page_text.insert(page, text);
                events.push(AdapterEvent::PageText(page));
            }
        }
    }

    fn handle_host_event<H>(
        &mut self,
        event: HostEvent,
        host: &mut H,
        registry: &mut PageCanvasRegistry<H>,
        events: &mut Vec<AdapterEvent>,
    ) where
        H: DocumentEngine + LayerHost,
    {
        match event {
            HostEvent::PagesInit => {
                let report = self.sync_pages(host, registry);
                push_sync_events(&report, events);
            }
            HostEvent::PagesLoaded { page_count } => {
                if page_count != self.page_count {
                    self.page_count = page_count;
                    events.push(AdapterEvent::PagesCount(page_count));
                }
            }
            HostEvent::PageChanging(page) => {
                if page != self.current_page {
                    self.current_page = page;
                    events.push(AdapterEvent::PageChange(page));
                }
                let report = self.sync_pages(host, registry);
                push_sync_events(&report, events);
            }
            HostEvent::PageRendered(number) => {
                let Some(page) = host.page_element(number) else {
                    return;
                };
                if registry.contains(number) {
                    if registry.resize(host, &page) {
                        events.push(AdapterEvent::Redraw(number));
                    }
                } else {
                    let buffer = registry.config().buffer_px;
                    let in_window =
                        !pages_in_window(std::slice::from_ref(&page), host.viewport(), buffer)
                            .is_empty();
                    if in_window && registry.ensure(host, &page) {
                        events.push(AdapterEvent::Redraw(number));
                    }
                }
            }
            HostEvent::PageDestroy(number) => {
                if registry.dispose(host, number) {
                    events.push(AdapterEvent::PageDisposed(number));
                }
            }
            HostEvent::TextLayerReady(number) => events.push(AdapterEvent::TextLayerReady(number)),
        }
    }

    fn check_timeout<H: DocumentEngine>(
        &mut self,
        host: &mut H,
        now: Instant,
        events: &mut Vec<AdapterEvent>,
    ) {
        let LoadState::Loading { started, .. } = self.state else {
            return;
        };
        if now.saturating_duration_since(started) < self.config.timeout {
            return;
        }
        warn!(
            "document load timed out after {}s",
            self.config.timeout.as_secs()
        );
        host.cancel_load(self.generation);
        self.bump_generation();
        self.state = LoadState::Failed;
        events.push(AdapterEvent::LoadFailed(LoadError::Timeout(
            self.config.timeout,
        )));
    }

    fn synthetic_progress(&mut self, events: &mut Vec<AdapterEvent>) {
        let LoadState::Loading {
            progress,
            byte_progress: false,
            ..
        } = &mut self.state
        else {
            return;
        };
        let next = progress
            .saturating_add(self.config.synthetic_progress_step)
            .min(90);
        if next > *progress {
            *progress = next;
            events.push(AdapterEvent::Progress(next));
        }
    }

    /// Re-run the registry against the engine's current page boxes, e.g.
    /// after a scroll.
    pub fn sync_pages<H>(&mut self, host: &mut H, registry: &mut PageCanvasRegistry<H>) -> SyncReport
    where
        H: DocumentEngine + LayerHost,
    {
        let pages = host.page_elements();
        let viewport = host.viewport();
        registry.sync(host, &pages, viewport)
    }

    /// Scroll to `page` clamped to `[1, page_count]`. `None` while no
    /// document is loaded.
    pub fn go_to_page<H: DocumentEngine>(&mut self, host: &mut H, page: u32) -> Option<u32> {
        if self.page_count == 0 {
            return None;
        }
        let clamped = page.clamp(1, self.page_count);
        host.scroll_to_page(clamped);
        Some(clamped)
    }

    #[must_use]
    pub fn navigator(&self) -> PageNavigator {
        PageNavigator {
            tx: self.nav_tx.clone(),
        }
    }

    /// Change zoom. Every mounted overlay is resized on the next pump.
    pub fn set_scale<H>(&mut self, host: &mut H, registry: &mut PageCanvasRegistry<H>, scale: f64)
    where
        H: DocumentEngine + LayerHost,
    {
        if !(scale.is_finite() && scale > 0.0) {
            return;
        }
        self.scale = scale;
        host.set_current_scale(scale);
        registry.request_resize_all();
    }

    pub fn set_spread_mode<H>(
        &mut self,
        host: &mut H,
        registry: &mut PageCanvasRegistry<H>,
        mode: SpreadMode,
    ) where
        H: DocumentEngine + LayerHost,
    {
        self.spread_mode = mode;
        host.set_spread_mode(mode);
        registry.request_resize_all();
    }

    fn bump_generation(&mut self) -> Generation {
        self.generation = self.generation.next();
        self.generation
    }

    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[must_use]
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        matches!(self.state, LoadState::Loading { .. })
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == LoadState::Ready
    }

    /// Current load progress while loading.
    #[must_use]
    pub fn progress(&self) -> Option<u8> {
        match self.state {
            LoadState::Loading { progress, .. } => Some(progress),
            _ => None,
        }
    }

    #[must_use]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    #[must_use]
    pub fn current_page(&self) -> u32 {
        self.current_page
    }

    #[must_use]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    #[must_use]
    pub fn spread_mode(&self) -> SpreadMode {
        self.spread_mode
    }

    /// Extracted text of a page, once the engine has delivered it.
    #[must_use]
    pub fn page_text(&self, page: u32) -> Option<&str> {
        self.page_text.get(&page).map(String::as_str)
    }
}

fn push_sync_events(report: &SyncReport, events: &mut Vec<AdapterEvent>) {
    events.extend(report.disposed.iter().copied().map(AdapterEvent::PageDisposed));
    events.extend(report.needs_redraw().into_iter().map(AdapterEvent::Redraw));
}
