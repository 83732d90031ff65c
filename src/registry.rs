//! Page canvas registry.
//!
//! Owns one overlay (layer + static canvas + live canvas) per page inside the
//! buffered viewport window. Entries are a rendering cache only: they are
//! created when a page scrolls into the window and torn down when it leaves
//! or when the host destroys the page element.

use std::collections::{BTreeMap, BTreeSet};

use log::debug;

use crate::geometry::{PageBox, Point, Rect, page_at};
use crate::settings::Settings;
use crate::surface::{CanvasMetrics, LayerHost};

pub const DEFAULT_BUFFER_PX: f64 = 800.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RegistryConfig {
    /// Extra margin above and below the viewport in which pages stay mounted
    pub buffer_px: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            buffer_px: DEFAULT_BUFFER_PX,
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            buffer_px: settings.buffer_px.max(0.0),
        }
    }
}

/// Vertical band `[viewport.top - buffer, viewport.bottom + buffer]`.
#[must_use]
pub fn buffered_window(viewport: Rect, buffer: f64) -> (f64, f64) {
    (viewport.top - buffer, viewport.bottom() + buffer)
}

/// Page numbers whose box intersects the buffered window. Unmeasured pages
/// are never included.
#[must_use]
pub fn pages_in_window(pages: &[PageBox], viewport: Rect, buffer: f64) -> Vec<u32> {
    let (top, bottom) = buffered_window(viewport, buffer);
    pages
        .iter()
        .filter(|p| p.is_measured() && p.rect.overlaps_band(top, bottom))
        .map(|p| p.number)
        .collect()
}

/// One mounted page overlay.
pub struct PageCanvasEntry<H: LayerHost> {
    page: PageBox,
    metrics: CanvasMetrics,
    layer: H::Layer,
    static_surface: H::Surface,
    live_surface: H::Surface,
    listener: Option<H::Listener>,
}

impl<H: LayerHost> PageCanvasEntry<H> {
    #[must_use]
    pub fn page(&self) -> &PageBox {
        &self.page
    }

    #[must_use]
    pub fn metrics(&self) -> CanvasMetrics {
        self.metrics
    }

    #[must_use]
    pub fn layer(&self) -> &H::Layer {
        &self.layer
    }

    pub fn static_surface_mut(&mut self) -> &mut H::Surface {
        &mut self.static_surface
    }

    pub fn live_surface_mut(&mut self) -> &mut H::Surface {
        &mut self.live_surface
    }

    #[must_use]
    pub fn static_surface(&self) -> &H::Surface {
        &self.static_surface
    }

    #[must_use]
    pub fn live_surface(&self) -> &H::Surface {
        &self.live_surface
    }
}

/// What a [`PageCanvasRegistry::sync`] pass changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub created: Vec<u32>,
    pub disposed: Vec<u32>,
    /// In the window but reset by a size change; needs a static redraw
    pub resized: Vec<u32>,
    /// In the window but unmeasured or not attachable; retried next pass
    pub skipped: Vec<u32>,
}

impl SyncReport {
    /// Pages whose static canvas is blank and must be redrawn.
    #[must_use]
    pub fn needs_redraw(&self) -> Vec<u32> {
        let mut pages: Vec<u32> = self.created.iter().chain(&self.resized).copied().collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

/// Arena of page overlays keyed by page number. Single writer.
pub struct PageCanvasRegistry<H: LayerHost> {
    entries: BTreeMap<u32, PageCanvasEntry<H>>,
    pending_resizes: BTreeSet<u32>,
    config: RegistryConfig,
}

impl<H: LayerHost> PageCanvasRegistry<H> {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: BTreeMap::new(),
            pending_resizes: BTreeSet::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    /// Reconcile mounted overlays with the buffered window.
    pub fn sync(&mut self, host: &mut H, pages: &[PageBox], viewport: Rect) -> SyncReport {
        let mut report = SyncReport::default();
        let (top, bottom) = buffered_window(viewport, self.config.buffer_px);

        let mut wanted: BTreeMap<u32, &PageBox> = BTreeMap::new();
        for page in pages {
            if !page.rect.overlaps_band(top, bottom) {
                continue;
            }
            if page.is_measured() {
                wanted.insert(page.number, page);
            } else if !self.entries.contains_key(&page.number) {
                report.skipped.push(page.number);
            } else {
                // Keep an existing entry through a transient zero-size report.
                wanted.insert(page.number, page);
            }
        }

        let stale: Vec<u32> = self
            .entries
            .keys()
            .filter(|n| !wanted.contains_key(n))
            .copied()
            .collect();
        for number in stale {
            if self.dispose(host, number) {
                report.disposed.push(number);
            }
        }

        for (number, page) in wanted {
            if self.entries.contains_key(&number) {
                if page.is_measured() && self.resize(host, page) {
                    report.resized.push(number);
                }
            } else if self.create(host, page) {
                report.created.push(number);
            } else {
                report.skipped.push(number);
            }
        }

        if !report.created.is_empty() || !report.disposed.is_empty() {
            debug!(
                "registry sync: created {:?}, disposed {:?}, mounted {}",
                report.created,
                report.disposed,
                self.entries.len()
            );
        }
        report
    }

    /// Mount an overlay for a single page if it is not mounted yet.
    /// Returns `true` when a new entry was created.
    pub fn ensure(&mut self, host: &mut H, page: &PageBox) -> bool {
        if self.entries.contains_key(&page.number) {
            return false;
        }
        self.create(host, page)
    }

    fn create(&mut self, host: &mut H, page: &PageBox) -> bool {
        let Some(metrics) = CanvasMetrics::for_page(page, host.device_pixel_ratio()) else {
            debug!("page {} not measured yet, skipping overlay", page.number);
            return false;
        };
        let Some((layer, mut static_surface, mut live_surface)) = host.create_layer(page) else {
            debug!("host could not attach overlay for page {}", page.number);
            return false;
        };
        host.position_layer(&layer, page);
        metrics.apply(&mut static_surface);
        metrics.apply(&mut live_surface);
        let listener = host.bind_pointer_handlers(&layer);

        self.entries.insert(
            page.number,
            PageCanvasEntry {
                page: *page,
                metrics,
                layer,
                static_surface,
                live_surface,
                listener: Some(listener),
            },
        );
        true
    }

    /// Bring a mounted page's canvases in line with `page`'s current box.
    ///
    /// Returns `true` when the backing stores were reset, in which case the
    /// caller must redraw the page's committed strokes.
    pub fn resize(&mut self, host: &mut H, page: &PageBox) -> bool {
        self.pending_resizes.remove(&page.number);
        let dpr = host.device_pixel_ratio();
        let Some(entry) = self.entries.get_mut(&page.number) else {
            return false;
        };
        let Some(metrics) = CanvasMetrics::for_page(page, dpr) else {
            return false;
        };

        if entry.page.rect != page.rect || entry.page.base != page.base {
            host.position_layer(&entry.layer, page);
        }
        entry.page = *page;

        if entry.metrics == metrics {
            return false;
        }
        entry.metrics = metrics;
        metrics.apply(&mut entry.static_surface);
        metrics.apply(&mut entry.live_surface);
        true
    }

    /// Queue a resize for a mounted page, applied by [`Self::flush_resizes`].
    pub fn request_resize(&mut self, number: u32) {
        if self.entries.contains_key(&number) {
            self.pending_resizes.insert(number);
        }
    }

    /// Queue resizes for every mounted page.
    pub fn request_resize_all(&mut self) {
        self.pending_resizes.extend(self.entries.keys().copied());
    }

    #[must_use]
    pub fn has_pending_resize(&self, number: u32) -> bool {
        self.pending_resizes.contains(&number)
    }

    /// Apply queued resizes using fresh geometry from `lookup`. Returns the
    /// pages whose canvases were reset.
    pub fn flush_resizes<F>(&mut self, host: &mut H, mut lookup: F) -> Vec<u32>
    where
        F: FnMut(u32) -> Option<PageBox>,
    {
        let pending = std::mem::take(&mut self.pending_resizes);
        let mut reset = Vec::new();
        for number in pending {
            if !self.entries.contains_key(&number) {
                continue;
            }
            let Some(page) = lookup(number) else {
                continue;
            };
            if self.resize(host, &page) {
                reset.push(number);
            }
        }
        reset
    }

    /// Tear down one overlay. Listeners are unbound before the layer is
    /// removed and any queued resize is dropped. Disposing an unmounted page
    /// is a no-op that returns `false`.
    pub fn dispose(&mut self, host: &mut H, number: u32) -> bool {
        self.pending_resizes.remove(&number);
        let Some(mut entry) = self.entries.remove(&number) else {
            return false;
        };
        if let Some(listener) = entry.listener.take() {
            host.unbind_pointer_handlers(listener);
        }
        host.remove_layer(entry.layer);
        true
    }

    /// Tear down every overlay. Returns how many were mounted.
    pub fn dispose_all(&mut self, host: &mut H) -> usize {
        let numbers: Vec<u32> = self.entries.keys().copied().collect();
        let count = numbers.len();
        for number in numbers {
            self.dispose(host, number);
        }
        self.pending_resizes.clear();
        if count > 0 {
            debug!("registry disposed all {count} overlays");
        }
        count
    }

    #[must_use]
    pub fn get(&self, number: u32) -> Option<&PageCanvasEntry<H>> {
        self.entries.get(&number)
    }

    pub fn get_mut(&mut self, number: u32) -> Option<&mut PageCanvasEntry<H>> {
        self.entries.get_mut(&number)
    }

    #[must_use]
    pub fn contains(&self, number: u32) -> bool {
        self.entries.contains_key(&number)
    }

    /// Mounted page numbers, ascending.
    #[must_use]
    pub fn pages(&self) -> Vec<u32> {
        self.entries.keys().copied().collect()
    }

    pub fn page_boxes(&self) -> impl Iterator<Item = &PageBox> {
        self.entries.values().map(|e| &e.page)
    }

    /// Mounted page under a viewport point.
    #[must_use]
    pub fn page_at(&self, client: Point) -> Option<&PageBox> {
        page_at(self.page_boxes(), client)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;
    use crate::test_utils::test_helpers::{HostOp, RecordingHost, stacked_pages};

    fn registry() -> PageCanvasRegistry<RecordingHost> {
        PageCanvasRegistry::new(RegistryConfig { buffer_px: 800.0 })
    }

    fn page5() -> PageBox {
        PageBox::new(5, Rect::new(0.0, 4200.0, 600.0, 900.0), Size::new(600.0, 900.0))
    }

    #[test]
    fn page_outside_buffered_window_is_not_registered() {
        let mut host = RecordingHost::new();
        let mut reg = registry();

        reg.sync(&mut host, &[page5()], Rect::new(0.0, 0.0, 600.0, 1000.0));
        assert!(!reg.contains(5));

        let report = reg.sync(&mut host, &[page5()], Rect::new(0.0, 3500.0, 600.0, 1000.0));
        assert!(reg.contains(5));
        assert_eq!(report.created, vec![5]);
    }

    #[test]
    fn sync_registers_exactly_the_window() {
        let mut host = RecordingHost::new();
        let mut reg = registry();
        let pages = stacked_pages(20, Size::new(600.0, 800.0), 1.0, 20.0);
        let viewport = Rect::new(0.0, 4000.0, 600.0, 1000.0);

        reg.sync(&mut host, &pages, viewport);

        let expected = pages_in_window(&pages, viewport, 800.0);
        assert_eq!(reg.pages(), expected);
        let (top, bottom) = buffered_window(viewport, 800.0);
        for page in &pages {
            assert_eq!(reg.contains(page.number), page.rect.overlaps_band(top, bottom));
        }
    }

    #[test]
    fn scrolling_away_disposes_entries() {
        let mut host = RecordingHost::new();
        let mut reg = registry();
        let pages = stacked_pages(20, Size::new(600.0, 800.0), 1.0, 20.0);

        reg.sync(&mut host, &pages, Rect::new(0.0, 0.0, 600.0, 1000.0));
        assert!(reg.contains(1));

        let report = reg.sync(&mut host, &pages, Rect::new(0.0, 12000.0, 600.0, 1000.0));
        assert!(report.disposed.contains(&1));
        assert!(!reg.contains(1));
        assert_eq!(host.live_layers(), reg.len());
    }

    #[test]
    fn zero_sized_page_is_skipped_until_measured() {
        let mut host = RecordingHost::new();
        let mut reg = registry();
        let mut page = PageBox::new(1, Rect::new(0.0, 0.0, 0.0, 0.0), Size::new(600.0, 800.0));

        let report = reg.sync(&mut host, &[page], Rect::new(0.0, 0.0, 600.0, 1000.0));
        assert_eq!(report.skipped, vec![1]);
        assert!(reg.is_empty());

        page.rect = Rect::new(0.0, 0.0, 600.0, 800.0);
        reg.sync(&mut host, &[page], Rect::new(0.0, 0.0, 600.0, 1000.0));
        assert!(reg.contains(1));
    }

    #[test]
    fn dispose_unbinds_before_removing_and_is_idempotent() {
        let mut host = RecordingHost::new();
        let mut reg = registry();
        let page = PageBox::new(1, Rect::new(0.0, 0.0, 600.0, 800.0), Size::new(600.0, 800.0));
        assert!(reg.ensure(&mut host, &page));

        assert!(reg.dispose(&mut host, 1));
        assert!(!reg.dispose(&mut host, 1));

        let tail: Vec<&HostOp> = host.ops.iter().rev().take(2).collect();
        assert!(matches!(tail[1], HostOp::Unbind(1)));
        assert!(matches!(tail[0], HostOp::RemoveLayer(1)));
        assert_eq!(
            host.ops.iter().filter(|op| matches!(op, HostOp::RemoveLayer(1))).count(),
            1
        );
    }

    #[test]
    fn recreation_after_dispose_is_fresh_and_sized() {
        let mut host = RecordingHost::new();
        let mut reg = registry();
        let page = PageBox::new(2, Rect::new(0.0, 0.0, 300.0, 400.0), Size::new(600.0, 800.0));
        reg.ensure(&mut host, &page);
        reg.dispose(&mut host, 2);

        let bigger = PageBox::new(2, Rect::new(0.0, 0.0, 1200.0, 1600.0), Size::new(600.0, 800.0));
        assert!(reg.ensure(&mut host, &bigger));
        let entry = reg.get(2).unwrap();
        assert_eq!(entry.metrics().width_px, 1200);
        assert_eq!(entry.static_surface().size, (1200, 1600));
        assert_eq!(entry.live_surface().size, (1200, 1600));
    }

    #[test]
    fn resize_resets_surfaces_only_on_change() {
        let mut host = RecordingHost::new();
        let mut reg = registry();
        let page = PageBox::new(1, Rect::new(0.0, 0.0, 600.0, 800.0), Size::new(600.0, 800.0));
        reg.ensure(&mut host, &page);

        assert!(!reg.resize(&mut host, &page));

        let zoomed = PageBox::new(1, Rect::new(0.0, 0.0, 900.0, 1200.0), Size::new(600.0, 800.0));
        assert!(reg.resize(&mut host, &zoomed));
        let entry = reg.get(1).unwrap();
        assert_eq!(entry.static_surface().size, (900, 1200));
        assert!((entry.static_surface().transform - 1.5).abs() < 1e-9);
    }

    #[test]
    fn dispose_cancels_pending_resize() {
        let mut host = RecordingHost::new();
        let mut reg = registry();
        let page = PageBox::new(1, Rect::new(0.0, 0.0, 600.0, 800.0), Size::new(600.0, 800.0));
        reg.ensure(&mut host, &page);

        reg.request_resize(1);
        assert!(reg.has_pending_resize(1));
        reg.dispose(&mut host, 1);
        assert!(!reg.has_pending_resize(1));

        let mut looked_up = false;
        let reset = reg.flush_resizes(&mut host, |_| {
            looked_up = true;
            Some(page)
        });
        assert!(reset.is_empty());
        assert!(!looked_up);
    }

    #[test]
    fn request_resize_ignores_unmounted_pages() {
        let mut reg = registry();
        reg.request_resize(9);
        assert!(!reg.has_pending_resize(9));
    }

    #[test]
    fn dispose_all_clears_everything() {
        let mut host = RecordingHost::new();
        let mut reg = registry();
        let pages = stacked_pages(3, Size::new(600.0, 800.0), 1.0, 20.0);
        reg.sync(&mut host, &pages, Rect::new(0.0, 0.0, 600.0, 1000.0));
        assert_eq!(reg.len(), 3);

        assert_eq!(reg.dispose_all(&mut host), 3);
        assert!(reg.is_empty());
        assert_eq!(host.live_layers(), 0);
        assert_eq!(host.bound_listeners(), 0);
    }
}
