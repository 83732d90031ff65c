//! Text selection capture and highlight creation.
//!
//! After a pointer-up in the text layer the native selection is read once it
//! has settled. A selection fully inside the managed container opens a
//! floating action menu; choosing "highlight" converts each line fragment of
//! the selection into page-local rects on whichever page owns it.

use std::time::{Duration, Instant};

use log::debug;

use crate::annotations::{Highlight, HighlightId, HighlightSink, HighlightStore};
use crate::geometry::{HighlightRect, PageBox, Point, Rect, Size, clamp_menu_position};
use crate::settings::Settings;

/// The active selection as reported by the host.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectionSnapshot {
    pub text: String,
    pub anchor_inside: bool,
    pub focus_inside: bool,
    /// Viewport bounding rect of the whole range
    pub bounding: Rect,
    /// Viewport rect of every line fragment
    pub fragments: Vec<Rect>,
}

impl SelectionSnapshot {
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.anchor_inside && self.focus_inside && !self.text.trim().is_empty()
    }
}

pub trait SelectionSource {
    fn current_selection(&self) -> Option<SelectionSnapshot>;

    fn clear_selection(&mut self);
}

/// Font-metric compensation applied to every captured fragment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RectCorrection {
    /// Fraction of the fragment height the top edge moves up by
    pub top_offset_ratio: f64,
    /// Factor applied to the fragment height
    pub height_ratio: f64,
}

impl Default for RectCorrection {
    fn default() -> Self {
        Self {
            top_offset_ratio: 0.1,
            height_ratio: 1.2,
        }
    }
}

impl RectCorrection {
    pub const NONE: Self = Self {
        top_offset_ratio: 0.0,
        height_ratio: 1.0,
    };

    #[must_use]
    pub fn apply(&self, rect: Rect) -> Rect {
        Rect::new(
            rect.left,
            rect.top - rect.height * self.top_offset_ratio,
            rect.width,
            rect.height * self.height_ratio,
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureConfig {
    pub settle_delay: Duration,
    pub correction: RectCorrection,
    pub menu_size: Size,
    pub menu_margin: f64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(10),
            correction: RectCorrection::default(),
            menu_size: Size::new(220.0, 44.0),
            menu_margin: 8.0,
        }
    }
}

impl CaptureConfig {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            settle_delay: Duration::from_millis(settings.selection_settle_ms),
            correction: RectCorrection {
                top_offset_ratio: settings.highlight_top_correction,
                height_ratio: settings.highlight_height_correction,
            },
            menu_size: Size::new(settings.menu_width, settings.menu_height),
            menu_margin: settings.menu_margin,
        }
    }
}

/// The page that owns a viewport fragment: the one containing its center,
/// else the one it overlaps most vertically.
#[must_use]
pub fn owning_page<'a>(pages: &'a [PageBox], fragment: &Rect) -> Option<&'a PageBox> {
    let center = fragment.center();
    if let Some(page) = pages.iter().find(|p| p.is_measured() && p.contains(center)) {
        return Some(page);
    }
    pages
        .iter()
        .filter(|p| p.is_measured())
        .map(|p| {
            let overlap = p.rect.bottom().min(fragment.bottom()) - p.rect.top.max(fragment.top);
            (p, overlap)
        })
        .filter(|(_, overlap)| *overlap > 0.0)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(p, _)| p)
}

/// Convert viewport fragments to corrected page-local rects, each tagged with
/// its own owning page. Fragments that are empty or over no page are dropped.
#[must_use]
pub fn highlight_rects(
    fragments: &[Rect],
    pages: &[PageBox],
    correction: RectCorrection,
) -> Vec<HighlightRect> {
    fragments
        .iter()
        .filter(|f| !f.is_empty())
        .filter_map(|fragment| {
            let page = owning_page(pages, fragment)?;
            let scale = page.visual_scale()?;
            let local = Rect::new(
                (fragment.left - page.rect.left) / scale,
                (fragment.top - page.rect.top) / scale,
                fragment.width / scale,
                fragment.height / scale,
            );
            let corrected = correction.apply(local);
            Some(HighlightRect {
                left: corrected.left,
                top: corrected.top,
                width: corrected.width,
                height: corrected.height,
                page_number: page.number,
                page_width: page.base.width,
                page_height: page.base.height,
            })
        })
        .collect()
}

/// Floating menu shown over a settled selection.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionMenu {
    pub position: Point,
    pub selection: SelectionSnapshot,
}

pub struct SelectionCapture {
    config: CaptureConfig,
    settle_at: Option<Instant>,
    menu: Option<ActionMenu>,
}

impl SelectionCapture {
    #[must_use]
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            settle_at: None,
            menu: None,
        }
    }

    /// Pointer released inside the text layer; read the selection once the
    /// settle delay has passed.
    pub fn pointer_up(&mut self, now: Instant) {
        self.settle_at = Some(now + self.config.settle_delay);
    }

    /// Runs a due selection read. Returns the menu if one is open afterwards.
    pub fn tick<S: SelectionSource>(
        &mut self,
        source: &S,
        viewport: Rect,
        now: Instant,
    ) -> Option<&ActionMenu> {
        let due = self.settle_at.is_some_and(|at| now >= at);
        if due {
            self.settle_at = None;
            self.menu = source
                .current_selection()
                .filter(SelectionSnapshot::is_managed)
                .map(|selection| ActionMenu {
                    position: clamp_menu_position(
                        selection.bounding,
                        self.config.menu_size,
                        viewport,
                        self.config.menu_margin,
                    ),
                    selection,
                });
        }
        self.menu.as_ref()
    }

    #[must_use]
    pub fn menu(&self) -> Option<&ActionMenu> {
        self.menu.as_ref()
    }

    pub fn dismiss(&mut self) {
        self.menu = None;
        self.settle_at = None;
    }

    /// Turn the open menu's selection into a highlight and hand it to `sink`.
    /// Closes the menu and clears the native selection.
    pub fn capture_highlight<S, K>(
        &mut self,
        source: &mut S,
        pages: &[PageBox],
        sink: &mut K,
        target_id: &str,
        note: Option<String>,
    ) -> Option<HighlightId>
    where
        S: SelectionSource,
        K: HighlightSink,
    {
        let rects = highlight_rects(
            &self.menu.as_ref()?.selection.fragments,
            pages,
            self.config.correction,
        );
        if rects.is_empty() {
            debug!("selection has no fragment over a page, nothing to highlight");
            return None;
        }
        let menu = self.menu.take()?;
        let highlight = Highlight::new(menu.selection.text, note, target_id.to_string(), rects);
        source.clear_selection();
        Some(sink.add_highlight(highlight))
    }
}

/// Where to scroll for a focused highlight.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScrollTarget {
    pub page: u32,
    /// Page-local top of the highlight's first fragment on that page
    pub top: f64,
}

/// Tracks the active highlight and its transient pulse.
pub struct HighlightFocus {
    pulse: Duration,
    active: Option<(HighlightId, Instant)>,
}

impl HighlightFocus {
    #[must_use]
    pub fn new(pulse: Duration) -> Self {
        Self {
            pulse,
            active: None,
        }
    }

    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(Duration::from_millis(settings.pulse_duration_ms))
    }

    /// Make `id` active. Returns where to scroll, `None` for unknown ids.
    pub fn focus(&mut self, store: &HighlightStore, id: HighlightId, now: Instant) -> Option<ScrollTarget> {
        let highlight = store.get(id)?;
        let page = highlight.first_page()?;
        let top = highlight
            .rects_on_page(page)
            .map(|r| r.top)
            .fold(f64::INFINITY, f64::min);
        self.active = Some((id, now + self.pulse));
        Some(ScrollTarget { page, top })
    }

    /// Highlight currently pulsing.
    #[must_use]
    pub fn pulsing(&self, now: Instant) -> Option<HighlightId> {
        self.active
            .filter(|(_, until)| now < *until)
            .map(|(id, _)| id)
    }

    /// Drop an expired pulse. Returns `true` if one ended.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.active {
            Some((_, until)) if now >= until => {
                self.active = None;
                true
            }
            _ => false,
        }
    }
}
