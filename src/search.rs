//! Search-term highlighting inside a page's text layer.
//!
//! [`apply_highlight`] is a pure transform from span texts to marked-up
//! spans. [`SearchHighlighter`] decides when to run it: it waits for the
//! target page's text layer to become ready (by notification, with bounded
//! polling as a fallback), commits the markup through a [`TextLayerHost`],
//! and restores the original text before any new term is applied.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use log::debug;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::settings::Settings;

/// A run of span text, either plain or wrapped in a match marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum Segment {
    Text(String),
    Mark(String),
}

impl Segment {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Segment::Text(s) | Segment::Mark(s) => s,
        }
    }
}

/// Markup for one text-layer span. `original` is the text the span had
/// before any highlighting and is what [`SpanMarkup::restore`] puts back.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanMarkup {
    pub original: String,
    pub segments: Vec<Segment>,
}

impl SpanMarkup {
    /// Unmarked span.
    #[must_use]
    pub fn plain(original: impl Into<String>) -> Self {
        let original = original.into();
        let segments = if original.is_empty() {
            Vec::new()
        } else {
            vec![Segment::Text(original.clone())]
        };
        Self { original, segments }
    }

    /// Text content ignoring markup.
    #[must_use]
    pub fn plain_text(&self) -> String {
        self.segments.iter().map(Segment::as_str).collect()
    }

    #[must_use]
    pub fn mark_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Mark(_)))
            .count()
    }

    #[must_use]
    pub fn restore(&self) -> SpanMarkup {
        SpanMarkup::plain(self.original.clone())
    }
}

fn term_regex(term: &str) -> Option<Regex> {
    let term = term.trim();
    if term.is_empty() {
        return None;
    }
    RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Wrap every case-insensitive occurrence of `term` in each span. Matches
/// never cross span boundaries. A blank term yields unmarked spans.
#[must_use]
pub fn apply_highlight<S: AsRef<str>>(spans: &[S], term: &str) -> Vec<SpanMarkup> {
    let Some(re) = term_regex(term) else {
        return spans.iter().map(|s| SpanMarkup::plain(s.as_ref())).collect();
    };
    spans
        .iter()
        .map(|span| {
            let text = span.as_ref();
            let mut segments = Vec::new();
            let mut last = 0;
            for m in re.find_iter(text) {
                if m.start() > last {
                    segments.push(Segment::Text(text[last..m.start()].to_string()));
                }
                segments.push(Segment::Mark(m.as_str().to_string()));
                last = m.end();
            }
            if last < text.len() {
                segments.push(Segment::Text(text[last..].to_string()));
            }
            SpanMarkup {
                original: text.to_string(),
                segments,
            }
        })
        .collect()
}

/// Total number of marks across spans.
#[must_use]
pub fn count_matches(markup: &[SpanMarkup]) -> usize {
    markup.iter().map(SpanMarkup::mark_count).sum()
}

/// The text layers of the rendering engine.
pub trait TextLayerHost {
    /// Text content of every span on `page`, `None` if the page has no text
    /// layer element.
    fn text_spans(&self, page: u32) -> Option<Vec<String>>;

    /// At least one span of the page's text layer has been positioned.
    fn text_layer_ready(&self, page: u32) -> bool;

    /// Replace the content of the page's spans, one entry per span in the
    /// order returned by [`Self::text_spans`].
    fn commit_markup(&mut self, page: u32, markup: &[SpanMarkup]);

    fn scroll_page_into_view(&mut self, page: u32);
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchConfig {
    pub retry_interval: Duration,
    pub max_attempts: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(100),
            max_attempts: 30,
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            retry_interval: Duration::from_millis(settings.search_retry_interval_ms),
            max_attempts: settings.search_max_attempts.max(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchOutcome {
    Applied { page: u32, matches: usize },
    /// Text layer not ready; another attempt is scheduled
    Waiting { page: u32, attempt: u32 },
    /// Attempts exhausted; nothing is shown
    GaveUp { page: u32 },
    Cleared,
}

#[derive(Debug)]
struct PendingSearch {
    page: u32,
    attempts: u32,
    next_attempt: Instant,
}

pub struct SearchHighlighter {
    config: SearchConfig,
    term: Option<String>,
    pending: Option<PendingSearch>,
    applied: BTreeMap<u32, Vec<SpanMarkup>>,
    scrolled: bool,
}

impl SearchHighlighter {
    #[must_use]
    pub fn new(config: SearchConfig) -> Self {
        Self {
            config,
            term: None,
            pending: None,
            applied: BTreeMap::new(),
            scrolled: false,
        }
    }

    #[must_use]
    pub fn term(&self) -> Option<&str> {
        self.term.as_deref()
    }

    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.pending.is_some()
    }

    /// Highlight `term` on `page`. Any previous term is restored first; a
    /// blank term only restores.
    pub fn set_term<T: TextLayerHost>(
        &mut self,
        host: &mut T,
        term: &str,
        page: u32,
        now: Instant,
    ) -> SearchOutcome {
        self.clear(host);
        if term.trim().is_empty() {
            return SearchOutcome::Cleared;
        }
        self.term = Some(term.to_string());
        self.scrolled = false;
        self.pending = Some(PendingSearch {
            page,
            attempts: 0,
            next_attempt: now,
        });
        self.attempt(host, now)
            .unwrap_or(SearchOutcome::GaveUp { page })
    }

    /// Restore every highlighted span and drop any pending search.
    pub fn clear<T: TextLayerHost>(&mut self, host: &mut T) {
        for (page, markup) in std::mem::take(&mut self.applied) {
            let restored: Vec<SpanMarkup> = markup.iter().map(SpanMarkup::restore).collect();
            host.commit_markup(page, &restored);
        }
        self.pending = None;
        self.term = None;
    }

    /// Forget all state without touching the host, for when the document
    /// behind it is gone.
    pub fn cancel(&mut self) {
        if self.pending.take().is_some() {
            debug!("search retry cancelled");
        }
        self.applied.clear();
        self.term = None;
        self.scrolled = false;
    }

    /// Polling fallback. Runs a due attempt.
    pub fn tick<T: TextLayerHost>(&mut self, host: &mut T, now: Instant) -> Option<SearchOutcome> {
        let due = self
            .pending
            .as_ref()
            .is_some_and(|p| now >= p.next_attempt);
        if !due {
            return None;
        }
        self.attempt(host, now)
    }

    /// Readiness notification from the engine. Applies a pending search on
    /// that page at once, and re-applies the active term to a page whose
    /// text layer was rebuilt.
    pub fn on_text_layer_ready<T: TextLayerHost>(
        &mut self,
        host: &mut T,
        page: u32,
        now: Instant,
    ) -> Option<SearchOutcome> {
        if self.pending.as_ref().is_some_and(|p| p.page == page) {
            return self.attempt(host, now);
        }
        let term = self.term.clone()?;
        if self.pending.is_some() || self.applied.contains_key(&page) {
            return None;
        }
        let spans = host.text_spans(page)?;
        let markup = apply_highlight(&spans, &term);
        let matches = count_matches(&markup);
        if matches == 0 {
            return None;
        }
        host.commit_markup(page, &markup);
        self.applied.insert(page, markup);
        Some(SearchOutcome::Applied { page, matches })
    }

    /// The page element is gone; so is its markup.
    pub fn on_page_destroyed(&mut self, page: u32) {
        self.applied.remove(&page);
    }

    fn attempt<T: TextLayerHost>(&mut self, host: &mut T, now: Instant) -> Option<SearchOutcome> {
        let term = self.term.clone()?;
        let pending = self.pending.as_mut()?;
        let page = pending.page;
        pending.attempts += 1;

        let spans = host
            .text_spans(page)
            .filter(|_| host.text_layer_ready(page));
        let Some(spans) = spans else {
            if pending.attempts >= self.config.max_attempts {
                debug!(
                    "text layer of page {page} not ready after {} attempts, giving up",
                    pending.attempts
                );
                self.pending = None;
                return Some(SearchOutcome::GaveUp { page });
            }
            pending.next_attempt = now + self.config.retry_interval;
            return Some(SearchOutcome::Waiting {
                page,
                attempt: pending.attempts,
            });
        };
        self.pending = None;

        let markup = apply_highlight(&spans, &term);
        let matches = count_matches(&markup);
        host.commit_markup(page, &markup);
        self.applied.insert(page, markup);
        if matches > 0 && !self.scrolled {
            host.scroll_page_into_view(page);
            self.scrolled = true;
        }
        Some(SearchOutcome::Applied { page, matches })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_helpers::{HostOp, RecordingHost};

    fn plain(markup: &[SpanMarkup]) -> Vec<String> {
        markup.iter().map(SpanMarkup::plain_text).collect()
    }

    #[test]
    fn marks_are_case_insensitive_and_keep_original_case() {
        let out = apply_highlight(&["Foo bar FOO", "nothing"], "foo");
        assert_eq!(
            out[0].segments,
            vec![
                Segment::Mark("Foo".into()),
                Segment::Text(" bar ".into()),
                Segment::Mark("FOO".into()),
            ]
        );
        assert_eq!(out[1].segments, vec![Segment::Text("nothing".into())]);
        assert_eq!(count_matches(&out), 2);
    }

    #[test]
    fn term_is_literal_not_a_pattern() {
        let out = apply_highlight(&["a.b axb (c)"], "a.b");
        assert_eq!(out[0].mark_count(), 1);
        let out = apply_highlight(&["a.b axb (c)"], "(c)");
        assert_eq!(out[0].mark_count(), 1);
    }

    #[test]
    fn plain_text_is_preserved() {
        let spans = ["Übung macht den Meister", "", "ÜBUNG"];
        let out = apply_highlight(&spans, "übung");
        assert_eq!(plain(&out), spans.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        assert_eq!(count_matches(&out), 2);
    }

    #[test]
    fn blank_term_is_unmarked() {
        let out = apply_highlight(&["foo"], "   ");
        assert_eq!(count_matches(&out), 0);
        assert_eq!(out[0], SpanMarkup::plain("foo"));
    }

    #[test]
    fn ready_layer_is_highlighted_and_scrolled_once() {
        let mut host = RecordingHost::new();
        host.set_text_layer(3, &["foo and foo", "bar"], true);
        let mut search = SearchHighlighter::new(SearchConfig::default());

        let out = search.set_term(&mut host, "foo", 3, Instant::now());
        assert_eq!(out, SearchOutcome::Applied { page: 3, matches: 2 });
        assert_eq!(host.marked_text(3), vec!["foo", "foo"]);
        assert_eq!(
            host.ops.iter().filter(|op| **op == HostOp::ScrollIntoView(3)).count(),
            1
        );
    }

    #[test]
    fn switching_terms_leaves_no_residue() {
        let mut host = RecordingHost::new();
        host.set_text_layer(1, &["foo bar", "bar foo"], true);
        let before = host.layer_text(1);
        let mut search = SearchHighlighter::new(SearchConfig::default());
        let now = Instant::now();

        search.set_term(&mut host, "foo", 1, now);
        assert_eq!(host.layer_text(1), before);
        search.set_term(&mut host, "", 1, now);
        assert!(host.marked_text(1).is_empty());
        assert_eq!(host.layer_text(1), before);
        search.set_term(&mut host, "bar", 1, now);
        assert_eq!(host.marked_text(1), vec!["bar", "bar"]);
        assert_eq!(host.layer_text(1), before);
    }

    #[test]
    fn retries_until_ready() {
        let mut host = RecordingHost::new();
        host.set_text_layer(2, &["foo"], false);
        let mut search = SearchHighlighter::new(SearchConfig::default());
        let t0 = Instant::now();

        let out = search.set_term(&mut host, "foo", 2, t0);
        assert_eq!(out, SearchOutcome::Waiting { page: 2, attempt: 1 });
        assert_eq!(search.tick(&mut host, t0 + Duration::from_millis(50)), None);

        host.set_text_layer(2, &["foo"], true);
        let out = search.tick(&mut host, t0 + Duration::from_millis(100));
        assert_eq!(out, Some(SearchOutcome::Applied { page: 2, matches: 1 }));
        assert!(!search.is_waiting());
    }

    #[test]
    fn gives_up_silently_after_max_attempts() {
        let mut host = RecordingHost::new();
        let config = SearchConfig {
            retry_interval: Duration::from_millis(10),
            max_attempts: 3,
        };
        let mut search = SearchHighlighter::new(config);
        let t0 = Instant::now();

        search.set_term(&mut host, "foo", 9, t0);
        search.tick(&mut host, t0 + Duration::from_millis(10));
        let out = search.tick(&mut host, t0 + Duration::from_millis(20));
        assert_eq!(out, Some(SearchOutcome::GaveUp { page: 9 }));
        assert_eq!(search.tick(&mut host, t0 + Duration::from_secs(1)), None);
        assert!(host.ops.iter().all(|op| !matches!(op, HostOp::Commit(_))));
    }

    #[test]
    fn readiness_notification_skips_the_wait() {
        let mut host = RecordingHost::new();
        host.set_text_layer(4, &["needle"], false);
        let mut search = SearchHighlighter::new(SearchConfig::default());
        let t0 = Instant::now();

        search.set_term(&mut host, "needle", 4, t0);
        host.set_text_layer(4, &["needle"], true);
        let out = search.on_text_layer_ready(&mut host, 4, t0 + Duration::from_millis(1));
        assert_eq!(out, Some(SearchOutcome::Applied { page: 4, matches: 1 }));
    }

    #[test]
    fn rebuilt_layer_gets_term_reapplied() {
        let mut host = RecordingHost::new();
        host.set_text_layer(1, &["needle"], true);
        let mut search = SearchHighlighter::new(SearchConfig::default());
        let now = Instant::now();
        search.set_term(&mut host, "needle", 1, now);

        search.on_page_destroyed(1);
        host.set_text_layer(1, &["needle"], true);
        let out = search.on_text_layer_ready(&mut host, 1, now);
        assert_eq!(out, Some(SearchOutcome::Applied { page: 1, matches: 1 }));
        assert_eq!(host.marked_text(1), vec!["needle"]);
    }

    #[test]
    fn cancel_drops_pending_retry() {
        let mut host = RecordingHost::new();
        let mut search = SearchHighlighter::new(SearchConfig::default());
        let t0 = Instant::now();
        search.set_term(&mut host, "foo", 1, t0);
        search.cancel();
        host.set_text_layer(1, &["foo"], true);
        assert_eq!(search.tick(&mut host, t0 + Duration::from_secs(1)), None);
        assert!(host.marked_text(1).is_empty());
    }
}
