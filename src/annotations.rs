//! Annotation data model: freehand strokes and text highlights.
//!
//! Both are stored in page-local coordinates (see [`crate::geometry`]) and
//! grouped by an owner key (the chapter or document they belong to).

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geometry::{HighlightRect, PageBox, Point, Rect, merge_highlight_rects};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrokeId(pub Uuid);

impl StrokeId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StrokeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StrokeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HighlightId(pub Uuid);

impl HighlightId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for HighlightId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for HighlightId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Visual attributes of a pen stroke.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    /// CSS color string, e.g. `#e53935`
    pub color: String,
    /// Line width in page-local units
    pub width: f64,
    /// 0.0 ..= 1.0
    pub opacity: f64,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            color: "#e53935".to_string(),
            width: 2.0,
            opacity: 1.0,
        }
    }
}

/// A committed freehand gesture. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stroke {
    pub id: StrokeId,
    pub points: Vec<Point>,
    #[serde(flatten)]
    pub style: StrokeStyle,
    /// 1-based page number the stroke is anchored to
    pub page: u32,
}

impl Stroke {
    #[must_use]
    pub fn new(page: u32, points: Vec<Point>, style: StrokeStyle) -> Self {
        Self {
            id: StrokeId::new(),
            points,
            style,
            page,
        }
    }

    /// True if any sample lies strictly closer than `threshold` to `p`.
    #[must_use]
    pub fn is_hit_by(&self, p: &Point, threshold: f64) -> bool {
        self.points.iter().any(|q| q.distance_to(p) < threshold)
    }
}

/// Write access to the stroke collection the pen runtime draws from.
///
/// Each call is one atomic mutation as far as the next redraw is concerned.
pub trait StrokeCollection {
    fn page_strokes(&self, owner: &str, page: u32) -> &[Stroke];

    fn add_stroke(&mut self, owner: &str, stroke: Stroke);

    /// Returns `false` if no stroke with that id exists for `owner`.
    fn remove_stroke(&mut self, owner: &str, id: StrokeId) -> bool;
}

/// In-memory stroke collection keyed by owner, then page.
#[derive(Debug, Default)]
pub struct StrokeStore {
    by_owner: HashMap<String, BTreeMap<u32, Vec<Stroke>>>,
    revision: u64,
}

impl StrokeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Monotonic counter bumped by every mutation.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    #[must_use]
    pub fn owner_strokes(&self, owner: &str) -> Vec<&Stroke> {
        self.by_owner
            .get(owner)
            .map(|pages| pages.values().flatten().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_owner
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every stroke of `owner` on `page`. Returns how many went.
    pub fn clear_page(&mut self, owner: &str, page: u32) -> usize {
        let removed = self
            .by_owner
            .get_mut(owner)
            .and_then(|pages| pages.remove(&page))
            .map(|strokes| strokes.len())
            .unwrap_or(0);
        if removed > 0 {
            self.revision += 1;
        }
        removed
    }
}

impl StrokeCollection for StrokeStore {
    fn page_strokes(&self, owner: &str, page: u32) -> &[Stroke] {
        self.by_owner
            .get(owner)
            .and_then(|pages| pages.get(&page))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn add_stroke(&mut self, owner: &str, stroke: Stroke) {
        self.by_owner
            .entry(owner.to_string())
            .or_default()
            .entry(stroke.page)
            .or_default()
            .push(stroke);
        self.revision += 1;
    }

    fn remove_stroke(&mut self, owner: &str, id: StrokeId) -> bool {
        let Some(pages) = self.by_owner.get_mut(owner) else {
            return false;
        };
        for strokes in pages.values_mut() {
            if let Some(idx) = strokes.iter().position(|s| s.id == id) {
                strokes.remove(idx);
                self.revision += 1;
                return true;
            }
        }
        false
    }
}

/// A user-marked span of text, possibly covering several pages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub id: HighlightId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Chapter or document the highlight belongs to
    pub target_id: String,
    pub rects: Vec<HighlightRect>,
    pub created_at: DateTime<Utc>,
}

impl Highlight {
    #[must_use]
    pub fn new(text: String, note: Option<String>, target_id: String, rects: Vec<HighlightRect>) -> Self {
        Self {
            id: HighlightId::new(),
            text,
            note,
            target_id,
            rects,
            created_at: Utc::now(),
        }
    }

    /// Distinct page numbers touched, ascending.
    #[must_use]
    pub fn pages(&self) -> Vec<u32> {
        self.rects
            .iter()
            .map(|r| r.page_number)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// First page the highlight touches.
    #[must_use]
    pub fn first_page(&self) -> Option<u32> {
        self.rects.iter().map(|r| r.page_number).min()
    }

    pub fn rects_on_page(&self, page: u32) -> impl Iterator<Item = &HighlightRect> {
        self.rects.iter().filter(move |r| r.page_number == page)
    }
}

/// Receiver for highlights produced by the capture layer.
pub trait HighlightSink {
    fn add_highlight(&mut self, highlight: Highlight) -> HighlightId;
}

/// In-memory highlight list with per-page overlay replay.
#[derive(Debug, Default)]
pub struct HighlightStore {
    highlights: Vec<Highlight>,
}

impl HighlightStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: HighlightId) -> Option<&Highlight> {
        self.highlights.iter().find(|h| h.id == id)
    }

    pub fn remove(&mut self, id: HighlightId) -> Option<Highlight> {
        let idx = self.highlights.iter().position(|h| h.id == id)?;
        Some(self.highlights.remove(idx))
    }

    pub fn set_note(&mut self, id: HighlightId, note: Option<String>) -> bool {
        match self.highlights.iter_mut().find(|h| h.id == id) {
            Some(h) => {
                h.note = note;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn all(&self) -> &[Highlight] {
        &self.highlights
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.highlights.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.highlights.is_empty()
    }

    /// Viewport rectangles to paint on `page`, one list entry per merged
    /// fragment, tagged with the owning highlight.
    #[must_use]
    pub fn page_overlays(&self, page: &PageBox, tolerance: f64) -> Vec<(HighlightId, Rect)> {
        let mut out = Vec::new();
        for highlight in &self.highlights {
            let rects: Vec<HighlightRect> = highlight.rects_on_page(page.number).copied().collect();
            if rects.is_empty() {
                continue;
            }
            for rect in merge_highlight_rects(&rects, tolerance) {
                if let Some(viewport) = rect.to_viewport(page) {
                    out.push((highlight.id, viewport));
                }
            }
        }
        out
    }
}

impl HighlightSink for HighlightStore {
    fn add_highlight(&mut self, highlight: Highlight) -> HighlightId {
        let id = highlight.id;
        self.highlights.push(highlight);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Size;

    fn stroke_on(page: u32, pts: &[(f64, f64)]) -> Stroke {
        Stroke::new(
            page,
            pts.iter().map(|&(x, y)| Point::new(x, y)).collect(),
            StrokeStyle::default(),
        )
    }

    fn rect(page_number: u32, left: f64, top: f64) -> HighlightRect {
        HighlightRect {
            left,
            top,
            width: 40.0,
            height: 10.0,
            page_number,
            page_width: 600.0,
            page_height: 800.0,
        }
    }

    #[test]
    fn add_and_remove_strokes_bump_revision() {
        let mut store = StrokeStore::new();
        let stroke = stroke_on(2, &[(0.0, 0.0), (1.0, 1.0)]);
        let id = stroke.id;

        store.add_stroke("ch1", stroke);
        assert_eq!(store.revision(), 1);
        assert_eq!(store.page_strokes("ch1", 2).len(), 1);
        assert!(store.page_strokes("ch1", 3).is_empty());
        assert!(store.page_strokes("ch2", 2).is_empty());

        assert!(store.remove_stroke("ch1", id));
        assert_eq!(store.revision(), 2);
        assert!(!store.remove_stroke("ch1", id));
        assert_eq!(store.revision(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn clear_page_only_touches_that_page() {
        let mut store = StrokeStore::new();
        store.add_stroke("doc", stroke_on(1, &[(0.0, 0.0), (1.0, 1.0)]));
        store.add_stroke("doc", stroke_on(1, &[(2.0, 2.0), (3.0, 3.0)]));
        store.add_stroke("doc", stroke_on(2, &[(0.0, 0.0), (1.0, 1.0)]));

        assert_eq!(store.clear_page("doc", 1), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.clear_page("doc", 1), 0);
    }

    #[test]
    fn hit_test_uses_strict_threshold() {
        let stroke = stroke_on(1, &[(0.0, 0.0), (100.0, 0.0)]);
        assert!(stroke.is_hit_by(&Point::new(100.0, 17.9), 18.0));
        assert!(!stroke.is_hit_by(&Point::new(50.0, 18.0), 18.0));
    }

    #[test]
    fn stroke_serializes_with_flat_style() {
        let stroke = stroke_on(4, &[(1.0, 2.0), (3.0, 4.0)]);
        let json = serde_json::to_value(&stroke).unwrap();
        assert_eq!(json["page"], 4);
        assert_eq!(json["color"], "#e53935");
        let back: Stroke = serde_json::from_value(json).unwrap();
        assert_eq!(back, stroke);
    }

    #[test]
    fn highlight_pages_are_distinct_and_sorted() {
        let h = Highlight::new(
            "text".into(),
            None,
            "doc".into(),
            vec![rect(3, 0.0, 0.0), rect(2, 0.0, 0.0), rect(3, 0.0, 20.0)],
        );
        assert_eq!(h.pages(), vec![2, 3]);
        assert_eq!(h.first_page(), Some(2));
        assert_eq!(h.rects_on_page(3).count(), 2);
    }

    #[test]
    fn overlays_follow_page_scale() {
        let mut store = HighlightStore::new();
        let id = store.add_highlight(Highlight::new(
            "hello".into(),
            Some("note".into()),
            "doc".into(),
            vec![rect(1, 10.0, 20.0), rect(2, 0.0, 0.0)],
        ));

        let page = PageBox::new(1, Rect::new(0.0, 100.0, 300.0, 400.0), Size::new(600.0, 800.0));
        let overlays = store.page_overlays(&page, 2.0);
        assert_eq!(overlays, vec![(id, Rect::new(5.0, 110.0, 20.0, 5.0))]);
    }

    #[test]
    fn set_note_and_remove() {
        let mut store = HighlightStore::new();
        let id = store.add_highlight(Highlight::new("a".into(), None, "doc".into(), vec![]));
        assert!(store.set_note(id, Some("n".into())));
        assert_eq!(store.get(id).and_then(|h| h.note.clone()), Some("n".into()));
        assert!(store.remove(id).is_some());
        assert!(store.remove(id).is_none());
        assert!(!store.set_note(id, None));
    }
}
