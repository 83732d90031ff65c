//! Coordinate math shared by every annotation layer.
//!
//! Two coordinate spaces exist:
//! - viewport space: what the host reports for bounding boxes and pointer
//!   events (CSS pixels, origin at the top-left of the viewport or document)
//! - page-local space: unscaled page units with the origin at the page's own
//!   top-left corner
//!
//! Everything persisted (strokes, highlight rects) lives in page-local space.

use serde::{Deserialize, Serialize};

/// A point in either coordinate space. Which one is implied by the API that
/// hands it out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    #[must_use]
    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    #[must_use]
    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }

    #[must_use]
    pub fn scaled(&self, factor: f64) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// True when both sides are strictly positive and finite.
    #[must_use]
    pub fn is_measured(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Axis-aligned rectangle, top-left origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    #[must_use]
    pub const fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    #[must_use]
    pub fn from_edges(left: f64, top: f64, right: f64, bottom: f64) -> Self {
        Self::new(left, top, right - left, bottom - top)
    }

    #[must_use]
    pub fn right(&self) -> f64 {
        self.left + self.width
    }

    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }

    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.left + self.width / 2.0, self.top + self.height / 2.0)
    }

    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.left && p.x <= self.right() && p.y >= self.top && p.y <= self.bottom()
    }

    /// Whether the vertical extent of this rect overlaps `[top, bottom]`.
    /// Touching edges count as overlap.
    #[must_use]
    pub fn overlaps_band(&self, top: f64, bottom: f64) -> bool {
        self.bottom() >= top && self.top <= bottom
    }

    #[must_use]
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_edges(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// Geometry of one host page element as last measured.
///
/// `rect` is the on-screen bounding box, `base` the unscaled page size. Their
/// ratio is the page's visual scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageBox {
    /// 1-based page number
    pub number: u32,
    pub rect: Rect,
    pub base: Size,
}

impl PageBox {
    #[must_use]
    pub const fn new(number: u32, rect: Rect, base: Size) -> Self {
        Self { number, rect, base }
    }

    /// On-screen size over unscaled size. `None` until both are measured.
    #[must_use]
    pub fn visual_scale(&self) -> Option<f64> {
        if !self.is_measured() {
            return None;
        }
        let scale = self.rect.width / self.base.width;
        (scale.is_finite() && scale > 0.0).then_some(scale)
    }

    #[must_use]
    pub fn is_measured(&self) -> bool {
        self.rect.size().is_measured() && self.base.is_measured()
    }

    /// Viewport point to page-local point.
    #[must_use]
    pub fn to_page_local(&self, client: Point) -> Option<Point> {
        if !client.is_finite() {
            return None;
        }
        let scale = self.visual_scale()?;
        Some(Point::new(
            (client.x - self.rect.left) / scale,
            (client.y - self.rect.top) / scale,
        ))
    }

    /// Page-local point to viewport point at the page's current scale.
    #[must_use]
    pub fn to_viewport(&self, local: Point) -> Option<Point> {
        let scale = self.visual_scale()?;
        Some(Point::new(
            self.rect.left + local.x * scale,
            self.rect.top + local.y * scale,
        ))
    }

    #[must_use]
    pub fn contains(&self, client: Point) -> bool {
        self.rect.contains(client)
    }
}

/// Find the page whose on-screen box contains `client`.
#[must_use]
pub fn page_at<'a, I>(pages: I, client: Point) -> Option<&'a PageBox>
where
    I: IntoIterator<Item = &'a PageBox>,
{
    pages
        .into_iter()
        .find(|page| page.is_measured() && page.contains(client))
}

/// One line fragment of a highlight, in unscaled page-local units.
///
/// `page_width`/`page_height` record the unscaled page size at capture time
/// so the rect can be replayed against a page whose base size was later
/// reported differently.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HighlightRect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
    pub page_number: u32,
    pub page_width: f64,
    pub page_height: f64,
}

impl HighlightRect {
    #[must_use]
    pub fn rect(&self) -> Rect {
        Rect::new(self.left, self.top, self.width, self.height)
    }

    #[must_use]
    fn with_rect(&self, rect: Rect) -> Self {
        Self {
            left: rect.left,
            top: rect.top,
            width: rect.width,
            height: rect.height,
            ..*self
        }
    }

    /// Viewport rect of this fragment on `page` at its current scale.
    #[must_use]
    pub fn to_viewport(&self, page: &PageBox) -> Option<Rect> {
        let scale = page.visual_scale()?;
        let rebase = if self.page_width > 0.0 {
            page.base.width / self.page_width
        } else {
            1.0
        };
        let factor = scale * rebase;
        Some(Rect::new(
            page.rect.left + self.left * factor,
            page.rect.top + self.top * factor,
            self.width * factor,
            self.height * factor,
        ))
    }
}

/// Coalesce rects that sit on the same line and touch or overlap
/// horizontally. Rects with different page numbers are never merged.
///
/// Two rects are on the same line when their tops and heights differ by at
/// most `tolerance`; they are adjacent when the horizontal gap between them is
/// at most `tolerance`. Output is ordered by page, then top, then left.
#[must_use]
pub fn merge_highlight_rects(rects: &[HighlightRect], tolerance: f64) -> Vec<HighlightRect> {
    let tolerance = tolerance.max(0.0);
    let mut sorted: Vec<HighlightRect> = rects
        .iter()
        .copied()
        .filter(|r| !r.rect().is_empty())
        .collect();
    sorted.sort_by(|a, b| {
        a.page_number
            .cmp(&b.page_number)
            .then(a.top.total_cmp(&b.top))
            .then(a.left.total_cmp(&b.left))
    });

    let mut merged: Vec<HighlightRect> = Vec::with_capacity(sorted.len());
    for rect in sorted {
        let mut current = rect;
        // A grown rect can reach fragments merged before it.
        while let Some(pos) = merged
            .iter()
            .position(|m| touches_on_line(m, &current, tolerance))
        {
            let absorbed = merged.remove(pos);
            current = current.with_rect(current.rect().union(&absorbed.rect()));
        }
        merged.push(current);
    }
    merged.sort_by(|a, b| {
        a.page_number
            .cmp(&b.page_number)
            .then(a.top.total_cmp(&b.top))
            .then(a.left.total_cmp(&b.left))
    });
    merged
}

fn touches_on_line(a: &HighlightRect, b: &HighlightRect, tolerance: f64) -> bool {
    a.page_number == b.page_number
        && (a.top - b.top).abs() <= tolerance
        && (a.height - b.height).abs() <= tolerance
        && b.left <= a.left + a.width + tolerance
        && a.left <= b.left + b.width + tolerance
}

/// One segment of a smoothed freehand path.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PathSegment {
    MoveTo(Point),
    LineTo(Point),
    QuadTo { ctrl: Point, end: Point },
}

/// Quadratic midpoint smoothing.
///
/// Each interior sample becomes the control point of a curve that ends at the
/// midpoint between it and the next sample; the path closes with a straight
/// segment to the final sample. A single point yields only a `MoveTo`.
#[must_use]
pub fn smooth_path(points: &[Point]) -> Vec<PathSegment> {
    let Some(first) = points.first() else {
        return Vec::new();
    };
    let mut segments = Vec::with_capacity(points.len() + 1);
    segments.push(PathSegment::MoveTo(*first));
    if points.len() == 1 {
        return segments;
    }

    for pair in points[1..].windows(2) {
        segments.push(PathSegment::QuadTo {
            ctrl: pair[0],
            end: pair[0].midpoint(&pair[1]),
        });
    }
    if let Some(last) = points.last() {
        segments.push(PathSegment::LineTo(*last));
    }
    segments
}

/// Clamp a floating menu of `menu` size anchored above `anchor` so it stays
/// inside `viewport`, keeping `margin` from every edge. Falls back below the
/// anchor when there is no room above.
#[must_use]
pub fn clamp_menu_position(anchor: Rect, menu: Size, viewport: Rect, margin: f64) -> Point {
    let mut x = anchor.center().x - menu.width / 2.0;
    let max_x = viewport.right() - menu.width - margin;
    x = x.min(max_x).max(viewport.left + margin);

    let mut y = anchor.top - menu.height - margin;
    if y < viewport.top + margin {
        y = anchor.bottom() + margin;
    }
    let max_y = viewport.bottom() - menu.height - margin;
    y = y.min(max_y).max(viewport.top + margin);

    Point::new(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(number: u32, rect: Rect, base: Size) -> PageBox {
        PageBox::new(number, rect, base)
    }

    fn hr(page_number: u32, left: f64, top: f64, width: f64, height: f64) -> HighlightRect {
        HighlightRect {
            left,
            top,
            width,
            height,
            page_number,
            page_width: 600.0,
            page_height: 800.0,
        }
    }

    #[test]
    fn page_local_roundtrip_through_scale() {
        let p = page(1, Rect::new(100.0, 50.0, 1200.0, 1600.0), Size::new(600.0, 800.0));
        assert_eq!(p.visual_scale(), Some(2.0));

        let local = p.to_page_local(Point::new(300.0, 250.0)).unwrap();
        assert_eq!(local, Point::new(100.0, 100.0));
        assert_eq!(p.to_viewport(local).unwrap(), Point::new(300.0, 250.0));
    }

    #[test]
    fn rendered_position_depends_only_on_current_scale() {
        let captured_at = page(1, Rect::new(0.0, 0.0, 900.0, 1200.0), Size::new(600.0, 800.0));
        let stored = captured_at.to_page_local(Point::new(450.0, 300.0)).unwrap();

        for scale in [0.5, 1.0, 1.75, 3.0] {
            let now = page(
                1,
                Rect::new(0.0, 0.0, 600.0 * scale, 800.0 * scale),
                Size::new(600.0, 800.0),
            );
            let rendered = now.to_viewport(stored).unwrap();
            assert!((rendered.x - stored.x * scale).abs() < 1e-9);
            assert!((rendered.y - stored.y * scale).abs() < 1e-9);
        }
    }

    #[test]
    fn unmeasured_page_has_no_scale() {
        let p = page(3, Rect::new(0.0, 0.0, 0.0, 0.0), Size::new(600.0, 800.0));
        assert!(p.visual_scale().is_none());
        assert!(p.to_page_local(Point::new(1.0, 1.0)).is_none());
    }

    #[test]
    fn non_finite_client_point_is_rejected() {
        let p = page(1, Rect::new(0.0, 0.0, 600.0, 800.0), Size::new(600.0, 800.0));
        assert!(p.to_page_local(Point::new(f64::NAN, 2.0)).is_none());
    }

    #[test]
    fn page_at_finds_containing_page() {
        let pages = vec![
            page(1, Rect::new(0.0, 0.0, 600.0, 800.0), Size::new(600.0, 800.0)),
            page(2, Rect::new(0.0, 820.0, 600.0, 800.0), Size::new(600.0, 800.0)),
        ];
        assert_eq!(page_at(&pages, Point::new(10.0, 900.0)).map(|p| p.number), Some(2));
        assert!(page_at(&pages, Point::new(10.0, 810.0)).is_none());
    }

    #[test]
    fn merge_joins_adjacent_fragments_on_one_line() {
        let rects = vec![
            hr(1, 10.0, 100.0, 50.0, 12.0),
            hr(1, 61.0, 100.5, 40.0, 12.0),
            hr(1, 10.0, 120.0, 80.0, 12.0),
        ];
        let merged = merge_highlight_rects(&rects, 2.0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].left, 10.0);
        assert_eq!(merged[0].width, 91.0);
        assert_eq!(merged[1].top, 120.0);
    }

    #[test]
    fn merge_never_crosses_pages() {
        let rects = vec![hr(1, 10.0, 100.0, 50.0, 12.0), hr(2, 10.0, 100.0, 50.0, 12.0)];
        let merged = merge_highlight_rects(&rects, 5.0);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].page_number, 1);
        assert_eq!(merged[1].page_number, 2);
    }

    #[test]
    fn merge_keeps_distant_fragments_apart() {
        let rects = vec![hr(1, 10.0, 100.0, 20.0, 12.0), hr(1, 200.0, 100.0, 20.0, 12.0)];
        assert_eq!(merge_highlight_rects(&rects, 2.0).len(), 2);
    }

    #[test]
    fn merge_bridges_fragments_joined_by_a_later_one() {
        let rects = vec![
            hr(1, 50.0, 100.0, 10.0, 10.0),
            hr(1, 0.0, 100.5, 40.0, 10.0),
            hr(1, 38.0, 101.0, 14.0, 10.0),
        ];
        let merged = merge_highlight_rects(&rects, 2.0);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].left, 0.0);
        assert_eq!(merged[0].width, 60.0);
        assert_eq!(merged[0].top, 100.0);
    }

    #[test]
    fn merge_drops_empty_rects() {
        let rects = vec![hr(1, 10.0, 100.0, 0.0, 12.0)];
        assert!(merge_highlight_rects(&rects, 2.0).is_empty());
    }

    #[test]
    fn highlight_rect_replays_at_new_scale() {
        let rect = hr(1, 10.0, 20.0, 30.0, 5.0);
        let p = page(1, Rect::new(100.0, 0.0, 1200.0, 1600.0), Size::new(600.0, 800.0));
        let viewport = rect.to_viewport(&p).unwrap();
        assert_eq!(viewport, Rect::new(120.0, 40.0, 60.0, 10.0));
    }

    #[test]
    fn smooth_path_uses_midpoints() {
        let pts = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(20.0, 10.0),
        ];
        let path = smooth_path(&pts);
        assert_eq!(
            path,
            vec![
                PathSegment::MoveTo(Point::new(0.0, 0.0)),
                PathSegment::QuadTo {
                    ctrl: Point::new(10.0, 0.0),
                    end: Point::new(15.0, 5.0),
                },
                PathSegment::LineTo(Point::new(20.0, 10.0)),
            ]
        );
    }

    #[test]
    fn smooth_path_of_two_points_is_a_line() {
        let path = smooth_path(&[Point::new(0.0, 0.0), Point::new(5.0, 5.0)]);
        assert_eq!(
            path,
            vec![
                PathSegment::MoveTo(Point::new(0.0, 0.0)),
                PathSegment::LineTo(Point::new(5.0, 5.0)),
            ]
        );
    }

    #[test]
    fn menu_is_clamped_to_viewport() {
        let viewport = Rect::new(0.0, 0.0, 800.0, 600.0);
        let menu = Size::new(200.0, 40.0);

        let pos = clamp_menu_position(Rect::new(760.0, 300.0, 30.0, 16.0), menu, viewport, 8.0);
        assert_eq!(pos.x, 800.0 - 200.0 - 8.0);
        assert_eq!(pos.y, 300.0 - 40.0 - 8.0);

        let pos = clamp_menu_position(Rect::new(0.0, 10.0, 30.0, 16.0), menu, viewport, 8.0);
        assert_eq!(pos.x, 8.0);
        assert_eq!(pos.y, 10.0 + 16.0 + 8.0);
    }
}
