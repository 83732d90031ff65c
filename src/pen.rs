//! Freehand pen and eraser runtime.
//!
//! A small state machine over pointer events. At most one gesture is live at
//! a time; it is bound to the pointer id and page it started on. Committed
//! strokes go into a [`StrokeCollection`] and are redrawn per page on the
//! static canvas; the in-progress stroke is redrawn from scratch on the live
//! canvas on every move.

use std::cell::RefCell;
use std::rc::Rc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::annotations::{Stroke, StrokeCollection, StrokeId, StrokeStyle};
use crate::event_source::{PointerEvent, PointerKind, PointerPhase};
use crate::geometry::{Point, smooth_path};
use crate::registry::PageCanvasRegistry;
use crate::settings::Settings;
use crate::surface::{LayerHost, Surface};

pub const DEFAULT_ERASER_THRESHOLD: f64 = 18.0;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawingMode {
    #[default]
    Idle,
    Pen,
    Eraser,
}

/// Live pen settings, read on every event instead of being captured when a
/// gesture starts.
pub trait PenSettings {
    fn drawing_mode(&self) -> DrawingMode;
    fn stroke_style(&self) -> StrokeStyle;
    fn show_annotations(&self) -> bool;
}

#[derive(Clone, Debug, PartialEq)]
pub struct PenState {
    pub mode: DrawingMode,
    pub style: StrokeStyle,
    pub show_annotations: bool,
}

impl Default for PenState {
    fn default() -> Self {
        Self {
            mode: DrawingMode::Idle,
            style: StrokeStyle::default(),
            show_annotations: true,
        }
    }
}

impl PenSettings for PenState {
    fn drawing_mode(&self) -> DrawingMode {
        self.mode
    }

    fn stroke_style(&self) -> StrokeStyle {
        self.style.clone()
    }

    fn show_annotations(&self) -> bool {
        self.show_annotations
    }
}

/// Shared handle to [`PenState`]. The reader keeps one clone and mutates it;
/// the runtime keeps another and reads it.
#[derive(Clone, Debug, Default)]
pub struct SharedPenSettings(Rc<RefCell<PenState>>);

impl SharedPenSettings {
    #[must_use]
    pub fn new(state: PenState) -> Self {
        Self(Rc::new(RefCell::new(state)))
    }

    pub fn set_mode(&self, mode: DrawingMode) {
        self.0.borrow_mut().mode = mode;
    }

    pub fn set_color(&self, color: impl Into<String>) {
        self.0.borrow_mut().style.color = color.into();
    }

    pub fn set_width(&self, width: f64) {
        self.0.borrow_mut().style.width = width.max(0.1);
    }

    pub fn set_opacity(&self, opacity: f64) {
        self.0.borrow_mut().style.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn set_show_annotations(&self, show: bool) {
        self.0.borrow_mut().show_annotations = show;
    }

    #[must_use]
    pub fn snapshot(&self) -> PenState {
        self.0.borrow().clone()
    }
}

impl PenSettings for SharedPenSettings {
    fn drawing_mode(&self) -> DrawingMode {
        self.0.borrow().mode
    }

    fn stroke_style(&self) -> StrokeStyle {
        self.0.borrow().style.clone()
    }

    fn show_annotations(&self) -> bool {
        self.0.borrow().show_annotations
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PenConfig {
    /// Eraser hit distance in page-local units
    pub eraser_threshold: f64,
}

impl Default for PenConfig {
    fn default() -> Self {
        Self {
            eraser_threshold: DEFAULT_ERASER_THRESHOLD,
        }
    }
}

impl PenConfig {
    #[must_use]
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            eraser_threshold: settings.eraser_threshold.max(0.0),
        }
    }
}

/// What a pointer event did.
#[derive(Clone, Debug, PartialEq)]
pub enum PointerOutcome {
    /// Not ours: idle mode, foreign pointer, no page under the pointer, or a
    /// coordinate that could not be converted
    Ignored,
    /// Touch input while the pen is active; the host should prevent default
    Rejected,
    /// A gesture started on this page
    Started { page: u32 },
    /// The live stroke grew or the eraser moved without hitting anything
    Moved,
    /// The eraser removed these strokes
    Erased(Vec<StrokeId>),
    /// A stroke was committed
    Committed(StrokeId),
    /// A single-point pen gesture ended; nothing was stored
    Tapped,
    /// An eraser gesture ended
    Released,
}

#[derive(Debug)]
struct Gesture {
    pointer_id: i32,
    page: u32,
    mode: DrawingMode,
    points: Vec<Point>,
}

pub struct PenRuntime<S: PenSettings> {
    settings: S,
    config: PenConfig,
    owner: String,
    gesture: Option<Gesture>,
}

impl<S: PenSettings> PenRuntime<S> {
    pub fn new(settings: S, config: PenConfig, owner: impl Into<String>) -> Self {
        Self {
            settings,
            config,
            owner: owner.into(),
            gesture: None,
        }
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Switch the stroke owner (chapter or document). Drops any live gesture.
    pub fn set_owner(&mut self, owner: impl Into<String>) {
        self.owner = owner.into();
        self.gesture = None;
    }

    #[must_use]
    pub fn settings(&self) -> &S {
        &self.settings
    }

    #[must_use]
    pub fn is_drawing(&self) -> bool {
        self.gesture.is_some()
    }

    /// Page of the live gesture, if any.
    #[must_use]
    pub fn active_page(&self) -> Option<u32> {
        self.gesture.as_ref().map(|g| g.page)
    }

    /// Points of the live gesture so far.
    #[must_use]
    pub fn live_points(&self) -> &[Point] {
        self.gesture.as_ref().map(|g| g.points.as_slice()).unwrap_or(&[])
    }

    /// Forget the live gesture without committing it, e.g. when its page was
    /// disposed or the document changed.
    pub fn abort(&mut self) {
        if let Some(g) = self.gesture.take() {
            debug!("aborted {:?} gesture on page {}", g.mode, g.page);
        }
    }

    pub fn handle<H, C>(
        &mut self,
        event: &PointerEvent,
        registry: &mut PageCanvasRegistry<H>,
        host: &mut H,
        strokes: &mut C,
    ) -> PointerOutcome
    where
        H: LayerHost,
        C: StrokeCollection,
    {
        // Releases end the gesture whatever the mode is now.
        if event.phase.is_release() {
            return self.pointer_release(event, registry, host, strokes);
        }
        let owns_gesture = self
            .gesture
            .as_ref()
            .is_some_and(|g| g.pointer_id == event.pointer_id);
        if event.kind == PointerKind::Touch
            && !owns_gesture
            && self.settings.drawing_mode() == DrawingMode::Pen
        {
            debug!("rejected touch input in pen mode");
            return PointerOutcome::Rejected;
        }
        match event.phase {
            PointerPhase::Down => self.pointer_down(event, registry, host, strokes),
            PointerPhase::Move => self.pointer_move(event, registry, strokes),
            PointerPhase::Up | PointerPhase::Leave | PointerPhase::Cancel => {
                self.pointer_release(event, registry, host, strokes)
            }
        }
    }

    fn pointer_down<H, C>(
        &mut self,
        event: &PointerEvent,
        registry: &mut PageCanvasRegistry<H>,
        host: &mut H,
        strokes: &mut C,
    ) -> PointerOutcome
    where
        H: LayerHost,
        C: StrokeCollection,
    {
        let mode = self.settings.drawing_mode();
        if mode == DrawingMode::Idle || self.gesture.is_some() {
            return PointerOutcome::Ignored;
        }
        let Some(page) = registry.page_at(event.client).copied() else {
            return PointerOutcome::Ignored;
        };
        let Some(local) = page.to_page_local(event.client) else {
            return PointerOutcome::Ignored;
        };

        if let Some(entry) = registry.get(page.number) {
            host.set_pointer_capture(entry.layer(), event.pointer_id);
        }
        self.gesture = Some(Gesture {
            pointer_id: event.pointer_id,
            page: page.number,
            mode,
            points: vec![local],
        });

        match mode {
            DrawingMode::Pen => {
                self.redraw_live(registry);
                PointerOutcome::Started { page: page.number }
            }
            DrawingMode::Eraser => {
                let erased = self.erase_at(page.number, local, registry, strokes);
                if erased.is_empty() {
                    PointerOutcome::Started { page: page.number }
                } else {
                    PointerOutcome::Erased(erased)
                }
            }
            DrawingMode::Idle => PointerOutcome::Ignored,
        }
    }

    fn pointer_move<H, C>(
        &mut self,
        event: &PointerEvent,
        registry: &mut PageCanvasRegistry<H>,
        strokes: &mut C,
    ) -> PointerOutcome
    where
        H: LayerHost,
        C: StrokeCollection,
    {
        let Some(gesture) = self.gesture.as_mut() else {
            return PointerOutcome::Ignored;
        };
        if gesture.pointer_id != event.pointer_id {
            return PointerOutcome::Ignored;
        }
        let Some(local) = registry
            .get(gesture.page)
            .and_then(|entry| entry.page().to_page_local(event.client))
        else {
            return PointerOutcome::Ignored;
        };
        gesture.points.push(local);
        let (mode, page) = (gesture.mode, gesture.page);

        match mode {
            DrawingMode::Pen => {
                self.redraw_live(registry);
                PointerOutcome::Moved
            }
            DrawingMode::Eraser => {
                let erased = self.erase_at(page, local, registry, strokes);
                if erased.is_empty() {
                    PointerOutcome::Moved
                } else {
                    PointerOutcome::Erased(erased)
                }
            }
            DrawingMode::Idle => PointerOutcome::Ignored,
        }
    }

    fn pointer_release<H, C>(
        &mut self,
        event: &PointerEvent,
        registry: &mut PageCanvasRegistry<H>,
        host: &mut H,
        strokes: &mut C,
    ) -> PointerOutcome
    where
        H: LayerHost,
        C: StrokeCollection,
    {
        let matches = self
            .gesture
            .as_ref()
            .is_some_and(|g| g.pointer_id == event.pointer_id);
        if !matches {
            return PointerOutcome::Ignored;
        }
        let Some(gesture) = self.gesture.take() else {
            return PointerOutcome::Ignored;
        };

        if let Some(entry) = registry.get_mut(gesture.page) {
            host.release_pointer_capture(entry.layer(), gesture.pointer_id);
            entry.live_surface_mut().clear();
        }

        match gesture.mode {
            DrawingMode::Pen if gesture.points.len() >= 2 => {
                let stroke = Stroke::new(gesture.page, gesture.points, self.settings.stroke_style());
                let id = stroke.id;
                strokes.add_stroke(&self.owner, stroke);
                self.redraw_page(gesture.page, registry, strokes);
                PointerOutcome::Committed(id)
            }
            DrawingMode::Pen => PointerOutcome::Tapped,
            DrawingMode::Eraser | DrawingMode::Idle => PointerOutcome::Released,
        }
    }

    fn erase_at<H, C>(
        &self,
        page: u32,
        at: Point,
        registry: &mut PageCanvasRegistry<H>,
        strokes: &mut C,
    ) -> Vec<StrokeId>
    where
        H: LayerHost,
        C: StrokeCollection,
    {
        let hits: Vec<StrokeId> = strokes
            .page_strokes(&self.owner, page)
            .iter()
            .filter(|s| s.is_hit_by(&at, self.config.eraser_threshold))
            .map(|s| s.id)
            .collect();
        if hits.is_empty() {
            return hits;
        }
        for id in &hits {
            strokes.remove_stroke(&self.owner, *id);
        }
        self.redraw_page(page, registry, strokes);
        hits
    }

    fn redraw_live<H: LayerHost>(&self, registry: &mut PageCanvasRegistry<H>) {
        let Some(gesture) = self.gesture.as_ref() else {
            return;
        };
        let Some(entry) = registry.get_mut(gesture.page) else {
            return;
        };
        let surface = entry.live_surface_mut();
        surface.clear();
        draw_points(surface, &gesture.points, &self.settings.stroke_style());
    }

    /// Repaint one page's committed strokes. Cost is linear in the strokes on
    /// that page.
    pub fn redraw_page<H, C>(&self, page: u32, registry: &mut PageCanvasRegistry<H>, strokes: &C)
    where
        H: LayerHost,
        C: StrokeCollection,
    {
        let Some(entry) = registry.get_mut(page) else {
            return;
        };
        let surface = entry.static_surface_mut();
        surface.clear();
        if !self.settings.show_annotations() {
            return;
        }
        for stroke in strokes.page_strokes(&self.owner, page) {
            draw_points(surface, &stroke.points, &stroke.style);
        }
    }

    /// Repaint every mounted page.
    pub fn redraw_all<H, C>(&self, registry: &mut PageCanvasRegistry<H>, strokes: &C)
    where
        H: LayerHost,
        C: StrokeCollection,
    {
        for page in registry.pages() {
            self.redraw_page(page, registry, strokes);
        }
    }
}

/// Paint a point sequence: a dot for a single sample, a smoothed path
/// otherwise.
pub fn draw_points<S: Surface>(surface: &mut S, points: &[Point], style: &StrokeStyle) {
    match points {
        [] => {}
        [only] => surface.fill_dot(*only, style.width / 2.0, style),
        _ => surface.stroke_path(&smooth_path(points), style),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::StrokeStore;
    use crate::geometry::{PageBox, Rect, Size};
    use crate::registry::RegistryConfig;
    use crate::test_utils::test_helpers::{GestureBuilder, HostOp, RecordingHost, SurfaceOp};

    struct Rig {
        host: RecordingHost,
        registry: PageCanvasRegistry<RecordingHost>,
        strokes: StrokeStore,
        settings: SharedPenSettings,
        pen: PenRuntime<SharedPenSettings>,
    }

    impl Rig {
        fn new(mode: DrawingMode) -> Self {
            let mut host = RecordingHost::new();
            let mut registry = PageCanvasRegistry::new(RegistryConfig::default());
            let pages = [
                PageBox::new(1, Rect::new(0.0, 0.0, 600.0, 800.0), Size::new(600.0, 800.0)),
                PageBox::new(2, Rect::new(0.0, 820.0, 600.0, 800.0), Size::new(600.0, 800.0)),
            ];
            registry.sync(&mut host, &pages, Rect::new(0.0, 0.0, 600.0, 1000.0));
            let settings = SharedPenSettings::default();
            settings.set_mode(mode);
            let pen = PenRuntime::new(settings.clone(), PenConfig::default(), "doc");
            Self {
                host,
                registry,
                strokes: StrokeStore::new(),
                settings,
                pen,
            }
        }

        fn run(&mut self, events: &[PointerEvent]) -> Vec<PointerOutcome> {
            events
                .iter()
                .map(|e| {
                    self.pen
                        .handle(e, &mut self.registry, &mut self.host, &mut self.strokes)
                })
                .collect()
        }
    }

    #[test]
    fn idle_mode_ignores_everything() {
        let mut rig = Rig::new(DrawingMode::Idle);
        let out = rig.run(&GestureBuilder::pen(1).down(10.0, 10.0).drag_to(50.0, 50.0, 4).up().build());
        assert!(out.iter().all(|o| *o == PointerOutcome::Ignored));
        assert!(rig.strokes.is_empty());
    }

    #[test]
    fn pen_gesture_commits_every_sample() {
        let mut rig = Rig::new(DrawingMode::Pen);
        let events = GestureBuilder::pen(7).down(10.0, 10.0).drag_to(110.0, 60.0, 5).up().build();
        let out = rig.run(&events);

        assert_eq!(out[0], PointerOutcome::Started { page: 1 });
        let PointerOutcome::Committed(id) = out.last().unwrap().clone() else {
            panic!("expected commit, got {out:?}");
        };
        let stored = rig.strokes.page_strokes("doc", 1);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].points.len(), 1 + 5);
        assert!(!rig.pen.is_drawing());
    }

    #[test]
    fn tap_draws_dot_but_stores_nothing() {
        let mut rig = Rig::new(DrawingMode::Pen);
        let out = rig.run(&GestureBuilder::pen(1).down(10.0, 10.0).build());
        assert_eq!(out, vec![PointerOutcome::Started { page: 1 }]);
        let live = rig.registry.get(1).unwrap().live_surface();
        assert!(matches!(live.ops.last(), Some(SurfaceOp::Dot { .. })));

        let out = rig.run(&GestureBuilder::pen(1).up().build());
        assert_eq!(out, vec![PointerOutcome::Tapped]);
        assert!(rig.strokes.is_empty());
        assert!(rig.registry.get(1).unwrap().live_surface().is_blank());
    }

    #[test]
    fn points_are_page_local() {
        let mut rig = Rig::new(DrawingMode::Pen);
        rig.run(&GestureBuilder::pen(1).down(100.0, 900.0).move_to(120.0, 940.0).up().build());
        let stored = rig.strokes.page_strokes("doc", 2);
        assert_eq!(stored[0].points, vec![Point::new(100.0, 80.0), Point::new(120.0, 120.0)]);
    }

    #[test]
    fn second_pointer_is_ignored_while_drawing() {
        let mut rig = Rig::new(DrawingMode::Pen);
        rig.run(&GestureBuilder::pen(1).down(10.0, 10.0).build());
        let out = rig.run(&GestureBuilder::pen(2).down(50.0, 50.0).move_to(60.0, 60.0).up().build());
        assert!(out.iter().all(|o| *o == PointerOutcome::Ignored));
        assert_eq!(rig.pen.live_points().len(), 1);
    }

    #[test]
    fn touch_is_rejected_in_pen_mode_only() {
        let mut rig = Rig::new(DrawingMode::Pen);
        let out = rig.run(&GestureBuilder::touch(3).down(10.0, 10.0).build());
        assert_eq!(out, vec![PointerOutcome::Rejected]);

        rig.settings.set_mode(DrawingMode::Eraser);
        let out = rig.run(&GestureBuilder::touch(3).down(10.0, 10.0).build());
        assert_eq!(out, vec![PointerOutcome::Started { page: 1 }]);
    }

    #[test]
    fn touch_release_after_switch_to_pen_ends_gesture() {
        let mut rig = Rig::new(DrawingMode::Eraser);
        rig.run(&GestureBuilder::touch(5).down(10.0, 10.0).build());
        assert!(rig.pen.is_drawing());

        rig.settings.set_mode(DrawingMode::Pen);
        let out = rig.run(&GestureBuilder::touch(5).up().build());
        assert_eq!(out, vec![PointerOutcome::Released]);
        assert!(!rig.pen.is_drawing());
        assert!(rig.host.ops.contains(&HostOp::Release(1, 5)));

        let out = rig.run(&GestureBuilder::pen(1).down(20.0, 20.0).drag_to(80.0, 40.0, 3).up().build());
        assert_eq!(out[0], PointerOutcome::Started { page: 1 });
        assert!(matches!(out.last(), Some(PointerOutcome::Committed(_))));
        assert_eq!(rig.strokes.page_strokes("doc", 1).len(), 1);
    }

    #[test]
    fn touch_cancel_in_pen_mode_clears_eraser_gesture() {
        let mut rig = Rig::new(DrawingMode::Eraser);
        rig.run(&GestureBuilder::touch(5).down(10.0, 10.0).move_to(12.0, 12.0).build());
        rig.settings.set_mode(DrawingMode::Pen);

        let out = rig.run(&GestureBuilder::touch(5).move_to(14.0, 14.0).cancel().build());
        assert_eq!(out, vec![PointerOutcome::Moved, PointerOutcome::Released]);
        assert!(!rig.pen.is_drawing());
    }

    #[test]
    fn eraser_removes_hit_strokes_and_keeps_others() {
        let mut rig = Rig::new(DrawingMode::Pen);
        rig.run(&GestureBuilder::pen(1).down(10.0, 10.0).drag_to(100.0, 10.0, 3).up().build());
        rig.run(&GestureBuilder::pen(1).down(10.0, 400.0).drag_to(100.0, 400.0, 3).up().build());
        assert_eq!(rig.strokes.page_strokes("doc", 1).len(), 2);

        rig.settings.set_mode(DrawingMode::Eraser);
        let out = rig.run(&GestureBuilder::mouse(1).down(300.0, 200.0).move_to(101.0, 20.0).up().build());
        assert!(matches!(out[1], PointerOutcome::Erased(ref ids) if ids.len() == 1));
        assert_eq!(out[2], PointerOutcome::Released);

        let left = rig.strokes.page_strokes("doc", 1);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].points[0], Point::new(10.0, 400.0));
    }

    #[test]
    fn release_resets_state_and_capture() {
        let mut rig = Rig::new(DrawingMode::Pen);
        rig.run(&GestureBuilder::pen(4).down(10.0, 10.0).move_to(20.0, 20.0).cancel().build());
        assert!(!rig.pen.is_drawing());
        assert_eq!(rig.strokes.page_strokes("doc", 1).len(), 1);
        assert!(rig.host.ops.contains(&HostOp::Capture(1, 4)));
        assert!(rig.host.ops.contains(&HostOp::Release(1, 4)));
    }

    #[test]
    fn live_canvas_is_redrawn_from_scratch_each_move() {
        let mut rig = Rig::new(DrawingMode::Pen);
        rig.run(&GestureBuilder::pen(1).down(10.0, 10.0).drag_to(50.0, 50.0, 3).build());
        let live = rig.registry.get(1).unwrap().live_surface();
        assert_eq!(live.drawn_since_clear(), 1);
        assert_eq!(live.clears(), 4);
    }

    #[test]
    fn hidden_annotations_leave_static_canvas_blank() {
        let mut rig = Rig::new(DrawingMode::Pen);
        rig.run(&GestureBuilder::pen(1).down(10.0, 10.0).move_to(20.0, 20.0).up().build());
        assert_eq!(rig.registry.get(1).unwrap().static_surface().drawn_since_clear(), 1);

        rig.settings.set_show_annotations(false);
        rig.pen.redraw_all(&mut rig.registry, &rig.strokes);
        assert!(rig.registry.get(1).unwrap().static_surface().is_blank());
    }

    #[test]
    fn style_is_read_live_at_commit() {
        let mut rig = Rig::new(DrawingMode::Pen);
        rig.run(&GestureBuilder::pen(1).down(10.0, 10.0).move_to(20.0, 20.0).build());
        rig.settings.set_color("#00ff00");
        rig.settings.set_width(6.0);
        rig.run(&GestureBuilder::pen(1).up().build());
        let stored = &rig.strokes.page_strokes("doc", 1)[0];
        assert_eq!(stored.style.color, "#00ff00");
        assert_eq!(stored.style.width, 6.0);
    }

    #[test]
    fn down_outside_any_page_is_ignored() {
        let mut rig = Rig::new(DrawingMode::Pen);
        let out = rig.run(&GestureBuilder::pen(1).down(10.0, 810.0).build());
        assert_eq!(out, vec![PointerOutcome::Ignored]);
        assert!(!rig.pen.is_drawing());
    }
}
