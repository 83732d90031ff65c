use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::geometry::Point;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerKind {
    Mouse,
    Pen,
    Touch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    Leave,
    Cancel,
}

impl PointerPhase {
    /// Up, leave and cancel all end a gesture.
    #[must_use]
    pub fn is_release(self) -> bool {
        matches!(self, Self::Up | Self::Leave | Self::Cancel)
    }
}

/// A pointer event in viewport coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub pointer_id: i32,
    pub kind: PointerKind,
    pub phase: PointerPhase,
    pub client: Point,
}

impl PointerEvent {
    #[must_use]
    pub fn new(pointer_id: i32, kind: PointerKind, phase: PointerPhase, x: f64, y: f64) -> Self {
        Self {
            pointer_id,
            kind,
            phase,
            client: Point::new(x, y),
        }
    }
}

/// Trait for abstracting pointer event sources to enable testing
pub trait PointerEventSource {
    /// Poll for events with a timeout
    fn poll(&mut self, timeout: Duration) -> Result<bool>;

    /// Read the next event
    fn read(&mut self) -> Result<PointerEvent>;
}

/// Scripted event source for tests and replays
pub struct SimulatedPointerSource {
    events: VecDeque<PointerEvent>,
}

impl SimulatedPointerSource {
    pub fn new(events: Vec<PointerEvent>) -> Self {
        Self {
            events: events.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

impl PointerEventSource for SimulatedPointerSource {
    fn poll(&mut self, _timeout: Duration) -> Result<bool> {
        Ok(!self.events.is_empty())
    }

    fn read(&mut self) -> Result<PointerEvent> {
        match self.events.pop_front() {
            Some(event) => Ok(event),
            None => bail!("simulated pointer source exhausted"),
        }
    }
}
