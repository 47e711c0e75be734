//! Simulated digital lines and the shared hardware timeline

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::Peripheral;
use crate::hal::{InputLine, OutputLine};

/// One observable hardware action, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HwEvent {
    /// A named line changed level
    Line { name: &'static str, high: bool },
    /// Full bus restart
    Begin,
    Apply(Peripheral),
    Write(Peripheral, usize),
    Transfer(Peripheral, usize),
}

/// Ordered record of hardware actions shared by all simulated devices
#[derive(Debug, Clone, Default)]
pub struct Timeline(Arc<Mutex<Vec<HwEvent>>>);

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: HwEvent) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<HwEvent> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    /// Index of the first event matching `pred`
    pub fn position(&self, pred: impl Fn(&HwEvent) -> bool) -> Option<usize> {
        self.0.lock().iter().position(pred)
    }
}

/// A simulated line usable as input or output
#[derive(Debug, Clone)]
pub struct SimLine {
    level: Arc<AtomicBool>,
    name: &'static str,
    timeline: Option<Timeline>,
}

impl SimLine {
    pub fn new(high: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(high)),
            name: "line",
            timeline: None,
        }
    }

    /// A line whose edges are recorded on `timeline`
    pub fn named(name: &'static str, high: bool, timeline: Timeline) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(high)),
            name,
            timeline: Some(timeline),
        }
    }

    pub fn set(&self, high: bool) {
        self.level.store(high, Ordering::SeqCst);
        if let Some(timeline) = &self.timeline {
            timeline.record(HwEvent::Line {
                name: self.name,
                high,
            });
        }
    }
}

impl InputLine for SimLine {
    fn is_high(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

impl OutputLine for SimLine {
    fn set_high(&mut self) {
        self.set(true);
    }

    fn set_low(&mut self) {
        self.set(false);
    }
}
