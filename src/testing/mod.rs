//! Testing utilities for crabshot
//!
//! A scriptable mock backend, a host that records notifications, synthetic
//! frames and a polling helper for asserting on asynchronous outcomes.

pub mod mock_backend;
pub mod synthetic_data;

pub use mock_backend::{MockBackend, MockCall};
pub use synthetic_data::{encode_test_jpeg, gradient_yuv_frame, jpeg_frame};

use crate::events::CameraEvents;
use crate::types::CameraAttributes;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedEvent {
    Opened(CameraAttributes),
    Closed,
    PreviewStarted,
    PreviewStopped,
}

/// A [`CameraEvents`] host that remembers every notification.
#[derive(Debug, Clone, Default)]
pub struct RecordingEvents {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl RecordingEvents {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: RecordedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, predicate: impl Fn(&RecordedEvent) -> bool) -> usize {
        self.events().iter().filter(|e| predicate(e)).count()
    }

    pub fn opened(&self) -> usize {
        self.count(|e| matches!(e, RecordedEvent::Opened(_)))
    }

    pub fn closed(&self) -> usize {
        self.count(|e| *e == RecordedEvent::Closed)
    }

    pub fn preview_started(&self) -> usize {
        self.count(|e| *e == RecordedEvent::PreviewStarted)
    }

    pub fn preview_stopped(&self) -> usize {
        self.count(|e| *e == RecordedEvent::PreviewStopped)
    }
}

impl CameraEvents for RecordingEvents {
    fn on_camera_opened(&self, attributes: &CameraAttributes) {
        self.push(RecordedEvent::Opened(attributes.clone()));
    }

    fn on_camera_closed(&self) {
        self.push(RecordedEvent::Closed);
    }

    fn on_preview_started(&self) {
        self.push(RecordedEvent::PreviewStarted);
    }

    fn on_preview_stopped(&self) {
        self.push(RecordedEvent::PreviewStopped);
    }
}

/// Poll `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns the final outcome.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}
