//! Platform boundary.
//!
//! A [`CameraBackend`] wraps whatever hardware API the host platform offers.
//! Synchronous calls return immediately; everything the hardware reports later
//! (device opened, session configured, capture results, images) is pushed as a
//! typed [`HardwareEvent`] through the [`EventSink`] handed over at open time.
//! The controller processes those events one at a time on its background
//! thread, so backends may emit from any thread.

pub mod simulated;

pub use simulated::{SimulatedBackend, SimulatedCamera};

use crate::errors::CameraError;
use crate::session::request::{CaptureRequest, CaptureResult, RequestId};
use crate::session::streams::OutputTarget;
use crate::types::{CameraAttributes, CameraFacing, FrameBuffer};
use crossbeam_channel::Sender;

#[derive(Debug, Clone)]
pub enum HardwareEvent {
    DeviceOpened,
    DeviceDisconnected,
    DeviceError { code: i32 },
    SessionConfigured,
    SessionConfigureFailed { reason: String },
    CaptureProgressed(CaptureResult),
    CaptureCompleted(CaptureResult),
    CaptureFailed { request_id: RequestId, reason: String },
    ImageAvailable(FrameBuffer),
}

/// Messages consumed by the controller's background thread.
#[derive(Debug)]
pub(crate) enum Mailbox {
    Hardware(HardwareEvent),
    /// Re-evaluate timers (a delayed still capture was scheduled).
    Wake,
    Shutdown,
}

/// Cloneable handle a backend uses to report asynchronous hardware events.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Sender<Mailbox>,
}

impl EventSink {
    pub(crate) fn new(tx: Sender<Mailbox>) -> Self {
        Self { tx }
    }

    /// Returns `false` once the controller has shut its background thread
    /// down; late events are simply discarded.
    pub fn emit(&self, event: HardwareEvent) -> bool {
        self.tx.send(Mailbox::Hardware(event)).is_ok()
    }
}

pub trait CameraBackend: Send {
    /// Look up the device for `facing`, query its capabilities and begin
    /// opening it. Completion is reported as [`HardwareEvent::DeviceOpened`].
    fn open_device(
        &mut self,
        facing: CameraFacing,
        events: EventSink,
    ) -> Result<CameraAttributes, CameraError>;

    /// Create a capture session over `outputs`. Completion is reported as
    /// [`HardwareEvent::SessionConfigured`] or
    /// [`HardwareEvent::SessionConfigureFailed`].
    fn create_session(&mut self, outputs: &[OutputTarget]) -> Result<(), CameraError>;

    fn capture(&mut self, request: &CaptureRequest) -> Result<(), CameraError>;

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), CameraError>;

    fn stop_repeating(&mut self) -> Result<(), CameraError>;

    fn abort_captures(&mut self) -> Result<(), CameraError>;

    fn close_session(&mut self);

    fn close_device(&mut self);
}
