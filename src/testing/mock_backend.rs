//! Scriptable in-memory backend.
//!
//! Records every call and lets a test inject hardware events through the
//! sink the controller handed over at open time. By default the device
//! opens and sessions configure immediately; both can be switched to manual.

use crate::errors::CameraError;
use crate::platform::{CameraBackend, EventSink, HardwareEvent, SimulatedCamera};
use crate::session::request::{AeState, AfState, CaptureRequest, CaptureResult, RequestTemplate};
use crate::session::streams::OutputTarget;
use crate::types::{CameraAttributes, CameraFacing, CameraSize, FrameBuffer};
use crate::testing::synthetic_data::gradient_yuv_frame;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    OpenDevice(CameraFacing),
    CreateSession(Vec<OutputTarget>),
    Capture(CaptureRequest),
    SetRepeating(CaptureRequest),
    StopRepeating,
    AbortCaptures,
    CloseSession,
    CloseDevice,
}

struct MockState {
    calls: Vec<(Instant, MockCall)>,
    sink: Option<EventSink>,
    auto_open: bool,
    auto_configure: bool,
    fail_next_open: Option<CameraError>,
    missing: Vec<CameraFacing>,
    attributes: Option<CameraAttributes>,
    frame_number: u64,
}

#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                calls: Vec::new(),
                sink: None,
                auto_open: true,
                auto_configure: true,
                fail_next_open: None,
                missing: Vec::new(),
                attributes: None,
                frame_number: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Report these attributes instead of the simulated profile.
    pub fn with_attributes(self, attributes: CameraAttributes) -> Self {
        self.lock().attributes = Some(attributes);
        self
    }

    pub fn without_camera(self, facing: CameraFacing) -> Self {
        self.lock().missing.push(facing);
        self
    }

    pub fn set_auto_open(&self, enabled: bool) {
        self.lock().auto_open = enabled;
    }

    pub fn set_auto_configure(&self, enabled: bool) {
        self.lock().auto_configure = enabled;
    }

    pub fn fail_next_open(&self, error: CameraError) {
        self.lock().fail_next_open = Some(error);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn timed_calls(&self) -> Vec<(Instant, MockCall)> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// One-shot requests, in submission order.
    pub fn captures(&self) -> Vec<CaptureRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|(_, c)| match c {
                MockCall::Capture(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn still_captures(&self) -> Vec<CaptureRequest> {
        self.captures()
            .into_iter()
            .filter(|r| r.template == RequestTemplate::StillCapture)
            .collect()
    }

    pub fn repeating_requests(&self) -> Vec<CaptureRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|(_, c)| match c {
                MockCall::SetRepeating(r) => Some(r.clone()),
                _ => None,
            })
            .collect()
    }

    /// When the last still request was submitted.
    pub fn still_submitted_at(&self) -> Option<Instant> {
        self.lock()
            .calls
            .iter()
            .rev()
            .find_map(|(at, c)| match c {
                MockCall::Capture(r) if r.template == RequestTemplate::StillCapture => Some(*at),
                _ => None,
            })
    }

    /// Push a raw hardware event. Returns `false` without an open sink.
    pub fn emit(&self, event: HardwareEvent) -> bool {
        let sink = self.lock().sink.clone();
        sink.map_or(false, |sink| sink.emit(event))
    }

    fn next_frame(&self) -> u64 {
        let mut state = self.lock();
        state.frame_number += 1;
        state.frame_number
    }

    fn current_repeating_id(&self) -> u64 {
        self.repeating_requests().last().map_or(0, |r| r.id)
    }

    /// A completed preview result with the given AF/AE readings.
    pub fn preview_result(&self, af: Option<AfState>, ae: Option<AeState>) -> bool {
        let result = CaptureResult {
            af_state: af,
            ae_state: ae,
            ..CaptureResult::new(self.current_repeating_id(), self.next_frame())
        };
        self.emit(HardwareEvent::CaptureCompleted(result))
    }

    /// Deliver `payload` as the JPEG for the last still request, then report
    /// that request complete.
    pub fn complete_still(&self, payload: &[u8]) -> bool {
        let Some(still) = self.still_captures().pop() else {
            return false;
        };
        let sequence = self.next_frame();
        self.emit(HardwareEvent::ImageAvailable(FrameBuffer::jpeg(
            sequence,
            CameraSize::new(4, 4),
            payload.to_vec(),
        ))) && self.emit(HardwareEvent::CaptureCompleted(CaptureResult::new(
            still.id, sequence,
        )))
    }

    pub fn fail_still(&self, reason: &str) -> bool {
        let Some(still) = self.still_captures().pop() else {
            return false;
        };
        self.emit(HardwareEvent::CaptureFailed {
            request_id: still.id,
            reason: reason.to_string(),
        })
    }

    pub fn preview_frame(&self, size: CameraSize) -> bool {
        let frame = gradient_yuv_frame(self.next_frame(), size);
        self.emit(HardwareEvent::ImageAvailable(frame))
    }

    pub fn disconnect(&self) -> bool {
        self.emit(HardwareEvent::DeviceDisconnected)
    }

    fn record(&self, call: MockCall) {
        self.lock().calls.push((Instant::now(), call));
    }
}

impl CameraBackend for MockBackend {
    fn open_device(
        &mut self,
        facing: CameraFacing,
        events: EventSink,
    ) -> Result<CameraAttributes, CameraError> {
        self.record(MockCall::OpenDevice(facing));
        let (auto_open, attributes) = {
            let mut state = self.lock();
            if let Some(error) = state.fail_next_open.take() {
                return Err(error);
            }
            if state.missing.contains(&facing) {
                return Err(CameraError::DeviceNotFound(facing));
            }
            state.sink = Some(events.clone());
            let attributes = state
                .attributes
                .clone()
                .unwrap_or_else(|| SimulatedCamera::profile(facing).attributes);
            (state.auto_open, attributes)
        };
        if auto_open {
            events.emit(HardwareEvent::DeviceOpened);
        }
        Ok(attributes)
    }

    fn create_session(&mut self, outputs: &[OutputTarget]) -> Result<(), CameraError> {
        self.record(MockCall::CreateSession(outputs.to_vec()));
        if self.lock().auto_configure {
            self.emit(HardwareEvent::SessionConfigured);
        }
        Ok(())
    }

    fn capture(&mut self, request: &CaptureRequest) -> Result<(), CameraError> {
        self.record(MockCall::Capture(request.clone()));
        Ok(())
    }

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), CameraError> {
        self.record(MockCall::SetRepeating(request.clone()));
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<(), CameraError> {
        self.record(MockCall::StopRepeating);
        Ok(())
    }

    fn abort_captures(&mut self) -> Result<(), CameraError> {
        self.record(MockCall::AbortCaptures);
        Ok(())
    }

    fn close_session(&mut self) {
        self.record(MockCall::CloseSession);
    }

    fn close_device(&mut self) {
        self.record(MockCall::CloseDevice);
        self.lock().sink = None;
    }
}
