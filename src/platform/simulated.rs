//! Software camera.
//!
//! A ticker thread plays the role of the sensor: every frame interval it
//! executes the next queued one-shot request (or the repeating request),
//! advances simple AF/AE models according to the triggers it carries, and
//! reports a capture result plus images for the targets the request names.

use crate::errors::CameraError;
use crate::platform::{CameraBackend, EventSink, HardwareEvent};
use crate::session::request::{
    AePrecaptureTrigger, AeState, AfState, AfTrigger, CaptureRequest, CaptureResult, TargetId,
};
use crate::session::streams::OutputTarget;
use crate::testing::synthetic_data::{encode_test_jpeg, gradient_yuv_frame};
use crate::types::{CameraAttributes, CameraFacing, CameraFlash, CameraSize, FrameBuffer};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A simulated device profile.
#[derive(Debug, Clone)]
pub struct SimulatedCamera {
    pub attributes: CameraAttributes,
    pub frame_interval: Duration,
    /// Frames between AF-trigger START and a focus lock. `None` means a
    /// fixed-focus lens that never reports AF state.
    pub af_scan_frames: Option<u32>,
    /// Frames AE stays in PRECAPTURE after the trigger.
    pub ae_precapture_frames: u32,
    pub jpeg_quality: u8,
}

impl SimulatedCamera {
    pub fn back() -> Self {
        Self {
            attributes: CameraAttributes {
                facing: CameraFacing::Back,
                sensor_orientation: 90,
                preview_sizes: vec![
                    CameraSize::new(960, 540),
                    CameraSize::new(640, 480),
                    CameraSize::new(320, 240),
                ],
                photo_sizes: vec![
                    CameraSize::new(1920, 1080),
                    CameraSize::new(1280, 960),
                    CameraSize::new(640, 480),
                ],
                flashes: vec![CameraFlash::Off, CameraFlash::On, CameraFlash::Auto, CameraFlash::Torch],
            },
            frame_interval: Duration::from_millis(33),
            af_scan_frames: Some(3),
            ae_precapture_frames: 2,
            jpeg_quality: 85,
        }
    }

    pub fn front() -> Self {
        Self {
            attributes: CameraAttributes {
                facing: CameraFacing::Front,
                sensor_orientation: 270,
                preview_sizes: vec![CameraSize::new(640, 480), CameraSize::new(320, 240)],
                photo_sizes: vec![CameraSize::new(1280, 960), CameraSize::new(640, 480)],
                flashes: vec![CameraFlash::Off],
            },
            frame_interval: Duration::from_millis(33),
            af_scan_frames: None,
            ae_precapture_frames: 1,
            jpeg_quality: 85,
        }
    }

    pub fn profile(facing: CameraFacing) -> Self {
        match facing {
            CameraFacing::Back => Self::back(),
            CameraFacing::Front => Self::front(),
        }
    }
}

#[derive(Debug, Default)]
struct AfModel {
    state: Option<AfState>,
    frames_left: u32,
}

#[derive(Debug, Default)]
struct AeModel {
    state: Option<AeState>,
    frames_left: u32,
}

#[derive(Default)]
struct SimState {
    camera: Option<SimulatedCamera>,
    sink: Option<EventSink>,
    outputs: Vec<OutputTarget>,
    repeating: Option<CaptureRequest>,
    queued: VecDeque<CaptureRequest>,
    frame_number: u64,
    af: AfModel,
    ae: AeModel,
}

impl SimState {
    fn output_size(&self, id: TargetId) -> Option<CameraSize> {
        self.outputs.iter().find(|t| t.id == id).map(|t| t.size)
    }

    fn apply_triggers(&mut self, camera: &SimulatedCamera, request: &CaptureRequest) {
        match request.af_trigger {
            Some(AfTrigger::Start) => {
                if let Some(frames) = camera.af_scan_frames {
                    self.af.state = Some(AfState::ActiveScan);
                    self.af.frames_left = frames;
                }
            }
            Some(AfTrigger::Cancel) if camera.af_scan_frames.is_some() => {
                self.af.state = Some(AfState::Inactive);
            }
            _ => {}
        }
        if request.ae_precapture_trigger == Some(AePrecaptureTrigger::Start) {
            self.ae.state = Some(AeState::Precapture);
            self.ae.frames_left = camera.ae_precapture_frames;
        }
    }

    fn advance_models(&mut self) {
        if self.af.state == Some(AfState::ActiveScan) {
            if self.af.frames_left == 0 {
                self.af.state = Some(AfState::FocusedLocked);
            } else {
                self.af.frames_left -= 1;
            }
        }
        match self.ae.state {
            Some(AeState::Precapture) if self.ae.frames_left == 0 => {
                self.ae.state = Some(AeState::Converged);
            }
            Some(AeState::Precapture) => self.ae.frames_left -= 1,
            Some(AeState::Searching) => self.ae.state = Some(AeState::Converged),
            _ => {}
        }
    }

    /// Run one sensor frame.
    fn tick(&mut self) {
        let (Some(camera), Some(sink)) = (self.camera.clone(), self.sink.clone()) else {
            return;
        };
        let request = match self.queued.pop_front().or_else(|| self.repeating.clone()) {
            Some(request) => request,
            None => return,
        };

        self.frame_number += 1;
        let frame_number = self.frame_number;
        self.apply_triggers(&camera, &request);
        self.advance_models();

        if request.targets.contains(&TargetId::PreviewReader) {
            if let Some(size) = self.output_size(TargetId::PreviewReader) {
                sink.emit(HardwareEvent::ImageAvailable(gradient_yuv_frame(frame_number, size)));
            }
        }
        if request.targets_still() {
            if let Some(size) = self.output_size(TargetId::StillReader) {
                match encode_test_jpeg(size, frame_number, camera.jpeg_quality) {
                    Ok(jpeg) => {
                        sink.emit(HardwareEvent::ImageAvailable(FrameBuffer::jpeg(
                            frame_number,
                            size,
                            jpeg,
                        )));
                    }
                    Err(e) => {
                        sink.emit(HardwareEvent::CaptureFailed {
                            request_id: request.id,
                            reason: format!("JPEG encoding failed: {}", e),
                        });
                        return;
                    }
                }
            }
        }

        let result = CaptureResult {
            af_state: self.af.state,
            ae_state: self.ae.state,
            ..CaptureResult::new(request.id, frame_number)
        };
        sink.emit(HardwareEvent::CaptureCompleted(result));
    }
}

/// A [`CameraBackend`] backed by [`SimulatedCamera`] profiles.
pub struct SimulatedBackend {
    cameras: Vec<SimulatedCamera>,
    state: Arc<Mutex<SimState>>,
    running: Arc<AtomicBool>,
    ticker: Option<JoinHandle<()>>,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(vec![SimulatedCamera::back(), SimulatedCamera::front()])
    }
}

impl SimulatedBackend {
    pub fn new(cameras: Vec<SimulatedCamera>) -> Self {
        Self {
            cameras,
            state: Arc::new(Mutex::new(SimState::default())),
            running: Arc::new(AtomicBool::new(false)),
            ticker: None,
        }
    }

    pub fn cameras(&self) -> &[SimulatedCamera] {
        &self.cameras
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        lock_state(&self.state)
    }

    fn start_ticker(&mut self, interval: Duration) -> Result<(), CameraError> {
        if self.ticker.is_some() {
            return Ok(());
        }
        self.running.store(true, Ordering::Release);
        let state = Arc::clone(&self.state);
        let running = Arc::clone(&self.running);
        let handle = thread::Builder::new()
            .name("crabshot-sim-sensor".to_string())
            .spawn(move || {
                while running.load(Ordering::Acquire) {
                    lock_state(&state).tick();
                    thread::sleep(interval);
                }
            })
            .map_err(|e| CameraError::device(format!("Failed to start simulated sensor: {}", e)))?;
        self.ticker = Some(handle);
        Ok(())
    }

    fn stop_ticker(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.ticker.take() {
            if handle.join().is_err() {
                log::error!("Simulated sensor thread panicked");
            }
        }
    }
}

fn lock_state(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CameraBackend for SimulatedBackend {
    fn open_device(
        &mut self,
        facing: CameraFacing,
        events: EventSink,
    ) -> Result<CameraAttributes, CameraError> {
        let camera = self
            .cameras
            .iter()
            .find(|c| c.attributes.facing == facing)
            .cloned()
            .ok_or(CameraError::DeviceNotFound(facing))?;
        let attributes = camera.attributes.clone();
        let interval = camera.frame_interval;
        {
            let mut state = self.lock();
            *state = SimState::default();
            state.af.state = camera.af_scan_frames.map(|_| AfState::Inactive);
            state.ae.state = Some(AeState::Searching);
            state.camera = Some(camera);
            state.sink = Some(events.clone());
        }
        self.start_ticker(interval)?;
        log::info!("Simulated {} camera opened", facing);
        events.emit(HardwareEvent::DeviceOpened);
        Ok(attributes)
    }

    fn create_session(&mut self, outputs: &[OutputTarget]) -> Result<(), CameraError> {
        let mut state = self.lock();
        let sink = state
            .sink
            .clone()
            .ok_or_else(|| CameraError::device("simulated camera is not open"))?;
        state.outputs = outputs.to_vec();
        sink.emit(HardwareEvent::SessionConfigured);
        Ok(())
    }

    fn capture(&mut self, request: &CaptureRequest) -> Result<(), CameraError> {
        self.lock().queued.push_back(request.clone());
        Ok(())
    }

    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), CameraError> {
        self.lock().repeating = Some(request.clone());
        Ok(())
    }

    fn stop_repeating(&mut self) -> Result<(), CameraError> {
        self.lock().repeating = None;
        Ok(())
    }

    fn abort_captures(&mut self) -> Result<(), CameraError> {
        self.lock().queued.clear();
        Ok(())
    }

    fn close_session(&mut self) {
        let mut state = self.lock();
        state.outputs.clear();
        state.repeating = None;
        state.queued.clear();
    }

    fn close_device(&mut self) {
        self.stop_ticker();
        let mut state = self.lock();
        state.sink = None;
        state.camera = None;
        log::info!("Simulated camera closed");
    }
}

impl Drop for SimulatedBackend {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}
