//! AF/AE negotiation for a single still capture.
//!
//! The machine is pure: it consumes capture-result samples and returns the
//! [`Command`]s the owner must apply to the device session. It never blocks
//! and never waits on a clock. Convergence is bounded by counting samples,
//! and missing or unknown AF/AE readings mean "proceed".

use crate::session::request::{AePrecaptureTrigger, AeState, AfState, AfTrigger, CaptureResult, FlashMode};
use crate::types::{CameraFacing, CameraFlash};
use bytes::Bytes;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Samples to wait for an AF lock before capturing regardless of focus.
pub const AF_LOCK_MAX_WAIT_FRAMES: u32 = 5;

/// Samples to wait in each AE phase before capturing regardless of exposure.
pub const AE_MAX_WAIT_FRAMES: u32 = 15;

/// AE states that mean the precapture trigger has been taken into account.
pub const AE_PRECAPTURE_ADVANCE_STATES: [AeState; 2] = [AeState::Precapture, AeState::FlashRequired];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CaptureState {
    Preview,
    WaitingAfLock,
    WaitingAePrecapture,
    /// Waiting for AE to leave PRECAPTURE (exposure settled).
    WaitingAeNonPrecapture,
    PictureTaken,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Preview => "preview",
            CaptureState::WaitingAfLock => "waiting-af-lock",
            CaptureState::WaitingAePrecapture => "waiting-ae-precapture",
            CaptureState::WaitingAeNonPrecapture => "waiting-ae-non-precapture",
            CaptureState::PictureTaken => "picture-taken",
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion callback receiving the encoded JPEG.
pub type JpegCallback = Box<dyn FnOnce(Bytes) + Send + 'static>;

/// One outstanding "take a photo" call.
pub struct PendingCaptureRequest {
    pub id: Uuid,
    pub flash: CameraFlash,
    pub af_wait_frames: u32,
    pub ae_wait_frames: u32,
    /// Still frames at or below this sequence predate the request.
    pub stale_until: Option<u64>,
    pub requested_at: Instant,
    on_jpeg: Option<JpegCallback>,
}

impl PendingCaptureRequest {
    pub fn new(flash: CameraFlash, stale_until: Option<u64>, on_jpeg: JpegCallback) -> Self {
        Self {
            id: Uuid::new_v4(),
            flash,
            af_wait_frames: 0,
            ae_wait_frames: 0,
            stale_until,
            requested_at: Instant::now(),
            on_jpeg: Some(on_jpeg),
        }
    }

    pub fn accepts(&self, still_sequence: u64) -> bool {
        self.stale_until.map_or(true, |seq| still_sequence > seq)
    }

    /// Hand the callback out. Only ever succeeds once.
    pub fn take_callback(&mut self) -> Option<JpegCallback> {
        self.on_jpeg.take()
    }
}

impl fmt::Debug for PendingCaptureRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCaptureRequest")
            .field("id", &self.id)
            .field("flash", &self.flash)
            .field("af_wait_frames", &self.af_wait_frames)
            .field("ae_wait_frames", &self.ae_wait_frames)
            .field("stale_until", &self.stale_until)
            .field("has_callback", &self.on_jpeg.is_some())
            .finish()
    }
}

/// What the owner has to do to the device session next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Submit one preview-template request carrying these triggers.
    SubmitTrigger {
        af: Option<AfTrigger>,
        ae_precapture: Option<AePrecaptureTrigger>,
    },
    /// Set the preview builder's flash mode and resubmit it as the repeating request.
    ResumeRepeating { flash: FlashMode },
    /// Submit the still-capture request once `delay` has elapsed.
    CaptureStill { flash: FlashMode, delay: Duration },
    /// Hand a fresh still frame to the pending request, if both exist.
    DeliverStill,
}

#[derive(Debug, Clone)]
pub struct CaptureStateMachine {
    state: CaptureState,
    flash_precharge: Duration,
}

impl CaptureStateMachine {
    pub fn new(flash_precharge: Duration) -> Self {
        Self {
            state: CaptureState::Preview,
            flash_precharge,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == CaptureState::Preview
    }

    /// Back to preview, forgetting any sequence in progress.
    pub fn reset(&mut self) {
        if self.state != CaptureState::Preview {
            log::debug!("Capture sequence abandoned in {}", self.state);
        }
        self.state = CaptureState::Preview;
    }

    fn transition(&mut self, next: CaptureState) {
        if self.state != next {
            log::debug!("Capture state {} -> {}", self.state, next);
            self.state = next;
        }
    }

    /// Start negotiating for `pending`. Back cameras lock focus first; front
    /// cameras are fixed-focus and go straight to the still capture.
    pub fn begin(&mut self, facing: CameraFacing, pending: &mut PendingCaptureRequest) -> Vec<Command> {
        pending.af_wait_frames = 0;
        pending.ae_wait_frames = 0;
        match facing {
            CameraFacing::Back => {
                self.transition(CaptureState::WaitingAfLock);
                vec![Command::SubmitTrigger {
                    af: Some(AfTrigger::Start),
                    ae_precapture: None,
                }]
            }
            CameraFacing::Front => self.capture_still(pending.flash),
        }
    }

    /// Feed one capture-result sample.
    ///
    /// Without a pending request only the preview fast path applies; a
    /// sequence in progress whose request vanished is dropped silently.
    pub fn on_capture_result(
        &mut self,
        result: &CaptureResult,
        pending: Option<&mut PendingCaptureRequest>,
    ) -> Vec<Command> {
        let pending = match (self.state, pending) {
            (CaptureState::Preview, _) => return vec![Command::DeliverStill],
            (CaptureState::PictureTaken, _) => return Vec::new(),
            (_, Some(pending)) => pending,
            (_, None) => {
                self.reset();
                return Vec::new();
            }
        };

        match self.state {
            CaptureState::WaitingAfLock => self.on_af_sample(result.af_state, pending),
            CaptureState::WaitingAePrecapture => self.on_precapture_sample(result.ae_state, pending),
            CaptureState::WaitingAeNonPrecapture => self.on_settle_sample(result.ae_state, pending),
            CaptureState::Preview | CaptureState::PictureTaken => Vec::new(),
        }
    }

    fn on_af_sample(&mut self, af: Option<AfState>, pending: &mut PendingCaptureRequest) -> Vec<Command> {
        match af {
            Some(state) if state.is_locked() => self.run_precapture(pending),
            None | Some(AfState::Inactive) => self.capture_still(pending.flash),
            Some(state) => {
                if pending.af_wait_frames >= AF_LOCK_MAX_WAIT_FRAMES {
                    log::info!(
                        "AF did not lock after {} frames (last {:?}); capturing anyway",
                        pending.af_wait_frames,
                        state
                    );
                    pending.af_wait_frames = 0;
                    self.capture_still(pending.flash)
                } else {
                    pending.af_wait_frames += 1;
                    Vec::new()
                }
            }
        }
    }

    fn run_precapture(&mut self, pending: &mut PendingCaptureRequest) -> Vec<Command> {
        pending.ae_wait_frames = 0;
        self.transition(CaptureState::WaitingAePrecapture);
        let flash = if pending.flash.is_engaged() {
            FlashMode::Torch
        } else {
            FlashMode::Off
        };
        vec![
            Command::SubmitTrigger {
                af: None,
                ae_precapture: Some(AePrecaptureTrigger::Start),
            },
            Command::ResumeRepeating { flash },
        ]
    }

    fn on_precapture_sample(
        &mut self,
        ae: Option<AeState>,
        pending: &mut PendingCaptureRequest,
    ) -> Vec<Command> {
        let advance = match ae {
            None => true,
            Some(state) => AE_PRECAPTURE_ADVANCE_STATES.contains(&state),
        };
        if advance {
            pending.ae_wait_frames = 0;
            self.transition(CaptureState::WaitingAeNonPrecapture);
            // A reported PRECAPTURE or FLASH_REQUIRED means metering has only
            // just started; settle on the next sample.
            if ae.is_none() {
                return self.on_settle_sample(ae, pending);
            }
            return Vec::new();
        }
        self.wait_for_ae(ae, pending)
    }

    fn on_settle_sample(
        &mut self,
        ae: Option<AeState>,
        pending: &mut PendingCaptureRequest,
    ) -> Vec<Command> {
        if ae != Some(AeState::Precapture) {
            return self.capture_still(pending.flash);
        }
        self.wait_for_ae(ae, pending)
    }

    fn wait_for_ae(&mut self, ae: Option<AeState>, pending: &mut PendingCaptureRequest) -> Vec<Command> {
        if pending.ae_wait_frames >= AE_MAX_WAIT_FRAMES {
            log::info!(
                "AE still {:?} after {} frames in {}; capturing anyway",
                ae,
                pending.ae_wait_frames,
                self.state
            );
            pending.ae_wait_frames = 0;
            return self.capture_still(pending.flash);
        }
        pending.ae_wait_frames += 1;
        Vec::new()
    }

    fn capture_still(&mut self, flash: CameraFlash) -> Vec<Command> {
        self.transition(CaptureState::PictureTaken);
        let (flash, delay) = if flash.is_engaged() {
            (FlashMode::Single, self.flash_precharge)
        } else {
            (FlashMode::Off, Duration::ZERO)
        };
        vec![Command::CaptureStill { flash, delay }]
    }

    /// The still request completed: unlock focus, clear the flash and go back
    /// to the plain repeating preview.
    pub fn on_still_capture_completed(&mut self) -> Vec<Command> {
        if self.state != CaptureState::PictureTaken {
            log::debug!("Still completion in {}; ignoring", self.state);
            return Vec::new();
        }
        self.transition(CaptureState::Preview);
        vec![
            Command::SubmitTrigger {
                af: Some(AfTrigger::Cancel),
                ae_precapture: None,
            },
            Command::ResumeRepeating {
                flash: FlashMode::Off,
            },
            Command::DeliverStill,
        ]
    }
}
