//! Capture request descriptors and the result metadata the hardware reports.
//!
//! Raw AF/AE values follow the vendor numbering. Anything outside the known
//! range decodes to `None`, which the state machine treats as "unknown".

use crate::types::SurfaceHandle;
use serde::{Deserialize, Serialize};

pub type RequestId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestTemplate {
    Preview,
    StillCapture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AfMode {
    Off,
    Auto,
    #[default]
    Macro,
    ContinuousPicture,
    ContinuousVideo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlMode {
    Off,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AfTrigger {
    Idle,
    Start,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AePrecaptureTrigger {
    Idle,
    Start,
    Cancel,
}

/// Flash mode as written into a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlashMode {
    Off,
    Single,
    Torch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AfState {
    Inactive,
    PassiveScan,
    PassiveFocused,
    ActiveScan,
    FocusedLocked,
    NotFocusedLocked,
    PassiveUnfocused,
}

impl AfState {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(AfState::Inactive),
            1 => Some(AfState::PassiveScan),
            2 => Some(AfState::PassiveFocused),
            3 => Some(AfState::ActiveScan),
            4 => Some(AfState::FocusedLocked),
            5 => Some(AfState::NotFocusedLocked),
            6 => Some(AfState::PassiveUnfocused),
            other => {
                log::debug!("Unrecognized AF state value {}", other);
                None
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        matches!(self, AfState::FocusedLocked | AfState::NotFocusedLocked)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AeState {
    Inactive,
    Searching,
    Converged,
    Locked,
    FlashRequired,
    Precapture,
}

impl AeState {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(AeState::Inactive),
            1 => Some(AeState::Searching),
            2 => Some(AeState::Converged),
            3 => Some(AeState::Locked),
            4 => Some(AeState::FlashRequired),
            5 => Some(AeState::Precapture),
            other => {
                log::debug!("Unrecognized AE state value {}", other);
                None
            }
        }
    }
}

/// Where a request's output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetId {
    /// The host's display surface.
    Display(SurfaceHandle),
    /// The YUV reader feeding the preview listener.
    PreviewReader,
    /// The JPEG reader feeding the still-capture callback.
    StillReader,
}

/// A submitted, immutable request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    pub id: RequestId,
    pub template: RequestTemplate,
    pub targets: Vec<TargetId>,
    pub af_mode: Option<AfMode>,
    pub control_mode: Option<ControlMode>,
    pub af_trigger: Option<AfTrigger>,
    pub ae_precapture_trigger: Option<AePrecaptureTrigger>,
    pub flash_mode: Option<FlashMode>,
}

impl CaptureRequest {
    pub fn targets_still(&self) -> bool {
        self.targets.contains(&TargetId::StillReader)
    }
}

/// Mutable request descriptor. Fields left unset keep the device default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBuilder {
    template: RequestTemplate,
    targets: Vec<TargetId>,
    af_mode: Option<AfMode>,
    control_mode: Option<ControlMode>,
    af_trigger: Option<AfTrigger>,
    ae_precapture_trigger: Option<AePrecaptureTrigger>,
    flash_mode: Option<FlashMode>,
}

impl RequestBuilder {
    pub fn new(template: RequestTemplate) -> Self {
        Self {
            template,
            targets: Vec::new(),
            af_mode: None,
            control_mode: None,
            af_trigger: None,
            ae_precapture_trigger: None,
            flash_mode: None,
        }
    }

    pub fn template(&self) -> RequestTemplate {
        self.template
    }

    pub fn add_target(&mut self, target: TargetId) -> &mut Self {
        if !self.targets.contains(&target) {
            self.targets.push(target);
        }
        self
    }

    pub fn set_af_mode(&mut self, mode: Option<AfMode>) -> &mut Self {
        self.af_mode = mode;
        self
    }

    pub fn set_control_mode(&mut self, mode: Option<ControlMode>) -> &mut Self {
        self.control_mode = mode;
        self
    }

    pub fn set_af_trigger(&mut self, trigger: Option<AfTrigger>) -> &mut Self {
        self.af_trigger = trigger;
        self
    }

    pub fn set_ae_precapture_trigger(&mut self, trigger: Option<AePrecaptureTrigger>) -> &mut Self {
        self.ae_precapture_trigger = trigger;
        self
    }

    pub fn set_flash_mode(&mut self, mode: Option<FlashMode>) -> &mut Self {
        self.flash_mode = mode;
        self
    }

    pub fn flash_mode(&self) -> Option<FlashMode> {
        self.flash_mode
    }

    pub fn build(&self, id: RequestId) -> CaptureRequest {
        CaptureRequest {
            id,
            template: self.template,
            targets: self.targets.clone(),
            af_mode: self.af_mode,
            control_mode: self.control_mode,
            af_trigger: self.af_trigger,
            ae_precapture_trigger: self.ae_precapture_trigger,
            flash_mode: self.flash_mode,
        }
    }
}

/// One capture-result sample, partial or final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    pub request_id: RequestId,
    pub frame_number: u64,
    pub partial: bool,
    pub af_state: Option<AfState>,
    pub ae_state: Option<AeState>,
}

impl CaptureResult {
    pub fn new(request_id: RequestId, frame_number: u64) -> Self {
        Self {
            request_id,
            frame_number,
            partial: false,
            af_state: None,
            ae_state: None,
        }
    }

    /// Decode raw vendor values as reported by the platform layer.
    pub fn from_raw(
        request_id: RequestId,
        frame_number: u64,
        partial: bool,
        af_raw: Option<i32>,
        ae_raw: Option<i32>,
    ) -> Self {
        Self {
            request_id,
            frame_number,
            partial,
            af_state: af_raw.and_then(AfState::from_raw),
            ae_state: ae_raw.and_then(AeState::from_raw),
        }
    }

    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }

    pub fn with_af(mut self, state: AfState) -> Self {
        self.af_state = Some(state);
        self
    }

    pub fn with_ae(mut self, state: AeState) -> Self {
        self.ae_state = Some(state);
        self
    }
}
