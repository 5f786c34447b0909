//! Capture session internals: device lifecycle, output streams, the AF/AE
//! state machine and frame routing.

pub mod convert;
pub mod device;
pub mod request;
pub mod router;
pub mod state_machine;
pub mod streams;

pub use device::{DeviceSession, DeviceStatus};
pub use request::{
    AePrecaptureTrigger, AeState, AfMode, AfState, AfTrigger, CaptureRequest, CaptureResult,
    ControlMode, FlashMode, RequestBuilder, RequestId, RequestTemplate, TargetId,
};
pub use router::{FrameRouter, PreviewGate, PreviewListener, RouterStats};
pub use state_machine::{
    CaptureState, CaptureStateMachine, Command, PendingCaptureRequest, AE_MAX_WAIT_FRAMES,
    AF_LOCK_MAX_WAIT_FRAMES,
};
pub use streams::{ImageQueue, OutputTarget, StreamConfiguration};
