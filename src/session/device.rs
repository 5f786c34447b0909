//! Device handle lifecycle and request submission.

use crate::errors::CameraError;
use crate::platform::{CameraBackend, EventSink};
use crate::session::request::{
    AePrecaptureTrigger, AfMode, AfTrigger, CaptureRequest, ControlMode, FlashMode,
    RequestBuilder, RequestId, RequestTemplate, TargetId,
};
use crate::session::streams::StreamConfiguration;
use crate::types::{CameraAttributes, CameraFacing, CameraSize, SurfaceHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    Closed,
    Opening,
    Opened,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Configuring,
    Active,
}

/// Everything bound to the opened device, released as a unit.
#[derive(Debug, Default)]
pub struct SessionResources {
    pub streams: StreamConfiguration,
    session: Option<SessionPhase>,
    surface: Option<SurfaceHandle>,
    preview_builder: Option<RequestBuilder>,
    repeating: Option<CaptureRequest>,
}

impl SessionResources {
    fn clear_session(&mut self) {
        self.session = None;
        self.surface = None;
        self.preview_builder = None;
        self.repeating = None;
    }
}

pub struct DeviceSession {
    backend: Box<dyn CameraBackend>,
    status: DeviceStatus,
    facing: Option<CameraFacing>,
    attributes: Option<CameraAttributes>,
    resources: SessionResources,
    af_mode: AfMode,
    next_request_id: RequestId,
}

impl DeviceSession {
    pub fn new(backend: Box<dyn CameraBackend>, af_mode: AfMode) -> Self {
        Self {
            backend,
            status: DeviceStatus::Closed,
            facing: None,
            attributes: None,
            resources: SessionResources::default(),
            af_mode,
            next_request_id: 1,
        }
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == DeviceStatus::Opened
    }

    /// Whether a device handle is held or being acquired.
    pub fn is_active(&self) -> bool {
        matches!(self.status, DeviceStatus::Opening | DeviceStatus::Opened)
    }

    pub fn facing(&self) -> Option<CameraFacing> {
        self.facing
    }

    pub fn attributes(&self) -> Option<&CameraAttributes> {
        self.attributes.as_ref()
    }

    pub fn streams(&self) -> &StreamConfiguration {
        &self.resources.streams
    }

    pub fn streams_mut(&mut self) -> &mut StreamConfiguration {
        &mut self.resources.streams
    }

    pub fn session_exists(&self) -> bool {
        self.resources.session.is_some()
    }

    pub fn session_active(&self) -> bool {
        self.resources.session == Some(SessionPhase::Active)
    }

    pub fn repeating_request(&self) -> Option<&CaptureRequest> {
        self.resources.repeating.as_ref()
    }

    pub fn open(
        &mut self,
        facing: CameraFacing,
        events: EventSink,
    ) -> Result<CameraAttributes, CameraError> {
        if self.is_active() {
            return Err(CameraError::AlreadyOpen);
        }
        log::info!("Opening {} camera", facing);
        let attributes = self.backend.open_device(facing, events)?;
        self.status = DeviceStatus::Opening;
        self.facing = Some(facing);
        self.attributes = Some(attributes.clone());
        Ok(attributes)
    }

    /// The platform confirmed the device is ready. Returns the attributes the
    /// host should be notified with, or `None` if the event was unexpected.
    pub fn on_opened(&mut self) -> Option<CameraAttributes> {
        if self.status != DeviceStatus::Opening {
            log::debug!("Ignoring device-opened event in status {:?}", self.status);
            return None;
        }
        self.status = DeviceStatus::Opened;
        log::info!("Camera opened");
        self.attributes.clone()
    }

    /// The device went away (disconnect or fatal error). Everything bound to
    /// it is released; the session is inert until reopened.
    pub fn on_lost(&mut self, status: DeviceStatus) {
        if !self.is_active() {
            return;
        }
        log::warn!("Camera lost ({:?}); releasing session", status);
        self.resources.clear_session();
        self.backend.close_device();
        self.resources.streams.release();
        self.status = status;
        self.attributes = None;
    }

    pub fn build_request(&self, template: RequestTemplate) -> Result<RequestBuilder, CameraError> {
        if !self.is_open() {
            return Err(CameraError::NotOpen);
        }
        let mut builder = RequestBuilder::new(template);
        builder
            .set_af_mode(Some(self.af_mode))
            .set_control_mode(Some(ControlMode::Auto));
        Ok(builder)
    }

    pub fn configure_streams(
        &mut self,
        photo_size: CameraSize,
        preview_size: CameraSize,
    ) -> Result<(), CameraError> {
        let device_open = self.is_open();
        let session_active = self.session_exists();
        self.resources
            .streams
            .configure(photo_size, preview_size, device_open, session_active)
    }

    /// Create the capture session over the display surface plus both readers.
    pub fn start_session(&mut self, surface: SurfaceHandle) -> Result<(), CameraError> {
        if !self.is_open() {
            return Err(CameraError::NotOpen);
        }
        if !self.resources.streams.has_still_target() {
            return Err(CameraError::NoStillTarget);
        }
        if self.session_exists() {
            return Err(CameraError::invalid_state("preview is already running"));
        }

        let mut builder = self.build_request(RequestTemplate::Preview)?;
        builder
            .add_target(TargetId::PreviewReader)
            .add_target(TargetId::Display(surface));

        let outputs = self.resources.streams.targets();
        self.backend.create_session(&outputs)?;
        self.resources.session = Some(SessionPhase::Configuring);
        self.resources.surface = Some(surface);
        self.resources.preview_builder = Some(builder);
        log::debug!("Capture session requested for surface {:?}", surface);
        Ok(())
    }

    /// The platform finished configuring the session: start the repeating
    /// preview request.
    pub fn on_session_configured(&mut self) -> Result<(), CameraError> {
        if self.resources.session != Some(SessionPhase::Configuring) {
            log::debug!("Ignoring session-configured event");
            return Ok(());
        }
        self.resources.session = Some(SessionPhase::Active);
        self.resume_repeating(FlashMode::Off)
    }

    fn next_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn ensure_session(&self) -> Result<(), CameraError> {
        if !self.is_open() {
            return Err(CameraError::NotOpen);
        }
        if !self.session_active() {
            return Err(CameraError::PreviewNotRunning);
        }
        Ok(())
    }

    pub fn submit_capture(&mut self, builder: &RequestBuilder) -> Result<CaptureRequest, CameraError> {
        self.ensure_session()?;
        let request = builder.build(self.next_id());
        self.backend.capture(&request)?;
        Ok(request)
    }

    /// Submit one preview-template request carrying the given triggers. The
    /// triggers are one-shot: the stored builder is left without them.
    pub fn submit_preview_trigger(
        &mut self,
        af_trigger: Option<AfTrigger>,
        ae_trigger: Option<AePrecaptureTrigger>,
    ) -> Result<CaptureRequest, CameraError> {
        self.ensure_session()?;
        let mut builder = self
            .resources
            .preview_builder
            .clone()
            .ok_or(CameraError::PreviewNotRunning)?;
        builder
            .set_af_trigger(af_trigger)
            .set_ae_precapture_trigger(ae_trigger);
        self.submit_capture(&builder)
    }

    /// Update the preview builder's flash mode and resubmit it as the
    /// repeating request.
    pub fn resume_repeating(&mut self, flash: FlashMode) -> Result<(), CameraError> {
        self.ensure_session()?;
        let id = self.next_id();
        let builder = self
            .resources
            .preview_builder
            .as_mut()
            .ok_or(CameraError::PreviewNotRunning)?;
        builder.set_flash_mode(Some(flash));
        let request = builder.build(id);
        self.backend.set_repeating_request(&request)?;
        log::debug!("Repeating request {} (flash {:?})", request.id, flash);
        self.resources.repeating = Some(request);
        Ok(())
    }

    pub fn submit_still(&mut self, flash: FlashMode) -> Result<CaptureRequest, CameraError> {
        let mut builder = self.build_request(RequestTemplate::StillCapture)?;
        builder
            .add_target(TargetId::StillReader)
            .set_flash_mode(Some(flash));
        let request = self.submit_capture(&builder)?;
        log::info!("Still capture {} submitted (flash {:?})", request.id, flash);
        Ok(request)
    }

    /// Stop the repeating request and close the capture session. Output
    /// targets survive so preview can be restarted.
    pub fn stop_session(&mut self) -> bool {
        if !self.session_exists() {
            return false;
        }
        if let Err(e) = self.backend.stop_repeating() {
            log::warn!("Failed to stop repeating request: {}", e);
        }
        if let Err(e) = self.backend.abort_captures() {
            log::warn!("Failed to abort captures: {}", e);
        }
        self.backend.close_session();
        self.resources.clear_session();
        log::info!("Capture session closed");
        true
    }

    /// Full teardown. Returns whether anything was actually released.
    pub fn release(&mut self) -> bool {
        let had_device = self.is_active();
        self.stop_session();
        if had_device {
            self.backend.close_device();
        }
        self.resources.streams.release();
        self.status = DeviceStatus::Closed;
        self.facing = None;
        self.attributes = None;
        had_device
    }
}
