//! The capture-session controller.
//!
//! All session state lives in one `Core` behind a single mutex. Public
//! operations lock it directly and return synchronously. Hardware events
//! arrive through a channel and are processed in arrival order by one
//! background thread, which locks the same `Core` per message. Host
//! notifications and JPEG callbacks are collected while the lock is held and
//! dispatched after it is released.

use crate::config::CrabShotConfig;
use crate::errors::{CameraError, ErrorKind};
use crate::events::CameraEvents;
use crate::platform::{CameraBackend, EventSink, HardwareEvent, Mailbox};
use crate::session::device::{DeviceSession, DeviceStatus};
use crate::session::request::{FlashMode, RequestId};
use crate::session::router::{FrameRouter, PreviewGate, PreviewListener, RouterStats};
use crate::session::state_machine::{
    CaptureState, CaptureStateMachine, Command, JpegCallback, PendingCaptureRequest,
};
use crate::types::{CameraAttributes, CameraFacing, CameraFlash, CameraSize, FrameOrigin, SurfaceHandle};
use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use image::RgbImage;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use uuid::Uuid;

enum Notification {
    Opened(CameraAttributes),
    Closed,
    PreviewStarted,
    PreviewStopped,
}

#[derive(Default)]
struct Outbox {
    notifications: Vec<Notification>,
    jpegs: Vec<(JpegCallback, Bytes)>,
}

impl Outbox {
    fn notify(&mut self, notification: Notification) {
        self.notifications.push(notification);
    }
}

struct Core {
    device: DeviceSession,
    machine: CaptureStateMachine,
    router: FrameRouter,
    pending: Option<PendingCaptureRequest>,
    still_request: Option<RequestId>,
    scheduled_still: Option<(Instant, FlashMode)>,
    preview_started: bool,
    flash: CameraFlash,
    photo_size: Option<CameraSize>,
    preview_size: Option<CameraSize>,
    scale_divisor: u32,
    mailbox: Option<Sender<Mailbox>>,
}

impl Core {
    fn open(&mut self, facing: CameraFacing, events: EventSink) -> Result<(), CameraError> {
        let attributes = self.device.open(facing, events)?;
        if !attributes.supports_flash(self.flash) {
            log::info!(
                "Flash {} not supported by the {} camera; using off",
                self.flash,
                facing
            );
            self.flash = CameraFlash::Off;
        }
        Ok(())
    }

    /// Configure streams from the requested sizes, if a photo size is known.
    fn apply_sizes(&mut self) -> Result<(), CameraError> {
        let Some(photo) = self.photo_size else {
            return Ok(());
        };
        let preview = self
            .preview_size
            .unwrap_or_else(|| photo.scaled_down(self.scale_divisor));
        self.device.configure_streams(photo, preview)
    }

    fn check_size_change(&self) -> Result<(), CameraError> {
        if self.device.session_exists() {
            return Err(CameraError::invalid_state(
                "sizes cannot change while preview is running",
            ));
        }
        Ok(())
    }

    /// Forget the in-flight capture. Its callback never fires.
    fn abandon_capture(&mut self) {
        if let Some(pending) = self.pending.take() {
            log::info!("Abandoning capture {}", pending.id);
        }
        self.still_request = None;
        self.scheduled_still = None;
        self.machine.reset();
    }

    fn teardown(&mut self) -> bool {
        self.abandon_capture();
        self.preview_started = false;
        self.mailbox = None;
        self.device.release()
    }

    fn device_lost(&mut self, status: DeviceStatus, outbox: &mut Outbox) {
        if !self.device.is_active() {
            return;
        }
        self.abandon_capture();
        self.preview_started = false;
        self.device.on_lost(status);
        outbox.notify(Notification::Closed);
    }

    fn schedule_still(&mut self, flash: FlashMode, delay: Duration) {
        log::debug!("Still capture scheduled in {:?}", delay);
        self.scheduled_still = Some((Instant::now() + delay, flash));
        if let Some(tx) = &self.mailbox {
            let _ = tx.send(Mailbox::Wake);
        }
    }

    fn submit_still(&mut self, flash: FlashMode) -> Result<(), CameraError> {
        let request = self.device.submit_still(flash)?;
        self.still_request = Some(request.id);
        Ok(())
    }

    fn deliver_still(&mut self, outbox: &mut Outbox) {
        if let Some(delivery) = self
            .router
            .take_still(self.device.streams_mut(), &mut self.pending)
        {
            outbox.jpegs.push(delivery);
        }
    }

    fn apply(&mut self, commands: Vec<Command>, outbox: &mut Outbox) -> Result<(), CameraError> {
        for command in commands {
            match command {
                Command::SubmitTrigger { af, ae_precapture } => {
                    self.device.submit_preview_trigger(af, ae_precapture)?;
                }
                Command::ResumeRepeating { flash } => self.device.resume_repeating(flash)?,
                Command::CaptureStill { flash, delay } if delay.is_zero() => {
                    self.submit_still(flash)?
                }
                Command::CaptureStill { flash, delay } => self.schedule_still(flash, delay),
                Command::DeliverStill => self.deliver_still(outbox),
            }
        }
        Ok(())
    }

    /// Apply commands produced by an event. If the session is gone the
    /// sequence is dropped.
    fn apply_or_abandon(&mut self, commands: Vec<Command>, outbox: &mut Outbox) {
        if let Err(e) = self.apply(commands, outbox) {
            log::info!("Capture sequence dropped: {}", e);
            self.abandon_capture();
        }
    }

    fn fire_due_still(&mut self) {
        let Some((at, flash)) = self.scheduled_still else {
            return;
        };
        if Instant::now() < at {
            return;
        }
        self.scheduled_still = None;
        if self.machine.state() != CaptureState::PictureTaken || self.pending.is_none() {
            return;
        }
        if let Err(e) = self.submit_still(flash) {
            log::info!("Delayed still capture dropped: {}", e);
            self.abandon_capture();
        }
    }

    fn handle_event(&mut self, event: HardwareEvent, outbox: &mut Outbox) {
        match event {
            HardwareEvent::DeviceOpened => {
                if let Some(attributes) = self.device.on_opened() {
                    if let Err(e) = self.apply_sizes() {
                        log::warn!("Could not configure streams: {}", e);
                    }
                    outbox.notify(Notification::Opened(attributes));
                }
            }
            HardwareEvent::DeviceDisconnected => {
                self.device_lost(DeviceStatus::Disconnected, outbox);
            }
            HardwareEvent::DeviceError { code } => {
                log::error!("Camera device error {}", code);
                self.device_lost(DeviceStatus::Failed, outbox);
            }
            HardwareEvent::SessionConfigured => {
                if let Err(e) = self.device.on_session_configured() {
                    log::warn!("Could not start repeating preview: {}", e);
                }
            }
            HardwareEvent::SessionConfigureFailed { reason } => {
                log::error!("Capture session configuration failed: {}", reason);
                self.device_lost(DeviceStatus::Failed, outbox);
            }
            HardwareEvent::CaptureProgressed(result) => {
                if Some(result.request_id) != self.still_request {
                    let commands = self.machine.on_capture_result(&result, self.pending.as_mut());
                    self.apply_or_abandon(commands, outbox);
                }
            }
            HardwareEvent::CaptureCompleted(result) => {
                if Some(result.request_id) == self.still_request {
                    self.still_request = None;
                    let commands = self.machine.on_still_capture_completed();
                    self.apply_or_abandon(commands, outbox);
                    return;
                }
                if !self.preview_started && self.device.session_active() {
                    self.preview_started = true;
                    outbox.notify(Notification::PreviewStarted);
                }
                let commands = self.machine.on_capture_result(&result, self.pending.as_mut());
                self.apply_or_abandon(commands, outbox);
            }
            HardwareEvent::CaptureFailed { request_id, reason } => {
                if Some(request_id) != self.still_request {
                    log::debug!("Capture {} failed: {}", request_id, reason);
                    return;
                }
                log::warn!("Still capture {} failed: {}", request_id, reason);
                self.still_request = None;
                if let Some(pending) = self.pending.take() {
                    log::info!("Abandoning capture {}", pending.id);
                }
                let commands = self.machine.on_still_capture_completed();
                self.apply_or_abandon(commands, outbox);
            }
            HardwareEvent::ImageAvailable(frame) => match frame.origin {
                FrameOrigin::Still => {
                    if let Some(delivery) = self.router.on_still_frame(
                        frame,
                        self.device.streams_mut(),
                        &mut self.pending,
                    ) {
                        outbox.jpegs.push(delivery);
                    }
                }
                FrameOrigin::Preview => {
                    let Some(queue) = self.device.streams_mut().preview_mut() else {
                        return;
                    };
                    queue.push(frame);
                    if !self.router.wants_preview() {
                        return;
                    }
                    if let Some(latest) = queue.acquire_latest() {
                        self.router.on_preview_frame(latest);
                    }
                }
            },
        }
    }
}

struct Shared {
    core: Mutex<Core>,
    gate: PreviewGate,
    events: Arc<dyn CameraEvents>,
}

impl Shared {
    fn lock_core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, outbox: Outbox) {
        for notification in outbox.notifications {
            match notification {
                Notification::Opened(attributes) => self.events.on_camera_opened(&attributes),
                Notification::Closed => self.events.on_camera_closed(),
                Notification::PreviewStarted => self.events.on_preview_started(),
                Notification::PreviewStopped => self.events.on_preview_stopped(),
            }
        }
        for (callback, jpeg) in outbox.jpegs {
            callback(jpeg);
        }
    }
}

fn run_event_loop(shared: Arc<Shared>, rx: Receiver<Mailbox>) {
    log::debug!("Camera event loop started");
    loop {
        let deadline = shared.lock_core().scheduled_still.map(|(at, _)| at);
        let message = match deadline {
            Some(at) => match rx.recv_deadline(at) {
                Ok(message) => Some(message),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(message) => Some(message),
                Err(_) => break,
            },
        };

        let mut outbox = Outbox::default();
        {
            let mut core = shared.lock_core();
            match message {
                Some(Mailbox::Shutdown) => break,
                Some(Mailbox::Hardware(event)) => core.handle_event(event, &mut outbox),
                Some(Mailbox::Wake) | None => {}
            }
            core.fire_due_still();
        }
        shared.dispatch(outbox);
    }
    log::debug!("Camera event loop stopped");
}

struct Worker {
    handle: JoinHandle<()>,
    tx: Sender<Mailbox>,
}

/// Drives one camera device through open, preview and still capture.
///
/// ```no_run
/// use crabshot::{CameraController, CrabShotConfig, LoggingEvents, SimulatedBackend};
/// use crabshot::types::{CameraFacing, CameraSize, SurfaceHandle};
/// use std::sync::Arc;
///
/// let camera = CameraController::new(
///     SimulatedBackend::default(),
///     Arc::new(LoggingEvents),
///     CrabShotConfig::default(),
/// )?;
/// camera.set_photo_size(CameraSize::new(1280, 960))?;
/// camera.open(CameraFacing::Back)?;
/// // once on_camera_opened has fired:
/// camera.start_preview(SurfaceHandle(1))?;
/// camera.capture_photo(|jpeg| println!("{} bytes", jpeg.len()))?;
/// # Ok::<(), crabshot::CameraError>(())
/// ```
pub struct CameraController {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    runtime: Option<tokio::runtime::Runtime>,
    join_timeout: Duration,
}

impl CameraController {
    pub fn new<B>(
        backend: B,
        events: Arc<dyn CameraEvents>,
        config: CrabShotConfig,
    ) -> Result<Self, CameraError>
    where
        B: CameraBackend + 'static,
    {
        config.validate().map_err(CameraError::Config)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.runtime.preview_worker_threads)
            .thread_name("crabshot-preview")
            .enable_time()
            .build()
            .map_err(|e| CameraError::Runtime(format!("Failed to start preview runtime: {}", e)))?;

        let gate = PreviewGate::new();
        let mut router = FrameRouter::new(runtime.handle().clone(), gate.clone(), config.preview_cooldown());
        router.set_rotation(config.camera.preview_orientation);

        let core = Core {
            device: DeviceSession::new(Box::new(backend), config.capture.af_mode),
            machine: CaptureStateMachine::new(config.flash_precharge()),
            router,
            pending: None,
            still_request: None,
            scheduled_still: None,
            preview_started: false,
            flash: config.camera.default_flash,
            photo_size: None,
            preview_size: None,
            scale_divisor: config.preview.scale_divisor,
            mailbox: None,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                gate,
                events,
            }),
            worker: Mutex::new(None),
            runtime: Some(runtime),
            join_timeout: config.join_timeout(),
        })
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_worker(&self) -> Result<Sender<Mailbox>, CameraError> {
        let mut worker = self.lock_worker();
        if let Some(worker) = worker.as_ref() {
            return Ok(worker.tx.clone());
        }
        let (tx, rx) = unbounded();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("crabshot-events".to_string())
            .spawn(move || run_event_loop(shared, rx))
            .map_err(|e| CameraError::Runtime(format!("Failed to start event thread: {}", e)))?;
        self.shared.lock_core().mailbox = Some(tx.clone());
        *worker = Some(Worker {
            handle,
            tx: tx.clone(),
        });
        Ok(tx)
    }

    /// Begin opening the camera facing `facing`. `on_camera_opened` follows
    /// once the hardware confirms.
    pub fn open(&self, facing: CameraFacing) -> Result<(), CameraError> {
        let tx = self.ensure_worker()?;
        self.shared.gate.open();
        let result = self.shared.lock_core().open(facing, EventSink::new(tx));
        if let Err(e) = &result {
            log::warn!("Failed to open {} camera: {}", facing, e);
            if e.kind() == ErrorKind::Device {
                self.shared.events.on_camera_closed();
            }
        }
        result
    }

    /// Tear everything down and stop the event thread. Safe to call at any
    /// time and more than once; an in-flight capture is abandoned.
    pub fn release(&self) {
        let worker = self.lock_worker().take();
        let released = self.shared.lock_core().teardown();
        self.shared.gate.close();

        if let Some(worker) = worker {
            let _ = worker.tx.send(Mailbox::Shutdown);
            if worker.handle.thread().id() == thread::current().id() {
                log::debug!("release called from the event thread; not joining");
            } else {
                self.join_worker(worker.handle);
            }
        }
        if released {
            log::info!("Camera released");
            self.shared.events.on_camera_closed();
        }
    }

    fn join_worker(&self, handle: JoinHandle<()>) {
        let deadline = Instant::now() + self.join_timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "Camera event thread did not stop within {:?}; detaching",
                    self.join_timeout
                );
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if handle.join().is_err() {
            log::error!("Camera event thread panicked");
        }
    }

    /// Clockwise rotation applied to preview images.
    pub fn set_preview_orientation(&self, degrees: u32) -> Result<(), CameraError> {
        if !matches!(degrees, 0 | 90 | 180 | 270) {
            return Err(CameraError::InvalidArgument(format!(
                "preview orientation must be 0, 90, 180 or 270, got {degrees}"
            )));
        }
        self.shared.lock_core().router.set_rotation(degrees);
        Ok(())
    }

    pub fn set_preview_size(&self, size: CameraSize) -> Result<(), CameraError> {
        if size.is_empty() {
            return Err(CameraError::InvalidArgument(format!("preview size {size} is empty")));
        }
        let mut core = self.shared.lock_core();
        if let Some(attributes) = core.device.attributes() {
            if !attributes.supports_preview_size(size) {
                return Err(CameraError::unsupported("preview size", size));
            }
        }
        core.check_size_change()?;
        core.preview_size = Some(size);
        if core.device.is_open() {
            core.apply_sizes()?;
        }
        Ok(())
    }

    pub fn set_photo_size(&self, size: CameraSize) -> Result<(), CameraError> {
        if size.is_empty() {
            return Err(CameraError::InvalidArgument(format!("photo size {size} is empty")));
        }
        let mut core = self.shared.lock_core();
        if let Some(attributes) = core.device.attributes() {
            if !attributes.supports_photo_size(size) {
                return Err(CameraError::unsupported("photo size", size));
            }
        }
        core.check_size_change()?;
        core.photo_size = Some(size);
        if core.device.is_open() {
            core.apply_sizes()?;
        }
        Ok(())
    }

    /// Flash used by the next `capture_photo`.
    pub fn set_flash(&self, flash: CameraFlash) -> Result<(), CameraError> {
        let mut core = self.shared.lock_core();
        if let Some(attributes) = core.device.attributes() {
            if !attributes.supports_flash(flash) {
                return Err(CameraError::unsupported("flash mode", flash));
            }
        }
        core.flash = flash;
        Ok(())
    }

    /// Create the capture session over `surface` and both readers. The
    /// repeating preview starts once the session is configured.
    pub fn start_preview(&self, surface: SurfaceHandle) -> Result<(), CameraError> {
        let mut core = self.shared.lock_core();
        core.device.start_session(surface)?;
        core.preview_started = false;
        Ok(())
    }

    /// Close the capture session, abandoning an in-flight capture. Output
    /// targets are kept so preview can be restarted.
    pub fn stop_preview(&self) -> Result<(), CameraError> {
        let stopped = {
            let mut core = self.shared.lock_core();
            if !core.device.is_open() {
                return Err(CameraError::NotOpen);
            }
            core.abandon_capture();
            core.preview_started = false;
            core.device.stop_session()
        };
        if stopped {
            self.shared.events.on_preview_stopped();
        }
        Ok(())
    }

    /// Take one photo. `on_jpeg` receives the encoded JPEG exactly once,
    /// unless the capture is abandoned by `stop_preview`, `release` or a
    /// device error, in which case it is never called.
    pub fn capture_photo<F>(&self, on_jpeg: F) -> Result<Uuid, CameraError>
    where
        F: FnOnce(Bytes) + Send + 'static,
    {
        let mut outbox = Outbox::default();
        let result = {
            let mut core = self.shared.lock_core();
            Self::begin_capture(&mut core, Box::new(on_jpeg), &mut outbox)
        };
        self.shared.dispatch(outbox);
        result
    }

    fn begin_capture(
        core: &mut Core,
        on_jpeg: JpegCallback,
        outbox: &mut Outbox,
    ) -> Result<Uuid, CameraError> {
        if !core.device.is_open() {
            return Err(CameraError::NotOpen);
        }
        if !core.device.streams().has_still_target() {
            return Err(CameraError::NoStillTarget);
        }
        if !core.device.session_active() {
            return Err(CameraError::PreviewNotRunning);
        }
        if core.pending.is_some() || !core.machine.is_idle() {
            return Err(CameraError::CaptureInProgress);
        }

        let facing = core.device.facing().unwrap_or(CameraFacing::Back);
        let stale_until = core.device.streams().last_still_sequence();
        let mut pending = PendingCaptureRequest::new(core.flash, stale_until, on_jpeg);
        let id = pending.id;
        log::info!("Capture {} requested (flash {})", id, pending.flash);

        let commands = core.machine.begin(facing, &mut pending);
        core.pending = Some(pending);
        if let Err(e) = core.apply(commands, outbox) {
            core.abandon_capture();
            return Err(e);
        }
        Ok(id)
    }

    /// Install the preview listener. It is called from a preview worker
    /// thread with the latest converted frame, at most once per cool-down.
    /// No controller lock is held while it runs, so it may query or drive
    /// the controller.
    pub fn set_preview_listener<F>(&self, listener: F)
    where
        F: Fn(RgbImage) + Send + Sync + 'static,
    {
        let listener: PreviewListener = Arc::new(listener);
        self.shared.gate.set_listener(Some(listener));
    }

    pub fn clear_preview_listener(&self) {
        self.shared.gate.set_listener(None);
    }

    pub fn capture_state(&self) -> CaptureState {
        self.shared.lock_core().machine.state()
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock_core().device.is_open()
    }

    pub fn device_status(&self) -> DeviceStatus {
        self.shared.lock_core().device.status()
    }

    pub fn is_preview_running(&self) -> bool {
        self.shared.lock_core().device.session_active()
    }

    pub fn has_pending_capture(&self) -> bool {
        self.shared.lock_core().pending.is_some()
    }

    pub fn attributes(&self) -> Option<CameraAttributes> {
        self.shared.lock_core().device.attributes().cloned()
    }

    pub fn flash(&self) -> CameraFlash {
        self.shared.lock_core().flash
    }

    pub fn preview_orientation(&self) -> u32 {
        self.shared.lock_core().router.rotation()
    }

    pub fn photo_size(&self) -> Option<CameraSize> {
        self.shared.lock_core().device.streams().photo_size()
    }

    pub fn preview_size(&self) -> Option<CameraSize> {
        self.shared.lock_core().device.streams().preview_size()
    }

    pub fn frame_stats(&self) -> RouterStats {
        self.shared.lock_core().router.stats()
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.release();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
