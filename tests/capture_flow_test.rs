//! End-to-end capture sequences against the scriptable mock backend.

use bytes::Bytes;
use crabshot::session::{AeState, AfState, AfTrigger, CaptureState, FlashMode};
use crabshot::testing::{wait_for, MockBackend, RecordingEvents};
use crabshot::types::{CameraFacing, CameraFlash, CameraSize, SurfaceHandle};
use crabshot::{CameraController, CameraError, CrabShotConfig};
use crossbeam_channel::{unbounded, Receiver};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(2);

struct Rig {
    camera: CameraController,
    mock: MockBackend,
    events: RecordingEvents,
}

impl Rig {
    fn new() -> Self {
        let mock = MockBackend::new();
        let events = RecordingEvents::new();
        let camera =
            CameraController::new(mock.clone(), Arc::new(events.clone()), CrabShotConfig::default())
                .unwrap();
        Self {
            camera,
            mock,
            events,
        }
    }

    fn open_and_preview(&self) {
        let opened_before = self.events.opened();
        self.camera.open(CameraFacing::Back).unwrap();
        assert!(wait_for(WAIT, || self.events.opened() > opened_before));
        self.camera.start_preview(SurfaceHandle(42)).unwrap();
        assert!(wait_for(WAIT, || self.camera.is_preview_running()));
    }

    fn capture(&self) -> Receiver<Bytes> {
        let (tx, rx) = unbounded();
        self.camera
            .capture_photo(move |jpeg| {
                let _ = tx.send(jpeg);
            })
            .unwrap();
        rx
    }

    fn wait_state(&self, state: CaptureState) {
        assert!(
            wait_for(WAIT, || self.camera.capture_state() == state),
            "expected {}, stuck in {}",
            state,
            self.camera.capture_state()
        );
    }

    /// Give the event thread time to process anything already emitted.
    fn settle(&self) {
        std::thread::sleep(Duration::from_millis(30));
    }
}

#[test]
fn test_flash_off_still_after_two_events() {
    let rig = Rig::new();
    rig.camera.set_photo_size(CameraSize::new(1920, 1080)).unwrap();
    rig.open_and_preview();

    let jpeg = rig.capture();
    assert_eq!(rig.camera.capture_state(), CaptureState::WaitingAfLock);

    rig.mock.preview_result(Some(AfState::FocusedLocked), None);
    rig.wait_state(CaptureState::WaitingAePrecapture);
    rig.settle();
    assert!(rig.mock.still_captures().is_empty());

    rig.mock.preview_result(None, None);
    assert!(wait_for(WAIT, || rig.mock.still_captures().len() == 1));
    assert_eq!(rig.camera.capture_state(), CaptureState::PictureTaken);
    let still = rig.mock.still_captures().remove(0);
    assert_eq!(still.flash_mode, Some(FlashMode::Off));

    rig.mock.complete_still(b"\xFF\xD8injected-jpeg");
    let bytes = jpeg.recv_timeout(WAIT).unwrap();
    assert_eq!(bytes.as_ref(), b"\xFF\xD8injected-jpeg");
    rig.wait_state(CaptureState::Preview);
    assert!(!rig.camera.has_pending_capture());

    let cancelled = rig
        .mock
        .captures()
        .iter()
        .any(|r| r.af_trigger == Some(AfTrigger::Cancel));
    assert!(cancelled);
}

#[test]
fn test_flash_on_honors_precharge_delay() {
    let rig = Rig::new();
    rig.camera.set_photo_size(CameraSize::new(1920, 1080)).unwrap();
    rig.open_and_preview();
    rig.camera.set_flash(CameraFlash::On).unwrap();

    let jpeg = rig.capture();
    rig.mock.preview_result(Some(AfState::FocusedLocked), Some(AeState::Converged));
    rig.wait_state(CaptureState::WaitingAePrecapture);
    assert!(wait_for(WAIT, || {
        rig.mock.repeating_requests().last().and_then(|r| r.flash_mode) == Some(FlashMode::Torch)
    }));

    rig.mock.preview_result(None, Some(AeState::Precapture));
    rig.mock.preview_result(None, Some(AeState::Precapture));
    rig.wait_state(CaptureState::WaitingAeNonPrecapture);

    let converged_at = Instant::now();
    rig.mock.preview_result(None, Some(AeState::Converged));
    assert!(wait_for(WAIT, || rig.mock.still_submitted_at().is_some()));
    let submitted_at = rig.mock.still_submitted_at().unwrap();
    assert!(submitted_at.duration_since(converged_at) >= Duration::from_millis(75));

    let still = rig.mock.still_captures().remove(0);
    assert_eq!(still.flash_mode, Some(FlashMode::Single));

    rig.mock.complete_still(b"\xFF\xD8flash-jpeg");
    assert_eq!(jpeg.recv_timeout(WAIT).unwrap().as_ref(), b"\xFF\xD8flash-jpeg");
    rig.wait_state(CaptureState::Preview);
    assert!(wait_for(WAIT, || {
        rig.mock.repeating_requests().last().and_then(|r| r.flash_mode) == Some(FlashMode::Off)
    }));
}

#[test]
fn test_second_capture_rejected_while_pending() {
    let rig = Rig::new();
    rig.camera.set_photo_size(CameraSize::new(640, 480)).unwrap();
    rig.open_and_preview();

    let first = rig.capture();
    let second_calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&second_calls);
    let err = rig
        .camera
        .capture_photo(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap_err();
    assert_eq!(err, CameraError::CaptureInProgress);
    assert!(err.is_usage_error());

    // The first request is untouched and still completes.
    assert_eq!(rig.camera.capture_state(), CaptureState::WaitingAfLock);
    rig.mock.preview_result(Some(AfState::NotFocusedLocked), None);
    rig.mock.preview_result(None, None);
    assert!(wait_for(WAIT, || rig.mock.still_captures().len() == 1));
    rig.mock.complete_still(b"\xFF\xD8first");
    assert_eq!(first.recv_timeout(WAIT).unwrap().as_ref(), b"\xFF\xD8first");
    rig.settle();
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_release_mid_precapture_then_fresh_session() {
    let rig = Rig::new();
    rig.camera.set_photo_size(CameraSize::new(640, 480)).unwrap();
    rig.open_and_preview();

    let abandoned = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&abandoned);
    rig.camera
        .capture_photo(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    rig.mock.preview_result(Some(AfState::FocusedLocked), None);
    rig.wait_state(CaptureState::WaitingAePrecapture);

    rig.camera.release();
    assert!(!rig.camera.is_open());
    assert!(!rig.camera.has_pending_capture());
    assert_eq!(rig.camera.capture_state(), CaptureState::Preview);
    assert_eq!(rig.events.closed(), 1);
    assert!(!rig.mock.complete_still(b"late"));

    rig.open_and_preview();
    let jpeg = rig.capture();
    rig.mock.preview_result(Some(AfState::FocusedLocked), None);
    rig.mock.preview_result(None, None);
    assert!(wait_for(WAIT, || rig.mock.still_captures().len() == 1));
    rig.mock.complete_still(b"\xFF\xD8second-session");
    assert_eq!(jpeg.recv_timeout(WAIT).unwrap().as_ref(), b"\xFF\xD8second-session");
    rig.settle();
    assert_eq!(abandoned.load(Ordering::SeqCst), 0);
}

#[test]
fn test_focus_that_never_locks_still_captures() {
    let rig = Rig::new();
    rig.camera.set_photo_size(CameraSize::new(640, 480)).unwrap();
    rig.open_and_preview();

    let _jpeg = rig.capture();
    for _ in 0..5 {
        rig.mock.preview_result(Some(AfState::ActiveScan), None);
    }
    rig.settle();
    assert!(rig.mock.still_captures().is_empty());
    assert_eq!(rig.camera.capture_state(), CaptureState::WaitingAfLock);

    rig.mock.preview_result(Some(AfState::ActiveScan), None);
    assert!(wait_for(WAIT, || rig.mock.still_captures().len() == 1));
}

#[test]
fn test_stop_preview_abandons_capture() {
    let rig = Rig::new();
    rig.camera.set_photo_size(CameraSize::new(640, 480)).unwrap();
    rig.open_and_preview();

    let jpeg = rig.capture();
    rig.camera.stop_preview().unwrap();
    assert!(!rig.camera.has_pending_capture());
    assert_eq!(rig.events.preview_stopped(), 1);
    assert!(jpeg.recv_timeout(Duration::from_millis(50)).is_err());

    // Preview restarts over the kept targets.
    rig.camera.start_preview(SurfaceHandle(42)).unwrap();
    assert!(wait_for(WAIT, || rig.camera.is_preview_running()));
}

#[test]
fn test_sizes_locked_while_previewing() {
    let rig = Rig::new();
    rig.camera.set_photo_size(CameraSize::new(640, 480)).unwrap();
    rig.open_and_preview();
    assert!(matches!(
        rig.camera.set_photo_size(CameraSize::new(1280, 960)),
        Err(CameraError::InvalidState(_))
    ));
    assert!(matches!(
        rig.camera.set_photo_size(CameraSize::new(123, 45)),
        Err(CameraError::Unsupported { .. })
    ));
}
