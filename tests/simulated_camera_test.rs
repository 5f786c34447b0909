//! Full round trips through the software camera: real frames, real JPEGs.

use bytes::Bytes;
use crabshot::testing::{wait_for, RecordingEvents};
use crabshot::types::{CameraFacing, CameraFlash, CameraSize, SurfaceHandle};
use crabshot::{CameraController, CaptureState, CrabShotConfig, SimulatedBackend, SimulatedCamera};
use crossbeam_channel::unbounded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn start(facing: CameraFacing, photo: CameraSize) -> (CameraController, RecordingEvents) {
    let events = RecordingEvents::new();
    let camera = CameraController::new(
        SimulatedBackend::default(),
        Arc::new(events.clone()),
        CrabShotConfig::default(),
    )
    .unwrap();
    camera.set_photo_size(photo).unwrap();
    camera.open(facing).unwrap();
    assert!(wait_for(WAIT, || events.opened() == 1));
    camera.start_preview(SurfaceHandle(3)).unwrap();
    assert!(wait_for(WAIT, || events.preview_started() == 1));
    (camera, events)
}

fn take_photo(camera: &CameraController) -> Bytes {
    let (tx, rx) = unbounded();
    camera
        .capture_photo(move |jpeg| {
            let _ = tx.send(jpeg);
        })
        .unwrap();
    rx.recv_timeout(WAIT).expect("no JPEG delivered")
}

fn assert_jpeg(bytes: &[u8], size: CameraSize) {
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    let decoded = image::load_from_memory(bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (size.width, size.height));
}

#[test]
fn test_back_camera_photo() {
    let size = CameraSize::new(640, 480);
    let (camera, _events) = start(CameraFacing::Back, size);
    let jpeg = take_photo(&camera);
    assert_jpeg(&jpeg, size);
    assert!(wait_for(WAIT, || camera.capture_state() == CaptureState::Preview));
    assert_eq!(camera.frame_stats().stills_delivered, 1);
}

#[test]
fn test_back_camera_photo_with_flash() {
    let size = CameraSize::new(640, 480);
    let (camera, _events) = start(CameraFacing::Back, size);
    camera.set_flash(CameraFlash::On).unwrap();
    let jpeg = take_photo(&camera);
    assert_jpeg(&jpeg, size);
}

#[test]
fn test_front_camera_photo() {
    let size = CameraSize::new(640, 480);
    let (camera, _events) = start(CameraFacing::Front, size);
    assert_eq!(camera.attributes().unwrap().facing, CameraFacing::Front);
    let jpeg = take_photo(&camera);
    assert_jpeg(&jpeg, size);
}

#[test]
fn test_consecutive_photos_are_distinct() {
    let size = CameraSize::new(640, 480);
    let (camera, _events) = start(CameraFacing::Back, size);
    let first = take_photo(&camera);
    assert!(wait_for(WAIT, || camera.capture_state() == CaptureState::Preview));
    let second = take_photo(&camera);
    assert_ne!(first, second);
}

#[test]
fn test_preview_frames_reach_listener() {
    let (camera, _events) = start(CameraFacing::Back, CameraSize::new(640, 480));
    let frames = Arc::new(AtomicUsize::new(0));
    let wrong_size = Arc::new(AtomicUsize::new(0));
    let (counter, mismatches) = (Arc::clone(&frames), Arc::clone(&wrong_size));
    camera.set_preview_listener(move |image| {
        // Preview is half the photo size; no rotation by default.
        if (image.width(), image.height()) != (320, 240) {
            mismatches.fetch_add(1, Ordering::SeqCst);
        }
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(wait_for(WAIT, || frames.load(Ordering::SeqCst) >= 2));
    camera.clear_preview_listener();
    assert_eq!(wrong_size.load(Ordering::SeqCst), 0);
}

#[test]
fn test_missing_camera_fails_open() {
    let events = RecordingEvents::new();
    let camera = CameraController::new(
        SimulatedBackend::new(vec![SimulatedCamera::back()]),
        Arc::new(events.clone()),
        CrabShotConfig::default(),
    )
    .unwrap();
    assert!(camera.open(CameraFacing::Front).is_err());
    assert_eq!(events.closed(), 1);
    assert!(!camera.is_open());
}

#[test]
fn test_release_and_reopen() {
    let size = CameraSize::new(640, 480);
    let (camera, events) = start(CameraFacing::Back, size);
    camera.release();
    assert_eq!(events.closed(), 1);

    camera.open(CameraFacing::Front).unwrap();
    assert!(wait_for(WAIT, || events.opened() == 2));
    camera.start_preview(SurfaceHandle(3)).unwrap();
    assert!(wait_for(WAIT, || events.preview_started() == 2));
    assert_jpeg(&take_photo(&camera), size);
}
