//! Host notifications.

use crate::types::CameraAttributes;

/// Outbound notifications from the controller.
///
/// Called from the controller's event thread (or from the calling thread for
/// `release`/`stop_preview`), never while an internal lock is held, so
/// implementations may call back into the controller.
pub trait CameraEvents: Send + Sync {
    fn on_camera_opened(&self, _attributes: &CameraAttributes) {}

    fn on_camera_closed(&self) {}

    fn on_preview_started(&self) {}

    fn on_preview_stopped(&self) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEvents;

impl CameraEvents for NoopEvents {}

/// Logs every notification at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingEvents;

impl CameraEvents for LoggingEvents {
    fn on_camera_opened(&self, attributes: &CameraAttributes) {
        log::info!(
            "Camera opened: {} facing, sensor at {} degrees, {} photo sizes",
            attributes.facing,
            attributes.sensor_orientation,
            attributes.photo_sizes.len()
        );
    }

    fn on_camera_closed(&self) {
        log::info!("Camera closed");
    }

    fn on_preview_started(&self) {
        log::info!("Preview started");
    }

    fn on_preview_stopped(&self) {
        log::info!("Preview stopped");
    }
}
