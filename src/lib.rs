//! crabshot: still-photo capture over a live preview stream
//!
//! This crate drives a single camera device through autofocus lock,
//! auto-exposure precapture and flash pre-charge to take one well-exposed
//! still photo while the preview keeps running.
//!
//! # Features
//! - Bounded, non-blocking AF/AE negotiation
//! - Throttled RGB preview delivery with drop-if-busy back-pressure
//! - Platform boundary as a trait, with a simulated software camera
//! - TOML configuration with environment overrides
//!
//! # Usage
//! ```rust,no_run
//! use crabshot::{CameraController, CrabShotConfig, LoggingEvents, SimulatedBackend};
//! use crabshot::types::{CameraFacing, CameraSize};
//! use std::sync::Arc;
//!
//! crabshot::init_logging();
//! let camera = CameraController::new(
//!     SimulatedBackend::default(),
//!     Arc::new(LoggingEvents),
//!     CrabShotConfig::load_or_default(),
//! )?;
//! camera.set_photo_size(CameraSize::new(1280, 960))?;
//! camera.open(CameraFacing::Back)?;
//! # Ok::<(), crabshot::CameraError>(())
//! ```
pub mod config;
pub mod controller;
pub mod errors;
pub mod events;
pub mod platform;
pub mod session;
pub mod types;

// Testing utilities - mock backend and synthetic frames for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::CrabShotConfig;
pub use controller::CameraController;
pub use errors::{CameraError, ErrorKind, FrameError};
pub use events::{CameraEvents, LoggingEvents, NoopEvents};
pub use platform::{CameraBackend, EventSink, HardwareEvent, SimulatedBackend, SimulatedCamera};
pub use session::{CaptureState, RouterStats};
pub use types::{CameraAttributes, CameraFacing, CameraFlash, CameraSize, FrameBuffer, SurfaceHandle};

/// Initialize logging for the camera system
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabshot=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "crabshot");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
    }
}
