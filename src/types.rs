//! Shared value types: device attributes, sizes, flash modes and frame buffers.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which way the camera points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    Back,
    Front,
}

impl CameraFacing {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraFacing::Back => "back",
            CameraFacing::Front => "front",
        }
    }
}

impl fmt::Display for CameraFacing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraFacing {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "back" | "rear" => Ok(CameraFacing::Back),
            "front" | "user" => Ok(CameraFacing::Front),
            other => Err(format!("unknown camera facing: {other}")),
        }
    }
}

/// Host-facing flash setting.
///
/// Only `On` engages the flash during a capture sequence; `Auto` and `Torch`
/// are advertised when the hardware supports them but are captured with the
/// flash off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraFlash {
    #[default]
    Off,
    On,
    Auto,
    Torch,
}

impl CameraFlash {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraFlash::Off => "off",
            CameraFlash::On => "on",
            CameraFlash::Auto => "auto",
            CameraFlash::Torch => "torch",
        }
    }

    pub fn is_engaged(&self) -> bool {
        matches!(self, CameraFlash::On)
    }
}

impl fmt::Display for CameraFlash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraFlash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(CameraFlash::Off),
            "on" => Ok(CameraFlash::On),
            "auto" => Ok(CameraFlash::Auto),
            "torch" => Ok(CameraFlash::Torch),
            other => Err(format!("unknown flash mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraSize {
    pub width: u32,
    pub height: u32,
}

impl CameraSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Divide both dimensions, never going below 1x1.
    pub fn scaled_down(&self, divisor: u32) -> Self {
        let divisor = divisor.max(1);
        Self {
            width: (self.width / divisor).max(1),
            height: (self.height / divisor).max(1),
        }
    }
}

impl fmt::Display for CameraSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for CameraSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s}"))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| format!("invalid width in {s}"))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| format!("invalid height in {s}"))?;
        Ok(Self { width, height })
    }
}

/// Read-only hardware capabilities, queried once at open time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraAttributes {
    pub facing: CameraFacing,
    /// Clockwise rotation of the sensor relative to the device, in degrees.
    pub sensor_orientation: u32,
    pub preview_sizes: Vec<CameraSize>,
    pub photo_sizes: Vec<CameraSize>,
    pub flashes: Vec<CameraFlash>,
}

impl CameraAttributes {
    pub fn supports_flash(&self, flash: CameraFlash) -> bool {
        flash == CameraFlash::Off || self.flashes.contains(&flash)
    }

    /// An empty size list means the device did not advertise any, which is
    /// treated as "anything goes".
    pub fn supports_photo_size(&self, size: CameraSize) -> bool {
        self.photo_sizes.is_empty() || self.photo_sizes.contains(&size)
    }

    pub fn supports_preview_size(&self, size: CameraSize) -> bool {
        self.preview_sizes.is_empty() || self.preview_sizes.contains(&size)
    }

    pub fn largest_photo_size(&self) -> Option<CameraSize> {
        self.photo_sizes.iter().copied().max_by_key(CameraSize::area)
    }
}

/// Opaque handle to the host's display surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceHandle(pub u64);

/// Which output target produced a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameOrigin {
    Preview,
    Still,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Three-plane YUV 4:2:0 with per-plane row and pixel strides.
    Yuv420,
    Jpeg,
}

impl PixelFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PixelFormat::Yuv420 => "yuv420",
            PixelFormat::Jpeg => "jpeg",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePlane {
    pub data: Bytes,
    pub row_stride: usize,
    pub pixel_stride: usize,
}

impl ImagePlane {
    pub fn new(data: impl Into<Bytes>, row_stride: usize, pixel_stride: usize) -> Self {
        Self {
            data: data.into(),
            row_stride,
            pixel_stride,
        }
    }

    /// A single packed plane, as used for encoded payloads.
    pub fn packed(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let len = data.len();
        Self {
            data,
            row_stride: len,
            pixel_stride: 1,
        }
    }
}

/// An immutable frame as delivered by one of the output targets.
///
/// `sequence` is the hardware frame number; it only ever grows and is used to
/// drop frames older than the last one handed out.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub origin: FrameOrigin,
    pub sequence: u64,
    pub size: CameraSize,
    pub format: PixelFormat,
    pub planes: Vec<ImagePlane>,
    pub received_at: DateTime<Utc>,
}

impl FrameBuffer {
    pub fn new(
        origin: FrameOrigin,
        sequence: u64,
        size: CameraSize,
        format: PixelFormat,
        planes: Vec<ImagePlane>,
    ) -> Self {
        Self {
            origin,
            sequence,
            size,
            format,
            planes,
            received_at: Utc::now(),
        }
    }

    /// A still frame carrying an encoded JPEG payload.
    pub fn jpeg(sequence: u64, size: CameraSize, payload: impl Into<Bytes>) -> Self {
        Self::new(
            FrameOrigin::Still,
            sequence,
            size,
            PixelFormat::Jpeg,
            vec![ImagePlane::packed(payload)],
        )
    }

    pub fn byte_len(&self) -> usize {
        self.planes.iter().map(|p| p.data.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_parse_and_display() {
        let size: CameraSize = "1920x1080".parse().unwrap();
        assert_eq!(size, CameraSize::new(1920, 1080));
        assert_eq!(size.to_string(), "1920x1080");
        assert!("1920".parse::<CameraSize>().is_err());
        assert!("ax1".parse::<CameraSize>().is_err());
    }

    #[test]
    fn test_size_scaled_down() {
        let size = CameraSize::new(1920, 1080);
        assert_eq!(size.scaled_down(2), CameraSize::new(960, 540));
        assert_eq!(size.scaled_down(0), size);
        assert_eq!(CameraSize::new(1, 1).scaled_down(4), CameraSize::new(1, 1));
    }

    #[test]
    fn test_attributes_flash_support() {
        let attrs = CameraAttributes {
            facing: CameraFacing::Back,
            sensor_orientation: 90,
            preview_sizes: vec![],
            photo_sizes: vec![CameraSize::new(640, 480), CameraSize::new(1920, 1080)],
            flashes: vec![CameraFlash::On],
        };
        assert!(attrs.supports_flash(CameraFlash::Off));
        assert!(attrs.supports_flash(CameraFlash::On));
        assert!(!attrs.supports_flash(CameraFlash::Torch));
        assert!(attrs.supports_preview_size(CameraSize::new(10, 10)));
        assert!(!attrs.supports_photo_size(CameraSize::new(10, 10)));
        assert_eq!(attrs.largest_photo_size(), Some(CameraSize::new(1920, 1080)));
    }

    #[test]
    fn test_flash_and_facing_parse() {
        assert_eq!("ON".parse::<CameraFlash>().unwrap(), CameraFlash::On);
        assert_eq!("rear".parse::<CameraFacing>().unwrap(), CameraFacing::Back);
        assert!("sideways".parse::<CameraFacing>().is_err());
        assert!(CameraFlash::On.is_engaged());
        assert!(!CameraFlash::Torch.is_engaged());
    }
}
