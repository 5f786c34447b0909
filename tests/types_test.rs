//! Tests for crabshot value types
//!
//! Parsing, capability checks and serialization of the shared types.

use crabshot::types::{
    CameraAttributes, CameraFacing, CameraFlash, CameraSize, FrameBuffer, FrameOrigin, PixelFormat,
};

#[cfg(test)]
mod facing_tests {
    use super::*;

    #[test]
    fn test_facing_parse() {
        assert_eq!("back".parse::<CameraFacing>().unwrap(), CameraFacing::Back);
        assert_eq!("Front".parse::<CameraFacing>().unwrap(), CameraFacing::Front);
        assert_eq!("rear".parse::<CameraFacing>().unwrap(), CameraFacing::Back);
        assert!("sideways".parse::<CameraFacing>().is_err());
    }

    #[test]
    fn test_facing_serialization() {
        let json = serde_json::to_string(&CameraFacing::Front).unwrap();
        assert_eq!(json, "\"front\"");
        let back: CameraFacing = serde_json::from_str("\"back\"").unwrap();
        assert_eq!(back, CameraFacing::Back);
    }
}

#[cfg(test)]
mod flash_tests {
    use super::*;

    #[test]
    fn test_only_on_engages_flash() {
        assert!(CameraFlash::On.is_engaged());
        assert!(!CameraFlash::Off.is_engaged());
        assert!(!CameraFlash::Auto.is_engaged());
        assert!(!CameraFlash::Torch.is_engaged());
    }

    #[test]
    fn test_flash_default_is_off() {
        assert_eq!(CameraFlash::default(), CameraFlash::Off);
    }

    #[test]
    fn test_flash_parse_and_display() {
        for flash in [CameraFlash::Off, CameraFlash::On, CameraFlash::Auto, CameraFlash::Torch] {
            assert_eq!(flash.to_string().parse::<CameraFlash>().unwrap(), flash);
        }
        assert!("strobe".parse::<CameraFlash>().is_err());
    }
}

#[cfg(test)]
mod size_tests {
    use super::*;

    #[test]
    fn test_size_area_and_empty() {
        assert_eq!(CameraSize::new(1920, 1080).area(), 2_073_600);
        assert!(CameraSize::new(0, 480).is_empty());
        assert!(!CameraSize::new(1, 1).is_empty());
    }

    #[test]
    fn test_size_parse_with_whitespace() {
        let size: CameraSize = " 1280 x 960 ".trim().parse().unwrap();
        assert_eq!(size, CameraSize::new(1280, 960));
        assert!("1280X960".parse::<CameraSize>().is_ok());
    }
}

#[cfg(test)]
mod attributes_tests {
    use super::*;

    fn attributes() -> CameraAttributes {
        CameraAttributes {
            facing: CameraFacing::Back,
            sensor_orientation: 90,
            preview_sizes: vec![CameraSize::new(960, 540)],
            photo_sizes: vec![CameraSize::new(640, 480), CameraSize::new(1920, 1080)],
            flashes: vec![CameraFlash::Off, CameraFlash::On],
        }
    }

    #[test]
    fn test_flash_support() {
        let attrs = attributes();
        assert!(attrs.supports_flash(CameraFlash::On));
        assert!(!attrs.supports_flash(CameraFlash::Torch));

        let no_flash = CameraAttributes {
            flashes: Vec::new(),
            ..attributes()
        };
        // Off is always available.
        assert!(no_flash.supports_flash(CameraFlash::Off));
    }

    #[test]
    fn test_size_support() {
        let attrs = attributes();
        assert!(attrs.supports_photo_size(CameraSize::new(640, 480)));
        assert!(!attrs.supports_photo_size(CameraSize::new(800, 600)));
        assert!(attrs.supports_preview_size(CameraSize::new(960, 540)));
        assert_eq!(attrs.largest_photo_size(), Some(CameraSize::new(1920, 1080)));
    }

    #[test]
    fn test_unadvertised_sizes_accept_anything() {
        let attrs = CameraAttributes {
            photo_sizes: Vec::new(),
            preview_sizes: Vec::new(),
            ..attributes()
        };
        assert!(attrs.supports_photo_size(CameraSize::new(123, 45)));
        assert!(attrs.supports_preview_size(CameraSize::new(123, 45)));
        assert_eq!(attrs.largest_photo_size(), None);
    }

    #[test]
    fn test_attributes_serialization() {
        let attrs = attributes();
        let json = serde_json::to_string(&attrs).unwrap();
        assert!(json.contains("\"sensor_orientation\":90"));
        let back: CameraAttributes = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attrs);
    }
}

#[cfg(test)]
mod frame_tests {
    use super::*;

    #[test]
    fn test_jpeg_frame() {
        let frame = FrameBuffer::jpeg(7, CameraSize::new(4, 4), vec![0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(frame.origin, FrameOrigin::Still);
        assert_eq!(frame.format, PixelFormat::Jpeg);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.byte_len(), 4);
        assert_eq!(frame.planes[0].row_stride, 4);
    }

    #[test]
    fn test_pixel_format_names() {
        assert_eq!(PixelFormat::Yuv420.as_str(), "yuv420");
        assert_eq!(PixelFormat::Jpeg.as_str(), "jpeg");
    }
}
