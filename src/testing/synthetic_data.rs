//! Synthetic frames for offline testing
//!
//! Generates YUV 4:2:0 preview frames with a moving gradient and small real
//! JPEG stills, so the conversion and delivery paths run without hardware.

use crate::types::{CameraSize, FrameBuffer, FrameOrigin, ImagePlane, PixelFormat};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, RgbImage};

/// A three-plane YUV 4:2:0 frame whose luma gradient shifts with `sequence`.
pub fn gradient_yuv_frame(sequence: u64, size: CameraSize) -> FrameBuffer {
    let (w, h) = (size.width as usize, size.height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let base = (sequence % 256) as u8;

    let mut y_plane = vec![0u8; w * h];
    for row in 0..h {
        for col in 0..w {
            y_plane[row * w + col] = base.wrapping_add(((col + row) % 256) as u8);
        }
    }
    let u_plane = vec![base.wrapping_add(64); cw * ch];
    let v_plane = vec![base.wrapping_add(192); cw * ch];

    FrameBuffer::new(
        FrameOrigin::Preview,
        sequence,
        size,
        PixelFormat::Yuv420,
        vec![
            ImagePlane::new(y_plane, w, 1),
            ImagePlane::new(u_plane, cw, 1),
            ImagePlane::new(v_plane, cw, 1),
        ],
    )
}

/// A still frame carrying arbitrary payload bytes.
pub fn jpeg_frame(sequence: u64, payload: &[u8]) -> FrameBuffer {
    FrameBuffer::jpeg(sequence, CameraSize::new(4, 4), payload.to_vec())
}

/// Encode a colored test pattern of `size` as a real JPEG.
pub fn encode_test_jpeg(size: CameraSize, sequence: u64, quality: u8) -> ImageResult<Vec<u8>> {
    let base = (sequence % 256) as u8;
    let image = RgbImage::from_fn(size.width.max(1), size.height.max(1), |x, y| {
        image::Rgb([
            base.wrapping_add((x % 256) as u8),
            base.wrapping_add((y % 256) as u8),
            base.wrapping_add(((x + y) % 256) as u8),
        ])
    });
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(&image)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::convert::yuv420_to_rgb;

    #[test]
    fn test_gradient_frame_converts() {
        let frame = gradient_yuv_frame(3, CameraSize::new(7, 5));
        assert_eq!(frame.planes.len(), 3);
        let rgb = yuv420_to_rgb(&frame).unwrap();
        assert_eq!(rgb.dimensions(), (7, 5));
    }

    #[test]
    fn test_encoded_jpeg_has_markers() {
        let jpeg = encode_test_jpeg(CameraSize::new(32, 16), 0, 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}
