//! Frame format conversion: YUV 4:2:0 preview frames to RGB, JPEG payload
//! extraction for stills.

use crate::errors::FrameError;
use crate::types::{FrameBuffer, PixelFormat};
use bytes::Bytes;
use image::{imageops, RgbImage};

/// JPEG start-of-image marker.
pub const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// Convert a three-plane YUV 4:2:0 frame to RGB, honoring each plane's row
/// and pixel stride.
pub fn yuv420_to_rgb(frame: &FrameBuffer) -> Result<RgbImage, FrameError> {
    if frame.format != PixelFormat::Yuv420 {
        return Err(FrameError::UnexpectedFormat {
            expected: PixelFormat::Yuv420.as_str(),
            actual: frame.format.as_str(),
        });
    }
    let (width, height) = (frame.size.width, frame.size.height);
    if width == 0 || height == 0 {
        return Err(FrameError::Empty);
    }

    let plane = |index: usize| frame.planes.get(index).ok_or(FrameError::MissingPlane(index));
    let (y_plane, u_plane, v_plane) = (plane(0)?, plane(1)?, plane(2)?);

    let (w, h) = (width as usize, height as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    for (index, p, pw, ph) in [(0, y_plane, w, h), (1, u_plane, cw, ch), (2, v_plane, cw, ch)] {
        let too_small = FrameError::BufferTooSmall {
            plane: index,
            width,
            height,
        };
        let needed = (ph - 1)
            .checked_mul(p.row_stride)
            .zip((pw - 1).checked_mul(p.pixel_stride.max(1)))
            .and_then(|(rows, cols)| rows.checked_add(cols))
            .and_then(|last| last.checked_add(1))
            .ok_or_else(|| too_small.clone())?;
        if p.data.len() < needed {
            return Err(too_small);
        }
    }

    let mut rgb = RgbImage::new(width, height);
    for (x, y, pixel) in rgb.enumerate_pixels_mut() {
        let (x, y) = (x as usize, y as usize);
        let luma = y_plane.data[y * y_plane.row_stride + x * y_plane.pixel_stride.max(1)];
        let (cx, cy) = (x / 2, y / 2);
        let u = u_plane.data[cy * u_plane.row_stride + cx * u_plane.pixel_stride.max(1)];
        let v = v_plane.data[cy * v_plane.row_stride + cx * v_plane.pixel_stride.max(1)];
        let (r, g, b) = yuv_to_rgb(luma, u, v);
        *pixel = image::Rgb([r, g, b]);
    }
    Ok(rgb)
}

/// ITU-R BT.601 full-range conversion.
#[allow(clippy::many_single_char_names)]
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> (u8, u8, u8) {
    let y_f = f32::from(y);
    let u_f = f32::from(u) - 128.0;
    let v_f = f32::from(v) - 128.0;

    let r = 1.402f32.mul_add(v_f, y_f);
    let g = 0.714_14f32.mul_add(-v_f, 0.344_14f32.mul_add(-u_f, y_f));
    let b = 1.772f32.mul_add(u_f, y_f);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |val: f32| val.clamp(0.0, 255.0) as u8;
    (clamp(r), clamp(g), clamp(b))
}

/// Rotate clockwise by 0, 90, 180 or 270 degrees. Other angles leave the
/// image untouched.
pub fn rotate(image: RgbImage, degrees: u32) -> RgbImage {
    match degrees % 360 {
        90 => imageops::rotate90(&image),
        180 => imageops::rotate180(&image),
        270 => imageops::rotate270(&image),
        _ => image,
    }
}

/// The encoded JPEG bytes of a still frame.
pub fn extract_jpeg(frame: &FrameBuffer) -> Result<Bytes, FrameError> {
    if frame.format != PixelFormat::Jpeg {
        return Err(FrameError::UnexpectedFormat {
            expected: PixelFormat::Jpeg.as_str(),
            actual: frame.format.as_str(),
        });
    }
    let plane = frame.planes.first().ok_or(FrameError::MissingPlane(0))?;
    if plane.data.is_empty() {
        return Err(FrameError::Empty);
    }
    if !plane.data.starts_with(&JPEG_SOI) {
        return Err(FrameError::NotJpeg);
    }
    // Zero-copy: Bytes clones share the plane's buffer.
    Ok(plane.data.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CameraSize, FrameOrigin, ImagePlane};

    fn solid_yuv(width: u32, height: u32, y: u8, u: u8, v: u8) -> FrameBuffer {
        let (w, h) = (width as usize, height as usize);
        let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
        FrameBuffer::new(
            FrameOrigin::Preview,
            1,
            CameraSize::new(width, height),
            PixelFormat::Yuv420,
            vec![
                ImagePlane::new(vec![y; w * h], w, 1),
                ImagePlane::new(vec![u; cw * ch], cw, 1),
                ImagePlane::new(vec![v; cw * ch], cw, 1),
            ],
        )
    }

    #[test]
    fn test_gray_converts_to_gray() {
        let rgb = yuv420_to_rgb(&solid_yuv(4, 2, 128, 128, 128)).unwrap();
        assert_eq!(rgb.dimensions(), (4, 2));
        assert!(rgb.pixels().all(|p| p.0 == [128, 128, 128]));
    }

    #[test]
    fn test_red_chroma_saturates_red() {
        let rgb = yuv420_to_rgb(&solid_yuv(2, 2, 128, 128, 255)).unwrap();
        let px = rgb.get_pixel(0, 0).0;
        assert_eq!(px[0], 255);
        assert!(px[1] < 128);
    }

    #[test]
    fn test_interleaved_chroma_strides() {
        // Semi-planar layout: U and V share one buffer with pixel stride 2.
        let uv: Bytes = Bytes::from(vec![100u8, 150, 100, 150]);
        let frame = FrameBuffer::new(
            FrameOrigin::Preview,
            1,
            CameraSize::new(4, 2),
            PixelFormat::Yuv420,
            vec![
                ImagePlane::new(vec![90u8; 8], 4, 1),
                ImagePlane::new(uv.clone(), 4, 2),
                ImagePlane::new(uv.slice(1..), 4, 2),
            ],
        );
        let rgb = yuv420_to_rgb(&frame).unwrap();
        assert_eq!(rgb.get_pixel(0, 0), rgb.get_pixel(3, 1));
    }

    #[test]
    fn test_short_and_missing_planes() {
        let mut frame = solid_yuv(4, 4, 0, 0, 0);
        frame.planes[2] = ImagePlane::new(vec![0u8; 1], 2, 1);
        assert_eq!(
            yuv420_to_rgb(&frame).unwrap_err(),
            FrameError::BufferTooSmall {
                plane: 2,
                width: 4,
                height: 4
            }
        );
        frame.planes.truncate(1);
        assert_eq!(yuv420_to_rgb(&frame).unwrap_err(), FrameError::MissingPlane(1));
    }

    #[test]
    fn test_rotation_swaps_dimensions() {
        let rgb = RgbImage::new(4, 2);
        assert_eq!(rotate(rgb.clone(), 90).dimensions(), (2, 4));
        assert_eq!(rotate(rgb.clone(), 180).dimensions(), (4, 2));
        assert_eq!(rotate(rgb, 270).dimensions(), (2, 4));
    }

    #[test]
    fn test_extract_jpeg_rejects_yuv() {
        let jpeg = FrameBuffer::jpeg(3, CameraSize::new(2, 2), vec![0xFF, 0xD8, 0xFF]);
        assert_eq!(extract_jpeg(&jpeg).unwrap().as_ref(), &[0xFF, 0xD8, 0xFF]);
        assert!(matches!(
            extract_jpeg(&solid_yuv(2, 2, 0, 0, 0)),
            Err(FrameError::UnexpectedFormat { .. })
        ));
        let empty = FrameBuffer::jpeg(4, CameraSize::new(2, 2), Vec::new());
        assert_eq!(extract_jpeg(&empty).unwrap_err(), FrameError::Empty);
    }

    #[test]
    fn test_extract_jpeg_requires_soi() {
        let garbage = FrameBuffer::jpeg(5, CameraSize::new(2, 2), b"not a jpeg".to_vec());
        assert_eq!(extract_jpeg(&garbage).unwrap_err(), FrameError::NotJpeg);
        let truncated = FrameBuffer::jpeg(6, CameraSize::new(2, 2), vec![0xFF]);
        assert_eq!(extract_jpeg(&truncated).unwrap_err(), FrameError::NotJpeg);
    }

    #[test]
    fn test_overflowing_stride_is_too_small() {
        let mut frame = solid_yuv(4, 4, 0, 0, 0);
        frame.planes[0] = ImagePlane::new(vec![0u8; 16], usize::MAX, 1);
        assert_eq!(
            yuv420_to_rgb(&frame).unwrap_err(),
            FrameError::BufferTooSmall {
                plane: 0,
                width: 4,
                height: 4
            }
        );
        frame.planes[0] = ImagePlane::new(vec![0u8; 16], 4, usize::MAX / 2);
        assert!(matches!(
            yuv420_to_rgb(&frame),
            Err(FrameError::BufferTooSmall { plane: 0, .. })
        ));
    }
}
