use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use image::RgbaImage;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Hand, HandLandmark, NUM_LANDMARKS};

pub const HANDPOSE_INPUT_SIZE: u32 = 224;
pub const PALM_INPUT_SIZE: u32 = 192;

#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// Maps landmark-model coordinates (pixels of a rotated square crop) back
/// into the source image.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

impl CropTransform {
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let (sin, cos) = self.angle.sin_cos();
        let ox = self.center.0 + dx * cos - dy * sin;
        let oy = self.center.1 + dx * sin + dy * cos;
        (
            ox.clamp(0.0, (self.orig_w.saturating_sub(1)) as f32),
            oy.clamp(0.0, (self.orig_h.saturating_sub(1)) as f32),
        )
    }

    /// Projects raw model landmarks into a normalized [`Hand`].
    pub fn to_hand(&self, raw: &[[f32; 3]]) -> Result<Hand> {
        let w = self.orig_w.max(1) as f32;
        let h = self.orig_h.max(1) as f32;
        let depth_scale = self.side / self.output_size as f32 / w;
        let points: Vec<HandLandmark> = raw
            .iter()
            .map(|[x, y, z]| {
                let (px, py) = self.project(*x, *y);
                HandLandmark::new(px / w, py / h, z * depth_scale)
            })
            .collect();
        Hand::try_from(points).map_err(|len| anyhow!("expected {NUM_LANDMARKS} landmarks, got {len}"))
    }
}

/// Letterboxes `image` into a `target_size` square NHWC tensor in 0..1.
pub fn prepare_letterboxed(image: &RgbaImage, target_size: u32) -> Result<(Array4<f32>, LetterboxInfo)> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(anyhow!("cannot letterbox an empty image"));
    }

    let scale = target_size as f32 / (width.max(height) as f32);
    let new_w = ((width as f32 * scale).round().max(1.0) as u32).min(target_size);
    let new_h = ((height as f32 * scale).round().max(1.0) as u32).min(target_size);

    let src_image =
        fir::images::Image::from_vec_u8(width, height, image.as_raw().clone(), fir::PixelType::U8x4)?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size - new_w) / 2) as usize;
    let pad_y = ((target_size - new_h) / 2) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 4];
    for px in canvas.chunks_mut(4) {
        px[3] = 255;
    }
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        canvas[dst_offset..dst_offset + src_stride]
            .copy_from_slice(&resized[src_offset..src_offset + src_stride]);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: width,
        orig_h: height,
    };

    Ok((input, letterbox))
}

/// Samples a rotated square of side `side` around `center` into an
/// `output_size` NHWC tensor for the landmark model.
pub fn prepare_rotated_crop(
    image: &RgbaImage,
    center: (f32, f32),
    side: f32,
    angle: f32,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    let half = output_size as f32 / 2.0;
    let scale = side / output_size as f32;
    let (sin, cos) = angle.sin_cos();

    let data: Vec<f32> = (0..output_size)
        .into_par_iter()
        .flat_map_iter(|y| {
            let dy = (y as f32 + 0.5 - half) * scale;
            (0..output_size).flat_map(move |x| {
                let dx = (x as f32 + 0.5 - half) * scale;
                let src_x = center.0 + dx * cos - dy * sin;
                let src_y = center.1 + dx * sin + dy * cos;
                sample_rgb(image, src_x, src_y)
            })
        })
        .collect();

    let array =
        Array4::<f32>::from_shape_vec((1, output_size as usize, output_size as usize, 3), data)
            .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))?;

    let transform = CropTransform {
        center,
        side,
        angle,
        output_size,
        orig_w: image.width(),
        orig_h: image.height(),
    };

    Ok((array, transform))
}

pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    if flat.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_LANDMARKS * 3
        ));
    }

    Ok(flat
        .chunks_exact(3)
        .take(NUM_LANDMARKS)
        .map(|chunk| [chunk[0], chunk[1], chunk[2]])
        .collect())
}

fn sample_rgb(image: &RgbaImage, x: f32, y: f32) -> [f32; 3] {
    if x.is_nan() || y.is_nan() {
        return [0.0, 0.0, 0.0];
    }
    let x0 = x.floor();
    let y0 = y.floor();

    let (w, h) = (image.width() as i64, image.height() as i64);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let ix = cx as i64;
        let iy = cy as i64;
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0, 0.0, 0.0];
        }
        let px = image.get_pixel(ix as u32, iy as u32).0;
        [
            px[0] as f32 / 255.0,
            px[1] as f32 / 255.0,
            px[2] as f32 / 255.0,
        ]
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x0 + 1.0, y0);
    let c01 = fetch(x0, y0 + 1.0);
    let c11 = fetch(x0 + 1.0, y0 + 1.0);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    [0, 1, 2].map(|c| lerp(lerp(c00[c], c10[c], fx), lerp(c01[c], c11[c], fx), fy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgba;

    #[test]
    fn letterbox_pads_short_side() {
        let image = RgbaImage::from_pixel(400, 200, Rgba([255, 0, 0, 255]));
        let (input, letterbox) = prepare_letterboxed(&image, PALM_INPUT_SIZE).unwrap();

        assert_eq!(input.shape(), &[1, 192, 192, 3]);
        assert_relative_eq!(letterbox.scale, 0.48);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 48.0);
        // Padding rows are black, content rows keep the source color.
        assert_eq!(input[[0, 0, 96, 0]], 0.0);
        assert_relative_eq!(input[[0, 96, 96, 0]], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn unrotated_crop_projects_center_back() {
        let transform = CropTransform {
            center: (300.0, 200.0),
            side: 448.0,
            angle: 0.0,
            output_size: HANDPOSE_INPUT_SIZE,
            orig_w: 640,
            orig_h: 480,
        };
        let (x, y) = transform.project(112.0, 112.0);
        assert_relative_eq!(x, 300.0);
        assert_relative_eq!(y, 200.0);

        let (x, y) = transform.project(122.0, 112.0);
        assert_relative_eq!(x, 320.0);
        assert_relative_eq!(y, 200.0);
    }

    #[test]
    fn crop_transform_normalizes_hand() {
        let transform = CropTransform {
            center: (50.0, 50.0),
            side: 224.0,
            angle: 0.0,
            output_size: HANDPOSE_INPUT_SIZE,
            orig_w: 100,
            orig_h: 100,
        };
        let raw = vec![[112.0, 112.0, 10.0]; NUM_LANDMARKS];
        let hand = transform.to_hand(&raw).unwrap();
        assert_relative_eq!(hand.landmark(0).x, 0.5);
        assert_relative_eq!(hand.landmark(0).y, 0.5);
        assert_relative_eq!(hand.landmark(0).z, 0.1);

        assert!(transform.to_hand(&raw[..5]).is_err());
    }

    #[test]
    fn short_landmark_buffer_is_rejected() {
        assert!(decode_landmarks(&[0.0; 10]).is_err());
        let decoded = decode_landmarks(&[1.0; 64]).unwrap();
        assert_eq!(decoded.len(), NUM_LANDMARKS);
    }
}
