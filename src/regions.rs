//! Nail placement: landmark-driven extraction and the detector-free fallback.

use crate::types::{Finger, Hand, NailRegion};

const NAIL_LENGTH_RATIO: f32 = 0.6;
const NAIL_WIDTH_RATIO: f32 = 0.8;

const FALLBACK_BAND_WIDTH: f32 = 0.5;
const FALLBACK_BAND_Y: f32 = 0.65;
const FALLBACK_NAIL_WIDTH: f32 = 0.04;
const FALLBACK_NAIL_ASPECT: f32 = 1.5;
/// Downward shift per finger, in nail heights, approximating finger length.
const FALLBACK_FINGER_DROP: [f32; 5] = [0.3, 0.1, 0.0, 0.1, 0.3];

/// Guesses five nail boxes from the image size alone: a band over the
/// central half of the width at 65% height, split into five slots.
/// Returns no regions for an empty image.
pub fn estimate_fallback_regions(width: u32, height: u32) -> Vec<NailRegion> {
    if width == 0 || height == 0 {
        return Vec::new();
    }
    let (w, h) = (width as f32, height as f32);

    let band_width = w * FALLBACK_BAND_WIDTH;
    let band_left = (w - band_width) / 2.0;
    let band_y = h * FALLBACK_BAND_Y;
    let slot = band_width / Finger::ALL.len() as f32;
    let nail_w = w * FALLBACK_NAIL_WIDTH;
    let nail_h = nail_w * FALLBACK_NAIL_ASPECT;

    Finger::ALL
        .iter()
        .zip(FALLBACK_FINGER_DROP)
        .enumerate()
        .map(|(i, (&finger, drop))| {
            let center_x = band_left + slot * (i as f32 + 0.5);
            let center_y = band_y + drop * nail_h;
            NailRegion::centered(finger, center_x, center_y, nail_w, nail_h, 0.0)
        })
        .collect()
}

/// Five nail boxes, thumb first, anchored on the fingertips of `hand`.
///
/// Angle comes from the tip relative to the PIP joint, length from the tip
/// to the DIP joint. The thumb has no DIP, so its IP joint (landmark 3)
/// serves for both.
pub fn extract_nail_regions(hand: &Hand, width: u32, height: u32) -> Vec<NailRegion> {
    let (w, h) = (width as f32, height as f32);

    Finger::ALL
        .iter()
        .map(|&finger| {
            let (tip_x, tip_y) = hand.landmark(finger.tip()).to_pixels(w, h);
            let (ref_x, ref_y) = hand.landmark(finger.pip()).to_pixels(w, h);
            let length_joint = finger.dip().unwrap_or(finger.pip());
            let (len_x, len_y) = hand.landmark(length_joint).to_pixels(w, h);

            let angle = normalize_degrees((tip_y - ref_y).atan2(tip_x - ref_x).to_degrees() + 90.0);
            let nail_len = NAIL_LENGTH_RATIO * (tip_x - len_x).hypot(tip_y - len_y);
            let nail_w = NAIL_WIDTH_RATIO * nail_len;

            NailRegion::centered(finger, tip_x, tip_y, nail_w, nail_len, angle)
        })
        .collect()
}

/// Folds an angle into (-180, 180].
fn normalize_degrees(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}
