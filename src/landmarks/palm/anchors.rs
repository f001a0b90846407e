use super::super::common::PALM_INPUT_SIZE;

pub const NUM_ANCHORS: usize = 2016;

/// Feature-map strides of the palm detector's SSD heads. Consecutive layers
/// with equal stride share one grid.
const STRIDES: [u32; 4] = [8, 16, 16, 16];
/// Every layer contributes an aspect-1 anchor plus an interpolated-scale anchor.
const ANCHORS_PER_LAYER: usize = 2;

/// Anchor centers in normalized input coordinates, in the detector's output order.
pub fn generate_anchors() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    let mut layer = 0;
    while layer < STRIDES.len() {
        let stride = STRIDES[layer];
        let mut same_stride = 0;
        while layer < STRIDES.len() && STRIDES[layer] == stride {
            same_stride += 1;
            layer += 1;
        }

        let grid = PALM_INPUT_SIZE.div_ceil(stride);
        let per_cell = same_stride * ANCHORS_PER_LAYER;
        for y in 0..grid {
            let cy = (y as f32 + 0.5) / grid as f32;
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                anchors.extend(std::iter::repeat_n([cx, cy], per_cell));
            }
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_count_matches_detector_output() {
        let anchors = generate_anchors();
        assert_eq!(anchors.len(), NUM_ANCHORS);
        assert_eq!(anchors[0], [0.5 / 24.0, 0.5 / 24.0]);
        assert_eq!(anchors[1], anchors[0]);
        // First anchor of the 12x12 grid follows the 24x24x2 block.
        assert_eq!(anchors[24 * 24 * 2], [0.5 / 12.0, 0.5 / 12.0]);
        assert_eq!(anchors[NUM_ANCHORS - 1], [11.5 / 12.0, 11.5 / 12.0]);
    }
}
