//! Inverse-quantization tables, weighted-quant matrices and their
//! frame-level derivation.

use crate::types::WeightedQuantParams;

/// Chroma QP derived from luma QP.
pub const QP_SCALE_CR: [u8; 64] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25,
    26, 27, 28, 29, 30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 42, 43, 43, 44, 44, 45,
    45, 46, 46, 47, 47, 48, 48, 48, 49, 49, 49, 50, 50, 50, 51,
];

/// Dequant scale per QP.
pub const IQ_TAB: [u32; 64] = [
    32768, 36061, 38968, 42495, 46341, 50535, 55437, 60424, 32932, 35734, 38968, 42495, 46177,
    50535, 55109, 59933, 65535, 35734, 38968, 42577, 46341, 50617, 55027, 60097, 32809, 35734,
    38968, 42454, 46382, 50576, 55109, 60056, 65535, 35734, 38968, 42495, 46320, 50515, 55109,
    60076, 65535, 35744, 38968, 42495, 46341, 50535, 55099, 60087, 65535, 35734, 38973, 42500,
    46341, 50535, 55109, 60097, 32771, 35734, 38965, 42497, 46341, 50535, 55109, 60099,
];

/// Dequant shift per QP, before the bit-depth/transform-size adjustment.
pub const IQ_SHIFT: [i32; 64] = [
    15, 15, 15, 15, 15, 15, 15, 15, 14, 14, 14, 14, 14, 14, 14, 14, 14, 13, 13, 13, 13, 13, 13,
    13, 12, 12, 12, 12, 12, 12, 12, 12, 12, 11, 11, 11, 11, 11, 11, 11, 11, 10, 10, 10, 10, 10,
    10, 10, 10, 9, 9, 9, 9, 9, 9, 9, 8, 8, 8, 8, 8, 8, 8, 8,
];

/// For 16-bit transform intermediates.
pub const LIMIT_BIT: i32 = 16;

pub const WQ_PARAM_DEFAULT: [[i16; 6]; 2] = [
    // undetailed
    [67, 71, 71, 80, 80, 106],
    // detailed
    [64, 49, 71, 54, 80, 91],
];

const WQ_DEFAULT_4X4: [i16; 16] = [
    64, 64, 64, 68, 64, 64, 68, 72, 64, 68, 76, 80, 72, 76, 84, 96,
];

const WQ_DEFAULT_8X8: [i16; 64] = [
    64, 64, 64, 64, 68, 68, 72, 76, 64, 64, 64, 68, 72, 76, 84, 92, 64, 64, 68, 72, 76, 80, 88,
    100, 64, 68, 72, 80, 84, 92, 100, 112, 68, 72, 80, 84, 92, 100, 112, 128, 76, 80, 84, 92, 104,
    116, 132, 152, 96, 100, 104, 116, 124, 140, 164, 188, 104, 108, 116, 128, 152, 172, 192, 216,
];

/// Default weighting matrix for the given size class (0: 4x4, 1: 8x8).
pub fn wq_default_matrix(size_id: usize) -> &'static [i16] {
    if size_id == 0 {
        &WQ_DEFAULT_4X4
    } else {
        &WQ_DEFAULT_8X8
    }
}

/// The effective weighting matrices of one frame; weight 64 is unity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WqMatrices {
    pub m4: [i16; 16],
    pub m8: [i16; 64],
}

/// Frequency band of a matrix position under one of the three weighting
/// models; the band selects which of the six picture parameters applies.
fn wq_band(model: u32, x: usize, y: usize, size: usize) -> usize {
    let scale = size / 4; // bands live on a 4x4 grid over the block
    let (fx, fy) = (x / scale, y / scale);
    if fx == 0 && fy == 0 {
        return 0;
    }
    let s = match model {
        1 => 2 * fx.max(fy / 2), // horizontal-detail model
        2 => 2 * fy.max(fx / 2), // vertical-detail model
        _ => fx + fy,            // symmetric model
    };
    match s {
        0 | 1 => 1,
        2 => 2,
        3 | 4 => 3,
        5 => 4,
        _ => 5,
    }
}

/// Build a full matrix from the six band parameters.
fn wq_matrix_from_params(model: u32, params: &[i16; 6], size: usize, out: &mut [i16]) {
    for y in 0..size {
        for x in 0..size {
            out[y * size + x] = params[wq_band(model, x, y, size)];
        }
    }
}

/// Derive the frame's effective weighting matrices from the sequence-level
/// matrices and the optional picture-level parameters.
pub fn frame_wq_matrices(
    seq_matrix: &[[i16; 64]; 2],
    pic: Option<&WeightedQuantParams>,
) -> WqMatrices {
    let mut wq = WqMatrices {
        m4: [64; 16],
        m8: [64; 64],
    };
    wq.m4.copy_from_slice(&seq_matrix[0][..16]);
    wq.m8.copy_from_slice(&seq_matrix[1]);

    let Some(pic) = pic else {
        return wq;
    };

    match pic.pic_wq_data_index {
        1 => {
            let params = match pic.wq_param_index {
                2 => &pic.quant_param_detail,
                1 => &pic.quant_param_undetail,
                _ => &WQ_PARAM_DEFAULT[0],
            };
            wq_matrix_from_params(pic.wq_model, params, 4, &mut wq.m4);
            wq_matrix_from_params(pic.wq_model, params, 8, &mut wq.m8);
        }
        2 => {
            wq.m4.copy_from_slice(&pic.pic_wq_matrix[0][..16]);
            wq.m8.copy_from_slice(&pic.pic_wq_matrix[1]);
        }
        _ => {}
    }
    wq
}

/// Matrix weight for position `(x, y)` of a `w` x `h` transform block:
/// 4x4 blocks read the 4x4 matrix directly, every larger block folds onto
/// the 8x8 matrix.
pub fn wq_weight(wq: &WqMatrices, x: usize, y: usize, w: usize, h: usize) -> i16 {
    if w == 4 && h == 4 {
        wq.m4[y * 4 + x]
    } else {
        let sx = x >> (w.trailing_zeros() as usize - 3);
        let sy = y >> (h.trailing_zeros() as usize - 3);
        wq.m8[sy.min(7) * 8 + sx.min(7)]
    }
}

/// Chroma QP for one component given the luma QP and the per-picture delta.
pub fn chroma_qp(luma_qp: i32, delta: i32, bit_depth: i32) -> i32 {
    let bit_depth_offset = (bit_depth - 8) << 3;
    let mut qp = luma_qp + delta - bit_depth_offset;
    if qp >= 0 {
        qp = i32::from(QP_SCALE_CR[qp.clamp(0, 63) as usize]);
    }
    (qp + bit_depth_offset).clamp(0, 63 + bit_depth_offset)
}

/// Dequant scale and shift for a transform block.
pub fn quant_params(qp: i32, log2_size: i32, bit_depth: i32) -> (i32, i32) {
    let qp = qp.clamp(0, 63 + 8 * (bit_depth - 8)) as usize % IQ_SHIFT.len();
    let shift = IQ_SHIFT[qp] + (bit_depth + 1) + log2_size - LIMIT_BIT;
    (IQ_TAB[qp] as i32, shift)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_qp_follows_scale_table() {
        assert_eq!(chroma_qp(30, 0, 8), 30);
        assert_eq!(chroma_qp(45, 0, 8), 43);
        assert_eq!(chroma_qp(63, 0, 8), 51);
        // 10-bit offsets by 16 on both ends of the mapping
        assert_eq!(chroma_qp(30 + 16, 0, 10), 30 + 16);
    }

    #[test]
    fn quant_params_track_qp_and_size() {
        let (scale0, shift0) = quant_params(0, 3, 8);
        assert_eq!(scale0, 32768);
        assert_eq!(shift0, 15 + 9 + 3 - 16);
        let (_, shift1) = quant_params(0, 4, 8);
        assert_eq!(shift1, shift0 + 1);
    }

    #[test]
    fn frame_matrices_fall_back_to_sequence_level() {
        let mut seq = [[0i16; 64]; 2];
        seq[0][..16].copy_from_slice(wq_default_matrix(0));
        seq[1].copy_from_slice(wq_default_matrix(1));

        let wq = frame_wq_matrices(&seq, None);
        assert_eq!(&wq.m4[..], wq_default_matrix(0));
        assert_eq!(&wq.m8[..], wq_default_matrix(1));
    }

    #[test]
    fn picture_params_shape_the_matrix_by_band() {
        let seq = [[64i16; 64]; 2];
        let pic = WeightedQuantParams {
            pic_wq_data_index: 1,
            wq_param_index: 1,
            wq_model: 0,
            quant_param_undetail: [60, 70, 80, 90, 100, 110],
            ..Default::default()
        };
        let wq = frame_wq_matrices(&seq, Some(&pic));
        assert_eq!(wq.m8[0], 60, "DC keeps the first parameter");
        assert_eq!(wq.m8[7 * 8 + 7], 110, "highest band in the far corner");
        // bands grow monotonically along the diagonal
        let diag: Vec<i16> = (0..8).map(|i| wq.m8[i * 8 + i]).collect();
        assert!(diag.windows(2).all(|w| w[0] <= w[1]), "{diag:?}");
    }

    #[test]
    fn picture_matrices_override_everything() {
        let seq = [[64i16; 64]; 2];
        let mut pic = WeightedQuantParams {
            pic_wq_data_index: 2,
            ..Default::default()
        };
        pic.pic_wq_matrix[0][..16].copy_from_slice(&[70; 16]);
        pic.pic_wq_matrix[1] = [80; 64];
        let wq = frame_wq_matrices(&seq, Some(&pic));
        assert!(wq.m4.iter().all(|&w| w == 70));
        assert!(wq.m8.iter().all(|&w| w == 80));
    }

    #[test]
    fn large_blocks_fold_onto_the_8x8_matrix() {
        let mut wq = WqMatrices {
            m4: [64; 16],
            m8: [64; 64],
        };
        wq.m8[7 * 8 + 7] = 99;
        // the bottom-right quarter of a 32x32 block maps to the matrix corner
        assert_eq!(wq_weight(&wq, 31, 31, 32, 32), 99);
        assert_eq!(wq_weight(&wq, 0, 0, 32, 32), 64);
        // 4x4 blocks read their own matrix
        wq.m4[5] = 33;
        assert_eq!(wq_weight(&wq, 1, 1, 4, 4), 33);
    }
}
