//! Scalar implementations of the block-level numerical kernels, dispatched
//! through a flat record of function fields.
//!
//! The pipeline only ever talks to [`Kernels`]; the CPU flag word picks the
//! implementation set (scalar today, SIMD variants slot in per field).

use std::sync::OnceLock;

use super::cpu::CpuFlags;
use super::dpb::Pel;
use super::quant::{wq_weight, WqMatrices};

pub type Coeff = i16;

/// Deblock one edge: 8 luma samples (or 4 chroma samples) along the edge.
/// `flags[0]`/`flags[1]` gate the two 4-sample halves.
pub type DeblockEdgeFn = fn(buf: &mut [Pel], pos: usize, stride: usize, alpha: i32, beta: i32, flags: [bool; 2]);

/// Dequantize `count` coefficients in place.
pub type DequantFn = fn(coeffs: &mut [Coeff], count: usize, scale: i32, shift: i32);

/// Dequantize a `w` x `h` block in place, weighting each frequency by the
/// frame's active matrix.
pub type DequantWqFn =
    fn(coeffs: &mut [Coeff], w: usize, h: usize, scale: i32, shift: i32, wq: &WqMatrices);

/// Secondary inverse transform of the low-frequency 4x4 corner, applied to
/// intra blocks of 8x8 and up before the main transform.
pub type InvTransform2ndFn =
    fn(coeffs: &mut [Coeff], stride: usize, luma_mode: i32, b_top: bool, b_left: bool);

/// Dedicated secondary transform for 4x4 intra blocks; replaces the main
/// transform entirely.
pub type InvTransform4x4SecFn = fn(coeffs: &mut [Coeff], stride: usize, bit_depth: i32);

/// The kernel record. One instance per decoder, selected at open time.
pub struct Kernels {
    pub cpu: CpuFlags,
    pub deblock_luma: [DeblockEdgeFn; 2],
    pub deblock_chroma: [DeblockEdgeFn; 2],
    pub dequant: DequantFn,
    pub dequant_wq: DequantWqFn,
    pub inv_transform_2nd: InvTransform2ndFn,
    pub inv_transform_4x4_2nd: InvTransform4x4SecFn,
}

impl Kernels {
    pub fn new(cpu: CpuFlags) -> Self {
        // Scalar set; a SIMD build overrides individual fields based on
        // `cpu` the way the per-field tables grow.
        Kernels {
            cpu,
            deblock_luma: [deblock_edge_ver, deblock_edge_hor],
            deblock_chroma: [deblock_edge_ver_c, deblock_edge_hor_c],
            dequant: dequant_scalar,
            dequant_wq: dequant_wq_scalar,
            inv_transform_2nd: inv_transform_2nd_scalar,
            inv_transform_4x4_2nd: inv_transform_4x4_2nd_scalar,
        }
    }

    /// Inverse transform a `width` x `height` coefficient block in place
    /// (row-major, contiguous).
    pub fn inverse_transform(
        &self,
        coeffs: &mut [Coeff],
        width: usize,
        height: usize,
        bit_depth: i32,
    ) {
        inverse_transform_2d(coeffs, width, height, bit_depth);
    }
}

/* ---------------------------------------------------------------------------
 * dequant
 */

fn dequant_scalar(coeffs: &mut [Coeff], count: usize, scale: i32, shift: i32) {
    let add = 1i32 << (shift - 1).max(0);
    for c in coeffs.iter_mut().take(count) {
        let v = (i32::from(*c) * scale + add) >> shift;
        *c = v.clamp(i32::from(Coeff::MIN), i32::from(Coeff::MAX)) as Coeff;
    }
}

/// Weighted dequant: each coefficient is scaled by its matrix weight
/// (64 = unity) before the regular scale/shift; the two extra shift steps
/// on each side cancel exactly at weight 64.
fn dequant_wq_scalar(
    coeffs: &mut [Coeff],
    w: usize,
    h: usize,
    scale: i32,
    shift: i32,
    wq: &WqMatrices,
) {
    let shift = shift + 4;
    let add = 1i64 << (shift - 1).max(0);
    for y in 0..h {
        for x in 0..w {
            let c = &mut coeffs[y * w + x];
            let weight = i64::from(wq_weight(wq, x, y, w, h));
            let v = ((i64::from(*c) * weight >> 2) * i64::from(scale) + add) >> shift;
            *c = v.clamp(i64::from(Coeff::MIN), i64::from(Coeff::MAX)) as Coeff;
        }
    }
}

/* ---------------------------------------------------------------------------
 * inverse transform
 */

/// Quantized DCT basis used by the transforms, 32-scaled like the standard
/// tables (row 0 flat at 32, others 32*sqrt(2) scaled).
fn basis(n: usize) -> &'static Vec<Vec<i32>> {
    static TABLES: OnceLock<[Vec<Vec<i32>>; 4]> = OnceLock::new();
    let tables = TABLES.get_or_init(|| {
        let gen = |n: usize| -> Vec<Vec<i32>> {
            (0..n)
                .map(|r| {
                    (0..n)
                        .map(|k| {
                            let scale = if r == 0 { 32.0 } else { 32.0 * std::f64::consts::SQRT_2 };
                            let angle = std::f64::consts::PI * (r * (2 * k + 1)) as f64
                                / (2 * n) as f64;
                            (scale * angle.cos()).round() as i32
                        })
                        .collect()
                })
                .collect()
        };
        [gen(4), gen(8), gen(16), gen(32)]
    });
    &tables[n.trailing_zeros() as usize - 2]
}

/// One inverse pass: `line` columns of an `n`-point transform.
/// `src` is laid out `n` rows of `line` entries; `dst` transposed
/// (`line` rows of `n`).
fn inverse_pass(src: &[Coeff], dst: &mut [Coeff], n: usize, line: usize, shift: i32, clip_depth: i32) {
    let tab = basis(n);
    let add = 1i32 << (shift - 1);
    let max_val = (1i32 << (clip_depth - 1)) - 1;
    let min_val = -max_val - 1;

    for j in 0..line {
        for k in 0..n {
            let mut acc = 0i64;
            for (r, row) in tab.iter().enumerate() {
                acc += i64::from(row[k]) * i64::from(src[r * line + j]);
            }
            let v = ((acc + i64::from(add)) >> shift) as i32;
            dst[j * n + k] = v.clamp(min_val, max_val) as Coeff;
        }
    }
}

/// Full 2D inverse transform, column pass then row pass, clipping to 16-bit
/// intermediates and `bit_depth + 1` output the way the standard fixes it.
fn inverse_transform_2d(coeffs: &mut [Coeff], width: usize, height: usize, bit_depth: i32) {
    let shift1 = 5;
    let shift2 = 20 - bit_depth;
    let mut tmp = vec![0 as Coeff; width * height];

    // vertical pass: treat the block as `height` rows of `width`
    inverse_pass(coeffs, &mut tmp, height, width, shift1, 16);
    // horizontal pass on the transposed intermediate
    inverse_pass(&tmp, coeffs, width, height, shift2, bit_depth + 1);
}

/* ---------------------------------------------------------------------------
 * secondary transform
 */

const SEC_TR_SIZE: usize = 4;

/// Secondary transform basis for the 4x4 corner of larger intra blocks.
const SEC_T: [i16; 16] = [
    123, -35, -8, -3, -32, -120, 30, 10, 14, 25, 123, -22, 8, 13, 19, 126,
];

/// Secondary transform basis for whole 4x4 intra blocks.
const SEC_T_C: [i16; 16] = [
    34, 58, 72, 81, 77, 69, -7, -75, 79, -33, -75, 58, 55, -84, 73, -28,
];

fn sec_tr_inv_ver(coeffs: &mut [Coeff], stride: usize, shift: i32, tc: &[i16; 16]) {
    let mut tmp = [0i32; SEC_TR_SIZE * SEC_TR_SIZE];
    let add = 1i32 << (shift - 1);
    for i in 0..SEC_TR_SIZE {
        for j in 0..SEC_TR_SIZE {
            tmp[i * SEC_TR_SIZE + j] = i32::from(coeffs[i * stride + j]);
        }
    }
    for i in 0..SEC_TR_SIZE {
        for j in 0..SEC_TR_SIZE {
            let mut sum = add;
            for k in 0..SEC_TR_SIZE {
                sum += i32::from(tc[k * SEC_TR_SIZE + i]) * tmp[k * SEC_TR_SIZE + j];
            }
            coeffs[i * stride + j] = (sum >> shift).clamp(-32768, 32767) as Coeff;
        }
    }
}

fn sec_tr_inv_hor(coeffs: &mut [Coeff], stride: usize, shift: i32, clip_depth: i32, tc: &[i16; 16]) {
    let mut tmp = [0i32; SEC_TR_SIZE * SEC_TR_SIZE];
    let max_val = (1i32 << (clip_depth - 1)) - 1;
    let min_val = -max_val - 1;
    let add = 1i32 << (shift - 1);
    for i in 0..SEC_TR_SIZE {
        for j in 0..SEC_TR_SIZE {
            tmp[i * SEC_TR_SIZE + j] = i32::from(coeffs[i * stride + j]);
        }
    }
    for i in 0..SEC_TR_SIZE {
        for j in 0..SEC_TR_SIZE {
            let mut sum = add;
            for k in 0..SEC_TR_SIZE {
                sum += i32::from(tc[k * SEC_TR_SIZE + i]) * tmp[j * SEC_TR_SIZE + k];
            }
            coeffs[j * stride + i] = (sum >> shift).clamp(min_val, max_val) as Coeff;
        }
    }
}

/// Undo the secondary transform on the low-frequency corner of an intra
/// block, steered by the prediction direction and neighbor availability.
fn inv_transform_2nd_scalar(
    coeffs: &mut [Coeff],
    stride: usize,
    luma_mode: i32,
    b_top: bool,
    b_left: bool,
) {
    let vt = (0..=23).contains(&luma_mode);
    let ht = (13..=32).contains(&luma_mode) || (0..=2).contains(&luma_mode);

    if ht && b_left {
        sec_tr_inv_hor(coeffs, stride, 7, 16, &SEC_T);
    }
    if vt && b_top {
        sec_tr_inv_ver(coeffs, stride, 7, &SEC_T);
    }
}

/// The 4x4 intra secondary transform: a full replacement for the main
/// transform at that size.
fn inv_transform_4x4_2nd_scalar(coeffs: &mut [Coeff], stride: usize, bit_depth: i32) {
    let shift1 = 5;
    let shift2 = 20 - bit_depth + 2;
    sec_tr_inv_ver(coeffs, stride, shift1, &SEC_T_C);
    sec_tr_inv_hor(coeffs, stride, shift2, bit_depth + 1, &SEC_T_C);
}

/* ---------------------------------------------------------------------------
 * deblock edge cores
 */

/// The shared edge filter. `ptr_inc` walks along the edge, `inc1` across
/// it; `chroma` halves the sample count and caps the filter strength.
fn deblock_edge_core(
    buf: &mut [Pel],
    pos: usize,
    chroma: bool,
    ptr_inc: usize,
    inc1: usize,
    alpha: i32,
    beta: i32,
    flags: [bool; 2],
) {
    let inc2 = inc1 * 2;
    let inc3 = inc1 + inc2;
    let mut src = pos;

    let mut pel = 0usize;
    while pel < 8 {
        let l2 = i32::from(buf[src - inc3]);
        let l1 = i32::from(buf[src - inc2]);
        let l0 = i32::from(buf[src - inc1]);
        let r0 = i32::from(buf[src]);
        let r1 = i32::from(buf[src + inc1]);
        let r2 = i32::from(buf[src + inc2]);

        let abs_delta = (r0 - l0).abs();
        let flag = if pel < 4 { flags[0] } else { flags[1] };

        if flag && abs_delta < alpha && abs_delta > 1 {
            let mut flatness_l = if (l1 - l0).abs() < beta { 2 } else { 0 };
            flatness_l += i32::from((l2 - l0).abs() < beta);
            let mut flatness_r = if (r0 - r1).abs() < beta { 2 } else { 0 };
            flatness_r += i32::from((r0 - r2).abs() < beta);

            let mut fs = match flatness_l + flatness_r {
                6 => 3 + i32::from(r1 == r0 && l0 == l1),
                5 => 2 + i32::from(r1 == r0 && l0 == l1),
                4 => 1 + i32::from(flatness_l == 2),
                3 => i32::from((l1 - r1).abs() < beta),
                _ => 0,
            };
            if chroma && fs > 0 {
                fs -= 1;
            }

            match fs {
                4 => {
                    buf[src - inc1] =
                        ((l0 + ((l0 + l2) << 3) + l2 + (r0 << 3) + (r2 << 2) + (r2 << 1) + 16)
                            >> 5) as Pel;
                    buf[src - inc2] =
                        (((l0 << 3) - l0 + (l2 << 2) + (l2 << 1) + r0 + (r0 << 1) + 8) >> 4) as Pel;
                    buf[src - inc3] = (((l0 << 2) + l2 + (l2 << 1) + r0 + 4) >> 3) as Pel;
                    buf[src] = ((r0 + ((r0 + r2) << 3) + r2 + (l0 << 3) + (l2 << 2) + (l2 << 1)
                        + 16)
                        >> 5) as Pel;
                    buf[src + inc1] =
                        (((r0 << 3) - r0 + (r2 << 2) + (r2 << 1) + l0 + (l0 << 1) + 8) >> 4) as Pel;
                    buf[src + inc2] = (((r0 << 2) + r2 + (r2 << 1) + l0 + 4) >> 3) as Pel;
                }
                3 => {
                    buf[src - inc1] =
                        ((l2 + (l1 << 2) + (l0 << 2) + (l0 << 1) + (r0 << 2) + r1 + 8) >> 4) as Pel;
                    buf[src] =
                        ((l1 + (l0 << 2) + (r0 << 2) + (r0 << 1) + (r1 << 2) + r2 + 8) >> 4) as Pel;
                    buf[src - inc2] = ((l2 * 3 + l1 * 8 + l0 * 4 + r0 + 8) >> 4) as Pel;
                    buf[src + inc1] = ((r2 * 3 + r1 * 8 + r0 * 4 + l0 + 8) >> 4) as Pel;
                }
                2 => {
                    buf[src - inc1] =
                        (((l1 << 1) + l1 + (l0 << 3) + (l0 << 1) + (r0 << 1) + r0 + 8) >> 4) as Pel;
                    buf[src] =
                        (((l0 << 1) + l0 + (r0 << 3) + (r0 << 1) + (r1 << 1) + r1 + 8) >> 4) as Pel;
                }
                1 => {
                    buf[src - inc1] = ((l0 * 3 + r0 + 2) >> 2) as Pel;
                    buf[src] = ((r0 * 3 + l0 + 2) >> 2) as Pel;
                }
                _ => {}
            }
        }

        src += ptr_inc;
        pel += if chroma { 2 } else { 1 };
    }
}

fn deblock_edge_ver(buf: &mut [Pel], pos: usize, stride: usize, alpha: i32, beta: i32, flags: [bool; 2]) {
    deblock_edge_core(buf, pos, false, stride, 1, alpha, beta, flags);
}

fn deblock_edge_hor(buf: &mut [Pel], pos: usize, stride: usize, alpha: i32, beta: i32, flags: [bool; 2]) {
    deblock_edge_core(buf, pos, false, 1, stride, alpha, beta, flags);
}

fn deblock_edge_ver_c(buf: &mut [Pel], pos: usize, stride: usize, alpha: i32, beta: i32, flags: [bool; 2]) {
    deblock_edge_core(buf, pos, true, stride, 1, alpha, beta, flags);
}

fn deblock_edge_hor_c(buf: &mut [Pel], pos: usize, stride: usize, alpha: i32, beta: i32, flags: [bool; 2]) {
    deblock_edge_core(buf, pos, true, 1, stride, alpha, beta, flags);
}

/* ---------------------------------------------------------------------------
 * motion-compensation interpolation
 */

/// Luma sub-pel filters, quarter-sample positions.
pub const INTPL_LUMA: [[i32; 8]; 4] = [
    [0, 0, 0, 64, 0, 0, 0, 0],
    [-1, 4, -10, 57, 19, -7, 3, -1],
    [-1, 4, -11, 40, 40, -11, 4, -1],
    [-1, 3, -7, 19, 57, -10, 4, -1],
];

/// Chroma sub-pel filters, eighth-sample positions.
pub const INTPL_CHROMA: [[i32; 4]; 8] = [
    [0, 64, 0, 0],
    [-2, 58, 10, -2],
    [-4, 54, 16, -2],
    [-6, 46, 28, -4],
    [-4, 36, 36, -4],
    [-4, 28, 46, -6],
    [-2, 16, 54, -4],
    [-2, 10, 58, -2],
];

fn clip_pel(v: i32, max_pel: i32) -> Pel {
    v.clamp(0, max_pel) as Pel
}

/// Generic separable interpolation of a `width` x `height` block.
///
/// `src`/`src_pos` address the integer-pel position inside a padded plane;
/// fractional offsets select the filter rows. `taps` is 8 for luma, 4 for
/// chroma.
#[allow(clippy::too_many_arguments)]
pub fn interpolate_block(
    src: &[Pel],
    src_pos: usize,
    src_stride: usize,
    dst: &mut [Pel],
    dst_pos: usize,
    dst_stride: usize,
    width: usize,
    height: usize,
    frac_x: usize,
    frac_y: usize,
    luma: bool,
    bit_depth: i32,
) {
    let max_pel = (1i32 << bit_depth) - 1;
    let (taps, center) = if luma { (8usize, 3usize) } else { (4usize, 1usize) };
    let coeff_x: &[i32] = if luma {
        &INTPL_LUMA[frac_x]
    } else {
        &INTPL_CHROMA[frac_x]
    };
    let coeff_y: &[i32] = if luma {
        &INTPL_LUMA[frac_y]
    } else {
        &INTPL_CHROMA[frac_y]
    };

    if frac_x == 0 && frac_y == 0 {
        for y in 0..height {
            let s = src_pos + y * src_stride;
            let d = dst_pos + y * dst_stride;
            dst[d..d + width].copy_from_slice(&src[s..s + width]);
        }
        return;
    }

    if frac_y == 0 {
        // horizontal only
        for y in 0..height {
            for x in 0..width {
                let base = src_pos + y * src_stride + x - center;
                let mut acc = 0i32;
                for (t, &c) in coeff_x.iter().enumerate().take(taps) {
                    acc += c * i32::from(src[base + t]);
                }
                dst[dst_pos + y * dst_stride + x] = clip_pel((acc + 32) >> 6, max_pel);
            }
        }
        return;
    }

    if frac_x == 0 {
        // vertical only
        for y in 0..height {
            for x in 0..width {
                let base = src_pos + y * src_stride + x - center * src_stride;
                let mut acc = 0i32;
                for (t, &c) in coeff_y.iter().enumerate().take(taps) {
                    acc += c * i32::from(src[base + t * src_stride]);
                }
                dst[dst_pos + y * dst_stride + x] = clip_pel((acc + 32) >> 6, max_pel);
            }
        }
        return;
    }

    // separable: horizontal into a 20-bit intermediate, then vertical
    let tmp_h = height + taps - 1;
    let mut tmp = vec![0i32; width * tmp_h];
    for y in 0..tmp_h {
        for x in 0..width {
            let base = src_pos + y * src_stride + x - center * src_stride - center;
            let mut acc = 0i32;
            for (t, &c) in coeff_x.iter().enumerate().take(taps) {
                acc += c * i32::from(src[base + t]);
            }
            tmp[y * width + x] = acc;
        }
    }
    for y in 0..height {
        for x in 0..width {
            let mut acc = 0i64;
            for (t, &c) in coeff_y.iter().enumerate().take(taps) {
                acc += i64::from(c) * i64::from(tmp[(y + t) * width + x]);
            }
            dst[dst_pos + y * dst_stride + x] = clip_pel(((acc + 2048) >> 12) as i32, max_pel);
        }
    }
}

/* ---------------------------------------------------------------------------
 * intra prediction
 */

/// Neighboring sample availability for intra prediction.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntraAvail {
    pub left: bool,
    pub top: bool,
    pub top_left: bool,
    pub top_right: bool,
    pub left_down: bool,
}

/// The edge-pixel buffer: `edge[center]` is the top-left corner,
/// `edge[center + 1..]` runs right along the top, `edge[center - 1..]` runs
/// down the left side.
pub struct EdgeBuf {
    pub pixels: Vec<Pel>,
    pub center: usize,
}

impl EdgeBuf {
    pub fn new(block: usize) -> Self {
        let center = 4 * block + 16;
        EdgeBuf {
            pixels: vec![0; 2 * center + 1],
            center,
        }
    }

    pub fn top(&self, i: isize) -> Pel {
        self.pixels[(self.center as isize + i) as usize]
    }
}

/// DC prediction with the standard's availability-dependent rounding.
pub fn intra_pred_dc(
    edge: &EdgeBuf,
    dst: &mut [Pel],
    dst_pos: usize,
    stride: usize,
    bsx: usize,
    bsy: usize,
    avail: IntraAvail,
    bit_depth: i32,
) {
    let dc_value = 1i32 << (bit_depth - 1);
    let mut sum = 0i32;
    let mut count = 0i32;
    if avail.top {
        for x in 0..bsx {
            sum += i32::from(edge.top(1 + x as isize));
        }
        count += bsx as i32;
    }
    if avail.left {
        for y in 0..bsy {
            sum += i32::from(edge.top(-1 - y as isize));
        }
        count += bsy as i32;
    }
    let val = if count > 0 {
        (sum + count / 2) / count
    } else {
        dc_value
    };
    for y in 0..bsy {
        for x in 0..bsx {
            dst[dst_pos + y * stride + x] = val as Pel;
        }
    }
}

/// Plane (gradient) prediction.
#[allow(clippy::too_many_arguments)]
pub fn intra_pred_plane(
    edge: &EdgeBuf,
    dst: &mut [Pel],
    dst_pos: usize,
    stride: usize,
    bsx: usize,
    bsy: usize,
    bit_depth: i32,
) {
    let max_pel = (1i32 << bit_depth) - 1;
    let (w2, h2) = (bsx as i32 / 2, bsy as i32 / 2);
    let mut ih = 0i32;
    let mut iv = 0i32;
    for i in 1..=w2 {
        ih += i * (i32::from(edge.top((w2 + i) as isize)) - i32::from(edge.top((w2 - i) as isize)));
    }
    for i in 1..=h2 {
        iv += i
            * (i32::from(edge.top(-(h2 + i) as isize)) - i32::from(edge.top(-(h2 - i) as isize)));
    }
    let ib = (5 * ih / (bsx as i32)) / 4;
    let ic = (5 * iv / (bsy as i32)) / 4;
    let iaa = 16
        * (i32::from(edge.top(bsx as isize)) + i32::from(edge.top(-(bsy as isize))));

    for y in 0..bsy as i32 {
        for x in 0..bsx as i32 {
            let v = (iaa + (x - w2 + 1) * ib + (y - h2 + 1) * ic + 16) >> 5;
            dst[dst_pos + y as usize * stride + x as usize] = v.clamp(0, max_pel) as Pel;
        }
    }
}

/// Bilinear prediction blending the top and left edges.
#[allow(clippy::too_many_arguments)]
pub fn intra_pred_bilinear(
    edge: &EdgeBuf,
    dst: &mut [Pel],
    dst_pos: usize,
    stride: usize,
    bsx: usize,
    bsy: usize,
    bit_depth: i32,
) {
    let max_pel = (1i32 << bit_depth) - 1;
    let (w, h) = (bsx as i32, bsy as i32);
    let corner_t = i32::from(edge.top(w as isize));
    let corner_l = i32::from(edge.top(-(h as isize)));
    for y in 0..h {
        let left = i32::from(edge.top(-1 - y as isize));
        for x in 0..w {
            let top = i32::from(edge.top(1 + x as isize));
            let pred_h = top + (y + 1) * (corner_l - top) / (h + 1);
            let pred_v = left + (x + 1) * (corner_t - left) / (w + 1);
            let v = (pred_h + pred_v + 1) >> 1;
            dst[dst_pos + y as usize * stride + x as usize] = v.clamp(0, max_pel) as Pel;
        }
    }
}

/// Angular prediction. `dir` follows the standard's mode numbering: 3..=12
/// are vertical-ish (12 = pure vertical), 13..=23 mixed, 24..=32
/// horizontal-ish (24 = pure horizontal).
#[allow(clippy::too_many_arguments)]
pub fn intra_pred_angle(
    edge: &EdgeBuf,
    dst: &mut [Pel],
    dst_pos: usize,
    stride: usize,
    bsx: usize,
    bsy: usize,
    dir: i32,
) {
    // displacement per row (vertical family) or column (horizontal family),
    // in 1/8 sample units
    const OFFSETS: [i32; 15] = [-32, -26, -21, -17, -13, -9, -6, -4, -2, 0, 2, 4, 6, 9, 13];

    let vertical = dir <= 17;
    let idx = if vertical {
        (dir - 3).clamp(0, 14)
    } else {
        (32 - dir).clamp(0, 14)
    };
    let step = OFFSETS[idx as usize];

    for y in 0..bsy {
        for x in 0..bsx {
            let (main, disp) = if vertical {
                (x as i32, ((y as i32 + 1) * step) >> 3)
            } else {
                (y as i32, ((x as i32 + 1) * step) >> 3)
            };
            let frac = if vertical {
                ((y as i32 + 1) * step) & 7
            } else {
                ((x as i32 + 1) * step) & 7
            };
            let base = main + disp;
            let sample = |i: i32| -> i32 {
                if vertical {
                    i32::from(edge.top(1 + i as isize))
                } else {
                    i32::from(edge.top(-1 - i as isize))
                }
            };
            let v = if frac == 0 {
                sample(base)
            } else {
                (sample(base) * (8 - frac) + sample(base + 1) * frac + 4) >> 3
            };
            dst[dst_pos + y * stride + x] = v as Pel;
        }
    }
}

/* ---------------------------------------------------------------------------
 * SAO
 */

/// SAO parameters of one component block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaoBlockParam {
    pub mode: SaoMode,
    pub type_idc: i32,
    pub start_band: i32,
    pub start_band2: i32,
    pub offset: [i32; 32],
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SaoMode {
    #[default]
    Off,
    Merge,
    New,
}

pub const SAO_TYPE_EO_0: i32 = 0;
pub const SAO_TYPE_EO_90: i32 = 1;
pub const SAO_TYPE_EO_135: i32 = 2;
pub const SAO_TYPE_EO_45: i32 = 3;
pub const SAO_TYPE_BO: i32 = 4;

/// Apply SAO to a block, reading from `src` and writing `dst` (distinct
/// buffers; edge offsets must not feed on filtered samples).
#[allow(clippy::too_many_arguments)]
pub fn sao_block(
    dst: &mut [Pel],
    dst_pos: usize,
    dst_stride: usize,
    src: &[Pel],
    src_pos: usize,
    src_stride: usize,
    width: usize,
    height: usize,
    param: &SaoBlockParam,
    bit_depth: i32,
) {
    let max_pel = (1i32 << bit_depth) - 1;
    let band_shift = bit_depth - 5;

    let (dx, dy) = match param.type_idc {
        SAO_TYPE_EO_0 => (1isize, 0isize),
        SAO_TYPE_EO_90 => (0, 1),
        SAO_TYPE_EO_135 => (1, 1),
        SAO_TYPE_EO_45 => (1, -1),
        _ => (0, 0),
    };

    for y in 0..height {
        for x in 0..width {
            let s = src_pos + y * src_stride + x;
            let cur = i32::from(src[s]);
            let off = if param.type_idc == SAO_TYPE_BO {
                let band = cur >> band_shift;
                param.offset[band as usize & 31]
            } else {
                let a = i32::from(
                    src[(s as isize - dy * src_stride as isize - dx) as usize],
                );
                let b = i32::from(
                    src[(s as isize + dy * src_stride as isize + dx) as usize],
                );
                let edge_type = (cur - a).signum() + (cur - b).signum() + 2;
                param.offset[edge_type as usize]
            };
            dst[dst_pos + y * dst_stride + x] = (cur + off).clamp(0, max_pel) as Pel;
        }
    }
}

/* ---------------------------------------------------------------------------
 * ALF
 */

/// Cross-shaped 7x7 adaptive loop filter with 9 coefficients (8 symmetric
/// taps plus center).
#[allow(clippy::too_many_arguments)]
pub fn alf_block(
    dst: &mut [Pel],
    dst_pos: usize,
    dst_stride: usize,
    src: &[Pel],
    src_pos: usize,
    src_stride: usize,
    width: usize,
    height: usize,
    coeff: &[i32; 9],
    bit_depth: i32,
) {
    const TAPS: [(isize, isize, usize); 8] = [
        (0, -3, 0),
        (0, -2, 1),
        (-1, -1, 2),
        (0, -1, 3),
        (1, -1, 4),
        (-3, 0, 5),
        (-2, 0, 6),
        (-1, 0, 7),
    ];
    let max_pel = (1i32 << bit_depth) - 1;

    for y in 0..height as isize {
        for x in 0..width as isize {
            let at = |px: isize, py: isize| -> i32 {
                let cx = px.clamp(0, width as isize - 1);
                let cy = py.clamp(0, height as isize - 1);
                i32::from(src[(src_pos as isize + cy * src_stride as isize + cx) as usize])
            };
            let mut acc = coeff[8] * at(x, y);
            for &(tx, ty, ci) in TAPS.iter() {
                acc += coeff[ci] * (at(x + tx, y + ty) + at(x - tx, y - ty));
            }
            let v = (acc + 32) >> 6;
            dst[(dst_pos as isize + y * dst_stride as isize + x) as usize] =
                v.clamp(0, max_pel) as Pel;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::cpu::CpuFlags;

    #[test]
    fn basis_matches_known_rows() {
        let t4 = basis(4);
        assert_eq!(t4[0], [32, 32, 32, 32]);
        assert_eq!(t4[1], [42, 17, -17, -42]);
        assert_eq!(t4[2], [32, -32, -32, 32]);
        assert_eq!(t4[3], [17, -42, 42, -17]);

        let t8 = basis(8);
        assert_eq!(t8[1], [44, 38, 25, 9, -9, -25, -38, -44]);

        let t16 = basis(16);
        assert_eq!(&t16[1][..8], [45, 43, 40, 35, 29, 21, 13, 4]);
    }

    #[test]
    fn dc_only_inverse_transform_is_flat() {
        let k = Kernels::new(CpuFlags::empty());
        let mut coeffs = vec![0 as Coeff; 16];
        coeffs[0] = 64;
        k.inverse_transform(&mut coeffs, 4, 4, 8);
        let first = coeffs[0];
        assert!(coeffs.iter().all(|&c| c == first), "flat block expected");
        assert!(first != 0);
    }

    #[test]
    fn dequant_rounds_and_clamps() {
        let mut c: Vec<Coeff> = vec![2, -2, 0, 1000];
        dequant_scalar(&mut c, 4, 32768, 14);
        assert_eq!(c[0], 4);
        assert_eq!(c[1], -4);
        assert_eq!(c[2], 0);
        assert_eq!(c[3], 2000);
    }

    #[test]
    fn unity_weight_matches_plain_dequant() {
        let unity = WqMatrices {
            m4: [64; 16],
            m8: [64; 64],
        };
        let src: Vec<Coeff> = (0..64).map(|i| (i * 7 - 200) as Coeff).collect();
        let mut plain = src.clone();
        let mut weighted = src.clone();
        dequant_scalar(&mut plain, 64, 42495, 11);
        dequant_wq_scalar(&mut weighted, 8, 8, 42495, 11, &unity);
        assert_eq!(plain, weighted);
    }

    #[test]
    fn heavier_weights_scale_the_band_up() {
        let mut wq = WqMatrices {
            m4: [64; 16],
            m8: [64; 64],
        };
        wq.m8[1] = 128; // double the first AC column weight
        let mut c = vec![0 as Coeff; 64];
        c[0] = 100;
        c[1] = 100;
        dequant_wq_scalar(&mut c, 8, 8, 32768, 14, &wq);
        assert_eq!(c[1], c[0] * 2);
    }

    #[test]
    fn secondary_transform_gates_on_availability() {
        let src: Vec<Coeff> = (0..16).map(|i| (i * 3) as Coeff).collect();
        let mut c = src.clone();
        // DC mode wants both passes, but neither neighbor is available
        inv_transform_2nd_scalar(&mut c, 4, 0, false, false);
        assert_eq!(c, src);
        // with neighbors present the corner is rotated
        inv_transform_2nd_scalar(&mut c, 4, 0, true, true);
        assert_ne!(c, src);
    }

    #[test]
    fn secondary_4x4_transform_stays_in_range() {
        let mut c = vec![0 as Coeff; 16];
        c[0] = 64;
        inv_transform_4x4_2nd_scalar(&mut c, 4, 8);
        assert!(c.iter().any(|&v| v != 0));
        assert!(c.iter().all(|&v| (-256..=255).contains(&v)));
    }

    #[test]
    fn deblock_leaves_flat_area_alone() {
        // |R0 - L0| <= 1 never filters
        let stride = 16;
        let mut buf = vec![100 as Pel; stride * 16];
        let before = buf.clone();
        deblock_edge_ver(&mut buf, 8 * stride + 8, stride, 22, 5, [true, true]);
        assert_eq!(buf, before);
    }

    #[test]
    fn deblock_smooths_strong_step() {
        let stride = 32;
        let mut buf = vec![0 as Pel; stride * 16];
        for y in 0..12 {
            for x in 0..stride {
                buf[y * stride + x] = if x < 16 { 60 } else { 100 };
            }
        }
        deblock_edge_ver(&mut buf, 16, stride, 58, 27, [true, true]);
        let l0 = buf[15];
        let r0 = buf[16];
        assert!(l0 > 60 && r0 < 100, "step should be softened: {l0} {r0}");
    }

    #[test]
    fn copy_interpolation_is_exact() {
        let src: Vec<Pel> = (0..64 * 64).map(|i| (i % 251) as Pel).collect();
        let mut dst = vec![0 as Pel; 16 * 16];
        interpolate_block(&src, 64 * 8 + 8, 64, &mut dst, 0, 16, 16, 16, 0, 0, true, 8);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(dst[y * 16 + x], src[(y + 8) * 64 + (x + 8)]);
            }
        }
    }

    #[test]
    fn half_pel_interpolation_of_flat_block_is_flat() {
        let src = vec![77 as Pel; 64 * 64];
        let mut dst = vec![0 as Pel; 8 * 8];
        interpolate_block(&src, 64 * 16 + 16, 64, &mut dst, 0, 8, 8, 8, 2, 2, true, 8);
        assert!(dst.iter().all(|&p| p == 77));
    }

    #[test]
    fn sao_band_offset_applies_to_matching_band() {
        let mut param = SaoBlockParam {
            mode: SaoMode::New,
            type_idc: SAO_TYPE_BO,
            ..Default::default()
        };
        // band of value 80 at 8 bit: 80 >> 3 == 10
        param.offset[10] = 3;
        let src = vec![80 as Pel; 8 * 8];
        let mut dst = vec![0 as Pel; 8 * 8];
        sao_block(&mut dst, 0, 8, &src, 0, 8, 8, 8, &param, 8);
        assert!(dst.iter().all(|&p| p == 83));
    }

    #[test]
    fn intra_dc_without_neighbors_uses_mid_gray() {
        let edge = EdgeBuf::new(16);
        let mut dst = vec![0 as Pel; 16 * 16];
        intra_pred_dc(
            &edge,
            &mut dst,
            0,
            16,
            16,
            16,
            IntraAvail::default(),
            8,
        );
        assert!(dst.iter().all(|&p| p == 128));
    }

    #[test]
    fn intra_dc_averages_top_and_left() {
        let mut edge = EdgeBuf::new(4);
        for i in 1..=4 {
            edge.pixels[edge.center + i] = 40; // top
            edge.pixels[edge.center - i] = 80; // left
        }
        let mut dst = vec![0 as Pel; 16];
        let avail = IntraAvail {
            left: true,
            top: true,
            ..Default::default()
        };
        intra_pred_dc(&edge, &mut dst, 0, 4, 4, 4, avail, 8);
        assert!(dst.iter().all(|&p| p == 60));
    }
}
