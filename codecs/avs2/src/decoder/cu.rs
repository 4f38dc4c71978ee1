//! CU quadtree parsing and block reconstruction.

use super::dpb::{Frame, Pel};
use super::kernels::{
    self, Coeff, EdgeBuf, IntraAvail, SaoBlockParam, SaoMode, SAO_TYPE_BO,
};
use super::picture::PictureDecoder;
use super::quant;
use crate::types::{
    MotionVector, PictureType, RefIndices, SequenceTools, MAX_REFS, MIN_CU_SIZE_IN_BIT,
    MIN_PU_SIZE_IN_BIT,
};

/// Prediction mode of a CU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CuPredMode {
    #[default]
    Skip,
    Inter2Nx2N,
    Inter2NxN,
    InterNx2N,
    Inter2NxnU,
    Inter2NxnD,
    InterNLx2N,
    InterNRx2N,
    Intra2Nx2N,
    IntraNxN,
    Intra2Nxn,
    IntraNx2N,
}

impl CuPredMode {
    pub fn is_intra(self) -> bool {
        matches!(
            self,
            CuPredMode::Intra2Nx2N | CuPredMode::IntraNxN | CuPredMode::Intra2Nxn | CuPredMode::IntraNx2N
        )
    }

    pub fn is_skip(self) -> bool {
        self == CuPredMode::Skip
    }

    /// Horizontally-split PU shapes (for NSQT transform boundaries).
    pub fn is_hor_part(self) -> bool {
        matches!(
            self,
            CuPredMode::Inter2NxN | CuPredMode::Inter2NxnU | CuPredMode::Inter2NxnD | CuPredMode::Intra2Nxn
        )
    }

    pub fn is_ver_part(self) -> bool {
        matches!(
            self,
            CuPredMode::InterNx2N | CuPredMode::InterNLx2N | CuPredMode::InterNRx2N | CuPredMode::IntraNx2N
        )
    }
}

/// Transform split of a CU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TuSplit {
    #[default]
    None,
    Cross,
}

/// Per-SCU record consumed by the deblock stage and neighbor derivations.
#[derive(Debug, Clone, Copy, Default)]
pub struct CuInfo {
    pub level: u8,
    pub cu_type: CuPredMode,
    pub slice_index: u8,
    pub qp: i8,
    pub cbp: u8,
    pub trans_size: TuSplit,
    pub decoded: bool,
}

/// Zigzag scan of a 4x4 coefficient group.
const SCAN_4X4: [(usize, usize); 16] = [
    (0, 0),
    (1, 0),
    (0, 1),
    (0, 2),
    (1, 1),
    (2, 0),
    (3, 0),
    (2, 1),
    (1, 2),
    (0, 3),
    (1, 3),
    (2, 2),
    (3, 1),
    (3, 2),
    (2, 3),
    (3, 3),
];

impl PictureDecoder {
    /// Parse and reconstruct one LCU.
    pub fn decode_lcu_tree(&mut self, lcu_x: usize, lcu_y: usize) {
        let px = lcu_x << self.lcu_level;
        let py = lcu_y << self.lcu_level;
        self.decode_cu_tree(self.lcu_level, px, py);
        // LCU terminator bin keeps the bit cursor honest
        let _ = self.aec.decode_final();
    }

    fn decode_cu_tree(&mut self, level: usize, px: usize, py: usize) {
        if px >= self.width || py >= self.height || self.decoding_error || self.aec.bit_error {
            return;
        }
        let size = 1usize << level;

        let split = if level == MIN_CU_SIZE_IN_BIT {
            false
        } else if px + size > self.width || py + size > self.height {
            // partially outside: always split
            true
        } else {
            let ctx_idx = (level - 4).min(2);
            let ctx = &mut self.ctx.cu_split_flag[ctx_idx];
            self.aec.decode_bin(ctx) != 0
        };

        if split {
            let half = size >> 1;
            self.decode_cu_tree(level - 1, px, py);
            self.decode_cu_tree(level - 1, px + half, py);
            self.decode_cu_tree(level - 1, px, py + half);
            self.decode_cu_tree(level - 1, px + half, py + half);
        } else {
            self.decode_cu(level, px, py);
        }
    }

    fn decode_cu(&mut self, level: usize, px: usize, py: usize) {
        let cu_type = self.decode_cu_type(level);

        if !self.fixed_qp && !cu_type.is_skip() {
            let mut first = self.ctx.delta_qp[0];
            let mut rest = self.ctx.delta_qp[1];
            let v = self.aec.decode_unary(&mut first, &mut rest, 32) as i32;
            self.ctx.delta_qp[0] = first;
            self.ctx.delta_qp[1] = rest;
            // zigzag map to signed
            let dqp = if v & 1 != 0 { (v + 1) / 2 } else { -(v / 2) };
            self.last_dqp = dqp;
            self.qp += dqp;
        }

        let cbp = if cu_type.is_intra() {
            self.decode_intra_cu(level, px, py, cu_type)
        } else {
            self.decode_inter_cu(level, px, py, cu_type)
        };

        let trans_size = if cbp != 0
            && level > MIN_CU_SIZE_IN_BIT
            && !cu_type.is_intra()
            && {
                let ctx = &mut self.ctx.transform_split_flag[(level - 4).min(2)];
                self.aec.decode_bin(ctx) != 0
            } {
            TuSplit::Cross
        } else {
            TuSplit::None
        };

        self.store_cu_info(level, px, py, cu_type, cbp, trans_size);

        // residual for the coded blocks
        if cbp != 0 {
            self.decode_residual(level, px, py, cu_type, cbp, trans_size);
        }
    }

    /// Intra PU shape: square, four quads at 8x8, or (with SDIP) four
    /// strips for 16 and 32 CUs.
    fn decode_intra_pu_shape(&mut self, level: usize) -> CuPredMode {
        if level == MIN_CU_SIZE_IN_BIT {
            let ctx = &mut self.ctx.intra_pu_type[0];
            if self.aec.decode_bin(ctx) != 0 {
                return CuPredMode::IntraNxN;
            }
            return CuPredMode::Intra2Nx2N;
        }

        if self.seq.tools.contains(SequenceTools::SDIP) && (4..=5).contains(&level) {
            let ctx = &mut self.ctx.intra_pu_type[0];
            if self.aec.decode_bin(ctx) != 0 {
                return if self.aec.decode_bypass() != 0 {
                    CuPredMode::IntraNx2N
                } else {
                    CuPredMode::Intra2Nxn
                };
            }
        }
        CuPredMode::Intra2Nx2N
    }

    fn decode_cu_type(&mut self, level: usize) -> CuPredMode {
        if self.hdr.picture_type.is_intra() {
            // only the PU shape is coded
            return self.decode_intra_pu_shape(level);
        }

        // skip flag first
        {
            let ctx = &mut self.ctx.cu_type[0];
            if self.aec.decode_bin(ctx) != 0 {
                return CuPredMode::Skip;
            }
        }

        // unary-coded inter shapes, then intra
        let amp = self.seq.tools.contains(SequenceTools::AMP) && level > MIN_CU_SIZE_IN_BIT + 1;
        let max = if amp { 5 } else { 3 };
        let mut value = 0;
        loop {
            let idx = (value + 1).min(self.ctx.cu_type.len() - 1);
            let ctx = &mut self.ctx.cu_type[idx];
            if self.aec.decode_bin(ctx) == 0 {
                break;
            }
            value += 1;
            if value >= max {
                break;
            }
        }

        match value {
            0 => CuPredMode::Inter2Nx2N,
            1 => CuPredMode::Inter2NxN,
            2 => CuPredMode::InterNx2N,
            3 if amp => {
                // refine the asymmetric shape
                let hor = {
                    let ctx = &mut self.ctx.shape_of_partition[0];
                    self.aec.decode_bin(ctx) != 0
                };
                let second = {
                    let ctx = &mut self.ctx.shape_of_partition[1];
                    self.aec.decode_bin(ctx) != 0
                };
                match (hor, second) {
                    (true, false) => CuPredMode::Inter2NxnU,
                    (true, true) => CuPredMode::Inter2NxnD,
                    (false, false) => CuPredMode::InterNLx2N,
                    (false, true) => CuPredMode::InterNRx2N,
                }
            }
            _ => self.decode_intra_pu_shape(level),
        }
    }

    /* -----------------------------------------------------------------
     * intra path
     */

    fn decode_intra_cu(&mut self, level: usize, px: usize, py: usize, cu_type: CuPredMode) -> u8 {
        let size = 1usize << level;

        let pus: Vec<(usize, usize, usize, usize)> = match cu_type {
            CuPredMode::IntraNxN => (0..4)
                .map(|i| {
                    (
                        px + (i & 1) * (size / 2),
                        py + (i >> 1) * (size / 2),
                        size / 2,
                        size / 2,
                    )
                })
                .collect(),
            CuPredMode::Intra2Nxn => (0..4)
                .map(|i| (px, py + i * (size / 4), size, size / 4))
                .collect(),
            CuPredMode::IntraNx2N => (0..4)
                .map(|i| (px + i * (size / 4), py, size / 4, size))
                .collect(),
            _ => vec![(px, py, size, size)],
        };

        for (sub_x, sub_y, pu_w, pu_h) in pus {
            let mode = self.decode_intra_luma_mode(sub_x, sub_y);
            self.store_ipred_mode(sub_x, sub_y, pu_w, pu_h, mode);
            self.reconstruct_intra_block(0, sub_x, sub_y, pu_w, pu_h, mode);
        }

        // chroma mode applies to the whole CU
        let chroma_mode = self.decode_intra_chroma_mode();
        if self.frame.num_planes() > 1 {
            let luma_mode =
                self.ipred_grid[self.spu_index(px >> MIN_PU_SIZE_IN_BIT, py >> MIN_PU_SIZE_IN_BIT)];
            let mode = match chroma_mode {
                0 => i32::from(luma_mode.max(0)), // DM: follow luma
                1 => 0,                           // DC
                2 => 24,                          // horizontal
                3 => 12,                          // vertical
                _ => 2,                           // bilinear
            };
            for comp in 1..3 {
                self.reconstruct_intra_block(comp, px / 2, py / 2, size / 2, size / 2, mode);
            }
        }

        self.decode_cbp(true)
    }

    fn decode_intra_luma_mode(&mut self, px: usize, py: usize) -> i32 {
        let spu_x = px >> MIN_PU_SIZE_IN_BIT;
        let spu_y = py >> MIN_PU_SIZE_IN_BIT;
        let left = if spu_x > 0 {
            self.ipred_grid[self.spu_index(spu_x - 1, spu_y)]
        } else {
            -1
        };
        let top = if spu_y > 0 {
            self.ipred_grid[self.spu_index(spu_x, spu_y - 1)]
        } else {
            -1
        };

        // most-probable-mode pair, DC filling the gaps
        let mut mpm0 = i32::from(left.max(0));
        let mut mpm1 = i32::from(top.max(0));
        if mpm0 == mpm1 {
            mpm0 = 0;
            mpm1 = if mpm1 == 0 { 2 } else { mpm1 };
        }
        if mpm0 > mpm1 {
            std::mem::swap(&mut mpm0, &mut mpm1);
        }

        let is_mpm = {
            let ctx = &mut self.ctx.intra_luma_pred_mode[0];
            self.aec.decode_bin(ctx) != 0
        };
        if is_mpm {
            let which = self.aec.decode_bypass();
            if which == 0 {
                mpm0
            } else {
                mpm1
            }
        } else {
            let mut mode = self.aec.decode_bypass_bits(5) as i32;
            // the fixed-length code skips over the two MPMs
            if mode >= mpm0 {
                mode += 1;
            }
            if mode >= mpm1 {
                mode += 1;
            }
            mode.min(32)
        }
    }

    fn decode_intra_chroma_mode(&mut self) -> u32 {
        let mut first = self.ctx.intra_chroma_pred_mode[0];
        let mut rest = self.ctx.intra_chroma_pred_mode[1];
        let v = self.aec.decode_unary(&mut first, &mut rest, 4);
        self.ctx.intra_chroma_pred_mode[0] = first;
        self.ctx.intra_chroma_pred_mode[1] = rest;
        v
    }

    fn store_ipred_mode(&mut self, px: usize, py: usize, w: usize, h: usize, mode: i32) {
        for sy in (py >> MIN_PU_SIZE_IN_BIT)..((py + h) >> MIN_PU_SIZE_IN_BIT) {
            for sx in (px >> MIN_PU_SIZE_IN_BIT)..((px + w) >> MIN_PU_SIZE_IN_BIT) {
                let idx = self.spu_index(sx, sy);
                self.ipred_grid[idx] = mode as i8;
            }
        }
    }

    /// Predict one intra block straight into the frame.
    fn reconstruct_intra_block(
        &mut self,
        comp: usize,
        px: usize,
        py: usize,
        w: usize,
        h: usize,
        mode: i32,
    ) {
        let plane = self.frame.plane(comp);
        let stride = plane.stride();
        let lcu_mask = if comp == 0 {
            self.lcu_size - 1
        } else {
            (self.lcu_size >> 1) - 1
        };

        // collect the one-pixel border from already-reconstructed samples
        let mut edge = EdgeBuf::new(w.max(h));
        let mut avail = IntraAvail::default();

        let slice_of = |s: &PictureDecoder, x: usize, y: usize| -> u8 {
            let scu_x = (x << comp.min(1)) >> MIN_CU_SIZE_IN_BIT;
            let scu_y = (y << comp.min(1)) >> MIN_CU_SIZE_IN_BIT;
            let idx = s.scu_index(
                scu_x.min(s.width_in_scu - 1),
                scu_y.min(s.height_in_scu - 1),
            );
            s.scu[idx].slice_index
        };
        let cur_slice = self.cur_slice_index;

        avail.left = px > 0 && slice_of(self, px - 1, py) == cur_slice;
        avail.top = py > 0 && slice_of(self, px, py - 1) == cur_slice;
        avail.top_left = avail.left && avail.top;
        avail.top_right = avail.top && (px + w) % (lcu_mask + 1) != 0;
        avail.left_down = false;

        // SAFETY: producer-side reads of this frame's reconstructed area.
        let buf = unsafe { plane.buf_mut() };
        let at_row_border = py > 0 && py & lcu_mask == 0;

        if avail.top {
            for i in 0..(2 * w).min(edge.center) {
                let x = (px + i).min(plane.width() - 1);
                let v = if at_row_border {
                    self.intra_border[comp][x]
                } else {
                    buf[plane.index(x as isize, py as isize - 1)]
                };
                edge.pixels[edge.center + 1 + i] = v;
            }
            if !avail.top_right {
                let last = edge.pixels[edge.center + w];
                for i in w..(2 * w).min(edge.center) {
                    edge.pixels[edge.center + 1 + i] = last;
                }
            }
        }
        if avail.left {
            for i in 0..(2 * h).min(edge.center) {
                let y = (py + i).min(plane.lines() - 1);
                edge.pixels[edge.center - 1 - i] = buf[plane.index(px as isize - 1, y as isize)];
            }
        }
        if avail.top_left {
            let v = if at_row_border {
                self.intra_border[comp][px - 1]
            } else {
                buf[plane.index(px as isize - 1, py as isize - 1)]
            };
            edge.pixels[edge.center] = v;
        }

        let pos = plane.index(px as isize, py as isize);
        match mode {
            0 => kernels::intra_pred_dc(&edge, buf, pos, stride, w, h, avail, self.bit_depth),
            1 => kernels::intra_pred_plane(&edge, buf, pos, stride, w, h, self.bit_depth),
            2 => kernels::intra_pred_bilinear(&edge, buf, pos, stride, w, h, self.bit_depth),
            m => kernels::intra_pred_angle(&edge, buf, pos, stride, w, h, m),
        }
    }

    /* -----------------------------------------------------------------
     * inter path
     */

    fn decode_inter_cu(&mut self, level: usize, px: usize, py: usize, cu_type: CuPredMode) -> u8 {
        let size = 1usize << level;
        let b_frame = self.hdr.picture_type == PictureType::B;

        if cu_type.is_skip() {
            self.reconstruct_skip(level, px, py);
            return 0;
        }

        // PU layout
        let pus: Vec<(usize, usize, usize, usize)> = match cu_type {
            CuPredMode::Inter2Nx2N => vec![(px, py, size, size)],
            CuPredMode::Inter2NxN => vec![
                (px, py, size, size / 2),
                (px, py + size / 2, size, size / 2),
            ],
            CuPredMode::InterNx2N => vec![
                (px, py, size / 2, size),
                (px + size / 2, py, size / 2, size),
            ],
            CuPredMode::Inter2NxnU => vec![
                (px, py, size, size / 4),
                (px, py + size / 4, size, size - size / 4),
            ],
            CuPredMode::Inter2NxnD => vec![
                (px, py, size, size - size / 4),
                (px, py + size - size / 4, size, size / 4),
            ],
            CuPredMode::InterNLx2N => vec![
                (px, py, size / 4, size),
                (px + size / 4, py, size - size / 4, size),
            ],
            CuPredMode::InterNRx2N => vec![
                (px, py, size - size / 4, size),
                (px + size - size / 4, py, size / 4, size),
            ],
            _ => vec![(px, py, size, size)],
        };

        for &(bx, by, bw, bh) in &pus {
            // prediction direction
            let bidir = b_frame && {
                let ctx = &mut self.ctx.pu_type_index[0];
                self.aec.decode_bin(ctx) != 0
            };
            let backward = b_frame && !bidir && {
                let ctx = &mut self.ctx.pu_type_index[1];
                self.aec.decode_bin(ctx) != 0
            };

            // F pictures may add a second hypothesis from another reference
            let dual = self.hdr.picture_type == PictureType::F
                && self.seq.tools.contains(SequenceTools::DHP)
                && self.refs.len() >= 2
                && {
                    let ctx = &mut self.ctx.inter_dir_dhp[0];
                    self.aec.decode_bin(ctx) != 0
                };

            // reference indices
            let num_refs = self.refs.len().max(1);
            let ref_1st = if b_frame {
                if backward {
                    0
                } else {
                    1.min(num_refs - 1)
                }
            } else if num_refs > 1 {
                let mut first = self.ctx.pu_reference_index[0];
                let mut rest = self.ctx.pu_reference_index[1];
                let v = self
                    .aec
                    .decode_unary(&mut first, &mut rest, num_refs as u32 - 1)
                    as usize;
                self.ctx.pu_reference_index[0] = first;
                self.ctx.pu_reference_index[1] = rest;
                v
            } else {
                0
            };

            let mvd = self.decode_mvd();
            let mvp = self.predict_mv(bx, by, bw, bh, ref_1st);
            let mv = self.combine_mv(mvp, mvd);

            let (mv2, ref_2nd) = if bidir {
                let mvd2 = self.decode_mvd();
                let mvp2 = self.predict_mv(bx, by, bw, bh, 0);
                (Some(self.combine_mv(mvp2, mvd2)), 0i8)
            } else if dual {
                // the second hypothesis tracks the first, scaled to the
                // other reference's distance
                let other = (ref_1st ^ 1).min(num_refs - 1);
                (Some(self.scale_mv_between(mv, ref_1st, other)), other as i8)
            } else {
                (None, -1)
            };

            self.store_motion(bx, by, bw, bh, mv, mv2, ref_1st as i8, ref_2nd);
            self.reconstruct_inter_block(bx, by, bw, bh, mv, mv2, ref_1st, ref_2nd);
        }

        self.decode_cbp(false)
    }

    /// Fold a decoded MVD onto its predictor, honoring progressive MV
    /// resolution when the sequence enables it.
    fn combine_mv(&self, mvp: MotionVector, mvd: MotionVector) -> MotionVector {
        let pmvr = self.seq.tools.contains(SequenceTools::PMVR);
        MotionVector::new(
            fold_mvd(pmvr, mvp.x, mvd.x),
            fold_mvd(pmvr, mvp.y, mvd.y),
        )
    }

    /// Scale a motion vector from one reference's temporal distance to
    /// another's.
    fn scale_mv_between(&self, mv: MotionVector, from: usize, to: usize) -> MotionVector {
        let st = self.frame.state();
        let dist_to = st.dist_refs[to.min(MAX_REFS - 1)].max(1);
        let scale_from = st.dist_scale_refs[from.min(MAX_REFS - 1)].max(1);
        drop(st);

        let scale = |v: i16| -> i16 {
            let v = i32::from(v);
            let scaled =
                ((i64::from(v.abs()) * i64::from(dist_to) * i64::from(scale_from) + 8192) >> 14)
                    as i32;
            (v.signum() * scaled).clamp(-8192, 8191) as i16
        };
        MotionVector::new(scale(mv.x), scale(mv.y))
    }

    fn decode_mvd(&mut self) -> MotionVector {
        let mut comp = [0i32; 2];
        for (i, c) in comp.iter_mut().enumerate() {
            let mut first = self.ctx.mvd[i][0];
            let mut rest = self.ctx.mvd[i][1];
            let prefix = self.aec.decode_unary(&mut first, &mut rest, 3);
            self.ctx.mvd[i][0] = first;
            self.ctx.mvd[i][1] = rest;
            let mut mag = prefix;
            if prefix == 3 {
                mag += self.aec.decode_bypass_eg(1);
            }
            if mag != 0 && self.aec.decode_bypass() != 0 {
                *c = -(mag as i32);
            } else {
                *c = mag as i32;
            }
        }
        MotionVector::new(comp[0].clamp(-8192, 8191) as i16, comp[1].clamp(-8192, 8191) as i16)
    }

    /// Median MV prediction from the left, top and top-right neighbors.
    fn predict_mv(&self, px: usize, py: usize, w: usize, _h: usize, _ref_idx: usize) -> MotionVector {
        let spu_x = px >> MIN_PU_SIZE_IN_BIT;
        let spu_y = py >> MIN_PU_SIZE_IN_BIT;

        let fetch = |x: isize, y: isize| -> Option<MotionVector> {
            if x < 0 || y < 0 || x as usize >= self.width_in_spu || y as usize >= self.height_in_spu
            {
                return None;
            }
            let idx = self.spu_index(x as usize, y as usize);
            if self.ref_grid[idx].first < 0 {
                return None;
            }
            // SAFETY: producer-side read of our own grid.
            let mv = unsafe { self.frame.mv_grid()[idx] };
            Some(MotionVector::unpack(mv))
        };

        let a = fetch(spu_x as isize - 1, spu_y as isize);
        let b = fetch(spu_x as isize, spu_y as isize - 1);
        let c = fetch(
            ((px + w) >> MIN_PU_SIZE_IN_BIT) as isize,
            spu_y as isize - 1,
        )
        .or_else(|| fetch(spu_x as isize - 1, spu_y as isize - 1));

        let candidates: Vec<MotionVector> = [a, b, c].iter().flatten().copied().collect();
        match candidates.len() {
            0 => MotionVector::ZERO,
            1 => candidates[0],
            2 => MotionVector::new(
                ((i32::from(candidates[0].x) + i32::from(candidates[1].x)) / 2) as i16,
                ((i32::from(candidates[0].y) + i32::from(candidates[1].y)) / 2) as i16,
            ),
            _ => MotionVector::new(
                median3(candidates[0].x, candidates[1].x, candidates[2].x),
                median3(candidates[0].y, candidates[1].y, candidates[2].y),
            ),
        }
    }

    fn reconstruct_skip(&mut self, level: usize, px: usize, py: usize) {
        let size = 1usize << level;
        // direct mode: inherit the spatial prediction, zero on miss
        let mv = self.predict_mv(px, py, size, size, 0);

        let (mv2, ref_1st, ref_2nd) = match self.hdr.picture_type {
            PictureType::B if self.refs.len() >= 2 => {
                // direct sub-mode: both directions, backward, symmetric or
                // forward
                let sub = if self.seq.tools.contains(SequenceTools::MHP_SKIP) {
                    let mut first = self.ctx.cu_subtype_index[0];
                    let mut rest = self.ctx.cu_subtype_index[1];
                    let v = self.aec.decode_unary(&mut first, &mut rest, 3);
                    self.ctx.cu_subtype_index[0] = first;
                    self.ctx.cu_subtype_index[1] = rest;
                    v
                } else {
                    0
                };
                match sub {
                    1 => (None, 0i8, -1i8),
                    2 => {
                        let s = self.scale_mv_between(mv, 1, 0);
                        (Some(MotionVector::new(-s.x, -s.y)), 1, 0)
                    }
                    3 => (None, 1, -1),
                    _ => (Some(mv), 1, 0),
                }
            }
            PictureType::P | PictureType::F
                if self.refs.len() >= 2 && self.seq.tools.contains(SequenceTools::WSM) =>
            {
                // weighted skip blends a further reference in
                let max = (self.refs.len() as u32 - 1).min(2);
                let mut first = self.ctx.weighted_skip_mode[0];
                let mut rest = self.ctx.weighted_skip_mode[1];
                let w = self.aec.decode_unary(&mut first, &mut rest, max) as usize;
                self.ctx.weighted_skip_mode[0] = first;
                self.ctx.weighted_skip_mode[1] = rest;
                if w > 0 {
                    (Some(self.scale_mv_between(mv, 0, w)), 0, w as i8)
                } else {
                    (None, 0, -1)
                }
            }
            _ => (None, 0, -1),
        };

        self.store_motion(px, py, size, size, mv, mv2, ref_1st, ref_2nd);
        self.reconstruct_inter_block(px, py, size, size, mv, mv2, ref_1st.max(0) as usize, ref_2nd);
    }

    fn store_motion(
        &mut self,
        px: usize,
        py: usize,
        w: usize,
        h: usize,
        mv: MotionVector,
        mv2: Option<MotionVector>,
        ref_1st: i8,
        ref_2nd: i8,
    ) {
        let packed = mv.pack();
        let packed2 = mv2.unwrap_or(MotionVector::ZERO).pack();
        for sy in (py >> MIN_PU_SIZE_IN_BIT)..((py + h) >> MIN_PU_SIZE_IN_BIT) {
            for sx in (px >> MIN_PU_SIZE_IN_BIT)..((px + w) >> MIN_PU_SIZE_IN_BIT) {
                let idx = self.spu_index(sx, sy);
                // SAFETY: producer-side writes into our own frame's grids.
                unsafe {
                    self.frame.mv_grid()[idx] = packed;
                    self.frame.ref_grid()[idx] = ref_1st;
                }
                self.mv2_grid[idx] = packed2;
                self.ref_grid[idx] = RefIndices {
                    first: ref_1st,
                    second: ref_2nd,
                };
            }
        }
    }

    /// Motion-compensate one block (both hypotheses) into the frame.
    #[allow(clippy::too_many_arguments)]
    fn reconstruct_inter_block(
        &mut self,
        px: usize,
        py: usize,
        w: usize,
        h: usize,
        mv: MotionVector,
        mv2: Option<MotionVector>,
        ref_1st: usize,
        ref_2nd: i8,
    ) {
        let fref = if self.hdr.picture_type == PictureType::S {
            self.background_ref.clone()
        } else {
            self.refs.get(ref_1st).cloned()
        };
        let Some(fref) = fref else {
            // a missing reference was already reported; predict flat gray
            return;
        };

        self.mc_into_frame(&fref, px, py, w, h, mv);

        let second = usize::try_from(ref_2nd)
            .ok()
            .and_then(|i| self.refs.get(i).cloned());
        if let (Some(mv2), Some(second)) = (mv2, second) {
            // average the second hypothesis over the first
            let mut tmp = vec![0 as Pel; w * h];
            self.mc_into_buf(&second, px, py, w, h, mv2, &mut tmp, w);
            let plane = self.frame.plane(0);
            // SAFETY: producer-side blend into our own frame.
            let buf = unsafe { plane.buf_mut() };
            for y in 0..h {
                let dst = plane.index(px as isize, (py + y) as isize);
                for x in 0..w {
                    let a = u32::from(buf[dst + x]);
                    let b = u32::from(tmp[y * w + x]);
                    buf[dst + x] = ((a + b + 1) >> 1) as Pel;
                }
            }
        }
    }

    fn mc_into_frame(&self, fref: &Frame, px: usize, py: usize, w: usize, h: usize, mv: MotionVector) {
        self.wait_for_reference(fref, py as i32, h as i32, i32::from(mv.y));

        for comp in 0..self.frame.num_planes() {
            let dst_plane = self.frame.plane(comp);
            let src_plane = fref.plane(comp);
            let luma = comp == 0;
            let (bx, by, bw, bh) = if luma {
                (px as i32, py as i32, w, h)
            } else {
                ((px / 2) as i32, (py / 2) as i32, w / 2, h / 2)
            };
            let (ix, iy, fx, fy) = if luma {
                (
                    bx + (i32::from(mv.x) >> 2),
                    by + (i32::from(mv.y) >> 2),
                    (mv.x & 3) as usize,
                    (mv.y & 3) as usize,
                )
            } else {
                (
                    bx + (i32::from(mv.x) >> 3),
                    by + (i32::from(mv.y) >> 3),
                    (mv.x & 7) as usize,
                    (mv.y & 7) as usize,
                )
            };

            // SAFETY: source rows were awaited; destination is producer-owned.
            let src = unsafe { src_plane.buf() };
            let dst = unsafe { dst_plane.buf_mut() };
            kernels::interpolate_block(
                src,
                src_plane.index(ix as isize, iy as isize),
                src_plane.stride(),
                dst,
                dst_plane.index(bx as isize, by as isize),
                dst_plane.stride(),
                bw,
                bh,
                fx,
                fy,
                luma,
                self.bit_depth,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn mc_into_buf(
        &self,
        fref: &Frame,
        px: usize,
        py: usize,
        w: usize,
        h: usize,
        mv: MotionVector,
        dst: &mut [Pel],
        dst_stride: usize,
    ) {
        self.wait_for_reference(fref, py as i32, h as i32, i32::from(mv.y));
        let src_plane = fref.plane(0);
        let ix = px as i32 + (i32::from(mv.x) >> 2);
        let iy = py as i32 + (i32::from(mv.y) >> 2);
        // SAFETY: source rows were awaited.
        let src = unsafe { src_plane.buf() };
        kernels::interpolate_block(
            src,
            src_plane.index(ix as isize, iy as isize),
            src_plane.stride(),
            dst,
            0,
            dst_stride,
            w,
            h,
            (mv.x & 3) as usize,
            (mv.y & 3) as usize,
            true,
            self.bit_depth,
        );
    }

    /* -----------------------------------------------------------------
     * residual
     */

    fn decode_cbp(&mut self, intra: bool) -> u8 {
        let mut cbp = 0u8;
        let base = if intra { 0 } else { 4 };
        for blk in 0..4 {
            let ctx = &mut self.ctx.cbp[(base + blk) % 9];
            if self.aec.decode_bin(ctx) != 0 {
                cbp |= 1 << blk;
            }
        }
        if self.frame.num_planes() > 1 {
            for blk in 0..2 {
                let ctx = &mut self.ctx.cbp[(7 + blk) % 9];
                if self.aec.decode_bin(ctx) != 0 {
                    cbp |= 1 << (4 + blk);
                }
            }
        }
        cbp
    }

    fn decode_residual(
        &mut self,
        level: usize,
        px: usize,
        py: usize,
        cu_type: CuPredMode,
        cbp: u8,
        trans_size: TuSplit,
    ) {
        let size = 1usize << level;
        let intra = cu_type.is_intra();

        // luma: strip PUs carry strip transforms, otherwise the square
        // split follows the coded transform size
        match cu_type {
            CuPredMode::Intra2Nxn => {
                for blk in 0..4usize {
                    if cbp & (1 << blk) != 0 {
                        self.decode_tu(0, px, py + blk * (size / 4), size, size / 4, intra);
                    }
                }
            }
            CuPredMode::IntraNx2N => {
                for blk in 0..4usize {
                    if cbp & (1 << blk) != 0 {
                        self.decode_tu(0, px + blk * (size / 4), py, size / 4, size, intra);
                    }
                }
            }
            _ => match trans_size {
                TuSplit::None => {
                    if cbp & 0x0F != 0 {
                        self.decode_tu(0, px, py, size.min(32), size.min(32), intra);
                    }
                }
                TuSplit::Cross => {
                    let half = size / 2;
                    for blk in 0..4 {
                        if cbp & (1 << blk) != 0 {
                            let bx = px + (blk & 1) * half;
                            let by = py + (blk >> 1) * half;
                            self.decode_tu(0, bx, by, half, half, intra);
                        }
                    }
                }
            },
        }

        // chroma
        if self.frame.num_planes() > 1 {
            let half = (size / 2).min(32);
            if cbp & 0x10 != 0 {
                self.decode_tu(1, px / 2, py / 2, half, half, intra);
            }
            if cbp & 0x20 != 0 {
                self.decode_tu(2, px / 2, py / 2, half, half, intra);
            }
        }
    }

    /// Decode, dequantize, inverse-transform and add one transform block.
    fn decode_tu(&mut self, comp: usize, px: usize, py: usize, w: usize, h: usize, intra: bool) {
        let mut coeffs = vec![0 as Coeff; w * h];
        let any = self.decode_coeff_block(comp == 0, w, h, &mut coeffs);
        if !any {
            return;
        }

        let qp = if comp == 0 {
            self.cu_qp()
        } else {
            let delta = if comp == 1 {
                self.hdr.chroma_quant_delta_cb
            } else {
                self.hdr.chroma_quant_delta_cr
            };
            quant::chroma_qp(self.cu_qp(), delta, self.bit_depth)
        };
        let (scale, shift) = quant::quant_params(qp, (w.trailing_zeros() as i32 + h.trailing_zeros() as i32) / 2, self.bit_depth);
        if let Some(wq) = &self.wq {
            (self.kernels.dequant_wq)(&mut coeffs, w, h, scale, shift, wq);
        } else {
            (self.kernels.dequant)(&mut coeffs, w * h, scale, shift);
        }

        // secondary transform for luma intra blocks
        let second_transform = intra
            && comp == 0
            && self.seq.tools.contains(SequenceTools::SECOND_TRANSFORM);
        if second_transform && w == 4 && h == 4 {
            (self.kernels.inv_transform_4x4_2nd)(&mut coeffs, w, self.bit_depth);
        } else {
            if second_transform {
                let spu = self.spu_index(px >> MIN_PU_SIZE_IN_BIT, py >> MIN_PU_SIZE_IN_BIT);
                let mode = i32::from(self.ipred_grid[spu].max(0));
                (self.kernels.inv_transform_2nd)(&mut coeffs, w, mode, py > 0, px > 0);
            }
            self.kernels.inverse_transform(&mut coeffs, w, h, self.bit_depth);
        }

        let plane = self.frame.plane(comp);
        let max_pel = (1i32 << self.bit_depth) - 1;
        // SAFETY: producer-side residual add into our own frame.
        let buf = unsafe { plane.buf_mut() };
        for y in 0..h {
            let dst = plane.index(px as isize, (py + y) as isize);
            for x in 0..w {
                let v = i32::from(buf[dst + x]) + i32::from(coeffs[y * w + x]);
                buf[dst + x] = v.clamp(0, max_pel) as Pel;
            }
        }
    }

    /// Run-level decoding over 4x4 coefficient groups, reverse scan.
    fn decode_coeff_block(&mut self, luma: bool, w: usize, h: usize, coeffs: &mut [Coeff]) -> bool {
        let cg_w = w / 4;
        let cg_h = h / 4;
        let num_cg = cg_w * cg_h;
        let ctx_set = usize::from(!luma);
        let mut any = false;

        for cg in (0..num_cg).rev() {
            let sig_cg = if cg == 0 {
                true
            } else {
                let ctx = &mut self.ctx.sig_cg[ctx_set.min(2)];
                self.aec.decode_bin(ctx) != 0
            };
            if !sig_cg {
                continue;
            }

            let cg_x = (cg % cg_w) * 4;
            let cg_y = (cg / cg_w) * 4;

            // position of the last significant coefficient in this group
            let last = {
                let hi = {
                    let ctx = &mut self.ctx.last_pos[ctx_set * 2];
                    self.aec.decode_bin(ctx)
                };
                let mid = {
                    let ctx = &mut self.ctx.last_pos[ctx_set * 2 + 1];
                    self.aec.decode_bin(ctx)
                };
                let lo = self.aec.decode_bypass_bits(2);
                ((hi << 3) | (mid << 2) | lo).min(15) as i32
            };

            let mut pos = last;
            while pos >= 0 && !self.aec.bit_error {
                let level = {
                    let mut first = self.ctx.coeff_level[ctx_set * 20];
                    let mut rest = self.ctx.coeff_level[ctx_set * 20 + 1];
                    let prefix = self.aec.decode_unary(&mut first, &mut rest, 8);
                    self.ctx.coeff_level[ctx_set * 20] = first;
                    self.ctx.coeff_level[ctx_set * 20 + 1] = rest;
                    let mut v = prefix + 1;
                    if prefix == 8 {
                        v += self.aec.decode_bypass_eg(0);
                    }
                    v as i32
                };
                let negative = self.aec.decode_bypass() != 0;
                let (sx, sy) = SCAN_4X4[pos as usize];
                let value = if negative { -level } else { level };
                coeffs[(cg_y + sy) * w + cg_x + sx] =
                    value.clamp(i32::from(Coeff::MIN), i32::from(Coeff::MAX)) as Coeff;
                any = true;

                if pos == 0 {
                    break;
                }
                let run = {
                    let mut first = self.ctx.coeff_run[0][ctx_set][0];
                    let mut rest = self.ctx.coeff_run[1][ctx_set][0];
                    let v = self.aec.decode_unary(&mut first, &mut rest, pos as u32);
                    self.ctx.coeff_run[0][ctx_set][0] = first;
                    self.ctx.coeff_run[1][ctx_set][0] = rest;
                    v as i32
                };
                pos -= 1 + run;
            }
        }

        any
    }

    /* -----------------------------------------------------------------
     * SAO side info
     */

    pub(super) fn decode_sao_params(&mut self, lcu_x: usize, lcu_y: usize) -> [SaoBlockParam; 3] {
        let lcu_xy = lcu_y * self.width_in_lcu + lcu_x;
        let mut params = [SaoBlockParam::default(); 3];

        // merge with the left or above LCU reuses their parameters
        let can_left = lcu_x > 0;
        let can_above = lcu_y > 0;
        if can_left || can_above {
            let merge_left = can_left && {
                let ctx = &mut self.ctx.sao_merge_flag[0];
                self.aec.decode_bin(ctx) != 0
            };
            let merge_above = !merge_left && can_above && {
                let ctx = &mut self.ctx.sao_merge_flag[1];
                self.aec.decode_bin(ctx) != 0
            };
            if merge_left {
                return self.sao_params[lcu_xy - 1];
            }
            if merge_above {
                return self.sao_params[lcu_xy - self.width_in_lcu];
            }
        }

        for (comp, param) in params.iter_mut().enumerate() {
            if !self.slice.sao_on[comp.min(2)] {
                continue;
            }
            let on = {
                let ctx = &mut self.ctx.sao_mode[0];
                self.aec.decode_bin(ctx) != 0
            };
            if !on {
                continue;
            }
            param.mode = SaoMode::New;
            let is_bo = self.aec.decode_bypass() != 0;
            if is_bo {
                param.type_idc = SAO_TYPE_BO;
                param.start_band = self.aec.decode_bypass_bits(5) as i32;
                param.start_band2 = self.aec.decode_bypass_bits(5) as i32;
                for k in 0..4 {
                    let off = self.decode_sao_offset();
                    let band = (param.start_band + if k < 2 { k } else { param.start_band2 + k - 2 })
                        & 31;
                    param.offset[band as usize] = off;
                }
            } else {
                param.type_idc = self.aec.decode_bypass_bits(2) as i32;
                // EO offsets for the four edge classes (plain stays zero)
                for slot in [0usize, 1, 3, 4] {
                    param.offset[slot] = self.decode_sao_offset();
                }
            }
        }
        params
    }

    fn decode_sao_offset(&mut self) -> i32 {
        let mut first = self.ctx.sao_offset[0];
        let mut rest = self.ctx.sao_offset[1];
        let mag = self.aec.decode_unary(&mut first, &mut rest, 7) as i32;
        self.ctx.sao_offset[0] = first;
        self.ctx.sao_offset[1] = rest;
        if mag != 0 && self.aec.decode_bypass() != 0 {
            -mag
        } else {
            mag
        }
    }

    fn store_cu_info(
        &mut self,
        level: usize,
        px: usize,
        py: usize,
        cu_type: CuPredMode,
        cbp: u8,
        trans_size: TuSplit,
    ) {
        let info = CuInfo {
            level: level as u8,
            cu_type,
            slice_index: self.cur_slice_index,
            qp: self.cu_qp().clamp(-128, 127) as i8,
            cbp,
            trans_size,
            decoded: true,
        };
        let scu_size = 1usize << (level - MIN_CU_SIZE_IN_BIT);
        let scu_x0 = px >> MIN_CU_SIZE_IN_BIT;
        let scu_y0 = py >> MIN_CU_SIZE_IN_BIT;
        for sy in scu_y0..(scu_y0 + scu_size).min(self.height_in_scu) {
            for sx in scu_x0..(scu_x0 + scu_size).min(self.width_in_scu) {
                let idx = self.scu_index(sx, sy);
                self.scu[idx] = info;
            }
        }
    }
}

fn median3(a: i16, b: i16, c: i16) -> i16 {
    a.max(b).min(a.min(b).max(c))
}

/// One MVD component onto its predictor. With progressive MV resolution,
/// deltas outside the quarter-sample window around the predictor step in
/// half samples, re-anchored at the window edge.
fn fold_mvd(pmvr: bool, mvp: i16, mvd: i16) -> i16 {
    const TH_PMVR: i32 = 2;
    let (p, d) = (i32::from(mvp), i32::from(mvd));
    let v = if pmvr {
        let ctr = ((p >> 1) << 1) - p;
        let delta = d - ctr;
        if delta.abs() > TH_PMVR {
            p + ctr + (delta << 1) - delta.signum() * TH_PMVR
        } else {
            p + d
        }
    } else {
        p + d
    };
    v.clamp(-8192, 8191) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_of_three() {
        assert_eq!(median3(1, 2, 3), 2);
        assert_eq!(median3(3, 1, 2), 2);
        assert_eq!(median3(-4, 10, 0), 0);
        assert_eq!(median3(5, 5, 1), 5);
    }

    #[test]
    fn scan_covers_the_group_once() {
        let mut seen = [[false; 4]; 4];
        for &(x, y) in SCAN_4X4.iter() {
            assert!(!seen[y][x]);
            seen[y][x] = true;
        }
        assert!(seen.iter().flatten().all(|&s| s));
    }

    #[test]
    fn pred_modes_classify() {
        assert!(CuPredMode::Intra2Nx2N.is_intra());
        assert!(!CuPredMode::Inter2Nx2N.is_intra());
        assert!(CuPredMode::Skip.is_skip());
        assert!(CuPredMode::Inter2NxnU.is_hor_part());
        assert!(CuPredMode::InterNLx2N.is_ver_part());
        assert!(CuPredMode::Intra2Nxn.is_hor_part());
        assert!(CuPredMode::IntraNx2N.is_ver_part());
    }

    #[test]
    fn mvd_folding_without_pmvr_is_plain_addition() {
        assert_eq!(fold_mvd(false, 10, 3), 13);
        assert_eq!(fold_mvd(false, -10, -3), -13);
        assert_eq!(fold_mvd(false, 8190, 100), 8191, "clamped");
    }

    #[test]
    fn pmvr_keeps_small_deltas_and_doubles_large_ones() {
        // inside the quarter-sample window the delta applies unchanged
        assert_eq!(fold_mvd(true, 8, 1), 9);
        assert_eq!(fold_mvd(true, 8, -2), 6);
        // outside the window the step size doubles past the edge
        assert_eq!(fold_mvd(true, 8, 5), 8 + 2 * 5 - 2);
        assert_eq!(fold_mvd(true, 8, -5), 8 - 2 * 5 + 2);
        // an odd predictor shifts the window center
        assert_eq!(fold_mvd(true, 9, 1), 10);
    }
}
