//! In-loop filters: deblocking edge derivation and application, SAO and
//! ALF over finished LCU rows.

use super::cu::CuPredMode;
use super::dpb::Pel;
use super::kernels::SaoMode;
use super::picture::PictureDecoder;
use super::quant;
use crate::types::{MotionVector, PictureType, SequenceTools, MIN_CU_SIZE_IN_BIT};

pub const EDGE_VER: usize = 0;
pub const EDGE_HOR: usize = 1;

const EDGE_TYPE_NOFILTER: u8 = 0;
const EDGE_TYPE_ONLY_LUMA: u8 = 1;
const EDGE_TYPE_BOTH: u8 = 2;

/// Loop-filter strength lookup by clipped QP.
pub const ALPHA_TABLE: [u8; 64] = [
    0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 2, 2, 2, 3, 3, 4, 4, 5, 5, 6, 7, 8, 9, 10, 11, 12, 13, 15,
    16, 18, 20, 22, 24, 26, 28, 30, 33, 33, 35, 35, 36, 37, 37, 39, 39, 42, 44, 46, 48, 50, 52,
    53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 63, 64,
];

pub const BETA_TABLE: [u8; 64] = [
    0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 6,
    6, 6, 7, 7, 7, 8, 8, 8, 9, 9, 10, 10, 11, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23,
    23, 24, 24, 25, 25, 26, 27,
];

const SAO_SHIFT_PIX_NUM: usize = 4;

/// α/β pair for an averaged QP at the given bit depth and offsets.
pub fn deblock_params(qp: i32, alpha_offset: i32, beta_offset: i32, bit_depth: i32) -> (i32, i32) {
    let shift = bit_depth - 8;
    let idx_a = (qp - (shift << 3) + alpha_offset).clamp(0, 63) as usize;
    let idx_b = (qp - (shift << 3) + beta_offset).clamp(0, 63) as usize;
    (
        i32::from(ALPHA_TABLE[idx_a]) << shift,
        i32::from(BETA_TABLE[idx_b]) << shift,
    )
}

impl PictureDecoder {
    /// Mark one edge segment filterable, never crossing slice bounds unless
    /// the sequence allows it.
    fn set_edge_filter_param(
        &mut self,
        level: usize,
        scu_x: usize,
        scu_y: usize,
        dir: usize,
        edge_type: u8,
    ) {
        let w_in_scu = self.width_in_scu;
        let scu_num = 1usize << (level - MIN_CU_SIZE_IN_BIT);
        let scu_xy = scu_y * w_in_scu + scu_x;

        if dir == EDGE_VER {
            if scu_x == 0 {
                return;
            }
            if !self.seq.cross_loop_filter
                && self.scu[scu_xy].slice_index != self.scu[scu_xy - 1].slice_index
            {
                return;
            }
            for i in 0..scu_num {
                if scu_y + i >= self.height_in_scu {
                    break;
                }
                let idx = (scu_y + i) * w_in_scu + scu_x;
                if self.deblock_flags[EDGE_VER][idx] != EDGE_TYPE_NOFILTER {
                    break;
                }
                self.deblock_flags[EDGE_VER][idx] = edge_type;
            }
        } else {
            if scu_y == 0 {
                return;
            }
            if !self.seq.cross_loop_filter
                && self.scu[scu_xy].slice_index != self.scu[scu_xy - w_in_scu].slice_index
            {
                return;
            }
            for i in 0..scu_num {
                if scu_x + i >= self.width_in_scu {
                    break;
                }
                let idx = scu_y * w_in_scu + scu_x + i;
                if self.deblock_flags[EDGE_HOR][idx] != EDGE_TYPE_NOFILTER {
                    break;
                }
                self.deblock_flags[EDGE_HOR][idx] = edge_type;
            }
        }
    }

    /// Derive the filterable edges of one CU subtree.
    fn lcu_set_edge_filter(&mut self, level: usize, scu_x: usize, scu_y: usize) {
        let scu = self.scu[scu_y * self.width_in_scu + scu_x];

        if usize::from(scu.level) < level {
            for i in 0..4usize {
                let sub_x = scu_x + ((i & 1) << (level - MIN_CU_SIZE_IN_BIT - 1));
                let sub_y = scu_y + ((i >> 1) << (level - MIN_CU_SIZE_IN_BIT - 1));
                if sub_x >= self.width_in_scu || sub_y >= self.height_in_scu {
                    continue;
                }
                self.lcu_set_edge_filter(level - 1, sub_x, sub_y);
            }
            return;
        }

        // left and top CU boundaries
        self.set_edge_filter_param(level, scu_x, scu_y, EDGE_VER, EDGE_TYPE_BOTH);
        self.set_edge_filter_param(level, scu_x, scu_y, EDGE_HOR, EDGE_TYPE_BOTH);

        if usize::from(scu.level) > MIN_CU_SIZE_IN_BIT {
            let i = level - MIN_CU_SIZE_IN_BIT - 1;

            // prediction boundaries
            match scu.cu_type {
                CuPredMode::Inter2NxN => {
                    self.set_edge_filter_param(level, scu_x, scu_y + (1 << i), EDGE_HOR, EDGE_TYPE_BOTH);
                }
                CuPredMode::InterNx2N => {
                    self.set_edge_filter_param(level, scu_x + (1 << i), scu_y, EDGE_VER, EDGE_TYPE_BOTH);
                }
                CuPredMode::IntraNxN => {
                    self.set_edge_filter_param(level, scu_x + (1 << i), scu_y, EDGE_VER, EDGE_TYPE_BOTH);
                    self.set_edge_filter_param(level, scu_x, scu_y + (1 << i), EDGE_HOR, EDGE_TYPE_BOTH);
                }
                CuPredMode::Intra2Nxn => {
                    if i > 0 {
                        for k in 1..=3usize {
                            self.set_edge_filter_param(
                                level,
                                scu_x,
                                scu_y + (1 << (i - 1)) * k,
                                EDGE_HOR,
                                EDGE_TYPE_ONLY_LUMA,
                            );
                        }
                    } else {
                        self.set_edge_filter_param(level, scu_x, scu_y + (1 << i), EDGE_HOR, EDGE_TYPE_ONLY_LUMA);
                    }
                }
                CuPredMode::IntraNx2N => {
                    if i > 0 {
                        for k in 1..=3usize {
                            self.set_edge_filter_param(
                                level,
                                scu_x + (1 << (i - 1)) * k,
                                scu_y,
                                EDGE_VER,
                                EDGE_TYPE_ONLY_LUMA,
                            );
                        }
                    } else {
                        self.set_edge_filter_param(level, scu_x + (1 << i), scu_y, EDGE_VER, EDGE_TYPE_ONLY_LUMA);
                    }
                }
                CuPredMode::Inter2NxnU => {
                    if i > 0 {
                        self.set_edge_filter_param(level, scu_x, scu_y + (1 << (i - 1)), EDGE_HOR, EDGE_TYPE_BOTH);
                    }
                }
                CuPredMode::Inter2NxnD => {
                    if i > 0 {
                        self.set_edge_filter_param(level, scu_x, scu_y + (1 << (i - 1)) * 3, EDGE_HOR, EDGE_TYPE_BOTH);
                    }
                }
                CuPredMode::InterNLx2N => {
                    if i > 0 {
                        self.set_edge_filter_param(level, scu_x + (1 << (i - 1)), scu_y, EDGE_VER, EDGE_TYPE_BOTH);
                    }
                }
                CuPredMode::InterNRx2N => {
                    if i > 0 {
                        self.set_edge_filter_param(level, scu_x + (1 << (i - 1)) * 3, scu_y, EDGE_VER, EDGE_TYPE_BOTH);
                    }
                }
                _ => {}
            }

            // transform boundaries
            if scu.cu_type != CuPredMode::IntraNxN
                && scu.trans_size != super::cu::TuSplit::None
                && scu.cbp != 0
            {
                let nsqt = self.seq.tools.contains(SequenceTools::NSQT);
                if nsqt && scu.cu_type.is_hor_part() {
                    if usize::from(scu.level) == 4 {
                        self.set_edge_filter_param(level, scu_x, scu_y + (1 << i), EDGE_HOR, EDGE_TYPE_ONLY_LUMA);
                    } else {
                        self.set_edge_filter_param(level, scu_x, scu_y + (1 << (i.max(1) - 1)), EDGE_HOR, EDGE_TYPE_ONLY_LUMA);
                        self.set_edge_filter_param(level, scu_x, scu_y + (1 << i), EDGE_HOR, EDGE_TYPE_ONLY_LUMA);
                        self.set_edge_filter_param(
                            level,
                            scu_x,
                            scu_y + (1 << i) + (1 << (i.max(1) - 1)),
                            EDGE_HOR,
                            EDGE_TYPE_ONLY_LUMA,
                        );
                    }
                } else if nsqt && scu.cu_type.is_ver_part() {
                    if usize::from(scu.level) == 4 {
                        self.set_edge_filter_param(level, scu_x + (1 << i), scu_y, EDGE_VER, EDGE_TYPE_ONLY_LUMA);
                    } else {
                        self.set_edge_filter_param(level, scu_x + (1 << (i.max(1) - 1)), scu_y, EDGE_VER, EDGE_TYPE_ONLY_LUMA);
                        self.set_edge_filter_param(level, scu_x + (1 << i), scu_y, EDGE_VER, EDGE_TYPE_ONLY_LUMA);
                        self.set_edge_filter_param(
                            level,
                            scu_x + (1 << i) + (1 << (i.max(1) - 1)),
                            scu_y,
                            EDGE_VER,
                            EDGE_TYPE_ONLY_LUMA,
                        );
                    }
                } else {
                    self.set_edge_filter_param(level, scu_x + (1 << i), scu_y, EDGE_VER, EDGE_TYPE_ONLY_LUMA);
                    self.set_edge_filter_param(level, scu_x, scu_y + (1 << i), EDGE_HOR, EDGE_TYPE_ONLY_LUMA);
                }
            }
        }
    }

    /// Motion-similarity shortcut: P/F edges between uncoded blocks moving
    /// together need no filtering.
    fn skip_filter(&self, p_idx: usize, q_idx: usize, dir: usize, block_x: usize, block_y: usize) -> bool {
        if self.hdr.picture_type != PictureType::P && self.hdr.picture_type != PictureType::F {
            return true;
        }

        let pos1 = block_y * self.width_in_spu + block_x;
        let pos2 = (block_y - dir) * self.width_in_spu + (block_x - usize::from(dir == 0));
        let ref1 = self.ref_grid[pos1].first;
        let ref2 = self.ref_grid[pos2].first;
        // SAFETY: our own finished motion grid.
        let (mv1, mv2) = unsafe {
            let grid = self.frame.mv_grid();
            (MotionVector::unpack(grid[pos1]), MotionVector::unpack(grid[pos2]))
        };

        let p = &self.scu[p_idx];
        let q = &self.scu[q_idx];
        !(p.cbp == 0
            && q.cbp == 0
            && (mv1.x - mv2.x).abs() < 4
            && (mv1.y - mv2.y).abs() < 4
            && ref1 >= 0
            && ref1 == ref2)
    }

    /// Filter the left (vertical) or top (horizontal) edge of one SCU.
    fn scu_deblock(&mut self, scu_x: usize, scu_y: usize, dir: usize) {
        let scu_xy = scu_y * self.width_in_scu + scu_x;
        let edge_condition = self.deblock_flags[dir][scu_xy];
        if edge_condition == EDGE_TYPE_NOFILTER {
            return;
        }

        let p_idx = if dir == EDGE_HOR {
            scu_xy - self.width_in_scu
        } else {
            scu_xy - 1
        };

        let flags = [
            self.skip_filter(p_idx, scu_xy, dir, scu_x << 1, scu_y << 1),
            self.skip_filter(
                p_idx,
                scu_xy,
                dir,
                (scu_x << 1) + dir,
                (scu_y << 1) + usize::from(dir == 0),
            ),
        ];
        if !flags[0] && !flags[1] {
            return;
        }

        let qp_avg = (i32::from(self.scu[p_idx].qp) + i32::from(self.scu[scu_xy].qp) + 1) >> 1;

        // luma
        {
            let plane = self.frame.plane(0);
            let pos = plane.index(
                (scu_x << MIN_CU_SIZE_IN_BIT) as isize,
                (scu_y << MIN_CU_SIZE_IN_BIT) as isize,
            );
            let (alpha, beta) = deblock_params(
                qp_avg,
                self.hdr.alpha_offset,
                self.hdr.beta_offset,
                self.bit_depth,
            );
            // SAFETY: producer-side filtering of our own frame.
            let buf = unsafe { plane.buf_mut() };
            (self.kernels.deblock_luma[dir])(buf, pos, plane.stride(), alpha, beta, flags);
        }

        // chroma, on every other SCU along the edge
        if edge_condition == EDGE_TYPE_BOTH
            && self.frame.num_planes() > 1
            && ((dir == EDGE_HOR && scu_y % 2 == 0) || (dir == EDGE_VER && scu_x % 2 == 0))
        {
            let qp_c = quant::chroma_qp(qp_avg, self.hdr.chroma_quant_delta_cb, self.bit_depth);
            let (alpha, beta) = deblock_params(
                qp_c,
                self.hdr.alpha_offset,
                self.hdr.beta_offset,
                self.bit_depth,
            );
            for comp in 1..3 {
                let plane = self.frame.plane(comp);
                let pos = plane.index(
                    (scu_x << (MIN_CU_SIZE_IN_BIT - 1)) as isize,
                    (scu_y << (MIN_CU_SIZE_IN_BIT - 1)) as isize,
                );
                // SAFETY: producer-side filtering of our own frame.
                let buf = unsafe { plane.buf_mut() };
                (self.kernels.deblock_chroma[dir])(buf, pos, plane.stride(), alpha, beta, flags);
            }
        }
    }

    /// Deblock one LCU: all vertical edges first, then horizontal edges
    /// with the first edge of each row deferred to the LCU on the left and
    /// the trailing edge picked up by the last LCU of the row.
    pub fn deblock_lcu(&mut self, lcu_x: usize, lcu_y: usize) {
        let num_in_scu = 1usize << (self.lcu_level - MIN_CU_SIZE_IN_BIT);
        let mut scu_x = lcu_x << (self.lcu_level - MIN_CU_SIZE_IN_BIT);
        let scu_y = lcu_y << (self.lcu_level - MIN_CU_SIZE_IN_BIT);
        let mut num_hor = (self.width_in_scu - scu_x).min(num_in_scu);
        let num_ver = (self.height_in_scu - scu_y).min(num_in_scu);

        self.lcu_set_edge_filter(self.lcu_level, scu_x, scu_y);

        for j in 0..num_ver {
            for i in 0..num_hor {
                self.scu_deblock(scu_x + i, scu_y + j, EDGE_VER);
            }
        }

        if scu_x == 0 {
            // first LCU of the row leaves its trailing edge for later
            num_hor -= 1;
        } else {
            if scu_x + num_hor == self.width_in_scu {
                num_hor += 1;
            }
            scu_x -= 1;
        }

        for j in 0..num_ver {
            for i in 0..num_hor {
                self.scu_deblock(scu_x + i, scu_y + j, EDGE_HOR);
            }
        }
    }

    /* -----------------------------------------------------------------
     * SAO / ALF rows
     */

    /// The filter region of an LCU, shifted up-left so it only covers
    /// samples whose deblocking is final.
    fn shifted_region(
        &self,
        lcu_x: usize,
        lcu_y: usize,
        comp: usize,
    ) -> (usize, usize, usize, usize) {
        let shift = if comp == 0 { 0 } else { 1 };
        let plane_w = self.frame.plane(comp).width();
        let plane_h = self.frame.plane(comp).lines();
        let size = self.lcu_size >> shift;
        let sao_shift = SAO_SHIFT_PIX_NUM >> shift;

        let x0 = (lcu_x * size).saturating_sub(if lcu_x > 0 { sao_shift } else { 0 });
        let y0 = (lcu_y * size).saturating_sub(if lcu_y > 0 { sao_shift } else { 0 });
        let mut x1 = ((lcu_x + 1) * size).min(plane_w);
        let mut y1 = ((lcu_y + 1) * size).min(plane_h);
        if lcu_x + 1 < self.width_in_lcu {
            x1 -= sao_shift;
        }
        if lcu_y + 1 < self.height_in_lcu {
            y1 -= sao_shift;
        }
        (x0, y0, x1, y1)
    }

    pub fn sao_lcu_row(&mut self, lcu_y: usize) {
        for comp in 0..self.frame.num_planes() {
            if !self.slice.sao_on[comp] {
                continue;
            }

            let plane = self.frame.plane(comp);
            let stride = plane.stride();
            // snapshot the row band so edge offsets classify on unfiltered
            // neighbors
            let (_, band_y0, _, band_y1) = self.shifted_region(0, lcu_y, comp);
            let top = band_y0.saturating_sub(1);
            let bottom = (band_y1 + 1).min(plane.lines());
            // SAFETY: producer-side read of our own finished rows.
            let src_band: Vec<Pel> = unsafe {
                let buf = plane.buf();
                buf[plane.index(0, top as isize)..plane.index(0, bottom as isize - 1) + plane.width()]
                    .to_vec()
            };

            for lcu_x in 0..self.width_in_lcu {
                let lcu_xy = lcu_y * self.width_in_lcu + lcu_x;
                let param = self.sao_params[lcu_xy][comp];
                if param.mode == SaoMode::Off {
                    continue;
                }
                let (x0, y0, x1, y1) = self.shifted_region(lcu_x, lcu_y, comp);
                // keep one-sample clearance from the picture borders for
                // the edge classifiers
                let x0 = x0.max(1);
                let y0 = y0.max(1);
                let x1 = x1.min(plane.width() - 1);
                let y1 = y1.min(plane.lines() - 1);
                if x0 >= x1 || y0 >= y1 {
                    continue;
                }

                let src_pos = (y0 - top) * stride + x0;
                let dst_pos = plane.index(x0 as isize, y0 as isize);
                // SAFETY: producer-side write into our own frame.
                let dst = unsafe { plane.buf_mut() };
                super::kernels::sao_block(
                    dst,
                    dst_pos,
                    stride,
                    &src_band,
                    src_pos,
                    stride,
                    x1 - x0,
                    y1 - y0,
                    &param,
                    self.bit_depth,
                );
            }
        }
    }

    pub fn alf_lcu_row(&mut self, lcu_y: usize) {
        for comp in 0..self.frame.num_planes() {
            if !self.hdr.alf.enabled[comp] {
                continue;
            }

            for lcu_x in 0..self.width_in_lcu {
                let lcu_xy = lcu_y * self.width_in_lcu + lcu_x;
                if !self.alf_enable[lcu_xy][comp] {
                    continue;
                }

                let coeff = if comp == 0 {
                    let region_x = lcu_x * 4 / self.width_in_lcu.max(1);
                    let region_y = lcu_y * 4 / self.height_in_lcu.max(1);
                    let region = (region_y * 4 + region_x).min(15);
                    let filter_idx =
                        usize::from(self.hdr.alf.luma_region_map[region]).min(
                            self.hdr.alf.luma_filters.len().saturating_sub(1),
                        );
                    match self.hdr.alf.luma_filters.get(filter_idx) {
                        Some(c) => *c,
                        None => continue,
                    }
                } else {
                    self.hdr.alf.chroma_filter[comp - 1]
                };

                let plane = self.frame.plane(comp);
                let (x0, y0, x1, y1) = self.shifted_region(lcu_x, lcu_y, comp);
                if x0 >= x1 || y0 >= y1 {
                    continue;
                }
                let stride = plane.stride();
                let pos = plane.index(x0 as isize, y0 as isize);
                // SAFETY: producer-side read-modify-write of our own frame.
                let src: Vec<Pel> = unsafe {
                    let buf = plane.buf();
                    buf[pos..pos + (y1 - y0 - 1) * stride + (x1 - x0)].to_vec()
                };
                let dst = unsafe { plane.buf_mut() };
                super::kernels::alf_block(
                    dst,
                    pos,
                    stride,
                    &src,
                    0,
                    stride,
                    x1 - x0,
                    y1 - y0,
                    &coeff,
                    self.bit_depth,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deblock_params_follow_tables() {
        let (alpha, beta) = deblock_params(30, 0, 0, 8);
        assert_eq!(alpha, i32::from(ALPHA_TABLE[30]));
        assert_eq!(beta, i32::from(BETA_TABLE[30]));

        // offsets move the lookup, clamped at the table ends
        let (alpha_hi, _) = deblock_params(63, 8, 0, 8);
        assert_eq!(alpha_hi, 64);

        // 10-bit shifts the index down and scales the result up
        let (alpha10, beta10) = deblock_params(30 + 16, 0, 0, 10);
        assert_eq!(alpha10, i32::from(ALPHA_TABLE[30]) << 2);
        assert_eq!(beta10, i32::from(BETA_TABLE[30]) << 2);
    }
}
