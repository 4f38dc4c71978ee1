//! Per-picture decoding: slice handling, the LCU-row loop, reconstruction
//! progress and the in-loop filter sequence.

use std::sync::Arc;

use tracing::{debug, error};

use super::aec::{AecDecoder, ContextSet};
use super::cu::CuInfo;
use super::dpb::{Frame, Pel};
use super::kernels::{Kernels, SaoBlockParam};
use super::quant::{frame_wq_matrices, WqMatrices};
use crate::parser::{parse_slice_header, BitReader, SliceHeader};
use crate::types::{
    PictureHeader, RefIndices, SequenceHeader, SequenceTools, MIN_CU_SIZE_IN_BIT,
    MIN_PU_SIZE_IN_BIT,
};

/// Filter taps motion compensation may reach below the requested sample,
/// plus the four lines the loop filters hold back.
const MC_ROW_MARGIN: i32 = 8;

/// Everything one in-flight picture needs: geometry, neighbor grids, the
/// entropy decoder and the frames it reads from and writes to.
pub struct PictureDecoder {
    pub seq: Arc<SequenceHeader>,
    pub kernels: Arc<Kernels>,

    // geometry, all in encoded (whole-CU) dimensions
    pub width: usize,
    pub height: usize,
    pub lcu_level: usize,
    pub lcu_size: usize,
    pub width_in_lcu: usize,
    pub height_in_lcu: usize,
    pub width_in_scu: usize,
    pub height_in_scu: usize,
    pub width_in_spu: usize,
    pub height_in_spu: usize,
    pub bit_depth: i32,

    pub hdr: PictureHeader,
    pub poc: i32,
    pub coi: i32,

    /// Active weighting matrices when the sequence codes with weighted
    /// quant.
    pub wq: Option<WqMatrices>,

    pub frame: Arc<Frame>,
    pub refs: Vec<Arc<Frame>>,
    pub background_ref: Option<Arc<Frame>>,

    /// Per-SCU coding info of the whole picture (deblock reads it back).
    pub scu: Vec<CuInfo>,
    /// Intra prediction mode per 4x4 block, -1 where unavailable.
    pub ipred_grid: Vec<i8>,
    /// Both reference indices per 4x4 block.
    pub ref_grid: Vec<RefIndices>,
    /// Second-list motion vectors (the first list lives on the frame).
    pub mv2_grid: Vec<u32>,
    /// Per-edge deblock strengths, [vertical, horizontal] over the SCU grid.
    pub deblock_flags: [Vec<u8>; 2],

    /// Pre-filter bottom row of the LCU row above, per plane. Intra
    /// prediction reads its top neighbors here once the row above has been
    /// deblocked in place.
    pub intra_border: [Vec<Pel>; 3],

    /// SAO parameters per LCU and component.
    pub sao_params: Vec<[SaoBlockParam; 3]>,
    /// ALF on/off per LCU and component.
    pub alf_enable: Vec<[bool; 3]>,

    pub aec: AecDecoder,
    pub ctx: ContextSet,
    pub slice: SliceHeader,
    pub cur_slice_index: u8,

    pub qp: i32,
    pub last_dqp: i32,
    pub fixed_qp: bool,

    pub decoding_error: bool,
}

impl PictureDecoder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        seq: Arc<SequenceHeader>,
        kernels: Arc<Kernels>,
        hdr: PictureHeader,
        poc: i32,
        coi: i32,
        frame: Arc<Frame>,
        refs: Vec<Arc<Frame>>,
        background_ref: Option<Arc<Frame>>,
    ) -> PictureDecoder {
        let width = seq.enc_width;
        let height = seq.enc_height;
        let lcu_level = seq.log2_lcu_size;
        let width_in_lcu = seq.width_in_lcu();
        let height_in_lcu = seq.height_in_lcu();
        let width_in_scu = width >> MIN_CU_SIZE_IN_BIT;
        let height_in_scu = height >> MIN_CU_SIZE_IN_BIT;
        let width_in_spu = width >> MIN_PU_SIZE_IN_BIT;
        let height_in_spu = height >> MIN_PU_SIZE_IN_BIT;
        let num_scu = width_in_scu * height_in_scu;
        let num_spu = width_in_spu * height_in_spu;
        let num_lcu = width_in_lcu * height_in_lcu;
        let bit_depth = seq.info.internal_bit_depth as i32;

        let qp = hdr.picture_qp;
        let fixed_qp = hdr.fixed_picture_qp;
        let wq = if seq.tools.contains(SequenceTools::WEIGHTED_QUANT) {
            Some(frame_wq_matrices(&seq.wq_matrix, hdr.weighted_quant.as_ref()))
        } else {
            None
        };

        PictureDecoder {
            intra_border: [
                vec![0; width],
                vec![0; width / 2 + 1],
                vec![0; width / 2 + 1],
            ],
            wq,
            seq,
            kernels,
            width,
            height,
            lcu_level,
            lcu_size: 1 << lcu_level,
            width_in_lcu,
            height_in_lcu,
            width_in_scu,
            height_in_scu,
            width_in_spu,
            height_in_spu,
            bit_depth,
            hdr,
            poc,
            coi,
            frame,
            refs,
            background_ref,
            scu: vec![CuInfo::default(); num_scu],
            ipred_grid: vec![-1; num_spu],
            ref_grid: vec![RefIndices::default(); num_spu],
            mv2_grid: vec![0; num_spu],
            deblock_flags: [vec![0; num_scu], vec![0; num_scu]],
            sao_params: vec![[SaoBlockParam::default(); 3]; num_lcu],
            alf_enable: vec![[false; 3]; num_lcu],
            aec: AecDecoder::new(&[]),
            ctx: ContextSet::default(),
            slice: SliceHeader {
                lcu_row: 0,
                fixed_slice_qp: true,
                slice_qp: qp,
                sao_on: [false; 3],
            },
            cur_slice_index: 0,
            qp,
            last_dqp: 0,
            fixed_qp,
            decoding_error: false,
        }
    }

    pub fn sao_enabled(&self) -> bool {
        self.seq.tools.contains(SequenceTools::SAO) && self.hdr.loop_filter
    }

    pub fn alf_enabled(&self) -> bool {
        self.seq.tools.contains(SequenceTools::ALF)
    }

    /// Decode all slices of the picture: reconstruct, filter and pad every
    /// LCU row, publishing progress row by row.
    ///
    /// `data` is the emulation-stripped coded unit; `slice_offset` is the
    /// byte offset of the first slice start code (right after the picture
    /// header).
    pub fn decode_picture_data(&mut self, data: &[u8], slice_offset: usize) {
        let mut pos = slice_offset;

        if !self.start_slice(data, &mut pos) {
            self.fail("picture carries no slice data");
            return;
        }

        for lcu_y in 0..self.height_in_lcu {
            for lcu_x in 0..self.width_in_lcu {
                if self.decoding_error {
                    break;
                }

                self.decode_lcu_header(lcu_x, lcu_y);
                self.decode_lcu_tree(lcu_x, lcu_y);

                if self.aec.bit_error {
                    self.fail("entropy decoder exhausted the coded unit");
                    break;
                }
            }

            if self.decoding_error {
                break;
            }

            self.save_intra_border(lcu_y);

            // the whole row is reconstructed, so all its vertical and
            // deferred horizontal edges are decidable
            if self.hdr.loop_filter {
                for lcu_x in 0..self.width_in_lcu {
                    self.deblock_lcu(lcu_x, lcu_y);
                }
            }
            if self.sao_enabled() {
                self.sao_lcu_row(lcu_y);
            }
            if self.alf_enabled() {
                self.alf_lcu_row(lcu_y);
            }

            self.frame
                .pad_lcu_row(lcu_y, self.lcu_level, self.height_in_lcu);

            // the bottom four lines stay mutable until the next row's
            // filters ran, so publish up to the previous row only
            if lcu_y > 0 {
                self.frame.report_row(lcu_y as i32 - 1);
            }

            // a new slice may start at any LCU row boundary
            if lcu_y + 1 < self.height_in_lcu {
                let consumed = pos + self.aec.bytes_consumed();
                let mut next = consumed;
                if find_slice_start(data, &mut next) {
                    pos = next;
                    if !self.start_slice(data, &mut pos) {
                        self.fail("malformed slice header");
                        break;
                    }
                }
            }
        }

        if self.decoding_error {
            self.frame.state().decode_error = true;
        }
        // complete even on error so no consumer deadlocks on our rows
        self.frame.report_complete();
        debug!(
            poc = self.poc,
            coi = self.coi,
            error = self.decoding_error,
            "picture reconstruction finished"
        );
    }

    /// Parse a slice header at `*pos` and restart the entropy decoder on
    /// the byte-aligned payload behind it.
    fn start_slice(&mut self, data: &[u8], pos: &mut usize) -> bool {
        let mut check = *pos;
        if !find_slice_start(data, &mut check) {
            return false;
        }
        *pos = check;

        let mut reader = BitReader::new(&data[*pos..]);
        let slice = match parse_slice_header(
            &mut reader,
            &self.seq,
            &self.hdr,
            self.sao_enabled(),
        ) {
            Ok(s) => s,
            Err(_) => return false,
        };
        reader.align_byte();
        let header_bytes = reader.bit_pos() / 8;
        *pos += header_bytes;

        self.slice = slice;
        self.qp = slice.slice_qp;
        self.last_dqp = 0;
        self.fixed_qp = self.hdr.fixed_picture_qp || slice.fixed_slice_qp;
        self.cur_slice_index = self.cur_slice_index.wrapping_add(1);
        self.aec = AecDecoder::new(&data[*pos..]);
        self.ctx = ContextSet::default();
        true
    }

    /// Per-LCU side information: SAO parameters and ALF enables.
    fn decode_lcu_header(&mut self, lcu_x: usize, lcu_y: usize) {
        let lcu_xy = lcu_y * self.width_in_lcu + lcu_x;
        if self.sao_enabled() {
            let params = self.decode_sao_params(lcu_x, lcu_y);
            self.sao_params[lcu_xy] = params;
        }
        if self.alf_enabled() {
            let mut enables = [false; 3];
            for (comp, on) in enables.iter_mut().enumerate() {
                if self.hdr.alf.enabled[comp] {
                    let ctx = &mut self.ctx.alf_lcu_enable[comp * 4];
                    *on = self.aec.decode_bin(ctx) != 0;
                }
            }
            self.alf_enable[lcu_xy] = enables;
        }
    }

    /// The reference row a motion-compensated read depends on, expressed as
    /// an LCU row index of the reference frame.
    pub fn required_ref_row(&self, py: i32, block_h: i32, mv_y: i32) -> i32 {
        let bottom = py + block_h + (mv_y >> 2) + MC_ROW_MARGIN;
        (bottom >> self.lcu_level).clamp(0, self.height_in_lcu as i32 - 1)
    }

    /// Block until the reference has produced the rows this read needs.
    pub fn wait_for_reference(&self, fref: &Frame, py: i32, block_h: i32, mv_y: i32) {
        let row = self.required_ref_row(py, block_h, mv_y);
        fref.wait_rows(row);
    }

    /// Stash the pre-filter bottom sample row of this LCU row; the next row
    /// predicts intra from it after deblock has overwritten the frame.
    fn save_intra_border(&mut self, lcu_y: usize) {
        let bottom = ((lcu_y + 1) << self.lcu_level).min(self.height) - 1;
        let frame = self.frame.clone();
        for comp in 0..frame.num_planes() {
            let plane = frame.plane(comp);
            let y = if comp == 0 { bottom } else { bottom >> 1 };
            let y = y.min(plane.lines() - 1);
            let row = plane.index(0, y as isize);
            // SAFETY: we are the producing task; the row is reconstructed.
            let src = unsafe { &plane.buf()[row..row + plane.width()] };
            self.intra_border[comp][..plane.width()].copy_from_slice(src);
        }
    }

    pub fn fail(&mut self, what: &str) {
        if !self.decoding_error {
            error!(poc = self.poc, coi = self.coi, "{what}, discarding picture");
            self.decoding_error = true;
        }
    }

    /// Effective QP of the current CU (with delta-QP when enabled).
    pub fn cu_qp(&self) -> i32 {
        self.qp
    }

    pub fn spu_index(&self, spu_x: usize, spu_y: usize) -> usize {
        spu_y * self.width_in_spu + spu_x
    }

    pub fn scu_index(&self, scu_x: usize, scu_y: usize) -> usize {
        scu_y * self.width_in_scu + scu_x
    }
}

/// Scan up to four bytes forward for a slice start code. Slices begin on
/// byte boundaries, but stuffing may leave the cursor a few bytes short.
pub fn find_slice_start(data: &[u8], pos: &mut usize) -> bool {
    for _ in 0..4 {
        let p = *pos;
        if p + 4 > data.len() {
            return false;
        }
        if data[p] == 0 && data[p + 1] == 0 && data[p + 2] == 1 && data[p + 3] <= 0x8F {
            return true;
        }
        *pos += 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_start_probe_window() {
        let data = [0xAA, 0x00, 0x00, 0x01, 0x05, 0x00, 0x00];
        let mut pos = 0;
        assert!(find_slice_start(&data, &mut pos));
        assert_eq!(pos, 1);

        // a picture start code is not a slice
        let data = [0x00, 0x00, 0x01, 0xB3, 0x00, 0x00, 0x00];
        let mut pos = 0;
        assert!(!find_slice_start(&data, &mut pos));
    }
}
