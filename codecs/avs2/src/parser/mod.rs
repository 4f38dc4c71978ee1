//! Bit-level parsing of sequence, picture and slice headers.

mod reader;

pub use reader::BitReader;

use num_traits::FromPrimitive;
use tracing::{error, warn};

use crate::decoder::quant::{wq_default_matrix, WQ_PARAM_DEFAULT};
use crate::error::{Error, Result};
use crate::types::{
    AlfPictureParams, ChromaFormat, PictureHeader, PictureType, Profile, ReferencePictureSet,
    SequenceHeader, SequenceInfo, SequenceTools, WeightedQuantParams, FRAME_RATE, MAX_REFS,
    MAX_RPS, MIN_CU_SIZE,
};

const TEMPORAL_ID_BITS: usize = 3;

fn is_valid_qp(qp: i32, bit_depth: i32) -> bool {
    qp >= 0 && qp <= 63 + 8 * (bit_depth - 8)
}

fn parse_rps(r: &mut BitReader<'_>) -> Result<ReferencePictureSet> {
    let referenced_by_others = r.read_flag()?;

    let num_refs = r.read(3)? as usize;
    if num_refs > MAX_REFS {
        return Err(Error::InvalidHeader("number of reference pictures"));
    }
    let mut refs = [0i32; MAX_REFS];
    for delta in refs.iter_mut().take(num_refs) {
        *delta = r.read(6)? as i32;
    }

    let num_remove = r.read(3)? as usize;
    let mut removes = [0i32; 8];
    for delta in removes.iter_mut().take(num_remove) {
        *delta = r.read(6)? as i32;
    }

    Ok(ReferencePictureSet::new(
        referenced_by_others,
        &refs[..num_refs],
        &removes[..num_remove],
    ))
}

/// Decode a sequence header unit. The reader is positioned on its start
/// code.
pub fn parse_sequence_header(r: &mut BitReader<'_>) -> Result<SequenceHeader> {
    r.skip(32); // start code

    let profile_id = r.read(8)?;
    let level_id = r.read(8)?;
    let progressive = r.read_flag()?;
    let field_coding = r.read_flag()?;

    let width = r.read(14)?;
    let height = r.read(14)?;
    if width < 16 || height < 16 {
        return Err(Error::InvalidHeader("picture dimensions"));
    }

    let chroma_format =
        ChromaFormat::from_u32(r.read(2)?).ok_or(Error::InvalidHeader("chroma format"))?;
    match chroma_format {
        ChromaFormat::Yuv420 => {}
        ChromaFormat::Monochrome => {
            warn!("unusual chroma format YUV400, decoding as monochrome");
        }
        _ => return Err(Error::Unsupported("chroma format 4:2:2 / 4:4:4")),
    }

    let is_main10 = Profile::from_u32(profile_id) == Some(Profile::Main10);
    let sample_precision = r.read(3)?;
    let encoding_precision = if is_main10 { r.read(3)? } else { 1 };
    if !(1..=3).contains(&sample_precision) || !(1..=3).contains(&encoding_precision) {
        return Err(Error::InvalidHeader("sample precision"));
    }

    let (internal_bit_depth, output_bit_depth) = if is_main10 {
        (6 + encoding_precision * 2, 6 + sample_precision * 2)
    } else {
        (8, 8)
    };

    let aspect_ratio = r.read(4)?;
    let frame_rate_code = r.read(4)?;
    if !(1..=8).contains(&frame_rate_code) {
        return Err(Error::InvalidHeader("frame rate code"));
    }
    let bit_rate_lower = r.read(18)?;
    r.skip(1); // marker
    let bit_rate_upper = r.read(12)?;
    let low_delay = r.read_flag()?;
    r.skip(1); // marker
    let temporal_id_present = r.read_flag()?;
    r.skip(18); // bbv buffer size

    let log2_lcu_size = r.read(3)? as usize;
    if !(4..=6).contains(&log2_lcu_size) {
        return Err(Error::InvalidHeader("LCU size"));
    }

    let mut tools = SequenceTools::empty();
    let mut wq_matrix = [[0i16; 64]; 2];
    if r.read_flag()? {
        tools |= SequenceTools::WEIGHTED_QUANT;
        let load_seq_data = r.read_flag()?;
        for size_id in 0..2 {
            let wqm_size = (1usize << (size_id + 2)).min(8);
            if load_seq_data {
                for i in 0..wqm_size * wqm_size {
                    wq_matrix[size_id][i] = r.read_ue()? as i16;
                }
            } else {
                let default = wq_default_matrix(size_id);
                wq_matrix[size_id][..default.len()].copy_from_slice(default);
            }
        }
    }

    if !r.read_flag()? {
        tools |= SequenceTools::BACKGROUND_PICTURE; // flag is "disable"
    }
    for tool in [
        SequenceTools::MHP_SKIP,
        SequenceTools::DHP,
        SequenceTools::WSM,
        SequenceTools::AMP,
        SequenceTools::NSQT,
        SequenceTools::SDIP,
        SequenceTools::SECOND_TRANSFORM,
        SequenceTools::SAO,
        SequenceTools::ALF,
        SequenceTools::PMVR,
    ] {
        if r.read_flag()? {
            tools |= tool;
        }
    }

    if r.read(1)? != 1 {
        error!("expected marker_bit 1 while received 0 in sequence header");
    }

    let num_rps = r.read(6)? as usize;
    if num_rps > MAX_RPS {
        return Err(Error::InvalidHeader("number of reference picture sets"));
    }
    let mut rps_list = Vec::with_capacity(num_rps);
    for _ in 0..num_rps {
        rps_list.push(parse_rps(r)?);
        if r.read(1)? != 1 {
            error!("expected marker_bit 1 while received 0 after RPS");
        }
    }

    let picture_reorder_delay = if low_delay { 0 } else { r.read(5)? as i32 };

    let cross_loop_filter = r.read_flag()?;
    r.skip(2); // reserved
    r.align_byte();

    let enc_width = (width as usize).div_ceil(MIN_CU_SIZE) * MIN_CU_SIZE;
    let enc_height = (height as usize).div_ceil(MIN_CU_SIZE) * MIN_CU_SIZE;

    Ok(SequenceHeader {
        info: SequenceInfo {
            profile_id,
            level_id,
            progressive,
            width,
            height,
            chroma_format,
            aspect_ratio,
            low_delay,
            bitrate: ((bit_rate_upper << 18) + bit_rate_lower).wrapping_mul(400),
            internal_bit_depth,
            output_bit_depth,
            bytes_per_sample: if output_bit_depth > 8 { 2 } else { 1 },
            frame_rate: FRAME_RATE[(frame_rate_code - 1) as usize],
            frame_rate_code,
        },
        sample_precision,
        encoding_precision,
        enc_width,
        enc_height,
        log2_lcu_size,
        field_coding,
        temporal_id_present,
        tools,
        cross_loop_filter,
        picture_reorder_delay,
        rps_list,
        wq_matrix,
    })
}

fn parse_picture_rps(r: &mut BitReader<'_>, seq: &SequenceHeader) -> Result<ReferencePictureSet> {
    if r.read_flag()? {
        // predicted from the sequence-level set
        let index = r.read(5)? as usize;
        if index >= seq.rps_list.len() {
            return Err(Error::InvalidHeader("reference picture set index"));
        }
        Ok(seq.rps_list[index])
    } else {
        let rps = parse_rps(r)?;
        r.skip(1); // marker
        Ok(rps)
    }
}

fn parse_display_delay(r: &mut BitReader<'_>, seq: &SequenceHeader) -> Result<i32> {
    if seq.info.low_delay {
        return Ok(0);
    }
    let delay = r.read_ue()? as i32;
    if delay >= 64 {
        return Err(Error::InvalidHeader("picture output delay"));
    }
    Ok(delay)
}

fn parse_weighted_quant(
    r: &mut BitReader<'_>,
    seq: &SequenceHeader,
) -> Result<Option<WeightedQuantParams>> {
    if !seq.tools.contains(SequenceTools::WEIGHTED_QUANT) || !r.read_flag()? {
        return Ok(None);
    }

    let mut wq = WeightedQuantParams {
        pic_wq_data_index: r.read(2)?,
        ..Default::default()
    };

    if wq.pic_wq_data_index == 1 {
        r.skip(1); // reserved
        wq.wq_param_index = r.read(2)?;
        wq.wq_model = r.read(2)?;
        if wq.wq_param_index == 1 {
            for i in 0..6 {
                wq.quant_param_undetail[i] = r.read_se()? as i16 + WQ_PARAM_DEFAULT[0][i];
            }
        }
        if wq.wq_param_index == 2 {
            for i in 0..6 {
                wq.quant_param_detail[i] = r.read_se()? as i16 + WQ_PARAM_DEFAULT[1][i];
            }
        }
    } else if wq.pic_wq_data_index == 2 {
        for size_id in 0..2 {
            let wqm_size = (1usize << (size_id + 2)).min(8);
            for i in 0..wqm_size * wqm_size {
                wq.pic_wq_matrix[size_id][i] = r.read_ue()? as i16;
            }
        }
    }

    Ok(Some(wq))
}

fn parse_alf_params(r: &mut BitReader<'_>, seq: &SequenceHeader) -> Result<AlfPictureParams> {
    let mut alf = AlfPictureParams::default();
    if !seq.tools.contains(SequenceTools::ALF) {
        return Ok(alf);
    }

    for enabled in alf.enabled.iter_mut() {
        *enabled = r.read_flag()?;
    }

    if alf.enabled[0] {
        let num_filters = r.read_ue()? as usize + 1;
        if num_filters > 16 {
            return Err(Error::InvalidHeader("ALF filter count"));
        }
        if num_filters > 1 {
            for region in alf.luma_region_map.iter_mut() {
                *region = r.read_ue()? as u8;
            }
        }
        for _ in 0..num_filters {
            let mut coeff = [0i32; 9];
            for c in coeff.iter_mut() {
                *c = r.read_se()?;
            }
            alf.luma_filters.push(coeff);
        }
    }
    for uv in 0..2 {
        if alf.enabled[uv + 1] {
            for c in alf.chroma_filter[uv].iter_mut() {
                *c = r.read_se()?;
            }
        }
    }

    Ok(alf)
}

/// Shared trailer of intra and inter picture headers, from
/// `progressive_frame` to the final byte alignment.
fn parse_picture_trailer(
    r: &mut BitReader<'_>,
    seq: &SequenceHeader,
    hdr: &mut PictureHeader,
) -> Result<()> {
    hdr.progressive_frame = r.read_flag()?;
    hdr.frame_coding = if hdr.progressive_frame {
        true
    } else {
        r.read_flag()?
    };

    hdr.top_field_first = r.read_flag()?;
    hdr.repeat_first_field = r.read_flag()?;
    if seq.field_coding {
        let _top_field = r.read_flag()?;
        r.skip(1); // reserved for interlace coding
    }

    hdr.fixed_picture_qp = r.read_flag()?;
    hdr.picture_qp = r.read(7)? as i32;

    Ok(())
}

fn parse_loop_filter_and_chroma(
    r: &mut BitReader<'_>,
    seq: &SequenceHeader,
    hdr: &mut PictureHeader,
) -> Result<()> {
    hdr.loop_filter = !r.read_flag()?; // loop_filter_disable
    if hdr.loop_filter && r.read_flag()? {
        hdr.alpha_offset = r.read_se()?;
        hdr.beta_offset = r.read_se()?;
    }

    if !r.read_flag()? {
        // chroma_quant_param_disable == 0
        hdr.chroma_quant_delta_cb = r.read_se()?;
        hdr.chroma_quant_delta_cr = r.read_se()?;
    }

    hdr.weighted_quant = parse_weighted_quant(r, seq)?;
    hdr.alf = parse_alf_params(r, seq)?;

    if !is_valid_qp(hdr.picture_qp, seq.info.internal_bit_depth as i32) {
        error!(qp = hdr.picture_qp, "invalid picture QP");
    }
    r.align_byte();
    Ok(())
}

/// Decode an intra picture header. The reader is positioned on the `B3`
/// start code.
pub fn parse_intra_picture_header(
    r: &mut BitReader<'_>,
    seq: &SequenceHeader,
) -> Result<PictureHeader> {
    r.skip(32); // start code
    r.skip(32); // bbv_delay

    let mut hdr = empty_picture_header(PictureType::I);

    if r.read_flag()? {
        r.skip(24); // time_code
    }

    if seq.tools.contains(SequenceTools::BACKGROUND_PICTURE) && r.read_flag()? {
        let output = r.read_flag()?;
        hdr.picture_type = if output {
            PictureType::G
        } else {
            PictureType::Gb
        };
    }

    hdr.coi = r.read(8)? as i32;
    if seq.temporal_id_present {
        hdr.temporal_id = r.read(TEMPORAL_ID_BITS)?;
    }
    hdr.display_delay = parse_display_delay(r, seq)?;
    hdr.rps = parse_picture_rps(r, seq)?;

    if seq.info.low_delay {
        let _bbv_check_times = r.read_ue()?;
    }

    parse_picture_trailer(r, seq, &mut hdr)?;
    parse_loop_filter_and_chroma(r, seq, &mut hdr)?;

    Ok(hdr)
}

/// Decode an inter picture header. The reader is positioned on the `B6`
/// start code.
pub fn parse_inter_picture_header(
    r: &mut BitReader<'_>,
    seq: &SequenceHeader,
) -> Result<PictureHeader> {
    r.skip(32); // start code
    r.skip(32); // bbv_delay

    let coding_type = r.read(2)?;

    let mut background_pred = false;
    let mut background_reference = false;
    if seq.tools.contains(SequenceTools::BACKGROUND_PICTURE) && (coding_type == 1 || coding_type == 3)
    {
        if coding_type == 1 {
            background_pred = r.read_flag()?;
        }
        if !background_pred {
            background_reference = r.read_flag()?;
        }
    }

    let picture_type = match coding_type {
        1 if background_pred => PictureType::S,
        1 => PictureType::P,
        3 => PictureType::F,
        _ => PictureType::B,
    };

    let mut hdr = empty_picture_header(picture_type);
    hdr.background_reference = background_reference;

    hdr.coi = r.read(8)? as i32;
    if seq.temporal_id_present {
        hdr.temporal_id = r.read(TEMPORAL_ID_BITS)?;
    }
    hdr.display_delay = parse_display_delay(r, seq)?;
    hdr.rps = parse_picture_rps(r, seq)?;

    if seq.info.low_delay {
        let _bbv_check_times = r.read_ue()?;
    }

    parse_picture_trailer(r, seq, &mut hdr)?;

    if !(coding_type == 2 && hdr.frame_coding) {
        r.skip(1); // reserved
    }
    hdr.random_access_decodable = r.read_flag()?;

    parse_loop_filter_and_chroma(r, seq, &mut hdr)?;

    Ok(hdr)
}

fn empty_picture_header(picture_type: PictureType) -> PictureHeader {
    PictureHeader {
        picture_type,
        coi: 0,
        display_delay: 0,
        temporal_id: 0,
        rps: ReferencePictureSet::default(),
        progressive_frame: true,
        frame_coding: true,
        top_field_first: false,
        repeat_first_field: false,
        fixed_picture_qp: true,
        picture_qp: 0,
        loop_filter: false,
        alpha_offset: 0,
        beta_offset: 0,
        chroma_quant_delta_cb: 0,
        chroma_quant_delta_cr: 0,
        random_access_decodable: false,
        background_reference: false,
        weighted_quant: None,
        alf: AlfPictureParams::default(),
    }
}

/// Per-slice state parsed from a slice start code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceHeader {
    pub lcu_row: usize,
    pub fixed_slice_qp: bool,
    pub slice_qp: i32,
    pub sao_on: [bool; 3],
}

/// Decode a slice header. The reader is positioned on the `00 00 01`
/// prefix; the fourth byte doubles as the slice vertical position.
pub fn parse_slice_header(
    r: &mut BitReader<'_>,
    seq: &SequenceHeader,
    pic: &PictureHeader,
    sao_enabled: bool,
) -> Result<SliceHeader> {
    r.skip(24); // 00 00 01

    let lcu_size = seq.lcu_size();
    let mut lcu_row = r.read(8)? as usize;
    if seq.enc_height > 144 * lcu_size {
        let extension = r.read(3)? as usize;
        lcu_row |= extension << 7;
    }

    let _lcu_col = {
        let mut col = r.read(8)? as usize;
        if seq.enc_width > 255 * lcu_size {
            col |= (r.read(2)? as usize) << 8;
        }
        col
    };

    let (fixed_slice_qp, slice_qp) = if pic.fixed_picture_qp {
        (true, pic.picture_qp)
    } else {
        let fixed = r.read_flag()?;
        (fixed, r.read(7)? as i32)
    };

    if !is_valid_qp(slice_qp, seq.info.internal_bit_depth as i32) {
        error!(qp = slice_qp, "invalid slice QP");
    }

    let mut sao_on = [false; 3];
    if sao_enabled {
        for flag in sao_on.iter_mut() {
            *flag = r.read_flag()?;
        }
    }

    Ok(SliceHeader {
        lcu_row,
        fixed_slice_qp,
        slice_qp,
        sao_on,
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A blank picture header for manager-level tests.
    pub fn empty_header(picture_type: PictureType) -> PictureHeader {
        empty_picture_header(picture_type)
    }

    /// Minimal big-endian bit packer for building header fixtures.
    pub struct BitWriter {
        bytes: Vec<u8>,
        bit: usize,
    }

    impl BitWriter {
        pub fn new() -> Self {
            BitWriter {
                bytes: Vec::new(),
                bit: 0,
            }
        }

        pub fn put(&mut self, n: usize, v: u32) {
            for i in (0..n).rev() {
                if self.bit == 0 {
                    self.bytes.push(0);
                }
                let bit = ((v >> i) & 1) as u8;
                let last = self.bytes.last_mut().unwrap();
                *last |= bit << (7 - self.bit);
                self.bit = (self.bit + 1) & 7;
            }
        }

        pub fn put_ue(&mut self, v: u32) {
            let coded = v + 1;
            let bits = 32 - coded.leading_zeros() as usize;
            self.put(bits - 1, 0);
            self.put(bits, coded);
        }

        pub fn put_se(&mut self, v: i32) {
            let mapped = if v > 0 {
                (v as u32) * 2 - 1
            } else {
                (-v as u32) * 2
            };
            self.put_ue(mapped);
        }

        pub fn align(&mut self) {
            while self.bit != 0 {
                self.put(1, 0);
            }
        }

        pub fn finish(self) -> Vec<u8> {
            self.bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::BitWriter;
    use super::*;

    fn build_sequence_header() -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(32, 0x0000_01B0);
        w.put(8, 0x20); // profile: main
        w.put(8, 0x42); // level
        w.put(1, 1); // progressive
        w.put(1, 0); // field coding
        w.put(14, 176);
        w.put(14, 144);
        w.put(2, 1); // 4:2:0
        w.put(3, 1); // sample precision
        w.put(4, 2); // aspect ratio
        w.put(4, 3); // frame rate code: 25fps
        w.put(18, 3125); // bit rate lower
        w.put(1, 1); // marker
        w.put(12, 0); // bit rate upper
        w.put(1, 0); // low delay
        w.put(1, 1); // marker
        w.put(1, 0); // temporal id
        w.put(18, 0); // bbv size
        w.put(3, 6); // log2 lcu
        w.put(1, 0); // weighted quant
        w.put(1, 1); // background disabled
        w.put(1, 0); // mhp skip
        w.put(1, 0); // dhp
        w.put(1, 0); // wsm
        w.put(1, 1); // amp
        w.put(1, 1); // nsqt
        w.put(1, 1); // sdip
        w.put(1, 1); // 2nd transform
        w.put(1, 1); // sao
        w.put(1, 0); // alf
        w.put(1, 1); // pmvr
        w.put(1, 1); // marker
        w.put(6, 1); // one RPS
        w.put(1, 1); // referenced by others
        w.put(3, 1); // one reference
        w.put(6, 1); // delta coi 1
        w.put(3, 1); // one removal
        w.put(6, 5); // delta coi 5
        w.put(1, 1); // marker
        w.put(5, 4); // reorder delay
        w.put(1, 1); // cross loop filter
        w.put(2, 0); // reserved
        w.align();
        w.finish()
    }

    #[test]
    fn sequence_header_round_trip() {
        let data = build_sequence_header();
        let mut r = BitReader::new(&data);
        let seq = parse_sequence_header(&mut r).unwrap();

        assert_eq!(seq.info.width, 176);
        assert_eq!(seq.info.height, 144);
        assert_eq!(seq.enc_width, 176);
        assert_eq!(seq.enc_height, 144);
        assert_eq!(seq.info.chroma_format, ChromaFormat::Yuv420);
        assert_eq!(seq.info.frame_rate, 25.0);
        assert_eq!(seq.info.bitrate, 3125 * 400);
        assert_eq!(seq.info.internal_bit_depth, 8);
        assert_eq!(seq.log2_lcu_size, 6);
        assert!(!seq.info.low_delay);
        assert_eq!(seq.picture_reorder_delay, 4);
        assert!(seq.cross_loop_filter);
        assert!(seq.tools.contains(SequenceTools::SAO | SequenceTools::AMP));
        assert!(!seq.tools.contains(SequenceTools::ALF));
        assert_eq!(seq.rps_list.len(), 1);
        assert_eq!(seq.rps_list[0].refs(), [1]);
        assert_eq!(seq.rps_list[0].removes(), [5]);
        assert!(seq.rps_list[0].referenced_by_others);
    }

    #[test]
    fn sequence_header_rejects_tiny_dimensions() {
        let mut w = BitWriter::new();
        w.put(32, 0x0000_01B0);
        w.put(8, 0x20);
        w.put(8, 0x42);
        w.put(1, 1);
        w.put(1, 0);
        w.put(14, 8); // width below minimum
        w.put(14, 144);
        w.put(2, 1);
        w.align();
        let data = w.finish();
        let mut r = BitReader::new(&data);
        assert_eq!(
            parse_sequence_header(&mut r),
            Err(Error::InvalidHeader("picture dimensions"))
        );
    }

    fn seq_fixture() -> SequenceHeader {
        let data = build_sequence_header();
        let mut r = BitReader::new(&data);
        parse_sequence_header(&mut r).unwrap()
    }

    fn build_intra_header(coi: u32, predict_rps: bool) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(32, 0x0000_01B3);
        w.put(32, 0); // bbv delay
        w.put(1, 0); // time code flag
        w.put(8, coi);
        w.put_ue(1); // display delay
        if predict_rps {
            w.put(1, 1);
            w.put(5, 0); // RPS index 0
        } else {
            w.put(1, 0);
            w.put(1, 0); // not referenced
            w.put(3, 0); // no refs
            w.put(3, 0); // no removals
            w.put(1, 1); // marker
        }
        w.put(1, 1); // progressive frame
        w.put(1, 0); // top field first
        w.put(1, 0); // repeat first field
        w.put(1, 1); // fixed qp
        w.put(7, 32); // qp
        w.put(1, 0); // loop filter enabled
        w.put(1, 1); // loop filter params present
        w.put_se(2); // alpha offset
        w.put_se(-1); // beta offset
        w.put(1, 1); // chroma quant disabled
        w.align();
        w.finish()
    }

    #[test]
    fn intra_picture_header_round_trip() {
        let seq = seq_fixture();
        let data = build_intra_header(17, true);
        let mut r = BitReader::new(&data);
        let hdr = parse_intra_picture_header(&mut r, &seq).unwrap();

        assert_eq!(hdr.picture_type, PictureType::I);
        assert_eq!(hdr.coi, 17);
        assert_eq!(hdr.display_delay, 1);
        assert_eq!(hdr.rps, seq.rps_list[0]);
        assert_eq!(hdr.picture_qp, 32);
        assert!(hdr.fixed_picture_qp);
        assert!(hdr.loop_filter);
        assert_eq!(hdr.alpha_offset, 2);
        assert_eq!(hdr.beta_offset, -1);
        assert_eq!(hdr.chroma_quant_delta_cb, 0);
    }

    #[test]
    fn intra_picture_header_with_inline_rps() {
        let seq = seq_fixture();
        let data = build_intra_header(0, false);
        let mut r = BitReader::new(&data);
        let hdr = parse_intra_picture_header(&mut r, &seq).unwrap();
        assert!(!hdr.rps.referenced_by_others);
        assert!(hdr.rps.refs().is_empty());
    }

    fn build_inter_header(coding_type: u32, coi: u32) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.put(32, 0x0000_01B6);
        w.put(32, 0); // bbv delay
        w.put(2, coding_type);
        w.put(8, coi);
        w.put_ue(0); // display delay
        w.put(1, 1); // predicted RPS
        w.put(5, 0);
        w.put(1, 1); // progressive
        w.put(1, 0); // top field first
        w.put(1, 0); // repeat first field
        w.put(1, 1); // fixed qp
        w.put(7, 40);
        if coding_type != 2 {
            w.put(1, 0); // reserved
        }
        w.put(1, 1); // random access decodable
        w.put(1, 1); // loop filter disabled
        w.put(1, 1); // chroma quant disabled
        w.align();
        w.finish()
    }

    #[test]
    fn inter_picture_header_types() {
        let seq = seq_fixture();
        for (coding_type, expect) in [(1, PictureType::P), (2, PictureType::B), (3, PictureType::F)]
        {
            let data = build_inter_header(coding_type, 9);
            let mut r = BitReader::new(&data);
            let hdr = parse_inter_picture_header(&mut r, &seq).unwrap();
            assert_eq!(hdr.picture_type, expect, "coding type {coding_type}");
            assert_eq!(hdr.coi, 9);
            assert_eq!(hdr.picture_qp, 40);
            assert!(!hdr.loop_filter);
            assert!(hdr.random_access_decodable);
        }
    }

    #[test]
    fn slice_header_inherits_fixed_picture_qp() {
        let seq = seq_fixture();
        let data = build_intra_header(0, true);
        let mut r = BitReader::new(&data);
        let pic = parse_intra_picture_header(&mut r, &seq).unwrap();

        let mut w = BitWriter::new();
        w.put(24, 0x000001);
        w.put(8, 2); // slice vertical position (row 2)
        w.put(8, 0); // horizontal position
        w.put(1, 1); // sao y
        w.put(1, 0); // sao cb
        w.put(1, 1); // sao cr
        w.align();
        let data = w.finish();
        let mut r = BitReader::new(&data);
        let slice = parse_slice_header(&mut r, &seq, &pic, true).unwrap();

        assert_eq!(slice.lcu_row, 2);
        assert_eq!(slice.slice_qp, 32);
        assert!(slice.fixed_slice_qp);
        assert_eq!(slice.sao_on, [true, false, true]);
    }
}
