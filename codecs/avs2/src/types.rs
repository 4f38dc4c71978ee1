//! Stream-level vocabulary: unit kinds, picture types, header records.

use num_derive::FromPrimitive;

/// Number of samples padded around every reference plane (luma; chroma uses
/// half). Motion compensation may read this far outside the picture without
/// bounds checks.
pub const AVS2_PAD: usize = 64 + 16;

/// Maximum number of reference frames a picture may use.
pub const MAX_REFS: usize = 4;

/// Maximum number of reference picture sets in a sequence header.
pub const MAX_RPS: usize = 32;

/// COI is an 8-bit counter in the picture header.
pub const COI_CYCLE: i32 = 256;

/// Frames further than this from the current POC are considered obsolete.
pub const MAX_POC_DISTANCE: i32 = 128;

/// Marker for an unoccupied DPB slot.
pub const INVALID_FRAME: i32 = -1;

pub const MAX_CU_SIZE: usize = 64;
pub const MIN_CU_SIZE: usize = 8;
pub const MIN_CU_SIZE_IN_BIT: usize = 3;
pub const MIN_PU_SIZE_IN_BIT: usize = 2;

/// Fixed-point unit for reference-distance scaling (`scale = MULTI / dist`).
pub const MULTI: i32 = 16384;

/// Integer frame rates indexed by `frame_rate_code - 1`.
pub const FRAME_RATE: [f32; 8] = [
    24000.0 / 1001.0,
    24.0,
    25.0,
    30000.0 / 1001.0,
    30.0,
    50.0,
    60000.0 / 1001.0,
    60.0,
];

/// Start-code classifiers of the AVS2 byte stream.
pub mod start_code {
    pub const SEQUENCE_HEADER: u8 = 0xB0;
    pub const SEQUENCE_END: u8 = 0xB1;
    pub const USER_DATA: u8 = 0xB2;
    pub const INTRA_PICTURE: u8 = 0xB3;
    pub const EXTENSION: u8 = 0xB5;
    pub const INTER_PICTURE: u8 = 0xB6;
    pub const VIDEO_EDIT: u8 = 0xB7;
    pub const SLICE_MAX: u8 = 0x8F;

    /// Does this classifier terminate the unit currently being assembled?
    /// Only sequence/picture level codes split the stream into coded units;
    /// user data, extensions and slices belong to the unit they follow.
    pub fn starts_new_unit(code: u8) -> bool {
        matches!(
            code,
            SEQUENCE_HEADER | SEQUENCE_END | INTRA_PICTURE | INTER_PICTURE | VIDEO_EDIT
        )
    }

    pub fn is_slice(code: u8) -> bool {
        code <= SLICE_MAX
    }
}

/// AVS2 profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Profile {
    MainPicture = 0x12,
    Main = 0x20,
    Main10 = 0x22,
}

/// Chroma sub-sampling of the sequence. Only 4:2:0 and 4:0:0 are decodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum ChromaFormat {
    Monochrome = 0,
    Yuv420 = 1,
    Yuv422 = 2,
    Yuv444 = 3,
}

/// Picture (slice) types of AVS2, including the surveillance-profile
/// background pictures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PictureType {
    #[default]
    I,
    P,
    B,
    /// Background picture that is output like an I picture.
    G,
    F,
    /// Picture predicted from the background reference.
    S,
    /// Background picture that is decoded but never output.
    Gb,
}

impl PictureType {
    pub fn is_intra(self) -> bool {
        matches!(self, PictureType::I | PictureType::G | PictureType::Gb)
    }

    pub fn is_background(self) -> bool {
        matches!(self, PictureType::G | PictureType::Gb)
    }
}

bitflags::bitflags! {
    /// Coding tools switched on by the sequence header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SequenceTools: u32 {
        const BACKGROUND_PICTURE = 1 << 0;
        const MHP_SKIP           = 1 << 1;
        const DHP                = 1 << 2;
        const WSM                = 1 << 3;
        const AMP                = 1 << 4;
        const NSQT               = 1 << 5;
        const SDIP               = 1 << 6;
        const SECOND_TRANSFORM   = 1 << 7;
        const SAO                = 1 << 8;
        const ALF                = 1 << 9;
        const PMVR               = 1 << 10;
        const WEIGHTED_QUANT     = 1 << 11;
    }
}

/// A reference picture set: which frames the current picture predicts from,
/// and which frames leave the DPB once it is decoded. All entries are delta
/// COI values relative to the current picture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReferencePictureSet {
    pub referenced_by_others: bool,
    num_refs: usize,
    ref_pics: [i32; MAX_REFS],
    num_remove: usize,
    remove_pics: [i32; 8],
}

impl ReferencePictureSet {
    pub fn new(referenced_by_others: bool, refs: &[i32], removes: &[i32]) -> Self {
        let mut rps = ReferencePictureSet {
            referenced_by_others,
            ..Default::default()
        };
        for &r in refs {
            rps.push_ref(r);
        }
        for &r in removes {
            rps.push_remove(r);
        }
        rps
    }

    pub fn push_ref(&mut self, delta_coi: i32) {
        self.ref_pics[self.num_refs] = delta_coi;
        self.num_refs += 1;
    }

    pub fn push_remove(&mut self, delta_coi: i32) {
        self.remove_pics[self.num_remove] = delta_coi;
        self.num_remove += 1;
    }

    pub fn refs(&self) -> &[i32] {
        &self.ref_pics[..self.num_refs]
    }

    pub fn removes(&self) -> &[i32] {
        &self.remove_pics[..self.num_remove]
    }
}

/// Sequence-level information surfaced to the caller alongside decoded
/// frames. Delivered once per sequence header (and again after a mid-stream
/// resolution change).
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceInfo {
    pub profile_id: u32,
    pub level_id: u32,
    pub progressive: bool,
    pub width: u32,
    pub height: u32,
    pub chroma_format: ChromaFormat,
    pub aspect_ratio: u32,
    pub low_delay: bool,
    pub bitrate: u32,
    pub internal_bit_depth: u32,
    pub output_bit_depth: u32,
    pub bytes_per_sample: u32,
    pub frame_rate: f32,
    pub frame_rate_code: u32,
}

/// A fully parsed sequence header. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceHeader {
    pub info: SequenceInfo,
    pub sample_precision: u32,
    pub encoding_precision: u32,
    /// Width/height rounded up to whole smallest-CU multiples.
    pub enc_width: usize,
    pub enc_height: usize,
    pub log2_lcu_size: usize,
    pub field_coding: bool,
    pub temporal_id_present: bool,
    pub tools: SequenceTools,
    pub cross_loop_filter: bool,
    pub picture_reorder_delay: i32,
    pub rps_list: Vec<ReferencePictureSet>,
    /// Sequence-level weighting matrices for 4x4 and 8x8 blocks.
    pub wq_matrix: [[i16; 64]; 2],
}

impl SequenceHeader {
    pub fn lcu_size(&self) -> usize {
        1 << self.log2_lcu_size
    }

    pub fn width_in_lcu(&self) -> usize {
        (self.enc_width + self.lcu_size() - 1) >> self.log2_lcu_size
    }

    pub fn height_in_lcu(&self) -> usize {
        (self.enc_height + self.lcu_size() - 1) >> self.log2_lcu_size
    }
}

/// Picture-level weighted quantization parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightedQuantParams {
    pub pic_wq_data_index: u32,
    pub wq_param_index: u32,
    pub wq_model: u32,
    pub quant_param_undetail: [i16; 6],
    pub quant_param_detail: [i16; 6],
    pub pic_wq_matrix: [[i16; 64]; 2],
}

impl Default for WeightedQuantParams {
    fn default() -> Self {
        Self {
            pic_wq_data_index: 0,
            wq_param_index: 0,
            wq_model: 0,
            quant_param_undetail: [0; 6],
            quant_param_detail: [0; 6],
            pic_wq_matrix: [[0; 64]; 2],
        }
    }
}

/// Per-component ALF filter parameters read from the picture header region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlfPictureParams {
    pub enabled: [bool; 3],
    /// Luma: up to 16 region filters; chroma components use one each.
    pub luma_filters: Vec<[i32; 9]>,
    pub luma_region_map: [u8; 16],
    pub chroma_filter: [[i32; 9]; 2],
}

/// A fully parsed picture header (intra or inter).
#[derive(Debug, Clone, PartialEq)]
pub struct PictureHeader {
    pub picture_type: PictureType,
    /// Coding order index as read from the stream (8 bit); wrap-extended by
    /// the manager before use.
    pub coi: i32,
    pub display_delay: i32,
    pub temporal_id: u32,
    pub rps: ReferencePictureSet,
    pub progressive_frame: bool,
    /// `true` for frame coding; field pictures are rejected upstream.
    pub frame_coding: bool,
    pub top_field_first: bool,
    pub repeat_first_field: bool,
    pub fixed_picture_qp: bool,
    pub picture_qp: i32,
    pub loop_filter: bool,
    pub alpha_offset: i32,
    pub beta_offset: i32,
    pub chroma_quant_delta_cb: i32,
    pub chroma_quant_delta_cr: i32,
    pub random_access_decodable: bool,
    /// Set for S pictures predicting from the background reference.
    pub background_reference: bool,
    pub weighted_quant: Option<WeightedQuantParams>,
    pub alf: AlfPictureParams,
}

/// A motion vector in quarter-sample units.
///
/// Stored as two explicit components; the 32-bit packed form used in motion
/// grids goes through [`MotionVector::pack`] / [`MotionVector::unpack`]
/// rather than aliasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionVector {
    pub x: i16,
    pub y: i16,
}

impl MotionVector {
    pub const ZERO: MotionVector = MotionVector { x: 0, y: 0 };

    pub fn new(x: i16, y: i16) -> Self {
        MotionVector { x, y }
    }

    pub fn pack(self) -> u32 {
        ((self.y as u16 as u32) << 16) | (self.x as u16 as u32)
    }

    pub fn unpack(v: u32) -> Self {
        MotionVector {
            x: (v & 0xFFFF) as u16 as i16,
            y: (v >> 16) as u16 as i16,
        }
    }
}

/// First and second reference indices of a 4x4 block. `-1` marks "no
/// reference".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefIndices {
    pub first: i8,
    pub second: i8,
}

impl Default for RefIndices {
    fn default() -> Self {
        RefIndices {
            first: -1,
            second: -1,
        }
    }
}

impl RefIndices {
    pub fn pack(self) -> u16 {
        ((self.second as u8 as u16) << 8) | (self.first as u8 as u16)
    }

    pub fn unpack(v: u16) -> Self {
        RefIndices {
            first: (v & 0xFF) as u8 as i8,
            second: (v >> 8) as u8 as i8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_vector_pack_round_trip() {
        for mv in [
            MotionVector::new(0, 0),
            MotionVector::new(-1, 1),
            MotionVector::new(i16::MIN, i16::MAX),
            MotionVector::new(355, -89),
        ] {
            assert_eq!(MotionVector::unpack(mv.pack()), mv);
        }
    }

    #[test]
    fn ref_indices_pack_round_trip() {
        let r = RefIndices {
            first: -1,
            second: 3,
        };
        assert_eq!(RefIndices::unpack(r.pack()), r);
        assert_eq!(RefIndices::default().pack(), 0xFFFF);
    }

    #[test]
    fn unit_boundaries() {
        assert!(start_code::starts_new_unit(start_code::SEQUENCE_HEADER));
        assert!(start_code::starts_new_unit(start_code::INTRA_PICTURE));
        assert!(start_code::starts_new_unit(start_code::INTER_PICTURE));
        assert!(start_code::starts_new_unit(start_code::VIDEO_EDIT));
        assert!(!start_code::starts_new_unit(start_code::USER_DATA));
        assert!(!start_code::starts_new_unit(start_code::EXTENSION));
        assert!(!start_code::starts_new_unit(0x00));
        assert!(start_code::is_slice(0x8F));
        assert!(!start_code::is_slice(0x90));
    }
}
