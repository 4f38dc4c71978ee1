use thiserror::Error;

/// All errors the decoder can surface to the caller.
///
/// Stream-structure problems are recoverable: the offending picture is
/// dropped and decoding resumes at the next unit. Only configuration errors
/// at open time are fatal to the decoder as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A packet with no payload was submitted.
    #[error("null input packet")]
    EmptyPacket,

    /// A packet shorter than a start code plus unit classifier.
    #[error("invalid packet, 4 bytes are needed (including start code), got {0}")]
    PacketTooShort(usize),

    /// The packet does not begin with `00 00 01`.
    #[error("invalid byte stream, not a start code: {0:02x}{1:02x}{2:02x}")]
    MissingStartCode(u8, u8, u8),

    /// The bit reader ran past the end of the coded unit.
    #[error("bitstream exhausted")]
    OutOfData,

    /// A header field violated its permitted range.
    #[error("invalid header: {0}")]
    InvalidHeader(&'static str),

    /// The stream uses a tool this decoder rejects (field coding,
    /// 4:2:2/4:4:4 chroma).
    #[error("unsupported stream feature: {0}")]
    Unsupported(&'static str),

    /// The first picture of a stream (or after a flush) was not intra.
    #[error("sequence should start with an I frame")]
    SequenceNotStartedWithIntra,

    /// A reference picture demanded by the RPS is not in the DPB.
    #[error("reference frame <COI {coi}> not found")]
    ReferenceNotFound { coi: i32 },

    /// A B picture without exactly one forward and one backward reference.
    #[error("wrong reference frames for B frame (COI {coi}, POC {poc})")]
    BrokenBReferences { coi: i32, poc: i32 },

    /// No reconstruction slot could be obtained even after forced
    /// reclamation.
    #[error("no frame available for a new task, DPB too small")]
    DpbExhausted,

    /// Thread configuration rejected at open time.
    #[error("invalid thread number configuration")]
    InvalidThreadConfig,
}

pub type Result<T> = std::result::Result<T, Error>;
