//! The decoder manager: packet intake, picture dispatch, output delivery.

pub(crate) mod aec;
pub(crate) mod cpu;
pub(crate) mod cu;
pub(crate) mod dpb;
pub(crate) mod filters;
pub(crate) mod kernels;
pub(crate) mod picture;
pub(crate) mod quant;
pub(crate) mod refs;
pub(crate) mod reorder;
pub(crate) mod scheduler;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::framer::{find_start_code, CodedUnit, Framer, UnitPool};
use crate::parser::{
    parse_inter_picture_header, parse_intra_picture_header, parse_sequence_header, BitReader,
};
use crate::types::{start_code, PictureType, SequenceHeader, SequenceInfo, COI_CYCLE};
use dpb::{Dpb, Frame};
use kernels::Kernels;
use picture::PictureDecoder;
use reorder::{OutputQueue, PopResult};
use scheduler::{TaskSlots, WorkerPool};

/// Upper bound on decoding threads.
const MAX_THREADS: usize = 16;

/// Extra DPB slots beyond tasks plus reorder delay.
const DPB_SLACK: usize = 16;

/// Decoder creation parameters.
#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    /// Worker thread count; 0 picks the machine's parallelism.
    pub threads: usize,
    /// Keep AVX/AVX2 kernels off even if the CPU has them.
    pub disable_avx: bool,
}

/// One input packet: a byte-stream chunk starting on a start code.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub data: &'a [u8],
    pub pts: i64,
    pub dts: i64,
}

/// What a receive/flush call produced.
pub enum DecoderEvent {
    /// Nothing deliverable yet.
    Pending,
    /// A (new) sequence header; always precedes the first frame decoded
    /// under it.
    Header(SequenceInfo),
    /// One decoded picture in display order.
    Frame(DecodedFrame),
    /// Flush only: everything has been drained.
    End,
}

/// A delivered picture. Plane data is copied out of the DPB at the
/// sequence's output bit depth; dropping the value is the unref.
pub struct DecodedFrame {
    planes: [Vec<u8>; 3],
    pub num_planes: usize,
    pub widths: [usize; 3],
    pub lines: [usize; 3],
    /// Bytes per row of each plane.
    pub strides: [usize; 3],
    pub bytes_per_sample: usize,
    pub bit_depth: u32,
    pub poc: i32,
    pub picture_type: PictureType,
    pub qp: i32,
    pub pts: i64,
    pub dts: i64,
    pub decode_error: bool,
}

impl DecodedFrame {
    pub fn plane(&self, i: usize) -> &[u8] {
        &self.planes[i]
    }

    /// Release the frame. Equivalent to dropping it.
    pub fn unref(self) {}

    fn from_frame(frame: &Frame, info: &SequenceInfo) -> DecodedFrame {
        let st = frame.state();
        let num_planes = frame.num_planes();
        let internal_depth = info.internal_bit_depth;
        let output_depth = info.output_bit_depth;
        let bytes_per_sample = info.bytes_per_sample as usize;
        let shift = internal_depth.saturating_sub(output_depth);

        let mut planes: [Vec<u8>; 3] = [Vec::new(), Vec::new(), Vec::new()];
        let mut widths = [0usize; 3];
        let mut lines = [0usize; 3];
        let mut strides = [0usize; 3];

        for comp in 0..num_planes {
            let plane = frame.plane(comp);
            let w = if comp == 0 {
                info.width as usize
            } else {
                (info.width as usize) / 2
            };
            let h = if comp == 0 {
                info.height as usize
            } else {
                (info.height as usize) / 2
            };
            widths[comp] = w;
            lines[comp] = h;
            strides[comp] = w * bytes_per_sample;

            let mut out = Vec::with_capacity(w * h * bytes_per_sample);
            // SAFETY: the picture is complete; we hold the delivery
            // reference.
            let buf = unsafe { plane.buf() };
            for y in 0..h {
                let row = plane.index(0, y as isize);
                for &px in &buf[row..row + w] {
                    let v = if shift > 0 {
                        let rounded = (u32::from(px) + (1 << (shift - 1))) >> shift;
                        rounded.min((1 << output_depth) - 1)
                    } else {
                        u32::from(px)
                    };
                    if bytes_per_sample == 2 {
                        out.extend_from_slice(&(v as u16).to_le_bytes());
                    } else {
                        out.push(v as u8);
                    }
                }
            }
            planes[comp] = out;
        }

        DecodedFrame {
            planes,
            num_planes,
            widths,
            lines,
            strides,
            bytes_per_sample,
            bit_depth: output_depth,
            poc: st.poc,
            picture_type: st.picture_type,
            qp: st.qp,
            pts: st.pts,
            dts: st.dts,
            decode_error: st.decode_error,
        }
    }
}

/// Manager-level mutable state, guarded by [`Shared::state`].
pub(crate) struct ManagerState {
    pub seq: Option<Arc<SequenceHeader>>,
    pub dpb: Option<Dpb>,
    pub output: OutputQueue,
    /// COIs whose frames leave the DPB before the next picture decodes.
    pub pending_removals: Vec<i32>,
    pub frames_in: u32,
    pub frames_out: u32,
    pub prev_coi: i32,
    pub wrap_count: i32,
    pub new_sps: bool,
    pub num_frames_to_output: u32,
    pub dpb_warned: bool,
    /// POC each busy task slot is reconstructing.
    pub decoding_pocs: Vec<Option<i32>>,
}

impl ManagerState {
    pub fn new(num_slots: usize) -> Self {
        ManagerState {
            seq: None,
            dpb: None,
            output: OutputQueue::new(),
            pending_removals: Vec::new(),
            frames_in: 0,
            frames_out: 0,
            prev_coi: -1,
            wrap_count: 0,
            new_sps: false,
            num_frames_to_output: 0,
            dpb_warned: false,
            decoding_pocs: vec![None; num_slots],
        }
    }
}

/// State shared between the caller thread and the reconstruction workers.
pub(crate) struct Shared {
    pub exit: AtomicBool,
    pub flushing: AtomicBool,
    pub state: Mutex<ManagerState>,
    /// Serializes header parsing and reference-list evaluation: their side
    /// effects on the manager are global.
    pub aec_lock: Mutex<()>,
}

impl Shared {
    pub fn new(state: ManagerState) -> Self {
        Shared {
            exit: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            state: Mutex::new(state),
            aec_lock: Mutex::new(()),
        }
    }
}

/// The AVS2 decoder.
pub struct Decoder {
    shared: Arc<Shared>,
    framer: Framer,
    pool: UnitPool,
    slots: Arc<TaskSlots>,
    workers: WorkerPool,
    kernels: Arc<Kernels>,
    num_total_threads: usize,
    num_parse_threads: usize,
}

impl Decoder {
    /// Open a decoder. Fails only on an impossible thread configuration.
    pub fn new(options: &DecoderOptions) -> Result<Decoder> {
        let mut threads = options.threads;
        if threads == 0 {
            threads = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
        }
        if threads > MAX_THREADS {
            warn!("max number of threads reached, forcing to {MAX_THREADS}");
            threads = MAX_THREADS;
        }

        let num_parse_threads = if threads > 3 { threads / 2 + 1 } else { threads };
        let num_rec_threads = threads - num_parse_threads.min(threads);
        let num_slots = threads + 1;

        if threads < 1 || num_parse_threads < 1 || num_parse_threads > threads {
            error!(
                threads,
                num_parse_threads, "invalid thread number configuration"
            );
            return Err(Error::InvalidThreadConfig);
        }

        let cpu_flags = cpu::detect(options.disable_avx);
        info!(
            version = env!("CARGO_PKG_VERSION"),
            "avs2 decoder, CPU capabilities: {}",
            cpu::capability_string(cpu_flags)
        );
        info!(
            "using {threads} thread(s): {num_parse_threads}(frame)+{num_rec_threads}(pool), {num_slots} tasks"
        );

        let shared = Arc::new(Shared::new(ManagerState::new(num_slots)));
        let pool = UnitPool::new(threads);

        Ok(Decoder {
            shared,
            framer: Framer::new(pool.clone()),
            pool,
            slots: Arc::new(TaskSlots::new(num_slots)),
            workers: WorkerPool::new(threads),
            kernels: Arc::new(Kernels::new(cpu_flags)),
            num_total_threads: threads,
            num_parse_threads,
        })
    }

    /// Feed one packet of the byte stream. A packet must begin with a
    /// start code; data is buffered until a complete coded unit forms.
    pub fn send_packet(&mut self, packet: &Packet<'_>) -> Result<()> {
        if packet.data.is_empty() {
            debug!("null input packet");
            return Err(Error::EmptyPacket);
        }
        if packet.data.len() < 4 {
            debug!(
                len = packet.data.len(),
                "invalid packet, 4 bytes are needed (including start code)"
            );
            return Err(Error::PacketTooShort(packet.data.len()));
        }
        if packet.data[0] != 0x00 || packet.data[1] != 0x00 || packet.data[2] != 0x01 {
            error!(
                "invalid input byte stream, not a start code: {:02x}{:02x}{:02x}",
                packet.data[0], packet.data[1], packet.data[2]
            );
            return Err(Error::MissingStartCode(
                packet.data[0],
                packet.data[1],
                packet.data[2],
            ));
        }

        if let Some(unit) = self.framer.push(packet.data, packet.pts, packet.dts) {
            self.decode_unit(unit);
        }
        Ok(())
    }

    /// Poll for the next sequence header or display-ordered frame.
    pub fn recv_frame(&mut self) -> DecoderEvent {
        let pending = {
            let state = self.shared.state.lock();
            state.num_frames_to_output > 0 || state.new_sps
        };
        if !pending {
            return DecoderEvent::Pending;
        }
        let event = self.get_output(false);
        if let DecoderEvent::Frame(_) = &event {
            self.shared.state.lock().num_frames_to_output -= 1;
        }
        event
    }

    /// Drain buffered input and queued pictures. Returns [`DecoderEvent::End`]
    /// once nothing is left.
    pub fn flush(&mut self) -> DecoderEvent {
        self.shared.flushing.store(true, Ordering::Release);

        if let Some(unit) = self.framer.take_buffered() {
            self.decode_unit(unit);
        }

        match self.get_output(true) {
            DecoderEvent::Pending => DecoderEvent::End,
            event => event,
        }
    }

    /// Shut the decoder down, joining all workers.
    pub fn close(self) {}

    /* -----------------------------------------------------------------
     * internals
     */

    /// Walk a coded unit's start codes: sequence-level headers update the
    /// manager, the picture (at most one per unit) is dispatched.
    fn decode_unit(&mut self, unit: CodedUnit) {
        let mut offset = 0usize;

        while let Some(pos) = find_start_code(&unit.data[offset..]) {
            let abs = offset + pos;
            let classifier = unit.data[abs + 3];
            match classifier {
                start_code::SEQUENCE_HEADER => {
                    let mut reader = BitReader::new(&unit.data[abs..]);
                    match parse_sequence_header(&mut reader) {
                        Ok(seq) => self.set_sequence(seq),
                        Err(err) => error!("invalid sequence header: {err}"),
                    }
                    offset = abs + 4;
                }
                start_code::INTRA_PICTURE | start_code::INTER_PICTURE => {
                    // at most one picture per unit; ownership moves on
                    self.handle_picture(unit, abs, classifier);
                    return;
                }
                _ => {
                    // user data, extensions, sequence end: skip
                    offset = abs + 4;
                }
            }
        }

        self.pool.release(unit.data);
    }

    /// Install a new sequence header; a resolution change tears the DPB
    /// down and rebuilds it.
    fn set_sequence(&mut self, seq: SequenceHeader) {
        let mut state = self.shared.state.lock();

        let new_resolution = state.seq.as_ref().map_or(true, |old| {
            old.info.width != seq.info.width || old.info.height != seq.info.height
        });

        if new_resolution {
            info!(
                width = seq.info.width,
                height = seq.info.height,
                "sequence resolution"
            );
            if seq.info.width % 2 != 0 || seq.info.height % 2 != 0 {
                error!(
                    "sequence resolution {}x{} is not even",
                    seq.info.width, seq.info.height
                );
            }

            state.wrap_count = 0;
            state.prev_coi = -1;

            if let Some(dpb) = state.dpb.take() {
                dpb.destroy();
            }
            let dpb_size =
                self.slots.len() + seq.picture_reorder_delay.max(0) as usize + DPB_SLACK;
            state.dpb = Some(Dpb::new(
                dpb_size,
                seq.enc_width,
                seq.enc_height,
                seq.info.chroma_format,
            ));
            state.new_sps = true;
        }

        state.seq = Some(Arc::new(seq));
    }

    /// Parse the picture header, bind references and a reconstruction slot,
    /// and hand the picture to the worker pool. Consumes the unit either
    /// way.
    fn handle_picture(&mut self, unit: CodedUnit, abs: usize, classifier: u8) {
        let _aec = self.shared.aec_lock.lock();

        let Some(seq) = self.shared.state.lock().seq.clone() else {
            error!("picture before any sequence header, discarded");
            self.pool.release(unit.data);
            return;
        };

        let intra = classifier == start_code::INTRA_PICTURE;
        if !intra && !self.shared.state.lock().output.is_started() {
            error!("sequence should start with an I frame");
            self.pool.release(unit.data);
            return;
        }

        let mut reader = BitReader::new(&unit.data[abs..]);
        let hdr = if intra {
            parse_intra_picture_header(&mut reader, &seq)
        } else {
            parse_inter_picture_header(&mut reader, &seq)
        };
        let hdr = match hdr {
            Ok(hdr) => hdr,
            Err(err) => {
                error!("broken picture header: {err}, picture discarded");
                self.pool.release(unit.data);
                return;
            }
        };

        if !hdr.frame_coding {
            error!("field coding is not supported, picture discarded");
            self.pool.release(unit.data);
            return;
        }

        let slice_offset = abs + reader.bit_pos() / 8;

        let (coi, poc) = {
            let mut state = self.shared.state.lock();
            let (coi, poc) = extend_coi_poc(&mut state, &seq, hdr.coi, hdr.display_delay);
            if !state.output.is_started() && intra {
                if coi != 0 {
                    info!(coi, "COI of the first frame");
                }
                state.output.set_cursor(poc);
            }
            (coi, poc)
        };

        let Some(slot) = self.slots.acquire(&self.shared.exit) else {
            self.pool.release(unit.data);
            return;
        };

        let picked = refs::acquire_references(&self.shared, &hdr, coi, poc, unit.pts, unit.dts);
        let picked = match picked {
            Ok(p) => p,
            Err(err) => {
                debug!("reference setup failed: {err}");
                self.slots.release(slot);
                self.pool.release(unit.data);
                return;
            }
        };

        let is_gb = hdr.picture_type == PictureType::Gb;
        let background_ref = {
            let state = self.shared.state.lock();
            state.dpb.as_ref().map(|d| d.background().clone())
        };

        let mut pic = PictureDecoder::new(
            seq,
            self.kernels.clone(),
            hdr,
            poc,
            coi,
            picked.recon,
            picked.refs,
            background_ref,
        );

        {
            let mut state = self.shared.state.lock();
            if !is_gb {
                state.frames_in += 1;
                state.num_frames_to_output += 1;
            }
            state.decoding_pocs[slot] = Some(poc);
        }

        let shared = self.shared.clone();
        let slots = self.slots.clone();
        let pool = self.pool.clone();
        self.workers.run(Box::new(move || {
            pic.decode_picture_data(&unit.data, slice_offset);

            for fref in &pic.refs {
                fref.release();
            }

            let frame = pic.frame.clone();
            let mut state = shared.state.lock();
            state.decoding_pocs[slot] = None;
            // background pictures are never displayed
            if !is_gb {
                state.output.insert(pic.poc, frame.clone());
                // the decoding task's reference; the queue keeps the other
                frame.release();
            }
            drop(state);

            slots.release(slot);
            pool.release(unit.data);
        }));
    }

    /// The output side of `recv_frame`/`flush`: next header event or
    /// display-ordered frame.
    fn get_output(&mut self, is_flush: bool) -> DecoderEvent {
        let b_wait_new_frame = {
            let state = self.shared.state.lock();
            state.frames_in + self.slots.len() as u32
                > state.frames_out + 8 + self.num_parse_threads as u32
        };

        loop {
            let mut state = self.shared.state.lock();

            if state.new_sps {
                state.new_sps = false;
                if let Some(seq) = &state.seq {
                    return DecoderEvent::Header(seq.info.clone());
                }
                return DecoderEvent::Pending;
            }

            if !(state.frames_in > state.frames_out && (b_wait_new_frame || is_flush)) {
                return DecoderEvent::Pending;
            }

            let balanced =
                state.frames_in == state.frames_out + state.output.len() as u32;
            match state.output.try_pop(is_flush, balanced) {
                PopResult::Deliver(frame) => {
                    state.frames_out += 1;
                    state.output.busy = true;
                    let info = state
                        .seq
                        .as_ref()
                        .map(|s| s.info.clone())
                        .expect("a delivered frame implies a sequence");
                    drop(state);

                    let out = DecodedFrame::from_frame(&frame, &info);
                    frame.release();
                    self.shared.state.lock().output.busy = false;
                    return DecoderEvent::Frame(out);
                }
                PopResult::Wait | PopResult::Empty => {
                    drop(state);
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

/// COI wrap bookkeeping and POC derivation for a newly parsed picture.
///
/// COI is an 8-bit counter: a value below the previous one bumps the wrap
/// count (strictly below — an exactly repeated COI reads as discontinuous
/// but not as a wrap). POC adds the display delay against the sequence's
/// reorder delay unless the stream is low-delay.
fn extend_coi_poc(
    state: &mut ManagerState,
    seq: &SequenceHeader,
    raw_coi: i32,
    display_delay: i32,
) -> (i32, i32) {
    if state.output.is_started() && raw_coi != (state.prev_coi + 1) % COI_CYCLE {
        debug!(prev = state.prev_coi, curr = raw_coi, "discontinuous COI");
    }
    if raw_coi < state.prev_coi {
        state.wrap_count += 1;
    }
    state.prev_coi = raw_coi;

    let coi = raw_coi + state.wrap_count * COI_CYCLE;
    let poc = if seq.info.low_delay {
        coi
    } else {
        coi + display_delay - seq.picture_reorder_delay
    };
    (coi, poc)
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.shared.exit.store(true, Ordering::Release);
        self.workers.shutdown();

        let mut state = self.shared.state.lock();
        state.output.clear();
        if let Some(dpb) = state.dpb.take() {
            dpb.destroy();
        }
        debug!(threads = self.num_total_threads, "decoder closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> Decoder {
        Decoder::new(&DecoderOptions {
            threads: 2,
            disable_avx: false,
        })
        .unwrap()
    }

    fn packet(data: &[u8]) -> Packet<'_> {
        Packet { data, pts: 0, dts: 0 }
    }

    #[test]
    fn empty_packet_is_rejected() {
        let mut dec = decoder();
        assert_eq!(dec.send_packet(&packet(&[])), Err(Error::EmptyPacket));
    }

    #[test]
    fn short_packet_is_rejected() {
        let mut dec = decoder();
        assert_eq!(
            dec.send_packet(&packet(&[0x00, 0x00, 0x01])),
            Err(Error::PacketTooShort(3))
        );
    }

    #[test]
    fn non_start_code_prefix_is_rejected() {
        let mut dec = decoder();
        assert_eq!(
            dec.send_packet(&packet(&[0xFF, 0xFF, 0xFF, 0xB3, 0x00])),
            Err(Error::MissingStartCode(0xFF, 0xFF, 0xFF))
        );
    }

    #[test]
    fn fresh_decoder_has_nothing_to_deliver() {
        let mut dec = decoder();
        assert!(matches!(dec.recv_frame(), DecoderEvent::Pending));
        assert!(matches!(dec.flush(), DecoderEvent::End));
    }

    fn sequence_header_packet() -> Vec<u8> {
        // 176x144 4:2:0 main profile, one RPS, reorder delay 4 (mirrors the
        // parser fixtures)
        let mut w = crate::parser::test_support::BitWriter::new();
        w.put(32, 0x0000_01B0);
        w.put(8, 0x20);
        w.put(8, 0x42);
        w.put(1, 1);
        w.put(1, 0);
        w.put(14, 176);
        w.put(14, 144);
        w.put(2, 1);
        w.put(3, 1);
        w.put(4, 2);
        w.put(4, 3);
        w.put(18, 3125);
        w.put(1, 1);
        w.put(12, 0);
        w.put(1, 0);
        w.put(1, 1);
        w.put(1, 0);
        w.put(18, 0);
        w.put(3, 6);
        w.put(1, 0);
        w.put(1, 1);
        for _ in 0..3 {
            w.put(1, 0);
        }
        for _ in 0..4 {
            w.put(1, 1); // amp, nsqt, sdip, 2nd transform
        }
        w.put(1, 1); // sao
        w.put(1, 0); // alf
        w.put(1, 1); // pmvr
        w.put(1, 1); // marker
        w.put(6, 1);
        w.put(1, 1);
        w.put(3, 1);
        w.put(6, 1);
        w.put(3, 0);
        w.put(1, 1);
        w.put(5, 4);
        w.put(1, 1);
        w.put(2, 0);
        w.align();
        w.finish()
    }

    #[test]
    fn sequence_header_is_announced_before_frames() {
        let mut dec = decoder();
        dec.send_packet(&packet(&sequence_header_packet())).unwrap();
        // the next picture start code closes the sequence-header unit
        dec.send_packet(&packet(&[0x00, 0x00, 0x01, 0xB3])).unwrap();

        match dec.recv_frame() {
            DecoderEvent::Header(info) => {
                assert_eq!(info.width, 176);
                assert_eq!(info.height, 144);
                assert_eq!(info.frame_rate, 25.0);
            }
            _ => panic!("expected a sequence header event"),
        }
        // the truncated intra picture dies in header parsing; the stream
        // drains without a frame
        assert!(matches!(dec.flush(), DecoderEvent::End));
    }

    #[test]
    fn stream_must_open_with_an_intra_picture() {
        let mut dec = decoder();
        dec.send_packet(&packet(&sequence_header_packet())).unwrap();
        // an inter picture arrives first: it is discarded
        dec.send_packet(&packet(&[0x00, 0x00, 0x01, 0xB6, 0x00, 0x00]))
            .unwrap();
        dec.send_packet(&packet(&[0x00, 0x00, 0x01, 0xB1])).unwrap();
        // the pending sequence header is announced, then the stream drains
        assert!(matches!(dec.flush(), DecoderEvent::Header(_)));
        assert!(matches!(dec.flush(), DecoderEvent::End));
        assert_eq!(dec.shared.state.lock().frames_in, 0);
    }

    #[test]
    fn resolution_change_rebuilds_the_dpb() {
        let mut dec = decoder();
        dec.send_packet(&packet(&sequence_header_packet())).unwrap();
        dec.send_packet(&packet(&[0x00, 0x00, 0x01, 0xB1])).unwrap();
        // force the buffered unit through
        let _ = dec.flush();
        let first_size = dec.shared.state.lock().dpb.as_ref().map(|d| d.len());
        assert!(first_size.is_some(), "DPB built on first sequence header");
    }

    #[test]
    fn close_joins_workers() {
        let dec = decoder();
        dec.close();
    }

    #[test]
    fn coi_wrap_extends_monotonically() {
        let data = sequence_header_packet();
        let mut reader = BitReader::new(&data);
        let seq = parse_sequence_header(&mut reader).unwrap();

        let mut state = ManagerState::new(2);
        state.output.set_cursor(0); // stream already started

        let cois: Vec<i32> = [254, 255, 0, 1]
            .into_iter()
            .map(|raw| extend_coi_poc(&mut state, &seq, raw, 0).0)
            .collect();
        assert_eq!(cois, [254, 255, 256, 257], "wrap extends the counter");

        // an exactly repeated COI is discontinuous but not a wrap
        let (coi, _) = extend_coi_poc(&mut state, &seq, 1, 0);
        assert_eq!(coi, 257);

        // reorder-mode POC folds display delay against the reorder delay
        let (coi, poc) = extend_coi_poc(&mut state, &seq, 2, 4);
        assert_eq!(coi, 258);
        assert_eq!(poc, 258 + 4 - seq.picture_reorder_delay);
    }
}
