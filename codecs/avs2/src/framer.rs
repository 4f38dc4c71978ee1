//! Start-code framing and emulation-prevention removal.
//!
//! The framer turns the raw byte stream into complete coded units: all bytes
//! from one picture/sequence-level start code up to (but excluding) the
//! next. Slices, user data and extensions stay inside the unit of the
//! picture they belong to.

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::types::start_code;

/// Buffers kept warm for coded-unit assembly, on top of what the task slots
/// may hold in flight.
const IDLE_UNITS: usize = 64;

/// A complete coded unit: one picture (headers plus all slices) or one
/// sequence-level unit, start codes preserved, emulation-prevention bytes
/// removed from picture payloads.
#[derive(Debug, Default)]
pub struct CodedUnit {
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
}

/// Recycling pool for coded-unit buffers.
///
/// `acquire` blocks while every buffer is in flight, which is the
/// backpressure `send_packet` exerts on a caller that outruns the decoder.
#[derive(Clone)]
pub struct UnitPool {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl UnitPool {
    pub fn new(extra: usize) -> Self {
        let n = IDLE_UNITS + extra;
        let (tx, rx) = bounded(n);
        for _ in 0..n {
            tx.send(Vec::new()).expect("pool channel sized for all buffers");
        }
        UnitPool { tx, rx }
    }

    pub fn acquire(&self) -> Vec<u8> {
        // The pool owns both endpoints, so recv can only fail at teardown.
        self.rx.recv().unwrap_or_default()
    }

    pub fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let _ = self.tx.try_send(buf);
    }
}

/// Assembles coded units from pushed packets.
pub struct Framer {
    pool: UnitPool,
    current: CodedUnit,
}

impl Framer {
    pub fn new(pool: UnitPool) -> Self {
        let data = pool.acquire();
        Framer {
            pool,
            current: CodedUnit {
                data,
                pts: 0,
                dts: 0,
            },
        }
    }

    /// Append one packet (already validated to begin with `00 00 01 xx`).
    ///
    /// Returns the previously assembling unit when this packet opens a new
    /// picture/sequence-level unit, with emulation-prevention bytes
    /// stripped.
    pub fn push(&mut self, data: &[u8], pts: i64, dts: i64) -> Option<CodedUnit> {
        let classifier = data[3];

        let mut finished = None;
        if start_code::starts_new_unit(classifier) && !self.current.data.is_empty() {
            let fresh = self.pool.acquire();
            let mut unit = std::mem::replace(
                &mut self.current,
                CodedUnit {
                    data: fresh,
                    pts: 0,
                    dts: 0,
                },
            );
            strip_emulation_prevention(&mut unit.data);
            finished = Some(unit);
        }

        self.current.data.extend_from_slice(data);
        self.current.pts = pts;
        self.current.dts = dts;

        finished
    }

    /// Hand out the buffered tail unit, if it could hold at least a start
    /// code plus classifier. Used when draining the decoder.
    pub fn take_buffered(&mut self) -> Option<CodedUnit> {
        if self.current.data.len() < 4 {
            return None;
        }
        let fresh = self.pool.acquire();
        let mut unit = std::mem::replace(
            &mut self.current,
            CodedUnit {
                data: fresh,
                pts: 0,
                dts: 0,
            },
        );
        strip_emulation_prevention(&mut unit.data);
        Some(unit)
    }
}

/// Bit masks keeping the top `n` bits of a byte, for the 2-bit removal
/// below. Only even counts occur.
const BITMASK: [u8; 8] = [0x00, 0x00, 0xC0, 0x00, 0xF0, 0x00, 0xFC, 0x00];

/// Remove emulation-prevention stuffing from an assembled unit, in place.
///
/// Within picture and slice payloads, a `02` byte following exactly two
/// zero bytes carries two stuffing bits in its low end; those two bits are
/// dropped and the remaining bit stream is re-packed into bytes.
/// Sequence-header, user-data and extension payloads are exempt. The unit
/// may contain several embedded start codes (picture header followed by
/// slices); the scan re-classifies at each one.
pub fn strip_emulation_prevention(data: &mut Vec<u8>) {
    let mut found_start_code = false;
    let mut leading_zeros = 0usize;
    let mut in_stripped_payload = false;
    let mut last_byte: u8 = 0;
    let mut last_bit_count = 0usize;
    let mut out = 0usize;

    for pos in 0..data.len() {
        let curr_byte = data[pos];
        let mut curr_bit_count = 8usize;

        match curr_byte {
            0x00 => {
                if found_start_code {
                    // start code of the first slice: [00 00 01 00]
                    in_stripped_payload = true;
                    found_start_code = false;
                }
                leading_zeros += 1;
            }
            0x01 => {
                if leading_zeros >= 2 {
                    found_start_code = true;
                    if last_bit_count != 0 {
                        // terminate the re-packing before a new start code
                        last_bit_count = 0;
                        data[out] = 0;
                        out += 1;
                    }
                }
                leading_zeros = 0;
            }
            0x02 => {
                if in_stripped_payload && leading_zeros == 2 {
                    // the two low bits are stuffing
                    curr_bit_count = 6;
                }
                leading_zeros = 0;
            }
            _ => {
                if found_start_code {
                    in_stripped_payload = !matches!(
                        curr_byte,
                        start_code::SEQUENCE_HEADER
                            | start_code::USER_DATA
                            | start_code::EXTENSION
                    );
                    found_start_code = false;
                }
                leading_zeros = 0;
            }
        }

        if curr_bit_count == 8 {
            if last_bit_count == 0 {
                data[out] = curr_byte;
                out += 1;
            } else {
                data[out] = (last_byte & BITMASK[last_bit_count])
                    | ((curr_byte & BITMASK[8 - last_bit_count]) >> last_bit_count);
                out += 1;
                last_byte = (curr_byte << (8 - last_bit_count)) & BITMASK[last_bit_count];
            }
        } else if last_bit_count == 0 {
            last_byte = curr_byte;
            last_bit_count = curr_bit_count;
        } else {
            data[out] = (last_byte & BITMASK[last_bit_count])
                | ((curr_byte & BITMASK[8 - last_bit_count]) >> last_bit_count);
            out += 1;
            last_byte = (curr_byte << (8 - last_bit_count)) & BITMASK[last_bit_count - 2];
            last_bit_count -= 2;
        }
    }

    if last_bit_count != 0 && last_byte != 0 {
        data[out] = last_byte;
        out += 1;
    }

    data.truncate(out);
}

/// Find the byte offset of the first `00 00 01` start code, if any.
pub fn find_start_code(data: &[u8]) -> Option<usize> {
    data.windows(4)
        .position(|w| w[0] == 0x00 && w[1] == 0x00 && w[2] == 0x01)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(v: &[u8]) -> Vec<u8> {
        let mut data = v.to_vec();
        strip_emulation_prevention(&mut data);
        data
    }

    #[test]
    fn headers_are_exempt() {
        let unit = [
            0x00, 0x00, 0x01, 0xB0, 0x12, 0x44, 0x00, 0x00, 0x02, 0xAB,
        ];
        assert_eq!(strip(&unit), unit);
    }

    #[test]
    fn picture_payload_loses_stuffing_bits() {
        // 02 after two zeros inside an intra picture payload: the two low
        // bits of the 02 vanish and the tail re-packs.
        let unit = [0x00, 0x00, 0x01, 0xB3, 0x00, 0x00, 0x02, 0xFF];
        assert_eq!(
            strip(&unit),
            [0x00, 0x00, 0x01, 0xB3, 0x00, 0x00, 0x03, 0xFC]
        );
    }

    #[test]
    fn stripping_is_idempotent() {
        let vectors: &[&[u8]] = &[
            &[0x00, 0x00, 0x01, 0xB3, 0x00, 0x00, 0x02, 0xFF],
            &[0x00, 0x00, 0x01, 0xB6, 0x55, 0x00, 0x00, 0x02, 0x40, 0x17],
            &[0x00, 0x00, 0x01, 0xB0, 0x00, 0x00, 0x02, 0x11],
        ];
        for v in vectors {
            let once = strip(v);
            let twice = strip(&once);
            assert_eq!(once, twice, "re-stripping must be a no-op");
        }
    }

    #[test]
    fn slice_payloads_inside_picture_unit_are_stripped() {
        // picture header, then slice 00, then an emulation inside the slice
        let unit = [
            0x00, 0x00, 0x01, 0xB6, 0x17, // inter picture header bytes
            0x00, 0x00, 0x01, 0x00, // slice start
            0x00, 0x00, 0x02, 0xFF, // emulated
        ];
        let got = strip(&unit);
        assert_eq!(
            got,
            [
                0x00, 0x00, 0x01, 0xB6, 0x17, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0xFC
            ]
        );
    }

    #[test]
    fn framer_splits_units_on_picture_codes() {
        let pool = UnitPool::new(4);
        let mut framer = Framer::new(pool);

        assert!(framer
            .push(&[0x00, 0x00, 0x01, 0xB0, 0xAA], 0, 0)
            .is_none());
        // slice-level data joins the current unit
        assert!(framer
            .push(&[0x00, 0x00, 0x01, 0xB2, 0x01], 0, 0)
            .is_none());

        let first = framer
            .push(&[0x00, 0x00, 0x01, 0xB3, 0x55], 7, 3)
            .expect("new picture closes the sequence unit");
        assert_eq!(
            first.data,
            [0x00, 0x00, 0x01, 0xB0, 0xAA, 0x00, 0x00, 0x01, 0xB2, 0x01]
        );

        let second = framer
            .push(&[0x00, 0x00, 0x01, 0xB6, 0x01], 9, 9)
            .expect("next picture closes the intra unit");
        assert_eq!(second.data, [0x00, 0x00, 0x01, 0xB3, 0x55]);
        assert_eq!(second.pts, 7);
        assert_eq!(second.dts, 3);

        let tail = framer.take_buffered().expect("buffered tail");
        assert_eq!(tail.data, [0x00, 0x00, 0x01, 0xB6, 0x01]);
        assert!(framer.take_buffered().is_none());
    }

    #[test]
    fn scan_finds_each_unit_start() {
        let stream = [
            0x00, 0x00, 0x01, 0xB0, 0x12, 0x00, 0x00, 0x01, 0xB3, 0x99, 0x00, 0x00, 0x01, 0xB6,
        ];
        let mut kinds = Vec::new();
        let mut rest: &[u8] = &stream;
        while let Some(pos) = find_start_code(rest) {
            kinds.push(rest[pos + 3]);
            rest = &rest[pos + 4..];
        }
        assert_eq!(kinds, [0xB0, 0xB3, 0xB6]);
    }
}
