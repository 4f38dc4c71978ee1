//! Decoded picture buffer: reusable frames with reference counting and
//! row-level reconstruction progress.

use std::cell::UnsafeCell;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::types::{ChromaFormat, PictureType, AVS2_PAD, INVALID_FRAME, MIN_PU_SIZE_IN_BIT};

/// One decoded sample. 10-bit streams use the upper range; 8-bit output is
/// narrowed on delivery.
pub type Pel = u16;

const PLANE_ALIGN: usize = 32;

/// What happens to a frame when its reference count reaches zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposable {
    /// Keep the contents; the frame stays addressable by COI.
    Keep,
    /// Clear the slot so it can be picked for reconstruction.
    CleanWhenIdle,
    /// The frame belongs to a torn-down DPB; forget it entirely.
    DestroyWhenIdle,
}

/// One padded pixel plane.
///
/// The buffer is shared across threads while a picture is in flight: the
/// single producer (the frame's decoding task) writes rows strictly above
/// the progress watermark, consumers read rows at or below it. That
/// protocol, enforced through [`Frame::wait_rows`] / [`Frame::report_row`],
/// is what makes the unchecked interior mutability sound.
pub struct Plane {
    data: UnsafeCell<Box<[Pel]>>,
    width: usize,
    lines: usize,
    stride: usize,
    origin: usize,
    pad: usize,
}

unsafe impl Send for Plane {}
unsafe impl Sync for Plane {}

impl Plane {
    fn new(width: usize, lines: usize, pad: usize) -> Self {
        let stride = (width + 2 * pad).next_multiple_of(PLANE_ALIGN);
        let total = stride * (lines + 2 * pad);
        Plane {
            data: UnsafeCell::new(vec![0; total].into_boxed_slice()),
            width,
            lines,
            stride,
            origin: pad * stride + pad,
            pad,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Buffer index of pixel `(x, y)`; padding is addressable with negative
    /// coordinates down to `-pad`.
    pub fn index(&self, x: isize, y: isize) -> usize {
        (self.origin as isize + y * self.stride as isize + x) as usize
    }

    /// # Safety
    /// Caller must honor the producer/consumer protocol described on
    /// [`Plane`].
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn buf_mut(&self) -> &mut [Pel] {
        &mut *self.data.get()
    }

    /// # Safety
    /// Caller must only read rows already reported through
    /// [`Frame::report_row`] (or own the producing task).
    pub unsafe fn buf(&self) -> &[Pel] {
        &*self.data.get()
    }

    /// Replicate the leftmost/rightmost pixel of row `y` across the
    /// horizontal padding.
    ///
    /// # Safety
    /// Producer-only, like all writes.
    pub unsafe fn pad_row(&self, y: isize) {
        let width = self.width;
        let pad = self.pad;
        let buf = self.buf_mut();
        let row = self.index(0, y);
        let left = buf[row];
        let right = buf[row + width - 1];
        buf[row - pad..row].fill(left);
        buf[row + width..row + width + pad].fill(right);
    }

    /// Copy the padded first/last row into the vertical padding area.
    ///
    /// # Safety
    /// Producer-only.
    unsafe fn pad_vertical(&self, bottom: bool) {
        let stride = self.stride;
        let pad = self.pad;
        let buf = self.buf_mut();
        if bottom {
            let src = self.index(-(self.pad as isize), self.lines as isize - 1);
            for j in 1..=pad {
                buf.copy_within(src..src + stride, src + j * stride);
            }
        } else {
            let src = self.index(-(self.pad as isize), 0);
            for j in 1..=pad {
                buf.copy_within(src..src + stride, src - j * stride);
            }
        }
    }
}

/// Mutable bookkeeping of one frame, guarded by the frame mutex.
#[derive(Debug)]
pub struct FrameState {
    pub ref_count: u32,
    pub disposable: Disposable,
    pub poc: i32,
    pub coi: i32,
    pub referenced_by_others: bool,
    pub picture_type: PictureType,
    pub qp: i32,
    pub pts: i64,
    pub dts: i64,
    pub decode_error: bool,
    /// Reference distances (and their fixed-point inverses) to this
    /// picture's references, for motion vector scaling.
    pub dist_refs: [i32; crate::types::MAX_REFS],
    pub dist_scale_refs: [i32; crate::types::MAX_REFS],
}

impl FrameState {
    fn cleared() -> Self {
        FrameState {
            ref_count: 0,
            disposable: Disposable::Keep,
            poc: INVALID_FRAME,
            coi: INVALID_FRAME,
            referenced_by_others: false,
            picture_type: PictureType::I,
            qp: 0,
            pts: -1,
            dts: -1,
            decode_error: false,
            dist_refs: [-1; crate::types::MAX_REFS],
            dist_scale_refs: [-1; crate::types::MAX_REFS],
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.coi != INVALID_FRAME && self.poc != INVALID_FRAME
    }
}

struct Progress {
    /// Highest LCU row fully reconstructed, filtered and padded; -1 before
    /// any row completes, `i32::MAX` once the picture (or its error path)
    /// finished.
    decoded_line: Mutex<i32>,
    cond: Condvar,
}

/// A frame slot of the DPB: padded planes, per-4x4 motion information, and
/// the shared lifecycle state.
pub struct Frame {
    planes: Vec<Plane>,
    pub width_in_spu: usize,
    pub height_in_spu: usize,
    mv_grid: UnsafeCell<Box<[u32]>>,
    ref_grid: UnsafeCell<Box<[i8]>>,
    state: Mutex<FrameState>,
    progress: Progress,
    pub chroma_format: ChromaFormat,
}

unsafe impl Send for Frame {}
unsafe impl Sync for Frame {}

impl Frame {
    /// Allocate a frame for `enc_width` x `enc_height` (whole-CU) luma
    /// samples. `with_refs` selects the per-4x4 motion buffers that only
    /// reference-capable frames need.
    pub fn new(
        enc_width: usize,
        enc_height: usize,
        chroma_format: ChromaFormat,
        with_refs: bool,
    ) -> Frame {
        let mut planes = vec![Plane::new(enc_width, enc_height, AVS2_PAD)];
        if chroma_format != ChromaFormat::Monochrome {
            let chroma_lines = enc_height >> 1;
            planes.push(Plane::new(enc_width >> 1, chroma_lines, AVS2_PAD / 2));
            planes.push(Plane::new(enc_width >> 1, chroma_lines, AVS2_PAD / 2));
        }

        let width_in_spu = enc_width >> MIN_PU_SIZE_IN_BIT;
        let height_in_spu = enc_height >> MIN_PU_SIZE_IN_BIT;
        let spu_count = if with_refs {
            width_in_spu * height_in_spu
        } else {
            0
        };

        Frame {
            planes,
            width_in_spu,
            height_in_spu,
            mv_grid: UnsafeCell::new(vec![0; spu_count].into_boxed_slice()),
            ref_grid: UnsafeCell::new(vec![-1; spu_count].into_boxed_slice()),
            state: Mutex::new(FrameState::cleared()),
            progress: Progress {
                decoded_line: Mutex::new(-1),
                cond: Condvar::new(),
            },
            chroma_format,
        }
    }

    pub fn plane(&self, i: usize) -> &Plane {
        &self.planes[i]
    }

    pub fn num_planes(&self) -> usize {
        self.planes.len()
    }

    pub fn state(&self) -> parking_lot::MutexGuard<'_, FrameState> {
        self.state.lock()
    }

    /// # Safety
    /// Producer-only while in flight; read-only for consumers afterwards.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn mv_grid(&self) -> &mut [u32] {
        &mut *self.mv_grid.get()
    }

    /// # Safety
    /// Producer-only while in flight; read-only for consumers afterwards.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn ref_grid(&self) -> &mut [i8] {
        &mut *self.ref_grid.get()
    }

    /// Take one reference.
    pub fn add_ref(&self) {
        self.state.lock().ref_count += 1;
    }

    /// Drop one reference; applies the disposable policy when the count
    /// reaches zero.
    pub fn release(&self) {
        let mut st = self.state.lock();
        debug_assert!(st.ref_count > 0, "releasing an unreferenced frame");
        st.ref_count = st.ref_count.saturating_sub(1);
        if st.ref_count == 0 {
            match st.disposable {
                Disposable::Keep => {}
                Disposable::CleanWhenIdle | Disposable::DestroyWhenIdle => {
                    *st = FrameState::cleared();
                }
            }
        }
    }

    /// Clear the slot regardless of policy (caller holds no references).
    pub fn clean(&self) {
        *self.state.lock() = FrameState::cleared();
    }

    /// Reset reconstruction progress for a new picture.
    pub fn reset_progress(&self) {
        *self.progress.decoded_line.lock() = -1;
    }

    /// Publish that LCU row `row` is fully reconstructed, filtered and
    /// padded. Pixels written before this call are visible to any reader
    /// that observes the new watermark.
    pub fn report_row(&self, row: i32) {
        let mut line = self.progress.decoded_line.lock();
        *line = row;
        self.progress.cond.notify_all();
    }

    /// Mark the picture finished (also used on error paths so that waiting
    /// consumers never deadlock).
    pub fn report_complete(&self) {
        self.report_row(i32::MAX);
    }

    /// Block until LCU row `row` of this frame has been produced.
    pub fn wait_rows(&self, row: i32) {
        let mut line = self.progress.decoded_line.lock();
        while *line < row {
            self.progress.cond.wait(&mut line);
        }
    }

    pub fn decoded_line(&self) -> i32 {
        *self.progress.decoded_line.lock()
    }

    /// Pad the rows finished by LCU row `lcu_y`. Rows bordering a pending
    /// LCU row are held back four lines, which the loop filters still
    /// modify.
    pub fn pad_lcu_row(&self, lcu_y: usize, lcu_level: usize, height_in_lcu: usize) {
        for (i, plane) in self.planes.iter().enumerate() {
            let chroma_shift = usize::from(i > 0);
            let mut start = ((lcu_y << lcu_level) >> chroma_shift) as isize;
            let mut end = (((lcu_y + 1) << lcu_level) >> chroma_shift).min(plane.lines) as isize;
            if lcu_y > 0 {
                start -= 4;
            }
            if lcu_y + 1 < height_in_lcu {
                end -= 4;
            }

            // SAFETY: called from the producing task only.
            unsafe {
                for y in start..end {
                    plane.pad_row(y);
                }
                if lcu_y == 0 {
                    plane.pad_vertical(false);
                }
                if lcu_y + 1 == height_in_lcu {
                    plane.pad_vertical(true);
                }
            }
        }
    }
}

/// The fixed pool of frames plus the background-picture slot.
pub struct Dpb {
    frames: Vec<Arc<Frame>>,
    background: Arc<Frame>,
}

impl Dpb {
    pub fn new(
        size: usize,
        enc_width: usize,
        enc_height: usize,
        chroma_format: ChromaFormat,
    ) -> Dpb {
        let frames = (0..size)
            .map(|_| Arc::new(Frame::new(enc_width, enc_height, chroma_format, true)))
            .collect();
        let background = Arc::new(Frame::new(enc_width, enc_height, chroma_format, false));
        // until a background picture is decoded the slot reads as flat
        // black; S pictures must never stall on it
        background.report_complete();
        Dpb { frames, background }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> &[Arc<Frame>] {
        &self.frames
    }

    pub fn background(&self) -> &Arc<Frame> {
        &self.background
    }

    /// Tear the pool down. Frames still referenced (typically held by the
    /// caller as output pictures) are marked destroy-when-unreferenced and
    /// fade away with their last reference.
    pub fn destroy(self) {
        for frame in &self.frames {
            let mut st = frame.state();
            if st.ref_count != 0 {
                warn!(poc = st.poc, "tearing down DPB with a referenced frame");
                st.disposable = Disposable::DestroyWhenIdle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AVS2_PAD;

    #[test]
    fn release_applies_disposable_policy() {
        let frame = Frame::new(64, 64, ChromaFormat::Yuv420, true);
        {
            let mut st = frame.state();
            st.poc = 3;
            st.coi = 3;
            st.ref_count = 2;
            st.disposable = Disposable::CleanWhenIdle;
        }
        frame.release();
        assert!(frame.state().is_occupied(), "still referenced");
        frame.release();
        let st = frame.state();
        assert!(!st.is_occupied(), "cleared once idle");
        assert_eq!(st.ref_count, 0);
        assert_eq!(st.disposable, Disposable::Keep);
    }

    #[test]
    fn keep_frames_survive_idle() {
        let frame = Frame::new(64, 64, ChromaFormat::Yuv420, true);
        {
            let mut st = frame.state();
            st.poc = 7;
            st.coi = 7;
            st.ref_count = 1;
            st.referenced_by_others = true;
        }
        frame.release();
        assert!(frame.state().is_occupied());
    }

    #[test]
    fn row_progress_watermark() {
        let frame = Arc::new(Frame::new(64, 128, ChromaFormat::Yuv420, true));
        frame.reset_progress();
        assert_eq!(frame.decoded_line(), -1);

        let waiter = {
            let frame = frame.clone();
            std::thread::spawn(move || {
                frame.wait_rows(1);
                frame.decoded_line()
            })
        };
        frame.report_row(0);
        frame.report_row(1);
        assert!(waiter.join().unwrap() >= 1);

        frame.report_complete();
        frame.wait_rows(i32::MAX); // returns immediately
    }

    #[test]
    fn padding_replicates_borders() {
        let frame = Frame::new(64, 64, ChromaFormat::Yuv420, false);
        let luma = frame.plane(0);
        // paint a gradient into the visible area
        unsafe {
            let buf = luma.buf_mut();
            for y in 0..64isize {
                for x in 0..64isize {
                    buf[luma.index(x, y)] = (16 + x + y * 3) as Pel;
                }
            }
        }
        frame.pad_lcu_row(0, 6, 1);

        unsafe {
            let buf = luma.buf();
            for y in 0..64isize {
                let left = buf[luma.index(0, y)];
                let right = buf[luma.index(63, y)];
                for k in 1..=AVS2_PAD as isize {
                    assert_eq!(buf[luma.index(-k, y)], left);
                    assert_eq!(buf[luma.index(63 + k, y)], right);
                }
            }
            // vertical: padded rows replicate the edge rows, padding included
            for k in 1..=AVS2_PAD as isize {
                assert_eq!(
                    buf[luma.index(-5, -k)],
                    buf[luma.index(-5, 0)],
                    "top padding row {k}"
                );
                assert_eq!(buf[luma.index(30, 63 + k)], buf[luma.index(30, 63)]);
            }
        }
    }

    #[test]
    fn chroma_planes_use_half_pad() {
        let frame = Frame::new(64, 64, ChromaFormat::Yuv420, false);
        assert_eq!(frame.num_planes(), 3);
        assert_eq!(frame.plane(1).width(), 32);
        assert_eq!(frame.plane(1).lines(), 32);
        // index(-pad/2, 0) must be the first pixel of the padded row
        let c = frame.plane(1);
        assert_eq!(c.index(-((AVS2_PAD / 2) as isize), 0) % c.stride(), 0);
    }

    #[test]
    fn monochrome_has_single_plane() {
        let frame = Frame::new(64, 64, ChromaFormat::Monochrome, false);
        assert_eq!(frame.num_planes(), 1);
    }
}
