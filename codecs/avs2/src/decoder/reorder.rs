//! Display-order serialization of reconstructed frames.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::dpb::Frame;

/// How many frames may pile up ahead of the cursor before we assume the
/// expected POC will never arrive.
const MAX_DELAYED_FRAMES: usize = 8;

/// Outcome of one delivery attempt.
pub enum PopResult {
    /// The next frame in display order.
    Deliver(Arc<Frame>),
    /// The expected POC is still being decoded; poll again shortly.
    Wait,
    /// Nothing queued.
    Empty,
}

/// POC-ordered queue of pictures awaiting delivery.
///
/// Entries are keyed (hence iterated) by POC; the monotonic `cursor` names
/// the next POC to hand out. The cursor only moves forward, except that a
/// flush or an unfillable gap may jump it ahead with a warning.
pub struct OutputQueue {
    cursor: i32,
    queue: BTreeMap<i32, Arc<Frame>>,
    /// A frame is currently being copied out to the caller.
    pub busy: bool,
}

impl OutputQueue {
    pub fn new() -> Self {
        OutputQueue {
            cursor: -1,
            queue: BTreeMap::new(),
            busy: false,
        }
    }

    /// POC the queue will deliver next; -1 until the first intra picture
    /// fixes the origin.
    pub fn cursor(&self) -> i32 {
        self.cursor
    }

    pub fn set_cursor(&mut self, poc: i32) {
        self.cursor = poc;
    }

    pub fn is_started(&self) -> bool {
        self.cursor != -1
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn min_poc(&self) -> Option<i32> {
        self.queue.keys().next().copied()
    }

    pub fn contains_poc(&self, poc: i32) -> bool {
        self.queue.contains_key(&poc)
    }

    /// Queue a reconstructed frame for display. The frame carries the
    /// output-queue reference taken when it was bound for reconstruction.
    pub fn insert(&mut self, poc: i32, frame: Arc<Frame>) {
        debug_assert!(!self.queue.contains_key(&poc), "duplicate POC {poc} queued");
        self.queue.insert(poc, frame);
    }

    /// Try to produce the next display-ordered frame.
    ///
    /// `balanced` reports whether every picture fed into the decoder has
    /// been accounted for (decoded or queued), which lets a flush walk the
    /// cursor across gaps without waiting.
    pub fn try_pop(&mut self, flushing: bool, balanced: bool) -> PopResult {
        loop {
            let Some((&head_poc, _)) = self.queue.iter().next() else {
                return PopResult::Empty;
            };

            if head_poc == self.cursor {
                let frame = self.queue.remove(&head_poc).expect("head exists");
                self.cursor += 1;
                return PopResult::Deliver(frame);
            }

            if head_poc < self.cursor {
                // a frame from before the cursor can no longer be displayed
                warn!(poc = head_poc, cursor = self.cursor, "dropping late frame");
                let frame = self.queue.remove(&head_poc).expect("head exists");
                frame.release();
                continue;
            }

            // head_poc > cursor: the expected frame is missing
            if flushing && balanced {
                self.cursor += 1;
                continue;
            }

            if self.queue.len() < MAX_DELAYED_FRAMES {
                return PopResult::Wait;
            }

            warn!(poc = head_poc, "advance to discontinuous POC");
            self.cursor = head_poc;
        }
    }

    /// Drop everything (decoder teardown).
    pub fn clear(&mut self) {
        for (_, frame) in std::mem::take(&mut self.queue) {
            frame.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::dpb::Frame;
    use crate::types::ChromaFormat;

    fn frame(poc: i32) -> Arc<Frame> {
        let f = Arc::new(Frame::new(64, 64, ChromaFormat::Yuv420, false));
        {
            let mut st = f.state();
            st.poc = poc;
            st.coi = poc;
            st.ref_count = 1; // the output-queue reference
        }
        f
    }

    fn pop_poc(q: &mut OutputQueue) -> Option<i32> {
        match q.try_pop(false, false) {
            PopResult::Deliver(f) => {
                let poc = f.state().poc;
                f.release();
                Some(poc)
            }
            _ => None,
        }
    }

    #[test]
    fn delivers_in_poc_order() {
        let mut q = OutputQueue::new();
        q.set_cursor(0);
        q.insert(3, frame(3));
        q.insert(1, frame(1));
        q.insert(0, frame(0));
        q.insert(2, frame(2));

        assert_eq!(pop_poc(&mut q), Some(0));
        assert_eq!(pop_poc(&mut q), Some(1));
        assert_eq!(pop_poc(&mut q), Some(2));
        assert_eq!(pop_poc(&mut q), Some(3));
        assert!(matches!(q.try_pop(false, false), PopResult::Empty));
    }

    #[test]
    fn waits_for_missing_poc_while_queue_is_short() {
        let mut q = OutputQueue::new();
        q.set_cursor(0);
        q.insert(1, frame(1));
        assert!(matches!(q.try_pop(false, false), PopResult::Wait));
        // the expected frame shows up late
        q.insert(0, frame(0));
        assert_eq!(pop_poc(&mut q), Some(0));
        assert_eq!(pop_poc(&mut q), Some(1));
    }

    #[test]
    fn jumps_cursor_once_too_many_frames_are_delayed() {
        let mut q = OutputQueue::new();
        q.set_cursor(0);
        for poc in 5..5 + MAX_DELAYED_FRAMES as i32 {
            q.insert(poc, frame(poc));
        }
        // cursor 0 will never be filled; the queue is full enough to move on
        assert_eq!(pop_poc(&mut q), Some(5));
        assert_eq!(q.cursor(), 6);
    }

    #[test]
    fn flush_skips_gaps_when_accounting_balances() {
        let mut q = OutputQueue::new();
        q.set_cursor(0);
        q.insert(4, frame(4));
        match q.try_pop(true, true) {
            PopResult::Deliver(f) => {
                assert_eq!(f.state().poc, 4);
                f.release();
            }
            _ => panic!("flush should cross the gap"),
        }
        assert_eq!(q.cursor(), 5);
    }

    #[test]
    fn late_frames_are_discarded() {
        let mut q = OutputQueue::new();
        q.set_cursor(10);
        q.insert(7, frame(7));
        q.insert(10, frame(10));
        // 7 is behind the cursor: dropped, 10 delivered
        assert_eq!(pop_poc(&mut q), Some(10));
        assert!(q.is_empty());
    }
}
