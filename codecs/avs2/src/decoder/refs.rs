//! Reference-list management: RPS evaluation, reconstruction-slot
//! selection and deferred DPB removals.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use super::dpb::{Disposable, Frame};
use super::{ManagerState, Shared};
use crate::error::{Error, Result};
use crate::types::{PictureHeader, PictureType, MAX_POC_DISTANCE, MAX_REFS, MULTI};

/// Everything a picture needs to start reconstruction: its references (B
/// pictures: index 0 backward, index 1 forward) and the frame it decodes
/// into, holding one reference for the decoding task and one for the
/// output queue.
pub struct PictureRefs {
    pub refs: Vec<Arc<Frame>>,
    pub recon: Arc<Frame>,
}

impl std::fmt::Debug for PictureRefs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PictureRefs")
            .field("refs_len", &self.refs.len())
            .finish()
    }
}

/// Clip a doubled POC difference into the standard's distance-index range.
fn distance_index(distance: i32) -> i32 {
    (distance + 512) & 511
}

/// Apply the removal list queued by the previous picture.
fn apply_pending_removals(state: &mut ManagerState) {
    let Some(dpb) = state.dpb.as_ref() else {
        return;
    };
    for &coi in &state.pending_removals {
        for frame in dpb.frames() {
            let mut st = frame.state();
            if !st.is_occupied() || st.coi != coi {
                continue;
            }
            if st.ref_count == 0 {
                drop(st);
                frame.clean();
            } else {
                st.disposable = Disposable::CleanWhenIdle;
            }
            break;
        }
    }
    state.pending_removals.clear();
}

/// Reclaim frames that drifted too far from the current POC to ever be
/// referenced again.
fn sweep_obsolete_frames(state: &mut ManagerState, poc: i32) {
    let Some(dpb) = state.dpb.as_ref() else {
        return;
    };
    for frame in dpb.frames() {
        let mut st = frame.state();
        if !st.is_occupied() {
            continue;
        }
        if (st.poc - poc).abs() >= MAX_POC_DISTANCE {
            if st.ref_count == 0 {
                warn!(poc = st.poc, "force to remove obsolete frame");
                drop(st);
                frame.clean();
            } else if st.disposable == Disposable::Keep {
                st.disposable = Disposable::CleanWhenIdle;
                warn!(poc = st.poc, "force to mark obsolete frame as removable");
            }
        }
    }
}

/// Is the frame the output queue expects genuinely unavailable — neither
/// queued, nor decoding, nor being delivered right now?
fn output_is_blocked(state: &ManagerState) -> bool {
    let expected = state.output.cursor();

    if state.output.contains_poc(expected) {
        return false;
    }
    if let Some(min) = state.output.min_poc() {
        if min < expected {
            // a late frame will be dropped shortly, freeing a slot
            return false;
        }
    }
    if state.decoding_pocs.iter().flatten().any(|&p| p == expected) {
        return false;
    }
    if state.output.busy {
        return false;
    }
    true
}

/// Find one reference frame by COI, taking a reference on it.
fn resolve_reference(state: &ManagerState, ref_coi: i32) -> Option<Arc<Frame>> {
    let dpb = state.dpb.as_ref()?;
    for frame in dpb.frames() {
        let mut st = frame.state();
        if !st.is_occupied() || st.coi != ref_coi {
            continue;
        }
        if st.disposable == Disposable::Keep && st.referenced_by_others {
            st.ref_count += 1;
            return Some(frame.clone());
        }
    }
    None
}

/// Pick an idle frame for reconstruction and charge it with the decoder
/// and output-queue references.
fn try_pick_recon(state: &ManagerState, hdr: &PictureHeader) -> Option<Arc<Frame>> {
    let dpb = state.dpb.as_ref()?;
    for frame in dpb.frames() {
        let mut st = frame.state();
        if st.ref_count == 0 && !st.referenced_by_others && st.disposable == Disposable::Keep {
            st.ref_count = 2;
            st.disposable = if hdr.rps.referenced_by_others {
                Disposable::Keep
            } else {
                Disposable::CleanWhenIdle
            };
            return Some(frame.clone());
        }
    }
    None
}

/// Last-resort reclamation: take the unreferenced frame with the lowest
/// POC as the reconstruction target.
fn force_pick_recon(state: &ManagerState, hdr: &PictureHeader) -> Option<Arc<Frame>> {
    let dpb = state.dpb.as_ref()?;
    let mut best: Option<(i32, Arc<Frame>)> = None;
    for frame in dpb.frames() {
        let st = frame.state();
        if st.ref_count == 0 && best.as_ref().map_or(true, |(poc, _)| st.poc < *poc) {
            let poc = st.poc;
            drop(st);
            best = Some((poc, frame.clone()));
        }
    }
    let (_, frame) = best?;
    {
        let mut st = frame.state();
        st.ref_count = 2;
        st.disposable = if hdr.rps.referenced_by_others {
            Disposable::Keep
        } else {
            Disposable::CleanWhenIdle
        };
    }
    Some(frame)
}

fn release_refs(refs: &[Arc<Frame>]) {
    for r in refs {
        r.release();
    }
}

/// Initialize the reconstruction frame's bookkeeping and the reference
/// distances used for motion-vector scaling.
fn init_recon(
    recon: &Frame,
    refs: &[Arc<Frame>],
    hdr: &PictureHeader,
    poc: i32,
    coi: i32,
    pts: i64,
    dts: i64,
) {
    let mut st = recon.state();
    st.picture_type = hdr.picture_type;
    st.qp = hdr.picture_qp;
    st.poc = poc;
    st.coi = coi;
    st.referenced_by_others = hdr.rps.referenced_by_others;
    st.pts = pts;
    st.dts = dts;
    st.decode_error = false;
    st.dist_refs = [-1; MAX_REFS];
    st.dist_scale_refs = [-1; MAX_REFS];

    let mut set_dist = |i: usize, distance: i32, what: &str| {
        let mut d = distance_index(distance);
        if d <= 0 {
            error!("invalid reference frame distance. {what}");
            d = 1;
        }
        st.dist_refs[i] = d;
        st.dist_scale_refs[i] = MULTI / d;
    };

    if hdr.picture_type == PictureType::B {
        // index 0 backward, index 1 forward
        set_dist(1, 2 * (poc - refs[1].state().poc), "B forward");
        set_dist(0, 2 * (refs[0].state().poc - poc), "B backward");
    } else {
        for (i, fref) in refs.iter().enumerate() {
            set_dist(i, 2 * (poc - fref.state().poc), "forward");
        }
    }
    drop(st);

    recon.reset_progress();
    // SAFETY: the frame is exclusively ours until dispatch.
    unsafe {
        recon.mv_grid().fill(0);
        recon.ref_grid().fill(-1);
    }
}

/// Resolve the picture's references and reconstruction slot.
pub fn acquire_references(
    shared: &Shared,
    hdr: &PictureHeader,
    coi: i32,
    poc: i32,
    pts: i64,
    dts: i64,
) -> Result<PictureRefs> {
    let mut state = shared.state.lock();

    apply_pending_removals(&mut state);

    if hdr.picture_type == PictureType::Gb {
        let recon = state
            .dpb
            .as_ref()
            .ok_or(Error::DpbExhausted)?
            .background()
            .clone();
        drop(state);
        init_recon(&recon, &[], hdr, poc, coi, pts, dts);
        return Ok(PictureRefs {
            refs: Vec::new(),
            recon,
        });
    }

    // resolve every RPS entry or fail the picture
    let mut refs: Vec<Arc<Frame>> = Vec::with_capacity(hdr.rps.refs().len());
    for &delta in hdr.rps.refs() {
        let ref_coi = coi - delta;
        match resolve_reference(&state, ref_coi) {
            Some(frame) => refs.push(frame),
            None => {
                error!(coi, poc, ref_coi, "reference frame not found in the DPB");
                release_refs(&refs);
                return Err(Error::ReferenceNotFound { coi: ref_coi });
            }
        }
    }

    if hdr.picture_type == PictureType::B {
        let ordered = refs.len() == 2
            && refs[0].state().poc > poc // backward reference is in the future
            && refs[1].state().poc < poc; // forward reference is in the past
        if !ordered {
            error!(coi, poc, "B picture references are not one past, one future");
            release_refs(&refs);
            return Err(Error::BrokenBReferences { coi, poc });
        }
    }

    // removals take effect when the next picture starts
    state.pending_removals = hdr.rps.removes().iter().map(|d| coi - d).collect();

    sweep_obsolete_frames(&mut state, poc);

    // reconstruction slot, with escalating recovery
    let recon = loop {
        if shared.exit.load(Ordering::Acquire) {
            release_refs(&refs);
            return Err(Error::DpbExhausted);
        }
        if let Some(frame) = try_pick_recon(&state, hdr) {
            break frame;
        }

        if !state.dpb_warned {
            warn!("running out of DPB buffers, performance may suffer");
            state.dpb_warned = true;
        }

        if output_is_blocked(&state) {
            if state.output.is_empty() {
                match force_pick_recon(&state, hdr) {
                    Some(frame) => {
                        warn!("force one frame as the reconstruction frame");
                        break frame;
                    }
                    None => {
                        error!(
                            "no frame for new task, DPB size ({}) too small?",
                            state.dpb.as_ref().map_or(0, |d| d.len())
                        );
                        release_refs(&refs);
                        return Err(Error::DpbExhausted);
                    }
                }
            } else {
                // the expected frame will never arrive: let the output run
                let next = state.output.min_poc().expect("queue is non-empty");
                error!(
                    expected = state.output.cursor(),
                    next, "the expected frame is unavailable, proceeding"
                );
                state.output.set_cursor(next);
            }
        }

        // let the output side release some frame, then look again
        drop(state);
        std::thread::sleep(Duration::from_millis(1));
        state = shared.state.lock();
    };

    init_recon(&recon, &refs, hdr, poc, coi, pts, dts);

    if hdr.picture_type == PictureType::S {
        // S pictures re-anchor temporal prediction: motion state of the
        // whole DPB is reset
        if let Some(dpb) = state.dpb.as_ref() {
            for frame in dpb.frames() {
                // SAFETY: grid resets guarded by the manager lock.
                unsafe {
                    frame.mv_grid().fill(0);
                    frame.ref_grid().fill(0);
                }
            }
        }
    }

    Ok(PictureRefs { refs, recon })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::dpb::Dpb;
    use crate::decoder::ManagerState;
    use crate::types::{ChromaFormat, ReferencePictureSet};

    fn shared_with_dpb(size: usize) -> Shared {
        let mut state = ManagerState::new(4);
        state.dpb = Some(Dpb::new(size, 64, 64, ChromaFormat::Yuv420));
        Shared::new(state)
    }

    fn occupy(shared: &Shared, slot: usize, coi: i32, poc: i32, referenced: bool) {
        let state = shared.state.lock();
        let frame = &state.dpb.as_ref().unwrap().frames()[slot];
        let mut st = frame.state();
        st.coi = coi;
        st.poc = poc;
        st.referenced_by_others = referenced;
    }

    fn header(picture_type: PictureType, refs: &[i32], removes: &[i32]) -> PictureHeader {
        let mut hdr = crate::parser::test_support::empty_header(picture_type);
        hdr.rps = ReferencePictureSet::new(true, refs, removes);
        hdr
    }

    #[test]
    fn resolves_references_by_delta_coi() {
        let shared = shared_with_dpb(6);
        occupy(&shared, 0, 4, 4, true);

        let hdr = header(PictureType::P, &[1], &[]);
        let picked = acquire_references(&shared, &hdr, 5, 5, 0, 0).unwrap();
        assert_eq!(picked.refs.len(), 1);
        assert_eq!(picked.refs[0].state().poc, 4);
        assert_eq!(picked.refs[0].state().ref_count, 1);
        let st = picked.recon.state();
        assert_eq!(st.ref_count, 2, "decoder + output queue");
        assert_eq!(st.poc, 5);
        assert_eq!(st.dist_refs[0], 2);
        assert_eq!(st.dist_scale_refs[0], MULTI / 2);
    }

    #[test]
    fn missing_reference_fails_the_picture() {
        let shared = shared_with_dpb(4);
        let hdr = header(PictureType::P, &[2], &[]);
        let err = acquire_references(&shared, &hdr, 9, 9, 0, 0).unwrap_err();
        assert_eq!(err, Error::ReferenceNotFound { coi: 7 });
    }

    #[test]
    fn b_picture_requires_one_past_one_future() {
        let shared = shared_with_dpb(8);
        // both references in the past: invalid for B
        occupy(&shared, 0, 2, 2, true);
        occupy(&shared, 1, 3, 3, true);
        let hdr = header(PictureType::B, &[2, 1], &[]);
        let err = acquire_references(&shared, &hdr, 4, 4, 0, 0).unwrap_err();
        assert!(matches!(err, Error::BrokenBReferences { .. }));
        // the partial acquisitions were rolled back
        let state = shared.state.lock();
        for frame in state.dpb.as_ref().unwrap().frames() {
            assert_eq!(frame.state().ref_count, 0);
        }
    }

    #[test]
    fn b_picture_distances_use_both_directions() {
        let shared = shared_with_dpb(8);
        occupy(&shared, 0, 4, 6, true); // future (backward)
        occupy(&shared, 1, 3, 2, true); // past (forward)
        let hdr = header(PictureType::B, &[1, 2], &[]);
        let picked = acquire_references(&shared, &hdr, 5, 4, 0, 0).unwrap();
        let st = picked.recon.state();
        assert_eq!(st.dist_refs[0], 4, "backward: 2*(6-4)");
        assert_eq!(st.dist_refs[1], 4, "forward: 2*(4-2)");
    }

    #[test]
    fn removals_take_effect_on_the_next_picture() {
        let shared = shared_with_dpb(6);
        occupy(&shared, 0, 4, 4, true);
        occupy(&shared, 1, 3, 3, true);

        let hdr = header(PictureType::P, &[1], &[2]);
        let picked = acquire_references(&shared, &hdr, 5, 5, 0, 0).unwrap();
        {
            // COI 3 is queued for removal but still present
            let state = shared.state.lock();
            assert_eq!(state.pending_removals, vec![3]);
            assert!(state.dpb.as_ref().unwrap().frames()[1].state().is_occupied());
        }
        drop(picked);

        let hdr2 = header(PictureType::P, &[1], &[]);
        let _ = acquire_references(&shared, &hdr2, 6, 6, 0, 0).unwrap();
        let state = shared.state.lock();
        assert!(
            !state.dpb.as_ref().unwrap().frames()[1].state().is_occupied(),
            "removal applied at the next picture"
        );
    }

    #[test]
    fn gb_picture_uses_the_background_slot() {
        let shared = shared_with_dpb(4);
        let hdr = header(PictureType::Gb, &[], &[]);
        let picked = acquire_references(&shared, &hdr, 0, 0, 0, 0).unwrap();
        let state = shared.state.lock();
        assert!(Arc::ptr_eq(
            &picked.recon,
            state.dpb.as_ref().unwrap().background()
        ));
        assert!(picked.refs.is_empty());
    }

    #[test]
    fn non_referenced_pictures_clean_when_idle() {
        let shared = shared_with_dpb(4);
        let mut hdr = header(PictureType::I, &[], &[]);
        hdr.rps.referenced_by_others = false;
        let picked = acquire_references(&shared, &hdr, 0, 0, 0, 0).unwrap();
        assert_eq!(picked.recon.state().disposable, Disposable::CleanWhenIdle);
    }

    #[test]
    fn obsolete_frames_are_swept() {
        let shared = shared_with_dpb(6);
        occupy(&shared, 0, 4, 4, true); // the reference we need
        occupy(&shared, 1, 1, 300, true); // way out of range
        let hdr = header(PictureType::P, &[1], &[]);
        let _ = acquire_references(&shared, &hdr, 5, 5, 0, 0).unwrap();
        let state = shared.state.lock();
        assert!(
            !state.dpb.as_ref().unwrap().frames()[1].state().is_occupied(),
            "distant frame reclaimed"
        );
    }
}
