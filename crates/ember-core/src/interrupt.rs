use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::EmberError;
use once_cell::sync::Lazy;

static INTERRUPTED: Lazy<Arc<AtomicBool>> = Lazy::new(|| Arc::new(AtomicBool::new(false)));

/// Ask every running evaluation to stop at its next loop iteration or call.
/// The request stays set until the next top-level evaluation begins.
pub fn request_interrupt() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// The flag itself, for hosts that set it from a signal handler.
pub fn interrupt_flag() -> Arc<AtomicBool> {
    Arc::clone(&INTERRUPTED)
}

pub fn is_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn clear_interrupt() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

/// Called when a top-level evaluation starts. A request left over from an
/// earlier run (already reported, or caught by a `try`) must not abort the
/// new one. Returns whether a stale request was dropped.
pub fn begin_evaluation() -> bool {
    let stale = INTERRUPTED.swap(false, Ordering::SeqCst);
    if stale {
        log::debug!("dropping interrupt request left over from a previous evaluation");
    }
    stale
}

/// Polled by loops, function calls and `dobench`/`dorun` iterations.
pub fn check_for_interrupt() -> Result<(), EmberError> {
    if is_interrupted() {
        Err(EmberError::interrupted())
    } else {
        Ok(())
    }
}
