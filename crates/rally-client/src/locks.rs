//! Per-phase re-entrancy locks.
//!
//! Each bootstrap phase may run at most once at a time. A second attempt while
//! one is in flight is dropped, not queued: the running phase drives the next
//! transition itself. Locks belong to one session instance and are released
//! when the [`PhaseGuard`] drops, whether the phase finished, failed or
//! panicked.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Initialize,
    Connect,
    Configure,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Initialize => "initialize",
            Phase::Connect => "connect",
            Phase::Configure => "configure",
        })
    }
}

#[derive(Debug, Default)]
pub struct PhaseLocks {
    initialize: AtomicBool,
    connect: AtomicBool,
    configure: AtomicBool,
}

impl PhaseLocks {
    fn flag(&self, phase: Phase) -> &AtomicBool {
        match phase {
            Phase::Initialize => &self.initialize,
            Phase::Connect => &self.connect,
            Phase::Configure => &self.configure,
        }
    }

    /// Take the lock for `phase`, or `None` if it is already held.
    pub fn try_acquire(&self, phase: Phase) -> Option<PhaseGuard<'_>> {
        self.flag(phase)
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PhaseGuard { locks: self, phase })
    }

    pub fn is_held(&self, phase: Phase) -> bool {
        self.flag(phase).load(Ordering::Acquire)
    }
}

/// Releases its phase lock on drop.
#[must_use = "the phase lock is released as soon as the guard drops"]
pub struct PhaseGuard<'a> {
    locks: &'a PhaseLocks,
    phase: Phase,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.locks.flag(self.phase).store(false, Ordering::Release);
    }
}
