use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use thiserror::Error;
use tracing::warn;

use super::clock::{FrameClock, RewindMode, RewindRequest};

static REWIND_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_rewind_lock_poison_once(operation: &'static str) {
    if REWIND_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "rewind lock poisoned; recovered inner value");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a {pending} request is already pending this tick; ignoring {rejected}")]
pub struct RequestConflict {
    pub pending: RewindRequest,
    pub rejected: RewindRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewindStatus {
    pub current_frame: u64,
    pub rewind_offset: u64,
    pub horizon: u64,
    pub mode: RewindMode,
}

impl RewindStatus {
    pub(crate) fn from_clock(clock: &FrameClock) -> Self {
        Self {
            current_frame: clock.current_frame(),
            rewind_offset: clock.rewind_offset(),
            horizon: clock.horizon(),
            mode: clock.mode(),
        }
    }
}

impl Default for RewindStatus {
    fn default() -> Self {
        Self {
            current_frame: 0,
            rewind_offset: 0,
            horizon: 0,
            mode: RewindMode::Running,
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    pending: Mutex<Option<RewindRequest>>,
    status: RwLock<RewindStatus>,
}

/// Caller-facing control surface; cheap to clone and safe to use from any thread.
///
/// Requests are only staged here. The replay system consumes at most one of
/// them at the start of the next tick.
#[derive(Clone, Debug, Default)]
pub struct RewindHandle {
    shared: Arc<Shared>,
}

impl RewindHandle {
    pub fn request_unpause(&self) -> Result<(), RequestConflict> {
        self.stage(RewindRequest::Unpause)
    }

    pub fn request_set_rewind_offset(&self, offset: i64) -> Result<(), RequestConflict> {
        self.stage(RewindRequest::SetRewindOffset(offset))
    }

    pub fn pending_request(&self) -> Option<RewindRequest> {
        *self.lock_pending("peek")
    }

    pub fn status(&self) -> RewindStatus {
        match self.shared.status.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn_rewind_lock_poison_once("status_read");
                *poisoned.into_inner()
            }
        }
    }

    pub fn current_rewind_offset(&self) -> u64 {
        self.status().rewind_offset
    }

    pub fn max_rewind_horizon(&self) -> u64 {
        self.status().horizon
    }

    pub(crate) fn take_pending(&self) -> Option<RewindRequest> {
        self.lock_pending("take").take()
    }

    pub(crate) fn publish(&self, status: RewindStatus) {
        match self.shared.status.write() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => {
                warn_rewind_lock_poison_once("status_write");
                let mut guard = poisoned.into_inner();
                *guard = status;
            }
        }
    }

    fn stage(&self, request: RewindRequest) -> Result<(), RequestConflict> {
        let mut pending = self.lock_pending("stage");
        if let Some(existing) = *pending {
            let conflict = RequestConflict {
                pending: existing,
                rejected: request,
            };
            warn!(
                pending = %existing,
                rejected = %request,
                "rewind_request_conflict"
            );
            return Err(conflict);
        }
        *pending = Some(request);
        Ok(())
    }

    fn lock_pending(&self, operation: &'static str) -> MutexGuard<'_, Option<RewindRequest>> {
        match self.shared.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_rewind_lock_poison_once(operation);
                poisoned.into_inner()
            }
        }
    }
}
