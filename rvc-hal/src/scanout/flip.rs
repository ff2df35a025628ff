//! The mutex-guarded page-flip bookkeeping shared between the render
//! thread (which submits flips) and the DRM event drain (which completes
//! them).

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct Inner {
    active_index: usize,
    pending: bool,
    last_flip_at: Option<Instant>,
    fps: f32,
}

/// Current presented buffer index, pending-flip flag, and measured FPS.
/// `fps` may be read without the lock for telemetry; a stale read there is
/// acceptable, every other field is only touched under the mutex.
pub struct FlipState {
    inner: Mutex<Inner>,
    cv: Condvar,
}

impl FlipState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                active_index: 0,
                pending: false,
                last_flip_at: None,
                fps: 0.0,
            }),
            cv: Condvar::new(),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.active_index = 0;
        inner.pending = false;
        inner.last_flip_at = None;
        inner.fps = 0.0;
    }

    pub fn active_index(&self) -> usize {
        self.inner.lock().active_index
    }

    pub fn pending(&self) -> bool {
        self.inner.lock().pending
    }

    /// Read without locking; telemetry only, may observe a slightly stale value.
    pub fn fps(&self) -> f32 {
        self.inner.lock().fps
    }

    pub(super) fn begin_pending(&self) {
        self.inner.lock().pending = true;
    }

    pub(super) fn clear_pending(&self) {
        let mut inner = self.inner.lock();
        inner.pending = false;
        self.cv.notify_all();
    }

    /// Toggles the active buffer index. Called once, synchronously, right
    /// after a page-flip ioctl returns success — never on failure.
    pub(super) fn toggle_active(&self) {
        let mut inner = self.inner.lock();
        inner.active_index = 1 - inner.active_index;
    }

    /// Called from the DRM event drain once a completion event has been
    /// read: updates the measured FPS from the delta against the previous
    /// flip, clears `pending`, and wakes anyone blocked in
    /// [`wait_for_completion`](Self::wait_for_completion).
    pub(super) fn on_page_flip(&self, _frame: u32, event_time: Duration) {
        let mut inner = self.inner.lock();
        let now = Instant::now();
        if let Some(prev) = inner.last_flip_at {
            let delta = now.saturating_duration_since(prev);
            if delta.as_micros() > 0 {
                inner.fps = 1_000_000.0 / delta.as_micros() as f32;
            }
        }
        let _ = event_time;
        inner.last_flip_at = Some(now);
        inner.pending = false;
        self.cv.notify_all();
    }

    /// Blocks the caller until `pending` clears or `timeout` elapses.
    pub fn wait_for_completion(&self, timeout: Duration) -> bool {
        let mut inner = self.inner.lock();
        if !inner.pending {
            return true;
        }
        let result = self.cv.wait_for(&mut inner, timeout);
        !inner.pending || !result.timed_out()
    }
}

impl Default for FlipState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_buffer_zero_with_no_pending_flip() {
        let state = FlipState::new();
        assert_eq!(state.active_index(), 0);
        assert!(!state.pending());
    }

    #[test]
    fn failed_submission_clears_pending_without_toggling_active() {
        let state = FlipState::new();
        state.begin_pending();
        state.clear_pending();
        assert_eq!(state.active_index(), 0);
        assert!(!state.pending());
    }
}
