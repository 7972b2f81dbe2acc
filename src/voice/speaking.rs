//! Shared "assistant is speaking" state
//!
//! Written only by the speech coordinator, read by the wake-word gate. The
//! timestamp is always stored before the flag changes, so a reader that sees the
//! flag cleared also sees the fresh timestamp and keeps suppressing for the
//! post-speech buffer. Any ambiguity resolves towards suppression.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Sentinel for "never spoken"
const NEVER: u64 = 0;

/// Speaking flag plus the timestamp of its last transition
#[derive(Debug)]
pub struct SpeakingState {
    epoch: Instant,
    speaking: AtomicBool,
    /// Nanoseconds since `epoch`, plus one; `NEVER` before the first transition
    started_at: AtomicU64,
}

impl SpeakingState {
    /// Create an idle state that has never spoken
    #[must_use]
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            speaking: AtomicBool::new(false),
            started_at: AtomicU64::new(NEVER),
        }
    }

    /// Raise the flag now
    pub fn begin(&self) {
        self.begin_at(Instant::now());
    }

    /// Raise the flag, stamping `now`
    pub fn begin_at(&self, now: Instant) {
        self.stamp(now);
        self.speaking.store(true, Ordering::SeqCst);
    }

    /// Lower the flag now, opening the post-speech window
    pub fn end(&self) {
        self.end_at(Instant::now());
    }

    /// Lower the flag, stamping `now` as the start of the post-speech window
    pub fn end_at(&self, now: Instant) {
        self.stamp(now);
        self.speaking.store(false, Ordering::SeqCst);
    }

    /// Whether the assistant is currently speaking
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    /// Timestamp of the last transition, if any
    #[must_use]
    pub fn started_at(&self) -> Option<Instant> {
        match self.started_at.load(Ordering::SeqCst) {
            NEVER => None,
            nanos => Some(self.epoch + Duration::from_nanos(nanos - 1)),
        }
    }

    /// Whether input arriving at `now` must be treated as self-feedback
    #[must_use]
    pub fn suppresses(&self, now: Instant, post_speech_buffer: Duration) -> bool {
        if self.is_speaking() {
            return true;
        }
        self.started_at()
            .is_some_and(|started| now.saturating_duration_since(started) < post_speech_buffer)
    }

    fn stamp(&self, now: Instant) {
        let nanos = now.saturating_duration_since(self.epoch).as_nanos();
        let nanos = u64::try_from(nanos).unwrap_or(u64::MAX - 1);
        self.started_at.store(nanos + 1, Ordering::SeqCst);
    }
}

impl Default for SpeakingState {
    fn default() -> Self {
        Self::new()
    }
}
