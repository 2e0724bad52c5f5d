//! Server-clock reconciliation.
//!
//! Game deadlines (`startedAt`, `revealEndsAt`, …) are absolute timestamps on
//! the *server's* timeline. [`ServerClock`] stores the offset between the two
//! clocks so countdowns render correctly despite client clock skew. The
//! offset is recomputed on every server message that carries a `serverNow`
//! field (identify ack, join, resume, game start/update, pong) — each fresh
//! value is an authoritative resync, never extrapolated or decayed locally.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::EpochMs;

/// Tracks the delta between the server clock and the local clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerClock {
    offset_ms: i64,
    synced: bool,
}

impl ServerClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resync from a server-reported timestamp: `offset = serverNow - localNow`.
    pub fn sync(&mut self, server_now: EpochMs) {
        self.sync_at(server_now, local_now_ms());
    }

    /// True once at least one `serverNow` has been observed.
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    /// The current offset in milliseconds (positive when the server clock is
    /// ahead of the local clock).
    pub fn offset_ms(&self) -> i64 {
        self.offset_ms
    }

    /// The current moment projected onto the server timeline.
    pub fn server_now_ms(&self) -> EpochMs {
        self.server_now_at(local_now_ms())
    }

    /// Milliseconds remaining until a server-timeline deadline, clamped to 0.
    pub fn remaining_ms(&self, deadline: EpochMs) -> u64 {
        self.remaining_at(deadline, local_now_ms())
    }

    fn sync_at(&mut self, server_now: EpochMs, local_now: EpochMs) {
        self.offset_ms = server_now - local_now;
        self.synced = true;
    }

    fn server_now_at(&self, local_now: EpochMs) -> EpochMs {
        local_now.saturating_add(self.offset_ms)
    }

    fn remaining_at(&self, deadline: EpochMs, local_now: EpochMs) -> u64 {
        deadline.saturating_sub(self.server_now_at(local_now)).max(0) as u64
    }
}

fn local_now_ms() -> EpochMs {
    // The Unix epoch is unambiguously in the past on any sane clock.
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as i64,
        Err(_) => 0,
    }
}

// ── Tests ───────────────────────────────────────────────────────────
