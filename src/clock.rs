// ⏰ Clock - transaction time and unique ids, injected into both procedures
//
// Every scan and every account transaction gets:
// 1. A unique id that sorts in creation order
// 2. A transaction timestamp (milliseconds since the Unix epoch)
//
// Production code uses SystemClock. Tests use FixedClock so ids and
// timestamps are predictable.

use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Bits reserved for the per-millisecond sequence in a generated id.
const SEQUENCE_BITS: u32 = 16;
const SEQUENCE_MASK: i64 = (1 << SEQUENCE_BITS) - 1;

// ============================================================================
// CLOCK CAPABILITY
// ============================================================================

/// Source of transaction time and unique, time-ordered ids
pub trait Clock: Send + Sync {
    /// Current transaction time in milliseconds since the Unix epoch
    fn now_millis(&self) -> i64;

    /// Next unique id. Ids from one clock are strictly increasing.
    fn next_id(&self) -> i64;
}

// ============================================================================
// SYSTEM CLOCK
// ============================================================================

/// Wall clock with snowflake-style ids: `(millis << 16) | sequence`
///
/// If the wall clock steps backwards the last seen millisecond is reused,
/// so ids never go down.
pub struct SystemClock {
    state: Mutex<IdState>,
}

#[derive(Default)]
struct IdState {
    last_millis: i64,
    sequence: i64,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            state: Mutex::new(IdState::default()),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn next_id(&self) -> i64 {
        // A poisoned lock only means another thread panicked mid-update;
        // the counters themselves are still usable.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let mut millis = self.now_millis().max(state.last_millis);
        if millis == state.last_millis {
            state.sequence += 1;
            if state.sequence > SEQUENCE_MASK {
                // Sequence exhausted for this millisecond, borrow the next one
                millis += 1;
                state.sequence = 0;
            }
        } else {
            state.sequence = 0;
        }
        state.last_millis = millis;

        (millis << SEQUENCE_BITS) | state.sequence
    }
}

// ============================================================================
// FIXED CLOCK (tests, replays)
// ============================================================================

/// Clock frozen at a settable instant, with a plain counter for ids
pub struct FixedClock {
    now: AtomicI64,
    next: AtomicI64,
}

impl FixedClock {
    pub fn new(now_millis: i64) -> Self {
        FixedClock {
            now: AtomicI64::new(now_millis),
            next: AtomicI64::new(1),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.now.fetch_add(minutes * 60_000, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn next_id(&self) -> i64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

/// Render a millisecond timestamp for display and logs
pub fn format_millis(millis: i64) -> String {
    match Utc.timestamp_millis_opt(millis).single() {
        Some(dt) => to_display(dt),
        None => millis.to_string(),
    }
}

fn to_display(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}
