//! Conversion of board ticks into wall-clock time
//!
//! The board stamps every log entry with a 32-bit tick counter and the id of
//! the reset epoch it was written in. The host anchors each epoch with a
//! [`LogReference`] taken from an explicit time query and converts ticks
//! relative to it.
//!
//! Two irregularities are handled:
//!
//! - **Rewind**: a tick lower than the previous one for the same epoch means
//!   the counter wrapped. The reference is advanced by the wrapped distance so
//!   timestamps stay monotonic.
//! - **Rollback**: after a download was interrupted, entries up to the last
//!   tick already delivered are replayed by the board. Those are skipped.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Wall-clock anchor for one reset epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogReference {
    pub reset_id: u8,
    pub tick: u32,
    pub timestamp: DateTime<Utc>,
}

impl LogReference {
    pub fn new(reset_id: u8, tick: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            reset_id,
            tick,
            timestamp,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickClock {
    tick_ms: f64,
    references: HashMap<u8, LogReference>,
    latest: Option<u8>,
    last_tick: HashMap<u8, u32>,
    rollback: HashMap<u8, u32>,
    frozen: bool,
}

fn ticks_to_duration(ticks: i64, tick_ms: f64) -> Duration {
    Duration::microseconds((ticks as f64 * tick_ms * 1000.0).round() as i64)
}

impl TickClock {
    pub fn new(tick_ms: f64) -> Self {
        Self {
            tick_ms,
            references: HashMap::new(),
            latest: None,
            last_tick: HashMap::new(),
            rollback: HashMap::new(),
            frozen: false,
        }
    }

    /// Record a time query result; ignored while a download is running
    pub fn update_reference(&mut self, reference: LogReference) -> bool {
        if self.frozen {
            tracing::debug!("Ignoring time reference during download");
            return false;
        }
        self.references.insert(reference.reset_id, reference);
        self.latest = Some(reference.reset_id);
        true
    }

    pub fn reference(&self, reset_id: u8) -> Option<&LogReference> {
        self.references.get(&reset_id)
    }

    pub fn latest(&self) -> Option<&LogReference> {
        self.latest.and_then(|id| self.references.get(&id))
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn thaw(&mut self) {
        self.frozen = false;
    }

    /// Wall-clock time of an entry, or `None` when it was already delivered
    pub fn timestamp(&mut self, reset_id: u8, tick: u32) -> Option<DateTime<Utc>> {
        if self.rollback.get(&reset_id).is_some_and(|mark| *mark >= tick) {
            tracing::trace!("Skipping replayed entry reset={} tick={}", reset_id, tick);
            return None;
        }

        let tick_ms = self.tick_ms;
        let fallback = self.latest().copied();
        let reference = self.references.entry(reset_id).or_insert_with(|| match fallback {
            Some(latest) => LogReference { reset_id, ..latest },
            None => {
                tracing::warn!("No time reference for reset {}, anchoring at now", reset_id);
                LogReference::new(reset_id, tick, Utc::now())
            }
        });

        if let Some(last) = self.last_tick.get(&reset_id).copied() {
            if last > tick {
                let diff = u64::from(tick.wrapping_sub(last));
                let offset = diff + u64::from(last.wrapping_sub(reference.tick));
                reference.timestamp += ticks_to_duration(offset as i64, tick_ms);
                reference.tick = tick;
                if let Some(mark) = self.rollback.get_mut(&reset_id) {
                    *mark = tick;
                }
                tracing::debug!("Tick rewind on reset {}: {} -> {}", reset_id, last, tick);
            }
        }

        self.last_tick.insert(reset_id, tick);
        let delta = i64::from(tick) - i64::from(reference.tick);
        Some(reference.timestamp + ticks_to_duration(delta, tick_ms))
    }

    /// Remember the last ticks seen so a resumed download skips them
    pub fn mark_rollback(&mut self) {
        self.rollback = self.last_tick.clone();
    }

    pub fn clear_rollback(&mut self) {
        self.rollback.clear();
    }

    pub fn rollback_mark(&self, reset_id: u8) -> Option<u32> {
        self.rollback.get(&reset_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TICK_TIME_STEP_MS;
    use chrono::TimeZone;

    fn anchor() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_ticks_relative_to_reference() {
        let mut clock = TickClock::new(TICK_TIME_STEP_MS);
        clock.update_reference(LogReference::new(0, 1000, anchor()));

        let ts = clock.timestamp(0, 1000 + 32768).unwrap();
        assert_eq!(ts, anchor() + Duration::seconds(48));
    }

    #[test]
    fn test_rewind_keeps_timestamps_monotonic() {
        let mut clock = TickClock::new(TICK_TIME_STEP_MS);
        clock.update_reference(LogReference::new(0, u32::MAX - 100, anchor()));

        let a = clock.timestamp(0, u32::MAX - 10).unwrap();
        let b = clock.timestamp(0, 5).unwrap();
        let c = clock.timestamp(0, 50).unwrap();

        assert!(a < b, "{} !< {}", a, b);
        assert!(b < c);
        // 16 ticks between u32::MAX - 10 and 5 after wrapping
        let step = ticks_to_duration(16, TICK_TIME_STEP_MS);
        let error = ((b - a) - step).num_microseconds().unwrap();
        assert!(error.abs() <= 1, "off by {}us", error);
    }

    #[test]
    fn test_rollback_skips_replayed_entries() {
        let mut clock = TickClock::new(TICK_TIME_STEP_MS);
        clock.update_reference(LogReference::new(1, 0, anchor()));
        clock.timestamp(1, 100).unwrap();
        clock.timestamp(1, 200).unwrap();
        clock.mark_rollback();

        assert!(clock.timestamp(1, 150).is_none());
        assert!(clock.timestamp(1, 200).is_none());
        assert!(clock.timestamp(1, 201).is_some());

        clock.clear_rollback();
        assert!(clock.rollback_mark(1).is_none());
    }

    #[test]
    fn test_frozen_reference_is_not_replaced() {
        let mut clock = TickClock::new(TICK_TIME_STEP_MS);
        clock.update_reference(LogReference::new(0, 10, anchor()));
        clock.freeze();
        assert!(!clock.update_reference(LogReference::new(0, 99, Utc::now())));
        assert_eq!(clock.latest().unwrap().tick, 10);
        clock.thaw();
        assert!(clock.update_reference(LogReference::new(0, 99, Utc::now())));
    }

    #[test]
    fn test_unknown_reset_uses_latest() {
        let mut clock = TickClock::new(TICK_TIME_STEP_MS);
        clock.update_reference(LogReference::new(0, 0, anchor()));
        let ts = clock.timestamp(3, 0).unwrap();
        assert_eq!(ts, anchor());
    }
}
