// src/bot/window.rs - Sliding-window event counters for spam and raid detection

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

/// Windows longer than this are treated as this long
const MAX_WINDOW_SECONDS: i64 = 365 * 24 * 60 * 60;

/// What a log is counting; one subject can be tracked under several kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowKind {
    Messages,
    Joins,
}

/// Key of one window log: a user id for messages, a guild id for joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub kind: WindowKind,
    pub subject: u64,
}

impl WindowKey {
    pub fn messages(user_id: u64) -> Self {
        Self { kind: WindowKind::Messages, subject: user_id }
    }

    pub fn joins(guild_id: u64) -> Self {
        Self { kind: WindowKind::Joins, subject: guild_id }
    }
}

/// Per-key ordered timestamp logs, pruned from the front.
///
/// Every entry is pushed once and popped once, so counting is amortized
/// O(1) per event and exact regardless of burst shape. One lock guards the
/// whole store; append, prune and count for a key happen under it, which
/// serializes events per key in arrival order.
pub struct WindowTracker<K = WindowKey> {
    logs: Mutex<HashMap<K, VecDeque<DateTime<Utc>>>>,
}

impl<K: Eq + Hash + Clone> Default for WindowTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> WindowTracker<K> {
    pub fn new() -> Self {
        Self {
            logs: Mutex::new(HashMap::new()),
        }
    }

    /// Record an event for `key` at `timestamp` and return how many events
    /// the key has within `[timestamp - window_seconds, timestamp]`,
    /// including this one.
    ///
    /// A timestamp earlier than the key's newest entry is clamped to it so
    /// the log stays ordered.
    pub fn record_and_count(&self, key: K, timestamp: DateTime<Utc>, window_seconds: u64) -> usize {
        let mut logs = self.lock();
        let log = logs.entry(key).or_default();

        let timestamp = match log.back() {
            Some(&newest) if timestamp < newest => {
                debug!("Clamping out-of-order timestamp {} to {}", timestamp, newest);
                newest
            }
            _ => timestamp,
        };

        log.push_back(timestamp);
        Self::prune(log, timestamp, window_seconds);
        log.len()
    }

    /// Drop logs with no entry newer than `now - retention_seconds`.
    /// Returns the number of logs removed.
    pub fn evict_idle(&self, now: DateTime<Utc>, retention_seconds: u64) -> usize {
        let cutoff = now.checked_sub_signed(Self::window(retention_seconds));
        let mut logs = self.lock();
        let before = logs.len();

        logs.retain(|_, log| match (log.back(), cutoff) {
            (None, _) => false,
            (Some(&newest), Some(cutoff)) => newest >= cutoff,
            (Some(_), None) => true,
        });

        before - logs.len()
    }

    /// Number of subjects currently holding a log
    pub fn tracked_keys(&self) -> usize {
        self.lock().len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn prune(log: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>, window_seconds: u64) {
        let Some(cutoff) = now.checked_sub_signed(Self::window(window_seconds)) else {
            return;
        };

        while log.front().is_some_and(|&oldest| oldest < cutoff) {
            log.pop_front();
        }
    }

    fn window(seconds: u64) -> Duration {
        let seconds = i64::try_from(seconds).unwrap_or(MAX_WINDOW_SECONDS).min(MAX_WINDOW_SECONDS);
        Duration::seconds(seconds)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, VecDeque<DateTime<Utc>>>> {
        // Each operation leaves its log ordered before releasing the lock,
        // so a poisoned store is still consistent.
        self.logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
