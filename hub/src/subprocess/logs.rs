use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use super::SlotId;

/// Maximum log entries kept per tenant.
pub const LOG_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub bot: SlotId,
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub message: String,
}

/// Bounded, newest-first log sequence. The oldest entry is evicted once the
/// ring is full.
#[derive(Debug)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(LOG_CAPACITY)),
            capacity: capacity.max(1),
        }
    }

    /// Insert at the front; returns the evicted entry, if any.
    pub fn push(&mut self, entry: LogEntry) -> Option<LogEntry> {
        self.entries.push_front(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_back()
        } else {
            None
        }
    }

    /// Up to `limit` entries, newest first.
    pub fn tail(&self, limit: usize) -> Vec<LogEntry> {
        self.entries.iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(n: usize) -> LogEntry {
        LogEntry {
            timestamp: Utc::now(),
            bot: SlotId::Bot1,
            level: LogLevel::Info,
            message: format!("line {n}"),
        }
    }

    #[test]
    fn ring_never_exceeds_capacity_and_evicts_oldest() {
        let mut ring = LogRing::default();
        for n in 0..LOG_CAPACITY {
            assert!(ring.push(entry(n)).is_none());
        }
        assert_eq!(ring.len(), LOG_CAPACITY);

        let evicted = ring.push(entry(LOG_CAPACITY)).expect("full ring evicts");
        assert_eq!(evicted.message, "line 0");
        assert_eq!(ring.len(), LOG_CAPACITY);

        let evicted = ring.push(entry(LOG_CAPACITY + 1)).expect("full ring evicts");
        assert_eq!(evicted.message, "line 1");
    }

    #[test]
    fn tail_is_newest_first() {
        let mut ring = LogRing::new(10);
        for n in 0..5 {
            ring.push(entry(n));
        }
        let tail: Vec<_> = ring.tail(3).into_iter().map(|e| e.message).collect();
        assert_eq!(tail, vec!["line 4", "line 3", "line 2"]);
    }

    #[test]
    fn entries_serialize_with_type_field() {
        let json = serde_json::to_value(entry(7)).unwrap();
        assert_eq!(json["type"], "info");
        assert_eq!(json["bot"], "bot1");
        assert_eq!(json["message"], "line 7");
    }
}
