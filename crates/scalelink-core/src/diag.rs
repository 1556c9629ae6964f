//! Capped, append-only diagnostic log.

use std::collections::VecDeque;
use std::fmt;
use std::time::SystemTime;

/// Default number of entries retained.
pub const DEFAULT_LOG_CAPACITY: usize = 200;

/// Severity of a diagnostic entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagLevel {
    Debug,
    Info,
    Warn,
}

impl fmt::Display for DiagLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagLevel::Debug => "DEBUG",
            DiagLevel::Info => "INFO",
            DiagLevel::Warn => "WARN",
        };
        f.write_str(s)
    }
}

/// One log line shown to the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEntry {
    pub at: SystemTime,
    pub level: DiagLevel,
    pub message: String,
}

impl fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Bounded FIFO of diagnostic entries. Appending beyond the capacity drops
/// the oldest entry.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    entries: VecDeque<DiagnosticEntry>,
    capacity: usize,
}

impl DiagnosticLog {
    /// Create a log holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DiagnosticLog {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an entry and return a copy of it.
    pub fn push(&mut self, level: DiagLevel, message: impl Into<String>) -> DiagnosticEntry {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        let entry = DiagnosticEntry {
            at: SystemTime::now(),
            level,
            message: message.into(),
        };
        self.entries.push_back(entry.clone());
        entry
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &DiagnosticEntry> {
        self.entries.iter()
    }
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        DiagnosticLog::new(DEFAULT_LOG_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_beyond_capacity() {
        let mut log = DiagnosticLog::new(3);
        for i in 0..5 {
            log.push(DiagLevel::Info, format!("entry {i}"));
        }
        assert_eq!(log.len(), 3);
        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut log = DiagnosticLog::new(0);
        log.push(DiagLevel::Warn, "a");
        log.push(DiagLevel::Warn, "b");
        assert_eq!(log.len(), 1);
        assert_eq!(log.entries().next().unwrap().message, "b");
    }

    #[test]
    fn default_capacity() {
        let log = DiagnosticLog::default();
        assert_eq!(log.capacity(), DEFAULT_LOG_CAPACITY);
        assert!(log.is_empty());
    }

    #[test]
    fn entry_display() {
        let mut log = DiagnosticLog::default();
        let e = log.push(DiagLevel::Warn, "no device detected");
        assert_eq!(e.to_string(), "[WARN] no device detected");
    }
}
