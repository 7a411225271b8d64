use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One state the machine has been in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub state: String,
    /// The event that led here; `None` for the initial state.
    pub event: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only ring of visited states.
///
/// With a cap, the oldest entries are dropped first. A cap of zero or less
/// disables recording entirely.
#[derive(Debug, Clone)]
pub struct History {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl History {
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn with_limit(limit: i64) -> Self {
        let limit = usize::try_from(limit).unwrap_or(0);
        Self {
            entries: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limit > 0
    }

    pub fn record(&mut self, state: &str, event: Option<&str>) {
        if !self.is_enabled() {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(HistoryEntry {
            state: state.to_string(),
            event: event.map(str::to_string),
            timestamp: Utc::now(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Visited state names, oldest first.
    pub fn states(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.state.as_str()).collect()
    }
}

impl Default for History {
    fn default() -> Self {
        Self::with_limit(Self::DEFAULT_LIMIT)
    }
}
