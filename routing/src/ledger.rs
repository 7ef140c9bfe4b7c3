//! Rolling cost ledger.
//!
//! Append-only `(timestamp, cost)` records per provider, retained for a
//! fixed window (24 hours by default). Queries ignore expired entries even
//! before the periodic prune removes them.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Default retention window in hours.
pub const DEFAULT_RETENTION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEntry {
    pub at: DateTime<Utc>,
    pub cost: f64,
}

/// Aggregate spend over a window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendSummary {
    pub total: f64,
    pub entries: usize,
    pub by_provider: BTreeMap<String, f64>,
    /// Oldest entry inside the window.
    pub earliest: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct CostLedger {
    retention: Duration,
    entries: Mutex<HashMap<String, VecDeque<CostEntry>>>,
}

impl CostLedger {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Append a record. Entries are expected in time order per provider.
    pub fn record(&self, provider: &str, cost: f64, at: DateTime<Utc>) {
        let mut entries = self.entries.lock();
        entries
            .entry(provider.to_string())
            .or_default()
            .push_back(CostEntry {
                at,
                cost: cost.max(0.0),
            });
    }

    /// Drop entries older than the retention window. Returns how many were removed.
    pub fn prune(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.retention;
        let mut entries = self.entries.lock();
        let mut removed = 0;
        for queue in entries.values_mut() {
            while queue.front().is_some_and(|e| e.at < cutoff) {
                queue.pop_front();
                removed += 1;
            }
        }
        entries.retain(|_, q| !q.is_empty());
        removed
    }

    /// Spend inside the retention window ending at `now`.
    pub fn summary(&self, now: DateTime<Utc>) -> SpendSummary {
        self.summary_since(now - self.retention)
    }

    /// Spend recorded at or after `since`.
    pub fn summary_since(&self, since: DateTime<Utc>) -> SpendSummary {
        let entries = self.entries.lock();
        let mut summary = SpendSummary::default();
        for (provider, queue) in entries.iter() {
            let mut provider_total = 0.0;
            let mut counted = 0;
            for entry in queue.iter().filter(|e| e.at >= since) {
                provider_total += entry.cost;
                counted += 1;
                summary.earliest = Some(match summary.earliest {
                    Some(t) if t <= entry.at => t,
                    _ => entry.at,
                });
            }
            if counted > 0 {
                summary.entries += counted;
                summary.total += provider_total;
                summary.by_provider.insert(provider.clone(), provider_total);
            }
        }
        summary
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_RETENTION_HOURS))
    }
}
