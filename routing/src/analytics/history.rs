//! Bounded execution history keyed by (task type, provider).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Records kept per (task type, provider); the oldest is evicted first.
pub const MAX_HISTORY: usize = 1000;

/// One finished execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub at: DateTime<Utc>,
    pub success: bool,
    pub response_ms: f64,
    /// USD; zero for failed runs.
    pub cost: f64,
    pub confidence: Option<f64>,
    pub tokens: u64,
}

impl ExecutionRecord {
    pub fn success(at: DateTime<Utc>, response_ms: f64, cost: f64, tokens: u64) -> Self {
        Self {
            at,
            success: true,
            response_ms,
            cost,
            confidence: None,
            tokens,
        }
    }

    pub fn failure(at: DateTime<Utc>, response_ms: f64, tokens: u64) -> Self {
        Self {
            at,
            success: false,
            response_ms,
            cost: 0.0,
            confidence: None,
            tokens,
        }
    }

    pub fn with_confidence(mut self, confidence: Option<f64>) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Aggregates over a slice of history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryAggregate {
    pub samples: usize,
    pub success_rate: f64,
    /// Over successful runs.
    pub avg_response_ms: Option<f64>,
    /// Over successful runs.
    pub avg_cost: Option<f64>,
    pub avg_confidence: Option<f64>,
    pub avg_tokens: f64,
}

impl HistoryAggregate {
    pub fn from_records<'a, I>(records: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a ExecutionRecord>,
    {
        let mut samples = 0usize;
        let mut successes = 0usize;
        let mut latency_sum = 0.0;
        let mut cost_sum = 0.0;
        let mut confidence_sum = 0.0;
        let mut confidence_n = 0usize;
        let mut tokens_sum = 0u64;

        for r in records {
            samples += 1;
            tokens_sum += r.tokens;
            if r.success {
                successes += 1;
                latency_sum += r.response_ms;
                cost_sum += r.cost;
            }
            if let Some(c) = r.confidence {
                confidence_sum += c;
                confidence_n += 1;
            }
        }

        if samples == 0 {
            return None;
        }
        let per_success = |sum: f64| (successes > 0).then(|| sum / successes as f64);
        Some(Self {
            samples,
            success_rate: successes as f64 / samples as f64,
            avg_response_ms: per_success(latency_sum),
            avg_cost: per_success(cost_sum),
            avg_confidence: (confidence_n > 0).then(|| confidence_sum / confidence_n as f64),
            avg_tokens: tokens_sum as f64 / samples as f64,
        })
    }
}

#[derive(Debug)]
pub struct HistoryStore {
    capacity: usize,
    /// task type → provider → records, oldest first.
    records: HashMap<String, HashMap<String, VecDeque<ExecutionRecord>>>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: HashMap::new(),
        }
    }

    pub fn push(&mut self, task_type: &str, provider: &str, record: ExecutionRecord) {
        let queue = self
            .records
            .entry(task_type.to_string())
            .or_default()
            .entry(provider.to_string())
            .or_default();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(record);
    }

    pub fn records(&self, task_type: &str, provider: &str) -> Option<&VecDeque<ExecutionRecord>> {
        self.records.get(task_type)?.get(provider)
    }

    pub fn samples(&self, task_type: &str, provider: &str) -> usize {
        self.records(task_type, provider).map_or(0, VecDeque::len)
    }

    pub fn aggregate(&self, task_type: &str, provider: &str) -> Option<HistoryAggregate> {
        HistoryAggregate::from_records(self.records(task_type, provider)?)
    }

    /// Every task type a provider has history for, with its records.
    pub fn by_provider<'a>(
        &'a self,
        provider: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a VecDeque<ExecutionRecord>)> + 'a {
        self.records
            .iter()
            .filter_map(move |(task_type, providers)| {
                providers.get(provider).map(|q| (task_type.as_str(), q))
            })
    }

    /// Every provider with history for a task type.
    pub fn by_task_type<'a>(
        &'a self,
        task_type: &str,
    ) -> impl Iterator<Item = (&'a str, &'a VecDeque<ExecutionRecord>)> + 'a {
        self.records
            .get(task_type)
            .into_iter()
            .flat_map(|providers| providers.iter().map(|(p, q)| (p.as_str(), q)))
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.records.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn total_records(&self) -> usize {
        self.records
            .values()
            .flat_map(HashMap::values)
            .map(VecDeque::len)
            .sum()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(MAX_HISTORY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_evicts_oldest() {
        let now = Utc::now();
        let mut store = HistoryStore::new(3);
        for i in 0..5 {
            store.push("chat", "a", ExecutionRecord::success(now, i as f64, 0.0, 1));
        }
        let records = store.records("chat", "a").unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records.front().unwrap().response_ms, 2.0);
        assert_eq!(store.total_records(), 3);
    }

    #[test]
    fn test_aggregate_uses_successes_for_latency_and_cost() {
        let now = Utc::now();
        let mut store = HistoryStore::default();
        store.push("chat", "a", ExecutionRecord::success(now, 100.0, 0.02, 10).with_confidence(Some(0.8)));
        store.push("chat", "a", ExecutionRecord::success(now, 300.0, 0.04, 30));
        store.push("chat", "a", ExecutionRecord::failure(now, 9_000.0, 20));

        let agg = store.aggregate("chat", "a").unwrap();
        assert_eq!(agg.samples, 3);
        assert!((agg.success_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(agg.avg_response_ms, Some(200.0));
        assert!((agg.avg_cost.unwrap() - 0.03).abs() < 1e-12);
        assert_eq!(agg.avg_confidence, Some(0.8));
        assert_eq!(agg.avg_tokens, 20.0);
        assert!(store.aggregate("chat", "b").is_none());
    }

    #[test]
    fn test_lookup_by_provider_and_type() {
        let now = Utc::now();
        let mut store = HistoryStore::default();
        store.push("chat", "a", ExecutionRecord::success(now, 1.0, 0.0, 1));
        store.push("code", "a", ExecutionRecord::success(now, 1.0, 0.0, 1));
        store.push("code", "b", ExecutionRecord::success(now, 1.0, 0.0, 1));

        assert_eq!(store.by_provider("a").count(), 2);
        assert_eq!(store.by_task_type("code").count(), 2);
        assert_eq!(store.by_task_type("none").count(), 0);
        assert_eq!(store.task_types(), vec!["chat".to_string(), "code".to_string()]);
    }
}
