//! Per-task metrics (spec.md §4.12): token/cost accounting, tool timing,
//! and the counters the loop folds into a compact `metrics_update` event
//! after each meaningful transition.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::sync::Cache;
use serde::Serialize;

use crate::types::event::Event;

/// USD per 1M tokens, (prompt, completion), longest-matching-prefix wins.
/// Unknown models fall back to zero cost rather than guessing.
const PRICE_TABLE: &[(&str, f64, f64)] = &[
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4-turbo", 10.00, 30.00),
    ("gpt-4", 30.00, 60.00),
    ("gpt-3.5", 0.50, 1.50),
    ("claude-3-5-sonnet", 3.00, 15.00),
    ("claude-3-opus", 15.00, 75.00),
    ("claude-3-sonnet", 3.00, 15.00),
    ("claude-3-haiku", 0.25, 1.25),
    ("claude", 3.00, 15.00),
    ("gemini-1.5-pro", 1.25, 5.00),
    ("gemini-1.5-flash", 0.075, 0.30),
    ("gemini", 0.075, 0.30),
];

/// Memoized model -> (prompt_price, completion_price) lookup in front of
/// the static prefix table, since every LLM call resolves a price.
struct PriceTable {
    cache: Cache<String, (u64, u64)>,
}

impl PriceTable {
    fn new() -> Self {
        Self { cache: Cache::new(256) }
    }

    /// Returns USD-per-1M-token prices as bit-pattern-preserving u64s
    /// (moka's `Cache` requires `Send + Sync + 'static` values with no
    /// `Eq` requirement on `f64`, so the prices round-trip through
    /// `f64::to_bits`/`from_bits`).
    fn lookup(&self, model: &str) -> (f64, f64) {
        if let Some((p, c)) = self.cache.get(model) {
            return (f64::from_bits(p), f64::from_bits(c));
        }
        let price = PRICE_TABLE
            .iter()
            .filter(|(prefix, _, _)| model.starts_with(prefix))
            .max_by_key(|(prefix, _, _)| prefix.len())
            .map(|(_, p, c)| (*p, *c))
            .unwrap_or((0.0, 0.0));
        self.cache.insert(model.to_string(), (price.0.to_bits(), price.1.to_bits()));
        price
    }
}

/// Point-in-time read of a `MetricsCollector`'s counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub estimated_cost_usd: f64,
    pub llm_calls: u64,
    pub tool_executions: u64,
    pub average_tool_duration_ms: f64,
    pub wall_time_secs: f64,
    pub compactions: u64,
    pub failovers: u64,
    pub verifier_runs: u64,
}

impl MetricsSnapshot {
    pub fn to_event(&self) -> Event {
        Event::MetricsUpdate {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
            estimated_cost_usd: self.estimated_cost_usd,
            llm_calls: self.llm_calls,
            tool_executions: self.tool_executions,
            average_tool_duration_ms: self.average_tool_duration_ms,
            wall_time_secs: self.wall_time_secs,
            compactions: self.compactions,
            failovers: self.failovers,
            verifier_runs: self.verifier_runs,
        }
    }
}

/// Accumulates usage for one task. Cheap to update from the hot loop:
/// every counter is a plain atomic, no locking.
pub struct MetricsCollector {
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    llm_calls: AtomicU64,
    tool_executions: AtomicU64,
    tool_duration_total_ms: AtomicU64,
    compactions: AtomicU64,
    failovers: AtomicU64,
    verifier_runs: AtomicU64,
    started_at: Instant,
    prices: PriceTable,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            llm_calls: AtomicU64::new(0),
            tool_executions: AtomicU64::new(0),
            tool_duration_total_ms: AtomicU64::new(0),
            compactions: AtomicU64::new(0),
            failovers: AtomicU64::new(0),
            verifier_runs: AtomicU64::new(0),
            started_at: Instant::now(),
            prices: PriceTable::new(),
        }
    }

    pub fn record_llm_call(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion_tokens, Ordering::Relaxed);
        self.llm_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failover(&self) {
        self.failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_execution(&self, duration: Duration) {
        self.tool_executions.fetch_add(1, Ordering::Relaxed);
        self.tool_duration_total_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verifier_run(&self) {
        self.verifier_runs.fetch_add(1, Ordering::Relaxed);
    }

    fn average_tool_duration_ms(&self) -> f64 {
        let n = self.tool_executions.load(Ordering::Relaxed);
        if n == 0 {
            0.0
        } else {
            self.tool_duration_total_ms.load(Ordering::Relaxed) as f64 / n as f64
        }
    }

    pub fn snapshot(&self, model: &str) -> MetricsSnapshot {
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);
        let (prompt_price, completion_price) = self.prices.lookup(model);

        MetricsSnapshot {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            estimated_cost_usd: (prompt_tokens as f64 / 1_000_000.0) * prompt_price
                + (completion_tokens as f64 / 1_000_000.0) * completion_price,
            llm_calls: self.llm_calls.load(Ordering::Relaxed),
            tool_executions: self.tool_executions.load(Ordering::Relaxed),
            average_tool_duration_ms: self.average_tool_duration_ms(),
            wall_time_secs: self.started_at.elapsed().as_secs_f64(),
            compactions: self.compactions.load(Ordering::Relaxed),
            failovers: self.failovers.load(Ordering::Relaxed),
            verifier_runs: self.verifier_runs.load(Ordering::Relaxed),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_lookup_prefers_longest_matching_prefix() {
        let prices = PriceTable::new();
        let (prompt, _) = prices.lookup("claude-3-5-sonnet-20241022");
        assert_eq!(prompt, 3.00);
        let (prompt, _) = prices.lookup("claude-3-opus-20240229");
        assert_eq!(prompt, 15.00);
    }

    #[test]
    fn unknown_model_has_zero_cost() {
        let prices = PriceTable::new();
        assert_eq!(prices.lookup("some-local-model"), (0.0, 0.0));
    }

    #[test]
    fn snapshot_accumulates_across_calls() {
        let metrics = MetricsCollector::new();
        metrics.record_llm_call(100, 50);
        metrics.record_llm_call(200, 75);
        metrics.record_tool_execution(Duration::from_millis(40));
        metrics.record_tool_execution(Duration::from_millis(60));
        metrics.record_compaction();
        metrics.record_failover();

        let snapshot = metrics.snapshot("gpt-4o");
        assert_eq!(snapshot.prompt_tokens, 300);
        assert_eq!(snapshot.completion_tokens, 125);
        assert_eq!(snapshot.llm_calls, 2);
        assert_eq!(snapshot.tool_executions, 2);
        assert_eq!(snapshot.average_tool_duration_ms, 50.0);
        assert_eq!(snapshot.compactions, 1);
        assert_eq!(snapshot.failovers, 1);
        assert!(snapshot.estimated_cost_usd > 0.0);
    }
}
