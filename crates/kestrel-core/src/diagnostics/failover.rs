//! Model failover chain (spec.md §4.6): per-model health with
//! exponential-backoff cooldowns, wrapping one LLM call with a list of
//! candidate models tried in order.

use std::collections::HashMap;
use std::time::{Duration, Instant};

const UNHEALTHY_THRESHOLD: u32 = 3;
const BASE_COOLDOWN_SECS: u64 = 10;
const MAX_COOLDOWN_SECS: u64 = 600;

#[derive(Debug, Clone)]
struct ModelHealth {
    consecutive_failures: u32,
    /// Number of times this model has crossed the unhealthy threshold;
    /// drives the exponential backoff exponent.
    unhealthy_episodes: u32,
    cooldown_until: Option<Instant>,
}

impl Default for ModelHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: 0,
            unhealthy_episodes: 0,
            cooldown_until: None,
        }
    }
}

fn cooldown_for(episode: u32) -> Duration {
    let secs = BASE_COOLDOWN_SECS.saturating_mul(3u64.saturating_pow(episode));
    Duration::from_secs(secs.min(MAX_COOLDOWN_SECS))
}

/// Outcome of recording a call result against the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverEvent {
    /// The primary model handled the call; no metric change.
    PrimarySucceeded,
    /// A non-primary model succeeded; spec.md's `model_failovers` metric
    /// should be incremented by the caller.
    FailoverSucceeded,
    /// Recorded a failure; the model may now be in cooldown.
    Failed,
}

/// An ordered list of candidate models with independent health state.
pub struct ModelChain {
    models: Vec<String>,
    health: HashMap<String, ModelHealth>,
}

impl ModelChain {
    pub fn new(models: Vec<String>) -> Self {
        Self {
            health: models.iter().map(|m| (m.clone(), ModelHealth::default())).collect(),
            models,
        }
    }

    pub fn primary(&self) -> Option<&str> {
        self.models.first().map(String::as_str)
    }

    /// The first model in chain order that isn't currently cooling down.
    pub fn next_eligible(&self) -> Option<&str> {
        let now = Instant::now();
        self.models.iter().find(|m| {
            self.health
                .get(m.as_str())
                .and_then(|h| h.cooldown_until)
                .map(|until| now >= until)
                .unwrap_or(true)
        }).map(String::as_str)
    }

    pub fn record_success(&mut self, model: &str) -> FailoverEvent {
        if let Some(health) = self.health.get_mut(model) {
            health.consecutive_failures = 0;
            health.unhealthy_episodes = 0;
            health.cooldown_until = None;
        }
        if self.primary() == Some(model) {
            FailoverEvent::PrimarySucceeded
        } else {
            FailoverEvent::FailoverSucceeded
        }
    }

    pub fn record_failure(&mut self, model: &str) -> FailoverEvent {
        let health = self.health.entry(model.to_string()).or_default();
        health.consecutive_failures += 1;
        if health.consecutive_failures >= UNHEALTHY_THRESHOLD {
            health.cooldown_until = Some(Instant::now() + cooldown_for(health.unhealthy_episodes));
            health.unhealthy_episodes += 1;
        }
        FailoverEvent::Failed
    }

    pub fn is_healthy(&self, model: &str) -> bool {
        self.health
            .get(model)
            .map(|h| h.consecutive_failures < UNHEALTHY_THRESHOLD)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_success_does_not_count_as_failover() {
        let mut chain = ModelChain::new(vec!["gpt-big".to_string(), "gpt-small".to_string()]);
        assert_eq!(chain.record_success("gpt-big"), FailoverEvent::PrimarySucceeded);
    }

    #[test]
    fn fallback_success_counts_as_failover() {
        let mut chain = ModelChain::new(vec!["gpt-big".to_string(), "gpt-small".to_string()]);
        assert_eq!(chain.record_success("gpt-small"), FailoverEvent::FailoverSucceeded);
    }

    #[test]
    fn three_consecutive_failures_marks_unhealthy() {
        let mut chain = ModelChain::new(vec!["gpt-big".to_string()]);
        assert!(chain.is_healthy("gpt-big"));
        chain.record_failure("gpt-big");
        chain.record_failure("gpt-big");
        assert!(chain.is_healthy("gpt-big"));
        chain.record_failure("gpt-big");
        assert!(!chain.is_healthy("gpt-big"));
    }

    #[test]
    fn next_eligible_skips_cooling_down_model() {
        let mut chain = ModelChain::new(vec!["gpt-big".to_string(), "gpt-small".to_string()]);
        for _ in 0..3 {
            chain.record_failure("gpt-big");
        }
        assert_eq!(chain.next_eligible(), Some("gpt-small"));
    }
}
