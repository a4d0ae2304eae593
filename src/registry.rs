//! Named resilience components.
//!
//! Breakers, retry policies and dead-letter queues are created on first use
//! from the configured defaults and shared by name afterwards. The registry
//! is passed explicitly to whoever needs it.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;

use crate::config::{BridgeConfig, CircuitBreakerConfig, DlqConfig, RetryConfig};
use crate::dlq::{DeadLetterQueue, DlqStats};
use crate::pipeline::Record;
use crate::resilience::{CircuitBreaker, CircuitBreakerStats, RetryPolicy, RetryStats};

/// Stats of every registered component, sorted by name.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrySnapshot {
    pub breakers: Vec<CircuitBreakerStats>,
    pub retry_policies: Vec<RetryStats>,
    pub dead_letter_queues: Vec<DlqStats>,
}

#[derive(Debug)]
pub struct Registry {
    breaker_defaults: CircuitBreakerConfig,
    retry_defaults: RetryConfig,
    dlq_defaults: DlqConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    policies: DashMap<String, Arc<RetryPolicy>>,
    queues: DashMap<String, Arc<DeadLetterQueue<Record>>>,
}

impl Registry {
    pub fn new(breaker_defaults: CircuitBreakerConfig, retry_defaults: RetryConfig, dlq_defaults: DlqConfig) -> Self {
        Self {
            breaker_defaults,
            retry_defaults,
            dlq_defaults,
            breakers: DashMap::new(),
            policies: DashMap::new(),
            queues: DashMap::new(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(
            config.circuit_breaker.clone(),
            config.retry.clone(),
            config.dlq.clone(),
        )
    }

    /// Breaker for `name`, created with the default config if missing.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, self.breaker_defaults.clone())))
            .clone()
    }

    pub fn retry_policy(&self, name: &str) -> Arc<RetryPolicy> {
        self.policies
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RetryPolicy::new(name, self.retry_defaults.clone())))
            .clone()
    }

    /// Register a prepared policy (e.g. one with a custom delay), replacing
    /// any policy of the same name.
    pub fn register_retry_policy(&self, policy: RetryPolicy) -> Arc<RetryPolicy> {
        let policy = Arc::new(policy);
        self.policies.insert(policy.name().to_string(), policy.clone());
        policy
    }

    pub fn dead_letter_queue(&self, name: &str) -> Arc<DeadLetterQueue<Record>> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(DeadLetterQueue::new(name, self.dlq_defaults.clone())))
            .clone()
    }

    /// Force every breaker closed.
    pub fn reset_breakers(&self) {
        for breaker in self.breakers.iter() {
            breaker.reset();
        }
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut breakers: Vec<CircuitBreakerStats> = self.breakers.iter().map(|b| b.stats()).collect();
        breakers.sort_by(|a, b| a.name.cmp(&b.name));

        let mut retry_policies: Vec<RetryStats> = self.policies.iter().map(|p| p.stats()).collect();
        retry_policies.sort_by(|a, b| a.name.cmp(&b.name));

        let mut dead_letter_queues: Vec<DlqStats> = self.queues.iter().map(|q| q.stats()).collect();
        dead_letter_queues.sort_by(|a, b| a.name.cmp(&b.name));

        RegistrySnapshot {
            breakers,
            retry_policies,
            dead_letter_queues,
        }
    }
}
