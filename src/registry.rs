//! Process-local registry of named circuit breakers.

use std::collections::HashMap;

use ahash::RandomState;
use parking_lot::RwLock;

use crate::breaker::CircuitBreaker;
use crate::config::BreakerConfig;
use crate::error::ConfigError;
use crate::state::{Counts, State};

/// Point-in-time view of one registered breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Breaker name.
    pub name: String,
    /// Effective state when the snapshot was taken.
    pub state: State,
    /// Counts when the snapshot was taken.
    pub counts: Counts,
}

/// A map from dependency name to the breaker guarding it.
#[derive(Default)]
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, CircuitBreaker, RandomState>>,
}

impl BreakerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `breaker` under its own name, returning any breaker it replaced.
    pub fn insert(&self, breaker: CircuitBreaker) -> Option<CircuitBreaker> {
        self.breakers
            .write()
            .insert(breaker.name().to_string(), breaker)
    }

    /// Looks up a breaker by name.
    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.read().get(name).cloned()
    }

    /// Returns the breaker named in `config`, building it on first use.
    ///
    /// An existing breaker is returned unchanged even if its configuration
    /// differs from `config`.
    pub fn get_or_try_insert_with(
        &self,
        config: BreakerConfig,
    ) -> Result<CircuitBreaker, ConfigError> {
        if let Some(existing) = self.get(&config.name) {
            return Ok(existing);
        }

        let mut breakers = self.breakers.write();
        if let Some(existing) = breakers.get(&config.name) {
            return Ok(existing.clone());
        }
        let breaker = CircuitBreaker::new(config)?;
        breakers.insert(breaker.name().to_string(), breaker.clone());
        Ok(breaker)
    }

    /// Unregisters a breaker. Clones held elsewhere keep working.
    pub fn remove(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.write().remove(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }

    /// State and counts of every breaker, sorted by name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        // Collect first so lazy transitions (and their hooks) run outside our lock.
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        let mut snapshots: Vec<_> = breakers
            .iter()
            .map(|breaker| BreakerSnapshot {
                name: breaker.name().to_string(),
                state: breaker.state(),
                counts: breaker.counts(),
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Resets every registered breaker to closed.
    pub fn reset_all(&self) {
        let breakers: Vec<_> = self.breakers.read().values().cloned().collect();
        for breaker in breakers {
            breaker.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(name: &str) -> BreakerConfig {
        BreakerConfig {
            name: name.to_string(),
            max_requests: 1,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            failure_threshold: 1,
            success_threshold: 1,
        }
    }

    #[test]
    fn test_get_or_insert_reuses_breaker() {
        let registry = BreakerRegistry::new();
        let first = registry.get_or_try_insert_with(config("sms")).unwrap();
        first.force_open();

        let second = registry.get_or_try_insert_with(config("sms")).unwrap();
        assert_eq!(second.state(), State::Open);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_config_is_not_registered() {
        let registry = BreakerRegistry::new();
        let bad = BreakerConfig {
            failure_threshold: 0,
            ..config("storage")
        };
        assert!(registry.get_or_try_insert_with(bad).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_and_reset_all() {
        let registry = BreakerRegistry::new();
        for name in ["push", "bus", "sms"] {
            registry.insert(CircuitBreaker::new(config(name)).unwrap());
        }
        registry.get("bus").unwrap().force_open();

        let snapshot = registry.snapshot();
        assert_eq!(registry.names(), ["bus", "push", "sms"]);
        assert_eq!(snapshot[0].state, State::Open);
        assert_eq!(snapshot[1].state, State::Closed);

        registry.reset_all();
        assert!(registry
            .snapshot()
            .iter()
            .all(|s| s.state == State::Closed && s.counts.is_zero()));

        assert!(registry.remove("push").is_some());
        assert!(registry.get("push").is_none());
    }
}
