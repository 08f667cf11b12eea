//! Hook registry for circuit breaker events.

use crate::state::State;
use parking_lot::RwLock;
use std::sync::Arc;

type TransitionHookFn = Arc<dyn Fn(&str, State, State) + Send + Sync + 'static>;
type OutcomeHookFn = Arc<dyn Fn(&str) + Send + Sync + 'static>;
type RejectHookFn = Arc<dyn Fn(&str, State) + Send + Sync + 'static>;

/// A registry for circuit breaker event hooks.
///
/// Every hook receives the breaker name and runs after the breaker's
/// internal lock has been released, so hooks may call back into the breaker.
pub struct HookRegistry {
    on_state_change: RwLock<Option<TransitionHookFn>>,
    on_success: RwLock<Option<OutcomeHookFn>>,
    on_failure: RwLock<Option<OutcomeHookFn>>,
    on_rejected: RwLock<Option<RejectHookFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_state_change: RwLock::new(None),
            on_success: RwLock::new(None),
            on_failure: RwLock::new(None),
            on_rejected: RwLock::new(None),
        }
    }

    /// Sets the hook to call on every state transition, with `(name, from, to)`.
    pub fn set_on_state_change<F>(&self, f: F)
    where
        F: Fn(&str, State, State) + Send + Sync + 'static,
    {
        *self.on_state_change.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a protected call succeeds.
    pub fn set_on_success<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_success.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a protected call fails.
    pub fn set_on_failure<F>(&self, f: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.on_failure.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when a call is rejected, with the state that rejected it.
    pub fn set_on_rejected<F>(&self, f: F)
    where
        F: Fn(&str, State) + Send + Sync + 'static,
    {
        *self.on_rejected.write() = Some(Arc::new(f));
    }

    pub(crate) fn execute_state_change_hook(&self, name: &str, from: State, to: State) {
        // Clone out of the lock so a hook can replace hooks without deadlocking.
        let hook = self.on_state_change.read().clone();
        if let Some(hook) = hook {
            hook(name, from, to);
        }
    }

    pub(crate) fn execute_outcome_hook(&self, name: &str, success: bool) {
        let slot = if success {
            &self.on_success
        } else {
            &self.on_failure
        };
        let hook = slot.read().clone();
        if let Some(hook) = hook {
            hook(name);
        }
    }

    pub(crate) fn execute_rejected_hook(&self, name: &str, state: State) {
        let hook = self.on_rejected.read().clone();
        if let Some(hook) = hook {
            hook(name, state);
        }
    }
}
