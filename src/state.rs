//! Circuit breaker state machine implementation.
//!
//! All time-triggered transitions are evaluated lazily: the machine compares
//! its stored expiry against the `now` it is handed on every access, so no
//! timer or background thread is involved.

use std::convert::Infallible;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::error::BreakerError;

/// Represents the possible states of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Circuit is closed and operations are allowed.
    Closed = 0,

    /// Circuit is open and operations are rejected.
    Open = 1,

    /// Circuit is allowing a limited number of operations to test recovery.
    HalfOpen = 2,
}

impl State {
    /// Lowercase label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }

    /// Numeric encoding for gauges: 0 closed, 1 open, 2 half-open.
    pub fn as_gauge(self) -> i64 {
        self as i64
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request and outcome tallies for the current window or trial period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Requests admitted since the last reset.
    pub requests: u32,
    /// Successful outcomes since the last reset.
    pub total_successes: u32,
    /// Failed outcomes since the last reset.
    pub total_failures: u32,
    /// Successes since the last failure.
    pub consecutive_successes: u32,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }

    /// Returns true if nothing has been recorded.
    pub fn is_zero(&self) -> bool {
        *self == Counts::default()
    }
}

/// A single state change performed by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the change.
    pub from: State,
    /// State after the change.
    pub to: State,
}

/// Transitions collected during one locked step; never more than two.
pub(crate) type Transitions = SmallVec<[Transition; 2]>;

/// Timing and threshold settings the machine evaluates against.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Settings {
    pub max_requests: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

/// The unsynchronized core of a circuit breaker.
///
/// Owners wrap it in a lock and fire hooks for the returned transitions
/// after the lock is released.
#[derive(Debug)]
pub(crate) struct StateMachine {
    settings: Settings,
    state: State,
    counts: Counts,
    // Window end when closed, cool-down end when open, unused when half-open.
    // `None` while closed means the window never rolls over.
    expiry: Option<Instant>,
}

impl StateMachine {
    pub fn new(settings: Settings, now: Instant) -> Self {
        let mut machine = Self {
            settings,
            state: State::Closed,
            counts: Counts::default(),
            expiry: None,
        };
        machine.expiry = machine.window_end(now);
        machine
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    #[cfg(test)]
    pub fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    /// Applies any lazy transition due at `now` and returns the effective state.
    pub fn current(&mut self, now: Instant, out: &mut Transitions) -> State {
        match self.state {
            State::Closed => {
                if self.expired(now) {
                    self.counts.clear();
                    self.expiry = self.window_end(now);
                }
            }
            State::Open => {
                if self.expired(now) {
                    self.set_state(State::HalfOpen, now, out);
                }
            }
            State::HalfOpen => {}
        }
        self.state
    }

    /// Decides admission for one call and counts it if admitted.
    pub fn before_request(
        &mut self,
        now: Instant,
        out: &mut Transitions,
    ) -> Result<State, BreakerError<Infallible>> {
        let state = self.current(now, out);

        match state {
            State::Open => return Err(BreakerError::Open),
            State::HalfOpen if self.counts.requests >= self.settings.max_requests => {
                return Err(BreakerError::TooManyRequests)
            }
            _ => {}
        }

        self.counts.on_request();
        Ok(state)
    }

    /// Records the outcome of an admitted call.
    pub fn on_result(&mut self, success: bool, now: Instant, out: &mut Transitions) {
        let state = self.current(now, out);

        if success {
            self.counts.on_success();
            if state == State::HalfOpen
                && self.counts.consecutive_successes >= self.settings.success_threshold
            {
                self.set_state(State::Closed, now, out);
            }
        } else {
            self.counts.on_failure();
            match state {
                State::Closed
                    if self.counts.consecutive_failures >= self.settings.failure_threshold =>
                {
                    self.set_state(State::Open, now, out);
                }
                State::HalfOpen => self.set_state(State::Open, now, out),
                _ => {}
            }
        }
    }

    /// Forces the closed state and starts a fresh window.
    pub fn reset(&mut self, now: Instant, out: &mut Transitions) {
        if self.state == State::Closed {
            self.counts.clear();
            self.expiry = self.window_end(now);
        } else {
            self.set_state(State::Closed, now, out);
        }
    }

    /// Forces the open state. An already open machine keeps its cool-down.
    pub fn force_open(&mut self, now: Instant, out: &mut Transitions) {
        self.set_state(State::Open, now, out);
    }

    fn set_state(&mut self, to: State, now: Instant, out: &mut Transitions) {
        if self.state == to {
            return;
        }

        let from = self.state;
        self.state = to;
        self.counts.clear();
        self.expiry = match to {
            State::Closed => self.window_end(now),
            State::Open => now.checked_add(self.settings.timeout),
            State::HalfOpen => None,
        };
        out.push(Transition { from, to });
    }

    fn expired(&self, now: Instant) -> bool {
        matches!(self.expiry, Some(expiry) if now >= expiry)
    }

    fn window_end(&self, now: Instant) -> Option<Instant> {
        if self.settings.interval.is_zero() {
            None
        } else {
            now.checked_add(self.settings.interval)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MS: Duration = Duration::from_millis(1);

    fn settings() -> Settings {
        Settings {
            max_requests: 5,
            interval: 50 * MS,
            timeout: 100 * MS,
            failure_threshold: 3,
            success_threshold: 2,
        }
    }

    fn call(
        m: &mut StateMachine,
        success: bool,
        now: Instant,
    ) -> Result<Transitions, BreakerError<Infallible>> {
        let mut out = Transitions::new();
        m.before_request(now, &mut out)?;
        m.on_result(success, now, &mut out);
        Ok(out)
    }

    fn tripped(now: Instant) -> StateMachine {
        let mut m = StateMachine::new(settings(), now);
        for _ in 0..3 {
            call(&mut m, false, now).unwrap();
        }
        m
    }

    #[test]
    fn test_consecutive_failures_trip_open() {
        let t0 = Instant::now();
        let mut m = StateMachine::new(settings(), t0);
        let mut out = Transitions::new();

        call(&mut m, false, t0).unwrap();
        call(&mut m, false, t0).unwrap();
        assert_eq!(m.current(t0, &mut out), State::Closed);
        assert_eq!(m.counts().consecutive_failures, 2);

        let out = call(&mut m, false, t0).unwrap();
        assert_eq!(
            out.as_slice(),
            &[Transition {
                from: State::Closed,
                to: State::Open
            }]
        );
        assert!(m.counts().is_zero());
        assert_eq!(m.expiry(), Some(t0 + 100 * MS));
    }

    #[test]
    fn test_success_breaks_failure_streak() {
        let t0 = Instant::now();
        let mut m = StateMachine::new(settings(), t0);

        call(&mut m, false, t0).unwrap();
        call(&mut m, false, t0).unwrap();
        call(&mut m, true, t0).unwrap();
        call(&mut m, false, t0).unwrap();

        let counts = m.counts();
        assert_eq!(counts.requests, 4);
        assert_eq!(counts.total_failures, 3);
        assert_eq!(counts.consecutive_failures, 1);
        assert_eq!(counts.consecutive_successes, 0);
    }

    #[test]
    fn test_open_rejects_until_timeout() {
        let t0 = Instant::now();
        let mut m = tripped(t0);

        assert!(matches!(call(&mut m, true, t0 + 99 * MS), Err(BreakerError::Open)));

        let mut out = Transitions::new();
        assert_eq!(m.before_request(t0 + 100 * MS, &mut out).unwrap(), State::HalfOpen);
        assert_eq!(out[0].to, State::HalfOpen);
        assert_eq!(m.counts().requests, 1);
        assert_eq!(m.expiry(), None);
    }

    #[test]
    fn test_half_open_closes_after_success_threshold() {
        let t0 = Instant::now();
        let mut m = tripped(t0);
        let t1 = t0 + 100 * MS;

        call(&mut m, true, t1).unwrap();
        let out = call(&mut m, true, t1).unwrap();

        assert_eq!(out.last().map(|t| t.to), Some(State::Closed));
        assert!(m.counts().is_zero());
        assert_eq!(m.expiry(), Some(t1 + 50 * MS));
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let t0 = Instant::now();
        let mut m = tripped(t0);
        let t1 = t0 + 150 * MS;

        call(&mut m, true, t1).unwrap();
        let out = call(&mut m, false, t1).unwrap();

        assert_eq!(
            out.as_slice(),
            &[Transition {
                from: State::HalfOpen,
                to: State::Open
            }]
        );
        assert_eq!(m.expiry(), Some(t1 + 100 * MS));
    }

    #[test]
    fn test_half_open_admission_cap() {
        let t0 = Instant::now();
        let mut m = tripped(t0);
        let t1 = t0 + 100 * MS;
        let mut out = Transitions::new();

        for _ in 0..5 {
            m.before_request(t1, &mut out).unwrap();
        }
        assert!(matches!(
            m.before_request(t1, &mut out),
            Err(BreakerError::TooManyRequests)
        ));
    }

    #[test]
    fn test_closed_window_rolls_over_without_transition() {
        let t0 = Instant::now();
        let mut m = StateMachine::new(settings(), t0);
        call(&mut m, false, t0).unwrap();

        let mut out = Transitions::new();
        assert_eq!(m.current(t0 + 50 * MS, &mut out), State::Closed);
        assert!(out.is_empty());
        assert!(m.counts().is_zero());
        assert_eq!(m.expiry(), Some(t0 + 100 * MS));
    }

    #[test]
    fn test_zero_interval_never_rolls_over() {
        let t0 = Instant::now();
        let mut m = StateMachine::new(
            Settings {
                interval: Duration::ZERO,
                ..settings()
            },
            t0,
        );
        call(&mut m, false, t0).unwrap();
        call(&mut m, false, t0 + Duration::from_secs(3600)).unwrap();

        assert_eq!(m.expiry(), None);
        assert_eq!(m.counts().consecutive_failures, 2);
    }

    #[test]
    fn test_reset_is_idempotent_on_fresh_machine() {
        let t0 = Instant::now();
        let mut m = StateMachine::new(settings(), t0);
        let mut out = Transitions::new();

        m.reset(t0, &mut out);
        assert!(out.is_empty());
        assert!(m.counts().is_zero());
        assert_eq!(m.current(t0, &mut out), State::Closed);
    }

    #[test]
    fn test_reset_from_open() {
        let t0 = Instant::now();
        let mut m = tripped(t0);
        let mut out = Transitions::new();

        m.reset(t0, &mut out);
        assert_eq!(out[0].from, State::Open);
        assert_eq!(m.current(t0, &mut out), State::Closed);
    }

    proptest! {
        #[test]
        fn counts_stay_consistent(steps in prop::collection::vec((any::<bool>(), 0u64..80), 1..200)) {
            let s = settings();
            let mut now = Instant::now();
            let mut m = StateMachine::new(s, now);

            for (success, advance) in steps {
                now += Duration::from_millis(advance);
                let mut out = Transitions::new();
                let admitted = m.before_request(now, &mut out);
                let state = m.current(now, &mut out);

                if state == State::HalfOpen {
                    prop_assert!(m.counts().requests <= s.max_requests);
                }
                if admitted.is_ok() {
                    m.on_result(success, now, &mut out);
                }

                let counts = m.counts();
                prop_assert!(counts.consecutive_successes == 0 || counts.consecutive_failures == 0);
                prop_assert!(counts.consecutive_successes <= counts.total_successes);
                prop_assert!(counts.consecutive_failures <= counts.total_failures);
                prop_assert!(out.len() <= 2);

                let state = m.current(now, &mut out);
                if state == State::Closed {
                    prop_assert!(counts.consecutive_failures < s.failure_threshold);
                }
                if state == State::Open {
                    prop_assert!(m.expiry().is_some());
                }
            }
        }
    }
}
