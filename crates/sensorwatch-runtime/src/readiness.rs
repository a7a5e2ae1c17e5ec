//! [`ReadinessGate`] – poll-once-per-tick startup readiness.
//!
//! The gate holds an ordered list of named checks.  Each call to
//! [`poll`](ReadinessGate::poll) evaluates the first check that has not yet
//! passed and returns immediately; it never blocks.  A check that passed is
//! not evaluated again.
//!
//! Checks are either *required* (wait indefinitely) or *optional* (abandoned
//! once the gate has been polled `timeout` times without them passing).
//! Without a timeout, optional checks behave like required ones.

use tracing::{debug, warn};

type Predicate<C> = Box<dyn Fn(&C) -> bool>;

struct Check<C: ?Sized> {
    name: String,
    required: bool,
    passed: bool,
    predicate: Predicate<C>,
}

/// Result of one [`ReadinessGate::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// The named check has not passed yet.
    Waiting { pending: String },
    /// Every check passed.
    Ready,
    /// Required checks passed; the listed optional ones timed out.
    ReadyWithout { abandoned: Vec<String> },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        !matches!(self, Readiness::Waiting { .. })
    }
}

/// Ordered set of readiness checks over a context `C`.
///
/// # Example
///
/// ```
/// use sensorwatch_runtime::readiness::{Readiness, ReadinessGate};
///
/// let mut gate: ReadinessGate<u32> = ReadinessGate::new(Some(2))
///     .require("warm", |t| *t >= 1)
///     .prefer("plugin", |_| false);
///
/// assert!(matches!(gate.poll(&0), Readiness::Waiting { .. }));
/// assert!(matches!(gate.poll(&1), Readiness::ReadyWithout { .. }));
/// ```
pub struct ReadinessGate<C: ?Sized> {
    checks: Vec<Check<C>>,
    timeout: Option<u64>,
    polls: u64,
}

impl<C: ?Sized> ReadinessGate<C> {
    /// `timeout` bounds the wait for optional checks, in polls.
    pub fn new(timeout: Option<u64>) -> Self {
        Self {
            checks: Vec::new(),
            timeout,
            polls: 0,
        }
    }

    /// Append a check that must pass.
    pub fn require<F>(self, name: &str, predicate: F) -> Self
    where
        F: Fn(&C) -> bool + 'static,
    {
        self.with_check(name, true, Box::new(predicate))
    }

    /// Append a check that is abandoned when the timeout expires.
    pub fn prefer<F>(self, name: &str, predicate: F) -> Self
    where
        F: Fn(&C) -> bool + 'static,
    {
        self.with_check(name, false, Box::new(predicate))
    }

    /// Number of polls so far.
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Advance the gate by one tick.
    pub fn poll(&mut self, ctx: &C) -> Readiness {
        self.polls += 1;
        let expired = self.timeout.is_some_and(|t| self.polls >= t);

        let mut abandoned = Vec::new();
        for check in self.checks.iter_mut().filter(|c| !c.passed) {
            if (check.predicate)(ctx) {
                debug!(check = %check.name, polls = self.polls, "readiness check passed");
                check.passed = true;
                continue;
            }
            if !check.required && expired {
                abandoned.push(check.name.clone());
                continue;
            }
            return Readiness::Waiting {
                pending: check.name.clone(),
            };
        }

        if abandoned.is_empty() {
            Readiness::Ready
        } else {
            warn!(?abandoned, polls = self.polls, "gave up waiting for optional checks");
            Readiness::ReadyWithout { abandoned }
        }
    }

    fn with_check(mut self, name: &str, required: bool, predicate: Predicate<C>) -> Self {
        self.checks.push(Check {
            name: name.to_string(),
            required,
            passed: false,
            predicate,
        });
        self
    }
}

impl<C: ?Sized> std::fmt::Debug for ReadinessGate<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let pending: Vec<&str> = self
            .checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.name.as_str())
            .collect();
        f.debug_struct("ReadinessGate")
            .field("pending", &pending)
            .field("polls", &self.polls)
            .field("timeout", &self.timeout)
            .finish()
    }
}
