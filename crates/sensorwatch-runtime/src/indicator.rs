//! [`IndicatorStateMachine`] – maps the aggregate availability onto the
//! three-state alert indicator.
//!
//! ```text
//!            AnyAvailable(true)
//!   Idle ───────────────────────▶ Alerting
//!     ▲  ◀─────────────────────── │
//!     │      AnyAvailable(false)  │
//!     │                           │
//!     └──── end_busy ──── Busy ◀──┘ begin_busy (from any state)
//! ```
//!
//! `Busy` is never derived from sensor data; it brackets context setup and
//! teardown.  The sink is called once per transition and never for a
//! repeated state.

use sensorwatch_types::{Event, EventPayload, IndicatorState};
use tracing::debug;

/// Receiver of indicator transitions (a toolbar button, a status line...).
pub trait IndicatorSink {
    fn set_indicator_state(&mut self, state: IndicatorState);
}

/// A sink that ignores every transition.
#[derive(Debug, Default)]
pub struct NullSink;

impl IndicatorSink for NullSink {
    fn set_indicator_state(&mut self, _state: IndicatorState) {}
}

/// Three-state indicator driven by `AnyAvailable` events.
pub struct IndicatorStateMachine {
    state: IndicatorState,
    /// Last aggregate seen, applied when leaving `Busy`.
    any_available: bool,
    sink: Box<dyn IndicatorSink>,
}

impl IndicatorStateMachine {
    /// Start in `Idle`.  The sink is not called for the initial state.
    pub fn new(sink: Box<dyn IndicatorSink>) -> Self {
        Self {
            state: IndicatorState::Idle,
            any_available: false,
            sink,
        }
    }

    pub fn state(&self) -> IndicatorState {
        self.state
    }

    /// Enter `Busy` while a context is being set up or torn down.
    pub fn begin_busy(&mut self) {
        self.transition(IndicatorState::Busy);
    }

    /// Leave `Busy`, resetting the remembered aggregate to `available`.
    pub fn end_busy(&mut self, available: bool) {
        self.any_available = available;
        if self.state == IndicatorState::Busy {
            self.transition(Self::resting(available));
        }
    }

    /// Apply an `AnyAvailable` aggregate.  Ignored while `Busy`.
    pub fn on_any_available(&mut self, available: bool) {
        self.any_available = available;
        if self.state != IndicatorState::Busy {
            self.transition(Self::resting(available));
        }
    }

    /// Bus adapter: feeds `AnyAvailable` payloads, ignores the rest.
    pub fn observe(&mut self, event: &Event) {
        if let EventPayload::AnyAvailable(available) = event.payload {
            self.on_any_available(available);
        }
    }

    fn resting(available: bool) -> IndicatorState {
        if available {
            IndicatorState::Alerting
        } else {
            IndicatorState::Idle
        }
    }

    fn transition(&mut self, next: IndicatorState) {
        if next == self.state {
            return;
        }
        debug!(from = ?self.state, to = ?next, "indicator transition");
        self.state = next;
        self.sink.set_indicator_state(next);
    }
}

impl std::fmt::Debug for IndicatorStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndicatorStateMachine")
            .field("state", &self.state)
            .field("any_available", &self.any_available)
            .finish()
    }
}
