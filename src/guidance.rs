//! Guidance notifications for feedback layers.
//!
//! The engine owns a [`GuidanceBus`] and publishes every step state change,
//! completion and lifecycle transition to its listeners. Listeners are
//! optional; a bus with none is valid.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::enablement::Enablement;
use crate::program::{GroupId, StepId};

/// Everything a guidance layer may react to
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum GuidanceEvent {
    /// Enablement state of a step changed after a recompute
    #[serde(rename = "step.state_changed")]
    StepStateChanged { step: StepId, state: Enablement },

    #[serde(rename = "step.completed")]
    StepCompleted { step: StepId, reason: String },

    /// A sub-state wait timed out and restarted
    #[serde(rename = "step.wait_warning")]
    WaitWarning { step: StepId, waited_ms: u64 },

    #[serde(rename = "group.started")]
    TaskGroupStarted { group: GroupId, name: String },

    #[serde(rename = "group.completed")]
    TaskGroupCompleted { group: GroupId, name: String },

    #[serde(rename = "module.completed")]
    ModuleCompleted { module: usize, name: String },

    #[serde(rename = "program.completed")]
    ProgramCompleted { name: String },

    #[serde(rename = "sequence.aborted")]
    SequenceAborted,

    /// The frontier cannot start; reported once per distinct blocker
    #[serde(rename = "sequence.blocked")]
    SequenceBlocked { step: StepId, error: String },
}

impl GuidanceEvent {
    /// Event type string for filtering (e.g. "step.completed")
    pub fn event_type(&self) -> &'static str {
        match self {
            GuidanceEvent::StepStateChanged { .. } => "step.state_changed",
            GuidanceEvent::StepCompleted { .. } => "step.completed",
            GuidanceEvent::WaitWarning { .. } => "step.wait_warning",
            GuidanceEvent::TaskGroupStarted { .. } => "group.started",
            GuidanceEvent::TaskGroupCompleted { .. } => "group.completed",
            GuidanceEvent::ModuleCompleted { .. } => "module.completed",
            GuidanceEvent::ProgramCompleted { .. } => "program.completed",
            GuidanceEvent::SequenceAborted => "sequence.aborted",
            GuidanceEvent::SequenceBlocked { .. } => "sequence.blocked",
        }
    }
}

/// Subscriber to guidance events.
///
/// Delivery is synchronous on the tick thread; a listener must not block.
pub trait GuidanceListener {
    /// Listener name (for logging)
    fn name(&self) -> &str;

    /// Whether this listener wants `event`; defaults to everything
    fn handles_event(&self, _event: &GuidanceEvent) -> bool {
        true
    }

    fn notify(&mut self, event: &GuidanceEvent);
}

/// Ordered set of listeners, owned by the engine
#[derive(Default)]
pub struct GuidanceBus {
    listeners: Vec<Box<dyn GuidanceListener>>,
}

impl GuidanceBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Box<dyn GuidanceListener>) {
        debug!(listener = listener.name(), "Guidance listener subscribed");
        self.listeners.push(listener);
    }

    pub fn publish(&mut self, event: &GuidanceEvent) {
        for listener in &mut self.listeners {
            if listener.handles_event(event) {
                listener.notify(event);
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

/// Logs every event through `tracing`
#[derive(Debug, Default)]
pub struct TracingListener;

impl GuidanceListener for TracingListener {
    fn name(&self) -> &str {
        "tracing"
    }

    fn notify(&mut self, event: &GuidanceEvent) {
        match event {
            GuidanceEvent::StepStateChanged { step, state } => {
                debug!(step = %step, state = %state, "Step state changed");
            }
            GuidanceEvent::WaitWarning { step, waited_ms } => {
                warn!(step = %step, waited_ms, "Still waiting for the user");
            }
            GuidanceEvent::SequenceBlocked { step, error } => {
                warn!(step = %step, error = %error, "Sequence blocked");
            }
            other => info!(event = other.event_type(), details = ?other, "Guidance"),
        }
    }
}

/// Keeps a shared copy of every event; the simulator and tests read it back
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Rc<RefCell<Vec<GuidanceEvent>>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle sharing the same event log
    pub fn handle(&self) -> Self {
        self.clone()
    }

    pub fn events(&self) -> Vec<GuidanceEvent> {
        self.events.borrow().clone()
    }

    /// Remove and return everything recorded so far
    pub fn take(&self) -> Vec<GuidanceEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }
}

impl GuidanceListener for RecordingListener {
    fn name(&self) -> &str {
        "recording"
    }

    fn notify(&mut self, event: &GuidanceEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Filtered {
        seen: Rc<RefCell<usize>>,
    }

    impl GuidanceListener for Filtered {
        fn name(&self) -> &str {
            "filtered"
        }

        fn handles_event(&self, event: &GuidanceEvent) -> bool {
            event.event_type().starts_with("step.")
        }

        fn notify(&mut self, _event: &GuidanceEvent) {
            *self.seen.borrow_mut() += 1;
        }
    }

    fn completed() -> GuidanceEvent {
        GuidanceEvent::StepCompleted {
            step: StepId {
                module: 0,
                group: 0,
                step: 1,
            },
            reason: "grabbed #1".to_string(),
        }
    }

    #[test]
    fn test_empty_bus_is_fine() {
        let mut bus = GuidanceBus::new();
        bus.publish(&GuidanceEvent::SequenceAborted);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_recording_handle_shares_log() {
        let recorder = RecordingListener::new();
        let mut bus = GuidanceBus::new();
        bus.subscribe(Box::new(recorder.handle()));

        bus.publish(&completed());
        bus.publish(&GuidanceEvent::SequenceAborted);
        assert_eq!(recorder.events().len(), 2);
        assert_eq!(recorder.take().len(), 2);
        assert!(recorder.events().is_empty());
    }

    #[test]
    fn test_listener_filter() {
        let seen = Rc::new(RefCell::new(0));
        let mut bus = GuidanceBus::new();
        bus.subscribe(Box::new(Filtered { seen: seen.clone() }));

        bus.publish(&completed());
        bus.publish(&GuidanceEvent::ProgramCompleted {
            name: "p".to_string(),
        });
        assert_eq!(*seen.borrow(), 1);
    }

    #[test]
    fn test_event_serialization_tag() {
        let json = serde_json::to_value(completed()).unwrap();
        assert_eq!(json["event"], "step.completed");
        assert_eq!(json["data"]["step"]["step"], 1);
    }
}
