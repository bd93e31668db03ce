//! Pluggable step handlers
//!
//! A handler turns raw world events into step completions for the step kinds
//! it declares. Handlers know nothing about sequence position; they only keep
//! their own subscriptions, keyed by [`StepId`].

pub mod condition;
pub mod fastener;
pub mod grab;
pub mod instruction;
pub mod knob;
pub mod registry;
pub mod teleport;
pub mod wait;

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;

use crate::program::{RefRole, Step, StepId, StepKind};
use crate::world::{InteractionFramework, ObjectHandle, World, WorldEvent};

pub use condition::ConditionHandler;
pub use fastener::FastenerHandler;
pub use grab::GrabHandler;
pub use instruction::InstructionHandler;
pub use knob::KnobHandler;
pub use registry::HandlerRegistry;
pub use teleport::TeleportHandler;
pub use wait::{SubStateWait, WaitPoll, WaitSettings};

/// Errors a handler can raise while starting a step
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("step {step} has no resolved {role} reference")]
    MissingReference { step: StepId, role: RefRole },

    #[error("object {0} is not a fastener")]
    NotAFastener(ObjectHandle),

    #[error("object {0} is not a knob")]
    NotAKnob(ObjectHandle),

    #[error("handler '{handler}' cannot run {kind} steps")]
    Unsupported { handler: String, kind: StepKind },
}

/// Signals emitted by handlers, consumed only by the controller
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerSignal {
    /// The step is done; `reason` is diagnostic text only
    Completed { step: StepId, reason: String },
    /// A bounded sub-state wait hit its timeout and was reset
    WaitTimedOut { step: StepId, waited: Duration },
}

/// A step being started, with its references already resolved
#[derive(Debug, Clone, Copy)]
pub struct StepStart<'a> {
    pub id: StepId,
    pub step: &'a Step,
    pub target: Option<ObjectHandle>,
    pub destination: Option<ObjectHandle>,
    pub socket: Option<ObjectHandle>,
}

impl StepStart<'_> {
    pub fn require(&self, role: RefRole) -> Result<ObjectHandle, HandlerError> {
        let handle = match role {
            RefRole::Target => self.target,
            RefRole::Destination => self.destination,
            RefRole::Socket => self.socket,
        };
        handle.ok_or(HandlerError::MissingReference {
            step: self.id,
            role,
        })
    }
}

/// What a handler may touch while it runs
pub struct HandlerContext<'a> {
    pub world: &'a mut dyn World,
    /// Time elapsed since the previous tick
    pub dt: Duration,
    signals: &'a mut VecDeque<HandlerSignal>,
}

impl<'a> HandlerContext<'a> {
    pub fn new(
        world: &'a mut dyn World,
        dt: Duration,
        signals: &'a mut VecDeque<HandlerSignal>,
    ) -> Self {
        Self { world, dt, signals }
    }

    pub fn complete(&mut self, step: StepId, reason: impl Into<String>) {
        self.signals.push_back(HandlerSignal::Completed {
            step,
            reason: reason.into(),
        });
    }

    pub fn wait_timed_out(&mut self, step: StepId, waited: Duration) {
        self.signals
            .push_back(HandlerSignal::WaitTimedOut { step, waited });
    }
}

/// Contract every framework adapter satisfies
pub trait StepHandler {
    /// Handler name (for logging and diagnostics)
    fn name(&self) -> &str;

    fn can_handle(&self, kind: StepKind) -> bool;

    fn supports_framework(&self, framework: InteractionFramework) -> bool;

    /// Subscribe to whatever signals progress for this step and apply the
    /// step's parameter overrides to the referenced objects.
    fn start_step(
        &mut self,
        start: &StepStart<'_>,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError>;

    /// Drop the subscription for `step`. Safe to call repeatedly, and after a
    /// start that failed half way.
    fn stop_step(&mut self, step: StepId);

    /// Route one world event to this handler's subscriptions
    fn on_world_event(&mut self, _event: &WorldEvent, _ctx: &mut HandlerContext<'_>) {}

    /// Advance time-based waits; called once per tick
    fn poll(&mut self, _ctx: &mut HandlerContext<'_>) {}

    /// Drop every subscription
    fn cleanup(&mut self);

    fn active_subscriptions(&self) -> usize;
}
