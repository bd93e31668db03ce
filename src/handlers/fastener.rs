//! Fastener steps: tighten, loosen, install, remove.
//!
//! Tighten and loosen only accept progress once the fastener is in the
//! required sub-state; until then the subscription sits in a bounded wait
//! that warns and resets on timeout instead of failing.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use super::wait::{SubStateWait, WaitPoll, WaitSettings};
use super::{HandlerContext, HandlerError, StepHandler, StepStart};
use crate::program::{RefRole, StepId, StepKind};
use crate::world::{FastenerState, InteractionFramework, ObjectHandle, World, WorldEvent};

#[derive(Debug, Clone)]
enum Phase {
    WaitingForSubState(SubStateWait),
    Listening,
}

#[derive(Debug, Clone)]
struct Subscription {
    kind: StepKind,
    target: ObjectHandle,
    destination: Option<ObjectHandle>,
    phase: Phase,
}

/// Sub-state a fastener must be in before progress of `kind` counts
fn required_state(kind: StepKind) -> Option<FastenerState> {
    match kind {
        StepKind::TightenFastener | StepKind::RemoveFastener => Some(FastenerState {
            locked: true,
            tight: false,
        }),
        StepKind::LoosenFastener => Some(FastenerState {
            locked: true,
            tight: true,
        }),
        _ => None,
    }
}

fn in_state(world: &dyn World, object: ObjectHandle, required: FastenerState) -> bool {
    world.fastener_state(object) == Some(required)
}

pub struct FastenerHandler {
    frameworks: Vec<InteractionFramework>,
    wait: WaitSettings,
    subscriptions: BTreeMap<StepId, Subscription>,
}

impl FastenerHandler {
    pub fn new(frameworks: &[InteractionFramework], wait: WaitSettings) -> Self {
        Self {
            frameworks: frameworks.to_vec(),
            wait,
            subscriptions: BTreeMap::new(),
        }
    }

    /// Handler available under every interaction framework
    pub fn universal(wait: WaitSettings) -> Self {
        Self::new(InteractionFramework::all(), wait)
    }

    fn completes(subscription: &Subscription, event: &WorldEvent) -> bool {
        if !matches!(subscription.phase, Phase::Listening) {
            return false;
        }
        let target = subscription.target;
        match (subscription.kind, event) {
            (StepKind::TightenFastener, WorldEvent::FastenerTightened { object })
            | (StepKind::LoosenFastener, WorldEvent::FastenerLoosened { object }) => {
                *object == target
            }
            (StepKind::InstallFastener, WorldEvent::Snapped { socket, object }) => {
                *object == target && Some(*socket) == subscription.destination
            }
            (StepKind::RemoveFastener, WorldEvent::Unsnapped { object, .. }) => *object == target,
            _ => false,
        }
    }
}

impl StepHandler for FastenerHandler {
    fn name(&self) -> &str {
        "fastener"
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        matches!(
            kind,
            StepKind::TightenFastener
                | StepKind::LoosenFastener
                | StepKind::InstallFastener
                | StepKind::RemoveFastener
        )
    }

    fn supports_framework(&self, framework: InteractionFramework) -> bool {
        self.frameworks.contains(&framework)
    }

    fn start_step(
        &mut self,
        start: &StepStart<'_>,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        self.stop_step(start.id);

        let kind = start.step.kind();
        let Some((params, direction)) = start.step.action.fastener() else {
            return Err(HandlerError::Unsupported {
                handler: self.name().to_string(),
                kind,
            });
        };
        let target = start.require(RefRole::Target)?;
        let destination = if kind == StepKind::InstallFastener {
            Some(start.require(RefRole::Destination)?)
        } else {
            None
        };

        let current = ctx
            .world
            .fastener_config(target)
            .ok_or(HandlerError::NotAFastener(target))?;
        if let Some(config) = params.effective_config(direction, &current) {
            info!(
                step = %start.id,
                object = %target,
                ?direction,
                tighten = config.tighten_angle,
                loosen = config.loosen_angle,
                tolerance = config.angle_tolerance,
                "Applying fastener override"
            );
            ctx.world.set_fastener_config(target, config);
        }

        // Install only needs the snap; the others gate on the fastener sub-state
        let phase = match required_state(kind) {
            Some(required) if !in_state(&*ctx.world, target, required) => {
                debug!(step = %start.id, ?required, "Waiting for fastener sub-state");
                Phase::WaitingForSubState(SubStateWait::new(self.wait))
            }
            _ => Phase::Listening,
        };

        self.subscriptions.insert(
            start.id,
            Subscription {
                kind,
                target,
                destination,
                phase,
            },
        );
        Ok(())
    }

    fn stop_step(&mut self, step: StepId) {
        self.subscriptions.remove(&step);
    }

    fn on_world_event(&mut self, event: &WorldEvent, ctx: &mut HandlerContext<'_>) {
        for (id, subscription) in &self.subscriptions {
            if Self::completes(subscription, event) {
                ctx.complete(*id, format!("{} on {}", subscription.kind, subscription.target));
            }
        }
    }

    fn poll(&mut self, ctx: &mut HandlerContext<'_>) {
        let dt = ctx.dt;
        for (id, subscription) in &mut self.subscriptions {
            let Phase::WaitingForSubState(wait) = &mut subscription.phase else {
                continue;
            };
            let Some(required) = required_state(subscription.kind) else {
                subscription.phase = Phase::Listening;
                continue;
            };

            let target = subscription.target;
            let world: &dyn World = &*ctx.world;
            match wait.poll(dt, || in_state(world, target, required)) {
                WaitPoll::Ready => {
                    debug!(step = %id, object = %target, "Fastener sub-state reached");
                    subscription.phase = Phase::Listening;
                }
                WaitPoll::TimedOut => {
                    let waited = wait.waited();
                    wait.reset_timeout();
                    warn!(
                        step = %id,
                        object = %target,
                        waited_ms = waited.as_millis(),
                        timeouts = wait.timeouts(),
                        "Fastener has not reached the required state yet, still waiting"
                    );
                    ctx.wait_timed_out(*id, waited);
                }
                WaitPoll::Pending => {}
            }
        }
    }

    fn cleanup(&mut self) {
        self.subscriptions.clear();
    }

    fn active_subscriptions(&self) -> usize {
        self.subscriptions.len()
    }
}
