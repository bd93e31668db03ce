//! Grab and grab-and-snap detection

use std::collections::BTreeMap;

use tracing::debug;

use super::{HandlerContext, HandlerError, StepHandler, StepStart};
use crate::program::{RefRole, StepId, StepKind};
use crate::world::{InteractionFramework, ObjectHandle, WorldEvent};

#[derive(Debug, Clone, Copy)]
enum Subscription {
    Grab {
        target: ObjectHandle,
    },
    Snap {
        target: ObjectHandle,
        destination: ObjectHandle,
    },
}

/// Completes grab steps on a grab event and snap steps once the target sits
/// in the destination socket.
pub struct GrabHandler {
    name: String,
    frameworks: Vec<InteractionFramework>,
    subscriptions: BTreeMap<StepId, Subscription>,
}

impl GrabHandler {
    pub fn new(name: impl Into<String>, frameworks: &[InteractionFramework]) -> Self {
        Self {
            name: name.into(),
            frameworks: frameworks.to_vec(),
            subscriptions: BTreeMap::new(),
        }
    }
}

impl StepHandler for GrabHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        matches!(kind, StepKind::Grab | StepKind::GrabAndSnap)
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

        let target = start.require(RefRole::Target)?;
        let subscription = match start.step.kind() {
            StepKind::Grab => Subscription::Grab { target },
            StepKind::GrabAndSnap => {
                let destination = start.require(RefRole::Destination)?;
                if ctx.world.occupant(destination) == Some(target) {
                    ctx.complete(start.id, "target already snapped into destination");
                }
                Subscription::Snap {
                    target,
                    destination,
                }
            }
            kind => {
                return Err(HandlerError::Unsupported {
                    handler: self.name.clone(),
                    kind,
                })
            }
        };

        debug!(handler = %self.name, step = %start.id, "Subscribed to grab events");
        self.subscriptions.insert(start.id, subscription);
        Ok(())
    }

    fn stop_step(&mut self, step: StepId) {
        self.subscriptions.remove(&step);
    }

    fn on_world_event(&mut self, event: &WorldEvent, ctx: &mut HandlerContext<'_>) {
        for (id, subscription) in &self.subscriptions {
            match (subscription, event) {
                (Subscription::Grab { target }, WorldEvent::Grabbed { object })
                    if object == target =>
                {
                    ctx.complete(*id, format!("grabbed {object}"));
                }
                (
                    Subscription::Snap {
                        target,
                        destination,
                    },
                    WorldEvent::Snapped { socket, object },
                ) if object == target && socket == destination => {
                    ctx.complete(*id, format!("snapped {object} into {socket}"));
                }
                _ => {}
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
