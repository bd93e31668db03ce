use std::collections::BTreeMap;

use tracing::{debug, info};

use super::{HandlerContext, HandlerError, StepHandler, StepStart};
use crate::program::{RefRole, StepAction, StepId, StepKind};
use crate::world::{InteractionFramework, KnobConfig, ObjectHandle, WorldEvent};

/// Completes a knob step once the knob is turned within tolerance of its
/// target angle.
pub struct KnobHandler {
    frameworks: Vec<InteractionFramework>,
    subscriptions: BTreeMap<StepId, (ObjectHandle, KnobConfig)>,
}

impl KnobHandler {
    pub fn new(frameworks: &[InteractionFramework]) -> Self {
        Self {
            frameworks: frameworks.to_vec(),
            subscriptions: BTreeMap::new(),
        }
    }
}

impl Default for KnobHandler {
    fn default() -> Self {
        Self::new(InteractionFramework::all())
    }
}

impl StepHandler for KnobHandler {
    fn name(&self) -> &str {
        "knob"
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::TurnKnob
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

        let StepAction::TurnKnob(params) = &start.step.action else {
            return Err(HandlerError::Unsupported {
                handler: self.name().to_string(),
                kind: start.step.kind(),
            });
        };
        let target = start.require(RefRole::Target)?;
        let current = ctx
            .world
            .knob_config(target)
            .ok_or(HandlerError::NotAKnob(target))?;

        let effective = match params.effective_config(&current) {
            Some(config) => {
                info!(
                    step = %start.id,
                    object = %target,
                    axis = ?config.axis,
                    target_angle = config.target_angle,
                    tolerance = config.tolerance,
                    "Applying knob override"
                );
                ctx.world.set_knob_config(target, config);
                config
            }
            None => current,
        };

        debug!(step = %start.id, object = %target, "Subscribed to knob rotation");
        self.subscriptions.insert(start.id, (target, effective));
        Ok(())
    }

    fn stop_step(&mut self, step: StepId) {
        self.subscriptions.remove(&step);
    }

    fn on_world_event(&mut self, event: &WorldEvent, ctx: &mut HandlerContext<'_>) {
        let WorldEvent::KnobTurned { object, angle } = event else {
            return;
        };
        for (id, (target, config)) in &self.subscriptions {
            if object == target && config.accepts(*angle) {
                ctx.complete(*id, format!("knob {object} turned to {angle}"));
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
