use std::collections::BTreeMap;
use std::time::Duration;

use tracing::{debug, info};

use super::{HandlerContext, HandlerError, StepHandler, StepStart};
use crate::program::{StepAction, StepId, StepKind};
use crate::world::{InteractionFramework, WorldEvent};

#[derive(Debug, Clone, Copy)]
struct Shown {
    /// Auto-complete deadline; `None` waits for acknowledgement
    duration: Option<Duration>,
    shown_for: Duration,
}

/// Shows a text instruction; completes on acknowledgement or after its
/// display duration.
pub struct InstructionHandler {
    frameworks: Vec<InteractionFramework>,
    displays: BTreeMap<StepId, Shown>,
}

impl InstructionHandler {
    pub fn new(frameworks: &[InteractionFramework]) -> Self {
        Self {
            frameworks: frameworks.to_vec(),
            displays: BTreeMap::new(),
        }
    }
}

impl Default for InstructionHandler {
    fn default() -> Self {
        Self::new(InteractionFramework::all())
    }
}

impl StepHandler for InstructionHandler {
    fn name(&self) -> &str {
        "instruction"
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::ShowInstruction
    }

    fn supports_framework(&self, framework: InteractionFramework) -> bool {
        self.frameworks.contains(&framework)
    }

    fn start_step(
        &mut self,
        start: &StepStart<'_>,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<(), HandlerError> {
        self.stop_step(start.id);

        let StepAction::ShowInstruction {
            text,
            duration_secs,
        } = &start.step.action
        else {
            return Err(HandlerError::Unsupported {
                handler: self.name().to_string(),
                kind: start.step.kind(),
            });
        };

        info!(step = %start.id, instruction = %text, "Showing instruction");
        let duration = duration_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f32);
        self.displays.insert(
            start.id,
            Shown {
                duration,
                shown_for: Duration::ZERO,
            },
        );
        Ok(())
    }

    fn stop_step(&mut self, step: StepId) {
        self.displays.remove(&step);
    }

    fn on_world_event(&mut self, event: &WorldEvent, ctx: &mut HandlerContext<'_>) {
        if *event != WorldEvent::InstructionAcknowledged {
            return;
        }
        for id in self.displays.keys() {
            ctx.complete(*id, "instruction acknowledged");
        }
    }

    fn poll(&mut self, ctx: &mut HandlerContext<'_>) {
        for (id, display) in &mut self.displays {
            let Some(duration) = display.duration else {
                continue;
            };
            let before = display.shown_for;
            display.shown_for += ctx.dt;
            if before < duration && display.shown_for >= duration {
                debug!(step = %id, "Instruction display time elapsed");
                ctx.complete(*id, "instruction display time elapsed");
            }
        }
    }

    fn cleanup(&mut self) {
        self.displays.clear();
    }

    fn active_subscriptions(&self) -> usize {
        self.displays.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Step;
    use crate::world::sim::SimulatedWorld;
    use std::collections::VecDeque;

    const ID: StepId = StepId {
        module: 0,
        group: 0,
        step: 2,
    };

    fn instruction(duration_secs: Option<f32>) -> Step {
        Step::new(
            "read",
            StepAction::ShowInstruction {
                text: "Close the panel".to_string(),
                duration_secs,
            },
        )
    }

    fn start(step: &Step) -> StepStart<'_> {
        StepStart {
            id: ID,
            step,
            target: None,
            destination: None,
            socket: None,
        }
    }

    #[test]
    fn test_timed_instruction_completes_once() {
        let mut world = SimulatedWorld::new();
        let step = instruction(Some(1.0));
        let mut signals = VecDeque::new();
        let mut h = InstructionHandler::default();

        let mut ctx = HandlerContext::new(&mut world, Duration::from_millis(400), &mut signals);
        h.start_step(&start(&step), &mut ctx).unwrap();
        for _ in 0..5 {
            h.poll(&mut ctx);
        }
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn test_untimed_instruction_waits_for_acknowledgement() {
        let mut world = SimulatedWorld::new();
        let step = instruction(None);
        let mut signals = VecDeque::new();
        let mut h = InstructionHandler::default();

        let mut ctx = HandlerContext::new(&mut world, Duration::from_secs(60), &mut signals);
        h.start_step(&start(&step), &mut ctx).unwrap();
        h.poll(&mut ctx);
        h.on_world_event(&WorldEvent::InstructionAcknowledged, &mut ctx);
        assert_eq!(signals.len(), 1);
    }
}
