//! World and script condition steps

use std::collections::BTreeMap;

use tracing::{debug, warn};

use super::wait::{SubStateWait, WaitPoll, WaitSettings};
use super::{HandlerContext, HandlerError, StepHandler, StepStart};
use crate::program::{StepAction, StepId, StepKind};
use crate::world::{InteractionFramework, WorldEvent};

#[derive(Debug, Clone)]
enum Subscription {
    /// Polled against the world on the wait interval
    Condition { name: String, wait: SubStateWait },
    /// Pushed by a script as a world event
    Signal { name: String },
}

pub struct ConditionHandler {
    frameworks: Vec<InteractionFramework>,
    wait: WaitSettings,
    subscriptions: BTreeMap<StepId, Subscription>,
}

impl ConditionHandler {
    pub fn new(frameworks: &[InteractionFramework], wait: WaitSettings) -> Self {
        Self {
            frameworks: frameworks.to_vec(),
            wait,
            subscriptions: BTreeMap::new(),
        }
    }
}

impl StepHandler for ConditionHandler {
    fn name(&self) -> &str {
        "condition"
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        matches!(
            kind,
            StepKind::WaitForCondition | StepKind::WaitForScriptCondition
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

        let subscription = match &start.step.action {
            StepAction::WaitForCondition { condition } => {
                if ctx.world.condition_met(condition) {
                    ctx.complete(start.id, format!("condition '{condition}' already met"));
                }
                Subscription::Condition {
                    name: condition.clone(),
                    wait: SubStateWait::new(self.wait),
                }
            }
            StepAction::WaitForScriptCondition { signal } => Subscription::Signal {
                name: signal.clone(),
            },
            other => {
                return Err(HandlerError::Unsupported {
                    handler: self.name().to_string(),
                    kind: other.kind(),
                })
            }
        };

        debug!(step = %start.id, ?subscription, "Waiting for condition");
        self.subscriptions.insert(start.id, subscription);
        Ok(())
    }

    fn stop_step(&mut self, step: StepId) {
        self.subscriptions.remove(&step);
    }

    fn on_world_event(&mut self, event: &WorldEvent, ctx: &mut HandlerContext<'_>) {
        let WorldEvent::ScriptSignal { name: raised } = event else {
            return;
        };
        for (id, subscription) in &self.subscriptions {
            if let Subscription::Signal { name } = subscription {
                if name == raised {
                    ctx.complete(*id, format!("script signal '{raised}'"));
                }
            }
        }
    }

    fn poll(&mut self, ctx: &mut HandlerContext<'_>) {
        let dt = ctx.dt;
        for (id, subscription) in &mut self.subscriptions {
            let Subscription::Condition { name, wait } = subscription else {
                continue;
            };
            let world = &*ctx.world;
            match wait.poll(dt, || world.condition_met(name)) {
                WaitPoll::Ready => ctx.complete(*id, format!("condition '{name}' met")),
                WaitPoll::TimedOut => {
                    let waited = wait.waited();
                    wait.reset_timeout();
                    warn!(
                        step = %id,
                        condition = %name,
                        waited_ms = waited.as_millis(),
                        timeouts = wait.timeouts(),
                        "Condition still not met, continuing to wait"
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
