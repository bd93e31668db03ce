use std::collections::BTreeMap;

use tracing::debug;

use super::{HandlerContext, HandlerError, StepHandler, StepStart};
use crate::program::{RefRole, StepId, StepKind};
use crate::world::{InteractionFramework, ObjectHandle, WorldEvent};

/// Completes once the user arrives at the destination anchor.
pub struct TeleportHandler {
    frameworks: Vec<InteractionFramework>,
    anchors: BTreeMap<StepId, ObjectHandle>,
}

impl TeleportHandler {
    pub fn new(frameworks: &[InteractionFramework]) -> Self {
        Self {
            frameworks: frameworks.to_vec(),
            anchors: BTreeMap::new(),
        }
    }
}

impl StepHandler for TeleportHandler {
    fn name(&self) -> &str {
        "teleport"
    }

    fn can_handle(&self, kind: StepKind) -> bool {
        kind == StepKind::Teleport
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
        let anchor = start.require(RefRole::Destination)?;
        debug!(step = %start.id, anchor = %anchor, "Waiting for teleport");
        self.anchors.insert(start.id, anchor);
        Ok(())
    }

    fn stop_step(&mut self, step: StepId) {
        self.anchors.remove(&step);
    }

    fn on_world_event(&mut self, event: &WorldEvent, ctx: &mut HandlerContext<'_>) {
        let WorldEvent::Teleported { anchor: arrived } = event else {
            return;
        };
        for (id, anchor) in &self.anchors {
            if anchor == arrived {
                ctx.complete(*id, format!("arrived at {arrived}"));
            }
        }
    }

    fn cleanup(&mut self) {
        self.anchors.clear();
    }

    fn active_subscriptions(&self) -> usize {
        self.anchors.len()
    }
}
