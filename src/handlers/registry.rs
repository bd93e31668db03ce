//! Ordered handler registry and dispatch.

use tracing::{debug, info};

use super::{
    ConditionHandler, FastenerHandler, GrabHandler, InstructionHandler, KnobHandler,
    StepHandler, TeleportHandler, WaitSettings,
};
use crate::program::StepKind;
use crate::world::InteractionFramework;

/// Handlers in registration order.
///
/// Dispatch picks the first handler that both handles the step kind and
/// supports the current interaction framework, so registration order is the
/// tie-breaker between adapters.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: Vec<Box<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with one adapter per step family for every built-in framework
    pub fn with_defaults(wait: WaitSettings) -> Self {
        use InteractionFramework::{Desktop, PhysicsHands, XrToolkit};

        let mut registry = Self::new();
        registry.register(Box::new(GrabHandler::new("xr_grab", &[XrToolkit, Desktop])));
        registry.register(Box::new(GrabHandler::new("hand_grab", &[PhysicsHands])));
        registry.register(Box::new(FastenerHandler::universal(wait)));
        registry.register(Box::new(KnobHandler::default()));
        registry.register(Box::new(ConditionHandler::new(
            InteractionFramework::all(),
            wait,
        )));
        registry.register(Box::new(InstructionHandler::default()));
        registry.register(Box::new(TeleportHandler::new(&[XrToolkit, Desktop])));
        info!(handlers = registry.len(), "Registered default step handlers");
        registry
    }

    pub fn register(&mut self, handler: Box<dyn StepHandler>) {
        debug!(handler = handler.name(), "Registering step handler");
        self.handlers.push(handler);
    }

    /// Index of the first handler able to run `kind` under `framework`
    pub fn select(&self, kind: StepKind, framework: InteractionFramework) -> Option<usize> {
        self.handlers
            .iter()
            .position(|h| h.can_handle(kind) && h.supports_framework(framework))
    }

    pub fn get(&self, index: usize) -> Option<&(dyn StepHandler + 'static)> {
        self.handlers.get(index).map(|h| &**h)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut (dyn StepHandler + 'static)> {
        self.handlers.get_mut(index).map(|h| &mut **h)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn StepHandler>> {
        self.handlers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Step kinds no registered handler can run under `framework`
    pub fn uncovered_kinds(&self, framework: InteractionFramework) -> Vec<StepKind> {
        StepKind::all()
            .iter()
            .copied()
            .filter(|kind| self.select(*kind, framework).is_none())
            .collect()
    }

    /// Total live subscriptions across all handlers
    pub fn active_subscriptions(&self) -> usize {
        self.handlers.iter().map(|h| h.active_subscriptions()).sum()
    }

    pub fn cleanup_all(&mut self) {
        for handler in &mut self.handlers {
            handler.cleanup();
        }
    }
}
