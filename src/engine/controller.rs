//! Sequence execution controller.
//!
//! Owns the traversal cursor (current task group), the active set and the
//! handler registry. Everything happens inside [`Engine::start`],
//! [`Engine::tick`] and the explicit commands; there are no threads.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::error::EngineError;
use crate::config::EngineConfig;
use crate::enablement::EnablementPlan;
use crate::guidance::{GuidanceBus, GuidanceEvent};
use crate::handlers::{HandlerContext, HandlerRegistry, HandlerSignal, StepStart};
use crate::program::{
    check_references, GroupId, IssueSeverity, Program, ProgramError, Progress, RefRole, StepId,
    StepStatus, ValidationIssue,
};
use crate::world::{
    FixedFramework, FrameworkDetector, InteractionFramework, Resolver, World,
};

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "group", rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    Running(GroupId),
    Completed,
    Aborted,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Idle => f.write_str("idle"),
            EngineState::Running(group) => write!(f, "running ({group})"),
            EngineState::Completed => f.write_str("completed"),
            EngineState::Aborted => f.write_str("aborted"),
        }
    }
}

pub struct Engine {
    registry: HandlerRegistry,
    detector: Box<dyn FrameworkDetector>,
    guidance: GuidanceBus,
    program: Option<Program>,
    state: EngineState,
    /// Active step → index of the handler running it
    active: BTreeMap<StepId, usize>,
    signals: VecDeque<HandlerSignal>,
    plan: EnablementPlan,
    /// Why the frontier could not start; retried every tick
    blocked: Option<EngineError>,
    run_id: Option<Uuid>,
}

impl Engine {
    pub fn new(
        registry: HandlerRegistry,
        detector: Box<dyn FrameworkDetector>,
        guidance: GuidanceBus,
    ) -> Self {
        Self {
            registry,
            detector,
            guidance,
            program: None,
            state: EngineState::Idle,
            active: BTreeMap::new(),
            signals: VecDeque::new(),
            plan: EnablementPlan::default(),
            blocked: None,
            run_id: None,
        }
    }

    /// Default handlers and a fixed framework taken from configuration
    pub fn from_config(config: &EngineConfig, guidance: GuidanceBus) -> Self {
        Self::new(
            HandlerRegistry::with_defaults(config.wait_settings()),
            Box::new(FixedFramework(config.framework)),
            guidance,
        )
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, EngineState::Running(_))
    }

    pub fn program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    pub fn framework(&self) -> InteractionFramework {
        self.detector.current_framework()
    }

    /// Steps currently in the active set, in program order
    pub fn active_steps(&self) -> Vec<StepId> {
        self.active.keys().copied().collect()
    }

    pub fn enablement(&self) -> &EnablementPlan {
        &self.plan
    }

    /// Error currently stalling the sequence, if any
    pub fn blocker(&self) -> Option<&EngineError> {
        self.blocked.as_ref()
    }

    pub fn progress(&self) -> Option<Progress> {
        self.program.as_ref().map(Program::progress)
    }

    /// Everything that would stop or stall `program` in `world`: structural
    /// errors, plus warnings for unresolved references and step kinds no
    /// handler covers under the current framework.
    pub fn preflight(&self, program: &Program, world: &dyn World) -> Vec<ValidationIssue> {
        let framework = self.detector.current_framework();
        let mut issues = program.validate();
        issues.extend(check_references(program, world));

        let uncovered = self.registry.uncovered_kinds(framework);
        for id in program.step_ids() {
            let Some(step) = program.step(id) else {
                continue;
            };
            if uncovered.contains(&step.kind()) {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Warning,
                    step: Some(id),
                    location: program.step_label(id),
                    message: format!("no handler for {} steps under {framework}", step.kind()),
                });
            }
        }
        issues
    }

    /// Validate, reset and begin a fresh run of `program`.
    ///
    /// Structural errors abort the start. A frontier that cannot start
    /// (no handler, unresolved reference) leaves the engine running but
    /// blocked; see [`Engine::blocker`].
    pub fn start(&mut self, mut program: Program, world: &mut dyn World) -> Result<Uuid, EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }

        let issues = program.validate();
        if !issues.is_empty() {
            for issue in &issues {
                error!(%issue, "Program validation failed");
            }
            return Err(EngineError::Validation(issues));
        }

        self.registry.cleanup_all();
        self.active.clear();
        self.signals.clear();
        self.blocked = None;
        self.plan = EnablementPlan::default();
        program.reset();

        let run_id = Uuid::new_v4();
        info!(
            run_id = %run_id,
            program = %program.name,
            digest = %program.digest(),
            framework = %self.detector.current_framework(),
            "Starting sequence"
        );

        let first = program.first_group();
        self.program = Some(program);
        self.run_id = Some(run_id);

        match first {
            Some(group) => self.enter_group(group),
            None => self.finish_program(),
        }
        self.recompute(world);
        self.advance(world);
        Ok(run_id)
    }

    /// Advance one frame: route world events, poll waits, process
    /// completions in arrival order, then retry a blocked frontier.
    pub fn tick(&mut self, world: &mut dyn World, dt: Duration) {
        if !self.is_running() {
            return;
        }

        let events = world.drain_events();
        {
            let mut ctx = HandlerContext::new(world, dt, &mut self.signals);
            for event in &events {
                for handler in self.registry.iter_mut() {
                    handler.on_world_event(event, &mut ctx);
                }
            }
            for handler in self.registry.iter_mut() {
                handler.poll(&mut ctx);
            }
        }

        while let Some(signal) = self.signals.pop_front() {
            match signal {
                HandlerSignal::Completed { step, reason } => {
                    self.complete_step(step, &reason, world);
                }
                HandlerSignal::WaitTimedOut { step, waited } => {
                    if self.active.contains_key(&step) {
                        self.guidance.publish(&GuidanceEvent::WaitWarning {
                            step,
                            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        });
                    }
                }
            }
        }

        if self.blocked.is_some() {
            self.advance(world);
        }
    }

    /// Stop every handler and drop the run. Safe to call in any state.
    pub fn abort(&mut self, world: &mut dyn World) {
        if !self.is_running() {
            debug!(state = %self.state, "Abort ignored, no sequence running");
            return;
        }

        for (step, index) in std::mem::take(&mut self.active) {
            if let Some(handler) = self.registry.get_mut(index) {
                handler.stop_step(step);
            }
        }
        self.registry.cleanup_all();
        self.signals.clear();
        self.blocked = None;
        if let Some(program) = self.program.as_mut() {
            program.reset();
        }
        self.state = EngineState::Aborted;
        warn!(run_id = ?self.run_id, "Sequence aborted");

        self.recompute(world);
        self.guidance.publish(&GuidanceEvent::SequenceAborted);
    }

    /// Complete an optional step without the user performing it
    pub fn skip_step(&mut self, id: StepId, world: &mut dyn World) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        let program = self.program.as_mut().ok_or(EngineError::NotRunning)?;
        let step = program.step(id).ok_or(ProgramError::UnknownStep(id))?;
        if !step.optional {
            return Err(EngineError::NotOptional(format!(
                "step '{}'",
                program.step_label(id)
            )));
        }

        if step.status() == StepStatus::Active {
            self.retire_step(id, "skipped");
        } else {
            program.mark_skipped(id)?;
            info!(step = %id, "Optional step skipped");
            self.guidance.publish(&GuidanceEvent::StepCompleted {
                step: id,
                reason: "skipped".to_string(),
            });
        }

        if !self.advance(world) {
            self.recompute(world);
        }
        Ok(())
    }

    /// Skip the current task group when it is optional
    pub fn skip_task_group(&mut self, world: &mut dyn World) -> Result<(), EngineError> {
        let EngineState::Running(group_id) = self.state else {
            return Err(EngineError::NotRunning);
        };
        let program = self.program.as_ref().ok_or(EngineError::NotRunning)?;
        let group = program
            .task_group(group_id)
            .ok_or(EngineError::NotRunning)?;
        if !group.optional {
            return Err(EngineError::NotOptional(format!(
                "task group '{}'",
                group.name
            )));
        }
        let steps: Vec<(StepId, StepStatus)> = group
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| (group_id.step(index), step.status()))
            .collect();

        info!(group = %group_id, "Skipping optional task group");
        for (id, status) in steps {
            match status {
                StepStatus::Active => {
                    self.retire_step(id, "skipped");
                }
                StepStatus::NotStarted => {
                    if let Some(program) = self.program.as_mut() {
                        program.mark_skipped(id)?;
                    }
                }
                StepStatus::Completed => {}
            }
        }
        self.blocked = None;
        self.advance(world);
        Ok(())
    }

    fn enter_group(&mut self, group: GroupId) {
        self.state = EngineState::Running(group);
        let name = self
            .program
            .as_ref()
            .and_then(|p| p.task_group(group))
            .map(|g| g.name.clone())
            .unwrap_or_default();
        info!(group = %group, name = %name, "Task group started");
        self.guidance
            .publish(&GuidanceEvent::TaskGroupStarted { group, name });
    }

    fn finish_program(&mut self) {
        self.state = EngineState::Completed;
        self.registry.cleanup_all();
        self.blocked = None;
        let name = self
            .program
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        info!(run_id = ?self.run_id, program = %name, "Program completed");
        self.guidance
            .publish(&GuidanceEvent::ProgramCompleted { name });
    }

    /// Close out a complete group and move the cursor on
    fn finish_group(&mut self, group: GroupId) {
        let leftovers: Vec<StepId> = self
            .active
            .keys()
            .filter(|id| id.group_id() == group)
            .copied()
            .collect();
        for id in leftovers {
            self.retire_step(id, "skipped");
        }
        self.blocked = None;

        let Some(program) = self.program.as_ref() else {
            return;
        };
        let group_name = program
            .task_group(group)
            .map(|g| g.name.clone())
            .unwrap_or_default();
        let module_name = program
            .modules
            .get(group.module)
            .map(|m| m.name.clone())
            .unwrap_or_default();
        let next = program.next_group(group);

        info!(group = %group, name = %group_name, "Task group completed");
        self.guidance.publish(&GuidanceEvent::TaskGroupCompleted {
            group,
            name: group_name,
        });
        let module_done =
            next.is_none_or(|n| n.module != group.module) && program.module_complete(group.module);
        if module_done {
            info!(module = group.module, name = %module_name, "Module completed");
            self.guidance.publish(&GuidanceEvent::ModuleCompleted {
                module: group.module,
                name: module_name,
            });
        }

        match next {
            Some(next) => self.enter_group(next),
            None => self.finish_program(),
        }
    }

    /// Start whatever the current group's frontier allows, crossing into
    /// following groups as they complete. Returns whether the plan was
    /// recomputed.
    fn advance(&mut self, world: &mut dyn World) -> bool {
        let mut changed = false;
        loop {
            let EngineState::Running(group) = self.state else {
                break;
            };
            let Some(program) = self.program.as_ref() else {
                break;
            };
            let complete = program.task_group(group).is_none_or(|g| g.is_complete());
            if !complete {
                let frontier = program.frontier(group);
                changed |= self.start_frontier(&frontier, world);
                break;
            }
            self.finish_group(group);
            changed = true;
        }
        if changed {
            self.recompute(world);
        }
        changed
    }

    /// Start steps in order. A required step that cannot start ends the pass;
    /// an optional one is reported and passed over. The first failure becomes
    /// the blocker, and a clean pass clears any previous one. Returns whether
    /// anything started.
    fn start_frontier(&mut self, frontier: &[StepId], world: &mut dyn World) -> bool {
        let mut started = false;
        let mut failure = None;
        for &id in frontier {
            match self.start_step(id, world) {
                Ok(()) => started = true,
                Err(e) => {
                    let optional = self
                        .program
                        .as_ref()
                        .and_then(|p| p.step(id))
                        .is_some_and(|s| s.optional);
                    failure.get_or_insert(e);
                    if !optional {
                        break;
                    }
                }
            }
        }

        match failure {
            Some(e) => self.report_blocker(e),
            None => {
                if let Some(e) = self.blocked.take() {
                    info!(error = %e, "Blocker cleared, sequence resumed");
                }
            }
        }
        started
    }

    fn report_blocker(&mut self, e: EngineError) {
        if self.blocked.as_ref() != Some(&e) {
            error!(run_id = ?self.run_id, error = %e, "Sequence blocked");
            if let Some(step) = e.step() {
                self.guidance.publish(&GuidanceEvent::SequenceBlocked {
                    step,
                    error: e.to_string(),
                });
            }
        }
        self.blocked = Some(e);
    }

    /// Dispatch, resolve and start one step. On failure the step stays
    /// NotStarted and no subscription is left behind.
    fn start_step(&mut self, id: StepId, world: &mut dyn World) -> Result<(), EngineError> {
        let framework = self.detector.current_framework();
        let program = self.program.as_ref().ok_or(EngineError::NotRunning)?;
        let step = program.step(id).ok_or(ProgramError::UnknownStep(id))?;
        let kind = step.kind();

        let no_handler = EngineError::NoHandler {
            step: id,
            kind,
            framework,
        };
        let index = self.registry.select(kind, framework).ok_or(no_handler.clone())?;

        let mut start = StepStart {
            id,
            step,
            target: None,
            destination: None,
            socket: None,
        };
        {
            let resolver = Resolver::new(&*world);
            for (role, reference) in step.references() {
                let handle = match resolver.resolve(reference) {
                    Ok(handle) => handle,
                    Err(source) if step.requires(role) => {
                        return Err(EngineError::UnresolvedReference {
                            step: id,
                            role,
                            reference: reference.to_string(),
                            source,
                        });
                    }
                    Err(e) => {
                        warn!(step = %id, %role, error = %e, "Optional reference did not resolve");
                        continue;
                    }
                };
                match role {
                    RefRole::Target => start.target = Some(handle),
                    RefRole::Destination => start.destination = Some(handle),
                    RefRole::Socket => start.socket = Some(handle),
                }
            }
        }

        let handler = self.registry.get_mut(index).ok_or(no_handler)?;
        let handler_name = handler.name().to_string();
        let mut ctx = HandlerContext::new(world, Duration::ZERO, &mut self.signals);
        if let Err(source) = handler.start_step(&start, &mut ctx) {
            handler.stop_step(id);
            return Err(EngineError::HandlerFailed {
                step: id,
                handler: handler_name,
                source,
            });
        }

        if let Some(program) = self.program.as_mut() {
            program.mark_active(id)?;
        }
        self.active.insert(id, index);
        info!(step = %id, kind = %kind, handler = %handler_name, "Step started");
        Ok(())
    }

    /// Remove an active step, stop its handler and mark it completed.
    /// Returns false if the step was not active.
    fn retire_step(&mut self, id: StepId, reason: &str) -> bool {
        let Some(index) = self.active.remove(&id) else {
            debug!(step = %id, reason, "Ignoring completion of inactive step");
            return false;
        };
        if let Some(handler) = self.registry.get_mut(index) {
            handler.stop_step(id);
        }
        let Some(program) = self.program.as_mut() else {
            return false;
        };
        if let Err(e) = program.mark_completed(id) {
            error!(step = %id, error = %e, "Could not mark step completed");
            return false;
        }

        info!(step = %id, reason, "Step completed");
        self.guidance.publish(&GuidanceEvent::StepCompleted {
            step: id,
            reason: reason.to_string(),
        });
        true
    }

    fn complete_step(&mut self, id: StepId, reason: &str, world: &mut dyn World) {
        // Recompute once after advancing so a prepared socket is not
        // disabled between the two steps
        if self.retire_step(id, reason) && !self.advance(world) {
            self.recompute(world);
        }
    }

    /// Rebuild the enablement plan from scratch and push it to the world
    fn recompute(&mut self, world: &mut dyn World) {
        let Some(program) = self.program.as_ref() else {
            return;
        };
        let current = match self.state {
            EngineState::Running(group) => Some(group),
            _ => None,
        };

        let plan = EnablementPlan::compute(program, current, &*world);
        plan.apply(world);
        for (step, state) in plan.changes_from(&self.plan) {
            self.guidance
                .publish(&GuidanceEvent::StepStateChanged { step, state });
        }
        self.plan = plan;
    }
}
