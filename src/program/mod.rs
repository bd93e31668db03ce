//! Step hierarchy: Program → Module → TaskGroup → Step
//!
//! Definitions are authored once and read-mostly during a run. The only
//! mutation points are the step status transitions, which are monotonic
//! (NotStarted → Active → Completed) until [`Program::reset`].

pub mod loader;
pub mod step;
pub mod validate;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use step::{
    FastenerDirection, FastenerParams, KnobParams, RefRole, Step, StepAction, StepKind, StepStatus,
};
pub use validate::{check_references, IssueSeverity, ValidationIssue};

/// Errors raised by status transitions on the hierarchy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("step {0} does not exist")]
    UnknownStep(StepId),

    #[error("step {step} cannot move from {from} to {to}")]
    InvalidTransition {
        step: StepId,
        from: StepStatus,
        to: StepStatus,
    },
}

/// Position of a task group within a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId {
    pub module: usize,
    pub group: usize,
}

impl GroupId {
    pub fn step(&self, step: usize) -> StepId {
        StepId {
            module: self.module,
            group: self.group,
            step,
        }
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.module, self.group)
    }
}

/// Position of a step within a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepId {
    pub module: usize,
    pub group: usize,
    pub step: usize,
}

impl StepId {
    pub fn group_id(&self) -> GroupId {
        GroupId {
            module: self.module,
            group: self.group,
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.module, self.group, self.step)
    }
}

/// Ordered collection of steps; the unit the controller focuses on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub name: String,
    /// Can be skipped as a whole without blocking module completion
    #[serde(default)]
    pub optional: bool,
    pub steps: Vec<Step>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            optional: false,
            steps,
        }
    }

    /// All non-optional steps are completed
    pub fn is_complete(&self) -> bool {
        self.steps
            .iter()
            .all(|s| s.optional || s.status == StepStatus::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub task_groups: Vec<TaskGroup>,
}

impl Module {
    pub fn new(name: impl Into<String>, task_groups: Vec<TaskGroup>) -> Self {
        Self {
            name: name.into(),
            task_groups,
        }
    }
}

/// Completion counters for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub active: usize,
    pub total: usize,
    pub required_completed: usize,
    pub required_total: usize,
}

/// An authored procedure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub modules: Vec<Module>,
}

impl Program {
    pub fn new(name: impl Into<String>, modules: Vec<Module>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            modules,
        }
    }

    pub fn task_group(&self, id: GroupId) -> Option<&TaskGroup> {
        self.modules.get(id.module)?.task_groups.get(id.group)
    }

    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.task_group(id.group_id())?.steps.get(id.step)
    }

    fn step_mut(&mut self, id: StepId) -> Option<&mut Step> {
        self.modules
            .get_mut(id.module)?
            .task_groups
            .get_mut(id.group)?
            .steps
            .get_mut(id.step)
    }

    /// Display label "module / group / step" for logs and notifications
    pub fn step_label(&self, id: StepId) -> String {
        match (
            self.modules.get(id.module),
            self.task_group(id.group_id()),
            self.step(id),
        ) {
            (Some(m), Some(g), Some(s)) => format!("{} / {} / {}", m.name, g.name, s.name),
            _ => id.to_string(),
        }
    }

    /// Task groups in execution order
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.modules
            .iter()
            .enumerate()
            .flat_map(|(m, module)| {
                (0..module.task_groups.len()).map(move |g| GroupId {
                    module: m,
                    group: g,
                })
            })
            .collect()
    }

    /// Steps in execution order
    pub fn step_ids(&self) -> Vec<StepId> {
        self.group_ids()
            .into_iter()
            .flat_map(|gid| {
                let len = self.task_group(gid).map_or(0, |g| g.steps.len());
                (0..len).map(move |s| gid.step(s))
            })
            .collect()
    }

    pub fn first_group(&self) -> Option<GroupId> {
        self.group_ids().into_iter().next()
    }

    /// The task group after `id`, crossing module boundaries
    pub fn next_group(&self, id: GroupId) -> Option<GroupId> {
        self.group_ids().into_iter().find(|g| *g > id)
    }

    /// The step following `id` in the same task group
    pub fn next_step(&self, id: StepId) -> Option<StepId> {
        let next = StepId {
            step: id.step + 1,
            ..id
        };
        self.step(next).map(|_| next)
    }

    /// All steps following `id` in the same task group, in order
    pub fn steps_after(&self, id: StepId) -> impl Iterator<Item = StepId> + '_ {
        let len = self.task_group(id.group_id()).map_or(0, |g| g.steps.len());
        ((id.step + 1)..len).map(move |s| id.group_id().step(s))
    }

    pub fn parent_task_group(&self, id: StepId) -> Option<&TaskGroup> {
        self.step(id)?;
        self.task_group(id.group_id())
    }

    /// Whether every non-optional task group of `module` is complete
    pub fn module_complete(&self, module: usize) -> bool {
        self.modules.get(module).is_some_and(|m| {
            m.task_groups
                .iter()
                .all(|g| g.optional || g.is_complete())
        })
    }

    /// NotStarted → Active
    pub fn mark_active(&mut self, id: StepId) -> Result<(), ProgramError> {
        self.transition(id, StepStatus::NotStarted, StepStatus::Active)
    }

    /// Active → Completed
    pub fn mark_completed(&mut self, id: StepId) -> Result<(), ProgramError> {
        self.transition(id, StepStatus::Active, StepStatus::Completed)
    }

    /// NotStarted → Completed, used only when an optional step is skipped
    /// before it ever started
    pub(crate) fn mark_skipped(&mut self, id: StepId) -> Result<(), ProgramError> {
        self.transition(id, StepStatus::NotStarted, StepStatus::Completed)
    }

    fn transition(
        &mut self,
        id: StepId,
        from: StepStatus,
        to: StepStatus,
    ) -> Result<(), ProgramError> {
        let step = self.step_mut(id).ok_or(ProgramError::UnknownStep(id))?;
        if step.status != from {
            return Err(ProgramError::InvalidTransition {
                step: id,
                from: step.status,
                to,
            });
        }
        step.status = to;
        Ok(())
    }

    /// Clear every status back to NotStarted for a fresh run
    pub fn reset(&mut self) {
        for module in &mut self.modules {
            for group in &mut module.task_groups {
                for step in &mut group.steps {
                    step.status = StepStatus::NotStarted;
                }
            }
        }
    }

    /// Steps of `group` that should be started now under the parallel-chain rule.
    ///
    /// Walks the group in order. Completed steps are passed over; NotStarted
    /// steps are collected. The walk stops after the first step (Active or
    /// newly collected) that does not allow parallel chaining. Optional steps
    /// end the chain like any other; they only stop gating group completion.
    pub fn frontier(&self, group: GroupId) -> Vec<StepId> {
        let Some(task_group) = self.task_group(group) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (index, step) in task_group.steps.iter().enumerate() {
            match step.status {
                StepStatus::Completed => continue,
                StepStatus::NotStarted => out.push(group.step(index)),
                StepStatus::Active => {}
            }
            if !step.allow_parallel {
                break;
            }
        }
        out
    }

    pub fn progress(&self) -> Progress {
        let mut progress = Progress::default();
        for module in &self.modules {
            for group in &module.task_groups {
                for step in &group.steps {
                    let required = !(step.optional || group.optional);
                    progress.total += 1;
                    if required {
                        progress.required_total += 1;
                    }
                    match step.status {
                        StepStatus::Completed => {
                            progress.completed += 1;
                            if required {
                                progress.required_completed += 1;
                            }
                        }
                        StepStatus::Active => progress.active += 1,
                        StepStatus::NotStarted => {}
                    }
                }
            }
        }
        progress
    }

    /// Serialize the definition (statuses excluded) as pretty JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// SHA-256 of the canonical JSON definition, hex encoded
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        let hash = Sha256::digest(&canonical);
        hash.iter().map(|b| format!("{b:02x}")).collect()
    }
}
