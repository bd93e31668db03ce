//! Which objects may be interacted with right now.
//!
//! The plan is a pure function of the program statuses, the current task
//! group and the world (reference resolution and socket occupancy). It is
//! rebuilt from scratch on every controller transition and applied in full;
//! applying the same plan twice issues the same calls.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, trace};

use crate::program::{GroupId, Program, RefRole, StepId, StepStatus};
use crate::world::{ObjectHandle, Resolver, World};

/// Derived per-step interaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Enablement {
    /// Not reachable yet; all references disabled
    Locked,
    /// Next snap-style step after an active one; only its destination is armed
    Prepared,
    /// In the active set; all references enabled
    Active,
    /// Done and nothing later needs its objects
    Completed,
    /// Done, but a later step in the group still references one of its objects
    Retained,
}

impl std::fmt::Display for Enablement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Enablement::Locked => "locked",
            Enablement::Prepared => "prepared",
            Enablement::Active => "active",
            Enablement::Completed => "completed",
            Enablement::Retained => "retained",
        })
    }
}

type Handles = Vec<(RefRole, ObjectHandle)>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnablementPlan {
    steps: BTreeMap<StepId, Enablement>,
    objects: BTreeMap<ObjectHandle, bool>,
}

impl EnablementPlan {
    /// Build the plan for `program` with `current` as the focused task group.
    ///
    /// `current == None` means no run is in progress: completed steps report
    /// `Completed`, everything else `Locked`.
    pub fn compute(program: &Program, current: Option<GroupId>, world: &dyn World) -> Self {
        let resolver = Resolver::new(world);
        let handles: BTreeMap<StepId, Handles> = program
            .step_ids()
            .into_iter()
            .filter_map(|id| {
                let step = program.step(id)?;
                let resolved = step
                    .references()
                    .filter_map(|(role, reference)| {
                        resolver.resolve(reference).ok().map(|h| (role, h))
                    })
                    .collect();
                Some((id, resolved))
            })
            .collect();

        let prepared = current.map_or_else(BTreeSet::new, |g| lookahead(program, g));

        let mut plan = Self::default();
        for (id, step_handles) in &handles {
            let Some(step) = program.step(*id) else {
                continue;
            };
            let in_current = current == Some(id.group_id());

            let state = match step.status {
                StepStatus::Active => Enablement::Active,
                StepStatus::Completed => {
                    if in_current && !retained(program, &handles, *id).is_empty() {
                        Enablement::Retained
                    } else {
                        Enablement::Completed
                    }
                }
                StepStatus::NotStarted if prepared.contains(id) => Enablement::Prepared,
                StepStatus::NotStarted => Enablement::Locked,
            };
            plan.steps.insert(*id, state);

            let shared = if state == Enablement::Retained {
                retained(program, &handles, *id)
            } else {
                BTreeSet::new()
            };
            for (role, handle) in step_handles {
                let enable = match state {
                    Enablement::Active => true,
                    Enablement::Prepared => *role == RefRole::Destination,
                    Enablement::Retained => shared.contains(handle),
                    Enablement::Locked | Enablement::Completed => false,
                };
                *plan.objects.entry(*handle).or_insert(false) |= enable;
            }
        }

        for (handle, enabled) in &mut plan.objects {
            if !*enabled && world.is_occupied(*handle) {
                trace!(object = %handle, "Keeping occupied object enabled");
                *enabled = true;
            }
        }

        plan
    }

    /// Push every object flag to the world
    pub fn apply(&self, world: &mut dyn World) {
        for (handle, enabled) in &self.objects {
            // Occupancy may have changed since the plan was computed
            if !*enabled && world.is_occupied(*handle) {
                debug!(object = %handle, "Skipping disable of occupied object");
                continue;
            }
            world.set_interaction_enabled(*handle, *enabled);
        }
    }

    pub fn state(&self, step: StepId) -> Option<Enablement> {
        self.steps.get(&step).copied()
    }

    /// Whether the plan enables `object`; `None` if no step references it
    pub fn is_enabled(&self, object: ObjectHandle) -> Option<bool> {
        self.objects.get(&object).copied()
    }

    pub fn steps(&self) -> impl Iterator<Item = (StepId, Enablement)> + '_ {
        self.steps.iter().map(|(id, state)| (*id, *state))
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectHandle, bool)> + '_ {
        self.objects.iter().map(|(h, enabled)| (*h, *enabled))
    }

    /// Steps whose state differs from `previous`, in step order
    pub fn changes_from(&self, previous: &EnablementPlan) -> Vec<(StepId, Enablement)> {
        self.steps
            .iter()
            .filter(|(id, state)| previous.steps.get(id) != Some(state))
            .map(|(id, state)| (*id, *state))
            .collect()
    }
}

/// NotStarted snap-style steps that completing an active step would start.
///
/// From each active step walk forward; the walk continues past a step only
/// while that step allows parallel chaining.
fn lookahead(program: &Program, group: GroupId) -> BTreeSet<StepId> {
    let Some(task_group) = program.task_group(group) else {
        return BTreeSet::new();
    };

    let mut out = BTreeSet::new();
    for (index, step) in task_group.steps.iter().enumerate() {
        if step.status != StepStatus::Active {
            continue;
        }
        for next in program.steps_after(group.step(index)) {
            let Some(candidate) = program.step(next) else {
                break;
            };
            if candidate.status == StepStatus::NotStarted && candidate.kind().is_snap_style() {
                out.insert(next);
            }
            if !candidate.allow_parallel {
                break;
            }
        }
    }
    out
}

/// Handles of completed step `id` that a later, not yet completed step in
/// the same task group also references
fn retained(
    program: &Program,
    handles: &BTreeMap<StepId, Handles>,
    id: StepId,
) -> BTreeSet<ObjectHandle> {
    let Some(own) = handles.get(&id) else {
        return BTreeSet::new();
    };
    let later: BTreeSet<ObjectHandle> = program
        .steps_after(id)
        .filter(|next| {
            program
                .step(*next)
                .is_some_and(|s| s.status != StepStatus::Completed)
        })
        .filter_map(|next| handles.get(&next))
        .flat_map(|h| h.iter().map(|(_, handle)| *handle))
        .collect();

    own.iter()
        .map(|(_, handle)| *handle)
        .filter(|handle| later.contains(handle))
        .collect()
}
