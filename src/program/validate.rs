//! Structural validation of a program
//!
//! Validation never fails fast: every problem is collected and returned so
//! the caller (CLI, controller) decides whether to proceed.

use std::collections::HashSet;

use serde::Serialize;

use super::{Program, StepId};
use crate::world::reference::Resolver;
use crate::world::World;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Blocks execution until the definition is fixed
    Error,
    /// Advisory, e.g. a reference that does not resolve in the current scene
    Warning,
}

/// A single problem found in a program definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    /// Step the issue belongs to, if any
    pub step: Option<StepId>,
    /// Human readable location ("module / group / step")
    pub location: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = match self.severity {
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
        };
        write!(f, "{level}: {}: {}", self.location, self.message)
    }
}

impl Program {
    /// Walk the whole tree and collect structural errors.
    ///
    /// Empty iff every step is valid and no task group contains two steps
    /// with the same name.
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        for gid in self.group_ids() {
            let Some(group) = self.task_group(gid) else {
                continue;
            };
            let mut seen: HashSet<&str> = HashSet::new();

            for (index, step) in group.steps.iter().enumerate() {
                let id = gid.step(index);

                for message in step.issues() {
                    issues.push(ValidationIssue {
                        severity: IssueSeverity::Error,
                        step: Some(id),
                        location: self.step_label(id),
                        message,
                    });
                }

                if !seen.insert(step.name.as_str()) {
                    issues.push(ValidationIssue {
                        severity: IssueSeverity::Error,
                        step: Some(id),
                        location: self.step_label(id),
                        message: format!(
                            "duplicate step name '{}' in task group '{}'",
                            step.name, group.name
                        ),
                    });
                }
            }
        }

        issues
    }
}

/// Check every reference against the current world.
///
/// Unresolvable references are warnings here; they only become fatal when
/// the step that needs them tries to start.
pub fn check_references(program: &Program, world: &dyn World) -> Vec<ValidationIssue> {
    let resolver = Resolver::new(world);
    let mut issues = Vec::new();

    for id in program.step_ids() {
        let Some(step) = program.step(id) else {
            continue;
        };
        for (role, reference) in step.references() {
            if let Err(e) = resolver.resolve(reference) {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Warning,
                    step: Some(id),
                    location: program.step_label(id),
                    message: format!("{role} reference: {e}"),
                });
            }
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Module, Step, StepAction, TaskGroup};
    use crate::world::sim::SimulatedWorld;

    fn program(steps: Vec<Step>) -> Program {
        Program::new(
            "p",
            vec![Module::new("m", vec![TaskGroup::new("g", steps)])],
        )
    }

    #[test]
    fn test_valid_program_has_no_issues() {
        let p = program(vec![
            Step::new("grab", StepAction::Grab).with_target("A"),
            Step::new("place", StepAction::GrabAndSnap)
                .with_target("A")
                .with_destination("Socket1"),
        ]);
        assert!(p.validate().is_empty());
    }

    #[test]
    fn test_duplicate_names_reported() {
        let p = program(vec![
            Step::new("grab", StepAction::Grab).with_target("A"),
            Step::new("grab", StepAction::Grab).with_target("B"),
        ]);
        let issues = p.validate();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("duplicate step name"));
        assert_eq!(issues[0].location, "m / g / grab");
    }

    #[test]
    fn test_same_name_in_different_groups_is_fine() {
        let p = Program::new(
            "p",
            vec![Module::new(
                "m",
                vec![
                    TaskGroup::new("g1", vec![Step::new("grab", StepAction::Grab).with_target("A")]),
                    TaskGroup::new("g2", vec![Step::new("grab", StepAction::Grab).with_target("A")]),
                ],
            )],
        );
        assert!(p.validate().is_empty());
    }

    #[test]
    fn test_invalid_steps_collected() {
        let p = program(vec![
            Step::new("grab", StepAction::Grab),
            Step::new("teleport", StepAction::Teleport),
        ]);
        let issues = p.validate();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == IssueSeverity::Error));
    }

    #[test]
    fn test_check_references_warns() {
        let mut world = SimulatedWorld::new();
        world.add_object("Rig/A");
        let p = program(vec![
            Step::new("grab", StepAction::Grab).with_target("Rig/A"),
            Step::new("place", StepAction::GrabAndSnap)
                .with_target("Rig/A")
                .with_destination("Rig/Missing"),
        ]);

        let issues = check_references(&p, &world);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, IssueSeverity::Warning);
        assert!(issues[0].message.contains("destination"));
    }
}
