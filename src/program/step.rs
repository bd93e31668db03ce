//! Step definitions: the closed set of step actions and their parameters

use serde::{Deserialize, Serialize};

use crate::world::reference::ObjectRef;
use crate::world::{FastenerConfig, KnobAxis, KnobConfig};

/// Largest angle accepted for fastener thresholds (ten full turns)
pub const MAX_FASTENER_ANGLE: f32 = 3600.0;

/// Tolerances must stay below half a turn to be meaningful
pub const MAX_TOLERANCE: f32 = 180.0;

/// Execution status of a step within a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    NotStarted,
    Active,
    Completed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StepStatus::NotStarted => "not_started",
            StepStatus::Active => "active",
            StepStatus::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// Fieldless discriminant of [`StepAction`], used for handler capability matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Grab,
    GrabAndSnap,
    TurnKnob,
    TightenFastener,
    LoosenFastener,
    InstallFastener,
    RemoveFastener,
    WaitForCondition,
    WaitForScriptCondition,
    ShowInstruction,
    Teleport,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Grab => "grab",
            StepKind::GrabAndSnap => "grab_and_snap",
            StepKind::TurnKnob => "turn_knob",
            StepKind::TightenFastener => "tighten_fastener",
            StepKind::LoosenFastener => "loosen_fastener",
            StepKind::InstallFastener => "install_fastener",
            StepKind::RemoveFastener => "remove_fastener",
            StepKind::WaitForCondition => "wait_for_condition",
            StepKind::WaitForScriptCondition => "wait_for_script_condition",
            StepKind::ShowInstruction => "show_instruction",
            StepKind::Teleport => "teleport",
        }
    }

    /// Snap/install-style operations place the target into a destination.
    /// Their destination is pre-armed by lookahead.
    pub fn is_snap_style(&self) -> bool {
        matches!(self, StepKind::GrabAndSnap | StepKind::InstallFastener)
    }

    pub fn all() -> &'static [StepKind] {
        &[
            StepKind::Grab,
            StepKind::GrabAndSnap,
            StepKind::TurnKnob,
            StepKind::TightenFastener,
            StepKind::LoosenFastener,
            StepKind::InstallFastener,
            StepKind::RemoveFastener,
            StepKind::WaitForCondition,
            StepKind::WaitForScriptCondition,
            StepKind::ShowInstruction,
            StepKind::Teleport,
        ]
    }
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which threshold a fastener step is allowed to override
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FastenerDirection {
    Tighten,
    Loosen,
}

/// Per-step fastener overrides. Unset fields keep the object's configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FastenerParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tighten_angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loosen_angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle_tolerance: Option<f32>,
}

impl FastenerParams {
    /// Derive the effective configuration for a step moving in `direction`.
    ///
    /// Starts from `current` and substitutes only the threshold belonging to
    /// `direction` (plus the shared tolerance). Returns `None` when nothing
    /// would change, so the object is not reconfigured needlessly.
    pub fn effective_config(
        &self,
        direction: FastenerDirection,
        current: &FastenerConfig,
    ) -> Option<FastenerConfig> {
        let mut next = *current;
        match direction {
            FastenerDirection::Tighten => {
                if let Some(angle) = self.tighten_angle {
                    next.tighten_angle = angle;
                }
            }
            FastenerDirection::Loosen => {
                if let Some(angle) = self.loosen_angle {
                    next.loosen_angle = angle;
                }
            }
        }
        if let Some(tolerance) = self.angle_tolerance {
            next.angle_tolerance = tolerance;
        }

        if next.differs_from(current) {
            Some(next)
        } else {
            None
        }
    }

    fn issues(&self, out: &mut Vec<String>) {
        for (label, value) in [
            ("tighten_angle", self.tighten_angle),
            ("loosen_angle", self.loosen_angle),
        ] {
            if let Some(angle) = value {
                if !(angle > 0.0 && angle <= MAX_FASTENER_ANGLE) {
                    out.push(format!(
                        "{label} {angle} out of range (0, {MAX_FASTENER_ANGLE}]"
                    ));
                }
            }
        }
        if let Some(tolerance) = self.angle_tolerance {
            if !(0.0..MAX_TOLERANCE).contains(&tolerance) {
                out.push(format!(
                    "angle_tolerance {tolerance} out of range [0, {MAX_TOLERANCE})"
                ));
            }
        }
    }
}

/// Per-step knob overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnobParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub axis: Option<KnobAxis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_angle: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f32>,
}

impl KnobParams {
    /// Same contract as [`FastenerParams::effective_config`]
    pub fn effective_config(&self, current: &KnobConfig) -> Option<KnobConfig> {
        let mut next = *current;
        if let Some(axis) = self.axis {
            next.axis = axis;
        }
        if let Some(angle) = self.target_angle {
            next.target_angle = angle;
        }
        if let Some(tolerance) = self.tolerance {
            next.tolerance = tolerance;
        }

        if next.differs_from(current) {
            Some(next)
        } else {
            None
        }
    }

    fn issues(&self, out: &mut Vec<String>) {
        if let Some(angle) = self.target_angle {
            if !(-360.0..=360.0).contains(&angle) {
                out.push(format!("target_angle {angle} out of range [-360, 360]"));
            }
        }
        if let Some(tolerance) = self.tolerance {
            if !(0.0..MAX_TOLERANCE).contains(&tolerance) {
                out.push(format!(
                    "tolerance {tolerance} out of range [0, {MAX_TOLERANCE})"
                ));
            }
        }
    }
}

/// What the user has to do to complete a step, with its embedded parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// Pick up the target
    Grab,
    /// Pick up the target and place it into the destination socket
    GrabAndSnap,
    TurnKnob(KnobParams),
    TightenFastener(FastenerParams),
    LoosenFastener(FastenerParams),
    /// Insert the target fastener into the destination
    InstallFastener(FastenerParams),
    /// Pull a loosened fastener out of its socket
    RemoveFastener(FastenerParams),
    /// Completes once the named world condition holds
    WaitForCondition { condition: String },
    /// Completes when a script raises the named signal
    WaitForScriptCondition { signal: String },
    ShowInstruction {
        text: String,
        /// Auto-complete after this many seconds; otherwise wait for acknowledgement
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_secs: Option<f32>,
    },
    /// Move the user to the destination anchor
    Teleport,
}

impl StepAction {
    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Grab => StepKind::Grab,
            StepAction::GrabAndSnap => StepKind::GrabAndSnap,
            StepAction::TurnKnob(_) => StepKind::TurnKnob,
            StepAction::TightenFastener(_) => StepKind::TightenFastener,
            StepAction::LoosenFastener(_) => StepKind::LoosenFastener,
            StepAction::InstallFastener(_) => StepKind::InstallFastener,
            StepAction::RemoveFastener(_) => StepKind::RemoveFastener,
            StepAction::WaitForCondition { .. } => StepKind::WaitForCondition,
            StepAction::WaitForScriptCondition { .. } => StepKind::WaitForScriptCondition,
            StepAction::ShowInstruction { .. } => StepKind::ShowInstruction,
            StepAction::Teleport => StepKind::Teleport,
        }
    }

    /// Fastener parameters and the direction they apply to, if this is a fastener step
    pub fn fastener(&self) -> Option<(&FastenerParams, FastenerDirection)> {
        match self {
            StepAction::TightenFastener(p) | StepAction::InstallFastener(p) => {
                Some((p, FastenerDirection::Tighten))
            }
            StepAction::LoosenFastener(p) | StepAction::RemoveFastener(p) => {
                Some((p, FastenerDirection::Loosen))
            }
            _ => None,
        }
    }

    fn requires_target(&self) -> bool {
        matches!(
            self.kind(),
            StepKind::Grab
                | StepKind::GrabAndSnap
                | StepKind::TurnKnob
                | StepKind::TightenFastener
                | StepKind::LoosenFastener
                | StepKind::InstallFastener
                | StepKind::RemoveFastener
        )
    }

    fn requires_destination(&self) -> bool {
        matches!(
            self.kind(),
            StepKind::GrabAndSnap | StepKind::InstallFastener | StepKind::Teleport
        )
    }
}

/// The role an object reference plays in a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefRole {
    Target,
    Destination,
    Socket,
}

impl std::fmt::Display for RefRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            RefRole::Target => "target",
            RefRole::Destination => "destination",
            RefRole::Socket => "socket",
        })
    }
}

/// Atomic unit of procedure progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    pub action: StepAction,
    /// Skippable without blocking task group completion
    #[serde(default)]
    pub optional: bool,
    /// The next step may start before this one completes
    #[serde(default)]
    pub allow_parallel: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<ObjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<ObjectRef>,

    #[serde(skip)]
    pub(crate) status: StepStatus,
}

impl Step {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            optional: false,
            allow_parallel: false,
            target: None,
            destination: None,
            socket: None,
            status: StepStatus::NotStarted,
        }
    }

    pub fn with_target(mut self, path: &str) -> Self {
        self.target = Some(ObjectRef::new(path));
        self
    }

    pub fn with_destination(mut self, path: &str) -> Self {
        self.destination = Some(ObjectRef::new(path));
        self
    }

    pub fn with_socket(mut self, path: &str) -> Self {
        self.socket = Some(ObjectRef::new(path));
        self
    }

    pub fn parallel(mut self) -> Self {
        self.allow_parallel = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    /// All references this step names, with their role
    pub fn references(&self) -> impl Iterator<Item = (RefRole, &ObjectRef)> {
        [
            (RefRole::Target, self.target.as_ref()),
            (RefRole::Destination, self.destination.as_ref()),
            (RefRole::Socket, self.socket.as_ref()),
        ]
        .into_iter()
        .filter_map(|(role, reference)| reference.map(|r| (role, r)))
    }

    /// Whether the step cannot start without `role` resolving
    pub fn requires(&self, role: RefRole) -> bool {
        match role {
            RefRole::Target => self.action.requires_target(),
            RefRole::Destination => self.action.requires_destination(),
            RefRole::Socket => false,
        }
    }

    /// Structural problems with this step, empty when valid
    pub fn issues(&self) -> Vec<String> {
        let mut out = Vec::new();

        if self.name.trim().is_empty() {
            out.push("step name is empty".to_string());
        }
        for role in [RefRole::Target, RefRole::Destination] {
            let present = match role {
                RefRole::Target => self.target.as_ref(),
                _ => self.destination.as_ref(),
            }
            .is_some_and(|r| !r.is_empty());
            if self.requires(role) && !present {
                out.push(format!("{} requires a {role} reference", self.kind()));
            }
        }

        match &self.action {
            StepAction::TurnKnob(params) => params.issues(&mut out),
            StepAction::TightenFastener(params)
            | StepAction::LoosenFastener(params)
            | StepAction::InstallFastener(params)
            | StepAction::RemoveFastener(params) => params.issues(&mut out),
            StepAction::WaitForCondition { condition } if condition.trim().is_empty() => {
                out.push("condition name is empty".to_string());
            }
            StepAction::WaitForScriptCondition { signal } if signal.trim().is_empty() => {
                out.push("script signal name is empty".to_string());
            }
            StepAction::ShowInstruction {
                text,
                duration_secs,
            } => {
                if text.trim().is_empty() {
                    out.push("instruction text is empty".to_string());
                }
                if let Some(secs) = duration_secs {
                    if *secs <= 0.0 || !secs.is_finite() {
                        out.push(format!("duration_secs {secs} must be positive"));
                    }
                }
            }
            _ => {}
        }

        out
    }

    pub fn is_valid(&self) -> bool {
        self.issues().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fastener_config() -> FastenerConfig {
        FastenerConfig {
            tighten_angle: 90.0,
            loosen_angle: 45.0,
            angle_tolerance: 5.0,
        }
    }

    #[test]
    fn test_parse_step_json() {
        let json = r#"{
            "name": "tighten bolt",
            "action": { "kind": "tighten_fastener", "tighten_angle": 120.0 },
            "target": "Rig/Panel/Bolt1",
            "allow_parallel": true
        }"#;

        let step: Step = serde_json::from_str(json).unwrap();
        assert_eq!(step.kind(), StepKind::TightenFastener);
        assert!(step.allow_parallel);
        assert!(!step.optional);
        assert_eq!(step.target.as_ref().unwrap().path(), "Rig/Panel/Bolt1");
        assert_eq!(step.status(), StepStatus::NotStarted);
        assert!(step.is_valid());
    }

    #[test]
    fn test_unit_action_parses() {
        let step: Step =
            serde_json::from_str(r#"{"name": "grab", "action": {"kind": "grab"}, "target": "A"}"#)
                .unwrap();
        assert_eq!(step.action, StepAction::Grab);
    }

    #[test]
    fn test_missing_required_reference() {
        let step = Step::new("snap", StepAction::GrabAndSnap).with_target("A");
        let issues = step.issues();
        assert_eq!(issues.len(), 1);
        assert!(issues[0].contains("destination"));
    }

    #[test]
    fn test_out_of_range_parameters() {
        let step = Step::new(
            "tighten",
            StepAction::TightenFastener(FastenerParams {
                tighten_angle: Some(-10.0),
                loosen_angle: None,
                angle_tolerance: Some(200.0),
            }),
        )
        .with_target("Bolt");
        let issues = step.issues();
        assert_eq!(issues.len(), 2);
        assert!(issues[0].contains("tighten_angle"));
        assert!(issues[1].contains("angle_tolerance"));
    }

    #[test]
    fn test_instruction_needs_text() {
        let step = Step::new(
            "read",
            StepAction::ShowInstruction {
                text: "  ".to_string(),
                duration_secs: Some(0.0),
            },
        );
        assert_eq!(step.issues().len(), 2);
    }

    #[test]
    fn test_tighten_override_leaves_loosen_threshold() {
        let params = FastenerParams {
            tighten_angle: Some(180.0),
            loosen_angle: Some(10.0),
            angle_tolerance: None,
        };
        let next = params
            .effective_config(FastenerDirection::Tighten, &fastener_config())
            .unwrap();
        assert!((next.tighten_angle - 180.0).abs() < f32::EPSILON);
        assert!((next.loosen_angle - 45.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_loosen_override_leaves_tighten_threshold() {
        let params = FastenerParams {
            tighten_angle: Some(999.0),
            loosen_angle: Some(30.0),
            angle_tolerance: None,
        };
        let next = params
            .effective_config(FastenerDirection::Loosen, &fastener_config())
            .unwrap();
        assert!((next.tighten_angle - 90.0).abs() < f32::EPSILON);
        assert!((next.loosen_angle - 30.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_no_override_when_params_match_defaults() {
        let params = FastenerParams {
            tighten_angle: Some(90.0),
            loosen_angle: None,
            angle_tolerance: Some(5.0),
        };
        assert!(params
            .effective_config(FastenerDirection::Tighten, &fastener_config())
            .is_none());
        assert!(FastenerParams::default()
            .effective_config(FastenerDirection::Loosen, &fastener_config())
            .is_none());
    }

    #[test]
    fn test_snap_style_kinds() {
        let snap: Vec<_> = StepKind::all()
            .iter()
            .filter(|k| k.is_snap_style())
            .collect();
        assert_eq!(snap, vec![&StepKind::GrabAndSnap, &StepKind::InstallFastener]);
    }
}
