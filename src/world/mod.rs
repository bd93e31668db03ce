//! Abstract world the engine drives.
//!
//! The engine never owns scene objects. It talks to the world through the
//! [`World`] trait using [`ObjectHandle`]s obtained by resolving
//! [`reference::ObjectRef`]s, and receives physical progress as
//! [`WorldEvent`]s drained once per tick.

pub mod framework;
pub mod reference;
pub mod sim;

use serde::{Deserialize, Serialize};

pub use framework::{FixedFramework, FrameworkDetector, InteractionFramework};
pub use reference::{ObjectRef, ResolveError, Resolver};

/// Opaque identity of a live scene object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectHandle(pub u64);

impl std::fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn differs(a: f32, b: f32) -> bool {
    (a - b).abs() > f32::EPSILON
}

/// Rotation axis of a knob
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KnobAxis {
    X,
    #[default]
    Y,
    Z,
}

/// Thresholds currently configured on a fastener object
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FastenerConfig {
    /// Degrees of rotation that count as tightened
    pub tighten_angle: f32,
    /// Degrees of rotation that count as loosened
    pub loosen_angle: f32,
    pub angle_tolerance: f32,
}

impl FastenerConfig {
    pub fn differs_from(&self, other: &FastenerConfig) -> bool {
        differs(self.tighten_angle, other.tighten_angle)
            || differs(self.loosen_angle, other.loosen_angle)
            || differs(self.angle_tolerance, other.angle_tolerance)
    }
}

impl Default for FastenerConfig {
    fn default() -> Self {
        Self {
            tighten_angle: 90.0,
            loosen_angle: 90.0,
            angle_tolerance: 5.0,
        }
    }
}

/// Physical sub-state of a fastener
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastenerState {
    /// Seated in its socket and constrained to rotate
    pub locked: bool,
    pub tight: bool,
}

/// Target configuration of a knob
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KnobConfig {
    pub axis: KnobAxis,
    pub target_angle: f32,
    pub tolerance: f32,
}

impl KnobConfig {
    pub fn differs_from(&self, other: &KnobConfig) -> bool {
        self.axis != other.axis
            || differs(self.target_angle, other.target_angle)
            || differs(self.tolerance, other.tolerance)
    }

    pub fn accepts(&self, angle: f32) -> bool {
        (angle - self.target_angle).abs() <= self.tolerance
    }
}

impl Default for KnobConfig {
    fn default() -> Self {
        Self {
            axis: KnobAxis::Y,
            target_angle: 90.0,
            tolerance: 5.0,
        }
    }
}

/// Physical progress reported by the world
#[derive(Debug, Clone, PartialEq)]
pub enum WorldEvent {
    Grabbed { object: ObjectHandle },
    Released { object: ObjectHandle },
    Snapped { socket: ObjectHandle, object: ObjectHandle },
    Unsnapped { socket: ObjectHandle, object: ObjectHandle },
    FastenerTightened { object: ObjectHandle },
    FastenerLoosened { object: ObjectHandle },
    KnobTurned { object: ObjectHandle, angle: f32 },
    ScriptSignal { name: String },
    InstructionAcknowledged,
    Teleported { anchor: ObjectHandle },
}

/// Adapter between the engine and whatever realizes the physical world
pub trait World {
    /// Exact identity/path lookup
    fn find_by_path(&self, path: &str) -> Option<ObjectHandle>;

    /// Name search across the scene, in a stable order
    fn find_by_name(&self, name: &str) -> Vec<ObjectHandle>;

    /// Every live object with its full path, in a stable order
    fn object_paths(&self) -> Vec<(ObjectHandle, String)>;

    fn set_interaction_enabled(&mut self, object: ObjectHandle, enabled: bool);

    /// Something is currently attached to this socket
    fn is_occupied(&self, socket: ObjectHandle) -> bool {
        self.occupant(socket).is_some()
    }

    fn occupant(&self, socket: ObjectHandle) -> Option<ObjectHandle>;

    fn fastener_config(&self, object: ObjectHandle) -> Option<FastenerConfig>;

    fn set_fastener_config(&mut self, object: ObjectHandle, config: FastenerConfig);

    fn fastener_state(&self, object: ObjectHandle) -> Option<FastenerState>;

    fn knob_config(&self, object: ObjectHandle) -> Option<KnobConfig>;

    fn set_knob_config(&mut self, object: ObjectHandle, config: KnobConfig);

    fn condition_met(&self, name: &str) -> bool;

    /// Events since the previous call, in arrival order
    fn drain_events(&mut self) -> Vec<WorldEvent>;
}
