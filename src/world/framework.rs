//! Interaction framework detection

use serde::{Deserialize, Serialize};

/// Physical-interaction adapter present in the world
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionFramework {
    /// Controller-driven XR toolkit (ray/direct interactors, sockets, locomotion)
    #[default]
    XrToolkit,
    /// Physics-driven hands with joint based grabbing
    PhysicsHands,
    /// Mouse and keyboard fallback
    Desktop,
}

impl InteractionFramework {
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionFramework::XrToolkit => "xr_toolkit",
            InteractionFramework::PhysicsHands => "physics_hands",
            InteractionFramework::Desktop => "desktop",
        }
    }

    pub fn all() -> &'static [InteractionFramework] {
        &[
            InteractionFramework::XrToolkit,
            InteractionFramework::PhysicsHands,
            InteractionFramework::Desktop,
        ]
    }
}

impl std::fmt::Display for InteractionFramework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Answers "which interaction adapter is present right now"
pub trait FrameworkDetector {
    fn current_framework(&self) -> InteractionFramework;
}

/// Detector that always reports the configured framework
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedFramework(pub InteractionFramework);

impl FrameworkDetector for FixedFramework {
    fn current_framework(&self) -> InteractionFramework {
        self.0
    }
}
