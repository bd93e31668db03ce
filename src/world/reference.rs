//! Late-bound object references
//!
//! An [`ObjectRef`] is only a path. It is resolved against the world on every
//! use and never cached, since the scene may be torn down and rebuilt between
//! runs.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::{ObjectHandle, World};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("object '{0}' not found")]
    NotFound(String),
}

/// Named, non-owning reference to a scene object ("Rig/Panel/Bolt1")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectRef(String);

impl ObjectRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }

    /// Last path segment, used for the name-based fallback search
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Contains glob metacharacters ("Rig/*/Bolt1")
    pub fn is_pattern(&self) -> bool {
        self.0.contains(['*', '?', '['])
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves references against a world
pub struct Resolver<'w> {
    world: &'w dyn World,
}

impl<'w> Resolver<'w> {
    pub fn new(world: &'w dyn World) -> Self {
        Self { world }
    }

    /// Resolve by exact path, then pattern, then name search.
    ///
    /// Paths may legitimately contain glob metacharacters ("Rig/Bolt[1]"),
    /// so the exact path wins. A reference that does not parse as a pattern
    /// falls through to the name search.
    pub fn resolve(&self, reference: &ObjectRef) -> Result<ObjectHandle, ResolveError> {
        if let Some(handle) = self.world.find_by_path(reference.path()) {
            return Ok(handle);
        }

        if reference.is_pattern() {
            match glob::Pattern::new(reference.path()) {
                Ok(pattern) => {
                    let matched = self
                        .world
                        .object_paths()
                        .into_iter()
                        .find(|(_, path)| pattern.matches(path))
                        .map(|(handle, _)| handle);
                    if let Some(handle) = matched {
                        return Ok(handle);
                    }
                }
                Err(e) => {
                    debug!(
                        reference = %reference,
                        error = %e,
                        "Not a valid pattern, searching by name"
                    );
                }
            }
        }

        let candidates = self.world.find_by_name(reference.name());
        if candidates.len() > 1 {
            debug!(
                reference = %reference,
                matches = candidates.len(),
                "Name fallback is ambiguous, using first match"
            );
        }
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| ResolveError::NotFound(reference.path().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::sim::SimulatedWorld;

    #[test]
    fn test_exact_path_match() {
        let mut world = SimulatedWorld::new();
        let bolt = world.add_object("Rig/Panel/Bolt1");
        world.add_object("Rig/Other/Bolt1");

        let resolver = Resolver::new(&world);
        assert_eq!(
            resolver.resolve(&ObjectRef::new("Rig/Panel/Bolt1")),
            Ok(bolt)
        );
    }

    #[test]
    fn test_name_fallback_after_reparent() {
        let mut world = SimulatedWorld::new();
        let bolt = world.add_object("NewRig/Bolt1");

        let resolver = Resolver::new(&world);
        assert_eq!(resolver.resolve(&ObjectRef::new("Rig/Panel/Bolt1")), Ok(bolt));
    }

    #[test]
    fn test_pattern_match() {
        let mut world = SimulatedWorld::new();
        world.add_object("Rig/Panel/Cover");
        let bolt = world.add_object("Rig/Panel/Bolt2");

        let resolver = Resolver::new(&world);
        assert_eq!(resolver.resolve(&ObjectRef::new("Rig/*/Bolt?")), Ok(bolt));
    }

    #[test]
    fn test_bracketed_path_resolves_to_itself() {
        let mut world = SimulatedWorld::new();
        world.add_object("Rig/Bolt1");
        let bracketed = world.add_object("Rig/Bolt[1]");

        let resolver = Resolver::new(&world);
        assert_eq!(resolver.resolve(&ObjectRef::new("Rig/Bolt[1]")), Ok(bracketed));
    }

    #[test]
    fn test_malformed_pattern_still_resolves() {
        let mut world = SimulatedWorld::new();
        let spare = world.add_object("Rig/[spare");

        let resolver = Resolver::new(&world);
        assert_eq!(resolver.resolve(&ObjectRef::new("Rig/[spare")), Ok(spare));
        // Reparented, found through the name search
        assert_eq!(resolver.resolve(&ObjectRef::new("Old/[spare")), Ok(spare));
        assert_eq!(
            resolver.resolve(&ObjectRef::new("Rig/[gone")),
            Err(ResolveError::NotFound("Rig/[gone".to_string()))
        );
    }

    #[test]
    fn test_not_found() {
        let world = SimulatedWorld::new();
        let resolver = Resolver::new(&world);
        assert_eq!(
            resolver.resolve(&ObjectRef::new("Rig/Gone")),
            Err(ResolveError::NotFound("Rig/Gone".to_string()))
        );
    }

    #[test]
    fn test_resolution_is_not_cached() {
        let mut world = SimulatedWorld::new();
        let reference = ObjectRef::new("Rig/Bolt");
        let first = world.add_object("Rig/Bolt");
        assert_eq!(Resolver::new(&world).resolve(&reference), Ok(first));

        world.remove_object("Rig/Bolt");
        assert!(Resolver::new(&world).resolve(&reference).is_err());

        let second = world.add_object("Rig/Bolt");
        assert_ne!(first, second);
        assert_eq!(Resolver::new(&world).resolve(&reference), Ok(second));
    }

    #[test]
    fn test_reference_name() {
        assert_eq!(ObjectRef::new("A/B/C").name(), "C");
        assert_eq!(ObjectRef::new("C").name(), "C");
        assert!(ObjectRef::new("A/[bc]").is_pattern());
        assert!(!ObjectRef::new("A/B").is_pattern());
    }
}
