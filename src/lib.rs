//! Stepwise - step sequencing and interaction enablement for guided procedures
//!
//! A [`program::Program`] is a tree of modules, task groups and steps. The
//! [`engine::Engine`] walks it one task group at a time, dispatches each
//! active step to a [`handlers::StepHandler`] chosen by step kind and
//! interaction framework, and keeps the [`world::World`]'s interactable
//! objects in line with an [`enablement::EnablementPlan`].

pub mod config;
pub mod enablement;
pub mod engine;
pub mod guidance;
pub mod handlers;
pub mod logging;
pub mod program;
pub mod simulate;
pub mod world;
