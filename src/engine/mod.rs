//! Sequence execution: the controller and its error type

mod controller;
mod error;

pub use controller::{Engine, EngineState};
pub use error::EngineError;
