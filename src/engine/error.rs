use thiserror::Error;

use crate::handlers::HandlerError;
use crate::program::{ProgramError, RefRole, StepId, StepKind, ValidationIssue};
use crate::world::{InteractionFramework, ResolveError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Structural problems; nothing was started
    #[error("program has {} validation error(s)", .0.len())]
    Validation(Vec<ValidationIssue>),

    #[error("no handler can run {kind} step {step} under {framework}")]
    NoHandler {
        step: StepId,
        kind: StepKind,
        framework: InteractionFramework,
    },

    #[error("step {step}: {role} reference '{reference}' did not resolve")]
    UnresolvedReference {
        step: StepId,
        role: RefRole,
        reference: String,
        #[source]
        source: ResolveError,
    },

    #[error("handler '{handler}' could not start step {step}")]
    HandlerFailed {
        step: StepId,
        handler: String,
        #[source]
        source: HandlerError,
    },

    #[error("no sequence is running")]
    NotRunning,

    #[error("a sequence is already running")]
    AlreadyRunning,

    #[error("{0} is not optional")]
    NotOptional(String),

    #[error(transparent)]
    Program(#[from] ProgramError),
}

impl EngineError {
    /// Step this error is attached to, when there is one
    pub fn step(&self) -> Option<StepId> {
        match self {
            EngineError::NoHandler { step, .. }
            | EngineError::UnresolvedReference { step, .. }
            | EngineError::HandlerFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}
