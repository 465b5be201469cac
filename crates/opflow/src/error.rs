//! Error types for graph construction

use thiserror::Error;

use crate::operation::MethodId;

/// Errors that abort a build.
///
/// Malformed but tolerable input (a `try` without handlers, an unknown
/// case clause, an unresolved helper, a `goto` to a missing label) is
/// recovered inside the graph and never surfaces here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CfgError {
    #[error("operation kind {kind} cannot be lowered in this position")]
    UnsupportedOperation { kind: &'static str },

    #[error("evaluation stack unbalanced: expected depth {expected}, found {found}")]
    UnbalancedEvalStack { expected: usize, found: usize },

    #[error("no local function {0} is declared in this graph")]
    UnknownLocalFunction(MethodId),

    #[error("anonymous function #{0} is not declared in this graph")]
    UnknownAnonymousFunction(u32),

    #[error("graph verification failed: {0}")]
    Verification(String),
}

pub type Result<T> = std::result::Result<T, CfgError>;
