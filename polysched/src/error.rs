//! Crate-wide error type.
//!
//! Precondition violations of transforms are not errors: they surface as
//! `Ok(false)`. An `Err` means the candidate could not be analyzed at all,
//! which callers treat exactly like an illegal transform.

use thiserror::Error;

use crate::ir::{NodeId, StmtKey, VarId};
use crate::solver::SolverError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported affine form: {0}")]
    UnsupportedAffine(String),

    #[error("loop {0} must be normalized first")]
    NotNormalized(NodeId),

    #[error("node {0} is not a loop")]
    NotALoop(NodeId),

    #[error("node {0} is not reachable from the program root")]
    UnknownNode(NodeId),

    #[error("variable {0} is referenced outside of its loop")]
    UnboundVariable(VarId),

    #[error("statement {0} has no counterpart in the transformed program")]
    MissingStatement(StmtKey),

    #[error("invalid program: {0}")]
    InvalidProgram(String),

    #[error("solver failure: {0}")]
    Solver(#[from] SolverError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
