//! Loop Transformations
//!
//! Structural rewrites of the arena IR. Every rewrite checks its own
//! preconditions and returns `Ok(false)` when they do not hold, leaving the
//! program untouched.
//!
//! | Transform   | Precondition                                  | Verified |
//! |-------------|-----------------------------------------------|----------|
//! | Normalize   | none                                          | no       |
//! | Split       | normalized loop, factor > 0                   | no       |
//! | Fission     | at least two body entries                     | yes      |
//! | Fusion      | adjacent siblings with equal headers          | yes      |
//! | Reorder     | perfect single-child chain                    | yes      |
//! | Unroll      | constant innermost bounds                     | no       |
//! | Parallelize | none (annotation only)                        | no       |
//! | Vectorize   | innermost, normalized, no carried dependence  | no       |
//!
//! [`simplify`] holds the clean-up passes run on a finished schedule:
//! constant folding and dead-code elimination.
//!
//! Rewrites that can reorder dependent instances go through
//! [`apply_checked`], which runs them on a copy and asks a
//! [`LegalityChecker`] before handing the copy back.

use std::fmt;

use log::debug;

use crate::error::Result;
use crate::ir::eval::eval_const;
use crate::ir::{BinOp, Node, NodeId, Program};
use crate::legality::LegalityChecker;

pub mod fission;
pub mod fusion;
pub mod normalize;
pub mod parallel;
pub mod reorder;
pub mod simplify;
pub mod split;
pub mod unroll;
pub mod vectorize;

pub use fission::fission;
pub use fusion::fuse;
pub use normalize::{is_normalized, normalize_all, normalize_loop};
pub use parallel::{parallelize_all, parallelize_loop};
pub use reorder::reorder;
pub use simplify::{eliminate_dead_code, fold_constants};
pub use split::split_loop;
pub use unroll::unroll;
pub use vectorize::{vectorize_all, vectorize_loop};

/// Replaces a variable-free expression by its value.
pub(crate) fn fold(program: &mut Program, id: NodeId) -> NodeId {
    match eval_const(program, id) {
        Some(v) => program.int(v),
        None => id,
    }
}

/// Operands of a chain of `op` nodes, left to right. A bound `min(a, b)`
/// yields `[a, b]`; any other expression yields itself.
pub(crate) fn chain_terms(program: &Program, id: NodeId, op: BinOp) -> Vec<NodeId> {
    match program.node(id) {
        Node::Binary { op: o, lhs, rhs } if *o == op => {
            let mut out = chain_terms(program, *lhs, op);
            out.extend(chain_terms(program, *rhs, op));
            out
        }
        _ => vec![id],
    }
}

/// Rebuilds a left-nested chain of `op` over `terms`.
pub(crate) fn chain(program: &mut Program, terms: Vec<NodeId>, op: BinOp) -> Option<NodeId> {
    terms.into_iter().reduce(|acc, t| program.binary(op, acc, t))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transform {
    Normalize(NodeId),
    Split { target: NodeId, factor: i64 },
    Fission(NodeId),
    Fusion { first: NodeId, second: NodeId },
    Reorder { outer: NodeId, inner: NodeId },
    Unroll,
    Parallelize(NodeId),
    Vectorize(NodeId),
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::Normalize(_) => "Normalize",
            Transform::Split { .. } => "Split",
            Transform::Fission(_) => "Fission",
            Transform::Fusion { .. } => "Fusion",
            Transform::Reorder { .. } => "Reorder",
            Transform::Unroll => "Unroll",
            Transform::Parallelize(_) => "Parallelize",
            Transform::Vectorize(_) => "Vectorize",
        }
    }

    /// Whether the rewrite may change the order of dependent instances.
    pub fn needs_verification(&self) -> bool {
        matches!(
            self,
            Transform::Fission(_) | Transform::Fusion { .. } | Transform::Reorder { .. }
        )
    }

    /// Applies the rewrite in place.
    pub fn apply(&self, program: &mut Program) -> Result<bool> {
        match *self {
            Transform::Normalize(lp) => normalize_loop(program, lp),
            Transform::Split { target, factor } => split_loop(program, target, factor),
            Transform::Fission(lp) => fission(program, lp),
            Transform::Fusion { first, second } => fuse(program, first, second),
            Transform::Reorder { outer, inner } => reorder(program, outer, inner),
            Transform::Unroll => unroll(program),
            Transform::Parallelize(lp) => {
                parallelize_loop(program, lp)?;
                Ok(true)
            }
            Transform::Vectorize(lp) => vectorize_loop(program, lp),
        }
    }
}

impl fmt::Display for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transform::Normalize(lp)
            | Transform::Fission(lp)
            | Transform::Parallelize(lp)
            | Transform::Vectorize(lp) => {
                write!(f, "{}({})", self.name(), lp)
            }
            Transform::Split { target, factor } => write!(f, "Split({}, {})", target, factor),
            Transform::Fusion { first, second } => write!(f, "Fusion({}, {})", first, second),
            Transform::Reorder { outer, inner } => write!(f, "Reorder({}, {})", outer, inner),
            Transform::Unroll => f.write_str("Unroll"),
        }
    }
}

/// Result of [`apply_checked`].
#[derive(Debug)]
pub enum Outcome {
    Applied(Program),
    NotApplicable,
    Illegal,
}

/// Normalizes a copy of `program`, applies `transform` to it and, for
/// rewrites that need it, verifies the copy against the normalized
/// baseline. `program` itself is never modified. Loop ids of `program` stay
/// valid in the copy.
///
/// Extraction or analysis failures on the copy count as illegal.
pub fn apply_checked(
    program: &Program,
    transform: &Transform,
    checker: &dyn LegalityChecker,
) -> Result<Outcome> {
    let mut candidate = program.clone();
    normalize_all(&mut candidate)?;
    let baseline = candidate.clone();

    match transform.apply(&mut candidate) {
        Ok(true) => {}
        Ok(false) => return Ok(Outcome::NotApplicable),
        Err(e) => {
            debug!("{} failed: {}", transform, e);
            return Ok(Outcome::Illegal);
        }
    }
    if transform.needs_verification() {
        match checker.is_legal(&baseline, &candidate) {
            Ok(true) => {}
            Ok(false) => return Ok(Outcome::Illegal),
            Err(e) => {
                debug!("{} could not be verified: {}", transform, e);
                return Ok(Outcome::Illegal);
            }
        }
    }
    Ok(Outcome::Applied(candidate))
}
