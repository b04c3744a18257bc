//! Integer set and map algebra
//!
//! A small Presburger-style engine covering what dependency analysis needs:
//! conjunctions of affine constraints over named integer tuples
//! ([`BasicMap`]), finite unions of them ([`UnionMap`]), composition,
//! intersection, subtraction, emptiness and point counting.
//!
//! Existential columns come from composition and floor division. Those
//! defined by a unit-coefficient equality are substituted away, so the maps
//! produced from affine accesses and schedules end up existential-free.
//! Subtracting a map that still carries existentials is refused with
//! [`SolverError::ExistentialSubtrahend`].

use thiserror::Error;

mod constraint;
mod feasibility;
mod map;
mod polyhedron;

pub use constraint::{gcd, Constraint};
pub use map::{BasicMap, Space, Tuple, UnionMap};
pub use polyhedron::Polyhedron;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SolverError {
    #[error("operands live in different spaces")]
    SpaceMismatch,

    #[error("cannot subtract a map with existentially quantified columns")]
    ExistentialSubtrahend,

    #[error("coefficient overflow")]
    Overflow,

    #[error("search budget exhausted")]
    BudgetExceeded,

    #[error("set is unbounded")]
    Unbounded,
}
