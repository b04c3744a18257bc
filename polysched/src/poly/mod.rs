//! Polyhedral model of a loop-nest program: quasi-affine expressions,
//! iteration domains, program contexts and tagged array accesses.

pub mod extract;
pub mod model;

pub use extract::{iteration_of, to_affine, Extractor};
pub use model::{AccessKind, ArrayAccess, Iteration, PolyhedralModel, QuasiAffine, Statement};
