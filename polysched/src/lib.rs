//! PolySched: Polyhedral Auto-Scheduling of Affine Tensor-Loop Programs
//!
//! This library searches over sequences of loop rewrites for a faster
//! schedule of a loop-nest program, keeping only rewrites that preserve
//! every data dependence:
//! 1. Build the loop-nest IR from a program description
//! 2. Extract its polyhedral model and compute RAW/WAR/WAW dependences
//! 3. Explore split, fission, fusion, reorder and parallelize rewrites,
//!    verifying each against the dependences
//! 4. Rank candidates with a cost model and keep the fastest
//!
//! # Core Pipeline Flow
//! ```text
//! ProgramSpec → IR → search rounds ─────────────► best program → C kernel
//!                      │   ▲
//!                      ▼   │ legal?
//!               polyhedral model → dependences
//! ```
//!
//! # Module Organization
//!
//! ## Program Representation
//! - [`ir`]: arena loop-nest IR, program builder and constant evaluation
//! - [`printer`]: C rendering of kernels and timing harnesses
//!
//! ## Polyhedral Analysis
//! - [`solver`]: integer set and map algebra
//! - [`poly`]: extraction of domains, schedules and accesses
//! - [`dependency`]: RAW/WAR/WAW relations
//! - [`legality`]: dependence-preservation check between two programs
//! - [`sync`]: parallel-loop detection and hazard-free loop partitioning
//!
//! ## Rewrites and Search
//! - [`transform`]: normalize, split, fission, fusion, reorder, unroll, parallelize,
//!   vectorize, constant folding, dead-code elimination
//! - [`checks`]: structural preconditions (constant bounds, affinity, divisibility)
//! - [`search`]: beam, heuristic, random and Monte Carlo strategies
//! - [`cost_model`]: compile-and-run and analytical runtime estimates
//! - [`pipeline`]: end-to-end scheduler

pub mod error;

// ============================================================================
// Program Representation
// ============================================================================

pub mod ir; // Arena IR + builder
pub mod printer; // C kernel + harness rendering

// ============================================================================
// Polyhedral Analysis
// ============================================================================

pub mod dependency; // RAW/WAR/WAW relations
pub mod legality; // Full-model verification
pub mod poly; // Polyhedral extraction
pub mod solver; // Integer set engine
pub mod sync; // Parallelism + loop partitioning

// ============================================================================
// Rewrites and Search
// ============================================================================

pub mod checks;
pub mod cost_model;
pub mod pipeline;
pub mod search;
pub mod transform;

pub use error::{Error, Result};
pub use ir::{Expr, NodeId, Program, ProgramBuilder, ProgramSpec, Stmt, StmtKey, VarId};

pub use cost_model::{
    AnalyticalCostConfig, AnalyticalCostModel, CostModel, CostModelConfig, CostModelKind, ProcessCostModel,
    FAILURE_RUNTIME_MS,
};
pub use dependency::{DependencyKind, DependencyModel};
pub use legality::{FullModelVerifier, LegalityChecker};
pub use pipeline::{AutoScheduler, ScheduleResult, SchedulerConfig};
pub use poly::{Extractor, PolyhedralModel};
pub use search::{build_strategy, SearchConfig, SearchOutcome, SearchStrategy, StrategyKind};
pub use transform::{apply_checked, Outcome, Transform};
