//! Structural checks run before a transform or before search.

use crate::error::Result;
use crate::ir::eval::eval_const;
use crate::ir::{NodeId, Program};
use crate::poly::Extractor;

/// Loops whose bodies hold no further loop.
pub fn innermost_loops(program: &Program) -> Vec<NodeId> {
    program
        .loops()
        .into_iter()
        .filter(|&lp| {
            program
                .as_loop(lp)
                .map(|l| l.body.iter().all(|&c| program.as_loop(c).is_none()))
                .unwrap_or(false)
        })
        .collect()
}

/// Loop bounds that evaluate to integers without any environment.
pub struct ConstantBoundaryCheck;

impl ConstantBoundaryCheck {
    /// `(min, max, step)` of `lp` when all three are constants.
    pub fn bounds(program: &Program, lp: NodeId) -> Option<(i64, i64, i64)> {
        let l = program.as_loop(lp)?;
        Some((
            eval_const(program, l.min)?,
            eval_const(program, l.max)?,
            eval_const(program, l.step)?,
        ))
    }

    pub fn all_loops(program: &Program) -> bool {
        program
            .loops()
            .into_iter()
            .all(|lp| Self::bounds(program, lp).is_some())
    }

    pub fn innermost(program: &Program) -> bool {
        innermost_loops(program)
            .into_iter()
            .all(|lp| Self::bounds(program, lp).is_some())
    }
}

/// Every index and bound expression has a quasi-affine form.
pub struct AffineCheck;

impl AffineCheck {
    pub fn check(program: &Program) -> Result<()> {
        Extractor::extract(program).map(|_| ())
    }
}

/// Constant trip count of a loop divisible by a factor.
pub struct DivisibleBoundaryCheck;

impl DivisibleBoundaryCheck {
    pub fn check(program: &Program, lp: NodeId, factor: i64) -> bool {
        if factor <= 0 {
            return false;
        }
        match ConstantBoundaryCheck::bounds(program, lp) {
            Some((min, max, 1)) => (max - min) % factor == 0,
            _ => false,
        }
    }
}
