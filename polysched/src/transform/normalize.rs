use log::debug;

use super::{chain, chain_terms, fold};
use crate::error::{Error, Result};
use crate::ir::eval::eval_const;
use crate::ir::{BinOp, NodeId, Program};

/// Lower bound 0 and step 1.
pub fn is_normalized(program: &Program, lp: NodeId) -> Result<bool> {
    let l = program.loop_node(lp)?;
    Ok(eval_const(program, l.min) == Some(0) && eval_const(program, l.step) == Some(1))
}

/// Rewrites `for i in [min, max) step s` as `for i' in [0, (max-min+s-1)/s)`
/// with `i = s*i' + min` substituted in the body. An upper bound
/// `min(a, b)` becomes `min((a-min+s-1)/s, (b-min+s-1)/s)` so every term
/// stays quasi-affine. Returns `false` when the loop is already normalized
/// or its lower bound is a `max(..)`, which has no affine substitute.
pub fn normalize_loop(program: &mut Program, lp: NodeId) -> Result<bool> {
    if is_normalized(program, lp)? {
        return Ok(false);
    }
    let l = program.loop_node(lp)?.clone();
    let step = eval_const(program, l.step);
    if matches!(step, Some(s) if s <= 0) {
        return Err(Error::InvalidProgram(format!("{} has a non-positive step", lp)));
    }
    if chain_terms(program, l.min, BinOp::Max).len() > 1 {
        debug!("{} keeps its max lower bound", lp);
        return Ok(false);
    }
    let unit_step = step == Some(1);
    let zero_min = eval_const(program, l.min) == Some(0);

    let fresh = program.fresh_var();

    // Trip count, one term per upper bound.
    let mut terms = Vec::new();
    for upper in chain_terms(program, l.max, BinOp::Min) {
        let mut extent = program.copy_expr(upper);
        if !zero_min {
            let min = program.copy_expr(l.min);
            extent = program.binary(BinOp::Sub, extent, min);
        }
        if !unit_step {
            let s = program.copy_expr(l.step);
            let one = program.int(1);
            let s_minus_one = program.binary(BinOp::Sub, s, one);
            let padded = program.binary(BinOp::Add, extent, s_minus_one);
            let s = program.copy_expr(l.step);
            extent = program.binary(BinOp::Div, padded, s);
        }
        terms.push(fold(program, extent));
    }
    let extent = chain(program, terms, BinOp::Min)
        .ok_or_else(|| Error::InvalidProgram(format!("{} has no upper bound", lp)))?;

    // Old variable in terms of the new one.
    let mut replacement = program.var_ref(fresh);
    if !unit_step {
        let s = program.copy_expr(l.step);
        replacement = program.binary(BinOp::Mul, s, replacement);
    }
    if !zero_min {
        let min = program.copy_expr(l.min);
        replacement = program.binary(BinOp::Add, replacement, min);
    }
    for &entry in &l.body {
        program.substitute_var(entry, l.var, replacement);
    }

    let zero = program.int(0);
    let one = program.int(1);
    if let Some(header) = program.as_loop_mut(lp) {
        header.var = fresh;
        header.min = zero;
        header.max = extent;
        header.step = one;
    }
    debug!("normalized {} as {}", lp, fresh);
    Ok(true)
}

/// Normalizes every loop, outermost first. Returns how many changed.
pub fn normalize_all(program: &mut Program) -> Result<usize> {
    let mut changed = 0;
    for lp in program.loops() {
        if normalize_loop(program, lp)? {
            changed += 1;
        }
    }
    Ok(changed)
}
