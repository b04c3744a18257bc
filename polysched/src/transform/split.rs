use log::debug;

use super::{chain, chain_terms, fold};
use super::normalize::is_normalized;
use crate::error::{Error, Result};
use crate::ir::eval::eval_const;
use crate::ir::{BinOp, NodeId, Program};

/// Strip-mines a normalized loop `i in [0, N)` into
///
/// ```text
/// for o in [0, (N + F - 1) / F)
///   for e in [0, min(F, N - o*F))
///     ... i := o*F + e ...
/// ```
///
/// The `min` guard is left out when `N` is a constant multiple of `F`.
/// An upper bound `min(a, b)` contributes one guard term per operand.
/// The outer loop keeps the node id of the original loop.
pub fn split_loop(program: &mut Program, lp: NodeId, factor: i64) -> Result<bool> {
    if factor <= 0 || !is_normalized(program, lp)? {
        return Ok(false);
    }
    let l = program.loop_node(lp)?.clone();
    let outer = program.fresh_var();
    let inner = program.fresh_var();

    let uppers = chain_terms(program, l.max, BinOp::Min);
    let mut outer_terms = Vec::new();
    for &n in &uppers {
        let n = program.copy_expr(n);
        let pad = program.int(factor - 1);
        let padded = program.binary(BinOp::Add, n, pad);
        let f = program.int(factor);
        let quotient = program.binary(BinOp::Div, padded, f);
        outer_terms.push(fold(program, quotient));
    }
    let outer_max = chain(program, outer_terms, BinOp::Min)
        .ok_or_else(|| Error::InvalidProgram(format!("{} has no upper bound", lp)))?;

    let divisible = matches!(eval_const(program, l.max), Some(n) if n % factor == 0);
    let inner_max = if divisible {
        program.int(factor)
    } else {
        let mut inner_terms = vec![program.int(factor)];
        for &n in &uppers {
            let n = program.copy_expr(n);
            let o = program.var_ref(outer);
            let f = program.int(factor);
            let done = program.binary(BinOp::Mul, o, f);
            inner_terms.push(program.binary(BinOp::Sub, n, done));
        }
        chain(program, inner_terms, BinOp::Min)
            .ok_or_else(|| Error::InvalidProgram(format!("{} has no upper bound", lp)))?
    };

    let o = program.var_ref(outer);
    let f = program.int(factor);
    let scaled = program.binary(BinOp::Mul, o, f);
    let e = program.var_ref(inner);
    let replacement = program.binary(BinOp::Add, scaled, e);
    for &entry in &l.body {
        program.substitute_var(entry, l.var, replacement);
    }

    let zero = program.int(0);
    let one = program.int(1);
    let inner_loop = program.new_loop(inner, zero, inner_max, one);
    if let Some(il) = program.as_loop_mut(inner_loop) {
        il.body = l.body.clone();
    }
    let zero = program.int(0);
    let one = program.int(1);
    if let Some(header) = program.as_loop_mut(lp) {
        header.var = outer;
        header.min = zero;
        header.max = outer_max;
        header.step = one;
        header.body = vec![inner_loop];
        header.parallel = false;
        header.vectorize = false;
    }
    debug!("split {} by {}", lp, factor);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::eval::for_each_instance;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    fn program(extent: i64) -> Program {
        let spec = ProgramBuilder::spec("split").tensor("A", &[extent]).stmt(Stmt::for_range(
            "i",
            0,
            extent,
            vec![Stmt::assign("A", vec![Expr::var("i")], 1)],
        ));
        ProgramBuilder::build(&spec).expect("build")
    }

    #[test]
    fn every_iteration_maps_to_one_pair() {
        for (extent, factor) in [(16, 4), (10, 4), (3, 8)] {
            let mut p = program(extent);
            let lp = p.loops()[0];
            assert!(split_loop(&mut p, lp, factor).expect("split"));
            let mut seen = Vec::new();
            for_each_instance(&p, |_, env| {
                let (o, e) = (env[0].1, env[1].1);
                assert!(e < factor);
                assert!(o < (extent + factor - 1) / factor);
                seen.push(o * factor + e);
            })
            .expect("bounds");
            assert_eq!(seen, (0..extent).collect::<Vec<_>>());
        }
    }

    #[test]
    fn rejects_bad_factor_and_unnormalized_loops() {
        let mut p = program(8);
        let lp = p.loops()[0];
        assert!(!split_loop(&mut p, lp, 0).expect("split"));

        let spec = ProgramBuilder::spec("offset").tensor("A", &[8]).stmt(Stmt::for_range(
            "i",
            1,
            8,
            vec![Stmt::assign("A", vec![Expr::var("i")], 1)],
        ));
        let mut p = ProgramBuilder::build(&spec).expect("build");
        let lp = p.loops()[0];
        assert!(!split_loop(&mut p, lp, 2).expect("split"));
    }

    #[test]
    fn guarded_upper_bound_splits_into_affine_terms() {
        let spec = ProgramBuilder::spec("guard").tensor("A", &[8, 8]).stmt(Stmt::for_range(
            "i",
            0,
            8,
            vec![Stmt::for_range(
                "j",
                0,
                Expr::min(Expr::var("i") + 3, 6),
                vec![Stmt::assign("A", vec![Expr::var("i"), Expr::var("j")], 1)],
            )],
        ));
        let mut p = ProgramBuilder::build(&spec).expect("build");
        let mut before = Vec::new();
        for_each_instance(&p, |_, env| before.push((env[0].1, env[1].1))).expect("bounds");

        let inner = p.loops()[1];
        assert!(split_loop(&mut p, inner, 2).expect("split"));
        crate::poly::Extractor::extract(&p).expect("still affine");

        let mut after = Vec::new();
        for_each_instance(&p, |_, env| after.push((env[0].1, env[1].1 * 2 + env[2].1))).expect("bounds");
        assert_eq!(after, before);
    }
}
