//! Loop interchange across a perfect nest.
//!
//! The headers of `outer` and `inner` trade places. Every level in between
//! may have bounds that mention either variable, so all bounds of the nest
//! are rebuilt: the iteration space is written as a [`Polyhedron`] with the
//! variables in their new order, and from the innermost level outward each
//! level reads its bounds off the remaining rows before being projected
//! away.

use std::collections::HashMap;

use log::debug;

use crate::error::{Error, Result};
use crate::ir::{BinOp, NodeId, Program, VarId};
use crate::poly::{iteration_of, QuasiAffine};
use crate::solver::{Constraint, Polyhedron};

/// Loops from `outer` down to `inner`, when each loop before `inner` has a
/// single body entry that is the next loop.
fn perfect_chain(program: &Program, outer: NodeId, inner: NodeId) -> Result<Option<Vec<NodeId>>> {
    let mut chain = vec![outer];
    let mut current = outer;
    while current != inner {
        let l = program.loop_node(current)?;
        match l.body.as_slice() {
            [only] if program.as_loop(*only).is_some() => {
                current = *only;
                chain.push(current);
            }
            _ => return Ok(None),
        }
    }
    Ok(Some(chain))
}

fn row_of(e: &QuasiAffine, cols: &HashMap<VarId, usize>, n: usize, scale: i64) -> Result<Constraint> {
    let (coeffs, constant) = e.scaled_numerator(scale)?;
    let mut row = Constraint::new(n).plus(constant);
    for (v, c) in coeffs {
        let col = *cols.get(&v).ok_or(Error::UnboundVariable(v))?;
        row = row.with(col, c);
    }
    Ok(row)
}

/// `Σ coeffs[k]·vars[k] + constant` as an IR expression.
fn linear_expr(program: &mut Program, terms: &[(VarId, i64)], constant: i64) -> NodeId {
    let mut acc: Option<NodeId> = None;
    for &(var, c) in terms.iter().filter(|(_, c)| *c != 0) {
        let v = program.var_ref(var);
        let magnitude = c.abs();
        let term = if magnitude == 1 {
            v
        } else {
            let m = program.int(magnitude);
            program.binary(BinOp::Mul, m, v)
        };
        acc = Some(match acc {
            None if c > 0 => term,
            None => {
                let zero = program.int(0);
                program.binary(BinOp::Sub, zero, term)
            }
            Some(a) if c > 0 => program.binary(BinOp::Add, a, term),
            Some(a) => program.binary(BinOp::Sub, a, term),
        });
    }
    match acc {
        None => program.int(constant),
        Some(a) if constant > 0 => {
            let k = program.int(constant);
            program.binary(BinOp::Add, a, k)
        }
        Some(a) if constant < 0 => {
            let k = program.int(-constant);
            program.binary(BinOp::Sub, a, k)
        }
        Some(a) => a,
    }
}

/// `a·x + rest >= 0` with `a > 0` gives `x >= ceil(-rest / a)`, emitted as
/// `floor((-rest + a - 1) / a)`.
fn lower_bound(program: &mut Program, row: &Constraint, col: usize, vars: &[VarId]) -> NodeId {
    let a = row.coeffs[col];
    let terms: Vec<(VarId, i64)> = (0..col).map(|k| (vars[k], -row.coeffs[k])).collect();
    let numerator = linear_expr(program, &terms, -row.constant + a - 1);
    if a == 1 {
        numerator
    } else {
        let d = program.int(a);
        program.binary(BinOp::Div, numerator, d)
    }
}

/// `-a·x + rest >= 0` with `a > 0` gives `x <= floor(rest / a)`; the
/// exclusive bound is `floor((rest + a) / a)`.
fn upper_bound(program: &mut Program, row: &Constraint, col: usize, vars: &[VarId]) -> NodeId {
    let a = -row.coeffs[col];
    let terms: Vec<(VarId, i64)> = (0..col).map(|k| (vars[k], row.coeffs[k])).collect();
    let numerator = linear_expr(program, &terms, row.constant + a);
    if a == 1 {
        numerator
    } else {
        let d = program.int(a);
        program.binary(BinOp::Div, numerator, d)
    }
}

fn combine(program: &mut Program, op: BinOp, parts: Vec<NodeId>) -> Option<NodeId> {
    parts.into_iter().reduce(|a, b| program.binary(op, a, b))
}

/// Interchanges `outer` and `inner`, where `inner` is reached from `outer`
/// through single-child loops. All loops of the chain must be normalized.
pub fn reorder(program: &mut Program, outer: NodeId, inner: NodeId) -> Result<bool> {
    if outer == inner || program.as_loop(outer).is_none() || program.as_loop(inner).is_none() {
        return Ok(false);
    }
    let Some(chain) = perfect_chain(program, outer, inner)? else {
        return Ok(false);
    };
    let enclosing = program.enclosing_loops(outer)?;

    let mut order: Vec<VarId> = Vec::with_capacity(enclosing.len() + chain.len());
    let mut iterations = Vec::with_capacity(enclosing.len() + chain.len());
    for &lp in enclosing.iter().chain(&chain) {
        let it = iteration_of(program, lp)?;
        order.push(it.var);
        iterations.push(it);
    }
    let base = enclosing.len();
    let last = order.len() - 1;
    order.swap(base, last);

    let n = order.len();
    let cols: HashMap<VarId, usize> = order.iter().enumerate().map(|(k, v)| (*v, k)).collect();
    let mut poly = Polyhedron::new(n);
    for it in &iterations {
        let col = cols[&it.var];
        for lo in &it.lower {
            let row = row_of(lo, &cols, n, -1)?.with(col, lo.divisor).plus(lo.divisor - 1);
            poly.add(row);
        }
        for hi in &it.upper {
            poly.add(row_of(hi, &cols, n, 1)?.with(col, -hi.divisor));
        }
    }

    let mut headers = vec![(NodeId(0), NodeId(0)); chain.len()];
    for pos in (0..chain.len()).rev() {
        let col = base + pos;
        poly.remove_redundant()?;
        let (lowers, uppers) = poly.bounds_of(col);
        let lows: Vec<NodeId> = lowers.iter().map(|r| lower_bound(program, r, col, &order)).collect();
        let highs: Vec<NodeId> = uppers.iter().map(|r| upper_bound(program, r, col, &order)).collect();
        let (Some(min), Some(max)) = (
            combine(program, BinOp::Max, lows),
            combine(program, BinOp::Min, highs),
        ) else {
            return Err(Error::InvalidProgram(format!(
                "{} is unbounded after interchange",
                order[col]
            )));
        };
        headers[pos] = (min, max);
        poly.eliminate(col)?;
    }

    for (pos, &lp) in chain.iter().enumerate() {
        let (min, max) = headers[pos];
        let var = order[base + pos];
        let one = program.int(1);
        if let Some(l) = program.as_loop_mut(lp) {
            l.var = var;
            l.min = min;
            l.max = max;
            l.step = one;
            l.parallel = false;
            l.vectorize = false;
        }
    }
    debug!("interchanged {} and {} across {} levels", outer, inner, chain.len());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::eval::for_each_instance;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    fn instances(program: &Program) -> Vec<Vec<(VarId, i64)>> {
        let mut out = Vec::new();
        for_each_instance(program, |_, env| out.push(env.to_vec())).expect("bounds");
        out
    }

    #[test]
    fn rectangular_nest_swaps_headers() {
        let spec = ProgramBuilder::spec("rect").tensor("A", &[4, 6]).stmt(Stmt::for_range(
            "i",
            0,
            4,
            vec![Stmt::for_range(
                "j",
                0,
                6,
                vec![Stmt::assign("A", vec![Expr::var("i"), Expr::var("j")], 0)],
            )],
        ));
        let mut program = ProgramBuilder::build(&spec).expect("build");
        let loops = program.loops();
        let (vi, vj) = (
            program.loop_node(loops[0]).expect("loop").var,
            program.loop_node(loops[1]).expect("loop").var,
        );
        assert!(reorder(&mut program, loops[0], loops[1]).expect("reorder"));
        assert_eq!(program.loop_node(loops[0]).expect("loop").var, vj);
        assert_eq!(program.loop_node(loops[1]).expect("loop").var, vi);
        let points = instances(&program);
        assert_eq!(points.len(), 24);
        assert_eq!(points[1], vec![(vj, 0), (vi, 1)]);
    }

    #[test]
    fn triangular_nest_keeps_its_points() {
        // for i in [0, 6) for j in [0, i + 1)
        let spec = ProgramBuilder::spec("tri").tensor("A", &[6, 6]).stmt(Stmt::for_range(
            "i",
            0,
            6,
            vec![Stmt::for_range(
                "j",
                0,
                Expr::var("i") + 1,
                vec![Stmt::assign("A", vec![Expr::var("i"), Expr::var("j")], 0)],
            )],
        ));
        let mut program = ProgramBuilder::build(&spec).expect("build");
        let mut before: Vec<(i64, i64)> = instances(&program).iter().map(|p| (p[0].1, p[1].1)).collect();
        let loops = program.loops();
        assert!(reorder(&mut program, loops[0], loops[1]).expect("reorder"));
        let mut after: Vec<(i64, i64)> = instances(&program).iter().map(|p| (p[1].1, p[0].1)).collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn imperfect_nest_is_not_applicable() {
        let spec = ProgramBuilder::spec("imperfect").tensor("A", &[4, 4]).stmt(Stmt::for_range(
            "i",
            0,
            4,
            vec![
                Stmt::assign("A", vec![Expr::var("i"), Expr::int(0)], 1),
                Stmt::for_range(
                    "j",
                    0,
                    4,
                    vec![Stmt::assign("A", vec![Expr::var("i"), Expr::var("j")], 0)],
                ),
            ],
        ));
        let mut program = ProgramBuilder::build(&spec).expect("build");
        let loops = program.loops();
        assert!(!reorder(&mut program, loops[0], loops[1]).expect("reorder"));
    }
}
