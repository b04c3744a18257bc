use log::debug;

use super::normalize::is_normalized;
use crate::error::Result;
use crate::ir::{Node, NodeId, Program};
use crate::sync::is_parallel;

/// Marks an innermost loop for SIMD execution. The loop must be
/// normalized, hold only assignments and carry no dependence.
pub fn vectorize_loop(program: &mut Program, lp: NodeId) -> Result<bool> {
    let l = program.loop_node(lp)?;
    let straight_line = l
        .body
        .iter()
        .all(|&c| matches!(program.node(c), Node::Assign { .. }));
    if l.body.is_empty() || !straight_line || !is_normalized(program, lp)? {
        return Ok(false);
    }
    if !is_parallel(program, lp)? {
        return Ok(false);
    }
    if let Some(l) = program.as_loop_mut(lp) {
        l.vectorize = true;
    }
    debug!("vectorized {}", lp);
    Ok(true)
}

/// Tries every innermost loop. Returns how many were marked.
pub fn vectorize_all(program: &mut Program) -> usize {
    let mut marked = 0;
    for lp in program.loops() {
        match vectorize_loop(program, lp) {
            Ok(true) => marked += 1,
            Ok(false) => {}
            Err(e) => debug!("{} not vectorized: {}", lp, e),
        }
    }
    marked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    fn nest(inner: Vec<Stmt>) -> Program {
        let spec = ProgramBuilder::spec("vec")
            .tensor("A", &[16, 16])
            .tensor("B", &[16, 16])
            .stmt(Stmt::for_range("i", 1, 16, vec![Stmt::for_range("j", 0, 16, inner)]));
        ProgramBuilder::build(&spec).expect("build")
    }

    fn ij() -> Vec<Expr> {
        vec![Expr::var("i"), Expr::var("j")]
    }

    #[test]
    fn independent_inner_loop_is_marked() {
        let mut p = nest(vec![Stmt::assign(
            "A",
            ij(),
            Expr::at("A", vec![Expr::var("i") - 1, Expr::var("j")]) + Expr::at("B", ij()),
        )]);
        assert_eq!(vectorize_all(&mut p), 1);
        let loops = p.loops();
        assert!(!p.loop_node(loops[0]).expect("loop").vectorize);
        assert!(p.loop_node(loops[1]).expect("loop").vectorize);
    }

    #[test]
    fn carried_dependence_or_print_blocks_it() {
        let mut p = nest(vec![Stmt::assign(
            "A",
            ij(),
            Expr::at("A", vec![Expr::var("i"), Expr::var("j") - 1]) + 1,
        )]);
        let inner = p.loops()[1];
        assert!(!vectorize_loop(&mut p, inner).expect("analysis"));

        let mut p = nest(vec![Stmt::print(Expr::at("A", ij()))]);
        let inner = p.loops()[1];
        assert!(!vectorize_loop(&mut p, inner).expect("analysis"));
    }
}
