use log::debug;

use crate::checks::{innermost_loops, ConstantBoundaryCheck};
use crate::error::{Error, Result};
use crate::ir::{NodeId, Program};

/// Largest number of body copies a single unroll may emit.
pub const MAX_UNROLLED_COPIES: i64 = 4096;

/// Fully unrolls every innermost loop into its parent, later loops first.
/// Each copy of a statement gets a fresh key. Not applicable unless all
/// innermost loops have constant bounds.
pub fn unroll(program: &mut Program) -> Result<bool> {
    if !ConstantBoundaryCheck::innermost(program) {
        return Ok(false);
    }
    let targets = innermost_loops(program);
    if targets.is_empty() {
        return Ok(false);
    }

    let mut copies = 0;
    for &lp in &targets {
        if let Some((min, max, step)) = ConstantBoundaryCheck::bounds(program, lp) {
            if step <= 0 {
                return Ok(false);
            }
            let trips = if max > min { (max - min + step - 1) / step } else { 0 };
            copies += trips * program.loop_node(lp)?.body.len() as i64;
        }
    }
    if copies > MAX_UNROLLED_COPIES {
        debug!("unroll would emit {} copies", copies);
        return Ok(false);
    }

    for &lp in targets.iter().rev() {
        let Some((min, max, step)) = ConstantBoundaryCheck::bounds(program, lp) else {
            continue;
        };
        let l = program.loop_node(lp)?.clone();
        let (parent, index) = program.parent_of(lp).ok_or(Error::UnknownNode(lp))?;
        let mut flat: Vec<NodeId> = Vec::new();
        let mut value = min;
        while value < max {
            let literal = program.int(value);
            for &entry in &l.body {
                let (copy, _) = program.clone_subtree(entry);
                program.substitute_var(copy, l.var, literal);
                program.refresh_keys(copy);
                flat.push(copy);
            }
            value += step;
        }
        program.splice(parent, index, flat)?;
    }
    debug!("unrolled {} loops", targets.len());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, Node, ProgramBuilder, Stmt};

    #[test]
    fn inner_loop_becomes_straight_line_code() {
        let spec = ProgramBuilder::spec("unroll").tensor("A", &[4, 3]).stmt(Stmt::for_range(
            "i",
            0,
            4,
            vec![Stmt::for_range(
                "j",
                0,
                3,
                vec![Stmt::assign("A", vec![Expr::var("i"), Expr::var("j")], 1)],
            )],
        ));
        let mut program = ProgramBuilder::build(&spec).expect("build");
        assert!(unroll(&mut program).expect("unroll"));
        let loops = program.loops();
        assert_eq!(loops.len(), 1);
        let body = &program.loop_node(loops[0]).expect("loop").body;
        assert_eq!(body.len(), 3);
        let mut keys: Vec<_> = body.iter().filter_map(|&s| program.node(s).stmt_key()).collect();
        keys.dedup();
        assert_eq!(keys.len(), 3);
        assert!(body.iter().all(|&s| matches!(program.node(s), Node::Assign { .. })));
    }

    #[test]
    fn symbolic_inner_bound_is_not_applicable() {
        let spec = ProgramBuilder::spec("tri").tensor("A", &[4, 4]).stmt(Stmt::for_range(
            "i",
            0,
            4,
            vec![Stmt::for_range(
                "j",
                0,
                Expr::var("i"),
                vec![Stmt::assign("A", vec![Expr::var("i"), Expr::var("j")], 1)],
            )],
        ));
        let mut program = ProgramBuilder::build(&spec).expect("build");
        assert!(!unroll(&mut program).expect("unroll"));
        assert_eq!(program.loops().len(), 2);
    }
}
