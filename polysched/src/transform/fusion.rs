use log::debug;

use crate::error::Result;
use crate::ir::{NodeId, Program};

/// Merges the body of `second` into `first` and removes `second`.
///
/// Both loops must be direct siblings with `second` right after `first`,
/// and their bounds and steps must be structurally equal.
pub fn fuse(program: &mut Program, first: NodeId, second: NodeId) -> Result<bool> {
    if first == second {
        return Ok(false);
    }
    let (l1, l2) = match (program.as_loop(first), program.as_loop(second)) {
        (Some(a), Some(b)) => (a.clone(), b.clone()),
        _ => return Ok(false),
    };
    let (Some((p1, i1)), Some((p2, i2))) = (program.parent_of(first), program.parent_of(second)) else {
        return Ok(false);
    };
    if p1 != p2 || i2 != i1 + 1 {
        return Ok(false);
    }
    let same_bounds = program.structurally_equal(l1.min, l2.min)
        && program.structurally_equal(l1.max, l2.max)
        && program.structurally_equal(l1.step, l2.step);
    if !same_bounds {
        return Ok(false);
    }

    let replacement = program.var_ref(l1.var);
    for &entry in &l2.body {
        program.substitute_var(entry, l2.var, replacement);
    }
    if let Some(l) = program.as_loop_mut(first) {
        l.body.extend(l2.body.iter().copied());
        l.parallel = false;
        l.vectorize = false;
    }
    program.splice(p2, i2, Vec::new())?;
    debug!("fused {} into {}", second, first);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    fn two_loops(second_max: i64) -> Program {
        let spec = ProgramBuilder::spec("fuse")
            .tensor("A", &[8])
            .tensor("B", &[8])
            .stmt(Stmt::for_range("i", 0, 8, vec![Stmt::assign("A", vec![Expr::var("i")], 1)]))
            .stmt(Stmt::for_range(
                "j",
                0,
                second_max,
                vec![Stmt::assign("B", vec![Expr::var("j")], 2)],
            ));
        ProgramBuilder::build(&spec).expect("build")
    }

    #[test]
    fn matching_siblings_merge() {
        let mut program = two_loops(8);
        let loops = program.loops();
        assert!(fuse(&mut program, loops[0], loops[1]).expect("fuse"));
        assert_eq!(program.loops(), vec![loops[0]]);
        let l = program.loop_node(loops[0]).expect("loop");
        assert_eq!(l.body.len(), 2);
        assert_eq!(program.vars_in(l.body[1]).into_iter().collect::<Vec<_>>(), vec![l.var]);
    }

    #[test]
    fn mismatched_bounds_leave_the_program_alone() {
        let mut program = two_loops(6);
        let before = program.clone();
        let loops = program.loops();
        assert!(!fuse(&mut program, loops[0], loops[1]).expect("fuse"));
        assert!(before.nodes_equal(before.root(), &program, program.root()));
    }

    #[test]
    fn order_matters() {
        let mut program = two_loops(8);
        let loops = program.loops();
        assert!(!fuse(&mut program, loops[1], loops[0]).expect("fuse"));
    }
}
