use log::debug;

use crate::error::{Error, Result};
use crate::ir::{NodeId, Program};

/// Copy of the header of `lp` with a fresh variable holding `body`, with
/// the old variable renamed inside `body`.
pub(crate) fn clone_header(program: &mut Program, lp: NodeId, body: Vec<NodeId>) -> Result<NodeId> {
    let l = program.loop_node(lp)?.clone();
    let var = program.fresh_var();
    let replacement = program.var_ref(var);
    for &entry in &body {
        program.substitute_var(entry, l.var, replacement);
    }
    let min = program.copy_expr(l.min);
    let max = program.copy_expr(l.max);
    let step = program.copy_expr(l.step);
    let copy = program.new_loop(var, min, max, step);
    if let Some(c) = program.as_loop_mut(copy) {
        c.body = body;
        c.parallel = l.parallel;
        c.vectorize = l.vectorize;
    }
    Ok(copy)
}

/// Distributes a loop over its body: one loop per body entry, in order,
/// all with the original bounds. The first keeps the original node.
pub fn fission(program: &mut Program, lp: NodeId) -> Result<bool> {
    let body = program.loop_node(lp)?.body.clone();
    if body.len() < 2 {
        return Ok(false);
    }
    let (parent, index) = program.parent_of(lp).ok_or(Error::UnknownNode(lp))?;

    let mut loops = vec![lp];
    for &entry in &body[1..] {
        loops.push(clone_header(program, lp, vec![entry])?);
    }
    if let Some(l) = program.as_loop_mut(lp) {
        l.body = vec![body[0]];
    }
    program.splice(parent, index, loops)?;
    debug!("fission of {} into {} loops", lp, body.len());
    Ok(true)
}
