use log::debug;

use crate::error::Result;
use crate::ir::{NodeId, Program};
use crate::sync::is_parallel;

/// Sets the parallel annotation of `lp` from the carried-dependence test.
/// Returns the new annotation.
pub fn parallelize_loop(program: &mut Program, lp: NodeId) -> Result<bool> {
    let parallel = is_parallel(program, lp)?;
    if let Some(l) = program.as_loop_mut(lp) {
        l.parallel = parallel;
    }
    Ok(parallel)
}

/// Annotates every loop. A loop whose analysis fails is left sequential.
/// Returns how many loops ended up parallel.
pub fn parallelize_all(program: &mut Program) -> usize {
    let mut marked = 0;
    for lp in program.loops() {
        match parallelize_loop(program, lp) {
            Ok(true) => marked += 1,
            Ok(false) => {}
            Err(e) => {
                debug!("{} kept sequential: {}", lp, e);
                if let Some(l) = program.as_loop_mut(lp) {
                    l.parallel = false;
                }
            }
        }
    }
    marked
}
