//! Legality Verification
//!
//! A rewrite is legal when every dependence of the original program is still
//! honoured by the rewritten one. Both programs are re-extracted from
//! scratch and a relation `T` maps original logical time to rewritten
//! logical time, one piece per statement:
//!
//! ```text
//! T = ∪_S { sched_orig(S)(i) -> sched_new(S)(π(i)) }
//! ```
//!
//! where `π` pairs iteration variables by identity when a variable survives
//! the rewrite and by position otherwise. For every dependence kind the
//! original relation is pushed through `T` on both sides; any pair that is
//! not also a dependence of the rewritten program (a pair whose order was
//! flipped or whose accesses no longer meet) is a conflict.

use std::collections::HashMap;

use log::debug;

use crate::dependency::{schedule_map, DependencyModel};
use crate::error::{Error, Result};
use crate::ir::Program;
use crate::poly::{Extractor, PolyhedralModel, Statement};
use crate::solver::{BasicMap, Space, Tuple, UnionMap};

/// Decides whether `transformed` may replace `original`.
///
/// Implementations must be pure: the search calls them on throwaway clones
/// from several places and caches nothing.
pub trait LegalityChecker {
    fn is_legal(&self, original: &Program, transformed: &Program) -> Result<bool>;
}

/// Re-derives both polyhedral models and all three dependence kinds on
/// every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct FullModelVerifier;

impl LegalityChecker for FullModelVerifier {
    fn is_legal(&self, original: &Program, transformed: &Program) -> Result<bool> {
        let before = Extractor::extract(original)?;
        let after = Extractor::extract(transformed)?;
        let t = transform_relation(&before, &after)?;

        let deps_before = DependencyModel::analyze(&before)?;
        let deps_after = DependencyModel::analyze(&after)?;

        for (src, tgt) in deps_before.maps().into_iter().zip(deps_after.maps()) {
            let mapped = src.relation().apply_domain(&t)?.apply_range(&t)?;
            let conflict = mapped.subtract(tgt.relation())?;
            if !conflict.is_empty()? {
                debug!("{} dependence violated by {}", src.kind(), transformed.name());
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Position in `after` of every iteration of `before`, outermost first.
fn iteration_correspondence(before: &Statement, after: &Statement) -> Result<Vec<usize>> {
    let new_vars = after.iterators();
    let by_name: HashMap<_, _> = new_vars.iter().enumerate().map(|(k, v)| (*v, k)).collect();
    let mut out = Vec::with_capacity(before.depth());
    for (p, var) in before.iterators().into_iter().enumerate() {
        match by_name.get(&var) {
            Some(&q) => out.push(q),
            None if p < after.depth() => out.push(p),
            None => {
                return Err(Error::InvalidProgram(format!(
                    "{} lost iteration {} in the rewrite",
                    before.key, var
                )))
            }
        }
    }
    Ok(out)
}

/// `{ S[i] -> S[i'] : i'[π(p)] = i[p] }` for one statement.
fn instance_map(before: &Statement, after: &Statement) -> Result<BasicMap> {
    let pi = iteration_correspondence(before, after)?;
    let mut map = BasicMap::universe(Space::map(
        Tuple::named(&before.tuple_name(), before.depth()),
        Tuple::named(&after.tuple_name(), after.depth()),
    ));
    for (p, q) in pi.into_iter().enumerate() {
        map.equate(map.in_col(p), map.out_col(q));
    }
    Ok(map)
}

/// Original logical time to rewritten logical time, one piece per
/// statement of `before`.
pub fn transform_relation(before: &PolyhedralModel, after: &PolyhedralModel) -> Result<UnionMap> {
    let (dims_before, dims_after) = (before.schedule_dims(), after.schedule_dims());
    let mut t = UnionMap::new();
    for stmt in &before.statements {
        let counterpart = after
            .statement(stmt.key)
            .ok_or(Error::MissingStatement(stmt.key))?;
        let instances = instance_map(stmt, counterpart)?;
        let Some(to_instances) = schedule_map(stmt, dims_before).reverse().apply_range(&instances)? else {
            continue;
        };
        if let Some(piece) = to_instances.apply_range(&schedule_map(counterpart, dims_after))? {
            t.push(piece);
        }
    }
    Ok(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    #[test]
    fn identity_is_legal() {
        let spec = ProgramBuilder::spec("id").tensor("A", &[16]).stmt(Stmt::for_range(
            "i",
            0,
            15,
            vec![Stmt::assign(
                "A",
                vec![Expr::var("i") + 1],
                Expr::at("A", vec![Expr::var("i")]),
            )],
        ));
        let program = ProgramBuilder::build(&spec).expect("build");
        assert!(FullModelVerifier
            .is_legal(&program, &program.clone())
            .expect("analysis"));
    }

    #[test]
    fn swapping_dependent_statements_is_illegal() {
        let spec = ProgramBuilder::spec("swap")
            .tensor("A", &[4])
            .tensor("B", &[4])
            .stmt(Stmt::assign("A", vec![Expr::int(0)], 1))
            .stmt(Stmt::assign("B", vec![Expr::int(0)], Expr::at("A", vec![Expr::int(0)])));
        let program = ProgramBuilder::build(&spec).expect("build");
        let mut swapped = program.clone();
        let root = swapped.root();
        if let Some(body) = swapped.node_mut(root).body_mut() {
            body.swap(0, 1);
        }
        assert!(!FullModelVerifier.is_legal(&program, &swapped).expect("analysis"));
    }

    #[test]
    fn dropped_statement_is_an_error() {
        let spec = ProgramBuilder::spec("drop")
            .tensor("A", &[4])
            .stmt(Stmt::assign("A", vec![Expr::int(0)], 1))
            .stmt(Stmt::assign("A", vec![Expr::int(1)], 2));
        let program = ProgramBuilder::build(&spec).expect("build");
        let mut shorter = program.clone();
        let root = shorter.root();
        if let Some(body) = shorter.node_mut(root).body_mut() {
            body.pop();
        }
        assert!(matches!(
            FullModelVerifier.is_legal(&program, &shorter),
            Err(Error::MissingStatement(_))
        ));
    }
}
