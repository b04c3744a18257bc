//! Clean-up passes run on a finished schedule: constant folding of index
//! and bound expressions, and removal of statements that never execute.

use std::collections::HashSet;

use log::debug;

use crate::dependency::domain_set;
use crate::error::Result;
use crate::ir::eval::eval_const;
use crate::ir::{BinOp, Node, NodeId, Program, StmtKey};
use crate::poly::Extractor;

fn int_value(program: &Program, id: NodeId) -> Option<i64> {
    match program.node(id) {
        Node::Int(v) => Some(*v),
        _ => None,
    }
}

/// Folds the integer expression `id` bottom-up, in place. Returns the
/// number of nodes rewritten.
fn fold_expr(program: &mut Program, id: NodeId) -> usize {
    let Node::Binary { op, lhs, rhs } = program.node(id).clone() else {
        return 0;
    };
    let mut changed = fold_expr(program, lhs) + fold_expr(program, rhs);
    let replacement = match (op, int_value(program, lhs), int_value(program, rhs)) {
        (_, Some(_), Some(_)) => eval_const(program, id).map(Node::Int),
        (BinOp::Mul, Some(0), _) | (BinOp::Mul, _, Some(0)) => Some(Node::Int(0)),
        (BinOp::Add, Some(0), _) | (BinOp::Mul, Some(1), _) => Some(program.node(rhs).clone()),
        (BinOp::Add | BinOp::Sub, _, Some(0)) | (BinOp::Mul | BinOp::Div, _, Some(1)) => {
            Some(program.node(lhs).clone())
        }
        _ => None,
    };
    if let Some(node) = replacement {
        *program.node_mut(id) = node;
        changed += 1;
    }
    changed
}

/// Folds constant subexpressions and arithmetic identities (`x + 0`,
/// `x * 1`, `x * 0`, `x / 1`) in every loop header and tensor subscript.
/// Value expressions are left alone. Returns the number of rewrites.
pub fn fold_constants(program: &mut Program) -> usize {
    let mut roots = Vec::new();
    for lp in program.loops() {
        if let Some(l) = program.as_loop(lp) {
            roots.extend([l.min, l.max, l.step]);
        }
    }
    for s in program.statements() {
        for n in program.subtree(s) {
            if let Node::Access { indices, .. } = program.node(n) {
                roots.extend(indices.iter().copied());
            }
        }
    }
    let changed = roots.into_iter().map(|r| fold_expr(program, r)).sum();
    if changed > 0 {
        debug!("folded {} expression node(s) in {}", changed, program.name());
    }
    changed
}

/// Drops dead statements and the loops left empty below `parent`.
fn prune(program: &mut Program, parent: NodeId, dead: &HashSet<StmtKey>) -> usize {
    let body = program.node(parent).body().cloned().unwrap_or_default();
    let mut kept = Vec::with_capacity(body.len());
    let mut removed = 0;
    for child in body {
        if let Some(key) = program.node(child).stmt_key() {
            if dead.contains(&key) {
                removed += 1;
                continue;
            }
        } else if program.as_loop(child).is_some() {
            removed += prune(program, child, dead);
            if program.node(child).body().map_or(true, |b| b.is_empty()) {
                removed += 1;
                continue;
            }
        }
        kept.push(child);
    }
    if let Some(b) = program.node_mut(parent).body_mut() {
        *b = kept;
    }
    removed
}

/// Removes statements whose iteration domain is empty, then every loop
/// whose body ends up empty. Returns how many nodes were removed.
pub fn eliminate_dead_code(program: &mut Program) -> Result<usize> {
    let model = Extractor::extract(program)?;
    let mut dead = HashSet::new();
    for stmt in &model.statements {
        if domain_set(stmt)?.is_empty()? {
            dead.insert(stmt.key);
        }
    }
    let root = program.root();
    let removed = prune(program, root, &dead);
    if removed > 0 {
        debug!("removed {} dead node(s) from {}", removed, program.name());
    }
    Ok(removed)
}
