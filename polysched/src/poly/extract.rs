//! Polyhedral extraction
//!
//! Walks the IR keeping a stack of enclosing [`Iteration`]s and a stack of
//! sibling positions, and turns every assignment and print into a
//! [`Statement`]. Index and bound expressions must be quasi-affine:
//!
//! - `+`/`-` combine over the common divisor; at most one side may divide
//! - `*` needs one operand without variables
//! - `/` is floor division by a constant
//! - overflowing coefficients are rejected
//! - `%`, named constants and tensor reads are rejected
//!
//! `max` in a lower bound and `min` in an upper bound become several
//! bounds of the same iteration.

use log::debug;

use super::model::{AccessKind, ArrayAccess, Iteration, PolyhedralModel, QuasiAffine, Statement};
use crate::error::{Error, Result};
use crate::ir::eval::eval_const;
use crate::ir::{BinOp, Node, NodeId, Program, StmtKey};

/// Converts an index or bound expression into quasi-affine form.
pub fn to_affine(program: &Program, id: NodeId) -> Result<QuasiAffine> {
    match program.node(id) {
        Node::Int(v) => Ok(QuasiAffine::constant(*v)),
        Node::Var(v) => Ok(QuasiAffine::var(*v)),
        Node::Const(c) => Err(Error::UnsupportedAffine(format!(
            "named constant {} in an affine position",
            program.constant(*c).name
        ))),
        Node::Access { tensor, .. } => Err(Error::UnsupportedAffine(format!(
            "read of {} in an affine position",
            program.tensor(*tensor).name
        ))),
        Node::Binary { op, lhs, rhs } => {
            if *op == BinOp::Mod {
                return Err(Error::UnsupportedAffine("modulo".into()));
            }
            if matches!(op, BinOp::Min | BinOp::Max) {
                return Err(Error::UnsupportedAffine(format!(
                    "{} outside of a loop bound",
                    op.symbol()
                )));
            }
            let a = to_affine(program, *lhs)?;
            let b = to_affine(program, *rhs)?;
            match op {
                BinOp::Add => a.add(&b),
                BinOp::Sub => a.sub(&b),
                BinOp::Mul if b.is_pure_constant() => a.mul_const(&b),
                BinOp::Mul if a.is_pure_constant() => b.mul_const(&a),
                BinOp::Mul => Err(Error::UnsupportedAffine("product of two variables".into())),
                BinOp::Div if b.is_pure_constant() && b.constant != 0 => a.div_const(&b),
                BinOp::Div => Err(Error::UnsupportedAffine("division by a non-constant".into())),
                BinOp::Mod | BinOp::Min | BinOp::Max => unreachable!("rejected above"),
            }
        }
        other => Err(Error::InvalidProgram(format!(
            "{:?} is not an expression",
            std::mem::discriminant(other)
        ))),
    }
}

/// Bound expressions of one side. `split` is the operator that denotes a
/// conjunction on that side (`max` for lower bounds, `min` for upper).
fn bound_terms(program: &Program, id: NodeId, split: BinOp) -> Result<Vec<QuasiAffine>> {
    match program.node(id) {
        Node::Binary { op, lhs, rhs } if *op == split => {
            let mut out = bound_terms(program, *lhs, split)?;
            out.extend(bound_terms(program, *rhs, split)?);
            Ok(out)
        }
        _ => Ok(vec![to_affine(program, id)?]),
    }
}

/// Polyhedral view of the loop header `loop_id`.
pub fn iteration_of(program: &Program, loop_id: NodeId) -> Result<Iteration> {
    let l = program.loop_node(loop_id)?;
    if eval_const(program, l.step) != Some(1) {
        return Err(Error::NotNormalized(loop_id));
    }
    let lower = bound_terms(program, l.min, BinOp::Max)?;
    let upper = bound_terms(program, l.max, BinOp::Min)?
        .into_iter()
        .map(|mut u| {
            // exclusive -> inclusive
            u.constant = u
                .constant
                .checked_sub(u.divisor)
                .ok_or_else(|| Error::UnsupportedAffine(format!("upper bound {} overflows", u)))?;
            Ok(u)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Iteration {
        var: l.var,
        lower,
        upper,
    })
}

pub struct Extractor<'a> {
    program: &'a Program,
    iterations: Vec<Iteration>,
    context: Vec<i64>,
    statements: Vec<Statement>,
}

impl<'a> Extractor<'a> {
    fn new(program: &'a Program) -> Self {
        Extractor {
            program,
            iterations: Vec::new(),
            context: Vec::new(),
            statements: Vec::new(),
        }
    }

    /// Model of the whole program.
    pub fn extract(program: &'a Program) -> Result<PolyhedralModel> {
        let mut ex = Extractor::new(program);
        ex.visit_body(program.root_body())?;
        debug!("extracted {} statements from {}", ex.statements.len(), program.name());
        Ok(PolyhedralModel {
            statements: ex.statements,
        })
    }

    /// Model of the subtree `node` alone, as if nested in `enclosing`
    /// (outermost first) at context position `prefix`.
    pub fn extract_region(
        program: &'a Program,
        node: NodeId,
        enclosing: &[NodeId],
        prefix: &[i64],
    ) -> Result<PolyhedralModel> {
        let mut ex = Extractor::new(program);
        for &l in enclosing {
            let it = iteration_of(program, l)?;
            ex.check_bound_vars(&it)?;
            ex.iterations.push(it);
        }
        ex.context = prefix.to_vec();
        ex.visit(node)?;
        Ok(PolyhedralModel {
            statements: ex.statements,
        })
    }

    fn visit_body(&mut self, body: &[NodeId]) -> Result<()> {
        for (i, &child) in body.iter().enumerate() {
            self.context.push(i as i64);
            let res = self.visit(child);
            self.context.pop();
            res?;
        }
        Ok(())
    }

    fn visit(&mut self, id: NodeId) -> Result<()> {
        let program = self.program;
        match program.node(id) {
            Node::Loop(l) => {
                let it = iteration_of(program, id)?;
                self.check_bound_vars(&it)?;
                self.iterations.push(it);
                let res = self.visit_body(&l.body);
                self.iterations.pop();
                res
            }
            Node::Assign { key, lhs, rhs } => {
                let mut accesses = Vec::new();
                match program.node(*lhs) {
                    Node::Access { .. } => self.collect_access(*lhs, AccessKind::Write, &mut accesses)?,
                    _ => {
                        return Err(Error::InvalidProgram(format!(
                            "left-hand side of {} is not a tensor access",
                            key
                        )))
                    }
                }
                self.collect_reads(*rhs, &mut accesses)?;
                self.stamp(*key, accesses)
            }
            Node::Print { key, value } => {
                let mut accesses = Vec::new();
                self.collect_reads(*value, &mut accesses)?;
                self.stamp(*key, accesses)
            }
            Node::Block(body) => self.visit_body(body),
            _ => Ok(()),
        }
    }

    fn collect_access(&self, id: NodeId, kind: AccessKind, out: &mut Vec<ArrayAccess>) -> Result<()> {
        if let Node::Access { tensor, indices } = self.program.node(id) {
            let indices = indices
                .iter()
                .map(|&e| to_affine(self.program, e))
                .collect::<Result<Vec<_>>>()?;
            out.push(ArrayAccess {
                kind,
                tensor: self.program.tensor(*tensor).name.clone(),
                indices,
            });
        }
        Ok(())
    }

    fn collect_reads(&self, id: NodeId, out: &mut Vec<ArrayAccess>) -> Result<()> {
        match self.program.node(id) {
            Node::Access { .. } => self.collect_access(id, AccessKind::Read, out),
            other => {
                for child in other.children() {
                    self.collect_reads(child, out)?;
                }
                Ok(())
            }
        }
    }

    fn check_bound_vars(&self, it: &Iteration) -> Result<()> {
        for e in it.lower.iter().chain(&it.upper) {
            for v in e.coeffs.keys() {
                if !self.iterations.iter().any(|outer| outer.var == *v) {
                    return Err(Error::UnboundVariable(*v));
                }
            }
        }
        Ok(())
    }

    fn stamp(&mut self, key: StmtKey, accesses: Vec<ArrayAccess>) -> Result<()> {
        for a in &accesses {
            for e in &a.indices {
                for v in e.coeffs.keys() {
                    if !self.iterations.iter().any(|it| it.var == *v) {
                        return Err(Error::UnboundVariable(*v));
                    }
                }
            }
        }
        self.statements.push(Statement {
            key,
            accesses,
            domain: self.iterations.clone(),
            context: self.context.clone(),
        });
        Ok(())
    }
}
