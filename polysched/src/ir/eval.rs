//! Integer evaluation of index and bound expressions.

use std::collections::HashMap;

use super::{BinOp, Node, NodeId, Program, StmtKey, VarId};
use crate::error::{Error, Result};

pub type Env = HashMap<VarId, i64>;

pub fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if (a % b != 0) && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

pub fn floor_mod(a: i64, b: i64) -> i64 {
    a - b * floor_div(a, b)
}

/// Evaluates `id` under `env`. `None` when the expression reads a tensor or
/// a named constant, references an unbound variable, or divides by zero.
pub fn eval(program: &Program, id: NodeId, env: &Env) -> Option<i64> {
    match program.node(id) {
        Node::Int(v) => Some(*v),
        Node::Var(v) => env.get(v).copied(),
        Node::Binary { op, lhs, rhs } => {
            let a = eval(program, *lhs, env)?;
            let b = eval(program, *rhs, env)?;
            match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div if b != 0 => Some(floor_div(a, b)),
                BinOp::Mod if b != 0 => Some(floor_mod(a, b)),
                BinOp::Div | BinOp::Mod => None,
                BinOp::Min => Some(a.min(b)),
                BinOp::Max => Some(a.max(b)),
            }
        }
        _ => None,
    }
}

/// Value of an expression that references no variables.
pub fn eval_const(program: &Program, id: NodeId) -> Option<i64> {
    eval(program, id, &Env::new())
}

/// Calls `visit` for every dynamic statement instance, in execution order,
/// with the values of the enclosing loop variables (outermost first).
/// Fails when a loop bound cannot be evaluated.
pub fn for_each_instance<F>(program: &Program, mut visit: F) -> Result<()>
where
    F: FnMut(StmtKey, &[(VarId, i64)]),
{
    let mut env = Env::new();
    let mut stack = Vec::new();
    for &child in program.root_body() {
        walk(program, child, &mut env, &mut stack, &mut visit)?;
    }
    Ok(())
}

fn walk<F>(
    program: &Program,
    id: NodeId,
    env: &mut Env,
    stack: &mut Vec<(VarId, i64)>,
    visit: &mut F,
) -> Result<()>
where
    F: FnMut(StmtKey, &[(VarId, i64)]),
{
    match program.node(id) {
        Node::Loop(l) => {
            let bound = |e: NodeId| {
                eval(program, e, env).ok_or_else(|| {
                    Error::InvalidProgram(format!("bound of loop {} is not evaluable", id))
                })
            };
            let (min, max, step) = (bound(l.min)?, bound(l.max)?, bound(l.step)?);
            if step <= 0 {
                return Err(Error::InvalidProgram(format!(
                    "loop {} has non-positive step {}",
                    id, step
                )));
            }
            let mut value = min;
            while value < max {
                env.insert(l.var, value);
                stack.push((l.var, value));
                for &child in &l.body {
                    walk(program, child, env, stack, visit)?;
                }
                stack.pop();
                value += step;
            }
            env.remove(&l.var);
            Ok(())
        }
        Node::Assign { key, .. } | Node::Print { key, .. } => {
            visit(*key, stack);
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    #[test]
    fn floor_division_rounds_towards_negative_infinity() {
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(-8, 2), -4);
        assert_eq!(floor_mod(-7, 2), 1);
    }

    #[test]
    fn triangular_nest_enumerates_lower_triangle() {
        let spec = ProgramBuilder::spec("tri").tensor("A", &[4, 4]).stmt(Stmt::for_range(
            "i",
            0,
            4,
            vec![Stmt::for_range(
                "j",
                0,
                Expr::var("i") + 1,
                vec![Stmt::assign("A", vec![Expr::var("i"), Expr::var("j")], 0)],
            )],
        ));
        let program = ProgramBuilder::build(&spec).expect("build");
        let mut count = 0;
        for_each_instance(&program, |_, iters| {
            assert!(iters[1].1 <= iters[0].1);
            count += 1;
        })
        .expect("bounded");
        assert_eq!(count, 10);
    }
}
