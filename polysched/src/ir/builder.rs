//! Owned program descriptions and their conversion into the arena IR.
//!
//! The description types are what the CLI reads from JSON and what tests
//! write by hand. Names are resolved by [`ProgramBuilder`], an explicit
//! builder context: loop variables are scoped, tensors and constants must be
//! declared up front.

use std::fs;
use std::ops::{Add, Mul, Sub};
use std::path::Path as FsPath;

use serde::{Deserialize, Serialize};

use super::{BinOp, ConstDecl, Node, NodeId, Program, TensorDecl, VarId};
use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Int(i64),
    Var(String),
    Const(String),
    Access { tensor: String, indices: Vec<Expr> },
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
    Mod(Box<Expr>, Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn int(value: i64) -> Expr {
        Expr::Int(value)
    }

    pub fn var(name: &str) -> Expr {
        Expr::Var(name.to_string())
    }

    pub fn constant(name: &str) -> Expr {
        Expr::Const(name.to_string())
    }

    pub fn at(tensor: &str, indices: Vec<Expr>) -> Expr {
        Expr::Access {
            tensor: tensor.to_string(),
            indices,
        }
    }

    pub fn div(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Expr {
        Expr::Div(Box::new(lhs.into()), Box::new(rhs.into()))
    }

    pub fn modulo(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Expr {
        Expr::Mod(Box::new(lhs.into()), Box::new(rhs.into()))
    }

    pub fn min(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Expr {
        Expr::Min(Box::new(lhs.into()), Box::new(rhs.into()))
    }

    pub fn max(lhs: impl Into<Expr>, rhs: impl Into<Expr>) -> Expr {
        Expr::Max(Box::new(lhs.into()), Box::new(rhs.into()))
    }

    fn one() -> Expr {
        Expr::Int(1)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Int(value)
    }
}

macro_rules! expr_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl<T: Into<Expr>> $trait<T> for Expr {
            type Output = Expr;

            fn $method(self, rhs: T) -> Expr {
                Expr::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

expr_op!(Add, add, Add);
expr_op!(Sub, sub, Sub);
expr_op!(Mul, mul, Mul);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stmt {
    Loop {
        var: String,
        min: Expr,
        max: Expr,
        #[serde(default = "Expr::one")]
        step: Expr,
        body: Vec<Stmt>,
    },
    Assign {
        tensor: String,
        indices: Vec<Expr>,
        value: Expr,
    },
    Print {
        value: Expr,
    },
}

impl Stmt {
    pub fn for_range(
        var: &str,
        min: impl Into<Expr>,
        max: impl Into<Expr>,
        body: Vec<Stmt>,
    ) -> Stmt {
        Stmt::for_step(var, min, max, 1, body)
    }

    pub fn for_step(
        var: &str,
        min: impl Into<Expr>,
        max: impl Into<Expr>,
        step: impl Into<Expr>,
        body: Vec<Stmt>,
    ) -> Stmt {
        Stmt::Loop {
            var: var.to_string(),
            min: min.into(),
            max: max.into(),
            step: step.into(),
            body,
        }
    }

    pub fn assign(tensor: &str, indices: Vec<Expr>, value: impl Into<Expr>) -> Stmt {
        Stmt::Assign {
            tensor: tensor.to_string(),
            indices,
            value: value.into(),
        }
    }

    pub fn print(value: impl Into<Expr>) -> Stmt {
        Stmt::Print {
            value: value.into(),
        }
    }
}

/// A complete program description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgramSpec {
    pub name: String,
    #[serde(default)]
    pub tensors: Vec<TensorDecl>,
    #[serde(default)]
    pub constants: Vec<ConstDecl>,
    pub body: Vec<Stmt>,
}

impl ProgramSpec {
    pub fn new(name: &str) -> Self {
        ProgramSpec {
            name: name.to_string(),
            tensors: Vec::new(),
            constants: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn tensor(mut self, name: &str, shape: &[i64]) -> Self {
        self.tensors.push(TensorDecl {
            name: name.to_string(),
            shape: shape.to_vec(),
        });
        self
    }

    pub fn constant(mut self, name: &str, value: f64) -> Self {
        self.constants.push(ConstDecl {
            name: name.to_string(),
            value,
        });
        self
    }

    pub fn stmt(mut self, stmt: Stmt) -> Self {
        self.body.push(stmt);
        self
    }
}

/// Lowers a [`ProgramSpec`] into a [`Program`].
pub struct ProgramBuilder {
    program: Program,
    scopes: Vec<(String, VarId)>,
}

impl ProgramBuilder {
    pub fn spec(name: &str) -> ProgramSpec {
        ProgramSpec::new(name)
    }

    pub fn build(spec: &ProgramSpec) -> Result<Program> {
        let mut program = Program::new(spec.name.clone());
        for t in &spec.tensors {
            if program.tensor_by_name(&t.name).is_some() {
                return Err(Error::InvalidProgram(format!("tensor {} declared twice", t.name)));
            }
            program.add_tensor(t.name.clone(), t.shape.clone());
        }
        for c in &spec.constants {
            program.add_const(c.name.clone(), c.value);
        }

        let mut builder = ProgramBuilder {
            program,
            scopes: Vec::new(),
        };
        let mut body = Vec::with_capacity(spec.body.len());
        for stmt in &spec.body {
            body.push(builder.lower_stmt(stmt)?);
        }
        let root = builder.program.root();
        if let Some(root_body) = builder.program.node_mut(root).body_mut() {
            *root_body = body;
        }
        Ok(builder.program)
    }

    pub fn from_json(text: &str) -> Result<Program> {
        let spec: ProgramSpec = serde_json::from_str(text)?;
        ProgramBuilder::build(&spec)
    }

    pub fn from_file(path: &FsPath) -> Result<Program> {
        let text = fs::read_to_string(path)?;
        ProgramBuilder::from_json(&text)
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<NodeId> {
        match stmt {
            Stmt::Loop {
                var,
                min,
                max,
                step,
                body,
            } => {
                // Bounds are evaluated outside the loop's own scope.
                let min = self.lower_expr(min)?;
                let max = self.lower_expr(max)?;
                let step = self.lower_expr(step)?;
                let id = self.program.fresh_var();
                self.scopes.push((var.clone(), id));
                let lowered: Result<Vec<NodeId>> =
                    body.iter().map(|s| self.lower_stmt(s)).collect();
                self.scopes.pop();
                let lp = self.program.new_loop(id, min, max, step);
                if let Some(l) = self.program.as_loop_mut(lp) {
                    l.body = lowered?;
                }
                Ok(lp)
            }
            Stmt::Assign {
                tensor,
                indices,
                value,
            } => {
                let lhs = self.lower_access(tensor, indices)?;
                let rhs = self.lower_expr(value)?;
                let key = self.program.fresh_key();
                Ok(self.program.alloc(Node::Assign { key, lhs, rhs }))
            }
            Stmt::Print { value } => {
                let value = self.lower_expr(value)?;
                let key = self.program.fresh_key();
                Ok(self.program.alloc(Node::Print { key, value }))
            }
        }
    }

    fn lower_access(&mut self, tensor: &str, indices: &[Expr]) -> Result<NodeId> {
        let id = self
            .program
            .tensor_by_name(tensor)
            .ok_or_else(|| Error::InvalidProgram(format!("unknown tensor {}", tensor)))?;
        let rank = self.program.tensor(id).shape.len();
        if rank != indices.len() {
            return Err(Error::InvalidProgram(format!(
                "tensor {} has rank {} but is indexed with {} subscripts",
                tensor,
                rank,
                indices.len()
            )));
        }
        let indices = indices
            .iter()
            .map(|e| self.lower_expr(e))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.program.alloc(Node::Access {
            tensor: id,
            indices,
        }))
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<NodeId> {
        let (op, lhs, rhs) = match expr {
            Expr::Int(v) => return Ok(self.program.int(*v)),
            Expr::Var(name) => {
                let var = self
                    .scopes
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| *v)
                    .ok_or_else(|| Error::InvalidProgram(format!("unbound variable {}", name)))?;
                return Ok(self.program.var_ref(var));
            }
            Expr::Const(name) => {
                let id = self
                    .program
                    .const_by_name(name)
                    .ok_or_else(|| Error::InvalidProgram(format!("unknown constant {}", name)))?;
                return Ok(self.program.alloc(Node::Const(id)));
            }
            Expr::Access { tensor, indices } => return self.lower_access(tensor, indices),
            Expr::Add(l, r) => (BinOp::Add, l, r),
            Expr::Sub(l, r) => (BinOp::Sub, l, r),
            Expr::Mul(l, r) => (BinOp::Mul, l, r),
            Expr::Div(l, r) => (BinOp::Div, l, r),
            Expr::Mod(l, r) => (BinOp::Mod, l, r),
            Expr::Min(l, r) => (BinOp::Min, l, r),
            Expr::Max(l, r) => (BinOp::Max, l, r),
        };
        let lhs = self.lower_expr(lhs)?;
        let rhs = self.lower_expr(rhs)?;
        Ok(self.program.binary(op, lhs, rhs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip_builds_the_same_program() {
        let spec = ProgramBuilder::spec("copy")
            .tensor("A", &[8])
            .tensor("B", &[8])
            .stmt(Stmt::for_range(
                "i",
                0,
                8,
                vec![Stmt::assign(
                    "A",
                    vec![Expr::var("i")],
                    Expr::at("B", vec![Expr::var("i")]) + 1,
                )],
            ));
        let text = serde_json::to_string(&spec).expect("serialize");
        let a = ProgramBuilder::build(&spec).expect("build");
        let b = ProgramBuilder::from_json(&text).expect("parse");
        assert!(a.nodes_equal(a.root(), &b, b.root()));
    }

    #[test]
    fn unknown_names_are_rejected() {
        let spec = ProgramBuilder::spec("bad")
            .tensor("A", &[8])
            .stmt(Stmt::assign("A", vec![Expr::var("k")], 0));
        assert!(matches!(
            ProgramBuilder::build(&spec),
            Err(Error::InvalidProgram(_))
        ));

        let spec = ProgramBuilder::spec("bad").stmt(Stmt::assign("Z", vec![], 0));
        assert!(ProgramBuilder::build(&spec).is_err());
    }

    #[test]
    fn rank_mismatch_is_rejected() {
        let spec = ProgramBuilder::spec("bad")
            .tensor("A", &[8, 8])
            .stmt(Stmt::assign("A", vec![Expr::int(0)], 0));
        assert!(ProgramBuilder::build(&spec).is_err());
    }

    #[test]
    fn step_defaults_to_one_in_json() {
        let text = r#"{
            "name": "k",
            "tensors": [{"name": "A", "shape": [4]}],
            "body": [{"loop": {"var": "i", "min": {"int": 0}, "max": {"int": 4},
                "body": [{"assign": {"tensor": "A", "indices": [{"var": "i"}], "value": {"int": 0}}}]}}]
        }"#;
        let program = ProgramBuilder::from_json(text).expect("parse");
        let l = program.loop_node(program.loops()[0]).expect("loop");
        assert_eq!(*program.node(l.step), Node::Int(1));
    }
}
