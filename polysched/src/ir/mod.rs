//! Loop-nest IR
//!
//! Programs are stored as an arena of [`Node`]s addressed by [`NodeId`].
//! Every node kind lives in one tagged union so passes match exhaustively.
//! Loops and statements are reached through the body lists of the root
//! block and of enclosing loops; expressions hang off statements and loop
//! headers.
//!
//! # Identity
//!
//! - [`NodeId`]: position in the arena of one [`Program`]. Stable while the
//!   program lives; [`Program::deep_clone`] returns an old→new map.
//! - [`VarId`]: iteration variable, unique across a program and preserved by
//!   cloning.
//! - [`StmtKey`]: statement identity, preserved by cloning and by every
//!   transform that moves statements without duplicating them.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod builder;
pub mod eval;
mod program;

pub use builder::{Expr, ProgramBuilder, ProgramSpec, Stmt};
pub use program::{IdMap, Path, Program};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Arena slot of a node.
    NodeId,
    "n"
);
id_type!(
    /// Iteration variable of a loop.
    VarId,
    "i"
);
id_type!(
    /// Identity of an assignment or print statement.
    StmtKey,
    "S"
);
id_type!(TensorId, "T");
id_type!(ConstId, "C");

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    /// Floor division.
    Div,
    Mod,
    Min,
    Max,
}

impl BinOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Min => "min",
            BinOp::Max => "max",
        }
    }
}

/// Header and body of a `for` loop. The loop runs `var` from `min`
/// (inclusive) to `max` (exclusive) by `step`.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopNode {
    pub var: VarId,
    pub min: NodeId,
    pub max: NodeId,
    pub step: NodeId,
    pub body: Vec<NodeId>,
    /// Set by the Parallelize transform.
    pub parallel: bool,
    /// Set by the Vectorize transform.
    pub vectorize: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    Int(i64),
    Var(VarId),
    Const(ConstId),
    Binary { op: BinOp, lhs: NodeId, rhs: NodeId },
    Access { tensor: TensorId, indices: Vec<NodeId> },
    Assign { key: StmtKey, lhs: NodeId, rhs: NodeId },
    Print { key: StmtKey, value: NodeId },
    Loop(LoopNode),
    /// Root of a program.
    Block(Vec<NodeId>),
}

impl Node {
    /// Children in evaluation order: loop header expressions come before
    /// the body.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Node::Int(_) | Node::Var(_) | Node::Const(_) => Vec::new(),
            Node::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Node::Access { indices, .. } => indices.clone(),
            Node::Assign { lhs, rhs, .. } => vec![*lhs, *rhs],
            Node::Print { value, .. } => vec![*value],
            Node::Loop(l) => {
                let mut out = vec![l.min, l.max, l.step];
                out.extend_from_slice(&l.body);
                out
            }
            Node::Block(body) => body.clone(),
        }
    }

    pub fn is_statement(&self) -> bool {
        matches!(self, Node::Assign { .. } | Node::Print { .. })
    }

    pub fn stmt_key(&self) -> Option<StmtKey> {
        match self {
            Node::Assign { key, .. } | Node::Print { key, .. } => Some(*key),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&Vec<NodeId>> {
        match self {
            Node::Loop(l) => Some(&l.body),
            Node::Block(body) => Some(body),
            _ => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Vec<NodeId>> {
        match self {
            Node::Loop(l) => Some(&mut l.body),
            Node::Block(body) => Some(body),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TensorDecl {
    pub name: String,
    pub shape: Vec<i64>,
}

/// Named scalar. Usable as a value, never inside index or bound expressions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstDecl {
    pub name: String,
    pub value: f64,
}
