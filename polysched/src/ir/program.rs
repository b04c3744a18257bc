use std::collections::{BTreeSet, HashMap};

use super::{
    BinOp, ConstDecl, ConstId, LoopNode, Node, NodeId, StmtKey, TensorDecl, TensorId, VarId,
};
use crate::error::{Error, Result};

/// Old-id → new-id correspondence produced by cloning.
pub type IdMap = HashMap<NodeId, NodeId>;

/// Position of a structural node: body indices walked from the root block.
pub type Path = Vec<usize>;

/// A loop-nest program: arena, root block and declarations.
#[derive(Clone, Debug)]
pub struct Program {
    name: String,
    nodes: Vec<Node>,
    root: NodeId,
    tensors: Vec<TensorDecl>,
    consts: Vec<ConstDecl>,
    next_var: u32,
    next_stmt: u32,
}

impl Program {
    pub fn new(name: impl Into<String>) -> Self {
        Program {
            name: name.into(),
            nodes: vec![Node::Block(Vec::new())],
            root: NodeId(0),
            tensors: Vec::new(),
            consts: Vec::new(),
            next_var: 0,
            next_stmt: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn root_body(&self) -> &[NodeId] {
        match self.node(self.root) {
            Node::Block(body) => body,
            _ => &[],
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Number of arena slots, including garbage left behind by rewrites.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    // ========================================================================
    // Allocation
    // ========================================================================

    pub fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn int(&mut self, value: i64) -> NodeId {
        self.alloc(Node::Int(value))
    }

    pub fn var_ref(&mut self, var: VarId) -> NodeId {
        self.alloc(Node::Var(var))
    }

    pub fn binary(&mut self, op: BinOp, lhs: NodeId, rhs: NodeId) -> NodeId {
        self.alloc(Node::Binary { op, lhs, rhs })
    }

    pub fn fresh_var(&mut self) -> VarId {
        let var = VarId(self.next_var);
        self.next_var += 1;
        var
    }

    pub fn fresh_key(&mut self) -> StmtKey {
        let key = StmtKey(self.next_stmt);
        self.next_stmt += 1;
        key
    }

    /// Allocates a loop header with an empty body.
    pub fn new_loop(&mut self, var: VarId, min: NodeId, max: NodeId, step: NodeId) -> NodeId {
        self.alloc(Node::Loop(LoopNode {
            var,
            min,
            max,
            step,
            body: Vec::new(),
            parallel: false,
            vectorize: false,
        }))
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    pub fn add_tensor(&mut self, name: impl Into<String>, shape: Vec<i64>) -> TensorId {
        self.tensors.push(TensorDecl {
            name: name.into(),
            shape,
        });
        TensorId(self.tensors.len() as u32 - 1)
    }

    pub fn tensors(&self) -> &[TensorDecl] {
        &self.tensors
    }

    pub fn tensor(&self, id: TensorId) -> &TensorDecl {
        &self.tensors[id.index()]
    }

    pub fn tensor_by_name(&self, name: &str) -> Option<TensorId> {
        self.tensors
            .iter()
            .position(|t| t.name == name)
            .map(|i| TensorId(i as u32))
    }

    pub fn add_const(&mut self, name: impl Into<String>, value: f64) -> ConstId {
        self.consts.push(ConstDecl {
            name: name.into(),
            value,
        });
        ConstId(self.consts.len() as u32 - 1)
    }

    pub fn consts(&self) -> &[ConstDecl] {
        &self.consts
    }

    pub fn constant(&self, id: ConstId) -> &ConstDecl {
        &self.consts[id.index()]
    }

    pub fn const_by_name(&self, name: &str) -> Option<ConstId> {
        self.consts
            .iter()
            .position(|c| c.name == name)
            .map(|i| ConstId(i as u32))
    }

    // ========================================================================
    // Structure queries
    // ========================================================================

    pub fn as_loop(&self, id: NodeId) -> Option<&LoopNode> {
        match self.node(id) {
            Node::Loop(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_loop_mut(&mut self, id: NodeId) -> Option<&mut LoopNode> {
        match self.node_mut(id) {
            Node::Loop(l) => Some(l),
            _ => None,
        }
    }

    pub fn loop_node(&self, id: NodeId) -> Result<&LoopNode> {
        self.as_loop(id).ok_or(Error::NotALoop(id))
    }

    fn visit_structure(&self, id: NodeId, f: &mut impl FnMut(NodeId)) {
        if id != self.root {
            f(id);
        }
        if let Some(body) = self.node(id).body() {
            for &child in body {
                self.visit_structure(child, f);
            }
        }
    }

    /// All loops reachable from the root, in pre-order.
    pub fn loops(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.visit_structure(self.root, &mut |id| {
            if matches!(self.node(id), Node::Loop(_)) {
                out.push(id);
            }
        });
        out
    }

    /// All assignments and prints reachable from the root, in program order.
    pub fn statements(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        self.visit_structure(self.root, &mut |id| {
            if self.node(id).is_statement() {
                out.push(id);
            }
        });
        out
    }

    /// Every node of the subtree rooted at `id`, pre-order, headers included.
    pub fn subtree(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            out.push(next);
            let children = self.node(next).children();
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Variables referenced anywhere below `id`.
    pub fn vars_in(&self, id: NodeId) -> BTreeSet<VarId> {
        self.subtree(id)
            .into_iter()
            .filter_map(|n| match self.node(n) {
                Node::Var(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// First structural node (pre-order) satisfying `predicate`.
    pub fn locate<F>(&self, predicate: F) -> Option<Path>
    where
        F: Fn(&Program, NodeId) -> bool,
    {
        let mut path = Vec::new();
        if self.locate_in(self.root, &predicate, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    fn locate_in<F>(&self, id: NodeId, predicate: &F, path: &mut Path) -> bool
    where
        F: Fn(&Program, NodeId) -> bool,
    {
        let Some(body) = self.node(id).body() else {
            return false;
        };
        for (i, &child) in body.iter().enumerate() {
            path.push(i);
            if predicate(self, child) || self.locate_in(child, predicate, path) {
                return true;
            }
            path.pop();
        }
        false
    }

    pub fn path_of(&self, target: NodeId) -> Option<Path> {
        self.locate(|_, id| id == target)
    }

    pub fn node_at(&self, path: &[usize]) -> Option<NodeId> {
        let mut current = self.root;
        for &i in path {
            current = *self.node(current).body()?.get(i)?;
        }
        Some(current)
    }

    /// Structural parent of `target` and its index in the parent's body.
    pub fn parent_of(&self, target: NodeId) -> Option<(NodeId, usize)> {
        let path = self.path_of(target)?;
        let (&last, prefix) = path.split_last()?;
        Some((self.node_at(prefix)?, last))
    }

    /// Loops enclosing `target`, outermost first, excluding `target` itself.
    pub fn enclosing_loops(&self, target: NodeId) -> Result<Vec<NodeId>> {
        let path = self.path_of(target).ok_or(Error::UnknownNode(target))?;
        let mut out = Vec::new();
        let mut current = self.root;
        for &i in &path[..path.len() - 1] {
            current = self
                .node(current)
                .body()
                .and_then(|b| b.get(i).copied())
                .ok_or(Error::UnknownNode(target))?;
            out.push(current);
        }
        Ok(out)
    }

    // ========================================================================
    // Rewriting
    // ========================================================================

    /// Replaces `parent.body[index]` with `replacement` (possibly empty).
    pub fn splice(&mut self, parent: NodeId, index: usize, replacement: Vec<NodeId>) -> Result<()> {
        let body = self
            .node_mut(parent)
            .body_mut()
            .ok_or_else(|| Error::InvalidProgram(format!("{} has no body", parent)))?;
        if index >= body.len() {
            return Err(Error::InvalidProgram(format!(
                "index {} out of range for body of {}",
                index, parent
            )));
        }
        body.splice(index..=index, replacement);
        Ok(())
    }

    /// Replaces the structural node at `path` with whatever `f` returns.
    pub fn rewrite<F>(&mut self, path: &[usize], f: F) -> Result<()>
    where
        F: FnOnce(&mut Program, NodeId) -> Result<Vec<NodeId>>,
    {
        let (&index, prefix) = path
            .split_last()
            .ok_or_else(|| Error::InvalidProgram("cannot rewrite the root block".into()))?;
        let parent = self
            .node_at(prefix)
            .ok_or_else(|| Error::InvalidProgram(format!("dangling path {:?}", path)))?;
        let target = self
            .node_at(path)
            .ok_or_else(|| Error::InvalidProgram(format!("dangling path {:?}", path)))?;
        let replacement = f(self, target)?;
        self.splice(parent, index, replacement)
    }

    /// Copies the subtree rooted at `id` into fresh arena slots. Statement
    /// keys and loop variables are copied verbatim.
    pub fn clone_subtree(&mut self, id: NodeId) -> (NodeId, IdMap) {
        let mut map = IdMap::new();
        let new_id = self.copy_node(id, &mut map);
        (new_id, map)
    }

    pub fn copy_expr(&mut self, id: NodeId) -> NodeId {
        self.clone_subtree(id).0
    }

    fn copy_node(&mut self, id: NodeId, map: &mut IdMap) -> NodeId {
        let node = self.node(id).clone();
        let copied = remap_children(node, &mut |child| self.copy_node(child, map));
        let new_id = self.alloc(copied);
        map.insert(id, new_id);
        new_id
    }

    /// Independent copy of the whole program with a compacted arena.
    pub fn deep_clone(&self) -> (Program, IdMap) {
        let mut nodes = Vec::with_capacity(self.nodes.len());
        let mut map = IdMap::new();
        let root = self.import(self.root, &mut nodes, &mut map);
        let program = Program {
            name: self.name.clone(),
            nodes,
            root,
            tensors: self.tensors.clone(),
            consts: self.consts.clone(),
            next_var: self.next_var,
            next_stmt: self.next_stmt,
        };
        (program, map)
    }

    fn import(&self, id: NodeId, nodes: &mut Vec<Node>, map: &mut IdMap) -> NodeId {
        let node = self.node(id).clone();
        let copied = remap_children(node, &mut |child| self.import(child, nodes, map));
        let new_id = NodeId(nodes.len() as u32);
        nodes.push(copied);
        map.insert(id, new_id);
        new_id
    }

    /// Replaces every reference to `var` below `root` with a fresh copy of
    /// the expression `replacement`.
    pub fn substitute_var(&mut self, root: NodeId, var: VarId, replacement: NodeId) {
        let slots: Vec<NodeId> = self
            .subtree(root)
            .into_iter()
            .filter(|&n| *self.node(n) == Node::Var(var))
            .collect();
        for slot in slots {
            let fresh = self.copy_expr(replacement);
            let node = self.node(fresh).clone();
            *self.node_mut(slot) = node;
        }
    }

    /// Gives every statement below `root` a fresh key.
    pub fn refresh_keys(&mut self, root: NodeId) {
        for id in self.subtree(root) {
            if self.node(id).is_statement() {
                let fresh = self.fresh_key();
                match self.node_mut(id) {
                    Node::Assign { key, .. } | Node::Print { key, .. } => *key = fresh,
                    _ => {}
                }
            }
        }
    }

    // ========================================================================
    // Equality
    // ========================================================================

    /// Structural equality of two subtrees of this program.
    pub fn structurally_equal(&self, a: NodeId, b: NodeId) -> bool {
        self.nodes_equal(a, self, b)
    }

    /// Structural equality across programs. Tensors and constants compare by
    /// name; statement keys and parallel annotations are ignored.
    pub fn nodes_equal(&self, a: NodeId, other: &Program, b: NodeId) -> bool {
        let all_equal = |xs: &[NodeId], ys: &[NodeId]| {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys)
                    .all(|(&x, &y)| self.nodes_equal(x, other, y))
        };
        match (self.node(a), other.node(b)) {
            (Node::Int(x), Node::Int(y)) => x == y,
            (Node::Var(x), Node::Var(y)) => x == y,
            (Node::Const(x), Node::Const(y)) => self.constant(*x).name == other.constant(*y).name,
            (
                Node::Binary { op, lhs, rhs },
                Node::Binary {
                    op: op2,
                    lhs: lhs2,
                    rhs: rhs2,
                },
            ) => {
                op == op2
                    && self.nodes_equal(*lhs, other, *lhs2)
                    && self.nodes_equal(*rhs, other, *rhs2)
            }
            (
                Node::Access { tensor, indices },
                Node::Access {
                    tensor: tensor2,
                    indices: indices2,
                },
            ) => {
                self.tensor(*tensor).name == other.tensor(*tensor2).name
                    && all_equal(indices, indices2)
            }
            (Node::Assign { lhs, rhs, .. }, Node::Assign { lhs: l2, rhs: r2, .. }) => {
                self.nodes_equal(*lhs, other, *l2) && self.nodes_equal(*rhs, other, *r2)
            }
            (Node::Print { value, .. }, Node::Print { value: v2, .. }) => {
                self.nodes_equal(*value, other, *v2)
            }
            (Node::Loop(x), Node::Loop(y)) => {
                x.var == y.var
                    && self.nodes_equal(x.min, other, y.min)
                    && self.nodes_equal(x.max, other, y.max)
                    && self.nodes_equal(x.step, other, y.step)
                    && all_equal(&x.body, &y.body)
            }
            (Node::Block(x), Node::Block(y)) => all_equal(x, y),
            _ => false,
        }
    }
}

/// Rebuilds `node` with each child id passed through `f`.
fn remap_children(node: Node, f: &mut impl FnMut(NodeId) -> NodeId) -> Node {
    match node {
        Node::Int(_) | Node::Var(_) | Node::Const(_) => node,
        Node::Binary { op, lhs, rhs } => Node::Binary {
            op,
            lhs: f(lhs),
            rhs: f(rhs),
        },
        Node::Access { tensor, indices } => Node::Access {
            tensor,
            indices: indices.into_iter().map(&mut *f).collect(),
        },
        Node::Assign { key, lhs, rhs } => Node::Assign {
            key,
            lhs: f(lhs),
            rhs: f(rhs),
        },
        Node::Print { key, value } => Node::Print {
            key,
            value: f(value),
        },
        Node::Loop(l) => Node::Loop(LoopNode {
            var: l.var,
            min: f(l.min),
            max: f(l.max),
            step: f(l.step),
            body: l.body.into_iter().map(&mut *f).collect(),
            parallel: l.parallel,
            vectorize: l.vectorize,
        }),
        Node::Block(body) => Node::Block(body.into_iter().map(f).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    fn two_loops() -> Program {
        let spec = ProgramBuilder::spec("two")
            .tensor("A", &[16])
            .tensor("B", &[16])
            .stmt(Stmt::for_range(
                "i",
                0,
                16,
                vec![Stmt::assign("A", vec![Expr::var("i")], Expr::int(1))],
            ))
            .stmt(Stmt::for_range(
                "j",
                0,
                16,
                vec![Stmt::assign("B", vec![Expr::var("j")], Expr::int(2))],
            ));
        ProgramBuilder::build(&spec).expect("valid program")
    }

    #[test]
    fn deep_clone_is_structurally_equal_and_maps_every_node() {
        let program = two_loops();
        let (copy, map) = program.deep_clone();
        assert!(program.nodes_equal(program.root(), &copy, copy.root()));
        for l in program.loops() {
            let mapped = map[&l];
            assert!(copy.as_loop(mapped).is_some());
        }
    }

    #[test]
    fn locate_and_rewrite_remove_a_loop() {
        let mut program = two_loops();
        let second = program.loops()[1];
        let path = program.path_of(second).expect("reachable");
        assert_eq!(path, vec![1]);
        program.rewrite(&path, |_, _| Ok(Vec::new())).expect("rewrite");
        assert_eq!(program.loops().len(), 1);
    }

    #[test]
    fn loops_with_different_bodies_are_not_equal() {
        let program = two_loops();
        let loops = program.loops();
        assert!(!program.structurally_equal(loops[0], loops[1]));
        assert!(program.structurally_equal(loops[0], loops[0]));
    }
}
