//! Parallelism and Synchronization Planning
//!
//! Two questions asked of one loop `L` nested under `k` other loops:
//!
//! - **Is `L` parallel?** Extract `L` alone, keep the dependences whose
//!   endpoints share the first `2k+1` time coordinates (same iteration of
//!   every enclosing loop), and look for a pair that crosses iterations of
//!   `L` itself. None means iterations of `L` are independent.
//!
//! - **How does the body of `L` split into hazard-free loops?** Build a
//!   graph over the body entries with an edge `i → j` whenever an instance
//!   of entry `i` must run before an instance of entry `j` within the same
//!   iteration of the enclosing loops. Strongly connected components must
//!   stay together; the condensed graph is ordered topologically (ties by
//!   lowest original position) and each component gets its own copy of
//!   `L`'s header.
//!
//! Edge tests are independent and run on the rayon pool.

use log::debug;
use rayon::prelude::*;

use crate::dependency::DependencyModel;
use crate::error::{Error, Result};
use crate::ir::{NodeId, Program};
use crate::poly::{Extractor, PolyhedralModel, Statement};
use crate::solver::{BasicMap, Space, Tuple};
use crate::transform::fission::clone_header;

/// Context position of `lp` and the loops around it.
fn placement(program: &Program, lp: NodeId) -> Result<(Vec<NodeId>, Vec<i64>)> {
    let enclosing = program.enclosing_loops(lp)?;
    let path = program.path_of(lp).ok_or(Error::UnknownNode(lp))?;
    Ok((enclosing, path.into_iter().map(|p| p as i64).collect()))
}

/// True when no dependence is carried by `lp`.
pub fn is_parallel(program: &Program, lp: NodeId) -> Result<bool> {
    program.loop_node(lp)?;
    let (enclosing, context) = placement(program, lp)?;
    let k = enclosing.len();
    let model = Extractor::extract_region(program, lp, &enclosing, &context)?;
    let deps = DependencyModel::analyze(&model)?.restricted(2 * k + 1)?;
    let dims = model.schedule_dims();

    let mut carried = BasicMap::universe(Space::map(Tuple::anonymous(dims), Tuple::anonymous(dims)));
    carried.order_less(carried.in_col(2 * k + 1), carried.out_col(2 * k + 1));
    for m in deps.maps() {
        if !m.intersect(&carried)?.is_empty()? {
            debug!("{} carries a {} dependence", lp, m.kind());
            return Ok(false);
        }
    }
    Ok(true)
}

/// Edges `i → j` between body entries of `lp`.
fn dependence_edges(program: &Program, lp: NodeId) -> Result<Vec<(usize, usize)>> {
    let body = program.loop_node(lp)?.body.clone();
    let (mut enclosing, context) = placement(program, lp)?;
    let k = enclosing.len();
    enclosing.push(lp);

    let models = body
        .iter()
        .enumerate()
        .map(|(i, &entry)| {
            let mut prefix = context.clone();
            prefix.push(i as i64);
            Extractor::extract_region(program, entry, &enclosing, &prefix)
        })
        .collect::<Result<Vec<PolyhedralModel>>>()?;

    let pairs: Vec<(usize, usize)> = (0..body.len())
        .flat_map(|i| (0..body.len()).filter(move |&j| j != i).map(move |j| (i, j)))
        .collect();
    let position = 2 * k + 2;

    let found = pairs
        .par_iter()
        .map(|&(i, j)| -> Result<Option<(usize, usize)>> {
            let producers: Vec<&Statement> = models[i].statements.iter().collect();
            let consumers: Vec<&Statement> = models[j].statements.iter().collect();
            let dims = models[i].schedule_dims().max(models[j].schedule_dims());
            let deps = DependencyModel::between(&producers, &consumers, dims)?.restricted(2 * k + 1)?;

            let mut ordered = BasicMap::universe(Space::map(Tuple::anonymous(dims), Tuple::anonymous(dims)));
            ordered.fix(ordered.in_col(position), i as i64);
            ordered.fix(ordered.out_col(position), j as i64);
            for m in deps.maps() {
                if !m.intersect(&ordered)?.is_empty()? {
                    return Ok(Some((i, j)));
                }
            }
            Ok(None)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(found.into_iter().flatten().collect())
}

struct Tarjan<'a> {
    adjacency: &'a [Vec<usize>],
    index: Vec<Option<usize>>,
    low: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    next: usize,
    components: Vec<Vec<usize>>,
}

impl<'a> Tarjan<'a> {
    fn visit(&mut self, v: usize) {
        self.index[v] = Some(self.next);
        self.low[v] = self.next;
        self.next += 1;
        self.stack.push(v);
        self.on_stack[v] = true;

        let adjacency = self.adjacency;
        for &w in &adjacency[v] {
            match self.index[w] {
                None => {
                    self.visit(w);
                    self.low[v] = self.low[v].min(self.low[w]);
                }
                Some(iw) if self.on_stack[w] => self.low[v] = self.low[v].min(iw),
                Some(_) => {}
            }
        }

        if Some(self.low[v]) == self.index[v] {
            let mut component = Vec::new();
            while let Some(w) = self.stack.pop() {
                self.on_stack[w] = false;
                component.push(w);
                if w == v {
                    break;
                }
            }
            component.sort_unstable();
            self.components.push(component);
        }
    }
}

/// Strongly connected components of the graph on `n` nodes, each sorted.
pub fn strongly_connected(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut adjacency = vec![Vec::new(); n];
    for &(a, b) in edges {
        adjacency[a].push(b);
    }
    let mut t = Tarjan {
        adjacency: &adjacency,
        index: vec![None; n],
        low: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next: 0,
        components: Vec::new(),
    };
    for v in 0..n {
        if t.index[v].is_none() {
            t.visit(v);
        }
    }
    t.components
}

/// Components of the graph in an order respecting every edge. Among ready
/// components the one holding the smallest node goes first.
pub fn ordered_components(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let components = strongly_connected(n, edges);
    let mut owner = vec![0; n];
    for (c, members) in components.iter().enumerate() {
        for &v in members {
            owner[v] = c;
        }
    }
    let mut successors = vec![Vec::new(); components.len()];
    let mut indegree = vec![0usize; components.len()];
    for &(a, b) in edges {
        let (ca, cb) = (owner[a], owner[b]);
        if ca != cb && !successors[ca].contains(&cb) {
            successors[ca].push(cb);
            indegree[cb] += 1;
        }
    }

    let mut ready: Vec<usize> = (0..components.len()).filter(|&c| indegree[c] == 0).collect();
    let mut order = Vec::with_capacity(components.len());
    while let Some(slot) = (0..ready.len()).min_by_key(|&s| components[ready[s]][0]) {
        let c = ready.swap_remove(slot);
        order.push(c);
        for &s in &successors[c] {
            indegree[s] -= 1;
            if indegree[s] == 0 {
                ready.push(s);
            }
        }
    }
    order.into_iter().map(|c| components[c].clone()).collect()
}

/// Splits the body of `lp` into one loop per ordered component. Returns the
/// loops now standing where `lp` stood (just `lp` when nothing split).
pub fn partition_loop(program: &mut Program, lp: NodeId) -> Result<Vec<NodeId>> {
    let body = program.loop_node(lp)?.body.clone();
    if body.len() < 2 {
        return Ok(vec![lp]);
    }
    let edges = dependence_edges(program, lp)?;
    let groups = ordered_components(body.len(), &edges);
    if groups.len() < 2 {
        return Ok(vec![lp]);
    }
    let (parent, index) = program.parent_of(lp).ok_or(Error::UnknownNode(lp))?;

    let mut loops = Vec::with_capacity(groups.len());
    for (g, members) in groups.iter().enumerate() {
        let entries: Vec<NodeId> = members.iter().map(|&m| body[m]).collect();
        if g == 0 {
            loops.push(lp);
        } else {
            loops.push(clone_header(program, lp, entries)?);
        }
    }
    let first: Vec<NodeId> = groups[0].iter().map(|&m| body[m]).collect();
    if let Some(l) = program.as_loop_mut(lp) {
        l.body = first;
    }
    program.splice(parent, index, loops.clone())?;
    debug!("{} split into {} hazard-free loops", lp, loops.len());
    Ok(loops)
}

/// Partitions every loop of the program, innermost first. Returns the
/// number of loops added.
pub fn partition_program(program: &mut Program) -> Result<usize> {
    let mut added = 0;
    for lp in program.loops().into_iter().rev() {
        added += partition_loop(program, lp)?.len() - 1;
    }
    Ok(added)
}
