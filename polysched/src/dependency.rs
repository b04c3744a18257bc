//! Dependency Analysis over Logical Time
//!
//! Every statement instance gets a logical timestamp by interleaving its
//! program context with its iteration vector:
//!
//! ```text
//! S at context [c0, c1, c2] inside loops (i, j)
//!   time = [c0, i, c1, j, c2, 0, 0, ...]
//! ```
//!
//! Timestamps are padded with zeros to the width of the deepest statement, so
//! lexicographic order on time vectors is program execution order.
//!
//! A dependency map relates the time of a producer instance to the time of a
//! later consumer instance touching the same array element:
//!
//! ```text
//! { t_p -> t_c : ∃ p, c. t_p = sched(p), t_c = sched(c),
//!                        access_P(p) = access_C(c), t_p ≺ t_c }
//! ```
//!
//! - RAW: producers are writes, consumers are reads
//! - WAR: producers are reads, consumers are writes
//! - WAW: both are writes
//!
//! # Restricted maps
//!
//! [`DependencyMap::restricted`] keeps only pairs whose first `prefix` time
//! coordinates agree. With the prefix covering the contexts and iterators
//! outside a loop, what remains are the hazards carried by that loop.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use lazy_static::lazy_static;
use log::debug;

use crate::error::{Error, Result};
use crate::ir::VarId;
use crate::poly::{AccessKind, ArrayAccess, PolyhedralModel, QuasiAffine, Statement};
use crate::solver::{BasicMap, Constraint, Space, Tuple, UnionMap};

lazy_static! {
    /// Lexicographic order relations, one per time width.
    static ref PRECEDE_CACHE: Mutex<HashMap<usize, UnionMap>> = Mutex::new(HashMap::new());
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    Raw,
    War,
    Waw,
}

impl DependencyKind {
    pub const ALL: [DependencyKind; 3] = [DependencyKind::Raw, DependencyKind::War, DependencyKind::Waw];

    /// Access kinds of (producer, consumer).
    pub fn access_kinds(self) -> (AccessKind, AccessKind) {
        match self {
            DependencyKind::Raw => (AccessKind::Write, AccessKind::Read),
            DependencyKind::War => (AccessKind::Read, AccessKind::Write),
            DependencyKind::Waw => (AccessKind::Write, AccessKind::Write),
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DependencyKind::Raw => "RAW",
            DependencyKind::War => "WAR",
            DependencyKind::Waw => "WAW",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Relation builders
// ============================================================================

fn columns(stmt: &Statement, map: &BasicMap) -> HashMap<VarId, usize> {
    stmt.iterators()
        .into_iter()
        .enumerate()
        .map(|(k, v)| (v, map.in_col(k)))
        .collect()
}

/// `scale · (Σ c·v + constant)` as a row of `map`.
fn numerator_row(
    map: &BasicMap,
    e: &QuasiAffine,
    cols: &HashMap<VarId, usize>,
    scale: i64,
) -> Result<Constraint> {
    let (coeffs, constant) = e.scaled_numerator(scale)?;
    let mut row = map.row().plus(constant);
    for (v, c) in coeffs {
        let col = *cols.get(&v).ok_or(Error::UnboundVariable(v))?;
        row = row.with(col, c);
    }
    Ok(row)
}

/// Adds the iteration domain of `stmt` on the input tuple of `map`.
fn add_domain(map: &mut BasicMap, stmt: &Statement) -> Result<()> {
    let cols = columns(stmt, map);
    for (k, it) in stmt.domain.iter().enumerate() {
        let v = map.in_col(k);
        for lo in &it.lower {
            // v >= floor(e/d)  <=>  d·v - e + d - 1 >= 0
            let row = numerator_row(map, lo, &cols, -1)?.with(v, lo.divisor).plus(lo.divisor - 1);
            map.add_inequality(row);
        }
        for hi in &it.upper {
            // v <= floor(e/d)  <=>  e - d·v >= 0
            let row = numerator_row(map, hi, &cols, 1)?.with(v, -hi.divisor);
            map.add_inequality(row);
        }
    }
    Ok(())
}

/// `{ S[i] -> [] : i in domain(S) }`
pub fn domain_set(stmt: &Statement) -> Result<BasicMap> {
    let space = Space::map(
        Tuple::named(&stmt.tuple_name(), stmt.depth()),
        Tuple::anonymous(0),
    );
    let mut map = BasicMap::universe(space);
    add_domain(&mut map, stmt)?;
    map.simplify()?;
    Ok(map)
}

/// `{ S[i] -> T[f(i)] : i in domain(S) }`
pub fn access_relation(stmt: &Statement, access: &ArrayAccess) -> Result<BasicMap> {
    let space = Space::map(
        Tuple::named(&stmt.tuple_name(), stmt.depth()),
        Tuple::named(&access.tensor, access.indices.len()),
    );
    let mut map = BasicMap::universe(space);
    let cols = columns(stmt, &map);
    for (m, e) in access.indices.iter().enumerate() {
        let x = map.out_col(m);
        if e.divisor == 1 {
            let row = numerator_row(&map, e, &cols, 1)?.with(x, -1);
            map.add_equality(row);
        } else {
            // x = q, d·q <= e <= d·q + d - 1
            let q = map.add_div();
            let e_row = numerator_row(&map, e, &cols, 1)?;
            map.add_inequality(e_row.clone().with(q, -e.divisor));
            map.add_inequality(e_row.negated().with(q, e.divisor).plus(e.divisor - 1));
            map.equate(x, q);
        }
    }
    add_domain(&mut map, stmt)?;
    map.simplify()?;
    Ok(map)
}

/// `{ S[i] -> [c0, i0, c1, i1, ..., ck, 0, ...] }` with `dims` outputs.
pub fn schedule_map(stmt: &Statement, dims: usize) -> BasicMap {
    let space = Space::map(
        Tuple::named(&stmt.tuple_name(), stmt.depth()),
        Tuple::anonymous(dims),
    );
    let mut map = BasicMap::universe(space);
    for t in 0..dims {
        let col = map.out_col(t);
        let k = t / 2;
        if t % 2 == 0 {
            let value = stmt.context.get(k).copied().unwrap_or(0);
            map.fix(col, value);
        } else if k < stmt.depth() {
            map.equate(col, map.in_col(k));
        } else {
            map.fix(col, 0);
        }
    }
    map
}

/// Strict lexicographic order on `dims`-wide time vectors.
pub fn precede_map(dims: usize) -> UnionMap {
    let mut cache = PRECEDE_CACHE.lock().unwrap_or_else(|e| e.into_inner());
    cache
        .entry(dims)
        .or_insert_with(|| {
            let mut out = UnionMap::new();
            for k in 0..dims {
                let mut piece = BasicMap::universe(Space::map(Tuple::anonymous(dims), Tuple::anonymous(dims)));
                for j in 0..k {
                    piece.equate(piece.in_col(j), piece.out_col(j));
                }
                piece.order_less(piece.in_col(k), piece.out_col(k));
                out.push(piece);
            }
            out
        })
        .clone()
}

/// Pairs of time vectors agreeing on their first `prefix` coordinates.
pub fn equal_prefix(dims: usize, prefix: usize) -> BasicMap {
    let mut map = BasicMap::universe(Space::map(Tuple::anonymous(dims), Tuple::anonymous(dims)));
    for j in 0..prefix.min(dims) {
        map.equate(map.in_col(j), map.out_col(j));
    }
    map
}

// ============================================================================
// Dependency maps
// ============================================================================

#[derive(Clone, Debug)]
pub struct DependencyMap {
    kind: DependencyKind,
    dims: usize,
    relation: UnionMap,
}

impl DependencyMap {
    /// Dependencies of `kind` from instances of `producers` to later
    /// instances of `consumers`.
    pub fn between(
        kind: DependencyKind,
        producers: &[&Statement],
        consumers: &[&Statement],
        dims: usize,
    ) -> Result<DependencyMap> {
        let (pk, ck) = kind.access_kinds();
        let precede = precede_map(dims);
        let mut relation = UnionMap::new();
        for p in producers {
            let sched_p = schedule_map(p, dims);
            for pa in p.accesses_of(pk) {
                let access_p = access_relation(p, pa)?;
                for c in consumers {
                    let sched_c = schedule_map(c, dims);
                    for ca in c.accesses_of(ck) {
                        if pa.tensor != ca.tensor || pa.indices.len() != ca.indices.len() {
                            continue;
                        }
                        let access_c = access_relation(c, ca)?;
                        let Some(pairs) = access_p.apply_range(&access_c.reverse())? else {
                            continue;
                        };
                        let Some(timed) = pairs.apply_domain(&sched_p)? else {
                            continue;
                        };
                        let Some(timed) = timed.apply_range(&sched_c)? else {
                            continue;
                        };
                        for piece in precede.maps() {
                            let m = timed.intersect(piece)?;
                            if !m.is_empty()? {
                                relation.push(m);
                            }
                        }
                    }
                }
            }
        }
        debug!("{} map over {} dims has {} pieces", kind, dims, relation.len());
        Ok(DependencyMap {
            kind,
            dims,
            relation,
        })
    }

    pub fn kind(&self) -> DependencyKind {
        self.kind
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn relation(&self) -> &UnionMap {
        &self.relation
    }

    /// Keeps only pairs that agree on the first `prefix` time coordinates.
    pub fn restricted(&self, prefix: usize) -> Result<DependencyMap> {
        let mut relation = self.relation.intersect_basic(&equal_prefix(self.dims, prefix))?;
        relation.remove_empty()?;
        Ok(DependencyMap {
            kind: self.kind,
            dims: self.dims,
            relation,
        })
    }

    pub fn intersect(&self, filter: &BasicMap) -> Result<UnionMap> {
        let mut out = self.relation.intersect_basic(filter)?;
        out.remove_empty()?;
        Ok(out)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.relation.is_empty()?)
    }
}

/// RAW, WAR and WAW maps of one polyhedral model.
#[derive(Clone, Debug)]
pub struct DependencyModel {
    pub raw: DependencyMap,
    pub war: DependencyMap,
    pub waw: DependencyMap,
}

impl DependencyModel {
    pub fn analyze(model: &PolyhedralModel) -> Result<DependencyModel> {
        let all: Vec<&Statement> = model.statements.iter().collect();
        DependencyModel::between(&all, &all, model.schedule_dims())
    }

    pub fn between(producers: &[&Statement], consumers: &[&Statement], dims: usize) -> Result<DependencyModel> {
        Ok(DependencyModel {
            raw: DependencyMap::between(DependencyKind::Raw, producers, consumers, dims)?,
            war: DependencyMap::between(DependencyKind::War, producers, consumers, dims)?,
            waw: DependencyMap::between(DependencyKind::Waw, producers, consumers, dims)?,
        })
    }

    pub fn restricted(&self, prefix: usize) -> Result<DependencyModel> {
        Ok(DependencyModel {
            raw: self.raw.restricted(prefix)?,
            war: self.war.restricted(prefix)?,
            waw: self.waw.restricted(prefix)?,
        })
    }

    pub fn maps(&self) -> [&DependencyMap; 3] {
        [&self.raw, &self.war, &self.waw]
    }

    pub fn is_empty(&self) -> Result<bool> {
        for m in self.maps() {
            if !m.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};
    use crate::poly::Extractor;

    fn model_of(body: Vec<Stmt>) -> PolyhedralModel {
        let mut spec = ProgramBuilder::spec("dep").tensor("A", &[32]).tensor("B", &[32]);
        spec.body = body;
        let program = ProgramBuilder::build(&spec).expect("build");
        Extractor::extract(&program).expect("affine")
    }

    #[test]
    fn schedule_interleaves_context_and_iterators() {
        let model = model_of(vec![Stmt::for_range(
            "i",
            0,
            4,
            vec![Stmt::assign("A", vec![Expr::var("i")], 0)],
        )]);
        let stmt = &model.statements[0];
        let sched = schedule_map(stmt, 5);
        assert!(sched.contains(&[2], &[0, 2, 0, 0, 0]).expect("ok"));
        assert!(!sched.contains(&[2], &[0, 2, 1, 0, 0]).expect("ok"));
    }

    #[test]
    fn recurrence_has_raw_but_elementwise_does_not() {
        let recurrence = model_of(vec![Stmt::for_range(
            "i",
            0,
            31,
            vec![Stmt::assign(
                "A",
                vec![Expr::var("i") + 1],
                Expr::at("A", vec![Expr::var("i")]),
            )],
        )]);
        let deps = DependencyModel::analyze(&recurrence).expect("ok");
        assert!(!deps.raw.is_empty().expect("ok"));
        assert!(deps.waw.is_empty().expect("ok"));

        let elementwise = model_of(vec![Stmt::for_range(
            "i",
            0,
            32,
            vec![Stmt::assign(
                "A",
                vec![Expr::var("i")],
                Expr::at("B", vec![Expr::var("i")]) + 1,
            )],
        )]);
        assert!(DependencyModel::analyze(&elementwise).expect("ok").is_empty().expect("ok"));
    }

    #[test]
    fn in_place_update_only_orders_within_an_instance() {
        // A[i] = A[i] + 1 reads before it writes in the same instance.
        let model = model_of(vec![Stmt::for_range(
            "i",
            0,
            32,
            vec![Stmt::assign(
                "A",
                vec![Expr::var("i")],
                Expr::at("A", vec![Expr::var("i")]) + 1,
            )],
        )]);
        let deps = DependencyModel::analyze(&model).expect("ok");
        assert!(deps.is_empty().expect("ok"));
    }

    #[test]
    fn restriction_isolates_sibling_statements() {
        // Two loops over A: the second reads what the first wrote.
        let model = model_of(vec![
            Stmt::for_range("i", 0, 32, vec![Stmt::assign("A", vec![Expr::var("i")], 1)]),
            Stmt::for_range(
                "j",
                0,
                32,
                vec![Stmt::assign("B", vec![Expr::var("j")], Expr::at("A", vec![Expr::var("j")]))],
            ),
        ]);
        let deps = DependencyModel::analyze(&model).expect("ok");
        assert!(!deps.raw.is_empty().expect("ok"));
        // Equal top-level context separates the two loops.
        assert!(deps.restricted(1).expect("ok").is_empty().expect("ok"));
    }
}
