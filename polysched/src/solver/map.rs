use std::fmt;

use log::debug;

use super::constraint::Constraint;
use super::feasibility::{self, System, DEFAULT_BUDGET};
use super::SolverError;

/// A tuple of integer dimensions, optionally named. Named tuples only
/// compose with tuples of the same name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tuple {
    pub name: Option<String>,
    pub dims: usize,
}

impl Tuple {
    pub fn named(name: &str, dims: usize) -> Self {
        Tuple {
            name: Some(name.to_string()),
            dims,
        }
    }

    pub fn anonymous(dims: usize) -> Self {
        Tuple { name: None, dims }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Space {
    pub input: Tuple,
    pub output: Tuple,
}

impl Space {
    pub fn map(input: Tuple, output: Tuple) -> Self {
        Space { input, output }
    }

    /// A set is a map with an empty anonymous input tuple.
    pub fn set(output: Tuple) -> Self {
        Space {
            input: Tuple::anonymous(0),
            output,
        }
    }

    pub fn reversed(&self) -> Self {
        Space {
            input: self.output.clone(),
            output: self.input.clone(),
        }
    }
}

/// A conjunction of affine constraints over input, output and existential
/// columns, in that order.
#[derive(Clone, Debug)]
pub struct BasicMap {
    space: Space,
    n_div: usize,
    eqs: Vec<Constraint>,
    ineqs: Vec<Constraint>,
    known_empty: bool,
}

impl BasicMap {
    pub fn universe(space: Space) -> Self {
        BasicMap {
            space,
            n_div: 0,
            eqs: Vec::new(),
            ineqs: Vec::new(),
            known_empty: false,
        }
    }

    pub fn space(&self) -> &Space {
        &self.space
    }

    pub fn n_in(&self) -> usize {
        self.space.input.dims
    }

    pub fn n_out(&self) -> usize {
        self.space.output.dims
    }

    pub fn n_div(&self) -> usize {
        self.n_div
    }

    pub fn n_cols(&self) -> usize {
        self.n_in() + self.n_out() + self.n_div
    }

    pub fn in_col(&self, k: usize) -> usize {
        k
    }

    pub fn out_col(&self, k: usize) -> usize {
        self.n_in() + k
    }

    pub fn div_col(&self, k: usize) -> usize {
        self.n_in() + self.n_out() + k
    }

    /// An all-zero constraint of the right width.
    pub fn row(&self) -> Constraint {
        Constraint::new(self.n_cols())
    }

    pub fn equalities(&self) -> &[Constraint] {
        &self.eqs
    }

    pub fn inequalities(&self) -> &[Constraint] {
        &self.ineqs
    }

    /// Appends an existential column and returns its index.
    pub fn add_div(&mut self) -> usize {
        for c in self.eqs.iter_mut().chain(self.ineqs.iter_mut()) {
            c.coeffs.push(0);
        }
        self.n_div += 1;
        self.n_cols() - 1
    }

    pub fn add_equality(&mut self, c: Constraint) {
        self.eqs.push(c.extended(self.n_cols()));
    }

    pub fn add_inequality(&mut self, c: Constraint) {
        self.ineqs.push(c.extended(self.n_cols()));
    }

    /// `x[a] = x[b]`
    pub fn equate(&mut self, a: usize, b: usize) {
        let row = self.row().with(a, 1).with(b, -1);
        self.add_equality(row);
    }

    /// `x[a] < x[b]`
    pub fn order_less(&mut self, a: usize, b: usize) {
        let row = self.row().with(b, 1).with(a, -1).plus(-1);
        self.add_inequality(row);
    }

    /// `x[col] = value`
    pub fn fix(&mut self, col: usize, value: i64) {
        let row = self.row().with(col, 1).plus(-value);
        self.add_equality(row);
    }

    fn system(&self) -> System {
        System::new(self.n_cols(), self.eqs.clone(), self.ineqs.clone())
    }

    // ========================================================================
    // Algebra
    // ========================================================================

    pub fn reverse(&self) -> Self {
        let (n_in, n_out) = (self.n_in(), self.n_out());
        let perm: Vec<usize> = (0..self.n_cols())
            .map(|k| {
                if k < n_in {
                    n_out + k
                } else if k < n_in + n_out {
                    k - n_in
                } else {
                    k
                }
            })
            .collect();
        self.permuted(self.space.reversed(), &perm, self.n_div)
    }

    fn permuted(&self, space: Space, perm: &[usize], n_div: usize) -> Self {
        let n = space.input.dims + space.output.dims + n_div;
        BasicMap {
            space,
            n_div,
            eqs: self.eqs.iter().map(|c| c.permuted(perm, n)).collect(),
            ineqs: self.ineqs.iter().map(|c| c.permuted(perm, n)).collect(),
            known_empty: self.known_empty,
        }
    }

    pub fn intersect(&self, other: &BasicMap) -> Result<BasicMap, SolverError> {
        if self.space != other.space {
            return Err(SolverError::SpaceMismatch);
        }
        let n = self.n_cols() + other.n_div;
        let base = self.n_in() + self.n_out();
        let perm: Vec<usize> = (0..other.n_cols())
            .map(|k| if k < base { k } else { k + self.n_div })
            .collect();
        let mut out = BasicMap {
            space: self.space.clone(),
            n_div: self.n_div + other.n_div,
            eqs: self.eqs.iter().map(|c| c.extended(n)).collect(),
            ineqs: self.ineqs.iter().map(|c| c.extended(n)).collect(),
            known_empty: self.known_empty || other.known_empty,
        };
        out.eqs.extend(other.eqs.iter().map(|c| c.permuted(&perm, n)));
        out.ineqs.extend(other.ineqs.iter().map(|c| c.permuted(&perm, n)));
        out.simplify()?;
        Ok(out)
    }

    /// `self: A → B`, `other: B → C` gives `A → C`. `None` when the middle
    /// tuples differ.
    pub fn apply_range(&self, other: &BasicMap) -> Result<Option<BasicMap>, SolverError> {
        if self.space.output != other.space.input {
            return Ok(None);
        }
        let (n1, n2, n3) = (self.n_in(), self.n_out(), other.n_out());
        let (d1, d2) = (self.n_div, other.n_div);
        let n_div = d1 + d2 + n2;
        let n = n1 + n3 + n_div;
        let middle = n1 + n3 + d1 + d2;

        let left: Vec<usize> = (0..self.n_cols())
            .map(|k| {
                if k < n1 {
                    k
                } else if k < n1 + n2 {
                    middle + (k - n1)
                } else {
                    n1 + n3 + (k - n1 - n2)
                }
            })
            .collect();
        let right: Vec<usize> = (0..other.n_cols())
            .map(|k| {
                if k < n2 {
                    middle + k
                } else if k < n2 + n3 {
                    n1 + (k - n2)
                } else {
                    n1 + n3 + d1 + (k - n2 - n3)
                }
            })
            .collect();

        let mut out = BasicMap {
            space: Space::map(self.space.input.clone(), other.space.output.clone()),
            n_div,
            eqs: self.eqs.iter().map(|c| c.permuted(&left, n)).collect(),
            ineqs: self.ineqs.iter().map(|c| c.permuted(&left, n)).collect(),
            known_empty: self.known_empty || other.known_empty,
        };
        out.eqs.extend(other.eqs.iter().map(|c| c.permuted(&right, n)));
        out.ineqs.extend(other.ineqs.iter().map(|c| c.permuted(&right, n)));
        out.simplify()?;
        Ok(Some(out))
    }

    /// `self: A → B`, `other: A → C` gives `C → B`.
    pub fn apply_domain(&self, other: &BasicMap) -> Result<Option<BasicMap>, SolverError> {
        Ok(self.reverse().apply_range(other)?.map(|m| m.reverse()))
    }

    /// Projects the input tuple away.
    pub fn range(&self) -> Result<BasicMap, SolverError> {
        let (n_in, n_out) = (self.n_in(), self.n_out());
        let perm: Vec<usize> = (0..self.n_cols())
            .map(|k| {
                if k < n_in {
                    n_out + k
                } else if k < n_in + n_out {
                    k - n_in
                } else {
                    k
                }
            })
            .collect();
        let mut out = self.permuted(Space::set(self.space.output.clone()), &perm, self.n_div + n_in);
        out.simplify()?;
        Ok(out)
    }

    /// Projects the output tuple away.
    pub fn domain(&self) -> Result<BasicMap, SolverError> {
        self.reverse().range()
    }

    /// Normalizes constraints and removes existential columns that a unit
    /// equality defines or that are bounded from one side only.
    pub fn simplify(&mut self) -> Result<(), SolverError> {
        if self.known_empty {
            return Ok(());
        }
        let first_div = self.n_in() + self.n_out();
        let mut sys = self.system();
        if !sys.simplify(&|k| k >= first_div, true)? {
            self.mark_empty();
            return Ok(());
        }
        self.eqs = sys.eqs;
        self.ineqs = sys.ineqs;

        let live: Vec<usize> = (first_div..self.n_cols())
            .filter(|&k| {
                self.eqs.iter().any(|c| c.coeffs[k] != 0) || self.ineqs.iter().any(|c| c.coeffs[k] != 0)
            })
            .collect();
        if live.len() != self.n_div {
            let keep: Vec<usize> = (0..first_div).chain(live.iter().copied()).collect();
            let project = |c: &Constraint| Constraint::from_parts(keep.iter().map(|&k| c.coeffs[k]).collect(), c.constant);
            self.eqs = self.eqs.iter().map(project).collect();
            self.ineqs = self.ineqs.iter().map(project).collect();
            self.n_div = live.len();
        }
        Ok(())
    }

    fn mark_empty(&mut self) {
        self.known_empty = true;
        self.eqs = vec![Constraint::new(self.n_cols()).plus(1)];
        self.ineqs.clear();
    }

    pub fn is_empty(&self) -> Result<bool, SolverError> {
        if self.known_empty {
            return Ok(true);
        }
        let mut budget = DEFAULT_BUDGET;
        Ok(!feasibility::is_feasible(&self.system(), &mut budget)?)
    }

    /// Points of `self` outside `other`, as disjoint pieces.
    pub fn subtract(&self, other: &BasicMap) -> Result<Vec<BasicMap>, SolverError> {
        if self.space != other.space {
            return Err(SolverError::SpaceMismatch);
        }
        let mut other = other.clone();
        other.simplify()?;
        if other.known_empty {
            return Ok(vec![self.clone()]);
        }
        if other.n_div > 0 {
            return Err(SolverError::ExistentialSubtrahend);
        }
        if self.intersect(&other)?.is_empty()? {
            return Ok(vec![self.clone()]);
        }

        let n = self.n_cols();
        let mut pieces = Vec::new();
        let mut current = self.clone();
        for e in &other.eqs {
            let e = e.extended(n);
            for side in [e.clone().plus(-1), e.negated().plus(-1)] {
                let mut piece = current.clone();
                piece.add_inequality(side);
                if !piece.is_empty()? {
                    pieces.push(piece);
                }
            }
            current.add_equality(e);
        }
        for c in &other.ineqs {
            let c = c.extended(n);
            let mut piece = current.clone();
            piece.add_inequality(c.negated().plus(-1));
            if !piece.is_empty()? {
                pieces.push(piece);
            }
            current.add_inequality(c);
        }
        Ok(pieces)
    }

    /// Number of integer points in the input and output tuples.
    pub fn count_points(&self, limit: u64) -> Result<u64, SolverError> {
        if self.known_empty {
            return Ok(0);
        }
        feasibility::count_points(&self.system(), self.n_in() + self.n_out(), limit)
    }

    pub fn contains(&self, input: &[i64], output: &[i64]) -> Result<bool, SolverError> {
        let mut point = self.clone();
        for (k, &v) in input.iter().enumerate() {
            point.fix(point.in_col(k), v);
        }
        for (k, &v) in output.iter().enumerate() {
            point.fix(point.out_col(k), v);
        }
        Ok(!point.is_empty()?)
    }
}

impl fmt::Display for BasicMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tuple = |t: &Tuple| format!("{}[{} dims]", t.name.as_deref().unwrap_or(""), t.dims);
        write!(f, "{{ {} -> {} : ", tuple(&self.space.input), tuple(&self.space.output))?;
        let rows = self
            .eqs
            .iter()
            .map(|c| format!("{} = 0", c))
            .chain(self.ineqs.iter().map(|c| format!("{} >= 0", c)))
            .collect::<Vec<_>>();
        write!(f, "{} }}", rows.join(" and "))
    }
}

/// A finite union of basic maps, possibly over different spaces.
#[derive(Clone, Debug, Default)]
pub struct UnionMap {
    maps: Vec<BasicMap>,
}

impl From<BasicMap> for UnionMap {
    fn from(map: BasicMap) -> Self {
        UnionMap { maps: vec![map] }
    }
}

impl UnionMap {
    pub fn new() -> Self {
        UnionMap::default()
    }

    pub fn push(&mut self, map: BasicMap) {
        if !map.known_empty {
            self.maps.push(map);
        }
    }

    pub fn maps(&self) -> &[BasicMap] {
        &self.maps
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn union(&self, other: &UnionMap) -> UnionMap {
        let mut out = self.clone();
        for m in &other.maps {
            out.push(m.clone());
        }
        out
    }

    pub fn reverse(&self) -> UnionMap {
        UnionMap {
            maps: self.maps.iter().map(BasicMap::reverse).collect(),
        }
    }

    pub fn intersect(&self, other: &UnionMap) -> Result<UnionMap, SolverError> {
        let mut out = UnionMap::new();
        for a in &self.maps {
            for b in other.maps.iter().filter(|b| b.space == a.space) {
                out.push(a.intersect(b)?);
            }
        }
        Ok(out)
    }

    pub fn intersect_basic(&self, other: &BasicMap) -> Result<UnionMap, SolverError> {
        self.intersect(&UnionMap::from(other.clone()))
    }

    pub fn apply_range(&self, other: &UnionMap) -> Result<UnionMap, SolverError> {
        let mut out = UnionMap::new();
        for a in &self.maps {
            for b in &other.maps {
                if let Some(m) = a.apply_range(b)? {
                    out.push(m);
                }
            }
        }
        Ok(out)
    }

    pub fn apply_domain(&self, other: &UnionMap) -> Result<UnionMap, SolverError> {
        Ok(self.reverse().apply_range(other)?.reverse())
    }

    /// Drops pieces without integer points.
    pub fn remove_empty(&mut self) -> Result<(), SolverError> {
        let mut kept = Vec::with_capacity(self.maps.len());
        for m in self.maps.drain(..) {
            if !m.is_empty()? {
                kept.push(m);
            }
        }
        self.maps = kept;
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool, SolverError> {
        for m in &self.maps {
            if !m.is_empty()? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn subtract(&self, other: &UnionMap) -> Result<UnionMap, SolverError> {
        let mut out = UnionMap::new();
        for a in &self.maps {
            let mut pieces = vec![a.clone()];
            for b in other.maps.iter().filter(|b| b.space == a.space) {
                let mut next = Vec::new();
                for p in &pieces {
                    next.extend(p.subtract(b)?);
                }
                pieces = next;
                if pieces.is_empty() {
                    break;
                }
            }
            for p in pieces {
                out.push(p);
            }
        }
        debug!("subtract left {} pieces", out.len());
        Ok(out)
    }
}
