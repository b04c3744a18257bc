//! Integer feasibility and point counting for small constraint systems.
//!
//! Equalities with a unit coefficient are substituted away, variables
//! constrained from one side only are dropped, and the remaining system is
//! decided by branching on the variable with the narrowest range. Ranges come
//! from direct single-variable bounds or, failing that, from Fourier–Motzkin
//! projection. Every branch node is charged to a shared budget.

use std::collections::HashMap;

use log::debug;

use super::constraint::Constraint;
use super::SolverError;

/// Branch nodes allowed per query.
pub const DEFAULT_BUDGET: usize = 200_000;

/// Above this many inequalities a projection is abandoned.
const PROJECTION_LIMIT: usize = 4_000;

/// Ranges wider than this are tightened by projection before branching.
const WIDE_RANGE: i64 = 16;

#[derive(Clone, Debug)]
pub(crate) struct System {
    pub n: usize,
    pub eqs: Vec<Constraint>,
    pub ineqs: Vec<Constraint>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Range {
    Empty,
    Bounded(i64, i64),
    Unbounded,
}

impl System {
    pub fn new(n: usize, eqs: Vec<Constraint>, ineqs: Vec<Constraint>) -> Self {
        System { n, eqs, ineqs }
    }

    /// gcd normalization, duplicate removal, and detection of opposing
    /// inequality pairs. `false` on contradiction.
    pub fn normalize(&mut self) -> bool {
        let mut eqs = Vec::with_capacity(self.eqs.len());
        for mut e in self.eqs.drain(..) {
            if !e.normalize_equality() {
                return false;
            }
            if !e.is_constant() && !eqs.contains(&e) {
                eqs.push(e);
            }
        }

        // Tightest constant per coefficient vector.
        let mut tightest: HashMap<Vec<i64>, i64> = HashMap::new();
        let mut order = Vec::new();
        for mut c in self.ineqs.drain(..) {
            if !c.normalize_inequality() {
                return false;
            }
            if c.is_constant() {
                continue;
            }
            match tightest.get_mut(&c.coeffs) {
                Some(k) => *k = (*k).min(c.constant),
                None => {
                    order.push(c.coeffs.clone());
                    tightest.insert(c.coeffs, c.constant);
                }
            }
        }

        let mut ineqs = Vec::with_capacity(order.len());
        for coeffs in order {
            let constant = tightest[&coeffs];
            let negated: Vec<i64> = coeffs.iter().map(|c| -c).collect();
            if let Some(&other) = tightest.get(&negated) {
                // -constant <= a·x <= other
                if constant + other < 0 {
                    return false;
                }
                if constant + other == 0 {
                    let mut e = Constraint::from_parts(coeffs, constant);
                    if !e.normalize_equality() {
                        return false;
                    }
                    if !eqs.contains(&e) {
                        eqs.push(e);
                    }
                    continue;
                }
            }
            ineqs.push(Constraint::from_parts(coeffs, constant));
        }
        self.eqs = eqs;
        self.ineqs = ineqs;
        true
    }

    /// Substitutes one equality with a unit coefficient. Returns whether a
    /// substitution happened.
    fn substitute_unit_equality(&mut self, allowed: &dyn Fn(usize) -> bool) -> Result<bool, SolverError> {
        let found = self.eqs.iter().enumerate().find_map(|(i, e)| {
            e.coeffs
                .iter()
                .enumerate()
                .find(|&(k, &c)| c.abs() == 1 && allowed(k))
                .map(|(k, _)| (i, k))
        });
        let Some((i, col)) = found else {
            return Ok(false);
        };
        let def = self.eqs.remove(i);
        eliminate_with(&def, col, &mut self.eqs)?;
        eliminate_with(&def, col, &mut self.ineqs)?;
        Ok(true)
    }

    /// Removes inequalities on variables that no equality mentions and that
    /// are bounded from one side only. Preserves feasibility, not the
    /// solution set.
    fn drop_one_sided(&mut self, allowed: &dyn Fn(usize) -> bool) -> bool {
        let mut changed = false;
        for col in 0..self.n {
            if !allowed(col) || self.eqs.iter().any(|e| e.coeffs[col] != 0) {
                continue;
            }
            let pos = self.ineqs.iter().any(|c| c.coeffs[col] > 0);
            let neg = self.ineqs.iter().any(|c| c.coeffs[col] < 0);
            if pos != neg {
                self.ineqs.retain(|c| c.coeffs[col] == 0);
                changed = true;
            }
        }
        changed
    }

    /// Normalizes and substitutes to a fixpoint. `false` on contradiction.
    pub fn simplify(&mut self, allowed: &dyn Fn(usize) -> bool, drop: bool) -> Result<bool, SolverError> {
        loop {
            if !self.normalize() {
                return Ok(false);
            }
            if self.substitute_unit_equality(allowed)? {
                continue;
            }
            if drop && self.drop_one_sided(allowed) {
                continue;
            }
            return Ok(true);
        }
    }

    pub fn active(&self) -> Vec<usize> {
        (0..self.n)
            .filter(|&k| {
                self.eqs.iter().any(|e| e.coeffs[k] != 0)
                    || self.ineqs.iter().any(|c| c.coeffs[k] != 0)
            })
            .collect()
    }

    pub fn fixed(&self, col: usize, value: i64) -> Result<System, SolverError> {
        let mut next = self.clone();
        for c in next.eqs.iter_mut().chain(next.ineqs.iter_mut()) {
            c.fix(col, value)?;
        }
        Ok(next)
    }

    /// Bounds on `col` from constraints mentioning no other variable.
    fn direct_range(&self, col: usize) -> Range {
        let single = |c: &Constraint| c.coeffs.iter().enumerate().all(|(k, &a)| k == col || a == 0);
        let mut lo = None::<i64>;
        let mut hi = None::<i64>;
        for e in self.eqs.iter().filter(|e| single(e)) {
            let a = e.coeffs[col];
            if e.constant % a != 0 {
                return Range::Empty;
            }
            let v = -e.constant / a;
            lo = Some(lo.map_or(v, |l| l.max(v)));
            hi = Some(hi.map_or(v, |h| h.min(v)));
        }
        for c in self.ineqs.iter().filter(|c| single(c)) {
            let a = c.coeffs[col];
            if a > 0 {
                let v = ceil_div(-c.constant, a);
                lo = Some(lo.map_or(v, |l| l.max(v)));
            } else {
                let v = (c.constant).div_euclid(-a);
                hi = Some(hi.map_or(v, |h| h.min(v)));
            }
        }
        match (lo, hi) {
            (Some(l), Some(h)) if l > h => Range::Empty,
            (Some(l), Some(h)) => Range::Bounded(l, h),
            _ => Range::Unbounded,
        }
    }

    /// Range of `col` after projecting every other variable out.
    pub fn projected_range(&self, col: usize) -> Result<Range, SolverError> {
        let mut ineqs: Vec<Constraint> = self.ineqs.clone();
        for e in &self.eqs {
            ineqs.push(e.clone());
            ineqs.push(e.negated());
        }
        let mut others: Vec<usize> = self.active().into_iter().filter(|&k| k != col).collect();
        while !others.is_empty() {
            // Cheapest elimination first.
            let (pick, _) = others
                .iter()
                .enumerate()
                .map(|(i, &k)| {
                    let pos = ineqs.iter().filter(|c| c.coeffs[k] > 0).count();
                    let neg = ineqs.iter().filter(|c| c.coeffs[k] < 0).count();
                    (i, pos * neg)
                })
                .min_by_key(|&(_, cost)| cost)
                .unwrap_or((0, 0));
            let k = others.swap_remove(pick);
            ineqs = fourier_motzkin(&ineqs, k)?;
            if ineqs.len() > PROJECTION_LIMIT {
                debug!("projection abandoned with {} constraints", ineqs.len());
                return Ok(Range::Unbounded);
            }
        }
        let mut projected = System::new(self.n, Vec::new(), ineqs);
        if !projected.normalize() {
            return Ok(Range::Empty);
        }
        Ok(projected.direct_range(col))
    }
}

fn ceil_div(a: i64, b: i64) -> i64 {
    -((-a).div_euclid(b))
}

/// Uses `def` (unit coefficient on `col`) to remove `col` from `targets`.
fn eliminate_with(def: &Constraint, col: usize, targets: &mut [Constraint]) -> Result<(), SolverError> {
    let a = def.coeffs[col];
    for c in targets.iter_mut() {
        let b = c.coeffs[col];
        if b != 0 {
            // c - (b / a)·def, exact because a = ±1.
            *c = c.combine(-b * a, def, 1)?;
        }
    }
    Ok(())
}

/// Projects `col` out of a list of inequalities.
pub(crate) fn fourier_motzkin(ineqs: &[Constraint], col: usize) -> Result<Vec<Constraint>, SolverError> {
    let mut out: Vec<Constraint> = Vec::new();
    let mut lower = Vec::new();
    let mut upper = Vec::new();
    for c in ineqs {
        match c.coeffs[col] {
            0 => out.push(c.clone()),
            a if a > 0 => lower.push(c),
            _ => upper.push(c),
        }
    }
    for l in &lower {
        for u in &upper {
            let a = l.coeffs[col];
            let b = -u.coeffs[col];
            let mut combined = l.combine(a, u, b)?;
            if !combined.normalize_inequality() {
                // A constant contradiction: keep it so callers see it.
                out.push(combined);
                continue;
            }
            if !combined.is_constant() && !out.contains(&combined) {
                out.push(combined);
            }
        }
    }
    Ok(out)
}

/// Decides whether the system has an integer solution.
pub(crate) fn is_feasible(system: &System, budget: &mut usize) -> Result<bool, SolverError> {
    search(system.clone(), budget)
}

fn search(mut sys: System, budget: &mut usize) -> Result<bool, SolverError> {
    if *budget == 0 {
        return Err(SolverError::BudgetExceeded);
    }
    *budget -= 1;

    if !sys.simplify(&|_| true, true)? {
        return Ok(false);
    }
    let active = sys.active();
    if active.is_empty() {
        return Ok(true);
    }

    let mut best: Option<(usize, i64, i64)> = None;
    for &k in &active {
        match sys.direct_range(k) {
            Range::Empty => return Ok(false),
            Range::Bounded(lo, hi) if best.map_or(true, |(_, l, h)| hi - lo < h - l) => {
                best = Some((k, lo, hi))
            }
            _ => {}
        }
    }

    let needs_projection = best.map_or(true, |(_, lo, hi)| hi - lo > WIDE_RANGE);
    if needs_projection {
        let candidates: Vec<usize> = match best {
            Some((k, _, _)) => vec![k],
            None => active.clone(),
        };
        for k in candidates {
            match sys.projected_range(k)? {
                Range::Empty => return Ok(false),
                Range::Bounded(lo, hi) if best.map_or(true, |(b, l, h)| b == k || hi - lo < h - l) => {
                    best = Some((k, lo, hi))
                }
                _ => {}
            }
        }
    }

    let Some((col, lo, hi)) = best else {
        // Rationally feasible but unbounded in every direction we can see.
        debug!("unbounded system with {} active variables treated as feasible", active.len());
        return Ok(true);
    };
    for value in lo..=hi {
        if search(sys.fixed(col, value)?, budget)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Counts integer points of the first `n_real` columns. Remaining columns
/// are existential: a point counts once if some assignment of them exists.
pub(crate) fn count_points(system: &System, n_real: usize, limit: u64) -> Result<u64, SolverError> {
    let mut total = 0u64;
    let mut budget = DEFAULT_BUDGET;
    count_rec(system.clone(), 0, n_real, limit, &mut total, &mut budget)?;
    Ok(total)
}

fn count_rec(
    mut sys: System,
    col: usize,
    n_real: usize,
    limit: u64,
    total: &mut u64,
    budget: &mut usize,
) -> Result<(), SolverError> {
    if !sys.normalize() {
        return Ok(());
    }
    if col == n_real {
        if is_feasible(&sys, budget)? {
            *total += 1;
        }
        return check_limit(*total, limit);
    }
    let (lo, hi) = match sys.projected_range(col)? {
        Range::Empty => return Ok(()),
        Range::Bounded(lo, hi) => (lo, hi),
        Range::Unbounded => return Err(SolverError::Unbounded),
    };
    let last_real = col + 1 == n_real;
    let no_existentials = (n_real..sys.n).all(|k| !sys.active().contains(&k));
    if last_real && no_existentials {
        *total += (hi - lo + 1) as u64;
        return check_limit(*total, limit);
    }
    for value in lo..=hi {
        count_rec(sys.fixed(col, value)?, col + 1, n_real, limit, total, budget)?;
    }
    Ok(())
}

fn check_limit(total: u64, limit: u64) -> Result<(), SolverError> {
    if total > limit {
        Err(SolverError::BudgetExceeded)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ineq(coeffs: &[i64], constant: i64) -> Constraint {
        Constraint::from_parts(coeffs.to_vec(), constant)
    }

    #[test]
    fn parity_conflict_is_infeasible() {
        // 2x = 2y + 1
        let sys = System::new(2, vec![ineq(&[2, -2], -1)], vec![]);
        assert!(!is_feasible(&sys, &mut DEFAULT_BUDGET.clone()).expect("decidable"));
    }

    #[test]
    fn box_with_diagonal_cut() {
        // 0 <= x, y <= 9, x + y >= 17
        let sys = System::new(
            2,
            vec![],
            vec![
                ineq(&[1, 0], 0),
                ineq(&[-1, 0], 9),
                ineq(&[0, 1], 0),
                ineq(&[0, -1], 9),
                ineq(&[1, 1], -17),
            ],
        );
        assert!(is_feasible(&sys, &mut DEFAULT_BUDGET.clone()).expect("decidable"));
        assert_eq!(count_points(&sys, 2, 1_000).expect("bounded"), 3);
    }

    #[test]
    fn rationally_feasible_but_integrally_empty() {
        // 1 <= 3x <= 2
        let sys = System::new(1, vec![], vec![ineq(&[3], -1), ineq(&[-3], 2)]);
        assert!(!is_feasible(&sys, &mut DEFAULT_BUDGET.clone()).expect("decidable"));
    }

    #[test]
    fn fourier_motzkin_projects_a_triangle() {
        // 0 <= y <= x <= 5, project y.
        let rows = vec![ineq(&[0, 1], 0), ineq(&[1, -1], 0), ineq(&[-1, 0], 5)];
        let projected = fourier_motzkin(&rows, 1).expect("no overflow");
        let sys = System::new(2, vec![], projected);
        assert_eq!(sys.projected_range(0).expect("ok"), Range::Bounded(0, 5));
    }
}
