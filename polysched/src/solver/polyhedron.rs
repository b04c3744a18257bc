use super::constraint::Constraint;
use super::feasibility::{fourier_motzkin, is_feasible, System, DEFAULT_BUDGET};
use super::SolverError;

/// Inequalities `row >= 0` over `n` variables. Used to rebuild loop bounds
/// one dimension at a time.
#[derive(Clone, Debug)]
pub struct Polyhedron {
    n: usize,
    rows: Vec<Constraint>,
}

impl Polyhedron {
    pub fn new(n: usize) -> Self {
        Polyhedron { n, rows: Vec::new() }
    }

    pub fn dims(&self) -> usize {
        self.n
    }

    pub fn rows(&self) -> &[Constraint] {
        &self.rows
    }

    pub fn add(&mut self, row: Constraint) {
        let mut row = row.extended(self.n);
        if row.normalize_inequality() && row.is_constant() {
            return;
        }
        if !self.rows.contains(&row) {
            self.rows.push(row);
        }
    }

    /// Projects variable `var` out.
    pub fn eliminate(&mut self, var: usize) -> Result<(), SolverError> {
        self.rows = fourier_motzkin(&self.rows, var)?;
        Ok(())
    }

    /// Rows bounding `var` from below (positive coefficient) and from above.
    pub fn bounds_of(&self, var: usize) -> (Vec<Constraint>, Vec<Constraint>) {
        let lower = self.rows.iter().filter(|r| r.coeffs[var] > 0).cloned().collect();
        let upper = self.rows.iter().filter(|r| r.coeffs[var] < 0).cloned().collect();
        (lower, upper)
    }

    pub fn is_empty(&self) -> Result<bool, SolverError> {
        let mut budget = DEFAULT_BUDGET;
        Ok(!is_feasible(&System::new(self.n, Vec::new(), self.rows.clone()), &mut budget)?)
    }

    /// Drops rows implied by the others over the integers.
    pub fn remove_redundant(&mut self) -> Result<(), SolverError> {
        let mut i = 0;
        while i < self.rows.len() {
            let mut others: Vec<Constraint> = self
                .rows
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != i)
                .map(|(_, r)| r.clone())
                .collect();
            others.push(self.rows[i].negated().plus(-1));
            let mut budget = DEFAULT_BUDGET;
            if is_feasible(&System::new(self.n, Vec::new(), others), &mut budget)? {
                i += 1;
            } else {
                self.rows.remove(i);
            }
        }
        Ok(())
    }
}
