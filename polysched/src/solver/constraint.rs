use std::fmt;

use super::SolverError;

pub fn gcd(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.abs(), b.abs());
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// `Σ coeffs[k]·x[k] + constant`, read as `= 0` or `>= 0` depending on
/// which list of the owning system it sits in.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Constraint {
    pub coeffs: Vec<i64>,
    pub constant: i64,
}

impl Constraint {
    pub fn new(n: usize) -> Self {
        Constraint {
            coeffs: vec![0; n],
            constant: 0,
        }
    }

    pub fn from_parts(coeffs: Vec<i64>, constant: i64) -> Self {
        Constraint { coeffs, constant }
    }

    /// Adds `c` to the coefficient of column `col`.
    pub fn with(mut self, col: usize, c: i64) -> Self {
        self.coeffs[col] += c;
        self
    }

    pub fn plus(mut self, c: i64) -> Self {
        self.constant += c;
        self
    }

    pub fn coeff(&self, col: usize) -> i64 {
        self.coeffs[col]
    }

    pub fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0)
    }

    pub fn content(&self) -> i64 {
        self.coeffs.iter().fold(0, |g, &c| gcd(g, c))
    }

    pub fn negated(&self) -> Self {
        Constraint {
            coeffs: self.coeffs.iter().map(|c| -c).collect(),
            constant: -self.constant,
        }
    }

    pub fn eval(&self, point: &[i64]) -> i64 {
        self.coeffs
            .iter()
            .zip(point)
            .map(|(c, x)| c * x)
            .sum::<i64>()
            + self.constant
    }

    /// Pads with zero columns up to `n`.
    pub fn extended(&self, n: usize) -> Self {
        let mut coeffs = self.coeffs.clone();
        coeffs.resize(n, 0);
        Constraint {
            coeffs,
            constant: self.constant,
        }
    }

    /// Moves column `k` to `perm[k]` in a system of `n` columns.
    pub fn permuted(&self, perm: &[usize], n: usize) -> Self {
        let mut coeffs = vec![0; n];
        for (k, &c) in self.coeffs.iter().enumerate() {
            coeffs[perm[k]] += c;
        }
        Constraint {
            coeffs,
            constant: self.constant,
        }
    }

    /// `self + factor·other`, checked.
    pub fn combine(&self, factor: i64, other: &Constraint, self_factor: i64) -> Result<Self, SolverError> {
        let mix = |a: i64, b: i64| -> Result<i64, SolverError> {
            a.checked_mul(self_factor)
                .and_then(|x| b.checked_mul(factor).and_then(|y| x.checked_add(y)))
                .ok_or(SolverError::Overflow)
        };
        let coeffs = self
            .coeffs
            .iter()
            .zip(&other.coeffs)
            .map(|(&a, &b)| mix(a, b))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Constraint {
            coeffs,
            constant: mix(self.constant, other.constant)?,
        })
    }

    /// Fixes column `col` to `value`.
    pub fn fix(&mut self, col: usize, value: i64) -> Result<(), SolverError> {
        let shift = self.coeffs[col]
            .checked_mul(value)
            .and_then(|s| self.constant.checked_add(s))
            .ok_or(SolverError::Overflow)?;
        self.constant = shift;
        self.coeffs[col] = 0;
        Ok(())
    }

    /// Divides an equality by the gcd of its coefficients. `false` when
    /// the equality has no integer solution.
    pub fn normalize_equality(&mut self) -> bool {
        let g = self.content();
        if g == 0 {
            return self.constant == 0;
        }
        if self.constant % g != 0 {
            return false;
        }
        if g > 1 {
            self.coeffs.iter_mut().for_each(|c| *c /= g);
            self.constant /= g;
        }
        // Canonical sign: first non-zero coefficient positive.
        if self.coeffs.iter().find(|&&c| c != 0).is_some_and(|&c| c < 0) {
            *self = self.negated();
        }
        true
    }

    /// Divides an inequality by the gcd of its coefficients, rounding the
    /// constant down. `false` when a constant inequality is violated.
    pub fn normalize_inequality(&mut self) -> bool {
        let g = self.content();
        if g == 0 {
            return self.constant >= 0;
        }
        if g > 1 {
            self.coeffs.iter_mut().for_each(|c| *c /= g);
            self.constant = self.constant.div_euclid(g);
        }
        true
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, &c) in self.coeffs.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let sign = if c < 0 { "-" } else if first { "" } else { "+" };
            let mag = c.abs();
            if first {
                write!(f, "{}", sign)?;
            } else {
                write!(f, " {} ", sign)?;
            }
            if mag == 1 {
                write!(f, "x{}", k)?;
            } else {
                write!(f, "{}x{}", mag, k)?;
            }
            first = false;
        }
        if first {
            write!(f, "{}", self.constant)
        } else if self.constant != 0 {
            let sign = if self.constant < 0 { "-" } else { "+" };
            write!(f, " {} {}", sign, self.constant.abs())
        } else {
            Ok(())
        }
    }
}
