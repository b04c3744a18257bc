use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{Error, Result};
use crate::ir::eval::floor_div;
use crate::ir::{StmtKey, VarId};
use crate::solver::gcd;

/// `floor((Σ coeffs[v]·v + constant) / divisor)`, divisor always positive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuasiAffine {
    pub coeffs: BTreeMap<VarId, i64>,
    pub constant: i64,
    pub divisor: i64,
}

impl QuasiAffine {
    pub fn constant(value: i64) -> Self {
        QuasiAffine {
            coeffs: BTreeMap::new(),
            constant: value,
            divisor: 1,
        }
    }

    pub fn var(var: VarId) -> Self {
        let mut coeffs = BTreeMap::new();
        coeffs.insert(var, 1);
        QuasiAffine {
            coeffs,
            constant: 0,
            divisor: 1,
        }
    }

    /// No variable terms.
    pub fn is_pure_constant(&self) -> bool {
        self.coeffs.is_empty()
    }

    pub fn coeff(&self, var: VarId) -> i64 {
        self.coeffs.get(&var).copied().unwrap_or(0)
    }

    /// Numerator terms times `factor`.
    pub(crate) fn scaled_numerator(&self, factor: i64) -> Result<(BTreeMap<VarId, i64>, i64)> {
        let mut coeffs = BTreeMap::new();
        for (&v, &c) in &self.coeffs {
            coeffs.insert(v, c.checked_mul(factor).ok_or_else(overflow)?);
        }
        Ok((coeffs, self.constant.checked_mul(factor).ok_or_else(overflow)?))
    }

    fn is_integral(&self) -> bool {
        self.divisor == 1
    }

    /// Sum over the common divisor. Exact only when one side has no
    /// division; two floors are not summed.
    pub fn add(&self, other: &QuasiAffine) -> Result<QuasiAffine> {
        if !self.is_integral() && !other.is_integral() {
            return Err(Error::UnsupportedAffine(format!("sum of two divisions {} and {}", self, other)));
        }
        let (mut coeffs, c1) = self.scaled_numerator(other.divisor)?;
        let (rhs, c2) = other.scaled_numerator(self.divisor)?;
        for (v, c) in rhs {
            let slot = coeffs.entry(v).or_insert(0);
            *slot = slot.checked_add(c).ok_or_else(overflow)?;
        }
        Ok(QuasiAffine {
            coeffs,
            constant: c1.checked_add(c2).ok_or_else(overflow)?,
            divisor: self.divisor.checked_mul(other.divisor).ok_or_else(overflow)?,
        }
        .normalized())
    }

    /// `-floor(n/d) = floor((d - 1 - n)/d)`.
    pub fn neg(&self) -> Result<QuasiAffine> {
        let (coeffs, constant) = self.scaled_numerator(-1)?;
        let constant = constant.checked_add(self.divisor - 1).ok_or_else(overflow)?;
        Ok(QuasiAffine {
            coeffs,
            constant,
            divisor: self.divisor,
        }
        .normalized())
    }

    pub fn sub(&self, other: &QuasiAffine) -> Result<QuasiAffine> {
        self.add(&other.neg()?)
    }

    /// Product with a pure constant `other`.
    pub fn mul_const(&self, other: &QuasiAffine) -> Result<QuasiAffine> {
        let k = other.constant_value();
        if self.is_integral() {
            let (coeffs, constant) = self.scaled_numerator(k)?;
            return Ok(QuasiAffine {
                coeffs,
                constant,
                divisor: 1,
            }
            .normalized());
        }
        match k {
            0 => Ok(QuasiAffine::constant(0)),
            1 => Ok(self.clone()),
            -1 => self.neg(),
            _ => Err(Error::UnsupportedAffine(format!("{} * {}", k, self))),
        }
    }

    /// Floor quotient by a non-zero pure constant `other`.
    pub fn div_const(&self, other: &QuasiAffine) -> Result<QuasiAffine> {
        let k = other.constant_value();
        if k == 0 {
            return Err(Error::UnsupportedAffine(format!("{} / 0", self)));
        }
        // floor(floor(n/d)/k) = floor(n/(d*k)) holds for k > 0 only.
        let base = if k < 0 && !self.is_integral() { self.neg()? } else { self.clone() };
        let k = if k < 0 && !self.is_integral() { -k } else { k };
        Ok(QuasiAffine {
            divisor: base.divisor.checked_mul(k).ok_or_else(overflow)?,
            ..base
        }
        .normalized())
    }

    /// Value of a pure constant.
    fn constant_value(&self) -> i64 {
        floor_div(self.constant, self.divisor)
    }

    /// Drops zero terms, makes the divisor positive, folds pure constants
    /// and divides out the common factor of every term and the divisor.
    pub fn normalized(mut self) -> QuasiAffine {
        self.coeffs.retain(|_, c| *c != 0);
        if self.divisor < 0 {
            self.divisor = -self.divisor;
            self.constant = -self.constant;
            self.coeffs.values_mut().for_each(|c| *c = -*c);
        }
        if self.coeffs.is_empty() {
            self.constant = floor_div(self.constant, self.divisor);
            self.divisor = 1;
            return self;
        }
        let g = self
            .coeffs
            .values()
            .fold(gcd(self.constant, self.divisor), |g, &c| gcd(g, c));
        if g > 1 {
            self.constant /= g;
            self.divisor /= g;
            self.coeffs.values_mut().for_each(|c| *c /= g);
        }
        self
    }

    pub fn eval(&self, env: &HashMap<VarId, i64>) -> Option<i64> {
        let mut sum = self.constant;
        for (v, c) in &self.coeffs {
            sum = sum.checked_add(c.checked_mul(*env.get(v)?)?)?;
        }
        Some(floor_div(sum, self.divisor))
    }
}

fn overflow() -> Error {
    Error::UnsupportedAffine("coefficient overflow".into())
}

impl fmt::Display for QuasiAffine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut terms: Vec<String> = self
            .coeffs
            .iter()
            .map(|(v, c)| if *c == 1 { v.to_string() } else { format!("{}*{}", c, v) })
            .collect();
        if self.constant != 0 || terms.is_empty() {
            terms.push(self.constant.to_string());
        }
        let body = terms.join(" + ");
        if self.divisor == 1 {
            write!(f, "{}", body)
        } else {
            write!(f, "({})/{}", body, self.divisor)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Read,
    Write,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ArrayAccess {
    pub kind: AccessKind,
    pub tensor: String,
    pub indices: Vec<QuasiAffine>,
}

/// One enclosing loop of a statement. Every lower bound and every
/// (inclusive) upper bound holds simultaneously.
#[derive(Clone, Debug, PartialEq)]
pub struct Iteration {
    pub var: VarId,
    pub lower: Vec<QuasiAffine>,
    pub upper: Vec<QuasiAffine>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub key: StmtKey,
    pub accesses: Vec<ArrayAccess>,
    /// Enclosing loops, outermost first.
    pub domain: Vec<Iteration>,
    /// Sibling positions from the root down to the statement; one entry
    /// longer than `domain`.
    pub context: Vec<i64>,
}

impl Statement {
    pub fn iterators(&self) -> Vec<VarId> {
        self.domain.iter().map(|it| it.var).collect()
    }

    pub fn depth(&self) -> usize {
        self.domain.len()
    }

    pub fn accesses_of(&self, kind: AccessKind) -> impl Iterator<Item = &ArrayAccess> {
        self.accesses.iter().filter(move |a| a.kind == kind)
    }

    /// Name of the statement's tuple in dependency maps.
    pub fn tuple_name(&self) -> String {
        self.key.to_string()
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PolyhedralModel {
    pub statements: Vec<Statement>,
}

impl PolyhedralModel {
    pub fn merge(&self, other: &PolyhedralModel) -> PolyhedralModel {
        let mut statements = self.statements.clone();
        statements.extend(other.statements.iter().cloned());
        PolyhedralModel { statements }
    }

    pub fn statement(&self, key: StmtKey) -> Option<&Statement> {
        self.statements.iter().find(|s| s.key == key)
    }

    pub fn max_depth(&self) -> usize {
        self.statements.iter().map(Statement::depth).max().unwrap_or(0)
    }

    /// Width of the logical time vector: contexts and iterators interleaved.
    pub fn schedule_dims(&self) -> usize {
        2 * self.max_depth() + 1
    }
}
