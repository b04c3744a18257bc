//! Random single-step mutation of a candidate program.
//!
//! A mutation picks a rewrite and the loop(s) it applies to at random, runs
//! it through [`apply_checked`] and keeps the result only when it applied
//! and passed verification. Rejected picks are retried with fresh random
//! choices up to `max_trials` times.

use std::fmt;

use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::checks::{ConstantBoundaryCheck, DivisibleBoundaryCheck};
use crate::error::Result;
use crate::ir::{NodeId, Program};
use crate::legality::FullModelVerifier;
use crate::transform::{apply_checked, Outcome, Transform};

use super::SearchConfig;

/// Rewrites the search draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    Fission,
    Fusion,
    Split,
    Reorder,
    Parallelize,
}

impl Action {
    pub const ALL: [Action; 5] = [
        Action::Fission,
        Action::Fusion,
        Action::Split,
        Action::Reorder,
        Action::Parallelize,
    ];
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Fission => "fission",
            Action::Fusion => "fusion",
            Action::Split => "split",
            Action::Reorder => "reorder",
            Action::Parallelize => "parallelize",
        };
        f.write_str(name)
    }
}

/// Loops below `outer` reachable through single-loop bodies.
fn perfect_descendants(program: &Program, outer: NodeId) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut current = outer;
    while let Some(l) = program.as_loop(current) {
        match l.body.as_slice() {
            [only] if program.as_loop(*only).is_some() => {
                found.push(*only);
                current = *only;
            }
            _ => break,
        }
    }
    found
}

pub struct RandomMutator {
    rng: StdRng,
    verifier: FullModelVerifier,
    max_trials: usize,
    split_factors: Vec<i64>,
}

impl RandomMutator {
    pub fn new(config: &SearchConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        RandomMutator {
            rng,
            verifier: FullModelVerifier,
            max_trials: config.max_trials.max(1),
            split_factors: config.split_factors.iter().copied().filter(|&f| f > 1).collect(),
        }
    }

    fn split_factor(&mut self, program: &Program, lp: NodeId) -> Option<i64> {
        let extent = ConstantBoundaryCheck::bounds(program, lp)
            .filter(|&(_, _, step)| step > 0)
            .map(|(min, max, step)| (max - min + step - 1) / step);
        let fits: Vec<i64> = match extent {
            Some(n) => self.split_factors.iter().copied().filter(|&f| f < n).collect(),
            None => self.split_factors.clone(),
        };
        let exact: Vec<i64> = fits
            .iter()
            .copied()
            .filter(|&f| DivisibleBoundaryCheck::check(program, lp, f))
            .collect();
        if exact.is_empty() {
            fits.choose(&mut self.rng).copied()
        } else {
            exact.choose(&mut self.rng).copied()
        }
    }

    /// Random target(s) for `action`, or `None` when the program offers none.
    pub fn propose(&mut self, program: &Program, action: Action) -> Option<Transform> {
        let loops = program.loops();
        let lp = *loops.choose(&mut self.rng)?;
        match action {
            Action::Fission => Some(Transform::Fission(lp)),
            Action::Parallelize => Some(Transform::Parallelize(lp)),
            Action::Split => {
                let factor = self.split_factor(program, lp)?;
                Some(Transform::Split { target: lp, factor })
            }
            Action::Fusion => {
                let (parent, index) = program.parent_of(lp)?;
                let second = *program.node(parent).body()?.get(index + 1)?;
                program.as_loop(second)?;
                Some(Transform::Fusion { first: lp, second })
            }
            Action::Reorder => {
                let inner = *perfect_descendants(program, lp).choose(&mut self.rng)?;
                Some(Transform::Reorder { outer: lp, inner })
            }
        }
    }

    /// One successful `action` on a copy of `program`, or `None` once every
    /// trial was rejected.
    pub fn mutate_with(&mut self, program: &Program, action: Action) -> Option<(Program, Transform)> {
        for trial in 0..self.max_trials {
            if let Some(found) = self.attempt(program, action, trial) {
                return Some(found);
            }
        }
        None
    }

    /// Like [`mutate_with`](Self::mutate_with) with a fresh random action
    /// on every trial.
    pub fn mutate(&mut self, program: &Program) -> Option<(Program, Transform)> {
        for trial in 0..self.max_trials {
            let action = Action::ALL[self.rng.gen_range(0..Action::ALL.len())];
            if let Some(found) = self.attempt(program, action, trial) {
                return Some(found);
            }
        }
        None
    }

    fn attempt(&mut self, program: &Program, action: Action, trial: usize) -> Option<(Program, Transform)> {
        let Some(transform) = self.propose(program, action) else {
            debug!("trial {}: no target for {}", trial, action);
            return None;
        };
        match self.check(program, &transform) {
            Ok(Outcome::Applied(p)) => {
                debug!("trial {}: applied {}", trial, transform);
                Some((p, transform))
            }
            Ok(Outcome::NotApplicable) => {
                debug!("trial {}: {} not applicable", trial, transform);
                None
            }
            Ok(Outcome::Illegal) => {
                debug!("trial {}: {} rejected as illegal", trial, transform);
                None
            }
            Err(e) => {
                debug!("trial {}: {} failed: {}", trial, transform, e);
                None
            }
        }
    }

    fn check(&self, program: &Program, transform: &Transform) -> Result<Outcome> {
        apply_checked(program, transform, &self.verifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    fn config(seed: u64) -> SearchConfig {
        SearchConfig {
            seed: Some(seed),
            ..SearchConfig::default()
        }
    }

    fn nest() -> Program {
        let spec = ProgramBuilder::spec("m").tensor("A", &[16, 16]).stmt(Stmt::for_range(
            "i",
            0,
            16,
            vec![Stmt::for_range(
                "j",
                0,
                16,
                vec![Stmt::assign(
                    "A",
                    vec![Expr::var("i"), Expr::var("j")],
                    Expr::at("A", vec![Expr::var("i"), Expr::var("j")]) + 1,
                )],
            )],
        ));
        ProgramBuilder::build(&spec).expect("build")
    }

    #[test]
    fn split_prefers_factors_dividing_the_extent() {
        let program = nest();
        let mut m = RandomMutator::new(&SearchConfig {
            split_factors: vec![32, 16, 8, 3],
            ..config(1)
        });
        for _ in 0..20 {
            match m.propose(&program, Action::Split) {
                Some(Transform::Split { factor, .. }) => assert_eq!(factor, 8),
                other => panic!("unexpected proposal {:?}", other),
            }
        }
    }

    #[test]
    fn reorder_targets_a_perfectly_nested_loop() {
        let program = nest();
        let loops = program.loops();
        let mut m = RandomMutator::new(&config(3));
        for _ in 0..20 {
            match m.propose(&program, Action::Reorder) {
                Some(Transform::Reorder { outer, inner }) => {
                    assert_eq!((outer, inner), (loops[0], loops[1]));
                }
                None => {}
                other => panic!("unexpected proposal {:?}", other),
            }
        }
    }

    #[test]
    fn seeded_mutators_agree() {
        let program = nest();
        let a = RandomMutator::new(&config(7)).mutate(&program).map(|(_, t)| t);
        let b = RandomMutator::new(&config(7)).mutate(&program).map(|(_, t)| t);
        assert_eq!(a, b);
    }

    #[test]
    fn mutation_leaves_the_input_untouched() {
        let program = nest();
        let before = program.clone();
        let mut m = RandomMutator::new(&config(11));
        let _ = m.mutate_with(&program, Action::Split);
        assert!(program.nodes_equal(program.root(), &before, before.root()));
    }

    #[test]
    fn zero_step_loop_still_gets_a_split_factor() {
        let spec = ProgramBuilder::spec("stuck").tensor("A", &[16]).stmt(Stmt::for_step(
            "i",
            0,
            16,
            0,
            vec![Stmt::assign("A", vec![Expr::var("i")], 1)],
        ));
        let program = ProgramBuilder::build(&spec).expect("build");
        let mut m = RandomMutator::new(&SearchConfig {
            split_factors: vec![4, 2],
            ..config(9)
        });
        match m.propose(&program, Action::Split) {
            Some(Transform::Split { factor, .. }) => assert!(factor == 4 || factor == 2),
            other => panic!("unexpected proposal {:?}", other),
        }
    }
}
