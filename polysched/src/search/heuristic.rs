//! Heuristic search.
//!
//! Every candidate is expanded once per action. Each child carries two
//! running terms:
//!
//! - `heuristic -= γ(action)^steps`, rewarding actions with a large weight
//!   and decaying with path length;
//! - `cost = DISCOUNT * cost + ln(perf / round_best)`, the discounted log
//!   ratio to the round's fastest child.
//!
//! Children are ranked by `heuristic + cost`, lowest first.

use log::info;

use crate::cost_model::CostModel;
use crate::error::Result;
use crate::ir::Program;

use super::mutation::{Action, RandomMutator};
use super::{finish, measured_root, score, SearchConfig, SearchNode, SearchOutcome, SearchStrategy};

pub const DISCOUNT: f64 = 0.1;

/// Per-action weight γ.
pub fn gamma(action: Action) -> f64 {
    match action {
        Action::Fission => 0.7,
        Action::Fusion => 0.7,
        Action::Split => 1.2,
        Action::Reorder => 0.9,
        Action::Parallelize => 1.0,
    }
}

/// Advances the running terms of a child produced by `action`.
pub fn update(node: &mut SearchNode, action: Action, round_best: f64) {
    node.steps += 1;
    node.heuristic -= gamma(action).powi(node.steps as i32);
    let reference = round_best.max(f64::MIN_POSITIVE);
    let ratio = node.performance.max(f64::MIN_POSITIVE) / reference;
    node.cost = DISCOUNT * node.cost + ratio.ln();
}

pub struct HeuristicSearch {
    config: SearchConfig,
    mutator: RandomMutator,
}

impl HeuristicSearch {
    pub fn new(config: SearchConfig) -> Self {
        let mutator = RandomMutator::new(&config);
        HeuristicSearch { config, mutator }
    }
}

impl SearchStrategy for HeuristicSearch {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn search(&mut self, seed: &Program, cost: &mut dyn CostModel) -> Result<SearchOutcome> {
        let budget = self.config.search_budget;
        let keep = self.config.candidate_size.max(1);

        let (root, mut history) = measured_root(seed, &self.config, cost);
        let mut best = root.program.clone();
        let mut best_performance = root.performance;
        let mut candidates = vec![root];
        let mut rounds = Vec::with_capacity(budget);

        for round in 0..budget {
            let mut children = Vec::with_capacity(candidates.len() * Action::ALL.len());
            let mut actions = Vec::with_capacity(children.capacity());
            for parent in &candidates {
                for action in Action::ALL {
                    let child = match self.mutator.mutate_with(&parent.program, action) {
                        Some((program, transform)) => parent.derive(&mut history, program, transform.to_string()),
                        None => parent.derive(&mut history, parent.program.clone(), "Unchanged".to_string()),
                    };
                    children.push(child);
                    actions.push(action);
                }
            }
            score(&mut children, cost, &mut history);

            let round_best = children.iter().map(|c| c.performance).fold(f64::INFINITY, f64::min);
            for (child, &action) in children.iter_mut().zip(&actions) {
                update(child, action, round_best);
            }
            if let Some(top) = children.iter().min_by(|a, b| a.performance.total_cmp(&b.performance)) {
                if top.performance < best_performance {
                    best_performance = top.performance;
                    best = top.program.clone();
                }
            }
            rounds.push(best_performance);

            children.sort_by(|a, b| a.score().total_cmp(&b.score()));
            children.truncate(keep);
            info!(
                "heuristic round {}/{}: round best {:.4} ms, overall {:.4} ms",
                round + 1,
                budget,
                round_best,
                best_performance
            );
            candidates = children;
        }

        finish(best, best_performance, rounds, history)
    }
}
