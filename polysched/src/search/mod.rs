//! Schedule Search
//!
//! Strategies explore sequences of checked rewrites starting from a seed
//! program and keep the fastest candidate a [`CostModel`] reports.
//!
//! ```text
//! seed ──► expand (random checked rewrites) ──► score ──► rank ──► keep top-k
//!            ▲                                                       │
//!            └───────────────────────── next round ──────────────────┘
//! ```
//!
//! | Strategy     | Expansion per candidate                 | Ranking                   |
//! |--------------|-----------------------------------------|---------------------------|
//! | `beam`       | `beam_width` random mutations           | runtime                   |
//! | `heuristic`  | one child per action, weighted by γ     | heuristic + discounted cost |
//! | `random`     | one mutation per round, single candidate | none until the end       |
//! | `monte-carlo`| `beam_width` random rollouts            | runtime                   |
//!
//! Every candidate is an independent copy of its parent, so rounds never
//! share mutable state. All strategies end by folding constants,
//! dropping dead statements and a Parallelize sweep over the winner.

use std::path::PathBuf;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cost_model::CostModel;
use crate::error::Result;
use crate::ir::Program;
use crate::transform::{eliminate_dead_code, fold_constants, normalize_all, parallelize_all};

pub mod beam;
pub mod heuristic;
pub mod history;
pub mod monte_carlo;
pub mod mutation;
pub mod node;
pub mod random;

pub use beam::BeamSearch;
pub use heuristic::HeuristicSearch;
pub use history::{HistoryLog, HistoryTree, SearchHistory, SearchNodeId};
pub use monte_carlo::MonteCarloSearch;
pub use mutation::{Action, RandomMutator};
pub use node::SearchNode;
pub use random::RandomSearch;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    Beam,
    Heuristic,
    Random,
    MonteCarlo,
}

impl Default for StrategyKind {
    fn default() -> Self {
        StrategyKind::Beam
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub strategy: StrategyKind,

    /// Children per candidate and round (beam), rollouts per candidate
    /// (Monte Carlo).
    pub beam_width: usize,

    /// Candidates kept between rounds.
    pub candidate_size: usize,

    /// Rounds.
    pub search_budget: usize,

    /// Random picks tried per mutation before giving up on it.
    pub max_trials: usize,

    /// Split factors, tried in random order.
    pub split_factors: Vec<i64>,

    /// Seed of the search's random generator; drawn from entropy if absent.
    pub seed: Option<u64>,

    /// Mutations per Monte Carlo rollout.
    pub rollout_budget: usize,

    /// Where to write the search-history log.
    pub history_log: Option<PathBuf>,

    /// Function name used when rendering candidates into the log.
    pub kernel_name: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            strategy: StrategyKind::default(),
            beam_width: 4,
            candidate_size: 4,
            search_budget: 10,
            max_trials: 10,
            split_factors: vec![128, 64, 32, 16, 8, 4, 2],
            seed: None,
            rollout_budget: 5,
            history_log: None,
            kernel_name: "kernel".to_string(),
        }
    }
}

// ============================================================================
// Strategy Interface
// ============================================================================

#[derive(Debug)]
pub struct SearchOutcome {
    /// Winner, parallelized and compacted; shares nothing with the seed.
    pub best: Program,
    /// Runtime of the winner before the final Parallelize sweep.
    pub best_performance: f64,
    /// Best runtime seen so far, after each round.
    pub rounds: Vec<f64>,
    pub history: SearchHistory,
}

pub trait SearchStrategy {
    fn name(&self) -> &'static str;

    fn search(&mut self, seed: &Program, cost: &mut dyn CostModel) -> Result<SearchOutcome>;
}

pub fn build_strategy(config: &SearchConfig) -> Box<dyn SearchStrategy> {
    match config.strategy {
        StrategyKind::Beam => Box::new(BeamSearch::new(config.clone())),
        StrategyKind::Heuristic => Box::new(HeuristicSearch::new(config.clone())),
        StrategyKind::Random => Box::new(RandomSearch::new(config.clone())),
        StrategyKind::MonteCarlo => Box::new(MonteCarloSearch::new(config.clone())),
    }
}

/// Orders candidates by ascending runtime.
pub(crate) fn by_performance(a: &SearchNode, b: &SearchNode) -> std::cmp::Ordering {
    a.performance.total_cmp(&b.performance)
}

/// Measures every node and records the results in `history`.
pub(crate) fn score(nodes: &mut [SearchNode], cost: &mut dyn CostModel, history: &mut SearchHistory) {
    for node in nodes.iter_mut() {
        node.performance = cost.evaluate(&node.program);
        history.record_perf(node.id, node.performance);
    }
}

/// The measured seed, root of a fresh history.
pub(crate) fn measured_root(
    seed: &Program,
    config: &SearchConfig,
    cost: &mut dyn CostModel,
) -> (SearchNode, SearchHistory) {
    let mut history = SearchHistory::new(seed, config.kernel_name.clone());
    let mut root = SearchNode::root(&history, seed.clone());
    score(std::slice::from_mut(&mut root), cost, &mut history);
    (root, history)
}

/// Clean-up and forced Parallelize sweep over the winner, then a
/// compacting copy.
pub(crate) fn finish(
    mut best: Program,
    best_performance: f64,
    rounds: Vec<f64>,
    history: SearchHistory,
) -> Result<SearchOutcome> {
    normalize_all(&mut best)?;
    fold_constants(&mut best);
    if let Err(e) = eliminate_dead_code(&mut best) {
        debug!("dead-code elimination skipped: {}", e);
    }
    let parallel = parallelize_all(&mut best);
    debug!("final sweep marked {} loop(s) parallel", parallel);
    let (best, _) = best.deep_clone();
    Ok(SearchOutcome {
        best,
        best_performance,
        rounds,
        history,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_fills_missing_fields_with_defaults() {
        let config: SearchConfig = serde_json::from_str(r#"{"strategy": "monte-carlo", "seed": 5}"#).expect("parse");
        assert_eq!(config.strategy, StrategyKind::MonteCarlo);
        assert_eq!(config.seed, Some(5));
        assert_eq!(config.beam_width, 4);
        assert_eq!(config.split_factors, vec![128, 64, 32, 16, 8, 4, 2]);
    }

    #[test]
    fn factory_honours_the_strategy_kind() {
        for (kind, name) in [
            (StrategyKind::Beam, "beam"),
            (StrategyKind::Heuristic, "heuristic"),
            (StrategyKind::Random, "random"),
            (StrategyKind::MonteCarlo, "monte-carlo"),
        ] {
            let config = SearchConfig {
                strategy: kind,
                ..SearchConfig::default()
            };
            assert_eq!(build_strategy(&config).name(), name);
        }
    }
}
