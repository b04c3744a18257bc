use log::{debug, info};

use crate::cost_model::CostModel;
use crate::error::Result;
use crate::ir::Program;

use super::mutation::RandomMutator;
use super::random::random_walk;
use super::{by_performance, finish, measured_root, score, SearchConfig, SearchOutcome, SearchStrategy};

/// Every round each candidate spawns `beam_width` rollouts, each a random
/// walk of `rollout_budget` mutations. Rollout endpoints are measured and
/// the `candidate_size` fastest survive.
pub struct MonteCarloSearch {
    config: SearchConfig,
    mutator: RandomMutator,
}

impl MonteCarloSearch {
    pub fn new(config: SearchConfig) -> Self {
        let mutator = RandomMutator::new(&config);
        MonteCarloSearch { config, mutator }
    }
}

impl SearchStrategy for MonteCarloSearch {
    fn name(&self) -> &'static str {
        "monte-carlo"
    }

    fn search(&mut self, seed: &Program, cost: &mut dyn CostModel) -> Result<SearchOutcome> {
        let budget = self.config.search_budget;
        let rollouts = self.config.beam_width.max(1);
        let keep = self.config.candidate_size.max(1);

        let (root, mut history) = measured_root(seed, &self.config, cost);
        let mut best = root.program.clone();
        let mut best_performance = root.performance;
        let mut candidates = vec![root];
        let mut rounds = Vec::with_capacity(budget);

        for round in 0..budget {
            let mut ends = Vec::with_capacity(candidates.len() * rollouts);
            for parent in &candidates {
                for _ in 0..rollouts {
                    let (end, applied) =
                        random_walk(&mut self.mutator, &mut history, parent, self.config.rollout_budget);
                    debug!("rollout from node {}: [{}]", parent.id, applied.join(", "));
                    ends.push(end);
                }
            }
            score(&mut ends, cost, &mut history);
            ends.sort_by(by_performance);

            if let Some(top) = ends.first() {
                if top.performance < best_performance {
                    best_performance = top.performance;
                    best = top.program.clone();
                }
            }
            rounds.push(best_performance);
            info!(
                "monte-carlo round {}/{}: {} rollouts, best {:.4} ms",
                round + 1,
                budget,
                ends.len(),
                best_performance
            );

            ends.truncate(keep);
            candidates = ends;
        }

        finish(best, best_performance, rounds, history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    #[test]
    fn rollouts_improve_on_the_seed() {
        let spec = ProgramBuilder::spec("mc").tensor("A", &[64]).stmt(Stmt::for_range(
            "i",
            0,
            64,
            vec![Stmt::assign("A", vec![Expr::var("i")], Expr::int(2))],
        ));
        let program = ProgramBuilder::build(&spec).expect("build");
        let mut search = MonteCarloSearch::new(SearchConfig {
            seed: Some(4),
            search_budget: 2,
            beam_width: 3,
            candidate_size: 2,
            rollout_budget: 3,
            ..SearchConfig::default()
        });
        let mut cost = |p: &Program| 100.0 / p.loops().len() as f64;
        let outcome = search.search(&program, &mut cost).expect("search");
        assert_eq!(outcome.rounds.len(), 2);
        assert!(outcome.rounds[1] <= outcome.rounds[0]);
        assert!(outcome.best_performance <= 100.0);
    }
}
