use log::info;

use crate::cost_model::CostModel;
use crate::error::Result;
use crate::ir::Program;

use super::mutation::RandomMutator;
use super::{by_performance, finish, measured_root, score, SearchConfig, SearchNode, SearchOutcome, SearchStrategy};

/// Keeps the `candidate_size` fastest programs; each round every candidate
/// spawns `beam_width` randomly mutated children.
pub struct BeamSearch {
    config: SearchConfig,
    mutator: RandomMutator,
}

impl BeamSearch {
    pub fn new(config: SearchConfig) -> Self {
        let mutator = RandomMutator::new(&config);
        BeamSearch { config, mutator }
    }
}

impl SearchStrategy for BeamSearch {
    fn name(&self) -> &'static str {
        "beam"
    }

    fn search(&mut self, seed: &Program, cost: &mut dyn CostModel) -> Result<SearchOutcome> {
        let budget = self.config.search_budget;
        let width = self.config.beam_width.max(1);
        let keep = self.config.candidate_size.max(1);

        let (root, mut history) = measured_root(seed, &self.config, cost);
        let mut best = root.program.clone();
        let mut best_performance = root.performance;
        let mut candidates = vec![root];
        let mut rounds = Vec::with_capacity(budget);

        for round in 0..budget {
            let mut children: Vec<SearchNode> = Vec::with_capacity(candidates.len() * width);
            for parent in &candidates {
                for _ in 0..width {
                    let child = match self.mutator.mutate(&parent.program) {
                        Some((program, transform)) => parent.derive(&mut history, program, transform.to_string()),
                        None => parent.derive(&mut history, parent.program.clone(), "Unchanged".to_string()),
                    };
                    children.push(child);
                }
            }
            score(&mut children, cost, &mut history);
            children.sort_by(by_performance);

            if let Some(top) = children.first() {
                if top.performance < best_performance {
                    best_performance = top.performance;
                    best = top.program.clone();
                }
            }
            rounds.push(best_performance);
            info!(
                "beam round {}/{}: {} children, best {:.4} ms",
                round + 1,
                budget,
                children.len(),
                best_performance
            );

            children.truncate(keep);
            candidates = children;
        }

        finish(best, best_performance, rounds, history)
    }
}
