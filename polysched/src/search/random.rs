use log::info;

use crate::cost_model::CostModel;
use crate::error::Result;
use crate::ir::Program;

use super::history::SearchHistory;
use super::mutation::RandomMutator;
use super::{finish, score, SearchConfig, SearchNode, SearchOutcome, SearchStrategy};

/// Applies up to `steps` random mutations in sequence starting at `start`.
/// Each applied mutation becomes a child of the previous node in `history`;
/// nothing is measured.
pub fn random_walk(
    mutator: &mut RandomMutator,
    history: &mut SearchHistory,
    start: &SearchNode,
    steps: usize,
) -> (SearchNode, Vec<String>) {
    let mut current = start.clone();
    let mut applied = Vec::new();
    for _ in 0..steps {
        if let Some((program, transform)) = mutator.mutate(&current.program) {
            let operation = transform.to_string();
            current = current.derive(history, program, operation.clone());
            applied.push(operation);
        }
    }
    (current, applied)
}

/// A single candidate mutated once per round. Only the final program is
/// measured.
pub struct RandomSearch {
    config: SearchConfig,
    mutator: RandomMutator,
}

impl RandomSearch {
    pub fn new(config: SearchConfig) -> Self {
        let mutator = RandomMutator::new(&config);
        RandomSearch { config, mutator }
    }
}

impl SearchStrategy for RandomSearch {
    fn name(&self) -> &'static str {
        "random"
    }

    fn search(&mut self, seed: &Program, cost: &mut dyn CostModel) -> Result<SearchOutcome> {
        let mut history = SearchHistory::new(seed, self.config.kernel_name.clone());
        let root = SearchNode::root(&history, seed.clone());
        let (mut last, applied) = random_walk(&mut self.mutator, &mut history, &root, self.config.search_budget);
        score(std::slice::from_mut(&mut last), cost, &mut history);
        info!(
            "random search applied {} of {} mutations: {:.4} ms",
            applied.len(),
            self.config.search_budget,
            last.performance
        );
        finish(last.program, last.performance, vec![last.performance], history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    #[test]
    fn walk_chains_applied_mutations() {
        let spec = ProgramBuilder::spec("r").tensor("A", &[64]).stmt(Stmt::for_range(
            "i",
            0,
            64,
            vec![Stmt::assign("A", vec![Expr::var("i")], Expr::int(1))],
        ));
        let program = ProgramBuilder::build(&spec).expect("build");
        let config = SearchConfig {
            seed: Some(9),
            ..SearchConfig::default()
        };
        let mut mutator = RandomMutator::new(&config);
        let mut history = SearchHistory::new(&program, "kernel");
        let root = SearchNode::root(&history, program.clone());
        let (last, applied) = random_walk(&mut mutator, &mut history, &root, 3);

        assert_eq!(history.len(), applied.len() + 1);
        assert_eq!(last.id as usize, applied.len());
        let mut node = history.root();
        for op in &applied {
            node = history.children(node)[0];
            assert_eq!(history.operation(node), Some(op.as_str()));
        }
    }
}
