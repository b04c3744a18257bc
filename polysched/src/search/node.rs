use crate::ir::Program;

use super::history::{SearchHistory, SearchNodeId};

/// A candidate program plus the bookkeeping strategies rank it by.
#[derive(Clone, Debug)]
pub struct SearchNode {
    pub id: SearchNodeId,
    pub program: Program,
    /// Measured runtime in milliseconds; `f64::MAX` until evaluated.
    pub performance: f64,
    /// Running action-weight term of the heuristic strategy.
    pub heuristic: f64,
    /// Discounted log-ratio cost of the heuristic strategy.
    pub cost: f64,
    pub steps: u32,
    pub operation: String,
}

impl SearchNode {
    pub fn root(history: &SearchHistory, program: Program) -> Self {
        SearchNode {
            id: history.root(),
            program,
            performance: f64::MAX,
            heuristic: 0.0,
            cost: 0.0,
            steps: 0,
            operation: "Root".to_string(),
        }
    }

    /// A child holding `program`, registered in `history` under this node.
    /// Heuristic bookkeeping is inherited; the performance is reset.
    pub fn derive(&self, history: &mut SearchHistory, program: Program, operation: String) -> SearchNode {
        let id = history.branch(self.id, &program, operation.clone());
        SearchNode {
            id,
            program,
            performance: f64::MAX,
            heuristic: self.heuristic,
            cost: self.cost,
            steps: self.steps,
            operation,
        }
    }

    /// Rank used by the heuristic strategy; lower is better.
    pub fn score(&self) -> f64 {
        self.heuristic + self.cost
    }
}
