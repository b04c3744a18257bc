//! Auto-Scheduling Pipeline
//!
//! End-to-end flow from a seed program to a scheduled one:
//!
//! ```text
//! seed program
//!      ↓  Normalize a copy, then AffineCheck (reject non-affine seeds up front)
//!      ↓  search strategy + cost model
//!      ↓  optional sync partitioning of the winner
//!      ↓  Parallelize sweep, optional Vectorize sweep
//! scheduled program + search history
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use polysched::ir::ProgramBuilder;
//! use polysched::pipeline::{AutoScheduler, SchedulerConfig};
//! use std::path::Path;
//!
//! let program = ProgramBuilder::from_file(Path::new("matmul.json"))?;
//! let scheduler = AutoScheduler::new(SchedulerConfig::default());
//! let result = scheduler.run(&program)?;
//! println!("best: {:.3} ms", result.performance);
//! # Ok::<(), polysched::Error>(())
//! ```

use std::fs;
use std::path::Path;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::checks::AffineCheck;
use crate::cost_model::{
    AnalyticalCostConfig, AnalyticalCostModel, CostModel, CostModelConfig, CostModelKind, ProcessCostModel,
};
use crate::error::Result;
use crate::ir::Program;
use crate::search::{build_strategy, SearchConfig, SearchHistory};
use crate::sync;
use crate::transform::{normalize_all, parallelize_all, vectorize_all};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub search: SearchConfig,

    /// Which cost model scores candidates.
    pub cost_model: CostModelKind,

    /// Settings of the compile-and-run cost model.
    pub process: CostModelConfig,

    /// Settings of the analytical cost model.
    pub analytical: AnalyticalCostConfig,

    /// Split the winner's loops into hazard-free groups before the final
    /// Parallelize sweep.
    pub sync_partition: bool,

    /// Mark dependence-free innermost loops of the winner for SIMD.
    pub vectorize: bool,
}

impl SchedulerConfig {
    /// Loads a JSON config; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug)]
pub struct ScheduleResult {
    pub program: Program,
    /// Runtime of the chosen candidate as measured during search (ms).
    pub performance: f64,
    /// Runtime of the seed, when the strategy measured it.
    pub baseline: Option<f64>,
    /// Best runtime after each round.
    pub rounds: Vec<f64>,
    pub strategy: &'static str,
    pub history: SearchHistory,
}

impl ScheduleResult {
    pub fn speedup(&self) -> Option<f64> {
        self.baseline
            .filter(|_| self.performance > 0.0)
            .map(|b| b / self.performance)
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct AutoScheduler {
    config: SchedulerConfig,
}

impl AutoScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        AutoScheduler { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn cost_model(&self) -> Result<Box<dyn CostModel>> {
        Ok(match self.config.cost_model {
            CostModelKind::Analytical => Box::new(AnalyticalCostModel::new(self.config.analytical.clone())),
            CostModelKind::Process => Box::new(ProcessCostModel::new(self.config.process.clone())?),
        })
    }

    /// Runs the configured search with the configured cost model.
    pub fn run(&self, seed: &Program) -> Result<ScheduleResult> {
        let mut cost = self.cost_model()?;
        self.run_with(seed, cost.as_mut())
    }

    /// Runs the configured search with a caller-supplied cost model.
    pub fn run_with(&self, seed: &Program, cost: &mut dyn CostModel) -> Result<ScheduleResult> {
        // Strided loops are affine once normalized; only the copy changes.
        let mut normalized = seed.clone();
        let changed = normalize_all(&mut normalized)?;
        if changed > 0 {
            debug!("normalized {} loop(s) of {} before search", changed, seed.name());
        }
        let seed = &normalized;
        AffineCheck::check(seed)?;

        let mut strategy = build_strategy(&self.config.search);
        info!(
            "scheduling {} with {} search ({} rounds)",
            seed.name(),
            strategy.name(),
            self.config.search.search_budget
        );
        let outcome = strategy.search(seed, cost)?;
        let mut program = outcome.best;

        if self.config.sync_partition {
            let mut partitioned = program.clone();
            match sync::partition_program(&mut partitioned) {
                Ok(added) => {
                    info!("sync partitioning added {} loop(s)", added);
                    parallelize_all(&mut partitioned);
                    program = partitioned.deep_clone().0;
                }
                Err(e) => warn!("sync partitioning skipped: {}", e),
            }
        }

        if self.config.vectorize {
            let marked = vectorize_all(&mut program);
            info!("vectorized {} innermost loop(s)", marked);
        }

        if let Some(path) = &self.config.search.history_log {
            outcome.history.write(path)?;
            info!("search history written to {}", path.display());
        }

        let baseline = outcome.history.performance(outcome.history.root());
        info!("best {:.4} ms (seed {:?} ms)", outcome.best_performance, baseline);
        Ok(ScheduleResult {
            program,
            performance: outcome.best_performance,
            baseline,
            rounds: outcome.rounds,
            strategy: strategy.name(),
            history: outcome.history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    #[test]
    fn config_loads_partial_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cfg.json");
        fs::write(
            &path,
            r#"{"search": {"strategy": "heuristic", "search_budget": 2}, "sync_partition": true}"#,
        )
        .expect("write");
        let config = SchedulerConfig::from_file(&path).expect("load");
        assert_eq!(config.search.search_budget, 2);
        assert_eq!(config.search.candidate_size, 4);
        assert!(config.sync_partition);
        assert_eq!(config.cost_model, CostModelKind::Analytical);
    }

    #[test]
    fn non_affine_seed_is_rejected_before_search() {
        let spec = ProgramBuilder::spec("bad").tensor("A", &[8]).stmt(Stmt::for_range(
            "i",
            0,
            8,
            vec![Stmt::assign("A", vec![Expr::modulo(Expr::var("i"), 2)], Expr::int(1))],
        ));
        let program = ProgramBuilder::build(&spec).expect("build");
        let scheduler = AutoScheduler::new(SchedulerConfig::default());
        let mut calls = 0;
        let mut cost = |_: &Program| {
            calls += 1;
            1.0
        };
        let err = scheduler.run_with(&program, &mut cost).expect_err("mod index");
        assert!(matches!(err, Error::UnsupportedAffine(_)));
        assert_eq!(calls, 0);
    }

    #[test]
    fn strided_seed_is_normalized_before_search() {
        let spec = ProgramBuilder::spec("stride").tensor("A", &[32]).stmt(Stmt::for_step(
            "i",
            0,
            32,
            2,
            vec![Stmt::assign("A", vec![Expr::var("i")], Expr::int(1))],
        ));
        let program = ProgramBuilder::build(&spec).expect("build");
        let scheduler = AutoScheduler::new(SchedulerConfig {
            search: SearchConfig {
                seed: Some(3),
                search_budget: 2,
                beam_width: 2,
                candidate_size: 2,
                ..SearchConfig::default()
            },
            ..SchedulerConfig::default()
        });
        let mut cost = AnalyticalCostModel::default();
        let result = scheduler.run_with(&program, &mut cost).expect("strided loops are affine");
        assert!(result.performance < crate::cost_model::FAILURE_RUNTIME_MS);

        let mut count = 0;
        crate::ir::eval::for_each_instance(&result.program, |_, _| count += 1).expect("bounds");
        assert_eq!(count, 16);
    }
}
