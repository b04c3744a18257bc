//! Cost Models
//!
//! A cost model turns a candidate program into a runtime in milliseconds.
//! Lower is better. Cost models never fail: anything that goes wrong while
//! measuring is logged and reported as [`FAILURE_RUNTIME_MS`], which ranks
//! the candidate last without stopping the search.
//!
//! - [`ProcessCostModel`] renders the program as C, compiles it with an
//!   external compiler, runs it under a hard timeout and parses the
//!   `RUNTIME_MS:` line of its output. Results are cached by program text.
//! - [`AnalyticalCostModel`] estimates runtime from statement instance
//!   counts, the stride of each access along the innermost loop and the
//!   parallel annotations. Deterministic and fast.
//! - Any `FnMut(&Program) -> f64` closure is a cost model too.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fs::{self, File};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use lazy_static::lazy_static;
use log::{debug, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::dependency::domain_set;
use crate::error::Result;
use crate::ir::{Program, VarId};
use crate::poly::{ArrayAccess, Extractor, Statement};
use crate::printer::{render_harness, render_kernel};
use crate::transform::normalize_all;

/// Runtime reported for candidates that could not be measured.
pub const FAILURE_RUNTIME_MS: f64 = 1.0e9;

lazy_static! {
    static ref RUNTIME_LINE: Regex =
        Regex::new(r"(?m)^RUNTIME_MS:\s*([-+]?[0-9]*\.?[0-9]+(?:[eE][-+]?[0-9]+)?)\s*$")
            .expect("valid regex");
}

pub trait CostModel {
    /// Runtime of `program` in milliseconds.
    fn evaluate(&mut self, program: &Program) -> f64;
}

impl<F> CostModel for F
where
    F: FnMut(&Program) -> f64,
{
    fn evaluate(&mut self, program: &Program) -> f64 {
        self(program)
    }
}

/// Which cost model the scheduler builds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CostModelKind {
    Analytical,
    Process,
}

impl Default for CostModelKind {
    fn default() -> Self {
        CostModelKind::Analytical
    }
}

/// First `RUNTIME_MS:` value in `output`.
pub fn parse_runtime(output: &str) -> Option<f64> {
    RUNTIME_LINE
        .captures(output)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

// ============================================================================
// Compile-and-run measurement
// ============================================================================

/// Configuration for [`ProcessCostModel`]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModelConfig {
    /// Compiler executable (default: g++)
    pub compiler: String,

    /// Flags passed before the source file
    pub flags: Vec<String>,

    /// Directory for sources and binaries; a temporary directory when unset
    pub work_dir: Option<PathBuf>,

    /// Name of the generated kernel function
    pub kernel_name: String,

    /// Timed kernel calls per run (default: 3)
    pub repetitions: u32,

    /// Hard limit for compiling and for running, each (seconds)
    pub timeout_secs: u64,

    /// Whether to delete sources and binaries after measuring
    pub cleanup: bool,
}

impl Default for CostModelConfig {
    fn default() -> Self {
        CostModelConfig {
            compiler: "g++".to_string(),
            flags: vec!["--std=c++11".into(), "-O3".into(), "-fopenmp".into()],
            work_dir: None,
            kernel_name: "kernel".to_string(),
            repetitions: 3,
            timeout_secs: 400,
            cleanup: true,
        }
    }
}

enum WorkDir {
    Temporary(TempDir),
    Fixed(PathBuf),
}

impl WorkDir {
    fn path(&self) -> &Path {
        match self {
            WorkDir::Temporary(t) => t.path(),
            WorkDir::Fixed(p) => p,
        }
    }
}

/// Measures candidates by compiling and running them.
pub struct ProcessCostModel {
    config: CostModelConfig,
    work_dir: WorkDir,

    /// Cache of measured costs: program_hash -> runtime_ms
    cache: HashMap<u64, f64>,

    measured: usize,
}

impl ProcessCostModel {
    pub fn new(config: CostModelConfig) -> Result<Self> {
        let work_dir = match &config.work_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                WorkDir::Fixed(dir.clone())
            }
            None => WorkDir::Temporary(tempfile::Builder::new().prefix("polysched").tempdir()?),
        };
        Ok(ProcessCostModel {
            config,
            work_dir,
            cache: HashMap::new(),
            measured: 0,
        })
    }

    pub fn config(&self) -> &CostModelConfig {
        &self.config
    }

    /// Number of programs actually compiled (cache misses).
    pub fn measured(&self) -> usize {
        self.measured
    }

    fn hash_program(&self, program: &Program) -> u64 {
        let mut hasher = DefaultHasher::new();
        render_kernel(program, &self.config.kernel_name).hash(&mut hasher);
        hasher.finish()
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs.max(1))
    }

    /// Runs `command` with stdout and stderr sent to `log`, killing it once
    /// the timeout passes. `Ok(true)` when it exited successfully.
    fn run_bounded(&self, command: &mut Command, log: &Path) -> std::result::Result<bool, String> {
        let out = File::create(log).map_err(|e| format!("cannot create {}: {}", log.display(), e))?;
        let err = out.try_clone().map_err(|e| e.to_string())?;
        let mut child = command
            .stdout(Stdio::from(out))
            .stderr(Stdio::from(err))
            .spawn()
            .map_err(|e| format!("failed to start {:?}: {}", command.get_program(), e))?;

        let deadline = Instant::now() + self.timeout();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status.success()),
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("timed out after {}s", self.timeout().as_secs()));
                }
                Ok(None) => thread::sleep(Duration::from_millis(10)),
                Err(e) => return Err(e.to_string()),
            }
        }
    }

    fn measure(&self, program: &Program, tag: u64) -> std::result::Result<f64, String> {
        let dir = self.work_dir.path();
        let source = dir.join(format!("candidate_{:016x}.cc", tag));
        let binary = dir.join(format!("candidate_{:016x}", tag));
        let build_log = dir.join(format!("candidate_{:016x}.build", tag));
        let run_log = dir.join(format!("candidate_{:016x}.out", tag));

        let text = render_harness(program, &self.config.kernel_name, self.config.repetitions);
        fs::write(&source, text).map_err(|e| format!("cannot write {}: {}", source.display(), e))?;

        let result = (|| {
            let mut compile = Command::new(&self.config.compiler);
            compile.args(&self.config.flags).arg(&source).arg("-o").arg(&binary);
            if !self.run_bounded(&mut compile, &build_log)? {
                let diagnostics = fs::read_to_string(&build_log).unwrap_or_default();
                return Err(format!("compilation failed: {}", diagnostics.trim()));
            }

            if !self.run_bounded(&mut Command::new(&binary), &run_log)? {
                return Err("candidate exited with failure".to_string());
            }
            let output = fs::read_to_string(&run_log).map_err(|e| e.to_string())?;
            parse_runtime(&output).ok_or_else(|| "no RUNTIME_MS line in output".to_string())
        })();

        if self.config.cleanup {
            for file in [&source, &binary, &build_log, &run_log] {
                let _ = fs::remove_file(file);
            }
        }
        result
    }
}

impl CostModel for ProcessCostModel {
    fn evaluate(&mut self, program: &Program) -> f64 {
        let key = self.hash_program(program);
        if let Some(&cached) = self.cache.get(&key) {
            return cached;
        }
        let runtime = match self.measure(program, key) {
            Ok(ms) => ms,
            Err(e) => {
                warn!("measuring {} failed: {}", program.name(), e);
                FAILURE_RUNTIME_MS
            }
        };
        self.measured += 1;
        debug!("{} measured at {:.6} ms", program.name(), runtime);
        self.cache.insert(key, runtime);
        runtime
    }
}

// ============================================================================
// Analytical estimate
// ============================================================================

/// Configuration for [`AnalyticalCostModel`]
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticalCostConfig {
    /// Cost of one contiguous access (nanoseconds)
    pub access_cost_ns: f64,

    /// Cost of one statement instance beyond its accesses (nanoseconds)
    pub loop_overhead_ns: f64,

    /// Multiplier for accesses that stride along the innermost loop
    pub strided_penalty: f64,

    /// Speedup assumed for statements under a parallel loop
    pub threads: usize,
}

impl Default for AnalyticalCostConfig {
    fn default() -> Self {
        AnalyticalCostConfig {
            access_cost_ns: 1.0,
            loop_overhead_ns: 0.5,
            strided_penalty: 8.0,
            threads: 4,
        }
    }
}

/// Upper limit on the instances counted per statement.
const INSTANCE_LIMIT: u64 = 1 << 36;

#[derive(Clone, Debug, Default)]
pub struct AnalyticalCostModel {
    config: AnalyticalCostConfig,
}

impl AnalyticalCostModel {
    pub fn new(config: AnalyticalCostConfig) -> Self {
        AnalyticalCostModel { config }
    }

    /// Whether consecutive iterations of `innermost` touch neighbouring
    /// elements: it appears only in the last subscript, with a unit step.
    fn contiguous(access: &ArrayAccess, innermost: Option<VarId>) -> bool {
        let Some(v) = innermost else {
            return true;
        };
        let Some((last, outer)) = access.indices.split_last() else {
            return true;
        };
        let in_outer = outer.iter().any(|e| e.coeff(v) != 0);
        let step = last.coeff(v);
        !in_outer && (step == 0 || (step.abs() == 1 && last.divisor == 1))
    }

    fn statement_cost(&self, stmt: &Statement, parallel: &HashMap<VarId, bool>) -> Result<f64> {
        let instances = domain_set(stmt)?.count_points(INSTANCE_LIMIT)? as f64;
        let innermost = stmt.iterators().last().copied();
        let per_instance: f64 = stmt
            .accesses
            .iter()
            .map(|a| {
                if Self::contiguous(a, innermost) {
                    self.config.access_cost_ns
                } else {
                    self.config.access_cost_ns * self.config.strided_penalty
                }
            })
            .sum::<f64>()
            + self.config.loop_overhead_ns;
        let under_parallel = stmt
            .iterators()
            .iter()
            .any(|v| parallel.get(v).copied().unwrap_or(false));
        let speedup = if under_parallel {
            self.config.threads.max(1) as f64
        } else {
            1.0
        };
        Ok(instances * per_instance / speedup)
    }

    /// Estimated runtime in milliseconds.
    pub fn estimate(&self, program: &Program) -> Result<f64> {
        let mut normalized = program.clone();
        normalize_all(&mut normalized)?;
        let program = &normalized;
        let model = Extractor::extract(program)?;
        let parallel: HashMap<VarId, bool> = program
            .loops()
            .into_iter()
            .filter_map(|lp| program.as_loop(lp).map(|l| (l.var, l.parallel)))
            .collect();
        let mut total_ns = 0.0;
        for stmt in &model.statements {
            total_ns += self.statement_cost(stmt, &parallel)?;
        }
        Ok(total_ns / 1.0e6)
    }
}

impl CostModel for AnalyticalCostModel {
    fn evaluate(&mut self, program: &Program) -> f64 {
        match self.estimate(program) {
            Ok(ms) => ms,
            Err(e) => {
                warn!("estimating {} failed: {}", program.name(), e);
                FAILURE_RUNTIME_MS
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, Stmt};

    fn copy_nest(row_major: bool) -> Program {
        let (outer, inner) = if row_major { ("i", "j") } else { ("j", "i") };
        let spec = ProgramBuilder::spec("copy")
            .tensor("A", &[32, 32])
            .tensor("B", &[32, 32])
            .stmt(Stmt::for_range(
                outer,
                0,
                32,
                vec![Stmt::for_range(
                    inner,
                    0,
                    32,
                    vec![Stmt::assign(
                        "A",
                        vec![Expr::var("i"), Expr::var("j")],
                        Expr::at("B", vec![Expr::var("i"), Expr::var("j")]),
                    )],
                )],
            ));
        ProgramBuilder::build(&spec).expect("build")
    }

    #[test]
    fn runtime_line_is_parsed() {
        assert_eq!(parse_runtime("warmup\nRUNTIME_MS: 1.250000\n"), Some(1.25));
        assert_eq!(parse_runtime("RUNTIME_MS: 3e-2"), Some(0.03));
        assert_eq!(parse_runtime("RUNTIME_MS: nan"), None);
        assert_eq!(parse_runtime(""), None);
    }

    #[test]
    fn column_major_traversal_costs_more() {
        let mut model = AnalyticalCostModel::default();
        let good = model.evaluate(&copy_nest(true));
        let bad = model.evaluate(&copy_nest(false));
        assert!(good < bad);
        assert!(good > 0.0);
    }

    #[test]
    fn parallel_annotation_lowers_the_estimate() {
        let mut model = AnalyticalCostModel::default();
        let mut program = copy_nest(true);
        let sequential = model.evaluate(&program);
        let outer = program.loops()[0];
        if let Some(l) = program.as_loop_mut(outer) {
            l.parallel = true;
        }
        assert!(model.evaluate(&program) < sequential);
    }

    #[test]
    fn closures_are_cost_models() {
        let mut calls = 0;
        let mut model = |_: &Program| {
            calls += 1;
            2.0
        };
        let program = copy_nest(true);
        assert_eq!(model.evaluate(&program), 2.0);
        assert_eq!(calls, 1);
    }
}
