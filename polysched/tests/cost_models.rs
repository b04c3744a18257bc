//! Cost Model Tests
//!
//! The process model is driven with stand-in compilers so the tests do not
//! depend on a C toolchain being installed.

use polysched::{
    AnalyticalCostModel, CostModel, CostModelConfig, Expr, Program, ProcessCostModel, ProgramBuilder, Stmt,
    FAILURE_RUNTIME_MS,
};

fn program() -> Program {
    let spec = ProgramBuilder::spec("axpy")
        .tensor("x", &[64])
        .tensor("y", &[64])
        .stmt(Stmt::for_range(
            "i",
            0,
            64,
            vec![Stmt::assign(
                "y",
                vec![Expr::var("i")],
                Expr::at("y", vec![Expr::var("i")]) + Expr::at("x", vec![Expr::var("i")]) * 2,
            )],
        ));
    ProgramBuilder::build(&spec).expect("build")
}

fn config(dir: &tempfile::TempDir, compiler: &str, flags: &[&str]) -> CostModelConfig {
    CostModelConfig {
        compiler: compiler.to_string(),
        flags: flags.iter().map(|s| s.to_string()).collect(),
        work_dir: Some(dir.path().to_path_buf()),
        timeout_secs: 20,
        ..CostModelConfig::default()
    }
}

// ============================================================================
// Process Cost Model
// ============================================================================

#[test]
fn missing_compiler_yields_the_sentinel_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut model = ProcessCostModel::new(config(&dir, "polysched-no-such-compiler", &[])).expect("model");
    let p = program();
    assert_eq!(model.evaluate(&p), FAILURE_RUNTIME_MS);
    assert_eq!(model.evaluate(&p), FAILURE_RUNTIME_MS);
    assert_eq!(model.measured(), 1);
}

#[cfg(unix)]
#[test]
fn binary_that_never_appears_yields_the_sentinel() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut model = ProcessCostModel::new(config(&dir, "true", &[])).expect("model");
    assert_eq!(model.evaluate(&program()), FAILURE_RUNTIME_MS);
    let leftovers = std::fs::read_dir(dir.path()).expect("read dir").count();
    assert_eq!(leftovers, 0);
}

#[cfg(unix)]
#[test]
fn runtime_reported_by_the_candidate_is_returned() {
    // `sh -c SCRIPT fake <source> -o <binary>`: $3 is the binary path.
    let script = "printf '#!/bin/sh\\necho RUNTIME_MS: 2.5\\n' > \"$3\" && chmod +x \"$3\"";
    let dir = tempfile::tempdir().expect("tempdir");
    let mut model = ProcessCostModel::new(config(&dir, "sh", &["-c", script, "fake"])).expect("model");
    assert_eq!(model.evaluate(&program()), 2.5);
}

#[cfg(unix)]
#[test]
fn candidate_without_runtime_line_yields_the_sentinel() {
    let script = "printf '#!/bin/sh\\necho done\\n' > \"$3\" && chmod +x \"$3\"";
    let dir = tempfile::tempdir().expect("tempdir");
    let mut model = ProcessCostModel::new(config(&dir, "sh", &["-c", script, "fake"])).expect("model");
    assert_eq!(model.evaluate(&program()), FAILURE_RUNTIME_MS);
}

// ============================================================================
// Analytical Cost Model
// ============================================================================

#[test]
fn analytical_estimate_grows_with_the_iteration_count() {
    let small = program();
    let spec = ProgramBuilder::spec("big")
        .tensor("x", &[64, 64])
        .stmt(Stmt::for_range(
            "i",
            0,
            64,
            vec![Stmt::for_range(
                "j",
                0,
                64,
                vec![Stmt::assign("x", vec![Expr::var("i"), Expr::var("j")], Expr::int(0))],
            )],
        ));
    let big = ProgramBuilder::build(&spec).expect("build");
    let mut model = AnalyticalCostModel::default();
    let (a, b) = (model.evaluate(&small), model.evaluate(&big));
    assert!(a > 0.0 && a < FAILURE_RUNTIME_MS);
    assert!(b > a);
}

#[test]
fn strided_program_is_estimated_after_normalization() {
    let spec = ProgramBuilder::spec("stride").tensor("x", &[64]).stmt(Stmt::for_step(
        "i",
        0,
        64,
        4,
        vec![Stmt::assign("x", vec![Expr::var("i")], Expr::int(0))],
    ));
    let strided = ProgramBuilder::build(&spec).expect("build");
    let mut model = AnalyticalCostModel::default();
    let ms = model.evaluate(&strided);
    assert!(ms > 0.0 && ms < FAILURE_RUNTIME_MS);
    assert!(ms < model.evaluate(&program()));
}
