//! Polyhedral Analysis Tests
//!
//! Checks the extracted model against brute-force enumeration, the
//! dependence kinds on small kernels, parallel-loop detection and the
//! hazard-free partitioning of loop bodies.

use std::collections::HashMap;

use polysched::dependency::{domain_set, DependencyKind, DependencyModel};
use polysched::ir::eval::for_each_instance;
use polysched::legality::{FullModelVerifier, LegalityChecker};
use polysched::poly::Extractor;
use polysched::sync::{is_parallel, partition_program};
use polysched::{Expr, Program, ProgramBuilder, Stmt, StmtKey};

fn i() -> Expr {
    Expr::var("i")
}

fn j() -> Expr {
    Expr::var("j")
}

fn at(tensor: &str, index: Expr) -> Expr {
    Expr::at(tensor, vec![index])
}

// ============================================================================
// Extraction
// ============================================================================

#[test]
fn domain_cardinality_matches_enumeration() {
    let spec = ProgramBuilder::spec("tri")
        .tensor("A", &[8, 8])
        .tensor("s", &[1])
        .stmt(Stmt::for_range(
            "i",
            0,
            8,
            vec![
                Stmt::for_range(
                    "j",
                    0,
                    i() + 1,
                    vec![Stmt::assign("A", vec![i(), j()], Expr::at("A", vec![j(), i()]))],
                ),
                Stmt::for_range(
                    "k",
                    Expr::div(i(), 2),
                    8,
                    vec![Stmt::assign("s", vec![Expr::int(0)], at("s", Expr::int(0)) + Expr::var("k"))],
                ),
            ],
        ));
    let program = ProgramBuilder::build(&spec).expect("build");

    let mut counts: HashMap<StmtKey, u64> = HashMap::new();
    for_each_instance(&program, |key, _| *counts.entry(key).or_default() += 1).expect("enumerate");

    let model = Extractor::extract(&program).expect("extract");
    assert_eq!(model.statements.len(), 2);
    for stmt in &model.statements {
        let points = domain_set(stmt).expect("domain").count_points(1 << 20).expect("count");
        assert_eq!(points, counts[&stmt.key], "statement {}", stmt.key);
    }
    assert_eq!(counts.values().sum::<u64>(), 36 + (8 * 8 - (0 + 0 + 1 + 1 + 2 + 2 + 3 + 3)));
}

#[test]
fn modulo_index_is_rejected() {
    let spec = ProgramBuilder::spec("mod").tensor("A", &[4]).stmt(Stmt::for_range(
        "i",
        0,
        8,
        vec![Stmt::assign("A", vec![Expr::modulo(i(), 4)], Expr::int(1))],
    ));
    let program = ProgramBuilder::build(&spec).expect("build");
    assert!(matches!(
        Extractor::extract(&program),
        Err(polysched::Error::UnsupportedAffine(_))
    ));
}

// ============================================================================
// Dependences
// ============================================================================

fn kinds_present(program: &Program) -> Vec<DependencyKind> {
    let model = Extractor::extract(program).expect("extract");
    let deps = DependencyModel::analyze(&model).expect("analyze");
    deps.maps()
        .into_iter()
        .filter(|m| !m.is_empty().expect("emptiness"))
        .map(|m| m.kind())
        .collect()
}

#[test]
fn recurrence_has_only_a_flow_dependence() {
    let spec = ProgramBuilder::spec("rec").tensor("A", &[16]).stmt(Stmt::for_range(
        "i",
        1,
        16,
        vec![Stmt::assign("A", vec![i()], at("A", i() - 1) + 1)],
    ));
    let program = ProgramBuilder::build(&spec).expect("build");
    assert_eq!(kinds_present(&program), vec![DependencyKind::Raw]);
}

#[test]
fn reduction_carries_every_kind() {
    let spec = ProgramBuilder::spec("sum")
        .tensor("s", &[1])
        .tensor("x", &[16])
        .stmt(Stmt::for_range(
            "i",
            0,
            16,
            vec![Stmt::assign("s", vec![Expr::int(0)], at("s", Expr::int(0)) + at("x", i()))],
        ));
    let program = ProgramBuilder::build(&spec).expect("build");
    assert_eq!(
        kinds_present(&program),
        vec![DependencyKind::Raw, DependencyKind::War, DependencyKind::Waw]
    );
}

#[test]
fn elementwise_kernel_has_no_dependences() {
    let spec = ProgramBuilder::spec("ew")
        .tensor("A", &[16])
        .tensor("B", &[16])
        .stmt(Stmt::for_range("i", 0, 16, vec![Stmt::assign("A", vec![i()], at("B", i()) * 3)]));
    let program = ProgramBuilder::build(&spec).expect("build");
    assert!(kinds_present(&program).is_empty());
}

// ============================================================================
// Parallelism
// ============================================================================

#[test]
fn only_loops_without_carried_dependences_are_parallel() {
    let spec = ProgramBuilder::spec("nest").tensor("A", &[16, 16]).stmt(Stmt::for_range(
        "i",
        1,
        16,
        vec![Stmt::for_range(
            "j",
            0,
            16,
            vec![Stmt::assign(
                "A",
                vec![i(), j()],
                Expr::at("A", vec![i() - 1, j()]) + 1,
            )],
        )],
    ));
    let program = ProgramBuilder::build(&spec).expect("build");
    let loops = program.loops();
    assert!(!is_parallel(&program, loops[0]).expect("outer"));
    assert!(is_parallel(&program, loops[1]).expect("inner"));
}

// ============================================================================
// Sync Partitioning
// ============================================================================

#[test]
fn four_statements_split_into_two_cyclic_groups() {
    let spec = ProgramBuilder::spec("sync")
        .tensor("A", &[16])
        .tensor("B", &[16])
        .tensor("C", &[16])
        .tensor("D", &[16])
        .stmt(Stmt::for_range(
            "i",
            1,
            16,
            vec![
                Stmt::assign("A", vec![i()], at("B", i() - 1) + 1),
                Stmt::assign("B", vec![i()], at("A", i()) * 2),
                Stmt::assign("C", vec![i()], at("B", i()) + at("D", i() - 1)),
                Stmt::assign("D", vec![i()], at("C", i()) * 2),
            ],
        ));
    let original = ProgramBuilder::build(&spec).expect("build");
    let keys: Vec<StmtKey> = original
        .statements()
        .into_iter()
        .map(|s| original.node(s).stmt_key().expect("statement"))
        .collect();

    let mut program = original.clone();
    assert_eq!(partition_program(&mut program).expect("partition"), 1);

    let loops = program.loops();
    assert_eq!(loops.len(), 2);
    let groups: Vec<Vec<StmtKey>> = loops
        .iter()
        .map(|&lp| {
            program
                .loop_node(lp)
                .expect("loop")
                .body
                .iter()
                .map(|&s| program.node(s).stmt_key().expect("statement"))
                .collect()
        })
        .collect();
    assert_eq!(groups, vec![keys[..2].to_vec(), keys[2..].to_vec()]);
    assert!(FullModelVerifier.is_legal(&original, &program).expect("verify"));
}

#[test]
fn independent_statements_each_get_a_loop() {
    let spec = ProgramBuilder::spec("indep")
        .tensor("A", &[8])
        .tensor("B", &[8])
        .stmt(Stmt::for_range(
            "i",
            0,
            8,
            vec![
                Stmt::assign("A", vec![i()], Expr::int(1)),
                Stmt::assign("B", vec![i()], Expr::int(2)),
            ],
        ));
    let mut program = ProgramBuilder::build(&spec).expect("build");
    assert_eq!(partition_program(&mut program).expect("partition"), 1);
    assert_eq!(program.loops().len(), 2);
}
