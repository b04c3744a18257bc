//! Loop Transformation Tests
//!
//! Every rewrite is exercised through `apply_checked` with the full-model
//! verifier, once on a program where it preserves all dependences and once
//! where it would break one.

use polysched::ir::eval::for_each_instance;
use polysched::legality::FullModelVerifier;
use polysched::transform::{apply_checked, is_normalized, normalize_all, Outcome, Transform};
use polysched::{Expr, Program, ProgramBuilder, Stmt};

fn build(name: &str, tensors: &[(&str, &[i64])], body: Vec<Stmt>) -> Program {
    let mut spec = ProgramBuilder::spec(name);
    for (t, shape) in tensors {
        spec = spec.tensor(t, shape);
    }
    for s in body {
        spec = spec.stmt(s);
    }
    ProgramBuilder::build(&spec).expect("build")
}

fn at(tensor: &str, index: Expr) -> Expr {
    Expr::at(tensor, vec![index])
}

fn i() -> Expr {
    Expr::var("i")
}

fn check(program: &Program, transform: Transform) -> Outcome {
    apply_checked(program, &transform, &FullModelVerifier).expect("apply_checked")
}

// ============================================================================
// Normalize / Split
// ============================================================================

#[test]
fn normalize_is_idempotent() {
    let mut p = build(
        "norm",
        &[("A", &[64])],
        vec![Stmt::for_step("i", 3, 40, 4, vec![Stmt::assign("A", vec![i()], Expr::int(1))])],
    );
    let changed = normalize_all(&mut p).expect("normalize");
    assert_eq!(changed, 1);
    let lp = p.loops()[0];
    assert!(is_normalized(&p, lp).expect("loop"));

    let snapshot = p.clone();
    assert_eq!(normalize_all(&mut p).expect("normalize"), 0);
    assert!(p.nodes_equal(p.root(), &snapshot, snapshot.root()));
}

#[test]
fn split_covers_every_iteration_exactly_once() {
    let p = build(
        "split",
        &[("A", &[10])],
        vec![Stmt::for_range("i", 0, 10, vec![Stmt::assign("A", vec![i()], Expr::int(1))])],
    );
    let lp = p.loops()[0];
    let Outcome::Applied(split) = check(&p, Transform::Split { target: lp, factor: 3 }) else {
        panic!("split should apply");
    };
    assert_eq!(split.loops().len(), 2);

    let mut seen = Vec::new();
    for_each_instance(&split, |_, env| {
        assert_eq!(env.len(), 2);
        seen.push(3 * env[0].1 + env[1].1);
    })
    .expect("enumerate");
    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<i64>>());
}

// ============================================================================
// Fusion
// ============================================================================

fn producer_consumer(offset: i64) -> Program {
    build(
        "fuse",
        &[("A", &[17]), ("B", &[16]), ("C", &[16])],
        vec![
            Stmt::for_range("i", 0, 16, vec![Stmt::assign("A", vec![i()], at("B", i()) + 1)]),
            Stmt::for_range("j", 0, 16, vec![Stmt::assign(
                "C",
                vec![Expr::var("j")],
                at("A", Expr::var("j") + offset) * 2,
            )]),
        ],
    )
}

#[test]
fn fusion_of_aligned_producer_and_consumer_is_legal() {
    let p = producer_consumer(0);
    let loops = p.loops();
    let Outcome::Applied(fused) = check(&p, Transform::Fusion { first: loops[0], second: loops[1] }) else {
        panic!("fusion should be legal");
    };
    assert_eq!(fused.loops().len(), 1);
    assert_eq!(fused.statements().len(), 2);
}

#[test]
fn fusion_reading_ahead_of_the_producer_is_illegal() {
    let p = producer_consumer(1);
    let loops = p.loops();
    assert!(matches!(
        check(&p, Transform::Fusion { first: loops[0], second: loops[1] }),
        Outcome::Illegal
    ));
}

#[test]
fn fusion_requires_equal_headers_and_order() {
    let p = build(
        "mismatch",
        &[("A", &[16]), ("B", &[16])],
        vec![
            Stmt::for_range("i", 0, 16, vec![Stmt::assign("A", vec![i()], Expr::int(1))]),
            Stmt::for_range("j", 0, 8, vec![Stmt::assign("B", vec![Expr::var("j")], Expr::int(2))]),
        ],
    );
    let loops = p.loops();
    assert!(matches!(
        check(&p, Transform::Fusion { first: loops[0], second: loops[1] }),
        Outcome::NotApplicable
    ));
    let q = producer_consumer(0);
    let loops = q.loops();
    assert!(matches!(
        check(&q, Transform::Fusion { first: loops[1], second: loops[0] }),
        Outcome::NotApplicable
    ));
}

// ============================================================================
// Fission
// ============================================================================

#[test]
fn fission_of_a_forward_chain_is_legal() {
    let p = build(
        "fission",
        &[("A", &[16]), ("B", &[16]), ("C", &[16])],
        vec![Stmt::for_range(
            "i",
            0,
            16,
            vec![
                Stmt::assign("A", vec![i()], at("B", i())),
                Stmt::assign("C", vec![i()], at("A", i())),
            ],
        )],
    );
    let lp = p.loops()[0];
    let Outcome::Applied(split) = check(&p, Transform::Fission(lp)) else {
        panic!("fission should be legal");
    };
    assert_eq!(split.loops().len(), 2);
}

#[test]
fn fission_breaking_a_loop_carried_cycle_is_illegal() {
    // The second statement feeds the first statement of the next iteration.
    let p = build(
        "cycle",
        &[("A", &[16]), ("B", &[17])],
        vec![Stmt::for_range(
            "i",
            0,
            16,
            vec![
                Stmt::assign("A", vec![i()], at("B", i())),
                Stmt::assign("B", vec![i() + 1], at("A", i())),
            ],
        )],
    );
    let lp = p.loops()[0];
    assert!(matches!(check(&p, Transform::Fission(lp)), Outcome::Illegal));
}

// ============================================================================
// Reorder
// ============================================================================

fn stencil(j_offset: i64) -> Program {
    build(
        "stencil",
        &[("A", &[16, 17])],
        vec![Stmt::for_range(
            "i",
            1,
            16,
            vec![Stmt::for_range(
                "j",
                0,
                15,
                vec![Stmt::assign(
                    "A",
                    vec![i(), Expr::var("j")],
                    Expr::at("A", vec![i() - 1, Expr::var("j") + j_offset]) + 1,
                )],
            )],
        )],
    )
}

#[test]
fn interchange_with_distance_one_zero_is_legal() {
    let p = stencil(0);
    let loops = p.loops();
    let Outcome::Applied(swapped) = check(&p, Transform::Reorder { outer: loops[0], inner: loops[1] }) else {
        panic!("interchange should be legal");
    };
    let outer = swapped.loop_node(swapped.loops()[0]).expect("loop");
    let inner_before = p.loop_node(loops[1]).expect("loop");
    assert_eq!(outer.var, inner_before.var);
}

#[test]
fn interchange_with_distance_one_minus_one_is_illegal() {
    let p = stencil(1);
    let loops = p.loops();
    assert!(matches!(
        check(&p, Transform::Reorder { outer: loops[0], inner: loops[1] }),
        Outcome::Illegal
    ));
}

#[test]
fn checked_application_never_touches_the_input() {
    let p = stencil(1);
    let snapshot = p.clone();
    let loops = p.loops();
    let _ = check(&p, Transform::Reorder { outer: loops[0], inner: loops[1] });
    let _ = check(&p, Transform::Split { target: loops[1], factor: 4 });
    assert!(p.nodes_equal(p.root(), &snapshot, snapshot.root()));
}
