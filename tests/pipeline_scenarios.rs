//! End-to-end evaluation scenarios
//!
//! Each test drives the full pipeline (rewriting, lowering, generation,
//! execution) on a small program and checks the tuples of a designated
//! output relation.

use stratalog::ast::builders::{AtomBuilder, ClauseBuilder, ProgramBuilder};
use stratalog::ast::{
    AggregateOp, Aggregator, Argument, Atom, ConstraintOp, Directive, DirectiveKind, Literal,
};
use stratalog::config::EvaluationConfig;
use stratalog::pipeline::Pipeline;
use std::collections::BTreeSet;

fn as_set(tuples: Vec<Vec<i64>>) -> BTreeSet<Vec<i64>> {
    tuples.into_iter().collect()
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[test]
fn test_transitive_closure() {
    init_tracing();
    // r(x,y) :- e(x,y).  r(x,z) :- r(x,y), e(y,z).
    let program = ProgramBuilder::new()
        .relation("e", 2)
        .relation("r", 2)
        .output("r")
        .fact("e", [1, 2])
        .fact("e", [2, 3])
        .fact("e", [3, 4])
        .clause(
            ClauseBuilder::new("r")
                .head_vars(["x", "y"])
                .body_atom("e", ["x", "y"])
                .build(),
        )
        .clause(
            ClauseBuilder::new("r")
                .head_vars(["x", "z"])
                .body_atom("r", ["x", "y"])
                .body_atom("e", ["y", "z"])
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    let expected: BTreeSet<Vec<i64>> = [
        vec![1, 2],
        vec![2, 3],
        vec![3, 4],
        vec![1, 3],
        vec![2, 4],
        vec![1, 4],
    ]
    .into_iter()
    .collect();
    assert_eq!(as_set(result.tuples("r")), expected);
}

#[test]
fn test_alias_resolution_same_generation() {
    // a(X, Y) :- X = Y, b(X). with b = {1, 2, 3}
    let program = ProgramBuilder::new()
        .relation("b", 1)
        .relation("a", 2)
        .output("a")
        .fact("b", [1])
        .fact("b", [2])
        .fact("b", [3])
        .clause(
            ClauseBuilder::new("a")
                .head_vars(["X", "Y"])
                .constraint(Argument::var("X"), ConstraintOp::Eq, Argument::var("Y"))
                .body_atom("b", ["X"])
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    let expected: BTreeSet<Vec<i64>> =
        [vec![1, 1], vec![2, 2], vec![3, 3]].into_iter().collect();
    assert_eq!(as_set(result.tuples("a")), expected);
}

#[test]
fn test_singleton_aggregate_prunes_everything() {
    // a(X) :- b(X), X = sum y : b(y). with b = {1,2,3}; the sum is 6
    // and 6 is not in b, so a stays empty
    let aggregate = Argument::Aggregator(Box::new(Aggregator {
        op: AggregateOp::Sum,
        target: Some(Argument::var("y")),
        body: vec![Literal::Atom(Atom::new("b", vec![Argument::var("y")]))],
    }));
    let program = ProgramBuilder::new()
        .relation("b", 1)
        .relation("a", 1)
        .output("a")
        .fact("b", [1])
        .fact("b", [2])
        .fact("b", [3])
        .clause(
            ClauseBuilder::new("a")
                .head_vars(["X"])
                .body_atom("b", ["X"])
                .constraint(Argument::var("X"), ConstraintOp::Eq, aggregate)
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    assert!(result.tuples("a").is_empty());
}

#[test]
fn test_singleton_aggregate_selects_member() {
    // same shape, but with 6 present the aggregate matches one tuple
    let aggregate = Argument::Aggregator(Box::new(Aggregator {
        op: AggregateOp::Sum,
        target: Some(Argument::var("y")),
        body: vec![Literal::Atom(Atom::new("b", vec![Argument::var("y")]))],
    }));
    let program = ProgramBuilder::new()
        .relation("b", 1)
        .relation("a", 1)
        .output("a")
        .fact("b", [1])
        .fact("b", [2])
        .fact("b", [3])
        .fact("b", [6])
        .clause(
            ClauseBuilder::new("a")
                .head_vars(["X"])
                .body_atom("b", ["X"])
                .constraint(Argument::var("X"), ConstraintOp::Eq, aggregate)
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    // sum over {1,2,3,6} is 12; nothing matches. With {6} alone the sum
    // would be 6. Pin the semantics: the aggregate folds the whole
    // relation, so a is still empty here.
    assert!(result.tuples("a").is_empty());
}

#[test]
fn test_count_aggregate_value() {
    // a(c) :- c = count : b(_).
    let aggregate = Argument::Aggregator(Box::new(Aggregator {
        op: AggregateOp::Count,
        target: None,
        body: vec![Literal::Atom(AtomBuilder::new("b").unnamed().build())],
    }));
    let program = ProgramBuilder::new()
        .relation("b", 1)
        .relation("a", 1)
        .output("a")
        .fact("b", [10])
        .fact("b", [20])
        .fact("b", [30])
        .clause(
            ClauseBuilder::new("a")
                .head_vars(["c"])
                .constraint(Argument::var("c"), ConstraintOp::Eq, aggregate)
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    assert_eq!(result.tuples("a"), vec![vec![3]]);
}

#[test]
fn test_empty_relation_removal() {
    // f(X) :- e(X). with e empty and not input: f ends up empty
    let program = ProgramBuilder::new()
        .relation("e", 1)
        .relation("f", 1)
        .output("f")
        .clause(ClauseBuilder::new("f").head_vars(["X"]).body_atom("e", ["X"]).build())
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    assert!(result.tuples("f").is_empty());
}

#[test]
fn test_negation_of_empty_relation() {
    // z(A) :- y(A), !x(A). with x empty: z = y
    let program = ProgramBuilder::new()
        .relation("x", 1)
        .relation("y", 1)
        .relation("z", 1)
        .output("z")
        .fact("y", [1])
        .fact("y", [2])
        .clause(
            ClauseBuilder::new("z")
                .head_vars(["A"])
                .body_atom("y", ["A"])
                .body_negation("x", ["A"])
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    let expected: BTreeSet<Vec<i64>> = [vec![1], vec![2]].into_iter().collect();
    assert_eq!(as_set(result.tuples("z")), expected);
}

#[test]
fn test_stratified_negation() {
    // unreachable(x) :- node(x), !reach(x).
    let program = ProgramBuilder::new()
        .relation("node", 1)
        .relation("reach", 1)
        .relation("unreachable", 1)
        .output("unreachable")
        .fact("node", [1])
        .fact("node", [2])
        .fact("node", [3])
        .fact("reach", [1])
        .fact("reach", [3])
        .clause(
            ClauseBuilder::new("unreachable")
                .head_vars(["x"])
                .body_atom("node", ["x"])
                .body_negation("reach", ["x"])
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    assert_eq!(result.tuples("unreachable"), vec![vec![2]]);
}

#[test]
fn test_parallel_evaluation_matches_sequential() {
    let build = || {
        let mut builder = ProgramBuilder::new()
            .relation("e", 2)
            .relation("r", 2)
            .output("r");
        for i in 0..30 {
            builder = builder.fact("e", [i, i + 1]);
        }
        builder
            .clause(
                ClauseBuilder::new("r")
                    .head_vars(["x", "y"])
                    .body_atom("e", ["x", "y"])
                    .build(),
            )
            .clause(
                ClauseBuilder::new("r")
                    .head_vars(["x", "z"])
                    .body_atom("r", ["x", "y"])
                    .body_atom("e", ["y", "z"])
                    .build(),
            )
            .build()
    };

    let sequential = Pipeline::new(EvaluationConfig::default())
        .run(build())
        .expect("sequential run");

    let mut parallel_config = EvaluationConfig::default();
    parallel_config.jobs = 4;
    let parallel = Pipeline::new(parallel_config)
        .run(build())
        .expect("parallel run");

    assert_eq!(as_set(sequential.tuples("r")), as_set(parallel.tuples("r")));
    // 31 nodes in a chain: n*(n+1)/2 pairs over 30 edges
    assert_eq!(sequential.size("r"), 30 * 31 / 2);
}

#[test]
fn test_limitsize_caps_evaluation() {
    // counting up via recursion, cut off by the limitsize directive
    let mut program = ProgramBuilder::new()
        .relation("n", 1)
        .output("n")
        .fact("n", [0])
        .clause(
            ClauseBuilder::new("n")
                .head_arg(Argument::IntrinsicFunctor {
                    op: stratalog::ast::IntrinsicOp::Add,
                    args: vec![Argument::var("x"), Argument::int(1)],
                })
                .body_atom("n", ["x"])
                .literal(Literal::BinaryConstraint {
                    op: ConstraintOp::Lt,
                    lhs: Argument::var("x"),
                    rhs: Argument::int(1000),
                })
                .build(),
        )
        .build();
    let mut limit = Directive::new(DirectiveKind::LimitSize, "n");
    limit.limit = Some(10);
    program.directives.push(limit);

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    assert_eq!(result.size("n"), 10);
}

#[test]
fn test_provenance_mode_widens_tuples() {
    let mut config = EvaluationConfig::default();
    config.provenance = true;

    let program = ProgramBuilder::new()
        .relation("e", 2)
        .relation("r", 2)
        .output("r")
        .fact("e", [1, 2])
        .fact("e", [2, 3])
        .clause(
            ClauseBuilder::new("r")
                .head_vars(["x", "y"])
                .body_atom("e", ["x", "y"])
                .build(),
        )
        .clause(
            ClauseBuilder::new("r")
                .head_vars(["x", "z"])
                .body_atom("r", ["x", "y"])
                .body_atom("e", ["y", "z"])
                .build(),
        )
        .build();

    let result = Pipeline::new(config).run(program).expect("pipeline runs");
    let tuples = result.tuples("r");
    // data plus rule number and level number
    assert!(tuples.iter().all(|t| t.len() == 4));
    let data: BTreeSet<Vec<i64>> = tuples.iter().map(|t| t[..2].to_vec()).collect();
    let expected: BTreeSet<Vec<i64>> =
        [vec![1, 2], vec![2, 3], vec![1, 3]].into_iter().collect();
    assert_eq!(data, expected);
}

#[test]
fn test_mutual_recursion() {
    // even/odd over a successor chain
    let program = ProgramBuilder::new()
        .relation("succ", 2)
        .relation("even", 1)
        .relation("odd", 1)
        .output("even")
        .output("odd")
        .fact("succ", [0, 1])
        .fact("succ", [1, 2])
        .fact("succ", [2, 3])
        .fact("succ", [3, 4])
        .fact("even", [0])
        .clause(
            ClauseBuilder::new("odd")
                .head_vars(["y"])
                .body_atom("even", ["x"])
                .body_atom("succ", ["x", "y"])
                .build(),
        )
        .clause(
            ClauseBuilder::new("even")
                .head_vars(["y"])
                .body_atom("odd", ["x"])
                .body_atom("succ", ["x", "y"])
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    assert_eq!(as_set(result.tuples("even")), [vec![0], vec![2], vec![4]].into_iter().collect());
    assert_eq!(as_set(result.tuples("odd")), [vec![1], vec![3]].into_iter().collect());
}

#[test]
fn test_arithmetic_in_head() {
    // double(y) :- n(x), y = x * 2 resolved through complex-term handling
    let program = ProgramBuilder::new()
        .relation("n", 1)
        .relation("double", 1)
        .output("double")
        .fact("n", [1])
        .fact("n", [2])
        .fact("n", [5])
        .clause(
            ClauseBuilder::new("double")
                .head_vars(["y"])
                .body_atom("n", ["x"])
                .constraint(
                    Argument::var("y"),
                    ConstraintOp::Eq,
                    Argument::IntrinsicFunctor {
                        op: stratalog::ast::IntrinsicOp::Mul,
                        args: vec![Argument::var("x"), Argument::int(2)],
                    },
                )
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    assert_eq!(
        as_set(result.tuples("double")),
        [vec![2], vec![4], vec![10]].into_iter().collect()
    );
}

#[test]
fn test_user_defined_functor() {
    use std::sync::Arc;
    // tripled(y) :- n(x), y = @triple(x).
    let program = ProgramBuilder::new()
        .relation("n", 1)
        .relation("tripled", 1)
        .output("tripled")
        .fact("n", [1])
        .fact("n", [4])
        .clause(
            ClauseBuilder::new("tripled")
                .head_vars(["y"])
                .body_atom("n", ["x"])
                .constraint(
                    Argument::var("y"),
                    ConstraintOp::Eq,
                    Argument::UserDefinedFunctor {
                        name: "triple".to_string(),
                        args: vec![Argument::var("x")],
                    },
                )
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .with_functor("triple", Arc::new(|args| args.first().map(|v| v * 3)))
        .run(program)
        .expect("pipeline runs");
    assert_eq!(as_set(result.tuples("tripled")), [vec![3], vec![12]].into_iter().collect());
}

#[test]
fn test_unknown_functor_suppresses_insert() {
    // same clause but nothing registered under the name: the error
    // value propagates and the insertion is skipped
    let program = ProgramBuilder::new()
        .relation("n", 1)
        .relation("tripled", 1)
        .output("tripled")
        .fact("n", [1])
        .clause(
            ClauseBuilder::new("tripled")
                .head_vars(["y"])
                .body_atom("n", ["x"])
                .constraint(
                    Argument::var("y"),
                    ConstraintOp::Eq,
                    Argument::UserDefinedFunctor {
                        name: "missing".to_string(),
                        args: vec![Argument::var("x")],
                    },
                )
                .build(),
        )
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    assert!(result.tuples("tripled").is_empty());
}

#[test]
fn test_diagnostics_surface_through_result() {
    // a copy cycle produces a warning but evaluation still succeeds
    let program = ProgramBuilder::new()
        .relation("a", 1)
        .relation("b", 1)
        .relation("keep", 1)
        .output("keep")
        .fact("keep", [1])
        .clause(ClauseBuilder::new("a").head_vars(["x"]).body_atom("b", ["x"]).build())
        .clause(ClauseBuilder::new("b").head_vars(["x"]).body_atom("a", ["x"]).build())
        .build();

    let result = Pipeline::new(EvaluationConfig::default())
        .run(program)
        .expect("pipeline runs");
    assert!(result.error_report().warning_count() >= 1);
    assert_eq!(result.tuples("keep"), vec![vec![1]]);
}

#[test]
fn test_debug_report_collects_sections() {
    let mut config = EvaluationConfig::default();
    config.debug_report = true;
    let program = ProgramBuilder::new()
        .relation("e", 2)
        .relation("r", 2)
        .output("r")
        .fact("e", [1, 2])
        .clause(
            ClauseBuilder::new("r")
                .head_vars(["x", "y"])
                .body_atom("e", ["x", "y"])
                .build(),
        )
        .build();

    let result = Pipeline::new(config).run(program).expect("pipeline runs");
    let titles: Vec<&str> = result
        .debug_report()
        .sections()
        .iter()
        .map(|(title, _)| title.as_str())
        .collect();
    assert!(titles.contains(&"precedence-graph"));
    assert!(titles.contains(&"scc-graph"));
}
