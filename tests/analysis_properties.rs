//! Properties of the dependency analyses
//!
//! SCC correctness against a reference reachability computation,
//! topological-order validity and cost behaviour, schedule coverage and
//! redundancy, over both hand-built and randomly generated programs.

use proptest::prelude::*;
use stratalog::analysis::{
    PrecedenceGraph, RedundantRelations, RelationSchedule, SccGraph, TopologicallySortedSccGraph,
    TranslationUnit,
};
use stratalog::ast::builders::{ClauseBuilder, ProgramBuilder};
use stratalog::ast::QualifiedName;
use stratalog::config::EvaluationConfig;
use std::collections::BTreeSet;

/// Build a unit whose precedence edges are exactly `edges` over
/// relations r0..r{n-1}, with r0 as the output.
fn unit_from_edges(n: usize, edges: &[(usize, usize)]) -> TranslationUnit {
    let mut builder = ProgramBuilder::new();
    for i in 0..n {
        builder = builder.relation(&format!("r{i}"), 1);
    }
    builder = builder.output("r0");
    for &(from, to) in edges {
        builder = builder.clause(
            ClauseBuilder::new(&format!("r{to}"))
                .head_vars(["x"])
                .body_atom(&format!("r{from}"), ["x"])
                .build(),
        );
    }
    TranslationUnit::new(builder.build(), EvaluationConfig::default())
}

fn name(i: usize) -> QualifiedName {
    QualifiedName::new(&format!("r{i}"))
}

/// Reference reachability: does `from` reach `to` over the edges
/// (non-trivially, i.e. along at least one edge)?
fn reference_reaches(n: usize, edges: &[(usize, usize)], from: usize, to: usize) -> bool {
    let mut seen = vec![false; n];
    let mut work = vec![from];
    while let Some(cur) = work.pop() {
        for &(a, b) in edges {
            if a == cur && !seen[b] {
                if b == to {
                    return true;
                }
                seen[b] = true;
                work.push(b);
            }
        }
    }
    false
}

#[test]
fn test_scc_equivalence_matches_mutual_reachability() {
    let edges = [(0, 1), (1, 2), (2, 1), (2, 0), (3, 0)];
    let tu = unit_from_edges(4, &edges);
    let sccs = tu.get_analysis::<SccGraph>();
    for u in 0..4 {
        for v in 0..4 {
            let same = sccs.scc_of(&name(u)) == sccs.scc_of(&name(v));
            let mutual = u == v
                || (reference_reaches(4, &edges, u, v) && reference_reaches(4, &edges, v, u));
            assert_eq!(same, mutual, "scc({u}) vs scc({v})");
        }
    }
}

#[test]
fn test_topological_order_respects_edges() {
    let edges = [(0, 1), (1, 2), (0, 3), (3, 2)];
    let tu = unit_from_edges(4, &edges);
    let topo = tu.get_analysis::<TopologicallySortedSccGraph>();
    let sccs = tu.get_analysis::<SccGraph>();

    let position = |scc: usize| {
        topo.order()
            .iter()
            .position(|&s| s == scc)
            .expect("scc in order")
    };
    for &(from, to) in &edges {
        let scc_from = sccs.scc_of(&name(from)).expect("scc");
        let scc_to = sccs.scc_of(&name(to)).expect("scc");
        if scc_from != scc_to {
            assert!(position(scc_from) < position(scc_to));
        }
    }
    assert!(topo.ordering_cost(topo.order()) >= 0);
}

#[test]
fn test_redundancy_iff_no_path_to_output() {
    let edges = [(1, 0), (2, 1), (3, 4), (4, 3)];
    let tu = unit_from_edges(5, &edges);
    let redundant = tu.get_analysis::<RedundantRelations>();
    // r1, r2 feed the output r0; r3 and r4 only feed each other
    assert!(!redundant.redundant().contains(&name(0)));
    assert!(!redundant.redundant().contains(&name(1)));
    assert!(!redundant.redundant().contains(&name(2)));
    assert!(redundant.redundant().contains(&name(3)));
    assert!(redundant.redundant().contains(&name(4)));
}

#[test]
fn test_schedule_expired_never_resurrects() {
    let edges = [(1, 0), (2, 1), (3, 2)];
    let tu = unit_from_edges(4, &edges);
    let schedule = tu.get_analysis::<RelationSchedule>();
    let mut expired_so_far: BTreeSet<QualifiedName> = BTreeSet::new();
    for step in schedule.steps() {
        for computed in &step.computed {
            assert!(!expired_so_far.contains(computed), "{computed} used after expiry");
        }
        expired_so_far.extend(step.expired.iter().cloned());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_scc_matches_reference(
        n in 2usize..8,
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..20)
    ) {
        let edges: Vec<(usize, usize)> =
            edges.into_iter().map(|(a, b)| (a % n, b % n)).collect();
        let tu = unit_from_edges(n, &edges);
        let sccs = tu.get_analysis::<SccGraph>();
        for u in 0..n {
            for v in 0..n {
                let same = sccs.scc_of(&name(u)) == sccs.scc_of(&name(v));
                let mutual = u == v
                    || (reference_reaches(n, &edges, u, v)
                        && reference_reaches(n, &edges, v, u));
                prop_assert_eq!(same, mutual);
            }
        }
    }

    #[test]
    fn prop_topological_order_is_valid(
        n in 2usize..8,
        edges in prop::collection::vec((0usize..8, 0usize..8), 0..20)
    ) {
        let edges: Vec<(usize, usize)> =
            edges.into_iter().map(|(a, b)| (a % n, b % n)).collect();
        let tu = unit_from_edges(n, &edges);
        let topo = tu.get_analysis::<TopologicallySortedSccGraph>();
        let sccs = tu.get_analysis::<SccGraph>();
        prop_assert_eq!(topo.order().len(), sccs.num_sccs());
        prop_assert!(topo.ordering_cost(topo.order()) >= 0);
    }

    #[test]
    fn prop_precedence_graph_vertices_cover_relations(
        n in 1usize..6,
        edges in prop::collection::vec((0usize..6, 0usize..6), 0..12)
    ) {
        let edges: Vec<(usize, usize)> =
            edges.into_iter().map(|(a, b)| (a % n, b % n)).collect();
        let tu = unit_from_edges(n, &edges);
        let precedence = tu.get_analysis::<PrecedenceGraph>();
        for i in 0..n {
            prop_assert!(precedence.graph().contains(&name(i)));
        }
    }
}
