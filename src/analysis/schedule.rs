//! Relation scheduling.
//!
//! Expands the topological SCC order into evaluation steps: which
//! relations each step computes, which earlier relations stop being
//! needed once the step runs (and can be purged), and whether the step
//! needs fixpoint evaluation.

use crate::analysis::{
    Analysis, PrecedenceGraph, SccGraph, TopologicallySortedSccGraph, TranslationUnit,
};
use crate::ast::QualifiedName;
use std::collections::BTreeSet;

/// One evaluation step of the schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleStep {
    /// Relations computed by this step
    pub computed: BTreeSet<QualifiedName>,
    /// Relations alive before this step that are dead afterwards
    pub expired: BTreeSet<QualifiedName>,
    /// Whether the step runs a fixpoint loop
    pub recursive: bool,
}

/// The full evaluation schedule, one step per SCC in topological order
pub struct RelationSchedule {
    steps: Vec<ScheduleStep>,
}

impl Analysis for RelationSchedule {
    const NAME: &'static str = "relation-schedule";

    fn run(tu: &TranslationUnit) -> Self {
        let topo = tu.get_analysis::<TopologicallySortedSccGraph>();
        let scc_graph = tu.get_analysis::<SccGraph>();
        let expiry = compute_expiry_schedule(tu, &topo, &scc_graph);

        let steps = topo
            .order()
            .iter()
            .enumerate()
            .map(|(i, &scc)| ScheduleStep {
                computed: scc_graph.relations(scc).clone(),
                expired: expiry[i].clone(),
                recursive: scc_graph.is_recursive(scc),
            })
            .collect();
        RelationSchedule { steps }
    }

    fn print(&self) -> String {
        let mut out = String::from("begin schedule\n");
        for step in &self.steps {
            let computed = step.computed.iter().map(|r| r.to_string()).collect::<Vec<_>>();
            let expired = step.expired.iter().map(|r| r.to_string()).collect::<Vec<_>>();
            out.push_str(&format!("computed: {}\n", computed.join(", ")));
            out.push_str(&format!("expired: {}\n", expired.join(", ")));
            out.push_str(if step.recursive { "recursive\n" } else { "not recursive\n" });
        }
        out.push_str("end schedule\n");
        out
    }
}

impl RelationSchedule {
    /// The evaluation steps, in execution order
    pub fn steps(&self) -> &[ScheduleStep] {
        &self.steps
    }
}

/// For each step, the set of relations that expire there. Walks the
/// order backwards accumulating the alive set: a relation is alive at a
/// step when some later step still depends on it.
fn compute_expiry_schedule(
    tu: &TranslationUnit,
    topo: &TopologicallySortedSccGraph,
    scc_graph: &SccGraph,
) -> Vec<BTreeSet<QualifiedName>> {
    let precedence = tu.get_analysis::<PrecedenceGraph>();
    let num_sccs = topo.order().len();
    let mut expiry = vec![BTreeSet::new(); num_sccs];
    if num_sccs == 0 {
        return expiry;
    }

    let mut alive: Vec<BTreeSet<QualifiedName>> = vec![BTreeSet::new(); num_sccs];
    for step_back in 1..num_sccs {
        let prev: BTreeSet<QualifiedName> = alive[step_back - 1].clone();
        alive[step_back].extend(prev);

        // dependencies of the relations computed at this (reverse) step
        let scc = topo.order()[num_sccs - step_back];
        for relation in scc_graph.relations(scc) {
            for pred in precedence.graph().predecessors(relation) {
                alive[step_back].insert(pred.clone());
            }
        }

        expiry[num_sccs - step_back] = alive[step_back]
            .difference(&alive[step_back - 1])
            .cloned()
            .collect();
    }
    expiry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{ClauseBuilder, ProgramBuilder};
    use crate::config::EvaluationConfig;

    #[test]
    fn test_schedule_chain() {
        // a -> b -> c; a expires once b is computed, b once c is
        let program = ProgramBuilder::new()
            .relation("a", 1)
            .relation("b", 1)
            .relation("c", 1)
            .output("c")
            .clause(ClauseBuilder::new("b").head_vars(["x"]).body_atom("a", ["x"]).build())
            .clause(ClauseBuilder::new("c").head_vars(["x"]).body_atom("b", ["x"]).build())
            .build();
        let tu = TranslationUnit::new(program, EvaluationConfig::default());
        let schedule = tu.get_analysis::<RelationSchedule>();
        let steps = schedule.steps();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| !s.recursive));

        let a = QualifiedName::new("a");
        let b = QualifiedName::new("b");
        let b_step = steps
            .iter()
            .position(|s| s.computed.contains(&b))
            .expect("b is scheduled");
        assert!(steps[b_step].expired.contains(&a));
    }

    #[test]
    fn test_recursive_step_flag() {
        let program = ProgramBuilder::new()
            .relation("e", 2)
            .relation("tc", 2)
            .output("tc")
            .clause(
                ClauseBuilder::new("tc")
                    .head_vars(["x", "y"])
                    .body_atom("e", ["x", "y"])
                    .build(),
            )
            .clause(
                ClauseBuilder::new("tc")
                    .head_vars(["x", "z"])
                    .body_atom("tc", ["x", "y"])
                    .body_atom("e", ["y", "z"])
                    .build(),
            )
            .build();
        let tu = TranslationUnit::new(program, EvaluationConfig::default());
        let schedule = tu.get_analysis::<RelationSchedule>();
        let tc = QualifiedName::new("tc");
        let tc_step = schedule
            .steps()
            .iter()
            .find(|s| s.computed.contains(&tc))
            .expect("tc is scheduled");
        assert!(tc_step.recursive);
    }

    #[test]
    fn test_computed_covers_all_relations() {
        let program = ProgramBuilder::new()
            .relation("a", 1)
            .relation("b", 1)
            .output("b")
            .clause(ClauseBuilder::new("b").head_vars(["x"]).body_atom("a", ["x"]).build())
            .build();
        let tu = TranslationUnit::new(program, EvaluationConfig::default());
        let schedule = tu.get_analysis::<RelationSchedule>();
        let all: BTreeSet<QualifiedName> = schedule
            .steps()
            .iter()
            .flat_map(|s| s.computed.iter().cloned())
            .collect();
        assert!(all.contains(&QualifiedName::new("a")));
        assert!(all.contains(&QualifiedName::new("b")));
    }
}
