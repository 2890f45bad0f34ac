//! # SCC Decomposition and Topological Scheduling
//!
//! Strongly-connected components of the precedence graph via Gabow's
//! two-stack, linear-time algorithm, the condensed SCC DAG, and a
//! topological ordering of the SCCs with a memory-pressure cost metric
//! used to judge alternative orderings.

use crate::analysis::{Analysis, PrecedenceGraph, TranslationUnit};
use crate::ast::QualifiedName;
use std::collections::{BTreeMap, BTreeSet};

const UNVISITED: usize = usize::MAX;

/// The DAG of strongly connected components over the precedence graph
pub struct SccGraph {
    relation_to_scc: BTreeMap<QualifiedName, usize>,
    scc_to_relations: Vec<BTreeSet<QualifiedName>>,
    predecessors: Vec<BTreeSet<usize>>,
    successors: Vec<BTreeSet<usize>>,
    recursive: Vec<bool>,
}

impl Analysis for SccGraph {
    const NAME: &'static str = "scc-graph";

    fn run(tu: &TranslationUnit) -> Self {
        let precedence = tu.get_analysis::<PrecedenceGraph>();
        let graph = precedence.graph();
        let relations: Vec<QualifiedName> = graph.vertices().iter().cloned().collect();

        let mut state = GabowState {
            graph,
            pre_order: relations.iter().map(|r| (r.clone(), UNVISITED)).collect(),
            relation_to_scc: relations.iter().map(|r| (r.clone(), UNVISITED)).collect(),
            counter: 0,
            num_sccs: 0,
            s: Vec::new(),
            p: Vec::new(),
        };
        for relation in &relations {
            if state.pre_order[relation] == UNVISITED {
                state.visit(relation);
            }
        }
        let num_sccs = state.num_sccs;
        let relation_to_scc = state.relation_to_scc;

        // build the condensed DAG from precedence edges between distinct SCCs
        let mut predecessors = vec![BTreeSet::new(); num_sccs];
        let mut successors = vec![BTreeSet::new(); num_sccs];
        for u in &relations {
            let scc_u = relation_to_scc[u];
            for v in graph.predecessors(u) {
                let scc_v = relation_to_scc[v];
                if scc_u != scc_v {
                    predecessors[scc_u].insert(scc_v);
                    successors[scc_v].insert(scc_u);
                }
            }
        }

        let mut scc_to_relations = vec![BTreeSet::new(); num_sccs];
        for relation in &relations {
            scc_to_relations[relation_to_scc[relation]].insert(relation.clone());
        }

        // an SCC is recursive unless it is a single relation without a self-loop
        let recursive = scc_to_relations
            .iter()
            .map(|members| {
                members.len() > 1
                    || members
                        .iter()
                        .any(|r| graph.contains_edge(r, r))
            })
            .collect();

        SccGraph {
            relation_to_scc,
            scc_to_relations,
            predecessors,
            successors,
            recursive,
        }
    }

    fn print(&self) -> String {
        let mut out = String::from("digraph {\n");
        for (scc, members) in self.scc_to_relations.iter().enumerate() {
            let label = members.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(",");
            out.push_str(&format!("\tscc_{scc} [label = \"{label}\"];\n"));
        }
        for (scc, succs) in self.successors.iter().enumerate() {
            for succ in succs {
                out.push_str(&format!("\tscc_{scc} -> scc_{succ};\n"));
            }
        }
        out.push_str("}\n");
        out
    }
}

impl SccGraph {
    /// Number of strongly connected components
    pub fn num_sccs(&self) -> usize {
        self.scc_to_relations.len()
    }

    /// SCC index of the given relation
    pub fn scc_of(&self, relation: &QualifiedName) -> Option<usize> {
        self.relation_to_scc.get(relation).copied()
    }

    /// Member relations of an SCC
    pub fn relations(&self, scc: usize) -> &BTreeSet<QualifiedName> {
        &self.scc_to_relations[scc]
    }

    /// SCCs with an edge into the given SCC
    pub fn predecessors(&self, scc: usize) -> &BTreeSet<usize> {
        &self.predecessors[scc]
    }

    /// SCCs the given SCC has an edge to
    pub fn successors(&self, scc: usize) -> &BTreeSet<usize> {
        &self.successors[scc]
    }

    /// Whether the SCC needs fixpoint evaluation
    pub fn is_recursive(&self, scc: usize) -> bool {
        self.recursive[scc]
    }
}

/// Gabow's algorithm (cf. Algorithms in Java by Robert Sedgewick,
/// Part 5), walking predecessor edges so components come out in an
/// order aligned with evaluation.
struct GabowState<'a> {
    graph: &'a crate::graph::Graph<QualifiedName>,
    pre_order: BTreeMap<QualifiedName, usize>,
    relation_to_scc: BTreeMap<QualifiedName, usize>,
    counter: usize,
    num_sccs: usize,
    s: Vec<QualifiedName>,
    p: Vec<QualifiedName>,
}

impl GabowState<'_> {
    fn visit(&mut self, w: &QualifiedName) {
        self.pre_order.insert(w.clone(), self.counter);
        self.counter += 1;
        self.s.push(w.clone());
        self.p.push(w.clone());
        for t in self.graph.predecessors(w).clone() {
            if self.pre_order[&t] == UNVISITED {
                self.visit(&t);
            } else if self.relation_to_scc[&t] == UNVISITED {
                loop {
                    let should_pop = self
                        .p
                        .last()
                        .map(|top| self.pre_order[top] > self.pre_order[&t])
                        .unwrap_or(false);
                    if !should_pop {
                        break;
                    }
                    self.p.pop();
                }
            }
        }
        if self.p.last() == Some(w) {
            self.p.pop();
        } else {
            return;
        }
        while let Some(v) = self.s.pop() {
            let done = &v == w;
            self.relation_to_scc.insert(v, self.num_sccs);
            if done {
                break;
            }
        }
        self.num_sccs += 1;
    }
}

// ============================================================================
// Topological ordering
// ============================================================================

/// A linear order of the SCC indices consistent with the SCC DAG,
/// computed with a forwards, Kahn-like algorithm that greedily follows
/// successors whose predecessors are all scheduled.
pub struct TopologicallySortedSccGraph {
    order: Vec<usize>,
    predecessors: Vec<BTreeSet<usize>>,
    successors: Vec<BTreeSet<usize>>,
}

impl Analysis for TopologicallySortedSccGraph {
    const NAME: &'static str = "topological-scc-graph";

    fn run(tu: &TranslationUnit) -> Self {
        let scc_graph = tu.get_analysis::<SccGraph>();
        let num_sccs = scc_graph.num_sccs();
        let mut result = TopologicallySortedSccGraph {
            order: Vec::with_capacity(num_sccs),
            predecessors: (0..num_sccs)
                .map(|scc| scc_graph.predecessors(scc).clone())
                .collect(),
            successors: (0..num_sccs)
                .map(|scc| scc_graph.successors(scc).clone())
                .collect(),
        };
        let mut visited = vec![false; num_sccs];
        for scc in 0..num_sccs {
            if result.predecessors[scc].is_empty() {
                result.order.push(scc);
                visited[scc] = true;
                if !result.successors[scc].is_empty() {
                    result.compute_ordering(scc, &mut visited);
                }
            }
        }
        result
    }

    fn print(&self) -> String {
        let mut out = String::from("--- total order of strata ---\n");
        for (i, scc) in self.order.iter().enumerate() {
            out.push_str(&format!("{i}: scc {scc}\n"));
        }
        out.push_str(&format!("cost: {}\n", self.ordering_cost(&self.order)));
        out
    }
}

impl TopologicallySortedSccGraph {
    /// The computed topological order of SCC indices
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    fn compute_ordering(&mut self, scc: usize, visited: &mut Vec<bool>) {
        let mut found = false;
        let successors_to_visit: Vec<usize> = self.successors[scc].iter().copied().collect();
        for succ in successors_to_visit {
            if visited[succ] {
                continue;
            }
            let has_unvisited_predecessor =
                self.predecessors[succ].iter().any(|&pred| !visited[pred]);
            if !has_unvisited_predecessor {
                visited[succ] = true;
                self.order.push(succ);
                self.compute_ordering(succ, visited);
                found = true;
            }
        }
        if !found {
            return;
        }
        let has_unvisited_predecessor = self.predecessors[scc].iter().any(|&pred| !visited[pred]);
        let has_unvisited_successor = self.successors[scc].iter().any(|&succ| !visited[succ]);
        if has_unvisited_successor && !has_unvisited_predecessor {
            self.compute_ordering(scc, visited);
        }
    }

    /// Cost of an SCC permutation: for each position `i`, the number of
    /// earlier SCCs that still have a successor scheduled at `i` or
    /// later (relations that must stay live in memory past step `i`);
    /// the permutation cost is the maximum over all positions. Returns
    /// -1 when the permutation is not a valid topological order.
    pub fn ordering_cost(&self, permutation: &[usize]) -> i64 {
        let position: BTreeMap<usize, usize> = permutation
            .iter()
            .enumerate()
            .map(|(pos, &scc)| (scc, pos))
            .collect();
        if position.len() != permutation.len() {
            return -1;
        }
        let mut cost_of_permutation: i64 = -1;
        for (i, &scc) in permutation.iter().enumerate() {
            // all predecessors must be scheduled earlier
            for &pred in &self.predecessors[scc] {
                match position.get(&pred) {
                    Some(&pos) if pos < i => {}
                    _ => return -1,
                }
            }
            // count earlier sccs with a successor scheduled at >= i
            let mut cost_of_scc: i64 = 0;
            for &earlier in &permutation[..i] {
                let keeps_alive = self.successors[earlier]
                    .iter()
                    .any(|succ| position.get(succ).map(|&pos| pos >= i).unwrap_or(false));
                if keeps_alive {
                    cost_of_scc += 1;
                }
            }
            if cost_of_scc > cost_of_permutation {
                cost_of_permutation = cost_of_scc;
            }
        }
        cost_of_permutation.max(0)
    }
}
