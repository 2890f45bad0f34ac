//! # Relation Dependency Analyses
//!
//! The relation-detail cache, the precedence graph over relations, the
//! recursive-clause detector and the redundant-relation analysis. These
//! feed the SCC decomposition and the scheduling analyses in
//! [`crate::analysis::scc`] and [`crate::analysis::schedule`].

use crate::analysis::{Analysis, IoType, TranslationUnit};
use crate::ast::{Clause, QualifiedName, Relation};
use crate::graph::Graph;
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

// ============================================================================
// RelationDetailCache
// ============================================================================

/// Bidirectional index from qualified name to relation declaration and
/// to the list of clauses defining it.
pub struct RelationDetailCache {
    relations: BTreeMap<QualifiedName, Relation>,
    clauses: BTreeMap<QualifiedName, Vec<Clause>>,
}

impl Analysis for RelationDetailCache {
    const NAME: &'static str = "relation-detail";

    fn run(tu: &TranslationUnit) -> Self {
        let program = tu.program();
        let mut relations = BTreeMap::new();
        let mut clauses: BTreeMap<QualifiedName, Vec<Clause>> = BTreeMap::new();
        for rel in &program.relations {
            relations.insert(rel.name.clone(), rel.clone());
            clauses.entry(rel.name.clone()).or_default();
        }
        for clause in &program.clauses {
            clauses.entry(clause.head.name.clone()).or_default().push(clause.clone());
        }
        RelationDetailCache { relations, clauses }
    }

    fn print(&self) -> String {
        let mut out = String::new();
        for (name, clauses) in &self.clauses {
            out.push_str(&format!("--{name}--\n"));
            for clause in clauses {
                out.push_str(&format!("{clause}\n"));
            }
            out.push('\n');
        }
        out
    }
}

impl RelationDetailCache {
    /// Look up a relation declaration; `None` when the name does not
    /// resolve (callers document whether they tolerate this).
    pub fn relation(&self, name: &QualifiedName) -> Option<&Relation> {
        self.relations.get(name)
    }

    /// All clauses defining the given relation
    pub fn clauses(&self, name: &QualifiedName) -> &[Clause] {
        self.clauses.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All declared relation names, in order
    pub fn relation_names(&self) -> impl Iterator<Item = &QualifiedName> {
        self.relations.keys()
    }
}

// ============================================================================
// PrecedenceGraph
// ============================================================================

/// Directed graph whose vertices are relations; an edge `u -> v` exists
/// iff some clause defining `v` references `u` in its body or in an atom
/// embedded in a head argument.
pub struct PrecedenceGraph {
    graph: Graph<QualifiedName>,
}

impl Analysis for PrecedenceGraph {
    const NAME: &'static str = "precedence-graph";

    fn run(tu: &TranslationUnit) -> Self {
        let detail = tu.get_analysis::<RelationDetailCache>();
        let mut graph = Graph::new();
        for rel in &tu.program().relations {
            graph.insert_vertex(rel.name.clone());
            for clause in detail.clauses(&rel.name) {
                for lit in &clause.body {
                    lit.visit_atoms(&mut |atom| {
                        graph.insert_edge(atom.name.clone(), rel.name.clone());
                    });
                }
                for arg in &clause.head.args {
                    arg.visit_atoms(&mut |atom| {
                        graph.insert_edge(atom.name.clone(), rel.name.clone());
                    });
                }
            }
        }
        PrecedenceGraph { graph }
    }

    fn print(&self) -> String {
        let mut out = String::from("digraph {\n");
        for rel in self.graph.vertices() {
            out.push_str(&format!("\t\"{rel}\" [label = \"{rel}\"];\n"));
        }
        for rel in self.graph.vertices() {
            for adj in self.graph.successors(rel) {
                out.push_str(&format!("\t\"{rel}\" -> \"{adj}\";\n"));
            }
        }
        out.push_str("}\n");
        out
    }
}

impl PrecedenceGraph {
    /// The backing dependency graph
    pub fn graph(&self) -> &Graph<QualifiedName> {
        &self.graph
    }
}

// ============================================================================
// RecursiveClauses
// ============================================================================

/// Detects clauses that participate in recursion: a clause defining `r`
/// is recursive iff `r` is reachable from the set of its body-atom
/// relations by following clause dependencies.
pub struct RecursiveClauses {
    recursive: Vec<Clause>,
}

impl Analysis for RecursiveClauses {
    const NAME: &'static str = "recursive-clauses";

    fn run(tu: &TranslationUnit) -> Self {
        let detail = tu.get_analysis::<RelationDetailCache>();
        let recursive = tu
            .program()
            .clauses
            .iter()
            .filter(|clause| Self::compute_is_recursive(clause, &detail))
            .cloned()
            .collect();
        RecursiveClauses { recursive }
    }

    fn print(&self) -> String {
        self.recursive
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl RecursiveClauses {
    /// Check whether the given clause was classified recursive
    pub fn is_recursive(&self, clause: &Clause) -> bool {
        self.recursive.iter().any(|c| c == clause)
    }

    fn compute_is_recursive(clause: &Clause, detail: &RelationDetailCache) -> bool {
        let target = &clause.head.name;

        let mut reached: HashSet<QualifiedName> = HashSet::new();
        let mut worklist: VecDeque<QualifiedName> = VecDeque::new();

        for atom in clause.body_atoms() {
            if &atom.name == target {
                return true;
            }
            worklist.push_back(atom.name.clone());
        }

        while let Some(cur) = worklist.pop_front() {
            if !reached.insert(cur.clone()) {
                continue;
            }
            for cl in detail.clauses(&cur) {
                for atom in cl.body_atoms() {
                    if &atom.name == target {
                        return true;
                    }
                    worklist.push_back(atom.name.clone());
                }
            }
        }

        false
    }
}

// ============================================================================
// RedundantRelations
// ============================================================================

/// Relations from which no output relation is reachable in the
/// precedence graph. These contribute nothing to any result and may be
/// pruned.
pub struct RedundantRelations {
    redundant: BTreeSet<QualifiedName>,
}

impl Analysis for RedundantRelations {
    const NAME: &'static str = "redundant-relations";

    fn run(tu: &TranslationUnit) -> Self {
        let precedence = tu.get_analysis::<PrecedenceGraph>();
        let io_type = tu.get_analysis::<IoType>();

        // reverse BFS from the output relations
        let mut work: VecDeque<QualifiedName> = VecDeque::new();
        let mut not_redundant: BTreeSet<QualifiedName> = BTreeSet::new();
        for rel in &tu.program().relations {
            if io_type.is_output(&rel.name) {
                work.push_back(rel.name.clone());
            }
        }
        while let Some(cur) = work.pop_front() {
            if !not_redundant.insert(cur.clone()) {
                continue;
            }
            for pred in precedence.graph().predecessors(&cur) {
                if !not_redundant.contains(pred) {
                    work.push_back(pred.clone());
                }
            }
        }

        let redundant = tu
            .program()
            .relations
            .iter()
            .filter(|rel| !not_redundant.contains(&rel.name))
            .map(|rel| rel.name.clone())
            .collect();
        RedundantRelations { redundant }
    }

    fn print(&self) -> String {
        self.redundant
            .iter()
            .map(|name| name.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl RedundantRelations {
    /// Names of all redundant relations
    pub fn redundant(&self) -> &BTreeSet<QualifiedName> {
        &self.redundant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{ClauseBuilder, ProgramBuilder};
    use crate::config::EvaluationConfig;

    fn path_program() -> TranslationUnit {
        let program = ProgramBuilder::new()
            .relation("edge", 2)
            .relation("path", 2)
            .output("path")
            .clause(
                ClauseBuilder::new("path")
                    .head_vars(["x", "y"])
                    .body_atom("edge", ["x", "y"])
                    .build(),
            )
            .clause(
                ClauseBuilder::new("path")
                    .head_vars(["x", "z"])
                    .body_atom("path", ["x", "y"])
                    .body_atom("edge", ["y", "z"])
                    .build(),
            )
            .build();
        TranslationUnit::new(program, EvaluationConfig::default())
    }

    #[test]
    fn test_detail_cache() {
        let tu = path_program();
        let detail = tu.get_analysis::<RelationDetailCache>();
        assert_eq!(detail.clauses(&QualifiedName::new("path")).len(), 2);
        assert!(detail.relation(&QualifiedName::new("edge")).is_some());
        assert!(detail.relation(&QualifiedName::new("missing")).is_none());
    }

    #[test]
    fn test_precedence_edges() {
        let tu = path_program();
        let precedence = tu.get_analysis::<PrecedenceGraph>();
        let edge = QualifiedName::new("edge");
        let path = QualifiedName::new("path");
        assert!(precedence.graph().contains_edge(&edge, &path));
        assert!(precedence.graph().contains_edge(&path, &path));
        assert!(!precedence.graph().contains_edge(&path, &edge));
    }

    #[test]
    fn test_recursive_clauses() {
        let tu = path_program();
        let recursive = tu.get_analysis::<RecursiveClauses>();
        let clauses = &tu.program().clauses;
        assert!(!recursive.is_recursive(&clauses[0]));
        assert!(recursive.is_recursive(&clauses[1]));
    }

    #[test]
    fn test_mutual_recursion_detected() {
        let program = ProgramBuilder::new()
            .relation("a", 1)
            .relation("b", 1)
            .relation("seed", 1)
            .clause(
                ClauseBuilder::new("a").head_vars(["x"]).body_atom("b", ["x"]).build(),
            )
            .clause(
                ClauseBuilder::new("b").head_vars(["x"]).body_atom("a", ["x"]).build(),
            )
            .build();
        let tu = TranslationUnit::new(program, EvaluationConfig::default());
        let recursive = tu.get_analysis::<RecursiveClauses>();
        assert!(recursive.is_recursive(&tu.program().clauses[0]));
        assert!(recursive.is_recursive(&tu.program().clauses[1]));
    }

    #[test]
    fn test_redundant_relations() {
        let program = ProgramBuilder::new()
            .relation("edge", 2)
            .relation("path", 2)
            .relation("orphan", 1)
            .output("path")
            .clause(
                ClauseBuilder::new("path")
                    .head_vars(["x", "y"])
                    .body_atom("edge", ["x", "y"])
                    .build(),
            )
            .clause(
                ClauseBuilder::new("orphan").head_vars(["x"]).body_atom("edge", ["x", "x"]).build(),
            )
            .build();
        let tu = TranslationUnit::new(program, EvaluationConfig::default());
        let redundant = tu.get_analysis::<RedundantRelations>();
        assert!(redundant.redundant().contains(&QualifiedName::new("orphan")));
        assert!(!redundant.redundant().contains(&QualifiedName::new("edge")));
        assert!(!redundant.redundant().contains(&QualifiedName::new("path")));
    }
}
