//! Partitions disconnected body literals into fresh nullary relations.
//!
//! For each clause, build an undirected variable co-occurrence graph.
//! Connected components that share no variable with the head are pulled
//! out into fresh propositional relations `+disconnectedN`; the original
//! clause keeps the head-connected literals plus one nullary atom per
//! extracted component:
//!
//! ```text
//! a(x) :- b(x), c(y), d(y), e(z), f(z).
//! ==>
//! a(x) :- b(x), +disconnected0(), +disconnected1().
//! +disconnected0() :- c(y), d(y).
//! +disconnected1() :- e(z), f(z).
//! ```

use crate::analysis::TranslationUnit;
use crate::ast::{Atom, Clause, Literal, QualifiedName, Relation};
use crate::graph::Graph;
use crate::transform::Transformer;
use std::collections::BTreeSet;

pub struct PartitionBodyLiterals;

impl Transformer for PartitionBodyLiterals {
    fn name(&self) -> &'static str {
        "partition-body-literals"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        let mut changed = false;
        let mut clauses_to_add: Vec<Clause> = Vec::new();
        let mut relations_to_add: Vec<Relation> = Vec::new();
        let mut clauses_to_remove: Vec<Clause> = Vec::new();
        let mut replacement_clauses: Vec<Clause> = Vec::new();

        let clauses: Vec<Clause> = tu.program().clauses.clone();
        for clause in &clauses {
            // variable co-occurrence graph of the clause
            let mut variable_graph: Graph<String> = Graph::new();
            let mut clause_variables: BTreeSet<String> = BTreeSet::new();
            let mut literals: Vec<&Literal> = clause.body.iter().collect();
            let head_literal = Literal::Atom(clause.head.clone());
            literals.push(&head_literal);

            for lit in &literals {
                let vars: BTreeSet<String> = lit.variables().into_iter().collect();
                clause_variables.extend(vars.iter().cloned());
                for var in &vars {
                    variable_graph.insert_vertex(var.clone());
                }
                // reachability only needs a spanning star per literal
                let mut iter = vars.iter();
                if let Some(first) = iter.next() {
                    for var in iter {
                        variable_graph.insert_edge(first.clone(), var.clone());
                        variable_graph.insert_edge(var.clone(), first.clone());
                    }
                }
            }

            // component connected to the head
            let mut seen: BTreeSet<String> = BTreeSet::new();
            let mut head_component: BTreeSet<String> =
                clause.head.variables().into_iter().collect();
            if let Some(start) = head_component.iter().next().cloned() {
                let mut reached = BTreeSet::new();
                variable_graph.visit(&start, |var| {
                    reached.insert(var.clone());
                });
                head_component.extend(reached.iter().cloned());
                seen.extend(reached);
                seen.extend(head_component.iter().cloned());
            }

            // all remaining connected components
            let mut components: Vec<BTreeSet<String>> = Vec::new();
            for var in &clause_variables {
                if seen.contains(var) {
                    continue;
                }
                let mut component = BTreeSet::new();
                variable_graph.visit(var, |v| {
                    component.insert(v.clone());
                });
                seen.extend(component.iter().cloned());
                components.push(component);
            }

            if components.is_empty() {
                continue;
            }
            changed = true;

            // one fresh propositional relation per disconnected component
            let mut replacement_atoms: Vec<Literal> = Vec::new();
            for component in &components {
                let id = tu.next_counter("disconnected");
                let name = QualifiedName::new(&format!("+disconnected{id}"));
                relations_to_add.push(Relation::nullary(name.clone()));

                let associated: Vec<Literal> = clause
                    .body
                    .iter()
                    .filter(|lit| lit.variables().iter().any(|v| component.contains(v)))
                    .cloned()
                    .collect();
                clauses_to_add.push(Clause::new(Atom::nullary(name.clone()), associated));
                replacement_atoms.push(Literal::Atom(Atom::nullary(name)));
            }

            // remaining clause: head-connected literals plus the new atoms
            let mut new_body: Vec<Literal> = clause
                .body
                .iter()
                .filter(|lit| {
                    let vars = lit.variables();
                    vars.is_empty() || vars.iter().any(|v| head_component.contains(v))
                })
                .cloned()
                .collect();
            new_body.extend(replacement_atoms);
            replacement_clauses.push(Clause {
                head: clause.head.clone(),
                body: new_body,
                plan: None,
                loc: clause.loc,
            });
            clauses_to_remove.push(clause.clone());
        }

        let program = tu.program_mut();
        for clause in &clauses_to_remove {
            program.remove_clause(clause);
        }
        for relation in relations_to_add {
            program.add_relation(relation);
        }
        for clause in clauses_to_add.into_iter().chain(replacement_clauses) {
            program.add_clause(clause);
        }
        changed
    }
}
