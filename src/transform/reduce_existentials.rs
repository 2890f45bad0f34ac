//! Reduces relations that are only ever tested for emptiness.
//!
//! A relation is existential when every non-recursive occurrence uses
//! only anonymous variables. Such relations carry no data that anyone
//! reads, so they are replaced by nullary surrogates `+?exists_r` whose
//! clauses mirror the non-recursive definitions. The property spreads
//! backwards through recursive dependencies: a relation can only become
//! existential if everything that feeds it recursively can too.

use crate::analysis::TranslationUnit;
use crate::ast::{Argument, Atom, Clause, Literal, QualifiedName, Relation, RelationRepresentation};
use crate::graph::Graph;
use crate::transform::Transformer;
use std::collections::BTreeSet;

pub struct ReduceExistentials;

impl Transformer for ReduceExistentials {
    fn name(&self) -> &'static str {
        "reduce-existentials"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        let io_types = tu.get_analysis::<crate::analysis::IoType>();

        // dependency graph: head -> atom for non-existential uses in
        // recursive clauses; non-recursive non-existential uses and I/O
        // relations are irreducible seeds
        let mut relation_graph: Graph<QualifiedName> = Graph::new();
        let mut minimal_irreducible: BTreeSet<QualifiedName> = BTreeSet::new();

        for rel in &tu.program().relations {
            relation_graph.insert_vertex(rel.name.clone());
            if io_types.is_io(&rel.name) {
                minimal_irreducible.insert(rel.name.clone());
            }
        }

        for clause in &tu.program().clauses {
            let recursive = is_directly_recursive(clause);
            clause.visit_atoms(&mut |atom| {
                if atom.name == clause.head.name {
                    return;
                }
                if !atom.is_existential() {
                    if recursive {
                        relation_graph.insert_edge(clause.head.name.clone(), atom.name.clone());
                    } else {
                        minimal_irreducible.insert(atom.name.clone());
                    }
                }
            });
        }

        // relations inside aggregators stay untouched; anonymous
        // variables interact badly with aggregate scoping
        for clause in &tu.program().clauses {
            let mut mark = |arg: &Argument| {
                if let Argument::Aggregator(agg) = arg {
                    for lit in &agg.body {
                        lit.visit_atoms(&mut |atom| {
                            minimal_irreducible.insert(atom.name.clone());
                        });
                    }
                }
            };
            for lit in &clause.body {
                lit.visit_args(&mut mark);
            }
            for arg in &clause.head.args {
                arg.visit_args(&mut mark);
            }
        }

        // spread irreducibility by DFS from every seed
        let mut irreducible: BTreeSet<QualifiedName> = BTreeSet::new();
        for seed in &minimal_irreducible {
            relation_graph.visit(seed, |rel| {
                irreducible.insert(rel.clone());
            });
            irreducible.insert(seed.clone());
        }

        // everything else with a definition and a payload is existential
        let mut existential: BTreeSet<QualifiedName> = BTreeSet::new();
        for rel in &tu.program().relations {
            if !tu.program().clauses_for(&rel.name).is_empty()
                && rel.arity() != 0
                && !irreducible.contains(&rel.name)
            {
                existential.insert(rel.name.clone());
            }
        }

        if existential.is_empty() {
            return false;
        }

        // build the nullary surrogates and clone non-recursive clauses
        let mut new_relations: Vec<Relation> = Vec::new();
        let mut new_clauses: Vec<Clause> = Vec::new();
        for name in &existential {
            let surrogate = surrogate_name(name);
            let mut relation = Relation::nullary(surrogate.clone());
            // eqrel storage requires two attributes; the surrogate is plain
            relation.representation = RelationRepresentation::Btree;
            new_relations.push(relation);

            for clause in tu.program().clauses_for(name) {
                if !is_directly_recursive(clause) {
                    let mut cloned = clause.clone();
                    cloned.head = Atom::nullary(surrogate.clone());
                    cloned.plan = clause.plan.clone();
                    new_clauses.push(cloned);
                }
            }
        }

        let program = tu.program_mut();
        for relation in new_relations {
            program.add_relation(relation);
        }
        for clause in new_clauses {
            program.add_clause(clause);
        }

        // rename uses outside the original (soon redundant) definitions
        for clause in &mut program.clauses {
            if existential.contains(&clause.head.name) {
                continue;
            }
            for lit in &mut clause.body {
                match lit {
                    Literal::Atom(atom) | Literal::Negation(atom) => {
                        if existential.contains(&atom.name) {
                            *atom = Atom::nullary(surrogate_name(&atom.name));
                        }
                    }
                    _ => {}
                }
            }
        }

        true
    }
}

fn surrogate_name(name: &QualifiedName) -> QualifiedName {
    QualifiedName::from_segments(vec![format!("+?exists_{name}")])
}

/// Direct recursion only: the head relation occurs in the body
fn is_directly_recursive(clause: &Clause) -> bool {
    clause.body_atoms().iter().any(|atom| atom.name == clause.head.name)
}
