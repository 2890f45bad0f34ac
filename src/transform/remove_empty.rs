//! Removes provably empty relations and their uses.
//!
//! A relation is empty iff it has no clauses and is not an input. Any
//! clause with a positive atom over an empty relation can never fire and
//! is dropped; a negation of an empty relation is vacuously true and is
//! removed from its body. Empty relations that are neither outputs nor
//! referenced from aggregates are deleted outright.

use crate::analysis::{IoType, TranslationUnit};
use crate::ast::{Argument, Literal, QualifiedName};
use crate::transform::Transformer;
use std::collections::BTreeSet;

pub struct RemoveEmptyRelations;

impl Transformer for RemoveEmptyRelations {
    fn name(&self) -> &'static str {
        "remove-empty-relations"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        let io_types = tu.get_analysis::<IoType>();
        let mut changed = false;

        // relations referenced from inside aggregate bodies stay alive:
        // emptiness of an aggregate operand still produces a value
        let mut used_in_aggregate: BTreeSet<QualifiedName> = BTreeSet::new();
        for clause in &tu.program().clauses {
            for lit in &clause.body {
                lit.visit_args(&mut |arg| {
                    if let Argument::Aggregator(agg) = arg {
                        for inner in &agg.body {
                            inner.visit_atoms(&mut |atom| {
                                used_in_aggregate.insert(atom.name.clone());
                            });
                        }
                    }
                });
            }
            for arg in &clause.head.args {
                arg.visit_args(&mut |a| {
                    if let Argument::Aggregator(agg) = a {
                        for inner in &agg.body {
                            inner.visit_atoms(&mut |atom| {
                                used_in_aggregate.insert(atom.name.clone());
                            });
                        }
                    }
                });
            }
        }

        let mut empty_relations: Vec<QualifiedName> = Vec::new();
        for rel in &tu.program().relations {
            if !tu.program().clauses_for(&rel.name).is_empty() || io_types.is_input(&rel.name) {
                continue;
            }
            empty_relations.push(rel.name.clone());
        }

        for name in &empty_relations {
            if !used_in_aggregate.contains(name) && !io_types.is_output(name) {
                tu.program_mut().remove_relation(name);
                changed = true;
            }
        }

        for name in &empty_relations {
            changed |= remove_empty_relation_uses(tu, name);
        }

        changed
    }
}

fn remove_empty_relation_uses(tu: &mut TranslationUnit, empty: &QualifiedName) -> bool {
    let mut changed = false;
    let program = tu.program_mut();

    // drop clauses with a positive atom over the empty relation
    let before = program.clauses.len();
    program.clauses.retain(|clause| {
        !clause.body.iter().any(|lit| match lit {
            Literal::Atom(atom) => &atom.name == empty,
            _ => false,
        })
    });
    changed |= program.clauses.len() != before;

    // drop negations of the empty relation from remaining bodies
    for clause in &mut program.clauses {
        let before = clause.body.len();
        clause.body.retain(|lit| match lit {
            Literal::Negation(atom) => &atom.name != empty,
            _ => true,
        });
        changed |= clause.body.len() != before;
    }

    changed
}
