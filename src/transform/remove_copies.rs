//! Removes relations that are plain copies of another relation.
//!
//! A relation `r` defined by the single clause `r(x1,..,xn) :- s(x1,..,xn).`
//! with identical argument lists, distinct head variables, no functional
//! dependencies and no I/O role is an alias of `s`. Alias chains are
//! composed transitively, every reference is rewritten to the canonical
//! target, copy cycles are broken by emptying the cycle representative's
//! definition, and the dead relations are deleted.

use crate::analysis::{IoType, TranslationUnit};
use crate::ast::{Argument, Clause, Literal, QualifiedName};
use crate::transform::Transformer;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub struct RemoveRelationCopies;

impl Transformer for RemoveRelationCopies {
    fn name(&self) -> &'static str {
        "remove-relation-copies"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        let io_types = tu.get_analysis::<IoType>();

        // collect direct aliases r -> s
        let mut is_direct_alias_of: BTreeMap<QualifiedName, QualifiedName> = BTreeMap::new();
        let mut alias_clauses: Vec<Clause> = Vec::new();
        for rel in &tu.program().relations {
            if !rel.dependencies.is_empty() || io_types.is_io(&rel.name) {
                continue;
            }
            let clauses = tu.program().clauses_for(&rel.name);
            if clauses.len() != 1 {
                continue;
            }
            let clause = clauses[0];
            if clause.is_fact() || clause.body.len() != 1 {
                continue;
            }
            let atom = match &clause.body[0] {
                Literal::Atom(atom) => atom,
                _ => continue,
            };
            if clause.head.args != atom.args {
                continue;
            }
            if !has_only_distinct_head_vars(&clause.head.args) {
                continue;
            }
            is_direct_alias_of.insert(clause.head.name.clone(), atom.name.clone());
            alias_clauses.push(clause.clone());
        }

        if is_direct_alias_of.is_empty() {
            return false;
        }

        // compose chains transitively and detect copy cycles
        let mut is_alias_of: BTreeMap<QualifiedName, QualifiedName> = BTreeMap::new();
        let mut cycle_reps: BTreeSet<QualifiedName> = BTreeSet::new();
        for (source, first_target) in &is_direct_alias_of {
            let mut visited = BTreeSet::new();
            visited.insert(source.clone());
            visited.insert(first_target.clone());
            let mut target = first_target.clone();
            while let Some(next) = is_direct_alias_of.get(&target) {
                if visited.contains(next) {
                    cycle_reps.insert(target.clone());
                    break;
                }
                target = next.clone();
                visited.insert(target.clone());
            }
            is_alias_of.insert(source.clone(), target);
        }

        // drop the copy clauses before renaming so canonical relations do
        // not inherit tautological self-rules
        for clause in &alias_clauses {
            tu.program_mut().remove_clause(clause);
        }

        // rewrite every atom reference to its canonical target
        tu.program_mut().rename_atoms(&is_alias_of);

        // cycle representatives keep an (empty) definition; this silently
        // empties cyclic copy groups, so leave a trace for the user
        for rep in &cycle_reps {
            debug!(relation = %rep, "breaking relation-copy cycle");
            tu.error_report_mut().add_warning(
                format!("relation copy cycle through {rep}; its definition is now empty"),
                None,
            );
        }

        // delete the now-unused alias relations
        for source in is_alias_of.keys() {
            if !cycle_reps.contains(source) {
                tu.program_mut().remove_relation(source);
            }
        }

        true
    }
}

/// Head arguments must all be distinct variables, where records are
/// decomposed and their elements checked the same way.
fn has_only_distinct_head_vars(args: &[Argument]) -> bool {
    let mut head_vars: BTreeSet<String> = BTreeSet::new();
    let mut worklist: Vec<&Argument> = args.iter().collect();
    while let Some(arg) = worklist.pop() {
        match arg {
            Argument::Variable(name) => {
                if !head_vars.insert(name.clone()) {
                    return false;
                }
            }
            Argument::RecordInit(inner) => worklist.extend(inner.iter()),
            _ => return false,
        }
    }
    true
}
