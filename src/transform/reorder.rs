//! Reorders body atoms according to the active SIPS metric.
//!
//! Non-atom literals keep their original positions; the atoms around
//! them are permuted into the order the metric produces. Clauses with a
//! user-supplied execution plan are left untouched. When a profile log
//! is configured, a second profile-guided pass runs on top.

use crate::analysis::TranslationUnit;
use crate::ast::{Clause, Literal};
use crate::sips::SipsMetric;
use crate::transform::Transformer;

pub struct ReorderLiterals;

impl Transformer for ReorderLiterals {
    fn name(&self) -> &'static str {
        "reorder-literals"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        let mut changed = false;

        let sips_name = tu.config().sips.clone();
        let sips = SipsMetric::create(&sips_name, tu);
        changed |= reorder_all(tu, &sips);

        // profile-guided pass on top of the static ordering
        if tu.config().profile_use.is_some() {
            let profile_sips = SipsMetric::create("profile-use", tu);
            changed |= reorder_all(tu, &profile_sips);
        }

        changed
    }
}

fn reorder_all(tu: &mut TranslationUnit, sips: &SipsMetric) -> bool {
    let mut replacements: Vec<(Clause, Clause)> = Vec::new();
    for clause in &tu.program().clauses {
        if clause.plan.is_some() {
            continue;
        }
        let new_order = sips.get_reordering(clause);
        let change_needed = new_order.iter().enumerate().any(|(i, &j)| i != j);
        if change_needed {
            replacements.push((clause.clone(), reorder_atoms(clause, &new_order)));
        }
    }
    let changed = !replacements.is_empty();
    for (old, new) in replacements {
        let program = tu.program_mut();
        program.remove_clause(&old);
        program.add_clause(new);
    }
    changed
}

/// Permute the body atoms of a clause: `order[i] = j` places atom `j`
/// at atom-position `i`. All other literals stay where they were.
pub fn reorder_atoms(clause: &Clause, order: &[usize]) -> Clause {
    let atoms: Vec<&Literal> = clause
        .body
        .iter()
        .filter(|lit| matches!(lit, Literal::Atom(_)))
        .collect();
    let mut atom_slot = 0;
    let body = clause
        .body
        .iter()
        .map(|lit| {
            if matches!(lit, Literal::Atom(_)) {
                let replacement = atoms[order[atom_slot]].clone();
                atom_slot += 1;
                replacement
            } else {
                lit.clone()
            }
        })
        .collect();
    Clause {
        head: clause.head.clone(),
        body,
        plan: clause.plan.clone(),
        loc: clause.loc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{ClauseBuilder, ProgramBuilder};
    use crate::ast::{Argument, ConstraintOp, ExecutionPlan, QualifiedName};
    use crate::config::EvaluationConfig;

    #[test]
    fn test_reorder_atoms_keeps_constraints_in_place() {
        let clause = ClauseBuilder::new("r")
            .head_vars(["x"])
            .body_atom("a", ["x"])
            .constraint(Argument::var("x"), ConstraintOp::Lt, Argument::int(5))
            .body_atom("b", ["x"])
            .build();
        let reordered = reorder_atoms(&clause, &[1, 0]);
        assert_eq!(
            reordered.body[0].atom().map(|a| a.name.clone()),
            Some(QualifiedName::new("b"))
        );
        assert!(matches!(reordered.body[1], Literal::BinaryConstraint { .. }));
        assert_eq!(
            reordered.body[2].atom().map(|a| a.name.clone()),
            Some(QualifiedName::new("a"))
        );
    }

    #[test]
    fn test_all_bound_moves_proposition_first() {
        let program = ProgramBuilder::new()
            .relation("r", 1)
            .relation("big", 2)
            .relation("flag", 0)
            .clause(
                ClauseBuilder::new("r")
                    .head_vars(["x"])
                    .body_atom("big", ["x", "y"])
                    .body_atom("flag", [])
                    .build(),
            )
            .build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        assert!(ReorderLiterals.apply(&mut tu));
        let clauses = tu.program().clauses_for(&QualifiedName::new("r"));
        assert_eq!(
            clauses[0].body[0].atom().map(|a| a.name.clone()),
            Some(QualifiedName::new("flag"))
        );
    }

    #[test]
    fn test_planned_clause_untouched() {
        let mut clause = ClauseBuilder::new("r")
            .head_vars(["x"])
            .body_atom("big", ["x", "y"])
            .body_atom("flag", [])
            .build();
        clause.plan = Some(ExecutionPlan::default());
        let program = ProgramBuilder::new()
            .relation("r", 1)
            .relation("big", 2)
            .relation("flag", 0)
            .clause(clause)
            .build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        assert!(!ReorderLiterals.apply(&mut tu));
    }
}
