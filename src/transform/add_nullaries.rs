//! Adds a tautology atom to aggregates without a body atom.
//!
//! Aggregates like `count : { x = 1 }` have no atom to drive iteration;
//! this pass appends a synthetic nullary atom `+Tautology()` to such
//! bodies and ensures the backing single-fact relation exists.

use crate::analysis::TranslationUnit;
use crate::ast::{Argument, Atom, Clause, Literal, QualifiedName, Relation};
use crate::transform::Transformer;

pub struct AddNullariesToAtomlessAggregates;

const TAUTOLOGY: &str = "+Tautology";

impl Transformer for AddNullariesToAtomlessAggregates {
    fn name(&self) -> &'static str {
        "add-nullaries-to-atomless-aggregates"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        let mut changed = false;
        let program = tu.program_mut();
        for clause in &mut program.clauses {
            for lit in &mut clause.body {
                changed |= patch_literal(lit);
            }
            for arg in &mut clause.head.args {
                changed |= patch_argument(arg);
            }
        }
        if changed && program.relation(&QualifiedName::new(TAUTOLOGY)).is_none() {
            program.add_relation(Relation::nullary(TAUTOLOGY));
            program.add_clause(Clause::fact(Atom::nullary(TAUTOLOGY)));
        }
        changed
    }
}

fn patch_literal(lit: &mut Literal) -> bool {
    match lit {
        Literal::Atom(atom) | Literal::Negation(atom) => {
            let mut changed = false;
            for arg in &mut atom.args {
                changed |= patch_argument(arg);
            }
            changed
        }
        Literal::BinaryConstraint { lhs, rhs, .. } => {
            patch_argument(lhs) | patch_argument(rhs)
        }
        Literal::BooleanConstraint(_) => false,
    }
}

fn patch_argument(arg: &mut Argument) -> bool {
    match arg {
        Argument::Aggregator(agg) => {
            let mut changed = false;
            for lit in &mut agg.body {
                changed |= patch_literal(lit);
            }
            let has_atom = agg.body.iter().any(|lit| matches!(lit, Literal::Atom(_)));
            if !has_atom {
                agg.body.push(Literal::Atom(Atom::nullary(TAUTOLOGY)));
                changed = true;
            }
            changed
        }
        Argument::RecordInit(args)
        | Argument::BranchInit { args, .. }
        | Argument::IntrinsicFunctor { args, .. }
        | Argument::UserDefinedFunctor { args, .. } => {
            let mut changed = false;
            for inner in args {
                changed |= patch_argument(inner);
            }
            changed
        }
        Argument::TypeCast { value, .. } => patch_argument(value),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{ClauseBuilder, ProgramBuilder};
    use crate::ast::{AggregateOp, Aggregator, ConstraintOp};
    use crate::config::EvaluationConfig;

    #[test]
    fn test_atomless_aggregate_gets_tautology() {
        let agg = Argument::Aggregator(Box::new(Aggregator {
            op: AggregateOp::Count,
            target: None,
            body: vec![Literal::BinaryConstraint {
                op: ConstraintOp::Eq,
                lhs: Argument::var("x"),
                rhs: Argument::int(1),
            }],
        }));
        let program = ProgramBuilder::new()
            .relation("r", 1)
            .clause(
                ClauseBuilder::new("r")
                    .head_vars(["c"])
                    .constraint(Argument::var("c"), ConstraintOp::Eq, agg)
                    .build(),
            )
            .build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        assert!(AddNullariesToAtomlessAggregates.apply(&mut tu));

        // relation and fact were synthesized
        let taut = QualifiedName::new(TAUTOLOGY);
        assert!(tu.program().relation(&taut).is_some());
        assert_eq!(tu.program().clauses_for(&taut).len(), 1);

        // the aggregate body now carries the tautology atom
        let mut found = false;
        tu.program().visit_atoms(&mut |atom| {
            found |= atom.name == taut && atom.arity() == 0;
        });
        assert!(found);
    }

    #[test]
    fn test_aggregate_with_atom_untouched() {
        let agg = Argument::Aggregator(Box::new(Aggregator {
            op: AggregateOp::Sum,
            target: Some(Argument::var("y")),
            body: vec![Literal::Atom(Atom::new("b", vec![Argument::var("y")]))],
        }));
        let program = ProgramBuilder::new()
            .relation("r", 1)
            .relation("b", 1)
            .clause(
                ClauseBuilder::new("r")
                    .head_vars(["c"])
                    .constraint(Argument::var("c"), ConstraintOp::Eq, agg)
                    .build(),
            )
            .build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        assert!(!AddNullariesToAtomlessAggregates.apply(&mut tu));
    }
}
