//! Materializes single-valued aggregates into synthetic relations.
//!
//! An aggregate is single-valued when none of its variables is also
//! free in the enclosing clause, so it evaluates to exactly one value
//! for the whole clause. Such aggregates are hoisted into a fresh
//! unary relation:
//!
//! ```text
//! a(x) :- x = sum y : { b(y) }, b(x).
//! ==>
//! __agg_single0(z) :- z = sum y : { b(y) }.
//! a(x) :- x = z, b(x), __agg_single0(z).
//! ```
//!
//! Aggregates nested inside other aggregates are unwound one level per
//! pipeline round; the fixpoint driver winds the rest out.

use crate::analysis::TranslationUnit;
use crate::ast::{
    Aggregator, Argument, Atom, Attribute, Clause, ConstraintOp, Literal, QualifiedName, Relation,
};
use crate::transform::Transformer;
use std::collections::HashSet;

pub struct MaterializeSingletonAggregation;

impl Transformer for MaterializeSingletonAggregation {
    fn name(&self) -> &'static str {
        "materialize-singleton-aggregation"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        // collect (clause index, aggregate) pairs worth materializing
        let mut targets: Vec<(usize, Aggregator)> = Vec::new();
        for (idx, clause) in tu.program().clauses.iter().enumerate() {
            let mut outer: Vec<Aggregator> = Vec::new();
            collect_outermost_aggregates(clause, &mut outer);
            for agg in outer {
                if clause.body.len() == 1 {
                    continue;
                }
                // structurally equal duplicates are handled by one rewrite
                if targets.iter().any(|(i, a)| *i == idx && a == &agg) {
                    continue;
                }
                if is_single_valued(&agg, clause) {
                    targets.push((idx, agg));
                }
            }
        }
        if targets.is_empty() {
            return false;
        }

        for (idx, aggregate) in targets {
            let rel_name = fresh_relation_name(tu);
            let var_name = fresh_variable_name(&tu.program().clauses[idx]);
            let variable = Argument::Variable(var_name.clone());

            // __agg_singleN(z) :- z = <aggregate>.
            let mut agg_rel = Relation::new(rel_name.clone(), vec![Attribute::new(&var_name, "number")]);
            agg_rel.loc = tu.program().clauses[idx].loc;
            let agg_clause = Clause::new(
                Atom::new(rel_name.clone(), vec![variable.clone()]),
                vec![Literal::BinaryConstraint {
                    op: ConstraintOp::Eq,
                    lhs: variable.clone(),
                    rhs: Argument::Aggregator(Box::new(aggregate.clone())),
                }],
            );

            let program = tu.program_mut();
            program.add_relation(agg_rel);
            program.add_clause(agg_clause);

            // swap the aggregate term for the variable and join with the
            // materialized relation
            let clause = &mut program.clauses[idx];
            let target = Argument::Aggregator(Box::new(aggregate));
            replace_in_clause(clause, &target, &variable);
            clause.body.push(Literal::Atom(Atom::new(rel_name, vec![variable])));
        }
        true
    }
}

/// Aggregates not nested inside another aggregate, in clause order
fn collect_outermost_aggregates(clause: &Clause, out: &mut Vec<Aggregator>) {
    let mut collect = |arg: &Argument| {
        collect_in_argument(arg, out);
    };
    for arg in &clause.head.args {
        collect(arg);
    }
    for lit in &clause.body {
        match lit {
            Literal::Atom(atom) | Literal::Negation(atom) => {
                for arg in &atom.args {
                    collect(arg);
                }
            }
            Literal::BinaryConstraint { lhs, rhs, .. } => {
                collect(lhs);
                collect(rhs);
            }
            Literal::BooleanConstraint(_) => {}
        }
    }
}

fn collect_in_argument(arg: &Argument, out: &mut Vec<Aggregator>) {
    match arg {
        Argument::Aggregator(agg) => out.push((**agg).clone()),
        Argument::RecordInit(args)
        | Argument::BranchInit { args, .. }
        | Argument::IntrinsicFunctor { args, .. }
        | Argument::UserDefinedFunctor { args, .. } => {
            for inner in args {
                collect_in_argument(inner, out);
            }
        }
        Argument::TypeCast { value, .. } => collect_in_argument(value, out),
        _ => {}
    }
}

/// Single-valued: no variable of the aggregate is also used in the
/// clause outside of it.
fn is_single_valued(agg: &Aggregator, clause: &Clause) -> bool {
    let mut agg_vars: HashSet<String> = HashSet::new();
    if let Some(target) = &agg.target {
        agg_vars.extend(target.variables());
    }
    for lit in &agg.body {
        agg_vars.extend(lit.variables());
    }

    // variables of the clause with the aggregate masked out
    let masked = Argument::Aggregator(Box::new(agg.clone()));
    let mut outside: HashSet<String> = HashSet::new();
    let mut collect_outside = |arg: &Argument| {
        if arg == &masked {
            return;
        }
        if let Argument::Variable(name) = arg {
            outside.insert(name.clone());
        }
    };
    // a shallow walk that stops at the masked aggregate
    fn walk(arg: &Argument, masked: &Argument, f: &mut impl FnMut(&Argument)) {
        if arg == masked {
            return;
        }
        f(arg);
        match arg {
            Argument::RecordInit(args)
            | Argument::BranchInit { args, .. }
            | Argument::IntrinsicFunctor { args, .. }
            | Argument::UserDefinedFunctor { args, .. } => {
                for inner in args {
                    walk(inner, masked, f);
                }
            }
            Argument::TypeCast { value, .. } => walk(value, masked, f),
            Argument::Aggregator(agg) => {
                if let Some(target) = &agg.target {
                    walk(target, masked, f);
                }
                for lit in &agg.body {
                    match lit {
                        Literal::Atom(atom) | Literal::Negation(atom) => {
                            for a in &atom.args {
                                walk(a, masked, f);
                            }
                        }
                        Literal::BinaryConstraint { lhs, rhs, .. } => {
                            walk(lhs, masked, f);
                            walk(rhs, masked, f);
                        }
                        Literal::BooleanConstraint(_) => {}
                    }
                }
            }
            _ => {}
        }
    }
    for arg in &clause.head.args {
        walk(arg, &masked, &mut collect_outside);
    }
    for lit in &clause.body {
        match lit {
            Literal::Atom(atom) | Literal::Negation(atom) => {
                for arg in &atom.args {
                    walk(arg, &masked, &mut collect_outside);
                }
            }
            Literal::BinaryConstraint { lhs, rhs, .. } => {
                walk(lhs, &masked, &mut collect_outside);
                walk(rhs, &masked, &mut collect_outside);
            }
            Literal::BooleanConstraint(_) => {}
        }
    }

    agg_vars.intersection(&outside).next().is_none()
}

fn fresh_relation_name(tu: &mut TranslationUnit) -> QualifiedName {
    loop {
        let id = tu.next_counter("agg-single");
        let name = QualifiedName::new(&format!("__agg_single{id}"));
        if tu.program().relation(&name).is_none() {
            return name;
        }
    }
}

fn fresh_variable_name(clause: &Clause) -> String {
    let used = clause.variables();
    if !used.contains("z") {
        return "z".to_string();
    }
    let mut i = 0;
    loop {
        let candidate = format!("z{i}");
        if !used.contains(&candidate) {
            return candidate;
        }
        i += 1;
    }
}

fn replace_in_clause(clause: &mut Clause, target: &Argument, replacement: &Argument) {
    let subst = |arg: Argument| -> Argument {
        if &arg == target {
            replacement.clone()
        } else {
            arg
        }
    };
    let head_args = std::mem::take(&mut clause.head.args);
    clause.head.args = head_args.into_iter().map(|a| a.map(subst)).collect();
    let body = std::mem::take(&mut clause.body);
    clause.body = body.into_iter().map(|l| l.map_arguments(subst)).collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{ClauseBuilder, ProgramBuilder};
    use crate::ast::AggregateOp;
    use crate::config::EvaluationConfig;

    fn sum_aggregate() -> Argument {
        Argument::Aggregator(Box::new(Aggregator {
            op: AggregateOp::Sum,
            target: Some(Argument::var("y")),
            body: vec![Literal::Atom(Atom::new("b", vec![Argument::var("y")]))],
        }))
    }

    #[test]
    fn test_single_valued_aggregate_materialized() {
        // a(x) :- b(x), x = sum y : { b(y) }.
        let program = ProgramBuilder::new()
            .relation("a", 1)
            .relation("b", 1)
            .output("a")
            .clause(
                ClauseBuilder::new("a")
                    .head_vars(["x"])
                    .body_atom("b", ["x"])
                    .constraint(Argument::var("x"), ConstraintOp::Eq, sum_aggregate())
                    .build(),
            )
            .build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        assert!(MaterializeSingletonAggregation.apply(&mut tu));

        let agg_rel = QualifiedName::new("__agg_single0");
        assert!(tu.program().relation(&agg_rel).is_some());
        let agg_clauses = tu.program().clauses_for(&agg_rel);
        assert_eq!(agg_clauses.len(), 1);

        // the original clause now joins against the materialized relation
        let a_clauses = tu.program().clauses_for(&QualifiedName::new("a"));
        assert!(a_clauses[0]
            .body
            .iter()
            .any(|lit| lit.atom().map(|at| at.name == agg_rel).unwrap_or(false)));
        // and no aggregator remains in it
        let mut has_agg = false;
        for lit in &a_clauses[0].body {
            lit.visit_args(&mut |arg| {
                has_agg |= matches!(arg, Argument::Aggregator(_));
            });
        }
        assert!(!has_agg);
    }

    #[test]
    fn test_sole_literal_aggregate_left_alone() {
        let program = ProgramBuilder::new()
            .relation("a", 1)
            .relation("b", 1)
            .clause(
                ClauseBuilder::new("a")
                    .head_vars(["x"])
                    .constraint(Argument::var("x"), ConstraintOp::Eq, sum_aggregate())
                    .build(),
            )
            .build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        assert!(!MaterializeSingletonAggregation.apply(&mut tu));
    }

    #[test]
    fn test_injected_variable_blocks_materialization() {
        // a(x) :- b(x), x = sum y : { c(x, y) }. -- x is injected
        let agg = Argument::Aggregator(Box::new(Aggregator {
            op: AggregateOp::Sum,
            target: Some(Argument::var("y")),
            body: vec![Literal::Atom(Atom::new(
                "c",
                vec![Argument::var("x"), Argument::var("y")],
            ))],
        }));
        let program = ProgramBuilder::new()
            .relation("a", 1)
            .relation("b", 1)
            .relation("c", 2)
            .clause(
                ClauseBuilder::new("a")
                    .head_vars(["x"])
                    .body_atom("b", ["x"])
                    .constraint(Argument::var("x"), ConstraintOp::Eq, agg)
                    .build(),
            )
            .build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        assert!(!MaterializeSingletonAggregation.apply(&mut tu));
    }
}
