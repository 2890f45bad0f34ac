//! Alias resolution via Robinson-style unification.
//!
//! Equality constraints in a clause body induce a substitution. The
//! pass computes a unifying substitution from the constraints, applies
//! it to a clone of the clause, removes the trivial `t = t` constraints
//! that result, and finally extracts complex terms (functors, type
//! casts) out of atom arguments into fresh `_tmpN = <term>` equalities
//! so that atoms carry only simple arguments.

use crate::analysis::TranslationUnit;
use crate::ast::{Argument, Clause, ConstraintOp, Literal};
use crate::transform::Transformer;
use std::collections::BTreeMap;
use std::collections::HashSet;

pub struct ResolveAliases;

impl Transformer for ResolveAliases {
    fn name(&self) -> &'static str {
        "resolve-aliases"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        let mut changed = false;
        let clauses: Vec<Clause> = tu.program().clauses.clone();
        for clause in &clauses {
            // inlined relations keep their shape for the inliner
            let inline = tu
                .program()
                .relation(&clause.head.name)
                .map(|rel| rel.representation == crate::ast::RelationRepresentation::Inline)
                .unwrap_or(false);
            if inline {
                continue;
            }

            let no_alias = resolve_aliases(clause);
            let cleaned = remove_trivial_equality(&no_alias);
            let normalised = remove_complex_terms_in_atoms(&cleaned, tu);

            if &normalised != clause {
                tu.program_mut().remove_clause(clause);
                tu.program_mut().add_clause(normalised);
                changed = true;
            }
        }
        changed
    }
}

// ============================================================================
// Substitution
// ============================================================================

/// A substitution mapping variable names to replacement terms
#[derive(Debug, Default, Clone)]
struct Substitution {
    var_to_term: BTreeMap<String, Argument>,
}

impl Substitution {
    fn singleton(var: &str, term: &Argument) -> Self {
        let mut var_to_term = BTreeMap::new();
        var_to_term.insert(var.to_string(), term.clone());
        Substitution { var_to_term }
    }

    /// Apply the substitution to an argument, top-down: a substituted
    /// variable is replaced wholesale, without re-substituting inside
    /// the replacement.
    fn apply(&self, arg: &Argument) -> Argument {
        if let Argument::Variable(name) = arg {
            if let Some(term) = self.var_to_term.get(name) {
                return term.clone();
            }
        }
        match arg {
            Argument::RecordInit(args) => {
                Argument::RecordInit(args.iter().map(|a| self.apply(a)).collect())
            }
            Argument::BranchInit { branch, args } => Argument::BranchInit {
                branch: branch.clone(),
                args: args.iter().map(|a| self.apply(a)).collect(),
            },
            Argument::IntrinsicFunctor { op, args } => Argument::IntrinsicFunctor {
                op: *op,
                args: args.iter().map(|a| self.apply(a)).collect(),
            },
            Argument::UserDefinedFunctor { name, args } => Argument::UserDefinedFunctor {
                name: name.clone(),
                args: args.iter().map(|a| self.apply(a)).collect(),
            },
            Argument::TypeCast { value, type_name } => Argument::TypeCast {
                value: Box::new(self.apply(value)),
                type_name: type_name.clone(),
            },
            Argument::Aggregator(agg) => {
                let mut new_agg = (**agg).clone();
                new_agg.target = new_agg.target.map(|t| self.apply(&t));
                new_agg.body = new_agg.body.iter().map(|l| self.apply_literal(l)).collect();
                Argument::Aggregator(Box::new(new_agg))
            }
            other => other.clone(),
        }
    }

    fn apply_literal(&self, lit: &Literal) -> Literal {
        match lit {
            Literal::Atom(atom) => Literal::Atom(crate::ast::Atom {
                name: atom.name.clone(),
                args: atom.args.iter().map(|a| self.apply(a)).collect(),
            }),
            Literal::Negation(atom) => Literal::Negation(crate::ast::Atom {
                name: atom.name.clone(),
                args: atom.args.iter().map(|a| self.apply(a)).collect(),
            }),
            Literal::BinaryConstraint { op, lhs, rhs } => Literal::BinaryConstraint {
                op: *op,
                lhs: self.apply(lhs),
                rhs: self.apply(rhs),
            },
            Literal::BooleanConstraint(b) => Literal::BooleanConstraint(*b),
        }
    }

    fn apply_clause(&self, clause: &Clause) -> Clause {
        Clause {
            head: crate::ast::Atom {
                name: clause.head.name.clone(),
                args: clause.head.args.iter().map(|a| self.apply(a)).collect(),
            },
            body: clause.body.iter().map(|l| self.apply_literal(l)).collect(),
            plan: clause.plan.clone(),
            loc: clause.loc,
        }
    }

    /// Compose `other` onto this substitution: existing replacements are
    /// rewritten by `other`, unseen mappings are appended.
    fn append(&mut self, other: &Substitution) {
        for term in self.var_to_term.values_mut() {
            *term = other.apply(term);
        }
        for (var, term) in &other.var_to_term {
            self.var_to_term.entry(var.clone()).or_insert_with(|| term.clone());
        }
    }
}

/// An equality between two terms awaiting unification
#[derive(Debug, Clone)]
struct Equation {
    lhs: Argument,
    rhs: Argument,
}

impl Equation {
    fn apply(&mut self, sub: &Substitution) {
        self.lhs = sub.apply(&self.lhs);
        self.rhs = sub.apply(&self.rhs);
    }
}

// ============================================================================
// Core steps
// ============================================================================

fn resolve_aliases(clause: &Clause) -> Clause {
    // variables appearing as plain arguments in body atoms or records
    // are grounded there and must not be resolved away
    let mut base_grounded: HashSet<String> = HashSet::new();
    for atom in clause.body_atoms() {
        for arg in &atom.args {
            if let Argument::Variable(name) = arg {
                base_grounded.insert(name.clone());
            }
        }
        for arg in &atom.args {
            arg.visit_args(&mut |inner| match inner {
                Argument::RecordInit(args) | Argument::BranchInit { args, .. } => {
                    for a in args {
                        if let Argument::Variable(name) = a {
                            base_grounded.insert(name.clone());
                        }
                    }
                }
                _ => {}
            });
        }
    }

    // I) extract the equality constraints
    let mut equations: Vec<Equation> = clause
        .body
        .iter()
        .filter_map(|lit| match lit {
            Literal::BinaryConstraint { op: ConstraintOp::Eq, lhs, rhs } => {
                Some(Equation { lhs: lhs.clone(), rhs: rhs.clone() })
            }
            _ => None,
        })
        .collect();

    // II) compute a unifying substitution
    let mut substitution = Substitution::default();
    while let Some(equation) = equations.pop() {
        let Equation { lhs, rhs } = equation;

        // #1: t = t => redundant
        if lhs == rhs {
            continue;
        }

        // #2: [a1,..,an] = [b1,..,bn] => decompose
        if let (Argument::RecordInit(lhs_args), Argument::RecordInit(rhs_args)) = (&lhs, &rhs) {
            assert_eq!(lhs_args.len(), rhs_args.len(), "record lengths not equal");
            for (l, r) in lhs_args.iter().zip(rhs_args.iter()) {
                equations.push(Equation { lhs: l.clone(), rhs: r.clone() });
            }
            continue;
        }
        if let (
            Argument::BranchInit { branch: lb, args: lhs_args },
            Argument::BranchInit { branch: rb, args: rhs_args },
        ) = (&lhs, &rhs)
        {
            if lb == rb && lhs_args.len() == rhs_args.len() {
                for (l, r) in lhs_args.iter().zip(rhs_args.iter()) {
                    equations.push(Equation { lhs: l.clone(), rhs: r.clone() });
                }
            }
            continue;
        }

        // #3: neither side is a variable => keep as a constraint
        if !lhs.is_variable() && !rhs.is_variable() {
            continue;
        }

        // #5: t = v => flip to v = t
        if !lhs.is_variable() {
            equations.push(Equation { lhs: rhs, rhs: lhs });
            continue;
        }

        let var_name = match &lhs {
            Argument::Variable(name) => name.clone(),
            _ => continue,
        };

        // #4 handled implicitly: v = w is a variable-to-term mapping

        // #6: t is a generator => leave for evaluation
        if rhs.is_generator() {
            continue;
        }

        // #7: v occurs in t => not unifiable, leave as constraint
        if rhs.occurs(&lhs) {
            continue;
        }

        let is_structured = matches!(
            rhs,
            Argument::RecordInit(_) | Argument::BranchInit { .. }
        );

        // #9: already grounded by an atom or record => keep the constraint,
        // except records (#8), which are always worth flattening
        if !is_structured && !rhs.is_variable() && base_grounded.contains(&var_name) {
            continue;
        }

        // #8 / #10: add the mapping
        let mapping = Substitution::singleton(&var_name, &rhs);
        for equation in &mut equations {
            equation.apply(&mapping);
        }
        substitution.append(&mapping);
    }

    // III) the resolved clause
    substitution.apply_clause(clause)
}

fn remove_trivial_equality(clause: &Clause) -> Clause {
    let mut res = clause.clone_head();
    for lit in &clause.body {
        if let Literal::BinaryConstraint { op: ConstraintOp::Eq, lhs, rhs } = lit {
            if lhs == rhs {
                continue;
            }
        }
        res.body.push(lit.clone());
    }
    res
}

fn remove_complex_terms_in_atoms(clause: &Clause, tu: &mut TranslationUnit) -> Clause {
    let mut res = clause.clone();

    // collect distinct complex terms appearing inside body atoms
    let mut terms: Vec<Argument> = Vec::new();
    for atom in res.body_atoms() {
        for arg in &atom.args {
            arg.visit_args(&mut |inner| {
                if inner.is_complex() && !terms.contains(inner) {
                    terms.push(inner.clone());
                }
            });
        }
    }
    if terms.is_empty() {
        return res;
    }

    // substitute each term with a fresh variable
    let mut term_to_var: Vec<(Argument, Argument)> = Vec::new();
    for term in &terms {
        let id = tu.next_counter("tmp");
        term_to_var.push((term.clone(), Argument::var(&format!("_tmp_{id}"))));
    }

    for lit in &mut res.body {
        if let Literal::Atom(atom) = lit {
            let args = std::mem::take(&mut atom.args);
            atom.args = args
                .into_iter()
                .map(|arg| {
                    arg.map(|a| {
                        for (term, var) in &term_to_var {
                            if &a == term {
                                return var.clone();
                            }
                        }
                        a
                    })
                })
                .collect();
        }
    }

    // pin the extracted terms back with fresh equalities
    for (term, var) in term_to_var {
        res.body.push(Literal::BinaryConstraint {
            op: ConstraintOp::Eq,
            lhs: var,
            rhs: term,
        });
    }
    res
}
