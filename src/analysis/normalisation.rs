//! Clause normalisation.
//!
//! Computes a canonical element-list form of every clause, used to
//! compare clauses for structural equivalence up to variable naming:
//! two clauses are equivalent when their normalised elements agree
//! under a consistent renaming of the recorded variables.

use crate::analysis::{Analysis, TranslationUnit};
use crate::ast::{Argument, Atom, Clause, Literal, NumericValue};
use std::collections::BTreeSet;

/// One element of a normalised clause: a tagged name plus parameter list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalisedElement {
    pub name: String,
    pub params: Vec<String>,
}

/// The canonical form of a clause
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalisedClause {
    elements: Vec<NormalisedElement>,
    variables: BTreeSet<String>,
    constants: BTreeSet<String>,
    fully_normalised: bool,
}

impl NormalisedClause {
    pub fn new(clause: &Clause) -> Self {
        let mut norm = NormalisedClause {
            fully_normalised: true,
            ..Default::default()
        };
        let mut state = NormaliserState::default();

        // head
        let head_vars: Vec<String> = clause
            .head
            .args
            .iter()
            .map(|arg| norm.normalise_argument(arg, &mut state))
            .collect();
        norm.elements.push(NormalisedElement {
            name: "@min:head".to_string(),
            params: head_vars,
        });

        // body
        for lit in &clause.body {
            norm.add_body_literal("@min:scope:0", lit, &mut state);
        }
        norm
    }

    /// The canonical element sequence
    pub fn elements(&self) -> &[NormalisedElement] {
        &self.elements
    }

    /// Variables open to renaming during equivalence checks
    pub fn variables(&self) -> &BTreeSet<String> {
        &self.variables
    }

    /// Constants that must match exactly
    pub fn constants(&self) -> &BTreeSet<String> {
        &self.constants
    }

    /// False when the clause contained constructs the normaliser cannot
    /// canonicalise; such clauses only compare equal to themselves.
    pub fn is_fully_normalised(&self) -> bool {
        self.fully_normalised
    }

    fn add_atom(&mut self, qualifier: &str, scope: &str, atom: &Atom, state: &mut NormaliserState) {
        let mut params = vec![scope.to_string()];
        for arg in &atom.args {
            let normalised = self.normalise_argument(arg, state);
            params.push(normalised);
        }
        self.elements.push(NormalisedElement {
            name: format!("{qualifier}:{}", atom.name),
            params,
        });
    }

    fn add_body_literal(&mut self, scope: &str, lit: &Literal, state: &mut NormaliserState) {
        match lit {
            Literal::Atom(atom) => self.add_atom("@min:atom", scope, atom, state),
            Literal::Negation(atom) => self.add_atom("@min:neg", scope, atom, state),
            Literal::BinaryConstraint { op, lhs, rhs } => {
                let lhs = self.normalise_argument(lhs, state);
                let rhs = self.normalise_argument(rhs, state);
                self.elements.push(NormalisedElement {
                    name: format!("@min:operator:{}", op.as_str()),
                    params: vec![scope.to_string(), lhs, rhs],
                });
            }
            Literal::BooleanConstraint(value) => {
                self.fully_normalised = false;
                self.elements.push(NormalisedElement {
                    name: format!("@min:unhandled:lit:{scope}:{value}"),
                    params: Vec::new(),
                });
            }
        }
    }

    fn normalise_argument(&mut self, arg: &Argument, state: &mut NormaliserState) -> String {
        match arg {
            Argument::StringConstant(s) => {
                let name = format!("@min:cst:str:{s}");
                self.constants.insert(name.clone());
                name
            }
            Argument::NumericConstant(value) => {
                let rendered = match value {
                    NumericValue::Int(v) => format!("{v}"),
                    NumericValue::Unsigned(v) => format!("{v}u"),
                    NumericValue::Float(bits) => format!("{}f", f64::from_bits(*bits)),
                };
                let name = format!("@min:cst:num:{rendered}");
                self.constants.insert(name.clone());
                name
            }
            Argument::NilConstant => {
                self.constants.insert("@min:cst:nil".to_string());
                "@min:cst:nil".to_string()
            }
            Argument::Variable(name) => {
                self.variables.insert(name.clone());
                name.clone()
            }
            Argument::UnnamedVariable => {
                let name = format!("@min:unnamed:{}", state.unnamed_count);
                state.unnamed_count += 1;
                self.variables.insert(name.clone());
                name
            }
            Argument::Aggregator(agg) => {
                // a fresh scope uniquely identifies the aggregator
                state.aggr_scope_count += 1;
                let scope = format!("@min:scope:{}", state.aggr_scope_count);
                self.variables.insert(scope.clone());

                let mut params = vec![scope.clone()];
                if let Some(target) = &agg.target {
                    let normalised = self.normalise_argument(target, state);
                    params.push(normalised);
                }
                self.elements.push(NormalisedElement {
                    name: format!("@min:aggrtype:{}", agg.op.as_str()),
                    params,
                });

                for lit in &agg.body {
                    self.add_body_literal(&scope, lit, state);
                }
                scope
            }
            _ => {
                self.fully_normalised = false;
                "@min:unhandled:arg".to_string()
            }
        }
    }
}

#[derive(Debug, Default)]
struct NormaliserState {
    unnamed_count: usize,
    aggr_scope_count: usize,
}

/// Normalised forms of every clause of the program
pub struct ClauseNormalisation {
    normalisations: Vec<(Clause, NormalisedClause)>,
}

impl Analysis for ClauseNormalisation {
    const NAME: &'static str = "clause-normalisation";

    fn run(tu: &TranslationUnit) -> Self {
        let normalisations = tu
            .program()
            .clauses
            .iter()
            .map(|clause| (clause.clone(), NormalisedClause::new(clause)))
            .collect();
        ClauseNormalisation { normalisations }
    }

    fn print(&self) -> String {
        let mut out = String::new();
        for (clause, norm) in &self.normalisations {
            out.push_str(&format!("Normalise({clause}) = {{"));
            for (i, el) in norm.elements().iter().enumerate() {
                if i != 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!("{}:{:?}", el.name, el.params));
            }
            out.push_str("}\n");
        }
        out
    }
}

impl ClauseNormalisation {
    /// The normalisation of a clause; `None` when the clause is not part
    /// of the analysed program.
    pub fn normalisation(&self, clause: &Clause) -> Option<&NormalisedClause> {
        self.normalisations
            .iter()
            .find(|(c, _)| c == clause)
            .map(|(_, norm)| norm)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::ClauseBuilder;

    #[test]
    fn test_structure_is_canonical() {
        let clause = ClauseBuilder::new("a")
            .head_vars(["x"])
            .body_atom("b", ["x", "y"])
            .build();
        let norm = NormalisedClause::new(&clause);
        assert_eq!(norm.elements().len(), 2);
        assert_eq!(norm.elements()[0].name, "@min:head");
        assert_eq!(norm.elements()[1].name, "@min:atom:b");
        assert!(norm.is_fully_normalised());
        assert!(norm.variables().contains("y"));
    }

    #[test]
    fn test_equivalent_up_to_structure() {
        // same structure, different variable names: elements differ only
        // in the recorded variable parameters
        let first = ClauseBuilder::new("a")
            .head_vars(["x"])
            .body_atom("b", ["x"])
            .build();
        let second = ClauseBuilder::new("a")
            .head_vars(["v"])
            .body_atom("b", ["v"])
            .build();
        let n1 = NormalisedClause::new(&first);
        let n2 = NormalisedClause::new(&second);
        let names1: Vec<&str> = n1.elements().iter().map(|e| e.name.as_str()).collect();
        let names2: Vec<&str> = n2.elements().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names1, names2);
    }

    #[test]
    fn test_unnamed_variables_numbered_per_clause() {
        let clause = ClauseBuilder::new("a")
            .head_vars(["x"])
            .literal(crate::ast::Literal::Atom(
                crate::ast::builders::AtomBuilder::new("b").unnamed().unnamed().build(),
            ))
            .body_atom("c", ["x"])
            .build();
        let norm = NormalisedClause::new(&clause);
        assert!(norm.variables().contains("@min:unnamed:0"));
        assert!(norm.variables().contains("@min:unnamed:1"));
    }
}
