//! I/O classification of relations.
//!
//! Scans the program's directives and classifies every relation by
//! membership in input / output / printsize / limitsize, recording the
//! limit value where one is declared.

use crate::analysis::{Analysis, TranslationUnit};
use crate::ast::{DirectiveKind, QualifiedName};
use std::collections::{BTreeMap, BTreeSet};

/// Per-relation I/O classification
pub struct IoType {
    inputs: BTreeSet<QualifiedName>,
    outputs: BTreeSet<QualifiedName>,
    print_sizes: BTreeSet<QualifiedName>,
    limit_sizes: BTreeMap<QualifiedName, usize>,
}

impl Analysis for IoType {
    const NAME: &'static str = "io-type";

    fn run(tu: &TranslationUnit) -> Self {
        let mut inputs = BTreeSet::new();
        let mut outputs = BTreeSet::new();
        let mut print_sizes = BTreeSet::new();
        let mut limit_sizes = BTreeMap::new();
        for directive in &tu.program().directives {
            match directive.kind {
                DirectiveKind::Input => {
                    inputs.insert(directive.relation.clone());
                }
                DirectiveKind::Output => {
                    outputs.insert(directive.relation.clone());
                }
                DirectiveKind::PrintSize => {
                    print_sizes.insert(directive.relation.clone());
                }
                DirectiveKind::LimitSize => {
                    limit_sizes
                        .insert(directive.relation.clone(), directive.limit.unwrap_or(0));
                }
            }
        }
        IoType { inputs, outputs, print_sizes, limit_sizes }
    }

    fn print(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("inputs: {:?}\n", names(&self.inputs)));
        out.push_str(&format!("outputs: {:?}\n", names(&self.outputs)));
        out.push_str(&format!("printsizes: {:?}\n", names(&self.print_sizes)));
        out.push_str(&format!(
            "limitsizes: {:?}\n",
            self.limit_sizes
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
        ));
        out
    }
}

fn names(set: &BTreeSet<QualifiedName>) -> Vec<String> {
    set.iter().map(|n| n.to_string()).collect()
}

impl IoType {
    pub fn is_input(&self, relation: &QualifiedName) -> bool {
        self.inputs.contains(relation)
    }

    pub fn is_output(&self, relation: &QualifiedName) -> bool {
        self.outputs.contains(relation)
    }

    pub fn is_print_size(&self, relation: &QualifiedName) -> bool {
        self.print_sizes.contains(relation)
    }

    pub fn is_limit_size(&self, relation: &QualifiedName) -> bool {
        self.limit_sizes.contains_key(relation)
    }

    /// Declared limit-size bound; 0 when none was declared
    pub fn limit_size(&self, relation: &QualifiedName) -> usize {
        self.limit_sizes.get(relation).copied().unwrap_or(0)
    }

    /// Whether the relation takes part in I/O at all
    pub fn is_io(&self, relation: &QualifiedName) -> bool {
        self.is_input(relation) || self.is_output(relation) || self.is_print_size(relation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::ProgramBuilder;
    use crate::ast::Directive;
    use crate::config::EvaluationConfig;

    #[test]
    fn test_classification() {
        let mut program = ProgramBuilder::new()
            .relation("a", 1)
            .relation("b", 1)
            .relation("c", 1)
            .input("a")
            .output("b")
            .build();
        let mut limit = Directive::new(DirectiveKind::LimitSize, "c");
        limit.limit = Some(100);
        program.directives.push(limit);

        let tu = TranslationUnit::new(program, EvaluationConfig::default());
        let io = tu.get_analysis::<IoType>();
        let a = QualifiedName::new("a");
        let b = QualifiedName::new("b");
        let c = QualifiedName::new("c");
        assert!(io.is_input(&a) && io.is_io(&a));
        assert!(io.is_output(&b));
        assert!(io.is_limit_size(&c) && !io.is_io(&c));
        assert_eq!(io.limit_size(&c), 100);
        assert_eq!(io.limit_size(&a), 0);
    }
}
