//! Deletes relations that cannot contribute to any output.

use crate::analysis::{RedundantRelations, TranslationUnit};
use crate::transform::Transformer;
use tracing::debug;

pub struct RemoveRedundantRelations;

impl Transformer for RemoveRedundantRelations {
    fn name(&self) -> &'static str {
        "remove-redundant-relations"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        let redundant = tu.get_analysis::<RedundantRelations>().redundant().clone();
        let mut changed = false;
        for name in redundant {
            debug!(relation = %name, "removing redundant relation");
            tu.program_mut().remove_relation(&name);
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{ClauseBuilder, ProgramBuilder};
    use crate::ast::QualifiedName;
    use crate::config::EvaluationConfig;

    #[test]
    fn test_unreachable_relation_removed() {
        let program = ProgramBuilder::new()
            .relation("edge", 2)
            .relation("path", 2)
            .relation("scratch", 1)
            .output("path")
            .clause(
                ClauseBuilder::new("path")
                    .head_vars(["x", "y"])
                    .body_atom("edge", ["x", "y"])
                    .build(),
            )
            .clause(
                ClauseBuilder::new("scratch")
                    .head_vars(["x"])
                    .body_atom("edge", ["x", "x"])
                    .build(),
            )
            .build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        assert!(RemoveRedundantRelations.apply(&mut tu));
        assert!(tu.program().relation(&QualifiedName::new("scratch")).is_none());
        assert!(tu.program().relation(&QualifiedName::new("edge")).is_some());
        assert!(tu.program().relation(&QualifiedName::new("path")).is_some());
    }

    #[test]
    fn test_no_outputs_removes_everything() {
        let program = ProgramBuilder::new().relation("a", 1).fact("a", [1]).build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        assert!(RemoveRedundantRelations.apply(&mut tu));
        assert!(tu.program().relations.is_empty());
    }
}
