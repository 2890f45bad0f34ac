//! # Clause Rewriting Pipeline
//!
//! Semantics-preserving transformations over the translation unit. Each
//! transformer reports whether it changed the program; the driver runs
//! the whole sequence to a fixed point, invalidating the analysis cache
//! after every mutating pass.
//!
//! ```text
//! AST -> [AddNullaries] -> [Partition] -> [RemoveEmpty] -> [RemoveCopies]
//!     -> [ReduceExistentials] -> [MaterializeAggregates] -> [ResolveAliases]
//!     -> [ReorderLiterals] -> [PlanChecker] -> [RemoveRedundant] -> AST'
//! ```

use crate::analysis::TranslationUnit;
use tracing::debug;

mod add_nullaries;
mod materialize_aggregates;
mod partition;
mod plan_checker;
mod reduce_existentials;
mod remove_copies;
mod remove_empty;
mod remove_redundant;
mod reorder;
mod resolve_aliases;

pub use add_nullaries::AddNullariesToAtomlessAggregates;
pub use materialize_aggregates::MaterializeSingletonAggregation;
pub use partition::PartitionBodyLiterals;
pub use plan_checker::ExecutionPlanChecker;
pub use reduce_existentials::ReduceExistentials;
pub use remove_copies::RemoveRelationCopies;
pub use remove_empty::RemoveEmptyRelations;
pub use remove_redundant::RemoveRedundantRelations;
pub use reorder::ReorderLiterals;
pub use resolve_aliases::ResolveAliases;

/// A rewriting pass over a translation unit.
///
/// `apply` returns true iff the program was changed. Transformers append
/// diagnostics to the shared error report instead of aborting.
pub trait Transformer {
    /// Stable pass name for logging and debug reporting
    fn name(&self) -> &'static str;

    /// Run the pass once
    fn apply(&mut self, tu: &mut TranslationUnit) -> bool;
}

/// Driver that runs a transformer sequence to a fixed point.
pub struct Pipeline {
    transformers: Vec<Box<dyn Transformer>>,
    max_rounds: usize,
}

impl Pipeline {
    /// The standard rewrite pipeline in its canonical order
    pub fn standard() -> Self {
        Pipeline {
            transformers: vec![
                Box::new(AddNullariesToAtomlessAggregates),
                Box::new(PartitionBodyLiterals),
                Box::new(RemoveEmptyRelations),
                Box::new(RemoveRelationCopies),
                Box::new(ReduceExistentials),
                Box::new(MaterializeSingletonAggregation),
                Box::new(ResolveAliases),
                Box::new(ReorderLiterals),
                Box::new(ExecutionPlanChecker),
                Box::new(RemoveRedundantRelations),
            ],
            max_rounds: 32,
        }
    }

    /// A pipeline over an explicit transformer sequence
    pub fn new(transformers: Vec<Box<dyn Transformer>>) -> Self {
        Pipeline { transformers, max_rounds: 32 }
    }

    /// Run all transformers until a full round leaves the program
    /// unchanged (or the round cap is hit). Returns whether anything
    /// changed at all.
    pub fn run(&mut self, tu: &mut TranslationUnit) -> bool {
        let mut any_changed = false;
        for round in 0..self.max_rounds {
            let mut round_changed = false;
            for transformer in &mut self.transformers {
                let changed = transformer.apply(tu);
                debug!(pass = transformer.name(), changed, round, "transformer pass");
                if changed {
                    tu.invalidate_analyses();
                    if tu.debug_reporter().is_enabled() {
                        let body = tu
                            .program()
                            .clauses
                            .iter()
                            .map(|c| c.to_string())
                            .collect::<Vec<_>>()
                            .join("\n");
                        tu.debug_reporter_mut()
                            .add_section(format!("after {}", transformer.name()), body);
                    }
                    round_changed = true;
                }
            }
            any_changed |= round_changed;
            if !round_changed {
                break;
            }
        }
        any_changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::ProgramBuilder;
    use crate::config::EvaluationConfig;

    struct CountedPass {
        remaining: usize,
        runs: usize,
    }

    impl Transformer for CountedPass {
        fn name(&self) -> &'static str {
            "counted"
        }

        fn apply(&mut self, _tu: &mut TranslationUnit) -> bool {
            self.runs += 1;
            if self.remaining > 0 {
                self.remaining -= 1;
                true
            } else {
                false
            }
        }
    }

    #[test]
    fn test_pipeline_runs_to_fixed_point() {
        let program = ProgramBuilder::new().relation("a", 1).build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        let mut pipeline = Pipeline::new(vec![Box::new(CountedPass { remaining: 2, runs: 0 })]);
        assert!(pipeline.run(&mut tu));
        // two changing rounds plus the final unchanged round
    }

    #[test]
    fn test_pipeline_reports_no_change() {
        let program = ProgramBuilder::new().relation("a", 1).build();
        let mut tu = TranslationUnit::new(program, EvaluationConfig::default());
        let mut pipeline = Pipeline::new(vec![Box::new(CountedPass { remaining: 0, runs: 0 })]);
        assert!(!pipeline.run(&mut tu));
    }
}
