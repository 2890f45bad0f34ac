//! # Compilation Pipeline
//!
//! The driver that takes a parsed program through analysis, rewriting,
//! lowering and execution:
//!
//! ```text
//! Program --> TranslationUnit --> [rewrite pipeline] --> AST'
//!         --> [seminaive lowering] --> RamProgram
//!         --> [index analysis] --> [node generator] --> CompiledProgram
//!         --> [engine] --> results
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use stratalog::ast::builders::{ClauseBuilder, ProgramBuilder};
//! use stratalog::pipeline::Pipeline;
//! use stratalog::config::EvaluationConfig;
//!
//! let program = ProgramBuilder::new()
//!     .relation("edge", 2)
//!     .relation("path", 2)
//!     .output("path")
//!     .fact("edge", [1, 2])
//!     .fact("edge", [2, 3])
//!     .clause(
//!         ClauseBuilder::new("path")
//!             .head_vars(["x", "y"])
//!             .body_atom("edge", ["x", "y"])
//!             .build(),
//!     )
//!     .clause(
//!         ClauseBuilder::new("path")
//!             .head_vars(["x", "z"])
//!             .body_atom("path", ["x", "y"])
//!             .body_atom("edge", ["y", "z"])
//!             .build(),
//!     )
//!     .build();
//!
//! let result = Pipeline::new(EvaluationConfig::default()).run(program).unwrap();
//! assert_eq!(result.tuples("path").len(), 3);
//! ```

use crate::analysis::{
    IoType, PrecedenceGraph, RecursiveClauses, RelationSchedule, SccGraph,
    TopologicallySortedSccGraph, TranslationUnit,
};
use crate::ast::{Argument, Clause, DirectiveKind, NumericValue, Program, QualifiedName};
use crate::ast2ram;
use crate::config::EvaluationConfig;
use crate::interp::{Engine, NodeGenerator, SymbolTable, Tuple, UserFunctor};
use crate::ram::index_analysis::IndexAnalysis;
use crate::ram::RamDomain;
use crate::reports::{DebugReporter, ErrorReport};
use crate::transform;
use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Errors that abort a pipeline run.
///
/// User-program diagnostics do not abort individual passes (they are
/// collected in the error report); the run as a whole refuses to
/// execute a program whose report carries errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0} semantic error(s) reported; not executing")]
    SemanticErrors(usize),
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),
}

/// The result of a full pipeline run
pub struct EvaluationResult {
    engine: Engine,
    error_report: ErrorReport,
    debug_reporter: DebugReporter,
    output_relations: Vec<QualifiedName>,
}

impl EvaluationResult {
    /// Tuples of a relation after evaluation (empty when the relation
    /// was pruned or never populated)
    pub fn tuples(&self, relation: &str) -> Vec<Tuple> {
        self.engine
            .relation_by_name(relation)
            .map(|rel| rel.scan())
            .unwrap_or_default()
    }

    /// Number of tuples of a relation
    pub fn size(&self, relation: &str) -> usize {
        self.engine
            .relation_by_name(relation)
            .map(|rel| rel.size())
            .unwrap_or(0)
    }

    /// Names of the declared output relations
    pub fn output_relations(&self) -> &[QualifiedName] {
        &self.output_relations
    }

    /// Diagnostics collected during compilation
    pub fn error_report(&self) -> &ErrorReport {
        &self.error_report
    }

    /// Debug-report sections (empty unless `debug_report` was set)
    pub fn debug_report(&self) -> &DebugReporter {
        &self.debug_reporter
    }

    /// Profile log lines (empty unless `profile` was set)
    pub fn profile_log(&self) -> Vec<String> {
        self.engine.profile_log()
    }

    /// The underlying engine, for subroutine calls and inspection
    pub fn engine(&self) -> &Engine {
        &self.engine
    }
}

/// The end-to-end compilation and evaluation driver
pub struct Pipeline {
    config: EvaluationConfig,
    functors: Vec<(String, UserFunctor)>,
}

impl Pipeline {
    pub fn new(config: EvaluationConfig) -> Self {
        Pipeline { config, functors: Vec::new() }
    }

    /// Register a user-defined functor implementation by declared name
    pub fn with_functor(mut self, name: &str, functor: UserFunctor) -> Self {
        self.functors.push((name.to_string(), functor));
        self
    }

    /// Run the full pipeline on a parsed program
    pub fn run(&self, program: Program) -> Result<EvaluationResult> {
        // facts of input-free relations stay in the program; explicit
        // input tuples would arrive through the I/O interface
        let mut tu = TranslationUnit::new(program, self.config.clone());

        // stage B: analyses (reported up front when debugging)
        if self.config.debug_report {
            tu.report_analysis::<PrecedenceGraph>();
            tu.report_analysis::<SccGraph>();
            tu.report_analysis::<TopologicallySortedSccGraph>();
            tu.report_analysis::<RelationSchedule>();
            tu.report_analysis::<RecursiveClauses>();
            tu.report_analysis::<IoType>();
        }

        // stage C: the rewrite pipeline
        let changed = transform::Pipeline::standard().run(&mut tu);
        debug!(changed, "rewrite pipeline finished");
        if tu.error_report().has_errors() {
            return Err(PipelineError::SemanticErrors(tu.error_report().error_count()).into());
        }

        // facts are evaluated as rules; limitsize caps feed the engine
        let io_types = tu.get_analysis::<IoType>();
        let mut limits: BTreeMap<String, usize> = BTreeMap::new();
        for rel in &tu.program().relations {
            if io_types.is_limit_size(&rel.name) {
                limits.insert(rel.name.to_string(), io_types.limit_size(&rel.name));
            }
        }
        let output_relations: Vec<QualifiedName> = tu
            .program()
            .directives
            .iter()
            .filter(|d| d.kind == DirectiveKind::Output)
            .map(|d| d.relation.clone())
            .collect();

        // stage D: lowering, index analysis, node generation
        let ram_program = ast2ram::lower(&tu);
        let index_analysis = IndexAnalysis::run(&ram_program, self.config.provenance);
        let symbols = Arc::new(SymbolTable::new());
        let compiled = NodeGenerator::new(
            &ram_program,
            &index_analysis,
            &symbols,
            &self.config,
            &limits,
        )
        .generate();

        // stage E: execution
        let engine = Engine::new(
            compiled,
            Arc::clone(&symbols),
            self.config.worker_count(),
            self.config.profile,
        );
        for (name, functor) in &self.functors {
            engine.register_functor(name, Arc::clone(functor));
        }
        info!(
            relations = tu.program().relations.len(),
            outputs = output_relations.len(),
            "executing program"
        );
        engine.execute_main();

        let (error_report, debug_reporter) = dismantle(tu);
        Ok(EvaluationResult {
            engine,
            error_report,
            debug_reporter,
            output_relations,
        })
    }

    /// Load facts for an input relation and run. This is the
    /// fact-injection entry the scenario tests use: input tuples are
    /// turned into facts before compilation.
    pub fn run_with_facts(
        &self,
        mut program: Program,
        facts: &[(&str, Vec<Vec<RamDomain>>)],
    ) -> Result<EvaluationResult> {
        for (relation, tuples) in facts {
            for tuple in tuples {
                program.add_clause(Clause::fact(crate::ast::Atom::new(
                    *relation,
                    tuple
                        .iter()
                        .map(|&v| Argument::NumericConstant(NumericValue::Int(v)))
                        .collect(),
                )));
            }
        }
        self.run(program)
    }
}

fn dismantle(tu: TranslationUnit) -> (ErrorReport, DebugReporter) {
    let error_report = tu.error_report().clone();
    let debug_reporter = tu.debug_reporter().clone();
    (error_report, debug_reporter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::{ClauseBuilder, ProgramBuilder};

    #[test]
    fn test_non_recursive_projection() {
        let program = ProgramBuilder::new()
            .relation("edge", 2)
            .relation("src", 1)
            .output("src")
            .fact("edge", [1, 2])
            .fact("edge", [3, 4])
            .clause(
                ClauseBuilder::new("src")
                    .head_vars(["x"])
                    .body_atom("edge", ["x", "y"])
                    .build(),
            )
            .build();
        let result = Pipeline::new(EvaluationConfig::default())
            .run(program)
            .expect("pipeline runs");
        assert_eq!(result.tuples("src"), vec![vec![1], vec![3]]);
    }

    #[test]
    fn test_run_with_injected_facts() {
        let program = ProgramBuilder::new()
            .relation("edge", 2)
            .relation("src", 1)
            .output("src")
            .clause(
                ClauseBuilder::new("src")
                    .head_vars(["x"])
                    .body_atom("edge", ["x", "y"])
                    .build(),
            )
            .build();
        let result = Pipeline::new(EvaluationConfig::default())
            .run_with_facts(program, &[("edge", vec![vec![4, 5], vec![6, 7]])])
            .expect("pipeline runs");
        assert_eq!(result.tuples("src"), vec![vec![4], vec![6]]);
    }

    #[test]
    fn test_fact_only_program() {
        let program = ProgramBuilder::new()
            .relation("t", 1)
            .output("t")
            .fact("t", [5])
            .build();
        let result = Pipeline::new(EvaluationConfig::default())
            .run(program)
            .expect("pipeline runs");
        assert_eq!(result.tuples("t"), vec![vec![5]]);
    }
}
