//! # Analysis Framework
//!
//! A translation unit owns a program and exposes a lazy, cached set of
//! analyses over it. `get_analysis::<A>()` runs `A` on first access and
//! returns the cached result afterwards; `invalidate_analyses()` drops
//! the whole cache and is called by the pipeline driver after every
//! mutating transformer pass.
//!
//! Analyses are stateful only through this cache and never mutate the
//! program. An analysis that depends on other analyses requests them at
//! the top of its `run`.

use crate::ast::Program;
use crate::config::EvaluationConfig;
use crate::reports::{DebugReporter, ErrorReport};
use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub mod io_type;
pub mod normalisation;
pub mod precedence;
pub mod profile;
pub mod scc;
pub mod schedule;

pub use io_type::IoType;
pub use normalisation::{ClauseNormalisation, NormalisedClause};
pub use precedence::{PrecedenceGraph, RecursiveClauses, RedundantRelations, RelationDetailCache};
pub use profile::ProfileUse;
pub use scc::{SccGraph, TopologicallySortedSccGraph};
pub use schedule::{RelationSchedule, ScheduleStep};

/// A cached analysis over a translation unit.
///
/// `run` computes the analysis state from scratch; it may request other
/// analyses through the translation unit. `print` renders the state for
/// the debug reporter.
pub trait Analysis: Sized + 'static {
    /// Stable analysis name, used as the debug-report section title
    const NAME: &'static str;

    /// Compute the analysis for the current program
    fn run(tu: &TranslationUnit) -> Self;

    /// Human-readable dump for the debug report
    fn print(&self) -> String;
}

/// A translation unit: the program under compilation together with its
/// analysis cache, error report, debug reporter and fresh-name counters.
pub struct TranslationUnit {
    program: Program,
    config: EvaluationConfig,
    cache: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
    error_report: ErrorReport,
    debug_reporter: DebugReporter,
    counters: HashMap<&'static str, usize>,
}

impl TranslationUnit {
    /// Create a translation unit for the given program and options
    pub fn new(program: Program, config: EvaluationConfig) -> Self {
        let debug_reporter = DebugReporter::new(config.debug_report);
        TranslationUnit {
            program,
            config,
            cache: RefCell::new(HashMap::new()),
            error_report: ErrorReport::new(),
            debug_reporter,
            counters: HashMap::new(),
        }
    }

    /// The program under compilation
    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Mutable program access for transformers. The caller is responsible
    /// for invalidating analyses after mutation (the pipeline driver does
    /// this once per pass).
    pub fn program_mut(&mut self) -> &mut Program {
        &mut self.program
    }

    /// The evaluation options the core reads
    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// The shared error report
    pub fn error_report(&self) -> &ErrorReport {
        &self.error_report
    }

    /// Mutable access to the error report
    pub fn error_report_mut(&mut self) -> &mut ErrorReport {
        &mut self.error_report
    }

    /// The debug reporter
    pub fn debug_reporter(&self) -> &DebugReporter {
        &self.debug_reporter
    }

    /// Mutable access to the debug reporter
    pub fn debug_reporter_mut(&mut self) -> &mut DebugReporter {
        &mut self.debug_reporter
    }

    /// Get a cached analysis, computing it on first access
    pub fn get_analysis<A: Analysis>(&self) -> Rc<A> {
        if let Some(cached) = self.cache.borrow().get(&TypeId::of::<A>()) {
            if let Ok(analysis) = Rc::clone(cached).downcast::<A>() {
                return analysis;
            }
        }
        // not cached yet; run outside the borrow so dependent analyses
        // can be requested recursively
        let analysis = Rc::new(A::run(self));
        self.cache
            .borrow_mut()
            .insert(TypeId::of::<A>(), Rc::clone(&analysis) as Rc<dyn Any>);
        analysis
    }

    /// Discard all cached analyses
    pub fn invalidate_analyses(&mut self) {
        self.cache.borrow_mut().clear();
    }

    /// Draw the next value of a named fresh-name counter. Counters live
    /// on the translation unit so repeated runs stay deterministic.
    pub fn next_counter(&mut self, family: &'static str) -> usize {
        let entry = self.counters.entry(family).or_insert(0);
        let value = *entry;
        *entry += 1;
        value
    }

    /// Append a debug-report section for a cached analysis
    pub fn report_analysis<A: Analysis>(&mut self) {
        if self.debug_reporter.is_enabled() {
            let body = self.get_analysis::<A>().print();
            self.debug_reporter.add_section(A::NAME, body);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builders::ProgramBuilder;

    struct ClauseCount(usize);

    impl Analysis for ClauseCount {
        const NAME: &'static str = "clause-count";

        fn run(tu: &TranslationUnit) -> Self {
            ClauseCount(tu.program().clauses.len())
        }

        fn print(&self) -> String {
            format!("{}", self.0)
        }
    }

    fn unit() -> TranslationUnit {
        let program = ProgramBuilder::new()
            .relation("edge", 2)
            .fact("edge", [1, 2])
            .build();
        TranslationUnit::new(program, EvaluationConfig::default())
    }

    #[test]
    fn test_analysis_is_cached() {
        let tu = unit();
        let first = tu.get_analysis::<ClauseCount>();
        let second = tu.get_analysis::<ClauseCount>();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.0, 1);
    }

    #[test]
    fn test_invalidate_recomputes() {
        let mut tu = unit();
        assert_eq!(tu.get_analysis::<ClauseCount>().0, 1);
        tu.program_mut().clauses.clear();
        tu.invalidate_analyses();
        assert_eq!(tu.get_analysis::<ClauseCount>().0, 0);
    }

    #[test]
    fn test_counters_are_independent() {
        let mut tu = unit();
        assert_eq!(tu.next_counter("disconnected"), 0);
        assert_eq!(tu.next_counter("disconnected"), 1);
        assert_eq!(tu.next_counter("agg"), 0);
    }
}
