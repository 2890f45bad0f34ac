//! Validates user-supplied execution plans on recursive clauses.
//!
//! Each plan order must be a permutation of `1..=#bodyAtoms`, and the
//! plan may only name versions below the clause's version count (the
//! number of body-atom occurrences of same-stratum relations). Failures
//! are reported as diagnostics; the pass never mutates the program.

use crate::analysis::{RecursiveClauses, RelationSchedule, TranslationUnit};
use crate::reports::{Diagnostic, DiagnosticMessage, Severity};
use crate::transform::Transformer;

pub struct ExecutionPlanChecker;

impl Transformer for ExecutionPlanChecker {
    fn name(&self) -> &'static str {
        "execution-plan-checker"
    }

    fn apply(&mut self, tu: &mut TranslationUnit) -> bool {
        let schedule = tu.get_analysis::<RelationSchedule>();
        let recursive_clauses = tu.get_analysis::<RecursiveClauses>();

        let mut diagnostics: Vec<Diagnostic> = Vec::new();
        for step in schedule.steps() {
            for rel in &step.computed {
                for clause in tu.program().clauses_for(rel) {
                    if !recursive_clauses.is_recursive(clause) {
                        continue;
                    }
                    let plan = match &clause.plan {
                        Some(plan) => plan,
                        None => continue,
                    };

                    // number of same-stratum body-atom occurrences
                    let version_count = clause
                        .body_atoms()
                        .iter()
                        .filter(|atom| step.computed.contains(&atom.name))
                        .count();
                    let num_atoms = clause.body_atoms().len();

                    let mut max_version: Option<usize> = None;
                    for (&version, order) in &plan.orders {
                        max_version = Some(max_version.map_or(version, |m: usize| m.max(version)));

                        let mut is_complete = true;
                        for expected in 1..=order.len() {
                            if !order.contains(&expected) {
                                is_complete = false;
                                break;
                            }
                        }
                        if order.len() != num_atoms || !is_complete {
                            diagnostics.push(Diagnostic {
                                severity: Severity::Error,
                                primary: DiagnosticMessage::new(
                                    "invalid execution order in plan",
                                    Some(plan.loc),
                                ),
                                secondary: Vec::new(),
                            });
                        }
                    }

                    if let Some(max_version) = max_version {
                        if version_count <= max_version {
                            for (&version, _) in &plan.orders {
                                if version >= version_count {
                                    diagnostics.push(Diagnostic {
                                        severity: Severity::Error,
                                        primary: DiagnosticMessage::new(
                                            format!("execution plan for version {version}"),
                                            Some(plan.loc),
                                        ),
                                        secondary: vec![DiagnosticMessage::new(
                                            format!(
                                                "only versions 0..{} permitted",
                                                version_count.saturating_sub(1)
                                            ),
                                            None,
                                        )],
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }

        for diagnostic in diagnostics {
            tu.error_report_mut().add_diagnostic(diagnostic);
        }
        false
    }
}
