//! # Stratalog
//!
//! The semantic middle-end and tree-walking interpreter core of a
//! Datalog compiler: dependency analyses over relations, a fixed-point
//! clause-rewriting pipeline, lowering into a relational-algebra form,
//! and an indexed in-memory evaluation engine.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Datalog AST (from the parser)
//!     ↓
//! [Analyses]        → precedence graph, SCCs, schedule, I/O classes
//!     ↓
//! [Rewrite Pipeline]→ alias resolution, partitioning, aggregate
//!                     materialization, existential reduction,
//!                     literal reordering (SIPS)
//!     ↓
//! [Lowering]        → seminaive relational form (delta/new loops)
//!     ↓
//! [Index Analysis]  → minimum index cover per relation
//!     ↓
//! [Generator]       → flattened node tree with super-instructions
//!     ↓
//! [Engine]          → results in indexed relations
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use stratalog::ast::builders::{ClauseBuilder, ProgramBuilder};
//! use stratalog::config::EvaluationConfig;
//! use stratalog::pipeline::Pipeline;
//!
//! // edge facts plus transitive closure rules
//! let program = ProgramBuilder::new()
//!     .relation("edge", 2)
//!     .relation("reach", 2)
//!     .output("reach")
//!     .fact("edge", [1, 2])
//!     .fact("edge", [2, 3])
//!     .clause(
//!         ClauseBuilder::new("reach")
//!             .head_vars(["x", "y"])
//!             .body_atom("edge", ["x", "y"])
//!             .build(),
//!     )
//!     .clause(
//!         ClauseBuilder::new("reach")
//!             .head_vars(["x", "z"])
//!             .body_atom("reach", ["x", "y"])
//!             .body_atom("edge", ["y", "z"])
//!             .build(),
//!     )
//!     .build();
//!
//! let result = Pipeline::new(EvaluationConfig::default()).run(program).unwrap();
//! assert_eq!(result.size("reach"), 3);
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ast` | AST types and builders |
//! | `graph` | Generic labelled digraph |
//! | `analysis` | Translation unit + cached analyses |
//! | `transform` | Clause-rewrite pipeline |
//! | `sips` | Sideways-information-passing cost models |
//! | `ram` | Relational-algebra form + index analysis |
//! | `ast2ram` | Seminaive lowering |
//! | `interp` | Generator + tree-walking engine |
//! | `reports` | Error report + debug reporter |
//! | `pipeline` | End-to-end driver |

pub mod analysis;
pub mod ast;
pub mod ast2ram;
pub mod config;
pub mod graph;
pub mod interp;
pub mod pipeline;
pub mod ram;
pub mod reports;
pub mod sips;
pub mod transform;

// Re-export the core surface
pub use analysis::TranslationUnit;
pub use ast::{Atom, Clause, Literal, Program, QualifiedName, Relation};
pub use config::{Config, EvaluationConfig};
pub use pipeline::{EvaluationResult, Pipeline, PipelineError};
pub use ram::{RamDomain, RamProgram};
pub use reports::{Diagnostic, ErrorReport, Severity};
pub use sips::{BindingStore, SipsMetric};
