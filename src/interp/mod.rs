//! # Tree-Walking Interpreter
//!
//! The execution backend: a generator that flattens the relational form
//! into a decorated node tree, and the engine that dispatches over it
//! against indexed in-memory relations.
//!
//! ```text
//! RamProgram -> [NodeGenerator] -> CompiledProgram -> [Engine] -> relations
//! ```

pub mod context;
pub mod engine;
pub mod generator;
pub mod node;
pub mod relation;
pub mod symbols;

pub use context::Context;
pub use engine::{Engine, IoHandler, UserFunctor};
pub use generator::NodeGenerator;
pub use node::{CompiledProgram, Node, SuperInstruction, ViewRequest};
pub use relation::{Relation, RelationSpec, Tuple, View};
pub use symbols::{RecordTable, SymbolTable};
