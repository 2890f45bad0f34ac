//! # Flattened Interpreter Nodes
//!
//! The generator compiles the relational form into this node tree. Each
//! node carries pre-resolved relation slots, index and view ids, and
//! super-instructions, so the dispatch loop never performs name lookups
//! or re-derives index positions. The enum discriminant is the packed
//! dispatch tag; `match` on it compiles to a dense jump table.

use crate::ast::{AggregateOp, ConstraintOp, DirectiveKind, IntrinsicOp};
use crate::ram::RamDomain;

/// Generator-assigned relation slot
pub type RelId = usize;
/// Per-query view slot
pub type ViewId = usize;

/// A precomputed bundle of constants, tuple accesses and residual
/// expressions used to materialize a tuple or range pattern without
/// per-operation bookkeeping.
///
/// `first`/`second` hold the lower/upper bounds (or the insert values in
/// `first`), pre-filled with constants and open-bound sentinels. The
/// `tuple_*` triples `(dst, tuple_id, element)` are copied from the
/// context at execution time; `expr_*` pairs evaluate the attached
/// expression into `dst`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SuperInstruction {
    pub first: Vec<RamDomain>,
    pub second: Vec<RamDomain>,
    pub tuple_first: Vec<(usize, usize, usize)>,
    pub tuple_second: Vec<(usize, usize, usize)>,
    pub expr_first: Vec<(usize, Node)>,
    pub expr_second: Vec<(usize, Node)>,
}

impl SuperInstruction {
    /// A bundle for the given arity with fully open bounds
    pub fn open(arity: usize) -> Self {
        SuperInstruction {
            first: vec![RamDomain::MIN; arity],
            second: vec![RamDomain::MAX; arity],
            ..Default::default()
        }
    }

    /// Arity of the bounded pattern
    pub fn arity(&self) -> usize {
        self.first.len()
    }
}

/// View requirement of a query: relation slot, index position, view slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewRequest {
    pub relation: RelId,
    pub index: usize,
    pub view: ViewId,
}

/// One flattened interpreter node.
///
/// Expressions, conditions, operations and statements share the node
/// type; the generator only builds well-typed combinations.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    // -- expressions --
    NumberConstant(RamDomain),
    /// Pre-interned string constant
    StringConstant(RamDomain),
    TupleElement { tuple_id: usize, element: usize },
    AutoIncrement,
    Undef,
    IntrinsicOperator { op: IntrinsicOp, args: Vec<Node> },
    UserDefinedOperator { name: String, args: Vec<Node> },
    PackRecord { args: Vec<Node> },
    SubroutineArgument(usize),
    RelationSize { relation: RelId },

    // -- conditions --
    True,
    False,
    Conjunction { lhs: Box<Node>, rhs: Box<Node> },
    Negation { child: Box<Node> },
    Constraint { op: ConstraintOp, lhs: Box<Node>, rhs: Box<Node> },
    EmptinessCheck { relation: RelId },
    ExistenceCheck {
        relation: RelId,
        view: ViewId,
        /// all attributes bound: a point lookup instead of a range probe
        is_total: bool,
        super_inst: SuperInstruction,
    },
    ProvenanceExistenceCheck {
        relation: RelId,
        view: ViewId,
        super_inst: SuperInstruction,
    },

    // -- operations --
    Scan { relation: RelId, tuple_id: usize, body: Box<Node> },
    ParallelScan { relation: RelId, tuple_id: usize, body: Box<Node> },
    IndexScan {
        relation: RelId,
        tuple_id: usize,
        view: ViewId,
        super_inst: SuperInstruction,
        body: Box<Node>,
    },
    ParallelIndexScan {
        relation: RelId,
        tuple_id: usize,
        index: usize,
        super_inst: SuperInstruction,
        body: Box<Node>,
    },
    IfExists {
        relation: RelId,
        tuple_id: usize,
        condition: Box<Node>,
        body: Box<Node>,
    },
    IndexIfExists {
        relation: RelId,
        tuple_id: usize,
        view: ViewId,
        super_inst: SuperInstruction,
        condition: Box<Node>,
        body: Box<Node>,
    },
    Aggregate {
        relation: RelId,
        tuple_id: usize,
        function: AggregateOp,
        expression: Option<Box<Node>>,
        condition: Box<Node>,
        body: Box<Node>,
    },
    IndexAggregate {
        relation: RelId,
        tuple_id: usize,
        function: AggregateOp,
        expression: Option<Box<Node>>,
        view: ViewId,
        super_inst: SuperInstruction,
        condition: Box<Node>,
        body: Box<Node>,
    },
    UnpackRecord {
        expression: Box<Node>,
        arity: usize,
        tuple_id: usize,
        body: Box<Node>,
    },
    NestedIntrinsicOperator {
        op: IntrinsicOp,
        args: Vec<Node>,
        tuple_id: usize,
        body: Box<Node>,
    },
    Filter { condition: Box<Node>, body: Box<Node> },
    Break { condition: Box<Node>, body: Box<Node> },
    Insert { relation: RelId, super_inst: SuperInstruction },
    GuardedInsert {
        relation: RelId,
        super_inst: SuperInstruction,
        condition: Box<Node>,
    },
    SubroutineReturn { args: Vec<Node> },

    // -- statements --
    Sequence { children: Vec<Node> },
    Parallel { children: Vec<Node> },
    Loop { body: Box<Node> },
    Exit { condition: Box<Node> },
    Query {
        /// views to create per execution (and per worker)
        views: Vec<ViewRequest>,
        /// view-independent part of the outermost filter, evaluated
        /// before any view is constructed
        view_free_condition: Option<Box<Node>>,
        body: Box<Node>,
    },
    Clear { relation: RelId },
    Swap { lhs: RelId, rhs: RelId },
    Extend { target: RelId, source: RelId },
    Io { kind: DirectiveKind, relation: RelId },
    LogSize { relation: RelId, message: String },
    LogTimer { message: String, statement: Box<Node> },
    DebugInfo { message: String, statement: Box<Node> },
    Call(usize),
}

impl Node {
    /// Stable name of the node kind, used by profiling and diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Node::NumberConstant(_) => "NumberConstant",
            Node::StringConstant(_) => "StringConstant",
            Node::TupleElement { .. } => "TupleElement",
            Node::AutoIncrement => "AutoIncrement",
            Node::Undef => "Undef",
            Node::IntrinsicOperator { .. } => "IntrinsicOperator",
            Node::UserDefinedOperator { .. } => "UserDefinedOperator",
            Node::PackRecord { .. } => "PackRecord",
            Node::SubroutineArgument(_) => "SubroutineArgument",
            Node::RelationSize { .. } => "RelationSize",
            Node::True => "True",
            Node::False => "False",
            Node::Conjunction { .. } => "Conjunction",
            Node::Negation { .. } => "Negation",
            Node::Constraint { .. } => "Constraint",
            Node::EmptinessCheck { .. } => "EmptinessCheck",
            Node::ExistenceCheck { .. } => "ExistenceCheck",
            Node::ProvenanceExistenceCheck { .. } => "ProvenanceExistenceCheck",
            Node::Scan { .. } => "Scan",
            Node::ParallelScan { .. } => "ParallelScan",
            Node::IndexScan { .. } => "IndexScan",
            Node::ParallelIndexScan { .. } => "ParallelIndexScan",
            Node::IfExists { .. } => "IfExists",
            Node::IndexIfExists { .. } => "IndexIfExists",
            Node::Aggregate { .. } => "Aggregate",
            Node::IndexAggregate { .. } => "IndexAggregate",
            Node::UnpackRecord { .. } => "UnpackRecord",
            Node::NestedIntrinsicOperator { .. } => "NestedIntrinsicOperator",
            Node::Filter { .. } => "Filter",
            Node::Break { .. } => "Break",
            Node::Insert { .. } => "Insert",
            Node::GuardedInsert { .. } => "GuardedInsert",
            Node::SubroutineReturn { .. } => "SubroutineReturn",
            Node::Sequence { .. } => "Sequence",
            Node::Parallel { .. } => "Parallel",
            Node::Loop { .. } => "Loop",
            Node::Exit { .. } => "Exit",
            Node::Query { .. } => "Query",
            Node::Clear { .. } => "Clear",
            Node::Swap { .. } => "Swap",
            Node::Extend { .. } => "Extend",
            Node::Io { .. } => "Io",
            Node::LogSize { .. } => "LogSize",
            Node::LogTimer { .. } => "LogTimer",
            Node::DebugInfo { .. } => "DebugInfo",
            Node::Call(_) => "Call",
        }
    }
}

/// The compiled program the generator hands to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledProgram {
    /// Relation slots in id order, with their index orders
    pub relations: Vec<crate::interp::relation::RelationSpec>,
    /// The main program
    pub main: Node,
    /// Subroutines, invoked by `Call` index
    pub subroutines: Vec<(String, Node)>,
}
