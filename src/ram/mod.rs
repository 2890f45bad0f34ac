//! # Relational-Algebra Intermediate Form
//!
//! The typed tree the AST lowers into and the interpreter generator
//! consumes. Three disjoint hierarchies plus the outer statement layer:
//!
//! - [`Expression`] produces a value
//! - [`Condition`] produces a boolean
//! - [`Operation`] is side-effecting and forms the loop nest of a query
//! - [`Statement`] is the program skeleton (sequences, loops, queries)
//!
//! Nodes are plain data: structural equality via `PartialEq`, deep
//! clones via `Clone`, child iteration and child mapping per hierarchy.

use crate::ast::{AggregateOp, ConstraintOp, DirectiveKind, IntrinsicOp, RelationRepresentation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub mod index_analysis;

/// A machine-word-sized runtime value. Signed, unsigned and float
/// interpretations share the representation; symbol and record values
/// are table indices.
pub type RamDomain = i64;

/// Reinterpret a RamDomain as a float
pub fn ram_to_float(value: RamDomain) -> f64 {
    f64::from_bits(value as u64)
}

/// Reinterpret a float as a RamDomain
pub fn float_to_ram(value: f64) -> RamDomain {
    value.to_bits() as RamDomain
}

/// Reinterpret a RamDomain as unsigned
pub fn ram_to_unsigned(value: RamDomain) -> u64 {
    value as u64
}

/// Reinterpret unsigned as a RamDomain
pub fn unsigned_to_ram(value: u64) -> RamDomain {
    value as RamDomain
}

// ============================================================================
// Relations
// ============================================================================

/// Runtime interpretation of a relation attribute, derived from its
/// declared type name. Drives index-analysis special cases and
/// aggregate arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeAttribute {
    Signed,
    Unsigned,
    Float,
    Symbol,
    Record,
}

impl TypeAttribute {
    /// Map a declared attribute type name onto its runtime interpretation
    pub fn from_type_name(name: &str) -> TypeAttribute {
        match name {
            "number" | "signed" => TypeAttribute::Signed,
            "unsigned" => TypeAttribute::Unsigned,
            "float" => TypeAttribute::Float,
            "symbol" => TypeAttribute::Symbol,
            _ => TypeAttribute::Record,
        }
    }
}

/// A relation at the RAM level: resolved name, arity, storage
/// representation and per-attribute runtime types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamRelation {
    pub name: String,
    pub arity: usize,
    pub representation: RelationRepresentation,
    pub attribute_types: Vec<TypeAttribute>,
}

impl RamRelation {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        RamRelation {
            name: name.into(),
            arity,
            representation: RelationRepresentation::Btree,
            attribute_types: vec![TypeAttribute::Signed; arity],
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Value-producing RAM node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// A numeric constant (signed, unsigned or float bits)
    Number(RamDomain),
    /// A string constant, interned by the generator
    StringConstant(String),
    /// Element access `t<tupleId>[element]`
    TupleElement { tuple_id: usize, element: usize },
    /// The undefined value used for open range bounds
    Undef,
    /// Monotonic counter, one per engine
    AutoIncrement,
    /// Intrinsic operator application
    IntrinsicOperator { op: IntrinsicOp, args: Vec<Expression> },
    /// User-defined operator application
    UserDefinedOperator { name: String, args: Vec<Expression> },
    /// Pack a record into the record table, yielding its id
    PackRecord(Vec<Expression>),
    /// Subroutine argument access
    SubroutineArgument(usize),
    /// Current size of a relation
    RelationSize(String),
}

impl Expression {
    /// Direct child expressions, in order
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::IntrinsicOperator { args, .. }
            | Expression::UserDefinedOperator { args, .. }
            | Expression::PackRecord(args) => args.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Rebuild with every direct child replaced by `f(child)`
    pub fn map_children<F: FnMut(Expression) -> Expression>(self, mut f: F) -> Expression {
        match self {
            Expression::IntrinsicOperator { op, args } => Expression::IntrinsicOperator {
                op,
                args: args.into_iter().map(&mut f).collect(),
            },
            Expression::UserDefinedOperator { name, args } => Expression::UserDefinedOperator {
                name,
                args: args.into_iter().map(&mut f).collect(),
            },
            Expression::PackRecord(args) => {
                Expression::PackRecord(args.into_iter().map(&mut f).collect())
            }
            other => other,
        }
    }

    /// Whether this expression is the undefined value
    pub fn is_undef(&self) -> bool {
        matches!(self, Expression::Undef)
    }

    /// Constant-fold check: numbers only
    pub fn as_constant(&self) -> Option<RamDomain> {
        match self {
            Expression::Number(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Number(v) => write!(f, "{v}"),
            Expression::StringConstant(s) => write!(f, "\"{s}\""),
            Expression::TupleElement { tuple_id, element } => write!(f, "t{tuple_id}[{element}]"),
            Expression::Undef => write!(f, "⊥"),
            Expression::AutoIncrement => write!(f, "autoinc()"),
            Expression::IntrinsicOperator { op, args } => {
                write!(f, "{}({})", op.as_str(), join(args))
            }
            Expression::UserDefinedOperator { name, args } => {
                write!(f, "@{name}({})", join(args))
            }
            Expression::PackRecord(args) => write!(f, "[{}]", join(args)),
            Expression::SubroutineArgument(i) => write!(f, "arg({i})"),
            Expression::RelationSize(rel) => write!(f, "size({rel})"),
        }
    }
}

fn join(args: &[Expression]) -> String {
    args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

// ============================================================================
// Conditions
// ============================================================================

/// Boolean-producing RAM node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    True,
    False,
    Conjunction(Box<Condition>, Box<Condition>),
    Negation(Box<Condition>),
    Constraint {
        op: ConstraintOp,
        lhs: Expression,
        rhs: Expression,
    },
    /// Whether the relation holds no tuples
    EmptinessCheck { relation: String },
    /// Whether a tuple matching the pattern exists; `Undef` entries are
    /// wildcards
    ExistenceCheck {
        relation: String,
        pattern: Vec<Expression>,
    },
    /// Existence check against the data columns only, ignoring the
    /// rule- and level-number payload of provenance relations
    ProvenanceExistenceCheck {
        relation: String,
        pattern: Vec<Expression>,
    },
}

impl Condition {
    /// Conjoin a list of conditions into a right-leaning tree; `True`
    /// when the list is empty.
    pub fn conjoin(conditions: Vec<Condition>) -> Condition {
        let mut iter = conditions.into_iter().rev();
        let mut acc = match iter.next() {
            Some(cond) => cond,
            None => return Condition::True,
        };
        for cond in iter {
            acc = Condition::Conjunction(Box::new(cond), Box::new(acc));
        }
        acc
    }

    /// Flatten nested conjunctions into a term list
    pub fn conjunction_terms(&self) -> Vec<&Condition> {
        match self {
            Condition::Conjunction(lhs, rhs) => {
                let mut terms = lhs.conjunction_terms();
                terms.extend(rhs.conjunction_terms());
                terms
            }
            other => vec![other],
        }
    }

    /// Direct child conditions
    pub fn children(&self) -> Vec<&Condition> {
        match self {
            Condition::Conjunction(lhs, rhs) => vec![lhs, rhs],
            Condition::Negation(inner) => vec![inner],
            _ => Vec::new(),
        }
    }

    /// Expressions referenced directly by this condition
    pub fn expressions(&self) -> Vec<&Expression> {
        match self {
            Condition::Constraint { lhs, rhs, .. } => vec![lhs, rhs],
            Condition::ExistenceCheck { pattern, .. }
            | Condition::ProvenanceExistenceCheck { pattern, .. } => pattern.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Rebuild with every direct child condition replaced by `f(child)`
    pub fn map_children<F: FnMut(Condition) -> Condition>(self, mut f: F) -> Condition {
        match self {
            Condition::Conjunction(lhs, rhs) => {
                Condition::Conjunction(Box::new(f(*lhs)), Box::new(f(*rhs)))
            }
            Condition::Negation(inner) => Condition::Negation(Box::new(f(*inner))),
            other => other,
        }
    }

    /// Whether this condition (or any sub-condition) consults a view,
    /// i.e. contains an existence check.
    pub fn uses_view(&self) -> bool {
        match self {
            Condition::ExistenceCheck { .. } | Condition::ProvenanceExistenceCheck { .. } => true,
            Condition::Conjunction(lhs, rhs) => lhs.uses_view() || rhs.uses_view(),
            Condition::Negation(inner) => inner.uses_view(),
            _ => false,
        }
    }
}

// ============================================================================
// Operations
// ============================================================================

/// The pattern of an indexed operation: per-attribute lower and upper
/// bounds, `Undef` meaning unbounded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangePattern {
    pub lower: Vec<Expression>,
    pub upper: Vec<Expression>,
}

impl RangePattern {
    /// A fully open pattern of the given arity
    pub fn open(arity: usize) -> Self {
        RangePattern {
            lower: vec![Expression::Undef; arity],
            upper: vec![Expression::Undef; arity],
        }
    }
}

/// Side-effecting RAM node forming the loop nest of a query.
///
/// Operations that introduce a tuple carry a `tuple_id`, unique within
/// the enclosing query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Iterate all tuples of a relation
    Scan {
        relation: String,
        tuple_id: usize,
        body: Box<Operation>,
    },
    /// Scan with the iteration domain partitioned across workers
    ParallelScan {
        relation: String,
        tuple_id: usize,
        body: Box<Operation>,
    },
    /// Iterate the tuples matching a range pattern over an index
    IndexScan {
        relation: String,
        tuple_id: usize,
        pattern: RangePattern,
        body: Box<Operation>,
    },
    ParallelIndexScan {
        relation: String,
        tuple_id: usize,
        pattern: RangePattern,
        body: Box<Operation>,
    },
    /// Run the body for the first tuple satisfying the condition
    IfExists {
        relation: String,
        tuple_id: usize,
        condition: Condition,
        body: Box<Operation>,
    },
    IndexIfExists {
        relation: String,
        tuple_id: usize,
        pattern: RangePattern,
        condition: Condition,
        body: Box<Operation>,
    },
    /// Fold all tuples satisfying the condition into one value, bind it
    /// to `(tuple_id, 0)` and run the body once
    Aggregate {
        relation: String,
        tuple_id: usize,
        function: AggregateOp,
        expression: Expression,
        condition: Condition,
        body: Box<Operation>,
    },
    IndexAggregate {
        relation: String,
        tuple_id: usize,
        function: AggregateOp,
        expression: Expression,
        pattern: RangePattern,
        condition: Condition,
        body: Box<Operation>,
    },
    /// Look up a record by id and bind its fields
    UnpackRecord {
        expression: Expression,
        arity: usize,
        tuple_id: usize,
        body: Box<Operation>,
    },
    /// Lazily enumerate an intrinsic generator (range and friends)
    NestedIntrinsicOperator {
        op: IntrinsicOp,
        args: Vec<Expression>,
        tuple_id: usize,
        body: Box<Operation>,
    },
    /// Run the body only when the condition holds
    Filter {
        condition: Condition,
        body: Box<Operation>,
    },
    /// Abort the surrounding loop when the condition holds
    Break {
        condition: Condition,
        body: Box<Operation>,
    },
    /// Insert a tuple into a relation
    Insert {
        relation: String,
        values: Vec<Expression>,
    },
    /// Insert only when the guard condition holds
    GuardedInsert {
        relation: String,
        values: Vec<Expression>,
        condition: Condition,
    },
    /// Append values to the subroutine return buffer
    SubroutineReturn(Vec<Expression>),
}

impl Operation {
    /// The nested operation, if this node has one
    pub fn nested(&self) -> Option<&Operation> {
        match self {
            Operation::Scan { body, .. }
            | Operation::ParallelScan { body, .. }
            | Operation::IndexScan { body, .. }
            | Operation::ParallelIndexScan { body, .. }
            | Operation::IfExists { body, .. }
            | Operation::IndexIfExists { body, .. }
            | Operation::Aggregate { body, .. }
            | Operation::IndexAggregate { body, .. }
            | Operation::UnpackRecord { body, .. }
            | Operation::NestedIntrinsicOperator { body, .. }
            | Operation::Filter { body, .. }
            | Operation::Break { body, .. } => Some(body),
            _ => None,
        }
    }

    /// The tuple id bound by this operation, if any
    pub fn tuple_id(&self) -> Option<usize> {
        match self {
            Operation::Scan { tuple_id, .. }
            | Operation::ParallelScan { tuple_id, .. }
            | Operation::IndexScan { tuple_id, .. }
            | Operation::ParallelIndexScan { tuple_id, .. }
            | Operation::IfExists { tuple_id, .. }
            | Operation::IndexIfExists { tuple_id, .. }
            | Operation::Aggregate { tuple_id, .. }
            | Operation::IndexAggregate { tuple_id, .. }
            | Operation::UnpackRecord { tuple_id, .. }
            | Operation::NestedIntrinsicOperator { tuple_id, .. } => Some(*tuple_id),
            _ => None,
        }
    }

    /// Rebuild with the nested operation replaced by `f(nested)`
    pub fn map_nested<F: FnOnce(Operation) -> Operation>(self, f: F) -> Operation {
        macro_rules! remap {
            ($variant:ident { $($field:ident),* ; body: $body:expr }) => {
                Operation::$variant { $($field),*, body: Box::new(f(*$body)) }
            };
        }
        match self {
            Operation::Scan { relation, tuple_id, body } => {
                remap!(Scan { relation, tuple_id ; body: body })
            }
            Operation::ParallelScan { relation, tuple_id, body } => {
                remap!(ParallelScan { relation, tuple_id ; body: body })
            }
            Operation::IndexScan { relation, tuple_id, pattern, body } => {
                remap!(IndexScan { relation, tuple_id, pattern ; body: body })
            }
            Operation::ParallelIndexScan { relation, tuple_id, pattern, body } => {
                remap!(ParallelIndexScan { relation, tuple_id, pattern ; body: body })
            }
            Operation::IfExists { relation, tuple_id, condition, body } => {
                remap!(IfExists { relation, tuple_id, condition ; body: body })
            }
            Operation::IndexIfExists { relation, tuple_id, pattern, condition, body } => {
                remap!(IndexIfExists { relation, tuple_id, pattern, condition ; body: body })
            }
            Operation::Aggregate { relation, tuple_id, function, expression, condition, body } => {
                remap!(Aggregate { relation, tuple_id, function, expression, condition ; body: body })
            }
            Operation::IndexAggregate {
                relation,
                tuple_id,
                function,
                expression,
                pattern,
                condition,
                body,
            } => remap!(IndexAggregate {
                relation, tuple_id, function, expression, pattern, condition ; body: body
            }),
            Operation::UnpackRecord { expression, arity, tuple_id, body } => {
                remap!(UnpackRecord { expression, arity, tuple_id ; body: body })
            }
            Operation::NestedIntrinsicOperator { op, args, tuple_id, body } => {
                remap!(NestedIntrinsicOperator { op, args, tuple_id ; body: body })
            }
            Operation::Filter { condition, body } => {
                remap!(Filter { condition ; body: body })
            }
            Operation::Break { condition, body } => {
                remap!(Break { condition ; body: body })
            }
            leaf => leaf,
        }
    }

    /// Visit this operation and every nested one, outside-in
    pub fn visit<F: FnMut(&Operation)>(&self, f: &mut F) {
        f(self);
        if let Some(body) = self.nested() {
            body.visit(f);
        }
    }

    /// Visit every condition hanging off this operation nest
    pub fn visit_conditions<F: FnMut(&Condition)>(&self, f: &mut F) {
        match self {
            Operation::IfExists { condition, .. }
            | Operation::IndexIfExists { condition, .. }
            | Operation::Aggregate { condition, .. }
            | Operation::IndexAggregate { condition, .. }
            | Operation::Filter { condition, .. }
            | Operation::Break { condition, .. }
            | Operation::GuardedInsert { condition, .. } => f(condition),
            _ => {}
        }
        if let Some(body) = self.nested() {
            body.visit_conditions(f);
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

/// The outer program skeleton
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    /// Execute children in order
    Sequence(Vec<Statement>),
    /// Execute children concurrently; may degrade to sequential
    Parallel(Vec<Statement>),
    /// Repeat the body until a nested `Exit` fires
    Loop(Box<Statement>),
    /// Leave the surrounding loop when the condition holds
    Exit(Condition),
    /// Run one operation tree
    Query(Operation),
    /// Remove all tuples of a relation
    Clear(String),
    /// Exchange the contents of two relation handles
    Swap(String, String),
    /// Fold the source equivalence relation into the target
    Extend { target: String, source: String },
    /// Delegate an I/O directive to the host
    Io { kind: DirectiveKind, relation: String },
    /// Emit the size of a relation to the profile log
    LogSize { relation: String, message: String },
    /// Time the nested statement, logging under the message
    LogTimer { message: String, statement: Box<Statement> },
    /// Annotate the nested statement for diagnostics
    DebugInfo { message: String, statement: Box<Statement> },
    /// Invoke a subroutine by name
    Call(String),
}

impl Statement {
    /// Direct child statements, in execution order
    pub fn children(&self) -> Vec<&Statement> {
        match self {
            Statement::Sequence(stmts) | Statement::Parallel(stmts) => stmts.iter().collect(),
            Statement::Loop(body) => vec![body],
            Statement::LogTimer { statement, .. } | Statement::DebugInfo { statement, .. } => {
                vec![statement]
            }
            _ => Vec::new(),
        }
    }

    /// Visit this statement and all nested statements, outside-in
    pub fn visit<F: FnMut(&Statement)>(&self, f: &mut F) {
        f(self);
        for child in self.children() {
            child.visit(f);
        }
    }

    /// Rebuild with every direct child statement replaced by `f(child)`
    pub fn map_children<F: FnMut(Statement) -> Statement>(self, mut f: F) -> Statement {
        match self {
            Statement::Sequence(stmts) => {
                Statement::Sequence(stmts.into_iter().map(&mut f).collect())
            }
            Statement::Parallel(stmts) => {
                Statement::Parallel(stmts.into_iter().map(&mut f).collect())
            }
            Statement::Loop(body) => Statement::Loop(Box::new(f(*body))),
            Statement::LogTimer { message, statement } => Statement::LogTimer {
                message,
                statement: Box::new(f(*statement)),
            },
            Statement::DebugInfo { message, statement } => Statement::DebugInfo {
                message,
                statement: Box::new(f(*statement)),
            },
            other => other,
        }
    }
}

/// A complete RAM program: relation declarations, the main statement,
/// and named subroutines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RamProgram {
    pub relations: Vec<RamRelation>,
    pub main: Statement,
    pub subroutines: BTreeMap<String, Statement>,
}

impl RamProgram {
    pub fn relation(&self, name: &str) -> Option<&RamRelation> {
        self.relations.iter().find(|r| r.name == name)
    }
}
