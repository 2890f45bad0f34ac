//! # Datalog AST - Abstract Syntax Tree Types
//!
//! Abstract Syntax Tree types for Datalog programs as delivered by the
//! parser: relations, clauses, literals, arguments and I/O directives.
//! The rewrite pipeline mutates these trees; the dependency analyses
//! read them.
//!
//! ## Builders
//!
//! For programmatic construction of AST nodes, see the [`builders`] module
//! which provides fluent APIs like `AtomBuilder` and `ClauseBuilder`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;

pub mod builders;

// ============================================================================
// Identifiers and locations
// ============================================================================

/// A qualified relation or type name: an ordered sequence of name
/// segments such as `graph.edge`, compared lexicographically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QualifiedName {
    segments: Vec<String>,
}

impl QualifiedName {
    /// Create a name from a single segment or a dotted path
    pub fn new(name: &str) -> Self {
        QualifiedName {
            segments: name.split('.').map(str::to_string).collect(),
        }
    }

    /// Create a name from explicit segments
    pub fn from_segments(segments: Vec<String>) -> Self {
        QualifiedName { segments }
    }

    /// The individual name segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

impl From<&str> for QualifiedName {
    fn from(name: &str) -> Self {
        QualifiedName::new(name)
    }
}

/// Source location of an AST node, populated by the parser.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SrcLoc {
    pub line: u32,
    pub column: u32,
}

impl fmt::Display for SrcLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Binary constraint operators appearing in rule bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ConstraintOp {
    /// Check whether this is the equality operator
    pub fn is_equality(self) -> bool {
        matches!(self, ConstraintOp::Eq)
    }

    /// Check whether this is an order (inequality) operator
    pub fn is_inequality(self) -> bool {
        matches!(
            self,
            ConstraintOp::Lt | ConstraintOp::Le | ConstraintOp::Gt | ConstraintOp::Ge
        )
    }

    /// Get the string representation
    pub fn as_str(self) -> &'static str {
        match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Ne => "!=",
            ConstraintOp::Lt => "<",
            ConstraintOp::Le => "<=",
            ConstraintOp::Gt => ">",
            ConstraintOp::Ge => ">=",
        }
    }
}

/// Intrinsic functors usable inside arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntrinsicOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Min,
    Max,
    Cat,
    /// Multi-result: signed integer range `range(from, to)`
    Range,
    /// Multi-result: unsigned range
    URange,
    /// Multi-result: float range
    FRange,
}

impl IntrinsicOp {
    /// Functors that produce more than one result per evaluation.
    /// These act as generators and must not be folded by unification.
    pub fn is_multi_result(self) -> bool {
        matches!(self, IntrinsicOp::Range | IntrinsicOp::URange | IntrinsicOp::FRange)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IntrinsicOp::Add => "+",
            IntrinsicOp::Sub => "-",
            IntrinsicOp::Mul => "*",
            IntrinsicOp::Div => "/",
            IntrinsicOp::Mod => "%",
            IntrinsicOp::Neg => "neg",
            IntrinsicOp::Min => "min",
            IntrinsicOp::Max => "max",
            IntrinsicOp::Cat => "cat",
            IntrinsicOp::Range => "range",
            IntrinsicOp::URange => "urange",
            IntrinsicOp::FRange => "frange",
        }
    }
}

/// Aggregation operators, with unsigned and float variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOp {
    Min,
    Max,
    Sum,
    Count,
    Mean,
    UMin,
    UMax,
    USum,
    FMin,
    FMax,
    FSum,
    FMean,
}

impl AggregateOp {
    pub fn as_str(self) -> &'static str {
        match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Sum => "sum",
            AggregateOp::Count => "count",
            AggregateOp::Mean => "mean",
            AggregateOp::UMin => "umin",
            AggregateOp::UMax => "umax",
            AggregateOp::USum => "usum",
            AggregateOp::FMin => "fmin",
            AggregateOp::FMax => "fmax",
            AggregateOp::FSum => "fsum",
            AggregateOp::FMean => "fmean",
        }
    }

    /// Whether the aggregate folds a target expression (`count` does not)
    pub fn needs_target(self) -> bool {
        !matches!(self, AggregateOp::Count)
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// Numeric constant payloads. Floats are carried as bit patterns so the
/// AST stays `Eq` and `Hash`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericValue {
    Int(i64),
    Unsigned(u64),
    Float(u64),
}

impl NumericValue {
    pub fn float(value: f64) -> Self {
        NumericValue::Float(value.to_bits())
    }

    pub fn as_float(self) -> Option<f64> {
        match self {
            NumericValue::Float(bits) => Some(f64::from_bits(bits)),
            _ => None,
        }
    }
}

/// An argument of an atom, constraint or functor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Argument {
    /// A named variable
    Variable(String),
    /// The anonymous variable `_`
    UnnamedVariable,
    /// A numeric constant
    NumericConstant(NumericValue),
    /// A string constant
    StringConstant(String),
    /// The record nil constant
    NilConstant,
    /// A record constructor `[a, b, c]`
    RecordInit(Vec<Argument>),
    /// An ADT branch constructor `$Branch(a, b)`
    BranchInit { branch: String, args: Vec<Argument> },
    /// An intrinsic functor application
    IntrinsicFunctor { op: IntrinsicOp, args: Vec<Argument> },
    /// A user-defined functor application
    UserDefinedFunctor { name: String, args: Vec<Argument> },
    /// An aggregate over a sub-body
    Aggregator(Box<Aggregator>),
    /// A type cast `as(x, T)`
    TypeCast {
        value: Box<Argument>,
        type_name: QualifiedName,
    },
}

/// An aggregate term: operator, optional target expression, sub-body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregator {
    pub op: AggregateOp,
    pub target: Option<Argument>,
    pub body: Vec<Literal>,
}

impl Argument {
    /// Create a variable argument
    pub fn var(name: &str) -> Self {
        Argument::Variable(name.to_string())
    }

    /// Create an integer constant argument
    pub fn int(value: i64) -> Self {
        Argument::NumericConstant(NumericValue::Int(value))
    }

    /// Check if this argument is a named variable
    pub fn is_variable(&self) -> bool {
        matches!(self, Argument::Variable(_))
    }

    /// Get variable name if this is a named variable
    pub fn as_variable(&self) -> Option<&str> {
        if let Argument::Variable(name) = self {
            Some(name)
        } else {
            None
        }
    }

    /// Check whether this argument is a functor or type cast; those are
    /// the "complex" terms extracted out of atoms during alias resolution.
    pub fn is_complex(&self) -> bool {
        matches!(
            self,
            Argument::IntrinsicFunctor { .. }
                | Argument::UserDefinedFunctor { .. }
                | Argument::TypeCast { .. }
        )
    }

    /// Check whether this argument is a generator: an aggregator or a
    /// multi-result functor.
    pub fn is_generator(&self) -> bool {
        match self {
            Argument::Aggregator(_) => true,
            Argument::IntrinsicFunctor { op, .. } => op.is_multi_result(),
            _ => false,
        }
    }

    /// Visit this argument and all nested arguments, pre-order.
    /// Descends into aggregator targets and bodies.
    pub fn visit_args<F: FnMut(&Argument)>(&self, f: &mut F) {
        f(self);
        match self {
            Argument::RecordInit(args)
            | Argument::BranchInit { args, .. }
            | Argument::IntrinsicFunctor { args, .. }
            | Argument::UserDefinedFunctor { args, .. } => {
                for arg in args {
                    arg.visit_args(f);
                }
            }
            Argument::TypeCast { value, .. } => value.visit_args(f),
            Argument::Aggregator(agg) => {
                if let Some(target) = &agg.target {
                    target.visit_args(f);
                }
                for lit in &agg.body {
                    lit.visit_args(f);
                }
            }
            _ => {}
        }
    }

    /// Visit every atom nested in this argument (through aggregator bodies)
    pub fn visit_atoms<F: FnMut(&Atom)>(&self, f: &mut F) {
        match self {
            Argument::RecordInit(args)
            | Argument::BranchInit { args, .. }
            | Argument::IntrinsicFunctor { args, .. }
            | Argument::UserDefinedFunctor { args, .. } => {
                for arg in args {
                    arg.visit_atoms(f);
                }
            }
            Argument::TypeCast { value, .. } => value.visit_atoms(f),
            Argument::Aggregator(agg) => {
                if let Some(target) = &agg.target {
                    target.visit_atoms(f);
                }
                for lit in &agg.body {
                    lit.visit_atoms(f);
                }
            }
            _ => {}
        }
    }

    /// Get all named variables referenced by this argument
    pub fn variables(&self) -> HashSet<String> {
        let mut vars = HashSet::new();
        self.visit_args(&mut |arg| {
            if let Argument::Variable(name) = arg {
                vars.insert(name.clone());
            }
        });
        vars
    }

    /// Check whether `other` occurs structurally inside this argument
    pub fn occurs(&self, other: &Argument) -> bool {
        let mut found = false;
        self.visit_args(&mut |arg| {
            found = found || arg == other;
        });
        found
    }

    /// Rebuild this argument bottom-up, replacing each node with `f(node)`.
    /// The mapper counterpart of [`Argument::visit_args`].
    pub fn map<F: Fn(Argument) -> Argument + Copy>(self, f: F) -> Argument {
        let mapped = match self {
            Argument::RecordInit(args) => {
                Argument::RecordInit(args.into_iter().map(|a| a.map(f)).collect())
            }
            Argument::BranchInit { branch, args } => Argument::BranchInit {
                branch,
                args: args.into_iter().map(|a| a.map(f)).collect(),
            },
            Argument::IntrinsicFunctor { op, args } => Argument::IntrinsicFunctor {
                op,
                args: args.into_iter().map(|a| a.map(f)).collect(),
            },
            Argument::UserDefinedFunctor { name, args } => Argument::UserDefinedFunctor {
                name,
                args: args.into_iter().map(|a| a.map(f)).collect(),
            },
            Argument::TypeCast { value, type_name } => Argument::TypeCast {
                value: Box::new(value.map(f)),
                type_name,
            },
            Argument::Aggregator(agg) => {
                let Aggregator { op, target, body } = *agg;
                Argument::Aggregator(Box::new(Aggregator {
                    op,
                    target: target.map(|t| t.map(f)),
                    body: body.into_iter().map(|l| l.map_arguments(f)).collect(),
                }))
            }
            other => other,
        };
        f(mapped)
    }
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Argument::Variable(name) => write!(f, "{name}"),
            Argument::UnnamedVariable => write!(f, "_"),
            Argument::NumericConstant(NumericValue::Int(v)) => write!(f, "{v}"),
            Argument::NumericConstant(NumericValue::Unsigned(v)) => write!(f, "{v}u"),
            Argument::NumericConstant(NumericValue::Float(bits)) => {
                write!(f, "{}", f64::from_bits(*bits))
            }
            Argument::StringConstant(s) => write!(f, "\"{s}\""),
            Argument::NilConstant => write!(f, "nil"),
            Argument::RecordInit(args) => write!(f, "[{}]", join_args(args)),
            Argument::BranchInit { branch, args } => {
                write!(f, "${branch}({})", join_args(args))
            }
            Argument::IntrinsicFunctor { op, args } => {
                write!(f, "{}({})", op.as_str(), join_args(args))
            }
            Argument::UserDefinedFunctor { name, args } => {
                write!(f, "@{name}({})", join_args(args))
            }
            Argument::Aggregator(agg) => {
                write!(f, "{}", agg.op.as_str())?;
                if let Some(target) = &agg.target {
                    write!(f, " {target}")?;
                }
                write!(f, " : {{ ")?;
                for (i, lit) in agg.body.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{lit}")?;
                }
                write!(f, " }}")
            }
            Argument::TypeCast { value, type_name } => write!(f, "as({value}, {type_name})"),
        }
    }
}

fn join_args(args: &[Argument]) -> String {
    args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", ")
}

// ============================================================================
// Literals
// ============================================================================

/// An atom `p(t1, ..., tn)` referring to a relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub name: QualifiedName,
    pub args: Vec<Argument>,
}

impl Atom {
    /// Create a new atom
    pub fn new(name: impl Into<QualifiedName>, args: Vec<Argument>) -> Self {
        Atom { name: name.into(), args }
    }

    /// Create a nullary atom
    pub fn nullary(name: impl Into<QualifiedName>) -> Self {
        Atom { name: name.into(), args: Vec::new() }
    }

    /// Get the arity (number of arguments) of this atom
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Get all named variables in this atom, including nested ones
    pub fn variables(&self) -> HashSet<String> {
        let mut vars = HashSet::new();
        for arg in &self.args {
            vars.extend(arg.variables());
        }
        vars
    }

    /// Check whether every argument is the anonymous variable
    pub fn is_existential(&self) -> bool {
        self.args.iter().all(|arg| matches!(arg, Argument::UnnamedVariable))
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, join_args(&self.args))
    }
}

/// A body literal: positive atom, negated atom, binary constraint or
/// boolean constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Atom(Atom),
    Negation(Atom),
    BinaryConstraint {
        op: ConstraintOp,
        lhs: Argument,
        rhs: Argument,
    },
    BooleanConstraint(bool),
}

impl Literal {
    /// Get the underlying atom for positive and negated literals
    pub fn atom(&self) -> Option<&Atom> {
        match self {
            Literal::Atom(atom) | Literal::Negation(atom) => Some(atom),
            _ => None,
        }
    }

    /// Check if this is a positive atom
    pub fn is_positive_atom(&self) -> bool {
        matches!(self, Literal::Atom(_))
    }

    /// Visit all arguments of this literal, pre-order with nesting
    pub fn visit_args<F: FnMut(&Argument)>(&self, f: &mut F) {
        match self {
            Literal::Atom(atom) | Literal::Negation(atom) => {
                for arg in &atom.args {
                    arg.visit_args(f);
                }
            }
            Literal::BinaryConstraint { lhs, rhs, .. } => {
                lhs.visit_args(f);
                rhs.visit_args(f);
            }
            Literal::BooleanConstraint(_) => {}
        }
    }

    /// Visit all atoms in this literal, including atoms nested in
    /// aggregator bodies within arguments.
    pub fn visit_atoms<F: FnMut(&Atom)>(&self, f: &mut F) {
        match self {
            Literal::Atom(atom) | Literal::Negation(atom) => {
                f(atom);
                for arg in &atom.args {
                    arg.visit_atoms(f);
                }
            }
            Literal::BinaryConstraint { lhs, rhs, .. } => {
                lhs.visit_atoms(f);
                rhs.visit_atoms(f);
            }
            Literal::BooleanConstraint(_) => {}
        }
    }

    /// Get all named variables in this literal
    pub fn variables(&self) -> HashSet<String> {
        let mut vars = HashSet::new();
        self.visit_args(&mut |arg| {
            if let Argument::Variable(name) = arg {
                vars.insert(name.clone());
            }
        });
        vars
    }

    /// Rebuild the literal with every argument mapped bottom-up by `f`
    pub fn map_arguments<F: Fn(Argument) -> Argument + Copy>(self, f: F) -> Literal {
        match self {
            Literal::Atom(atom) => Literal::Atom(Atom {
                name: atom.name,
                args: atom.args.into_iter().map(|a| a.map(f)).collect(),
            }),
            Literal::Negation(atom) => Literal::Negation(Atom {
                name: atom.name,
                args: atom.args.into_iter().map(|a| a.map(f)).collect(),
            }),
            Literal::BinaryConstraint { op, lhs, rhs } => Literal::BinaryConstraint {
                op,
                lhs: lhs.map(f),
                rhs: rhs.map(f),
            },
            other => other,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Atom(atom) => write!(f, "{atom}"),
            Literal::Negation(atom) => write!(f, "!{atom}"),
            Literal::BinaryConstraint { op, lhs, rhs } => {
                write!(f, "{lhs} {} {rhs}", op.as_str())
            }
            Literal::BooleanConstraint(b) => write!(f, "{b}"),
        }
    }
}

// ============================================================================
// Clauses
// ============================================================================

/// A user-supplied execution plan: maps a version number to a 1-based
/// permutation of the body-atom positions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub orders: BTreeMap<usize, Vec<usize>>,
    pub loc: SrcLoc,
}

/// A single Datalog clause `head :- body.` (a fact when the body is empty)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub head: Atom,
    pub body: Vec<Literal>,
    pub plan: Option<ExecutionPlan>,
    pub loc: SrcLoc,
}

impl Clause {
    /// Create a new clause
    pub fn new(head: Atom, body: Vec<Literal>) -> Self {
        Clause {
            head,
            body,
            plan: None,
            loc: SrcLoc::default(),
        }
    }

    /// Create a fact (clause with empty body)
    pub fn fact(head: Atom) -> Self {
        Clause::new(head, Vec::new())
    }

    /// Check whether this clause is a fact
    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    /// Get all positive body atoms, in body order
    pub fn body_atoms(&self) -> Vec<&Atom> {
        self.body
            .iter()
            .filter_map(|lit| match lit {
                Literal::Atom(atom) => Some(atom),
                _ => None,
            })
            .collect()
    }

    /// Get all named variables of this clause (head and body)
    pub fn variables(&self) -> HashSet<String> {
        let mut vars = self.head.variables();
        for lit in &self.body {
            vars.extend(lit.variables());
        }
        vars
    }

    /// Visit every atom in this clause: the head, atoms nested in head
    /// arguments, and all body atoms including nested ones.
    pub fn visit_atoms<F: FnMut(&Atom)>(&self, f: &mut F) {
        f(&self.head);
        for arg in &self.head.args {
            arg.visit_atoms(f);
        }
        for lit in &self.body {
            lit.visit_atoms(f);
        }
    }

    /// Clone the head into a fresh bodyless clause, keeping plan and location
    pub fn clone_head(&self) -> Clause {
        Clause {
            head: self.head.clone(),
            body: Vec::new(),
            plan: self.plan.clone(),
            loc: self.loc,
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.head)?;
        if !self.body.is_empty() {
            write!(f, " :- ")?;
            for (i, lit) in self.body.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{lit}")?;
            }
        }
        write!(f, ".")
    }
}

// ============================================================================
// Relations, directives, declarations
// ============================================================================

/// Storage representation of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RelationRepresentation {
    #[default]
    Btree,
    Brie,
    EqRel,
    Info,
    Inline,
}

/// A named, typed attribute of a relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub type_name: QualifiedName,
}

impl Attribute {
    pub fn new(name: &str, type_name: &str) -> Self {
        Attribute {
            name: name.to_string(),
            type_name: QualifiedName::new(type_name),
        }
    }
}

/// A functional dependency declared on a relation: the key attributes
/// determine the remaining ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionalDependency {
    pub keys: Vec<String>,
}

/// A relation declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub name: QualifiedName,
    pub attributes: Vec<Attribute>,
    pub representation: RelationRepresentation,
    pub dependencies: Vec<FunctionalDependency>,
    pub loc: SrcLoc,
}

impl Relation {
    /// Create a relation with default representation
    pub fn new(name: impl Into<QualifiedName>, attributes: Vec<Attribute>) -> Self {
        Relation {
            name: name.into(),
            attributes,
            representation: RelationRepresentation::default(),
            dependencies: Vec::new(),
            loc: SrcLoc::default(),
        }
    }

    /// Create a nullary relation
    pub fn nullary(name: impl Into<QualifiedName>) -> Self {
        Relation::new(name, Vec::new())
    }

    /// Get the arity of this relation
    pub fn arity(&self) -> usize {
        self.attributes.len()
    }
}

/// Kind of an I/O directive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectiveKind {
    Input,
    Output,
    PrintSize,
    LimitSize,
}

/// An I/O declaration attached to a relation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub relation: QualifiedName,
    /// Only meaningful for `LimitSize`
    pub limit: Option<usize>,
    pub loc: SrcLoc,
}

impl Directive {
    pub fn new(kind: DirectiveKind, relation: impl Into<QualifiedName>) -> Self {
        Directive {
            kind,
            relation: relation.into(),
            limit: None,
            loc: SrcLoc::default(),
        }
    }
}

/// A user-defined functor declaration: a name resolving to a callable
/// of the declared signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctorDeclaration {
    pub name: String,
    pub param_types: Vec<QualifiedName>,
    pub return_type: QualifiedName,
    pub stateful: bool,
}

/// A type declaration (opaque to the middle-end beyond its name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDeclaration {
    pub name: QualifiedName,
    pub loc: SrcLoc,
}

// ============================================================================
// Programs
// ============================================================================

/// A complete Datalog program as handed over by the parser
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    pub relations: Vec<Relation>,
    pub clauses: Vec<Clause>,
    pub directives: Vec<Directive>,
    pub types: Vec<TypeDeclaration>,
    pub functors: Vec<FunctorDeclaration>,
}

impl Program {
    /// Create a new empty program
    pub fn new() -> Self {
        Program::default()
    }

    /// Look up a relation by name
    pub fn relation(&self, name: &QualifiedName) -> Option<&Relation> {
        self.relations.iter().find(|r| &r.name == name)
    }

    /// Add a relation declaration
    pub fn add_relation(&mut self, relation: Relation) {
        self.relations.push(relation);
    }

    /// Add a clause
    pub fn add_clause(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    /// Remove all clauses structurally equal to the given one
    pub fn remove_clause(&mut self, clause: &Clause) {
        self.clauses.retain(|c| c != clause);
    }

    /// Remove a relation declaration, its clauses and its directives
    pub fn remove_relation(&mut self, name: &QualifiedName) {
        self.relations.retain(|r| &r.name != name);
        self.clauses.retain(|c| &c.head.name != name);
        self.directives.retain(|d| &d.relation != name);
    }

    /// All clauses whose head is the given relation, in program order
    pub fn clauses_for(&self, name: &QualifiedName) -> Vec<&Clause> {
        self.clauses.iter().filter(|c| &c.head.name == name).collect()
    }

    /// Visit every atom in the program (heads, bodies, nested)
    pub fn visit_atoms<F: FnMut(&Atom)>(&self, f: &mut F) {
        for clause in &self.clauses {
            clause.visit_atoms(f);
        }
    }

    /// Rename every atom occurrence per the given mapping. Clause heads
    /// of renamed relations are rewritten too; callers remove the old
    /// definitions themselves when that is not wanted.
    pub fn rename_atoms(&mut self, mapping: &BTreeMap<QualifiedName, QualifiedName>) {
        fn rename_in_argument(
            arg: &mut Argument,
            mapping: &BTreeMap<QualifiedName, QualifiedName>,
        ) {
            match arg {
                Argument::RecordInit(args)
                | Argument::BranchInit { args, .. }
                | Argument::IntrinsicFunctor { args, .. }
                | Argument::UserDefinedFunctor { args, .. } => {
                    for a in args {
                        rename_in_argument(a, mapping);
                    }
                }
                Argument::TypeCast { value, .. } => rename_in_argument(value, mapping),
                Argument::Aggregator(agg) => {
                    if let Some(target) = &mut agg.target {
                        rename_in_argument(target, mapping);
                    }
                    for lit in &mut agg.body {
                        rename_in_literal(lit, mapping);
                    }
                }
                _ => {}
            }
        }
        fn rename_in_literal(lit: &mut Literal, mapping: &BTreeMap<QualifiedName, QualifiedName>) {
            match lit {
                Literal::Atom(atom) | Literal::Negation(atom) => {
                    if let Some(new_name) = mapping.get(&atom.name) {
                        atom.name = new_name.clone();
                    }
                    for arg in &mut atom.args {
                        rename_in_argument(arg, mapping);
                    }
                }
                Literal::BinaryConstraint { lhs, rhs, .. } => {
                    rename_in_argument(lhs, mapping);
                    rename_in_argument(rhs, mapping);
                }
                Literal::BooleanConstraint(_) => {}
            }
        }
        for clause in &mut self.clauses {
            if let Some(new_name) = mapping.get(&clause.head.name) {
                clause.head.name = new_name.clone();
            }
            for arg in &mut clause.head.args {
                rename_in_argument(arg, mapping);
            }
            for lit in &mut clause.body {
                rename_in_literal(lit, mapping);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_name_ordering() {
        let a = QualifiedName::new("a.b");
        let b = QualifiedName::new("a.c");
        assert!(a < b);
        assert_eq!(a.to_string(), "a.b");
    }

    #[test]
    fn test_atom_variables_nested() {
        let atom = Atom::new(
            "p",
            vec![
                Argument::var("x"),
                Argument::RecordInit(vec![Argument::var("y"), Argument::int(1)]),
            ],
        );
        let vars = atom.variables();
        assert!(vars.contains("x"));
        assert!(vars.contains("y"));
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn test_clause_clone_is_deep_and_equal() {
        let clause = Clause::new(
            Atom::new("r", vec![Argument::var("x")]),
            vec![Literal::Atom(Atom::new("s", vec![Argument::var("x")]))],
        );
        let copy = clause.clone();
        assert_eq!(clause, copy);
    }

    #[test]
    fn test_visit_atoms_sees_aggregator_bodies() {
        let agg = Argument::Aggregator(Box::new(Aggregator {
            op: AggregateOp::Count,
            target: None,
            body: vec![Literal::Atom(Atom::new("inner", vec![Argument::var("z")]))],
        }));
        let clause = Clause::new(Atom::new("r", vec![agg]), Vec::new());
        let mut names = Vec::new();
        clause.visit_atoms(&mut |atom| names.push(atom.name.to_string()));
        assert_eq!(names, vec!["r", "inner"]);
    }

    #[test]
    fn test_rename_atoms() {
        let mut program = Program::new();
        program.add_clause(Clause::new(
            Atom::new("a", vec![Argument::var("x")]),
            vec![Literal::Atom(Atom::new("b", vec![Argument::var("x")]))],
        ));
        let mut mapping = BTreeMap::new();
        mapping.insert(QualifiedName::new("b"), QualifiedName::new("c"));
        program.rename_atoms(&mapping);
        assert_eq!(
            program.clauses[0].body[0].atom().map(|a| a.name.to_string()),
            Some("c".to_string())
        );
    }

    #[test]
    fn test_argument_occurs() {
        let v = Argument::var("x");
        let rec = Argument::RecordInit(vec![Argument::var("x"), Argument::int(2)]);
        assert!(rec.occurs(&v));
        assert!(!rec.occurs(&Argument::var("y")));
    }

    #[test]
    fn test_display_clause() {
        let clause = Clause::new(
            Atom::new("r", vec![Argument::var("x"), Argument::var("y")]),
            vec![
                Literal::Atom(Atom::new("e", vec![Argument::var("x"), Argument::var("y")])),
                Literal::BinaryConstraint {
                    op: ConstraintOp::Ne,
                    lhs: Argument::var("x"),
                    rhs: Argument::var("y"),
                },
            ],
        );
        assert_eq!(clause.to_string(), "r(x, y) :- e(x, y), x != y.");
    }
}
