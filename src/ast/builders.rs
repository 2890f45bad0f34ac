//! Builder Patterns for AST Construction
//!
//! Provides fluent APIs for constructing AST nodes, particularly useful for tests.
//!
//! ## Example
//!
//! ```rust
//! use stratalog::ast::builders::{AtomBuilder, ClauseBuilder};
//!
//! // Build an atom: path(x, y)
//! let atom = AtomBuilder::new("path").var("x").var("y").build();
//!
//! // Build a clause: path(x, z) :- path(x, y), edge(y, z).
//! let clause = ClauseBuilder::new("path")
//!     .head_vars(["x", "z"])
//!     .body_atom("path", ["x", "y"])
//!     .body_atom("edge", ["y", "z"])
//!     .build();
//! ```

use super::{
    Argument, Atom, Clause, ConstraintOp, Directive, DirectiveKind, Literal, Program, Relation,
};

/// Builder for constructing Atom instances
#[derive(Debug, Clone)]
pub struct AtomBuilder {
    name: String,
    args: Vec<Argument>,
}

impl AtomBuilder {
    /// Start building an atom for the given relation
    pub fn new(name: &str) -> Self {
        AtomBuilder { name: name.to_string(), args: Vec::new() }
    }

    /// Append a variable argument
    pub fn var(mut self, name: &str) -> Self {
        self.args.push(Argument::var(name));
        self
    }

    /// Append an integer constant argument
    pub fn num(mut self, value: i64) -> Self {
        self.args.push(Argument::int(value));
        self
    }

    /// Append an anonymous variable argument
    pub fn unnamed(mut self) -> Self {
        self.args.push(Argument::UnnamedVariable);
        self
    }

    /// Append an arbitrary argument
    pub fn arg(mut self, arg: Argument) -> Self {
        self.args.push(arg);
        self
    }

    /// Finish and return the atom
    pub fn build(self) -> Atom {
        Atom::new(self.name.as_str(), self.args)
    }
}

/// Builder for constructing Clause instances
#[derive(Debug, Clone)]
pub struct ClauseBuilder {
    head_name: String,
    head_args: Vec<Argument>,
    body: Vec<Literal>,
}

impl ClauseBuilder {
    /// Start building a clause with the given head relation
    pub fn new(head: &str) -> Self {
        ClauseBuilder {
            head_name: head.to_string(),
            head_args: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Set the head arguments to the given variables
    pub fn head_vars<'a>(mut self, vars: impl IntoIterator<Item = &'a str>) -> Self {
        self.head_args = vars.into_iter().map(Argument::var).collect();
        self
    }

    /// Append an arbitrary head argument
    pub fn head_arg(mut self, arg: Argument) -> Self {
        self.head_args.push(arg);
        self
    }

    /// Append a positive body atom over the given variables
    pub fn body_atom<'a>(mut self, name: &str, vars: impl IntoIterator<Item = &'a str>) -> Self {
        self.body.push(Literal::Atom(Atom::new(
            name,
            vars.into_iter().map(Argument::var).collect(),
        )));
        self
    }

    /// Append a negated body atom over the given variables
    pub fn body_negation<'a>(
        mut self,
        name: &str,
        vars: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        self.body.push(Literal::Negation(Atom::new(
            name,
            vars.into_iter().map(Argument::var).collect(),
        )));
        self
    }

    /// Append a binary constraint
    pub fn constraint(mut self, lhs: Argument, op: ConstraintOp, rhs: Argument) -> Self {
        self.body.push(Literal::BinaryConstraint { op, lhs, rhs });
        self
    }

    /// Append an arbitrary body literal
    pub fn literal(mut self, literal: Literal) -> Self {
        self.body.push(literal);
        self
    }

    /// Finish and return the clause
    pub fn build(self) -> Clause {
        Clause::new(Atom::new(self.head_name.as_str(), self.head_args), self.body)
    }
}

/// Builder for whole programs: declarations, clauses, facts, directives
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    program: Program,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        ProgramBuilder { program: Program::new() }
    }

    /// Declare a relation with number-typed attributes named `a0..aN`
    pub fn relation(mut self, name: &str, arity: usize) -> Self {
        let attributes = (0..arity)
            .map(|i| super::Attribute::new(&format!("a{i}"), "number"))
            .collect();
        self.program.add_relation(Relation::new(name, attributes));
        self
    }

    /// Declare an output relation
    pub fn output(mut self, name: &str) -> Self {
        self.program.directives.push(Directive::new(DirectiveKind::Output, name));
        self
    }

    /// Declare an input relation
    pub fn input(mut self, name: &str) -> Self {
        self.program.directives.push(Directive::new(DirectiveKind::Input, name));
        self
    }

    /// Add a fact with integer constants
    pub fn fact(mut self, name: &str, values: impl IntoIterator<Item = i64>) -> Self {
        self.program.add_clause(Clause::fact(Atom::new(
            name,
            values.into_iter().map(Argument::int).collect(),
        )));
        self
    }

    /// Add a clause
    pub fn clause(mut self, clause: Clause) -> Self {
        self.program.add_clause(clause);
        self
    }

    /// Finish and return the program
    pub fn build(self) -> Program {
        self.program
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atom_builder() {
        let atom = AtomBuilder::new("edge").var("x").num(3).unnamed().build();
        assert_eq!(atom.arity(), 3);
        assert_eq!(atom.name.to_string(), "edge");
    }

    #[test]
    fn test_clause_builder_recursive() {
        let clause = ClauseBuilder::new("path")
            .head_vars(["x", "z"])
            .body_atom("path", ["x", "y"])
            .body_atom("edge", ["y", "z"])
            .build();
        assert_eq!(clause.body_atoms().len(), 2);
        assert_eq!(clause.to_string(), "path(x, z) :- path(x, y), edge(y, z).");
    }

    #[test]
    fn test_program_builder() {
        let program = ProgramBuilder::new()
            .relation("edge", 2)
            .relation("path", 2)
            .output("path")
            .fact("edge", [1, 2])
            .build();
        assert_eq!(program.relations.len(), 2);
        assert_eq!(program.clauses.len(), 1);
        assert_eq!(program.directives.len(), 1);
    }
}
