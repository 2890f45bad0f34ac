//! # Interpreter Generator
//!
//! Compiles the relational form into the flattened node tree the engine
//! dispatches on. The generator resolves every relation to a slot id on
//! first encounter, assigns index positions from the index analysis,
//! opens a fresh view scope per query, and folds constants and tuple
//! accesses into super-instructions so the hot loop never re-derives
//! them.

use crate::config::EvaluationConfig;
use crate::interp::node::{CompiledProgram, Node, RelId, SuperInstruction, ViewRequest};
use crate::interp::relation::RelationSpec;
use crate::interp::symbols::SymbolTable;
use crate::ram::index_analysis::{signature_of_pattern, IndexAnalysis};
use crate::ram::{Condition, Expression, Operation, RamProgram, RangePattern, Statement};
use std::collections::{BTreeMap, HashMap};

/// Compiles a RAM program into an executable node tree
pub struct NodeGenerator<'a> {
    program: &'a RamProgram,
    index_analysis: &'a IndexAnalysis,
    symbols: &'a SymbolTable,
    config: &'a EvaluationConfig,
    /// limitsize caps per relation name
    limits: &'a BTreeMap<String, usize>,

    relation_ids: HashMap<String, RelId>,
    relation_specs: Vec<RelationSpec>,
    subroutine_ids: HashMap<String, usize>,

    // per-query view scope
    view_counter: usize,
    current_views: Vec<ViewRequest>,
}

impl<'a> NodeGenerator<'a> {
    pub fn new(
        program: &'a RamProgram,
        index_analysis: &'a IndexAnalysis,
        symbols: &'a SymbolTable,
        config: &'a EvaluationConfig,
        limits: &'a BTreeMap<String, usize>,
    ) -> Self {
        NodeGenerator {
            program,
            index_analysis,
            symbols,
            config,
            limits,
            relation_ids: HashMap::new(),
            relation_specs: Vec::new(),
            subroutine_ids: HashMap::new(),
            view_counter: 0,
            current_views: Vec::new(),
        }
    }

    /// Generate the full compiled program
    pub fn generate(mut self) -> CompiledProgram {
        let program = self.program;
        for (index, name) in program.subroutines.keys().enumerate() {
            self.subroutine_ids.insert(name.clone(), index);
        }
        let main = self.generate_statement(&program.main);
        let subroutines = program
            .subroutines
            .iter()
            .map(|(name, stmt)| (name.clone(), self.generate_statement(stmt)))
            .collect();
        CompiledProgram {
            relations: self.relation_specs,
            main,
            subroutines,
        }
    }

    /// Resolve a relation to its slot, creating the slot with the index
    /// orders from the index analysis on first encounter.
    fn encode_relation(&mut self, name: &str) -> RelId {
        if let Some(&id) = self.relation_ids.get(name) {
            return id;
        }
        let id = self.relation_specs.len();
        let ram_rel = self.program.relation(name);
        let arity = ram_rel.map(|r| r.arity).unwrap_or(0);
        let representation = ram_rel
            .map(|r| r.representation)
            .unwrap_or(crate::ast::RelationRepresentation::Btree);
        let orders = self
            .index_analysis
            .cluster(name)
            .map(|c| c.orders().to_vec())
            .unwrap_or_else(|| vec![(0..arity).collect()]);
        self.relation_specs.push(RelationSpec {
            name: name.to_string(),
            arity,
            representation,
            orders,
            limit: self.limits.get(name).copied(),
        });
        self.relation_ids.insert(name.to_string(), id);
        id
    }

    /// The index position serving a search signature on a relation
    fn encode_index_pos(&self, relation: &str, pattern: &RangePattern) -> usize {
        let types = self
            .program
            .relation(relation)
            .map(|r| r.attribute_types.clone())
            .unwrap_or_default();
        let signature =
            signature_of_pattern(pattern).discharge(&types, self.config.provenance);
        self.index_analysis
            .cluster(relation)
            .and_then(|c| c.index_of(&signature))
            .unwrap_or(0)
    }

    /// Register a view over (relation, index) in the current query scope
    fn encode_view(&mut self, relation: RelId, index: usize) -> usize {
        let view = self.view_counter;
        self.view_counter += 1;
        self.current_views.push(ViewRequest { relation, index, view });
        view
    }

    // ------------------------------------------------------------------
    // statements
    // ------------------------------------------------------------------

    fn generate_statement(&mut self, stmt: &Statement) -> Node {
        match stmt {
            Statement::Sequence(children) => Node::Sequence {
                children: children.iter().map(|s| self.generate_statement(s)).collect(),
            },
            Statement::Parallel(children) => Node::Parallel {
                children: children.iter().map(|s| self.generate_statement(s)).collect(),
            },
            Statement::Loop(body) => Node::Loop {
                body: Box::new(self.generate_statement(body)),
            },
            Statement::Exit(condition) => Node::Exit {
                condition: Box::new(self.generate_condition(condition)),
            },
            Statement::Query(op) => self.generate_query(op),
            Statement::Clear(relation) => Node::Clear {
                relation: self.encode_relation(relation),
            },
            Statement::Swap(lhs, rhs) => Node::Swap {
                lhs: self.encode_relation(lhs),
                rhs: self.encode_relation(rhs),
            },
            Statement::Extend { target, source } => Node::Extend {
                target: self.encode_relation(target),
                source: self.encode_relation(source),
            },
            Statement::Io { kind, relation } => Node::Io {
                kind: *kind,
                relation: self.encode_relation(relation),
            },
            Statement::LogSize { relation, message } => Node::LogSize {
                relation: self.encode_relation(relation),
                message: message.clone(),
            },
            Statement::LogTimer { message, statement } => Node::LogTimer {
                message: message.clone(),
                statement: Box::new(self.generate_statement(statement)),
            },
            Statement::DebugInfo { message, statement } => Node::DebugInfo {
                message: message.clone(),
                statement: Box::new(self.generate_statement(statement)),
            },
            Statement::Call(name) => {
                Node::Call(self.subroutine_ids.get(name).copied().unwrap_or(0))
            }
        }
    }

    /// A query opens a fresh view scope. Conditions of the outermost
    /// filter that touch no view are split off so the parallel executor
    /// can evaluate them before any per-worker view is built.
    fn generate_query(&mut self, op: &Operation) -> Node {
        self.view_counter = 0;
        self.current_views = Vec::new();

        let (view_free, inner) = split_view_free(op);
        let view_free_condition = if view_free.is_empty() {
            None
        } else {
            Some(Box::new(self.generate_condition(&Condition::conjoin(view_free))))
        };
        let body = self.generate_operation(inner);

        Node::Query {
            views: std::mem::take(&mut self.current_views),
            view_free_condition,
            body: Box::new(body),
        }
    }

    // ------------------------------------------------------------------
    // operations
    // ------------------------------------------------------------------

    fn generate_operation(&mut self, op: &Operation) -> Node {
        match op {
            Operation::Scan { relation, tuple_id, body } => Node::Scan {
                relation: self.encode_relation(relation),
                tuple_id: *tuple_id,
                body: Box::new(self.generate_operation(body)),
            },
            Operation::ParallelScan { relation, tuple_id, body } => Node::ParallelScan {
                relation: self.encode_relation(relation),
                tuple_id: *tuple_id,
                body: Box::new(self.generate_operation(body)),
            },
            Operation::IndexScan { relation, tuple_id, pattern, body } => {
                let rel = self.encode_relation(relation);
                let index = self.encode_index_pos(relation, pattern);
                let view = self.encode_view(rel, index);
                Node::IndexScan {
                    relation: rel,
                    tuple_id: *tuple_id,
                    view,
                    super_inst: self.super_instruction_from_pattern(pattern),
                    body: Box::new(self.generate_operation(body)),
                }
            }
            Operation::ParallelIndexScan { relation, tuple_id, pattern, body } => {
                let rel = self.encode_relation(relation);
                let index = self.encode_index_pos(relation, pattern);
                Node::ParallelIndexScan {
                    relation: rel,
                    tuple_id: *tuple_id,
                    index,
                    super_inst: self.super_instruction_from_pattern(pattern),
                    body: Box::new(self.generate_operation(body)),
                }
            }
            Operation::IfExists { relation, tuple_id, condition, body } => Node::IfExists {
                relation: self.encode_relation(relation),
                tuple_id: *tuple_id,
                condition: Box::new(self.generate_condition(condition)),
                body: Box::new(self.generate_operation(body)),
            },
            Operation::IndexIfExists { relation, tuple_id, pattern, condition, body } => {
                let rel = self.encode_relation(relation);
                let index = self.encode_index_pos(relation, pattern);
                let view = self.encode_view(rel, index);
                Node::IndexIfExists {
                    relation: rel,
                    tuple_id: *tuple_id,
                    view,
                    super_inst: self.super_instruction_from_pattern(pattern),
                    condition: Box::new(self.generate_condition(condition)),
                    body: Box::new(self.generate_operation(body)),
                }
            }
            Operation::Aggregate { relation, tuple_id, function, expression, condition, body } => {
                Node::Aggregate {
                    relation: self.encode_relation(relation),
                    tuple_id: *tuple_id,
                    function: *function,
                    expression: self.generate_aggregate_target(expression),
                    condition: Box::new(self.generate_condition(condition)),
                    body: Box::new(self.generate_operation(body)),
                }
            }
            Operation::IndexAggregate {
                relation,
                tuple_id,
                function,
                expression,
                pattern,
                condition,
                body,
            } => {
                let rel = self.encode_relation(relation);
                let index = self.encode_index_pos(relation, pattern);
                let view = self.encode_view(rel, index);
                Node::IndexAggregate {
                    relation: rel,
                    tuple_id: *tuple_id,
                    function: *function,
                    expression: self.generate_aggregate_target(expression),
                    view,
                    super_inst: self.super_instruction_from_pattern(pattern),
                    condition: Box::new(self.generate_condition(condition)),
                    body: Box::new(self.generate_operation(body)),
                }
            }
            Operation::UnpackRecord { expression, arity, tuple_id, body } => Node::UnpackRecord {
                expression: Box::new(self.generate_expression(expression)),
                arity: *arity,
                tuple_id: *tuple_id,
                body: Box::new(self.generate_operation(body)),
            },
            Operation::NestedIntrinsicOperator { op, args, tuple_id, body } => {
                Node::NestedIntrinsicOperator {
                    op: *op,
                    args: args.iter().map(|a| self.generate_expression(a)).collect(),
                    tuple_id: *tuple_id,
                    body: Box::new(self.generate_operation(body)),
                }
            }
            Operation::Filter { condition, body } => Node::Filter {
                condition: Box::new(self.generate_condition(condition)),
                body: Box::new(self.generate_operation(body)),
            },
            Operation::Break { condition, body } => Node::Break {
                condition: Box::new(self.generate_condition(condition)),
                body: Box::new(self.generate_operation(body)),
            },
            Operation::Insert { relation, values } => Node::Insert {
                relation: self.encode_relation(relation),
                super_inst: self.super_instruction_from_values(values),
            },
            Operation::GuardedInsert { relation, values, condition } => Node::GuardedInsert {
                relation: self.encode_relation(relation),
                super_inst: self.super_instruction_from_values(values),
                condition: Box::new(self.generate_condition(condition)),
            },
            Operation::SubroutineReturn(values) => Node::SubroutineReturn {
                args: values.iter().map(|v| self.generate_expression(v)).collect(),
            },
        }
    }

    fn generate_aggregate_target(&mut self, target: &Expression) -> Option<Box<Node>> {
        if target.is_undef() {
            None
        } else {
            Some(Box::new(self.generate_expression(target)))
        }
    }

    // ------------------------------------------------------------------
    // conditions
    // ------------------------------------------------------------------

    fn generate_condition(&mut self, cond: &Condition) -> Node {
        match cond {
            Condition::True => Node::True,
            Condition::False => Node::False,
            Condition::Conjunction(lhs, rhs) => Node::Conjunction {
                lhs: Box::new(self.generate_condition(lhs)),
                rhs: Box::new(self.generate_condition(rhs)),
            },
            Condition::Negation(inner) => Node::Negation {
                child: Box::new(self.generate_condition(inner)),
            },
            Condition::Constraint { op, lhs, rhs } => Node::Constraint {
                op: *op,
                lhs: Box::new(self.generate_expression(lhs)),
                rhs: Box::new(self.generate_expression(rhs)),
            },
            Condition::EmptinessCheck { relation } => Node::EmptinessCheck {
                relation: self.encode_relation(relation),
            },
            Condition::ExistenceCheck { relation, pattern } => {
                let rel = self.encode_relation(relation);
                let as_pattern = RangePattern {
                    lower: pattern.clone(),
                    upper: pattern.clone(),
                };
                let index = self.encode_index_pos(relation, &as_pattern);
                let view = self.encode_view(rel, index);
                let is_total = pattern.iter().all(|e| !e.is_undef());
                Node::ExistenceCheck {
                    relation: rel,
                    view,
                    is_total,
                    super_inst: self.super_instruction_from_pattern(&as_pattern),
                }
            }
            Condition::ProvenanceExistenceCheck { relation, pattern } => {
                let rel = self.encode_relation(relation);
                // the rule and level columns are payload, not key
                let mut bounded = pattern.clone();
                let len = bounded.len();
                if len >= 2 {
                    bounded[len - 1] = Expression::Undef;
                    bounded[len - 2] = Expression::Undef;
                }
                let as_pattern = RangePattern {
                    lower: bounded.clone(),
                    upper: bounded,
                };
                let index = self.encode_index_pos(relation, &as_pattern);
                let view = self.encode_view(rel, index);
                Node::ProvenanceExistenceCheck {
                    relation: rel,
                    view,
                    super_inst: self.super_instruction_from_pattern(&as_pattern),
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    fn generate_expression(&mut self, expr: &Expression) -> Node {
        match expr {
            Expression::Number(value) => Node::NumberConstant(*value),
            Expression::StringConstant(text) => {
                Node::StringConstant(self.symbols.encode(text))
            }
            Expression::TupleElement { tuple_id, element } => Node::TupleElement {
                tuple_id: *tuple_id,
                element: *element,
            },
            Expression::Undef => Node::Undef,
            Expression::AutoIncrement => Node::AutoIncrement,
            Expression::IntrinsicOperator { op, args } => Node::IntrinsicOperator {
                op: *op,
                args: args.iter().map(|a| self.generate_expression(a)).collect(),
            },
            Expression::UserDefinedOperator { name, args } => Node::UserDefinedOperator {
                name: name.clone(),
                args: args.iter().map(|a| self.generate_expression(a)).collect(),
            },
            Expression::PackRecord(args) => Node::PackRecord {
                args: args.iter().map(|a| self.generate_expression(a)).collect(),
            },
            Expression::SubroutineArgument(index) => Node::SubroutineArgument(*index),
            Expression::RelationSize(relation) => Node::RelationSize {
                relation: self.encode_relation(relation),
            },
        }
    }

    // ------------------------------------------------------------------
    // super-instructions
    // ------------------------------------------------------------------

    fn super_instruction_from_pattern(&mut self, pattern: &RangePattern) -> SuperInstruction {
        let arity = pattern.lower.len();
        let mut inst = SuperInstruction::open(arity);
        for i in 0..arity {
            self.fill_bound(&pattern.lower[i], i, true, &mut inst);
            self.fill_bound(&pattern.upper[i], i, false, &mut inst);
        }
        inst
    }

    fn super_instruction_from_values(&mut self, values: &[Expression]) -> SuperInstruction {
        let mut inst = SuperInstruction::open(values.len());
        for (i, value) in values.iter().enumerate() {
            self.fill_bound(value, i, true, &mut inst);
        }
        inst
    }

    fn fill_bound(
        &mut self,
        expr: &Expression,
        position: usize,
        lower: bool,
        inst: &mut SuperInstruction,
    ) {
        match expr {
            Expression::Undef => {}
            Expression::Number(value) => {
                if lower {
                    inst.first[position] = *value;
                } else {
                    inst.second[position] = *value;
                }
            }
            Expression::StringConstant(text) => {
                let encoded = self.symbols.encode(text);
                if lower {
                    inst.first[position] = encoded;
                } else {
                    inst.second[position] = encoded;
                }
            }
            Expression::TupleElement { tuple_id, element } => {
                if lower {
                    inst.tuple_first.push((position, *tuple_id, *element));
                } else {
                    inst.tuple_second.push((position, *tuple_id, *element));
                }
            }
            other => {
                let node = self.generate_expression(other);
                if lower {
                    inst.expr_first.push((position, node));
                } else {
                    inst.expr_second.push((position, node));
                }
            }
        }
    }
}

/// Split the conjunction of a query's outermost filter into the
/// view-independent terms and the remaining operation.
fn split_view_free(op: &Operation) -> (Vec<Condition>, &Operation) {
    if let Operation::Filter { condition, body } = op {
        let terms = condition.conjunction_terms();
        let (free, dependent): (Vec<&Condition>, Vec<&Condition>) =
            terms.into_iter().partition(|c| !c.uses_view());
        if free.is_empty() {
            return (Vec::new(), op);
        }
        if dependent.is_empty() {
            // the entire filter moves out
            return (free.into_iter().cloned().collect(), &**body);
        }
        // the remaining terms stay as a filter; since we cannot rebuild
        // a borrowed operation in place, keep the filter intact when it
        // mixes both kinds
        return (Vec::new(), op);
    }
    (Vec::new(), op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ConstraintOp;
    use crate::ram::{RamRelation, Statement};

    fn compile(program: &RamProgram) -> CompiledProgram {
        let config = EvaluationConfig::default();
        let analysis = IndexAnalysis::run(program, false);
        let symbols = SymbolTable::new();
        let limits = BTreeMap::new();
        NodeGenerator::new(program, &analysis, &symbols, &config, &limits).generate()
    }

    fn scan_insert_program() -> RamProgram {
        // query: scan edge, insert into out
        let op = Operation::Scan {
            relation: "edge".to_string(),
            tuple_id: 0,
            body: Box::new(Operation::Insert {
                relation: "out".to_string(),
                values: vec![
                    Expression::TupleElement { tuple_id: 0, element: 0 },
                    Expression::Number(7),
                ],
            }),
        };
        RamProgram {
            relations: vec![RamRelation::new("edge", 2), RamRelation::new("out", 2)],
            main: Statement::Query(op),
            subroutines: BTreeMap::new(),
        }
    }

    #[test]
    fn test_relations_encoded_on_first_encounter() {
        let compiled = compile(&scan_insert_program());
        assert_eq!(compiled.relations.len(), 2);
        assert_eq!(compiled.relations[0].name, "edge");
        assert_eq!(compiled.relations[1].name, "out");
    }

    #[test]
    fn test_insert_super_instruction() {
        let compiled = compile(&scan_insert_program());
        let query = match &compiled.main {
            Node::Query { body, .. } => body,
            other => panic!("expected query, got {}", other.kind()),
        };
        let insert = match &**query {
            Node::Scan { body, .. } => body,
            other => panic!("expected scan, got {}", other.kind()),
        };
        match &**insert {
            Node::Insert { super_inst, .. } => {
                assert_eq!(super_inst.arity(), 2);
                assert_eq!(super_inst.first[1], 7);
                assert_eq!(super_inst.tuple_first, vec![(0, 0, 0)]);
            }
            other => panic!("expected insert, got {}", other.kind()),
        }
    }

    #[test]
    fn test_view_ids_restart_per_query() {
        let exist = |rel: &str| Condition::ExistenceCheck {
            relation: rel.to_string(),
            pattern: vec![Expression::Number(1), Expression::Number(2)],
        };
        let query = |rel: &str| {
            Statement::Query(Operation::Filter {
                condition: exist(rel),
                body: Box::new(Operation::Insert {
                    relation: "out".to_string(),
                    values: vec![Expression::Number(0), Expression::Number(0)],
                }),
            })
        };
        let program = RamProgram {
            relations: vec![RamRelation::new("edge", 2), RamRelation::new("out", 2)],
            main: Statement::Sequence(vec![query("edge"), query("edge")]),
            subroutines: BTreeMap::new(),
        };
        let compiled = compile(&program);
        let queries: Vec<&Node> = match &compiled.main {
            Node::Sequence { children } => children.iter().collect(),
            _ => panic!("expected sequence"),
        };
        for q in queries {
            match q {
                Node::Query { views, .. } => {
                    assert_eq!(views.len(), 1);
                    assert_eq!(views[0].view, 0);
                }
                other => panic!("expected query, got {}", other.kind()),
            }
        }
    }

    #[test]
    fn test_view_free_split() {
        // filter over a pure constraint: moves into the query prologue
        let program = RamProgram {
            relations: vec![RamRelation::new("out", 1)],
            main: Statement::Query(Operation::Filter {
                condition: Condition::Constraint {
                    op: ConstraintOp::Lt,
                    lhs: Expression::Number(1),
                    rhs: Expression::Number(2),
                },
                body: Box::new(Operation::Insert {
                    relation: "out".to_string(),
                    values: vec![Expression::Number(5)],
                }),
            }),
            subroutines: BTreeMap::new(),
        };
        let compiled = compile(&program);
        match &compiled.main {
            Node::Query { view_free_condition, body, .. } => {
                assert!(view_free_condition.is_some());
                assert!(matches!(&**body, Node::Insert { .. }));
            }
            _ => panic!("expected query"),
        }
    }

    #[test]
    fn test_string_constants_pre_interned() {
        let program = RamProgram {
            relations: vec![RamRelation::new("out", 1)],
            main: Statement::Query(Operation::Insert {
                relation: "out".to_string(),
                values: vec![Expression::StringConstant("hello".to_string())],
            }),
            subroutines: BTreeMap::new(),
        };
        let config = EvaluationConfig::default();
        let analysis = IndexAnalysis::run(&program, false);
        let symbols = SymbolTable::new();
        let limits = BTreeMap::new();
        let compiled =
            NodeGenerator::new(&program, &analysis, &symbols, &config, &limits).generate();
        assert_eq!(symbols.len(), 1);
        match &compiled.main {
            Node::Query { body, .. } => match &**body {
                Node::Insert { super_inst, .. } => {
                    assert_eq!(super_inst.first[0], 0);
                }
                _ => panic!("expected insert"),
            },
            _ => panic!("expected query"),
        }
    }
}
