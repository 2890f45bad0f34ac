//! # Interpreter Engine
//!
//! Executes a compiled node tree against indexed in-memory relations.
//! The dispatch loop is a dense match on the node enum. Operations
//! return a continue flag: `false` is the break signal that unwinds the
//! current query and stops the surrounding loop statement.
//!
//! Parallel scans partition their iteration domain across a worker
//! pool; every worker clones the evaluation context (and with it the
//! views) before touching any tuple, so bindings and cursors stay
//! worker-local. Insertions into shared relations synchronize inside
//! the relation and become visible when the region joins.

use crate::ast::{AggregateOp, ConstraintOp, DirectiveKind, IntrinsicOp};
use crate::interp::context::Context;
use crate::interp::node::{CompiledProgram, Node, RelId, SuperInstruction, ViewRequest};
use crate::interp::relation::{swap_relations, Relation, Tuple, View};
use crate::interp::symbols::{RecordTable, SymbolTable};
use crate::ram::{float_to_ram, ram_to_float, ram_to_unsigned, unsigned_to_ram, RamDomain};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// A user-defined functor implementation. Returns `None` to signal an
/// evaluation error; the surrounding insertion is skipped.
pub type UserFunctor = Arc<dyn Fn(&[RamDomain]) -> Option<RamDomain> + Send + Sync>;

/// Handler invoked for I/O statements; the core delegates all reading
/// and writing to its host.
pub type IoHandler = Box<dyn Fn(DirectiveKind, &str, &Relation) + Send + Sync>;

/// The tree-walking executor
pub struct Engine {
    relations: Vec<RwLock<Arc<Relation>>>,
    symbols: Arc<SymbolTable>,
    records: RecordTable,
    subroutines: Vec<(String, Node)>,
    main: Node,

    pool: rayon::ThreadPool,
    num_workers: usize,

    profile_enabled: bool,
    counter: AtomicI64,
    iteration: AtomicUsize,
    frequencies: DashMap<String, u64>,
    reads: DashMap<String, u64>,
    profile_log: Mutex<Vec<String>>,

    functors: DashMap<String, UserFunctor>,
    io_handler: Option<IoHandler>,
}

impl Engine {
    /// Build an engine for a compiled program. `jobs` is the worker
    /// count for parallel regions; `profile` enables the frequency
    /// counters and the profile log.
    pub fn new(
        compiled: CompiledProgram,
        symbols: Arc<SymbolTable>,
        jobs: usize,
        profile: bool,
    ) -> Self {
        let relations = compiled
            .relations
            .into_iter()
            .map(|spec| RwLock::new(Arc::new(Relation::new(spec))))
            .collect();
        let num_workers = jobs.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers)
            .build()
            .unwrap_or_else(|_| {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(1)
                    .build()
                    .expect("single-threaded pool")
            });
        Engine {
            relations,
            symbols,
            records: RecordTable::new(),
            subroutines: compiled.subroutines,
            main: compiled.main,
            pool,
            num_workers,
            profile_enabled: profile,
            counter: AtomicI64::new(0),
            iteration: AtomicUsize::new(0),
            frequencies: DashMap::new(),
            reads: DashMap::new(),
            profile_log: Mutex::new(Vec::new()),
            functors: DashMap::new(),
            io_handler: None,
        }
    }

    /// Register a user-defined functor under its declared name
    pub fn register_functor(&self, name: &str, functor: UserFunctor) {
        self.functors.insert(name.to_string(), functor);
    }

    /// Install the host I/O handler
    pub fn set_io_handler(&mut self, handler: IoHandler) {
        self.io_handler = Some(handler);
    }

    /// The symbol table shared with the generator
    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbols
    }

    /// The record table
    pub fn record_table(&self) -> &RecordTable {
        &self.records
    }

    /// Look up a relation handle by name
    pub fn relation_by_name(&self, name: &str) -> Option<Arc<Relation>> {
        self.relations
            .iter()
            .map(|slot| Arc::clone(&slot.read()))
            .find(|rel| rel.name() == name)
    }

    /// The profile log lines collected so far, with the frequency and
    /// read counters rendered as line-oriented records.
    pub fn profile_log(&self) -> Vec<String> {
        let mut lines = self.profile_log.lock().clone();
        if self.profile_enabled {
            for entry in self.frequencies.iter() {
                lines.push(format!("@frequency-atom;{};{}", entry.key(), entry.value()));
            }
            for entry in self.reads.iter() {
                lines.push(format!("@relation-reads;{};{}", entry.key(), entry.value()));
            }
        }
        lines
    }

    /// Frequency counter snapshot
    pub fn frequencies(&self) -> Vec<(String, u64)> {
        self.frequencies
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Execute the main program
    pub fn execute_main(&self) {
        let main = self.main.clone();
        let mut ctx = Context::new();
        self.execute(&main, &mut ctx);
    }

    /// Execute a subroutine by name, returning its return buffer
    pub fn execute_subroutine(&self, name: &str, args: Vec<RamDomain>) -> Vec<RamDomain> {
        let node = self
            .subroutines
            .iter()
            .find(|(sub_name, _)| sub_name == name)
            .map(|(_, node)| node.clone());
        match node {
            Some(node) => {
                let mut ctx = Context::call_scope(args);
                self.execute(&node, &mut ctx);
                ctx.take_returns()
            }
            None => Vec::new(),
        }
    }

    fn relation(&self, id: RelId) -> Arc<Relation> {
        Arc::clone(&self.relations[id].read())
    }

    // ------------------------------------------------------------------
    // dispatch
    // ------------------------------------------------------------------

    /// Execute a statement or operation node. Returns false when a break
    /// signal (from `Break` or `Exit`) unwinds the surrounding region.
    fn execute(&self, node: &Node, ctx: &mut Context) -> bool {
        match node {
            // -- statements --
            Node::Sequence { children } => {
                for child in children {
                    if !self.execute(child, ctx) {
                        return false;
                    }
                }
                true
            }
            Node::Parallel { children } => {
                use rayon::prelude::*;
                let results: Vec<bool> = self.pool.install(|| {
                    children
                        .par_iter()
                        .map(|child| {
                            let mut local = Context::new();
                            self.execute(child, &mut local)
                        })
                        .collect()
                });
                results.into_iter().all(|r| r)
            }
            Node::Loop { body } => {
                self.iteration.store(0, Ordering::Relaxed);
                loop {
                    if !self.execute(body, ctx) {
                        break;
                    }
                    self.iteration.fetch_add(1, Ordering::Relaxed);
                }
                self.iteration.store(0, Ordering::Relaxed);
                true
            }
            Node::Exit { condition } => !self.eval_condition(condition, ctx),
            Node::Query { views, view_free_condition, body } => {
                if let Some(cond) = view_free_condition {
                    if !self.eval_condition(cond, ctx) {
                        return true;
                    }
                }
                self.create_views(views, ctx);
                self.execute(body, ctx)
            }
            Node::Clear { relation } => {
                self.relation(*relation).purge();
                true
            }
            Node::Swap { lhs, rhs } => {
                swap_relations(&self.relations, *lhs, *rhs);
                true
            }
            Node::Extend { target, source } => {
                let target = self.relation(*target);
                let source = self.relation(*source);
                target.extend_from(&source);
                true
            }
            Node::Io { kind, relation } => {
                if let Some(handler) = &self.io_handler {
                    let rel = self.relation(*relation);
                    handler(*kind, rel.name(), &rel);
                }
                true
            }
            Node::LogSize { relation, message } => {
                let rel = self.relation(*relation);
                let line = format!("@relation-size;{};{}", rel.name(), rel.size());
                debug!(target: "stratalog::profile", %message, size = rel.size());
                if self.profile_enabled {
                    self.profile_log.lock().push(line);
                }
                true
            }
            Node::LogTimer { message, statement } => {
                let start = Instant::now();
                let result = self.execute(statement, ctx);
                let elapsed = start.elapsed();
                debug!(target: "stratalog::profile", %message, ?elapsed, "timer");
                if self.profile_enabled {
                    self.profile_log
                        .lock()
                        .push(format!("@time;{};{}", message, elapsed.as_micros()));
                }
                result
            }
            Node::DebugInfo { message, statement } => {
                if self.profile_enabled {
                    self.frequencies
                        .entry(message.clone())
                        .and_modify(|count| *count += 1)
                        .or_insert(1);
                }
                self.execute(statement, ctx)
            }
            Node::Call(index) => {
                if let Some((_, node)) = self.subroutines.get(*index) {
                    let node = node.clone();
                    // the callee runs in a fresh scope but shares the
                    // caller's argument frame; its return values feed
                    // back into the caller's buffer
                    let mut scope = Context::call_scope(ctx.arguments().to_vec());
                    self.execute(&node, &mut scope);
                    for value in scope.take_returns() {
                        ctx.add_return(value);
                    }
                }
                true
            }

            // -- operations --
            Node::Scan { relation, tuple_id, body } => {
                let rel = self.relation(*relation);
                self.count_read(rel.name());
                for tuple in rel.scan() {
                    ctx.set_tuple(*tuple_id, tuple);
                    if !self.execute(body, ctx) {
                        return false;
                    }
                }
                true
            }
            Node::ParallelScan { relation, tuple_id, body } => {
                let rel = self.relation(*relation);
                self.count_read(rel.name());
                let chunks = rel.partition(self.num_workers);
                self.run_parallel(chunks, *tuple_id, body, ctx)
            }
            Node::IndexScan { relation, tuple_id, view, super_inst, body } => {
                let (lower, upper) = match self.bounds(super_inst, ctx) {
                    Some(bounds) => bounds,
                    None => return true,
                };
                let tuples = ctx.view(*view).range(&lower, &upper);
                self.count_read(self.relation(*relation).name());
                for tuple in tuples {
                    ctx.set_tuple(*tuple_id, tuple);
                    if !self.execute(body, ctx) {
                        return false;
                    }
                }
                true
            }
            Node::ParallelIndexScan { relation, tuple_id, index, super_inst, body } => {
                let (lower, upper) = match self.bounds(super_inst, ctx) {
                    Some(bounds) => bounds,
                    None => return true,
                };
                let rel = self.relation(*relation);
                self.count_read(rel.name());
                let matching = rel.range(*index, &lower, &upper);
                let chunk_size = matching.len().div_ceil(self.num_workers).max(1);
                let chunks: Vec<Vec<Tuple>> =
                    matching.chunks(chunk_size).map(<[Tuple]>::to_vec).collect();
                self.run_parallel(chunks, *tuple_id, body, ctx)
            }
            Node::IfExists { relation, tuple_id, condition, body } => {
                let rel = self.relation(*relation);
                self.count_read(rel.name());
                for tuple in rel.scan() {
                    ctx.set_tuple(*tuple_id, tuple);
                    if self.eval_condition(condition, ctx) {
                        return self.execute(body, ctx);
                    }
                }
                true
            }
            Node::IndexIfExists { relation, tuple_id, view, super_inst, condition, body } => {
                let (lower, upper) = match self.bounds(super_inst, ctx) {
                    Some(bounds) => bounds,
                    None => return true,
                };
                let tuples = ctx.view(*view).range(&lower, &upper);
                self.count_read(self.relation(*relation).name());
                for tuple in tuples {
                    ctx.set_tuple(*tuple_id, tuple);
                    if self.eval_condition(condition, ctx) {
                        return self.execute(body, ctx);
                    }
                }
                true
            }
            Node::Aggregate { relation, tuple_id, function, expression, condition, body } => {
                let rel = self.relation(*relation);
                self.count_read(rel.name());
                let tuples = rel.scan();
                self.eval_aggregate(
                    tuples, *tuple_id, *function, expression.as_deref(), condition, body, ctx,
                )
            }
            Node::IndexAggregate {
                relation,
                tuple_id,
                function,
                expression,
                view,
                super_inst,
                condition,
                body,
            } => {
                let (lower, upper) = match self.bounds(super_inst, ctx) {
                    Some(bounds) => bounds,
                    None => return true,
                };
                let tuples = ctx.view(*view).range(&lower, &upper);
                self.count_read(self.relation(*relation).name());
                self.eval_aggregate(
                    tuples, *tuple_id, *function, expression.as_deref(), condition, body, ctx,
                )
            }
            Node::UnpackRecord { expression, arity, tuple_id, body } => {
                let id = match self.eval_expression(expression, ctx) {
                    Some(id) => id,
                    None => return true,
                };
                match self.records.unpack(id, *arity) {
                    Some(record) => {
                        ctx.set_tuple(*tuple_id, record);
                        self.execute(body, ctx)
                    }
                    // nil or unknown record: fail silently
                    None => true,
                }
            }
            Node::NestedIntrinsicOperator { op, args, tuple_id, body } => {
                self.eval_range_operator(*op, args, *tuple_id, body, ctx)
            }
            Node::Filter { condition, body } => {
                if self.eval_condition(condition, ctx) {
                    self.execute(body, ctx)
                } else {
                    true
                }
            }
            Node::Break { condition, body } => {
                if self.eval_condition(condition, ctx) {
                    false
                } else {
                    self.execute(body, ctx)
                }
            }
            Node::Insert { relation, super_inst } => {
                if let Some(tuple) = self.materialize(super_inst, ctx) {
                    self.relation(*relation).insert(&tuple);
                }
                true
            }
            Node::GuardedInsert { relation, super_inst, condition } => {
                if self.eval_condition(condition, ctx) {
                    if let Some(tuple) = self.materialize(super_inst, ctx) {
                        self.relation(*relation).insert(&tuple);
                    }
                }
                true
            }
            Node::SubroutineReturn { args } => {
                let values: Vec<Option<RamDomain>> =
                    args.iter().map(|a| self.eval_expression(a, ctx)).collect();
                for value in values.into_iter().flatten() {
                    ctx.add_return(value);
                }
                true
            }

            // conditions and expressions reached as operations indicate a
            // generator bug; treat them as a no-op to stay total
            _ => true,
        }
    }

    fn run_parallel(
        &self,
        chunks: Vec<Vec<Tuple>>,
        tuple_id: usize,
        body: &Node,
        ctx: &Context,
    ) -> bool {
        use rayon::prelude::*;
        let results: Vec<bool> = self.pool.install(|| {
            chunks
                .into_par_iter()
                .map(|chunk| {
                    // per-worker context: bindings and views are cloned
                    // before the first tuple is processed
                    let mut worker_ctx = ctx.clone();
                    for tuple in chunk {
                        worker_ctx.set_tuple(tuple_id, tuple);
                        if !self.execute(body, &mut worker_ctx) {
                            return false;
                        }
                    }
                    true
                })
                .collect()
        });
        results.into_iter().all(|r| r)
    }

    fn create_views(&self, views: &[ViewRequest], ctx: &mut Context) {
        for request in views {
            let rel = self.relation(request.relation);
            ctx.set_view(request.view, View::new(rel, request.index));
        }
    }

    fn count_read(&self, relation: &str) {
        if self.profile_enabled {
            self.reads
                .entry(relation.to_string())
                .and_modify(|count| *count += 1)
                .or_insert(1);
        }
    }

    // ------------------------------------------------------------------
    // aggregates
    // ------------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn eval_aggregate(
        &self,
        tuples: Vec<Tuple>,
        tuple_id: usize,
        function: AggregateOp,
        expression: Option<&Node>,
        condition: &Node,
        body: &Node,
        ctx: &mut Context,
    ) -> bool {
        let mut any = false;
        let mut count: i64 = 0;
        let mut acc: RamDomain = match function {
            AggregateOp::Min => RamDomain::MAX,
            AggregateOp::Max => RamDomain::MIN,
            AggregateOp::UMin => unsigned_to_ram(u64::MAX),
            AggregateOp::UMax => unsigned_to_ram(u64::MIN),
            AggregateOp::FMin => float_to_ram(f64::INFINITY),
            AggregateOp::FMax => float_to_ram(f64::NEG_INFINITY),
            _ => 0,
        };
        let mut fsum: f64 = 0.0;

        for tuple in tuples {
            ctx.set_tuple(tuple_id, tuple);
            if !self.eval_condition(condition, ctx) {
                continue;
            }
            any = true;
            count += 1;
            if function == AggregateOp::Count {
                continue;
            }
            let value = match expression.and_then(|e| self.eval_expression(e, ctx)) {
                Some(value) => value,
                None => continue,
            };
            match function {
                AggregateOp::Min => acc = acc.min(value),
                AggregateOp::Max => acc = acc.max(value),
                AggregateOp::Sum => acc = acc.wrapping_add(value),
                AggregateOp::UMin => {
                    acc = unsigned_to_ram(ram_to_unsigned(acc).min(ram_to_unsigned(value)));
                }
                AggregateOp::UMax => {
                    acc = unsigned_to_ram(ram_to_unsigned(acc).max(ram_to_unsigned(value)));
                }
                AggregateOp::USum => {
                    acc = unsigned_to_ram(ram_to_unsigned(acc).wrapping_add(ram_to_unsigned(value)));
                }
                AggregateOp::FMin => {
                    acc = float_to_ram(ram_to_float(acc).min(ram_to_float(value)));
                }
                AggregateOp::FMax => {
                    acc = float_to_ram(ram_to_float(acc).max(ram_to_float(value)));
                }
                AggregateOp::FSum => {
                    acc = float_to_ram(ram_to_float(acc) + ram_to_float(value));
                }
                AggregateOp::Mean | AggregateOp::FMean => {
                    fsum += if matches!(function, AggregateOp::FMean) {
                        ram_to_float(value)
                    } else {
                        value as f64
                    };
                }
                AggregateOp::Count => {}
            }
        }

        let result = match function {
            AggregateOp::Count => count,
            AggregateOp::Mean => {
                if count == 0 {
                    0
                } else {
                    (fsum / count as f64) as RamDomain
                }
            }
            AggregateOp::FMean => {
                if count == 0 {
                    float_to_ram(f64::NAN)
                } else {
                    float_to_ram(fsum / count as f64)
                }
            }
            _ => acc,
        };

        // count, sum and mean have a neutral element; the ordered folds
        // only produce a witness when at least one tuple contributed
        let run_nested = any
            || matches!(
                function,
                AggregateOp::Count
                    | AggregateOp::Sum
                    | AggregateOp::USum
                    | AggregateOp::FSum
                    | AggregateOp::Mean
                    | AggregateOp::FMean
            );
        if !run_nested {
            return true;
        }
        ctx.set_tuple(tuple_id, vec![result]);
        self.execute(body, ctx)
    }

    fn eval_range_operator(
        &self,
        op: IntrinsicOp,
        args: &[Node],
        tuple_id: usize,
        body: &Node,
        ctx: &mut Context,
    ) -> bool {
        let values: Vec<Option<RamDomain>> =
            args.iter().map(|a| self.eval_expression(a, ctx)).collect();
        let values: Vec<RamDomain> = match values.into_iter().collect() {
            Some(values) => values,
            None => return true,
        };
        if values.len() < 2 {
            return true;
        }
        match op {
            IntrinsicOp::Range => {
                let from = values[0];
                let to = values[1];
                let step = values.get(2).copied().unwrap_or(if from <= to { 1 } else { -1 });
                if step == 0 {
                    return true;
                }
                let mut cur = from;
                while (step > 0 && cur < to) || (step < 0 && cur > to) {
                    ctx.set_tuple(tuple_id, vec![cur]);
                    if !self.execute(body, ctx) {
                        return false;
                    }
                    cur = cur.wrapping_add(step);
                }
                true
            }
            IntrinsicOp::URange => {
                let from = ram_to_unsigned(values[0]);
                let to = ram_to_unsigned(values[1]);
                let mut cur = from;
                while cur < to {
                    ctx.set_tuple(tuple_id, vec![unsigned_to_ram(cur)]);
                    if !self.execute(body, ctx) {
                        return false;
                    }
                    cur = cur.wrapping_add(1);
                }
                true
            }
            IntrinsicOp::FRange => {
                let from = ram_to_float(values[0]);
                let to = ram_to_float(values[1]);
                let step = values.get(2).map(|v| ram_to_float(*v)).unwrap_or(1.0);
                if step == 0.0 {
                    return true;
                }
                let mut cur = from;
                while (step > 0.0 && cur < to) || (step < 0.0 && cur > to) {
                    ctx.set_tuple(tuple_id, vec![float_to_ram(cur)]);
                    if !self.execute(body, ctx) {
                        return false;
                    }
                    cur += step;
                }
                true
            }
            _ => true,
        }
    }

    // ------------------------------------------------------------------
    // super-instruction materialization
    // ------------------------------------------------------------------

    /// Materialize the lower/upper bounds of an indexed operation
    fn bounds(&self, inst: &SuperInstruction, ctx: &Context) -> Option<(Tuple, Tuple)> {
        let mut first = inst.first.clone();
        let mut second = inst.second.clone();
        for &(dst, tuple_id, element) in &inst.tuple_first {
            first[dst] = ctx.element(tuple_id, element);
        }
        for &(dst, tuple_id, element) in &inst.tuple_second {
            second[dst] = ctx.element(tuple_id, element);
        }
        for (dst, expr) in &inst.expr_first {
            first[*dst] = self.eval_expression(expr, ctx)?;
        }
        for (dst, expr) in &inst.expr_second {
            second[*dst] = self.eval_expression(expr, ctx)?;
        }
        Some((first, second))
    }

    /// Materialize an insert tuple; `None` when any value errored
    fn materialize(&self, inst: &SuperInstruction, ctx: &Context) -> Option<Tuple> {
        let mut tuple = inst.first.clone();
        for &(dst, tuple_id, element) in &inst.tuple_first {
            tuple[dst] = ctx.element(tuple_id, element);
        }
        for (dst, expr) in &inst.expr_first {
            tuple[*dst] = self.eval_expression(expr, ctx)?;
        }
        Some(tuple)
    }

    // ------------------------------------------------------------------
    // conditions
    // ------------------------------------------------------------------

    fn eval_condition(&self, node: &Node, ctx: &Context) -> bool {
        match node {
            Node::True => true,
            Node::False => false,
            Node::Conjunction { lhs, rhs } => {
                self.eval_condition(lhs, ctx) && self.eval_condition(rhs, ctx)
            }
            Node::Negation { child } => !self.eval_condition(child, ctx),
            Node::Constraint { op, lhs, rhs } => {
                let lhs = self.eval_expression(lhs, ctx);
                let rhs = self.eval_expression(rhs, ctx);
                match (lhs, rhs) {
                    (Some(l), Some(r)) => match op {
                        ConstraintOp::Eq => l == r,
                        ConstraintOp::Ne => l != r,
                        ConstraintOp::Lt => l < r,
                        ConstraintOp::Le => l <= r,
                        ConstraintOp::Gt => l > r,
                        ConstraintOp::Ge => l >= r,
                    },
                    // evaluation errors never satisfy a constraint
                    _ => false,
                }
            }
            Node::EmptinessCheck { relation } => self.relation(*relation).is_empty(),
            Node::ExistenceCheck { view, is_total, super_inst, .. } => {
                let (lower, upper) = match self.bounds(super_inst, ctx) {
                    Some(bounds) => bounds,
                    None => return false,
                };
                let view = ctx.view(*view);
                if *is_total {
                    view.contains(&lower)
                } else {
                    view.contains_range(&lower, &upper)
                }
            }
            Node::ProvenanceExistenceCheck { view, super_inst, .. } => {
                let (lower, upper) = match self.bounds(super_inst, ctx) {
                    Some(bounds) => bounds,
                    None => return false,
                };
                ctx.view(*view).contains_range(&lower, &upper)
            }
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // expressions
    // ------------------------------------------------------------------

    /// Evaluate an expression node. `None` is the error value: division
    /// by zero, failed casts and unknown functors produce it, and it
    /// suppresses the enclosing insertion. The executor never panics
    /// across the dispatch boundary.
    fn eval_expression(&self, node: &Node, ctx: &Context) -> Option<RamDomain> {
        match node {
            Node::NumberConstant(value) => Some(*value),
            Node::StringConstant(index) => Some(*index),
            Node::TupleElement { tuple_id, element } => Some(ctx.element(*tuple_id, *element)),
            Node::AutoIncrement => Some(self.counter.fetch_add(1, Ordering::Relaxed)),
            Node::Undef => None,
            Node::SubroutineArgument(index) => Some(ctx.argument(*index)),
            Node::RelationSize { relation } => Some(self.relation(*relation).size() as RamDomain),
            Node::PackRecord { args } => {
                let mut record = Vec::with_capacity(args.len());
                for arg in args {
                    record.push(self.eval_expression(arg, ctx)?);
                }
                Some(self.records.pack(&record))
            }
            Node::UserDefinedOperator { name, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expression(arg, ctx)?);
                }
                let functor = self.functors.get(name)?;
                (functor.value().as_ref())(&values)
            }
            Node::IntrinsicOperator { op, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval_expression(arg, ctx)?);
                }
                self.eval_intrinsic(*op, &values)
            }
            _ => None,
        }
    }

    fn eval_intrinsic(&self, op: IntrinsicOp, values: &[RamDomain]) -> Option<RamDomain> {
        // arity mismatches evaluate to the error value rather than
        // panicking across the dispatch boundary
        let needed = match op {
            IntrinsicOp::Neg => 1,
            IntrinsicOp::Add
            | IntrinsicOp::Sub
            | IntrinsicOp::Mul
            | IntrinsicOp::Div
            | IntrinsicOp::Mod => 2,
            _ => 0,
        };
        if values.len() < needed {
            return None;
        }
        match op {
            IntrinsicOp::Neg => Some(values[0].wrapping_neg()),
            IntrinsicOp::Add => Some(values[0].wrapping_add(values[1])),
            IntrinsicOp::Sub => Some(values[0].wrapping_sub(values[1])),
            IntrinsicOp::Mul => Some(values[0].wrapping_mul(values[1])),
            IntrinsicOp::Div => values[0].checked_div(values[1]),
            IntrinsicOp::Mod => values[0].checked_rem(values[1]),
            IntrinsicOp::Min => values.iter().copied().min(),
            IntrinsicOp::Max => values.iter().copied().max(),
            IntrinsicOp::Cat => {
                let mut out = String::new();
                for &value in values {
                    out.push_str(&self.symbols.decode(value)?);
                }
                Some(self.symbols.encode(&out))
            }
            // multi-result operators are handled by the nested form
            IntrinsicOp::Range | IntrinsicOp::URange | IntrinsicOp::FRange => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::RelationRepresentation;
    use crate::interp::relation::RelationSpec;

    fn spec(name: &str, arity: usize) -> RelationSpec {
        RelationSpec {
            name: name.to_string(),
            arity,
            representation: RelationRepresentation::Btree,
            orders: vec![(0..arity).collect()],
            limit: None,
        }
    }

    fn engine_with(main: Node, relations: Vec<RelationSpec>) -> Engine {
        let compiled = CompiledProgram { relations, main, subroutines: Vec::new() };
        Engine::new(compiled, Arc::new(SymbolTable::new()), 1, false)
    }

    #[test]
    fn test_scan_insert_roundtrip() {
        // out(x, 7) :- edge(x, _).
        let main = Node::Query {
            views: Vec::new(),
            view_free_condition: None,
            body: Box::new(Node::Scan {
                relation: 0,
                tuple_id: 0,
                body: Box::new(Node::Insert {
                    relation: 1,
                    super_inst: SuperInstruction {
                        first: vec![RamDomain::MIN, 7],
                        second: vec![RamDomain::MAX, RamDomain::MAX],
                        tuple_first: vec![(0, 0, 0)],
                        ..Default::default()
                    },
                }),
            }),
        };
        let engine = engine_with(main, vec![spec("edge", 2), spec("out", 2)]);
        let edge = engine.relation_by_name("edge").expect("edge exists");
        edge.insert(&[1, 2]);
        edge.insert(&[3, 4]);
        engine.execute_main();
        let out = engine.relation_by_name("out").expect("out exists");
        assert_eq!(out.scan(), vec![vec![1, 7], vec![3, 7]]);
    }

    #[test]
    fn test_filter_blocks_insert() {
        let main = Node::Query {
            views: Vec::new(),
            view_free_condition: None,
            body: Box::new(Node::Filter {
                condition: Box::new(Node::False),
                body: Box::new(Node::Insert {
                    relation: 0,
                    super_inst: SuperInstruction {
                        first: vec![1],
                        second: vec![1],
                        ..Default::default()
                    },
                }),
            }),
        };
        let engine = engine_with(main, vec![spec("out", 1)]);
        engine.execute_main();
        assert!(engine.relation_by_name("out").expect("out").is_empty());
    }

    #[test]
    fn test_loop_exit_on_emptiness() {
        // loop { exit when new is empty; clear new } -- new starts with
        // one tuple, so the loop runs exactly one clearing round
        let main = Node::Loop {
            body: Box::new(Node::Sequence {
                children: vec![
                    Node::Exit {
                        condition: Box::new(Node::EmptinessCheck { relation: 0 }),
                    },
                    Node::Clear { relation: 0 },
                ],
            }),
        };
        let engine = engine_with(main, vec![spec("new", 1)]);
        engine
            .relation_by_name("new")
            .expect("new")
            .insert(&[1]);
        engine.execute_main();
        assert!(engine.relation_by_name("new").expect("new").is_empty());
    }

    #[test]
    fn test_division_by_zero_skips_insert() {
        let main = Node::Query {
            views: Vec::new(),
            view_free_condition: None,
            body: Box::new(Node::Insert {
                relation: 0,
                super_inst: SuperInstruction {
                    first: vec![RamDomain::MIN],
                    second: vec![RamDomain::MAX],
                    expr_first: vec![(
                        0,
                        Node::IntrinsicOperator {
                            op: IntrinsicOp::Div,
                            args: vec![Node::NumberConstant(1), Node::NumberConstant(0)],
                        },
                    )],
                    ..Default::default()
                },
            }),
        };
        let engine = engine_with(main, vec![spec("out", 1)]);
        engine.execute_main();
        assert!(engine.relation_by_name("out").expect("out").is_empty());
    }

    #[test]
    fn test_aggregate_count() {
        // out(c) :- c = count : src(_).
        let main = Node::Query {
            views: Vec::new(),
            view_free_condition: None,
            body: Box::new(Node::Aggregate {
                relation: 0,
                tuple_id: 0,
                function: AggregateOp::Count,
                expression: None,
                condition: Box::new(Node::True),
                body: Box::new(Node::Insert {
                    relation: 1,
                    super_inst: SuperInstruction {
                        first: vec![RamDomain::MIN],
                        second: vec![RamDomain::MAX],
                        tuple_first: vec![(0, 0, 0)],
                        ..Default::default()
                    },
                }),
            }),
        };
        let engine = engine_with(main, vec![spec("src", 1), spec("out", 1)]);
        let src = engine.relation_by_name("src").expect("src");
        src.insert(&[10]);
        src.insert(&[20]);
        src.insert(&[30]);
        engine.execute_main();
        assert_eq!(engine.relation_by_name("out").expect("out").scan(), vec![vec![3]]);
    }

    #[test]
    fn test_aggregate_mean_empty_emits_neutral_element() {
        // mean folds sum and count, so an empty input still produces a
        // value and runs the nested operation exactly once
        let main = Node::Query {
            views: Vec::new(),
            view_free_condition: None,
            body: Box::new(Node::Aggregate {
                relation: 0,
                tuple_id: 0,
                function: AggregateOp::Mean,
                expression: Some(Box::new(Node::TupleElement { tuple_id: 0, element: 0 })),
                condition: Box::new(Node::True),
                body: Box::new(Node::Insert {
                    relation: 1,
                    super_inst: SuperInstruction {
                        first: vec![RamDomain::MIN],
                        second: vec![RamDomain::MAX],
                        tuple_first: vec![(0, 0, 0)],
                        ..Default::default()
                    },
                }),
            }),
        };
        let engine = engine_with(main, vec![spec("src", 1), spec("out", 1)]);
        engine.execute_main();
        assert_eq!(engine.relation_by_name("out").expect("out").scan(), vec![vec![0]]);
    }

    #[test]
    fn test_aggregate_min_empty_produces_nothing() {
        let main = Node::Query {
            views: Vec::new(),
            view_free_condition: None,
            body: Box::new(Node::Aggregate {
                relation: 0,
                tuple_id: 0,
                function: AggregateOp::Min,
                expression: Some(Box::new(Node::TupleElement { tuple_id: 0, element: 0 })),
                condition: Box::new(Node::True),
                body: Box::new(Node::Insert {
                    relation: 1,
                    super_inst: SuperInstruction {
                        first: vec![RamDomain::MIN],
                        second: vec![RamDomain::MAX],
                        tuple_first: vec![(0, 0, 0)],
                        ..Default::default()
                    },
                }),
            }),
        };
        let engine = engine_with(main, vec![spec("src", 1), spec("out", 1)]);
        engine.execute_main();
        assert!(engine.relation_by_name("out").expect("out").is_empty());
    }

    #[test]
    fn test_existence_check_with_view() {
        // guard an insert on edge(1, 2) being present
        let main = Node::Query {
            views: vec![ViewRequest { relation: 0, index: 0, view: 0 }],
            view_free_condition: None,
            body: Box::new(Node::Filter {
                condition: Box::new(Node::ExistenceCheck {
                    relation: 0,
                    view: 0,
                    is_total: true,
                    super_inst: SuperInstruction {
                        first: vec![1, 2],
                        second: vec![1, 2],
                        ..Default::default()
                    },
                }),
                body: Box::new(Node::Insert {
                    relation: 1,
                    super_inst: SuperInstruction {
                        first: vec![99],
                        second: vec![99],
                        ..Default::default()
                    },
                }),
            }),
        };
        let engine = engine_with(main, vec![spec("edge", 2), spec("out", 1)]);
        engine.relation_by_name("edge").expect("edge").insert(&[1, 2]);
        engine.execute_main();
        assert_eq!(engine.relation_by_name("out").expect("out").size(), 1);
    }

    #[test]
    fn test_swap_statement_exchanges_slots() {
        // after the swap, slot 0 holds what slot 1 held; the query that
        // copies slot 0 into `out` therefore sees b's (empty) contents
        let main = Node::Sequence {
            children: vec![
                Node::Swap { lhs: 0, rhs: 1 },
                Node::Query {
                    views: Vec::new(),
                    view_free_condition: None,
                    body: Box::new(Node::Scan {
                        relation: 0,
                        tuple_id: 0,
                        body: Box::new(Node::Insert {
                            relation: 2,
                            super_inst: SuperInstruction {
                                first: vec![RamDomain::MIN],
                                second: vec![RamDomain::MAX],
                                tuple_first: vec![(0, 0, 0)],
                                ..Default::default()
                            },
                        }),
                    }),
                },
            ],
        };
        let engine = engine_with(main, vec![spec("a", 1), spec("b", 1), spec("out", 1)]);
        engine.relation_by_name("a").expect("a").insert(&[7]);
        engine.execute_main();
        assert!(engine.relation_by_name("out").expect("out").is_empty());
    }

    #[test]
    fn test_parallel_scan_matches_sequential() {
        let body = |relation: RelId| {
            Box::new(Node::Insert {
                relation,
                super_inst: SuperInstruction {
                    first: vec![RamDomain::MIN],
                    second: vec![RamDomain::MAX],
                    tuple_first: vec![(0, 0, 0)],
                    ..Default::default()
                },
            })
        };
        let main = Node::Query {
            views: Vec::new(),
            view_free_condition: None,
            body: Box::new(Node::ParallelScan { relation: 0, tuple_id: 0, body: body(1) }),
        };
        let compiled = CompiledProgram {
            relations: vec![spec("src", 1), spec("out", 1)],
            main,
            subroutines: Vec::new(),
        };
        let engine = Engine::new(compiled, Arc::new(SymbolTable::new()), 4, false);
        let src = engine.relation_by_name("src").expect("src");
        for i in 0..100 {
            src.insert(&[i]);
        }
        engine.execute_main();
        assert_eq!(engine.relation_by_name("out").expect("out").size(), 100);
    }

    #[test]
    fn test_subroutine_returns() {
        let sub = Node::SubroutineReturn {
            args: vec![Node::SubroutineArgument(0), Node::NumberConstant(5)],
        };
        let compiled = CompiledProgram {
            relations: Vec::new(),
            main: Node::Sequence { children: Vec::new() },
            subroutines: vec![("probe".to_string(), sub)],
        };
        let engine = Engine::new(compiled, Arc::new(SymbolTable::new()), 1, false);
        assert_eq!(engine.execute_subroutine("probe", vec![42]), vec![42, 5]);
    }

    #[test]
    fn test_call_forwards_arguments_and_returns() {
        // outer calls inner; inner reads the shared argument frame and
        // its return values land in outer's buffer before outer's own
        let inner = Node::SubroutineReturn {
            args: vec![Node::SubroutineArgument(0), Node::NumberConstant(5)],
        };
        let outer = Node::Sequence {
            children: vec![
                Node::Call(1),
                Node::SubroutineReturn { args: vec![Node::NumberConstant(9)] },
            ],
        };
        let compiled = CompiledProgram {
            relations: Vec::new(),
            main: Node::Sequence { children: Vec::new() },
            subroutines: vec![("outer".to_string(), outer), ("inner".to_string(), inner)],
        };
        let engine = Engine::new(compiled, Arc::new(SymbolTable::new()), 1, false);
        assert_eq!(engine.execute_subroutine("outer", vec![42]), vec![42, 5, 9]);
    }

    #[test]
    fn test_range_generator() {
        // out(x) for x in range(0, 5)
        let main = Node::Query {
            views: Vec::new(),
            view_free_condition: None,
            body: Box::new(Node::NestedIntrinsicOperator {
                op: IntrinsicOp::Range,
                args: vec![Node::NumberConstant(0), Node::NumberConstant(5)],
                tuple_id: 0,
                body: Box::new(Node::Insert {
                    relation: 0,
                    super_inst: SuperInstruction {
                        first: vec![RamDomain::MIN],
                        second: vec![RamDomain::MAX],
                        tuple_first: vec![(0, 0, 0)],
                        ..Default::default()
                    },
                }),
            }),
        };
        let engine = engine_with(main, vec![spec("out", 1)]);
        engine.execute_main();
        assert_eq!(
            engine.relation_by_name("out").expect("out").scan(),
            vec![vec![0], vec![1], vec![2], vec![3], vec![4]]
        );
    }

    #[test]
    fn test_string_cat_intrinsic() {
        let engine = engine_with(
            Node::Sequence { children: Vec::new() },
            Vec::new(),
        );
        let a = engine.symbol_table().encode("foo");
        let b = engine.symbol_table().encode("bar");
        let result = engine
            .eval_intrinsic(IntrinsicOp::Cat, &[a, b])
            .expect("cat evaluates");
        assert_eq!(engine.symbol_table().decode(result), Some("foobar".to_string()));
    }
}
