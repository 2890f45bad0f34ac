//! # Seminaive Lowering
//!
//! Translates the rewritten program into the relational form, one
//! schedule step at a time. Non-recursive strata become straight
//! queries; recursive strata become the delta/new fixpoint loop:
//!
//! ```text
//! non-recursive clauses -> R
//! delta_R := R
//! loop {
//!   for each recursive clause version:
//!     new_R += body[delta at chosen occurrence], guarded by !R(head)
//!   exit when all new_R empty
//!   R += new_R; swap(delta_R, new_R); clear new_R
//! }
//! ```
//!
//! Clause bodies translate into scan/index-scan nests with filters;
//! negations become negated existence checks, equality-bound aggregates
//! become aggregate operations, and multi-result functor bindings
//! become nested generator operations. In provenance mode every
//! relation is widened by a rule and a level column and negations use
//! data-column existence checks.

use crate::analysis::{IoType, RecursiveClauses, RelationSchedule, TranslationUnit};
use crate::ast::{
    AggregateOp, Aggregator, Argument, Atom, Clause, ConstraintOp, DirectiveKind, Literal,
    NumericValue, QualifiedName, RelationRepresentation,
};
use crate::ram::{
    Condition, Expression, Operation, RamProgram, RamRelation, RangePattern, Statement,
    TypeAttribute,
};
use crate::sips::SipsMetric;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

/// Name of the per-iteration delta companion of a recursive relation
fn delta_name(name: &QualifiedName) -> String {
    format!("@delta_{name}")
}

/// Name of the per-iteration new-knowledge companion
fn new_name(name: &QualifiedName) -> String {
    format!("@new_{name}")
}

/// Lower a rewritten translation unit into a RAM program
pub fn lower(tu: &TranslationUnit) -> RamProgram {
    let schedule = tu.get_analysis::<RelationSchedule>();
    let recursive_clauses = tu.get_analysis::<RecursiveClauses>();
    let io_types = tu.get_analysis::<IoType>();
    let sips = SipsMetric::create(&tu.config().ram_sips.clone(), tu);
    let provenance = tu.config().provenance;
    let parallel = tu.config().worker_count() > 1;
    let profile = tu.config().profile;

    let mut relations: Vec<RamRelation> = Vec::new();
    for rel in &tu.program().relations {
        let mut attribute_types: Vec<TypeAttribute> = rel
            .attributes
            .iter()
            .map(|a| TypeAttribute::from_type_name(&a.type_name.to_string()))
            .collect();
        if provenance {
            attribute_types.push(TypeAttribute::Signed);
            attribute_types.push(TypeAttribute::Signed);
        }
        relations.push(RamRelation {
            name: rel.name.to_string(),
            arity: attribute_types.len(),
            representation: rel.representation,
            attribute_types,
        });
    }

    let mut translator = Lowering {
        tu,
        sips,
        provenance,
        parallel,
        profile,
        io_types: io_types.clone(),
        rule_counter: 0,
    };

    let mut main: Vec<Statement> = Vec::new();

    // load inputs up front
    for directive in &tu.program().directives {
        if directive.kind == DirectiveKind::Input {
            main.push(Statement::Io {
                kind: DirectiveKind::Input,
                relation: directive.relation.to_string(),
            });
        }
    }

    for step in schedule.steps() {
        if step.recursive {
            let stratum =
                translator.lower_recursive_step(&step.computed, &recursive_clauses, &mut relations);
            main.push(stratum);
        } else {
            for rel_name in &step.computed {
                for clause in tu.program().clauses_for(rel_name) {
                    if let Some(query) = translator.lower_clause(clause, &BTreeMap::new(), None) {
                        main.push(query);
                    }
                }
                if profile {
                    main.push(Statement::LogSize {
                        relation: rel_name.to_string(),
                        message: format!("@relation-size;{rel_name}"),
                    });
                }
            }
        }

        // purge relations no later step depends on
        for expired in &step.expired {
            if !io_types.is_io(expired) {
                main.push(Statement::Clear(expired.to_string()));
            }
        }
    }

    // emit outputs at the end of evaluation
    for directive in &tu.program().directives {
        match directive.kind {
            DirectiveKind::Output | DirectiveKind::PrintSize => {
                main.push(Statement::Io {
                    kind: directive.kind,
                    relation: directive.relation.to_string(),
                });
            }
            _ => {}
        }
    }

    debug!(statements = main.len(), relations = relations.len(), "lowered program");
    RamProgram {
        relations,
        main: Statement::Sequence(main),
        subroutines: BTreeMap::new(),
    }
}

struct Lowering<'a> {
    tu: &'a TranslationUnit,
    sips: SipsMetric,
    provenance: bool,
    parallel: bool,
    profile: bool,
    io_types: std::rc::Rc<IoType>,
    rule_counter: usize,
}

impl Lowering<'_> {
    fn arity_of(&self, name: &QualifiedName) -> usize {
        self.tu
            .program()
            .relation(name)
            .map(|r| r.arity())
            .unwrap_or(0)
    }

    fn representation_of(&self, name: &QualifiedName) -> RelationRepresentation {
        self.tu
            .program()
            .relation(name)
            .map(|r| r.representation)
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // strata
    // ------------------------------------------------------------------

    fn lower_recursive_step(
        &mut self,
        members: &BTreeSet<QualifiedName>,
        recursive_clauses: &RecursiveClauses,
        relations: &mut Vec<RamRelation>,
    ) -> Statement {
        let mut stratum: Vec<Statement> = Vec::new();

        // companion relations share the member's shape
        for member in members {
            let base = self
                .tu
                .program()
                .relation(member)
                .map(|r| r.representation)
                .unwrap_or_default();
            let arity = self.arity_of(member) + if self.provenance { 2 } else { 0 };
            let types = vec![TypeAttribute::Signed; arity];
            for name in [delta_name(member), new_name(member)] {
                relations.push(RamRelation {
                    name,
                    arity,
                    representation: if base == RelationRepresentation::EqRel {
                        RelationRepresentation::EqRel
                    } else {
                        RelationRepresentation::Btree
                    },
                    attribute_types: types.clone(),
                });
            }
        }

        // non-recursive clauses seed the member relations
        for member in members {
            for clause in self.tu.program().clauses_for(member) {
                if !recursive_clauses.is_recursive(clause) {
                    if let Some(query) = self.lower_clause(clause, &BTreeMap::new(), None) {
                        stratum.push(query);
                    }
                }
            }
        }

        // delta := R
        for member in members {
            stratum.push(self.copy_statement(&member.to_string(), &delta_name(member)));
        }

        // the fixpoint loop
        let mut loop_body: Vec<Statement> = Vec::new();
        for member in members {
            for clause in self.tu.program().clauses_for(member) {
                if !recursive_clauses.is_recursive(clause) {
                    continue;
                }
                let same_scc_positions: Vec<usize> = clause
                    .body_atoms()
                    .iter()
                    .enumerate()
                    .filter(|(_, atom)| members.contains(&atom.name))
                    .map(|(i, _)| i)
                    .collect();
                for (version, &delta_pos) in same_scc_positions.iter().enumerate() {
                    let mut renames: BTreeMap<usize, String> = BTreeMap::new();
                    renames.insert(delta_pos, delta_name(&clause.body_atoms()[delta_pos].name));
                    if let Some(query) =
                        self.lower_clause(clause, &renames, Some((member, version)))
                    {
                        loop_body.push(query);
                    }
                }
            }
        }

        // exit once no member produced new knowledge
        let exit_condition = Condition::conjoin(
            members
                .iter()
                .map(|member| Condition::EmptinessCheck { relation: new_name(member) })
                .collect(),
        );
        loop_body.push(Statement::Exit(exit_condition));

        // R += new; swap(delta, new); clear new
        for member in members {
            if self.representation_of(member) == RelationRepresentation::EqRel {
                loop_body.push(Statement::Extend {
                    target: member.to_string(),
                    source: new_name(member),
                });
            } else {
                loop_body.push(self.copy_statement(&new_name(member), &member.to_string()));
            }
            loop_body.push(Statement::Swap(delta_name(member), new_name(member)));
            loop_body.push(Statement::Clear(new_name(member)));
        }

        // limitsize caps terminate otherwise unbounded fixpoints
        for member in members {
            if self.io_types.is_limit_size(member) {
                loop_body.push(Statement::Exit(Condition::Constraint {
                    op: ConstraintOp::Ge,
                    lhs: Expression::RelationSize(member.to_string()),
                    rhs: Expression::Number(self.io_types.limit_size(member) as i64),
                }));
            }
        }

        stratum.push(Statement::Loop(Box::new(Statement::Sequence(loop_body))));

        // the companions expire with the stratum
        for member in members {
            stratum.push(Statement::Clear(delta_name(member)));
            stratum.push(Statement::Clear(new_name(member)));
        }

        if self.profile {
            for member in members {
                stratum.push(Statement::LogSize {
                    relation: member.to_string(),
                    message: format!("@relation-size;{member}"),
                });
            }
        }

        Statement::Sequence(stratum)
    }

    /// `target += source` as a plain scan-and-insert query
    fn copy_statement(&self, source: &str, target: &str) -> Statement {
        let arity = self
            .tu
            .program()
            .relation(&QualifiedName::new(source.trim_start_matches("@delta_").trim_start_matches("@new_")))
            .map(|r| r.arity())
            .unwrap_or(0)
            + if self.provenance { 2 } else { 0 };
        let values = (0..arity)
            .map(|i| Expression::TupleElement { tuple_id: 0, element: i })
            .collect();
        Statement::Query(Operation::Scan {
            relation: source.to_string(),
            tuple_id: 0,
            body: Box::new(Operation::Insert { relation: target.to_string(), values }),
        })
    }

    // ------------------------------------------------------------------
    // clauses
    // ------------------------------------------------------------------

    /// Lower one clause (or one recursive version of it) into a query.
    /// `renames` maps body-atom positions to replacement relation names
    /// (the delta substitution); `recursive_target` carries the head
    /// relation and version for recursive versions, which insert into
    /// the new-knowledge companion guarded against known tuples.
    fn lower_clause(
        &mut self,
        clause: &Clause,
        renames: &BTreeMap<usize, String>,
        recursive_target: Option<(&QualifiedName, usize)>,
    ) -> Option<Statement> {
        let rule_index = self.rule_counter;
        self.rule_counter += 1;

        let mut translator = ClauseTranslator::new(self, clause, renames, recursive_target);
        let op = match translator.translate(rule_index) {
            Some(op) => op,
            None => {
                debug!(clause = %clause, "clause not translatable, skipped");
                return None;
            }
        };

        let op = if self.parallel { parallelize(op) } else { op };
        let message = match recursive_target {
            Some((_, version)) => format!("{clause} [v{version}]"),
            None => clause.to_string(),
        };
        Some(Statement::DebugInfo {
            message,
            statement: Box::new(Statement::Query(op)),
        })
    }
}

/// Upgrade the outermost scan of a query to its parallel variant
fn parallelize(op: Operation) -> Operation {
    match op {
        Operation::Scan { relation, tuple_id, body } => {
            Operation::ParallelScan { relation, tuple_id, body }
        }
        Operation::IndexScan { relation, tuple_id, pattern, body } => {
            Operation::ParallelIndexScan { relation, tuple_id, pattern, body }
        }
        other => other,
    }
}

// ============================================================================
// Clause translation
// ============================================================================

/// The level structure of one clause body: every atom, aggregate,
/// record unpack and generator binding occupies one level carrying a
/// tuple id.
enum Level {
    Atom {
        relation: String,
        pattern: Vec<PatternEntry>,
        arity: usize,
    },
    Aggregate {
        relation: String,
        function: AggregateOp,
        target: Option<Argument>,
        pattern: Vec<PatternEntry>,
        arity: usize,
        extra_literals: Vec<Literal>,
    },
    Unpack {
        source: (usize, usize),
        arity: usize,
        entries: Vec<PatternEntry>,
    },
    Generator {
        op: crate::ast::IntrinsicOp,
        args: Vec<Argument>,
    },
}

/// One attribute position of a scanned pattern
enum PatternEntry {
    /// Position binds a fresh variable (or is anonymous)
    Free,
    /// Position must equal the given AST value
    Bound(Argument),
}

struct ClauseTranslator<'a, 'b> {
    lowering: &'a Lowering<'b>,
    clause: &'a Clause,
    renames: &'a BTreeMap<usize, String>,
    recursive_target: Option<(&'a QualifiedName, usize)>,

    levels: Vec<Level>,
    /// variable -> (level, element)
    bindings: HashMap<String, (usize, usize)>,
    /// variable -> substituted term (from `v = <term>` constraints)
    functor_bindings: HashMap<String, Argument>,
    /// residual constraints, attached at their latest-bound level
    filters: Vec<Literal>,
    /// record unpacks queued while scanning atom patterns:
    /// (source slot, record arity, element entries, fresh bindings)
    pending_unpacks: Vec<((usize, usize), usize, Vec<PatternEntry>, Vec<(String, usize)>)>,
    /// repeated variables within one atom: (level, position, first position)
    same_level_eq: Vec<(usize, usize, usize)>,
}

impl<'a, 'b> ClauseTranslator<'a, 'b> {
    fn new(
        lowering: &'a Lowering<'b>,
        clause: &'a Clause,
        renames: &'a BTreeMap<usize, String>,
        recursive_target: Option<(&'a QualifiedName, usize)>,
    ) -> Self {
        ClauseTranslator {
            lowering,
            clause,
            renames,
            recursive_target,
            levels: Vec::new(),
            bindings: HashMap::new(),
            functor_bindings: HashMap::new(),
            filters: Vec::new(),
            pending_unpacks: Vec::new(),
            same_level_eq: Vec::new(),
        }
    }

    fn translate(&mut self, rule_index: usize) -> Option<Operation> {
        let atoms = self.ordered_atoms();
        self.classify_constraints();

        // atom levels bind variables in schedule order
        for (original_pos, atom) in &atoms {
            let relation = self
                .renames
                .get(original_pos)
                .cloned()
                .unwrap_or_else(|| atom.name.to_string());
            let level = self.levels.len();
            let pattern = self.atom_pattern(atom, level);
            let arity =
                self.lowering.arity_of(&atom.name) + if self.lowering.provenance { 2 } else { 0 };
            self.levels.push(Level::Atom { relation, pattern, arity });
        }

        // aggregate and generator levels after the atoms
        self.collect_value_levels();

        // translate filters and negations, grouped by the level at which
        // all their variables are bound
        let num_levels = self.levels.len();
        let mut conditions_at: Vec<Vec<Condition>> = vec![Vec::new(); num_levels + 1];
        let filters = std::mem::take(&mut self.filters);
        for literal in filters {
            let (level, condition) = self.translate_filter(&literal)?;
            conditions_at[level.min(num_levels)].push(condition);
        }

        // innermost operation: the insert, guarded for recursive versions
        let mut op = self.head_insert(rule_index)?;
        if let Some(conds) = conditions_at.last() {
            for cond in conds.iter().rev() {
                op = Operation::Filter { condition: cond.clone(), body: Box::new(op) };
            }
        }

        // wrap the levels inside-out
        for level_idx in (0..num_levels).rev() {
            op = self.wrap_level(level_idx, op)?;
            for cond in conditions_at[level_idx].iter().rev() {
                op = Operation::Filter { condition: cond.clone(), body: Box::new(op) };
            }
        }

        Some(op)
    }

    /// Body atoms in execution order: the user plan for this version if
    /// one exists, the RAM SIPS ordering otherwise. Returns pairs of
    /// (original body position, atom).
    fn ordered_atoms(&self) -> Vec<(usize, Atom)> {
        let atoms: Vec<Atom> = self.clause.body_atoms().into_iter().cloned().collect();
        let indexed: Vec<(usize, Atom)> = atoms.into_iter().enumerate().collect();

        let version = self.recursive_target.map(|(_, v)| v).unwrap_or(0);
        if let Some(plan) = &self.clause.plan {
            if let Some(order) = plan.orders.get(&version) {
                if order.len() == indexed.len()
                    && order.iter().all(|&p| p >= 1 && p <= indexed.len())
                {
                    return order.iter().map(|&p| indexed[p - 1].clone()).collect();
                }
            }
        }

        // rename delta occurrences before asking the metric so delta
        // heuristics see the substituted names
        let mut sips_clause = self.clause.clone();
        let mut atom_pos = 0;
        for lit in &mut sips_clause.body {
            if let Literal::Atom(atom) = lit {
                if let Some(new_name) = self.renames.get(&atom_pos) {
                    atom.name = QualifiedName::from_segments(vec![new_name.clone()]);
                }
                atom_pos += 1;
            }
        }
        let order = self.lowering.sips.get_reordering(&sips_clause);
        order.into_iter().map(|i| indexed[i].clone()).collect()
    }

    /// Split body constraints into aggregate bindings, functor
    /// substitutions and residual filters.
    fn classify_constraints(&mut self) {
        let atom_grounded: BTreeSet<String> = self
            .clause
            .body_atoms()
            .iter()
            .flat_map(|atom| atom.variables())
            .collect();

        for literal in &self.clause.body {
            match literal {
                Literal::Atom(_) => {}
                Literal::BinaryConstraint { op: ConstraintOp::Eq, lhs, rhs } => {
                    let (var, term) = match (lhs, rhs) {
                        (Argument::Variable(v), term) if !atom_grounded.contains(v) => {
                            (Some(v.clone()), term)
                        }
                        (term, Argument::Variable(v)) if !atom_grounded.contains(v) => {
                            (Some(v.clone()), term)
                        }
                        _ => (None, lhs),
                    };
                    match var {
                        // `v = <term>` with v not grounded by any atom:
                        // the term defines v (aggregates and generators
                        // become levels, everything else substitutes)
                        Some(v)
                            if !term.is_variable()
                                && !term.occurs(&Argument::Variable(v.clone())) =>
                        {
                            self.functor_bindings.insert(v, term.clone());
                        }
                        _ => self.filters.push(literal.clone()),
                    }
                }
                other => self.filters.push(other.clone()),
            }
        }
    }

    /// Pattern of one scanned atom, registering fresh bindings at the
    /// given level. Repeated variables within the atom become equality
    /// filters.
    fn atom_pattern(&mut self, atom: &Atom, level: usize) -> Vec<PatternEntry> {
        let mut pattern = Vec::with_capacity(atom.args.len());
        for (pos, arg) in atom.args.iter().enumerate() {
            match arg {
                Argument::UnnamedVariable => pattern.push(PatternEntry::Free),
                Argument::Variable(name) => {
                    match self.bindings.get(name) {
                        // a repeated variable within this atom cannot
                        // constrain the range; it filters inside the scan
                        Some(&(bound_level, first_pos)) if bound_level == level => {
                            pattern.push(PatternEntry::Free);
                            self.same_level_eq.push((level, pos, first_pos));
                        }
                        Some(_) => pattern.push(PatternEntry::Bound(arg.clone())),
                        None => {
                            self.bindings.insert(name.clone(), (level, pos));
                            pattern.push(PatternEntry::Free);
                        }
                    }
                }
                Argument::RecordInit(_) | Argument::BranchInit { .. } => {
                    // record arguments with unbound variables unpack after
                    // the scan; fully bound ones become point constraints
                    if arg.variables().iter().all(|v| self.bindings.contains_key(v)) {
                        pattern.push(PatternEntry::Bound(arg.clone()));
                    } else {
                        pattern.push(PatternEntry::Free);
                        self.queue_unpack(arg, level, pos);
                    }
                }
                other => pattern.push(PatternEntry::Bound(other.clone())),
            }
        }
        pattern
    }

    /// Schedule a record unpack for a scanned position. The record's
    /// fresh variables bind once the unpack level is assigned.
    fn queue_unpack(&mut self, record: &Argument, source_level: usize, source_pos: usize) {
        let args = match record {
            Argument::RecordInit(args) => args.clone(),
            Argument::BranchInit { args, .. } => args.clone(),
            _ => return,
        };
        let mut entries = Vec::with_capacity(args.len());
        let mut fresh = Vec::new();
        for (pos, arg) in args.iter().enumerate() {
            match arg {
                Argument::Variable(name)
                    if !self.bindings.contains_key(name)
                        && !fresh.iter().any(|(n, _)| n == name) =>
                {
                    entries.push(PatternEntry::Free);
                    fresh.push((name.clone(), pos));
                }
                other => entries.push(PatternEntry::Bound(other.clone())),
            }
        }
        self.pending_unpacks
            .push(((source_level, source_pos), args.len(), entries, fresh));
    }

    /// Aggregates, generators and queued unpacks become levels after the
    /// atoms; their result variables bind at those levels.
    fn collect_value_levels(&mut self) {
        // queued record unpacks first: they only need their source atom
        for ((source_level, source_pos), arity, entries, fresh) in
            std::mem::take(&mut self.pending_unpacks)
        {
            let level = self.levels.len();
            for (name, pos) in fresh {
                self.bindings.insert(name, (level, pos));
            }
            self.levels.push(Level::Unpack {
                source: (source_level, source_pos),
                arity,
                entries,
            });
        }

        // aggregate and generator bindings, in name order for
        // deterministic layout
        let functor_bindings: Vec<(String, Argument)> = {
            let mut entries: Vec<_> = self.functor_bindings.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            entries
        };
        for (var, term) in functor_bindings {
            match &term {
                Argument::Aggregator(agg) => {
                    let level = self.levels.len();
                    let prepared = self.prepare_aggregate(agg, level);
                    self.bindings.insert(var.clone(), (level, 0));
                    self.levels.push(prepared);
                }
                Argument::IntrinsicFunctor { op, args } if op.is_multi_result() => {
                    let level = self.levels.len();
                    self.bindings.insert(var.clone(), (level, 0));
                    self.levels.push(Level::Generator { op: *op, args: args.clone() });
                }
                _ => {
                    // plain functor bindings are substituted at use sites;
                    // nothing to schedule
                }
            }
        }
    }

    /// Build the aggregate level: the first body atom is iterated, any
    /// further literals fold into the aggregate condition.
    fn prepare_aggregate(&mut self, agg: &Aggregator, level: usize) -> Level {
        let mut body = agg.body.clone();
        let first_atom_idx = body.iter().position(|l| matches!(l, Literal::Atom(_)));
        let (relation, pattern, arity) = match first_atom_idx {
            Some(idx) => {
                let atom = match body.remove(idx) {
                    Literal::Atom(atom) => atom,
                    _ => unreachable!("position selected an atom"),
                };
                let mut pattern = Vec::with_capacity(atom.args.len());
                for (pos, arg) in atom.args.iter().enumerate() {
                    match arg {
                        Argument::UnnamedVariable => pattern.push(PatternEntry::Free),
                        Argument::Variable(name) => {
                            if self.bindings.contains_key(name) {
                                pattern.push(PatternEntry::Bound(arg.clone()));
                            } else {
                                self.bindings.insert(name.clone(), (level, pos));
                                pattern.push(PatternEntry::Free);
                            }
                        }
                        other => pattern.push(PatternEntry::Bound(other.clone())),
                    }
                }
                let arity = self.lowering.arity_of(&atom.name)
                    + if self.lowering.provenance { 2 } else { 0 };
                (atom.name.to_string(), pattern, arity)
            }
            None => ("+Tautology".to_string(), Vec::new(), 0),
        };
        Level::Aggregate {
            relation,
            function: agg.op,
            target: agg.target.clone(),
            pattern,
            arity,
            extra_literals: body,
        }
    }

    // ------------------------------------------------------------------
    // wrapping
    // ------------------------------------------------------------------

    fn wrap_level(&self, level_idx: usize, body: Operation) -> Option<Operation> {
        match &self.levels[level_idx] {
            Level::Atom { relation, pattern, arity } => {
                let mut inner = body;
                for &(level, pos, first_pos) in
                    self.same_level_eq.iter().filter(|(l, _, _)| *l == level_idx).rev()
                {
                    inner = Operation::Filter {
                        condition: Condition::Constraint {
                            op: ConstraintOp::Eq,
                            lhs: Expression::TupleElement { tuple_id: level, element: pos },
                            rhs: Expression::TupleElement { tuple_id: level, element: first_pos },
                        },
                        body: Box::new(inner),
                    };
                }
                self.wrap_scan(relation, pattern, *arity, level_idx, inner)
            }
            Level::Aggregate { relation, function, target, pattern, arity, extra_literals } => {
                let target_expr = match target {
                    Some(arg) => self.translate_value(arg)?,
                    None => Expression::Undef,
                };
                let mut conditions: Vec<Condition> = Vec::new();
                for literal in extra_literals {
                    // further atoms of the aggregate body reduce to
                    // existence checks over their (bound) arguments
                    if let Literal::Atom(atom) = literal {
                        let mut check_pattern = Vec::with_capacity(atom.args.len());
                        for arg in &atom.args {
                            check_pattern.push(match arg {
                                Argument::UnnamedVariable => Expression::Undef,
                                other => self.translate_value(other)?,
                            });
                        }
                        if self.lowering.provenance {
                            check_pattern.push(Expression::Undef);
                            check_pattern.push(Expression::Undef);
                        }
                        conditions.push(Condition::ExistenceCheck {
                            relation: atom.name.to_string(),
                            pattern: check_pattern,
                        });
                        continue;
                    }
                    let (_, condition) = self.translate_filter(literal)?;
                    conditions.push(condition);
                }
                let condition = Condition::conjoin(conditions);
                let (is_indexed, range) = self.pattern_to_range(pattern, *arity)?;
                if is_indexed {
                    Some(Operation::IndexAggregate {
                        relation: relation.clone(),
                        tuple_id: level_idx,
                        function: *function,
                        expression: target_expr,
                        pattern: range,
                        condition,
                        body: Box::new(body),
                    })
                } else {
                    Some(Operation::Aggregate {
                        relation: relation.clone(),
                        tuple_id: level_idx,
                        function: *function,
                        expression: target_expr,
                        condition,
                        body: Box::new(body),
                    })
                }
            }
            Level::Unpack { source, arity, entries } => {
                let mut wrapped = body;
                // element constraints become filters inside the unpack
                for (pos, entry) in entries.iter().enumerate().rev() {
                    if let PatternEntry::Bound(arg) = entry {
                        let value = self.translate_value(arg)?;
                        wrapped = Operation::Filter {
                            condition: Condition::Constraint {
                                op: ConstraintOp::Eq,
                                lhs: Expression::TupleElement {
                                    tuple_id: level_idx,
                                    element: pos,
                                },
                                rhs: value,
                            },
                            body: Box::new(wrapped),
                        };
                    }
                }
                Some(Operation::UnpackRecord {
                    expression: Expression::TupleElement {
                        tuple_id: source.0,
                        element: source.1,
                    },
                    arity: *arity,
                    tuple_id: level_idx,
                    body: Box::new(wrapped),
                })
            }
            Level::Generator { op, args } => {
                let args: Option<Vec<Expression>> =
                    args.iter().map(|a| self.translate_value(a)).collect();
                Some(Operation::NestedIntrinsicOperator {
                    op: *op,
                    args: args?,
                    tuple_id: level_idx,
                    body: Box::new(body),
                })
            }
        }
    }

    fn wrap_scan(
        &self,
        relation: &str,
        pattern: &[PatternEntry],
        arity: usize,
        level_idx: usize,
        body: Operation,
    ) -> Option<Operation> {
        match self.pattern_to_range(pattern, arity)? {
            (true, range) => Some(Operation::IndexScan {
                relation: relation.to_string(),
                tuple_id: level_idx,
                pattern: range,
                body: Box::new(body),
            }),
            (false, _) => Some(Operation::Scan {
                relation: relation.to_string(),
                tuple_id: level_idx,
                body: Box::new(body),
            }),
        }
    }

    /// Convert a pattern into index bounds. Returns (uses-index, range);
    /// `None` when a bound value fails to translate.
    fn pattern_to_range(
        &self,
        pattern: &[PatternEntry],
        arity: usize,
    ) -> Option<(bool, RangePattern)> {
        let mut range = RangePattern::open(arity);
        let mut any_bound = false;
        for (pos, entry) in pattern.iter().enumerate() {
            if let PatternEntry::Bound(arg) = entry {
                let value = self.translate_value(arg)?;
                range.lower[pos] = value.clone();
                range.upper[pos] = value;
                any_bound = true;
            }
        }
        Some((any_bound, range))
    }

    // ------------------------------------------------------------------
    // filters, negations, head
    // ------------------------------------------------------------------

    /// Translate a residual body literal into a condition plus the level
    /// after which it can be evaluated.
    fn translate_filter(&self, literal: &Literal) -> Option<(usize, Condition)> {
        match literal {
            Literal::BooleanConstraint(true) => Some((0, Condition::True)),
            Literal::BooleanConstraint(false) => Some((0, Condition::False)),
            Literal::BinaryConstraint { op, lhs, rhs } => {
                let level = self
                    .latest_level(lhs.variables().into_iter().chain(rhs.variables()));
                let condition = Condition::Constraint {
                    op: *op,
                    lhs: self.translate_value(lhs)?,
                    rhs: self.translate_value(rhs)?,
                };
                Some((level, condition))
            }
            Literal::Negation(atom) => {
                let level = self.latest_level(atom.variables().into_iter());
                let base_arity = self.lowering.arity_of(&atom.name);
                let mut pattern: Vec<Expression> = Vec::with_capacity(base_arity);
                for arg in &atom.args {
                    pattern.push(match arg {
                        Argument::UnnamedVariable => Expression::Undef,
                        other => self.translate_value(other)?,
                    });
                }
                let condition = if self.lowering.provenance {
                    pattern.push(Expression::Undef);
                    pattern.push(Expression::Undef);
                    Condition::ProvenanceExistenceCheck {
                        relation: atom.name.to_string(),
                        pattern,
                    }
                } else {
                    Condition::ExistenceCheck { relation: atom.name.to_string(), pattern }
                };
                Some((level, Condition::Negation(Box::new(condition))))
            }
            Literal::Atom(_) => None,
        }
    }

    /// The earliest level at which all the given variables are bound
    fn latest_level(&self, vars: impl Iterator<Item = String>) -> usize {
        let mut level = 0;
        for var in vars {
            if let Some(&(var_level, _)) = self.bindings.get(&var) {
                level = level.max(var_level + 1);
            } else {
                // unbound variables evaluate at the innermost position
                return self.levels.len();
            }
        }
        level
    }

    fn head_insert(&self, rule_index: usize) -> Option<Operation> {
        let head = &self.clause.head;
        let mut values: Vec<Expression> = Vec::with_capacity(head.args.len());
        for arg in &head.args {
            values.push(self.translate_value(arg)?);
        }

        if self.lowering.provenance {
            values.push(Expression::Number(rule_index as i64));
            values.push(self.level_expression());
        }

        match self.recursive_target {
            Some((member, _)) => {
                // insert new knowledge only
                let guard_arity = self.lowering.arity_of(member);
                let mut guard_pattern: Vec<Expression> = values[..guard_arity].to_vec();
                let guard = if self.lowering.provenance {
                    guard_pattern.push(Expression::Undef);
                    guard_pattern.push(Expression::Undef);
                    Condition::ProvenanceExistenceCheck {
                        relation: member.to_string(),
                        pattern: guard_pattern,
                    }
                } else {
                    Condition::ExistenceCheck {
                        relation: member.to_string(),
                        pattern: guard_pattern,
                    }
                };
                Some(Operation::Filter {
                    condition: Condition::Negation(Box::new(guard)),
                    body: Box::new(Operation::Insert {
                        relation: new_name(member),
                        values,
                    }),
                })
            }
            None => Some(Operation::Insert {
                relation: head.name.to_string(),
                values,
            }),
        }
    }

    /// The provenance level column: one past the maximum body level
    fn level_expression(&self) -> Expression {
        let mut levels: Vec<Expression> = Vec::new();
        for (idx, level) in self.levels.iter().enumerate() {
            if let Level::Atom { arity, .. } = level {
                if *arity >= 2 {
                    levels.push(Expression::TupleElement {
                        tuple_id: idx,
                        element: arity - 1,
                    });
                }
            }
        }
        if levels.is_empty() {
            return Expression::Number(0);
        }
        let max = levels
            .into_iter()
            .reduce(|a, b| Expression::IntrinsicOperator {
                op: crate::ast::IntrinsicOp::Max,
                args: vec![a, b],
            })
            .unwrap_or(Expression::Number(0));
        Expression::IntrinsicOperator {
            op: crate::ast::IntrinsicOp::Add,
            args: vec![max, Expression::Number(1)],
        }
    }

    // ------------------------------------------------------------------
    // values
    // ------------------------------------------------------------------

    /// Translate an AST value into a RAM expression under the current
    /// bindings. `None` when the value is not representable (unbound
    /// variable without substitution, aggregator in value position).
    fn translate_value(&self, arg: &Argument) -> Option<Expression> {
        self.translate_value_depth(arg, 0)
    }

    fn translate_value_depth(&self, arg: &Argument, depth: usize) -> Option<Expression> {
        // substitution chains are finite in well-formed clauses; the cap
        // rejects mutually recursive bindings instead of overflowing
        if depth > 64 {
            return None;
        }
        let depth = depth + 1;
        match arg {
            Argument::Variable(name) => {
                if let Some(&(level, element)) = self.bindings.get(name) {
                    return Some(Expression::TupleElement { tuple_id: level, element });
                }
                // substituted functor bindings evaluate inline
                let term = self.functor_bindings.get(name)?;
                self.translate_value_depth(term, depth)
            }
            Argument::UnnamedVariable => Some(Expression::Undef),
            Argument::NumericConstant(value) => Some(Expression::Number(match value {
                NumericValue::Int(v) => *v,
                NumericValue::Unsigned(v) => crate::ram::unsigned_to_ram(*v),
                NumericValue::Float(bits) => *bits as i64,
            })),
            Argument::StringConstant(text) => Some(Expression::StringConstant(text.clone())),
            Argument::NilConstant => Some(Expression::Number(0)),
            Argument::RecordInit(args) => {
                let translated: Option<Vec<Expression>> =
                    args.iter().map(|a| self.translate_value_depth(a, depth)).collect();
                Some(Expression::PackRecord(translated?))
            }
            Argument::BranchInit { branch, args } => {
                let mut translated = vec![Expression::StringConstant(branch.clone())];
                for a in args {
                    translated.push(self.translate_value_depth(a, depth)?);
                }
                Some(Expression::PackRecord(translated))
            }
            Argument::IntrinsicFunctor { op, args } => {
                if op.is_multi_result() {
                    return None;
                }
                let translated: Option<Vec<Expression>> =
                    args.iter().map(|a| self.translate_value_depth(a, depth)).collect();
                Some(Expression::IntrinsicOperator { op: *op, args: translated? })
            }
            Argument::UserDefinedFunctor { name, args } => {
                let translated: Option<Vec<Expression>> =
                    args.iter().map(|a| self.translate_value_depth(a, depth)).collect();
                Some(Expression::UserDefinedOperator { name: name.clone(), args: translated? })
            }
            Argument::TypeCast { value, .. } => self.translate_value_depth(value, depth),
            Argument::Aggregator(_) => None,
        }
    }
}
