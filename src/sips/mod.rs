//! # Sideways Information Passing
//!
//! The binding store tracks which clause variables are bound at each
//! point of a candidate atom schedule; the SIPS metrics turn that state
//! into per-atom costs, and `SipsMetric::get_reordering` greedily picks
//! the cheapest atom until the body is fully scheduled.
//!
//! Metrics are selected by name through the configuration (`sips` for
//! the rewrite pipeline, `ram_sips` for lowering); unknown names fall
//! back to `all-bound`.

use crate::analysis::{IoType, ProfileUse, RelationDetailCache, TranslationUnit};
use crate::ast::{Argument, Atom, Clause, Literal, QualifiedName};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

/// Name prefix of the per-iteration delta relations introduced by the
/// seminaive lowering.
pub fn is_delta_relation(name: &QualifiedName) -> bool {
    name.segments()
        .first()
        .map(|s| s.starts_with("@delta_"))
        .unwrap_or(false)
}

// ============================================================================
// BindingStore
// ============================================================================

/// Tracks the binding state of the variables of one clause.
///
/// A variable is bound when it is strongly bound (grounded by a body
/// atom or an explicit bind), weakly bound, or when all members of at
/// least one of its dependency conjunctions are bound. The store
/// reduces dependencies to a fixpoint on every new binding.
#[derive(Debug, Default)]
pub struct BindingStore {
    strongly_bound: BTreeSet<String>,
    weakly_bound: BTreeSet<String>,
    /// var -> disjunction of conjunctions: the var becomes bound when
    /// every member of some conjunction is bound
    dependencies: BTreeMap<String, BTreeSet<BTreeSet<String>>>,
}

impl BindingStore {
    /// Build the store for a clause: variables appearing as functorless
    /// arguments in body atoms or records are strongly bound, and every
    /// equality constraint contributes binding dependencies.
    pub fn new(clause: &Clause) -> Self {
        let mut store = BindingStore::default();
        for atom in clause.body_atoms() {
            for arg in &atom.args {
                store.collect_base_bindings(arg);
            }
        }
        store.generate_dependencies(clause);
        store.reduce_dependencies();
        store
    }

    fn collect_base_bindings(&mut self, arg: &Argument) {
        match arg {
            Argument::Variable(name) => {
                self.strongly_bound.insert(name.clone());
            }
            Argument::RecordInit(args) | Argument::BranchInit { args, .. } => {
                for inner in args {
                    self.collect_base_bindings(inner);
                }
            }
            _ => {}
        }
    }

    fn generate_dependencies(&mut self, clause: &Clause) {
        for lit in &clause.body {
            if let Literal::BinaryConstraint { op, lhs, rhs } = lit {
                if op.is_equality() {
                    self.process_equality(lhs, rhs);
                    self.process_equality(rhs, lhs);
                }
            }
        }
    }

    /// Bindings formed on `lhs` by an equality `lhs = rhs`
    fn process_equality(&mut self, lhs: &Argument, rhs: &Argument) {
        if let Argument::Variable(name) = lhs {
            // generators do not transfer bindings backwards
            if rhs.is_generator() {
                return;
            }
            let dependency: BTreeSet<String> = rhs.variables().into_iter().collect();
            self.add_binding_dependency(name.clone(), dependency);
            // a bound record grounds its elements
            if let Argument::RecordInit(args) = rhs {
                for arg in args {
                    if let Argument::Variable(element) = arg {
                        let mut conj = BTreeSet::new();
                        conj.insert(name.clone());
                        self.add_binding_dependency(element.clone(), conj);
                    }
                }
            }
        }
    }

    fn add_binding_dependency(&mut self, variable: String, dependency: BTreeSet<String>) {
        self.dependencies.entry(variable).or_default().insert(dependency);
    }

    /// Mark the variable as strongly bound and propagate
    pub fn bind_strongly(&mut self, name: &str) {
        self.strongly_bound.insert(name.to_string());
        self.reduce_dependencies();
    }

    /// Mark the variable as weakly bound. Weakly bound variables count
    /// as bound but cannot ground functor arguments.
    pub fn bind_weakly(&mut self, name: &str) {
        self.weakly_bound.insert(name.to_string());
    }

    /// Check whether the named variable is bound
    pub fn is_bound_var(&self, name: &str) -> bool {
        self.strongly_bound.contains(name) || self.weakly_bound.contains(name)
    }

    /// Check whether an argument is bound: constants are always bound,
    /// variables per the store, composite terms when all parts are.
    /// Functor arguments require strong bindings; weakly bound
    /// variables cannot ground them.
    pub fn is_bound(&self, arg: &Argument) -> bool {
        match arg {
            Argument::Variable(name) => self.is_bound_var(name),
            Argument::UnnamedVariable => false,
            Argument::NumericConstant(_)
            | Argument::StringConstant(_)
            | Argument::NilConstant => true,
            Argument::RecordInit(args) | Argument::BranchInit { args, .. } => {
                args.iter().all(|a| self.is_bound(a))
            }
            Argument::IntrinsicFunctor { args, .. }
            | Argument::UserDefinedFunctor { args, .. } => {
                args.iter().all(|a| self.is_strongly_bound(a))
            }
            Argument::TypeCast { value, .. } => self.is_bound(value),
            Argument::Aggregator(_) => false,
        }
    }

    fn is_strongly_bound(&self, arg: &Argument) -> bool {
        match arg {
            Argument::Variable(name) => self.strongly_bound.contains(name),
            Argument::Aggregator(_) | Argument::UnnamedVariable => false,
            Argument::RecordInit(args)
            | Argument::BranchInit { args, .. }
            | Argument::IntrinsicFunctor { args, .. }
            | Argument::UserDefinedFunctor { args, .. } => {
                args.iter().all(|a| self.is_strongly_bound(a))
            }
            Argument::TypeCast { value, .. } => self.is_strongly_bound(value),
            _ => true,
        }
    }

    /// Count the bound arguments of the given atom
    pub fn num_bound_arguments(&self, atom: &Atom) -> usize {
        atom.args.iter().filter(|arg| self.is_bound(arg)).count()
    }

    /// Reduce dependencies against the current bound set until no new
    /// variable becomes bound.
    fn reduce_dependencies(&mut self) {
        loop {
            let mut newly_bound = Vec::new();
            let mut reduced: BTreeMap<String, BTreeSet<BTreeSet<String>>> = BTreeMap::new();
            for (variable, disjunction) in &self.dependencies {
                if self.is_bound_var(variable) {
                    continue;
                }
                let mut new_disjunction = BTreeSet::new();
                let mut satisfied = false;
                for conjunction in disjunction {
                    let remaining: BTreeSet<String> = conjunction
                        .iter()
                        .filter(|v| !self.is_bound_var(v))
                        .cloned()
                        .collect();
                    if remaining.is_empty() {
                        satisfied = true;
                        break;
                    }
                    new_disjunction.insert(remaining);
                }
                if satisfied {
                    newly_bound.push(variable.clone());
                } else {
                    reduced.insert(variable.clone(), new_disjunction);
                }
            }
            self.dependencies = reduced;
            if newly_bound.is_empty() {
                break;
            }
            for variable in newly_bound {
                self.strongly_bound.insert(variable);
            }
        }
    }
}

// ============================================================================
// SIPS metrics
// ============================================================================

/// Cost heuristics for choosing the next atom in a schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Strict,
    AllBound,
    Naive,
    MaxBound,
    MaxBoundDelta,
    MaxRatio,
    LeastFree,
    LeastFreeVars,
    ProfileUse,
    Delta,
    Input,
    DeltaInput,
}

/// A SIPS cost model over clause bodies.
///
/// `get_reordering` returns the permutation `v` with `v[i] = j` iff the
/// atom at body position `j` is scheduled at position `i`. The result is
/// deterministic for identical (clause, metric, profile) inputs.
pub struct SipsMetric {
    strategy: Strategy,
    profile: Option<Rc<ProfileUse>>,
    detail: Option<Rc<RelationDetailCache>>,
    io_types: Option<Rc<IoType>>,
}

impl SipsMetric {
    /// Create a SIPS metric by heuristic name; unknown names fall back
    /// to `all-bound`.
    pub fn create(heuristic: &str, tu: &TranslationUnit) -> SipsMetric {
        let strategy = match heuristic {
            "strict" => Strategy::Strict,
            "all-bound" => Strategy::AllBound,
            "naive" => Strategy::Naive,
            "max-bound" => Strategy::MaxBound,
            "max-bound-delta" => Strategy::MaxBoundDelta,
            "max-ratio" => Strategy::MaxRatio,
            "least-free" => Strategy::LeastFree,
            "least-free-vars" => Strategy::LeastFreeVars,
            "profile-use" => Strategy::ProfileUse,
            "delta" => Strategy::Delta,
            "input" => Strategy::Input,
            "delta-input" => Strategy::DeltaInput,
            _ => Strategy::AllBound,
        };
        let profile = matches!(strategy, Strategy::ProfileUse)
            .then(|| tu.get_analysis::<ProfileUse>());
        let needs_io = matches!(strategy, Strategy::Input | Strategy::DeltaInput);
        let detail = needs_io.then(|| tu.get_analysis::<RelationDetailCache>());
        let io_types = needs_io.then(|| tu.get_analysis::<IoType>());
        SipsMetric { strategy, profile, detail, io_types }
    }

    /// Determine the new ordering of a clause under this metric
    pub fn get_reordering(&self, clause: &Clause) -> Vec<usize> {
        let mut store = BindingStore::new(clause);
        let mut atoms: Vec<Option<&Atom>> = clause.body_atoms().into_iter().map(Some).collect();
        let mut new_order = Vec::with_capacity(atoms.len());

        while new_order.len() < atoms.len() {
            let costs = self.evaluate_costs(&atoms, &store);
            // ties resolve to the first (left-most) minimum
            let min_idx = costs
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let next_atom = atoms[min_idx].expect("scheduled atoms carry maximal cost");
            for var in next_atom.variables() {
                store.bind_strongly(&var);
            }
            new_order.push(min_idx);
            atoms[min_idx] = None;
        }

        new_order
    }

    fn evaluate_costs(&self, atoms: &[Option<&Atom>], store: &BindingStore) -> Vec<f64> {
        atoms
            .iter()
            .map(|atom| match atom {
                None => f64::MAX,
                Some(atom) => self.cost_of(atom, store),
            })
            .collect()
    }

    fn cost_of(&self, atom: &Atom, store: &BindingStore) -> f64 {
        let arity = atom.arity();
        let num_bound = store.num_bound_arguments(atom);
        match self.strategy {
            Strategy::Strict => 0.0,
            Strategy::AllBound => {
                if arity == num_bound {
                    0.0
                } else {
                    1.0
                }
            }
            Strategy::Naive => {
                if arity == num_bound {
                    0.0
                } else if num_bound >= 1 {
                    1.0
                } else {
                    2.0
                }
            }
            Strategy::MaxBound => {
                if arity == num_bound {
                    0.0
                } else if num_bound == 0 {
                    2.0
                } else {
                    1.0 / num_bound as f64
                }
            }
            Strategy::MaxBoundDelta => {
                // deltas break ties without overriding the bound-count factor
                let delta = if is_delta_relation(&atom.name) { 0.0 } else { 0.0001 };
                if arity == num_bound {
                    delta
                } else if num_bound == 0 {
                    delta + 3.0
                } else {
                    delta + 1.0 + 1.0 / num_bound as f64
                }
            }
            Strategy::MaxRatio => {
                if arity == 0 {
                    0.0
                } else if num_bound == 0 {
                    2.0
                } else {
                    1.0 - num_bound as f64 / arity as f64
                }
            }
            Strategy::LeastFree => (arity - num_bound) as f64,
            Strategy::LeastFreeVars => {
                let mut free_vars = BTreeSet::new();
                for var in atom.variables() {
                    if !store.is_bound_var(&var) {
                        free_vars.insert(var);
                    }
                }
                free_vars.len() as f64
            }
            Strategy::ProfileUse => {
                // propositions always come first
                if arity == 0 {
                    return 0.0;
                }
                let size = self
                    .profile
                    .as_ref()
                    .map(|p| p.relation_size(&atom.name))
                    .unwrap_or(usize::MAX);
                let num_free = arity - num_bound;
                (size as f64).ln() * (num_free as f64 / arity as f64)
            }
            Strategy::Delta => {
                if arity == num_bound {
                    0.0
                } else if is_delta_relation(&atom.name) {
                    1.0
                } else {
                    2.0
                }
            }
            Strategy::Input => {
                if arity == num_bound {
                    0.0
                } else if self.is_input(&atom.name) {
                    1.0
                } else {
                    2.0
                }
            }
            Strategy::DeltaInput => {
                if arity == num_bound {
                    0.0
                } else if is_delta_relation(&atom.name) {
                    1.0
                } else if self.is_input(&atom.name) {
                    2.0
                } else {
                    3.0
                }
            }
        }
    }

    fn is_input(&self, name: &QualifiedName) -> bool {
        match (&self.detail, &self.io_types) {
            (Some(detail), Some(io)) => {
                detail.relation(name).map(|rel| io.is_input(&rel.name)).unwrap_or(false)
            }
            _ => false,
        }
    }
}
