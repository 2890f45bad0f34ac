//! # Index Analysis - Minimum Index Cover
//!
//! Computes, per relation, the minimum set of total index orders such
//! that every search used against the relation is a prefix of some
//! order. Searches form a partial order under subsumption; by
//! Dilworth's theorem the minimum chain cover of that order equals
//! `|searches| - |maximum matching|` in the derived bipartite graph,
//! and each chain becomes one lexicographic index.
//!
//! See "Automatic Index Selection for Large-Scale Datalog Computation"
//! (VLDB'19) for the underlying theory.

use crate::ast::RelationRepresentation;
use crate::ram::{Condition, Expression, Operation, RamProgram, RangePattern, Statement, TypeAttribute};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

// ============================================================================
// Search signatures
// ============================================================================

/// Constraint kind of one attribute within a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeConstraint {
    None,
    Inequal,
    Equal,
}

/// The signature of a search against a relation: one constraint per
/// attribute position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SearchSignature {
    constraints: Vec<AttributeConstraint>,
}

impl SearchSignature {
    /// An unconstrained signature of the given arity
    pub fn new(arity: usize) -> Self {
        SearchSignature { constraints: vec![AttributeConstraint::None; arity] }
    }

    /// The all-equality signature of the given arity
    pub fn full(arity: usize) -> Self {
        SearchSignature { constraints: vec![AttributeConstraint::Equal; arity] }
    }

    pub fn arity(&self) -> usize {
        self.constraints.len()
    }

    pub fn get(&self, pos: usize) -> AttributeConstraint {
        self.constraints[pos]
    }

    pub fn set(&mut self, pos: usize, constraint: AttributeConstraint) {
        self.constraints[pos] = constraint;
    }

    /// Whether no attribute is constrained
    pub fn is_empty(&self) -> bool {
        self.constraints.iter().all(|c| *c == AttributeConstraint::None)
    }

    /// Partial order on searches: `self` precedes `other` when every
    /// position is at most as constrained, with equality dominating
    /// inequality (`None < Inequal < Equal`).
    pub fn precedes(&self, other: &SearchSignature) -> bool {
        self.constraints
            .iter()
            .zip(other.constraints.iter())
            .all(|(own, their)| own <= their)
    }

    /// Positions newly constrained in `new` relative to `old`
    pub fn delta(new: &SearchSignature, old: &SearchSignature) -> SearchSignature {
        let constraints = new
            .constraints
            .iter()
            .zip(old.constraints.iter())
            .map(|(n, o)| {
                if *o == AttributeConstraint::None {
                    *n
                } else {
                    AttributeConstraint::None
                }
            })
            .collect();
        SearchSignature { constraints }
    }

    /// Drop constraints the storage cannot serve: inequalities in
    /// provenance mode, float equalities and unsigned inequalities in
    /// the tree-walking engine. Discharged positions become runtime
    /// filters instead of index bounds.
    pub fn discharge(&self, types: &[TypeAttribute], provenance: bool) -> SearchSignature {
        let constraints = self
            .constraints
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let ty = types.get(i).copied().unwrap_or(TypeAttribute::Signed);
                match c {
                    AttributeConstraint::Inequal if provenance => AttributeConstraint::None,
                    AttributeConstraint::Inequal if ty == TypeAttribute::Unsigned => {
                        AttributeConstraint::None
                    }
                    AttributeConstraint::Equal if ty == TypeAttribute::Float => {
                        AttributeConstraint::None
                    }
                    other => *other,
                }
            })
            .collect();
        SearchSignature { constraints }
    }
}

impl fmt::Display for SearchSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in &self.constraints {
            let ch = match c {
                AttributeConstraint::None => '_',
                AttributeConstraint::Inequal => '<',
                AttributeConstraint::Equal => '=',
            };
            write!(f, "{ch}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Maximum matching (Hopcroft-Karp)
// ============================================================================

type Node = u32;
const NULL_VERTEX: Node = 0;
const INFINITE_DISTANCE: i64 = -1;

/// Maximum matching over the bipartite subsumption graph.
///
/// Left and right partitions hold one node per search; an edge from
/// `s_L` to `t_R` exists when `s` strictly precedes `t`.
#[derive(Debug, Default)]
pub struct MaxMatching {
    matchings: HashMap<Node, Node>,
    graph: HashMap<Node, BTreeSet<Node>>,
    distance: HashMap<Node, i64>,
}

impl MaxMatching {
    pub fn new() -> Self {
        MaxMatching::default()
    }

    /// Add an edge from a search node to a subsuming search node
    pub fn add_edge(&mut self, u: Node, v: Node) {
        self.graph.entry(u).or_default().insert(v);
    }

    /// Number of matched pairs
    pub fn num_matchings(&self) -> usize {
        self.matchings.len() / 2
    }

    /// The matched partner of a node, `NULL_VERTEX` when unmatched
    pub fn get_match(&self, v: Node) -> Node {
        self.matchings.get(&v).copied().unwrap_or(NULL_VERTEX)
    }

    fn get_distance(&self, v: Node) -> i64 {
        self.distance.get(&v).copied().unwrap_or(INFINITE_DISTANCE)
    }

    fn bf_search(&mut self) -> bool {
        let mut queue: VecDeque<Node> = VecDeque::new();
        let lefts: Vec<Node> = self.graph.keys().copied().collect();
        for u in &lefts {
            if self.get_match(*u) == NULL_VERTEX {
                self.distance.insert(*u, 0);
                queue.push_back(*u);
            } else {
                self.distance.insert(*u, INFINITE_DISTANCE);
            }
        }
        self.distance.insert(NULL_VERTEX, INFINITE_DISTANCE);
        while let Some(u) = queue.pop_front() {
            if u == NULL_VERTEX {
                continue;
            }
            let edges: Vec<Node> = self
                .graph
                .get(&u)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            for v in edges {
                let w = self.get_match(v);
                if self.get_distance(w) == INFINITE_DISTANCE {
                    let base = self.get_distance(u);
                    self.distance.insert(w, base + 1);
                    queue.push_back(w);
                }
            }
        }
        self.get_distance(NULL_VERTEX) != INFINITE_DISTANCE
    }

    fn df_search(&mut self, u: Node) -> bool {
        if u == NULL_VERTEX {
            return true;
        }
        let edges: Vec<Node> = self
            .graph
            .get(&u)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        for v in edges {
            let w = self.get_match(v);
            if self.get_distance(w) == self.get_distance(u) + 1 && self.df_search(w) {
                self.matchings.insert(u, v);
                self.matchings.insert(v, u);
                return true;
            }
        }
        self.distance.insert(u, INFINITE_DISTANCE);
        false
    }

    /// Solve the matching problem; returns the match map
    pub fn solve(&mut self) -> &HashMap<Node, Node> {
        while self.bf_search() {
            let unmatched: Vec<Node> = self
                .graph
                .keys()
                .copied()
                .filter(|u| self.get_match(*u) == NULL_VERTEX)
                .collect();
            for u in unmatched {
                self.df_search(u);
            }
        }
        &self.matchings
    }
}

// ============================================================================
// Minimum index selection
// ============================================================================

/// A lexicographic index order: a permutation of attribute positions
pub type LexOrder = Vec<usize>;

/// Maps searches to their node pair in the bipartite graph
#[derive(Debug, Default)]
struct SearchBipartiteMap {
    current: Node,
    to_left: HashMap<SearchSignature, Node>,
    to_right: HashMap<SearchSignature, Node>,
    from_node: HashMap<Node, SearchSignature>,
}

impl SearchBipartiteMap {
    fn new() -> Self {
        SearchBipartiteMap { current: 1, ..Default::default() }
    }

    fn add_search(&mut self, s: &SearchSignature) {
        self.to_left.insert(s.clone(), self.current);
        self.to_right.insert(s.clone(), self.current + 1);
        self.from_node.insert(self.current, s.clone());
        self.from_node.insert(self.current + 1, s.clone());
        self.current += 2;
    }

    fn left(&self, s: &SearchSignature) -> Node {
        self.to_left[s]
    }

    fn right(&self, s: &SearchSignature) -> Node {
        self.to_right[s]
    }

    fn search(&self, node: Node) -> &SearchSignature {
        &self.from_node[&node]
    }
}

/// The result of index selection for one relation: every search mapped
/// to the index order that serves it.
#[derive(Debug, Clone)]
pub struct IndexCluster {
    searches: Vec<SearchSignature>,
    orders: Vec<LexOrder>,
    selection: BTreeMap<SearchSignature, usize>,
}

impl IndexCluster {
    /// All chosen index orders
    pub fn orders(&self) -> &[LexOrder] {
        &self.orders
    }

    /// The searches that were covered
    pub fn searches(&self) -> &[SearchSignature] {
        &self.searches
    }

    /// Index position serving the given search
    pub fn index_of(&self, search: &SearchSignature) -> Option<usize> {
        self.selection.get(search).copied()
    }

    /// The order serving the given search
    pub fn order_for(&self, search: &SearchSignature) -> Option<&LexOrder> {
        self.index_of(search).map(|i| &self.orders[i])
    }
}

/// Compute the minimal index cover for one relation's search set
pub fn solve_min_cover(searches: &BTreeSet<SearchSignature>, arity: usize) -> IndexCluster {
    // no searches: a single default order serves everything
    let meaningful: Vec<SearchSignature> =
        searches.iter().filter(|s| !s.is_empty()).cloned().collect();
    if meaningful.is_empty() {
        return IndexCluster {
            searches: searches.iter().cloned().collect(),
            orders: vec![(0..arity).collect()],
            selection: searches.iter().cloned().map(|s| (s, 0)).collect(),
        };
    }

    // bipartite subsumption graph
    let mut mapping = SearchBipartiteMap::new();
    for s in &meaningful {
        mapping.add_search(s);
    }
    let mut matching = MaxMatching::new();
    for s in &meaningful {
        for t in &meaningful {
            if s != t && s.precedes(t) {
                matching.add_edge(mapping.left(s), mapping.right(t));
            }
        }
        // every left node participates even without edges
        matching.graph.entry(mapping.left(s)).or_default();
    }
    matching.solve();

    // chains: from every unmatched left node, walk matched edges down
    let mut chains: Vec<Vec<SearchSignature>> = Vec::new();
    for s in &meaningful {
        if matching.get_match(mapping.left(s)) != NULL_VERTEX {
            continue;
        }
        let mut chain = Vec::new();
        let mut cur = s.clone();
        loop {
            let below = matching.get_match(mapping.right(&cur));
            chain.push(cur.clone());
            if below == NULL_VERTEX {
                break;
            }
            cur = mapping.search(below).clone();
        }
        chain.reverse();
        chains.push(chain);
    }

    // each chain yields one lexicographic order: the first signature's
    // attributes, then each delta, equalities before inequalities,
    // padded to a total order
    let mut orders: Vec<LexOrder> = Vec::new();
    let mut selection: BTreeMap<SearchSignature, usize> = BTreeMap::new();
    for chain in &chains {
        let mut ids: LexOrder = Vec::new();
        insert_index(&mut ids, &chain[0]);
        for window in chain.windows(2) {
            let delta = SearchSignature::delta(&window[1], &window[0]);
            insert_index(&mut ids, &delta);
        }
        for pos in 0..arity {
            if !ids.contains(&pos) {
                ids.push(pos);
            }
        }
        let order_idx = orders.len();
        orders.push(ids);
        for s in chain {
            selection.insert(s.clone(), order_idx);
        }
    }

    // empty searches ride on the first order
    for s in searches {
        if s.is_empty() {
            selection.insert(s.clone(), 0);
        }
    }
    if orders.is_empty() {
        orders.push((0..arity).collect());
    }

    IndexCluster {
        searches: searches.iter().cloned().collect(),
        orders,
        selection,
    }
}

/// Append a signature's attributes to a lex order: equality positions
/// in attribute order first, inequalities at the back.
fn insert_index(ids: &mut LexOrder, delta: &SearchSignature) {
    let mut backlog = Vec::new();
    for pos in 0..delta.arity() {
        match delta.get(pos) {
            AttributeConstraint::Equal => {
                if !ids.contains(&pos) {
                    ids.push(pos);
                }
            }
            AttributeConstraint::Inequal => backlog.push(pos),
            AttributeConstraint::None => {}
        }
    }
    for pos in backlog {
        if !ids.contains(&pos) {
            ids.push(pos);
        }
    }
}

// ============================================================================
// Program-wide analysis
// ============================================================================

/// Per-relation minimum index covers for a whole RAM program
#[derive(Debug)]
pub struct IndexAnalysis {
    clusters: BTreeMap<String, IndexCluster>,
}

impl IndexAnalysis {
    /// Collect every search in the program and solve the cover per
    /// relation.
    pub fn run(program: &RamProgram, provenance: bool) -> Self {
        let mut searches: BTreeMap<String, BTreeSet<SearchSignature>> = BTreeMap::new();
        for rel in &program.relations {
            searches.entry(rel.name.clone()).or_default();
        }

        let mut record = |relation: &str, signature: SearchSignature| {
            let types = program
                .relation(relation)
                .map(|r| r.attribute_types.clone())
                .unwrap_or_default();
            let discharged = signature.discharge(&types, provenance);
            if !discharged.is_empty() {
                searches.entry(relation.to_string()).or_default().insert(discharged);
            }
        };

        let mut visit_statement = |stmt: &Statement| {
            if let Statement::Query(op) = stmt {
                collect_operation_searches(op, &mut record);
            }
        };
        program.main.visit(&mut visit_statement);
        for sub in program.subroutines.values() {
            sub.visit(&mut visit_statement);
        }

        let mut clusters = BTreeMap::new();
        for (name, set) in &searches {
            let rel = program.relation(name);
            let arity = rel.map(|r| r.arity).unwrap_or(0);
            // equivalence relations fix the two-attribute total order
            if rel.map(|r| r.representation) == Some(RelationRepresentation::EqRel) {
                let mut selection = BTreeMap::new();
                for s in set {
                    selection.insert(s.clone(), 0);
                }
                clusters.insert(
                    name.clone(),
                    IndexCluster {
                        searches: set.iter().cloned().collect(),
                        orders: vec![vec![0, 1]],
                        selection,
                    },
                );
            } else {
                clusters.insert(name.clone(), solve_min_cover(set, arity));
            }
        }
        IndexAnalysis { clusters }
    }

    /// The cluster computed for a relation
    pub fn cluster(&self, relation: &str) -> Option<&IndexCluster> {
        self.clusters.get(relation)
    }
}

/// The search signature of an indexed operation's range pattern
pub fn signature_of_pattern(pattern: &RangePattern) -> SearchSignature {
    let arity = pattern.lower.len();
    let mut signature = SearchSignature::new(arity);
    for i in 0..arity {
        let lower = &pattern.lower[i];
        let upper = &pattern.upper[i];
        if lower.is_undef() && upper.is_undef() {
            continue;
        }
        if lower == upper {
            signature.set(i, AttributeConstraint::Equal);
        } else {
            signature.set(i, AttributeConstraint::Inequal);
        }
    }
    signature
}

/// The search signature of an existence check's pattern: equality on
/// every defined position.
pub fn signature_of_existence(pattern: &[Expression]) -> SearchSignature {
    let mut signature = SearchSignature::new(pattern.len());
    for (i, expr) in pattern.iter().enumerate() {
        if !expr.is_undef() {
            signature.set(i, AttributeConstraint::Equal);
        }
    }
    signature
}

fn collect_operation_searches<F: FnMut(&str, SearchSignature)>(op: &Operation, record: &mut F) {
    match op {
        Operation::IndexScan { relation, pattern, .. }
        | Operation::ParallelIndexScan { relation, pattern, .. }
        | Operation::IndexIfExists { relation, pattern, .. }
        | Operation::IndexAggregate { relation, pattern, .. } => {
            record(relation, signature_of_pattern(pattern));
        }
        _ => {}
    }
    match op {
        Operation::IfExists { condition, .. }
        | Operation::IndexIfExists { condition, .. }
        | Operation::Aggregate { condition, .. }
        | Operation::IndexAggregate { condition, .. }
        | Operation::Filter { condition, .. }
        | Operation::Break { condition, .. }
        | Operation::GuardedInsert { condition, .. } => {
            collect_condition_searches(condition, record);
        }
        _ => {}
    }
    if let Some(body) = op.nested() {
        collect_operation_searches(body, record);
    }
}

fn collect_condition_searches<F: FnMut(&str, SearchSignature)>(cond: &Condition, record: &mut F) {
    match cond {
        Condition::ExistenceCheck { relation, pattern } => {
            record(relation, signature_of_existence(pattern));
        }
        Condition::ProvenanceExistenceCheck { relation, pattern } => {
            // rule and level number columns are never index-constrained
            let mut signature = signature_of_existence(pattern);
            let arity = signature.arity();
            if arity >= 2 {
                signature.set(arity - 1, AttributeConstraint::None);
                signature.set(arity - 2, AttributeConstraint::None);
            }
            record(relation, signature);
        }
        _ => {
            for child in cond.children() {
                collect_condition_searches(child, record);
            }
        }
    }
}
