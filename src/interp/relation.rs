//! # Indexed In-Memory Relations
//!
//! The runtime representation of a relation: one ordered tuple set per
//! lexicographic index from the index analysis, guarded by a
//! reader-writer lock so scans and inserts can proceed concurrently.
//! Equivalence relations store a union-find structure instead and
//! enumerate their pair closure on demand.
//!
//! A [`View`] binds a relation to one index for the duration of a
//! parallel region; views are created per worker and must not cross
//! thread boundaries (they are deliberately cheap to create).

use crate::ast::RelationRepresentation;
use crate::ram::RamDomain;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A runtime tuple
pub type Tuple = Vec<RamDomain>;

/// A lexicographic order over attribute positions
pub type LexOrder = Vec<usize>;

/// Static description of a relation instance to create
#[derive(Debug, Clone, PartialEq)]
pub struct RelationSpec {
    pub name: String,
    pub arity: usize,
    pub representation: RelationRepresentation,
    pub orders: Vec<LexOrder>,
    /// Insertion cap from a limitsize directive; `None` = unbounded
    pub limit: Option<usize>,
}

#[derive(Debug)]
enum RelationData {
    /// One B-tree set per index; tuples are stored permuted into the
    /// index order so set order equals index order
    Indexed(Vec<BTreeSet<Tuple>>),
    /// Union-find over elements for arity-2 equivalence relations
    EqRel(EqRelData),
}

#[derive(Debug, Default)]
struct EqRelData {
    parent: BTreeMap<RamDomain, RamDomain>,
}

impl EqRelData {
    fn find(&self, x: RamDomain) -> Option<RamDomain> {
        let mut cur = *self.parent.get(&x)?;
        while let Some(&next) = self.parent.get(&cur) {
            if next == cur {
                break;
            }
            cur = next;
        }
        Some(cur)
    }

    fn union(&mut self, a: RamDomain, b: RamDomain) {
        let ra = match self.find(a) {
            Some(r) => r,
            None => {
                self.parent.insert(a, a);
                a
            }
        };
        let rb = match self.find(b) {
            Some(r) => r,
            None => {
                self.parent.insert(b, b);
                b
            }
        };
        if ra != rb {
            self.parent.insert(rb, ra);
        }
    }

    fn classes(&self) -> Vec<Vec<RamDomain>> {
        let mut groups: BTreeMap<RamDomain, Vec<RamDomain>> = BTreeMap::new();
        for &element in self.parent.keys() {
            if let Some(root) = self.find(element) {
                groups.entry(root).or_default().push(element);
            }
        }
        groups.into_values().collect()
    }

    fn pairs(&self) -> Vec<Tuple> {
        let mut out = Vec::new();
        for class in self.classes() {
            for &a in &class {
                for &b in &class {
                    out.push(vec![a, b]);
                }
            }
        }
        out.sort();
        out
    }

    fn same_class(&self, a: RamDomain, b: RamDomain) -> bool {
        match (self.find(a), self.find(b)) {
            (Some(ra), Some(rb)) => ra == rb,
            _ => false,
        }
    }

    fn size(&self) -> usize {
        self.classes().iter().map(|c| c.len() * c.len()).sum()
    }
}

/// A relation instance with its index set
#[derive(Debug)]
pub struct Relation {
    spec: RelationSpec,
    data: RwLock<RelationData>,
}

impl Relation {
    /// Create an empty relation per the given spec
    pub fn new(spec: RelationSpec) -> Self {
        let data = if spec.representation == RelationRepresentation::EqRel {
            RelationData::EqRel(EqRelData::default())
        } else {
            let num_orders = spec.orders.len().max(1);
            RelationData::Indexed(vec![BTreeSet::new(); num_orders])
        };
        Relation { data: RwLock::new(data), spec }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn arity(&self) -> usize {
        self.spec.arity
    }

    pub fn spec(&self) -> &RelationSpec {
        &self.spec
    }

    fn order_at(&self, index: usize) -> LexOrder {
        self.spec
            .orders
            .get(index)
            .cloned()
            .unwrap_or_else(|| (0..self.spec.arity).collect())
    }

    /// Insert a tuple. Returns false when it was already present or the
    /// limitsize cap rejected it (silent drop per the resource policy).
    pub fn insert(&self, tuple: &[RamDomain]) -> bool {
        debug_assert_eq!(tuple.len(), self.spec.arity, "tuple arity mismatch");
        let mut data = self.data.write();
        match &mut *data {
            RelationData::Indexed(indexes) => {
                if let Some(limit) = self.spec.limit {
                    if indexes[0].len() >= limit {
                        return false;
                    }
                }
                let mut inserted = false;
                for (pos, set) in indexes.iter_mut().enumerate() {
                    let permuted = permute(tuple, &self.order_at(pos));
                    inserted |= set.insert(permuted);
                }
                inserted
            }
            RelationData::EqRel(eq) => {
                if self.spec.limit.map(|l| eq.size() >= l).unwrap_or(false) {
                    return false;
                }
                if eq.same_class(tuple[0], tuple[1]) {
                    return false;
                }
                eq.union(tuple[0], tuple[1]);
                true
            }
        }
    }

    /// Membership of a full tuple
    pub fn contains(&self, tuple: &[RamDomain]) -> bool {
        let data = self.data.read();
        match &*data {
            RelationData::Indexed(indexes) => {
                indexes[0].contains(&permute(tuple, &self.order_at(0)))
            }
            RelationData::EqRel(eq) => eq.same_class(tuple[0], tuple[1]),
        }
    }

    /// Number of stored tuples (pair count for equivalence relations)
    pub fn size(&self) -> usize {
        let data = self.data.read();
        match &*data {
            RelationData::Indexed(indexes) => indexes[0].len(),
            RelationData::EqRel(eq) => eq.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Remove all tuples
    pub fn purge(&self) {
        let mut data = self.data.write();
        match &mut *data {
            RelationData::Indexed(indexes) => {
                for set in indexes {
                    set.clear();
                }
            }
            RelationData::EqRel(eq) => eq.parent.clear(),
        }
    }

    /// Materialize all tuples, in index-0 order
    pub fn scan(&self) -> Vec<Tuple> {
        let data = self.data.read();
        match &*data {
            RelationData::Indexed(indexes) => {
                let order = self.order_at(0);
                indexes[0].iter().map(|t| unpermute(t, &order)).collect()
            }
            RelationData::EqRel(eq) => eq.pairs(),
        }
    }

    /// Materialize the tuples within `[lower, upper]` on the given
    /// index, where `RamDomain::MIN`/`MAX` positions are open bounds.
    pub fn range(&self, index: usize, lower: &[RamDomain], upper: &[RamDomain]) -> Vec<Tuple> {
        let data = self.data.read();
        match &*data {
            RelationData::Indexed(indexes) => {
                let order = self.order_at(index);
                let set = indexes.get(index).unwrap_or(&indexes[0]);
                let lo = permute(lower, &order);
                let hi = permute(upper, &order);
                if lo > hi {
                    return Vec::new();
                }
                set.range(lo..=hi)
                    .map(|t| unpermute(t, &order))
                    .filter(|t| matches_bounds(t, lower, upper))
                    .collect()
            }
            RelationData::EqRel(eq) => eq
                .pairs()
                .into_iter()
                .filter(|t| matches_bounds(t, lower, upper))
                .collect(),
        }
    }

    /// Whether any tuple matches the bounds on the given index
    pub fn contains_range(&self, index: usize, lower: &[RamDomain], upper: &[RamDomain]) -> bool {
        if lower == upper {
            // fully bound pattern: a point lookup
            if lower.iter().all(|&v| v != RamDomain::MIN && v != RamDomain::MAX) {
                return self.contains(lower);
            }
        }
        !self.range(index, lower, upper).is_empty()
    }

    /// Fold another equivalence relation's partitioning into this one
    pub fn extend_from(&self, source: &Relation) {
        let source_pairs = source.scan();
        for pair in source_pairs {
            self.insert(&pair);
        }
    }

    /// Split the relation's contents into roughly equal chunks for
    /// parallel scanning.
    pub fn partition(&self, chunks: usize) -> Vec<Vec<Tuple>> {
        let all = self.scan();
        if all.is_empty() || chunks <= 1 {
            return vec![all];
        }
        let chunk_size = all.len().div_ceil(chunks);
        all.chunks(chunk_size).map(<[Tuple]>::to_vec).collect()
    }
}

/// Exchange the contents of two relation slots in O(1)
pub fn swap_relations(slots: &[RwLock<Arc<Relation>>], a: usize, b: usize) {
    if a == b {
        return;
    }
    let (first, second) = if a < b { (a, b) } else { (b, a) };
    let mut lock_first = slots[first].write();
    let mut lock_second = slots[second].write();
    std::mem::swap(&mut *lock_first, &mut *lock_second);
}

/// Per-worker cursor over one index of a relation
#[derive(Debug, Clone)]
pub struct View {
    relation: Arc<Relation>,
    index: usize,
}

impl View {
    pub fn new(relation: Arc<Relation>, index: usize) -> Self {
        View { relation, index }
    }

    /// Point membership through this view's index
    pub fn contains(&self, tuple: &[RamDomain]) -> bool {
        self.relation.contains(tuple)
    }

    /// Whether any tuple falls within the bounds
    pub fn contains_range(&self, lower: &[RamDomain], upper: &[RamDomain]) -> bool {
        self.relation.contains_range(self.index, lower, upper)
    }

    /// Materialize the tuples within the bounds
    pub fn range(&self, lower: &[RamDomain], upper: &[RamDomain]) -> Vec<Tuple> {
        self.relation.range(self.index, lower, upper)
    }
}

fn permute(tuple: &[RamDomain], order: &LexOrder) -> Tuple {
    order.iter().map(|&pos| tuple[pos]).collect()
}

fn unpermute(stored: &[RamDomain], order: &LexOrder) -> Tuple {
    let mut out = vec![0; stored.len()];
    for (stored_pos, &attr) in order.iter().enumerate() {
        out[attr] = stored[stored_pos];
    }
    out
}

fn matches_bounds(tuple: &[RamDomain], lower: &[RamDomain], upper: &[RamDomain]) -> bool {
    tuple
        .iter()
        .zip(lower.iter().zip(upper.iter()))
        .all(|(&v, (&lo, &hi))| v >= lo && v <= hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, arity: usize, orders: Vec<LexOrder>) -> RelationSpec {
        RelationSpec {
            name: name.to_string(),
            arity,
            representation: RelationRepresentation::Btree,
            orders,
            limit: None,
        }
    }

    #[test]
    fn test_insert_contains_size() {
        let rel = Relation::new(spec("edge", 2, vec![vec![0, 1]]));
        assert!(rel.insert(&[1, 2]));
        assert!(!rel.insert(&[1, 2]));
        assert!(rel.insert(&[2, 3]));
        assert!(rel.contains(&[1, 2]));
        assert!(!rel.contains(&[3, 1]));
        assert_eq!(rel.size(), 2);
    }

    #[test]
    fn test_range_on_secondary_index() {
        // second index sorts by the second attribute first
        let rel = Relation::new(spec("edge", 2, vec![vec![0, 1], vec![1, 0]]));
        rel.insert(&[1, 10]);
        rel.insert(&[2, 10]);
        rel.insert(&[3, 20]);

        let lower = [RamDomain::MIN, 10];
        let upper = [RamDomain::MAX, 10];
        let hits = rel.range(1, &lower, &upper);
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&vec![1, 10]));
        assert!(hits.contains(&vec![2, 10]));
    }

    #[test]
    fn test_limitsize_drops_silently() {
        let mut s = spec("bounded", 1, vec![vec![0]]);
        s.limit = Some(2);
        let rel = Relation::new(s);
        assert!(rel.insert(&[1]));
        assert!(rel.insert(&[2]));
        assert!(!rel.insert(&[3]));
        assert_eq!(rel.size(), 2);
    }

    #[test]
    fn test_purge_and_scan() {
        let rel = Relation::new(spec("t", 1, vec![vec![0]]));
        rel.insert(&[5]);
        rel.insert(&[3]);
        assert_eq!(rel.scan(), vec![vec![3], vec![5]]);
        rel.purge();
        assert!(rel.is_empty());
    }

    #[test]
    fn test_eqrel_closure() {
        let mut s = spec("eq", 2, vec![vec![0, 1]]);
        s.representation = RelationRepresentation::EqRel;
        let rel = Relation::new(s);
        rel.insert(&[1, 2]);
        rel.insert(&[2, 3]);
        // the closure contains all 9 pairs over {1,2,3}
        assert_eq!(rel.size(), 9);
        assert!(rel.contains(&[3, 1]));
        assert!(rel.contains(&[1, 1]));
        assert!(!rel.contains(&[1, 4]));
    }

    #[test]
    fn test_eqrel_extend() {
        let mut s = spec("eq", 2, vec![vec![0, 1]]);
        s.representation = RelationRepresentation::EqRel;
        let target = Relation::new(s.clone());
        let source = Relation::new(s);
        target.insert(&[1, 2]);
        source.insert(&[2, 3]);
        target.extend_from(&source);
        assert!(target.contains(&[1, 3]));
    }

    #[test]
    fn test_swap_is_content_exchange() {
        let a = Arc::new(Relation::new(spec("a", 1, vec![vec![0]])));
        let b = Arc::new(Relation::new(spec("b", 1, vec![vec![0]])));
        a.insert(&[1]);
        b.insert(&[2]);
        let slots = vec![RwLock::new(a), RwLock::new(b)];
        swap_relations(&slots, 0, 1);
        assert!(slots[0].read().contains(&[2]));
        assert!(slots[1].read().contains(&[1]));
    }

    #[test]
    fn test_partition_covers_all() {
        let rel = Relation::new(spec("t", 1, vec![vec![0]]));
        for i in 0..10 {
            rel.insert(&[i]);
        }
        let chunks = rel.partition(3);
        let total: usize = chunks.iter().map(Vec::len).sum();
        assert_eq!(total, 10);
        assert!(chunks.len() <= 4);
    }
}
