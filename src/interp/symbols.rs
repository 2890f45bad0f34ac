//! Process-wide symbol and record tables.
//!
//! Both tables are insertion-only bijections with concurrent
//! insert-or-lookup; readers never block other readers. Strings and
//! records are interned once and addressed by their RamDomain index
//! afterwards.

use crate::ram::RamDomain;
use dashmap::DashMap;
use parking_lot::RwLock;

/// Bijective mapping between strings and RamDomain indices
#[derive(Debug, Default)]
pub struct SymbolTable {
    forward: DashMap<String, RamDomain>,
    reverse: RwLock<Vec<String>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    /// Intern a string, returning its index
    pub fn encode(&self, symbol: &str) -> RamDomain {
        if let Some(existing) = self.forward.get(symbol) {
            return *existing;
        }
        let mut reverse = self.reverse.write();
        // re-check under the write lock; another thread may have won
        if let Some(existing) = self.forward.get(symbol) {
            return *existing;
        }
        let index = reverse.len() as RamDomain;
        reverse.push(symbol.to_string());
        self.forward.insert(symbol.to_string(), index);
        index
    }

    /// Resolve an index back to its string
    pub fn decode(&self, index: RamDomain) -> Option<String> {
        self.reverse.read().get(index as usize).cloned()
    }

    /// Number of interned symbols
    pub fn len(&self) -> usize {
        self.reverse.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Content-addressed store mapping tuples to record ids.
///
/// Id 0 is reserved for `nil`; real records start at 1.
#[derive(Debug, Default)]
pub struct RecordTable {
    forward: DashMap<Vec<RamDomain>, RamDomain>,
    reverse: RwLock<Vec<Vec<RamDomain>>>,
}

impl RecordTable {
    pub const NIL: RamDomain = 0;

    pub fn new() -> Self {
        RecordTable::default()
    }

    /// Intern a record, returning its id
    pub fn pack(&self, record: &[RamDomain]) -> RamDomain {
        if let Some(existing) = self.forward.get(record) {
            return *existing;
        }
        let mut reverse = self.reverse.write();
        if let Some(existing) = self.forward.get(record) {
            return *existing;
        }
        let id = (reverse.len() + 1) as RamDomain;
        reverse.push(record.to_vec());
        self.forward.insert(record.to_vec(), id);
        id
    }

    /// Retrieve a record by id; `None` for nil and unknown ids
    pub fn unpack(&self, id: RamDomain, arity: usize) -> Option<Vec<RamDomain>> {
        if id == Self::NIL {
            return None;
        }
        let reverse = self.reverse.read();
        let record = reverse.get((id - 1) as usize)?;
        if record.len() != arity {
            return None;
        }
        Some(record.clone())
    }
}
