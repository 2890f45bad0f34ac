//! Per-call evaluation context.
//!
//! Holds the tuple stack indexed by tuple id, the views of the current
//! query scope, and the subroutine argument/return frames. Contexts are
//! stack-allocated per execute call; parallel workers clone the current
//! context so tuple bindings stay worker-local.

use crate::interp::relation::{Tuple, View};
use crate::ram::RamDomain;

/// Evaluation context for interpreter operations
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Tuple bindings, indexed by tuple id
    tuples: Vec<Tuple>,
    /// Views of the active query scope, indexed by view id
    views: Vec<Option<View>>,
    /// Subroutine arguments of the current call
    arguments: Vec<RamDomain>,
    /// Subroutine return buffer
    returns: Vec<RamDomain>,
}

impl Context {
    pub fn new() -> Self {
        Context::default()
    }

    /// A fresh scope for a subroutine call: arguments carry over,
    /// bindings and views do not.
    pub fn call_scope(arguments: Vec<RamDomain>) -> Self {
        Context { arguments, ..Default::default() }
    }

    /// Bind the tuple at the given id
    pub fn set_tuple(&mut self, tuple_id: usize, tuple: Tuple) {
        if self.tuples.len() <= tuple_id {
            self.tuples.resize(tuple_id + 1, Tuple::new());
        }
        self.tuples[tuple_id] = tuple;
    }

    /// The tuple bound at the given id
    pub fn tuple(&self, tuple_id: usize) -> &Tuple {
        &self.tuples[tuple_id]
    }

    /// Element access `t<tuple_id>[element]`
    pub fn element(&self, tuple_id: usize, element: usize) -> RamDomain {
        self.tuples[tuple_id][element]
    }

    /// Install a view at the given slot
    pub fn set_view(&mut self, view_id: usize, view: View) {
        if self.views.len() <= view_id {
            self.views.resize(view_id + 1, None);
        }
        self.views[view_id] = Some(view);
    }

    /// The view at the given slot; panics on a generator bug
    pub fn view(&self, view_id: usize) -> &View {
        self.views[view_id]
            .as_ref()
            .expect("view not created for this scope")
    }

    /// Subroutine argument access
    pub fn argument(&self, index: usize) -> RamDomain {
        self.arguments[index]
    }

    /// The full argument frame of the current call
    pub fn arguments(&self) -> &[RamDomain] {
        &self.arguments
    }

    /// Append a subroutine return value
    pub fn add_return(&mut self, value: RamDomain) {
        self.returns.push(value);
    }

    /// Drain the return buffer
    pub fn take_returns(&mut self) -> Vec<RamDomain> {
        std::mem::take(&mut self.returns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuple_binding_grows() {
        let mut ctx = Context::new();
        ctx.set_tuple(3, vec![7, 8]);
        assert_eq!(ctx.element(3, 1), 8);
        ctx.set_tuple(0, vec![1]);
        assert_eq!(ctx.element(0, 0), 1);
    }

    #[test]
    fn test_call_scope_keeps_arguments_only() {
        let mut ctx = Context::new();
        ctx.set_tuple(0, vec![1]);
        let scope = Context::call_scope(vec![42]);
        assert_eq!(scope.argument(0), 42);
        assert!(scope.tuples.is_empty());
    }

    #[test]
    fn test_return_buffer() {
        let mut ctx = Context::new();
        ctx.add_return(1);
        ctx.add_return(2);
        assert_eq!(ctx.take_returns(), vec![1, 2]);
        assert!(ctx.take_returns().is_empty());
    }
}
