//! Interprocedural function summaries.
//!
//! A summary describes, per formal argument of a callee, what the callee
//! does with it: integer arguments are named so that array accesses can refer
//! to them, and array arguments carry the callee's accesses to the pointed-to
//! array. Those accesses are sets over the formal array's space
//! (`B[j0, ..]`), parametrized by the integer arguments' names.

use crate::polyhedral::{IntegerSet, Space, Tuple};
use crate::utils::intern::Symbol;

/// Accesses a callee performs on one array argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayAccesses {
    /// Elements that may be read
    pub may_read: IntegerSet,
    /// Elements that may be written
    pub may_write: IntegerSet,
    /// Elements that are definitely written
    pub must_write: IntegerSet,
}

impl ArrayAccesses {
    /// No accesses to an array with `n_dim` dimensions.
    pub fn none(param: Symbol, n_dim: usize) -> Self {
        let space = Space::set(Tuple::named(param, n_dim));
        Self {
            may_read: IntegerSet::empty(space.clone()),
            may_write: IntegerSet::empty(space.clone()),
            must_write: IntegerSet::empty(space),
        }
    }

    /// Set the may-read accesses.
    pub fn with_may_read(mut self, set: IntegerSet) -> Self {
        self.may_read = set;
        self
    }

    /// Set the must-write accesses; they are also may-writes.
    pub fn with_must_write(mut self, set: IntegerSet) -> Self {
        self.may_write = self.may_write.union(&set);
        self.must_write = set;
        self
    }

    /// Add may-write accesses.
    pub fn with_may_write(mut self, set: IntegerSet) -> Self {
        self.may_write = self.may_write.union(&set);
        self
    }
}

/// Summary of one formal argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SummaryArg {
    /// An integer argument, referred to by name in array accesses
    Int(Symbol),
    /// An array (pointer) argument
    Array {
        /// Name of the formal parameter
        param: Symbol,
        /// What the callee accesses through it
        accesses: ArrayAccesses,
    },
    /// Anything the summary says nothing about
    Other,
}

/// Summary of a callee.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionSummary {
    /// Name of the callee
    pub name: Symbol,
    /// One entry per formal argument
    pub args: Vec<SummaryArg>,
}

impl FunctionSummary {
    /// A summary of `name` without arguments.
    pub fn new(name: Symbol) -> Self {
        Self { name, args: Vec::new() }
    }

    /// Append an integer argument.
    pub fn int_arg(mut self, name: Symbol) -> Self {
        self.args.push(SummaryArg::Int(name));
        self
    }

    /// Append an array argument.
    pub fn array_arg(mut self, param: Symbol, accesses: ArrayAccesses) -> Self {
        self.args.push(SummaryArg::Array { param, accesses });
        self
    }

    /// Append an argument the summary says nothing about.
    pub fn other_arg(mut self) -> Self {
        self.args.push(SummaryArg::Other);
        self
    }

    /// Number of formal arguments.
    pub fn n_arg(&self) -> usize {
        self.args.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_builder() {
        let b = Symbol::new("B");
        let all = IntegerSet::universe(Space::set(Tuple::named(b, 1)));
        let accesses = ArrayAccesses::none(b, 1).with_may_write(all.clone());
        assert!(accesses.must_write.is_empty());
        assert!(accesses.may_write.is_equal(&all));

        let summary = FunctionSummary::new(Symbol::new("f"))
            .int_arg(Symbol::new("n"))
            .other_arg()
            .array_arg(b, accesses);
        assert_eq!(summary.n_arg(), 3);
        assert_eq!(summary.args[1], SummaryArg::Other);
    }
}
