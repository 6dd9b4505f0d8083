//! Payload of access expressions.
//!
//! An access is described by its index expression, a function from the
//! (argument-extended) statement domain to the accessed array element, and
//! by one relation per kind of access. Relations that were never set
//! explicitly are derived from the index expression: its graph, extended
//! with one non-negative dimension per array dimension beyond the ones the
//! index selects.

use crate::polyhedral::{Constraint, IntegerSet, MultiPwAff, Space};
use crate::utils::intern::Symbol;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Kinds of access relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessType {
    /// Elements that may be read
    MayRead,
    /// Elements that may be written
    MayWrite,
    /// Elements that are definitely written
    MustWrite,
    /// Elements whose contents are killed
    Kill,
}

impl AccessType {
    /// Every kind, in slot order.
    pub const ALL: [AccessType; 4] = [
        AccessType::MayRead,
        AccessType::MayWrite,
        AccessType::MustWrite,
        AccessType::Kill,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessType::MayRead => "may_read",
            AccessType::MayWrite => "may_write",
            AccessType::MustWrite => "must_write",
            AccessType::Kill => "kill",
        };
        write!(f, "{}", name)
    }
}

/// Access-specific part of an expression node.
#[derive(Debug, Clone)]
pub struct AccessData {
    index: MultiPwAff,
    depth: usize,
    /// The accessed element is read
    pub read: bool,
    /// The accessed element is written
    pub write: bool,
    /// The access kills the accessed data
    pub kill: bool,
    /// Identifier of this reference, if assigned
    pub ref_id: Option<Symbol>,
    relations: [Option<IntegerSet>; 4],
}

impl AccessData {
    /// A read access through `index`, as deep as the index.
    pub fn new(index: MultiPwAff) -> Self {
        let depth = index.n_out();
        Self {
            index,
            depth,
            read: true,
            write: false,
            kill: false,
            ref_id: None,
            relations: Default::default(),
        }
    }

    /// Index expression of the access.
    pub fn index(&self) -> &MultiPwAff {
        &self.index
    }

    /// Number of array dimensions the access reaches.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Replace the index expression.
    pub fn set_index(&mut self, index: MultiPwAff) {
        self.index = index;
    }

    /// Change the depth of the access.
    ///
    /// # Panics
    /// If any access relation has been set explicitly.
    pub fn set_depth(&mut self, depth: usize) {
        if depth == self.depth {
            return;
        }
        assert!(
            !self.has_explicit_relations(),
            "depth of an access changed after its relations were set"
        );
        self.depth = depth;
    }

    /// Identifier of the accessed array (or member).
    pub fn array_id(&self) -> Option<Symbol> {
        self.index.range_tuple().id
    }

    /// A zero-dimensional access to a named, non-member variable.
    pub fn is_scalar(&self) -> bool {
        let range = self.index.range_tuple();
        range.id.is_some() && !range.is_wrapped() && range.dim() == 0
    }

    /// Have the access relations been set explicitly?
    pub fn has_explicit_relations(&self) -> bool {
        self.relations.iter().any(Option::is_some)
    }

    /// The explicitly set relation of a kind.
    pub fn explicit_relation(&self, ty: AccessType) -> Option<&IntegerSet> {
        self.relations[ty.slot()].as_ref()
    }

    /// Set the relation of a kind.
    pub fn set_relation(&mut self, ty: AccessType, relation: IntegerSet) {
        self.relations[ty.slot()] = Some(relation);
    }

    /// Apply `f` to every explicitly set relation.
    pub fn map_explicit_relations(&mut self, mut f: impl FnMut(&IntegerSet) -> IntegerSet) {
        for relation in self.relations.iter_mut().flatten() {
            *relation = f(relation);
        }
    }

    /// Set every relation kind explicitly to its current value.
    pub fn materialize_relations(&mut self) {
        for ty in AccessType::ALL {
            if self.relations[ty.slot()].is_none() {
                let relation = self.default_relation(ty);
                self.relations[ty.slot()] = Some(relation);
            }
        }
    }

    /// Space of the access relations.
    pub fn relation_space(&self) -> Space {
        let extra = self.depth.saturating_sub(self.index.n_out());
        let range = self.index.range_tuple().add_inner_dims(extra);
        Space::map(self.index.space.domain_tuple().clone(), range)
    }

    /// Graph of the index expression, extended to the depth of the access.
    pub fn extended_index_relation(&self) -> IntegerSet {
        let graph = self.index.graph();
        let extra = self.depth.saturating_sub(self.index.n_out());
        if extra == 0 {
            return graph;
        }
        let n = graph.dim();
        let mut relation = graph.insert_dims(n, extra, self.relation_space());
        for k in 0..extra {
            relation.add_constraint(Constraint::lower_bound(n + k, 0, n + extra));
        }
        relation
    }

    fn default_relation(&self, ty: AccessType) -> IntegerSet {
        let applies = match ty {
            AccessType::MayRead => self.read,
            AccessType::MayWrite | AccessType::MustWrite => self.write,
            AccessType::Kill => self.kill,
        };
        if applies {
            self.extended_index_relation()
        } else {
            IntegerSet::empty(self.relation_space())
        }
    }

    /// The relation of a kind, explicit or derived from the index.
    pub fn relation(&self, ty: AccessType) -> IntegerSet {
        match &self.relations[ty.slot()] {
            Some(relation) => relation.clone(),
            None => self.default_relation(ty),
        }
    }
}

impl PartialEq for AccessData {
    fn eq(&self, other: &Self) -> bool {
        if self.read != other.read
            || self.write != other.write
            || self.kill != other.kill
            || self.depth != other.depth
            || self.index != other.index
        {
            return false;
        }
        AccessType::ALL.iter().all(|&ty| {
            match (&self.relations[ty.slot()], &other.relations[ty.slot()]) {
                (None, None) => true,
                _ => self.relation(ty) == other.relation(ty),
            }
        })
    }
}

impl Eq for AccessData {}

impl Hash for AccessData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.read.hash(state);
        self.write.hash(state);
        self.kill.hash(state);
        self.depth.hash(state);
        self.index.hash(state);
        for ty in AccessType::ALL {
            self.relation(ty).hash(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::{AffineExpr, Tuple};

    fn a_of_i() -> MultiPwAff {
        MultiPwAff::from_affs(
            Space::set_of_dim(1),
            Tuple::named(Symbol::new("A"), 1),
            vec![AffineExpr::var(0, 1)],
        )
    }

    #[test]
    fn test_default_relations_follow_flags() {
        let access = AccessData::new(a_of_i());
        assert!(access.relation(AccessType::MayRead).contains_point(&[2, 2]));
        assert!(access.relation(AccessType::MayWrite).is_empty());
    }

    #[test]
    fn test_depth_extension() {
        let mut access = AccessData::new(a_of_i());
        access.set_depth(2);
        let rel = access.relation(AccessType::MayRead);
        assert_eq!(rel.space.n_out(), 2);
        assert!(rel.contains_point(&[1, 1, 7]));
        assert!(!rel.contains_point(&[1, 1, -1]));
    }

    #[test]
    #[should_panic(expected = "depth of an access changed")]
    fn test_depth_frozen_after_relations() {
        let mut access = AccessData::new(a_of_i());
        access.materialize_relations();
        access.set_depth(2);
    }

    #[test]
    fn test_equality_with_materialized_relations() {
        let plain = AccessData::new(a_of_i());
        let mut materialized = plain.clone();
        materialized.materialize_relations();
        assert_eq!(plain, materialized);
        materialized.write = true;
        assert_ne!(plain, materialized);
    }
}
