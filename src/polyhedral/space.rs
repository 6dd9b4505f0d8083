//! Polyhedral spaces define the dimensions of domains, index expressions and
//! access relations.
//!
//! A space is either a set space (one tuple) or a map space (domain tuple ->
//! range tuple). A tuple may carry an identifier (`A[..]` for array `A`) and
//! may itself wrap a map space, which is how struct member accesses
//! (`s_f[s[..] -> f[..]]`) and argument-extended domains (`[[i] -> [a]]`) are
//! represented. Variables are numbered domain first, leaves left to right.
//!
//! Parameters are not part of a space: values refer to them by name through
//! [`Param`], so values built over different parameter sets align implicitly.

use crate::analysis::nest::Capture;
use crate::utils::intern::Symbol;
use std::fmt;

/// A symbolic parameter.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Param {
    /// A named symbolic constant such as `N`.
    Named(Symbol),
    /// A nested capture standing for a non-affine access subtree.
    Nested(Capture),
}

impl Param {
    /// A named symbolic parameter.
    pub fn named(name: &str) -> Self {
        Param::Named(Symbol::new(name))
    }

    /// Does the parameter stand for a captured subexpression?
    pub fn is_nested(&self) -> bool {
        matches!(self, Param::Nested(_))
    }

    /// The captured subexpression, if nested.
    pub fn as_capture(&self) -> Option<&Capture> {
        match self {
            Param::Nested(capture) => Some(capture),
            Param::Named(_) => None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Named(sym) => write!(f, "{}", sym),
            Param::Nested(capture) => write!(f, "{}", capture),
        }
    }
}

/// Structure of a tuple: a flat list of dimensions or a wrapped map space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TupleKind {
    /// The given number of dimensions
    Flat(usize),
    /// A map space used as a single tuple
    Wrapped(Box<Space>),
}

/// One tuple of a space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tuple {
    /// Identifier of the tuple, e.g. the array name
    pub id: Option<Symbol>,
    /// Flat dimensions or a wrapped space
    pub kind: TupleKind,
}

impl Tuple {
    /// An unnamed flat tuple.
    pub fn anonymous(n: usize) -> Self {
        Self { id: None, kind: TupleKind::Flat(n) }
    }

    /// A named flat tuple.
    pub fn named(id: Symbol, n: usize) -> Self {
        Self { id: Some(id), kind: TupleKind::Flat(n) }
    }

    /// A tuple wrapping the map space `space`.
    pub fn wrapped(id: Option<Symbol>, space: Space) -> Self {
        assert!(space.is_map(), "only map spaces can be wrapped");
        Self { id, kind: TupleKind::Wrapped(Box::new(space)) }
    }

    /// Total number of variables in the tuple.
    pub fn dim(&self) -> usize {
        match &self.kind {
            TupleKind::Flat(n) => *n,
            TupleKind::Wrapped(space) => space.dim(),
        }
    }

    /// Is this a wrapped space?
    pub fn is_wrapped(&self) -> bool {
        matches!(self.kind, TupleKind::Wrapped(_))
    }

    /// The wrapped map space, if any.
    pub fn unwrap_space(&self) -> Option<&Space> {
        match &self.kind {
            TupleKind::Wrapped(space) => Some(space),
            TupleKind::Flat(_) => None,
        }
    }

    /// Add `n` dimensions at the end of the innermost range of the tuple.
    ///
    /// For a wrapped tuple `s_f[s[i] -> f[j]]` the dimensions are added to
    /// `f`, which keeps the new variables last in the numbering.
    pub fn add_inner_dims(&self, n: usize) -> Tuple {
        match &self.kind {
            TupleKind::Flat(m) => Tuple { id: self.id, kind: TupleKind::Flat(m + n) },
            TupleKind::Wrapped(space) => {
                let inner = space.range.add_inner_dims(n);
                let space = Space::map(space.domain_tuple().clone(), inner);
                Tuple::wrapped(self.id, space)
            }
        }
    }

    /// Number of dimensions of the innermost range of the tuple.
    pub fn inner_dim(&self) -> usize {
        match &self.kind {
            TupleKind::Flat(n) => *n,
            TupleKind::Wrapped(space) => space.range.inner_dim(),
        }
    }

    /// Identifier of the innermost domain tuple, i.e. the outer array of a
    /// chain of member accesses.
    pub fn base_id(&self) -> Option<Symbol> {
        match &self.kind {
            TupleKind::Flat(_) => self.id,
            TupleKind::Wrapped(space) => space.domain_tuple().base_id(),
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(id) = self.id {
            write!(f, "{}", id)?;
        }
        match &self.kind {
            TupleKind::Flat(n) => write!(f, "[{}]", n),
            TupleKind::Wrapped(space) => {
                write!(f, "[{} -> {}]", space.domain_tuple(), space.range)
            }
        }
    }
}

/// A polyhedral space describes the dimensionality and structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Space {
    /// Domain tuple (maps only)
    pub domain: Option<Tuple>,
    /// Set tuple or range tuple
    pub range: Tuple,
}

impl Space {
    /// Create a new set space from a tuple.
    pub fn set(tuple: Tuple) -> Self {
        Self { domain: None, range: tuple }
    }

    /// Create an unnamed set space with `n` dimensions.
    pub fn set_of_dim(n: usize) -> Self {
        Self::set(Tuple::anonymous(n))
    }

    /// Create a new map space.
    pub fn map(domain: Tuple, range: Tuple) -> Self {
        Self { domain: Some(domain), range }
    }

    /// Map space from the tuples of two set spaces.
    pub fn map_from_sets(domain: &Space, range: &Space) -> Self {
        assert!(domain.is_set() && range.is_set());
        Self::map(domain.range.clone(), range.range.clone())
    }

    /// Check if this is a set space (no domain tuple).
    pub fn is_set(&self) -> bool {
        self.domain.is_none()
    }

    /// Check if this is a map space.
    pub fn is_map(&self) -> bool {
        self.domain.is_some()
    }

    /// Domain tuple of a map space.
    pub fn domain_tuple(&self) -> &Tuple {
        self.domain.as_ref().expect("domain tuple requested on a set space")
    }

    /// Number of domain variables (zero for sets).
    pub fn n_in(&self) -> usize {
        self.domain.as_ref().map_or(0, Tuple::dim)
    }

    /// Number of range (or set) variables.
    pub fn n_out(&self) -> usize {
        self.range.dim()
    }

    /// Get the total number of variables.
    pub fn dim(&self) -> usize {
        self.n_in() + self.n_out()
    }

    /// Domain of a map space, as a set space.
    pub fn domain_space(&self) -> Space {
        Space::set(self.domain_tuple().clone())
    }

    /// Range of a map space (or the space itself for sets).
    pub fn range_space(&self) -> Space {
        Space::set(self.range.clone())
    }

    /// Wrap a map space into a set space `[[D] -> [R]]`.
    pub fn wrap(&self) -> Space {
        Space::set(Tuple::wrapped(None, self.clone()))
    }

    /// Unwrap a set space whose tuple wraps a map space.
    pub fn unwrap(&self) -> Option<Space> {
        if self.is_map() {
            return None;
        }
        self.range.unwrap_space().cloned()
    }

    /// The space of a domain extended with `n_arg` argument dimensions,
    /// `[D -> [a0, ..]]`.  Zero arguments leave the space untouched.
    pub fn with_args(&self, n_arg: usize) -> Space {
        assert!(self.is_set());
        if n_arg == 0 {
            return self.clone();
        }
        Space::map(self.range.clone(), Tuple::anonymous(n_arg)).wrap()
    }

    /// Split an argument-extended domain `[D -> [args]]` into `D` and the
    /// number of arguments.  Plain domains have zero arguments.
    pub fn split_args(&self) -> (Space, usize) {
        if let Some(inner) = self.unwrap() {
            if inner.range.id.is_none() && !inner.range.is_wrapped() && self.range.id.is_none() {
                return (inner.domain_space(), inner.n_out());
            }
        }
        (self.clone(), 0)
    }

    /// Replace the range tuple.
    pub fn with_range(&self, range: Tuple) -> Space {
        Space { domain: self.domain.clone(), range }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{} -> {}", domain, self.range),
            None => write!(f, "{}", self.range),
        }
    }
}
