//! Affine maps between spaces, used to pull sets and values back.

use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::space::Space;
use std::fmt;

/// A multi-affine function from one set space to another.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AffineMap {
    /// Map space: domain tuple -> range tuple
    pub space: Space,
    /// Output expressions (one per output dimension) over the domain
    pub outputs: Vec<AffineExpr>,
}

impl AffineMap {
    /// Create a map from `domain` to `range` with the given outputs.
    pub fn new(domain: Space, range: Space, outputs: Vec<AffineExpr>) -> Self {
        assert_eq!(outputs.len(), range.dim(), "one output per range dimension");
        assert!(outputs.iter().all(|o| o.n_var() == domain.dim()));
        Self { space: Space::map_from_sets(&domain, &range), outputs }
    }

    /// The map from `domain` to `range` forgetting the variables
    /// `first..first + n` of the domain.
    pub fn drop_dims(domain: Space, first: usize, n: usize, range: Space) -> Self {
        let n_in = domain.dim();
        assert_eq!(n_in, range.dim() + n);
        let outputs = (0..n_in)
            .filter(|i| *i < first || *i >= first + n)
            .map(|i| AffineExpr::var(i, n_in))
            .collect();
        Self::new(domain, range, outputs)
    }

    /// The map keeping the leading `range.dim()` variables of `domain`.
    pub fn project_prefix(domain: Space, range: Space) -> Self {
        let keep = range.dim();
        let drop = domain.dim() - keep;
        Self::drop_dims(domain, keep, drop, range)
    }

    /// Get input dimensions.
    pub fn n_in(&self) -> usize {
        self.space.n_in()
    }

    /// Get output dimensions.
    pub fn n_out(&self) -> usize {
        self.space.n_out()
    }

    /// Space of the inputs.
    pub fn domain_space(&self) -> Space {
        self.space.domain_space()
    }
}

impl fmt::Display for AffineMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = (0..self.n_in()).map(|i| format!("i{}", i)).collect();
        write!(f, "{{ [{}] -> [", names.join(", "))?;
        for (i, expr) in self.outputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", expr.to_string_with_names(&names))?;
        }
        write!(f, "] }}")
    }
}
