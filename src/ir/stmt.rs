//! Statements as seen by capture resolution.

use crate::analysis::nest;
use crate::ir::expr::Expr;
use crate::polyhedral::IntegerSet;
use std::fmt;

/// A statement: a body executed at every point of its domain.
///
/// The domain is a set over the iteration space `D`, or over `[D -> args]`
/// once the statement has arguments. Argument `k` is the value of `args[k]`
/// at the iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    /// Iteration domain
    pub domain: IntegerSet,
    /// The expression evaluated by the statement
    pub body: Expr,
    /// Statement arguments
    pub args: Vec<Expr>,
}

impl Stmt {
    /// A statement without arguments.
    pub fn new(domain: IntegerSet, body: Expr) -> Self {
        Self { domain, body, args: Vec::new() }
    }

    /// Number of statement arguments.
    pub fn n_arg(&self) -> usize {
        self.args.len()
    }

    /// Does the domain or the body still refer to captured subtrees?
    pub fn contains_nested(&self) -> bool {
        let mut params = std::collections::BTreeSet::new();
        self.domain.collect_params(&mut params);
        params.iter().any(|p| p.is_nested()) || self.body.contains_nested()
    }

    /// Turn the captured subtrees of the domain into statement arguments
    /// and resolve the captures of every access in the body.
    pub fn resolve_nested(mut self) -> Self {
        self.domain = nest::resolve_set(&self.domain, &mut self.args);
        self.body = nest::resolve_nested(self.body);
        self
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.domain, self.body)?;
        if !self.args.is_empty() {
            let args: Vec<String> = self.args.iter().map(|a| a.to_string()).collect();
            write!(f, " [{}]", args.join(", "))?;
        }
        Ok(())
    }
}
