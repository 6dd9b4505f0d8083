//! Linear constraints for polyhedral representation.
//!
//! A constraint is a quasi-affine inequality or equality:
//! - Inequality: expr >= 0
//! - Equality: expr = 0
//!
//! A [`ConstraintSystem`] is a conjunction of constraints over a fixed number
//! of variables; unions of systems form an [`IntegerSet`](super::IntegerSet).

use crate::polyhedral::expr::AffineExpr;
use crate::polyhedral::space::Param;
use crate::polyhedral::Int;
use serde::{Serialize, Deserialize};
use std::collections::BTreeSet;
use std::fmt;

/// A linear constraint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Constraint {
    /// The affine expression (constraint is: expr >= 0 or expr = 0)
    pub expr: AffineExpr,
    /// Kind of constraint
    pub kind: ConstraintKind,
}

/// Kind of constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Greater than or equal: expr >= 0
    Inequality,
    /// Equal: expr = 0
    Equality,
}

impl Constraint {
    /// Create a new constraint.
    pub fn new(expr: AffineExpr, kind: ConstraintKind) -> Self {
        Self { expr, kind }
    }

    /// Create an inequality constraint: expr >= 0
    pub fn ge_zero(expr: AffineExpr) -> Self {
        Self::new(expr, ConstraintKind::Inequality)
    }

    /// Create an equality constraint: expr = 0
    pub fn eq_zero(expr: AffineExpr) -> Self {
        Self::new(expr, ConstraintKind::Equality)
    }

    /// Create a constraint: lhs >= rhs
    pub fn ge(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::ge_zero(lhs - rhs)
    }

    /// Create a constraint: lhs <= rhs
    pub fn le(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::ge_zero(rhs - lhs)
    }

    /// Create a constraint: lhs < rhs
    pub fn lt(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::ge_zero((rhs - lhs).add_constant(-1))
    }

    /// Create a constraint: lhs = rhs
    pub fn eq(lhs: AffineExpr, rhs: AffineExpr) -> Self {
        Self::eq_zero(lhs - rhs)
    }

    /// Create a lower bound constraint: var >= lower
    pub fn lower_bound(var: usize, lower: Int, n_var: usize) -> Self {
        Self::ge_zero(AffineExpr::var(var, n_var).add_constant(-lower))
    }

    /// Create an upper bound constraint: var <= upper
    pub fn upper_bound(var: usize, upper: Int, n_var: usize) -> Self {
        Self::ge_zero((-AffineExpr::var(var, n_var)).add_constant(upper))
    }

    /// Check if this is an equality constraint.
    pub fn is_equality(&self) -> bool {
        matches!(self.kind, ConstraintKind::Equality)
    }

    /// Check if this is an inequality constraint.
    pub fn is_inequality(&self) -> bool {
        matches!(self.kind, ConstraintKind::Inequality)
    }

    /// A constraint that no point satisfies.
    pub fn infeasible(n_var: usize) -> Self {
        Self::ge_zero(AffineExpr::constant(-1, n_var))
    }

    /// Constant constraints are decided without looking at any point.
    pub fn as_constant(&self) -> Option<bool> {
        let value = self.expr.as_constant()?;
        Some(match self.kind {
            ConstraintKind::Inequality => value >= 0,
            ConstraintKind::Equality => value == 0,
        })
    }

    /// Check if this constraint is satisfied by the given point.
    ///
    /// Returns `None` when a parameter has no value.
    pub fn is_satisfied(&self, point: &[Int], params: &dyn Fn(&Param) -> Option<Int>) -> Option<bool> {
        let value = self.expr.evaluate(point, params)?;
        Some(match self.kind {
            ConstraintKind::Inequality => value >= 0,
            ConstraintKind::Equality => value == 0,
        })
    }

    /// Negate the constraint.
    ///
    /// The negation of an equality is a disjunction, so the result is a list
    /// of alternatives.
    pub fn negate(&self) -> Vec<Constraint> {
        match self.kind {
            ConstraintKind::Inequality => {
                // expr >= 0 becomes -expr - 1 >= 0
                vec![Self::ge_zero((-self.expr.clone()).add_constant(-1))]
            }
            ConstraintKind::Equality => vec![
                Self::ge_zero(self.expr.clone().add_constant(-1)),
                Self::ge_zero((-self.expr.clone()).add_constant(-1)),
            ],
        }
    }

    /// Divide out the common factor of the coefficients, rounding the
    /// constant of inequalities down. Equalities whose constant is not a
    /// multiple of the factor become infeasible.
    pub fn normalize(&self) -> Constraint {
        let g = self.expr.content();
        if g <= 1 {
            return self.canonical_sign();
        }
        match self.kind {
            ConstraintKind::Inequality => Self::ge_zero(self.expr.div_content_floor(g)),
            ConstraintKind::Equality => {
                if self.expr.constant % g != 0 {
                    Self::infeasible(self.n_var())
                } else {
                    Self::eq_zero(self.expr.div_content_floor(g)).canonical_sign()
                }
            }
        }
    }

    /// Equalities are stored with a positive leading coefficient.
    fn canonical_sign(&self) -> Constraint {
        if self.is_inequality() {
            return self.clone();
        }
        let negative = self.expr.coeffs.iter().find(|c| **c != 0).map(|c| *c < 0)
            .or_else(|| self.expr.params.values().next().map(|c| *c < 0))
            .or_else(|| self.expr.divs.values().next().map(|c| *c < 0))
            .unwrap_or(false);
        if negative {
            Self::eq_zero(-self.expr.clone())
        } else {
            self.clone()
        }
    }

    /// Get the number of variables.
    pub fn n_var(&self) -> usize {
        self.expr.n_var()
    }

    /// Convert to string with given names.
    pub fn to_string_with_names(&self, var_names: &[String]) -> String {
        let expr_str = self.expr.to_string_with_names(var_names);
        match self.kind {
            ConstraintKind::Inequality => format!("{} >= 0", expr_str),
            ConstraintKind::Equality => format!("{} = 0", expr_str),
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let var_names: Vec<String> = (0..self.n_var()).map(|i| format!("i{}", i)).collect();
        write!(f, "{}", self.to_string_with_names(&var_names))
    }
}

/// A conjunction of constraints.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConstraintSystem {
    /// All constraints in the system
    pub constraints: Vec<Constraint>,
    /// Number of variables
    pub n_var: usize,
}

impl ConstraintSystem {
    /// Create an unconstrained system.
    pub fn new(n_var: usize) -> Self {
        Self {
            constraints: Vec::new(),
            n_var,
        }
    }

    /// Create a system from a list of constraints.
    pub fn from_constraints(n_var: usize, constraints: impl IntoIterator<Item = Constraint>) -> Self {
        let mut sys = Self::new(n_var);
        sys.add_all(constraints);
        sys
    }

    /// Add a constraint.
    ///
    /// Constraints are normalized; trivially true ones are dropped and
    /// duplicates are not stored twice.
    pub fn add(&mut self, constraint: Constraint) {
        assert_eq!(constraint.n_var(), self.n_var);
        let constraint = constraint.normalize();
        if constraint.as_constant() == Some(true) {
            return;
        }
        if !self.constraints.contains(&constraint) {
            self.constraints.push(constraint);
        }
    }

    /// Add multiple constraints.
    pub fn add_all(&mut self, constraints: impl IntoIterator<Item = Constraint>) {
        for c in constraints {
            self.add(c);
        }
    }

    /// Conjunction of two systems over the same variables.
    pub fn intersect(&self, other: &ConstraintSystem) -> ConstraintSystem {
        let mut result = self.clone();
        result.add_all(other.constraints.iter().cloned());
        result
    }

    /// Get all equality constraints.
    pub fn equalities(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| c.is_equality())
    }

    /// Get all inequality constraints.
    pub fn inequalities(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| c.is_inequality())
    }

    /// Check if a point satisfies all constraints.
    pub fn is_satisfied(&self, point: &[Int], params: &dyn Fn(&Param) -> Option<Int>) -> Option<bool> {
        for c in &self.constraints {
            if !c.is_satisfied(point, params)? {
                return Some(false);
            }
        }
        Some(true)
    }

    /// Is a constraint trivially false?
    pub fn is_obviously_empty(&self) -> bool {
        self.constraints.iter().any(|c| c.as_constant() == Some(false))
    }

    /// Check if the system has no constraints.
    pub fn is_universe(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Get the number of constraints.
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Does the system have no integer solution?
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Does any constraint involve variable `var`?
    pub fn involves_var(&self, var: usize) -> bool {
        self.constraints.iter().any(|c| c.expr.involves_var(var))
    }

    /// Does any constraint involve a parameter satisfying `pred`?
    pub fn involves_param_where(&self, pred: &dyn Fn(&Param) -> bool) -> bool {
        self.constraints.iter().any(|c| c.expr.involves_param_where(pred))
    }

    /// Add the parameters of the system to `out`.
    pub fn collect_params(&self, out: &mut BTreeSet<Param>) {
        for c in &self.constraints {
            c.expr.collect_params(out);
        }
    }

    /// Substitute every variable by an expression over `n_new` variables.
    pub fn pullback(&self, subs: &[AffineExpr], n_new: usize) -> ConstraintSystem {
        ConstraintSystem::from_constraints(
            n_new,
            self.constraints.iter().map(|c| Constraint::new(c.expr.pullback(subs, n_new), c.kind)),
        )
    }

    /// Insert `n` unconstrained variables before position `pos`.
    pub fn insert_vars(&self, pos: usize, n: usize) -> ConstraintSystem {
        ConstraintSystem {
            constraints: self.constraints.iter()
                .map(|c| Constraint::new(c.expr.insert_vars(pos, n), c.kind))
                .collect(),
            n_var: self.n_var + n,
        }
    }

    /// Substitute a parameter by an expression over the same variables.
    pub fn substitute_param(&self, param: &Param, value: &AffineExpr) -> ConstraintSystem {
        ConstraintSystem::from_constraints(
            self.n_var,
            self.constraints.iter().map(|c| Constraint::new(c.expr.substitute_param(param, value), c.kind)),
        )
    }

    /// Drop the constraints that satisfy `pred`.
    pub fn drop_constraints_where(&self, pred: impl Fn(&Constraint) -> bool) -> ConstraintSystem {
        ConstraintSystem {
            constraints: self.constraints.iter().filter(|c| !pred(c)).cloned().collect(),
            n_var: self.n_var,
        }
    }
}
