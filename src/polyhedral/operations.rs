//! Polyhedral operations: emptiness, variable elimination.
//!
//! Emptiness is decided by Fourier-Motzkin elimination over the rationals,
//! tightened to integers by dividing every row by the gcd of its coefficients
//! and rounding the constant down. Floor-division terms become extra columns
//! bounded by their defining inequalities and parameters are treated as
//! unconstrained columns. A proof of emptiness is always sound; when the row
//! count explodes the procedure gives up and reports "not empty".

use crate::polyhedral::constraint::{Constraint, ConstraintSystem};
use crate::polyhedral::expr::{AffineExpr, Div};
use crate::polyhedral::space::Param;
use crate::polyhedral::Int;
use log::{debug, trace};
use num_integer::Integer;
use std::collections::{BTreeMap, BTreeSet};

/// Beyond this many rows, elimination gives up.
const MAX_ROWS: usize = 512;

/// A flattened constraint: `coeffs . x + constant (>= | =) 0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Row {
    coeffs: Vec<Int>,
    constant: Int,
    eq: bool,
}

impl Row {
    fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|&c| c == 0)
    }

    /// Divide by the gcd of the coefficients.  Returns `false` when the row
    /// has no integer solution.
    fn normalize(&mut self) -> bool {
        let g = self.coeffs.iter().fold(0, |g: Int, c| g.gcd(c));
        if g <= 1 {
            return true;
        }
        if self.eq {
            if self.constant % g != 0 {
                return false;
            }
            self.constant /= g;
        } else {
            self.constant = Integer::div_floor(&self.constant, &g);
        }
        for c in &mut self.coeffs {
            *c /= g;
        }
        true
    }

    /// `self + factor * other`
    fn add_scaled(&mut self, other: &Row, factor: Int) {
        for (a, b) in self.coeffs.iter_mut().zip(&other.coeffs) {
            *a += factor * b;
        }
        self.constant += factor * other.constant;
    }
}

/// Column layout of a flattened system: variables, then parameters, then
/// floor-division terms.
struct Columns {
    n_var: usize,
    params: BTreeMap<Param, usize>,
    divs: BTreeMap<Div, usize>,
    /// Division terms in dependency order (inner terms first)
    div_list: Vec<Div>,
}

impl Columns {
    fn new(sys: &ConstraintSystem) -> Self {
        let mut params = BTreeSet::new();
        let mut div_list = Vec::new();
        for c in &sys.constraints {
            c.expr.collect_params(&mut params);
            collect_divs(&c.expr, &mut div_list);
        }
        let n_var = sys.n_var;
        let params: BTreeMap<Param, usize> = params.into_iter()
            .enumerate()
            .map(|(i, p)| (p, n_var + i))
            .collect();
        let base = n_var + params.len();
        let divs = div_list.iter()
            .enumerate()
            .map(|(i, d)| (d.clone(), base + i))
            .collect();
        Self { n_var, params, divs, div_list }
    }

    fn len(&self) -> usize {
        self.n_var + self.params.len() + self.div_list.len()
    }

    fn row(&self, expr: &AffineExpr, eq: bool) -> Row {
        let mut coeffs = vec![0; self.len()];
        coeffs[..self.n_var].copy_from_slice(&expr.coeffs);
        for (p, &c) in &expr.params {
            coeffs[self.params[p]] += c;
        }
        for (d, &c) in &expr.divs {
            coeffs[self.divs[d]] += c;
        }
        Row { coeffs, constant: expr.constant, eq }
    }

    /// Rows of the system plus the defining bounds of each division column:
    /// `0 <= num - d*q <= d - 1`.
    fn rows(&self, sys: &ConstraintSystem) -> Vec<Row> {
        let mut rows: Vec<Row> = sys.constraints.iter()
            .map(|c| self.row(&c.expr, c.is_equality()))
            .collect();
        for div in &self.div_list {
            let q = self.divs[div];
            let mut lower = self.row(&div.num, false);
            lower.coeffs[q] -= div.denom;
            let mut upper = lower.clone();
            for c in &mut upper.coeffs {
                *c = -*c;
            }
            upper.constant = -upper.constant + div.denom - 1;
            rows.push(lower);
            rows.push(upper);
        }
        rows
    }
}

fn collect_divs(expr: &AffineExpr, out: &mut Vec<Div>) {
    for div in expr.divs.keys() {
        collect_divs(&div.num, out);
        if !out.contains(div) {
            out.push(div.clone());
        }
    }
}

/// Normalize rows, drop satisfied constant rows and duplicates.
/// Returns `false` if some row is infeasible.
fn clean(rows: &mut Vec<Row>) -> bool {
    let mut seen = BTreeSet::new();
    let mut kept = Vec::with_capacity(rows.len());
    for mut row in rows.drain(..) {
        if !row.normalize() {
            return false;
        }
        if row.is_constant() {
            let ok = if row.eq { row.constant == 0 } else { row.constant >= 0 };
            if !ok {
                return false;
            }
            continue;
        }
        let key = (row.coeffs.clone(), row.constant, row.eq);
        if seen.insert(key) {
            kept.push(row);
        }
    }
    *rows = kept;
    true
}

/// Is the system provably without integer solutions?
pub fn is_system_empty(sys: &ConstraintSystem) -> bool {
    if sys.is_obviously_empty() {
        return true;
    }
    let columns = Columns::new(sys);
    let mut rows = columns.rows(sys);
    let n_col = columns.len();

    loop {
        if !clean(&mut rows) {
            return true;
        }
        if rows.is_empty() {
            return false;
        }
        if rows.len() > MAX_ROWS {
            trace!("emptiness check gave up after {} rows", rows.len());
            return false;
        }

        // Substitute through an equality with a unit coefficient.
        let unit_eq = rows.iter().enumerate().find_map(|(r, row)| {
            if !row.eq {
                return None;
            }
            row.coeffs.iter().position(|c| c.abs() == 1).map(|col| (r, col))
        });
        if let Some((r, col)) = unit_eq {
            let eq = rows.swap_remove(r);
            let a = eq.coeffs[col];
            for row in &mut rows {
                let c = row.coeffs[col];
                if c != 0 {
                    row.add_scaled(&eq, -c * a);
                }
            }
            continue;
        }

        // Remaining equalities are relaxed to pairs of inequalities.
        if rows.iter().any(|r| r.eq) {
            let mut relaxed = Vec::with_capacity(rows.len() + 2);
            for row in rows.drain(..) {
                if row.eq {
                    let mut neg = row.clone();
                    for c in &mut neg.coeffs {
                        *c = -*c;
                    }
                    neg.constant = -neg.constant;
                    neg.eq = false;
                    relaxed.push(Row { eq: false, ..row });
                    relaxed.push(neg);
                } else {
                    relaxed.push(row);
                }
            }
            rows = relaxed;
            continue;
        }

        // Eliminate the column producing the fewest combinations.
        let mut best: Option<(usize, usize)> = None;
        for col in 0..n_col {
            let lower = rows.iter().filter(|r| r.coeffs[col] > 0).count();
            let upper = rows.iter().filter(|r| r.coeffs[col] < 0).count();
            if lower + upper == 0 {
                continue;
            }
            let cost = lower * upper;
            if best.map_or(true, |(_, c)| cost < c) {
                best = Some((col, cost));
            }
        }
        let Some((col, _)) = best else {
            return false;
        };
        let (with, mut without): (Vec<Row>, Vec<Row>) =
            rows.drain(..).partition(|r| r.coeffs[col] != 0);
        let lowers: Vec<&Row> = with.iter().filter(|r| r.coeffs[col] > 0).collect();
        let uppers: Vec<&Row> = with.iter().filter(|r| r.coeffs[col] < 0).collect();
        for l in &lowers {
            for u in &uppers {
                let a = l.coeffs[col];
                let b = -u.coeffs[col];
                let mut combined = (*l).clone();
                for c in &mut combined.coeffs {
                    *c *= b;
                }
                combined.constant *= b;
                combined.add_scaled(u, a);
                without.push(combined);
            }
        }
        rows = without;
    }
}

/// Result of eliminating a variable.
#[derive(Debug, Clone)]
pub struct Elimination {
    /// The system over one variable less
    pub system: ConstraintSystem,
    /// Whether the result is exactly the projection
    pub exact: bool,
}

/// Eliminate variable `var` from `sys`; the result ranges over the remaining
/// variables, renumbered.
pub fn eliminate_var(sys: &ConstraintSystem, var: usize) -> Elimination {
    let n = sys.n_var;
    assert!(var < n);
    let finish = |cs: Vec<Constraint>, exact: bool| {
        let constraints = cs.into_iter()
            .map(|c| Constraint::new(c.expr.remove_vars(var, 1), c.kind));
        Elimination {
            system: ConstraintSystem::from_constraints(n - 1, constraints),
            exact,
        }
    };

    if !sys.involves_var(var) {
        return finish(sys.constraints.clone(), true);
    }

    if sys.constraints.iter().any(|c| c.expr.involves_var_in_divs(var)) {
        debug!("dropping constraints with variable {} inside floor terms", var);
        let kept = sys.constraints.iter()
            .filter(|c| !c.expr.involves_var(var))
            .cloned()
            .collect();
        return finish(kept, false);
    }

    // Prefer an equality, with a unit coefficient if possible.
    let pick = sys.constraints.iter()
        .filter(|c| c.is_equality() && c.expr.coeff(var) != 0)
        .min_by_key(|c| c.expr.coeff(var).abs());
    if let Some(eq) = pick {
        let (a, rest) = if eq.expr.coeff(var) > 0 {
            (eq.expr.coeff(var), eq.expr.without_var(var))
        } else {
            (-eq.expr.coeff(var), (-eq.expr.clone()).without_var(var))
        };
        // a * x + rest = 0
        let mut result = Vec::new();
        if a > 1 {
            result.push(Constraint::eq_zero(rest.mod_val(a)));
        }
        for c in &sys.constraints {
            if std::ptr::eq(c, eq) {
                continue;
            }
            let b = c.expr.coeff(var);
            if b == 0 {
                result.push(c.clone());
                continue;
            }
            if a == 1 {
                result.push(Constraint::new(c.expr.substitute_var(var, &(-rest.clone())), c.kind));
            } else {
                // a*(b*x + f) = a*f - b*rest
                let f = c.expr.without_var(var);
                result.push(Constraint::new(f.scale(a) - rest.scale(b), c.kind));
            }
        }
        return finish(result, true);
    }

    let mut lowers = Vec::new();
    let mut uppers = Vec::new();
    let mut result = Vec::new();
    for c in &sys.constraints {
        match c.expr.coeff(var) {
            0 => result.push(c.clone()),
            b if b > 0 => lowers.push(c),
            _ => uppers.push(c),
        }
    }
    let mut exact = true;
    for l in &lowers {
        for u in &uppers {
            let a = l.expr.coeff(var);
            let b = -u.expr.coeff(var);
            if a != 1 && b != 1 {
                exact = false;
            }
            let combined = l.expr.without_var(var).scale(b) + u.expr.without_var(var).scale(a);
            result.push(Constraint::ge_zero(combined));
        }
    }
    if !exact {
        debug!("rational shadow used while eliminating variable {}", var);
    }
    finish(result, exact)
}

/// Eliminate the variables `first..first + n`.
pub fn eliminate_vars(sys: &ConstraintSystem, first: usize, n: usize) -> Elimination {
    let mut current = Elimination { system: sys.clone(), exact: true };
    for var in (first..first + n).rev() {
        let next = eliminate_var(&current.system, var);
        current = Elimination {
            system: next.system,
            exact: current.exact && next.exact,
        };
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(i: usize, n: usize) -> AffineExpr {
        AffineExpr::var(i, n)
    }

    #[test]
    fn test_bounds_conflict() {
        // i >= 5 and i <= 3
        let sys = ConstraintSystem::from_constraints(1, [
            Constraint::lower_bound(0, 5, 1),
            Constraint::upper_bound(0, 3, 1),
        ]);
        assert!(is_system_empty(&sys));
    }

    #[test]
    fn test_nonempty_box() {
        let sys = ConstraintSystem::from_constraints(2, [
            Constraint::lower_bound(0, 0, 2),
            Constraint::upper_bound(0, 9, 2),
            Constraint::le(var(0, 2), var(1, 2)),
        ]);
        assert!(!is_system_empty(&sys));
    }

    #[test]
    fn test_integer_tightening() {
        // 1 <= 2i <= 1 has no integer solution
        let two_i = var(0, 1).scale(2);
        let sys = ConstraintSystem::from_constraints(1, [
            Constraint::ge(two_i.clone(), AffineExpr::constant(1, 1)),
            Constraint::le(two_i, AffineExpr::constant(1, 1)),
        ]);
        assert!(is_system_empty(&sys));
    }

    #[test]
    fn test_floor_term_bounds() {
        // floor(i/4) >= 1 and i <= 3
        let sys = ConstraintSystem::from_constraints(1, [
            Constraint::ge(var(0, 1).floor_div(4), AffineExpr::constant(1, 1)),
            Constraint::upper_bound(0, 3, 1),
        ]);
        assert!(is_system_empty(&sys));
    }

    #[test]
    fn test_params_are_free() {
        let n = AffineExpr::param(Param::named("N"), 1);
        // i >= N and i <= N - 1
        let sys = ConstraintSystem::from_constraints(1, [
            Constraint::ge(var(0, 1), n.clone()),
            Constraint::le(var(0, 1), n.clone().add_constant(-1)),
        ]);
        assert!(is_system_empty(&sys));
        let sys = ConstraintSystem::from_constraints(1, [Constraint::ge(var(0, 1), n)]);
        assert!(!is_system_empty(&sys));
    }

    #[test]
    fn test_eliminate_through_equality() {
        // j = i + 1, 0 <= j <= 5; eliminating j gives -1 <= i <= 4
        let sys = ConstraintSystem::from_constraints(2, [
            Constraint::eq(var(1, 2), var(0, 2).add_constant(1)),
            Constraint::lower_bound(1, 0, 2),
            Constraint::upper_bound(1, 5, 2),
        ]);
        let result = eliminate_var(&sys, 1);
        assert!(result.exact);
        let none = |_: &Param| None;
        assert_eq!(result.system.is_satisfied(&[4], &none), Some(true));
        assert_eq!(result.system.is_satisfied(&[-1], &none), Some(true));
        assert_eq!(result.system.is_satisfied(&[5], &none), Some(false));
    }

    #[test]
    fn test_eliminate_non_unit_equality_keeps_congruence() {
        // i = 2j: projecting out j leaves the even values of i
        let sys = ConstraintSystem::from_constraints(2, [
            Constraint::eq(var(0, 2), var(1, 2).scale(2)),
        ]);
        let result = eliminate_var(&sys, 1);
        assert!(result.exact);
        let none = |_: &Param| None;
        assert_eq!(result.system.is_satisfied(&[4], &none), Some(true));
        assert_eq!(result.system.is_satisfied(&[3], &none), Some(false));
    }

    #[test]
    fn test_fourier_motzkin_exactness() {
        // 0 <= i <= j <= 10, eliminating j
        let sys = ConstraintSystem::from_constraints(2, [
            Constraint::lower_bound(0, 0, 2),
            Constraint::le(var(0, 2), var(1, 2)),
            Constraint::upper_bound(1, 10, 2),
        ]);
        let result = eliminate_var(&sys, 1);
        assert!(result.exact);
        let none = |_: &Param| None;
        assert_eq!(result.system.is_satisfied(&[10], &none), Some(true));
        assert_eq!(result.system.is_satisfied(&[11], &none), Some(false));
    }
}
