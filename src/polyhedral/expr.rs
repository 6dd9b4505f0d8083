//! Quasi-affine expressions.
//!
//! An affine expression is a linear combination of variables and named
//! parameters plus a constant, extended with integer floor-division terms:
//! `aff(x) = c0 + c1*x1 + ... + p1*N + ... + k1*floor(e1/d1) + ...`
//!
//! Floor-division terms are canonical: the numerator's coefficients lie in
//! `[0, d)`, common factors with the denominator are divided out and terms
//! with a constant numerator are folded. Two expressions built along
//! different routes therefore compare equal whenever their terms agree.

use crate::polyhedral::space::Param;
use crate::polyhedral::Int;
use num_integer::Integer;
use num_traits::Zero;
use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, Sub, Neg};

/// An integer value or NaN, the payload of integer literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Val {
    /// A known integer
    Int(Int),
    /// No value
    NaN,
}

impl Val {
    /// The integer value, unless NaN.
    pub fn as_int(&self) -> Option<Int> {
        match self {
            Val::Int(v) => Some(*v),
            Val::NaN => None,
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Int(v) => write!(f, "{}", v),
            Val::NaN => write!(f, "NaN"),
        }
    }
}

/// `floor(num / denom)` with `denom >= 2`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Div {
    /// Numerator
    pub num: Box<AffineExpr>,
    /// Positive denominator
    pub denom: Int,
}

/// A quasi-affine expression over `n_var` variables.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AffineExpr {
    /// Constant term
    pub constant: Int,
    /// Coefficients for each variable (index = variable index)
    pub coeffs: Vec<Int>,
    /// Non-zero coefficients of parameters
    pub params: BTreeMap<Param, Int>,
    /// Non-zero coefficients of floor-division terms
    pub divs: BTreeMap<Div, Int>,
}

fn merge_scaled<K: Ord + Clone>(into: &mut BTreeMap<K, Int>, from: &BTreeMap<K, Int>, factor: Int) {
    for (key, &c) in from {
        let entry = into.entry(key.clone()).or_insert(0);
        *entry += c * factor;
        if entry.is_zero() {
            into.remove(key);
        }
    }
}

impl AffineExpr {
    /// Create a zero expression.
    pub fn zero(n_var: usize) -> Self {
        Self {
            constant: 0,
            coeffs: vec![0; n_var],
            params: BTreeMap::new(),
            divs: BTreeMap::new(),
        }
    }

    /// Create a constant expression.
    pub fn constant(value: Int, n_var: usize) -> Self {
        let mut expr = Self::zero(n_var);
        expr.constant = value;
        expr
    }

    /// Create an expression for a single variable.
    pub fn var(var: usize, n_var: usize) -> Self {
        assert!(var < n_var, "variable {} out of range ({} variables)", var, n_var);
        let mut expr = Self::zero(n_var);
        expr.coeffs[var] = 1;
        expr
    }

    /// Create an expression for a parameter.
    pub fn param(param: Param, n_var: usize) -> Self {
        let mut expr = Self::zero(n_var);
        expr.params.insert(param, 1);
        expr
    }

    /// Get the number of variables.
    pub fn n_var(&self) -> usize {
        self.coeffs.len()
    }

    /// Check if this is a constant expression.
    pub fn is_constant(&self) -> bool {
        self.coeffs.iter().all(|c| c.is_zero()) && self.params.is_empty() && self.divs.is_empty()
    }

    /// Check if this expression is zero.
    pub fn is_zero(&self) -> bool {
        self.constant == 0 && self.is_constant()
    }

    /// Get the constant value if this is a constant expression.
    pub fn as_constant(&self) -> Option<Int> {
        if self.is_constant() {
            Some(self.constant)
        } else {
            None
        }
    }

    /// Get the top-level coefficient of a variable.
    pub fn coeff(&self, var: usize) -> Int {
        self.coeffs.get(var).copied().unwrap_or(0)
    }

    /// Does the variable occur anywhere, including inside floor terms?
    pub fn involves_var(&self, var: usize) -> bool {
        self.coeff(var) != 0 || self.divs.keys().any(|d| d.num.involves_var(var))
    }

    /// Does the variable occur inside a floor term?
    pub fn involves_var_in_divs(&self, var: usize) -> bool {
        self.divs.keys().any(|d| d.num.involves_var(var))
    }

    /// Does any parameter satisfying `pred` occur, including inside floor terms?
    pub fn involves_param_where(&self, pred: &dyn Fn(&Param) -> bool) -> bool {
        self.params.keys().any(pred) || self.divs.keys().any(|d| d.num.involves_param_where(pred))
    }

    /// Does `param` occur in the expression or one of its divisions?
    pub fn involves_param(&self, param: &Param) -> bool {
        self.involves_param_where(&|p| p == param)
    }

    /// Collect every parameter occurring in the expression.
    pub fn collect_params(&self, out: &mut BTreeSet<Param>) {
        out.extend(self.params.keys().cloned());
        for div in self.divs.keys() {
            div.num.collect_params(out);
        }
    }

    /// Scale the expression by a constant.
    pub fn scale(&self, factor: Int) -> Self {
        if factor == 0 {
            return Self::zero(self.n_var());
        }
        let mut result = Self::zero(self.n_var());
        result.constant = self.constant * factor;
        result.coeffs = self.coeffs.iter().map(|&c| c * factor).collect();
        merge_scaled(&mut result.params, &self.params, factor);
        merge_scaled(&mut result.divs, &self.divs, factor);
        result
    }

    /// Add a constant.
    pub fn add_constant(mut self, value: Int) -> Self {
        self.constant += value;
        self
    }

    /// Add `factor * floor(div)`.
    fn add_div(&mut self, div: Div, factor: Int) {
        let entry = self.divs.entry(div.clone()).or_insert(0);
        *entry += factor;
        if entry.is_zero() {
            self.divs.remove(&div);
        }
    }

    /// GCD of the non-constant top-level coefficients (0 if there are none).
    pub fn content(&self) -> Int {
        let mut g: Int = 0;
        for &c in &self.coeffs {
            g = g.gcd(&c);
        }
        for &c in self.params.values() {
            g = g.gcd(&c);
        }
        for &c in self.divs.values() {
            g = g.gcd(&c);
        }
        g
    }

    /// Divide every non-constant coefficient by `g`, which must divide them.
    /// The constant is rounded down.
    pub fn div_content_floor(&self, g: Int) -> Self {
        assert!(g > 0);
        let mut result = Self::zero(self.n_var());
        result.constant = Integer::div_floor(&self.constant, &g);
        result.coeffs = self.coeffs.iter().map(|&c| c / g).collect();
        result.params = self.params.iter().map(|(p, &c)| (p.clone(), c / g)).collect();
        result.divs = self.divs.iter().map(|(d, &c)| (d.clone(), c / g)).collect();
        result
    }

    /// `floor(self / d)` for a positive constant `d`.
    pub fn floor_div(&self, d: Int) -> Self {
        assert!(d > 0, "floor division by non-positive {}", d);
        if d == 1 {
            return self.clone();
        }
        let n = self.n_var();
        let mut quot = Self::zero(n);
        let mut rem = Self::zero(n);
        quot.constant = Integer::div_floor(&self.constant, &d);
        rem.constant = Integer::mod_floor(&self.constant, &d);
        for (i, &c) in self.coeffs.iter().enumerate() {
            quot.coeffs[i] = Integer::div_floor(&c, &d);
            rem.coeffs[i] = Integer::mod_floor(&c, &d);
        }
        for (p, &c) in &self.params {
            let (q, r) = (Integer::div_floor(&c, &d), Integer::mod_floor(&c, &d));
            if q != 0 {
                quot.params.insert(p.clone(), q);
            }
            if r != 0 {
                rem.params.insert(p.clone(), r);
            }
        }
        for (div, &c) in &self.divs {
            let (q, r) = (Integer::div_floor(&c, &d), Integer::mod_floor(&c, &d));
            if q != 0 {
                quot.divs.insert(div.clone(), q);
            }
            if r != 0 {
                rem.divs.insert(div.clone(), r);
            }
        }
        if rem.is_constant() {
            // 0 <= rem < d
            return quot;
        }
        // floor((g*y + r) / (g*d')) = floor((y + floor(r/g)) / d')
        let g = rem.content().gcd(&d);
        let mut denom = d;
        if g > 1 {
            rem = rem.div_content_floor(g);
            denom = d / g;
            if denom == 1 {
                return quot + rem;
            }
        }
        quot.add_div(Div { num: Box::new(rem), denom }, 1);
        quot
    }

    /// `ceil(self / d)` for a positive constant `d`.
    pub fn ceil_div(&self, d: Int) -> Self {
        -(-self.clone()).floor_div(d)
    }

    /// `self mod d` (non-negative remainder) for a positive constant `d`.
    pub fn mod_val(&self, d: Int) -> Self {
        self.clone() - self.floor_div(d).scale(d)
    }

    /// Evaluate the expression at a point.
    ///
    /// Returns `None` when a parameter has no value.
    pub fn evaluate(&self, point: &[Int], params: &dyn Fn(&Param) -> Option<Int>) -> Option<Int> {
        let mut result = self.constant;
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c != 0 {
                result += c * point.get(i).copied()?;
            }
        }
        for (p, &c) in &self.params {
            result += c * params(p)?;
        }
        for (div, &c) in &self.divs {
            let num = div.num.evaluate(point, params)?;
            result += c * Integer::div_floor(&num, &div.denom);
        }
        Some(result)
    }

    /// Substitute every variable `i` by `subs[i]`, an expression over `n_new`
    /// variables.
    pub fn pullback(&self, subs: &[AffineExpr], n_new: usize) -> Self {
        assert_eq!(subs.len(), self.n_var(), "pullback needs one expression per variable");
        let mut result = Self::constant(self.constant, n_new);
        result.params = self.params.clone();
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c != 0 {
                result = result + subs[i].scale(c);
            }
        }
        for (div, &c) in &self.divs {
            let num = div.num.pullback(subs, n_new);
            result = result + num.floor_div(div.denom).scale(c);
        }
        result
    }

    /// Insert `n` unused variables before position `pos`.
    pub fn insert_vars(&self, pos: usize, n: usize) -> Self {
        if n == 0 {
            return self.clone();
        }
        let total = self.n_var() + n;
        let subs: Vec<AffineExpr> = (0..self.n_var())
            .map(|i| AffineExpr::var(if i < pos { i } else { i + n }, total))
            .collect();
        self.pullback(&subs, total)
    }

    /// Remove the variables `pos..pos + n`, which must not occur.
    pub fn remove_vars(&self, pos: usize, n: usize) -> Self {
        if n == 0 {
            return self.clone();
        }
        debug_assert!((pos..pos + n).all(|v| !self.involves_var(v)));
        let total = self.n_var() - n;
        let subs: Vec<AffineExpr> = (0..self.n_var())
            .map(|i| {
                if i < pos {
                    AffineExpr::var(i, total)
                } else if i < pos + n {
                    AffineExpr::zero(total)
                } else {
                    AffineExpr::var(i - n, total)
                }
            })
            .collect();
        self.pullback(&subs, total)
    }

    /// The expression with the top-level coefficient of `var` set to zero.
    pub fn without_var(&self, var: usize) -> Self {
        let mut result = self.clone();
        result.coeffs[var] = 0;
        result
    }

    /// Substitute a single variable by `value` (an expression over the same
    /// variables).
    pub fn substitute_var(&self, var: usize, value: &AffineExpr) -> Self {
        let n = self.n_var();
        let subs: Vec<AffineExpr> = (0..n)
            .map(|i| if i == var { value.clone() } else { AffineExpr::var(i, n) })
            .collect();
        self.pullback(&subs, n)
    }

    /// Substitute a parameter by `value` (an expression over the same
    /// variables).
    pub fn substitute_param(&self, param: &Param, value: &AffineExpr) -> Self {
        if !self.involves_param(param) {
            return self.clone();
        }
        let mut result = self.clone();
        result.divs.clear();
        if let Some(c) = result.params.remove(param) {
            result = result + value.scale(c);
        }
        for (div, &c) in &self.divs {
            let num = div.num.substitute_param(param, value);
            result = result + num.floor_div(div.denom).scale(c);
        }
        result
    }

    /// Convert to string with given variable names.
    pub fn to_string_with_names(&self, var_names: &[String]) -> String {
        let mut parts = Vec::new();

        for (i, &c) in self.coeffs.iter().enumerate() {
            if c != 0 {
                let default_name = format!("d{}", i);
                let name = var_names.get(i)
                    .map(|s| s.as_str())
                    .unwrap_or(&default_name);
                parts.push(term(c, name));
            }
        }

        for (p, &c) in &self.params {
            parts.push(term(c, &p.to_string()));
        }

        for (div, &c) in &self.divs {
            let name = format!("floor(({})/{})", div.num.to_string_with_names(var_names), div.denom);
            parts.push(term(c, &name));
        }

        if self.constant != 0 || parts.is_empty() {
            parts.push(format!("{}", self.constant));
        }

        parts.join(" + ").replace("+ -", "- ")
    }
}

fn term(c: Int, name: &str) -> String {
    if c == 1 {
        name.to_string()
    } else if c == -1 {
        format!("-{}", name)
    } else {
        format!("{}*{}", c, name)
    }
}

impl Add for AffineExpr {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        assert_eq!(self.coeffs.len(), other.coeffs.len());
        self.constant += other.constant;
        for (a, b) in self.coeffs.iter_mut().zip(&other.coeffs) {
            *a += b;
        }
        merge_scaled(&mut self.params, &other.params, 1);
        merge_scaled(&mut self.divs, &other.divs, 1);
        self
    }
}

impl Sub for AffineExpr {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self + other.scale(-1)
    }
}

impl Neg for AffineExpr {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-1)
    }
}

impl fmt::Display for AffineExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let var_names: Vec<String> = (0..self.n_var()).map(|i| format!("i{}", i)).collect();
        write!(f, "{}", self.to_string_with_names(&var_names))
    }
}
