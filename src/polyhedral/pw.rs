//! Piecewise quasi-affine functions.
//!
//! A [`PwAff`] assigns a quasi-affine value, or NaN, to each piece of a
//! partition of its domain. NaN marks values that have no affine
//! representation; it propagates through every operation so that callers only
//! need to test for it at the end. Pieces whose domain is provably empty are
//! dropped as soon as they are created.
//!
//! A [`MultiPwAff`] is a tuple of such functions over a common domain with a
//! (possibly named) range tuple, the form of an access's index expression.

use crate::polyhedral::constraint::{Constraint, ConstraintSystem};
use crate::polyhedral::expr::{AffineExpr, Val};
use crate::polyhedral::map::AffineMap;
use crate::polyhedral::operations::{eliminate_var, is_system_empty};
use crate::polyhedral::set::IntegerSet;
use crate::polyhedral::space::{Param, Space, Tuple};
use crate::polyhedral::Int;
use crate::utils::intern::Symbol;
use std::collections::BTreeSet;
use std::fmt;

/// One piece of a piecewise function.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Piece {
    /// Where the piece applies
    pub domain: ConstraintSystem,
    /// `None` is NaN
    pub value: Option<AffineExpr>,
}

/// Comparison operators producing indicator functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// A piecewise quasi-affine function over a set space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PwAff {
    /// Space of the domain
    pub space: Space,
    /// Pieces with pairwise disjoint domains
    pub pieces: Vec<Piece>,
}

fn push_piece(pieces: &mut Vec<Piece>, domain: ConstraintSystem, value: Option<AffineExpr>) {
    if !is_system_empty(&domain) {
        pieces.push(Piece { domain, value });
    }
}

fn with_constraint(domain: &ConstraintSystem, constraint: Constraint) -> ConstraintSystem {
    let mut result = domain.clone();
    result.add(constraint);
    result
}

/// Alternatives covering the points where `v` is non-zero.
fn non_zero_alternatives(v: &AffineExpr) -> [Constraint; 2] {
    [
        Constraint::ge_zero(v.clone().add_constant(-1)),
        Constraint::ge_zero((-v.clone()).add_constant(-1)),
    ]
}

impl PwAff {
    /// The function equal to `value` on `domain`.
    pub fn from_aff(domain: &IntegerSet, value: AffineExpr) -> Self {
        assert_eq!(value.n_var(), domain.dim());
        let pieces = domain.pieces.iter()
            .map(|d| Piece { domain: d.clone(), value: Some(value.clone()) })
            .collect();
        Self { space: domain.space.clone(), pieces }
    }

    /// The constant function `value` on `domain`.
    pub fn constant_on(domain: &IntegerSet, value: Int) -> Self {
        Self::from_aff(domain, AffineExpr::constant(value, domain.dim()))
    }

    /// The constant zero on `domain`.
    pub fn zero_on(domain: &IntegerSet) -> Self {
        Self::constant_on(domain, 0)
    }

    /// NaN everywhere on `domain`.
    pub fn nan_on_domain(domain: &IntegerSet) -> Self {
        let pieces = domain.pieces.iter()
            .map(|d| Piece { domain: d.clone(), value: None })
            .collect();
        Self { space: domain.space.clone(), pieces }
    }

    /// The value of variable `pos` on `domain`.
    pub fn var_on_domain(domain: &IntegerSet, pos: usize) -> Self {
        Self::from_aff(domain, AffineExpr::var(pos, domain.dim()))
    }

    /// The value of a parameter on `domain`.
    pub fn param_on_domain(domain: &IntegerSet, param: Param) -> Self {
        Self::from_aff(domain, AffineExpr::param(param, domain.dim()))
    }

    /// Number of domain dimensions.
    pub fn dim(&self) -> usize {
        self.space.dim()
    }

    /// Number of pieces, NaN pieces included.
    pub fn n_piece(&self) -> usize {
        self.pieces.len()
    }

    /// The set on which the function is defined (NaN pieces included).
    pub fn domain(&self) -> IntegerSet {
        IntegerSet {
            space: self.space.clone(),
            pieces: self.pieces.iter().map(|p| p.domain.clone()).collect(),
        }
    }

    /// Does any piece have no value?
    pub fn involves_nan(&self) -> bool {
        self.pieces.iter().any(|p| p.value.is_none())
    }

    /// Is the function constant on each piece?
    pub fn is_cst(&self) -> bool {
        self.pieces.iter().all(|p| p.value.as_ref().map_or(true, AffineExpr::is_constant))
    }

    /// The single constant value of the function, if it has one.
    pub fn as_constant(&self) -> Option<Int> {
        let mut result = None;
        for piece in &self.pieces {
            let c = piece.value.as_ref()?.as_constant()?;
            if result.map_or(false, |r| r != c) {
                return None;
            }
            result = Some(c);
        }
        result
    }

    fn assert_compatible(&self, other: &PwAff) {
        assert_eq!(self.dim(), other.dim(), "combining functions over {} and {}", self.space, other.space);
    }

    fn map_values(&self, f: impl Fn(&AffineExpr) -> Option<AffineExpr>) -> PwAff {
        let pieces = self.pieces.iter()
            .map(|p| Piece { domain: p.domain.clone(), value: p.value.as_ref().and_then(&f) })
            .collect();
        PwAff { space: self.space.clone(), pieces }
    }

    /// Combine two functions on the intersection of their domains.
    fn combine(&self, other: &PwAff, f: impl Fn(&AffineExpr, &AffineExpr) -> Option<AffineExpr>) -> PwAff {
        self.assert_compatible(other);
        let mut pieces = Vec::new();
        for a in &self.pieces {
            for b in &other.pieces {
                let value = match (&a.value, &b.value) {
                    (Some(va), Some(vb)) => f(va, vb),
                    _ => None,
                };
                push_piece(&mut pieces, a.domain.intersect(&b.domain), value);
            }
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// Sum on the common domain.
    pub fn add(&self, other: &PwAff) -> PwAff {
        self.combine(other, |a, b| Some(a.clone() + b.clone()))
    }

    /// Difference on the common domain.
    pub fn sub(&self, other: &PwAff) -> PwAff {
        self.combine(other, |a, b| Some(a.clone() - b.clone()))
    }

    /// Negation.
    pub fn neg(&self) -> PwAff {
        self.map_values(|v| Some(-v.clone()))
    }

    /// Product with a constant.
    pub fn scale(&self, factor: Int) -> PwAff {
        self.map_values(|v| Some(v.scale(factor)))
    }

    /// Product; on pieces where neither factor is constant the result is NaN.
    pub fn mul(&self, other: &PwAff) -> PwAff {
        self.combine(other, |a, b| {
            if let Some(c) = a.as_constant() {
                Some(b.scale(c))
            } else {
                b.as_constant().map(|c| a.scale(c))
            }
        })
    }

    /// Quotient and remainder of truncating division by a constant, per
    /// piece of the result.
    fn tdiv(&self, d: Int, remainder: bool) -> PwAff {
        if d == 0 {
            return PwAff::nan_on_domain(&self.domain());
        }
        let (dd, sign) = if d > 0 { (d, 1) } else { (-d, -1) };
        let result = |v: &AffineExpr, q: AffineExpr| {
            let q = q.scale(sign);
            if remainder { v.clone() - q.scale(d) } else { q }
        };
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            let Some(v) = &piece.value else {
                pieces.push(piece.clone());
                continue;
            };
            if let Some(c) = v.as_constant() {
                let value = if remainder { c % d } else { c / d };
                pieces.push(Piece { domain: piece.domain.clone(), value: Some(AffineExpr::constant(value, v.n_var())) });
                continue;
            }
            // v >= 0: floor(v/|d|); v < 0: ceil(v/|d|)
            let nonneg = with_constraint(&piece.domain, Constraint::ge_zero(v.clone()));
            push_piece(&mut pieces, nonneg, Some(result(v, v.floor_div(dd))));
            let neg = with_constraint(&piece.domain, Constraint::ge_zero((-v.clone()).add_constant(-1)));
            push_piece(&mut pieces, neg, Some(result(v, v.ceil_div(dd))));
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// Quotient of division by `d`, rounded toward zero.
    pub fn tdiv_q(&self, d: Int) -> PwAff {
        self.tdiv(d, false)
    }

    /// Remainder of division by `d` rounded toward zero; has the sign of the
    /// dividend.
    pub fn tdiv_r(&self, d: Int) -> PwAff {
        self.tdiv(d, true)
    }

    /// `floor(self / d)`; NaN for a non-positive `d`.
    pub fn floor_div_val(&self, d: Int) -> PwAff {
        self.map_values(|v| (d > 0).then(|| v.floor_div(d)))
    }

    /// `ceil(self / d)`; NaN for a non-positive `d`.
    pub fn ceil_div_val(&self, d: Int) -> PwAff {
        self.map_values(|v| (d > 0).then(|| v.ceil_div(d)))
    }

    /// Non-negative remainder modulo `d`; NaN for a non-positive `d`.
    pub fn mod_val(&self, d: Int) -> PwAff {
        self.map_values(|v| (d > 0).then(|| v.mod_val(d)))
    }

    fn min_max(&self, other: &PwAff, take_min: bool) -> PwAff {
        self.assert_compatible(other);
        let mut pieces = Vec::new();
        for a in &self.pieces {
            for b in &other.pieces {
                let domain = a.domain.intersect(&b.domain);
                let (Some(va), Some(vb)) = (&a.value, &b.value) else {
                    push_piece(&mut pieces, domain, None);
                    continue;
                };
                // a <= b
                let a_le_b = Constraint::ge_zero(vb.clone() - va.clone());
                let a_gt_b = Constraint::ge_zero((va.clone() - vb.clone()).add_constant(-1));
                let (first, second) = if take_min { (va, vb) } else { (vb, va) };
                push_piece(&mut pieces, with_constraint(&domain, a_le_b), Some(first.clone()));
                push_piece(&mut pieces, with_constraint(&domain, a_gt_b), Some(second.clone()));
            }
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// Minimum on the common domain.
    pub fn min(&self, other: &PwAff) -> PwAff {
        self.min_max(other, true)
    }

    /// Maximum on the common domain.
    pub fn max(&self, other: &PwAff) -> PwAff {
        self.min_max(other, false)
    }

    /// `self ? then : otherwise`, taking `then` where `self` is non-zero
    /// and `otherwise` where it is zero. NaN conditions give NaN.
    pub fn cond(&self, then: &PwAff, otherwise: &PwAff) -> PwAff {
        self.assert_compatible(then);
        self.assert_compatible(otherwise);
        let mut pieces = Vec::new();
        let mut select = |domain: ConstraintSystem, branch: &PwAff| {
            for p in &branch.pieces {
                push_piece(&mut pieces, domain.intersect(&p.domain), p.value.clone());
            }
        };
        for piece in &self.pieces {
            let Some(v) = &piece.value else {
                select(piece.domain.clone(), &PwAff::nan_on_domain(&IntegerSet::universe(self.space.clone())));
                continue;
            };
            match v.as_constant() {
                Some(0) => select(piece.domain.clone(), otherwise),
                Some(_) => select(piece.domain.clone(), then),
                None => {
                    for alt in non_zero_alternatives(v) {
                        select(with_constraint(&piece.domain, alt), then);
                    }
                    select(with_constraint(&piece.domain, Constraint::eq_zero(v.clone())), otherwise);
                }
            }
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// NaN on the intersection of the domains of two functions.
    fn nan_on_shared_domain(&self, other: &PwAff) -> PwAff {
        PwAff::nan_on_domain(&self.domain().intersect(&other.domain()))
    }

    /// Indicator function of `self op other` on the intersection of the
    /// domains. If either side involves NaN, the result is NaN everywhere.
    pub fn compare(&self, op: CmpOp, other: &PwAff) -> PwAff {
        self.assert_compatible(other);
        if self.involves_nan() || other.involves_nan() {
            return self.nan_on_shared_domain(other);
        }
        let (lhs, rhs, op) = match op {
            CmpOp::Gt => (other, self, CmpOp::Lt),
            CmpOp::Ge => (other, self, CmpOp::Le),
            _ => (self, other, op),
        };
        let mut pieces = Vec::new();
        for a in &lhs.pieces {
            for b in &rhs.pieces {
                let domain = a.domain.intersect(&b.domain);
                let (Some(va), Some(vb)) = (&a.value, &b.value) else {
                    continue;
                };
                let diff = vb.clone() - va.clone();
                let lt = Constraint::ge_zero(diff.clone().add_constant(-1));
                let ge = Constraint::ge_zero(-diff.clone());
                let le = Constraint::ge_zero(diff.clone());
                let gt = Constraint::ge_zero((-diff.clone()).add_constant(-1));
                let eq = Constraint::eq_zero(diff);
                let (holds, fails): (Vec<Constraint>, Vec<Constraint>) = match op {
                    CmpOp::Lt => (vec![lt], vec![ge]),
                    CmpOp::Le => (vec![le], vec![gt]),
                    CmpOp::Eq => (vec![eq], vec![lt, gt]),
                    CmpOp::Ne => (vec![lt, gt], vec![eq]),
                    CmpOp::Gt | CmpOp::Ge => unreachable!("normalized above"),
                };
                let n = self.dim();
                for c in holds {
                    push_piece(&mut pieces, with_constraint(&domain, c), Some(AffineExpr::constant(1, n)));
                }
                for c in fails {
                    push_piece(&mut pieces, with_constraint(&domain, c), Some(AffineExpr::zero(n)));
                }
            }
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// The function that is 1 on `set` and 0 on the rest of `domain`.
    pub fn indicator(set: &IntegerSet, domain: &IntegerSet) -> PwAff {
        let one = PwAff::constant_on(&set.intersect(domain), 1);
        let zero = PwAff::zero_on(&domain.subtract(set));
        PwAff {
            space: domain.space.clone(),
            pieces: one.pieces.into_iter().chain(zero.pieces).collect(),
        }
    }

    /// Conjunction of two conditions without short-circuiting.
    pub fn and(&self, other: &PwAff) -> PwAff {
        if self.involves_nan() || other.involves_nan() {
            return self.nan_on_shared_domain(other);
        }
        let holds = self.non_zero_set().intersect(&other.non_zero_set());
        let domain = self.domain().intersect(&other.domain());
        PwAff::indicator(&holds, &domain)
    }

    /// Logical negation: 1 where the value is zero, 0 elsewhere.
    pub fn not(&self) -> PwAff {
        let n = self.dim();
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            let Some(v) = &piece.value else {
                pieces.push(piece.clone());
                continue;
            };
            match v.as_constant() {
                Some(c) => pieces.push(Piece {
                    domain: piece.domain.clone(),
                    value: Some(AffineExpr::constant(Int::from(c == 0), n)),
                }),
                None => {
                    let zero = with_constraint(&piece.domain, Constraint::eq_zero(v.clone()));
                    push_piece(&mut pieces, zero, Some(AffineExpr::constant(1, n)));
                    for alt in non_zero_alternatives(v) {
                        push_piece(&mut pieces, with_constraint(&piece.domain, alt), Some(AffineExpr::zero(n)));
                    }
                }
            }
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// Points where the value is non-zero (NaN pieces excluded).
    pub fn non_zero_set(&self) -> IntegerSet {
        let mut result = IntegerSet::empty(self.space.clone());
        for piece in &self.pieces {
            let Some(v) = &piece.value else { continue };
            match v.as_constant() {
                Some(0) => {}
                Some(_) => result.pieces.push(piece.domain.clone()),
                None => {
                    for alt in non_zero_alternatives(v) {
                        let domain = with_constraint(&piece.domain, alt);
                        if !is_system_empty(&domain) {
                            result.pieces.push(domain);
                        }
                    }
                }
            }
        }
        result
    }

    /// Points where the value is zero (NaN pieces excluded).
    pub fn zero_set(&self) -> IntegerSet {
        let mut result = IntegerSet::empty(self.space.clone());
        for piece in &self.pieces {
            let Some(v) = &piece.value else { continue };
            let domain = with_constraint(&piece.domain, Constraint::eq_zero(v.clone()));
            if !is_system_empty(&domain) {
                result.pieces.push(domain);
            }
        }
        result
    }

    /// Restrict the domain to `set`.
    pub fn intersect_domain(&self, set: &IntegerSet) -> PwAff {
        assert_eq!(self.dim(), set.dim());
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            for d in &set.pieces {
                push_piece(&mut pieces, piece.domain.intersect(d), piece.value.clone());
            }
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// Keep only the points where `lo <= value <= hi`; NaN pieces are kept.
    pub fn restrict_range(&self, lo: Int, hi: Int) -> PwAff {
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            let Some(v) = &piece.value else {
                pieces.push(piece.clone());
                continue;
            };
            let mut domain = piece.domain.clone();
            domain.add(Constraint::ge_zero(v.clone().add_constant(-lo)));
            domain.add(Constraint::ge_zero((-v.clone()).add_constant(hi)));
            push_piece(&mut pieces, domain, Some(v.clone()));
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// Keep only the points where the value is non-negative; NaN pieces are
    /// kept.
    pub fn non_negative_part(&self) -> PwAff {
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            match &piece.value {
                Some(v) => push_piece(&mut pieces, with_constraint(&piece.domain, Constraint::ge_zero(v.clone())), Some(v.clone())),
                None => pieces.push(piece.clone()),
            }
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// Simplify the function assuming `context` holds.
    pub fn gist(&self, context: &IntegerSet) -> PwAff {
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            let single = IntegerSet { space: self.space.clone(), pieces: vec![piece.domain.clone()] };
            for domain in single.gist(context).pieces {
                pieces.push(Piece { domain, value: piece.value.clone() });
            }
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// The function `x -> self(map(x))`.
    pub fn pullback(&self, map: &AffineMap) -> PwAff {
        assert_eq!(map.n_out(), self.dim());
        let n_in = map.n_in();
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            let domain = piece.domain.pullback(&map.outputs, n_in);
            let value = piece.value.as_ref().map(|v| v.pullback(&map.outputs, n_in));
            push_piece(&mut pieces, domain, value);
        }
        PwAff { space: map.domain_space(), pieces }
    }

    /// Insert `n` unused variables before position `pos`.
    pub fn insert_dims(&self, pos: usize, n: usize, space: Space) -> PwAff {
        assert_eq!(space.dim(), self.dim() + n);
        let pieces = self.pieces.iter()
            .map(|p| Piece {
                domain: p.domain.insert_vars(pos, n),
                value: p.value.as_ref().map(|v| v.insert_vars(pos, n)),
            })
            .collect();
        PwAff { space, pieces }
    }

    /// Remove domain variable `var`. Piece domains are projected onto the
    /// remaining variables and values that depend on `var` become NaN.
    pub fn project_out_var(&self, var: usize, space: Space) -> PwAff {
        assert_eq!(space.dim() + 1, self.dim());
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            let domain = eliminate_var(&piece.domain, var).system;
            let value = piece.value.as_ref()
                .filter(|v| !v.involves_var(var))
                .map(|v| v.remove_vars(var, 1));
            push_piece(&mut pieces, domain, value);
        }
        PwAff { space, pieces }
    }

    /// Substitute a parameter by an expression over the domain variables.
    pub fn substitute_param(&self, param: &Param, value: &AffineExpr) -> PwAff {
        let mut pieces = Vec::new();
        for piece in &self.pieces {
            let domain = piece.domain.substitute_param(param, value);
            let v = piece.value.as_ref().map(|v| v.substitute_param(param, value));
            push_piece(&mut pieces, domain, v);
        }
        PwAff { space: self.space.clone(), pieces }
    }

    /// Replace pieces involving a parameter satisfying `pred` by NaN and drop
    /// the domain constraints involving such parameters.
    pub fn strip_params(&self, pred: &dyn Fn(&Param) -> bool) -> PwAff {
        let pieces = self.pieces.iter()
            .map(|p| Piece {
                domain: p.domain.drop_constraints_where(|c| c.expr.involves_param_where(pred)),
                value: p.value.clone().filter(|v| !v.involves_param_where(pred)),
            })
            .collect();
        PwAff { space: self.space.clone(), pieces }
    }

    /// Does a parameter satisfying `pred` occur in any piece?
    pub fn involves_param_where(&self, pred: &dyn Fn(&Param) -> bool) -> bool {
        self.pieces.iter().any(|p| {
            p.domain.involves_param_where(pred)
                || p.value.as_ref().map_or(false, |v| v.involves_param_where(pred))
        })
    }

    /// Add the parameters of every piece to `out`.
    pub fn collect_params(&self, out: &mut BTreeSet<Param>) {
        for piece in &self.pieces {
            piece.domain.collect_params(out);
            if let Some(v) = &piece.value {
                v.collect_params(out);
            }
        }
    }

    /// Does the value depend on variable `var`?
    pub fn involves_var(&self, var: usize) -> bool {
        self.pieces.iter().any(|p| {
            p.domain.involves_var(var) || p.value.as_ref().map_or(false, |v| v.involves_var(var))
        })
    }

    /// Evaluate the function at a point. Returns `None` outside the domain.
    pub fn eval(&self, point: &[Int], params: &dyn Fn(&Param) -> Option<Int>) -> Option<Val> {
        let piece = self.pieces.iter().find(|p| p.domain.is_satisfied(point, params) == Some(true))?;
        match &piece.value {
            Some(v) => v.evaluate(point, params).map(Val::Int),
            None => Some(Val::NaN),
        }
    }

    /// Evaluate a function without parameters.
    pub fn eval_point(&self, point: &[Int]) -> Option<Val> {
        self.eval(point, &|_| None)
    }
}

impl fmt::Display for PwAff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = (0..self.dim()).map(|i| format!("i{}", i)).collect();
        write!(f, "{{ ")?;
        for (i, piece) in self.pieces.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            match &piece.value {
                Some(v) => write!(f, "{}", v.to_string_with_names(&names))?,
                None => write!(f, "NaN")?,
            }
            if !piece.domain.is_universe() {
                let constraints: Vec<String> = piece.domain.constraints.iter()
                    .map(|c| c.to_string_with_names(&names))
                    .collect();
                write!(f, " : {}", constraints.join(" and "))?;
            }
        }
        write!(f, " }}")
    }
}

/// A tuple of piecewise functions over a common domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MultiPwAff {
    /// Map space: domain tuple -> range tuple
    pub space: Space,
    /// One function per output dimension
    pub outputs: Vec<PwAff>,
}

impl MultiPwAff {
    /// Combine `outputs` into a function on `space`.
    pub fn new(space: Space, outputs: Vec<PwAff>) -> Self {
        assert!(space.is_map());
        assert_eq!(outputs.len(), space.n_out(), "one output per range dimension of {}", space);
        assert!(outputs.iter().all(|o| o.dim() == space.n_in()));
        Self { space, outputs }
    }

    /// A function without outputs, e.g. the index of a scalar.
    pub fn zero_dim(domain: Space, range: Tuple) -> Self {
        assert_eq!(range.dim(), 0);
        Self::new(Space::map(domain.range, range), Vec::new())
    }

    /// Single-output function with an unnamed range.
    pub fn from_pw_aff(pa: PwAff) -> Self {
        let domain = pa.space.range.clone();
        Self::new(Space::map(domain, Tuple::anonymous(1)), vec![pa])
    }

    /// Quasi-affine outputs defined on the whole domain.
    pub fn from_affs(domain: Space, range: Tuple, affs: Vec<AffineExpr>) -> Self {
        let universe = IntegerSet::universe(domain.clone());
        let outputs = affs.into_iter().map(|a| PwAff::from_aff(&universe, a)).collect();
        Self::new(Space::map(domain.range, range), outputs)
    }

    /// Number of output dimensions.
    pub fn n_out(&self) -> usize {
        self.outputs.len()
    }

    /// Space of the domain.
    pub fn domain_space(&self) -> Space {
        self.space.domain_space()
    }

    /// Tuple of the range.
    pub fn range_tuple(&self) -> &Tuple {
        &self.space.range
    }

    /// Does the range carry an identifier or wrap a relation?
    pub fn has_named_range(&self) -> bool {
        self.space.range.id.is_some() || self.space.range.is_wrapped()
    }

    /// Replace the range tuple by one of the same dimension.
    pub fn with_range(mut self, range: Tuple) -> Self {
        assert_eq!(range.dim(), self.n_out());
        self.space = self.space.with_range(range);
        self
    }

    /// Append an output to the innermost range tuple.
    pub fn flat_range_product(&self, pa: PwAff) -> MultiPwAff {
        assert_eq!(pa.dim(), self.space.n_in());
        let range = self.space.range.add_inner_dims(1);
        let mut outputs = self.outputs.clone();
        outputs.push(pa);
        MultiPwAff::new(self.space.with_range(range), outputs)
    }

    /// Pair two functions over the same domain into a function whose range
    /// wraps both ranges, `id[R1 -> R2]`.
    pub fn range_product(&self, other: &MultiPwAff, id: Option<Symbol>) -> MultiPwAff {
        assert_eq!(self.space.n_in(), other.space.n_in());
        let inner = Space::map(self.space.range.clone(), other.space.range.clone());
        let range = Tuple::wrapped(id, inner);
        let outputs = self.outputs.iter().chain(&other.outputs).cloned().collect();
        MultiPwAff::new(self.space.with_range(range), outputs)
    }

    /// Precompose every output with `map`.
    pub fn pullback(&self, map: &AffineMap) -> MultiPwAff {
        let outputs = self.outputs.iter().map(|o| o.pullback(map)).collect();
        MultiPwAff::new(Space::map(map.space.domain_tuple().clone(), self.space.range.clone()), outputs)
    }

    /// Insert `n` unused domain variables before `pos`; `domain` is the new
    /// domain space.
    pub fn insert_domain_dims(&self, pos: usize, n: usize, domain: Space) -> MultiPwAff {
        let outputs = self.outputs.iter().map(|o| o.insert_dims(pos, n, domain.clone())).collect();
        MultiPwAff::new(Space::map(domain.range, self.space.range.clone()), outputs)
    }

    /// Remove domain variable `var`; `domain` is the new domain space.
    pub fn project_out_domain_var(&self, var: usize, domain: Space) -> MultiPwAff {
        let outputs = self.outputs.iter().map(|o| o.project_out_var(var, domain.clone())).collect();
        MultiPwAff::new(Space::map(domain.range, self.space.range.clone()), outputs)
    }

    /// Replace `param` by `value` in every output.
    pub fn substitute_param(&self, param: &Param, value: &AffineExpr) -> MultiPwAff {
        let outputs = self.outputs.iter().map(|o| o.substitute_param(param, value)).collect();
        MultiPwAff::new(self.space.clone(), outputs)
    }

    /// Restrict every output to `set`.
    pub fn intersect_domain(&self, set: &IntegerSet) -> MultiPwAff {
        let outputs = self.outputs.iter().map(|o| o.intersect_domain(set)).collect();
        MultiPwAff::new(self.space.clone(), outputs)
    }

    /// Does any output have a NaN piece?
    pub fn involves_nan(&self) -> bool {
        self.outputs.iter().any(PwAff::involves_nan)
    }

    /// Does a parameter satisfying `pred` occur in any output?
    pub fn involves_param_where(&self, pred: &dyn Fn(&Param) -> bool) -> bool {
        self.outputs.iter().any(|o| o.involves_param_where(pred))
    }

    /// Add the parameters of every output to `out`.
    pub fn collect_params(&self, out: &mut BTreeSet<Param>) {
        for o in &self.outputs {
            o.collect_params(out);
        }
    }

    /// The relation `{ x -> (f_0(x), .., f_n(x)) }`. NaN pieces contribute no
    /// elements.
    pub fn graph(&self) -> IntegerSet {
        let n_in = self.space.n_in();
        let n_out = self.n_out();
        let mut result = IntegerSet::universe(self.space.clone());
        for (k, output) in self.outputs.iter().enumerate() {
            let mut pieces = Vec::new();
            for piece in &output.pieces {
                let Some(v) = &piece.value else { continue };
                let mut domain = piece.domain.insert_vars(n_in, n_out);
                let out_var = AffineExpr::var(n_in + k, n_in + n_out);
                domain.add(Constraint::eq(out_var, v.insert_vars(n_in, n_out)));
                pieces.push(domain);
            }
            result = result.intersect(&IntegerSet { space: self.space.clone(), pieces });
        }
        result
    }
}

impl fmt::Display for MultiPwAff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> (", self.space)?;
        for (i, o) in self.outputs.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", o)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> IntegerSet {
        IntegerSet::universe(Space::set_of_dim(1))
    }

    fn i() -> PwAff {
        PwAff::var_on_domain(&line(), 0)
    }

    #[test]
    fn test_truncating_division() {
        let q = i().tdiv_q(4);
        let r = i().tdiv_r(4);
        assert_eq!(q.eval_point(&[-5]), Some(Val::Int(-1)));
        assert_eq!(r.eval_point(&[-5]), Some(Val::Int(-1)));
        assert_eq!(q.eval_point(&[5]), Some(Val::Int(1)));
        assert_eq!(r.eval_point(&[5]), Some(Val::Int(1)));
        assert_eq!(i().tdiv_q(-4).eval_point(&[-5]), Some(Val::Int(1)));
        assert_eq!(i().tdiv_q(0).eval_point(&[3]), Some(Val::NaN));
    }

    #[test]
    fn test_gist_merges_sign_split() {
        let nonneg = IntegerSet::from_constraints(Space::set_of_dim(1), [Constraint::lower_bound(0, 0, 1)]);
        let q = i().tdiv_q(4).gist(&nonneg);
        assert_eq!(q.n_piece(), 1);
        assert_eq!(q.pieces[0].value, Some(AffineExpr::var(0, 1).floor_div(4)));
    }

    #[test]
    fn test_min_max() {
        let c = PwAff::constant_on(&line(), 3);
        let m = i().min(&c);
        assert_eq!(m.eval_point(&[1]), Some(Val::Int(1)));
        assert_eq!(m.eval_point(&[7]), Some(Val::Int(3)));
        let m = i().max(&c);
        assert_eq!(m.eval_point(&[1]), Some(Val::Int(3)));
        assert_eq!(m.eval_point(&[7]), Some(Val::Int(7)));
    }

    #[test]
    fn test_compare_and_cond() {
        let five = PwAff::constant_on(&line(), 5);
        let lt = i().compare(CmpOp::Lt, &five);
        assert_eq!(lt.eval_point(&[4]), Some(Val::Int(1)));
        assert_eq!(lt.eval_point(&[5]), Some(Val::Int(0)));
        let ne = i().compare(CmpOp::Ne, &five);
        assert_eq!(ne.eval_point(&[5]), Some(Val::Int(0)));
        assert_eq!(ne.eval_point(&[9]), Some(Val::Int(1)));
        let ge = i().compare(CmpOp::Ge, &five);
        assert_eq!(ge.eval_point(&[5]), Some(Val::Int(1)));

        let selected = lt.cond(&i(), &five);
        assert_eq!(selected.eval_point(&[2]), Some(Val::Int(2)));
        assert_eq!(selected.eval_point(&[8]), Some(Val::Int(5)));
        assert_eq!(lt.not().eval_point(&[8]), Some(Val::Int(1)));
    }

    #[test]
    fn test_nan_propagation() {
        let nan = PwAff::nan_on_domain(&line());
        assert!(i().add(&nan).involves_nan());
        assert!(i().compare(CmpOp::Lt, &nan).involves_nan());
        // a false condition never looks at the NaN branch
        let zero = PwAff::zero_on(&line());
        let selected = zero.cond(&nan, &zero);
        assert!(!selected.involves_nan());
    }

    #[test]
    fn test_wrap_modulo() {
        let v = PwAff::constant_on(&line(), 260).mod_val(256);
        assert_eq!(v.as_constant(), Some(4));
    }

    #[test]
    fn test_graph() {
        let domain = Space::set_of_dim(1);
        let index = MultiPwAff::from_affs(
            domain,
            Tuple::named(Symbol::new("A"), 1),
            vec![AffineExpr::var(0, 1).add_constant(1)],
        );
        let graph = index.graph();
        assert!(graph.contains_point(&[3, 4]));
        assert!(!graph.contains_point(&[3, 3]));
        assert!(index.has_named_range());
    }
}
