//! Evaluation contexts.
//!
//! A context holds what is known while extracting affine values from the
//! expressions of a statement: the domain of the enclosing loop iterators,
//! the affine values of variables with a known value, and whether non-affine
//! accesses may be captured as nested parameters.
//!
//! Contexts are shared and copied on write. Each context also memoizes the
//! values extracted against it; the memo lives only as long as the context
//! is not modified and is never carried over to a modified copy.

use crate::analysis::affine::extract_affine;
use crate::ir::expr::Expr;
use crate::polyhedral::{AffineMap, Constraint, IntegerSet, Param, PwAff, Space};
use crate::utils::errors::ExtractResult;
use crate::utils::intern::Symbol;
use crate::ExtractOptions;
use log::{debug, trace};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Debug)]
struct ContextInner {
    domain: IntegerSet,
    /// Values of variables, over a prefix of the domain dimensions
    assignments: HashMap<Symbol, PwAff>,
    allow_nested: bool,
    extracted: RefCell<HashMap<Expr, (ExtractOptions, PwAff)>>,
}

impl Clone for ContextInner {
    fn clone(&self) -> Self {
        Self {
            domain: self.domain.clone(),
            assignments: self.assignments.clone(),
            allow_nested: self.allow_nested,
            extracted: RefCell::new(HashMap::new()),
        }
    }
}

/// A shared evaluation context.
#[derive(Debug, Clone)]
pub struct Context(Rc<ContextInner>);

impl Context {
    /// A context over a zero-dimensional domain without known values.
    pub fn new() -> Self {
        Self::with_domain(IntegerSet::universe(Space::set_of_dim(0)))
    }

    /// A context over `domain` without known values; nesting is allowed.
    pub fn with_domain(domain: IntegerSet) -> Self {
        Context(Rc::new(ContextInner {
            domain,
            assignments: HashMap::new(),
            allow_nested: true,
            extracted: RefCell::new(HashMap::new()),
        }))
    }

    /// Unique mutable access; the memo does not survive.
    fn inner_mut(&mut self) -> &mut ContextInner {
        let inner = Rc::make_mut(&mut self.0);
        inner.extracted.get_mut().clear();
        inner
    }

    /// Domain of the iterators.
    pub fn domain(&self) -> &IntegerSet {
        &self.0.domain
    }

    /// Space of the domain.
    pub fn space(&self) -> Space {
        self.0.domain.space.clone()
    }

    /// Number of iterators.
    pub fn dim(&self) -> usize {
        self.0.domain.dim()
    }

    /// The domain without the constraints on nested parameters.
    pub fn gist_domain(&self) -> IntegerSet {
        self.0.domain.drop_constraints_involving(&Param::is_nested)
    }

    /// May non-affine subexpressions be captured as parameters?
    pub fn allows_nesting(&self) -> bool {
        self.0.allow_nested
    }

    /// Allow or forbid capturing nested subexpressions.
    pub fn allow_nesting(&mut self, allow: bool) {
        if self.0.allow_nested != allow {
            self.inner_mut().allow_nested = allow;
        }
    }

    /// The stored value of a variable, as it was assigned.
    pub fn get(&self, id: Symbol) -> Option<&PwAff> {
        self.0.assignments.get(&id)
    }

    /// Is `id` bound to a value?
    pub fn is_assigned(&self, id: Symbol) -> bool {
        self.0.assignments.contains_key(&id)
    }

    /// Bind `id` to `value`, a function over a prefix of the domain.
    pub fn set(&mut self, id: Symbol, value: PwAff) {
        assert!(value.dim() <= self.dim(), "value over {} in context over {}", value.space, self.space());
        self.inner_mut().assignments.insert(id, value);
    }

    /// Forget the value of `id`.
    pub fn clear(&mut self, id: Symbol) {
        if self.is_assigned(id) {
            self.inner_mut().assignments.remove(&id);
        }
    }

    /// The value of `id` over the full domain, if known.
    ///
    /// Values assigned before dimensions were added to the domain are pulled
    /// back to the current domain.
    pub fn get_value(&self, id: Symbol) -> Option<PwAff> {
        let value = self.0.assignments.get(&id)?;
        Some(self.extend_value(value))
    }

    fn extend_value(&self, value: &PwAff) -> PwAff {
        if value.dim() == self.dim() {
            return value.clone();
        }
        let map = AffineMap::project_prefix(self.space(), value.space.clone());
        value.pullback(&map)
    }

    fn add_dim(&mut self, lower_bound: bool) -> usize {
        let pos = self.dim();
        let space = Space::set(self.0.domain.space.range.add_inner_dims(1));
        let mut domain = self.0.domain.insert_dims(pos, 1, space);
        if lower_bound {
            domain.add_constraint(Constraint::lower_bound(pos, 0, pos + 1));
        }
        self.inner_mut().domain = domain;
        pos
    }

    /// Add an unbounded inner dimension to the domain and bind `id` to it.
    pub fn add_inner_iterator(&mut self, id: Symbol) {
        let pos = self.add_dim(false);
        let value = PwAff::var_on_domain(&IntegerSet::universe(self.space()), pos);
        self.set(id, value);
    }

    /// Add an inner dimension bounded below by zero, the iteration counter
    /// of a loop without a known exit.
    pub fn add_infinite_loop(&mut self) {
        self.add_dim(true);
    }

    /// Pull the domain and every value back through `map`, whose range is
    /// the domain space.
    pub fn preimage(&mut self, map: &AffineMap) {
        assert_eq!(map.n_out(), self.dim());
        let domain = self.0.domain.preimage(map);
        let assignments = self.0.assignments.iter()
            .map(|(&id, value)| (id, self.extend_value(value).pullback(map)))
            .collect();
        let inner = self.inner_mut();
        inner.domain = domain;
        inner.assignments = assignments;
    }

    /// Restrict the domain to `set`.
    pub fn intersect_domain(&mut self, set: &IntegerSet) {
        let domain = self.0.domain.intersect(set);
        self.inner_mut().domain = domain;
    }

    /// Forget the values of the scalars written by `expr`.
    pub fn clear_writes_in(&mut self, expr: &Expr) {
        let mut written = Vec::new();
        expr.foreach_access(&mut |access| {
            if access.is_write() && access.is_scalar_access() {
                written.extend(access.access_id());
            }
        });
        for id in written {
            debug!("value of {} invalidated by a write", id);
            self.clear(id);
        }
    }

    /// Bind every integer scalar read by `expr` that has no known value to
    /// a parameter of the same name.
    pub fn add_parameters(&mut self, expr: &Expr) {
        let mut params = Vec::new();
        expr.foreach_access(&mut |access| {
            if access.is_read() && access.is_scalar_access() && access.type_size() != 0 {
                params.extend(access.access_id());
            }
        });
        for id in params {
            if self.is_assigned(id) {
                continue;
            }
            let universe = IntegerSet::universe(self.space());
            self.set(id, PwAff::param_on_domain(&universe, Param::Named(id)));
        }
    }

    /// Plug in the known values: reads of scalars with a known value and
    /// operations with an affine value are replaced by affine accesses.
    pub fn evaluate_expr(&self, expr: Expr, opts: &ExtractOptions) -> ExtractResult<Expr> {
        let expr = expr.map_access(&mut |access| {
            if access.is_affine() || !access.is_scalar_access() || !access.is_read() {
                return access;
            }
            let Some(id) = access.access_id() else {
                return access;
            };
            match self.get_value(id) {
                Some(value) if !value.involves_nan() => {
                    Expr::from_pw_aff(value).with_type_size(access.type_size())
                }
                _ => access,
            }
        });
        let mut failure = None;
        let expr = expr.map_op(&mut |op| {
            if failure.is_some() || op.op_type().is_assignment() {
                return op;
            }
            match extract_affine(&op, self, opts) {
                Ok(value) if !value.involves_nan() => Expr::from_pw_aff(value).with_type_size(op.type_size()),
                Ok(_) => op,
                Err(err) => {
                    failure = Some(err);
                    op
                }
            }
        });
        match failure {
            Some(err) => Err(err),
            None => Ok(expr),
        }
    }

    /// A value extracted earlier for `expr` under the same options.
    pub fn get_cached(&self, expr: &Expr, opts: &ExtractOptions) -> Option<PwAff> {
        let extracted = self.0.extracted.borrow();
        let (cached_opts, value) = extracted.get(expr)?;
        if cached_opts != opts {
            return None;
        }
        trace!("reusing extracted value of {}", expr);
        Some(value.clone())
    }

    /// Remember the value of `expr` extracted under `opts`.
    pub fn set_cached(&self, expr: &Expr, opts: &ExtractOptions, value: &PwAff) {
        self.0.extracted.borrow_mut().insert(expr.clone(), (opts.clone(), value.clone()));
    }

    /// Number of memoized values.
    pub fn n_cached(&self) -> usize {
        self.0.extracted.borrow().len()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "domain: {}", self.0.domain)?;
        let mut ids: Vec<&Symbol> = self.0.assignments.keys().collect();
        ids.sort_by_key(|id| id.name());
        for id in ids {
            write!(f, "\n  {} = {}", id, self.0.assignments[id])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::OpType;
    use crate::polyhedral::Val;

    fn sym(name: &str) -> Symbol {
        Symbol::new(name)
    }

    #[test]
    fn test_value_extended_to_new_dimensions() {
        let mut ctx = Context::new();
        ctx.add_inner_iterator(sym("i"));
        ctx.add_inner_iterator(sym("j"));
        assert_eq!(ctx.dim(), 2);
        let i = ctx.get_value(sym("i")).unwrap();
        assert_eq!(i.dim(), 2);
        assert_eq!(i.eval_point(&[3, 9]), Some(Val::Int(3)));
        assert_eq!(ctx.get(sym("i")).unwrap().dim(), 1);
    }

    #[test]
    fn test_infinite_loop_is_non_negative() {
        let mut ctx = Context::new();
        ctx.add_infinite_loop();
        assert!(ctx.domain().contains_point(&[0]));
        assert!(!ctx.domain().contains_point(&[-1]));
    }

    #[test]
    fn test_write_clears_binding() {
        let mut ctx = Context::with_domain(IntegerSet::universe(Space::set_of_dim(1)));
        let universe = IntegerSet::universe(ctx.space());
        ctx.set(sym("x"), PwAff::constant_on(&universe, 5));
        let x = Expr::scalar(sym("x"), &ctx.space()).with_type_size(-32);
        let mut target = x.clone();
        target.set_read(false);
        target.set_write(true);
        ctx.clear_writes_in(&Expr::binary(OpType::Add, x, Expr::int(1)));
        assert!(ctx.is_assigned(sym("x")));
        ctx.clear_writes_in(&Expr::binary(OpType::Assign, target, Expr::int(1)));
        assert!(ctx.get_value(sym("x")).is_none());
    }

    #[test]
    fn test_memo_dropped_on_mutation() {
        let opts = ExtractOptions::default();
        let mut ctx = Context::new();
        let e = Expr::int(3);
        let value = extract_affine(&e, &ctx, &opts).unwrap();
        assert_eq!(ctx.n_cached(), 1);
        assert_eq!(ctx.get_cached(&e, &opts), Some(value));
        let shared = ctx.clone();
        ctx.add_infinite_loop();
        assert_eq!(ctx.n_cached(), 0);
        assert_eq!(shared.n_cached(), 1);
        let relaxed = ExtractOptions { avoid_overflow: false, ..ExtractOptions::default() };
        assert!(shared.get_cached(&e, &relaxed).is_none());
    }

    #[test]
    fn test_add_parameters_and_evaluate() {
        let opts = ExtractOptions::default();
        let mut ctx = Context::new();
        ctx.add_inner_iterator(sym("i"));
        let space = ctx.space();
        let n = Expr::scalar(sym("N"), &space).with_type_size(-32);
        let i = Expr::scalar(sym("i"), &space).with_type_size(-32);
        let sum = Expr::binary(OpType::Add, i, n).with_type_size(-32);
        ctx.add_parameters(&sum);
        assert!(ctx.is_assigned(sym("N")));

        let evaluated = ctx.evaluate_expr(sum, &opts).unwrap();
        assert!(evaluated.is_affine());
        let value = &evaluated.access_index().outputs[0];
        let params = |p: &Param| (p == &Param::Named(sym("N"))).then_some(10);
        assert_eq!(value.eval(&[4], &params), Some(Val::Int(14)));
    }

    #[test]
    fn test_preimage_moves_values() {
        let mut ctx = Context::new();
        ctx.add_inner_iterator(sym("i"));
        // i = 2 * t
        let map = AffineMap::new(
            Space::set_of_dim(1),
            ctx.space(),
            vec![crate::polyhedral::AffineExpr::var(0, 1).scale(2)],
        );
        ctx.preimage(&map);
        let i = ctx.get_value(sym("i")).unwrap();
        assert_eq!(i.eval_point(&[3]), Some(Val::Int(6)));
    }
}
