//! Nested captures.
//!
//! A non-affine access met while extracting an affine value can be captured:
//! the extraction then returns a fresh parameter standing for the value of
//! the access, and the parameter carries a snapshot of the access subtree.
//! Once the domain of the enclosing statement is known, [`resolve_nested`]
//! turns every such parameter back into an explicit argument of the access
//! (a trailing dimension of its `[D -> args]` domain).
//!
//! Captures of structurally equal subtrees are the same capture: they share
//! a serial number for as long as one of them is alive.

use crate::ir::access::AccessType;
use crate::ir::expr::Expr;
use crate::polyhedral::{AffineExpr, IntegerSet, Param, Space};
use log::debug;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};
use std::sync::atomic::{self, AtomicU64};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Live captures by structural hash of their subtree.
    static LIVE_CAPTURES: RefCell<HashMap<u64, Vec<Weak<CaptureInner>>>> = RefCell::new(HashMap::new());
}

#[derive(Debug)]
struct CaptureInner {
    serial: u64,
    expr: Expr,
}

/// A parameter standing for the value of a captured access subtree.
#[derive(Debug, Clone)]
pub struct Capture(Rc<CaptureInner>);

impl Capture {
    /// The capture of `expr`, shared with any live capture of an equal tree.
    pub fn new(expr: Expr) -> Self {
        let key = expr.structural_hash();
        LIVE_CAPTURES.with(|live| {
            let mut live = live.borrow_mut();
            live.retain(|_, bucket| {
                bucket.retain(|w| w.strong_count() > 0);
                !bucket.is_empty()
            });
            let bucket = live.entry(key).or_default();
            if let Some(inner) = bucket.iter().filter_map(Weak::upgrade).find(|inner| inner.expr == expr) {
                return Capture(inner);
            }
            let serial = NEXT_SERIAL.fetch_add(1, atomic::Ordering::Relaxed);
            let inner = Rc::new(CaptureInner { serial, expr });
            bucket.push(Rc::downgrade(&inner));
            Capture(inner)
        })
    }

    /// Process-wide serial number of the capture.
    pub fn serial(&self) -> u64 {
        self.0.serial
    }

    /// The captured subtree.
    pub fn expr(&self) -> &Expr {
        &self.0.expr
    }
}

impl PartialEq for Capture {
    fn eq(&self, other: &Self) -> bool {
        self.0.serial == other.0.serial
    }
}

impl Eq for Capture {}

impl PartialOrd for Capture {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Capture {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.serial.cmp(&other.0.serial)
    }
}

impl Hash for Capture {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.serial.hash(state);
    }
}

impl fmt::Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "__nested_{}", self.0.serial)
    }
}

/// Captures occurring in a set of parameters, by serial number.
pub(crate) fn captures_in(params: &BTreeSet<Param>) -> Vec<Capture> {
    params.iter().filter_map(Param::as_capture).cloned().collect()
}

/// Argument slot of every capture: an existing argument equal to the
/// captured tree is reused, otherwise the tree is appended to `args`.
pub(crate) fn assign_arg_slots(captures: &[Capture], args: &mut Vec<Expr>) -> Vec<usize> {
    captures
        .iter()
        .map(|capture| match args.iter().position(|arg| arg == capture.expr()) {
            Some(pos) => pos,
            None => {
                args.push(capture.expr().clone());
                args.len() - 1
            }
        })
        .collect()
}

fn access_params(expr: &Expr) -> BTreeSet<Param> {
    let access = expr.access_data();
    let mut params = BTreeSet::new();
    access.index().collect_params(&mut params);
    for ty in AccessType::ALL {
        if let Some(relation) = access.explicit_relation(ty) {
            relation.collect_params(&mut params);
        }
    }
    params
}

/// Resolve the captures of every access in `expr`.
pub fn resolve_nested(expr: Expr) -> Expr {
    expr.map_access(&mut resolve_access)
}

/// Turn the captures of a single access into arguments.
///
/// The index domain `D` (or `[D -> args]`) becomes `[D -> args']`, where the
/// new arguments are the captured trees, and each capture parameter is
/// replaced by the corresponding argument dimension.
fn resolve_access(mut expr: Expr) -> Expr {
    let captures = captures_in(&access_params(&expr));
    if captures.is_empty() {
        return expr;
    }
    let (base, n_old) = expr.access_index().domain_space().split_args();
    let mut args = expr.args().to_vec();
    let slots = assign_arg_slots(&captures, &mut args);
    let n_arg = args.len();
    let n_new = n_arg - n_old;
    let first_arg = base.dim();
    let domain = base.with_args(n_arg);
    let n_dom = domain.dim();
    debug!("resolving {} nested parameter(s) of {} into {} new argument(s)", captures.len(), expr, n_new);

    expr.set_args(args);
    let access = expr.access_mut();
    let mut index = access.index().insert_domain_dims(first_arg + n_old, n_new, domain.clone());
    for (capture, &slot) in captures.iter().zip(&slots) {
        let value = AffineExpr::var(first_arg + slot, n_dom);
        index = index.substitute_param(&Param::Nested(capture.clone()), &value);
    }
    access.set_index(index);
    access.map_explicit_relations(|relation| {
        let space = Space::map(domain.range.clone(), relation.space.range.clone());
        let mut relation = relation.insert_dims(first_arg + n_old, n_new, space);
        let n = relation.dim();
        for (capture, &slot) in captures.iter().zip(&slots) {
            relation = relation.substitute_param(&Param::Nested(capture.clone()), &AffineExpr::var(first_arg + slot, n));
        }
        relation
    });

    let expr = mark_self_dependences(expr, n_old);
    remove_marked_self_dependences(expr, n_old)
}

/// Is `arg` a read of a subset of the elements `expr` reads from the same
/// array, once the arguments of `expr` are projected out?
fn is_sub_access(expr: &Expr, arg: &Expr) -> bool {
    if !arg.is_access() || arg.n_arg() != 0 {
        return false;
    }
    if !expr.is_read() || !arg.is_read() || expr.is_write() || arg.is_write() {
        return false;
    }
    if expr.access_id().is_none() || expr.access_id() != arg.access_id() {
        return false;
    }
    let read = expr.access_relation(AccessType::MayRead);
    let (base, n_arg) = expr.access_index().domain_space().split_args();
    let projected_space = Space::map(base.range.clone(), read.space.range.clone());
    let Some(projected) = read.project_out_exact(base.dim(), n_arg, projected_space) else {
        return false;
    };
    let arg_read = arg.access_relation(AccessType::MayRead);
    arg_read.dim() == projected.dim() && arg_read.is_subset(&projected)
}

/// Replace the arguments from `first` on that `expr` depends on only to
/// re-read what it reads itself by a NaN literal.
fn mark_self_dependences(mut expr: Expr, first: usize) -> Expr {
    for pos in first..expr.n_arg() {
        if is_sub_access(&expr, expr.arg(pos)) {
            debug!("argument {} of {} is a self dependence", expr.arg(pos), expr);
            expr.set_arg(pos, Expr::nan());
        }
    }
    expr
}

/// Project the marked arguments out of the index expression and the access
/// relations, and remove them.
fn remove_marked_self_dependences(mut expr: Expr, first: usize) -> Expr {
    let marked: Vec<usize> = (first..expr.n_arg()).filter(|&pos| expr.arg(pos).is_nan_int()).collect();
    if marked.is_empty() {
        return expr;
    }
    let (base, _) = expr.access_index().domain_space().split_args();
    expr.access_mut().materialize_relations();
    for &pos in marked.iter().rev() {
        expr.remove_arg(pos);
        let domain = base.with_args(expr.n_arg());
        let var = base.dim() + pos;
        let access = expr.access_mut();
        let index = access.index().project_out_domain_var(var, domain.clone());
        access.set_index(index);
        access.map_explicit_relations(|relation| {
            let space = Space::map(domain.range.clone(), relation.space.range.clone());
            relation.project_out(var, 1, space)
        });
    }
    expr
}

/// Substitute the captures of `set` (over `[D -> args]` with `n_old`
/// arguments) by new trailing argument dimensions, appending the captured
/// trees to `args`.
pub(crate) fn resolve_set(set: &IntegerSet, args: &mut Vec<Expr>) -> IntegerSet {
    let mut params = BTreeSet::new();
    set.collect_params(&mut params);
    let captures = captures_in(&params);
    if captures.is_empty() {
        return set.clone();
    }
    let (base, n_old) = set.space.split_args();
    let slots = assign_arg_slots(&captures, args);
    let n_new = args.len() - n_old;
    let space = base.with_args(args.len());
    let mut result = set.insert_dims(base.dim() + n_old, n_new, space);
    let n = result.dim();
    for (capture, &slot) in captures.iter().zip(&slots) {
        result = result.substitute_param(&Param::Nested(capture.clone()), &AffineExpr::var(base.dim() + slot, n));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::OpType;
    use crate::polyhedral::{Constraint, MultiPwAff, PwAff, Tuple, Val};
    use crate::utils::intern::Symbol;

    fn a_of_i() -> Expr {
        Expr::access(MultiPwAff::from_affs(
            Space::set_of_dim(1),
            Tuple::named(Symbol::new("A"), 1),
            vec![AffineExpr::var(0, 1)],
        ))
    }

    #[test]
    fn test_equal_trees_share_a_capture() {
        let first = Capture::new(a_of_i());
        let second = Capture::new(a_of_i());
        assert_eq!(first, second);
        assert_eq!(first.serial(), second.serial());
        let other = Capture::new(Expr::scalar(Symbol::new("x"), &Space::set_of_dim(1)));
        assert_ne!(first, other);
    }

    #[test]
    fn test_dead_captures_leave_the_registry() {
        let dead_key = a_of_i().structural_hash();
        drop(Capture::new(a_of_i()));
        let live = Capture::new(Expr::scalar(Symbol::new("y"), &Space::set_of_dim(1)));
        LIVE_CAPTURES.with(|registry| {
            let registry = registry.borrow();
            assert!(!registry.contains_key(&dead_key));
            assert!(registry.values().all(|bucket| !bucket.is_empty()));
            assert!(registry.contains_key(&live.expr().structural_hash()));
        });
    }

    #[test]
    fn test_resolve_replaces_parameter_by_argument() {
        let capture = Capture::new(Expr::scalar(Symbol::new("n"), &Space::set_of_dim(1)));
        let universe = IntegerSet::universe(Space::set_of_dim(1));
        let value = PwAff::param_on_domain(&universe, Param::Nested(capture.clone()));
        let index = MultiPwAff::new(
            Space::map(Tuple::anonymous(1), Tuple::named(Symbol::new("B"), 1)),
            vec![value],
        );
        let resolved = resolve_nested(Expr::access(index));
        assert_eq!(resolved.n_arg(), 1);
        assert_eq!(resolved.arg(0), capture.expr());
        let index = resolved.access_index();
        assert!(!index.involves_param_where(&Param::is_nested));
        assert_eq!(index.domain_space().split_args().1, 1);
        // B[n] with i = 2 and n = 7
        assert_eq!(index.outputs[0].eval_point(&[2, 7]), Some(Val::Int(7)));
    }

    #[test]
    fn test_duplicate_captures_share_argument() {
        let universe = IntegerSet::universe(Space::set_of_dim(1));
        let p = PwAff::param_on_domain(&universe, Param::Nested(Capture::new(a_of_i())));
        let q = PwAff::param_on_domain(&universe, Param::Nested(Capture::new(a_of_i())));
        let index = MultiPwAff::new(
            Space::map(Tuple::anonymous(1), Tuple::named(Symbol::new("B"), 2)),
            vec![p, q.add(&PwAff::constant_on(&universe, 1))],
        );
        let resolved = resolve_nested(Expr::access(index));
        assert_eq!(resolved.n_arg(), 1);
        let index = resolved.access_index();
        assert_eq!(index.outputs[0].eval_point(&[0, 4]), Some(Val::Int(4)));
        assert_eq!(index.outputs[1].eval_point(&[0, 4]), Some(Val::Int(5)));
    }

    #[test]
    fn test_self_dependence_is_pruned() {
        // A[i] restricted to A[i] > 0
        let capture = Capture::new(a_of_i());
        let mut read = a_of_i();
        let domain = Space::set_of_dim(1);
        let mut relation = read.access_relation(AccessType::MayRead);
        relation.add_constraint(Constraint::ge_zero(
            AffineExpr::param(Param::Nested(capture), 2).add_constant(-1),
        ));
        read.set_access_relation(AccessType::MayRead, relation);
        let before = read.access_relation(AccessType::MayRead);
        assert_eq!(before.space.n_in(), domain.dim());

        let resolved = resolve_nested(read);
        assert_eq!(resolved.n_arg(), 0);
        let after = resolved.access_relation(AccessType::MayRead);
        assert!(after.is_equal(&a_of_i().access_relation(AccessType::MayRead)));
    }

    #[test]
    fn test_other_array_is_kept() {
        let b_of_i = Expr::access(MultiPwAff::from_affs(
            Space::set_of_dim(1),
            Tuple::named(Symbol::new("B"), 1),
            vec![AffineExpr::var(0, 1)],
        ));
        let capture = Capture::new(b_of_i.clone());
        let mut read = a_of_i();
        let mut relation = read.access_relation(AccessType::MayRead);
        relation.add_constraint(Constraint::ge_zero(AffineExpr::param(Param::Nested(capture), 2)));
        read.set_access_relation(AccessType::MayRead, relation);
        let resolved = resolve_nested(Expr::binary(OpType::Add, read, Expr::int(1)));
        assert_eq!(resolved.arg(0).n_arg(), 1);
        assert_eq!(resolved.arg(0).arg(0), &b_of_i);
    }
}
