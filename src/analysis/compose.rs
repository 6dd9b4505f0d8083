//! Composition of access expressions.
//!
//! Index expressions are built up one step at a time: subscripts append a
//! dimension, member accesses pair a structure with one of its fields.
//! Patching composes the index expression passed to a function with the
//! accesses the function performs through the corresponding parameter, and
//! [`apply_summary`] does so for every array argument of a call.
//!
//! The range of an index expression of a member access wraps the structure
//! and the field (`s_f[s[i] -> f[j]]`). Its leading dimensions belong to the
//! outermost array; the remaining ones are carried along unchanged when the
//! outermost array is patched.

use crate::analysis::affine::extract_affine;
use crate::analysis::context::Context;
use crate::ir::access::{AccessData, AccessType};
use crate::ir::expr::{Expr, OpType};
use crate::ir::summary::{ArrayAccesses, SummaryArg};
use crate::polyhedral::{
    AffineExpr, AffineMap, Constraint, IntegerSet, MultiPwAff, Param, PwAff, Space, Tuple,
};
use crate::utils::errors::{ExprKindName, ExtractError, ExtractResult};
use crate::utils::intern::Symbol;
use crate::ExtractOptions;
use log::{debug, warn};

fn expect_access(expr: &Expr) -> ExtractResult<&AccessData> {
    expr.as_access().ok_or(ExtractError::UnexpectedKind {
        expected: ExprKindName::Access,
        found: expr.kind_name(),
    })
}

/// A copy of the access `expr` with a new index, arguments and depth.
/// Explicit relations are not carried over.
fn rebuild_access(expr: &Expr, index: MultiPwAff, args: Vec<Expr>, depth: usize) -> Expr {
    let old = expr.access_data();
    let mut result = Expr::access(index).with_type_size(expr.type_size());
    let access = result.access_mut();
    access.read = old.read;
    access.write = old.write;
    access.kill = old.kill;
    access.ref_id = old.ref_id;
    access.set_depth(depth.max(access.index().n_out()));
    result.set_args(args);
    result
}

fn member_name(outer: Symbol, field: Symbol) -> Symbol {
    Symbol::new(&format!("{}_{}", outer, field))
}

/// Append the subscript `index` to the access `base`.
///
/// An affine subscript becomes the new innermost index, restricted to its
/// non-negative values. Any other subscript is added as an argument of the
/// access and the new index refers to that argument.
pub fn subscript(base: &Expr, index: &Expr, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<Expr> {
    let access = expect_access(base)?;
    let base_index = access.index();
    let full = base_index.domain_space();
    let (domain, n_arg) = full.split_args();
    if domain.dim() != ctx.dim() {
        return Err(ExtractError::DimensionMismatch { context: ctx.dim(), expr: domain.dim() });
    }
    let value = extract_affine(index, ctx, opts)?;
    let mut args = base.args().to_vec();
    let (mpa, value) = if !value.involves_nan() {
        let value = if n_arg > 0 {
            value.pullback(&AffineMap::project_prefix(full, domain))
        } else {
            value
        };
        (base_index.clone(), value)
    } else {
        debug!("subscript {} of {} becomes an access argument", index, base);
        let extended = domain.with_args(n_arg + 1);
        let pos = domain.dim() + n_arg;
        let mpa = base_index.insert_domain_dims(pos, 1, extended.clone());
        args.push(index.clone());
        (mpa, PwAff::var_on_domain(&IntegerSet::universe(extended), pos))
    };
    let index = mpa.flat_range_product(value.non_negative_part());
    let depth = access.depth().max(index.n_out());
    Ok(rebuild_access(base, index, args, depth))
}

/// Access the field `field` of the structure accessed by `base`.
pub fn member(base: &Expr, field: Symbol) -> ExtractResult<Expr> {
    let access = expect_access(base)?;
    let index = access.index();
    let field_index = MultiPwAff::zero_dim(index.domain_space(), Tuple::named(field, 0));
    let id = index.range_tuple().id.map(|outer| member_name(outer, field));
    let combined = index.range_product(&field_index, id);
    let depth = combined.n_out();
    Ok(rebuild_access(base, combined, base.args().to_vec(), depth))
}

/// Number of leading range dimensions that belong to the outermost array of
/// a chain of member accesses.
fn base_dims(tuple: &Tuple) -> usize {
    match tuple.unwrap_space() {
        Some(space) => base_dims(space.domain_tuple()),
        None => tuple.dim(),
    }
}

/// `tuple` with its outermost array replaced by `base`; member names are
/// rebuilt on top of the new outermost name.
fn rebase(tuple: &Tuple, base: Tuple) -> Tuple {
    match tuple.unwrap_space() {
        None => base,
        Some(space) => {
            let inner = rebase(space.domain_tuple(), base);
            let id = match (inner.id, space.range.id) {
                (Some(outer), Some(field)) => Some(member_name(outer, field)),
                _ => None,
            };
            Tuple::wrapped(id, Space::map(inner, space.range.clone()))
        }
    }
}

fn tuple_name(tuple: &Tuple) -> String {
    tuple.id.map_or_else(|| "<unnamed>".to_string(), |id| id.name())
}

/// Handle an offset assumed to be zero that could not be shown to be zero.
fn report_offset(array: &Tuple, opts: &ExtractOptions) -> ExtractResult<()> {
    let array = tuple_name(array);
    if opts.strict_offsets {
        return Err(ExtractError::NonZeroOffset { array });
    }
    warn!("assumed-zero offset into {} is not provably zero", array);
    Ok(())
}

/// Is variable `var` zero everywhere on `set`?
fn is_zero_on(set: &IntegerSet, var: usize) -> bool {
    let zero = Constraint::eq_zero(AffineExpr::var(var, set.dim()));
    zero.negate().into_iter().all(|alt| {
        let mut outside = set.clone();
        outside.add_constraint(alt);
        outside.is_empty()
    })
}

/// How the outermost index of the callee combines with the passed prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Join {
    /// Callee indices follow the prefix indices
    Concat,
    /// The first callee index is added to the last prefix index
    Add,
    /// The first callee index is assumed to be zero and dropped
    DropZero,
}

fn join_kind(add: bool, n_prefix: usize, n_base: usize) -> Join {
    match (add, n_prefix, n_base) {
        (true, _, 0) | (false, _, _) => Join::Concat,
        (true, 0, _) => Join::DropZero,
        (true, _, _) => Join::Add,
    }
}

/// Combine the access relation `relation` of a callee, from the call
/// domain to the array of its parameter, with the index expression `prefix`
/// passed for that parameter.
///
/// Without `add`, the callee indices follow the prefix indices. With `add`
/// (the address of an element was passed), the first callee index is an
/// offset added to the last prefix index; when the prefix has no index at
/// all, that offset is assumed to be zero.
pub fn patch_relation(
    relation: &IntegerSet,
    prefix: &MultiPwAff,
    add: bool,
    opts: &ExtractOptions,
) -> ExtractResult<IntegerSet> {
    let n_d = relation.space.n_in();
    assert_eq!(n_d, prefix.space.n_in(), "patching {} with {}", relation.space, prefix.space);
    let range = relation.space.range.clone();
    let k = prefix.n_out();
    let n_b = base_dims(&range);
    let n_q = range.dim() - n_b;
    let join = join_kind(add, k, n_b);
    let merged = usize::from(join != Join::Concat);
    let base = prefix.range_tuple().add_inner_dims(n_b - merged);
    let target = Space::map(relation.space.domain_tuple().clone(), rebase(&range, base));

    if join == Join::DropZero {
        if !is_zero_on(relation, n_d) {
            report_offset(prefix.range_tuple(), opts)?;
        }
        let mut zero = relation.clone();
        zero.add_constraint(Constraint::eq_zero(AffineExpr::var(n_d, relation.dim())));
        return Ok(zero.project_out(n_d, 1, target));
    }

    // Variables (d, p, b, q): domain, prefix, callee base, passengers.
    let n_total = n_d + k + n_b + n_q;
    let wide = Space::map(relation.space.domain_tuple().clone(), Tuple::anonymous(k + n_b + n_q));
    let combined = relation
        .insert_dims(n_d, k, wide.clone())
        .intersect(&prefix.graph().insert_dims(n_d + k, n_b + n_q, wide));
    if join == Join::Concat {
        return Ok(combined.with_space(target));
    }

    // Reorder to (d, p_0 .. p_{k-2}, s, b_1 .., q, t, u) with t = p_{k-1},
    // u = b_0 and s = t + u, then project out t and u.
    let n_y = n_total + 1;
    let (t, u) = (n_total - 1, n_total);
    let var = |pos| AffineExpr::var(pos, n_y);
    let mut outputs = Vec::with_capacity(n_total);
    outputs.extend((0..n_d + k - 1).map(var));
    outputs.push(var(t));
    outputs.push(var(u));
    outputs.extend((n_d + k..n_y - 2).map(var));
    let reorder = AffineMap::new(Space::set_of_dim(n_y), Space::set_of_dim(n_total), outputs);
    let mut fused = combined.with_space(Space::set_of_dim(n_total)).preimage(&reorder);
    let s = n_d + k - 1;
    fused.add_constraint(Constraint::eq(var(s), var(t) + var(u)));
    Ok(fused.project_out(t, 2, target))
}

/// Insert `n` argument dimensions at `pos` of the domain of `expr`'s index
/// and explicit relations.
fn insert_arg_dims(expr: &Expr, pos: usize, n: usize, domain: &Space) -> (MultiPwAff, Vec<(AccessType, IntegerSet)>) {
    let access = expr.access_data();
    let index = access.index().insert_domain_dims(pos, n, domain.clone());
    let relations = AccessType::ALL
        .iter()
        .filter_map(|&ty| access.explicit_relation(ty).map(|r| (ty, r)))
        .map(|(ty, r)| {
            let space = Space::map(domain.range.clone(), r.space.range.clone());
            (ty, r.insert_dims(pos, n, space))
        })
        .collect();
    (index, relations)
}

/// Patch the access `expr` of a callee with the access `prefix` passed for
/// the accessed parameter; see [`patch_relation`].
///
/// The arguments of the result are those of `expr` followed by those of
/// `prefix`.
pub fn patch_access(expr: &Expr, prefix: &Expr, add: bool, opts: &ExtractOptions) -> ExtractResult<Expr> {
    expect_access(expr)?;
    expect_access(prefix)?;
    let (base, n_expr_arg) = expr.access_index().domain_space().split_args();
    let (prefix_base, n_prefix_arg) = prefix.access_index().domain_space().split_args();
    if base.dim() != prefix_base.dim() {
        return Err(ExtractError::DimensionMismatch { context: prefix_base.dim(), expr: base.dim() });
    }
    let domain = base.with_args(n_expr_arg + n_prefix_arg);
    let (index, relations) = insert_arg_dims(expr, base.dim() + n_expr_arg, n_prefix_arg, &domain);
    let (prefix_index, _) = insert_arg_dims(prefix, base.dim(), n_expr_arg, &domain);

    let range = index.range_tuple().clone();
    let k = prefix_index.n_out();
    let n_b = base_dims(&range);
    let join = join_kind(add, k, n_b);
    let mut outputs = prefix_index.outputs.clone();
    let mut callee = index.outputs.clone().into_iter();
    match join {
        Join::Concat => {}
        Join::Add => {
            let first = callee.next().expect("callee index has a base dimension");
            let last = outputs.pop().expect("prefix has an index");
            outputs.push(last.add(&first));
        }
        Join::DropZero => {
            let first = callee.next().expect("callee index has a base dimension");
            if first.involves_nan() || !first.non_zero_set().is_empty() {
                report_offset(prefix_index.range_tuple(), opts)?;
            }
        }
    }
    outputs.extend(callee);
    let merged = usize::from(join != Join::Concat);
    let new_base = prefix_index.range_tuple().add_inner_dims(n_b - merged);
    let space = Space::map(domain.range.clone(), rebase(&range, new_base));
    let patched = MultiPwAff::new(space, outputs);

    let mut args = expr.args().to_vec();
    args.extend(prefix.args().iter().cloned());
    let depth = expr.access_data().depth() + k - merged;
    let mut result = rebuild_access(expr, patched, args, depth);
    for (ty, relation) in relations {
        let relation = patch_relation(&relation, &prefix_index, add, opts)?;
        result.set_access_relation(ty, relation);
    }
    Ok(result)
}

/// Value of an integer argument of a call, as seen by the callee.
enum IntArg {
    /// An affine function of the call domain
    Affine(PwAff),
    /// Any other expression; it becomes an argument of the array accesses
    Opaque(Expr),
}

/// `set` with `param` replaced by the piecewise value `value`, a function
/// of the domain of the relation `set`.
fn substitute_pw_param(set: &IntegerSet, param: &Param, value: &PwAff) -> IntegerSet {
    if !set.involves_param_where(&|p| p == param) {
        return set.clone();
    }
    let n_in = set.space.n_in();
    let extra = set.dim() - n_in;
    let mut result = IntegerSet::empty(set.space.clone());
    for piece in &value.pieces {
        let Some(v) = &piece.value else {
            debug!("no accesses for NaN value of {}", param);
            continue;
        };
        let domain = IntegerSet::from_system(value.space.clone(), piece.domain.clone())
            .insert_dims(n_in, extra, set.space.clone());
        let part = set.intersect(&domain).substitute_param(param, &v.insert_vars(n_in, extra));
        result = result.union(&part);
    }
    result.coalesce()
}

/// Attach the accesses `accesses` a callee performs through the parameter
/// `param` to the access `arg` passed for it.
fn apply_to_array_arg(
    arg: &Expr,
    accesses: &ArrayAccesses,
    int_args: &[(Symbol, IntArg)],
    add: bool,
    ctx: &Context,
    opts: &ExtractOptions,
) -> ExtractResult<Expr> {
    let (base, n_old) = arg.access_index().domain_space().split_args();
    if base.dim() != ctx.dim() {
        return Err(ExtractError::DimensionMismatch { context: ctx.dim(), expr: base.dim() });
    }
    let mut args = arg.args().to_vec();
    let opaque: Vec<Expr> = int_args
        .iter()
        .filter_map(|(_, a)| match a {
            IntArg::Opaque(e) => Some(e.clone()),
            IntArg::Affine(_) => None,
        })
        .collect();
    let n_new = opaque.len();
    args.extend(opaque);
    let domain = base.with_args(n_old + n_new);
    let index = arg.access_index().insert_domain_dims(base.dim() + n_old, n_new, domain.clone());

    let to_base = AffineMap::project_prefix(domain.clone(), base.clone());
    let universe = IntegerSet::universe(domain.clone());
    let mut next_opaque = base.dim() + n_old;
    let values: Vec<(Param, PwAff)> = int_args
        .iter()
        .map(|(id, a)| {
            let value = match a {
                IntArg::Affine(v) if domain.dim() == base.dim() => v.clone(),
                IntArg::Affine(v) => v.pullback(&to_base),
                IntArg::Opaque(_) => {
                    next_opaque += 1;
                    PwAff::var_on_domain(&universe, next_opaque - 1)
                }
            };
            (Param::Named(*id), value)
        })
        .collect();

    let mut relations = Vec::new();
    let kinds = [
        (AccessType::MayRead, &accesses.may_read),
        (AccessType::MayWrite, &accesses.may_write),
        (AccessType::MustWrite, &accesses.must_write),
    ];
    for (ty, set) in kinds {
        let mut relation = IntegerSet::from_domain_and_range(&universe, set);
        for (param, value) in &values {
            relation = substitute_pw_param(&relation, param, value);
        }
        relations.push((ty, patch_relation(&relation, &index, add, opts)?));
    }

    let depth = relations[0].1.space.n_out();
    let mut result = rebuild_access(arg, index, args, depth);
    {
        let access = result.access_mut();
        access.read = !accesses.may_read.is_empty();
        access.write = !accesses.may_write.is_empty();
    }
    for (ty, relation) in relations {
        result.set_access_relation(ty, relation);
    }
    Ok(result)
}

/// Apply the summary attached to the call `call`: every array argument
/// receives the accesses the callee performs through it, with the integer
/// arguments plugged in.
///
/// Calls without a summary are returned unchanged.
pub fn apply_summary(call: &Expr, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<Expr> {
    let Some(data) = call.as_call() else {
        return Err(ExtractError::UnexpectedKind { expected: ExprKindName::Call, found: call.kind_name() });
    };
    let Some(summary) = data.summary.clone() else {
        return Ok(call.clone());
    };
    if summary.n_arg() != call.n_arg() {
        return Err(ExtractError::SummaryMismatch {
            name: data.name.name(),
            summary: summary.n_arg(),
            call: call.n_arg(),
        });
    }

    let mut int_args = Vec::new();
    for (arg, summary_arg) in call.args().iter().zip(&summary.args) {
        let SummaryArg::Int(id) = summary_arg else { continue };
        let value = extract_affine(arg, ctx, opts)?;
        let has_args = arg.is_access() && arg.n_arg() > 0;
        if value.involves_nan() || has_args {
            debug!("integer argument {} of {} is not affine", arg, data.name);
            int_args.push((*id, IntArg::Opaque(arg.clone())));
        } else {
            int_args.push((*id, IntArg::Affine(value)));
        }
    }

    let mut result = call.clone();
    for (pos, summary_arg) in summary.args.iter().enumerate() {
        let SummaryArg::Array { accesses, .. } = summary_arg else { continue };
        let arg = call.arg(pos);
        if arg.is_access() {
            let updated = apply_to_array_arg(arg, accesses, &int_args, false, ctx, opts)?;
            result.set_arg(pos, updated);
        } else if arg.as_op() == Some(OpType::AddressOf) && arg.n_arg() == 1 && arg.arg(0).is_access() {
            let updated = apply_to_array_arg(arg.arg(0), accesses, &int_args, true, ctx, opts)?;
            let mut address = arg.clone();
            address.set_arg(0, updated);
            result.set_arg(pos, address);
        }
    }
    Ok(result)
}
