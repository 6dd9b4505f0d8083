//! Affine value extraction.
//!
//! [`extract_affine`] computes the value of an expression as a piecewise
//! quasi-affine function over the domain of a [`Context`]. An expression
//! without such a value extracts to NaN; only malformed input is an error.
//!
//! Integer results of arithmetic operators respect the type of the node:
//! unsigned results wrap around, signed results are restricted to the part
//! of the domain where they do not overflow (unless overflow avoidance is
//! disabled).

use crate::analysis::context::Context;
use crate::analysis::nest::Capture;
use crate::ir::expr::{Expr, ExprKind, OpType};
use crate::polyhedral::{CmpOp, Int, IntegerSet, Param, PwAff, Val};
use crate::utils::errors::{ExtractError, ExtractResult};
use crate::utils::intern::{builtins, Symbol};
use crate::ExtractOptions;
use log::debug;

/// Builtins recognized only when pencil builtins are allowed.
fn pencil_builtins() -> [Symbol; 9] {
    [
        *builtins::IMIN, *builtins::UMIN, *builtins::IMAX, *builtins::UMAX,
        *builtins::INT_MOD, *builtins::INT_FLOOR, *builtins::INT_CEIL,
        *builtins::FLOORD, *builtins::CEILD,
    ]
}

fn non_affine(ctx: &Context) -> PwAff {
    PwAff::nan_on_domain(&IntegerSet::universe(ctx.space()))
}

fn check_arity(expr: &Expr, op: OpType) -> ExtractResult<()> {
    if expr.n_arg() != op.arity() {
        return Err(ExtractError::Arity {
            op: op.symbol().to_string(),
            expected: op.arity(),
            found: expr.n_arg(),
        });
    }
    Ok(())
}

/// The piecewise affine value of `expr` over the domain of `ctx`.
pub fn extract_affine(expr: &Expr, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<PwAff> {
    if let Some(value) = ctx.get_cached(expr, opts) {
        return Ok(value);
    }
    let value = match expr.kind() {
        ExprKind::Int(v) => from_int(*v, ctx),
        ExprKind::Access(_) => from_access(expr, ctx)?,
        ExprKind::Op(op) => from_op(expr, *op, ctx, opts)?,
        ExprKind::Call(_) => from_call(expr, ctx, opts)?,
        ExprKind::Cast(_) | ExprKind::Double { .. } | ExprKind::Error => non_affine(ctx),
    };
    if value.involves_nan() {
        debug!("{} has no affine value", expr);
    }
    ctx.set_cached(expr, opts, &value);
    Ok(value)
}

fn from_int(v: Val, ctx: &Context) -> PwAff {
    match v {
        Val::Int(v) => PwAff::constant_on(&IntegerSet::universe(ctx.space()), v),
        Val::NaN => non_affine(ctx),
    }
}

fn from_access(expr: &Expr, ctx: &Context) -> ExtractResult<PwAff> {
    if expr.is_affine() {
        let index = expr.access_index();
        if index.n_out() != 1 {
            return Ok(non_affine(ctx));
        }
        let value = &index.outputs[0];
        if value.dim() != ctx.dim() {
            return Err(ExtractError::DimensionMismatch { context: ctx.dim(), expr: value.dim() });
        }
        return Ok(value.clone());
    }
    if expr.type_size() == 0 || !expr.is_scalar_access() {
        return Ok(nested_access(expr, ctx));
    }
    match expr.access_id().and_then(|id| ctx.get_value(id)) {
        Some(value) => Ok(value),
        None => Ok(nested_access(expr, ctx)),
    }
}

/// A fresh parameter standing for the value of `expr`, if nesting is
/// allowed and `expr` is itself free of captures and arguments.
fn nested_access(expr: &Expr, ctx: &Context) -> PwAff {
    if !ctx.allows_nesting() || expr.n_arg() > 0 || expr.contains_nested() {
        return non_affine(ctx);
    }
    let capture = Capture::new(expr.clone());
    debug!("capturing {} as {}", expr, capture);
    PwAff::param_on_domain(&IntegerSet::universe(ctx.space()), Param::Nested(capture))
}

fn from_op(expr: &Expr, op: OpType, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<PwAff> {
    check_arity(expr, op)?;
    let value = match op {
        OpType::Add | OpType::Sub => {
            let lhs = extract_affine(expr.arg(0), ctx, opts)?;
            let rhs = extract_affine(expr.arg(1), ctx, opts)?;
            if op == OpType::Add { lhs.add(&rhs) } else { lhs.sub(&rhs) }
        }
        OpType::Div | OpType::Rem => from_div_rem(expr, op, ctx, opts)?,
        OpType::Mul => {
            let lhs = extract_affine(expr.arg(0), ctx, opts)?;
            let rhs = extract_affine(expr.arg(1), ctx, opts)?;
            if !lhs.is_cst() && !rhs.is_cst() {
                return Ok(non_affine(ctx));
            }
            lhs.mul(&rhs)
        }
        OpType::Minus => extract_affine(expr.arg(0), ctx, opts)?.neg(),
        OpType::Cond => return from_cond(expr, ctx, opts),
        _ if op.is_comparison() || op.is_logical() => return extract_affine_condition(expr, ctx, opts),
        _ => return Ok(non_affine(ctx)),
    };
    Ok(adjust_for_type(value, expr.type_size(), opts))
}

/// Wrap unsigned results and keep signed results within their range.
/// NaN pieces are left as they are.
fn adjust_for_type(value: PwAff, type_size: i32, opts: &ExtractOptions) -> PwAff {
    let width = type_size.unsigned_abs();
    if type_size > 0 {
        match (1 as Int).checked_shl(width).filter(|m| *m > 0) {
            Some(modulus) => value.mod_val(modulus),
            None => value,
        }
    } else if type_size < 0 && opts.avoid_overflow {
        match (1 as Int).checked_shl(width - 1).filter(|b| *b > 0) {
            Some(bound) => value.restrict_range(-bound, bound - 1),
            None => value,
        }
    } else {
        value
    }
}

/// Truncating division or remainder by a constant divisor.
fn from_div_rem(expr: &Expr, op: OpType, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<PwAff> {
    let divisor = extract_affine(expr.arg(1), ctx, opts)?;
    let Some(d) = divisor.as_constant() else {
        return Ok(non_affine(ctx));
    };
    let dividend = extract_affine(expr.arg(0), ctx, opts)?;
    let value = if op == OpType::Div { dividend.tdiv_q(d) } else { dividend.tdiv_r(d) };
    Ok(value.gist(&ctx.gist_domain()))
}

fn from_cond(expr: &Expr, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<PwAff> {
    let cond = extract_affine_condition(expr.arg(0), ctx, opts)?;
    let then = extract_affine(expr.arg(1), ctx, opts)?;
    let otherwise = extract_affine(expr.arg(2), ctx, opts)?;
    Ok(cond.cond(&then, &otherwise))
}

/// The value of a boolean condition: 1 where it holds and 0 where it does
/// not. Expressions that are neither comparisons nor logical operators are
/// true where their value is non-zero.
pub fn extract_affine_condition(expr: &Expr, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<PwAff> {
    if let Some(op) = expr.as_op() {
        if op.is_comparison() {
            check_arity(expr, op)?;
            return extract_comparison(op, expr.arg(0), expr.arg(1), ctx, opts);
        }
        if op.is_logical() {
            check_arity(expr, op)?;
            return extract_logical(expr, op, ctx, opts);
        }
    }
    let value = extract_affine(expr, ctx, opts)?;
    // Double negation is the non-zero indicator; NaN pieces are kept.
    Ok(value.not().not())
}

fn cmp_op(op: OpType) -> CmpOp {
    match op {
        OpType::Eq => CmpOp::Eq,
        OpType::Ne => CmpOp::Ne,
        OpType::Lt => CmpOp::Lt,
        OpType::Le => CmpOp::Le,
        OpType::Gt => CmpOp::Gt,
        OpType::Ge => CmpOp::Ge,
        _ => unreachable!("{} is not a comparison", op),
    }
}

/// Is `expr` a call to the builtin `name` with two arguments?
fn is_builtin_pair(expr: &Expr, name: Symbol) -> bool {
    expr.as_call().map_or(false, |call| call.name == name) && expr.n_arg() == 2
}

fn extract_comparison(op: OpType, lhs: &Expr, rhs: &Expr, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<PwAff> {
    match op {
        OpType::Gt => return extract_comparison(OpType::Lt, rhs, lhs, ctx, opts),
        OpType::Ge => return extract_comparison(OpType::Le, rhs, lhs, ctx, opts),
        OpType::Lt | OpType::Le => {
            // a <= min(b, c) is a <= b && a <= c
            if is_builtin_pair(rhs, *builtins::MIN) {
                let first = extract_comparison(op, lhs, rhs.arg(0), ctx, opts)?;
                let second = extract_comparison(op, lhs, rhs.arg(1), ctx, opts)?;
                return Ok(first.and(&second));
            }
            // max(a, b) <= c is a <= c && b <= c
            if is_builtin_pair(lhs, *builtins::MAX) {
                let first = extract_comparison(op, lhs.arg(0), rhs, ctx, opts)?;
                let second = extract_comparison(op, lhs.arg(1), rhs, ctx, opts)?;
                return Ok(first.and(&second));
            }
        }
        _ => {}
    }
    let lhs = extract_affine(lhs, ctx, opts)?;
    let rhs = extract_affine(rhs, ctx, opts)?;
    Ok(lhs.compare(cmp_op(op), &rhs))
}

/// `&&` and `||` short-circuit: the right operand only matters where the
/// left operand does not decide the outcome.
fn extract_logical(expr: &Expr, op: OpType, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<PwAff> {
    let lhs = extract_affine_condition(expr.arg(0), ctx, opts)?;
    if op == OpType::LNot {
        if lhs.involves_nan() {
            return Ok(PwAff::nan_on_domain(&lhs.domain()));
        }
        return Ok(lhs.not());
    }
    let rhs = extract_affine_condition(expr.arg(1), ctx, opts)?;
    Ok(match op {
        OpType::LAnd => lhs.cond(&rhs, &lhs),
        _ => lhs.cond(&lhs, &rhs),
    })
}

fn from_call(expr: &Expr, ctx: &Context, opts: &ExtractOptions) -> ExtractResult<PwAff> {
    let name = expr.call_name();
    let known = name == *builtins::MIN
        || name == *builtins::MAX
        || (opts.allow_pencil_builtins && pencil_builtins().contains(&name));
    if !known {
        return Ok(non_affine(ctx));
    }
    if expr.n_arg() != 2 {
        return Err(ExtractError::CallArity { name: name.name(), expected: 2, found: expr.n_arg() });
    }
    let is_min = [*builtins::MIN, *builtins::IMIN, *builtins::UMIN].contains(&name);
    let is_max = [*builtins::MAX, *builtins::IMAX, *builtins::UMAX].contains(&name);
    if is_min || is_max {
        let lhs = extract_affine(expr.arg(0), ctx, opts)?;
        let rhs = extract_affine(expr.arg(1), ctx, opts)?;
        return Ok(if is_min { lhs.min(&rhs) } else { lhs.max(&rhs) });
    }
    let Some(d) = expr.arg(1).as_int().and_then(|v| v.as_int()) else {
        return Ok(non_affine(ctx));
    };
    let value = extract_affine(expr.arg(0), ctx, opts)?;
    Ok(if name == *builtins::INT_MOD {
        value.mod_val(d)
    } else if name == *builtins::INT_FLOOR || name == *builtins::FLOORD {
        value.floor_div_val(d)
    } else {
        value.ceil_div_val(d)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::polyhedral::{AffineExpr, MultiPwAff, Space, Tuple};
    use test_log::test;

    fn sym(name: &str) -> Symbol {
        Symbol::new(name)
    }

    fn ctx_i() -> Context {
        let mut ctx = Context::new();
        ctx.add_inner_iterator(sym("i"));
        ctx
    }

    fn var_i(ctx: &Context) -> Expr {
        Expr::scalar(sym("i"), &ctx.space()).with_type_size(-32)
    }

    fn opts() -> ExtractOptions {
        ExtractOptions::default()
    }

    fn at(value: &PwAff, i: Int) -> Option<Val> {
        value.eval_point(&[i])
    }

    #[test]
    fn test_constant_and_iterator() {
        let ctx = ctx_i();
        let value = extract_affine(&Expr::int(7), &ctx, &opts()).unwrap();
        assert_eq!(value.as_constant(), Some(7));
        let i = extract_affine(&var_i(&ctx), &ctx, &opts()).unwrap();
        assert_eq!(at(&i, 3), Some(Val::Int(3)));
    }

    #[test]
    fn test_arity_error() {
        let ctx = ctx_i();
        let bad = Expr::op(OpType::Add, vec![Expr::int(1)]);
        let err = extract_affine(&bad, &ctx, &opts()).unwrap_err();
        assert_eq!(err, ExtractError::Arity { op: "+".to_string(), expected: 2, found: 1 });
    }

    #[test]
    fn test_truncating_div_and_rem() {
        let ctx = ctx_i();
        let div = Expr::binary(OpType::Div, var_i(&ctx), Expr::int(4));
        let rem = Expr::binary(OpType::Rem, var_i(&ctx), Expr::int(4));
        let q = extract_affine(&div, &ctx, &opts()).unwrap();
        let r = extract_affine(&rem, &ctx, &opts()).unwrap();
        assert_eq!(at(&q, -5), Some(Val::Int(-1)));
        assert_eq!(at(&r, -5), Some(Val::Int(-1)));
        assert_eq!(at(&q, 9), Some(Val::Int(2)));
    }

    #[test]
    fn test_non_constant_divisor() {
        let ctx = ctx_i();
        let div = Expr::binary(OpType::Div, Expr::int(8), var_i(&ctx));
        assert!(extract_affine(&div, &ctx, &opts()).unwrap().involves_nan());
    }

    #[test]
    fn test_product_needs_constant_factor() {
        let ctx = ctx_i();
        let twice = Expr::binary(OpType::Mul, Expr::int(2), var_i(&ctx));
        assert_eq!(at(&extract_affine(&twice, &ctx, &opts()).unwrap(), 4), Some(Val::Int(8)));
        let square = Expr::binary(OpType::Mul, var_i(&ctx), var_i(&ctx));
        assert!(extract_affine(&square, &ctx, &opts()).unwrap().involves_nan());
    }

    #[test]
    fn test_unsigned_wrap() {
        let ctx = Context::new();
        let sum = Expr::binary(OpType::Add, Expr::int(250), Expr::int(10)).with_type_size(8);
        let value = extract_affine(&sum, &ctx, &opts()).unwrap();
        assert_eq!(value.as_constant(), Some(4));
    }

    #[test]
    fn test_signed_overflow_avoided() {
        let ctx = ctx_i();
        let sum = Expr::binary(OpType::Add, Expr::int(120), var_i(&ctx)).with_type_size(-8);
        let value = extract_affine(&sum, &ctx, &opts()).unwrap();
        assert_eq!(at(&value, 7), Some(Val::Int(127)));
        assert_eq!(at(&value, 8), None);
        assert_eq!(at(&value, -248), Some(Val::Int(-128)));
        assert_eq!(at(&value, -249), None);

        let relaxed = ExtractOptions { avoid_overflow: false, ..opts() };
        let value = extract_affine(&sum, &ctx, &relaxed).unwrap();
        assert_eq!(at(&value, 8), Some(Val::Int(128)));
    }

    /// `cond ? value : A[i]`, where `A[i]` has no value without nesting.
    fn partly_nan(ctx: &Context, cond: Expr, value: Expr) -> Expr {
        let a = Expr::access(MultiPwAff::from_affs(
            ctx.space(),
            Tuple::named(sym("A"), 1),
            vec![AffineExpr::var(0, 1)],
        ))
        .with_type_size(-32);
        Expr::ternary(cond, value, a)
    }

    #[test]
    fn test_unsigned_wrap_with_nan_pieces() {
        let mut ctx = ctx_i();
        ctx.allow_nesting(false);
        let positive = Expr::binary(OpType::Gt, var_i(&ctx), Expr::int(0));
        let operand = partly_nan(&ctx, positive, Expr::int(250));
        let sum = Expr::binary(OpType::Add, operand, Expr::int(10)).with_type_size(8);
        let value = extract_affine(&sum, &ctx, &opts()).unwrap();
        assert_eq!(at(&value, 1), Some(Val::Int(4)));
        assert_eq!(at(&value, 0), Some(Val::NaN));
    }

    #[test]
    fn test_signed_overflow_with_nan_pieces() {
        let mut ctx = ctx_i();
        ctx.allow_nesting(false);
        let positive = Expr::binary(OpType::Gt, var_i(&ctx), Expr::int(0));
        let operand = partly_nan(&ctx, positive, var_i(&ctx));
        let sum = Expr::binary(OpType::Add, operand, Expr::int(120)).with_type_size(-8);
        let value = extract_affine(&sum, &ctx, &opts()).unwrap();
        assert_eq!(at(&value, 7), Some(Val::Int(127)));
        assert_eq!(at(&value, 8), None);
        assert_eq!(at(&value, 100), None);
        assert_eq!(at(&value, -3), Some(Val::NaN));
    }

    fn pencil() -> ExtractOptions {
        ExtractOptions { allow_pencil_builtins: true, ..opts() }
    }

    fn builtin(name: &str, lhs: Expr, rhs: Expr, ctx: &Context) -> PwAff {
        extract_affine(&Expr::call(sym(name), vec![lhs, rhs]), ctx, &pencil()).unwrap()
    }

    #[test]
    fn test_integer_division_builtins() {
        let ctx = ctx_i();
        let int_mod = builtin("intMod", var_i(&ctx), Expr::int(4), &ctx);
        assert_eq!(at(&int_mod, -9), Some(Val::Int(3)));
        assert_eq!(at(&int_mod, 9), Some(Val::Int(1)));
        let int_floor = builtin("intFloor", var_i(&ctx), Expr::int(4), &ctx);
        assert_eq!(at(&int_floor, -5), Some(Val::Int(-2)));
        assert_eq!(at(&int_floor, 5), Some(Val::Int(1)));
        let int_ceil = builtin("intCeil", var_i(&ctx), Expr::int(4), &ctx);
        assert_eq!(at(&int_ceil, -5), Some(Val::Int(-1)));
        assert_eq!(at(&int_ceil, 5), Some(Val::Int(2)));
        let ceild = builtin("ceild", var_i(&ctx), Expr::int(2), &ctx);
        assert_eq!(at(&ceild, 7), Some(Val::Int(4)));
        assert_eq!(at(&ceild, -7), Some(Val::Int(-3)));
        let floord = builtin("floord", var_i(&ctx), Expr::int(2), &ctx);
        assert_eq!(at(&floord, -7), Some(Val::Int(-4)));
    }

    #[test]
    fn test_non_positive_literal_divisor() {
        let ctx = ctx_i();
        for name in ["intFloor", "intMod", "intCeil"] {
            assert!(builtin(name, var_i(&ctx), Expr::int(0), &ctx).involves_nan(), "{}", name);
            assert!(builtin(name, var_i(&ctx), Expr::int(-2), &ctx).involves_nan(), "{}", name);
        }
    }

    #[test]
    fn test_min_max_builtins() {
        let ctx = ctx_i();
        for name in ["imin", "umin"] {
            let value = builtin(name, var_i(&ctx), Expr::int(2), &ctx);
            assert_eq!(at(&value, 1), Some(Val::Int(1)), "{}", name);
            assert_eq!(at(&value, 5), Some(Val::Int(2)), "{}", name);
        }
        for name in ["imax", "umax"] {
            let value = builtin(name, var_i(&ctx), Expr::int(2), &ctx);
            assert_eq!(at(&value, 1), Some(Val::Int(2)), "{}", name);
            assert_eq!(at(&value, 5), Some(Val::Int(5)), "{}", name);
        }
        // Without pencil builtins these are ordinary calls.
        let imin = Expr::call(sym("imin"), vec![var_i(&ctx), Expr::int(2)]);
        assert!(extract_affine(&imin, &ctx, &opts()).unwrap().involves_nan());
    }

    #[test]
    fn test_cast_and_float_literal_have_no_value() {
        let ctx = ctx_i();
        let cast = Expr::cast("float", var_i(&ctx));
        assert!(extract_affine(&cast, &ctx, &opts()).unwrap().involves_nan());
        let float = Expr::double(1.5, "1.5");
        let value = extract_affine(&float, &ctx, &opts()).unwrap();
        assert_eq!(at(&value, 0), Some(Val::NaN));
    }

    #[test]
    fn test_min_distribution() {
        let ctx = Context::new();
        let min = Expr::call(sym("min"), vec![Expr::int(3), Expr::int(1)]);
        let le = Expr::binary(OpType::Le, Expr::int(2), min);
        let value = extract_affine(&le, &ctx, &opts()).unwrap();
        assert_eq!(value.as_constant(), Some(0));
    }

    #[test]
    fn test_min_distribution_matches_conjunction() {
        let ctx = ctx_i();
        let n = |v| Expr::int(v);
        let min = Expr::call(sym("min"), vec![n(10), var_i(&ctx)]);
        let distributed = extract_affine(&Expr::binary(OpType::Ge, min, n(3)), &ctx, &opts()).unwrap();
        let conjunction = Expr::binary(
            OpType::LAnd,
            Expr::binary(OpType::Le, n(3), n(10)),
            Expr::binary(OpType::Le, n(3), var_i(&ctx)),
        );
        let expected = extract_affine(&conjunction, &ctx, &opts()).unwrap();
        assert!(distributed.non_zero_set().is_equal(&expected.non_zero_set()));
        assert!(distributed.zero_set().is_equal(&expected.zero_set()));
    }

    #[test]
    fn test_short_circuit_and() {
        let mut ctx = ctx_i();
        ctx.allow_nesting(false);
        // i > 5 && A[i] > 0, with A[i] not affine
        let a = Expr::access(MultiPwAff::from_affs(
            ctx.space(),
            Tuple::named(sym("A"), 1),
            vec![AffineExpr::var(0, 1)],
        ))
        .with_type_size(-32);
        let cond = Expr::binary(
            OpType::LAnd,
            Expr::binary(OpType::Gt, var_i(&ctx), Expr::int(5)),
            Expr::binary(OpType::Gt, a, Expr::int(0)),
        );
        let value = extract_affine(&cond, &ctx, &opts()).unwrap();
        assert_eq!(at(&value, 2), Some(Val::Int(0)));
        assert_eq!(at(&value, 6), Some(Val::NaN));
    }

    #[test]
    fn test_logical_not_and_or() {
        let ctx = ctx_i();
        let small = Expr::binary(OpType::Lt, var_i(&ctx), Expr::int(3));
        let not = extract_affine(&Expr::unary(OpType::LNot, small.clone()), &ctx, &opts()).unwrap();
        assert_eq!(at(&not, 1), Some(Val::Int(0)));
        assert_eq!(at(&not, 4), Some(Val::Int(1)));
        let big = Expr::binary(OpType::Gt, var_i(&ctx), Expr::int(8));
        let or = extract_affine(&Expr::binary(OpType::LOr, small, big), &ctx, &opts()).unwrap();
        assert_eq!(at(&or, 1), Some(Val::Int(1)));
        assert_eq!(at(&or, 5), Some(Val::Int(0)));
        assert_eq!(at(&or, 9), Some(Val::Int(1)));
    }

    #[test]
    fn test_ternary() {
        let ctx = ctx_i();
        let e = Expr::ternary(
            Expr::binary(OpType::Ge, var_i(&ctx), Expr::int(0)),
            var_i(&ctx),
            Expr::unary(OpType::Minus, var_i(&ctx)),
        );
        let abs = extract_affine(&e, &ctx, &opts()).unwrap();
        assert_eq!(at(&abs, -4), Some(Val::Int(4)));
        assert_eq!(at(&abs, 6), Some(Val::Int(6)));
    }

    #[test]
    fn test_non_boolean_condition() {
        let ctx = ctx_i();
        let cond = extract_affine_condition(&Expr::binary(OpType::Sub, var_i(&ctx), Expr::int(2)), &ctx, &opts()).unwrap();
        assert_eq!(at(&cond, 2), Some(Val::Int(0)));
        assert_eq!(at(&cond, 5), Some(Val::Int(1)));
    }

    #[test]
    fn test_builtins_are_gated() {
        let ctx = ctx_i();
        let floord = Expr::call(sym("floord"), vec![var_i(&ctx), Expr::int(3)]);
        assert!(extract_affine(&floord, &ctx, &opts()).unwrap().involves_nan());
        let pencil = ExtractOptions { allow_pencil_builtins: true, ..opts() };
        let value = extract_affine(&floord, &ctx, &pencil).unwrap();
        assert_eq!(at(&value, -1), Some(Val::Int(-1)));
        let non_literal = Expr::call(sym("intMod"), vec![var_i(&ctx), var_i(&ctx)]);
        assert!(extract_affine(&non_literal, &ctx, &pencil).unwrap().involves_nan());
        let bad = Expr::call(sym("max"), vec![Expr::int(1)]);
        assert!(matches!(extract_affine(&bad, &ctx, &opts()), Err(ExtractError::CallArity { .. })));
    }

    #[test]
    fn test_unknown_scalar_is_captured() {
        let ctx = ctx_i();
        let n = Expr::scalar(sym("n"), &ctx.space()).with_type_size(-32);
        let value = extract_affine(&n, &ctx, &opts()).unwrap();
        assert!(value.involves_param_where(&Param::is_nested));

        let mut strict = ctx.clone();
        strict.allow_nesting(false);
        assert!(extract_affine(&n, &strict, &opts()).unwrap().involves_nan());
    }

    #[test]
    fn test_dimension_mismatch() {
        let ctx = ctx_i();
        let value = PwAff::constant_on(&IntegerSet::universe(Space::set_of_dim(2)), 1);
        let err = extract_affine(&Expr::from_pw_aff(value), &ctx, &opts()).unwrap_err();
        assert_eq!(err, ExtractError::DimensionMismatch { context: 1, expr: 2 });
    }

    #[test]
    fn test_memoized_result_is_stable() {
        let ctx = ctx_i();
        let e = Expr::binary(OpType::Div, var_i(&ctx), Expr::int(3)).with_type_size(-32);
        let first = extract_affine(&e, &ctx, &opts()).unwrap();
        let second = extract_affine(&e, &ctx, &opts()).unwrap();
        let fresh = extract_affine(&e, &ctx_i(), &opts()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, fresh);
    }
}
