//! Integration tests for the extraction engine.

use polyextract::prelude::*;
use test_log::test;

fn sym(name: &str) -> Symbol {
    Symbol::new(name)
}

fn opts() -> ExtractOptions {
    ExtractOptions::default()
}

/// Context of the body of `for (int i = 0; ...; ++i)` inside a function
/// with an integer parameter `N`.
fn loop_context() -> Context {
    let mut ctx = Context::new();
    ctx.add_infinite_loop();
    let i = PwAff::var_on_domain(&IntegerSet::universe(ctx.space()), 0);
    ctx.set(sym("i"), i);
    ctx
}

fn int_scalar(name: &str, ctx: &Context) -> Expr {
    Expr::scalar(sym(name), &ctx.space()).with_type_size(-32)
}

fn element(array: &str, index: &Expr, ctx: &Context) -> Expr {
    let base = Expr::array(sym(array), &ctx.space(), 1).with_type_size(-32);
    subscript(&base, index, ctx, &opts()).expect("Failed to subscript")
}

fn at(value: &PwAff, point: &[Int]) -> Option<Val> {
    value.eval_point(point)
}

#[test]
fn test_parameters_and_iterators() -> anyhow::Result<()> {
    let mut ctx = loop_context();
    // N - 1 - i
    let expr = Expr::binary(
        OpType::Sub,
        Expr::binary(OpType::Sub, int_scalar("N", &ctx), Expr::int(1)),
        int_scalar("i", &ctx),
    );
    ctx.add_parameters(&expr);
    assert!(ctx.is_assigned(sym("N")));

    let value = extract_affine(&expr, &ctx, &opts())?;
    let n = Param::Named(sym("N"));
    let eval = |i: Int, big_n: Int| value.eval(&[i], &|p| (p == &n).then_some(big_n));
    assert_eq!(eval(2, 10), Some(Val::Int(7)));
    assert_eq!(eval(0, 1), Some(Val::Int(0)));
    Ok(())
}

#[test]
fn test_memo_is_transparent() -> anyhow::Result<()> {
    let ctx = loop_context();
    let expr = Expr::binary(
        OpType::Div,
        Expr::binary(OpType::Add, int_scalar("i", &ctx), Expr::int(3)),
        Expr::int(2),
    );
    let first = extract_affine(&expr, &ctx, &opts())?;
    assert!(ctx.n_cached() > 0);
    let second = extract_affine(&expr, &ctx, &opts())?;
    let uncached = extract_affine(&expr, &loop_context(), &opts())?;
    assert_eq!(first, second);
    assert_eq!(first, uncached);

    // Different options are not served from the memo.
    let relaxed = ExtractOptions { avoid_overflow: false, ..opts() };
    let other = extract_affine(&expr, &ctx, &relaxed)?;
    assert_eq!(at(&other, &[5]), at(&first, &[5]));
    Ok(())
}

#[test]
fn test_short_circuit_conjunction() -> anyhow::Result<()> {
    let mut ctx = loop_context();
    ctx.allow_nesting(false);
    // i < 4 && A[i] != 0
    let lhs = Expr::binary(OpType::Lt, int_scalar("i", &ctx), Expr::int(4));
    let rhs = Expr::binary(OpType::Ne, element("A", &int_scalar("i", &ctx), &ctx), Expr::int(0));
    let value = extract_affine(&Expr::binary(OpType::LAnd, lhs, rhs), &ctx, &opts())?;
    assert_eq!(at(&value, &[6]), Some(Val::Int(0)));
    assert_eq!(at(&value, &[2]), Some(Val::NaN));
    Ok(())
}

#[test]
fn test_truncating_division() -> anyhow::Result<()> {
    let ctx = Context::new();
    for (a, b, q, r) in [(-7, 2, -3, -1), (7, -2, -3, 1), (-7, -2, 3, -1), (7, 2, 3, 1)] {
        let div = Expr::binary(OpType::Div, Expr::int(a), Expr::int(b));
        let rem = Expr::binary(OpType::Rem, Expr::int(a), Expr::int(b));
        assert_eq!(extract_affine(&div, &ctx, &opts())?.as_constant(), Some(q), "{} / {}", a, b);
        assert_eq!(extract_affine(&rem, &ctx, &opts())?.as_constant(), Some(r), "{} % {}", a, b);
    }
    Ok(())
}

#[test]
fn test_min_distribution() -> anyhow::Result<()> {
    let ctx = loop_context();
    let i = int_scalar("i", &ctx);
    // i <= min(7, 2 * i - 3)
    let min = Expr::call(
        sym("min"),
        vec![Expr::int(7), Expr::binary(OpType::Sub, Expr::binary(OpType::Mul, Expr::int(2), i.clone()), Expr::int(3))],
    );
    let value = extract_affine_condition(&Expr::binary(OpType::Le, i, min), &ctx, &opts())?;
    assert_eq!(at(&value, &[2]), Some(Val::Int(0)));
    assert_eq!(at(&value, &[3]), Some(Val::Int(1)));
    assert_eq!(at(&value, &[7]), Some(Val::Int(1)));
    assert_eq!(at(&value, &[8]), Some(Val::Int(0)));
    Ok(())
}

#[test]
fn test_unsigned_wraparound() -> anyhow::Result<()> {
    let ctx = loop_context();
    // (unsigned char) (i + 200)
    let sum = Expr::binary(OpType::Add, int_scalar("i", &ctx), Expr::int(200)).with_type_size(8);
    let value = extract_affine(&sum, &ctx, &opts())?;
    assert_eq!(at(&value, &[10]), Some(Val::Int(210)));
    assert_eq!(at(&value, &[56]), Some(Val::Int(0)));
    assert_eq!(at(&value, &[60]), Some(Val::Int(4)));
    Ok(())
}

#[test]
fn test_signed_overflow_restricts_domain() -> anyhow::Result<()> {
    let ctx = loop_context();
    let sum = Expr::binary(OpType::Add, int_scalar("i", &ctx), Expr::int(100)).with_type_size(-8);
    let value = extract_affine(&sum, &ctx, &opts())?;
    assert_eq!(at(&value, &[27]), Some(Val::Int(127)));
    assert_eq!(at(&value, &[28]), None);

    let relaxed = ExtractOptions { avoid_overflow: false, ..opts() };
    let value = extract_affine(&sum, &ctx, &relaxed)?;
    assert_eq!(at(&value, &[28]), Some(Val::Int(128)));
    Ok(())
}

#[test]
fn test_write_invalidates_binding() -> anyhow::Result<()> {
    let mut ctx = loop_context();
    ctx.set(sym("x"), PwAff::constant_on(&IntegerSet::universe(ctx.space()), 3));
    let x = int_scalar("x", &ctx);
    assert_eq!(at(&extract_affine(&x, &ctx, &opts())?, &[0]), Some(Val::Int(3)));

    // x += 1
    let mut target = x.clone();
    target.set_write(true);
    let update = Expr::binary(OpType::AddAssign, target, Expr::int(1));
    ctx.clear_writes_in(&update);
    assert!(!ctx.is_assigned(sym("x")));

    ctx.allow_nesting(false);
    assert_eq!(at(&extract_affine(&x, &ctx, &opts())?, &[0]), Some(Val::NaN));
    Ok(())
}

#[test]
fn test_capture_round_trip_through_subscript() -> anyhow::Result<()> {
    let ctx = loop_context();
    // A[B[i]] with B[i] captured while extracting the subscript
    let b = element("B", &int_scalar("i", &ctx), &ctx);
    let access = element("A", &b, &ctx);
    assert!(access.contains_nested());
    assert_eq!(access.n_arg(), 0);

    let stmt = Stmt::new(ctx.domain().clone(), Expr::binary(OpType::Assign, int_scalar("x", &ctx), access));
    let stmt = stmt.resolve_nested();
    assert!(!stmt.contains_nested());

    let resolved = stmt.body.arg(1);
    assert_eq!(resolved.n_arg(), 1);
    assert_eq!(resolved.arg(0), &b);
    assert_eq!(at(&resolved.access_index().outputs[0], &[4, 9]), Some(Val::Int(9)));
    Ok(())
}

#[test]
fn test_capture_round_trip_through_domain() -> anyhow::Result<()> {
    let ctx = loop_context();
    // if (B[i] > 0) ...
    let b = element("B", &int_scalar("i", &ctx), &ctx);
    let cond = extract_affine_condition(&Expr::binary(OpType::Gt, b.clone(), Expr::int(0)), &ctx, &opts())?;
    let domain = ctx.domain().intersect(&cond.non_zero_set());

    let stmt = Stmt::new(domain, Expr::int(0)).resolve_nested();
    assert_eq!(stmt.n_arg(), 1);
    assert_eq!(stmt.args[0], b);
    assert!(stmt.domain.contains_point(&[2, 1]));
    assert!(!stmt.domain.contains_point(&[2, 0]));
    assert!(!stmt.domain.contains_point(&[-1, 1]));
    Ok(())
}

#[test]
fn test_self_dependence_is_pruned() -> anyhow::Result<()> {
    let ctx = loop_context();
    // A[A[i]] only re-reads A
    let inner = element("A", &int_scalar("i", &ctx), &ctx);
    let outer = element("A", &inner, &ctx);
    let resolved = resolve_nested(outer);
    assert_eq!(resolved.n_arg(), 0);
    assert!(!resolved.contains_nested());
    let read = resolved.access_relation(AccessType::MayRead);
    assert!(read.contains_point(&[0, 5]));
    assert!(!read.contains_point(&[0, -1]));
    Ok(())
}

#[test]
fn test_summary_applied_at_call_site() -> anyhow::Result<()> {
    let ctx = loop_context();
    // void clear(int n, int *T) writes T[0 .. n - 1]; called as clear(i + 1, &A[i])
    let n = sym("n");
    let t = AffineExpr::var(0, 1);
    let written = IntegerSet::from_constraints(
        Space::set(Tuple::named(sym("T"), 1)),
        [Constraint::lower_bound(0, 0, 1), Constraint::lt(t, AffineExpr::param(Param::Named(n), 1))],
    );
    let summary = FunctionSummary::new(sym("clear"))
        .int_arg(n)
        .array_arg(sym("T"), ArrayAccesses::none(sym("T"), 1).with_must_write(written));

    let count = Expr::binary(OpType::Add, int_scalar("i", &ctx), Expr::int(1));
    let target = Expr::unary(OpType::AddressOf, element("A", &int_scalar("i", &ctx), &ctx));
    let mut call = Expr::call(sym("clear"), vec![count, target]);
    call.set_call_summary(std::rc::Rc::new(summary));

    let applied = apply_summary(&call, &ctx, &opts())?;
    let access = applied.arg(1).arg(0);
    assert!(access.is_write());
    assert!(!access.is_read());
    let write = access.access_relation(AccessType::MustWrite);
    // at i = 2: A[2 .. 4]
    assert!(write.contains_point(&[2, 2]));
    assert!(write.contains_point(&[2, 4]));
    assert!(!write.contains_point(&[2, 5]));
    assert!(!write.contains_point(&[2, 1]));
    Ok(())
}

#[test]
fn test_evaluate_expr_plugs_in_known_values() -> anyhow::Result<()> {
    let mut ctx = loop_context();
    ctx.set(sym("k"), PwAff::constant_on(&IntegerSet::universe(ctx.space()), 4));
    // A[k * i]
    let product = Expr::binary(OpType::Mul, int_scalar("k", &ctx), int_scalar("i", &ctx));
    let evaluated = ctx.evaluate_expr(product, &opts())?;
    assert!(evaluated.is_affine());
    let value = extract_affine(&evaluated, &ctx, &opts())?;
    assert_eq!(at(&value, &[3]), Some(Val::Int(12)));
    Ok(())
}

#[test]
fn test_malformed_input_is_reported() {
    let ctx = loop_context();
    let mut broken = Expr::binary(OpType::Add, Expr::int(1), Expr::int(2));
    broken.push_arg(Expr::int(3));
    let err = extract_affine(&broken, &ctx, &opts()).unwrap_err();
    assert!(matches!(err, ExtractError::Arity { expected: 2, found: 3, .. }));
    assert!(err.to_string().contains("+"));

    let wide = Expr::access(MultiPwAff::from_affs(Space::set_of_dim(2), Tuple::anonymous(1), vec![AffineExpr::var(1, 2)]));
    assert!(matches!(
        extract_affine(&wide, &ctx, &opts()),
        Err(ExtractError::DimensionMismatch { context: 1, expr: 2 })
    ));
}
