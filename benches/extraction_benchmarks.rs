//! Benchmarks for the extraction engine.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use polyextract::prelude::*;

/// Context of a loop nest of the given depth with iterators `i0`, `i1`, ...
fn nest_context(depth: usize) -> Context {
    let mut ctx = Context::new();
    for d in 0..depth {
        ctx.add_inner_iterator(Symbol::new(&format!("i{}", d)));
    }
    ctx
}

fn iterator(d: usize, ctx: &Context) -> Expr {
    Expr::scalar(Symbol::new(&format!("i{}", d)), &ctx.space()).with_type_size(-32)
}

/// `(i0 + 2 * i1 - i2) / 4`
fn stencil_index(ctx: &Context) -> Expr {
    let sum = Expr::binary(
        OpType::Sub,
        Expr::binary(
            OpType::Add,
            iterator(0, ctx),
            Expr::binary(OpType::Mul, Expr::int(2), iterator(1, ctx)),
        ),
        iterator(2, ctx),
    );
    Expr::binary(OpType::Div, sum, Expr::int(4)).with_type_size(-32)
}

/// Benchmark extraction of an arithmetic expression.
fn bench_arithmetic(c: &mut Criterion) {
    let expr = stencil_index(&nest_context(3));

    c.bench_function("extract_division", |b| {
        b.iter(|| {
            // A fresh context each time so the memo does not answer.
            let ctx = nest_context(3);
            extract_affine(black_box(&expr), &ctx, &ExtractOptions::default()).unwrap()
        })
    });

    let ctx = nest_context(3);
    c.bench_function("extract_division_memoized", |b| {
        b.iter(|| extract_affine(black_box(&expr), &ctx, &ExtractOptions::default()).unwrap())
    });
}

/// Benchmark extraction of conditions with min/max distribution.
fn bench_conditions(c: &mut Criterion) {
    let ctx = nest_context(2);
    let min = Expr::call(Symbol::new("min"), vec![iterator(1, &ctx), Expr::int(100)]);
    let max = Expr::call(Symbol::new("max"), vec![iterator(0, &ctx), Expr::int(0)]);
    let cond = Expr::binary(
        OpType::LAnd,
        Expr::binary(OpType::Le, iterator(0, &ctx), min),
        Expr::binary(OpType::Le, max, iterator(1, &ctx)),
    );

    c.bench_function("extract_min_max_condition", |b| {
        b.iter(|| {
            let ctx = nest_context(2);
            extract_affine_condition(black_box(&cond), &ctx, &ExtractOptions::default()).unwrap()
        })
    });
}

/// Benchmark capture and resolution of a nested access.
fn bench_nested(c: &mut Criterion) {
    let ctx = nest_context(1);
    let opts = ExtractOptions::default();
    let b_of_i = subscript(
        &Expr::array(Symbol::new("B"), &ctx.space(), 1).with_type_size(-32),
        &iterator(0, &ctx),
        &ctx,
        &opts,
    )
    .unwrap();
    let a = Expr::array(Symbol::new("A"), &ctx.space(), 1);

    c.bench_function("capture_and_resolve", |b| {
        b.iter(|| {
            let ctx = nest_context(1);
            let access = subscript(&a, black_box(&b_of_i), &ctx, &opts).unwrap();
            resolve_nested(access)
        })
    });
}

criterion_group!(benches, bench_arithmetic, bench_conditions, bench_nested);
criterion_main!(benches);
