//! Benchmarks for semantic analysis of hand-built raw parse trees.
//!
//! Everything runs against the in-memory catalog; no server required.
//!
//! Run with: `cargo bench --bench analyze_bench`

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use pg_analyze::catalog::types;
use pg_analyze::nodes::raw::{FromItem, InsertStmt, RawExpr, ResTarget, SelectStmt, SetOpKind, SortBy};
use pg_analyze::{Analyzer, AnalyzerConfig, Grammar, MemoryCatalog, RawStmt, Session};

// ── Helpers ────────────────────────────────────────────────────────────────

fn make_catalog(tables: usize) -> MemoryCatalog {
    let mut cat = MemoryCatalog::new();
    for i in 0..tables {
        cat.add_table(
            &format!("t{i}"),
            &[("id", types::INT4), ("name", types::TEXT), ("amount", types::NUMERIC)],
        );
    }
    cat
}

fn eq(left: RawExpr, right: RawExpr) -> RawExpr {
    RawExpr::op("=", left, right)
}

fn select_star(table: &str) -> SelectStmt {
    SelectStmt::select(vec![ResTarget::expr(RawExpr::star())]).from(FromItem::table(table))
}

/// `SELECT * FROM t0, t1, ... WHERE t0.id = t1.id(+) AND ...`
fn oracle_chain(tables: usize) -> RawStmt {
    let mut stmt = select_star("t0");
    let mut quals = Vec::new();
    for i in 1..tables {
        stmt = stmt.from(FromItem::table(&format!("t{i}")));
        quals.push(eq(
            RawExpr::col(&format!("t{}.id", i - 1)),
            RawExpr::outer(RawExpr::col(&format!("t{i}.id"))),
        ));
    }
    stmt.filter(RawExpr::and(quals)).into_stmt()
}

/// `SELECT id FROM t0 UNION SELECT id FROM t1 UNION ...`
fn union_chain(arms: usize) -> RawStmt {
    let arm = |i: usize| SelectStmt::select(vec![ResTarget::expr(RawExpr::col("id"))]).from(FromItem::table(&format!("t{i}")));
    let mut stmt = arm(0);
    for i in 1..arms {
        stmt = SelectStmt::set_op(SetOpKind::Union, false, stmt, arm(i));
    }
    stmt.order_by(vec![SortBy::asc(RawExpr::col("id"))]).into_stmt()
}

// ── Benchmarks ─────────────────────────────────────────────────────────────

fn bench_simple_select(c: &mut Criterion) {
    let cat = make_catalog(1);
    let config = AnalyzerConfig::default();
    let session = Session::default();
    let analyzer = Analyzer::new(&cat, &config, &session);
    let stmt = select_star("t0")
        .filter(eq(RawExpr::col("id"), RawExpr::int(42)))
        .order_by(vec![SortBy::desc(RawExpr::col("amount"))])
        .limit(RawExpr::int(10))
        .into_stmt();

    c.bench_function("analyze_simple_select", |b| {
        b.iter(|| {
            cat.clear_locks();
            analyzer.analyze(black_box(&stmt), "", &[]).unwrap()
        });
    });
}

fn bench_aggregate(c: &mut Criterion) {
    let cat = make_catalog(1);
    let config = AnalyzerConfig::default();
    let session = Session::default();
    let analyzer = Analyzer::new(&cat, &config, &session);
    let stmt = SelectStmt::select(vec![
        ResTarget::expr(RawExpr::col("name")),
        ResTarget::named(RawExpr::func("sum", vec![RawExpr::col("amount")]), "total"),
        ResTarget::named(RawExpr::count_star(), "n"),
    ])
    .from(FromItem::table("t0"))
    .group_by(vec![RawExpr::col("name")])
    .having(RawExpr::op(">", RawExpr::count_star(), RawExpr::int(1)))
    .into_stmt();

    c.bench_function("analyze_group_by_having", |b| {
        b.iter(|| {
            cat.clear_locks();
            analyzer.analyze(black_box(&stmt), "", &[]).unwrap()
        });
    });
}

fn bench_outer_join_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("oracle_outer_join");
    for tables in [2, 4, 8] {
        let cat = make_catalog(tables);
        let config = AnalyzerConfig::default();
        let session = Session::default();
        let analyzer = Analyzer::new(&cat, &config, &session);
        let stmt = oracle_chain(tables);
        group.bench_with_input(BenchmarkId::from_parameter(tables), &stmt, |b, stmt| {
            b.iter(|| {
                cat.clear_locks();
                analyzer
                    .analyze_for_grammar(black_box(stmt), "", &[], Grammar::Oracle)
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_set_operations(c: &mut Criterion) {
    let mut group = c.benchmark_group("union_chain");
    for arms in [2, 8, 32] {
        let cat = make_catalog(arms);
        let config = AnalyzerConfig::default();
        let session = Session::default();
        let analyzer = Analyzer::new(&cat, &config, &session);
        let stmt = union_chain(arms);
        group.bench_with_input(BenchmarkId::from_parameter(arms), &stmt, |b, stmt| {
            b.iter(|| {
                cat.clear_locks();
                analyzer.analyze(black_box(stmt), "", &[]).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_insert_values(c: &mut Criterion) {
    let cat = make_catalog(1);
    let config = AnalyzerConfig::default();
    let session = Session::default();
    let analyzer = Analyzer::new(&cat, &config, &session);
    let rows = (0..64)
        .map(|i| vec![RawExpr::int(i), RawExpr::string("row"), RawExpr::numeric("1.5")])
        .collect();
    let stmt = InsertStmt::new("t0", Some(SelectStmt::values(rows))).into_stmt();

    c.bench_function("analyze_insert_64_rows", |b| {
        b.iter(|| {
            cat.clear_locks();
            analyzer.analyze(black_box(&stmt), "", &[]).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_simple_select,
    bench_aggregate,
    bench_outer_join_rewrite,
    bench_set_operations,
    bench_insert_values,
);
criterion_main!(benches);
