//! Property-based tests for analyzer invariants.
//!
//! Uses `proptest` to check, over random inputs:
//! - row-mark merging does not depend on the order clauses are applied
//! - ROWNUM upper bounds fold to the matching LIMIT
//! - every Var produced for `SELECT *` points into the range table
//! - the override search path never outlives an analysis

mod common;

use common::{Fixture, select_cols};
use pg_analyze::analyze::locking::apply_locking_clause;
use pg_analyze::nodes::primnodes::Expr;
use pg_analyze::nodes::query::{CmdType, LockClauseStrength};
use pg_analyze::nodes::raw::{FromItem, RawExpr, ResTarget, SelectStmt};
use pg_analyze::{Grammar, Query};
use proptest::prelude::*;

// ── Strategies ─────────────────────────────────────────────────────────────

fn arb_strength() -> impl Strategy<Value = LockClauseStrength> {
    prop_oneof![
        Just(LockClauseStrength::ForKeyShare),
        Just(LockClauseStrength::ForShare),
        Just(LockClauseStrength::ForNoKeyUpdate),
        Just(LockClauseStrength::ForUpdate),
    ]
}

/// One locking request: strength, NOWAIT, inherited from a parent level.
fn arb_lock_request() -> impl Strategy<Value = (LockClauseStrength, bool, bool)> {
    (arb_strength(), any::<bool>(), any::<bool>())
}

fn arb_grammar() -> impl Strategy<Value = Grammar> {
    prop_oneof![Just(Grammar::Postgres), Just(Grammar::Oracle)]
}

fn apply_all(requests: &[(LockClauseStrength, bool, bool)]) -> Query {
    let mut q = Query::new(CmdType::Select);
    for &(strength, no_wait, pushed_down) in requests {
        apply_locking_clause(&mut q, 1, strength, no_wait, pushed_down);
    }
    q
}

fn rownum_limit(op: &str, k: i64) -> Option<Expr> {
    let fx = Fixture::oracle();
    let stmt = select_cols(&["a"], "t")
        .filter(RawExpr::op(op, RawExpr::rownum(), RawExpr::int(k)))
        .into_stmt();
    fx.analyzer().analyze(&stmt, "", &[]).unwrap().limit_count
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_lock_merge_is_order_independent(
        requests in proptest::collection::vec(arb_lock_request(), 1..8),
    ) {
        let forward = apply_all(&requests);
        let mut reversed = requests.clone();
        reversed.reverse();
        let backward = apply_all(&reversed);

        prop_assert_eq!(forward.row_marks.len(), 1);
        prop_assert_eq!(&forward.row_marks, &backward.row_marks);
        prop_assert_eq!(forward.has_for_update, backward.has_for_update);

        let mark = &forward.row_marks[0];
        let strongest = requests.iter().map(|r| r.0).max().unwrap();
        prop_assert_eq!(mark.strength, strongest);
        prop_assert_eq!(mark.no_wait, requests.iter().any(|r| r.1));
        prop_assert_eq!(mark.pushed_down, requests.iter().all(|r| r.2));
        prop_assert_eq!(forward.has_for_update, requests.iter().any(|r| !r.2));
    }

    #[test]
    fn prop_rownum_le_becomes_limit(k in 1i64..100_000) {
        prop_assert_eq!(rownum_limit("<=", k), Some(Expr::int8_const(k)));
    }

    #[test]
    fn prop_rownum_lt_becomes_limit_minus_one(k in 2i64..100_000) {
        prop_assert_eq!(rownum_limit("<", k), Some(Expr::int8_const(k - 1)));
    }

    #[test]
    fn prop_rownum_nonpositive_bound_is_empty(k in -1000i64..=0) {
        prop_assert_eq!(rownum_limit("<=", k), Some(Expr::int8_const(0)));
    }

    #[test]
    fn prop_star_vars_point_into_rtable(tables in proptest::collection::vec(0usize..3, 1..4)) {
        let fx = Fixture::new();
        let names = ["t1", "t2", "t3"];
        let mut stmt = SelectStmt::select(vec![ResTarget::expr(RawExpr::star())]);
        for (i, &t) in tables.iter().enumerate() {
            stmt = stmt.from(FromItem::table_as(names[t], &format!("x{i}")));
        }
        let q = fx.analyzer().analyze(&stmt.into_stmt(), "", &[]).unwrap();

        prop_assert_eq!(q.rtable.len(), tables.len());
        prop_assert_eq!(q.target_list.len(), tables.len() * 2);
        for (i, te) in q.target_list.iter().enumerate() {
            prop_assert_eq!(te.resno as usize, i + 1);
            let var = te.expr.as_var().unwrap();
            prop_assert_eq!(var.varlevelsup, 0);
            prop_assert!((1..=q.rtable.len()).contains(&var.varno));
            prop_assert!(var.varattno >= 1 && var.varattno <= 2);
        }
    }

    #[test]
    fn prop_override_search_path_never_leaks(grammar in arb_grammar(), valid in any::<bool>()) {
        let fx = Fixture::new();
        let column = if valid { "a" } else { "missing" };
        let stmt = select_cols(&[column], "t").into_stmt();
        let result = fx.analyzer().analyze_for_grammar(&stmt, "", &[], grammar);
        prop_assert_eq!(result.is_ok(), valid);
        prop_assert_eq!(fx.session.override_depth(), 0);
    }
}
