//! Folding of `ROWNUM` bounds in WHERE into LIMIT.
//!
//! `WHERE rownum <= 10 AND x > 0` becomes `WHERE x > 0 LIMIT 10`. Only
//! conjuncts comparing ROWNUM with an integer literal are understood; if
//! any ROWNUM conjunct has another shape the query level is left alone.

use tracing::{debug, warn};

use crate::catalog::{Catalog, types};
use crate::nodes::primnodes::{ConstValue, Expr, contain_mutable_functions, contain_rownum};
use crate::nodes::query::Query;
use crate::nodes::INVALID_OID;

/// Value of a non-null INT2/INT4/INT8 literal.
fn const_get_int64(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Const(c) if matches!(c.consttype, types::INT2 | types::INT4 | types::INT8) => match c.value {
            ConstValue::Int(v) => Some(v),
            _ => None,
        },
        _ => None,
    }
}

/// What one ROWNUM conjunct turns into.
enum Bound {
    /// The conjunct always holds; drop it.
    Always,
    /// The query returns no rows at all.
    Empty,
    /// At most this many rows.
    Limit(i64),
}

/// Interpret one conjunct mentioning ROWNUM. `None` abandons the rewrite.
fn classify(catalog: &dyn Catalog, expr: &Expr) -> Option<Bound> {
    let (opno, args) = match expr {
        Expr::Op(o) => (o.opno, &o.args),
        Expr::Func(f) => (catalog.get_operator_for_function(f.funcid)?, &f.args),
        _ => return None,
    };
    let [l, r] = args.as_slice() else {
        return None;
    };
    let (opno, l, r) = match (l, r) {
        (Expr::Rownum(_), _) => (opno, l, r),
        // `10 > rownum` reads as `rownum < 10`.
        (_, Expr::Rownum(_)) => (catalog.get_commutator(opno).filter(|&c| c != INVALID_OID)?, r, l),
        _ => return None,
    };
    debug_assert!(matches!(l, Expr::Rownum(_)));
    let opname = catalog.get_opname(opno)?;

    match opname.as_str() {
        "<=" | "<" | "<>" => {
            if contain_mutable_functions(r, catalog) {
                return None;
            }
            let k = const_get_int64(r)?;
            match opname.as_str() {
                "<=" if k <= 0 => Some(Bound::Empty),
                "<=" => Some(Bound::Limit(k)),
                "<" if k <= 1 => Some(Bound::Empty),
                "<" => Some(Bound::Limit(k - 1)),
                _ if k <= 0 => Some(Bound::Always),
                _ => {
                    warn!(k, "treating ROWNUM <> {k} as LIMIT {}", k - 1);
                    Some(Bound::Limit(k - 1))
                }
            }
        }
        ">=" => (const_get_int64(r)? == 1).then_some(Bound::Always),
        ">" => (const_get_int64(r)? == 0).then_some(Bound::Always),
        "=" => matches!(r, Expr::Rownum(_)).then_some(Bound::Always),
        _ => None,
    }
}

/// Fold the ROWNUM bounds of one query level. Returns false, leaving the
/// query untouched, when the WHERE clause has a shape this cannot handle.
pub(crate) fn rewrite_rownum_query(catalog: &dyn Catalog, query: &mut Query) -> bool {
    if query.limit_offset.is_some() || query.limit_count.is_some() {
        return false;
    }
    let Some(jointree) = query.jointree.as_ref() else {
        return false;
    };
    let Some(quals) = jointree.quals.as_ref() else {
        return false;
    };
    if !contain_rownum(quals) {
        return false;
    }

    let conjuncts = quals.clone().into_conjuncts();
    let mut limit: Option<i64> = None;
    let mut empty = false;
    let mut kept = Vec::with_capacity(conjuncts.len());
    for conjunct in conjuncts {
        if !contain_rownum(&conjunct) {
            kept.push(conjunct);
            continue;
        }
        match classify(catalog, &conjunct) {
            None => {
                debug!("ROWNUM predicate not folded into LIMIT");
                return false;
            }
            Some(Bound::Always) => {}
            Some(Bound::Empty) => {
                empty = true;
                break;
            }
            Some(Bound::Limit(k)) => {
                if limit.is_some() {
                    debug!("several ROWNUM bounds; not folded into LIMIT");
                    return false;
                }
                limit = Some(k);
            }
        }
    }

    if empty {
        debug!("ROWNUM bound excludes every row");
        query.limit_count = Some(Expr::int8_const(0));
        kept.clear();
    } else {
        query.limit_count = limit.map(Expr::int8_const);
    }
    debug!(limit = ?query.limit_count.as_ref().and_then(const_get_int64), "ROWNUM folded into LIMIT");
    if let Some(jointree) = query.jointree.as_mut() {
        jointree.quals = Expr::and_of(kept);
    }
    true
}

/// Apply [`rewrite_rownum_query`] to `query` and every query below it.
pub(crate) fn rewrite_rownum_queries(catalog: &dyn Catalog, query: &mut Query) {
    query.walk_queries_mut(&mut |q| {
        rewrite_rownum_query(catalog, q);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::nodes::Oid;
    use crate::nodes::primnodes::{FuncExpr, OpExpr, RownumExpr, Var};
    use crate::nodes::query::{CmdType, FromExpr, JoinNode};

    fn int8_operator(catalog: &dyn Catalog, name: &str) -> Option<Oid> {
        catalog
            .operator_candidates(name)
            .into_iter()
            .find(|o| o.left == types::INT8 && o.right == types::INT8)
            .map(|o| o.oid)
    }

    fn rownum() -> Expr {
        Expr::Rownum(RownumExpr { location: None })
    }

    fn op(cat: &MemoryCatalog, name: &str, l: Expr, r: Expr) -> Expr {
        let opno = int8_operator(cat, name).unwrap();
        let info = cat.operator(opno).unwrap();
        Expr::Op(OpExpr {
            opno,
            opfuncid: info.funcid,
            opresulttype: info.result,
            opretset: false,
            opcollid: 0,
            inputcollid: 0,
            args: vec![l, r],
            location: None,
        })
    }

    fn x_positive(cat: &MemoryCatalog) -> Expr {
        op(cat, ">", Expr::Var(Var::new(1, 1, types::INT8, -1, 0)), Expr::int8_const(0))
    }

    fn query(quals: Vec<Expr>) -> Query {
        let mut q = Query::new(CmdType::Select);
        q.jointree = Some(FromExpr {
            fromlist: vec![JoinNode::RangeTblRef(1)],
            quals: Expr::and_of(quals),
        });
        q
    }

    fn quals(q: &Query) -> Option<&Expr> {
        q.jointree.as_ref().and_then(|j| j.quals.as_ref())
    }

    #[test]
    fn test_le_becomes_limit() {
        let cat = MemoryCatalog::new();
        let mut q = query(vec![op(&cat, "<=", rownum(), Expr::int8_const(10)), x_positive(&cat)]);
        assert!(rewrite_rownum_query(&cat, &mut q));
        assert_eq!(q.limit_count, Some(Expr::int8_const(10)));
        assert!(q.limit_offset.is_none());
        assert_eq!(quals(&q), Some(&x_positive(&cat)));
    }

    #[test]
    fn test_commuted_lt() {
        let cat = MemoryCatalog::new();
        let mut q = query(vec![op(&cat, ">", Expr::int8_const(5), rownum())]);
        assert!(rewrite_rownum_query(&cat, &mut q));
        assert_eq!(q.limit_count, Some(Expr::int8_const(4)));
        assert!(quals(&q).is_none());
    }

    #[test]
    fn test_function_form_resolves_to_operator() {
        let cat = MemoryCatalog::new();
        let le = cat.operator(int8_operator(&cat, "<=").unwrap()).unwrap();
        let call = Expr::Func(FuncExpr {
            funcid: le.funcid,
            funcresulttype: types::BOOL,
            funcretset: false,
            funccollid: 0,
            inputcollid: 0,
            args: vec![rownum(), Expr::int8_const(3)],
            location: None,
        });
        let mut q = query(vec![call]);
        assert!(rewrite_rownum_query(&cat, &mut q));
        assert_eq!(q.limit_count, Some(Expr::int8_const(3)));
    }

    #[test]
    fn test_empty_bounds_drop_everything() {
        let cat = MemoryCatalog::new();
        let mut q = query(vec![x_positive(&cat), op(&cat, "<", rownum(), Expr::int8_const(1))]);
        assert!(rewrite_rownum_query(&cat, &mut q));
        assert_eq!(q.limit_count, Some(Expr::int8_const(0)));
        assert!(quals(&q).is_none());
    }

    #[test]
    fn test_tautologies_are_dropped() {
        let cat = MemoryCatalog::new();
        let mut q = query(vec![
            op(&cat, ">=", rownum(), Expr::int8_const(1)),
            op(&cat, ">", rownum(), Expr::int8_const(0)),
            op(&cat, "=", rownum(), rownum()),
            x_positive(&cat),
        ]);
        assert!(rewrite_rownum_query(&cat, &mut q));
        assert!(q.limit_count.is_none());
        assert_eq!(quals(&q), Some(&x_positive(&cat)));
    }

    #[test]
    fn test_not_equal_is_approximated() {
        let cat = MemoryCatalog::new();
        let mut q = query(vec![op(&cat, "<>", rownum(), Expr::int8_const(4))]);
        assert!(rewrite_rownum_query(&cat, &mut q));
        assert_eq!(q.limit_count, Some(Expr::int8_const(3)));
    }

    #[test]
    fn test_unsupported_shapes_leave_query_alone() {
        let cat = MemoryCatalog::new();
        let cases = vec![
            // Lower bounds other than the trivial ones.
            vec![op(&cat, ">", rownum(), Expr::int8_const(5))],
            // Two bounds.
            vec![
                op(&cat, "<=", rownum(), Expr::int8_const(5)),
                op(&cat, "<", rownum(), Expr::int8_const(9)),
            ],
            // Non-constant bound.
            vec![op(&cat, "<=", rownum(), Expr::Var(Var::new(1, 1, types::INT8, -1, 0)))],
        ];
        for quals_in in cases {
            let mut q = query(quals_in);
            let before = q.clone();
            assert!(!rewrite_rownum_query(&cat, &mut q));
            assert_eq!(q, before);
        }

        let mut limited = query(vec![op(&cat, "<=", rownum(), Expr::int8_const(5))]);
        limited.limit_count = Some(Expr::int8_const(2));
        assert!(!rewrite_rownum_query(&cat, &mut limited));
    }

    #[test]
    fn test_rewrites_nested_levels() {
        use crate::nodes::query::{RangeTblEntry, RteKind};
        use crate::nodes::raw::Alias;

        let cat = MemoryCatalog::new();
        let inner = query(vec![op(&cat, "<=", rownum(), Expr::int8_const(2))]);
        let mut outer = query(vec![]);
        outer.rtable.push(RangeTblEntry::new(
            RteKind::Subquery {
                subquery: Box::new(inner),
            },
            None,
            Alias::new("s"),
        ));
        rewrite_rownum_queries(&cat, &mut outer);
        let inner = outer.rtable[0].subquery().unwrap();
        assert_eq!(inner.limit_count, Some(Expr::int8_const(2)));
    }
}
