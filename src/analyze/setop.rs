//! UNION / INTERSECT / EXCEPT.
//!
//! Each leaf SELECT is analyzed as its own sub-query and installed in the
//! range table; the set-operation tree refers to the leaves by index. The
//! outer query's target list is a row of `Var`s over the leftmost leaf,
//! typed with the columns the root operation resolved.

use tracing::trace;

use crate::analyze::clause::{transform_limit_clause, transform_sort_clause};
use crate::analyze::coerce::{coerce_to_common_type, select_common_type};
use crate::analyze::collation::{assign_query_collations, select_common_collation};
use crate::analyze::cte::{cte_list, determine_recursive_col_types};
use crate::analyze::parse_state::{ExprKind, NamespaceItem, ParseState};
use crate::analyze::relation::{add_range_table_entry_for_join, add_range_table_entry_for_subquery};
use crate::analyze::select::transform_with_into;
use crate::analyze::sub_analyze_select;
use crate::catalog::types;
use crate::error::{AnalyzeError, AnalyzeResult, Location};
use crate::nodes::primnodes::{Expr, SetToDefault, Var};
use crate::nodes::query::{CmdType, FromExpr, JoinType, Query, SetOpNode, SetOperation, SortGroupClause, TargetEntry};
use crate::nodes::raw::{Alias, SelectStmt, SetOpKind};
use crate::nodes::{AttrNumber, Index};

/// One output column of a set-operation subtree as seen by its parent.
struct SetOpColumn {
    expr: Expr,
    /// `(rtindex, target-list position)` when the column comes straight
    /// from a leaf, so an unknown-typed literal there can be resolved.
    origin: Option<(Index, usize)>,
}

fn leftmost_select(stmt: &SelectStmt) -> &SelectStmt {
    let mut node = stmt;
    while node.op != SetOpKind::None {
        match node.larg.as_deref() {
            Some(l) => node = l,
            None => break,
        }
    }
    node
}

/// Transform a set-operation statement into its outer query.
pub(crate) fn transform_set_operation_stmt(pstate: &mut ParseState<'_>, stmt: &SelectStmt) -> AnalyzeResult<Query> {
    let mut qry = Query::new(CmdType::Select);

    if let Some(into) = &leftmost_select(stmt).into_clause {
        return Err(AnalyzeError::syntax("SELECT ... INTO is not allowed here").at(into.rel.location));
    }
    if let Some(lc) = stmt.locking_clause.first() {
        return Err(AnalyzeError::feature_not_supported(format!(
            "{} is not allowed with UNION/INTERSECT/EXCEPT",
            lc.strength
        )));
    }
    transform_with_into(pstate, &mut qry, stmt.with_clause.as_ref())?;

    // The outer ORDER BY / LIMIT / WITH belong to this level, not to the
    // root operation node.
    let mut tree = stmt.clone();
    tree.sort_clause.clear();
    tree.limit_offset = None;
    tree.limit_count = None;
    tree.with_clause = None;

    let (root, _) = transform_set_operation_tree(pstate, &tree, true, 0)?;
    let SetOpNode::Op(root_op) = &root else {
        return Err(AnalyzeError::internal("set operation tree has no operator at its root"));
    };

    let leftmost_rti = root.leftmost();
    let leftmost_query = pstate
        .rte(leftmost_rti)?
        .subquery()
        .ok_or_else(|| AnalyzeError::internal("leftmost set operation member is not a sub-query"))?;
    let left_tlist: Vec<&TargetEntry> = leftmost_query.target_list.iter().filter(|t| !t.resjunk).collect();

    let mut columns = Vec::with_capacity(root_op.col_types.len());
    for (i, lefttle) in left_tlist.iter().enumerate() {
        let (Some(&coltype), Some(&coltypmod), Some(&colcoll)) =
            (root_op.col_types.get(i), root_op.col_typmods.get(i), root_op.col_collations.get(i))
        else {
            break;
        };
        let mut var = Var::new(leftmost_rti, lefttle.resno, coltype, coltypmod, colcoll);
        var.location = lefttle.expr.location();
        columns.push((lefttle.resname.clone().unwrap_or_default(), Expr::Var(var)));
    }
    for (name, var) in &columns {
        let resno = crate::analyze::target::next_resno(pstate)?;
        qry.target_list.push(TargetEntry::new(var.clone(), resno, Some(name.clone()), false));
    }

    // ORDER BY may name output columns; expose them through a throw-away
    // join entry visible for column names only.
    let saved_rtable_len = pstate.rtable.len();
    let (names, vars): (Vec<String>, Vec<Expr>) = columns.into_iter().unzip();
    let jrte = add_range_table_entry_for_join(pstate, names, JoinType::Inner, vars, None, false)?;
    let saved_namespace = std::mem::replace(&mut pstate.namespace, vec![NamespaceItem::new(jrte, false, true)]);
    let tllen = qry.target_list.len();
    let sorted = transform_sort_clause(pstate, &stmt.sort_clause, &mut qry.target_list, ExprKind::OrderBy, false);
    pstate.namespace = saved_namespace;
    pstate.rtable.truncate(saved_rtable_len);
    qry.sort_clause = sorted?;
    if qry.target_list.len() != tllen {
        return Err(AnalyzeError::feature_not_supported("invalid UNION/INTERSECT/EXCEPT ORDER BY clause")
            .with_detail("Only result column names can be used, not expressions or functions.")
            .with_hint("Add the expression/function to every SELECT, or move the UNION into a FROM clause.")
            .at(qry.target_list[tllen].expr.location()));
    }

    qry.limit_offset = transform_limit_clause(pstate, stmt.limit_offset.as_ref(), ExprKind::Offset)?;
    qry.limit_count = transform_limit_clause(pstate, stmt.limit_count.as_ref(), ExprKind::Limit)?;

    qry.set_operations = Some(root);
    qry.rtable = pstate.rtable.clone();
    qry.jointree = Some(FromExpr::default());
    qry.has_sub_links = pstate.has_sub_links;
    qry.has_window_funcs = pstate.has_window_funcs;
    qry.has_aggs = pstate.has_aggs;
    qry.cte_list = cte_list(pstate);
    assign_query_collations(pstate, &mut qry)?;
    trace!(members = qry.rtable.len(), "set operation analyzed");
    Ok(qry)
}

fn is_leaf(stmt: &SelectStmt) -> bool {
    stmt.op == SetOpKind::None
        || !stmt.sort_clause.is_empty()
        || stmt.limit_offset.is_some()
        || stmt.limit_count.is_some()
        || !stmt.locking_clause.is_empty()
        || stmt.with_clause.is_some()
}

/// Build the operation tree below `stmt`. Returns the node and its output
/// columns.
fn transform_set_operation_tree(
    pstate: &mut ParseState<'_>,
    stmt: &SelectStmt,
    is_top_level: bool,
    depth: usize,
) -> AnalyzeResult<(SetOpNode, Vec<SetOpColumn>)> {
    let max_depth = pstate.config().max_set_op_depth;
    if depth > max_depth {
        return Err(AnalyzeError::statement_too_complex("stack depth limit exceeded")
            .with_hint(format!("Set operations may nest at most {max_depth} levels deep.")));
    }

    if let Some(into) = &stmt.into_clause {
        return Err(
            AnalyzeError::syntax("INTO is only allowed on first SELECT of UNION/INTERSECT/EXCEPT").at(into.rel.location)
        );
    }
    if let Some(lc) = stmt.locking_clause.first() {
        return Err(AnalyzeError::feature_not_supported(format!(
            "{} is not allowed with UNION/INTERSECT/EXCEPT",
            lc.strength
        )));
    }

    if is_leaf(stmt) {
        let query = sub_analyze_select(stmt, pstate, None, false)?;
        if !pstate.namespace.is_empty() {
            let mut location: Location = None;
            let refers = query.any_expr_with_depth(0, &mut |e, depth| match e {
                Expr::Var(v) if v.varlevelsup == depth + 1 => {
                    location = v.location;
                    true
                }
                _ => false,
            });
            if refers {
                return Err(AnalyzeError::invalid_column_reference(
                    "UNION/INTERSECT/EXCEPT member statement cannot refer to other relations of same query level",
                )
                .at(location));
            }
        }
        let name = format!("*SELECT* {}", pstate.rtable.len() + 1);
        let outputs: Vec<(usize, Expr)> = query
            .target_list
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.resjunk)
            .map(|(i, t)| (i, t.expr.clone()))
            .collect();
        let rtindex = add_range_table_entry_for_subquery(pstate, query, Alias::new(name), false, false)?;
        let columns = outputs
            .into_iter()
            .map(|(i, expr)| SetOpColumn {
                expr,
                origin: Some((rtindex, i)),
            })
            .collect();
        return Ok((SetOpNode::Leaf(rtindex), columns));
    }

    let (Some(lstmt), Some(rstmt)) = (stmt.larg.as_deref(), stmt.rarg.as_deref()) else {
        return Err(AnalyzeError::internal("set operation is missing an argument"));
    };
    let context = stmt.op.as_str();

    let (larg, lcols) = transform_set_operation_tree(pstate, lstmt, false, depth + 1)?;
    let recursive_parent = pstate.parent_cte.as_ref().is_some_and(|c| c.borrow().cterecursive);
    if is_top_level && recursive_parent {
        let nrtargetlist: Vec<TargetEntry> = leaf_target_list(pstate, &larg, &lcols)?;
        determine_recursive_col_types(pstate, &nrtargetlist)?;
    }
    let (rarg, rcols) = transform_set_operation_tree(pstate, rstmt, false, depth + 1)?;

    if lcols.len() != rcols.len() {
        let location = rcols.first().and_then(|c| c.expr.location());
        return Err(AnalyzeError::syntax(format!("each {context} query must have the same number of columns")).at(location));
    }

    let union_all = stmt.op == SetOpKind::Union && stmt.all;
    let mut op = SetOperation {
        op: stmt.op,
        all: stmt.all,
        larg,
        rarg,
        col_types: Vec::with_capacity(lcols.len()),
        col_typmods: Vec::with_capacity(lcols.len()),
        col_collations: Vec::with_capacity(lcols.len()),
        group_clauses: Vec::new(),
    };
    let mut out = Vec::with_capacity(lcols.len());
    for (lcol, rcol) in lcols.into_iter().zip(rcols) {
        let rescoltype = select_common_type(pstate, &[&lcol.expr, &rcol.expr], context)?;
        let best_location = [&lcol.expr, &rcol.expr]
            .into_iter()
            .find(|e| e.type_oid() == rescoltype)
            .and_then(Expr::location)
            .or(lcol.expr.location());
        let rescoltypmod = if lcol.expr.type_oid() == rcol.expr.type_oid() && lcol.expr.typmod() == rcol.expr.typmod() {
            lcol.expr.typmod()
        } else {
            -1
        };

        let lnode = coerce_member(pstate, lcol, rescoltype, context)?;
        let rnode = coerce_member(pstate, rcol, rescoltype, context)?;
        // UNION ALL tolerates a collation conflict; the column then has
        // no collation.
        let rescolcoll = select_common_collation(&[&lnode, &rnode], union_all)?;

        op.col_types.push(rescoltype);
        op.col_typmods.push(rescoltypmod);
        op.col_collations.push(rescolcoll);

        if !union_all {
            let ops = pstate
                .catalog()
                .get_sort_group_operators(rescoltype, false, true, false)
                .map_err(|e| e.at(best_location))?;
            op.group_clauses.push(SortGroupClause {
                tle_sort_group_ref: 0,
                eqop: ops.eq_op,
                sortop: ops.lt_op,
                nulls_first: false,
                hashable: ops.hashable,
            });
        }

        out.push(SetOpColumn {
            expr: Expr::SetToDefault(SetToDefault {
                type_id: rescoltype,
                typmod: rescoltypmod,
                collation: rescolcoll,
                location: best_location,
            }),
            origin: None,
        });
    }
    trace!(op = context, all = op.all, columns = op.col_types.len(), "set operation node");
    Ok((SetOpNode::Op(Box::new(op)), out))
}

/// Coerce one side of a column pair to the resolved type. An unknown
/// literal or parameter coming straight from a leaf is replaced in that
/// leaf's target list; anything else is only checked, never rewritten.
fn coerce_member(pstate: &mut ParseState<'_>, col: SetOpColumn, target: crate::nodes::Oid, context: &str) -> AnalyzeResult<Expr> {
    let is_unknown_leaf = col.expr.type_oid() == types::UNKNOWN && matches!(col.expr, Expr::Const(_) | Expr::Param(_));
    let coerced = coerce_to_common_type(pstate, col.expr, target, context)?;
    if is_unknown_leaf {
        if let Some((rtindex, pos)) = col.origin {
            let rte = pstate.rte_mut(rtindex)?;
            if let crate::nodes::query::RteKind::Subquery { subquery } = &mut rte.kind {
                if let Some(tle) = subquery.target_list.get_mut(pos) {
                    tle.expr = coerced.clone();
                }
            }
        }
    }
    Ok(coerced)
}

fn output_resno(position: usize) -> AnalyzeResult<AttrNumber> {
    AttrNumber::try_from(position + 1)
        .map_err(|_| AnalyzeError::statement_too_complex("set operation has too many columns"))
}

/// Target entries describing the output of `node`, named after its
/// leftmost leaf.
fn leaf_target_list(pstate: &ParseState<'_>, node: &SetOpNode, columns: &[SetOpColumn]) -> AnalyzeResult<Vec<TargetEntry>> {
    let leftmost = pstate
        .rte(node.leftmost())?
        .subquery()
        .ok_or_else(|| AnalyzeError::internal("leftmost set operation member is not a sub-query"))?;
    let names: Vec<Option<String>> = leftmost
        .target_list
        .iter()
        .filter(|t| !t.resjunk)
        .map(|t| t.resname.clone())
        .collect();
    columns
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let resno = output_resno(i)?;
            Ok(TargetEntry::new(c.expr.clone(), resno, names.get(i).cloned().flatten(), false))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::AnalyzeEnv;
    use crate::analyze::parse_state::ParamTypes;
    use crate::catalog::{MemoryCatalog, collations};
    use crate::config::{AnalyzerConfig, Grammar};
    use crate::nodes::query::RteKind;
    use crate::nodes::raw::{FromItem, LockingClause, RawExpr, ResTarget, SortBy};
    use crate::nodes::query::LockClauseStrength;
    use crate::session::Session;

    fn catalog() -> MemoryCatalog {
        let mut cat = MemoryCatalog::new();
        cat.add_table("t", &[("a", types::INT4), ("b", types::TEXT)]);
        cat.add_table("u", &[("x", types::INT8), ("y", types::TEXT)]);
        cat
    }

    fn run_with(config: AnalyzerConfig, stmt: &SelectStmt) -> AnalyzeResult<Query> {
        let cat = catalog();
        let session = Session::default();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        transform_set_operation_stmt(&mut ps, stmt)
    }

    fn run(stmt: &SelectStmt) -> AnalyzeResult<Query> {
        run_with(AnalyzerConfig::default(), stmt)
    }

    fn select(cols: &[&str], table: &str) -> SelectStmt {
        SelectStmt::select(cols.iter().map(|c| ResTarget::expr(RawExpr::col(c))).collect()).from(FromItem::table(table))
    }

    #[test]
    fn test_output_resno_overflow_is_an_error() {
        assert_eq!(output_resno(0).unwrap(), 1);
        assert_eq!(output_resno(i16::MAX as usize - 1).unwrap(), i16::MAX);
        let err = output_resno(i16::MAX as usize).unwrap_err();
        assert_eq!(err.sqlstate(), "54001");
        assert_eq!(err.message(), "set operation has too many columns");
    }

    #[test]
    fn test_union_resolves_common_types() {
        let stmt = SelectStmt::set_op(SetOpKind::Union, false, select(&["a", "b"], "t"), select(&["x", "y"], "u"))
            .order_by(vec![SortBy::asc(RawExpr::col("a"))]);
        let q = run(&stmt).unwrap();
        let Some(SetOpNode::Op(op)) = &q.set_operations else {
            panic!("expected an operation node");
        };
        assert_eq!(op.col_types, [types::INT8, types::TEXT]);
        assert_eq!(op.col_collations[1], collations::DEFAULT);
        assert_eq!(op.group_clauses.len(), 2);
        assert!(matches!(op.larg, SetOpNode::Leaf(1)));
        assert!(matches!(op.rarg, SetOpNode::Leaf(2)));

        // The ORDER BY scratch entry is gone again.
        assert_eq!(q.rtable.len(), 2);
        assert_eq!(q.rtable[0].eref.aliasname, "*SELECT* 1");
        assert!(matches!(q.rtable[0].kind, RteKind::Subquery { .. }));

        assert_eq!(q.target_list.len(), 2);
        assert_eq!(q.target_list[0].resname.as_deref(), Some("a"));
        assert_eq!(q.target_list[0].expr.type_oid(), types::INT8);
        assert_eq!(q.sort_clause.len(), 1);
        assert!(q.target_list.iter().all(|t| !t.resjunk));
    }

    #[test]
    fn test_union_all_has_no_group_clauses() {
        let stmt = SelectStmt::set_op(SetOpKind::Union, true, select(&["a"], "t"), select(&["x"], "u"));
        let q = run(&stmt).unwrap();
        let Some(SetOpNode::Op(op)) = &q.set_operations else {
            panic!("expected an operation node");
        };
        assert!(op.group_clauses.is_empty());
    }

    #[test]
    fn test_unknown_literal_resolved_in_leaf() {
        let lit = SelectStmt::select(vec![ResTarget::expr(RawExpr::string("z"))]);
        let stmt = SelectStmt::set_op(SetOpKind::Intersect, false, lit, select(&["b"], "t"));
        let q = run(&stmt).unwrap();
        let leaf = q.rtable[0].subquery().unwrap();
        assert_eq!(leaf.target_list[0].expr.type_oid(), types::TEXT);
    }

    #[test]
    fn test_column_count_mismatch() {
        let stmt = SelectStmt::set_op(SetOpKind::Except, false, select(&["a", "b"], "t"), select(&["x"], "u"));
        let err = run(&stmt).unwrap_err();
        assert_eq!(err.message(), "each EXCEPT query must have the same number of columns");
        assert_eq!(err.sqlstate(), "42601");
    }

    #[test]
    fn test_order_by_expression_rejected() {
        let stmt = SelectStmt::set_op(SetOpKind::Union, false, select(&["a"], "t"), select(&["a"], "t"))
            .order_by(vec![SortBy::asc(RawExpr::op("+", RawExpr::col("a"), RawExpr::int(1)))]);
        let err = run(&stmt).unwrap_err();
        assert_eq!(err.message(), "invalid UNION/INTERSECT/EXCEPT ORDER BY clause");
        assert_eq!(err.sqlstate(), "0A000");
        assert_eq!(
            err.diagnostic().and_then(|d| d.hint.as_deref()),
            Some("Add the expression/function to every SELECT, or move the UNION into a FROM clause.")
        );
    }

    #[test]
    fn test_into_and_locking_rejected() {
        let into_right = SelectStmt::set_op(
            SetOpKind::Union,
            false,
            select(&["a"], "t"),
            select(&["a"], "t").into_table("x"),
        );
        let err = run(&into_right).unwrap_err();
        assert_eq!(err.message(), "INTO is only allowed on first SELECT of UNION/INTERSECT/EXCEPT");

        let locked = SelectStmt::set_op(SetOpKind::Union, false, select(&["a"], "t"), select(&["a"], "t"))
            .lock(LockingClause::new(LockClauseStrength::ForUpdate));
        let err = run(&locked).unwrap_err();
        assert_eq!(err.message(), "FOR UPDATE is not allowed with UNION/INTERSECT/EXCEPT");
    }

    #[test]
    fn test_nesting_depth_limit() {
        let mut stmt = select(&["a"], "t");
        for _ in 0..4 {
            stmt = SelectStmt::set_op(SetOpKind::Union, true, stmt, select(&["a"], "t"));
        }
        let config = AnalyzerConfig {
            max_set_op_depth: 2,
            ..AnalyzerConfig::default()
        };
        let err = run_with(config, &stmt).unwrap_err();
        assert_eq!(err.sqlstate(), "54001");

        assert!(run(&stmt).is_ok());
    }
}
