//! INSERT, UPDATE and DELETE.
//!
//! The target relation is opened with a write lock before anything else in
//! the statement is looked at, so that a source SELECT naming the same
//! table finds the stronger lock already held.

use tracing::debug;

use crate::analyze::agg::check_aggregates;
use crate::analyze::clause::{transform_from_clause, transform_where_clause};
use crate::analyze::collation::{assign_list_collations, assign_query_collations};
use crate::analyze::cte::cte_list;
use crate::analyze::parse_state::{ExprKind, ParseState};
use crate::analyze::relation::{
    add_range_table_entry_for_subquery, add_range_table_entry_for_values, add_rte_to_query, expand_rte,
    set_target_table,
};
use crate::analyze::select::transform_with_into;
use crate::analyze::target::{
    InsertColumn, check_insert_targets, count_rowexpr_columns, next_resno, transform_assigned_expr,
    transform_expression_list, transform_returning_list, transform_target_list, update_target_list_entry,
};
use crate::analyze::transform_select_family;
use crate::catalog::{Catalog, is_relation_child, types};
use crate::config::Grammar;
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::nodes::primnodes::{Expr, Var, contain_vars_of_level};
use crate::nodes::query::{AclMode, CmdType, FromExpr, JoinNode, Query, RangeTblEntry, RteKind, TargetEntry};
use crate::nodes::raw::{Alias, DeleteStmt, InsertStmt, RawStmt, ResTarget, SelectStmt, UpdateStmt, WithClause};
use crate::nodes::{AttrNumber, INVALID_OID, Index, Oid};

/// On an originating coordinator, a data-modifying statement whose WITH
/// inserts rows must ship its command id so remote scans do not see them.
fn check_with_insert_command_id(pstate: &ParseState<'_>, qry: &mut Query, with: &WithClause) {
    if !pstate.config().is_coordinator() || pstate.session().is_conn_from_coordinator() {
        return;
    }
    if with.ctes.iter().any(|c| matches!(c.query.as_ref(), RawStmt::Insert(_))) {
        debug!(command = ?qry.command_type, "WITH inserts rows; command id will be sent");
        qry.has_to_save_cmd_id = true;
        pstate.session().latch_send_command_id();
    }
}

/// True if some relation read by `rtable` (or by a sub-query in it) is an
/// inheritance ancestor of `child`.
fn reads_parent_of(catalog: &dyn Catalog, child: Oid, rtable: &[RangeTblEntry]) -> bool {
    rtable.iter().any(|rte| match &rte.kind {
        RteKind::Relation { relid, .. } => rte.inh && is_relation_child(catalog, child, *relid),
        RteKind::Subquery { subquery } => reads_parent_of(catalog, child, &subquery.rtable),
        _ => false,
    })
}

/// Hide the DML target from FROM / USING sub-queries while `f` runs.
fn with_target_lateral_hidden<T>(
    pstate: &mut ParseState<'_>,
    f: impl FnOnce(&mut ParseState<'_>) -> AnalyzeResult<T>,
) -> AnalyzeResult<T> {
    let slot = pstate.namespace.len().checked_sub(1);
    if let Some(item) = slot.and_then(|i| pstate.namespace.get_mut(i)) {
        item.lateral_only = true;
        item.lateral_ok = false;
    }
    let result = f(pstate);
    if let Some(item) = slot.and_then(|i| pstate.namespace.get_mut(i)) {
        item.lateral_only = false;
        item.lateral_ok = true;
    }
    result
}

// ── DELETE ─────────────────────────────────────────────────────────────────

pub(crate) fn transform_delete_stmt(pstate: &mut ParseState<'_>, stmt: &DeleteStmt) -> AnalyzeResult<Query> {
    let mut qry = Query::new(CmdType::Delete);

    if let Some(with) = &stmt.with_clause {
        check_with_insert_command_id(pstate, &mut qry, with);
    }
    transform_with_into(pstate, &mut qry, stmt.with_clause.as_ref())?;

    let result_relation = set_target_table(pstate, &stmt.relation, stmt.relation.inh, true, AclMode::DELETE)?;
    qry.result_relation = Some(result_relation);

    with_target_lateral_hidden(pstate, |ps| transform_from_clause(ps, &stmt.using_clause))?;

    let qual = transform_where_clause(pstate, stmt.where_clause.as_ref(), ExprKind::Where, "WHERE")?;
    qry.returning_list = transform_returning_list(pstate, &stmt.returning_list)?;

    qry.rtable = pstate.rtable.clone();
    qry.jointree = Some(FromExpr {
        fromlist: pstate.joinlist.clone(),
        quals: qual,
    });
    qry.has_sub_links = pstate.has_sub_links;
    qry.has_window_funcs = pstate.has_window_funcs;
    qry.has_aggs = pstate.has_aggs;
    if qry.has_aggs {
        check_aggregates(pstate.catalog(), &qry)?;
    }
    qry.cte_list = cte_list(pstate);
    assign_query_collations(pstate, &mut qry)?;
    Ok(qry)
}

// ── INSERT ─────────────────────────────────────────────────────────────────

/// VALUES with ORDER BY, LIMIT, FOR UPDATE or WITH attached is analyzed
/// as an ordinary SELECT.
fn is_general_select(select: &SelectStmt) -> bool {
    select.values_lists.is_empty()
        || !select.sort_clause.is_empty()
        || select.limit_offset.is_some()
        || select.limit_count.is_some()
        || !select.locking_clause.is_empty()
        || select.with_clause.is_some()
}

pub(crate) fn transform_insert_stmt(pstate: &mut ParseState<'_>, stmt: &InsertStmt) -> AnalyzeResult<Query> {
    let mut qry = Query::new(CmdType::Insert);
    pstate.is_insert = true;
    transform_with_into(pstate, &mut qry, stmt.with_clause.as_ref())?;

    let select = stmt.select.as_deref();
    let general = select.is_some_and(is_general_select);

    // The source SELECT gets whatever range table this level already has;
    // the INSERT's own starts with the target.
    let (sub_rtable, sub_namespace) = if general {
        (std::mem::take(&mut pstate.rtable), std::mem::take(&mut pstate.namespace))
    } else {
        (Vec::new(), Vec::new())
    };

    let result_relation = set_target_table(pstate, &stmt.relation, false, false, AclMode::INSERT)?;
    qry.result_relation = Some(result_relation);
    if pstate.grammar() == Grammar::Oracle {
        add_rte_to_query(pstate, result_relation, false, true, true);
    }

    let icolumns = check_insert_targets(pstate, &stmt.cols)?;

    let exprs = match select {
        None => Vec::new(),
        Some(select) if general => {
            let select_query = {
                let mut sub = pstate.child();
                sub.rtable = sub_rtable;
                sub.namespace = sub_namespace;
                transform_select_family(&mut sub, select)?
            };
            if select_query.command_type != CmdType::Select || select_query.utility_stmt.is_some() {
                return Err(AnalyzeError::internal("unexpected non-SELECT command in INSERT ... SELECT"));
            }

            if pstate.config().is_coordinator() && !pstate.session().is_conn_from_coordinator() {
                let target = pstate.rte(result_relation)?.relid();
                if let Some(target) = target {
                    if reads_parent_of(pstate.catalog(), target, &select_query.rtable) {
                        debug!("INSERT target inherits from a relation the SELECT reads; command id will be sent");
                        qry.has_to_save_cmd_id = true;
                        pstate.session().latch_send_command_id();
                    }
                }
            }

            let rtindex = add_range_table_entry_for_subquery(pstate, select_query, Alias::new("*SELECT*"), false, false)?;
            pstate.joinlist.push(JoinNode::RangeTblRef(rtindex));
            let exprs = select_output_exprs(pstate, rtindex)?;
            transform_insert_row(pstate, exprs, &stmt.cols, &icolumns)?
        }
        Some(select) if select.values_lists.len() > 1 => {
            let mut rows: Vec<Vec<Expr>> = Vec::with_capacity(select.values_lists.len());
            let mut width: Option<usize> = None;
            for raw_row in &select.values_lists {
                let row = transform_expression_list(pstate, raw_row, ExprKind::Values)?;
                match width {
                    None => width = Some(row.len()),
                    Some(w) if w != row.len() => {
                        return Err(AnalyzeError::syntax("VALUES lists must all be the same length")
                            .at(row.first().and_then(Expr::location)));
                    }
                    Some(_) => {}
                }
                let mut row = transform_insert_row(pstate, row, &stmt.cols, &icolumns)?;
                assign_list_collations(pstate, &mut row)?;
                rows.push(row);
            }
            let width = width.unwrap_or(0);
            let lateral = pstate.rtable.len() != 1 && rows.iter().flatten().any(|e| contain_vars_of_level(e, 0));
            let rtindex = add_range_table_entry_for_values(pstate, rows, vec![INVALID_OID; width], None, lateral, true)?;
            pstate.joinlist.push(JoinNode::RangeTblRef(rtindex));
            expand_rte(pstate, rtindex, 0, None)?.into_iter().map(|(_, var)| var).collect()
        }
        Some(select) => {
            let Some(raw_row) = select.values_lists.first() else {
                return Err(AnalyzeError::internal("INSERT ... VALUES without a row"));
            };
            let row = transform_expression_list(pstate, raw_row, ExprKind::ValuesSingle)?;
            transform_insert_row(pstate, row, &stmt.cols, &icolumns)?
        }
    };

    let modified: Vec<AttrNumber> = icolumns.iter().take(exprs.len()).map(|c| c.attnum).collect();
    qry.target_list = exprs
        .into_iter()
        .zip(&icolumns)
        .map(|(expr, col)| TargetEntry::new(expr, col.attnum, Some(col.name.clone()), false))
        .collect();
    pstate.rte_mut(result_relation)?.modified_cols.extend(modified);

    if !stmt.returning_list.is_empty() {
        pstate.namespace.clear();
        add_rte_to_query(pstate, result_relation, false, true, true);
        qry.returning_list = transform_returning_list(pstate, &stmt.returning_list)?;
    }

    qry.rtable = pstate.rtable.clone();
    qry.jointree = Some(FromExpr {
        fromlist: pstate.joinlist.clone(),
        quals: None,
    });
    qry.has_sub_links = pstate.has_sub_links;
    qry.cte_list = cte_list(pstate);
    assign_query_collations(pstate, &mut qry)?;
    Ok(qry)
}

/// The INSERT's view of a source SELECT's output. Unknown-typed literals
/// and parameters are copied up as they are so that assignment coercion
/// can still type them; everything else becomes a `Var` on the sub-query.
fn select_output_exprs(pstate: &ParseState<'_>, rtindex: Index) -> AnalyzeResult<Vec<Expr>> {
    let sub = pstate
        .rte(rtindex)?
        .subquery()
        .ok_or_else(|| AnalyzeError::internal("INSERT source is not a sub-query"))?;
    Ok(sub
        .target_list
        .iter()
        .filter(|t| !t.resjunk)
        .map(|tle| {
            let unknown_leaf =
                matches!(tle.expr, Expr::Const(_) | Expr::Param(_)) && tle.expr.type_oid() == types::UNKNOWN;
            if unknown_leaf {
                tle.expr.clone()
            } else {
                let mut var = Var::new(
                    rtindex,
                    tle.resno,
                    tle.expr.type_oid(),
                    tle.expr.typmod(),
                    tle.expr.collation(),
                );
                var.location = tle.expr.location();
                Expr::Var(var)
            }
        })
        .collect())
}

/// Check the arity of one INSERT row and coerce each value to its column.
fn transform_insert_row(
    pstate: &ParseState<'_>,
    exprs: Vec<Expr>,
    stmt_cols: &[ResTarget],
    icolumns: &[InsertColumn],
) -> AnalyzeResult<Vec<Expr>> {
    if exprs.len() > icolumns.len() {
        return Err(AnalyzeError::syntax("INSERT has more expressions than target columns")
            .at(exprs.get(icolumns.len()).and_then(Expr::location)));
    }
    // Fewer values than columns is fine when the columns are implicit: the
    // rest take their defaults.
    if !stmt_cols.is_empty() && exprs.len() < icolumns.len() {
        let mut err = AnalyzeError::syntax("INSERT has more target columns than expressions");
        if exprs.len() == 1 && count_rowexpr_columns(pstate, &exprs[0]) == Some(icolumns.len()) {
            err = err.with_hint(
                "The insertion source is a row expression containing the same number of columns expected by the INSERT. Did you accidentally use extra parentheses?",
            );
        }
        return Err(err.at(icolumns.get(exprs.len()).and_then(|c| c.location)));
    }

    exprs
        .into_iter()
        .zip(icolumns)
        .map(|(expr, col)| transform_assigned_expr(pstate, expr, &col.name, col.attnum, &col.indirection, col.location))
        .collect()
}

// ── UPDATE ─────────────────────────────────────────────────────────────────

pub(crate) fn transform_update_stmt(pstate: &mut ParseState<'_>, stmt: &UpdateStmt) -> AnalyzeResult<Query> {
    let mut qry = Query::new(CmdType::Update);
    pstate.is_update = true;

    if let Some(with) = &stmt.with_clause {
        check_with_insert_command_id(pstate, &mut qry, with);
    }
    transform_with_into(pstate, &mut qry, stmt.with_clause.as_ref())?;

    let result_relation = set_target_table(pstate, &stmt.relation, stmt.relation.inh, true, AclMode::UPDATE)?;
    qry.result_relation = Some(result_relation);

    with_target_lateral_hidden(pstate, |ps| transform_from_clause(ps, &stmt.from_clause))?;

    qry.target_list = transform_target_list(pstate, &stmt.target_list, ExprKind::UpdateSource)?;
    let qual = transform_where_clause(pstate, stmt.where_clause.as_ref(), ExprKind::Where, "WHERE")?;
    qry.returning_list = transform_returning_list(pstate, &stmt.returning_list)?;

    // Resjunk entries are renumbered past the target's columns so that no
    // resno can be mistaken for an attribute number.
    let (natts, relname) = match &pstate.target_relation {
        Some(rel) => (rel.natts(), rel.name.clone()),
        None => return Err(AnalyzeError::internal("UPDATE without a target relation")),
    };
    let first_junk = AttrNumber::try_from(natts + 1)
        .map_err(|_| AnalyzeError::statement_too_complex("target relation has too many columns"))?;
    if pstate.next_resno < first_junk {
        pstate.next_resno = first_junk;
    }

    let mut orig_targets = stmt.target_list.iter();
    let mut modified = Vec::with_capacity(stmt.target_list.len());
    for tle in &mut qry.target_list {
        if tle.resjunk {
            tle.resno = next_resno(pstate)?;
            tle.resname = None;
            continue;
        }
        let orig = orig_targets
            .next()
            .ok_or_else(|| AnalyzeError::internal("UPDATE target count mismatch --- internal error"))?;
        let name = orig
            .name
            .as_deref()
            .ok_or_else(|| AnalyzeError::internal("UPDATE SET item without a column name"))?;
        let attrno = pstate
            .target_relation
            .as_ref()
            .and_then(|rel| rel.column(name))
            .map(|c| c.attnum)
            .ok_or_else(|| {
                AnalyzeError::undefined_column(format!("column \"{name}\" of relation \"{relname}\" does not exist"))
                    .at(orig.location)
            })?;
        update_target_list_entry(pstate, tle, name, attrno, &orig.indirection, orig.location)?;
        modified.push(attrno);
    }
    if orig_targets.next().is_some() {
        return Err(AnalyzeError::internal("UPDATE target count mismatch --- internal error"));
    }
    pstate.rte_mut(result_relation)?.modified_cols.extend(modified);

    qry.rtable = pstate.rtable.clone();
    qry.jointree = Some(FromExpr {
        fromlist: pstate.joinlist.clone(),
        quals: qual,
    });
    qry.has_sub_links = pstate.has_sub_links;
    qry.cte_list = cte_list(pstate);
    assign_query_collations(pstate, &mut qry)?;
    Ok(qry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::AnalyzeEnv;
    use crate::analyze::parse_state::ParamTypes;
    use crate::catalog::{LockMode, MemoryCatalog};
    use crate::config::AnalyzerConfig;
    use crate::nodes::raw::{FromItem, RawCte, RawExpr};
    use crate::session::Session;

    fn catalog() -> MemoryCatalog {
        let mut cat = MemoryCatalog::new();
        cat.add_table("t", &[("a", types::INT4), ("b", types::TEXT), ("c", types::INT8)]);
        cat.add_table("s", &[("x", types::INT4)]);
        cat
    }

    fn run(cat: &MemoryCatalog, grammar: Grammar, stmt: &RawStmt) -> AnalyzeResult<Query> {
        let config = AnalyzerConfig::default();
        let session = Session::default();
        let env = AnalyzeEnv::new(cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), grammar);
        match stmt {
            RawStmt::Insert(s) => transform_insert_stmt(&mut ps, s),
            RawStmt::Update(s) => transform_update_stmt(&mut ps, s),
            RawStmt::Delete(s) => transform_delete_stmt(&mut ps, s),
            other => panic!("not DML: {other:?}"),
        }
    }

    #[test]
    fn test_insert_select_locks_target_first() {
        let cat = catalog();
        let select = SelectStmt::select(vec![ResTarget::expr(RawExpr::star())]).from(FromItem::table("t"));
        let q = run(&cat, Grammar::Postgres, &InsertStmt::new("t", Some(select)).into_stmt()).unwrap();
        let modes: Vec<LockMode> = cat.acquired_locks().iter().map(|l| l.mode).collect();
        assert_eq!(modes, [LockMode::RowExclusive, LockMode::AccessShare]);

        assert_eq!(q.result_relation, Some(1));
        assert_eq!(q.rtable[1].eref.aliasname, "*SELECT*");
        assert_eq!(q.jointree.as_ref().unwrap().fromlist, vec![JoinNode::RangeTblRef(2)]);
        assert_eq!(q.target_list.iter().map(|t| t.resno).collect::<Vec<_>>(), [1, 2, 3]);
        assert!(matches!(&q.target_list[0].expr, Expr::Var(v) if v.varno == 2 && v.varattno == 1));
        assert_eq!(q.rtable[0].modified_cols.iter().copied().collect::<Vec<_>>(), [1, 2, 3]);
        assert!(q.rtable[0].required_perms.contains(AclMode::INSERT));
    }

    #[test]
    fn test_insert_select_keeps_unknown_literal() {
        let cat = catalog();
        let select = SelectStmt::select(vec![ResTarget::expr(RawExpr::string("7"))]);
        let stmt = InsertStmt::new("t", Some(select)).columns(&["a"]).into_stmt();
        let q = run(&cat, Grammar::Postgres, &stmt).unwrap();
        assert!(matches!(&q.target_list[0].expr, Expr::Const(c) if c.consttype == types::INT4));
    }

    #[test]
    fn test_insert_single_values_row() {
        let cat = catalog();
        let values = SelectStmt::values(vec![vec![RawExpr::int(1), RawExpr::default_value()]]);
        let q = run(&cat, Grammar::Postgres, &InsertStmt::new("t", Some(values)).into_stmt()).unwrap();
        assert_eq!(q.rtable.len(), 1);
        assert_eq!(q.target_list.len(), 2);
        assert!(matches!(&q.target_list[1].expr, Expr::SetToDefault(d) if d.type_id == types::TEXT));
        assert_eq!(q.rtable[0].modified_cols.len(), 2);
    }

    #[test]
    fn test_insert_multi_values_row() {
        let cat = catalog();
        let values = SelectStmt::values(vec![
            vec![RawExpr::int(1), RawExpr::string("x")],
            vec![RawExpr::int(2), RawExpr::null()],
        ]);
        let q = run(&cat, Grammar::Postgres, &InsertStmt::new("t", Some(values)).columns(&["a", "b"]).into_stmt())
            .unwrap();
        let RteKind::Values { coltypes, values_lists, .. } = &q.rtable[1].kind else {
            panic!("expected a VALUES entry");
        };
        assert_eq!(coltypes, &[types::INT4, types::TEXT]);
        assert_eq!(values_lists.len(), 2);
        assert!(!q.rtable[1].lateral);
        assert!(matches!(&q.target_list[0].expr, Expr::Var(v) if v.varno == 2));
    }

    #[test]
    fn test_insert_arity_errors() {
        let cat = catalog();
        let too_many = SelectStmt::values(vec![vec![RawExpr::int(1), RawExpr::int(2)]]);
        let err = run(&cat, Grammar::Postgres, &InsertStmt::new("t", Some(too_many)).columns(&["a"]).into_stmt())
            .unwrap_err();
        assert_eq!(err.message(), "INSERT has more expressions than target columns");

        let row = SelectStmt::select(vec![ResTarget::expr(RawExpr::row(vec![RawExpr::int(1), RawExpr::int(2)]))]);
        let err = run(&cat, Grammar::Postgres, &InsertStmt::new("t", Some(row)).columns(&["a", "c"]).into_stmt())
            .unwrap_err();
        assert_eq!(err.message(), "INSERT has more target columns than expressions");
        assert!(err.diagnostic().and_then(|d| d.hint.as_deref()).is_some_and(|h| h.contains("extra parentheses")));
    }

    #[test]
    fn test_insert_returning_sees_target() {
        let cat = catalog();
        let values = SelectStmt::values(vec![vec![RawExpr::int(1)]]);
        let stmt = InsertStmt::new("t", Some(values))
            .returning(vec![ResTarget::expr(RawExpr::col("a"))])
            .into_stmt();
        let q = run(&cat, Grammar::Postgres, &stmt).unwrap();
        assert_eq!(q.returning_list.len(), 1);
        assert_eq!(q.returning_list[0].resno, 1);
    }

    #[test]
    fn test_update_binds_columns_and_renumbers_junk() {
        let cat = catalog();
        let stmt = UpdateStmt::new("t", vec![ResTarget::named(RawExpr::int(5), "c")])
            .filter(RawExpr::op("=", RawExpr::col("a"), RawExpr::int(1)))
            .into_stmt();
        let q = run(&cat, Grammar::Postgres, &stmt).unwrap();
        assert_eq!(q.target_list.len(), 1);
        assert_eq!(q.target_list[0].resno, 3);
        assert_eq!(q.target_list[0].expr.type_oid(), types::INT8);
        assert_eq!(q.rtable[0].modified_cols.iter().copied().collect::<Vec<_>>(), [3]);
        assert!(q.quals().is_some());
        assert!(q.jointree.as_ref().unwrap().fromlist.is_empty());
    }

    #[test]
    fn test_update_unknown_and_system_columns() {
        let cat = catalog();
        let err = run(&cat, Grammar::Postgres, &UpdateStmt::new("t", vec![ResTarget::named(RawExpr::int(1), "zz")]).into_stmt())
            .unwrap_err();
        assert_eq!(err.message(), "column \"zz\" of relation \"t\" does not exist");
        assert_eq!(err.sqlstate(), "42703");

        let err = run(&cat, Grammar::Postgres, &UpdateStmt::new("t", vec![ResTarget::named(RawExpr::int(1), "ctid")]).into_stmt())
            .unwrap_err();
        assert_eq!(err.message(), "cannot assign to system column \"ctid\"");
    }

    #[test]
    fn test_delete_using_cannot_see_target_laterally() {
        let cat = catalog();
        let q = run(
            &cat,
            Grammar::Postgres,
            &DeleteStmt::new("t")
                .using(FromItem::table("s"))
                .filter(RawExpr::op("=", RawExpr::col("a"), RawExpr::col("x")))
                .into_stmt(),
        )
        .unwrap();
        assert_eq!(q.result_relation, Some(1));
        assert_eq!(q.jointree.as_ref().unwrap().fromlist, vec![JoinNode::RangeTblRef(2)]);
        assert!(q.rtable[0].required_perms.contains(AclMode::DELETE));

        let lateral = SelectStmt::select(vec![ResTarget::expr(RawExpr::col("t.a"))]);
        let err = run(
            &cat,
            Grammar::Postgres,
            &DeleteStmt::new("t").using(FromItem::lateral(lateral, "q")).into_stmt(),
        )
        .unwrap_err();
        assert!(err.message().contains("invalid reference to FROM-clause entry for table \"t\""));
    }

    #[test]
    fn test_with_insert_latches_command_id() {
        let cat = catalog();
        let config = AnalyzerConfig::default();
        let session = Session::default();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        let ins = InsertStmt::new("s", Some(SelectStmt::values(vec![vec![RawExpr::int(1)]]))).into_stmt();
        let mut stmt = DeleteStmt::new("t");
        stmt.with_clause = Some(WithClause::new(false, vec![RawCte::new("w", ins)]));
        let q = transform_delete_stmt(&mut ps, &stmt).unwrap();
        assert!(q.has_to_save_cmd_id);
        assert!(q.has_modifying_cte);
        assert!(session.send_command_id());
    }
}
