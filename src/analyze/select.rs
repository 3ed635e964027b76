//! Plain SELECT and standalone VALUES.

use tracing::trace;

use crate::analyze::agg::check_aggregates;
use crate::analyze::clause::{
    transform_distinct_clause, transform_distinct_on_clause, transform_from_clause, transform_group_clause,
    transform_limit_clause, transform_sort_clause, transform_where_clause, transform_window_definitions,
};
use crate::analyze::coerce::{coerce_to_common_type, select_common_type};
use crate::analyze::collation::{assign_query_collations, select_common_collation};
use crate::analyze::cte::{cte_list, transform_with_clause};
use crate::analyze::locking::transform_locking_clause;
use crate::analyze::outer_join::transform_outer_join_markers;
use crate::analyze::parse_state::{ExprKind, ParseState};
use crate::analyze::relation::{add_range_table_entry_for_values, add_rte_to_query, expand_rte};
use crate::analyze::target::{mark_target_list_origins, next_resno, transform_expression_list, transform_target_list};
use crate::config::Grammar;
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::nodes::primnodes::{Expr, contain_vars_of_level};
use crate::nodes::query::{CmdType, FromExpr, Query, TargetEntry};
use crate::nodes::raw::{DistinctClause, SelectStmt, WithClause};

/// Process a WITH clause into `qry`'s flags; the items themselves stay in
/// the parse state until the query is finished.
pub(crate) fn transform_with_into(pstate: &mut ParseState<'_>, qry: &mut Query, with: Option<&WithClause>) -> AnalyzeResult<()> {
    if let Some(with) = with {
        qry.has_recursive = with.recursive;
        transform_with_clause(pstate, with)?;
        qry.has_modifying_cte = pstate.has_modifying_cte;
    }
    Ok(())
}

/// Transform a SELECT that is neither a set operation nor VALUES.
pub(crate) fn transform_select_stmt(pstate: &mut ParseState<'_>, stmt: &SelectStmt) -> AnalyzeResult<Query> {
    let mut qry = Query::new(CmdType::Select);
    transform_with_into(pstate, &mut qry, stmt.with_clause.as_ref())?;

    if let Some(into) = &stmt.into_clause {
        return Err(AnalyzeError::syntax("SELECT ... INTO is not allowed here").at(into.rel.location));
    }

    // FROM-clause sub-queries look at these.
    pstate.locking_clause = stmt.locking_clause.clone();
    pstate.window_defs = stmt.window_clause.clone();

    transform_from_clause(pstate, &stmt.from_clause)?;

    let (mut tlist, quals) = if pstate.grammar() == Grammar::Oracle {
        // The (+) rewrite reshapes the namespace, so `*` must expand after it.
        let quals = transform_where_clause(pstate, stmt.where_clause.as_ref(), ExprKind::Where, "WHERE")?;
        let quals = transform_outer_join_markers(pstate, quals)?;
        let tlist = transform_target_list(pstate, &stmt.target_list, ExprKind::SelectTarget)?;
        (tlist, quals)
    } else {
        let tlist = transform_target_list(pstate, &stmt.target_list, ExprKind::SelectTarget)?;
        let quals = transform_where_clause(pstate, stmt.where_clause.as_ref(), ExprKind::Where, "WHERE")?;
        (tlist, quals)
    };
    mark_target_list_origins(pstate, &mut tlist);

    qry.having_qual = transform_where_clause(pstate, stmt.having_clause.as_ref(), ExprKind::Having, "HAVING")?;

    // ORDER BY first: GROUP BY and DISTINCT follow its ordering.
    qry.sort_clause = transform_sort_clause(pstate, &stmt.sort_clause, &mut tlist, ExprKind::OrderBy, false)?;
    qry.group_clause = transform_group_clause(
        pstate,
        &stmt.group_clause,
        &mut tlist,
        &qry.sort_clause,
        ExprKind::GroupBy,
        false,
    )?;

    qry.distinct_clause = match &stmt.distinct_clause {
        None => Vec::new(),
        Some(DistinctClause::All) => transform_distinct_clause(pstate, &mut tlist, &qry.sort_clause)?,
        Some(DistinctClause::On(exprs)) => {
            qry.has_distinct_on = true;
            transform_distinct_on_clause(pstate, exprs, &mut tlist, &qry.sort_clause)?
        }
    };

    qry.limit_offset = transform_limit_clause(pstate, stmt.limit_offset.as_ref(), ExprKind::Offset)?;
    qry.limit_count = transform_limit_clause(pstate, stmt.limit_count.as_ref(), ExprKind::Limit)?;

    let windowdefs = pstate.window_defs.clone();
    qry.window_clause = transform_window_definitions(pstate, &windowdefs, &mut tlist)?;

    qry.target_list = tlist;
    qry.rtable = pstate.rtable.clone();
    qry.jointree = Some(FromExpr {
        fromlist: pstate.joinlist.clone(),
        quals,
    });
    qry.has_sub_links = pstate.has_sub_links;
    qry.has_window_funcs = pstate.has_window_funcs;
    qry.has_aggs = pstate.has_aggs;
    if qry.has_aggs || !qry.group_clause.is_empty() || qry.having_qual.is_some() {
        check_aggregates(pstate.catalog(), &qry)?;
    }
    for lc in &stmt.locking_clause {
        transform_locking_clause(&mut qry, lc, false)?;
    }
    qry.cte_list = cte_list(pstate);
    assign_query_collations(pstate, &mut qry)?;
    trace!(rtable = qry.rtable.len(), targets = qry.target_list.len(), "SELECT analyzed");
    Ok(qry)
}

/// Transform `VALUES (...), (...)` used as a query on its own.
pub(crate) fn transform_values_clause(pstate: &mut ParseState<'_>, stmt: &SelectStmt) -> AnalyzeResult<Query> {
    let mut qry = Query::new(CmdType::Select);
    transform_with_into(pstate, &mut qry, stmt.with_clause.as_ref())?;

    // Collected column-major so types and collations resolve per column.
    let mut columns: Vec<Vec<Expr>> = Vec::new();
    for (i, raw_row) in stmt.values_lists.iter().enumerate() {
        let row = transform_expression_list(pstate, raw_row, ExprKind::Values)?;
        if i == 0 {
            columns = vec![Vec::with_capacity(stmt.values_lists.len()); row.len()];
        } else if row.len() != columns.len() {
            let location = row.first().and_then(Expr::location).or(raw_row.first().and_then(|r| r.location()));
            return Err(AnalyzeError::syntax("VALUES lists must all be the same length").at(location));
        }
        for (col, expr) in columns.iter_mut().zip(row) {
            if let Expr::SetToDefault(d) = &expr {
                return Err(
                    AnalyzeError::syntax("DEFAULT can only appear in a VALUES list within INSERT").at(d.location)
                );
            }
            col.push(expr);
        }
    }

    let mut collations = Vec::with_capacity(columns.len());
    for col in &mut columns {
        let refs: Vec<&Expr> = col.iter().collect();
        let coltype = select_common_type(pstate, &refs, "VALUES")?;
        for expr in col.iter_mut() {
            let e = std::mem::replace(expr, Expr::bool_const(false));
            *expr = coerce_to_common_type(pstate, e, coltype, "VALUES")?;
        }
        let refs: Vec<&Expr> = col.iter().collect();
        collations.push(select_common_collation(&refs, true)?);
    }

    let nrows = stmt.values_lists.len();
    let mut rows: Vec<Vec<Expr>> = (0..nrows).map(|_| Vec::with_capacity(columns.len())).collect();
    for col in columns {
        for (row, expr) in rows.iter_mut().zip(col) {
            row.push(expr);
        }
    }

    // Current-level variables only show up inside rules.
    let lateral = !pstate.rtable.is_empty() && rows.iter().flatten().any(|e| contain_vars_of_level(e, 0));
    let rtindex = add_range_table_entry_for_values(pstate, rows, collations, None, lateral, true)?;
    add_rte_to_query(pstate, rtindex, true, true, true);

    let mut tlist = Vec::new();
    for (name, var) in expand_rte(pstate, rtindex, 0, None)? {
        let resno = next_resno(pstate)?;
        tlist.push(TargetEntry::new(var, resno, Some(name), false));
    }

    qry.sort_clause = transform_sort_clause(pstate, &stmt.sort_clause, &mut tlist, ExprKind::OrderBy, false)?;
    qry.limit_offset = transform_limit_clause(pstate, stmt.limit_offset.as_ref(), ExprKind::Offset)?;
    qry.limit_count = transform_limit_clause(pstate, stmt.limit_count.as_ref(), ExprKind::Limit)?;

    if let Some(lc) = stmt.locking_clause.first() {
        return Err(AnalyzeError::feature_not_supported(format!("{} cannot be applied to VALUES", lc.strength)));
    }

    qry.target_list = tlist;
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
