//! Grouping validity check for queries with aggregates or GROUP BY.
//!
//! Once GROUP BY is known, every column of this level referenced from the
//! target list or HAVING must either be grouped on or appear inside an
//! aggregate. Sub-queries are searched too: a correlated reference to an
//! ungrouped outer column is just as wrong.

use crate::catalog::Catalog;
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::nodes::primnodes::{Expr, Var};
use crate::nodes::query::{Query, RangeTblEntry, RteKind};

struct GroupingContext<'q> {
    query: &'q Query,
    catalog: &'q dyn Catalog,
    group_exprs: Vec<Expr>,
    have_non_var_grouping: bool,
}

/// Replace level-0 references to join columns with the expressions they
/// alias, so grouping on `j.x` and selecting `t.x` compare equal.
fn flatten_join_alias_vars(rtable: &[RangeTblEntry], expr: &mut Expr) {
    if let Expr::Var(v) = expr {
        if v.varlevelsup == 0 {
            let alias = v
                .varno
                .checked_sub(1)
                .and_then(|i| rtable.get(i))
                .and_then(|rte| match &rte.kind {
                    RteKind::Join { joinaliasvars, .. } => usize::try_from(v.varattno)
                        .ok()
                        .and_then(|a| a.checked_sub(1))
                        .and_then(|i| joinaliasvars.get(i))
                        .cloned(),
                    _ => None,
                });
            if let Some(alias) = alias {
                *expr = alias;
                flatten_join_alias_vars(rtable, expr);
            }
        }
        return;
    }
    for child in expr.children_mut() {
        flatten_join_alias_vars(rtable, child);
    }
}

impl GroupingContext<'_> {
    fn attname(&self, rte: &RangeTblEntry, var: &Var) -> String {
        if var.varattno == 0 {
            return "*".to_string();
        }
        if var.varattno < 0 {
            if let RteKind::Relation { relid, .. } = &rte.kind {
                if let Some(col) = self
                    .catalog
                    .relation(*relid)
                    .and_then(|r| r.system_column_by_attnum(var.varattno))
                {
                    return col.name;
                }
            }
            return format!("attribute {}", var.varattno);
        }
        usize::try_from(var.varattno - 1)
            .ok()
            .and_then(|i| rte.eref.colnames.get(i))
            .cloned()
            .unwrap_or_default()
    }

    fn ungrouped_error(&self, var: &Var, depth: u32) -> AnalyzeError {
        let rte = var.varno.checked_sub(1).and_then(|i| self.query.rtable.get(i));
        let (relname, attname) = match rte {
            Some(rte) => (rte.eref.aliasname.clone(), self.attname(rte, var)),
            None => (String::from("?"), var.varattno.to_string()),
        };
        let message = if depth == 0 {
            format!("column \"{relname}.{attname}\" must appear in the GROUP BY clause or be used in an aggregate function")
        } else {
            format!("subquery uses ungrouped column \"{relname}.{attname}\" from outer query")
        };
        AnalyzeError::grouping(message).at(var.location)
    }

    fn check_expr(&self, expr: &Expr, depth: u32) -> AnalyzeResult<()> {
        match expr {
            Expr::Const(_) | Expr::Param(_) => return Ok(()),
            // Anything inside an aggregate of this level (or an outer one)
            // is evaluated per group.
            Expr::Aggref(a) if a.agglevelsup >= depth => return Ok(()),
            _ => {}
        }
        if self.have_non_var_grouping && depth == 0 && self.group_exprs.iter().any(|g| g.equal_ignoring_location(expr)) {
            return Ok(());
        }
        let var = match expr {
            Expr::Var(v) => v,
            Expr::OuterJoinMarker(m) => &m.var,
            Expr::SubLink(s) => {
                for child in expr.children() {
                    self.check_expr(child, depth)?;
                }
                return self.check_query(&s.subselect, depth + 1);
            }
            _ => {
                for child in expr.children() {
                    self.check_expr(child, depth)?;
                }
                return Ok(());
            }
        };
        if var.varlevelsup != depth {
            return Ok(());
        }
        if !self.have_non_var_grouping || depth != 0 {
            let grouped = self.group_exprs.iter().any(|g| {
                matches!(g, Expr::Var(gv)
                    if gv.varno == var.varno && gv.varattno == var.varattno && gv.varlevelsup == 0)
            });
            if grouped {
                return Ok(());
            }
        }
        Err(self.ungrouped_error(var, depth))
    }

    fn check_query(&self, query: &Query, depth: u32) -> AnalyzeResult<()> {
        let mut result = Ok(());
        query.for_each_expr(&mut |e| {
            if result.is_ok() {
                result = self.check_expr(e, depth);
            }
        });
        result?;
        for child in query.child_queries() {
            self.check_query(child, depth + 1)?;
        }
        Ok(())
    }
}

/// Verify that a grouped or aggregated query only references grouped
/// columns outside aggregates.
pub(crate) fn check_aggregates(catalog: &dyn Catalog, query: &Query) -> AnalyzeResult<()> {
    let has_join_rtes = query.rtable.iter().any(|r| matches!(r.kind, RteKind::Join { .. }));
    let has_self_ref = query
        .rtable
        .iter()
        .any(|r| matches!(r.kind, RteKind::Cte { self_reference: true, .. }));

    let mut group_exprs = Vec::with_capacity(query.group_clause.len());
    for gc in &query.group_clause {
        let tle = query
            .tle_by_sortgroupref(gc.tle_sort_group_ref)
            .ok_or_else(|| AnalyzeError::internal("GROUP BY item not found in target list"))?;
        let mut expr = tle.expr.clone();
        if has_join_rtes {
            flatten_join_alias_vars(&query.rtable, &mut expr);
        }
        group_exprs.push(expr);
    }
    let have_non_var_grouping = group_exprs.iter().any(|g| !matches!(g, Expr::Var(v) if v.varlevelsup == 0));

    let ctx = GroupingContext {
        query,
        catalog,
        group_exprs,
        have_non_var_grouping,
    };
    for expr in query.target_list.iter().map(|t| &t.expr).chain(query.having_qual.as_ref()) {
        let mut expr = expr.clone();
        if has_join_rtes {
            flatten_join_alias_vars(&query.rtable, &mut expr);
        }
        ctx.check_expr(&expr, 0)?;
    }

    if query.has_aggs && has_self_ref {
        let location = query
            .target_list
            .iter()
            .map(|t| &t.expr)
            .chain(query.having_qual.as_ref())
            .find_map(|e| {
                let mut loc = None;
                e.any(&mut |n| match n {
                    Expr::Aggref(a) if a.agglevelsup == 0 => {
                        loc = a.location;
                        true
                    }
                    _ => false,
                });
                loc
            });
        return Err(AnalyzeError::invalid_recursion(
            "aggregate functions are not allowed in a recursive query's recursive term",
        )
        .at(location));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{MemoryCatalog, types};
    use crate::nodes::primnodes::{Aggref, SubLink, SubLinkType};
    use crate::nodes::query::{CmdType, RelKind, SortGroupClause, TargetEntry};
    use crate::nodes::raw::Alias;

    fn var(attno: i16, levelsup: u32) -> Expr {
        let mut v = Var::new(1, attno, types::INT4, -1, 0);
        v.varlevelsup = levelsup;
        Expr::Var(v)
    }

    fn grouped_query(targets: Vec<Expr>) -> Query {
        let mut q = Query::new(CmdType::Select);
        q.rtable = vec![RangeTblEntry::new(
            RteKind::Relation {
                relid: 16384,
                relkind: RelKind::Table,
                is_temp: false,
            },
            None,
            Alias::with_columns("t", &["a", "b"]),
        )];
        q.target_list = targets
            .into_iter()
            .enumerate()
            .map(|(i, e)| TargetEntry::new(e, i as i16 + 1, None, false))
            .collect();
        q.target_list[0].ressortgroupref = 1;
        q.group_clause = vec![SortGroupClause {
            tle_sort_group_ref: 1,
            eqop: 96,
            sortop: 97,
            nulls_first: false,
            hashable: true,
        }];
        q
    }

    fn count(arg: Expr) -> Expr {
        Expr::Aggref(Aggref {
            aggfnoid: 1,
            aggtype: types::INT8,
            aggcollid: 0,
            inputcollid: 0,
            args: vec![arg],
            aggstar: false,
            aggdistinct: false,
            agglevelsup: 0,
            location: None,
        })
    }

    #[test]
    fn test_grouped_and_aggregated_columns_pass() {
        let cat = MemoryCatalog::new();
        let q = grouped_query(vec![var(1, 0), count(var(2, 0)), Expr::int8_const(1)]);
        assert!(check_aggregates(&cat, &q).is_ok());
    }

    #[test]
    fn test_ungrouped_column_fails() {
        let cat = MemoryCatalog::new();
        let q = grouped_query(vec![var(1, 0), var(2, 0)]);
        let err = check_aggregates(&cat, &q).unwrap_err();
        assert_eq!(
            err.message(),
            "column \"t.b\" must appear in the GROUP BY clause or be used in an aggregate function"
        );
        assert_eq!(err.sqlstate(), "42803");
    }

    #[test]
    fn test_ungrouped_outer_reference_in_subquery() {
        let cat = MemoryCatalog::new();
        let mut sub = Query::new(CmdType::Select);
        sub.target_list = vec![TargetEntry::new(var(2, 1), 1, None, false)];
        let sublink = Expr::SubLink(SubLink {
            sub_link_type: SubLinkType::Expr,
            testexpr: None,
            opno: None,
            subselect: Box::new(sub),
            location: None,
        });
        let q = grouped_query(vec![var(1, 0), sublink]);
        let err = check_aggregates(&cat, &q).unwrap_err();
        assert_eq!(err.message(), "subquery uses ungrouped column \"t.b\" from outer query");
    }
}
