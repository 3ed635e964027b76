//! Target lists: SELECT output columns, INSERT/UPDATE assignments and
//! RETURNING.

use crate::analyze::coerce::coerce_to_target_type;
use crate::analyze::expr::{mark_var_for_select_priv, transform_expr};
use crate::analyze::parse_state::{ExprKind, ParseState};
use crate::analyze::relation::{error_missing_rte, expand_rte, refname_range_table_entry, type_name};
use crate::catalog::CoercionContext;
use crate::error::{AnalyzeError, AnalyzeResult, Location};
use crate::nodes::primnodes::Expr;
use crate::nodes::query::{RteKind, TargetEntry};
use crate::nodes::raw::{ColumnField, RawExpr, RawSubLinkKind, ResTarget};
use crate::nodes::{AttrNumber, Index, Oid};

/// Widest target list a query may produce.
const MAX_TARGET_ENTRIES: AttrNumber = 1664;

pub(crate) fn next_resno(pstate: &mut ParseState<'_>) -> AnalyzeResult<AttrNumber> {
    let resno = pstate.next_resno;
    if resno > MAX_TARGET_ENTRIES {
        return Err(AnalyzeError::statement_too_complex(format!(
            "target lists can have at most {MAX_TARGET_ENTRIES} entries"
        )));
    }
    pstate.next_resno += 1;
    Ok(resno)
}

/// Column name a result column gets when the query does not name it.
pub(crate) fn figure_colname(raw: &RawExpr) -> String {
    figure_colname_internal(raw).unwrap_or_else(|| "?column?".to_string())
}

fn figure_colname_internal(raw: &RawExpr) -> Option<String> {
    match raw {
        RawExpr::ColumnRef { fields, .. } => match fields.last() {
            Some(ColumnField::Name(n)) => Some(n.clone()),
            _ => None,
        },
        RawExpr::FuncCall { name, .. } => Some(name.clone()),
        RawExpr::TypeCast { arg, type_name, .. } => {
            figure_colname_internal(arg).or_else(|| Some(type_name.clone()))
        }
        RawExpr::Collate { arg, .. } | RawExpr::OuterJoinMarker { column: arg, .. } => figure_colname_internal(arg),
        RawExpr::SubLink { kind, subselect, .. } => match kind {
            RawSubLinkKind::Exists => Some("exists".to_string()),
            RawSubLinkKind::Expr => subselect.target_list.first().and_then(|t| {
                t.name
                    .clone()
                    .or_else(|| t.val.as_ref().and_then(figure_colname_internal))
            }),
            RawSubLinkKind::Any { .. } => None,
        },
        RawExpr::Row { .. } => Some("row".to_string()),
        RawExpr::Rownum { .. } => Some("rownum".to_string()),
        _ => None,
    }
}

/// `*` or `rel.*`: the columns to expand, as `(name, Var)` pairs.
fn expand_star(pstate: &mut ParseState<'_>, fields: &[ColumnField], location: Location) -> AnalyzeResult<Option<Vec<(String, Expr)>>> {
    let expanded = match fields {
        [ColumnField::Star] => {
            let items: Vec<Index> = pstate
                .namespace
                .iter()
                .filter(|n| n.cols_visible && !n.lateral_only)
                .map(|n| n.rtindex)
                .collect();
            if items.is_empty() {
                return Err(AnalyzeError::syntax("SELECT * with no tables specified is not valid").at(location));
            }
            let mut out = Vec::new();
            for rtindex in items {
                out.extend(expand_rte(pstate, rtindex, 0, location)?);
            }
            out
        }
        [.., ColumnField::Star] => {
            let names: Vec<&str> = fields
                .iter()
                .filter_map(|f| match f {
                    ColumnField::Name(n) => Some(n.as_str()),
                    ColumnField::Star => None,
                })
                .collect();
            let (schema, relname) = match names.as_slice() {
                [rel] => (None, *rel),
                [schema, rel] => (Some(*schema), *rel),
                _ => {
                    return Err(AnalyzeError::syntax(format!(
                        "improper qualified name (too many dotted names): {}.*",
                        names.join(".")
                    ))
                    .at(location));
                }
            };
            let (rtindex, levelsup) = refname_range_table_entry(pstate, schema, relname, location)?
                .ok_or_else(|| error_missing_rte(pstate, relname, location))?;
            expand_rte(pstate, rtindex, levelsup, location)?
        }
        _ => return Ok(None),
    };
    for (_, var) in &expanded {
        mark_var_for_select_priv(pstate, var)?;
    }
    Ok(Some(expanded))
}

/// Transform a SELECT-style target list, expanding `*`.
pub(crate) fn transform_target_list(
    pstate: &mut ParseState<'_>,
    targets: &[ResTarget],
    kind: ExprKind,
) -> AnalyzeResult<Vec<TargetEntry>> {
    let mut tlist = Vec::with_capacity(targets.len());
    for target in targets {
        let Some(val) = &target.val else {
            return Err(AnalyzeError::internal("target list entry without a value"));
        };
        if let RawExpr::ColumnRef { fields, location } = val {
            if let Some(columns) = expand_star(pstate, fields, *location)? {
                for (name, var) in columns {
                    let resno = next_resno(pstate)?;
                    tlist.push(TargetEntry::new(var, resno, Some(name), false));
                }
                continue;
            }
        }
        let expr = transform_expr(pstate, val, kind)?;
        let name = target.name.clone().unwrap_or_else(|| figure_colname(val));
        let resno = next_resno(pstate)?;
        tlist.push(TargetEntry::new(expr, resno, Some(name), false));
    }
    Ok(tlist)
}

/// Transform a bare expression list (a VALUES row, ROW arguments),
/// expanding `rel.*`.
pub(crate) fn transform_expression_list(
    pstate: &mut ParseState<'_>,
    exprs: &[RawExpr],
    kind: ExprKind,
) -> AnalyzeResult<Vec<Expr>> {
    let mut out = Vec::with_capacity(exprs.len());
    for raw in exprs {
        if let RawExpr::ColumnRef { fields, location } = raw {
            if let Some(columns) = expand_star(pstate, fields, *location)? {
                out.extend(columns.into_iter().map(|(_, var)| var));
                continue;
            }
        }
        out.push(transform_expr(pstate, raw, kind)?);
    }
    Ok(out)
}

/// Where a column of entry `varno`, `levelsup` levels out, comes from.
fn column_origin(pstate: &ParseState<'_>, varno: Index, attno: AttrNumber, levelsup: u32) -> Option<(Oid, AttrNumber)> {
    if attno <= 0 {
        return None;
    }
    let rte = pstate.rte_at_level(varno, levelsup).ok()?;
    let idx = usize::try_from(attno).ok()? - 1;
    match &rte.kind {
        RteKind::Relation { relid, .. } => Some((*relid, attno)),
        RteKind::Subquery { subquery } => {
            let tle = subquery.target_list.iter().filter(|t| !t.resjunk).nth(idx)?;
            (tle.resorigtbl != 0).then_some((tle.resorigtbl, tle.resorigcol))
        }
        RteKind::Join { joinaliasvars, .. } => match joinaliasvars.get(idx)? {
            Expr::Var(v) => column_origin(pstate, v.varno, v.varattno, levelsup + v.varlevelsup),
            _ => None,
        },
        RteKind::Cte {
            ctename, ctelevelsup, ..
        } => {
            let owner = pstate.ancestor(levelsup + ctelevelsup).ok()?;
            let cte = owner.ctenamespace.iter().find(|c| c.borrow().ctename == *ctename)?;
            let cte = cte.borrow();
            let tle = cte.ctequery.as_ref()?.target_list.iter().filter(|t| !t.resjunk).nth(idx)?;
            (tle.resorigtbl != 0).then_some((tle.resorigtbl, tle.resorigcol))
        }
        RteKind::Function { .. } | RteKind::Values { .. } => None,
    }
}

/// Fill in `resorigtbl`/`resorigcol` for entries that are plain column
/// references.
pub(crate) fn mark_target_list_origins(pstate: &ParseState<'_>, tlist: &mut [TargetEntry]) {
    for tle in tlist {
        if let Expr::Var(v) = &tle.expr {
            if let Some((tbl, col)) = column_origin(pstate, v.varno, v.varattno, v.varlevelsup) {
                tle.resorigtbl = tbl;
                tle.resorigcol = col;
            }
        }
    }
}

/// Prepare `expr` for storing into column `attrno` of the target relation.
pub(crate) fn transform_assigned_expr(
    pstate: &ParseState<'_>,
    expr: Expr,
    colname: &str,
    attrno: AttrNumber,
    indirection: &[String],
    location: Location,
) -> AnalyzeResult<Expr> {
    let rel = pstate
        .target_relation
        .as_ref()
        .ok_or_else(|| AnalyzeError::internal("no target relation for assignment"))?;
    if attrno <= 0 {
        return Err(
            AnalyzeError::feature_not_supported(format!("cannot assign to system column \"{colname}\"")).at(location),
        );
    }
    let column = rel
        .column_by_attnum(attrno)
        .ok_or_else(|| AnalyzeError::internal(format!("column {attrno} of relation \"{}\" does not exist", rel.name)))?;
    if !indirection.is_empty() {
        return Err(AnalyzeError::feature_not_supported(format!(
            "subfield or array element assignment to column \"{colname}\" is not supported"
        ))
        .at(location));
    }
    if let Expr::SetToDefault(mut d) = expr {
        d.type_id = column.type_oid;
        d.typmod = column.typmod;
        d.collation = column.collation;
        return Ok(Expr::SetToDefault(d));
    }
    let source = expr.type_oid();
    let expr_location = expr.location().or(location);
    match coerce_to_target_type(
        pstate,
        expr,
        column.type_oid,
        column.typmod,
        CoercionContext::Assignment,
        expr_location,
    )? {
        Some(e) => Ok(e),
        None => Err(AnalyzeError::datatype_mismatch(format!(
            "column \"{colname}\" is of type {} but expression is of type {}",
            type_name(pstate, column.type_oid),
            type_name(pstate, source)
        ))
        .with_hint("You will need to rewrite or cast the expression.")
        .at(expr_location)),
    }
}

/// Bind an UPDATE SET entry to its target column.
pub(crate) fn update_target_list_entry(
    pstate: &ParseState<'_>,
    tle: &mut TargetEntry,
    colname: &str,
    attrno: AttrNumber,
    indirection: &[String],
    location: Location,
) -> AnalyzeResult<()> {
    let expr = std::mem::replace(&mut tle.expr, Expr::int8_const(0));
    tle.expr = transform_assigned_expr(pstate, expr, colname, attrno, indirection, location)?;
    tle.resno = attrno;
    tle.resname = Some(colname.to_string());
    Ok(())
}

/// One column an INSERT writes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InsertColumn {
    pub name: String,
    pub attnum: AttrNumber,
    pub indirection: Vec<String>,
    pub location: Location,
}

/// Resolve an INSERT column list, or every user column when it is empty.
pub(crate) fn check_insert_targets(pstate: &ParseState<'_>, cols: &[ResTarget]) -> AnalyzeResult<Vec<InsertColumn>> {
    let rel = pstate
        .target_relation
        .as_ref()
        .ok_or_else(|| AnalyzeError::internal("INSERT without a target relation"))?;
    if cols.is_empty() {
        return Ok(rel
            .columns
            .iter()
            .filter(|c| !c.is_dropped && c.attnum > 0)
            .map(|c| InsertColumn {
                name: c.name.clone(),
                attnum: c.attnum,
                indirection: Vec::new(),
                location: None,
            })
            .collect());
    }

    let mut whole: Vec<AttrNumber> = Vec::new();
    let mut partial: Vec<AttrNumber> = Vec::new();
    let mut out = Vec::with_capacity(cols.len());
    for col in cols {
        let name = col
            .name
            .as_deref()
            .ok_or_else(|| AnalyzeError::internal("INSERT column without a name"))?;
        let attnum = rel
            .column(name)
            .filter(|c| c.attnum > 0)
            .map(|c| c.attnum)
            .ok_or_else(|| {
                AnalyzeError::undefined_column(format!(
                    "column \"{name}\" of relation \"{}\" does not exist",
                    rel.name
                ))
                .at(col.location)
            })?;
        let duplicate = if col.indirection.is_empty() {
            let dup = whole.contains(&attnum) || partial.contains(&attnum);
            whole.push(attnum);
            dup
        } else {
            let dup = whole.contains(&attnum);
            partial.push(attnum);
            dup
        };
        if duplicate {
            return Err(
                AnalyzeError::duplicate_column(format!("column \"{name}\" specified more than once")).at(col.location),
            );
        }
        out.push(InsertColumn {
            name: name.to_string(),
            attnum,
            indirection: col.indirection.clone(),
            location: col.location,
        });
    }
    Ok(out)
}

/// Number of columns `expr` would supply if it were written out as a row:
/// a `ROW(...)` or a whole-row reference to a sub-query.
pub(crate) fn count_rowexpr_columns(pstate: &ParseState<'_>, expr: &Expr) -> Option<usize> {
    match expr {
        Expr::Row(r) => Some(r.args.len()),
        Expr::Var(v) if v.varattno == 0 => {
            let rte = pstate.rte_at_level(v.varno, v.varlevelsup).ok()?;
            rte.subquery()
                .map(|q| q.target_list.iter().filter(|t| !t.resjunk).count())
        }
        _ => None,
    }
}

/// Transform a RETURNING list. Result numbers restart at 1.
pub(crate) fn transform_returning_list(pstate: &mut ParseState<'_>, returning: &[ResTarget]) -> AnalyzeResult<Vec<TargetEntry>> {
    if returning.is_empty() {
        return Ok(Vec::new());
    }
    let saved = std::mem::replace(&mut pstate.next_resno, 1);
    let result = transform_target_list(pstate, returning, ExprKind::Returning);
    pstate.next_resno = saved;
    let mut rlist = result?;
    mark_target_list_origins(pstate, &mut rlist);
    Ok(rlist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::AnalyzeEnv;
    use crate::analyze::parse_state::ParamTypes;
    use crate::analyze::relation::{add_range_table_entry, add_rte_to_query, set_target_table};
    use crate::catalog::{MemoryCatalog, types};
    use crate::config::{AnalyzerConfig, Grammar};
    use crate::nodes::query::AclMode;
    use crate::nodes::raw::{RangeVar, SelectStmt};
    use crate::session::Session;

    fn fixture() -> (MemoryCatalog, AnalyzerConfig, Session) {
        let mut cat = MemoryCatalog::new();
        cat.add_table("t", &[("a", types::INT4), ("b", types::TEXT)]);
        cat.add_table("u", &[("c", types::INT8)]);
        (cat, AnalyzerConfig::default(), Session::default())
    }

    #[test]
    fn test_figure_colname() {
        assert_eq!(figure_colname(&RawExpr::col("t.a")), "a");
        assert_eq!(figure_colname(&RawExpr::count_star()), "count");
        assert_eq!(figure_colname(&RawExpr::cast(RawExpr::int(1), "text")), "text");
        assert_eq!(figure_colname(&RawExpr::exists(SelectStmt::select(vec![]))), "exists");
        assert_eq!(figure_colname(&RawExpr::int(1)), "?column?");
    }

    #[test]
    fn test_star_expansion_and_origins() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        for name in ["t", "u"] {
            let rti = add_range_table_entry(&mut ps, &RangeVar::new(name), true).unwrap();
            add_rte_to_query(&mut ps, rti, true, true, true);
        }
        let mut tlist = transform_target_list(
            &mut ps,
            &[ResTarget::expr(RawExpr::star()), ResTarget::expr(RawExpr::col("u.*"))],
            ExprKind::SelectTarget,
        )
        .unwrap();
        let names: Vec<_> = tlist.iter().map(|t| t.resname.clone().unwrap()).collect();
        assert_eq!(names, ["a", "b", "c", "c"]);
        let resnos: Vec<_> = tlist.iter().map(|t| t.resno).collect();
        assert_eq!(resnos, [1, 2, 3, 4]);
        mark_target_list_origins(&ps, &mut tlist);
        assert_eq!(tlist[1].resorigcol, 2);
        assert!(ps.rtable[1].required_perms.contains(AclMode::SELECT));
    }

    #[test]
    fn test_star_without_tables() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        let err = transform_target_list(&mut ps, &[ResTarget::expr(RawExpr::star())], ExprKind::SelectTarget)
            .unwrap_err();
        assert_eq!(err.message(), "SELECT * with no tables specified is not valid");
    }

    #[test]
    fn test_insert_targets() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        set_target_table(&mut ps, &RangeVar::new("t"), false, false, AclMode::INSERT).unwrap();
        let all = check_insert_targets(&ps, &[]).unwrap();
        assert_eq!(all.iter().map(|c| c.attnum).collect::<Vec<_>>(), [1, 2]);
        let err = check_insert_targets(&ps, &[ResTarget::column("zz")]).unwrap_err();
        assert_eq!(err.message(), "column \"zz\" of relation \"t\" does not exist");
        let err = check_insert_targets(&ps, &[ResTarget::column("a"), ResTarget::column("a")]).unwrap_err();
        assert_eq!(err.message(), "column \"a\" specified more than once");
    }

    #[test]
    fn test_assigned_expr_coercion() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        set_target_table(&mut ps, &RangeVar::new("t"), false, false, AclMode::INSERT).unwrap();
        let e = transform_assigned_expr(&ps, Expr::int8_const(3), "a", 1, &[], None).unwrap();
        assert_eq!(e.type_oid(), types::INT4);
        let err = transform_assigned_expr(&ps, Expr::bool_const(true), "a", 1, &[], None).unwrap_err();
        assert_eq!(err.message(), "column \"a\" is of type integer but expression is of type boolean");
        let err = transform_assigned_expr(&ps, Expr::int8_const(3), "ctid", -1, &[], None).unwrap_err();
        assert_eq!(err.message(), "cannot assign to system column \"ctid\"");
    }
}
