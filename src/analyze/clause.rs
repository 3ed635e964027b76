//! Clause transformers: FROM, WHERE, GROUP BY, ORDER BY, DISTINCT, LIMIT
//! and WINDOW.
//!
//! ORDER BY, GROUP BY and DISTINCT ON share the target list with the
//! SELECT list: each item is matched against an existing entry, and when
//! none fits a resjunk entry is appended. Entries referenced this way get
//! a `ressortgroupref` that the clause lists point at.

use crate::analyze::coerce::{
    coerce_to_boolean, coerce_to_specific_type, coerce_type, make_op, select_common_type,
};
use crate::analyze::expr::{mark_var_for_select_priv, transform_expr};
use crate::analyze::parse_state::{ExprKind, NamespaceItem, ParseState};
use crate::analyze::relation::{
    add_range_table_entry, add_range_table_entry_for_cte, add_range_table_entry_for_function,
    add_range_table_entry_for_join, add_range_table_entry_for_subquery, check_namespace_conflicts,
    col_name_to_var, expand_rte,
};
use crate::analyze::sub_analyze_select;
use crate::analyze::target::next_resno;
use crate::catalog::types;
use crate::error::{AnalyzeError, AnalyzeResult, Location};
use crate::nodes::primnodes::{CoercionForm, Expr, contain_vars_of_level, locate_var_of_level};
use crate::nodes::query::{JoinExpr, JoinNode, JoinType, SortGroupClause, TargetEntry, WindowClause};
use crate::nodes::raw::{
    ColumnField, FromItem, JoinItem, NullsOrder, RawExpr, RawJoinType, RawValue, SortBy, SortDir,
    WindowDef,
};
use crate::nodes::{INVALID_OID, Index, Oid};

// ── FROM ───────────────────────────────────────────────────────────────────

/// Transform the FROM list, filling the join list and namespace.
pub(crate) fn transform_from_clause(pstate: &mut ParseState<'_>, items: &[FromItem]) -> AnalyzeResult<()> {
    for item in items {
        let (node, _, namespace) = transform_from_clause_item(pstate, item)?;
        check_namespace_conflicts(pstate, &pstate.namespace, &namespace)?;
        // Earlier items stay visible, but only to LATERAL references.
        for existing in &mut pstate.namespace {
            existing.lateral_only = true;
            existing.lateral_ok = true;
        }
        pstate.joinlist.push(node);
        pstate.namespace.extend(namespace);
    }
    for item in &mut pstate.namespace {
        item.lateral_only = false;
        item.lateral_ok = true;
    }
    Ok(())
}

fn transform_from_clause_item(
    pstate: &mut ParseState<'_>,
    item: &FromItem,
) -> AnalyzeResult<(JoinNode, Index, Vec<NamespaceItem>)> {
    match item {
        FromItem::Relation(rv) => {
            let cte = if rv.is_qualified() { None } else { pstate.scan_cte(&rv.relname) };
            let rtindex = match cte {
                Some((cte, levelsup)) => add_range_table_entry_for_cte(pstate, &cte, levelsup, rv, true)?,
                None => add_range_table_entry(pstate, rv, true)?,
            };
            Ok((JoinNode::RangeTblRef(rtindex), rtindex, vec![NamespaceItem::new(rtindex, true, true)]))
        }
        FromItem::Subselect {
            lateral,
            subquery,
            alias,
            location,
        } => {
            let alias = alias.clone().ok_or_else(|| {
                AnalyzeError::syntax("subquery in FROM must have an alias")
                    .with_hint("For example, FROM (SELECT ...) [AS] foo.")
                    .at(*location)
            })?;
            let locked = pstate.is_locked_refname(&alias.aliasname);
            pstate.lateral_active = *lateral;
            let query = sub_analyze_select(subquery, pstate, None, locked);
            pstate.lateral_active = false;
            let rtindex = add_range_table_entry_for_subquery(pstate, query?, alias, *lateral, true)?;
            Ok((JoinNode::RangeTblRef(rtindex), rtindex, vec![NamespaceItem::new(rtindex, true, true)]))
        }
        FromItem::Function {
            lateral,
            call,
            alias,
            location,
        } => {
            let RawExpr::FuncCall { name, .. } = call else {
                return Err(AnalyzeError::internal("function in FROM is not a function call").at(*location));
            };
            // Function arguments may always refer to earlier FROM items.
            pstate.lateral_active = true;
            let funcexpr = transform_expr(pstate, call, ExprKind::FromFunction);
            pstate.lateral_active = false;
            let funcexpr = funcexpr?;
            let is_lateral = *lateral || contain_vars_of_level(&funcexpr, 0);
            let rtindex =
                add_range_table_entry_for_function(pstate, name, funcexpr, alias.clone(), is_lateral, true)?;
            Ok((JoinNode::RangeTblRef(rtindex), rtindex, vec![NamespaceItem::new(rtindex, true, true)]))
        }
        FromItem::Join(j) => transform_join(pstate, j),
    }
}

fn transform_join(pstate: &mut ParseState<'_>, j: &JoinItem) -> AnalyzeResult<(JoinNode, Index, Vec<NamespaceItem>)> {
    let (l_node, l_rtindex, mut l_namespace) = transform_from_clause_item(pstate, &j.larg)?;

    // The right side may refer LATERALly to the left side, unless the join
    // type would null the left side.
    let lateral_ok = matches!(j.join_type, RawJoinType::Cross | RawJoinType::Inner | RawJoinType::Left);
    for item in &mut l_namespace {
        item.lateral_only = true;
        item.lateral_ok = lateral_ok;
    }
    let saved_len = pstate.namespace.len();
    pstate.namespace.extend(l_namespace.iter().copied());
    let right = transform_from_clause_item(pstate, &j.rarg);
    pstate.namespace.truncate(saved_len);
    let (r_node, r_rtindex, r_namespace) = right?;

    check_namespace_conflicts(pstate, &l_namespace, &r_namespace)?;
    let mut my_namespace = l_namespace;
    my_namespace.extend(r_namespace);

    let jointype = match j.join_type {
        RawJoinType::Cross | RawJoinType::Inner => JoinType::Inner,
        RawJoinType::Left => JoinType::Left,
        RawJoinType::Right => JoinType::Right,
        RawJoinType::Full => JoinType::Full,
    };

    let (l_colnames, l_colvars): (Vec<String>, Vec<Expr>) =
        expand_rte(pstate, l_rtindex, 0, j.location)?.into_iter().unzip();
    let (r_colnames, r_colvars): (Vec<String>, Vec<Expr>) =
        expand_rte(pstate, r_rtindex, 0, j.location)?.into_iter().unzip();

    let using: Vec<String> = if j.is_natural {
        l_colnames
            .iter()
            .filter(|l| r_colnames.contains(l))
            .fold(Vec::new(), |mut acc, l| {
                if !acc.contains(l) {
                    acc.push(l.clone());
                }
                acc
            })
    } else {
        j.using.clone()
    };

    let mut res_colnames = Vec::new();
    let mut res_colvars = Vec::new();
    let quals;
    if !using.is_empty() {
        let mut l_used = Vec::new();
        let mut r_used = Vec::new();
        let mut conjuncts = Vec::new();
        for (i, name) in using.iter().enumerate() {
            if using[..i].contains(name) {
                return Err(AnalyzeError::duplicate_column(format!(
                    "column name \"{name}\" appears more than once in USING clause"
                ))
                .at(j.location));
            }
            let l_index = find_using_column(&l_colnames, name, "left", j.location)?;
            let r_index = find_using_column(&r_colnames, name, "right", j.location)?;
            l_used.push(l_index);
            r_used.push(r_index);
            let (l_var, r_var) = (&l_colvars[l_index], &r_colvars[r_index]);
            mark_var_for_select_priv(pstate, l_var)?;
            mark_var_for_select_priv(pstate, r_var)?;
            conjuncts.push(make_op(pstate, "=", Some(l_var.clone()), r_var.clone(), j.location)?);
            res_colnames.push(name.clone());
            res_colvars.push(build_merged_join_var(pstate, jointype, l_var, r_var)?);
        }
        quals = match Expr::and_of(conjuncts) {
            Some(q) => Some(coerce_to_boolean(pstate, q, "JOIN/USING")?),
            None => None,
        };
        for (i, (name, var)) in l_colnames.iter().zip(&l_colvars).enumerate() {
            if !l_used.contains(&i) {
                res_colnames.push(name.clone());
                res_colvars.push(var.clone());
            }
        }
        for (i, (name, var)) in r_colnames.iter().zip(&r_colvars).enumerate() {
            if !r_used.contains(&i) {
                res_colnames.push(name.clone());
                res_colvars.push(var.clone());
            }
        }
    } else {
        quals = match &j.quals {
            Some(raw) => {
                // ON sees exactly the join's own inputs.
                let scope = my_namespace
                    .iter()
                    .map(|n| NamespaceItem {
                        lateral_only: false,
                        lateral_ok: true,
                        ..*n
                    })
                    .collect();
                let saved = std::mem::replace(&mut pstate.namespace, scope);
                let q = transform_where_clause(pstate, Some(raw), ExprKind::JoinOn, "JOIN/ON");
                pstate.namespace = saved;
                q?
            }
            None => None,
        };
        res_colnames.extend(l_colnames);
        res_colnames.extend(r_colnames);
        res_colvars.extend(l_colvars);
        res_colvars.extend(r_colvars);
    }

    let rtindex =
        add_range_table_entry_for_join(pstate, res_colnames, jointype, res_colvars, j.alias.clone(), true)?;
    let join = JoinExpr {
        jointype,
        is_natural: j.is_natural,
        larg: l_node,
        rarg: r_node,
        using,
        quals,
        alias: j.alias.clone(),
        rtindex,
    };
    if pstate.joinexprs.len() < rtindex {
        pstate.joinexprs.resize(rtindex, None);
    }
    pstate.joinexprs[rtindex - 1] = Some(join.clone());

    // An aliased join hides its inputs; otherwise their columns are only
    // reachable through the join, though their names still qualify.
    if j.alias.is_some() {
        my_namespace.clear();
    } else {
        for item in &mut my_namespace {
            item.cols_visible = false;
        }
    }
    my_namespace.push(NamespaceItem::new(rtindex, j.alias.is_some(), true));
    Ok((JoinNode::Join(Box::new(join)), rtindex, my_namespace))
}

fn find_using_column(colnames: &[String], name: &str, side: &str, location: Location) -> AnalyzeResult<usize> {
    let mut found = None;
    for (i, col) in colnames.iter().enumerate() {
        if col != name {
            continue;
        }
        if found.is_some() {
            return Err(AnalyzeError::ambiguous_column(format!(
                "common column name \"{name}\" appears more than once in {side} table"
            ))
            .at(location));
        }
        found = Some(i);
    }
    found.ok_or_else(|| {
        AnalyzeError::undefined_column(format!(
            "column \"{name}\" specified in USING clause does not exist in {side} table"
        ))
        .at(location)
    })
}

/// The output column a USING pair merges into.
fn build_merged_join_var(pstate: &ParseState<'_>, jointype: JoinType, l: &Expr, r: &Expr) -> AnalyzeResult<Expr> {
    let outtype = select_common_type(pstate, &[l, r], "JOIN/USING")?;
    let outtypmod = if l.typmod() == r.typmod() { l.typmod() } else { -1 };
    let coerce = |e: &Expr| {
        if e.type_oid() == outtype {
            Ok(e.clone())
        } else {
            coerce_type(pstate, e.clone(), outtype, outtypmod, CoercionForm::Implicit, e.location())
        }
    };
    let l_node = coerce(l)?;
    let r_node = coerce(r)?;
    Ok(match jointype {
        JoinType::Right => r_node,
        JoinType::Inner if !matches!(l_node, Expr::Var(_)) && matches!(r_node, Expr::Var(_)) => r_node,
        JoinType::Inner | JoinType::Left | JoinType::Full => l_node,
    })
}

// ── WHERE / HAVING / LIMIT ─────────────────────────────────────────────────

/// Transform a qualification and coerce it to boolean.
pub(crate) fn transform_where_clause(
    pstate: &mut ParseState<'_>,
    clause: Option<&RawExpr>,
    kind: ExprKind,
    construct: &str,
) -> AnalyzeResult<Option<Expr>> {
    let Some(raw) = clause else {
        return Ok(None);
    };
    let qual = transform_expr(pstate, raw, kind)?;
    coerce_to_boolean(pstate, qual, construct).map(Some)
}

/// Transform a LIMIT or OFFSET expression to `bigint`.
pub(crate) fn transform_limit_clause(
    pstate: &mut ParseState<'_>,
    clause: Option<&RawExpr>,
    kind: ExprKind,
) -> AnalyzeResult<Option<Expr>> {
    let Some(raw) = clause else {
        return Ok(None);
    };
    let construct = kind.as_str();
    let expr = transform_expr(pstate, raw, kind)?;
    let expr = coerce_to_specific_type(pstate, expr, types::INT8, construct)?;
    if contain_vars_of_level(&expr, 0) {
        return Err(AnalyzeError::invalid_column_reference(format!(
            "argument of {construct} must not contain variables"
        ))
        .at(locate_var_of_level(&expr, 0)));
    }
    Ok(Some(expr))
}

// ── Target list matching ───────────────────────────────────────────────────

fn strip_implicit_coercions(expr: &Expr) -> &Expr {
    match expr {
        Expr::Coerce(c) if c.form == CoercionForm::Implicit => strip_implicit_coercions(&c.arg),
        other => other,
    }
}

/// SQL92 matching for ORDER BY, GROUP BY and DISTINCT ON: a bare name may
/// be an output column, an integer constant is an output position.
/// Returns the index of the matched entry in `tlist`.
fn find_target_list_entry_sql92(
    pstate: &mut ParseState<'_>,
    node: &RawExpr,
    tlist: &mut Vec<TargetEntry>,
    kind: ExprKind,
) -> AnalyzeResult<usize> {
    if let RawExpr::ColumnRef { fields, location } = node {
        if let [ColumnField::Name(name)] = fields.as_slice() {
            // GROUP BY prefers an input column over an output name.
            let is_input_column = kind == ExprKind::GroupBy && col_name_to_var(pstate, name, *location)?.is_some();
            if !is_input_column {
                let mut found: Option<usize> = None;
                for (i, tle) in tlist.iter().enumerate() {
                    if tle.resjunk || tle.resname.as_deref() != Some(name.as_str()) {
                        continue;
                    }
                    match found {
                        Some(prev) if !tlist[prev].expr.equal_ignoring_location(&tle.expr) => {
                            return Err(AnalyzeError::ambiguous_column(format!(
                                "{} \"{name}\" is ambiguous",
                                kind.as_str()
                            ))
                            .at(*location));
                        }
                        Some(_) => {}
                        None => found = Some(i),
                    }
                }
                if let Some(i) = found {
                    return Ok(i);
                }
            }
        }
    }

    if let RawExpr::Const { value, location } = node {
        match value {
            RawValue::Integer(pos) => {
                let hit = tlist
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| !t.resjunk)
                    .nth(usize::try_from(*pos).unwrap_or(0).wrapping_sub(1));
                return match hit {
                    Some((i, _)) => Ok(i),
                    None => Err(AnalyzeError::invalid_column_reference(format!(
                        "{} position {pos} is not in select list",
                        kind.as_str()
                    ))
                    .at(*location)),
                };
            }
            RawValue::Bool(_) => {}
            _ => {
                return Err(
                    AnalyzeError::syntax(format!("non-integer constant in {}", kind.as_str())).at(*location),
                );
            }
        }
    }

    find_target_list_entry_sql99(pstate, node, tlist, kind)
}

/// SQL99 matching: the item is an expression over input columns. An equal
/// existing entry is reused; otherwise a resjunk entry is appended.
fn find_target_list_entry_sql99(
    pstate: &mut ParseState<'_>,
    node: &RawExpr,
    tlist: &mut Vec<TargetEntry>,
    kind: ExprKind,
) -> AnalyzeResult<usize> {
    let expr = transform_expr(pstate, node, kind)?;
    if let Some(i) = tlist
        .iter()
        .position(|t| strip_implicit_coercions(&t.expr).equal_ignoring_location(&expr))
    {
        return Ok(i);
    }
    let resno = next_resno(pstate)?;
    tlist.push(TargetEntry::new(expr, resno, None, true));
    Ok(tlist.len() - 1)
}

fn find_target_list_entry(
    pstate: &mut ParseState<'_>,
    node: &RawExpr,
    tlist: &mut Vec<TargetEntry>,
    kind: ExprKind,
    use_sql99: bool,
) -> AnalyzeResult<usize> {
    if use_sql99 {
        find_target_list_entry_sql99(pstate, node, tlist, kind)
    } else {
        find_target_list_entry_sql92(pstate, node, tlist, kind)
    }
}

/// Give `tlist[idx]` a sort/group reference if it has none yet.
pub(crate) fn assign_sort_group_ref(tlist: &mut [TargetEntry], idx: usize) -> Index {
    if tlist[idx].ressortgroupref != 0 {
        return tlist[idx].ressortgroupref;
    }
    let next = tlist.iter().map(|t| t.ressortgroupref).max().unwrap_or(0) + 1;
    tlist[idx].ressortgroupref = next;
    next
}

fn target_is_in_sort_list(pstate: &ParseState<'_>, tle: &TargetEntry, sortop: Oid, list: &[SortGroupClause]) -> bool {
    if tle.ressortgroupref == 0 {
        return false;
    }
    list.iter().any(|scl| {
        scl.tle_sort_group_ref == tle.ressortgroupref
            && (sortop == INVALID_OID
                || sortop == scl.sortop
                || pstate.catalog().get_commutator(scl.sortop) == Some(sortop))
    })
}

/// Resolve an UNKNOWN-typed entry to text before it is sorted or grouped.
fn resolve_unknown_entry(pstate: &ParseState<'_>, tle: &mut TargetEntry) -> AnalyzeResult<()> {
    if tle.expr.type_oid() == types::UNKNOWN {
        let expr = std::mem::replace(&mut tle.expr, Expr::int8_const(0));
        let location = expr.location();
        tle.expr = coerce_type(pstate, expr, types::TEXT, -1, CoercionForm::Implicit, location)?;
    }
    Ok(())
}

fn add_target_to_sort_list(
    pstate: &ParseState<'_>,
    tlist: &mut [TargetEntry],
    idx: usize,
    sortlist: &mut Vec<SortGroupClause>,
    dir: SortDir,
    nulls: NullsOrder,
    location: Location,
) -> AnalyzeResult<()> {
    resolve_unknown_entry(pstate, &mut tlist[idx])?;
    let restype = tlist[idx].expr.type_oid();
    let reverse = dir == SortDir::Desc;
    let ops = pstate
        .catalog()
        .get_sort_group_operators(restype, !reverse, true, reverse)
        .map_err(|e| e.at(location))?;
    let sortop = if reverse { ops.gt_op } else { ops.lt_op };
    let nulls_first = match nulls {
        NullsOrder::Default => reverse,
        NullsOrder::First => true,
        NullsOrder::Last => false,
    };
    if !target_is_in_sort_list(pstate, &tlist[idx], sortop, sortlist) {
        let tle_sort_group_ref = assign_sort_group_ref(tlist, idx);
        sortlist.push(SortGroupClause {
            tle_sort_group_ref,
            eqop: ops.eq_op,
            sortop,
            nulls_first,
            hashable: ops.hashable,
        });
    }
    Ok(())
}

fn add_target_to_group_list(
    pstate: &ParseState<'_>,
    tlist: &mut [TargetEntry],
    idx: usize,
    grouplist: &mut Vec<SortGroupClause>,
    location: Location,
) -> AnalyzeResult<()> {
    resolve_unknown_entry(pstate, &mut tlist[idx])?;
    if target_is_in_sort_list(pstate, &tlist[idx], INVALID_OID, grouplist) {
        return Ok(());
    }
    let restype = tlist[idx].expr.type_oid();
    let ops = pstate
        .catalog()
        .get_sort_group_operators(restype, false, true, false)
        .map_err(|e| e.at(location))?;
    let tle_sort_group_ref = assign_sort_group_ref(tlist, idx);
    grouplist.push(SortGroupClause {
        tle_sort_group_ref,
        eqop: ops.eq_op,
        sortop: ops.lt_op,
        nulls_first: false,
        hashable: ops.hashable,
    });
    Ok(())
}

// ── ORDER BY / GROUP BY / DISTINCT ─────────────────────────────────────────

pub(crate) fn transform_sort_clause(
    pstate: &mut ParseState<'_>,
    orderlist: &[SortBy],
    tlist: &mut Vec<TargetEntry>,
    kind: ExprKind,
    use_sql99: bool,
) -> AnalyzeResult<Vec<SortGroupClause>> {
    let mut sortlist = Vec::new();
    for sortby in orderlist {
        let idx = find_target_list_entry(pstate, &sortby.node, tlist, kind, use_sql99)?;
        let location = sortby.location.or(sortby.node.location());
        add_target_to_sort_list(pstate, tlist, idx, &mut sortlist, sortby.dir, sortby.nulls, location)?;
    }
    Ok(sortlist)
}

pub(crate) fn transform_group_clause(
    pstate: &mut ParseState<'_>,
    grouplist: &[RawExpr],
    tlist: &mut Vec<TargetEntry>,
    sortclause: &[SortGroupClause],
    kind: ExprKind,
    use_sql99: bool,
) -> AnalyzeResult<Vec<SortGroupClause>> {
    let mut result: Vec<SortGroupClause> = Vec::new();
    for gexpr in grouplist {
        let idx = find_target_list_entry(pstate, gexpr, tlist, kind, use_sql99)?;
        if target_is_in_sort_list(pstate, &tlist[idx], INVALID_OID, &result) {
            continue;
        }
        // Reuse the ORDER BY item's operators when the entry is sorted on.
        let sortref = tlist[idx].ressortgroupref;
        let from_sort = (sortref != 0)
            .then(|| sortclause.iter().find(|s| s.tle_sort_group_ref == sortref))
            .flatten();
        match from_sort {
            Some(s) => result.push(s.clone()),
            None => add_target_to_group_list(pstate, tlist, idx, &mut result, gexpr.location())?,
        }
    }
    Ok(result)
}

/// `SELECT DISTINCT`: every output column, in ORDER BY order first.
pub(crate) fn transform_distinct_clause(
    pstate: &ParseState<'_>,
    tlist: &mut [TargetEntry],
    sortclause: &[SortGroupClause],
) -> AnalyzeResult<Vec<SortGroupClause>> {
    let mut result = Vec::new();
    for scl in sortclause {
        let tle = tlist
            .iter()
            .find(|t| t.ressortgroupref == scl.tle_sort_group_ref)
            .ok_or_else(|| AnalyzeError::internal("ORDER BY item not found in target list"))?;
        if tle.resjunk {
            return Err(AnalyzeError::invalid_column_reference(
                "for SELECT DISTINCT, ORDER BY expressions must appear in select list",
            )
            .at(tle.expr.location()));
        }
        result.push(scl.clone());
    }
    for idx in 0..tlist.len() {
        if tlist[idx].resjunk {
            continue;
        }
        let location = tlist[idx].expr.location();
        add_target_to_group_list(pstate, tlist, idx, &mut result, location)?;
    }
    Ok(result)
}

/// `SELECT DISTINCT ON (...)`. The ORDER BY, if any, must start with the
/// DISTINCT ON expressions.
pub(crate) fn transform_distinct_on_clause(
    pstate: &mut ParseState<'_>,
    distinctlist: &[RawExpr],
    tlist: &mut Vec<TargetEntry>,
    sortclause: &[SortGroupClause],
) -> AnalyzeResult<Vec<SortGroupClause>> {
    let mut refs = Vec::with_capacity(distinctlist.len());
    for dexpr in distinctlist {
        let idx = find_target_list_entry_sql92(pstate, dexpr, tlist, ExprKind::DistinctOn)?;
        refs.push((assign_sort_group_ref(tlist, idx), idx, dexpr.location()));
    }
    let mismatch = |location: Location| {
        AnalyzeError::syntax("SELECT DISTINCT ON expressions must match initial ORDER BY expressions").at(location)
    };

    let mut result = Vec::new();
    let mut skipped_sort_item = false;
    for scl in sortclause {
        match refs.iter().find(|(r, ..)| *r == scl.tle_sort_group_ref) {
            Some((.., location)) if skipped_sort_item => return Err(mismatch(*location)),
            Some(_) => result.push(scl.clone()),
            None => skipped_sort_item = true,
        }
    }
    for (_, idx, location) in refs {
        if target_is_in_sort_list(pstate, &tlist[idx], INVALID_OID, &result) {
            continue;
        }
        if skipped_sort_item {
            return Err(mismatch(location));
        }
        add_target_to_group_list(pstate, tlist, idx, &mut result, location)?;
    }
    Ok(result)
}

// ── WINDOW ─────────────────────────────────────────────────────────────────

/// Turn the collected window definitions (the WINDOW clause followed by
/// every inline `OVER (...)`) into window clauses. `winref` is the
/// 1-based position.
pub(crate) fn transform_window_definitions(
    pstate: &mut ParseState<'_>,
    windowdefs: &[WindowDef],
    tlist: &mut Vec<TargetEntry>,
) -> AnalyzeResult<Vec<WindowClause>> {
    let mut result: Vec<WindowClause> = Vec::with_capacity(windowdefs.len());
    for (i, windef) in windowdefs.iter().enumerate() {
        if let Some(name) = &windef.name {
            if result.iter().any(|w| w.name.as_deref() == Some(name.as_str())) {
                return Err(AnalyzeError::windowing(format!("window \"{name}\" is already defined")).at(windef.location));
            }
        }
        let refwc = match &windef.refname {
            Some(refname) => Some(
                result
                    .iter()
                    .find(|w| w.name.as_deref() == Some(refname.as_str()))
                    .cloned()
                    .ok_or_else(|| {
                        AnalyzeError::undefined_object(format!("window \"{refname}\" does not exist"))
                            .at(windef.location)
                    })?,
            ),
            None => None,
        };

        let order_clause = transform_sort_clause(pstate, &windef.order_clause, tlist, ExprKind::WindowOrder, true)?;
        let partition_clause = transform_group_clause(
            pstate,
            &windef.partition_clause,
            tlist,
            &order_clause,
            ExprKind::WindowPartition,
            true,
        )?;

        let mut wc = WindowClause {
            name: windef.name.clone(),
            refname: windef.refname.clone(),
            partition_clause,
            order_clause,
            winref: i + 1,
            copied_order: false,
        };
        if let Some(refwc) = refwc {
            let refname = windef.refname.as_deref().unwrap_or_default();
            if !wc.partition_clause.is_empty() {
                return Err(AnalyzeError::windowing(format!(
                    "cannot override PARTITION BY clause of window \"{refname}\""
                ))
                .at(windef.location));
            }
            wc.partition_clause = refwc.partition_clause;
            if wc.order_clause.is_empty() {
                wc.order_clause = refwc.order_clause;
                wc.copied_order = true;
            } else if !refwc.order_clause.is_empty() {
                return Err(AnalyzeError::windowing(format!(
                    "cannot override ORDER BY clause of window \"{refname}\""
                ))
                .at(windef.location));
            }
        }
        result.push(wc);
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::AnalyzeEnv;
    use crate::analyze::parse_state::ParamTypes;
    use crate::analyze::target::transform_target_list;
    use crate::catalog::MemoryCatalog;
    use crate::config::{AnalyzerConfig, Grammar};
    use crate::nodes::query::RteKind;
    use crate::nodes::raw::ResTarget;
    use crate::session::Session;

    fn fixture() -> (MemoryCatalog, AnalyzerConfig, Session) {
        let mut cat = MemoryCatalog::new();
        cat.add_table("t", &[("a", types::INT4), ("b", types::TEXT)]);
        cat.add_table("u", &[("a", types::INT8), ("c", types::DATE)]);
        (cat, AnalyzerConfig::default(), Session::default())
    }

    fn with_from<R>(items: Vec<FromItem>, f: impl FnOnce(&mut ParseState<'_>) -> R) -> R {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        transform_from_clause(&mut ps, &items).unwrap();
        f(&mut ps)
    }

    fn tlist(ps: &mut ParseState<'_>, targets: Vec<ResTarget>) -> Vec<TargetEntry> {
        transform_target_list(ps, &targets, ExprKind::SelectTarget).unwrap()
    }

    #[test]
    fn test_join_using_merges_columns() {
        let join = FromItem::join_using(RawJoinType::Inner, FromItem::table("t"), FromItem::table("u"), &["a"]);
        with_from(vec![join], |ps| {
            assert_eq!(ps.rtable.len(), 3);
            let jrte = &ps.rtable[2];
            assert_eq!(jrte.eref.colnames, ["a", "b", "c"]);
            let RteKind::Join { joinaliasvars, .. } = &jrte.kind else {
                panic!("expected a join entry");
            };
            assert_eq!(joinaliasvars[0].type_oid(), types::INT8);
            assert!(matches!(&ps.joinlist[0], JoinNode::Join(j) if j.quals.is_some() && j.rtindex == 3));
            assert_eq!(ps.joinexprs.len(), 3);
            // The merged column hides the two inputs.
            let (var, _) = col_name_to_var(ps, "a", None).unwrap().unwrap();
            assert_eq!(var.as_var().unwrap().varno, 3);
        });
    }

    #[test]
    fn test_join_using_missing_column() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        let join = FromItem::join_using(RawJoinType::Left, FromItem::table("t"), FromItem::table("u"), &["c"]);
        let err = transform_from_clause(&mut ps, &[join]).unwrap_err();
        assert_eq!(
            err.message(),
            "column \"c\" specified in USING clause does not exist in left table"
        );
    }

    #[test]
    fn test_join_on_sees_only_its_inputs() {
        let join = FromItem::join(
            RawJoinType::Left,
            FromItem::table("u"),
            FromItem::table_as("t", "x"),
            Some(RawExpr::op("=", RawExpr::col("u.a"), RawExpr::col("x.a"))),
        );
        with_from(vec![join], |ps| {
            let JoinNode::Join(j) = &ps.joinlist[0] else {
                panic!("expected a join");
            };
            assert_eq!(j.jointype, JoinType::Left);
            assert!(j.quals.is_some());
            assert!(ps.namespace.iter().all(|n| !n.lateral_only));
        });
    }

    #[test]
    fn test_order_by_output_name_and_position() {
        with_from(vec![FromItem::table("t")], |ps| {
            let mut tl = tlist(ps, vec![ResTarget::named(RawExpr::col("a"), "x"), ResTarget::expr(RawExpr::col("b"))]);
            let sort = transform_sort_clause(
                ps,
                &[SortBy::desc(RawExpr::col("x")), SortBy::asc(RawExpr::int(2))],
                &mut tl,
                ExprKind::OrderBy,
                false,
            )
            .unwrap();
            assert_eq!(sort.len(), 2);
            assert_eq!(tl.len(), 2);
            assert_eq!(sort[0].tle_sort_group_ref, tl[0].ressortgroupref);
            assert!(sort[0].nulls_first);
            assert!(!sort[1].nulls_first);

            let err = transform_sort_clause(ps, &[SortBy::asc(RawExpr::int(5))], &mut tl, ExprKind::OrderBy, false)
                .unwrap_err();
            assert_eq!(err.message(), "ORDER BY position 5 is not in select list");

            let err = transform_sort_clause(ps, &[SortBy::asc(RawExpr::string("a"))], &mut tl, ExprKind::OrderBy, false)
                .unwrap_err();
            assert_eq!(err.message(), "non-integer constant in ORDER BY");
        });
    }

    #[test]
    fn test_order_by_expression_adds_resjunk() {
        with_from(vec![FromItem::table("t")], |ps| {
            let mut tl = tlist(ps, vec![ResTarget::expr(RawExpr::col("b"))]);
            let expr = RawExpr::op("+", RawExpr::col("a"), RawExpr::int(1));
            transform_sort_clause(ps, &[SortBy::asc(expr)], &mut tl, ExprKind::OrderBy, false).unwrap();
            assert_eq!(tl.len(), 2);
            assert!(tl[1].resjunk);
            assert_eq!(tl[1].resno, 2);
            assert_eq!(tl[1].resname, None);
        });
    }

    #[test]
    fn test_group_by_prefers_input_column() {
        with_from(vec![FromItem::table("t")], |ps| {
            let mut tl = tlist(ps, vec![ResTarget::named(RawExpr::col("b"), "a")]);
            let group = transform_group_clause(ps, &[RawExpr::col("a")], &mut tl, &[], ExprKind::GroupBy, false).unwrap();
            assert_eq!(group.len(), 1);
            assert_eq!(tl.len(), 2);
            assert!(tl[1].resjunk);
            assert_eq!(tl[1].expr.type_oid(), types::INT4);
        });
    }

    #[test]
    fn test_group_by_reuses_sort_operators() {
        with_from(vec![FromItem::table("t")], |ps| {
            let mut tl = tlist(ps, vec![ResTarget::expr(RawExpr::col("a"))]);
            let sort =
                transform_sort_clause(ps, &[SortBy::desc(RawExpr::col("a"))], &mut tl, ExprKind::OrderBy, false).unwrap();
            let group = transform_group_clause(ps, &[RawExpr::col("a"), RawExpr::int(1)], &mut tl, &sort, ExprKind::GroupBy, false)
                .unwrap();
            assert_eq!(group, sort);
        });
    }

    #[test]
    fn test_distinct_requires_sort_in_select_list() {
        with_from(vec![FromItem::table("t")], |ps| {
            let mut tl = tlist(ps, vec![ResTarget::expr(RawExpr::col("b"))]);
            let sort =
                transform_sort_clause(ps, &[SortBy::asc(RawExpr::col("a"))], &mut tl, ExprKind::OrderBy, false).unwrap();
            let err = transform_distinct_clause(ps, &mut tl, &sort).unwrap_err();
            assert_eq!(
                err.message(),
                "for SELECT DISTINCT, ORDER BY expressions must appear in select list"
            );
        });
    }

    #[test]
    fn test_distinct_on_must_match_order_by() {
        with_from(vec![FromItem::table("t")], |ps| {
            let mut tl = tlist(ps, vec![ResTarget::expr(RawExpr::col("a")), ResTarget::expr(RawExpr::col("b"))]);
            let sort =
                transform_sort_clause(ps, &[SortBy::asc(RawExpr::col("b"))], &mut tl, ExprKind::OrderBy, false).unwrap();
            let err = transform_distinct_on_clause(ps, &[RawExpr::col("a")], &mut tl, &sort).unwrap_err();
            assert_eq!(
                err.message(),
                "SELECT DISTINCT ON expressions must match initial ORDER BY expressions"
            );
            let ok = transform_distinct_on_clause(ps, &[RawExpr::col("b"), RawExpr::col("a")], &mut tl, &sort).unwrap();
            assert_eq!(ok.len(), 2);
            assert_eq!(ok[0], sort[0]);
        });
    }

    #[test]
    fn test_limit_rejects_variables() {
        with_from(vec![FromItem::table("t")], |ps| {
            let limit = transform_limit_clause(ps, Some(&RawExpr::int(10)), ExprKind::Limit).unwrap().unwrap();
            assert_eq!(limit.type_oid(), types::INT8);
            let err = transform_limit_clause(ps, Some(&RawExpr::col("a")), ExprKind::Limit).unwrap_err();
            assert_eq!(err.message(), "argument of LIMIT must not contain variables");
        });
    }

    #[test]
    fn test_window_definitions() {
        with_from(vec![FromItem::table("t")], |ps| {
            let mut tl = tlist(ps, vec![ResTarget::expr(RawExpr::col("a"))]);
            let base = WindowDef {
                name: Some("w".to_string()),
                partition_clause: vec![RawExpr::col("a")],
                ..Default::default()
            };
            let derived = WindowDef {
                refname: Some("w".to_string()),
                order_clause: vec![SortBy::asc(RawExpr::col("b"))],
                ..Default::default()
            };
            let clauses = transform_window_definitions(ps, &[base.clone(), derived], &mut tl).unwrap();
            assert_eq!(clauses.len(), 2);
            assert_eq!(clauses[1].winref, 2);
            assert_eq!(clauses[1].partition_clause, clauses[0].partition_clause);
            assert!(!clauses[1].copied_order);

            let override_partition = WindowDef {
                refname: Some("w".to_string()),
                partition_clause: vec![RawExpr::col("b")],
                ..Default::default()
            };
            let err = transform_window_definitions(ps, &[base.clone(), override_partition], &mut tl).unwrap_err();
            assert_eq!(err.message(), "cannot override PARTITION BY clause of window \"w\"");

            let err = transform_window_definitions(ps, &[base.clone(), base], &mut tl).unwrap_err();
            assert_eq!(err.message(), "window \"w\" is already defined");
        });
    }
}
