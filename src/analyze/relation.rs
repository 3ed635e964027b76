//! Range table and namespace management.
//!
//! Every FROM item, DML target, sub-query and join becomes one entry in the
//! range table. Entries are only ever appended; their 1-based position is
//! what `Var.varno` and `RangeTblRef` point at. The namespace decides which
//! of those entries name lookup can see from the clause being transformed.

use crate::analyze::parse_state::{CteRef, NamespaceItem, ParseState};
use crate::catalog::{LockMode, RelationInfo, format_type};
use crate::error::{AnalyzeError, AnalyzeResult, Location};
use crate::nodes::primnodes::{Expr, Var};
use crate::nodes::query::{
    AclMode, CmdType, JoinNode, JoinType, Query, RangeTblEntry, RteKind,
};
use crate::nodes::raw::{Alias, RangeVar};
use crate::nodes::{AttrNumber, INVALID_OID, Index, Oid};

// ── Adding entries ─────────────────────────────────────────────────────────

/// Build the effective name of an entry, applying alias column names over
/// the entry's own.
fn build_eref(
    refname: &str,
    mut colnames: Vec<String>,
    alias: Option<&Alias>,
    what: &str,
) -> AnalyzeResult<Alias> {
    if let Some(alias) = alias {
        let available = colnames.iter().filter(|c| !c.is_empty()).count();
        if alias.colnames.len() > available {
            return Err(AnalyzeError::invalid_column_reference(format!(
                "{what} \"{refname}\" has {available} columns available but {} columns specified",
                alias.colnames.len()
            )));
        }
        let mut aliases = alias.colnames.iter();
        for name in colnames.iter_mut().filter(|c| !c.is_empty()) {
            match aliases.next() {
                Some(a) => *name = a.clone(),
                None => break,
            }
        }
    }
    Ok(Alias {
        aliasname: refname.to_string(),
        colnames,
    })
}

fn push_rte(pstate: &mut ParseState<'_>, rte: RangeTblEntry) -> Index {
    pstate.rtable.push(rte);
    pstate.rtable.len()
}

fn relation_rte(rel: &RelationInfo, alias: Option<Alias>, inh: bool, in_from_cl: bool) -> AnalyzeResult<RangeTblEntry> {
    let refname = alias
        .as_ref()
        .map(|a| a.aliasname.clone())
        .unwrap_or_else(|| rel.name.clone());
    let colnames = rel
        .columns
        .iter()
        .map(|c| if c.is_dropped { String::new() } else { c.name.clone() })
        .collect();
    let eref = build_eref(&refname, colnames, alias.as_ref(), "table")?;
    let mut rte = RangeTblEntry::new(
        RteKind::Relation {
            relid: rel.oid,
            relkind: rel.relkind,
            is_temp: rel.is_temp(),
        },
        alias,
        eref,
    );
    rte.inh = inh;
    rte.in_from_cl = in_from_cl;
    rte.required_perms = AclMode::SELECT;
    Ok(rte)
}

/// Open a relation named in FROM and add it to the range table. The lock
/// is `RowShare` when a locking clause applies to it, else `AccessShare`.
pub(crate) fn add_range_table_entry(
    pstate: &mut ParseState<'_>,
    relation: &RangeVar,
    in_from_cl: bool,
) -> AnalyzeResult<Index> {
    let lock = if pstate.is_locked_refname(relation.refname()) {
        LockMode::RowShare
    } else {
        LockMode::AccessShare
    };
    let search_path = pstate.session().search_path();
    let rel = pstate.catalog().relation_open(relation, &search_path, lock)?;
    let rte = relation_rte(&rel, relation.alias.clone(), relation.inh, in_from_cl)?;
    Ok(push_rte(pstate, rte))
}

/// Open the target of INSERT/UPDATE/DELETE with a write lock and make it
/// the result relation. With `also_source` it is also made visible to
/// name lookup, but it never enters the join list.
pub(crate) fn set_target_table(
    pstate: &mut ParseState<'_>,
    relation: &RangeVar,
    inh: bool,
    also_source: bool,
    required_perms: AclMode,
) -> AnalyzeResult<Index> {
    let search_path = pstate.session().search_path();
    let rel = pstate
        .catalog()
        .relation_open(relation, &search_path, LockMode::RowExclusive)?;
    tracing::trace!(relation = %rel.qualified_name(), ?required_perms, "set target table");
    let mut rte = relation_rte(&rel, relation.alias.clone(), inh, false)?;
    rte.required_perms = required_perms;
    let rtindex = push_rte(pstate, rte);
    pstate.target_rtindex = Some(rtindex);
    pstate.target_relation = Some(rel);
    if also_source {
        add_rte_to_query(pstate, rtindex, false, true, true);
    }
    Ok(rtindex)
}

/// Output columns of a query: its non-junk target entries for SELECT,
/// its RETURNING list for DML.
pub(crate) fn query_output_columns(query: &Query) -> Vec<(String, Oid, i32, Oid)> {
    let list = match query.command_type {
        CmdType::Insert | CmdType::Update | CmdType::Delete => &query.returning_list,
        _ => &query.target_list,
    };
    list.iter()
        .filter(|t| !t.resjunk)
        .map(|t| {
            (
                t.resname.clone().unwrap_or_else(|| "?column?".to_string()),
                t.expr.type_oid(),
                t.expr.typmod(),
                t.expr.collation(),
            )
        })
        .collect()
}

pub(crate) fn add_range_table_entry_for_subquery(
    pstate: &mut ParseState<'_>,
    subquery: Query,
    alias: Alias,
    lateral: bool,
    in_from_cl: bool,
) -> AnalyzeResult<Index> {
    let colnames = query_output_columns(&subquery)
        .into_iter()
        .map(|(name, ..)| name)
        .collect();
    let eref = build_eref(&alias.aliasname, colnames, Some(&alias), "table")?;
    let mut rte = RangeTblEntry::new(
        RteKind::Subquery {
            subquery: Box::new(subquery),
        },
        Some(alias),
        eref,
    );
    rte.lateral = lateral;
    rte.in_from_cl = in_from_cl;
    Ok(push_rte(pstate, rte))
}

pub(crate) fn add_range_table_entry_for_function(
    pstate: &mut ParseState<'_>,
    funcname: &str,
    funcexpr: Expr,
    alias: Option<Alias>,
    lateral: bool,
    in_from_cl: bool,
) -> AnalyzeResult<Index> {
    let refname = alias
        .as_ref()
        .map(|a| a.aliasname.clone())
        .unwrap_or_else(|| funcname.to_string());
    let eref = build_eref(&refname, vec![refname.clone()], alias.as_ref(), "function")?;
    let mut rte = RangeTblEntry::new(
        RteKind::Function {
            coltypes: vec![funcexpr.type_oid()],
            coltypmods: vec![funcexpr.typmod()],
            colcollations: vec![funcexpr.collation()],
            funcexpr,
        },
        alias,
        eref,
    );
    rte.lateral = lateral;
    rte.in_from_cl = in_from_cl;
    Ok(push_rte(pstate, rte))
}

pub(crate) fn add_range_table_entry_for_values(
    pstate: &mut ParseState<'_>,
    values_lists: Vec<Vec<Expr>>,
    colcollations: Vec<Oid>,
    alias: Option<Alias>,
    lateral: bool,
    in_from_cl: bool,
) -> AnalyzeResult<Index> {
    let first = values_lists.first().cloned().unwrap_or_default();
    let refname = alias
        .as_ref()
        .map(|a| a.aliasname.clone())
        .unwrap_or_else(|| "*VALUES*".to_string());
    let colnames = (1..=first.len()).map(|i| format!("column{i}")).collect();
    let eref = build_eref(&refname, colnames, alias.as_ref(), "VALUES list")?;
    let mut rte = RangeTblEntry::new(
        RteKind::Values {
            coltypes: first.iter().map(Expr::type_oid).collect(),
            coltypmods: first.iter().map(Expr::typmod).collect(),
            colcollations,
            values_lists,
        },
        alias,
        eref,
    );
    rte.lateral = lateral;
    rte.in_from_cl = in_from_cl;
    Ok(push_rte(pstate, rte))
}

pub(crate) fn add_range_table_entry_for_join(
    pstate: &mut ParseState<'_>,
    colnames: Vec<String>,
    jointype: JoinType,
    aliasvars: Vec<Expr>,
    alias: Option<Alias>,
    in_from_cl: bool,
) -> AnalyzeResult<Index> {
    let refname = alias
        .as_ref()
        .map(|a| a.aliasname.clone())
        .unwrap_or_else(|| "unnamed_join".to_string());
    let eref = build_eref(&refname, colnames, alias.as_ref(), "join expression")?;
    let mut rte = RangeTblEntry::new(
        RteKind::Join {
            jointype,
            joinaliasvars: aliasvars,
        },
        alias,
        eref,
    );
    rte.in_from_cl = in_from_cl;
    Ok(push_rte(pstate, rte))
}

pub(crate) fn add_range_table_entry_for_cte(
    pstate: &mut ParseState<'_>,
    cte: &CteRef,
    levelsup: u32,
    rv: &RangeVar,
    in_from_cl: bool,
) -> AnalyzeResult<Index> {
    let mut c = cte.borrow_mut();
    let self_reference = c.ctequery.is_none();
    if self_reference && c.ctecolnames.is_empty() {
        return Err(AnalyzeError::invalid_recursion(format!(
            "recursive reference to query \"{}\" must not appear within its non-recursive term",
            c.ctename
        ))
        .at(rv.location));
    }
    if let Some(q) = c.ctequery.as_deref() {
        if q.command_type != CmdType::Select && q.returning_list.is_empty() {
            return Err(AnalyzeError::feature_not_supported(format!(
                "WITH query \"{}\" does not have a RETURNING clause",
                c.ctename
            ))
            .at(rv.location));
        }
    }
    let refname = rv
        .alias
        .as_ref()
        .map(|a| a.aliasname.clone())
        .unwrap_or_else(|| c.ctename.clone());
    let eref = build_eref(&refname, c.ctecolnames.clone(), rv.alias.as_ref(), "table")?;
    let mut rte = RangeTblEntry::new(
        RteKind::Cte {
            ctename: c.ctename.clone(),
            ctelevelsup: levelsup,
            self_reference,
            coltypes: c.ctecoltypes.clone(),
            coltypmods: c.ctecoltypmods.clone(),
            colcollations: c.ctecolcollations.clone(),
        },
        rv.alias.clone(),
        eref,
    );
    rte.in_from_cl = in_from_cl;
    if !self_reference {
        c.cterefcount += 1;
    }
    drop(c);
    Ok(push_rte(pstate, rte))
}

/// Add an existing entry to the join list and/or the namespace.
pub(crate) fn add_rte_to_query(
    pstate: &mut ParseState<'_>,
    rtindex: Index,
    add_to_join_list: bool,
    add_to_rel_namespace: bool,
    add_to_var_namespace: bool,
) {
    if add_to_join_list {
        pstate.joinlist.push(JoinNode::RangeTblRef(rtindex));
    }
    if add_to_rel_namespace || add_to_var_namespace {
        pstate.namespace.push(NamespaceItem::new(
            rtindex,
            add_to_rel_namespace,
            add_to_var_namespace,
        ));
    }
}

/// Reject two visible entries with the same name, except two unaliased
/// distinct tables (which SQL allows, e.g. `s1.t, s2.t`).
pub(crate) fn check_namespace_conflicts(
    pstate: &ParseState<'_>,
    ns1: &[NamespaceItem],
    ns2: &[NamespaceItem],
) -> AnalyzeResult<()> {
    for a in ns1.iter().filter(|n| n.rel_visible) {
        let rte_a = pstate.rte(a.rtindex)?;
        for b in ns2.iter().filter(|n| n.rel_visible) {
            let rte_b = pstate.rte(b.rtindex)?;
            if rte_a.refname() != rte_b.refname() {
                continue;
            }
            if let (Some(ra), Some(rb)) = (rte_a.relid(), rte_b.relid()) {
                if rte_a.alias.is_none() && rte_b.alias.is_none() && ra != rb {
                    continue;
                }
            }
            return Err(AnalyzeError::duplicate_alias(format!(
                "table name \"{}\" specified more than once",
                rte_a.refname()
            )));
        }
    }
    Ok(())
}

// ── Column information ─────────────────────────────────────────────────────

/// Type, typmod and collation of column `attnum` of `rte`.
pub(crate) fn column_type(
    pstate: &ParseState<'_>,
    rte: &RangeTblEntry,
    attnum: AttrNumber,
) -> AnalyzeResult<(Oid, i32, Oid)> {
    let idx = usize::try_from(attnum).ok().and_then(|a| a.checked_sub(1));
    let missing = || {
        AnalyzeError::internal(format!(
            "column {attnum} of {} \"{}\" does not exist",
            rte.kind_name(),
            rte.refname()
        ))
    };
    match &rte.kind {
        RteKind::Relation { relid, .. } => {
            let rel = pstate
                .catalog()
                .relation(*relid)
                .ok_or_else(|| AnalyzeError::internal(format!("cache lookup failed for relation {relid}")))?;
            let col = if attnum > 0 {
                rel.column_by_attnum(attnum).cloned()
            } else {
                rel.system_column_by_attnum(attnum)
            };
            col.map(|c| (c.type_oid, c.typmod, c.collation)).ok_or_else(missing)
        }
        RteKind::Subquery { subquery } => {
            let cols = query_output_columns(subquery);
            idx.and_then(|i| cols.get(i))
                .map(|(_, t, m, c)| (*t, *m, *c))
                .ok_or_else(missing)
        }
        RteKind::Join { joinaliasvars, .. } => idx
            .and_then(|i| joinaliasvars.get(i))
            .map(|e| (e.type_oid(), e.typmod(), e.collation()))
            .ok_or_else(missing),
        RteKind::Function {
            coltypes,
            coltypmods,
            colcollations,
            ..
        }
        | RteKind::Values {
            coltypes,
            coltypmods,
            colcollations,
            ..
        }
        | RteKind::Cte {
            coltypes,
            coltypmods,
            colcollations,
            ..
        } => idx
            .and_then(|i| Some((*coltypes.get(i)?, *coltypmods.get(i)?, *colcollations.get(i)?)))
            .ok_or_else(missing),
    }
}

/// Build a `Var` for column `attnum` of the entry at `rtindex`, which lives
/// `levelsup` levels out from `pstate`.
pub(crate) fn make_var(
    pstate: &ParseState<'_>,
    rtindex: Index,
    attnum: AttrNumber,
    levelsup: u32,
    location: Location,
) -> AnalyzeResult<Expr> {
    let rte = pstate.rte_at_level(rtindex, levelsup)?;
    let (vartype, typmod, coll) = column_type(pstate, rte, attnum)?;
    let mut var = Var::new(rtindex, attnum, vartype, typmod, coll);
    var.varlevelsup = levelsup;
    var.location = location;
    Ok(Expr::Var(var))
}

/// Every visible column of an entry, in order, as `(name, Var)` pairs.
/// Dropped columns are skipped.
pub(crate) fn expand_rte(
    pstate: &ParseState<'_>,
    rtindex: Index,
    levelsup: u32,
    location: Location,
) -> AnalyzeResult<Vec<(String, Expr)>> {
    let rte = pstate.rte_at_level(rtindex, levelsup)?;
    let mut out = Vec::new();
    for (i, name) in rte.eref.colnames.iter().enumerate() {
        if name.is_empty() {
            continue;
        }
        let attnum = AttrNumber::try_from(i + 1)
            .map_err(|_| AnalyzeError::statement_too_complex("too many columns"))?;
        out.push((name.clone(), make_var(pstate, rtindex, attnum, levelsup, location)?));
    }
    Ok(out)
}

// ── Name lookup ────────────────────────────────────────────────────────────

/// Look for `colname` in one entry. Returns the attribute number.
pub(crate) fn scan_rte_for_column(
    pstate: &ParseState<'_>,
    rte: &RangeTblEntry,
    colname: &str,
    location: Location,
) -> AnalyzeResult<Option<AttrNumber>> {
    let mut result = None;
    for (i, name) in rte.eref.colnames.iter().enumerate() {
        if name != colname {
            continue;
        }
        if result.is_some() {
            return Err(AnalyzeError::ambiguous_column(format!(
                "column reference \"{colname}\" is ambiguous"
            ))
            .at(location));
        }
        result = Some(
            AttrNumber::try_from(i + 1)
                .map_err(|_| AnalyzeError::statement_too_complex("too many columns"))?,
        );
    }
    if result.is_some() {
        return Ok(result);
    }
    // System columns are only reachable on plain relations.
    if let RteKind::Relation { relid, .. } = &rte.kind {
        if let Some(rel) = pstate.catalog().relation(*relid) {
            if let Some(col) = rel.column(colname).filter(|c| c.attnum < 0) {
                return Ok(Some(col.attnum));
            }
        }
    }
    Ok(None)
}

fn lateral_error(pstate: &ParseState<'_>, rtindex: Index, location: Location) -> AnalyzeError {
    let refname = pstate
        .rte(rtindex)
        .map(|r| r.refname().to_string())
        .unwrap_or_default();
    AnalyzeError::invalid_column_reference(format!(
        "invalid reference to FROM-clause entry for table \"{refname}\""
    ))
    .with_detail("The combining JOIN type must be INNER or LEFT for a LATERAL reference.")
    .at(location)
}

/// Search one level's namespace for an unqualified column name.
fn scan_namespace_for_column(
    ps: &ParseState<'_>,
    colname: &str,
    location: Location,
) -> AnalyzeResult<Option<(Index, AttrNumber)>> {
    let mut result: Option<(Index, AttrNumber)> = None;
    for item in &ps.namespace {
        if !item.cols_visible || (item.lateral_only && !ps.lateral_active) {
            continue;
        }
        let rte = ps.rte(item.rtindex)?;
        let Some(attnum) = scan_rte_for_column(ps, rte, colname, location)? else {
            continue;
        };
        if result.is_some() {
            return Err(AnalyzeError::ambiguous_column(format!(
                "column reference \"{colname}\" is ambiguous"
            ))
            .at(location));
        }
        if item.lateral_only && !item.lateral_ok {
            return Err(lateral_error(ps, item.rtindex, location));
        }
        result = Some((item.rtindex, attnum));
    }
    Ok(result)
}

/// Resolve an unqualified column name, searching outward through enclosing
/// levels. Returns the `Var` and its `levelsup`.
pub(crate) fn col_name_to_var(
    pstate: &ParseState<'_>,
    colname: &str,
    location: Location,
) -> AnalyzeResult<Option<(Expr, u32)>> {
    let mut levelsup = 0;
    let mut ps: Option<&ParseState<'_>> = Some(pstate);
    while let Some(p) = ps {
        if let Some((rtindex, attnum)) = scan_namespace_for_column(p, colname, location)? {
            return Ok(Some((
                make_var(pstate, rtindex, attnum, levelsup, location)?,
                levelsup,
            )));
        }
        levelsup += 1;
        ps = p.parent;
    }
    Ok(None)
}

/// Find the entry a qualifier refers to, searching outward. Returns its
/// range-table index and `levelsup`.
pub(crate) fn refname_range_table_entry(
    pstate: &ParseState<'_>,
    schema: Option<&str>,
    refname: &str,
    location: Location,
) -> AnalyzeResult<Option<(Index, u32)>> {
    let mut levelsup = 0;
    let mut ps: Option<&ParseState<'_>> = Some(pstate);
    while let Some(p) = ps {
        let mut found: Option<&NamespaceItem> = None;
        for item in &p.namespace {
            if !item.rel_visible || (item.lateral_only && !p.lateral_active) {
                continue;
            }
            let rte = p.rte(item.rtindex)?;
            if rte.refname() != refname {
                continue;
            }
            if let Some(schema) = schema {
                let matches_schema = rte.alias.is_none()
                    && rte
                        .relid()
                        .and_then(|relid| p.catalog().relation(relid))
                        .is_some_and(|rel| rel.schema == schema);
                if !matches_schema {
                    continue;
                }
            }
            if found.is_some() {
                return Err(AnalyzeError::ambiguous_alias(format!(
                    "table reference \"{refname}\" is ambiguous"
                ))
                .at(location));
            }
            found = Some(item);
        }
        if let Some(item) = found {
            if item.lateral_only && !item.lateral_ok {
                return Err(lateral_error(p, item.rtindex, location));
            }
            return Ok(Some((item.rtindex, levelsup)));
        }
        levelsup += 1;
        ps = p.parent;
    }
    Ok(None)
}

/// The error for a qualifier that names nothing visible. Distinguishes an
/// entry that exists but is hidden from one that does not exist at all.
pub(crate) fn error_missing_rte(pstate: &ParseState<'_>, refname: &str, location: Location) -> AnalyzeError {
    let mut ps: Option<&ParseState<'_>> = Some(pstate);
    while let Some(p) = ps {
        if p.rtable.iter().any(|r| r.refname() == refname) {
            return AnalyzeError::undefined_table(format!(
                "invalid reference to FROM-clause entry for table \"{refname}\""
            ))
            .with_hint(format!(
                "There is an entry for table \"{refname}\", but it cannot be referenced from this part of the query."
            ))
            .at(location);
        }
        ps = p.parent;
    }
    AnalyzeError::undefined_table(format!("missing FROM-clause entry for table \"{refname}\"")).at(location)
}

/// Error for an unknown column of a known entry.
pub(crate) fn error_missing_column(
    pstate: &ParseState<'_>,
    relname: Option<&str>,
    colname: &str,
    location: Location,
) -> AnalyzeError {
    match relname {
        Some(rel) => AnalyzeError::undefined_column(format!(
            "column {rel}.{colname} does not exist"
        ))
        .at(location),
        None => {
            // Hint at a column hidden from this part of the query.
            let hidden = pstate.rtable.iter().any(|rte| rte.eref.colnames.iter().any(|c| c == colname));
            let err = AnalyzeError::undefined_column(format!("column \"{colname}\" does not exist")).at(location);
            if hidden {
                err.with_hint(format!(
                    "There is a column named \"{colname}\" in a table, but it cannot be referenced from this part of the query."
                ))
            } else {
                err
            }
        }
    }
}

/// Human-readable type name, for messages.
pub(crate) fn type_name(pstate: &ParseState<'_>, type_oid: Oid) -> String {
    if type_oid == INVALID_OID {
        return "-".to_string();
    }
    format_type(pstate.catalog(), type_oid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::parse_state::ParamTypes;
    use crate::analyze::AnalyzeEnv;
    use crate::catalog::{MemoryCatalog, types};
    use crate::config::{AnalyzerConfig, Grammar};
    use crate::session::Session;

    fn fixture() -> (MemoryCatalog, AnalyzerConfig, Session) {
        let mut cat = MemoryCatalog::new();
        cat.add_table("t", &[("a", types::INT4), ("b", types::TEXT)]);
        cat.add_table("u", &[("a", types::INT8), ("c", types::DATE)]);
        (cat, AnalyzerConfig::default(), Session::default())
    }

    #[test]
    fn test_add_relation_and_resolve_column() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        let rti = add_range_table_entry(&mut ps, &RangeVar::new("t"), true).unwrap();
        add_rte_to_query(&mut ps, rti, true, true, true);
        let (var, levelsup) = col_name_to_var(&ps, "b", None).unwrap().unwrap();
        assert_eq!(levelsup, 0);
        assert_eq!(var.type_oid(), types::TEXT);
        assert!(col_name_to_var(&ps, "zz", None).unwrap().is_none());
        assert_eq!(ps.rte(rti).unwrap().required_perms, AclMode::SELECT);
    }

    #[test]
    fn test_ambiguous_column() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        for name in ["t", "u"] {
            let rti = add_range_table_entry(&mut ps, &RangeVar::new(name), true).unwrap();
            add_rte_to_query(&mut ps, rti, true, true, true);
        }
        let err = col_name_to_var(&ps, "a", Some(7)).unwrap_err();
        assert_eq!(err.message(), "column reference \"a\" is ambiguous");
        assert_eq!(err.location(), Some(7));
        assert!(col_name_to_var(&ps, "c", None).unwrap().is_some());
    }

    #[test]
    fn test_alias_columns_and_system_columns() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        let mut rv = RangeVar::new("t");
        rv.alias = Some(Alias::with_columns("x", &["p"]));
        let rti = add_range_table_entry(&mut ps, &rv, true).unwrap();
        add_rte_to_query(&mut ps, rti, true, true, true);
        assert_eq!(ps.rte(rti).unwrap().eref.colnames, vec!["p", "b"]);
        let (ctid, _) = col_name_to_var(&ps, "ctid", None).unwrap().unwrap();
        assert_eq!(ctid.type_oid(), types::TID);
        assert_eq!(refname_range_table_entry(&ps, None, "x", None).unwrap(), Some((rti, 0)));
        assert_eq!(refname_range_table_entry(&ps, None, "t", None).unwrap(), None);

        rv.alias = Some(Alias::with_columns("y", &["p", "q", "r"]));
        let err = add_range_table_entry(&mut ps, &rv, true).unwrap_err();
        assert_eq!(err.message(), "table \"y\" has 2 columns available but 3 columns specified");
    }

    #[test]
    fn test_namespace_conflicts() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        let a = add_range_table_entry(&mut ps, &RangeVar::new("t"), true).unwrap();
        let b = add_range_table_entry(&mut ps, &RangeVar::new("t"), true).unwrap();
        let na = [NamespaceItem::new(a, true, true)];
        let nb = [NamespaceItem::new(b, true, true)];
        let err = check_namespace_conflicts(&ps, &na, &nb).unwrap_err();
        assert_eq!(err.message(), "table name \"t\" specified more than once");
    }

    #[test]
    fn test_missing_rte_messages() {
        let (cat, config, session) = fixture();
        let env = AnalyzeEnv::new(&cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        add_range_table_entry(&mut ps, &RangeVar::new("t"), true).unwrap();
        assert_eq!(
            error_missing_rte(&ps, "t", None).message(),
            "invalid reference to FROM-clause entry for table \"t\""
        );
        assert_eq!(
            error_missing_rte(&ps, "zz", None).message(),
            "missing FROM-clause entry for table \"zz\""
        );
    }
}
