//! FOR [KEY] UPDATE / FOR [NO KEY] SHARE resolution.
//!
//! A locking clause names relations by their FROM-clause alias; here the
//! names become row marks on range-table indexes. A clause with no names
//! applies to every plain relation and sub-query of the level, and is
//! pushed down into those sub-queries so each level knows which of its
//! own relations get row-level locks.

use crate::error::{AnalyzeError, AnalyzeResult};
use crate::nodes::primnodes::expression_returns_set;
use crate::nodes::query::{AclMode, LockClauseStrength, Query, RowMarkClause, RteKind};
use crate::nodes::raw::LockingClause;
use crate::nodes::Index;

/// Reject query shapes that cannot lock individual rows. The planner may
/// call this again after rewriting.
pub fn check_select_locking(query: &Query, strength: LockClauseStrength) -> AnalyzeResult<()> {
    let not_allowed = |what: &str| {
        Err(AnalyzeError::feature_not_supported(format!(
            "{strength} is not allowed with {what}"
        )))
    };
    if query.set_operations.is_some() {
        return not_allowed("UNION/INTERSECT/EXCEPT");
    }
    if !query.distinct_clause.is_empty() {
        return not_allowed("DISTINCT clause");
    }
    if !query.group_clause.is_empty() {
        return not_allowed("GROUP BY clause");
    }
    if query.having_qual.is_some() {
        return not_allowed("HAVING clause");
    }
    if query.has_aggs {
        return not_allowed("aggregate functions");
    }
    if query.has_window_funcs {
        return not_allowed("window functions");
    }
    if query.target_list.iter().any(|t| expression_returns_set(&t.expr)) {
        return not_allowed("set-returning functions in the target list");
    }
    Ok(())
}

/// Record a row mark for one range-table entry, merging with an existing
/// mark for the same entry: the stronger lock wins, NOWAIT wins, and an
/// explicit clause overrides a pushed-down one.
pub fn apply_locking_clause(
    query: &mut Query,
    rtindex: Index,
    strength: LockClauseStrength,
    no_wait: bool,
    pushed_down: bool,
) {
    if !pushed_down {
        query.has_for_update = true;
    }
    if let Some(rc) = query.row_marks.iter_mut().find(|rc| rc.rti == rtindex) {
        rc.strength = rc.strength.max(strength);
        rc.no_wait |= no_wait;
        rc.pushed_down &= pushed_down;
        return;
    }
    query.row_marks.push(RowMarkClause {
        rti: rtindex,
        strength,
        no_wait,
        pushed_down,
    });
}

/// Lock one entry if it is lockable. Returns false for entry kinds that an
/// unnamed clause silently skips.
fn lock_entry(query: &mut Query, rtindex: Index, lc: &LockingClause, pushed_down: bool) -> AnalyzeResult<bool> {
    let Some(rte) = query.rte_mut(rtindex) else {
        return Err(AnalyzeError::internal(format!("invalid range table index {rtindex}")));
    };
    match &mut rte.kind {
        RteKind::Relation { .. } => {
            rte.required_perms |= AclMode::SELECT_FOR_UPDATE;
        }
        RteKind::Subquery { subquery } => {
            let all_rels = LockingClause {
                locked_rels: Vec::new(),
                strength: lc.strength,
                no_wait: lc.no_wait,
            };
            transform_locking_clause(subquery, &all_rels, true)?;
        }
        _ => return Ok(false),
    }
    apply_locking_clause(query, rtindex, lc.strength, lc.no_wait, pushed_down);
    Ok(true)
}

/// Turn one locking clause into row marks on `query`.
pub(crate) fn transform_locking_clause(query: &mut Query, lc: &LockingClause, pushed_down: bool) -> AnalyzeResult<()> {
    let strength = lc.strength;
    check_select_locking(query, strength)?;

    if lc.locked_rels.is_empty() {
        for rtindex in 1..=query.rtable.len() {
            lock_entry(query, rtindex, lc, pushed_down)?;
        }
        return Ok(());
    }

    for rv in &lc.locked_rels {
        if rv.is_qualified() {
            return Err(
                AnalyzeError::syntax(format!("{strength} must specify unqualified relation names")).at(rv.location),
            );
        }
        let Some(pos) = query.rtable.iter().position(|rte| rte.refname() == rv.relname) else {
            return Err(AnalyzeError::undefined_table(format!(
                "relation \"{}\" in {strength} clause not found in FROM clause",
                rv.relname
            ))
            .at(rv.location));
        };
        let target = match query.rtable[pos].kind {
            RteKind::Relation { .. } | RteKind::Subquery { .. } => None,
            RteKind::Join { .. } => Some("a join"),
            RteKind::Function { .. } => Some("a function"),
            RteKind::Values { .. } => Some("VALUES"),
            RteKind::Cte { .. } => Some("a WITH query"),
        };
        if let Some(target) = target {
            return Err(
                AnalyzeError::feature_not_supported(format!("{strength} cannot be applied to {target}")).at(rv.location),
            );
        }
        lock_entry(query, pos + 1, lc, pushed_down)?;
    }
    Ok(())
}
