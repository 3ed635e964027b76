//! WITH clause analysis.
//!
//! Each WITH item becomes a [`CommonTableExpr`] shared through a [`CteRef`]
//! handle in the level's CTE namespace. Plain WITH items are analyzed in
//! order and each can see the ones before it. Under `WITH RECURSIVE` every
//! item is visible to every other; items are analyzed in dependency order,
//! and a self-referencing item must have the form
//! `non-recursive-term UNION [ALL] recursive-term`. Its output columns are
//! fixed from the non-recursive term before the recursive term is analyzed.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use crate::analyze::collation::collation_name;
use crate::analyze::parse_state::{CteRef, ParseState};
use crate::analyze::parse_sub_analyze;
use crate::analyze::relation::{query_output_columns, type_name};
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::nodes::query::{CmdType, CommonTableExpr, Query, TargetEntry};
use crate::nodes::Oid;
use crate::nodes::raw::{FromItem, RawCte, RawExpr, RawStmt, SelectStmt, SetOpKind, WithClause};

// ── Reference discovery ────────────────────────────────────────────────────

/// Collects which of `names` a raw statement refers to as FROM items.
/// Names redefined by a nested WITH are hidden inside that statement.
struct CteRefFinder<'n> {
    names: &'n [String],
    shadowed: Vec<String>,
    found: BTreeSet<usize>,
}

impl CteRefFinder<'_> {
    fn stmt(&mut self, stmt: &RawStmt) {
        match stmt {
            RawStmt::Select(s) => self.select(s),
            RawStmt::Insert(i) => {
                let pushed = self.push_with(i.with_clause.as_ref());
                if let Some(s) = &i.select {
                    self.select(s);
                }
                self.shadowed.truncate(self.shadowed.len() - pushed);
            }
            RawStmt::Update(u) => {
                let pushed = self.push_with(u.with_clause.as_ref());
                u.from_clause.iter().for_each(|f| self.from_item(f));
                u.target_list.iter().filter_map(|t| t.val.as_ref()).for_each(|e| self.expr(e));
                if let Some(w) = &u.where_clause {
                    self.expr(w);
                }
                self.shadowed.truncate(self.shadowed.len() - pushed);
            }
            RawStmt::Delete(d) => {
                let pushed = self.push_with(d.with_clause.as_ref());
                d.using_clause.iter().for_each(|f| self.from_item(f));
                if let Some(w) = &d.where_clause {
                    self.expr(w);
                }
                self.shadowed.truncate(self.shadowed.len() - pushed);
            }
            _ => {}
        }
    }

    fn push_with(&mut self, with: Option<&WithClause>) -> usize {
        let Some(with) = with else { return 0 };
        let before = self.shadowed.len();
        // A body sees the items before it, or all of them under RECURSIVE.
        for (i, cte) in with.ctes.iter().enumerate() {
            let visible = if with.recursive { with.ctes.len() } else { i };
            self.shadowed.extend(with.ctes[..visible].iter().map(|c| c.name.clone()));
            self.stmt(&cte.query);
            self.shadowed.truncate(before);
        }
        self.shadowed.extend(with.ctes.iter().map(|c| c.name.clone()));
        with.ctes.len()
    }

    fn select(&mut self, s: &SelectStmt) {
        let pushed = self.push_with(s.with_clause.as_ref());
        if let Some(l) = &s.larg {
            self.select(l);
        }
        if let Some(r) = &s.rarg {
            self.select(r);
        }
        s.from_clause.iter().for_each(|f| self.from_item(f));
        s.target_list.iter().filter_map(|t| t.val.as_ref()).for_each(|e| self.expr(e));
        s.values_lists.iter().flatten().for_each(|e| self.expr(e));
        for e in [&s.where_clause, &s.having_clause].into_iter().flatten() {
            self.expr(e);
        }
        s.group_clause.iter().for_each(|e| self.expr(e));
        s.sort_clause.iter().for_each(|sb| self.expr(&sb.node));
        self.shadowed.truncate(self.shadowed.len() - pushed);
    }

    fn from_item(&mut self, item: &FromItem) {
        match item {
            FromItem::Relation(rv) => {
                if rv.schema.is_none() && !self.shadowed.contains(&rv.relname) {
                    if let Some(i) = self.names.iter().position(|n| *n == rv.relname) {
                        self.found.insert(i);
                    }
                }
            }
            FromItem::Subselect { subquery, .. } => self.select(subquery),
            FromItem::Function { call, .. } => self.expr(call),
            FromItem::Join(j) => {
                self.from_item(&j.larg);
                self.from_item(&j.rarg);
                if let Some(q) = &j.quals {
                    self.expr(q);
                }
            }
        }
    }

    fn expr(&mut self, e: &RawExpr) {
        match e {
            RawExpr::SubLink { testexpr, subselect, .. } => {
                if let Some(t) = testexpr {
                    self.expr(t);
                }
                self.select(subselect);
            }
            RawExpr::OuterJoinMarker { column, .. } => self.expr(column),
            RawExpr::Op { left, right, .. } => {
                if let Some(l) = left {
                    self.expr(l);
                }
                self.expr(right);
            }
            RawExpr::Bool { args, .. } | RawExpr::Row { args, .. } => args.iter().for_each(|a| self.expr(a)),
            RawExpr::FuncCall { args, over, .. } => {
                args.iter().for_each(|a| self.expr(a));
                if let Some(w) = over {
                    w.partition_clause.iter().for_each(|a| self.expr(a));
                    w.order_clause.iter().for_each(|sb| self.expr(&sb.node));
                }
            }
            RawExpr::TypeCast { arg, .. } | RawExpr::Collate { arg, .. } | RawExpr::NullTest { arg, .. } => {
                self.expr(arg)
            }
            RawExpr::ColumnRef { .. }
            | RawExpr::Const { .. }
            | RawExpr::Param { .. }
            | RawExpr::Default { .. }
            | RawExpr::Rownum { .. } => {}
        }
    }
}

/// Indexes of the WITH items (by position in `names`) that `stmt` refers to.
fn referenced_ctes(stmt: &RawStmt, names: &[String]) -> BTreeSet<usize> {
    let mut finder = CteRefFinder {
        names,
        shadowed: Vec::new(),
        found: BTreeSet::new(),
    };
    finder.stmt(stmt);
    finder.found
}

/// Order recursive WITH items so every item comes after the ones it uses.
/// Self-references are not dependencies.
fn dependency_order(raw: &[RawCte], deps: &[BTreeSet<usize>]) -> AnalyzeResult<Vec<usize>> {
    let n = raw.len();
    let mut done = vec![false; n];
    let mut order = Vec::with_capacity(n);
    while order.len() < n {
        let next = (0..n).find(|&i| !done[i] && deps[i].iter().all(|&d| d == i || done[d]));
        match next {
            Some(i) => {
                done[i] = true;
                order.push(i);
            }
            None => {
                let stuck = (0..n).find(|&i| !done[i]).unwrap_or(0);
                return Err(
                    AnalyzeError::feature_not_supported("mutual recursion between WITH items is not implemented")
                        .at(raw[stuck].location),
                );
            }
        }
    }
    Ok(order)
}

// ── Analysis ───────────────────────────────────────────────────────────────

/// Check the outer shape of a self-referencing WITH item.
fn check_well_formed_recursion(cte: &RawCte) -> AnalyzeResult<()> {
    let bad_form = || {
        AnalyzeError::invalid_recursion(format!(
            "recursive query \"{}\" does not have the form non-recursive-term UNION [ALL] recursive-term",
            cte.name
        ))
        .at(cte.location)
    };
    let RawStmt::Select(stmt) = cte.query.as_ref() else {
        return Err(bad_form());
    };
    if stmt.op != SetOpKind::Union {
        return Err(bad_form());
    }
    let not_implemented = |what: &str| {
        AnalyzeError::feature_not_supported(format!("{what} in a recursive query is not implemented")).at(cte.location)
    };
    if !stmt.sort_clause.is_empty() {
        return Err(not_implemented("ORDER BY"));
    }
    if stmt.limit_offset.is_some() {
        return Err(not_implemented("OFFSET"));
    }
    if stmt.limit_count.is_some() {
        return Err(not_implemented("LIMIT"));
    }
    if !stmt.locking_clause.is_empty() {
        return Err(not_implemented("FOR UPDATE/SHARE"));
    }
    Ok(())
}

fn columns_available_error(cte: &CommonTableExpr, available: usize) -> AnalyzeError {
    AnalyzeError::invalid_column_reference(format!(
        "WITH query \"{}\" has {available} columns available but {} columns specified",
        cte.ctename,
        cte.aliascolnames.len()
    ))
    .at(cte.location)
}

/// Fill in the output column description of a WITH item from its
/// analyzed body.
fn analyze_cte_target_list(cte: &mut CommonTableExpr, columns: Vec<(String, Oid, i32, Oid)>) -> AnalyzeResult<()> {
    if cte.aliascolnames.len() > columns.len() {
        return Err(columns_available_error(cte, columns.len()));
    }
    let mut names = cte.aliascolnames.clone();
    names.extend(columns.iter().skip(names.len()).map(|(n, ..)| n.clone()));
    cte.ctecolnames = names;
    cte.ctecoltypes = columns.iter().map(|c| c.1).collect();
    cte.ctecoltypmods = columns.iter().map(|c| c.2).collect();
    cte.ctecolcollations = columns.iter().map(|c| c.3).collect();
    Ok(())
}

fn analyze_cte(pstate: &ParseState<'_>, cte_ref: &CteRef, raw: &RawCte) -> AnalyzeResult<()> {
    if !matches!(
        raw.query.as_ref(),
        RawStmt::Select(_) | RawStmt::Insert(_) | RawStmt::Update(_) | RawStmt::Delete(_)
    ) {
        return Err(AnalyzeError::internal("unexpected non-SELECT command in WITH"));
    }
    let query = parse_sub_analyze(&raw.query, pstate, Some(Rc::clone(cte_ref)), false)?;
    if query.utility_stmt.is_some() {
        return Err(AnalyzeError::internal("unexpected utility statement in WITH"));
    }
    let columns = query_output_columns(&query);

    let mut cte = cte_ref.borrow_mut();
    if !cte.cterecursive {
        analyze_cte_target_list(&mut cte, columns)?;
    } else {
        // The non-recursive term fixed the column types; the whole query
        // must agree with them.
        if columns.len() != cte.ctecoltypes.len() {
            return Err(AnalyzeError::internal("wrong number of output columns in WITH"));
        }
        let tlist: Vec<&TargetEntry> = query_output_entries(&query);
        for (i, (_, ty, typmod, coll)) in columns.iter().enumerate() {
            let location = tlist.get(i).and_then(|t| t.expr.location());
            if *ty != cte.ctecoltypes[i] || *typmod != cte.ctecoltypmods[i] {
                return Err(AnalyzeError::datatype_mismatch(format!(
                    "recursive query \"{}\" column {} has type {} in non-recursive term but type {} overall",
                    cte.ctename,
                    i + 1,
                    type_name(pstate, cte.ctecoltypes[i]),
                    type_name(pstate, *ty)
                ))
                .with_hint("Cast the output of the non-recursive term to the correct type.")
                .at(location));
            }
            if *coll != cte.ctecolcollations[i] {
                return Err(AnalyzeError::collation_mismatch(format!(
                    "recursive query \"{}\" column {} has collation \"{}\" in non-recursive term but collation \"{}\" overall",
                    cte.ctename,
                    i + 1,
                    collation_name(cte.ctecolcollations[i]),
                    collation_name(*coll)
                ))
                .with_hint("Use the COLLATE clause to set the collation of the non-recursive term.")
                .at(location));
            }
        }
    }
    cte.ctequery = Some(Box::new(query));
    Ok(())
}

fn query_output_entries(query: &Query) -> Vec<&TargetEntry> {
    let list = match query.command_type {
        CmdType::Insert | CmdType::Update | CmdType::Delete => &query.returning_list,
        _ => &query.target_list,
    };
    list.iter().filter(|t| !t.resjunk).collect()
}

/// Analyze a WITH clause, leaving its items in `pstate`'s CTE namespace.
pub(crate) fn transform_with_clause(pstate: &mut ParseState<'_>, with: &WithClause) -> AnalyzeResult<()> {
    for (i, cte) in with.ctes.iter().enumerate() {
        if let Some(dup) = with.ctes[i + 1..].iter().find(|later| later.name == cte.name) {
            return Err(AnalyzeError::duplicate_alias(format!(
                "WITH query name \"{}\" specified more than once",
                cte.name
            ))
            .at(dup.location));
        }
        if cte.query.is_data_modifying() {
            if pstate.parent.is_some() {
                return Err(AnalyzeError::feature_not_supported(
                    "WITH clause containing a data-modifying statement must be at the top level",
                )
                .at(cte.location));
            }
            pstate.has_modifying_cte = true;
        }
    }

    let refs: Vec<CteRef> = with
        .ctes
        .iter()
        .map(|c| {
            Rc::new(RefCell::new(CommonTableExpr {
                ctename: c.name.clone(),
                aliascolnames: c.aliascolnames.clone(),
                ctequery: None,
                location: c.location,
                cterecursive: false,
                cterefcount: 0,
                ctecolnames: Vec::new(),
                ctecoltypes: Vec::new(),
                ctecoltypmods: Vec::new(),
                ctecolcollations: Vec::new(),
            }))
        })
        .collect();

    if with.recursive {
        let names: Vec<String> = with.ctes.iter().map(|c| c.name.clone()).collect();
        let deps: Vec<BTreeSet<usize>> = with.ctes.iter().map(|c| referenced_ctes(&c.query, &names)).collect();
        for (i, cte) in with.ctes.iter().enumerate() {
            if deps[i].contains(&i) {
                check_well_formed_recursion(cte)?;
                refs[i].borrow_mut().cterecursive = true;
            }
        }
        let order = dependency_order(&with.ctes, &deps)?;
        tracing::trace!(?order, "recursive WITH analysis order");
        pstate.ctenamespace.extend(refs.iter().cloned());
        for i in order {
            analyze_cte(pstate, &refs[i], &with.ctes[i])?;
        }
    } else {
        for (cte_ref, raw) in refs.iter().zip(&with.ctes) {
            analyze_cte(pstate, cte_ref, raw)?;
            pstate.ctenamespace.push(Rc::clone(cte_ref));
        }
    }
    Ok(())
}

/// Fix the output columns of the recursive WITH item being analyzed from
/// its non-recursive term, so the recursive term can refer to it.
pub(crate) fn determine_recursive_col_types(pstate: &ParseState<'_>, nrtargetlist: &[TargetEntry]) -> AnalyzeResult<()> {
    let Some(cte_ref) = &pstate.parent_cte else {
        return Err(AnalyzeError::internal("no recursive WITH item in scope"));
    };
    let columns: Vec<(String, Oid, i32, Oid)> = nrtargetlist
        .iter()
        .filter(|t| !t.resjunk)
        .map(|t| {
            (
                t.resname.clone().unwrap_or_else(|| "?column?".to_string()),
                t.expr.type_oid(),
                t.expr.typmod(),
                t.expr.collation(),
            )
        })
        .collect();
    let mut cte = cte_ref.borrow_mut();
    analyze_cte_target_list(&mut cte, columns)?;
    tracing::trace!(cte = %cte.ctename, columns = ?cte.ctecolnames, "recursive WITH columns fixed");
    Ok(())
}

/// Snapshot of this level's WITH items for the finished query.
pub(crate) fn cte_list(pstate: &ParseState<'_>) -> Vec<CommonTableExpr> {
    pstate.ctenamespace.iter().map(|c| c.borrow().clone()).collect()
}
