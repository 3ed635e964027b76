//! Rewrite of Oracle `(+)` outer-join markers into explicit joins.
//!
//! `SELECT ... FROM t1, t2 WHERE t1.a = t2.a(+)` is the old spelling of
//! `t1 LEFT JOIN t2 ON t1.a = t2.a`. After the WHERE clause has been
//! analyzed, every marked conjunct that references two tables is moved
//! into a LEFT join between the FROM items holding them, the marked table
//! on the nullable side. Unmarked conjuncts, and marked ones touching a
//! single table, stay in WHERE. The join list, range table and namespace are then
//! rebuilt so later clauses resolve names against the new join tree.

use tracing::debug;

use crate::analyze::parse_state::{NamespaceItem, ParseState};
use crate::analyze::relation::{add_range_table_entry_for_join, expand_rte};
use crate::error::{AnalyzeError, AnalyzeResult, Location};
use crate::nodes::primnodes::{Expr, contain_outer_join_marker};
use crate::nodes::query::{FromExpr, JoinExpr, JoinNode, JoinType, Query};
use crate::nodes::Index;

const ONLY_ONE_OUTER_TABLE: &str = "a predicate may reference only one outer-joined table";

/// One WHERE conjunct (or a group of them) and the two tables it joins.
/// A zero index means "no table".
#[derive(Debug, Clone)]
struct JoinPredicate {
    expr: Expr,
    jointype: JoinType,
    lrtindex: Index,
    rrtindex: Index,
    location: Location,
}

impl JoinPredicate {
    fn classify(expr: Expr) -> AnalyzeResult<JoinPredicate> {
        let mut pred = JoinPredicate {
            expr: Expr::bool_const(true),
            jointype: JoinType::Inner,
            lrtindex: 0,
            rrtindex: 0,
            location: None,
        };
        pred.visit(&expr)?;
        pred.expr = expr;
        Ok(pred)
    }

    fn visit(&mut self, expr: &Expr) -> AnalyzeResult<()> {
        match expr {
            Expr::OuterJoinMarker(m) => {
                let varno = m.var.varno;
                if self.rrtindex == 0 {
                    self.jointype = JoinType::Left;
                    self.rrtindex = varno;
                    self.location = m.location;
                } else if self.rrtindex != varno {
                    return Err(AnalyzeError::syntax(ONLY_ONE_OUTER_TABLE).at(m.location));
                }
                Ok(())
            }
            Expr::Var(v) if v.varlevelsup == 0 => {
                let varno = v.varno;
                if varno == self.lrtindex || varno == self.rrtindex {
                    return Ok(());
                }
                if self.lrtindex == 0 {
                    self.lrtindex = varno;
                } else if self.rrtindex == 0 && self.jointype == JoinType::Inner {
                    self.rrtindex = varno;
                } else {
                    return Err(AnalyzeError::syntax(ONLY_ONE_OUTER_TABLE).at(self.location.or(v.location)));
                }
                Ok(())
            }
            _ => {
                for child in expr.children() {
                    self.visit(child)?;
                }
                Ok(())
            }
        }
    }

    fn key(&self) -> (JoinType, Index, Index) {
        (self.jointype, self.lrtindex, self.rrtindex)
    }

    /// A marker on the same table as the plain operand joins nothing.
    fn joins_two_tables(&self) -> bool {
        self.lrtindex != 0 && self.rrtindex != 0 && self.lrtindex != self.rrtindex
    }
}

/// Split `quals` into the conjuncts carrying markers, classified and with
/// markers stripped, and the plain conjuncts. Marked conjuncts joining the
/// same pair of tables are ANDed together.
fn collect_join_predicates(quals: Expr) -> AnalyzeResult<(Vec<JoinPredicate>, Vec<Expr>)> {
    let (marked, plain): (Vec<Expr>, Vec<Expr>) = quals.into_conjuncts().into_iter().partition(contain_outer_join_marker);

    let mut result: Vec<JoinPredicate> = Vec::new();
    for expr in marked {
        let mut pred = JoinPredicate::classify(expr)?;
        pred.expr.strip_outer_join_markers();
        match result.iter_mut().find(|p| p.key() == pred.key()) {
            Some(existing) => {
                let mut conjuncts = std::mem::replace(&mut existing.expr, Expr::bool_const(true)).into_conjuncts();
                conjuncts.push(pred.expr);
                existing.expr = Expr::and_of(conjuncts).unwrap_or_else(|| Expr::bool_const(true));
            }
            None => result.push(pred),
        }
    }
    Ok((result, plain))
}

/// What a search of one join-tree node found.
enum Placement {
    /// The predicate was attached to a join inside the node.
    Placed,
    /// Not placed; reports whether each endpoint lies inside the node.
    Contains { left: bool, right: bool },
}

fn and_into(quals: &mut Option<Expr>, expr: Expr) {
    let mut conjuncts = quals.take().map(Expr::into_conjuncts).unwrap_or_default();
    conjuncts.push(expr);
    *quals = Expr::and_of(conjuncts);
}

/// Attach `pred` to the deepest existing join holding both endpoints.
fn place_in_node(node: &mut JoinNode, pred: &JoinPredicate) -> AnalyzeResult<Placement> {
    match node {
        JoinNode::RangeTblRef(rti) => Ok(Placement::Contains {
            left: *rti == pred.lrtindex,
            right: *rti == pred.rrtindex,
        }),
        JoinNode::Join(j) => {
            let (mut left, mut right) = (j.rtindex == pred.lrtindex, j.rtindex == pred.rrtindex);
            for child in [&mut j.larg, &mut j.rarg] {
                match place_in_node(child, pred)? {
                    Placement::Placed => return Ok(Placement::Placed),
                    Placement::Contains { left: l, right: r } => {
                        left |= l;
                        right |= r;
                    }
                }
            }
            if !(left && right) {
                return Ok(Placement::Contains { left, right });
            }
            if pred.jointype == JoinType::Left && !matches!(j.jointype, JoinType::Left | JoinType::Right) {
                return Err(AnalyzeError::syntax(ONLY_ONE_OUTER_TABLE).at(pred.location));
            }
            and_into(&mut j.quals, pred.expr.clone());
            Ok(Placement::Placed)
        }
        JoinNode::From(f) => {
            if place_in_list(&mut f.fromlist, pred)? {
                return Ok(Placement::Placed);
            }
            Ok(Placement::Contains {
                left: f.fromlist.iter().any(|n| n.contains_rtindex(pred.lrtindex)),
                right: f.fromlist.iter().any(|n| n.contains_rtindex(pred.rrtindex)),
            })
        }
    }
}

/// Place `pred` somewhere in a FROM list. When no single item holds both
/// endpoints, the two items holding them are replaced by a new join.
fn place_in_list(fromlist: &mut Vec<JoinNode>, pred: &JoinPredicate) -> AnalyzeResult<bool> {
    let (mut l_item, mut r_item) = (None, None);
    for (i, item) in fromlist.iter_mut().enumerate() {
        match place_in_node(item, pred)? {
            Placement::Placed => return Ok(true),
            Placement::Contains { left, right } => {
                if left {
                    l_item = Some(i);
                }
                if right {
                    r_item = Some(i);
                }
            }
        }
        if l_item.is_some() && r_item.is_some() {
            break;
        }
    }
    let (Some(li), Some(ri)) = (l_item, r_item) else {
        return Ok(false);
    };
    if li == ri {
        return Ok(false);
    }
    // Remove the later position first so the earlier one stays valid.
    let (larg, rarg) = if li > ri {
        let l = fromlist.remove(li);
        (l, fromlist.remove(ri))
    } else {
        let r = fromlist.remove(ri);
        (fromlist.remove(li), r)
    };
    fromlist.push(JoinNode::Join(Box::new(JoinExpr {
        jointype: pred.jointype,
        is_natural: false,
        larg,
        rarg,
        using: Vec::new(),
        quals: Some(pred.expr.clone()),
        alias: None,
        rtindex: 0,
    })));
    Ok(true)
}

/// Give every join created by [`place_in_list`] a range-table entry and
/// compute the namespace of `node`. Returns the index whose columns the
/// node exposes.
fn register_new_joins(
    pstate: &mut ParseState<'_>,
    node: &mut JoinNode,
    saved: &[NamespaceItem],
) -> AnalyzeResult<(Index, Vec<NamespaceItem>)> {
    let existing = |node: &JoinNode| {
        let rtis = node.rtindexes();
        saved.iter().filter(|n| rtis.contains(&n.rtindex)).copied().collect::<Vec<_>>()
    };
    let registered = match &*node {
        JoinNode::RangeTblRef(rti) => Some(*rti),
        JoinNode::Join(j) if j.rtindex != 0 => Some(j.rtindex),
        _ => None,
    };
    if let Some(rtindex) = registered {
        return Ok((rtindex, existing(&*node)));
    }
    match node {
        JoinNode::Join(j) => {
            let (l_index, mut namespace) = register_new_joins(pstate, &mut j.larg, saved)?;
            let (r_index, r_namespace) = register_new_joins(pstate, &mut j.rarg, saved)?;
            let mut columns = expand_rte(pstate, l_index, 0, None)?;
            columns.extend(expand_rte(pstate, r_index, 0, None)?);
            let (colnames, aliasvars) = columns.into_iter().unzip();

            let rtindex = add_range_table_entry_for_join(pstate, colnames, j.jointype, aliasvars, None, true)?;
            j.rtindex = rtindex;
            if pstate.joinexprs.len() < rtindex {
                pstate.joinexprs.resize(rtindex, None);
            }
            pstate.joinexprs[rtindex - 1] = Some((**j).clone());

            namespace.extend(r_namespace);
            for item in &mut namespace {
                item.cols_visible = false;
            }
            namespace.push(NamespaceItem::new(rtindex, false, true));
            Ok((rtindex, namespace))
        }
        _ => Err(AnalyzeError::internal("unexpected FROM list inside the join list")),
    }
}

/// Rewrite `(+)` markers in an analyzed WHERE clause into joins. Returns
/// what is left of the WHERE clause.
pub(crate) fn transform_outer_join_markers(
    pstate: &mut ParseState<'_>,
    quals: Option<Expr>,
) -> AnalyzeResult<Option<Expr>> {
    let Some(mut quals) = quals else {
        return Ok(None);
    };
    if pstate.joinlist.is_empty() || !contain_outer_join_marker(&quals) {
        return Ok(Some(quals));
    }
    if pstate.joinlist.len() == 1 {
        // A single FROM item has nothing to join with.
        quals.strip_outer_join_markers();
        return Ok(Some(quals));
    }

    let (predicates, mut residual) = collect_join_predicates(quals)?;
    let mut fromlist = std::mem::take(&mut pstate.joinlist);
    for pred in predicates {
        if !pred.joins_two_tables() {
            residual.extend(pred.expr.into_conjuncts());
            continue;
        }
        debug!(
            jointype = ?pred.jointype,
            left = pred.lrtindex,
            right = pred.rrtindex,
            "moving WHERE predicate into join"
        );
        if !place_in_list(&mut fromlist, &pred)? {
            return Err(AnalyzeError::internal("move filter qual to join filter failed"));
        }
    }

    let saved = std::mem::take(&mut pstate.namespace);
    let mut namespace = Vec::with_capacity(saved.len());
    for node in &mut fromlist {
        let (_, items) = register_new_joins(pstate, node, &saved)?;
        namespace.extend(items);
    }
    pstate.namespace = namespace;
    pstate.joinlist = fromlist;
    Ok(Expr::and_of(residual))
}

/// Check `(+)` markers written inside explicit `JOIN ... ON` clauses
/// against the join type, then strip every remaining marker from the
/// join tree.
fn check_join_node(node: &mut JoinNode) -> AnalyzeResult<()> {
    match node {
        JoinNode::RangeTblRef(_) => Ok(()),
        JoinNode::Join(j) => {
            check_join_node(&mut j.larg)?;
            check_join_node(&mut j.rarg)?;
            let Some(quals) = j.quals.as_mut() else {
                return Ok(());
            };
            if !contain_outer_join_marker(quals) {
                return Ok(());
            }
            let pred = JoinPredicate::classify(quals.clone())?;
            if pred.jointype != JoinType::Inner {
                let side_is = |side: &JoinNode, rti: Index| matches!(side, JoinNode::RangeTblRef(r) if *r == rti);
                let bad = (side_is(&j.larg, pred.lrtindex) && j.jointype != JoinType::Left)
                    || (side_is(&j.larg, pred.rrtindex) && j.jointype != JoinType::Right)
                    || (side_is(&j.rarg, pred.lrtindex) && j.jointype != JoinType::Right)
                    || (side_is(&j.rarg, pred.rrtindex) && j.jointype != JoinType::Left);
                if bad {
                    return Err(
                        AnalyzeError::syntax("a predicate may reference only on outer-joined table").at(pred.location)
                    );
                }
            }
            quals.strip_outer_join_markers();
            Ok(())
        }
        JoinNode::From(f) => check_from_expr(f),
    }
}

fn check_from_expr(from: &mut FromExpr) -> AnalyzeResult<()> {
    for item in &mut from.fromlist {
        check_join_node(item)?;
    }
    if let Some(quals) = from.quals.as_mut() {
        quals.strip_outer_join_markers();
    }
    Ok(())
}

/// Validate and strip `(+)` markers in the join tree of `query` and of
/// every query nested in it.
pub(crate) fn check_joinon_column_join(query: &mut Query) -> AnalyzeResult<()> {
    let mut result = Ok(());
    query.walk_queries_mut(&mut |q| {
        if result.is_ok() {
            if let Some(jointree) = q.jointree.as_mut() {
                result = check_from_expr(jointree);
            }
        }
    });
    result
}
