//! The query tree: the analyzer's output.
//!
//! A [`Query`] owns every node it references. Range-table entries are
//! addressed by 1-based [`Index`]; the join tree and every `Var` use those
//! indexes instead of pointers, so the tree has no cycles.

use std::collections::BTreeSet;
use std::ops::{BitOr, BitOrAssign};

use serde::Serialize;

use crate::error::Location;
use crate::nodes::primnodes::Expr;
use crate::nodes::raw::{Alias, CursorOptions, IntoClause, ObjectKind, SetOpKind, UtilityStmt};
use crate::nodes::{AttrNumber, Index, Oid};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum CmdType {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
    Utility,
}

/// Where a query came from. The analyzer only produces `Original`; the
/// rewriter marks the queries it generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum QuerySource {
    #[default]
    Original,
    Parser,
    InsteadRule,
    QualInsteadRule,
    NonInsteadRule,
}

/// Row-lock strength. Ordered weakest first so that merging two clauses is
/// a `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LockClauseStrength {
    ForKeyShare,
    ForShare,
    ForNoKeyUpdate,
    ForUpdate,
}

impl LockClauseStrength {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockClauseStrength::ForKeyShare => "FOR KEY SHARE",
            LockClauseStrength::ForShare => "FOR SHARE",
            LockClauseStrength::ForNoKeyUpdate => "FOR NO KEY UPDATE",
            LockClauseStrength::ForUpdate => "FOR UPDATE",
        }
    }
}

impl std::fmt::Display for LockClauseStrength {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Required-permission bitmap of a range-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AclMode(pub u32);

impl AclMode {
    pub const NONE: AclMode = AclMode(0);
    pub const INSERT: AclMode = AclMode(1 << 0);
    pub const SELECT: AclMode = AclMode(1 << 1);
    pub const UPDATE: AclMode = AclMode(1 << 2);
    pub const DELETE: AclMode = AclMode(1 << 3);
    /// Row locking needs the same privilege as UPDATE.
    pub const SELECT_FOR_UPDATE: AclMode = AclMode::UPDATE;

    pub fn contains(self, other: AclMode) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for AclMode {
    type Output = AclMode;
    fn bitor(self, rhs: AclMode) -> AclMode {
        AclMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for AclMode {
    fn bitor_assign(&mut self, rhs: AclMode) {
        self.0 |= rhs.0;
    }
}

// ── Range table ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn is_outer(&self) -> bool {
        !matches!(self, JoinType::Inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RelKind {
    Table,
    View,
    MatView,
    Foreign,
}

/// Variant-specific part of a range-table entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RteKind {
    Relation {
        relid: Oid,
        relkind: RelKind,
        /// The relation is a temporary table.
        is_temp: bool,
    },
    Subquery {
        subquery: Box<Query>,
    },
    Join {
        jointype: JoinType,
        /// One expression per join output column, in `eref.colnames` order.
        joinaliasvars: Vec<Expr>,
    },
    Function {
        funcexpr: Expr,
        coltypes: Vec<Oid>,
        coltypmods: Vec<i32>,
        colcollations: Vec<Oid>,
    },
    Values {
        values_lists: Vec<Vec<Expr>>,
        coltypes: Vec<Oid>,
        coltypmods: Vec<i32>,
        colcollations: Vec<Oid>,
    },
    Cte {
        ctename: String,
        ctelevelsup: u32,
        self_reference: bool,
        coltypes: Vec<Oid>,
        coltypmods: Vec<i32>,
        colcollations: Vec<Oid>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeTblEntry {
    pub kind: RteKind,
    /// The alias as written, if any.
    pub alias: Option<Alias>,
    /// Effective name and column names.
    pub eref: Alias,
    pub lateral: bool,
    pub inh: bool,
    pub in_from_cl: bool,
    pub required_perms: AclMode,
    pub modified_cols: BTreeSet<AttrNumber>,
}

impl RangeTblEntry {
    pub fn new(kind: RteKind, alias: Option<Alias>, eref: Alias) -> Self {
        RangeTblEntry {
            kind,
            alias,
            eref,
            lateral: false,
            inh: false,
            in_from_cl: true,
            required_perms: AclMode::NONE,
            modified_cols: BTreeSet::new(),
        }
    }

    pub fn refname(&self) -> &str {
        &self.eref.aliasname
    }

    pub fn relid(&self) -> Option<Oid> {
        match &self.kind {
            RteKind::Relation { relid, .. } => Some(*relid),
            _ => None,
        }
    }

    pub fn subquery(&self) -> Option<&Query> {
        match &self.kind {
            RteKind::Subquery { subquery } => Some(subquery),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            RteKind::Relation { .. } => "relation",
            RteKind::Subquery { .. } => "subquery",
            RteKind::Join { .. } => "join",
            RteKind::Function { .. } => "function",
            RteKind::Values { .. } => "values",
            RteKind::Cte { .. } => "cte",
        }
    }
}

// ── Join tree ──────────────────────────────────────────────────────────────

/// A node of the join tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum JoinNode {
    RangeTblRef(Index),
    Join(Box<JoinExpr>),
    From(Box<FromExpr>),
}

impl JoinNode {
    /// True if the subtree contains range-table index `rti` as a base
    /// reference or join.
    pub fn contains_rtindex(&self, rti: Index) -> bool {
        match self {
            JoinNode::RangeTblRef(i) => *i == rti,
            JoinNode::Join(j) => {
                j.rtindex == rti || j.larg.contains_rtindex(rti) || j.rarg.contains_rtindex(rti)
            }
            JoinNode::From(f) => f.fromlist.iter().any(|n| n.contains_rtindex(rti)),
        }
    }

    /// Every range-table index referenced by the subtree, joins included.
    pub fn rtindexes(&self) -> Vec<Index> {
        let mut out = Vec::new();
        self.collect_rtindexes(&mut out);
        out
    }

    fn collect_rtindexes(&self, out: &mut Vec<Index>) {
        match self {
            JoinNode::RangeTblRef(i) => out.push(*i),
            JoinNode::Join(j) => {
                j.larg.collect_rtindexes(out);
                j.rarg.collect_rtindexes(out);
                if j.rtindex != 0 {
                    out.push(j.rtindex);
                }
            }
            JoinNode::From(f) => f.fromlist.iter().for_each(|n| n.collect_rtindexes(out)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinExpr {
    pub jointype: JoinType,
    pub is_natural: bool,
    pub larg: JoinNode,
    pub rarg: JoinNode,
    pub using: Vec<String>,
    pub quals: Option<Expr>,
    pub alias: Option<Alias>,
    /// Range-table index of the join's own entry, 0 until one is made.
    pub rtindex: Index,
}

/// The FROM list plus the WHERE qualifier.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct FromExpr {
    pub fromlist: Vec<JoinNode>,
    pub quals: Option<Expr>,
}

// ── Target list and clauses ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetEntry {
    pub expr: Expr,
    pub resno: AttrNumber,
    pub resname: Option<String>,
    /// Non-zero when a sort/group/distinct clause references this entry.
    pub ressortgroupref: Index,
    pub resorigtbl: Oid,
    pub resorigcol: AttrNumber,
    pub resjunk: bool,
}

impl TargetEntry {
    pub fn new(expr: Expr, resno: AttrNumber, resname: Option<String>, resjunk: bool) -> Self {
        TargetEntry {
            expr,
            resno,
            resname,
            ressortgroupref: 0,
            resorigtbl: 0,
            resorigcol: 0,
            resjunk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SortGroupClause {
    pub tle_sort_group_ref: Index,
    pub eqop: Oid,
    /// Zero when the type has no ordering operator.
    pub sortop: Oid,
    pub nulls_first: bool,
    pub hashable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowClause {
    pub name: Option<String>,
    pub refname: Option<String>,
    pub partition_clause: Vec<SortGroupClause>,
    pub order_clause: Vec<SortGroupClause>,
    pub winref: Index,
    pub copied_order: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowMarkClause {
    pub rti: Index,
    pub strength: LockClauseStrength,
    pub no_wait: bool,
    /// True when the mark was inherited from an enclosing query level.
    pub pushed_down: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonTableExpr {
    pub ctename: String,
    pub aliascolnames: Vec<String>,
    pub ctequery: Option<Box<Query>>,
    #[serde(skip_serializing)]
    pub location: Location,
    pub cterecursive: bool,
    pub cterefcount: usize,
    pub ctecolnames: Vec<String>,
    pub ctecoltypes: Vec<Oid>,
    pub ctecoltypmods: Vec<i32>,
    pub ctecolcollations: Vec<Oid>,
}

// ── Set operations ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetOperation {
    pub op: SetOpKind,
    pub all: bool,
    pub larg: SetOpNode,
    pub rarg: SetOpNode,
    pub col_types: Vec<Oid>,
    pub col_typmods: Vec<i32>,
    pub col_collations: Vec<Oid>,
    /// Empty for UNION ALL.
    pub group_clauses: Vec<SortGroupClause>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SetOpNode {
    /// A leaf sub-query, by range-table index.
    Leaf(Index),
    Op(Box<SetOperation>),
}

impl SetOpNode {
    /// Range-table index of the leftmost leaf.
    pub fn leftmost(&self) -> Index {
        match self {
            SetOpNode::Leaf(i) => *i,
            SetOpNode::Op(op) => op.larg.leftmost(),
        }
    }
}

// ── Utility payloads ───────────────────────────────────────────────────────

/// Which kind of node an `EXECUTE DIRECT` runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecNodeType {
    Coordinators,
    Datanodes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecDirectType {
    Local,
    LocalUtility,
    Utility,
    Select,
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CombineType {
    None,
    Sum,
    Same,
}

/// A query shipped verbatim to a remote node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteQuery {
    pub sql_statement: String,
    /// Node indexes within the cluster.
    pub exec_nodes: Vec<usize>,
    pub exec_type: ExecNodeType,
    pub exec_direct_type: ExecDirectType,
    pub combine_type: CombineType,
    pub read_only: bool,
    pub force_autocommit: bool,
    pub is_local: bool,
}

/// Payload of a `UTILITY` query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum UtilityPayload {
    /// The owning query is the cursor's SELECT.
    DeclareCursor {
        portal_name: String,
        options: CursorOptions,
    },
    Explain {
        query: Box<Query>,
        options: Vec<String>,
    },
    CreateTableAs {
        query: Box<Query>,
        into: IntoClause,
        relkind: ObjectKind,
        is_select_into: bool,
        /// Copy of the analyzed query kept for materialized views.
        view_query: Option<Box<Query>>,
    },
    RemoteQuery(RemoteQuery),
    Raw(UtilityStmt),
}

// ── Query ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Query {
    pub command_type: CmdType,
    pub query_source: QuerySource,
    pub can_set_tag: bool,
    pub utility_stmt: Option<Box<UtilityPayload>>,
    pub result_relation: Option<Index>,
    pub has_aggs: bool,
    pub has_window_funcs: bool,
    pub has_sub_links: bool,
    pub has_distinct_on: bool,
    pub has_recursive: bool,
    pub has_modifying_cte: bool,
    pub has_for_update: bool,
    /// Set on a coordinator when the command id must be shipped to the
    /// data nodes.
    pub has_to_save_cmd_id: bool,
    /// EXECUTE DIRECT aimed at this node.
    pub is_local: bool,
    pub cte_list: Vec<CommonTableExpr>,
    pub rtable: Vec<RangeTblEntry>,
    pub jointree: Option<FromExpr>,
    pub target_list: Vec<TargetEntry>,
    pub returning_list: Vec<TargetEntry>,
    pub group_clause: Vec<SortGroupClause>,
    pub having_qual: Option<Expr>,
    pub window_clause: Vec<WindowClause>,
    pub distinct_clause: Vec<SortGroupClause>,
    pub sort_clause: Vec<SortGroupClause>,
    pub limit_offset: Option<Expr>,
    pub limit_count: Option<Expr>,
    pub row_marks: Vec<RowMarkClause>,
    pub set_operations: Option<SetOpNode>,
    /// Original text, kept for EXECUTE DIRECT.
    pub sql_statement: Option<String>,
    /// Fingerprint set by the post-analyze hook.
    #[serde(skip_serializing)]
    pub query_id: Option<u64>,
}

impl Query {
    pub fn new(command_type: CmdType) -> Self {
        Query {
            command_type,
            ..Default::default()
        }
    }

    /// Range-table entry by 1-based index.
    pub fn rte(&self, rti: Index) -> Option<&RangeTblEntry> {
        rti.checked_sub(1).and_then(|i| self.rtable.get(i))
    }

    pub fn rte_mut(&mut self, rti: Index) -> Option<&mut RangeTblEntry> {
        rti.checked_sub(1).and_then(|i| self.rtable.get_mut(i))
    }

    /// Target entry carrying the given sort/group reference.
    pub fn tle_by_sortgroupref(&self, sortgroupref: Index) -> Option<&TargetEntry> {
        self.target_list
            .iter()
            .find(|t| t.ressortgroupref == sortgroupref)
    }

    pub fn quals(&self) -> Option<&Expr> {
        self.jointree.as_ref().and_then(|j| j.quals.as_ref())
    }

    pub fn row_mark(&self, rti: Index) -> Option<&RowMarkClause> {
        self.row_marks.iter().find(|rm| rm.rti == rti)
    }

    /// Call `f` on every expression that belongs to this query level:
    /// target and returning lists, qualifiers, limits, range-table
    /// expressions and join aliases. Nested queries are not entered.
    pub fn for_each_expr(&self, f: &mut dyn FnMut(&Expr)) {
        self.target_list.iter().for_each(|t| f(&t.expr));
        self.returning_list.iter().for_each(|t| f(&t.expr));
        if let Some(jt) = &self.jointree {
            jt.fromlist.iter().for_each(|n| for_each_join_qual(n, f));
            if let Some(q) = &jt.quals {
                f(q);
            }
        }
        for e in [&self.having_qual, &self.limit_offset, &self.limit_count]
            .into_iter()
            .flatten()
        {
            f(e);
        }
        for rte in &self.rtable {
            match &rte.kind {
                RteKind::Function { funcexpr, .. } => f(funcexpr),
                RteKind::Values { values_lists, .. } => {
                    values_lists.iter().flatten().for_each(|e| f(e))
                }
                RteKind::Join { joinaliasvars, .. } => joinaliasvars.iter().for_each(|e| f(e)),
                _ => {}
            }
        }
    }

    /// Queries nested directly in this one: sub-query range-table entries,
    /// CTE bodies and utility-wrapped queries. Sub-links are not included.
    pub fn child_queries(&self) -> Vec<&Query> {
        let mut out: Vec<&Query> = self
            .rtable
            .iter()
            .filter_map(|rte| rte.subquery())
            .collect();
        out.extend(self.cte_list.iter().filter_map(|c| c.ctequery.as_deref()));
        out
    }

    /// Search every expression of this query and of all nested queries.
    /// `f` receives each expression node and its depth below `self`
    /// offset by `depth`.
    pub fn any_expr_with_depth(&self, depth: u32, f: &mut dyn FnMut(&Expr, u32) -> bool) -> bool {
        let mut found = false;
        self.for_each_expr(&mut |e| {
            if !found && crate::nodes::primnodes::search_with_depth(e, depth, &mut *f) {
                found = true;
            }
        });
        found
            || self
                .child_queries()
                .into_iter()
                .any(|q| q.any_expr_with_depth(depth + 1, &mut *f))
    }

    /// Visit this query and every query nested below it (range-table
    /// sub-queries, CTE bodies, sub-links, utility-wrapped queries),
    /// children first.
    pub fn walk_queries_mut(&mut self, f: &mut dyn FnMut(&mut Query)) {
        for rte in &mut self.rtable {
            if let RteKind::Subquery { subquery } = &mut rte.kind {
                subquery.walk_queries_mut(f);
            }
        }
        for cte in &mut self.cte_list {
            if let Some(q) = cte.ctequery.as_deref_mut() {
                q.walk_queries_mut(f);
            }
        }
        self.for_each_expr_mut(&mut |e| {
            e.walk_mut(&mut |node| {
                if let Expr::SubLink(s) = node {
                    s.subselect.walk_queries_mut(&mut *f);
                }
            })
        });
        if let Some(payload) = self.utility_stmt.as_deref_mut() {
            match payload {
                UtilityPayload::Explain { query, .. } => query.walk_queries_mut(f),
                UtilityPayload::CreateTableAs { query, .. } => query.walk_queries_mut(f),
                _ => {}
            }
        }
        f(self);
    }

    /// Mutable counterpart of [`Query::for_each_expr`].
    pub fn for_each_expr_mut(&mut self, f: &mut dyn FnMut(&mut Expr)) {
        self.target_list.iter_mut().for_each(|t| f(&mut t.expr));
        self.returning_list.iter_mut().for_each(|t| f(&mut t.expr));
        if let Some(jt) = &mut self.jointree {
            for node in &mut jt.fromlist {
                for_each_join_qual_mut(node, f);
            }
            if let Some(q) = &mut jt.quals {
                f(q);
            }
        }
        for e in [
            &mut self.having_qual,
            &mut self.limit_offset,
            &mut self.limit_count,
        ]
        .into_iter()
        .flatten()
        {
            f(e);
        }
        for rte in &mut self.rtable {
            match &mut rte.kind {
                RteKind::Function { funcexpr, .. } => f(funcexpr),
                RteKind::Values { values_lists, .. } => {
                    values_lists.iter_mut().flatten().for_each(|e| f(e))
                }
                RteKind::Join { joinaliasvars, .. } => joinaliasvars.iter_mut().for_each(|e| f(e)),
                _ => {}
            }
        }
    }
}

fn for_each_join_qual(node: &JoinNode, f: &mut dyn FnMut(&Expr)) {
    match node {
        JoinNode::RangeTblRef(_) => {}
        JoinNode::Join(j) => {
            for_each_join_qual(&j.larg, f);
            for_each_join_qual(&j.rarg, f);
            if let Some(q) = &j.quals {
                f(q);
            }
        }
        JoinNode::From(fe) => {
            fe.fromlist.iter().for_each(|n| for_each_join_qual(n, f));
            if let Some(q) = &fe.quals {
                f(q);
            }
        }
    }
}

fn for_each_join_qual_mut(node: &mut JoinNode, f: &mut dyn FnMut(&mut Expr)) {
    match node {
        JoinNode::RangeTblRef(_) => {}
        JoinNode::Join(j) => {
            for_each_join_qual_mut(&mut j.larg, f);
            for_each_join_qual_mut(&mut j.rarg, f);
            if let Some(q) = &mut j.quals {
                f(q);
            }
        }
        JoinNode::From(fe) => {
            fe.fromlist.iter_mut().for_each(|n| for_each_join_qual_mut(n, f));
            if let Some(q) = &mut fe.quals {
                f(q);
            }
        }
    }
}
