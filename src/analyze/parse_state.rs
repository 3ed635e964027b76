//! Parse state, the per-query-level scope of an analysis.
//!
//! One [`ParseState`] exists for each query level being analyzed. Child
//! states hold a shared reference to their parent so name lookup can walk
//! outward (`levelsup`); nothing in a child ever mutates its parent.
//! Parameter types and CTE entries are the two pieces of state that must be
//! visible and updatable across levels, so they sit behind `Rc<RefCell<_>>`.

use std::cell::RefCell;
use std::rc::Rc;

use crate::analyze::{AnalyzeEnv, RawParser};
use crate::catalog::{Catalog, RelationInfo};
use crate::config::{AnalyzerConfig, Grammar};
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::nodes::query::{CommonTableExpr, JoinExpr, JoinNode, RangeTblEntry};
use crate::nodes::raw::{LockingClause, WindowDef};
use crate::nodes::{AttrNumber, Index, Oid};
use crate::session::Session;

/// The clause an expression is being transformed for. Drives placement
/// rules for aggregates, window functions and set-returning functions, and
/// names the clause in error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprKind {
    None,
    JoinOn,
    JoinUsing,
    FromSubselect,
    FromFunction,
    Where,
    Having,
    WindowPartition,
    WindowOrder,
    SelectTarget,
    InsertTarget,
    UpdateSource,
    UpdateTarget,
    GroupBy,
    OrderBy,
    DistinctOn,
    Limit,
    Offset,
    Returning,
    Values,
    ValuesSingle,
}

impl ExprKind {
    /// Clause name as it appears in error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExprKind::None => "this context",
            ExprKind::JoinOn => "JOIN conditions",
            ExprKind::JoinUsing => "USING",
            ExprKind::FromSubselect => "FROM-clause subquery",
            ExprKind::FromFunction => "functions in FROM",
            ExprKind::Where => "WHERE",
            ExprKind::Having => "HAVING",
            ExprKind::WindowPartition => "window PARTITION BY",
            ExprKind::WindowOrder => "window ORDER BY",
            ExprKind::SelectTarget => "SELECT",
            ExprKind::InsertTarget => "INSERT",
            ExprKind::UpdateSource | ExprKind::UpdateTarget => "UPDATE",
            ExprKind::GroupBy => "GROUP BY",
            ExprKind::OrderBy => "ORDER BY",
            ExprKind::DistinctOn => "DISTINCT ON",
            ExprKind::Limit => "LIMIT",
            ExprKind::Offset => "OFFSET",
            ExprKind::Returning => "RETURNING",
            ExprKind::Values | ExprKind::ValuesSingle => "VALUES",
        }
    }

    pub fn allows_aggregates(&self) -> bool {
        !matches!(
            self,
            ExprKind::JoinOn
                | ExprKind::JoinUsing
                | ExprKind::FromFunction
                | ExprKind::Where
                | ExprKind::WindowPartition
                | ExprKind::WindowOrder
                | ExprKind::GroupBy
                | ExprKind::Limit
                | ExprKind::Offset
                | ExprKind::Returning
                | ExprKind::Values
                | ExprKind::UpdateTarget
        )
    }

    pub fn allows_window_functions(&self) -> bool {
        matches!(self, ExprKind::SelectTarget | ExprKind::OrderBy)
    }

    pub fn allows_set_returning(&self) -> bool {
        !matches!(
            self,
            ExprKind::JoinOn
                | ExprKind::JoinUsing
                | ExprKind::Where
                | ExprKind::Having
                | ExprKind::Limit
                | ExprKind::Offset
        )
    }
}

/// How `$n` parameters get their types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamTypes {
    /// Types supplied by the caller; referencing `$n` past the end fails.
    Fixed(Vec<Oid>),
    /// Types deduced from context; unknown entries are `types::UNKNOWN`
    /// until a coercion decides them.
    Variable(Vec<Oid>),
}

impl ParamTypes {
    pub fn types(&self) -> &[Oid] {
        match self {
            ParamTypes::Fixed(t) | ParamTypes::Variable(t) => t,
        }
    }
}

/// A range-table entry made visible for name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceItem {
    pub rtindex: Index,
    /// Visible as a qualifier (`t.x`).
    pub rel_visible: bool,
    /// Visible for unqualified column names.
    pub cols_visible: bool,
    /// Visible only to LATERAL references.
    pub lateral_only: bool,
    /// A LATERAL reference to it is legal.
    pub lateral_ok: bool,
}

impl NamespaceItem {
    pub fn new(rtindex: Index, rel_visible: bool, cols_visible: bool) -> Self {
        NamespaceItem {
            rtindex,
            rel_visible,
            cols_visible,
            lateral_only: false,
            lateral_ok: true,
        }
    }
}

/// Shared handle on a CTE while it is in scope.
pub type CteRef = Rc<RefCell<CommonTableExpr>>;

/// Scope of one query level under analysis.
pub struct ParseState<'a> {
    pub(crate) env: AnalyzeEnv<'a>,
    pub(crate) parent: Option<&'a ParseState<'a>>,
    source_text: &'a str,
    pub(crate) params: Rc<RefCell<ParamTypes>>,

    pub(crate) rtable: Vec<RangeTblEntry>,
    /// Indexed by `rtindex - 1`; `None` for entries that are not joins.
    pub(crate) joinexprs: Vec<Option<JoinExpr>>,
    pub(crate) joinlist: Vec<JoinNode>,
    pub(crate) namespace: Vec<NamespaceItem>,
    pub(crate) lateral_active: bool,

    pub(crate) ctenamespace: Vec<CteRef>,
    pub(crate) parent_cte: Option<CteRef>,

    pub(crate) locking_clause: Vec<LockingClause>,
    pub(crate) locked_from_parent: bool,
    pub(crate) window_defs: Vec<WindowDef>,
    pub(crate) expr_kind: ExprKind,
    pub(crate) next_resno: AttrNumber,

    pub(crate) has_aggs: bool,
    pub(crate) has_window_funcs: bool,
    pub(crate) has_sub_links: bool,
    pub(crate) has_modifying_cte: bool,
    pub(crate) is_insert: bool,
    pub(crate) is_update: bool,
    pub(crate) grammar: Grammar,

    pub(crate) target_rtindex: Option<Index>,
    pub(crate) target_relation: Option<RelationInfo>,
}

impl<'a> ParseState<'a> {
    pub(crate) fn new(
        env: AnalyzeEnv<'a>,
        source_text: &'a str,
        params: ParamTypes,
        grammar: Grammar,
    ) -> Self {
        ParseState {
            env,
            parent: None,
            source_text,
            params: Rc::new(RefCell::new(params)),
            rtable: Vec::new(),
            joinexprs: Vec::new(),
            joinlist: Vec::new(),
            namespace: Vec::new(),
            lateral_active: false,
            ctenamespace: Vec::new(),
            parent_cte: None,
            locking_clause: Vec::new(),
            locked_from_parent: false,
            window_defs: Vec::new(),
            expr_kind: ExprKind::None,
            next_resno: 1,
            has_aggs: false,
            has_window_funcs: false,
            has_sub_links: false,
            has_modifying_cte: false,
            is_insert: false,
            is_update: false,
            grammar,
            target_rtindex: None,
            target_relation: None,
        }
    }

    /// A fresh state for a nested query level. Shares parameters with
    /// `self` and sees `self`'s namespace and CTEs one level up.
    pub(crate) fn child(&self) -> ParseState<'_> {
        let mut child = ParseState::new(self.env, self.source_text, ParamTypes::Fixed(Vec::new()), self.grammar);
        child.params = Rc::clone(&self.params);
        child.parent = Some(self);
        child
    }

    pub fn source_text(&self) -> &str {
        self.source_text
    }

    pub fn grammar(&self) -> Grammar {
        self.grammar
    }

    pub fn catalog(&self) -> &'a dyn Catalog {
        self.env.catalog
    }

    pub fn config(&self) -> &'a AnalyzerConfig {
        self.env.config
    }

    pub fn session(&self) -> &'a Session {
        self.env.session
    }

    pub(crate) fn parser(&self) -> Option<&'a dyn RawParser> {
        self.env.parser
    }

    pub fn range_table(&self) -> &[RangeTblEntry] {
        &self.rtable
    }

    pub fn namespace(&self) -> &[NamespaceItem] {
        &self.namespace
    }

    /// Current parameter types, as deduced so far.
    pub fn param_types(&self) -> Vec<Oid> {
        self.params.borrow().types().to_vec()
    }

    /// Number of enclosing query levels.
    pub fn depth(&self) -> u32 {
        let mut depth = 0;
        let mut p = self.parent;
        while let Some(ps) = p {
            depth += 1;
            p = ps.parent;
        }
        depth
    }

    /// The state `levelsup` levels out from this one.
    pub(crate) fn ancestor(&self, levelsup: u32) -> AnalyzeResult<&ParseState<'a>> {
        let mut ps: &ParseState<'a> = self;
        for _ in 0..levelsup {
            ps = ps
                .parent
                .ok_or_else(|| AnalyzeError::internal(format!("bad levelsup {levelsup}")))?;
        }
        Ok(ps)
    }

    pub(crate) fn rte(&self, rtindex: Index) -> AnalyzeResult<&RangeTblEntry> {
        rtindex
            .checked_sub(1)
            .and_then(|i| self.rtable.get(i))
            .ok_or_else(|| AnalyzeError::internal(format!("invalid range table index {rtindex}")))
    }

    pub(crate) fn rte_mut(&mut self, rtindex: Index) -> AnalyzeResult<&mut RangeTblEntry> {
        rtindex
            .checked_sub(1)
            .and_then(|i| self.rtable.get_mut(i))
            .ok_or_else(|| AnalyzeError::internal(format!("invalid range table index {rtindex}")))
    }

    /// Range-table entry of an enclosing level.
    pub(crate) fn rte_at_level(&self, rtindex: Index, levelsup: u32) -> AnalyzeResult<&RangeTblEntry> {
        self.ancestor(levelsup)?.rte(rtindex)
    }

    /// Set the expression kind for the duration of `f`.
    pub(crate) fn with_expr_kind<T>(
        &mut self,
        kind: ExprKind,
        f: impl FnOnce(&mut Self) -> AnalyzeResult<T>,
    ) -> AnalyzeResult<T> {
        let saved = std::mem::replace(&mut self.expr_kind, kind);
        let result = f(self);
        self.expr_kind = saved;
        result
    }

    /// Find a CTE by name in this or an enclosing level, returning it and
    /// its `levelsup`.
    pub(crate) fn scan_cte(&self, name: &str) -> Option<(CteRef, u32)> {
        let mut levelsup = 0;
        let mut ps: Option<&ParseState<'a>> = Some(self);
        while let Some(p) = ps {
            if let Some(cte) = p.ctenamespace.iter().find(|c| c.borrow().ctename == name) {
                return Some((Rc::clone(cte), levelsup));
            }
            levelsup += 1;
            ps = p.parent;
        }
        None
    }

    /// True if this level or any enclosing one carries a locking clause
    /// that would apply to `refname`.
    pub(crate) fn is_locked_refname(&self, refname: &str) -> bool {
        if self.locked_from_parent {
            return true;
        }
        self.locking_clause.iter().any(|lc| {
            lc.locked_rels.is_empty() || lc.locked_rels.iter().any(|rv| rv.relname == refname)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::nodes::raw::RangeVar;

    #[test]
    fn test_expr_kind_placement_rules() {
        assert!(!ExprKind::Where.allows_aggregates());
        assert!(ExprKind::Having.allows_aggregates());
        assert!(ExprKind::SelectTarget.allows_window_functions());
        assert!(!ExprKind::GroupBy.allows_window_functions());
        assert!(!ExprKind::Where.allows_set_returning());
        assert_eq!(ExprKind::JoinOn.as_str(), "JOIN conditions");
    }

    #[test]
    fn test_child_shares_params_and_depth() {
        let catalog = MemoryCatalog::new();
        let config = AnalyzerConfig::default();
        let session = Session::default();
        let env = AnalyzeEnv::new(&catalog, &config, &session);
        let root = ParseState::new(env, "select 1", ParamTypes::Variable(Vec::new()), Grammar::Postgres);
        let child = root.child();
        assert_eq!(child.depth(), 1);
        *child.params.borrow_mut() = ParamTypes::Variable(vec![23]);
        assert_eq!(root.param_types(), vec![23]);
        assert!(child.ancestor(1).is_ok());
        assert!(child.ancestor(2).is_err());
    }

    #[test]
    fn test_locked_refname() {
        let catalog = MemoryCatalog::new();
        let config = AnalyzerConfig::default();
        let session = Session::default();
        let env = AnalyzeEnv::new(&catalog, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(Vec::new()), Grammar::Postgres);
        assert!(!ps.is_locked_refname("t"));
        ps.locking_clause = vec![LockingClause {
            locked_rels: vec![RangeVar::new("t")],
            strength: crate::nodes::LockClauseStrength::ForUpdate,
            no_wait: false,
        }];
        assert!(ps.is_locked_refname("t"));
        assert!(!ps.is_locked_refname("u"));
    }
}
