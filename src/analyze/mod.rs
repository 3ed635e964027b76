//! Semantic analysis: raw parse tree in, query tree out.
//!
//! [`Analyzer`] is the entry point. Each call creates a fresh
//! [`ParseState`], dispatches on the statement kind, runs the dialect
//! rewrites on the finished tree and hands it to the post-analyze hook.
//!
//! # Submodules
//! - `parse_state`: Per-level scope: range table, namespace, flags
//! - `relation`: Range-table entries and name lookup
//! - `expr`: Expression transformer
//! - `coerce`: Type coercion and operator/function resolution
//! - `collation`: Collation derivation
//! - `target`: Target lists, INSERT/UPDATE assignments, RETURNING
//! - `clause`: FROM, WHERE, ORDER/GROUP BY, DISTINCT, LIMIT, WINDOW
//! - `cte`: WITH and recursive CTE typing
//! - `agg`: Aggregate placement checks
//! - `select`: SELECT and VALUES
//! - `setop`: UNION / INTERSECT / EXCEPT
//! - `modify`: INSERT, UPDATE, DELETE
//! - `locking`: FOR UPDATE / FOR SHARE
//! - `outer_join`: `(+)` outer-join rewrite
//! - `rownum`: ROWNUM-to-LIMIT rewrite
//! - `utility`: DECLARE CURSOR, EXPLAIN, CREATE TABLE AS
//! - `exec_direct`: EXECUTE DIRECT
//!
//! # Usage
//! ```ignore
//! let analyzer = Analyzer::new(&catalog, &config, &session);
//! let query = analyzer.analyze(&raw, "SELECT a FROM t", &[])?;
//! ```

pub(crate) mod agg;
pub(crate) mod clause;
pub(crate) mod coerce;
pub(crate) mod collation;
pub(crate) mod cte;
pub(crate) mod exec_direct;
pub(crate) mod expr;
pub mod locking;
pub(crate) mod modify;
pub(crate) mod outer_join;
pub mod parse_state;
pub(crate) mod relation;
pub(crate) mod rownum;
pub(crate) mod select;
pub(crate) mod setop;
pub(crate) mod target;
pub mod utility;

pub use parse_state::{ExprKind, NamespaceItem, ParamTypes, ParseState};
pub use utility::requires_snapshot;

use tracing::{debug, trace, warn};

use crate::analyze::parse_state::CteRef;
use crate::catalog::{Catalog, types};
use crate::config::{AnalyzerConfig, Grammar};
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::hooks::PostAnalyzeHook;
use crate::nodes::Oid;
use crate::nodes::primnodes::Expr;
use crate::nodes::query::{CmdType, Query, QuerySource, UtilityPayload};
use crate::nodes::raw::{CreateTableAsStmt, ObjectKind, RawStmt, SelectStmt, SetOpKind};
use crate::session::Session;

/// Parses SQL text into raw statements. Only EXECUTE DIRECT needs one.
pub trait RawParser {
    fn parse(&self, sql: &str) -> AnalyzeResult<Vec<RawStmt>>;
}

impl<F> RawParser for F
where
    F: Fn(&str) -> AnalyzeResult<Vec<RawStmt>>,
{
    fn parse(&self, sql: &str) -> AnalyzeResult<Vec<RawStmt>> {
        self(sql)
    }
}

/// Collaborators shared by every parse state of one analysis.
#[derive(Clone, Copy)]
pub struct AnalyzeEnv<'a> {
    pub catalog: &'a dyn Catalog,
    pub config: &'a AnalyzerConfig,
    pub session: &'a Session,
    pub parser: Option<&'a dyn RawParser>,
}

impl<'a> AnalyzeEnv<'a> {
    pub fn new(catalog: &'a dyn Catalog, config: &'a AnalyzerConfig, session: &'a Session) -> Self {
        AnalyzeEnv {
            catalog,
            config,
            session,
            parser: None,
        }
    }
}

/// Entry point for analyzing raw statements.
pub struct Analyzer<'a> {
    env: AnalyzeEnv<'a>,
    hook: Option<Box<dyn PostAnalyzeHook + 'a>>,
}

impl<'a> Analyzer<'a> {
    pub fn new(catalog: &'a dyn Catalog, config: &'a AnalyzerConfig, session: &'a Session) -> Self {
        Analyzer {
            env: AnalyzeEnv::new(catalog, config, session),
            hook: None,
        }
    }

    /// Parser used to re-parse EXECUTE DIRECT query text.
    pub fn with_parser(mut self, parser: &'a dyn RawParser) -> Self {
        self.env.parser = Some(parser);
        self
    }

    /// Install the post-parse-analyze hook, replacing any previous one.
    pub fn with_hook(mut self, hook: impl PostAnalyzeHook + 'a) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    /// Analyze `stmt` under the configured grammar with fixed parameter
    /// types.
    pub fn analyze(&self, stmt: &RawStmt, source_text: &str, param_types: &[Oid]) -> AnalyzeResult<Query> {
        self.analyze_for_grammar(stmt, source_text, param_types, self.env.config.grammar)
    }

    /// Analyze under an explicit grammar. The alternate grammar resolves
    /// names with its override search path pushed for the duration of the
    /// call.
    pub fn analyze_for_grammar(
        &self,
        stmt: &RawStmt,
        source_text: &str,
        param_types: &[Oid],
        grammar: Grammar,
    ) -> AnalyzeResult<Query> {
        let (query, _) = self.run(stmt, source_text, ParamTypes::Fixed(param_types.to_vec()), grammar)?;
        Ok(query)
    }

    /// Analyze with parameter types deduced from use. `param_types` holds
    /// the types already known (`UNKNOWN` or absent for the rest); the
    /// completed list is returned with the query.
    pub fn analyze_varparams(
        &self,
        stmt: &RawStmt,
        source_text: &str,
        param_types: &[Oid],
    ) -> AnalyzeResult<(Query, Vec<Oid>)> {
        self.run(
            stmt,
            source_text,
            ParamTypes::Variable(param_types.to_vec()),
            self.env.config.grammar,
        )
    }

    fn run(
        &self,
        stmt: &RawStmt,
        source_text: &str,
        params: ParamTypes,
        grammar: Grammar,
    ) -> AnalyzeResult<(Query, Vec<Oid>)> {
        let config = self.env.config;
        let _search_path = (grammar == Grammar::Oracle)
            .then(|| self.env.session.push_override_search_path(&config.oracle_search_path));

        let varparams = matches!(params, ParamTypes::Variable(_));
        let mut pstate = ParseState::new(self.env, source_text, params, grammar);
        let mut query = transform_top_level_stmt(&mut pstate, stmt)?;

        if grammar == Grammar::Oracle {
            outer_join::check_joinon_column_join(&mut query)?;
            if config.rownum_rewrite {
                rownum::rewrite_rownum_queries(self.env.catalog, &mut query);
            }
        }
        if varparams {
            check_variable_parameters(&pstate, &query)?;
        }

        if config.debug_print_parse {
            match serde_json::to_string_pretty(&query) {
                Ok(tree) => debug!(target: "pg_analyze::parse_tree", "{tree}"),
                Err(e) => warn!(error = %e, "could not serialize query tree"),
            }
        }
        if let Some(hook) = &self.hook {
            hook.post_parse_analyze(&pstate, &mut query);
        }
        Ok((query, pstate.param_types()))
    }
}

/// Fail if a parameter used in `query` never had its type determined.
fn check_variable_parameters(pstate: &ParseState<'_>, query: &Query) -> AnalyzeResult<()> {
    let deduced = pstate.param_types();
    let mut unresolved = None;
    let check = &mut |e: &Expr, _depth: u32| {
        let Expr::Param(p) = e else {
            return false;
        };
        let known = p
            .paramid
            .checked_sub(1)
            .and_then(|i| deduced.get(i))
            .is_some_and(|t| *t != types::UNKNOWN);
        if !known {
            unresolved = Some((p.paramid, p.location));
        }
        !known
    };
    // EXPLAIN and CREATE TABLE AS keep their query in the utility slot.
    let found = query.any_expr_with_depth(0, &mut *check)
        || wrapped_query(query).is_some_and(|inner| inner.any_expr_with_depth(0, &mut *check));
    match unresolved {
        Some((id, location)) if found => Err(AnalyzeError::indeterminate_datatype(format!(
            "could not determine data type of parameter ${id}"
        ))
        .at(location)),
        _ => Ok(()),
    }
}

fn wrapped_query(query: &Query) -> Option<&Query> {
    match query.utility_stmt.as_deref()? {
        UtilityPayload::Explain { query, .. } | UtilityPayload::CreateTableAs { query, .. } => Some(query),
        _ => None,
    }
}

// ── Dispatch ───────────────────────────────────────────────────────────────

fn leftmost_leaf(stmt: &SelectStmt) -> &SelectStmt {
    let mut leaf = stmt;
    while let Some(larg) = leaf.larg.as_deref() {
        leaf = larg;
    }
    leaf
}

fn leftmost_leaf_mut(stmt: &mut SelectStmt) -> &mut SelectStmt {
    match stmt.larg {
        Some(ref mut larg) => leftmost_leaf_mut(larg),
        None => stmt,
    }
}

/// Analyze a statement at the top level of a query. This is the only
/// place `SELECT ... INTO` is accepted: it becomes CREATE TABLE AS.
pub(crate) fn transform_top_level_stmt(pstate: &mut ParseState<'_>, stmt: &RawStmt) -> AnalyzeResult<Query> {
    if let RawStmt::Select(select) = stmt {
        if leftmost_leaf(select).into_clause.is_some() {
            let mut query = select.as_ref().clone();
            let leaf = leftmost_leaf_mut(&mut query);
            if let Some(into) = leaf.into_clause.take() {
                debug!(target_rel = %into.rel.relname, "SELECT INTO lifted to CREATE TABLE AS");
                let ctas = RawStmt::CreateTableAs(Box::new(CreateTableAsStmt {
                    query: Box::new(query.into_stmt()),
                    into,
                    relkind: ObjectKind::Table,
                    is_select_into: true,
                }));
                return transform_stmt(pstate, &ctas);
            }
        }
    }
    transform_stmt(pstate, stmt)
}

/// Dispatch on the statement kind.
pub(crate) fn transform_stmt(pstate: &mut ParseState<'_>, stmt: &RawStmt) -> AnalyzeResult<Query> {
    trace!(tag = stmt.tag(), depth = pstate.depth(), "transform statement");
    let mut result = match stmt {
        RawStmt::Insert(s) => modify::transform_insert_stmt(pstate, s)?,
        RawStmt::Delete(s) => modify::transform_delete_stmt(pstate, s)?,
        RawStmt::Update(s) => modify::transform_update_stmt(pstate, s)?,
        RawStmt::Select(s) => transform_select_family(pstate, s)?,
        RawStmt::DeclareCursor(s) => utility::transform_declare_cursor_stmt(pstate, s)?,
        RawStmt::Explain(s) => utility::transform_explain_stmt(pstate, s)?,
        RawStmt::CreateTableAs(s) => utility::transform_create_table_as_stmt(pstate, s)?,
        RawStmt::ExecDirect(s) => exec_direct::transform_exec_direct_stmt(pstate, s)?,
        RawStmt::Utility(u) => {
            let mut q = Query::new(CmdType::Utility);
            q.utility_stmt = Some(Box::new(UtilityPayload::Raw(u.clone())));
            q
        }
    };
    result.query_source = QuerySource::Original;
    result.can_set_tag = true;
    Ok(result)
}

/// SELECT, VALUES or a set operation.
pub(crate) fn transform_select_family(pstate: &mut ParseState<'_>, stmt: &SelectStmt) -> AnalyzeResult<Query> {
    if !stmt.values_lists.is_empty() {
        select::transform_values_clause(pstate, stmt)
    } else if stmt.op != SetOpKind::None {
        setop::transform_set_operation_stmt(pstate, stmt)
    } else {
        select::transform_select_stmt(pstate, stmt)
    }
}

/// Analyze a nested statement in a child of `pstate`.
pub(crate) fn parse_sub_analyze(
    stmt: &RawStmt,
    pstate: &ParseState<'_>,
    parent_cte: Option<CteRef>,
    locked_from_parent: bool,
) -> AnalyzeResult<Query> {
    let mut child = pstate.child();
    child.parent_cte = parent_cte;
    child.locked_from_parent = locked_from_parent;
    transform_stmt(&mut child, stmt)
}

/// [`parse_sub_analyze`] for a SELECT that is already unwrapped.
pub(crate) fn sub_analyze_select(
    stmt: &SelectStmt,
    pstate: &ParseState<'_>,
    parent_cte: Option<CteRef>,
    locked_from_parent: bool,
) -> AnalyzeResult<Query> {
    let mut child = pstate.child();
    child.parent_cte = parent_cte;
    child.locked_from_parent = locked_from_parent;
    let mut result = transform_select_family(&mut child, stmt)?;
    result.query_source = QuerySource::Original;
    result.can_set_tag = true;
    Ok(result)
}
