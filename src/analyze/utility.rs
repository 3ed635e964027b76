//! DECLARE CURSOR, EXPLAIN and CREATE TABLE AS.
//!
//! All three analyze an inner statement now, not at execution time, so that
//! locks and hooks fire when the outer statement is analyzed.

use tracing::trace;

use crate::analyze::parse_state::ParseState;
use crate::analyze::{transform_stmt, transform_top_level_stmt};
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::nodes::primnodes::Expr;
use crate::nodes::query::{CmdType, Query, RteKind, UtilityPayload};
use crate::nodes::raw::{CreateTableAsStmt, DeclareCursorStmt, ExplainStmt, ObjectKind, Persistence, RawStmt};

/// True if executing `stmt` needs a snapshot: every optimizable statement
/// and every utility that wraps one.
pub fn requires_snapshot(stmt: &RawStmt) -> bool {
    !matches!(stmt, RawStmt::Utility(_))
}

fn utility_query(payload: UtilityPayload) -> Query {
    let mut q = Query::new(CmdType::Utility);
    q.utility_stmt = Some(Box::new(payload));
    q
}

pub(crate) fn transform_declare_cursor_stmt(
    pstate: &mut ParseState<'_>,
    stmt: &DeclareCursorStmt,
) -> AnalyzeResult<Query> {
    if stmt.options.scroll && stmt.options.no_scroll {
        return Err(AnalyzeError::invalid_cursor_definition(
            "cannot specify both SCROLL and NO SCROLL",
        ));
    }

    let mut result = transform_stmt(pstate, &stmt.query)?;
    if result.command_type != CmdType::Select || result.utility_stmt.is_some() {
        return Err(AnalyzeError::internal("unexpected non-SELECT command in DECLARE CURSOR"));
    }
    if result.has_modifying_cte {
        return Err(AnalyzeError::feature_not_supported(
            "DECLARE CURSOR must not contain data-modifying statements in WITH",
        ));
    }

    if let Some(mark) = result.row_marks.first() {
        let strength = mark.strength.as_str();
        let conflict = if stmt.options.hold {
            Some(("DECLARE CURSOR WITH HOLD", "Holdable cursors must be READ ONLY."))
        } else if stmt.options.scroll {
            Some(("DECLARE SCROLL CURSOR", "Scrollable cursors must be READ ONLY."))
        } else if stmt.options.insensitive {
            Some(("DECLARE INSENSITIVE CURSOR", "Insensitive cursors must be READ ONLY."))
        } else {
            None
        };
        if let Some((what, detail)) = conflict {
            return Err(
                AnalyzeError::feature_not_supported(format!("{what} ... {strength} is not supported"))
                    .with_detail(detail),
            );
        }
    }

    trace!(portal = %stmt.portal_name, "declare cursor");
    result.utility_stmt = Some(Box::new(UtilityPayload::DeclareCursor {
        portal_name: stmt.portal_name.clone(),
        options: stmt.options,
    }));
    Ok(result)
}

/// The inner statement is analyzed as a top-level one, so `EXPLAIN SELECT
/// ... INTO` is accepted.
pub(crate) fn transform_explain_stmt(pstate: &mut ParseState<'_>, stmt: &ExplainStmt) -> AnalyzeResult<Query> {
    let inner = transform_top_level_stmt(pstate, &stmt.query)?;
    Ok(utility_query(UtilityPayload::Explain {
        query: Box::new(inner),
        options: stmt.options.clone(),
    }))
}

fn uses_temp_relation(query: &Query) -> bool {
    let direct = query
        .rtable
        .iter()
        .any(|rte| matches!(rte.kind, RteKind::Relation { is_temp: true, .. }));
    if direct || query.child_queries().into_iter().any(uses_temp_relation) {
        return true;
    }
    let mut found = false;
    query.for_each_expr(&mut |e| {
        found = found
            || e.any(&mut |node| matches!(node, Expr::SubLink(s) if uses_temp_relation(&s.subselect)));
    });
    found
}

fn contains_params(query: &Query) -> bool {
    query.any_expr_with_depth(0, &mut |e, _| matches!(e, Expr::Param(_)))
}

pub(crate) fn transform_create_table_as_stmt(
    pstate: &mut ParseState<'_>,
    stmt: &CreateTableAsStmt,
) -> AnalyzeResult<Query> {
    let query = transform_stmt(pstate, &stmt.query)?;

    let view_query = match stmt.relkind {
        ObjectKind::Table => None,
        ObjectKind::MatView => {
            if query.has_modifying_cte {
                return Err(AnalyzeError::feature_not_supported(
                    "materialized views must not use data-modifying statements in WITH",
                ));
            }
            if uses_temp_relation(&query) {
                return Err(AnalyzeError::feature_not_supported(
                    "materialized views must not use temporary tables or views",
                ));
            }
            if contains_params(&query) {
                return Err(AnalyzeError::feature_not_supported(
                    "materialized views may not be defined using bound parameters",
                ));
            }
            if stmt.into.persistence == Persistence::Unlogged {
                return Err(AnalyzeError::feature_not_supported("materialized views cannot be UNLOGGED"));
            }
            Some(Box::new(query.clone()))
        }
    };

    Ok(utility_query(UtilityPayload::CreateTableAs {
        query: Box::new(query),
        into: stmt.into.clone(),
        relkind: stmt.relkind,
        is_select_into: stmt.is_select_into,
        view_query,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::AnalyzeEnv;
    use crate::analyze::parse_state::ParamTypes;
    use crate::catalog::{MemoryCatalog, types};
    use crate::config::{AnalyzerConfig, Grammar};
    use crate::nodes::query::LockClauseStrength;
    use crate::nodes::raw::{
        CursorOptions, FromItem, IntoClause, LockingClause, RangeVar, RawExpr, ResTarget, SelectStmt, UtilityStmt,
    };
    use crate::session::Session;

    fn catalog() -> MemoryCatalog {
        let mut cat = MemoryCatalog::new();
        cat.add_table("t", &[("a", types::INT4)]);
        cat.add_temp_table("tmp", &[("a", types::INT4)]);
        cat
    }

    fn run(cat: &MemoryCatalog, stmt: &RawStmt) -> AnalyzeResult<Query> {
        let config = AnalyzerConfig::default();
        let session = Session::default();
        let env = AnalyzeEnv::new(cat, &config, &session);
        let mut ps = ParseState::new(env, "", ParamTypes::Fixed(vec![types::INT4]), Grammar::Postgres);
        transform_stmt(&mut ps, stmt)
    }

    fn select_a(from: &str) -> SelectStmt {
        SelectStmt::select(vec![ResTarget::expr(RawExpr::col("a"))]).from(FromItem::table(from))
    }

    fn cursor(options: CursorOptions, query: SelectStmt) -> RawStmt {
        RawStmt::DeclareCursor(Box::new(DeclareCursorStmt {
            portal_name: "c".to_string(),
            options,
            query: Box::new(query.into_stmt()),
        }))
    }

    fn ctas(relkind: ObjectKind, persistence: Persistence, query: SelectStmt) -> RawStmt {
        RawStmt::CreateTableAs(Box::new(CreateTableAsStmt {
            query: Box::new(query.into_stmt()),
            into: IntoClause {
                rel: RangeVar::new("mv"),
                col_names: Vec::new(),
                persistence,
                location: None,
            },
            relkind,
            is_select_into: false,
        }))
    }

    #[test]
    fn test_requires_snapshot() {
        assert!(requires_snapshot(&select_a("t").into_stmt()));
        assert!(!requires_snapshot(&RawStmt::Utility(UtilityStmt::Other { tag: "VACUUM".into() })));
    }

    #[test]
    fn test_declare_cursor_wraps_select() {
        let cat = catalog();
        let q = run(&cat, &cursor(CursorOptions::default(), select_a("t"))).unwrap();
        assert_eq!(q.command_type, CmdType::Select);
        assert!(matches!(
            q.utility_stmt.as_deref(),
            Some(UtilityPayload::DeclareCursor { portal_name, .. }) if portal_name == "c"
        ));
    }

    #[test]
    fn test_declare_cursor_option_conflicts() {
        let cat = catalog();
        let both = CursorOptions {
            scroll: true,
            no_scroll: true,
            ..Default::default()
        };
        let err = run(&cat, &cursor(both, select_a("t"))).unwrap_err();
        assert_eq!(err.sqlstate(), "42P11");

        let hold = CursorOptions {
            hold: true,
            ..Default::default()
        };
        let locked = select_a("t").lock(LockingClause::new(LockClauseStrength::ForUpdate));
        let err = run(&cat, &cursor(hold, locked)).unwrap_err();
        assert_eq!(err.message(), "DECLARE CURSOR WITH HOLD ... FOR UPDATE is not supported");
        assert_eq!(
            err.diagnostic().and_then(|d| d.detail.as_deref()),
            Some("Holdable cursors must be READ ONLY.")
        );
    }

    #[test]
    fn test_explain_allows_select_into() {
        let cat = catalog();
        let stmt = RawStmt::Explain(Box::new(ExplainStmt {
            query: Box::new(select_a("t").into_table("x").into_stmt()),
            options: vec!["VERBOSE".to_string()],
        }));
        let q = run(&cat, &stmt).unwrap();
        assert_eq!(q.command_type, CmdType::Utility);
        let Some(UtilityPayload::Explain { query, options }) = q.utility_stmt.as_deref() else {
            panic!("expected EXPLAIN payload");
        };
        assert_eq!(options, &["VERBOSE"]);
        assert!(matches!(
            query.utility_stmt.as_deref(),
            Some(UtilityPayload::CreateTableAs { is_select_into: true, .. })
        ));
    }

    #[test]
    fn test_matview_restrictions() {
        let cat = catalog();
        let ok = run(&cat, &ctas(ObjectKind::MatView, Persistence::Permanent, select_a("t"))).unwrap();
        assert!(matches!(
            ok.utility_stmt.as_deref(),
            Some(UtilityPayload::CreateTableAs { view_query: Some(_), .. })
        ));

        let err = run(&cat, &ctas(ObjectKind::MatView, Persistence::Permanent, select_a("tmp"))).unwrap_err();
        assert_eq!(err.message(), "materialized views must not use temporary tables or views");

        let err = run(&cat, &ctas(ObjectKind::MatView, Persistence::Unlogged, select_a("t"))).unwrap_err();
        assert_eq!(err.message(), "materialized views cannot be UNLOGGED");

        let with_param = SelectStmt::select(vec![ResTarget::expr(RawExpr::param(1))]);
        let err = run(&cat, &ctas(ObjectKind::MatView, Persistence::Permanent, with_param)).unwrap_err();
        assert_eq!(err.message(), "materialized views may not be defined using bound parameters");

        // Plain CREATE TABLE AS has none of these restrictions.
        let q = run(&cat, &ctas(ObjectKind::Table, Persistence::Unlogged, select_a("tmp"))).unwrap();
        assert!(matches!(
            q.utility_stmt.as_deref(),
            Some(UtilityPayload::CreateTableAs { view_query: None, .. })
        ));
    }
}
