//! `EXECUTE DIRECT ON (node) 'query'`.
//!
//! The query text is parsed and analyzed here on the coordinator. When the
//! node named is this coordinator the analyzed query runs locally;
//! otherwise it is shipped as a [`RemoteQuery`] in the utility slot.

use tracing::debug;

use crate::analyze::parse_state::{ParamTypes, ParseState};
use crate::analyze::transform_top_level_stmt;
use crate::catalog::NodeKind;
use crate::error::{AnalyzeError, AnalyzeResult};
use crate::nodes::query::{CmdType, CombineType, ExecDirectType, ExecNodeType, Query, RemoteQuery, UtilityPayload};
use crate::nodes::raw::{ExecDirectStmt, UtilityStmt};

/// Utilities EXECUTE DIRECT may run outside maintenance mode.
fn is_exec_direct_utility(payload: Option<&UtilityPayload>) -> bool {
    match payload {
        None => true,
        Some(UtilityPayload::Raw(stmt)) => matches!(
            stmt,
            UtilityStmt::CreateTableSpace { .. } | UtilityStmt::DropTableSpace { .. }
        ),
        Some(_) => false,
    }
}

fn exec_direct_type(command: CmdType, is_local: bool) -> ExecDirectType {
    match (command, is_local) {
        (CmdType::Utility, true) => ExecDirectType::LocalUtility,
        (_, true) => ExecDirectType::Local,
        (CmdType::Utility, false) => ExecDirectType::Utility,
        (CmdType::Select, false) => ExecDirectType::Select,
        (CmdType::Insert, false) => ExecDirectType::Insert,
        (CmdType::Update, false) => ExecDirectType::Update,
        (CmdType::Delete, false) => ExecDirectType::Delete,
    }
}

pub(crate) fn transform_exec_direct_stmt(pstate: &ParseState<'_>, stmt: &ExecDirectStmt) -> AnalyzeResult<Query> {
    let config = pstate.config();
    if !config.is_coordinator() {
        return Err(AnalyzeError::feature_not_supported(
            "EXECUTE DIRECT cannot be executed on a Datanode",
        ));
    }
    let node_name = match stmt.node_names.as_slice() {
        [name] => name,
        [] => return Err(AnalyzeError::internal("EXECUTE DIRECT without a target node")),
        _ => {
            return Err(AnalyzeError::feature_not_supported(
                "Support for EXECUTE DIRECT on multiple nodes is not available yet",
            ));
        }
    };
    let node = pstate
        .catalog()
        .cluster_node(node_name)
        .ok_or_else(|| AnalyzeError::undefined_object(format!("PGXC Node {node_name}: object not defined")))?;
    let is_local = node.kind == NodeKind::Coordinator && node.name == pstate.session().node_name();

    let parser = pstate
        .parser()
        .ok_or_else(|| AnalyzeError::internal("EXECUTE DIRECT needs a raw parser"))?;
    let raw = parser.parse(&stmt.query)?;
    let inner = match raw.as_slice() {
        [one] => one,
        [] => return Err(AnalyzeError::internal("EXECUTE DIRECT with an empty query")),
        _ => {
            return Err(AnalyzeError::feature_not_supported(
                "EXECUTE DIRECT cannot execute multiple queries",
            ));
        }
    };

    let mut result = {
        let mut fresh = ParseState::new(pstate.env, &stmt.query, ParamTypes::Fixed(Vec::new()), pstate.grammar());
        transform_top_level_stmt(&mut fresh, inner)?
    };
    result.sql_statement = Some(stmt.query.clone());

    let direct_type = exec_direct_type(result.command_type, is_local);
    debug!(node = %node.name, is_local, ?direct_type, "EXECUTE DIRECT routed");

    if !config.maintenance_mode {
        match direct_type {
            ExecDirectType::Insert | ExecDirectType::Update | ExecDirectType::Delete => {
                return Err(AnalyzeError::feature_not_supported(
                    "EXECUTE DIRECT cannot execute DML queries",
                ));
            }
            ExecDirectType::Utility if !is_exec_direct_utility(result.utility_stmt.as_deref()) => {
                return Err(AnalyzeError::feature_not_supported(
                    "EXECUTE DIRECT cannot execute this utility query",
                ));
            }
            ExecDirectType::LocalUtility => {
                return Err(AnalyzeError::feature_not_supported(
                    "EXECUTE DIRECT cannot execute locally this utility query",
                ));
            }
            _ => {}
        }
    }

    let step = RemoteQuery {
        sql_statement: stmt.query.clone(),
        exec_nodes: vec![node.index],
        exec_type: match node.kind {
            NodeKind::Coordinator => ExecNodeType::Coordinators,
            NodeKind::Datanode => ExecNodeType::Datanodes,
        },
        exec_direct_type: direct_type,
        combine_type: CombineType::Same,
        read_only: true,
        force_autocommit: false,
        is_local,
    };

    result.is_local = is_local;
    if !is_local {
        result.utility_stmt = Some(Box::new(UtilityPayload::RemoteQuery(step)));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::{AnalyzeEnv, RawParser};
    use crate::catalog::{MemoryCatalog, types};
    use crate::config::{AnalyzerConfig, Grammar, NodeRole};
    use crate::nodes::raw::{DeleteStmt, FromItem, RawExpr, RawStmt, ResTarget, SelectStmt};
    use crate::session::Session;

    /// Understands a fixed handful of statements.
    fn parse(sql: &str) -> AnalyzeResult<Vec<RawStmt>> {
        let select = || SelectStmt::select(vec![ResTarget::expr(RawExpr::col("a"))]).from(FromItem::table("t"));
        Ok(match sql {
            "select a from t" => vec![select().into_stmt()],
            "select a from t; select a from t" => vec![select().into_stmt(), select().into_stmt()],
            "delete from t" => vec![DeleteStmt::new("t").into_stmt()],
            "create tablespace ts" => vec![RawStmt::Utility(UtilityStmt::CreateTableSpace {
                name: "ts".into(),
                location: "/tmp/ts".into(),
            })],
            "vacuum" => vec![RawStmt::Utility(UtilityStmt::Other { tag: "VACUUM".into() })],
            other => return Err(AnalyzeError::syntax(format!("syntax error at or near \"{other}\""))),
        })
    }

    fn catalog() -> MemoryCatalog {
        let mut cat = MemoryCatalog::new();
        cat.add_table("t", &[("a", types::INT4)]);
        cat.add_node("coord1", NodeKind::Coordinator);
        cat.add_node("dn1", NodeKind::Datanode);
        cat.add_node("dn2", NodeKind::Datanode);
        cat
    }

    fn run_with(config: &AnalyzerConfig, nodes: &[&str], sql: &str) -> AnalyzeResult<Query> {
        let cat = catalog();
        let session = Session::default();
        let parser: &dyn RawParser = &parse;
        let env = AnalyzeEnv {
            parser: Some(parser),
            ..AnalyzeEnv::new(&cat, config, &session)
        };
        let ps = ParseState::new(env, "", ParamTypes::Fixed(vec![]), Grammar::Postgres);
        let stmt = ExecDirectStmt {
            node_names: nodes.iter().map(|n| n.to_string()).collect(),
            query: sql.to_string(),
        };
        transform_exec_direct_stmt(&ps, &stmt)
    }

    fn run(nodes: &[&str], sql: &str) -> AnalyzeResult<Query> {
        run_with(&AnalyzerConfig::default(), nodes, sql)
    }

    #[test]
    fn test_remote_select() {
        let q = run(&["dn2"], "select a from t").unwrap();
        assert_eq!(q.command_type, CmdType::Select);
        assert!(!q.is_local);
        assert_eq!(q.sql_statement.as_deref(), Some("select a from t"));
        let Some(UtilityPayload::RemoteQuery(step)) = q.utility_stmt.as_deref() else {
            panic!("expected a remote query");
        };
        assert_eq!(step.exec_nodes, [1]);
        assert_eq!(step.exec_type, ExecNodeType::Datanodes);
        assert_eq!(step.exec_direct_type, ExecDirectType::Select);
        assert_eq!(step.combine_type, CombineType::Same);
        assert!(step.read_only);
    }

    #[test]
    fn test_local_select_runs_here() {
        let q = run(&["coord1"], "select a from t").unwrap();
        assert!(q.is_local);
        assert!(q.utility_stmt.is_none());
    }

    #[test]
    fn test_rejections() {
        let datanode = AnalyzerConfig {
            node_role: NodeRole::Datanode,
            ..Default::default()
        };
        let err = run_with(&datanode, &["dn1"], "select a from t").unwrap_err();
        assert_eq!(err.message(), "EXECUTE DIRECT cannot be executed on a Datanode");

        let err = run(&["dn1", "dn2"], "select a from t").unwrap_err();
        assert_eq!(err.message(), "Support for EXECUTE DIRECT on multiple nodes is not available yet");

        let err = run(&["dn9"], "select a from t").unwrap_err();
        assert_eq!(err.message(), "PGXC Node dn9: object not defined");
        assert_eq!(err.sqlstate(), "42704");

        let err = run(&["dn1"], "select a from t; select a from t").unwrap_err();
        assert_eq!(err.message(), "EXECUTE DIRECT cannot execute multiple queries");

        let err = run(&["dn1"], "delete from t").unwrap_err();
        assert_eq!(err.message(), "EXECUTE DIRECT cannot execute DML queries");

        let err = run(&["dn1"], "vacuum").unwrap_err();
        assert_eq!(err.message(), "EXECUTE DIRECT cannot execute this utility query");

        let err = run(&["coord1"], "create tablespace ts").unwrap_err();
        assert_eq!(err.message(), "EXECUTE DIRECT cannot execute locally this utility query");
    }

    #[test]
    fn test_whitelisted_utility_and_maintenance_mode() {
        let q = run(&["dn1"], "create tablespace ts").unwrap();
        assert_eq!(q.command_type, CmdType::Utility);
        assert!(matches!(
            q.utility_stmt.as_deref(),
            Some(UtilityPayload::RemoteQuery(r)) if r.exec_direct_type == ExecDirectType::Utility
        ));

        let maintenance = AnalyzerConfig {
            maintenance_mode: true,
            ..Default::default()
        };
        let q = run_with(&maintenance, &["dn1"], "delete from t").unwrap();
        assert_eq!(q.command_type, CmdType::Delete);
        assert!(matches!(
            q.utility_stmt.as_deref(),
            Some(UtilityPayload::RemoteQuery(r)) if r.exec_direct_type == ExecDirectType::Delete
        ));
    }
}
