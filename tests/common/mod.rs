//! Shared fixtures for the analyzer integration tests.
//!
//! Every test builds its own in-memory catalog, so nothing is shared
//! between tests and lock logs start empty.

use pg_analyze::catalog::{NodeKind, types};
use pg_analyze::nodes::raw::{FromItem, RawExpr, ResTarget, SelectStmt};
use pg_analyze::{Analyzer, AnalyzerConfig, Grammar, MemoryCatalog, Session};
use tracing_subscriber::EnvFilter;

/// Install a test-friendly subscriber once; `RUST_LOG` picks the level.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A catalog, configuration and session that live for one test.
pub struct Fixture {
    pub catalog: MemoryCatalog,
    pub config: AnalyzerConfig,
    pub session: Session,
}

#[allow(dead_code)]
impl Fixture {
    /// Tables `t(a int4, b text, c int8)`, `t1`..`t3(a int4, b int4)`, a
    /// temp table `tmp`, the Oracle `dual` and three cluster nodes.
    pub fn new() -> Self {
        let mut catalog = MemoryCatalog::new();
        catalog.add_table("t", &[("a", types::INT4), ("b", types::TEXT), ("c", types::INT8)]);
        for name in ["t1", "t2", "t3"] {
            catalog.add_table(name, &[("a", types::INT4), ("b", types::INT4)]);
        }
        catalog.add_temp_table("tmp", &[("a", types::INT4)]);
        catalog.add_table("oracle.dual", &[("dummy", types::TEXT)]);
        catalog.add_node("coord1", NodeKind::Coordinator);
        catalog.add_node("dn1", NodeKind::Datanode);
        catalog.add_node("dn2", NodeKind::Datanode);
        Fixture {
            catalog,
            config: AnalyzerConfig::default(),
            session: Session::default(),
        }
    }

    pub fn oracle() -> Self {
        let mut fixture = Fixture::new();
        fixture.config.grammar = Grammar::Oracle;
        fixture
    }

    pub fn analyzer(&self) -> Analyzer<'_> {
        Analyzer::new(&self.catalog, &self.config, &self.session)
    }
}

/// `SELECT <cols> FROM <table>`.
#[allow(dead_code)]
pub fn select_cols(cols: &[&str], table: &str) -> SelectStmt {
    SelectStmt::select(cols.iter().map(|c| ResTarget::expr(RawExpr::col(c))).collect()).from(FromItem::table(table))
}

/// `SELECT * FROM <table>`.
#[allow(dead_code)]
pub fn select_star(table: &str) -> SelectStmt {
    SelectStmt::select(vec![ResTarget::expr(RawExpr::star())]).from(FromItem::table(table))
}

/// `SELECT <literal>` with no FROM clause.
#[allow(dead_code)]
pub fn select_literal(value: RawExpr) -> SelectStmt {
    SelectStmt::select(vec![ResTarget::expr(value)])
}

#[allow(dead_code)]
pub fn eq(left: RawExpr, right: RawExpr) -> RawExpr {
    RawExpr::op("=", left, right)
}
