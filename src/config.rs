//! Configuration settings for the analyzer.
//!
//! Settings are plain data, loaded from TOML (or built in code) and shared
//! read-only by every analysis. Each setting documents the behavior it
//! controls; defaults match a stock coordinator running the Postgres grammar.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// SQL dialect the raw tree was produced by.
///
/// Dialect-specific rewrites (the `(+)` outer-join rewrite, the ROWNUM to
/// LIMIT rewrite, and the INSERT target visibility step) gate on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grammar {
    #[default]
    Postgres,
    Oracle,
}

impl Grammar {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grammar::Postgres => "postgres",
            Grammar::Oracle => "oracle",
        }
    }
}

impl std::fmt::Display for Grammar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Role of the local node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    #[default]
    Coordinator,
    Datanode,
}

/// Analyzer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Dialect used by [`crate::analyze::Analyzer::analyze`] when the caller
    /// does not pick one explicitly.
    pub grammar: Grammar,

    /// Role of this node.
    ///
    /// On a data node `EXECUTE DIRECT` is rejected outright. Command-id
    /// propagation for data-modifying CTEs only happens on a coordinator
    /// whose session did not itself come from another coordinator.
    pub node_role: NodeRole,

    /// Maintenance mode.
    ///
    /// When enabled, `EXECUTE DIRECT` may run DML and any utility statement
    /// on a remote node. When disabled only SELECT and the tablespace
    /// utilities are allowed.
    pub maintenance_mode: bool,

    /// Maximum nesting of UNION/INTERSECT/EXCEPT trees.
    ///
    /// Set-operation analysis recurses once per level; deeper trees fail
    /// with `stack depth limit exceeded` instead of exhausting the stack.
    pub max_set_op_depth: usize,

    /// Log every analyzed query tree as JSON at debug level.
    pub debug_print_parse: bool,

    /// Schemas pushed in front of the session search path while a
    /// statement in the Oracle grammar is analyzed.
    pub oracle_search_path: Vec<String>,

    /// Fold qualifying `ROWNUM` predicates into `LIMIT`.
    ///
    /// Set to false to leave ROWNUM predicates in WHERE unconditionally.
    pub rownum_rewrite: bool,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        AnalyzerConfig {
            grammar: Grammar::Postgres,
            node_role: NodeRole::Coordinator,
            maintenance_mode: false,
            max_set_op_depth: 1000,
            debug_print_parse: false,
            oracle_search_path: vec!["oracle".to_string()],
            rownum_rewrite: true,
        }
    }
}

impl AnalyzerConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: AnalyzerConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_set_op_depth == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_set_op_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if let Some(bad) = self.oracle_search_path.iter().find(|s| s.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                key: "oracle_search_path",
                reason: format!("empty schema name {bad:?}"),
            });
        }
        Ok(())
    }

    pub fn is_coordinator(&self) -> bool {
        self.node_role == NodeRole::Coordinator
    }
}
