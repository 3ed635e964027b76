//! pg_analyze: semantic analysis for a Postgres-XC style SQL front-end.
//!
//! Turns a raw parse tree into a resolved query tree: names bound to
//! range-table entries, every expression typed and collated, required
//! permissions annotated. Two rewrites from the Oracle-compatible grammar
//! run on the result: `(+)` outer-join markers become real joins and
//! `ROWNUM` bounds become a `LIMIT`.
//!
//! The lexer and grammar are not part of this crate; callers build
//! [`nodes::raw`] trees directly or plug in their own parser through
//! [`analyze::RawParser`].
//!
//! # Modules
//! - `analyze`: The analyzer proper
//! - `nodes`: Raw parse tree, expressions and the query tree
//! - `catalog`: Catalog service trait and an in-memory catalog
//! - `config`: Analyzer settings
//! - `session`: Search path, node identity, command-id propagation
//! - `hooks`: Post-parse-analyze hook
//! - `hash`: Query fingerprints
//! - `error`: Error types

pub mod analyze;
pub mod catalog;
pub mod config;
pub mod error;
pub mod hash;
pub mod hooks;
pub mod nodes;
pub mod session;

pub use analyze::{Analyzer, AnalyzeEnv, RawParser, requires_snapshot};
pub use catalog::{Catalog, MemoryCatalog};
pub use config::{AnalyzerConfig, Grammar, NodeRole};
pub use error::{AnalyzeError, AnalyzeResult, ConfigError};
pub use hooks::{PostAnalyzeHook, QueryFingerprintHook};
pub use nodes::{Query, RawStmt};
pub use session::Session;
