//! Node definitions shared by the analyzer and its callers.
//!
//! # Submodules
//! - `raw`: Raw parse tree, the analyzer's input
//! - `primnodes`: Analyzed expressions and tree walkers
//! - `query`: The query tree, the analyzer's output
//!
//! Every node is a tagged variant; the analyzer dispatches with exhaustive
//! `match` expressions.

pub mod primnodes;
pub mod query;
pub mod raw;

pub use primnodes::{Const, ConstValue, Expr, Var};
pub use query::{
    CmdType, CommonTableExpr, FromExpr, JoinExpr, JoinNode, JoinType, LockClauseStrength, Query,
    RangeTblEntry, RowMarkClause, RteKind, SetOpNode, SetOperation, SortGroupClause, TargetEntry,
};
pub use raw::RawStmt;

/// Object identifier used for catalog objects (relations, types, operators,
/// functions, collations, cluster nodes).
pub type Oid = u32;

/// The "no object" identifier.
pub const INVALID_OID: Oid = 0;

/// Attribute number within a relation. Zero is the whole-row reference and
/// negative numbers are system columns.
pub type AttrNumber = i16;

/// 1-based range-table index. Zero means "not assigned".
pub type Index = usize;
