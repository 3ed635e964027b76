//! Post-parse-analyze hook.
//!
//! A single hook slot lives on [`crate::analyze::Analyzer`]. When set, it
//! runs on every top-level analysis just before the parse state is dropped,
//! with read access to the final parse state and write access to the query
//! tree. Hooks must not fail: anything they want to report goes through
//! `tracing`.

use crate::analyze::ParseState;
use crate::hash;
use crate::nodes::Query;

/// Callback run at the end of top-level analysis.
pub trait PostAnalyzeHook: Send + Sync {
    fn post_parse_analyze(&self, pstate: &ParseState<'_>, query: &mut Query);
}

impl<F> PostAnalyzeHook for F
where
    F: Fn(&ParseState<'_>, &mut Query) + Send + Sync,
{
    fn post_parse_analyze(&self, pstate: &ParseState<'_>, query: &mut Query) {
        self(pstate, query)
    }
}

/// Stores a location-independent fingerprint of the query tree in
/// [`Query::query_id`].
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryFingerprintHook;

impl PostAnalyzeHook for QueryFingerprintHook {
    fn post_parse_analyze(&self, pstate: &ParseState<'_>, query: &mut Query) {
        let id = hash::query_fingerprint(query);
        tracing::trace!(query_id = id, source = pstate.source_text(), "query fingerprint");
        query.query_id = Some(id);
    }
}
