//! Per-connection session state visible to the analyzer.
//!
//! The analyzer reads the search path and node identity from here and may
//! latch one flag: the command-id propagation bit used by an originating
//! coordinator when a statement both writes and reads the same relations.
//! Everything else about a session is outside the analyzer's reach.
//!
//! The override search path used under the alternate grammar is a scoped
//! resource: [`Session::push_override_search_path`] returns a
//! [`SearchPathGuard`] that pops the override when dropped, so the path is
//! restored on error exits as well as on success.

use std::cell::{Cell, RefCell};

/// Session handle passed explicitly into analysis.
#[derive(Debug)]
pub struct Session {
    /// Stack of effective search paths; index 0 is the session's own path.
    search_paths: RefCell<Vec<Vec<String>>>,
    send_command_id: Cell<bool>,
    node_name: String,
    conn_from_coordinator: bool,
}

impl Default for Session {
    fn default() -> Self {
        Session::new(&["public"])
    }
}

impl Session {
    pub fn new(search_path: &[&str]) -> Self {
        Session {
            search_paths: RefCell::new(vec![search_path.iter().map(|s| s.to_string()).collect()]),
            send_command_id: Cell::new(false),
            node_name: "coord1".to_string(),
            conn_from_coordinator: false,
        }
    }

    pub fn with_node_name(mut self, name: &str) -> Self {
        self.node_name = name.to_string();
        self
    }

    /// Mark the connection as opened by another coordinator.
    pub fn from_coordinator(mut self) -> Self {
        self.conn_from_coordinator = true;
        self
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn is_conn_from_coordinator(&self) -> bool {
        self.conn_from_coordinator
    }

    // ── Search path ────────────────────────────────────────────────────

    /// The effective search path, overrides included.
    pub fn search_path(&self) -> Vec<String> {
        self.search_paths
            .borrow()
            .last()
            .cloned()
            .unwrap_or_default()
    }

    /// Number of overrides currently pushed.
    pub fn override_depth(&self) -> usize {
        self.search_paths.borrow().len().saturating_sub(1)
    }

    /// Put `schemas` in front of the current path until the guard drops.
    pub fn push_override_search_path(&self, schemas: &[String]) -> SearchPathGuard<'_> {
        let mut stack = self.search_paths.borrow_mut();
        let current = stack.last().cloned().unwrap_or_default();
        let mut path: Vec<String> = schemas.to_vec();
        path.extend(current.into_iter().filter(|s| !schemas.contains(s)));
        tracing::trace!(?path, "push override search path");
        stack.push(path);
        SearchPathGuard {
            session: self,
            depth: stack.len() - 1,
        }
    }

    // ── Command-id propagation ─────────────────────────────────────────

    pub fn send_command_id(&self) -> bool {
        self.send_command_id.get()
    }

    /// Set the send-command-id flag. It stays set for the rest of the
    /// statement.
    pub fn latch_send_command_id(&self) {
        if !self.send_command_id.replace(true) {
            tracing::debug!("latched send-command-id for this statement");
        }
    }
}

/// Pops an override search path when dropped.
#[must_use = "the override is popped as soon as the guard is dropped"]
#[derive(Debug)]
pub struct SearchPathGuard<'s> {
    session: &'s Session,
    depth: usize,
}

impl Drop for SearchPathGuard<'_> {
    fn drop(&mut self) {
        let mut stack = self.session.search_paths.borrow_mut();
        stack.truncate(self.depth.max(1));
        tracing::trace!(depth = self.depth, "pop override search path");
    }
}
