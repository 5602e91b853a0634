//! Per-query execution state.

use std::collections::HashMap;
use std::sync::Arc;

use xmldb_core::{Database, NodeSet};

use crate::error::{Error, ErrorCode, Result};
use crate::expr::ExprId;
use crate::pragma::PragmaPhase;
use crate::pragma::optimize::OptimizeState;
use crate::sequence::Sequence;

/// Execution context of one query.
///
/// Everything that changes between evaluations of a compiled expression
/// lives here, keyed by expression id: optimizer state, preloaded step data
/// and index use reports. The compiled tree itself is never mutated after
/// analysis.
pub struct QueryContext {
    db: Arc<dyn Database>,
    variables: HashMap<String, Sequence>,
    phases: HashMap<ExprId, PragmaPhase>,
    optimize_states: HashMap<ExprId, OptimizeState>,
    preloaded: HashMap<ExprId, Arc<NodeSet>>,
    index_usage: HashMap<ExprId, bool>,
}

impl QueryContext {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            variables: HashMap::new(),
            phases: HashMap::new(),
            optimize_states: HashMap::new(),
            preloaded: HashMap::new(),
            index_usage: HashMap::new(),
        }
    }

    pub fn db(&self) -> &dyn Database {
        self.db.as_ref()
    }

    pub fn declare_variable(&mut self, name: impl Into<String>, value: Sequence) {
        self.variables.insert(name.into(), value);
    }

    pub fn variable(&self, name: &str) -> Result<&Sequence> {
        self.variables
            .get(name)
            .ok_or_else(|| Error::from_code(ErrorCode::XPST0008, format!("variable ${name} is not declared")))
    }

    pub(crate) fn phase(&self, pragma: ExprId) -> Option<PragmaPhase> {
        self.phases.get(&pragma).copied()
    }

    pub(crate) fn set_phase(&mut self, pragma: ExprId, phase: PragmaPhase) {
        self.phases.insert(pragma, phase);
    }

    pub fn optimize_state(&self, pragma: ExprId) -> Option<&OptimizeState> {
        self.optimize_states.get(&pragma)
    }

    pub(crate) fn optimize_state_mut(&mut self, pragma: ExprId) -> Option<&mut OptimizeState> {
        self.optimize_states.get_mut(&pragma)
    }

    pub(crate) fn bind_optimize_state(&mut self, pragma: ExprId, state: OptimizeState) {
        self.optimize_states.insert(pragma, state);
    }

    /// Candidate nodes computed by an optimizer for a location step.
    pub(crate) fn preloaded(&self, step: ExprId) -> Option<&Arc<NodeSet>> {
        self.preloaded.get(&step)
    }

    pub(crate) fn set_preloaded(&mut self, step: ExprId, nodes: Arc<NodeSet>) {
        self.preloaded.insert(step, nodes);
    }

    pub(crate) fn clear_preloaded(&mut self, step: ExprId) {
        self.preloaded.remove(&step);
    }

    pub(crate) fn record_index_use(&mut self, expr: ExprId, used: bool) {
        let entry = self.index_usage.entry(expr).or_insert(false);
        *entry |= used;
    }

    pub fn has_used_index(&self, expr: ExprId) -> bool {
        self.index_usage.get(&expr).copied().unwrap_or(false)
    }

    pub(crate) fn clear_index_use(&mut self, exprs: impl IntoIterator<Item = ExprId>) {
        for id in exprs {
            self.index_usage.remove(&id);
        }
    }

    /// Drops per-run caches: optimizer verdict caches, preloaded data and
    /// index use reports. Discovery results and variables are kept.
    pub fn reset_state(&mut self) {
        for state in self.optimize_states.values_mut() {
            state.reset();
        }
        for phase in self.phases.values_mut() {
            if *phase != PragmaPhase::Created && *phase != PragmaPhase::Analyzed {
                *phase = PragmaPhase::Activated;
            }
        }
        self.preloaded.clear();
        self.index_usage.clear();
    }
}

impl core::fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("QueryContext")
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("phases", &self.phases)
            .field("optimize_states", &self.optimize_states.len())
            .field("preloaded", &self.preloaded.len())
            .finish_non_exhaustive()
    }
}
