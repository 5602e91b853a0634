//! Narrow service interfaces between the query engine and the store.

use core::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::axis::Axis;
use crate::collection::Collection;
use crate::config::Configuration;
use crate::error::StoreResult;
use crate::node::{DocId, NodeKind, NodeProxy};
use crate::node_set::{DocumentSet, Generation, NodeSet};
use crate::qname::{NameType, QName};
use crate::value::{AtomicValue, ComparisonOp};

/// Identifies the expression on whose behalf a store probe runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ContextId(pub u32);

impl ContextId {
    pub const NONE: ContextId = ContextId(0);
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

/// Node level access to stored documents.
pub trait NodeStore: Send + Sync {
    /// The store's mutation counter; shared by every persistent set it returns.
    fn generation(&self) -> Generation;

    fn node_kind(&self, node: &NodeProxy) -> StoreResult<NodeKind>;

    fn node_name(&self, node: &NodeProxy) -> StoreResult<Option<QName>>;

    fn string_value(&self, node: &NodeProxy) -> StoreResult<String>;

    /// Element and text children in document order (attributes excluded).
    fn children(&self, node: &NodeProxy) -> StoreResult<Vec<NodeProxy>>;

    fn attributes(&self, node: &NodeProxy) -> StoreResult<Vec<NodeProxy>>;

    fn document_uri(&self, doc: DocId) -> StoreResult<String>;

    fn collection_of(&self, doc: DocId) -> StoreResult<Arc<Collection>>;

    /// Document nodes of a collection and its sub-collections.
    fn documents(&self, collection_uri: &str) -> StoreResult<NodeSet>;

    fn all_documents(&self) -> NodeSet;
}

/// Name based lookups along an axis.
pub trait StructuralIndex: Send + Sync {
    /// All elements or attributes with the given name in `docs`.
    fn find_elements_by_tag_name(&self, name_type: NameType, qname: &QName, docs: &DocumentSet) -> StoreResult<NodeSet>;

    /// Nodes named `qname` that relate to a member of `selection` along a
    /// reverse axis (`self`, `parent`, `ancestor`, `ancestor-or-self`).
    fn find_ancestors_by_tag_name(
        &self,
        name_type: NameType,
        qname: &QName,
        axis: Axis,
        docs: &DocumentSet,
        selection: &NodeSet,
        context_id: ContextId,
    ) -> StoreResult<NodeSet>;

    /// Nodes named `qname` reachable from a member of `context` along a
    /// forward axis (`child`, `attribute`, `descendant`,
    /// `descendant-or-self`, `descendant-attribute`).
    fn find_descendants_by_tag_name(
        &self,
        name_type: NameType,
        qname: &QName,
        axis: Axis,
        docs: &DocumentSet,
        context: &NodeSet,
        context_id: ContextId,
    ) -> StoreResult<NodeSet>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Cmp(ComparisonOp),
    StartsWith,
}

impl fmt::Display for RangeOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeOp::Cmp(op) => write!(f, "{op}"),
            RangeOp::StartsWith => f.write_str("starts-with"),
        }
    }
}

/// A value lookup against a configured range index.
#[derive(Debug, Clone, Copy)]
pub struct RangeQuery<'a> {
    pub name: &'a QName,
    pub name_type: NameType,
    pub op: RangeOp,
    pub key: &'a AtomicValue,
    pub docs: &'a DocumentSet,
    /// When present, only hits that are descendant-or-self of a context
    /// node are returned.
    pub context: Option<&'a NodeSet>,
}

pub trait RangeIndex: Send + Sync {
    /// Indexed nodes whose key satisfies the query. Documents whose
    /// collection does not index the name contribute nothing.
    fn find_by_value(&self, query: &RangeQuery<'_>) -> StoreResult<NodeSet>;
}

/// Everything the query engine needs from a database.
pub trait Database: NodeStore + StructuralIndex + RangeIndex {
    fn configuration(&self) -> Arc<Configuration>;

    fn stats(&self) -> &IndexStats;
}

/// Probe counters of a store.
#[derive(Debug, Default)]
pub struct IndexStats {
    ancestor_queries: AtomicU64,
    descendant_queries: AtomicU64,
    element_scans: AtomicU64,
    range_lookups: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexStatsSnapshot {
    pub ancestor_queries: u64,
    pub descendant_queries: u64,
    pub element_scans: u64,
    pub range_lookups: u64,
}

impl IndexStats {
    pub fn record_ancestor_query(&self) {
        self.ancestor_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_descendant_query(&self) {
        self.descendant_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_element_scan(&self) {
        self.element_scans.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_range_lookup(&self) {
        self.range_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> IndexStatsSnapshot {
        IndexStatsSnapshot {
            ancestor_queries: self.ancestor_queries.load(Ordering::Relaxed),
            descendant_queries: self.descendant_queries.load(Ordering::Relaxed),
            element_scans: self.element_scans.load(Ordering::Relaxed),
            range_lookups: self.range_lookups.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.ancestor_queries.store(0, Ordering::Relaxed);
        self.descendant_queries.store(0, Ordering::Relaxed);
        self.element_scans.store(0, Ordering::Relaxed);
        self.range_lookups.store(0, Ordering::Relaxed);
    }
}

impl fmt::Display for IndexStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ancestor queries: {}, descendant queries: {}, element scans: {}, range lookups: {}",
            self.ancestor_queries, self.descendant_queries, self.element_scans, self.range_lookups
        )
    }
}
