use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::index::ContextId;
use crate::node::{DocId, NodeProxy};

/// Shared mutation counter of a store.
///
/// Every persistent [`NodeSet`] handed out by a store carries a clone of the
/// store's generation handle, so its `state()` follows later mutations.
#[derive(Debug, Clone, Default)]
pub struct Generation(Arc<AtomicU64>);

impl Generation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Advances the counter and returns the new value.
    pub fn bump(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn same_counter(&self, other: &Generation) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Distinct documents referenced by a node set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentSet(BTreeSet<DocId>);

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, doc: DocId) -> bool {
        self.0.insert(doc)
    }

    pub fn contains(&self, doc: DocId) -> bool {
        self.0.contains(&doc)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = DocId> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<DocId> for DocumentSet {
    fn from_iter<T: IntoIterator<Item = DocId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Which side of an ancestor/descendant (or parent/child) relation to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrowMode {
    Ancestor,
    Descendant,
}

/// Ordered, duplicate free set of node references.
///
/// A set is persistent when it is backed by a store, which is signalled by the
/// presence of the store's [`Generation`]. Transient sets are plain in-memory
/// results and never report a change.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: Vec<NodeProxy>,
    generation: Option<Generation>,
}

impl NodeSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn persistent(nodes: impl IntoIterator<Item = NodeProxy>, generation: Generation) -> Self {
        Self::from_parts(nodes, Some(generation))
    }

    pub fn transient(nodes: impl IntoIterator<Item = NodeProxy>) -> Self {
        Self::from_parts(nodes, None)
    }

    pub fn from_parts(nodes: impl IntoIterator<Item = NodeProxy>, generation: Option<Generation>) -> Self {
        let mut nodes: Vec<NodeProxy> = nodes.into_iter().collect();
        nodes.sort_unstable();
        nodes.dedup();
        Self { nodes, generation }
    }

    fn derived(&self, nodes: Vec<NodeProxy>) -> Self {
        // `nodes` is produced from sorted input and stays sorted.
        Self { nodes, generation: self.generation.clone() }
    }

    pub fn is_persistent(&self) -> bool {
        self.generation.is_some()
    }

    pub fn generation(&self) -> Option<&Generation> {
        self.generation.as_ref()
    }

    /// Current mutation version of the backing store (0 for transient sets).
    pub fn state(&self) -> u64 {
        self.generation.as_ref().map_or(0, Generation::current)
    }

    pub fn has_changed(&self, previous_state: u64) -> bool {
        self.state() != previous_state
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NodeProxy> {
        self.nodes.iter()
    }

    pub fn as_slice(&self) -> &[NodeProxy] {
        &self.nodes
    }

    pub fn contains(&self, node: &NodeProxy) -> bool {
        self.nodes.binary_search(node).is_ok()
    }

    pub fn document_set(&self) -> DocumentSet {
        self.nodes.iter().map(|n| n.doc).collect()
    }

    /// Nodes of `self` that live in a document also referenced by `other`.
    pub fn filter_documents(&self, other: &NodeSet) -> NodeSet {
        let docs = other.document_set();
        self.derived(self.nodes.iter().filter(|n| docs.contains(n.doc)).cloned().collect())
    }

    /// Generic ancestor/descendant narrowing.
    ///
    /// `self` holds the descendant candidates, `ancestors` the ancestor
    /// candidates. In [`NarrowMode::Ancestor`] the ancestors having at least
    /// one descendant in `self` are returned, in [`NarrowMode::Descendant`]
    /// the members of `self` having an ancestor in `ancestors`. With
    /// `include_self` a node counts as its own ancestor. `context_id` names
    /// the analyzed context the narrowing is done for; [`ContextId::NONE`]
    /// outside of an optimizer.
    pub fn select_ancestor_descendant(
        &self,
        ancestors: &NodeSet,
        mode: NarrowMode,
        include_self: bool,
        context_id: ContextId,
    ) -> NodeSet {
        trace!(%context_id, ?mode, include_self, candidates = self.len(), ancestors = ancestors.len(), "ancestor-descendant narrowing");
        match mode {
            NarrowMode::Ancestor => {
                let kept = ancestors
                    .nodes
                    .iter()
                    .filter(|a| self.has_descendant_of(a, include_self))
                    .cloned()
                    .collect();
                ancestors.derived(kept)
            }
            NarrowMode::Descendant => {
                let kept = self
                    .nodes
                    .iter()
                    .filter(|d| {
                        (include_self && ancestors.contains(d)) || d.ancestors().any(|a| ancestors.contains(&a))
                    })
                    .cloned()
                    .collect();
                self.derived(kept)
            }
        }
    }

    /// Parent/child variant of [`NodeSet::select_ancestor_descendant`]:
    /// `self` holds child candidates, `parents` the parent candidates.
    pub fn select_parent_child(&self, parents: &NodeSet, mode: NarrowMode) -> NodeSet {
        match mode {
            NarrowMode::Ancestor => {
                let kept = parents
                    .nodes
                    .iter()
                    .filter(|p| {
                        let start = self.nodes.partition_point(|n| n <= *p);
                        self.nodes[start..].iter().take_while(|n| n.is_descendant_of(p)).any(|n| n.is_child_of(p))
                    })
                    .cloned()
                    .collect();
                parents.derived(kept)
            }
            NarrowMode::Descendant => {
                let kept = self
                    .nodes
                    .iter()
                    .filter(|c| c.parent().is_some_and(|p| parents.contains(&p)))
                    .cloned()
                    .collect();
                self.derived(kept)
            }
        }
    }

    fn has_descendant_of(&self, ancestor: &NodeProxy, include_self: bool) -> bool {
        // Descendants follow their ancestor directly in document order.
        let start = self.nodes.partition_point(|n| n < ancestor);
        let mut rest = self.nodes[start..].iter();
        match rest.next() {
            Some(first) if first == ancestor => include_self || rest.next().is_some_and(|n| n.is_descendant_of(ancestor)),
            Some(first) => first.is_descendant_of(ancestor),
            None => false,
        }
    }

    pub fn union(&self, other: &NodeSet) -> NodeSet {
        let generation = self.generation.clone().or_else(|| other.generation.clone());
        let mut merged = Vec::with_capacity(self.len() + other.len());
        let (mut a, mut b) = (self.nodes.iter().peekable(), other.nodes.iter().peekable());
        loop {
            match (a.peek(), b.peek()) {
                (Some(x), Some(y)) => match x.cmp(y) {
                    std::cmp::Ordering::Less => merged.extend(a.next().cloned()),
                    std::cmp::Ordering::Greater => merged.extend(b.next().cloned()),
                    std::cmp::Ordering::Equal => {
                        merged.extend(a.next().cloned());
                        b.next();
                    }
                },
                (Some(_), None) => merged.extend(a.by_ref().cloned()),
                (None, Some(_)) => merged.extend(b.by_ref().cloned()),
                (None, None) => break,
            }
        }
        NodeSet { nodes: merged, generation }
    }

    pub fn intersect(&self, other: &NodeSet) -> NodeSet {
        self.derived(self.nodes.iter().filter(|n| other.contains(n)).cloned().collect())
    }
}

/// Content equality; generation handles are not compared.
impl PartialEq for NodeSet {
    fn eq(&self, other: &Self) -> bool {
        self.nodes == other.nodes
    }
}

impl Eq for NodeSet {}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = &'a NodeProxy;
    type IntoIter = std::slice::Iter<'a, NodeProxy>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}
