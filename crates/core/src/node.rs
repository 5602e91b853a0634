use core::fmt;

use smallvec::SmallVec;

/// Identifier of a stored document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(pub u32);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Hierarchical (Dewey) node identifier within one document.
///
/// The document node has the empty path, its root element is `1`, the
/// children of a node extend its path by one level. Attributes are numbered
/// before child nodes, so lexicographic order of the paths is document order
/// and an ancestor's path is always a strict prefix of its descendants'.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NodeId(SmallVec<[u32; 8]>);

impl NodeId {
    pub fn document() -> Self {
        Self(SmallVec::new())
    }

    pub fn from_levels(levels: &[u32]) -> Self {
        Self(SmallVec::from_slice(levels))
    }

    pub fn child(&self, ordinal: u32) -> Self {
        let mut levels = self.0.clone();
        levels.push(ordinal);
        Self(levels)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(SmallVec::from_slice(&self.0[..self.0.len() - 1])))
    }

    pub fn is_document(&self) -> bool {
        self.0.is_empty()
    }

    pub fn level(&self) -> usize {
        self.0.len()
    }

    pub fn levels(&self) -> &[u32] {
        &self.0
    }

    /// Strict descendant test (prefix check).
    pub fn is_descendant_of(&self, other: &NodeId) -> bool {
        self.0.len() > other.0.len() && self.0.starts_with(&other.0)
    }

    pub fn is_child_of(&self, other: &NodeId) -> bool {
        self.0.len() == other.0.len() + 1 && self.0.starts_with(&other.0)
    }

    /// Ancestors from the parent up to the document node.
    pub fn ancestors(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.0.len()).rev().map(|len| Self(SmallVec::from_slice(&self.0[..len])))
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        let mut first = true;
        for level in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{level}")?;
            first = false;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
}

/// Reference to a stored node: document plus node id.
///
/// Ordering is global document order (by document, then node id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeProxy {
    pub doc: DocId,
    pub id: NodeId,
}

impl NodeProxy {
    pub fn new(doc: DocId, id: NodeId) -> Self {
        Self { doc, id }
    }

    pub fn document_node(doc: DocId) -> Self {
        Self { doc, id: NodeId::document() }
    }

    pub fn parent(&self) -> Option<NodeProxy> {
        self.id.parent().map(|id| NodeProxy { doc: self.doc, id })
    }

    pub fn is_descendant_of(&self, other: &NodeProxy) -> bool {
        self.doc == other.doc && self.id.is_descendant_of(&other.id)
    }

    pub fn is_child_of(&self, other: &NodeProxy) -> bool {
        self.doc == other.doc && self.id.is_child_of(&other.id)
    }

    pub fn ancestors(&self) -> impl Iterator<Item = NodeProxy> + '_ {
        self.id.ancestors().map(|id| NodeProxy { doc: self.doc, id })
    }
}

impl fmt::Display for NodeProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.doc, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dewey_order_is_document_order() {
        let doc = NodeId::document();
        let root = doc.child(1);
        let attr = root.child(1);
        let first = root.child(2);
        let nested = first.child(1);
        let second = root.child(3);
        let mut ids = vec![second.clone(), nested.clone(), doc.clone(), attr.clone(), first.clone(), root.clone()];
        ids.sort();
        assert_eq!(ids, vec![doc, root, attr, first, nested, second]);
    }

    #[test]
    fn ancestry_is_prefix() {
        let a = NodeId::from_levels(&[1, 3]);
        let b = NodeId::from_levels(&[1, 3, 2, 1]);
        assert!(b.is_descendant_of(&a));
        assert!(!a.is_descendant_of(&a));
        assert!(!b.is_child_of(&a));
        assert!(NodeId::from_levels(&[1, 3, 2]).is_child_of(&a));
        let chain: Vec<_> = b.ancestors().map(|n| n.to_string()).collect();
        assert_eq!(chain, vec!["1.3.2", "1.3", "1", "/"]);
    }
}
