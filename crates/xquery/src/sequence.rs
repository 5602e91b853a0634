use core::fmt;
use std::sync::Arc;

use xmldb_core::{AtomicValue, NodeProxy, NodeSet};

use crate::error::{Error, ErrorCode, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Node(NodeProxy),
    Atomic(AtomicValue),
}

impl Item {
    pub fn as_node(&self) -> Option<&NodeProxy> {
        match self {
            Item::Node(n) => Some(n),
            Item::Atomic(_) => None,
        }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Item::Node(n) => write!(f, "{n}"),
            Item::Atomic(a) => write!(f, "{a}"),
        }
    }
}

/// Result of evaluating an expression.
///
/// Node-only results are kept as shared node sets so that their identity and
/// persistence survive being passed around as context.
#[derive(Debug, Clone)]
pub enum Sequence {
    Nodes(Arc<NodeSet>),
    Items(Vec<Item>),
}

impl Default for Sequence {
    fn default() -> Self {
        Sequence::Items(Vec::new())
    }
}

impl Sequence {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_nodes(set: NodeSet) -> Self {
        Sequence::Nodes(Arc::new(set))
    }

    pub fn singleton(value: AtomicValue) -> Self {
        Sequence::Items(vec![Item::Atomic(value)])
    }

    pub fn boolean(b: bool) -> Self {
        Self::singleton(AtomicValue::Boolean(b))
    }

    pub fn len(&self) -> usize {
        match self {
            Sequence::Nodes(set) => set.len(),
            Sequence::Items(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_persistent_set(&self) -> bool {
        matches!(self, Sequence::Nodes(set) if set.is_persistent())
    }

    pub fn node_set(&self) -> Option<&Arc<NodeSet>> {
        match self {
            Sequence::Nodes(set) => Some(set),
            Sequence::Items(_) => None,
        }
    }

    pub fn items(&self) -> Vec<Item> {
        match self {
            Sequence::Nodes(set) => set.iter().cloned().map(Item::Node).collect(),
            Sequence::Items(items) => items.clone(),
        }
    }

    /// Converts to a node set; atomic items are a type error.
    pub fn to_node_set(&self) -> Result<Arc<NodeSet>> {
        match self {
            Sequence::Nodes(set) => Ok(set.clone()),
            Sequence::Items(items) => {
                let nodes = items
                    .iter()
                    .map(|item| match item {
                        Item::Node(n) => Ok(n.clone()),
                        Item::Atomic(a) => Err(Error::type_error(format!("expected a node, found {}", a.type_name()))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Arc::new(NodeSet::transient(nodes)))
            }
        }
    }

    pub fn concat(self, other: Sequence) -> Sequence {
        if self.is_empty() {
            return other;
        }
        if other.is_empty() {
            return self;
        }
        let mut items = self.items();
        items.extend(other.items());
        Sequence::Items(items)
    }

    /// The single item of a sequence of length one.
    pub fn exactly_one(&self, what: &str) -> Result<Item> {
        let mut items = self.items();
        if items.len() != 1 {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{what} expects exactly one item, got {}", items.len()),
            ));
        }
        Ok(items.remove(0))
    }
}

impl From<NodeSet> for Sequence {
    fn from(set: NodeSet) -> Self {
        Sequence::from_nodes(set)
    }
}
