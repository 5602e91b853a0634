//! In-memory document store with structural and range indexes.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::axis::Axis;
use crate::builder::{Content, ElementBuilder};
use crate::collection::{Collection, IndexConfiguration, IndexKey, normalize_collection_uri};
use crate::config::Configuration;
use crate::error::{StoreError, StoreResult};
use crate::index::{ContextId, Database, IndexStats, NodeStore, RangeIndex, RangeOp, RangeQuery, StructuralIndex};
use crate::node::{DocId, NodeId, NodeKind, NodeProxy};
use crate::node_set::{DocumentSet, Generation, NodeSet};
use crate::qname::{IndexedName, NameType, QName};
use crate::xml::parse_document;

#[derive(Debug)]
struct NodeData {
    kind: NodeKind,
    name: Option<QName>,
    value: Option<String>,
    children: Vec<NodeId>,
    attributes: Vec<NodeId>,
}

impl NodeData {
    fn leaf(kind: NodeKind, name: Option<QName>, value: String) -> Self {
        Self { kind, name, value: Some(value), children: Vec::new(), attributes: Vec::new() }
    }
}

#[derive(Debug)]
struct StoredDocument {
    name: String,
    collection: String,
    nodes: BTreeMap<NodeId, NodeData>,
    /// Structural index: name to node ids in document order.
    names: HashMap<IndexedName, Vec<NodeId>>,
    /// Range index entries per configured name.
    ranges: HashMap<IndexedName, Vec<(NodeId, IndexKey)>>,
}

impl StoredDocument {
    fn build(name: &str, collection: &str, root: &ElementBuilder) -> Self {
        let mut doc = StoredDocument {
            name: name.to_owned(),
            collection: collection.to_owned(),
            nodes: BTreeMap::new(),
            names: HashMap::new(),
            ranges: HashMap::new(),
        };
        let root_id = NodeId::document().child(1);
        doc.nodes.insert(
            NodeId::document(),
            NodeData {
                kind: NodeKind::Document,
                name: None,
                value: None,
                children: vec![root_id.clone()],
                attributes: Vec::new(),
            },
        );
        doc.insert_element(root_id, root);
        doc
    }

    fn insert_element(&mut self, id: NodeId, element: &ElementBuilder) {
        self.names.entry(IndexedName::new(NameType::Element, element.name().clone())).or_default().push(id.clone());

        let mut ordinal = 0;
        let mut attributes = Vec::with_capacity(element.attributes().len());
        for attribute in element.attributes() {
            ordinal += 1;
            let attr_id = id.child(ordinal);
            self.names
                .entry(IndexedName::new(NameType::Attribute, attribute.name.clone()))
                .or_default()
                .push(attr_id.clone());
            self.nodes.insert(
                attr_id.clone(),
                NodeData::leaf(NodeKind::Attribute, Some(attribute.name.clone()), attribute.value.clone()),
            );
            attributes.push(attr_id);
        }

        let mut children = Vec::with_capacity(element.content().len());
        for content in element.content() {
            ordinal += 1;
            let child_id = id.child(ordinal);
            match content {
                Content::Element(child) => self.insert_element(child_id.clone(), child),
                Content::Text(text) => {
                    self.nodes.insert(child_id.clone(), NodeData::leaf(NodeKind::Text, None, text.clone()));
                }
            }
            children.push(child_id);
        }

        self.nodes.insert(
            id,
            NodeData { kind: NodeKind::Element, name: Some(element.name().clone()), value: None, children, attributes },
        );
    }

    fn node(&self, doc: DocId, id: &NodeId) -> StoreResult<&NodeData> {
        self.nodes.get(id).ok_or_else(|| StoreError::NodeNotFound { doc, node: id.to_string() })
    }

    fn string_value(&self, id: &NodeId) -> String {
        let Some(data) = self.nodes.get(id) else {
            return String::new();
        };
        if let Some(value) = &data.value {
            return value.clone();
        }
        self.nodes
            .range((Bound::Excluded(id.clone()), Bound::Unbounded))
            .take_while(|(k, _)| k.is_descendant_of(id))
            .filter(|(_, d)| d.kind == NodeKind::Text)
            .filter_map(|(_, d)| d.value.as_deref())
            .collect()
    }

    /// Rebuilds range entries from the collection's index configuration.
    fn reindex(&mut self, config: &IndexConfiguration) {
        let mut ranges = HashMap::new();
        for spec in &config.range_indexes {
            let Some(ids) = self.names.get(&spec.name) else {
                continue;
            };
            let entries: Vec<(NodeId, IndexKey)> = ids
                .iter()
                .filter_map(|id| spec.index_type.key_from_text(&self.string_value(id)).map(|key| (id.clone(), key)))
                .collect();
            ranges.insert(spec.name.clone(), entries);
        }
        self.ranges = ranges;
    }

    fn path(&self) -> String {
        format!("{}/{}", self.collection, self.name)
    }
}

#[derive(Debug, Default)]
struct Inner {
    collections: BTreeMap<String, Arc<Collection>>,
    documents: BTreeMap<DocId, StoredDocument>,
    paths: HashMap<String, DocId>,
    next_doc: u32,
}

impl Inner {
    fn document(&self, doc: DocId) -> StoreResult<&StoredDocument> {
        self.documents.get(&doc).ok_or_else(|| StoreError::DocumentNotFound(doc.to_string()))
    }

    fn ensure_collection(&mut self, uri: &str) -> Arc<Collection> {
        self.collections.entry(uri.to_owned()).or_insert_with(|| Arc::new(Collection::new(uri))).clone()
    }
}

/// Thread-safe in-memory database.
///
/// Every mutation bumps the store generation, which persistent node sets
/// handed out earlier observe through [`NodeSet::has_changed`].
#[derive(Debug)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
    generation: Generation,
    config: RwLock<Arc<Configuration>>,
    stats: IndexStats,
    interrupted: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            generation: Generation::new(),
            config: RwLock::new(Arc::new(Configuration::default())),
            stats: IndexStats::default(),
            interrupted: AtomicBool::new(false),
        }
    }

    pub fn with_configuration(config: Configuration) -> Self {
        let store = Self::new();
        store.set_configuration(config);
        store
    }

    /// Replaces the configuration and applies its collection index settings.
    pub fn set_configuration(&self, config: Configuration) {
        for collection in &config.collections {
            self.configure_collection(&collection.uri, collection.index_configuration());
        }
        *self.config.write() = Arc::new(config);
    }

    pub fn create_collection(&self, uri: &str) -> Arc<Collection> {
        let uri = normalize_collection_uri(uri);
        self.inner.write().ensure_collection(&uri)
    }

    /// Sets the index configuration of a collection and reindexes its
    /// documents.
    pub fn configure_collection(&self, uri: &str, index_config: IndexConfiguration) {
        let uri = normalize_collection_uri(uri);
        let mut inner = self.inner.write();
        let indexes = index_config.range_indexes.len();
        inner.collections.insert(uri.clone(), Arc::new(Collection { uri: uri.clone(), index_config: index_config.clone() }));
        let mut reindexed = 0usize;
        for doc in inner.documents.values_mut().filter(|d| d.collection == uri) {
            doc.reindex(&index_config);
            reindexed += 1;
        }
        let generation = self.generation.bump();
        debug!(collection = %uri, indexes, reindexed, generation, "collection configured");
    }

    /// Stores a document, replacing any document of the same name.
    pub fn store_document(&self, collection_uri: &str, name: &str, root: &ElementBuilder) -> DocId {
        let uri = normalize_collection_uri(collection_uri);
        let mut inner = self.inner.write();
        let collection = inner.ensure_collection(&uri);
        let mut document = StoredDocument::build(name, &uri, root);
        document.reindex(&collection.index_config);

        let path = document.path();
        if let Some(previous) = inner.paths.remove(&path) {
            inner.documents.remove(&previous);
        }
        let doc = DocId(inner.next_doc);
        inner.next_doc += 1;
        let nodes = document.nodes.len();
        inner.documents.insert(doc, document);
        inner.paths.insert(path.clone(), doc);
        let generation = self.generation.bump();
        debug!(%doc, path = %path, nodes, generation, "document stored");
        doc
    }

    pub fn store_xml(&self, collection_uri: &str, name: &str, xml: &str) -> StoreResult<DocId> {
        let root = parse_document(name, xml)?;
        Ok(self.store_document(collection_uri, name, &root))
    }

    pub fn remove_document(&self, collection_uri: &str, name: &str) -> StoreResult<()> {
        let path = format!("{}/{name}", normalize_collection_uri(collection_uri));
        let mut inner = self.inner.write();
        let doc = inner.paths.remove(&path).ok_or_else(|| StoreError::DocumentNotFound(path.clone()))?;
        inner.documents.remove(&doc);
        let generation = self.generation.bump();
        debug!(%doc, path = %path, generation, "document removed");
        Ok(())
    }

    pub fn document_node(&self, path: &str) -> StoreResult<NodeProxy> {
        let inner = self.inner.read();
        inner
            .paths
            .get(path)
            .map(|doc| NodeProxy::document_node(*doc))
            .ok_or_else(|| StoreError::DocumentNotFound(path.to_owned()))
    }

    /// While set, every index probe fails with [`StoreError::Interrupted`].
    pub fn interrupt(&self, interrupted: bool) {
        self.interrupted.store(interrupted, Ordering::SeqCst);
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    fn check_interrupted(&self) -> StoreResult<()> {
        if self.interrupted.load(Ordering::SeqCst) {
            return Err(StoreError::Interrupted);
        }
        Ok(())
    }

    fn persistent(&self, nodes: Vec<NodeProxy>) -> NodeSet {
        NodeSet::persistent(nodes, self.generation.clone())
    }
}

fn name_matches(data: &NodeData, name_type: NameType, qname: &QName) -> bool {
    let kind = match name_type {
        NameType::Element => NodeKind::Element,
        NameType::Attribute => NodeKind::Attribute,
    };
    data.kind == kind && data.name.as_ref() == Some(qname)
}

impl NodeStore for MemoryStore {
    fn generation(&self) -> Generation {
        self.generation.clone()
    }

    fn node_kind(&self, node: &NodeProxy) -> StoreResult<NodeKind> {
        let inner = self.inner.read();
        Ok(inner.document(node.doc)?.node(node.doc, &node.id)?.kind)
    }

    fn node_name(&self, node: &NodeProxy) -> StoreResult<Option<QName>> {
        let inner = self.inner.read();
        Ok(inner.document(node.doc)?.node(node.doc, &node.id)?.name.clone())
    }

    fn string_value(&self, node: &NodeProxy) -> StoreResult<String> {
        let inner = self.inner.read();
        let doc = inner.document(node.doc)?;
        doc.node(node.doc, &node.id)?;
        Ok(doc.string_value(&node.id))
    }

    fn children(&self, node: &NodeProxy) -> StoreResult<Vec<NodeProxy>> {
        let inner = self.inner.read();
        let data = inner.document(node.doc)?.node(node.doc, &node.id)?;
        Ok(data.children.iter().map(|id| NodeProxy::new(node.doc, id.clone())).collect())
    }

    fn attributes(&self, node: &NodeProxy) -> StoreResult<Vec<NodeProxy>> {
        let inner = self.inner.read();
        let data = inner.document(node.doc)?.node(node.doc, &node.id)?;
        Ok(data.attributes.iter().map(|id| NodeProxy::new(node.doc, id.clone())).collect())
    }

    fn document_uri(&self, doc: DocId) -> StoreResult<String> {
        Ok(self.inner.read().document(doc)?.path())
    }

    fn collection_of(&self, doc: DocId) -> StoreResult<Arc<Collection>> {
        let inner = self.inner.read();
        let uri = &inner.document(doc)?.collection;
        inner.collections.get(uri).cloned().ok_or_else(|| StoreError::CollectionNotFound(uri.clone()))
    }

    fn documents(&self, collection_uri: &str) -> StoreResult<NodeSet> {
        let uri = normalize_collection_uri(collection_uri);
        let inner = self.inner.read();
        let nested = format!("{uri}/");
        let known = uri == "/db" || inner.collections.keys().any(|c| *c == uri || c.starts_with(&nested));
        if !known {
            return Err(StoreError::CollectionNotFound(uri));
        }
        let docs = inner
            .documents
            .iter()
            .filter(|(_, d)| uri == "/db" || d.collection == uri || d.collection.starts_with(&nested))
            .map(|(id, _)| NodeProxy::document_node(*id))
            .collect();
        Ok(self.persistent(docs))
    }

    fn all_documents(&self) -> NodeSet {
        let inner = self.inner.read();
        self.persistent(inner.documents.keys().map(|id| NodeProxy::document_node(*id)).collect())
    }
}

impl StructuralIndex for MemoryStore {
    fn find_elements_by_tag_name(&self, name_type: NameType, qname: &QName, docs: &DocumentSet) -> StoreResult<NodeSet> {
        self.check_interrupted()?;
        self.stats.record_element_scan();
        let key = IndexedName::new(name_type, qname.clone());
        let inner = self.inner.read();
        let mut nodes = Vec::new();
        for doc in docs.iter() {
            if let Some(ids) = inner.documents.get(&doc).and_then(|d| d.names.get(&key)) {
                nodes.extend(ids.iter().map(|id| NodeProxy::new(doc, id.clone())));
            }
        }
        Ok(self.persistent(nodes))
    }

    fn find_ancestors_by_tag_name(
        &self,
        name_type: NameType,
        qname: &QName,
        axis: Axis,
        docs: &DocumentSet,
        selection: &NodeSet,
        context_id: ContextId,
    ) -> StoreResult<NodeSet> {
        self.check_interrupted()?;
        let include_self = match axis {
            Axis::SelfAxis | Axis::AncestorOrSelf => true,
            Axis::Parent | Axis::Ancestor => false,
            other => return Err(StoreError::UnsupportedAxis(other)),
        };
        self.stats.record_ancestor_query();
        let inner = self.inner.read();
        let mut nodes = Vec::new();
        for node in selection.iter().filter(|n| docs.contains(n.doc)) {
            let Some(doc) = inner.documents.get(&node.doc) else {
                continue;
            };
            let candidates: Vec<NodeId> = match axis {
                Axis::SelfAxis => vec![node.id.clone()],
                Axis::Parent => node.id.parent().into_iter().collect(),
                _ => include_self.then(|| node.id.clone()).into_iter().chain(node.id.ancestors()).collect(),
            };
            for id in candidates {
                if doc.nodes.get(&id).is_some_and(|data| name_matches(data, name_type, qname)) {
                    nodes.push(NodeProxy::new(node.doc, id));
                }
            }
        }
        let result = self.persistent(nodes);
        trace!(name = %qname, %axis, %context_id, selection = selection.len(), found = result.len(), "ancestor query");
        Ok(result)
    }

    fn find_descendants_by_tag_name(
        &self,
        name_type: NameType,
        qname: &QName,
        axis: Axis,
        docs: &DocumentSet,
        context: &NodeSet,
        context_id: ContextId,
    ) -> StoreResult<NodeSet> {
        self.check_interrupted()?;
        if !matches!(
            axis,
            Axis::Child | Axis::Attribute | Axis::Descendant | Axis::DescendantOrSelf | Axis::DescendantAttribute
        ) {
            return Err(StoreError::UnsupportedAxis(axis));
        }
        self.stats.record_descendant_query();
        let key = IndexedName::new(name_type, qname.clone());
        let inner = self.inner.read();
        let mut nodes = Vec::new();
        for node in context.iter().filter(|n| docs.contains(n.doc)) {
            let Some(ids) = inner.documents.get(&node.doc).and_then(|d| d.names.get(&key)) else {
                continue;
            };
            let start = ids.partition_point(|id| *id < node.id);
            let mut rest = &ids[start..];
            if let Some(first) = rest.first()
                && *first == node.id
            {
                if axis == Axis::DescendantOrSelf {
                    nodes.push(node.clone());
                }
                rest = &rest[1..];
            }
            let direct = matches!(axis, Axis::Child | Axis::Attribute);
            nodes.extend(
                rest.iter()
                    .take_while(|id| id.is_descendant_of(&node.id))
                    .filter(|id| !direct || id.is_child_of(&node.id))
                    .map(|id| NodeProxy::new(node.doc, id.clone())),
            );
        }
        let result = self.persistent(nodes);
        trace!(name = %qname, %axis, %context_id, context = context.len(), found = result.len(), "descendant query");
        Ok(result)
    }
}

impl RangeIndex for MemoryStore {
    fn find_by_value(&self, query: &RangeQuery<'_>) -> StoreResult<NodeSet> {
        self.check_interrupted()?;
        self.stats.record_range_lookup();
        let key_name = IndexedName::new(query.name_type, query.name.clone());
        let inner = self.inner.read();
        let mut nodes = Vec::new();
        for doc_id in query.docs.iter() {
            let Some(doc) = inner.documents.get(&doc_id) else {
                continue;
            };
            let Some(index_type) =
                inner.collections.get(&doc.collection).and_then(|c| c.range_index(query.name, query.name_type))
            else {
                continue;
            };
            let (Some(key), Some(entries)) = (index_type.key_from_value(query.key), doc.ranges.get(&key_name)) else {
                continue;
            };
            for (id, entry) in entries {
                let hit = match query.op {
                    RangeOp::Cmp(op) => op.holds_partial(entry.partial_cmp_key(&key)),
                    RangeOp::StartsWith => matches!((entry.as_text(), key.as_text()), (Some(e), Some(k)) if e.starts_with(k)),
                };
                if !hit {
                    continue;
                }
                let proxy = NodeProxy::new(doc_id, id.clone());
                let in_context = query
                    .context
                    .is_none_or(|ctx| ctx.contains(&proxy) || proxy.ancestors().any(|a| ctx.contains(&a)));
                if in_context {
                    nodes.push(proxy);
                }
            }
        }
        let result = self.persistent(nodes);
        trace!(name = %query.name, op = %query.op, key = %query.key, found = result.len(), "range lookup");
        Ok(result)
    }
}

impl Database for MemoryStore {
    fn configuration(&self) -> Arc<Configuration> {
        self.config.read().clone()
    }

    fn stats(&self) -> &IndexStats {
        &self.stats
    }
}
