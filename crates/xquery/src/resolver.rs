//! Index type resolution across the collections of a context sequence.

use std::sync::Arc;

use tracing::trace;
use xmldb_core::{Collection, EnforceIndexUse, IndexType, NameType, QName};

use crate::context::QueryContext;
use crate::error::Result;
use crate::sequence::Sequence;

/// Distinct collections referenced by the nodes of a sequence, in document
/// order of first reference.
pub fn collections_of(ctx: &QueryContext, sequence: &Sequence) -> Result<Vec<Arc<Collection>>> {
    let docs = match sequence {
        Sequence::Nodes(set) => set.document_set(),
        Sequence::Items(items) => items.iter().filter_map(|i| i.as_node()).map(|n| n.doc).collect(),
    };
    let mut collections: Vec<Arc<Collection>> = Vec::new();
    for doc in docs.iter() {
        let collection = ctx.db().collection_of(doc)?;
        if !collections.iter().any(|c| c.uri == collection.uri) {
            collections.push(collection);
        }
    }
    Ok(collections)
}

/// Range index type usable for `qname` over every collection of the
/// sequence, or `None` if there is no common index.
///
/// System collections are ignored. A collection without the index disables
/// index use unless the policy is [`EnforceIndexUse::Always`], which accepts
/// the first index found. Two collections declaring different types never
/// share an index.
pub fn get_qname_index_type(
    ctx: &QueryContext,
    sequence: Option<&Sequence>,
    qname: &QName,
    name_type: NameType,
) -> Result<Option<IndexType>> {
    let Some(sequence) = sequence else {
        return Ok(None);
    };
    let always = ctx.db().configuration().enforce_index_use == EnforceIndexUse::Always;

    let mut index_type: Option<IndexType> = None;
    for collection in collections_of(ctx, sequence)? {
        if collection.is_system() {
            continue;
        }
        match (collection.range_index(qname, name_type), index_type) {
            (None, _) => {
                trace!(collection = %collection.uri, name = %qname, "collection does not define an index");
                if !always {
                    return Ok(None);
                }
            }
            (Some(found), None) => {
                if always {
                    return Ok(Some(found));
                }
                index_type = Some(found);
            }
            (Some(found), Some(settled)) if found != settled => {
                trace!(
                    collection = %collection.uri,
                    name = %qname,
                    found = %found,
                    expected = %settled,
                    "index type conflict"
                );
                return Ok(None);
            }
            (Some(_), Some(_)) => {}
        }
    }
    Ok(index_type)
}
