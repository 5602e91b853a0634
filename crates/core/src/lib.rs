//! Storage side of xmldb: node identity, node sets, collections with their
//! index configuration, and the index services queried by the optimizer.

pub mod axis;
pub mod builder;
pub mod collection;
pub mod config;
pub mod error;
pub mod index;
pub mod node;
pub mod node_set;
pub mod qname;
pub mod store;
pub mod value;
pub mod xml;

pub use axis::Axis;
pub use collection::{Collection, IndexConfiguration, IndexKey, IndexType, RangeIndexSpec, SYSTEM_COLLECTION_URI};
pub use config::{CollectionConfig, Configuration, EnforceIndexUse};
pub use error::{StoreError, StoreResult};
pub use index::{
    ContextId, Database, IndexStats, IndexStatsSnapshot, NodeStore, RangeIndex, RangeOp, RangeQuery, StructuralIndex,
};
pub use node::{DocId, NodeId, NodeKind, NodeProxy};
pub use node_set::{DocumentSet, Generation, NarrowMode, NodeSet};
pub use qname::{IndexedName, NameType, QName};
pub use store::MemoryStore;
pub use value::{AtomicValue, ComparisonOp, parse_double};
