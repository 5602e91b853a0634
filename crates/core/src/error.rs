use thiserror::Error;

use crate::axis::Axis;
use crate::node::DocId;

/// Failures of the store and its index services.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("collection not found: {0}")]
    CollectionNotFound(String),
    #[error("document not found: {0}")]
    DocumentNotFound(String),
    #[error("unknown node {node} in {doc}")]
    NodeNotFound { doc: DocId, node: String },
    #[error("malformed XML in {document}: {message}")]
    MalformedXml { document: String, message: String },
    #[error("invalid index configuration: {0}")]
    InvalidIndexConfig(String),
    #[error("axis {0} is not supported by this index query")]
    UnsupportedAxis(Axis),
    #[error("index probe interrupted")]
    Interrupted,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;
