//! Query layer of xmldb: a compiler and evaluator for a path expression
//! subset, the index capability of comparisons, and the `exist:optimize`,
//! `exist:no-index` and `exist:force-index-use` pragmas.
//!
//! ```no_run
//! use std::sync::Arc;
//! use xmldb_core::{Configuration, MemoryStore, NodeStore};
//! use xmldb_xquery::{QueryContext, Sequence, compile};
//!
//! let store = Arc::new(MemoryStore::new());
//! store.store_xml("/db/books", "a.xml", "<library><book><title>Dune</title></book></library>")?;
//! let query = compile("(# exist:optimize #) { //book[title = 'Dune'] }", &Configuration::default())?;
//! let mut ctx = QueryContext::new(store.clone());
//! let context = Sequence::from_nodes(store.all_documents());
//! let books = query.evaluate(&mut ctx, Some(&context))?;
//! assert_eq!(books.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod analyze;
pub mod compiler;
pub mod context;
pub mod error;
pub mod evaluator;
pub mod expr;
pub mod functions;
pub mod optimizable;
pub mod parser;
pub mod pragma;
pub mod resolver;
pub mod sequence;
pub mod visitor;

pub use compiler::{CompiledQuery, compile};
pub use context::QueryContext;
pub use error::{Error, ErrorCode, Result};
pub use expr::{Expr, ExprId};
pub use optimizable::{IndexProbe, IndexUseReporter, Optimizable};
pub use pragma::{OptimizeState, OptimizeStats, Pragma, PragmaKind, PragmaPhase};
pub use resolver::get_qname_index_type;
pub use sequence::{Item, Sequence};
