use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use xmldb_core::{Configuration, MemoryStore, NodeSet, NodeStore};

pub type CliResult<T> = anyhow::Result<T>;

pub fn load_configuration(path: Option<&Path>) -> CliResult<Configuration> {
    match path {
        Some(path) => Configuration::load(path)
            .with_context(|| format!("failed to load configuration from {}", path.display())),
        None => Ok(Configuration::default()),
    }
}

/// Collection URI for a data directory: `/db/<directory name>`.
pub fn collection_uri_for(dir: &Path) -> CliResult<String> {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("cannot derive a collection name from {}", dir.display()))?;
    Ok(format!("/db/{name}"))
}

/// Builds a store from the configuration and stores every `*.xml` file of
/// each data directory, in file name order.
pub fn open_store(config: &Configuration, data_dirs: &[PathBuf]) -> CliResult<Arc<MemoryStore>> {
    let store = Arc::new(MemoryStore::with_configuration(config.clone()));
    for dir in data_dirs {
        let collection = collection_uri_for(dir)?;
        store.create_collection(&collection);

        let mut files = fs::read_dir(dir)
            .with_context(|| format!("failed to read data directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("xml")))
            .collect::<Vec<_>>();
        files.sort();

        for file in &files {
            let name = file
                .file_name()
                .and_then(|name| name.to_str())
                .with_context(|| format!("invalid file name {}", file.display()))?;
            let xml = fs::read_to_string(file).with_context(|| format!("failed to read {}", file.display()))?;
            store.store_xml(&collection, name, &xml)?;
        }
        tracing::info!(%collection, documents = files.len(), "data directory loaded");
    }
    Ok(store)
}

/// Context documents: the named collections, or every stored document.
pub fn context_documents(store: &MemoryStore, collections: &[String]) -> CliResult<NodeSet> {
    if collections.is_empty() {
        return Ok(store.all_documents());
    }
    let mut documents = NodeSet::empty();
    for uri in collections {
        documents = documents.union(&store.documents(uri)?);
    }
    Ok(documents)
}

pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn loads_xml_files_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        let books = dir.path().join("books");
        fs::create_dir(&books).expect("mkdir");
        fs::write(books.join("b.xml"), "<book><title>Momo</title></book>").expect("write");
        fs::write(books.join("a.xml"), "<book><title>Dune</title></book>").expect("write");
        fs::write(books.join("notes.txt"), "not xml").expect("write");

        let store = open_store(&Configuration::default(), &[books]).expect("store");
        let docs = context_documents(&store, &["/db/books".to_owned()]).expect("docs");
        let uris = docs.iter().map(|doc| store.document_uri(doc.doc).expect("uri")).collect::<Vec<_>>();
        assert_eq!(uris, ["/db/books/a.xml", "/db/books/b.xml"]);
        assert!(docs.is_persistent());
    }

    #[rstest]
    fn malformed_documents_are_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let broken = dir.path().join("broken");
        fs::create_dir(&broken).expect("mkdir");
        fs::write(broken.join("x.xml"), "<book>").expect("write");

        let err = open_store(&Configuration::default(), &[broken]).unwrap_err();
        assert!(err.to_string().contains("x.xml"));
    }

    #[rstest]
    fn unknown_collection_is_an_error() {
        let store = MemoryStore::new();
        assert!(context_documents(&store, &["/db/nowhere".to_owned()]).is_err());
    }
}
