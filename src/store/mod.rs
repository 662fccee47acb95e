//! Index storage abstraction.
//!
//! The [`IndexStore`] trait defines every persistence operation the scan
//! engine needs, enabling interchangeable backends: an embedded
//! file-backed store that serializes all writes through a single writer
//! task, and a relational SQLite store that wraps multi-row operations in
//! transactions.
//!
//! Backends are selected by the scheme of the configured index URL.
//! [`select_backend`] never falls back silently: an unrecognized scheme is
//! returned as [`StoreSelection::Unsupported`] and the caller decides what
//! to do about it.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`put_endpoint`](IndexStore::put_endpoint) | Insert or replace an endpoint |
//! | [`get_endpoint`](IndexStore::get_endpoint) | Look up an endpoint by name |
//! | [`remove_endpoint`](IndexStore::remove_endpoint) | Delete an endpoint |
//! | [`list_endpoints`](IndexStore::list_endpoints) | All registered endpoints |
//! | [`put_document`](IndexStore::put_document) | Insert or replace a document (hash and timestamp atomic with the row) |
//! | [`get_document`](IndexStore::get_document) | Look up a document by uuid |
//! | [`remove_document`](IndexStore::remove_document) | Delete a document and its elements |
//! | [`list_documents`](IndexStore::list_documents) | Documents of one endpoint |
//! | [`count_documents`](IndexStore::count_documents) | Document count, optionally per endpoint |
//! | [`replace_elements`](IndexStore::replace_elements) | Atomic delete-then-insert of a document's element set |

pub mod file;
pub mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Document, Element, Endpoint};

/// Abstract index backend.
///
/// Each operation is atomic with respect to other calls on the same
/// entity; readers never observe a document with a partially replaced
/// element set.
#[async_trait]
pub trait IndexStore: Send + Sync {
    async fn put_endpoint(&self, endpoint: &Endpoint) -> Result<()>;

    async fn get_endpoint(&self, name: &str) -> Result<Option<Endpoint>>;

    async fn remove_endpoint(&self, name: &str) -> Result<()>;

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>>;

    /// Insert or replace a document by uuid. The content hash and
    /// timestamp are written atomically with the rest of the row.
    async fn put_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, uuid: &str) -> Result<Option<Document>>;

    /// Delete a document together with its element set.
    async fn remove_document(&self, uuid: &str) -> Result<()>;

    /// All documents owned by `endpoint_name`, used by the scan driver to
    /// detect documents that disappeared from the remote listing.
    async fn list_documents(&self, endpoint_name: &str) -> Result<Vec<Document>>;

    async fn count_documents(&self, endpoint_name: Option<&str>) -> Result<u64>;

    /// Replace the full element set of a document: delete-then-insert,
    /// never partial.
    async fn replace_elements(&self, uuid: &str, elements: &[Element]) -> Result<()>;
}

/// Outcome of resolving an index URL to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSelection {
    /// Embedded file-backed store at the given path.
    File(PathBuf),
    /// Relational SQLite store addressed by the full URL.
    Sqlite(String),
    /// The URL's scheme names no known backend; the caller chooses the
    /// fallback.
    Unsupported(String),
}

/// Resolve an index URL by scheme.
pub fn select_backend(url: &str) -> StoreSelection {
    if let Some(path) = url.strip_prefix("file:") {
        StoreSelection::File(PathBuf::from(path))
    } else if url.starts_with("sqlite:") {
        StoreSelection::Sqlite(url.to_string())
    } else {
        StoreSelection::Unsupported(url.to_string())
    }
}

/// Open the backend a [`StoreSelection`] names.
///
/// Passing [`StoreSelection::Unsupported`] is an error; resolving the
/// fallback is the caller's decision, made before calling this.
pub async fn open_store(selection: StoreSelection) -> Result<Arc<dyn IndexStore>> {
    match selection {
        StoreSelection::File(path) => Ok(Arc::new(file::FileStore::open(path).await?)),
        StoreSelection::Sqlite(url) => Ok(Arc::new(sqlite::SqliteStore::connect(&url).await?)),
        StoreSelection::Unsupported(url) => {
            anyhow::bail!("unsupported index backend url: {}", url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_backend_by_scheme() {
        assert_eq!(
            select_backend("file:./data/index.json"),
            StoreSelection::File(PathBuf::from("./data/index.json"))
        );
        assert_eq!(
            select_backend("sqlite:./data/index.sqlite"),
            StoreSelection::Sqlite("sqlite:./data/index.sqlite".to_string())
        );
    }

    #[test]
    fn test_unknown_scheme_is_explicit() {
        let selection = select_backend("mongodb://localhost/catalog");
        assert_eq!(
            selection,
            StoreSelection::Unsupported("mongodb://localhost/catalog".to_string())
        );
    }
}
