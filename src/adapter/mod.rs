//! Endpoint adapter contract and per-protocol implementations.
//!
//! An adapter owns the wire protocol for one endpoint kind and exposes the
//! four operations the scan driver consumes: `open`, `close`, `next_page`,
//! and `create_document`. The driver is generic over this trait; the
//! concrete adapter is selected by the endpoint's kind tag at construction.

pub mod fs;
pub mod http;

use async_trait::async_trait;

use crate::error::ScanError;
use crate::models::{DocumentLabel, DocumentRecord, Endpoint, EndpointKind, PagedResult};

/// Wire-level access to one endpoint.
///
/// Each operation may fail; failures propagate as the scan driver's error
/// branch. `next_page` with `None` requests the first page; an absent
/// cursor in the returned page means the listing is exhausted.
#[async_trait]
pub trait EndpointAdapter: Send + Sync {
    /// Connect to the endpoint. Called once before paging.
    async fn open(&mut self) -> Result<(), ScanError>;

    /// Release the connection. Called on every exit path.
    async fn close(&mut self) -> Result<(), ScanError>;

    /// Fetch the next page of the document listing.
    async fn next_page(
        &mut self,
        cursor: Option<String>,
    ) -> Result<PagedResult<DocumentLabel>, ScanError>;

    /// Fetch and parse one labeled document into its index record.
    async fn create_document(&mut self, label: &DocumentLabel)
        -> Result<DocumentRecord, ScanError>;
}

/// Construct the adapter for an endpoint, selected by its kind.
pub fn adapter_for(endpoint: &Endpoint) -> Result<Box<dyn EndpointAdapter>, ScanError> {
    match endpoint.kind {
        EndpointKind::Directory => Ok(Box::new(fs::DirectoryAdapter::new(endpoint.clone()))),
        EndpointKind::AasApi => Ok(Box::new(http::AasApiAdapter::new(endpoint.clone())?)),
    }
}
