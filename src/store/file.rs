//! Embedded file-backed [`IndexStore`] implementation.
//!
//! Three named collections (`endpoints`, `documents`, `elements`) live in
//! one JSON file. All operations are messages to a single writer task, so
//! writes are serialized and a document's element set is always replaced
//! as a unit. The file is rewritten atomically (temp file + rename) after
//! every mutation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use super::IndexStore;
use crate::models::{Document, Element, Endpoint};

const COMMAND_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Collections {
    #[serde(default)]
    endpoints: Vec<Endpoint>,
    #[serde(default)]
    documents: Vec<Document>,
    #[serde(default)]
    elements: Vec<Element>,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum StoreCmd {
    PutEndpoint(Endpoint, Reply<()>),
    GetEndpoint(String, Reply<Option<Endpoint>>),
    RemoveEndpoint(String, Reply<()>),
    ListEndpoints(Reply<Vec<Endpoint>>),
    PutDocument(Document, Reply<()>),
    GetDocument(String, Reply<Option<Document>>),
    RemoveDocument(String, Reply<()>),
    ListDocuments(String, Reply<Vec<Document>>),
    CountDocuments(Option<String>, Reply<u64>),
    ReplaceElements(String, Vec<Element>, Reply<()>),
}

pub struct FileStore {
    tx: mpsc::Sender<StoreCmd>,
}

impl FileStore {
    /// Load (or create) the collections file and start the writer task.
    pub async fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let collections = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read index file: {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse index file: {}", path.display()))?
        } else {
            let collections = Collections::default();
            persist(&path, &collections)?;
            collections
        };

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        tokio::spawn(run_writer(path, collections, rx));
        Ok(Self { tx })
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> StoreCmd) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| anyhow::anyhow!("index store writer stopped"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("index store writer dropped the request"))?
    }
}

async fn run_writer(path: PathBuf, mut collections: Collections, mut rx: mpsc::Receiver<StoreCmd>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            StoreCmd::PutEndpoint(endpoint, reply) => {
                collections.endpoints.retain(|e| e.name != endpoint.name);
                collections.endpoints.push(endpoint);
                let _ = reply.send(persist(&path, &collections));
            }
            StoreCmd::GetEndpoint(name, reply) => {
                let found = collections.endpoints.iter().find(|e| e.name == name);
                let _ = reply.send(Ok(found.cloned()));
            }
            StoreCmd::RemoveEndpoint(name, reply) => {
                collections.endpoints.retain(|e| e.name != name);
                let _ = reply.send(persist(&path, &collections));
            }
            StoreCmd::ListEndpoints(reply) => {
                let _ = reply.send(Ok(collections.endpoints.clone()));
            }
            StoreCmd::PutDocument(document, reply) => {
                collections.documents.retain(|d| d.uuid != document.uuid);
                collections.documents.push(document);
                let _ = reply.send(persist(&path, &collections));
            }
            StoreCmd::GetDocument(uuid, reply) => {
                let found = collections.documents.iter().find(|d| d.uuid == uuid);
                let _ = reply.send(Ok(found.cloned()));
            }
            StoreCmd::RemoveDocument(uuid, reply) => {
                collections.documents.retain(|d| d.uuid != uuid);
                collections.elements.retain(|e| e.uuid != uuid);
                let _ = reply.send(persist(&path, &collections));
            }
            StoreCmd::ListDocuments(endpoint_name, reply) => {
                let docs = collections
                    .documents
                    .iter()
                    .filter(|d| d.endpoint == endpoint_name)
                    .cloned()
                    .collect();
                let _ = reply.send(Ok(docs));
            }
            StoreCmd::CountDocuments(endpoint_name, reply) => {
                let count = collections
                    .documents
                    .iter()
                    .filter(|d| {
                        endpoint_name
                            .as_deref()
                            .map_or(true, |name| d.endpoint == name)
                    })
                    .count() as u64;
                let _ = reply.send(Ok(count));
            }
            StoreCmd::ReplaceElements(uuid, elements, reply) => {
                collections.elements.retain(|e| e.uuid != uuid);
                collections.elements.extend(elements);
                let _ = reply.send(persist(&path, &collections));
            }
        }
    }
}

fn persist(path: &PathBuf, collections: &Collections) -> Result<()> {
    let content = serde_json::to_vec_pretty(collections)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write index file: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace index file: {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl IndexStore for FileStore {
    async fn put_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let endpoint = endpoint.clone();
        self.call(|reply| StoreCmd::PutEndpoint(endpoint, reply)).await
    }

    async fn get_endpoint(&self, name: &str) -> Result<Option<Endpoint>> {
        let name = name.to_string();
        self.call(|reply| StoreCmd::GetEndpoint(name, reply)).await
    }

    async fn remove_endpoint(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.call(|reply| StoreCmd::RemoveEndpoint(name, reply)).await
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        self.call(StoreCmd::ListEndpoints).await
    }

    async fn put_document(&self, document: &Document) -> Result<()> {
        let document = document.clone();
        self.call(|reply| StoreCmd::PutDocument(document, reply)).await
    }

    async fn get_document(&self, uuid: &str) -> Result<Option<Document>> {
        let uuid = uuid.to_string();
        self.call(|reply| StoreCmd::GetDocument(uuid, reply)).await
    }

    async fn remove_document(&self, uuid: &str) -> Result<()> {
        let uuid = uuid.to_string();
        self.call(|reply| StoreCmd::RemoveDocument(uuid, reply)).await
    }

    async fn list_documents(&self, endpoint_name: &str) -> Result<Vec<Document>> {
        let endpoint_name = endpoint_name.to_string();
        self.call(|reply| StoreCmd::ListDocuments(endpoint_name, reply))
            .await
    }

    async fn count_documents(&self, endpoint_name: Option<&str>) -> Result<u64> {
        let endpoint_name = endpoint_name.map(str::to_string);
        self.call(|reply| StoreCmd::CountDocuments(endpoint_name, reply))
            .await
    }

    async fn replace_elements(&self, uuid: &str, elements: &[Element]) -> Result<()> {
        let uuid = uuid.to_string();
        let elements = elements.to_vec();
        self.call(|reply| StoreCmd::ReplaceElements(uuid, elements, reply))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ElementValue, EndpointKind};
    use chrono::Utc;

    fn document(uuid: &str, endpoint: &str, hash: u32) -> Document {
        Document {
            uuid: uuid.to_string(),
            endpoint: endpoint.to_string(),
            address: format!("/data/{}.json", uuid),
            content_hash: hash,
            id_short: uuid.to_uppercase(),
            asset_id: None,
            thumbnail: None,
            timestamp: Utc::now(),
        }
    }

    fn element(uuid: &str, id_short: &str) -> Element {
        Element {
            uuid: uuid.to_string(),
            model_type: "Property".to_string(),
            id: None,
            id_short: id_short.to_string(),
            value: ElementValue::String("x".to_string()),
        }
    }

    #[tokio::test]
    async fn test_document_roundtrip_and_count() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("index.json")).await.unwrap();

        store.put_document(&document("a", "files", 1)).await.unwrap();
        store.put_document(&document("b", "files", 2)).await.unwrap();
        store.put_document(&document("c", "plant", 3)).await.unwrap();

        assert_eq!(store.count_documents(None).await.unwrap(), 3);
        assert_eq!(store.count_documents(Some("files")).await.unwrap(), 2);
        assert_eq!(
            store.get_document("b").await.unwrap().unwrap().content_hash,
            2
        );

        // Replacing by uuid must not grow the collection.
        store.put_document(&document("b", "files", 9)).await.unwrap();
        assert_eq!(store.count_documents(None).await.unwrap(), 3);
        assert_eq!(
            store.get_document("b").await.unwrap().unwrap().content_hash,
            9
        );
    }

    #[tokio::test]
    async fn test_remove_document_drops_elements() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("index.json")).await.unwrap();

        store.put_document(&document("a", "files", 1)).await.unwrap();
        store
            .replace_elements("a", &[element("a", "P1"), element("a", "P2")])
            .await
            .unwrap();
        store.remove_document("a").await.unwrap();

        assert!(store.get_document("a").await.unwrap().is_none());
        // Reopen and verify the elements went with the document.
        drop(store);
        let reopened = FileStore::open(dir.path().join("index.json")).await.unwrap();
        reopened.put_document(&document("a", "files", 1)).await.unwrap();
        reopened.replace_elements("a", &[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_elements_is_full_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let store = FileStore::open(path.clone()).await.unwrap();

        store.put_document(&document("a", "files", 1)).await.unwrap();
        store
            .replace_elements("a", &[element("a", "P1"), element("a", "P2")])
            .await
            .unwrap();
        store
            .replace_elements("a", &[element("a", "P3")])
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("P3"));
        assert!(!content.contains("P1"));
    }

    #[tokio::test]
    async fn test_endpoints_persist_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");

        {
            let store = FileStore::open(path.clone()).await.unwrap();
            store
                .put_endpoint(&Endpoint {
                    name: "files".to_string(),
                    url: "file:///srv/aas".to_string(),
                    kind: EndpointKind::Directory,
                    version: "v3".to_string(),
                    schedule: None,
                    headers: None,
                })
                .await
                .unwrap();
        }

        let store = FileStore::open(path).await.unwrap();
        let listed = store.list_endpoints().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "files");
        assert!(store.get_endpoint("plant").await.unwrap().is_none());

        store.remove_endpoint("files").await.unwrap();
        assert!(store.list_endpoints().await.unwrap().is_empty());
    }
}
