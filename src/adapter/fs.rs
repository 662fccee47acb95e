//! Directory adapter: a file repository of AAS environment JSON files.

use std::path::PathBuf;

use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use super::EndpointAdapter;
use crate::error::ScanError;
use crate::extract;
use crate::models::{DocumentLabel, DocumentRecord, Endpoint, PagedResult};

const PAGE_SIZE: usize = 32;
const INCLUDE_GLOBS: [&str; 1] = ["**/*.json"];

pub struct DirectoryAdapter {
    endpoint: Endpoint,
    root: PathBuf,
    page_size: usize,
    /// Relative paths of all environment files, stable-sorted; filled on
    /// open, cleared on close.
    files: Vec<String>,
}

impl DirectoryAdapter {
    pub fn new(endpoint: Endpoint) -> Self {
        let root = PathBuf::from(
            endpoint
                .url
                .strip_prefix("file://")
                .unwrap_or(&endpoint.url),
        );
        Self {
            endpoint,
            root,
            page_size: PAGE_SIZE,
            files: Vec::new(),
        }
    }

    fn include_set() -> Result<GlobSet, ScanError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in INCLUDE_GLOBS {
            builder.add(Glob::new(pattern).map_err(|e| ScanError::Internal(e.to_string()))?);
        }
        builder
            .build()
            .map_err(|e| ScanError::Internal(e.to_string()))
    }
}

#[async_trait]
impl EndpointAdapter for DirectoryAdapter {
    async fn open(&mut self) -> Result<(), ScanError> {
        if !self.root.is_dir() {
            return Err(ScanError::Connection(format!(
                "endpoint root does not exist: {}",
                self.root.display()
            )));
        }

        let include = Self::include_set()?;
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|e| ScanError::Connection(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            if include.is_match(&relative) {
                files.push(relative);
            }
        }
        files.sort();
        self.files = files;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ScanError> {
        self.files.clear();
        Ok(())
    }

    async fn next_page(
        &mut self,
        cursor: Option<String>,
    ) -> Result<PagedResult<DocumentLabel>, ScanError> {
        let start = match cursor {
            None => 0,
            Some(raw) => raw
                .parse::<usize>()
                .map_err(|_| ScanError::Validation(format!("bad listing cursor: {}", raw)))?,
        };

        let end = (start + self.page_size).min(self.files.len());
        let labels = self.files[start.min(end)..end]
            .iter()
            .map(|relative| DocumentLabel {
                id: relative.clone(),
                id_short: PathBuf::from(relative)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_else(|| relative.clone()),
            })
            .collect();

        let next = (end < self.files.len()).then(|| end.to_string());
        Ok(PagedResult::new(labels, next))
    }

    async fn create_document(
        &mut self,
        label: &DocumentLabel,
    ) -> Result<DocumentRecord, ScanError> {
        let path = self.root.join(&label.id);
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| ScanError::Connection(format!("{}: {}", path.display(), e)))?;
        extract::parse_environment(&self.endpoint.name, &path.display().to_string(), &raw)
            .map_err(|e| ScanError::Validation(format!("{}: {}", label.id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EndpointKind;

    fn environment(shell_id: &str) -> String {
        format!(
            r#"{{"assetAdministrationShells": [{{"id": "{}", "idShort": "Shell"}}], "submodels": []}}"#,
            shell_id
        )
    }

    fn endpoint(root: &std::path::Path) -> Endpoint {
        Endpoint {
            name: "files".to_string(),
            url: root.display().to_string(),
            kind: EndpointKind::Directory,
            version: "v3".to_string(),
            schedule: None,
            headers: None,
        }
    }

    #[tokio::test]
    async fn test_pages_in_stable_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.json", "a.json", "b.json", "notes.txt"] {
            std::fs::write(dir.path().join(name), environment(name)).unwrap();
        }

        let mut adapter = DirectoryAdapter::new(endpoint(dir.path()));
        adapter.page_size = 2;
        adapter.open().await.unwrap();

        let first = adapter.next_page(None).await.unwrap();
        assert_eq!(first.result.len(), 2);
        assert_eq!(first.result[0].id, "a.json");
        assert_eq!(first.result[0].id_short, "a");
        let cursor = first.cursor().map(str::to_string);
        assert!(cursor.is_some());

        let second = adapter.next_page(cursor).await.unwrap();
        assert_eq!(second.result.len(), 1);
        assert_eq!(second.result[0].id, "c.json");
        assert!(second.cursor().is_none());

        adapter.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_root_is_connection_error() {
        let mut adapter = DirectoryAdapter::new(endpoint(std::path::Path::new(
            "/nonexistent/aas-root",
        )));
        let err = adapter.open().await.unwrap_err();
        assert!(matches!(err, ScanError::Connection(_)));
    }

    #[tokio::test]
    async fn test_create_document_parses_environment() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pump.json"), environment("urn:aas:pump")).unwrap();

        let mut adapter = DirectoryAdapter::new(endpoint(dir.path()));
        adapter.open().await.unwrap();
        let page = adapter.next_page(None).await.unwrap();
        let record = adapter.create_document(&page.result[0]).await.unwrap();
        assert_eq!(record.document.endpoint, "files");
        assert_eq!(record.document.id_short, "Shell");
    }

    #[tokio::test]
    async fn test_create_document_malformed_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{ not json").unwrap();

        let mut adapter = DirectoryAdapter::new(endpoint(dir.path()));
        adapter.open().await.unwrap();
        let page = adapter.next_page(None).await.unwrap();
        let err = adapter.create_document(&page.result[0]).await.unwrap_err();
        assert!(matches!(err, ScanError::Validation(_)));
    }
}
