//! Core data models for the AAS catalog.
//!
//! These types represent the endpoints, documents, and flattened search
//! elements that flow through the scan and indexing pipeline, plus the
//! task bookkeeping records and the scan result stream.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Protocol kind of a remote document source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointKind {
    /// A directory of AAS environment JSON files.
    Directory,
    /// An AAS repository REST API.
    AasApi,
}

impl EndpointKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Directory => "directory",
            EndpointKind::AasApi => "aas-api",
        }
    }
}

impl std::str::FromStr for EndpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "directory" => Ok(EndpointKind::Directory),
            "aas-api" => Ok(EndpointKind::AasApi),
            other => Err(format!(
                "unknown endpoint kind: '{}' (expected directory or aas-api)",
                other
            )),
        }
    }
}

/// A remote source of documents, identified by name and protocol kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub url: String,
    pub kind: EndpointKind,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Extra request headers for API endpoints (e.g. authorization).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

/// One indexed Asset Administration Shell instance.
///
/// `content_hash` is the sole signal used to detect that the document's
/// content changed since the last scan; a scan that recomputes the same
/// hash must not rewrite the document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub uuid: String,
    /// Name of the owning endpoint.
    pub endpoint: String,
    /// Location of the document within its endpoint (path or URL).
    pub address: String,
    pub content_hash: u32,
    pub id_short: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Typed value of a flattened element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementValue {
    String(String),
    Number(f64),
    Date(DateTime<Utc>),
    Boolean(bool),
}

/// A flattened, typed key/value fact belonging to a [`Document`], used for
/// search. Elements are deleted and recreated together with their owning
/// document's update or removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    /// Uuid of the owning document.
    pub uuid: String,
    pub model_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub id_short: String,
    pub value: ElementValue,
}

/// A document built by an endpoint adapter: the document row plus its
/// full flattened element set.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub document: Document,
    pub elements: Vec<Element>,
}

/// Identifies one document in an endpoint's listing before it is fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentLabel {
    pub id: String,
    pub id_short: String,
}

/// One page of an endpoint listing.
///
/// An absent cursor signals that no further pages exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedResult<T> {
    pub result: Vec<T>,
    #[serde(default)]
    pub paging_metadata: PagingMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PagingMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl<T> PagedResult<T> {
    pub fn new(result: Vec<T>, cursor: Option<String>) -> Self {
        Self {
            result,
            paging_metadata: PagingMetadata { cursor },
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        self.paging_metadata.cursor.as_deref()
    }
}

/// Kind of work a task tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    ScanEndpoint,
    ScanTemplates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Idle,
    InProgress,
}

/// Bookkeeping record for one in-flight scan.
///
/// At most one task with a given `(endpoint_name, kind)` exists at a time;
/// the registry's `find` is the dedup guard that enforces it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: u64,
    pub endpoint_name: String,
    /// Opaque identity of the requester.
    pub owner: String,
    pub kind: TaskKind,
    pub state: TaskState,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

/// One result emitted by a scan driver.
///
/// `End` is the unique terminal signal for a task and always carries the
/// final message list, even when the scan failed.
#[derive(Debug, Clone)]
pub enum ScanResult {
    Add {
        task_id: u64,
        endpoint: Endpoint,
        record: DocumentRecord,
    },
    Update {
        task_id: u64,
        endpoint: Endpoint,
        record: DocumentRecord,
    },
    Remove {
        task_id: u64,
        endpoint: Endpoint,
        document: Document,
    },
    End {
        task_id: u64,
        messages: Vec<String>,
    },
}

impl ScanResult {
    pub fn task_id(&self) -> u64 {
        match self {
            ScanResult::Add { task_id, .. }
            | ScanResult::Update { task_id, .. }
            | ScanResult::Remove { task_id, .. }
            | ScanResult::End { task_id, .. } => *task_id,
        }
    }

    /// Wire code: 0=Add, 1=Remove, 2=Update, 3=End.
    pub fn kind_code(&self) -> u8 {
        match self {
            ScanResult::Add { .. } => 0,
            ScanResult::Remove { .. } => 1,
            ScanResult::Update { .. } => 2,
            ScanResult::End { .. } => 3,
        }
    }

    /// External wire shape of this result.
    pub fn to_wire(&self) -> ScanResultWire {
        match self {
            ScanResult::Add {
                task_id,
                endpoint,
                record,
            }
            | ScanResult::Update {
                task_id,
                endpoint,
                record,
            } => ScanResultWire {
                result_type: "ScanEndpointResult".to_string(),
                kind: self.kind_code(),
                task_id: *task_id,
                messages: Vec::new(),
                endpoint: Some(endpoint.clone()),
                document: Some(record.document.clone()),
                templates: None,
            },
            ScanResult::Remove {
                task_id,
                endpoint,
                document,
            } => ScanResultWire {
                result_type: "ScanEndpointResult".to_string(),
                kind: self.kind_code(),
                task_id: *task_id,
                messages: Vec::new(),
                endpoint: Some(endpoint.clone()),
                document: Some(document.clone()),
                templates: None,
            },
            ScanResult::End { task_id, messages } => ScanResultWire {
                result_type: "ScanEndResult".to_string(),
                kind: self.kind_code(),
                task_id: *task_id,
                messages: messages.clone(),
                endpoint: None,
                document: None,
                templates: None,
            },
        }
    }
}

/// Serialized form of a [`ScanResult`] as consumed outside the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResultWire {
    #[serde(rename = "type")]
    pub result_type: String,
    pub kind: u8,
    pub task_id: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates: Option<Vec<DocumentLabel>>,
}

impl ScanResultWire {
    /// Wire shape for a page of template labels produced by a template scan.
    pub fn templates(task_id: u64, templates: Vec<DocumentLabel>) -> Self {
        Self {
            result_type: "ScanTemplatesResult".to_string(),
            kind: 0,
            task_id,
            messages: Vec::new(),
            endpoint: None,
            document: None,
            templates: Some(templates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        Document {
            uuid: "u-1".to_string(),
            endpoint: "files".to_string(),
            address: "/data/a.json".to_string(),
            content_hash: 0xDEAD_BEEF,
            id_short: "Pump".to_string(),
            asset_id: Some("urn:asset:1".to_string()),
            thumbnail: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_end_result_wire_shape() {
        let end = ScanResult::End {
            task_id: 7,
            messages: vec!["connection refused".to_string()],
        };
        let json = serde_json::to_value(end.to_wire()).unwrap();
        assert_eq!(json["type"], "ScanEndResult");
        assert_eq!(json["kind"], 3);
        assert_eq!(json["taskId"], 7);
        assert_eq!(json["messages"][0], "connection refused");
        assert!(json.get("document").is_none());
    }

    #[test]
    fn test_endpoint_result_wire_shape() {
        let endpoint = Endpoint {
            name: "files".to_string(),
            url: "file:///data/aas".to_string(),
            kind: EndpointKind::Directory,
            version: "v3".to_string(),
            schedule: None,
            headers: None,
        };
        let add = ScanResult::Add {
            task_id: 1,
            endpoint,
            record: DocumentRecord {
                document: sample_document(),
                elements: Vec::new(),
            },
        };
        let json = serde_json::to_value(add.to_wire()).unwrap();
        assert_eq!(json["type"], "ScanEndpointResult");
        assert_eq!(json["kind"], 0);
        assert_eq!(json["document"]["idShort"], "Pump");
        assert_eq!(json["endpoint"]["name"], "files");
    }

    #[test]
    fn test_templates_result_wire_shape() {
        let wire = ScanResultWire::templates(
            3,
            vec![DocumentLabel {
                id: "urn:tmpl:1".to_string(),
                id_short: "Nameplate".to_string(),
            }],
        );
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["type"], "ScanTemplatesResult");
        assert_eq!(json["templates"][0]["idShort"], "Nameplate");
    }

    #[test]
    fn test_paged_result_cursor_roundtrip() {
        let page = PagedResult::new(vec![1, 2, 3], Some("next".to_string()));
        let json = serde_json::to_string(&page).unwrap();
        let back: PagedResult<i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.cursor(), Some("next"));

        // A listing without paging metadata means no further pages.
        let last: PagedResult<i32> = serde_json::from_str(r#"{"result":[4]}"#).unwrap();
        assert_eq!(last.cursor(), None);
    }

    #[test]
    fn test_remove_kind_code() {
        let remove = ScanResult::Remove {
            task_id: 2,
            endpoint: Endpoint {
                name: "files".to_string(),
                url: "file:///data/aas".to_string(),
                kind: EndpointKind::Directory,
                version: String::new(),
                schedule: None,
                headers: None,
            },
            document: sample_document(),
        };
        assert_eq!(remove.kind_code(), 1);
        assert_eq!(remove.to_wire().result_type, "ScanEndpointResult");
    }
}
