//! HTTP adapter for AAS repository REST APIs.
//!
//! Pages the repository's shell listing with the server's continuation
//! cursor, then fetches each shell and its referenced submodels to
//! assemble the environment that the extraction layer flattens. Request
//! headers configured on the endpoint (e.g. authorization) are attached to
//! every call; retry and timeout policy stays with the remote server and
//! the HTTP client defaults.

use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};
use tracing::warn;

use super::EndpointAdapter;
use crate::error::ScanError;
use crate::extract;
use crate::models::{DocumentLabel, DocumentRecord, Endpoint, PagedResult};

const PAGE_LIMIT: usize = 32;

pub struct AasApiAdapter {
    endpoint: Endpoint,
    base: String,
    client: Option<reqwest::Client>,
}

impl AasApiAdapter {
    pub fn new(endpoint: Endpoint) -> Result<Self, ScanError> {
        let base = endpoint.url.trim_end_matches('/').to_string();
        if base.is_empty() {
            return Err(ScanError::Configuration(format!(
                "endpoint '{}' has no url",
                endpoint.name
            )));
        }
        Ok(Self {
            endpoint,
            base,
            client: None,
        })
    }

    fn headers(&self) -> Result<HeaderMap, ScanError> {
        let mut map = HeaderMap::new();
        if let Some(headers) = &self.endpoint.headers {
            for (name, value) in headers {
                let name = name.parse::<HeaderName>().map_err(|_| {
                    ScanError::Configuration(format!("bad header name: {}", name))
                })?;
                let value = HeaderValue::from_str(value).map_err(|_| {
                    ScanError::Configuration(format!("bad header value for {}", name))
                })?;
                map.insert(name, value);
            }
        }
        Ok(map)
    }

    fn client(&self) -> Result<&reqwest::Client, ScanError> {
        self.client
            .as_ref()
            .ok_or_else(|| ScanError::Internal("adapter used before open".to_string()))
    }

    fn shell_url(&self, id: &str) -> String {
        format!("{}/shells/{}", self.base, encode_identifier(id))
    }

    fn submodel_url(&self, id: &str) -> String {
        format!("{}/submodels/{}", self.base, encode_identifier(id))
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, ScanError> {
        let response = self
            .client()?
            .get(url)
            .send()
            .await
            .map_err(|e| ScanError::Connection(format!("{}: {}", url, e)))?;
        if !response.status().is_success() {
            return Err(ScanError::Connection(format!(
                "{}: http status {}",
                url,
                response.status()
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ScanError::Connection(format!("{}: {}", url, e)))
    }
}

/// AAS repository APIs address shells and submodels by the base64url
/// encoding of their identifier.
fn encode_identifier(id: &str) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(id)
}

/// Submodel identifiers referenced by a shell.
fn submodel_refs(shell: &Value) -> Vec<String> {
    let Some(refs) = shell["submodels"].as_array() else {
        return Vec::new();
    };
    refs.iter()
        .filter_map(|reference| {
            reference["keys"]
                .as_array()
                .and_then(|keys| keys.iter().find(|k| k["type"] == "Submodel"))
                .and_then(|key| key["value"].as_str())
                .map(str::to_string)
        })
        .collect()
}

#[async_trait]
impl EndpointAdapter for AasApiAdapter {
    async fn open(&mut self) -> Result<(), ScanError> {
        let client = reqwest::Client::builder()
            .default_headers(self.headers()?)
            .build()
            .map_err(|e| ScanError::Internal(e.to_string()))?;
        self.client = Some(client);

        // An unreachable or unauthorized server must fail the scan here,
        // not mid-paging.
        let url = format!("{}/shells?limit=1", self.base);
        self.fetch_json(&url).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ScanError> {
        self.client = None;
        Ok(())
    }

    async fn next_page(
        &mut self,
        cursor: Option<String>,
    ) -> Result<PagedResult<DocumentLabel>, ScanError> {
        let mut url = format!("{}/shells?limit={}", self.base, PAGE_LIMIT);
        if let Some(cursor) = cursor {
            url.push_str("&cursor=");
            url.push_str(&cursor);
        }

        let body = self.fetch_json(&url).await?;
        let page: PagedResult<Value> = serde_json::from_value(body)
            .map_err(|e| ScanError::Connection(format!("bad listing page: {}", e)))?;

        let labels = page
            .result
            .iter()
            .filter_map(|shell| match shell["id"].as_str() {
                Some(id) => Some(DocumentLabel {
                    id: id.to_string(),
                    id_short: shell["idShort"].as_str().unwrap_or(id).to_string(),
                }),
                None => {
                    warn!(endpoint = %self.endpoint.name, "listing entry without id skipped");
                    None
                }
            })
            .collect();

        Ok(PagedResult::new(
            labels,
            page.paging_metadata.cursor.clone(),
        ))
    }

    async fn create_document(
        &mut self,
        label: &DocumentLabel,
    ) -> Result<DocumentRecord, ScanError> {
        let shell_url = self.shell_url(&label.id);
        let shell = self.fetch_json(&shell_url).await?;

        let mut submodels = Vec::new();
        for submodel_id in submodel_refs(&shell) {
            match self.fetch_json(&self.submodel_url(&submodel_id)).await {
                Ok(submodel) => submodels.push(submodel),
                Err(err) => {
                    warn!(endpoint = %self.endpoint.name, submodel = %submodel_id, %err,
                          "submodel fetch failed, indexing shell without it");
                }
            }
        }

        let environment = json!({
            "assetAdministrationShells": [shell],
            "submodels": submodels,
        });
        let raw = serde_json::to_string(&environment)
            .map_err(|e| ScanError::Internal(e.to_string()))?;
        extract::parse_environment(&self.endpoint.name, &shell_url, &raw)
            .map_err(|e| ScanError::Validation(format!("{}: {}", label.id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EndpointKind;

    fn endpoint() -> Endpoint {
        Endpoint {
            name: "plant".to_string(),
            url: "https://aas.example.com/api/v3/".to_string(),
            kind: EndpointKind::AasApi,
            version: "v3".to_string(),
            schedule: None,
            headers: None,
        }
    }

    #[test]
    fn test_identifier_addressing() {
        let adapter = AasApiAdapter::new(endpoint()).unwrap();
        assert_eq!(
            adapter.shell_url("urn:aas:pump-01"),
            "https://aas.example.com/api/v3/shells/dXJuOmFhczpwdW1wLTAx"
        );
    }

    #[test]
    fn test_submodel_refs_from_shell() {
        let shell: Value = serde_json::from_str(
            r#"{
                "id": "urn:aas:pump-01",
                "submodels": [
                    { "keys": [ { "type": "Submodel", "value": "urn:sm:nameplate" } ] },
                    { "keys": [ { "type": "GlobalReference", "value": "urn:other" } ] }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(submodel_refs(&shell), vec!["urn:sm:nameplate".to_string()]);
    }

    #[test]
    fn test_bad_header_is_configuration_error() {
        let mut ep = endpoint();
        let mut headers = std::collections::HashMap::new();
        headers.insert("bad name".to_string(), "v".to_string());
        ep.headers = Some(headers);
        let adapter = AasApiAdapter::new(ep).unwrap();
        assert!(matches!(
            adapter.headers().unwrap_err(),
            ScanError::Configuration(_)
        ));
    }
}
