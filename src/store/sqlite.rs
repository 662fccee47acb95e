//! Relational [`IndexStore`] implementation on SQLite.
//!
//! Every multi-row operation (a document together with its elements, a
//! full element replacement) runs in one transaction. Element values use
//! nullable typed columns with exactly one populated per row.

use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::IndexStore;
use crate::models::{Document, Element, ElementValue, Endpoint, EndpointKind};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite:./data/index.sqlite`) and ensure the
    /// schema exists.
    pub async fn connect(url: &str) -> Result<Self> {
        if let Some(path) = url.strip_prefix("sqlite:") {
            if let Some(parent) = std::path::Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
            }
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS endpoints (
                name TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                kind TEXT NOT NULL,
                version TEXT NOT NULL DEFAULT '',
                schedule TEXT,
                headers_json TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                uuid TEXT PRIMARY KEY,
                endpoint TEXT NOT NULL,
                address TEXT NOT NULL,
                content_hash INTEGER NOT NULL,
                id_short TEXT NOT NULL,
                asset_id TEXT,
                thumbnail TEXT,
                timestamp INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS elements (
                document_uuid TEXT NOT NULL,
                model_type TEXT NOT NULL,
                element_id TEXT,
                id_short TEXT NOT NULL,
                value_str TEXT,
                value_num REAL,
                value_date TEXT,
                value_bool INTEGER,
                PRIMARY KEY (document_uuid, id_short),
                FOREIGN KEY (document_uuid) REFERENCES documents(uuid)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_endpoint ON documents(endpoint)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

fn row_to_endpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Endpoint> {
    let kind: String = row.get("kind");
    let headers_json: Option<String> = row.get("headers_json");
    Ok(Endpoint {
        name: row.get("name"),
        url: row.get("url"),
        kind: kind
            .parse::<EndpointKind>()
            .map_err(|e| anyhow::anyhow!(e))?,
        version: row.get("version"),
        schedule: row.get("schedule"),
        headers: headers_json
            .map(|json| serde_json::from_str(&json))
            .transpose()?,
    })
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Document {
    let hash: i64 = row.get("content_hash");
    let ts: i64 = row.get("timestamp");
    Document {
        uuid: row.get("uuid"),
        endpoint: row.get("endpoint"),
        address: row.get("address"),
        content_hash: hash as u32,
        id_short: row.get("id_short"),
        asset_id: row.get("asset_id"),
        thumbnail: row.get("thumbnail"),
        timestamp: chrono::DateTime::from_timestamp(ts, 0).unwrap_or_default(),
    }
}

fn row_to_element(row: &sqlx::sqlite::SqliteRow) -> Result<Element> {
    let value_str: Option<String> = row.get("value_str");
    let value_num: Option<f64> = row.get("value_num");
    let value_date: Option<String> = row.get("value_date");
    let value_bool: Option<bool> = row.get("value_bool");

    let value = if let Some(s) = value_str {
        ElementValue::String(s)
    } else if let Some(n) = value_num {
        ElementValue::Number(n)
    } else if let Some(d) = value_date {
        ElementValue::Date(
            chrono::DateTime::parse_from_rfc3339(&d)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .with_context(|| format!("bad element date: {}", d))?,
        )
    } else if let Some(b) = value_bool {
        ElementValue::Boolean(b)
    } else {
        anyhow::bail!("element row has no value column populated");
    };

    Ok(Element {
        uuid: row.get("document_uuid"),
        model_type: row.get("model_type"),
        id: row.get("element_id"),
        id_short: row.get("id_short"),
        value,
    })
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn put_endpoint(&self, endpoint: &Endpoint) -> Result<()> {
        let headers_json = endpoint
            .headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO endpoints (name, url, kind, version, schedule, headers_json)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                url = excluded.url,
                kind = excluded.kind,
                version = excluded.version,
                schedule = excluded.schedule,
                headers_json = excluded.headers_json
            "#,
        )
        .bind(&endpoint.name)
        .bind(&endpoint.url)
        .bind(endpoint.kind.as_str())
        .bind(&endpoint.version)
        .bind(&endpoint.schedule)
        .bind(&headers_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_endpoint(&self, name: &str) -> Result<Option<Endpoint>> {
        let row = sqlx::query("SELECT * FROM endpoints WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_endpoint).transpose()
    }

    async fn remove_endpoint(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM endpoints WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_endpoints(&self) -> Result<Vec<Endpoint>> {
        let rows = sqlx::query("SELECT * FROM endpoints ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_endpoint).collect()
    }

    async fn put_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (uuid, endpoint, address, content_hash, id_short,
                                   asset_id, thumbnail, timestamp)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(uuid) DO UPDATE SET
                endpoint = excluded.endpoint,
                address = excluded.address,
                content_hash = excluded.content_hash,
                id_short = excluded.id_short,
                asset_id = excluded.asset_id,
                thumbnail = excluded.thumbnail,
                timestamp = excluded.timestamp
            "#,
        )
        .bind(&document.uuid)
        .bind(&document.endpoint)
        .bind(&document.address)
        .bind(document.content_hash as i64)
        .bind(&document.id_short)
        .bind(&document.asset_id)
        .bind(&document.thumbnail)
        .bind(document.timestamp.timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_document(&self, uuid: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE uuid = ?")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_document))
    }

    async fn remove_document(&self, uuid: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM elements WHERE document_uuid = ?")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE uuid = ?")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_documents(&self, endpoint_name: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents WHERE endpoint = ? ORDER BY uuid")
            .bind(endpoint_name)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_document).collect())
    }

    async fn count_documents(&self, endpoint_name: Option<&str>) -> Result<u64> {
        let count: i64 = match endpoint_name {
            Some(name) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE endpoint = ?")
                    .bind(name)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM documents")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as u64)
    }

    async fn replace_elements(&self, uuid: &str, elements: &[Element]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM elements WHERE document_uuid = ?")
            .bind(uuid)
            .execute(&mut *tx)
            .await?;

        for element in elements {
            let (value_str, value_num, value_date, value_bool) = match &element.value {
                ElementValue::String(s) => (Some(s.clone()), None, None, None),
                ElementValue::Number(n) => (None, Some(*n), None, None),
                ElementValue::Date(d) => (None, None, Some(d.to_rfc3339()), None),
                ElementValue::Boolean(b) => (None, None, None, Some(*b)),
            };
            sqlx::query(
                r#"
                INSERT INTO elements (document_uuid, model_type, element_id, id_short,
                                      value_str, value_num, value_date, value_bool)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(uuid)
            .bind(&element.model_type)
            .bind(&element.id)
            .bind(&element.id_short)
            .bind(&value_str)
            .bind(value_num)
            .bind(&value_date)
            .bind(value_bool)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

impl SqliteStore {
    /// Elements of one document, in id-short order. Used by tests and the
    /// search layer above the core.
    pub async fn elements(&self, uuid: &str) -> Result<Vec<Element>> {
        let rows = sqlx::query("SELECT * FROM elements WHERE document_uuid = ? ORDER BY id_short")
            .bind(uuid)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_element).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn open_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("index.sqlite").display());
        let store = SqliteStore::connect(&url).await.unwrap();
        (dir, store)
    }

    fn document(uuid: &str, endpoint: &str, hash: u32) -> Document {
        Document {
            uuid: uuid.to_string(),
            endpoint: endpoint.to_string(),
            address: format!("/data/{}.json", uuid),
            content_hash: hash,
            id_short: uuid.to_uppercase(),
            asset_id: Some("urn:asset:1".to_string()),
            thumbnail: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_document_upsert_keeps_uuid_unique() {
        let (_dir, store) = open_store().await;

        store.put_document(&document("a", "files", 1)).await.unwrap();
        store.put_document(&document("a", "files", 2)).await.unwrap();

        assert_eq!(store.count_documents(None).await.unwrap(), 1);
        assert_eq!(
            store.get_document("a").await.unwrap().unwrap().content_hash,
            2
        );
    }

    #[tokio::test]
    async fn test_elements_typed_columns_roundtrip() {
        let (_dir, store) = open_store().await;
        store.put_document(&document("a", "files", 1)).await.unwrap();

        let elements = vec![
            Element {
                uuid: "a".to_string(),
                model_type: "Property".to_string(),
                id: Some("urn:sm:1".to_string()),
                id_short: "Nameplate.Manufacturer".to_string(),
                value: ElementValue::String("ACME".to_string()),
            },
            Element {
                uuid: "a".to_string(),
                model_type: "Property".to_string(),
                id: None,
                id_short: "Nameplate.MaxPressure".to_string(),
                value: ElementValue::Number(16.5),
            },
            Element {
                uuid: "a".to_string(),
                model_type: "Property".to_string(),
                id: None,
                id_short: "Nameplate.Certified".to_string(),
                value: ElementValue::Boolean(true),
            },
        ];
        store.replace_elements("a", &elements).await.unwrap();

        let stored = store.elements("a").await.unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[1].value, ElementValue::Number(16.5));

        // Full replacement, never a merge.
        store
            .replace_elements("a", &elements[..1])
            .await
            .unwrap();
        assert_eq!(store.elements("a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_document_removes_elements() {
        let (_dir, store) = open_store().await;
        store.put_document(&document("a", "files", 1)).await.unwrap();
        store
            .replace_elements(
                "a",
                &[Element {
                    uuid: "a".to_string(),
                    model_type: "Property".to_string(),
                    id: None,
                    id_short: "P".to_string(),
                    value: ElementValue::String("x".to_string()),
                }],
            )
            .await
            .unwrap();

        store.remove_document("a").await.unwrap();
        assert!(store.get_document("a").await.unwrap().is_none());
        assert!(store.elements("a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_roundtrip_with_headers() {
        let (_dir, store) = open_store().await;
        let mut headers = std::collections::HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer token".to_string());

        store
            .put_endpoint(&Endpoint {
                name: "plant".to_string(),
                url: "https://aas.example.com/api/v3".to_string(),
                kind: EndpointKind::AasApi,
                version: "v3".to_string(),
                schedule: Some("hourly".to_string()),
                headers: Some(headers),
            })
            .await
            .unwrap();

        let fetched = store.get_endpoint("plant").await.unwrap().unwrap();
        assert_eq!(fetched.kind, EndpointKind::AasApi);
        assert_eq!(
            fetched.headers.unwrap().get("Authorization").unwrap(),
            "Bearer token"
        );
        assert_eq!(store.list_endpoints().await.unwrap().len(), 1);
    }
}
