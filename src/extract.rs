//! AAS environment parsing: raw JSON in, document plus flattened
//! searchable elements out.
//!
//! Adapters hand this module the serialized environment they fetched; it
//! produces the [`Document`] row (identity, content hash, asset metadata)
//! and one typed [`Element`] per scalar submodel element, with dotted
//! id-short paths for nested collections.

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Document, DocumentRecord, Element, ElementValue};

/// Model types whose `value` holds nested elements rather than a scalar.
const NESTED_MODEL_TYPES: [&str; 2] = ["SubmodelElementCollection", "SubmodelElementList"];

/// 32-bit content checksum: the leading bits of a SHA-256 digest.
pub fn content_hash(raw: &str) -> u32 {
    let digest = Sha256::digest(raw.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Deterministic document uuid derived from the endpoint name and the
/// shell identifier, so rescans key the same remote document to the same
/// index entry.
pub fn stable_uuid(endpoint: &str, shell_id: &str) -> String {
    let digest = Sha256::digest(format!("{}\n{}", endpoint, shell_id).as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes).to_string()
}

/// Parse one AAS environment into a document record.
///
/// `endpoint` is the owning endpoint's name, `address` the document's
/// location within it (file path or URL).
pub fn parse_environment(endpoint: &str, address: &str, raw: &str) -> Result<DocumentRecord> {
    let env: Value = serde_json::from_str(raw)?;

    let shell = env["assetAdministrationShells"]
        .as_array()
        .and_then(|shells| shells.first())
        .ok_or_else(|| anyhow::anyhow!("environment contains no asset administration shell"))?;

    let Some(shell_id) = shell["id"].as_str() else {
        bail!("asset administration shell has no id");
    };

    let uuid = stable_uuid(endpoint, shell_id);
    let id_short = shell["idShort"].as_str().unwrap_or(shell_id).to_string();
    let asset_id = shell["assetInformation"]["globalAssetId"]
        .as_str()
        .map(str::to_string);
    let thumbnail = shell["assetInformation"]["defaultThumbnail"]["path"]
        .as_str()
        .map(str::to_string);

    let document = Document {
        uuid: uuid.clone(),
        endpoint: endpoint.to_string(),
        address: address.to_string(),
        content_hash: content_hash(raw),
        id_short,
        asset_id,
        thumbnail,
        timestamp: Utc::now(),
    };

    let mut elements = Vec::new();
    if let Some(submodels) = env["submodels"].as_array() {
        for submodel in submodels {
            let prefix = submodel["idShort"].as_str().unwrap_or_default();
            let submodel_id = submodel["id"].as_str().map(str::to_string);
            if let Some(children) = submodel["submodelElements"].as_array() {
                for child in children {
                    flatten_element(&uuid, prefix, submodel_id.as_deref(), child, &mut elements);
                }
            }
        }
    }

    Ok(DocumentRecord { document, elements })
}

fn flatten_element(
    uuid: &str,
    prefix: &str,
    submodel_id: Option<&str>,
    node: &Value,
    out: &mut Vec<Element>,
) {
    let model_type = node["modelType"].as_str().unwrap_or("SubmodelElement");
    let id_short = node["idShort"].as_str().unwrap_or_default();
    let path = if prefix.is_empty() {
        id_short.to_string()
    } else {
        format!("{}.{}", prefix, id_short)
    };

    if NESTED_MODEL_TYPES.contains(&model_type) {
        if let Some(children) = node["value"].as_array() {
            for child in children {
                flatten_element(uuid, &path, submodel_id, child, out);
            }
        }
        return;
    }

    let Some(value) = element_value(node, model_type) else {
        return;
    };

    out.push(Element {
        uuid: uuid.to_string(),
        model_type: model_type.to_string(),
        id: submodel_id.map(str::to_string),
        id_short: path,
        value,
    });
}

/// Scalar value of an element, typed by its declared `valueType`.
fn element_value(node: &Value, model_type: &str) -> Option<ElementValue> {
    if model_type == "MultiLanguageProperty" {
        let text = node["value"]
            .as_array()
            .and_then(|langs| langs.first())
            .and_then(|first| first["text"].as_str())?;
        return Some(ElementValue::String(text.to_string()));
    }

    let raw = match &node["value"] {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };

    Some(typed_value(node["valueType"].as_str().unwrap_or(""), &raw))
}

fn typed_value(value_type: &str, raw: &str) -> ElementValue {
    match value_type {
        "xs:boolean" => match raw {
            "true" | "1" => ElementValue::Boolean(true),
            "false" | "0" => ElementValue::Boolean(false),
            _ => ElementValue::String(raw.to_string()),
        },
        "xs:byte" | "xs:short" | "xs:int" | "xs:integer" | "xs:long" | "xs:unsignedByte"
        | "xs:unsignedShort" | "xs:unsignedInt" | "xs:unsignedLong" | "xs:decimal"
        | "xs:double" | "xs:float" => raw
            .parse::<f64>()
            .map(ElementValue::Number)
            .unwrap_or_else(|_| ElementValue::String(raw.to_string())),
        "xs:date" | "xs:dateTime" => parse_date(raw)
            .map(ElementValue::Date)
            .unwrap_or_else(|| ElementValue::String(raw.to_string())),
        _ => ElementValue::String(raw.to_string()),
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
