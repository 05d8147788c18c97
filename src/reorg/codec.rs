//! Archive codec.
//!
//! Archives are gzip-compressed JSON `{metadata, documents}`. Values JSON
//! cannot represent natively are wrapped as `{"__type": T, "__value": V}`
//! at any depth; decoding unwraps every wrapper whose type it knows and
//! passes unknown wrappers through untouched. A plain map whose keys are
//! exactly `__type` and `__value` is itself wrapped as `map`, so it never
//! decodes as a store-native value.

use crate::error::ReorgError;
use crate::reorg::value::{Document, ObjectId, Value};
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::{Read, Write};

pub const TYPE_KEY: &str = "__type";
pub const VALUE_KEY: &str = "__value";
pub const FORMAT_VERSION: u32 = 1;

const TAG_OBJECT_ID: &str = "ObjectId";
const TAG_DATETIME: &str = "datetime";
const TAG_FLOAT: &str = "float";
const TAG_MAP: &str = "map";

pub const REQUIRED_METADATA_FIELDS: &[&str] =
    &["collection", "created_at", "document_count", "database"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub collection: String,
    pub created_at: String,
    pub document_count: usize,
    pub database: String,
    #[serde(default = "default_format_version")]
    pub format_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_sha256: Option<String>,
}

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

impl ArchiveMetadata {
    pub fn created_at_time(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_at)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Archive {
    pub metadata: ArchiveMetadata,
    pub documents: Vec<Document>,
}

impl Archive {
    pub fn new(
        collection: &str,
        database: &str,
        created_at: DateTime<Utc>,
        documents: Vec<Document>,
    ) -> Self {
        let encoded = documents.iter().map(encode_document).collect::<Vec<_>>();
        Self {
            metadata: ArchiveMetadata {
                collection: collection.to_string(),
                created_at: created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                document_count: documents.len(),
                database: database.to_string(),
                format_version: FORMAT_VERSION,
                content_sha256: Some(documents_digest(&encoded)),
            },
            documents,
        }
    }
}

fn tagged(kind: &str, value: Json) -> Json {
    let mut map = Map::new();
    map.insert(TYPE_KEY.to_string(), Json::String(kind.to_string()));
    map.insert(VALUE_KEY.to_string(), value);
    Json::Object(map)
}

fn encode_float(f: f64) -> Json {
    match Number::from_f64(f) {
        Some(n) => Json::Number(n),
        None => {
            let text = if f.is_nan() {
                "NaN"
            } else if f.is_sign_positive() {
                "inf"
            } else {
                "-inf"
            };
            tagged(TAG_FLOAT, Json::String(text.to_string()))
        }
    }
}

pub fn encode_value(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number(Number::from(*i)),
        Value::Float(f) => encode_float(*f),
        Value::String(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(encode_value).collect()),
        Value::Map(map) => encode_map(map),
        Value::ObjectId(oid) => tagged(TAG_OBJECT_ID, Json::String(oid.to_hex())),
        Value::DateTime(at) => tagged(
            TAG_DATETIME,
            Json::String(at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        ),
    }
}

fn looks_tagged(map: &BTreeMap<String, Value>) -> bool {
    map.len() == 2 && map.contains_key(TYPE_KEY) && map.contains_key(VALUE_KEY)
}

fn encode_map(map: &BTreeMap<String, Value>) -> Json {
    let object = Json::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect(),
    );
    if looks_tagged(map) {
        tagged(TAG_MAP, object)
    } else {
        object
    }
}

pub fn encode_document(doc: &Document) -> Json {
    encode_map(doc)
}

fn decode_tagged(kind: &str, raw: &Json) -> Option<Value> {
    let text = raw.as_str()?;
    match kind {
        TAG_OBJECT_ID => ObjectId::parse_str(text).ok().map(Value::ObjectId),
        TAG_DATETIME => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|t| Value::DateTime(t.with_timezone(&Utc))),
        TAG_FLOAT => match text {
            "NaN" => Some(Value::Float(f64::NAN)),
            "inf" => Some(Value::Float(f64::INFINITY)),
            "-inf" => Some(Value::Float(f64::NEG_INFINITY)),
            _ => None,
        },
        _ => None,
    }
}

fn decode_number(n: &Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Int(i)
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

pub fn decode_value(json: Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(b),
        Json::Number(n) => decode_number(&n),
        Json::String(s) => Value::String(s),
        Json::Array(items) => Value::List(items.into_iter().map(decode_value).collect()),
        Json::Object(mut map) => {
            let kind = match map.get(TYPE_KEY) {
                Some(Json::String(kind)) if map.len() == 2 && map.contains_key(VALUE_KEY) => {
                    Some(kind.clone())
                }
                _ => None,
            };
            if let Some(kind) = kind {
                if kind == TAG_MAP
                    && let Some(Json::Object(_)) = map.get(VALUE_KEY)
                    && let Some(Json::Object(inner)) = map.remove(VALUE_KEY)
                {
                    return Value::Map(
                        inner
                            .into_iter()
                            .map(|(k, v)| (k, decode_value(v)))
                            .collect(),
                    );
                }
                if let Some(raw) = map.get(VALUE_KEY)
                    && let Some(decoded) = decode_tagged(&kind, raw)
                {
                    return decoded;
                }
            }
            Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, decode_value(v)))
                    .collect(),
            )
        }
    }
}

pub fn decode_document(json: Json) -> Result<Document, ReorgError> {
    match decode_value(json) {
        Value::Map(map) => Ok(map),
        other => Err(ReorgError::CorruptArchive(format!(
            "expected a document object, found {}",
            other.type_name()
        ))),
    }
}

/// Hex SHA-256 over the canonical JSON of an encoded documents array.
pub fn documents_digest(encoded: &[Json]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"[");
    for (i, doc) in encoded.iter().enumerate() {
        if i > 0 {
            hasher.update(b",");
        }
        hasher.update(doc.to_string().as_bytes());
    }
    hasher.update(b"]");
    format!("{:x}", hasher.finalize())
}

pub fn encode_archive(archive: &Archive) -> Result<Vec<u8>, ReorgError> {
    let metadata = serde_json::to_value(&archive.metadata)
        .map_err(|err| ReorgError::CorruptArchive(format!("metadata encode failed: {err}")))?;
    let documents = archive
        .documents
        .iter()
        .map(encode_document)
        .collect::<Vec<_>>();
    let body = serde_json::json!({
        "metadata": metadata,
        "documents": documents,
    });

    let compress = |raw: &[u8]| -> std::io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(raw)?;
        encoder.finish()
    };
    compress(body.to_string().as_bytes())
        .map_err(|err| ReorgError::CorruptArchive(format!("compression failed: {err}")))
}

/// Decompress and parse without interpreting the contents.
pub fn decode_archive_json(bytes: &[u8]) -> Result<Json, ReorgError> {
    let mut decoder = GzDecoder::new(bytes);
    let mut raw = String::new();
    decoder
        .read_to_string(&mut raw)
        .map_err(|err| ReorgError::CorruptArchive(format!("decompression failed: {err}")))?;
    serde_json::from_str(&raw)
        .map_err(|err| ReorgError::CorruptArchive(format!("invalid archive json: {err}")))
}

pub fn missing_metadata_fields(json: &Json) -> Vec<&'static str> {
    let metadata = json.get("metadata");
    REQUIRED_METADATA_FIELDS
        .iter()
        .copied()
        .filter(|field| metadata.and_then(|m| m.get(*field)).is_none())
        .collect()
}

pub fn archive_from_json(json: Json) -> Result<Archive, ReorgError> {
    let missing = missing_metadata_fields(&json);
    if !missing.is_empty() {
        return Err(ReorgError::CorruptArchive(format!(
            "missing metadata fields: {}",
            missing.join(", ")
        )));
    }

    let Json::Object(mut body) = json else {
        return Err(ReorgError::CorruptArchive(
            "archive root is not an object".to_string(),
        ));
    };
    let metadata: ArchiveMetadata = body
        .remove("metadata")
        .map(serde_json::from_value)
        .transpose()
        .map_err(|err| ReorgError::CorruptArchive(format!("invalid metadata: {err}")))?
        .ok_or_else(|| ReorgError::CorruptArchive("missing metadata".to_string()))?;
    let documents = match body.remove("documents") {
        Some(Json::Array(items)) => items
            .into_iter()
            .map(decode_document)
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => {
            return Err(ReorgError::CorruptArchive(
                "documents is not an array".to_string(),
            ));
        }
        None => return Err(ReorgError::CorruptArchive("missing documents".to_string())),
    };

    Ok(Archive {
        metadata,
        documents,
    })
}

pub fn decode_archive(bytes: &[u8]) -> Result<Archive, ReorgError> {
    archive_from_json(decode_archive_json(bytes)?)
}
