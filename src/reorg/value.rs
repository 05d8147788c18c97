//! Document values.
//!
//! Documents are maps over a closed set of value kinds. `ObjectId` and
//! `DateTime` are the store-native kinds that plain JSON cannot carry; the
//! archive codec tags them on the way out.

use crate::error::ReorgError;
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

pub const STORE_ID_FIELD: &str = "_id";
pub const LOGICAL_ID_FIELD: &str = "id";

pub type Document = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    ObjectId(ObjectId),
    DateTime(DateTime<Utc>),
}

impl Value {
    /// Schema type name of this value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::ObjectId(_) => "object_id",
            Value::DateTime(_) => "datetime",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Stable text key used for grouping and display.
    pub fn key_string(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::String(s) => s.clone(),
            Value::ObjectId(oid) => oid.to_hex(),
            other => crate::reorg::codec::encode_value(other).to_string(),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<ObjectId> for Value {
    fn from(value: ObjectId) -> Self {
        Value::ObjectId(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::DateTime(value)
    }
}

pub fn logical_id(doc: &Document) -> Option<&Value> {
    doc.get(LOGICAL_ID_FIELD).filter(|v| !v.is_null())
}

/// Logical ids carried by more than one document, as key strings. Writing or
/// deleting by one of these would touch a sibling too.
pub fn shared_logical_ids(docs: &[Document]) -> BTreeSet<String> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for id in docs.iter().filter_map(logical_id) {
        *seen.entry(id.key_string()).or_default() += 1;
    }
    seen.into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(id, _)| id)
        .collect()
}

pub fn store_id(doc: &Document) -> Option<ObjectId> {
    match doc.get(STORE_ID_FIELD) {
        Some(Value::ObjectId(oid)) => Some(*oid),
        _ => None,
    }
}

/// Display label for a document: logical id, then store id.
pub fn document_label(doc: &Document) -> String {
    if let Some(id) = logical_id(doc) {
        return id.key_string();
    }
    match store_id(doc) {
        Some(oid) => format!("_id:{oid}"),
        None => "<no id>".to_string(),
    }
}

/// 12-byte store identity: creation seconds, process-unique bytes, counter.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

static OID_COUNTER: AtomicU32 = AtomicU32::new(0);
static OID_PROCESS_BYTES: OnceLock<[u8; 5]> = OnceLock::new();

fn process_bytes() -> [u8; 5] {
    *OID_PROCESS_BYTES.get_or_init(|| {
        let mut hasher = Sha256::new();
        hasher.update(std::process::id().to_le_bytes());
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        hasher.update(nanos.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 5];
        out.copy_from_slice(&digest[..5]);
        out
    })
}

impl ObjectId {
    pub fn new() -> Self {
        Self::with_time(Utc::now())
    }

    pub fn with_time(at: DateTime<Utc>) -> Self {
        let secs = u32::try_from(at.timestamp().max(0)).unwrap_or(u32::MAX);
        let counter = OID_COUNTER.fetch_add(1, Ordering::Relaxed) & 0x00ff_ffff;
        let mut bytes = [0u8; 12];
        bytes[..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&process_bytes());
        bytes[9..].copy_from_slice(&counter.to_be_bytes()[1..]);
        Self(bytes)
    }

    pub fn parse_str(hex: &str) -> Result<Self, ReorgError> {
        let hex = hex.trim();
        if hex.len() != 24 || !hex.is_ascii() {
            return Err(ReorgError::InvalidObjectId(hex.to_string()));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|_| ReorgError::InvalidObjectId(hex.to_string()))?;
        }
        Ok(Self(bytes))
    }

    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Creation time embedded in the first four bytes.
    pub fn timestamp(&self) -> DateTime<Utc> {
        let secs = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        Utc.timestamp_opt(i64::from(secs), 0)
            .single()
            .unwrap_or_default()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

/// Build a document from `(field, value)` pairs.
#[cfg(test)]
pub fn doc<I, K, V>(pairs: I) -> Document
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
