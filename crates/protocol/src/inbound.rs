use crate::{DeltaKind, ProtocolError, Result};
use serde_json::{Map, Value};

/// One normalized state update.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEntry {
    /// Full value replacement of `key`.
    Value { key: String, value: Value },
    /// Structural operations replayed against the container at `key`.
    Delta {
        key: String,
        kind: DeltaKind,
        changes: Vec<Value>,
    },
}

impl StateEntry {
    pub fn value(key: impl Into<String>, value: Value) -> Self {
        Self::Value {
            key: key.into(),
            value,
        }
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Value { key, .. } | Self::Delta { key, .. } => key,
        }
    }

    /// Arrays, objects and deltas carry structure other entries may depend on.
    pub fn is_structural(&self) -> bool {
        match self {
            Self::Value { value, .. } => value.is_array() || value.is_object(),
            Self::Delta { .. } => true,
        }
    }
}

/// A decoded inbound message: entries plus an optional resume cursor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundBatch {
    pub seq: Option<u64>,
    pub entries: Vec<StateEntry>,
}

impl InboundBatch {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse a raw realtime/push/poll payload.
///
/// Accepted shapes: a single `{k,v}` / `{key,value}` object, an array of such
/// objects, or a `{seq, batch:[...]}` envelope. Delta entries carry
/// `delta:true`, a kind discriminator (`type`, `kind` or `t`) and a
/// `changes` (or `c`) array.
pub fn parse_inbound(raw: &str) -> Result<InboundBatch> {
    let value: Value = serde_json::from_str(raw)?;
    normalize_inbound(value)
}

pub fn normalize_inbound(value: Value) -> Result<InboundBatch> {
    match value {
        Value::Array(items) => Ok(InboundBatch {
            seq: None,
            entries: normalize_items(items),
        }),
        Value::Object(mut obj) => {
            if let Some(batch) = obj.remove("batch") {
                let seq = obj.get("seq").and_then(Value::as_u64);
                let items = match batch {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    single => vec![single],
                };
                return Ok(InboundBatch {
                    seq,
                    entries: normalize_items(items),
                });
            }
            let entry = normalize_entry(obj)?;
            Ok(InboundBatch {
                seq: None,
                entries: entry.into_iter().collect(),
            })
        }
        other => Err(ProtocolError::malformed(format!(
            "expected object or array, got {other}"
        ))),
    }
}

/// Entries of a batch; a bad entry is dropped without losing its siblings.
fn normalize_items(items: Vec<Value>) -> Vec<StateEntry> {
    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        match item {
            Value::Object(obj) => match normalize_entry(obj) {
                Ok(entry) => entries.extend(entry),
                Err(e) => log::warn!("dropping batch entry: {e}"),
            },
            other => log::debug!("ignoring non-object batch item {other}"),
        }
    }
    entries
}

fn normalize_entry(mut obj: Map<String, Value>) -> Result<Option<StateEntry>> {
    let key = match obj.remove("k").or_else(|| obj.remove("key")) {
        Some(Value::String(key)) => key,
        Some(other) => other.to_string(),
        None => {
            log::debug!("ignoring keyless inbound entry");
            return Ok(None);
        }
    };

    let kind = obj
        .get("type")
        .or_else(|| obj.get("kind"))
        .or_else(|| obj.get("t"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let is_delta = obj.get("delta").and_then(Value::as_bool).unwrap_or(false)
        || (kind.is_some() && (obj.contains_key("changes") || obj.contains_key("c")));

    if is_delta {
        let kind: DeltaKind = kind
            .ok_or_else(|| ProtocolError::malformed(format!("delta for {key} has no kind")))?
            .parse()?;
        let changes = match obj.remove("changes").or_else(|| obj.remove("c")) {
            Some(Value::Array(changes)) => changes,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(ProtocolError::malformed(format!(
                    "delta changes for {key} must be an array, got {other}"
                )))
            }
        };
        return Ok(Some(StateEntry::Delta { key, kind, changes }));
    }

    let value = obj
        .remove("v")
        .or_else(|| obj.remove("value"))
        .unwrap_or(Value::Null);
    Ok(Some(StateEntry::Value { key, value }))
}

/// Stable reorder placing structural payloads before scalars so that a
/// dependent scalar (e.g. a selected option) never lands before its list.
pub fn sort_structural_first(entries: &mut [StateEntry]) {
    entries.sort_by_key(|entry| !entry.is_structural());
}
