use crate::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Which live container a delta is replayed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    List,
    Map,
    Set,
}

impl DeltaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Map => "map",
            Self::Set => "set",
        }
    }

    /// Empty container used when a delta arrives for a key with no snapshot yet.
    pub fn empty_container(self) -> Value {
        match self {
            Self::List | Self::Set => Value::Array(Vec::new()),
            Self::Map => Value::Object(serde_json::Map::new()),
        }
    }
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeltaKind {
    type Err = ProtocolError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(Self::List),
            "map" => Ok(Self::Map),
            "set" => Ok(Self::Set),
            other => Err(ProtocolError::UnknownDeltaKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ListOp {
    Add,
    Remove,
    Clear,
    Set,
}

/// One recorded mutation of a server-side list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListChange {
    pub op: ListOp,
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub item: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MapOp {
    Put,
    Remove,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapChange {
    pub op: MapOp,
    #[serde(default)]
    pub key: Value,
    #[serde(default)]
    pub value: Value,
}

impl MapChange {
    /// Map keys travel as arbitrary JSON; the client container is keyed by string.
    pub fn key_string(&self) -> String {
        match &self.key {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SetOp {
    Add,
    Remove,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetChange {
    pub op: SetOp,
    #[serde(default)]
    pub item: Value,
}

/// A typed, ordered list of operations for one container.
#[derive(Debug, Clone, PartialEq)]
pub enum DeltaOps {
    List(Vec<ListChange>),
    Map(Vec<MapChange>),
    Set(Vec<SetChange>),
}

impl DeltaOps {
    /// Decode raw change objects for the given kind. Entries that fail to decode are
    /// skipped with a warning so one bad operation does not discard the whole batch.
    pub fn decode(kind: DeltaKind, changes: &[Value]) -> Self {
        match kind {
            DeltaKind::List => Self::List(decode_each(changes)),
            DeltaKind::Map => Self::Map(decode_each(changes)),
            DeltaKind::Set => Self::Set(decode_each(changes)),
        }
    }

    pub fn kind(&self) -> DeltaKind {
        match self {
            Self::List(_) => DeltaKind::List,
            Self::Map(_) => DeltaKind::Map,
            Self::Set(_) => DeltaKind::Set,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::List(ops) => ops.len(),
            Self::Map(ops) => ops.len(),
            Self::Set(ops) => ops.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn decode_each<T: for<'de> Deserialize<'de>>(changes: &[Value]) -> Vec<T> {
    let mut out = Vec::with_capacity(changes.len());
    for raw in changes {
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(op) => out.push(op),
            Err(err) => log::warn!("skipping undecodable delta operation {raw}: {err}"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_list_changes_with_defaults() {
        let ops = DeltaOps::decode(
            DeltaKind::List,
            &[json!({"op": "ADD", "index": 1, "item": "x"}), json!({"op": "CLEAR"})],
        );
        assert_eq!(
            ops,
            DeltaOps::List(vec![
                ListChange {
                    op: ListOp::Add,
                    index: 1,
                    item: json!("x"),
                },
                ListChange {
                    op: ListOp::Clear,
                    index: 0,
                    item: Value::Null,
                },
            ])
        );
    }

    #[test]
    fn skips_unknown_operations() {
        let ops = DeltaOps::decode(
            DeltaKind::Set,
            &[json!({"op": "FROB", "item": 1}), json!({"op": "ADD", "item": 2})],
        );
        assert_eq!(ops.len(), 1);
    }

    #[test]
    fn parses_kind_case_insensitively() {
        assert_eq!("LIST".parse::<DeltaKind>().unwrap(), DeltaKind::List);
        assert!("tree".parse::<DeltaKind>().is_err());
    }

    #[test]
    fn map_key_string_handles_non_string_keys() {
        let change = MapChange {
            op: MapOp::Put,
            key: json!(7),
            value: json!("seven"),
        };
        assert_eq!(change.key_string(), "7");
    }
}
