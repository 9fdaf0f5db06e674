//! Replay of structural list/map/set operations against live containers.

use crate::path::final_segment;
use crate::store::StateStore;
use jrx_protocol::{DeltaKind, DeltaOps, ListOp, MapOp, SetOp};
use serde_json::{Map, Value};

/// Key of the live container a delta for `key` applies to: the exact key, then
/// its final segment as a short alias, then the first namespaced key ending in
/// that segment. Falls back to `key` itself (a fresh container).
pub fn container_key(store: &StateStore, key: &str) -> String {
    if store.contains(key) {
        return key.to_string();
    }
    let short = final_segment(key);
    if short != key && store.contains(short) {
        return short.to_string();
    }
    let suffix = format!(".{short}");
    store
        .values()
        .keys()
        .find(|candidate| candidate.ends_with(&suffix))
        .cloned()
        .unwrap_or_else(|| key.to_string())
}

/// Apply `ops` in order to `container`, coercing it to the right shape first.
pub fn replay(container: &mut Value, ops: &DeltaOps) {
    ensure_shape(container, ops.kind());
    match (ops, container) {
        (DeltaOps::List(changes), Value::Array(items)) => {
            for change in changes {
                match change.op {
                    ListOp::Add if change.index >= items.len() => items.push(change.item.clone()),
                    ListOp::Add => items.insert(change.index, change.item.clone()),
                    ListOp::Remove if change.index < items.len() => {
                        items.remove(change.index);
                    }
                    ListOp::Remove => {
                        log::debug!("List REMOVE index {} out of bounds", change.index)
                    }
                    ListOp::Clear => items.clear(),
                    ListOp::Set if change.index < items.len() => {
                        items[change.index] = change.item.clone();
                    }
                    ListOp::Set => items.push(change.item.clone()),
                }
            }
        }
        (DeltaOps::Map(changes), Value::Object(map)) => {
            for change in changes {
                match change.op {
                    MapOp::Put => {
                        map.insert(change.key_string(), change.value.clone());
                    }
                    MapOp::Remove => {
                        let key = change.key_string();
                        let kept: Map<String, Value> =
                            std::mem::take(map).into_iter().filter(|(k, _)| *k != key).collect();
                        *map = kept;
                    }
                    MapOp::Clear => map.clear(),
                }
            }
        }
        (DeltaOps::Set(changes), Value::Array(items)) => {
            for change in changes {
                match change.op {
                    SetOp::Add => {
                        if !items.iter().any(|existing| same_member(existing, &change.item)) {
                            items.push(change.item.clone());
                        }
                    }
                    SetOp::Remove => items.retain(|existing| !same_member(existing, &change.item)),
                    SetOp::Clear => items.clear(),
                }
            }
        }
        _ => {}
    }
}

fn ensure_shape(container: &mut Value, kind: DeltaKind) {
    let fits = match kind {
        DeltaKind::List | DeltaKind::Set => container.is_array(),
        DeltaKind::Map => container.is_object(),
    };
    if !fits {
        if !container.is_null() {
            log::debug!("Replacing non-{kind} container before replay");
        }
        *container = kind.empty_container();
    }
}

/// Set membership: plain equality, or matching non-null `id` for objects.
fn same_member(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (a.get("id"), b.get("id")) {
        (Some(x), Some(y)) => !x.is_null() && x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn ops(kind: DeltaKind, changes: Value) -> DeltaOps {
        DeltaOps::decode(kind, changes.as_array().unwrap())
    }

    #[test]
    fn list_add_and_remove() {
        let mut list = json!(["a", "b"]);
        replay(&mut list, &ops(DeltaKind::List, json!([{"op": "ADD", "index": 1, "item": "x"}])));
        assert_eq!(list, json!(["a", "x", "b"]));
        replay(&mut list, &ops(DeltaKind::List, json!([{"op": "REMOVE", "index": 0}])));
        assert_eq!(list, json!(["x", "b"]));
    }

    #[test]
    fn list_add_past_end_appends_and_set_replaces() {
        let mut list = json!(["a"]);
        replay(
            &mut list,
            &ops(
                DeltaKind::List,
                json!([
                    {"op": "ADD", "index": 9, "item": "z"},
                    {"op": "SET", "index": 0, "item": "A"}
                ]),
            ),
        );
        assert_eq!(list, json!(["A", "z"]));
        replay(&mut list, &ops(DeltaKind::List, json!([{"op": "CLEAR"}])));
        assert_eq!(list, json!([]));
    }

    #[test]
    fn map_operations_keep_order() {
        let mut map = json!({"a": 1, "b": 2, "c": 3});
        replay(
            &mut map,
            &ops(
                DeltaKind::Map,
                json!([
                    {"op": "REMOVE", "key": "a"},
                    {"op": "PUT", "key": "d", "value": 4},
                    {"op": "PUT", "key": 7, "value": "n"}
                ]),
            ),
        );
        let keys: Vec<&String> = map.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "c", "d", "7"]);
    }

    #[test]
    fn set_uses_equality_or_id() {
        let mut set = json!([{"id": 1, "n": "a"}, "x"]);
        replay(
            &mut set,
            &ops(
                DeltaKind::Set,
                json!([
                    {"op": "ADD", "item": {"id": 1, "n": "changed"}},
                    {"op": "ADD", "item": "x"},
                    {"op": "ADD", "item": "y"},
                    {"op": "REMOVE", "item": {"id": 1}}
                ]),
            ),
        );
        assert_eq!(set, json!(["x", "y"]));
    }

    #[test]
    fn wrong_shape_is_reset() {
        let mut value = json!("not a list");
        replay(&mut value, &ops(DeltaKind::List, json!([{"op": "ADD", "index": 0, "item": 1}])));
        assert_eq!(value, json!([1]));
    }

    #[test]
    fn container_key_fallbacks() {
        let mut store = StateStore::new();
        store.set("Shop#1.items", json!([]));
        assert_eq!(container_key(&store, "Shop#1.items"), "Shop#1.items");
        assert_eq!(container_key(&store, "Other#9.items"), "Shop#1.items");
        store.set("items", json!([]));
        assert_eq!(container_key(&store, "Other#9.items"), "items");
        assert_eq!(container_key(&store, "fresh"), "fresh");
    }
}
