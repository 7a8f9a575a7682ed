// ABOUTME: Overlays encoded data onto live save-data trees without replacing live containers.
// ABOUTME: Collections are cleared and refilled in place; records are merged key by key.

use std::collections::BTreeMap;

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::brand::{self, EncodedKind};
use crate::class::ClassRegistry;
use crate::classify::classify;
use crate::copy::{deserialize, deserialize_default, deserialize_entries, deserialize_members};
use crate::error::{CopyError, child_path};
use crate::value::{DefaultMap, Instance, Key, Shared, Table, Value, shared};

/// Merge `incoming` into `live`.
///
/// `live` and every sub-container that already exists under it keep their
/// identity. Keys absent from `incoming` are left alone.
pub fn merge(
    live: &Value,
    incoming: &JsonValue,
    path: &str,
    classes: &ClassRegistry,
) -> Result<(), CopyError> {
    classify(live, path)?;
    tracing::trace!("merging into {} at '{}'", live.type_name(), path);

    match live {
        Value::Array(items) => {
            let JsonValue::Array(source) = incoming else {
                return Err(shape_mismatch(path, live, incoming));
            };
            let mut decoded = Vec::with_capacity(source.len());
            for (i, item) in source.iter().enumerate() {
                decoded.push(deserialize(item, &child_path(path, i + 1), classes)?);
            }
            let mut items = items.borrow_mut();
            items.clear();
            items.extend(decoded);
            Ok(())
        }
        Value::Map(map) => {
            let fields = expect_object(live, incoming, path)?;
            let decoded = deserialize_entries(fields, path, classes)?;
            let mut map = map.borrow_mut();
            map.clear();
            map.extend(decoded);
            Ok(())
        }
        Value::DefaultMap(map) => {
            let fields = expect_object(live, incoming, path)?;
            let decoded = deserialize_entries(fields, path, classes)?;
            let mut map = map.borrow_mut();
            map.entries.clear();
            map.entries.extend(decoded);
            Ok(())
        }
        Value::Set(members) => {
            let fields = expect_object(live, incoming, path)?;
            let decoded = deserialize_members(fields);
            let mut members = members.borrow_mut();
            members.clear();
            members.extend(decoded);
            Ok(())
        }
        Value::Table(table) => {
            let fields = expect_object(live, incoming, path)?;
            merge_record(Record::Table(table), fields, path, classes)
        }
        Value::Object(instance) => {
            let fields = expect_object(live, incoming, path)?;
            merge_record(Record::Object(instance), fields, path, classes)
        }
        _ => Err(CopyError::unsupported(
            path,
            format!("merge target is not a container ({})", live.type_name()),
        )),
    }
}

/// A live keyed container whose entries are merged one at a time.
enum Record<'a> {
    Table(&'a Shared<Table>),
    Object(&'a Shared<Instance>),
}

impl Record<'_> {
    fn get(&self, key: &Key) -> Option<Value> {
        match self {
            Record::Table(t) => t.borrow().entries.get(key).cloned(),
            Record::Object(o) => o.borrow().fields.get(key).cloned(),
        }
    }

    fn insert(&self, key: Key, value: Value) {
        match self {
            Record::Table(t) => {
                t.borrow_mut().entries.insert(key, value);
            }
            Record::Object(o) => {
                o.borrow_mut().fields.insert(key, value);
            }
        }
    }
}

fn merge_record(
    record: Record<'_>,
    fields: &JsonMap<String, JsonValue>,
    path: &str,
    classes: &ClassRegistry,
) -> Result<(), CopyError> {
    let number_keys = brand::has_number_keys(fields);
    for (raw, fragment) in fields {
        if brand::is_brand(raw) {
            continue;
        }
        let key = brand::decode_key(raw, number_keys);
        let child = child_path(path, &key);

        let kind = match fragment {
            JsonValue::Object(child_fields) => match brand::classify_encoded(child_fields, &child)? {
                EncodedKind::Host(_) => {
                    record.insert(key, deserialize(fragment, &child, classes)?);
                    continue;
                }
                kind => Some(kind),
            },
            JsonValue::Array(_) => None,
            _ => {
                record.insert(key, deserialize(fragment, &child, classes)?);
                continue;
            }
        };

        // The parent borrow is released before recursing.
        let target = match record.get(&key) {
            Some(existing) if is_container(&existing) => existing,
            _ => {
                let fresh = empty_container(kind.as_ref(), fragment, &child, classes)?;
                record.insert(key, fresh.clone());
                fresh
            }
        };
        merge(&target, fragment, &child, classes)?;
    }
    Ok(())
}

/// Live values that are merged into instead of replaced. The live kind wins
/// over the incoming brand.
fn is_container(existing: &Value) -> bool {
    matches!(
        existing,
        Value::Array(_)
            | Value::Table(_)
            | Value::Map(_)
            | Value::DefaultMap(_)
            | Value::Set(_)
            | Value::Object(_)
    )
}

fn empty_container(
    kind: Option<&EncodedKind>,
    fragment: &JsonValue,
    path: &str,
    classes: &ClassRegistry,
) -> Result<Value, CopyError> {
    let value = match kind {
        None => Value::array(Vec::new()),
        Some(EncodedKind::Record) => Value::table(Table::new()),
        Some(EncodedKind::Map) => Value::map(BTreeMap::new()),
        Some(EncodedKind::Set) => Value::Set(shared(Default::default())),
        Some(EncodedKind::DefaultMap) => {
            let JsonValue::Object(fields) = fragment else {
                return Err(CopyError::malformed(path, "default map fragment is not an object"));
            };
            Value::default_map(DefaultMap::new(deserialize_default(fields, path)?))
        }
        Some(EncodedKind::Class(name)) => Value::object(classes.resolve(name, path)?.instantiate()),
        Some(EncodedKind::Host(host)) => {
            return Err(CopyError::unsupported(
                path,
                format!("{} values are leaves and cannot be merged into", host.type_name),
            ));
        }
    };
    Ok(value)
}

fn expect_object<'a>(
    live: &Value,
    incoming: &'a JsonValue,
    path: &str,
) -> Result<&'a JsonMap<String, JsonValue>, CopyError> {
    match incoming {
        JsonValue::Object(fields) => Ok(fields),
        _ => Err(shape_mismatch(path, live, incoming)),
    }
}

fn shape_mismatch(path: &str, live: &Value, incoming: &JsonValue) -> CopyError {
    let found = match incoming {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    };
    CopyError::malformed(
        path,
        format!("cannot merge {} into {}", found, live.type_name()),
    )
}
