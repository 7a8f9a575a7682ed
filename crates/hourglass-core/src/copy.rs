// ABOUTME: Deep-copy engine with three modes: clone live values, encode to JSON, decode from JSON.
// ABOUTME: Brands categories and classes on encode, rejects cycles, and restores key types on decode.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::brand::{self, EncodedKind};
use crate::class::ClassRegistry;
use crate::classify::{Category, classify};
use crate::error::{CopyError, child_path};
use crate::host::HostError;
use crate::value::{DefaultMap, DefaultValue, Instance, Key, Table, Value, shared};

/// Which transformation a traversal performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationType {
    /// Clone a live value into an independent live value.
    None,
    /// Encode a live value into JSON.
    Serialize,
    /// Decode JSON into a live value.
    Deserialize,
}

impl fmt::Display for SerializationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SerializationType::None => "clone",
            SerializationType::Serialize => "serialize",
            SerializationType::Deserialize => "deserialize",
        };
        f.write_str(name)
    }
}

/// Produce an independent copy of `value` that shares no container with it.
pub fn deep_copy(value: &Value, path: &str) -> Result<Value, CopyError> {
    Walker::new(SerializationType::None).copy(value, path)
}

/// Encode `value` into JSON with category and class brands.
pub fn serialize(value: &Value, path: &str) -> Result<JsonValue, CopyError> {
    Walker::new(SerializationType::Serialize).encode(value, path)
}

/// Decode JSON produced by [`serialize`] back into a live value.
pub fn deserialize(
    encoded: &JsonValue,
    path: &str,
    classes: &ClassRegistry,
) -> Result<Value, CopyError> {
    Decoder { classes }.decode(encoded, path)
}

/// Decode every non-marker entry of an encoded keyed collection.
pub(crate) fn deserialize_entries(
    fields: &JsonMap<String, JsonValue>,
    path: &str,
    classes: &ClassRegistry,
) -> Result<BTreeMap<Key, Value>, CopyError> {
    Decoder { classes }.decode_entries(fields, path)
}

/// Decode the members of an encoded set.
pub(crate) fn deserialize_members(fields: &JsonMap<String, JsonValue>) -> BTreeSet<Key> {
    let number_keys = brand::has_number_keys(fields);
    fields
        .keys()
        .filter(|k| !brand::is_brand(k))
        .map(|k| brand::decode_key(k, number_keys))
        .collect()
}

/// Decode the default of an encoded default map. It must be a scalar.
pub(crate) fn deserialize_default(
    fields: &JsonMap<String, JsonValue>,
    path: &str,
) -> Result<DefaultValue, CopyError> {
    let raw = fields
        .get(brand::DEFAULT_MAP_VALUE)
        .ok_or_else(|| CopyError::malformed(path, "default map is missing its default value"))?;
    let default = match raw {
        JsonValue::Null => Value::Nil,
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => decode_number(n, path)?,
        JsonValue::String(s) => Value::Str(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => {
            return Err(CopyError::malformed(path, "default map value must be a scalar"));
        }
    };
    Ok(DefaultValue::Primitive(default))
}

fn decode_number(n: &Number, path: &str) -> Result<Value, CopyError> {
    if let Some(i) = n.as_i64() {
        Ok(Value::Int(i))
    } else if let Some(f) = n.as_f64() {
        Ok(Value::Float(f))
    } else {
        Err(CopyError::malformed(path, format!("number {} is out of range", n)))
    }
}

fn host_error(path: &str, err: HostError) -> CopyError {
    match err {
        HostError::Mismatch { .. } => CopyError::unsupported(path, err.to_string()),
        HostError::Fields(_) | HostError::NotAnObject => CopyError::malformed(path, err.to_string()),
    }
}

/// Shared traversal state for clone and encode.
struct Walker {
    mode: SerializationType,
    /// Identities of the containers currently being traversed.
    ancestors: Vec<usize>,
    /// How many of those ancestors are sequences, sets, maps or default maps.
    collection_depth: usize,
}

impl Walker {
    fn new(mode: SerializationType) -> Self {
        Self {
            mode,
            ancestors: Vec::new(),
            collection_depth: 0,
        }
    }

    /// Run `f` with `value` pushed onto the ancestor stack.
    fn enter<T>(
        &mut self,
        value: &Value,
        category: Category,
        path: &str,
        f: impl FnOnce(&mut Self) -> Result<T, CopyError>,
    ) -> Result<T, CopyError> {
        let Some(id) = value.identity() else {
            return f(self);
        };
        if self.ancestors.contains(&id) {
            return Err(CopyError::CyclicValue {
                path: path.to_string(),
            });
        }
        tracing::trace!("{}: entering {} at '{}'", self.mode, value.type_name(), path);

        let counts = category.is_collection();
        self.ancestors.push(id);
        if counts {
            self.collection_depth += 1;
        }
        let result = f(self);
        if counts {
            self.collection_depth -= 1;
        }
        self.ancestors.pop();
        result
    }

    fn copy(&mut self, value: &Value, path: &str) -> Result<Value, CopyError> {
        let category = classify(value, path)?;
        match value {
            Value::Nil
            | Value::Bool(_)
            | Value::Int(_)
            | Value::Float(_)
            | Value::Str(_)
            | Value::Function(_) => Ok(value.clone()),
            Value::Userdata(u) => match category {
                Category::OpaqueHostValue(host) => (host.copy)(u.as_ref())
                    .map(Value::Userdata)
                    .map_err(|e| host_error(path, e)),
                _ => Ok(value.clone()),
            },
            Value::Array(items) => self.enter(value, category, path, |this| {
                let items = items.borrow();
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(this.copy(item, &child_path(path, i + 1))?);
                }
                Ok(Value::array(out))
            }),
            Value::Table(table) => self.enter(value, category, path, |this| {
                let table = table.borrow();
                let entries = this.copy_entries(&table.entries, path)?;
                Ok(Value::table(Table {
                    entries,
                    metatable: None,
                }))
            }),
            Value::Map(map) => self.enter(value, category, path, |this| {
                let entries = this.copy_entries(&map.borrow(), path)?;
                Ok(Value::map(entries))
            }),
            Value::DefaultMap(map) => self.enter(value, category, path, |this| {
                let map = map.borrow();
                let default = match &map.default {
                    DefaultValue::Primitive(v) => DefaultValue::Primitive(this.copy(v, path)?),
                    DefaultValue::Factory(f) => DefaultValue::Factory(Rc::clone(f)),
                };
                let entries = this.copy_entries(&map.entries, path)?;
                Ok(Value::default_map(DefaultMap { default, entries }))
            }),
            Value::Set(members) => Ok(Value::Set(shared(members.borrow().clone()))),
            Value::Object(instance) => self.enter(value, category, path, |this| {
                let source = instance.borrow();
                let mut fresh = source.class.instantiate();
                for (key, field) in &source.fields {
                    let copied = this.copy(field, &child_path(path, key))?;
                    fresh.fields.insert(key.clone(), copied);
                }
                Ok(Value::object(fresh))
            }),
        }
    }

    fn copy_entries(
        &mut self,
        entries: &BTreeMap<Key, Value>,
        path: &str,
    ) -> Result<BTreeMap<Key, Value>, CopyError> {
        let mut out = BTreeMap::new();
        for (key, value) in entries {
            out.insert(key.clone(), self.copy(value, &child_path(path, key))?);
        }
        Ok(out)
    }

    fn encode(&mut self, value: &Value, path: &str) -> Result<JsonValue, CopyError> {
        let category = classify(value, path)?;
        match value {
            Value::Nil => Ok(JsonValue::Null),
            Value::Bool(b) => Ok(JsonValue::Bool(*b)),
            Value::Int(i) => Ok(JsonValue::from(*i)),
            Value::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .ok_or_else(|| CopyError::unsupported(path, format!("{} is not a finite number", f))),
            Value::Str(s) => Ok(JsonValue::String(s.clone())),
            Value::Function(_) => Err(CopyError::unsupported(path, "functions cannot be encoded")),
            Value::Userdata(u) => match category {
                Category::OpaqueHostValue(host) => (host.encode)(u.as_ref())
                    .map(JsonValue::Object)
                    .map_err(|e| host_error(path, e)),
                _ => Err(CopyError::unsupported(
                    path,
                    format!("no handler for host type {}", u.type_name()),
                )),
            },
            Value::Array(items) => self.enter(value, category, path, |this| {
                let items = items.borrow();
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(this.encode(item, &child_path(path, i + 1))?);
                }
                Ok(JsonValue::Array(out))
            }),
            Value::Table(table) => self.enter(value, category, path, |this| {
                let fields = this.encode_entries(&table.borrow().entries, path)?;
                Ok(JsonValue::Object(fields))
            }),
            Value::Map(map) => self.enter(value, category, path, |this| {
                let mut fields = this.encode_entries(&map.borrow(), path)?;
                fields.insert(brand::MAP.to_string(), marker());
                Ok(JsonValue::Object(fields))
            }),
            Value::DefaultMap(map) => self.enter(value, category, path, |this| {
                let map = map.borrow();
                let mut fields = this.encode_entries(&map.entries, path)?;
                match &map.default {
                    DefaultValue::Primitive(default)
                        if matches!(classify(default, path)?, Category::Scalar) =>
                    {
                        let default = this.encode(default, path)?;
                        fields.insert(brand::DEFAULT_MAP.to_string(), marker());
                        fields.insert(brand::DEFAULT_MAP_VALUE.to_string(), default);
                    }
                    _ if this.collection_depth > 1 => {
                        return Err(CopyError::unsupported(
                            path,
                            "a default map with a non-scalar default cannot be encoded inside another collection",
                        ));
                    }
                    _ => {
                        tracing::warn!(
                            "default map at '{}' has a non-scalar default; encoding it as a plain map",
                            path
                        );
                        fields.insert(brand::MAP.to_string(), marker());
                    }
                }
                Ok(JsonValue::Object(fields))
            }),
            Value::Set(members) => self.enter(value, category, path, |_| {
                let members = members.borrow();
                let (keys, number_keys) = encode_keys(members.iter(), path)?;
                let mut fields = JsonMap::new();
                for key in keys {
                    fields.insert(key, marker());
                }
                fields.insert(brand::SET.to_string(), marker());
                if number_keys {
                    fields.insert(brand::OBJECT_WITH_NUMBER_KEYS.to_string(), marker());
                }
                Ok(JsonValue::Object(fields))
            }),
            Value::Object(instance) => self.enter(value, category, path, |this| {
                let instance = instance.borrow();
                let mut fields = this.encode_entries(&instance.fields, path)?;
                fields.insert(
                    brand::CLASS.to_string(),
                    JsonValue::String(instance.class.name().to_string()),
                );
                Ok(JsonValue::Object(fields))
            }),
        }
    }

    fn encode_entries(
        &mut self,
        entries: &BTreeMap<Key, Value>,
        path: &str,
    ) -> Result<JsonMap<String, JsonValue>, CopyError> {
        let (keys, number_keys) = encode_keys(entries.keys(), path)?;
        let mut fields = JsonMap::new();
        for ((key, value), encoded_key) in entries.iter().zip(keys) {
            let encoded = self.encode(value, &child_path(path, key))?;
            fields.insert(encoded_key, encoded);
        }
        if number_keys {
            fields.insert(brand::OBJECT_WITH_NUMBER_KEYS.to_string(), marker());
        }
        Ok(fields)
    }
}

fn marker() -> JsonValue {
    JsonValue::String(String::new())
}

/// Stringify keys in iteration order. Returns whether any key was an integer.
///
/// Integer keys are only recoverable if no string key also parses as an
/// integer, so that combination is rejected.
fn encode_keys<'a>(
    keys: impl Iterator<Item = &'a Key> + Clone,
    path: &str,
) -> Result<(Vec<String>, bool), CopyError> {
    let number_keys = keys.clone().any(Key::is_int);
    let mut out = Vec::new();
    for key in keys {
        match key {
            Key::Int(i) => out.push(i.to_string()),
            Key::Str(s) => {
                if brand::is_brand(s) {
                    return Err(CopyError::unsupported(
                        &child_path(path, s),
                        format!("key '{}' is reserved", s),
                    ));
                }
                if number_keys && s.parse::<i64>().is_ok() {
                    return Err(CopyError::unsupported(
                        &child_path(path, s),
                        "integer keys cannot be mixed with integer-like string keys",
                    ));
                }
                out.push(s.clone());
            }
        }
    }
    Ok((out, number_keys))
}

struct Decoder<'a> {
    classes: &'a ClassRegistry,
}

impl Decoder<'_> {
    fn decode(&self, encoded: &JsonValue, path: &str) -> Result<Value, CopyError> {
        match encoded {
            JsonValue::Null => Ok(Value::Nil),
            JsonValue::Bool(b) => Ok(Value::Bool(*b)),
            JsonValue::Number(n) => decode_number(n, path),
            JsonValue::String(s) => Ok(Value::Str(s.clone())),
            JsonValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.decode(item, &child_path(path, i + 1))?);
                }
                Ok(Value::array(out))
            }
            JsonValue::Object(fields) => self.decode_object(fields, path),
        }
    }

    fn decode_object(
        &self,
        fields: &JsonMap<String, JsonValue>,
        path: &str,
    ) -> Result<Value, CopyError> {
        tracing::trace!("{}: decoding object at '{}'", SerializationType::Deserialize, path);
        match brand::classify_encoded(fields, path)? {
            EncodedKind::Record => Ok(Value::table(Table {
                entries: self.decode_entries(fields, path)?,
                metatable: None,
            })),
            EncodedKind::Map => Ok(Value::map(self.decode_entries(fields, path)?)),
            EncodedKind::Set => Ok(Value::Set(shared(deserialize_members(fields)))),
            EncodedKind::DefaultMap => {
                let default = deserialize_default(fields, path)?;
                let entries = self.decode_entries(fields, path)?;
                Ok(Value::default_map(DefaultMap { default, entries }))
            }
            EncodedKind::Class(name) => {
                let class = self.classes.resolve(&name, path)?;
                let mut instance: Instance = class.instantiate();
                instance.fields.extend(self.decode_entries(fields, path)?);
                Ok(Value::object(instance))
            }
            EncodedKind::Host(host) => (host.decode)(fields)
                .map(Value::Userdata)
                .map_err(|e| host_error(path, e)),
        }
    }

    fn decode_entries(
        &self,
        fields: &JsonMap<String, JsonValue>,
        path: &str,
    ) -> Result<BTreeMap<Key, Value>, CopyError> {
        let number_keys = brand::has_number_keys(fields);
        let mut out = BTreeMap::new();
        for (raw, value) in fields {
            if brand::is_brand(raw) {
                continue;
            }
            let key = brand::decode_key(raw, number_keys);
            let decoded = self.decode(value, &child_path(path, &key))?;
            out.insert(key, decoded);
        }
        Ok(out)
    }
}
