// ABOUTME: Reserved marker keys that brand encoded objects with their original category or class.
// ABOUTME: Classifies encoded objects by brand and converts stringified number keys back to integers.

use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::CopyError;
use crate::host::{self, HostType};
use crate::value::Key;

pub const DEFAULT_MAP: &str = "__DEFAULT_MAP";
pub const DEFAULT_MAP_VALUE: &str = "__DEFAULT_MAP_VALUE";
pub const MAP: &str = "__MAP";
pub const SET: &str = "__SET";
pub const OBJECT_WITH_NUMBER_KEYS: &str = "__OBJECT_WITH_NUMBER_KEYS";
pub const CLASS: &str = "__CLASS";
pub const VECTOR: &str = "__VECTOR";
pub const COLOR: &str = "__COLOR";
pub const K_COLOR: &str = "__K_COLOR";
pub const RNG: &str = "__RNG";
pub const BIT_SET_128: &str = "__BIT_SET_128";

/// Every marker key. User data may not use any of these as a key.
pub const RESERVED: [&str; 11] = [
    DEFAULT_MAP,
    DEFAULT_MAP_VALUE,
    MAP,
    SET,
    OBJECT_WITH_NUMBER_KEYS,
    CLASS,
    VECTOR,
    COLOR,
    K_COLOR,
    RNG,
    BIT_SET_128,
];

pub fn is_brand(key: &str) -> bool {
    RESERVED.contains(&key)
}

pub fn is_brand_key(key: &Key) -> bool {
    key.as_str().is_some_and(is_brand)
}

/// The category an encoded object was branded with.
#[derive(Debug, Clone)]
pub enum EncodedKind {
    Record,
    Map,
    Set,
    DefaultMap,
    Class(String),
    Host(&'static HostType),
}

/// Read the brand of an encoded object. Precedence is
/// default map, map, set, class, host type, then plain record.
pub fn classify_encoded(
    fields: &JsonMap<String, JsonValue>,
    path: &str,
) -> Result<EncodedKind, CopyError> {
    if fields.contains_key(DEFAULT_MAP) {
        return Ok(EncodedKind::DefaultMap);
    }
    if fields.contains_key(MAP) {
        return Ok(EncodedKind::Map);
    }
    if fields.contains_key(SET) {
        return Ok(EncodedKind::Set);
    }
    if let Some(name) = fields.get(CLASS) {
        return match name {
            JsonValue::String(name) if !name.is_empty() => Ok(EncodedKind::Class(name.clone())),
            _ => Err(CopyError::malformed(path, "class brand must be a non-empty string")),
        };
    }
    if let Some(host) = host::handler_for_encoded(fields) {
        return Ok(EncodedKind::Host(host));
    }
    Ok(EncodedKind::Record)
}

/// True when the object's integer keys were stringified on encode.
pub fn has_number_keys(fields: &JsonMap<String, JsonValue>) -> bool {
    fields.contains_key(OBJECT_WITH_NUMBER_KEYS)
}

/// Convert an encoded key back into a [`Key`].
pub fn decode_key(raw: &str, number_keys: bool) -> Key {
    if number_keys && let Ok(i) = raw.parse::<i64>() {
        return Key::Int(i);
    }
    Key::Str(raw.to_string())
}
