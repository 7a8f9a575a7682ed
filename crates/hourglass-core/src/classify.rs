// ABOUTME: Classifies a live value into exactly one category for the copy and merge engines.
// ABOUTME: Rejects tables with foreign identity markers and resolves host userdata handlers.

use crate::error::CopyError;
use crate::host::{self, HostType};
use crate::value::Value;

/// Markers for weak collections; their contents cannot be enumerated reliably.
const WEAK_MARKERS: [&str; 2] = ["WeakMap", "WeakSet"];

/// Flavour of a keyed collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyed {
    /// Plain nested record.
    Record,
    /// Unique-key map.
    Map,
}

/// The category a value falls into.
#[derive(Debug, Clone, Copy)]
pub enum Category {
    Scalar,
    Sequence,
    Set,
    KeyedCollection(Keyed),
    AutoDefaultingKeyedCollection,
    UserClass,
    OpaqueHostValue(&'static HostType),
    Unrecognized,
}

impl Category {
    /// Collections whose children can be reached only by key or position.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            Category::Sequence
                | Category::Set
                | Category::KeyedCollection(Keyed::Map)
                | Category::AutoDefaultingKeyedCollection
        )
    }
}

/// Classify `value`. `path` is used only for error reporting.
pub fn classify(value: &Value, path: &str) -> Result<Category, CopyError> {
    let category = match value {
        Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {
            Category::Scalar
        }
        Value::Function(_) => Category::Unrecognized,
        Value::Array(_) => Category::Sequence,
        Value::Set(_) => Category::Set,
        Value::Map(_) => Category::KeyedCollection(Keyed::Map),
        Value::DefaultMap(_) => Category::AutoDefaultingKeyedCollection,
        Value::Object(_) => Category::UserClass,
        Value::Table(table) => match &table.borrow().metatable {
            None => Category::KeyedCollection(Keyed::Record),
            Some(marker) if WEAK_MARKERS.contains(&marker.as_str()) => {
                return Err(CopyError::unsupported(
                    path,
                    format!("{} contents cannot be copied", marker),
                ));
            }
            Some(marker) => {
                return Err(CopyError::MetatableRejection {
                    path: path.to_string(),
                    marker: marker.clone(),
                });
            }
        },
        Value::Userdata(u) => match host::handler_for(u.as_ref()) {
            Some(host) => Category::OpaqueHostValue(host),
            None => Category::Unrecognized,
        },
    };
    Ok(category)
}
