// ABOUTME: Core library for hourglass: the save-data value model and its transformation engines.
// ABOUTME: Provides classification, deep copy, JSON encode/decode, identity-preserving merge and registries.

pub mod brand;
pub mod class;
pub mod classify;
pub mod copy;
pub mod error;
pub mod host;
pub mod merge;
pub mod value;

pub use class::ClassRegistry;
pub use classify::{Category, Keyed, classify};
pub use copy::{SerializationType, deep_copy, deserialize, serialize};
pub use error::{CopyError, child_path};
pub use host::{BitSet128, Color, HOST_TYPES, HostError, HostType, KColor, Rng, Vector};
pub use merge::merge;
pub use value::{
    Class, DefaultMap, DefaultValue, Function, Instance, Key, Shared, Table, Userdata, Value,
    deep_equal, shared,
};
