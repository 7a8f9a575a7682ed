// ABOUTME: Opaque host value types (Vector, Color, KColor, Rng, BitSet128) and their handler table.
// ABOUTME: Each handler recognises, copies, encodes and decodes one type; HOST_TYPES is the single registry.

use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

use crate::brand;
use crate::value::Userdata;

/// Errors produced by a host type handler.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("expected {expected}, found {found}")]
    Mismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid fields: {0}")]
    Fields(#[from] serde_json::Error),

    #[error("encoded form is not an object")]
    NotAnObject,
}

/// Handler strategy for one opaque host type.
#[derive(Debug)]
pub struct HostType {
    pub type_name: &'static str,
    pub brand: &'static str,
    pub copy: fn(&dyn Userdata) -> Result<Rc<dyn Userdata>, HostError>,
    pub encode: fn(&dyn Userdata) -> Result<JsonMap<String, JsonValue>, HostError>,
    pub decode: fn(&JsonMap<String, JsonValue>) -> Result<Rc<dyn Userdata>, HostError>,
}

impl HostType {
    pub fn recognize(&self, value: &dyn Userdata) -> bool {
        value.type_name() == self.type_name
    }
}

/// A host type that the handler table knows how to round trip.
pub trait HostValue: Userdata + Clone + Serialize + DeserializeOwned {
    const TYPE_NAME: &'static str;
    const BRAND: &'static str;

    /// Fix up a freshly decoded value.
    fn normalized(self) -> Self {
        self
    }
}

fn copy_as<T: HostValue>(value: &dyn Userdata) -> Result<Rc<dyn Userdata>, HostError> {
    let concrete = downcast::<T>(value)?;
    Ok(Rc::new(concrete.clone()))
}

fn encode_as<T: HostValue>(value: &dyn Userdata) -> Result<JsonMap<String, JsonValue>, HostError> {
    let concrete = downcast::<T>(value)?;
    let JsonValue::Object(mut fields) = serde_json::to_value(concrete)? else {
        return Err(HostError::NotAnObject);
    };
    fields.insert(T::BRAND.to_string(), JsonValue::String(String::new()));
    Ok(fields)
}

fn decode_as<T: HostValue>(
    fields: &JsonMap<String, JsonValue>,
) -> Result<Rc<dyn Userdata>, HostError> {
    let concrete: T = serde_json::from_value(JsonValue::Object(fields.clone()))?;
    Ok(Rc::new(concrete.normalized()))
}

fn downcast<T: HostValue>(value: &dyn Userdata) -> Result<&T, HostError> {
    value
        .as_any()
        .downcast_ref::<T>()
        .ok_or(HostError::Mismatch {
            expected: T::TYPE_NAME,
            found: value.type_name(),
        })
}

const fn host_type<T: HostValue>() -> HostType {
    HostType {
        type_name: T::TYPE_NAME,
        brand: T::BRAND,
        copy: copy_as::<T>,
        encode: encode_as::<T>,
        decode: decode_as::<T>,
    }
}

/// Every host type the engine can copy and encode.
pub static HOST_TYPES: [HostType; 5] = [
    host_type::<Vector>(),
    host_type::<Color>(),
    host_type::<KColor>(),
    host_type::<Rng>(),
    host_type::<BitSet128>(),
];

/// Find the handler for a live userdata value.
pub fn handler_for(value: &dyn Userdata) -> Option<&'static HostType> {
    HOST_TYPES.iter().find(|host| host.recognize(value))
}

/// Find the handler whose brand appears in an encoded object.
pub fn handler_for_encoded(fields: &JsonMap<String, JsonValue>) -> Option<&'static HostType> {
    HOST_TYPES.iter().find(|host| fields.contains_key(host.brand))
}

macro_rules! userdata_impl {
    ($ty:ty) => {
        impl Userdata for $ty {
            fn type_name(&self) -> &'static str {
                <$ty as HostValue>::TYPE_NAME
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn dyn_eq(&self, other: &dyn Userdata) -> bool {
                other
                    .as_any()
                    .downcast_ref::<$ty>()
                    .is_some_and(|o| o == self)
            }
        }
    };
}

/// A 2D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, serde::Deserialize)]
pub struct Vector {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
}

impl Vector {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl HostValue for Vector {
    const TYPE_NAME: &'static str = "Vector";
    const BRAND: &'static str = brand::VECTOR;
}

userdata_impl!(Vector);

/// A colour with tint channels in 0..=1 and additive offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, serde::Deserialize)]
pub struct Color {
    #[serde(rename = "R")]
    pub r: f64,
    #[serde(rename = "G")]
    pub g: f64,
    #[serde(rename = "B")]
    pub b: f64,
    #[serde(rename = "A")]
    pub a: f64,
    #[serde(rename = "RO", default)]
    pub ro: f64,
    #[serde(rename = "GO", default)]
    pub go: f64,
    #[serde(rename = "BO", default)]
    pub bo: f64,
}

impl Color {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self {
            r,
            g,
            b,
            a,
            ro: 0.0,
            go: 0.0,
            bo: 0.0,
        }
    }

    pub fn with_offsets(mut self, ro: f64, go: f64, bo: f64) -> Self {
        self.ro = ro;
        self.go = go;
        self.bo = bo;
        self
    }
}

impl HostValue for Color {
    const TYPE_NAME: &'static str = "Color";
    const BRAND: &'static str = brand::COLOR;
}

userdata_impl!(Color);

/// A colour used for text rendering, without offsets.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, serde::Deserialize)]
pub struct KColor {
    #[serde(rename = "Red")]
    pub red: f64,
    #[serde(rename = "Green")]
    pub green: f64,
    #[serde(rename = "Blue")]
    pub blue: f64,
    #[serde(rename = "Alpha")]
    pub alpha: f64,
}

impl KColor {
    pub fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }
}

impl HostValue for KColor {
    const TYPE_NAME: &'static str = "KColor";
    const BRAND: &'static str = brand::K_COLOR;
}

userdata_impl!(KColor);

/// A seeded xorshift random number generator. Advancing it mutates the seed in place.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct Rng {
    #[serde(rename = "Seed")]
    seed: Cell<u32>,
}

impl Rng {
    /// Seed used when a zero seed is supplied; xorshift never leaves zero.
    pub const FALLBACK_SEED: u32 = 2_853_650_767;

    pub fn new(seed: u32) -> Self {
        Self {
            seed: Cell::new(Self::checked_seed(seed)),
        }
    }

    pub fn seed(&self) -> u32 {
        self.seed.get()
    }

    pub fn set_seed(&self, seed: u32) {
        self.seed.set(Self::checked_seed(seed));
    }

    /// Advance the generator and return the new seed.
    pub fn next_u32(&self) -> u32 {
        let mut x = self.seed.get();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.seed.set(x);
        x
    }

    /// Advance the generator and return a float in [0, 1).
    pub fn next_float(&self) -> f64 {
        f64::from(self.next_u32()) / (f64::from(u32::MAX) + 1.0)
    }

    fn checked_seed(seed: u32) -> u32 {
        if seed == 0 {
            tracing::warn!(
                "rng seed 0 is invalid, using fallback seed {}",
                Self::FALLBACK_SEED
            );
            Self::FALLBACK_SEED
        } else {
            seed
        }
    }
}

impl HostValue for Rng {
    const TYPE_NAME: &'static str = "RNG";
    const BRAND: &'static str = brand::RNG;

    fn normalized(self) -> Self {
        Self::new(self.seed.get())
    }
}

userdata_impl!(Rng);

/// A 128-bit flag set split into low and high words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, serde::Deserialize)]
pub struct BitSet128 {
    pub l: u64,
    pub h: u64,
}

impl BitSet128 {
    pub fn new(l: u64, h: u64) -> Self {
        Self { l, h }
    }

    pub fn contains(&self, bit: u8) -> bool {
        match bit {
            0..=63 => self.l & (1 << bit) != 0,
            64..=127 => self.h & (1 << (bit - 64)) != 0,
            _ => false,
        }
    }

    /// Set a bit. Bits above 127 are ignored.
    pub fn insert(&mut self, bit: u8) {
        match bit {
            0..=63 => self.l |= 1 << bit,
            64..=127 => self.h |= 1 << (bit - 64),
            _ => {}
        }
    }
}

impl HostValue for BitSet128 {
    const TYPE_NAME: &'static str = "BitSet128";
    const BRAND: &'static str = brand::BIT_SET_128;
}

userdata_impl!(BitSet128);
