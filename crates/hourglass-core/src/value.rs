// ABOUTME: Dynamic value model for save data: scalars, shared containers, classes and host userdata.
// ABOUTME: Containers are Rc<RefCell<_>> handles so identity survives merges; keyed containers iterate sorted.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::Rc;

/// A shared, interior-mutable container handle. Cloning the handle aliases the container.
pub type Shared<T> = Rc<RefCell<T>>;

/// Wrap a value in a fresh shared handle.
pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// A key in any keyed container. Integer keys order before string keys.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Int(i64),
    Str(String),
}

impl Key {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::Str(s) => Some(s),
            Key::Int(_) => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(i) => Some(*i),
            Key::Str(_) => None,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Key::Int(_))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Str(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::Str(s)
    }
}

impl From<i64> for Key {
    fn from(i: i64) -> Self {
        Key::Int(i)
    }
}

impl From<i32> for Key {
    fn from(i: i32) -> Self {
        Key::Int(i64::from(i))
    }
}

/// An opaque callable. Functions survive cloning by handle and cannot be encoded.
#[derive(Clone)]
pub struct Function(Rc<dyn Fn(&[Value]) -> Value>);

impl Function {
    pub fn new(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Function(..)")
    }
}

/// An opaque value owned by the host application.
///
/// Only types with an entry in [`crate::host::HOST_TYPES`] can be copied or
/// encoded; any other userdata is passed through by handle when cloning and
/// rejected when encoding.
pub trait Userdata: Any + fmt::Debug {
    fn type_name(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn Userdata) -> bool;
}

/// A plain nested record. `metatable` names a foreign identity marker that the
/// engine refuses to transform.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub entries: BTreeMap<Key, Value>,
    pub metatable: Option<String>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.entries.insert(key.into(), value.into());
        self
    }

    pub fn with_metatable(mut self, marker: impl Into<String>) -> Self {
        self.metatable = Some(marker.into());
        self
    }

    pub fn get(&self, key: impl Into<Key>) -> Option<&Value> {
        self.entries.get(&key.into())
    }

    pub fn insert(&mut self, key: impl Into<Key>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(key.into(), value.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The default a [`DefaultMap`] produces for a missing key.
#[derive(Clone)]
pub enum DefaultValue {
    /// A scalar copied into each new entry.
    Primitive(Value),
    /// A closure run per missing key. Factories cannot be encoded.
    Factory(Rc<dyn Fn(&Key) -> Value>),
}

impl DefaultValue {
    pub fn factory(f: impl Fn(&Key) -> Value + 'static) -> Self {
        DefaultValue::Factory(Rc::new(f))
    }

    pub fn produce(&self, key: &Key) -> Value {
        match self {
            DefaultValue::Primitive(v) => v.clone(),
            DefaultValue::Factory(f) => f(key),
        }
    }
}

impl fmt::Debug for DefaultValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultValue::Primitive(v) => f.debug_tuple("Primitive").field(v).finish(),
            DefaultValue::Factory(_) => f.write_str("Factory(..)"),
        }
    }
}

/// A keyed collection that fills in missing keys on lookup.
#[derive(Debug, Clone)]
pub struct DefaultMap {
    pub default: DefaultValue,
    pub entries: BTreeMap<Key, Value>,
}

impl DefaultMap {
    pub fn new(default: DefaultValue) -> Self {
        Self {
            default,
            entries: BTreeMap::new(),
        }
    }

    pub fn with_primitive(default: impl Into<Value>) -> Self {
        Self::new(DefaultValue::Primitive(default.into()))
    }

    /// Return the entry for `key`, inserting the default first if it is missing.
    pub fn get_or_insert_default(&mut self, key: impl Into<Key>) -> Value {
        let key = key.into();
        if let Some(existing) = self.entries.get(&key) {
            return existing.clone();
        }
        let value = self.default.produce(&key);
        self.entries.insert(key, value.clone());
        value
    }
}

/// A user-defined class: a name plus a zero-argument initialiser producing fresh fields.
#[derive(Debug)]
pub struct Class {
    name: String,
    init: fn() -> BTreeMap<Key, Value>,
}

impl Class {
    pub fn new(name: impl Into<String>, init: fn() -> BTreeMap<Key, Value>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            init,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the initialiser and wrap the result in a new instance.
    pub fn instantiate(self: &Rc<Self>) -> Instance {
        Instance {
            class: Rc::clone(self),
            fields: (self.init)(),
        }
    }
}

/// An instance of a [`Class`].
#[derive(Debug, Clone)]
pub struct Instance {
    pub class: Rc<Class>,
    pub fields: BTreeMap<Key, Value>,
}

impl Instance {
    pub fn get(&self, key: impl Into<Key>) -> Option<&Value> {
        self.fields.get(&key.into())
    }

    pub fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }
}

/// Any value that can appear in a save-data tree.
#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Function(Function),
    Array(Shared<Vec<Value>>),
    Table(Shared<Table>),
    Map(Shared<BTreeMap<Key, Value>>),
    DefaultMap(Shared<DefaultMap>),
    Set(Shared<BTreeSet<Key>>),
    Object(Shared<Instance>),
    Userdata(Rc<dyn Userdata>),
}

impl Value {
    pub fn table(table: Table) -> Self {
        Value::Table(shared(table))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(shared(items))
    }

    pub fn map(entries: BTreeMap<Key, Value>) -> Self {
        Value::Map(shared(entries))
    }

    pub fn set<K: Into<Key>>(members: impl IntoIterator<Item = K>) -> Self {
        Value::Set(shared(members.into_iter().map(Into::into).collect()))
    }

    pub fn default_map(map: DefaultMap) -> Self {
        Value::DefaultMap(shared(map))
    }

    pub fn object(instance: Instance) -> Self {
        Value::Object(shared(instance))
    }

    pub fn userdata(value: impl Userdata) -> Self {
        Value::Userdata(Rc::new(value))
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Shared<Table>> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Downcast a userdata value to a concrete host type.
    pub fn downcast_userdata<T: Userdata>(&self) -> Option<&T> {
        match self {
            Value::Userdata(u) => u.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Function(_) => "function",
            Value::Array(_) => "array",
            Value::Table(_) => "table",
            Value::Map(_) => "map",
            Value::DefaultMap(_) => "default map",
            Value::Set(_) => "set",
            Value::Object(_) => "object",
            Value::Userdata(u) => u.type_name(),
        }
    }

    /// Address of the underlying allocation for handle-typed values.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Array(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            Value::Table(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            Value::Map(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            Value::DefaultMap(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            Value::Set(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            Value::Object(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            Value::Userdata(rc) => Some(Rc::as_ptr(rc) as *const () as usize),
            _ => None,
        }
    }

    /// True when both values are handles to the same allocation.
    pub fn ptr_eq(&self, other: &Value) -> bool {
        match (self.identity(), other.identity()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::table(t)
    }
}

/// Structural equality. Containers compare by contents, functions and factory
/// defaults by handle, classes by name, and userdata through [`Userdata::dyn_eq`].
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Array(x), Value::Array(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(l, r)| deep_equal(l, r))
        }
        (Value::Table(x), Value::Table(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.metatable == y.metatable && entries_equal(&x.entries, &y.entries)
        }
        (Value::Map(x), Value::Map(y)) => entries_equal(&x.borrow(), &y.borrow()),
        (Value::DefaultMap(x), Value::DefaultMap(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            let defaults_equal = match (&x.default, &y.default) {
                (DefaultValue::Primitive(l), DefaultValue::Primitive(r)) => deep_equal(l, r),
                (DefaultValue::Factory(l), DefaultValue::Factory(r)) => Rc::ptr_eq(l, r),
                _ => false,
            };
            defaults_equal && entries_equal(&x.entries, &y.entries)
        }
        (Value::Set(x), Value::Set(y)) => *x.borrow() == *y.borrow(),
        (Value::Object(x), Value::Object(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.class.name() == y.class.name() && entries_equal(&x.fields, &y.fields)
        }
        (Value::Userdata(x), Value::Userdata(y)) => x.dyn_eq(y.as_ref()),
        _ => false,
    }
}

fn entries_equal(a: &BTreeMap<Key, Value>, b: &BTreeMap<Key, Value>) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b.iter())
            .all(|((ka, va), (kb, vb))| ka == kb && deep_equal(va, vb))
}
