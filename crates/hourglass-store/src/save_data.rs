// ABOUTME: Lifetime scopes (persistent, run, level, room) and the SaveData tree a feature registers.
// ABOUTME: SaveData is a shared handle, so the feature and the manager see the same live records.

use std::fmt;

use hourglass_core::{Shared, Table, Value, shared};

/// How long a block of feature state lives before it is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Scope {
    /// Survives across runs. Never reset.
    Persistent,
    /// Reset at the start of every new run.
    Run,
    /// Reset on every new level.
    Level,
    /// Reset on every new room. Never written to disk.
    Room,
}

impl Scope {
    pub const ALL: [Scope; 4] = [Scope::Persistent, Scope::Run, Scope::Level, Scope::Room];

    /// Scopes that are written to disk.
    pub const PERSISTED: [Scope; 3] = [Scope::Persistent, Scope::Run, Scope::Level];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Persistent => "persistent",
            Scope::Run => "run",
            Scope::Level => "level",
            Scope::Room => "room",
        }
    }

    pub fn from_name(name: &str) -> Option<Scope> {
        Scope::ALL.into_iter().find(|scope| scope.as_str() == name)
    }

    pub fn is_resettable(&self) -> bool {
        !matches!(self, Scope::Persistent)
    }

    pub fn is_persisted(&self) -> bool {
        !matches!(self, Scope::Room)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A feature's save-data tree: a record whose fields are scope names.
///
/// Cloning a `SaveData` aliases the tree. Feature code keeps one handle and
/// registers another with the manager.
#[derive(Debug, Clone)]
pub struct SaveData {
    root: Shared<Table>,
}

impl Default for SaveData {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveData {
    pub fn new() -> Self {
        Self {
            root: shared(Table::new()),
        }
    }

    /// Wrap an existing record. Validation happens at registration.
    pub fn from_table(root: Shared<Table>) -> Self {
        Self { root }
    }

    /// Builder-style scope insert.
    pub fn with_scope(self, scope: Scope, fields: Table) -> Self {
        self.root
            .borrow_mut()
            .insert(scope.as_str(), Value::table(fields));
        self
    }

    pub fn root(&self) -> &Shared<Table> {
        &self.root
    }

    pub fn as_value(&self) -> Value {
        Value::Table(self.root.clone())
    }

    /// The live record for `scope`, if the tree has one.
    pub fn scope(&self, scope: Scope) -> Option<Shared<Table>> {
        match self.root.borrow().get(scope.as_str()) {
            Some(Value::Table(table)) => Some(table.clone()),
            _ => None,
        }
    }

    /// Read a field from a scope record.
    pub fn get(&self, scope: Scope, field: &str) -> Option<Value> {
        self.scope(scope)
            .and_then(|table| table.borrow().get(field).cloned())
    }

    /// Write a field into a scope record. Does nothing if the scope is absent.
    pub fn set(&self, scope: Scope, field: &str, value: impl Into<Value>) {
        if let Some(table) = self.scope(scope) {
            table.borrow_mut().insert(field, value);
        }
    }

    /// True when the tree's only scope is `room`.
    pub fn is_room_only(&self) -> bool {
        let root = self.root.borrow();
        root.len() == 1 && root.get(Scope::Room.as_str()).is_some()
    }
}
