// ABOUTME: Registry of user class constructors keyed by class name, consulted when decoding.
// ABOUTME: Classes are registered explicitly or discovered by scanning live save-data trees.

use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use crate::error::CopyError;
use crate::value::{Class, Value};

/// Maps class names to their constructors.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: BTreeMap<String, Rc<Class>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class, replacing any earlier constructor with the same name.
    pub fn register(&mut self, class: Rc<Class>) {
        let name = class.name().to_string();
        if self.classes.insert(name.clone(), class).is_none() {
            tracing::debug!("registered class constructor '{}'", name);
        }
    }

    pub fn resolve(&self, name: &str, path: &str) -> Result<Rc<Class>, CopyError> {
        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| CopyError::UnknownClass {
                path: path.to_string(),
                name: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    /// Register the class of every instance reachable from `root`.
    /// Returns the number of classes seen for the first time.
    pub fn discover(&mut self, root: &Value) -> usize {
        let before = self.classes.len();
        let mut visited = HashSet::new();
        let mut pending = vec![root.clone()];

        while let Some(value) = pending.pop() {
            if let Some(id) = value.identity()
                && !visited.insert(id)
            {
                continue;
            }
            match &value {
                Value::Array(items) => pending.extend(items.borrow().iter().cloned()),
                Value::Table(table) => pending.extend(table.borrow().entries.values().cloned()),
                Value::Map(map) => pending.extend(map.borrow().values().cloned()),
                Value::DefaultMap(map) => pending.extend(map.borrow().entries.values().cloned()),
                Value::Object(instance) => {
                    let instance = instance.borrow();
                    self.register(Rc::clone(&instance.class));
                    pending.extend(instance.fields.values().cloned());
                }
                _ => {}
            }
        }

        self.classes.len() - before
    }
}
