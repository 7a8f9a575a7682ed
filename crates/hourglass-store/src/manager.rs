// ABOUTME: Save data manager: subscriber registry, load and save through a slot, and scope resets.
// ABOUTME: Host hook methods drive the run/level/room lifecycle and the single-step backup protocol.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use hourglass_core::{
    Class, ClassRegistry, CopyError, Value, child_path, deep_copy, merge, serialize,
};
use serde_json::{Map as JsonMap, Value as JsonValue};
use thiserror::Error;

use crate::backup::BackupOptions;
use crate::save_data::{SaveData, Scope};
use crate::slot::{SaveSlot, SlotError};

/// Errors raised when registering or unregistering a subscriber.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("subscriber '{0}' is already registered")]
    DuplicateKey(String),

    #[error("subscriber key must not be empty")]
    InvalidKey,

    #[error("subscriber '{0}' is not registered")]
    NotRegistered(String),

    #[error("field '{field}' of subscriber '{key}' must be a plain table")]
    InvalidScope { key: String, field: String },

    #[error("subscriber '{key}' has unknown top-level field '{field}'")]
    UnknownField { key: String, field: String },
}

/// Errors that can occur during save data management.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("registration error: {0}")]
    Registration(#[from] RegistrationError),

    #[error("scope '{0}' cannot be reset")]
    NotResettable(Scope),

    #[error("copy error: {0}")]
    Copy(#[from] CopyError),

    #[error("failed to write save data: {0}")]
    DiskWrite(#[source] SlotError),

    #[error("json error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// When a subscriber's data is written to disk.
#[derive(Default)]
pub enum Persist {
    #[default]
    Always,
    Never,
    /// Saved only while the predicate returns true.
    When(Box<dyn Fn() -> bool>),
}

impl Persist {
    pub fn allows(&self) -> bool {
        match self {
            Persist::Always => true,
            Persist::Never => false,
            Persist::When(predicate) => predicate(),
        }
    }
}

impl fmt::Debug for Persist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Persist::Always => f.write_str("Always"),
            Persist::Never => f.write_str("Never"),
            Persist::When(_) => f.write_str("When(..)"),
        }
    }
}

/// Per-subscriber registration options.
#[derive(Debug, Default)]
pub struct RegisterOptions {
    pub persist: Persist,
    pub backup: BackupOptions,
}

impl RegisterOptions {
    pub fn persist_when(mut self, predicate: impl Fn() -> bool + 'static) -> Self {
        self.persist = Persist::When(Box::new(predicate));
        self
    }

    pub fn never_persist(mut self) -> Self {
        self.persist = Persist::Never;
        self
    }

    /// Leave this subscriber out of the backup snapshot.
    pub fn skip_backup(mut self) -> Self {
        self.backup.skip = true;
        self
    }

    /// Include the persistent scope in the backup snapshot.
    pub fn backup_persistent(mut self) -> Self {
        self.backup.include_persistent = true;
        self
    }
}

/// Outcome of a load.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Subscribers whose data was merged from disk.
    pub loaded: Vec<String>,
    /// Top-level entries that were ignored.
    pub skipped: Vec<String>,
    /// True when the stored text could not be read or parsed.
    pub corrupt: bool,
}

pub(crate) struct Subscriber {
    pub(crate) data: SaveData,
    /// Clone of the tree taken at registration. Never mutated.
    pub(crate) defaults: Value,
    pub(crate) persist: Persist,
    pub(crate) backup: BackupOptions,
    pub(crate) backup_snapshot: Option<BTreeMap<Scope, JsonValue>>,
}

impl Subscriber {
    /// Whether the backup protocol currently covers this subscriber.
    pub(crate) fn backup_eligible(&self) -> bool {
        !self.backup.skip && self.persist.allows()
    }
}

/// Owns every registered subscriber and moves their data between memory and a save slot.
pub struct SaveDataManager<S: SaveSlot> {
    slot: S,
    pub(crate) subscribers: BTreeMap<String, Subscriber>,
    pub(crate) classes: ClassRegistry,
    in_run: bool,
    pub(crate) restore_backup_on_next_room: bool,
    pretty: bool,
}

impl<S: SaveSlot> SaveDataManager<S> {
    pub fn new(slot: S) -> Self {
        Self {
            slot,
            subscribers: BTreeMap::new(),
            classes: ClassRegistry::new(),
            in_run: false,
            restore_backup_on_next_room: false,
            pretty: false,
        }
    }

    /// Pretty-print the save document.
    pub fn with_pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn slot(&self) -> &S {
        &self.slot
    }

    pub fn classes(&self) -> &ClassRegistry {
        &self.classes
    }

    /// Register a subscriber with default options.
    pub fn register(&mut self, key: &str, data: &SaveData) -> Result<(), ManagerError> {
        self.register_with(key, data, RegisterOptions::default())
    }

    /// Register a subscriber. The tree's current contents become its defaults.
    pub fn register_with(
        &mut self,
        key: &str,
        data: &SaveData,
        options: RegisterOptions,
    ) -> Result<(), ManagerError> {
        if key.is_empty() {
            return Err(RegistrationError::InvalidKey.into());
        }
        if self.subscribers.contains_key(key) {
            return Err(RegistrationError::DuplicateKey(key.to_string()).into());
        }
        validate_tree(key, data)?;

        let defaults = deep_copy(&data.as_value(), key)?;
        let discovered = self.classes.discover(&data.as_value());

        let mut persist = options.persist;
        if data.is_room_only() {
            // Room data is never written, so there is nothing to save.
            persist = Persist::Never;
        }

        tracing::info!(
            "registered save data subscriber '{}' ({} new classes)",
            key,
            discovered
        );
        self.subscribers.insert(
            key.to_string(),
            Subscriber {
                data: data.clone(),
                defaults,
                persist,
                backup: options.backup,
                backup_snapshot: None,
            },
        );
        Ok(())
    }

    /// Remove a subscriber and return its live tree.
    pub fn unregister(&mut self, key: &str) -> Result<SaveData, ManagerError> {
        let subscriber = self
            .subscribers
            .remove(key)
            .ok_or_else(|| RegistrationError::NotRegistered(key.to_string()))?;
        tracing::info!("unregistered save data subscriber '{}'", key);
        Ok(subscriber.data)
    }

    /// Register classes that are not reachable from any tree at registration time,
    /// for example the values of an initially empty map.
    pub fn register_classes(&mut self, classes: impl IntoIterator<Item = Rc<Class>>) {
        for class in classes {
            self.classes.register(class);
        }
    }

    pub fn is_registered(&self, key: &str) -> bool {
        self.subscribers.contains_key(key)
    }

    /// Registered subscriber keys in sorted order.
    pub fn subscriber_keys(&self) -> Vec<&str> {
        self.subscribers.keys().map(String::as_str).collect()
    }

    pub fn log_subscribers(&self) {
        tracing::info!(
            "save data subscribers: {}",
            self.subscriber_keys().join(", ")
        );
    }

    /// Merge the stored document into every registered subscriber.
    ///
    /// Unreadable or unparseable text counts as an empty document. Entries for
    /// unknown subscribers or with a non-object value are skipped.
    pub fn load(&mut self) -> Result<LoadReport, ManagerError> {
        let mut report = LoadReport::default();
        let document = match self.read_document() {
            Ok(document) => document,
            Err(reason) => {
                tracing::warn!("save data is corrupt ({}); using defaults", reason);
                report.corrupt = true;
                JsonMap::new()
            }
        };

        for (key, entry) in &document {
            let Some(subscriber) = self.subscribers.get(key) else {
                tracing::debug!("skipping save data for unregistered subscriber '{}'", key);
                report.skipped.push(key.clone());
                continue;
            };
            let JsonValue::Object(scopes) = entry else {
                tracing::warn!("save data for subscriber '{}' is not an object; skipping", key);
                report.skipped.push(key.clone());
                continue;
            };

            match merge_scopes(key, subscriber, scopes, &self.classes) {
                Ok(()) => report.loaded.push(key.clone()),
                Err(CopyError::Malformed { path, reason }) => {
                    tracing::warn!("skipping malformed save data at '{}': {}", path, reason);
                    report.skipped.push(key.clone());
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            "loaded save data for {} subscriber(s), skipped {}",
            report.loaded.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    fn read_document(&self) -> Result<JsonMap<String, JsonValue>, String> {
        let text = match self.slot.read() {
            Ok(Some(text)) => text,
            Ok(None) => return Ok(JsonMap::new()),
            Err(e) => return Err(e.to_string()),
        };
        if text.trim().is_empty() {
            return Ok(JsonMap::new());
        }
        match serde_json::from_str::<JsonValue>(&text) {
            Ok(JsonValue::Object(document)) => Ok(document),
            Ok(_) => Err("top level is not an object".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Encode the persisted scopes of every eligible subscriber and write them to the slot.
    pub fn save(&mut self) -> Result<(), ManagerError> {
        let mut document = JsonMap::new();
        for (key, subscriber) in &self.subscribers {
            if !subscriber.persist.allows() {
                continue;
            }
            let mut scopes = JsonMap::new();
            for scope in Scope::PERSISTED {
                // Empty records carry nothing that defaults would not restore.
                if let Some(live) = subscriber.data.scope(scope)
                    && !live.borrow().is_empty()
                {
                    let encoded = serialize(&Value::Table(live), &child_path(key, scope))?;
                    scopes.insert(scope.as_str().to_string(), encoded);
                }
            }
            if !scopes.is_empty() {
                document.insert(key.clone(), JsonValue::Object(scopes));
            }
        }

        let document = JsonValue::Object(document);
        let text = if self.pretty {
            serde_json::to_string_pretty(&document)?
        } else {
            serde_json::to_string(&document)?
        };
        self.slot.write(&text).map_err(ManagerError::DiskWrite)?;
        tracing::info!("saved {} bytes of save data", text.len());
        Ok(())
    }

    pub fn force_load(&mut self) -> Result<LoadReport, ManagerError> {
        self.load()
    }

    pub fn force_save(&mut self) -> Result<(), ManagerError> {
        self.save()
    }

    /// Restore `scope` to its defaults for every subscriber, in place.
    pub fn reset_scope(&mut self, scope: Scope) -> Result<(), ManagerError> {
        if !scope.is_resettable() {
            return Err(ManagerError::NotResettable(scope));
        }
        for (key, subscriber) in &self.subscribers {
            reset_subscriber_scope(key, subscriber, scope)?;
        }
        tracing::debug!("reset {} data for {} subscriber(s)", scope, self.subscribers.len());
        Ok(())
    }

    /// Restore `scope` to its defaults for one subscriber.
    pub fn force_reset(&mut self, key: &str, scope: Scope) -> Result<(), ManagerError> {
        if !scope.is_resettable() {
            return Err(ManagerError::NotResettable(scope));
        }
        let subscriber = self
            .subscribers
            .get(key)
            .ok_or_else(|| RegistrationError::NotRegistered(key.to_string()))?;
        reset_subscriber_scope(key, subscriber, scope)
    }

    /// True while no run is in progress.
    pub fn in_menu(&self) -> bool {
        !self.in_run
    }

    /// A run began or was continued. Loads from disk once per run; a brand new
    /// run also starts its run, level and room data from defaults.
    pub fn run_started(&mut self, is_continued: bool) -> Result<(), ManagerError> {
        if self.in_run {
            return Ok(());
        }
        self.in_run = true;
        self.restore_backup_on_next_room = false;

        self.load()?;
        if !is_continued {
            self.reset_scope(Scope::Run)?;
            self.reset_scope(Scope::Level)?;
            self.reset_scope(Scope::Room)?;
        }
        tracing::info!(
            "run started ({})",
            if is_continued { "continued" } else { "new" }
        );
        Ok(())
    }

    /// The player reached a new level. The first floor is saved by the run start instead.
    pub fn new_level_entered(&mut self, on_first_floor: bool) -> Result<(), ManagerError> {
        self.reset_scope(Scope::Level)?;
        if !on_first_floor {
            self.save()?;
        }
        Ok(())
    }

    /// The player entered a new room: reset room data, then restore the backup
    /// if an undo is pending or take a fresh snapshot otherwise.
    pub fn new_room_entered(&mut self) -> Result<(), ManagerError> {
        self.reset_scope(Scope::Room)?;
        if self.restore_backup_on_next_room {
            self.restore_backup_on_next_room = false;
            self.restore_backup()
        } else {
            self.snapshot_backup()
        }
    }

    pub fn zone_entered(&mut self) -> Result<(), ManagerError> {
        self.new_room_entered()
    }

    /// The run ended. Saves before leaving the run state.
    pub fn run_exited(&mut self) -> Result<(), ManagerError> {
        let result = self.save();
        self.in_run = false;
        result
    }

    /// The undo action was used; the next room entry restores the backup.
    pub fn action_taken(&mut self) {
        self.restore_backup_on_next_room = true;
    }
}

fn validate_tree(key: &str, data: &SaveData) -> Result<(), RegistrationError> {
    let root = data.root().borrow();
    for (field, value) in &root.entries {
        let name = field.to_string();
        if field.as_str().and_then(Scope::from_name).is_none() {
            return Err(RegistrationError::UnknownField {
                key: key.to_string(),
                field: name,
            });
        }
        match value {
            Value::Table(table) if table.borrow().metatable.is_none() => {}
            _ => {
                return Err(RegistrationError::InvalidScope {
                    key: key.to_string(),
                    field: name,
                });
            }
        }
    }
    Ok(())
}

fn merge_scopes(
    key: &str,
    subscriber: &Subscriber,
    scopes: &JsonMap<String, JsonValue>,
    classes: &ClassRegistry,
) -> Result<(), CopyError> {
    for scope in Scope::PERSISTED {
        let Some(fragment) = scopes.get(scope.as_str()) else {
            continue;
        };
        let Some(live) = subscriber.data.scope(scope) else {
            continue;
        };
        merge(&Value::Table(live), fragment, &child_path(key, scope), classes)?;
    }
    Ok(())
}

fn reset_subscriber_scope(
    key: &str,
    subscriber: &Subscriber,
    scope: Scope,
) -> Result<(), ManagerError> {
    let Some(live) = subscriber.data.scope(scope) else {
        return Ok(());
    };
    let default_scope = match &subscriber.defaults {
        Value::Table(root) => root.borrow().get(scope.as_str()).cloned(),
        _ => None,
    };
    let Some(default_scope) = default_scope else {
        tracing::error!("subscriber '{}' has no default {} data to reset to", key, scope);
        return Ok(());
    };

    if let Value::Table(fresh) = deep_copy(&default_scope, &child_path(key, scope))? {
        let entries = std::mem::take(&mut fresh.borrow_mut().entries);
        live.borrow_mut().entries = entries;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::MemorySaveSlot;
    use hourglass_core::{Key, Table, Vector};
    use std::cell::Cell;

    struct FailingSlot;

    impl SaveSlot for FailingSlot {
        fn read(&self) -> Result<Option<String>, SlotError> {
            Err(SlotError::Io(std::io::Error::other("disk unplugged")))
        }

        fn write(&mut self, _contents: &str) -> Result<(), SlotError> {
            Err(SlotError::Io(std::io::Error::other("disk full")))
        }
    }

    fn int(data: &SaveData, scope: Scope, field: &str) -> Option<i64> {
        data.get(scope, field).and_then(|v| v.as_int())
    }

    fn all_scopes() -> SaveData {
        SaveData::new()
            .with_scope(Scope::Persistent, Table::new().with("wins", 0))
            .with_scope(Scope::Run, Table::new().with("hp", 10))
            .with_scope(Scope::Level, Table::new().with("keys", 1))
            .with_scope(Scope::Room, Table::new().with("visited", false))
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let data = all_scopes();
        manager.register("feature1", &data).unwrap();
        let err = manager.register("feature1", &data).unwrap_err();
        assert!(matches!(
            err,
            ManagerError::Registration(RegistrationError::DuplicateKey(ref k)) if k == "feature1"
        ));
    }

    #[test]
    fn registration_validates_tree_shape() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());

        assert!(matches!(
            manager.register("", &all_scopes()).unwrap_err(),
            ManagerError::Registration(RegistrationError::InvalidKey)
        ));

        let unknown = SaveData::new();
        unknown.root().borrow_mut().insert("floor", Table::new());
        assert!(matches!(
            manager.register("a", &unknown).unwrap_err(),
            ManagerError::Registration(RegistrationError::UnknownField { .. })
        ));

        let scalar_scope = SaveData::new();
        scalar_scope.root().borrow_mut().insert("run", 5);
        assert!(matches!(
            manager.register("b", &scalar_scope).unwrap_err(),
            ManagerError::Registration(RegistrationError::InvalidScope { .. })
        ));
        assert!(manager.subscriber_keys().is_empty());
    }

    #[test]
    fn unregister_removes_subscriber() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        manager.register("feature1", &all_scopes()).unwrap();
        manager.unregister("feature1").unwrap();
        assert!(!manager.is_registered("feature1"));
        assert!(matches!(
            manager.unregister("feature1").unwrap_err(),
            ManagerError::Registration(RegistrationError::NotRegistered(_))
        ));
    }

    #[test]
    fn reset_room_restores_only_room() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let data = all_scopes();
        manager.register("feature1", &data).unwrap();
        let room_before = data.scope(Scope::Room).unwrap();

        data.set(Scope::Run, "hp", 3);
        data.set(Scope::Level, "keys", 4);
        data.set(Scope::Room, "visited", true);
        manager.reset_scope(Scope::Room).unwrap();

        assert!(matches!(data.get(Scope::Room, "visited"), Some(Value::Bool(false))));
        assert_eq!(int(&data, Scope::Run, "hp"), Some(3));
        assert_eq!(int(&data, Scope::Level, "keys"), Some(4));
        assert!(Rc::ptr_eq(&room_before, &data.scope(Scope::Room).unwrap()));
    }

    #[test]
    fn reset_run_restores_default_hp() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let data = all_scopes();
        manager.register("feature1", &data).unwrap();
        data.set(Scope::Run, "hp", 3);
        data.set(Scope::Run, "extra", "added later");

        manager.reset_scope(Scope::Run).unwrap();
        assert_eq!(int(&data, Scope::Run, "hp"), Some(10));
        assert!(data.get(Scope::Run, "extra").is_none());
    }

    #[test]
    fn reset_does_not_touch_defaults() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let data = SaveData::new().with_scope(
            Scope::Run,
            Table::new().with("items", Value::array(vec![])),
        );
        manager.register("feature1", &data).unwrap();

        manager.reset_scope(Scope::Run).unwrap();
        if let Some(Value::Array(items)) = data.get(Scope::Run, "items") {
            items.borrow_mut().push(Value::Int(1));
        }
        manager.reset_scope(Scope::Run).unwrap();
        match data.get(Scope::Run, "items") {
            Some(Value::Array(items)) => assert!(items.borrow().is_empty()),
            other => panic!("expected array, got {:?}", other),
        }
    }

    #[test]
    fn persistent_scope_is_not_resettable() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        manager.register("feature1", &all_scopes()).unwrap();
        assert!(matches!(
            manager.reset_scope(Scope::Persistent).unwrap_err(),
            ManagerError::NotResettable(Scope::Persistent)
        ));
        assert!(matches!(
            manager.force_reset("feature1", Scope::Persistent).unwrap_err(),
            ManagerError::NotResettable(_)
        ));
    }

    #[test]
    fn force_reset_targets_one_subscriber() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let a = all_scopes();
        let b = all_scopes();
        manager.register("a", &a).unwrap();
        manager.register("b", &b).unwrap();
        a.set(Scope::Run, "hp", 1);
        b.set(Scope::Run, "hp", 2);

        manager.force_reset("a", Scope::Run).unwrap();
        assert_eq!(int(&a, Scope::Run, "hp"), Some(10));
        assert_eq!(int(&b, Scope::Run, "hp"), Some(2));
    }

    #[test]
    fn save_then_load_in_fresh_manager() {
        let slot = MemorySaveSlot::new();
        {
            let mut manager = SaveDataManager::new(slot.clone());
            let data = SaveData::new().with_scope(Scope::Run, Table::new().with("counter", 0));
            manager.register("feature1", &data).unwrap();
            data.set(Scope::Run, "counter", 5);
            manager.save().unwrap();
        }

        let mut manager = SaveDataManager::new(slot);
        let data = SaveData::new().with_scope(Scope::Run, Table::new().with("counter", 0));
        manager.register("feature1", &data).unwrap();
        let report = manager.load().unwrap();

        assert_eq!(report.loaded, vec!["feature1".to_string()]);
        assert!(!report.corrupt);
        assert_eq!(int(&data, Scope::Run, "counter"), Some(5));
    }

    #[test]
    fn save_omits_room_and_non_persisted_subscribers() {
        let slot = MemorySaveSlot::new();
        let mut manager = SaveDataManager::new(slot.clone());
        manager.register("all", &all_scopes()).unwrap();
        manager
            .register("room_only", &SaveData::new().with_scope(Scope::Room, Table::new()))
            .unwrap();
        manager
            .register_with(
                "muted",
                &SaveData::new().with_scope(Scope::Run, Table::new().with("x", 1)),
                RegisterOptions::default().never_persist(),
            )
            .unwrap();
        manager.save().unwrap();

        let saved: JsonValue = serde_json::from_str(&slot.contents().unwrap()).unwrap();
        let document = saved.as_object().unwrap();
        assert_eq!(document.keys().collect::<Vec<_>>(), vec!["all"]);
        let all = document["all"].as_object().unwrap();
        assert!(all.contains_key("persistent"));
        assert!(all.contains_key("run"));
        assert!(all.contains_key("level"));
        assert!(!all.contains_key("room"));
    }

    #[test]
    fn save_skips_empty_scope_records() {
        let slot = MemorySaveSlot::new();
        let mut manager = SaveDataManager::new(slot.clone());
        manager
            .register(
                "partial",
                &SaveData::new()
                    .with_scope(Scope::Run, Table::new())
                    .with_scope(Scope::Level, Table::new().with("keys", 1)),
            )
            .unwrap();
        manager
            .register("blank", &SaveData::new().with_scope(Scope::Run, Table::new()))
            .unwrap();
        manager.save().unwrap();

        let saved: JsonValue = serde_json::from_str(&slot.contents().unwrap()).unwrap();
        assert_eq!(saved, serde_json::json!({"partial": {"level": {"keys": 1}}}));
    }

    #[test]
    fn persist_predicate_is_checked_on_every_save() {
        let slot = MemorySaveSlot::new();
        let enabled = Rc::new(Cell::new(false));
        let flag = Rc::clone(&enabled);

        let mut manager = SaveDataManager::new(slot.clone());
        manager
            .register_with(
                "feature1",
                &SaveData::new().with_scope(Scope::Run, Table::new().with("x", 1)),
                RegisterOptions::default().persist_when(move || flag.get()),
            )
            .unwrap();

        manager.save().unwrap();
        assert_eq!(slot.contents().as_deref(), Some("{}"));
        enabled.set(true);
        manager.save().unwrap();
        assert!(slot.contents().unwrap().contains("feature1"));
    }

    #[test]
    fn corrupt_text_loads_as_defaults() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::with_contents("{not json"));
        let data = all_scopes();
        manager.register("feature1", &data).unwrap();
        let report = manager.load().unwrap();
        assert!(report.corrupt);
        assert_eq!(int(&data, Scope::Run, "hp"), Some(10));
    }

    #[test]
    fn read_failure_loads_as_defaults() {
        let mut manager = SaveDataManager::new(FailingSlot);
        manager.register("feature1", &all_scopes()).unwrap();
        assert!(manager.load().unwrap().corrupt);
    }

    #[test]
    fn empty_text_is_not_corrupt() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::with_contents("  \n"));
        assert!(!manager.load().unwrap().corrupt);
    }

    #[test]
    fn bad_entries_are_skipped() {
        let text = r#"{
            "ghost": {"run": {"hp": 1}},
            "feature1": 7,
            "feature2": {"run": {"hp": 2}},
            "feature3": {"run": []}
        }"#;
        let mut manager = SaveDataManager::new(MemorySaveSlot::with_contents(text));
        let one = all_scopes();
        let two = all_scopes();
        let three = all_scopes();
        manager.register("feature1", &one).unwrap();
        manager.register("feature2", &two).unwrap();
        manager.register("feature3", &three).unwrap();

        let report = manager.load().unwrap();
        assert_eq!(report.loaded, vec!["feature2".to_string()]);
        assert_eq!(
            report.skipped,
            vec!["feature1".to_string(), "feature3".to_string(), "ghost".to_string()]
        );
        assert_eq!(int(&one, Scope::Run, "hp"), Some(10));
        assert_eq!(int(&two, Scope::Run, "hp"), Some(2));
        assert_eq!(int(&three, Scope::Run, "hp"), Some(10));
    }

    #[test]
    fn load_ignores_room_fragments() {
        let text = r#"{"feature1": {"room": {"visited": true}, "level": {"keys": 3}}}"#;
        let mut manager = SaveDataManager::new(MemorySaveSlot::with_contents(text));
        let data = all_scopes();
        manager.register("feature1", &data).unwrap();
        manager.load().unwrap();
        assert!(matches!(data.get(Scope::Room, "visited"), Some(Value::Bool(false))));
        assert_eq!(int(&data, Scope::Level, "keys"), Some(3));
    }

    #[test]
    fn unknown_class_on_load_propagates() {
        let text = r#"{"feature1": {"run": {"t": {"__CLASS": "Ghost"}}}}"#;
        let mut manager = SaveDataManager::new(MemorySaveSlot::with_contents(text));
        manager.register("feature1", &all_scopes()).unwrap();
        assert!(matches!(
            manager.load().unwrap_err(),
            ManagerError::Copy(CopyError::UnknownClass { .. })
        ));
    }

    #[test]
    fn explicitly_registered_classes_decode() {
        fn pickup_fields() -> BTreeMap<Key, Value> {
            let mut fields = BTreeMap::new();
            fields.insert(Key::from("count"), Value::Int(0));
            fields
        }

        let text = r#"{"feature1": {"run": {"pickups": {"__MAP": "", "__OBJECT_WITH_NUMBER_KEYS": "",
            "5": {"__CLASS": "Pickup", "count": 2}}}}}"#;
        let mut manager = SaveDataManager::new(MemorySaveSlot::with_contents(text));
        let data = SaveData::new().with_scope(
            Scope::Run,
            Table::new().with("pickups", Value::map(BTreeMap::new())),
        );
        manager.register("feature1", &data).unwrap();
        manager.register_classes([Class::new("Pickup", pickup_fields)]);
        manager.load().unwrap();

        match data.get(Scope::Run, "pickups") {
            Some(Value::Map(map)) => match map.borrow().get(&Key::Int(5)) {
                Some(Value::Object(pickup)) => {
                    assert_eq!(pickup.borrow().get("count").and_then(Value::as_int), Some(2))
                }
                other => panic!("expected pickup, got {:?}", other),
            },
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn write_failure_propagates() {
        let mut manager = SaveDataManager::new(FailingSlot);
        manager.register("feature1", &all_scopes()).unwrap();
        assert!(matches!(
            manager.save().unwrap_err(),
            ManagerError::DiskWrite(SlotError::Io(_))
        ));
    }

    #[test]
    fn host_values_survive_save_and_load() {
        let slot = MemorySaveSlot::new();
        let data = SaveData::new().with_scope(
            Scope::Persistent,
            Table::new().with("spawn", Value::userdata(Vector::new(0.0, 0.0))),
        );
        let mut manager = SaveDataManager::new(slot.clone()).with_pretty(true);
        manager.register("feature1", &data).unwrap();
        data.set(Scope::Persistent, "spawn", Value::userdata(Vector::new(80.0, 160.0)));
        manager.save().unwrap();
        assert!(slot.contents().unwrap().contains('\n'));

        let fresh = SaveData::new().with_scope(
            Scope::Persistent,
            Table::new().with("spawn", Value::userdata(Vector::new(0.0, 0.0))),
        );
        let mut manager = SaveDataManager::new(slot);
        manager.register("feature1", &fresh).unwrap();
        manager.load().unwrap();
        let spawn = fresh.get(Scope::Persistent, "spawn").unwrap();
        assert_eq!(spawn.downcast_userdata::<Vector>(), Some(&Vector::new(80.0, 160.0)));
    }

    #[test]
    fn run_lifecycle_hooks() {
        let slot = MemorySaveSlot::new();
        let mut manager = SaveDataManager::new(slot.clone());
        let data = all_scopes();
        manager.register("feature1", &data).unwrap();
        assert!(manager.in_menu());

        manager.run_started(false).unwrap();
        assert!(!manager.in_menu());
        data.set(Scope::Run, "hp", 7);
        data.set(Scope::Level, "keys", 9);

        // A second start within the same run is ignored.
        manager.run_started(false).unwrap();
        assert_eq!(int(&data, Scope::Run, "hp"), Some(7));

        manager.new_level_entered(true).unwrap();
        assert_eq!(int(&data, Scope::Level, "keys"), Some(1));
        assert!(slot.contents().is_none());

        manager.new_level_entered(false).unwrap();
        assert!(slot.contents().is_some());

        manager.run_exited().unwrap();
        assert!(manager.in_menu());

        manager.run_started(true).unwrap();
        assert_eq!(int(&data, Scope::Run, "hp"), Some(7));
        manager.run_exited().unwrap();

        manager.run_started(false).unwrap();
        assert_eq!(int(&data, Scope::Run, "hp"), Some(10));
    }

    #[test]
    fn subscriber_keys_are_sorted() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        for key in ["zeta", "alpha", "mid"] {
            manager.register(key, &all_scopes()).unwrap();
        }
        assert_eq!(manager.subscriber_keys(), vec!["alpha", "mid", "zeta"]);
        manager.log_subscribers();
    }
}
