// ABOUTME: Single-step backup of run and level data, restored when the host's undo action fires.
// ABOUTME: Snapshots are stored encoded per subscriber and merged back over the live scopes.

use std::collections::BTreeMap;

use hourglass_core::{Value, child_path, merge, serialize};

use crate::manager::{ManagerError, SaveDataManager};
use crate::save_data::Scope;
use crate::slot::SaveSlot;

/// Per-subscriber backup behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupOptions {
    /// Leave the subscriber out of snapshots entirely.
    pub skip: bool,
    /// Snapshot the persistent scope as well as run and level.
    pub include_persistent: bool,
}

impl BackupOptions {
    pub fn scopes(&self) -> &'static [Scope] {
        if self.include_persistent {
            &[Scope::Persistent, Scope::Run, Scope::Level]
        } else {
            &[Scope::Run, Scope::Level]
        }
    }
}

impl<S: SaveSlot> SaveDataManager<S> {
    /// Replace every eligible subscriber's backup with its current data.
    pub fn snapshot_backup(&mut self) -> Result<(), ManagerError> {
        let mut count = 0;
        for (key, subscriber) in self.subscribers.iter_mut() {
            if !subscriber.backup_eligible() {
                subscriber.backup_snapshot = None;
                continue;
            }
            let mut snapshot = BTreeMap::new();
            for &scope in subscriber.backup.scopes() {
                if let Some(live) = subscriber.data.scope(scope) {
                    let encoded = serialize(&Value::Table(live), &child_path(key, scope))?;
                    snapshot.insert(scope, encoded);
                }
            }
            subscriber.backup_snapshot = Some(snapshot);
            count += 1;
        }
        tracing::debug!("took backup snapshot of {} subscriber(s)", count);
        Ok(())
    }

    /// Merge every stored backup back over the live scopes.
    pub fn restore_backup(&mut self) -> Result<(), ManagerError> {
        let mut count = 0;
        for (key, subscriber) in &self.subscribers {
            if !subscriber.backup_eligible() {
                continue;
            }
            let Some(snapshot) = &subscriber.backup_snapshot else {
                continue;
            };
            for (scope, encoded) in snapshot {
                if let Some(live) = subscriber.data.scope(*scope) {
                    merge(
                        &Value::Table(live),
                        encoded,
                        &child_path(key, scope),
                        &self.classes,
                    )?;
                }
            }
            count += 1;
        }
        tracing::info!("restored backup for {} subscriber(s)", count);
        Ok(())
    }

    /// True when the next room entry will restore the backup.
    pub fn restore_pending(&self) -> bool {
        self.restore_backup_on_next_room
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::RegisterOptions;
    use crate::save_data::SaveData;
    use crate::slot::MemorySaveSlot;
    use hourglass_core::Table;
    use std::cell::Cell;
    use std::rc::Rc;

    fn hp(data: &SaveData, scope: Scope) -> Option<i64> {
        data.get(scope, "hp").and_then(|v| v.as_int())
    }

    #[test]
    fn undo_restores_previous_room_state() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let data = SaveData::new().with_scope(Scope::Run, Table::new().with("hp", 10));
        manager.register("feature1", &data).unwrap();
        let run_table = data.scope(Scope::Run).unwrap();

        manager.snapshot_backup().unwrap();
        data.set(Scope::Run, "hp", 3);

        manager.action_taken();
        assert!(manager.restore_pending());
        manager.new_room_entered().unwrap();

        assert_eq!(hp(&data, Scope::Run), Some(10));
        assert!(!manager.restore_pending());
        assert!(Rc::ptr_eq(&run_table, &data.scope(Scope::Run).unwrap()));
    }

    #[test]
    fn room_entry_without_undo_takes_new_snapshot() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let data = SaveData::new().with_scope(Scope::Run, Table::new().with("hp", 10));
        manager.register("feature1", &data).unwrap();

        manager.new_room_entered().unwrap();
        data.set(Scope::Run, "hp", 6);
        manager.new_room_entered().unwrap();
        data.set(Scope::Run, "hp", 1);

        manager.action_taken();
        manager.new_room_entered().unwrap();
        assert_eq!(hp(&data, Scope::Run), Some(6));
    }

    #[test]
    fn persistent_scope_only_backed_up_when_opted_in() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let plain = SaveData::new()
            .with_scope(Scope::Persistent, Table::new().with("hp", 10))
            .with_scope(Scope::Run, Table::new());
        let opted = SaveData::new()
            .with_scope(Scope::Persistent, Table::new().with("hp", 10))
            .with_scope(Scope::Run, Table::new());
        manager.register("plain", &plain).unwrap();
        manager
            .register_with("opted", &opted, RegisterOptions::default().backup_persistent())
            .unwrap();

        manager.snapshot_backup().unwrap();
        plain.set(Scope::Persistent, "hp", 1);
        opted.set(Scope::Persistent, "hp", 1);
        manager.restore_backup().unwrap();

        assert_eq!(hp(&plain, Scope::Persistent), Some(1));
        assert_eq!(hp(&opted, Scope::Persistent), Some(10));
    }

    #[test]
    fn skipped_and_non_persisted_subscribers_are_not_backed_up() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let skipped = SaveData::new().with_scope(Scope::Run, Table::new().with("hp", 10));
        let muted = SaveData::new().with_scope(Scope::Run, Table::new().with("hp", 10));
        manager
            .register_with("skipped", &skipped, RegisterOptions::default().skip_backup())
            .unwrap();
        manager
            .register_with("muted", &muted, RegisterOptions::default().never_persist())
            .unwrap();

        manager.snapshot_backup().unwrap();
        skipped.set(Scope::Run, "hp", 2);
        muted.set(Scope::Run, "hp", 2);
        manager.restore_backup().unwrap();

        assert_eq!(hp(&skipped, Scope::Run), Some(2));
        assert_eq!(hp(&muted, Scope::Run), Some(2));
    }

    #[test]
    fn undo_never_rewinds_past_a_skipped_snapshot() {
        let enabled = Rc::new(Cell::new(true));
        let flag = Rc::clone(&enabled);
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let data = SaveData::new().with_scope(Scope::Run, Table::new().with("hp", 10));
        manager
            .register_with(
                "feature1",
                &data,
                RegisterOptions::default().persist_when(move || flag.get()),
            )
            .unwrap();

        manager.new_room_entered().unwrap();
        data.set(Scope::Run, "hp", 7);
        enabled.set(false);
        manager.new_room_entered().unwrap();
        data.set(Scope::Run, "hp", 3);

        manager.action_taken();
        manager.new_room_entered().unwrap();
        assert_eq!(hp(&data, Scope::Run), Some(3));

        enabled.set(true);
        manager.restore_backup().unwrap();
        assert_eq!(hp(&data, Scope::Run), Some(3));
    }

    #[test]
    fn restore_skips_subscriber_whose_predicate_turned_false() {
        let enabled = Rc::new(Cell::new(true));
        let flag = Rc::clone(&enabled);
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        let data = SaveData::new().with_scope(Scope::Run, Table::new().with("hp", 10));
        manager
            .register_with(
                "feature1",
                &data,
                RegisterOptions::default().persist_when(move || flag.get()),
            )
            .unwrap();

        manager.snapshot_backup().unwrap();
        data.set(Scope::Run, "hp", 4);
        enabled.set(false);
        manager.restore_backup().unwrap();
        assert_eq!(hp(&data, Scope::Run), Some(4));
    }

    #[test]
    fn new_run_clears_pending_restore() {
        let mut manager = SaveDataManager::new(MemorySaveSlot::new());
        manager.action_taken();
        manager.run_started(false).unwrap();
        assert!(!manager.restore_pending());
    }
}
