// ABOUTME: Persistence layer for hourglass, managing feature save data across runs, levels and rooms.
// ABOUTME: Provides the subscriber manager, save slots, environment config and backup/restore.

pub mod backup;
pub mod config;
pub mod manager;
pub mod save_data;
pub mod slot;

pub use backup::BackupOptions;
pub use config::{ConfigError, StoreConfig};
pub use manager::{
    LoadReport, ManagerError, Persist, RegisterOptions, RegistrationError, SaveDataManager,
};
pub use save_data::{SaveData, Scope};
pub use slot::{FileSaveSlot, MemorySaveSlot, SaveSlot, SlotError};
