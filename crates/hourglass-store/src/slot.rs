// ABOUTME: Save slot abstraction for reading and writing the save document as text.
// ABOUTME: FileSaveSlot writes atomically via tmp file and rename; MemorySaveSlot keeps text in memory.

use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use thiserror::Error;

use crate::config::StoreConfig;

/// Errors that can occur while reading or writing a save slot.
#[derive(Debug, Error)]
pub enum SlotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the save document lives between sessions.
pub trait SaveSlot {
    /// Read the stored text. `None` means nothing has been saved yet.
    fn read(&self) -> Result<Option<String>, SlotError>;

    /// Replace the stored text.
    fn write(&mut self, contents: &str) -> Result<(), SlotError>;
}

/// A save slot backed by a single file.
#[derive(Debug, Clone)]
pub struct FileSaveSlot {
    path: PathBuf,
}

impl FileSaveSlot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self::new(config.save_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SaveSlot for FileSaveSlot {
    fn read(&self) -> Result<Option<String>, SlotError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write (write to .tmp, fsync, rename). Creates the parent directory if needed.
    fn write(&mut self, contents: &str) -> Result<(), SlotError> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let mut file = File::create(&tmp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path)?;
        tracing::debug!("wrote {} bytes to {}", contents.len(), self.path.display());
        Ok(())
    }
}

/// An in-memory save slot. Clones share the same buffer, which lets a test
/// hand the same slot to a second manager as if the process had restarted.
#[derive(Debug, Clone, Default)]
pub struct MemorySaveSlot {
    contents: Rc<RefCell<Option<String>>>,
}

impl MemorySaveSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: impl Into<String>) -> Self {
        Self {
            contents: Rc::new(RefCell::new(Some(contents.into()))),
        }
    }

    pub fn contents(&self) -> Option<String> {
        self.contents.borrow().clone()
    }
}

impl SaveSlot for MemorySaveSlot {
    fn read(&self) -> Result<Option<String>, SlotError> {
        Ok(self.contents.borrow().clone())
    }

    fn write(&mut self, contents: &str) -> Result<(), SlotError> {
        *self.contents.borrow_mut() = Some(contents.to_string());
        Ok(())
    }
}
