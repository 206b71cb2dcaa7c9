//! Multi-disc collection for titles shipped on several CDs.

use crate::media::{classify, MediaError, MediaImage};
use emu_core::logging::{log, LogCategory, LogLevel};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAX_DISKS: usize = 8;

#[derive(Error, Debug)]
pub enum DiskError {
    #[error("Disc index {index} out of range ({count} slots)")]
    IndexOutOfRange { index: usize, count: usize },
    #[error("All {MAX_DISKS} disc slots are in use")]
    Full,
    #[error("{0} is not a CD image")]
    NotACd(PathBuf),
    #[error(transparent)]
    Media(#[from] MediaError),
}

/// Disc slots plus the tray state. Slot contents are paths; a slot may be
/// empty after `replace(i, None)`.
#[derive(Debug, Clone, Default)]
pub struct DiskSlots {
    slots: Vec<Option<PathBuf>>,
    current: usize,
    ejected: bool,
}

impl DiskSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start over with a single loaded disc
    pub fn reset_with(&mut self, path: &Path) {
        self.slots = vec![Some(path.to_path_buf())];
        self.current = 0;
        self.ejected = false;
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn count(&self) -> usize {
        self.slots.len()
    }

    pub fn index(&self) -> usize {
        self.current
    }

    pub fn path(&self, index: usize) -> Option<&Path> {
        self.slots.get(index).and_then(|s| s.as_deref())
    }

    pub fn is_ejected(&self) -> bool {
        self.ejected
    }

    pub fn set_ejected(&mut self, ejected: bool) {
        if ejected != self.ejected {
            log(LogCategory::Media, LogLevel::Info, || {
                format!("cd tray {}", if ejected { "open" } else { "close" })
            });
        }
        self.ejected = ejected;
    }

    /// Append an empty slot, returning its index
    pub fn add(&mut self) -> Result<usize, DiskError> {
        if self.slots.len() >= MAX_DISKS {
            return Err(DiskError::Full);
        }
        self.slots.push(None);
        Ok(self.slots.len() - 1)
    }

    /// Put `path` in slot `index`, or empty it with `None`. Slots up to
    /// `index` are created as needed.
    pub fn replace(&mut self, index: usize, path: Option<PathBuf>) -> Result<(), DiskError> {
        if index >= MAX_DISKS {
            return Err(DiskError::IndexOutOfRange {
                index,
                count: self.slots.len(),
            });
        }
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = path;
        Ok(())
    }

    /// Make `index` the active slot.
    ///
    /// Returns the classified image to insert, or `None` for an empty
    /// slot (tray open, no disc). Indices past the last slot but below
    /// `MAX_DISKS` also count as empty.
    pub fn select(&mut self, index: usize) -> Result<Option<MediaImage>, DiskError> {
        if index >= MAX_DISKS {
            return Err(DiskError::IndexOutOfRange {
                index,
                count: self.slots.len(),
            });
        }
        let image = match self.path(index) {
            None => None,
            Some(path) => {
                let image = classify(path)?;
                if !image.is_cd() {
                    return Err(DiskError::NotACd(path.to_path_buf()));
                }
                Some(image)
            }
        };
        self.current = index;
        log(LogCategory::Media, LogLevel::Info, || {
            format!("disc index {} selected", index)
        });
        Ok(image)
    }
}
