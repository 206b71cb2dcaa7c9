//! 16-bit cell storage shared by ROM, RAM and the Mega-CD memories.

use crate::MegaDriveError;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Memory made of 16-bit cells, each kept little-endian in the byte vector.
///
/// A word access reads the two bytes of a cell as a native `u16`; a byte
/// access at `offset` lands on `offset ^ 1`. Offsets wrap at the length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CellMemory {
    bytes: Vec<u8>,
}

fn alloc(len: usize) -> Result<Vec<u8>, MegaDriveError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| MegaDriveError::OutOfMemory(len))?;
    v.resize(len, 0);
    Ok(v)
}

/// Read a whole file, reporting allocation failure instead of aborting.
pub fn load_bytes(path: &Path) -> Result<Vec<u8>, MegaDriveError> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len() as usize;
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| MegaDriveError::OutOfMemory(len))?;
    file.read_to_end(&mut data)?;
    Ok(data)
}

impl CellMemory {
    /// Zero-filled memory; `len` is rounded up to whole cells
    pub fn zeroed(len: usize) -> Result<Self, MegaDriveError> {
        Ok(Self {
            bytes: alloc(len.saturating_add(len & 1))?,
        })
    }

    /// Import a big-endian image (ROM dump byte order)
    pub fn from_be_bytes(data: &[u8]) -> Result<Self, MegaDriveError> {
        let mut mem = Self::zeroed(data.len())?;
        for (i, b) in data.iter().enumerate() {
            mem.bytes[i ^ 1] = *b;
        }
        Ok(mem)
    }

    /// Export in big-endian byte order
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.bytes.len()];
        for (i, b) in self.bytes.iter().enumerate() {
            out[i ^ 1] = *b;
        }
        out
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn index(&self, offset: u32) -> usize {
        offset as usize % self.bytes.len()
    }

    pub fn read8(&self, offset: u32) -> u8 {
        if self.bytes.is_empty() {
            return 0;
        }
        self.bytes[self.index(offset) ^ 1]
    }

    pub fn read16(&self, offset: u32) -> u16 {
        if self.bytes.is_empty() {
            return 0;
        }
        let i = self.index(offset & !1);
        u16::from_le_bytes([self.bytes[i], self.bytes[i + 1]])
    }

    pub fn write8(&mut self, offset: u32, val: u8) {
        if self.bytes.is_empty() {
            return;
        }
        let i = self.index(offset) ^ 1;
        self.bytes[i] = val;
    }

    pub fn write16(&mut self, offset: u32, val: u16) {
        if self.bytes.is_empty() {
            return;
        }
        let i = self.index(offset & !1);
        self.bytes[i..i + 2].copy_from_slice(&val.to_le_bytes());
    }

    /// Raw cell bytes, as stored (save states)
    pub fn raw(&self) -> &[u8] {
        &self.bytes
    }

    pub fn raw_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn fill(&mut self, val: u8) {
        self.bytes.fill(val);
    }
}
