//! Cursor over a fixed-capacity save-state buffer.
//!
//! One serialization routine drives all three modes:
//!
//! - **Probe**: nothing is stored, the capacity follows the furthest byte touched,
//!   which yields the buffer size a later write needs.
//! - **Write**: bytes go into a caller buffer; transfers past its end are clamped.
//! - **Read**: bytes come out of a caller buffer; transfers past its end are clamped.
//!
//! Clamped transfers return the short count, log under `SaveState` and latch
//! [`StateStream::overrun`] so the driver can reject the state as a whole.

use crate::logging::{log, LogCategory, LogLevel};
use std::io::SeekFrom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Probe,
    Write,
    Read,
}

enum Backing<'a> {
    Probe,
    Out(&'a mut [u8]),
    In(&'a [u8]),
}

pub struct StateStream<'a> {
    backing: Backing<'a>,
    pos: usize,
    capacity: usize,
    overrun: bool,
}

impl<'a> StateStream<'a> {
    pub fn probe() -> Self {
        Self {
            backing: Backing::Probe,
            pos: 0,
            capacity: 0,
            overrun: false,
        }
    }

    pub fn writer(buf: &'a mut [u8]) -> Self {
        let capacity = buf.len();
        Self {
            backing: Backing::Out(buf),
            pos: 0,
            capacity,
            overrun: false,
        }
    }

    pub fn reader(buf: &'a [u8]) -> Self {
        Self {
            capacity: buf.len(),
            backing: Backing::In(buf),
            pos: 0,
            overrun: false,
        }
    }

    pub fn mode(&self) -> StreamMode {
        match self.backing {
            Backing::Probe => StreamMode::Probe,
            Backing::Out(_) => StreamMode::Write,
            Backing::In(_) => StreamMode::Read,
        }
    }

    pub fn is_reading(&self) -> bool {
        self.mode() == StreamMode::Read
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Buffer size, or the high-water mark while probing
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.capacity
    }

    /// True once any transfer was clamped
    pub fn overrun(&self) -> bool {
        self.overrun
    }

    fn clamp(&mut self, requested: usize, what: &str) -> usize {
        let available = self.capacity.saturating_sub(self.pos);
        if requested > available {
            self.overrun = true;
            let pos = self.pos;
            let capacity = self.capacity;
            log(LogCategory::SaveState, LogLevel::Error, || {
                format!(
                    "{} of {} bytes at {} overruns buffer of {} bytes",
                    what, requested, pos, capacity
                )
            });
            available
        } else {
            requested
        }
    }

    fn advance_probe(&mut self, n: usize) -> usize {
        self.pos += n;
        self.capacity = self.capacity.max(self.pos);
        n
    }

    /// Store `data` at the cursor. Reading streams refuse writes.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if let Backing::Probe = self.backing {
            return self.advance_probe(data.len());
        }
        if self.is_reading() {
            log(LogCategory::SaveState, LogLevel::Error, || {
                "write on a reading state stream".to_string()
            });
            self.overrun = true;
            return 0;
        }
        let n = self.clamp(data.len(), "write");
        let pos = self.pos;
        if let Backing::Out(buf) = &mut self.backing {
            buf[pos..pos + n].copy_from_slice(&data[..n]);
        }
        self.pos += n;
        n
    }

    /// Fill `out` from the cursor. Only reading streams carry data.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        if let Backing::Probe = self.backing {
            return self.advance_probe(out.len());
        }
        let n = self.clamp(out.len(), "read");
        match &self.backing {
            Backing::In(buf) => out[..n].copy_from_slice(&buf[self.pos..self.pos + n]),
            Backing::Out(buf) => out[..n].copy_from_slice(&buf[self.pos..self.pos + n]),
            Backing::Probe => {}
        }
        self.pos += n;
        n
    }

    /// Move the cursor forward without transferring
    pub fn skip(&mut self, n: usize) -> usize {
        if let Backing::Probe = self.backing {
            return self.advance_probe(n);
        }
        let n = self.clamp(n, "skip");
        self.pos += n;
        n
    }

    /// Reposition the cursor, returning the new position.
    ///
    /// Targets are clamped to `0..=capacity`; a probe stream may extend its capacity.
    pub fn seek(&mut self, target: SeekFrom) -> usize {
        let base: i128 = match target {
            SeekFrom::Start(off) => off as i128,
            SeekFrom::Current(delta) => self.pos as i128 + delta as i128,
            SeekFrom::End(delta) => self.capacity as i128 + delta as i128,
        };
        let mut new_pos = base.max(0) as usize;
        if let Backing::Probe = self.backing {
            self.capacity = self.capacity.max(new_pos);
        } else if new_pos > self.capacity {
            let capacity = self.capacity;
            log(LogCategory::SaveState, LogLevel::Warn, || {
                format!("seek to {} clamped to {}", new_pos, capacity)
            });
            new_pos = self.capacity;
        }
        self.pos = new_pos;
        new_pos
    }

    /// Read into `data` when reading, otherwise write it out.
    pub fn transfer(&mut self, data: &mut [u8]) -> usize {
        if self.is_reading() {
            self.read(data)
        } else {
            self.write(data)
        }
    }

    pub fn transfer_u8(&mut self, v: &mut u8) -> usize {
        let mut b = [*v];
        let n = self.transfer(&mut b);
        if self.is_reading() && n == 1 {
            *v = b[0];
        }
        n
    }

    pub fn transfer_bool(&mut self, v: &mut bool) -> usize {
        let mut b = *v as u8;
        let n = self.transfer_u8(&mut b);
        *v = b != 0;
        n
    }

    pub fn transfer_u16(&mut self, v: &mut u16) -> usize {
        let mut b = v.to_le_bytes();
        let n = self.transfer(&mut b);
        if self.is_reading() && n == b.len() {
            *v = u16::from_le_bytes(b);
        }
        n
    }

    pub fn transfer_u32(&mut self, v: &mut u32) -> usize {
        let mut b = v.to_le_bytes();
        let n = self.transfer(&mut b);
        if self.is_reading() && n == b.len() {
            *v = u32::from_le_bytes(b);
        }
        n
    }

    pub fn transfer_u64(&mut self, v: &mut u64) -> usize {
        let mut b = v.to_le_bytes();
        let n = self.transfer(&mut b);
        if self.is_reading() && n == b.len() {
            *v = u64::from_le_bytes(b);
        }
        n
    }
}
