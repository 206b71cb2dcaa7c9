//! Save-state format.
//!
//! ```text
//! "MDST" version:u16 program_crc:u32 kind:u8
//! { id:u8 len:u32 body[len] }*
//! ```
//!
//! Chunk lengths are back-patched after the body is written. The reader
//! seeks to the end of every chunk, so unknown chunks and chunks that grew
//! trailing fields are skipped. All integers are little-endian.

use crate::context::CpuContext;
use crate::hardware::Hardware;
use crate::idle::{IdleDetector, PatchOverlay};
use crate::media::HardwareKind;
use crate::MegaDriveError;
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::state_stream::StateStream;
use std::io::SeekFrom;

const MAGIC: &[u8; 4] = b"MDST";
pub(crate) const STATE_VERSION: u16 = 1;
const HEADER_LEN: usize = 4 + 2 + 4 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Chunk {
    MainCpu = 1,
    WorkRam = 2,
    Devices = 3,
    Pico = 4,
    Sram = 5,
    Idle = 6,
    Frame = 7,
    SubCpu = 8,
    PrgRam = 9,
    WordRam = 10,
    BackupRam = 11,
    Gate = 12,
    RamCart = 13,
}

impl Chunk {
    const ALL: [Chunk; 13] = [
        Chunk::MainCpu,
        Chunk::WorkRam,
        Chunk::Devices,
        Chunk::Pico,
        Chunk::Sram,
        Chunk::Idle,
        Chunk::Frame,
        Chunk::SubCpu,
        Chunk::PrgRam,
        Chunk::WordRam,
        Chunk::BackupRam,
        Chunk::Gate,
        Chunk::RamCart,
    ];

    fn from_id(id: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|c| *c as u8 == id)
    }

    fn cd_only(self) -> bool {
        matches!(
            self,
            Chunk::SubCpu | Chunk::PrgRam | Chunk::WordRam | Chunk::BackupRam | Chunk::Gate
        )
    }
}

/// What the state driver needs from a running machine
pub(crate) struct StateView<'a> {
    pub kind: HardwareKind,
    pub program_crc: u32,
    pub hw: &'a mut Hardware,
    pub main: &'a mut CpuContext,
    pub sub: Option<&'a mut CpuContext>,
    pub detector: &'a mut IdleDetector,
    pub overlay: &'a mut PatchOverlay,
    pub frame: &'a mut u64,
}

impl StateView<'_> {
    /// Chunks this machine writes, in order
    fn chunks(&self) -> Vec<Chunk> {
        Chunk::ALL
            .into_iter()
            .filter(|&c| match c {
                _ if c.cd_only() => self.kind == HardwareKind::MegaCd,
                Chunk::Pico => self.kind == HardwareKind::Pico,
                Chunk::Sram => !self.hw.sram.is_empty(),
                Chunk::RamCart => !self.hw.ram_cart.is_empty(),
                _ => true,
            })
            .collect()
    }

    /// Chunks a state for this machine must carry
    fn required(&self) -> Vec<Chunk> {
        self.chunks()
            .into_iter()
            .filter(|c| *c != Chunk::RamCart)
            .collect()
    }
}

fn mismatch(msg: impl Into<String>) -> MegaDriveError {
    let msg = msg.into();
    log(LogCategory::SaveState, LogLevel::Warn, || msg.clone());
    MegaDriveError::StateMismatch(msg)
}

/// Raw memory body. Reading checks the stored length against ours first.
fn transfer_bytes(
    s: &mut StateStream,
    bytes: &mut [u8],
    stored: Option<usize>,
    what: &str,
) -> Result<(), MegaDriveError> {
    if let Some(len) = stored {
        if len != bytes.len() {
            return Err(mismatch(format!(
                "{} is {} bytes, state holds {}",
                what,
                bytes.len(),
                len
            )));
        }
    }
    s.transfer(bytes);
    Ok(())
}

fn transfer_idle(
    s: &mut StateStream,
    hw: &mut Hardware,
    detector: &mut IdleDetector,
    overlay: &mut PatchOverlay,
) {
    let (mut tag, mut frame, mut rejections) = detector.snapshot();
    s.transfer_u8(&mut tag);
    s.transfer_u64(&mut frame);
    s.transfer_u32(&mut rejections);

    let mut count = overlay.len() as u32;
    s.transfer_u32(&mut count);
    if !s.is_reading() {
        for (mut addr, mut original, mut patched) in overlay.iter() {
            s.transfer_u32(&mut addr);
            s.transfer_u16(&mut original);
            s.transfer_u16(&mut patched);
        }
        return;
    }

    detector.restore_snapshot(tag, frame, rejections);
    overlay.clear(&mut hw.rom);
    for _ in 0..count {
        let (mut addr, mut original, mut patched) = (0u32, 0u16, 0u16);
        s.transfer_u32(&mut addr);
        s.transfer_u16(&mut original);
        s.transfer_u16(&mut patched);
        if s.overrun() {
            break;
        }
        if hw.rom.read16(addr) != original {
            log(LogCategory::SaveState, LogLevel::Warn, || {
                format!("patch at {:06X} expects {:04X}, program differs", addr, original)
            });
            continue;
        }
        overlay.apply(&mut hw.rom, addr, patched);
    }
}

fn transfer_chunk(
    view: &mut StateView,
    chunk: Chunk,
    s: &mut StateStream,
    stored: Option<usize>,
) -> Result<(), MegaDriveError> {
    match chunk {
        Chunk::MainCpu => view.main.transfer_state(s),
        Chunk::WorkRam => transfer_bytes(s, view.hw.ram.raw_mut(), stored, "work RAM")?,
        Chunk::Devices => view.hw.transfer_devices(s),
        Chunk::Pico => view.hw.pico.transfer_state(s),
        Chunk::Sram => {
            s.transfer_bool(&mut view.hw.sram_dirty);
            transfer_bytes(s, &mut view.hw.sram, stored.map(|n| n.saturating_sub(1)), "SRAM")?
        }
        Chunk::Idle => transfer_idle(s, view.hw, view.detector, view.overlay),
        Chunk::Frame => {
            s.transfer_u64(view.frame);
        }
        Chunk::SubCpu => {
            if let Some(sub) = view.sub.as_deref_mut() {
                sub.transfer_state(s);
            }
        }
        Chunk::PrgRam => transfer_bytes(s, view.hw.prg_ram.raw_mut(), stored, "PRG-RAM")?,
        Chunk::WordRam => transfer_bytes(s, view.hw.word_ram.raw_mut(), stored, "Word RAM")?,
        Chunk::BackupRam => transfer_bytes(s, &mut view.hw.backup_ram, stored, "backup RAM")?,
        Chunk::Gate => view.hw.gate.transfer_state(s),
        Chunk::RamCart => {
            if stored.is_some_and(|len| len != view.hw.ram_cart.len()) {
                log(LogCategory::SaveState, LogLevel::Warn, || {
                    "RAM cartridge size differs, keeping current contents".to_string()
                });
                return Ok(());
            }
            s.transfer(&mut view.hw.ram_cart);
        }
    }
    Ok(())
}

/// Probe or write a full state. The idle patches are lifted while the
/// machine is captured.
pub(crate) fn save(view: &mut StateView, s: &mut StateStream) -> Result<(), MegaDriveError> {
    view.overlay.suspend(&mut view.hw.rom);
    let result = save_chunks(view, s);
    view.overlay.resume(&mut view.hw.rom);
    result?;
    if s.overrun() {
        return Err(mismatch("state buffer too small"));
    }
    Ok(())
}

fn save_chunks(view: &mut StateView, s: &mut StateStream) -> Result<(), MegaDriveError> {
    let mut magic = *MAGIC;
    let mut version = STATE_VERSION;
    let mut crc = view.program_crc;
    let mut kind = view.kind.tag();
    s.transfer(&mut magic);
    s.transfer_u16(&mut version);
    s.transfer_u32(&mut crc);
    s.transfer_u8(&mut kind);

    for chunk in view.chunks() {
        let mut id = chunk as u8;
        s.transfer_u8(&mut id);
        let len_at = s.position();
        let mut len = 0u32;
        s.transfer_u32(&mut len);
        transfer_chunk(view, chunk, s, None)?;
        let end = s.position();
        len = (end - len_at - 4) as u32;
        s.seek(SeekFrom::Start(len_at as u64));
        s.transfer_u32(&mut len);
        s.seek(SeekFrom::Start(end as u64));
    }
    Ok(())
}

/// Check magic, version, program and machine kind without touching the machine.
pub(crate) fn check_header(
    data: &[u8],
    kind: HardwareKind,
    program_crc: u32,
) -> Result<(), MegaDriveError> {
    if data.len() < HEADER_LEN {
        return Err(mismatch(format!("state is only {} bytes", data.len())));
    }
    if &data[..4] != MAGIC {
        return Err(mismatch("bad magic"));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != STATE_VERSION {
        return Err(mismatch(format!("unsupported version {}", version)));
    }
    let crc = u32::from_le_bytes([data[6], data[7], data[8], data[9]]);
    if crc != program_crc {
        return Err(mismatch(format!(
            "state belongs to program {:08X}, loaded is {:08X}",
            crc, program_crc
        )));
    }
    if data[10] != kind.tag() {
        return Err(mismatch(format!("state is for hardware kind {}", data[10])));
    }
    Ok(())
}

/// Restore a state checked with `check_header`.
pub(crate) fn load(view: &mut StateView, s: &mut StateStream) -> Result<(), MegaDriveError> {
    s.seek(SeekFrom::Start(HEADER_LEN as u64));
    let mut seen: Vec<Chunk> = Vec::new();

    while !s.is_eof() {
        let mut id = 0u8;
        let mut len = 0u32;
        s.transfer_u8(&mut id);
        s.transfer_u32(&mut len);
        if s.overrun() {
            return Err(mismatch("truncated chunk header"));
        }
        let start = s.position();
        let end = start + len as usize;
        if end > s.capacity() {
            return Err(mismatch(format!("chunk {} runs past the end", id)));
        }

        match Chunk::from_id(id) {
            Some(chunk) if view.chunks().contains(&chunk) || chunk == Chunk::RamCart => {
                transfer_chunk(view, chunk, s, Some(len as usize))?;
                if s.position() > end || s.overrun() {
                    return Err(mismatch(format!("chunk {:?} is shorter than its fields", chunk)));
                }
                seen.push(chunk);
            }
            Some(chunk) => {
                return Err(mismatch(format!("chunk {:?} does not fit this machine", chunk)));
            }
            None => log(LogCategory::SaveState, LogLevel::Debug, || {
                format!("skipping unknown chunk {} ({} bytes)", id, len)
            }),
        }
        s.seek(SeekFrom::Start(end as u64));
    }

    if let Some(missing) = view.required().into_iter().find(|c| !seen.contains(c)) {
        return Err(mismatch(format!("chunk {:?} missing", missing)));
    }
    log(LogCategory::SaveState, LogLevel::Info, || {
        format!("state restored at frame {}", view.frame)
    });
    Ok(())
}
