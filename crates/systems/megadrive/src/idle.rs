//! Spin-loop detection and patching.
//!
//! During a warm-up window the main CPU reports every taken backward short
//! branch. Loops whose body is a side-effect free poll of memory are kept as
//! candidates; when the window closes their branches are rewritten to the
//! idle-branch encodings, which behave identically but end the CPU's time
//! slice when taken.

use crate::memory::CellMemory;
use emu_core::logging::{log, LogCategory, LogLevel};
use std::collections::BTreeMap;

/// Frames of instrumented execution before candidates are patched
pub const IDLE_WARMUP_FRAMES: u64 = 360;
/// Rejected proposals tolerated before the detector gives up
pub const MAX_REJECTIONS: u32 = 128;

/// Whether `body` (the words between the branch target and the branch)
/// only polls memory. `body` must hold the whole loop body; its byte length
/// selects the catalog entry.
pub fn is_idle_code(body: &[u16]) -> bool {
    let w = |i: usize| body.get(i).copied().unwrap_or(0);
    let op = w(0);
    // absolute long operands must point into work RAM
    let in_ram = |i: usize| w(i) & 0xE0 == 0xE0;
    match body.len() * 2 {
        2 => op & 0xF000 != 0x6000,
        4 => {
            op & 0xFFF8 == 0x4A10 // tst.b (aN)
                || op & 0xFFF8 == 0x4A28 // tst.b (d16,aN)
                || op & 0xFF3F == 0x4A38 // tst.x / tas (abs.w)
                || op & 0xC1FF == 0x0038 // move.x (abs.w),dN
                || op & 0xF13F == 0xB038 // cmp.x (abs.w),dN
        }
        6 => {
            (in_ram(1)
                && (op == 0x4A39
                    || op == 0x4A79
                    || op == 0x4AB9
                    || op & 0xC1FF == 0x0039
                    || op & 0xF13F == 0xB039))
                || op == 0x0838 // btst #n,(abs.w)
                || op & 0xFFBF == 0x0C38 // cmpi.{b,w} #n,(abs.w)
        }
        8 => {
            (in_ram(2) && (op == 0x0839 || op & 0xFFBF == 0x0C39)) || op == 0x0CB8 // cmpi.l #n,(abs.w)
        }
        12 => {
            op & 0xF1F8 == 0x3010 // move.w (aN),dN
                && w(1) & 0xF100 == 0
                && w(3) & 0xF100 == 0
        }
        _ => false,
    }
}

/// Idle-branch encoding of a short `BNE`, `BEQ` or `BRA`
fn idle_encoding(op: u16) -> Option<u16> {
    let disp = op & 0x00FF;
    match op & 0xFF00 {
        0x6600 => Some(0x7100 | disp),
        0x6700 => Some(0x7500 | disp),
        0x6000 => Some(0x7D00 | disp),
        _ => None,
    }
}

pub fn is_idle_branch(op: u16) -> bool {
    matches!(op & 0xFD00, 0x7100 | 0x7500 | 0x7D00)
}

/// A loop seen during the warm-up window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleCandidate {
    /// Address of the branch closing the loop
    pub pc: u32,
    /// Loop body words as observed
    pub body: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proposal {
    Accepted,
    Duplicate,
    /// Body did not match the catalog
    NotIdle,
    /// Outside the loaded program
    Rejected,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Armed { until: u64 },
    Finished,
    Disabled,
}

#[derive(Debug, Clone)]
pub struct IdleDetector {
    state: DetectorState,
    candidates: Vec<IdleCandidate>,
    rejections: u32,
    program_size: u32,
}

impl Default for IdleDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl IdleDetector {
    pub fn new() -> Self {
        Self {
            state: DetectorState::Idle,
            candidates: Vec::new(),
            rejections: 0,
            program_size: 0,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, DetectorState::Armed { .. })
    }

    pub fn candidates(&self) -> &[IdleCandidate] {
        &self.candidates
    }

    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    /// Start a warm-up window at `frame` for a program of `program_size` bytes.
    pub fn arm(&mut self, frame: u64, program_size: usize) {
        self.candidates.clear();
        self.rejections = 0;
        self.program_size = program_size.min(u32::MAX as usize) as u32;
        self.state = DetectorState::Armed {
            until: frame + IDLE_WARMUP_FRAMES,
        };
        log(LogCategory::IdleLoop, LogLevel::Debug, || {
            format!("idle detection armed until frame {}", frame + IDLE_WARMUP_FRAMES)
        });
    }

    pub fn propose(&mut self, candidate: IdleCandidate) -> Proposal {
        if !self.is_armed() {
            return Proposal::Disabled;
        }
        if !is_idle_code(&candidate.body) {
            return Proposal::NotIdle;
        }
        if candidate.pc >= self.program_size {
            self.rejections += 1;
            log(LogCategory::IdleLoop, LogLevel::Debug, || {
                format!("idle: {:06X} outside program, rejected", candidate.pc)
            });
            if self.rejections > MAX_REJECTIONS {
                log(LogCategory::IdleLoop, LogLevel::Warn, || {
                    format!("idle: {} rejections, detector disabled", self.rejections)
                });
                self.state = DetectorState::Disabled;
                self.candidates.clear();
                return Proposal::Disabled;
            }
            return Proposal::Rejected;
        }
        if self.candidates.iter().any(|c| c.pc == candidate.pc) {
            return Proposal::Duplicate;
        }
        log(LogCategory::IdleLoop, LogLevel::Debug, || {
            format!(
                "idle: candidate {:06X} body {:04X?}",
                candidate.pc, candidate.body
            )
        });
        self.candidates.push(candidate);
        Proposal::Accepted
    }

    /// True once the warm-up window for an armed detector has run out
    pub fn frame_tick(&self, frame: u64) -> bool {
        matches!(self.state, DetectorState::Armed { until } if frame >= until)
    }

    /// Leave instrumented mode and patch the candidates' branches into
    /// `program`, recording each patch in `overlay`. Returns the number of
    /// branches patched.
    pub fn finish(&mut self, program: &mut CellMemory, overlay: &mut PatchOverlay) -> usize {
        if !self.is_armed() {
            return 0;
        }
        self.state = DetectorState::Finished;
        let mut patched = 0;
        for c in self.candidates.drain(..) {
            let op = program.read16(c.pc);
            if is_idle_branch(op) {
                continue;
            }
            match idle_encoding(op) {
                Some(new_op) => {
                    if overlay.apply(program, c.pc, new_op) {
                        patched += 1;
                    }
                }
                None => log(LogCategory::IdleLoop, LogLevel::Warn, || {
                    format!("idle: don't know how to patch {:04X} at {:06X}", op, c.pc)
                }),
            }
        }
        log(LogCategory::IdleLoop, LogLevel::Info, || {
            format!("idle: {} loops patched", patched)
        });
        patched
    }

    /// Saved detector state: `(state tag, frame, rejections)`
    pub(crate) fn snapshot(&self) -> (u8, u64, u32) {
        match self.state {
            DetectorState::Idle => (0, 0, self.rejections),
            DetectorState::Armed { until } => (1, until, self.rejections),
            DetectorState::Finished => (2, 0, self.rejections),
            DetectorState::Disabled => (3, 0, self.rejections),
        }
    }

    /// Candidates are not saved; a restored armed detector starts collecting again.
    pub(crate) fn restore_snapshot(&mut self, tag: u8, frame: u64, rejections: u32) {
        self.state = match tag {
            1 => DetectorState::Armed { until: frame },
            2 => DetectorState::Finished,
            3 => DetectorState::Disabled,
            _ => DetectorState::Idle,
        };
        self.rejections = rejections;
        self.candidates.clear();
    }
}

/// Reversible record of patched program words.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchOverlay {
    /// address -> (original word, patched word)
    entries: BTreeMap<u32, (u16, u16)>,
}

impl PatchOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u16, u16)> + '_ {
        self.entries.iter().map(|(&a, &(o, p))| (a, o, p))
    }

    pub fn original(&self, addr: u32) -> Option<u16> {
        self.entries.get(&addr).map(|&(o, _)| o)
    }

    /// Write `word` at `addr`, remembering what was there. An address
    /// already patched is left untouched.
    pub fn apply(&mut self, mem: &mut CellMemory, addr: u32, word: u16) -> bool {
        if self.entries.contains_key(&addr) {
            return false;
        }
        let original = mem.read16(addr);
        self.entries.insert(addr, (original, word));
        mem.write16(addr, word);
        log(LogCategory::IdleLoop, LogLevel::Debug, || {
            format!("idle: patch {:06X} {:04X} -> {:04X}", addr, original, word)
        });
        true
    }

    /// Put back the original word at `addr` and forget the patch
    pub fn restore(&mut self, mem: &mut CellMemory, addr: u32) -> bool {
        match self.entries.remove(&addr) {
            Some((original, _)) => {
                mem.write16(addr, original);
                true
            }
            None => false,
        }
    }

    /// Restore every patch and empty the overlay
    pub fn clear(&mut self, mem: &mut CellMemory) {
        for (&addr, &(original, _)) in &self.entries {
            mem.write16(addr, original);
        }
        self.entries.clear();
    }

    /// Write the originals back but keep the entries for `resume`
    pub fn suspend(&self, mem: &mut CellMemory) {
        for (&addr, &(original, _)) in &self.entries {
            mem.write16(addr, original);
        }
    }

    pub fn resume(&self, mem: &mut CellMemory) {
        for (&addr, &(_, patched)) in &self.entries {
            mem.write16(addr, patched);
        }
    }
}
