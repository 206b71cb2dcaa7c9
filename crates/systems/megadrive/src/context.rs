//! CPU execution contexts and their interrupt controllers.

use crate::bus::ContextBus;
use crate::idle::{IdleCandidate, IdleDetector, Proposal};
use crate::MegaDriveError;
use emu_core::cpu_m68k::{CpuM68k, Memory68k};
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::state_stream::StateStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// Console 68000
    Main,
    /// Mega-CD 68000
    Sub,
}

/// Raised interrupt lines, bit N for level N.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingInterrupts(u8);

impl PendingInterrupts {
    pub fn raise(&mut self, level: u8) {
        self.0 |= 1 << (level & 7);
    }

    pub(crate) fn clear(&mut self, level: u8) {
        self.0 &= !(1 << (level & 7));
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_raised(self, level: u8) -> bool {
        self.0 & (1 << (level & 7)) != 0
    }

    /// Highest raised level allowed by `eligible`, 0 when none
    pub fn highest(self, eligible: u8) -> u8 {
        let live = self.0 & eligible & 0xFE;
        if live == 0 {
            0
        } else {
            7 - live.leading_zeros() as u8
        }
    }
}

/// Loop bodies of these byte lengths are offered to the idle detector
const IDLE_BODY_LENGTHS: [u32; 5] = [2, 4, 6, 8, 12];

pub struct CpuContext {
    pub kind: ContextKind,
    pub cpu: CpuM68k<ContextBus>,
    pub cycles_done: u64,
    pub cycles_aim: u64,
    pub pending: PendingInterrupts,
    /// Levels allowed through to the CPU
    pub eligible: u8,
    /// Level currently presented to the CPU
    pub active_line: u8,
    pub idle_skips: u32,
}

impl CpuContext {
    pub fn new(kind: ContextKind, bus: ContextBus) -> Self {
        Self {
            kind,
            cpu: CpuM68k::new(bus),
            cycles_done: 0,
            cycles_aim: 0,
            pending: PendingInterrupts::default(),
            eligible: match kind {
                ContextKind::Main => 0xFE,
                ContextKind::Sub => 0,
            },
            active_line: 0,
            idle_skips: 0,
        }
    }

    fn has_program(&self) -> bool {
        let hw = self.cpu.memory.hardware().borrow();
        match self.kind {
            ContextKind::Main => !hw.rom.is_empty(),
            ContextKind::Sub => !hw.prg_ram.is_empty(),
        }
    }

    /// Reload registers from the vector table. Fails without a program.
    pub fn reset(&mut self) -> Result<(), MegaDriveError> {
        if !self.has_program() {
            log(LogCategory::CPU, LogLevel::Warn, || {
                format!("{:?} reset refused: no program loaded", self.kind)
            });
            return Err(MegaDriveError::NoImageLoaded);
        }
        self.cpu.reset();
        self.pending = PendingInterrupts::default();
        self.active_line = 0;
        self.cycles_done = 0;
        self.cycles_aim = 0;
        if self.kind == ContextKind::Sub {
            self.eligible = 0;
        }
        Ok(())
    }

    fn refresh_line(&mut self) {
        self.active_line = self.pending.highest(self.eligible);
    }

    pub fn raise(&mut self, level: u8) {
        self.pending.raise(level);
        log(LogCategory::Interrupts, LogLevel::Trace, || {
            format!("{:?} raise level {}", self.kind, level)
        });
        self.refresh_line();
    }

    /// Clear `level` and present the next highest one
    pub fn acknowledge(&mut self, level: u8) {
        self.pending.clear(level);
        if self.kind == ContextKind::Main {
            self.cpu
                .memory
                .hardware()
                .borrow_mut()
                .video
                .acknowledge(level);
        }
        self.refresh_line();
    }

    /// Pick up levels raised by devices and the sub CPU's software mask
    fn sync_lines(&mut self) {
        let raised = {
            let mut hw = self.cpu.memory.hardware().borrow_mut();
            match self.kind {
                ContextKind::Main => hw.take_main_irqs(),
                ContextKind::Sub => hw.take_sub_irqs(),
            }
        };
        for level in 1..8 {
            if raised & (1 << level) != 0 {
                self.pending.raise(level);
            }
        }
        if self.kind == ContextKind::Sub && self.pending.bits() != 0 {
            self.eligible = self.cpu.memory.hardware().borrow().gate.sub_int_mask() & 0xFE;
        }
        self.refresh_line();
    }

    fn poll_interrupt(&mut self) {
        self.sync_lines();
        let level = self.active_line;
        if level != 0 && self.cpu.accepts_interrupt(level) {
            self.cycles_done += self.cpu.service_interrupt(level) as u64;
            self.acknowledge(level);
        }
    }

    fn offer_idle_candidate(&mut self, detector: &mut IdleDetector) {
        let Some(branch) = self.cpu.take_backward_branch() else {
            return;
        };
        let len = branch.pc.wrapping_sub(branch.target);
        if !IDLE_BODY_LENGTHS.contains(&len) {
            return;
        }
        let body: Vec<u16> = (0..len / 2)
            .map(|i| self.cpu.memory.read_word(branch.target + i * 2))
            .collect();
        if detector.propose(IdleCandidate {
            pc: branch.pc,
            body,
        }) == Proposal::Disabled
        {
            self.cpu.track_branches = false;
        }
    }

    /// Execute until `cycles_aim` is reached. The last instruction may
    /// overshoot; a taken idle branch or a STOP gives up the rest of the
    /// quantum. Returns the cycles consumed.
    pub fn run(&mut self, mut detector: Option<&mut IdleDetector>) -> u64 {
        let start = self.cycles_done;
        self.cpu.track_branches = detector.as_deref().map_or(false, IdleDetector::is_armed);
        while self.cycles_done < self.cycles_aim {
            self.poll_interrupt();
            if self.cpu.stopped {
                self.cycles_done = self.cycles_aim;
                break;
            }
            self.cycles_done += self.cpu.step() as u64;
            if let Some(det) = detector.as_deref_mut() {
                self.offer_idle_candidate(det);
            }
            if self.cpu.take_idle_hit() {
                self.cycles_done = self.cycles_done.max(self.cycles_aim);
                self.idle_skips += 1;
            }
        }
        self.cpu.track_branches = false;
        self.cycles_done - start
    }

    /// Execute exactly one instruction (after any pending interrupt entry)
    pub fn step_instruction(&mut self) -> u64 {
        self.cycles_aim = self.cycles_done + 1;
        self.run(None)
    }

    /// Carry the overshoot into the next frame
    pub fn end_frame(&mut self) {
        self.cycles_done = self.cycles_done.saturating_sub(self.cycles_aim);
        self.cycles_aim = 0;
    }

    pub fn transfer_state(&mut self, s: &mut StateStream) {
        let cpu = &mut self.cpu;
        for r in cpu.d.iter_mut().chain(cpu.a.iter_mut()) {
            s.transfer_u32(r);
        }
        s.transfer_u32(&mut cpu.pc);
        let mut sr = cpu.sr;
        s.transfer_u16(&mut sr);
        cpu.sr = sr;
        s.transfer_u32(&mut cpu.inactive_sp);
        s.transfer_bool(&mut cpu.stopped);
        s.transfer_u64(&mut cpu.cycles);
        s.transfer_u64(&mut self.cycles_done);
        s.transfer_u64(&mut self.cycles_aim);
        let mut pending = self.pending.0;
        s.transfer_u8(&mut pending);
        self.pending = PendingInterrupts(pending);
        s.transfer_u8(&mut self.eligible);
        s.transfer_u8(&mut self.active_line);
        s.transfer_u32(&mut self.idle_skips);
    }
}
