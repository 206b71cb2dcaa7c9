//! Motorola 68000 CPU core
//!
//! A generic 68000 interpreter driven through the `Memory68k` trait. It covers
//! the data movement, compare/test, arithmetic-quick and flow-control groups
//! that boot code and spin loops are built from. Opcodes outside that set are
//! reported under the `Stubs` log category and retire as 4-cycle no-ops.
//!
//! Two hooks exist for spin-loop handling:
//!
//! - with `track_branches` set, every taken backward short branch is recorded
//!   and can be collected with [`CpuM68k::take_backward_branch`];
//! - the idle-branch encodings (`0x71xx`, `0x75xx`, `0x7Dxx`) branch like
//!   `BNE.s`, `BEQ.s` and `BRA.s` respectively and, when taken, raise a flag
//!   collected with [`CpuM68k::take_idle_hit`].

use crate::logging::{log, LogCategory, LogLevel};
use crate::Cpu;

/// Memory interface for the 68000.
///
/// Addresses are 24-bit. Reads take `&mut self` because device registers
/// may change state when read.
pub trait Memory68k {
    fn read_byte(&mut self, addr: u32) -> u8;
    fn read_word(&mut self, addr: u32) -> u16;
    fn write_byte(&mut self, addr: u32, val: u8);
    fn write_word(&mut self, addr: u32, val: u16);

    /// Two word accesses, high half first
    fn read_long(&mut self, addr: u32) -> u32 {
        let hi = self.read_word(addr) as u32;
        let lo = self.read_word(addr.wrapping_add(2)) as u32;
        (hi << 16) | lo
    }

    /// Two word accesses, high half first
    fn write_long(&mut self, addr: u32, val: u32) {
        self.write_word(addr, (val >> 16) as u16);
        self.write_word(addr.wrapping_add(2), val as u16);
    }
}

pub const SR_C: u16 = 0x0001;
pub const SR_V: u16 = 0x0002;
pub const SR_Z: u16 = 0x0004;
pub const SR_N: u16 = 0x0008;
pub const SR_X: u16 = 0x0010;
pub const SR_S: u16 = 0x2000;
pub const SR_T: u16 = 0x8000;

/// Status register after reset: supervisor, interrupts masked, Z set
pub const SR_RESET: u16 = 0x2704;

const ADDR_MASK: u32 = 0x00FF_FFFF;

/// Cycles taken to enter an interrupt handler
pub const INTERRUPT_CYCLES: u32 = 44;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Size {
    Byte,
    Word,
    Long,
}

impl Size {
    /// Standard 2-bit size field (00 byte, 01 word, 10 long)
    fn from_bits(bits: u16) -> Option<Size> {
        match bits & 3 {
            0 => Some(Size::Byte),
            1 => Some(Size::Word),
            2 => Some(Size::Long),
            _ => None,
        }
    }

    /// MOVE size field (01 byte, 11 word, 10 long)
    fn from_move_bits(bits: u16) -> Option<Size> {
        match bits & 3 {
            1 => Some(Size::Byte),
            3 => Some(Size::Word),
            2 => Some(Size::Long),
            _ => None,
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            Size::Byte => 1,
            Size::Word => 2,
            Size::Long => 4,
        }
    }

    pub fn mask(self) -> u32 {
        match self {
            Size::Byte => 0xFF,
            Size::Word => 0xFFFF,
            Size::Long => 0xFFFF_FFFF,
        }
    }

    pub fn msb(self) -> u32 {
        match self {
            Size::Byte => 0x80,
            Size::Word => 0x8000,
            Size::Long => 0x8000_0000,
        }
    }
}

fn sign_extend(v: u32, size: Size) -> u32 {
    match size {
        Size::Byte => v as u8 as i8 as i32 as u32,
        Size::Word => v as u16 as i16 as i32 as u32,
        Size::Long => v,
    }
}

/// A taken backward short branch seen while `track_branches` was set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchEvent {
    /// Address of the branch opcode
    pub pc: u32,
    /// Branch destination, the start of the loop body
    pub target: u32,
}

#[derive(Debug, Clone, Copy)]
enum Operand {
    D(usize),
    A(usize),
    Mem(u32),
    Imm(u32),
}

/// Motorola 68000 CPU state
#[derive(Debug)]
pub struct CpuM68k<M: Memory68k> {
    /// Data registers
    pub d: [u32; 8],
    /// Address registers; `a[7]` is the stack pointer of the current mode
    pub a: [u32; 8],
    pub pc: u32,
    pub sr: u16,
    /// Stack pointer of the mode that is not active (USP in supervisor mode, SSP otherwise)
    pub inactive_sp: u32,
    /// Halted by STOP until an interrupt arrives
    pub stopped: bool,
    pub cycles: u64,
    /// Record taken backward short branches
    pub track_branches: bool,
    backward_branch: Option<BranchEvent>,
    idle_hit: bool,
    pub memory: M,
}

impl<M: Memory68k> CpuM68k<M> {
    pub fn new(memory: M) -> Self {
        Self {
            d: [0; 8],
            a: [0; 8],
            pc: 0,
            sr: SR_RESET,
            inactive_sp: 0,
            stopped: false,
            cycles: 0,
            track_branches: false,
            backward_branch: None,
            idle_hit: false,
            memory,
        }
    }

    /// Load SSP and PC from the vector table and enter supervisor mode.
    pub fn reset(&mut self) {
        self.d = [0; 8];
        self.a = [0; 8];
        self.sr = SR_RESET;
        self.inactive_sp = 0;
        self.stopped = false;
        self.backward_branch = None;
        self.idle_hit = false;
        self.a[7] = self.memory.read_long(0);
        self.pc = self.memory.read_long(4) & ADDR_MASK;
        log(LogCategory::CPU, LogLevel::Debug, || {
            format!("68k reset: ssp={:08X} pc={:06X}", self.a[7], self.pc)
        });
    }

    pub fn interrupt_mask(&self) -> u8 {
        ((self.sr >> 8) & 7) as u8
    }

    /// Level 7 is non-maskable; other levels must exceed the SR mask.
    pub fn accepts_interrupt(&self, level: u8) -> bool {
        level == 7 || (level > 0 && level > self.interrupt_mask())
    }

    /// Enter the autovector handler for `level`. Returns cycles taken.
    pub fn service_interrupt(&mut self, level: u8) -> u32 {
        let old_sr = self.sr;
        let new_sr = ((old_sr | SR_S) & !(SR_T | 0x0700)) | (((level & 7) as u16) << 8);
        self.set_sr(new_sr);
        self.push_long(self.pc);
        self.push_word(old_sr);
        let vector = (24 + level as u32) * 4;
        self.pc = self.memory.read_long(vector) & ADDR_MASK;
        self.stopped = false;
        self.cycles += INTERRUPT_CYCLES as u64;
        log(LogCategory::Interrupts, LogLevel::Trace, || {
            format!("68k level {} interrupt -> {:06X}", level, self.pc)
        });
        INTERRUPT_CYCLES
    }

    /// Set SR, swapping stack pointers on a supervisor-bit change
    pub fn set_sr(&mut self, value: u16) {
        let value = value & 0xA71F;
        if (self.sr ^ value) & SR_S != 0 {
            std::mem::swap(&mut self.a[7], &mut self.inactive_sp);
        }
        self.sr = value;
    }

    pub fn take_backward_branch(&mut self) -> Option<BranchEvent> {
        self.backward_branch.take()
    }

    pub fn take_idle_hit(&mut self) -> bool {
        std::mem::take(&mut self.idle_hit)
    }

    fn flag(&self, f: u16) -> bool {
        self.sr & f != 0
    }

    fn set_flag(&mut self, f: u16, on: bool) {
        if on {
            self.sr |= f;
        } else {
            self.sr &= !f;
        }
    }

    fn fetch_word(&mut self) -> u16 {
        let w = self.memory.read_word(self.pc & ADDR_MASK);
        self.pc = self.pc.wrapping_add(2) & ADDR_MASK;
        w
    }

    fn fetch_long(&mut self) -> u32 {
        let hi = self.fetch_word() as u32;
        let lo = self.fetch_word() as u32;
        (hi << 16) | lo
    }

    fn push_word(&mut self, v: u16) {
        self.a[7] = self.a[7].wrapping_sub(2);
        self.memory.write_word(self.a[7] & ADDR_MASK, v);
    }

    fn push_long(&mut self, v: u32) {
        self.a[7] = self.a[7].wrapping_sub(4);
        self.memory.write_long(self.a[7] & ADDR_MASK, v);
    }

    fn pop_word(&mut self) -> u16 {
        let v = self.memory.read_word(self.a[7] & ADDR_MASK);
        self.a[7] = self.a[7].wrapping_add(2);
        v
    }

    fn pop_long(&mut self) -> u32 {
        let v = self.memory.read_long(self.a[7] & ADDR_MASK);
        self.a[7] = self.a[7].wrapping_add(4);
        v
    }

    fn test_cc(&self, cc: u16) -> bool {
        let c = self.flag(SR_C);
        let v = self.flag(SR_V);
        let z = self.flag(SR_Z);
        let n = self.flag(SR_N);
        match cc & 0xF {
            0x0 => true,
            0x1 => false,
            0x2 => !c && !z,
            0x3 => c || z,
            0x4 => !c,
            0x5 => c,
            0x6 => !z,
            0x7 => z,
            0x8 => !v,
            0x9 => v,
            0xA => !n,
            0xB => n,
            0xC => n == v,
            0xD => n != v,
            0xE => !z && n == v,
            _ => z || n != v,
        }
    }

    /// Extra cycles for an effective address, 68000 timing table
    fn ea_cycles(mode: u16, reg: u16, size: Size) -> u32 {
        let long = size == Size::Long;
        let (short, wide) = match (mode, reg) {
            (0, _) | (1, _) => (0, 0),
            (2, _) | (3, _) => (4, 8),
            (4, _) => (6, 10),
            (5, _) => (8, 12),
            (6, _) => (10, 14),
            (7, 0) => (8, 12),
            (7, 1) => (12, 16),
            (7, 2) => (8, 12),
            (7, 3) => (10, 14),
            (7, 4) => (4, 8),
            _ => (0, 0),
        };
        if long {
            wide
        } else {
            short
        }
    }

    fn index_ext(&mut self, base: u32) -> u32 {
        let ext = self.fetch_word();
        let reg = ((ext >> 12) & 7) as usize;
        let idx = if ext & 0x8000 != 0 {
            self.a[reg]
        } else {
            self.d[reg]
        };
        let idx = if ext & 0x0800 != 0 {
            idx
        } else {
            sign_extend(idx, Size::Word)
        };
        base.wrapping_add(idx)
            .wrapping_add(sign_extend(ext as u32, Size::Byte))
    }

    /// Resolve an effective address, applying (An)+ / -(An) side effects.
    fn resolve(&mut self, mode: u16, reg: u16, size: Size) -> Option<Operand> {
        let r = reg as usize;
        let step = if r == 7 && size == Size::Byte {
            2
        } else {
            size.bytes()
        };
        let op = match mode {
            0 => Operand::D(r),
            1 => Operand::A(r),
            2 => Operand::Mem(self.a[r]),
            3 => {
                let addr = self.a[r];
                self.a[r] = addr.wrapping_add(step);
                Operand::Mem(addr)
            }
            4 => {
                self.a[r] = self.a[r].wrapping_sub(step);
                Operand::Mem(self.a[r])
            }
            5 => {
                let disp = sign_extend(self.fetch_word() as u32, Size::Word);
                Operand::Mem(self.a[r].wrapping_add(disp))
            }
            6 => {
                let base = self.a[r];
                Operand::Mem(self.index_ext(base))
            }
            7 => match reg {
                0 => Operand::Mem(sign_extend(self.fetch_word() as u32, Size::Word)),
                1 => Operand::Mem(self.fetch_long()),
                2 => {
                    let base = self.pc;
                    let disp = sign_extend(self.fetch_word() as u32, Size::Word);
                    Operand::Mem(base.wrapping_add(disp))
                }
                3 => {
                    let base = self.pc;
                    Operand::Mem(self.index_ext(base))
                }
                4 => Operand::Imm(match size {
                    Size::Byte => (self.fetch_word() & 0xFF) as u32,
                    Size::Word => self.fetch_word() as u32,
                    Size::Long => self.fetch_long(),
                }),
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn read_operand(&mut self, op: Operand, size: Size) -> u32 {
        match op {
            Operand::D(r) => self.d[r] & size.mask(),
            Operand::A(r) => self.a[r] & size.mask(),
            Operand::Mem(addr) => {
                let addr = addr & ADDR_MASK;
                match size {
                    Size::Byte => self.memory.read_byte(addr) as u32,
                    Size::Word => self.memory.read_word(addr) as u32,
                    Size::Long => self.memory.read_long(addr),
                }
            }
            Operand::Imm(v) => v & size.mask(),
        }
    }

    fn write_operand(&mut self, op: Operand, size: Size, val: u32) {
        match op {
            Operand::D(r) => {
                let mask = size.mask();
                self.d[r] = (self.d[r] & !mask) | (val & mask);
            }
            Operand::A(r) => self.a[r] = val,
            Operand::Mem(addr) => {
                let addr = addr & ADDR_MASK;
                match size {
                    Size::Byte => self.memory.write_byte(addr, val as u8),
                    Size::Word => self.memory.write_word(addr, val as u16),
                    Size::Long => self.memory.write_long(addr, val),
                }
            }
            Operand::Imm(_) => {}
        }
    }

    fn set_nz(&mut self, val: u32, size: Size) {
        let v = val & size.mask();
        self.set_flag(SR_N, v & size.msb() != 0);
        self.set_flag(SR_Z, v == 0);
    }

    fn set_logic_flags(&mut self, val: u32, size: Size) {
        self.set_nz(val, size);
        self.set_flag(SR_V, false);
        self.set_flag(SR_C, false);
    }

    /// dst - src; X is only touched when `set_x`
    fn sub_with_flags(&mut self, dst: u32, src: u32, size: Size, set_x: bool) -> u32 {
        let mask = size.mask();
        let (d, s) = (dst & mask, src & mask);
        let res = d.wrapping_sub(s) & mask;
        let msb = size.msb();
        self.set_nz(res, size);
        self.set_flag(SR_V, (s ^ d) & (res ^ d) & msb != 0);
        self.set_flag(SR_C, s > d);
        if set_x {
            self.set_flag(SR_X, s > d);
        }
        res
    }

    fn add_with_flags(&mut self, dst: u32, src: u32, size: Size) -> u32 {
        let mask = size.mask();
        let (d, s) = (dst & mask, src & mask);
        let wide = d as u64 + s as u64;
        let res = (wide as u32) & mask;
        let msb = size.msb();
        let carry = wide > mask as u64;
        self.set_nz(res, size);
        self.set_flag(SR_V, (s ^ res) & (d ^ res) & msb != 0);
        self.set_flag(SR_C, carry);
        self.set_flag(SR_X, carry);
        res
    }

    fn unknown(&mut self, op: u16, op_pc: u32) -> u32 {
        log(LogCategory::Stubs, LogLevel::Warn, || {
            format!("68k unimplemented opcode {:04X} at {:06X}", op, op_pc)
        });
        4
    }

    fn privileged(&self) -> bool {
        self.flag(SR_S)
    }

    /// Taken branch bookkeeping shared by Bcc and the idle-branch forms
    fn branch(&mut self, op_pc: u32, target: u32, short: bool) {
        if self.track_branches && short && target < op_pc {
            self.backward_branch = Some(BranchEvent { pc: op_pc, target });
        }
        self.pc = target & ADDR_MASK;
    }

    /// Execute one instruction (or wait one slot while stopped).
    pub fn step(&mut self) -> u32 {
        if self.stopped {
            self.cycles += 4;
            return 4;
        }
        let op_pc = self.pc;
        let op = self.fetch_word();
        let cycles = self.execute(op, op_pc);
        self.cycles += cycles as u64;
        cycles
    }

    fn execute(&mut self, op: u16, op_pc: u32) -> u32 {
        match op >> 12 {
            0x0 => self.exec_group0(op, op_pc),
            0x1..=0x3 => self.exec_move(op, op_pc),
            0x4 => self.exec_group4(op, op_pc),
            0x5 => self.exec_quick(op, op_pc),
            0x6 => self.exec_bcc(op, op_pc),
            0x7 => self.exec_moveq(op, op_pc),
            0x9 | 0xD => self.exec_addsub(op, op_pc),
            0xB => self.exec_cmp(op, op_pc),
            _ => self.unknown(op, op_pc),
        }
    }

    fn exec_group0(&mut self, op: u16, op_pc: u32) -> u32 {
        let mode = (op >> 3) & 7;
        let reg = op & 7;
        match op {
            // ORI/ANDI/EORI to SR
            0x007C | 0x027C | 0x0A7C => {
                let imm = self.fetch_word();
                if !self.privileged() {
                    return self.unknown(op, op_pc);
                }
                let sr = match op {
                    0x007C => self.sr | imm,
                    0x027C => self.sr & imm,
                    _ => self.sr ^ imm,
                };
                self.set_sr(sr);
                return 20;
            }
            // ORI/ANDI to CCR
            0x003C | 0x023C => {
                let imm = self.fetch_word() & 0x1F;
                let ccr = if op == 0x003C {
                    self.sr | imm
                } else {
                    self.sr & (0xFF00 | imm)
                };
                self.sr = ccr;
                return 20;
            }
            _ => {}
        }

        if op & 0xF138 == 0x0108 {
            // MOVEP
            return self.unknown(op, op_pc);
        }

        // BTST Dn,<ea> / BTST #imm,<ea>
        let bit_source = if op & 0xF1C0 == 0x0100 {
            Some(self.d[((op >> 9) & 7) as usize])
        } else if op & 0xFFC0 == 0x0800 {
            Some(self.fetch_word() as u32)
        } else {
            None
        };
        if let Some(bit) = bit_source {
            let size = if mode == 0 { Size::Long } else { Size::Byte };
            let Some(dst) = self.resolve(mode, reg, size) else {
                return self.unknown(op, op_pc);
            };
            let val = self.read_operand(dst, size);
            let bit = bit % if mode == 0 { 32 } else { 8 };
            self.set_flag(SR_Z, val & (1 << bit) == 0);
            let base = if op & 0x0100 != 0 { 4 } else { 8 };
            return base + if mode == 0 { 2 } else { Self::ea_cycles(mode, reg, Size::Byte) };
        }

        // CMPI #imm,<ea>
        if op & 0xFF00 == 0x0C00 {
            let Some(size) = Size::from_bits(op >> 6) else {
                return self.unknown(op, op_pc);
            };
            let imm = match size {
                Size::Byte => (self.fetch_word() & 0xFF) as u32,
                Size::Word => self.fetch_word() as u32,
                Size::Long => self.fetch_long(),
            };
            let Some(dst) = self.resolve(mode, reg, size) else {
                return self.unknown(op, op_pc);
            };
            let d = self.read_operand(dst, size);
            self.sub_with_flags(d, imm, size, false);
            let base = if size == Size::Long { 14 } else { 8 };
            return base + Self::ea_cycles(mode, reg, size);
        }

        self.unknown(op, op_pc)
    }

    fn exec_move(&mut self, op: u16, op_pc: u32) -> u32 {
        let Some(size) = Size::from_move_bits(op >> 12) else {
            return self.unknown(op, op_pc);
        };
        let src_mode = (op >> 3) & 7;
        let src_reg = op & 7;
        let dst_reg = (op >> 9) & 7;
        let dst_mode = (op >> 6) & 7;

        let Some(src) = self.resolve(src_mode, src_reg, size) else {
            return self.unknown(op, op_pc);
        };
        let val = self.read_operand(src, size);

        if dst_mode == 1 {
            // MOVEA
            if size == Size::Byte {
                return self.unknown(op, op_pc);
            }
            self.a[dst_reg as usize] = sign_extend(val, size);
            return 4 + Self::ea_cycles(src_mode, src_reg, size);
        }

        let Some(dst) = self.resolve(dst_mode, dst_reg, size) else {
            return self.unknown(op, op_pc);
        };
        self.write_operand(dst, size, val);
        self.set_logic_flags(val, size);
        4 + Self::ea_cycles(src_mode, src_reg, size) + Self::ea_cycles(dst_mode, dst_reg, size)
    }

    fn exec_group4(&mut self, op: u16, op_pc: u32) -> u32 {
        let mode = (op >> 3) & 7;
        let reg = op & 7;

        match op {
            0x4E70 => return 132, // RESET: external devices only
            0x4E71 => return 4,   // NOP
            0x4E72 => {
                // STOP #imm
                let imm = self.fetch_word();
                if !self.privileged() {
                    return self.unknown(op, op_pc);
                }
                self.set_sr(imm);
                self.stopped = true;
                log(LogCategory::CPU, LogLevel::Trace, || {
                    format!("68k STOP #{:04X} at {:06X}", imm, op_pc)
                });
                return 4;
            }
            0x4E73 => {
                // RTE
                if !self.privileged() {
                    return self.unknown(op, op_pc);
                }
                let sr = self.pop_word();
                let pc = self.pop_long();
                self.set_sr(sr);
                self.pc = pc & ADDR_MASK;
                return 20;
            }
            0x4E75 => {
                // RTS
                self.pc = self.pop_long() & ADDR_MASK;
                return 16;
            }
            _ => {}
        }

        // LEA <ea>,An
        if op & 0xF1C0 == 0x41C0 {
            let Some(Operand::Mem(addr)) = self.resolve(mode, reg, Size::Long) else {
                return self.unknown(op, op_pc);
            };
            self.a[((op >> 9) & 7) as usize] = addr;
            return 4 + Self::ea_cycles(mode, reg, Size::Word);
        }

        // JMP / JSR
        if op & 0xFF80 == 0x4E80 {
            let Some(Operand::Mem(addr)) = self.resolve(mode, reg, Size::Long) else {
                return self.unknown(op, op_pc);
            };
            if op & 0x0040 == 0 {
                self.push_long(self.pc);
                self.pc = addr & ADDR_MASK;
                return 16;
            }
            self.pc = addr & ADDR_MASK;
            return 8;
        }

        // SWAP Dn
        if op & 0xFFF8 == 0x4840 {
            let r = reg as usize;
            self.d[r] = self.d[r].rotate_left(16);
            self.set_logic_flags(self.d[r], Size::Long);
            return 4;
        }

        // MOVE from SR / to CCR / to SR
        match op & 0xFFC0 {
            0x40C0 => {
                let Some(dst) = self.resolve(mode, reg, Size::Word) else {
                    return self.unknown(op, op_pc);
                };
                self.write_operand(dst, Size::Word, self.sr as u32);
                return 6 + Self::ea_cycles(mode, reg, Size::Word);
            }
            0x44C0 | 0x46C0 => {
                let Some(src) = self.resolve(mode, reg, Size::Word) else {
                    return self.unknown(op, op_pc);
                };
                let v = self.read_operand(src, Size::Word) as u16;
                if op & 0x0200 != 0 {
                    if !self.privileged() {
                        return self.unknown(op, op_pc);
                    }
                    self.set_sr(v);
                } else {
                    self.sr = (self.sr & 0xFF00) | (v & 0x1F);
                }
                return 12 + Self::ea_cycles(mode, reg, Size::Word);
            }
            _ => {}
        }

        // TAS <ea> (0x4AFC is ILLEGAL)
        if op & 0xFFC0 == 0x4AC0 && op != 0x4AFC {
            let ea = match self.resolve(mode, reg, Size::Byte) {
                Some(ea @ (Operand::D(_) | Operand::Mem(_))) => ea,
                _ => return self.unknown(op, op_pc),
            };
            let v = self.read_operand(ea, Size::Byte);
            self.set_logic_flags(v, Size::Byte);
            self.write_operand(ea, Size::Byte, v | 0x80);
            return match ea {
                Operand::D(_) => 4,
                _ => 14 + Self::ea_cycles(mode, reg, Size::Byte),
            };
        }

        // CLR / TST
        if op & 0xFF00 == 0x4200 || op & 0xFF00 == 0x4A00 {
            let Some(size) = Size::from_bits(op >> 6) else {
                return self.unknown(op, op_pc);
            };
            let Some(ea) = self.resolve(mode, reg, size) else {
                return self.unknown(op, op_pc);
            };
            if op & 0xFF00 == 0x4200 {
                self.write_operand(ea, size, 0);
                self.set_logic_flags(0, size);
                let base = if size == Size::Long { 6 } else { 4 };
                return base + Self::ea_cycles(mode, reg, size);
            }
            let v = self.read_operand(ea, size);
            self.set_logic_flags(v, size);
            return 4 + Self::ea_cycles(mode, reg, size);
        }

        self.unknown(op, op_pc)
    }

    /// ADDQ / SUBQ / Scc / DBcc
    fn exec_quick(&mut self, op: u16, op_pc: u32) -> u32 {
        let mode = (op >> 3) & 7;
        let reg = op & 7;
        let cc = (op >> 8) & 0xF;

        if op & 0x00C0 == 0x00C0 {
            if mode == 1 {
                // DBcc Dn,disp
                let base = self.pc;
                let disp = sign_extend(self.fetch_word() as u32, Size::Word);
                if self.test_cc(cc) {
                    return 12;
                }
                let r = reg as usize;
                let count = (self.d[r] as u16).wrapping_sub(1);
                self.d[r] = (self.d[r] & 0xFFFF_0000) | count as u32;
                if count == 0xFFFF {
                    return 14;
                }
                self.pc = base.wrapping_add(disp) & ADDR_MASK;
                return 10;
            }
            // Scc <ea>
            let Some(dst) = self.resolve(mode, reg, Size::Byte) else {
                return self.unknown(op, op_pc);
            };
            let v = if self.test_cc(cc) { 0xFF } else { 0x00 };
            self.write_operand(dst, Size::Byte, v);
            return if mode == 0 { 4 } else { 8 + Self::ea_cycles(mode, reg, Size::Byte) };
        }

        let Some(size) = Size::from_bits(op >> 6) else {
            return self.unknown(op, op_pc);
        };
        let data = match (op >> 9) & 7 {
            0 => 8,
            n => n as u32,
        };
        let sub = op & 0x0100 != 0;

        if mode == 1 {
            let r = reg as usize;
            self.a[r] = if sub {
                self.a[r].wrapping_sub(data)
            } else {
                self.a[r].wrapping_add(data)
            };
            return 8;
        }

        let Some(dst) = self.resolve(mode, reg, size) else {
            return self.unknown(op, op_pc);
        };
        let d = self.read_operand(dst, size);
        let res = if sub {
            self.sub_with_flags(d, data, size, true)
        } else {
            self.add_with_flags(d, data, size)
        };
        self.write_operand(dst, size, res);
        if mode == 0 {
            if size == Size::Long {
                8
            } else {
                4
            }
        } else {
            let base = if size == Size::Long { 12 } else { 8 };
            base + Self::ea_cycles(mode, reg, size)
        }
    }

    fn branch_displacement(&mut self, op: u16) -> (u32, bool) {
        let base = self.pc;
        match op & 0xFF {
            0 => {
                let disp = sign_extend(self.fetch_word() as u32, Size::Word);
                (base.wrapping_add(disp), false)
            }
            d => (base.wrapping_add(sign_extend(d as u32, Size::Byte)), true),
        }
    }

    fn exec_bcc(&mut self, op: u16, op_pc: u32) -> u32 {
        let cc = (op >> 8) & 0xF;
        let (target, short) = self.branch_displacement(op);

        if cc == 1 {
            // BSR
            self.push_long(self.pc);
            self.pc = target & ADDR_MASK;
            return 18;
        }
        if self.test_cc(cc) {
            self.branch(op_pc, target, short);
            10
        } else if short {
            8
        } else {
            12
        }
    }

    /// MOVEQ, plus the idle-branch forms living in the unused bit-8 encodings
    fn exec_moveq(&mut self, op: u16, op_pc: u32) -> u32 {
        if op & 0x0100 == 0 {
            let v = sign_extend((op & 0xFF) as u32, Size::Byte);
            self.d[((op >> 9) & 7) as usize] = v;
            self.set_logic_flags(v, Size::Long);
            return 4;
        }

        let taken = match op & 0xFD00 {
            0x7100 => !self.flag(SR_Z),
            0x7500 => self.flag(SR_Z),
            0x7D00 => true,
            _ => return self.unknown(op, op_pc),
        };
        let base = self.pc;
        let target = base.wrapping_add(sign_extend((op & 0xFF) as u32, Size::Byte));
        if taken {
            self.branch(op_pc, target, true);
            self.idle_hit = true;
            10
        } else {
            8
        }
    }

    /// ADD / SUB / ADDA / SUBA
    fn exec_addsub(&mut self, op: u16, op_pc: u32) -> u32 {
        let sub = op >> 12 == 0x9;
        let mode = (op >> 3) & 7;
        let reg = op & 7;
        let rn = ((op >> 9) & 7) as usize;
        let opmode = (op >> 6) & 7;

        if opmode == 3 || opmode == 7 {
            let size = if opmode == 3 { Size::Word } else { Size::Long };
            let Some(src) = self.resolve(mode, reg, size) else {
                return self.unknown(op, op_pc);
            };
            let v = sign_extend(self.read_operand(src, size), size);
            self.a[rn] = if sub {
                self.a[rn].wrapping_sub(v)
            } else {
                self.a[rn].wrapping_add(v)
            };
            return 8 + Self::ea_cycles(mode, reg, size);
        }

        let Some(size) = Size::from_bits(opmode) else {
            return self.unknown(op, op_pc);
        };
        if opmode & 4 == 0 {
            // <ea>,Dn
            let Some(src) = self.resolve(mode, reg, size) else {
                return self.unknown(op, op_pc);
            };
            let s = self.read_operand(src, size);
            let d = self.d[rn];
            let res = if sub {
                self.sub_with_flags(d, s, size, true)
            } else {
                self.add_with_flags(d, s, size)
            };
            self.write_operand(Operand::D(rn), size, res);
            let base = if size == Size::Long { 6 } else { 4 };
            return base + Self::ea_cycles(mode, reg, size);
        }

        if mode <= 1 {
            // ADDX/SUBX live here
            return self.unknown(op, op_pc);
        }
        // Dn,<ea>
        let Some(dst) = self.resolve(mode, reg, size) else {
            return self.unknown(op, op_pc);
        };
        let d = self.read_operand(dst, size);
        let s = self.d[rn];
        let res = if sub {
            self.sub_with_flags(d, s, size, true)
        } else {
            self.add_with_flags(d, s, size)
        };
        self.write_operand(dst, size, res);
        let base = if size == Size::Long { 12 } else { 8 };
        base + Self::ea_cycles(mode, reg, size)
    }

    /// CMP / CMPA / EOR
    fn exec_cmp(&mut self, op: u16, op_pc: u32) -> u32 {
        let mode = (op >> 3) & 7;
        let reg = op & 7;
        let rn = ((op >> 9) & 7) as usize;
        let opmode = (op >> 6) & 7;

        if opmode == 3 || opmode == 7 {
            let size = if opmode == 3 { Size::Word } else { Size::Long };
            let Some(src) = self.resolve(mode, reg, size) else {
                return self.unknown(op, op_pc);
            };
            let s = sign_extend(self.read_operand(src, size), size);
            let a = self.a[rn];
            self.sub_with_flags(a, s, Size::Long, false);
            return 6 + Self::ea_cycles(mode, reg, size);
        }

        let Some(size) = Size::from_bits(opmode) else {
            return self.unknown(op, op_pc);
        };

        if opmode & 4 == 0 {
            let Some(src) = self.resolve(mode, reg, size) else {
                return self.unknown(op, op_pc);
            };
            let s = self.read_operand(src, size);
            let d = self.d[rn];
            self.sub_with_flags(d, s, size, false);
            let base = if size == Size::Long { 6 } else { 4 };
            return base + Self::ea_cycles(mode, reg, size);
        }

        if mode == 1 {
            // CMPM
            return self.unknown(op, op_pc);
        }
        let Some(dst) = self.resolve(mode, reg, size) else {
            return self.unknown(op, op_pc);
        };
        let v = self.read_operand(dst, size) ^ self.d[rn];
        self.write_operand(dst, size, v);
        self.set_logic_flags(v, size);
        let base = if mode == 0 {
            if size == Size::Long {
                8
            } else {
                4
            }
        } else if size == Size::Long {
            12
        } else {
            8
        };
        base + Self::ea_cycles(mode, reg, size)
    }
}

impl<M: Memory68k> Cpu for CpuM68k<M> {
    fn reset(&mut self) {
        CpuM68k::reset(self)
    }

    fn step(&mut self) -> u32 {
        CpuM68k::step(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Flat 16 MiB-addressable test memory backed by 64 KiB, big-endian
    struct TestMemory {
        ram: Vec<u8>,
    }

    impl TestMemory {
        fn new() -> Self {
            Self {
                ram: vec![0; 0x10000],
            }
        }

        fn with_program(at: u32, words: &[u16]) -> Self {
            let mut m = Self::new();
            // SSP = 0x8000, PC = at
            m.put_long(0, 0x8000);
            m.put_long(4, at);
            for (i, w) in words.iter().enumerate() {
                m.put_word(at + (i as u32) * 2, *w);
            }
            m
        }

        fn put_word(&mut self, addr: u32, v: u16) {
            let a = (addr & 0xFFFF) as usize;
            self.ram[a] = (v >> 8) as u8;
            self.ram[a + 1] = v as u8;
        }

        fn put_long(&mut self, addr: u32, v: u32) {
            self.put_word(addr, (v >> 16) as u16);
            self.put_word(addr + 2, v as u16);
        }
    }

    impl Memory68k for TestMemory {
        fn read_byte(&mut self, addr: u32) -> u8 {
            self.ram[(addr & 0xFFFF) as usize]
        }
        fn read_word(&mut self, addr: u32) -> u16 {
            let a = (addr & 0xFFFF) as usize;
            ((self.ram[a] as u16) << 8) | self.ram[a + 1] as u16
        }
        fn write_byte(&mut self, addr: u32, val: u8) {
            self.ram[(addr & 0xFFFF) as usize] = val;
        }
        fn write_word(&mut self, addr: u32, val: u16) {
            self.put_word(addr, val);
        }
    }

    fn cpu_with(words: &[u16]) -> CpuM68k<TestMemory> {
        let mut cpu = CpuM68k::new(TestMemory::with_program(0x200, words));
        cpu.reset();
        cpu
    }

    #[test]
    fn test_reset_vectors() {
        let cpu = cpu_with(&[0x4E71]);
        assert_eq!(cpu.pc, 0x200);
        assert_eq!(cpu.a[7], 0x8000);
        assert_eq!(cpu.sr, SR_RESET);
        assert_eq!(cpu.interrupt_mask(), 7);
    }

    #[test]
    fn test_moveq_and_flags() {
        // MOVEQ #-1,D3 ; MOVEQ #0,D4
        let mut cpu = cpu_with(&[0x76FF, 0x7800]);
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.d[3], 0xFFFF_FFFF);
        assert!(cpu.sr & SR_N != 0);
        cpu.step();
        assert_eq!(cpu.d[4], 0);
        assert!(cpu.sr & SR_Z != 0);
    }

    #[test]
    fn test_move_word_to_absolute_and_back() {
        // MOVE.W #$1234,$1000.W ; MOVE.W $1000.W,D1
        let mut cpu = cpu_with(&[0x31FC, 0x1234, 0x1000, 0x3238, 0x1000]);
        cpu.step();
        assert_eq!(cpu.memory.read_word(0x1000), 0x1234);
        cpu.step();
        assert_eq!(cpu.d[1] & 0xFFFF, 0x1234);
    }

    #[test]
    fn test_lea_and_postincrement() {
        // LEA $3000.W,A0 ; MOVE.L D0,(A0)+
        let mut cpu = cpu_with(&[0x41F8, 0x3000, 0x20C0]);
        cpu.d[0] = 0xCAFE_BABE;
        cpu.step();
        assert_eq!(cpu.a[0], 0x3000);
        cpu.step();
        assert_eq!(cpu.a[0], 0x3004);
        assert_eq!(cpu.memory.read_long(0x3000), 0xCAFE_BABE);
    }

    #[test]
    fn test_subq_and_bne_loop() {
        // MOVEQ #3,D0 ; loop: SUBQ.W #1,D0 ; BNE.S loop ; NOP
        let mut cpu = cpu_with(&[0x7003, 0x5340, 0x66FC, 0x4E71]);
        for _ in 0..7 {
            cpu.step();
        }
        assert_eq!(cpu.d[0] & 0xFFFF, 0);
        assert_eq!(cpu.pc, 0x206);
    }

    #[test]
    fn test_backward_branch_tracking() {
        // loop: TST.W $FF00.W ; BEQ.S loop
        let mut cpu = cpu_with(&[0x4A78, 0xFF00, 0x67FA]);
        cpu.track_branches = true;
        cpu.step();
        cpu.step();
        assert_eq!(cpu.pc, 0x200);
        assert_eq!(
            cpu.take_backward_branch(),
            Some(BranchEvent {
                pc: 0x204,
                target: 0x200
            })
        );
        assert_eq!(cpu.take_backward_branch(), None);

        cpu.track_branches = false;
        cpu.step();
        cpu.step();
        assert_eq!(cpu.take_backward_branch(), None);
    }

    #[test]
    fn test_idle_branch_forms() {
        // loop: TST.W $FF00.W ; idle-BEQ loop
        let mut cpu = cpu_with(&[0x4A78, 0xFF00, 0x75FA]);
        cpu.step();
        assert!(cpu.sr & SR_Z != 0);
        assert_eq!(cpu.step(), 10);
        assert_eq!(cpu.pc, 0x200);
        assert!(cpu.take_idle_hit());
        assert!(!cpu.take_idle_hit());

        // Memory no longer zero: falls through, no idle hit
        cpu.memory.put_word(0xFF00, 1);
        cpu.step();
        assert_eq!(cpu.step(), 8);
        assert_eq!(cpu.pc, 0x206);
        assert!(!cpu.take_idle_hit());
    }

    #[test]
    fn test_cmp_and_btst() {
        // CMPI.B #5,D0 ; BTST #3,D1
        let mut cpu = cpu_with(&[0x0C00, 0x0005, 0x0801, 0x0003]);
        cpu.d[0] = 5;
        cpu.d[1] = 0x08;
        cpu.step();
        assert!(cpu.sr & SR_Z != 0);
        cpu.step();
        assert!(cpu.sr & SR_Z == 0);
    }

    #[test]
    fn test_jsr_rts() {
        // JSR $0300.W ; NOP   at 0x300: RTS
        let mut cpu = cpu_with(&[0x4EB8, 0x0300, 0x4E71]);
        cpu.memory.put_word(0x300, 0x4E75);
        cpu.step();
        assert_eq!(cpu.pc, 0x300);
        assert_eq!(cpu.a[7], 0x7FFC);
        cpu.step();
        assert_eq!(cpu.pc, 0x204);
        assert_eq!(cpu.a[7], 0x8000);
    }

    #[test]
    fn test_dbf_counts_down() {
        // MOVEQ #2,D1 ; loop: NOP ; DBF D1,loop
        let mut cpu = cpu_with(&[0x7202, 0x4E71, 0x51C9, 0xFFFC]);
        let mut steps = 0;
        while cpu.pc != 0x208 && steps < 20 {
            cpu.step();
            steps += 1;
        }
        assert_eq!(cpu.pc, 0x208);
        assert_eq!(cpu.d[1] & 0xFFFF, 0xFFFF);
    }

    #[test]
    fn test_interrupt_service_and_rte() {
        // MOVE #$2000,SR ; NOP
        let mut cpu = cpu_with(&[0x46FC, 0x2000, 0x4E71]);
        cpu.memory.put_long((24 + 6) * 4, 0x400);
        cpu.memory.put_word(0x400, 0x4E73);
        assert!(!cpu.accepts_interrupt(6));
        cpu.step();
        assert!(cpu.accepts_interrupt(6));

        assert_eq!(cpu.service_interrupt(6), INTERRUPT_CYCLES);
        assert_eq!(cpu.pc, 0x400);
        assert_eq!(cpu.interrupt_mask(), 6);
        assert!(!cpu.accepts_interrupt(6));
        assert!(cpu.accepts_interrupt(7));

        cpu.step();
        assert_eq!(cpu.pc, 0x204);
        assert_eq!(cpu.sr, 0x2000);
        assert_eq!(cpu.a[7], 0x8000);
    }

    #[test]
    fn test_stop_waits_for_interrupt() {
        // STOP #$2300
        let mut cpu = cpu_with(&[0x4E72, 0x2300]);
        cpu.memory.put_long((24 + 4) * 4, 0x500);
        cpu.step();
        assert!(cpu.stopped);
        let pc = cpu.pc;
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.pc, pc);
        assert!(!cpu.accepts_interrupt(3));
        cpu.service_interrupt(4);
        assert!(!cpu.stopped);
        assert_eq!(cpu.pc, 0x500);
    }

    #[test]
    fn test_supervisor_stack_swap() {
        // MOVE #$0000,SR drops to user mode
        let mut cpu = cpu_with(&[0x46FC, 0x0000]);
        cpu.inactive_sp = 0x6000;
        cpu.step();
        assert_eq!(cpu.a[7], 0x6000);
        assert_eq!(cpu.inactive_sp, 0x8000);
    }

    #[test]
    fn test_tas_sets_bit_seven() {
        // tas ($1000).w ; tas ($1000).w ; tas d2
        let mut cpu = cpu_with(&[0x4AF8, 0x1000, 0x4AF8, 0x1000, 0x4AC2]);
        cpu.step();
        assert_eq!(cpu.memory.read_byte(0x1000), 0x80);
        assert!(cpu.flag(SR_Z));
        assert!(!cpu.flag(SR_N));
        cpu.step();
        assert!(!cpu.flag(SR_Z));
        assert!(cpu.flag(SR_N));
        cpu.d[2] = 0x1234_5601;
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.d[2], 0x1234_5681);
        assert!(!cpu.flag(SR_N));
    }

    #[test]
    fn test_unknown_opcode_is_nop() {
        // ILLEGAL
        let mut cpu = cpu_with(&[0x4AFC, 0x4E71]);
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.pc, 0x202);
    }
}
