//! Memories and devices shared by both CPU contexts.

use crate::bus::Handler;
use crate::devices::{GateArray, IoPorts, PicoIo, SysCtrl, VideoTiming};
use crate::media::{HardwareKind, Region};
use crate::memory::CellMemory;
use crate::options::CoreOptions;
use crate::MegaDriveError;
use emu_core::state_stream::StateStream;

pub const WORK_RAM_SIZE: usize = 0x1_0000;
pub const PRG_RAM_SIZE: usize = 0x8_0000;
pub const WORD_RAM_SIZE: usize = 0x4_0000;
pub const BACKUP_RAM_SIZE: usize = 0x2000;
/// Size code reported at 0x400001; the cartridge holds `0x2000 << code` bytes
pub const RAM_CART_SIZE_CODE: u8 = 3;
const PRG_WINDOW_SIZE: u32 = 0x2_0000;

pub struct Hardware {
    pub kind: HardwareKind,
    /// Cartridge ROM, or the firmware on a Mega-CD
    pub rom: CellMemory,
    pub ram: CellMemory,
    /// Cartridge battery RAM in file byte order, empty when the header declares none
    pub sram: Vec<u8>,
    /// Set by the first write to `sram`
    pub sram_dirty: bool,
    pub video: VideoTiming,
    pub io: IoPorts,
    pub sysctrl: SysCtrl,
    pub pico: PicoIo,
    pub gate: GateArray,
    pub prg_ram: CellMemory,
    pub word_ram: CellMemory,
    /// Mega-CD internal backup RAM, mapped on odd addresses
    pub backup_ram: Vec<u8>,
    pub ram_cart: Vec<u8>,
    psg_writes: Vec<u8>,
    main_irq: u8,
    sub_irq: u8,
}

fn alloc_bytes(len: usize) -> Result<Vec<u8>, MegaDriveError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| MegaDriveError::OutOfMemory(len))?;
    v.resize(len, 0);
    Ok(v)
}

fn pico_region_bits(region: Region) -> u8 {
    match region {
        Region::Japan => 0x00,
        Region::Europe => 0x20,
        Region::Us => 0x40,
    }
}

impl Hardware {
    pub fn new(
        kind: HardwareKind,
        rom: CellMemory,
        region: Region,
        options: &CoreOptions,
    ) -> Result<Self, MegaDriveError> {
        let cd = kind == HardwareKind::MegaCd;
        let (prg_ram, word_ram, backup_ram) = if cd {
            (
                CellMemory::zeroed(PRG_RAM_SIZE)?,
                CellMemory::zeroed(WORD_RAM_SIZE)?,
                alloc_bytes(BACKUP_RAM_SIZE)?,
            )
        } else {
            (CellMemory::default(), CellMemory::default(), Vec::new())
        };
        let ram_cart = if cd && options.ram_cart {
            alloc_bytes(0x2000 << RAM_CART_SIZE_CODE)?
        } else {
            Vec::new()
        };

        Ok(Self {
            kind,
            rom,
            ram: CellMemory::zeroed(WORK_RAM_SIZE)?,
            sram: Vec::new(),
            sram_dirty: false,
            video: VideoTiming::new(region.is_pal()),
            io: IoPorts::new(
                [options.input1, options.input2],
                region.overseas(),
                region.is_pal(),
                cd,
            ),
            sysctrl: SysCtrl::default(),
            pico: PicoIo::new(pico_region_bits(region)),
            gate: GateArray::new(),
            prg_ram,
            word_ram,
            backup_ram,
            ram_cart,
            psg_writes: Vec::new(),
            main_irq: 0,
            sub_irq: 0,
        })
    }

    pub fn set_sram_size(&mut self, len: usize) -> Result<(), MegaDriveError> {
        self.sram = alloc_bytes(len)?;
        self.sram_dirty = false;
        Ok(())
    }

    /// Volatile state back to power-on; loaded images and battery RAM stay.
    pub fn reset(&mut self) {
        self.ram.fill(0);
        self.video.reset();
        self.io.reset();
        self.sysctrl = SysCtrl::default();
        let r1 = self.pico.r1;
        self.pico = PicoIo::new(r1);
        self.gate.reset();
        self.prg_ram.fill(0);
        self.word_ram.fill(0);
        self.psg_writes.clear();
        self.main_irq = 0;
        self.sub_irq = 0;
    }

    pub fn raise_main(&mut self, level: u8) {
        self.main_irq |= 1 << (level & 7);
    }

    pub fn raise_sub(&mut self, level: u8) {
        self.sub_irq |= 1 << (level & 7);
    }

    /// Interrupt levels raised by devices since the last call, as a bitmask
    pub fn take_main_irqs(&mut self) -> u8 {
        std::mem::take(&mut self.main_irq)
    }

    pub fn take_sub_irqs(&mut self) -> u8 {
        std::mem::take(&mut self.sub_irq)
    }

    pub fn take_psg(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.psg_writes)
    }

    fn prg_window(&self, off: u32) -> u32 {
        self.gate.prg_bank() * PRG_WINDOW_SIZE + (off % PRG_WINDOW_SIZE)
    }

    fn odd_byte(mem: &[u8], off: u32) -> Option<usize> {
        if off & 1 == 0 || mem.is_empty() {
            None
        } else {
            Some((off as usize >> 1) % mem.len())
        }
    }

    fn sram_index(&self, off: u32) -> Option<usize> {
        (!self.sram.is_empty()).then(|| off as usize % self.sram.len())
    }

    fn sram_write(&mut self, off: u32, val: u8) {
        if let Some(i) = self.sram_index(off) {
            self.sram[i] = val;
            self.sram_dirty = true;
        }
    }

    pub fn read8(&mut self, handler: Handler, off: u32, addr: u32) -> u8 {
        match handler {
            Handler::Rom => self.rom.read8(off),
            Handler::WorkRam => self.ram.read8(off),
            Handler::Sram => self.sram_index(off).map_or(0, |i| self.sram[i]),
            Handler::Video => {
                let w = self.video.read16(off);
                if addr & 1 == 0 {
                    (w >> 8) as u8
                } else {
                    w as u8
                }
            }
            Handler::Io => self.io.read8(off),
            Handler::SysCtrl => self.sysctrl.read8(off),
            Handler::PicoIo => self.pico.read8(off),
            Handler::MainGate => self.gate.main_read8(off),
            Handler::PrgWindow => self.prg_ram.read8(self.prg_window(off)),
            Handler::WordRam => self.word_ram.read8(off),
            Handler::SubGate => self.gate.sub_read8(off),
            Handler::PrgRam => self.prg_ram.read8(off),
            Handler::BackupRam => {
                Self::odd_byte(&self.backup_ram, off).map_or(0, |i| self.backup_ram[i])
            }
            Handler::RamCart => Self::odd_byte(&self.ram_cart, off).map_or(0, |i| self.ram_cart[i]),
            Handler::RamCartId => RAM_CART_SIZE_CODE,
        }
    }

    pub fn read16(&mut self, handler: Handler, off: u32, addr: u32) -> u16 {
        let pair = |hi: u8, lo: u8| ((hi as u16) << 8) | lo as u16;
        match handler {
            Handler::Rom => self.rom.read16(off),
            Handler::WorkRam => self.ram.read16(off),
            Handler::Sram => pair(
                self.read8(handler, off & !1, addr & !1),
                self.read8(handler, off | 1, addr | 1),
            ),
            Handler::Video => self.video.read16(off),
            Handler::Io => {
                let v = self.io.read8(off | 1);
                pair(v, v)
            }
            Handler::SysCtrl => pair(self.sysctrl.read8(off), 0),
            Handler::PicoIo => self.pico.read16(off),
            Handler::MainGate => pair(self.gate.main_read8(off), self.gate.main_read8(off | 1)),
            Handler::PrgWindow => self.prg_ram.read16(self.prg_window(off)),
            Handler::WordRam => self.word_ram.read16(off),
            Handler::SubGate => pair(self.gate.sub_read8(off), self.gate.sub_read8(off | 1)),
            Handler::PrgRam => self.prg_ram.read16(off),
            Handler::BackupRam | Handler::RamCart | Handler::RamCartId => {
                self.read8(handler, off | 1, addr | 1) as u16
            }
        }
    }

    pub fn write8(&mut self, handler: Handler, off: u32, addr: u32, val: u8) {
        match handler {
            Handler::Rom | Handler::RamCartId => {}
            Handler::WorkRam => self.ram.write8(off, val),
            Handler::Sram => self.sram_write(off, val),
            Handler::Video => {
                if addr & 0xFF_FFF9 == 0xC0_0011 {
                    self.psg_writes.push(val);
                } else if let Some(level) = self.video.write16(off, u16::from_be_bytes([val, val])) {
                    self.raise_main(level);
                }
            }
            Handler::Io => self.io.write8(off, val),
            Handler::SysCtrl => self.sysctrl.write8(off, val),
            Handler::PicoIo => self.pico.write8(off, val),
            Handler::MainGate => self.gate.main_write8(off, val),
            Handler::PrgWindow => {
                let o = self.prg_window(off);
                self.prg_ram.write8(o, val);
            }
            Handler::WordRam => self.word_ram.write8(off, val),
            Handler::SubGate => self.gate.sub_write8(off, val),
            Handler::PrgRam => self.prg_ram.write8(off, val),
            Handler::BackupRam => {
                if let Some(i) = Self::odd_byte(&self.backup_ram, off) {
                    self.backup_ram[i] = val;
                }
            }
            Handler::RamCart => {
                if let Some(i) = Self::odd_byte(&self.ram_cart, off) {
                    self.ram_cart[i] = val;
                }
            }
        }
    }

    pub fn write16(&mut self, handler: Handler, off: u32, addr: u32, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        match handler {
            Handler::Rom | Handler::RamCartId => {}
            Handler::WorkRam => self.ram.write16(off, val),
            Handler::Sram => {
                self.sram_write(off & !1, hi);
                self.sram_write(off | 1, lo);
            }
            Handler::Video => {
                if addr & 0xFF_FFF8 == 0xC0_0010 {
                    self.psg_writes.push(lo);
                } else if let Some(level) = self.video.write16(off, val) {
                    self.raise_main(level);
                }
            }
            Handler::Io => self.io.write8(off | 1, lo),
            Handler::SysCtrl => self.sysctrl.write8(off, hi),
            Handler::PicoIo => self.pico.write16(off, val),
            Handler::MainGate => {
                self.gate.main_write8(off, hi);
                self.gate.main_write8(off | 1, lo);
            }
            Handler::PrgWindow => {
                let o = self.prg_window(off);
                self.prg_ram.write16(o, val);
            }
            Handler::WordRam => self.word_ram.write16(off, val),
            Handler::SubGate => {
                self.gate.sub_write8(off, hi);
                self.gate.sub_write8(off | 1, lo);
            }
            Handler::PrgRam => self.prg_ram.write16(off, val),
            Handler::BackupRam | Handler::RamCart => self.write8(handler, off | 1, addr | 1, lo),
        }
    }

    /// Registers of the devices common to every machine kind
    pub fn transfer_devices(&mut self, s: &mut StateStream) {
        self.video.transfer_state(s);
        self.io.transfer_state(s);
        self.sysctrl.transfer_state(s);
        s.transfer_u8(&mut self.main_irq);
        s.transfer_u8(&mut self.sub_irq);
    }
}
