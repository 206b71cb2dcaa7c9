//! Memory-mapped device registers.
//!
//! Only the timing and signalling side of each chip is modelled: pixel and
//! sound generation belong to the frontend's sinks.

use crate::options::InputDevice;
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::state_stream::StateStream;

/// H-interrupt pending bit in the video status
pub const HINT_PENDING: u8 = 0x10;
/// V-interrupt pending bit in the video status
pub const VINT_PENDING: u8 = 0x20;

/// Video timing and interrupt generation (0xC00000-0xC0001F).
#[derive(Debug, Clone)]
pub struct VideoTiming {
    pub regs: [u8; 0x20],
    pub pending_ints: u8,
    pub pal: bool,
    pub vblank: bool,
    pub line: u16,
    hint_counter: i16,
    command_pending: bool,
    command: u32,
}

impl VideoTiming {
    pub fn new(pal: bool) -> Self {
        Self {
            regs: [0; 0x20],
            pending_ints: 0,
            pal,
            vblank: false,
            line: 0,
            hint_counter: 0,
            command_pending: false,
            command: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.pal);
    }

    pub fn hint_enabled(&self) -> bool {
        self.regs[0] & 0x10 != 0
    }

    pub fn vint_enabled(&self) -> bool {
        self.regs[1] & 0x20 != 0
    }

    /// 240 lines needs PAL and the V30 bit
    pub fn display_height(&self) -> u16 {
        if self.pal && self.regs[1] & 0x08 != 0 {
            240
        } else {
            224
        }
    }

    pub fn frame_start(&mut self) {
        self.vblank = false;
        self.hint_counter = self.regs[10] as i16;
    }

    /// Count one active line; true when an enabled H-interrupt fires.
    pub fn hint_tick(&mut self) -> bool {
        self.hint_counter -= 1;
        if self.hint_counter < 0 {
            self.hint_counter = self.regs[10] as i16;
            self.pending_ints |= HINT_PENDING;
            return self.hint_enabled();
        }
        false
    }

    /// Enter vertical blank; true when the V-interrupt is enabled.
    pub fn vint_begin(&mut self) -> bool {
        self.vblank = true;
        self.pending_ints |= VINT_PENDING;
        self.vint_enabled()
    }

    /// CPU took the interrupt at `level`. Taking the H-interrupt drops a
    /// pending V-interrupt flag as well.
    pub fn acknowledge(&mut self, level: u8) {
        match level {
            4 => self.pending_ints = 0,
            6 => self.pending_ints &= !VINT_PENDING,
            _ => {}
        }
    }

    pub fn status(&mut self) -> u16 {
        self.command_pending = false;
        let mut s = 0x3400;
        if self.pending_ints & VINT_PENDING != 0 {
            s |= 0x80;
        }
        if self.vblank {
            s |= 0x08;
        }
        if self.pal {
            s |= 0x01;
        }
        s
    }

    pub fn hv_counter(&self) -> u16 {
        (self.line & 0xFF) << 8
    }

    /// Control port write. Returns an interrupt level when enabling it
    /// uncovers an interrupt that is already pending.
    pub fn write_control(&mut self, val: u16) -> Option<u8> {
        if self.command_pending {
            self.command_pending = false;
            self.command = (self.command << 16) | val as u32;
            return None;
        }
        if val & 0xC000 != 0x8000 {
            self.command_pending = true;
            self.command = val as u32;
            return None;
        }

        let reg = ((val >> 8) & 0x1F) as usize;
        let old = self.regs[reg];
        self.regs[reg] = val as u8;
        let enabled = |bit: u8| old & bit == 0 && self.regs[reg] & bit != 0;
        match reg {
            0 if enabled(0x10) && self.pending_ints & HINT_PENDING != 0 => Some(4),
            1 if enabled(0x20) && self.pending_ints & VINT_PENDING != 0 => Some(6),
            _ => None,
        }
    }

    pub fn read16(&mut self, off: u32) -> u16 {
        match off & 0x1E {
            0x00 | 0x02 => {
                log(LogCategory::Stubs, LogLevel::Trace, || {
                    "video data port read".to_string()
                });
                0
            }
            0x04 | 0x06 => self.status(),
            _ => self.hv_counter(),
        }
    }

    /// Returns a level to raise on the main CPU, if any
    pub fn write16(&mut self, off: u32, val: u16) -> Option<u8> {
        match off & 0x1E {
            0x00 | 0x02 => {
                log(LogCategory::Stubs, LogLevel::Trace, || {
                    format!("video data port write {:04X}", val)
                });
                None
            }
            0x04 | 0x06 => self.write_control(val),
            _ => None,
        }
    }

    pub fn transfer_state(&mut self, s: &mut StateStream) {
        s.transfer(&mut self.regs);
        s.transfer_u8(&mut self.pending_ints);
        s.transfer_bool(&mut self.vblank);
        s.transfer_u16(&mut self.line);
        let mut counter = self.hint_counter as u16;
        s.transfer_u16(&mut counter);
        self.hint_counter = counter as i16;
        s.transfer_bool(&mut self.command_pending);
        s.transfer_u32(&mut self.command);
    }
}

/// Controller ports and version register (0xA10000-0xA1001F).
#[derive(Debug, Clone)]
pub struct IoPorts {
    pub devices: [InputDevice; 2],
    pub overseas: bool,
    pub pal: bool,
    pub cd_attached: bool,
    data: [u8; 3],
    ctrl: [u8; 3],
    th_phase: [u8; 2],
    pads: [u16; 2],
}

impl IoPorts {
    pub fn new(devices: [InputDevice; 2], overseas: bool, pal: bool, cd_attached: bool) -> Self {
        Self {
            devices,
            overseas,
            pal,
            cd_attached,
            data: [0; 3],
            ctrl: [0; 3],
            th_phase: [0; 2],
            pads: [0; 2],
        }
    }

    pub fn reset(&mut self) {
        self.data = [0; 3];
        self.ctrl = [0; 3];
        self.th_phase = [0; 2];
    }

    pub fn set_pads(&mut self, pads: [u16; 2]) {
        self.pads = pads;
    }

    /// 6-button pads fall back to the 3-button sequence each frame
    pub fn frame_end(&mut self) {
        self.th_phase = [0; 2];
    }

    pub fn version(&self) -> u8 {
        let mut v = 0;
        if self.overseas {
            v |= 0x80;
        }
        if self.pal {
            v |= 0x40;
        }
        if !self.cd_attached {
            v |= 0x20;
        }
        v
    }

    /// Pad lines as seen with the given output bits (TH in bit 6)
    fn read_pad(&self, port: usize, out_bits: u8) -> u8 {
        let pad = !self.pads[port];
        let th = out_bits & 0x40;
        let value = match self.devices[port] {
            InputDevice::None => return 0x7F,
            InputDevice::SixButton if self.th_phase[port] == 2 && th == 0 => {
                ((pad & 0xC0) >> 2) as u8
            }
            InputDevice::SixButton if self.th_phase[port] == 3 => {
                return if th != 0 {
                    ((pad & 0x30) | ((pad >> 8) & 0x0F)) as u8 | 0x40
                } else {
                    ((pad & 0xC0) >> 2) as u8 | 0x0F
                };
            }
            _ if th != 0 => (pad & 0x3F) as u8,
            _ => (((pad & 0xC0) >> 2) | (pad & 0x03)) as u8,
        };
        value | th
    }

    pub fn read8(&mut self, off: u32) -> u8 {
        match (off & 0x1F) >> 1 {
            0 => self.version(),
            p @ 1..=2 => {
                let port = p as usize - 1;
                let ctrl = self.ctrl[port];
                let input = self.read_pad(port, self.data[port] & ctrl);
                (self.data[port] & 0x80) | (self.data[port] & ctrl & 0x7F) | (input & !ctrl & 0x7F)
            }
            3 => 0x7F,
            p @ 4..=6 => self.ctrl[p as usize - 4],
            _ => 0,
        }
    }

    pub fn write8(&mut self, off: u32, val: u8) {
        match (off & 0x1F) >> 1 {
            p @ 1..=3 => {
                let port = p as usize - 1;
                if port < 2 && self.data[port] & 0x40 == 0 && val & 0x40 != 0 {
                    self.th_phase[port] = self.th_phase[port].wrapping_add(1);
                }
                self.data[port] = val;
            }
            p @ 4..=6 => self.ctrl[p as usize - 4] = val,
            _ => log(LogCategory::Bus, LogLevel::Debug, || {
                format!("io write {:02X} <- {:02X}", off, val)
            }),
        }
    }

    pub fn transfer_state(&mut self, s: &mut StateStream) {
        s.transfer(&mut self.data);
        s.transfer(&mut self.ctrl);
        s.transfer(&mut self.th_phase);
    }
}

/// Z80 bus request / reset lines (0xA11000-0xA11FFF). No Z80 runs, so the
/// bus is always reported as granted.
#[derive(Debug, Clone, Default)]
pub struct SysCtrl {
    pub z80_busreq: bool,
    pub z80_reset: bool,
}

impl SysCtrl {
    pub fn read8(&self, off: u32) -> u8 {
        match off & 0xF01 {
            // bit 0 clear: bus granted
            0x100 => 0x80,
            0x200 => self.z80_reset as u8,
            _ => 0,
        }
    }

    pub fn write8(&mut self, off: u32, val: u8) {
        match off & 0xF01 {
            0x100 => self.z80_busreq = val & 1 != 0,
            0x200 => self.z80_reset = val & 1 != 0,
            _ => {}
        }
    }

    pub fn transfer_state(&mut self, s: &mut StateStream) {
        s.transfer_bool(&mut self.z80_busreq);
        s.transfer_bool(&mut self.z80_reset);
    }
}

/// PCM FIFO buffer size of the Pico speech chip
pub const PCM_BUFFER_SIZE: usize = 0x400;

/// Playback rate selected by the low bits of the control word
const PCM_RATES: [u32; 8] = [16000, 12000, 8000, 6000, 5000, 4000, 4000, 4000];

/// Pico I/O block (0x800000-0x80001F): pad, pen, storyware page, PCM FIFO.
#[derive(Debug, Clone)]
pub struct PicoIo {
    pub r1: u8,
    pub pad: u16,
    pub pen_pos: [u16; 2],
    pub page: u8,
    pub fifo_bytes: u16,
    pub r12: u16,
    pub rate: u32,
    pcm: Vec<u8>,
    overflowed: bool,
}

impl PicoIo {
    pub fn new(r1: u8) -> Self {
        Self {
            r1,
            pad: 0,
            pen_pos: [0; 2],
            page: 0,
            fifo_bytes: 0,
            r12: 0,
            rate: PCM_RATES[0],
            pcm: Vec::with_capacity(PCM_BUFFER_SIZE),
            overflowed: false,
        }
    }

    fn rerate(&mut self) {
        self.rate = PCM_RATES[(self.r12 & 7) as usize];
        log(LogCategory::Bus, LogLevel::Debug, || {
            format!("pico pcm rate {} Hz (r12={:04X})", self.rate, self.r12)
        });
    }

    pub fn read8(&self, off: u32) -> u8 {
        match off & 0x1F {
            0x01 => self.r1,
            0x03 => {
                let d = (self.pad & 0x1F) | ((self.pad & 0x20) << 2);
                !(d as u8)
            }
            0x05 => (self.pen_pos[0] >> 8) as u8,
            0x07 => self.pen_pos[0] as u8,
            0x09 => (self.pen_pos[1] >> 8) as u8,
            0x0B => self.pen_pos[1] as u8,
            0x0D => ((1u16 << (self.page & 7)) - 1) as u8,
            0x12 => {
                if self.fifo_bytes == 0 {
                    0x80
                } else {
                    0
                }
            }
            other => {
                log(LogCategory::Bus, LogLevel::Debug, || {
                    format!("pico io r8 {:02X}", other)
                });
                0
            }
        }
    }

    pub fn read16(&self, off: u32) -> u16 {
        match off & 0x1E {
            0x10 => 0x3F_u16.saturating_sub(self.fifo_bytes),
            0x12 => {
                if self.fifo_bytes == 0 {
                    0x8000
                } else {
                    0
                }
            }
            _ => self.read8(off | 1) as u16,
        }
    }

    pub fn write8(&mut self, off: u32, val: u8) {
        match off & 0x1F {
            // 'S' 'E' 'G' 'A'
            0x19 | 0x1B | 0x1D | 0x1F => {}
            other => log(LogCategory::Bus, LogLevel::Debug, || {
                format!("pico io w8 {:02X} <- {:02X}", other, val)
            }),
        }
    }

    pub fn write16(&mut self, off: u32, val: u16) {
        match off & 0x1E {
            0x10 => {
                self.fifo_bytes = self.fifo_bytes.saturating_add(2);
                if self.pcm.len() < PCM_BUFFER_SIZE {
                    self.pcm.extend_from_slice(&val.to_be_bytes());
                } else if !self.overflowed {
                    self.overflowed = true;
                    log(LogCategory::Bus, LogLevel::Warn, || {
                        "pico pcm buffer overflow".to_string()
                    });
                }
            }
            0x12 => {
                let old = self.r12;
                self.r12 = val;
                if old != val {
                    self.rerate();
                }
            }
            other => log(LogCategory::Bus, LogLevel::Debug, || {
                format!("pico io w16 {:02X} <- {:04X}", other, val)
            }),
        }
    }

    pub fn pcm_pending(&self) -> &[u8] {
        &self.pcm
    }

    /// Hand the buffered samples out and empty the FIFO
    pub fn drain_pcm(&mut self) -> Vec<u8> {
        self.fifo_bytes = 0;
        self.overflowed = false;
        std::mem::take(&mut self.pcm)
    }

    pub fn transfer_state(&mut self, s: &mut StateStream) {
        s.transfer_u8(&mut self.page);
        s.transfer_u16(&mut self.pen_pos[0]);
        s.transfer_u16(&mut self.pen_pos[1]);
        s.transfer_u16(&mut self.fifo_bytes);
        s.transfer_u16(&mut self.r12);
        if s.is_reading() {
            self.rate = PCM_RATES[(self.r12 & 7) as usize];
            self.pcm.clear();
            self.overflowed = false;
        }
    }
}

/// Mega-CD gate array: registers seen by the main CPU at 0xA12000 and by
/// the sub CPU at 0xFF8000. Offsets 0x0E-0x2F are the shared communication
/// block; the main CPU owns 0x0E and 0x10-0x1F, the sub CPU 0x0F and 0x20-0x2F.
#[derive(Debug, Clone)]
pub struct GateArray {
    main: [u8; 4],
    sub: Vec<u8>,
    comm: [u8; 0x30],
    ifl2: bool,
    sub_reset: bool,
}

impl Default for GateArray {
    fn default() -> Self {
        Self::new()
    }
}

impl GateArray {
    pub fn new() -> Self {
        Self {
            main: [0; 4],
            sub: vec![0; 0x200],
            comm: [0; 0x30],
            ifl2: false,
            sub_reset: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// SRES: sub CPU running
    pub fn sub_released(&self) -> bool {
        self.main[1] & 0x01 != 0
    }

    /// SBRQ: main CPU holds the sub bus
    pub fn sub_bus_requested(&self) -> bool {
        self.main[1] & 0x02 != 0
    }

    pub fn sub_running(&self) -> bool {
        self.sub_released() && !self.sub_bus_requested()
    }

    pub fn prg_bank(&self) -> u32 {
        (self.main[3] >> 6) as u32 & 3
    }

    /// Sub CPU interrupt eligibility mask (register 0x33)
    pub fn sub_int_mask(&self) -> u8 {
        self.sub[0x33]
    }

    pub fn take_ifl2(&mut self) -> bool {
        std::mem::take(&mut self.ifl2)
    }

    /// SRES went from 0 to 1 since the last call
    pub fn take_sub_reset(&mut self) -> bool {
        std::mem::take(&mut self.sub_reset)
    }

    pub fn main_read8(&self, off: u32) -> u8 {
        match off & 0x3F {
            o @ 0..=3 => self.main[o as usize],
            o @ 0x0E..=0x2F => self.comm[o as usize],
            _ => 0,
        }
    }

    pub fn main_write8(&mut self, off: u32, val: u8) {
        match off & 0x3F {
            0 => {
                if val & 0x01 != 0 {
                    self.ifl2 = true;
                }
                self.main[0] = val & 0xFE;
            }
            1 => {
                if !self.sub_released() && val & 0x01 != 0 {
                    self.sub_reset = true;
                }
                self.main[1] = val & 0x03;
            }
            o @ 2..=3 => self.main[o as usize] = val,
            o @ (0x0E | 0x10..=0x1F) => self.comm[o as usize] = val,
            o => log(LogCategory::Bus, LogLevel::Debug, || {
                format!("main gate write {:02X} <- {:02X} ignored", o, val)
            }),
        }
    }

    pub fn sub_read8(&self, off: u32) -> u8 {
        match off & 0x1FF {
            o @ 0x0E..=0x2F => self.comm[o as usize],
            o => self.sub[o as usize],
        }
    }

    pub fn sub_write8(&mut self, off: u32, val: u8) {
        match off & 0x1FF {
            o @ (0x0F | 0x20..=0x2F) => self.comm[o as usize] = val,
            o @ (0x0E | 0x10..=0x1F) => log(LogCategory::Bus, LogLevel::Debug, || {
                format!("sub write to main-owned comm {:02X} ignored", o)
            }),
            o => self.sub[o as usize] = val,
        }
    }

    pub fn transfer_state(&mut self, s: &mut StateStream) {
        s.transfer(&mut self.main);
        s.transfer(&mut self.sub);
        s.transfer(&mut self.comm);
        s.transfer_bool(&mut self.ifl2);
        s.transfer_bool(&mut self.sub_reset);
    }
}
