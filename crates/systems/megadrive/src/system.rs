//! Emulation session: owns the machine built for the loaded media and
//! drives it one frame at a time.

use crate::bus::{BusMap, ContextBus, Handler, Region as BusRegion};
use crate::context::{ContextKind, CpuContext};
use crate::disks::{DiskError, DiskSlots};
use crate::hardware::Hardware;
use crate::idle::{IdleDetector, PatchOverlay};
use crate::media::{
    classify, find_firmware, read_firmware, CartHeader, HardwareKind, MediaImage, Region,
    SramInfo,
};
use crate::memory::{load_bytes, CellMemory};
use crate::options::CoreOptions;
use crate::state::{self, StateView};
use crate::MegaDriveError;
use emu_core::cpu_m68k::Memory68k;
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::state_stream::StateStream;
use emu_core::types::{AudioSink, FrameReport, InputSnapshot, VideoMode, VideoSink};
use emu_core::{MountPointInfo, System};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

pub const NTSC_LINES: u16 = 262;
pub const PAL_LINES: u16 = 313;
/// Main 68000 cycles per scanline
pub const MAIN_CYCLES_PER_LINE: u64 = 488;
/// Sub 68000 cycles per scanline
pub const SUB_CYCLES_PER_LINE: u64 = 795;

const CARTRIDGE_MOUNT: &str = "cartridge";
const DISC_MOUNT: &str = "disc";
/// Largest cartridge address space
const MAX_ROM_WINDOW: usize = 0x40_0000;

/// Everything that exists only while media is loaded
struct Machine {
    image: MediaImage,
    kind: HardwareKind,
    region: Region,
    hw: Rc<RefCell<Hardware>>,
    main: CpuContext,
    sub: Option<CpuContext>,
    detector: IdleDetector,
    overlay: PatchOverlay,
    frame: u64,
    /// CRC-32 of the program image as loaded, before any patching
    program_crc: u32,
    /// Disc in the drive; `None` with the tray empty
    disc: Option<MediaImage>,
}

impl Machine {
    fn with_state<R>(&mut self, f: impl FnOnce(&mut StateView) -> R) -> R {
        let mut hw = self.hw.borrow_mut();
        let mut view = StateView {
            kind: self.kind,
            program_crc: self.program_crc,
            hw: &mut *hw,
            main: &mut self.main,
            sub: self.sub.as_mut(),
            detector: &mut self.detector,
            overlay: &mut self.overlay,
            frame: &mut self.frame,
        };
        f(&mut view)
    }

    fn state_size(&mut self) -> Result<usize, MegaDriveError> {
        let mut s = StateStream::probe();
        self.with_state(|v| state::save(v, &mut s))?;
        Ok(s.capacity())
    }

    fn save_state(&mut self, buf: &mut [u8]) -> Result<usize, MegaDriveError> {
        let mut s = StateStream::writer(buf);
        self.with_state(|v| state::save(v, &mut s))?;
        Ok(s.position())
    }

    fn load_state(&mut self, buf: &[u8]) -> Result<(), MegaDriveError> {
        let mut s = StateStream::reader(buf);
        self.with_state(|v| state::load(v, &mut s))
    }

    fn reset(&mut self) -> Result<(), MegaDriveError> {
        self.hw.borrow_mut().reset();
        self.main.reset()?;
        if let Some(sub) = self.sub.as_mut() {
            sub.reset()?;
        }
        Ok(())
    }

    /// Gate-array signals from the main CPU to the sub CPU
    fn bridge_sub(&mut self) -> bool {
        let Some(sub) = self.sub.as_mut() else {
            return false;
        };
        let (ifl2, released, running) = {
            let mut hw = self.hw.borrow_mut();
            (hw.gate.take_ifl2(), hw.gate.take_sub_reset(), hw.gate.sub_running())
        };
        if released {
            log(LogCategory::CPU, LogLevel::Debug, || "sub CPU released from reset".to_string());
            if let Err(e) = sub.reset() {
                log(LogCategory::CPU, LogLevel::Error, || format!("sub reset failed: {}", e));
            }
        }
        if ifl2 {
            sub.raise(2);
        }
        running
    }

    fn run_frame(
        &mut self,
        input: InputSnapshot,
        options: &CoreOptions,
        video: &mut dyn VideoSink,
        audio: &mut dyn AudioSink,
    ) -> FrameReport {
        let (pal, height) = {
            let mut hw = self.hw.borrow_mut();
            hw.io.set_pads(input.pads);
            if self.kind == HardwareKind::Pico {
                hw.pico.pad = input.pads[0];
            }
            hw.video.frame_start();
            (hw.video.pal, hw.video.display_height())
        };
        video.begin_frame(&VideoMode {
            pal,
            height,
            sprite_limit: !options.no_sprite_limit,
        });

        let lines = if pal { PAL_LINES } else { NTSC_LINES };
        let skips_before = self.main.idle_skips + self.sub.as_ref().map_or(0, |s| s.idle_skips);
        let mut report = FrameReport::default();

        for line in 0..lines {
            {
                let mut hw = self.hw.borrow_mut();
                hw.video.line = line;
                if line < height {
                    if hw.video.hint_tick() {
                        hw.raise_main(4);
                    }
                } else if line == height && hw.video.vint_begin() {
                    hw.raise_main(6);
                }
            }
            if line < height {
                video.scanline(line);
            }

            self.main.cycles_aim += MAIN_CYCLES_PER_LINE;
            report.main_cycles += self.main.run(Some(&mut self.detector));

            if self.bridge_sub() {
                if let Some(sub) = self.sub.as_mut() {
                    sub.cycles_aim += SUB_CYCLES_PER_LINE;
                    report.sub_cycles += sub.run(None);
                }
            }
        }

        {
            let mut hw = self.hw.borrow_mut();
            for b in hw.take_psg() {
                audio.psg_write(b);
            }
            if !hw.pico.pcm_pending().is_empty() {
                let rate = hw.pico.rate;
                let pcm = hw.pico.drain_pcm();
                audio.pcm_data(&pcm, rate);
            }
            hw.io.frame_end();
        }

        self.main.end_frame();
        if let Some(sub) = self.sub.as_mut() {
            sub.end_frame();
        }
        self.frame += 1;

        if self.detector.frame_tick(self.frame) {
            let mut hw = self.hw.borrow_mut();
            self.detector.finish(&mut hw.rom, &mut self.overlay);
        }
        video.end_frame(self.frame);

        report.frame = self.frame;
        report.idle_skips =
            self.main.idle_skips + self.sub.as_ref().map_or(0, |s| s.idle_skips) - skips_before;
        report
    }
}

/// Power-of-two window holding `len` bytes, as a region mask
fn window_mask(len: usize) -> u32 {
    let size = len.max(2).next_power_of_two().min(MAX_ROM_WINDOW) as u32;
    !(size - 1) & 0xFF_FFFF
}

/// Region and buffer size for header-declared backup RAM
fn sram_region(info: SramInfo) -> (BusRegion, usize) {
    let span = (info.end - info.start + 1) as usize;
    let mask = window_mask(span);
    let size = (!mask & 0xFF_FFFF) as usize + 1;
    (BusRegion::new("sram", info.start, mask, Handler::Sram), size)
}

fn console_regions(pico: bool) -> Vec<BusRegion> {
    let mut regions = Vec::new();
    if pico {
        regions.push(BusRegion::new("pico io", 0x80_0000, 0xFF_FFE0, Handler::PicoIo));
    } else {
        regions.push(BusRegion::new("io", 0xA1_0000, 0xFF_FFE0, Handler::Io));
        regions.push(BusRegion::new("sysctrl", 0xA1_1000, 0xFF_F000, Handler::SysCtrl));
    }
    // the Pico decodes only 16 bytes of the video port block
    let video_mask = if pico { 0xFF_FFF0 } else { 0xFF_FFE0 };
    regions.push(BusRegion::new("video", 0xC0_0000, video_mask, Handler::Video));
    regions.push(BusRegion::new("work ram", 0xE0_0000, 0xE0_0000, Handler::WorkRam));
    regions
}

fn cd_main_regions(ram_cart: bool) -> Vec<BusRegion> {
    let mut regions = vec![
        BusRegion::new("firmware", 0x00_0000, 0xFE_0000, Handler::Rom),
        BusRegion::new("prg window", 0x02_0000, 0xFE_0000, Handler::PrgWindow),
        BusRegion::new("word ram", 0x20_0000, 0xFC_0000, Handler::WordRam),
    ];
    if ram_cart {
        regions.push(BusRegion::new("ram cart id", 0x40_0000, 0xFF_0000, Handler::RamCartId));
        regions.push(BusRegion::new("ram cart", 0x60_0000, 0xFE_0000, Handler::RamCart));
    }
    regions.push(BusRegion::new("gate", 0xA1_2000, 0xFF_FFC0, Handler::MainGate));
    regions.extend(console_regions(false));
    regions
}

fn cd_sub_regions() -> Vec<BusRegion> {
    vec![
        BusRegion::new("prg ram", 0x00_0000, 0xF8_0000, Handler::PrgRam),
        BusRegion::new("word ram", 0x08_0000, 0xFC_0000, Handler::WordRam),
        BusRegion::new("backup ram", 0xFE_0000, 0xFF_0000, Handler::BackupRam),
        BusRegion::new("gate", 0xFF_8000, 0xFF_FE00, Handler::SubGate),
    ]
}

/// A Mega Drive / Mega-CD / Pico session.
///
/// Created empty; `load_image` builds the machine for a piece of media and
/// `run_frame` advances it. A failed load leaves the session empty.
pub struct MegaDriveSystem {
    machine: Option<Machine>,
    options: CoreOptions,
    system_dir: PathBuf,
    disks: DiskSlots,
}

impl MegaDriveSystem {
    /// `system_dir` is searched for Mega-CD firmware
    pub fn new(system_dir: impl Into<PathBuf>, options: CoreOptions) -> Self {
        Self {
            machine: None,
            options,
            system_dir: system_dir.into(),
            disks: DiskSlots::new(),
        }
    }

    pub fn options(&self) -> &CoreOptions {
        &self.options
    }

    pub fn is_loaded(&self) -> bool {
        self.machine.is_some()
    }

    pub fn image(&self) -> Option<&MediaImage> {
        self.machine.as_ref().map(|m| &m.image)
    }

    pub fn hardware_kind(&self) -> Option<HardwareKind> {
        self.machine.as_ref().map(|m| m.kind)
    }

    pub fn region(&self) -> Option<Region> {
        self.machine.as_ref().map(|m| m.region)
    }

    pub fn frame(&self) -> u64 {
        self.machine.as_ref().map_or(0, |m| m.frame)
    }

    /// Patched idle branches: `(address, original, patched)`
    pub fn idle_patches(&self) -> Vec<(u32, u16, u16)> {
        self.machine
            .as_ref()
            .map(|m| m.overlay.iter().collect())
            .unwrap_or_default()
    }

    pub fn idle_detector(&self) -> Option<&IdleDetector> {
        self.machine.as_ref().map(|m| &m.detector)
    }

    pub fn main_context(&self) -> Option<&CpuContext> {
        self.machine.as_ref().map(|m| &m.main)
    }

    pub fn sub_context(&self) -> Option<&CpuContext> {
        self.machine.as_ref().and_then(|m| m.sub.as_ref())
    }

    /// Read a word through the main CPU's bus (debuggers, cheats)
    pub fn peek_word(&mut self, addr: u32) -> Result<u16, MegaDriveError> {
        Ok(self.machine_mut()?.main.cpu.memory.read_word(addr))
    }

    fn machine_mut(&mut self) -> Result<&mut Machine, MegaDriveError> {
        self.machine.as_mut().ok_or(MegaDriveError::NoImageLoaded)
    }

    /// Classify `path` and build the machine for it.
    pub fn load_image(&mut self, path: &Path) -> Result<(), MegaDriveError> {
        self.machine = None;
        self.disks.clear();

        let image = classify(path)?;
        let machine = if image.is_cd() {
            self.build_cd(image)?
        } else {
            self.build_cartridge(image)?
        };
        log(LogCategory::Media, LogLevel::Info, || {
            format!(
                "loaded {} as {:?} ({} region): {}",
                path.display(),
                machine.kind,
                machine.region,
                machine.image.rom_id()
            )
        });
        if machine.kind == HardwareKind::MegaCd {
            self.disks.reset_with(path);
        }
        self.machine = Some(machine);
        Ok(())
    }

    fn build_cartridge(&self, image: MediaImage) -> Result<Machine, MegaDriveError> {
        let data = load_bytes(&image.data_path)?;
        let header = CartHeader::parse(&data);
        header.validate(&data)?;

        let kind = if header.is_pico() {
            HardwareKind::Pico
        } else {
            HardwareKind::MegaDrive
        };
        let region = header.pick_region(self.options.region);
        let program_crc = crc32fast::hash(&data);
        let mut hw = Hardware::new(kind, CellMemory::from_be_bytes(&data)?, region, &self.options)?;

        let rom = BusRegion::new("rom", 0, window_mask(data.len()), Handler::Rom);
        let mut regions = vec![rom];
        if let Some(info) = header.sram {
            let (sram, size) = sram_region(info);
            if sram.overlaps(&rom) {
                log(LogCategory::Media, LogLevel::Warn, || {
                    format!("backup RAM at {:06X} overlaps the ROM, not mapped", info.start)
                });
            } else {
                hw.set_sram_size(size)?;
                regions.push(sram);
            }
        }
        regions.extend(console_regions(kind == HardwareKind::Pico));

        let hw = Rc::new(RefCell::new(hw));
        let map = BusMap::new(regions)?;
        let mut main = CpuContext::new(ContextKind::Main, ContextBus::new(map, Rc::clone(&hw)));
        main.reset()?;

        let mut detector = IdleDetector::new();
        detector.arm(0, data.len());

        Ok(Machine {
            image,
            kind,
            region,
            hw,
            main,
            sub: None,
            detector,
            overlay: PatchOverlay::new(),
            frame: 0,
            program_crc,
            disc: None,
        })
    }

    fn build_cd(&self, image: MediaImage) -> Result<Machine, MegaDriveError> {
        let region = self.options.region.region().unwrap_or(image.region);
        let firmware_path = find_firmware(&self.system_dir, region)?;
        let firmware = read_firmware(&firmware_path)?;
        let program_crc = crc32fast::hash(&firmware);
        let hw = Hardware::new(
            HardwareKind::MegaCd,
            CellMemory::from_be_bytes(&firmware)?,
            region,
            &self.options,
        )?;
        let ram_cart = !hw.ram_cart.is_empty();

        let hw = Rc::new(RefCell::new(hw));
        let main_map = BusMap::new(cd_main_regions(ram_cart))?;
        let sub_map = BusMap::new(cd_sub_regions())?;
        let mut main = CpuContext::new(ContextKind::Main, ContextBus::new(main_map, Rc::clone(&hw)));
        let mut sub = CpuContext::new(ContextKind::Sub, ContextBus::new(sub_map, Rc::clone(&hw)));
        main.reset()?;
        sub.reset()?;

        Ok(Machine {
            disc: Some(image.clone()),
            image,
            kind: HardwareKind::MegaCd,
            region,
            hw,
            main,
            sub: Some(sub),
            detector: IdleDetector::new(),
            overlay: PatchOverlay::new(),
            frame: 0,
            program_crc,
        })
    }

    /// Emulate one frame with `input` held for its whole duration.
    pub fn run_frame(
        &mut self,
        input: InputSnapshot,
        video: &mut dyn VideoSink,
        audio: &mut dyn AudioSink,
    ) -> Result<FrameReport, MegaDriveError> {
        let options = self.options;
        let machine = self.machine_mut()?;
        Ok(machine.run_frame(input, &options, video, audio))
    }

    /// Drop the machine and the disc list
    pub fn shutdown(&mut self) {
        if self.machine.take().is_some() {
            log(LogCategory::Media, LogLevel::Info, || "session shut down".to_string());
        }
        self.disks.clear();
    }

    /// Take new option values. Input devices and the sprite limit apply at
    /// once; region and RAM cartridge changes apply at the next load.
    pub fn options_changed(&mut self, options: CoreOptions) {
        let old = std::mem::replace(&mut self.options, options);
        if let Some(m) = self.machine.as_mut() {
            m.hw.borrow_mut().io.devices = options.devices();
            if old.region != options.region || old.ram_cart != options.ram_cart {
                log(LogCategory::Media, LogLevel::Info, || {
                    "region / RAM cartridge change takes effect on next load".to_string()
                });
            }
        }
    }

    /// Battery-backed memory in file byte order: cartridge SRAM once it
    /// has been written, or the Mega-CD backup RAM. Empty otherwise.
    pub fn save_memory(&self) -> Vec<u8> {
        let Some(m) = self.machine.as_ref() else {
            return Vec::new();
        };
        let hw = m.hw.borrow();
        match m.kind {
            HardwareKind::MegaCd => hw.backup_ram.clone(),
            _ if hw.sram_dirty => hw.sram.clone(),
            _ => Vec::new(),
        }
    }

    /// Restore battery-backed memory saved by `save_memory`. Returns the
    /// number of bytes taken; extra input is ignored.
    pub fn load_save_memory(&mut self, data: &[u8]) -> Result<usize, MegaDriveError> {
        let m = self.machine_mut()?;
        let mut hw = m.hw.borrow_mut();
        let cd = m.kind == HardwareKind::MegaCd;
        let target = if cd { &mut hw.backup_ram } else { &mut hw.sram };
        let n = data.len().min(target.len());
        target[..n].copy_from_slice(&data[..n]);
        if n != data.len() {
            log(LogCategory::Media, LogLevel::Warn, || {
                format!("save memory: {} of {} bytes used", n, data.len())
            });
        }
        if !cd && n > 0 {
            hw.sram_dirty = true;
        }
        Ok(n)
    }

    /// Pen position on the Pico drawing pad
    pub fn set_pico_pen(&mut self, x: u16, y: u16) -> Result<(), MegaDriveError> {
        self.machine_mut()?.hw.borrow_mut().pico.pen_pos = [x, y];
        Ok(())
    }

    /// Storyware page, 0 (closed) to 6
    pub fn set_pico_page(&mut self, page: u8) -> Result<(), MegaDriveError> {
        self.machine_mut()?.hw.borrow_mut().pico.page = page.min(6);
        Ok(())
    }

    fn cd_machine(&mut self) -> Result<&mut Machine, MegaDriveError> {
        let m = self.machine.as_mut().ok_or(MegaDriveError::NoImageLoaded)?;
        if m.kind != HardwareKind::MegaCd {
            return Err(DiskError::NotACd(m.image.path.clone()).into());
        }
        Ok(m)
    }

    pub fn disk_count(&self) -> usize {
        self.disks.count()
    }

    pub fn disk_index(&self) -> usize {
        self.disks.index()
    }

    pub fn is_ejected(&self) -> bool {
        self.disks.is_ejected()
    }

    pub fn set_ejected(&mut self, ejected: bool) -> Result<(), MegaDriveError> {
        self.cd_machine()?;
        self.disks.set_ejected(ejected);
        Ok(())
    }

    /// Switch discs. An empty slot leaves the drive without a disc.
    pub fn set_disk_index(&mut self, index: usize) -> Result<(), MegaDriveError> {
        self.cd_machine()?;
        let disc = self.disks.select(index)?;
        self.cd_machine()?.disc = disc;
        Ok(())
    }

    pub fn add_disk(&mut self) -> Result<usize, MegaDriveError> {
        self.cd_machine()?;
        Ok(self.disks.add()?)
    }

    /// Store `path` in slot `index`. Filling the active slot also puts the
    /// new disc in the drive.
    pub fn replace_disk(&mut self, index: usize, path: Option<PathBuf>) -> Result<(), MegaDriveError> {
        self.cd_machine()?;
        let insert = path.is_some() && index == self.disks.index();
        self.disks.replace(index, path)?;
        if insert {
            self.set_disk_index(index)?;
        }
        Ok(())
    }

    /// Disc currently in the drive
    pub fn current_disc(&self) -> Option<&MediaImage> {
        self.machine.as_ref().and_then(|m| m.disc.as_ref())
    }
}

impl System for MegaDriveSystem {
    type Error = MegaDriveError;

    fn reset(&mut self) -> Result<(), Self::Error> {
        let m = self.machine_mut()?;
        m.reset()?;
        log(LogCategory::CPU, LogLevel::Info, || "machine reset".to_string());
        Ok(())
    }

    fn step_frame(
        &mut self,
        input: InputSnapshot,
        video: &mut dyn VideoSink,
        audio: &mut dyn AudioSink,
    ) -> Result<FrameReport, Self::Error> {
        self.run_frame(input, video, audio)
    }

    fn serialize_size(&mut self) -> Result<usize, Self::Error> {
        self.machine_mut()?.state_size()
    }

    fn serialize(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.machine_mut()?.save_state(buf)
    }

    /// All or nothing: a rejected state leaves the machine as it was.
    fn unserialize(&mut self, buf: &[u8]) -> Result<(), Self::Error> {
        let m = self.machine_mut()?;
        state::check_header(buf, m.kind, m.program_crc)?;

        let mut backup = vec![0u8; m.state_size()?];
        m.save_state(&mut backup)?;
        if let Err(e) = m.load_state(buf) {
            m.load_state(&backup)?;
            return Err(e);
        }
        Ok(())
    }

    fn supports_save_states(&self) -> bool {
        true
    }

    fn mount_points(&self) -> Vec<MountPointInfo> {
        let exts = |list: &[&str]| list.iter().map(|e| e.to_string()).collect();
        vec![
            MountPointInfo {
                id: CARTRIDGE_MOUNT.to_string(),
                name: "Cartridge".to_string(),
                extensions: exts(&["bin", "md", "gen", "smd"]),
                required: false,
            },
            MountPointInfo {
                id: DISC_MOUNT.to_string(),
                name: "CD".to_string(),
                extensions: exts(&["cue", "iso", "bin"]),
                required: false,
            },
        ]
    }

    fn mount(&mut self, mount_point_id: &str, path: &Path) -> Result<(), Self::Error> {
        match mount_point_id {
            CARTRIDGE_MOUNT | DISC_MOUNT => self.load_image(path),
            other => Err(MegaDriveError::InvalidMountPoint(other.to_string())),
        }
    }

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error> {
        match mount_point_id {
            CARTRIDGE_MOUNT | DISC_MOUNT => {
                if self.is_mounted(mount_point_id) {
                    self.shutdown();
                }
                Ok(())
            }
            other => Err(MegaDriveError::InvalidMountPoint(other.to_string())),
        }
    }

    fn is_mounted(&self, mount_point_id: &str) -> bool {
        match (mount_point_id, self.machine.as_ref()) {
            (CARTRIDGE_MOUNT, Some(m)) => !m.image.is_cd(),
            (DISC_MOUNT, Some(m)) => m.image.is_cd(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emu_core::types::{NullAudio, NullVideo};

    #[test]
    fn test_window_mask() {
        assert_eq!(window_mask(0x1000), 0xFF_F000);
        assert_eq!(window_mask(0x18_0000), 0xE0_0000);
        assert_eq!(window_mask(0x80_0000), 0xC0_0000);
    }

    #[test]
    fn test_sram_region_aligns_odd_start() {
        let (r, size) = sram_region(SramInfo {
            start: 0x20_0001,
            end: 0x20_3FFF,
        });
        assert_eq!(r.base, 0x20_0000);
        assert_eq!(r.mask, 0xFF_C000);
        assert_eq!(size, 0x4000);
        let rom_2m = BusRegion::new("rom", 0, window_mask(0x20_0000), Handler::Rom);
        let rom_4m = BusRegion::new("rom", 0, window_mask(0x40_0000), Handler::Rom);
        assert!(!r.overlaps(&rom_2m));
        assert!(r.overlaps(&rom_4m));
    }

    #[test]
    fn test_cd_maps_are_unambiguous() {
        assert!(BusMap::new(cd_main_regions(true)).is_ok());
        assert!(BusMap::new(cd_sub_regions()).is_ok());
        assert!(BusMap::new(console_regions(true)).is_ok());
    }

    #[test]
    fn test_port_block_windows() {
        let pico = BusMap::new(console_regions(true)).unwrap();
        assert_eq!(pico.resolve(0x80_001F).unwrap().handler, Handler::PicoIo);
        assert!(pico.resolve(0x80_0020).is_none());
        assert_eq!(pico.resolve(0xC0_0011).unwrap().handler, Handler::Video);
        assert!(pico.resolve(0xC0_0014).is_none());
        assert!(pico.resolve(0xA1_0000).is_none());

        let md = BusMap::new(console_regions(false)).unwrap();
        assert_eq!(md.resolve(0xC0_0014).unwrap().handler, Handler::Video);
        assert!(md.resolve(0x80_0000).is_none());
    }

    #[test]
    fn test_empty_session() {
        let mut sys = MegaDriveSystem::new(std::env::temp_dir(), CoreOptions::default());
        assert!(!sys.is_loaded());
        assert!(matches!(sys.reset(), Err(MegaDriveError::NoImageLoaded)));
        let frame = sys.run_frame(InputSnapshot::default(), &mut NullVideo, &mut NullAudio);
        assert!(matches!(frame, Err(MegaDriveError::NoImageLoaded)));
        assert!(sys.save_memory().is_empty());
        assert!(matches!(sys.serialize_size(), Err(MegaDriveError::NoImageLoaded)));
        assert!(matches!(
            sys.mount("floppy", Path::new("x")),
            Err(MegaDriveError::InvalidMountPoint(_))
        ));
        assert!(!sys.is_mounted("cartridge"));
    }
}
