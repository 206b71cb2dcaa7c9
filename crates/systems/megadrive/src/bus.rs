//! Per-CPU memory maps.
//!
//! A `BusMap` is an ordered list of `(base, mask)` regions: an address
//! belongs to a region when `addr & mask == base`, which gives mirroring for
//! free. A 256-entry page table keyed by address bits 23..16 resolves pages
//! owned by a single region in one lookup; mixed pages fall back to a scan
//! of the region list.

use crate::hardware::Hardware;
use emu_core::cpu_m68k::Memory68k;
use emu_core::logging::{log, LogCategory, LogLevel};
use std::cell::RefCell;
use std::rc::Rc;
use thiserror::Error;

pub(crate) const ADDR_MASK: u32 = 0x00FF_FFFF;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BusError {
    #[error("Regions '{first}' and '{second}' claim the same addresses")]
    AmbiguousRegion {
        first: &'static str,
        second: &'static str,
    },
}

/// Device or memory answering a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    /// Cartridge ROM or Mega-CD firmware
    Rom,
    WorkRam,
    /// Cartridge backup RAM
    Sram,
    Video,
    Io,
    SysCtrl,
    PicoIo,
    MainGate,
    /// Banked 128 KiB view of PRG-RAM from the main CPU
    PrgWindow,
    WordRam,
    SubGate,
    PrgRam,
    BackupRam,
    RamCart,
    RamCartId,
}

impl Handler {
    pub fn read_only(self) -> bool {
        matches!(self, Handler::Rom | Handler::RamCartId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    pub base: u32,
    pub mask: u32,
    pub handler: Handler,
}

impl Region {
    pub fn new(name: &'static str, base: u32, mask: u32, handler: Handler) -> Self {
        let mask = mask & ADDR_MASK;
        Self {
            name,
            base: base & mask,
            mask,
            handler,
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr & self.mask == self.base
    }

    /// Offset of `addr` inside the region (mirrors collapse onto the same offset)
    pub fn offset(&self, addr: u32) -> u32 {
        addr & !self.mask & ADDR_MASK
    }

    /// Some address satisfies both regions
    pub fn overlaps(&self, other: &Region) -> bool {
        (self.base ^ other.base) & self.mask & other.mask == 0
    }

    fn touches_page(&self, page: u32) -> bool {
        ((page << 16) ^ self.base) & self.mask & 0xFF_0000 == 0
    }

    fn covers_page(&self, page: u32) -> bool {
        self.touches_page(page) && self.mask & 0xFFFF == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Unmapped,
    Direct(u16),
    Scan,
}

#[derive(Debug, Clone)]
pub struct BusMap {
    regions: Vec<Region>,
    pages: Vec<Page>,
}

impl BusMap {
    /// Build a map, rejecting any pair of regions that share an address.
    pub fn new(regions: Vec<Region>) -> Result<Self, BusError> {
        for (i, a) in regions.iter().enumerate() {
            if let Some(b) = regions[i + 1..].iter().find(|b| a.overlaps(b)) {
                return Err(BusError::AmbiguousRegion {
                    first: a.name,
                    second: b.name,
                });
            }
        }

        let pages = (0..256u32)
            .map(|page| {
                let mut touching = regions
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.touches_page(page));
                match (touching.next(), touching.next()) {
                    (None, _) => Page::Unmapped,
                    (Some((i, r)), None) if r.covers_page(page) => Page::Direct(i as u16),
                    _ => Page::Scan,
                }
            })
            .collect();

        Ok(Self { regions, pages })
    }

    pub fn empty() -> Self {
        Self {
            regions: Vec::new(),
            pages: vec![Page::Unmapped; 256],
        }
    }

    pub fn resolve(&self, addr: u32) -> Option<&Region> {
        let addr = addr & ADDR_MASK;
        match self.pages[(addr >> 16) as usize] {
            Page::Unmapped => None,
            Page::Direct(i) => self.regions.get(i as usize),
            Page::Scan => self.regions.iter().find(|r| r.contains(addr)),
        }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn find(&self, handler: Handler) -> Option<&Region> {
        self.regions.iter().find(|r| r.handler == handler)
    }
}

/// One CPU's view of the machine: its map plus the shared hardware.
pub struct ContextBus {
    map: BusMap,
    hw: Rc<RefCell<Hardware>>,
}

impl ContextBus {
    pub fn new(map: BusMap, hw: Rc<RefCell<Hardware>>) -> Self {
        Self { map, hw }
    }

    pub fn map(&self) -> &BusMap {
        &self.map
    }

    pub fn hardware(&self) -> &Rc<RefCell<Hardware>> {
        &self.hw
    }

    fn route(&self, addr: u32) -> Option<(Handler, u32)> {
        self.map.resolve(addr).map(|r| (r.handler, r.offset(addr)))
    }

    fn unmapped(&self, what: &str, addr: u32, val: Option<u32>) {
        log(LogCategory::Bus, LogLevel::Debug, || match val {
            Some(v) => format!("unmapped {} {:06X} <- {:X}", what, addr, v),
            None => format!("unmapped {} {:06X}", what, addr),
        });
    }

    fn read_only(&self, what: &str, addr: u32, val: u32) {
        log(LogCategory::Bus, LogLevel::Debug, || {
            format!("ignored {} to read-only {:06X} <- {:X}", what, addr, val)
        });
    }
}

impl Memory68k for ContextBus {
    fn read_byte(&mut self, addr: u32) -> u8 {
        let addr = addr & ADDR_MASK;
        match self.route(addr) {
            Some((h, off)) => self.hw.borrow_mut().read8(h, off, addr),
            None => {
                self.unmapped("r8", addr, None);
                0
            }
        }
    }

    fn read_word(&mut self, addr: u32) -> u16 {
        let addr = addr & ADDR_MASK & !1;
        match self.route(addr) {
            Some((h, off)) => self.hw.borrow_mut().read16(h, off, addr),
            None => {
                self.unmapped("r16", addr, None);
                0
            }
        }
    }

    fn write_byte(&mut self, addr: u32, val: u8) {
        let addr = addr & ADDR_MASK;
        match self.route(addr) {
            Some((h, _)) if h.read_only() => self.read_only("w8", addr, val as u32),
            Some((h, off)) => self.hw.borrow_mut().write8(h, off, addr, val),
            None => self.unmapped("w8", addr, Some(val as u32)),
        }
    }

    fn write_word(&mut self, addr: u32, val: u16) {
        let addr = addr & ADDR_MASK & !1;
        match self.route(addr) {
            Some((h, _)) if h.read_only() => self.read_only("w16", addr, val as u32),
            Some((h, off)) => self.hw.borrow_mut().write16(h, off, addr, val),
            None => self.unmapped("w16", addr, Some(val as u32)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn md_like() -> Vec<Region> {
        vec![
            Region::new("rom", 0x000000, 0xF80000, Handler::Rom),
            Region::new("video", 0xC00000, 0xFFFFE0, Handler::Video),
            Region::new("io", 0xA10000, 0xFFFFE0, Handler::Io),
            Region::new("sysctrl", 0xA11000, 0xFFF000, Handler::SysCtrl),
            Region::new("ram", 0xE00000, 0xE00000, Handler::WorkRam),
        ]
    }

    #[test]
    fn test_resolves_each_address_to_one_region() {
        let map = BusMap::new(md_like()).unwrap();
        assert_eq!(map.resolve(0x000200).unwrap().handler, Handler::Rom);
        assert_eq!(map.resolve(0x07FFFF).unwrap().handler, Handler::Rom);
        assert!(map.resolve(0x080000).is_none());
        assert_eq!(map.resolve(0xC00004).unwrap().handler, Handler::Video);
        assert!(map.resolve(0xC00020).is_none());
        assert_eq!(map.resolve(0xA10003).unwrap().handler, Handler::Io);
        assert_eq!(map.resolve(0xA11100).unwrap().handler, Handler::SysCtrl);
        assert!(map.resolve(0xA13000).is_none());
    }

    #[test]
    fn test_mirroring_by_mask() {
        let map = BusMap::new(md_like()).unwrap();
        let r = *map.resolve(0xE0FF00).unwrap();
        assert_eq!(r.handler, Handler::WorkRam);
        assert_eq!(r.offset(0xE0FF00), 0x00FF00);
        assert_eq!(map.resolve(0xFFFF00).unwrap().handler, Handler::WorkRam);
        // Offsets inside a mirror differ only above the memory size
        assert_eq!(r.offset(0xFFFF00) & 0xFFFF, 0xFF00);
    }

    #[test]
    fn test_page_table_agrees_with_scan() {
        let map = BusMap::new(md_like()).unwrap();
        for addr in (0..0x0100_0000u32).step_by(0x1F3) {
            let direct = map.resolve(addr).map(|r| r.name);
            let scanned = map.regions().iter().find(|r| r.contains(addr)).map(|r| r.name);
            assert_eq!(direct, scanned, "address {:06X}", addr);
        }
    }

    #[test]
    fn test_rejects_ambiguous_regions() {
        let regions = vec![
            Region::new("rom", 0x000000, 0xC00000, Handler::Rom),
            Region::new("sram", 0x200000, 0xFF0000, Handler::Sram),
        ];
        assert_eq!(
            BusMap::new(regions).unwrap_err(),
            BusError::AmbiguousRegion {
                first: "rom",
                second: "sram"
            }
        );

        // A smaller ROM leaves 0x200000 free
        let regions = vec![
            Region::new("rom", 0x000000, 0xE00000, Handler::Rom),
            Region::new("sram", 0x200000, 0xFF0000, Handler::Sram),
        ];
        assert!(BusMap::new(regions).is_ok());
    }

    #[test]
    fn test_empty_map() {
        let map = BusMap::empty();
        assert!(map.resolve(0).is_none());
        assert!(map.find(Handler::Rom).is_none());
    }
}
