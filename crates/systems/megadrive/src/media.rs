//! Media classification: cartridge vs CD image, sector layout, region,
//! firmware lookup and cartridge header parsing.

use crate::memory::load_bytes;
use crate::options::RegionOverride;
use crate::MegaDriveError;
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

const DISC_MAGIC: &[u8; 14] = b"SEGADISCSYSTEM";
const HEADER_PROBE: usize = 32;
const ID_BLOCK_SIZE: usize = 0x100;
/// Region byte, relative to the identifier block
const CD_REGION_OFFSET: usize = 0x10B;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Not a ROM/CD image: {0}")]
    Unsupported(PathBuf),
    #[error("Malformed media: {0}")]
    Malformed(String),
    #[error("Not a ROM: {0}")]
    NotARom(String),
    #[error("No {region} firmware found ({} files tried)", .searched.len())]
    MissingFirmware { region: Region, searched: Vec<PathBuf> },
    #[error("Archive error: {0}")]
    Archive(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    Japan,
    Us,
    Europe,
}

impl Region {
    /// 50 Hz machine
    pub fn is_pal(self) -> bool {
        self == Region::Europe
    }

    /// Non-Japanese machine (version register bit 7)
    pub fn overseas(self) -> bool {
        self != Region::Japan
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Region::Japan => "Japan",
            Region::Us => "US",
            Region::Europe => "Europe",
        };
        write!(f, "{}", s)
    }
}

/// Sector layout of a CD image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// 2048-byte user data sectors
    Iso,
    /// Raw 2352-byte sectors
    Bin,
    Unknown,
}

impl Layout {
    fn id_offset(self) -> u64 {
        match self {
            Layout::Bin => 0x110,
            _ => 0x100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Cartridge,
    CdImage(Layout),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareKind {
    MegaDrive,
    Pico,
    MegaCd,
}

impl HardwareKind {
    pub(crate) fn tag(self) -> u8 {
        match self {
            HardwareKind::MegaDrive => 0,
            HardwareKind::Pico => 1,
            HardwareKind::MegaCd => 2,
        }
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackType {
    Mode1_2048,
    Mode1_2352,
    Mode2_2352,
    Audio,
    /// Data track of a mode this core does not know
    Other,
}

impl TrackType {
    fn from_keyword(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "MODE1/2048" => TrackType::Mode1_2048,
            "MODE1/2352" => TrackType::Mode1_2352,
            "MODE2/2352" => TrackType::Mode2_2352,
            "AUDIO" => TrackType::Audio,
            _ => TrackType::Other,
        }
    }

    pub fn is_data(self) -> bool {
        self != TrackType::Audio
    }

    pub fn layout(self) -> Option<Layout> {
        match self {
            TrackType::Mode1_2048 => Some(Layout::Iso),
            TrackType::Mode1_2352 | TrackType::Mode2_2352 => Some(Layout::Bin),
            TrackType::Audio | TrackType::Other => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueTrack {
    pub number: u8,
    pub file: PathBuf,
    pub track_type: TrackType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CueSheet {
    pub tracks: Vec<CueTrack>,
}

impl CueSheet {
    pub fn data_track(&self) -> Option<&CueTrack> {
        self.tracks.iter().find(|t| t.track_type.is_data())
    }
}

/// `"quoted name" rest` or `name rest`
fn split_file_name(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if let Some(rest) = s.strip_prefix('"') {
        let end = rest.find('"')?;
        Some((&rest[..end], &rest[end + 1..]))
    } else {
        let end = s.rfind(char::is_whitespace).unwrap_or(s.len());
        Some((&s[..end], &s[end..]))
    }
}

/// Parse a cue sheet. File names are resolved against the sheet's directory.
pub fn parse_cue(path: &Path) -> Result<CueSheet, MediaError> {
    let text = std::fs::read_to_string(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new(""));
    let mut sheet = CueSheet::default();
    let mut current_file: Option<PathBuf> = None;

    for (n, line) in text.lines().enumerate() {
        let line = line.trim();
        let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match keyword.to_ascii_uppercase().as_str() {
            "FILE" => {
                let (name, _) = split_file_name(rest).ok_or_else(|| {
                    MediaError::Malformed(format!("cue line {}: bad FILE entry", n + 1))
                })?;
                current_file = Some(base.join(name));
            }
            "TRACK" => {
                let mut parts = rest.split_whitespace();
                let number = parts.next().and_then(|s| s.parse::<u8>().ok());
                let kind = parts.next().map(TrackType::from_keyword);
                let (Some(number), Some(track_type)) = (number, kind) else {
                    return Err(MediaError::Malformed(format!(
                        "cue line {}: bad TRACK entry",
                        n + 1
                    )));
                };
                let file = current_file.clone().ok_or_else(|| {
                    MediaError::Malformed(format!("cue line {}: TRACK before FILE", n + 1))
                })?;
                sheet.tracks.push(CueTrack {
                    number,
                    file,
                    track_type,
                });
            }
            "INDEX" | "REM" | "PREGAP" | "POSTGAP" | "FLAGS" | "CATALOG" | "TITLE"
            | "PERFORMER" | "" => {}
            other => log(LogCategory::Media, LogLevel::Debug, || {
                format!("cue: ignoring {}", other)
            }),
        }
    }

    if sheet.tracks.is_empty() {
        return Err(MediaError::Malformed(format!(
            "{}: no tracks",
            path.display()
        )));
    }
    Ok(sheet)
}

fn sniff_layout(head: &[u8]) -> Option<Layout> {
    let magic_at = |off: usize| {
        head.get(off..off + DISC_MAGIC.len())
            .is_some_and(|s| s.eq_ignore_ascii_case(DISC_MAGIC))
    };
    if magic_at(0x10) {
        Some(Layout::Bin)
    } else if magic_at(0x00) {
        Some(Layout::Iso)
    } else {
        None
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Read as much of `buf` as the file holds
fn read_up_to(file: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// A classified image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaImage {
    /// Path given by the user
    pub path: PathBuf,
    /// File holding the data (the data track for a cue sheet)
    pub data_path: PathBuf,
    pub kind: MediaKind,
    pub region: Region,
    /// 0x100-byte identifier block (cartridge header at 0x100, disc header)
    pub id_block: Vec<u8>,
}

/// Decide what `path` is.
///
/// Files that do not carry the disc magic are cartridges; that is a
/// classification result, not an error.
pub fn classify(path: &Path) -> Result<MediaImage, MediaError> {
    let ext = extension(path);
    if matches!(ext.as_str(), "srm" | "mds" | "brm") {
        return Err(MediaError::Unsupported(path.to_path_buf()));
    }

    let is_cue = ext == "cue";
    let (data_path, declared) = if is_cue {
        let sheet = parse_cue(path)?;
        let track = sheet
            .data_track()
            .ok_or_else(|| MediaError::Malformed(format!("{}: no data track", path.display())))?;
        (track.file.clone(), track.track_type.layout())
    } else {
        (path.to_path_buf(), None)
    };

    let mut file = BufReader::new(File::open(&data_path)?);
    let mut head = [0u8; HEADER_PROBE];
    if read_up_to(&mut file, &mut head)? < HEADER_PROBE {
        return Err(MediaError::Malformed(format!(
            "{}: shorter than {} bytes",
            data_path.display(),
            HEADER_PROBE
        )));
    }

    let sniffed = sniff_layout(&head);
    if let (Some(d), Some(s)) = (declared, sniffed) {
        if d != s {
            log(LogCategory::Media, LogLevel::Warn, || {
                format!("cue declares {:?} but image looks like {:?}", d, s)
            });
        }
    }

    let layout = match (sniffed.or(declared), is_cue) {
        (Some(l), _) => l,
        (None, true) => Layout::Unknown,
        (None, false) => {
            // Cartridge: identifier block is the ROM header
            let mut rom_head = vec![0u8; 0x200];
            file.seek(SeekFrom::Start(0))?;
            read_up_to(&mut file, &mut rom_head)?;
            let header = CartHeader::parse(&rom_head);
            let region = header.pick_region(RegionOverride::Auto);
            log(LogCategory::Media, LogLevel::Info, || {
                format!("cartridge image, {} region", region)
            });
            return Ok(MediaImage {
                path: path.to_path_buf(),
                data_path,
                kind: MediaKind::Cartridge,
                region,
                id_block: rom_head[0x100..].to_vec(),
            });
        }
    };

    let (region, id_block) = if layout == Layout::Unknown {
        (Region::Us, vec![0u8; ID_BLOCK_SIZE])
    } else {
        let mut block = vec![0u8; CD_REGION_OFFSET + 1];
        file.seek(SeekFrom::Start(layout.id_offset()))?;
        if read_up_to(&mut file, &mut block)? < block.len() {
            return Err(MediaError::Malformed(format!(
                "{}: truncated disc header",
                data_path.display()
            )));
        }
        let region = match block[CD_REGION_OFFSET] {
            0x64 => Region::Europe,
            0xA1 => Region::Japan,
            _ => Region::Us,
        };
        block.truncate(ID_BLOCK_SIZE);
        (region, block)
    };
    log(LogCategory::Media, LogLevel::Info, || {
        format!("{:?} CD image, {} region", layout, region)
    });

    Ok(MediaImage {
        path: path.to_path_buf(),
        data_path,
        kind: MediaKind::CdImage(layout),
        region,
        id_block,
    })
}

/// Printable text with reserved and non-printable bytes escaped as `\xx`;
/// trailing spaces dropped.
fn extract_text(src: &[u8]) -> String {
    let end = src.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    let mut out = String::with_capacity(end);
    for &b in &src[..end] {
        if (0x20..0x7F).contains(&b) && !b"#|[]\\".contains(&b) {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\{:02x}", b));
        }
    }
    out
}

impl MediaImage {
    pub fn is_cd(&self) -> bool {
        matches!(self.kind, MediaKind::CdImage(_))
    }

    fn field(&self, off: usize, len: usize) -> &[u8] {
        let end = (off + len).min(self.id_block.len());
        self.id_block.get(off..end).unwrap_or(&[])
    }

    /// `MD|serial|regions|overseas name` (`CD|...` for discs)
    pub fn rom_id(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            if self.is_cd() { "CD" } else { "MD" },
            extract_text(self.field(0x80, 0x0E)),
            extract_text(self.field(0xF0, 0x03)),
            extract_text(self.field(0x50, 0x30)),
        )
    }

    /// Overseas title with runs of spaces collapsed
    pub fn game_name(&self) -> String {
        let raw = extract_text(self.field(0x50, 0x30));
        let mut out = String::with_capacity(raw.len());
        for c in raw.chars() {
            if c != ' ' || !out.ends_with(' ') {
                out.push(c);
            }
        }
        out
    }
}

const FIRMWARE_US: [&str; 4] = ["us_scd2_9306", "SegaCDBIOS9303", "us_scd1_9210", "bios_CD_U"];
const FIRMWARE_EU: [&str; 4] = ["eu_mcd2_9306", "eu_mcd2_9303", "eu_mcd1_9210", "bios_CD_E"];
const FIRMWARE_JP: [&str; 4] = ["jp_mcd2_921222", "jp_mcd1_9112", "jp_mcd1_9111", "bios_CD_J"];

pub fn firmware_names(region: Region) -> &'static [&'static str] {
    match region {
        Region::Us => &FIRMWARE_US,
        Region::Europe => &FIRMWARE_EU,
        Region::Japan => &FIRMWARE_JP,
    }
}

/// First existing firmware file for `region` under `system_dir`, trying
/// each name as `.bin` and then `.zip`.
pub fn find_firmware(system_dir: &Path, region: Region) -> Result<PathBuf, MediaError> {
    let mut searched = Vec::new();
    for name in firmware_names(region) {
        for ext in ["bin", "zip"] {
            let candidate = system_dir.join(format!("{}.{}", name, ext));
            if candidate.is_file() {
                log(LogCategory::Media, LogLevel::Info, || {
                    format!("using firmware {}", candidate.display())
                });
                return Ok(candidate);
            }
            searched.push(candidate);
        }
    }
    log(LogCategory::Media, LogLevel::Error, || {
        format!("no {} firmware under {}", region, system_dir.display())
    });
    Err(MediaError::MissingFirmware { region, searched })
}

/// Firmware bytes, unpacking a `.zip` when needed
pub fn read_firmware(path: &Path) -> Result<Vec<u8>, MegaDriveError> {
    if extension(path) != "zip" {
        return load_bytes(path);
    }

    let archive_err = |e: zip::result::ZipError| MediaError::Archive(format!("{}: {}", path.display(), e));
    let file = File::open(path)?;
    let mut archive = zip::ZipArchive::new(BufReader::new(file)).map_err(archive_err)?;

    let mut chosen: Option<(usize, u64)> = None;
    for i in 0..archive.len() {
        let entry = archive.by_index(i).map_err(archive_err)?;
        if entry.is_dir() {
            continue;
        }
        if entry.name().to_ascii_lowercase().ends_with(".bin") {
            chosen = Some((i, entry.size()));
            break;
        }
        if chosen.map_or(true, |(_, size)| entry.size() > size) {
            chosen = Some((i, entry.size()));
        }
    }
    let (index, size) = chosen
        .ok_or_else(|| MediaError::Archive(format!("{}: archive is empty", path.display())))?;

    let mut entry = archive.by_index(index).map_err(archive_err)?;
    let mut data = Vec::new();
    data.try_reserve_exact(size as usize)
        .map_err(|_| MegaDriveError::OutOfMemory(size as usize))?;
    entry.read_to_end(&mut data)?;
    Ok(data)
}

/// Backup RAM declared by a cartridge header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SramInfo {
    pub start: u32,
    pub end: u32,
}

/// Fields of the 0x100-0x1FF cartridge header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartHeader {
    pub system: String,
    pub domestic_name: String,
    pub overseas_name: String,
    pub serial: String,
    /// Bitmask: 1 Japan NTSC, 2 Japan PAL, 4 US, 8 Europe
    pub region_bits: u8,
    pub sram: Option<SramInfo>,
    pub entry_point: u32,
}

fn be32(data: &[u8], off: usize) -> u32 {
    data.get(off..off + 4)
        .map_or(0, |b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn text(data: &[u8], off: usize, len: usize) -> String {
    let end = (off + len).min(data.len());
    data.get(off..end)
        .map(|b| String::from_utf8_lossy(b).trim_end().to_string())
        .unwrap_or_default()
}

impl CartHeader {
    /// Parse from the start of a ROM image (big-endian byte order)
    pub fn parse(rom: &[u8]) -> Self {
        let mut region_bits = 0u8;
        for &c in rom.get(0x1F0..0x1F3).unwrap_or(&[]) {
            match c {
                0 => break,
                b'J' => region_bits |= 1,
                b'U' => region_bits |= 4,
                b'E' => region_bits |= 8,
                b'j' => {
                    region_bits |= 1;
                    break;
                }
                b'u' => {
                    region_bits |= 4;
                    break;
                }
                b'e' => {
                    region_bits |= 8;
                    break;
                }
                c => region_bits |= (c as char).to_digit(16).unwrap_or(0) as u8,
            }
        }

        let sram = if rom.get(0x1B0..0x1B2) == Some(&b"RA"[..]) {
            let start = be32(rom, 0x1B4) & 0xFF_FFFF;
            let end = be32(rom, 0x1B8) & 0xFF_FFFF;
            (end >= start).then_some(SramInfo { start, end })
        } else {
            None
        };

        Self {
            system: text(rom, 0x100, 0x10),
            domestic_name: text(rom, 0x120, 0x30),
            overseas_name: text(rom, 0x150, 0x30),
            serial: text(rom, 0x180, 0x0E),
            region_bits,
            sram,
            entry_point: be32(rom, 4) & 0xFF_FFFF,
        }
    }

    pub fn is_pico(&self) -> bool {
        self.system.contains("SEGA PICO")
    }

    pub fn supports(&self, region: Region) -> bool {
        let bits = match region {
            Region::Japan => 0x03,
            Region::Us => 0x04,
            Region::Europe => 0x08,
        };
        self.region_bits & bits != 0
    }

    /// Override wins; otherwise the first supported of US, Europe, Japan.
    pub fn pick_region(&self, region_override: RegionOverride) -> Region {
        if let Some(r) = region_override.region() {
            return r;
        }
        [Region::Us, Region::Europe, Region::Japan]
            .into_iter()
            .find(|&r| self.supports(r))
            .unwrap_or(Region::Us)
    }

    /// Reject header dumps, tiny files and images whose entry point is outside the data.
    pub fn validate(&self, rom: &[u8]) -> Result<(), MediaError> {
        if rom.len() <= 0x200 {
            return Err(MediaError::NotARom(format!("only {} bytes", rom.len())));
        }
        if rom.starts_with(b"Pico") {
            return Err(MediaError::NotARom("header dump".to_string()));
        }
        if self.entry_point as usize >= rom.len() {
            return Err(MediaError::NotARom(format!(
                "entry point {:06X} beyond {} bytes",
                self.entry_point,
                rom.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("emu_megadrive_media_{}", name));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn disc_image(magic_at: usize, region_byte: u8) -> Vec<u8> {
        let mut img = vec![0u8; 0x400];
        img[magic_at..magic_at + 14].copy_from_slice(DISC_MAGIC);
        let id = if magic_at == 0 { 0x100 } else { 0x110 };
        img[id + 0x50..id + 0x100].fill(b' ');
        img[id + 0x50..id + 0x58].copy_from_slice(b"SONIC  C");
        img[id + 0x80..id + 0x8E].copy_from_slice(b"GM MK-4407 -00");
        img[id + CD_REGION_OFFSET] = region_byte;
        img
    }

    fn cart_image() -> Vec<u8> {
        let mut rom = vec![0u8; 0x1000];
        rom[4..8].copy_from_slice(&0x200u32.to_be_bytes());
        rom[0x100..0x200].fill(b' ');
        rom[0x100..0x110].copy_from_slice(b"SEGA MEGA DRIVE ");
        rom[0x150..0x15A].copy_from_slice(b"TEST  GAME");
        rom[0x180..0x18E].copy_from_slice(b"GM 00000000-00");
        rom[0x1F0..0x1F3].copy_from_slice(b"JE ");
        rom
    }

    #[test]
    fn test_classify_iso_and_bin() {
        let dir = temp_dir("layouts");
        let iso = dir.join("game.iso");
        fs::write(&iso, disc_image(0, 0x64)).unwrap();
        let bin = dir.join("game.bin");
        fs::write(&bin, disc_image(0x10, 0xA1)).unwrap();

        let m = classify(&iso).unwrap();
        assert_eq!(m.kind, MediaKind::CdImage(Layout::Iso));
        assert_eq!(m.region, Region::Europe);
        assert_eq!(m.rom_id(), "CD|GM MK-4407 -00||SONIC  C");
        assert_eq!(m.game_name(), "SONIC C");

        let m = classify(&bin).unwrap();
        assert_eq!(m.kind, MediaKind::CdImage(Layout::Bin));
        assert_eq!(m.region, Region::Japan);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unknown_region_byte_means_us() {
        let dir = temp_dir("region");
        let iso = dir.join("game.iso");
        fs::write(&iso, disc_image(0, 0x00)).unwrap();
        assert_eq!(classify(&iso).unwrap().region, Region::Us);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_lowercase_magic_is_accepted() {
        let mut img = disc_image(0, 0);
        img[..14].copy_from_slice(b"segadiscsystem");
        assert_eq!(sniff_layout(&img), Some(Layout::Iso));
        assert_eq!(sniff_layout(&[0u8; 32]), None);
    }

    #[test]
    fn test_cartridge_is_not_an_error() {
        let dir = temp_dir("cart");
        let path = dir.join("game.md");
        fs::write(&path, cart_image()).unwrap();
        let m = classify(&path).unwrap();
        assert_eq!(m.kind, MediaKind::Cartridge);
        // "JE": Europe beats Japan in the auto order
        assert_eq!(m.region, Region::Europe);
        assert_eq!(m.rom_id(), "MD|GM 00000000-00|JE|TEST  GAME");
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_short_header_is_malformed() {
        let dir = temp_dir("short");
        let path = dir.join("tiny.bin");
        fs::write(&path, [0u8; 31]).unwrap();
        assert!(matches!(classify(&path), Err(MediaError::Malformed(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_rejected_extensions() {
        for name in ["save.srm", "movie.mds", "x.BRM"] {
            assert!(matches!(
                classify(Path::new(name)),
                Err(MediaError::Unsupported(_))
            ));
        }
    }

    #[test]
    fn test_cue_redirects_and_sniffed_layout_wins() {
        let dir = temp_dir("cue");
        fs::write(dir.join("track 01.bin"), disc_image(0x10, 0x64)).unwrap();
        let cue = dir.join("game.cue");
        fs::write(
            &cue,
            "REM test\nFILE \"track 01.bin\" BINARY\n  TRACK 01 MODE1/2048\n    INDEX 01 00:00:00\n",
        )
        .unwrap();

        let sheet = parse_cue(&cue).unwrap();
        assert_eq!(sheet.tracks.len(), 1);
        assert_eq!(sheet.tracks[0].file, dir.join("track 01.bin"));

        let m = classify(&cue).unwrap();
        assert_eq!(m.kind, MediaKind::CdImage(Layout::Bin));
        assert_eq!(m.data_path, dir.join("track 01.bin"));
        assert_eq!(m.region, Region::Europe);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_cue_declared_layout_without_magic() {
        let dir = temp_dir("cue_declared");
        fs::write(dir.join("data.img"), vec![0u8; 0x300]).unwrap();
        let cue = dir.join("game.cue");
        fs::write(&cue, "FILE data.img BINARY\nTRACK 1 AUDIO\nTRACK 2 MODE2/2352\n").unwrap();
        let m = classify(&cue).unwrap();
        assert_eq!(m.kind, MediaKind::CdImage(Layout::Bin));
        assert_eq!(m.region, Region::Us);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_cue_without_magic_or_known_mode_is_unknown_layout() {
        let dir = temp_dir("cue_unknown");
        fs::write(dir.join("data.img"), vec![0u8; 0x300]).unwrap();
        let cue = dir.join("game.cue");
        fs::write(&cue, "FILE data.img BINARY\nTRACK 01 MODE2/2336\n").unwrap();
        let m = classify(&cue).unwrap();
        assert_eq!(m.kind, MediaKind::CdImage(Layout::Unknown));
        assert_eq!(m.region, Region::Us);
        assert_eq!(m.id_block.len(), 0x100);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_bad_cue() {
        let dir = temp_dir("cue_bad");
        let cue = dir.join("bad.cue");
        fs::write(&cue, "TRACK 01 MODE1/2048\n").unwrap();
        assert!(matches!(parse_cue(&cue), Err(MediaError::Malformed(_))));
        fs::write(&cue, "REM nothing\n").unwrap();
        assert!(matches!(classify(&cue), Err(MediaError::Malformed(_))));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_find_firmware_order() {
        let dir = temp_dir("firmware");
        let err = find_firmware(&dir, Region::Us).unwrap_err();
        match err {
            MediaError::MissingFirmware { region, searched } => {
                assert_eq!(region, Region::Us);
                assert_eq!(searched.len(), 8);
                assert_eq!(searched[0], dir.join("us_scd2_9306.bin"));
                assert_eq!(searched[1], dir.join("us_scd2_9306.zip"));
            }
            other => panic!("unexpected {:?}", other),
        }

        fs::write(dir.join("bios_CD_U.bin"), [0u8; 4]).unwrap();
        fs::write(dir.join("us_scd1_9210.zip"), [0u8; 4]).unwrap();
        assert_eq!(
            find_firmware(&dir, Region::Us).unwrap(),
            dir.join("us_scd1_9210.zip")
        );
        fs::write(dir.join("SegaCDBIOS9303.bin"), [0u8; 4]).unwrap();
        assert_eq!(
            find_firmware(&dir, Region::Us).unwrap(),
            dir.join("SegaCDBIOS9303.bin")
        );
        assert!(find_firmware(&dir, Region::Japan).is_err());
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_read_firmware_from_zip() {
        use std::io::Write;
        let dir = temp_dir("firmware_zip");
        let path = dir.join("bios_CD_E.zip");
        let file = File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        zip.start_file("readme.txt", options).unwrap();
        zip.write_all(&[0u8; 64]).unwrap();
        zip.start_file("bios.BIN", options).unwrap();
        zip.write_all(&[0xAB; 16]).unwrap();
        zip.finish().unwrap();

        assert_eq!(read_firmware(&path).unwrap(), vec![0xAB; 16]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_cart_header() {
        let mut rom = cart_image();
        rom[0x1B0..0x1B2].copy_from_slice(b"RA");
        rom[0x1B4..0x1B8].copy_from_slice(&0x200001u32.to_be_bytes());
        rom[0x1B8..0x1BC].copy_from_slice(&0x203FFFu32.to_be_bytes());
        let h = CartHeader::parse(&rom);
        assert_eq!(h.system, "SEGA MEGA DRIVE");
        assert_eq!(h.overseas_name, "TEST  GAME");
        assert_eq!(h.region_bits, 0x09);
        assert_eq!(
            h.sram,
            Some(SramInfo {
                start: 0x200001,
                end: 0x203FFF
            })
        );
        assert!(!h.is_pico());
        assert_eq!(h.pick_region(RegionOverride::Auto), Region::Europe);
        assert_eq!(h.pick_region(RegionOverride::Us), Region::Us);
        assert!(h.validate(&rom).is_ok());
    }

    #[test]
    fn test_hex_region_code() {
        let mut rom = cart_image();
        rom[0x1F0..0x1F3].copy_from_slice(b"4  ");
        let h = CartHeader::parse(&rom);
        assert_eq!(h.region_bits, 4);
        assert_eq!(h.pick_region(RegionOverride::Auto), Region::Us);
        rom[0x1F0..0x1F3].copy_from_slice(b"1  ");
        assert_eq!(CartHeader::parse(&rom).pick_region(RegionOverride::Auto), Region::Japan);
    }

    #[test]
    fn test_validate_rejections() {
        let rom = cart_image();
        let h = CartHeader::parse(&rom);
        assert!(matches!(h.validate(&rom[..0x200]), Err(MediaError::NotARom(_))));

        let mut pico_dump = rom.clone();
        pico_dump[..4].copy_from_slice(b"Pico");
        assert!(h.validate(&pico_dump).is_err());

        let mut bad_entry = rom.clone();
        bad_entry[4..8].copy_from_slice(&0x2000u32.to_be_bytes());
        let h = CartHeader::parse(&bad_entry);
        assert!(h.validate(&bad_entry).is_err());
    }
}
