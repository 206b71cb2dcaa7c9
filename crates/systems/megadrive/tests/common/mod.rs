//! Image builders and recording sinks shared by the integration tests.

#![allow(dead_code)]

use emu_core::types::{AudioSink, VideoMode, VideoSink};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENTRY: u32 = 0x200;
/// Autovector handler: `addq.w #1,($FF10).w ; rte`
pub const HANDLER: u32 = 0x300;
/// Work RAM word counting serviced interrupts
pub const IRQ_COUNTER: u32 = 0xFF_FF10;

pub fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("emu_megadrive_it_{}", name));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn put_words(img: &mut [u8], at: u32, words: &[u16]) {
    for (i, w) in words.iter().enumerate() {
        let o = at as usize + i * 2;
        img[o..o + 2].copy_from_slice(&w.to_be_bytes());
    }
}

fn put_long(img: &mut [u8], at: u32, v: u32) {
    img[at as usize..at as usize + 4].copy_from_slice(&v.to_be_bytes());
}

/// Program image: stack and entry vectors, every autovector on the
/// counting handler, `code` at the entry point.
fn program(len: usize, code: &[u16]) -> Vec<u8> {
    let mut img = vec![0u8; len];
    put_long(&mut img, 0, 0x00FF_FE00);
    put_long(&mut img, 4, ENTRY);
    for level in 1..8u32 {
        put_long(&mut img, 0x60 + level * 4, HANDLER);
    }
    put_words(&mut img, HANDLER, &[0x5278, 0xFF10, 0x4E73]);
    put_words(&mut img, ENTRY, code);
    img
}

pub struct CartBuilder {
    rom: Vec<u8>,
}

impl CartBuilder {
    pub fn new(code: &[u16]) -> Self {
        let mut rom = program(0x2000, code);
        rom[0x100..0x200].fill(b' ');
        rom[0x100..0x110].copy_from_slice(b"SEGA MEGA DRIVE ");
        rom[0x150..0x158].copy_from_slice(b"IT  TEST");
        rom[0x180..0x18E].copy_from_slice(b"GM 00000001-00");
        rom[0x1F0..0x1F3].copy_from_slice(b"JUE");
        Self { rom }
    }

    pub fn pico(mut self) -> Self {
        self.rom[0x100..0x110].copy_from_slice(b"SEGA PICO       ");
        self
    }

    pub fn sram(mut self, start: u32, end: u32) -> Self {
        self.rom[0x1B0..0x1B4].copy_from_slice(b"RA\xF8\x20");
        put_long(&mut self.rom, 0x1B4, start);
        put_long(&mut self.rom, 0x1B8, end);
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.rom
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, &self.rom).unwrap();
        path
    }
}

/// US firmware under `dir` running `code` on the main CPU
pub fn write_firmware(dir: &Path, code: &[u16]) -> PathBuf {
    let path = dir.join("us_scd2_9306.bin");
    fs::write(&path, program(0x2_0000, code)).unwrap();
    path
}

/// 2048-byte-sector disc image with a US region byte
pub fn write_iso(dir: &Path, name: &str, title: &[u8]) -> PathBuf {
    let mut img = vec![0u8; 0x800];
    img[..14].copy_from_slice(b"SEGADISCSYSTEM");
    img[0x150..0x200].fill(b' ');
    img[0x150..0x150 + title.len()].copy_from_slice(title);
    let path = dir.join(name);
    fs::write(&path, img).unwrap();
    path
}

#[derive(Default)]
pub struct RecordingVideo {
    pub frames_begun: u32,
    pub scanlines: u32,
    pub last_mode: Option<VideoMode>,
    pub last_frame: u64,
}

impl VideoSink for RecordingVideo {
    fn begin_frame(&mut self, mode: &VideoMode) {
        self.frames_begun += 1;
        self.last_mode = Some(*mode);
    }

    fn scanline(&mut self, _line: u16) {
        self.scanlines += 1;
    }

    fn end_frame(&mut self, frame: u64) {
        self.last_frame = frame;
    }
}

#[derive(Default)]
pub struct RecordingAudio {
    pub psg: Vec<u8>,
    pub pcm: Vec<(Vec<u8>, u32)>,
}

impl AudioSink for RecordingAudio {
    fn psg_write(&mut self, value: u8) {
        self.psg.push(value);
    }

    fn pcm_data(&mut self, data: &[u8], rate: u32) {
        self.pcm.push((data.to_vec(), rate));
    }
}
