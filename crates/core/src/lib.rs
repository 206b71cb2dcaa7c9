//! Core emulator primitives and traits.

pub mod cpu_m68k;
pub mod logging;
pub mod state_stream;

pub mod types {
    use serde::{Deserialize, Serialize};

    /// Pad button bits as delivered by the frontend (`MXYZ SACB RLDU`).
    pub mod pad {
        pub const UP: u16 = 0x0001;
        pub const DOWN: u16 = 0x0002;
        pub const LEFT: u16 = 0x0004;
        pub const RIGHT: u16 = 0x0008;
        pub const B: u16 = 0x0010;
        pub const C: u16 = 0x0020;
        pub const A: u16 = 0x0040;
        pub const START: u16 = 0x0080;
        pub const Z: u16 = 0x0100;
        pub const Y: u16 = 0x0200;
        pub const X: u16 = 0x0400;
        pub const MODE: u16 = 0x0800;
    }

    /// Controller state sampled once per frame; it does not change while the frame runs.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct InputSnapshot {
        pub pads: [u16; 2],
    }

    impl InputSnapshot {
        pub fn new(pad1: u16, pad2: u16) -> Self {
            Self { pads: [pad1, pad2] }
        }
    }

    /// Per-frame display parameters handed to the video capability.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct VideoMode {
        pub pal: bool,
        /// Active display lines (224 or 240)
        pub height: u16,
        /// Whether the renderer should honour the per-line sprite limit
        pub sprite_limit: bool,
    }

    impl Default for VideoMode {
        fn default() -> Self {
            Self {
                pal: false,
                height: 224,
                sprite_limit: true,
            }
        }
    }

    /// Rendering capability. Pixel output is the implementor's business.
    pub trait VideoSink {
        fn begin_frame(&mut self, mode: &VideoMode);
        fn scanline(&mut self, line: u16);
        fn end_frame(&mut self, frame: u64);
    }

    /// Audio capability receiving raw chip traffic.
    pub trait AudioSink {
        /// A byte written to the PSG port
        fn psg_write(&mut self, value: u8);
        /// Bytes drained from a PCM FIFO, with their playback rate in Hz
        fn pcm_data(&mut self, data: &[u8], rate: u32);
    }

    /// Sink that discards everything (headless runs, tests).
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NullVideo;

    impl VideoSink for NullVideo {
        fn begin_frame(&mut self, _mode: &VideoMode) {}
        fn scanline(&mut self, _line: u16) {}
        fn end_frame(&mut self, _frame: u64) {}
    }

    #[derive(Debug, Default, Clone, Copy)]
    pub struct NullAudio;

    impl AudioSink for NullAudio {
        fn psg_write(&mut self, _value: u8) {}
        fn pcm_data(&mut self, _data: &[u8], _rate: u32) {}
    }

    /// Summary of one emulated frame.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    pub struct FrameReport {
        pub frame: u64,
        pub main_cycles: u64,
        pub sub_cycles: u64,
        /// Quanta cut short by a patched idle loop
        pub idle_skips: u32,
    }
}

use std::path::Path;
use types::{AudioSink, FrameReport, InputSnapshot, VideoSink};

/// A CPU-like component that can be stepped; returns cycles consumed.
pub trait Cpu {
    fn reset(&mut self);
    fn step(&mut self) -> u32;
}

/// Description of a mount point (media slot) that a system supports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPointInfo {
    /// Unique identifier for this mount point (e.g., "Cartridge", "Disc")
    pub id: String,
    /// User-friendly name for display
    pub name: String,
    /// File extensions accepted by this mount point
    pub extensions: Vec<String>,
    /// Whether this mount point is required for the system to function
    pub required: bool,
}

/// A high-level System trait tying components together.
pub trait System {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reset to initial power-on state. Fails when nothing is loaded.
    fn reset(&mut self) -> Result<(), Self::Error>;

    /// Emulate one frame, feeding the output capabilities as it goes.
    fn step_frame(
        &mut self,
        input: InputSnapshot,
        video: &mut dyn VideoSink,
        audio: &mut dyn AudioSink,
    ) -> Result<FrameReport, Self::Error>;

    /// Number of bytes `serialize` will produce.
    /// Save states never include ROM/disc data.
    fn serialize_size(&mut self) -> Result<usize, Self::Error>;

    /// Write the state into `buf`, returning the bytes written.
    fn serialize(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Restore a state produced by `serialize` for the same media.
    fn unserialize(&mut self, buf: &[u8]) -> Result<(), Self::Error>;

    /// Check if this system supports save/load state functionality
    fn supports_save_states(&self) -> bool {
        false
    }

    /// Get the list of mount points this system supports
    fn mount_points(&self) -> Vec<MountPointInfo>;

    /// Load media from a file into a specific mount point
    fn mount(&mut self, mount_point_id: &str, path: &Path) -> Result<(), Self::Error>;

    /// Unload media from a specific mount point
    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error>;

    /// Check if a mount point has media loaded
    fn is_mounted(&self, mount_point_id: &str) -> bool;
}
