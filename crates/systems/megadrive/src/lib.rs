//! Sega Mega Drive / Genesis, Mega-CD and Pico emulation core.
//!
//! # Architecture
//!
//! - **Bus**: per-CPU `BusMap` of `(base, mask)` regions with a 64 KiB page table
//! - **CPUs**: main 68000 @ 7.67 MHz, Mega-CD sub 68000 @ 12.5 MHz, each wrapped
//!   in a `CpuContext` that owns its cycle budget and pending-interrupt mask
//! - **Idle loops**: a warm-up detector that rewrites spin-wait branches so a
//!   waiting CPU gives up the rest of its time slice
//! - **Media**: cartridge / CD image classification, region and firmware lookup
//! - **Save states**: chunked binary format driven through `emu_core::state_stream`
//!
//! Pixel and audio rendering are outside this crate; video and audio sinks
//! receive timing events and raw chip traffic.

mod bus;
mod context;
mod devices;
mod disks;
mod hardware;
mod idle;
mod media;
mod memory;
mod options;
mod state;
mod system;

pub use bus::{BusError, BusMap, Handler, Region as BusRegion};
pub use context::{ContextKind, CpuContext, PendingInterrupts};
pub use disks::{DiskError, DiskSlots, MAX_DISKS};
pub use devices::{PCM_BUFFER_SIZE, HINT_PENDING, VINT_PENDING};
pub use hardware::Hardware;
pub use idle::{
    is_idle_branch, is_idle_code, DetectorState, IdleCandidate, IdleDetector, PatchOverlay, Proposal,
    IDLE_WARMUP_FRAMES, MAX_REJECTIONS,
};
pub use media::{
    classify, find_firmware, firmware_names, parse_cue, read_firmware, CartHeader, CueSheet,
    CueTrack, HardwareKind, Layout, MediaError, MediaImage, MediaKind, Region, SramInfo,
    TrackType,
};
pub use memory::CellMemory;
pub use options::{CoreOptions, InputDevice, RegionOverride};
pub use system::{
    MegaDriveSystem, MAIN_CYCLES_PER_LINE, NTSC_LINES, PAL_LINES, SUB_CYCLES_PER_LINE,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MegaDriveError {
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Bus(#[from] BusError),
    #[error(transparent)]
    Disk(#[from] DiskError),
    #[error("Out of memory allocating {0} bytes")]
    OutOfMemory(usize),
    #[error("No program image loaded")]
    NoImageLoaded,
    #[error("Save state rejected: {0}")]
    StateMismatch(String),
    #[error("Invalid mount point: {0}")]
    InvalidMountPoint(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
