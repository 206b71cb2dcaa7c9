//! Cartridge sessions driven through the public API.

mod common;

use common::*;
use emu_core::types::{InputSnapshot, NullAudio, NullVideo};
use emu_core::System;
use emu_megadrive::{
    CoreOptions, DetectorState, HardwareKind, MegaDriveError, MegaDriveSystem, MediaError,
    IDLE_WARMUP_FRAMES, NTSC_LINES,
};

/// move #$2000,sr ; move.w #$8164,($C00004).l ; bra.s *
const VINT_LOOP: [u16; 7] = [0x46FC, 0x2000, 0x33FC, 0x8164, 0x00C0, 0x0004, 0x60FE];

/// move.w #1,($FF00).w ; loop: tst.w ($FF00).w ; bne.s loop
const SPIN_WAIT: [u16; 6] = [0x31FC, 0x0001, 0xFF00, 0x4A78, 0xFF00, 0x66FA];
const SPIN_BRANCH: u32 = 0x20A;

fn session() -> MegaDriveSystem {
    MegaDriveSystem::new(std::env::temp_dir(), CoreOptions::default())
}

fn run(sys: &mut MegaDriveSystem, frames: u64) {
    for _ in 0..frames {
        sys.run_frame(InputSnapshot::default(), &mut NullVideo, &mut NullAudio)
            .unwrap();
    }
}

#[test]
fn test_boot_and_vertical_interrupt_each_frame() {
    let dir = temp_dir("vint");
    let path = CartBuilder::new(&VINT_LOOP).write(&dir, "vint.md");
    let mut sys = session();
    sys.load_image(&path).unwrap();
    assert_eq!(sys.hardware_kind(), Some(HardwareKind::MegaDrive));
    assert_eq!(sys.main_context().unwrap().cpu.pc, ENTRY);
    assert!(sys.sub_context().is_none());

    let mut video = RecordingVideo::default();
    for _ in 0..3 {
        let report = sys
            .run_frame(InputSnapshot::default(), &mut video, &mut NullAudio)
            .unwrap();
        assert!(report.main_cycles > 400 * NTSC_LINES as u64);
        assert_eq!(report.sub_cycles, 0);
    }
    assert_eq!(sys.peek_word(IRQ_COUNTER).unwrap(), 3);
    assert_eq!(video.frames_begun, 3);
    assert_eq!(video.scanlines, 3 * 224);
    assert_eq!(video.last_frame, 3);
    assert!(video.last_mode.unwrap().sprite_limit);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_idle_loop_patched_after_warmup() {
    let dir = temp_dir("idle");
    let path = CartBuilder::new(&SPIN_WAIT).write(&dir, "spin.md");
    let mut sys = session();
    sys.load_image(&path).unwrap();

    run(&mut sys, 10);
    let detector = sys.idle_detector().unwrap();
    assert!(detector.is_armed());
    assert_eq!(detector.candidates().len(), 1);
    assert_eq!(detector.candidates()[0].pc, SPIN_BRANCH);
    assert!(sys.idle_patches().is_empty());

    run(&mut sys, IDLE_WARMUP_FRAMES - 10);
    assert_eq!(sys.idle_detector().unwrap().state(), DetectorState::Finished);
    assert_eq!(sys.idle_patches(), vec![(SPIN_BRANCH, 0x66FA, 0x71FA)]);
    assert_eq!(sys.peek_word(SPIN_BRANCH).unwrap(), 0x71FA);

    let report = sys
        .run_frame(InputSnapshot::default(), &mut NullVideo, &mut NullAudio)
        .unwrap();
    assert!(report.idle_skips > 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_psg_writes_reach_audio_sink() {
    // move.b #$9F,($C00011).l ; bra.s *
    let code = [0x13FC, 0x009F, 0x00C0, 0x0011, 0x60FE];
    let dir = temp_dir("psg");
    let path = CartBuilder::new(&code).write(&dir, "psg.md");
    let mut sys = session();
    sys.load_image(&path).unwrap();
    let mut audio = RecordingAudio::default();
    sys.run_frame(InputSnapshot::default(), &mut NullVideo, &mut audio)
        .unwrap();
    assert_eq!(audio.psg, vec![0x9F]);
    assert!(audio.pcm.is_empty());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_pico_pcm_fifo_reaches_audio_sink() {
    // move.w #$1234,($800010).l ; move.w #$5678,($800010).l ; bra.s *
    let code = [
        0x33FC, 0x1234, 0x0080, 0x0010, 0x33FC, 0x5678, 0x0080, 0x0010, 0x60FE,
    ];
    let dir = temp_dir("pico");
    let path = CartBuilder::new(&code).pico().write(&dir, "pico.md");
    let mut sys = session();
    sys.load_image(&path).unwrap();
    assert_eq!(sys.hardware_kind(), Some(HardwareKind::Pico));
    sys.set_pico_pen(0x100, 0x2A0).unwrap();
    sys.set_pico_page(9).unwrap();

    let mut audio = RecordingAudio::default();
    sys.run_frame(InputSnapshot::default(), &mut NullVideo, &mut audio)
        .unwrap();
    assert_eq!(audio.pcm, vec![(vec![0x12, 0x34, 0x56, 0x78], 16000)]);

    // pen Y high byte, page register shows six pages open
    assert_eq!(sys.peek_word(0x80_0008).unwrap() & 0xFF, 0x02);
    assert_eq!(sys.peek_word(0x80_000C).unwrap() & 0xFF, 0x3F);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_sram_reported_once_written() {
    // move.b #$5A,($200001).l ; bra.s *
    let code = [0x13FC, 0x005A, 0x0020, 0x0001, 0x60FE];
    let dir = temp_dir("sram");
    let path = CartBuilder::new(&code)
        .sram(0x20_0001, 0x20_3FFF)
        .write(&dir, "sram.md");
    let mut sys = session();
    sys.load_image(&path).unwrap();
    assert!(sys.save_memory().is_empty());

    run(&mut sys, 1);
    let saved = sys.save_memory();
    assert_eq!(saved.len(), 0x4000);
    assert_eq!(saved[1], 0x5A);

    // A fresh session picks the saved bytes back up
    let mut other = session();
    other.load_image(&path).unwrap();
    assert_eq!(other.load_save_memory(&saved).unwrap(), 0x4000);
    assert_eq!(other.peek_word(0x20_0000).unwrap(), 0x005A);
    assert_eq!(other.save_memory(), saved);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_reset_restarts_program() {
    let dir = temp_dir("reset");
    let path = CartBuilder::new(&VINT_LOOP).write(&dir, "reset.md");
    let mut sys = session();
    sys.load_image(&path).unwrap();
    run(&mut sys, 2);
    assert_ne!(sys.main_context().unwrap().cpu.pc, ENTRY);
    sys.reset().unwrap();
    let ctx = sys.main_context().unwrap();
    assert_eq!(ctx.cpu.pc, ENTRY);
    assert_eq!(ctx.cpu.sr, 0x2704);
    assert_eq!(sys.peek_word(IRQ_COUNTER).unwrap(), 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_failed_load_leaves_session_empty() {
    let dir = temp_dir("failed_load");
    let good = CartBuilder::new(&VINT_LOOP).write(&dir, "good.md");
    let tiny = dir.join("tiny.md");
    std::fs::write(&tiny, vec![0u8; 0x100]).unwrap();

    let mut sys = session();
    sys.load_image(&good).unwrap();
    assert!(matches!(
        sys.load_image(&tiny),
        Err(MegaDriveError::Media(MediaError::NotARom(_)))
    ));
    assert!(!sys.is_loaded());
    assert!(matches!(sys.reset(), Err(MegaDriveError::NoImageLoaded)));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_mount_points() {
    let dir = temp_dir("mount");
    let path = CartBuilder::new(&VINT_LOOP).write(&dir, "mount.md");
    let mut sys = session();
    let ids: Vec<String> = sys.mount_points().into_iter().map(|m| m.id).collect();
    assert_eq!(ids, vec!["cartridge", "disc"]);
    assert!(sys.supports_save_states());

    sys.mount("cartridge", &path).unwrap();
    assert!(sys.is_mounted("cartridge"));
    assert!(!sys.is_mounted("disc"));
    sys.step_frame(InputSnapshot::default(), &mut NullVideo, &mut NullAudio)
        .unwrap();
    assert_eq!(sys.frame(), 1);

    sys.unmount("disc").unwrap();
    assert!(sys.is_loaded());
    sys.unmount("cartridge").unwrap();
    assert!(!sys.is_loaded());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_region_override_applies_on_load() {
    let dir = temp_dir("region");
    let path = CartBuilder::new(&VINT_LOOP).write(&dir, "region.md");
    let mut sys = session();
    sys.load_image(&path).unwrap();
    assert_eq!(sys.region(), Some(emu_megadrive::Region::Us));

    let mut options = CoreOptions::default();
    assert!(options.set("md_region", "Europe"));
    sys.options_changed(options);
    assert_eq!(sys.region(), Some(emu_megadrive::Region::Us));
    sys.load_image(&path).unwrap();
    assert_eq!(sys.region(), Some(emu_megadrive::Region::Europe));

    let mut video = RecordingVideo::default();
    sys.run_frame(InputSnapshot::default(), &mut video, &mut NullAudio)
        .unwrap();
    assert!(video.last_mode.unwrap().pal);
    std::fs::remove_dir_all(&dir).unwrap();
}
