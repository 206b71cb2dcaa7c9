//! Mega-CD sessions: firmware lookup, the sub CPU and disc control.

mod common;

use common::*;
use emu_core::types::{InputSnapshot, NullAudio, NullVideo};
use emu_core::System;
use emu_megadrive::{
    CoreOptions, DiskError, HardwareKind, MediaError, MegaDriveError, MegaDriveSystem,
};
use std::io::Write;

/// move.b #1,($A12001).l ; bra.s *
const RELEASE_SUB: [u16; 5] = [0x13FC, 0x0001, 0x00A1, 0x2001, 0x60FE];

fn session(dir: &std::path::Path) -> MegaDriveSystem {
    MegaDriveSystem::new(dir, CoreOptions::default())
}

fn frame(sys: &mut MegaDriveSystem) -> emu_core::types::FrameReport {
    sys.run_frame(InputSnapshot::default(), &mut NullVideo, &mut NullAudio)
        .unwrap()
}

#[test]
fn test_disc_boots_firmware_and_releases_sub_cpu() {
    let dir = temp_dir("cd_boot");
    write_firmware(&dir, &RELEASE_SUB);
    let iso = write_iso(&dir, "game.iso", b"CD TEST");
    let mut sys = session(&dir);
    sys.load_image(&iso).unwrap();

    assert_eq!(sys.hardware_kind(), Some(HardwareKind::MegaCd));
    assert!(sys.is_mounted("disc"));
    assert!(sys.sub_context().is_some());
    assert_eq!(sys.disk_count(), 1);
    assert_eq!(sys.current_disc().unwrap().path, iso);
    assert_eq!(sys.image().unwrap().game_name(), "CD TEST");
    assert_eq!(sys.save_memory().len(), 0x2000);
    assert!(sys.idle_detector().unwrap().candidates().is_empty());
    assert!(!sys.idle_detector().unwrap().is_armed());

    let report = frame(&mut sys);
    assert!(report.main_cycles > 0);
    assert!(report.sub_cycles > 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_sub_cpu_held_in_reset_does_not_run() {
    let dir = temp_dir("cd_held");
    write_firmware(&dir, &[0x60FE]);
    let iso = write_iso(&dir, "game.iso", b"HELD");
    let mut sys = session(&dir);
    sys.load_image(&iso).unwrap();
    assert_eq!(frame(&mut sys).sub_cycles, 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_ifl2_raises_level_two_on_sub_cpu() {
    // release the sub CPU, then set IFL2
    let code = [
        0x13FC, 0x0001, 0x00A1, 0x2001, 0x13FC, 0x0001, 0x00A1, 0x2000, 0x60FE,
    ];
    let dir = temp_dir("cd_ifl2");
    write_firmware(&dir, &code);
    let iso = write_iso(&dir, "game.iso", b"IFL2");
    let mut sys = session(&dir);
    sys.load_image(&iso).unwrap();
    frame(&mut sys);
    // Level 2 stays pending while the sub CPU's mask register is clear
    assert!(sys.sub_context().unwrap().pending.is_raised(2));
    assert!(!sys.main_context().unwrap().pending.is_raised(2));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_missing_firmware_fails_load() {
    let dir = temp_dir("cd_no_firmware");
    let iso = write_iso(&dir, "game.iso", b"NOFW");
    let mut sys = session(&dir);
    match sys.load_image(&iso) {
        Err(MegaDriveError::Media(MediaError::MissingFirmware { searched, .. })) => {
            assert_eq!(searched.len(), 8);
        }
        other => panic!("unexpected {:?}", other.map(|_| ())),
    }
    assert!(!sys.is_loaded());
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_zipped_firmware() {
    let dir = temp_dir("cd_zip");
    let bin = write_firmware(&dir, &RELEASE_SUB);
    let firmware = std::fs::read(&bin).unwrap();
    std::fs::remove_file(&bin).unwrap();

    let file = std::fs::File::create(dir.join("us_scd2_9306.zip")).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    zip.start_file("us_scd2_9306.bin", options).unwrap();
    zip.write_all(&firmware).unwrap();
    zip.finish().unwrap();

    let iso = write_iso(&dir, "game.iso", b"ZIP");
    let mut sys = session(&dir);
    sys.load_image(&iso).unwrap();
    assert!(frame(&mut sys).sub_cycles > 0);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_cue_sheet_boots_its_data_track() {
    let dir = temp_dir("cd_cue");
    write_firmware(&dir, &RELEASE_SUB);
    let iso = write_iso(&dir, "track01.iso", b"CUE GAME");
    let cue = dir.join("game.cue");
    std::fs::write(
        &cue,
        "FILE \"track01.iso\" BINARY\n  TRACK 01 MODE1/2048\n    INDEX 01 00:00:00\n",
    )
    .unwrap();
    let mut sys = session(&dir);
    sys.load_image(&cue).unwrap();
    let image = sys.image().unwrap();
    assert_eq!(image.path, cue);
    assert_eq!(image.data_path, iso);
    assert!(image.rom_id().starts_with("CD|"));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_disc_swapping() {
    let dir = temp_dir("cd_swap");
    write_firmware(&dir, &RELEASE_SUB);
    let disc1 = write_iso(&dir, "disc1.iso", b"DISC ONE");
    let disc2 = write_iso(&dir, "disc2.iso", b"DISC TWO");
    let mut sys = session(&dir);
    sys.load_image(&disc1).unwrap();

    sys.set_ejected(true).unwrap();
    assert!(sys.is_ejected());
    let i = sys.add_disk().unwrap();
    assert_eq!(i, 1);
    sys.replace_disk(i, Some(disc2.clone())).unwrap();
    sys.set_disk_index(i).unwrap();
    assert_eq!(sys.disk_index(), 1);
    assert_eq!(sys.current_disc().unwrap().path, disc2);

    // empty slot: tray without a disc
    sys.set_disk_index(5).unwrap();
    assert!(sys.current_disc().is_none());
    sys.set_ejected(false).unwrap();

    assert!(matches!(
        sys.set_disk_index(8),
        Err(MegaDriveError::Disk(DiskError::IndexOutOfRange { .. }))
    ));
    // the boot image is unchanged by swaps
    assert_eq!(sys.image().unwrap().path, disc1);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_replacing_active_slot_inserts_new_disc() {
    let dir = temp_dir("cd_replace_active");
    write_firmware(&dir, &RELEASE_SUB);
    let disc1 = write_iso(&dir, "disc1.iso", b"DISC ONE");
    let disc2 = write_iso(&dir, "disc2.iso", b"DISC TWO");
    let mut sys = session(&dir);
    sys.load_image(&disc1).unwrap();

    sys.replace_disk(0, Some(disc2.clone())).unwrap();
    assert_eq!(sys.disk_index(), 0);
    assert_eq!(sys.current_disc().unwrap().path, disc2);

    // Emptying the active slot leaves the disc where it is
    sys.replace_disk(0, None).unwrap();
    assert_eq!(sys.current_disc().unwrap().path, disc2);

    // Slots past the end are created on demand
    sys.replace_disk(5, Some(disc1.clone())).unwrap();
    assert_eq!(sys.disk_count(), 6);
    assert_eq!(sys.current_disc().unwrap().path, disc2);
    sys.set_disk_index(5).unwrap();
    assert_eq!(sys.current_disc().unwrap().path, disc1);
    assert!(matches!(
        sys.replace_disk(8, Some(disc1.clone())),
        Err(MegaDriveError::Disk(DiskError::IndexOutOfRange { .. }))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_disc_control_needs_a_cd_session() {
    let dir = temp_dir("cd_control_cart");
    let cart = CartBuilder::new(&[0x60FE]).write(&dir, "cart.md");
    let mut sys = session(&dir);
    assert!(matches!(sys.add_disk(), Err(MegaDriveError::NoImageLoaded)));
    sys.load_image(&cart).unwrap();
    assert!(matches!(
        sys.add_disk(),
        Err(MegaDriveError::Disk(DiskError::NotACd(_)))
    ));
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_cd_state_round_trip() {
    let dir = temp_dir("cd_state");
    write_firmware(&dir, &RELEASE_SUB);
    let iso = write_iso(&dir, "game.iso", b"STATE");
    let mut sys = session(&dir);
    sys.load_image(&iso).unwrap();
    frame(&mut sys);
    frame(&mut sys);

    let mut state = vec![0u8; sys.serialize_size().unwrap()];
    sys.serialize(&mut state).unwrap();
    let sub_pc = sys.sub_context().unwrap().cpu.pc;

    frame(&mut sys);
    assert_ne!(sys.sub_context().unwrap().cpu.pc, sub_pc);
    sys.unserialize(&state).unwrap();
    assert_eq!(sys.frame(), 2);
    assert_eq!(sys.sub_context().unwrap().cpu.pc, sub_pc);
    std::fs::remove_dir_all(&dir).unwrap();
}
