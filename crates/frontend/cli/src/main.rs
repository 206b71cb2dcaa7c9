use anyhow::{bail, Context, Result};
use clap::Parser;
use emu_core::logging::LogConfig;
use emu_core::types::{AudioSink, InputSnapshot, NullVideo};
use emu_core::System;
use emu_megadrive::{CoreOptions, MegaDriveSystem};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Headless Mega Drive / Mega-CD / Pico runner")]
struct Args {
    /// Cartridge ROM, CD image (.iso/.bin) or cue sheet
    rom: PathBuf,

    /// Directory searched for Mega-CD firmware
    #[arg(long, default_value = ".")]
    system_dir: PathBuf,

    /// Number of frames to run
    #[arg(long, default_value_t = 60)]
    frames: u64,

    /// Core log filter, e.g. "warn,idle=debug,media=info"
    #[arg(long)]
    log: Option<String>,

    /// Write core log output to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Messages per second allowed through each log category
    #[arg(long, default_value_t = 60)]
    log_rate: usize,

    /// Core option as key=value (repeatable), e.g. md_region=Europe
    #[arg(long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    /// JSON object of core options, applied before --option
    #[arg(long)]
    options_file: Option<PathBuf>,

    /// Buttons held on pad 1 for the whole run (hex, MXYZ SACB RLDU)
    #[arg(long, value_parser = parse_hex, default_value = "0")]
    pad1: u16,

    /// Restore this save state after loading
    #[arg(long)]
    load_state: Option<PathBuf>,

    /// Write a save state here after the last frame
    #[arg(long)]
    save_state: Option<PathBuf>,

    /// Battery-backed memory file, read at start when present and
    /// written back at exit
    #[arg(long)]
    save_memory: Option<PathBuf>,

    /// Additional discs for multi-disc titles (repeatable)
    #[arg(long = "disc")]
    discs: Vec<PathBuf>,

    /// Print the summary as JSON
    #[arg(long, default_value_t = false)]
    json: bool,
}

fn parse_hex(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("{}: {}", s, e))
}

/// Counts sound chip traffic without playing it
#[derive(Default)]
struct CountingAudio {
    psg_writes: u64,
    pcm_bytes: u64,
}

impl AudioSink for CountingAudio {
    fn psg_write(&mut self, _value: u8) {
        self.psg_writes += 1;
    }

    fn pcm_data(&mut self, data: &[u8], _rate: u32) {
        self.pcm_bytes += data.len() as u64;
    }
}

fn core_options(args: &Args) -> Result<CoreOptions> {
    let mut options = match &args.options_file {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            CoreOptions::from_json(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => CoreOptions::default(),
    };
    for pair in &args.options {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("--option expects KEY=VALUE, got {:?}", pair);
        };
        if !options.set(key.trim(), value.trim()) {
            log::warn!("option {} not applied", pair);
        }
    }
    Ok(options)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = LogConfig::global();
    config.set_rate_limit(args.log_rate);
    if let Some(filter) = &args.log {
        config.apply_filter(filter)?;
    }
    if let Some(path) = &args.log_file {
        config.set_log_file(path.clone())?;
    }

    let options = core_options(&args)?;
    log::debug!("core options: {}", options.to_json()?);
    let mut sys = MegaDriveSystem::new(&args.system_dir, options);
    sys.load_image(&args.rom)
        .with_context(|| format!("loading {}", args.rom.display()))?;

    for disc in &args.discs {
        let index = sys.add_disk()?;
        sys.replace_disk(index, Some(disc.clone()))?;
        log::info!("disc {} in slot {}", disc.display(), index);
    }

    if let Some(path) = args.save_memory.as_ref().filter(|p| p.is_file()) {
        let data = fs::read(path)?;
        let used = sys.load_save_memory(&data)?;
        log::info!("restored {} bytes of save memory from {}", used, path.display());
    }

    if let Some(path) = &args.load_state {
        let data = fs::read(path)?;
        sys.unserialize(&data)
            .with_context(|| format!("restoring {}", path.display()))?;
        log::info!("restored state at frame {}", sys.frame());
    }

    let input = InputSnapshot::new(args.pad1, 0);
    let mut audio = CountingAudio::default();
    let mut main_cycles = 0u64;
    let mut sub_cycles = 0u64;
    let mut idle_skips = 0u64;
    for _ in 0..args.frames {
        let report = sys.step_frame(input, &mut NullVideo, &mut audio)?;
        main_cycles += report.main_cycles;
        sub_cycles += report.sub_cycles;
        idle_skips += report.idle_skips as u64;
    }

    if let Some(path) = &args.save_state {
        let mut buf = vec![0u8; sys.serialize_size()?];
        let n = sys.serialize(&mut buf)?;
        fs::write(path, &buf[..n])?;
        log::info!("wrote {} byte state to {}", n, path.display());
    }

    if let Some(path) = &args.save_memory {
        let data = sys.save_memory();
        if !data.is_empty() {
            fs::write(path, &data)?;
            log::info!("wrote {} bytes of save memory to {}", data.len(), path.display());
        }
    }

    let image = sys.image().context("no image after load")?;
    let patches: Vec<String> = sys
        .idle_patches()
        .iter()
        .map(|(addr, from, to)| format!("{:06X}: {:04X} -> {:04X}", addr, from, to))
        .collect();
    let summary = serde_json::json!({
        "image": image.path.display().to_string(),
        "rom_id": image.rom_id(),
        "name": image.game_name(),
        "hardware": format!("{:?}", sys.hardware_kind().context("no machine")?),
        "region": sys.region().map(|r| r.to_string()),
        "frames": sys.frame(),
        "main_cycles": main_cycles,
        "sub_cycles": sub_cycles,
        "idle_skips": idle_skips,
        "idle_patches": patches,
        "psg_writes": audio.psg_writes,
        "pcm_bytes": audio.pcm_bytes,
        "discs": sys.disk_count(),
    });

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{} ({})", image.game_name(), image.rom_id());
        println!(
            "{} frames on {}, region {}",
            sys.frame(),
            summary["hardware"].as_str().unwrap_or("?"),
            summary["region"].as_str().unwrap_or("?")
        );
        println!(
            "cycles: main {} sub {}, idle skips {}",
            main_cycles, sub_cycles, idle_skips
        );
        for p in &patches {
            println!("idle patch {}", p);
        }
        println!(
            "audio: {} PSG writes, {} PCM bytes",
            audio.psg_writes, audio.pcm_bytes
        );
    }

    sys.shutdown();
    Ok(())
}
