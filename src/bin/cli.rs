use crabrecord::recording::FrameGeometry;
use crabrecord::{CrabRecordConfig, FormatTag, Recorder, RecordingStats};
use std::env;
use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    crabrecord::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: crabrecord-cli <command> [args]");
        eprintln!("Commands: record, record-jpeg, info");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "record" => cmd_record(&args),
        "record-jpeg" => cmd_record_jpeg(&args),
        "info" => cmd_info(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

/// Options shared by the recording commands
struct RecordArgs {
    positional: Vec<String>,
    format: Option<FormatTag>,
    frames: Option<u64>,
    interval_ms: u64,
    config_path: Option<PathBuf>,
    json: bool,
}

fn parse_record_args(args: &[String]) -> Result<RecordArgs, Box<dyn std::error::Error>> {
    let mut parsed = RecordArgs {
        positional: Vec::new(),
        format: None,
        frames: None,
        interval_ms: 33,
        config_path: None,
        json: false,
    };

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--format" => {
                i += 1;
                parsed.format = parse_format(args.get(i).ok_or("--format needs a value")?)?;
            }
            "--frames" => {
                i += 1;
                parsed.frames = Some(args.get(i).ok_or("--frames needs a value")?.parse()?);
            }
            "--interval-ms" => {
                i += 1;
                parsed.interval_ms = args.get(i).ok_or("--interval-ms needs a value")?.parse()?;
            }
            "--config" => {
                i += 1;
                parsed.config_path = Some(PathBuf::from(args.get(i).ok_or("--config needs a value")?));
            }
            "--json" => parsed.json = true,
            other => parsed.positional.push(other.to_string()),
        }
        i += 1;
    }

    Ok(parsed)
}

fn parse_format(s: &str) -> Result<Option<FormatTag>, Box<dyn std::error::Error>> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Ok(None),
        "yuyv" => Ok(Some(FormatTag::Packed422)),
        "i422" => Ok(Some(FormatTag::Planar422)),
        "nv12" => Ok(Some(FormatTag::SemiPlanar420)),
        "mjpeg" | "jpeg" => Ok(Some(FormatTag::Compressed)),
        other => Err(format!("Unknown format: {} (auto, yuyv, i422, nv12)", other).into()),
    }
}

fn load_config(path: Option<&Path>) -> Result<CrabRecordConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => CrabRecordConfig::load_from_file(path)?,
        None => CrabRecordConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn build_recorder(
    parsed: &RecordArgs,
    width: u32,
    height: u32,
    output: &str,
) -> Result<Recorder, Box<dyn std::error::Error>> {
    let config = load_config(parsed.config_path.as_deref())?;
    let recorder = Recorder::with_config(config.recording_config(width, height, output));
    if !recorder.start() {
        return Err("Failed to start recording (see log for details)".into());
    }
    Ok(recorder)
}

fn cmd_record(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // record <input.raw> <width> <height> <output.mp4> [--format f] [--frames n] [--interval-ms n] [--config file] [--json]
    let parsed = parse_record_args(args)?;
    if parsed.positional.len() < 4 {
        eprintln!(
            "Usage: crabrecord-cli record <input.raw> <width> <height> <output.mp4> \
             [--format auto|yuyv|i422|nv12] [--frames N] [--interval-ms N] [--config file] [--json]"
        );
        std::process::exit(1);
    }
    let input = PathBuf::from(&parsed.positional[0]);
    let width: u32 = parsed.positional[1].parse()?;
    let height: u32 = parsed.positional[2].parse()?;
    let output = &parsed.positional[3];

    let geometry = FrameGeometry::new(width, height);
    let input_len = fs::metadata(&input)?.len() as usize;
    let frame_len = raw_frame_len(parsed.format, geometry, input_len)?;

    let recorder = build_recorder(&parsed, width, height, output)?;
    let mut reader = BufReader::new(File::open(&input)?);
    let mut frame = vec![0u8; frame_len];
    let mut sent = 0u64;

    loop {
        if parsed.frames.is_some_and(|limit| sent >= limit) {
            break;
        }
        match reader.read_exact(&mut frame) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => {
                recorder.stop();
                return Err(e.into());
            }
        }

        match parsed.format {
            Some(tag) => recorder.write_frame_as(&frame, tag),
            None => recorder.write_frame(&frame),
        }
        sent += 1;
        thread::sleep(Duration::from_millis(parsed.interval_ms));
    }

    report(recorder.stop(), parsed.json)
}

// Frame size inside a raw dump; with no format given, the size that divides
// the file evenly wins, 4:2:2 first.
fn raw_frame_len(
    format: Option<FormatTag>,
    geometry: FrameGeometry,
    input_len: usize,
) -> Result<usize, Box<dyn std::error::Error>> {
    match format {
        Some(FormatTag::SemiPlanar420) => Ok(geometry.len_420()),
        Some(FormatTag::Packed422) | Some(FormatTag::Planar422) => Ok(geometry.len_422()),
        Some(FormatTag::Compressed) => Err("use record-jpeg for JPEG frames".into()),
        None => [geometry.len_422(), geometry.len_420()]
            .into_iter()
            .find(|&len| len > 0 && input_len >= len && input_len % len == 0)
            .ok_or_else(|| {
                format!(
                    "{} bytes is not a whole number of {}x{} frames",
                    input_len, geometry.width, geometry.height
                )
                .into()
            }),
    }
}

fn cmd_record_jpeg(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    // record-jpeg <dir> <width> <height> <output.mp4> [--frames n] [--interval-ms n] [--config file] [--json]
    let parsed = parse_record_args(args)?;
    if parsed.positional.len() < 4 {
        eprintln!(
            "Usage: crabrecord-cli record-jpeg <dir> <width> <height> <output.mp4> \
             [--frames N] [--interval-ms N] [--config file] [--json]"
        );
        std::process::exit(1);
    }
    let dir = PathBuf::from(&parsed.positional[0]);
    let width: u32 = parsed.positional[1].parse()?;
    let height: u32 = parsed.positional[2].parse()?;
    let output = &parsed.positional[3];

    let mut files: Vec<PathBuf> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(format!("No JPEG files in {}", dir.display()).into());
    }
    if let Some(limit) = parsed.frames {
        files.truncate(limit as usize);
    }

    let recorder = build_recorder(&parsed, width, height, output)?;
    for path in &files {
        match fs::read(path) {
            Ok(bytes) => recorder.write_frame_as(&bytes, FormatTag::Compressed),
            Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
        }
        thread::sleep(Duration::from_millis(parsed.interval_ms));
    }

    report(recorder.stop(), parsed.json)
}

fn report(stats: Option<RecordingStats>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let stats = stats.ok_or("Recorder was not recording")?;
    if json {
        println!("{}", serde_json::to_string(&stats)?);
    } else {
        let c = &stats.counters;
        println!("Output: {}", stats.output_path);
        println!(
            "Frames: {} received, {} submitted, {} dropped",
            c.frames_received,
            c.frames_submitted,
            c.dropped_total()
        );
        println!(
            "  unrecognized {}, decode {}, backpressure {}, mismatch {}",
            c.dropped_unrecognized, c.dropped_decode, c.dropped_backpressure, c.dropped_mismatch
        );
        println!("Samples written: {}", c.samples_written);
        if stats.container_written {
            println!(
                "Container: {:.2}s, {} bytes, {:.0} bps",
                stats.duration_secs,
                stats.bytes_written,
                stats.avg_bitrate()
            );
        } else {
            println!("Container: not written (no samples)");
        }
    }
    Ok(())
}

fn cmd_info(args: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let info = crabrecord::get_info();
    if args.contains(&"--json".to_string()) {
        println!("{}", serde_json::to_string(&info)?);
    } else {
        println!("{} {}", info.name, info.version);
        println!("{}", info.description);
        println!("Default codec backend: {}", info.default_backend);
    }
    Ok(())
}
