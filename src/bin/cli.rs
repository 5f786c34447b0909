use anyhow::{anyhow, bail, Context, Result};
use bytes::Bytes;
use crabshot::types::{CameraAttributes, CameraFacing, CameraFlash, CameraSize, SurfaceHandle};
use crabshot::{CameraController, CameraEvents, CrabShotConfig, SimulatedBackend};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const USAGE: &str = "Usage: crabshot-cli <attributes|capture|preview|config> [options]

  attributes [--facing back|front] [--json]
  capture    [--facing F] [--flash off|on|auto|torch] [--size WxH] [--out FILE] [--timeout MS] [--json]
  preview    [--facing F] [--seconds N] [--orientation DEG] [--json]
  config     [--config FILE] [--init] [--json]

Global: --config FILE (default crabshot.toml)";

enum CliEvent {
    Opened(CameraAttributes),
    Closed,
    PreviewStarted,
}

struct CliEvents {
    tx: Sender<CliEvent>,
}

impl CameraEvents for CliEvents {
    fn on_camera_opened(&self, attributes: &CameraAttributes) {
        let _ = self.tx.send(CliEvent::Opened(attributes.clone()));
    }

    fn on_camera_closed(&self) {
        let _ = self.tx.send(CliEvent::Closed);
    }

    fn on_preview_started(&self) {
        let _ = self.tx.send(CliEvent::PreviewStarted);
    }
}

struct Options {
    facing: Option<CameraFacing>,
    flash: Option<CameraFlash>,
    size: Option<CameraSize>,
    out: Option<PathBuf>,
    timeout: Duration,
    seconds: u64,
    orientation: Option<u32>,
    config_path: PathBuf,
    init: bool,
    json: bool,
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut options = Options {
        facing: None,
        flash: None,
        size: None,
        out: None,
        timeout: Duration::from_secs(5),
        seconds: 3,
        orientation: None,
        config_path: CrabShotConfig::default_path(),
        init: false,
        json: false,
    };

    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--facing" => options.facing = Some(parse_value(args, &mut i, flag)?),
            "--flash" => options.flash = Some(parse_value(args, &mut i, flag)?),
            "--size" => options.size = Some(parse_value(args, &mut i, flag)?),
            "--out" => options.out = Some(PathBuf::from(next_value(args, &mut i, flag)?)),
            "--timeout" => {
                options.timeout = Duration::from_millis(next_value(args, &mut i, flag)?.parse()?)
            }
            "--seconds" => options.seconds = next_value(args, &mut i, flag)?.parse()?,
            "--orientation" => options.orientation = Some(next_value(args, &mut i, flag)?.parse()?),
            "--config" => options.config_path = PathBuf::from(next_value(args, &mut i, flag)?),
            "--init" => options.init = true,
            "--json" => options.json = true,
            other => bail!("Unknown option: {}", other),
        }
        i += 1;
    }
    Ok(options)
}

fn next_value(args: &[String], i: &mut usize, flag: &str) -> Result<String> {
    *i += 1;
    args.get(*i)
        .cloned()
        .ok_or_else(|| anyhow!("{} requires a value", flag))
}

/// Parse a value whose `FromStr` error is a plain message.
fn parse_value<T>(args: &[String], i: &mut usize, flag: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    next_value(args, i, flag)?
        .parse()
        .map_err(|e: String| anyhow!("{}: {}", flag, e))
}

fn main() -> Result<()> {
    crabshot::init_logging();
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("{}", USAGE);
        std::process::exit(1);
    }

    let options = parse_options(&args[2..])?;
    match args[1].as_str() {
        "attributes" => cmd_attributes(&options),
        "capture" => cmd_capture(&options),
        "preview" => cmd_preview(&options),
        "config" => cmd_config(&options),
        "--help" | "-h" | "help" => {
            println!("{}", USAGE);
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}\n{}", other, USAGE);
            std::process::exit(1);
        }
    }
}

fn load_config(options: &Options) -> Result<CrabShotConfig> {
    CrabShotConfig::load_layered(Some(&options.config_path)).context("loading configuration")
}

/// Open the simulated camera and wait for the opened notification.
fn open_camera(
    options: &Options,
    config: &CrabShotConfig,
) -> Result<(CameraController, Receiver<CliEvent>, CameraAttributes)> {
    let (tx, rx) = unbounded();
    let camera = CameraController::new(
        SimulatedBackend::default(),
        Arc::new(CliEvents { tx }),
        config.clone(),
    )?;
    let facing = options.facing.unwrap_or(config.camera.default_facing);
    camera.open(facing)?;

    let deadline = Instant::now() + options.timeout;
    loop {
        match rx.recv_deadline(deadline) {
            Ok(CliEvent::Opened(attributes)) => return Ok((camera, rx, attributes)),
            Ok(CliEvent::Closed) => bail!("{} camera closed while opening", facing),
            Ok(CliEvent::PreviewStarted) => {}
            Err(_) => bail!("timed out opening the {} camera", facing),
        }
    }
}

fn wait_preview_started(rx: &Receiver<CliEvent>, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match rx.recv_deadline(deadline) {
            Ok(CliEvent::PreviewStarted) => return Ok(()),
            Ok(CliEvent::Closed) => bail!("camera closed before preview started"),
            Ok(CliEvent::Opened(_)) => {}
            Err(_) => bail!("timed out waiting for preview"),
        }
    }
}

fn cmd_attributes(options: &Options) -> Result<()> {
    let config = load_config(options)?;
    let (camera, _rx, attributes) = open_camera(options, &config)?;
    camera.release();

    if options.json {
        println!("{}", serde_json::to_string_pretty(&attributes)?);
    } else {
        println!("facing: {}", attributes.facing);
        println!("sensor orientation: {}", attributes.sensor_orientation);
        let sizes = |list: &[CameraSize]| {
            list.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
        };
        println!("preview sizes: {}", sizes(&attributes.preview_sizes));
        println!("photo sizes: {}", sizes(&attributes.photo_sizes));
        let flashes: Vec<&str> = attributes.flashes.iter().map(CameraFlash::as_str).collect();
        println!("flash modes: {}", flashes.join(", "));
    }
    Ok(())
}

fn cmd_capture(options: &Options) -> Result<()> {
    let config = load_config(options)?;
    let (camera, rx, attributes) = open_camera(options, &config)?;

    let size = match options.size {
        Some(size) => size,
        None => attributes
            .largest_photo_size()
            .ok_or_else(|| anyhow!("camera reports no photo sizes"))?,
    };
    camera.set_photo_size(size)?;
    if let Some(flash) = options.flash {
        camera.set_flash(flash)?;
    }
    camera.start_preview(SurfaceHandle(0))?;
    wait_preview_started(&rx, options.timeout)?;

    let (jpeg_tx, jpeg_rx) = unbounded::<Bytes>();
    let started = Instant::now();
    let id = camera.capture_photo(move |jpeg| {
        let _ = jpeg_tx.send(jpeg);
    })?;
    let jpeg = jpeg_rx
        .recv_timeout(options.timeout)
        .map_err(|_| anyhow!("capture {} timed out in state {}", id, camera.capture_state()))?;
    let elapsed = started.elapsed();
    camera.release();

    if let Some(path) = &options.out {
        std::fs::write(path, &jpeg).with_context(|| format!("writing {}", path.display()))?;
    }
    if options.json {
        let report = serde_json::json!({
            "id": id,
            "bytes": jpeg.len(),
            "size": size,
            "flash": camera.flash(),
            "elapsed_ms": elapsed.as_millis() as u64,
            "out": options.out,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Captured {} bytes at {} in {:?}{}",
            jpeg.len(),
            size,
            elapsed,
            options
                .out
                .as_ref()
                .map(|p| format!(" -> {}", p.display()))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn cmd_preview(options: &Options) -> Result<()> {
    let config = load_config(options)?;
    let (camera, rx, attributes) = open_camera(options, &config)?;
    let size = attributes
        .largest_photo_size()
        .ok_or_else(|| anyhow!("camera reports no photo sizes"))?;
    camera.set_photo_size(size)?;
    if let Some(degrees) = options.orientation {
        camera.set_preview_orientation(degrees)?;
    }

    let frames = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&frames);
    let json = options.json;
    camera.set_preview_listener(move |image| {
        let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
        if json {
            println!(
                "{}",
                serde_json::json!({ "frame": n, "width": image.width(), "height": image.height() })
            );
        } else {
            println!("preview frame {}: {}x{}", n, image.width(), image.height());
        }
    });

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    ctrlc::set_handler(move || stop_flag.store(true, Ordering::SeqCst))?;

    camera.start_preview(SurfaceHandle(0))?;
    wait_preview_started(&rx, options.timeout)?;
    let deadline = Instant::now() + Duration::from_secs(options.seconds);
    while !stop.load(Ordering::SeqCst) && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }

    camera.stop_preview()?;
    let stats = camera.frame_stats();
    camera.release();
    if options.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!(
            "{} previews delivered, {} dropped",
            stats.previews_delivered, stats.previews_dropped
        );
    }
    Ok(())
}

fn cmd_config(options: &Options) -> Result<()> {
    if options.init {
        CrabShotConfig::default().save_to_file(&options.config_path)?;
        println!("Wrote {}", options.config_path.display());
        return Ok(());
    }
    let config = load_config(options)?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}
