use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rollcall_core::{
    CsvAttendanceLog, FaceDetector, FaceMesh, FileStore, LandmarkExtractor, RecordStore,
};
use rollcall_engine::{Command, Config, Engine, Outcome, V4lCameras};
use rollcall_hw::Camera;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-landmark attendance register")]
struct Cli {
    /// V4L2 device (overrides ROLLCALL_CAMERA_DEVICE)
    #[arg(long, global = true)]
    device: Option<String>,
    /// Match threshold in pixels (overrides ROLLCALL_MATCH_THRESHOLD)
    #[arg(long, global = true)]
    threshold: Option<f32>,
    /// Directory holding registration records
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Attendance CSV file
    #[arg(long, global = true)]
    log: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a face: type `s` + Enter to save, `c` to cancel
    Register {
        /// Name to register the face under
        name: String,
    },
    /// Mark attendance by matching the live face: `q` + Enter to give up
    Mark {
        /// Registered name
        name: String,
    },
    /// Show the attendance log
    View,
    /// Export the attendance log as CSV with a header row
    Export {
        /// Output file, or `-` for stdout
        path: PathBuf,
    },
    /// List registered names
    List,
    /// Run camera and model diagnostics
    Test,
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Register { name } => {
            println!("Opening camera... type `s` + Enter to save your face, `c` + Enter to cancel.");
            let mut engine = build_engine(&config)?;
            let mut triggers = spawn_trigger_reader()?;
            Ok(report(engine.register(&name, &mut triggers)))
        }
        Commands::Mark { name } => {
            println!("Opening camera... looking for your face. Type `q` + Enter to stop.");
            let mut engine = build_engine(&config)?;
            let mut triggers = spawn_trigger_reader()?;
            Ok(report(engine.mark_attendance(&name, &mut triggers)))
        }
        Commands::View => {
            view(&config)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Export { path } => {
            export(&config, &path)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            let ids = FileStore::new(&config.data_dir)
                .identities()
                .context("listing registrations")?;
            if ids.is_empty() {
                println!("No faces registered");
            }
            for id in ids {
                println!("{id}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Test => {
            diagnostics(&config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load().context("loading configuration")?;
    if let Some(device) = &cli.device {
        config.camera_device = device.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.match_threshold = threshold;
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(log) = &cli.log {
        config.log_path = log.clone();
    }
    config.validate()?;
    tracing::debug!(?config, "configuration");
    Ok(config)
}

fn build_engine(
    config: &Config,
) -> Result<Engine<V4lCameras, FaceMesh, FileStore, CsvAttendanceLog>> {
    let extractor = FaceMesh::load(&config.detector_model_path_str(), &config.model_path_str())
        .context("loading face models")?;
    Ok(Engine::new(
        V4lCameras::new(config.camera_device.as_str()),
        extractor,
        FileStore::new(&config.data_dir),
        CsvAttendanceLog::new(&config.log_path),
    )
    .with_threshold(config.match_threshold)
    .with_warmup_frames(config.warmup_frames))
}

/// Forward stdin lines as trigger commands. EOF closes the channel, which
/// the session reads as `Quit`.
fn spawn_trigger_reader() -> Result<mpsc::Receiver<Command>> {
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("rollcall-keys".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                match Command::from_key(&line) {
                    Some(cmd) => {
                        if tx.send(cmd).is_err() {
                            break;
                        }
                    }
                    None => eprintln!("unknown key {:?}: use s (save), c (cancel), q (quit)", line.trim()),
                }
            }
        })
        .context("spawning trigger reader")?;
    Ok(rx)
}

fn report(outcome: Outcome) -> ExitCode {
    println!("{}", outcome.message);
    if outcome.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn view(config: &Config) -> Result<()> {
    let log = CsvAttendanceLog::new(&config.log_path);
    if !log.exists() {
        println!("No attendance data found yet.");
        return Ok(());
    }

    let entries = log.read_all().context("reading attendance log")?;
    let width = entries
        .iter()
        .map(|e| e.identity.chars().count())
        .max()
        .unwrap_or(0)
        .max("Name".len());

    println!("{:<width$}  Date & Time", "Name");
    for entry in &entries {
        println!("{:<width$}  {}", entry.identity, entry.formatted_timestamp());
    }
    Ok(())
}

fn export(config: &Config, path: &Path) -> Result<()> {
    let log = CsvAttendanceLog::new(&config.log_path);
    if path.as_os_str() == "-" {
        log.export(std::io::stdout().lock())
            .context("exporting attendance")?;
        return Ok(());
    }

    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let rows = log.export(file).context("exporting attendance")?;
    println!("Exported {rows} rows to {}", path.display());
    Ok(())
}

fn diagnostics(config: &Config) -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
    }
    for dev in &devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }

    println!("Opening {}...", config.camera_device);
    let mut camera = Camera::open(&config.camera_device)
        .with_context(|| format!("opening {}", config.camera_device))?;
    let frame = camera.capture_frame().context("capturing test frame")?;
    println!(
        "Captured {}x{} {:?} frame (driver {}), brightness {:.1}",
        frame.width,
        frame.height,
        camera.pixel_format(),
        camera.driver().unwrap_or_else(|| "unknown".into()),
        frame.avg_brightness()
    );

    match FaceDetector::load(&config.detector_model_path_str()) {
        Ok(mut detector) => {
            let faces = detector.detect(&frame.data, frame.width, frame.height)?;
            match faces.first() {
                Some(face) => println!(
                    "Face box {:.0}x{:.0} at ({:.0}, {:.0}), confidence {:.2} ({} found)",
                    face.width,
                    face.height,
                    face.x,
                    face.y,
                    face.confidence,
                    faces.len()
                ),
                None => println!("No face box found"),
            }
        }
        Err(e) => println!("Face detector unavailable: {e}"),
    }

    match FaceMesh::load(&config.detector_model_path_str(), &config.model_path_str()) {
        Ok(mut mesh) => match mesh.extract(&frame.data, frame.width, frame.height)? {
            Some(points) => println!("Face mesh: {} landmarks", points.len()),
            None => println!("No face mesh"),
        },
        Err(e) => println!("Face-mesh pipeline unavailable: {e}"),
    }
    Ok(())
}
