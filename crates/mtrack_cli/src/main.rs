//! MotionTracker CLI Entry Point
//!
//! Headless batch tracking and region matching:
//!
//! ```text
//! motiontracker batch recordings/ --tracker KCF --unit mm
//! motiontracker match recordings/ref.mp4 --method auto --threshold 0.8
//! motiontracker config
//! ```
//!
//! Defaults come from `motiontracker.toml`; flags override them.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context as _};
use clap::{Args, Parser, Subcommand};

use mtrack_core::calibration::Unit;
use mtrack_core::config::{ConfigManager, Settings};
use mtrack_core::differentiation::DiffSpec;
use mtrack_core::logging::{init_tracing, LogConfig, LogLevel, RunLogger};
use mtrack_core::matching::MatchMethod;
use mtrack_core::orchestrator::{
    find_videos, BatchOptions, BatchRunner, CancelHandle, MatchRunOptions, MatchRunner,
};
use mtrack_core::tracking::{TrackerKind, TrackingOptions};
use mtrack_core::video::FfmpegOpener;

const DEFAULT_CONFIG: &str = "motiontracker.toml";

#[derive(Parser, Debug)]
#[command(name = "motiontracker", version, about = "Object tracking and kinematics from video")]
struct Cli {
    /// Config file (defaults to ./motiontracker.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level when RUST_LOG is not set
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Directory for per-run log files
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Also write tracing output to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Track objects in videos and write kinematic CSVs
    Batch(BatchArgs),
    /// Copy a reference video's objects to other videos by region matching
    Match(MatchArgs),
    /// Create or complete the config file and print its location
    Config,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Video files, directories or glob patterns
    #[arg(required = true)]
    videos: Vec<String>,

    /// Tracker algorithm
    #[arg(long)]
    tracker: Option<TrackerKind>,

    /// Record box width and height
    #[arg(long)]
    size_tracking: bool,

    /// Frame rate override
    #[arg(long)]
    fps: Option<f64>,

    /// Differentiation method
    #[arg(long)]
    diff_algo: Option<String>,

    /// Comma-separated method parameters (the cutoff frequency with --optimize)
    #[arg(long)]
    diff_params: Option<String>,

    /// JSON object of named method parameters
    #[arg(long)]
    diff_options: Option<String>,

    /// Choose method parameters automatically
    #[arg(long)]
    optimize: bool,

    /// Output unit (pix, mm, m)
    #[arg(long)]
    unit: Option<Unit>,

    /// Keep image coordinates (Y down)
    #[arg(long)]
    no_flip_y: bool,

    /// Parallel videos (0 = all cores)
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args, Debug)]
struct MatchArgs {
    /// Reference video with a settings file
    reference: PathBuf,

    /// Target videos, directories or patterns (default: the reference's directory)
    targets: Vec<String>,

    /// Reference frame index
    #[arg(long, default_value_t = 0)]
    frame: u32,

    /// Target frame index
    #[arg(long, default_value_t = 0)]
    target_frame: u32,

    /// Matching method
    #[arg(long)]
    method: Option<MatchMethod>,

    /// Minimum confidence to accept a match
    #[arg(long)]
    threshold: Option<f64>,

    /// Replace existing target settings
    #[arg(long)]
    overwrite: bool,

    /// Match without writing settings
    #[arg(long)]
    dry_run: bool,

    /// Parallel targets (0 = all cores)
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut manager = ConfigManager::new(cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)));
    let settings = load_settings(&mut manager, cli.config.is_some(), &cli.command)?;

    let level = cli.log_level.unwrap_or(settings.logging.level);
    let log_file = tracing_log_file(&cli, &settings);
    let _guard = init_tracing(level, log_file.as_deref());
    if manager.path().exists() {
        tracing::debug!("[Config] Using {}", manager.path().display());
    }

    match &cli.command {
        Commands::Batch(args) => run_batch(&cli, &settings, level, args),
        Commands::Match(args) => run_match(&cli, &settings, level, args),
        Commands::Config => {
            println!("{}", manager.path().display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_settings(manager: &mut ConfigManager, explicit: bool, command: &Commands) -> anyhow::Result<Settings> {
    if matches!(command, Commands::Config) {
        manager.load_or_create()?;
    } else if explicit || manager.path().exists() {
        manager
            .load()
            .with_context(|| format!("loading {}", manager.path().display()))?;
    }
    Ok(manager.settings().clone())
}

fn tracing_log_file(cli: &Cli, settings: &Settings) -> Option<PathBuf> {
    cli.log_file
        .clone()
        .or_else(|| (!settings.logging.log_file.is_empty()).then(|| PathBuf::from(&settings.logging.log_file)))
}

fn run_logger(cli: &Cli, settings: &Settings, level: LogLevel, name: &str) -> anyhow::Result<RunLogger> {
    let mut config = LogConfig::from(&settings.logging);
    config.level = level;
    let dir = cli
        .log_dir
        .clone()
        .or_else(|| (!settings.logging.log_dir.is_empty()).then(|| PathBuf::from(&settings.logging.log_dir)));
    match dir {
        Some(dir) => RunLogger::new(name, &dir, config)
            .with_context(|| format!("creating log file in {}", dir.display())),
        None => Ok(RunLogger::without_file(name, config)),
    }
}

fn batch_options(settings: &Settings, args: &BatchArgs) -> anyhow::Result<BatchOptions> {
    let mut options = BatchOptions::from_settings(settings)?;

    options.tracking = TrackingOptions {
        tracker: args.tracker.unwrap_or(options.tracking.tracker),
        size_tracking: args.size_tracking || options.tracking.size_tracking,
        ..options.tracking
    };
    options.fps_override = args.fps;
    if args.diff_algo.is_some() || args.diff_params.is_some() || args.diff_options.is_some() || args.optimize {
        let algorithm = args
            .diff_algo
            .clone()
            .unwrap_or_else(|| settings.differentiation.algorithm.clone());
        options.diff = DiffSpec::parse(
            &algorithm,
            args.diff_params.as_deref(),
            args.diff_options.as_deref(),
            args.optimize,
        )?;
    }
    if let Some(unit) = args.unit {
        options.unit = unit;
    }
    if args.no_flip_y {
        options.flip_y = false;
    }
    if let Some(workers) = args.workers {
        options.workers = workers;
    }
    Ok(options)
}

fn run_batch(cli: &Cli, settings: &Settings, level: LogLevel, args: &BatchArgs) -> anyhow::Result<ExitCode> {
    let options = batch_options(settings, args)?;
    let discovery = find_videos(&args.videos);
    if discovery.videos.is_empty() {
        bail!("No video files found.");
    }

    println!("MotionTracker Batch Mode");
    println!("========================");
    println!(
        "Processing {} video(s) with {} tracker",
        discovery.videos.len(),
        options.tracking.tracker
    );
    println!("Differentiation: {}", options.diff.describe());
    println!();

    let logger = run_logger(cli, settings, level, "batch")?;
    let runner = BatchRunner::new(options, FfmpegOpener)?;
    let summary = runner.run(&discovery.videos, &logger, &CancelHandle::new())?;

    print!("{}", summary.render());
    if let Some(path) = logger.log_path() {
        println!("Log: {}", path.display());
    }
    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn run_match(cli: &Cli, settings: &Settings, level: LogLevel, args: &MatchArgs) -> anyhow::Result<ExitCode> {
    let mut config = settings.matching.clone();
    if let Some(method) = args.method {
        config.method = method;
    }
    if let Some(threshold) = args.threshold {
        config.threshold = threshold;
    }

    let options = MatchRunOptions {
        reference: args.reference.clone(),
        targets: args.targets.clone(),
        reference_frame: args.frame,
        target_frame: args.target_frame,
        config,
        overwrite: args.overwrite,
        dry_run: args.dry_run,
        workers: args.workers.unwrap_or(settings.processing.workers),
    };

    println!("MotionTracker Region Matching");
    println!("==============================");
    println!("Reference: {} (frame {})", display_name(&options.reference), options.reference_frame);
    println!("Method:    {} (threshold: {})", options.config.method, options.config.threshold);
    if options.dry_run {
        println!("Mode:      DRY RUN (no files written)");
    }
    println!();

    let logger = run_logger(cli, settings, level, "match")?;
    let runner = MatchRunner::new(options, FfmpegOpener)?;
    let summary = runner.run(&logger, &CancelHandle::new())?;

    print!("{}", summary.render());
    Ok(if summary.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtrack_core::differentiation::DiffAlgorithm;

    fn batch(args: &[&str]) -> BatchArgs {
        let mut argv = vec!["motiontracker", "batch"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Commands::Batch(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn flags_override_config() {
        let mut settings = Settings::default();
        settings.output.unit = Unit::Mm;
        settings.processing.workers = 3;

        let args = batch(&["a.mp4", "--tracker", "kcf", "--unit", "pix", "--fps", "30"]);
        let options = batch_options(&settings, &args).unwrap();
        assert_eq!(options.tracking.tracker, TrackerKind::Kcf);
        assert_eq!(options.unit, Unit::Pix);
        assert_eq!(options.fps_override, Some(30.0));
        assert_eq!(options.workers, 3);
        assert!(options.flip_y);
    }

    #[test]
    fn diff_flags_build_a_spec() {
        let args = batch(&[
            "a.mp4",
            "--diff-algo",
            "savgol",
            "--diff-params",
            "2,9",
            "--diff-options",
            r#"{"window": 11}"#,
        ]);
        let options = batch_options(&Settings::default(), &args).unwrap();
        assert_eq!(options.diff.algorithm, DiffAlgorithm::SavitzkyGolay);
        assert_eq!(options.diff.resolved_params().unwrap(), vec![2.0, 11.0, 1.0]);

        let bad = batch(&["a.mp4", "--diff-algo", "kalman"]);
        assert!(batch_options(&Settings::default(), &bad).is_err());
    }

    #[test]
    fn log_file_flag_overrides_config() {
        let mut settings = Settings::default();
        let cli = Cli::parse_from(["motiontracker", "config"]);
        assert_eq!(tracing_log_file(&cli, &settings), None);

        settings.logging.log_file = "logs/tracking.log".to_string();
        assert_eq!(tracing_log_file(&cli, &settings), Some(PathBuf::from("logs/tracking.log")));

        let cli = Cli::parse_from(["motiontracker", "--log-file", "run.log", "batch", "a.mp4"]);
        assert_eq!(tracing_log_file(&cli, &settings), Some(PathBuf::from("run.log")));
    }

    #[test]
    fn match_arguments() {
        let cli = Cli::parse_from([
            "motiontracker",
            "match",
            "ref.mp4",
            "t1.mp4",
            "t2.mp4",
            "--method",
            "template",
            "--threshold",
            "0.8",
            "--dry-run",
        ]);
        let Commands::Match(args) = cli.command else {
            panic!("expected match command");
        };
        assert_eq!(args.targets, vec!["t1.mp4", "t2.mp4"]);
        assert_eq!(args.method, Some(MatchMethod::Template));
        assert!(args.dry_run && !args.overwrite);
    }
}
