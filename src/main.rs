use anyhow::{Context, Result};
use clap::Parser;
use clipcam::{
    recover_partial_clips, AudioConfiguration, CapabilityNegotiator, CaptureSession, Clip,
    ClipcamConfig, EventBus, EventDispatcher, FileClipSink, PhotoCaptureCoordinator,
    PhotoRequest, PhotoResult, PhotoVariant, SampleFormat, SessionConfiguration, SessionObserver,
    SessionState, SyntheticSource, VideoConfiguration, VideoObserver,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Parser, Debug)]
#[command(name = "clipcam")]
#[command(about = "Capture-session engine recording live samples into clips")]
#[command(version)]
#[command(long_about = "Runs a capture session against a synthetic frame source: samples are \
routed into segmented clips on disk while photos can be taken from the live video stream.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "clipcam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting a session")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write daily-rotated log files to this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<String>,

    /// Number of clips to record
    #[arg(long, default_value_t = 2)]
    clips: usize,

    /// Video frames per clip
    #[arg(long, default_value_t = 90)]
    frames: u64,

    #[arg(long, default_value_t = 320)]
    width: u32,

    #[arg(long, default_value_t = 240)]
    height: u32,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    /// Pace the synthetic source at its frame rate instead of as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Freeze a video frame into a photo during the first clip
    #[arg(long)]
    photo: bool,
}

/// Reports clip and session progress through the log
struct ProgressLogger;

impl SessionObserver for ProgressLogger {
    fn state_changed(&self, from: SessionState, to: SessionState) {
        info!("Session {:?} -> {:?}", from, to);
    }

    fn session_interrupted(&self, reason: &str) {
        warn!("Session interrupted: {}", reason);
    }

    fn request_rejected(&self, operation: &str, error: &str) {
        warn!("Request '{}' rejected: {}", operation, error);
    }
}

impl VideoObserver for ProgressLogger {
    fn clip_completed(&self, clip: &Clip) {
        info!(
            "Clip {} written to {} ({} appended, {} skipped)",
            clip.index,
            clip.path.display(),
            clip.counts.total_appended(),
            clip.counts.total_skipped()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    info!("Starting clipcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = match ClipcamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        if args.validate_config {
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
        return Err(e.into());
    }
    if args.validate_config {
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let clips = run_session(&args, &config).await?;

    println!("Recorded {} clip(s):", clips.len());
    for clip in &clips {
        println!(
            "  #{} {} video={} audio={} skipped={} duration={:.2}s -> {}",
            clip.index,
            clip.id,
            clip.counts.video.appended,
            clip.counts.audio.appended,
            clip.counts.total_skipped(),
            clip.duration.as_secs_f64(),
            clip.path.display()
        );
    }
    Ok(())
}

async fn run_session(args: &Args, config: &ClipcamConfig) -> Result<Vec<Clip>> {
    let clip_dir = config.writer.clip_dir();
    if config.writer.recover_partial {
        let recovered = recover_partial_clips(&clip_dir)
            .await
            .context("Recovering partial clips")?;
        for path in recovered {
            info!("Recovered interrupted clip {}", path.display());
        }
    }

    let event_bus = Arc::new(EventBus::new(config.session.event_bus_capacity));
    let dispatcher = EventDispatcher::new(Arc::clone(&event_bus));
    let logger = Arc::new(ProgressLogger);
    let _session_subscription = dispatcher.subscribe_session(logger.clone());
    let _video_subscription = dispatcher.subscribe_video(logger);

    let sink = FileClipSink::new(&clip_dir, config.writer.sync_interval()).into_shared();
    let session = CaptureSession::new(
        config,
        Arc::new(CapabilityNegotiator::default()),
        sink,
        Arc::clone(&event_bus),
    );
    let photos =
        PhotoCaptureCoordinator::new(&config.photo, session.router(), Arc::clone(&event_bus));

    let requested = SessionConfiguration {
        video: VideoConfiguration {
            width: args.width,
            height: args.height,
            fps: args.fps,
            format: SampleFormat::Rgb24,
            ..VideoConfiguration::default()
        },
        ..SessionConfiguration::default()
    }
    .with_audio(AudioConfiguration::default());
    let negotiated = session.start(requested).await?;

    let fps = negotiated.video.fps.max(1);
    let frame_interval = Duration::from_nanos(1_000_000_000 / fps as u64);
    let mut source = SyntheticSource::new(negotiated.video.width, negotiated.video.height, fps);
    let router = session.router();
    let mut photo_ticket = None;

    for clip_number in 0..args.clips {
        session.start_clip().await?;

        for frame in 0..args.frames {
            if args.photo && clip_number == 0 && frame == args.frames / 2 {
                let request =
                    PhotoRequest::new([PhotoVariant::Jpeg, PhotoVariant::Thumbnail]).from_video_frame();
                photo_ticket = Some(photos.capture(request)?);
            }

            router.route(source.next_video());
            router.route(source.next_audio(frame_interval));

            if args.realtime {
                tokio::time::sleep(frame_interval).await;
            } else {
                tokio::task::yield_now().await;
            }
        }

        session.end_clip().await?;
    }

    if let Some(ticket) = photo_ticket {
        match ticket.wait().await {
            Ok(result) => save_photo(&clip_dir, &result).await?,
            Err(e) => warn!("Photo capture failed: {}", e),
        }
    }

    let stats = router.stats();
    info!(
        "Routed {} samples: {} accepted, {} skipped",
        stats.routed,
        stats.accepted,
        stats.skipped()
    );

    let clips = session.shutdown().await?;
    dispatcher.shutdown();
    Ok(clips)
}

async fn save_photo(dir: &std::path::Path, result: &PhotoResult) -> Result<()> {
    for (variant, bytes) in &result.artifacts {
        let Some(bytes) = bytes else {
            warn!("Photo {} has no {:?} artifact", result.request_id, variant);
            continue;
        };
        let path = dir.join(format!(
            "photo-{}-{}.jpg",
            result.request_id,
            format!("{:?}", variant).to_lowercase()
        ));
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Writing {}", path.display()))?;
        info!("Saved photo {}", path.display());
    }
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("clipcam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "clipcam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Clipcam Configuration File");
    println!("# Every option with its default value; CLIPCAM_<SECTION>__<KEY> overrides any of them");
    println!();
    let rendered = toml::to_string_pretty(&ClipcamConfig::default())
        .context("Serializing default configuration")?;
    println!("{}", rendered);
    Ok(())
}
