//! Vela command-line front end
//!
//! Drives the pipeline against the in-process synthetic backend: probe a
//! source, play it for a while (optionally after a seek), or remux some of
//! its streams into an output container. `sniff` inspects local files.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vela_common::{MediaBackend, MediaKind, MediaSource, PipelineConfig, Status};
use vela_demux::{probe, Demuxer, QueueLayout};
use vela_pipeline::{DecoderContext, DownloadEvent, Downloader};
use vela_synthetic::SyntheticBackend;

/// Vela - multi-stream media pipeline driver
#[derive(Parser, Debug)]
#[command(name = "vela")]
#[command(about = "Probe, play and remux media through the Vela pipeline")]
#[command(version)]
struct Args {
    /// Pipeline configuration (JSON); missing keys keep their defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the sources the synthetic backend can open
    Sources,

    /// Print container and stream information
    Probe {
        source: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Detect the container format of a local file from its name and content
    Sniff { path: PathBuf },

    /// Decode a source and report the frames it produced
    Play {
        source: String,

        /// Stop after this many seconds of wall-clock time
        #[arg(long, default_value = "5")]
        max_secs: f64,

        /// Seek to this position (ms) before playing
        #[arg(long)]
        seek: Option<i64>,

        /// Land on the keyframe after the seek position instead of before it
        #[arg(long)]
        forward: bool,

        /// Take audio from a separate source
        #[arg(long)]
        audio: Option<String>,

        /// Take subtitles from a separate source
        #[arg(long)]
        subtitles: Option<String>,
    },

    /// Copy streams into an output container
    Download {
        source: String,

        destination: PathBuf,

        /// Stream indices to copy (default: all)
        #[arg(long, value_delimiter = ',')]
        streams: Vec<usize>,

        /// Use the destination exactly as given
        #[arg(long)]
        keep_extension: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let backend = Arc::new(SyntheticBackend::new());

    match args.command {
        Command::Sources => {
            for name in backend.source_names() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Probe { source, json } => run_probe(backend, &config, &source, json),
        Command::Sniff { path } => run_sniff(&path),
        Command::Play {
            source,
            max_secs,
            seek,
            forward,
            audio,
            subtitles,
        } => {
            let max = Duration::try_from_secs_f64(max_secs)
                .with_context(|| format!("invalid --max-secs {max_secs}"))?;
            let ctx = DecoderContext::new(backend, config);
            let opts = PlayOptions {
                max,
                seek,
                forward,
                audio,
                subtitles,
            };
            run_play(&ctx, &source, &opts)
        }
        Command::Download {
            source,
            destination,
            streams,
            keep_extension,
        } => run_download(backend, &config, &source, &destination, &streams, !keep_extension),
    }
}

fn run_probe(backend: Arc<SyntheticBackend>, config: &PipelineConfig, source: &str, json: bool) -> Result<()> {
    let source = MediaSource::parse(source);
    let demuxer = Demuxer::new(MediaKind::Video, backend, &config.demuxer, QueueLayout::PerKind);
    demuxer
        .open(&source)
        .with_context(|| format!("failed to open {source}"))?;

    let format_name = demuxer.format_name();
    let extension = probe::recommended_extension(&format_name);
    let named_as = probe::detect_source_format(&source).ok();
    let streams = demuxer.streams();

    if json {
        let report = serde_json::json!({
            "source": source.to_string(),
            "format": format_name,
            "duration_ms": demuxer.duration().as_millis(),
            "start_time_ms": demuxer.start_time().as_millis(),
            "live": demuxer.is_live(),
            "named_as": named_as.map(|f| format!("{f:?}")),
            "recommended_extension": extension,
            "streams": streams,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{source}");
        println!("  format:    {format_name}");
        if let Some(named) = named_as {
            println!("  named as:  {named:?}");
        }
        if let Some(ext) = extension {
            println!("  remux as:  .{ext}");
        }
        if demuxer.is_live() {
            println!("  duration:  live");
        } else {
            println!("  duration:  {}", demuxer.duration());
        }
        println!("  start:     {}", demuxer.start_time());
        for stream in &streams {
            println!("  {stream}");
        }
    }

    demuxer.dispose();
    Ok(())
}

fn run_sniff(path: &Path) -> Result<()> {
    let mut file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let by_content = probe::detect_format_from_magic(&mut file)
        .with_context(|| format!("unrecognized content in {}", path.display()))?;
    println!("{}", path.display());
    println!("  content:   {by_content:?}");
    match probe::detect_format(path) {
        Ok(by_name) if by_name == by_content => println!("  name:      {by_name:?}"),
        Ok(by_name) => {
            warn!(name = ?by_name, content = ?by_content, "Extension does not match content");
            println!("  name:      {by_name:?} (mismatch)");
        }
        Err(_) => println!("  name:      unknown"),
    }
    Ok(())
}

struct PlayOptions {
    max: Duration,
    seek: Option<i64>,
    forward: bool,
    audio: Option<String>,
    subtitles: Option<String>,
}

fn run_play(ctx: &DecoderContext, source: &str, opts: &PlayOptions) -> Result<()> {
    let report = ctx
        .open(&MediaSource::parse(source))
        .with_context(|| format!("failed to open {source}"))?;
    info!(format = %report.format_name, duration = %report.duration, "Opened");
    for kind in [MediaKind::Video, MediaKind::Audio, MediaKind::Subtitle] {
        if let Some(stream) = report.bound(kind) {
            info!("Bound {}", stream);
        }
    }
    for (stream, reason) in &report.failed {
        warn!("Could not open {}: {}", stream, reason);
    }

    if let Some(audio) = &opts.audio {
        let stream = ctx
            .open_audio(&MediaSource::parse(audio), None)
            .with_context(|| format!("failed to open audio source {audio}"))?;
        info!("Bound external {}", stream);
    }
    if let Some(subtitles) = &opts.subtitles {
        let stream = ctx
            .open_subtitles(&MediaSource::parse(subtitles), None)
            .with_context(|| format!("failed to open subtitle source {subtitles}"))?;
        info!("Bound external {}", stream);
    }

    if let Some(ms) = opts.seek {
        let targets = ctx.seek(ms, opts.forward).context("seek failed")?;
        if let Some(main) = targets.main {
            info!(target = %main, "Seeked");
        }
    }

    ctx.play();
    let started = Instant::now();
    let video = ctx.video_frames();
    let audio = ctx.audio_frames();
    let subtitles = ctx.subtitle_frames();
    let mut counts = [0usize; 3];
    let mut first_video = None;
    let mut last_video = None;

    while started.elapsed() < opts.max {
        let mut idle = true;
        if let Some(frame) = video.pop_timeout(Duration::from_millis(20)) {
            idle = false;
            counts[0] += 1;
            first_video.get_or_insert(frame.timestamp);
            last_video = Some(frame.timestamp);
        }
        while audio.pop().is_some() {
            idle = false;
            counts[1] += 1;
        }
        while let Some(frame) = subtitles.pop() {
            idle = false;
            counts[2] += 1;
            if let Some(text) = frame.as_subtitle() {
                info!(at = %frame.timestamp, "Subtitle: {}", text.plain_text());
            }
        }
        if idle && matches!(ctx.status(), Status::Ended | Status::Stopping) {
            break;
        }
    }

    let status = ctx.status();
    let read_error = ctx.last_error();
    ctx.stop();

    println!("status:          {status}");
    if let Some(err) = &read_error {
        println!("read error:      {err}");
    }
    println!("video frames:    {}", counts[0]);
    if let (Some(first), Some(last)) = (first_video, last_video) {
        println!("video range:     {first} .. {last}");
    }
    println!("audio frames:    {}", counts[1]);
    println!("subtitle frames: {}", counts[2]);
    println!("dropped (video): {}", ctx.decoder(MediaKind::Video).frames_dropped());
    Ok(())
}

fn run_download(
    backend: Arc<SyntheticBackend>,
    config: &PipelineConfig,
    source: &str,
    destination: &Path,
    streams: &[usize],
    use_recommended_extension: bool,
) -> Result<()> {
    let downloader = Downloader::new(backend.clone() as Arc<dyn MediaBackend>, &config.demuxer);
    let available = downloader
        .open(&MediaSource::parse(source))
        .with_context(|| format!("failed to open {source}"))?;

    let selected: Vec<usize> = if streams.is_empty() {
        available.iter().map(|s| s.index).collect()
    } else {
        streams.to_vec()
    };
    for index in &selected {
        downloader
            .enable_stream(*index)
            .with_context(|| format!("cannot enable stream {index}"))?;
    }

    let dest = downloader
        .download(destination, use_recommended_extension)
        .with_context(|| format!("failed to start download to {}", destination.display()))?;
    info!(destination = %dest.display(), streams = selected.len(), "Downloading");

    let events = downloader.events();
    let success = loop {
        match events.recv() {
            Ok(DownloadEvent::Progress(pct)) => info!("{:.0}%", pct),
            Ok(DownloadEvent::Completed { success }) => break success,
            Err(_) => break false,
        }
    };
    downloader.dispose();

    if !success {
        bail!("download of {source} failed");
    }
    if let Some(out) = backend.output(&dest) {
        println!(
            "{}: {} streams, {} packets ({:?})",
            dest.display(),
            out.streams.len(),
            out.packets.len(),
            out.format
        );
    }
    Ok(())
}
