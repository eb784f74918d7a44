//! demo - both endpoints in one process over in-process links

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use image::Rgb;
use imageproc::drawing::draw_hollow_circle_mut;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ball_track::signaling::loopback_pair;
use ball_track::transport::LoopbackRendezvous;
use ball_track::{
    ContourBackend, Origin, PeerSession, Role, SessionEvent, StatsSink, TrackConfig, Tracker,
    TrackerSummary, VideoFormat,
};

/// Extra time the tracker waits for the origin's goodbye.
const TRACKER_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// How long the origin streams, in seconds.
    #[arg(long, default_value_t = 3)]
    seconds: u64,
    /// Frames per second (overrides config).
    #[arg(long)]
    fps: Option<u32>,
    /// Bound the tracker's detection backlog (drop oldest).
    #[arg(long)]
    max_backlog: Option<usize>,
    /// Write the tracker's last frame, with the detection circled, as PNG.
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,
    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = TrackConfig::load()?;
    if let Some(fps) = args.fps {
        config.video.fps = fps;
    }
    if args.max_backlog.is_some() {
        config.max_backlog = args.max_backlog;
    }
    config.validate()?;

    let (offer_signaling, answer_signaling) = loopback_pair();
    let rendezvous = LoopbackRendezvous::new();
    let format = VideoFormat {
        width: config.video.width,
        height: config.video.height,
        fps: config.video.fps,
    };

    let (origin_session, origin_events) = PeerSession::new(
        Role::Offer,
        format,
        Arc::new(offer_signaling),
        Box::new(rendezvous.clone()),
    );
    let (tracker_session, tracker_events) = PeerSession::new(
        Role::Answer,
        VideoFormat::default(),
        Arc::new(answer_signaling),
        Box::new(rendezvous),
    );

    let origin = Origin::new(origin_session, origin_events, config.video.clone())
        .with_max_duration(Duration::from_secs(args.seconds));
    let tracker = Tracker::new(tracker_session, tracker_events)
        .with_report_interval(config.report_interval)
        .with_max_backlog(config.max_backlog)
        .with_max_duration(Duration::from_secs(args.seconds) + TRACKER_GRACE)
        .keep_last_frame(args.snapshot.is_some());

    let interrupt_origin = origin.event_sender();
    let interrupt_tracker = tracker.event_sender();
    ctrlc::set_handler(move || {
        let _ = interrupt_origin.send(SessionEvent::SessionEnded("interrupted".to_string()));
        let _ = interrupt_tracker.send(SessionEvent::SessionEnded("interrupted".to_string()));
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    let tracker_thread = std::thread::Builder::new()
        .name("tracker".into())
        .spawn(move || tracker.run(ContourBackend))
        .context("failed to spawn tracker")?;

    let mut sink = StatsSink::new();
    let origin_result = origin.run(&mut sink);
    let tracker_summary = tracker_thread
        .join()
        .map_err(|_| anyhow!("tracker thread panicked"))??;
    let origin_summary = origin_result?;
    let stats = sink.stats()?;

    if let Some(path) = &args.snapshot {
        write_snapshot(path, &tracker_summary, config.video.radius)?;
    }

    println!("demo summary:");
    println!(
        "  video: {}x{} @ {} fps for {} s",
        config.video.width, config.video.height, config.video.fps, args.seconds
    );
    println!("  frames sent: {}", origin_summary.frames_sent);
    println!("  frames received: {}", tracker_summary.frames_received);
    println!(
        "  detections: {} (misses {}, failures {})",
        tracker_summary.worker.detections,
        tracker_summary.worker.misses,
        tracker_summary.worker.failures
    );
    println!(
        "  reports: {} sent, {} scored, {} malformed",
        tracker_summary.reports_sent, origin_summary.reports_received, origin_summary.malformed
    );
    println!("  error: {}", stats);
    if let Some(last) = stats.last {
        println!("  last error: x={} y={}", last.dx, last.dy);
    }
    if let Some(path) = &args.snapshot {
        println!("  snapshot: {}", path.display());
    }
    Ok(())
}

fn write_snapshot(path: &Path, summary: &TrackerSummary, radius: i32) -> Result<()> {
    let frame = summary
        .last_frame
        .as_ref()
        .ok_or_else(|| anyhow!("no frame received; nothing to snapshot"))?;
    let mut image = frame
        .to_image()
        .ok_or_else(|| anyhow!("frame buffer does not match its dimensions"))?;
    if let Some(point) = summary.last_detection {
        draw_hollow_circle_mut(&mut image, (point.x, point.y), radius + 4, Rgb([255, 0, 0]));
    }
    image
        .save(path)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    Ok(())
}
