//! ball_track - one endpoint of a closed-loop tracking session
//!
//! `ball_track answer` waits for a peer on the signaling port and tracks the
//! ball it receives. `ball_track offer` connects to it, streams the ball and
//! logs the tracking error of every report.

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ball_track::signaling::tcp::{TcpRole, TcpSignaling};
use ball_track::transport::TcpLinkFactory;
use ball_track::{
    ContourBackend, Origin, PeerSession, Role, SessionEvent, StatsSink, TrackConfig, Tracker,
    VideoFormat,
};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg {
    /// Stream the ball and score the tracker.
    Offer,
    /// Track the ball and report positions.
    Answer,
}

#[derive(Parser, Debug)]
#[command(
    name = "ball_track",
    about = "Closed-loop ball tracking over a peer session"
)]
struct Args {
    #[arg(value_enum)]
    role: RoleArg,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Signaling host (answer listens on it, offer connects to it)
    #[arg(long)]
    signaling_host: Option<String>,

    /// Signaling TCP port
    #[arg(long)]
    signaling_port: Option<u16>,

    /// Local address the offer side binds its peer link to
    #[arg(long)]
    link_host: Option<String>,

    /// Peer link TCP port on the offer side (0 = ephemeral)
    #[arg(long)]
    link_port: Option<u16>,

    /// Stop after this many seconds (default: run until interrupted)
    #[arg(long, env = "BALL_TRACK_SECONDS")]
    seconds: Option<u64>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = TrackConfig::load()?;
    if let Some(host) = args.signaling_host {
        config.signaling.host = host;
    }
    if let Some(port) = args.signaling_port {
        config.signaling.port = port;
    }
    if let Some(host) = args.link_host {
        config.link.host = host;
    }
    if let Some(port) = args.link_port {
        config.link.port = port;
    }
    config.validate()?;

    let (role, tcp_role) = match args.role {
        RoleArg::Offer => (Role::Offer, TcpRole::Connect),
        RoleArg::Answer => (Role::Answer, TcpRole::Listen),
    };
    let stop = Arc::new(AtomicBool::new(false));
    let signaling = Arc::new(
        TcpSignaling::new(
            &config.signaling.host,
            config.signaling.port,
            tcp_role,
            config.signaling.connect_timeout,
        )
        .with_stop_flag(stop.clone()),
    );
    let links = Box::new(
        TcpLinkFactory::new(&config.link.host, config.link.port)
            .with_connect_timeout(config.link.connect_timeout),
    );
    let format = VideoFormat {
        width: config.video.width,
        height: config.video.height,
        fps: config.video.fps,
    };
    let (session, events) = PeerSession::new(role, format, signaling, links);

    let interrupt = session.event_sender();
    let interrupt_stop = stop.clone();
    ctrlc::set_handler(move || {
        // Wakes a peer wait still inside signaling.
        interrupt_stop.store(true, Ordering::SeqCst);
        let _ = interrupt.send(SessionEvent::SessionEnded("interrupted".to_string()));
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!(
        "ball_track {} starting (signaling {}:{})",
        role,
        config.signaling.host,
        config.signaling.port
    );
    match role {
        Role::Offer => {
            let mut origin = Origin::new(session, events, config.video.clone());
            if let Some(seconds) = args.seconds {
                origin = origin.with_max_duration(Duration::from_secs(seconds));
            }
            let mut sink = StatsSink::new();
            let summary = match origin.run(&mut sink) {
                Err(e) if stop.load(Ordering::SeqCst) => return interrupted(e),
                other => other?,
            };
            log::info!(
                "ball_track offer done ({}): frames={} {}",
                summary.reason,
                summary.frames_sent,
                sink.stats()?
            );
        }
        Role::Answer => {
            let mut tracker = Tracker::new(session, events)
                .with_report_interval(config.report_interval)
                .with_max_backlog(config.max_backlog);
            if let Some(seconds) = args.seconds {
                tracker = tracker.with_max_duration(Duration::from_secs(seconds));
            }
            let summary = match tracker.run(ContourBackend) {
                Err(e) if stop.load(Ordering::SeqCst) => return interrupted(e),
                other => other?,
            };
            log::info!(
                "ball_track answer done ({}): frames={} detections={} reports={}",
                summary.reason,
                summary.frames_received,
                summary.worker.detections,
                summary.reports_sent
            );
        }
    }
    Ok(())
}

fn interrupted(err: anyhow::Error) -> Result<()> {
    log::info!("ball_track interrupted ({:#})", err);
    Ok(())
}
