use std::net::TcpListener;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ball_track::config::VideoSettings;
use ball_track::detect::backends::stub::StubStep;
use ball_track::detect::StubBackend;
use ball_track::signaling::loopback_pair;
use ball_track::signaling::tcp::{TcpRole, TcpSignaling};
use ball_track::transport::{LinkFactory, LoopbackRendezvous, TcpLinkFactory};
use ball_track::{
    ContourBackend, ErrorSample, ErrorSink, Origin, PeerSession, Point, Role, SessionEvent,
    Signaling, StatsSink, Tracker, VideoFormat,
};

fn video() -> VideoSettings {
    VideoSettings {
        width: 160,
        height: 120,
        fps: 30,
        radius: 12,
    }
}

fn format_of(video: &VideoSettings) -> VideoFormat {
    VideoFormat {
        width: video.width,
        height: video.height,
        fps: video.fps,
    }
}

fn sessions(
    max_backlog: Option<usize>,
    offer_signaling: Arc<dyn Signaling>,
    answer_signaling: Arc<dyn Signaling>,
    offer_links: Box<dyn LinkFactory>,
    answer_links: Box<dyn LinkFactory>,
    stream_for: Duration,
) -> (Origin, Tracker) {
    let video = video();
    let (origin_session, origin_events) =
        PeerSession::new(Role::Offer, format_of(&video), offer_signaling, offer_links);
    let (tracker_session, tracker_events) = PeerSession::new(
        Role::Answer,
        VideoFormat::default(),
        answer_signaling,
        answer_links,
    );
    let origin = Origin::new(origin_session, origin_events, video).with_max_duration(stream_for);
    let tracker = Tracker::new(tracker_session, tracker_events)
        .with_report_interval(Duration::from_millis(33))
        .with_max_backlog(max_backlog)
        .with_max_duration(stream_for + Duration::from_secs(10));
    (origin, tracker)
}

fn loopback_sessions(max_backlog: Option<usize>, stream_for: Duration) -> (Origin, Tracker) {
    let (a, b) = loopback_pair();
    let rendezvous = LoopbackRendezvous::new();
    sessions(
        max_backlog,
        Arc::new(a),
        Arc::new(b),
        Box::new(rendezvous.clone()),
        Box::new(rendezvous),
        stream_for,
    )
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn near(a: Point, b: Point, tolerance: i32) -> bool {
    (a.x - b.x).abs() <= tolerance && (a.y - b.y).abs() <= tolerance
}

#[test]
fn origin_and_tracker_close_the_loop() {
    // A short backlog keeps detection close to real time on slow machines.
    let (origin, tracker) = loopback_sessions(Some(2), Duration::from_millis(1500));

    let tracker_thread = std::thread::spawn(move || tracker.run(ContourBackend));
    let mut sink = StatsSink::new();
    let origin_summary = origin.run(&mut sink).expect("origin run");
    let tracker_summary = tracker_thread.join().unwrap().expect("tracker run");

    assert_eq!(origin_summary.reason, "time limit reached");
    assert!(origin_summary.frames_sent >= 30, "{:?}", origin_summary);
    assert_eq!(tracker_summary.frames_received, origin_summary.frames_sent);
    assert_eq!(
        tracker_summary.worker.frames + tracker_summary.frames_dropped,
        tracker_summary.frames_received
    );
    assert!(tracker_summary.worker.detections > 0);
    assert_eq!(origin_summary.malformed, 0);

    // The newest frames are never evicted and the worker drains the queue
    // before exiting, so the final detection is at most a frame behind the
    // final ground truth (a ball clipped by the border may not be found).
    let detected = tracker_summary.last_detection.expect("a detection");
    assert!(
        near(detected, tracker_summary.last_truth, 12),
        "detected {} truth {}",
        detected,
        tracker_summary.last_truth
    );

    let stats = sink.stats().unwrap();
    assert!(stats.count >= 10, "{}", stats);
    assert_eq!(stats.count, origin_summary.reports_received);
    let last = stats.last.expect("an error sample");
    assert!(last.magnitude() < 60.0, "last error {:?}", last);
}

/// Records when each error sample arrived.
#[derive(Default)]
struct TimedSink {
    arrivals: Vec<Instant>,
}

impl ErrorSink for TimedSink {
    fn report(&mut self, _sample: ErrorSample) {
        self.arrivals.push(Instant::now());
    }
}

#[test]
fn malformed_report_is_dropped_without_stopping_scoring() {
    let (origin, tracker) = loopback_sessions(None, Duration::from_millis(1500));
    let inject = origin.event_sender();
    let injector = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(700));
        let at = Instant::now();
        inject
            .send(SessionEvent::MessageReceived("calculated,1,2,x,4".to_string()))
            .unwrap();
        at
    });

    let tracker_thread = std::thread::spawn(move || tracker.run(ContourBackend));
    let mut sink = TimedSink::default();
    let summary = origin.run(&mut sink).expect("origin run");
    tracker_thread.join().unwrap().expect("tracker run");
    let injected_at = injector.join().unwrap();

    assert_eq!(summary.reason, "time limit reached");
    assert_eq!(summary.malformed, 1);
    assert_eq!(sink.arrivals.len() as u64, summary.reports_received);
    assert!(sink.arrivals.iter().any(|t| *t < injected_at));
    assert!(sink.arrivals.iter().any(|t| *t > injected_at));
}

#[test]
fn tracker_keeps_last_position_through_misses() {
    let (origin, tracker) = loopback_sessions(None, Duration::from_millis(600));
    let backend = StubBackend::new([
        StubStep::Found(Point::new(42, 24)),
        StubStep::Missed,
        StubStep::Fail,
    ]);

    let tracker_thread = std::thread::spawn(move || tracker.run(backend));
    let mut sink = StatsSink::new();
    origin.run(&mut sink).expect("origin run");
    let summary = tracker_thread.join().unwrap().expect("tracker run");

    assert_eq!(summary.worker.detections, 1);
    assert_eq!(summary.worker.failures, 1);
    assert_eq!(summary.last_detection, Some(Point::new(42, 24)));
}

#[test]
fn endpoints_run_over_tcp() {
    let signaling_port = free_port();
    let offer_signaling = Arc::new(TcpSignaling::new(
        "127.0.0.1",
        signaling_port,
        TcpRole::Connect,
        Duration::from_secs(5),
    ));
    let answer_signaling = Arc::new(TcpSignaling::new(
        "127.0.0.1",
        signaling_port,
        TcpRole::Listen,
        Duration::from_secs(5),
    ));
    let (origin, tracker) = sessions(
        None,
        offer_signaling,
        answer_signaling,
        Box::new(TcpLinkFactory::new("127.0.0.1", 0)),
        Box::new(TcpLinkFactory::new("127.0.0.1", 0)),
        Duration::from_millis(1000),
    );

    let tracker_thread = std::thread::spawn(move || tracker.run(ContourBackend));
    let mut sink = StatsSink::new();
    let origin_summary = origin.run(&mut sink).expect("origin run");
    let tracker_summary = tracker_thread.join().unwrap().expect("tracker run");

    // Bye travels on the signaling socket, so frames still in flight on the
    // link may be cut off.
    assert!(origin_summary.frames_sent > 0);
    assert!(tracker_summary.frames_received > 0);
    assert!(tracker_summary.frames_received <= origin_summary.frames_sent);
    assert!(tracker_summary.worker.detections > 0);
    assert!(sink.stats().unwrap().count > 0);
}
