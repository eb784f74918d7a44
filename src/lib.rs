//! Ball Track
//!
//! Closed-loop object tracking over a peer-to-peer media session.
//!
//! # Architecture
//!
//! Two endpoints share one session:
//!
//! 1. **Origin** (offer role): simulates a bouncing ball, renders one frame
//!    per clock tick and sends it together with the ball's true position.
//! 2. **Tracker** (answer role): hands received frames to an isolated
//!    detection worker, and on its own timer reports the latest detection
//!    paired with the latest ground truth.
//! 3. The origin turns every report into an error sample.
//!
//! # Module Structure
//!
//! - `sim`, `frame`: motion model, rasterizer and fixed-rate frame clock
//! - `detect`: detection pipeline, worker thread, frame queue, result slot
//! - `coords`, `evaluate`: side-channel protocol and error measurement
//! - `signaling`, `transport`, `session`: negotiation, peer links and the
//!   session state machine
//! - `origin`, `tracker`: the two endpoints
//! - `config`: file and environment configuration

pub mod config;
pub mod coords;
pub mod detect;
pub mod evaluate;
pub mod frame;
pub mod origin;
pub mod session;
pub mod signaling;
pub mod sim;
pub mod tracker;
pub mod transport;

pub use config::TrackConfig;
pub use coords::{CoordinateMessage, CoordinateReporter, GroundTruthCache, TextSink};
pub use detect::{ContourBackend, DetectionSlot, DetectionWorker, DetectorBackend, Point};
pub use evaluate::{evaluate, ErrorSample, ErrorSink, ErrorStats, LogSink, StatsSink};
pub use frame::{BallProducer, Frame, FrameClock};
pub use origin::{Origin, OriginSummary};
pub use session::{PeerSession, Role, SessionEvent, SessionState};
pub use signaling::{SignalMessage, Signaling, VideoFormat};
pub use sim::Ball;
pub use tracker::{Tracker, TrackerSummary};
pub use transport::{LinkFactory, PeerLink};
