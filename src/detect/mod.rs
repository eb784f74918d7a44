//! Object detection on the tracker endpoint.
//!
//! Frames are handed to a `DetectionWorker` thread through a `FrameQueue`;
//! the worker runs a `DetectorBackend` and publishes positions into a
//! `DetectionSlot`. The queue and the slot are the only state that crosses
//! the thread boundary.

mod backend;
pub mod backends;
pub mod pipeline;
mod queue;
mod result;
mod slot;
mod worker;

pub use backend::DetectorBackend;
pub use backends::{ContourBackend, StubBackend};
pub use queue::{FrameQueue, WorkItem};
pub use result::Point;
pub use slot::DetectionSlot;
pub use worker::{DetectionWorker, WorkerStats};
