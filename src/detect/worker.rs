use anyhow::{anyhow, Context, Result};
use std::thread::JoinHandle;

use crate::detect::backend::DetectorBackend;
use crate::detect::queue::{FrameQueue, WorkItem};
use crate::detect::slot::DetectionSlot;
use crate::frame::Frame;

/// Counters reported by the worker when it exits.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub frames: u64,
    pub detections: u64,
    pub misses: u64,
    pub failures: u64,
    pub last_pts: Option<u64>,
}

/// Detection running on its own thread.
///
/// Frames go in through the queue; positions come out through the slot.
/// Nothing else is shared with the thread. Teardown is `shutdown()`: the
/// sentinel is queued behind any pending frames and the thread is joined.
/// Dropping the worker without calling `shutdown()` runs the same protocol.
pub struct DetectionWorker {
    queue: FrameQueue,
    handle: Option<JoinHandle<WorkerStats>>,
    backend_name: &'static str,
}

impl DetectionWorker {
    pub fn spawn<B>(mut backend: B, queue: FrameQueue, slot: DetectionSlot) -> Result<Self>
    where
        B: DetectorBackend + 'static,
    {
        let backend_name = backend.name();
        let worker_queue = queue.clone();
        let handle = std::thread::Builder::new()
            .name(format!("detect-{}", backend_name))
            .spawn(move || {
                if let Err(err) = backend.warm_up() {
                    log::warn!("detector warm-up failed: {}", err);
                }
                run_worker(&mut backend, &worker_queue, &slot)
            })
            .context("failed to spawn detection worker")?;
        log::debug!("detection worker started (backend={})", backend_name);
        Ok(Self {
            queue,
            handle: Some(handle),
            backend_name,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend_name
    }

    /// Queue a frame for detection.
    pub fn submit(&self, frame: Frame) -> Result<()> {
        self.queue.push(frame)
    }

    /// Frames waiting for the worker.
    pub fn backlog(&self) -> Result<usize> {
        self.queue.len()
    }

    /// Drain, stop and join the worker thread.
    pub fn shutdown(mut self) -> Result<WorkerStats> {
        self.stop()
    }

    fn stop(&mut self) -> Result<WorkerStats> {
        let Some(handle) = self.handle.take() else {
            return Ok(WorkerStats::default());
        };
        self.queue.close()?;
        let stats = handle
            .join()
            .map_err(|_| anyhow!("detection worker thread panicked"))?;
        log::debug!(
            "detection worker stopped: frames={} detections={} misses={} failures={}",
            stats.frames,
            stats.detections,
            stats.misses,
            stats.failures
        );
        Ok(stats)
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.stop() {
                log::error!("detection worker teardown failed: {}", err);
            }
        }
    }
}

fn run_worker(
    backend: &mut dyn DetectorBackend,
    queue: &FrameQueue,
    slot: &DetectionSlot,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    loop {
        let frame = match queue.pop() {
            Ok(WorkItem::Frame(frame)) => frame,
            Ok(WorkItem::Shutdown) => break,
            Err(err) => {
                log::error!("detection worker lost its queue: {}", err);
                break;
            }
        };
        stats.frames += 1;
        stats.last_pts = Some(frame.pts);

        match backend.detect(&frame) {
            Ok(Some(point)) => {
                if let Err(err) = slot.publish(point) {
                    log::error!("detection worker cannot publish: {}", err);
                    break;
                }
                stats.detections += 1;
                log::trace!("pts={} detected at {}", frame.pts, point);
            }
            // Keep the last known position.
            Ok(None) => stats.misses += 1,
            Err(err) => {
                stats.failures += 1;
                log::warn!("detection failed for pts={}: {}", frame.pts, err);
            }
        }
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::stub::StubStep;
    use crate::detect::backends::{ContourBackend, StubBackend};
    use crate::detect::result::Point;
    use crate::frame::render_ball;
    use std::time::Duration;

    #[test]
    fn worker_publishes_ball_position() {
        let slot = DetectionSlot::new();
        let worker =
            DetectionWorker::spawn(ContourBackend::new(), FrameQueue::unbounded(), slot.clone())
                .unwrap();
        worker.submit(render_ball(640, 480, (320, 240), 20, 3000)).unwrap();
        let stats = worker.shutdown().unwrap();

        assert_eq!(stats.frames, 1);
        assert_eq!(stats.detections, 1);
        assert_eq!(stats.last_pts, Some(3000));
        let found = slot.latest().unwrap().expect("published");
        assert!((found.x - 320).abs() <= 2);
        assert!((found.y - 240).abs() <= 2);
    }

    #[test]
    fn empty_frame_leaves_slot_unchanged() {
        let slot = DetectionSlot::new();
        let worker =
            DetectionWorker::spawn(ContourBackend::new(), FrameQueue::unbounded(), slot.clone())
                .unwrap();
        worker.submit(Frame::blank(640, 480, 0)).unwrap();
        let stats = worker.shutdown().unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(slot.latest().unwrap(), None);
        assert_eq!(slot.snapshot().unwrap(), Point::new(0, 0));
    }

    #[test]
    fn misses_and_failures_retain_last_good_position() {
        let slot = DetectionSlot::new();
        let backend = StubBackend::new([
            StubStep::Found(Point::new(10, 20)),
            StubStep::Missed,
            StubStep::Fail,
        ]);
        let worker = DetectionWorker::spawn(backend, FrameQueue::unbounded(), slot.clone()).unwrap();
        for pts in 1..=3 {
            worker.submit(Frame::blank(4, 4, pts)).unwrap();
        }
        let stats = worker.shutdown().unwrap();
        assert_eq!(
            stats,
            WorkerStats {
                frames: 3,
                detections: 1,
                misses: 1,
                failures: 1,
                last_pts: Some(3),
            }
        );
        assert_eq!(slot.latest().unwrap(), Some(Point::new(10, 20)));
    }

    #[test]
    fn shutdown_drains_pending_frames() {
        let slot = DetectionSlot::new();
        let script = (0..20).map(|i| StubStep::Found(Point::new(i, i)));
        let backend = StubBackend::new(script).with_delay(Duration::from_millis(2));
        let worker = DetectionWorker::spawn(backend, FrameQueue::unbounded(), slot.clone()).unwrap();
        for pts in 0..20 {
            worker.submit(Frame::blank(4, 4, pts)).unwrap();
        }
        let stats = worker.shutdown().unwrap();
        assert_eq!(stats.frames, 20);
        assert_eq!(slot.latest().unwrap(), Some(Point::new(19, 19)));
    }

    #[test]
    fn drop_joins_the_thread() {
        let queue = FrameQueue::unbounded();
        let worker =
            DetectionWorker::spawn(StubBackend::default(), queue.clone(), DetectionSlot::new())
                .unwrap();
        drop(worker);
        assert!(queue.is_closed().unwrap());
        assert!(queue.is_empty().unwrap());
    }
}
