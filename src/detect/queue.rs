use anyhow::{anyhow, bail, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::frame::Frame;

/// Item handed to the detection worker.
#[derive(Debug)]
pub enum WorkItem {
    Frame(Frame),
    /// Sentinel: no more frames follow, the worker exits after this item.
    Shutdown,
}

/// FIFO hand-off between the frame consumer and the detection worker.
///
/// Unbounded unless constructed with `with_max_backlog`, in which case the
/// oldest pending frame is evicted to make room. The shutdown sentinel is
/// never evicted and nothing can be pushed after it.
#[derive(Clone)]
pub struct FrameQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    ready: Condvar,
    max_backlog: Option<usize>,
}

#[derive(Default)]
struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
    evicted: u64,
}

impl FrameQueue {
    pub fn unbounded() -> Self {
        Self::build(None)
    }

    pub fn with_max_backlog(max_backlog: usize) -> Self {
        Self::build(Some(max_backlog.max(1)))
    }

    fn build(max_backlog: Option<usize>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                ready: Condvar::new(),
                max_backlog,
            }),
        }
    }

    /// Enqueue a frame for detection.
    pub fn push(&self, frame: Frame) -> Result<()> {
        let mut state = self.lock()?;
        if state.closed {
            bail!("frame queue is shut down");
        }
        if let Some(max) = self.inner.max_backlog {
            while state.items.len() >= max {
                // Only frames are queued while open.
                if state.items.pop_front().is_none() {
                    break;
                }
                state.evicted += 1;
            }
        }
        state.items.push_back(WorkItem::Frame(frame));
        self.inner.ready.notify_one();
        Ok(())
    }

    /// Enqueue the shutdown sentinel. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut state = self.lock()?;
        if !state.closed {
            state.closed = true;
            state.items.push_back(WorkItem::Shutdown);
            self.inner.ready.notify_all();
        }
        Ok(())
    }

    /// Block until an item is available.
    pub fn pop(&self) -> Result<WorkItem> {
        let mut state = self.lock()?;
        loop {
            if let Some(item) = state.items.pop_front() {
                return Ok(item);
            }
            state = self
                .inner
                .ready
                .wait(state)
                .map_err(|_| anyhow!("frame queue lock poisoned"))?;
        }
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.items.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Frames evicted by the backlog limit.
    pub fn evicted(&self) -> Result<u64> {
        Ok(self.lock()?.evicted)
    }

    pub fn is_closed(&self) -> Result<bool> {
        Ok(self.lock()?.closed)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>> {
        self.inner
            .state
            .lock()
            .map_err(|_| anyhow!("frame queue lock poisoned"))
    }
}

impl Default for FrameQueue {
    fn default() -> Self {
        Self::unbounded()
    }
}
