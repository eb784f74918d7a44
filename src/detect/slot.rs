use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex};

use crate::detect::result::Point;

/// Latest detected position, shared between the detection worker (writer)
/// and the coordinate reporter (reader).
///
/// Both coordinates live behind one lock, so a reader always sees a pair
/// written by a single `publish`. Last write wins; no history is kept.
#[derive(Clone, Debug, Default)]
pub struct DetectionSlot {
    inner: Arc<Mutex<Option<Point>>>,
}

impl DetectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, point: Point) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("detection slot lock poisoned"))?;
        *guard = Some(point);
        Ok(())
    }

    /// Last published position, `None` while nothing has been detected.
    pub fn latest(&self) -> Result<Option<Point>> {
        let guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("detection slot lock poisoned"))?;
        Ok(*guard)
    }

    /// Last published position, or the origin while unset.
    pub fn snapshot(&self) -> Result<Point> {
        Ok(self.latest()?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_slot_reads_as_origin() {
        let slot = DetectionSlot::new();
        assert_eq!(slot.latest().unwrap(), None);
        assert_eq!(slot.snapshot().unwrap(), Point::new(0, 0));
    }

    #[test]
    fn last_write_wins() {
        let slot = DetectionSlot::new();
        slot.publish(Point::new(1, 2)).unwrap();
        slot.publish(Point::new(3, 4)).unwrap();
        assert_eq!(slot.latest().unwrap(), Some(Point::new(3, 4)));
    }

    #[test]
    fn readers_never_see_torn_pairs() {
        let slot = DetectionSlot::new();
        let writer = slot.clone();
        let handle = std::thread::spawn(move || {
            for i in 0..20_000 {
                writer.publish(Point::new(i, -i)).unwrap();
            }
        });
        for _ in 0..20_000 {
            let p = slot.snapshot().unwrap();
            assert_eq!(p.x, -p.y);
        }
        handle.join().unwrap();
    }
}
