// Per-trial gaze accumulation shared between the tracker callback and the trial loop.
// See DESIGN.md: Gaze Buffer

use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::GazeSample;

/// Producer/consumer buffer of raw samples. Clones share the same storage.
///
/// The tracker callback `push`es; the trial loop `take`s at the trial boundary,
/// which swaps in an empty buffer under a single lock so no sample is lost or
/// read twice.
#[derive(Debug, Clone, Default)]
pub struct GazeBuffer {
    samples: Arc<Mutex<Vec<GazeSample>>>,
}

impl GazeBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, sample: GazeSample) {
        self.samples.lock().push(sample);
    }

    /// Everything pushed since the last `take`, leaving the buffer empty.
    pub fn take(&self) -> Vec<GazeSample> {
        std::mem::take(&mut *self.samples.lock())
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NormalizedCoord, Timestamp};
    use std::thread;

    fn sample(ts: u64) -> GazeSample {
        GazeSample::new(
            NormalizedCoord::new(0.5, 0.5),
            NormalizedCoord::new(0.5, 0.5),
            Timestamp::from_micros(ts),
        )
    }

    #[test]
    fn take_drains_in_push_order() {
        let buffer = GazeBuffer::new();
        buffer.push(sample(1));
        buffer.push(sample(2));
        assert_eq!(buffer.len(), 2);

        let taken = buffer.take();
        assert_eq!(taken.iter().map(|s| s.timestamp.as_micros()).collect::<Vec<_>>(), vec![1, 2]);
        assert!(buffer.is_empty());
        assert!(buffer.take().is_empty());
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let buffer = GazeBuffer::new();
        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        buffer.push(sample(p * 1000 + i));
                    }
                })
            })
            .collect();

        let mut collected = Vec::new();
        while producers.iter().any(|h| !h.is_finished()) {
            collected.extend(buffer.take());
        }
        for handle in producers {
            handle.join().unwrap();
        }
        collected.extend(buffer.take());

        let mut stamps: Vec<u64> = collected.iter().map(|s| s.timestamp.as_micros()).collect();
        stamps.sort_unstable();
        stamps.dedup();
        assert_eq!(stamps.len(), 2000);
    }
}
