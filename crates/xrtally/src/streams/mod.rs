//! Append-and-threshold-flush streams: gaze, custom events and sensors.
//!
//! Each stream owns an ordered buffer and a part counter starting at 1.
//! Appending stamps capture time; reaching the stream's limit stages a batch
//! synchronously and delivers it in the background.

pub mod custom_event;
pub mod gaze;
pub mod sensor;

pub use custom_event::{CustomEventRecord, CustomEventStream};
pub use gaze::{GazeHit, GazeRecord, GazeStream};
pub use sensor::{SensorGroup, SensorStream};

/// Ordered records plus the part number the next batch will carry.
#[derive(Debug)]
pub(crate) struct BatchBuffer<T> {
    records: Vec<T>,
    part: u32,
    threshold: usize,
}

impl<T> BatchBuffer<T> {
    pub(crate) fn new(threshold: usize) -> Self {
        Self {
            records: Vec::new(),
            part: 1,
            threshold,
        }
    }

    /// Append a record. Returns true once the buffer has reached its limit.
    pub(crate) fn push(&mut self, record: T) -> bool {
        self.records.push(record);
        self.records.len() >= self.threshold
    }

    /// Take every record with the current part number and advance the counter.
    pub(crate) fn take(&mut self) -> (u32, Vec<T>) {
        let part = self.part;
        self.part += 1;
        (part, std::mem::take(&mut self.records))
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn part(&self) -> u32 {
        self.part
    }

    pub(crate) fn records(&self) -> &[T] {
        &self.records
    }

    pub(crate) fn reset(&mut self) {
        self.records.clear();
        self.part = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_reports_threshold() {
        let mut buffer = BatchBuffer::new(3);
        assert!(!buffer.push(1));
        assert!(!buffer.push(2));
        assert!(buffer.push(3));
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_take_advances_part() {
        let mut buffer = BatchBuffer::new(10);
        buffer.push("a");
        buffer.push("b");

        let (part, records) = buffer.take();
        assert_eq!(part, 1);
        assert_eq!(records, vec!["a", "b"]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.part(), 2);

        buffer.reset();
        assert_eq!(buffer.part(), 1);
    }
}
