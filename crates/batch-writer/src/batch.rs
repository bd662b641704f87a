//! Batch state shared by every writer.
//!
//! Writers never decide "full" ad hoc: they feed each append through
//! [`BatchCounter::record`], optionally closed early by a [`SegmentRun`] that
//! just received its shorter tail segment.

/// Lifecycle of one batch between two resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Empty,
    Filling,
    /// Must be flushed before anything else is appended.
    Full,
}

/// Datagram count of a batch against its declared capacity.
#[derive(Debug, Clone)]
pub struct BatchCounter {
    capacity: usize,
    count: usize,
    state: BatchState,
}

impl BatchCounter {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "batch capacity must be at least one");
        Self {
            capacity,
            count: 0,
            state: BatchState::Empty,
        }
    }

    /// Account for one appended datagram. `closes` marks the batch full even
    /// below capacity.
    ///
    /// # Panics
    /// If the batch already reported full.
    pub fn record(&mut self, closes: bool) -> BatchState {
        assert_ne!(
            self.state,
            BatchState::Full,
            "append on a batch that already reported full"
        );
        self.count += 1;
        self.state = if closes || self.count >= self.capacity {
            BatchState::Full
        } else {
            BatchState::Filling
        };
        self.state
    }

    pub fn reset(&mut self) {
        self.count = 0;
        self.state = BatchState::Empty;
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.state == BatchState::Empty
    }

    pub fn is_full(&self) -> bool {
        self.state == BatchState::Full
    }
}

/// Consecutive datagrams the kernel can split back apart with GSO: every
/// segment has the run's size except the last, which may be shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentRun {
    segment_size: usize,
    segments: usize,
    closed: bool,
}

impl SegmentRun {
    pub fn new(first_size: usize) -> Self {
        Self {
            segment_size: first_size,
            segments: 1,
            closed: false,
        }
    }

    pub fn accepts(&self, size: usize) -> bool {
        !self.closed && size <= self.segment_size
    }

    /// Extend the run, returning true when `size` was its shorter last segment.
    ///
    /// # Panics
    /// If the run does not accept `size`.
    pub fn push(&mut self, size: usize) -> bool {
        assert!(
            self.accepts(size),
            "segment of {size} bytes does not fit a {} byte run (closed: {})",
            self.segment_size,
            self.closed
        );
        self.segments += 1;
        if size < self.segment_size {
            self.closed = true;
        }
        self.closed
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub fn segments(&self) -> usize {
        self.segments
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Segment size for the send call; 0 leaves a lone datagram unsegmented.
    pub fn gso_size(&self) -> usize {
        if self.segments > 1 {
            self.segment_size
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_fills_to_capacity() {
        let mut counter = BatchCounter::new(3);
        assert!(counter.is_empty());
        assert_eq!(counter.record(false), BatchState::Filling);
        assert_eq!(counter.record(false), BatchState::Filling);
        assert_eq!(counter.record(false), BatchState::Full);
        assert_eq!(counter.count(), 3);

        counter.reset();
        assert_eq!(counter.state(), BatchState::Empty);
        assert_eq!(counter.count(), 0);
    }

    #[test]
    fn capacity_one_is_full_after_first() {
        let mut counter = BatchCounter::new(1);
        assert_eq!(counter.record(false), BatchState::Full);
    }

    #[test]
    fn closing_append_fills_early() {
        let mut counter = BatchCounter::new(10);
        counter.record(false);
        assert_eq!(counter.record(true), BatchState::Full);
    }

    #[test]
    #[should_panic(expected = "already reported full")]
    fn record_after_full_panics() {
        let mut counter = BatchCounter::new(1);
        counter.record(false);
        counter.record(false);
    }

    #[test]
    fn run_takes_equal_then_one_shorter() {
        let mut run = SegmentRun::new(10);
        assert_eq!(run.gso_size(), 0);
        assert!(run.accepts(10));
        assert!(!run.accepts(11));

        assert!(!run.push(10));
        assert_eq!(run.gso_size(), 10);
        assert!(run.push(5));
        assert!(run.is_closed());
        assert!(!run.accepts(5), "nothing follows the short tail");
        assert_eq!(run.segments(), 3);
    }
}
