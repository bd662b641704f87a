use std::{
    io::{self, IoSlice},
    net::SocketAddr,
    sync::Arc,
};

use bytes::Bytes;

use super::{BatchWriter, WriterKind};
use crate::{
    batch::{BatchCounter, BatchState, SegmentRun},
    buf_accessor::BufAccessor,
    config::PACKET_SIZE_VIOLATION_TOLERANCE,
    socket::{DatagramSocket, SendOptions, MAX_GSO_PAYLOAD, MAX_GSO_SEGMENTS},
};

/// GSO writer over the shared contiguous region.
///
/// The caller serializes every packet directly into the accessor's region and
/// then appends its length. The batch is `region[..last_packet_end]`; anything
/// the caller wrote past that point is residue and survives the flush, moved to
/// the front of the region.
#[derive(Debug)]
pub struct GsoInplaceBatchWriter {
    accessor: Arc<BufAccessor>,
    counter: BatchCounter,
    run: Option<SegmentRun>,
    last_packet_end: usize,
    options: SendOptions,
    packet_len: usize,
    size_tolerance: usize,
}

impl GsoInplaceBatchWriter {
    pub fn new(accessor: Arc<BufAccessor>, max_segments: usize, packet_len: usize) -> Self {
        Self {
            accessor,
            counter: BatchCounter::new(max_segments.min(MAX_GSO_SEGMENTS)),
            run: None,
            last_packet_end: 0,
            options: SendOptions::default(),
            packet_len,
            size_tolerance: PACKET_SIZE_VIOLATION_TOLERANCE,
        }
    }

    /// Residue of `packet_len + tolerance` bytes or more is reported as a
    /// size violation.
    pub fn with_size_tolerance(mut self, tolerance: usize) -> Self {
        self.size_tolerance = tolerance;
        self
    }

    fn fits_region(&self, size: usize) -> bool {
        self.last_packet_end + size <= self.accessor.capacity()
    }
}

impl BatchWriter for GsoInplaceBatchWriter {
    fn is_empty(&self) -> bool {
        self.counter.is_empty()
    }

    fn size(&self) -> usize {
        self.last_packet_end
    }

    fn needs_flush(&self, size: usize) -> bool {
        match &self.run {
            None => !self.fits_region(size),
            Some(run) => {
                self.counter.is_full()
                    || !run.accepts(size)
                    || !self.fits_region(size)
                    || self.last_packet_end + size > MAX_GSO_PAYLOAD
            }
        }
    }

    fn append(
        &mut self,
        _buf: Option<Bytes>,
        size: usize,
        _addr: SocketAddr,
        options: SendOptions,
    ) -> bool {
        assert!(
            !self.needs_flush(size),
            "append of {size} bytes needs a flush first"
        );
        let closes = match &mut self.run {
            None => {
                self.run = Some(SegmentRun::new(size));
                self.options = options;
                false
            }
            Some(run) => run.push(size),
        };
        self.last_packet_end += size;
        let state = self.counter.record(closes);
        tracing::trace!(size, end = self.last_packet_end, ?state, "in-place gso append");
        state == BatchState::Full
    }

    fn write(&mut self, socket: &dyn DatagramSocket, peer: SocketAddr) -> io::Result<usize> {
        let Some(run) = self.run else {
            return Ok(0);
        };
        let mut buf = self.accessor.scoped();
        assert!(
            self.last_packet_end <= buf.len(),
            "batch ends at {} but the region only holds {} bytes",
            self.last_packet_end,
            buf.len()
        );
        let result = socket.send_gso(
            peer,
            &[IoSlice::new(&buf.data()[..self.last_packet_end])],
            run.gso_size(),
            self.options,
        );
        tracing::debug!(
            segments = run.segments(),
            segment_size = run.segment_size(),
            ?result,
            "in-place gso batch written"
        );

        let residue = buf.len() - self.last_packet_end;
        if residue == 0 {
            buf.clear();
        } else {
            if residue >= self.packet_len + self.size_tolerance {
                tracing::error!(
                    residue,
                    packet_len = self.packet_len,
                    "unflushed packet exceeds the send size limit"
                );
            }
            buf.consume_front(self.last_packet_end);
        }
        self.last_packet_end = 0;
        result
    }

    fn reset(&mut self) {
        if self.last_packet_end > 0 {
            // Abandoned batch: drop its bytes but keep the residue.
            let mut buf = self.accessor.scoped();
            let abandoned = self.last_packet_end.min(buf.len());
            buf.consume_front(abandoned);
            self.last_packet_end = 0;
        }
        self.counter.reset();
        self.run = None;
        self.options = SendOptions::default();
    }

    fn kind(&self) -> WriterKind {
        WriterKind::GsoInplace
    }
}
