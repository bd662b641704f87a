use std::{
    io::{self, IoSlice},
    net::SocketAddr,
};

use bytes::Bytes;

use super::{BatchWriter, PendingDatagram, WriterKind};
use crate::{
    batch::{BatchCounter, BatchState, SegmentRun},
    socket::{DatagramSocket, SendOptions, MAX_GSO_PAYLOAD, MAX_GSO_SEGMENTS},
};

/// Coalesces equal-size datagrams into one segmentation offload send.
///
/// The first datagram sets the segment size. Later ones must match it, except
/// for one shorter datagram that closes the batch.
#[derive(Debug)]
pub struct GsoBatchWriter {
    counter: BatchCounter,
    run: Option<SegmentRun>,
    pending: Vec<PendingDatagram>,
    size: usize,
}

impl GsoBatchWriter {
    pub fn new(max_segments: usize) -> Self {
        let capacity = max_segments.min(MAX_GSO_SEGMENTS);
        Self {
            counter: BatchCounter::new(capacity),
            run: None,
            pending: Vec::with_capacity(capacity),
            size: 0,
        }
    }
}

impl BatchWriter for GsoBatchWriter {
    fn is_empty(&self) -> bool {
        self.counter.is_empty()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn needs_flush(&self, size: usize) -> bool {
        match &self.run {
            None => false,
            Some(run) => {
                self.counter.is_full()
                    || !run.accepts(size)
                    || self.size + size > MAX_GSO_PAYLOAD
            }
        }
    }

    fn append(
        &mut self,
        buf: Option<Bytes>,
        size: usize,
        addr: SocketAddr,
        options: SendOptions,
    ) -> bool {
        assert!(
            !self.needs_flush(size),
            "append of {size} bytes needs a flush first"
        );
        let datagram = PendingDatagram::new(self.kind(), buf, size, addr, options);
        let closes = match &mut self.run {
            None => {
                self.run = Some(SegmentRun::new(size));
                false
            }
            Some(run) => run.push(size),
        };
        self.size += size;
        self.pending.push(datagram);
        let state = self.counter.record(closes);
        tracing::trace!(size, segments = self.pending.len(), ?state, "gso append");
        state == BatchState::Full
    }

    fn write(&mut self, socket: &dyn DatagramSocket, peer: SocketAddr) -> io::Result<usize> {
        let Some(run) = &self.run else {
            return Ok(0);
        };
        // All segments share the first datagram's options.
        let options = self.pending[0].options;
        let bufs: Vec<IoSlice<'_>> = self
            .pending
            .iter()
            .map(|datagram| IoSlice::new(&datagram.buf))
            .collect();
        let result = if run.segments() > 1 {
            socket.send_gso(peer, &bufs, run.segment_size(), options)
        } else {
            socket.send(peer, &bufs, options)
        };
        tracing::debug!(
            segments = run.segments(),
            segment_size = run.segment_size(),
            ?result,
            "gso batch written"
        );
        result
    }

    fn reset(&mut self) {
        self.counter.reset();
        self.run = None;
        self.pending.clear();
        self.size = 0;
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Gso
    }
}
