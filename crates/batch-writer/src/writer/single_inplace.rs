use std::{
    io::{self, IoSlice},
    net::SocketAddr,
    sync::Arc,
};

use bytes::Bytes;

use super::{BatchWriter, WriterKind};
use crate::{
    batch::{BatchCounter, BatchState},
    buf_accessor::BufAccessor,
    socket::{DatagramSocket, SendOptions},
};

/// Sends the accessor region as one datagram.
///
/// The region holds at most one packet, so every append fills the batch. Its
/// emptiness is read off the region itself: a packet serialized but not yet
/// appended already counts as buffered.
#[derive(Debug)]
pub struct SinglePacketInplaceBatchWriter {
    accessor: Arc<BufAccessor>,
    counter: BatchCounter,
    options: SendOptions,
}

impl SinglePacketInplaceBatchWriter {
    pub fn new(accessor: Arc<BufAccessor>) -> Self {
        Self {
            accessor,
            counter: BatchCounter::new(1),
            options: SendOptions::default(),
        }
    }
}

impl BatchWriter for SinglePacketInplaceBatchWriter {
    fn is_empty(&self) -> bool {
        self.accessor.length() == 0
    }

    fn size(&self) -> usize {
        self.accessor.length()
    }

    fn needs_flush(&self, _size: usize) -> bool {
        self.counter.is_full()
    }

    fn append(
        &mut self,
        _buf: Option<Bytes>,
        _size: usize,
        _addr: SocketAddr,
        options: SendOptions,
    ) -> bool {
        self.options = options;
        self.counter.record(false) == BatchState::Full
    }

    fn write(&mut self, socket: &dyn DatagramSocket, peer: SocketAddr) -> io::Result<usize> {
        let mut buf = self.accessor.scoped();
        if buf.is_empty() {
            return Ok(0);
        }
        let result = socket.send(peer, &[IoSlice::new(buf.data())], self.options);
        tracing::trace!(len = buf.len(), ?result, "in-place packet written");
        buf.clear();
        result
    }

    fn reset(&mut self) {
        self.accessor.clear();
        self.counter.reset();
        self.options = SendOptions::default();
    }

    fn kind(&self) -> WriterKind {
        WriterKind::SinglePacketInplace
    }
}
