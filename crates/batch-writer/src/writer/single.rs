use std::{
    io::{self, IoSlice},
    net::SocketAddr,
};

use bytes::Bytes;

use super::{BatchWriter, PendingDatagram, WriterKind};
use crate::{
    batch::{BatchCounter, BatchState},
    socket::{DatagramSocket, SendOptions},
};

/// Holds one datagram and sends it on its own.
#[derive(Debug)]
pub struct SinglePacketBatchWriter {
    counter: BatchCounter,
    pending: Option<PendingDatagram>,
}

impl SinglePacketBatchWriter {
    pub fn new() -> Self {
        Self {
            counter: BatchCounter::new(1),
            pending: None,
        }
    }
}

impl Default for SinglePacketBatchWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchWriter for SinglePacketBatchWriter {
    fn is_empty(&self) -> bool {
        self.pending.is_none()
    }

    fn size(&self) -> usize {
        self.pending.as_ref().map_or(0, PendingDatagram::len)
    }

    fn needs_flush(&self, _size: usize) -> bool {
        !self.is_empty()
    }

    fn append(
        &mut self,
        buf: Option<Bytes>,
        size: usize,
        addr: SocketAddr,
        options: SendOptions,
    ) -> bool {
        let state = self.counter.record(false);
        self.pending = Some(PendingDatagram::new(self.kind(), buf, size, addr, options));
        state == BatchState::Full
    }

    fn write(&mut self, socket: &dyn DatagramSocket, peer: SocketAddr) -> io::Result<usize> {
        let Some(pending) = &self.pending else {
            return Ok(0);
        };
        socket.send(peer, &[IoSlice::new(&pending.buf)], pending.options)
    }

    fn reset(&mut self) {
        self.pending = None;
        self.counter.reset();
    }

    fn kind(&self) -> WriterKind {
        WriterKind::SinglePacket
    }
}
