use std::{
    io::{self, IoSlice},
    net::SocketAddr,
};

use bytes::Bytes;

use super::{BatchWriter, PendingDatagram, WriterKind};
use crate::{
    batch::{BatchCounter, BatchState},
    socket::{Datagram, DatagramSocket, SendOptions},
};

/// Independent datagrams of any size and destination, flushed with one
/// `sendmmsg`.
#[derive(Debug)]
pub struct SendmmsgBatchWriter {
    counter: BatchCounter,
    pending: Vec<PendingDatagram>,
    size: usize,
}

impl SendmmsgBatchWriter {
    pub fn new(max_datagrams: usize) -> Self {
        Self {
            counter: BatchCounter::new(max_datagrams),
            pending: Vec::with_capacity(max_datagrams),
            size: 0,
        }
    }
}

impl BatchWriter for SendmmsgBatchWriter {
    fn is_empty(&self) -> bool {
        self.counter.is_empty()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn needs_flush(&self, _size: usize) -> bool {
        self.counter.is_full()
    }

    fn append(
        &mut self,
        buf: Option<Bytes>,
        size: usize,
        addr: SocketAddr,
        options: SendOptions,
    ) -> bool {
        let state = self.counter.record(false);
        self.pending
            .push(PendingDatagram::new(self.kind(), buf, size, addr, options));
        self.size += size;
        state == BatchState::Full
    }

    fn write(&mut self, socket: &dyn DatagramSocket, _peer: SocketAddr) -> io::Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        let slices: Vec<[IoSlice<'_>; 1]> = self
            .pending
            .iter()
            .map(|datagram| [IoSlice::new(&datagram.buf)])
            .collect();
        let msgs: Vec<Datagram<'_>> = self
            .pending
            .iter()
            .zip(&slices)
            .map(|(datagram, bufs)| Datagram {
                addr: datagram.addr,
                bufs,
                segment_size: 0,
                options: datagram.options,
            })
            .collect();
        let result = socket.send_mmsg(&msgs);
        tracing::debug!(messages = msgs.len(), bytes = self.size, ?result, "sendmmsg batch written");
        result
    }

    fn reset(&mut self) {
        self.counter.reset();
        self.pending.clear();
        self.size = 0;
    }

    fn kind(&self) -> WriterKind {
        WriterKind::Sendmmsg
    }
}
