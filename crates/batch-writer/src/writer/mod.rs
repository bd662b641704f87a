//! The append/flush contract and its strategies.
//!
//! A write loop only ever talks to a [`BatchWriterPtr`]:
//!
//! 1. `needs_flush(len)`: if true, `write` then `reset` the pending batch;
//! 2. `append(..)`: if it returns true the batch is full, flush it the same way.
//!
//! The chained writers own one [`Bytes`] per datagram. The in-place writers
//! never see packet bytes: the caller serializes straight into the
//! [`BufAccessor`](crate::BufAccessor) region and `append` only records how
//! far the batch reaches into it.

use std::{fmt, io, net::SocketAddr, time::Instant};

use bytes::Bytes;

use crate::socket::{DatagramSocket, SendOptions};

mod deferred;
mod gso;
mod gso_inplace;
mod sendmmsg;
mod sendmmsg_gso;
mod single;
mod single_inplace;

pub use deferred::DeferredBatchWriter;
pub use gso::GsoBatchWriter;
pub use gso_inplace::GsoInplaceBatchWriter;
pub use sendmmsg::SendmmsgBatchWriter;
pub use sendmmsg_gso::SendmmsgGsoBatchWriter;
pub use single::SinglePacketBatchWriter;
pub use single_inplace::SinglePacketInplaceBatchWriter;

pub type BatchWriterPtr = Box<dyn BatchWriter>;

/// Concrete strategy behind a writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterKind {
    SinglePacket,
    Gso,
    GsoInplace,
    Sendmmsg,
    SendmmsgGso,
    SinglePacketInplace,
}

impl WriterKind {
    pub fn is_inplace(self) -> bool {
        matches!(self, WriterKind::GsoInplace | WriterKind::SinglePacketInplace)
    }
}

pub trait BatchWriter: Send + fmt::Debug {
    /// True when no datagram is buffered.
    fn is_empty(&self) -> bool;

    /// Payload bytes currently buffered.
    fn size(&self) -> usize;

    /// Whether a datagram of `size` bytes must wait for the current batch to
    /// be flushed. Never true for an empty batch unless `size` can not fit at all.
    fn needs_flush(&self, size: usize) -> bool;

    /// Add one datagram, returning true when the batch is now full.
    ///
    /// Chained writers take ownership of `buf`; in-place writers ignore it.
    ///
    /// # Panics
    /// If the batch already reported full, if `needs_flush(size)` holds, or
    /// if a chained writer gets no buffer.
    fn append(
        &mut self,
        buf: Option<Bytes>,
        size: usize,
        addr: SocketAddr,
        options: SendOptions,
    ) -> bool;

    /// Flush the batch with one send call and return what the kernel took.
    ///
    /// Single destination strategies send to `peer`; the `sendmmsg` ones
    /// use the address given to each `append`.
    fn write(&mut self, socket: &dyn DatagramSocket, peer: SocketAddr) -> io::Result<usize>;

    /// Drop the batch and get ready for the next one.
    fn reset(&mut self);

    fn kind(&self) -> WriterKind;

    /// True for writers that may hold a `write` back to coalesce callers.
    fn is_deferred(&self) -> bool {
        false
    }

    /// Instant by which a held batch should be written again.
    fn flush_deadline(&self) -> Option<Instant> {
        None
    }
}

/// One datagram of a chained batch.
#[derive(Debug, Clone)]
pub(crate) struct PendingDatagram {
    pub buf: Bytes,
    pub addr: SocketAddr,
    pub options: SendOptions,
}

impl PendingDatagram {
    pub fn new(
        kind: WriterKind,
        buf: Option<Bytes>,
        size: usize,
        addr: SocketAddr,
        options: SendOptions,
    ) -> Self {
        let Some(buf) = buf else {
            panic!("{kind:?} writer appended without a buffer");
        };
        debug_assert_eq!(buf.len(), size, "appended size disagrees with the buffer");
        Self { buf, addr, options }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }
}
