use std::{
    cell::Cell,
    io,
    net::SocketAddr,
    time::{Duration, Instant},
};

use bytes::Bytes;

use super::{BatchWriter, BatchWriterPtr, WriterKind};
use crate::socket::{DatagramSocket, SendOptions};

/// Holds `write` back so callers sharing a thread flush one batch together.
///
/// A write goes through once the wrapped writer is full, once a caller was
/// told the batch `needs_flush`, or once `delay` has passed since the first
/// append. Otherwise it reports nothing sent, and the `reset` that follows is
/// skipped so the next caller appends into the same batch.
pub struct DeferredBatchWriter {
    inner: BatchWriterPtr,
    delay: Duration,
    first_append: Option<Instant>,
    inner_full: bool,
    flush_requested: Cell<bool>,
    held: bool,
}

impl DeferredBatchWriter {
    pub fn new(inner: BatchWriterPtr, delay: Duration) -> Self {
        Self {
            inner,
            delay,
            first_append: None,
            inner_full: false,
            flush_requested: Cell::new(false),
            held: false,
        }
    }

    fn due(&self, now: Instant) -> bool {
        self.inner_full
            || self.flush_requested.get()
            || self.delay.is_zero()
            || self
                .first_append
                .is_some_and(|first| now.duration_since(first) >= self.delay)
    }
}

impl BatchWriter for DeferredBatchWriter {
    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn needs_flush(&self, size: usize) -> bool {
        let needs_flush = self.inner.needs_flush(size);
        if needs_flush {
            self.flush_requested.set(true);
        }
        needs_flush
    }

    fn append(
        &mut self,
        buf: Option<Bytes>,
        size: usize,
        addr: SocketAddr,
        options: SendOptions,
    ) -> bool {
        self.first_append.get_or_insert_with(Instant::now);
        let full = self.inner.append(buf, size, addr, options);
        self.inner_full |= full;
        full
    }

    fn write(&mut self, socket: &dyn DatagramSocket, peer: SocketAddr) -> io::Result<usize> {
        if !self.due(Instant::now()) {
            self.held = true;
            tracing::trace!(size = self.inner.size(), "holding batch for coalescing");
            return Ok(0);
        }
        self.held = false;
        self.flush_requested.set(false);
        self.inner.write(socket, peer)
    }

    fn reset(&mut self) {
        if self.held {
            self.held = false;
            return;
        }
        self.inner.reset();
        self.first_append = None;
        self.inner_full = false;
        self.flush_requested.set(false);
    }

    fn kind(&self) -> WriterKind {
        self.inner.kind()
    }

    fn is_deferred(&self) -> bool {
        true
    }

    fn flush_deadline(&self) -> Option<Instant> {
        self.first_append.map(|first| first + self.delay)
    }
}

impl std::fmt::Debug for DeferredBatchWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredBatchWriter")
            .field("inner", &self.inner.kind())
            .field("delay", &self.delay)
            .field("held", &self.held)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        test_utils::{packet, peer, RecordingSocket, SendKind},
        writer::{GsoBatchWriter, SendmmsgBatchWriter, SinglePacketBatchWriter},
    };

    const LONG: Duration = Duration::from_secs(3600);

    fn append(writer: &mut DeferredBatchWriter, len: usize) -> bool {
        writer.append(Some(packet(len, b'D')), len, peer(), SendOptions::default())
    }

    #[test]
    fn contract_calls_pass_through() {
        let mut writer = DeferredBatchWriter::new(Box::new(GsoBatchWriter::new(4)), LONG);
        assert!(writer.is_empty());
        assert!(writer.is_deferred());
        assert_eq!(writer.kind(), WriterKind::Gso);
        assert!(writer.flush_deadline().is_none());

        assert!(!append(&mut writer, 10));
        assert_eq!(writer.size(), 10);
        assert!(writer.needs_flush(20));
        assert!(!writer.needs_flush(10));
        assert!(writer.flush_deadline().is_some());
    }

    #[test_log::test]
    fn holds_partial_batch_and_coalesces() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let mut writer = DeferredBatchWriter::new(Box::new(SendmmsgBatchWriter::new(3)), LONG);

        append(&mut writer, 10);
        assert_eq!(writer.write(&socket, peer())?, 0);
        writer.reset();
        assert_eq!(writer.size(), 10, "held batch survives the reset");

        append(&mut writer, 5);
        assert_eq!(writer.write(&socket, peer())?, 0);
        writer.reset();
        assert!(socket.calls().is_empty());

        assert!(append(&mut writer, 20));
        assert_eq!(writer.write(&socket, peer())?, 35);
        writer.reset();
        assert!(writer.is_empty());

        let calls = socket.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, SendKind::Mmsg);
        assert_eq!(calls[0].payloads.len(), 3);
        Ok(())
    }

    #[test]
    fn zero_delay_writes_immediately() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let mut writer =
            DeferredBatchWriter::new(Box::new(SendmmsgBatchWriter::new(8)), Duration::ZERO);
        append(&mut writer, 10);
        assert_eq!(writer.write(&socket, peer())?, 10);
        writer.reset();
        assert!(writer.is_empty());
        Ok(())
    }

    #[test]
    fn elapsed_delay_releases_the_batch() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let delay = Duration::from_millis(5);
        let mut writer = DeferredBatchWriter::new(Box::new(SendmmsgBatchWriter::new(8)), delay);
        append(&mut writer, 10);
        assert_eq!(writer.write(&socket, peer())?, 0);
        writer.reset();

        std::thread::sleep(delay * 2);
        assert_eq!(writer.write(&socket, peer())?, 10);
        writer.reset();
        assert!(writer.is_empty());
        assert!(writer.flush_deadline().is_none());
        Ok(())
    }

    #[test]
    fn needs_flush_releases_the_batch() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let mut writer = DeferredBatchWriter::new(Box::new(GsoBatchWriter::new(8)), LONG);
        append(&mut writer, 10);
        assert!(writer.needs_flush(20));
        assert_eq!(writer.write(&socket, peer())?, 10);
        writer.reset();

        assert!(!writer.needs_flush(20));
        assert!(!append(&mut writer, 20));
        Ok(())
    }

    #[test]
    fn single_packet_inner_flushes_every_append() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let mut writer = DeferredBatchWriter::new(Box::new(SinglePacketBatchWriter::new()), LONG);
        for _ in 0..3 {
            assert!(append(&mut writer, 10));
            assert_eq!(writer.write(&socket, peer())?, 10);
            writer.reset();
        }
        assert_eq!(socket.calls().len(), 3);
        Ok(())
    }
}
