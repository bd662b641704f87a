use std::{
    io::{self, IoSlice},
    net::SocketAddr,
};

use parking_lot::Mutex;

use crate::socket::{Datagram, DatagramSocket, SendOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendKind {
    Send,
    Gso,
    Mmsg,
    MmsgGso,
}

/// One recorded send call, one entry per message slot.
#[derive(Debug, Clone)]
pub(crate) struct SentCall {
    pub kind: SendKind,
    pub addrs: Vec<SocketAddr>,
    pub payloads: Vec<Vec<u8>>,
    pub segment_sizes: Vec<usize>,
    pub options: Vec<SendOptions>,
}

impl SentCall {
    pub fn total_len(&self) -> usize {
        self.payloads.iter().map(Vec::len).sum()
    }
}

/// Socket double that records every call and accepts all bytes, or fails
/// once with a queued error.
#[derive(Default)]
pub(crate) struct RecordingSocket {
    calls: Mutex<Vec<SentCall>>,
    next_error: Mutex<Option<io::ErrorKind>>,
}

impl RecordingSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, kind: io::ErrorKind) {
        *self.next_error.lock() = Some(kind);
    }

    pub fn calls(&self) -> Vec<SentCall> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> SentCall {
        self.calls
            .lock()
            .last()
            .cloned()
            .expect("no send call recorded")
    }

    fn record(&self, call: SentCall) -> io::Result<usize> {
        if let Some(kind) = self.next_error.lock().take() {
            return Err(io::Error::from(kind));
        }
        let len = call.total_len();
        self.calls.lock().push(call);
        Ok(len)
    }

    fn record_msgs(&self, kind: SendKind, msgs: &[Datagram<'_>]) -> io::Result<usize> {
        self.record(SentCall {
            kind,
            addrs: msgs.iter().map(|msg| msg.addr).collect(),
            payloads: msgs.iter().map(|msg| gather(msg.bufs)).collect(),
            segment_sizes: msgs.iter().map(|msg| msg.segment_size).collect(),
            options: msgs.iter().map(|msg| msg.options).collect(),
        })
    }
}

fn gather(bufs: &[IoSlice<'_>]) -> Vec<u8> {
    bufs.iter().flat_map(|buf| buf.iter().copied()).collect()
}

impl DatagramSocket for RecordingSocket {
    fn send(&self, addr: SocketAddr, bufs: &[IoSlice<'_>], options: SendOptions) -> io::Result<usize> {
        self.record(SentCall {
            kind: SendKind::Send,
            addrs: vec![addr],
            payloads: vec![gather(bufs)],
            segment_sizes: vec![0],
            options: vec![options],
        })
    }

    fn send_gso(
        &self,
        addr: SocketAddr,
        bufs: &[IoSlice<'_>],
        segment_size: usize,
        options: SendOptions,
    ) -> io::Result<usize> {
        self.record(SentCall {
            kind: SendKind::Gso,
            addrs: vec![addr],
            payloads: vec![gather(bufs)],
            segment_sizes: vec![segment_size],
            options: vec![options],
        })
    }

    fn send_mmsg(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
        self.record_msgs(SendKind::Mmsg, msgs)
    }

    fn send_mmsg_gso(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
        self.record_msgs(SendKind::MmsgGso, msgs)
    }
}

pub(crate) fn peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4433))
}

pub(crate) fn other_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4434))
}

/// A chained payload of `len` copies of `fill`.
pub(crate) fn packet(len: usize, fill: u8) -> bytes::Bytes {
    bytes::Bytes::from(vec![fill; len])
}
