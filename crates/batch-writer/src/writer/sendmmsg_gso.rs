use std::{
    collections::HashMap,
    io::{self, IoSlice},
    net::SocketAddr,
};

use bytes::Bytes;

use super::{BatchWriter, PendingDatagram, WriterKind};
use crate::{
    batch::{BatchCounter, BatchState, SegmentRun},
    socket::{Datagram, DatagramSocket, SendOptions, MAX_GSO_PAYLOAD, MAX_GSO_SEGMENTS},
};

/// One `sendmmsg` slot: a GSO run to a single destination.
#[derive(Debug)]
struct RunGroup {
    addr: SocketAddr,
    options: SendOptions,
    run: SegmentRun,
    pending: Vec<PendingDatagram>,
    bytes: usize,
}

impl RunGroup {
    fn accepts(&self, size: usize, options: SendOptions) -> bool {
        self.options == options
            && self.run.segments() < MAX_GSO_SEGMENTS
            && self.bytes + size <= MAX_GSO_PAYLOAD
            && self.run.accepts(size)
    }
}

/// `sendmmsg` whose slots are GSO runs.
///
/// A datagram joins the newest run for its destination when the run accepts
/// its size and the run stays within one GSO send, otherwise it opens a new
/// run. Only the datagram count bounds the batch.
#[derive(Debug)]
pub struct SendmmsgGsoBatchWriter {
    counter: BatchCounter,
    groups: Vec<RunGroup>,
    latest_group: HashMap<SocketAddr, usize>,
    size: usize,
}

impl SendmmsgGsoBatchWriter {
    pub fn new(max_datagrams: usize) -> Self {
        Self {
            counter: BatchCounter::new(max_datagrams),
            groups: Vec::new(),
            latest_group: HashMap::new(),
            size: 0,
        }
    }
}

impl BatchWriter for SendmmsgGsoBatchWriter {
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
        let datagram = PendingDatagram::new(self.kind(), buf, size, addr, options);

        let joinable = self
            .latest_group
            .get(&addr)
            .copied()
            .filter(|&idx| self.groups[idx].accepts(size, options));
        match joinable {
            Some(idx) => {
                let group = &mut self.groups[idx];
                group.run.push(size);
                group.bytes += size;
                group.pending.push(datagram);
            }
            None => {
                self.latest_group.insert(addr, self.groups.len());
                self.groups.push(RunGroup {
                    addr,
                    options,
                    run: SegmentRun::new(size),
                    pending: vec![datagram],
                    bytes: size,
                });
            }
        }
        self.size += size;
        tracing::trace!(size, %addr, runs = self.groups.len(), ?state, "sendmmsg gso append");
        state == BatchState::Full
    }

    fn write(&mut self, socket: &dyn DatagramSocket, _peer: SocketAddr) -> io::Result<usize> {
        if self.groups.is_empty() {
            return Ok(0);
        }
        let slices: Vec<Vec<IoSlice<'_>>> = self
            .groups
            .iter()
            .map(|group| {
                group
                    .pending
                    .iter()
                    .map(|datagram| IoSlice::new(&datagram.buf))
                    .collect()
            })
            .collect();
        let msgs: Vec<Datagram<'_>> = self
            .groups
            .iter()
            .zip(&slices)
            .map(|(group, bufs)| Datagram {
                addr: group.addr,
                bufs,
                segment_size: group.run.gso_size(),
                options: group.options,
            })
            .collect();
        let result = socket.send_mmsg_gso(&msgs);
        tracing::debug!(
            runs = msgs.len(),
            datagrams = self.counter.count(),
            bytes = self.size,
            ?result,
            "sendmmsg gso batch written"
        );
        result
    }

    fn reset(&mut self) {
        self.counter.reset();
        self.groups.clear();
        self.latest_group.clear();
        self.size = 0;
    }

    fn kind(&self) -> WriterKind {
        WriterKind::SendmmsgGso
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        socket::EcnCodepoint,
        test_utils::{other_peer, packet, peer, RecordingSocket, SendKind},
    };

    const LEN: usize = 10;
    const LEN_LT: usize = 5;
    const LEN_GT: usize = 20;

    fn append_to(writer: &mut SendmmsgGsoBatchWriter, len: usize, addr: SocketAddr) -> bool {
        writer.append(Some(packet(len, b'A')), len, addr, SendOptions::default())
    }

    #[test]
    fn equal_sizes_fill_to_capacity() {
        let capacity = 3;
        let mut writer = SendmmsgGsoBatchWriter::new(capacity);
        for _ in 0..3 {
            let mut size = 0;
            for _ in 0..capacity - 1 {
                assert!(!append_to(&mut writer, LEN, peer()));
                size += LEN;
                assert_eq!(writer.size(), size);
            }
            assert!(append_to(&mut writer, LEN, peer()));
            assert_eq!(writer.size(), size + LEN);
            writer.reset();
        }
    }

    #[test]
    fn big_and_small_sizes_never_need_flush() {
        let capacity = 9;
        let mut writer = SendmmsgGsoBatchWriter::new(capacity);
        for _ in 0..3 {
            assert!(writer.is_empty());
            let mut size = 0;
            for i in 0..capacity - 1 {
                let len = [LEN, LEN_LT, LEN_GT][i % 3];
                assert!(!writer.needs_flush(len));
                assert!(!append_to(&mut writer, len, peer()));
                size += len;
                assert_eq!(writer.size(), size);
            }
            assert!(append_to(&mut writer, LEN, peer()));
            assert_eq!(writer.size(), size + LEN);
            writer.reset();
        }
    }

    #[test]
    fn runs_become_slots() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let mut writer = SendmmsgGsoBatchWriter::new(16);
        // [10, 10, 5] closes on the short tail, so the next 10 opens a new run.
        for len in [LEN, LEN, LEN_LT, LEN, LEN_GT] {
            append_to(&mut writer, len, peer());
        }
        assert_eq!(writer.write(&socket, peer())?, 55);

        let call = socket.last_call();
        assert_eq!(call.kind, SendKind::MmsgGso);
        assert_eq!(call.segment_sizes, vec![LEN, 0, 0]);
        let lens: Vec<usize> = call.payloads.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![25, 10, 20]);
        Ok(())
    }

    #[test]
    fn destinations_keep_their_own_runs() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let mut writer = SendmmsgGsoBatchWriter::new(16);
        append_to(&mut writer, LEN, peer());
        append_to(&mut writer, LEN, other_peer());
        append_to(&mut writer, LEN, peer());
        append_to(&mut writer, LEN, other_peer());
        writer.write(&socket, peer())?;

        let call = socket.last_call();
        assert_eq!(call.addrs, vec![peer(), other_peer()]);
        assert_eq!(call.segment_sizes, vec![LEN, LEN]);
        Ok(())
    }

    #[test]
    fn differing_options_split_runs() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let mut writer = SendmmsgGsoBatchWriter::new(16);
        append_to(&mut writer, LEN, peer());
        writer.append(
            Some(packet(LEN, b'A')),
            LEN,
            peer(),
            SendOptions::with_ecn(EcnCodepoint::Ect0),
        );
        writer.write(&socket, peer())?;

        let call = socket.last_call();
        assert_eq!(call.payloads.len(), 2);
        assert_eq!(call.options[1].ecn, Some(EcnCodepoint::Ect0));
        Ok(())
    }

    #[test]
    fn runs_are_capped_at_kernel_limit() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let mut writer = SendmmsgGsoBatchWriter::new(MAX_GSO_SEGMENTS + 2);
        for _ in 0..MAX_GSO_SEGMENTS + 1 {
            append_to(&mut writer, LEN, peer());
        }
        writer.write(&socket, peer())?;

        let call = socket.last_call();
        assert_eq!(call.payloads[0].len(), MAX_GSO_SEGMENTS * LEN);
        assert_eq!(call.payloads[1].len(), LEN);
        Ok(())
    }

    #[test]
    fn runs_stay_within_payload_limit() -> testresult::TestResult {
        let socket = RecordingSocket::new();
        let len = crate::config::DEFAULT_UDP_SEND_PACKET_LEN;
        let per_run = MAX_GSO_PAYLOAD / len;
        let mut writer = SendmmsgGsoBatchWriter::new(MAX_GSO_SEGMENTS);
        for _ in 0..per_run + 1 {
            append_to(&mut writer, len, peer());
        }
        writer.write(&socket, peer())?;

        let call = socket.last_call();
        let lens: Vec<usize> = call.payloads.iter().map(Vec::len).collect();
        assert_eq!(lens, vec![per_run * len, len]);
        assert!(lens[0] <= MAX_GSO_PAYLOAD);
        Ok(())
    }
}
