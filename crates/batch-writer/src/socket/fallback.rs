//! Portable sends for targets without `sendmmsg` or `UDP_SEGMENT`.

use std::{
    io::{self, IoSlice},
    net::SocketAddr,
};

use super::Datagram;

fn gather(bufs: &[IoSlice<'_>]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bufs.iter().map(|buf| buf.len()).sum());
    for buf in bufs {
        out.extend_from_slice(buf);
    }
    out
}

pub(super) fn send<F>(mut send_to: F, bufs: &[IoSlice<'_>]) -> io::Result<usize>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    match bufs {
        [single] => send_to(single),
        _ => send_to(&gather(bufs)),
    }
}

/// Emulate GSO by sending every `segment_size` chunk as its own datagram.
///
/// Returns the bytes sent before the first failure; the error only surfaces
/// when nothing went out.
pub(super) fn send_segmented<F>(
    mut send_to: F,
    bufs: &[IoSlice<'_>],
    segment_size: usize,
) -> io::Result<usize>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    let payload = gather(bufs);
    if segment_size == 0 || payload.len() <= segment_size {
        return send_to(&payload);
    }
    let mut sent = 0;
    for chunk in payload.chunks(segment_size) {
        match send_to(chunk) {
            Ok(n) => sent += n,
            Err(err) if sent == 0 => return Err(err),
            Err(err) => {
                tracing::debug!(sent, %err, "segmented send stopped early");
                break;
            }
        }
    }
    Ok(sent)
}

pub(super) fn send_each<F>(mut send_to: F, msgs: &[Datagram<'_>], gso: bool) -> io::Result<usize>
where
    F: FnMut(&[u8], SocketAddr) -> io::Result<usize>,
{
    let mut sent = 0;
    for msg in msgs {
        let segment_size = if gso { msg.segment_size } else { 0 };
        let result = send_segmented(|buf| send_to(buf, msg.addr), msg.bufs, segment_size);
        match result {
            Ok(n) => sent += n,
            Err(err) if sent == 0 => return Err(err),
            Err(err) => {
                tracing::debug!(sent, %err, "batched send stopped early");
                break;
            }
        }
    }
    Ok(sent)
}
