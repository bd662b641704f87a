use std::{
    io::{self, IoSlice},
    mem,
    net::SocketAddr,
    os::fd::RawFd,
    ptr,
};

use socket2::SockAddr;

use super::{Datagram, SendOptions};

/// Room for one `UDP_SEGMENT` and one TOS/TCLASS control message.
const CONTROL_LEN: usize = 64;

#[repr(C, align(8))]
struct ControlBuf([u8; CONTROL_LEN]);

impl ControlBuf {
    fn zeroed() -> Self {
        Self([0u8; CONTROL_LEN])
    }
}

/// Fill `hdr`'s destination, payload and control fields.
///
/// `addr`, `bufs` and `control` must outlive the syscall that consumes `hdr`.
fn fill_header(
    hdr: &mut libc::msghdr,
    addr: &SockAddr,
    bufs: &[IoSlice<'_>],
    control: &mut ControlBuf,
    segment_size: usize,
    options: SendOptions,
) {
    hdr.msg_name = addr.as_ptr() as *mut libc::c_void;
    hdr.msg_namelen = addr.len() as libc::socklen_t;
    // IoSlice is ABI compatible with iovec on unix targets.
    hdr.msg_iov = bufs.as_ptr() as *mut libc::iovec;
    hdr.msg_iovlen = bufs.len() as _;
    hdr.msg_control = control.0.as_mut_ptr() as *mut libc::c_void;
    hdr.msg_controllen = CONTROL_LEN as _;

    let mut used = 0usize;
    // SAFETY: msg_control points at a zeroed, 8-byte aligned buffer of
    // CONTROL_LEN bytes, enough for both messages written below.
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(hdr);
        if segment_size > 0 && !cmsg.is_null() {
            (*cmsg).cmsg_level = libc::SOL_UDP;
            (*cmsg).cmsg_type = libc::UDP_SEGMENT;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<u16>() as _) as _;
            ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut u16, segment_size as u16);
            used += libc::CMSG_SPACE(mem::size_of::<u16>() as _) as usize;
            cmsg = libc::CMSG_NXTHDR(hdr, cmsg);
        }
        if let (Some(ecn), false) = (options.ecn, cmsg.is_null()) {
            let (level, kind) = if addr.is_ipv6() {
                (libc::IPPROTO_IPV6, libc::IPV6_TCLASS)
            } else {
                (libc::IPPROTO_IP, libc::IP_TOS)
            };
            (*cmsg).cmsg_level = level;
            (*cmsg).cmsg_type = kind;
            (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::c_int>() as _) as _;
            ptr::write_unaligned(
                libc::CMSG_DATA(cmsg) as *mut libc::c_int,
                ecn as u8 as libc::c_int,
            );
            used += libc::CMSG_SPACE(mem::size_of::<libc::c_int>() as _) as usize;
        }
    }

    if used == 0 {
        hdr.msg_control = ptr::null_mut();
        hdr.msg_controllen = 0;
    } else {
        hdr.msg_controllen = used as _;
    }
}

pub(super) fn send_msg(
    fd: RawFd,
    addr: SocketAddr,
    bufs: &[IoSlice<'_>],
    segment_size: usize,
    options: SendOptions,
) -> io::Result<usize> {
    let sockaddr = SockAddr::from(addr);
    let mut control = ControlBuf::zeroed();
    // SAFETY: msghdr is plain old data; every pointer field is set below.
    let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
    fill_header(&mut hdr, &sockaddr, bufs, &mut control, segment_size, options);

    // SAFETY: hdr only references locals that live across the call.
    let sent = unsafe { libc::sendmsg(fd, &hdr, 0) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(sent as usize)
}

pub(super) fn send_mmsg(fd: RawFd, msgs: &[Datagram<'_>], gso: bool) -> io::Result<usize> {
    if msgs.is_empty() {
        return Ok(0);
    }

    let sockaddrs: Vec<SockAddr> = msgs.iter().map(|msg| SockAddr::from(msg.addr)).collect();
    let mut controls: Vec<ControlBuf> = msgs.iter().map(|_| ControlBuf::zeroed()).collect();
    let mut headers: Vec<libc::mmsghdr> = Vec::with_capacity(msgs.len());
    for ((msg, sockaddr), control) in msgs.iter().zip(&sockaddrs).zip(controls.iter_mut()) {
        // SAFETY: see send_msg.
        let mut hdr: libc::msghdr = unsafe { mem::zeroed() };
        let segment_size = if gso { msg.segment_size } else { 0 };
        fill_header(&mut hdr, sockaddr, msg.bufs, control, segment_size, msg.options);
        headers.push(libc::mmsghdr {
            msg_hdr: hdr,
            msg_len: 0,
        });
    }

    // SAFETY: every header references sockaddrs, controls and caller slices,
    // none of which move or drop before the call returns.
    let sent = unsafe { libc::sendmmsg(fd, headers.as_mut_ptr(), headers.len() as _, 0) };
    if sent < 0 {
        return Err(io::Error::last_os_error());
    }
    let sent = sent as usize;
    if sent < msgs.len() {
        tracing::debug!(sent, total = msgs.len(), "sendmmsg accepted a partial batch");
    }
    Ok(headers[..sent]
        .iter()
        .map(|hdr| hdr.msg_len as usize)
        .sum())
}

pub(super) fn gso_supported(fd: RawFd) -> bool {
    let mut value: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: value and len are valid for writes of the advertised size.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_UDP,
            libc::UDP_SEGMENT,
            &mut value as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    rc == 0
}
