//! Send capability the batch writers flush into.
//!
//! [`DatagramSocket`] covers four one-shot send calls. Socket
//! creation, binding and option tuning stay with the caller. On Linux the
//! calls map onto `sendmsg`/`sendmmsg` with `UDP_SEGMENT` control messages;
//! elsewhere they degrade to one `send_to` per datagram.

use std::{
    io::{self, IoSlice},
    net::{SocketAddr, UdpSocket},
};

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(target_os = "linux")]
mod linux;

/// Kernel limit on the number of segments in one GSO send.
pub const MAX_GSO_SEGMENTS: usize = 64;

/// Largest UDP payload the kernel takes in one GSO send.
pub const MAX_GSO_PAYLOAD: usize = 65507;

/// ECN codepoint written into the IP header of an outgoing datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EcnCodepoint {
    Ect0 = 0b10,
    Ect1 = 0b01,
    Ce = 0b11,
}

/// Per-datagram send options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SendOptions {
    pub ecn: Option<EcnCodepoint>,
}

impl SendOptions {
    pub fn with_ecn(ecn: EcnCodepoint) -> Self {
        Self { ecn: Some(ecn) }
    }
}

/// One message of a `sendmmsg` call.
#[derive(Debug, Clone, Copy)]
pub struct Datagram<'a> {
    pub addr: SocketAddr,
    pub bufs: &'a [IoSlice<'a>],
    /// GSO segment size; 0 sends the message unsegmented.
    pub segment_size: usize,
    pub options: SendOptions,
}

impl Datagram<'_> {
    pub fn len(&self) -> usize {
        self.bufs.iter().map(|buf| buf.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Sends issued by a batch writer's `write`.
///
/// Every call is a single attempt: errors, `WouldBlock` included, and short
/// counts are returned as they come from the kernel.
pub trait DatagramSocket {
    /// Send `bufs` gathered into one datagram.
    fn send(&self, addr: SocketAddr, bufs: &[IoSlice<'_>], options: SendOptions)
        -> io::Result<usize>;

    /// Send `bufs` gathered into one buffer that the kernel splits every
    /// `segment_size` bytes. A `segment_size` of 0 sends one datagram.
    fn send_gso(
        &self,
        addr: SocketAddr,
        bufs: &[IoSlice<'_>],
        segment_size: usize,
        options: SendOptions,
    ) -> io::Result<usize>;

    /// Send independent datagrams, ignoring their segment sizes. Returns the
    /// bytes of the messages the kernel accepted.
    fn send_mmsg(&self, msgs: &[Datagram<'_>]) -> io::Result<usize>;

    /// Like [`DatagramSocket::send_mmsg`], with every message GSO segmented.
    fn send_mmsg_gso(&self, msgs: &[Datagram<'_>]) -> io::Result<usize>;
}

#[cfg(target_os = "linux")]
mod platform_impls {
    use std::os::fd::AsRawFd;

    use super::*;

    impl DatagramSocket for UdpSocket {
        fn send(
            &self,
            addr: SocketAddr,
            bufs: &[IoSlice<'_>],
            options: SendOptions,
        ) -> io::Result<usize> {
            linux::send_msg(self.as_raw_fd(), addr, bufs, 0, options)
        }

        fn send_gso(
            &self,
            addr: SocketAddr,
            bufs: &[IoSlice<'_>],
            segment_size: usize,
            options: SendOptions,
        ) -> io::Result<usize> {
            linux::send_msg(self.as_raw_fd(), addr, bufs, segment_size, options)
        }

        fn send_mmsg(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
            linux::send_mmsg(self.as_raw_fd(), msgs, false)
        }

        fn send_mmsg_gso(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
            linux::send_mmsg(self.as_raw_fd(), msgs, true)
        }
    }

    #[cfg(feature = "tokio")]
    impl DatagramSocket for tokio::net::UdpSocket {
        fn send(
            &self,
            addr: SocketAddr,
            bufs: &[IoSlice<'_>],
            options: SendOptions,
        ) -> io::Result<usize> {
            self.try_io(tokio::io::Interest::WRITABLE, || {
                linux::send_msg(self.as_raw_fd(), addr, bufs, 0, options)
            })
        }

        fn send_gso(
            &self,
            addr: SocketAddr,
            bufs: &[IoSlice<'_>],
            segment_size: usize,
            options: SendOptions,
        ) -> io::Result<usize> {
            self.try_io(tokio::io::Interest::WRITABLE, || {
                linux::send_msg(self.as_raw_fd(), addr, bufs, segment_size, options)
            })
        }

        fn send_mmsg(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
            self.try_io(tokio::io::Interest::WRITABLE, || {
                linux::send_mmsg(self.as_raw_fd(), msgs, false)
            })
        }

        fn send_mmsg_gso(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
            self.try_io(tokio::io::Interest::WRITABLE, || {
                linux::send_mmsg(self.as_raw_fd(), msgs, true)
            })
        }
    }

    /// Whether the kernel lets this socket use `UDP_SEGMENT`.
    pub fn gso_supported(socket: &impl AsRawFd) -> bool {
        linux::gso_supported(socket.as_raw_fd())
    }
}

#[cfg(not(target_os = "linux"))]
mod platform_impls {
    use super::*;

    impl DatagramSocket for UdpSocket {
        fn send(
            &self,
            addr: SocketAddr,
            bufs: &[IoSlice<'_>],
            _options: SendOptions,
        ) -> io::Result<usize> {
            fallback::send(|buf| self.send_to(buf, addr), bufs)
        }

        fn send_gso(
            &self,
            addr: SocketAddr,
            bufs: &[IoSlice<'_>],
            segment_size: usize,
            _options: SendOptions,
        ) -> io::Result<usize> {
            fallback::send_segmented(|buf| self.send_to(buf, addr), bufs, segment_size)
        }

        fn send_mmsg(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
            fallback::send_each(|buf, addr| self.send_to(buf, addr), msgs, false)
        }

        fn send_mmsg_gso(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
            fallback::send_each(|buf, addr| self.send_to(buf, addr), msgs, true)
        }
    }

    #[cfg(feature = "tokio")]
    impl DatagramSocket for tokio::net::UdpSocket {
        fn send(
            &self,
            addr: SocketAddr,
            bufs: &[IoSlice<'_>],
            _options: SendOptions,
        ) -> io::Result<usize> {
            fallback::send(|buf| self.try_send_to(buf, addr), bufs)
        }

        fn send_gso(
            &self,
            addr: SocketAddr,
            bufs: &[IoSlice<'_>],
            segment_size: usize,
            _options: SendOptions,
        ) -> io::Result<usize> {
            fallback::send_segmented(|buf| self.try_send_to(buf, addr), bufs, segment_size)
        }

        fn send_mmsg(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
            fallback::send_each(|buf, addr| self.try_send_to(buf, addr), msgs, false)
        }

        fn send_mmsg_gso(&self, msgs: &[Datagram<'_>]) -> io::Result<usize> {
            fallback::send_each(|buf, addr| self.try_send_to(buf, addr), msgs, true)
        }
    }

    /// GSO is only wired up on Linux.
    pub fn gso_supported<S>(_socket: &S) -> bool {
        false
    }
}

pub use platform_impls::gso_supported;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback_pair() -> io::Result<(UdpSocket, UdpSocket)> {
        let receiver = UdpSocket::bind("127.0.0.1:0")?;
        receiver.set_read_timeout(Some(Duration::from_secs(2)))?;
        let sender = UdpSocket::bind("127.0.0.1:0")?;
        Ok((sender, receiver))
    }

    fn recv_lengths(receiver: &UdpSocket, count: usize) -> io::Result<Vec<usize>> {
        let mut buf = [0u8; 65536];
        (0..count)
            .map(|_| receiver.recv_from(&mut buf).map(|(len, _)| len))
            .collect()
    }

    #[test]
    fn send_gathers_slices() -> testresult::TestResult {
        let (sender, receiver) = loopback_pair()?;
        let peer = receiver.local_addr()?;
        let head = [1u8; 10];
        let tail = [2u8; 5];
        let sent = DatagramSocket::send(
            &sender,
            peer,
            &[IoSlice::new(&head), IoSlice::new(&tail)],
            SendOptions::with_ecn(EcnCodepoint::Ect0),
        )?;
        assert_eq!(sent, 15);
        assert_eq!(recv_lengths(&receiver, 1)?, vec![15]);
        Ok(())
    }

    #[test]
    fn send_mmsg_delivers_every_message() -> testresult::TestResult {
        let (sender, receiver) = loopback_pair()?;
        let peer = receiver.local_addr()?;
        let payloads = [vec![0u8; 10], vec![1u8; 5], vec![2u8; 20]];
        let slices: Vec<[IoSlice<'_>; 1]> =
            payloads.iter().map(|p| [IoSlice::new(p)]).collect();
        let msgs: Vec<Datagram<'_>> = slices
            .iter()
            .map(|bufs| Datagram {
                addr: peer,
                bufs,
                segment_size: 0,
                options: SendOptions::default(),
            })
            .collect();

        assert_eq!(DatagramSocket::send_mmsg(&sender, &msgs)?, 35);
        assert_eq!(recv_lengths(&receiver, 3)?, vec![10, 5, 20]);
        Ok(())
    }

    #[test]
    fn send_gso_splits_segments_when_available() -> testresult::TestResult {
        let (sender, receiver) = loopback_pair()?;
        if !gso_supported(&sender) {
            return Ok(());
        }
        let peer = receiver.local_addr()?;
        let payload = vec![7u8; 25];
        let sent = DatagramSocket::send_gso(
            &sender,
            peer,
            &[IoSlice::new(&payload)],
            10,
            SendOptions::default(),
        )?;
        assert_eq!(sent, 25);
        assert_eq!(recv_lengths(&receiver, 3)?, vec![10, 10, 5]);
        Ok(())
    }

    #[test]
    fn empty_mmsg_is_a_no_op() -> testresult::TestResult {
        let (sender, _receiver) = loopback_pair()?;
        assert_eq!(DatagramSocket::send_mmsg(&sender, &[])?, 0);
        Ok(())
    }

    #[cfg(feature = "tokio")]
    #[tokio::test]
    async fn tokio_socket_sends_without_waiting() -> testresult::TestResult {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
        let sender = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
        let peer = receiver.local_addr()?;
        sender.writable().await?;

        let payload = [3u8; 42];
        let sent =
            DatagramSocket::send(&sender, peer, &[IoSlice::new(&payload)], SendOptions::default())?;
        assert_eq!(sent, 42);

        let mut buf = [0u8; 128];
        let (len, from) = receiver.recv_from(&mut buf).await?;
        assert_eq!(len, 42);
        assert_eq!(from, sender.local_addr()?);
        Ok(())
    }
}
