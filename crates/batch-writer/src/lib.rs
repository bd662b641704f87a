//! Outbound datagram batching for UDP transports.
//!
//! A protocol layer produces packets one at a time; the writers in this crate
//! accumulate them and hand them to the kernel with as few syscalls as the
//! platform allows: a plain send, a GSO send of equal-size segments, a
//! `sendmmsg` of independent datagrams, or a `sendmmsg` whose slots are GSO
//! runs themselves.
//!
//! The write loop drives every writer through the same contract:
//!
//! ```no_run
//! # use std::net::{SocketAddr, UdpSocket};
//! # use bytes::Bytes;
//! # use udp_batch::{config::BatchWriterConfig, factory::make_batch_writer, socket::SendOptions};
//! # fn run(packets: Vec<Bytes>, peer: SocketAddr) -> std::io::Result<()> {
//! let socket = UdpSocket::bind("0.0.0.0:0")?;
//! let gso = udp_batch::socket::gso_supported(&socket);
//! let mut writer = make_batch_writer(&BatchWriterConfig::default(), None, gso).unwrap();
//! for packet in packets {
//!     let len = packet.len();
//!     if writer.needs_flush(len) {
//!         writer.write(&socket, peer)?;
//!         writer.reset();
//!     }
//!     if writer.append(Some(packet), len, peer, SendOptions::default()) {
//!         writer.write(&socket, peer)?;
//!         writer.reset();
//!     }
//! }
//! if !writer.is_empty() {
//!     writer.write(&socket, peer)?;
//!     writer.reset();
//! }
//! # Ok(())
//! # }
//! ```

/// Batch bookkeeping shared by the writers.
pub mod batch;

/// Single-owner access to the contiguous send region.
pub mod buf_accessor;

/// Writer selection and transport settings.
pub mod config;

mod errors;
pub use errors::BatchWriterError;

/// Picks the concrete writer for a set of transport settings.
pub mod factory;

/// The kernel send capability consumed by the writers.
pub mod socket;

/// Tracing infrastructure for the binaries.
#[cfg(feature = "trace")]
pub mod tracing;

/// Batch writer strategies.
pub mod writer;

#[cfg(test)]
pub(crate) mod test_utils;

pub use buf_accessor::{BufAccessor, PacketBuf};
pub use config::{BatchWriterConfig, BatchingMode, DataPathType};
pub use factory::make_batch_writer;
pub use socket::{DatagramSocket, SendOptions};
pub use writer::{BatchWriter, BatchWriterPtr, WriterKind};
