use std::{
    net::{SocketAddr, UdpSocket},
    path::PathBuf,
    sync::Arc,
    time::Instant,
};

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Parser;
use udp_batch::{
    make_batch_writer, socket::gso_supported, BatchWriterConfig, BatchWriterPtr, BufAccessor,
    DataPathType, SendOptions,
};

/// Send generated datagrams through a batch writer and report the syscall savings.
#[derive(Parser, Debug)]
#[command(name = "batch-send", version)]
struct Args {
    /// Destination of the generated datagrams.
    #[arg(long, default_value = "127.0.0.1:4433")]
    target: SocketAddr,

    /// Number of datagrams to send.
    #[arg(long, default_value_t = 1000)]
    count: usize,

    /// Payload size of every datagram.
    #[arg(long, default_value_t = 1200)]
    size: usize,

    /// TOML file with writer settings; replaces the writer flags below.
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    batch: BatchWriterConfig,
}

#[derive(Default)]
struct Stats {
    bytes: usize,
    syscalls: usize,
}

fn flush(
    writer: &mut BatchWriterPtr,
    socket: &UdpSocket,
    peer: SocketAddr,
    stats: &mut Stats,
) -> anyhow::Result<()> {
    let sent = writer.write(socket, peer).context("batch write failed")?;
    if sent > 0 {
        stats.bytes += sent;
        stats.syscalls += 1;
    }
    writer.reset();
    Ok(())
}

/// Hand `payload` to the writer the way its kind expects: in-place writers
/// read it from the shared region, every other writer owns it.
fn stage(
    writer: &BatchWriterPtr,
    accessor: Option<&BufAccessor>,
    payload: Vec<u8>,
) -> Option<Bytes> {
    match accessor {
        Some(accessor) if writer.kind().is_inplace() => {
            accessor.scoped().extend_from_slice(&payload);
            None
        }
        _ => Some(Bytes::from(payload)),
    }
}

fn payload(seq: usize, size: usize) -> Vec<u8> {
    let mut payload = vec![(seq % 251) as u8; size];
    let tag = (seq as u64).to_be_bytes();
    let n = tag.len().min(size);
    payload[..n].copy_from_slice(&tag[..n]);
    payload
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    udp_batch::tracing::init_tracer(None)?;

    let config = match &args.config {
        Some(path) => BatchWriterConfig::from_file(path)?,
        None => args.batch.clone(),
    };
    if args.size == 0 || args.size > config.udp_send_packet_len {
        bail!(
            "datagram size must be between 1 and {} bytes",
            config.udp_send_packet_len
        );
    }

    let bind: SocketAddr = if args.target.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = UdpSocket::bind(bind).context("binding the sending socket")?;
    let gso = gso_supported(&socket);
    let accessor = match config.data_path_type {
        DataPathType::ContinuousMemory => {
            Some(Arc::new(BufAccessor::new(config.inplace_region_capacity())))
        }
        DataPathType::ChainedMemory => None,
    };
    let mut writer = make_batch_writer(&config, accessor.clone(), gso)?;
    tracing::info!(
        kind = ?writer.kind(),
        deferred = writer.is_deferred(),
        gso,
        target = %args.target,
        "sending {} datagrams of {} bytes",
        args.count,
        args.size
    );

    let started = Instant::now();
    let mut stats = Stats::default();
    for seq in 0..args.count {
        if writer.needs_flush(args.size) {
            flush(&mut writer, &socket, args.target, &mut stats)?;
        }
        let buf = stage(&writer, accessor.as_deref(), payload(seq, args.size));
        if writer.append(buf, args.size, args.target, SendOptions::default()) {
            flush(&mut writer, &socket, args.target, &mut stats)?;
        }
    }
    if !writer.is_empty() {
        if let Some(deadline) = writer.flush_deadline() {
            std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
        }
        flush(&mut writer, &socket, args.target, &mut stats)?;
    }

    let elapsed = started.elapsed();
    tracing::info!(
        bytes = stats.bytes,
        syscalls = stats.syscalls,
        datagrams_per_syscall = args.count as f64 / stats.syscalls.max(1) as f64,
        ?elapsed,
        "done"
    );
    Ok(())
}
