use std::sync::Arc;

use crate::{
    buf_accessor::BufAccessor,
    config::{BatchWriterConfig, BatchingMode, DataPathType},
    writer::{
        BatchWriterPtr, DeferredBatchWriter, GsoBatchWriter, GsoInplaceBatchWriter,
        SendmmsgBatchWriter, SendmmsgGsoBatchWriter, SinglePacketBatchWriter,
        SinglePacketInplaceBatchWriter,
    },
    BatchWriterError,
};

/// Pick the writer for `config`.
///
/// GSO modes fall back to their plain sibling when `gso_supported` is false.
/// Only the contiguous GSO and single-packet strategies read from `accessor`;
/// every other combination gets the chained writer of its mode.
pub fn make_batch_writer(
    config: &BatchWriterConfig,
    accessor: Option<Arc<BufAccessor>>,
    gso_supported: bool,
) -> Result<BatchWriterPtr, BatchWriterError> {
    config.validate()?;

    let mode = if config.batching_mode.uses_gso() && !gso_supported {
        let mode = config.batching_mode.without_gso();
        tracing::debug!(
            requested = ?config.batching_mode,
            selected = ?mode,
            "GSO unavailable, downgrading batching mode"
        );
        mode
    } else {
        config.batching_mode
    };

    let capacity = config.max_batch_size as usize;
    let contiguous = config.data_path_type == DataPathType::ContinuousMemory;
    let writer: BatchWriterPtr = match mode {
        BatchingMode::None if contiguous && capacity == 1 => Box::new(
            SinglePacketInplaceBatchWriter::new(region(accessor, config)?),
        ),
        BatchingMode::None => Box::new(SinglePacketBatchWriter::new()),
        BatchingMode::Gso if contiguous => Box::new(GsoInplaceBatchWriter::new(
            region(accessor, config)?,
            capacity,
            config.udp_send_packet_len,
        )),
        BatchingMode::Gso => Box::new(GsoBatchWriter::new(capacity)),
        BatchingMode::Sendmmsg => Box::new(SendmmsgBatchWriter::new(capacity)),
        BatchingMode::SendmmsgGso => Box::new(SendmmsgGsoBatchWriter::new(capacity)),
    };
    tracing::debug!(kind = ?writer.kind(), capacity, "batch writer selected");

    if config.use_thread_local {
        return Ok(Box::new(DeferredBatchWriter::new(
            writer,
            config.thread_local_delay(),
        )));
    }
    Ok(writer)
}

fn region(
    accessor: Option<Arc<BufAccessor>>,
    config: &BatchWriterConfig,
) -> Result<Arc<BufAccessor>, BatchWriterError> {
    let accessor = accessor.ok_or(BatchWriterError::MissingBufAccessor)?;
    if accessor.capacity() < config.udp_send_packet_len {
        return Err(BatchWriterError::BufAccessorTooSmall {
            capacity: accessor.capacity(),
            packet_len: config.udp_send_packet_len,
        });
    }
    Ok(accessor)
}
