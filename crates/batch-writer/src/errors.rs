use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchWriterError {
    #[error("batch capacity must be at least one datagram")]
    ZeroBatchCapacity,
    #[error("udp send packet length must be non-zero")]
    ZeroPacketLength,
    #[error("the contiguous data path needs a buffer accessor")]
    MissingBufAccessor,
    #[error("buffer accessor holds {capacity} bytes, less than one {packet_len} byte packet")]
    BufAccessorTooSmall { capacity: usize, packet_len: usize },
    #[error("failed reading config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    ConfigParse(#[from] toml::de::Error),
}
