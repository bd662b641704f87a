use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::BatchWriterError;

/// Default size of a single outgoing UDP payload.
pub const DEFAULT_UDP_SEND_PACKET_LEN: usize = 1252;

/// Default number of datagrams a writer may hold before it must flush.
pub const DEFAULT_MAX_BATCH_SIZE: u32 = 16;

/// Default coalescing window of the thread-local deferred writer.
pub const DEFAULT_THREAD_LOCAL_DELAY: Duration = Duration::from_micros(1000);

/// How far past `udp_send_packet_len` the unflushed tail of the in-place
/// region may grow before it is reported as a size violation.
pub const PACKET_SIZE_VIOLATION_TOLERANCE: usize = 10;

/// Syscall strategy used to flush a batch.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BatchingMode {
    /// One datagram per send.
    #[default]
    None,
    /// Equal-size datagrams coalesced with generic segmentation offload.
    Gso,
    /// Independent datagrams submitted with one `sendmmsg`.
    Sendmmsg,
    /// `sendmmsg` where every message is a GSO run.
    SendmmsgGso,
}

impl BatchingMode {
    pub fn uses_gso(self) -> bool {
        matches!(self, BatchingMode::Gso | BatchingMode::SendmmsgGso)
    }

    /// The closest mode that does not need kernel GSO support.
    pub fn without_gso(self) -> Self {
        match self {
            BatchingMode::Gso => BatchingMode::None,
            BatchingMode::SendmmsgGso => BatchingMode::Sendmmsg,
            other => other,
        }
    }
}

/// Where packet bytes live while they wait for a flush.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataPathType {
    /// Every datagram is its own buffer.
    #[default]
    ChainedMemory,
    /// Datagrams are written in place into one shared region.
    ContinuousMemory,
}

/// Transport settings read by the writer factory.
#[derive(clap::Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchWriterConfig {
    /// Syscall strategy used to flush outgoing datagrams.
    #[arg(long, value_enum, default_value_t = BatchingMode::None, env = "BATCHING_MODE")]
    pub batching_mode: BatchingMode,

    /// Maximum number of datagrams per flush.
    #[arg(long, default_value_t = DEFAULT_MAX_BATCH_SIZE, env = "MAX_BATCH_SIZE")]
    pub max_batch_size: u32,

    /// Buffer layout of pending datagrams.
    #[arg(long, value_enum, default_value_t = DataPathType::ChainedMemory, env = "DATA_PATH_TYPE")]
    pub data_path_type: DataPathType,

    /// Largest payload of a single datagram.
    #[arg(long, default_value_t = DEFAULT_UDP_SEND_PACKET_LEN, env = "UDP_SEND_PACKET_LEN")]
    pub udp_send_packet_len: usize,

    /// Defer flushes so callers sharing a thread can coalesce into one batch.
    #[arg(long, env = "USE_THREAD_LOCAL")]
    pub use_thread_local: bool,

    /// Coalescing window of the deferred writer, in microseconds.
    #[arg(long, default_value_t = DEFAULT_THREAD_LOCAL_DELAY.as_micros() as u64, env = "THREAD_LOCAL_DELAY_US")]
    pub thread_local_delay_us: u64,
}

impl Default for BatchWriterConfig {
    fn default() -> Self {
        Self {
            batching_mode: BatchingMode::None,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            data_path_type: DataPathType::ChainedMemory,
            udp_send_packet_len: DEFAULT_UDP_SEND_PACKET_LEN,
            use_thread_local: false,
            thread_local_delay_us: DEFAULT_THREAD_LOCAL_DELAY.as_micros() as u64,
        }
    }
}

impl BatchWriterConfig {
    /// Load settings from a TOML file; missing keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BatchWriterError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| BatchWriterError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, BatchWriterError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BatchWriterError> {
        if self.max_batch_size == 0 {
            return Err(BatchWriterError::ZeroBatchCapacity);
        }
        if self.udp_send_packet_len == 0 {
            return Err(BatchWriterError::ZeroPacketLength);
        }
        Ok(())
    }

    pub fn thread_local_delay(&self) -> Duration {
        Duration::from_micros(self.thread_local_delay_us)
    }

    /// Bytes the in-place region needs to hold a full batch.
    pub fn inplace_region_capacity(&self) -> usize {
        self.udp_send_packet_len * self.max_batch_size as usize
    }
}
