//! Error types for collection, emission and checkpointing.

use deadlock_adapters::SourceError;
use thiserror::Error;

/// A sink could not take a payload.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Writing to a file or socket failed.
    #[error("Write error: {0}")]
    Io(#[from] std::io::Error),

    /// The payload could not be encoded.
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The receiving end of a channel output is gone.
    #[error("Channel closed")]
    ChannelClosed,

    /// The channel output is full.
    #[error("Channel full")]
    ChannelFull,
}

/// The high-water mark could not be loaded or saved.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint file is corrupt: {0}")]
    Corrupt(String),
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        CheckpointError::Corrupt(err.to_string())
    }
}

/// Why a collection cycle failed.
///
/// Per-event parse failures are not here; they become error rows and the
/// cycle carries on.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}
