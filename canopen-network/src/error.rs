use std::io;

use thiserror::Error;

use canopen_common::{DictionaryError, SdoError};

/// Failures reported by a bus transport.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Socket error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid frame: COB-ID 0x{cob_id:03X} with {len} data bytes")]
    InvalidFrame { cob_id: u32, len: usize },

    #[error("Bus channel closed")]
    Closed,

    #[error("Unsupported interface: {0}")]
    UnsupportedInterface(String),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Dictionary(#[from] DictionaryError),

    #[error("SDO request failed: {0}")]
    Sdo(#[from] SdoError),

    #[error("Node {0} not found")]
    NodeNotFound(u8),

    #[error("Invalid node id {0}, expected 1-127")]
    InvalidNodeId(u8),

    #[error("Network is already connected")]
    AlreadyConnected,

    #[error("Network is not connected")]
    NotConnected,

    #[error("Node {0} is not attached to a network")]
    Detached(u8),

    #[error("Timed out waiting for heartbeat from node {0}")]
    HeartbeatTimeout(u8),

    #[error("Network has been dropped")]
    Closed,

    #[error("Failed to spawn worker thread: {0}")]
    Spawn(io::Error),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
