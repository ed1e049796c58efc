//! NMT state and command encodings.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bit toggled by nodes using node guarding; masked out of heartbeat bytes.
pub const TOGGLE_BIT: u8 = 0x80;

/// NMT state as reported in heartbeat/boot-up frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NmtState {
    Initialising,
    Stopped,
    Operational,
    PreOperational,
    Unknown(u8),
}

impl NmtState {
    /// Decode the first byte of a heartbeat payload.
    pub fn from_heartbeat(byte: u8) -> Self {
        match byte & !TOGGLE_BIT {
            0x00 => Self::Initialising,
            0x04 => Self::Stopped,
            0x05 => Self::Operational,
            0x7F => Self::PreOperational,
            other => Self::Unknown(other),
        }
    }

    /// Byte a node puts in its heartbeat for this state.
    pub fn heartbeat_byte(&self) -> u8 {
        match self {
            Self::Initialising => 0x00,
            Self::Stopped => 0x04,
            Self::Operational => 0x05,
            Self::PreOperational => 0x7F,
            Self::Unknown(byte) => *byte,
        }
    }
}

impl fmt::Display for NmtState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initialising => write!(f, "INITIALISING"),
            Self::Stopped => write!(f, "STOPPED"),
            Self::Operational => write!(f, "OPERATIONAL"),
            Self::PreOperational => write!(f, "PRE-OPERATIONAL"),
            Self::Unknown(byte) => write!(f, "UNKNOWN(0x{:02X})", byte),
        }
    }
}

/// NMT master commands, sent on COB-ID 0 as `[command, node]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum NmtCommand {
    Start = 0x01,
    Stop = 0x02,
    EnterPreOperational = 0x80,
    ResetNode = 0x81,
    ResetCommunication = 0x82,
}

impl NmtCommand {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Self::Start),
            0x02 => Some(Self::Stop),
            0x80 => Some(Self::EnterPreOperational),
            0x81 => Some(Self::ResetNode),
            0x82 => Some(Self::ResetCommunication),
            _ => None,
        }
    }

    /// State a node enters after executing the command.
    pub fn target_state(&self) -> NmtState {
        match self {
            Self::Start => NmtState::Operational,
            Self::Stop => NmtState::Stopped,
            Self::EnterPreOperational => NmtState::PreOperational,
            Self::ResetNode | Self::ResetCommunication => NmtState::Initialising,
        }
    }

    /// Payload of the NMT frame addressing `node_id` (0 = all nodes).
    pub fn encode(&self, node_id: u8) -> [u8; 2] {
        [*self as u8, node_id]
    }
}
