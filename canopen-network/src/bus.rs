//! Bus transport abstraction.
//!
//! A [`Bus`] moves raw frames; a [`Listener`] is fed every received frame by
//! the [`Notifier`](crate::notifier::Notifier). Concrete transports live in
//! [`socketcan_bus`](crate::socketcan_bus) and [`virtual_bus`](crate::virtual_bus).

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use canopen_common::cob_id::MAX_STANDARD_ID;

use crate::error::BusError;
use crate::socketcan_bus::SocketCanBus;
use crate::virtual_bus::VirtualBus;

/// Maximum payload of a classic CAN frame.
pub const MAX_DATA_LENGTH: usize = 8;

/// A frame as surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Arbitration id; 11 bits unless `is_extended`.
    pub id: u32,
    pub data: Vec<u8>,
    pub is_extended: bool,
    pub is_error_frame: bool,
    pub is_remote_frame: bool,
}

impl Frame {
    /// Standard data frame.
    pub fn new(cob_id: u16, data: &[u8]) -> Self {
        Self {
            id: cob_id as u32,
            data: data.to_vec(),
            is_extended: false,
            is_error_frame: false,
            is_remote_frame: false,
        }
    }

    pub fn extended(id: u32, data: &[u8]) -> Self {
        Self {
            id,
            is_extended: true,
            ..Self::new(0, data)
        }
    }

    pub fn remote(cob_id: u16) -> Self {
        Self {
            is_remote_frame: true,
            ..Self::new(cob_id, &[])
        }
    }

    pub fn error(id: u32, data: &[u8]) -> Self {
        Self {
            id,
            is_error_frame: true,
            ..Self::new(0, data)
        }
    }

    /// True for standard data frames, the only kind routed to nodes.
    pub fn is_routable(&self) -> bool {
        !(self.is_extended || self.is_error_frame || self.is_remote_frame)
    }

    /// Standard 11-bit identifier, `None` for extended frames.
    pub fn cob_id(&self) -> Option<u16> {
        if self.is_extended {
            None
        } else {
            u16::try_from(self.id).ok()
        }
    }

    /// Check identifier range and payload length of a frame about to be sent.
    pub fn validate(&self) -> Result<(), BusError> {
        let id_ok = if self.is_extended {
            self.id <= 0x1FFF_FFFF
        } else {
            self.id <= MAX_STANDARD_ID as u32
        };
        if !id_ok || self.data.len() > MAX_DATA_LENGTH {
            return Err(BusError::InvalidFrame {
                cob_id: self.id,
                len: self.data.len(),
            });
        }
        Ok(())
    }
}

/// A physical or virtual CAN channel.
///
/// `send` and `recv` may be called concurrently from different threads; the
/// network calls `send` only from its transmit loop and `recv` only from its
/// notifier.
pub trait Bus: Send + Sync {
    /// Transmit one standard data frame.
    fn send(&self, cob_id: u16, data: &[u8]) -> Result<(), BusError>;

    /// Wait up to `timeout` for the next frame.
    fn recv(&self, timeout: Duration) -> Result<Option<Frame>, BusError>;

    /// Human-readable channel description.
    fn channel_info(&self) -> String;

    /// Release the channel. Called once when the network stops transmitting.
    fn shutdown(&self) {}
}

/// Receives every frame read from a bus.
pub trait Listener: Send + Sync {
    fn on_message_received(&self, frame: &Frame);

    /// Called once when the notifier driving this listener stops.
    fn stop(&self) {}
}

/// Which transport to open on `connect`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "bustype", rename_all = "lowercase")]
pub enum BusConfig {
    /// Linux SocketCAN interface, e.g. `can0` or `vcan0`.
    Socketcan { channel: String },
    /// In-process channel shared by every bus opened with the same name.
    Virtual {
        channel: String,
        #[serde(default)]
        receive_own_messages: bool,
    },
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::Socketcan {
            channel: "can0".to_string(),
        }
    }
}

/// Open the transport described by `config`.
pub fn open_bus(config: &BusConfig) -> Result<Arc<dyn Bus>, BusError> {
    match config {
        BusConfig::Socketcan { channel } => Ok(Arc::new(SocketCanBus::open(channel)?)),
        BusConfig::Virtual {
            channel,
            receive_own_messages,
        } => Ok(Arc::new(
            VirtualBus::open(channel).receive_own_messages(*receive_own_messages),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routable_frames() {
        assert!(Frame::new(0x705, &[0x05]).is_routable());
        assert!(!Frame::extended(0x18FF_0001, &[]).is_routable());
        assert!(!Frame::remote(0x705).is_routable());
        assert!(!Frame::error(0x004, &[0; 8]).is_routable());
    }

    #[test]
    fn test_validate() {
        assert!(Frame::new(0x7FF, &[0; 8]).validate().is_ok());
        assert!(Frame::new(0x800, &[]).validate().is_err());
        assert!(Frame::new(0x100, &[0; 9]).validate().is_err());
        assert_eq!(Frame::extended(0x1234_5678, &[]).cob_id(), None);
    }

    #[test]
    fn test_bus_config_from_toml() {
        let config: BusConfig = toml::from_str("bustype = \"virtual\"\nchannel = \"test\"\n").unwrap();
        assert_eq!(
            config,
            BusConfig::Virtual {
                channel: "test".to_string(),
                receive_own_messages: false
            }
        );

        let config: BusConfig =
            toml::from_str("bustype = \"socketcan\"\nchannel = \"vcan0\"\n").unwrap();
        assert_eq!(
            config,
            BusConfig::Socketcan {
                channel: "vcan0".to_string()
            }
        );
    }
}
