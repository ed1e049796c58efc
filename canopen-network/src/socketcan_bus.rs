//! SocketCAN transport (Linux).

use std::io;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, Id, Socket, StandardId};
use tracing::debug;

use crate::bus::{Bus, Frame, MAX_DATA_LENGTH};
use crate::error::BusError;

pub struct SocketCanBus {
    // `None` once shut down
    socket: RwLock<Option<CanSocket>>,
    interface: String,
    // last timeout applied to the socket, to skip redundant setsockopt calls
    read_timeout: Mutex<Option<Duration>>,
}

impl SocketCanBus {
    /// Open `interface` (e.g. `can0`, `vcan0`).
    pub fn open(interface: &str) -> Result<Self, BusError> {
        let socket = CanSocket::open(interface)?;
        Ok(Self {
            socket: RwLock::new(Some(socket)),
            interface: interface.to_string(),
            read_timeout: Mutex::new(None),
        })
    }

    pub fn is_open(&self) -> bool {
        self.socket.read().is_some()
    }

    fn apply_read_timeout(&self, socket: &CanSocket, timeout: Duration) -> io::Result<()> {
        let mut current = self.read_timeout.lock();
        if *current != Some(timeout) {
            socket.set_read_timeout(timeout)?;
            *current = Some(timeout);
        }
        Ok(())
    }
}

impl Bus for SocketCanBus {
    fn send(&self, cob_id: u16, data: &[u8]) -> Result<(), BusError> {
        let invalid = || BusError::InvalidFrame {
            cob_id: cob_id as u32,
            len: data.len(),
        };
        if data.len() > MAX_DATA_LENGTH {
            return Err(invalid());
        }
        let id = StandardId::new(cob_id).ok_or_else(invalid)?;
        let frame = CanFrame::new(id, data).ok_or_else(invalid)?;
        let socket = self.socket.read();
        socket.as_ref().ok_or(BusError::Closed)?.write_frame(&frame)?;
        Ok(())
    }

    fn recv(&self, timeout: Duration) -> Result<Option<Frame>, BusError> {
        let socket = self.socket.read();
        let socket = socket.as_ref().ok_or(BusError::Closed)?;
        self.apply_read_timeout(socket, timeout)?;
        match socket.read_frame() {
            Ok(frame) => Ok(Some(Frame::from(&frame))),
            Err(err)
                if err.kind() == io::ErrorKind::WouldBlock
                    || err.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    fn channel_info(&self) -> String {
        format!("socketcan channel '{}'", self.interface)
    }

    /// Close the socket. Waits for an in-progress `recv` to time out.
    fn shutdown(&self) {
        if self.socket.write().take().is_some() {
            debug!("Released socketcan channel '{}'", self.interface);
        }
    }
}

impl From<&CanFrame> for Frame {
    fn from(frame: &CanFrame) -> Self {
        let (id, is_extended) = match frame.id() {
            Id::Standard(id) => (id.as_raw() as u32, false),
            Id::Extended(id) => (id.as_raw(), true),
        };
        Frame {
            id,
            data: frame.data().to_vec(),
            is_extended,
            is_error_frame: matches!(frame, CanFrame::Error(_)),
            is_remote_frame: matches!(frame, CanFrame::Remote(_)),
        }
    }
}
