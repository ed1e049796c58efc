//! Cyclic TPDO1 and heartbeat producers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use canopen_common::cob_id::{self, HEARTBEAT, TPDO1};
use canopen_common::NmtState;
use canopen_network::Node;

use crate::nmt_slave::NmtSlave;

/// Sensor values mapped into TPDO1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorState {
    /// Hundredths of a degree Celsius
    pub temperature: u16,
    /// hPa
    pub pressure: u16,
    pub status: u8,
}

impl Default for SensorState {
    fn default() -> Self {
        Self {
            temperature: 2350,
            pressure: 1013,
            status: 1,
        }
    }
}

impl SensorState {
    /// Move to the next simulated sample.
    pub fn advance(&mut self) {
        self.temperature = (self.temperature + 1) % 3000;
        self.pressure = 1000 + (self.pressure - 1000 + 1) % 50;
        self.status = if self.status == 1 { 2 } else { 1 };
    }

    /// Mapping: temperature (16 bit), pressure (16 bit), status (8 bit), little-endian.
    pub fn encode(&self) -> [u8; 5] {
        let [t0, t1] = self.temperature.to_le_bytes();
        let [p0, p1] = self.pressure.to_le_bytes();
        [t0, t1, p0, p1, self.status]
    }
}

/// Send TPDO1 every `period` while the slave is operational, or always when
/// `require_operational` is false.
pub fn spawn_tpdo(
    node: Arc<Node>,
    slave: Arc<NmtSlave>,
    period: Duration,
    require_operational: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let tpdo_id = cob_id::cob_id(TPDO1, node.id());
        let mut sensors = SensorState::default();
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if require_operational && slave.state() != NmtState::Operational {
                continue;
            }
            sensors.advance();
            if let Err(e) = node.send_message(tpdo_id, &sensors.encode()) {
                warn!("Failed to queue TPDO: {}", e);
                continue;
            }
            debug!(
                "TPDO1: Temp={:.2}°C, Press={}hPa, Status={}",
                sensors.temperature as f32 / 100.0,
                sensors.pressure,
                sensors.status
            );
        }
    })
}

/// Send the slave's heartbeat every `period`.
pub fn spawn_heartbeat(node: Arc<Node>, slave: Arc<NmtSlave>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let heartbeat_id = cob_id::cob_id(HEARTBEAT, node.id());
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            if let Err(e) = node.send_message(heartbeat_id, &slave.heartbeat()) {
                warn!("Failed to queue heartbeat: {}", e);
            }
        }
    })
}
