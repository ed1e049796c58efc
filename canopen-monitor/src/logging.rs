use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;
use csv::Writer;
use parking_lot::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use canopen_common::cob_id::{
    self, EMCY, HEARTBEAT, NMT, RPDO1, RPDO2, RPDO3, RPDO4, SDO_REQUEST, SDO_RESPONSE, SYNC,
    TIME, TPDO1, TPDO2, TPDO3, TPDO4,
};
use canopen_common::{NmtState, SdoValue};
use canopen_network::{Frame, Listener};

/// Install the console subscriber. `RUST_LOG` overrides `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();
}

#[derive(Debug, Clone)]
pub enum LogEvent {
    Frame(Frame),
    SdoData {
        node: u8,
        index: u16,
        subindex: u8,
        value: SdoValue,
    },
    SdoError {
        node: u8,
        index: u16,
        subindex: u8,
        error: String,
    },
    NodeState {
        node: u8,
        state: NmtState,
    },
    Connection(String),
}

/// Service name of a frame, as written in the event type column.
pub fn frame_kind(frame: &Frame) -> String {
    if frame.is_error_frame {
        return "ERROR_FRAME".into();
    }
    if frame.is_extended {
        return "EXTENDED".into();
    }
    let Some(cob_id) = frame.cob_id() else {
        return "UNKNOWN".into();
    };
    let node = cob_id::node_id(cob_id);
    let kind = match cob_id::function_code(cob_id) {
        NMT => "NMT".to_string(),
        SYNC if node == 0 => "SYNC".to_string(),
        EMCY => "EMCY".to_string(),
        TIME => "TIME".to_string(),
        TPDO1 => "TPDO1".to_string(),
        TPDO2 => "TPDO2".to_string(),
        TPDO3 => "TPDO3".to_string(),
        TPDO4 => "TPDO4".to_string(),
        RPDO1 => "RPDO1".to_string(),
        RPDO2 => "RPDO2".to_string(),
        RPDO3 => "RPDO3".to_string(),
        RPDO4 => "RPDO4".to_string(),
        SDO_RESPONSE => "SDO_TX".to_string(),
        SDO_REQUEST => "SDO_RX".to_string(),
        HEARTBEAT => "HEARTBEAT".to_string(),
        other => format!("FC_{:03X}", other),
    };
    if frame.is_remote_frame {
        format!("{}_RTR", kind)
    } else {
        kind
    }
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// CSV event log; also a bus listener recording every frame.
pub struct TrafficLogger {
    writer: Mutex<Writer<File>>,
    path: PathBuf,
}

impl TrafficLogger {
    /// Create a new timestamped log file in `directory`.
    pub fn create(directory: &Path) -> Result<Self> {
        fs::create_dir_all(directory)?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let path = directory.join(format!("canopen_log_{}.csv", timestamp));

        let mut writer = Writer::from_writer(File::create(&path)?);
        writer.write_record(["Timestamp", "Event Type", "COB-ID", "Node", "Data"])?;
        writer.flush()?;

        info!("Logging enabled: {}", path.display());
        Ok(Self {
            writer: Mutex::new(writer),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, event: &LogEvent) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let (event_type, cob_id, node, data) = match event {
            LogEvent::Frame(frame) => (
                frame_kind(frame),
                format!("0x{:03X}", frame.id),
                frame
                    .cob_id()
                    .map(|id| cob_id::node_id(id).to_string())
                    .unwrap_or_default(),
                hex(&frame.data),
            ),
            LogEvent::SdoData {
                node,
                index,
                subindex,
                value,
            } => (
                "SDO_DATA".to_string(),
                String::new(),
                node.to_string(),
                format!("{:04X}:{:02X}={}", index, subindex, value),
            ),
            LogEvent::SdoError {
                node,
                index,
                subindex,
                error,
            } => (
                "SDO_ERROR".to_string(),
                String::new(),
                node.to_string(),
                format!("{:04X}:{:02X} {}", index, subindex, error),
            ),
            LogEvent::NodeState { node, state } => (
                "NODE_STATE".to_string(),
                String::new(),
                node.to_string(),
                state.to_string(),
            ),
            LogEvent::Connection(message) => (
                "CONNECTION".to_string(),
                String::new(),
                String::new(),
                message.clone(),
            ),
        };

        let mut writer = self.writer.lock();
        if let Err(e) = writer.write_record([&timestamp, &event_type, &cob_id, &node, &data]) {
            warn!("Failed to write log entry: {}", e);
        }
        if let Err(e) = writer.flush() {
            warn!("Failed to flush log file: {}", e);
        }
    }
}

impl Listener for TrafficLogger {
    fn on_message_received(&self, frame: &Frame) {
        self.log(&LogEvent::Frame(frame.clone()));
    }

    fn stop(&self) {
        if let Err(e) = self.writer.lock().flush() {
            warn!("Failed to flush log file: {}", e);
        }
    }
}
