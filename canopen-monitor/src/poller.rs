//! Background tasks: periodic SDO reads and NMT state tracking.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use canopen_common::ObjectDictionary;
use canopen_network::Node;

use crate::config::PollConfig;
use crate::logging::{LogEvent, TrafficLogger};

/// Read `poll.index:poll.subindex` from `node` every `poll.interval_ms`.
pub fn spawn_poll(
    node: Arc<Node>,
    poll: PollConfig,
    logger: Option<Arc<TrafficLogger>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(poll.interval_ms.max(1)));
        // a slow node must not cause a burst of catch-up reads
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let event = match node.sdo().read(poll.index, poll.subindex).await {
                Ok(value) => {
                    info!(
                        "Node {} {:04X}:{:02X} = {}",
                        node.id(),
                        poll.index,
                        poll.subindex,
                        value
                    );
                    LogEvent::SdoData {
                        node: node.id(),
                        index: poll.index,
                        subindex: poll.subindex,
                        value,
                    }
                }
                Err(e) => {
                    warn!(
                        "Node {} {:04X}:{:02X} read failed: {}",
                        node.id(),
                        poll.index,
                        poll.subindex,
                        e
                    );
                    LogEvent::SdoError {
                        node: node.id(),
                        index: poll.index,
                        subindex: poll.subindex,
                        error: e.to_string(),
                    }
                }
            };
            if let Some(logger) = &logger {
                logger.log(&event);
            }
        }
    })
}

/// Report every NMT state change of `node`.
pub fn spawn_state_watch(node: Arc<Node>, logger: Option<Arc<TrafficLogger>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut states = node.nmt().subscribe();
        while states.changed().await.is_ok() {
            let Some(state) = *states.borrow_and_update() else {
                continue;
            };
            info!("Node {} is {}", node.id(), state);
            if let Some(logger) = &logger {
                logger.log(&LogEvent::NodeState {
                    node: node.id(),
                    state,
                });
            }
        }
    })
}

/// Readable entries of `dictionary`, one line each.
pub fn describe_readable(dictionary: &ObjectDictionary) -> Vec<String> {
    dictionary
        .readable()
        .map(|variable| {
            format!(
                "{:04X}:{:02X}  {:<40} {:?}",
                variable.index, variable.subindex, variable.name, variable.data_type
            )
        })
        .collect()
}
