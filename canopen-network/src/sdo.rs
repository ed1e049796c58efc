//! SDO client engine.
//!
//! One transfer per node is in flight at a time; concurrent callers queue on
//! an async mutex in arrival order. Only expedited transfers are supported.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, Mutex as TransferLock};
use tracing::{debug, warn};

use canopen_common::cob_id::{self, SDO_REQUEST};
use canopen_common::sdo::{
    encode_abort, encode_download_request, encode_upload_request, parse_download_response,
    parse_upload_response, ABORT_TIMED_OUT,
};
use canopen_common::{parse_payload, DataType, ObjectDictionary, SdoError, SdoValue};

use crate::error::Result;
use crate::node::NetworkLink;

pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Transfer waiting for the response to `index:subindex`.
struct Pending {
    index: u16,
    subindex: u8,
    waiter: oneshot::Sender<Vec<u8>>,
}

impl Pending {
    fn matches(&self, data: &[u8]) -> bool {
        data.len() >= 4
            && u16::from_le_bytes([data[1], data[2]]) == self.index
            && data[3] == self.subindex
    }
}

pub struct SdoClient {
    node_id: u8,
    dictionary: Arc<ObjectDictionary>,
    link: NetworkLink,
    pending: Mutex<Option<Pending>>,
    transfer: TransferLock<()>,
    response_timeout: Mutex<Duration>,
}

impl SdoClient {
    pub(crate) fn new(node_id: u8, dictionary: Arc<ObjectDictionary>, link: NetworkLink) -> Self {
        Self {
            node_id,
            dictionary,
            link,
            pending: Mutex::new(None),
            transfer: TransferLock::new(()),
            response_timeout: Mutex::new(DEFAULT_RESPONSE_TIMEOUT),
        }
    }

    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    pub fn response_timeout(&self) -> Duration {
        *self.response_timeout.lock()
    }

    pub fn set_response_timeout(&self, timeout: Duration) {
        *self.response_timeout.lock() = timeout;
    }

    /// Handler for frames on this node's SDO response COB-ID.
    ///
    /// A frame only completes the waiting transfer when its multiplexer names
    /// the requested object; late answers to earlier transfers are dropped.
    pub fn on_response(&self, cob_id: u16, data: &[u8]) {
        let completed = {
            let mut slot = self.pending.lock();
            if slot.as_ref().is_some_and(|pending| pending.matches(data)) {
                slot.take()
            } else {
                None
            }
        };
        match completed {
            Some(pending) => {
                // the requester may have timed out in the meantime
                let _ = pending.waiter.send(data.to_vec());
            }
            None => debug!(
                "Unsolicited SDO response 0x{:03X} from node {}: {:02X?}",
                cob_id, self.node_id, data
            ),
        }
    }

    /// Read the raw bytes of `index:subindex`.
    pub async fn upload(&self, index: u16, subindex: u8) -> Result<Vec<u8>> {
        let _transfer = self.transfer.lock().await;
        let response = self
            .exchange(index, subindex, &encode_upload_request(index, subindex))
            .await?;
        Ok(parse_upload_response(&response, index, subindex)?)
    }

    /// Write up to four bytes to `index:subindex`.
    pub async fn download(&self, index: u16, subindex: u8, data: &[u8]) -> Result<()> {
        let request = encode_download_request(index, subindex, data)?;
        let _transfer = self.transfer.lock().await;
        let response = self.exchange(index, subindex, &request).await?;
        Ok(parse_download_response(&response, index, subindex)?)
    }

    /// Upload and decode using the entry's type from the object dictionary.
    /// Entries missing from the dictionary come back as raw bytes.
    pub async fn read(&self, index: u16, subindex: u8) -> Result<SdoValue> {
        let data_type = self
            .dictionary
            .get(index, subindex)
            .map(|variable| variable.data_type)
            .unwrap_or(DataType::Domain);
        let payload = self.upload(index, subindex).await?;
        Ok(parse_payload(&payload, data_type)?)
    }

    /// [`read`](Self::read) by dictionary name, e.g. `"Device type"`.
    pub async fn read_by_name(&self, name: &str) -> Result<SdoValue> {
        let (index, subindex) = self
            .dictionary
            .get_by_name(name)
            .map(|variable| (variable.index, variable.subindex))
            .ok_or_else(|| SdoError::InvalidRequest(format!("Unknown object '{}'", name)))?;
        self.read(index, subindex).await
    }

    pub async fn write(&self, index: u16, subindex: u8, value: &SdoValue) -> Result<()> {
        self.download(index, subindex, &value.to_le_bytes()).await
    }

    async fn exchange(&self, index: u16, subindex: u8, request: &[u8; 8]) -> Result<Vec<u8>> {
        let (waiter, rx) = oneshot::channel();
        *self.pending.lock() = Some(Pending {
            index,
            subindex,
            waiter,
        });

        let request_id = cob_id::cob_id(SDO_REQUEST, self.node_id);
        if let Err(e) = self.link.send_message(request_id, request) {
            self.pending.lock().take();
            return Err(e);
        }

        let timeout = self.response_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(SdoError::InvalidResponse("Response channel closed".into()).into()),
            Err(_) => {
                self.pending.lock().take();
                warn!(
                    "SDO timeout on node {} for 0x{:04X}:{:02X} after {:?}",
                    self.node_id, index, subindex, timeout
                );
                let abort = encode_abort(index, subindex, ABORT_TIMED_OUT);
                let _ = self.link.send_message(request_id, &abort);
                Err(SdoError::Timeout.into())
            }
        }
    }
}
