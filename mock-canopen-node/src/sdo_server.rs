//! SDO server answering expedited uploads and downloads

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use canopen_common::cob_id::{self, SDO_REQUEST, SDO_RESPONSE};
use canopen_common::sdo::{
    encode_abort, encode_download_response, encode_upload_response, parse_request,
    ABORT_INVALID_COMMAND, EXPEDITED_MAX_SIZE,
};
use canopen_common::{parse_payload, SdoRequest};
use canopen_network::Node;

use crate::object_dictionary::SimulatedDictionary;

pub struct SdoServer {
    node_id: u8,
    dictionary: Mutex<SimulatedDictionary>,
}

impl SdoServer {
    pub fn new(node_id: u8, dictionary: SimulatedDictionary) -> Self {
        Self {
            node_id,
            dictionary: Mutex::new(dictionary),
        }
    }

    /// Serve requests arriving for `node`.
    pub fn attach(self: &Arc<Self>, node: &Arc<Node>) {
        let server = Arc::clone(self);
        let weak = Arc::downgrade(node);
        let response_id = cob_id::cob_id(SDO_RESPONSE, self.node_id);
        node.register_service(SDO_REQUEST, move |_, data| {
            let (Some(node), Some(response)) = (weak.upgrade(), server.handle_request(data)) else {
                return;
            };
            if let Err(e) = node.send_message(response_id, &response) {
                warn!("Failed to queue SDO response: {}", e);
            }
        });
    }

    /// Response to one request frame, if it warrants one.
    pub fn handle_request(&self, data: &[u8]) -> Option<[u8; 8]> {
        let request = match parse_request(data) {
            Ok(request) => request,
            Err(e) => {
                debug!("Ignoring SDO request: {}", e);
                if data.len() < 4 {
                    return None;
                }
                let index = u16::from_le_bytes([data[1], data[2]]);
                return Some(encode_abort(index, data[3], ABORT_INVALID_COMMAND));
            }
        };

        match request {
            SdoRequest::Upload { index, subindex } => {
                info!("SDO upload request 0x{:04X}:{:02X}", index, subindex);
                Some(self.upload(index, subindex))
            }
            SdoRequest::Download {
                index,
                subindex,
                data,
            } => {
                info!(
                    "SDO download request 0x{:04X}:{:02X} {:02X?}",
                    index, subindex, data
                );
                let response = match self.dictionary.lock().write(index, subindex, &data) {
                    Ok(()) => encode_download_response(index, subindex),
                    Err(code) => encode_abort(index, subindex, code),
                };
                Some(response)
            }
            SdoRequest::Abort {
                index,
                subindex,
                code,
            } => {
                debug!(
                    "Client aborted 0x{:04X}:{:02X} with 0x{:08X}",
                    index, subindex, code
                );
                None
            }
        }
    }

    fn upload(&self, index: u16, subindex: u8) -> [u8; 8] {
        let (data, data_type) = match self.dictionary.lock().read(index, subindex) {
            Ok(entry) => entry,
            Err(code) => {
                warn!("Object not found: 0x{:04X}:{:02X}", index, subindex);
                return encode_abort(index, subindex, code);
            }
        };
        if data.len() > EXPEDITED_MAX_SIZE {
            return encode_abort(index, subindex, ABORT_INVALID_COMMAND);
        }
        match encode_upload_response(index, subindex, &data) {
            Ok(response) => {
                if let Ok(value) = parse_payload(&data, data_type) {
                    debug!("SDO response value={} (type={:?})", value, data_type);
                }
                response
            }
            Err(_) => encode_abort(index, subindex, ABORT_INVALID_COMMAND),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopen_common::sdo::{
        encode_download_request, encode_upload_request, parse_download_response,
        parse_upload_response, ABORT_OBJECT_DOES_NOT_EXIST, ABORT_READ_ONLY,
    };
    use canopen_common::{AccessType, DataType, ObjectDictionary, SdoError, SdoValue, Variable};
    use canopen_network::{BusConfig, Network, NetworkConfig};

    fn server() -> SdoServer {
        SdoServer::new(4, SimulatedDictionary::with_test_objects(4))
    }

    fn abort_code(response: &[u8; 8]) -> u32 {
        assert_eq!(response[0], 0x80);
        u32::from_le_bytes([response[4], response[5], response[6], response[7]])
    }

    #[test]
    fn test_upload() {
        let response = server()
            .handle_request(&encode_upload_request(0x1000, 0))
            .unwrap();
        assert_eq!(
            parse_upload_response(&response, 0x1000, 0).unwrap(),
            vec![0x91, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn test_upload_missing_object() {
        let response = server()
            .handle_request(&encode_upload_request(0x6000, 0))
            .unwrap();
        assert_eq!(abort_code(&response), ABORT_OBJECT_DOES_NOT_EXIST);
    }

    #[test]
    fn test_oversized_value_is_aborted() {
        let mut dictionary = SimulatedDictionary::new();
        dictionary.add_static(
            0x1008,
            0,
            SdoValue::String("MockCANopenNode".into()),
            AccessType::Const,
        );
        let server = SdoServer::new(4, dictionary);
        let response = server
            .handle_request(&encode_upload_request(0x1008, 0))
            .unwrap();
        assert_eq!(abort_code(&response), ABORT_INVALID_COMMAND);
    }

    #[test]
    fn test_download() {
        let server = server();
        let request = encode_download_request(0x2003, 2, &[0x07, 0x00]).unwrap();
        let response = server.handle_request(&request).unwrap();
        assert!(parse_download_response(&response, 0x2003, 2).is_ok());

        let response = server
            .handle_request(&encode_upload_request(0x2003, 2))
            .unwrap();
        assert_eq!(
            parse_upload_response(&response, 0x2003, 2).unwrap(),
            vec![0x07, 0x00]
        );
    }

    #[test]
    fn test_download_read_only() {
        let request = encode_download_request(0x1000, 0, &[0; 4]).unwrap();
        let response = server().handle_request(&request).unwrap();
        assert!(matches!(
            parse_download_response(&response, 0x1000, 0),
            Err(SdoError::AbortTransfer { code: ABORT_READ_ONLY, .. })
        ));
    }

    #[test]
    fn test_unsupported_command_and_abort() {
        let server = server();
        // initiate segmented download
        let response = server
            .handle_request(&[0x21, 0x00, 0x10, 0x00, 9, 0, 0, 0])
            .unwrap();
        assert_eq!(abort_code(&response), ABORT_INVALID_COMMAND);

        assert_eq!(server.handle_request(&encode_abort(0x1000, 0, 0x0504_0000)), None);
        assert_eq!(server.handle_request(&[0x40]), None);
    }

    #[tokio::test]
    async fn test_served_over_the_network() {
        let config = NetworkConfig {
            tx_poll_timeout_ms: 10,
            rx_poll_timeout_ms: 10,
            join_timeout_ms: 1000,
        };
        let bus = BusConfig::Virtual {
            channel: "mock-sdo-server".into(),
            receive_own_messages: false,
        };

        let device = Network::with_config(config.clone());
        let device_node = device.add_node(4u8, ObjectDictionary::new()).unwrap();
        Arc::new(server()).attach(&device_node);
        device.connect(&bus).unwrap();

        let master = Network::with_config(config);
        let mut dictionary = ObjectDictionary::new();
        dictionary.add(Variable::new(0x1000, 0, "Device type", DataType::UInt32));
        let node = master.add_node(4u8, dictionary).unwrap();
        master.connect(&bus).unwrap();

        assert_eq!(
            node.sdo().read(0x1000, 0).await.unwrap(),
            SdoValue::UInt32(0x191)
        );
        node.sdo().download(0x2003, 2, &[0x0F, 0x00]).await.unwrap();
        assert!(node.sdo().upload(0x6000, 0).await.is_err());

        master.disconnect().unwrap();
        device.disconnect().unwrap();
    }
}
