//! SDO (Service Data Object) frame codec.
//!
//! Only expedited transfers are encoded here: every request and response fits
//! in a single 8-byte CAN payload laid out as
//! `[command, index_lo, index_hi, subindex, data0..data3]`.

use std::fmt;

use thiserror::Error;

use crate::objectdictionary::DataType;

/// SDO command specifiers.
pub mod command {
    /// Client: initiate upload (read).
    pub const INITIATE_UPLOAD_REQUEST: u8 = 0x40;
    /// Client: initiate download (write), without size/expedited bits.
    pub const INITIATE_DOWNLOAD_REQUEST: u8 = 0x20;
    /// Server: initiate upload response, without size/expedited bits.
    pub const INITIATE_UPLOAD_RESPONSE: u8 = 0x40;
    /// Server: initiate download response.
    pub const INITIATE_DOWNLOAD_RESPONSE: u8 = 0x60;
    /// Either side: abort transfer.
    pub const ABORT_TRANSFER: u8 = 0x80;

    /// Mask of the command specifier bits.
    pub const SPECIFIER_MASK: u8 = 0xE0;
    pub const EXPEDITED: u8 = 0x02;
    pub const SIZE_INDICATED: u8 = 0x01;
}

/// Abort code used when an object is missing from the dictionary.
pub const ABORT_OBJECT_DOES_NOT_EXIST: u32 = 0x0602_0000;
/// Abort code for a command the server does not understand.
pub const ABORT_INVALID_COMMAND: u32 = 0x0504_0001;
/// Abort code for writes to read-only objects.
pub const ABORT_READ_ONLY: u32 = 0x0601_0002;
/// Abort code for reads of write-only objects.
pub const ABORT_WRITE_ONLY: u32 = 0x0601_0001;
/// Abort code sent by a client that gave up waiting for a response.
pub const ABORT_TIMED_OUT: u32 = 0x0504_0000;

/// Abort code for a length mismatch on download.
pub const ABORT_LENGTH_MISMATCH: u32 = 0x0607_0010;

/// Largest payload an expedited transfer carries.
pub const EXPEDITED_MAX_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum SdoError {
    #[error("SDO request timeout")]
    Timeout,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("SDO abort 0x{code:08X}: {info}")]
    AbortTransfer { code: u32, info: String },

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl SdoError {
    pub fn abort(code: u32) -> Self {
        Self::AbortTransfer {
            code,
            info: abort_code_description(code).to_string(),
        }
    }
}

/// Decoded value of an object dictionary entry.
#[derive(Debug, Clone, PartialEq)]
pub enum SdoValue {
    Boolean(bool),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Real32(f32),
    Real64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl SdoValue {
    /// Little-endian wire representation.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            Self::Boolean(v) => vec![*v as u8],
            Self::UInt8(v) => vec![*v],
            Self::UInt16(v) => v.to_le_bytes().to_vec(),
            Self::UInt32(v) => v.to_le_bytes().to_vec(),
            Self::UInt64(v) => v.to_le_bytes().to_vec(),
            Self::Int8(v) => v.to_le_bytes().to_vec(),
            Self::Int16(v) => v.to_le_bytes().to_vec(),
            Self::Int32(v) => v.to_le_bytes().to_vec(),
            Self::Int64(v) => v.to_le_bytes().to_vec(),
            Self::Real32(v) => v.to_le_bytes().to_vec(),
            Self::Real64(v) => v.to_le_bytes().to_vec(),
            Self::String(v) => v.as_bytes().to_vec(),
            Self::Bytes(v) => v.clone(),
        }
    }
}

impl fmt::Display for SdoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(v) => write!(f, "{}", v),
            Self::UInt8(v) => write!(f, "{}", v),
            Self::UInt16(v) => write!(f, "{}", v),
            Self::UInt32(v) => write!(f, "{}", v),
            Self::UInt64(v) => write!(f, "{}", v),
            Self::Int8(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Real32(v) => write!(f, "{}", v),
            Self::Real64(v) => write!(f, "{}", v),
            Self::String(v) => write!(f, "{}", v),
            Self::Bytes(v) => write!(f, "{:02X?}", v),
        }
    }
}

/// A request as seen by an SDO server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdoRequest {
    Upload { index: u16, subindex: u8 },
    Download { index: u16, subindex: u8, data: Vec<u8> },
    Abort { index: u16, subindex: u8, code: u32 },
}

fn header(command: u8, index: u16, subindex: u8) -> [u8; 8] {
    let index = index.to_le_bytes();
    [command, index[0], index[1], subindex, 0, 0, 0, 0]
}

fn multiplexer(data: &[u8]) -> (u16, u8) {
    (u16::from_le_bytes([data[1], data[2]]), data[3])
}

fn expedited(command: u8, index: u16, subindex: u8, data: &[u8]) -> Result<[u8; 8], SdoError> {
    if data.is_empty() || data.len() > EXPEDITED_MAX_SIZE {
        return Err(SdoError::InvalidRequest(format!(
            "expedited transfer carries 1-{} bytes, got {}",
            EXPEDITED_MAX_SIZE,
            data.len()
        )));
    }
    let n = (EXPEDITED_MAX_SIZE - data.len()) as u8;
    let mut frame = header(
        command | (n << 2) | command::EXPEDITED | command::SIZE_INDICATED,
        index,
        subindex,
    );
    frame[4..4 + data.len()].copy_from_slice(data);
    Ok(frame)
}

/// Client request reading `index:subindex`.
pub fn encode_upload_request(index: u16, subindex: u8) -> [u8; 8] {
    header(command::INITIATE_UPLOAD_REQUEST, index, subindex)
}

/// Client request writing up to four bytes to `index:subindex`.
pub fn encode_download_request(index: u16, subindex: u8, data: &[u8]) -> Result<[u8; 8], SdoError> {
    expedited(command::INITIATE_DOWNLOAD_REQUEST, index, subindex, data)
}

/// Server reply carrying the value of `index:subindex`.
pub fn encode_upload_response(index: u16, subindex: u8, data: &[u8]) -> Result<[u8; 8], SdoError> {
    expedited(command::INITIATE_UPLOAD_RESPONSE, index, subindex, data)
}

/// Server confirmation of a download.
pub fn encode_download_response(index: u16, subindex: u8) -> [u8; 8] {
    header(command::INITIATE_DOWNLOAD_RESPONSE, index, subindex)
}

pub fn encode_abort(index: u16, subindex: u8, code: u32) -> [u8; 8] {
    let mut frame = header(command::ABORT_TRANSFER, index, subindex);
    frame[4..8].copy_from_slice(&code.to_le_bytes());
    frame
}

fn check_response(data: &[u8], index: u16, subindex: u8) -> Result<u8, SdoError> {
    if data.len() < 8 {
        return Err(SdoError::InvalidResponse(format!(
            "Frame too short ({} bytes)",
            data.len()
        )));
    }

    let command = data[0];
    let (got_index, got_subindex) = multiplexer(data);
    if got_index != index || got_subindex != subindex {
        return Err(SdoError::InvalidResponse(format!(
            "Response mismatch: expected 0x{:04X}:{:02X}, got 0x{:04X}:{:02X}",
            index, subindex, got_index, got_subindex
        )));
    }

    if command == command::ABORT_TRANSFER {
        let code = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        return Err(SdoError::abort(code));
    }

    Ok(command)
}

/// Extract the value bytes from an expedited upload response.
pub fn parse_upload_response(data: &[u8], index: u16, subindex: u8) -> Result<Vec<u8>, SdoError> {
    let command = check_response(data, index, subindex)?;

    if command & command::SPECIFIER_MASK != command::INITIATE_UPLOAD_RESPONSE {
        return Err(SdoError::InvalidResponse(format!(
            "Unexpected command 0x{:02X} for upload",
            command
        )));
    }
    if command & command::EXPEDITED == 0 {
        return Err(SdoError::InvalidResponse(format!(
            "Segmented SDO transfer not supported (command=0x{:02X})",
            command
        )));
    }

    let size = if command & command::SIZE_INDICATED != 0 {
        EXPEDITED_MAX_SIZE - ((command >> 2) & 0x03) as usize
    } else {
        EXPEDITED_MAX_SIZE
    };
    Ok(data[4..4 + size].to_vec())
}

/// Check a download confirmation.
pub fn parse_download_response(data: &[u8], index: u16, subindex: u8) -> Result<(), SdoError> {
    let command = check_response(data, index, subindex)?;
    if command & command::SPECIFIER_MASK != command::INITIATE_DOWNLOAD_RESPONSE {
        return Err(SdoError::InvalidResponse(format!(
            "Unexpected command 0x{:02X} for download",
            command
        )));
    }
    Ok(())
}

/// Decode a client request frame on the server side.
pub fn parse_request(data: &[u8]) -> Result<SdoRequest, SdoError> {
    if data.len() < 8 {
        return Err(SdoError::InvalidRequest(format!(
            "Frame too short ({} bytes)",
            data.len()
        )));
    }

    let command = data[0];
    let (index, subindex) = multiplexer(data);
    match command & command::SPECIFIER_MASK {
        command::INITIATE_UPLOAD_REQUEST => Ok(SdoRequest::Upload { index, subindex }),
        command::INITIATE_DOWNLOAD_REQUEST if command & command::EXPEDITED != 0 => {
            let size = if command & command::SIZE_INDICATED != 0 {
                EXPEDITED_MAX_SIZE - ((command >> 2) & 0x03) as usize
            } else {
                EXPEDITED_MAX_SIZE
            };
            Ok(SdoRequest::Download {
                index,
                subindex,
                data: data[4..4 + size].to_vec(),
            })
        }
        command::ABORT_TRANSFER => Ok(SdoRequest::Abort {
            index,
            subindex,
            code: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
        }),
        _ => Err(SdoError::InvalidRequest(format!(
            "Unsupported command 0x{:02X}",
            command
        ))),
    }
}

fn take<const N: usize>(payload: &[u8], name: &str) -> Result<[u8; N], SdoError> {
    payload
        .get(..N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| SdoError::ParseError(format!("Insufficient data for {}", name)))
}

/// Decode raw value bytes according to `data_type`.
pub fn parse_payload(payload: &[u8], data_type: DataType) -> Result<SdoValue, SdoError> {
    let value = match data_type {
        DataType::Boolean => SdoValue::Boolean(take::<1>(payload, "Boolean")?[0] != 0),
        DataType::UInt8 => SdoValue::UInt8(take::<1>(payload, "UInt8")?[0]),
        DataType::UInt16 => SdoValue::UInt16(u16::from_le_bytes(take(payload, "UInt16")?)),
        DataType::UInt32 => SdoValue::UInt32(u32::from_le_bytes(take(payload, "UInt32")?)),
        DataType::UInt64 => SdoValue::UInt64(u64::from_le_bytes(take(payload, "UInt64")?)),
        DataType::Int8 => SdoValue::Int8(i8::from_le_bytes(take(payload, "Int8")?)),
        DataType::Int16 => SdoValue::Int16(i16::from_le_bytes(take(payload, "Int16")?)),
        DataType::Int32 => SdoValue::Int32(i32::from_le_bytes(take(payload, "Int32")?)),
        DataType::Int64 => SdoValue::Int64(i64::from_le_bytes(take(payload, "Int64")?)),
        DataType::Real32 => SdoValue::Real32(f32::from_le_bytes(take(payload, "Real32")?)),
        DataType::Real64 => SdoValue::Real64(f64::from_le_bytes(take(payload, "Real64")?)),
        DataType::VisibleString => SdoValue::String(
            String::from_utf8_lossy(payload).trim_end_matches('\0').to_string(),
        ),
        DataType::OctetString | DataType::Domain => SdoValue::Bytes(payload.to_vec()),
    };
    Ok(value)
}

/// Human-readable description of an SDO abort code.
pub fn abort_code_description(code: u32) -> &'static str {
    match code {
        0x0503_0000 => "Toggle bit not alternated",
        0x0504_0000 => "SDO protocol timed out",
        0x0504_0001 => "Client/server command specifier not valid or unknown",
        0x0504_0005 => "Out of memory",
        0x0601_0000 => "Unsupported access to an object",
        0x0601_0001 => "Attempt to read a write only object",
        0x0601_0002 => "Attempt to write a read only object",
        0x0602_0000 => "Object does not exist in the object dictionary",
        0x0604_0041 => "Object cannot be mapped to the PDO",
        0x0604_0042 => "The number and length of the objects to be mapped would exceed PDO length",
        0x0604_0043 => "General parameter incompatibility reason",
        0x0604_0047 => "General internal incompatibility in the device",
        0x0606_0000 => "Access failed due to a hardware error",
        0x0607_0010 => "Data type does not match, length of service parameter does not match",
        0x0607_0012 => "Data type does not match, length of service parameter too high",
        0x0607_0013 => "Data type does not match, length of service parameter too low",
        0x0609_0011 => "Sub-index does not exist",
        0x0609_0030 => "Value range of parameter exceeded (only for write access)",
        0x0609_0031 => "Value of parameter written too high",
        0x0609_0032 => "Value of parameter written too low",
        0x0609_0036 => "Maximum value is less than minimum value",
        0x0800_0000 => "General error",
        0x0800_0020 => "Data cannot be transferred or stored to the application",
        0x0800_0021 => {
            "Data cannot be transferred or stored to the application because of local control"
        }
        0x0800_0022 => {
            "Data cannot be transferred or stored to the application because of the present device state"
        }
        _ => "Unknown abort code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_request_layout() {
        assert_eq!(
            encode_upload_request(0x1018, 0x02),
            [0x40, 0x18, 0x10, 0x02, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_download_request_sets_size_bits() {
        let frame = encode_download_request(0x2000, 1, &[0x34, 0x12]).unwrap();
        // n = 2 unused bytes, expedited, size indicated
        assert_eq!(frame, [0x2B, 0x00, 0x20, 0x01, 0x34, 0x12, 0, 0]);

        let frame = encode_download_request(0x2000, 1, &[1, 2, 3, 4]).unwrap();
        assert_eq!(frame[0], 0x23);
    }

    #[test]
    fn test_download_request_rejects_oversized_data() {
        assert!(matches!(
            encode_download_request(0x2000, 1, &[0; 5]),
            Err(SdoError::InvalidRequest(_))
        ));
        assert!(encode_download_request(0x2000, 1, &[]).is_err());
    }

    #[test]
    fn test_parse_expedited_upload_response() {
        let frame = [0x4F, 0x01, 0x10, 0x00, 0x05, 0xAA, 0xBB, 0xCC];
        assert_eq!(parse_upload_response(&frame, 0x1001, 0).unwrap(), vec![0x05]);

        let frame = [0x43, 0x00, 0x10, 0x00, 0x91, 0x01, 0x00, 0x00];
        let bytes = parse_upload_response(&frame, 0x1000, 0).unwrap();
        assert_eq!(
            parse_payload(&bytes, DataType::UInt32).unwrap(),
            SdoValue::UInt32(0x191)
        );
    }

    #[test]
    fn test_parse_upload_response_mismatch() {
        let frame = [0x4F, 0x02, 0x10, 0x00, 0x05, 0, 0, 0];
        assert!(matches!(
            parse_upload_response(&frame, 0x1001, 0),
            Err(SdoError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_abort() {
        let frame = encode_abort(0x2000, 3, ABORT_OBJECT_DOES_NOT_EXIST);
        match parse_upload_response(&frame, 0x2000, 3) {
            Err(SdoError::AbortTransfer { code, info }) => {
                assert_eq!(code, ABORT_OBJECT_DOES_NOT_EXIST);
                assert_eq!(info, "Object does not exist in the object dictionary");
            }
            other => panic!("expected abort, got {:?}", other),
        }
    }

    #[test]
    fn test_segmented_upload_is_rejected() {
        let frame = [0x41, 0x08, 0x10, 0x00, 0x20, 0, 0, 0];
        assert!(matches!(
            parse_upload_response(&frame, 0x1008, 0),
            Err(SdoError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_download_response() {
        let frame = encode_download_response(0x2000, 1);
        assert!(parse_download_response(&frame, 0x2000, 1).is_ok());
        let frame = encode_upload_request(0x2000, 1);
        assert!(parse_download_response(&frame, 0x2000, 1).is_err());
    }

    #[test]
    fn test_server_side_request_parsing() {
        let upload = encode_upload_request(0x1008, 0);
        assert_eq!(
            parse_request(&upload).unwrap(),
            SdoRequest::Upload { index: 0x1008, subindex: 0 }
        );

        let download = encode_download_request(0x2003, 2, &[0x0F, 0x00]).unwrap();
        assert_eq!(
            parse_request(&download).unwrap(),
            SdoRequest::Download { index: 0x2003, subindex: 2, data: vec![0x0F, 0x00] }
        );

        assert!(parse_request(&[0x40, 0x00]).is_err());
    }

    #[test]
    fn test_parse_payload_types() {
        assert_eq!(
            parse_payload(&(-1234i16).to_le_bytes(), DataType::Int16).unwrap(),
            SdoValue::Int16(-1234)
        );
        assert_eq!(
            parse_payload(b"Node\0\0", DataType::VisibleString).unwrap(),
            SdoValue::String("Node".to_string())
        );
        assert!(matches!(
            parse_payload(&[0x01], DataType::UInt32),
            Err(SdoError::ParseError(_))
        ));
        assert_eq!(SdoValue::Real32(1.5).to_le_bytes(), 1.5f32.to_le_bytes().to_vec());
    }
}
