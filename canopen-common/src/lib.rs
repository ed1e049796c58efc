//! # CANopen Common Library
//!
//! Protocol pieces shared by the network core, the monitor and the mock
//! node:
//! - COB-ID layout and well-known function codes
//! - SDO expedited frame codec
//! - NMT states and commands
//! - Object dictionary model with EDS import

pub mod cob_id;
pub mod nmt;
pub mod objectdictionary;
pub mod sdo;

pub use nmt::{NmtCommand, NmtState};
pub use objectdictionary::{
    import_any, import_eds, AccessType, DataType, DictionaryError, DictionarySource,
    ObjectDictionary, Variable,
};
pub use sdo::{abort_code_description, parse_payload, SdoError, SdoRequest, SdoValue};
