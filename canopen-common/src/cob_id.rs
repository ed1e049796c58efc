//! COB-ID layout for standard 11-bit CANopen identifiers.
//!
//! Bits 0-6 carry the node address (0 is broadcast), bits 7-10 carry the
//! function code that selects the service.

/// Mask selecting the node address bits.
pub const NODE_ID_MASK: u16 = 0x07F;
/// Mask selecting the function code bits.
pub const FUNCTION_CODE_MASK: u16 = 0x780;
/// Largest identifier representable in the standard format.
pub const MAX_STANDARD_ID: u16 = 0x7FF;

/// Node address that addresses every node on the bus.
pub const BROADCAST_NODE_ID: u8 = 0;
/// Highest assignable node address.
pub const MAX_NODE_ID: u8 = 127;

pub const NMT: u16 = 0x000;
pub const SYNC: u16 = 0x080;
pub const EMCY: u16 = 0x080;
pub const TIME: u16 = 0x100;
pub const TPDO1: u16 = 0x180;
pub const RPDO1: u16 = 0x200;
pub const TPDO2: u16 = 0x280;
pub const RPDO2: u16 = 0x300;
pub const TPDO3: u16 = 0x380;
pub const RPDO3: u16 = 0x400;
pub const TPDO4: u16 = 0x480;
pub const RPDO4: u16 = 0x500;
/// Server -> client SDO traffic.
pub const SDO_RESPONSE: u16 = 0x580;
/// Client -> server SDO traffic.
pub const SDO_REQUEST: u16 = 0x600;
/// Heartbeat / boot-up state reports.
pub const HEARTBEAT: u16 = 0x700;

/// Node address encoded in `cob_id`.
pub fn node_id(cob_id: u16) -> u8 {
    (cob_id & NODE_ID_MASK) as u8
}

/// Function code encoded in `cob_id`.
pub fn function_code(cob_id: u16) -> u16 {
    cob_id & FUNCTION_CODE_MASK
}

/// Build an identifier from a function code and a node address.
pub fn cob_id(function_code: u16, node_id: u8) -> u16 {
    (function_code & FUNCTION_CODE_MASK) | (node_id as u16 & NODE_ID_MASK)
}

/// True for addresses a device may occupy (1..=127).
pub fn is_valid_node_id(node_id: u8) -> bool {
    (1..=MAX_NODE_ID).contains(&node_id)
}
