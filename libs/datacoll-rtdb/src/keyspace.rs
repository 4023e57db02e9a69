//! Key and channel schema of the realtime store
//!
//! The textual layout is fixed for compatibility with existing deployments
//! and downstream consumers; build every key through these helpers.

/// Identity sets for enumeration
pub const SET_DEVICE: &str = "SET:DEVICE";
pub const SET_TERM: &str = "SET:TERM";
pub const SET_ITEM: &str = "SET:ITEM";

/// `HS:DEVICE:<id>`: device attributes
pub fn device(device_id: &str) -> String {
    format!("HS:DEVICE:{device_id}")
}

/// `HS:TERM:<id>`: terminal attributes
pub fn term(term_id: &str) -> String {
    format!("HS:TERM:{term_id}")
}

/// `HS:ITEM:<id>`: point attributes
pub fn item(item_id: &str) -> String {
    format!("HS:ITEM:{item_id}")
}

/// `HS:TERM_ITEM:<term>:<point>`: point binding
pub fn term_item(term_id: &str, item_id: &str) -> String {
    format!("HS:TERM_ITEM:{term_id}:{item_id}")
}

/// `HS:MAPPING:<PROTOCOL>:<device>:<protocol_code>`: inverse binding
pub fn mapping(protocol: &str, device_id: &str, protocol_code: &str) -> String {
    format!(
        "HS:MAPPING:{}:{}:{}",
        protocol.to_uppercase(),
        device_id,
        protocol_code
    )
}

/// `HS:DATA:<device>:<term>:<point>`: timestamp → value map
pub fn data(device_id: &str, term_id: &str, item_id: &str) -> String {
    format!("HS:DATA:{device_id}:{term_id}:{item_id}")
}

/// `LST:DATA_TIME:<device>:<term>:<point>`: ordered timestamps
pub fn data_time(device_id: &str, term_id: &str, item_id: &str) -> String {
    format!("LST:DATA_TIME:{device_id}:{term_id}:{item_id}")
}

/// `LST:FRAME:<device>`: raw frame log
pub fn frame_log(device_id: &str) -> String {
    format!("LST:FRAME:{device_id}")
}

/// `SET:DEVICE_TERM:<device>`: terminals attached to a device
pub fn device_terms(device_id: &str) -> String {
    format!("SET:DEVICE_TERM:{device_id}")
}

/// `SET:TERM_ITEM:<term>`: points bound to a terminal
pub fn term_items(term_id: &str) -> String {
    format!("SET:TERM_ITEM:{term_id}")
}

/// Change bus channels
pub mod channel {
    pub const DEVICE_ADD: &str = "CHANNEL:DEVICE_ADD";
    pub const DEVICE_FRESH: &str = "CHANNEL:DEVICE_FRESH";
    pub const DEVICE_DEL: &str = "CHANNEL:DEVICE_DEL";
    pub const TERM_ADD: &str = "CHANNEL:TERM_ADD";
    pub const TERM_FRESH: &str = "CHANNEL:TERM_FRESH";
    pub const TERM_DEL: &str = "CHANNEL:TERM_DEL";
    pub const TERM_ITEM_ADD: &str = "CHANNEL:TERM_ITEM_ADD";
    pub const TERM_ITEM_DEL: &str = "CHANNEL:TERM_ITEM_DEL";
    pub const DEVICE_CALL: &str = "CHANNEL:DEVICE_CALL";
    pub const DEVICE_CTRL: &str = "CHANNEL:DEVICE_CTRL";

    /// Per-point reply channel for interactive reads
    pub fn device_call(device_id: &str, term_id: &str, item_id: &str) -> String {
        format!("CHANNEL:DEVICE_CALL:{device_id}:{term_id}:{item_id}")
    }

    /// Per-point reply channel for control confirmations
    pub fn device_ctrl(device_id: &str, term_id: &str, item_id: &str) -> String {
        format!("CHANNEL:DEVICE_CTRL:{device_id}:{term_id}:{item_id}")
    }

    /// Per-point channel for collected samples
    pub fn device_data(device_id: &str, term_id: &str, item_id: &str) -> String {
        format!("CHANNEL:DEVICE_DATA:{device_id}:{term_id}:{item_id}")
    }
}
