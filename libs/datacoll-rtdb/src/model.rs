//! Inventory entity models
//!
//! Entities are stored as redis hashes with string fields and travel the
//! change bus / HTTP API as JSON. The hash field mapping is explicit so the
//! on-store layout stays stable regardless of serde representation details.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

fn default_coefficient() -> f64 {
    1.0
}

/// A remote device reachable over a telecontrol protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub identify: String,
    /// Protocol tag; only `iec104` devices get a live actor
    pub protocol: String,
    /// Online status: `on` / `off`, maintained by the engine
    #[serde(default)]
    pub status: String,
}

impl Device {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".into(), self.id.clone()),
            ("name".into(), self.name.clone()),
            ("ip".into(), self.ip.clone()),
            ("port".into(), self.port.to_string()),
            ("identify".into(), self.identify.clone()),
            ("protocol".into(), self.protocol.clone()),
            ("status".into(), self.status.clone()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            id: required(fields, "id")?,
            name: optional(fields, "name"),
            ip: required(fields, "ip")?,
            port: required(fields, "port")?
                .parse()
                .map_err(|e| anyhow!("bad device port: {e}"))?,
            identify: optional(fields, "identify"),
            protocol: required(fields, "protocol")?,
            status: optional(fields, "status"),
        })
    }

    /// True when a change to `other` requires tearing down the connection
    pub fn transport_changed(&self, other: &Device) -> bool {
        self.id != other.id
            || self.protocol != other.protocol
            || self.ip != other.ip
            || self.port != other.port
    }
}

/// A logical unit attached to a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub identify: String,
    #[serde(default)]
    pub protocol: String,
    pub device_id: String,
}

impl Term {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".into(), self.id.clone()),
            ("name".into(), self.name.clone()),
            ("address".into(), self.address.clone()),
            ("identify".into(), self.identify.clone()),
            ("protocol".into(), self.protocol.clone()),
            ("device_id".into(), self.device_id.clone()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            id: required(fields, "id")?,
            name: optional(fields, "name"),
            address: optional(fields, "address"),
            identify: optional(fields, "identify"),
            protocol: optional(fields, "protocol"),
            device_id: required(fields, "device_id")?,
        })
    }
}

/// An abstract datum identity (measurement or control point)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub view_code: String,
    #[serde(default)]
    pub func_type: String,
}

impl Item {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("id".into(), self.id.clone()),
            ("name".into(), self.name.clone()),
            ("view_code".into(), self.view_code.clone()),
            ("func_type".into(), self.func_type.clone()),
        ]
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            id: required(fields, "id")?,
            name: optional(fields, "name"),
            view_code: optional(fields, "view_code"),
            func_type: optional(fields, "func_type"),
        })
    }
}

/// Binding of (device, terminal, point) to a protocol address with scaling
///
/// Stored twice: under `HS:TERM_ITEM:<t>:<i>` and, verbatim, under the
/// inverse `HS:MAPPING:<PROTOCOL>:<device>:<protocol_code>` consulted on
/// every inbound data object. The two copies must agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointBinding {
    pub term_id: String,
    pub item_id: String,
    /// Filled in from the owning terminal at creation time
    #[serde(default)]
    pub device_id: String,
    /// Protocol address (IEC-104 information object address)
    pub protocol_code: String,
    /// ASDU type identifier used when building control frames
    #[serde(default)]
    pub code_type: Option<u8>,
    #[serde(default = "default_coefficient")]
    pub coefficient: f64,
    #[serde(default)]
    pub base_val: f64,
}

impl PointBinding {
    pub fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("term_id".into(), self.term_id.clone()),
            ("item_id".into(), self.item_id.clone()),
            ("device_id".into(), self.device_id.clone()),
            ("protocol_code".into(), self.protocol_code.clone()),
            ("coefficient".into(), self.coefficient.to_string()),
            ("base_val".into(), self.base_val.to_string()),
        ];
        if let Some(code_type) = self.code_type {
            fields.push(("code_type".into(), code_type.to_string()));
        }
        fields
    }

    pub fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            term_id: required(fields, "term_id")?,
            item_id: required(fields, "item_id")?,
            device_id: optional(fields, "device_id"),
            protocol_code: required(fields, "protocol_code")?,
            code_type: fields
                .get("code_type")
                .map(|s| s.parse().map_err(|e| anyhow!("bad code_type: {e}")))
                .transpose()?,
            coefficient: fields
                .get("coefficient")
                .map(|s| s.parse().map_err(|e| anyhow!("bad coefficient: {e}")))
                .transpose()?
                .unwrap_or(1.0),
            base_val: fields
                .get("base_val")
                .map(|s| s.parse().map_err(|e| anyhow!("bad base_val: {e}")))
                .transpose()?
                .unwrap_or(0.0),
        })
    }

    /// Apply the affine scaling to a raw protocol value
    pub fn scale(&self, raw: f64) -> f64 {
        raw * self.coefficient + self.base_val
    }
}

/// One normalized measurement published on the sample bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleEvent {
    pub device_id: String,
    pub term_id: String,
    pub item_id: String,
    /// ISO-8601 local time with millisecond precision
    pub time: String,
    pub value: f64,
}

/// Interactive request payload on the broadcast channels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointRequest {
    pub device_id: String,
    pub term_id: String,
    pub item_id: String,
    /// Present on control requests only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

fn required(fields: &HashMap<String, String>, name: &str) -> Result<String> {
    fields
        .get(name)
        .cloned()
        .ok_or_else(|| anyhow!("missing field `{name}`"))
}

fn optional(fields: &HashMap<String, String>, name: &str) -> String {
    fields.get(name).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_field_round_trip() {
        let device = Device {
            id: "d1".into(),
            name: "pump station".into(),
            ip: "10.0.0.7".into(),
            port: 2404,
            identify: "rtu-07".into(),
            protocol: "iec104".into(),
            status: "off".into(),
        };
        let map: HashMap<_, _> = device.to_fields().into_iter().collect();
        assert_eq!(Device::from_fields(&map).unwrap(), device);
    }

    #[test]
    fn binding_defaults() {
        let mut fields = HashMap::new();
        fields.insert("term_id".to_string(), "t1".to_string());
        fields.insert("item_id".to_string(), "i1".to_string());
        fields.insert("protocol_code".to_string(), "400".to_string());
        let binding = PointBinding::from_fields(&fields).unwrap();
        assert_eq!(binding.coefficient, 1.0);
        assert_eq!(binding.base_val, 0.0);
        assert_eq!(binding.code_type, None);
        assert_eq!(binding.scale(3.5), 3.5);
    }

    #[test]
    fn binding_scaling() {
        let mut fields = HashMap::new();
        fields.insert("term_id".to_string(), "t1".to_string());
        fields.insert("item_id".to_string(), "i1".to_string());
        fields.insert("protocol_code".to_string(), "400".to_string());
        fields.insert("coefficient".to_string(), "0.1".to_string());
        fields.insert("base_val".to_string(), "-40".to_string());
        let binding = PointBinding::from_fields(&fields).unwrap();
        assert_eq!(binding.scale(500.0), 10.0);
    }

    #[test]
    fn request_value_omitted_for_calls() {
        let req = PointRequest {
            device_id: "d1".into(),
            term_id: "t1".into(),
            item_id: "i1".into(),
            value: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("value"));
    }
}
