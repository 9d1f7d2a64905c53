//! Models for the subset of the Arlo web API the orchestrator touches.
//!
//! Notes
//! - Device inventory entries are kept as loose JSON maps (`RawDevice`); the
//!   service adds and drops fields per model, so only typed accessors are exposed.
//! - Everything else is modeled as strongly typed structs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =====================
// Well-known field values
// =====================

pub mod device_types {
    pub const BASESTATION: &str = "basestation";
    pub const CAMERA: &str = "camera";
    pub const DOORBELL: &str = "doorbell";
    pub const ARLOQ: &str = "arloq";
    pub const ARLOQS: &str = "arloqs";
}

pub mod models {
    /// Arlo Baby: a camera that acts as its own base station.
    pub const ARLO_BABY: &str = "ABC1000";
}

pub const STATE_PROVISIONED: &str = "provisioned";

/// Metadata fields copied from the inventory into the state store on every load.
pub const DEVICE_KEYS: [&str; 16] = [
    "deviceName",
    "deviceType",
    "modelId",
    "state",
    "parentId",
    "uniqueId",
    "userId",
    "xCloudId",
    "firmwareVersion",
    "hardwareVersion",
    "interfaceVersion",
    "connectivity",
    "presignedLastImageUrl",
    "presignedSnapshotUrl",
    "lastImageUploaded",
    "lastModified",
];

// =====================
// Scalar ID newtype wrappers
// =====================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

// =====================
// Inventory
// =====================

/// One entry of the device inventory, as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDevice(pub Map<String, Value>);

impl RawDevice {
    /// Field value, treating JSON `null` as absent.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.str_field("deviceId").map(|s| DeviceId(s.to_string()))
    }

    pub fn device_name(&self) -> Option<&str> {
        self.str_field("deviceName")
    }

    pub fn device_type(&self) -> Option<&str> {
        self.str_field("deviceType")
    }

    pub fn model_id(&self) -> Option<&str> {
        self.str_field("modelId")
    }

    pub fn state(&self) -> Option<&str> {
        self.str_field("state")
    }

    pub fn parent_id(&self) -> Option<DeviceId> {
        self.str_field("parentId").map(|s| DeviceId(s.to_string()))
    }

    pub fn user_id(&self) -> Option<&str> {
        self.str_field("userId")
    }

    pub fn x_cloud_id(&self) -> Option<&str> {
        self.str_field("xCloudId")
    }

    pub fn is_provisioned(&self) -> bool {
        self.state() == Some(STATE_PROVISIONED)
    }
}

impl From<Value> for RawDevice {
    /// Non-object values become an empty device, which classifies as "skip".
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => RawDevice(map),
            _ => RawDevice::default(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Base,
    Camera,
    Doorbell,
}

impl core::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            DeviceKind::Base => "base",
            DeviceKind::Camera => "camera",
            DeviceKind::Doorbell => "doorbell",
        };
        f.write_str(s)
    }
}

/// A classified device. Mutable attributes live in the state store under `[device_id, key]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub name: String,
    pub kind: DeviceKind,
    pub device_type: Option<String>,
    pub model_id: Option<String>,
    /// Base station a camera or doorbell hangs off; `None` for self-hosted devices.
    pub parent_id: Option<DeviceId>,
    pub user_id: Option<String>,
    pub x_cloud_id: Option<String>,
}

impl DeviceRecord {
    pub fn from_raw(kind: DeviceKind, device_id: DeviceId, raw: &RawDevice) -> Self {
        DeviceRecord {
            name: raw.device_name().unwrap_or(device_id.as_str()).to_string(),
            device_id,
            kind,
            device_type: raw.device_type().map(str::to_string),
            model_id: raw.model_id().map(str::to_string),
            parent_id: raw.parent_id(),
            user_id: raw.user_id().map(str::to_string),
            x_cloud_id: raw.x_cloud_id().map(str::to_string),
        }
    }

    pub fn is_model(&self, model: &str) -> bool {
        self.model_id.as_deref() == Some(model)
    }
}

// =====================
// Requests and responses
// =====================

/// Envelope every `hmsweb` endpoint wraps its payload in.
#[derive(Debug, Clone, Deserialize)]
pub struct ArloResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

/// Body of a notification sent to a base station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotifyBody {
    pub action: String,
    pub resource: String,
    pub publish_response: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Value>,
}

impl NotifyBody {
    pub fn get(resource: impl Into<String>) -> Self {
        NotifyBody {
            action: "get".to_string(),
            resource: resource.into(),
            publish_response: false,
            properties: None,
        }
    }

    pub fn set(resource: impl Into<String>, properties: Value) -> Self {
        NotifyBody {
            action: "set".to_string(),
            resource: resource.into(),
            publish_response: false,
            properties: Some(properties),
        }
    }
}

/// Active automation modes of one gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveMode {
    pub gateway_id: DeviceId,
    #[serde(default)]
    pub active_modes: Vec<String>,
}

/// One media-library entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub device_id: DeviceId,
    /// Milliseconds since the Unix epoch, local to the device.
    pub local_created_date: i64,
    #[serde(default)]
    pub presigned_content_url: Option<String>,
    #[serde(default)]
    pub presigned_thumbnail_url: Option<String>,
    #[serde(default)]
    pub media_duration_second: Option<u32>,
    #[serde(default)]
    pub reason: Option<String>,
}
