use crate::models::arlo::{DEVICE_KEYS, DeviceKind, DeviceRecord, RawDevice, device_types, models};
use crate::storage::StateStore;
use log::{info, warn};

/// Typed view of one inventory load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    pub bases: Vec<DeviceRecord>,
    pub cameras: Vec<DeviceRecord>,
    pub doorbells: Vec<DeviceRecord>,
}

impl Inventory {
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty() && self.cameras.is_empty() && self.doorbells.is_empty()
    }
}

fn is_base(raw: &RawDevice) -> bool {
    matches!(
        raw.device_type(),
        Some(device_types::BASESTATION | device_types::ARLOQ | device_types::ARLOQS)
    ) || raw.model_id() == Some(models::ARLO_BABY)
}

fn is_camera(raw: &RawDevice) -> bool {
    matches!(
        raw.device_type(),
        Some(device_types::CAMERA | device_types::ARLOQ | device_types::ARLOQS)
    )
}

fn is_doorbell(raw: &RawDevice) -> bool {
    raw.device_type() == Some(device_types::DOORBELL)
}

/// Kinds a device classifies as; empty for devices that are not provisioned.
pub fn kinds_of(raw: &RawDevice) -> Vec<DeviceKind> {
    if !raw.is_provisioned() {
        return Vec::new();
    }
    let mut kinds = Vec::with_capacity(2);
    if is_base(raw) {
        kinds.push(DeviceKind::Base);
    }
    if is_camera(raw) {
        kinds.push(DeviceKind::Camera);
    }
    if is_doorbell(raw) {
        kinds.push(DeviceKind::Doorbell);
    }
    kinds
}

/// Sort raw inventory entries into bases, cameras and doorbells, keeping inventory order.
pub fn classify(raw_devices: &[RawDevice]) -> Inventory {
    let mut inventory = Inventory::default();
    for raw in raw_devices {
        let name = raw.device_name().unwrap_or("<unnamed>");
        if !raw.is_provisioned() {
            info!(
                "Classify: skipping {}: state {}",
                name,
                raw.state().unwrap_or("unknown")
            );
            continue;
        }
        let Some(device_id) = raw.device_id() else {
            warn!("Classify: skipping {}: no deviceId", name);
            continue;
        };
        for kind in kinds_of(raw) {
            let record = DeviceRecord::from_raw(kind, device_id.clone(), raw);
            match kind {
                DeviceKind::Base => inventory.bases.push(record),
                DeviceKind::Camera => inventory.cameras.push(record),
                DeviceKind::Doorbell => inventory.doorbells.push(record),
            }
        }
    }
    inventory
}

/// Copy tracked metadata of every addressable device into the store, provisioned or not.
pub fn persist_metadata(raw_devices: &[RawDevice], store: &dyn StateStore) {
    for raw in raw_devices {
        let Some(device_id) = raw.device_id() else { continue };
        for key in DEVICE_KEYS {
            if let Some(value) = raw.field(key) {
                store.set(&[device_id.as_str(), key], value.clone());
            }
        }
    }
}
