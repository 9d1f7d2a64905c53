//! Per-device refresh operations.
//!
//! Each function handles exactly one device and returns its own error; loops over
//! a collection live in the scheduler, which logs and moves on.

use crate::client::{ArloClientError, RemoteClient};
use crate::models::arlo::{ActiveMode, DeviceId, DeviceRecord, NotifyBody, models};
use crate::services::media::MediaLibrary;
use crate::storage::StateStore;
use chrono::NaiveDate;
use log::debug;
use serde_json::{Value, json};
use std::path::Path;

pub mod keys {
    pub const ACTIVE_MODE: &str = "activeMode";
    pub const LAST_IMAGE_URL: &str = "presignedLastImageUrl";
    pub const LAST_THUMBNAIL: &str = "lastThumbnail";
    pub const LAST_THUMBNAIL_SIZE: &str = "lastThumbnailSize";
    pub const LAST_CAPTURE: &str = "lastCapture";
    pub const LAST_VIDEO_URL: &str = "lastVideoUrl";
    pub const RECORDINGS_TODAY: &str = "recordingsToday";
}

/// Placeholder served until a camera's first thumbnail arrives: an 8x8 mid-grey baseline JPEG.
pub const BLANK_IMAGE: &[u8] = &[
    0xFF, 0xD8, 0xFF, 0xDB, 0x00, 0x43, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
    0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0xFF, 0xC0, 0x00, 0x0B, 0x08, 0x00, 0x08, 0x00, 0x08,
    0x01, 0x01, 0x11, 0x00, 0xFF, 0xC4, 0x00, 0x14, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xFF, 0xC4, 0x00, 0x14, 0x10, 0x01,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0xFF, 0xDA, 0x00, 0x08, 0x01, 0x01, 0x00, 0x00, 0x3F, 0x00, 0x3F, 0xFF, 0xD9,
];

/// Ask the base for its mode list.
pub fn update_modes(client: &dyn RemoteClient, base: &DeviceRecord) -> Result<(), ArloClientError> {
    client.notify(base, &NotifyBody::get("modes"))
}

/// Ask the base to republish the state of its cameras and doorbells.
pub fn request_device_lists(client: &dyn RemoteClient, base: &DeviceRecord) -> Result<(), ArloClientError> {
    client.notify(base, &NotifyBody::get("cameras"))?;
    client.notify(base, &NotifyBody::get("doorbells"))
}

/// Record the active mode of `base` from an automation listing. Returns the mode, if listed.
pub fn apply_active_mode(store: &dyn StateStore, base: &DeviceRecord, modes: &[ActiveMode]) -> Option<String> {
    let mode = modes
        .iter()
        .find(|m| m.gateway_id == base.device_id)
        .and_then(|m| m.active_modes.first())?
        .clone();
    store.set(&[base.device_id.as_str(), keys::ACTIVE_MODE], Value::String(mode.clone()));
    Some(mode)
}

/// Base that relays requests for `camera`: its parent, or itself when self-hosted.
pub fn relay_base<'a>(camera: &DeviceRecord, bases: &'a [DeviceRecord]) -> Option<&'a DeviceRecord> {
    let target: &DeviceId = camera.parent_id.as_ref().unwrap_or(&camera.device_id);
    bases.iter().find(|b| &b.device_id == target)
}

/// Request ambient sensor history. Only Arlo Baby cameras carry the sensors.
pub fn update_ambient_sensors(
    client: &dyn RemoteClient,
    camera: &DeviceRecord,
    bases: &[DeviceRecord],
) -> Result<bool, ArloClientError> {
    if !camera.is_model(models::ARLO_BABY) {
        return Ok(false);
    }
    let Some(base) = relay_base(camera, bases) else {
        debug!("Ambient: no base relays for camera {}", camera.device_id);
        return Ok(false);
    };
    let resource = format!("cameras/{}/ambientSensors/history", camera.device_id);
    client.notify(base, &NotifyBody::get(resource))?;
    Ok(true)
}

/// Download the camera's last image and remember where it went.
///
/// With `dir` set, the image is written to `<dir>/<device_id>.jpg`; otherwise only the
/// size is recorded. Cameras that never uploaded an image are skipped.
pub fn update_last_image(
    client: &dyn RemoteClient,
    store: &dyn StateStore,
    camera: &DeviceRecord,
    dir: Option<&Path>,
) -> Result<(), String> {
    let id = camera.device_id.as_str();
    let Some(url) = store
        .get(&[id, keys::LAST_IMAGE_URL])
        .and_then(|v| v.as_str().map(str::to_string))
    else {
        debug!("Thumbnail: camera {} has no last image yet", id);
        return Ok(());
    };
    let bytes = client
        .fetch_bytes(&url)
        .map_err(|e| format!("thumbnail for {} failed: {}", id, e))?;

    let reference = match dir {
        Some(dir) => {
            let path = dir.join(format!("{id}.jpg"));
            std::fs::write(&path, &bytes).map_err(|e| format!("write {} failed: {}", path.display(), e))?;
            path.display().to_string()
        }
        None => url,
    };
    store.set(&[id, keys::LAST_THUMBNAIL], json!(reference));
    store.set(&[id, keys::LAST_THUMBNAIL_SIZE], json!(bytes.len()));
    Ok(())
}

/// Summarise the library entries of `camera` into its state.
pub fn update_media(store: &dyn StateStore, camera: &DeviceRecord, library: &MediaLibrary, today: NaiveDate) {
    let id = &camera.device_id;
    let recordings = library.recordings_for(id);
    store.set(
        &[id.as_str(), keys::RECORDINGS_TODAY],
        json!(MediaLibrary::count_on(&recordings, today)),
    );
    if let Some(latest) = recordings.first() {
        store.set(&[id.as_str(), keys::LAST_CAPTURE], json!(latest.local_created_date));
        if let Some(url) = &latest.presigned_content_url {
            store.set(&[id.as_str(), keys::LAST_VIDEO_URL], json!(url));
        }
    }
}
