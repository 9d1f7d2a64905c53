//! Entry point for host applications: builds the collaborators, starts the
//! refresh cadences and answers device queries.

use crate::background::{Background, TaskRunner};
use crate::client::{ArloClient, ArloClientError, RemoteClient};
use crate::config::Config;
use crate::models::arlo::{DeviceRecord, Recording};
use crate::services::devices::{BLANK_IMAGE, keys};
use crate::services::media::MediaLibrary;
use crate::services::refresh::{Cadences, Lifecycle, RefreshScheduler};
use crate::storage::{ARLO_NAMESPACE, FileStore, StateStore, StorageError};
use crate::utils::{Clock, SystemClock};
use log::info;
use serde_json::Value;
use std::borrow::Cow;
use std::sync::Arc;

#[derive(Debug)]
pub enum ArloError {
    /// The initial inventory fetch failed.
    Inventory(ArloClientError),
    Storage(StorageError),
    /// Worker threads could not be spawned, or the storage directory not created.
    Io(std::io::Error),
}

impl core::fmt::Display for ArloError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ArloError::Inventory(e) => write!(f, "device inventory unavailable: {}", e),
            ArloError::Storage(e) => write!(f, "state store: {}", e),
            ArloError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for ArloError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArloError::Inventory(e) => Some(e),
            ArloError::Storage(e) => Some(e),
            ArloError::Io(e) => Some(e),
        }
    }
}

impl From<ArloClientError> for ArloError {
    fn from(value: ArloClientError) -> Self {
        ArloError::Inventory(value)
    }
}

impl From<StorageError> for ArloError {
    fn from(value: StorageError) -> Self {
        ArloError::Storage(value)
    }
}

impl From<std::io::Error> for ArloError {
    fn from(value: std::io::Error) -> Self {
        ArloError::Io(value)
    }
}

pub struct Arlo {
    name: String,
    scheduler: Arc<RefreshScheduler>,
}

impl core::fmt::Debug for Arlo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Arlo")
            .field("name", &self.name)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}

/// Collaborators an [`Arlo`] runs on.
pub struct Parts {
    pub client: Arc<dyn RemoteClient>,
    pub store: Arc<dyn StateStore>,
    pub runner: Arc<dyn TaskRunner>,
    pub clock: Arc<dyn Clock>,
}

impl Arlo {
    /// Build the HTTP client, file store and worker pool from `cfg`, then start.
    pub fn from_config(cfg: &Config) -> Result<Self, ArloError> {
        std::fs::create_dir_all(&cfg.storage_dir)?;
        let client = ArloClient::new(
            cfg.host.clone(),
            cfg.token.clone(),
            cfg.user_id.clone(),
            cfg.request_timeout,
        );
        let store = FileStore::open(cfg.state_file())?;
        let runner = Background::new(cfg.worker_threads)?;
        let parts = Parts {
            client: Arc::new(client),
            store: Arc::new(store),
            runner: Arc::new(runner),
            clock: Arc::new(SystemClock),
        };
        let cadences = Cadences {
            fast: cfg.fast_refresh,
            slow: cfg.slow_refresh,
            reload_devices_every: cfg.refresh_devices_every,
            thumbnail_dir: Some(cfg.storage_dir.clone()),
        };
        Self::start(cfg.name.clone(), parts, cadences, cfg.library_days)
    }

    /// Load the inventory synchronously and enter steady-state refreshing.
    pub fn start(name: String, parts: Parts, cadences: Cadences, library_days: u32) -> Result<Self, ArloError> {
        info!("{}: starting", name);
        let Parts {
            client,
            store,
            runner,
            clock,
        } = parts;
        let scheduler = RefreshScheduler::new(
            client,
            store,
            Arc::clone(&runner),
            clock,
            MediaLibrary::new(library_days),
            cadences,
        );
        if let Err(e) = scheduler.start() {
            runner.stop();
            return Err(e.into());
        }
        Ok(Arlo { name, scheduler })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.scheduler.lifecycle()
    }

    pub fn is_connected(&self) -> bool {
        self.scheduler.client().is_connected()
    }

    pub fn bases(&self) -> Vec<DeviceRecord> {
        self.scheduler.inventory().bases.clone()
    }

    pub fn cameras(&self) -> Vec<DeviceRecord> {
        self.scheduler.inventory().cameras.clone()
    }

    pub fn doorbells(&self) -> Vec<DeviceRecord> {
        self.scheduler.inventory().doorbells.clone()
    }

    pub fn lookup_base_by_id(&self, device_id: &str) -> Option<DeviceRecord> {
        first_match(&self.scheduler.inventory().bases, |d| d.device_id.as_str() == device_id)
    }

    pub fn lookup_base_by_name(&self, name: &str) -> Option<DeviceRecord> {
        first_match(&self.scheduler.inventory().bases, |d| d.name == name)
    }

    pub fn lookup_camera_by_id(&self, device_id: &str) -> Option<DeviceRecord> {
        first_match(&self.scheduler.inventory().cameras, |d| d.device_id.as_str() == device_id)
    }

    pub fn lookup_camera_by_name(&self, name: &str) -> Option<DeviceRecord> {
        first_match(&self.scheduler.inventory().cameras, |d| d.name == name)
    }

    pub fn lookup_doorbell_by_id(&self, device_id: &str) -> Option<DeviceRecord> {
        first_match(&self.scheduler.inventory().doorbells, |d| d.device_id.as_str() == device_id)
    }

    pub fn lookup_doorbell_by_name(&self, name: &str) -> Option<DeviceRecord> {
        first_match(&self.scheduler.inventory().doorbells, |d| d.name == name)
    }

    /// Account-wide attribute, e.g. `totalCameras`.
    pub fn attribute(&self, attr: &str) -> Option<Value> {
        self.scheduler.store().get(&[ARLO_NAMESPACE, attr])
    }

    /// Last known value of one device attribute.
    pub fn device_attribute(&self, device_id: &str, key: &str) -> Option<Value> {
        self.scheduler.store().get(&[device_id, key])
    }

    /// Placeholder for cameras whose thumbnail has not arrived yet.
    pub fn blank_image(&self) -> &'static [u8] {
        BLANK_IMAGE
    }

    /// Latest thumbnail written for `camera`, or the blank image until one is on disk.
    pub fn last_image(&self, camera: &DeviceRecord) -> Cow<'static, [u8]> {
        self.device_attribute(camera.device_id.as_str(), keys::LAST_THUMBNAIL)
            .and_then(|v| v.as_str().and_then(|path| std::fs::read(path).ok()))
            .map(Cow::Owned)
            .unwrap_or(Cow::Borrowed(BLANK_IMAGE))
    }

    pub fn recordings(&self) -> Arc<Vec<Recording>> {
        self.scheduler.library().recordings()
    }

    pub fn recordings_for(&self, camera: &DeviceRecord) -> Vec<Recording> {
        self.scheduler.library().recordings_for(&camera.device_id)
    }

    /// Stop refreshing, flush state and log out. Idempotent.
    pub fn stop(&self) {
        self.scheduler.stop();
        info!("{}: stopped", self.name);
    }
}

fn first_match(records: &[DeviceRecord], pred: impl Fn(&DeviceRecord) -> bool) -> Option<DeviceRecord> {
    records.iter().find(|d| pred(d)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::refresh::jobs;
    use crate::test_support::{FakeClient, ManualClock, RecordingRunner, date};
    use serde_json::json;

    fn start_with(devices: Vec<Value>) -> (Arlo, Arc<FakeClient>, Arc<RecordingRunner>) {
        let client = Arc::new(FakeClient::with_devices(devices));
        let runner = Arc::new(RecordingRunner::default());
        let parts = Parts {
            client: client.clone(),
            store: Arc::new(FileStore::in_memory()),
            runner: runner.clone(),
            clock: Arc::new(ManualClock::new(date(2024, 1, 1))),
        };
        let arlo = Arlo::start("aarlo".into(), parts, Cadences::default(), 30).unwrap();
        (arlo, client, runner)
    }

    #[test]
    fn lookups_return_first_match_or_none() {
        let (arlo, _, _) = start_with(vec![
            json!({"deviceId": "C1", "deviceName": "Yard", "deviceType": "camera", "state": "provisioned"}),
            json!({"deviceId": "C2", "deviceName": "Yard", "deviceType": "camera", "state": "provisioned"}),
            json!({"deviceId": "D1", "deviceName": "Front", "deviceType": "doorbell", "state": "provisioned"}),
        ]);
        assert_eq!(arlo.lookup_camera_by_name("Yard").unwrap().device_id.as_str(), "C1");
        assert_eq!(arlo.lookup_camera_by_id("C2").unwrap().name, "Yard");
        assert!(arlo.lookup_camera_by_id("nope").is_none());
        assert_eq!(arlo.lookup_doorbell_by_name("Front").unwrap().device_id.as_str(), "D1");
        assert!(arlo.lookup_doorbell_by_id("C1").is_none());
        assert!(arlo.lookup_base_by_id("C1").is_none());
        assert!(arlo.lookup_base_by_name("Yard").is_none());
    }

    #[test]
    fn lookups_on_empty_account() {
        let (arlo, _, runner) = start_with(vec![]);
        assert!(arlo.cameras().is_empty());
        assert!(arlo.lookup_camera_by_name("Yard").is_none());
        assert!(arlo.lookup_doorbell_by_id("D1").is_none());
        assert_eq!(arlo.attribute("totalCameras"), Some(json!(0)));
        assert_eq!(runner.count(jobs::PING_BASE), 0);
    }

    #[test]
    fn scenario_with_unprovisioned_camera() {
        let (arlo, _, runner) = start_with(vec![
            json!({"deviceId": "B1", "deviceType": "basestation", "state": "provisioned"}),
            json!({"deviceId": "C1", "deviceType": "camera", "state": "provisioned"}),
            json!({"deviceId": "X1", "deviceType": "camera", "state": "unknown", "modelId": "VMC4040"}),
        ]);
        let ids = |v: Vec<DeviceRecord>| v.into_iter().map(|d| d.device_id.0).collect::<Vec<_>>();
        assert_eq!(ids(arlo.bases()), ["B1"]);
        assert_eq!(ids(arlo.cameras()), ["C1"]);
        assert!(arlo.doorbells().is_empty());
        assert!(arlo.lookup_camera_by_id("X1").is_none());
        assert_eq!(arlo.device_attribute("X1", "modelId"), Some(json!("VMC4040")));
        assert_eq!(arlo.attribute("totalCameras"), Some(json!(1)));
        assert_eq!(runner.count(jobs::PING_BASE), 1);
    }

    #[test]
    fn startup_failure_is_reported() {
        let client = Arc::new(FakeClient::default());
        client.fail_devices(true);
        let runner = Arc::new(RecordingRunner::default());
        let parts = Parts {
            client,
            store: Arc::new(FileStore::in_memory()),
            runner: runner.clone(),
            clock: Arc::new(ManualClock::new(date(2024, 1, 1))),
        };
        let err = Arlo::start("aarlo".into(), parts, Cadences::default(), 30).unwrap_err();
        assert!(matches!(err, ArloError::Inventory(_)));
        assert!(runner.log().is_empty());
    }

    #[test]
    fn stop_logs_out_and_disconnects() {
        let (arlo, client, _) = start_with(vec![]);
        assert!(arlo.is_connected());
        arlo.stop();
        arlo.stop();
        assert!(client.logged_out());
        assert!(!arlo.is_connected());
        assert_eq!(arlo.lifecycle(), Lifecycle::Stopped);
    }

    #[test]
    fn last_image_falls_back_to_blank_until_a_thumbnail_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(FakeClient::with_devices(vec![json!({
            "deviceId": "C1", "deviceType": "camera", "state": "provisioned",
            "presignedLastImageUrl": "https://example.invalid/c1.jpg"
        })]));
        let runner = Arc::new(RecordingRunner::default());
        let parts = Parts {
            client,
            store: Arc::new(FileStore::in_memory()),
            runner: runner.clone(),
            clock: Arc::new(ManualClock::new(date(2024, 1, 1))),
        };
        let cadences = Cadences {
            thumbnail_dir: Some(dir.path().to_path_buf()),
            ..Cadences::default()
        };
        let arlo = Arlo::start("aarlo".into(), parts, cadences, 30).unwrap();
        let cam = arlo.lookup_camera_by_id("C1").unwrap();

        assert_eq!(arlo.blank_image(), BLANK_IMAGE);
        assert_eq!(&*arlo.last_image(&cam), BLANK_IMAGE);

        runner.run_pending();
        assert_eq!(&*arlo.last_image(&cam), FakeClient::IMAGE);
    }

    #[test]
    fn recordings_come_from_the_library() {
        let (arlo, client, runner) = start_with(vec![json!({
            "deviceId": "C1", "deviceName": "Yard", "deviceType": "camera", "state": "provisioned"
        })]);
        client.set_library(vec![Recording {
            device_id: crate::models::arlo::DeviceId("C1".into()),
            local_created_date: 1_704_067_200_000,
            presigned_content_url: Some("https://example.invalid/c1.mp4".into()),
            presigned_thumbnail_url: None,
            media_duration_second: Some(5),
            reason: None,
        }]);
        runner.run_pending();
        let cam = arlo.lookup_camera_by_id("C1").unwrap();
        assert_eq!(arlo.recordings().len(), 1);
        assert_eq!(arlo.recordings_for(&cam).len(), 1);
    }
}
