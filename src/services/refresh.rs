//! Device discovery and the fast/slow refresh cadences.
//!
//! Startup runs on the caller's thread: the inventory is fetched and classified
//! before anything is queued, so every job sees a populated device set. After
//! that all work happens in jobs on the shared [`TaskRunner`]. Jobs hold only a
//! weak reference to the scheduler and become no-ops once it is stopped.

use crate::background::{Job, JobResult, RecurringJob, TaskRunner};
use crate::client::{ArloClientError, RemoteClient};
use crate::models::arlo::RawDevice;
use crate::services::classify::{Inventory, classify, persist_metadata};
use crate::services::devices;
use crate::services::media::MediaLibrary;
use crate::storage::{ARLO_NAMESPACE, StateStore, TOTAL_BELLS_KEY, TOTAL_CAMERAS_KEY};
use crate::utils::{Clock, arlo_time};
use chrono::NaiveDate;
use log::{debug, error, info, warn};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

pub const FAST_REFRESH_INTERVAL: Duration = Duration::from_secs(60);
pub const SLOW_REFRESH_INTERVAL: Duration = Duration::from_secs(10 * 60);

// Startup work is staggered to stay under the backend's rate limits.
const THUMBNAIL_DELAY: Duration = Duration::from_secs(2);
const CAMERA_MEDIA_DELAY: Duration = Duration::from_secs(2);
const INITIAL_REFRESH_DELAY: Duration = Duration::from_secs(5);
const MEDIA_LIBRARY_DELAY: Duration = Duration::from_secs(10);

/// Job names, as they appear in logs.
pub mod jobs {
    pub const PING_BASE: &str = "ping-base";
    pub const SAVE_STATE: &str = "save-state";
    pub const CAMERA_THUMBNAILS: &str = "refresh-camera-thumbnails";
    pub const CAMERA_MEDIA: &str = "refresh-camera-media";
    pub const INITIAL_REFRESH: &str = "initial-refresh";
    pub const MEDIA_LIBRARY: &str = "load-media-library";
    pub const REFRESH_BASES: &str = "refresh-bases";
    pub const AMBIENT_SENSORS: &str = "refresh-ambient-sensors";
    pub const RELOAD_DEVICES: &str = "reload-devices";
    pub const FAST_REFRESH: &str = "fast-refresh";
    pub const SLOW_REFRESH: &str = "slow-refresh";
}

#[derive(Debug, Clone)]
pub struct Cadences {
    pub fast: Duration,
    pub slow: Duration,
    /// `Duration::ZERO` disables device reloads for the lifetime of the scheduler.
    pub reload_devices_every: Duration,
    /// Where camera thumbnails are written; `None` keeps only the remote reference.
    pub thumbnail_dir: Option<PathBuf>,
}

impl Default for Cadences {
    fn default() -> Self {
        Cadences {
            fast: FAST_REFRESH_INTERVAL,
            slow: SLOW_REFRESH_INTERVAL,
            reload_devices_every: Duration::ZERO,
            thumbnail_dir: None,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Starting,
    Steady,
    Stopped,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScheduleState {
    /// Calendar date seen by the last fast tick.
    pub today: NaiveDate,
    /// `None` when device reloads are disabled. Only ever moves forward.
    pub next_device_reload: Option<Instant>,
}

pub struct RefreshScheduler {
    client: Arc<dyn RemoteClient>,
    store: Arc<dyn StateStore>,
    runner: Arc<dyn TaskRunner>,
    clock: Arc<dyn Clock>,
    library: MediaLibrary,
    cadences: Cadences,
    inventory: RwLock<Arc<Inventory>>,
    schedule: Mutex<ScheduleState>,
    lifecycle: Mutex<Lifecycle>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl RefreshScheduler {
    pub fn new(
        client: Arc<dyn RemoteClient>,
        store: Arc<dyn StateStore>,
        runner: Arc<dyn TaskRunner>,
        clock: Arc<dyn Clock>,
        library: MediaLibrary,
        cadences: Cadences,
    ) -> Arc<Self> {
        let today = clock.today();
        Arc::new(RefreshScheduler {
            client,
            store,
            runner,
            clock,
            library,
            cadences,
            inventory: RwLock::new(Arc::new(Inventory::default())),
            schedule: Mutex::new(ScheduleState {
                today,
                next_device_reload: None,
            }),
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        *lock(&self.lifecycle)
    }

    pub fn is_stopped(&self) -> bool {
        self.lifecycle() == Lifecycle::Stopped
    }

    /// Current device collections. Readers may see a view one reload behind.
    pub fn inventory(&self) -> Arc<Inventory> {
        Arc::clone(&self.inventory.read().unwrap_or_else(|p| p.into_inner()))
    }

    #[cfg(test)]
    pub fn schedule(&self) -> ScheduleState {
        *lock(&self.schedule)
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn client(&self) -> &dyn RemoteClient {
        self.client.as_ref()
    }

    pub fn library(&self) -> &MediaLibrary {
        &self.library
    }

    /// Load the inventory, queue the startup work and register the cadences.
    ///
    /// A failed inventory fetch leaves the scheduler uninitialized with nothing queued.
    pub fn start(self: &Arc<Self>) -> Result<(), ArloClientError> {
        {
            let mut state = lock(&self.lifecycle);
            if *state != Lifecycle::Uninitialized {
                warn!("Refresh: start() called while {:?}; ignoring", *state);
                return Ok(());
            }
            *state = Lifecycle::Starting;
        }
        info!("Refresh: loading device inventory");
        let raw = match self.client.fetch_devices(arlo_time()) {
            Ok(raw) => raw,
            Err(e) => {
                *lock(&self.lifecycle) = Lifecycle::Uninitialized;
                return Err(e);
            }
        };
        self.publish_inventory(&raw);

        {
            let mut schedule = lock(&self.schedule);
            schedule.today = self.clock.today();
            schedule.next_device_reload = self.reload_enabled().then(|| self.clock.now() + self.cadences.reload_devices_every);
        }

        // Reachability checks go out before anything else.
        self.ping_bases();

        debug!("Refresh: queueing initial settings and state retrieval");
        self.enqueue(jobs::CAMERA_THUMBNAILS, THUMBNAIL_DELAY, |s| s.refresh_camera_thumbnails());
        self.enqueue(jobs::CAMERA_MEDIA, CAMERA_MEDIA_DELAY, |s| s.refresh_camera_media());
        self.enqueue(jobs::INITIAL_REFRESH, INITIAL_REFRESH_DELAY, |s| {
            s.initial_refresh();
            Ok(())
        });
        self.enqueue(jobs::MEDIA_LIBRARY, MEDIA_LIBRARY_DELAY, |s| s.load_media_library());

        debug!(
            "Refresh: registering cadences (fast={}s, slow={}s)",
            self.cadences.fast.as_secs(),
            self.cadences.slow.as_secs()
        );
        self.every(jobs::FAST_REFRESH, self.cadences.fast, |s| s.fast_tick());
        self.every(jobs::SLOW_REFRESH, self.cadences.slow, |s| s.slow_tick());

        *lock(&self.lifecycle) = Lifecycle::Steady;
        info!("Refresh: steady");
        Ok(())
    }

    /// Queue a one-shot job bound to this scheduler.
    fn enqueue<F>(self: &Arc<Self>, name: &'static str, delay: Duration, work: F)
    where
        F: FnOnce(&Arc<RefreshScheduler>) -> JobResult + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let job = Job::new(name, move || match weak.upgrade() {
            Some(s) if !s.is_stopped() => work(&s),
            _ => Ok(()),
        });
        self.runner.run_after(job, delay);
    }

    fn every<F>(self: &Arc<Self>, name: &'static str, period: Duration, tick: F)
    where
        F: Fn(&Arc<RefreshScheduler>) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(self);
        let job = RecurringJob::new(name, move || {
            if let Some(s) = weak.upgrade() {
                tick(&s);
            }
            Ok(())
        });
        self.runner.run_every(job, period);
    }

    fn reload_enabled(&self) -> bool {
        !self.cadences.reload_devices_every.is_zero()
    }

    /// Persist metadata, classify and swap in the new collections.
    fn publish_inventory(&self, raw: &[RawDevice]) {
        persist_metadata(raw, self.store.as_ref());
        let inventory = classify(raw);
        info!(
            "Refresh: {} device(s) in inventory: {} base(s), {} camera(s), {} doorbell(s)",
            raw.len(),
            inventory.bases.len(),
            inventory.cameras.len(),
            inventory.doorbells.len()
        );
        self.store
            .set(&[ARLO_NAMESPACE, TOTAL_CAMERAS_KEY], json!(inventory.cameras.len()));
        self.store
            .set(&[ARLO_NAMESPACE, TOTAL_BELLS_KEY], json!(inventory.doorbells.len()));
        *self.inventory.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(inventory);
    }

    /// One independent job per base, so an unreachable base cannot hold up the others.
    pub fn ping_bases(self: &Arc<Self>) {
        for base in self.inventory().bases.iter().cloned() {
            self.enqueue(jobs::PING_BASE, Duration::ZERO, move |s| {
                s.client
                    .ping(&base)
                    .map_err(|e| format!("ping {} ({}) failed: {}", base.name, base.device_id, e))
            });
        }
    }

    pub fn fast_tick(self: &Arc<Self>) {
        if self.is_stopped() {
            return;
        }
        debug!("Refresh: fast tick");
        self.enqueue(jobs::SAVE_STATE, Duration::ZERO, |s| {
            s.store.save().map_err(|e| format!("state save failed: {}", e))
        });
        self.ping_bases();

        let today = self.clock.today();
        let rolled_over = {
            let mut schedule = lock(&self.schedule);
            if schedule.today != today {
                info!("Refresh: day changed from {} to {}", schedule.today, today);
                schedule.today = today;
                true
            } else {
                false
            }
        };
        if rolled_over {
            self.enqueue(jobs::MEDIA_LIBRARY, Duration::ZERO, |s| s.load_media_library());
            self.enqueue(jobs::CAMERA_MEDIA, Duration::ZERO, |s| s.refresh_camera_media());
        }
    }

    pub fn slow_tick(self: &Arc<Self>) {
        if self.is_stopped() {
            return;
        }
        debug!("Refresh: slow tick");
        self.enqueue(jobs::REFRESH_BASES, Duration::ZERO, |s| s.refresh_bases(false));
        self.enqueue(jobs::AMBIENT_SENSORS, Duration::ZERO, |s| s.refresh_ambient_sensors());
        if self.take_device_reload() {
            self.enqueue(jobs::RELOAD_DEVICES, Duration::ZERO, |s| s.reload_devices());
        }
    }

    /// True when a reload is due; the deadline then moves forward by exactly one interval.
    fn take_device_reload(&self) -> bool {
        let mut schedule = lock(&self.schedule);
        let Some(deadline) = schedule.next_device_reload else {
            debug!("Refresh: device reload disabled");
            return false;
        };
        let now = self.clock.now();
        if now < deadline {
            return false;
        }
        schedule.next_device_reload = Some(deadline + self.cadences.reload_devices_every);
        debug!("Refresh: device reload due");
        true
    }

    pub fn initial_refresh(self: &Arc<Self>) {
        debug!("Refresh: initial refresh");
        self.enqueue(jobs::REFRESH_BASES, Duration::ZERO, |s| s.refresh_bases(true));
        self.enqueue(jobs::AMBIENT_SENSORS, Duration::ZERO, |s| s.refresh_ambient_sensors());
    }

    /// Re-pull mode lists and ask every base to republish its devices.
    /// The active mode is only fetched on the initial refresh.
    pub fn refresh_bases(&self, initial: bool) -> JobResult {
        let inventory = self.inventory();
        let modes = if initial && !inventory.bases.is_empty() {
            match self.client.fetch_active_modes() {
                Ok(modes) => Some(modes),
                Err(e) => {
                    warn!("Refresh: active modes unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };

        for base in &inventory.bases {
            if let Err(e) = devices::update_modes(self.client.as_ref(), base) {
                warn!("Refresh: modes for base {} failed: {}", base.device_id, e);
            }
            if let Some(modes) = &modes {
                devices::apply_active_mode(self.store.as_ref(), base, modes);
            }
            if let Err(e) = devices::request_device_lists(self.client.as_ref(), base) {
                warn!("Refresh: device lists for base {} failed: {}", base.device_id, e);
            }
        }
        Ok(())
    }

    pub fn refresh_ambient_sensors(&self) -> JobResult {
        let inventory = self.inventory();
        for camera in &inventory.cameras {
            if let Err(e) = devices::update_ambient_sensors(self.client.as_ref(), camera, &inventory.bases) {
                warn!("Refresh: ambient sensors for {} failed: {}", camera.device_id, e);
            }
        }
        Ok(())
    }

    pub fn refresh_camera_thumbnails(&self) -> JobResult {
        let dir = self.cadences.thumbnail_dir.as_deref();
        for camera in &self.inventory().cameras {
            if let Err(e) = devices::update_last_image(self.client.as_ref(), self.store.as_ref(), camera, dir) {
                warn!("Refresh: {}", e);
            }
        }
        Ok(())
    }

    pub fn refresh_camera_media(&self) -> JobResult {
        let today = self.clock.today();
        for camera in &self.inventory().cameras {
            devices::update_media(self.store.as_ref(), camera, &self.library, today);
        }
        Ok(())
    }

    pub fn load_media_library(&self) -> JobResult {
        self.library
            .load(self.client.as_ref(), self.clock.today())
            .map(|_| ())
            .map_err(|e| format!("media library load failed: {}", e))
    }

    /// Re-fetch the inventory and swap in the re-classified collections.
    /// On failure the current collections stay; the next attempt is at the next deadline.
    pub fn reload_devices(&self) -> JobResult {
        match self.client.fetch_devices(arlo_time()) {
            Ok(raw) => {
                self.publish_inventory(&raw);
                Ok(())
            }
            Err(e) => Err(format!(
                "device reload failed, keeping {} known base(s): {}",
                self.inventory().bases.len(),
                e
            )),
        }
    }

    /// Stop the cadences, flush state and end the remote session. Safe to call twice.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.lifecycle);
            if *state == Lifecycle::Stopped {
                return;
            }
            *state = Lifecycle::Stopped;
        }
        info!("Refresh: stopping");
        self.runner.stop();
        if let Err(e) = self.store.save() {
            error!("Refresh: final state save failed: {}", e);
        }
        if let Err(e) = self.client.logout() {
            warn!("Refresh: logout failed: {}", e);
        }
    }
}
