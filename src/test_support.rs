//! Test doubles for the remote service, the work queue and the clock.

use crate::background::{Job, RecurringJob, TaskRunner};
use crate::client::{ArloClientError, RemoteClient};
use crate::models::arlo::{ActiveMode, DeviceRecord, NotifyBody, RawDevice, Recording};
use crate::utils::Clock;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Default)]
struct FakeState {
    devices: Vec<RawDevice>,
    fail_devices: bool,
    device_fetches: usize,
    pings: Vec<String>,
    unreachable: Vec<String>,
    notified: Vec<(String, String)>,
    active_modes: Vec<ActiveMode>,
    active_mode_fetches: usize,
    library: Vec<Recording>,
    fail_library: bool,
    library_requests: Vec<(NaiveDate, NaiveDate)>,
    logged_out: bool,
}

#[derive(Default)]
pub struct FakeClient {
    state: Mutex<FakeState>,
}

impl FakeClient {
    pub const IMAGE: &'static [u8] = b"\xff\xd8\xff\xe0fake-jpeg";

    pub fn with_devices(devices: Vec<serde_json::Value>) -> Self {
        let client = FakeClient::default();
        client.set_devices(devices);
        client
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_devices(&self, devices: Vec<serde_json::Value>) {
        self.lock().devices = devices.into_iter().map(RawDevice::from).collect();
    }

    pub fn fail_devices(&self, fail: bool) {
        self.lock().fail_devices = fail;
    }

    pub fn device_fetches(&self) -> usize {
        self.lock().device_fetches
    }

    /// Make pings and notifications to `device_id` fail.
    pub fn set_unreachable(&self, device_id: &str) {
        self.lock().unreachable.push(device_id.to_string());
    }

    pub fn pings(&self) -> Vec<String> {
        self.lock().pings.clone()
    }

    /// (base id, resource) of every notification, in order.
    pub fn notified(&self) -> Vec<(String, String)> {
        self.lock().notified.clone()
    }

    pub fn set_active_modes(&self, modes: Vec<ActiveMode>) {
        self.lock().active_modes = modes;
    }

    pub fn active_mode_fetches(&self) -> usize {
        self.lock().active_mode_fetches
    }

    pub fn set_library(&self, recordings: Vec<Recording>) {
        self.lock().library = recordings;
    }

    pub fn fail_library(&self, fail: bool) {
        self.lock().fail_library = fail;
    }

    pub fn library_requests(&self) -> Vec<(NaiveDate, NaiveDate)> {
        self.lock().library_requests.clone()
    }

    pub fn logged_out(&self) -> bool {
        self.lock().logged_out
    }
}

impl RemoteClient for FakeClient {
    fn fetch_devices(&self, _timestamp_ms: i64) -> Result<Vec<RawDevice>, ArloClientError> {
        let mut s = self.lock();
        s.device_fetches += 1;
        if s.fail_devices {
            return Err(ArloClientError::Http { status: 401 });
        }
        Ok(s.devices.clone())
    }

    fn ping(&self, base: &DeviceRecord) -> Result<(), ArloClientError> {
        let mut s = self.lock();
        if s.unreachable.contains(&base.device_id.0) {
            return Err(ArloClientError::Transport("unreachable".into()));
        }
        s.pings.push(base.device_id.0.clone());
        Ok(())
    }

    fn notify(&self, base: &DeviceRecord, body: &NotifyBody) -> Result<(), ArloClientError> {
        let mut s = self.lock();
        if s.unreachable.contains(&base.device_id.0) {
            return Err(ArloClientError::Transport("unreachable".into()));
        }
        s.notified.push((base.device_id.0.clone(), body.resource.clone()));
        Ok(())
    }

    fn fetch_active_modes(&self) -> Result<Vec<ActiveMode>, ArloClientError> {
        let mut s = self.lock();
        s.active_mode_fetches += 1;
        Ok(s.active_modes.clone())
    }

    fn fetch_library(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Recording>, ArloClientError> {
        let mut s = self.lock();
        s.library_requests.push((from, to));
        if s.fail_library {
            return Err(ArloClientError::Http { status: 500 });
        }
        Ok(s.library.clone())
    }

    fn fetch_bytes(&self, _url: &str) -> Result<Vec<u8>, ArloClientError> {
        Ok(Self::IMAGE.to_vec())
    }

    fn logout(&self) -> Result<(), ArloClientError> {
        self.lock().logged_out = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.lock().logged_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    Now,
    After(Duration),
    Every(Duration),
}

#[derive(Default)]
struct RunnerState {
    log: Vec<(&'static str, Scheduled)>,
    pending: VecDeque<Job>,
    recurring: Vec<RecurringJob>,
    stopped: bool,
}

/// Runner that records submissions and only executes jobs when told to.
#[derive(Default)]
pub struct RecordingRunner {
    state: Mutex<RunnerState>,
}

impl RecordingRunner {
    fn lock(&self) -> std::sync::MutexGuard<'_, RunnerState> {
        self.state.lock().unwrap()
    }

    pub fn log(&self) -> Vec<(&'static str, Scheduled)> {
        self.lock().log.clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.lock().log.iter().filter(|(n, _)| *n == name).count()
    }

    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Run queued one-shot jobs (and whatever they enqueue) until the queue is empty.
    /// Returns the names of jobs that failed.
    pub fn run_pending(&self) -> Vec<&'static str> {
        let mut failed = Vec::new();
        loop {
            let Some(job) = self.lock().pending.pop_front() else {
                return failed;
            };
            let name = job.name();
            if job.run().is_err() {
                failed.push(name);
            }
        }
    }

    pub fn recurring(&self) -> Vec<RecurringJob> {
        self.lock().recurring.clone()
    }

    fn submit(&self, name: &'static str, when: Scheduled) -> bool {
        let mut s = self.lock();
        if s.stopped {
            return false;
        }
        s.log.push((name, when));
        true
    }
}

impl TaskRunner for RecordingRunner {
    fn run_after(&self, job: Job, delay: Duration) {
        let when = if delay.is_zero() {
            Scheduled::Now
        } else {
            Scheduled::After(delay)
        };
        if self.submit(job.name(), when) {
            self.lock().pending.push_back(job);
        }
    }

    fn run_every(&self, job: RecurringJob, period: Duration) {
        if self.submit(job.name(), Scheduled::Every(period)) {
            self.lock().recurring.push(job);
        }
    }

    fn stop(&self) {
        let mut s = self.lock();
        s.stopped = true;
        s.pending.clear();
    }
}

/// Clock whose date and monotonic time only move when a test moves them.
pub struct ManualClock {
    state: Mutex<(NaiveDate, Instant)>,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Self {
        ManualClock {
            state: Mutex::new((today, Instant::now())),
        }
    }

    pub fn set_today(&self, today: NaiveDate) {
        self.state.lock().unwrap().0 = today;
    }

    pub fn advance(&self, by: Duration) {
        self.state.lock().unwrap().1 += by;
    }
}

impl Clock for ManualClock {
    fn today(&self) -> NaiveDate {
        self.state.lock().unwrap().0
    }

    fn now(&self) -> Instant {
        self.state.lock().unwrap().1
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}
