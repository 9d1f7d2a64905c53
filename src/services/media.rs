//! In-memory index of the account's recent recordings.

use crate::client::{ArloClientError, RemoteClient};
use crate::models::arlo::{DeviceId, Recording};
use chrono::{DateTime, Days, NaiveDate};
use log::info;
use std::sync::{Arc, RwLock};

pub const DEFAULT_LIBRARY_DAYS: u32 = 30;

pub struct MediaLibrary {
    days: u32,
    recordings: RwLock<Arc<Vec<Recording>>>,
}

impl MediaLibrary {
    pub fn new(days: u32) -> Self {
        MediaLibrary {
            days: days.max(1),
            recordings: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Replace the index with the last `days` days of recordings, `today` included.
    pub fn load(&self, client: &dyn RemoteClient, today: NaiveDate) -> Result<usize, ArloClientError> {
        let from = today
            .checked_sub_days(Days::new(u64::from(self.days - 1)))
            .unwrap_or(today);
        let mut recordings = client.fetch_library(from, today)?;
        recordings.sort_by(|a, b| b.local_created_date.cmp(&a.local_created_date));
        let count = recordings.len();
        *self.recordings.write().unwrap_or_else(|p| p.into_inner()) = Arc::new(recordings);
        info!("Media library: loaded {} recording(s) from {} to {}", count, from, today);
        Ok(count)
    }

    /// Snapshot of every recording, newest first.
    pub fn recordings(&self) -> Arc<Vec<Recording>> {
        Arc::clone(&self.recordings.read().unwrap_or_else(|p| p.into_inner()))
    }

    /// Recordings of one camera, newest first.
    pub fn recordings_for(&self, device_id: &DeviceId) -> Vec<Recording> {
        self.recordings()
            .iter()
            .filter(|r| &r.device_id == device_id)
            .cloned()
            .collect()
    }

    /// Recordings captured on `date`. Creation times are device-local epoch millis.
    pub fn count_on(recordings: &[Recording], date: NaiveDate) -> usize {
        recordings
            .iter()
            .filter(|r| {
                DateTime::from_timestamp_millis(r.local_created_date)
                    .map(|ts| ts.naive_utc().date() == date)
                    .unwrap_or(false)
            })
            .count()
    }
}
