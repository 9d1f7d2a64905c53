use chrono::{Local, NaiveDate, Utc};
use rand::Rng;
use std::time::Instant;

/// Source of calendar and monotonic time for the refresh cadences.
pub trait Clock: Send + Sync {
    /// Current local calendar date; day rollover is detected against this.
    fn today(&self) -> NaiveDate;
    /// Monotonic time; device-reload deadlines are measured against this.
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Current time in the millisecond epoch format the Arlo API expects.
pub fn arlo_time() -> i64 {
    Utc::now().timestamp_millis()
}

/// Transaction id for a notification, e.g. `web!1a2b3c4d.5e6f70!1700000000000`.
pub fn trans_id() -> String {
    let mut rng = rand::rng();
    format!(
        "web!{:08x}.{:06x}!{}",
        rng.random::<u32>(),
        rng.random_range(0..0x0100_0000u32),
        arlo_time()
    )
}

/// `YYYYMMDD`, the date format of the library endpoint.
pub fn library_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trans_id_shape() {
        let id = trans_id();
        let parts: Vec<&str> = id.split('!').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "web");
        assert!(parts[1].contains('.'));
        assert!(parts[2].parse::<i64>().is_ok());
    }

    #[test]
    fn library_date_is_compact() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(library_date(d), "20240307");
    }
}
