//! HTTP client for the Arlo web API (the subset the refresh cadences drive).
//!
//! - Blocking client using `ureq` (no async).
//! - Session handling is out of scope: the caller supplies an already issued token.
//! - Notifications are fire-and-forget; replies arrive over the event stream, which
//!   this crate does not consume.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::models::arlo::*;
use crate::utils::{library_date, trans_id};

pub const DEFAULT_HOST: &str = "https://my.arlo.com";
const DEVICES_PATH: &str = "/hmsweb/users/devices";
const NOTIFY_PATH: &str = "/hmsweb/users/devices/notify";
const AUTOMATION_PATH: &str = "/hmsweb/users/devices/automation/active";
const LIBRARY_PATH: &str = "/hmsweb/users/library";
const LOGOUT_PATH: &str = "/hmsweb/logout";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:143.0) Gecko/20100101 Firefox/143.0";

#[derive(Debug)]
pub enum ArloClientError {
    Transport(String),
    Http { status: u16 },
    Json(String),
    /// The service answered with `success: false`.
    Api(String),
    /// Notification target has no cloud id to address it by.
    Unaddressable(DeviceId),
}

impl core::fmt::Display for ArloClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ArloClientError::Transport(s) => write!(f, "transport error: {}", s),
            ArloClientError::Http { status } => write!(f, "http {}", status),
            ArloClientError::Json(s) => write!(f, "json error: {}", s),
            ArloClientError::Api(s) => write!(f, "api error: {}", s),
            ArloClientError::Unaddressable(id) => write!(f, "device {} has no xCloudId", id),
        }
    }
}

impl std::error::Error for ArloClientError {}

impl From<ureq::Error> for ArloClientError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::StatusCode(status) => ArloClientError::Http { status },
            ureq::Error::Json(e) => ArloClientError::Json(e.to_string()),
            other => ArloClientError::Transport(other.to_string()),
        }
    }
}

/// Operations the orchestrator needs from the remote service.
pub trait RemoteClient: Send + Sync {
    fn fetch_devices(&self, timestamp_ms: i64) -> Result<Vec<RawDevice>, ArloClientError>;
    /// Subscribe the session to a base so it keeps reporting.
    fn ping(&self, base: &DeviceRecord) -> Result<(), ArloClientError>;
    fn notify(&self, base: &DeviceRecord, body: &NotifyBody) -> Result<(), ArloClientError>;
    fn fetch_active_modes(&self) -> Result<Vec<ActiveMode>, ArloClientError>;
    fn fetch_library(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Recording>, ArloClientError>;
    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ArloClientError>;
    fn logout(&self) -> Result<(), ArloClientError>;
    fn is_connected(&self) -> bool;
}

pub struct ArloClient {
    agent: ureq::Agent,
    host: String,
    token: String,
    user_id: Option<String>,
    connected: AtomicBool,
}

impl ArloClient {
    pub fn new(
        host: impl Into<String>,
        token: impl Into<String>,
        user_id: Option<String>,
        timeout: Duration,
    ) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build()
            .into();
        ArloClient {
            agent,
            host: host.into().trim_end_matches('/').to_string(),
            token: token.into(),
            user_id,
            connected: AtomicBool::new(true),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    /// Unwrap the `{success, data}` envelope; a 401 marks the session as gone.
    fn read_envelope<T: DeserializeOwned>(
        &self,
        path: &str,
        result: Result<http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<Option<T>, ArloClientError> {
        let mut resp = match result {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(401)) => {
                self.connected.store(false, Ordering::SeqCst);
                return Err(ArloClientError::Http { status: 401 });
            }
            Err(e) => return Err(e.into()),
        };
        let envelope: ArloResponse<T> = resp.body_mut().read_json()?;
        if !envelope.success {
            return Err(ArloClientError::Api(format!("{} reported failure", path)));
        }
        Ok(envelope.data)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<Option<T>, ArloClientError> {
        let mut req = self
            .agent
            .get(&self.url(path))
            .header("Accept", "application/json")
            .header("Auth-Version", "2")
            .header("Authorization", &self.token)
            .header("User-Agent", USER_AGENT);
        for (k, v) in query {
            req = req.query(k, v);
        }
        self.read_envelope(path, req.call())
    }

    fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        x_cloud_id: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<Option<T>, ArloClientError> {
        let mut req = self
            .agent
            .post(&self.url(path))
            .header("Accept", "application/json")
            .header("Auth-Version", "2")
            .header("Authorization", &self.token)
            .header("User-Agent", USER_AGENT);
        if let Some(id) = x_cloud_id {
            req = req.header("xcloudId", id);
        }
        self.read_envelope(path, req.send_json(body))
    }

    fn user_id_for<'a>(&'a self, device: &'a DeviceRecord) -> &'a str {
        self.user_id
            .as_deref()
            .or(device.user_id.as_deref())
            .unwrap_or_default()
    }
}

impl RemoteClient for ArloClient {
    fn fetch_devices(&self, timestamp_ms: i64) -> Result<Vec<RawDevice>, ArloClientError> {
        let devices: Option<Vec<serde_json::Value>> =
            self.get_json(DEVICES_PATH, &[("t", timestamp_ms.to_string())])?;
        Ok(devices.unwrap_or_default().into_iter().map(RawDevice::from).collect())
    }

    fn ping(&self, base: &DeviceRecord) -> Result<(), ArloClientError> {
        let user_id = self.user_id_for(base);
        let body = NotifyBody::set(
            format!("subscriptions/{}_web", user_id),
            json!({ "devices": [base.device_id.as_str()] }),
        );
        self.notify(base, &body)
    }

    fn notify(&self, base: &DeviceRecord, body: &NotifyBody) -> Result<(), ArloClientError> {
        let x_cloud_id = base
            .x_cloud_id
            .as_deref()
            .ok_or_else(|| ArloClientError::Unaddressable(base.device_id.clone()))?;
        let mut payload = serde_json::to_value(body).map_err(|e| ArloClientError::Json(e.to_string()))?;
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("from".into(), json!(format!("{}_web", self.user_id_for(base))));
            obj.insert("to".into(), json!(base.device_id.as_str()));
            obj.insert("transId".into(), json!(trans_id()));
        }
        let path = format!("{}/{}", NOTIFY_PATH, base.device_id);
        self.post_json::<serde_json::Value>(&path, Some(x_cloud_id), &payload)?;
        Ok(())
    }

    fn fetch_active_modes(&self) -> Result<Vec<ActiveMode>, ArloClientError> {
        Ok(self.get_json(AUTOMATION_PATH, &[])?.unwrap_or_default())
    }

    fn fetch_library(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<Recording>, ArloClientError> {
        let body = json!({ "dateFrom": library_date(from), "dateTo": library_date(to) });
        Ok(self.post_json(LIBRARY_PATH, None, &body)?.unwrap_or_default())
    }

    fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ArloClientError> {
        let mut resp = self.agent.get(url).header("User-Agent", USER_AGENT).call()?;
        Ok(resp.body_mut().read_to_vec()?)
    }

    fn logout(&self) -> Result<(), ArloClientError> {
        let result = self
            .agent
            .put(&self.url(LOGOUT_PATH))
            .header("Auth-Version", "2")
            .header("Authorization", &self.token)
            .header("User-Agent", USER_AGENT)
            .send_empty();
        self.connected.store(false, Ordering::SeqCst);
        result?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
