//! Runtime configuration from environment variables (optionally seeded from a `.env` file).

use crate::client::DEFAULT_HOST;
use crate::services::media::DEFAULT_LIBRARY_DAYS;
use crate::services::refresh::{FAST_REFRESH_INTERVAL, SLOW_REFRESH_INTERVAL};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_NAME: &str = "aarlo";
pub const DEFAULT_STORAGE_DIR: &str = "./aarlo";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
/// Upper bound for every configured interval, so deadlines never overflow an `Instant`.
pub const MAX_INTERVAL: Duration = Duration::from_secs(366 * 24 * 3600);

#[derive(Debug, Clone)]
pub struct Config {
    /// Session token of an already authenticated web session.
    pub token: String,
    /// Account user id; falls back to the `userId` of each device when unset.
    pub user_id: Option<String>,
    pub host: String,
    /// Instance name; also names the state file.
    pub name: String,
    pub storage_dir: PathBuf,
    pub fast_refresh: Duration,
    pub slow_refresh: Duration,
    /// Zero disables periodic device reloads.
    pub refresh_devices_every: Duration,
    pub library_days: u32,
    pub request_timeout: Duration,
    pub worker_threads: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let token = var("ARLO_TOKEN").ok_or_else(|| "Missing session token: set ARLO_TOKEN".to_string())?;
        let secs = |key: &str, default: u64| parse_or(var(key), key, default).and_then(|s| bounded(key, s));

        let fast_refresh = secs("ARLO_FAST_REFRESH_SECS", FAST_REFRESH_INTERVAL.as_secs())?;
        let slow_refresh = secs("ARLO_SLOW_REFRESH_SECS", SLOW_REFRESH_INTERVAL.as_secs())?;
        if fast_refresh.is_zero() || slow_refresh.is_zero() {
            return Err("ARLO_FAST_REFRESH_SECS and ARLO_SLOW_REFRESH_SECS must be positive".to_string());
        }
        let reload_hours: u64 = parse_or(var("ARLO_REFRESH_DEVICES_EVERY_HOURS"), "ARLO_REFRESH_DEVICES_EVERY_HOURS", 0)?;
        let refresh_devices_every = reload_hours
            .checked_mul(3600)
            .ok_or_else(|| format!("ARLO_REFRESH_DEVICES_EVERY_HOURS is too large, got {}", reload_hours))
            .and_then(|s| bounded("ARLO_REFRESH_DEVICES_EVERY_HOURS", s))?;

        Ok(Config {
            token,
            user_id: var("ARLO_USER_ID"),
            host: var("ARLO_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            name: var("ARLO_NAME").unwrap_or_else(|| DEFAULT_NAME.to_string()),
            storage_dir: PathBuf::from(var("ARLO_STORAGE_DIR").unwrap_or_else(|| DEFAULT_STORAGE_DIR.to_string())),
            fast_refresh,
            slow_refresh,
            refresh_devices_every,
            library_days: parse_or(var("ARLO_LIBRARY_DAYS"), "ARLO_LIBRARY_DAYS", DEFAULT_LIBRARY_DAYS)?,
            request_timeout: secs("ARLO_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            worker_threads: parse_or(var("ARLO_WORKER_THREADS"), "ARLO_WORKER_THREADS", 1)?,
        })
    }

    pub fn state_file(&self) -> PathBuf {
        self.storage_dir.join(format!("{}.json", self.name))
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, key: &str, default: T) -> Result<T, String> {
    match value {
        None => Ok(default),
        Some(v) => v
            .parse::<T>()
            .map_err(|_| format!("{} must be a non-negative integer, got {:?}", key, v)),
    }
}

fn bounded(key: &str, secs: u64) -> Result<Duration, String> {
    let value = Duration::from_secs(secs);
    if value > MAX_INTERVAL {
        return Err(format!(
            "{} is too large: {}s exceeds the {}s maximum",
            key,
            secs,
            MAX_INTERVAL.as_secs()
        ));
    }
    Ok(value)
}

/// Apply `KEY=value` lines from `path` to the process environment.
/// Variables already set in the environment win over the file.
pub fn load_env_file(path: &Path) -> Result<usize, String> {
    let content = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let mut applied = 0;
    for (index, line) in content.lines().enumerate() {
        let Some((key, value)) = parse_env_line(line).map_err(|e| format!("{}:{}: {}", path.display(), index + 1, e))?
        else {
            continue;
        };
        if std::env::var_os(&key).is_none() {
            // Only called from main before any other thread exists.
            unsafe {
                std::env::set_var(key, value);
            }
            applied += 1;
        }
    }
    Ok(applied)
}

/// Parse one `.env` line; `Ok(None)` for blanks and comments.
pub fn parse_env_line(line: &str) -> Result<Option<(String, String)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
    let (key, raw) = line.split_once('=').ok_or_else(|| "missing '=' in assignment".to_string())?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(format!("invalid variable name {:?}", key));
    }
    Ok(Some((key.to_string(), unquote(raw.trim())?)))
}

fn unquote(raw: &str) -> Result<String, String> {
    let Some(quote) = raw.chars().next().filter(|c| *c == '"' || *c == '\'') else {
        // unquoted: an inline comment ends the value
        return Ok(raw.split(" #").next().unwrap_or_default().trim_end().to_string());
    };
    let body = &raw[1..];
    let mut out = String::new();
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        if c == quote {
            let rest = body[i + 1..].trim();
            if !rest.is_empty() && !rest.starts_with('#') {
                return Err("unexpected characters after closing quote".to_string());
            }
            return Ok(out);
        }
        if c == '\\' && quote == '"' {
            match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, other)) => out.push(other),
                None => break,
            }
        } else {
            out.push(c);
        }
    }
    Err("unterminated quoted value".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_with_only_a_token() {
        let cfg = config(&[("ARLO_TOKEN", "abc")]).unwrap();
        assert_eq!(cfg.host, DEFAULT_HOST);
        assert_eq!(cfg.fast_refresh, FAST_REFRESH_INTERVAL);
        assert_eq!(cfg.slow_refresh, SLOW_REFRESH_INTERVAL);
        assert!(cfg.refresh_devices_every.is_zero());
        assert_eq!(cfg.library_days, DEFAULT_LIBRARY_DAYS);
        assert_eq!(cfg.worker_threads, 1);
        assert_eq!(cfg.user_id, None);
        assert_eq!(cfg.state_file(), PathBuf::from("./aarlo/aarlo.json"));
    }

    #[test]
    fn token_is_required() {
        assert!(config(&[]).is_err());
        assert!(config(&[("ARLO_TOKEN", "  ")]).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = config(&[
            ("ARLO_TOKEN", "abc"),
            ("ARLO_USER_ID", "U-1"),
            ("ARLO_NAME", "home"),
            ("ARLO_STORAGE_DIR", "/var/lib/arlo"),
            ("ARLO_REFRESH_DEVICES_EVERY_HOURS", "3"),
            ("ARLO_FAST_REFRESH_SECS", "30"),
            ("ARLO_WORKER_THREADS", "4"),
        ])
        .unwrap();
        assert_eq!(cfg.user_id.as_deref(), Some("U-1"));
        assert_eq!(cfg.refresh_devices_every, Duration::from_secs(3 * 3600));
        assert_eq!(cfg.fast_refresh, Duration::from_secs(30));
        assert_eq!(cfg.worker_threads, 4);
        assert_eq!(cfg.state_file(), PathBuf::from("/var/lib/arlo/home.json"));
    }

    #[test]
    fn bad_numbers_are_rejected() {
        assert!(config(&[("ARLO_TOKEN", "abc"), ("ARLO_LIBRARY_DAYS", "-1")]).is_err());
        assert!(config(&[("ARLO_TOKEN", "abc"), ("ARLO_SLOW_REFRESH_SECS", "0")]).is_err());
    }

    #[test]
    fn oversized_intervals_are_rejected() {
        let with = |key: &'static str, value: &'static str| config(&[("ARLO_TOKEN", "abc"), (key, value)]);
        assert!(with("ARLO_REFRESH_DEVICES_EVERY_HOURS", "18446744073709551").is_err());
        assert!(with("ARLO_REFRESH_DEVICES_EVERY_HOURS", "9000").is_err());
        assert!(with("ARLO_FAST_REFRESH_SECS", "18446744073709551615").is_err());
        assert!(with("ARLO_SLOW_REFRESH_SECS", "40000000").is_err());
        assert!(with("ARLO_REQUEST_TIMEOUT_SECS", "18446744073709551615").is_err());

        let cfg = with("ARLO_REFRESH_DEVICES_EVERY_HOURS", "8784").unwrap();
        assert_eq!(cfg.refresh_devices_every, MAX_INTERVAL);
        let cfg = with("ARLO_SLOW_REFRESH_SECS", "31622400").unwrap();
        assert_eq!(cfg.slow_refresh, MAX_INTERVAL);
    }

    #[test]
    fn env_lines() {
        assert_eq!(parse_env_line("  # comment").unwrap(), None);
        assert_eq!(parse_env_line("").unwrap(), None);
        assert_eq!(
            parse_env_line("export ARLO_NAME=home # trailing").unwrap(),
            Some(("ARLO_NAME".into(), "home".into()))
        );
        assert_eq!(
            parse_env_line(r#"ARLO_TOKEN="a\"b\nc""#).unwrap(),
            Some(("ARLO_TOKEN".into(), "a\"b\nc".into()))
        );
        assert_eq!(
            parse_env_line(r"ARLO_HOST='http://x\y' # note").unwrap(),
            Some(("ARLO_HOST".into(), r"http://x\y".into()))
        );
        assert_eq!(parse_env_line("EMPTY=").unwrap(), Some(("EMPTY".into(), String::new())));
        assert!(parse_env_line("NO_EQUALS").is_err());
        assert!(parse_env_line("BAD KEY=1").is_err());
        assert!(parse_env_line("X=\"open").is_err());
        assert!(parse_env_line("X='a' b").is_err());
    }
}
