pub mod models {
    pub mod arlo;
}

pub mod arlo;
pub mod background;
pub mod client;
pub mod config;
pub mod storage;
pub mod utils;
pub mod services {
    pub mod classify;
    pub mod devices;
    pub mod media;
    pub mod refresh;
}

#[cfg(test)]
mod test_support;

use crate::arlo::Arlo;
use crate::config::{Config, load_env_file};
use log::{error, info};
use std::path::PathBuf;
use std::sync::mpsc;

#[derive(Debug)]
struct LoadedEnvFile {
    path: PathBuf,
    explicit: bool,
    applied: usize,
}

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (name={}, host={}, storage_dir={}, fast={}s, slow={}s, device_reload={}, library_days={}, workers={})",
        cfg.name,
        cfg.host,
        cfg.storage_dir.display(),
        cfg.fast_refresh.as_secs(),
        cfg.slow_refresh.as_secs(),
        if cfg.refresh_devices_every.is_zero() {
            "off".to_string()
        } else {
            format!("{}h", cfg.refresh_devices_every.as_secs() / 3600)
        },
        cfg.library_days,
        cfg.worker_threads
    );

    // 2) Shutdown signal, installed before anything starts running in the background
    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .map_err(|e| format!("installing signal handler failed: {}", e))?;

    // 3) Discover devices and start the refresh cadences
    let arlo = Arlo::from_config(&cfg).map_err(|e| format!("startup failed: {}", e))?;
    info!(
        "Discovered {} base(s), {} camera(s), {} doorbell(s)",
        arlo.bases().len(),
        arlo.cameras().len(),
        arlo.doorbells().len()
    );

    // 4) Run until interrupted
    stop_rx
        .recv()
        .map_err(|e| format!("signal channel closed: {}", e))?;
    info!("Shutdown requested");
    arlo.stop();
    Ok(())
}

fn configure_env_from_cli() -> Result<Option<LoadedEnvFile>, String> {
    let mut args = std::env::args().skip(1);
    let mut env_file: Option<PathBuf> = None;

    while let Some(arg) = args.next() {
        let value = if arg == "--env-file" {
            Some(args.next().ok_or_else(|| "`--env-file` requires a path argument".to_string())?)
        } else if let Some(v) = arg.strip_prefix("--env-file=") {
            Some(v.to_string())
        } else {
            return Err(format!("unrecognised argument: {}", arg));
        };
        if env_file.is_some() {
            return Err("`--env-file` provided more than once".to_string());
        }
        env_file = value.filter(|v| !v.is_empty()).map(PathBuf::from);
        if env_file.is_none() {
            return Err("`--env-file` requires a path argument".to_string());
        }
    }

    let (path, explicit) = match env_file {
        Some(path) if path.is_file() => (path, true),
        Some(path) => return Err(format!("env file not found: {}", path.display())),
        None => {
            let cwd = std::env::current_dir().map_err(|e| format!("unable to read current directory: {}", e))?;
            let default_path = cwd.join(".env");
            if !default_path.is_file() {
                return Ok(None);
            }
            (default_path, false)
        }
    };
    let applied = load_env_file(&path)?;
    Ok(Some(LoadedEnvFile { path, explicit, applied }))
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!(
            "Environment loaded from {} .env file: {} ({} variable(s) applied)",
            origin,
            info.path.display(),
            info.applied
        );
    }

    info!(
        "arlo-sync {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
