//! Server settings, loaded from the environment

use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Process-wide settings; per-run values arrive in the request body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: Ipv4Addr,
    pub port: u16,

    /// Service account key file used for every run
    pub credentials_path: Option<PathBuf>,

    /// Write `column_updates_<run_id>.log` for every run
    pub enable_local_log: bool,

    pub log_dir: PathBuf,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0),
            port: 8080,
            credentials_path: None,
            enable_local_log: true,
            log_dir: PathBuf::from("."),
        }
    }
}

impl ServerSettings {
    /// Load settings from environment variables (and `.env`)
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Self {
            host: std::env::var("HOST")
                .ok()
                .and_then(|h| h.parse().ok())
                .unwrap_or(defaults.host),
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            credentials_path: std::env::var("GOOGLE_APPLICATION_CREDENTIALS")
                .ok()
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            enable_local_log: std::env::var("COLSYNC_LOCAL_LOG")
                .ok()
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.enable_local_log),
            log_dir: std::env::var("COLSYNC_LOG_DIR")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
