use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind address (default: 127.0.0.1:3000).
    pub bind: SocketAddr,
    /// Base URL of the upstream media server, e.g. `http://jellyfin:8096/`.
    pub upstream_url: String,
    /// API key sent to the upstream in a request header.
    pub upstream_api_key: String,
    /// Bound on every upstream call.
    pub upstream_timeout: Duration,
    /// Directory holding backup artifacts.
    pub backup_dir: PathBuf,
    /// File name prefix for backup artifacts.
    pub backup_prefix: String,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Interval between active-session polls.
    pub poll_interval: Duration,
    /// Cron expression (seconds field first, UTC) for the library sync.
    pub sync_schedule: String,
    /// Cron expression (seconds field first, UTC) for the automatic backup.
    pub backup_schedule: String,
    /// Bearer token granting the admin role.
    pub admin_token: Option<String>,
    /// Bearer token granting read-only access.
    pub viewer_token: Option<String>,
    /// Optional `prefix,location` table used to label remote addresses.
    pub geo_table: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000),
            upstream_url: String::new(),
            upstream_api_key: String::new(),
            upstream_timeout: Duration::from_secs(10),
            backup_dir: PathBuf::from("backups"),
            backup_prefix: "playwatch".to_string(),
            db_path: PathBuf::from("playwatch.db"),
            poll_interval: Duration::from_secs(15),
            sync_schedule: "0 0 3 * * *".to_string(),
            backup_schedule: "0 30 3 * * *".to_string(),
            admin_token: None,
            viewer_token: None,
            geo_table: None,
        }
    }
}
