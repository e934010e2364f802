use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use playwatch_core::{
    build_router, schedule_is_valid, HttpMediaServer, LocationResolver, PrefixTableResolver,
    Scheduler, ServerConfig, SqliteStore, TokenAuthenticator, UnknownLocation,
};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let defaults = ServerConfig::default();

    let config = ServerConfig {
        bind: parse_socket("PLAYWATCH_BIND", defaults.bind),
        upstream_url: required("PLAYWATCH_UPSTREAM_URL")?,
        upstream_api_key: required("PLAYWATCH_UPSTREAM_API_KEY")?,
        upstream_timeout: parse_duration(
            "PLAYWATCH_UPSTREAM_TIMEOUT_SECS",
            defaults.upstream_timeout,
        ),
        backup_dir: parse_path("PLAYWATCH_BACKUP_DIR", defaults.backup_dir),
        backup_prefix: parse_string("PLAYWATCH_BACKUP_PREFIX", defaults.backup_prefix),
        db_path: parse_path("PLAYWATCH_DB_PATH", defaults.db_path),
        poll_interval: parse_duration("PLAYWATCH_POLL_SECS", defaults.poll_interval),
        sync_schedule: parse_schedule("PLAYWATCH_SYNC_SCHEDULE", defaults.sync_schedule),
        backup_schedule: parse_schedule("PLAYWATCH_BACKUP_SCHEDULE", defaults.backup_schedule),
        admin_token: optional("PLAYWATCH_ADMIN_TOKEN"),
        viewer_token: optional("PLAYWATCH_VIEWER_TOKEN"),
        geo_table: optional("PLAYWATCH_GEO_TABLE").map(PathBuf::from),
    };

    if config.admin_token.is_none() {
        tracing::warn!("PLAYWATCH_ADMIN_TOKEN is not set; admin routes will reject every request");
    }

    let store = Arc::new(SqliteStore::open(&config.db_path)?);
    let upstream = Arc::new(HttpMediaServer::new(
        &config.upstream_url,
        &config.upstream_api_key,
        config.upstream_timeout,
    )?);
    let locations = load_locations(config.geo_table.as_deref());

    let scheduler = Arc::new(Scheduler::new(&config, upstream, store, locations)?);
    let handle = scheduler.start()?;

    let auth = TokenAuthenticator::new(config.admin_token.clone(), config.viewer_token.clone());
    let app = build_router(scheduler, auth);

    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!(
        addr = %config.bind,
        upstream = %config.upstream_url,
        db = %config.db_path.display(),
        backups = %config.backup_dir.display(),
        "listening"
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %err, "failed to listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await;

    handle.shutdown();
    served?;
    Ok(())
}

fn load_locations(path: Option<&Path>) -> Arc<dyn LocationResolver> {
    let Some(path) = path else {
        return Arc::new(UnknownLocation);
    };
    if !path.exists() {
        tracing::warn!(path = %path.display(), "location table not found; locations disabled");
        return Arc::new(UnknownLocation);
    }
    match PrefixTableResolver::load(path) {
        Ok(table) => {
            tracing::info!(path = %path.display(), entries = table.len(), "location table loaded");
            Arc::new(table)
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to load location table");
            Arc::new(UnknownLocation)
        }
    }
}

fn required(key: &str) -> Result<String, String> {
    optional(key).ok_or_else(|| format!("{key} must be set"))
}

fn optional(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_socket(key: &str, default: SocketAddr) -> SocketAddr {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_duration(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .ok()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_path(key: &str, default: PathBuf) -> PathBuf {
    optional(key).map(PathBuf::from).unwrap_or(default)
}

fn parse_string(key: &str, default: String) -> String {
    optional(key).unwrap_or(default)
}

fn parse_schedule(key: &str, default: String) -> String {
    match optional(key) {
        Some(v) if schedule_is_valid(&v) => v,
        Some(v) => {
            tracing::warn!(key, value = %v, "invalid cron expression; using default");
            default
        }
        None => default,
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("PLAYWATCH_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("PLAYWATCH_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("info")
}
