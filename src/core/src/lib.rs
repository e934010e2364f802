mod auth;
mod config;
mod error;
pub mod jobs;
pub mod monitor;
mod scheduler;
mod server;
pub mod storage;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use playwatch_protocol as protocol;

pub use auth::{AuthOutcome, Authenticator, Principal, Role, TokenAuthenticator};
pub use config::ServerConfig;
pub use error::EngineError;
pub use jobs::{BackupJob, JobKind, JobSlots, LibrarySync};
pub use monitor::{
    classify_device, LocationResolver, PrefixTableResolver, SessionEvent, SessionReconciler,
    UnknownLocation,
};
pub use scheduler::{schedule_is_valid, Scheduler, SchedulerHandle};
pub use server::build_router;
pub use storage::{SqliteStore, Store};
pub use upstream::{HttpMediaServer, ItemImage, MediaServer, PlaybackSession, API_KEY_HEADER};
