mod api;
mod backup;
pub mod decimal;
mod error;
mod model;

pub use api::*;
pub use backup::*;
pub use error::*;
pub use model::*;
