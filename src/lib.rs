pub mod analytics;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod pipeline;
pub mod snapshot;
pub mod source;
pub mod types;

pub use db::Store;
pub use error::{EtlError, Result};
pub use pipeline::{Pipeline, RunReport};
