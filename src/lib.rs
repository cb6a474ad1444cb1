pub mod config;
pub mod database_ops;
pub mod error;
pub mod job;
pub mod tracing;

pub mod util {
    pub mod db;
    pub mod env;
}

pub use config::FdcConfig;
pub use error::{IngestError, IngestResult};
