#![forbid(unsafe_code)]

mod error;

pub use error::*;

/// Nome padrão da thread do worker.
pub const DEFAULT_WORKER_NAME: &str = "ttlcache-worker";
