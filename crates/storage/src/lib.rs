#![forbid(unsafe_code)]

mod clock;
mod command;
mod db;
mod entry;
mod store;
mod ttl;
mod worker;

pub use clock::{Clock, ManualClock, SystemClock};
pub use store::{StoreBuilder, TtlStore};
pub use ttl::Ttl;
pub use ttlcache_common::{DEFAULT_WORKER_NAME, StoreError, StoreResult};
