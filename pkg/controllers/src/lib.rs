//! Background tasks of the per-cluster controller: watchers feeding the
//! cache, and the bounded-frequency runner publishing what it holds.

pub mod aggregator_client;
pub mod handler;
pub mod runner;
pub mod sync;
pub mod watch;

pub use aggregator_client::AggregatorClient;
pub use handler::EventHandler;
pub use runner::{BoundedFrequencyRunner, RunnerConfig, Runnable};
pub use sync::{SyncConfig, Syncer};
pub use watch::{MemorySource, WatchEvent, WatchSource, run_watchers};
