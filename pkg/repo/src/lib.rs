//! Client for the proxy's content repository: a tree of versioned
//! codebases, each a directory of JSON files that may inherit from a parent.

pub mod client;
pub mod error;
pub mod retry;

#[cfg(any(test, feature = "test-util"))]
pub mod fake;

pub use client::{Batch, BatchItem, Derived, RepoClient};
pub use error::RepoError;
pub use retry::RetryConfig;
