//! Models of the watched API objects and the binaries' config files.
//!
//! Field names follow the Kubernetes wire format (camelCase), so manifests
//! and API payloads deserialize directly.

pub mod config;
pub mod endpoint;
pub mod gateway;
pub mod ingress;
pub mod meta;
pub mod multicluster;
pub mod namespace;
pub mod object;
pub mod route;
pub mod secret;
pub mod service;
pub mod validate;

pub use meta::{Condition, ConditionStatus, NamespacedName, ObjectMeta};
pub use object::{Kind, Object};
