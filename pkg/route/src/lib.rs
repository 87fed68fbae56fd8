//! Route model: the documents published to the proxy repository and the
//! pure functions that build them from a snapshot of watched objects.
//!
//! Everything here is deterministic. Equal snapshots produce equal
//! documents, and equal documents produce equal fingerprints.

pub mod document;
pub mod fingerprint;
pub mod gateway;
pub mod hostname;
pub mod ingress;
pub mod model;
pub mod rejection;
pub mod service;
pub mod status;
pub mod template;

pub use fingerprint::{Fingerprint, fingerprint};
pub use model::{ConfigSpec, ServicePortName};
pub use rejection::Rejection;
pub use template::RouteBase;
