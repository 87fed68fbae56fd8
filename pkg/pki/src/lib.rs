//! Inspection of PEM certificates served by listeners and upstreams.

pub mod cert;

pub use cert::{CertificateInfo, san_covers};
