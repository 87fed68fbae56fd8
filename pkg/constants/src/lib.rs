//! Centralized constants for the fleetgate project.
//!
//! All project-wide constant values live here.
//! Change a value in one place and it applies everywhere.

pub mod annotations;
pub mod gateway;
pub mod network;
pub mod paths;
pub mod repo;
pub mod sync;
