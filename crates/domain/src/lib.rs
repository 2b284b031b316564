//! `an-domain`: types shared by every agentnode crate: configuration,
//! the common error type, and structured trace events.

pub mod config;
pub mod error;
pub mod trace;
