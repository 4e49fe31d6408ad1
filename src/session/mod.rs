//! Session lifecycle.
//!
//! A [`Session`] wraps successive connection attempts to one peer and
//! publishes a [`ConnectionStatus`] for every transition.

mod config;
mod controller;
mod status;

pub use config::{SessionConfig, SessionConfigBuilder};
pub use controller::Session;
pub use status::{ConnectionStatus, DisconnectReason};
