//! QLIC connections and streams.
//!
//! - `config.rs`: [`ConnectionConfig`] and its builder
//! - `state.rs`: [`ConnectionPhase`] lifecycle
//! - `stream.rs`: stream states and the per-connection [`StreamTable`]
//! - `driver.rs`: the run loop that owns protocol state
//! - `handle.rs`: [`Connection`] and [`Stream`] handles
//! - `error.rs`: [`ConnectionError`], [`StreamError`], [`ErrorCategory`]

mod config;
mod driver;
mod error;
mod handle;
mod state;
mod stream;

pub use config::{ConnectionConfig, ConnectionConfigBuilder};
pub use driver::ConnectionOutcome;
pub use error::{ConnectionError, ErrorCategory, StreamError};
pub use handle::{Connection, ConnectionMetadata, ConnectionTask, Stream};
pub use state::ConnectionPhase;
pub use stream::{StreamEvent, StreamState, StreamTable};
