//! Core constants, error types, roles and link traits (always included).

pub mod constants;
mod error;
mod role;
mod traits;

pub use constants::*;
pub use error::*;
pub use role::Role;
pub use traits::*;
