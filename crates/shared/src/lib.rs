//! Shared types and utilities for the synonymer client and its test backend.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
