//! # hearth-shared
//!
//! Types shared by every Hearth crate: the domain records, the JSON wire
//! protocol between client and server, constants and the common error type.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use error::HearthError;
