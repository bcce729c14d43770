//! Tool runtime for a PostgREST-style data API.
//!
//! This crate is used by:
//! - the `/tools/*` request/response endpoints
//! - the `/mcp` streaming dispatcher
//!
//! It contains **no** session state and **no** HTTP server code.

pub mod args;
pub mod config;
pub mod error;
pub mod query;
pub mod runtime;

pub use args::{InsertArgs, OrderBy, SelectArgs};
pub use config::BackendConfig;
pub use error::{BackendError, Result};
pub use runtime::{DataBackend, InsertOutcome, RestBackend};
