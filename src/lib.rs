//! Microsoft Graph extension for notebook kernels
//!
//! Adds a `#!microsoftgraph` directive that signs in to Entra ID with the
//! chosen flow and binds a configured Graph client into the session.

pub mod auth;
pub mod config;
pub mod error;
pub mod graph;
pub mod kernel;

pub use error::{ConnectError, Result};
pub use kernel::{load_extension, CommandRegistry, Session};
