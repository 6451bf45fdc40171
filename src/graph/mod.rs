//! Microsoft Graph endpoints and clients

pub mod client;
pub mod endpoints;
mod me;

pub use client::{assemble, ApiFamily, Beta, BetaClient, GraphClient, GraphServiceClient, V1, V1Client};
pub use endpoints::{resolve, ApiVersion, Endpoint, NationalCloud, ScopeSet};
pub use me::User;
