//! Authentication against Microsoft Entra ID (Azure AD)
//!
//! Validates the credential inputs for the chosen flow, then builds a
//! credential handle using the OAuth2 interactive browser (PKCE), device code
//! or client secret flow.

mod browser;
pub mod credential;
pub mod tokens;
pub mod validate;

use std::fmt;
use std::str::FromStr;

use crate::error::ConnectError;

pub use credential::{create, CredentialHandle, SignInContext, SignInNotice};
pub use tokens::CachedToken;
pub use validate::{validate, OptionField, Problem, ValidatedOptions, ValidationReport, Violation};

/// Tenant used by the delegated flows when none is configured.
pub const MULTI_TENANT: &str = "common";

/// Strategy for obtaining an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthenticationFlow {
    /// Authorization code + PKCE through the system browser.
    #[default]
    InteractiveBrowser,
    /// Device code: the user signs in on another device.
    DeviceCode,
    /// Confidential client credentials (app-only).
    ClientSecret,
}

impl AuthenticationFlow {
    pub const ALL: [AuthenticationFlow; 3] = [
        AuthenticationFlow::InteractiveBrowser,
        AuthenticationFlow::DeviceCode,
        AuthenticationFlow::ClientSecret,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AuthenticationFlow::InteractiveBrowser => "InteractiveBrowser",
            AuthenticationFlow::DeviceCode => "DeviceCode",
            AuthenticationFlow::ClientSecret => "ClientSecret",
        }
    }

    /// Options that must be present before this flow can be attempted.
    pub fn required_fields(self) -> &'static [OptionField] {
        match self {
            AuthenticationFlow::InteractiveBrowser => &[OptionField::ClientId],
            AuthenticationFlow::DeviceCode => &[OptionField::ClientId],
            AuthenticationFlow::ClientSecret => &[
                OptionField::ClientId,
                OptionField::TenantId,
                OptionField::ClientSecret,
            ],
        }
    }

    /// Whether the flow signs in a user (as opposed to the app itself).
    pub fn is_delegated(self) -> bool {
        match self {
            AuthenticationFlow::InteractiveBrowser | AuthenticationFlow::DeviceCode => true,
            AuthenticationFlow::ClientSecret => false,
        }
    }
}

impl fmt::Display for AuthenticationFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuthenticationFlow {
    type Err = ConnectError;

    /// Case-insensitive; `-` and `_` are ignored, so `device-code`,
    /// `DEVICE_CODE` and `DeviceCode` are all accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();

        AuthenticationFlow::ALL
            .into_iter()
            .find(|flow| flow.name().to_lowercase() == normalized)
            .ok_or_else(|| ConnectError::UnsupportedFlow(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flow_names() {
        assert_eq!(
            "InteractiveBrowser".parse::<AuthenticationFlow>().unwrap(),
            AuthenticationFlow::InteractiveBrowser
        );
        assert_eq!(
            "device-code".parse::<AuthenticationFlow>().unwrap(),
            AuthenticationFlow::DeviceCode
        );
        assert_eq!(
            "CLIENT_SECRET".parse::<AuthenticationFlow>().unwrap(),
            AuthenticationFlow::ClientSecret
        );
    }

    #[test]
    fn test_parse_unknown_flow() {
        let err = "ManagedIdentity".parse::<AuthenticationFlow>().unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFlowError");
        assert!(err.to_string().contains("ManagedIdentity"));
    }

    #[test]
    fn test_display_roundtrips_through_parse() {
        for flow in AuthenticationFlow::ALL {
            assert_eq!(flow.to_string().parse::<AuthenticationFlow>().unwrap(), flow);
        }
    }

    #[test]
    fn test_every_flow_requires_client_id() {
        for flow in AuthenticationFlow::ALL {
            assert!(flow.required_fields().contains(&OptionField::ClientId));
        }
    }
}
