//! Per-flow sufficiency checks for credential options

use oauth2::ClientSecret;
use std::fmt;

use super::{AuthenticationFlow, MULTI_TENANT};
use crate::config::CredentialOptions;
use crate::error::ConnectError;

/// A credential option that a flow may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionField {
    ClientId,
    TenantId,
    ClientSecret,
}

impl OptionField {
    /// Key used in the config file.
    pub fn key(self) -> &'static str {
        match self {
            OptionField::ClientId => "clientId",
            OptionField::TenantId => "tenantId",
            OptionField::ClientSecret => "clientSecret",
        }
    }

    /// Directive option that supplies this field.
    pub fn flag(self) -> &'static str {
        match self {
            OptionField::ClientId => "--client-id",
            OptionField::TenantId => "--tenant-id",
            OptionField::ClientSecret => "--client-secret",
        }
    }

    fn value(self, options: &CredentialOptions) -> Option<&str> {
        let value = match self {
            OptionField::ClientId => options.client_id.as_deref(),
            OptionField::TenantId => options.tenant_id.as_deref(),
            OptionField::ClientSecret => options.client_secret.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Characters that would break out of the tenant segment of an authority URL.
const TENANT_FORBIDDEN: [char; 3] = ['/', '?', '#'];

fn check_tenant(tenant: &str) -> Option<&'static str> {
    if tenant.contains(&TENANT_FORBIDDEN[..]) {
        Some("must not contain '/', '?' or '#'")
    } else if tenant.contains(char::is_whitespace) {
        Some("must not contain whitespace")
    } else {
        None
    }
}

/// Why a field failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Problem {
    Missing,
    Malformed(&'static str),
}

/// One unmet requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: OptionField,
    pub flow: AuthenticationFlow,
    pub problem: Problem,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.problem {
            Problem::Missing => write!(
                f,
                "{} is required for {} (pass {} or set \"{}\" in the config file)",
                self.field.key(),
                self.flow,
                self.field.flag(),
                self.field.key()
            ),
            Problem::Malformed(reason) => write!(f, "{} {}", self.field.key(), reason),
        }
    }
}

/// All unmet requirements for a flow, in table order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub flow: AuthenticationFlow,
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn missing_fields(&self) -> Vec<OptionField> {
        self.violations
            .iter()
            .filter(|v| v.problem == Problem::Missing)
            .map(|v| v.field)
            .collect()
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.missing_fields().into_iter().map(OptionField::key).collect();
        write!(f, "Cannot use {} authentication", self.flow)?;
        match keys.len() {
            0 => write!(f, ", invalid values")?,
            1 => write!(f, ", missing value: {}", keys[0])?,
            _ => write!(f, ", missing values: {}", keys.join(", "))?,
        }
        for violation in &self.violations {
            write!(f, "\n  - {}", violation)?;
        }
        Ok(())
    }
}

/// Options proven sufficient for a specific flow.
///
/// Only `validate` produces this, so the credential factory never sees a
/// partial set of inputs.
#[derive(Debug, Clone)]
pub enum ValidatedOptions {
    InteractiveBrowser {
        client_id: String,
        tenant_id: String,
    },
    DeviceCode {
        client_id: String,
        tenant_id: String,
    },
    ClientSecret {
        client_id: String,
        tenant_id: String,
        client_secret: ClientSecret,
    },
}

impl ValidatedOptions {
    pub fn flow(&self) -> AuthenticationFlow {
        match self {
            ValidatedOptions::InteractiveBrowser { .. } => AuthenticationFlow::InteractiveBrowser,
            ValidatedOptions::DeviceCode { .. } => AuthenticationFlow::DeviceCode,
            ValidatedOptions::ClientSecret { .. } => AuthenticationFlow::ClientSecret,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            ValidatedOptions::InteractiveBrowser { client_id, .. }
            | ValidatedOptions::DeviceCode { client_id, .. }
            | ValidatedOptions::ClientSecret { client_id, .. } => client_id,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            ValidatedOptions::InteractiveBrowser { tenant_id, .. }
            | ValidatedOptions::DeviceCode { tenant_id, .. }
            | ValidatedOptions::ClientSecret { tenant_id, .. } => tenant_id,
        }
    }
}

/// Check that `options` carries everything `flow` needs.
///
/// Reports every missing field at once, plus a tenant that cannot be used
/// as an authority path segment. Values are trimmed. Client ID and secret
/// are ignored when the flow does not use them.
pub fn validate(
    options: &CredentialOptions,
    flow: AuthenticationFlow,
) -> Result<ValidatedOptions, ConnectError> {
    let mut violations: Vec<Violation> = flow
        .required_fields()
        .iter()
        .filter(|field| field.value(options).is_none())
        .map(|&field| Violation {
            field,
            flow,
            problem: Problem::Missing,
        })
        .collect();

    if let Some(reason) = OptionField::TenantId.value(options).and_then(check_tenant) {
        violations.push(Violation {
            field: OptionField::TenantId,
            flow,
            problem: Problem::Malformed(reason),
        });
    }

    if !violations.is_empty() {
        tracing::debug!("{} validation failed: {} missing", flow, violations.len());
        return Err(ConnectError::Validation(ValidationReport { flow, violations }));
    }

    let client_id = OptionField::ClientId.value(options).map(str::to_string);
    let tenant_id = OptionField::TenantId.value(options).map(str::to_string);
    let client_secret = OptionField::ClientSecret.value(options).map(str::to_string);

    let validated = match (flow, client_id) {
        (AuthenticationFlow::InteractiveBrowser, Some(client_id)) => {
            Some(ValidatedOptions::InteractiveBrowser {
                client_id,
                tenant_id: tenant_id.unwrap_or_else(|| MULTI_TENANT.to_string()),
            })
        }
        (AuthenticationFlow::DeviceCode, Some(client_id)) => Some(ValidatedOptions::DeviceCode {
            client_id,
            tenant_id: tenant_id.unwrap_or_else(|| MULTI_TENANT.to_string()),
        }),
        (AuthenticationFlow::ClientSecret, Some(client_id)) => {
            tenant_id.zip(client_secret).map(|(tenant_id, secret)| {
                ValidatedOptions::ClientSecret {
                    client_id,
                    tenant_id,
                    client_secret: ClientSecret::new(secret),
                }
            })
        }
        (_, None) => None,
    };

    // Unreachable while the required-field table and the match above agree.
    validated.ok_or_else(|| {
        ConnectError::Validation(ValidationReport {
            flow,
            violations: Vec::new(),
        })
    })
}
