//! Credential options and config file merging

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConnectError, Result};

/// Resolved credential inputs for one invocation.
///
/// A field that neither the directive nor the config file supplied stays
/// `None`; no defaults are filled in here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialOptions {
    pub client_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_secret: Option<String>,
    pub config_file: Option<PathBuf>,
}

/// Contents of a credential config file.
///
/// Accepts `{"clientId": ..., "tenantId": ..., "clientSecret": ...}` (or the
/// same keys in TOML). Unknown keys are ignored.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialFile {
    pub client_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_secret: Option<String>,
}

impl CredentialFile {
    /// Load and parse a config file. TOML when the extension is `.toml`,
    /// JSON otherwise.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| ConnectError::ConfigLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        // Windows editors often save with a byte order mark
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        let parsed = if is_toml {
            toml::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(content).map_err(|e| e.to_string())
        };

        parsed.map_err(|reason| ConnectError::ConfigLoad {
            path: path.to_path_buf(),
            reason,
        })
    }
}

/// Merge explicit options with the optional config file.
///
/// Explicit values always win; the file only fills fields the caller left
/// unset. Blank strings count as unset on both sides. The result records
/// `config_file` as the path that was read, whatever `explicit` carried.
pub fn merge(explicit: CredentialOptions, config_file: Option<&Path>) -> Result<CredentialOptions> {
    let explicit = CredentialOptions {
        client_id: non_blank(explicit.client_id),
        tenant_id: non_blank(explicit.tenant_id),
        client_secret: non_blank(explicit.client_secret),
        config_file: None,
    };

    let Some(path) = config_file else {
        return Ok(explicit);
    };

    tracing::debug!("Loading credential config from {}", path.display());
    let file = CredentialFile::load(path)?;

    Ok(CredentialOptions {
        client_id: explicit.client_id.or(non_blank(file.client_id)),
        tenant_id: explicit.tenant_id.or(non_blank(file.tenant_id)),
        client_secret: explicit.client_secret.or(non_blank(file.client_secret)),
        config_file: Some(path.to_path_buf()),
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
