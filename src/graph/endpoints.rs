//! National cloud and API version endpoint table

use clap::ValueEnum;
use std::fmt;

/// Sovereign deployment of Entra ID and Microsoft Graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum NationalCloud {
    #[default]
    Global,
    Germany,
    China,
    #[value(name = "us-government")]
    UsGovernment,
    #[value(name = "us-government-dod")]
    UsGovernmentDoD,
}

impl NationalCloud {
    pub const ALL: [NationalCloud; 5] = [
        NationalCloud::Global,
        NationalCloud::Germany,
        NationalCloud::China,
        NationalCloud::UsGovernment,
        NationalCloud::UsGovernmentDoD,
    ];

    /// Host of the Entra ID authority for this cloud.
    pub fn authority_host(self) -> &'static str {
        match self {
            NationalCloud::Global => "login.microsoftonline.com",
            NationalCloud::Germany => "login.microsoftonline.de",
            NationalCloud::China => "login.chinacloudapi.cn",
            NationalCloud::UsGovernment => "login.microsoftonline.us",
            NationalCloud::UsGovernmentDoD => "login.microsoftonline.us",
        }
    }

    /// Host of the Microsoft Graph service for this cloud.
    pub fn graph_host(self) -> &'static str {
        match self {
            NationalCloud::Global => "graph.microsoft.com",
            NationalCloud::Germany => "graph.microsoft.de",
            NationalCloud::China => "microsoftgraph.chinacloudapi.cn",
            NationalCloud::UsGovernment => "graph.microsoft.us",
            NationalCloud::UsGovernmentDoD => "dod-graph.microsoft.us",
        }
    }

    /// OAuth2 endpoint under the tenant's authority, e.g. `token`.
    pub fn authority_url(self, tenant: &str, endpoint: &str) -> String {
        format!(
            "https://{}/{}/oauth2/v2.0/{}",
            self.authority_host(),
            tenant,
            endpoint
        )
    }

    /// Default permission scopes for Graph in this cloud.
    pub fn default_scopes(self) -> ScopeSet {
        ScopeSet::from_iter([format!("https://{}/.default", self.graph_host())])
    }
}

impl fmt::Display for NationalCloud {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NationalCloud::Global => "Global",
            NationalCloud::Germany => "Germany",
            NationalCloud::China => "China",
            NationalCloud::UsGovernment => "UsGovernment",
            NationalCloud::UsGovernmentDoD => "UsGovernmentDoD",
        };
        f.write_str(name)
    }
}

/// Graph API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum)]
pub enum ApiVersion {
    #[default]
    V1,
    Beta,
}

impl ApiVersion {
    pub const ALL: [ApiVersion; 2] = [ApiVersion::V1, ApiVersion::Beta];

    /// Path segment Graph uses for this version.
    pub fn path_segment(self) -> &'static str {
        match self {
            ApiVersion::V1 => "v1.0",
            ApiVersion::Beta => "beta",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApiVersion::V1 => "V1",
            ApiVersion::Beta => "Beta",
        })
    }
}

/// Ordered, duplicate-free list of permission scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSet(Vec<String>);

impl ScopeSet {
    /// Add a scope unless it is already present.
    pub fn insert(&mut self, scope: impl Into<String>) {
        let scope = scope.into();
        if !self.0.contains(&scope) {
            self.0.push(scope);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub(crate) fn to_oauth_scopes(&self) -> Vec<oauth2::Scope> {
        self.0.iter().cloned().map(oauth2::Scope::new).collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = ScopeSet::default();
        for scope in iter {
            set.insert(scope);
        }
        set
    }
}

impl fmt::Display for ScopeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Base URL and default scopes for one (cloud, version) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub base_url: String,
    pub scopes: ScopeSet,
}

/// Look up the Graph base URL and default scopes. Pure and total.
pub fn resolve(cloud: NationalCloud, version: ApiVersion) -> Endpoint {
    Endpoint {
        base_url: format!("https://{}/{}", cloud.graph_host(), version.path_segment()),
        scopes: cloud.default_scopes(),
    }
}
