//! Microsoft Graph service clients
//!
//! Two client families share one request pipeline: `V1Client` for
//! `/v1.0` and `BetaClient` for `/beta`. Assembly never touches the network;
//! tokens are fetched from the credential handle per request.

use anyhow::{bail, Context, Result};
use std::fmt;
use std::marker::PhantomData;

use super::endpoints::{ApiVersion, ScopeSet};
use crate::auth::CredentialHandle;

/// Marker for a Graph API family.
pub trait ApiFamily: Send + Sync + 'static {
    const VERSION: ApiVersion;
    /// Type name the client is declared under in the session.
    const TYPE_NAME: &'static str;
}

/// Graph `v1.0` family.
#[derive(Debug)]
pub struct V1;

/// Graph `beta` family.
#[derive(Debug)]
pub struct Beta;

impl ApiFamily for V1 {
    const VERSION: ApiVersion = ApiVersion::V1;
    const TYPE_NAME: &'static str = "GraphServiceClient";
}

impl ApiFamily for Beta {
    const VERSION: ApiVersion = ApiVersion::Beta;
    const TYPE_NAME: &'static str = "BetaGraphServiceClient";
}

/// Authenticated client for one Graph API family.
pub struct GraphServiceClient<F: ApiFamily> {
    http: reqwest::Client,
    credential: CredentialHandle,
    scopes: ScopeSet,
    base_url: String,
    _family: PhantomData<F>,
}

pub type V1Client = GraphServiceClient<V1>;
pub type BetaClient = GraphServiceClient<Beta>;

impl<F: ApiFamily> GraphServiceClient<F> {
    fn new(credential: CredentialHandle, scopes: ScopeSet, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            credential,
            scopes,
            base_url: base_url.trim_end_matches('/').to_string(),
            _family: PhantomData,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    pub fn credential(&self) -> &CredentialHandle {
        &self.credential
    }

    pub fn version(&self) -> ApiVersion {
        F::VERSION
    }

    /// Absolute URL for a Graph path such as `/me`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GET request against this client's base URL.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let token = self.credential.token().await?;
        let url = self.url(path);
        tracing::debug!("Graph GET {}", url);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await
            .with_context(|| format!("Graph GET {} failed", url))?;

        check_response(resp, &url).await
    }

    /// POST request with a JSON body against this client's base URL.
    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        let token = self.credential.token().await?;
        let url = self.url(path);
        tracing::debug!("Graph POST {}", url);

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Graph POST {} failed", url))?;

        check_response(resp, &url).await
    }
}

impl<F: ApiFamily> fmt::Debug for GraphServiceClient<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(F::TYPE_NAME)
            .field("base_url", &self.base_url)
            .field("scopes", &self.scopes)
            .field("credential", &self.credential)
            .finish()
    }
}

/// A client of either family, as produced by `assemble`.
#[derive(Debug)]
pub enum GraphClient {
    V1(V1Client),
    Beta(BetaClient),
}

impl GraphClient {
    pub fn version(&self) -> ApiVersion {
        match self {
            GraphClient::V1(client) => client.version(),
            GraphClient::Beta(client) => client.version(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            GraphClient::V1(_) => V1::TYPE_NAME,
            GraphClient::Beta(_) => Beta::TYPE_NAME,
        }
    }

    pub fn base_url(&self) -> &str {
        match self {
            GraphClient::V1(client) => client.base_url(),
            GraphClient::Beta(client) => client.base_url(),
        }
    }

    pub fn scopes(&self) -> &ScopeSet {
        match self {
            GraphClient::V1(client) => client.scopes(),
            GraphClient::Beta(client) => client.scopes(),
        }
    }

    pub fn credential(&self) -> &CredentialHandle {
        match self {
            GraphClient::V1(client) => client.credential(),
            GraphClient::Beta(client) => client.credential(),
        }
    }

    pub fn as_v1(&self) -> Option<&V1Client> {
        match self {
            GraphClient::V1(client) => Some(client),
            GraphClient::Beta(_) => None,
        }
    }

    pub fn as_beta(&self) -> Option<&BetaClient> {
        match self {
            GraphClient::Beta(client) => Some(client),
            GraphClient::V1(_) => None,
        }
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        match self {
            GraphClient::V1(client) => client.get(path).await,
            GraphClient::Beta(client) => client.get(path).await,
        }
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<reqwest::Response> {
        match self {
            GraphClient::V1(client) => client.post(path, body).await,
            GraphClient::Beta(client) => client.post(path, body).await,
        }
    }
}

/// Wrap a credential into the client family selected by `version`.
pub fn assemble(
    credential: CredentialHandle,
    scopes: ScopeSet,
    base_url: String,
    version: ApiVersion,
) -> GraphClient {
    tracing::debug!("Assembling {} client for {}", version, base_url);
    match version {
        ApiVersion::V1 => GraphClient::V1(GraphServiceClient::new(credential, scopes, base_url)),
        ApiVersion::Beta => {
            GraphClient::Beta(GraphServiceClient::new(credential, scopes, base_url))
        }
    }
}

/// Check HTTP response status code and return a clear error on failure.
async fn check_response(resp: reqwest::Response, url: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        bail!(
            "401 Unauthorized for {}. Token may be invalid -- run #!microsoftgraph again.",
            url
        );
    }
    if status == reqwest::StatusCode::FORBIDDEN {
        bail!(
            "403 Forbidden for {}. The app registration may lack the required Graph permission.",
            url
        );
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("HTTP {} for {}: {}", status.as_u16(), url, body);
    }
    Ok(resp)
}
