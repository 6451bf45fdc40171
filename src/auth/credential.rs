//! Credential factory and token-providing handle
//!
//! Each flow maps to one construction path. The delegated flows sign the user
//! in while the handle is being built (these are the only points where an
//! invocation waits on the outside world); the client secret flow is lazy and
//! only talks to the authority on the first token request.

use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    DeviceAuthorizationUrl, ErrorResponse, PkceCodeChallenge, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, StandardDeviceAuthorizationResponse, TokenResponse, TokenUrl,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::browser::RedirectListener;
use super::tokens::CachedToken;
use super::{AuthenticationFlow, ValidatedOptions};
use crate::error::ConnectError;
use crate::graph::{NationalCloud, ScopeSet};

/// Upper bound on device code polling.
pub const DEFAULT_DEVICE_CODE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Upper bound on waiting for the browser redirect.
pub const DEFAULT_BROWSER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const OFFLINE_ACCESS: &str = "offline_access";

/// Something the user has to act on to finish signing in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInNotice {
    OpenBrowser {
        url: String,
    },
    DeviceCode {
        verification_uri: String,
        user_code: String,
        expires_in: Duration,
    },
}

impl fmt::Display for SignInNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignInNotice::OpenBrowser { url } => {
                write!(f, "Complete sign-in in your browser: {}", url)
            }
            SignInNotice::DeviceCode {
                verification_uri,
                user_code,
                expires_in,
            } => write!(
                f,
                "To sign in, visit {} and enter code {} (expires in {} minutes)",
                verification_uri,
                user_code,
                expires_in.as_secs() / 60
            ),
        }
    }
}

type Notifier = Arc<dyn Fn(&SignInNotice) + Send + Sync>;

/// Per-invocation settings for the interactive waits.
#[derive(Clone)]
pub struct SignInContext {
    pub cancel: CancellationToken,
    pub device_code_timeout: Duration,
    pub browser_timeout: Duration,
    pub launch_browser: bool,
    notifier: Notifier,
}

impl SignInContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            device_code_timeout: DEFAULT_DEVICE_CODE_TIMEOUT,
            browser_timeout: DEFAULT_BROWSER_TIMEOUT,
            launch_browser: true,
            notifier: Arc::new(|notice| tracing::info!("{}", notice)),
        }
    }

    /// Route sign-in notices somewhere the user will see them.
    pub fn with_notifier(mut self, notifier: impl Fn(&SignInNotice) + Send + Sync + 'static) -> Self {
        self.notifier = Arc::new(notifier);
        self
    }

    fn notify(&self, notice: &SignInNotice) {
        (self.notifier)(notice)
    }
}

impl fmt::Debug for SignInContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignInContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("device_code_timeout", &self.device_code_timeout)
            .field("browser_timeout", &self.browser_timeout)
            .field("launch_browser", &self.launch_browser)
            .finish()
    }
}

/// OAuth2 endpoints of one tenant in one cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub authorize: String,
    pub token: String,
    pub device_code: String,
}

impl Authority {
    pub fn new(cloud: NationalCloud, tenant: &str) -> Self {
        Self {
            authorize: cloud.authority_url(tenant, "authorize"),
            token: cloud.authority_url(tenant, "token"),
            device_code: cloud.authority_url(tenant, "devicecode"),
        }
    }
}

#[derive(Default)]
struct TokenState {
    access: Option<CachedToken>,
    refresh: Option<RefreshToken>,
}

impl TokenState {
    fn store(&mut self, response: &BasicTokenResponse) -> String {
        let token = response.access_token().secret().to_string();
        self.access = Some(CachedToken::new(
            token.clone(),
            response.expires_in().map(|d| d.as_secs()),
        ));
        if let Some(refresh) = response.refresh_token() {
            self.refresh = Some(refresh.clone());
        }
        token
    }
}

/// Opaque token provider bound to a flow, a tenant and a cloud.
///
/// Built once per invocation and owned by the client it is assembled into.
pub struct CredentialHandle {
    flow: AuthenticationFlow,
    cloud: NationalCloud,
    authority: Authority,
    scopes: ScopeSet,
    client: BasicClient,
    state: Mutex<TokenState>,
}

impl CredentialHandle {
    pub fn flow(&self) -> AuthenticationFlow {
        self.flow
    }

    pub fn cloud(&self) -> NationalCloud {
        self.cloud
    }

    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    pub fn scopes(&self) -> &ScopeSet {
        &self.scopes
    }

    /// Current access token, refreshing it when it is close to expiry.
    pub async fn token(&self) -> Result<String, ConnectError> {
        let mut state = self.state.lock().await;
        if let Some(cached) = state.access.as_ref().filter(|t| !t.is_expired()) {
            return Ok(cached.token.clone());
        }

        let response = match (self.flow.is_delegated(), state.refresh.clone()) {
            (false, _) => {
                tracing::debug!("Requesting app-only token");
                self.client
                    .exchange_client_credentials()
                    .add_scopes(self.scopes.to_oauth_scopes())
                    .request_async(async_http_client)
                    .await
                    .map_err(|e| ConnectError::TokenRequest(describe(&e)))?
            }
            (true, Some(refresh)) => {
                tracing::debug!("Refreshing delegated token");
                self.client
                    .exchange_refresh_token(&refresh)
                    .add_scopes(self.scopes.to_oauth_scopes())
                    .request_async(async_http_client)
                    .await
                    .map_err(|e| ConnectError::TokenRequest(describe(&e)))?
            }
            (true, None) => {
                return Err(ConnectError::TokenRequest(
                    "access token expired and no refresh token was issued; run #!microsoftgraph again"
                        .to_string(),
                ))
            }
        };

        Ok(state.store(&response))
    }
}

impl fmt::Debug for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHandle")
            .field("flow", &self.flow)
            .field("cloud", &self.cloud)
            .field("authority", &self.authority.token)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Build the credential for already-validated options.
///
/// Fails with `CredentialConstruction` when the sign-in is rejected, times
/// out or is cancelled through `ctx.cancel`.
pub async fn create(
    options: ValidatedOptions,
    cloud: NationalCloud,
    ctx: &SignInContext,
) -> Result<CredentialHandle, ConnectError> {
    let flow = options.flow();
    let scopes = cloud.default_scopes();
    let authority = Authority::new(cloud, options.tenant_id());

    tracing::info!(
        "Building {} credential for tenant {} ({} cloud)",
        flow,
        options.tenant_id(),
        cloud
    );

    let (client, state) = match options {
        ValidatedOptions::ClientSecret {
            client_id,
            client_secret,
            ..
        } => {
            let client = build_client(flow, &authority, client_id, Some(client_secret))?
                .set_auth_type(AuthType::RequestBody);
            (client, TokenState::default())
        }
        ValidatedOptions::DeviceCode { client_id, .. } => {
            let client = build_client(flow, &authority, client_id, None)?;
            let response = interruptible(ctx, flow, device_code_login(&client, &scopes, ctx)).await?;
            let mut state = TokenState::default();
            state.store(&response);
            (client, state)
        }
        ValidatedOptions::InteractiveBrowser { client_id, .. } => {
            let client = build_client(flow, &authority, client_id, None)?;
            let response =
                interruptible(ctx, flow, browser_login(client.clone(), &scopes, ctx)).await?;
            let mut state = TokenState::default();
            state.store(&response);
            (client, state)
        }
    };

    Ok(CredentialHandle {
        flow,
        cloud,
        authority,
        scopes,
        client,
        state: Mutex::new(state),
    })
}

fn build_client(
    flow: AuthenticationFlow,
    authority: &Authority,
    client_id: String,
    client_secret: Option<ClientSecret>,
) -> Result<BasicClient, ConnectError> {
    let invalid = |e: url::ParseError| ConnectError::credential(flow, format!("invalid authority URL: {}", e));

    let auth_url = AuthUrl::new(authority.authorize.clone()).map_err(invalid)?;
    let token_url = TokenUrl::new(authority.token.clone()).map_err(invalid)?;
    let device_url = DeviceAuthorizationUrl::new(authority.device_code.clone()).map_err(invalid)?;

    Ok(BasicClient::new(
        ClientId::new(client_id),
        client_secret,
        auth_url,
        Some(token_url),
    )
    .set_device_authorization_url(device_url))
}

/// Race a sign-in against cancellation. A cancelled token wins even if the
/// sign-in could complete immediately.
async fn interruptible<T>(
    ctx: &SignInContext,
    flow: AuthenticationFlow,
    login: impl Future<Output = Result<T, ConnectError>>,
) -> Result<T, ConnectError> {
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            tracing::warn!("{} sign-in cancelled", flow);
            Err(ConnectError::credential(flow, "sign-in was cancelled"))
        }
        result = login => result,
    }
}

async fn device_code_login(
    client: &BasicClient,
    scopes: &ScopeSet,
    ctx: &SignInContext,
) -> Result<BasicTokenResponse, ConnectError> {
    let flow = AuthenticationFlow::DeviceCode;

    let details: StandardDeviceAuthorizationResponse = client
        .exchange_device_code()
        .map_err(|e| ConnectError::credential(flow, e.to_string()))?
        .add_scopes(scopes.to_oauth_scopes())
        .add_scope(Scope::new(OFFLINE_ACCESS.to_string()))
        .request_async(async_http_client)
        .await
        .map_err(|e| {
            ConnectError::credential(flow, format!("device code request failed: {}", describe(&e)))
        })?;

    ctx.notify(&SignInNotice::DeviceCode {
        verification_uri: details.verification_uri().as_str().to_string(),
        user_code: details.user_code().secret().to_string(),
        expires_in: details.expires_in(),
    });

    tracing::info!("Waiting for device code approval...");
    client
        .exchange_device_access_token(&details)
        .request_async(
            async_http_client,
            tokio::time::sleep,
            Some(ctx.device_code_timeout),
        )
        .await
        .map_err(|e| ConnectError::credential(flow, describe(&e)))
}

async fn browser_login(
    client: BasicClient,
    scopes: &ScopeSet,
    ctx: &SignInContext,
) -> Result<BasicTokenResponse, ConnectError> {
    let flow = AuthenticationFlow::InteractiveBrowser;

    let listener = RedirectListener::bind().await.map_err(|e| {
        ConnectError::credential(flow, format!("could not start redirect listener: {}", e))
    })?;
    let redirect = RedirectUrl::new(listener.redirect_uri())
        .map_err(|e| ConnectError::credential(flow, format!("invalid redirect URI: {}", e)))?;
    let client = client.set_redirect_uri(redirect);

    let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, csrf) = client
        .authorize_url(CsrfToken::new_random)
        .add_scopes(scopes.to_oauth_scopes())
        .add_scope(Scope::new(OFFLINE_ACCESS.to_string()))
        .set_pkce_challenge(challenge)
        .url();

    ctx.notify(&SignInNotice::OpenBrowser {
        url: auth_url.to_string(),
    });
    if ctx.launch_browser {
        if let Err(e) = open::that(auth_url.as_str()) {
            tracing::warn!("Could not open browser: {}", e);
        }
    }

    tracing::info!("Waiting for browser redirect on {}", listener.redirect_uri());
    let code = tokio::time::timeout(ctx.browser_timeout, listener.wait_for_code(csrf.secret()))
        .await
        .map_err(|_| {
            ConnectError::credential(
                flow,
                format!(
                    "no redirect received within {} seconds",
                    ctx.browser_timeout.as_secs()
                ),
            )
        })?
        .map_err(|reason| ConnectError::credential(flow, reason))?;

    client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(verifier)
        .request_async(async_http_client)
        .await
        .map_err(|e| ConnectError::credential(flow, describe(&e)))
}

/// Readable one-line summary of a token endpoint failure.
fn describe<RE, TE>(err: &RequestTokenError<RE, TE>) -> String
where
    RE: std::error::Error + 'static,
    TE: ErrorResponse + 'static,
{
    match err {
        RequestTokenError::ServerResponse(response) => {
            let value = serde_json::to_value(response).unwrap_or_default();
            let code = value
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown_error");
            match value.get("error_description").and_then(|v| v.as_str()) {
                // Entra ID appends trace and correlation ids on later lines
                Some(description) => format!(
                    "{}: {}",
                    code,
                    description.lines().next().unwrap_or(description)
                ),
                None => code.to_string(),
            }
        }
        RequestTokenError::Request(e) => format!("request failed: {}", e),
        RequestTokenError::Parse(e, _) => format!("unexpected token response: {}", e),
        RequestTokenError::Other(message) => message.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{validate, MULTI_TENANT};
    use crate::config::CredentialOptions;

    fn options(client: bool, tenant: bool, secret: bool) -> CredentialOptions {
        CredentialOptions {
            client_id: client.then(|| "app-id".to_string()),
            tenant_id: tenant.then(|| "contoso".to_string()),
            client_secret: secret.then(|| "s3cret".to_string()),
            config_file: None,
        }
    }

    fn cancelled_context() -> SignInContext {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut ctx = SignInContext::new(cancel);
        ctx.launch_browser = false;
        ctx
    }

    #[tokio::test]
    async fn test_client_secret_is_lazy() {
        let validated = validate(&options(true, true, true), AuthenticationFlow::ClientSecret).unwrap();
        let ctx = SignInContext::new(CancellationToken::new());

        let handle = create(validated, NationalCloud::Global, &ctx).await.unwrap();
        assert_eq!(handle.flow(), AuthenticationFlow::ClientSecret);
        assert_eq!(handle.cloud(), NationalCloud::Global);
        assert_eq!(
            handle.authority().token,
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/token"
        );
        assert_eq!(handle.scopes(), &NationalCloud::Global.default_scopes());
    }

    #[tokio::test]
    async fn test_client_secret_uses_cloud_authority() {
        let validated = validate(&options(true, true, true), AuthenticationFlow::ClientSecret).unwrap();
        let ctx = SignInContext::new(CancellationToken::new());

        let handle = create(validated, NationalCloud::UsGovernmentDoD, &ctx).await.unwrap();
        assert_eq!(
            handle.authority().token,
            "https://login.microsoftonline.us/contoso/oauth2/v2.0/token"
        );
        assert_eq!(
            handle.scopes().iter().collect::<Vec<_>>(),
            vec!["https://dod-graph.microsoft.us/.default"]
        );
    }

    #[tokio::test]
    async fn test_cancelled_device_code_fails() {
        let validated = validate(&options(true, false, false), AuthenticationFlow::DeviceCode).unwrap();

        let err = create(validated, NationalCloud::Global, &cancelled_context())
            .await
            .unwrap_err();
        match err {
            ConnectError::CredentialConstruction { flow, reason } => {
                assert_eq!(flow, AuthenticationFlow::DeviceCode);
                assert!(reason.contains("cancelled"));
            }
            other => panic!("expected CredentialConstruction, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancelled_browser_sign_in_fails() {
        let validated =
            validate(&options(true, false, false), AuthenticationFlow::InteractiveBrowser).unwrap();

        let err = create(validated, NationalCloud::Global, &cancelled_context())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CredentialConstructionError");
    }

    type Notices = Arc<std::sync::Mutex<Vec<SignInNotice>>>;

    fn recording_context(browser_timeout: Duration) -> (SignInContext, Notices) {
        let notices: Notices = Arc::default();
        let sink = Arc::clone(&notices);
        let mut ctx = SignInContext::new(CancellationToken::new())
            .with_notifier(move |notice| sink.lock().unwrap().push(notice.clone()));
        ctx.launch_browser = false;
        ctx.browser_timeout = browser_timeout;
        (ctx, notices)
    }

    #[tokio::test]
    async fn test_browser_wait_times_out() {
        let validated =
            validate(&options(true, true, false), AuthenticationFlow::InteractiveBrowser).unwrap();
        let (ctx, _) = recording_context(Duration::from_millis(50));

        let err = create(validated, NationalCloud::Global, &ctx).await.unwrap_err();
        assert_eq!(err.kind(), "CredentialConstructionError");
        match err {
            ConnectError::CredentialConstruction { flow, reason } => {
                assert_eq!(flow, AuthenticationFlow::InteractiveBrowser);
                assert!(reason.contains("no redirect received"), "{}", reason);
            }
            other => panic!("expected CredentialConstruction, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_browser_without_tenant_uses_common_authority() {
        let validated =
            validate(&options(true, false, false), AuthenticationFlow::InteractiveBrowser).unwrap();
        let (ctx, notices) = recording_context(Duration::from_millis(50));

        create(validated, NationalCloud::Global, &ctx).await.unwrap_err();

        let notices = notices.lock().unwrap();
        assert_eq!(notices.len(), 1);
        let SignInNotice::OpenBrowser { url } = &notices[0] else {
            panic!("expected browser notice, got {:?}", notices[0]);
        };
        let expected = format!(
            "https://login.microsoftonline.com/{}/oauth2/v2.0/authorize?",
            MULTI_TENANT
        );
        assert!(url.starts_with(&expected), "{}", url);
        assert!(url.contains("client_id=app-id"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A"));
    }

    #[test]
    fn test_device_code_notice_text() {
        let notice = SignInNotice::DeviceCode {
            verification_uri: "https://microsoft.com/devicelogin".to_string(),
            user_code: "ABCD-1234".to_string(),
            expires_in: Duration::from_secs(900),
        };
        let text = notice.to_string();
        assert!(text.contains("https://microsoft.com/devicelogin"));
        assert!(text.contains("ABCD-1234"));
        assert!(text.contains("15 minutes"));
    }

    #[test]
    fn test_describe_server_error() {
        use oauth2::basic::{BasicErrorResponse, BasicErrorResponseType};

        let response = BasicErrorResponse::new(
            BasicErrorResponseType::InvalidClient,
            Some("AADSTS7000215: Invalid client secret provided.\r\nTrace ID: 1".to_string()),
            None,
        );
        let err: RequestTokenError<std::io::Error, BasicErrorResponse> =
            RequestTokenError::ServerResponse(response);
        assert_eq!(
            describe(&err),
            "invalid_client: AADSTS7000215: Invalid client secret provided."
        );
    }
}
