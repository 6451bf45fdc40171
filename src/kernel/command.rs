//! The `#!microsoftgraph` directive
//!
//! merge -> validate -> build credential -> resolve endpoint -> assemble ->
//! bind. Any failure aborts the invocation before the bind step, so the
//! session's bindings only ever change on success.

use async_trait::async_trait;
use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{KernelCommand, Session};
use crate::auth::credential::{DEFAULT_BROWSER_TIMEOUT, DEFAULT_DEVICE_CODE_TIMEOUT};
use crate::auth::{self, AuthenticationFlow, SignInContext};
use crate::config::{self, CredentialOptions};
use crate::error::{ConnectError, Result};
use crate::graph::{self, ApiVersion, NationalCloud};

/// Directive name registered with the host.
pub const DIRECTIVE: &str = "#!microsoftgraph";

/// Binding name used when `--scope-name` is not given.
pub const DEFAULT_SCOPE_NAME: &str = "graphClient";

/// Options accepted by `#!microsoftgraph`.
#[derive(Debug, Clone, Args)]
pub struct ConnectArgs {
    /// Application (client) ID of the app registration
    #[arg(long)]
    pub client_id: Option<String>,

    /// Directory (tenant) ID; delegated flows fall back to "common"
    #[arg(long)]
    pub tenant_id: Option<String>,

    /// Client secret (ClientSecret flow only)
    #[arg(long)]
    pub client_secret: Option<String>,

    /// JSON or TOML file with clientId / tenantId / clientSecret
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Name the client is bound under in the session
    #[arg(long, default_value = DEFAULT_SCOPE_NAME)]
    pub scope_name: String,

    /// InteractiveBrowser, DeviceCode or ClientSecret
    #[arg(long, default_value = "InteractiveBrowser")]
    pub authentication_flow: String,

    /// National cloud deployment
    #[arg(long, value_enum, ignore_case = true, default_value_t = NationalCloud::Global)]
    pub national_cloud: NationalCloud,

    /// Graph API version
    #[arg(long, value_enum, ignore_case = true, default_value_t = ApiVersion::V1)]
    pub api_version: ApiVersion,
}

#[derive(Debug, Parser)]
#[command(name = DIRECTIVE, no_binary_name = true)]
struct Directive {
    #[command(flatten)]
    args: ConnectArgs,
}

impl ConnectArgs {
    /// Parse the tokens that followed the directive name.
    pub fn parse_directive<I, T>(tokens: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let directive = Directive::try_parse_from(tokens)
            .map_err(|e| ConnectError::Usage(e.render().to_string().trim_end().to_string()))?;
        Ok(directive.args)
    }
}

/// Kernel command for `#!microsoftgraph`.
///
/// The fields are host settings for the interactive sign-in waits; register
/// a configured instance to override the defaults.
#[derive(Debug, Clone)]
pub struct MicrosoftGraphCommand {
    pub device_code_timeout: Duration,
    pub browser_timeout: Duration,
    /// Open the system browser for InteractiveBrowser; the authorize URL is
    /// reported as a diagnostic either way.
    pub launch_browser: bool,
}

impl Default for MicrosoftGraphCommand {
    fn default() -> Self {
        Self {
            device_code_timeout: DEFAULT_DEVICE_CODE_TIMEOUT,
            browser_timeout: DEFAULT_BROWSER_TIMEOUT,
            launch_browser: true,
        }
    }
}

impl MicrosoftGraphCommand {
    /// Sign-in settings for one invocation; notices go to the session's
    /// diagnostics.
    pub fn sign_in_context(&self, session: &Session, cancel: CancellationToken) -> SignInContext {
        let diagnostics = session.diagnostics.clone();
        let mut ctx = SignInContext::new(cancel)
            .with_notifier(move |notice| diagnostics.info(notice.to_string()));
        ctx.device_code_timeout = self.device_code_timeout;
        ctx.browser_timeout = self.browser_timeout;
        ctx.launch_browser = self.launch_browser;
        ctx
    }
}

#[async_trait]
impl KernelCommand for MicrosoftGraphCommand {
    fn name(&self) -> &str {
        DIRECTIVE
    }

    fn description(&self) -> &str {
        "Sign in to Microsoft Graph and bind a configured client in the session"
    }

    async fn invoke(
        &self,
        args: Vec<String>,
        session: &mut Session,
        cancel: CancellationToken,
    ) -> Result<()> {
        let outcome = match ConnectArgs::parse_directive(args) {
            Ok(args) => {
                let ctx = self.sign_in_context(session, cancel);
                connect(args, session, &ctx).await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            tracing::warn!("{} failed: {}", DIRECTIVE, e.kind());
            session.diagnostics.error(format!("{}: {}", e.kind(), e));
        }
        outcome
    }
}

/// Run the whole pipeline and bind the resulting client.
pub async fn connect(args: ConnectArgs, session: &mut Session, ctx: &SignInContext) -> Result<()> {
    let scope_name = args.scope_name.trim().to_string();
    if scope_name.is_empty() {
        return Err(ConnectError::Usage("--scope-name must not be empty".to_string()));
    }

    let flow: AuthenticationFlow = args.authentication_flow.parse()?;
    let cloud = args.national_cloud;
    let version = args.api_version;

    let explicit = CredentialOptions {
        client_id: args.client_id,
        tenant_id: args.tenant_id,
        client_secret: args.client_secret,
        config_file: args.config_file.clone(),
    };
    let options = config::merge(explicit, args.config_file.as_deref())?;
    let validated = auth::validate(&options, flow)?;
    tracing::debug!("Options valid for {}", flow);

    let credential = auth::create(validated, cloud, ctx).await?;

    let endpoint = graph::resolve(cloud, version);
    tracing::debug!("Resolved {} {} to {}", cloud, version, endpoint.base_url);
    let client = graph::assemble(credential, endpoint.scopes, endpoint.base_url, version);

    let declared_type = client.type_name();
    if session
        .bindings
        .bind(scope_name.clone(), declared_type, client)
        .is_some()
    {
        tracing::debug!("Replaced existing binding {}", scope_name);
    }

    tracing::info!("Bound {} as {}", declared_type, scope_name);
    session.diagnostics.info(format!(
        "{} ({}, {} cloud) declared with name: {}",
        declared_type, flow, cloud, scope_name
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::OptionField;
    use crate::graph::GraphClient;
    use crate::kernel::{load_extension, CommandRegistry, Level};
    use std::io::Write;

    fn registry() -> CommandRegistry {
        let mut registry = CommandRegistry::new();
        load_extension(&mut registry);
        registry
    }

    fn run(registry: &CommandRegistry, session: &mut Session, line: &str) -> Result<()> {
        tokio_test::block_on(registry.dispatch(line, session, CancellationToken::new()))
    }

    #[test]
    fn test_client_secret_binds_v1_client() {
        let registry = registry();
        let mut session = Session::new();

        run(
            &registry,
            &mut session,
            "#!microsoftgraph --authentication-flow ClientSecret --client-id app \
             --tenant-id contoso --client-secret s3cret --scope-name myClient",
        )
        .unwrap();

        let binding = session.bindings.get("myClient").unwrap();
        assert_eq!(binding.declared_type, "GraphServiceClient");

        let client = session.bindings.get_as::<GraphClient>("myClient").unwrap();
        assert_eq!(client.version(), ApiVersion::V1);
        assert_eq!(client.base_url(), "https://graph.microsoft.com/v1.0");
        assert_eq!(client.credential().flow(), AuthenticationFlow::ClientSecret);

        let diagnostics = session.diagnostics.drain();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].level, Level::Info);
        assert!(diagnostics[0].message.contains("myClient"));
    }

    #[test]
    fn test_missing_secret_reports_all_fields() {
        let registry = registry();
        let mut session = Session::new();

        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"clientId": "from-file"}}"#).unwrap();
        let line = format!(
            "#!microsoftgraph --authentication-flow ClientSecret --config-file \"{}\"",
            file.path().display()
        );

        let err = run(&registry, &mut session, &line).unwrap_err();
        let ConnectError::Validation(report) = &err else {
            panic!("expected validation error, got {:?}", err);
        };
        assert_eq!(
            report.missing_fields(),
            vec![OptionField::TenantId, OptionField::ClientSecret]
        );
        assert!(session.bindings.is_empty());

        let diagnostics = session.diagnostics.drain();
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].level, Level::Error);
        assert!(diagnostics[0].message.contains("ValidationError"));
        assert!(diagnostics[0].message.contains("tenantId"));
        assert!(diagnostics[0].message.contains("clientSecret"));
    }

    #[test]
    fn test_nothing_configured_for_client_secret() {
        let registry = registry();
        let mut session = Session::new();

        let err = run(
            &registry,
            &mut session,
            "#!microsoftgraph --authentication-flow ClientSecret",
        )
        .unwrap_err();
        let message = err.to_string();
        for field in ["clientId", "tenantId", "clientSecret"] {
            assert!(message.contains(field), "{} missing from {}", field, message);
        }
    }

    #[test]
    fn test_beta_germany_binds_beta_client() {
        let registry = registry();
        let mut session = Session::new();

        run(
            &registry,
            &mut session,
            "#!microsoftgraph --authentication-flow client-secret --client-id app \
             --tenant-id contoso --client-secret s3cret --national-cloud germany \
             --api-version beta",
        )
        .unwrap();

        let binding = session.bindings.get(DEFAULT_SCOPE_NAME).unwrap();
        assert_eq!(binding.declared_type, "BetaGraphServiceClient");

        let client = binding.downcast::<GraphClient>().unwrap();
        assert_eq!(client.base_url(), "https://graph.microsoft.de/beta");
        assert_eq!(
            client.scopes().iter().collect::<Vec<_>>(),
            vec!["https://graph.microsoft.de/.default"]
        );
        assert_eq!(client.credential().cloud(), NationalCloud::Germany);
    }

    #[test]
    fn test_cancelled_device_code_leaves_bindings_untouched() {
        let registry = registry();
        let mut session = Session::new();

        run(
            &registry,
            &mut session,
            "#!microsoftgraph --authentication-flow ClientSecret --client-id app \
             --tenant-id contoso --client-secret s3cret",
        )
        .unwrap();
        session.diagnostics.drain();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = tokio_test::block_on(registry.dispatch(
            "#!microsoftgraph --authentication-flow DeviceCode --client-id app --api-version beta",
            &mut session,
            cancel,
        ))
        .unwrap_err();

        assert_eq!(err.kind(), "CredentialConstructionError");
        assert_eq!(session.bindings.len(), 1);
        assert_eq!(
            session.bindings.get(DEFAULT_SCOPE_NAME).unwrap().declared_type,
            "GraphServiceClient"
        );
        assert_eq!(session.diagnostics.drain()[0].level, Level::Error);
    }

    #[test]
    fn test_host_settings_bound_browser_wait() {
        let mut registry = CommandRegistry::new();
        registry.register(std::sync::Arc::new(MicrosoftGraphCommand {
            browser_timeout: Duration::from_millis(50),
            launch_browser: false,
            ..Default::default()
        }));
        let mut session = Session::new();

        let err = run(&registry, &mut session, "#!microsoftgraph --client-id app").unwrap_err();
        assert_eq!(err.kind(), "CredentialConstructionError");
        assert!(err.to_string().contains("no redirect received"));
        assert!(session.bindings.is_empty());

        let diagnostics = session.diagnostics.drain();
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[0].level, Level::Info);
        assert!(diagnostics[0]
            .message
            .contains("https://login.microsoftonline.com/common/oauth2/v2.0/authorize?"));
        assert_eq!(diagnostics[1].level, Level::Error);
    }

    #[test]
    fn test_sign_in_context_carries_host_settings() {
        let command = MicrosoftGraphCommand {
            device_code_timeout: Duration::from_secs(60),
            browser_timeout: Duration::from_secs(30),
            launch_browser: false,
        };
        let session = Session::new();
        let ctx = command.sign_in_context(&session, CancellationToken::new());
        assert_eq!(ctx.device_code_timeout, Duration::from_secs(60));
        assert_eq!(ctx.browser_timeout, Duration::from_secs(30));
        assert!(!ctx.launch_browser);

        let defaults = MicrosoftGraphCommand::default();
        assert_eq!(defaults.device_code_timeout, DEFAULT_DEVICE_CODE_TIMEOUT);
        assert!(defaults.launch_browser);
    }

    #[test]
    fn test_rebinding_same_name_last_write_wins() {
        let registry = registry();
        let mut session = Session::new();
        let base = "#!microsoftgraph --authentication-flow ClientSecret --client-id app \
                    --tenant-id contoso --client-secret s3cret --scope-name g";

        run(&registry, &mut session, base).unwrap();
        run(&registry, &mut session, &format!("{} --api-version beta", base)).unwrap();

        assert_eq!(session.bindings.len(), 1);
        assert_eq!(
            session.bindings.get("g").unwrap().declared_type,
            "BetaGraphServiceClient"
        );
    }

    #[test]
    fn test_unsupported_flow() {
        let registry = registry();
        let mut session = Session::new();

        let err = run(
            &registry,
            &mut session,
            "#!microsoftgraph --authentication-flow UsernamePassword --client-id app",
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UnsupportedFlowError");
        assert!(session.bindings.is_empty());
    }

    #[test]
    fn test_explicit_missing_config_file() {
        let registry = registry();
        let mut session = Session::new();
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");

        let err = run(
            &registry,
            &mut session,
            &format!(
                "#!microsoftgraph --client-id app --config-file \"{}\"",
                missing.display()
            ),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "ConfigLoadError");
        assert!(session.bindings.is_empty());
    }

    #[test]
    fn test_bad_national_cloud_is_usage_error() {
        let registry = registry();
        let mut session = Session::new();

        let err = run(&registry, &mut session, "#!microsoftgraph --national-cloud mars")
            .unwrap_err();
        assert_eq!(err.kind(), "UsageError");
        assert!(err.to_string().contains("mars"));
    }

    #[test]
    fn test_empty_scope_name_rejected() {
        let registry = registry();
        let mut session = Session::new();

        let err = run(
            &registry,
            &mut session,
            r#"#!microsoftgraph --authentication-flow ClientSecret --client-id a --tenant-id t --client-secret s --scope-name " ""#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UsageError");
        assert!(session.bindings.is_empty());
    }

    #[test]
    fn test_parse_defaults() {
        let args = ConnectArgs::parse_directive(Vec::<String>::new()).unwrap();
        assert_eq!(args.scope_name, DEFAULT_SCOPE_NAME);
        assert_eq!(
            args.authentication_flow.parse::<AuthenticationFlow>().unwrap(),
            AuthenticationFlow::InteractiveBrowser
        );
        assert_eq!(args.national_cloud, NationalCloud::Global);
        assert_eq!(args.api_version, ApiVersion::V1);
        assert!(args.client_id.is_none());
    }

    #[test]
    fn test_parse_case_insensitive_enums() {
        let args = ConnectArgs::parse_directive([
            "--national-cloud",
            "US-GOVERNMENT-DOD",
            "--api-version",
            "Beta",
        ])
        .unwrap();
        assert_eq!(args.national_cloud, NationalCloud::UsGovernmentDoD);
        assert_eq!(args.api_version, ApiVersion::Beta);
    }
}
