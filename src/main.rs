//! msgraph-connect - run the `#!microsoftgraph` directive from a terminal
//!
//! Hosts the extension in a throwaway session so the sign-in flows can be
//! exercised without a notebook.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use msgraph_connect::graph::{resolve, ApiVersion, GraphClient, NationalCloud};
use msgraph_connect::kernel::{ConnectArgs, Level, MicrosoftGraphCommand, DIRECTIVE};
use msgraph_connect::{load_extension, CommandRegistry, Session};

#[derive(Parser)]
#[command(name = "msgraph-connect")]
#[command(about = "Sign in to Microsoft Graph the way the notebook extension does", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print the sign-in URL instead of opening a browser
    #[arg(long, global = true)]
    no_browser: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run #!microsoftgraph and show the resulting binding
    Connect {
        /// Directive options, e.g. --authentication-flow DeviceCode --client-id <id>
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        directive: Vec<String>,
    },

    /// Run #!microsoftgraph, then call /me with the bound client
    Whoami {
        /// Directive options, e.g. --authentication-flow DeviceCode --client-id <id>
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        directive: Vec<String>,
    },

    /// Print the national cloud / API version endpoint table
    Endpoints,
}

/// Run the directive in `session`, cancelling the sign-in on Ctrl+C.
///
/// Returns whether it succeeded. Failures are reported through the drained
/// diagnostics only.
async fn run_directive(registry: &CommandRegistry, session: &mut Session, args: Vec<String>) -> bool {
    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Cancelling sign-in...");
            on_ctrl_c.cancel();
        }
    });

    let result = registry.invoke(DIRECTIVE, args, session, cancel).await;
    watcher.abort();

    for diagnostic in session.diagnostics.drain() {
        match diagnostic.level {
            Level::Error => eprintln!("{}", diagnostic),
            Level::Info => println!("{}", diagnostic),
        }
    }
    result.is_ok()
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut registry = CommandRegistry::new();
    load_extension(&mut registry);
    if cli.no_browser {
        registry.register(Arc::new(MicrosoftGraphCommand {
            launch_browser: false,
            ..Default::default()
        }));
    }
    let mut session = Session::new();

    match cli.command {
        Commands::Connect { directive } => {
            let scope_name = ConnectArgs::parse_directive(directive.clone())?.scope_name;
            if !run_directive(&registry, &mut session, directive).await {
                return Ok(ExitCode::FAILURE);
            }

            let binding = session
                .bindings
                .get(scope_name.trim())
                .context("Directive succeeded but no binding was created")?;
            println!();
            println!("Name: {}", binding.name);
            println!("Type: {}", binding.declared_type);
            if let Some(client) = binding.downcast::<GraphClient>() {
                println!("URL:  {}", client.base_url());
                println!("Scopes: {}", client.scopes());
            }
        }
        Commands::Whoami { directive } => {
            let scope_name = ConnectArgs::parse_directive(directive.clone())?.scope_name;
            if !run_directive(&registry, &mut session, directive).await {
                return Ok(ExitCode::FAILURE);
            }

            let client = session
                .bindings
                .get_as::<GraphClient>(scope_name.trim())
                .context("No Graph client bound")?;
            let me = client.me().await?;

            println!();
            println!(
                "Display Name: {}",
                me.display_name.as_deref().unwrap_or("(none)")
            );
            println!("Mail:         {}", me.mail.as_deref().unwrap_or("(none)"));
            println!(
                "UPN:          {}",
                me.user_principal_name.as_deref().unwrap_or("(none)")
            );
            println!("ID:           {}", me.id);
        }
        Commands::Endpoints => {
            println!("{:<16} {:<5} {:<44} Scopes", "Cloud", "API", "Base URL");
            println!("{:-<100}", "");
            for cloud in NationalCloud::ALL {
                for version in ApiVersion::ALL {
                    let endpoint = resolve(cloud, version);
                    println!(
                        "{:<16} {:<5} {:<44} {}",
                        cloud.to_string(),
                        version.to_string(),
                        endpoint.base_url,
                        endpoint.scopes
                    );
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}
