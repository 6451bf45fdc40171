//! Host kernel integration
//!
//! The host hands the extension an explicit `CommandRegistry` at load time;
//! directives are then dispatched against a `Session` with a cancellation
//! token for the invocation.

pub mod command;
mod session;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{ConnectError, Result};

pub use command::{ConnectArgs, MicrosoftGraphCommand, DEFAULT_SCOPE_NAME, DIRECTIVE};
pub use session::{Binding, Bindings, Diagnostic, Diagnostics, Level, Session};

/// A directive the host can dispatch.
#[async_trait]
pub trait KernelCommand: Send + Sync {
    /// Directive name including its prefix, e.g. `#!microsoftgraph`.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Run with the tokens that followed the directive name.
    async fn invoke(
        &self,
        args: Vec<String>,
        session: &mut Session,
        cancel: CancellationToken,
    ) -> Result<()>;
}

/// Directives registered with the host.
#[derive(Default)]
pub struct CommandRegistry {
    commands: BTreeMap<String, Arc<dyn KernelCommand>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a command, replacing any earlier one with the same name.
    pub fn register(&mut self, command: Arc<dyn KernelCommand>) {
        tracing::debug!("Registering directive {}", command.name());
        self.commands.insert(command.name().to_string(), command);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn KernelCommand>> {
        self.commands.get(name).cloned()
    }

    /// Registered directives with their descriptions, sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.commands
            .values()
            .map(|c| (c.name(), c.description()))
            .collect()
    }

    /// Run a command by name with pre-split arguments.
    pub async fn invoke(
        &self,
        name: &str,
        args: Vec<String>,
        session: &mut Session,
        cancel: CancellationToken,
    ) -> Result<()> {
        let Some(command) = self.get(name) else {
            let err = ConnectError::Usage(format!("Unknown directive '{}'", name));
            session.diagnostics.error(err.to_string());
            return Err(err);
        };
        command.invoke(args, session, cancel).await
    }

    /// Parse and run a directive line such as
    /// `#!microsoftgraph --authentication-flow DeviceCode --client-id abc`.
    pub async fn dispatch(
        &self,
        line: &str,
        session: &mut Session,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut tokens = match split_directive(line) {
            Ok(tokens) if tokens.is_empty() => Err("Empty directive".to_string()),
            other => other,
        }
        .map_err(|reason| {
            session.diagnostics.error(reason.clone());
            ConnectError::Usage(reason)
        })?;
        let name = tokens.remove(0);
        self.invoke(&name, tokens, session, cancel).await
    }
}

/// Register this extension's directives with the host.
pub fn load_extension(registry: &mut CommandRegistry) {
    registry.register(Arc::new(MicrosoftGraphCommand::default()));
    tracing::info!("Loaded Microsoft Graph extension ({} available)", DIRECTIVE);
}

/// Split a directive line on whitespace; double quotes group, backslash
/// escapes the next character inside quotes.
fn split_directive(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = line.trim().chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            '\\' if in_quotes => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_quotes {
        return Err("Unterminated quote in directive".to_string());
    }
    if in_token {
        tokens.push(current);
    }
    Ok(tokens)
}
