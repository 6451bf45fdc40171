//! Loopback listener that receives the authorization code redirect

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const SUCCESS_PAGE: &str = "<html><body><h3>Signed in.</h3>\
    <p>You can close this window and return to the notebook.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h3>Sign-in failed.</h3>\
    <p>Return to the notebook for details.</p></body></html>";

/// What a single request to the redirect URI carried.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum RedirectOutcome {
    Code(String),
    Error(String),
    /// No code and no error, e.g. a reload of the bare redirect URI.
    Ignored,
}

/// Interpret the query parameters of a redirect.
pub(super) fn parse_redirect(
    params: &HashMap<String, String>,
    expected_state: &str,
) -> RedirectOutcome {
    if let Some(error) = params.get("error") {
        return RedirectOutcome::Error(match params.get("error_description") {
            Some(description) => format!("{}: {}", error, description),
            None => error.clone(),
        });
    }

    match params.get("code") {
        Some(_) if params.get("state").map(String::as_str) != Some(expected_state) => {
            RedirectOutcome::Error("state mismatch in redirect (possible CSRF)".to_string())
        }
        Some(code) => RedirectOutcome::Code(code.clone()),
        None => RedirectOutcome::Ignored,
    }
}

/// Shared state for the callback route.
struct CallbackState {
    expected_state: String,
    /// Taken by the first request that settles the sign-in.
    outcome: Mutex<Option<oneshot::Sender<Result<String, String>>>>,
}

impl CallbackState {
    fn settle(&self, outcome: Result<String, String>) {
        let sender = self
            .outcome
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.send(outcome);
            }
            None => tracing::debug!("Ignoring redirect after sign-in was already settled"),
        }
    }
}

/// Handle GET / with the authorization response in the query string.
async fn handle_redirect(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    match parse_redirect(&params, &state.expected_state) {
        RedirectOutcome::Code(code) => {
            state.settle(Ok(code));
            (StatusCode::OK, Html(SUCCESS_PAGE))
        }
        RedirectOutcome::Error(reason) => {
            state.settle(Err(reason));
            (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE))
        }
        RedirectOutcome::Ignored => (StatusCode::NOT_FOUND, Html("")),
    }
}

pub(super) struct RedirectListener {
    listener: TcpListener,
    port: u16,
}

impl RedirectListener {
    /// Bind an ephemeral loopback port.
    pub(super) async fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub(super) fn redirect_uri(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Serve the redirect URI until a request carries the authorization code
    /// or an error.
    ///
    /// The server shuts down once this returns, or when the future is dropped
    /// (timeout, cancellation).
    pub(super) async fn wait_for_code(self, expected_state: &str) -> Result<String, String> {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let state = Arc::new(CallbackState {
            expected_state: expected_state.to_string(),
            outcome: Mutex::new(Some(outcome_tx)),
        });
        let router = Router::new()
            .route("/", get(handle_redirect))
            .with_state(state);

        // Dropping the sender also triggers shutdown.
        let (_shutdown, shutdown_rx) = oneshot::channel::<()>();
        let listener = self.listener;
        tokio::spawn(async move {
            let shutdown = async {
                let _ = shutdown_rx.await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::debug!("Redirect listener stopped: {}", e);
            }
        });

        outcome_rx
            .await
            .map_err(|_| "redirect listener stopped before sign-in completed".to_string())?
    }
}
