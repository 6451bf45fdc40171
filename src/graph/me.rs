//! Signed-in user profile (/me)

use anyhow::{Context, Result};
use serde::Deserialize;

use super::client::GraphClient;

/// User profile fields returned by `/me`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
    pub user_principal_name: Option<String>,
    pub mail: Option<String>,
}

impl GraphClient {
    /// Fetch the signed-in user. Only meaningful for the delegated flows;
    /// app-only tokens get a 400 from Graph here.
    pub async fn me(&self) -> Result<User> {
        let resp = self.get("/me").await?;
        resp.json().await.context("Failed to parse /me response")
    }
}
