//! Signaling-token acquisition

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::models::SignalingToken;
use reqwest::Client;

/// Fetches a short-lived credential for the calling backend.
///
/// Failure here is fatal for the current session-initialization attempt; any
/// retries belong to the caller, not this layer.
pub struct SignalingTokenFetcher {
    http: Client,
    base_url: String,
}

impl SignalingTokenFetcher {
    pub fn new(config: &ClientConfig) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: config.http_url(),
        }
    }

    pub async fn fetch_token(&self, user_id: &str, display_name: &str) -> Result<SignalingToken> {
        let resp = self
            .http
            .get(format!("{}/auth/stream-token", self.base_url))
            .query(&[("userId", user_id), ("userName", display_name)])
            .send()
            .await
            .map_err(|e| Error::TokenFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::TokenFetch(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }

        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::TokenFetch(e.to_string()))?;

        let value = data["token"].as_str().unwrap_or_default().to_string();
        if value.is_empty() {
            return Err(Error::TokenFetch("token endpoint returned no token".into()));
        }

        Ok(SignalingToken {
            value,
            subject_user_id: user_id.to_string(),
        })
    }
}
