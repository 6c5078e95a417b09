//! Configuration for the MentorLink call core

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server: ServerConfig,
    /// API key for the third-party calling backend.
    pub api_key: String,
    /// Base URL of the web app, used to build call invite deep links.
    pub app_url: String,
    /// ICE bootstrap list handed to the calling backend at client
    /// construction. Must contain at least one STUN server.
    pub ice_servers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: String::new(),
                port: 8443,
                use_tls: true,
            },
            api_key: String::new(),
            app_url: String::new(),
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

impl ClientConfig {
    pub fn load(data_dir: &Path) -> crate::Result<Self> {
        let config_path = data_dir.join("config.json");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, data_dir: &Path) -> crate::Result<()> {
        let config_path = data_dir.join("config.json");
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn http_url(&self) -> String {
        let scheme = if self.server.use_tls { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.server.host, self.server.port)
    }

    fn ws_base(&self) -> String {
        let scheme = if self.server.use_tls { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.server.host, self.server.port)
    }

    /// WebSocket endpoint for call-signaling events.
    pub fn call_ws_url(&self) -> String {
        format!("{}/ws/call", self.ws_base())
    }

    /// WebSocket endpoint for the chat messaging channel.
    pub fn chat_ws_url(&self) -> String {
        format!("{}/ws/chat", self.ws_base())
    }

    /// Deep link a recipient can follow to join an existing session.
    pub fn invite_link(&self, session_id: &str) -> String {
        format!("{}/call/{}", self.app_url.trim_end_matches('/'), session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let mut config = ClientConfig::default();
        config.server.host = "api.mentorlink.test".to_string();
        config.server.port = 8443;
        config.app_url = "https://app.mentorlink.test/".to_string();

        assert_eq!(config.http_url(), "https://api.mentorlink.test:8443");
        assert_eq!(config.call_ws_url(), "wss://api.mentorlink.test:8443/ws/call");
        assert_eq!(config.chat_ws_url(), "wss://api.mentorlink.test:8443/ws/chat");
        assert_eq!(
            config.invite_link("call-42"),
            "https://app.mentorlink.test/call/call-42"
        );
    }

    #[test]
    fn test_default_has_stun_server() {
        let config = ClientConfig::default();
        assert!(config.ice_servers.iter().any(|s| s.starts_with("stun:")));
    }
}
