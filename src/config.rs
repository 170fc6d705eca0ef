//! Client configuration from the environment

use std::fmt;

const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Backend API version selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApiVersion {
    /// Legacy protocol: `messages` arrays, session tokens, 401 on expiry
    V2,
    /// Current protocol: single `message`, 404 on expiry
    #[default]
    V3,
    /// Unversioned legacy endpoints `flow_intro` and `flow_step`, v2 bodies
    Flow,
}

impl ApiVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiVersion::V2 => "v2",
            ApiVersion::V3 => "v3",
            ApiVersion::Flow => "flow",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "v2" => Some(ApiVersion::V2),
            "v3" => Some(ApiVersion::V3),
            "flow" | "legacy" => Some(ApiVersion::Flow),
            _ => None,
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how to reach the conversation backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL without trailing slash
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_version: ApiVersion,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            api_key: None,
            api_version: ApiVersion::default(),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base_url = lookup("WUFFCHAT_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let api_key = lookup("WUFFCHAT_API_KEY").filter(|key| !key.trim().is_empty());

        let api_version = match lookup("WUFFCHAT_API_VERSION") {
            None => ApiVersion::default(),
            Some(raw) => ApiVersion::parse(&raw).unwrap_or_else(|| {
                tracing::warn!(value = %raw, "Unknown WUFFCHAT_API_VERSION, using v3");
                ApiVersion::default()
            }),
        };

        Self {
            base_url,
            api_key,
            api_version,
        }
    }
}
