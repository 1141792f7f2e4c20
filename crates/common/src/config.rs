use serde::{Deserialize, Serialize};

/// How inbound comment additions reach the tree.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RealTimeMode {
    /// Apply immediately; chat-style UX.
    Auto,
    /// Buffer behind an "N new" banner until the viewer opts in.
    #[default]
    Banner,
}

/// Engine configuration supplied by the embedder.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the HTTP API, including the version prefix.
    pub api_url: String,
    /// WebSocket endpoint; `project_id` (and token, when present) are added
    /// as query parameters at connect time.
    pub ws_url: String,
    /// Public API key, sent as the `projectid` header on every request.
    pub project_id: String,
    pub real_time_mode: RealTimeMode,
}

impl ClientConfig {
    pub const DEFAULT_API_URL: &'static str = "https://api.usethreadkit.com/v1";
    pub const DEFAULT_WS_URL: &'static str = "wss://ws.usethreadkit.com";

    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            api_url: Self::DEFAULT_API_URL.to_string(),
            ws_url: Self::DEFAULT_WS_URL.to_string(),
            project_id: project_id.into(),
            real_time_mode: RealTimeMode::default(),
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = ws_url.into();
        self
    }

    pub fn with_real_time_mode(mut self, mode: RealTimeMode) -> Self {
        self.real_time_mode = mode;
        self
    }

    /// Validate the configured endpoints parse as URLs.
    pub fn validate(&self) -> crate::Result<()> {
        for (name, value) in [("api_url", &self.api_url), ("ws_url", &self.ws_url)] {
            url::Url::parse(value).map_err(|err| {
                crate::Error::validation(format!("invalid {name} `{value}`: {err}"))
            })?;
        }
        if self.project_id.is_empty() {
            return Err(crate::Error::validation("project_id must not be empty"));
        }
        Ok(())
    }
}
