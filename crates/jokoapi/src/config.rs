use crate::prelude::*;
use std::time::Duration;

/// Everything the client needs to know before sending a request.
/// used to be global state (base url, default http client), now it's passed to [crate::ApiClient::new]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// endpoints are appended to this. eg: `/worlds` -> `https://api.guildwars2.com/v2/worlds`
    pub base_url: String,
    /// sent as `X-Schema-Version`
    pub schema_version: String,
    pub user_agent: String,
    /// sent as `Accept-Language` when set. the api falls back to english otherwise
    pub lang: Option<Lang>,
    pub timeout_secs: u64,
    /// api key or subtoken. sent as bearer token when set
    pub api_key: Option<String>,
}

impl ApiConfig {
    pub const TIMEOUT_SECS: u64 = 15;

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: API_BASE_V2_URL.to_string(),
            schema_version: LATEST_SCHEMA.to_string(),
            user_agent: USER_AGENT.to_string(),
            lang: None,
            timeout_secs: Self::TIMEOUT_SECS,
            api_key: None,
        }
    }
}

/// languages supported by the api
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    En,
    Es,
    De,
    Fr,
    Zh,
}

impl Lang {
    pub fn as_str(self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Es => "es",
            Lang::De => "de",
            Lang::Fr => "fr",
            Lang::Zh => "zh",
        }
    }
}

impl Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
