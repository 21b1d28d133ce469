//! Jokoapi is a thin request layer over the gw2 api v2.
//!
//! It doesn't model any of the endpoint schemas. Callers describe a request with [ApiRequest]
//! (singleton, collection or the id list of an endpoint) and decode the json into whatever type they want.
//! [ApiClient] takes care of
//!     1. the base url, schema version, language and user agent from [ApiConfig]
//!     2. authorization (bearer token)
//!     3. turning 429 and the api's error payloads into [ApiError]
//!
//! Requests are blocking, so [ApiClient::runner] wraps them for a [joko_ratelimit::RateLimiter]
//! which keeps us under the api's rate limits.
//!
//! resources:
//! 1. https://wiki.guildwars2.com/wiki/API:API_key
//! 2. https://wiki.guildwars2.com/wiki/API:2
//! 3. https://wiki.guildwars2.com/wiki/API:Main
mod client;
mod config;
mod error;
mod request;

pub use client::{ApiClient, ApiRateLimiter};
pub use config::{ApiConfig, Lang};
pub use error::ApiError;
pub use request::ApiRequest;

pub(crate) mod prelude {
    pub use crate::error::ApiError;
    pub use serde::{de::DeserializeOwned, Deserialize, Serialize};
    pub use std::fmt::Display;
    pub use tracing::{debug, trace, warn};
    pub type Result<T, E = ApiError> = std::result::Result<T, E>;
    const API_BASE_URL: &str = "https://api.guildwars2.com";
    pub const API_BASE_V2_URL: &str = const_format::concatcp!(API_BASE_URL, "/v2");
    // https://wiki.guildwars2.com/wiki/API:Changelog
    pub const LATEST_SCHEMA: &str = "2021-08-14T00:00:00Z";
    pub const USER_AGENT: &str = const_format::concatcp!("jokoapi/", env!("CARGO_PKG_VERSION"));
}
