use crate::{
    config::{ApiConfig, Lang},
    prelude::*,
    request::ApiRequest,
};
use joko_ratelimit::{
    CancellationToken, RateLimitError, RateLimiter, RateLimiterConfig, RunnerFuture,
};
use serde_json::Value;
use tokio::runtime::Handle;
use url::Url;

pub type HttpClient = ureq::Agent;
/// A rate limiter whose runner sends [ApiRequest]s and hands back the raw json.
pub type ApiRateLimiter = RateLimiter<ApiRequest, Value, ApiError>;

#[derive(Clone)]
pub struct ApiClient {
    agent: HttpClient,
    config: ApiConfig,
    base_url: Url,
}

impl ApiClient {
    pub fn new(config: ApiConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(config.base_url));
        }
        let agent = ureq::AgentBuilder::new()
            .user_agent(&config.user_agent)
            .timeout(config.timeout())
            .build();
        Ok(Self {
            agent,
            config,
            base_url,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config.api_key = Some(api_key.into());
        self
    }

    pub fn with_lang(mut self, lang: Lang) -> Self {
        self.config.lang = Some(lang);
        self
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// base url + endpoint path + query
    pub fn url(&self, request: &ApiRequest) -> Result<Url> {
        if request.endpoint().contains(['?', '#']) {
            return Err(ApiError::InvalidEndpoint(request.endpoint().to_string()));
        }
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl(self.config.base_url.clone()))?
            .pop_if_empty()
            .extend(request.endpoint().split('/').filter(|s| !s.is_empty()));
        // an empty query would still leave a trailing `?`
        if !request.query().is_empty() {
            url.query_pairs_mut().extend_pairs(request.query());
        }
        Ok(url)
    }

    /// Sends the request and decodes the json body into `T`. blocks the current thread.
    ///
    /// 304 takes the same path as 200, but it carries no body, so it ends in [ApiError::Decode].
    #[tracing::instrument(skip(self))]
    pub fn get<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let url = self.url(request)?;
        let mut http_request = self
            .agent
            .get(url.as_str())
            .set("X-Schema-Version", &self.config.schema_version);
        if let Some(api_key) = &self.config.api_key {
            http_request = http_request.set("Authorization", &format!("Bearer {api_key}"));
        }
        if let Some(lang) = self.config.lang {
            http_request = http_request.set("Accept-Language", lang.as_str());
        }
        trace!("sending request");
        match http_request.call() {
            Ok(response) => {
                debug!(status = response.status(), "received response");
                response.into_json::<T>().map_err(ApiError::Decode)
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = match response.into_string() {
                    Ok(body) => body,
                    Err(e) => {
                        warn!(?e, status, "failed to read error body");
                        String::new()
                    }
                };
                let error = ApiError::from_status(status, &body);
                warn!(%error, "request failed");
                Err(error)
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(ApiError::Transport(Box::new(transport)))
            }
        }
    }

    /// A runner for [RateLimiter]. Each call sends one request on tokio's blocking pool.
    ///
    /// An item whose token is already cancelled fails with [ApiError::Cancelled] without touching the network.
    /// If the token gets cancelled mid request, the item fails right away, but the blocking call
    /// runs on until the response arrives or the timeout hits.
    pub fn runner(
        &self,
    ) -> impl Fn(CancellationToken, ApiRequest) -> RunnerFuture<Value, ApiError> + Send + Sync + 'static
    {
        let client = self.clone();
        move |token: CancellationToken, request: ApiRequest| -> RunnerFuture<Value, ApiError> {
            let client = client.clone();
            Box::pin(async move {
                if token.is_cancelled() {
                    return Err(ApiError::Cancelled);
                }
                let blocking = tokio::task::spawn_blocking(move || client.get::<Value>(&request));
                tokio::select! {
                    _ = token.cancelled() => Err(ApiError::Cancelled),
                    joined = blocking => joined.unwrap_or_else(|e| Err(ApiError::Join(e))),
                }
            })
        }
    }

    pub fn rate_limiter(
        &self,
        handle: Handle,
        config: RateLimiterConfig,
    ) -> std::result::Result<ApiRateLimiter, RateLimitError> {
        RateLimiter::with_config(handle, config, self.runner())
    }
}
