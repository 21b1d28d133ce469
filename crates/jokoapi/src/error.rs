use miette::Diagnostic;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Diagnostic, Debug, Error)]
pub enum ApiError {
    #[error("invalid url: {0}")]
    #[diagnostic(code(api_error::invalid_url))]
    InvalidUrl(#[from] url::ParseError),
    #[error("base url can't have a path: {0}")]
    #[diagnostic(code(api_error::invalid_base_url))]
    InvalidBaseUrl(String),
    #[error("endpoint can't carry a query or fragment: {0}")]
    #[diagnostic(
        code(api_error::invalid_endpoint),
        help("add query pairs with ApiRequest::with_query")
    )]
    InvalidEndpoint(String),
    #[error("collection request without any ids")]
    #[diagnostic(
        code(api_error::empty_ids),
        help("pass None to request every entry of the collection")
    )]
    EmptyIds,
    #[error("too many requests: 429")]
    #[diagnostic(
        code(api_error::too_many_requests),
        help("lower the rate limiter's rate_per_second")
    )]
    TooManyRequests,
    #[error("api error {status}: {}", details(.error, .text))]
    #[diagnostic(code(api_error::api))]
    Api {
        status: u16,
        error: Option<String>,
        text: Option<String>,
    },
    #[error("unexpected status code: {0}")]
    #[diagnostic(code(api_error::status))]
    Status(u16),
    #[error("http transport error")]
    #[diagnostic(code(api_error::transport))]
    Transport(#[source] Box<ureq::Transport>),
    #[error("failed to decode json response")]
    #[diagnostic(code(api_error::decode))]
    Decode(#[source] std::io::Error),
    #[error("request was cancelled")]
    #[diagnostic(code(api_error::cancelled))]
    Cancelled,
    #[error("blocking request task failed")]
    #[diagnostic(code(api_error::join))]
    Join(#[from] tokio::task::JoinError),
}

fn details(error: &Option<String>, text: &Option<String>) -> String {
    match (error, text) {
        (Some(error), Some(text)) => format!("{error}: {text}"),
        (Some(details), None) | (None, Some(details)) => details.clone(),
        (None, None) => "no details".to_string(),
    }
}

impl ApiError {
    /// maps a non 2xx status and its body to an error.
    ///
    /// the api sends a json object along with most of them.
    /// eg: `{"text": "no such id"}` or `{"error": "ErrTimeout", "text": "..."}`
    pub fn from_status(status: u16, body: &str) -> Self {
        if status == 429 {
            return ApiError::TooManyRequests;
        }
        match serde_json::from_str::<Map<String, Value>>(body) {
            Ok(payload) => {
                let field = |name: &str| payload.get(name).and_then(Value::as_str).map(str::to_owned);
                ApiError::Api {
                    status,
                    error: field("error"),
                    text: field("text"),
                }
            }
            Err(_) => ApiError::Status(status),
        }
    }

    /// whether pushing the same request again later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::TooManyRequests | ApiError::Transport(_) | ApiError::Cancelled
        ) || matches!(self, ApiError::Api { status, .. } | ApiError::Status(status) if *status >= 500)
    }
}
