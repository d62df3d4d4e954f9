//! Client errors and response classification

use reqwest::StatusCode;
use serde::Deserialize;
use taskboard_model::FieldName;
use taskboard_sync::AuthorityError;

/// Failure to build the client
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid base url: {0}")]
    Url(String),

    #[error("token is not a valid header value")]
    Token(#[from] reqwest::header::InvalidHeaderValue),

    #[error("http client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Validation body produced by the server's request validators
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<FieldIssue>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FieldIssue {
    #[serde(alias = "path")]
    param: Option<String>,
    msg: Option<String>,
}

/// Map a non-success response to an authority failure
#[must_use]
pub fn classify(status: StatusCode, body: &str) -> AuthorityError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .errors
        .first()
        .and_then(|issue| issue.msg.clone())
        .or(parsed.message)
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            match parsed.errors.into_iter().find_map(|issue| issue.param) {
                Some(param) => AuthorityError::invalid_field(FieldName::new(param), message),
                None => AuthorityError::validation(message),
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AuthorityError::Unauthorized,
        StatusCode::NOT_FOUND => AuthorityError::NotFound(message),
        StatusCode::CONFLICT => AuthorityError::Conflict(message),
        _ => AuthorityError::transient(format!("{status}: {message}")),
    }
}

/// Map a transport failure
#[must_use]
pub fn transport(err: &reqwest::Error) -> AuthorityError {
    AuthorityError::transient(err.to_string())
}
