use thiserror::Error;

/// Errors raised while decoding STOMP frames
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Unknown STOMP command: {0}")]
    UnknownCommand(String),

    #[error("Malformed header line: {0}")]
    MalformedHeader(String),

    #[error("Invalid header escape sequence: \\{0}")]
    InvalidEscape(char),

    #[error("Invalid content-length header: {0}")]
    InvalidContentLength(String),

    #[error("Frame body is not valid UTF-8")]
    InvalidUtf8,

    /// content-length said the body ends here, but no NUL terminator follows
    #[error("Frame body is not terminated by NUL")]
    MissingTerminator,
}

/// Errors from the REST API (history, inbox, login)
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Not authorized (HTTP {0})")]
    Unauthorized(u16),

    #[error("Request failed with HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Request rejected by server: {0}")]
    Rejected(String),

    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unsupported URL scheme '{0}' (expected http, https, ws or wss)")]
    UnsupportedScheme(String),

    #[error("Invalid value for {name}: '{value}'")]
    InvalidNumber { name: String, value: String },
}
