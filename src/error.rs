use thiserror::Error;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Handshake,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Handshake => "handshake",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUri,
    RequestBuild,
    InvalidHeaderName,
    InvalidHeaderValue,
    Transport,
    Decompress,
    TlsConfig,
    SocketTimeout,
    RequestTimeout,
    Deserialize,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUri => "invalid_uri",
            Self::RequestBuild => "request_build",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::Transport => "transport",
            Self::Decompress => "decompress",
            Self::TlsConfig => "tls_config",
            Self::SocketTimeout => "socket_timeout",
            Self::RequestTimeout => "request_timeout",
            Self::Deserialize => "deserialize",
        }
    }
}

/// Failure of a single request.
///
/// Transport and decompression failures display the underlying error's own
/// message; the two timeout variants display fixed messages so callers can
/// tell them apart without matching on the variant.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid request target: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("{source}")]
    Transport {
        kind: TransportErrorKind,
        #[source]
        source: BoxError,
    },
    #[error("{source}")]
    Decompress {
        encoding: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid tls configuration for backend {backend}: {message}")]
    TlsConfig {
        backend: &'static str,
        message: String,
    },
    #[error("socket timeout")]
    SocketTimeout { timeout_ms: u128 },
    #[error("request timeout")]
    RequestTimeout { timeout_ms: u128 },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Decompress { .. } => ErrorCode::Decompress,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::SocketTimeout { .. } => ErrorCode::SocketTimeout,
            Self::RequestTimeout { .. } => ErrorCode::RequestTimeout,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::SocketTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    pub(crate) fn transport(
        kind: TransportErrorKind,
        source: impl Into<BoxError>,
    ) -> Self {
        Self::Transport {
            kind,
            source: source.into(),
        }
    }
}
