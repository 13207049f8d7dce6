use http::Method;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Timeout,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidBackend,
    NoBackends,
    WeightMismatch,
    CredentialLoad,
    UnsupportedMethod,
    UnsupportedParamType,
    EncodingFailure,
    TransportFailure,
    ReadBody,
    ResponseBodyTooLarge,
    DecodeFailure,
    InvalidUri,
    InvalidHeader,
    RequestBuild,
    MissingHeader,
    InvalidHeaderDate,
    LocalFile,
    NoResponse,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidBackend => "invalid_backend",
            Self::NoBackends => "no_backends",
            Self::WeightMismatch => "weight_mismatch",
            Self::CredentialLoad => "credential_load",
            Self::UnsupportedMethod => "unsupported_method",
            Self::UnsupportedParamType => "unsupported_param_type",
            Self::EncodingFailure => "encoding_failure",
            Self::TransportFailure => "transport_failure",
            Self::ReadBody => "read_body",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::DecodeFailure => "decode_failure",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidHeader => "invalid_header",
            Self::RequestBuild => "request_build",
            Self::MissingHeader => "missing_header",
            Self::InvalidHeaderDate => "invalid_header_date",
            Self::LocalFile => "local_file",
            Self::NoResponse => "no_response",
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("prefix of base URL {base_url} is not http or https")]
    InvalidBackend { base_url: String },
    #[error("backend selector requires at least one item")]
    NoBackends,
    #[error("weights before item #{index} expected")]
    WeightsBeforeItemExpected { index: usize },
    #[error("weight for item #{index}({base_url}) expected")]
    WeightForItemExpected { index: usize, base_url: String },
    #[error("failed to load tls credentials: {message}")]
    CredentialLoad { message: String },
    #[error("method {method} not supported")]
    UnsupportedMethod { method: String },
    #[error("unsupported parameter shape for {mode} call: {shape}")]
    UnsupportedParamType {
        mode: &'static str,
        shape: &'static str,
    },
    #[error("failed to serialize request json: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("failed to read request parameters: {source}")]
    ReadParams {
        #[source]
        source: std::io::Error,
    },
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to read response body for {method} {uri}: {source}")]
    ReadBody {
        method: Method,
        uri: String,
        #[source]
        source: std::io::Error,
    },
    #[error(
        "response body too large ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("invalid request uri: {uri}")]
    InvalidUri { uri: String },
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
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("no response header {name}")]
    MissingHeader { name: &'static str },
    #[error("invalid date in response header {name}: {value}")]
    InvalidHeaderDate { name: &'static str, value: String },
    #[error("failed to read metadata of {path}: {source}")]
    LocalFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("no response available")]
    NoResponse,
}

impl Error {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidBackend { .. } => ErrorCode::InvalidBackend,
            Self::NoBackends => ErrorCode::NoBackends,
            Self::WeightsBeforeItemExpected { .. } | Self::WeightForItemExpected { .. } => {
                ErrorCode::WeightMismatch
            }
            Self::CredentialLoad { .. } => ErrorCode::CredentialLoad,
            Self::UnsupportedMethod { .. } => ErrorCode::UnsupportedMethod,
            Self::UnsupportedParamType { .. } => ErrorCode::UnsupportedParamType,
            Self::SerializeJson { .. } | Self::SerializeForm { .. } | Self::ReadParams { .. } => {
                ErrorCode::EncodingFailure
            }
            Self::Transport { .. } => ErrorCode::TransportFailure,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::Deserialize { .. } => ErrorCode::DecodeFailure,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::InvalidHeaderName { .. } | Self::InvalidHeaderValue { .. } => {
                ErrorCode::InvalidHeader
            }
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::MissingHeader { .. } => ErrorCode::MissingHeader,
            Self::InvalidHeaderDate { .. } => ErrorCode::InvalidHeaderDate,
            Self::LocalFile { .. } => ErrorCode::LocalFile,
            Self::NoResponse => ErrorCode::NoResponse,
        }
    }

    pub fn transport_kind(&self) -> Option<TransportErrorKind> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Errors produced before any bytes reach the network.
    pub const fn is_pre_flight(&self) -> bool {
        matches!(
            self.code(),
            ErrorCode::UnsupportedMethod
                | ErrorCode::UnsupportedParamType
                | ErrorCode::EncodingFailure
                | ErrorCode::InvalidUri
                | ErrorCode::InvalidHeader
                | ErrorCode::RequestBuild
                | ErrorCode::CredentialLoad
        )
    }
}
