use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};

use crate::error::Error;
use crate::params::{CallMode, Params};
use crate::selector::BackendSelector;
use crate::sink::BodySink;
use crate::tls::{TlsCredentials, credential_error};
use crate::util::{parse_header_name, parse_header_value};

/// Username and password sent as an HTTP basic `Authorization` header.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl std::fmt::Debug for BasicAuth {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn header_value(&self) -> crate::Result<HeaderValue> {
        let encoded = STANDARD.encode(format!("{}:{}", self.username, self.password));
        let mut value = parse_header_value("authorization", &format!("Basic {encoded}"))?;
        value.set_sensitive(true);
        Ok(value)
    }
}

/// Per-call options: method, parameters, headers, encoding mode, credentials,
/// timeout, body handling and the optional backend selector.
///
/// Every setter returns the updated config so calls can be chained.
#[derive(Debug)]
pub struct CallConfig {
    pub(crate) method: Option<Method>,
    pub(crate) params: Option<Params>,
    pub(crate) headers: HeaderMap,
    pub(crate) mode: CallMode,
    pub(crate) basic_auth: Option<BasicAuth>,
    pub(crate) tls_credentials: Option<TlsCredentials>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) read_body_eagerly: bool,
    pub(crate) backends: Option<Arc<BackendSelector>>,
    pub(crate) body_sink: Option<BodySink>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CallConfig {
    pub fn new() -> Self {
        Self {
            method: None,
            params: None,
            headers: HeaderMap::new(),
            mode: CallMode::PlainHttp,
            basic_auth: None,
            tls_credentials: None,
            timeout: None,
            read_body_eagerly: true,
            backends: None,
            body_sink: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Parses `method` case-insensitively.
    pub fn try_method(self, method: &str) -> crate::Result<Self> {
        let upper = method.trim().to_ascii_uppercase();
        let parsed =
            Method::from_bytes(upper.as_bytes()).map_err(|_| Error::UnsupportedMethod {
                method: method.to_owned(),
            })?;
        Ok(self.method(parsed))
    }

    pub fn params(mut self, params: impl Into<Params>) -> Self {
        self.params = Some(params.into());
        self
    }

    /// Serializes `payload` to a JSON value used as the call parameters.
    pub fn json_params<T>(self, payload: &T) -> crate::Result<Self>
    where
        T: serde::Serialize + ?Sized,
    {
        Ok(self.params(Params::json(payload)?))
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.header(name, value))
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn mode(mut self, mode: CallMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn json(self) -> Self {
        self.mode(CallMode::Json)
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some(BasicAuth::new(username, password));
        self
    }

    pub fn tls_credentials(mut self, credentials: TlsCredentials) -> Self {
        self.tls_credentials = Some(credentials);
        self
    }

    /// Client certificate chain and private key, both PEM encoded.
    pub fn tls_identity_pem(
        mut self,
        cert_chain_pem: impl Into<Vec<u8>>,
        private_key_pem: impl Into<Vec<u8>>,
    ) -> Self {
        let ca_cert_pem = self
            .tls_credentials
            .take()
            .map(|credentials| credentials.ca_cert_pem().to_vec())
            .unwrap_or_default();
        self.tls_credentials =
            Some(TlsCredentials::new(cert_chain_pem, private_key_pem).with_ca_cert(ca_cert_pem));
        self
    }

    pub fn ca_cert_pem(mut self, ca_cert_pem: impl Into<Vec<u8>>) -> Self {
        let credentials = self.tls_credentials.take().unwrap_or_default();
        self.tls_credentials = Some(credentials.with_ca_cert(ca_cert_pem));
        self
    }

    /// Reads the client certificate chain and key from PEM files.
    pub fn tls_identity_files(
        self,
        cert_chain_path: impl AsRef<Path>,
        private_key_path: impl AsRef<Path>,
    ) -> crate::Result<Self> {
        let cert_chain_pem = read_credential_file(cert_chain_path.as_ref())?;
        let private_key_pem = read_credential_file(private_key_path.as_ref())?;
        Ok(self.tls_identity_pem(cert_chain_pem, private_key_pem))
    }

    pub fn ca_cert_file(self, path: impl AsRef<Path>) -> crate::Result<Self> {
        let ca_cert_pem = read_credential_file(path.as_ref())?;
        Ok(self.ca_cert_pem(ca_cert_pem))
    }

    /// A zero timeout falls back to the client default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn read_body_eagerly(mut self, enabled: bool) -> Self {
        self.read_body_eagerly = enabled;
        self
    }

    /// Leaves the response body open for the caller instead of buffering it.
    pub fn stream_body(self) -> Self {
        self.read_body_eagerly(false)
    }

    /// Routes relative targets through `selector` with failover.
    pub fn backends(mut self, selector: Arc<BackendSelector>) -> Self {
        self.backends = Some(selector);
        self
    }

    pub fn body_sink(mut self, sink: BodySink) -> Self {
        self.body_sink = Some(sink);
        self
    }

    pub fn call_mode(&self) -> CallMode {
        self.mode
    }

    pub fn selected_method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub fn configured_timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn reads_body_eagerly(&self) -> bool {
        self.read_body_eagerly
    }

    pub fn credentials(&self) -> Option<&TlsCredentials> {
        self.tls_credentials.as_ref()
    }
}

fn read_credential_file(path: &Path) -> crate::Result<Vec<u8>> {
    std::fs::read(path)
        .map_err(|error| credential_error(format!("failed to read {}: {error}", path.display())))
}
