use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::{BasicAuth, CallConfig};
use crate::dispatch::{DispatchObserver, Dispatcher, PreparedCall};
use crate::error::Error;
use crate::execute::{ExecuteOptions, is_supported_method, unsupported_method};
use crate::file::RemoteFile;
use crate::params::{CallMode, EncodedRequest, encode_request};
use crate::response::{Outcome, ResponseBody, decode_json, read_all_limited};
use crate::sink::MaybeTee;
use crate::transport::{
    DEFAULT_POOL_IDLE_TIMEOUT, DEFAULT_POOL_MAX_IDLE_CONNECTIONS, DEFAULT_POOL_MAX_IDLE_PER_HOST,
    DEFAULT_TIMEOUT, DEFAULT_USER_AGENT, PoolLimits, TransportCache, TransportFactory,
    UreqTransportFactory,
};
use crate::util::{is_http_url, merge_headers, parse_header_name, parse_header_value};

pub const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;

pub struct ClientBuilder {
    default_timeout: Duration,
    pool_idle_timeout: Duration,
    pool_max_idle_per_host: usize,
    pool_max_idle_connections: usize,
    user_agent: String,
    max_response_body_bytes: usize,
    default_headers: HeaderMap,
    transport_factory: Arc<dyn TransportFactory>,
    observers: Vec<Arc<dyn DispatchObserver>>,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            default_timeout: DEFAULT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            pool_max_idle_connections: DEFAULT_POOL_MAX_IDLE_CONNECTIONS,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            default_headers: HeaderMap::new(),
            transport_factory: Arc::new(UreqTransportFactory),
            observers: Vec::new(),
        }
    }

    /// Timeout for calls that do not set their own.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn pool_idle_timeout(mut self, pool_idle_timeout: Duration) -> Self {
        self.pool_idle_timeout = pool_idle_timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, pool_max_idle_per_host: usize) -> Self {
        self.pool_max_idle_per_host = pool_max_idle_per_host;
        self
    }

    pub fn pool_max_idle_connections(mut self, pool_max_idle_connections: usize) -> Self {
        self.pool_max_idle_connections = pool_max_idle_connections;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> crate::Result<Self> {
        let name = parse_header_name(name)?;
        let value = parse_header_value(name.as_str(), value)?;
        Ok(self.default_header(name, value))
    }

    pub fn transport_factory_arc(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transport_factory = factory;
        self
    }

    pub fn transport_factory<F>(self, factory: F) -> Self
    where
        F: TransportFactory + 'static,
    {
        self.transport_factory_arc(Arc::new(factory))
    }

    pub fn observer_arc(mut self, observer: Arc<dyn DispatchObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn observer<O>(self, observer: O) -> Self
    where
        O: DispatchObserver + 'static,
    {
        self.observer_arc(Arc::new(observer))
    }

    pub fn build(self) -> Client {
        let pool = PoolLimits {
            idle_timeout: self.pool_idle_timeout,
            max_idle_per_host: self.pool_max_idle_per_host,
            max_idle_connections: self.pool_max_idle_connections,
        };
        Client {
            transports: TransportCache::new(self.transport_factory, pool, self.user_agent),
            default_timeout: self.default_timeout,
            max_response_body_bytes: self.max_response_body_bytes,
            default_headers: self.default_headers,
            observers: self.observers,
        }
    }
}

/// Blocking HTTP client with pooled transports and multi-backend failover.
///
/// A client is `Send + Sync`; share it by reference or behind an `Arc`.
pub struct Client {
    transports: TransportCache,
    default_timeout: Duration,
    max_response_body_bytes: usize,
    default_headers: HeaderMap,
    observers: Vec<Arc<dyn DispatchObserver>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("transports", &self.transports)
            .field("default_timeout", &self.default_timeout)
            .field("max_response_body_bytes", &self.max_response_body_bytes)
            .field("default_headers", &self.default_headers)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub fn transport_cache(&self) -> &TransportCache {
        &self.transports
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn max_response_body_bytes(&self) -> usize {
        self.max_response_body_bytes
    }

    /// Performs one logical call.
    ///
    /// `target` is either an absolute `http(s)://` URL sent as-is, or a path
    /// appended to each backend of the configured selector in failover order.
    /// Failures never panic; they are reported through [`Outcome::error`].
    pub fn send(&self, target: &str, config: CallConfig) -> Outcome {
        self.send_from(None, target, config)
    }

    /// Plain-HTTP call: query string for GET/HEAD, form body otherwise.
    pub fn http(&self, target: &str, config: CallConfig) -> Outcome {
        self.send(target, config.mode(CallMode::PlainHttp))
    }

    /// JSON call: the parameters are sent as a JSON body, POST by default.
    pub fn json(&self, target: &str, config: CallConfig) -> Outcome {
        self.send(target, config.mode(CallMode::Json))
    }

    /// GET whose parameters travel as a form body instead of a query string.
    ///
    /// The parameters are encoded as for a plain POST and the request is then
    /// sent with method GET, to an absolute URL or across the backends.
    pub fn get_with_body(&self, target: &str, config: CallConfig) -> Outcome {
        let config = config.mode(CallMode::PlainHttp).method(Method::POST);
        self.send_encoded(None, target, config, Some(Method::GET))
    }

    /// Streams the response body back without buffering it.
    pub fn call(
        &self,
        target: &str,
        config: CallConfig,
    ) -> crate::Result<(StatusCode, ResponseBody)> {
        let outcome = self.send(target, config.stream_body()).into_result()?;
        let status = outcome.status();
        let (_, _, response, _) = outcome.into_parts();
        let body = response
            .and_then(|mut response| response.take_body())
            .ok_or(Error::NoResponse)?;
        Ok((status, body))
    }

    /// Decodes the response body as JSON regardless of the status code.
    ///
    /// The body passes through the call's sink while it is decoded.
    pub fn call_json<T>(&self, target: &str, config: CallConfig) -> crate::Result<(StatusCode, T)>
    where
        T: DeserializeOwned,
    {
        let sink = config.body_sink.clone();
        let outcome = self.send(target, config.stream_body()).into_result()?;
        let status = outcome.status();
        let (_, _, response, _) = outcome.into_parts();
        let mut response = response.ok_or(Error::NoResponse)?;
        let method = response.method().clone();
        let uri = crate::util::redact_uri_for_logs(response.uri());
        let body = response.take_body().ok_or(Error::NoResponse)?;
        let bytes = {
            let mut reader = MaybeTee::new(body, sink.as_ref());
            read_all_limited(&mut reader, self.max_response_body_bytes, &method, &uri)?
        };
        Ok((status, decode_json(&bytes)?))
    }

    /// Modification time of `target`: `Last-Modified` of a HEAD request for
    /// URLs, file metadata for local paths.
    pub fn modified_time(&self, target: &str, config: CallConfig) -> crate::Result<SystemTime> {
        if !is_http_url(target) && config.backends.is_none() {
            let metadata = std::fs::metadata(target).map_err(|source| Error::LocalFile {
                path: target.to_owned(),
                source,
            })?;
            return metadata.modified().map_err(|source| Error::LocalFile {
                path: target.to_owned(),
                source,
            });
        }
        let outcome = self
            .send(target, config.method(Method::HEAD).stream_body())
            .into_result()?;
        outcome.response().ok_or(Error::NoResponse)?.last_modified()
    }

    /// Lazily executed call presented as a readable file.
    pub fn open(&self, target: &str, config: CallConfig) -> RemoteFile<'_> {
        RemoteFile::new(self, target, config)
    }

    pub fn get(&self, target: &str, config: CallConfig) -> RemoteFile<'_> {
        self.open(target, config.method(Method::GET))
    }

    pub fn head(&self, target: &str, config: CallConfig) -> RemoteFile<'_> {
        self.open(target, config.method(Method::HEAD))
    }

    pub fn post(&self, target: &str, config: CallConfig) -> RemoteFile<'_> {
        self.open(target, config.method(Method::POST))
    }

    pub fn put(&self, target: &str, config: CallConfig) -> RemoteFile<'_> {
        self.open(target, config.method(Method::PUT))
    }

    pub fn delete(&self, target: &str, config: CallConfig) -> RemoteFile<'_> {
        self.open(target, config.method(Method::DELETE))
    }

    fn dispatcher(&self) -> Dispatcher<'_> {
        Dispatcher {
            transports: &self.transports,
            observers: &self.observers,
        }
    }

    /// `start` forces the first backend tried instead of a weighted pick.
    pub(crate) fn send_from(
        &self,
        start: Option<usize>,
        target: &str,
        config: CallConfig,
    ) -> Outcome {
        self.send_encoded(start, target, config, None)
    }

    /// `send_as` replaces the method after the parameters have been encoded.
    fn send_encoded(
        &self,
        start: Option<usize>,
        target: &str,
        config: CallConfig,
        send_as: Option<Method>,
    ) -> Outcome {
        let CallConfig {
            method,
            params,
            headers,
            mode,
            basic_auth,
            tls_credentials,
            timeout,
            read_body_eagerly,
            backends,
            body_sink,
        } = config;

        let method = method.unwrap_or_else(|| mode.default_method());
        if !is_supported_method(&method) {
            return unsupported_method(&method);
        }
        if !is_http_url(target) && backends.is_none() {
            return Outcome::failed(
                StatusCode::BAD_REQUEST,
                Error::InvalidUri {
                    uri: target.to_owned(),
                },
            );
        }

        let authorization = match basic_auth.as_ref().map(BasicAuth::header_value).transpose() {
            Ok(authorization) => authorization,
            Err(error) => return Outcome::failed(StatusCode::BAD_REQUEST, error),
        };
        let headers = merge_headers(&self.default_headers, headers);
        let EncodedRequest {
            url,
            method,
            headers,
            payload,
        } = match encode_request(
            mode,
            Some(method),
            target,
            params,
            headers,
            body_sink.as_ref(),
        ) {
            Ok(encoded) => encoded,
            Err(error) => {
                debug!(error = %error, mode = mode.as_str(), "failed to encode call parameters");
                return Outcome::failed(StatusCode::BAD_REQUEST, error);
            }
        };

        let mut call = PreparedCall {
            method: send_as.unwrap_or(method),
            headers,
            payload,
            credentials: tls_credentials.as_ref(),
            timeout: timeout
                .filter(|timeout| !timeout.is_zero())
                .unwrap_or(self.default_timeout),
            options: ExecuteOptions {
                read_body_eagerly,
                max_response_body_bytes: self.max_response_body_bytes,
                authorization: authorization.as_ref(),
                sink: body_sink.as_ref(),
            },
        };

        let dispatcher = self.dispatcher();
        if is_http_url(&url) {
            return dispatcher.single(&url, &mut call);
        }
        match (backends.as_deref(), start) {
            (Some(selector), Some(start)) => {
                dispatcher.dispatch_from(selector, start, &url, &mut call)
            }
            (Some(selector), None) => dispatcher.dispatch(selector, &url, &mut call),
            (None, _) => Outcome::failed(StatusCode::BAD_REQUEST, Error::InvalidUri { uri: url }),
        }
    }
}
