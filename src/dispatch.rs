use std::sync::Arc;
use std::time::Duration;

use http::{HeaderMap, Method, StatusCode};
use tracing::{debug, info_span, warn};

use crate::error::Error;
use crate::execute::{ExecuteOptions, execute};
use crate::params::Payload;
use crate::response::Outcome;
use crate::selector::BackendSelector;
use crate::tls::{SecurityProfile, TlsCredentials};
use crate::transport::TransportCache;
use crate::util::redact_uri_for_logs;

#[derive(Clone, Debug)]
pub struct AttemptContext {
    method: Method,
    uri: String,
    backend_index: Option<usize>,
    attempt: usize,
    max_attempts: usize,
}

impl AttemptContext {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Target URI with credentials and query removed.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Index into the selector, `None` for calls made against an absolute URL.
    pub fn backend_index(&self) -> Option<usize> {
        self.backend_index
    }

    pub fn attempt(&self) -> usize {
        self.attempt
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

pub trait DispatchObserver: Send + Sync {
    fn on_attempt_start(&self, _context: &AttemptContext) {}

    fn on_attempt_succeeded(&self, _context: &AttemptContext, _status: StatusCode) {}

    fn on_attempt_failed(&self, _context: &AttemptContext, _error: &Error) {}
}

/// A fully encoded call waiting to be sent to one or more targets.
pub(crate) struct PreparedCall<'a> {
    pub(crate) method: Method,
    pub(crate) headers: HeaderMap,
    pub(crate) payload: Payload,
    pub(crate) credentials: Option<&'a TlsCredentials>,
    pub(crate) timeout: Duration,
    pub(crate) options: ExecuteOptions<'a>,
}

impl PreparedCall<'_> {
    fn execute_on(&mut self, transports: &TransportCache, url: &str) -> Outcome {
        let profile = SecurityProfile::for_url(url, self.credentials);
        let transport = match transports.acquire(&profile, self.timeout) {
            Ok(transport) => transport,
            Err(error) => return Outcome::failed(StatusCode::BAD_REQUEST, error),
        };
        execute(
            &transport,
            &self.method,
            url,
            &self.headers,
            &mut self.payload,
            self.options,
        )
    }
}

/// Backend indices in attempt order: `start..len` followed by `0..start`.
pub(crate) fn failover_order(start: usize, len: usize) -> impl Iterator<Item = usize> {
    let start = if len == 0 { 0 } else { start % len };
    (start..len).chain(0..start)
}

pub(crate) struct Dispatcher<'a> {
    pub(crate) transports: &'a TransportCache,
    pub(crate) observers: &'a [Arc<dyn DispatchObserver>],
}

impl Dispatcher<'_> {
    /// Sends `call` to a single absolute URL.
    pub(crate) fn single(&self, url: &str, call: &mut PreparedCall<'_>) -> Outcome {
        let context = AttemptContext {
            method: call.method.clone(),
            uri: redact_uri_for_logs(url),
            backend_index: None,
            attempt: 1,
            max_attempts: 1,
        };
        let span = info_span!(
            "reqx_failover.attempt",
            method = %context.method,
            uri = %context.uri,
        );
        let _enter = span.enter();
        self.attempt(&context, url, call)
    }

    /// Routes `call` to the backend chosen by the selector's weighted pick.
    pub(crate) fn dispatch(
        &self,
        selector: &BackendSelector,
        path: &str,
        call: &mut PreparedCall<'_>,
    ) -> Outcome {
        self.dispatch_from(selector, selector.pick(), path, call)
    }

    /// Tries every backend at most once starting at `start`, wrapping around,
    /// and stops at the first attempt without a transport-level error.
    ///
    /// When all attempts fail the last attempt's outcome is returned; earlier
    /// failures are only visible to observers and logs.
    pub(crate) fn dispatch_from(
        &self,
        selector: &BackendSelector,
        start: usize,
        path: &str,
        call: &mut PreparedCall<'_>,
    ) -> Outcome {
        let max_attempts = selector.len();
        let span = info_span!(
            "reqx_failover.dispatch",
            method = %call.method,
            path = %redact_uri_for_logs(path),
            backends = max_attempts,
            start_index = start,
        );
        let _enter = span.enter();

        let mut last_outcome = None;
        for (position, index) in failover_order(start, max_attempts).enumerate() {
            let Some(base_url) = selector.base_url(index) else {
                continue;
            };
            let url = format!("{base_url}{path}");
            selector.touch(index);

            if let Err(source) = call.payload.rewind() {
                return Outcome::failed(StatusCode::BAD_REQUEST, Error::ReadParams { source });
            }

            let context = AttemptContext {
                method: call.method.clone(),
                uri: redact_uri_for_logs(&url),
                backend_index: Some(index),
                attempt: position + 1,
                max_attempts,
            };
            let attempt_span = info_span!(
                "reqx_failover.attempt",
                backend = index,
                attempt = context.attempt,
                uri = %context.uri,
            );
            let _attempt_enter = attempt_span.enter();

            let outcome = self.attempt(&context, &url, call);
            let Some(error) = outcome.error() else {
                return outcome;
            };
            if error.is_pre_flight() {
                return outcome;
            }
            warn!(
                error = %error,
                remaining = max_attempts - context.attempt,
                "backend attempt failed"
            );
            last_outcome = Some(outcome);
        }

        last_outcome.unwrap_or_else(|| {
            Outcome::failed(StatusCode::INTERNAL_SERVER_ERROR, Error::NoBackends)
        })
    }

    fn attempt(&self, context: &AttemptContext, url: &str, call: &mut PreparedCall<'_>) -> Outcome {
        for observer in self.observers {
            observer.on_attempt_start(context);
        }
        debug!("sending request");
        let outcome = call.execute_on(self.transports, url);
        match outcome.error() {
            None => {
                for observer in self.observers {
                    observer.on_attempt_succeeded(context, outcome.status());
                }
            }
            Some(error) => {
                for observer in self.observers {
                    observer.on_attempt_failed(context, error);
                }
            }
        }
        outcome
    }
}
