use std::io::Read;

use bytes::Bytes;
use http::header::{AUTHORIZATION, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use tracing::debug;

use crate::error::Error;
use crate::params::Payload;
use crate::response::{Outcome, Response, read_all_limited};
use crate::sink::{BodySink, MaybeTee};
use crate::transport::{Transport, classify_ureq_transport_error};
use crate::util::redact_uri_for_logs;

/// Per-call settings the executor needs besides the request itself.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ExecuteOptions<'a> {
    pub(crate) read_body_eagerly: bool,
    pub(crate) max_response_body_bytes: usize,
    pub(crate) authorization: Option<&'a HeaderValue>,
    pub(crate) sink: Option<&'a BodySink>,
}

pub(crate) fn is_supported_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    )
}

pub(crate) fn unsupported_method(method: &Method) -> Outcome {
    Outcome::failed(
        StatusCode::METHOD_NOT_ALLOWED,
        Error::UnsupportedMethod {
            method: method.as_str().to_owned(),
        },
    )
}

fn build_request<S>(
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    authorization: Option<&HeaderValue>,
    body: S,
) -> Result<ureq::http::Request<S>, Error> {
    let mut builder = ureq::http::Request::builder()
        .method(method.clone())
        .uri(url);
    for (name, value) in headers {
        builder = builder.header(name, value);
    }
    let mut request = builder
        .body(body)
        .map_err(|source| Error::RequestBuild { source })?;
    // configured credentials replace any caller supplied Authorization header
    if let Some(authorization) = authorization {
        request
            .headers_mut()
            .insert(AUTHORIZATION, authorization.clone());
    }
    Ok(request)
}

fn run<S: ureq::AsSendBody>(
    transport: &Transport,
    request: ureq::http::Request<S>,
    method: &Method,
    url: &str,
) -> Result<ureq::http::Response<ureq::Body>, Error> {
    transport
        .agent()
        .run(request)
        .map_err(|source| Error::Transport {
            kind: classify_ureq_transport_error(&source),
            method: method.clone(),
            uri: redact_uri_for_logs(url),
            source: Box::new(source),
        })
}

fn send(
    transport: &Transport,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    payload: &mut Payload,
    authorization: Option<&HeaderValue>,
) -> Result<ureq::http::Response<ureq::Body>, (StatusCode, Error)> {
    let build_failed = |error: Error| (StatusCode::BAD_REQUEST, error);
    let transport_failed = |error: Error| (StatusCode::INTERNAL_SERVER_ERROR, error);
    match payload {
        Payload::Empty => {
            let request = build_request(method, url, headers, authorization, Vec::<u8>::new())
                .map_err(build_failed)?;
            run(transport, request, method, url).map_err(transport_failed)
        }
        Payload::Buffered(bytes) => {
            let request = build_request(method, url, headers, authorization, bytes.to_vec())
                .map_err(build_failed)?;
            run(transport, request, method, url).map_err(transport_failed)
        }
        Payload::Stream(stream) => {
            let reader: &mut dyn Read = stream.as_mut();
            let body = ureq::SendBody::from_reader(reader);
            let request =
                build_request(method, url, headers, authorization, body).map_err(build_failed)?;
            run(transport, request, method, url).map_err(transport_failed)
        }
    }
}

/// Issues one request against one concrete URL.
///
/// The payload is sent from its current position; callers replaying a
/// streamed payload rewind it first.
pub(crate) fn execute(
    transport: &Transport,
    method: &Method,
    url: &str,
    headers: &HeaderMap,
    payload: &mut Payload,
    options: ExecuteOptions<'_>,
) -> Outcome {
    if !is_supported_method(method) {
        return unsupported_method(method);
    }

    let response = match send(
        transport,
        method,
        url,
        headers,
        payload,
        options.authorization,
    ) {
        Ok(response) => response,
        Err((status, error)) => return Outcome::failed(status, error),
    };

    let mut response = Response::from_ureq(response, method.clone(), url.to_owned());
    debug!(
        status = response.status().as_u16(),
        eager = options.read_body_eagerly,
        "received response"
    );
    if !options.read_body_eagerly {
        return Outcome::streamed(response);
    }

    match read_eagerly(&mut response, &options) {
        Ok(content) => Outcome::buffered(response, content),
        Err(error) => Outcome::read_failed(response, error),
    }
}

fn read_eagerly(response: &mut Response, options: &ExecuteOptions<'_>) -> crate::Result<Bytes> {
    let Some(body) = response.take_body() else {
        return Ok(Bytes::new());
    };
    // the tee and the body stream are released when `reader` drops
    let mut reader = MaybeTee::new(body, options.sink);
    read_all_limited(
        &mut reader,
        options.max_response_body_bytes,
        response.method(),
        &redact_uri_for_logs(response.uri()),
    )
}
