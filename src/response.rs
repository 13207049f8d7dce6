use std::collections::BTreeMap;
use std::io::Read;
use std::time::SystemTime;

use bytes::Bytes;
use http::header::{CONTENT_LENGTH, LAST_MODIFIED};
use http::{HeaderMap, Method, StatusCode, Version};
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::util::truncate_body;

/// Response metadata plus the body stream while it is still open.
///
/// An open body is a single-consumer resource; dropping the response closes it
/// and hands the connection back to its pool once fully read.
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    method: Method,
    uri: String,
    body: Option<ureq::Body>,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("method", &self.method)
            .field("uri", &self.uri)
            .field("body_open", &self.body.is_some())
            .finish()
    }
}

impl Response {
    pub(crate) fn from_ureq(
        response: ureq::http::Response<ureq::Body>,
        method: Method,
        uri: String,
    ) -> Self {
        let (parts, body) = response.into_parts();
        Self {
            status: parts.status,
            version: parts.version,
            headers: parts.headers,
            method,
            uri,
            body: Some(body),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Status code followed by its canonical reason, e.g. `200 OK`.
    pub fn status_line(&self) -> String {
        match self.status.canonical_reason() {
            Some(reason) => format!("{} {reason}", self.status.as_str()),
            None => self.status.as_str().to_owned(),
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// One value per header name; the first value wins when a header repeats.
    pub fn single_valued_headers(&self) -> BTreeMap<String, String> {
        let mut single = BTreeMap::new();
        for name in self.headers.keys() {
            let value = self
                .headers
                .get(name)
                .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
                .unwrap_or_default();
            single.insert(name.as_str().to_owned(), value);
        }
        single
    }

    pub fn content_length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str())
            .and_then(|value| value.trim().parse().ok())
    }

    pub fn last_modified(&self) -> crate::Result<SystemTime> {
        let value = self
            .headers
            .get(LAST_MODIFIED)
            .ok_or(Error::MissingHeader {
                name: "last-modified",
            })?;
        let text = String::from_utf8_lossy(value.as_bytes());
        httpdate::parse_http_date(text.trim()).map_err(|_| Error::InvalidHeaderDate {
            name: "last-modified",
            value: text.into_owned(),
        })
    }

    pub fn is_body_open(&self) -> bool {
        self.body.is_some()
    }

    /// Takes ownership of the open body. Returns `None` once the body was
    /// drained, taken, or closed.
    pub fn take_body(&mut self) -> Option<ResponseBody> {
        self.body.take().map(|body| ResponseBody {
            reader: body.into_reader(),
        })
    }

    /// Drops the body stream without reading it.
    pub fn close(&mut self) {
        self.body = None;
    }

    /// Drains the open body into memory, failing once `max_bytes` is exceeded.
    pub fn read_body_limited(&mut self, max_bytes: usize) -> crate::Result<Bytes> {
        let mut body = self.take_body().ok_or(Error::NoResponse)?;
        read_all_limited(&mut body, max_bytes, &self.method, &self.uri)
    }

    pub fn json<T>(&mut self, max_bytes: usize) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        let body = self.read_body_limited(max_bytes)?;
        decode_json(&body)
    }
}

/// Open response body stream.
pub struct ResponseBody {
    reader: ureq::BodyReader<'static>,
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResponseBody")
            .finish_non_exhaustive()
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        self.reader.read(buffer)
    }
}

pub(crate) fn read_all_limited(
    reader: &mut impl Read,
    max_bytes: usize,
    method: &Method,
    uri: &str,
) -> crate::Result<Bytes> {
    let max_bytes = max_bytes.max(1);
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 8192];
    let mut total_len = 0_usize;

    loop {
        let read = reader.read(&mut chunk).map_err(|source| Error::ReadBody {
            method: method.clone(),
            uri: uri.to_owned(),
            source,
        })?;
        if read == 0 {
            break;
        }
        total_len = total_len.saturating_add(read);
        if total_len > max_bytes {
            return Err(Error::ResponseBodyTooLarge {
                limit_bytes: max_bytes,
                actual_bytes: total_len,
                method: method.clone(),
                uri: uri.to_owned(),
            });
        }
        collected.extend_from_slice(&chunk[..read]);
    }

    Ok(Bytes::from(collected))
}

pub(crate) fn decode_json<T>(body: &[u8]) -> crate::Result<T>
where
    T: DeserializeOwned,
{
    serde_json::from_slice(body).map_err(|source| Error::Deserialize {
        source,
        body: truncate_body(body),
    })
}

/// Normalized result of one logical call.
///
/// `error` is `None` exactly when a response arrived without a transport-level
/// failure; the HTTP status is not inspected. With eager body reads `content`
/// holds the body and the response body is closed, otherwise `content` is
/// `None` and the response body is left open for the caller.
#[derive(Debug)]
pub struct Outcome {
    status: StatusCode,
    content: Option<Bytes>,
    response: Option<Response>,
    error: Option<Error>,
}

impl Outcome {
    pub(crate) fn failed(status: StatusCode, error: Error) -> Self {
        Self {
            status,
            content: None,
            response: None,
            error: Some(error),
        }
    }

    pub(crate) fn streamed(response: Response) -> Self {
        Self {
            status: response.status(),
            content: None,
            response: Some(response),
            error: None,
        }
    }

    pub(crate) fn buffered(response: Response, content: Bytes) -> Self {
        Self {
            status: response.status(),
            content: Some(content),
            response: Some(response),
            error: None,
        }
    }

    pub(crate) fn read_failed(response: Response, error: Error) -> Self {
        Self {
            status: response.status(),
            content: None,
            response: Some(response),
            error: Some(error),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn content(&self) -> Option<&Bytes> {
        self.content.as_ref()
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    pub fn response_mut(&mut self) -> Option<&mut Response> {
        self.response.as_mut()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_parts(self) -> (StatusCode, Option<Bytes>, Option<Response>, Option<Error>) {
        (self.status, self.content, self.response, self.error)
    }

    pub fn into_result(mut self) -> crate::Result<Self> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }

    /// Decodes the buffered content, or drains the open body when the call
    /// was made without an eager read.
    pub fn json<T>(&mut self, max_bytes: usize) -> crate::Result<T>
    where
        T: DeserializeOwned,
    {
        if let Some(error) = self.error.take() {
            return Err(error);
        }
        if let Some(content) = &self.content {
            return decode_json(content);
        }
        self.response
            .as_mut()
            .ok_or(Error::NoResponse)?
            .json(max_bytes)
    }
}
