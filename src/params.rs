use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Seek, SeekFrom};

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::error::Error;
use crate::sink::BodySink;
use crate::util::append_raw_query;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// A seekable byte stream that can be replayed against several backends.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CallMode {
    /// Query string for GET/HEAD, form body otherwise.
    #[default]
    PlainHttp,
    Json,
}

impl CallMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlainHttp => "plain",
            Self::Json => "json",
        }
    }

    pub fn default_method(self) -> Method {
        match self {
            Self::PlainHttp => Method::GET,
            Self::Json => Method::POST,
        }
    }
}

/// Request parameters in one of the shapes the encoder understands.
pub enum Params {
    Bytes(Bytes),
    Text(String),
    KeyValue(BTreeMap<String, String>),
    MultiValue(BTreeMap<String, Vec<String>>),
    /// Sent as-is and rewound before every backend attempt.
    Seekable(Box<dyn ReadSeek>),
    /// Drained into memory once at encode time.
    Reader(Box<dyn Read + Send>),
    Structured(Value),
}

impl std::fmt::Debug for Params {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => formatter.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Text(text) => formatter.debug_tuple("Text").field(text).finish(),
            Self::KeyValue(map) => formatter.debug_tuple("KeyValue").field(map).finish(),
            Self::MultiValue(map) => formatter.debug_tuple("MultiValue").field(map).finish(),
            Self::Seekable(_) => formatter.write_str("Seekable(..)"),
            Self::Reader(_) => formatter.write_str("Reader(..)"),
            Self::Structured(value) => formatter.debug_tuple("Structured").field(value).finish(),
        }
    }
}

impl Params {
    pub fn key_values<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        Self::KeyValue(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.to_string()))
                .collect(),
        )
    }

    pub fn multi_values<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: IntoIterator,
        V::Item: Into<String>,
    {
        Self::MultiValue(
            pairs
                .into_iter()
                .map(|(name, values)| (name.into(), values.into_iter().map(Into::into).collect()))
                .collect(),
        )
    }

    pub fn json<T>(payload: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        serde_json::to_value(payload)
            .map(Self::Structured)
            .map_err(|source| Error::SerializeJson { source })
    }

    pub fn form<T>(payload: &T) -> crate::Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_urlencoded::to_string(payload)
            .map_err(|source| Error::SerializeForm { source })?;
        let mut values: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in url::form_urlencoded::parse(encoded.as_bytes()) {
            values
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        Ok(Self::MultiValue(values))
    }

    pub fn seekable<R>(reader: R) -> Self
    where
        R: Read + Seek + Send + 'static,
    {
        Self::Seekable(Box::new(reader))
    }

    pub fn reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Self::Reader(Box::new(reader))
    }

    pub const fn shape(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::KeyValue(_) => "key_value_map",
            Self::MultiValue(_) => "multi_value_map",
            Self::Seekable(_) => "seekable_stream",
            Self::Reader(_) => "reader",
            Self::Structured(_) => "structured_value",
        }
    }
}

impl From<&str> for Params {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Params {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<u8>> for Params {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Params {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Value> for Params {
    fn from(value: Value) -> Self {
        Self::Structured(value)
    }
}

impl From<BTreeMap<String, String>> for Params {
    fn from(value: BTreeMap<String, String>) -> Self {
        Self::KeyValue(value)
    }
}

impl From<HashMap<String, String>> for Params {
    fn from(value: HashMap<String, String>) -> Self {
        Self::KeyValue(value.into_iter().collect())
    }
}

impl From<BTreeMap<String, Vec<String>>> for Params {
    fn from(value: BTreeMap<String, Vec<String>>) -> Self {
        Self::MultiValue(value)
    }
}

impl From<HashMap<String, Vec<String>>> for Params {
    fn from(value: HashMap<String, Vec<String>>) -> Self {
        Self::MultiValue(value.into_iter().collect())
    }
}

/// Encoded request body.
pub enum Payload {
    Empty,
    Buffered(Bytes),
    Stream(Box<dyn ReadSeek>),
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Empty"),
            Self::Buffered(bytes) => formatter.debug_tuple("Buffered").field(bytes).finish(),
            Self::Stream(_) => formatter.write_str("Stream(..)"),
        }
    }
}

impl Payload {
    fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        if bytes.is_empty() {
            Self::Empty
        } else {
            Self::Buffered(bytes)
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Buffered(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Seeks a streamed payload back to its first byte.
    pub fn rewind(&mut self) -> std::io::Result<()> {
        if let Self::Stream(stream) = self {
            stream.seek(SeekFrom::Start(0))?;
        }
        Ok(())
    }
}

/// Result of encoding: the final URL, the resolved method, headers with the
/// content type filled in, and the body.
#[derive(Debug)]
pub struct EncodedRequest {
    pub url: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub payload: Payload,
}

pub fn encode_request(
    mode: CallMode,
    method: Option<Method>,
    url: &str,
    params: Option<Params>,
    mut headers: HeaderMap,
    sink: Option<&BodySink>,
) -> crate::Result<EncodedRequest> {
    let method = method.unwrap_or_else(|| mode.default_method());
    match mode {
        CallMode::PlainHttp if method == Method::GET || method == Method::HEAD => {
            let query = plain_text(params)?;
            if let Some(sink) = sink
                && !query.is_empty()
            {
                sink.mirror(query.as_bytes());
            }
            Ok(EncodedRequest {
                url: append_raw_query(url, &query),
                method,
                headers,
                payload: Payload::Empty,
            })
        }
        CallMode::PlainHttp => {
            let mut payload = plain_payload(params)?;
            mirror_payload(&mut payload, sink)?;
            insert_content_type_if_absent(&mut headers, FORM_CONTENT_TYPE);
            Ok(EncodedRequest {
                url: url.to_owned(),
                method,
                headers,
                payload,
            })
        }
        CallMode::Json => {
            let mut payload = json_payload(params)?;
            mirror_payload(&mut payload, sink)?;
            insert_content_type_if_absent(&mut headers, JSON_CONTENT_TYPE);
            Ok(EncodedRequest {
                url: url.to_owned(),
                method,
                headers,
                payload,
            })
        }
    }
}

fn insert_content_type_if_absent(headers: &mut HeaderMap, content_type: &'static str) {
    if !headers.contains_key(CONTENT_TYPE) {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }
}

fn mirror_payload(payload: &mut Payload, sink: Option<&BodySink>) -> crate::Result<()> {
    let Some(sink) = sink else {
        return Ok(());
    };
    match payload {
        Payload::Empty => {}
        Payload::Buffered(bytes) => sink.mirror(bytes),
        Payload::Stream(stream) => {
            let start = stream
                .stream_position()
                .map_err(|source| Error::ReadParams { source })?;
            let mut copied = Vec::new();
            if let Err(error) = stream.read_to_end(&mut copied) {
                debug!(error = %error, "failed to mirror streamed parameters");
            }
            sink.mirror(&copied);
            stream
                .seek(SeekFrom::Start(start))
                .map_err(|source| Error::ReadParams { source })?;
        }
    }
    Ok(())
}

fn drain(mut reader: impl Read) -> crate::Result<Vec<u8>> {
    let mut collected = Vec::new();
    reader
        .read_to_end(&mut collected)
        .map_err(|source| Error::ReadParams { source })?;
    Ok(collected)
}

fn unsupported(mode: CallMode, shape: &'static str) -> Error {
    Error::UnsupportedParamType {
        mode: mode.as_str(),
        shape,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some(String::new()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) => Some(text.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn structured_query(value: &Value) -> crate::Result<String> {
    if let Some(text) = scalar_text(value) {
        return Ok(text);
    }
    let Value::Object(fields) = value else {
        return Err(unsupported(CallMode::PlainHttp, "structured_array"));
    };

    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (name, field) in fields {
        match field {
            Value::Array(items) => {
                for item in items {
                    let text = scalar_text(item).ok_or_else(|| {
                        unsupported(CallMode::PlainHttp, "nested_structured_value")
                    })?;
                    serializer.append_pair(name, &text);
                }
            }
            other => {
                let text = scalar_text(other)
                    .ok_or_else(|| unsupported(CallMode::PlainHttp, "nested_structured_value"))?;
                serializer.append_pair(name, &text);
            }
        }
    }
    Ok(serializer.finish())
}

/// Raw bytes are placed in a query string verbatim, so they must be UTF-8.
fn utf8_query(bytes: Vec<u8>) -> crate::Result<String> {
    String::from_utf8(bytes)
        .map_err(|_| unsupported(CallMode::PlainHttp, "non_utf8_bytes"))
}

/// Text form of `params` used for query strings and form bodies.
///
/// Byte-like shapes that are not valid UTF-8 are rejected with
/// [`Error::UnsupportedParamType`] rather than rewritten.
fn plain_text(params: Option<Params>) -> crate::Result<String> {
    let Some(params) = params else {
        return Ok(String::new());
    };
    match params {
        Params::Bytes(bytes) => utf8_query(bytes.to_vec()),
        Params::Text(text) => Ok(text),
        Params::KeyValue(map) => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (name, value) in &map {
                serializer.append_pair(name, value);
            }
            Ok(serializer.finish())
        }
        Params::MultiValue(map) => {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (name, values) in &map {
                for value in values {
                    serializer.append_pair(name, value);
                }
            }
            Ok(serializer.finish())
        }
        Params::Seekable(stream) => utf8_query(drain(stream)?),
        Params::Reader(reader) => utf8_query(drain(reader)?),
        Params::Structured(value) => structured_query(&value),
    }
}

fn plain_payload(params: Option<Params>) -> crate::Result<Payload> {
    match params {
        Some(Params::Seekable(stream)) => Ok(Payload::Stream(stream)),
        Some(Params::Bytes(bytes)) => Ok(Payload::from_bytes(bytes)),
        Some(Params::Reader(reader)) => drain(reader).map(Payload::from_bytes),
        other => plain_text(other).map(Payload::from_bytes),
    }
}

fn json_payload(params: Option<Params>) -> crate::Result<Payload> {
    let Some(params) = params else {
        return Ok(Payload::Buffered(Bytes::from_static(b"null")));
    };
    match params {
        Params::Seekable(stream) => Ok(Payload::Stream(stream)),
        Params::Reader(reader) => drain(reader).map(Payload::from_bytes),
        Params::Bytes(bytes) => Ok(Payload::from_bytes(bytes)),
        Params::Text(text) => to_json_payload(&text),
        Params::KeyValue(map) => to_json_payload(&map),
        Params::MultiValue(map) => to_json_payload(&map),
        Params::Structured(value) => to_json_payload(&value),
    }
}

fn to_json_payload<T>(value: &T) -> crate::Result<Payload>
where
    T: Serialize + ?Sized,
{
    serde_json::to_vec(value)
        .map(Payload::from_bytes)
        .map_err(|source| Error::SerializeJson { source })
}
