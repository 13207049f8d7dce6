use std::sync::Mutex;

use http::HeaderMap;
use http::header::{HeaderName, HeaderValue};

use crate::error::Error;

const MAX_ERROR_BODY_LEN: usize = 2048;

pub(crate) fn lock_unpoisoned<T: ?Sized>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Call headers win over client defaults with the same name.
pub(crate) fn merge_headers(default_headers: &HeaderMap, request_headers: HeaderMap) -> HeaderMap {
    let mut merged = default_headers.clone();
    let mut current = None;
    for (name, value) in request_headers {
        if let Some(name) = name {
            merged.remove(&name);
            current = Some(name);
        }
        if let Some(name) = &current {
            merged.append(name.clone(), value);
        }
    }
    merged
}

pub(crate) fn is_http_url(raw: &str) -> bool {
    raw.starts_with("http://") || raw.starts_with("https://")
}

pub(crate) fn is_https_url(raw: &str) -> bool {
    raw.starts_with("https://")
}

pub(crate) fn redact_uri_for_logs(uri_text: &str) -> String {
    let Ok(mut parsed) = url::Url::parse(uri_text) else {
        return uri_text.split('?').next().unwrap_or(uri_text).to_owned();
    };

    let _ = parsed.set_username("");
    let _ = parsed.set_password(None);
    parsed.set_query(None);
    parsed.set_fragment(None);
    parsed.to_string()
}

/// Base name of the URL path, empty when the path has no segments.
pub(crate) fn url_base_name(uri_text: &str) -> String {
    let Ok(parsed) = url::Url::parse(uri_text) else {
        return String::new();
    };
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).next_back())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

pub(crate) fn append_raw_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_owned();
    }
    let delimiter = if url.contains('?') { '&' } else { '?' };
    format!("{url}{delimiter}{query}")
}

pub(crate) fn parse_header_name(name: &str) -> Result<HeaderName, Error> {
    name.parse().map_err(|source| Error::InvalidHeaderName {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn parse_header_value(name: &str, value: &str) -> Result<HeaderValue, Error> {
    value.parse().map_err(|source| Error::InvalidHeaderValue {
        name: name.to_owned(),
        source,
    })
}

pub(crate) fn truncate_body(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.chars().count() <= MAX_ERROR_BODY_LEN {
        return text.into_owned();
    }

    let truncated: String = text.chars().take(MAX_ERROR_BODY_LEN).collect();
    format!("{truncated}...(truncated)")
}
