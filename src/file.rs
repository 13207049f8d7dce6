use std::io::{self, Read};
use std::time::SystemTime;

use http::StatusCode;

use crate::client::Client;
use crate::config::CallConfig;
use crate::error::Error;
use crate::response::{Response, ResponseBody};
use crate::util::url_base_name;

/// File-style metadata for a remote call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteFileInfo {
    name: String,
    size: Option<u64>,
    modified: Option<SystemTime>,
    status: StatusCode,
}

impl RemoteFileInfo {
    /// Last path segment of the request URL.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Content-Length` of the response when the server sent one.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn is_dir(&self) -> bool {
        false
    }
}

struct Completed {
    status: StatusCode,
    response: Option<Response>,
    body: Option<ResponseBody>,
    error: Option<Error>,
}

/// A call that runs on first use of [`stat`](RemoteFile::stat), `read`, or
/// [`close`](RemoteFile::close) and never again afterwards.
///
/// Errors of the underlying call are reported as `io::Error`; the full
/// error stays available through [`RemoteFile::error`].
pub struct RemoteFile<'a> {
    client: &'a Client,
    target: String,
    pending: Option<CallConfig>,
    completed: Option<Completed>,
}

impl std::fmt::Debug for RemoteFile<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RemoteFile")
            .field("target", &self.target)
            .field("executed", &self.completed.is_some())
            .finish()
    }
}

impl<'a> RemoteFile<'a> {
    pub(crate) fn new(client: &'a Client, target: &str, config: CallConfig) -> Self {
        Self {
            client,
            target: target.to_owned(),
            pending: Some(config.stream_body()),
            completed: None,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn is_executed(&self) -> bool {
        self.completed.is_some()
    }

    pub fn stat(&mut self) -> io::Result<RemoteFileInfo> {
        let target = self.target.clone();
        let completed = self.completed()?;
        let response = completed.response.as_ref();
        Ok(RemoteFileInfo {
            name: url_base_name(response.map_or(target.as_str(), Response::uri)),
            size: response.and_then(Response::content_length),
            modified: response.and_then(|response| response.last_modified().ok()),
            status: completed.status,
        })
    }

    /// Status of the executed call, running it first when needed.
    pub fn status(&mut self) -> io::Result<StatusCode> {
        Ok(self.completed()?.status)
    }

    pub fn response(&mut self) -> io::Result<Option<&Response>> {
        Ok(self.completed()?.response.as_ref())
    }

    /// Error of the executed call, `None` before execution or on success.
    pub fn error(&self) -> Option<&Error> {
        self.completed
            .as_ref()
            .and_then(|completed| completed.error.as_ref())
    }

    /// Releases the response body. Closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        self.completed()?.body = None;
        Ok(())
    }

    fn completed(&mut self) -> io::Result<&mut Completed> {
        if let Some(config) = self.pending.take() {
            let (status, _, mut response, error) =
                self.client.send(&self.target, config).into_parts();
            let body = response.as_mut().and_then(Response::take_body);
            self.completed = Some(Completed {
                status,
                response,
                body,
                error,
            });
        }
        let Some(completed) = self.completed.as_mut() else {
            return Err(io::Error::other("remote file was not executed"));
        };
        if let Some(error) = &completed.error {
            return Err(io::Error::other(error.to_string()));
        }
        Ok(completed)
    }
}

impl Read for RemoteFile<'_> {
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.completed()?.body.as_mut() {
            Some(body) => body.read(buffer),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "remote file has no open body",
            )),
        }
    }
}
