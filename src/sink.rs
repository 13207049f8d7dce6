use std::io::{Read, Write};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::util::lock_unpoisoned;

pub const BODY_BEGIN_MARKER: &str = "--- reqx-failover body begin ---\n";
pub const BODY_END_MARKER: &str = "\n--- reqx-failover body end ---\n";

/// Diagnostic byte consumer that mirrors request parameters and response bodies.
///
/// Write failures are logged and otherwise ignored.
#[derive(Clone)]
pub struct BodySink {
    writer: Arc<Mutex<dyn Write + Send>>,
}

impl std::fmt::Debug for BodySink {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.debug_struct("BodySink").finish_non_exhaustive()
    }
}

impl BodySink {
    pub fn new<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            writer: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn stderr() -> Self {
        Self::new(std::io::stderr())
    }

    fn write_raw(&self, bytes: &[u8]) {
        let mut writer = lock_unpoisoned(&self.writer);
        if let Err(error) = writer.write_all(bytes).and_then(|()| writer.flush()) {
            debug!(error = %error, "body sink write failed");
        }
    }

    /// Writes `bytes` framed by the begin and end markers.
    pub(crate) fn mirror(&self, bytes: &[u8]) {
        self.write_raw(BODY_BEGIN_MARKER.as_bytes());
        self.write_raw(bytes);
        self.write_raw(BODY_END_MARKER.as_bytes());
    }

    pub(crate) fn tee<R: Read>(&self, reader: R) -> TeeReader<R> {
        self.write_raw(BODY_BEGIN_MARKER.as_bytes());
        TeeReader {
            inner: reader,
            sink: self.clone(),
        }
    }
}

/// Reader that copies every byte it yields into a [`BodySink`] and writes the
/// end marker when dropped.
pub struct TeeReader<R> {
    inner: R,
    sink: BodySink,
}

impl<R: Read> Read for TeeReader<R> {
    fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        let read = self.inner.read(buffer)?;
        if read > 0 {
            self.sink.write_raw(&buffer[..read]);
        }
        Ok(read)
    }
}

impl<R> Drop for TeeReader<R> {
    fn drop(&mut self) {
        self.sink.write_raw(BODY_END_MARKER.as_bytes());
    }
}

/// Reader that either passes through or tees into a sink.
pub(crate) enum MaybeTee<R> {
    Plain(R),
    Tee(TeeReader<R>),
}

impl<R: Read> MaybeTee<R> {
    pub(crate) fn new(reader: R, sink: Option<&BodySink>) -> Self {
        match sink {
            Some(sink) => Self::Tee(sink.tee(reader)),
            None => Self::Plain(reader),
        }
    }
}

impl<R: Read> Read for MaybeTee<R> {
    fn read(&mut self, buffer: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Plain(reader) => reader.read(buffer),
            Self::Tee(reader) => reader.read(buffer),
        }
    }
}
