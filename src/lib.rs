//! `reqx-failover` is a blocking HTTP call layer with weighted multi-backend
//! failover, pooled transports keyed by security profile, and plain/JSON
//! parameter encoding.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use reqx_failover::prelude::{BackendItem, BackendSelector, CallConfig, Client};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Health {
//!     status: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backends = Arc::new(BackendSelector::new([
//!         BackendItem::weighted("http://10.0.0.1:8080", 3),
//!         BackendItem::weighted("http://10.0.0.2:8080", 1),
//!     ])?);
//!     let client = Client::builder()
//!         .default_timeout(Duration::from_secs(3))
//!         .build();
//!
//!     let (status, health): (_, Health) = client.call_json(
//!         "/v1/health",
//!         CallConfig::new().backends(Arc::clone(&backends)),
//!     )?;
//!     println!("{status} {}", health.status);
//!
//!     let outcome = client.json(
//!         "/v1/items",
//!         CallConfig::new()
//!             .backends(backends)
//!             .json_params(&serde_json::json!({ "name": "demo" }))?,
//!     );
//!     println!("status={} error={:?}", outcome.status(), outcome.error());
//!     Ok(())
//! }
//! ```
//!
//! # Semantics
//!
//! - A relative target is tried against every backend at most once, starting
//!   at a weighted random pick and wrapping around.
//! - HTTP status codes never trigger failover; only transport errors do.
//! - TLS connections do not verify the server certificate.

mod client;
mod config;
mod dispatch;
mod error;
mod execute;
mod file;
mod params;
mod response;
mod selector;
mod sink;
mod tls;
mod transport;
mod util;

pub use crate::client::{Client, ClientBuilder, DEFAULT_MAX_RESPONSE_BODY_BYTES};
pub use crate::config::{BasicAuth, CallConfig};
pub use crate::dispatch::{AttemptContext, DispatchObserver};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::file::{RemoteFile, RemoteFileInfo};
pub use crate::params::{CallMode, EncodedRequest, Params, Payload, ReadSeek, encode_request};
pub use crate::response::{Outcome, Response, ResponseBody};
pub use crate::selector::{BackendItem, BackendSelector};
pub use crate::sink::{BODY_BEGIN_MARKER, BODY_END_MARKER, BodySink, TeeReader};
pub use crate::tls::{SecurityProfile, TlsCredentials};
pub use crate::transport::{
    DEFAULT_TIMEOUT, PoolLimits, Transport, TransportCache, TransportFactory, TransportSignature,
    TransportSpec, UreqTransportFactory,
};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BackendItem, BackendSelector, BodySink, CallConfig, CallMode, Client, ClientBuilder,
        DispatchObserver, Error, ErrorCode, Outcome, Params, RemoteFile, RemoteFileInfo, Response,
        Result, SecurityProfile, TlsCredentials, TransportErrorKind,
    };
}

#[cfg(test)]
mod tests;
