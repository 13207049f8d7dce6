use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Error, TransportErrorKind};
use crate::tls::{SecurityProfile, build_tls_config};
use crate::util::lock_unpoisoned;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);
pub(crate) const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 2;
pub(crate) const DEFAULT_POOL_MAX_IDLE_CONNECTIONS: usize = 16;
pub(crate) const DEFAULT_USER_AGENT: &str = "reqx-failover";

/// Idle-connection bounds applied to every pooled transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolLimits {
    pub idle_timeout: Duration,
    pub max_idle_per_host: usize,
    pub max_idle_connections: usize,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
            max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            max_idle_connections: DEFAULT_POOL_MAX_IDLE_CONNECTIONS,
        }
    }
}

/// Digest of (profile, credential bytes, timeout) identifying one pooled transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportSignature([u8; 32]);

impl TransportSignature {
    pub fn compute(profile: &SecurityProfile, timeout: Duration) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(profile.as_str().as_bytes());
        if let SecurityProfile::TlsWithClientCert(credentials) = profile {
            for blob in [
                credentials.ca_cert_pem(),
                credentials.cert_chain_pem(),
                credentials.private_key_pem(),
            ] {
                // length prefix keeps adjacent blobs from aliasing
                hasher.update((blob.len() as u64).to_be_bytes());
                hasher.update(blob);
            }
        }
        hasher.update(timeout.as_nanos().to_be_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for TransportSignature {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(formatter, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Inputs handed to a [`TransportFactory`] when a signature is seen for the first time.
#[derive(Debug)]
pub struct TransportSpec<'a> {
    pub profile: &'a SecurityProfile,
    pub timeout: Duration,
    pub pool: PoolLimits,
    pub user_agent: &'a str,
}

pub trait TransportFactory: Send + Sync {
    /// Called while the signature's build guard is held; must not acquire the
    /// same signature from the cache.
    fn build(&self, spec: &TransportSpec<'_>) -> Result<ureq::Agent, Error>;
}

#[derive(Debug, Default)]
pub struct UreqTransportFactory;

impl TransportFactory for UreqTransportFactory {
    fn build(&self, spec: &TransportSpec<'_>) -> Result<ureq::Agent, Error> {
        let tls_config = build_tls_config(spec.profile)?;
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .user_agent(spec.user_agent)
            .timeout_global(Some(spec.timeout))
            .max_idle_age(spec.pool.idle_timeout)
            .max_idle_connections_per_host(spec.pool.max_idle_per_host)
            .max_idle_connections(spec.pool.max_idle_connections)
            .tls_config(tls_config)
            .build();
        Ok(config.new_agent())
    }
}

/// A shared, reusable connection pool for one transport signature.
pub struct Transport {
    agent: ureq::Agent,
    signature: TransportSignature,
    profile: &'static str,
    timeout: Duration,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Transport")
            .field("signature", &self.signature.to_string())
            .field("profile", &self.profile)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Transport {
    pub fn agent(&self) -> &ureq::Agent {
        &self.agent
    }

    pub fn signature(&self) -> TransportSignature {
        self.signature
    }

    pub fn profile(&self) -> &'static str {
        self.profile
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Build guard plus the transport once it exists.
#[derive(Default)]
struct Slot {
    building: Mutex<()>,
    ready: OnceLock<Arc<Transport>>,
}

/// Concurrency-safe pool of transports keyed by [`TransportSignature`].
///
/// Entries are created on first use and live as long as the cache. The map
/// shard is locked only to look up or insert an empty slot; construction runs
/// under the slot's own guard, so cache hits on other signatures never wait
/// for a build. Concurrent callers with the same signature wait for one
/// construction instead of building duplicates. Failed constructions leave
/// the slot empty and the next caller tries again.
pub struct TransportCache {
    entries: DashMap<TransportSignature, Arc<Slot>>,
    factory: Arc<dyn TransportFactory>,
    pool: PoolLimits,
    user_agent: String,
}

impl std::fmt::Debug for TransportCache {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TransportCache")
            .field("entries", &self.len())
            .field("pool", &self.pool)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for TransportCache {
    fn default() -> Self {
        Self::new(
            Arc::new(UreqTransportFactory),
            PoolLimits::default(),
            DEFAULT_USER_AGENT,
        )
    }
}

impl TransportCache {
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        pool: PoolLimits,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            factory,
            pool,
            user_agent: user_agent.into(),
        }
    }

    pub fn acquire(
        &self,
        profile: &SecurityProfile,
        timeout: Duration,
    ) -> Result<Arc<Transport>, Error> {
        let timeout = normalize_timeout(timeout);
        let signature = TransportSignature::compute(profile, timeout);
        let existing = self
            .entries
            .get(&signature)
            .map(|slot| Arc::clone(slot.value()));
        let slot = match existing {
            Some(slot) => slot,
            None => Arc::clone(self.entries.entry(signature).or_default().value()),
        };
        if let Some(existing) = slot.ready.get() {
            return Ok(Arc::clone(existing));
        }

        let _building = lock_unpoisoned(&slot.building);
        if let Some(existing) = slot.ready.get() {
            return Ok(Arc::clone(existing));
        }
        let spec = TransportSpec {
            profile,
            timeout,
            pool: self.pool,
            user_agent: &self.user_agent,
        };
        let agent = self.factory.build(&spec)?;
        let transport = Arc::new(Transport {
            agent,
            signature,
            profile: profile.as_str(),
            timeout,
        });
        let transport = Arc::clone(slot.ready.get_or_init(|| transport));
        debug!(
            profile = profile.as_str(),
            timeout_ms = timeout.as_millis() as u64,
            signature = %signature,
            "created pooled transport"
        );
        Ok(transport)
    }

    pub fn contains(&self, signature: &TransportSignature) -> bool {
        self.entries
            .get(signature)
            .is_some_and(|slot| slot.ready.get().is_some())
    }

    /// Number of constructed transports.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|slot| slot.ready.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn normalize_timeout(timeout: Duration) -> Duration {
    if timeout.is_zero() {
        DEFAULT_TIMEOUT
    } else {
        timeout
    }
}

pub(crate) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::Timeout(_) => TransportErrorKind::Timeout,
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) | ureq::Error::Rustls(_) | ureq::Error::Pem(_) => {
            TransportErrorKind::Tls
        }
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => classify_io_error(source),
        _ => TransportErrorKind::Other,
    }
}

pub(crate) fn classify_io_error(source: &std::io::Error) -> TransportErrorKind {
    match source.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            TransportErrorKind::Timeout
        }
        std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
        _ => TransportErrorKind::Other,
    }
}
