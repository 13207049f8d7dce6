use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::util::{is_http_url, lock_unpoisoned};

/// Weight assigned to every item when none of them carries one.
const UNWEIGHTED_PLACEHOLDER: u32 = 20;

/// One interchangeable base URL and its relative weight.
///
/// A weight of `0` means "unweighted"; a selector accepts either all
/// unweighted or all weighted items.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendItem {
    pub base_url: String,
    #[serde(default)]
    pub weight: u32,
}

impl BackendItem {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            weight: 0,
        }
    }

    pub fn weighted(base_url: impl Into<String>, weight: u32) -> Self {
        Self {
            base_url: base_url.into(),
            weight,
        }
    }
}

/// Immutable backend list with a weighted random starting point.
///
/// The random source is seeded once at construction and shared behind a
/// mutex. It is not suitable for anything security sensitive.
pub struct BackendSelector {
    items: Vec<BackendItem>,
    weights: Vec<u32>,
    chooser: WeightedIndex<u64>,
    rng: Mutex<StdRng>,
    last_access: Vec<AtomicU64>,
}

impl std::fmt::Debug for BackendSelector {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BackendSelector")
            .field("items", &self.items)
            .field("weights", &self.weights)
            .finish_non_exhaustive()
    }
}

impl BackendSelector {
    pub fn new<I>(items: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = BackendItem>,
    {
        Self::with_seed(items, rand::rng().random())
    }

    /// Same as [`BackendSelector::new`] with a fixed seed for reproducible picks.
    pub fn with_seed<I>(items: I, seed: u64) -> crate::Result<Self>
    where
        I: IntoIterator<Item = BackendItem>,
    {
        let items: Vec<BackendItem> = items.into_iter().collect();
        let weights = effective_weights(&items)?;
        let chooser = WeightedIndex::new(weights.iter().map(|weight| u64::from(*weight)))
            .map_err(|_| Error::NoBackends)?;
        let now = unix_seconds(SystemTime::now());
        let last_access = items.iter().map(|_| AtomicU64::new(now)).collect();
        debug!(backends = items.len(), weights = ?weights, "backend selector created");
        Ok(Self {
            items,
            weights,
            chooser,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            last_access,
        })
    }

    pub fn from_urls<I, S>(base_urls: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(base_urls.into_iter().map(BackendItem::new))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always `false`; construction rejects empty lists.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[BackendItem] {
        &self.items
    }

    pub fn base_url(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(|item| item.base_url.as_str())
    }

    /// Weight used for selection, after the unweighted placeholder was applied.
    pub fn effective_weight(&self, index: usize) -> Option<u32> {
        self.weights.get(index).copied()
    }

    /// Draws a backend index with probability proportional to its weight.
    pub fn pick(&self) -> usize {
        let mut rng = lock_unpoisoned(&self.rng);
        self.chooser.sample(&mut *rng)
    }

    /// Last time a call was routed to `index`. Informational only.
    pub fn last_access(&self, index: usize) -> Option<SystemTime> {
        self.last_access
            .get(index)
            .map(|seconds| UNIX_EPOCH + Duration::from_secs(seconds.load(Ordering::Relaxed)))
    }

    pub(crate) fn touch(&self, index: usize) {
        if let Some(seconds) = self.last_access.get(index) {
            seconds.store(unix_seconds(SystemTime::now()), Ordering::Relaxed);
        }
    }
}

fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

fn effective_weights(items: &[BackendItem]) -> crate::Result<Vec<u32>> {
    let Some(first) = items.first() else {
        return Err(Error::NoBackends);
    };
    if !is_http_url(&first.base_url) {
        return Err(Error::InvalidBackend {
            base_url: first.base_url.clone(),
        });
    }

    let all_unweighted = first.weight == 0;
    for (index, item) in items.iter().enumerate().skip(1) {
        if !is_http_url(&item.base_url) {
            return Err(Error::InvalidBackend {
                base_url: item.base_url.clone(),
            });
        }
        match (item.weight > 0, all_unweighted) {
            (true, true) => return Err(Error::WeightsBeforeItemExpected { index }),
            (false, false) => {
                return Err(Error::WeightForItemExpected {
                    index,
                    base_url: item.base_url.clone(),
                });
            }
            _ => {}
        }
    }

    if all_unweighted {
        return Ok(vec![UNWEIGHTED_PLACEHOLDER; items.len()]);
    }
    Ok(items.iter().map(|item| item.weight).collect())
}
