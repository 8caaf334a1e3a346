//! A pool of interchangeable JSON-RPC endpoints.
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use rand::Rng;
use url::Url;

/// How [EndpointPool::select] picks the next endpoint.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    RoundRobin,
    Random,
    /// The endpoint with the fewest consecutive failures, ties broken round
    /// robin.
    HealthAware,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown endpoint selection {0:?}, expected one of round-robin, random, health-aware")]
pub struct ParseSelectionError(String);

impl std::str::FromStr for Selection {
    type Err = ParseSelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" => Ok(Selection::RoundRobin),
            "random" => Ok(Selection::Random),
            "health-aware" => Ok(Selection::HealthAware),
            other => Err(ParseSelectionError(other.to_owned())),
        }
    }
}

impl std::fmt::Display for Selection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Selection::RoundRobin => "round-robin",
            Selection::Random => "random",
            Selection::HealthAware => "health-aware",
        })
    }
}

#[derive(Debug)]
struct Endpoint {
    url: Url,
    consecutive_failures: AtomicU32,
}

#[derive(Debug, thiserror::Error)]
#[error("At least one RPC endpoint is required")]
pub struct EmptyEndpointPool;

/// Shared between all in-flight requests. Selection and health bookkeeping
/// are lock free.
#[derive(Debug)]
pub struct EndpointPool {
    endpoints: Vec<Endpoint>,
    selection: Selection,
    cursor: AtomicUsize,
}

impl EndpointPool {
    pub fn new(urls: Vec<Url>, selection: Selection) -> Result<Self, EmptyEndpointPool> {
        if urls.is_empty() {
            return Err(EmptyEndpointPool);
        }

        Ok(Self {
            endpoints: urls
                .into_iter()
                .map(|url| Endpoint {
                    url,
                    consecutive_failures: AtomicU32::new(0),
                })
                .collect(),
            selection,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn single(url: Url) -> Self {
        Self {
            endpoints: vec![Endpoint {
                url,
                consecutive_failures: AtomicU32::new(0),
            }],
            selection: Selection::RoundRobin,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn selection(&self) -> Selection {
        self.selection
    }

    pub fn url(&self, index: usize) -> &Url {
        &self.endpoints[index].url
    }

    pub fn consecutive_failures(&self, index: usize) -> u32 {
        self.endpoints[index]
            .consecutive_failures
            .load(Ordering::Relaxed)
    }

    /// Returns the index of the endpoint to use for the next request.
    pub fn select(&self) -> usize {
        let len = self.endpoints.len();
        if len == 1 {
            return 0;
        }

        match self.selection {
            Selection::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % len,
            Selection::Random => rand::thread_rng().gen_range(0..len),
            Selection::HealthAware => {
                let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
                (0..len)
                    .map(|offset| (start + offset) % len)
                    .min_by_key(|&i| self.consecutive_failures(i))
                    .unwrap_or(start)
            }
        }
    }

    pub fn report_success(&self, index: usize) {
        self.endpoints[index]
            .consecutive_failures
            .store(0, Ordering::Relaxed);
    }

    pub fn report_failure(&self, index: usize) {
        let failures = self.endpoints[index]
            .consecutive_failures
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        tracing::debug!(endpoint=%self.endpoints[index].url, %failures, "Endpoint failure recorded");
    }
}
