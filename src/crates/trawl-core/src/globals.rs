//! The per-run registry: id allocation, the id→node map, the result node
//! pointer and per-host rate limiting.
//!
//! The registry is mutated during construction, deserialization and For
//! subnode cloning; all mutation is serialized by mutexes. After the build
//! phase lookups are read-only.

use crate::node::{Node, NodeId};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::collections::{HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type HostLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Persisted rate-limiter configuration for one host: at most `max_times`
/// requests per `period`. Only the configuration survives serialization;
/// live token state is rebuilt fresh on load.
#[derive(Clone, Debug, PartialEq)]
pub struct RateLimit {
    pub max_times: i32,
    pub period: Duration,
}

/// The process-wide node registry and rate limiter table.
pub struct Globals {
    curr_id: Mutex<NodeId>,
    nodes: Mutex<HashMap<NodeId, Arc<dyn Node>>>,
    result_id: Mutex<Option<NodeId>>,
    started: Mutex<HashSet<NodeId>>,
    limits: Mutex<HashMap<String, RateLimit>>,
    limiters: Mutex<HashMap<String, Arc<HostLimiter>>>,
    http: reqwest::Client,
}

impl Globals {
    pub fn new() -> Arc<Globals> {
        Arc::new(Globals {
            curr_id: Mutex::new(0),
            nodes: Mutex::new(HashMap::new()),
            result_id: Mutex::new(None),
            started: Mutex::new(HashSet::new()),
            limits: Mutex::new(HashMap::new()),
            limiters: Mutex::new(HashMap::new()),
            http: reqwest::Client::new(),
        })
    }

    /// Allocates the next node id. Ids are unique within a registry and
    /// stable for its lifetime.
    pub fn generate_id(&self) -> NodeId {
        let mut curr = self.curr_id.lock().expect("id lock poisoned");
        let id = *curr;
        *curr += 1;
        id
    }

    /// The next id that [`generate_id`](Globals::generate_id) would
    /// return. Persisted in graph files.
    pub fn curr_id(&self) -> NodeId {
        *self.curr_id.lock().expect("id lock poisoned")
    }

    pub(crate) fn set_curr_id(&self, id: NodeId) {
        *self.curr_id.lock().expect("id lock poisoned") = id;
    }

    pub fn register_node(&self, id: NodeId, node: Arc<dyn Node>) {
        self.nodes.lock().expect("node map poisoned").insert(id, node);
    }

    pub fn node(&self, id: NodeId) -> Option<Arc<dyn Node>> {
        self.nodes.lock().expect("node map poisoned").get(&id).cloned()
    }

    /// A snapshot of every registered node.
    pub fn nodes(&self) -> Vec<Arc<dyn Node>> {
        self.nodes
            .lock()
            .expect("node map poisoned")
            .values()
            .cloned()
            .collect()
    }

    pub fn set_result_id(&self, id: NodeId) {
        *self.result_id.lock().expect("result id poisoned") = Some(id);
    }

    pub fn result_id(&self) -> Option<NodeId> {
        *self.result_id.lock().expect("result id poisoned")
    }

    /// The designated top of the graph whose final message is the
    /// program's output.
    pub fn result_node(&self) -> Option<Arc<dyn Node>> {
        self.result_id().and_then(|id| self.node(id))
    }

    /// Marks a node as started. Returns false if it was already started;
    /// callers skip spawning in that case, which is what makes starting a
    /// node idempotent.
    pub(crate) fn mark_started(&self, id: NodeId) -> bool {
        self.started.lock().expect("started set poisoned").insert(id)
    }

    /// Records a limit of `max_times` requests per `period` for `host` and
    /// builds the matching token bucket (one token per `period / max_times`,
    /// bucket size 1).
    pub fn set_rate_limit(&self, host: &str, max_times: i32, period: Duration) {
        let Some(per_token) = u32::try_from(max_times)
            .ok()
            .and_then(NonZeroU32::new)
            .map(|n| period / n.get())
        else {
            tracing::warn!(host, max_times, "ignoring non-positive rate limit");
            return;
        };
        let Some(quota) = Quota::with_period(per_token) else {
            tracing::warn!(host, ?period, "ignoring zero-period rate limit");
            return;
        };
        let quota = quota.allow_burst(NonZeroU32::new(1).expect("1 is non-zero"));
        self.limits.lock().expect("limits poisoned").insert(
            host.to_string(),
            RateLimit { max_times, period },
        );
        self.limiters
            .lock()
            .expect("limiters poisoned")
            .insert(host.to_string(), Arc::new(RateLimiter::direct(quota)));
    }

    /// Blocks until a request to `host` is allowed. Returns immediately
    /// when no limiter is configured for the host.
    pub async fn rate_limit(&self, host: &str) {
        let limiter = self
            .limiters
            .lock()
            .expect("limiters poisoned")
            .get(host)
            .cloned();
        if let Some(limiter) = limiter {
            tracing::debug!(host, "waiting for rate limit token");
            limiter.until_ready().await;
        }
    }

    /// The persisted rate-limit configuration, sorted by host for a stable
    /// serialization order.
    pub fn rate_limits(&self) -> Vec<(String, RateLimit)> {
        let mut entries: Vec<_> = self
            .limits
            .lock()
            .expect("limits poisoned")
            .iter()
            .map(|(host, limit)| (host.clone(), limit.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// The shared HTTP client used by Goto nodes.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_and_unique() {
        let globals = Globals::new();
        let ids: Vec<NodeId> = (0..100).map(|_| globals.generate_id()).collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(*id, i as NodeId);
        }
        assert_eq!(globals.curr_id(), 100);
    }

    #[test]
    fn mark_started_is_once_only() {
        let globals = Globals::new();
        assert!(globals.mark_started(3));
        assert!(!globals.mark_started(3));
    }

    #[tokio::test]
    async fn rate_limit_without_config_is_immediate() {
        let globals = Globals::new();
        globals.rate_limit("example.com").await;
    }

    #[tokio::test]
    async fn rate_limit_config_is_recorded() {
        let globals = Globals::new();
        globals.set_rate_limit("example.com", 4, Duration::from_secs(2));
        let limits = globals.rate_limits();
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].0, "example.com");
        assert_eq!(
            limits[0].1,
            RateLimit {
                max_times: 4,
                period: Duration::from_secs(2)
            }
        );
        // First token is available immediately (bucket size 1).
        globals.rate_limit("example.com").await;
    }
}
