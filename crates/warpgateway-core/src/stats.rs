//! Running traffic statistics.
//!
//! [`StatsCollector`] is an interceptor that counts requests by method and
//! host and responses by status. Blocked requests are counted by the
//! [`TrafficFilter`](crate::filter::TrafficFilter) itself through a shared
//! [`BlockCounter`], so the block count does not depend on where the
//! collector sits in the chain.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::flow::Flow;
use crate::interceptor::{Decision, Interceptor, InterceptorToggle};

/// Counter map where absent keys read as zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CounterMap<K: Ord> {
    counts: BTreeMap<K, u64>,
}

impl<K: Ord> Default for CounterMap<K> {
    fn default() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> CounterMap<K> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one to the count for `key`.
    pub fn increment(&mut self, key: K) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    /// Returns the count for `key`, zero if never incremented.
    pub fn get<Q>(&self, key: &Q) -> u64
    where
        K: std::borrow::Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Returns the number of distinct keys.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if nothing was counted.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Returns the sum of all counts.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Iterates keys in order with their counts.
    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    /// Returns the `n` largest entries, ties broken by key order.
    pub fn top(&self, n: usize) -> Vec<(K, u64)> {
        let mut entries: Vec<_> = self.counts.iter().map(|(k, v)| (k.clone(), *v)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        entries.truncate(n);
        entries
    }
}

/// Shared count of requests answered with a synthesized block response.
#[derive(Debug, Clone, Default)]
pub struct BlockCounter {
    count: Arc<AtomicU64>,
}

impl BlockCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one blocked request.
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the current count.
    pub fn get(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn reset(&self) {
        self.count.store(0, Ordering::SeqCst);
    }
}

/// Point-in-time copy of the statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub total_responses: u64,
    pub blocked_requests: u64,
    pub method_counts: CounterMap<String>,
    pub status_counts: CounterMap<u16>,
    pub host_counts: CounterMap<String>,
    pub start_time: DateTime<Utc>,
    /// Seconds since `start_time` when the snapshot was taken.
    pub uptime_seconds: f64,
    /// `total_requests / uptime_seconds`, or 0 when uptime is 0.
    pub requests_per_second: f64,
}

impl StatsSnapshot {
    /// Renders the multi-line statistics block printed on shutdown.
    pub fn summary_lines(&self) -> Vec<String> {
        let methods = self
            .method_counts
            .iter()
            .map(|(m, c)| format!("{}={}", m, c))
            .collect::<Vec<_>>()
            .join(", ");
        let statuses = self
            .status_counts
            .iter()
            .map(|(s, c)| format!("{}={}", s, c))
            .collect::<Vec<_>>()
            .join(", ");
        let hosts = self
            .host_counts
            .top(5)
            .into_iter()
            .map(|(h, c)| format!("{}={}", h, c))
            .collect::<Vec<_>>()
            .join(", ");

        vec![
            "Statistics:".to_string(),
            format!("  Total Requests: {}", self.total_requests),
            format!("  Total Responses: {}", self.total_responses),
            format!("  Blocked Requests: {}", self.blocked_requests),
            format!("  Uptime: {:.2}s", self.uptime_seconds),
            format!("  Requests/sec: {:.2}", self.requests_per_second),
            format!("  Methods: {{{}}}", methods),
            format!("  Status Codes: {{{}}}", statuses),
            format!("  Top Hosts: {{{}}}", hosts),
        ]
    }

    /// One-line status for a tray tooltip or status command.
    pub fn tooltip(&self) -> String {
        format!(
            "WarpGateway - {} requests, {} blocked",
            self.total_requests, self.blocked_requests
        )
    }
}

#[derive(Debug)]
struct StatsState {
    total_requests: u64,
    total_responses: u64,
    method_counts: CounterMap<String>,
    status_counts: CounterMap<u16>,
    host_counts: CounterMap<String>,
    start_time: DateTime<Utc>,
}

impl StatsState {
    fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            total_requests: 0,
            total_responses: 0,
            method_counts: CounterMap::new(),
            status_counts: CounterMap::new(),
            host_counts: CounterMap::new(),
            start_time,
        }
    }
}

/// Interceptor that maintains running traffic counters.
#[derive(Debug)]
pub struct StatsCollector {
    toggle: InterceptorToggle,
    state: Mutex<StatsState>,
    blocked: BlockCounter,
}

impl StatsCollector {
    /// Interceptor name.
    pub const NAME: &'static str = "StatsCollector";

    /// Creates a collector reading blocked requests from the given counter.
    pub fn new(blocked: BlockCounter) -> Self {
        Self {
            toggle: InterceptorToggle::new(),
            state: Mutex::new(StatsState::new(Utc::now())),
            blocked,
        }
    }

    /// Returns the block counter to share with a traffic filter.
    pub fn block_counter(&self) -> BlockCounter {
        self.blocked.clone()
    }

    /// Returns a snapshot with uptime computed now.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(Utc::now())
    }

    fn snapshot_at(&self, now: DateTime<Utc>) -> StatsSnapshot {
        let state = self.state.lock();
        let uptime_seconds = (now - state.start_time).num_milliseconds().max(0) as f64 / 1000.0;
        let requests_per_second = if uptime_seconds > 0.0 {
            state.total_requests as f64 / uptime_seconds
        } else {
            0.0
        };

        StatsSnapshot {
            total_requests: state.total_requests,
            total_responses: state.total_responses,
            blocked_requests: self.blocked.get(),
            method_counts: state.method_counts.clone(),
            status_counts: state.status_counts.clone(),
            host_counts: state.host_counts.clone(),
            start_time: state.start_time,
            uptime_seconds,
            requests_per_second,
        }
    }

    /// Zeroes every counter and restarts the uptime clock.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        *state = StatsState::new(Utc::now());
        self.blocked.reset();
        tracing::info!("Statistics reset");
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new(BlockCounter::new())
    }
}

impl Interceptor for StatsCollector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn is_enabled(&self) -> bool {
        self.toggle.is_enabled()
    }

    fn set_enabled(&self, enabled: bool) {
        self.toggle.set(Self::NAME, enabled);
    }

    fn on_request(&self, flow: &mut Flow) -> Decision {
        let mut state = self.state.lock();
        state.total_requests += 1;
        state.method_counts.increment(flow.request.method.clone());
        state.host_counts.increment(flow.request.host.clone());
        Decision::Continue
    }

    fn on_response(&self, flow: &mut Flow) -> Decision {
        if let Some(status) = flow.status() {
            let mut state = self.state.lock();
            state.total_responses += 1;
            state.status_counts.increment(status);
        }
        Decision::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{FlowRequest, FlowResponse};
    use chrono::Duration;

    fn flow(method: &str, url: &str) -> Flow {
        Flow::new(FlowRequest::new(method, url))
    }

    #[test]
    fn counter_map_defaults_to_zero() {
        let mut counts: CounterMap<String> = CounterMap::new();
        assert_eq!(counts.get("GET"), 0);
        counts.increment("GET".to_string());
        counts.increment("GET".to_string());
        assert_eq!(counts.get("GET"), 2);
        assert_eq!(counts.get("POST"), 0);
        assert_eq!(counts.total(), 2);
        assert_eq!(counts.len(), 1);
    }

    #[test]
    fn counter_map_top_orders_by_count_then_key() {
        let mut counts: CounterMap<String> = CounterMap::new();
        for host in ["b", "a", "c", "c", "a", "c"] {
            counts.increment(host.to_string());
        }
        assert_eq!(
            counts.top(2),
            vec![("c".to_string(), 3), ("a".to_string(), 2)]
        );
    }

    #[test]
    fn counts_requests_by_method_and_host() {
        let stats = StatsCollector::default();
        stats.on_request(&mut flow("GET", "https://a.test/1"));
        stats.on_request(&mut flow("POST", "https://a.test/2"));
        stats.on_request(&mut flow("GET", "https://b.test/"));

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 3);
        assert_eq!(snap.method_counts.get("GET"), 2);
        assert_eq!(snap.method_counts.get("POST"), 1);
        assert_eq!(snap.host_counts.get("a.test"), 2);
        assert_eq!(snap.host_counts.get("b.test"), 1);
        assert_eq!(snap.total_responses, 0);
    }

    #[test]
    fn counts_responses_only_when_present() {
        let stats = StatsCollector::default();
        let mut without = flow("GET", "https://a.test/");
        stats.on_response(&mut without);

        let mut with = flow("GET", "https://a.test/");
        with.response = Some(FlowResponse::new(404));
        stats.on_response(&mut with);

        let snap = stats.snapshot();
        assert_eq!(snap.total_responses, 1);
        assert_eq!(snap.status_counts.get(&404), 1);
        assert_eq!(snap.status_counts.get(&200), 0);
    }

    #[test]
    fn blocked_requests_come_from_shared_counter() {
        let counter = BlockCounter::new();
        let stats = StatsCollector::new(counter.clone());
        counter.increment();
        counter.increment();
        assert_eq!(stats.snapshot().blocked_requests, 2);
        assert_eq!(stats.block_counter().get(), 2);
    }

    #[test]
    fn derived_fields_computed_at_snapshot_time() {
        let stats = StatsCollector::default();
        for _ in 0..10 {
            stats.on_request(&mut flow("GET", "https://a.test/"));
        }
        let start = stats.snapshot().start_time;

        let snap = stats.snapshot_at(start + Duration::seconds(5));
        assert!((snap.uptime_seconds - 5.0).abs() < f64::EPSILON);
        assert!((snap.requests_per_second - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_uptime_gives_zero_rate() {
        let stats = StatsCollector::default();
        stats.on_request(&mut flow("GET", "https://a.test/"));
        let start = stats.snapshot().start_time;

        let snap = stats.snapshot_at(start);
        assert_eq!(snap.uptime_seconds, 0.0);
        assert_eq!(snap.requests_per_second, 0.0);
    }

    #[test]
    fn reset_clears_everything() {
        let counter = BlockCounter::new();
        let stats = StatsCollector::new(counter.clone());
        stats.on_request(&mut flow("GET", "https://a.test/"));
        counter.increment();
        let before = stats.snapshot().start_time;

        std::thread::sleep(std::time::Duration::from_millis(5));
        stats.reset();

        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.blocked_requests, 0);
        assert!(snap.method_counts.is_empty());
        assert!(snap.host_counts.is_empty());
        assert!(snap.start_time > before);
    }

    #[test]
    fn summary_lines_render_counts() {
        let stats = StatsCollector::default();
        stats.on_request(&mut flow("GET", "https://a.test/"));
        let mut f = flow("GET", "https://a.test/");
        f.response = Some(FlowResponse::new(200));
        stats.on_response(&mut f);

        let lines = stats.snapshot().summary_lines();
        assert!(lines.contains(&"  Total Requests: 1".to_string()));
        assert!(lines.contains(&"  Methods: {GET=1}".to_string()));
        assert!(lines.contains(&"  Status Codes: {200=1}".to_string()));
        assert!(lines.contains(&"  Top Hosts: {a.test=1}".to_string()));
    }

    #[test]
    fn tooltip_mentions_totals() {
        let stats = StatsCollector::default();
        stats.on_request(&mut flow("GET", "https://a.test/"));
        assert_eq!(
            stats.snapshot().tooltip(),
            "WarpGateway - 1 requests, 0 blocked"
        );
    }

    #[test]
    fn snapshot_serializes_to_json() {
        let stats = StatsCollector::default();
        let mut f = flow("GET", "https://a.test/");
        stats.on_request(&mut f);
        f.response = Some(FlowResponse::new(204));
        stats.on_response(&mut f);

        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["total_requests"], 1);
        assert_eq!(json["method_counts"]["GET"], 1);
        assert_eq!(json["status_counts"]["204"], 1);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let stats = Arc::new(StatsCollector::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        s.on_request(&mut flow("GET", "https://a.test/"));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.snapshot().total_requests, 800);
    }
}
