use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::blocking::{BlockingMode, FilterList};
use crate::cache::DnsCache;
use crate::config::DnsConfig;
use crate::dns::{self, QueryInfo};
use crate::error::Result;
use crate::resolver::{Upstream, MAX_PACKET_SIZE};
use crate::stats::Statistics;

/// The query pipeline: filter, cache, forward.
///
/// One instance is shared by every request task. The cache and filter
/// handle their own locking; the only pipeline-level state is the set of
/// keys with a refresh currently in flight, so a popular entry going
/// stale triggers one upstream query instead of a thundering herd.
pub struct DnsServer {
    config: DnsConfig,
    cache: Arc<DnsCache>,
    filter: Arc<FilterList>,
    upstream: Arc<dyn Upstream>,
    stats: Arc<Statistics>,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl DnsServer {
    pub fn new(config: DnsConfig, filter: Arc<FilterList>, upstream: Arc<dyn Upstream>) -> Self {
        let cache = Arc::new(DnsCache::new(config.cache_config.clone()));
        Self {
            config,
            cache,
            filter,
            upstream,
            stats: Arc::new(Statistics::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn cache(&self) -> &Arc<DnsCache> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<Statistics> {
        &self.stats
    }

    /// Process one query and produce the response to send back, if any.
    /// Unparseable queries are dropped.
    pub async fn handle_query(&self, query: &[u8]) -> Option<Vec<u8>> {
        let info = match QueryInfo::parse(query) {
            Ok(info) => info,
            Err(e) => {
                debug!(error = %e, "dropping unparseable query");
                return None;
            }
        };

        if self.config.blocking_enabled && self.filter_domain(&info.domain) {
            trace!(domain = %info.domain, "blocked");
            return Some(self.blocked_response(query));
        }

        if let Some(response) = self.get_cache(&info, query) {
            return Some(response);
        }

        match self.query_upstream(query, &info).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(domain = %info.domain, error = %e, "upstream query failed");
                None
            }
        }
    }

    /// Check the filter and bump the decision counters.
    fn filter_domain(&self, domain: &str) -> bool {
        if self.filter.is_blocked(domain) {
            self.stats.record_blocked();
            true
        } else {
            self.stats.record_allowed();
            false
        }
    }

    fn blocked_response(&self, query: &[u8]) -> Vec<u8> {
        match self.config.blocking_mode {
            BlockingMode::NxDomain => dns::create_nxdomain_response(query),
            BlockingMode::NullIp => dns::create_null_response(query),
        }
    }

    /// Serve from cache when possible, stamping the client's transaction
    /// id and kicking off a background refresh when the entry asks for
    /// one.
    fn get_cache(&self, info: &QueryInfo, query: &[u8]) -> Option<Vec<u8>> {
        let (response, found, needs_refresh) = self.cache.get(&info.cache_key);

        if !found {
            self.stats.record_cache_miss();
            return None;
        }

        self.stats.record_cache_hit();

        if needs_refresh {
            self.spawn_refresh(info.cache_key.clone(), query.to_vec());
        }

        let mut response = response?;
        dns::rewrite_transaction_id(&mut response, info.id);
        Some(response)
    }

    /// Forward to the upstream resolver and cache the answer under the
    /// TTL extracted from it.
    async fn query_upstream(&self, query: &[u8], info: &QueryInfo) -> Result<Vec<u8>> {
        let response = self
            .upstream
            .resolve(query, self.config.upstream_timeout)
            .await?;

        let ttl = dns::extract_ttl(&response);
        self.cache.set(&info.cache_key, response.clone(), ttl);

        Ok(response)
    }

    /// Launch a background refresh unless one is already running for the
    /// key. A failed or timed-out refresh never touches the cache: the
    /// previous entry keeps serving for the rest of its grace window.
    fn spawn_refresh(&self, key: String, query: Vec<u8>) {
        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(key.clone()) {
                return;
            }
        }

        let cache = Arc::clone(&self.cache);
        let upstream = Arc::clone(&self.upstream);
        let in_flight = Arc::clone(&self.in_flight);
        let deadline = self.config.upstream_timeout;

        tokio::spawn(async move {
            match upstream.resolve(&query, deadline).await {
                Ok(response) => {
                    let ttl = dns::extract_ttl(&response);
                    cache.set(&key, response, ttl);
                    debug!(key = %key, ttl, "refreshed cache entry");
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "refresh failed; keeping stale entry");
                }
            }
            in_flight.lock().remove(&key);
        });
    }

    /// Run the UDP listener until the shutdown signal fires.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        let socket = Arc::new(UdpSocket::bind(self.config.bind_addr).await?);
        info!(addr = %self.config.bind_addr, "DNS listener started");

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        loop {
            tokio::select! {
                result = socket.recv_from(&mut buf) => {
                    let (len, src) = match result {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "UDP recv error");
                            continue;
                        }
                    };

                    let query = buf[..len].to_vec();
                    let server = Arc::clone(&self);
                    let socket = Arc::clone(&socket);
                    tokio::spawn(async move {
                        if let Some(response) = server.handle_query(&query).await {
                            if let Err(e) = socket.send_to(&response, src).await {
                                warn!(error = %e, "failed to send response");
                            }
                        }
                    });
                }
                _ = shutdown.recv() => {
                    info!("DNS listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::error::DnsError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scripted upstream: a canned response, an error, or a slow reply.
    struct MockUpstream {
        response: Option<Vec<u8>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl MockUpstream {
        fn answering(response: Vec<u8>) -> Self {
            Self {
                response: Some(response),
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: None,
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Upstream for MockUpstream {
        async fn resolve(&self, _query: &[u8], _deadline: Duration) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.response.clone().ok_or(DnsError::Timeout)
        }
    }

    fn build_query(id: u16, domain: &str) -> Vec<u8> {
        let mut query = Vec::new();
        query.extend_from_slice(&id.to_be_bytes());
        query.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        for label in domain.split('.') {
            query.push(label.len() as u8);
            query.extend_from_slice(label.as_bytes());
        }
        query.push(0);
        query.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]); // A, IN
        query
    }

    /// A response to `query` carrying one A record with the given TTL.
    fn build_response(query: &[u8], ttl: u32) -> Vec<u8> {
        let mut response = query.to_vec();
        response[2] = 0x81;
        response[3] = 0x80;
        response[7] = 1;
        response.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);
        response.extend_from_slice(&ttl.to_be_bytes());
        response.extend_from_slice(&[0x00, 0x04, 9, 9, 9, 9]);
        response
    }

    fn test_server(upstream: Arc<MockUpstream>) -> Arc<DnsServer> {
        let config = DnsConfig {
            upstream_timeout: Duration::from_millis(500),
            ..DnsConfig::default()
        };
        Arc::new(DnsServer::new(
            config,
            Arc::new(FilterList::new()),
            upstream,
        ))
    }

    #[tokio::test]
    async fn blocked_domain_gets_nxdomain_without_upstream() {
        let upstream = Arc::new(MockUpstream::failing());
        let server = test_server(upstream.clone());
        server.filter.add("blocked.com");

        let query = build_query(0x1234, "blocked.com");
        let response = server.handle_query(&query).await.unwrap();

        assert_eq!(response[2], 0x81);
        assert_eq!(response[3], 0x83);
        assert_eq!(&response[0..2], &[0x12, 0x34]);
        assert_eq!(upstream.call_count(), 0);
        assert_eq!(server.stats.get_stats().blocked, 1);
    }

    #[tokio::test]
    async fn null_mode_answers_with_zero_address() {
        let upstream = Arc::new(MockUpstream::failing());
        let config = DnsConfig {
            blocking_mode: BlockingMode::NullIp,
            ..DnsConfig::default()
        };
        let server = Arc::new(DnsServer::new(
            config,
            Arc::new(FilterList::new()),
            upstream,
        ));
        server.filter.add("blocked.com");

        let query = build_query(0x5678, "blocked.com");
        let response = server.handle_query(&query).await.unwrap();

        assert_eq!(response[3], 0x80);
        assert_eq!(u16::from_be_bytes([response[6], response[7]]), 1);
        assert_eq!(&response[response.len() - 4..], &[0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn miss_forwards_upstream_and_caches() {
        let query = build_query(1, "example.com");
        let upstream = Arc::new(MockUpstream::answering(build_response(&query, 3600)));
        let server = test_server(upstream.clone());

        let response = server.handle_query(&query).await.unwrap();
        assert_eq!(upstream.call_count(), 1);
        assert_eq!(response, build_response(&query, 3600));

        let snapshot = server.stats.get_stats();
        assert_eq!(snapshot.allowed, 1);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(server.cache.len(), 1);
    }

    #[tokio::test]
    async fn second_query_is_served_from_cache() {
        let query = build_query(2, "example.com");
        let upstream = Arc::new(MockUpstream::answering(build_response(&query, 3600)));
        let server = test_server(upstream.clone());

        server.handle_query(&query).await.unwrap();
        let cached = server.handle_query(&query).await.unwrap();

        assert_eq!(upstream.call_count(), 1, "hit must not reach upstream");
        assert_eq!(server.stats.get_stats().cache_hits, 1);
        assert_eq!(&cached[0..2], &[0x00, 0x02]);
    }

    #[tokio::test]
    async fn cached_response_gets_the_clients_id() {
        let first = build_query(0x0A0A, "example.com");
        let upstream = Arc::new(MockUpstream::answering(build_response(&first, 3600)));
        let server = test_server(upstream);

        server.handle_query(&first).await.unwrap();

        let second = build_query(0x0B0B, "example.com");
        let cached = server.handle_query(&second).await.unwrap();
        assert_eq!(&cached[0..2], &[0x0B, 0x0B]);
    }

    #[tokio::test]
    async fn unparseable_query_is_dropped() {
        let upstream = Arc::new(MockUpstream::failing());
        let server = test_server(upstream);

        assert!(server.handle_query(&[0u8; 3]).await.is_none());
    }

    #[tokio::test]
    async fn upstream_error_yields_no_response() {
        let upstream = Arc::new(MockUpstream::failing());
        let server = test_server(upstream.clone());

        let query = build_query(3, "example.com");
        assert!(server.handle_query(&query).await.is_none());
        assert_eq!(upstream.call_count(), 1);
        assert_eq!(server.cache.len(), 0, "a failed query must not be cached");
    }

    #[tokio::test]
    async fn failed_refresh_keeps_the_stale_entry() {
        let upstream = Arc::new(MockUpstream::failing());
        let server = test_server(upstream.clone());

        // Seed a stale entry directly (TTL 0 puts it in the grace window).
        server.cache.set("example.com:1", b"stale-bytes".to_vec(), 0);

        let query = build_query(4, "example.com");
        let response = server.handle_query(&query).await.unwrap();
        assert_eq!(&response[2..], b"ale-bytes"); // id stamped over the first two bytes

        // Let the spawned refresh run and fail.
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (bytes, found, _) = server.cache.get("example.com:1");
        assert!(found, "stale entry must survive a failed refresh");
        assert_eq!(&bytes.unwrap()[2..], b"ale-bytes");
        assert!(upstream.call_count() >= 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_coalesce() {
        let upstream = Arc::new(MockUpstream {
            response: Some(build_response(&build_query(5, "example.com"), 60)),
            delay: Some(Duration::from_millis(100)),
            calls: AtomicUsize::new(0),
        });
        let server = test_server(upstream.clone());

        server.spawn_refresh("example.com:1".to_string(), build_query(5, "example.com"));
        server.spawn_refresh("example.com:1".to_string(), build_query(5, "example.com"));

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(upstream.call_count(), 1, "one refresh per key at a time");
    }
}
