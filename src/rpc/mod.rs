//! JSON-RPC 1.0 pool transport: `getwork` fetch/submit plus long-poll, over
//! HTTP(S) with basic auth, backoff, and a fallback-URL list. Grounded on the
//! external RPC client pattern (lock-then-release-before-await, basic_auth,
//! exponential backoff across a primary + fallbacks).

use std::time::Duration;

use reqwest::Client;
use serde_json::json;

use crate::core::params::{WORK_DATA_LEN, WORK_HASH1_LEN, WORK_MIDSTATE_LEN, WORK_TARGET_LEN};
use crate::error::{CoordinatorError, Result};

/// One pool endpoint as the transport needs it — deliberately narrower than
/// `pool::Pool` so the transport doesn't depend on registry internals.
#[derive(Debug, Clone)]
pub struct PoolEndpoint {
    pub pool_no: u32,
    pub url: String,
    pub user: String,
    pub pass: String,
}

#[derive(Debug, Clone)]
pub struct WorkResponse {
    pub midstate: [u8; WORK_MIDSTATE_LEN],
    pub data: [u8; WORK_DATA_LEN],
    pub hash1: [u8; WORK_HASH1_LEN],
    pub target: [u8; WORK_TARGET_LEN],
    pub rolltime: bool,
    /// `X-Long-Polling` response header, if the pool advertised one.
    pub hdr_path: Option<String>,
}

fn hex_field(v: &serde_json::Value, field: &str, len: usize) -> Result<Vec<u8>> {
    let s = v
        .get(field)
        .and_then(|f| f.as_str())
        .ok_or_else(|| CoordinatorError::protocol(format!("missing field '{field}'")))?;
    let bytes = hex::decode(s).map_err(|e| CoordinatorError::protocol(format!("{field}: {e}")))?;
    if bytes.len() != len {
        return Err(CoordinatorError::protocol(format!(
            "{field}: expected {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn parse_work(v: &serde_json::Value, hdr_path: Option<String>) -> Result<WorkResponse> {
    let result = v.get("result").ok_or_else(|| CoordinatorError::protocol("missing result"))?;
    let data = hex_field(result, "data", WORK_DATA_LEN)?;
    let midstate = hex_field(result, "midstate", WORK_MIDSTATE_LEN)?;
    let hash1 = hex_field(result, "hash1", WORK_HASH1_LEN)?;
    let target = hex_field(result, "target", WORK_TARGET_LEN)?;
    let rolltime = result.get("rolltime").and_then(|r| r.as_bool()).unwrap_or(true);
    Ok(WorkResponse {
        midstate: midstate.try_into().unwrap(),
        data: data.try_into().unwrap(),
        hash1: hash1.try_into().unwrap(),
        target: target.try_into().unwrap(),
        rolltime,
        hdr_path,
    })
}

/// Abstraction over the wire-level pool protocol so fetcher/submit/long-poll
/// logic can be exercised against a mock in tests. Generic (not `dyn`)
/// substitution — every caller is itself generic over `T: PoolTransport`.
pub trait PoolTransport: Send + Sync {
    fn get_work(
        &self,
        pool: &PoolEndpoint,
    ) -> impl std::future::Future<Output = Result<WorkResponse>> + Send;

    fn submit_work(
        &self,
        pool: &PoolEndpoint,
        data_hex: &str,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Blocking long-poll request against `path` (absolute or relative to
    /// the pool's own host). Returns the freshly issued work on unblock.
    fn long_poll(
        &self,
        pool: &PoolEndpoint,
        path: &str,
    ) -> impl std::future::Future<Output = Result<WorkResponse>> + Send;
}

/// Concrete `reqwest`-backed transport. `ATTEMPTS_PER_REQUEST` attempts are
/// issued against the same URL before the caller's own backoff loop takes
/// over — this client does not itself sleep between attempts.
#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoordinatorError::fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(HttpTransport { http })
    }

    fn request(&self, pool: &PoolEndpoint, params: serde_json::Value) -> reqwest::RequestBuilder {
        let body = json!({
            "jsonrpc": "1.0",
            "id": 0,
            "method": "getwork",
            "params": params,
        });
        self.http.post(&pool.url).basic_auth(&pool.user, Some(&pool.pass)).json(&body)
    }

    fn long_poll_url(&self, pool: &PoolEndpoint, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            let base = pool.url.trim_end_matches('/');
            let origin = base.split("://").last().and_then(|rest| rest.split('/').next()).unwrap_or(base);
            let scheme = if base.starts_with("https://") { "https" } else { "http" };
            format!("{scheme}://{origin}{}", if path.starts_with('/') { path.to_string() } else { format!("/{path}") })
        }
    }
}

impl PoolTransport for HttpTransport {
    async fn get_work(&self, pool: &PoolEndpoint) -> Result<WorkResponse> {
        let resp = self
            .request(pool, json!([]))
            .send()
            .await
            .map_err(|e| CoordinatorError::Transport { pool_no: pool.pool_no, source: e })?;
        let hdr_path = resp
            .headers()
            .get("x-long-polling")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoordinatorError::Transport { pool_no: pool.pool_no, source: e })?;
        parse_work(&body, hdr_path)
    }

    async fn submit_work(&self, pool: &PoolEndpoint, data_hex: &str) -> Result<bool> {
        let resp = self
            .request(pool, json!([data_hex]))
            .send()
            .await
            .map_err(|e| CoordinatorError::Transport { pool_no: pool.pool_no, source: e })?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoordinatorError::Transport { pool_no: pool.pool_no, source: e })?;
        body.get("result")
            .and_then(|r| r.as_bool())
            .ok_or_else(|| CoordinatorError::protocol("submit response missing boolean result"))
    }

    async fn long_poll(&self, pool: &PoolEndpoint, path: &str) -> Result<WorkResponse> {
        let url = self.long_poll_url(pool, path);
        let body = json!({ "jsonrpc": "1.0", "id": 0, "method": "getwork", "params": [] });
        let resp = self
            .http
            .post(&url)
            .basic_auth(&pool.user, Some(&pool.pass))
            .json(&body)
            .send()
            .await
            .map_err(|e| CoordinatorError::Transport { pool_no: pool.pool_no, source: e })?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoordinatorError::Transport { pool_no: pool.pool_no, source: e })?;
        parse_work(&body, None)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Deterministic in-memory transport for pipeline tests: hands out
    /// work whose prefix byte increments every `flip_after` calls, so tests
    /// can script block changes without real network I/O.
    pub struct MockTransport {
        pub prefix_byte: AtomicU32,
        pub fail_next: AtomicU32,
        pub submitted: Mutex<Vec<String>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            MockTransport {
                prefix_byte: AtomicU32::new(0xAA),
                fail_next: AtomicU32::new(0),
                submitted: Mutex::new(Vec::new()),
            }
        }

        pub fn set_prefix(&self, b: u32) {
            self.prefix_byte.store(b, Ordering::SeqCst);
        }

        pub fn fail_next_n(&self, n: u32) {
            self.fail_next.store(n, Ordering::SeqCst);
        }

        fn maybe_fail(&self, pool_no: u32) -> Result<()> {
            let remaining = self.fail_next.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_next.store(remaining - 1, Ordering::SeqCst);
                return Err(CoordinatorError::protocol(format!("mock failure for pool {pool_no}")));
            }
            Ok(())
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    impl PoolTransport for MockTransport {
        async fn get_work(&self, pool: &PoolEndpoint) -> Result<WorkResponse> {
            self.maybe_fail(pool.pool_no)?;
            let mut data = [0u8; WORK_DATA_LEN];
            data[0] = self.prefix_byte.load(Ordering::SeqCst) as u8;
            Ok(WorkResponse {
                midstate: [0u8; WORK_MIDSTATE_LEN],
                data,
                hash1: [0u8; WORK_HASH1_LEN],
                target: [0xff; WORK_TARGET_LEN],
                rolltime: true,
                hdr_path: None,
            })
        }

        async fn submit_work(&self, pool: &PoolEndpoint, data_hex: &str) -> Result<bool> {
            self.maybe_fail(pool.pool_no)?;
            self.submitted.lock().unwrap().push(data_hex.to_string());
            Ok(true)
        }

        async fn long_poll(&self, pool: &PoolEndpoint, _path: &str) -> Result<WorkResponse> {
            self.get_work(pool).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockTransport;
    use super::*;

    #[tokio::test]
    async fn mock_get_work_round_trips_prefix() {
        let transport = MockTransport::new();
        transport.set_prefix(0xBB);
        let ep = PoolEndpoint { pool_no: 0, url: "http://x".into(), user: "u".into(), pass: "p".into() };
        let work = transport.get_work(&ep).await.unwrap();
        assert_eq!(work.data[0], 0xBB);
    }

    #[tokio::test]
    async fn mock_submit_records_payload() {
        let transport = MockTransport::new();
        let ep = PoolEndpoint { pool_no: 0, url: "http://x".into(), user: "u".into(), pass: "p".into() };
        let ok = transport.submit_work(&ep, "deadbeef").await.unwrap();
        assert!(ok);
        assert_eq!(transport.submitted.lock().unwrap().as_slice(), ["deadbeef"]);
    }

    #[tokio::test]
    async fn mock_failures_are_countable() {
        let transport = MockTransport::new();
        transport.fail_next_n(2);
        let ep = PoolEndpoint { pool_no: 0, url: "http://x".into(), user: "u".into(), pass: "p".into() };
        assert!(transport.get_work(&ep).await.is_err());
        assert!(transport.get_work(&ep).await.is_err());
        assert!(transport.get_work(&ep).await.is_ok());
    }

    #[test]
    fn long_poll_url_resolves_relative_path() {
        let t = HttpTransport::new(Duration::from_secs(5)).unwrap();
        let ep = PoolEndpoint { pool_no: 0, url: "http://pool.example:8332/".into(), user: "u".into(), pass: "p".into() };
        assert_eq!(t.long_poll_url(&ep, "/lp"), "http://pool.example:8332/lp");
        assert_eq!(t.long_poll_url(&ep, "http://other/lp"), "http://other/lp");
    }
}
