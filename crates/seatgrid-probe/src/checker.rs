//! Status probe and snapshot tracking.
//!
//! `probe_status` performs one authenticated `GET` against an instance's
//! status endpoint; `SessionTracker` folds the outcomes into the cached
//! snapshot the switchover engine consumes.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use seatgrid_state::{SessionSnapshot, PLAYERS_UNKNOWN};

/// Why a probe produced no usable reading.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("http handshake failed: {0}")]
    Handshake(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("status endpoint returned {0}")]
    Status(u16),

    #[error("reading body failed: {0}")]
    Body(String),

    #[error("malformed status body: {0}")]
    Malformed(String),

    #[error("probe timed out")]
    Timeout,
}

pub type ProbeResult<T> = Result<T, ProbeError>;

/// Body of a successful status response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub active_users: i64,
    pub active: bool,
    #[serde(default)]
    pub world: Option<String>,
}

/// Prober settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub interval: Duration,
    pub connect_timeout: Duration,
    /// Bound on the whole request, connect included.
    pub timeout: Duration,
    /// Readings older than this count as unknown.
    pub stale_after: Duration,
    pub path: String,
    pub token: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            stale_after: Duration::from_secs(180),
            path: "/status".to_string(),
            token: None,
        }
    }
}

/// Folds probe outcomes into a `SessionSnapshot`.
#[derive(Debug)]
pub struct SessionTracker {
    snapshot: SessionSnapshot,
    consecutive_failures: u32,
}

impl SessionTracker {
    /// Start from whatever snapshot is already cached.
    pub fn new(initial: SessionSnapshot) -> Self {
        Self {
            snapshot: initial,
            consecutive_failures: 0,
        }
    }

    /// Record one probe outcome observed at `now` and return the new snapshot.
    pub fn record(&mut self, outcome: ProbeResult<StatusReport>, now: u64) -> &SessionSnapshot {
        match outcome {
            Ok(report) => {
                if self.consecutive_failures > 0 {
                    debug!(
                        failures = self.consecutive_failures,
                        players = report.active_users,
                        "status endpoint recovered"
                    );
                }
                self.consecutive_failures = 0;
                self.snapshot.connected_players = Some(report.active_users);
                self.snapshot.world_active = Some(report.active);
                if report.world.is_some() {
                    self.snapshot.active_world = report.world;
                }
                self.snapshot.last_probe_time = Some(now);
                self.snapshot.last_error = None;
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures == 1 {
                    warn!(error = %e, "status probe failed, player count unknown");
                } else {
                    debug!(error = %e, failures = self.consecutive_failures, "status probe still failing");
                }
                // Timestamp stays at the last success.
                self.snapshot.connected_players = Some(PLAYERS_UNKNOWN);
                self.snapshot.last_error = Some(e.to_string());
            }
        }
        &self.snapshot
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

/// Query an instance's status endpoint.
///
/// `address` is `host:port`. The connect phase is bounded by
/// `connect_timeout`, the whole exchange by `timeout`.
pub async fn probe_status(
    address: &str,
    path: &str,
    token: Option<&str>,
    connect_timeout: Duration,
    timeout: Duration,
) -> ProbeResult<StatusReport> {
    match tokio::time::timeout(timeout, exchange(address, path, token, connect_timeout)).await {
        Ok(result) => {
            if let Err(e) = &result {
                debug!(%address, %path, error = %e, "status probe failed");
            }
            result
        }
        Err(_) => {
            debug!(%address, %path, "status probe timed out");
            Err(ProbeError::Timeout)
        }
    }
}

async fn exchange(
    address: &str,
    path: &str,
    token: Option<&str>,
    connect_timeout: Duration,
) -> ProbeResult<StatusReport> {
    let stream = tokio::time::timeout(connect_timeout, tokio::net::TcpStream::connect(address))
        .await
        .map_err(|_| ProbeError::Timeout)?
        .map_err(|e| ProbeError::Connect(e.to_string()))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| ProbeError::Handshake(e.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", address)
        .header("accept", "application/json")
        .header("user-agent", "seatgrid-probe/0.1");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let req = builder
        .body(Empty::<Bytes>::new())
        .map_err(|e| ProbeError::Request(e.to_string()))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| ProbeError::Request(e.to_string()))?;
    if !resp.status().is_success() {
        return Err(ProbeError::Status(resp.status().as_u16()));
    }

    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ProbeError::Body(e.to_string()))?
        .to_bytes();
    parse_report(&body)
}

fn parse_report(body: &[u8]) -> ProbeResult<StatusReport> {
    let report: StatusReport =
        serde_json::from_slice(body).map_err(|e| ProbeError::Malformed(e.to_string()))?;
    if report.active_users < 0 {
        return Err(ProbeError::Malformed(format!(
            "negative activeUsers {}",
            report.active_users
        )));
    }
    Ok(report)
}

/// Parse a duration string like "500ms", "5s", "2m", "1h" or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
