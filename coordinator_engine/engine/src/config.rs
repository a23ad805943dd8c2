// File: src/config.rs

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::CoordinatorError;

/// Well-known coordinator port.
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;
pub const DEFAULT_SWEEP_SECS: u64 = 60;
pub const DEFAULT_AUDIT_CAPACITY: usize = 500;

/// Coordinator process settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub bind: SocketAddr,
    /// Sessions idle for longer than this are swept. `None` disables expiry.
    pub session_ttl: Option<Duration>,
    pub sweep_interval: Duration,
    pub audit_capacity: usize,
    pub log_dir: String,
    pub log_json: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            session_ttl: Some(Duration::from_secs(DEFAULT_SESSION_TTL_SECS)),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_SECS),
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            log_dir: "logs".to_string(),
            log_json: false,
        }
    }
}

impl CoordinatorConfig {
    /// Build from `COORDINATOR_*` environment variables, falling back to defaults.
    ///
    /// `COORDINATOR_SESSION_TTL_SECS=0` disables expiry.
    pub fn from_env() -> Result<Self, CoordinatorError> {
        let defaults = CoordinatorConfig::default();

        let bind = match env::var("COORDINATOR_BIND") {
            Ok(raw) => raw
                .parse::<SocketAddr>()
                .map_err(|e| invalid("COORDINATOR_BIND", &raw, e))?,
            Err(_) => defaults.bind,
        };

        let session_ttl = match read_u64("COORDINATOR_SESSION_TTL_SECS")? {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(secs)),
            None => defaults.session_ttl,
        };

        let sweep_interval = sweep_interval(read_u64("COORDINATOR_SWEEP_SECS")?, defaults.sweep_interval)?;

        let audit_capacity = read_u64("COORDINATOR_AUDIT_CAPACITY")?
            .map(|c| c as usize)
            .unwrap_or(defaults.audit_capacity);

        let log_dir = env::var("COORDINATOR_LOG_DIR").unwrap_or(defaults.log_dir);
        let log_json = env::var("COORDINATOR_LOG_JSON")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(defaults.log_json);

        Ok(CoordinatorConfig {
            bind,
            session_ttl,
            sweep_interval,
            audit_capacity,
            log_dir,
            log_json,
        })
    }
}

/// Polling cadence and deadlines for a round driver's wait loops.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Between `Status` polls while waiting for every party to join.
    pub quorum_interval: Duration,
    /// Between polls while waiting for a round to complete.
    pub round_interval: Duration,
    /// Between polls while waiting for the initiator to stage the payload.
    pub transaction_interval: Duration,
    /// Between attempts to re-send a write the coordinator never received.
    pub reconnect_interval: Duration,
    /// Upper bound on any single wait. `None` waits until cancelled.
    pub wait_timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            quorum_interval: Duration::from_secs(2),
            round_interval: Duration::from_secs(2),
            transaction_interval: Duration::from_secs(1),
            reconnect_interval: Duration::from_secs(2),
            wait_timeout: Some(Duration::from_secs(600)),
        }
    }
}

impl PollPolicy {
    /// Tight cadence for in-process runs and tests.
    pub fn fast() -> Self {
        PollPolicy {
            quorum_interval: Duration::from_millis(10),
            round_interval: Duration::from_millis(10),
            transaction_interval: Duration::from_millis(10),
            reconnect_interval: Duration::from_millis(10),
            wait_timeout: Some(Duration::from_secs(30)),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

fn read_u64(name: &str) -> Result<Option<u64>, CoordinatorError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|e| invalid(name, &raw, e)),
        Err(_) => Ok(None),
    }
}

/// `tokio::time::interval` panics on a zero period.
fn sweep_interval(secs: Option<u64>, default: Duration) -> Result<Duration, CoordinatorError> {
    match secs {
        Some(0) => Err(CoordinatorError::InvalidParameters(
            "COORDINATOR_SWEEP_SECS must be at least 1".into(),
        )),
        Some(secs) => Ok(Duration::from_secs(secs)),
        None => Ok(default),
    }
}

fn invalid(name: &str, raw: &str, e: impl std::fmt::Display) -> CoordinatorError {
    CoordinatorError::InvalidParameters(format!("{name}={raw}: {e}"))
}
