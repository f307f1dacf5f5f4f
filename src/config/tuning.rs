use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

use derivative::Derivative;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

const DEFAULT_QPS: NonZeroU32 = NonZeroU32::new(50).unwrap();
const DEFAULT_BURST: NonZeroU32 = NonZeroU32::new(100).unwrap();
const DEFAULT_MAX_CONNECTIONS: usize = 500;

/// Transport settings applied to every resolved cluster configuration.
///
/// The defaults suit a control plane holding connections to many clusters
/// at once.
#[serde_as]
#[derive(Clone, Debug, Derivative, Deserialize, Serialize, PartialEq, Eq)]
#[derivative(Default)]
#[serde(deny_unknown_fields)]
pub struct TuningConfig {
    /// Sustained requests per second allowed per transport.
    #[serde(default = "default_qps")]
    #[derivative(Default(value = "DEFAULT_QPS"))]
    pub qps: NonZeroU32,

    /// Requests allowed in a burst above the sustained rate.
    #[serde(default = "default_burst")]
    #[derivative(Default(value = "DEFAULT_BURST"))]
    pub burst: NonZeroU32,

    /// Timeout for establishing the TCP connection.
    #[serde(default = "default_dial_timeout", rename = "dial_timeout_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[derivative(Default(value = "default_dial_timeout()"))]
    pub dial_timeout: Duration,

    /// TCP keep-alive interval of pooled connections.
    #[serde(default = "default_keep_alive", rename = "keep_alive_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[derivative(Default(value = "default_keep_alive()"))]
    pub keep_alive: Duration,

    /// Timeout for the TLS handshake once the TCP connection is up.
    #[serde(
        default = "default_tls_handshake_timeout",
        rename = "tls_handshake_timeout_secs"
    )]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[derivative(Default(value = "default_tls_handshake_timeout()"))]
    pub tls_handshake_timeout: Duration,

    /// How long an idle pooled connection is kept open.
    #[serde(default = "default_idle_timeout", rename = "idle_timeout_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[derivative(Default(value = "default_idle_timeout()"))]
    pub idle_timeout: Duration,

    /// Maximum idle connections kept across all hosts.
    #[serde(default = "default_max_connections")]
    #[derivative(Default(value = "DEFAULT_MAX_CONNECTIONS"))]
    pub max_idle_connections: usize,

    /// Maximum idle connections kept per host.
    #[serde(default = "default_max_connections")]
    #[derivative(Default(value = "DEFAULT_MAX_CONNECTIONS"))]
    pub max_idle_connections_per_host: usize,

    /// Maximum in-flight connections per host.
    #[serde(default = "default_max_connections_per_host")]
    #[derivative(Default(value = "default_max_connections_per_host()"))]
    pub max_connections_per_host: NonZeroUsize,

    /// Exec plugin tokens this close to expiry are refreshed ahead of use.
    #[serde(default = "default_token_refresh_skew", rename = "token_refresh_skew_secs")]
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[derivative(Default(value = "default_token_refresh_skew()"))]
    pub token_refresh_skew: Duration,
}

impl TuningConfig {
    /// Idle connections kept for the single host a transport talks to.
    pub fn idle_per_host(&self) -> usize {
        self.max_idle_connections
            .min(self.max_idle_connections_per_host)
    }

    /// Upper bound for dialing plus the TLS handshake.
    pub fn connect_timeout(&self) -> Duration {
        self.dial_timeout + self.tls_handshake_timeout
    }
}

const fn default_qps() -> NonZeroU32 {
    DEFAULT_QPS
}

const fn default_burst() -> NonZeroU32 {
    DEFAULT_BURST
}

const fn default_dial_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

const fn default_tls_handshake_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

const fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

const fn default_max_connections_per_host() -> NonZeroUsize {
    NonZeroUsize::new(DEFAULT_MAX_CONNECTIONS).unwrap()
}

const fn default_token_refresh_skew() -> Duration {
    Duration::from_secs(10)
}
