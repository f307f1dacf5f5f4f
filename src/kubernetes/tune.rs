//! Folding a plain configuration into a ready to use transport.

use governor::Quota;
use http::Uri;
use hyper::Client;
use snafu::{ResultExt, Snafu};

use super::client::{Config, Transport, auth::{self, Authenticator}};
use crate::{
    config::{ProxyConfig, TuningConfig},
    http::{HttpError, build_connector},
    internal_events::{TransportTuneError, TransportTuned},
    tls::{TlsError, TlsSettings},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TuneError {
    #[snafu(display("Invalid TLS configuration: {}", source))]
    Tls { source: TlsError },
    #[snafu(display("Unable to build connector: {}", source))]
    Connector { source: HttpError },
    #[snafu(display("Unable to wrap transport with credentials: {}", source))]
    InvalidAuth { source: auth::Error },
}

/// The result of tuning: the target host and the transport that carries
/// every TLS and credential setting. No raw credential field survives.
#[derive(Clone, Debug)]
pub struct TunedConfig {
    host: Uri,
    transport: Transport,
}

impl TunedConfig {
    pub const fn host(&self) -> &Uri {
        &self.host
    }

    pub const fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn into_transport(self) -> Transport {
        self.transport
    }
}

/// Applies rate limits, connection pooling, timeouts, TLS and credentials
/// to resolved configurations.
#[derive(Clone, Debug)]
pub struct TransportTuner {
    tuning: TuningConfig,
    proxy: ProxyConfig,
}

impl Default for TransportTuner {
    fn default() -> Self {
        Self::new(TuningConfig::default())
    }
}

impl TransportTuner {
    /// Proxies are taken from the process environment.
    pub fn new(tuning: TuningConfig) -> Self {
        Self {
            tuning,
            proxy: ProxyConfig::from_env(),
        }
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    pub const fn tuning(&self) -> &TuningConfig {
        &self.tuning
    }

    /// Consumes `config`. Its TLS material and credentials move into the
    /// transport, so nothing can apply them a second time.
    pub fn tune(&self, config: Config) -> Result<TunedConfig, TuneError> {
        let host = config.host.clone();
        self.build(config).inspect_err(|error| {
            emit!(TransportTuneError {
                host: &host,
                error,
            });
        })
    }

    fn build(&self, config: Config) -> Result<TunedConfig, TuneError> {
        let Config {
            host,
            tls,
            credentials,
        } = config;
        let tuning = &self.tuning;

        let quota = Quota::per_second(tuning.qps).allow_burst(tuning.burst);

        let tls = TlsSettings::from_client_config(&tls).context(TlsSnafu)?;
        let connector = build_connector(&tls, &self.proxy, tuning).context(ConnectorSnafu)?;
        let client = Client::builder()
            .pool_max_idle_per_host(tuning.idle_per_host())
            .pool_idle_timeout(tuning.idle_timeout)
            .build(connector);

        let authenticator = Authenticator::from_credentials(credentials, tuning.token_refresh_skew)
            .context(InvalidAuthSnafu)?;

        emit!(TransportTuned {
            host: &host,
            qps: tuning.qps.get(),
            burst: tuning.burst.get(),
            max_connections: tuning.max_connections_per_host.get(),
            auth: authenticator.scheme(),
        });

        let transport = Transport::new(
            host.clone(),
            client,
            authenticator,
            quota,
            tuning.max_connections_per_host,
        );
        Ok(TunedConfig { host, transport })
    }
}
