//! Everything related to building in-cluster configuration.

use std::path::PathBuf;

use http::Uri;
use snafu::{OptionExt, ResultExt, Snafu};

use super::{Config, Credentials};
use crate::{cluster::TlsClientConfig, kubernetes::Environment};

impl Config {
    /// Prepares a config suitable for use when running in k8s cluster.
    pub fn in_cluster() -> Result<Self, Error> {
        Self::in_cluster_from(&Environment::from_env())
    }

    /// Like [`Config::in_cluster`], reading the service address and the
    /// service account files through `env`.
    pub fn in_cluster_from(env: &Environment) -> Result<Self, Error> {
        let host = env.service_host.as_deref().context(NotInClusterSnafu {
            missing: "KUBERNETES_SERVICE_HOST",
        })?;
        let port = env.service_port.as_deref().context(NotInClusterSnafu {
            missing: "KUBERNETES_SERVICE_PORT",
        })?;

        let host = Uri::builder()
            .scheme("https")
            .authority(join_host_port(host, port).as_str())
            .path_and_query("/")
            .build()
            .context(InvalidUrlSnafu)?;

        let token_file = env.service_account_dir.join("token");
        let root_ca_file = env.service_account_dir.join("ca.crt");

        let token = std::fs::read_to_string(&token_file).context(TokenSnafu { path: token_file })?;
        let ca_data = std::fs::read(&root_ca_file).context(RootCaSnafu { path: root_ca_file })?;

        Ok(Self {
            host,
            tls: TlsClientConfig {
                ca_data,
                ..Default::default()
            },
            credentials: Credentials::bearer(token.trim()),
        })
    }
}

/// An error returned when building an in-cluster configuration.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The in-cluster configuration requested while executing not in a cluster
    /// environment.
    #[snafu(display(
        "unable to load in-cluster configuration, KUBERNETES_SERVICE_HOST and KUBERNETES_SERVICE_PORT must be defined"
    ))]
    NotInCluster {
        /// The variable that's missing.
        missing: &'static str,
    },

    /// The token file could not be read successfully.
    #[snafu(display("unable to read the token file {}: {}", path.display(), source))]
    Token {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The root certificate file could not be read successfully.
    #[snafu(display("unable to read the root CA file {}: {}", path.display(), source))]
    RootCa {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The configuration resulted in an invalid URL.
    #[snafu(display("unable to construct a proper API server URL"))]
    InvalidUrl {
        /// The underlying error.
        source: http::Error,
    },
}

/// This function implements the exact same logic that Go's `net.JoinHostPort`
/// has.
///
/// Service addresses handed to pods may be IPv6 literals, which need
/// brackets before a port can be appended.
fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        // If IPv6 address is used, use a special notation.
        return format!("[{host}]:{port}");
    }
    // Use traditional notation for domain names and IPv4 addresses.
    format!("{host}:{port}")
}
