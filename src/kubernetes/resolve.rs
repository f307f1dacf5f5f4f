//! Choosing how to authenticate against a cluster.

use std::path::PathBuf;

use http::{Uri, uri::InvalidUri};
use snafu::{ResultExt, Snafu};

use super::{
    Environment,
    client::{
        auth::ExecConfig,
        config::{Config, Credentials, in_cluster, kubeconfig},
    },
};
use crate::{
    cluster::{AwsAuthConfig, Cluster, ExecProviderConfig},
    internal_events::{CredentialResolutionError, CredentialStrategySelected},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ResolveError {
    #[snafu(display("Unable to load kubeconfig {}: {}", path.display(), source))]
    KubeConfig {
        path: PathBuf,
        source: kubeconfig::Error,
    },
    #[snafu(display("Unable to load in-cluster configuration: {}", source))]
    InCluster { source: in_cluster::Error },
    #[snafu(display("Invalid server URL {:?}: {}", server, source))]
    InvalidServerUrl { server: String, source: InvalidUri },
}

impl ResolveError {
    /// Whether the failure comes from the local environment rather than
    /// from the stored record.
    pub const fn is_environment_unavailable(&self) -> bool {
        matches!(self, Self::KubeConfig { .. } | Self::InCluster { .. })
    }
}

/// The authentication strategy picked for a cluster. Exactly one applies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// The in-cluster address while the fake flag is set, read from a
    /// kubeconfig file.
    KubeConfigFile(PathBuf),
    /// The in-cluster address without stored credentials.
    InCluster,
    AwsIam(AwsAuthConfig),
    GenericExec(ExecProviderConfig),
    /// Basic, bearer or no authentication from the stored fields.
    Static,
}

impl Strategy {
    /// First match wins: fake in-cluster, real in-cluster, AWS, exec,
    /// static.
    pub fn select(cluster: &Cluster, env: &Environment) -> Self {
        if cluster.is_in_cluster() {
            if env.fake_in_cluster {
                return Self::KubeConfigFile(env.kubeconfig_path());
            }
            if !cluster.config.has_static_credentials() {
                return Self::InCluster;
            }
        }
        if let Some(aws) = &cluster.config.aws_auth_config {
            return Self::AwsIam(aws.clone());
        }
        if let Some(exec) = &cluster.config.exec_provider_config {
            return Self::GenericExec(exec.clone());
        }
        Self::Static
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::KubeConfigFile(_) => "kubeconfig",
            Self::InCluster => "in_cluster",
            Self::AwsIam(_) => "aws_iam",
            Self::GenericExec(_) => "exec",
            Self::Static => "static",
        }
    }

    async fn resolve(self, cluster: &Cluster, env: &Environment) -> Result<Config, ResolveError> {
        let credentials = match self {
            Self::KubeConfigFile(path) => {
                return Config::from_kubeconfig_file(&path)
                    .await
                    .context(KubeConfigSnafu { path });
            }
            Self::InCluster => return Config::in_cluster_from(env).context(InClusterSnafu),
            Self::AwsIam(aws) => Credentials::Exec(ExecConfig::aws(&aws.cluster_name, &aws.role_arn)),
            Self::GenericExec(exec) => Credentials::Exec(
                ExecConfig::build(exec.command, exec.args, exec.api_version, exec.env)
                    .with_install_hint(exec.install_hint),
            ),
            Self::Static => Credentials::Static {
                username: cluster.config.username.clone(),
                password: cluster.config.password.clone(),
                bearer_token: cluster.config.bearer_token.clone(),
            },
        };

        let host = cluster
            .server
            .parse::<Uri>()
            .context(InvalidServerUrlSnafu {
                server: cluster.server.clone(),
            })?;

        Ok(Config {
            host,
            tls: cluster.config.tls_client_config.clone(),
            credentials,
        })
    }
}

/// Produces the plain client configuration of `cluster`. Never touches the
/// network; may read local files when the cluster is the in-cluster address.
pub async fn resolve(cluster: &Cluster, env: &Environment) -> Result<Config, ResolveError> {
    let strategy = Strategy::select(cluster, env);
    let name = strategy.name();
    emit!(CredentialStrategySelected {
        cluster: cluster.display_name(),
        strategy: name,
    });

    strategy.resolve(cluster, env).await.inspect_err(|error| {
        emit!(CredentialResolutionError {
            cluster: cluster.display_name(),
            strategy: name,
            error,
        });
    })
}
