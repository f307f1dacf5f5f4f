//! Stored cluster records.
//!
//! These types mirror the serialized credential records kept by the external
//! cluster store. Field names are camelCase on the wire and byte blobs are
//! base64 strings.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{base64::Base64, serde_as};

use crate::kubernetes::{
    self, Config, Environment, ResolveError, TransportTuner, TunedConfig, TuningConfig,
};

/// Address the API server is reachable at from inside its own cluster.
pub const KUBERNETES_INTERNAL_API_SERVER_ADDR: &str = "https://kubernetes.default.svc";

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    Successful,
    Failed,
    /// Also covers empty and unrecognized values.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Information about a remote cluster's connection state.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    #[serde(default)]
    pub status: ConnectionStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "attemptedAt")]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCacheInfo {
    #[serde(default, skip_serializing_if = "is_zero")]
    pub resources_count: i64,
    #[serde(default, rename = "apisCount", skip_serializing_if = "is_zero")]
    pub apis_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_cache_sync_time: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    #[serde(default)]
    pub connection_state: ConnectionState,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_version: String,
    #[serde(default)]
    pub cache_info: ClusterCacheInfo,
    #[serde(default)]
    pub applications_count: i64,
}

/// A remote cluster and the credentials used to reach it.
///
/// Everything besides `server` and `config` is operational metadata owned by
/// the cluster store; resolution never reads or writes it.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Internal identifier of the stored record. Never serialized.
    #[serde(skip)]
    pub id: String,
    /// API server URL of the cluster.
    pub server: String,
    /// Display name. Defaults to the server address when empty.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: ClusterConfig,
    /// Superseded by `info.connection_state`.
    #[serde(default)]
    pub connection_state: ConnectionState,
    /// Superseded by `info.server_version`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_version: String,
    /// Namespaces accessible in the cluster. Cluster level resources are
    /// ignored when the list is not empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_requested_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub info: ClusterInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<i64>,
}

impl Cluster {
    /// The display name, falling back to the server address.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.server
        } else {
            &self.name
        }
    }

    pub fn is_in_cluster(&self) -> bool {
        self.server == KUBERNETES_INTERNAL_API_SERVER_ADDR
    }

    /// Resolves the plain client configuration using the process environment.
    pub async fn raw_rest_config(&self) -> Result<Config, ResolveError> {
        kubernetes::resolve(self, &Environment::from_env()).await
    }

    /// Resolves and tunes a ready to use transport with default tuning.
    pub async fn rest_config(&self) -> Result<TunedConfig, kubernetes::Error> {
        let config = self.raw_rest_config().await?;
        let tuned = TransportTuner::new(TuningConfig::default()).tune(config)?;
        Ok(tuned)
    }
}

/// Credential block of a cluster record.
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    /// Basic authentication.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,

    /// Bearer authentication. Refresh tokens are never used.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bearer_token: String,

    #[serde(default)]
    pub tls_client_config: TlsClientConfig,

    /// AWS IAM authentication through `aws eks get-token`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_auth_config: Option<AwsAuthConfig>,

    /// Authentication through an external credential plugin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec_provider_config: Option<ExecProviderConfig>,
}

impl ClusterConfig {
    pub fn has_static_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty() || !self.bearer_token.is_empty()
    }
}

impl fmt::Debug for ClusterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConfig")
            .field("username", &self.username)
            .field("password", &redacted(&self.password))
            .field("bearer_token", &redacted(&self.bearer_token))
            .field("tls_client_config", &self.tls_client_config)
            .field("aws_auth_config", &self.aws_auth_config)
            .field("exec_provider_config", &self.exec_provider_config)
            .finish()
    }
}

/// TLS settings of a cluster record. Certificate, key and CA are embedded
/// PEM (or DER) bytes, never file paths.
#[serde_as]
#[derive(Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TlsClientConfig {
    /// Skip server certificate verification. For testing only.
    #[serde(default)]
    pub insecure: bool,

    /// Name used for SNI and checked against the server certificate. The host
    /// being contacted is used when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub server_name: String,

    #[serde_as(as = "Base64")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cert_data: Vec<u8>,

    #[serde_as(as = "Base64")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_data: Vec<u8>,

    #[serde_as(as = "Base64")]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ca_data: Vec<u8>,
}

impl fmt::Debug for TlsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsClientConfig")
            .field("insecure", &self.insecure)
            .field("server_name", &self.server_name)
            .field("cert_data", &format_args!("[{} bytes]", self.cert_data.len()))
            .field("key_data", &redacted_bytes(&self.key_data))
            .field("ca_data", &format_args!("[{} bytes]", self.ca_data.len()))
            .finish()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AwsAuthConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,

    /// When set, the role is assumed instead of using the default AWS
    /// credential provider chain.
    #[serde(default, rename = "roleARN", skip_serializing_if = "String::is_empty")]
    pub role_arn: String,
}

/// External command invoked to authenticate against the cluster.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecProviderConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Additional environment variables exposed to the process.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Preferred `ExecCredential` API version.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    /// Shown when the executable can't be found.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub install_hint: String,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

fn redacted(value: &str) -> &'static str {
    if value.is_empty() { "" } else { "**REDACTED**" }
}

fn redacted_bytes(value: &[u8]) -> &'static str {
    if value.is_empty() { "[empty]" } else { "**REDACTED**" }
}
