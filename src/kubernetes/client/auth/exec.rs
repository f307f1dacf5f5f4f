//! Credential plugins.
//!
//! A plugin is an external command printing an `ExecCredential` object on
//! stdout. Issued tokens are cached until they are about to expire or the
//! API server rejects them.

use std::{collections::HashMap, fmt, io, process::Stdio, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use tokio::{process::Command, sync::RwLock, time::Instant};

use crate::internal_events::{ExecCredentialError, ExecCredentialFetched, ExecCredentialRejected};

/// Environment variable carrying the serialized request to the plugin.
pub const EXEC_INFO_ENV: &str = "KUBERNETES_EXEC_INFO";

/// `ExecCredential` version spoken by `aws eks get-token`.
pub const AWS_EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1alpha1";

/// Version announced to plugins configured without one.
const DEFAULT_EXEC_API_VERSION: &str = "client.authentication.k8s.io/v1beta1";

const EXEC_CREDENTIAL_KIND: &str = "ExecCredential";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExecError {
    #[snafu(display("Exec plugin has no command"))]
    MissingCommand,
    #[snafu(display("Exec plugin `{}` not found: {}{}", command, source, hint))]
    NotFound {
        command: String,
        hint: String,
        source: io::Error,
    },
    #[snafu(display("Failed to run exec plugin `{}`: {}", command, source))]
    Spawn { command: String, source: io::Error },
    #[snafu(display("Exec plugin `{}` exited with {}: {}", command, status, stderr))]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[snafu(display("Failed to encode exec plugin request: {}", source))]
    EncodeRequest { source: serde_json::Error },
    #[snafu(display("Exec plugin `{}` printed an invalid ExecCredential: {}", command, source))]
    Parse {
        command: String,
        source: serde_json::Error,
    },
    #[snafu(display("Exec plugin `{}` returned kind {:?}, expected ExecCredential", command, kind))]
    InvalidKind { command: String, kind: String },
    #[snafu(display(
        "Exec plugin `{}` returned apiVersion {:?}, expected {:?}",
        command,
        actual,
        expected
    ))]
    ApiVersionMismatch {
        command: String,
        expected: String,
        actual: String,
    },
    #[snafu(display("Exec plugin `{}` returned no token", command))]
    MissingToken { command: String },
}

/// One environment variable handed to a plugin.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ExecEnvVar {
    pub name: String,
    pub value: String,
}

impl fmt::Debug for ExecEnvVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecEnvVar")
            .field("name", &self.name)
            .field("value", &"**REDACTED**")
            .finish()
    }
}

/// How to run a credential plugin.
///
/// `env` is kept sorted by name, so two configs built from the same map
/// compare equal regardless of the map's iteration order.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<ExecEnvVar>,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub install_hint: String,
}

impl ExecConfig {
    pub fn build(
        command: impl Into<String>,
        args: Vec<String>,
        api_version: impl Into<String>,
        env: HashMap<String, String>,
    ) -> Self {
        let mut env: Vec<ExecEnvVar> = env
            .into_iter()
            .map(|(name, value)| ExecEnvVar { name, value })
            .collect();
        env.sort();
        Self {
            command: command.into(),
            args,
            env,
            api_version: api_version.into(),
            install_hint: String::new(),
        }
    }

    pub fn with_install_hint(mut self, install_hint: impl Into<String>) -> Self {
        self.install_hint = install_hint.into();
        self
    }

    /// `aws eks get-token` for the given cluster, assuming `role_arn` when
    /// it isn't empty.
    pub fn aws(cluster_name: &str, role_arn: &str) -> Self {
        let mut args = vec![
            "eks".to_owned(),
            "get-token".to_owned(),
            "--cluster-name".to_owned(),
            cluster_name.to_owned(),
        ];
        if !role_arn.is_empty() {
            args.push("--role-arn".to_owned());
            args.push(role_arn.to_owned());
        }
        Self::build("aws", args, AWS_EXEC_API_VERSION, HashMap::new())
    }

    fn request_api_version(&self) -> &str {
        if self.api_version.is_empty() {
            DEFAULT_EXEC_API_VERSION
        } else {
            &self.api_version
        }
    }

    fn exec_info(&self) -> Result<String, ExecError> {
        let request = ExecCredentialRequest {
            api_version: self.request_api_version(),
            kind: EXEC_CREDENTIAL_KIND,
            spec: ExecCredentialRequestSpec { interactive: false },
        };
        serde_json::to_string(&request).context(EncodeRequestSnafu)
    }

    /// Runs the plugin once and returns the token it printed.
    pub async fn fetch(&self) -> Result<ExecToken, ExecError> {
        if self.command.is_empty() {
            return Err(ExecError::MissingCommand);
        }

        let started = Instant::now();
        let output = Command::new(&self.command)
            .args(&self.args)
            .envs(self.env.iter().map(|var| (&var.name, &var.value)))
            .env(EXEC_INFO_ENV, self.exec_info()?)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;

        if !output.status.success() {
            return Err(ExecError::Failed {
                command: self.command.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }

        let token = self.parse(&output.stdout)?;
        emit!(ExecCredentialFetched {
            command: &self.command,
            expires_at: token.expires_at,
            elapsed: started.elapsed(),
        });
        Ok(token)
    }

    fn spawn_error(&self, source: io::Error) -> ExecError {
        let command = self.command.clone();
        if source.kind() == io::ErrorKind::NotFound {
            let hint = if self.install_hint.is_empty() {
                String::new()
            } else {
                format!("\n\n{}", self.install_hint)
            };
            ExecError::NotFound {
                command,
                hint,
                source,
            }
        } else {
            ExecError::Spawn { command, source }
        }
    }

    fn parse(&self, stdout: &[u8]) -> Result<ExecToken, ExecError> {
        let command = || self.command.clone();
        let credential: ExecCredential =
            serde_json::from_slice(stdout).context(ParseSnafu { command: command() })?;

        if credential.kind != EXEC_CREDENTIAL_KIND {
            return Err(ExecError::InvalidKind {
                command: command(),
                kind: credential.kind,
            });
        }
        if !self.api_version.is_empty() && credential.api_version != self.api_version {
            return Err(ExecError::ApiVersionMismatch {
                command: command(),
                expected: self.api_version.clone(),
                actual: credential.api_version,
            });
        }

        let status = credential.status.unwrap_or_default();
        match status.token {
            Some(token) if !token.is_empty() => Ok(ExecToken {
                token,
                expires_at: status.expiration_timestamp,
            }),
            _ => Err(ExecError::MissingToken { command: command() }),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialRequest<'a> {
    api_version: &'a str,
    kind: &'static str,
    spec: ExecCredentialRequestSpec,
}

#[derive(Serialize)]
struct ExecCredentialRequestSpec {
    interactive: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredential {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
    #[serde(default)]
    status: Option<ExecCredentialStatus>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecCredentialStatus {
    #[serde(default)]
    expiration_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    token: Option<String>,
}

/// A token issued by a plugin.
#[derive(Clone, PartialEq, Eq)]
pub struct ExecToken {
    pub token: String,
    /// Tokens without an expiration are valid until rejected.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ExecToken {
    fn is_fresh(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        match self.expires_at {
            None => true,
            // A skew past the representable range makes every token stale.
            Some(expires_at) => chrono::Duration::from_std(skew)
                .ok()
                .and_then(|skew| now.checked_add_signed(skew))
                .is_some_and(|deadline| deadline < expires_at),
        }
    }
}

impl fmt::Debug for ExecToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecToken")
            .field("token", &"**REDACTED**")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum TokenState {
    Unfetched,
    Valid(ExecToken),
    Expired,
}

impl TokenState {
    fn usable(&self, now: DateTime<Utc>, skew: Duration) -> Option<&ExecToken> {
        match self {
            TokenState::Valid(token) if token.is_fresh(now, skew) => Some(token),
            _ => None,
        }
    }

    /// Marks `token` as rejected. A newer token already in place is kept.
    fn reject(&mut self, token: &str) -> bool {
        match self {
            TokenState::Valid(current) if current.token == token => {
                *self = TokenState::Expired;
                true
            }
            _ => false,
        }
    }
}

/// Caches the token of one plugin. Refreshes hold the write lock, so
/// concurrent requests share a single plugin run.
pub struct ExecAuthenticator {
    config: ExecConfig,
    refresh_skew: Duration,
    state: RwLock<TokenState>,
}

impl ExecAuthenticator {
    pub fn new(config: ExecConfig, refresh_skew: Duration) -> Self {
        Self {
            config,
            refresh_skew,
            state: RwLock::new(TokenState::Unfetched),
        }
    }

    pub const fn config(&self) -> &ExecConfig {
        &self.config
    }

    /// Returns a usable token, running the plugin when none is cached or the
    /// cached one is about to expire.
    pub async fn token(&self) -> Result<String, ExecError> {
        if let Some(token) = self.state.read().await.usable(Utc::now(), self.refresh_skew) {
            return Ok(token.token.clone());
        }

        let mut state = self.state.write().await;
        if let Some(token) = state.usable(Utc::now(), self.refresh_skew) {
            return Ok(token.token.clone());
        }
        if matches!(*state, TokenState::Valid(_)) {
            *state = TokenState::Expired;
        }

        match self.config.fetch().await {
            Ok(token) => {
                let value = token.token.clone();
                *state = TokenState::Valid(token);
                Ok(value)
            }
            Err(error) => {
                emit!(ExecCredentialError {
                    command: &self.config.command,
                    error: &error,
                });
                Err(error)
            }
        }
    }

    /// Forgets `token` after the API server answered 401 to it.
    pub async fn reject(&self, token: &str) {
        if self.state.write().await.reject(token) {
            emit!(ExecCredentialRejected {
                command: &self.config.command,
            });
        }
    }

    #[cfg(test)]
    async fn state(&self) -> TokenState {
        self.state.read().await.clone()
    }
}

impl fmt::Debug for ExecAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecAuthenticator")
            .field("command", &self.config.command)
            .field("refresh_skew", &self.refresh_skew)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use similar_asserts::assert_eq;

    use super::*;

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    fn plugin(script: &str) -> ExecConfig {
        ExecConfig::build(
            "sh",
            vec!["-c".to_owned(), script.to_owned()],
            "client.authentication.k8s.io/v1beta1",
            HashMap::new(),
        )
    }

    fn credential(token: &str, expires_at: Option<DateTime<Utc>>) -> String {
        let mut status = serde_json::json!({ "token": token });
        if let Some(expires_at) = expires_at {
            status["expirationTimestamp"] = expires_at.to_rfc3339().into();
        }
        serde_json::json!({
            "apiVersion": "client.authentication.k8s.io/v1beta1",
            "kind": "ExecCredential",
            "status": status,
        })
        .to_string()
    }

    #[test]
    fn env_order_does_not_matter() {
        let a = ExecConfig::build(
            "plugin",
            vec![],
            "v1",
            env(&[("A", "1"), ("B", "2"), ("C", "3")]),
        );
        let b = ExecConfig::build(
            "plugin",
            vec![],
            "v1",
            env(&[("C", "3"), ("A", "1"), ("B", "2")]),
        );
        assert_eq!(a, b);
        assert_eq!(a.env[0].name, "A");
    }

    #[test]
    fn aws_args() {
        let config = ExecConfig::aws("prod", "");
        assert_eq!(config.command, "aws");
        assert_eq!(
            config.args,
            vec!["eks", "get-token", "--cluster-name", "prod"]
        );
        assert_eq!(config.api_version, AWS_EXEC_API_VERSION);
        assert!(config.env.is_empty());

        let config = ExecConfig::aws("prod", "arn:aws:iam::1:role/x");
        assert_eq!(
            config.args,
            vec![
                "eks",
                "get-token",
                "--cluster-name",
                "prod",
                "--role-arn",
                "arn:aws:iam::1:role/x"
            ]
        );
    }

    #[test]
    fn exec_info_is_non_interactive() {
        let info: serde_json::Value =
            serde_json::from_str(&ExecConfig::aws("prod", "").exec_info().unwrap()).unwrap();
        assert_eq!(
            info,
            serde_json::json!({
                "apiVersion": AWS_EXEC_API_VERSION,
                "kind": "ExecCredential",
                "spec": { "interactive": false },
            })
        );

        let info: serde_json::Value =
            serde_json::from_str(&ExecConfig::default().exec_info().unwrap()).unwrap();
        assert_eq!(info["apiVersion"], DEFAULT_EXEC_API_VERSION);
    }

    #[test]
    fn parses_credential() {
        let config = plugin("");
        let token = config
            .parse(
                indoc! {r#"
                    {
                        "apiVersion": "client.authentication.k8s.io/v1beta1",
                        "kind": "ExecCredential",
                        "status": {
                            "token": "k8s-aws-v1.abc",
                            "expirationTimestamp": "2030-01-01T00:00:00Z"
                        }
                    }
                "#}
                .as_bytes(),
            )
            .unwrap();

        assert_eq!(token.token, "k8s-aws-v1.abc");
        assert_eq!(
            token.expires_at,
            Some("2030-01-01T00:00:00Z".parse().unwrap())
        );
    }

    #[test]
    fn rejects_bad_credentials() {
        let config = plugin("");

        let error = config.parse(b"not json").unwrap_err();
        assert!(matches!(error, ExecError::Parse { .. }));

        let error = config
            .parse(br#"{"apiVersion": "client.authentication.k8s.io/v1beta1", "kind": "Pod", "status": {"token": "x"}}"#)
            .unwrap_err();
        assert!(matches!(error, ExecError::InvalidKind { .. }));

        let error = config
            .parse(br#"{"apiVersion": "client.authentication.k8s.io/v1", "kind": "ExecCredential", "status": {"token": "x"}}"#)
            .unwrap_err();
        assert!(matches!(error, ExecError::ApiVersionMismatch { .. }));

        let error = config
            .parse(br#"{"apiVersion": "client.authentication.k8s.io/v1beta1", "kind": "ExecCredential", "status": {}}"#)
            .unwrap_err();
        assert!(matches!(error, ExecError::MissingToken { .. }));
    }

    #[test]
    fn freshness_respects_skew() {
        let now = Utc::now();
        let skew = Duration::from_secs(10);
        let token = |expires_at| ExecToken {
            token: "t".into(),
            expires_at,
        };

        assert!(token(None).is_fresh(now, skew));
        assert!(token(Some(now + chrono::Duration::seconds(60))).is_fresh(now, skew));
        assert!(!token(Some(now + chrono::Duration::seconds(5))).is_fresh(now, skew));
        assert!(!token(Some(now - chrono::Duration::seconds(1))).is_fresh(now, skew));
    }

    #[test]
    fn huge_skew_makes_tokens_stale() {
        let now = Utc::now();
        let expiring = ExecToken {
            token: "abc".into(),
            expires_at: Some(now + chrono::Duration::seconds(60)),
        };

        // Roughly 280,000 years, past the last representable date.
        assert!(!expiring.is_fresh(now, Duration::from_secs(1 << 43)));
        assert!(!expiring.is_fresh(now, Duration::MAX));
    }

    #[test]
    fn reject_only_expires_matching_token() {
        let mut state = TokenState::Valid(ExecToken {
            token: "new".into(),
            expires_at: None,
        });
        assert!(!state.reject("old"));
        assert!(matches!(state, TokenState::Valid(_)));

        assert!(state.reject("new"));
        assert_eq!(state, TokenState::Expired);
        assert!(!state.reject("new"));

        let mut unfetched = TokenState::Unfetched;
        assert!(!unfetched.reject("new"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runs_plugin_with_env() {
        let mut config = plugin(
            r#"printf '{"apiVersion":"client.authentication.k8s.io/v1beta1","kind":"ExecCredential","status":{"token":"%s"}}' "$TOKEN""#,
        );
        config.env = vec![ExecEnvVar {
            name: "TOKEN".into(),
            value: "from-env".into(),
        }];

        let token = config.fetch().await.unwrap();
        assert_eq!(token.token, "from-env");
        assert_eq!(token.expires_at, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn passes_exec_info() {
        let config = plugin(
            r#"case "$KUBERNETES_EXEC_INFO" in *'"interactive":false'*) t=ok;; *) t=missing;; esac; printf '{"apiVersion":"client.authentication.k8s.io/v1beta1","kind":"ExecCredential","status":{"token":"%s"}}' "$t""#,
        );

        assert_eq!(config.fetch().await.unwrap().token, "ok");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_plugin_reports_stderr() {
        let config = plugin("echo 'no credentials configured' >&2; exit 3");

        let error = config.fetch().await.unwrap_err();
        assert!(matches!(error, ExecError::Failed { .. }));
        assert!(error.to_string().contains("no credentials configured"));
    }

    #[tokio::test]
    async fn missing_plugin_shows_install_hint() {
        let config = ExecConfig::build(
            "definitely-not-an-installed-plugin",
            vec![],
            "",
            HashMap::new(),
        )
        .with_install_hint("Install it from your package manager.");

        let error = config.fetch().await.unwrap_err();
        assert!(matches!(error, ExecError::NotFound { .. }));
        assert!(
            error
                .to_string()
                .contains("Install it from your package manager.")
        );
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let error = ExecConfig::default().fetch().await.unwrap_err();
        assert!(matches!(error, ExecError::MissingCommand));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn caches_until_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let script = format!(
            r#"echo run >> '{}'; printf '{}'"#,
            counter.display(),
            credential("cached", None)
        );
        let auth = ExecAuthenticator::new(plugin(&script), Duration::from_secs(10));
        let runs = || std::fs::read_to_string(&counter).unwrap().lines().count();

        assert_eq!(auth.state().await, TokenState::Unfetched);
        assert_eq!(auth.token().await.unwrap(), "cached");
        assert_eq!(auth.token().await.unwrap(), "cached");
        assert_eq!(runs(), 1);
        assert!(matches!(auth.state().await, TokenState::Valid(_)));

        auth.reject("cached").await;
        assert_eq!(auth.state().await, TokenState::Expired);

        assert_eq!(auth.token().await.unwrap(), "cached");
        assert_eq!(runs(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn refreshes_tokens_close_to_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("runs");
        let expires_at = Utc::now() + chrono::Duration::seconds(5);
        let script = format!(
            r#"echo run >> '{}'; printf '{}'"#,
            counter.display(),
            credential("short-lived", Some(expires_at))
        );
        let auth = ExecAuthenticator::new(plugin(&script), Duration::from_secs(10));

        auth.token().await.unwrap();
        auth.token().await.unwrap();
        let runs = std::fs::read_to_string(&counter).unwrap().lines().count();
        assert_eq!(runs, 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_refresh_keeps_no_token() {
        let auth = ExecAuthenticator::new(plugin("exit 1"), Duration::from_secs(10));

        assert!(auth.token().await.is_err());
        assert_eq!(auth.state().await, TokenState::Unfetched);
    }
}
