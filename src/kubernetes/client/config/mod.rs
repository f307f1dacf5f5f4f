//! The plain client configuration produced by credential resolution.

use std::fmt;

use http::Uri;

use super::auth::ExecConfig;
use crate::cluster::TlsClientConfig;

pub mod in_cluster;
pub mod kubeconfig;

/// Where and how to reach one API server, before any transport exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub host: Uri,
    pub tls: TlsClientConfig,
    pub credentials: Credentials,
}

/// Exactly one authentication source.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Basic and bearer fields. All empty means anonymous.
    Static {
        username: String,
        password: String,
        bearer_token: String,
    },
    /// Tokens come from an external plugin.
    Exec(ExecConfig),
}

impl Credentials {
    pub fn anonymous() -> Self {
        Self::Static {
            username: String::new(),
            password: String::new(),
            bearer_token: String::new(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Static {
            username: String::new(),
            password: String::new(),
            bearer_token: token.into(),
        }
    }

    pub const fn exec(&self) -> Option<&ExecConfig> {
        match self {
            Self::Exec(config) => Some(config),
            Self::Static { .. } => None,
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted = |value: &str| if value.is_empty() { "" } else { "**REDACTED**" };
        match self {
            Self::Static {
                username,
                password,
                bearer_token,
            } => f
                .debug_struct("Static")
                .field("username", username)
                .field("password", &redacted(password))
                .field("bearer_token", &redacted(bearer_token))
                .finish(),
            Self::Exec(config) => f.debug_tuple("Exec").field(config).finish(),
        }
    }
}
