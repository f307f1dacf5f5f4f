//! Request authentication for cluster transports.

use std::{sync::Arc, time::Duration};

use http::{HeaderMap, HeaderValue, header::AUTHORIZATION};
use snafu::{ResultExt, Snafu};

use super::config::Credentials;
use crate::http::{Auth, AuthError};

pub mod exec;

pub use exec::{ExecAuthenticator, ExecConfig, ExecEnvVar, ExecError, ExecToken};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid static credentials: {}", source))]
    InvalidStatic { source: AuthError },
    #[snafu(display("Exec plugin has no command"))]
    InvalidExec,
}

/// Produces the `Authorization` header of outgoing requests.
#[derive(Clone, Debug)]
pub enum Authenticator {
    None,
    Static { scheme: &'static str, value: HeaderValue },
    Exec(Arc<ExecAuthenticator>),
}

impl Authenticator {
    pub fn from_credentials(credentials: Credentials, refresh_skew: Duration) -> Result<Self, Error> {
        match credentials {
            Credentials::Static {
                username,
                password,
                bearer_token,
            } => match Auth::from_parts(&username, &password, &bearer_token)
                .context(InvalidStaticSnafu)?
            {
                None => Ok(Self::None),
                Some(auth) => Ok(Self::Static {
                    scheme: auth.scheme(),
                    value: auth.header_value().context(InvalidStaticSnafu)?,
                }),
            },
            Credentials::Exec(config) => {
                if config.command.is_empty() {
                    return Err(Error::InvalidExec);
                }
                Ok(Self::Exec(Arc::new(ExecAuthenticator::new(
                    config,
                    refresh_skew,
                ))))
            }
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Static { scheme, .. } => *scheme,
            Self::Exec(_) => "exec",
        }
    }

    /// Adds credentials unless the request already carries an
    /// `Authorization` header. Returns the plugin token that was used, if
    /// any, so a rejection can be reported back.
    pub async fn authorize(&self, headers: &mut HeaderMap) -> Result<Option<String>, ExecError> {
        if headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }
        match self {
            Self::None => Ok(None),
            Self::Static { value, .. } => {
                headers.insert(AUTHORIZATION, value.clone());
                Ok(None)
            }
            Self::Exec(exec) => {
                let token = exec.token().await?;
                // Plugins emitting tokens that aren't valid header values are
                // treated like plugins emitting no token.
                let value = Auth::bearer(&token).map_err(|_| ExecError::MissingToken {
                    command: exec.config().command.clone(),
                })?;
                headers.insert(AUTHORIZATION, value);
                Ok(Some(token))
            }
        }
    }

    /// Reports that the API server answered 401 to a request sent with
    /// `token`.
    pub async fn unauthorized(&self, token: &str) {
        if let Self::Exec(exec) = self {
            exec.reject(token).await;
        }
    }
}
