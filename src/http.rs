use std::{
    fmt,
    task::{Context, Poll},
    time::Duration,
};

use futures::future::BoxFuture;
use headers::{Authorization, authorization::Credentials};
use http::{HeaderValue, Request, Uri, uri::InvalidUri};
use hyper::client::HttpConnector;
use hyper_openssl::HttpsConnector;
use hyper_proxy::ProxyConnector;
use snafu::{ResultExt, Snafu};
use tokio::time::error::Elapsed;
use tower::Service;

use crate::{
    config::{ProxyConfig, TuningConfig},
    kubernetes::client::auth::ExecError,
    tls::{TlsError, TlsSettings, tls_connector_builder},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HttpError {
    #[snafu(display("Failed to build TLS connector: {}", source))]
    BuildTlsConnector { source: TlsError },
    #[snafu(display("Failed to build HTTPS connector: {}", source))]
    MakeHttpsConnector { source: openssl::error::ErrorStack },
    #[snafu(display("Failed to parse proxy URI: {}", source))]
    MakeProxyUri { source: InvalidUri },
    #[snafu(display("Connection not established within {:?}", timeout))]
    ConnectTimeout { timeout: Duration, source: Elapsed },
    #[snafu(display("Failed to build request against the API server: {}", source))]
    BuildRequest { source: http::Error },
    #[snafu(display("Failed to obtain credentials for request: {}", source))]
    Authorize { source: ExecError },
    #[snafu(display("Failed to make HTTP(S) request: {}", source))]
    CallRequest { source: hyper::Error },
}

/// Connector stack used by cluster transports: TCP, an optional proxy
/// tunnel, then TLS, all bounded by one connect timeout.
pub type Connector = TimeoutConnector<HttpsConnector<ProxyConnector<HttpConnector>>>;

pub fn build_proxy_connector(
    proxy_config: &ProxyConfig,
    tuning: &TuningConfig,
) -> Result<ProxyConnector<HttpConnector>, HttpError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(tuning.dial_timeout));
    http.set_keepalive(Some(tuning.keep_alive));

    // TLS is negotiated above the tunnel, not by the proxy connector, so
    // tunnelled connections get the same server name handling as direct ones.
    let mut proxy = ProxyConnector::unsecured(http);
    proxy_config
        .configure(&mut proxy)
        .context(MakeProxyUriSnafu)?;
    Ok(proxy)
}

pub fn build_tls_connector(
    tls_settings: &TlsSettings,
    proxy_config: &ProxyConfig,
    tuning: &TuningConfig,
) -> Result<HttpsConnector<ProxyConnector<HttpConnector>>, HttpError> {
    let proxy = build_proxy_connector(proxy_config, tuning)?;
    let tls = tls_connector_builder(tls_settings).context(BuildTlsConnectorSnafu)?;
    let mut https = HttpsConnector::with_connector(proxy, tls).context(MakeHttpsConnectorSnafu)?;

    let settings = tls_settings.clone();
    https.set_callback(move |c, _uri| settings.apply_connect_configuration(c));

    Ok(https)
}

pub fn build_connector(
    tls_settings: &TlsSettings,
    proxy_config: &ProxyConfig,
    tuning: &TuningConfig,
) -> Result<Connector, HttpError> {
    let https = build_tls_connector(tls_settings, proxy_config, tuning)?;
    Ok(TimeoutConnector::new(https, tuning.connect_timeout()))
}

/// Bounds the whole connect phase of the wrapped connector, including the
/// TLS handshake, which `HttpConnector` alone doesn't cover.
#[derive(Clone)]
pub struct TimeoutConnector<C> {
    inner: C,
    timeout: Duration,
}

impl<C> TimeoutConnector<C> {
    pub const fn new(inner: C, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl<C> Service<Uri> for TimeoutConnector<C>
where
    C: Service<Uri>,
    C::Response: Send + 'static,
    C::Error: Into<crate::Error>,
    C::Future: Send + 'static,
{
    type Response = C::Response;
    type Error = crate::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let timeout = self.timeout;
        let connecting = self.inner.call(uri);
        Box::pin(async move {
            match tokio::time::timeout(timeout, connecting).await {
                Ok(result) => result.map_err(Into::into),
                Err(elapsed) => Err(HttpError::ConnectTimeout {
                    timeout,
                    source: elapsed,
                }
                .into()),
            }
        })
    }
}

pub fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key("User-Agent") {
        request
            .headers_mut()
            .insert("User-Agent", user_agent.clone());
    }

    if !request.headers().contains_key("Accept-Encoding") {
        // Response bodies are handed to callers untouched.
        request
            .headers_mut()
            .insert("Accept-Encoding", HeaderValue::from_static("identity"));
    }
}

#[derive(Debug, Snafu)]
pub enum AuthError {
    #[snafu(display("Username/password or bearer token may be set, but not both"))]
    ConflictingCredentials,
    #[snafu(display("Invalid bearer token: {}", source))]
    InvalidBearerToken {
        source: headers::authorization::InvalidBearerToken,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Basic { user: String, password: String },
    Bearer { token: String },
}

pub trait MaybeAuth: Sized {
    fn choose_one(&self, other: &Self) -> Result<Self, AuthError>;
}

impl MaybeAuth for Option<Auth> {
    fn choose_one(&self, other: &Self) -> Result<Self, AuthError> {
        if self.is_some() && other.is_some() {
            Err(AuthError::ConflictingCredentials)
        } else {
            Ok(self.clone().or_else(|| other.clone()))
        }
    }
}

impl Auth {
    /// Picks the static scheme described by the given fields. Basic needs a
    /// username; a password on its own is ignored.
    pub fn from_parts(user: &str, password: &str, token: &str) -> Result<Option<Self>, AuthError> {
        let basic = (!user.is_empty()).then(|| Self::Basic {
            user: user.to_owned(),
            password: password.to_owned(),
        });
        let bearer = (!token.is_empty()).then(|| Self::Bearer {
            token: token.to_owned(),
        });
        basic.choose_one(&bearer)
    }

    pub fn bearer(token: &str) -> Result<HeaderValue, AuthError> {
        let mut value = Authorization::bearer(token)
            .context(InvalidBearerTokenSnafu)?
            .0
            .encode();
        value.set_sensitive(true);
        Ok(value)
    }

    /// Encoded `Authorization` header value, marked sensitive.
    pub fn header_value(&self) -> Result<HeaderValue, AuthError> {
        match self {
            Auth::Basic { user, password } => {
                let mut value = Authorization::basic(user, password).0.encode();
                value.set_sensitive(true);
                Ok(value)
            }
            Auth::Bearer { token } => Self::bearer(token),
        }
    }

    pub const fn scheme(&self) -> &'static str {
        match self {
            Auth::Basic { .. } => "basic",
            Auth::Bearer { .. } => "bearer",
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"**REDACTED**")
                .finish(),
            Auth::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"**REDACTED**")
                .finish(),
        }
    }
}
