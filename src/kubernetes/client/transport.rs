use std::{
    fmt,
    num::NonZeroUsize,
    sync::Arc,
    task::{Context, Poll},
};

use futures::future::BoxFuture;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use http::{HeaderValue, Request, Response, StatusCode, Uri, uri::PathAndQuery};
use hyper::{Body, Client};
use snafu::ResultExt;
use tokio::sync::Semaphore;
use tower::Service;
use tracing::Span;
use tracing_futures::Instrument;

use super::auth::Authenticator;
use crate::{
    http::{
        AuthorizeSnafu, BuildRequestSnafu, CallRequestSnafu, Connector, HttpError,
        default_request_headers,
    },
    internal_events::{AboutToSendHttpRequest, GotHttpError, GotHttpResponse},
};

/// A ready to use, authenticated HTTP transport bound to one API server.
///
/// Clones share the connection pool, the rate limiter, the connection
/// ceiling and the exec token cache.
#[derive(Clone)]
pub struct Transport {
    host: Uri,
    client: Client<Connector, Body>,
    authenticator: Authenticator,
    limiter: Arc<DefaultDirectRateLimiter>,
    connections: Arc<Semaphore>,
    user_agent: HeaderValue,
    span: Span,
}

impl Transport {
    pub(crate) fn new(
        host: Uri,
        client: Client<Connector, Body>,
        authenticator: Authenticator,
        quota: Quota,
        max_connections: NonZeroUsize,
    ) -> Self {
        let version = crate::get_version();
        let user_agent = HeaderValue::from_str(&format!("cluster-transport/{version}"))
            .unwrap_or_else(|_| HeaderValue::from_static("cluster-transport"));
        let span = info_span!("transport", host = %host);

        Self {
            host,
            client,
            authenticator,
            limiter: Arc::new(RateLimiter::direct(quota)),
            connections: Arc::new(Semaphore::new(max_connections.get())),
            user_agent,
            span,
        }
    }

    pub const fn host(&self) -> &Uri {
        &self.host
    }

    pub(crate) const fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    /// Sends `request`, waiting for the rate limiter and a free connection
    /// slot first. Requests with a relative URI go to the transport's host.
    pub fn send(
        &self,
        mut request: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, HttpError>> {
        let this = self.clone();
        let span = self.span.clone();

        let fut = async move {
            *request.uri_mut() = this.absolute_uri(request.uri())?;

            this.limiter.until_ready().await;
            // The semaphore lives as long as the transport and is never closed.
            let _permit = this.connections.clone().acquire_owned().await.ok();

            default_request_headers(&mut request, &this.user_agent);
            let token = this
                .authenticator
                .authorize(request.headers_mut())
                .await
                .context(AuthorizeSnafu)?;

            emit!(AboutToSendHttpRequest { request: &request });

            // Capture the time right before we issue the request.
            let before = std::time::Instant::now();
            let response_result = this.client.request(request).await;
            let roundtrip = before.elapsed();

            let response = response_result
                .map_err(|error| {
                    emit!(GotHttpError {
                        error: &error,
                        roundtrip
                    });
                    error
                })
                .context(CallRequestSnafu)?;

            emit!(GotHttpResponse {
                response: &response,
                roundtrip
            });

            if response.status() == StatusCode::UNAUTHORIZED
                && let Some(token) = token
            {
                this.authenticator.unauthorized(&token).await;
            }

            Ok(response)
        }
        .instrument(span);

        Box::pin(fut)
    }

    /// Joins relative request URIs onto the host, keeping any path prefix
    /// the host carries.
    fn absolute_uri(&self, uri: &Uri) -> Result<Uri, HttpError> {
        if uri.scheme().is_some() && uri.authority().is_some() {
            return Ok(uri.clone());
        }

        let prefix = self.host.path().trim_end_matches('/');
        let path_and_query = uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or("/");
        let separator = if path_and_query.starts_with('/') { "" } else { "/" };

        let mut parts = self.host.clone().into_parts();
        parts.path_and_query = Some(
            format!("{prefix}{separator}{path_and_query}")
                .parse()
                .map_err(http::Error::from)
                .context(BuildRequestSnafu)?,
        );
        Uri::from_parts(parts)
            .map_err(http::Error::from)
            .context(BuildRequestSnafu)
    }
}

impl Service<Request<Body>> for Transport {
    type Response = Response<Body>;
    type Error = HttpError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        self.send(request)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("host", &self.host)
            .field("authenticator", &self.authenticator)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}
