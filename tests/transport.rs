use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use cluster_transport::{
    Cluster,
    cluster::{ClusterConfig, ExecProviderConfig},
    config::ProxyConfig,
    kubernetes::{self, Environment, Transport, TransportTuner},
};
use http::{Request, Response, StatusCode, header::AUTHORIZATION};
use hyper::{
    Body, Server,
    service::{make_service_fn, service_fn},
};
use tower::{Service, ServiceExt};

/// Starts a server answering every request with `handler`.
fn serve<F>(handler: F) -> SocketAddr
where
    F: Fn(Request<Body>) -> Response<Body> + Clone + Send + Sync + 'static,
{
    let make = make_service_fn(move |_| {
        let handler = handler.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler(request)) }
            }))
        }
    });
    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

/// Echoes the request path and `Authorization` header.
fn echo(request: Request<Body>) -> Response<Body> {
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_owned();
    let path = request
        .uri()
        .path_and_query()
        .map(|path| path.as_str().to_owned())
        .unwrap_or_default();
    Response::new(Body::from(format!("{path}|{authorization}")))
}

async fn transport(addr: SocketAddr, config: ClusterConfig) -> Transport {
    let cluster = Cluster {
        server: format!("http://{addr}"),
        config,
        ..Default::default()
    };
    let config = kubernetes::resolve(&cluster, &Environment::default())
        .await
        .unwrap();
    TransportTuner::default()
        .with_proxy(ProxyConfig::disabled())
        .tune(config)
        .unwrap()
        .into_transport()
}

async fn get(transport: &Transport, uri: &str) -> (StatusCode, String) {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    let response = transport.send(request).await.unwrap();
    let status = response.status();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn injects_bearer_token() {
    let addr = serve(echo);
    let transport = transport(
        addr,
        ClusterConfig {
            bearer_token: "abc".into(),
            ..Default::default()
        },
    )
    .await;

    let (status, body) = get(&transport, "/api/v1/namespaces").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "/api/v1/namespaces|Bearer abc");
}

#[tokio::test]
async fn injects_basic_credentials() {
    let addr = serve(echo);
    let transport = transport(
        addr,
        ClusterConfig {
            username: "admin".into(),
            password: "secret".into(),
            ..Default::default()
        },
    )
    .await;

    let (_, body) = get(&transport, &format!("http://{addr}/version")).await;
    assert_eq!(body, "/version|Basic YWRtaW46c2VjcmV0");
}

#[tokio::test]
async fn anonymous_sends_no_authorization() {
    let addr = serve(echo);
    let transport = transport(addr, ClusterConfig::default()).await;

    let (_, body) = get(&transport, "/healthz?verbose").await;
    assert_eq!(body, "/healthz?verbose|");
}

#[tokio::test]
async fn keeps_caller_authorization() {
    let addr = serve(echo);
    let mut transport = transport(
        addr,
        ClusterConfig {
            bearer_token: "abc".into(),
            ..Default::default()
        },
    )
    .await;

    let request = Request::get("/version")
        .header(AUTHORIZATION, "Bearer impersonated")
        .body(Body::empty())
        .unwrap();
    let response = transport.ready().await.unwrap().call(request).await.unwrap();
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    assert_eq!(&body[..], b"/version|Bearer impersonated");
}

#[tokio::test]
async fn clones_share_the_pool() {
    let addr = serve(echo);
    let transport = transport(
        addr,
        ClusterConfig {
            bearer_token: "abc".into(),
            ..Default::default()
        },
    )
    .await;

    let requests = (0..20).map(|i| {
        let transport = transport.clone();
        async move { get(&transport, &format!("/item/{i}")).await }
    });
    let responses = futures::future::join_all(requests).await;

    for (i, (status, body)) in responses.into_iter().enumerate() {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, format!("/item/{i}|Bearer abc"));
    }
}

#[cfg(unix)]
#[tokio::test]
async fn refreshes_exec_token_after_unauthorized() {
    let dir = tempfile::tempdir().unwrap();
    let runs = dir.path().join("runs");
    let script = format!(
        r#"echo run >> '{}'; n=$(wc -l < '{}' | tr -d ' '); printf '{{"apiVersion":"client.authentication.k8s.io/v1beta1","kind":"ExecCredential","status":{{"token":"token-%s"}}}}' "$n""#,
        runs.display(),
        runs.display(),
    );

    // Only the second token issued by the plugin is accepted.
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = serve({
        let hits = Arc::clone(&hits);
        move |request: Request<Body>| {
            hits.fetch_add(1, Ordering::SeqCst);
            let accepted = request
                .headers()
                .get(AUTHORIZATION)
                .is_some_and(|value| value == "Bearer token-2");
            let status = if accepted {
                StatusCode::OK
            } else {
                StatusCode::UNAUTHORIZED
            };
            Response::builder()
                .status(status)
                .body(Body::empty())
                .unwrap()
        }
    });
    let transport = transport(
        addr,
        ClusterConfig {
            exec_provider_config: Some(ExecProviderConfig {
                command: "sh".into(),
                args: vec!["-c".into(), script],
                api_version: "client.authentication.k8s.io/v1beta1".into(),
                ..Default::default()
            }),
            ..Default::default()
        },
    )
    .await;
    let plugin_runs = || std::fs::read_to_string(&runs).unwrap().lines().count();

    let (status, _) = get(&transport, "/api").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(plugin_runs(), 1);

    let (status, _) = get(&transport, "/api").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plugin_runs(), 2);

    let (status, _) = get(&transport, "/api").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plugin_runs(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[cfg(unix)]
#[tokio::test]
async fn exec_failure_surfaces_as_error() {
    let addr = serve(echo);
    let transport = transport(
        addr,
        ClusterConfig {
            exec_provider_config: Some(ExecProviderConfig {
                command: "sh".into(),
                args: vec!["-c".into(), "echo 'token expired, run login' >&2; exit 1".into()],
                ..Default::default()
            }),
            ..Default::default()
        },
    )
    .await;

    let request = Request::get("/api").body(Body::empty()).unwrap();
    let error = transport.send(request).await.unwrap_err();
    assert!(error.to_string().contains("token expired, run login"));
}
