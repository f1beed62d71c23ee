//! Collector network surfaces.
//!
//! The HTTP API is an axum [`Router`] built by [`create_router`]; the gRPC
//! `AddMetric` service is built by [`grpc_service`]. Both share one
//! [`AppState`] and therefore one repository.
//!
//! # HTTP middleware
//!
//! Outermost first: request tracing, response compression, trusted-subnet
//! check, body decryption, request decompression, signature check. Each
//! stage is a no-op when its key or network is not configured.

mod handlers;
mod middleware;

pub use handlers::ApiError;
pub use middleware::TrustedSubnet;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::codec::CompressionEncoding;
use tonic::service::interceptor::InterceptedService;
use tower_http::{
    compression::CompressionLayer,
    decompression::RequestDecompressionLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::codec::{Decryptor, Signer};
use crate::repository::Repository;
use crate::rpc::v1::metrics_server::MetricsServer;
use crate::rpc::{MetricsService, TrustedSubnetInterceptor};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repository>,
    /// Verifies `HashSHA256` headers when a key is configured.
    pub verifier: Option<Signer>,
    /// Decrypts request bodies when a private key is configured.
    pub decryptor: Option<Decryptor>,
    pub trusted_subnet: Option<TrustedSubnet>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("backend", &self.repo.backend())
            .field("verifier", &self.verifier.is_some())
            .field("decryptor", &self.decryptor.is_some())
            .field("trusted_subnet", &self.trusted_subnet)
            .finish()
    }
}

impl AppState {
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self {
            repo,
            verifier: None,
            decryptor: None,
            trusted_subnet: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Option<Signer>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_decryptor(mut self, decryptor: Option<Decryptor>) -> Self {
        self.decryptor = decryptor;
        self
    }

    pub fn with_trusted_subnet(mut self, subnet: Option<TrustedSubnet>) -> Self {
        self.trusted_subnet = subnet;
        self
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);
    Router::new()
        .route("/", get(handlers::index))
        .route("/ping", get(handlers::ping))
        .route("/update", post(handlers::update_json))
        .route("/update/", post(handlers::update_json))
        .route("/update/:kind/:name/:value", post(handlers::update_from_path))
        .route("/updates", post(handlers::update_batch))
        .route("/updates/", post(handlers::update_batch))
        .route("/value", post(handlers::value_json))
        .route("/value/", post(handlers::value_json))
        .route("/value/:kind/:name", get(handlers::value_from_path))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&app_state),
            middleware::verify_signature,
        ))
        .layer(RequestDecompressionLayer::new())
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&app_state),
            middleware::decrypt_body,
        ))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&app_state),
            middleware::check_trusted_subnet,
        ))
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .with_state(app_state)
}

/// gRPC service type served next to the HTTP API.
pub type GrpcService = InterceptedService<MetricsServer<MetricsService>, TrustedSubnetInterceptor>;

/// Build the `telemon.v1.Metrics` service over the same state as the router.
pub fn grpc_service(state: &AppState) -> GrpcService {
    let service =
        MetricsService::new(Arc::clone(&state.repo)).with_verifier(state.verifier.clone());
    let server = MetricsServer::new(service)
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);
    InterceptedService::new(server, TrustedSubnetInterceptor::new(state.trusted_subnet))
}

/// Spawn a server task whose exit, clean or not, cancels `shutdown`.
///
/// One listener failing takes the other listeners and the process down
/// with it instead of leaving a half-served collector.
pub fn spawn_linked<F>(shutdown: &CancellationToken, serve: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let guard = shutdown.clone().drop_guard();
    tokio::spawn(async move {
        let _guard = guard;
        serve.await
    })
}

/// Serve the HTTP API on `listener` until `shutdown` is cancelled.
pub async fn serve_http(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(address = ?local, "HTTP API listening");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

/// Serve the gRPC API on `listener` until `shutdown` is cancelled.
pub async fn serve_grpc(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    tracing::info!(address = ?local, "gRPC API listening");
    tonic::transport::Server::builder()
        .add_service(grpc_service(&state))
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            shutdown.cancelled_owned(),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, HASH_HEADER, REAL_IP_HEADER, compress, decompress};
    use crate::model::Metric;
    use crate::repository::MemoryRepository;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState::new(Arc::new(MemoryRepository::new()))
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, String) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_counter_path_updates_accumulate() {
        let app = create_router(state());
        let (status, body) = call(&app, post("/update/counter/hits/3")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "3");
        assert_eq!(call(&app, post("/update/counter/hits/4")).await.1, "7");

        let (status, body) = call(&app, get("/value/counter/hits")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "7");
    }

    #[tokio::test]
    async fn test_gauge_json_update_and_read() {
        let app = create_router(state());
        let (status, body) = call(
            &app,
            json("/update", r#"{"id":"temp","type":"gauge","value":21.5}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let stored: Metric = serde_json::from_str(&body).unwrap();
        assert_eq!(stored, Metric::gauge("temp", 21.5));

        let (status, body) = call(&app, json("/value", r#"{"id":"temp","type":"gauge"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        let read: Metric = serde_json::from_str(&body).unwrap();
        assert_eq!(read, Metric::gauge("temp", 21.5));
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = create_router(state());
        assert_eq!(
            call(&app, post("/update/histogram/x/1")).await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            call(&app, post("/update/counter/x/1.5")).await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            call(&app, get("/value/counter/missing")).await.0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            call(&app, get("/value/histogram/missing")).await.0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            call(&app, json("/value", r#"{"id":"missing","type":"gauge"}"#)).await.0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            call(&app, json("/update", r#"{"id":"x","type":"counter","value":1.0}"#))
                .await
                .0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            call(&app, json("/update", "not json")).await.0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_bad_request() {
        let app = create_router(state());
        call(&app, post("/update/counter/shared/1")).await;
        let (status, _) = call(&app, post("/update/gauge/shared/1.0")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_batch_rejected_as_a_whole() {
        let app = create_router(state());
        let (status, _) = call(
            &app,
            json(
                "/updates",
                r#"[{"id":"a","type":"counter","delta":1},{"id":"b","type":"gauge"}]"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            call(&app, get("/value/counter/a")).await.0,
            StatusCode::NOT_FOUND
        );

        let (status, body) = call(
            &app,
            json(
                "/updates",
                r#"[{"id":"a","type":"counter","delta":1},{"id":"a","type":"counter","delta":2},{"id":"b","type":"gauge","value":0.5}]"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "{}");
        assert_eq!(call(&app, get("/value/counter/a")).await.1, "3");
        assert_eq!(call(&app, get("/value/gauge/b")).await.1, "0.5");
    }

    #[tokio::test]
    async fn test_index_and_ping() {
        let app = create_router(state());
        call(&app, post("/update/gauge/load/1.25")).await;

        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/html"));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let dump: Vec<Metric> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(dump, vec![Metric::gauge("load", 1.25)]);

        assert_eq!(call(&app, get("/ping")).await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ping_fails_after_stop() {
        let repo = Arc::new(MemoryRepository::new());
        let app = create_router(AppState::new(Arc::clone(&repo) as Arc<dyn Repository>));
        repo.stop().await.unwrap();
        assert_eq!(
            call(&app, get("/ping")).await.0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_gzip_request_and_response() {
        let app = create_router(state());
        let body = compress(br#"{"id":"PollCount","type":"counter","delta":5}"#).unwrap();
        let request = Request::builder()
            .method("POST")
            .uri("/update")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_ENCODING, "gzip")
            .header(header::ACCEPT_ENCODING, "gzip")
            .body(Body::from(body))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let stored: Metric = serde_json::from_slice(&decompress(&bytes).unwrap()).unwrap();
        assert_eq!(stored, Metric::counter("PollCount", 5));
    }

    #[tokio::test]
    async fn test_signature_checked_when_key_configured() {
        let signer = Signer::new("secret");
        let app = create_router(state().with_verifier(Some(signer.clone())));
        let codec = Codec::new().with_signer(signer);
        let sealed = codec.seal(&Metric::gauge("Alloc", 3.0)).unwrap();

        let signed = |signature: &str| {
            Request::builder()
                .method("POST")
                .uri("/update")
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::CONTENT_ENCODING, "gzip")
                .header(HASH_HEADER, signature)
                .body(Body::from(sealed.body.clone()))
                .unwrap()
        };

        let good = sealed.signature.clone().unwrap();
        assert_eq!(call(&app, signed(&good)).await.0, StatusCode::OK);
        assert_eq!(call(&app, signed("bm9wZQ==")).await.0, StatusCode::BAD_REQUEST);
        // Unsigned requests pass.
        assert_eq!(
            call(&app, post("/update/gauge/Alloc/4")).await.0,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_failed_server_task_cancels_shutdown() {
        let shutdown = CancellationToken::new();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http = spawn_linked(&shutdown, serve_http(listener, state(), shutdown.clone()));
        let grpc = spawn_linked(&shutdown, async {
            Err::<(), _>(std::io::Error::other("listener lost"))
        });

        tokio::time::timeout(std::time::Duration::from_secs(5), shutdown.cancelled())
            .await
            .expect("shutdown not triggered by the failed task");
        assert!(grpc.await.unwrap().is_err());
        http.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_trusted_subnet_enforced() {
        let subnet = TrustedSubnet::parse("192.168.1.0/24").unwrap();
        let app = create_router(state().with_trusted_subnet(Some(subnet)));

        let from = |ip: Option<&str>| {
            let mut builder = Request::builder().method("POST").uri("/update/counter/c/1");
            if let Some(ip) = ip {
                builder = builder.header(REAL_IP_HEADER, ip);
            }
            builder.body(Body::empty()).unwrap()
        };

        assert_eq!(call(&app, from(Some("192.168.1.20"))).await.0, StatusCode::OK);
        assert_eq!(
            call(&app, from(Some("10.0.0.1"))).await.0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(call(&app, from(None)).await.0, StatusCode::FORBIDDEN);
    }
}
