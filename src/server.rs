use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::backend::{FilesystemBackend, InMemoryBackend, StorageBackend};
use crate::config::Config;
use crate::handlers;
use crate::multipart::MultipartManager;
use crate::notify::{EventManager, EventMask, NotificationRegistry, Publisher};
use crate::upload::UploadManager;
use crate::xml;

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn StorageBackend>,
    pub uploads: Arc<UploadManager>,
    pub multipart: Arc<MultipartManager>,
    pub notifications: Arc<NotificationRegistry>,
    pub events: Arc<EventManager>,
    pub public_host: String,
    /// Advertised base URL; replaceable at runtime through the internal
    /// config endpoint.
    pub external_url: Arc<RwLock<String>>,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        events: Arc<EventManager>,
        public_host: &str,
        external_url: &str,
    ) -> Self {
        AppState {
            backend,
            uploads: Arc::new(UploadManager::new()),
            multipart: Arc::new(MultipartManager::new()),
            notifications: Arc::new(NotificationRegistry::new()),
            events,
            public_host: public_host.to_string(),
            external_url: Arc::new(RwLock::new(external_url.to_string())),
        }
    }

    pub fn external_url(&self) -> String {
        self.external_url.read().unwrap().clone()
    }
}

/// Builds the full router: JSON API routes, upload routes, internal
/// endpoints, and the host-sensitive XML data plane as the fallback.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        // JSON API: buckets
        .route(
            "/storage/v1/b",
            get(handlers::bucket::list_buckets).post(handlers::bucket::insert_bucket),
        )
        .route(
            "/storage/v1/b/:bucket",
            get(handlers::bucket::get_bucket)
                .put(handlers::bucket::update_bucket)
                .patch(handlers::bucket::patch_bucket)
                .delete(handlers::bucket::delete_bucket),
        )
        // JSON API: notification configs
        .route(
            "/storage/v1/b/:bucket/notificationConfigs",
            get(handlers::notification::list_notifications)
                .post(handlers::notification::insert_notification),
        )
        .route(
            "/storage/v1/b/:bucket/notificationConfigs/:id",
            get(handlers::notification::get_notification)
                .delete(handlers::notification::delete_notification),
        )
        // JSON API: objects. The wildcard swallows sub-resources
        // (acl, compose, copyTo, rewriteTo); the handlers split them out.
        .route("/storage/v1/b/:bucket/o", get(handlers::object::list_objects))
        .route(
            "/storage/v1/b/:bucket/o/*object",
            get(handlers::object::get_object)
                .put(handlers::object::put_object)
                .patch(handlers::object::patch_object)
                .post(handlers::object::post_object)
                .delete(handlers::object::delete_object),
        )
        // Uploads
        .route(
            "/upload/storage/v1/b/:bucket/o",
            post(handlers::upload::insert_object).put(handlers::upload::insert_object),
        )
        .route(
            "/upload/resumable/:upload_id",
            put(handlers::upload::resumable_chunk)
                .post(handlers::upload::resumable_chunk)
                .delete(handlers::upload::resumable_abort),
        )
        // Internal endpoints
        .route("/_internal/config", put(update_server_config))
        .route("/_internal/healthcheck", get(health_check))
        // Everything else is the XML data plane, dispatched on Host.
        .fallback(xml::handlers::handle_data_plane)
        .layer(middleware::from_fn(method_override))
        .layer(middleware::from_fn(decompress_request_body))
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Runs the emulator until SIGINT/SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let backend: Arc<dyn StorageBackend> = match config.storage.backend.as_str() {
        "filesystem" => {
            info!("using filesystem backend at {:?}", config.storage.root);
            Arc::new(FilesystemBackend::new(&config.storage.root)?)
        }
        _ => {
            info!("using in-memory backend");
            Arc::new(InMemoryBackend::new())
        }
    };

    let events = Arc::new(EventManager::new(
        None,
        config.events.object_prefix.clone(),
        config.events.mask(),
        config.events.publish_sync,
    ));

    let state = AppState::new(
        backend,
        events,
        &config.server.public_host,
        &config.server.external_url,
    );
    let app = build_app(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("IronGCS listening on {} (public host {})", addr, config.server.public_host);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Same-process embedding hook: a preconfigured state with a caller-owned
/// publisher, for test harnesses and in-process clients.
pub fn app_with_publisher(
    backend: Arc<dyn StorageBackend>,
    publisher: Option<Arc<dyn Publisher>>,
    public_host: &str,
    external_url: &str,
    sync_publish: bool,
) -> Router {
    let events = Arc::new(EventManager::new(
        publisher,
        String::new(),
        EventMask::all(),
        sync_publish,
    ));
    build_app(AppState::new(backend, events, public_host, external_url))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down...");
        },
    }
}

/// Replaces the advertised external URL with the plain-text request body.
async fn update_server_config(State(state): State<AppState>, body: String) -> Response {
    let url = body.trim().to_string();
    if url.is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    info!("external URL updated to {}", url);
    *state.external_url.write().unwrap() = url;
    StatusCode::OK.into_response()
}

async fn health_check() -> &'static str {
    "ok"
}

/// `POST` carrying `X-HTTP-Method-Override` acts as the named method.
async fn method_override(mut req: Request, next: Next) -> Response {
    if req.method() == Method::POST {
        let overridden = req
            .headers()
            .get("x-http-method-override")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Method>().ok());
        if let Some(method) = overridden {
            debug!("method override: POST -> {}", method);
            *req.method_mut() = method;
        }
    }
    next.run(req).await
}

/// Transparently decompresses `Content-Encoding: gzip` request bodies so
/// handlers only ever see plain bytes.
async fn decompress_request_body(req: Request, next: Next) -> Response {
    let is_gzip = req
        .headers()
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("gzip"))
        .unwrap_or(false);

    if !is_gzip {
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let compressed = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(b) => b,
        Err(_) => {
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    let mut decoded = Vec::new();
    if GzDecoder::new(&compressed[..]).read_to_end(&mut decoded).is_err() {
        return StatusCode::BAD_REQUEST.into_response();
    }
    parts.headers.remove(header::CONTENT_ENCODING);
    parts.headers.remove(header::CONTENT_LENGTH);
    let req = Request::from_parts(parts, Body::from(decoded));
    next.run(req).await
}

/// Decoded query-string pairs. Later duplicates win, bare keys map to "".
pub fn parse_query(query: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode(key).map(|c| c.into_owned()).unwrap_or_default();
        let value = urlencoding::decode(value)
            .map(|c| c.into_owned())
            .unwrap_or_default();
        out.insert(key, value);
    }
    out
}

/// Collects `x-goog-meta-*` request headers into a metadata map, with the
/// remainder of each name canonicalized MIME-style (`marco` -> `Marco`,
/// `a-b` -> `A-B`).
pub fn goog_meta_from_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for (name, value) in headers {
        let name = name.as_str();
        if let Some(rest) = name.strip_prefix("x-goog-meta-") {
            if rest.is_empty() {
                continue;
            }
            if let Ok(value) = value.to_str() {
                out.insert(canonical_meta_key(rest), value.to_string());
            }
        }
    }
    out
}

/// Capitalizes each hyphen-separated segment, matching how a
/// canonicalizing HTTP client would have sent the header.
pub fn canonical_meta_key(key: &str) -> String {
    key.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
