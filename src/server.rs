//! The sender's TLS HTTP endpoint: `/info`, `/prepare-upload`, `/download`
//! under `/api/localsend/v2`, plus the one-shot barriers the send
//! orchestrator blocks on.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, SystemTime};

use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use hyper_util::rt::{TokioExecutor, TokioIo};
use log::{debug, warn};
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;
use tokio_util::io::ReaderStream;
use tower::{Service, ServiceExt};
use uuid::Uuid;

use crate::catalog::FileCatalog;
use crate::protocol::{DeviceType, InfoResponse, PrepareUploadRequest, PrepareUploadResponse};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::{crypto, Result, API_PREFIX, AUTH_WINDOW_MS, COMPLETION_GRACE_MS};

const DOWNLOAD_CHUNK: usize = 64 * 1024;

/// Bound to one receiver after its first successful handshake; every
/// download must present this id.
pub struct Session {
    pub id: Uuid,
    pub peer_alias: String,
    pub established_at: SystemTime,
}

/// State shared by the request handlers. The session slot, the delivered
/// set, and the rate limiter are the only mutable pieces; the catalog is
/// frozen at construction.
pub struct ServerState {
    phrase: String,
    alias: String,
    fingerprint: String,
    catalog: FileCatalog,
    session: parking_lot::Mutex<Option<Session>>,
    delivered: parking_lot::Mutex<HashSet<Uuid>>,
    completion_scheduled: AtomicBool,
    connected_tx: parking_lot::Mutex<Option<oneshot::Sender<String>>>,
    done_tx: parking_lot::Mutex<Option<oneshot::Sender<()>>>,
    pub rate_limiter: RateLimiter,
}

impl ServerState {
    /// Returns the state plus the two barriers the orchestrator awaits: the
    /// peer alias once a receiver handshakes, and unit once every file has
    /// been streamed out and the flush grace has elapsed.
    pub fn new(
        canonical_phrase: String,
        alias: String,
        fingerprint: String,
        catalog: FileCatalog,
    ) -> (Arc<Self>, oneshot::Receiver<String>, oneshot::Receiver<()>) {
        let (connected_tx, connected_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let state = Arc::new(Self {
            phrase: canonical_phrase,
            alias,
            fingerprint,
            catalog,
            session: parking_lot::Mutex::new(None),
            delivered: parking_lot::Mutex::new(HashSet::new()),
            completion_scheduled: AtomicBool::new(false),
            connected_tx: parking_lot::Mutex::new(Some(connected_tx)),
            done_tx: parking_lot::Mutex::new(Some(done_tx)),
            rate_limiter: RateLimiter::default(),
        });
        (state, connected_rx, done_rx)
    }

    /// Records one fully streamed file. When the last one lands, completion
    /// is scheduled once, after a short grace so network buffers drain.
    fn mark_delivered(self: &Arc<Self>, file_id: Uuid) {
        let count = {
            let mut delivered = self.delivered.lock();
            if !delivered.insert(file_id) {
                return;
            }
            delivered.len()
        };
        debug!("Delivered {}/{} files", count, self.catalog.len());
        if count == self.catalog.len()
            && !self.completion_scheduled.swap(true, Ordering::SeqCst)
        {
            let state = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(COMPLETION_GRACE_MS)).await;
                if let Some(tx) = state.done_tx.lock().take() {
                    let _ = tx.send(());
                }
            });
        }
    }
}

pub fn build_router(state: Arc<ServerState>) -> Router {
    let limiter = state.rate_limiter.clone();
    Router::new()
        .route(&format!("{}/info", API_PREFIX), get(info))
        .route(&format!("{}/prepare-upload", API_PREFIX), post(prepare_upload))
        .route(&format!("{}/download", API_PREFIX), get(download))
        .layer(middleware::from_fn_with_state(limiter, rate_limit_middleware))
        .with_state(state)
}

/// Accept loop: TLS handshake per connection, then the router drives the
/// HTTP exchange. Runs until the owning task is aborted.
pub async fn serve(
    listener: tokio::net::TcpListener,
    tls: Arc<rustls::ServerConfig>,
    state: Arc<ServerState>,
) -> Result<()> {
    let app = build_router(state);
    let mut make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    let acceptor = TlsAcceptor::from(tls);

    loop {
        let (tcp, remote) = listener.accept().await?;
        let tower_service = unwrap_infallible(make_service.call(remote).await);
        let acceptor = acceptor.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(tcp).await {
                Ok(stream) => stream,
                Err(e) => {
                    debug!("TLS handshake with {} failed: {}", remote, e);
                    return;
                }
            };
            let hyper_service =
                hyper::service::service_fn(move |request: hyper::Request<hyper::body::Incoming>| {
                    tower_service.clone().oneshot(request)
                });
            if let Err(e) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection(TokioIo::new(tls_stream), hyper_service)
                .await
            {
                debug!("Connection from {} closed: {}", remote, e);
            }
        });
    }
}

fn unwrap_infallible<T>(result: std::result::Result<T, std::convert::Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => match err {},
    }
}

async fn info(State(state): State<Arc<ServerState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        alias: state.alias.clone(),
        version: crate::PROTOCOL_VERSION.to_string(),
        device_model: crate::DEVICE_MODEL.to_string(),
        device_type: DeviceType::Headless,
        fingerprint: state.fingerprint.clone(),
        download: true,
    })
}

async fn prepare_upload(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<PrepareUploadRequest>,
) -> std::result::Result<Json<PrepareUploadResponse>, (StatusCode, String)> {
    let Some(auth) = request.cli_auth else {
        warn!("Handshake without cliAuth rejected");
        return Err((StatusCode::UNAUTHORIZED, "Authentication required".into()));
    };

    let Ok(timestamp) = auth.timestamp.parse::<i64>() else {
        return Err((StatusCode::UNAUTHORIZED, "Authentication required".into()));
    };
    if (crypto::now_unix_ms() - timestamp).abs() > AUTH_WINDOW_MS {
        warn!("Handshake timestamp outside the allowed window");
        return Err((StatusCode::UNAUTHORIZED, "Authentication expired".into()));
    }

    if !crypto::verify_auth_proof(&state.phrase, &auth.timestamp, &state.fingerprint, &auth.proof)
    {
        eprintln!("Warning: rejected handshake with invalid proof (possible spoofing)");
        return Err((StatusCode::FORBIDDEN, "Invalid proof".into()));
    }

    // First verified handshake wins the session and signals the orchestrator;
    // repeats get the same session back and signal nothing.
    let session_id = {
        let mut session = state.session.lock();
        match session.as_ref() {
            Some(existing) => existing.id,
            None => {
                let created = Session {
                    id: Uuid::new_v4(),
                    peer_alias: request.info.alias.clone(),
                    established_at: SystemTime::now(),
                };
                let id = created.id;
                *session = Some(created);
                if let Some(tx) = state.connected_tx.lock().take() {
                    let _ = tx.send(request.info.alias.clone());
                }
                id
            }
        }
    };

    Ok(Json(PrepareUploadResponse {
        session_id,
        files: state.catalog.manifest(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadParams {
    session_id: Option<String>,
    file_id: Option<String>,
}

async fn download(
    State(state): State<Arc<ServerState>>,
    Query(params): Query<DownloadParams>,
) -> std::result::Result<Response, (StatusCode, String)> {
    let requested = params
        .session_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok());
    let authorized = match (requested, state.session.lock().as_ref()) {
        (Some(requested), Some(active)) => requested == active.id,
        _ => false,
    };
    if !authorized {
        return Err((StatusCode::FORBIDDEN, "Invalid session".into()));
    }

    let entry = params
        .file_id
        .as_deref()
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .and_then(|id| state.catalog.get(&id))
        .ok_or((StatusCode::NOT_FOUND, "Unknown file".to_string()))?;

    let file = tokio::fs::File::open(&entry.path).await.map_err(|e| {
        warn!("Cannot open {}: {}", entry.path.display(), e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Cannot open file".to_string())
    })?;

    let stream = DeliveryStream {
        inner: ReaderStream::with_capacity(file, DOWNLOAD_CHUNK),
        state: state.clone(),
        file_id: entry.metadata.id,
        finished: false,
    };

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_LENGTH, entry.metadata.size)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", entry.metadata.file_name),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| {
            (StatusCode::INTERNAL_SERVER_ERROR, format!("response build failed: {}", e))
        })?;
    Ok(response.into_response())
}

/// Counts a file as delivered only when its body stream ends cleanly; a peer
/// that disconnects mid-download does not advance the completion barrier.
struct DeliveryStream<S> {
    inner: S,
    state: Arc<ServerState>,
    file_id: Uuid,
    finished: bool,
}

impl<S> Stream for DeliveryStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>> + Unpin,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_next(cx) {
            Poll::Ready(None) => {
                if !this.finished {
                    this.finished = true;
                    this.state.mark_delivered(this.file_id);
                }
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
