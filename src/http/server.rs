//! HTTP server for large boot artifacts (kernels, initrds, images).
//!
//! Serves files under one root directory with `GET` and `HEAD` through an
//! axum router on a tokio runtime owned by the service thread. Paths are
//! percent-decoded by the router, then sanitized with the same rule as TFTP.

use std::io;
use std::net::{SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{self, ConnectInfo, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::error::HttpError;
use crate::utils::sanitize_path;

/// Read buffer used when streaming file bodies.
const CHUNK_SIZE: usize = 64 * 1024;

/// How often the serve loop checks the running flag.
const STOP_POLL: Duration = Duration::from_millis(100);

/// Static file HTTP server.
pub struct HttpServer {
    root: PathBuf,
    bind_addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl HttpServer {
    pub fn new(root: impl AsRef<Path>, bind_addr: SocketAddr) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            bind_addr,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the running flag for external control.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.bind_addr)
            .with_context(|| format!("Failed to bind HTTP server to {}", self.bind_addr))
    }

    /// Serve on an already-bound listener until the running flag is cleared.
    ///
    /// Requests still in flight when the flag drops are abandoned.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        listener
            .set_nonblocking(true)
            .context("Failed to set non-blocking")?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .thread_name("http-worker")
            .enable_all()
            .build()
            .context("Failed to start HTTP runtime")?;

        self.running.store(true, Ordering::SeqCst);
        let local = listener.local_addr().unwrap_or(self.bind_addr);
        info!("HTTP server listening on {}", local);
        info!("Serving files from: {}", self.root.display());

        let app = create_router(self.root.clone());
        let running = Arc::clone(&self.running);

        let result = runtime.block_on(serve_until_stopped(listener, app, running));

        runtime.shutdown_timeout(Duration::from_secs(1));
        info!("HTTP server stopped");
        result
    }
}

async fn serve_until_stopped(
    listener: TcpListener,
    app: Router,
    running: Arc<AtomicBool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::from_std(listener)
        .context("Failed to register HTTP listener")?;
    let server = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::select! {
        served = async move { server.await } => served.context("HTTP server failed"),
        _ = wait_for_stop(running) => Ok(()),
    }
}

async fn wait_for_stop(running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        tokio::time::sleep(STOP_POLL).await;
    }
}

/// `GET` (and, through axum, `HEAD`) for every path under the root. Other
/// methods get 405 with an `Allow` header from the method router.
fn create_router(root: PathBuf) -> Router {
    Router::new()
        .route("/", get(serve_index))
        .route("/{*path}", get(serve_file))
        .layer(middleware::from_fn(request_logging))
        .with_state(Arc::new(root))
}

/// Logs each request as "METHOD PATH from IP - STATUS".
async fn request_logging(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let response = next.run(request).await;

    info!(
        "HTTP {} {} from {} - {}",
        method,
        uri,
        addr.ip(),
        response.status().as_u16()
    );
    response
}

/// Directory listings are not served.
async fn serve_index() -> HttpError {
    HttpError::NotFound("/".to_string())
}

async fn serve_file(
    State(root): State<Arc<PathBuf>>,
    extract::Path(path): extract::Path<String>,
) -> Result<Response, HttpError> {
    let target = format!("/{}", path);

    let Some(file_path) = resolve(&root, &path) else {
        warn!("HTTP: rejected path {}", target);
        return Err(HttpError::NotFound(target));
    };

    let (file, size) = match open_regular_file(&file_path).await {
        Ok(opened) => opened,
        Err(e) => {
            debug!("HTTP: cannot serve {}: {}", file_path.display(), e);
            return Err(HttpError::NotFound(target));
        }
    };

    let body = Body::from_stream(ReaderStream::with_capacity(file, CHUNK_SIZE));

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, size)
        .header(header::CONTENT_TYPE, content_type(&target))
        .body(body)?;
    Ok(response)
}

/// Map a decoded request path onto the root. `None` for traversal or an
/// empty path.
fn resolve(root: &Path, target: &str) -> Option<PathBuf> {
    let relative = sanitize_path(target)?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(root.join(relative))
}

async fn open_regular_file(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "not a regular file"));
    }
    Ok((file, metadata.len()))
}

fn content_type(path: &str) -> &'static str {
    let lower = path.to_lowercase();
    if lower.ends_with(".efi") {
        "application/efi"
    } else if lower.ends_with(".cfg") || lower.ends_with(".conf") || lower.ends_with(".ipxe") {
        "text/plain"
    } else if lower.ends_with(".iso") {
        "application/x-iso9660-image"
    } else {
        "application/octet-stream"
    }
}
