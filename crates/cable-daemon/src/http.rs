//! HTTP server front (C7): URL routing, static-file responses, and the
//! `/request/...` control surface. Plain `hyper` server/service, no
//! router framework — the routing table below is the Rust analogue of
//! the original `server.c`'s explicit `handle_connection` prefix match.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use cable_proto::{
    is_hex, F_CA_PEM, F_MESSAGE_ENC, F_RPEER_SIG, F_SPEER_SIG, F_VERIFY_PEM, MSGID_LENGTH,
};
use cable_proto::SvcStatus;
use http::{Method, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server};
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::dispatch::dispatch_request;
use crate::fsutil::DirHandle;
use crate::lifecycle::Lifecycle;

/// Everything a request handler needs to answer a connection.
pub struct HttpState {
    /// Local base-32 username; every path must be prefixed `/<username>/`.
    pub username: String,
    pub certs_dir: PathBuf,
    pub queue_dir: PathBuf,
    pub rqueue_dir: PathBuf,
    pub queue: DirHandle,
    pub rqueue: DirHandle,
}

/// Bind and serve until `lifecycle` requests a stop.
pub async fn run_http_server(
    addr: SocketAddr,
    state: Arc<HttpState>,
    lifecycle: Arc<Lifecycle>,
) -> std::io::Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let state = Arc::clone(&state);
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = Arc::clone(&state);
                async move { Ok::<_, Infallible>(handle(req, state).await) }
            }))
        }
    });

    let server = Server::bind(&addr).serve(make_svc);
    info!(%addr, "HTTP server listening");
    let graceful = server.with_graceful_shutdown(async move {
        lifecycle.stopped().await;
        info!("HTTP server shutting down");
    });

    graceful
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
}

fn status_response(status: StatusCode, body: Bytes) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(body))
        .expect("static response is always well-formed")
}

fn empty_status(status: StatusCode) -> Response<Body> {
    status_response(status, Bytes::new())
}

fn forbidden() -> Response<Body> {
    empty_status(StatusCode::FORBIDDEN)
}

fn not_found() -> Response<Body> {
    empty_status(StatusCode::NOT_FOUND)
}

/// Literal version-stamped bodies for `/request/...`, `Content-Type:
/// text/plain` and `Cache-Control: no-cache` as spec §4.7 requires.
fn request_response(status: SvcStatus, is_head: bool) -> Response<Body> {
    let body = if is_head {
        Bytes::new()
    } else {
        Bytes::from_static(status.body().as_bytes())
    };
    Response::builder()
        .status(status.http_code())
        .header(http::header::CONTENT_TYPE, "text/plain")
        .header(http::header::CACHE_CONTROL, "no-cache")
        .body(Body::from(body))
        .expect("static response is always well-formed")
}

/// Serve a static file by path. 404 if either the open or the stat
/// fails. The size and the body are derived from the *same* open file
/// handle (`File::open` then `fstat` via `metadata()` on that handle,
/// then `read`), matching the original's `open()` -> `fstat(fd)` ->
/// `MHD_create_response_from_fd` pattern in `server.c:queue_fd` — a
/// size taken from a separate, later `stat()`/`read()` of the path
/// would be a TOCTOU window against the external `loop` process
/// rewriting these files concurrently.
async fn serve_static(path: PathBuf, is_head: bool) -> Response<Body> {
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => return not_found(),
    };
    let meta = match file.metadata().await {
        Ok(m) if m.is_file() => m,
        _ => return not_found(),
    };

    if is_head {
        return Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_LENGTH, meta.len().to_string())
            .body(Body::empty())
            .expect("static response is always well-formed");
    }

    let mut data = Vec::with_capacity(meta.len() as usize);
    match file.read_to_end(&mut data).await {
        Ok(_) => Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_LENGTH, data.len().to_string())
            .body(Body::from(data))
            .expect("static response is always well-formed"),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "static file read failed after open+fstat succeeded");
            not_found()
        }
    }
}

/// `<40hex>` or `<40hex>.key` under `queue/`/`rqueue/`; returns the
/// message id if the prefix/suffix/hex shape all match.
fn strip_msgid<'a>(suffix: &'a str, prefix: &str, key_suffix: Option<&str>) -> Option<&'a str> {
    let rest = suffix.strip_prefix(prefix)?;
    let msgid = match key_suffix {
        Some(suf) => rest.strip_suffix(suf)?,
        None => rest,
    };
    if is_hex(MSGID_LENGTH, msgid) {
        Some(msgid)
    } else {
        None
    }
}

async fn handle(req: Request<Body>, state: Arc<HttpState>) -> Response<Body> {
    match req.method() {
        &Method::GET | &Method::HEAD => {}
        _ => return empty_status(StatusCode::METHOD_NOT_ALLOWED),
    }
    let is_head = req.method() == &Method::HEAD;

    let path = req.uri().path();
    let rest = path.strip_prefix('/').unwrap_or(path);
    let Some((user, suffix)) = rest.split_once('/') else {
        return forbidden();
    };
    if user != state.username {
        return forbidden();
    }

    if suffix == format!("certs/{F_CA_PEM}") {
        return serve_static(state.certs_dir.join(F_CA_PEM), is_head).await;
    }
    if suffix == format!("certs/{F_VERIFY_PEM}") {
        return serve_static(state.certs_dir.join(F_VERIFY_PEM), is_head).await;
    }
    if let Some(msgid) = strip_msgid(suffix, "queue/", Some(".key")) {
        return serve_static(state.queue_dir.join(msgid).join(F_SPEER_SIG), is_head).await;
    }
    if let Some(msgid) = strip_msgid(suffix, "queue/", None) {
        return serve_static(state.queue_dir.join(msgid).join(F_MESSAGE_ENC), is_head).await;
    }
    if let Some(msgid) = strip_msgid(suffix, "rqueue/", Some(".key")) {
        return serve_static(state.rqueue_dir.join(msgid).join(F_RPEER_SIG), is_head).await;
    }
    if let Some(req_suffix) = suffix.strip_prefix("request/") {
        let status = dispatch_request(req_suffix, &state.queue, &state.rqueue);
        return request_response(status, is_head);
    }

    forbidden()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_msgid_accepts_plain_and_key_suffix() {
        let id = "0".repeat(MSGID_LENGTH);
        assert_eq!(strip_msgid(&format!("queue/{id}"), "queue/", None), Some(id.as_str()));
        assert_eq!(
            strip_msgid(&format!("queue/{id}.key"), "queue/", Some(".key")),
            Some(id.as_str())
        );
        assert_eq!(strip_msgid(&format!("queue/{id}.key"), "queue/", None), None);
    }

    #[test]
    fn strip_msgid_rejects_wrong_length() {
        assert_eq!(strip_msgid("queue/deadbeef", "queue/", None), None);
    }

    #[tokio::test]
    async fn get_outside_username_prefix_is_forbidden() {
        let req = Request::builder()
            .uri("/someoneelse/request/ver")
            .body(Body::empty())
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(HttpState {
            username: "abcdefghijklmnopqrstuvwxyz234567".to_string(),
            certs_dir: dir.path().to_path_buf(),
            queue_dir: dir.path().to_path_buf(),
            rqueue_dir: dir.path().to_path_buf(),
            queue: DirHandle::open(dir.path()).unwrap(),
            rqueue: DirHandle::open(dir.path()).unwrap(),
        });
        let resp = handle(req, state).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn request_ver_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(HttpState {
            username: "abcdefghijklmnopqrstuvwxyz234567".to_string(),
            certs_dir: dir.path().to_path_buf(),
            queue_dir: dir.path().to_path_buf(),
            rqueue_dir: dir.path().to_path_buf(),
            queue: DirHandle::open(dir.path()).unwrap(),
            rqueue: DirHandle::open(dir.path()).unwrap(),
        });
        let req = Request::builder()
            .uri("/abcdefghijklmnopqrstuvwxyz234567/request/ver")
            .body(Body::empty())
            .unwrap();
        let resp = handle(req, state).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn serve_static_content_length_matches_body() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("message.enc");
        std::fs::write(&path, b"hello ciphertext").unwrap();

        let resp = serve_static(path, false).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_length = resp
            .headers()
            .get(http::header::CONTENT_LENGTH)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let body = hyper::body::to_bytes(resp.into_body()).await.unwrap();
        assert_eq!(content_length, body.len().to_string());
        assert_eq!(&body[..], b"hello ciphertext");
    }

    #[tokio::test]
    async fn serve_static_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let resp = serve_static(dir.path().join("missing"), false).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_is_method_not_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(HttpState {
            username: "abcdefghijklmnopqrstuvwxyz234567".to_string(),
            certs_dir: dir.path().to_path_buf(),
            queue_dir: dir.path().to_path_buf(),
            rqueue_dir: dir.path().to_path_buf(),
            queue: DirHandle::open(dir.path()).unwrap(),
            rqueue: DirHandle::open(dir.path()).unwrap(),
        });
        let req = Request::builder()
            .method(Method::POST)
            .uri("/abcdefghijklmnopqrstuvwxyz234567/request/ver")
            .body(Body::empty())
            .unwrap();
        let resp = handle(req, state).await;
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
