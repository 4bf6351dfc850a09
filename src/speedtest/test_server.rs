use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::StreamExt;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body_len: usize,
    /// The body is written in this many pieces, `piece_delay` apart.
    pub pieces: usize,
    pub piece_delay: Duration,
    /// Held back after the request body has been read.
    pub respond_after: Duration,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            status: 200,
            body_len: 0,
            pieces: 1,
            piece_delay: Duration::ZERO,
            respond_after: Duration::ZERO,
        }
    }
}

#[derive(Clone)]
struct ServerState {
    reply: Reply,
    requests: Arc<AtomicUsize>,
    received: Arc<AtomicU64>,
}

/// Serves `GET /data` and `POST /data` with a canned reply.
pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
    received: Arc<AtomicU64>,
    task: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(reply: Reply) -> Self {
        let state = ServerState {
            reply,
            requests: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(AtomicU64::new(0)),
        };
        let requests = state.requests.clone();
        let received = state.received.clone();

        let app = Router::new()
            .route("/data", get(send_body).post(drain_body))
            .with_state(state);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            requests,
            received,
            task,
        }
    }

    /// A URL nothing is listening on.
    pub async fn closed_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{addr}/")
    }

    pub fn url(&self) -> String {
        format!("http://{}/data", self.addr)
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Request payload bytes read so far, across all requests.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn send_body(State(state): State<ServerState>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    respond(&state.reply).await
}

async fn drain_body(State(state): State<ServerState>, body: Body) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let mut data = body.into_data_stream();
    while let Some(Ok(chunk)) = data.next().await {
        state
            .received
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
    }
    respond(&state.reply).await
}

async fn respond(reply: &Reply) -> Response {
    if !reply.respond_after.is_zero() {
        tokio::time::sleep(reply.respond_after).await;
    }
    let status = StatusCode::from_u16(reply.status).unwrap();
    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (header::CONTENT_LENGTH, reply.body_len.to_string()),
    ];
    (status, headers, Body::from_stream(pieces(reply))).into_response()
}

fn pieces(reply: &Reply) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
    let total = reply.body_len;
    let piece_len = total.div_ceil(reply.pieces.max(1)).max(1);
    let delay = reply.piece_delay;
    futures::stream::unfold(total, move |remaining| async move {
        if remaining == 0 {
            return None;
        }
        if remaining < total && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let n = remaining.min(piece_len);
        Some((Ok(Bytes::from(vec![0xA5u8; n])), remaining - n))
    })
}
