/// Messenger REST API + SSE over one open conversation view
///
/// Endpoints:
///   GET  /api/messages
///   GET  /api/health
///   POST /api/send      body: {"message":"..."}
///   GET  /events        SSE stream of ViewEvent JSON
use crate::error::{Result, SendError, SyncError};
use crate::messenger_types::ViewEvent;
use crate::view::ConversationView;
use futures_util::stream::{unfold, StreamExt};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

// ─── Type alias ──────────────────────────────────────────────────────────────

type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, Infallible>;
type Resp = Response<BoxBody>;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn cors_headers(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
}

fn json_resp(status: StatusCode, body: Vec<u8>) -> Resp {
    cors_headers(Response::builder())
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(bytes::Bytes::from(body)).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

fn json_ok(value: serde_json::Value) -> Resp {
    json_resp(StatusCode::OK, serde_json::to_vec(&value).unwrap_or_default())
}

fn json_err(status: StatusCode, msg: &str) -> Resp {
    json_resp(
        status,
        serde_json::to_vec(&serde_json::json!({ "error": msg })).unwrap_or_default(),
    )
}

fn sse_resp(
    rx: tokio::sync::broadcast::Receiver<ViewEvent>,
    closed: tokio::sync::watch::Receiver<bool>,
) -> Resp {
    // Keepalive comment sent immediately so the client knows the connection is live
    let initial = bytes::Bytes::from(": connected\n\n");
    let first = futures_util::stream::once(async move {
        Ok::<Frame<bytes::Bytes>, Infallible>(Frame::data(initial))
    });

    let events = unfold((rx, closed), |(mut rx, mut closed)| async move {
        loop {
            let received = tokio::select! {
                received = rx.recv() => received,
                // ends the stream on close, or if the view is gone
                _ = closed.wait_for(|c| *c) => return None,
            };
            match received {
                Ok(event) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    let data = format!("data: {}\n\n", json);
                    let frame = Frame::data(bytes::Bytes::from(data));
                    return Some((Ok::<_, Infallible>(frame), (rx, closed)));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    // the next MessagesChanged carries the full list again
                    warn!("SSE client lagged {} events", n);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    let stream = first.chain(events);
    cors_headers(Response::builder())
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream; charset=utf-8")
        .header("Cache-Control", "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(StreamBody::new(stream).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

// ─── Entry points ────────────────────────────────────────────────────────────

pub async fn start_messenger_api(view: Arc<ConversationView>, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(SyncError::Io)?;
    serve(listener, view).await
}

/// Serve on an already bound listener until the task is dropped
pub async fn serve(listener: TcpListener, view: Arc<ConversationView>) -> Result<()> {
    info!(
        "Messenger API started on http://{} for conversation {}",
        listener.local_addr().map_err(SyncError::Io)?,
        view.conversation().id
    );

    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let io = TokioIo::new(stream);
                let view = view.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req| {
                        let view = view.clone();
                        async move { Ok::<_, Infallible>(handle(req, view).await) }
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                        // Ignore client-disconnect errors (normal for SSE)
                        if !e.is_incomplete_message() {
                            error!("Messenger API connection error: {:?}", e);
                        }
                    }
                });
            }
            Err(e) => error!("Messenger API accept error: {}", e),
        }
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

async fn handle(req: Request<hyper::body::Incoming>, view: Arc<ConversationView>) -> Resp {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    if method == Method::OPTIONS {
        return cors_headers(Response::builder())
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(bytes::Bytes::new()).boxed())
            .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()));
    }

    match (method, path.as_str()) {
        (Method::GET, "/api/messages") => get_messages(&view).await,
        (Method::GET, "/api/health") => get_health(&view).await,
        (Method::POST, "/api/send") => post_send(req, &view).await,
        (Method::GET, "/events") => sse_resp(view.subscribe_events(), view.closed_signal()),
        _ => json_err(StatusCode::NOT_FOUND, "not found"),
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

async fn get_messages(view: &ConversationView) -> Resp {
    let messages = view.messages().await;
    json_ok(serde_json::json!({
        "conversation_id": view.conversation().id,
        "messages": messages,
    }))
}

async fn get_health(view: &ConversationView) -> Resp {
    json_ok(serde_json::json!({
        "conversation_id": view.conversation().id,
        "health": view.health(),
        "unlocked": view.is_unlocked(),
        "pending": view.pending_count().await,
    }))
}

#[derive(Deserialize)]
struct SendRequest {
    message: String,
}

async fn post_send(req: Request<hyper::body::Incoming>, view: &ConversationView) -> Resp {
    let body = match read_body(req).await {
        Ok(b) => b,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("body read error: {}", e)),
    };
    let req: SendRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)),
    };

    match view.send_message(&req.message).await {
        Ok(message) => json_ok(serde_json::json!({ "message": message })),
        Err(SendError::Empty) => json_err(StatusCode::BAD_REQUEST, "message is empty"),
        Err(SendError::Locked) => json_err(StatusCode::FORBIDDEN, "messaging is locked"),
        Err(SendError::Closed) => json_err(StatusCode::GONE, "conversation closed"),
        Err(e @ SendError::Rejected { .. }) => json_resp(
            StatusCode::BAD_GATEWAY,
            serde_json::to_vec(&serde_json::json!({
                "error": e.to_string(),
                "content": e.retry_content(),
            }))
            .unwrap_or_default(),
        ),
    }
}

// ─── Utilities ────────────────────────────────────────────────────────────────

async fn read_body(req: Request<hyper::body::Incoming>) -> std::result::Result<bytes::Bytes, String> {
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| e.to_string())
}
