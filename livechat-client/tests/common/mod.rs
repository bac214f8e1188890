//! Local stand-ins for the chat proxy and the realtime chat endpoint.

#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{TimeDelta, Utc};
use serde_json::{Value, json};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::mpsc,
};
use tokio_tungstenite::{
    WebSocketStream, accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response as HandshakeResponse},
        http::header::SEC_WEBSOCKET_PROTOCOL,
    },
};
use url::Url;

#[derive(Clone, Default)]
pub struct ProxyState {
    pub requests: Arc<Mutex<Vec<(String, Value)>>>,
    pub issued: Arc<AtomicUsize>,
    pub fail_events: Arc<AtomicBool>,
}

impl ProxyState {
    pub fn requests_to(&self, path: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| p == path)
            .map(|(_, body)| body.clone())
            .collect()
    }
}

pub struct Proxy {
    pub base: Url,
    pub state: ProxyState,
}

async fn auth(State(state): State<ProxyState>, Json(body): Json<Value>) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push(("auth".into(), body.clone()));

    let arn = body["arn"].as_str().unwrap_or_default();
    let user_id = body["userId"].as_str().unwrap_or_default();
    if arn.is_empty() || user_id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Missing parameters: `arn`, `userId`"})),
        )
            .into_response();
    }

    let n = state.issued.fetch_add(1, Ordering::SeqCst) + 1;
    let now = Utc::now();
    Json(json!({
        "token": format!("tok-{n}"),
        "sessionExpirationTime": (now + TimeDelta::hours(3)).to_rfc3339(),
        "tokenExpirationTime": (now + TimeDelta::minutes(55)).to_rfc3339(),
    }))
    .into_response()
}

async fn event(State(state): State<ProxyState>, Json(body): Json<Value>) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push(("event".into(), body.clone()));

    if state.fail_events.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response();
    }
    Json(json!({"arn": body["arn"], "status": "success"})).into_response()
}

async fn rooms() -> Response {
    Json(json!({
        "rooms": [{
            "arn": "arn:aws:ivschat:us-west-2:123:room/abc",
            "id": "abc",
            "name": "demo",
            "createTime": "2024-05-01T12:00:00Z",
            "tags": {"stage": "dev"},
            "messageReviewHandler": {}
        }]
    }))
    .into_response()
}

pub async fn spawn_proxy() -> Proxy {
    let state = ProxyState::default();
    let app = Router::new()
        .route("/auth", post(auth))
        .route("/event", post(event))
        .route("/rooms", get(rooms))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Proxy {
        base: Url::parse(&format!("http://{addr}/")).unwrap(),
        state,
    }
}

/// Accepted websocket plus the token the client presented.
pub struct Accepted {
    pub socket: WebSocketStream<TcpStream>,
    pub token: String,
}

pub struct FakeRoom {
    pub endpoint: Url,
    pub connections: mpsc::UnboundedReceiver<Accepted>,
}

/// Websocket acceptor that echoes the client's subprotocol, as the managed
/// chat endpoint does with the chat token.
pub async fn spawn_room() -> FakeRoom {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, connections) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let token = Arc::new(Mutex::new(String::new()));
            let seen = Arc::clone(&token);
            let callback = move |request: &Request,
                                 mut response: HandshakeResponse|
                  -> Result<HandshakeResponse, ErrorResponse> {
                if let Some(protocol) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
                    *seen.lock().unwrap() = protocol.to_str().unwrap_or_default().to_string();
                    response
                        .headers_mut()
                        .insert(SEC_WEBSOCKET_PROTOCOL, protocol.clone());
                }
                Ok(response)
            };
            let Ok(socket) = accept_hdr_async(stream, callback).await else {
                continue;
            };
            let token = token.lock().unwrap().clone();
            if tx.send(Accepted { socket, token }).is_err() {
                break;
            }
        }
    });

    FakeRoom {
        endpoint: Url::parse(&format!("ws://{addr}")).unwrap(),
        connections,
    }
}
