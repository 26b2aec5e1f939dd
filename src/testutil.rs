//! In-process HTTP fixtures shared by the test modules.

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{StatusCode, Uri},
    routing::any,
    Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alerts::{ChannelError, Mail, MailTransport};

#[derive(Clone, Default)]
struct Recorded {
    hits: Arc<Mutex<HashMap<String, usize>>>,
    bodies: Arc<Mutex<Vec<String>>>,
}

/// Local server answering `/status/{code}` (any method) with that status code
/// and `/delay/{ms}` with 200 after sleeping, counting hits per path and keeping
/// request bodies.
pub struct TestServer {
    addr: SocketAddr,
    recorded: Recorded,
}

impl TestServer {
    pub async fn start() -> Self {
        let recorded = Recorded::default();
        let app = Router::new()
            .route("/status/{code}", any(respond))
            .route("/delay/{ms}", any(respond_slowly))
            .with_state(recorded.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, recorded }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.recorded.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> usize {
        self.recorded.hits.lock().unwrap().values().sum()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.recorded.bodies.lock().unwrap().clone()
    }
}

async fn respond(
    State(recorded): State<Recorded>,
    Path(code): Path<u16>,
    uri: Uri,
    body: String,
) -> StatusCode {
    *recorded
        .hits
        .lock()
        .unwrap()
        .entry(uri.path().to_string())
        .or_insert(0) += 1;
    recorded.bodies.lock().unwrap().push(body);
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn respond_slowly(
    State(recorded): State<Recorded>,
    Path(ms): Path<u64>,
    uri: Uri,
) -> StatusCode {
    *recorded
        .hits
        .lock()
        .unwrap()
        .entry(uri.path().to_string())
        .or_insert(0) += 1;
    tokio::time::sleep(Duration::from_millis(ms)).await;
    StatusCode::OK
}

/// A URL on a local port nothing listens on.
pub async fn closed_port_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/", addr)
}

/// Mail transport that keeps delivered mail in memory.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Mail>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn sent(&self) -> Vec<Mail> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    async fn deliver(&self, mail: &Mail) -> Result<(), ChannelError> {
        if self.fail {
            return Err(ChannelError::Mail("relay refused".to_string()));
        }
        self.sent.lock().unwrap().push(mail.clone());
        Ok(())
    }
}
