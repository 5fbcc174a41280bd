/*!
Stub de l'endpoint de statut d'un nœud DDN

Serveur axum minimal qui répond sur `/api/blocks/getstatus` selon un mode
scripté, pour tester la santé des peers sans lancer de vrai nœud.
*/

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

pub const STATUS_PATH: &str = "/api/blocks/getstatus";

/// Réponse servie par le stub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StubMode {
    /// Dernier bloc produit il y a quelques secondes
    Fresh { height: u64 },
    /// Dernier bloc produit il y a `age_secs` secondes
    Stale { height: u64, age_secs: i64 },
    /// Corps non JSON
    Garbage,
    /// 200 avec corps vide
    Empty,
    /// 500 Internal Server Error
    Error,
}

#[derive(Clone)]
struct StubState {
    mode: Arc<Mutex<StubMode>>,
    requests: Arc<AtomicUsize>,
}

/// Endpoint de statut en écoute sur 127.0.0.1
pub struct StatusStub {
    addr: SocketAddr,
    state: StubState,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl StatusStub {
    /// Démarre sur un port libre choisi par l'OS
    pub async fn start(mode: StubMode) -> Result<Self> {
        Self::start_on(0, mode).await
    }

    /// Démarre sur un port précis (ex: le port HTTP d'un peer)
    pub async fn start_on(port: u16, mode: StubMode) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        let addr = listener.local_addr()?;
        let state = StubState {
            mode: Arc::new(Mutex::new(mode)),
            requests: Arc::new(AtomicUsize::new(0)),
        };

        let app = Router::new()
            .route(STATUS_PATH, get(status))
            .with_state(state.clone());

        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async {
                rx.await.ok();
            });
            if let Err(e) = server.await {
                tracing::warn!("⚠️ status stub stopped: {}", e);
            }
        });

        tracing::debug!("🧪 status stub listening on {}", addr);
        Ok(Self {
            addr,
            state,
            shutdown: Some(tx),
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn url(&self) -> String {
        format!("http://{}{}", self.addr, STATUS_PATH)
    }

    pub fn set_mode(&self, mode: StubMode) {
        *self.state.mode.lock() = mode;
    }

    /// Nombre de requêtes reçues depuis le démarrage
    pub fn requests(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Arrête le serveur et attend la libération du port
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            tx.send(()).ok();
        }
        (&mut self.task).await.ok();
    }
}

impl Drop for StatusStub {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn status(State(state): State<StubState>) -> Response {
    state.requests.fetch_add(1, Ordering::SeqCst);
    let now = chrono::Utc::now().timestamp();
    let mode = state.mode.lock().clone();
    match mode {
        StubMode::Fresh { height } => Json(json!({
            "success": true,
            "height": height,
            "blockTime": now - 5,
        }))
        .into_response(),
        StubMode::Stale { height, age_secs } => Json(json!({
            "success": true,
            "height": height,
            "blockTime": now - age_secs,
        }))
        .into_response(),
        StubMode::Garbage => (StatusCode::OK, "<html>not a node</html>").into_response(),
        StubMode::Empty => (StatusCode::OK, "").into_response(),
        StubMode::Error => (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response(),
    }
}
