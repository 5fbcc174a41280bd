/**
 * API HTTP DU NŒUD - Sous-ensemble de l'API d'un nœud DDN
 *
 * ROUTES :
 * - GET /api/blocks/getstatus : hauteur, horodatage du dernier bloc, nethash
 * - GET /api/peers            : liste de peers du document de configuration
 *
 * C'est ce que ddn-peers interroge pour la vivacité et la fraîcheur.
 */

use crate::config::NodeConfig;
use crate::state::{ChainState, Shared};
use axum::{extract::State, routing::get, Json, Router};
use ddn_peers::document::PeerEntry;
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub chain: Shared<ChainState>,
    pub config: Arc<NodeConfig>,
}

#[derive(Debug, Serialize)]
struct StatusView {
    success: bool,
    height: u64,
    #[serde(rename = "blockTime")]
    block_time: i64,
    nethash: String,
    forging: usize,
}

#[derive(Debug, Serialize)]
struct PeersView {
    success: bool,
    peers: Vec<PeerEntry>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/blocks/getstatus", get(get_status))
        .route("/api/peers", get(get_peers))
        .with_state(state)
}

async fn get_status(State(state): State<AppState>) -> Json<StatusView> {
    let chain = state.chain.lock().clone();
    Json(StatusView {
        success: true,
        height: chain.height,
        block_time: chain.block_time(),
        nethash: state.config.nethash.clone(),
        forging: state.config.forging_secrets,
    })
}

async fn get_peers(State(state): State<AppState>) -> Json<PeersView> {
    Json(PeersView {
        success: true,
        peers: state.config.peers.clone(),
    })
}
