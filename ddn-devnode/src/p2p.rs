/**
 * PORT P2P - Écoute TCP minimale
 *
 * Le nœud de développement ne parle aucun protocole P2P : il occupe le port
 * pour que la découverte par port (arrêt, monitor) voie un vrai nœud.
 * Les connexions sont acceptées puis fermées.
 */

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub fn spawn_p2p_listener(listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tracing::debug!("p2p connection from {peer}");
                    drop(stream);
                }
                Err(e) => {
                    tracing::warn!("p2p accept failed: {e}");
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    })
}
