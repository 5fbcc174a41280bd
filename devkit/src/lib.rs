/*!
# DDN Peers DevKit - Stubs et utilitaires de test

Bibliothèque facilitant les tests de la gestion de flotte avec:
- Stub de l'endpoint de statut d'un nœud (frais, bloqué, illisible...)
- Bac à sable de répertoires de flotte avec template et pool de secrets
- Allocation de plages de ports libres
*/

pub mod ports;
pub mod sandbox;
pub mod status_stub;

pub use ports::{free_port, free_port_block};
pub use sandbox::FleetSandbox;
pub use status_stub::{StatusStub, StubMode};

/// Init logging pour tests (idempotent)
pub fn init_test_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("ddn_peers=debug")),
        )
        .with_test_writer()
        .try_init()
        .ok();
}
