//! Fleet-wide start, stop, clean and inspection
//!
//! Peers are handled one at a time in index order. A peer's failure is
//! recorded and the loop moves on, except for fatal errors (see
//! [`PeerError::is_fatal`]) which abort the invocation.

use crate::document::ConfigDocument;
use crate::error::{PeerError, Result};
use crate::health::{Freshness, HealthChecker};
use crate::marker::{PreparationState, PreparedMarker};
use crate::proc_table;
use crate::process::{ProcessLifecycleController, StopOutcome, StopPolicy};
use crate::secrets::SecretPool;
use crate::settings::Settings;
use crate::topology::{FleetTopology, PeerIdentity};
use crate::workspace::{ArtifactFile, CleanScope, FleetLayout, Seeding};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// Which peers a command applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSelection {
    All,
    /// The peer owning this HTTP port
    Single(u16),
}

impl PeerSelection {
    pub fn from_port(port: Option<u16>) -> Self {
        port.map_or(PeerSelection::All, PeerSelection::Single)
    }
}

/// What `clean` removes from each peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanTarget {
    Scope(CleanScope),
    File(ArtifactFile),
}

/// Per-peer results of one fleet command
#[derive(Debug)]
pub struct FleetReport<T> {
    pub outcomes: Vec<(PeerIdentity, Result<T>)>,
}

impl<T> FleetReport<T> {
    fn new() -> Self {
        Self { outcomes: Vec::new() }
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&PeerIdentity, &PeerError)> {
        self.outcomes
            .iter()
            .filter_map(|(peer, r)| r.as_ref().err().map(|e| (peer, e)))
    }
}

/// What happened to a peer's config document during `start`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preparation {
    /// Ports, peer list and shard written; marker set
    Prepared { secrets: usize },
    /// Marker present, document left untouched
    AlreadyPrepared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerStarted {
    pub seeding: Seeding,
    pub preparation: Preparation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCleaned {
    pub removed: Vec<PathBuf>,
    pub marker_cleared: bool,
}

/// Why a peer is or is not healthy, cheapest checks first
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerHealth {
    DirectoryMissing(PathBuf),
    NotRunning,
    /// Only the P2P port answers
    HttpDown { p2p_port: u16 },
    Api(Freshness),
}

impl PeerHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, PeerHealth::Api(f) if f.is_fresh())
    }
}

impl fmt::Display for PeerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerHealth::DirectoryMissing(dir) => write!(f, "peer directory {} missing", dir.display()),
            PeerHealth::NotRunning => f.write_str("not running (neither HTTP nor P2P port bound)"),
            PeerHealth::HttpDown { p2p_port } => {
                write!(f, "HTTP port down while P2P port {p2p_port} is bound")
            }
            PeerHealth::Api(freshness) => freshness.fmt(f),
        }
    }
}

/// Drives every peer of one fleet
#[derive(Debug)]
pub struct FleetSupervisor {
    topology: FleetTopology,
    layout: FleetLayout,
    settings: Settings,
    checker: HealthChecker,
}

impl FleetSupervisor {
    pub fn new(settings: Settings, layout: FleetLayout) -> Result<Self> {
        let topology = settings.topology()?;
        let checker = HealthChecker::new(&settings.health)
            .map_err(|e| PeerError::Settings(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            topology,
            layout,
            settings,
            checker,
        })
    }

    pub fn topology(&self) -> &FleetTopology {
        &self.topology
    }

    pub fn layout(&self) -> &FleetLayout {
        &self.layout
    }

    pub fn checker(&self) -> &HealthChecker {
        &self.checker
    }

    pub fn select(&self, selection: PeerSelection) -> Result<Vec<PeerIdentity>> {
        match selection {
            PeerSelection::All => Ok(self.topology.peers().collect()),
            PeerSelection::Single(port) => Ok(vec![self.topology.peer_for_http_port(port)?]),
        }
    }

    fn controller(&self, peer: PeerIdentity) -> ProcessLifecycleController {
        ProcessLifecycleController::new(
            peer,
            self.layout.peer_dir(&peer),
            self.settings.launch.clone(),
            StopPolicy::from(&self.settings.stop),
        )
    }

    /// Fleet-wide secret pool: the configured pool file, else the template
    /// document's secrets. `None` lets each peer fall back to its own
    /// document on first preparation.
    pub fn load_pool(&self) -> Result<Option<SecretPool>> {
        if let Some(file) = &self.settings.paths.secrets_file {
            let pool = SecretPool::load(file)?;
            info!(file = %file.display(), secrets = pool.len(), "loaded secret pool");
            return Ok(Some(pool));
        }
        let template = self.layout.template_config(self.topology.project());
        match ConfigDocument::load(&template) {
            Ok(doc) => {
                let secrets = doc.secrets();
                if secrets.is_empty() {
                    return Ok(None);
                }
                info!(file = %template.display(), secrets = secrets.len(), "using template secret pool");
                Ok(Some(SecretPool::new(secrets)))
            }
            Err(PeerError::ConfigNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Start the selected peers.
    ///
    /// Per peer: claim ports, seed the directory, prepare the config document
    /// once, launch and wait for health. Only fatal errors end the loop early.
    pub async fn start(&self, force: bool, use_genesis: bool, selection: PeerSelection) -> Result<FleetReport<PeerStarted>> {
        let peers = self.select(selection)?;
        let pool = self.load_pool()?;
        info!(
            peers = peers.len(),
            project = %self.topology.project(),
            force,
            "starting fleet"
        );

        let mut report = FleetReport::new();
        for peer in peers {
            let result = match self.start_peer(peer, force, use_genesis, pool.as_ref()).await {
                Err(e) if e.is_fatal() => {
                    error!(peer = peer.index, port = peer.http_port, "aborting start: {e}");
                    return Err(e);
                }
                result => result,
            };
            match &result {
                Ok(started) => info!(peer = peer.index, port = peer.http_port, ?started, "peer started"),
                Err(e) => warn!(peer = peer.index, port = peer.http_port, "{e}"),
            }
            report.outcomes.push((peer, result));
        }
        Ok(report)
    }

    async fn start_peer(
        &self,
        peer: PeerIdentity,
        force: bool,
        use_genesis: bool,
        pool: Option<&SecretPool>,
    ) -> Result<PeerStarted> {
        let mut controller = self.controller(peer);
        controller.claim_ports(force).await?;

        let seeding = self.layout.seed_peer_dir(self.topology.project(), &peer, force)?;
        let preparation = self.prepare_config(peer, use_genesis, pool)?;

        controller.launch().await?;
        controller
            .await_health(&self.checker, self.settings.health.max_retries)
            .await?;
        Ok(PeerStarted { seeding, preparation })
    }

    /// Write ports, peer list and secret shard into the peer's document,
    /// unless its marker says this already happened.
    pub fn prepare_config(&self, peer: PeerIdentity, use_genesis: bool, pool: Option<&SecretPool>) -> Result<Preparation> {
        let peer_dir = self.layout.peer_dir(&peer);
        let marker = PreparedMarker::in_dir(&peer_dir);
        if marker.state() == PreparationState::Prepared {
            debug!(peer = peer.index, "config already prepared, leaving it untouched");
            return Ok(Preparation::AlreadyPrepared);
        }

        let path = self.layout.config_path(&peer);
        let mut doc = ConfigDocument::load_or_create(&path, &self.topology, peer, use_genesis)?;

        let own_pool;
        let pool = match pool {
            Some(pool) => pool,
            None => {
                own_pool = SecretPool::new(doc.secrets());
                &own_pool
            }
        };
        let shard = pool.shard_for(self.topology.peer_count(), peer.index)?;

        doc.apply_ports(&self.topology, peer);
        doc.apply_peer_list(&self.topology, peer.index);
        doc.apply_secret_shard(&shard, pool);
        if use_genesis {
            doc.apply_genesis();
        }
        doc.persist(&path)?;
        marker.mark()?;

        if shard.count == 0 {
            warn!(peer = peer.index, port = peer.http_port, "secret pool is empty, peer gets no forging secrets");
        }
        info!(
            peer = peer.index,
            port = peer.http_port,
            secrets = shard.count,
            start = shard.start,
            end = shard.end,
            "config prepared"
        );
        Ok(Preparation::Prepared { secrets: shard.count })
    }

    /// Stop the selected peers; every peer is attempted.
    pub async fn stop(&self, force: bool, selection: PeerSelection) -> Result<FleetReport<StopOutcome>> {
        let peers = self.select(selection)?;
        let mut report = FleetReport::new();
        for peer in peers {
            let result = self.controller(peer).stop(force).await;
            match &result {
                Ok(StopOutcome::NothingToStop) => info!(peer = peer.index, port = peer.http_port, "nothing to stop"),
                Ok(StopOutcome::Stopped { pid, forced, .. }) => {
                    info!(peer = peer.index, port = peer.http_port, pid, forced, "peer stopped")
                }
                Err(e) => warn!(peer = peer.index, port = peer.http_port, "{e}"),
            }
            report.outcomes.push((peer, result));
        }
        Ok(report)
    }

    /// Remove the marker and the targeted artifacts of stopped peers.
    pub async fn clean(&self, target: CleanTarget, selection: PeerSelection) -> Result<FleetReport<PeerCleaned>> {
        let peers = self.select(selection)?;
        let mut report = FleetReport::new();
        for peer in peers {
            let result = self.clean_peer(peer, target).await;
            match &result {
                Ok(cleaned) => info!(
                    peer = peer.index,
                    port = peer.http_port,
                    removed = cleaned.removed.len(),
                    "peer cleaned"
                ),
                Err(e) => warn!(peer = peer.index, port = peer.http_port, "{e}"),
            }
            report.outcomes.push((peer, result));
        }
        Ok(report)
    }

    async fn clean_peer(&self, peer: PeerIdentity, target: CleanTarget) -> Result<PeerCleaned> {
        for port in [peer.http_port, peer.p2p_port] {
            if proc_table::is_port_bound(port).await {
                return Err(PeerError::PeerRunning { port });
            }
        }

        let marker_cleared = PreparedMarker::in_dir(&self.layout.peer_dir(&peer)).clear()?;
        let removed = match target {
            CleanTarget::Scope(scope) => self.layout.remove_artifacts(&peer, scope)?,
            CleanTarget::File(file) => self.layout.remove_artifact(&peer, file)?.into_iter().collect(),
        };
        Ok(PeerCleaned {
            removed,
            marker_cleared,
        })
    }

    /// Classify one peer for the monitor.
    pub async fn inspect(&self, peer: PeerIdentity) -> PeerHealth {
        let dir = self.layout.peer_dir(&peer);
        if !dir.is_dir() {
            return PeerHealth::DirectoryMissing(dir);
        }
        let http = proc_table::is_port_bound(peer.http_port).await;
        let p2p = proc_table::is_port_bound(peer.p2p_port).await;
        match (http, p2p) {
            (false, false) => PeerHealth::NotRunning,
            (false, true) => PeerHealth::HttpDown {
                p2p_port: peer.p2p_port,
            },
            _ => PeerHealth::Api(self.checker.check_freshness(peer.http_port).await),
        }
    }

    /// Number of peers answering their status endpoint within `retries` attempts
    pub async fn count_live(&self, retries: u32) -> usize {
        let mut live = 0;
        for peer in self.topology.peers() {
            if self.checker.check_liveness(peer.http_port, retries).await {
                live += 1;
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ProjectType;

    fn supervisor(root: &std::path::Path, peer_count: u32) -> FleetSupervisor {
        let mut settings = Settings::default();
        settings.fleet.peer_count = peer_count;
        settings.fleet.project = ProjectType::FunTests;
        FleetSupervisor::new(settings, FleetLayout::new(root)).unwrap()
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    fn single_peer_supervisor(root: &std::path::Path, http: u16, p2p: u16) -> FleetSupervisor {
        let mut settings = Settings::default();
        settings.fleet.base_port = http;
        settings.fleet.p2p_base_port = p2p;
        settings.fleet.peer_count = 1;
        FleetSupervisor::new(settings, FleetLayout::new(root)).unwrap()
    }

    fn write_template(root: &std::path::Path, secrets: usize) {
        let sup = supervisor(root, 1);
        let peer = sup.topology().allocate(1).unwrap();
        let mut doc = ConfigDocument::fresh(sup.topology(), peer, false);
        let pool = SecretPool::new((0..secrets).map(|i| format!("secret {i}")).collect());
        doc.apply_secret_shard(&pool.shard_for(1, 1).unwrap(), &pool);
        let path = sup.layout().template_config(ProjectType::FunTests);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        doc.persist(&path).unwrap();
    }

    #[test]
    fn selects_single_peer_by_http_port() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), 5);
        assert_eq!(sup.select(PeerSelection::All).unwrap().len(), 5);
        let single = sup.select(PeerSelection::Single(8004)).unwrap();
        assert_eq!(single[0].index, 4);
        assert!(matches!(
            sup.select(PeerSelection::Single(8006)),
            Err(PeerError::PortOutOfRange { port: 8006, .. })
        ));
    }

    #[test]
    fn prepares_each_peer_with_its_own_shard() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), 24);
        let sup = supervisor(dir.path(), 5);
        let pool = sup.load_pool().unwrap().unwrap();
        assert_eq!(pool.len(), 24);

        let mut total = 0;
        for peer in sup.topology().peers() {
            sup.layout().seed_peer_dir(ProjectType::FunTests, &peer, false).unwrap();
            let prepared = sup.prepare_config(peer, false, Some(&pool)).unwrap();
            let Preparation::Prepared { secrets } = prepared else {
                panic!("expected a fresh preparation, got {prepared:?}");
            };
            total += secrets;

            let doc = ConfigDocument::load(&sup.layout().config_path(&peer)).unwrap();
            assert_eq!(doc.http_port(), Some(peer.http_port));
            assert_eq!(doc.peer_list().len(), 4);
        }
        assert_eq!(total, 24);

        let last = sup.topology().allocate(5).unwrap();
        let doc = ConfigDocument::load(&sup.layout().config_path(&last)).unwrap();
        assert_eq!(doc.secrets(), ["secret 20", "secret 21", "secret 22", "secret 23"]);
    }

    #[test]
    fn second_preparation_leaves_document_untouched() {
        let dir = tempfile::tempdir().unwrap();
        write_template(dir.path(), 10);
        let sup = supervisor(dir.path(), 3);
        let peer = sup.topology().allocate(2).unwrap();
        sup.layout().seed_peer_dir(ProjectType::FunTests, &peer, false).unwrap();

        sup.prepare_config(peer, false, None).unwrap();
        let path = sup.layout().config_path(&peer);
        let first = std::fs::read(&path).unwrap();

        assert_eq!(sup.prepare_config(peer, false, None).unwrap(), Preparation::AlreadyPrepared);
        assert_eq!(std::fs::read(&path).unwrap(), first);
    }

    #[test]
    fn empty_pool_is_a_terminal_zero_secret_shard() {
        let dir = tempfile::tempdir().unwrap();
        let sup = supervisor(dir.path(), 2);
        assert!(sup.load_pool().unwrap().is_none());

        let peer = sup.topology().allocate(1).unwrap();
        sup.layout().seed_peer_dir(ProjectType::FunTests, &peer, false).unwrap();
        assert_eq!(
            sup.prepare_config(peer, true, None).unwrap(),
            Preparation::Prepared { secrets: 0 }
        );
        let marker = PreparedMarker::in_dir(&sup.layout().peer_dir(&peer));
        assert_eq!(marker.state(), PreparationState::Prepared);
        let doc = ConfigDocument::load(&sup.layout().config_path(&peer)).unwrap();
        assert!(doc.secrets().is_empty());
        assert!(doc.get("genesis").is_some());
    }

    #[tokio::test]
    async fn clean_refuses_running_peer_and_clears_stopped_one() {
        let dir = tempfile::tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let busy = listener.local_addr().unwrap().port();

        let sup = single_peer_supervisor(dir.path(), busy, free_port());
        let peer = sup.topology().allocate(1).unwrap();
        sup.layout().seed_peer_dir(ProjectType::FunTests, &peer, false).unwrap();
        PreparedMarker::in_dir(&sup.layout().peer_dir(&peer)).mark().unwrap();

        let report = sup.clean(CleanTarget::Scope(CleanScope::All), PeerSelection::All).await.unwrap();
        assert!(matches!(report.outcomes[0].1, Err(PeerError::PeerRunning { port }) if port == busy));
        assert!(PreparedMarker::in_dir(&sup.layout().peer_dir(&peer)).path().exists());

        drop(listener);
        let report = sup.clean(CleanTarget::File(ArtifactFile::Debug), PeerSelection::All).await.unwrap();
        let cleaned = report.outcomes[0].1.as_ref().unwrap();
        assert!(cleaned.marker_cleared);
        assert!(cleaned.removed.is_empty());
    }

    #[tokio::test]
    async fn inspect_reports_missing_directory_and_idle_peer() {
        let dir = tempfile::tempdir().unwrap();
        let sup = single_peer_supervisor(dir.path(), free_port(), free_port());
        let peer = sup.topology().allocate(1).unwrap();

        assert!(matches!(sup.inspect(peer).await, PeerHealth::DirectoryMissing(_)));
        sup.layout().seed_peer_dir(ProjectType::FunTests, &peer, false).unwrap();
        let health = sup.inspect(peer).await;
        assert_eq!(health, PeerHealth::NotRunning);
        assert!(!health.is_healthy());
    }
}
