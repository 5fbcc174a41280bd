/**
 * FICHIERS D'EXÉCUTION - pid, base, journal
 *
 * Reproduit les artefacts qu'un nœud DDN laisse dans son répertoire :
 * `ddn.pid`, `db/blockchain.db`, `logs/debug.log`. ddn-peers les supprime
 * avec `clean`, les tests vérifient qu'ils existent.
 */

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

pub const PID_FILE: &str = "ddn.pid";
pub const BLOCKCHAIN_DB: &str = "db/blockchain.db";
pub const DEBUG_LOG: &str = "logs/debug.log";
pub const MAIN_LOG: &str = "logs/main.log";

#[derive(Debug, Clone)]
pub struct RuntimeFiles {
    dir: PathBuf,
}

impl RuntimeFiles {
    pub fn new(dir: &Path) -> Self {
        Self { dir: dir.to_path_buf() }
    }

    /// Écrit le pid et crée la base et les journaux
    pub fn open(&self, pid: u32) -> std::io::Result<()> {
        fs::create_dir_all(self.dir.join("db"))?;
        fs::create_dir_all(self.dir.join("logs"))?;
        fs::write(self.dir.join(PID_FILE), pid.to_string())?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(BLOCKCHAIN_DB))?;
        Ok(())
    }

    /// Ajoute une ligne horodatée à `logs/debug.log`
    pub fn debug_log(&self, line: &str) -> std::io::Result<()> {
        let stamp = OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(DEBUG_LOG))?;
        writeln!(file, "[{stamp}] {line}")
    }

    pub fn remove_pid(&self) {
        fs::remove_file(self.dir.join(PID_FILE)).ok();
    }

    pub fn main_log(&self) -> PathBuf {
        self.dir.join(MAIN_LOG)
    }
}
