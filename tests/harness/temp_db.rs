use std::path::PathBuf;

use stakerunner::adapter::outbound::sqlite::SqliteLedger;
use tempfile::TempDir;

/// Temporary SQLite database file for integration tests.
///
/// The file lives in its own directory, removed on drop.
pub struct TempDb {
    _dir: TempDir,
    path: PathBuf,
}

impl TempDb {
    pub fn create(name: &str) -> Self {
        let dir = tempfile::Builder::new()
            .prefix("stakerunner-")
            .tempdir()
            .expect("create temp dir");
        let path = dir.path().join(format!("{name}.db"));
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &str {
        self.path.to_str().expect("utf-8 temp path")
    }

    /// Open (and migrate) a ledger on this file.
    pub fn ledger(&self) -> SqliteLedger {
        SqliteLedger::open(self.path()).expect("open sqlite ledger")
    }
}
