//! Shared helpers for building jobs and inspecting runs

use crate::fake_zfs::FakeZfs;
use snapferry_config::{Config, ConfigBuilder, ConfigResult, FileFormat};
use snapferry_engine::{BackupEngine, ExecutionReport};
use snapferry_sync::SnapshotCatalog;
use snapferry_types::{Filesystem, Snapshot};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Job replicating `sources` into `destination` with default settings
pub fn job(sources: &[&str], destination: &str) -> Config {
    Config {
        sources: sources.iter().map(|s| (*s).to_string()).collect(),
        destination: Some(destination.to_string()),
        ..Config::default()
    }
}

/// Engine driving `fake`, which stays inspectable through the returned handle
pub fn engine(config: Config, fake: FakeZfs) -> (BackupEngine<Arc<FakeZfs>>, Arc<FakeZfs>) {
    let fake = Arc::new(fake);
    (BackupEngine::new(config, Arc::clone(&fake)), fake)
}

/// Catalog from `(filesystem, snapshots)` pairs
pub fn catalog(entries: &[(&str, &[&str])]) -> SnapshotCatalog {
    entries
        .iter()
        .map(|(filesystem, snapshots)| {
            (
                Filesystem::new(*filesystem),
                snapshots.iter().map(|s| Snapshot::new(*s)).collect(),
            )
        })
        .collect()
}

/// Write `content` to a config file named `name` inside a fresh directory
pub fn write_config(name: &str, content: &str) -> std::io::Result<(TempDir, PathBuf)> {
    let dir = TempDir::new()?;
    let path = dir.path().join(name);
    std::fs::write(&path, content)?;
    Ok((dir, path))
}

/// Load a job from TOML text, skipping environment overrides
pub fn job_from_toml(content: &str) -> ConfigResult<Config> {
    ConfigBuilder::new()
        .add_source_str(content, FileFormat::Toml)
        .build()
}

/// Task ids of every executed step, chain by chain
pub fn task_ids(report: &ExecutionReport) -> Vec<Vec<u64>> {
    report
        .chains
        .iter()
        .map(|chain| chain.steps.iter().map(|step| step.task_id.get()).collect())
        .collect()
}
