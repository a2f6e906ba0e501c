//! Mountpoint reconciliation
//!
//! A received filesystem is mounted relative to its pool's altroot. After a
//! run, each backup filesystem is pointed at its source's mountpoint so that
//! the backup can stand in for the source when imported elsewhere.

use crate::zfs::Zfs;
use snapferry_types::{CommandRunner, Filesystem, MountpointRecord, Result};
use std::collections::HashMap;
use tracing::{debug, info};

/// Remove `altroot` from the front of `mountpoint`
///
/// The altroot only matches on a path boundary. An empty remainder is the
/// root directory. A mountpoint outside the altroot is returned unchanged.
pub fn strip_altroot(mountpoint: &str, altroot: &str) -> String {
    let altroot = altroot.trim_end_matches('/');
    let stripped = match mountpoint.strip_prefix(altroot) {
        Some(rest) if !altroot.is_empty() && (rest.is_empty() || rest.starts_with('/')) => rest,
        _ => mountpoint,
    };
    if stripped.is_empty() {
        "/".to_string()
    } else {
        stripped.to_string()
    }
}

/// A mountpoint change applied to a backup filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reassignment {
    /// Backup filesystem
    pub filesystem: Filesystem,
    /// Mountpoint before, altroot stripped
    pub previous: Option<String>,
    /// Mountpoint it now has
    pub mountpoint: String,
}

/// Points backup filesystems at their sources' mountpoints
pub struct MountpointReconciler<'a, R> {
    zfs: &'a Zfs<R>,
    altroots: HashMap<String, String>,
}

impl<'a, R: CommandRunner> MountpointReconciler<'a, R> {
    /// Create a reconciler with an empty altroot cache
    pub fn new(zfs: &'a Zfs<R>) -> Self {
        Self {
            zfs,
            altroots: HashMap::new(),
        }
    }

    /// Altroot of the pool `filesystem` lives in, looked up once per pool
    pub async fn altroot(&mut self, filesystem: &Filesystem) -> Result<&str> {
        let pool = filesystem.pool().to_string();
        if !self.altroots.contains_key(&pool) {
            let altroot = self.zfs.get_altroot(&pool).await?;
            debug!("Pool {} altroot: {:?}", pool, altroot);
            self.altroots.insert(pool.clone(), altroot);
        }
        Ok(self.altroots.get(&pool).map_or("", String::as_str))
    }

    /// Mountpoints of `filesystems` with their pool's altroot removed
    pub async fn effective_mountpoints(
        &mut self,
        filesystems: &[Filesystem],
    ) -> Result<HashMap<Filesystem, String>> {
        let records = self.zfs.get_mountpoints(filesystems).await?;
        let mut mountpoints = HashMap::with_capacity(records.len());
        for MountpointRecord {
            filesystem,
            mountpoint,
        } in records
        {
            let Some(mountpoint) = mountpoint else {
                continue;
            };
            let altroot = self.altroot(&filesystem).await?;
            let mountpoint = strip_altroot(&mountpoint, altroot);
            mountpoints.insert(filesystem, mountpoint);
        }
        Ok(mountpoints)
    }

    /// Point each backup of a mounted source at the source's mountpoint
    ///
    /// `backups` are the backup filesystems that existed before the run;
    /// ones created by the run have no mountpoint to compare and are always
    /// assigned.
    pub async fn reconcile(
        &mut self,
        sources: &[Filesystem],
        backups: &[Filesystem],
        destination: &str,
    ) -> Result<Vec<Reassignment>> {
        let backup_mountpoints = self.effective_mountpoints(backups).await?;
        let source_mountpoints = self.zfs.get_mountpoints(sources).await?;

        let mut reassigned = Vec::new();
        for record in source_mountpoints {
            let Some(mountpoint) = record.mountpoint else {
                continue;
            };
            let backup = record.filesystem.backup_under(destination);
            let previous = backup_mountpoints.get(&backup).cloned();
            if previous.as_deref() == Some(mountpoint.as_str()) {
                continue;
            }

            info!("setting mountpoint of {} to {}", backup, mountpoint);
            self.zfs.set_mountpoint(&backup, &mountpoint).await?;
            reassigned.push(Reassignment {
                filesystem: backup,
                previous,
                mountpoint,
            });
        }

        debug!("Reassigned {} mountpoints", reassigned.len());
        Ok(reassigned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/mnt/backup/home", "/mnt/backup", "/home")]
    #[case("/mnt/backup", "/mnt/backup", "/")]
    #[case("/mnt/backup/", "/mnt/backup", "/")]
    #[case("/home", "", "/home")]
    #[case("/home", "/", "/home")]
    #[case("/srv/data", "/mnt/backup", "/srv/data")]
    #[case("/mnt/backupx/home", "/mnt/backup", "/mnt/backupx/home")]
    #[case("/mnt/backup/home", "/mnt/backup/", "/home")]
    fn test_strip_altroot(#[case] mountpoint: &str, #[case] altroot: &str, #[case] expected: &str) {
        assert_eq!(strip_altroot(mountpoint, altroot), expected);
    }
}
