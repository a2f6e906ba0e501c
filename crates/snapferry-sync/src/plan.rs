//! Replication planning
//!
//! Compares each source filesystem's snapshot history with its backup's
//! history and derives the smallest list of steps that brings the backup up
//! to date. Planning is pure: it never touches the storage system, so a plan
//! can be printed, checked and thrown away without side effects.

use crate::catalog::SnapshotCatalog;
use serde::{Deserialize, Serialize};
use snapferry_types::{
    Error, Filesystem, PlanFailure, PlanFault, ReplicationStep, Result, Snapshot,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Steps planned for a single source filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemPlan {
    /// Source filesystem
    pub filesystem: Filesystem,
    /// Backup counterpart under the destination root
    pub backup_filesystem: Filesystem,
    /// Ordered replication steps
    pub steps: Vec<ReplicationStep>,
}

impl FilesystemPlan {
    /// Steps that carry a send/receive transfer, in order
    pub fn transfers(&self) -> impl Iterator<Item = &ReplicationStep> {
        self.steps.iter().filter(|step| step.is_transfer())
    }

    /// Backup filesystem this plan needs created, if any
    pub fn create_target(&self) -> Option<&Filesystem> {
        self.steps.iter().find_map(|step| match step {
            ReplicationStep::CreateFilesystem { target } => Some(target),
            _ => None,
        })
    }

    /// Planning fault, if the filesystem could not be planned
    pub fn fault(&self) -> Option<&PlanFault> {
        self.steps.iter().find_map(|step| match step {
            ReplicationStep::Error { reason } => Some(reason),
            _ => None,
        })
    }

    /// Whether the backup already matches the source
    pub fn is_up_to_date(&self) -> bool {
        self.steps == [ReplicationStep::UpToDate]
    }
}

/// Replication plan for every selected source filesystem
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    destination: String,
    filesystems: BTreeMap<Filesystem, FilesystemPlan>,
}

impl Plan {
    /// Create an empty plan for a destination root
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            filesystems: BTreeMap::new(),
        }
    }

    /// Destination root the plan replicates into
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Add or replace the plan of one filesystem
    pub fn insert(&mut self, plan: FilesystemPlan) {
        self.filesystems.insert(plan.filesystem.clone(), plan);
    }

    /// Plan of one source filesystem
    pub fn get(&self, filesystem: &Filesystem) -> Option<&FilesystemPlan> {
        self.filesystems.get(filesystem)
    }

    /// Steps planned for one source filesystem
    pub fn steps(&self, filesystem: &str) -> Option<&[ReplicationStep]> {
        self.filesystems
            .get(&Filesystem::new(filesystem))
            .map(|plan| plan.steps.as_slice())
    }

    /// Per-filesystem plans in filesystem order
    pub fn iter(&self) -> impl Iterator<Item = &FilesystemPlan> {
        self.filesystems.values()
    }

    /// Number of planned filesystems
    pub fn len(&self) -> usize {
        self.filesystems.len()
    }

    /// Whether nothing was planned
    pub fn is_empty(&self) -> bool {
        self.filesystems.is_empty()
    }

    /// Every backup filesystem that must exist before sending starts
    pub fn create_targets(&self) -> Vec<&Filesystem> {
        self.iter().filter_map(FilesystemPlan::create_target).collect()
    }

    /// Total number of send/receive transfers
    pub fn transfer_count(&self) -> usize {
        self.iter().map(|plan| plan.transfers().count()).sum()
    }

    /// Every filesystem that could not be planned
    pub fn failures(&self) -> Vec<PlanFailure> {
        self.iter()
            .filter_map(|plan| {
                plan.fault().map(|fault| PlanFailure {
                    filesystem: plan.filesystem.clone(),
                    fault: fault.clone(),
                })
            })
            .collect()
    }

    /// Refuse the whole plan if any filesystem failed planning
    ///
    /// Nothing may be created or sent while another filesystem is diverged,
    /// otherwise the destination tree ends up half updated.
    pub fn preflight(&self) -> Result<()> {
        let failures = self.failures();
        if failures.is_empty() {
            return Ok(());
        }
        for failure in &failures {
            warn!("{}", failure.to_error());
        }
        Err(Error::Preflight { failures })
    }
}

/// Plan one filesystem
///
/// `backup` is `None` when the backup filesystem does not exist yet. All
/// pending snapshots are collapsed into one incremental transfer.
pub fn build_filesystem_plan(
    backup_filesystem: &Filesystem,
    source: &[Snapshot],
    backup: Option<&[Snapshot]>,
) -> Vec<ReplicationStep> {
    let (Some(first), Some(newest)) = (source.first(), source.last()) else {
        return Vec::new();
    };

    let Some(backup) = backup else {
        let mut steps = vec![
            ReplicationStep::CreateFilesystem {
                target: backup_filesystem.clone(),
            },
            ReplicationStep::InitialSend {
                snapshot: first.clone(),
            },
        ];
        if source.len() > 1 {
            steps.push(ReplicationStep::IncrementalSend {
                from: first.clone(),
                to: newest.clone(),
            });
        }
        return steps;
    };

    let Some(last_backup) = backup.last() else {
        return vec![ReplicationStep::Error {
            reason: PlanFault::NoBackupSnapshots,
        }];
    };

    match source.iter().position(|snapshot| snapshot == last_backup) {
        None => vec![ReplicationStep::Error {
            reason: PlanFault::NotOnSource {
                snapshot: last_backup.clone(),
            },
        }],
        Some(idx) if idx + 1 == source.len() => vec![ReplicationStep::UpToDate],
        Some(idx) => vec![ReplicationStep::IncrementalSend {
            from: source[idx].clone(),
            to: newest.clone(),
        }],
    }
}

/// Plan every source filesystem against the backups under `destination`
///
/// Filesystems are planned independently of each other.
pub fn make_plans(
    sources: &SnapshotCatalog,
    backups: &SnapshotCatalog,
    destination: &str,
) -> Plan {
    let mut plan = Plan::new(destination);
    for (filesystem, history) in sources {
        let backup_filesystem = filesystem.backup_under(destination);
        let steps = build_filesystem_plan(
            &backup_filesystem,
            history,
            backups.get(&backup_filesystem).map(Vec::as_slice),
        );
        debug!("{} -> {}: {} step(s)", filesystem, backup_filesystem, steps.len());
        plan.insert(FilesystemPlan {
            filesystem: filesystem.clone(),
            backup_filesystem,
            steps,
        });
    }
    plan
}

/// Builds plans for a fixed destination root
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    destination: String,
}

impl PlanBuilder {
    /// Create a builder for a destination root
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    /// Destination root
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Plan every source filesystem and log a summary
    pub fn build(&self, sources: &SnapshotCatalog, backups: &SnapshotCatalog) -> Plan {
        let plan = make_plans(sources, backups, &self.destination);
        info!(
            "Planned {} filesystem(s): {} to create, {} transfer(s), {} failure(s)",
            plan.len(),
            plan.create_targets().len(),
            plan.transfer_count(),
            plan.failures().len()
        );
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::group;
    use proptest::prelude::*;
    use snapferry_types::SnapshotRecord;

    const DESTINATION: &str = "my/backup";

    fn catalog(entries: &[(&str, &[&str])]) -> SnapshotCatalog {
        group(entries.iter().flat_map(|(fs, snaps)| {
            snaps.iter().map(move |snap| SnapshotRecord::new(*fs, *snap))
        }))
    }

    fn catalog_with_empty(entries: &[(&str, &[&str])]) -> SnapshotCatalog {
        let mut catalog = catalog(entries);
        for (fs, snaps) in entries {
            if snaps.is_empty() {
                catalog.insert(Filesystem::new(*fs), Vec::new());
            }
        }
        catalog
    }

    fn snaps(names: &[&str]) -> Vec<Snapshot> {
        names.iter().map(|name| Snapshot::new(*name)).collect()
    }

    #[test]
    fn test_new_filesystem_single_snapshot() {
        let plan = make_plans(&catalog(&[("a", &["a1"])]), &catalog(&[]), DESTINATION);
        assert_eq!(
            plan.steps("a").unwrap(),
            &[
                ReplicationStep::CreateFilesystem {
                    target: Filesystem::new("my/backup/a")
                },
                ReplicationStep::InitialSend {
                    snapshot: Snapshot::new("a1")
                },
            ]
        );
    }

    #[test]
    fn test_new_filesystem_collapses_history() {
        let plan = make_plans(
            &catalog(&[("tank/a", &["a1", "a2", "a3", "a4"])]),
            &catalog(&[]),
            DESTINATION,
        );
        assert_eq!(
            plan.steps("tank/a").unwrap(),
            &[
                ReplicationStep::CreateFilesystem {
                    target: Filesystem::new("my/backup/a")
                },
                ReplicationStep::InitialSend {
                    snapshot: Snapshot::new("a1")
                },
                ReplicationStep::IncrementalSend {
                    from: Snapshot::new("a1"),
                    to: Snapshot::new("a4"),
                },
            ]
        );
    }

    #[test]
    fn test_diverged_history() {
        let plan = make_plans(
            &catalog(&[("a", &["a3", "a4"])]),
            &catalog(&[("my/backup/a", &["a1", "a2"])]),
            DESTINATION,
        );
        let steps = plan.steps("a").unwrap();
        assert_eq!(
            steps,
            &[ReplicationStep::Error {
                reason: PlanFault::NotOnSource {
                    snapshot: Snapshot::new("a2")
                }
            }]
        );
        assert_eq!(
            steps[0].describe(),
            "last backup snapshot [a2] is not on source :("
        );
    }

    #[test]
    fn test_up_to_date() {
        let plan = make_plans(
            &catalog(&[("a", &["a1", "a2"])]),
            &catalog(&[("my/backup/a", &["a1", "a2"])]),
            DESTINATION,
        );
        assert_eq!(plan.steps("a").unwrap(), &[ReplicationStep::UpToDate]);
        assert!(plan.get(&Filesystem::new("a")).unwrap().is_up_to_date());
    }

    #[test]
    fn test_resume_from_common_snapshot() {
        let plan = make_plans(
            &catalog(&[("a", &["a2", "a3"])]),
            &catalog(&[("my/backup/a", &["a1", "a2"])]),
            DESTINATION,
        );
        assert_eq!(
            plan.steps("a").unwrap(),
            &[ReplicationStep::IncrementalSend {
                from: Snapshot::new("a2"),
                to: Snapshot::new("a3"),
            }]
        );
    }

    #[test]
    fn test_empty_backup_history() {
        let plan = make_plans(
            &catalog(&[("tank/a", &["a1"])]),
            &catalog_with_empty(&[("my/backup/a", &[])]),
            DESTINATION,
        );
        assert_eq!(
            plan.steps("tank/a").unwrap(),
            &[ReplicationStep::Error {
                reason: PlanFault::NoBackupSnapshots
            }]
        );
    }

    #[test]
    fn test_empty_source_history() {
        let steps = build_filesystem_plan(&Filesystem::new("my/backup/a"), &[], None);
        assert!(steps.is_empty());
        let steps = build_filesystem_plan(
            &Filesystem::new("my/backup/a"),
            &[],
            Some(snaps(&["a1"]).as_slice()),
        );
        assert!(steps.is_empty());
    }

    #[test]
    fn test_pool_root_maps_to_destination() {
        let plan = make_plans(&catalog(&[("tank", &["t1"])]), &catalog(&[]), DESTINATION);
        let entry = plan.get(&Filesystem::new("tank")).unwrap();
        assert_eq!(entry.backup_filesystem.as_str(), DESTINATION);
    }

    #[test]
    fn test_preflight_collects_every_failure() {
        let plan = make_plans(
            &catalog(&[("tank/a", &["a3"]), ("tank/b", &["b1"]), ("tank/c", &["c1"])]),
            &catalog_with_empty(&[("my/backup/a", &["a1"]), ("my/backup/b", &[])]),
            DESTINATION,
        );

        let err = plan.preflight().unwrap_err();
        let Error::Preflight { failures } = err else {
            panic!("expected a preflight error");
        };
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].filesystem.as_str(), "tank/a");
        assert_eq!(failures[1].fault, PlanFault::NoBackupSnapshots);
        assert_eq!(plan.create_targets(), vec![&Filesystem::new("my/backup/c")]);
    }

    #[test]
    fn test_preflight_passes_clean_plan() {
        let plan = make_plans(
            &catalog(&[("tank/a", &["a1", "a2"]), ("tank/b", &["b1"])]),
            &catalog(&[("my/backup/a", &["a1"])]),
            DESTINATION,
        );
        assert!(plan.preflight().is_ok());
        assert_eq!(plan.transfer_count(), 2);
    }

    #[test]
    fn test_plan_serializes_steps() {
        let plan = make_plans(&catalog(&[("tank/a", &["a1"])]), &catalog(&[]), DESTINATION);
        let json = serde_json::to_value(&plan).unwrap();
        let steps = &json["filesystems"]["tank/a"]["steps"];
        assert_eq!(steps[0]["step"], "create_filesystem");
        assert_eq!(steps[0]["target"], "my/backup/a");
        assert_eq!(steps[1]["step"], "initial_send");
    }

    #[test]
    fn test_builder_uses_destination() {
        let builder = PlanBuilder::new("pool2/backups");
        let plan = builder.build(&catalog(&[("tank/x/y", &["s1"])]), &catalog(&[]));
        assert_eq!(plan.destination(), "pool2/backups");
        assert_eq!(
            plan.create_targets(),
            vec![&Filesystem::new("pool2/backups/x/y")]
        );
    }

    /// Backup history after all of a plan's transfers have been received
    fn apply(steps: &[ReplicationStep], backup: Option<Vec<Snapshot>>) -> Option<Vec<Snapshot>> {
        let mut history = backup;
        for step in steps {
            match step {
                ReplicationStep::CreateFilesystem { .. } => {
                    history.get_or_insert_with(Vec::new);
                }
                ReplicationStep::InitialSend { snapshot } => {
                    history.get_or_insert_with(Vec::new).push(snapshot.clone());
                }
                ReplicationStep::IncrementalSend { to, .. } => {
                    history.get_or_insert_with(Vec::new).push(to.clone());
                }
                ReplicationStep::UpToDate | ReplicationStep::Error { .. } => {}
            }
        }
        history
    }

    proptest! {
        #[test]
        fn test_replanning_after_apply_is_up_to_date(
            source_len in 1usize..8,
            backup_prefix in prop::option::of(0usize..8),
        ) {
            let source: Vec<Snapshot> =
                (0..source_len).map(|i| Snapshot::new(format!("s{}", i))).collect();
            let backup = backup_prefix.map(|n| source[..=n.min(source_len - 1)].to_vec());
            let target = Filesystem::new("my/backup/a");

            let steps = build_filesystem_plan(&target, &source, backup.as_deref());
            prop_assert!(!steps.is_empty());
            prop_assert!(steps.iter().all(|step| !step.is_error()));
            let create_count = steps.iter().filter(|s| matches!(s, ReplicationStep::CreateFilesystem { .. })).count();
            prop_assert!(create_count <= 1);

            let applied = apply(&steps, backup);
            let replanned = build_filesystem_plan(&target, &source, applied.as_deref());
            prop_assert_eq!(replanned, vec![ReplicationStep::UpToDate]);
        }

        #[test]
        fn test_new_filesystem_shape(source_len in 1usize..10) {
            let source: Vec<Snapshot> =
                (0..source_len).map(|i| Snapshot::new(format!("s{}", i))).collect();
            let steps = build_filesystem_plan(&Filesystem::new("b/a"), &source, None);
            prop_assert_eq!(steps.len(), if source_len > 1 { 3 } else { 2 });
            prop_assert_eq!(
                &steps[1],
                &ReplicationStep::InitialSend { snapshot: source[0].clone() }
            );
        }

        #[test]
        fn test_unknown_backup_snapshot_is_error(name in "[a-z]{1,8}") {
            let source = snaps(&["s0", "s1"]);
            let backup = vec![Snapshot::new(format!("x-{}", name))];
            let steps = build_filesystem_plan(&Filesystem::new("b/a"), &source, Some(backup.as_slice()));
            prop_assert_eq!(steps.len(), 1);
            let expected = format!("[x-{}]", name);
            prop_assert!(steps[0].describe().contains(&expected));
        }
    }
}
