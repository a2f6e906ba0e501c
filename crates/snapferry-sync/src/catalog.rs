//! Grouping of raw snapshot observations into per-filesystem histories

use snapferry_types::{Filesystem, SnapshotHistory, SnapshotRecord};
use std::collections::BTreeMap;
use tracing::debug;

/// Snapshot histories keyed by filesystem
pub type SnapshotCatalog = BTreeMap<Filesystem, SnapshotHistory>;

/// Group observations by filesystem
///
/// Snapshots keep the relative order they arrived in; nothing is sorted or
/// deduplicated, because the listing order is the creation order.
pub fn group<I>(records: I) -> SnapshotCatalog
where
    I: IntoIterator<Item = SnapshotRecord>,
{
    let mut catalog = SnapshotCatalog::new();
    for SnapshotRecord {
        filesystem,
        snapshot,
    } in records
    {
        catalog.entry(filesystem).or_default().push(snapshot);
    }
    debug!("Grouped snapshots into {} filesystems", catalog.len());
    catalog
}

/// Parse `zfs list -H -t snapshot -o name` output into observations
///
/// Blank lines and names without an `@` are skipped.
pub fn parse_snapshot_listing(listing: &str) -> Vec<SnapshotRecord> {
    listing.lines().filter_map(SnapshotRecord::parse).collect()
}
