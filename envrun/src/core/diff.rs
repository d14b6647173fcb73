//! Before/after comparison of environment snapshots.

use crate::core::types::{ChangedPackage, Diff, PackageRecord, PackageSnapshot};

/// Compute what an install added or upgraded.
///
/// `added` holds names present only in `after`; `changed` holds names present in
/// both with differing version strings. Both lists follow `after`'s order.
/// Removals are ignored.
pub fn diff_snapshots(before: &PackageSnapshot, after: &PackageSnapshot) -> Diff {
    let mut diff = Diff::default();
    for record in after.iter() {
        match before.version(&record.name) {
            None => diff.added.push(PackageRecord::new(&record.name, &record.version)),
            Some(prior) if prior != record.version => diff.changed.push(ChangedPackage {
                name: record.name.clone(),
                version: record.version.clone(),
                prior_version: prior.to_string(),
            }),
            Some(_) => {}
        }
    }
    diff
}
