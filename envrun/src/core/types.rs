//! Shared deterministic types for environment snapshots and diffs.
//!
//! These types define stable contracts between the orchestrator, the HTTP
//! layer and clients. They do not depend on external state or I/O.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One installed package as reported by an environment listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Point-in-time mapping of package name to installed version.
///
/// Iteration follows listing order. A name listed twice keeps its first
/// position and takes the version of its last occurrence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageSnapshot {
    records: Vec<PackageRecord>,
    index: HashMap<String, usize>,
}

impl PackageSnapshot {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        let mut snapshot = Self::default();
        for record in records {
            snapshot.insert(record);
        }
        snapshot
    }

    fn insert(&mut self, record: PackageRecord) {
        match self.index.get(&record.name) {
            Some(&pos) => self.records[pos].version = record.version,
            None => {
                self.index.insert(record.name.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Installed version of `name`, if present.
    pub fn version(&self, name: &str) -> Option<&str> {
        self.index
            .get(name)
            .map(|&pos| self.records[pos].version.as_str())
    }

    pub fn records(&self) -> &[PackageRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<PackageRecord> for PackageSnapshot {
    fn from_iter<I: IntoIterator<Item = PackageRecord>>(iter: I) -> Self {
        Self::from_records(iter)
    }
}

/// A package present in both snapshots whose version moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedPackage {
    pub name: String,
    pub version: String,
    pub prior_version: String,
}

/// Additions and version changes between two snapshots of one environment.
///
/// Packages that disappear between snapshots are not reported.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    pub added: Vec<PackageRecord>,
    pub changed: Vec<ChangedPackage>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty()
    }
}
