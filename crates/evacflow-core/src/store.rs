//! Segment store contract.
//!
//! The engine reads road data only through [`SegmentStore`]. The version tag
//! it reports is folded into every cache key.

use crate::builder::RegionFilter;
use crate::segment::SegmentRecord;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("segment store unavailable: {0}")]
    Unavailable(String),
    #[error("segment store returned bad data: {0}")]
    Corrupt(String),
}

/// Opaque tag identifying one revision of the segment dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetVersion(pub String);

impl DatasetVersion {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait SegmentStore: Send + Sync {
    fn dataset_version(&self) -> Result<DatasetVersion, StoreError>;

    fn segments(&self, filter: &RegionFilter) -> Result<Vec<SegmentRecord>, StoreError>;

    /// Version and records read together. Stores that can change underneath
    /// a reader should override this to read both from one revision.
    fn snapshot(
        &self,
        filter: &RegionFilter,
    ) -> Result<(DatasetVersion, Vec<SegmentRecord>), StoreError> {
        let version = self.dataset_version()?;
        let records = self.segments(filter)?;
        Ok((version, records))
    }
}

#[derive(Debug)]
struct Dataset {
    generation: u64,
    records: Vec<SegmentRecord>,
}

/// In-process store over a fixed record set. [`replace`](Self::replace)
/// swaps the data and bumps the version.
#[derive(Debug)]
pub struct MemorySegmentStore {
    label: String,
    data: RwLock<Dataset>,
}

impl MemorySegmentStore {
    pub fn new(label: impl Into<String>, records: Vec<SegmentRecord>) -> Self {
        Self {
            label: label.into(),
            data: RwLock::new(Dataset {
                generation: 1,
                records,
            }),
        }
    }

    /// Install a new dataset. Returns the new version.
    pub fn replace(&self, records: Vec<SegmentRecord>) -> DatasetVersion {
        let mut data = self.data.write();
        data.generation += 1;
        data.records = records;
        self.version_of(data.generation)
    }

    pub fn len(&self) -> usize {
        self.data.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn version_of(&self, generation: u64) -> DatasetVersion {
        DatasetVersion(format!("{}-g{generation}", self.label))
    }

    fn filtered(records: &[SegmentRecord], filter: &RegionFilter) -> Vec<SegmentRecord> {
        records
            .iter()
            .filter(|r| filter.matches(&r.region))
            .cloned()
            .collect()
    }
}

impl SegmentStore for MemorySegmentStore {
    fn dataset_version(&self) -> Result<DatasetVersion, StoreError> {
        Ok(self.version_of(self.data.read().generation))
    }

    fn segments(&self, filter: &RegionFilter) -> Result<Vec<SegmentRecord>, StoreError> {
        Ok(Self::filtered(&self.data.read().records, filter))
    }

    fn snapshot(
        &self,
        filter: &RegionFilter,
    ) -> Result<(DatasetVersion, Vec<SegmentRecord>), StoreError> {
        let data = self.data.read();
        Ok((
            self.version_of(data.generation),
            Self::filtered(&data.records, filter),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    #[test]
    fn filters_by_region() {
        let mut miami = seg(2, 3, 4, 2);
        miami.region = "Miami".to_string();
        let store = MemorySegmentStore::new("fixture", vec![seg(1, 1, 2, 2), miami]);

        assert_eq!(store.segments(&RegionFilter::All).unwrap().len(), 2);
        let only = store.segments(&RegionFilter::only("MIAMI")).unwrap();
        assert_eq!(only.len(), 1);
        assert_eq!(only[0].region, "Miami");
    }

    #[test]
    fn replace_bumps_version() {
        let store = MemorySegmentStore::new("fixture", vec![seg(1, 1, 2, 2)]);
        let v1 = store.dataset_version().unwrap();
        assert_eq!(v1.as_str(), "fixture-g1");

        let v2 = store.replace(vec![seg(1, 1, 2, 3), seg(2, 2, 3, 1)]);
        assert_ne!(v1, v2);
        assert_eq!(store.dataset_version().unwrap(), v2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn snapshot_reads_one_revision() {
        let store = MemorySegmentStore::new("fixture", vec![seg(1, 1, 2, 2)]);
        let (version, records) = store.snapshot(&RegionFilter::All).unwrap();
        assert_eq!(version.to_string(), "fixture-g1");
        assert_eq!(records.len(), 1);
    }
}
