use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SectionId(pub u64);

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "section#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotId(pub u64);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snapshot#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("unknown section {0}")]
    UnknownSection(SectionId),
    #[error("unknown snapshot {0}")]
    UnknownSnapshot(SnapshotId),
    #[error("snapshot {snapshot} could not be encoded or decoded: {message}")]
    Codec {
        snapshot: SnapshotId,
        message: String,
    },
}

/// Container storage the replay core drives.
///
/// Every call is made from the playback or transfer phases of a tick, never
/// while the dispatcher is still planning.
pub trait SnapshotStore {
    fn capture_into(&mut self, snapshot: SnapshotId, section: SectionId) -> Result<(), StoreError>;

    fn apply_from(&mut self, snapshot: SnapshotId, section: SectionId) -> Result<(), StoreError>;

    fn clone_snapshot(&mut self, source: SnapshotId) -> Result<SnapshotId, StoreError>;

    fn copy_contents(&mut self, dst: SnapshotId, src: SnapshotId) -> Result<(), StoreError>;

    fn release(&mut self, snapshot: SnapshotId);
}

pub trait SectionCatalog {
    fn tracked_sections(&self) -> Vec<SectionId>;
    fn is_loaded(&self, section: SectionId) -> bool;
    fn initial_snapshot_of(&self, section: SectionId) -> Option<SnapshotId>;
}
