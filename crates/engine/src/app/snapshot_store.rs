use std::collections::HashMap;

use sha2::{Digest, Sha256};

use super::scene::Entity;
use crate::rewind::{SnapshotId, StoreError};

#[derive(Debug, Clone)]
struct Container {
    payload: Vec<u8>,
    digest_hex: String,
    entity_count: usize,
}

/// Snapshot containers holding one section's entities as JSON records.
///
/// Each container carries the SHA-256 of its payload, so two containers hold
/// identical state exactly when their digests match.
#[derive(Debug, Default)]
pub struct SnapshotArena {
    next_id: u64,
    containers: HashMap<SnapshotId, Container>,
}

impl SnapshotArena {
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn contains(&self, snapshot: SnapshotId) -> bool {
        self.containers.contains_key(&snapshot)
    }

    pub fn allocate(&mut self, records: &[Entity]) -> Result<SnapshotId, StoreError> {
        let snapshot = self.next_snapshot_id();
        let container = encode(snapshot, records)?;
        self.containers.insert(snapshot, container);
        Ok(snapshot)
    }

    pub fn write(&mut self, snapshot: SnapshotId, records: &[Entity]) -> Result<(), StoreError> {
        if !self.contains(snapshot) {
            return Err(StoreError::UnknownSnapshot(snapshot));
        }
        let container = encode(snapshot, records)?;
        self.containers.insert(snapshot, container);
        Ok(())
    }

    pub fn records_of(&self, snapshot: SnapshotId) -> Result<Vec<Entity>, StoreError> {
        let container = self.container(snapshot)?;
        serde_json::from_slice(&container.payload).map_err(|source| StoreError::Codec {
            snapshot,
            message: source.to_string(),
        })
    }

    pub fn digest_of(&self, snapshot: SnapshotId) -> Option<&str> {
        self.containers
            .get(&snapshot)
            .map(|container| container.digest_hex.as_str())
    }

    pub fn entity_count_of(&self, snapshot: SnapshotId) -> Option<usize> {
        self.containers
            .get(&snapshot)
            .map(|container| container.entity_count)
    }

    pub fn duplicate(&mut self, source: SnapshotId) -> Result<SnapshotId, StoreError> {
        let copy = self.container(source)?.clone();
        let snapshot = self.next_snapshot_id();
        self.containers.insert(snapshot, copy);
        Ok(snapshot)
    }

    pub fn copy(&mut self, dst: SnapshotId, src: SnapshotId) -> Result<(), StoreError> {
        if dst == src {
            return self.container(src).map(|_| ());
        }
        let copy = self.container(src)?.clone();
        let slot = self
            .containers
            .get_mut(&dst)
            .ok_or(StoreError::UnknownSnapshot(dst))?;
        *slot = copy;
        Ok(())
    }

    pub fn release(&mut self, snapshot: SnapshotId) -> bool {
        self.containers.remove(&snapshot).is_some()
    }

    fn container(&self, snapshot: SnapshotId) -> Result<&Container, StoreError> {
        self.containers
            .get(&snapshot)
            .ok_or(StoreError::UnknownSnapshot(snapshot))
    }

    fn next_snapshot_id(&mut self) -> SnapshotId {
        let snapshot = SnapshotId(self.next_id);
        self.next_id = self.next_id.saturating_add(1);
        snapshot
    }
}

fn encode(snapshot: SnapshotId, records: &[Entity]) -> Result<Container, StoreError> {
    let payload = serde_json::to_vec(records).map_err(|source| StoreError::Codec {
        snapshot,
        message: source.to_string(),
    })?;
    let digest_hex = to_hex_lower(&Sha256::digest(&payload));
    Ok(Container {
        payload,
        digest_hex,
        entity_count: records.len(),
    })
}

fn to_hex_lower(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write as _;
        let _ = write!(&mut output, "{byte:02x}");
    }
    output
}
