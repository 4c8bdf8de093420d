use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, warn};

use super::ring::HistoryRing;
use super::store::{SectionId, SnapshotId, SnapshotStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMutation {
    AllocateRing { section: SectionId },
    InstallClone {
        section: SectionId,
        frame: u64,
        source: SnapshotId,
    },
    /// Overwrite `dst` in place with the committed content of `src`.
    CopyContents {
        section: SectionId,
        dst: SnapshotId,
        src: SnapshotId,
    },
    Apply {
        section: SectionId,
        snapshot: SnapshotId,
    },
    /// Capture into whatever the ring holds at `frame` once playback finished.
    Capture { section: SectionId, frame: u64 },
}

impl StoreMutation {
    pub fn section(&self) -> SectionId {
        match *self {
            Self::AllocateRing { section }
            | Self::InstallClone { section, .. }
            | Self::CopyContents { section, .. }
            | Self::Apply { section, .. }
            | Self::Capture { section, .. } => section,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SectionFault {
    #[error("{section}: no initial snapshot is registered")]
    MissingInitialSnapshot { section: SectionId },
    #[error("{section}: capture target for frame {frame} was never installed")]
    MissingCaptureTarget { section: SectionId, frame: u64 },
    #[error("{section}: {source}")]
    Store {
        section: SectionId,
        #[source]
        source: StoreError,
    },
}

impl SectionFault {
    pub fn section(&self) -> SectionId {
        match self {
            Self::MissingInitialSnapshot { section }
            | Self::MissingCaptureTarget { section, .. }
            | Self::Store { section, .. } => *section,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationLog {
    entries: Vec<StoreMutation>,
}

impl MutationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: StoreMutation) {
        self.entries.push(mutation);
    }

    pub fn append(&mut self, other: Vec<StoreMutation>) {
        self.entries.extend(other);
    }

    pub fn entries(&self) -> &[StoreMutation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn playback<S: SnapshotStore>(
        self,
        rings: &mut BTreeMap<SectionId, HistoryRing>,
        history_len: usize,
        store: &mut S,
        failed: BTreeSet<SectionId>,
    ) -> (TickTransfers, Vec<SectionFault>) {
        let mut transfers = TickTransfers {
            failed,
            ..TickTransfers::default()
        };
        let mut faults = Vec::new();

        for mutation in self.entries {
            let section = mutation.section();
            if transfers.failed.contains(&section) {
                continue;
            }
            if let Err(fault) = play_one(mutation, rings, history_len, store, &mut transfers) {
                warn!(section = section.0, error = %fault, "section_playback_failed");
                transfers.failed.insert(section);
                faults.push(fault);
            }
        }

        (transfers, faults)
    }
}

fn play_one<S: SnapshotStore>(
    mutation: StoreMutation,
    rings: &mut BTreeMap<SectionId, HistoryRing>,
    history_len: usize,
    store: &mut S,
    transfers: &mut TickTransfers,
) -> Result<(), SectionFault> {
    match mutation {
        StoreMutation::AllocateRing { section } => {
            rings
                .entry(section)
                .or_insert_with(|| HistoryRing::new(history_len));
            debug!(section = section.0, history_len, "history_ring_allocated");
        }
        StoreMutation::InstallClone {
            section,
            frame,
            source,
        } => {
            let snapshot = store
                .clone_snapshot(source)
                .map_err(|error| SectionFault::Store {
                    section,
                    source: error,
                })?;
            let ring = rings
                .entry(section)
                .or_insert_with(|| HistoryRing::new(history_len));
            if let Some(displaced) = ring.set(frame, snapshot) {
                store.release(displaced);
            }
            transfers.cloned += 1;
        }
        StoreMutation::CopyContents { section, dst, src } => {
            store
                .copy_contents(dst, src)
                .map_err(|source| SectionFault::Store { section, source })?;
            transfers.copied_forward += 1;
        }
        StoreMutation::Apply { section, snapshot } => {
            transfers.applies.push(Transfer { section, snapshot });
        }
        StoreMutation::Capture { section, frame } => {
            let snapshot = rings
                .get(&section)
                .and_then(|ring| ring.get(frame))
                .ok_or(SectionFault::MissingCaptureTarget { section, frame })?;
            transfers.captures.push(Transfer { section, snapshot });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    pub section: SectionId,
    pub snapshot: SnapshotId,
}

/// Applies run before the simulation step, captures after it.
#[derive(Debug, Default)]
pub struct TickTransfers {
    applies: Vec<Transfer>,
    captures: Vec<Transfer>,
    failed: BTreeSet<SectionId>,
    cloned: usize,
    copied_forward: usize,
}

impl TickTransfers {
    pub fn applies(&self) -> &[Transfer] {
        &self.applies
    }

    pub fn captures(&self) -> &[Transfer] {
        &self.captures
    }

    pub fn cloned(&self) -> usize {
        self.cloned
    }

    pub fn copied_forward(&self) -> usize {
        self.copied_forward
    }

    pub fn is_failed(&self, section: SectionId) -> bool {
        self.failed.contains(&section)
    }

    pub fn run_applies<S: SnapshotStore>(&mut self, store: &mut S) -> Vec<SectionFault> {
        let pending = std::mem::take(&mut self.applies);
        let mut done = Vec::with_capacity(pending.len());
        let faults = run_phase(&pending, &mut self.failed, &mut done, |transfer| {
            store.apply_from(transfer.snapshot, transfer.section)
        });
        self.applies = done;
        faults
    }

    pub fn run_captures<S: SnapshotStore>(&mut self, store: &mut S) -> Vec<SectionFault> {
        let pending = std::mem::take(&mut self.captures);
        let mut done = Vec::with_capacity(pending.len());
        let faults = run_phase(&pending, &mut self.failed, &mut done, |transfer| {
            store.capture_into(transfer.snapshot, transfer.section)
        });
        self.captures = done;
        faults
    }
}

fn run_phase(
    pending: &[Transfer],
    failed: &mut BTreeSet<SectionId>,
    done: &mut Vec<Transfer>,
    mut run: impl FnMut(&Transfer) -> Result<(), StoreError>,
) -> Vec<SectionFault> {
    let mut faults = Vec::new();
    for transfer in pending {
        if failed.contains(&transfer.section) {
            continue;
        }
        match run(transfer) {
            Ok(()) => done.push(*transfer),
            Err(source) => {
                warn!(
                    section = transfer.section.0,
                    snapshot = transfer.snapshot.0,
                    error = %source,
                    "section_transfer_failed"
                );
                failed.insert(transfer.section);
                faults.push(SectionFault::Store {
                    section: transfer.section,
                    source,
                });
            }
        }
    }
    faults
}
