use std::collections::BTreeMap;
use std::marker::PhantomData;

use rayon::prelude::*;

use super::clock::{FrameClock, RewindMode};
use super::mutation::{MutationLog, SectionFault, StoreMutation};
use super::ring::HistoryRing;
use super::store::{SectionCatalog, SectionId, SnapshotId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SectionState {
    pub(crate) id: SectionId,
    pub(crate) loaded: bool,
    pub(crate) initial: Option<SnapshotId>,
}

/// Identity -> load state / baseline lookup, rebuilt at the start of every tick.
///
/// Borrows the catalog for `'tick`, so it cannot outlive the dispatch pass and
/// survive into playback, where the store may relocate what it points at.
#[derive(Debug)]
pub(crate) struct SectionLookup<'tick> {
    sections: Vec<SectionState>,
    _tick: PhantomData<&'tick ()>,
}

impl<'tick> SectionLookup<'tick> {
    pub(crate) fn refresh<C: SectionCatalog + ?Sized>(catalog: &'tick C) -> Self {
        let mut ids = catalog.tracked_sections();
        ids.sort_unstable();
        ids.dedup();
        let sections = ids
            .into_iter()
            .map(|id| SectionState {
                id,
                loaded: catalog.is_loaded(id),
                initial: catalog.initial_snapshot_of(id),
            })
            .collect();
        Self {
            sections,
            _tick: PhantomData,
        }
    }

    pub(crate) fn sections(&self) -> &[SectionState] {
        &self.sections
    }
}

pub(crate) fn plan_tick(
    clock: &FrameClock,
    lookup: &SectionLookup<'_>,
    rings: &BTreeMap<SectionId, HistoryRing>,
) -> (MutationLog, Vec<SectionFault>) {
    let planned: Vec<Result<Vec<StoreMutation>, SectionFault>> = lookup
        .sections()
        .par_iter()
        .map(|section| plan_section(clock, section, rings.get(&section.id)))
        .collect();

    let mut log = MutationLog::new();
    let mut faults = Vec::new();
    for result in planned {
        match result {
            Ok(mutations) => log.append(mutations),
            Err(fault) => faults.push(fault),
        }
    }
    (log, faults)
}

pub(crate) fn plan_section(
    clock: &FrameClock,
    section: &SectionState,
    ring: Option<&HistoryRing>,
) -> Result<Vec<StoreMutation>, SectionFault> {
    let id = section.id;
    let initial = section
        .initial
        .ok_or(SectionFault::MissingInitialSnapshot { section: id })?;
    let slot = |frame: u64| ring.and_then(|ring| ring.get(frame));

    let mut mutations = Vec::with_capacity(3);
    if ring.is_none() {
        mutations.push(StoreMutation::AllocateRing { section: id });
    }

    match clock.mode() {
        RewindMode::Paused => {
            let snapshot = slot(clock.target_frame()).unwrap_or(initial);
            mutations.push(StoreMutation::Apply {
                section: id,
                snapshot,
            });
        }
        RewindMode::Running if section.loaded => {
            let frame = clock.current_frame();
            if slot(frame).is_none() {
                mutations.push(StoreMutation::InstallClone {
                    section: id,
                    frame,
                    source: initial,
                });
            }
            mutations.push(StoreMutation::Capture { section: id, frame });
        }
        RewindMode::Running => {
            let frame = clock.current_frame();
            let source = copy_forward_source(clock, ring).unwrap_or(initial);
            match slot(frame) {
                Some(dst) => mutations.push(StoreMutation::CopyContents {
                    section: id,
                    dst,
                    src: source,
                }),
                None => mutations.push(StoreMutation::InstallClone {
                    section: id,
                    frame,
                    source,
                }),
            }
        }
    }

    Ok(mutations)
}

fn copy_forward_source(clock: &FrameClock, ring: Option<&HistoryRing>) -> Option<SnapshotId> {
    let previous = clock.current_frame().checked_sub(1)?;
    ring?
        .latest_at_or_before(previous, clock.oldest_valid_frame())
        .map(|(_, snapshot)| snapshot)
}

#[cfg(test)]
mod tests {
    use super::super::clock::RewindRequest;
    use super::*;

    const INITIAL: SnapshotId = SnapshotId(1000);

    fn loaded(id: u64) -> SectionState {
        SectionState {
            id: SectionId(id),
            loaded: true,
            initial: Some(INITIAL),
        }
    }

    fn unloaded(id: u64) -> SectionState {
        SectionState {
            loaded: false,
            ..loaded(id)
        }
    }

    fn clock_at(frame: u64) -> FrameClock {
        let mut clock = FrameClock::new(8);
        for _ in 0..frame {
            clock.advance();
        }
        clock
    }

    #[test]
    fn first_sighting_allocates_ring_then_clones_initial() {
        let clock = clock_at(1);
        let plan = plan_section(&clock, &loaded(1), None).expect("plan");
        assert_eq!(
            plan,
            vec![
                StoreMutation::AllocateRing {
                    section: SectionId(1)
                },
                StoreMutation::InstallClone {
                    section: SectionId(1),
                    frame: 1,
                    source: INITIAL,
                },
                StoreMutation::Capture {
                    section: SectionId(1),
                    frame: 1,
                },
            ]
        );
    }

    #[test]
    fn loaded_section_with_populated_slot_only_captures() {
        let clock = clock_at(10);
        let mut ring = HistoryRing::new(8);
        ring.set(2, SnapshotId(2));

        let plan = plan_section(&clock, &loaded(1), Some(&ring)).expect("plan");
        assert_eq!(
            plan,
            vec![StoreMutation::Capture {
                section: SectionId(1),
                frame: 10,
            }]
        );
    }

    #[test]
    fn unloaded_section_copies_previous_frame_into_existing_slot() {
        let clock = clock_at(5);
        let mut ring = HistoryRing::new(8);
        ring.set(4, SnapshotId(4));
        ring.set(5, SnapshotId(5));

        let plan = plan_section(&clock, &unloaded(1), Some(&ring)).expect("plan");
        assert_eq!(
            plan,
            vec![StoreMutation::CopyContents {
                section: SectionId(1),
                dst: SnapshotId(5),
                src: SnapshotId(4),
            }]
        );
    }

    #[test]
    fn unloaded_section_clones_latest_valid_frame_into_empty_slot() {
        let clock = clock_at(5);
        let mut ring = HistoryRing::new(8);
        ring.set(2, SnapshotId(2));

        let plan = plan_section(&clock, &unloaded(1), Some(&ring)).expect("plan");
        assert_eq!(
            plan,
            vec![StoreMutation::InstallClone {
                section: SectionId(1),
                frame: 5,
                source: SnapshotId(2),
            }]
        );
    }

    #[test]
    fn unloaded_section_without_history_falls_back_to_initial() {
        let clock = clock_at(3);
        let plan = plan_section(&clock, &unloaded(1), Some(&HistoryRing::new(8))).expect("plan");
        assert_eq!(
            plan,
            vec![StoreMutation::InstallClone {
                section: SectionId(1),
                frame: 3,
                source: INITIAL,
            }]
        );
    }

    #[test]
    fn copy_forward_ignores_frames_invalidated_by_resume() {
        let mut clock = clock_at(6);
        let mut ring = HistoryRing::new(8);
        ring.set(1, SnapshotId(1));
        ring.set(6, SnapshotId(6));
        clock.resolve(Some(RewindRequest::SetRewindOffset(4)));
        clock.resolve(Some(RewindRequest::Unpause));
        clock.advance();
        assert_eq!(clock.current_frame(), 3);
        assert_eq!(clock.oldest_valid_frame(), 0);

        let plan = plan_section(&clock, &unloaded(1), Some(&ring)).expect("plan");
        assert_eq!(
            plan,
            vec![StoreMutation::InstallClone {
                section: SectionId(1),
                frame: 3,
                source: SnapshotId(1),
            }]
        );
    }

    #[test]
    fn paused_section_applies_target_slot_or_initial() {
        let mut clock = clock_at(6);
        let mut ring = HistoryRing::new(8);
        ring.set(4, SnapshotId(4));

        clock.resolve(Some(RewindRequest::SetRewindOffset(2)));
        let plan = plan_section(&clock, &unloaded(1), Some(&ring)).expect("plan");
        assert_eq!(
            plan,
            vec![StoreMutation::Apply {
                section: SectionId(1),
                snapshot: SnapshotId(4),
            }]
        );

        clock.resolve(Some(RewindRequest::SetRewindOffset(6)));
        let plan = plan_section(&clock, &loaded(1), Some(&ring)).expect("plan");
        assert_eq!(
            plan,
            vec![StoreMutation::Apply {
                section: SectionId(1),
                snapshot: INITIAL,
            }]
        );
    }

    #[test]
    fn missing_initial_snapshot_faults_only_that_section() {
        struct Catalog;
        impl SectionCatalog for Catalog {
            fn tracked_sections(&self) -> Vec<SectionId> {
                vec![SectionId(2), SectionId(1), SectionId(2)]
            }
            fn is_loaded(&self, _section: SectionId) -> bool {
                true
            }
            fn initial_snapshot_of(&self, section: SectionId) -> Option<SnapshotId> {
                (section == SectionId(1)).then_some(INITIAL)
            }
        }

        let lookup = SectionLookup::refresh(&Catalog);
        assert_eq!(lookup.sections().len(), 2);

        let (log, faults) = plan_tick(&clock_at(1), &lookup, &BTreeMap::new());
        assert_eq!(
            faults,
            vec![SectionFault::MissingInitialSnapshot {
                section: SectionId(2)
            }]
        );
        assert!(log
            .entries()
            .iter()
            .all(|mutation| mutation.section() == SectionId(1)));
        assert_eq!(log.len(), 3);
    }
}
