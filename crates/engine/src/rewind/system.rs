use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use super::clock::{FrameClock, RewindMode, SimulationGate};
use super::config::{ConfigError, RewindConfig};
use super::dispatcher::{plan_tick, SectionLookup};
use super::handle::{RequestConflict, RewindHandle, RewindStatus};
use super::mutation::{MutationLog, SectionFault, TickTransfers};
use super::ring::HistoryRing;
use super::store::{SectionCatalog, SectionId, SnapshotId, SnapshotStore};

#[derive(Debug)]
#[must_use]
pub struct TickPlan {
    pub frame: u64,
    pub target_frame: u64,
    pub mode: RewindMode,
    pub gate: SimulationGate,
    pub log: MutationLog,
    pub faults: Vec<SectionFault>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub frame: u64,
    pub target_frame: u64,
    pub mode: RewindMode,
    pub simulation_ran: bool,
    pub captured: usize,
    pub applied: usize,
    pub cloned: usize,
    pub copied_forward: usize,
    pub faults: Vec<SectionFault>,
}

#[derive(Debug)]
pub struct ReplaySystem {
    config: RewindConfig,
    clock: FrameClock,
    rings: BTreeMap<SectionId, HistoryRing>,
    handle: RewindHandle,
}

impl ReplaySystem {
    pub fn new(config: RewindConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock = FrameClock::new(config.history_len);
        let handle = RewindHandle::default();
        handle.publish(RewindStatus::from_clock(&clock));
        Ok(Self {
            config,
            clock,
            rings: BTreeMap::new(),
            handle,
        })
    }

    pub fn config(&self) -> &RewindConfig {
        &self.config
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn handle(&self) -> RewindHandle {
        self.handle.clone()
    }

    pub fn request_unpause(&self) -> Result<(), RequestConflict> {
        self.handle.request_unpause()
    }

    pub fn request_set_rewind_offset(&self, offset: i64) -> Result<(), RequestConflict> {
        self.handle.request_set_rewind_offset(offset)
    }

    pub fn current_rewind_offset(&self) -> u64 {
        self.clock.rewind_offset()
    }

    pub fn max_rewind_horizon(&self) -> u64 {
        self.clock.horizon()
    }

    pub fn simulation_enabled(&self) -> bool {
        self.clock.simulation_enabled()
    }

    pub fn tracked_rings(&self) -> usize {
        self.rings.len()
    }

    pub fn snapshot_at(&self, section: SectionId, frame: u64) -> Option<SnapshotId> {
        self.rings.get(&section).and_then(|ring| ring.get(frame))
    }

    pub fn begin_tick<C: SectionCatalog + ?Sized>(&mut self, catalog: &C) -> TickPlan {
        let request = self.handle.take_pending();
        let gate = self.clock.resolve(request);
        match gate {
            SimulationGate::Suspended => info!(
                frame = self.clock.current_frame(),
                offset = self.clock.rewind_offset(),
                horizon = self.clock.horizon(),
                "simulation_suspended"
            ),
            SimulationGate::Resumed => info!(
                frame = self.clock.current_frame(),
                horizon = self.clock.horizon(),
                "simulation_resumed"
            ),
            SimulationGate::Unchanged => {
                if let Some(request) = request {
                    debug!(
                        request = %request,
                        offset = self.clock.rewind_offset(),
                        "rewind_request_resolved"
                    );
                }
            }
        }
        self.clock.advance();

        let lookup = SectionLookup::refresh(catalog);
        let (log, faults) = plan_tick(&self.clock, &lookup, &self.rings);
        self.handle.publish(RewindStatus::from_clock(&self.clock));

        TickPlan {
            frame: self.clock.current_frame(),
            target_frame: self.clock.target_frame(),
            mode: self.clock.mode(),
            gate,
            log,
            faults,
        }
    }

    pub fn playback<S: SnapshotStore>(
        &mut self,
        plan: TickPlan,
        store: &mut S,
    ) -> (TickTransfers, Vec<SectionFault>) {
        let TickPlan {
            log, mut faults, ..
        } = plan;
        let failed: BTreeSet<SectionId> = faults.iter().map(SectionFault::section).collect();
        let (transfers, playback_faults) =
            log.playback(&mut self.rings, self.config.history_len, store, failed);
        faults.extend(playback_faults);
        (transfers, faults)
    }

    /// Run one full tick: dispatch, playback, applies, the simulation step when
    /// running, then captures.
    pub fn tick<W, F>(&mut self, world: &mut W, simulate: F) -> TickReport
    where
        W: SectionCatalog + SnapshotStore,
        F: FnOnce(&mut W),
    {
        let plan = self.begin_tick(&*world);
        let frame = plan.frame;
        let target_frame = plan.target_frame;
        let mode = plan.mode;

        let (mut transfers, mut faults) = self.playback(plan, world);
        faults.extend(transfers.run_applies(world));

        let simulation_ran = self.clock.simulation_enabled();
        if simulation_ran {
            simulate(&mut *world);
        }

        faults.extend(transfers.run_captures(world));

        if !faults.is_empty() {
            warn!(frame, fault_count = faults.len(), "tick_section_faults");
        }

        TickReport {
            frame,
            target_frame,
            mode,
            simulation_ran,
            captured: transfers.captures().len(),
            applied: transfers.applies().len(),
            cloned: transfers.cloned(),
            copied_forward: transfers.copied_forward(),
            faults,
        }
    }

    pub fn forget_section<S: SnapshotStore + ?Sized>(
        &mut self,
        section: SectionId,
        store: &mut S,
    ) -> usize {
        let Some(mut ring) = self.rings.remove(&section) else {
            return 0;
        };
        let released = ring.drain();
        for snapshot in &released {
            store.release(*snapshot);
        }
        debug!(section = section.0, released = released.len(), "history_ring_released");
        released.len()
    }
}
