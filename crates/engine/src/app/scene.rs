use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::snapshot_store::SnapshotArena;
use crate::rewind::{SectionCatalog, SectionId, SnapshotId, SnapshotStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec2,
    pub rotation_radians: Option<f32>,
}

/// Live entity state; also the record format stored in snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub transform: Transform,
    pub velocity: Vec2,
    pub label: String,
}

#[derive(Debug, Default)]
pub struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }

    fn reserve_past(&mut self, id: EntityId) {
        self.next = self.next.max(id.0.saturating_add(1));
    }
}

#[derive(Debug, Default)]
pub struct SceneWorld {
    allocator: EntityIdAllocator,
    entities: Vec<Entity>,
    pending_spawns: Vec<Entity>,
    pending_despawns: Vec<EntityId>,
}

impl SceneWorld {
    pub fn spawn(
        &mut self,
        transform: Transform,
        velocity: Vec2,
        label: impl Into<String>,
    ) -> EntityId {
        let id = self.allocator.allocate();
        self.pending_spawns.push(Entity {
            id,
            transform,
            velocity,
            label: label.into(),
        });
        id
    }

    pub fn despawn(&mut self, id: EntityId) -> bool {
        let exists_now = self.entities.iter().any(|entity| entity.id == id);
        let pending_spawn = self.pending_spawns.iter().any(|entity| entity.id == id);
        if !exists_now && !pending_spawn {
            return false;
        }
        self.pending_despawns.push(id);
        true
    }

    pub fn apply_pending(&mut self) {
        if !self.pending_despawns.is_empty() {
            self.pending_despawns.sort_by_key(|id| id.0);
            self.pending_despawns.dedup();
            let pending = &self.pending_despawns;
            let doomed = |entity: &Entity| pending.binary_search(&entity.id).is_ok();
            self.entities.retain(|entity| !doomed(entity));
            self.pending_spawns.retain(|entity| !doomed(entity));
            self.pending_despawns.clear();
        }

        self.entities.append(&mut self.pending_spawns);
    }

    /// Replace every entity with `records`, discarding queued spawns and despawns.
    ///
    /// Ids are never handed out twice, even when a restore brings back an
    /// entity the allocator had already moved past.
    pub fn restore(&mut self, records: Vec<Entity>) {
        self.pending_spawns.clear();
        self.pending_despawns.clear();
        for record in &records {
            self.allocator.reserve_past(record.id);
        }
        self.entities = records;
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.pending_spawns.clear();
        self.pending_despawns.clear();
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_spawns.is_empty() || !self.pending_despawns.is_empty()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut [Entity] {
        &mut self.entities
    }

    pub fn find_entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn find_entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|entity| entity.id == id)
    }
}

pub trait Scene {
    /// Populate a fresh world. What this spawns becomes the section's initial snapshot.
    fn load(&mut self, world: &mut SceneWorld);
    fn update(&mut self, fixed_dt_seconds: f32, world: &mut SceneWorld);
    fn unload(&mut self, _world: &mut SceneWorld) {}
    fn debug_title(&self, _world: &SceneWorld) -> Option<String> {
        None
    }
}

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("{0} is already registered")]
    DuplicateSection(SectionId),
    #[error("{0} is not registered")]
    UnknownSection(SectionId),
    #[error("failed to bake initial snapshot for {section}: {source}")]
    Bake {
        section: SectionId,
        #[source]
        source: StoreError,
    },
    #[error("failed to restore {section}: {source}")]
    Restore {
        section: SectionId,
        #[source]
        source: StoreError,
    },
    #[error("failed to save {section} into its last-saved snapshot: {source}")]
    Save {
        section: SectionId,
        #[source]
        source: StoreError,
    },
}

struct SceneRuntime {
    scene: Box<dyn Scene>,
    world: SceneWorld,
    is_loaded: bool,
    initial: SnapshotId,
    last_saved: SnapshotId,
}

#[derive(Default)]
pub struct SceneMachine {
    sections: BTreeMap<SectionId, SceneRuntime>,
    arena: SnapshotArena,
}

impl SceneMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        section: SectionId,
        mut scene: Box<dyn Scene>,
        loaded: bool,
    ) -> Result<SnapshotId, SceneError> {
        if self.sections.contains_key(&section) {
            return Err(SceneError::DuplicateSection(section));
        }

        let mut world = SceneWorld::default();
        scene.load(&mut world);
        world.apply_pending();
        let initial = self
            .arena
            .allocate(world.entities())
            .map_err(|source| SceneError::Bake { section, source })?;
        let last_saved = self
            .arena
            .duplicate(initial)
            .map_err(|source| SceneError::Bake { section, source })?;
        let entities = world.entity_count();

        if !loaded {
            scene.unload(&mut world);
            world.clear();
        }

        info!(
            section = section.0,
            entities,
            loaded,
            initial = initial.0,
            "section_registered"
        );
        self.sections.insert(
            section,
            SceneRuntime {
                scene,
                world,
                is_loaded: loaded,
                initial,
                last_saved,
            },
        );
        Ok(initial)
    }

    pub fn is_registered(&self, section: SectionId) -> bool {
        self.sections.contains_key(&section)
    }

    pub fn section_ids(&self) -> Vec<SectionId> {
        self.sections.keys().copied().collect()
    }

    pub fn load(&mut self, section: SectionId) -> Result<bool, SceneError> {
        let runtime = self
            .sections
            .get_mut(&section)
            .ok_or(SceneError::UnknownSection(section))?;
        if runtime.is_loaded {
            return Ok(false);
        }
        let records = self
            .arena
            .records_of(runtime.last_saved)
            .map_err(|source| SceneError::Restore { section, source })?;
        runtime.world.restore(records);
        runtime.is_loaded = true;
        info!(
            section = section.0,
            entities = runtime.world.entity_count(),
            "section_loaded"
        );
        Ok(true)
    }

    pub fn unload(&mut self, section: SectionId) -> Result<bool, SceneError> {
        if !self.save_to_container(section)? {
            return Ok(false);
        }
        let runtime = self
            .sections
            .get_mut(&section)
            .ok_or(SceneError::UnknownSection(section))?;
        let (scene, world) = (&mut runtime.scene, &mut runtime.world);
        scene.unload(world);
        world.clear();
        runtime.is_loaded = false;
        info!(section = section.0, "section_unloaded");
        Ok(true)
    }

    pub fn save_to_container(&mut self, section: SectionId) -> Result<bool, SceneError> {
        let runtime = self
            .sections
            .get(&section)
            .ok_or(SceneError::UnknownSection(section))?;
        if !runtime.is_loaded {
            return Ok(false);
        }
        self.arena
            .write(runtime.last_saved, runtime.world.entities())
            .map_err(|source| SceneError::Save { section, source })?;
        debug!(
            section = section.0,
            entities = runtime.world.entity_count(),
            "section_saved"
        );
        Ok(true)
    }

    pub fn load_from_container(&mut self, section: SectionId) -> Result<bool, SceneError> {
        let last_saved = self
            .last_saved_of(section)
            .ok_or(SceneError::UnknownSection(section))?;
        if !self.is_loaded(section) {
            return Ok(false);
        }
        self.apply_from(last_saved, section)
            .map_err(|source| SceneError::Restore { section, source })?;
        debug!(section = section.0, "section_restored_from_save");
        Ok(true)
    }

    pub fn last_saved_of(&self, section: SectionId) -> Option<SnapshotId> {
        self.sections.get(&section).map(|runtime| runtime.last_saved)
    }

    pub fn update_loaded(&mut self, fixed_dt_seconds: f32) {
        for runtime in self.sections.values_mut().filter(|runtime| runtime.is_loaded) {
            let (scene, world) = (&mut runtime.scene, &mut runtime.world);
            scene.update(fixed_dt_seconds, world);
            world.apply_pending();
        }
    }

    pub fn reset_to_initial(&mut self, section: SectionId) -> Result<(), SceneError> {
        let initial = self
            .initial_snapshot_of(section)
            .ok_or(SceneError::UnknownSection(section))?;
        self.apply_from(initial, section)
            .map_err(|source| SceneError::Restore { section, source })?;
        debug!(section = section.0, "section_reset_to_initial");
        Ok(())
    }

    pub fn world(&self, section: SectionId) -> Option<&SceneWorld> {
        self.sections.get(&section).map(|runtime| &runtime.world)
    }

    pub fn world_mut(&mut self, section: SectionId) -> Option<&mut SceneWorld> {
        self.sections
            .get_mut(&section)
            .map(|runtime| &mut runtime.world)
    }

    pub fn debug_title(&self, section: SectionId) -> Option<String> {
        let runtime = self.sections.get(&section)?;
        runtime.scene.debug_title(&runtime.world)
    }

    pub fn arena(&self) -> &SnapshotArena {
        &self.arena
    }

    pub fn shutdown_all(&mut self) {
        for runtime in self.sections.values_mut() {
            if runtime.is_loaded {
                let (scene, world) = (&mut runtime.scene, &mut runtime.world);
                scene.unload(world);
                world.clear();
                runtime.is_loaded = false;
            }
        }
    }
}

impl SectionCatalog for SceneMachine {
    fn tracked_sections(&self) -> Vec<SectionId> {
        self.section_ids()
    }

    fn is_loaded(&self, section: SectionId) -> bool {
        self.sections
            .get(&section)
            .is_some_and(|runtime| runtime.is_loaded)
    }

    fn initial_snapshot_of(&self, section: SectionId) -> Option<SnapshotId> {
        self.sections.get(&section).map(|runtime| runtime.initial)
    }
}

impl SnapshotStore for SceneMachine {
    fn capture_into(
        &mut self,
        snapshot: SnapshotId,
        section: SectionId,
    ) -> Result<(), StoreError> {
        let runtime = self
            .sections
            .get(&section)
            .ok_or(StoreError::UnknownSection(section))?;
        self.arena.write(snapshot, runtime.world.entities())
    }

    fn apply_from(
        &mut self,
        snapshot: SnapshotId,
        section: SectionId,
    ) -> Result<(), StoreError> {
        let runtime = self
            .sections
            .get_mut(&section)
            .ok_or(StoreError::UnknownSection(section))?;
        if !runtime.is_loaded {
            if !self.arena.contains(snapshot) {
                return Err(StoreError::UnknownSnapshot(snapshot));
            }
            return Ok(());
        }
        let records = self.arena.records_of(snapshot)?;
        runtime.world.restore(records);
        Ok(())
    }

    fn clone_snapshot(&mut self, source: SnapshotId) -> Result<SnapshotId, StoreError> {
        self.arena.duplicate(source)
    }

    fn copy_contents(&mut self, dst: SnapshotId, src: SnapshotId) -> Result<(), StoreError> {
        self.arena.copy(dst, src)
    }

    fn release(&mut self, snapshot: SnapshotId) {
        if !self.arena.release(snapshot) {
            debug!(snapshot = snapshot.0, "snapshot_release_ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewind::{ReplaySystem, RewindConfig};

    const DT: f32 = 1.0 / 60.0;

    struct SteppingScene {
        spawn_count: usize,
        step_x: f32,
    }

    impl Scene for SteppingScene {
        fn load(&mut self, world: &mut SceneWorld) {
            for index in 0..self.spawn_count {
                world.spawn(
                    Transform {
                        position: Vec2 {
                            x: index as f32,
                            y: 0.0,
                        },
                        rotation_radians: None,
                    },
                    Vec2::default(),
                    "step",
                );
            }
        }

        fn update(&mut self, _fixed_dt_seconds: f32, world: &mut SceneWorld) {
            if let Some(entity) = world.entities_mut().first_mut() {
                entity.transform.position.x += self.step_x;
            }
        }

        fn debug_title(&self, world: &SceneWorld) -> Option<String> {
            Some(format!("stepping ({} entities)", world.entity_count()))
        }
    }

    fn stepping(spawn_count: usize, step_x: f32) -> Box<dyn Scene> {
        Box::new(SteppingScene {
            spawn_count,
            step_x,
        })
    }

    fn first_x(machine: &SceneMachine, section: SectionId) -> f32 {
        machine.world(section).expect("registered").entities()[0]
            .transform
            .position
            .x
    }

    #[test]
    fn allocator_never_reuses_ids() {
        let mut allocator = EntityIdAllocator::default();
        let first = allocator.allocate();
        let second = allocator.allocate();
        let third = allocator.allocate();

        assert_eq!(first.0, 0);
        assert_eq!(second.0, 1);
        assert_eq!(third.0, 2);
    }

    #[test]
    fn scene_world_spawn_and_despawn_updates_count() {
        let mut world = SceneWorld::default();
        let id = world.spawn(Transform::default(), Vec2::default(), "spawned");
        assert!(world.has_pending());
        world.apply_pending();
        assert_eq!(world.entity_count(), 1);

        world.despawn(id);
        world.apply_pending();
        assert_eq!(world.entity_count(), 0);
        assert!(!world.has_pending());
    }

    #[test]
    fn scene_world_duplicate_pending_despawns_are_safe_and_idempotent() {
        let mut world = SceneWorld::default();
        let doomed = world.spawn(Transform::default(), Vec2::default(), "doomed");
        let survivor = world.spawn(
            Transform {
                position: Vec2 { x: 3.0, y: 1.0 },
                rotation_radians: None,
            },
            Vec2::default(),
            "survivor",
        );
        world.apply_pending();
        assert_eq!(world.entity_count(), 2);

        assert!(world.despawn(doomed));
        assert!(world.despawn(doomed));
        assert!(world.despawn(doomed));
        world.apply_pending();

        assert_eq!(world.entity_count(), 1);
        assert!(world.find_entity(doomed).is_none());
        assert!(world.find_entity(survivor).is_some());
    }

    #[test]
    fn restore_replaces_entities_and_keeps_ids_unique() {
        let mut world = SceneWorld::default();
        world.spawn(Transform::default(), Vec2::default(), "early");
        world.apply_pending();
        let records = world.entities().to_vec();

        for _ in 0..3 {
            world.spawn(Transform::default(), Vec2::default(), "late");
        }
        world.apply_pending();
        world.spawn(Transform::default(), Vec2::default(), "queued");

        world.restore(records.clone());
        assert_eq!(world.entities(), records.as_slice());
        assert!(!world.has_pending());

        let fresh = world.spawn(Transform::default(), Vec2::default(), "fresh");
        assert_eq!(fresh, EntityId(5));
    }

    #[test]
    fn register_bakes_initial_snapshot_and_rejects_duplicates() {
        let mut machine = SceneMachine::new();
        let section = SectionId(1);
        let initial = machine
            .register(section, stepping(2, 1.0), true)
            .expect("register");

        assert_eq!(machine.initial_snapshot_of(section), Some(initial));
        assert_eq!(machine.arena().entity_count_of(initial), Some(2));
        assert!(machine.is_loaded(section));
        assert!(matches!(
            machine.register(section, stepping(1, 1.0), true),
            Err(SceneError::DuplicateSection(id)) if id == section
        ));
        assert_eq!(
            machine.debug_title(section).as_deref(),
            Some("stepping (2 entities)")
        );
    }

    #[test]
    fn unloaded_section_does_not_advance() {
        let mut machine = SceneMachine::new();
        let active = SectionId(1);
        let frozen = SectionId(2);
        machine.register(active, stepping(1, 1.0), true).expect("register");
        machine.register(frozen, stepping(1, 3.0), false).expect("register");

        for _ in 0..10 {
            machine.update_loaded(DT);
        }

        assert_eq!(first_x(&machine, active), 10.0);
        assert_eq!(machine.world(frozen).expect("registered").entity_count(), 0);

        assert!(machine.load(frozen).expect("load"));
        assert!(!machine.load(frozen).expect("already loaded"));
        assert_eq!(first_x(&machine, frozen), 0.0);
    }

    #[test]
    fn unload_then_load_restores_saved_state() {
        let mut machine = SceneMachine::new();
        let section = SectionId(4);
        machine.register(section, stepping(3, 2.0), true).expect("register");
        machine.update_loaded(DT);
        assert_eq!(first_x(&machine, section), 2.0);

        assert!(machine.unload(section).expect("unload"));
        assert!(!machine.unload(section).expect("already unloaded"));
        assert!(!machine.is_loaded(section));

        machine.load(section).expect("load");
        assert_eq!(machine.world(section).expect("registered").entity_count(), 3);
        assert_eq!(first_x(&machine, section), 2.0);

        let initial = machine.initial_snapshot_of(section).expect("registered");
        let saved = machine.last_saved_of(section).expect("registered");
        assert_ne!(initial, saved);
        let baked = machine.arena().records_of(initial).expect("initial");
        assert_eq!(baked[0].transform.position.x, 0.0);
    }

    #[test]
    fn quick_save_and_quick_load_round_trip_live_state() {
        let mut machine = SceneMachine::new();
        let section = SectionId(2);
        machine.register(section, stepping(1, 1.5), true).expect("register");
        machine.update_loaded(DT);
        machine.update_loaded(DT);

        assert!(machine.save_to_container(section).expect("save"));
        machine.update_loaded(DT);
        assert_eq!(first_x(&machine, section), 4.5);

        assert!(machine.load_from_container(section).expect("quick load"));
        assert_eq!(first_x(&machine, section), 3.0);

        machine.unload(section).expect("unload");
        assert!(!machine.save_to_container(section).expect("unloaded save"));
        assert!(!machine.load_from_container(section).expect("unloaded load"));
        assert!(matches!(
            machine.save_to_container(SectionId(9)),
            Err(SceneError::UnknownSection(_))
        ));
    }

    #[test]
    fn apply_onto_unloaded_section_is_a_no_op() {
        let mut machine = SceneMachine::new();
        let section = SectionId(1);
        let initial = machine
            .register(section, stepping(2, 1.0), false)
            .expect("register");

        machine.apply_from(initial, section).expect("no-op apply");
        assert_eq!(machine.world(section).expect("registered").entity_count(), 0);
        assert_eq!(
            machine.apply_from(SnapshotId(404), section),
            Err(StoreError::UnknownSnapshot(SnapshotId(404)))
        );
        assert_eq!(
            machine.apply_from(initial, SectionId(9)),
            Err(StoreError::UnknownSection(SectionId(9)))
        );
    }

    #[test]
    fn reset_to_initial_restores_baked_positions() {
        let mut machine = SceneMachine::new();
        let section = SectionId(1);
        machine.register(section, stepping(1, 5.0), true).expect("register");
        machine.update_loaded(DT);
        machine.update_loaded(DT);
        assert_eq!(first_x(&machine, section), 10.0);

        machine.reset_to_initial(section).expect("reset");
        assert_eq!(first_x(&machine, section), 0.0);
        assert!(matches!(
            machine.reset_to_initial(SectionId(7)),
            Err(SceneError::UnknownSection(_))
        ));
    }

    #[test]
    fn rewind_restores_positions_from_history() {
        let mut machine = SceneMachine::new();
        let section = SectionId(1);
        machine.register(section, stepping(1, 1.0), true).expect("register");
        let mut replay = ReplaySystem::new(RewindConfig::default()).expect("config");

        for _ in 0..10 {
            let report = replay.tick(&mut machine, |machine| machine.update_loaded(DT));
            assert!(report.faults.is_empty());
        }
        assert_eq!(first_x(&machine, section), 10.0);

        replay.request_set_rewind_offset(4).expect("accepted");
        replay.tick(&mut machine, |machine| machine.update_loaded(DT));
        assert_eq!(first_x(&machine, section), 6.0);

        replay.request_unpause().expect("accepted");
        replay.tick(&mut machine, |machine| machine.update_loaded(DT));
        assert_eq!(replay.clock().current_frame(), 7);
        assert_eq!(first_x(&machine, section), 7.0);
    }

    #[test]
    fn unloaded_section_history_digests_match_last_capture() {
        let mut machine = SceneMachine::new();
        let section = SectionId(3);
        machine.register(section, stepping(2, 0.5), true).expect("register");
        let mut replay = ReplaySystem::new(RewindConfig::with_history_len(16)).expect("config");

        for _ in 0..5 {
            replay.tick(&mut machine, |machine| machine.update_loaded(DT));
        }
        machine.unload(section).expect("unload");
        for _ in 0..4 {
            let report = replay.tick(&mut machine, |machine| machine.update_loaded(DT));
            assert!(report.faults.is_empty());
        }

        let digest_at = |frame: u64| {
            let snapshot = replay.snapshot_at(section, frame).expect("slot populated");
            machine
                .arena()
                .digest_of(snapshot)
                .map(str::to_owned)
                .expect("digest")
        };
        let last_capture = digest_at(5);
        for frame in 6..=9 {
            assert_eq!(digest_at(frame), last_capture);
        }
        assert_ne!(digest_at(4), last_capture);
    }

    #[test]
    fn reloaded_section_resumes_from_frozen_history() {
        let mut machine = SceneMachine::new();
        let section = SectionId(5);
        machine.register(section, stepping(1, 1.0), true).expect("register");
        let mut replay = ReplaySystem::new(RewindConfig::with_history_len(16)).expect("config");

        for _ in 0..5 {
            replay.tick(&mut machine, |machine| machine.update_loaded(DT));
        }
        machine.unload(section).expect("unload");
        for _ in 0..3 {
            replay.tick(&mut machine, |machine| machine.update_loaded(DT));
        }
        machine.load(section).expect("load");

        let frozen = replay.snapshot_at(section, 8).expect("frame 8");
        let frozen_x = machine.arena().records_of(frozen).expect("records")[0]
            .transform
            .position
            .x;
        assert_eq!(frozen_x, 5.0);
        assert_eq!(first_x(&machine, section), frozen_x);

        replay.tick(&mut machine, |machine| machine.update_loaded(DT));
        let resumed = replay.snapshot_at(section, 9).expect("frame 9");
        assert_eq!(
            machine.arena().records_of(resumed).expect("records")[0]
                .transform
                .position
                .x,
            6.0
        );
    }

    #[test]
    fn forgetting_a_section_releases_arena_containers() {
        let mut machine = SceneMachine::new();
        let section = SectionId(1);
        machine.register(section, stepping(1, 1.0), true).expect("register");
        let mut replay = ReplaySystem::new(RewindConfig::with_history_len(4)).expect("config");
        for _ in 0..6 {
            replay.tick(&mut machine, |machine| machine.update_loaded(DT));
        }
        assert_eq!(machine.arena().len(), 6);

        assert_eq!(replay.forget_section(section, &mut machine), 4);
        assert_eq!(machine.arena().len(), 2);
    }
}
