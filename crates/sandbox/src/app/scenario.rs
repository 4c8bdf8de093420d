use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use rewind_engine::{
    DriverControl, SceneMachine, SectionCatalog, SectionId, TickDriver, TickReport,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::ball_pit::{BurstSpawner, DEFAULT_POOL_CAPACITY};
use super::replay_director::ReplayDirector;

pub(crate) const SCENARIO_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Scenario {
    pub(crate) scenario_version: u32,
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) history_len: Option<usize>,
    #[serde(default = "default_target_tps")]
    pub(crate) target_tps: u32,
    #[serde(default)]
    pub(crate) realtime: bool,
    pub(crate) ticks: u64,
    pub(crate) sections: Vec<SectionSpec>,
    #[serde(default)]
    pub(crate) events: Vec<TimedEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SectionSpec {
    pub(crate) id: u64,
    pub(crate) name: String,
    pub(crate) ball_count: u32,
    pub(crate) seed: u64,
    #[serde(default = "default_loaded")]
    pub(crate) loaded: bool,
    #[serde(default = "default_pool_capacity")]
    pub(crate) pool_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TimedEvent {
    pub(crate) at_tick: u64,
    pub(crate) event: ScenarioEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum ScenarioEvent {
    Load { section: u64 },
    Unload { section: u64 },
    SpawnBurst {
        section: u64,
        #[serde(default)]
        count: Option<u32>,
    },
    ResetSection { section: u64 },
    QuickSave { section: u64 },
    QuickLoad { section: u64 },
    StartReplay,
    Scrub { offset: i64 },
    TogglePlay,
    StopReplay,
}

impl ScenarioEvent {
    fn section(&self) -> Option<u64> {
        match self {
            Self::Load { section }
            | Self::Unload { section }
            | Self::SpawnBurst { section, .. }
            | Self::ResetSection { section }
            | Self::QuickSave { section }
            | Self::QuickLoad { section } => Some(*section),
            Self::StartReplay | Self::Scrub { .. } | Self::TogglePlay | Self::StopReplay => None,
        }
    }
}

fn default_target_tps() -> u32 {
    60
}

fn default_loaded() -> bool {
    true
}

fn default_pool_capacity() -> usize {
    DEFAULT_POOL_CAPACITY
}

#[derive(Debug, Error)]
pub(crate) enum ScenarioError {
    #[error("read scenario '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse scenario json at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("validation failed at {path}: {message}")]
    Invalid { path: String, message: String },
}

pub(crate) fn load_scenario(path: &Path) -> Result<Scenario, ScenarioError> {
    let raw = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let scenario = parse_scenario_json(&raw)?;
    validate_scenario(&scenario)?;
    Ok(scenario)
}

pub(crate) fn parse_scenario_json(raw: &str) -> Result<Scenario, ScenarioError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, Scenario>(&mut deserializer).map_err(|error| {
        let path = error.path().to_string();
        let path = if path.is_empty() || path == "." {
            "<root>".to_string()
        } else {
            path
        };
        ScenarioError::Parse {
            path,
            source: error.into_inner(),
        }
    })
}

fn invalid(path: impl Into<String>, message: impl Into<String>) -> ScenarioError {
    ScenarioError::Invalid {
        path: path.into(),
        message: message.into(),
    }
}

pub(crate) fn validate_scenario(scenario: &Scenario) -> Result<(), ScenarioError> {
    if scenario.scenario_version != SCENARIO_VERSION {
        return Err(invalid(
            "scenario_version",
            format!(
                "expected {SCENARIO_VERSION}, got {}",
                scenario.scenario_version
            ),
        ));
    }
    if scenario.ticks == 0 {
        return Err(invalid("ticks", "must be greater than zero"));
    }
    if scenario.target_tps == 0 {
        return Err(invalid("target_tps", "must be greater than zero"));
    }
    if scenario.sections.is_empty() {
        return Err(invalid("sections", "at least one section is required"));
    }

    let mut known = HashSet::with_capacity(scenario.sections.len());
    for (index, section) in scenario.sections.iter().enumerate() {
        if !known.insert(section.id) {
            return Err(invalid(
                format!("sections[{index}].id"),
                format!("duplicate section id {}", section.id),
            ));
        }
        if section.ball_count as usize > section.pool_capacity {
            return Err(invalid(
                format!("sections[{index}].ball_count"),
                format!(
                    "{} balls exceed pool capacity {}",
                    section.ball_count, section.pool_capacity
                ),
            ));
        }
    }

    for (index, timed) in scenario.events.iter().enumerate() {
        if let Some(section) = timed.event.section() {
            if !known.contains(&section) {
                return Err(invalid(
                    format!("events[{index}].event.section"),
                    format!("unknown section id {section}"),
                ));
            }
        }
        if timed.at_tick >= scenario.ticks {
            warn!(
                index,
                at_tick = timed.at_tick,
                ticks = scenario.ticks,
                "scenario_event_never_fires"
            );
        }
    }
    Ok(())
}

/// Three pits: two running, one streamed in late, with a replay session in the middle.
pub(crate) fn default_scenario() -> Scenario {
    let section = |id: u64, name: &str, ball_count: u32, loaded: bool| SectionSpec {
        id,
        name: name.to_string(),
        ball_count,
        seed: 0x5eed_0000 + id,
        loaded,
        pool_capacity: DEFAULT_POOL_CAPACITY,
    };
    let at = |at_tick: u64, event: ScenarioEvent| TimedEvent { at_tick, event };

    Scenario {
        scenario_version: SCENARIO_VERSION,
        name: "default".to_string(),
        history_len: None,
        target_tps: 60,
        realtime: false,
        ticks: 360,
        sections: vec![
            section(1, "north_pit", 12, true),
            section(2, "south_pit", 8, true),
            section(3, "annex", 6, false),
        ],
        events: vec![
            at(30, ScenarioEvent::SpawnBurst {
                section: 1,
                count: None,
            }),
            at(60, ScenarioEvent::Unload { section: 2 }),
            at(75, ScenarioEvent::Load { section: 3 }),
            at(90, ScenarioEvent::SpawnBurst {
                section: 1,
                count: None,
            }),
            at(120, ScenarioEvent::QuickSave { section: 1 }),
            at(150, ScenarioEvent::StartReplay),
            at(155, ScenarioEvent::Scrub { offset: 60 }),
            at(170, ScenarioEvent::TogglePlay),
            at(200, ScenarioEvent::TogglePlay),
            at(220, ScenarioEvent::StopReplay),
            at(240, ScenarioEvent::Load { section: 2 }),
            at(280, ScenarioEvent::QuickLoad { section: 1 }),
            at(300, ScenarioEvent::ResetSection { section: 3 }),
        ],
    }
}

fn log_skipped(tick: u64, section: u64, ran: bool, action: &'static str) {
    if !ran {
        warn!(tick, section, action, "scenario_action_skipped_unloaded");
    }
}

/// Fires scenario events on their tick and drives the replay director.
pub(crate) struct ScenarioDriver {
    events: Vec<TimedEvent>,
    cursor: usize,
    director: ReplayDirector,
    spawners: BTreeMap<SectionId, BurstSpawner>,
    events_fired: usize,
    faulted_ticks: usize,
}

impl ScenarioDriver {
    pub(crate) fn new(scenario: &Scenario, director: ReplayDirector) -> Self {
        let mut events = scenario.events.clone();
        events.sort_by_key(|timed| timed.at_tick);
        let spawners = scenario
            .sections
            .iter()
            .map(|pit| {
                (
                    SectionId(pit.id),
                    BurstSpawner::new(pit.seed.rotate_left(17), pit.pool_capacity),
                )
            })
            .collect();
        Self {
            events,
            cursor: 0,
            director,
            spawners,
            events_fired: 0,
            faulted_ticks: 0,
        }
    }

    pub(crate) fn events_fired(&self) -> usize {
        self.events_fired
    }

    pub(crate) fn faulted_ticks(&self) -> usize {
        self.faulted_ticks
    }

    pub(crate) fn director(&self) -> &ReplayDirector {
        &self.director
    }

    fn fire(&mut self, tick: u64, event: &ScenarioEvent, machine: &mut SceneMachine) {
        debug!(tick, event = ?event, "scenario_event");
        let outcome = match *event {
            ScenarioEvent::Load { section } => machine.load(SectionId(section)).map(|_| ()),
            ScenarioEvent::Unload { section } => machine.unload(SectionId(section)).map(|_| ()),
            ScenarioEvent::ResetSection { section } => {
                machine.reset_to_initial(SectionId(section))
            }
            ScenarioEvent::QuickSave { section } => machine
                .save_to_container(SectionId(section))
                .map(|saved| log_skipped(tick, section, saved, "quick_save")),
            ScenarioEvent::QuickLoad { section } => machine
                .load_from_container(SectionId(section))
                .map(|loaded| log_skipped(tick, section, loaded, "quick_load")),
            ScenarioEvent::SpawnBurst { section, count } => {
                self.spawn_burst(tick, SectionId(section), count, machine);
                Ok(())
            }
            ScenarioEvent::StartReplay => {
                if self.director.is_replay_mode() {
                    debug!(tick, "replay_already_active");
                } else {
                    self.director.press_play_pause();
                }
                Ok(())
            }
            ScenarioEvent::Scrub { offset } => {
                self.director.scrub(offset);
                Ok(())
            }
            ScenarioEvent::TogglePlay => {
                self.director.press_play_pause();
                Ok(())
            }
            ScenarioEvent::StopReplay => {
                self.director.press_stop();
                Ok(())
            }
        };
        if let Err(error) = outcome {
            warn!(tick, error = %error, "scenario_event_failed");
        }
    }

    fn spawn_burst(
        &mut self,
        tick: u64,
        section: SectionId,
        count: Option<u32>,
        machine: &mut SceneMachine,
    ) {
        if !machine.is_loaded(section) {
            warn!(tick, section = section.0, "spawn_burst_skipped_unloaded");
            return;
        }
        let (Some(spawner), Some(world)) =
            (self.spawners.get_mut(&section), machine.world_mut(section))
        else {
            warn!(tick, section = section.0, "spawn_burst_unknown_section");
            return;
        };
        let spawned = spawner.spawn(world, count);
        info!(tick, section = section.0, spawned, "spawn_burst");
    }
}

impl TickDriver<SceneMachine> for ScenarioDriver {
    fn before_tick(&mut self, tick: u64, machine: &mut SceneMachine) -> DriverControl {
        while let Some(timed) = self.events.get(self.cursor) {
            if timed.at_tick > tick {
                break;
            }
            let event = timed.event.clone();
            self.cursor += 1;
            self.events_fired += 1;
            self.fire(tick, &event, machine);
        }
        self.director.update();
        DriverControl::Continue
    }

    fn after_tick(&mut self, report: &TickReport, _machine: &SceneMachine) {
        if !report.faults.is_empty() {
            self.faulted_ticks += 1;
        }
        if self.director.is_replay_mode() {
            debug!(
                frame = report.frame,
                target_frame = report.target_frame,
                slider = self.director.slider_value(),
                auto_play = self.director.is_auto_playing(),
                play_pause_enabled = self.director.play_pause_enabled(),
                "replay_director_state"
            );
        }
    }
}
