use std::env;
use std::path::PathBuf;

use rewind_engine::{
    ConfigError, LoopConfig, ReplaySystem, RewindConfig, SceneError, SceneMachine, SectionId,
};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::ball_pit::BallPit;
use super::replay_director::ReplayDirector;
use super::scenario::{default_scenario, load_scenario, Scenario, ScenarioDriver, ScenarioError};

const SCENARIO_ENV_VAR: &str = "REWIND_SCENARIO";

pub(crate) struct AppWiring {
    pub(crate) scenario_name: String,
    pub(crate) loop_config: LoopConfig,
    pub(crate) machine: SceneMachine,
    pub(crate) replay: ReplaySystem,
    pub(crate) driver: ScenarioDriver,
}

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error("invalid rewind config: {0}")]
    Config(#[from] ConfigError),
    #[error("section setup failed: {0}")]
    Scene(#[from] SceneError),
}

pub(crate) fn build_app() -> Result<AppWiring, BootstrapError> {
    init_tracing();
    info!("=== Rewind Sandbox Startup ===");

    let source = resolve_scenario_source(env::args().nth(1), env::var(SCENARIO_ENV_VAR).ok());
    let scenario = match source {
        Some(path) => {
            info!(path = %path.display(), "scenario_source_file");
            load_scenario(&path)?
        }
        None => {
            info!("scenario_source_builtin");
            default_scenario()
        }
    };

    build_app_from(scenario, RewindConfig::from_env())
}

/// Wire sections, replay system and driver for `scenario`. A scenario-level
/// `history_len` wins over the environment.
pub(crate) fn build_app_from(
    scenario: Scenario,
    rewind_config: RewindConfig,
) -> Result<AppWiring, BootstrapError> {
    let rewind_config = match scenario.history_len {
        Some(history_len) => RewindConfig::with_history_len(history_len),
        None => rewind_config,
    };
    let replay = ReplaySystem::new(rewind_config)?;

    let mut machine = SceneMachine::new();
    for pit in &scenario.sections {
        machine.register(
            SectionId(pit.id),
            Box::new(BallPit::new(pit.name.clone(), pit.ball_count, pit.seed)),
            pit.loaded,
        )?;
    }

    let driver = ScenarioDriver::new(&scenario, ReplayDirector::new(replay.handle()));
    let loop_config = LoopConfig {
        target_tps: scenario.target_tps,
        realtime: scenario.realtime,
        tick_limit: Some(scenario.ticks),
        ..LoopConfig::default()
    };

    info!(
        scenario = %scenario.name,
        sections = scenario.sections.len(),
        events = scenario.events.len(),
        ticks = scenario.ticks,
        history_len = replay.config().history_len,
        "scenario_wired"
    );

    Ok(AppWiring {
        scenario_name: scenario.name,
        loop_config,
        machine,
        replay,
        driver,
    })
}

/// The first CLI argument takes precedence over `REWIND_SCENARIO`.
fn resolve_scenario_source(arg: Option<String>, env_value: Option<String>) -> Option<PathBuf> {
    arg.or(env_value)
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}
