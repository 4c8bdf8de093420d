use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::rewind::{
    ConfigError, ReplaySystem, RewindStatus, SectionCatalog, SectionFault, SnapshotStore,
    TickReport,
};

use super::metrics::MetricsAccumulator;
use super::scene::SceneMachine;
use super::MetricsHandle;

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_tps: u32,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
    pub metrics_log_interval: Duration,
    /// Pace ticks against wall-clock time; otherwise run them back to back.
    pub realtime: bool,
    pub tick_limit: Option<u64>,
    /// Abort the run once this many section faults have accumulated.
    pub max_section_faults: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 60,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
            metrics_log_interval: Duration::from_secs(1),
            realtime: true,
            tick_limit: None,
            max_section_faults: 64,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("aborting after {faults} section faults (limit {limit}): {last}")]
    FaultLimitExceeded {
        faults: usize,
        limit: usize,
        #[source]
        last: SectionFault,
    },
}

pub trait Simulation: SectionCatalog + SnapshotStore {
    fn step(&mut self, fixed_dt_seconds: f32);
    fn shutdown(&mut self) {}
}

impl Simulation for SceneMachine {
    fn step(&mut self, fixed_dt_seconds: f32) {
        self.update_loaded(fixed_dt_seconds);
    }

    fn shutdown(&mut self) {
        self.shutdown_all();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverControl {
    Continue,
    Stop,
}

/// Per-tick hook for whatever sits on top of the loop: scripted events, UI glue.
pub trait TickDriver<W> {
    /// Runs before tick `tick` is resolved, so requests staged here land this tick.
    fn before_tick(&mut self, tick: u64, world: &mut W) -> DriverControl;

    fn after_tick(&mut self, _report: &TickReport, _world: &W) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks_run: u64,
    pub paused_ticks: u64,
    pub section_faults: usize,
    pub final_status: RewindStatus,
}

pub fn run_headless<W, D>(
    config: &LoopConfig,
    world: &mut W,
    replay: &mut ReplaySystem,
    driver: &mut D,
) -> Result<RunSummary, AppError>
where
    W: Simulation,
    D: TickDriver<W> + ?Sized,
{
    let metrics_handle = MetricsHandle::default();
    run_headless_with_metrics(config, world, replay, driver, &metrics_handle)
}

pub fn run_headless_with_metrics<W, D>(
    config: &LoopConfig,
    world: &mut W,
    replay: &mut ReplaySystem,
    driver: &mut D,
    metrics_handle: &MetricsHandle,
) -> Result<RunSummary, AppError>
where
    W: Simulation,
    D: TickDriver<W> + ?Sized,
{
    replay.config().validate()?;

    let target_tps = config.target_tps.max(1);
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let metrics_log_interval =
        normalize_non_zero_duration(config.metrics_log_interval, Duration::from_secs(1));
    let max_section_faults = config.max_section_faults.max(1);
    let fixed_dt = Duration::from_secs_f64(1.0 / target_tps as f64);
    let fixed_dt_seconds = fixed_dt.as_secs_f32();

    info!(
        target_tps,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        metrics_log_interval_ms = metrics_log_interval.as_millis() as u64,
        realtime = config.realtime,
        tick_limit = ?config.tick_limit,
        max_section_faults,
        history_len = replay.config().history_len,
        "loop_config"
    );

    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = Instant::now();
    let mut metrics_accumulator = MetricsAccumulator::new(metrics_log_interval);
    let mut ticks_run = 0u64;
    let mut paused_ticks = 0u64;
    let mut section_faults = 0usize;

    'run: loop {
        let ticks_this_frame = if config.realtime {
            let now = Instant::now();
            let raw_frame_dt = now.saturating_duration_since(last_frame_instant);
            last_frame_instant = now;
            let clamped_frame_dt = clamp_frame_delta(raw_frame_dt, max_frame_delta);
            accumulator = accumulator.saturating_add(clamped_frame_dt);

            let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
            accumulator = step_plan.remaining_accumulator;
            if step_plan.dropped_backlog > Duration::ZERO {
                warn!(
                    dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                    max_ticks_per_frame, "sim_clamp_triggered"
                );
            }
            if step_plan.ticks_to_run == 0 {
                thread::sleep(fixed_dt.saturating_sub(accumulator));
                continue;
            }
            step_plan.ticks_to_run
        } else {
            1
        };

        for _ in 0..ticks_this_frame {
            if config.tick_limit.is_some_and(|limit| ticks_run >= limit) {
                info!(reason = "tick_limit", ticks_run, "shutdown_requested");
                break 'run;
            }
            if driver.before_tick(ticks_run, world) == DriverControl::Stop {
                info!(reason = "driver", ticks_run, "shutdown_requested");
                break 'run;
            }

            let tick_started = Instant::now();
            let report = replay.tick(world, |world| world.step(fixed_dt_seconds));
            let tick_dt = tick_started.elapsed();

            ticks_run = ticks_run.saturating_add(1);
            if !report.simulation_ran {
                paused_ticks = paused_ticks.saturating_add(1);
            }
            section_faults = section_faults.saturating_add(report.faults.len());
            metrics_accumulator.record_tick(tick_dt, !report.simulation_ran, report.faults.len());
            driver.after_tick(&report, world);

            if section_faults >= max_section_faults {
                if let Some(last) = report.faults.last().cloned() {
                    world.shutdown();
                    return Err(AppError::FaultLimitExceeded {
                        faults: section_faults,
                        limit: max_section_faults,
                        last,
                    });
                }
            }
        }

        if let Some(snapshot) = metrics_accumulator.maybe_snapshot(Instant::now()) {
            metrics_handle.publish(snapshot);
            let status = replay.handle().status();
            info!(
                tps = snapshot.tps,
                tick_time_ms = snapshot.tick_time_ms,
                paused_ticks = snapshot.paused_ticks,
                section_faults = snapshot.section_faults,
                frame = status.current_frame,
                horizon = status.horizon,
                mode = ?status.mode,
                "loop_metrics"
            );
        }
    }

    world.shutdown();
    let final_status = replay.handle().status();
    info!(
        ticks_run,
        paused_ticks,
        section_faults,
        frame = final_status.current_frame,
        horizon = final_status.horizon,
        "shutdown"
    );
    Ok(RunSummary {
        ticks_run,
        paused_ticks,
        section_faults,
        final_status,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    if accumulator >= fixed_dt {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: Duration::ZERO,
            dropped_backlog: accumulator,
        }
    } else {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: accumulator,
            dropped_backlog: Duration::ZERO,
        }
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}
