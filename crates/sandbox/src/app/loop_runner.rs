use std::process::ExitCode;

use rewind_engine::{run_headless, AppError, RunSummary};
use tracing::{error, info};

use super::bootstrap::AppWiring;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    match execute(app) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "run_failed");
            ExitCode::FAILURE
        }
    }
}

fn execute(mut app: AppWiring) -> Result<RunSummary, AppError> {
    let summary = run_headless(
        &app.loop_config,
        &mut app.machine,
        &mut app.replay,
        &mut app.driver,
    )?;

    let status = summary.final_status;
    info!(
        scenario = %app.scenario_name,
        ticks_run = summary.ticks_run,
        paused_ticks = summary.paused_ticks,
        section_faults = summary.section_faults,
        faulted_ticks = app.driver.faulted_ticks(),
        events_fired = app.driver.events_fired(),
        replay_mode = app.driver.director().is_replay_mode(),
        frame = status.current_frame,
        rewind_offset = status.rewind_offset,
        horizon = status.horizon,
        mode = ?status.mode,
        "run_summary"
    );

    let shown_frame = status.current_frame.saturating_sub(status.rewind_offset);
    for section in app.machine.section_ids() {
        let snapshot = app.replay.snapshot_at(section, shown_frame);
        let arena = app.machine.arena();
        info!(
            section = section.0,
            frame = shown_frame,
            digest = snapshot.and_then(|id| arena.digest_of(id)).unwrap_or("-"),
            entities = snapshot.and_then(|id| arena.entity_count_of(id)),
            "section_digest"
        );
    }

    Ok(summary)
}
