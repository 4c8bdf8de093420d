mod ball_pit;
mod bootstrap;
mod loop_runner;
mod replay_director;
mod scenario;

pub(crate) use bootstrap::build_app;
pub(crate) use loop_runner::run;
