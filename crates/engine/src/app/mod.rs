mod loop_runner;
mod metrics;
mod scene;
mod snapshot_store;

pub use loop_runner::{
    run_headless, run_headless_with_metrics, AppError, DriverControl, LoopConfig, RunSummary,
    Simulation, TickDriver,
};
pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
pub use scene::{
    Entity, EntityId, EntityIdAllocator, Scene, SceneError, SceneMachine, SceneWorld, Transform,
    Vec2,
};
pub use snapshot_store::SnapshotArena;
