pub mod app;
pub mod rewind;

pub use app::{
    run_headless, run_headless_with_metrics, AppError, DriverControl, Entity, EntityId,
    LoopConfig, LoopMetricsSnapshot, MetricsHandle, RunSummary, Scene, SceneError, SceneMachine,
    SceneWorld, Simulation, SnapshotArena, TickDriver, Transform, Vec2,
};
pub use rewind::{
    ConfigError, FrameClock, HistoryRing, ReplaySystem, RequestConflict, RewindConfig,
    RewindHandle, RewindMode, RewindRequest, RewindStatus, SectionCatalog, SectionFault,
    SectionId, SnapshotId, SnapshotStore, StoreError, TickReport,
};
