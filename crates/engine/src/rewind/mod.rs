mod clock;
mod config;
mod dispatcher;
mod handle;
mod mutation;
mod ring;
mod store;
mod system;

pub use clock::{FrameClock, RewindMode, RewindRequest, SimulationGate};
pub use config::{
    ConfigError, RewindConfig, DEFAULT_HISTORY_LEN, HISTORY_LEN_ENV_VAR, MIN_HISTORY_LEN,
};
pub use handle::{RequestConflict, RewindHandle, RewindStatus};
pub use mutation::{MutationLog, SectionFault, StoreMutation, TickTransfers, Transfer};
pub use ring::HistoryRing;
pub use store::{SectionCatalog, SectionId, SnapshotId, SnapshotStore, StoreError};
pub use system::{ReplaySystem, TickPlan, TickReport};
