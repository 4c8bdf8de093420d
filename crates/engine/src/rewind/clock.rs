use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RewindMode {
    Running,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewindRequest {
    Unpause,
    /// Raw caller value; clamped into `0..=horizon` when resolved.
    SetRewindOffset(i64),
}

impl fmt::Display for RewindRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unpause => write!(f, "unpause"),
            Self::SetRewindOffset(offset) => write!(f, "set_rewind_offset({offset})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulationGate {
    Unchanged,
    Suspended,
    Resumed,
}

/// Authoritative frame counter, rewind offset and horizon.
///
/// Invariants: `rewind_offset <= horizon <= max_horizon` and
/// `horizon <= current_frame`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameClock {
    current_frame: u64,
    rewind_offset: u64,
    horizon: u64,
    max_horizon: u64,
    mode: RewindMode,
}

impl FrameClock {
    pub fn new(history_len: usize) -> Self {
        Self {
            current_frame: 0,
            rewind_offset: 0,
            horizon: 0,
            max_horizon: history_len.saturating_sub(1) as u64,
            mode: RewindMode::Running,
        }
    }

    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    pub fn rewind_offset(&self) -> u64 {
        self.rewind_offset
    }

    pub fn horizon(&self) -> u64 {
        self.horizon
    }

    pub fn max_horizon(&self) -> u64 {
        self.max_horizon
    }

    pub fn mode(&self) -> RewindMode {
        self.mode
    }

    pub fn simulation_enabled(&self) -> bool {
        self.mode == RewindMode::Running
    }

    pub fn target_frame(&self) -> u64 {
        self.current_frame.saturating_sub(self.rewind_offset)
    }

    pub fn oldest_valid_frame(&self) -> u64 {
        self.current_frame.saturating_sub(self.horizon)
    }

    pub fn resolve(&mut self, request: Option<RewindRequest>) -> SimulationGate {
        let Some(request) = request else {
            return SimulationGate::Unchanged;
        };

        match request {
            RewindRequest::Unpause => {
                let was_paused = self.mode == RewindMode::Paused;
                self.current_frame = self.current_frame.saturating_sub(self.rewind_offset);
                // Frames ahead of the resume point get overwritten, so they leave the window.
                self.horizon = self.horizon.saturating_sub(self.rewind_offset);
                self.rewind_offset = 0;
                self.mode = RewindMode::Running;
                if was_paused {
                    SimulationGate::Resumed
                } else {
                    SimulationGate::Unchanged
                }
            }
            RewindRequest::SetRewindOffset(requested) => {
                let was_running = self.mode == RewindMode::Running;
                self.mode = RewindMode::Paused;
                self.rewind_offset = clamp_offset(requested, self.horizon);
                if was_running {
                    SimulationGate::Suspended
                } else {
                    SimulationGate::Unchanged
                }
            }
        }
    }

    pub fn advance(&mut self) -> bool {
        if self.mode != RewindMode::Running {
            return false;
        }
        self.current_frame = self.current_frame.saturating_add(1);
        self.horizon = self.horizon.saturating_add(1).min(self.max_horizon);
        true
    }
}

fn clamp_offset(requested: i64, horizon: u64) -> u64 {
    if requested <= 0 {
        return 0;
    }
    (requested as u64).min(horizon)
}
