use rewind_engine::{RewindHandle, RewindRequest};
use tracing::{debug, info};

/// Replay controls driven once per tick: a play/pause button, a stop button and
/// a scrub slider whose range tracks the rewind horizon.
///
/// Button presses are latched and consumed by the next [`ReplayDirector::update`].
#[derive(Debug)]
pub(crate) struct ReplayDirector {
    handle: RewindHandle,
    slider: u64,
    slider_max: u64,
    replay_mode: bool,
    auto_play: bool,
    play_pause_pressed: bool,
    stop_pressed: bool,
}

impl ReplayDirector {
    pub(crate) fn new(handle: RewindHandle) -> Self {
        Self {
            handle,
            slider: 0,
            slider_max: 0,
            replay_mode: false,
            auto_play: false,
            play_pause_pressed: false,
            stop_pressed: false,
        }
    }

    pub(crate) fn press_play_pause(&mut self) {
        self.play_pause_pressed = true;
    }

    pub(crate) fn press_stop(&mut self) {
        self.stop_pressed = true;
    }

    /// Move the slider; out-of-range values pin to its ends.
    pub(crate) fn scrub(&mut self, value: i64) {
        self.slider = u64::try_from(value).unwrap_or(0).min(self.slider_max);
    }

    pub(crate) fn is_replay_mode(&self) -> bool {
        self.replay_mode
    }

    pub(crate) fn is_auto_playing(&self) -> bool {
        self.auto_play
    }

    pub(crate) fn slider_value(&self) -> u64 {
        self.slider
    }

    pub(crate) fn play_pause_enabled(&self) -> bool {
        !self.replay_mode || self.handle.current_rewind_offset() > 0
    }

    /// Consume latched presses and stage at most one request for the coming tick.
    pub(crate) fn update(&mut self) -> Option<RewindRequest> {
        self.slider_max = self.handle.max_rewind_horizon();
        self.slider = self.slider.min(self.slider_max);
        let acknowledged = self.handle.current_rewind_offset();

        let staged = if self.stop_pressed {
            self.stop_replay_mode()
        } else if self.play_pause_pressed {
            if self.replay_mode {
                self.auto_play = !self.auto_play;
                info!(auto_play = self.auto_play, "replay_auto_play_toggled");
                None
            } else {
                self.start_replay_mode()
            }
        } else if self.auto_play && acknowledged == self.slider && self.slider > 0 {
            self.slider -= 1;
            self.request_rewind(self.slider)
        } else {
            self.auto_play = false;
            if acknowledged != self.slider {
                self.request_rewind(self.slider)
            } else {
                None
            }
        };

        self.play_pause_pressed = false;
        self.stop_pressed = false;
        staged
    }

    fn start_replay_mode(&mut self) -> Option<RewindRequest> {
        info!(horizon = self.slider_max, "replay_mode_started");
        self.auto_play = false;
        self.slider = 0;
        self.request_rewind(0)
    }

    fn stop_replay_mode(&mut self) -> Option<RewindRequest> {
        self.auto_play = false;
        self.replay_mode = false;
        self.slider = 0;
        info!("replay_mode_stopped");
        self.stage(RewindRequest::Unpause)
    }

    fn request_rewind(&mut self, offset: u64) -> Option<RewindRequest> {
        self.replay_mode = true;
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        self.stage(RewindRequest::SetRewindOffset(offset))
    }

    fn stage(&self, request: RewindRequest) -> Option<RewindRequest> {
        let result = match request {
            RewindRequest::Unpause => self.handle.request_unpause(),
            RewindRequest::SetRewindOffset(offset) => {
                self.handle.request_set_rewind_offset(offset)
            }
        };
        match result {
            Ok(()) => Some(request),
            Err(conflict) => {
                debug!(error = %conflict, "replay_request_dropped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rewind_engine::{ReplaySystem, RewindConfig, RewindMode, SceneMachine, SectionId};

    use super::super::ball_pit::BallPit;
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    struct Rig {
        machine: SceneMachine,
        replay: ReplaySystem,
        director: ReplayDirector,
    }

    impl Rig {
        fn new() -> Self {
            let mut machine = SceneMachine::new();
            machine
                .register(SectionId(1), Box::new(BallPit::new("pit", 4, 11)), true)
                .expect("register");
            let replay = ReplaySystem::new(RewindConfig::default()).expect("config");
            let director = ReplayDirector::new(replay.handle());
            Self {
                machine,
                replay,
                director,
            }
        }

        fn tick(&mut self) -> Option<RewindRequest> {
            let staged = self.director.update();
            self.replay
                .tick(&mut self.machine, |machine| machine.update_loaded(DT));
            staged
        }

        fn run(&mut self, ticks: usize) {
            for _ in 0..ticks {
                self.tick();
            }
        }
    }

    #[test]
    fn idle_director_stages_nothing() {
        let mut rig = Rig::new();
        for _ in 0..5 {
            assert_eq!(rig.tick(), None);
        }
        assert!(!rig.director.is_replay_mode());
        assert!(rig.director.play_pause_enabled());
    }

    #[test]
    fn first_press_enters_replay_mode_at_offset_zero() {
        let mut rig = Rig::new();
        rig.run(20);

        rig.director.press_play_pause();
        assert_eq!(rig.tick(), Some(RewindRequest::SetRewindOffset(0)));
        assert!(rig.director.is_replay_mode());
        assert!(!rig.director.is_auto_playing());
        assert_eq!(rig.replay.clock().mode(), RewindMode::Paused);
        assert!(!rig.director.play_pause_enabled());
    }

    #[test]
    fn scrub_requests_new_offset_once() {
        let mut rig = Rig::new();
        rig.run(20);
        rig.director.press_play_pause();
        rig.tick();

        rig.director.scrub(8);
        assert_eq!(rig.tick(), Some(RewindRequest::SetRewindOffset(8)));
        assert_eq!(rig.tick(), None);
        assert_eq!(rig.replay.current_rewind_offset(), 8);

        rig.director.scrub(500);
        assert_eq!(rig.tick(), Some(RewindRequest::SetRewindOffset(20)));
        rig.director.scrub(-3);
        assert_eq!(rig.tick(), Some(RewindRequest::SetRewindOffset(0)));
    }

    #[test]
    fn auto_play_steps_toward_present_after_each_acknowledgement() {
        let mut rig = Rig::new();
        rig.run(20);
        rig.director.press_play_pause();
        rig.tick();
        rig.director.scrub(3);
        rig.tick();

        rig.director.press_play_pause();
        assert_eq!(rig.tick(), None);
        assert!(rig.director.is_auto_playing());

        assert_eq!(rig.tick(), Some(RewindRequest::SetRewindOffset(2)));
        assert_eq!(rig.tick(), Some(RewindRequest::SetRewindOffset(1)));
        assert_eq!(rig.tick(), Some(RewindRequest::SetRewindOffset(0)));
        assert_eq!(rig.tick(), None);
        assert!(!rig.director.is_auto_playing());
        assert_eq!(rig.director.slider_value(), 0);
    }

    #[test]
    fn stop_unpauses_and_leaves_replay_mode() {
        let mut rig = Rig::new();
        rig.run(20);
        rig.director.press_play_pause();
        rig.tick();
        rig.director.scrub(5);
        rig.tick();

        rig.director.press_stop();
        assert_eq!(rig.tick(), Some(RewindRequest::Unpause));
        assert!(!rig.director.is_replay_mode());
        assert_eq!(rig.replay.clock().mode(), RewindMode::Running);
        assert_eq!(rig.replay.clock().current_frame(), 16);
        assert_eq!(rig.director.slider_value(), 0);
    }

    #[test]
    fn request_conflict_is_dropped_quietly() {
        let mut rig = Rig::new();
        rig.run(5);
        rig.replay.request_unpause().expect("first request");

        rig.director.press_play_pause();
        assert_eq!(rig.director.update(), None);
        assert!(rig.director.is_replay_mode());
    }
}
