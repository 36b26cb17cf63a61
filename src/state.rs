use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::detector::Detector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorPhase {
    Idle,
    AwaitingMatchScreen,
    AwaitingAcceptButton,
}

impl MonitorPhase {
    pub fn is_running(self) -> bool {
        self != MonitorPhase::Idle
    }

    /// Status pushed to observers on entering the phase.
    pub fn status_message(self) -> &'static str {
        match self {
            MonitorPhase::Idle => "stopped",
            MonitorPhase::AwaitingMatchScreen => "awaiting match screen",
            MonitorPhase::AwaitingAcceptButton => "watching for accept button",
        }
    }
}

/// Point-in-time view of the session, as served by `/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub phase: MonitorPhase,
    pub running: bool,
    pub auto_watching: bool,
    pub session: u64,
    pub status: &'static str,
}

/// Every piece of cross-task mutable monitor state.
///
/// Fields are private: callers go through the transition methods, which
/// check the current phase and session before changing anything. A running
/// phase always carries the detector its session was started with.
pub struct SessionState {
    phase: MonitorPhase,
    session: u64,
    auto_watching: bool,
    detector: Option<Arc<dyn Detector>>,
}

pub type SharedState = Arc<RwLock<SessionState>>;

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: MonitorPhase::Idle,
            session: 0,
            auto_watching: false,
            detector: None,
        }
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    pub fn session(&self) -> u64 {
        self.session
    }

    pub fn is_running(&self) -> bool {
        self.phase.is_running()
    }

    pub fn auto_watching(&self) -> bool {
        self.auto_watching
    }

    /// Label reported to a newly attached observer.
    pub fn status_label(&self) -> &'static str {
        if self.is_running() {
            "monitoring"
        } else if self.auto_watching {
            "auto-watching"
        } else {
            "stopped"
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.phase,
            running: self.is_running(),
            auto_watching: self.auto_watching,
            session: self.session,
            status: self.status_label(),
        }
    }

    /// Idle -> AwaitingMatchScreen under a fresh session id.
    /// Returns `None` if a session is already running.
    pub fn begin(&mut self, detector: Arc<dyn Detector>) -> Option<u64> {
        if self.is_running() {
            return None;
        }
        self.session += 1;
        self.phase = MonitorPhase::AwaitingMatchScreen;
        self.detector = Some(detector);
        Some(self.session)
    }

    /// Phase and detector of `session`, if it is still the running one.
    pub fn active(&self, session: u64) -> Option<(MonitorPhase, Arc<dyn Detector>)> {
        if session != self.session || !self.is_running() {
            return None;
        }
        self.detector.clone().map(|d| (self.phase, d))
    }

    pub fn advance(&mut self, session: u64, from: MonitorPhase, to: MonitorPhase) -> bool {
        if session != self.session || self.phase != from || !to.is_running() {
            return false;
        }
        self.phase = to;
        true
    }

    /// End `session` from inside its own loop.
    pub fn finish(&mut self, session: u64) -> bool {
        if session != self.session {
            return false;
        }
        self.stop()
    }

    /// End whichever session is running.
    pub fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.phase = MonitorPhase::Idle;
        self.detector = None;
        true
    }

    /// Returns the previous value.
    pub fn set_auto_watching(&mut self, on: bool) -> bool {
        std::mem::replace(&mut self.auto_watching, on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::ButtonMatch;
    use image::RgbImage;

    struct NullDetector;

    impl Detector for NullDetector {
        fn is_match_screen_present(&self, _: &RgbImage) -> bool {
            false
        }

        fn find_accept_button(&self, _: &RgbImage) -> Option<ButtonMatch> {
            None
        }
    }

    fn detector() -> Arc<dyn Detector> {
        Arc::new(NullDetector)
    }

    #[test]
    fn test_begin_only_from_idle() {
        let mut state = SessionState::new();
        assert_eq!(state.begin(detector()), Some(1));
        assert_eq!(state.phase(), MonitorPhase::AwaitingMatchScreen);
        assert_eq!(state.begin(detector()), None);
        assert_eq!(state.session(), 1);
    }

    #[test]
    fn test_advance_checks_session_and_phase() {
        let mut state = SessionState::new();
        let session = state.begin(detector()).unwrap();

        assert!(!state.advance(session + 1, MonitorPhase::AwaitingMatchScreen, MonitorPhase::AwaitingAcceptButton));
        assert!(!state.advance(session, MonitorPhase::AwaitingAcceptButton, MonitorPhase::AwaitingMatchScreen));
        assert!(!state.advance(session, MonitorPhase::AwaitingMatchScreen, MonitorPhase::Idle));
        assert!(state.advance(session, MonitorPhase::AwaitingMatchScreen, MonitorPhase::AwaitingAcceptButton));
        assert_eq!(state.phase(), MonitorPhase::AwaitingAcceptButton);
    }

    #[test]
    fn test_stale_session_cannot_finish_new_one() {
        let mut state = SessionState::new();
        let old = state.begin(detector()).unwrap();
        assert!(state.stop());
        let new = state.begin(detector()).unwrap();

        assert!(state.active(old).is_none());
        assert!(!state.finish(old));
        assert!(state.is_running());
        assert!(state.active(new).is_some());
        assert!(state.finish(new));
        assert!(state.active(new).is_none());
    }

    #[test]
    fn test_stop_when_idle() {
        let mut state = SessionState::new();
        assert!(!state.stop());
        assert_eq!(state.phase(), MonitorPhase::Idle);
    }

    #[test]
    fn test_status_label() {
        let mut state = SessionState::new();
        assert_eq!(state.status_label(), "stopped");
        assert!(!state.set_auto_watching(true));
        assert_eq!(state.status_label(), "auto-watching");
        state.begin(detector());
        assert_eq!(state.status_label(), "monitoring");
        assert_eq!(state.snapshot().phase, MonitorPhase::AwaitingMatchScreen);
    }
}
