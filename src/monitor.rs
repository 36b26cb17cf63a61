//! The accept-button monitor.
//!
//! A session walks `Idle -> AwaitingMatchScreen -> AwaitingAcceptButton` and
//! back to `Idle`, driven by a poll task ticking at the profile's poll
//! interval. An optional auto-watcher runs beside it while idle and starts a
//! session once the match screen shows up.

use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinError;

use crate::capture::{CaptureError, FrameSource};
use crate::click::{ClickError, Clicker};
use crate::config::{Config, Profile};
use crate::detector::{ButtonMatch, DetectionEngine, Detector};
use crate::diagnostics::{self, DiagnosticReport};
use crate::events::EventHub;
use crate::scheduler::PeriodicTask;
use crate::state::{MonitorPhase, SessionState, SharedState, StatusSnapshot};
use crate::templates::{TemplateError, TemplateKind, TemplateStore, Templates};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("monitoring is already running")]
    AlreadyRunning,

    #[error("monitoring is not running")]
    NotRunning,

    #[error("auto-watch is already running")]
    AlreadyWatching,

    #[error("auto-watch is not running")]
    NotWatching,

    #[error("failed to load templates: {0}")]
    Templates(#[from] TemplateError),

    #[error("screen capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("detection task failed: {0}")]
    Detection(#[from] JoinError),
}

/// A failure inside one poll tick. Never ends the poll loop.
#[derive(Debug, Error)]
pub enum TickError {
    #[error("screen capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("detection task failed: {0}")]
    Detection(#[from] JoinError),
}

/// What one tick observed and did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// The session ended before this tick ran.
    Inactive,
    WaitingForMatchScreen,
    MatchScreenDetected,
    MatchScreenGone,
    SearchingForButton,
    BelowThreshold(ButtonMatch),
    ClickFailed(ButtonMatch),
    /// `resolved` is true when the match screen was gone after settling.
    Clicked { button: ButtonMatch, resolved: bool },
}

/// Builds a detector with freshly loaded templates.
pub type DetectorLoader = Arc<dyn Fn() -> Result<Arc<dyn Detector>, TemplateError> + Send + Sync>;

struct Inner {
    state: SharedState,
    profile: Profile,
    frames: Arc<dyn FrameSource>,
    clicker: Arc<dyn Clicker>,
    loader: DetectorLoader,
    events: EventHub,
    debug_dir: Option<PathBuf>,
    poller: Mutex<Option<PeriodicTask>>,
    watcher: Mutex<Option<PeriodicTask>>,
}

#[derive(Clone)]
pub struct Monitor {
    inner: Arc<Inner>,
}

impl Monitor {
    pub fn new(
        profile: Profile,
        frames: Arc<dyn FrameSource>,
        clicker: Arc<dyn Clicker>,
        loader: DetectorLoader,
        events: EventHub,
    ) -> Self {
        Self::assemble(profile, frames, clicker, loader, events, None)
    }

    fn assemble(
        profile: Profile,
        frames: Arc<dyn FrameSource>,
        clicker: Arc<dyn Clicker>,
        loader: DetectorLoader,
        events: EventHub,
        debug_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: SessionState::shared(),
                profile,
                frames,
                clicker,
                loader,
                events,
                debug_dir,
                poller: Mutex::new(None),
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Monitor backed by [`DetectionEngine`] over templates from `store`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn TemplateStore>,
        frames: Arc<dyn FrameSource>,
        clicker: Arc<dyn Clicker>,
        events: EventHub,
    ) -> Self {
        let profile = config.profile.clone();
        let engine_profile = profile.clone();
        let loader: DetectorLoader = Arc::new(move || -> Result<Arc<dyn Detector>, TemplateError> {
            let templates = Templates::load(store.as_ref())?;
            Ok(Arc::new(DetectionEngine::new(templates, engine_profile.clone())))
        });

        Self::assemble(profile, frames, clicker, loader, events, config.debug_dir.clone())
    }

    pub fn events(&self) -> &EventHub {
        &self.inner.events
    }

    pub fn profile(&self) -> &Profile {
        &self.inner.profile
    }

    pub async fn phase(&self) -> MonitorPhase {
        self.inner.state.read().await.phase()
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.inner.state.read().await.snapshot()
    }

    fn load_detector(&self) -> Result<Arc<dyn Detector>, MonitorError> {
        (self.inner.loader)().map_err(|e| {
            self.inner.events.log(format!("failed to load templates: {e}"));
            tracing::error!("template load failed: {e}");
            MonitorError::Templates(e)
        })
    }

    /// Idle -> AwaitingMatchScreen, spawning the poll task.
    /// Returns the new session id.
    pub async fn start(&self) -> Result<u64, MonitorError> {
        if self.inner.state.read().await.is_running() {
            return Err(MonitorError::AlreadyRunning);
        }

        let detector = self.load_detector()?;
        let session = self
            .inner
            .state
            .write()
            .await
            .begin(detector)
            .ok_or(MonitorError::AlreadyRunning)?;

        let events = &self.inner.events;
        events.set_status(MonitorPhase::AwaitingMatchScreen.status_message());
        events.log("monitoring started, looking for the match screen");

        let monitor = self.clone();
        let task = PeriodicTask::spawn("monitor", self.inner.profile.poll_interval, move || {
            let monitor = monitor.clone();
            async move { monitor.run_tick(session).await }
        });

        if let Some(previous) = self.inner.poller.lock().await.replace(task) {
            previous.stop();
        }
        Ok(session)
    }

    /// Any running phase -> Idle. The poll task exits at its next tick
    /// boundary; a tick that is mid-settle finishes first.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let label = {
            let mut state = self.inner.state.write().await;
            if !state.stop() {
                return Err(MonitorError::NotRunning);
            }
            state.status_label()
        };
        self.announce_stopped(label, "monitoring stopped");

        if let Some(task) = self.inner.poller.lock().await.as_ref() {
            task.stop();
        }
        Ok(())
    }

    /// [`stop`](Self::stop), then wait for the poll task to exit.
    pub async fn stop_and_wait(&self) -> Result<(), MonitorError> {
        self.stop().await?;
        let task = self.inner.poller.lock().await.take();
        if let Some(task) = task {
            task.join().await;
        }
        Ok(())
    }

    /// `label` is the post-stop status, "auto-watching" while the watcher is on.
    fn announce_stopped(&self, label: &str, message: &str) {
        self.inner.events.set_status(label);
        self.inner.events.log(message);
    }

    async fn run_tick(&self, session: u64) -> ControlFlow<()> {
        match self.tick_session(session).await {
            Ok(TickOutcome::Inactive) => return ControlFlow::Break(()),
            Ok(outcome) => tracing::trace!("tick: {outcome:?}"),
            Err(e) => tracing::warn!("tick skipped: {e}"),
        }

        if self.inner.state.read().await.active(session).is_some() {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    }

    /// Run one poll step of the current session.
    pub async fn tick(&self) -> Result<TickOutcome, TickError> {
        let session = self.inner.state.read().await.session();
        self.tick_session(session).await
    }

    async fn tick_session(&self, session: u64) -> Result<TickOutcome, TickError> {
        let Some((phase, detector)) = self.inner.state.read().await.active(session) else {
            return Ok(TickOutcome::Inactive);
        };

        let started = Instant::now();
        let frame = self.capture().await?;

        match phase {
            MonitorPhase::Idle => Ok(TickOutcome::Inactive),
            MonitorPhase::AwaitingMatchScreen => self.await_match_screen(session, detector, frame).await,
            MonitorPhase::AwaitingAcceptButton => {
                self.await_accept_button(session, detector, frame, started).await
            }
        }
    }

    async fn await_match_screen(
        &self,
        session: u64,
        detector: Arc<dyn Detector>,
        frame: RgbImage,
    ) -> Result<TickOutcome, TickError> {
        let (width, height) = frame.dimensions();
        let present = tokio::task::spawn_blocking(move || detector.is_match_screen_present(&frame)).await?;

        if !present {
            if log_due(5) {
                self.inner.events.log(format!("waiting for the match screen (screen {width}x{height})"));
            }
            return Ok(TickOutcome::WaitingForMatchScreen);
        }

        let advanced = self.inner.state.write().await.advance(
            session,
            MonitorPhase::AwaitingMatchScreen,
            MonitorPhase::AwaitingAcceptButton,
        );
        if !advanced {
            return Ok(TickOutcome::Inactive);
        }

        self.inner.events.set_status(MonitorPhase::AwaitingAcceptButton.status_message());
        self.inner.events.log("match screen detected, watching for the accept button");
        Ok(TickOutcome::MatchScreenDetected)
    }

    async fn await_accept_button(
        &self,
        session: u64,
        detector: Arc<dyn Detector>,
        frame: RgbImage,
        started: Instant,
    ) -> Result<TickOutcome, TickError> {
        let (width, height) = frame.dimensions();
        let scan = detector.clone();
        let (present, button) = tokio::task::spawn_blocking(move || {
            if !scan.is_match_screen_present(&frame) {
                return (false, None);
            }
            (true, scan.find_accept_button(&frame))
        })
        .await?;

        if !present {
            self.finish(session, "match screen no longer detected, monitoring stopped").await;
            return Ok(TickOutcome::MatchScreenGone);
        }

        let Some(button) = button else {
            if log_due(10) {
                self.inner.events.log(format!(
                    "searching for the accept button ({:.0?}, screen {width}x{height}, centre-bottom area)",
                    started.elapsed()
                ));
            }
            return Ok(TickOutcome::SearchingForButton);
        };

        self.inner.events.log(format!(
            "accept button found at ({}, {}), score {:.3}, in {:.0?}",
            button.x,
            button.y,
            button.score,
            started.elapsed()
        ));

        if button.score <= self.inner.profile.firing_threshold {
            self.inner
                .events
                .log(format!("score {:.3} too low, click skipped", button.score));
            return Ok(TickOutcome::BelowThreshold(button));
        }

        // A stop issued while this tick was detecting must suppress the click.
        if self.inner.state.read().await.active(session).is_none() {
            return Ok(TickOutcome::Inactive);
        }

        if let Err(e) = self.click(button.x, button.y).await {
            self.inner.events.log(format!("failed to click the accept button: {e}"));
            return Ok(TickOutcome::ClickFailed(button));
        }

        let settle = self.inner.profile.settle_delay;
        self.inner.events.log(format!(
            "accept button clicked, re-checking the match screen in {}s",
            settle.as_secs_f64()
        ));
        tokio::time::sleep(settle).await;

        let resolved = match self.recheck(detector).await {
            Ok(present) => !present,
            Err(e) => {
                tracing::warn!("re-check after click failed: {e}");
                false
            }
        };

        if resolved {
            self.finish(session, "match screen gone after click, monitoring stopped").await;
        } else {
            self.inner.events.log("match screen still present, continuing to monitor");
        }
        Ok(TickOutcome::Clicked { button, resolved })
    }

    async fn recheck(&self, detector: Arc<dyn Detector>) -> Result<bool, TickError> {
        let frame = self.capture().await?;
        Ok(tokio::task::spawn_blocking(move || detector.is_match_screen_present(&frame)).await?)
    }

    async fn finish(&self, session: u64, message: &str) {
        let label = {
            let mut state = self.inner.state.write().await;
            if !state.finish(session) {
                return;
            }
            state.status_label()
        };
        self.announce_stopped(label, message);
    }

    async fn capture(&self) -> Result<RgbImage, TickError> {
        let frames = self.inner.frames.clone();
        Ok(tokio::task::spawn_blocking(move || frames.capture()).await??)
    }

    async fn click(&self, x: u32, y: u32) -> Result<(), ClickError> {
        let clicker = self.inner.clicker.clone();
        tokio::task::spawn_blocking(move || clicker.click(x, y))
            .await
            .map_err(|e| ClickError::Interrupted(e.to_string()))?
    }

    /// Start the idle-time watcher that opens a session on its own.
    pub async fn start_auto_watch(&self) -> Result<(), MonitorError> {
        let mut watcher = self.inner.watcher.lock().await;
        if watcher.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(MonitorError::AlreadyWatching);
        }

        let detector = self.load_detector()?;
        self.inner.state.write().await.set_auto_watching(true);

        let monitor = self.clone();
        *watcher = Some(PeriodicTask::spawn(
            "auto-watch",
            self.inner.profile.watch_interval,
            move || {
                let monitor = monitor.clone();
                let detector = detector.clone();
                async move { monitor.watch_tick(detector).await }
            },
        ));

        tracing::info!("auto-watch started, looking for the match screen");
        if !self.inner.state.read().await.is_running() {
            self.inner.events.set_status("auto-watching");
        }
        Ok(())
    }

    pub async fn stop_auto_watch(&self) -> Result<(), MonitorError> {
        let task = self.inner.watcher.lock().await.take();
        let was_watching = self.inner.state.write().await.set_auto_watching(false);
        if let Some(task) = task {
            task.stop();
        }
        if !was_watching {
            return Err(MonitorError::NotWatching);
        }
        tracing::info!("auto-watch stopped");
        Ok(())
    }

    async fn watch_tick(&self, detector: Arc<dyn Detector>) -> ControlFlow<()> {
        {
            let state = self.inner.state.read().await;
            if !state.auto_watching() {
                return ControlFlow::Break(());
            }
            if state.is_running() {
                return ControlFlow::Continue(());
            }
        }

        let frame = match self.capture().await {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("auto-watch capture skipped: {e}");
                return ControlFlow::Continue(());
            }
        };

        match tokio::task::spawn_blocking(move || detector.is_match_screen_present(&frame)).await {
            Ok(true) => {
                self.inner.events.log("match screen detected, starting monitoring");
                match self.start().await {
                    Ok(_) | Err(MonitorError::AlreadyRunning) => {}
                    Err(e) => tracing::warn!("auto-watch could not start monitoring: {e}"),
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("auto-watch detection failed: {e}"),
        }
        ControlFlow::Continue(())
    }

    /// Capture one frame, run every detector on it and report what each saw.
    pub async fn run_diagnostics(&self) -> Result<DiagnosticReport, MonitorError> {
        let started = Instant::now();
        self.inner.events.log("running diagnostics");

        let detector = self.load_detector()?;

        let capture_started = Instant::now();
        let frames = self.inner.frames.clone();
        let frame = tokio::task::spawn_blocking(move || frames.capture()).await??;
        let capture_ms = capture_started.elapsed().as_secs_f64() * 1000.0;

        let frame = Arc::new(frame);
        let analysed = frame.clone();
        let analysis = tokio::task::spawn_blocking(move || detector.analyze(&analysed)).await?;

        let clicker = self.inner.clicker.clone();
        let click_backend = clicker.backend();
        let click_available = tokio::task::spawn_blocking(move || clicker.is_available()).await?;

        let debug_frame = match &self.inner.debug_dir {
            Some(dir) => {
                let accept = analysis
                    .template_sizes
                    .iter()
                    .find(|t| t.kind == TemplateKind::AcceptButton)
                    .map_or((0, 0), |t| (t.width, t.height));
                match diagnostics::save_debug_frame(dir, &frame, &analysis, accept) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!("failed to save debug frame: {e}");
                        None
                    }
                }
            }
            None => None,
        };

        let report = DiagnosticReport {
            os: std::env::consts::OS,
            capture_ms,
            analysis,
            click_backend,
            click_available,
            total_ms: started.elapsed().as_secs_f64() * 1000.0,
            debug_frame,
        };

        for line in report.lines() {
            self.inner.events.log(line);
        }
        Ok(report)
    }
}

/// Coarse log sampling: true on ticks whose wall-clock second is a multiple
/// of `every`. May fire zero or several times per period.
fn log_due(every: i64) -> bool {
    chrono::Utc::now().timestamp().rem_euclid(every) == 0
}
