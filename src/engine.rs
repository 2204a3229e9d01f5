//! Playback engine seam used by the session coordinator
//!
//! The engine is a pass-through to whatever actually produces sound. It reports
//! what it observes as [`SessionEvent::Engine`] messages and never retries on
//! its own; reconnection policy belongs to the coordinator.

use anyhow::Result;
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::actions::{EngineEvent, EngineReport, SessionEvent};

/// Identifies one `load` call so late reports from a replaced stream can be told apart.
pub type LoadId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Buffering,
    Ready,
    Ended,
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("invalid stream URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("audio output unavailable: {0}")]
    Output(String),
    #[error("connection failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {0}")]
    Status(reqwest::StatusCode),
    #[error("stream has no audio track")]
    NoAudioTrack,
    #[error("unsupported stream: {0}")]
    Decode(#[from] symphonia::core::errors::Error),
    #[error("decoder task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub trait PlaybackEngine: Send {
    /// Prepare the given stream. Playback starts paused until [`play`](Self::play).
    fn load(&mut self, url: &str) -> Result<LoadId, StreamError>;
    fn play(&mut self);
    fn pause(&mut self);
    fn current_state(&self) -> EngineState;
    /// Stop everything and free the output device.
    fn release(&mut self) -> Result<()>;
}

impl<T: PlaybackEngine + ?Sized> PlaybackEngine for Box<T> {
    fn load(&mut self, url: &str) -> Result<LoadId, StreamError> {
        (**self).load(url)
    }

    fn play(&mut self) {
        (**self).play()
    }

    fn pause(&mut self) {
        (**self).pause()
    }

    fn current_state(&self) -> EngineState {
        (**self).current_state()
    }

    fn release(&mut self) -> Result<()> {
        (**self).release()
    }
}

/// Only http(s) URLs can be streamed.
pub fn validate_url(url: &str) -> Result<reqwest::Url, StreamError> {
    let parsed = reqwest::Url::parse(url).map_err(|e| StreamError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(StreamError::InvalidUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", other),
        }),
    }
}

/// Forwards engine observations for a single load into the session queue.
#[derive(Clone)]
pub(crate) struct Reporter {
    events: mpsc::Sender<SessionEvent>,
    load: LoadId,
    state: Arc<Mutex<EngineState>>,
    cancel: CancellationToken,
}

impl Reporter {
    pub(crate) fn new(
        events: mpsc::Sender<SessionEvent>,
        load: LoadId,
        state: Arc<Mutex<EngineState>>,
        cancel: CancellationToken,
    ) -> Self {
        Self { events, load, state, cancel }
    }

    pub(crate) async fn state(&self, next: EngineState) {
        if self.cancel.is_cancelled() {
            return;
        }
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == next {
                return;
            }
            debug!("Engine state changing from {:?} to {:?} (load {})", *state, next, self.load);
            *state = next;
        }
        self.send(EngineEvent::State(next)).await;
    }

    pub(crate) async fn failed(&self, reason: String) {
        if self.cancel.is_cancelled() {
            return;
        }
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = EngineState::Idle;
        self.send(EngineEvent::Failed(reason)).await;
    }

    // Waits for queue space; an Ended or Failed report must not be lost
    async fn send(&self, event: EngineEvent) {
        let report = EngineReport { load: self.load, event };
        if self.events.send(SessionEvent::Engine(report)).await.is_err() {
            warn!("Engine report for load {} dropped, session is closed", self.load);
        }
    }
}

/// Engine that produces no sound. It pretends to buffer for a moment and then
/// reports ready, which is enough to drive the whole session without an audio
/// device.
pub struct SilentEngine {
    events: mpsc::Sender<SessionEvent>,
    next_load: LoadId,
    state: Arc<Mutex<EngineState>>,
    cancel: Option<CancellationToken>,
    warmup: Duration,
}

impl SilentEngine {
    pub fn new(events: mpsc::Sender<SessionEvent>) -> Self {
        Self::with_warmup(events, Duration::from_millis(750))
    }

    pub fn with_warmup(events: mpsc::Sender<SessionEvent>, warmup: Duration) -> Self {
        Self {
            events,
            next_load: 0,
            state: Arc::new(Mutex::new(EngineState::Idle)),
            cancel: None,
            warmup,
        }
    }
}

impl PlaybackEngine for SilentEngine {
    fn load(&mut self, url: &str) -> Result<LoadId, StreamError> {
        validate_url(url)?;
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }

        self.next_load += 1;
        let token = CancellationToken::new();
        let reporter = Reporter::new(self.events.clone(), self.next_load, self.state.clone(), token.clone());
        let warmup = self.warmup;
        debug!("Silent engine loading {} (load {})", url, self.next_load);

        tokio::spawn(async move {
            reporter.state(EngineState::Buffering).await;
            tokio::select! {
                _ = tokio::time::sleep(warmup) => reporter.state(EngineState::Ready).await,
                _ = reporter.cancel.cancelled() => {}
            }
        });

        self.cancel = Some(token);
        Ok(self.next_load)
    }

    fn play(&mut self) {
        debug!("Silent engine playing");
    }

    fn pause(&mut self) {
        debug!("Silent engine paused");
    }

    fn current_state(&self) -> EngineState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&mut self) -> Result<()> {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = EngineState::Idle;
        Ok(())
    }
}

/// Used when the audio device could not be opened. Every load fails with the
/// device error, so the session shows it instead of pretending to play.
pub struct UnavailableEngine {
    reason: String,
}

impl UnavailableEngine {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

impl PlaybackEngine for UnavailableEngine {
    fn load(&mut self, url: &str) -> Result<LoadId, StreamError> {
        validate_url(url)?;
        Err(StreamError::Output(self.reason.clone()))
    }

    fn play(&mut self) {}

    fn pause(&mut self) {}

    fn current_state(&self) -> EngineState {
        EngineState::Idle
    }

    fn release(&mut self) -> Result<()> {
        Ok(())
    }
}
