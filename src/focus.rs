//! Process-local audio focus arbitration
//!
//! A desktop has no system-wide focus service, so the arbiter keeps the focus
//! state itself. [`FocusSignals`] is the authority side: anything that speaks
//! for "another app wants the speakers" (the control socket, a VoIP hook)
//! interrupts and restores focus through it, and the resulting changes reach
//! the session as [`FocusChange`] events.

use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::actions::{FocusChange, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFocusState {
    None,
    Granted,
    TransientLoss,
    Lost,
}

pub trait AudioFocus: Send {
    /// Ask for exclusive output. Returns whether focus was granted.
    fn request(&mut self) -> bool;
    fn abandon(&mut self);
    fn state(&self) -> AudioFocusState;
}

#[derive(Debug)]
struct FocusInner {
    state: AudioFocusState,
    // Another app currently owns the output
    held_elsewhere: bool,
}

pub struct FocusArbiter {
    inner: Arc<Mutex<FocusInner>>,
}

#[derive(Clone)]
pub struct FocusSignals {
    inner: Arc<Mutex<FocusInner>>,
    events: mpsc::Sender<SessionEvent>,
}

impl FocusArbiter {
    pub fn new(events: mpsc::Sender<SessionEvent>) -> (Self, FocusSignals) {
        let inner = Arc::new(Mutex::new(FocusInner {
            state: AudioFocusState::None,
            held_elsewhere: false,
        }));
        let signals = FocusSignals { inner: inner.clone(), events };
        (Self { inner }, signals)
    }
}

impl AudioFocus for FocusArbiter {
    fn request(&mut self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.held_elsewhere {
            debug!("Audio focus denied, output is held elsewhere");
            return false;
        }
        inner.state = AudioFocusState::Granted;
        debug!("Audio focus granted");
        true
    }

    fn abandon(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = AudioFocusState::None;
        debug!("Audio focus abandoned");
    }

    fn state(&self) -> AudioFocusState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }
}

impl FocusSignals {
    /// Another app takes the output. A transient interruption is expected to
    /// be followed by [`restore`](Self::restore).
    pub async fn interrupt(&self, transient: bool) {
        let change = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.held_elsewhere = true;
            match (inner.state, transient) {
                (AudioFocusState::Granted | AudioFocusState::TransientLoss, true) => {
                    inner.state = AudioFocusState::TransientLoss;
                    Some(FocusChange::TransientLoss)
                }
                (AudioFocusState::Granted | AudioFocusState::TransientLoss, false) => {
                    inner.state = AudioFocusState::Lost;
                    Some(FocusChange::Lost)
                }
                _ => None,
            }
        };
        if let Some(change) = change {
            self.notify(change).await;
        }
    }

    /// The other app is done with the output.
    pub async fn restore(&self) {
        let regained = {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.held_elsewhere = false;
            if inner.state == AudioFocusState::TransientLoss {
                inner.state = AudioFocusState::Granted;
                true
            } else {
                false
            }
        };
        if regained {
            self.notify(FocusChange::Regained).await;
        }
    }

    pub fn state(&self) -> AudioFocusState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    async fn notify(&self, change: FocusChange) {
        debug!("Audio focus change: {:?}", change);
        if self.events.send(change.into()).await.is_err() {
            warn!("Focus change {:?} dropped, session is closed", change);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arbiter() -> (FocusArbiter, FocusSignals, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(8);
        let (arbiter, signals) = FocusArbiter::new(tx);
        (arbiter, signals, rx)
    }

    #[test]
    fn test_request_and_abandon() {
        let (mut arbiter, _signals, _rx) = arbiter();
        assert_eq!(arbiter.state(), AudioFocusState::None);
        assert!(arbiter.request());
        assert_eq!(arbiter.state(), AudioFocusState::Granted);
        arbiter.abandon();
        assert_eq!(arbiter.state(), AudioFocusState::None);
    }

    #[tokio::test]
    async fn test_request_denied_while_held_elsewhere() {
        let (mut arbiter, signals, mut rx) = arbiter();
        signals.interrupt(false).await;
        assert!(!arbiter.request());
        // Nothing was held, so nothing was lost
        assert!(rx.try_recv().is_err());

        signals.restore().await;
        assert!(arbiter.request());
    }

    #[tokio::test]
    async fn test_transient_interruption_round_trip() {
        let (mut arbiter, signals, mut rx) = arbiter();
        assert!(arbiter.request());

        signals.interrupt(true).await;
        assert_eq!(arbiter.state(), AudioFocusState::TransientLoss);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Focus(FocusChange::TransientLoss));

        signals.restore().await;
        assert_eq!(arbiter.state(), AudioFocusState::Granted);
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Focus(FocusChange::Regained));
    }

    #[tokio::test]
    async fn test_changes_wait_for_a_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let (mut arbiter, signals) = FocusArbiter::new(tx.clone());
        tx.send(crate::actions::Command::Play.into()).await.unwrap();
        assert!(arbiter.request());

        let interrupting = tokio::spawn(async move { signals.interrupt(true).await });
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Command(crate::actions::Command::Play));
        assert_eq!(rx.recv().await.unwrap(), SessionEvent::Focus(FocusChange::TransientLoss));
        interrupting.await.unwrap();
    }

    #[tokio::test]
    async fn test_permanent_loss_is_not_regained() {
        let (mut arbiter, signals, mut rx) = arbiter();
        assert!(arbiter.request());

        signals.interrupt(false).await;
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Focus(FocusChange::Lost));

        signals.restore().await;
        assert_eq!(signals.state(), AudioFocusState::Lost);
        assert!(rx.try_recv().is_err());
    }
}
