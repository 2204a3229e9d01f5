use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::actions::{Command, SessionEvent};

pub const MAX_SLEEP_MINUTES: u32 = 120;

struct ActiveTimer {
    token: CancellationToken,
    deadline: Instant,
    fired: Arc<AtomicBool>,
}

impl ActiveTimer {
    fn is_running(&self) -> bool {
        !self.fired.load(Ordering::SeqCst) && !self.token.is_cancelled()
    }
}

/// Single-shot countdown that pauses playback when it runs out.
pub struct SleepTimer {
    events: mpsc::Sender<SessionEvent>,
    // Timers die with the session
    session: CancellationToken,
    active: Option<ActiveTimer>,
}

impl SleepTimer {
    pub fn new(events: mpsc::Sender<SessionEvent>, session: CancellationToken) -> Self {
        Self {
            events,
            session,
            active: None,
        }
    }

    /// Start a countdown, replacing any running one. Zero minutes only cancels.
    pub fn start(&mut self, minutes: u32) {
        self.cancel();
        if minutes == 0 {
            return;
        }

        let token = self.session.child_token();
        let deadline = Instant::now() + Duration::from_secs(u64::from(minutes) * 60);
        let fired = Arc::new(AtomicBool::new(false));
        info!("Sleep timer set for {} minutes", minutes);

        let events = self.events.clone();
        let task_token = token.clone();
        let task_fired = fired.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    task_fired.store(true, Ordering::SeqCst);
                    info!("Sleep timer expired, pausing playback");
                    if events.send(Command::Pause.into()).await.is_err() {
                        warn!("Sleep timer expired after the session closed");
                    }
                }
                _ = task_token.cancelled() => debug!("Sleep timer cancelled"),
            }
        });

        self.active = Some(ActiveTimer { token, deadline, fired });
    }

    pub fn cancel(&mut self) {
        if let Some(timer) = self.active.take() {
            timer.token.cancel();
        }
    }

    /// Whole minutes left, rounded down.
    pub fn remaining_minutes(&self) -> u32 {
        match &self.active {
            Some(timer) if timer.is_running() => {
                let left = timer.deadline.saturating_duration_since(Instant::now());
                (left.as_secs() / 60) as u32
            }
            _ => 0,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.as_ref().is_some_and(ActiveTimer::is_running)
    }
}

impl Drop for SleepTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> (SleepTimer, mpsc::Receiver<SessionEvent>, CancellationToken) {
        let (tx, rx) = mpsc::channel(8);
        let session = CancellationToken::new();
        (SleepTimer::new(tx, session.clone()), rx, session)
    }

    fn minutes(n: u64) -> Duration {
        Duration::from_secs(n * 60)
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_pauses_once_and_deactivates() {
        let (mut timer, mut rx, _session) = timer();
        timer.start(2);
        assert!(timer.is_active());
        assert_eq!(timer.remaining_minutes(), 2);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(timer.remaining_minutes(), 0);
        assert!(timer.is_active());

        tokio::time::sleep(minutes(1)).await;
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Command(Command::Pause));
        assert!(rx.try_recv().is_err());
        assert!(!timer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_timer() {
        let (mut timer, mut rx, _session) = timer();
        timer.start(5);
        timer.start(10);

        tokio::time::sleep(minutes(6)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(timer.remaining_minutes(), 4);

        tokio::time::sleep(minutes(5)).await;
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::Command(Command::Pause));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_zero_minutes() {
        let (mut timer, mut rx, _session) = timer();
        timer.start(1);
        timer.cancel();
        assert!(!timer.is_active());

        timer.start(1);
        timer.start(0);
        assert!(!timer.is_active());

        tokio::time::sleep(minutes(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_teardown_invalidates_timer() {
        let (mut timer, mut rx, session) = timer();
        timer.start(1);
        session.cancel();
        assert!(!timer.is_active());

        tokio::time::sleep(minutes(2)).await;
        assert!(rx.try_recv().is_err());
    }
}
